//! Store open configuration.

use crate::error::{CoreError, CoreResult};
use mapstore_engine::{OpenFlags, DEFAULT_PAGE_SIZE};
use std::path::Path;

/// Parameters for opening a store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpenOptions {
    /// Open-mode and lock-mode flags.
    pub flags: OpenFlags,

    /// Permission bits for a newly created store.
    pub mode: u32,

    /// Page size in bytes (0 = engine default).
    pub page_size: u32,

    /// Initial size in bytes for a newly created store.
    pub presize: u64,
}

impl Default for OpenOptions {
    fn default() -> Self {
        Self {
            flags: OpenFlags::RDWR.with(OpenFlags::CREAT),
            mode: 0o644,
            page_size: DEFAULT_PAGE_SIZE,
            presize: 0,
        }
    }
}

impl OpenOptions {
    /// Creates options with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the flags.
    #[must_use]
    pub const fn flags(mut self, flags: OpenFlags) -> Self {
        self.flags = flags;
        self
    }

    /// Sets the permission bits.
    #[must_use]
    pub const fn mode(mut self, mode: u32) -> Self {
        self.mode = mode;
        self
    }

    /// Sets the page size.
    #[must_use]
    pub const fn page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size;
        self
    }

    /// Sets the initial size.
    #[must_use]
    pub const fn presize(mut self, presize: u64) -> Self {
        self.presize = presize;
        self
    }

    /// Enables shared (read-write) locks.
    #[must_use]
    pub const fn shared_locks(mut self) -> Self {
        self.flags = self.flags.with(OpenFlags::RW_LOCKS);
        self
    }

    /// Enables partitioned (per-page) locks.
    #[must_use]
    pub const fn partitioned_locks(mut self) -> Self {
        self.flags = self.flags.with(OpenFlags::PARTITIONED_LOCKS);
        self
    }

    /// Creates the store if missing.
    #[must_use]
    pub const fn create(mut self) -> Self {
        self.flags = self.flags.with(OpenFlags::CREAT);
        self
    }

    /// Opens for reading and writing.
    #[must_use]
    pub const fn read_write(mut self) -> Self {
        self.flags = self.flags.with(OpenFlags::RDWR);
        self
    }

    /// Opens for reading only.
    #[must_use]
    pub const fn read_only(mut self) -> Self {
        self.flags = OpenFlags::from_bits(self.flags.bits() & !OpenFlags::RDWR.bits());
        self
    }

    /// Checks the parameters this layer is responsible for. Deeper checks
    /// are left to the engine.
    ///
    /// # Errors
    ///
    /// Returns `InvalidParameters` for an empty path.
    pub fn validate(&self, path: &Path) -> CoreResult<()> {
        if path.as_os_str().is_empty() {
            return Err(CoreError::invalid_parameters("store path is empty"));
        }
        Ok(())
    }

    /// Renders the parameters for open-failure diagnostics.
    #[must_use]
    pub fn info(&self) -> String {
        format!(
            "flags: {:#X} mode: 0{:o} (octal) psize: {:#X} presize: {:#X}",
            self.flags.bits(),
            self.mode,
            self.page_size,
            self.presize
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_options() {
        let options = OpenOptions::default();
        assert!(options.flags.writable());
        assert!(options.flags.contains(OpenFlags::CREAT));
        assert!(!options.flags.shared_locks());
        assert_eq!(options.page_size, 4096);
    }

    #[test]
    fn builder_pattern() {
        let options = OpenOptions::new()
            .shared_locks()
            .page_size(8192)
            .presize(1 << 20)
            .mode(0o600);

        assert!(options.flags.shared_locks());
        assert_eq!(options.page_size, 8192);
        assert_eq!(options.presize, 1 << 20);
        assert_eq!(options.mode, 0o600);
    }

    #[test]
    fn read_only_clears_access_bits() {
        let options = OpenOptions::new().read_only();
        assert!(!options.flags.writable());
        assert!(options.flags.contains(OpenFlags::CREAT));
    }

    #[test]
    fn empty_path_rejected() {
        let options = OpenOptions::new();
        assert!(options.validate(Path::new("")).is_err());
        assert!(options.validate(Path::new("/db")).is_ok());
    }

    #[test]
    fn info_format() {
        let options = OpenOptions::new().flags(OpenFlags::from_bits(0x42));
        assert_eq!(
            options.info(),
            "flags: 0x42 mode: 0644 (octal) psize: 0x1000 presize: 0x0"
        );
    }
}
