//! Value types that cross the engine boundary.

use crate::error::{EngineError, EngineResult};
use std::fmt;
use std::ops::{BitOr, BitOrAssign};

/// An opaque identifier for a live engine handle.
///
/// Token `0` means "no resource", the same way a null pointer does for a
/// native handle. The handle layer never interprets a token; it only passes
/// it back to the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct ResourceToken(u64);

impl ResourceToken {
    /// The "no resource" token.
    pub const NONE: Self = Self(0);

    /// Creates a token from its raw value.
    #[must_use]
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// Returns the raw value.
    #[must_use]
    pub const fn as_raw(self) -> u64 {
        self.0
    }

    /// Returns true if this is the "no resource" token.
    #[must_use]
    pub const fn is_none(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for ResourceToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// Open-mode and lock-mode flags, using the native engine's bit values.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct OpenFlags(u32);

impl OpenFlags {
    /// Open read-only.
    pub const RDONLY: Self = Self(0x0000_0000);
    /// Open read-write.
    pub const RDWR: Self = Self(0x0000_0002);
    /// Create the store if it does not exist.
    pub const CREAT: Self = Self(0x0000_0040);
    /// Truncate the store on open.
    pub const TRUNC: Self = Self(0x0000_0200);
    /// Sync on close.
    pub const FSYNC: Self = Self(0x0000_1000);
    /// Asynchronous writes.
    pub const ASYNC: Self = Self(0x0000_2000);
    /// Direct I/O.
    pub const DIRECT: Self = Self(0x0000_4000);
    /// Do not track dirty pages.
    pub const NO_DIRTY: Self = Self(0x0001_0000);
    /// Single-architecture store.
    pub const SINGLE_ARCH: Self = Self(0x0008_0000);
    /// Windowed mapping.
    pub const OPEN_WINDOWED: Self = Self(0x0010_0000);
    /// Protect pages while unlocked.
    pub const PROTECT: Self = Self(0x0020_0000);
    /// Sizes are given in megabytes.
    pub const DBSIZE_MB: Self = Self(0x0040_0000);
    /// Enable large objects.
    pub const LARGE_OBJECTS: Self = Self(0x0100_0000);
    /// Partitioned (per-page) locking.
    pub const PARTITIONED_LOCKS: Self = Self(0x0200_0000);
    /// Shared (read-write) locking.
    pub const RW_LOCKS: Self = Self(0x0800_0000);
    /// Create a version 3 store.
    pub const CREATE_V3: Self = Self(0x2000_0000);
    /// Disable locking entirely.
    pub const OPEN_NOLOCK: Self = Self(0x8000_0000);

    /// Creates flags from raw bits.
    #[must_use]
    pub const fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    /// Returns the raw bits.
    #[must_use]
    pub const fn bits(self) -> u32 {
        self.0
    }

    /// Returns true if every bit of `other` is set. `RDONLY` is only
    /// contained in flags with no access bits set.
    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        if other.0 == 0 {
            return self.0 & Self::RDWR.0 == 0;
        }
        self.0 & other.0 == other.0
    }

    /// Returns these flags with `other` added.
    #[must_use]
    pub const fn with(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    /// Returns true if shared (read-write) locks are enabled.
    #[must_use]
    pub const fn shared_locks(self) -> bool {
        self.contains(Self::RW_LOCKS)
    }

    /// Returns true if handles opened with these flags may write.
    #[must_use]
    pub const fn writable(self) -> bool {
        self.contains(Self::RDWR)
    }
}

impl BitOr for OpenFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        self.with(rhs)
    }
}

impl BitOrAssign for OpenFlags {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl fmt::Debug for OpenFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "OpenFlags({:#x})", self.0)
    }
}

/// How a store call treats an existing entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreMode {
    /// Fail (without error) if the key exists.
    Insert,
    /// Insert or overwrite.
    Replace,
    /// Always add, allowing duplicate keys.
    InsertDup,
    /// Overwrite; fail if the key is absent.
    Modify,
}

impl StoreMode {
    const MASK: u32 = 0x3;

    /// Returns the native mode value.
    #[must_use]
    pub const fn code(self) -> u32 {
        match self {
            Self::Insert => 0,
            Self::Replace => 1,
            Self::InsertDup => 2,
            Self::Modify => 3,
        }
    }
}

/// Store mode plus modifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StoreFlags {
    /// The store mode.
    pub mode: StoreMode,
    /// Reserve zero-filled space of the value's length instead of copying it.
    pub reserve: bool,
}

impl StoreFlags {
    /// The native reserve modifier bit.
    pub const RESERVE_BIT: u32 = 0x100;

    /// Returns these flags with the reserve modifier set.
    #[must_use]
    pub const fn reserve(mut self) -> Self {
        self.reserve = true;
        self
    }

    /// Returns the native bit encoding.
    #[must_use]
    pub const fn bits(self) -> u32 {
        let reserve = if self.reserve { Self::RESERVE_BIT } else { 0 };
        self.mode.code() | reserve
    }

    /// Parses a native bit encoding.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if unknown bits are set.
    pub fn from_bits(bits: u32) -> EngineResult<Self> {
        if bits & !(StoreMode::MASK | Self::RESERVE_BIT) != 0 {
            return Err(EngineError::invalid_argument(format!(
                "unknown store flags {bits:#x}"
            )));
        }
        let mode = match bits & StoreMode::MASK {
            0 => StoreMode::Insert,
            1 => StoreMode::Replace,
            2 => StoreMode::InsertDup,
            _ => StoreMode::Modify,
        };
        Ok(Self {
            mode,
            reserve: bits & Self::RESERVE_BIT != 0,
        })
    }
}

impl From<StoreMode> for StoreFlags {
    fn from(mode: StoreMode) -> Self {
        Self {
            mode,
            reserve: false,
        }
    }
}

/// Result of a store call that did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreOutcome {
    /// The value was written.
    Stored,
    /// `Insert` found the key already present; nothing was written.
    Exists,
}

/// Locking granularity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LockKind {
    /// The whole store, exclusively.
    Exclusive,
    /// The page (partition) the key hashes to.
    Partition,
    /// Whatever granularity the store's lock mode selects for this key.
    Smart,
    /// Shared read access; requires `RW_LOCKS`.
    Shared,
}

impl LockKind {
    /// Returns a short name for messages.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Exclusive => "exclusive",
            Self::Partition => "partition",
            Self::Smart => "smart",
            Self::Shared => "shared",
        }
    }
}

/// Whether a lock acquisition may block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockWait {
    /// Wait until the lock is available.
    Block,
    /// Return immediately if the lock is held elsewhere.
    Try,
}

/// Caller-owned iteration state, passed by reference into engine calls.
///
/// The engine is free to interpret the fields; callers only create and
/// hand it back.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IterState {
    /// Page of the next entry to visit.
    pub page: usize,
    /// Slot of the next entry to visit within `page`.
    pub slot: usize,
    /// Entry most recently returned (page, slot), cleared by deletion.
    pub current: Option<(usize, usize)>,
    /// True once the cursor has been positioned by any call.
    pub positioned: bool,
}

impl IterState {
    /// Creates an unpositioned iteration state.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

/// Size and layout facts about an open store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Geometry {
    /// Current size in bytes.
    pub size: u64,
    /// Size limit in bytes, or 0 when unlimited.
    pub limit_size: u64,
    /// Page size in bytes.
    pub page_size: u32,
    /// Entry alignment code.
    pub alignment: u32,
}

/// Verdict of a prune or shake callback on one entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PruneDecision {
    /// Leave the entry in place.
    Keep,
    /// Remove the entry.
    Delete,
}

impl From<bool> for PruneDecision {
    /// `true` deletes, matching the native prune return convention.
    fn from(delete: bool) -> Self {
        if delete {
            Self::Delete
        } else {
            Self::Keep
        }
    }
}

/// Callback a size-limited store consults, entry by entry, when a page is
/// full and the store may not grow. It runs with the store locked and must
/// not call back into the store.
pub type ShakeFn = Box<dyn FnMut(&[u8], &[u8]) -> PruneDecision + Send>;
