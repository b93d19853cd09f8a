//! Hashed page storage for one store.

use crate::error::{EngineError, EngineResult};
use crate::hash::HashFunction;
use crate::types::{IterState, PruneDecision, StoreFlags, StoreMode, StoreOutcome};

type Entry = (Vec<u8>, Vec<u8>);

/// Entries bucketed into pages by key hash.
#[derive(Debug, Clone)]
pub(crate) struct PageTable {
    pages: Vec<Vec<Entry>>,
    hash: HashFunction,
    page_size: u32,
    spill_size: u32,
}

impl PageTable {
    pub fn new(page_size: u32, page_count: usize) -> Self {
        Self {
            pages: vec![Vec::new(); page_count.max(1)],
            hash: HashFunction::DEFAULT,
            page_size,
            spill_size: page_size,
        }
    }

    pub fn hash(&self) -> HashFunction {
        self.hash
    }

    /// Changes the hash function without moving entries. Keys stored
    /// under the old hash become unreachable by lookup.
    pub fn set_hash(&mut self, hash: HashFunction) -> EngineResult<()> {
        hash.hash(&[])?;
        self.hash = hash;
        Ok(())
    }

    pub fn page_size(&self) -> u32 {
        self.page_size
    }

    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    pub fn set_spill_size(&mut self, bytes: u32) -> EngineResult<()> {
        if bytes > self.page_size {
            return Err(EngineError::invalid_argument(format!(
                "spill size {bytes} exceeds page size {}",
                self.page_size
            )));
        }
        self.spill_size = bytes;
        Ok(())
    }

    #[cfg(test)]
    pub fn spill_size(&self) -> u32 {
        self.spill_size
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.pages.iter().map(Vec::len).sum()
    }

    fn data_bytes(&self) -> usize {
        self.pages
            .iter()
            .flatten()
            .map(|(k, v)| k.len() + v.len())
            .sum()
    }

    fn page_bytes(&self, page: usize) -> usize {
        self.pages[page].iter().map(|(k, v)| k.len() + v.len()).sum()
    }

    /// Page `key` maps to and the bytes that page would hold after the
    /// store. Writes that change nothing report 0 bytes.
    pub fn bytes_after_store(
        &self,
        key: &[u8],
        value_len: usize,
        mode: StoreMode,
    ) -> EngineResult<(usize, usize)> {
        let page = self.page_of(key)?;
        let current = self.page_bytes(page);
        let bytes = match (mode, self.find(page, key, 0)) {
            (StoreMode::Insert, Some(_)) | (StoreMode::Modify, None) => 0,
            (StoreMode::Replace | StoreMode::Modify, Some(slot)) => {
                current - self.pages[page][slot].1.len() + value_len
            }
            _ => current + key.len() + value_len,
        };
        Ok((page, bytes))
    }

    /// Deletes the entries of one page that `decide` rejects.
    pub fn retain_page(
        &mut self,
        page: usize,
        decide: &mut dyn FnMut(&[u8], &[u8]) -> PruneDecision,
    ) -> usize {
        let before = self.pages[page].len();
        self.pages[page]
            .retain(|(k, v)| decide(k.as_slice(), v.as_slice()) == PruneDecision::Keep);
        before - self.pages[page].len()
    }

    /// Deletes every entry `decide` rejects.
    pub fn retain(&mut self, decide: &mut dyn FnMut(&[u8], &[u8]) -> PruneDecision) -> usize {
        let mut removed = 0;
        for page in 0..self.pages.len() {
            removed += self.retain_page(page, decide);
        }
        removed
    }

    /// Page `key` maps to under the current hash.
    pub fn page_of(&self, key: &[u8]) -> EngineResult<usize> {
        let hash = self.hash.hash(key)?;
        Ok(hash as usize % self.pages.len())
    }

    fn find(&self, page: usize, key: &[u8], from: usize) -> Option<usize> {
        self.pages[page]
            .iter()
            .skip(from)
            .position(|(k, _)| k == key)
            .map(|i| i + from)
    }

    fn check_key(key: &[u8]) -> EngineResult<()> {
        if key.is_empty() {
            return Err(EngineError::invalid_argument("zero-length key"));
        }
        Ok(())
    }

    fn position(cursor: Option<&mut IterState>, page: usize, slot: usize) {
        if let Some(cursor) = cursor {
            cursor.positioned = true;
            cursor.current = Some((page, slot));
            cursor.page = page;
            cursor.slot = slot + 1;
        }
    }

    pub fn store(
        &mut self,
        key: &[u8],
        value: &[u8],
        flags: StoreFlags,
        cursor: Option<&mut IterState>,
    ) -> EngineResult<StoreOutcome> {
        Self::check_key(key)?;
        let page = self.page_of(key)?;
        let value = if flags.reserve {
            vec![0; value.len()]
        } else {
            value.to_vec()
        };
        let existing = self.find(page, key, 0);

        let slot = match (flags.mode, existing) {
            (StoreMode::Insert, Some(_)) => return Ok(StoreOutcome::Exists),
            (StoreMode::Modify, None) => {
                return Err(EngineError::not_found(String::from_utf8_lossy(key)))
            }
            (StoreMode::Replace | StoreMode::Modify, Some(slot)) => {
                self.pages[page][slot].1 = value;
                slot
            }
            (StoreMode::Insert | StoreMode::Replace | StoreMode::InsertDup, _) => {
                self.pages[page].push((key.to_vec(), value));
                self.pages[page].len() - 1
            }
        };
        Self::position(cursor, page, slot);
        Ok(StoreOutcome::Stored)
    }

    pub fn fetch(&self, key: &[u8], cursor: Option<&mut IterState>) -> EngineResult<Vec<u8>> {
        Self::check_key(key)?;
        let page = self.page_of(key)?;
        let slot = self
            .find(page, key, 0)
            .ok_or_else(|| EngineError::not_found(String::from_utf8_lossy(key)))?;
        Self::position(cursor, page, slot);
        Ok(self.pages[page][slot].1.clone())
    }

    /// Returns the next entry for `key` after the cursor's position, so
    /// repeated calls walk every duplicate.
    pub fn fetch_dup(&self, key: &[u8], cursor: &mut IterState) -> EngineResult<Vec<u8>> {
        Self::check_key(key)?;
        let page = self.page_of(key)?;
        let from = match cursor.current {
            Some((p, _)) if p == page => cursor.slot,
            _ => 0,
        };
        let slot = self
            .find(page, key, from)
            .ok_or_else(|| EngineError::not_found(String::from_utf8_lossy(key)))?;
        Self::position(Some(cursor), page, slot);
        Ok(self.pages[page][slot].1.clone())
    }

    pub fn delete(&mut self, key: &[u8]) -> EngineResult<()> {
        Self::check_key(key)?;
        let page = self.page_of(key)?;
        let slot = self
            .find(page, key, 0)
            .ok_or_else(|| EngineError::not_found(String::from_utf8_lossy(key)))?;
        self.pages[page].remove(slot);
        Ok(())
    }

    pub fn delete_at(&mut self, cursor: &mut IterState) -> EngineResult<()> {
        if !cursor.positioned {
            return Err(EngineError::invalid_argument("cursor is not positioned"));
        }
        let (page, slot) = cursor
            .current
            .take()
            .ok_or_else(|| EngineError::not_found("cursor entry"))?;
        if slot >= self.pages.get(page).map_or(0, Vec::len) {
            return Err(EngineError::not_found("cursor entry"));
        }
        self.pages[page].remove(slot);
        cursor.page = page;
        cursor.slot = slot;
        Ok(())
    }

    /// Advances the cursor and returns the entry it lands on.
    pub fn next(&self, cursor: &mut IterState) -> Option<Entry> {
        if !cursor.positioned {
            cursor.page = 0;
            cursor.slot = 0;
            cursor.positioned = true;
        }
        while cursor.page < self.pages.len() {
            if let Some(entry) = self.pages[cursor.page].get(cursor.slot) {
                cursor.current = Some((cursor.page, cursor.slot));
                cursor.slot += 1;
                return Some(entry.clone());
            }
            cursor.page += 1;
            cursor.slot = 0;
        }
        cursor.current = None;
        None
    }

    /// Rehashes every entry into `page_count` pages.
    pub fn resize(&mut self, page_count: usize) -> EngineResult<()> {
        let mut pages = vec![Vec::new(); page_count.max(1)];
        for (key, value) in self.pages.drain(..).flatten() {
            let page = self.hash.hash(&key)? as usize % pages.len();
            pages[page].push((key, value));
        }
        self.pages = pages;
        Ok(())
    }

    /// Fewest pages that hold the current data without overflowing.
    pub fn compact_page_count(&self) -> usize {
        let needed = self.data_bytes().div_ceil(self.page_size as usize);
        needed.max(1).next_power_of_two()
    }

    /// Removes every entry, keeping the page layout.
    pub fn clear(&mut self) {
        for page in &mut self.pages {
            page.clear();
        }
    }

    /// Bytes the store occupies.
    pub fn size(&self) -> u64 {
        self.pages.len() as u64 * u64::from(self.page_size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> PageTable {
        PageTable::new(4096, 8)
    }

    #[test]
    fn store_modes() {
        let mut pages = table();
        let insert = StoreFlags::from(StoreMode::Insert);
        assert_eq!(pages.store(b"k", b"1", insert, None), Ok(StoreOutcome::Stored));
        assert_eq!(pages.store(b"k", b"2", insert, None), Ok(StoreOutcome::Exists));
        assert_eq!(pages.fetch(b"k", None).unwrap(), b"1");

        pages
            .store(b"k", b"3", StoreMode::Replace.into(), None)
            .unwrap();
        assert_eq!(pages.fetch(b"k", None).unwrap(), b"3");

        assert!(pages
            .store(b"missing", b"x", StoreMode::Modify.into(), None)
            .unwrap_err()
            .is_not_found());
    }

    #[test]
    fn reserve_zero_fills() {
        let mut pages = table();
        let flags = StoreFlags::from(StoreMode::Replace).reserve();
        pages.store(b"k", b"abc", flags, None).unwrap();
        assert_eq!(pages.fetch(b"k", None).unwrap(), vec![0, 0, 0]);
    }

    #[test]
    fn duplicates_walk_with_cursor() {
        let mut pages = table();
        for value in [b"a", b"b", b"c"] {
            pages
                .store(b"dup", value, StoreMode::InsertDup.into(), None)
                .unwrap();
        }
        let mut cursor = IterState::new();
        let mut seen = Vec::new();
        while let Ok(value) = pages.fetch_dup(b"dup", &mut cursor) {
            seen.push(value);
        }
        assert_eq!(seen, vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec()]);
    }

    #[test]
    fn empty_key_rejected() {
        let mut pages = table();
        assert!(matches!(
            pages.delete(b""),
            Err(EngineError::InvalidArgument(_))
        ));
    }

    #[test]
    fn cursor_delete_twice() {
        let mut pages = table();
        pages.store(b"a", b"1", StoreMode::Replace.into(), None).unwrap();
        pages.store(b"b", b"2", StoreMode::Replace.into(), None).unwrap();

        let mut cursor = IterState::new();
        assert!(matches!(
            pages.delete_at(&mut cursor),
            Err(EngineError::InvalidArgument(_))
        ));

        assert!(pages.next(&mut cursor).is_some());
        pages.delete_at(&mut cursor).unwrap();
        assert!(pages.delete_at(&mut cursor).unwrap_err().is_not_found());

        // The remaining entry is still reachable after the delete.
        assert!(pages.next(&mut cursor).is_some());
        assert!(pages.next(&mut cursor).is_none());
        assert_eq!(pages.len(), 1);
    }

    #[test]
    fn changing_hash_strands_keys() {
        let mut pages = PageTable::new(4096, 64);
        pages.store(b"stranded", b"v", StoreMode::Replace.into(), None).unwrap();
        let before = pages.page_of(b"stranded").unwrap();
        pages.set_hash(HashFunction::Crc32).unwrap();
        if pages.page_of(b"stranded").unwrap() != before {
            assert!(pages.fetch(b"stranded", None).is_err());
        }
        let mut cursor = IterState::new();
        assert!(pages.next(&mut cursor).is_some());

        pages.resize(64).unwrap();
        assert_eq!(pages.fetch(b"stranded", None).unwrap(), b"v");
    }

    #[test]
    fn compact_page_count_rounds_up() {
        let mut pages = PageTable::new(128, 16);
        assert_eq!(pages.compact_page_count(), 1);
        pages
            .store(b"k", &[7; 200], StoreMode::Replace.into(), None)
            .unwrap();
        assert_eq!(pages.compact_page_count(), 2);
    }

    #[test]
    fn spill_size_bounded_by_page() {
        let mut pages = PageTable::new(256, 1);
        assert!(pages.set_spill_size(128).is_ok());
        assert_eq!(pages.spill_size(), 128);
        assert!(pages.set_spill_size(512).is_err());
    }

    #[test]
    fn bytes_after_store_by_mode() {
        let mut pages = table();
        pages.store(b"k", b"1234", StoreMode::Replace.into(), None).unwrap();
        let (page, _) = pages.bytes_after_store(b"k", 0, StoreMode::Replace).unwrap();
        let base = pages.page_bytes(page);

        assert_eq!(pages.bytes_after_store(b"k", 9, StoreMode::Insert).unwrap().1, 0);
        assert_eq!(
            pages.bytes_after_store(b"k", 2, StoreMode::Replace).unwrap().1,
            base - 2
        );
        assert_eq!(
            pages.bytes_after_store(b"k", 2, StoreMode::InsertDup).unwrap().1,
            base + 3
        );
        assert_eq!(
            pages.bytes_after_store(b"absent", 2, StoreMode::Modify).unwrap().1,
            0
        );
    }

    #[test]
    fn retain_removes_rejected_entries() {
        let mut pages = table();
        for i in 0..10u8 {
            pages.store(&[b'k', i], &[i], StoreMode::Replace.into(), None).unwrap();
        }
        let removed = pages.retain(&mut |_, v| PruneDecision::from(v[0] % 2 == 0));
        assert_eq!(removed, 5);
        assert_eq!(pages.len(), 5);
        assert!(pages.fetch(&[b'k', 1], None).is_ok());
        assert!(pages.fetch(&[b'k', 2], None).unwrap_err().is_not_found());
    }
}
