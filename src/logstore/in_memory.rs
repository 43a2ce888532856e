use crate::logstore::store::{LogStore, StoreError};
use crate::logstore::types::{LogEntry, LogIndex};
use std::collections::VecDeque;

/// In-memory reference implementation of [`LogStore`]. Durability is modeled:
/// `synced_index` only advances on `wait_for_sync` appends or an explicit
/// `sync` call, so the protocol's syncIndex tracking can be exercised without
/// a disk.
pub struct InMemoryLogStore {
    entries: VecDeque<LogEntry>,
    first_index: LogIndex,
    synced: LogIndex,
}

impl InMemoryLogStore {
    pub fn new() -> Self {
        InMemoryLogStore {
            entries: VecDeque::new(),
            first_index: LogIndex::ZERO,
            synced: LogIndex::ZERO,
        }
    }

    fn offset_of(&self, index: LogIndex) -> Option<usize> {
        if self.entries.is_empty() || index < self.first_index || index > self.last_index() {
            return None;
        }
        Some((index.as_u64() - self.first_index.as_u64()) as usize)
    }
}

impl Default for InMemoryLogStore {
    fn default() -> Self {
        Self::new()
    }
}

impl LogStore for InMemoryLogStore {
    fn append(&mut self, entries: &[LogEntry], wait_for_sync: bool) -> Result<(), StoreError> {
        for entry in entries {
            let expected = if self.entries.is_empty() {
                if self.first_index.is_zero() {
                    entry.index // empty store accepts any starting index
                } else {
                    self.first_index
                }
            } else {
                self.last_index().succ()
            };
            if entry.index != expected {
                return Err(StoreError::NonContiguous {
                    expected,
                    got: entry.index,
                });
            }
            if self.entries.is_empty() {
                self.first_index = entry.index;
            }
            self.entries.push_back(entry.clone());
        }
        if wait_for_sync {
            self.synced = self.last_index();
        }
        Ok(())
    }

    fn read(&self, index: LogIndex) -> Result<Option<LogEntry>, StoreError> {
        Ok(self.offset_of(index).map(|o| self.entries[o].clone()))
    }

    fn truncate_from(&mut self, index: LogIndex) -> Result<(), StoreError> {
        if let Some(offset) = self.offset_of(index) {
            self.entries.truncate(offset);
            if self.entries.is_empty() {
                self.first_index = LogIndex::ZERO;
            }
            if self.synced > self.last_index() {
                self.synced = self.last_index();
            }
        }
        Ok(())
    }

    fn compact_up_to(&mut self, index: LogIndex) -> Result<(), StoreError> {
        while let Some(front) = self.entries.front() {
            if front.index >= index {
                break;
            }
            self.entries.pop_front();
        }
        self.first_index = match self.entries.front() {
            Some(front) => front.index,
            None => LogIndex::ZERO,
        };
        Ok(())
    }

    fn sync(&mut self) -> Result<LogIndex, StoreError> {
        self.synced = self.last_index();
        Ok(self.synced)
    }

    fn first_index(&self) -> LogIndex {
        self.first_index
    }

    fn last_index(&self) -> LogIndex {
        match self.entries.back() {
            Some(back) => back.index,
            None => LogIndex::ZERO,
        }
    }

    fn synced_index(&self) -> LogIndex {
        self.synced
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logstore::types::LogTerm;
    use bytes::Bytes;

    fn entry(term: u64, index: u64) -> LogEntry {
        LogEntry::new(LogTerm::new(term), LogIndex::new(index), Bytes::from_static(b"x"))
    }

    #[test]
    fn append_and_read() {
        let mut store = InMemoryLogStore::new();
        store.append(&[entry(1, 1), entry(1, 2)], false).unwrap();

        assert_eq!(store.first_index(), LogIndex::new(1));
        assert_eq!(store.last_index(), LogIndex::new(2));
        assert_eq!(store.read(LogIndex::new(2)).unwrap().unwrap().index, LogIndex::new(2));
        assert!(store.read(LogIndex::new(3)).unwrap().is_none());
    }

    #[test]
    fn append_rejects_gap() {
        let mut store = InMemoryLogStore::new();
        store.append(&[entry(1, 1)], false).unwrap();

        let err = store.append(&[entry(1, 3)], false).unwrap_err();
        match err {
            StoreError::NonContiguous { expected, got } => {
                assert_eq!(expected, LogIndex::new(2));
                assert_eq!(got, LogIndex::new(3));
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn sync_watermark_tracks_wait_for_sync() {
        let mut store = InMemoryLogStore::new();
        store.append(&[entry(1, 1)], false).unwrap();
        assert_eq!(store.synced_index(), LogIndex::ZERO);

        store.append(&[entry(1, 2)], true).unwrap();
        assert_eq!(store.synced_index(), LogIndex::new(2));

        store.append(&[entry(1, 3)], false).unwrap();
        assert_eq!(store.synced_index(), LogIndex::new(2));
        assert_eq!(store.sync().unwrap(), LogIndex::new(3));
    }

    #[test]
    fn truncate_rewinds_sync_watermark() {
        let mut store = InMemoryLogStore::new();
        store.append(&[entry(1, 1), entry(1, 2), entry(1, 3)], true).unwrap();

        store.truncate_from(LogIndex::new(2)).unwrap();
        assert_eq!(store.last_index(), LogIndex::new(1));
        assert_eq!(store.synced_index(), LogIndex::new(1));
    }

    #[test]
    fn compaction_drops_prefix_only() {
        let mut store = InMemoryLogStore::new();
        store.append(&[entry(1, 1), entry(1, 2), entry(1, 3)], false).unwrap();

        store.compact_up_to(LogIndex::new(3)).unwrap();
        assert_eq!(store.first_index(), LogIndex::new(3));
        assert!(store.read(LogIndex::new(2)).unwrap().is_none());
        assert!(store.read(LogIndex::new(3)).unwrap().is_some());
    }
}
