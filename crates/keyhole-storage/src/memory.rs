use async_trait::async_trait;
use keyhole_core::error::Result;
use keyhole_core::{KeyValueStore, OwnerId, Record, ScanFilter, ShortCode, StoreOutcome, Visitor};
use parking_lot::Mutex;
use std::collections::HashMap;

/// In-memory implementation of [`KeyValueStore`].
///
/// A single mutex guards the whole map; the check-then-insert in
/// [`store_if_absent`](KeyValueStore::store_if_absent) happens under it.
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: Mutex<HashMap<String, Record>>,
}

impl MemoryStore {
    /// Creates a new, empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store pre-populated with `records`. Later duplicates win.
    pub fn from_records(records: impl IntoIterator<Item = Record>) -> Self {
        let records = records
            .into_iter()
            .map(|record| (record.short_code.as_str().to_owned(), record))
            .collect();
        Self {
            records: Mutex::new(records),
        }
    }

    /// Number of records held, tombstones included.
    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }

    /// Copies every record, tombstones included, ordered by short code.
    pub fn snapshot(&self) -> Vec<Record> {
        let mut records: Vec<Record> = self.records.lock().values().cloned().collect();
        records.sort_by(|a, b| a.short_code.cmp(&b.short_code));
        records
    }

    /// Inserts `record` unless its code is taken.
    pub fn insert_if_absent(&self, record: Record) -> StoreOutcome {
        let mut records = self.records.lock();
        if let Some(existing) = records.get(record.short_code.as_str()) {
            return StoreOutcome::Existing(existing.clone());
        }
        records.insert(record.short_code.as_str().to_owned(), record);
        StoreOutcome::Created
    }

    /// Inserts `record`, replacing whatever was stored under its code.
    pub fn insert(&self, record: Record) {
        self.records
            .lock()
            .insert(record.short_code.as_str().to_owned(), record);
    }

    /// Sets the tombstone flag on each known code.
    /// Returns how many records went from live to deleted.
    pub fn mark_deleted(&self, codes: &[ShortCode]) -> usize {
        let mut records = self.records.lock();
        let mut flipped = 0;
        for code in codes {
            if let Some(record) = records.get_mut(code.as_str()) {
                if !record.deleted {
                    record.deleted = true;
                    flipped += 1;
                }
            }
        }
        flipped
    }

    fn matching_keys(&self, filter: &ScanFilter) -> Vec<String> {
        self.records
            .lock()
            .iter()
            .filter(|(_, record)| filter.matches(record))
            .map(|(key, _)| key.clone())
            .collect()
    }

    /// Re-reads `key` and returns it only if it still passes `filter`.
    fn fetch_matching(&self, key: &str, filter: &ScanFilter) -> Option<Record> {
        self.records
            .lock()
            .get(key)
            .filter(|record| filter.matches(record))
            .cloned()
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, code: &ShortCode) -> Result<Option<Record>> {
        Ok(self.records.lock().get(code.as_str()).cloned())
    }

    async fn store_if_absent(
        &self,
        code: &ShortCode,
        original_url: &str,
        owner: &OwnerId,
    ) -> Result<StoreOutcome> {
        Ok(self.insert_if_absent(Record::new(code.clone(), original_url, owner.clone())))
    }

    async fn store(&self, code: &ShortCode, original_url: &str, owner: &OwnerId) -> Result<()> {
        self.insert(Record::new(code.clone(), original_url, owner.clone()));
        Ok(())
    }

    async fn scan_filtered(&self, filter: &ScanFilter, visitor: &mut Visitor<'_>) -> Result<()> {
        // Only keys are copied up front. Each record is cloned just before its
        // visit, outside the lock, so a visitor may call back into the store.
        for key in self.matching_keys(filter) {
            let Some(record) = self.fetch_matching(&key, filter) else {
                continue;
            };
            if !visitor(&record) {
                break;
            }
        }
        Ok(())
    }

    async fn delete(&self, codes: &[ShortCode]) -> Result<()> {
        self.mark_deleted(codes);
        Ok(())
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}
