use crate::memory::MemoryStore;
use async_trait::async_trait;
use keyhole_core::error::Result;
use keyhole_core::{
    KeyValueStore, OwnerId, Record, ScanFilter, ShortCode, StorageError, StoreOutcome, Visitor,
};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// One entry of the JSON mirror. The owner id travels as `uuid`.
#[derive(Debug, Serialize, Deserialize)]
struct FileRecord {
    uuid: String,
    short_url: String,
    original_url: String,
    #[serde(default)]
    is_deleted: bool,
}

impl From<&Record> for FileRecord {
    fn from(record: &Record) -> Self {
        Self {
            uuid: record.owner_id.as_str().to_owned(),
            short_url: record.short_code.as_str().to_owned(),
            original_url: record.original_url.clone(),
            is_deleted: record.deleted,
        }
    }
}

impl From<FileRecord> for Record {
    fn from(entry: FileRecord) -> Self {
        Record {
            short_code: ShortCode::new_unchecked(entry.short_url),
            original_url: entry.original_url,
            owner_id: OwnerId::new(entry.uuid),
            deleted: entry.is_deleted,
        }
    }
}

/// The open mirror file. `None` once the store is closed.
#[derive(Debug)]
struct Journal {
    file: Option<File>,
}

impl Journal {
    fn rewrite(&mut self, records: &[Record]) -> std::io::Result<()> {
        let Some(file) = self.file.as_mut() else {
            return Err(std::io::Error::other("journal is closed"));
        };
        let entries: Vec<FileRecord> = records.iter().map(FileRecord::from).collect();

        file.set_len(0)?;
        file.seek(SeekFrom::Start(0))?;
        let mut writer = BufWriter::new(&mut *file);
        serde_json::to_writer(&mut writer, &entries)?;
        writer.flush()?;
        drop(writer);
        file.sync_data()
    }
}

/// A [`MemoryStore`] mirrored to a JSON file.
///
/// The file holds the complete record set, tombstones included, and is
/// rewritten after every mutation that changed something. It is replayed when
/// the store is opened. File I/O runs on the blocking thread pool.
///
/// Durability is best-effort: the in-memory commit stands even when the
/// rewrite fails. The failure is logged, and the next successful rewrite
/// brings the file back in sync, but a crash in between loses the mutation.
#[derive(Debug)]
pub struct FileStore {
    path: Arc<Path>,
    cache: Arc<MemoryStore>,
    journal: Arc<Mutex<Journal>>,
}

impl FileStore {
    /// Opens (creating if needed) the mirror at `path` and loads its records.
    ///
    /// An empty file is an empty store. A file that is not a valid record
    /// array is logged and treated as empty; it is overwritten by the next
    /// mutation.
    ///
    /// This blocks on file I/O; async callers go through
    /// [`open`](crate::open).
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(&path)
            .map_err(|e| {
                error!(path = %path.display(), error = %e, "failed to open storage file");
                StorageError::Io(format!("open {}: {e}", path.display()))
            })?;

        let records = read_records(&mut file, &path)?;
        info!(path = %path.display(), records = records.len(), "loaded storage file");

        Ok(Self {
            path: Arc::from(path),
            cache: Arc::new(MemoryStore::from_records(records)),
            journal: Arc::new(Mutex::new(Journal { file: Some(file) })),
        })
    }

    fn ensure_open(&self) -> Result<()> {
        if self.journal.lock().file.is_none() {
            return Err(StorageError::Closed);
        }
        Ok(())
    }

    /// Writes the current cache over the mirror file.
    async fn persist(&self, operation: &'static str) {
        let cache = Arc::clone(&self.cache);
        let journal = Arc::clone(&self.journal);

        let written = tokio::task::spawn_blocking(move || {
            let mut journal = journal.lock();
            // Snapshot under the journal lock so that concurrent writers never
            // replace a newer snapshot with an older one.
            let records = cache.snapshot();
            journal.rewrite(&records).map(|()| records.len())
        })
        .await;

        match written {
            Ok(Ok(records)) => debug!(operation, records, "storage file rewritten"),
            Ok(Err(e)) => error!(
                operation,
                path = %self.path.display(),
                error = %e,
                "failed to rewrite storage file, change kept in memory only"
            ),
            Err(e) => error!(
                operation,
                path = %self.path.display(),
                error = %e,
                "storage file rewrite task failed, change kept in memory only"
            ),
        }
    }
}

fn read_records(file: &mut File, path: &Path) -> Result<Vec<Record>> {
    let mut content = Vec::new();
    file.read_to_end(&mut content).map_err(|e| {
        error!(path = %path.display(), error = %e, "failed to read storage file");
        StorageError::Io(format!("read {}: {e}", path.display()))
    })?;

    if content.iter().all(u8::is_ascii_whitespace) {
        return Ok(Vec::new());
    }

    match serde_json::from_slice::<Vec<FileRecord>>(&content) {
        Ok(entries) => Ok(entries.into_iter().map(Record::from).collect()),
        Err(e) => {
            error!(
                path = %path.display(),
                error = %e,
                "storage file is malformed, starting with an empty store"
            );
            Ok(Vec::new())
        }
    }
}

#[async_trait]
impl KeyValueStore for FileStore {
    async fn get(&self, code: &ShortCode) -> Result<Option<Record>> {
        self.cache.get(code).await
    }

    async fn store_if_absent(
        &self,
        code: &ShortCode,
        original_url: &str,
        owner: &OwnerId,
    ) -> Result<StoreOutcome> {
        self.ensure_open()?;
        let outcome = self
            .cache
            .insert_if_absent(Record::new(code.clone(), original_url, owner.clone()));
        if outcome == StoreOutcome::Created {
            self.persist("store_if_absent").await;
        }
        Ok(outcome)
    }

    async fn store(&self, code: &ShortCode, original_url: &str, owner: &OwnerId) -> Result<()> {
        self.ensure_open()?;
        self.cache.insert(Record::new(code.clone(), original_url, owner.clone()));
        self.persist("store").await;
        Ok(())
    }

    async fn scan_filtered(&self, filter: &ScanFilter, visitor: &mut Visitor<'_>) -> Result<()> {
        self.cache.scan_filtered(filter, visitor).await
    }

    async fn delete(&self, codes: &[ShortCode]) -> Result<()> {
        self.ensure_open()?;
        if self.cache.mark_deleted(codes) > 0 {
            self.persist("delete").await;
        }
        Ok(())
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        let Some(file) = self.journal.lock().file.take() else {
            warn!(path = %self.path.display(), "storage file already closed");
            return Ok(());
        };

        let path = Arc::clone(&self.path);
        tokio::task::spawn_blocking(move || file.sync_all())
            .await
            .map_err(|e| StorageError::Io(format!("sync {}: {e}", path.display())))?
            .map_err(|e| StorageError::Io(format!("sync {}: {e}", path.display())))?;
        info!(path = %path.display(), "storage file closed");
        Ok(())
    }
}
