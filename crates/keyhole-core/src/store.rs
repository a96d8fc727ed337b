use crate::error::Result;
use crate::owner::OwnerId;
use crate::record::Record;
use crate::shortcode::ShortCode;
use async_trait::async_trait;
use typed_builder::TypedBuilder;

/// Callback invoked once per record during a scan.
///
/// Returning `false` stops the traversal; the store must not visit any
/// further record.
pub type Visitor<'a> = dyn FnMut(&Record) -> bool + Send + 'a;

/// Result of a conditional insert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreOutcome {
    /// The caller's record is now the stored value.
    Created,
    /// The code was already taken (possibly by a tombstone); nothing was written.
    Existing(Record),
}

impl StoreOutcome {
    pub fn already_existed(&self) -> bool {
        matches!(self, StoreOutcome::Existing(_))
    }
}

/// Narrows a scan.
///
/// The default selects every live record of every owner.
#[derive(Debug, Clone, Default, TypedBuilder)]
pub struct ScanFilter {
    /// Only visit records of this owner.
    #[builder(default, setter(strip_option))]
    pub owner: Option<OwnerId>,
    /// Visit tombstoned records too.
    #[builder(default)]
    pub include_deleted: bool,
}

impl ScanFilter {
    pub fn matches(&self, record: &Record) -> bool {
        if record.deleted && !self.include_deleted {
            return false;
        }
        self.owner
            .as_ref()
            .map_or(true, |owner| *owner == record.owner_id)
    }
}

/// The persistence contract shared by every storage backend.
///
/// Implementations must make [`store_if_absent`](Self::store_if_absent)
/// atomic: among concurrent callers using the same code, at most one observes
/// [`StoreOutcome::Created`].
#[async_trait]
pub trait KeyValueStore: Send + Sync + 'static {
    /// Returns the stored record, tombstoned or not.
    async fn get(&self, code: &ShortCode) -> Result<Option<Record>>;

    /// Inserts the record unless the code is already taken.
    async fn store_if_absent(
        &self,
        code: &ShortCode,
        original_url: &str,
        owner: &OwnerId,
    ) -> Result<StoreOutcome>;

    /// Inserts the record without checking for an existing one.
    ///
    /// What happens to an existing record is backend-defined; callers that
    /// need atomicity use [`store_if_absent`](Self::store_if_absent).
    async fn store(&self, code: &ShortCode, original_url: &str, owner: &OwnerId) -> Result<()>;

    /// Visits every record matching `filter` in unspecified order.
    async fn scan_filtered(&self, filter: &ScanFilter, visitor: &mut Visitor<'_>) -> Result<()>;

    /// Marks every given code as deleted. Unknown and already deleted codes
    /// are ignored.
    async fn delete(&self, codes: &[ShortCode]) -> Result<()>;

    /// Checks that the backend is reachable.
    async fn ping(&self) -> Result<()>;

    /// Releases files and connections held by the store.
    async fn close(&self) -> Result<()>;

    /// Returns the original URL of a live record.
    /// Returns `None` if the code does not exist or was deleted.
    async fn load(&self, code: &ShortCode) -> Result<Option<String>> {
        Ok(self
            .get(code)
            .await?
            .filter(Record::is_live)
            .map(|record| record.original_url))
    }

    /// Visits every live record.
    async fn scan(&self, visitor: &mut Visitor<'_>) -> Result<()> {
        self.scan_filtered(&ScanFilter::default(), visitor).await
    }

    /// Visits every live record of `owner`.
    async fn scan_with_owner(&self, owner: &OwnerId, visitor: &mut Visitor<'_>) -> Result<()> {
        let filter = ScanFilter::builder().owner(owner.clone()).build();
        self.scan_filtered(&filter, visitor).await
    }
}
