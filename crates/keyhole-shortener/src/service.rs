use async_trait::async_trait;
use keyhole_core::{
    KeyValueStore, OwnerId, Record, ShortCode, Shortened, Shortener, ShortenerError, Stats,
    StoreOutcome,
};
use keyhole_hasher::CodeHasher;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// A concrete implementation of the `Shortener` trait.
///
/// This service wraps a `KeyValueStore` and a `CodeHasher` to handle:
/// - URL validation
/// - Short code derivation from the URL bytes
/// - Owner-scoped listing and deletion
///
/// The store is shared, so one backend can serve several services (or be
/// closed by its owner after the server stops).
pub struct ShortenerService<S: ?Sized, H> {
    store: Arc<S>,
    hasher: Arc<H>,
}

impl<S: ?Sized, H> Clone for ShortenerService<S, H> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            hasher: Arc::clone(&self.hasher),
        }
    }
}

impl<S: KeyValueStore + ?Sized, H: CodeHasher> ShortenerService<S, H> {
    pub fn new(store: Arc<S>, hasher: H) -> Self {
        Self {
            store,
            hasher: Arc::new(hasher),
        }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Validates that the URL has a valid format (http(s) scheme and a host).
    fn validate_url(url: &str) -> Result<(), ShortenerError> {
        if url.is_empty() {
            return Err(ShortenerError::InvalidUrl(
                "URL cannot be empty".to_string(),
            ));
        }

        let Some((scheme, rest)) = url.split_once("://") else {
            return Err(ShortenerError::InvalidUrl(format!(
                "URL must have a valid scheme and host: {}",
                url
            )));
        };

        let scheme = scheme.to_lowercase();
        if scheme != "http" && scheme != "https" {
            return Err(ShortenerError::InvalidUrl(format!(
                "URL scheme must be http or https: {}",
                scheme
            )));
        }

        let host = rest
            .split(['/', '?', '#'])
            .next()
            .unwrap_or_default();
        if host.is_empty() || host.chars().any(char::is_whitespace) {
            return Err(ShortenerError::InvalidUrl(format!(
                "URL must have a valid host: {}",
                url
            )));
        }

        Ok(())
    }

    fn derive_code(&self, url: &str) -> ShortCode {
        self.hasher.hash(url.as_bytes())
    }

    async fn store_url(&self, url: &str, owner: &OwnerId) -> Result<Shortened, ShortenerError> {
        let code = self.derive_code(url);

        match self.store.store_if_absent(&code, url, owner).await? {
            StoreOutcome::Created => {
                debug!(code = %code, owner = %owner, "short code created");
                Ok(Shortened::Created(code))
            }
            StoreOutcome::Existing(existing) => {
                if existing.original_url != url {
                    warn!(
                        code = %code,
                        stored = %existing.original_url,
                        requested = %url,
                        "short code collides with a different url"
                    );
                }
                Ok(Shortened::Existing(code))
            }
        }
    }
}

#[async_trait]
impl<S: KeyValueStore + ?Sized, H: CodeHasher> Shortener for ShortenerService<S, H> {
    async fn shorten(
        &self,
        original_url: &str,
        owner: &OwnerId,
    ) -> Result<Shortened, ShortenerError> {
        Self::validate_url(original_url)?;
        self.store_url(original_url, owner).await
    }

    async fn resolve(&self, code: &ShortCode) -> Option<String> {
        match self.store.load(code).await {
            Ok(url) => url,
            Err(e) => {
                warn!(code = %code, error = %e, "failed to resolve short code");
                None
            }
        }
    }

    async fn shorten_batch(
        &self,
        original_urls: &[String],
        owner: &OwnerId,
    ) -> Result<Vec<ShortCode>, ShortenerError> {
        for url in original_urls {
            Self::validate_url(url)?;
        }

        let mut codes = Vec::with_capacity(original_urls.len());
        for url in original_urls {
            codes.push(self.store_url(url, owner).await?.into_code());
        }
        info!(owner = %owner, count = codes.len(), "batch shortened");
        Ok(codes)
    }

    async fn list_owned(&self, owner: &OwnerId) -> Result<Vec<Record>, ShortenerError> {
        let mut records = Vec::new();
        self.store
            .scan_with_owner(owner, &mut |record| {
                records.push(record.clone());
                true
            })
            .await?;
        records.sort_by(|a, b| a.short_code.cmp(&b.short_code));
        Ok(records)
    }

    async fn delete_owned(
        &self,
        owner: &OwnerId,
        codes: &[ShortCode],
    ) -> Result<usize, ShortenerError> {
        if owner.is_anonymous() || codes.is_empty() {
            return Ok(0);
        }

        let requested: HashSet<&ShortCode> = codes.iter().collect();
        let mut owned = Vec::new();
        self.store
            .scan_with_owner(owner, &mut |record| {
                if requested.contains(&record.short_code) {
                    owned.push(record.short_code.clone());
                }
                true
            })
            .await?;

        if owned.is_empty() {
            debug!(owner = %owner, requested = codes.len(), "nothing to delete");
            return Ok(0);
        }

        self.store.delete(&owned).await?;
        info!(owner = %owner, requested = codes.len(), deleted = owned.len(), "urls deleted");
        Ok(owned.len())
    }

    async fn stats(&self) -> Result<Stats, ShortenerError> {
        let mut urls = HashSet::new();
        let mut users = HashSet::new();
        self.store
            .scan(&mut |record| {
                urls.insert(record.original_url.clone());
                users.insert(record.owner_id.clone());
                true
            })
            .await?;

        Ok(Stats {
            urls: urls.len(),
            users: users.len(),
        })
    }

    async fn ping(&self) -> Result<(), ShortenerError> {
        self.store.ping().await.map_err(ShortenerError::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keyhole_core::error::{Result as StorageResult, StorageError};
    use keyhole_core::{ScanFilter, Visitor};
    use keyhole_hasher::FoldHasher;
    use keyhole_storage::MemoryStore;

    type MemoryService = ShortenerService<MemoryStore, FoldHasher>;

    fn test_service() -> MemoryService {
        ShortenerService::new(Arc::new(MemoryStore::new()), FoldHasher::default())
    }

    fn owner(id: &str) -> OwnerId {
        OwnerId::new(id)
    }

    /// A store whose every operation fails.
    struct BrokenStore;

    #[async_trait]
    impl KeyValueStore for BrokenStore {
        async fn get(&self, _code: &ShortCode) -> StorageResult<Option<Record>> {
            Err(StorageError::Unavailable("down".to_string()))
        }

        async fn store_if_absent(
            &self,
            _code: &ShortCode,
            _original_url: &str,
            _owner: &OwnerId,
        ) -> StorageResult<StoreOutcome> {
            Err(StorageError::Unavailable("down".to_string()))
        }

        async fn store(
            &self,
            _code: &ShortCode,
            _url: &str,
            _owner: &OwnerId,
        ) -> StorageResult<()> {
            Err(StorageError::Unavailable("down".to_string()))
        }

        async fn scan_filtered(
            &self,
            _filter: &ScanFilter,
            _visitor: &mut Visitor<'_>,
        ) -> StorageResult<()> {
            Err(StorageError::Unavailable("down".to_string()))
        }

        async fn delete(&self, _codes: &[ShortCode]) -> StorageResult<()> {
            Err(StorageError::Unavailable("down".to_string()))
        }

        async fn ping(&self) -> StorageResult<()> {
            Err(StorageError::Unavailable("down".to_string()))
        }

        async fn close(&self) -> StorageResult<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn shorten_then_resolve() {
        let service = test_service();

        let shortened = service
            .shorten("https://example.com", &owner("alice"))
            .await
            .unwrap();

        assert!(!shortened.already_existed());
        assert_eq!(
            service.resolve(shortened.code()).await.as_deref(),
            Some("https://example.com")
        );
    }

    #[tokio::test]
    async fn shorten_is_idempotent() {
        let service = test_service();

        let first = service
            .shorten("https://example.com", &owner("alice"))
            .await
            .unwrap();
        let second = service
            .shorten("https://example.com", &owner("bob"))
            .await
            .unwrap();

        assert_eq!(first, Shortened::Created(first.code().clone()));
        assert_eq!(second, Shortened::Existing(first.code().clone()));
        assert_eq!(service.store().len(), 1);
    }

    #[tokio::test]
    async fn shorten_with_invalid_url_fails() {
        let service = test_service();

        for url in ["", "not-a-valid-url", "ftp://example.com", "https://", "http:///path"] {
            let err = service.shorten(url, &owner("alice")).await.unwrap_err();
            assert!(matches!(err, ShortenerError::InvalidUrl(_)), "{url}");
        }
        assert!(service.store().is_empty());
    }

    #[tokio::test]
    async fn shorten_accepts_uppercase_scheme() {
        let service = test_service();
        assert!(service
            .shorten("HTTPS://example.com/path?q=1", &owner("alice"))
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn shorten_surfaces_storage_errors() {
        let service = ShortenerService::new(Arc::new(BrokenStore), FoldHasher::default());

        let err = service
            .shorten("https://example.com", &owner("alice"))
            .await
            .unwrap_err();
        assert!(matches!(err, ShortenerError::Storage(_)));
    }

    #[tokio::test]
    async fn resolve_nonexistent_url() {
        let service = test_service();
        assert!(service
            .resolve(&ShortCode::new_unchecked("nonexistent"))
            .await
            .is_none());
    }

    #[tokio::test]
    async fn resolve_degrades_storage_errors_to_none() {
        let service = ShortenerService::new(Arc::new(BrokenStore), FoldHasher::default());
        assert!(service
            .resolve(&ShortCode::new_unchecked("abc123"))
            .await
            .is_none());
    }

    #[tokio::test]
    async fn ping_propagates_storage_errors() {
        let service = ShortenerService::new(Arc::new(BrokenStore), FoldHasher::default());
        assert!(matches!(
            service.ping().await,
            Err(ShortenerError::Storage(StorageError::Unavailable(_)))
        ));

        test_service().ping().await.unwrap();
    }

    #[tokio::test]
    async fn batch_preserves_input_order() {
        let service = test_service();
        let urls = vec![
            "https://example.com/a".to_string(),
            "https://example.org/bb".to_string(),
            "https://example.net/ccc".to_string(),
        ];

        let codes = service.shorten_batch(&urls, &owner("alice")).await.unwrap();

        assert_eq!(codes.len(), 3);
        for (code, url) in codes.iter().zip(&urls) {
            assert_eq!(service.resolve(code).await.as_ref(), Some(url));
        }
    }

    #[tokio::test]
    async fn batch_with_invalid_url_stores_nothing() {
        let service = test_service();
        let urls = vec![
            "https://example.com/a".to_string(),
            "nope".to_string(),
        ];

        let err = service.shorten_batch(&urls, &owner("alice")).await.unwrap_err();

        assert!(matches!(err, ShortenerError::InvalidUrl(_)));
        assert!(service.store().is_empty());
    }

    #[tokio::test]
    async fn batch_reuses_existing_codes() {
        let service = test_service();
        let single = service
            .shorten("https://example.com/a", &owner("alice"))
            .await
            .unwrap();

        let codes = service
            .shorten_batch(&["https://example.com/a".to_string()], &owner("bob"))
            .await
            .unwrap();

        assert_eq!(codes, vec![single.into_code()]);
    }

    #[tokio::test]
    async fn list_owned_returns_only_owner_records() {
        let service = test_service();
        service.shorten("https://example.com/1", &owner("alice")).await.unwrap();
        service.shorten("https://example.com/22", &owner("alice")).await.unwrap();
        service.shorten("https://example.com/333", &owner("bob")).await.unwrap();

        let alice = service.list_owned(&owner("alice")).await.unwrap();
        let bob = service.list_owned(&owner("bob")).await.unwrap();

        assert_eq!(alice.len(), 2);
        assert!(alice.iter().all(|r| r.owner_id == owner("alice")));
        assert!(alice.windows(2).all(|w| w[0].short_code < w[1].short_code));
        assert_eq!(bob.len(), 1);
        assert!(service.list_owned(&owner("carol")).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn delete_owned_hides_records() {
        let service = test_service();
        let code = service
            .shorten("https://example.com", &owner("alice"))
            .await
            .unwrap()
            .into_code();

        let deleted = service
            .delete_owned(&owner("alice"), std::slice::from_ref(&code))
            .await
            .unwrap();

        assert_eq!(deleted, 1);
        assert!(service.resolve(&code).await.is_none());
        assert!(service.list_owned(&owner("alice")).await.unwrap().is_empty());

        // the code stays taken
        let again = service
            .shorten("https://example.com", &owner("alice"))
            .await
            .unwrap();
        assert!(again.already_existed());
    }

    #[tokio::test]
    async fn delete_owned_is_idempotent() {
        let service = test_service();
        let code = service
            .shorten("https://example.com", &owner("alice"))
            .await
            .unwrap()
            .into_code();
        let codes = [code.clone(), code.clone()];

        assert_eq!(service.delete_owned(&owner("alice"), &codes).await.unwrap(), 1);
        assert_eq!(service.delete_owned(&owner("alice"), &codes).await.unwrap(), 0);
        assert!(service.resolve(&code).await.is_none());
    }

    #[tokio::test]
    async fn delete_owned_ignores_foreign_codes() {
        let service = test_service();
        let code = service
            .shorten("https://example.com", &owner("alice"))
            .await
            .unwrap()
            .into_code();
        let unknown = ShortCode::new_unchecked("unknown");

        let deleted = service
            .delete_owned(&owner("mallory"), &[code.clone(), unknown])
            .await
            .unwrap();

        assert_eq!(deleted, 0);
        assert_eq!(
            service.resolve(&code).await.as_deref(),
            Some("https://example.com")
        );
    }

    #[tokio::test]
    async fn anonymous_owner_cannot_delete() {
        let service = test_service();
        let code = service
            .shorten("https://example.com", &OwnerId::anonymous())
            .await
            .unwrap()
            .into_code();

        let deleted = service
            .delete_owned(&OwnerId::anonymous(), std::slice::from_ref(&code))
            .await
            .unwrap();

        assert_eq!(deleted, 0);
        assert!(service.resolve(&code).await.is_some());
    }

    #[tokio::test]
    async fn stats_counts_distinct_urls_and_owners() {
        let store = Arc::new(MemoryStore::new());
        for (code, url, who) in [
            ("code1", "https://a.example", "u1"),
            ("code2", "https://a.example", "u2"),
            ("code3", "https://b.example", "u1"),
        ] {
            store
                .store_if_absent(&ShortCode::new_unchecked(code), url, &owner(who))
                .await
                .unwrap();
        }
        let service = ShortenerService::new(Arc::clone(&store), FoldHasher::default());

        assert_eq!(service.stats().await.unwrap(), Stats { urls: 2, users: 2 });

        store.delete(&[ShortCode::new_unchecked("code3")]).await.unwrap();
        assert_eq!(service.stats().await.unwrap(), Stats { urls: 1, users: 2 });
    }

    #[tokio::test]
    async fn stats_through_shorten_credit_first_owner() {
        let service = test_service();

        service.shorten("https://a.example", &owner("u1")).await.unwrap();
        let repeat = service.shorten("https://a.example", &owner("u2")).await.unwrap();
        service.shorten("https://b.example", &owner("u1")).await.unwrap();

        // The repeated URL maps to u1's record, so u2 owns nothing.
        assert!(repeat.already_existed());
        assert!(service.list_owned(&owner("u2")).await.unwrap().is_empty());
        assert_eq!(service.stats().await.unwrap(), Stats { urls: 2, users: 1 });
    }

    #[tokio::test]
    async fn stats_on_empty_store() {
        assert_eq!(test_service().stats().await.unwrap(), Stats::default());
    }

    #[tokio::test]
    async fn concurrent_shorten_has_single_creator() {
        let service = test_service();
        let mut handles = vec![];
        for i in 0..16 {
            let service = service.clone();
            handles.push(tokio::spawn(async move {
                service
                    .shorten("https://example.com", &owner(&format!("user{i}")))
                    .await
                    .unwrap()
            }));
        }

        let mut created = 0;
        for handle in handles {
            if !handle.await.unwrap().already_existed() {
                created += 1;
            }
        }
        assert_eq!(created, 1);
        assert_eq!(service.store().len(), 1);
    }

    #[tokio::test]
    async fn works_behind_a_trait_object_store() {
        let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        let service: Arc<dyn Shortener> =
            Arc::new(ShortenerService::new(store, FoldHasher::default()));

        let code = service
            .shorten("https://example.com", &owner("alice"))
            .await
            .unwrap()
            .into_code();
        assert!(service.resolve(&code).await.is_some());
    }
}
