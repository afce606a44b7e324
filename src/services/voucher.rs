//! Voucher store
//!
//! Business logic for the voucher lifecycle:
//! - issuing vouchers from the client form
//! - point lookups for the staff console and QR download
//! - one-time redemption guarded by a conditional update
//! - listing, filtering and statistics over a live in-memory view
//!
//! The in-memory view is owned by the service. `load` fills it at startup,
//! every successful write updates it, `refresh` reloads it from the database
//! (so writes made by other instances show up) and `discard` empties it on
//! shutdown. Subscribers receive a `VoucherEvent` for every change made
//! through this service.

use crate::db::repositories::VoucherRepository;
use crate::models::{
    CreateVoucherInput, RejectionReason, ValidationOutcome, Voucher, VoucherEvent, VoucherFilter,
    VoucherStatistics,
};
use chrono::{DateTime, SubsecRound, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};
use uuid::Uuid;

/// Default capacity of the change-notification channel
const DEFAULT_EVENT_BUFFER: usize = 256;

const MAX_NAME_CHARS: usize = 255;
const MAX_CONTACT_CHARS: usize = 64;

/// Optional leading `+`, then at least 8 digits, spaces, hyphens or parentheses
static CONTACT_PATTERN: Lazy<Result<Regex, regex::Error>> =
    Lazy::new(|| Regex::new(r"^\+?[0-9\s\-()]{8,}$"));

/// Error types for voucher operations
#[derive(Debug, thiserror::Error)]
pub enum VoucherServiceError {
    /// Bad input shape (empty or malformed name, contact or id)
    #[error("Validation error: {0}")]
    ValidationError(String),

    /// No voucher with this id
    #[error("Voucher not found: {0}")]
    NotFound(String),

    /// The voucher was redeemed before; carries its current state
    #[error("Voucher already used: {}", .0.id)]
    AlreadyUsed(Box<Voucher>),

    /// Persistence failure
    #[error("Backend error: {0}")]
    Backend(#[from] anyhow::Error),
}

fn contact_pattern() -> Result<&'static Regex, VoucherServiceError> {
    CONTACT_PATTERN
        .as_ref()
        .map_err(|e| VoucherServiceError::Backend(anyhow::anyhow!("Invalid contact pattern: {}", e)))
}

/// Check a contact string against the phone pattern
pub fn is_valid_contact(contact: &str) -> bool {
    contact_pattern().is_ok_and(|re| re.is_match(contact))
}

/// Trim and validate client form input
pub fn validate_input(input: &CreateVoucherInput) -> Result<(String, String), VoucherServiceError> {
    let name = input.name.trim();
    let contact = input.contact.trim();

    if name.is_empty() || contact.is_empty() {
        return Err(VoucherServiceError::ValidationError(
            "Name and contact are required".to_string(),
        ));
    }
    if name.chars().count() > MAX_NAME_CHARS {
        return Err(VoucherServiceError::ValidationError(format!(
            "Name must be at most {} characters",
            MAX_NAME_CHARS
        )));
    }
    if contact.chars().count() > MAX_CONTACT_CHARS || !contact_pattern()?.is_match(contact) {
        return Err(VoucherServiceError::ValidationError(
            "Contact must be a valid phone number".to_string(),
        ));
    }

    Ok((name.to_string(), contact.to_string()))
}

/// Normalise a scanned or typed voucher id.
///
/// UUIDs in any accepted spelling (upper case, braces, no hyphens) map to the
/// stored lowercase hyphenated form; other text is only trimmed and will
/// simply not match.
pub fn normalize_id(raw: &str) -> Result<String, VoucherServiceError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(VoucherServiceError::ValidationError(
            "Voucher id is required".to_string(),
        ));
    }

    Ok(match Uuid::parse_str(trimmed) {
        Ok(uuid) => uuid.hyphenated().to_string(),
        Err(_) => trimmed.to_string(),
    })
}

/// Voucher store backed by a repository and a live in-memory view
pub struct VoucherService {
    repo: Arc<dyn VoucherRepository>,
    cache: RwLock<Vec<Voucher>>,
    events: broadcast::Sender<VoucherEvent>,
}

impl VoucherService {
    /// Create a voucher service with an empty view. Call `load` before serving.
    pub fn new(repo: Arc<dyn VoucherRepository>) -> Self {
        Self::with_event_buffer(repo, DEFAULT_EVENT_BUFFER)
    }

    /// Create a voucher service with a custom notification buffer
    pub fn with_event_buffer(repo: Arc<dyn VoucherRepository>, event_buffer: usize) -> Self {
        let (events, _) = broadcast::channel(event_buffer.max(1));
        Self {
            repo,
            cache: RwLock::new(Vec::new()),
            events,
        }
    }

    /// Populate the in-memory view from the database.
    ///
    /// The write lock is held across the read: a create or redemption that
    /// commits meanwhile updates the view after the swap.
    pub async fn load(&self) -> Result<usize, VoucherServiceError> {
        let mut cache = self.cache.write().await;
        let mut vouchers = self.repo.list().await?;
        sort_newest_first(&mut vouchers);

        let count = vouchers.len();
        *cache = vouchers;
        Ok(count)
    }

    /// Reload the in-memory view, picking up writes from other instances
    pub async fn refresh(&self) -> Result<usize, VoucherServiceError> {
        let count = self.load().await?;
        tracing::debug!("Voucher cache refreshed: {} vouchers", count);
        Ok(count)
    }

    /// Drop the in-memory view
    pub async fn discard(&self) {
        self.cache.write().await.clear();
    }

    /// Receive a notification for every voucher created or redeemed
    pub fn subscribe(&self) -> broadcast::Receiver<VoucherEvent> {
        self.events.subscribe()
    }

    /// Issue a new voucher
    ///
    /// # Errors
    ///
    /// - `ValidationError` if name or contact is empty after trimming, or the
    ///   contact is not a phone number. Nothing is written in that case.
    /// - `Backend` if the insert fails
    pub async fn create(&self, input: CreateVoucherInput) -> Result<Voucher, VoucherServiceError> {
        let (name, contact) = validate_input(&input)?;
        let voucher = self.repo.create(&Voucher::new(name, contact)).await?;

        self.upsert_cached(voucher.clone()).await;
        self.publish(VoucherEvent::Created(voucher.clone()));
        tracing::info!("Voucher issued: {}", voucher.id);

        Ok(voucher)
    }

    /// Look up a voucher by id
    pub async fn get(&self, id: &str) -> Result<Option<Voucher>, VoucherServiceError> {
        let id = normalize_id(id)?;
        Ok(self.repo.get_by_id(&id).await?)
    }

    /// Look up a voucher by id, treating absence as an error
    pub async fn require(&self, id: &str) -> Result<Voucher, VoucherServiceError> {
        self.get(id)
            .await?
            .ok_or_else(|| VoucherServiceError::NotFound(id.trim().to_string()))
    }

    /// Redeem a voucher
    ///
    /// Unknown and already used vouchers are ordinary outcomes
    /// (`valid = false` with a reason) and leave the store untouched. Only
    /// one of several concurrent calls for the same id can succeed.
    ///
    /// # Errors
    ///
    /// - `ValidationError` for an empty id
    /// - `Backend` if the database cannot be reached
    pub async fn validate(&self, id: &str) -> Result<ValidationOutcome, VoucherServiceError> {
        let id = normalize_id(id)?;

        match self.redeem(&id).await {
            Ok(voucher) => Ok(ValidationOutcome::accepted(voucher)),
            Err(VoucherServiceError::AlreadyUsed(voucher)) => {
                tracing::info!("Voucher rejected ({}): {}", RejectionReason::AlreadyUsed, id);
                Ok(ValidationOutcome::already_used(*voucher))
            }
            Err(VoucherServiceError::NotFound(_)) => {
                tracing::info!("Voucher rejected ({}): {}", RejectionReason::NotFound, id);
                Ok(ValidationOutcome::not_found())
            }
            Err(e) => Err(e),
        }
    }

    /// Perform the unused → used transition for a normalised id.
    ///
    /// The row is read once after the conditional update, whichever way it went.
    async fn redeem(&self, id: &str) -> Result<Voucher, VoucherServiceError> {
        let used_at = Utc::now().trunc_subsecs(6);
        let marked = self.repo.mark_used(id, used_at).await?;

        let voucher = self
            .repo
            .get_by_id(id)
            .await?
            .ok_or_else(|| VoucherServiceError::NotFound(id.to_string()))?;

        if marked {
            self.upsert_cached(voucher.clone()).await;
            self.publish(VoucherEvent::Redeemed(voucher.clone()));
            tracing::info!("Voucher redeemed: {}", id);
            return Ok(voucher);
        }

        if !voucher.is_used {
            return Err(VoucherServiceError::Backend(anyhow::anyhow!(
                "Voucher {} is unused but could not be marked used",
                id
            )));
        }

        // Another call or instance won; keep the view current.
        self.upsert_cached(voucher.clone()).await;
        Err(VoucherServiceError::AlreadyUsed(Box::new(voucher)))
    }

    /// All vouchers, newest first
    pub async fn list(&self) -> Vec<Voucher> {
        self.cache.read().await.clone()
    }

    /// Vouchers matching `filter`, newest first
    pub async fn list_filtered(&self, filter: &VoucherFilter) -> Vec<Voucher> {
        filter.apply(&self.cache.read().await)
    }

    /// Usage statistics as of now
    pub async fn statistics(&self) -> VoucherStatistics {
        self.statistics_at(Utc::now()).await
    }

    /// Usage statistics with the trailing week ending at `now`
    pub async fn statistics_at(&self, now: DateTime<Utc>) -> VoucherStatistics {
        VoucherStatistics::compute(&self.cache.read().await, now)
    }

    async fn upsert_cached(&self, voucher: Voucher) {
        let mut cache = self.cache.write().await;
        if let Some(existing) = cache.iter_mut().find(|v| v.id == voucher.id) {
            *existing = voucher;
            return;
        }
        let idx = cache.partition_point(|v| v.created_at > voucher.created_at);
        cache.insert(idx, voucher);
    }

    fn publish(&self, event: VoucherEvent) {
        // An error only means nobody is listening.
        let _ = self.events.send(event);
    }
}

fn sort_newest_first(vouchers: &mut [Voucher]) {
    vouchers.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.id.cmp(&b.id)));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DatabaseConfig, DatabaseDriver};
    use crate::db::repositories::SqlxVoucherRepository;
    use crate::db::{create_pool, create_test_pool, migrations, DynDatabasePool};
    use crate::models::StatusFilter;
    use async_trait::async_trait;
    use chrono::Duration;
    use proptest::prelude::*;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use tokio::sync::{Barrier, Notify};

    async fn setup_test_service() -> (DynDatabasePool, Arc<VoucherService>) {
        let pool = create_test_pool().await.expect("Failed to create test pool");
        migrations::run_migrations(&pool)
            .await
            .expect("Failed to run migrations");

        let service = VoucherService::new(SqlxVoucherRepository::boxed(pool.clone()));
        service.load().await.expect("Failed to load vouchers");
        (pool, Arc::new(service))
    }

    fn input(name: &str, contact: &str) -> CreateVoucherInput {
        CreateVoucherInput::new(name, contact)
    }

    /// Repository wrapper that counts point lookups and can hold `list`
    /// after it has read the table until released.
    struct InstrumentedRepo {
        inner: Arc<dyn VoucherRepository>,
        lookups: AtomicUsize,
        hold_list: AtomicBool,
        list_held: Notify,
        release_list: Notify,
    }

    impl InstrumentedRepo {
        fn new(inner: Arc<dyn VoucherRepository>) -> Arc<Self> {
            Arc::new(Self {
                inner,
                lookups: AtomicUsize::new(0),
                hold_list: AtomicBool::new(false),
                list_held: Notify::new(),
                release_list: Notify::new(),
            })
        }
    }

    #[async_trait]
    impl VoucherRepository for InstrumentedRepo {
        async fn create(&self, voucher: &Voucher) -> anyhow::Result<Voucher> {
            self.inner.create(voucher).await
        }

        async fn get_by_id(&self, id: &str) -> anyhow::Result<Option<Voucher>> {
            self.lookups.fetch_add(1, Ordering::SeqCst);
            self.inner.get_by_id(id).await
        }

        async fn list(&self) -> anyhow::Result<Vec<Voucher>> {
            let vouchers = self.inner.list().await?;
            if self.hold_list.swap(false, Ordering::SeqCst) {
                self.list_held.notify_one();
                self.release_list.notified().await;
            }
            Ok(vouchers)
        }

        async fn mark_used(&self, id: &str, used_at: DateTime<Utc>) -> anyhow::Result<bool> {
            self.inner.mark_used(id, used_at).await
        }
    }

    async fn setup_instrumented_service(
    ) -> (DynDatabasePool, Arc<InstrumentedRepo>, Arc<VoucherService>) {
        let pool = create_test_pool().await.expect("Failed to create test pool");
        migrations::run_migrations(&pool)
            .await
            .expect("Failed to run migrations");

        let repo = InstrumentedRepo::new(SqlxVoucherRepository::boxed(pool.clone()));
        let service = Arc::new(VoucherService::new(repo.clone()));
        (pool, repo, service)
    }

    // ========================================================================
    // Creation
    // ========================================================================

    #[tokio::test]
    async fn test_create_voucher() {
        let (_pool, service) = setup_test_service().await;

        let voucher = service
            .create(input("  Ana Kovač ", " +385 91 234 5678 "))
            .await
            .expect("Failed to create voucher");

        assert_eq!(voucher.name, "Ana Kovač");
        assert_eq!(voucher.contact, "+385 91 234 5678");
        assert!(!voucher.is_used);
        assert!(voucher.used_at.is_none());

        let stored = service.get(&voucher.id).await.unwrap().expect("Voucher not stored");
        assert_eq!(stored, voucher);
        assert_eq!(service.list().await, vec![voucher]);
    }

    #[tokio::test]
    async fn test_create_generates_unique_ids() {
        let (_pool, service) = setup_test_service().await;

        let mut ids = HashSet::new();
        for _ in 0..20 {
            let voucher = service.create(input("Same Person", "0911234567")).await.unwrap();
            assert!(ids.insert(voucher.id));
        }
        assert_eq!(service.list().await.len(), 20);
    }

    #[tokio::test]
    async fn test_create_rejects_bad_input_without_writing() {
        let (pool, service) = setup_test_service().await;

        for (name, contact) in [
            ("", "0911234567"),
            ("   ", "0911234567"),
            ("Ana", ""),
            ("Ana", "12345"),
            ("Ana", "call me maybe"),
            ("Ana", "++385911234567"),
        ] {
            let result = service.create(input(name, contact)).await;
            assert!(
                matches!(result, Err(VoucherServiceError::ValidationError(_))),
                "expected validation error for ({:?}, {:?})",
                name,
                contact
            );
        }

        let repo = SqlxVoucherRepository::new(pool);
        assert!(repo.list().await.unwrap().is_empty());
        assert!(service.list().await.is_empty());
    }

    // ========================================================================
    // Redemption
    // ========================================================================

    #[tokio::test]
    async fn test_validate_twice() {
        let (_pool, service) = setup_test_service().await;
        let voucher = service.create(input("Ana", "0911234567")).await.unwrap();

        let first = service.validate(&voucher.id).await.unwrap();
        assert!(first.valid);
        assert!(first.reason.is_none());
        let redeemed = first.voucher.expect("Accepted outcome carries the voucher");
        assert!(redeemed.is_used);
        let used_at = redeemed.used_at.expect("used_at must be set");
        assert!(used_at >= redeemed.created_at);

        let second = service.validate(&voucher.id).await.unwrap();
        assert!(!second.valid);
        assert_eq!(second.reason, Some(RejectionReason::AlreadyUsed));
        assert_eq!(second.voucher.as_ref().and_then(|v| v.used_at), Some(used_at));

        let stored = service.get(&voucher.id).await.unwrap().unwrap();
        assert_eq!(stored.used_at, Some(used_at));
    }

    #[tokio::test]
    async fn test_validate_unknown_id() {
        let (_pool, service) = setup_test_service().await;
        service.create(input("Ana", "0911234567")).await.unwrap();
        let before = service.list().await;

        let outcome = service.validate("nonexistent").await.unwrap();
        assert!(!outcome.valid);
        assert_eq!(outcome.reason, Some(RejectionReason::NotFound));
        assert!(outcome.voucher.is_none());

        assert_eq!(service.list().await, before);
    }

    #[tokio::test]
    async fn test_validate_empty_id_is_validation_error() {
        let (_pool, service) = setup_test_service().await;
        let result = service.validate("   ").await;
        assert!(matches!(result, Err(VoucherServiceError::ValidationError(_))));
    }

    #[tokio::test]
    async fn test_validate_accepts_uppercase_scan() {
        let (_pool, service) = setup_test_service().await;
        let voucher = service.create(input("Ana", "0911234567")).await.unwrap();

        let scanned = format!("  {}\n", voucher.id.to_uppercase());
        let outcome = service.validate(&scanned).await.unwrap();
        assert!(outcome.valid);
    }

    #[tokio::test]
    async fn test_concurrent_validation_succeeds_once() {
        let (_pool, service) = setup_test_service().await;
        let voucher = service.create(input("Ana", "0911234567")).await.unwrap();

        let a = {
            let service = service.clone();
            let id = voucher.id.clone();
            tokio::spawn(async move { service.validate(&id).await })
        };
        let b = {
            let service = service.clone();
            let id = voucher.id.clone();
            tokio::spawn(async move { service.validate(&id).await })
        };

        let a = a.await.unwrap().unwrap();
        let b = b.await.unwrap().unwrap();

        let winners: Vec<_> = [&a, &b].into_iter().filter(|o| o.valid).collect();
        assert_eq!(winners.len(), 1);
        let loser = if a.valid { &b } else { &a };
        assert_eq!(loser.reason, Some(RejectionReason::AlreadyUsed));

        let winner_used_at = winners[0].voucher.as_ref().unwrap().used_at;
        let stored = service.get(&voucher.id).await.unwrap().unwrap();
        assert!(stored.is_used);
        assert_eq!(stored.used_at, winner_used_at);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_parallel_validation_on_file_database() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let config = DatabaseConfig {
            driver: DatabaseDriver::Sqlite,
            url: temp_dir.path().join("nalu.db").to_string_lossy().to_string(),
        };
        let pool = create_pool(&config).await.expect("Failed to create file pool");
        migrations::run_migrations(&pool)
            .await
            .expect("Failed to run migrations");

        let service = Arc::new(VoucherService::new(SqlxVoucherRepository::boxed(pool.clone())));
        let voucher = service.create(input("Ana", "0911234567")).await.unwrap();

        let start = Arc::new(Barrier::new(8));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let service = service.clone();
                let start = start.clone();
                let id = voucher.id.clone();
                tokio::spawn(async move {
                    start.wait().await;
                    service.validate(&id).await
                })
            })
            .collect();

        let mut accepted = 0;
        let mut rejected = 0;
        for handle in handles {
            let outcome = handle.await.unwrap().unwrap();
            if outcome.valid {
                accepted += 1;
            } else {
                assert_eq!(outcome.reason, Some(RejectionReason::AlreadyUsed));
                rejected += 1;
            }
        }
        assert_eq!((accepted, rejected), (1, 7));

        let stored = service.get(&voucher.id).await.unwrap().unwrap();
        assert!(stored.is_used);
        assert_eq!(service.list().await, vec![stored]);

        pool.close().await;
    }

    #[tokio::test]
    async fn test_rejected_validation_reads_voucher_once() {
        let (_pool, repo, service) = setup_instrumented_service().await;
        let voucher = service.create(input("Ana", "0911234567")).await.unwrap();
        service.validate(&voucher.id).await.unwrap();

        repo.lookups.store(0, Ordering::SeqCst);
        let outcome = service.validate(&voucher.id).await.unwrap();

        assert_eq!(outcome.reason, Some(RejectionReason::AlreadyUsed));
        assert!(outcome.voucher.is_some_and(|v| v.is_used));
        assert_eq!(repo.lookups.load(Ordering::SeqCst), 1);
    }

    // ========================================================================
    // Live view
    // ========================================================================

    #[tokio::test]
    async fn test_create_during_refresh_stays_visible() {
        let (pool, repo, service) = setup_instrumented_service().await;
        repo.hold_list.store(true, Ordering::SeqCst);

        let refresh = {
            let service = service.clone();
            tokio::spawn(async move { service.refresh().await })
        };
        repo.list_held.notified().await;

        let create = {
            let service = service.clone();
            tokio::spawn(async move { service.create(input("Ana", "0911234567")).await })
        };

        // Let the insert commit while the refresh still holds its stale read.
        let direct = SqlxVoucherRepository::new(pool);
        while direct.list().await.unwrap().is_empty() {
            tokio::task::yield_now().await;
        }
        repo.release_list.notify_one();

        assert_eq!(refresh.await.unwrap().unwrap(), 0);
        let voucher = create.await.unwrap().unwrap();

        assert_eq!(service.list().await, vec![voucher]);
        assert_eq!(service.statistics().await.total, 1);
    }

    #[tokio::test]
    async fn test_redemption_during_refresh_stays_visible() {
        let (pool, repo, service) = setup_instrumented_service().await;
        let voucher = service.create(input("Ana", "0911234567")).await.unwrap();
        repo.hold_list.store(true, Ordering::SeqCst);

        let refresh = {
            let service = service.clone();
            tokio::spawn(async move { service.refresh().await })
        };
        repo.list_held.notified().await;

        let validate = {
            let service = service.clone();
            let id = voucher.id.clone();
            tokio::spawn(async move { service.validate(&id).await })
        };

        let direct = SqlxVoucherRepository::new(pool);
        while !direct
            .get_by_id(&voucher.id)
            .await
            .unwrap()
            .is_some_and(|v| v.is_used)
        {
            tokio::task::yield_now().await;
        }
        repo.release_list.notify_one();

        assert_eq!(refresh.await.unwrap().unwrap(), 1);
        assert!(validate.await.unwrap().unwrap().valid);

        let cached = service.list().await;
        assert_eq!(cached.len(), 1);
        assert!(cached[0].is_used);
        assert_eq!(service.statistics().await.used, 1);
    }

    // ========================================================================
    // Listing, filtering, statistics
    // ========================================================================

    #[tokio::test]
    async fn test_statistics_after_one_redemption() {
        let (_pool, service) = setup_test_service().await;
        let first = service.create(input("Ana", "0911234567")).await.unwrap();
        service.create(input("Ivo", "0921234567")).await.unwrap();
        service.create(input("Eva", "0931234567")).await.unwrap();

        service.validate(&first.id).await.unwrap();

        let stats = service.statistics().await;
        assert_eq!(stats.total, 3);
        assert_eq!(stats.used, 1);
        assert_eq!(stats.unused, 2);
        assert_eq!(stats.last_week_generated, 3);
        assert_eq!(stats.last_week_used, 1);

        let next_month = service.statistics_at(Utc::now() + Duration::days(30)).await;
        assert_eq!(next_month.total, 3);
        assert_eq!(next_month.last_week_generated, 0);
        assert_eq!(next_month.last_week_used, 0);
    }

    #[tokio::test]
    async fn test_list_filtered() {
        let (_pool, service) = setup_test_service().await;
        let ana = service.create(input("Ana", "0911234567")).await.unwrap();
        service.create(input("Ivo", "0921234567")).await.unwrap();
        service.validate(&ana.id).await.unwrap();

        let nothing = VoucherFilter::new(Some("zzz-no-match".to_string()), StatusFilter::All);
        assert!(service.list_filtered(&nothing).await.is_empty());

        let used = service
            .list_filtered(&VoucherFilter::new(None, StatusFilter::Used))
            .await;
        assert_eq!(used.len(), 1);
        assert!(used.iter().all(|v| v.is_used));
        assert_eq!(used[0].id, ana.id);

        let by_contact = VoucherFilter::new(Some("092".to_string()), StatusFilter::Unused);
        let found = service.list_filtered(&by_contact).await;
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].name, "Ivo");
    }

    #[tokio::test]
    async fn test_refresh_picks_up_external_writes() {
        let (pool, service) = setup_test_service().await;

        // A second instance sharing the same table
        let other = VoucherService::new(SqlxVoucherRepository::boxed(pool.clone()));
        let voucher = other.create(input("Ana", "0911234567")).await.unwrap();

        assert!(service.list().await.is_empty());
        assert_eq!(service.refresh().await.unwrap(), 1);
        assert_eq!(service.list().await[0].id, voucher.id);

        other.validate(&voucher.id).await.unwrap();
        let outcome = service.validate(&voucher.id).await.unwrap();
        assert_eq!(outcome.reason, Some(RejectionReason::AlreadyUsed));
        assert!(service.list().await[0].is_used);
    }

    #[tokio::test]
    async fn test_discard_empties_view() {
        let (_pool, service) = setup_test_service().await;
        service.create(input("Ana", "0911234567")).await.unwrap();

        service.discard().await;
        assert!(service.list().await.is_empty());

        assert_eq!(service.load().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_subscribers_receive_events() {
        let (_pool, service) = setup_test_service().await;
        let mut events = service.subscribe();

        let voucher = service.create(input("Ana", "0911234567")).await.unwrap();
        service.validate(&voucher.id).await.unwrap();
        service.validate(&voucher.id).await.unwrap();

        let created = events.recv().await.unwrap();
        assert_eq!(created, VoucherEvent::Created(voucher.clone()));

        let redeemed = events.recv().await.unwrap();
        assert_eq!(redeemed.name(), "redeemed");
        assert!(redeemed.voucher().is_used);

        // The rejected second attempt publishes nothing.
        assert!(events.try_recv().is_err());
    }

    #[test]
    fn test_normalize_id() {
        let id = "3F2504E0-4F89-41D3-9A0C-0305E82C3301";
        assert_eq!(normalize_id(id).unwrap(), id.to_lowercase());
        assert_eq!(
            normalize_id("3f2504e04f8941d39a0c0305e82c3301").unwrap(),
            "3f2504e0-4f89-41d3-9a0c-0305e82c3301"
        );
        assert_eq!(normalize_id(" nonexistent ").unwrap(), "nonexistent");
        assert!(normalize_id("").is_err());
    }

    // ========================================================================
    // Input validation properties
    // ========================================================================

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn property_phone_like_contacts_accepted(
            plus in proptest::bool::ANY,
            body in "[0-9 ()-]{8,20}",
            name in "[A-Za-z][A-Za-z ]{0,30}",
        ) {
            let contact = format!("{}{}", if plus { "+" } else { "" }, body);
            let trimmed = contact.trim();
            prop_assume!(trimmed.trim_start_matches('+').chars().count() >= 8);

            let result = validate_input(&CreateVoucherInput::new(name.clone(), contact.clone()));
            let (stored_name, stored_contact) = result.expect("phone-like contact must be accepted");
            prop_assert_eq!(stored_name, name.trim());
            prop_assert_eq!(stored_contact, trimmed);
        }

        #[test]
        fn property_contacts_with_letters_rejected(
            prefix in "[0-9]{4,10}",
            letter in "[a-zA-Z]",
            suffix in "[0-9]{4,10}",
        ) {
            let contact = format!("{}{}{}", prefix, letter, suffix);
            prop_assert!(!is_valid_contact(&contact));
        }
    }
}
