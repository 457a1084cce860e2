//! Lookup Pipeline Tests
//!
//! Drives `LookupOrchestrator` through every tier: cache, store, worker
//! pool and inline fallback. Upstream pages come from in-process fetchers or
//! a wiremock server, so nothing leaves the machine.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::NaiveDate;
use flight_backend::module::cache::{
    CacheLookup, CacheWrite, DisabledCache, FlightCache, InMemoryCache, cache_record,
    cached_record,
};
use flight_backend::module::flight::fetcher::FetchError;
use flight_backend::module::flight::task_queue::{DispatchError, TaskHandle};
use flight_backend::module::flight::{
    DisabledQueue, Fetcher, FlightResolver, FlightStatsExtractor, HttpFetcher, LookupError,
    LookupOrchestrator, LookupSource, ResolutionOutcome, ResolverSettings, ResolverWorkerPool,
    RetryPolicy, TaskQueue,
};
use flight_backend::module::store::{
    ApiLogEntry, FlightStore, InMemoryFlightStore, SqliteFlightStore, StoreError,
};
use flight_common::{FlightQuery, FlightQueryKey, FlightRecord, PLACEHOLDER};
use reqwest::header::HeaderMap;
use tokio::sync::oneshot;
use uuid::Uuid;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const AA100_PAGE: &str = r#"
    <html><body>
      <div class="FlightNumberContainer">AA 100</div>
      <div class="TextHelper CPamx">JFK</div>
      <div class="TextHelper CPamx">LAX</div>
      <div class="TextHelper bcmzUJ">Scheduled</div>
      <div class="TGBValue">B12</div>
    </body></html>
"#;

const EMPTY_PAGE: &str = "<html><body><p>Flight not found</p></body></html>";

// ============================================================================
// Test doubles
// ============================================================================

/// Serves one fixed page and counts calls
struct CountingFetcher {
    page: &'static str,
    calls: AtomicUsize,
}

impl CountingFetcher {
    fn new(page: &'static str) -> Arc<Self> {
        Arc::new(Self {
            page,
            calls: AtomicUsize::new(0),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Fetcher for CountingFetcher {
    async fn fetch(&self, _url: &str, _headers: &HeaderMap) -> Result<String, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.page.to_string())
    }
}

/// Store wrapper that counts reads and writes
#[derive(Default)]
struct CountingStore {
    inner: InMemoryFlightStore,
    finds: AtomicUsize,
    creates: AtomicUsize,
}

impl CountingStore {
    fn touched(&self) -> usize {
        self.finds.load(Ordering::SeqCst) + self.creates.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl FlightStore for CountingStore {
    async fn find(&self, key: &FlightQueryKey) -> Result<Option<FlightRecord>, StoreError> {
        self.finds.fetch_add(1, Ordering::SeqCst);
        self.inner.find(key).await
    }

    async fn create(&self, record: &FlightRecord) -> Result<(), StoreError> {
        self.creates.fetch_add(1, Ordering::SeqCst);
        self.inner.create(record).await
    }

    async fn count(&self) -> Result<usize, StoreError> {
        self.inner.count().await
    }

    async fn log_api_call(&self, entry: &ApiLogEntry) -> Result<(), StoreError> {
        self.inner.log_api_call(entry).await
    }

    fn backend_name(&self) -> &'static str {
        "Counting"
    }
}

/// Store whose writes always fail with a database error
#[derive(Default)]
struct ReadOnlyStore {
    inner: InMemoryFlightStore,
}

#[async_trait]
impl FlightStore for ReadOnlyStore {
    async fn find(&self, key: &FlightQueryKey) -> Result<Option<FlightRecord>, StoreError> {
        self.inner.find(key).await
    }

    async fn create(&self, _record: &FlightRecord) -> Result<(), StoreError> {
        Err(StoreError::Database("attempt to write a readonly database".to_string()))
    }

    async fn count(&self) -> Result<usize, StoreError> {
        self.inner.count().await
    }

    async fn log_api_call(&self, entry: &ApiLogEntry) -> Result<(), StoreError> {
        self.inner.log_api_call(entry).await
    }

    fn backend_name(&self) -> &'static str {
        "ReadOnly"
    }
}

/// Cache wrapper that counts every access
#[derive(Default)]
struct CountingCache {
    inner: InMemoryCache,
    accesses: AtomicUsize,
}

#[async_trait]
impl FlightCache for CountingCache {
    async fn try_get(&self, key: &str) -> CacheLookup {
        self.accesses.fetch_add(1, Ordering::SeqCst);
        self.inner.try_get(key).await
    }

    async fn try_set(&self, key: &str, value: &str, ttl: Duration) -> CacheWrite {
        self.accesses.fetch_add(1, Ordering::SeqCst);
        self.inner.try_set(key, value, ttl).await
    }

    fn backend_name(&self) -> &'static str {
        "Counting"
    }
}

/// Accepts tasks and never answers them
#[derive(Default)]
struct StalledQueue {
    submitted: AtomicUsize,
    pending: Mutex<Vec<oneshot::Sender<ResolutionOutcome>>>,
}

impl TaskQueue for StalledQueue {
    fn submit(&self, _query: FlightQuery) -> Result<TaskHandle, DispatchError> {
        self.submitted.fetch_add(1, Ordering::SeqCst);
        let (reply, result) = oneshot::channel();
        self.pending
            .lock()
            .map_err(|e| DispatchError::Unavailable(e.to_string()))?
            .push(reply);
        Ok(TaskHandle::new(Uuid::new_v4(), result))
    }

    fn backend_name(&self) -> &'static str {
        "stalled"
    }
}

// ============================================================================
// Helpers
// ============================================================================

fn settings(base_url: &str) -> ResolverSettings {
    ResolverSettings {
        base_url: base_url.to_string(),
        user_agent: "flight-backend-tests".to_string(),
        cache_ttl: Duration::from_secs(3600),
    }
}

fn resolver(
    fetcher: Arc<dyn Fetcher>,
    store: Arc<dyn FlightStore>,
    cache: Arc<dyn FlightCache>,
    base_url: &str,
) -> Arc<FlightResolver> {
    Arc::new(FlightResolver::new(
        fetcher,
        Arc::new(FlightStatsExtractor::new()),
        store,
        cache,
        settings(base_url),
    ))
}

fn orchestrator(
    store: Arc<dyn FlightStore>,
    cache: Arc<dyn FlightCache>,
    resolver: Arc<FlightResolver>,
    queue: Arc<dyn TaskQueue>,
    task_timeout: Duration,
) -> LookupOrchestrator {
    LookupOrchestrator::new(cache, store, resolver, queue, task_timeout, Duration::from_secs(3600))
}

fn aa100() -> FlightQuery {
    FlightQuery::new("AA", "100", "2025-05-26")
}

fn aa100_key() -> FlightQueryKey {
    FlightQueryKey::parse("AA", "100", "2025-05-26").unwrap()
}

fn stored_aa100() -> FlightRecord {
    FlightRecord {
        flight_id: Uuid::new_v4(),
        airline_code: "AA".to_string(),
        flight_number: "100".to_string(),
        departure_date: NaiveDate::from_ymd_opt(2025, 5, 26).unwrap(),
        departure_airport: "JFK".to_string(),
        arrival_airport: "LAX".to_string(),
        departure_time: "08:00 AM".to_string(),
        arrival_time: "11:30 AM".to_string(),
        status: "Landed".to_string(),
        gate: Some("B12".to_string()),
    }
}

// ============================================================================
// Tests
// ============================================================================

#[tokio::test]
async fn test_invalid_date_touches_no_tier() {
    let store = Arc::new(CountingStore::default());
    let cache = Arc::new(CountingCache::default());
    let fetcher = CountingFetcher::new(AA100_PAGE);
    let queue = Arc::new(StalledQueue::default());
    let lookup = orchestrator(
        store.clone(),
        cache.clone(),
        resolver(fetcher.clone(), store.clone(), cache.clone(), "http://tracker.test"),
        queue.clone(),
        Duration::from_secs(1),
    );

    for date in [
        "2025/05/26",
        "26-05-2025",
        "2025-02-30",
        "",
        "25-05-26",
        " 2025-05-26",
        "+2025-05-26",
    ] {
        let err = lookup
            .lookup(&FlightQuery::new("AA", "100", date))
            .await
            .unwrap_err();
        assert!(matches!(err, LookupError::InvalidInput(_)), "{date:?} gave {err:?}");
    }

    assert_eq!(store.touched(), 0);
    assert_eq!(cache.accesses.load(Ordering::SeqCst), 0);
    assert_eq!(queue.submitted.load(Ordering::SeqCst), 0);
    assert_eq!(fetcher.calls(), 0);
}

#[tokio::test]
async fn test_cache_hit_short_circuits() {
    let store = Arc::new(CountingStore::default());
    let cache = Arc::new(InMemoryCache::new());
    let fetcher = CountingFetcher::new(AA100_PAGE);
    let lookup = orchestrator(
        store.clone(),
        cache.clone(),
        resolver(fetcher.clone(), store.clone(), cache.clone(), "http://tracker.test"),
        Arc::new(DisabledQueue),
        Duration::from_secs(1),
    );

    let record = stored_aa100();
    cache_record(&*cache, &record, Duration::from_secs(60)).await;

    let (found, source) = lookup.lookup_with_source(&aa100()).await.unwrap();
    assert_eq!(source, LookupSource::Cache);
    assert_eq!(found, record);
    assert_eq!(store.touched(), 0);
    assert_eq!(fetcher.calls(), 0);
}

#[tokio::test]
async fn test_store_hit_writes_through_to_cache() {
    let store = Arc::new(InMemoryFlightStore::new());
    let cache = Arc::new(InMemoryCache::new());
    let fetcher = CountingFetcher::new(AA100_PAGE);
    let lookup = orchestrator(
        store.clone(),
        cache.clone(),
        resolver(fetcher.clone(), store.clone(), cache.clone(), "http://tracker.test"),
        Arc::new(DisabledQueue),
        Duration::from_secs(1),
    );

    let record = stored_aa100();
    store.create(&record).await.unwrap();

    let (found, source) = lookup.lookup_with_source(&aa100()).await.unwrap();
    assert_eq!(source, LookupSource::Store);
    assert_eq!(found, record);
    assert_eq!(cached_record(&*cache, &aa100_key()).await, Some(record));
    assert_eq!(fetcher.calls(), 0);
}

#[tokio::test]
async fn test_placeholder_page_is_not_found_and_not_persisted() {
    let store = Arc::new(InMemoryFlightStore::new());
    let cache = Arc::new(InMemoryCache::new());
    let pool = Arc::new(ResolverWorkerPool::start(
        resolver(
            CountingFetcher::new(EMPTY_PAGE),
            store.clone(),
            cache.clone(),
            "http://tracker.test",
        ),
        2,
        8,
    ));
    let lookup = orchestrator(
        store.clone(),
        cache.clone(),
        resolver(
            CountingFetcher::new(EMPTY_PAGE),
            store.clone(),
            cache.clone(),
            "http://tracker.test",
        ),
        pool.clone(),
        Duration::from_secs(5),
    );

    let err = lookup.lookup(&aa100()).await.unwrap_err();
    match &err {
        LookupError::NotFound(reason) => {
            assert!(reason.contains("AA100 on 2025-05-26"), "{reason}")
        }
        other => panic!("expected NotFound, got {other:?}"),
    }
    assert!(err.to_string().starts_with("Flight data retrieval failed: "));

    assert_eq!(store.count().await.unwrap(), 0);
    assert!(cache.is_empty());
    pool.shutdown().await;
}

#[tokio::test]
async fn test_disabled_cache_falls_through_to_store() {
    let store = Arc::new(InMemoryFlightStore::new());
    let cache = Arc::new(DisabledCache);
    let fetcher = CountingFetcher::new(AA100_PAGE);
    let lookup = orchestrator(
        store.clone(),
        cache.clone(),
        resolver(fetcher.clone(), store.clone(), cache.clone(), "http://tracker.test"),
        Arc::new(DisabledQueue),
        Duration::from_secs(1),
    );

    let (first, source) = lookup.lookup_with_source(&aa100()).await.unwrap();
    assert_eq!(source, LookupSource::Inline);
    assert_eq!(first.status, "Scheduled");

    let (second, source) = lookup.lookup_with_source(&aa100()).await.unwrap();
    assert_eq!(source, LookupSource::Store);
    assert_eq!(second, first);
    assert_eq!(fetcher.calls(), 1);
    assert_eq!(store.count().await.unwrap(), 1);
}

#[tokio::test]
async fn test_store_write_failure_ends_in_not_found() {
    let store = Arc::new(ReadOnlyStore::default());
    let cache = Arc::new(InMemoryCache::new());
    let shared = resolver(
        CountingFetcher::new(AA100_PAGE),
        store.clone(),
        cache.clone(),
        "http://tracker.test",
    );

    match shared.resolve(&aa100_key()).await {
        ResolutionOutcome::TransientError(reason) => {
            assert!(reason.contains("Failed to store flight data"), "{reason}")
        }
        other => panic!("expected TransientError, got {other:?}"),
    }
    assert!(cache.is_empty());

    let lookup = orchestrator(
        store.clone(),
        cache.clone(),
        shared,
        Arc::new(DisabledQueue),
        Duration::from_secs(1),
    );
    let err = lookup.lookup(&aa100()).await.unwrap_err();
    assert!(matches!(err, LookupError::NotFound(_)), "got {err:?}");
    assert!(cache.is_empty());
    assert_eq!(store.count().await.unwrap(), 0);
}

#[tokio::test]
async fn test_repeated_lookups_keep_one_record() {
    let store = Arc::new(SqliteFlightStore::open_in_memory().unwrap());
    let cache = Arc::new(InMemoryCache::new());
    let fetcher = CountingFetcher::new(AA100_PAGE);
    let lookup = orchestrator(
        store.clone(),
        cache.clone(),
        resolver(fetcher.clone(), store.clone(), cache.clone(), "http://tracker.test"),
        Arc::new(DisabledQueue),
        Duration::from_secs(1),
    );

    let first = lookup.lookup(&aa100()).await.unwrap();
    let second = lookup.lookup(&aa100()).await.unwrap();
    let third = lookup.lookup(&aa100()).await.unwrap();

    assert_eq!(first, second);
    assert_eq!(second, third);
    assert_eq!(store.count().await.unwrap(), 1);
    assert_eq!(fetcher.calls(), 1);
}

#[tokio::test]
async fn test_concurrent_lookups_share_the_first_record() {
    let store = Arc::new(InMemoryFlightStore::new());
    let cache = Arc::new(InMemoryCache::new());
    let lookup = Arc::new(orchestrator(
        store.clone(),
        cache.clone(),
        resolver(
            CountingFetcher::new(AA100_PAGE),
            store.clone(),
            cache.clone(),
            "http://tracker.test",
        ),
        Arc::new(DisabledQueue),
        Duration::from_secs(1),
    ));

    let lookups = (0..8).map(|_| {
        let lookup = lookup.clone();
        tokio::spawn(async move { lookup.lookup(&aa100()).await })
    });
    let records: Vec<FlightRecord> = futures::future::join_all(lookups)
        .await
        .into_iter()
        .map(|joined| joined.unwrap().unwrap())
        .collect();

    let stored = store.find(&aa100_key()).await.unwrap().unwrap();
    assert!(records.iter().all(|r| r.flight_id == stored.flight_id));
    assert_eq!(store.count().await.unwrap(), 1);
}

#[tokio::test]
async fn test_task_timeout_falls_back_inline() {
    let store = Arc::new(InMemoryFlightStore::new());
    let cache = Arc::new(InMemoryCache::new());
    let fetcher = CountingFetcher::new(AA100_PAGE);
    let queue = Arc::new(StalledQueue::default());
    let lookup = orchestrator(
        store.clone(),
        cache.clone(),
        resolver(fetcher.clone(), store.clone(), cache.clone(), "http://tracker.test"),
        queue.clone(),
        Duration::from_millis(50),
    );

    let started = Instant::now();
    let (record, source) = lookup.lookup_with_source(&aa100()).await.unwrap();

    assert_eq!(source, LookupSource::Inline);
    assert_eq!(record.status, "Scheduled");
    assert_eq!(queue.submitted.load(Ordering::SeqCst), 1);
    assert_eq!(fetcher.calls(), 1);
    assert!(started.elapsed() < Duration::from_secs(2));
}

#[tokio::test]
async fn test_aa100_end_to_end_then_cache_hit() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v2/flight-tracker/AA/100"))
        .and(query_param("year", "2025"))
        .and(query_param("month", "05"))
        .and(query_param("date", "26"))
        .respond_with(ResponseTemplate::new(200).set_body_string(AA100_PAGE))
        .expect(1)
        .mount(&server)
        .await;

    let base_url = format!("{}/v2/flight-tracker", server.uri());
    let fetcher = Arc::new(
        HttpFetcher::new(
            Duration::from_secs(5),
            RetryPolicy {
                max_attempts: 3,
                delay: Duration::from_millis(10),
            },
        )
        .unwrap(),
    );
    let store = Arc::new(SqliteFlightStore::open_in_memory().unwrap());
    let cache = Arc::new(InMemoryCache::new());
    let shared = resolver(fetcher, store.clone(), cache.clone(), &base_url);
    let pool = Arc::new(ResolverWorkerPool::start(shared.clone(), 2, 8));
    let lookup = orchestrator(
        store.clone(),
        cache.clone(),
        shared,
        pool.clone(),
        Duration::from_secs(10),
    );

    let (first, source) = lookup.lookup_with_source(&aa100()).await.unwrap();
    assert_eq!(source, LookupSource::Task);
    assert_eq!(first.departure_airport, "JFK");
    assert_eq!(first.arrival_airport, "LAX");
    assert_eq!(first.status, "Scheduled");
    assert_eq!(first.gate.as_deref(), Some("B12"));
    assert_eq!(first.departure_time, PLACEHOLDER);
    assert!(!first.flight_id.is_nil());

    let (second, source) = lookup.lookup_with_source(&aa100()).await.unwrap();
    assert_eq!(source, LookupSource::Cache);
    assert!(second.same_flight_data(&first));

    pool.shutdown().await;
}

#[tokio::test]
async fn test_exhausted_retries_end_in_not_found() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let fetcher = Arc::new(
        HttpFetcher::new(
            Duration::from_secs(5),
            RetryPolicy {
                max_attempts: 3,
                delay: Duration::from_millis(10),
            },
        )
        .unwrap(),
    );
    let store = Arc::new(InMemoryFlightStore::new());
    let cache = Arc::new(InMemoryCache::new());
    let shared = resolver(fetcher, store.clone(), cache.clone(), &server.uri());
    let pool = Arc::new(ResolverWorkerPool::start(shared.clone(), 1, 4));
    let lookup = orchestrator(
        store.clone(),
        cache.clone(),
        shared,
        pool.clone(),
        Duration::from_secs(10),
    );

    let err = lookup.lookup(&aa100()).await.unwrap_err();
    match err {
        LookupError::NotFound(reason) => {
            assert!(reason.contains("Failed to fetch flight data"), "{reason}")
        }
        other => panic!("expected NotFound, got {other:?}"),
    }

    // three attempts on the worker, three more inline
    assert_eq!(server.received_requests().await.unwrap().len(), 6);
    assert_eq!(store.count().await.unwrap(), 0);
    pool.shutdown().await;
}
