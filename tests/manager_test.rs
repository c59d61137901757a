//! Tests for [`CacheManager`]: freshness, reload, single-flight loading and
//! eviction.
//!
//! Time is paused (`start_paused = true`) so freshness and dormancy windows
//! are driven with `tokio::time::advance`.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, OnceLock, Weak};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::future::join_all;
use tokio::time::{Instant, advance, sleep};

use tenant_cache::{
    BoxError, CacheError, CacheKind, CacheManager, CachePolicy, EntryState, Loader, Manageable,
    ManagedLoader, Modifiable, ModifiableLoader, Status,
};

// ============================================================================
// Recording loader
// ============================================================================

/// Loader that records every call and produces `"{key}@{n}"`, where `n`
/// counts loader calls for the whole manager.
#[derive(Default)]
struct Recording {
    loads: AtomicUsize,
    reloads: AtomicUsize,
    fail: AtomicBool,
    delay: Option<Duration>,
    destroyed: Mutex<Vec<String>>,
}

impl Recording {
    fn slow(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::default()
        }
    }

    fn loads(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }

    fn reloads(&self) -> usize {
        self.reloads.load(Ordering::SeqCst)
    }

    fn destroyed(&self) -> Vec<String> {
        self.destroyed.lock().unwrap().clone()
    }

    async fn produce(&self, key: &str) -> Result<String, BoxError> {
        if let Some(delay) = self.delay {
            sleep(delay).await;
        }
        if self.fail.load(Ordering::SeqCst) {
            return Err("backing store unavailable".into());
        }
        let n = self.loads() + self.reloads();
        Ok(format!("{key}@{n}"))
    }
}

#[async_trait]
impl Loader for Recording {
    type Key = String;
    type Value = String;

    async fn load(&self, key: &String) -> Result<String, BoxError> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        self.produce(key).await
    }

    async fn reload(&self, key: &String, _previous: &String) -> Result<String, BoxError> {
        self.reloads.fetch_add(1, Ordering::SeqCst);
        self.produce(key).await
    }

    fn destroy(&self, _key: &String, value: &String) {
        self.destroyed.lock().unwrap().push(value.clone());
    }
}

fn policy() -> CachePolicy {
    CachePolicy::from_millis(100, 500, 50)
}

fn manager(loader: Recording) -> Arc<CacheManager<Recording>> {
    let m = CacheManager::for_kind(CacheKind::Tenant, loader, policy()).unwrap();
    m.initialize().unwrap();
    Arc::new(m)
}

fn key(s: &str) -> String {
    s.to_string()
}

// ============================================================================
// Freshness
// ============================================================================

#[tokio::test(start_paused = true)]
async fn fresh_entry_is_served_and_stale_entry_reloaded() {
    let m = manager(Recording::default());

    assert_eq!(m.get(&key("A")).await.unwrap(), "A@1");

    advance(Duration::from_millis(50)).await;
    assert_eq!(m.get(&key("A")).await.unwrap(), "A@1");
    assert_eq!(m.loader().loads(), 1);
    assert_eq!(m.loader().reloads(), 0);

    advance(Duration::from_millis(100)).await;
    assert_eq!(m.get(&key("A")).await.unwrap(), "A@2");
    assert_eq!(m.loader().reloads(), 1);

    // The replaced value was handed to destroy
    assert_eq!(m.loader().destroyed(), vec!["A@1".to_string()]);
}

#[tokio::test(start_paused = true)]
async fn peek_returns_last_loaded_value_without_loading() {
    let m = manager(Recording::default());

    assert_eq!(m.peek(&key("A")).unwrap(), None);
    let value = m.get(&key("A")).await.unwrap();
    assert_eq!(m.peek(&key("A")).unwrap(), Some(value));
    assert_eq!(m.peek(&key("B")).unwrap(), None);
    assert_eq!(m.loader().loads(), 1);
}

#[tokio::test(start_paused = true)]
async fn peek_does_not_count_as_access() {
    let m = manager(Recording::default());
    m.get(&key("A")).await.unwrap();

    advance(Duration::from_millis(400)).await;
    m.peek(&key("A")).unwrap();
    advance(Duration::from_millis(100)).await;

    assert_eq!(m.evict_dormant(Instant::now()).unwrap(), 1);
}

#[tokio::test(start_paused = true)]
async fn entry_info_reports_age_and_idle_time() {
    let m = manager(Recording::default());
    m.get(&key("A")).await.unwrap();

    advance(Duration::from_millis(30)).await;
    m.get(&key("A")).await.unwrap();
    advance(Duration::from_millis(20)).await;

    let info = m.entry_info(&key("A")).unwrap().unwrap();
    assert_eq!(info.state, EntryState::Loaded);
    assert_eq!(info.age, Duration::from_millis(50));
    assert_eq!(info.idle, Duration::from_millis(20));
    assert!(m.entry_info(&key("missing")).unwrap().is_none());
}

// ============================================================================
// Failures
// ============================================================================

#[tokio::test(start_paused = true)]
async fn load_failure_creates_no_entry_and_is_retried() {
    let m = manager(Recording::default());
    m.loader().fail.store(true, Ordering::SeqCst);

    let err = m.get(&key("A")).await.unwrap_err();
    assert!(matches!(err, CacheError::Load { .. }));
    assert_eq!(err.code(), Some("TENANT_LOAD_ERROR"));
    assert!(err.to_string().contains("backing store unavailable"));
    assert_eq!(m.len().unwrap(), 0);

    m.loader().fail.store(false, Ordering::SeqCst);
    assert_eq!(m.get(&key("A")).await.unwrap(), "A@2");
    assert_eq!(m.loader().loads(), 2);
}

#[tokio::test(start_paused = true)]
async fn reload_failure_is_propagated_and_previous_value_kept() {
    let m = manager(Recording::default());
    m.get(&key("A")).await.unwrap();

    advance(Duration::from_millis(150)).await;
    m.loader().fail.store(true, Ordering::SeqCst);

    let err = m.get(&key("A")).await.unwrap_err();
    assert!(matches!(err, CacheError::Reload { .. }));
    assert_eq!(err.code(), Some("TENANT_LOAD_ERROR"));

    // Old value still cached, but no longer served as fresh
    assert_eq!(m.peek(&key("A")).unwrap(), Some("A@1".to_string()));
    let info = m.entry_info(&key("A")).unwrap().unwrap();
    assert_eq!(info.state, EntryState::Stale);
    assert!(m.loader().destroyed().is_empty());

    // The next access retries the reload
    m.loader().fail.store(false, Ordering::SeqCst);
    assert_eq!(m.get(&key("A")).await.unwrap(), "A@3");
    assert_eq!(m.loader().reloads(), 2);
    assert_eq!(m.loader().destroyed(), vec!["A@1".to_string()]);
}

#[tokio::test(start_paused = true)]
async fn failure_of_one_key_does_not_affect_others() {
    struct PickyLoader;

    #[async_trait]
    impl Loader for PickyLoader {
        type Key = String;
        type Value = String;

        async fn load(&self, key: &String) -> Result<String, BoxError> {
            if key == "bad" {
                return Err("no such tenant".into());
            }
            Ok(key.to_uppercase())
        }
    }

    let m = CacheManager::builder(PickyLoader)
        .name("tenants")
        .build()
        .unwrap();
    m.initialize().unwrap();

    assert!(m.get(&key("bad")).await.is_err());
    assert_eq!(m.get(&key("good")).await.unwrap(), "GOOD");
    assert_eq!(m.keys().unwrap(), vec![key("good")]);
}

// ============================================================================
// Single-flight
// ============================================================================

#[tokio::test(start_paused = true)]
async fn concurrent_cold_gets_share_one_load() {
    let m = manager(Recording::slow(Duration::from_millis(10)));

    let results = join_all((0..8).map(|_| {
        let m = Arc::clone(&m);
        async move { m.get(&key("A")).await }
    }))
    .await;

    assert_eq!(m.loader().loads(), 1);
    for result in results {
        assert_eq!(result.unwrap(), "A@1");
    }
}

#[tokio::test(start_paused = true)]
async fn concurrent_cold_gets_share_one_failure() {
    let m = manager(Recording::slow(Duration::from_millis(10)));
    m.loader().fail.store(true, Ordering::SeqCst);

    let results = join_all((0..8).map(|_| {
        let m = Arc::clone(&m);
        async move { m.get(&key("A")).await }
    }))
    .await;

    assert_eq!(m.loader().loads(), 1);
    for result in results {
        let err = result.unwrap_err();
        assert!(matches!(err, CacheError::Load { .. }));
        assert!(err.to_string().contains("backing store unavailable"));
    }

    // A later call is a new attempt
    m.loader().fail.store(false, Ordering::SeqCst);
    assert!(m.get(&key("A")).await.is_ok());
    assert_eq!(m.loader().loads(), 2);
}

#[tokio::test(start_paused = true)]
async fn concurrent_stale_gets_share_one_reload() {
    let m = manager(Recording::slow(Duration::from_millis(10)));
    assert_eq!(m.get(&key("A")).await.unwrap(), "A@1");
    advance(Duration::from_millis(150)).await;

    let results = join_all((0..8).map(|_| {
        let m = Arc::clone(&m);
        async move { m.get(&key("A")).await }
    }))
    .await;

    assert_eq!(m.loader().loads(), 1);
    assert_eq!(m.loader().reloads(), 1);
    for result in results {
        assert_eq!(result.unwrap(), "A@2");
    }
    assert_eq!(m.loader().destroyed(), vec!["A@1".to_string()]);
}

#[tokio::test(start_paused = true)]
async fn concurrent_stale_gets_share_one_reload_failure() {
    let m = manager(Recording::slow(Duration::from_millis(10)));
    m.get(&key("A")).await.unwrap();
    advance(Duration::from_millis(150)).await;
    m.loader().fail.store(true, Ordering::SeqCst);

    let results = join_all((0..8).map(|_| {
        let m = Arc::clone(&m);
        async move { m.get(&key("A")).await }
    }))
    .await;

    assert_eq!(m.loader().reloads(), 1);
    let errors: Vec<CacheError> = results.into_iter().map(Result::unwrap_err).collect();
    for err in &errors {
        assert!(matches!(err, CacheError::Reload { .. }));
        assert_eq!(err.to_string(), errors[0].to_string());
    }

    // Previous value survives the failed reload
    assert_eq!(m.peek(&key("A")).unwrap(), Some("A@1".to_string()));
    assert!(m.loader().destroyed().is_empty());
}

#[tokio::test(start_paused = true)]
async fn concurrent_gets_of_different_keys_load_independently() {
    let m = manager(Recording::slow(Duration::from_millis(10)));

    let results = join_all(["A", "B", "C"].into_iter().map(|k| {
        let m = Arc::clone(&m);
        async move { m.get(&key(k)).await }
    }))
    .await;

    assert!(results.iter().all(Result::is_ok));
    assert_eq!(m.loader().loads(), 3);
    assert_eq!(m.len().unwrap(), 3);
}

// ============================================================================
// Eviction
// ============================================================================

#[tokio::test(start_paused = true)]
async fn dormant_entries_are_evicted_and_destroyed_once() {
    let m = manager(Recording::default());
    m.get(&key("A")).await.unwrap();
    m.get(&key("B")).await.unwrap();

    // A is read again at t=300 (and reloaded, being stale), B never
    advance(Duration::from_millis(300)).await;
    m.get(&key("A")).await.unwrap();
    assert_eq!(m.loader().destroyed(), vec!["A@1".to_string()]);
    advance(Duration::from_millis(300)).await;

    assert_eq!(m.evict_dormant(Instant::now()).unwrap(), 1);
    assert_eq!(m.peek(&key("B")).unwrap(), None);
    assert_eq!(m.peek(&key("A")).unwrap(), Some("A@3".to_string()));
    assert_eq!(
        m.loader().destroyed(),
        vec!["A@1".to_string(), "B@2".to_string()]
    );

    // Destroy is not repeated for B
    assert_eq!(m.evict_dormant(Instant::now()).unwrap(), 0);
    assert_eq!(m.loader().destroyed().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn evict_all_destroys_every_value() {
    let m = manager(Recording::default());
    for k in ["A", "B", "C"] {
        m.get(&key(k)).await.unwrap();
    }

    assert_eq!(m.evict_all().unwrap(), 3);
    assert!(m.is_empty().unwrap());
    assert_eq!(m.loader().destroyed().len(), 3);

    // Evicted keys load again on next access
    m.get(&key("A")).await.unwrap();
    assert_eq!(m.loader().loads(), 4);
}

#[tokio::test(start_paused = true)]
async fn invalidate_removes_one_key() {
    let m = manager(Recording::default());
    m.get(&key("A")).await.unwrap();
    m.get(&key("B")).await.unwrap();

    assert!(m.invalidate(&key("A")).await.unwrap());
    assert!(!m.invalidate(&key("A")).await.unwrap());
    assert!(!m.invalidate(&key("never")).await.unwrap());

    assert_eq!(m.peek(&key("A")).unwrap(), None);
    assert_eq!(m.keys().unwrap(), vec![key("B")]);
    assert_eq!(m.loader().destroyed(), vec!["A@1".to_string()]);
}

#[tokio::test(start_paused = true)]
async fn evict_all_keeps_result_of_load_in_flight() {
    let m = manager(Recording::slow(Duration::from_millis(10)));

    let pending = tokio::spawn({
        let m = Arc::clone(&m);
        async move { m.get(&key("A")).await }
    });
    // Let the spawned get reach the loader
    while m.loader().loads() == 0 {
        tokio::task::yield_now().await;
    }

    assert_eq!(m.evict_all().unwrap(), 0);
    assert_eq!(pending.await.unwrap().unwrap(), "A@1");
    assert_eq!(m.peek(&key("A")).unwrap(), Some("A@1".to_string()));
}

#[tokio::test(start_paused = true)]
async fn evict_all_removes_value_under_reload() {
    let m = manager(Recording::slow(Duration::from_millis(10)));
    m.get(&key("A")).await.unwrap();
    advance(Duration::from_millis(150)).await;

    let pending = tokio::spawn({
        let m = Arc::clone(&m);
        async move { m.get(&key("A")).await }
    });
    while m.loader().reloads() == 0 {
        tokio::task::yield_now().await;
    }

    assert_eq!(m.evict_all().unwrap(), 1);
    assert_eq!(m.peek(&key("A")).unwrap(), None);
    assert_eq!(m.loader().destroyed(), vec!["A@1".to_string()]);

    // The reload still completes and its value is cached
    assert_eq!(pending.await.unwrap().unwrap(), "A@2");
    assert_eq!(m.peek(&key("A")).unwrap(), Some("A@2".to_string()));
    assert_eq!(m.loader().destroyed(), vec!["A@1".to_string()]);
}

// ============================================================================
// Lifecycle
// ============================================================================

#[tokio::test(start_paused = true)]
async fn uninitialized_manager_rejects_get() {
    let m = CacheManager::builder(Recording::default()).build().unwrap();
    assert_eq!(m.status(), Status::New);

    let err = m.get(&key("A")).await.unwrap_err();
    assert!(err.is_invalid_state());
    assert_eq!(m.loader().loads(), 0);
}

#[tokio::test(start_paused = true)]
async fn destroyed_manager_rejects_every_operation() {
    let m = manager(Recording::default());
    m.get(&key("A")).await.unwrap();
    m.get(&key("B")).await.unwrap();

    m.destroy().unwrap();
    assert_eq!(m.status(), Status::Destroyed);
    assert_eq!(m.loader().destroyed().len(), 2);

    assert!(m.get(&key("A")).await.unwrap_err().is_invalid_state());
    assert!(m.peek(&key("A")).unwrap_err().is_invalid_state());
    assert!(m.len().unwrap_err().is_invalid_state());
    assert!(m.evict_all().unwrap_err().is_invalid_state());
    assert!(m.evict_dormant(Instant::now()).unwrap_err().is_invalid_state());
    assert!(m.invalidate(&key("A")).await.unwrap_err().is_invalid_state());

    let msg = m.get(&key("A")).await.unwrap_err().to_string();
    assert!(msg.contains("tenant"), "{msg}");
    assert!(msg.contains("destroyed"), "{msg}");
}

#[tokio::test(start_paused = true)]
async fn load_finishing_after_destroy_is_not_cached() {
    let m = manager(Recording::slow(Duration::from_millis(10)));

    let pending = tokio::spawn({
        let m = Arc::clone(&m);
        async move { m.get(&key("A")).await }
    });
    while m.loader().loads() == 0 {
        tokio::task::yield_now().await;
    }

    m.destroy().unwrap();
    let err = pending.await.unwrap().unwrap_err();
    assert!(err.is_invalid_state());
    assert_eq!(m.loader().destroyed(), vec!["A@1".to_string()]);
}

/// Loader whose destroy hook shuts down its own manager once armed.
#[derive(Default)]
struct Teardown {
    manager: OnceLock<Weak<CacheManager<Teardown>>>,
    armed: AtomicBool,
    calls: AtomicUsize,
    destroyed: Mutex<Vec<String>>,
}

impl Teardown {
    fn next(&self, key: &str) -> Result<String, BoxError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(format!("{key}@{n}"))
    }
}

#[async_trait]
impl Loader for Teardown {
    type Key = String;
    type Value = String;

    async fn load(&self, key: &String) -> Result<String, BoxError> {
        self.next(key)
    }

    async fn reload(&self, key: &String, _previous: &String) -> Result<String, BoxError> {
        self.next(key)
    }

    fn destroy(&self, _key: &String, value: &String) {
        self.destroyed.lock().unwrap().push(value.clone());
        if self.armed.swap(false, Ordering::SeqCst) {
            if let Some(m) = self.manager.get().and_then(Weak::upgrade) {
                m.destroy().unwrap();
            }
        }
    }
}

#[tokio::test(start_paused = true)]
async fn destroy_while_installing_reload_destroys_new_value() {
    let m = Arc::new(
        CacheManager::for_kind(CacheKind::Tenant, Teardown::default(), policy()).unwrap(),
    );
    m.initialize().unwrap();
    m.loader().manager.set(Arc::downgrade(&m)).unwrap();

    assert_eq!(m.get(&key("A")).await.unwrap(), "A@1");
    advance(Duration::from_millis(150)).await;

    // Destroying A@1 during install of A@2 shuts the manager down
    m.loader().armed.store(true, Ordering::SeqCst);
    let err = m.get(&key("A")).await.unwrap_err();
    assert!(err.is_invalid_state());
    assert_eq!(m.status(), Status::Destroyed);

    let destroyed = m.loader().destroyed.lock().unwrap().clone();
    assert_eq!(destroyed, vec!["A@1".to_string(), "A@2".to_string()]);
}

// ============================================================================
// Capabilities
// ============================================================================

struct Document {
    version: usize,
    modified: AtomicBool,
}

impl Modifiable for Document {
    fn is_modified(&self) -> bool {
        self.modified.load(Ordering::SeqCst)
    }
}

#[derive(Default)]
struct DocumentLoader {
    calls: AtomicUsize,
}

#[async_trait]
impl Loader for DocumentLoader {
    type Key = String;
    type Value = Arc<Document>;

    async fn load(&self, _key: &String) -> Result<Arc<Document>, BoxError> {
        let version = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(Arc::new(Document {
            version,
            modified: AtomicBool::new(false),
        }))
    }
}

#[tokio::test(start_paused = true)]
async fn modified_value_is_reloaded_inside_freshness_window() {
    let m = CacheManager::builder(ModifiableLoader::new(DocumentLoader::default()))
        .kind(CacheKind::Application)
        .policy(policy())
        .build()
        .unwrap();
    m.initialize().unwrap();

    let first = m.get(&key("app")).await.unwrap();
    assert_eq!(first.version, 1);
    assert_eq!(m.get(&key("app")).await.unwrap().version, 1);

    first.modified.store(true, Ordering::SeqCst);
    let second = m.get(&key("app")).await.unwrap();
    assert_eq!(second.version, 2);
    assert_eq!(m.loader().inner().calls.load(Ordering::SeqCst), 2);
}

struct Connection {
    status: Mutex<Status>,
    destroys: AtomicUsize,
}

impl Manageable for Connection {
    fn initialize(&self) -> Result<(), BoxError> {
        *self.status.lock().unwrap() = Status::Initialized;
        Ok(())
    }

    fn destroy(&self) {
        self.destroys.fetch_add(1, Ordering::SeqCst);
        *self.status.lock().unwrap() = Status::Destroyed;
    }

    fn status(&self) -> Status {
        *self.status.lock().unwrap()
    }
}

#[derive(Default)]
struct ConnectionLoader {
    created: Mutex<Vec<Arc<Connection>>>,
}

#[async_trait]
impl Loader for ConnectionLoader {
    type Key = String;
    type Value = Arc<Connection>;

    async fn load(&self, _key: &String) -> Result<Arc<Connection>, BoxError> {
        let conn = Arc::new(Connection {
            status: Mutex::new(Status::New),
            destroys: AtomicUsize::new(0),
        });
        self.created.lock().unwrap().push(Arc::clone(&conn));
        Ok(conn)
    }
}

#[tokio::test(start_paused = true)]
async fn manageable_values_are_initialized_and_destroyed_exactly_once() {
    let m = CacheManager::builder(ManagedLoader::new(ConnectionLoader::default()))
        .kind(CacheKind::Service)
        .policy(policy())
        .build()
        .unwrap();
    m.initialize().unwrap();

    let conn = m.get(&key("svc")).await.unwrap();
    assert_eq!(conn.status(), Status::Initialized);

    // Stale: reloaded, old connection destroyed
    advance(Duration::from_millis(150)).await;
    let replacement = m.get(&key("svc")).await.unwrap();
    assert!(!Arc::ptr_eq(&conn, &replacement));
    assert_eq!(conn.destroys.load(Ordering::SeqCst), 1);
    assert_eq!(conn.status(), Status::Destroyed);

    m.evict_all().unwrap();
    assert_eq!(replacement.destroys.load(Ordering::SeqCst), 1);

    let created = m.loader().inner().created.lock().unwrap().clone();
    assert_eq!(created.len(), 2);
    assert!(created.iter().all(|c| c.destroys.load(Ordering::SeqCst) == 1));
}

#[tokio::test(start_paused = true)]
async fn invalid_manageable_value_is_reloaded() {
    let m = CacheManager::builder(ManagedLoader::new(ConnectionLoader::default()))
        .build()
        .unwrap();
    m.initialize().unwrap();

    let conn = m.get(&key("svc")).await.unwrap();
    // Torn down behind the cache's back
    *conn.status.lock().unwrap() = Status::Destroyed;

    let fresh = m.get(&key("svc")).await.unwrap();
    assert!(!Arc::ptr_eq(&conn, &fresh));
    assert_eq!(fresh.status(), Status::Initialized);
}
