//! Keyed session pool with adaptive background maintenance.
//!
//! Sessions are bucketed by credential pool key and reused most recently
//! used first. All bookkeeping lives under one mutex; session creation and
//! termination happen outside it, since both can block for seconds. A
//! single background thread, spawned lazily and at most one at a time,
//! performs maintenance: every pass tops buckets up toward the warm
//! minimum, and a less frequent full pass expires stale sessions and trims
//! oversized buckets.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;
use std::time::Instant;

use psbridge_core::Credentials;
use psbridge_shell::{Session, SessionBuilder, ShellError};

use crate::clock::{Clock, SystemClock};
use crate::config::PoolConfig;

/// Creates logged-in sessions on demand.
///
/// The seam for tests; production uses [`SessionBuilder`].
pub trait SessionFactory: Send + Sync + 'static {
    fn create(&self, credentials: &Credentials, now: Instant) -> Result<Session, ShellError>;
}

impl SessionFactory for SessionBuilder {
    fn create(&self, credentials: &Credentials, now: Instant) -> Result<Session, ShellError> {
        self.connect(credentials, now)
    }
}

/// Sessions for one credential set, ordered oldest-first.
///
/// Release stamps are monotonic, so pushing a released session to the end
/// keeps the list sorted; the most recently used session is the last one.
struct Bucket {
    credentials: Credentials,
    sessions: Vec<Session>,
}

struct PoolInner {
    buckets: HashMap<String, Bucket>,
    last_maintenance: Instant,
    last_full_maintenance: Instant,
    worker: Option<JoinHandle<()>>,
}

struct Shared<F, C> {
    factory: F,
    clock: C,
    config: PoolConfig,
    inner: Mutex<PoolInner>,
}

/// Cheap to clone; all clones share the same pool state.
pub struct SessionPool<F: SessionFactory, C: Clock = SystemClock> {
    shared: Arc<Shared<F, C>>,
}

impl<F: SessionFactory, C: Clock> Clone for SessionPool<F, C> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<F: SessionFactory> SessionPool<F> {
    pub fn new(config: PoolConfig, factory: F) -> Self {
        Self::with_clock(config, factory, SystemClock)
    }
}

impl<F: SessionFactory, C: Clock> SessionPool<F, C> {
    pub fn with_clock(config: PoolConfig, factory: F, clock: C) -> Self {
        let now = clock.now();
        Self {
            shared: Arc::new(Shared {
                factory,
                clock,
                config,
                inner: Mutex::new(PoolInner {
                    buckets: HashMap::new(),
                    last_maintenance: now,
                    last_full_maintenance: now,
                    worker: None,
                }),
            }),
        }
    }

    pub fn config(&self) -> &PoolConfig {
        &self.shared.config
    }

    /// Check a session out, reusing the most recently used fresh session
    /// for this credential set or creating a new one.
    pub fn acquire(&self, credentials: &Credentials) -> Result<Session, ShellError> {
        let key = credentials.pool_key();
        let now = self.shared.clock.now();

        let reused = {
            let mut inner = self.locked();
            inner.buckets.get_mut(&key).and_then(|bucket| {
                // Stale sessions are skipped, not removed; the next full
                // maintenance pass terminates them.
                bucket
                    .sessions
                    .iter()
                    .rposition(|session| self.is_fresh(session, now))
                    .map(|ix| bucket.sessions.remove(ix))
            })
        };

        let session = match reused {
            Some(session) => {
                // The key embeds credential values, so it stays out of logs.
                tracing::debug!("reusing pooled session");
                session
            }
            // Created outside the lock; this can take seconds.
            None => self.shared.factory.create(credentials, now)?,
        };
        self.maintenance();
        Ok(session)
    }

    /// Check a session back in. Failed sessions are terminated instead of
    /// pooled.
    pub fn release(&self, mut session: Session) {
        if session.is_failed() {
            tracing::debug!("terminating failed session instead of pooling it");
            session.terminate();
        } else {
            session.touch(self.shared.clock.now());
            let key = session.credentials().pool_key();
            let mut inner = self.locked();
            let bucket = inner.buckets.entry(key).or_insert_with(|| Bucket {
                credentials: session.credentials().clone(),
                sessions: Vec::new(),
            });
            bucket.sessions.push(session);
        }
        self.maintenance();
    }

    /// Total pooled sessions across all credential sets.
    pub fn size(&self) -> usize {
        self.locked()
            .buckets
            .values()
            .map(|bucket| bucket.sessions.len())
            .sum()
    }

    /// Pooled sessions for one credential set.
    pub fn size_for(&self, credentials: &Credentials) -> usize {
        self.locked()
            .buckets
            .get(&credentials.pool_key())
            .map_or(0, |bucket| bucket.sessions.len())
    }

    /// Trigger a background maintenance pass if one is due.
    ///
    /// At most one worker runs at a time; a finished worker is joined
    /// lazily on the next trigger. The fast throttle gates every pass.
    pub fn maintenance(&self) {
        let now = self.shared.clock.now();
        let mut inner = self.locked();

        if inner.worker.as_ref().is_some_and(JoinHandle::is_finished) {
            if let Some(worker) = inner.worker.take() {
                let _ = worker.join();
            }
        }
        if inner.worker.is_none()
            && now.saturating_duration_since(inner.last_maintenance)
                > self.shared.config.fast_throttle()
        {
            // The worker blocks on the pool lock until this guard drops,
            // so the check and the spawn are atomic.
            let pool = self.clone();
            inner.worker = Some(std::thread::spawn(move || pool.maintenance_pass()));
        }
    }

    /// Drain and terminate everything. Joins the maintenance worker first;
    /// meant for shutdown, not concurrent use.
    pub fn clear(&self) {
        let worker = self.locked().worker.take();
        if let Some(worker) = worker {
            let _ = worker.join();
        }

        let mut terminate: Vec<Session> = Vec::new();
        {
            let mut inner = self.locked();
            for bucket in inner.buckets.values_mut() {
                terminate.append(&mut bucket.sessions);
            }
            inner.buckets.clear();
        }
        let count = terminate.len();
        for mut session in terminate {
            session.terminate();
        }
        if count > 0 {
            tracing::debug!(count, "cleared session pool");
        }
    }

    /// One maintenance pass: a full pass (expiry plus trimming) when the
    /// slow throttle allows, then a top-up toward the warm minimum.
    fn maintenance_pass(&self) {
        tracing::debug!("maintenance pass started");
        let now = self.shared.clock.now();
        let full = {
            let inner = self.locked();
            now.saturating_duration_since(inner.last_full_maintenance)
                > self.shared.config.slow_throttle()
        };
        if full {
            self.expire_sessions(now);
            self.trim_buckets();
            self.locked().last_full_maintenance = self.shared.clock.now();
        }
        self.grow_buckets();
        self.locked().last_maintenance = self.shared.clock.now();
        tracing::debug!(size = self.size(), full, "maintenance pass complete");
    }

    fn is_fresh(&self, session: &Session, now: Instant) -> bool {
        !session.is_failed()
            && session.age(now) < self.shared.config.max_lifetime()
            && session.idle(now) < self.shared.config.max_idle()
            && session.use_count() < self.shared.config.max_use_count
    }

    /// Remove and terminate sessions past their idle, lifetime, or use
    /// limits.
    fn expire_sessions(&self, now: Instant) {
        let mut expired: Vec<Session> = Vec::new();
        {
            let mut inner = self.locked();
            for bucket in inner.buckets.values_mut() {
                let mut kept = Vec::with_capacity(bucket.sessions.len());
                for session in bucket.sessions.drain(..) {
                    if self.is_fresh(&session, now) {
                        kept.push(session);
                    } else {
                        expired.push(session);
                    }
                }
                bucket.sessions = kept;
            }
        }
        let count = expired.len();
        for mut session in expired {
            session.terminate();
        }
        if count > 0 {
            tracing::debug!(count, "expired stale sessions");
        }
    }

    /// Trim each bucket down to the warm minimum, dropping the least
    /// recently used sessions first.
    fn trim_buckets(&self) {
        let mut surplus: Vec<Session> = Vec::new();
        {
            let mut inner = self.locked();
            for bucket in inner.buckets.values_mut() {
                let len = bucket.sessions.len();
                let min_warm = self.shared.config.min_warm;
                if len > min_warm {
                    surplus.extend(bucket.sessions.drain(..len - min_warm));
                }
            }
        }
        let count = surplus.len();
        for mut session in surplus {
            session.terminate();
        }
        if count > 0 {
            tracing::debug!(count, "trimmed surplus sessions");
        }
    }

    /// Create one session per bucket below the warm minimum. One per pass
    /// keeps growth gradual; repeated passes converge on the minimum.
    fn grow_buckets(&self) {
        let starved: Vec<Credentials> = {
            let inner = self.locked();
            inner
                .buckets
                .values()
                .filter(|bucket| bucket.sessions.len() < self.shared.config.min_warm)
                .map(|bucket| bucket.credentials.clone())
                .collect()
        };
        for credentials in starved {
            let now = self.shared.clock.now();
            match self.shared.factory.create(&credentials, now) {
                Ok(session) => {
                    let key = credentials.pool_key();
                    let mut inner = self.locked();
                    if let Some(bucket) = inner.buckets.get_mut(&key) {
                        bucket.sessions.push(session);
                        tracing::debug!("warmed up a session");
                    }
                }
                Err(err) => {
                    tracing::warn!("session warm-up failed: {err}");
                }
            }
        }
    }

    /// Poisoning only happens if a panic hit while the lock was held; the
    /// bookkeeping stays structurally valid, so keep going.
    fn locked(&self) -> MutexGuard<'_, PoolInner> {
        self.shared
            .inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;

    use psbridge_shell::transport::Capture;
    use psbridge_shell::{CommandOutput, CommandTransport, OutputLayout, TransportError};

    use super::*;

    #[derive(Clone)]
    struct TestClock(Arc<Mutex<Instant>>);

    impl TestClock {
        fn start() -> Self {
            Self(Arc::new(Mutex::new(Instant::now())))
        }

        fn advance(&self, duration: Duration) {
            let mut now = self.0.lock().expect("clock lock");
            *now += duration;
        }
    }

    impl Clock for TestClock {
        fn now(&self) -> Instant {
            *self.0.lock().expect("clock lock")
        }
    }

    struct StubTransport {
        /// Creation ordinal, echoed by `execute` so tests can tell
        /// sessions apart.
        id: usize,
        terminations: Arc<AtomicUsize>,
        fail_next: AtomicBool,
    }

    impl CommandTransport for StubTransport {
        fn execute(&mut self, _command: &str, _render: &str) -> Result<Capture, TransportError> {
            if self.fail_next.swap(false, Ordering::SeqCst) {
                return Err(TransportError::StreamClosed);
            }
            Ok(Capture {
                text: self.id.to_string(),
                success: true,
            })
        }

        fn terminate(&mut self) {
            self.terminations.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[derive(Default)]
    struct StubFactory {
        creations: AtomicUsize,
        terminations: Arc<AtomicUsize>,
        fail_session_immediately: AtomicBool,
    }

    impl SessionFactory for StubFactory {
        fn create(&self, credentials: &Credentials, now: Instant) -> Result<Session, ShellError> {
            let id = self.creations.fetch_add(1, Ordering::SeqCst);
            Ok(Session::new(
                credentials.clone(),
                Box::new(StubTransport {
                    id,
                    terminations: self.terminations.clone(),
                    fail_next: AtomicBool::new(
                        self.fail_session_immediately.load(Ordering::SeqCst),
                    ),
                }),
                OutputLayout::Text.strategy(),
                now,
            ))
        }
    }

    fn pool_with(config: PoolConfig) -> (SessionPool<StubFactory, TestClock>, TestClock) {
        let clock = TestClock::start();
        let pool = SessionPool::with_clock(config, StubFactory::default(), clock.clone());
        (pool, clock)
    }

    fn creds(user: &str) -> Credentials {
        Credentials::new()
            .with("UserName", user)
            .with("Password", "x")
    }

    fn creations(pool: &SessionPool<StubFactory, TestClock>) -> usize {
        pool.shared.factory.creations.load(Ordering::SeqCst)
    }

    fn terminations(pool: &SessionPool<StubFactory, TestClock>) -> usize {
        pool.shared.factory.terminations.load(Ordering::SeqCst)
    }

    #[test]
    fn acquire_creates_then_reuses() {
        let (pool, _clock) = pool_with(PoolConfig::default());
        let creds = creds("admin");

        let session = pool.acquire(&creds).expect("acquire");
        assert_eq!(creations(&pool), 1);
        pool.release(session);
        assert_eq!(pool.size(), 1);

        let _session = pool.acquire(&creds).expect("acquire again");
        assert_eq!(creations(&pool), 1);
        assert_eq!(pool.size(), 0);
    }

    #[test]
    fn most_recently_used_is_reused_first() {
        let (pool, clock) = pool_with(PoolConfig::default());
        let creds = creds("admin");

        let older = pool.acquire(&creds).expect("acquire");
        clock.advance(Duration::from_secs(1));
        let newer = pool.acquire(&creds).expect("acquire");

        pool.release(older);
        clock.advance(Duration::from_secs(1));
        pool.release(newer);

        let now = clock.now();
        let reused = pool.acquire(&creds).expect("acquire");
        // The younger session was released last, so it comes back first.
        assert_eq!(reused.age(now), Duration::from_secs(1));
    }

    #[test]
    fn buckets_are_keyed_by_credentials() {
        let (pool, _clock) = pool_with(PoolConfig::default());
        let admin = creds("admin");
        let other = creds("other");

        let session = pool.acquire(&admin).expect("acquire");
        pool.release(session);

        let _session = pool.acquire(&other).expect("acquire other");
        assert_eq!(creations(&pool), 2);
        assert_eq!(pool.size_for(&admin), 1);
        assert_eq!(pool.size_for(&other), 0);
    }

    #[test]
    fn stale_sessions_are_skipped_on_acquire() {
        let config = PoolConfig {
            max_idle_secs: 10,
            // Keep background maintenance out of the creation count.
            fast_throttle_secs: 3600,
            ..PoolConfig::default()
        };
        let (pool, clock) = pool_with(config);
        let creds = creds("admin");

        let session = pool.acquire(&creds).expect("acquire");
        pool.release(session);
        clock.advance(Duration::from_secs(11));

        let _session = pool.acquire(&creds).expect("acquire");
        assert_eq!(creations(&pool), 2);
    }

    #[test]
    fn worn_out_sessions_are_skipped_on_acquire() {
        let config = PoolConfig {
            max_use_count: 2,
            // Keep maintenance quiet during the churn below.
            fast_throttle_secs: 3600,
            ..PoolConfig::default()
        };
        let (pool, _clock) = pool_with(config);
        let creds = creds("admin");

        for _ in 0..2 {
            let session = pool.acquire(&creds).expect("acquire");
            pool.release(session);
        }
        assert_eq!(creations(&pool), 1);

        // Two uses hit the cap; the next acquire must create.
        let _session = pool.acquire(&creds).expect("acquire");
        assert_eq!(creations(&pool), 2);
    }

    #[test]
    fn failed_sessions_are_terminated_on_release() {
        let (pool, _clock) = pool_with(PoolConfig::default());
        pool.shared
            .factory
            .fail_session_immediately
            .store(true, Ordering::SeqCst);
        let creds = creds("admin");

        let mut session = pool.acquire(&creds).expect("acquire");
        let err = session.execute("Get-Vm").expect_err("transport failure");
        assert!(err.is_fatal());

        pool.release(session);
        assert_eq!(pool.size(), 0);
        assert_eq!(terminations(&pool), 1);
    }

    #[test]
    fn pass_tops_up_to_warm_minimum() {
        let (pool, _clock) = pool_with(PoolConfig::default());
        let creds = creds("admin");

        let session = pool.acquire(&creds).expect("acquire");
        pool.release(session);
        assert_eq!(pool.size_for(&creds), 1);

        // One session per bucket per pass.
        pool.maintenance_pass();
        assert_eq!(pool.size_for(&creds), 2);
        pool.maintenance_pass();
        assert_eq!(pool.size_for(&creds), 2);
        assert_eq!(creations(&pool), 3);
    }

    #[test]
    fn full_pass_expires_idle_sessions() {
        let config = PoolConfig {
            max_idle_secs: 10,
            slow_throttle_secs: 0,
            ..PoolConfig::default()
        };
        let (pool, clock) = pool_with(config);
        let creds = creds("admin");

        let session = pool.acquire(&creds).expect("acquire");
        pool.release(session);
        clock.advance(Duration::from_secs(11));

        pool.maintenance_pass();
        assert_eq!(terminations(&pool), 1);
        // The expired session is gone and one fresh warm-up took its place.
        assert_eq!(pool.size_for(&creds), 1);
    }

    #[test]
    fn full_pass_trims_surplus_sessions() {
        let config = PoolConfig {
            slow_throttle_secs: 0,
            fast_throttle_secs: 3600,
            ..PoolConfig::default()
        };
        let (pool, clock) = pool_with(config);
        let creds = creds("admin");

        let mut out = Vec::new();
        for _ in 0..4 {
            out.push(pool.acquire(&creds).expect("acquire"));
        }
        for session in out {
            clock.advance(Duration::from_secs(1));
            pool.release(session);
        }
        assert_eq!(pool.size_for(&creds), 4);

        pool.maintenance_pass();
        assert_eq!(pool.size_for(&creds), 2);
        assert_eq!(terminations(&pool), 2);

        // The survivors are the most recently used ones.
        let now = clock.now();
        let survivor = pool.acquire(&creds).expect("acquire");
        assert_eq!(survivor.idle(now), Duration::from_secs(0));
    }

    #[test]
    fn maintenance_is_throttled() {
        let (pool, clock) = pool_with(PoolConfig::default());
        let creds = creds("admin");

        let session = pool.acquire(&creds).expect("acquire");
        pool.release(session);

        // Within the fast throttle nothing may be spawned.
        pool.maintenance();
        assert!(pool.locked().worker.is_none());

        clock.advance(Duration::from_secs(6));
        pool.maintenance();
        for _ in 0..200 {
            if pool.size_for(&creds) == 2 {
                break;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(pool.size_for(&creds), 2);
    }

    #[test]
    fn concurrent_acquires_never_share_a_session() {
        let (pool, _clock) = pool_with(PoolConfig::default());
        let creds = creds("admin");
        // Transport ids of every session currently checked out somewhere.
        let held: Arc<Mutex<HashSet<String>>> = Arc::new(Mutex::new(HashSet::new()));

        let workers: Vec<_> = (0..8)
            .map(|_| {
                let pool = pool.clone();
                let creds = creds.clone();
                let held = Arc::clone(&held);
                std::thread::spawn(move || {
                    for _ in 0..50 {
                        let mut session = pool.acquire(&creds).expect("acquire");
                        let id = match session.execute("Get-Id").expect("execute") {
                            CommandOutput::Text(id) => id,
                            other => panic!("expected the transport id, got {other:?}"),
                        };
                        {
                            let mut held = held.lock().expect("held lock");
                            assert!(held.insert(id.clone()), "session {id} held twice");
                        }
                        std::thread::yield_now();
                        held.lock().expect("held lock").remove(&id);
                        pool.release(session);
                    }
                })
            })
            .collect();
        for worker in workers {
            worker.join().expect("worker thread");
        }
    }

    #[test]
    fn clear_terminates_everything() {
        let (pool, clock) = pool_with(PoolConfig::default());
        let admin = creds("admin");
        let other = creds("other");

        let a = pool.acquire(&admin).expect("acquire");
        let b = pool.acquire(&other).expect("acquire");
        pool.release(a);
        pool.release(b);
        clock.advance(Duration::from_secs(6));
        pool.maintenance();

        pool.clear();
        assert_eq!(pool.size(), 0);
        assert_eq!(terminations(&pool), creations(&pool));
    }
}
