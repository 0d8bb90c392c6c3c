use std::sync::Arc;
use std::time::Instant;

use anyhow::Context;

use crate::core::dispatcher::{AttackStats, Dispatcher, WorkerContext};
use crate::core::executor::AttemptExecutor;
use crate::core::retry::RetryTracker;
use crate::core::throttle::{self, ThrottleRef};
use crate::core::tracker::{filter_unseen, SessionStore};
use crate::core::Attempt;
use crate::http::HttpClient;
use crate::{AttackConfig, SinkRef};

/// Credential attack runner
///
/// The engine:
/// 1. Builds the shared HTTP client and the throttle selected by the config
/// 2. Wires executor, retry budget, stores and sink into a `Dispatcher`
/// 3. Streams the pending pairs through the primary pool
/// 4. Shuts the pools down in order and flushes both stores
pub struct AttackEngine {
    config: Arc<AttackConfig>,
    client: Arc<HttpClient>,
    throttle: ThrottleRef,
    store: Arc<SessionStore>,
    sink: SinkRef,
}

impl AttackEngine {
    pub fn new(config: AttackConfig, store: SessionStore, sink: SinkRef) -> anyhow::Result<Self> {
        let client = Arc::new(HttpClient::from_config(&config)?);
        let throttle = throttle::from_config(&config, Arc::clone(&client));

        Ok(Self {
            config: Arc::new(config),
            client,
            throttle,
            store: Arc::new(store),
            sink,
        })
    }

    /// Replaces the throttle chosen from the config.
    pub fn with_throttle(mut self, throttle: ThrottleRef) -> Self {
        self.throttle = throttle;
        self
    }

    pub fn throttle(&self) -> ThrottleRef {
        Arc::clone(&self.throttle)
    }

    pub fn run(self, pending: Vec<Attempt>) -> anyhow::Result<Arc<AttackStats>> {
        let started = Instant::now();
        let total = pending.len();

        let executor = AttemptExecutor::new(Arc::clone(&self.client), Arc::clone(&self.config))?;
        let mut dispatcher = Dispatcher::new(
            WorkerContext {
                executor,
                throttle: Arc::clone(&self.throttle),
                retries: RetryTracker::new(self.config.retry_limit),
                store: Arc::clone(&self.store),
                sink: Arc::clone(&self.sink),
                stats: Arc::new(AttackStats::default()),
            },
            self.config.queue_capacity,
        );

        self.sink.on_log(
            "info",
            &format!(
                "Starting attack on {} with {} worker(s): {} pair(s) pending",
                self.config.url, self.config.threads, total
            ),
        );

        dispatcher.start_workers(self.config.threads)?;
        dispatcher.start_retry_workers(self.config.retry_threads)?;
        dispatcher.distribute(pending);
        let stats = dispatcher.finish();

        self.store
            .close()
            .with_context(|| format!("failed to flush state in {}", self.store.dir().display()))?;

        self.sink.on_log(
            "info",
            &format!(
                "Finished in {:.1}s: {} attempted, {} found, {} error(s), {} retried, {} abandoned",
                started.elapsed().as_secs_f64(),
                stats.attempted(),
                stats.found(),
                stats.errors(),
                stats.retries(),
                stats.abandoned()
            ),
        );

        Ok(stats)
    }
}

/// Opens the target's state and returns the pairs not attempted yet.
pub fn prepare_pending(
    config: &AttackConfig,
    users: &[String],
    passwords: &[String],
) -> anyhow::Result<(SessionStore, Vec<Attempt>)> {
    let dir = SessionStore::dir_for(config)?;
    let store = SessionStore::open(dir, users, passwords)?;
    let pending = filter_unseen(&store.attempts, users, passwords);
    Ok((store, pending))
}
