//! Reconciles a ranked list of wanted URLs against in-flight preloads.

use bridge_traits::http::HttpClient;
use bridge_traits::network::{NetworkMonitor, NetworkQuality};
use core_async::runtime::Handle;
use core_async::sync::mpsc::UnboundedSender;
use core_runtime::events::PreloadEvent;
use core_runtime::logging::redact_url;
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

use super::pool::WorkerPool;
use super::task::{LiveTasks, PreloadContext, PreloadTask};
use crate::cache::SpanStore;
use crate::config::CacheConfig;

/// Why a reconcile did nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    ShutDown,
    /// No span store is attached (no storage root configured).
    NoStorage,
    EmptyRequest,
    /// Disconnected, indeterminate, or the monitor failed.
    Offline,
    /// Metered or expensive network and metered preloading is off.
    MeteredNetwork,
}

/// Result of one [`PreloadScheduler::reconcile`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    Skipped(SkipReason),
    Reconciled {
        /// New tasks submitted to the pool.
        admitted: usize,
        /// URLs already fully cached; each got a synthetic success.
        already_cached: usize,
        /// Live tasks canceled because their URL was no longer wanted.
        pruned: usize,
        /// New tasks the pool refused.
        rejected: usize,
    },
}

impl ReconcileOutcome {
    pub fn admitted(&self) -> usize {
        match self {
            ReconcileOutcome::Reconciled { admitted, .. } => *admitted,
            ReconcileOutcome::Skipped(_) => 0,
        }
    }

    pub fn skip_reason(&self) -> Option<SkipReason> {
        match self {
            ReconcileOutcome::Skipped(reason) => Some(*reason),
            ReconcileOutcome::Reconciled { .. } => None,
        }
    }
}

/// Parallelism cap after adjusting for link quality.
pub fn effective_parallelism(max_parallel: usize, quality: NetworkQuality) -> usize {
    match quality {
        NetworkQuality::Poor => (max_parallel / 2).max(1),
        NetworkQuality::Good | NetworkQuality::Unknown => max_parallel.max(1),
    }
}

/// Owns the live preload set and the worker pool.
///
/// Bound to the runtime behind the [`Handle`] it is built with; every pool
/// worker and timeout runs there.
pub struct PreloadScheduler {
    handle: Handle,
    config: RwLock<Arc<CacheConfig>>,
    store: RwLock<Option<Arc<dyn SpanStore>>>,
    http: Arc<dyn HttpClient>,
    network: Arc<dyn NetworkMonitor>,
    events: UnboundedSender<PreloadEvent>,
    pool: RwLock<Arc<WorkerPool>>,
    live: LiveTasks,
    shut_down: AtomicBool,
}

impl PreloadScheduler {
    pub fn new(
        handle: Handle,
        config: Arc<CacheConfig>,
        http: Arc<dyn HttpClient>,
        network: Arc<dyn NetworkMonitor>,
        events: UnboundedSender<PreloadEvent>,
    ) -> Self {
        let pool = Arc::new(WorkerPool::from_config(handle.clone(), &config));
        Self {
            handle,
            config: RwLock::new(config),
            store: RwLock::new(None),
            http,
            network,
            events,
            pool: RwLock::new(pool),
            live: Arc::new(Mutex::new(HashMap::new())),
            shut_down: AtomicBool::new(false),
        }
    }

    /// Current configuration snapshot.
    pub fn config(&self) -> Arc<CacheConfig> {
        Arc::clone(&self.config.read())
    }

    /// Sets the store preloads write into. Live tasks are canceled since
    /// they target the previous store.
    pub fn attach_store(&self, store: Option<Arc<dyn SpanStore>>) {
        self.cancel_all();
        *self.store.write() = store;
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::Acquire)
    }

    /// URLs with a task in flight, sorted.
    pub fn live_urls(&self) -> Vec<String> {
        let mut urls: Vec<String> = self.live.lock().keys().cloned().collect();
        urls.sort();
        urls
    }

    /// Brings the live set in line with `urls`, most wanted first.
    ///
    /// Tasks for URLs not in the list are canceled. Fully cached URLs get a
    /// synthetic success event. New tasks are admitted in input order until
    /// the live set reaches the effective parallelism.
    #[instrument(skip_all, fields(requested = urls.len()))]
    pub async fn reconcile<S: AsRef<str>>(&self, urls: &[S]) -> ReconcileOutcome {
        if self.is_shut_down() {
            debug!("Scheduler shut down, ignoring reconcile");
            return ReconcileOutcome::Skipped(SkipReason::ShutDown);
        }
        let attached = self.store.read().clone();
        let Some(store) = attached else {
            debug!("No span store attached, ignoring reconcile");
            return ReconcileOutcome::Skipped(SkipReason::NoStorage);
        };
        if urls.is_empty() {
            debug!("Empty preload request");
            return ReconcileOutcome::Skipped(SkipReason::EmptyRequest);
        }

        let info = match self.network.get_network_info().await {
            Ok(info) => info,
            Err(e) => {
                warn!(error = %e, "Network status unavailable, canceling preloads");
                self.cancel_all();
                return ReconcileOutcome::Skipped(SkipReason::Offline);
            }
        };
        if !info.is_connected() {
            let canceled = self.cancel_all();
            debug!(status = ?info.status, canceled, "Offline, canceling preloads");
            return ReconcileOutcome::Skipped(SkipReason::Offline);
        }

        let config = self.config();
        if info.is_costly() && !config.preload_on_metered() {
            let canceled = self.cancel_all();
            debug!(canceled, "Metered network, canceling preloads");
            return ReconcileOutcome::Skipped(SkipReason::MeteredNetwork);
        }
        // The monitor query may have raced with shutdown.
        if self.is_shut_down() {
            return ReconcileOutcome::Skipped(SkipReason::ShutDown);
        }

        let parallelism = effective_parallelism(config.max_parallel_preloads(), info.quality);
        let pruned = self.prune_unwanted(urls);

        let ctx = PreloadContext {
            store: Arc::clone(&store),
            http: Arc::clone(&self.http),
            events: self.events.clone(),
            bytes_to_fetch: config.preload_size_bytes(),
            timeout: config.task_timeout(),
        };
        let pool = Arc::clone(&self.pool.read());
        let total = config.preload_size_bytes();

        let mut seen = HashSet::with_capacity(urls.len());
        let mut admitted = 0;
        let mut already_cached = 0;
        let mut rejected = 0;

        for url in urls.iter().map(AsRef::as_ref) {
            if !seen.insert(url) {
                continue;
            }

            // A live task reports its own outcome, even once its bytes are all cached.
            if self.live.lock().contains_key(url) {
                continue;
            }

            let key = config.cache_key(url);
            if store.cached_length(&key, 0, total) >= total {
                already_cached += 1;
                let _ = self.events.send(PreloadEvent::Succeeded {
                    url: url.to_string(),
                });
                continue;
            }

            let task = {
                let mut live = self.live.lock();
                // At the cap, keep scanning so cached URLs still report success.
                if live.contains_key(url) || live.len() >= parallelism {
                    continue;
                }
                let task = PreloadTask::tracked(url, key, ctx.clone(), &self.live);
                live.insert(url.to_string(), Arc::clone(&task));
                task
            };

            // On rejection the task removes itself from the live set.
            match task.execute(&pool) {
                Ok(()) => admitted += 1,
                Err(e) => {
                    rejected += 1;
                    debug!(url = %redact_url(url), error = %e, "Preload not admitted");
                }
            }
        }

        debug!(
            admitted,
            already_cached, pruned, rejected, parallelism, "Reconciled preloads"
        );
        ReconcileOutcome::Reconciled {
            admitted,
            already_cached,
            pruned,
            rejected,
        }
    }

    fn prune_unwanted<S: AsRef<str>>(&self, urls: &[S]) -> usize {
        let wanted: HashSet<&str> = urls.iter().map(AsRef::as_ref).collect();
        let stale: Vec<Arc<PreloadTask>> = {
            let mut live = self.live.lock();
            let stale_urls: Vec<String> = live
                .keys()
                .filter(|url| !wanted.contains(url.as_str()))
                .cloned()
                .collect();
            stale_urls
                .iter()
                .filter_map(|url| live.remove(url))
                .collect()
        };
        // Canceling re-locks the live set, so the guard must be gone here.
        for task in &stale {
            task.cancel();
        }
        stale.len()
    }

    /// Cancels every live task. Returns how many were live.
    pub fn cancel_all(&self) -> usize {
        let tasks: Vec<Arc<PreloadTask>> = self.live.lock().drain().map(|(_, task)| task).collect();
        for task in &tasks {
            task.cancel();
        }
        tasks.len()
    }

    /// Cancels the task for `url`, if any.
    pub fn cancel(&self, url: &str) -> bool {
        let task = self.live.lock().remove(url);
        task.is_some_and(|task| task.cancel())
    }

    /// Installs a new configuration.
    ///
    /// Live tasks are canceled and the pool is replaced by one sized for the
    /// new configuration; the old pool is drained within the grace period.
    #[instrument(skip_all)]
    pub async fn update_config(&self, config: Arc<CacheConfig>) {
        self.cancel_all();

        if self.is_shut_down() {
            *self.config.write() = config;
            return;
        }

        let grace = config.shutdown_grace();
        let new_pool = Arc::new(WorkerPool::from_config(self.handle.clone(), &config));
        let old_pool = std::mem::replace(&mut *self.pool.write(), new_pool);
        *self.config.write() = config;

        old_pool.shutdown(grace).await;
        info!("Preload configuration updated");
    }

    /// Cancels everything and drains the pool. Later reconciles are ignored.
    #[instrument(skip_all)]
    pub async fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::AcqRel) {
            return;
        }
        let canceled = self.cancel_all();
        let pool = Arc::clone(&self.pool.read());
        pool.shutdown(self.config().shutdown_grace()).await;
        info!(canceled, "Preload scheduler shut down");
    }
}
