//! # Prefetch Service
//!
//! Facade wiring the span store, the evictor, the preload scheduler and the
//! event dispatcher from one [`CacheConfig`].
//!
//! ```rust,ignore
//! let service = PrefetchService::builder(config, http, network)
//!     .event_bus(event_bus.clone())
//!     .listener(Arc::new(MyListener))
//!     .build()
//!     .await?;
//!
//! service.reconcile(&["https://cdn.example.com/next.mp3"]).await;
//! if service.is_fully_cached("https://cdn.example.com/next.mp3") {
//!     // start playback from cache
//! }
//! ```

use bridge_traits::http::HttpClient;
use bridge_traits::network::NetworkMonitor;
use bridge_traits::time::{Clock, SystemClock};
use bytes::Bytes;
use core_async::runtime::Handle;
use core_async::task::spawn_blocking;
use core_runtime::events::{CacheEvent, CoreEvent, EventBus, EventStream};
use parking_lot::RwLock;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

use crate::cache::{
    CacheStats, EvictionLimits, FileSpanStore, LruSpanEvictor, SpanStore, SpanStoreListener,
};
use crate::config::CacheConfig;
use crate::error::{PlaybackError, Result};
use crate::preload::{
    NoopPreloadListener, PreloadEventDispatcher, PreloadListener, PreloadScheduler,
    ReconcileOutcome,
};

/// Builder for [`PrefetchService`].
pub struct PrefetchServiceBuilder {
    config: CacheConfig,
    http: Arc<dyn HttpClient>,
    network: Arc<dyn NetworkMonitor>,
    event_bus: Option<EventBus>,
    listener: Option<Arc<dyn PreloadListener>>,
    clock: Option<Arc<dyn Clock>>,
    store: Option<Arc<dyn SpanStore>>,
    handle: Option<Handle>,
}

impl PrefetchServiceBuilder {
    /// Mirrors preload and cache events onto `event_bus`.
    pub fn event_bus(mut self, event_bus: EventBus) -> Self {
        self.event_bus = Some(event_bus);
        self
    }

    pub fn listener(mut self, listener: Arc<dyn PreloadListener>) -> Self {
        self.listener = Some(listener);
        self
    }

    /// Time source for entry ages.
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Uses `store` instead of opening a [`FileSpanStore`] at the storage
    /// root. A custom store is kept across configuration updates.
    pub fn store(mut self, store: Arc<dyn SpanStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Runtime for workers and the dispatcher. Defaults to the current one.
    pub fn runtime(mut self, handle: Handle) -> Self {
        self.handle = Some(handle);
        self
    }

    pub async fn build(self) -> Result<PrefetchService> {
        let handle = match self.handle {
            Some(handle) => handle,
            None => Handle::try_current()
                .map_err(|e| PlaybackError::Internal(format!("no async runtime: {}", e)))?,
        };

        let config = Arc::new(self.config);
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let mut evictor = LruSpanEvictor::with_clock(EvictionLimits::from(config.as_ref()), clock);
        if let Some(bus) = &self.event_bus {
            evictor = evictor.with_event_bus(bus.clone());
        }
        let evictor = Arc::new(evictor);

        let custom_store = self.store.is_some();
        let store = match self.store {
            Some(store) => Some(attach_listener(store, Arc::clone(&evictor)).await?),
            None => open_store(config.storage_root().cloned(), Arc::clone(&evictor)).await?,
        };
        if let Some(store) = &store {
            announce_store(self.event_bus.as_ref(), store.as_ref());
        }

        let listener = self
            .listener
            .unwrap_or_else(|| Arc::new(NoopPreloadListener));
        let dispatcher = PreloadEventDispatcher::spawn(&handle, listener, self.event_bus.clone());
        let scheduler = PreloadScheduler::new(
            handle,
            Arc::clone(&config),
            self.http,
            self.network,
            dispatcher.sender(),
        );
        scheduler.attach_store(store.clone());

        info!(
            storage = store.is_some(),
            custom_store,
            capacity_bytes = config.cache_size_bytes(),
            "Prefetch service started"
        );

        Ok(PrefetchService {
            config: RwLock::new(config),
            store: RwLock::new(store),
            custom_store,
            evictor,
            scheduler,
            dispatcher,
            event_bus: self.event_bus,
        })
    }
}

/// Span cache plus background preloading behind one handle.
pub struct PrefetchService {
    config: RwLock<Arc<CacheConfig>>,
    store: RwLock<Option<Arc<dyn SpanStore>>>,
    custom_store: bool,
    evictor: Arc<LruSpanEvictor>,
    scheduler: PreloadScheduler,
    dispatcher: PreloadEventDispatcher,
    event_bus: Option<EventBus>,
}

impl PrefetchService {
    pub fn builder(
        config: CacheConfig,
        http: Arc<dyn HttpClient>,
        network: Arc<dyn NetworkMonitor>,
    ) -> PrefetchServiceBuilder {
        PrefetchServiceBuilder {
            config,
            http,
            network,
            event_bus: None,
            listener: None,
            clock: None,
            store: None,
            handle: None,
        }
    }

    /// Service using the reqwest HTTP client and the TCP probe network monitor.
    #[cfg(feature = "desktop-shims")]
    pub async fn desktop(config: CacheConfig) -> Result<Self> {
        let http = Arc::new(bridge_desktop::ReqwestHttpClient::new());
        let network = Arc::new(bridge_desktop::DesktopNetworkMonitor::new());
        Self::builder(config, http, network).build().await
    }

    pub fn config(&self) -> Arc<CacheConfig> {
        Arc::clone(&self.config.read())
    }

    pub fn store(&self) -> Option<Arc<dyn SpanStore>> {
        self.store.read().clone()
    }

    pub fn evictor(&self) -> &Arc<LruSpanEvictor> {
        &self.evictor
    }

    pub fn scheduler(&self) -> &PreloadScheduler {
        &self.scheduler
    }

    /// New subscription to the event bus, or `None` when built without one.
    ///
    /// Only events emitted after this call are seen.
    pub fn events(&self) -> Option<EventStream> {
        self.event_bus
            .as_ref()
            .map(|bus| EventStream::new(bus.subscribe()))
    }

    /// Cache key `url` maps to.
    pub fn cache_key(&self, url: &str) -> String {
        self.config().cache_key(url)
    }

    pub async fn reconcile<S: AsRef<str>>(&self, urls: &[S]) -> ReconcileOutcome {
        self.scheduler.reconcile(urls).await
    }

    pub fn cancel(&self, url: &str) -> bool {
        self.scheduler.cancel(url)
    }

    pub fn cancel_all(&self) -> usize {
        self.scheduler.cancel_all()
    }

    /// Whether the preload target for `url` is cached. `false` without storage.
    pub fn is_fully_cached(&self, url: &str) -> bool {
        let config = self.config();
        let target = config.preload_size_bytes();
        self.store()
            .is_some_and(|store| store.cached_length(&config.cache_key(url), 0, target) >= target)
    }

    /// Contiguous cached bytes from the start of `url`. `0` without storage.
    pub fn cached_bytes(&self, url: &str) -> u64 {
        self.store()
            .map(|store| store.cached_length(&self.cache_key(url), 0, u64::MAX))
            .unwrap_or(0)
    }

    /// Playback read path: up to `length` cached bytes of `url` from `position`.
    ///
    /// Returns `None` when nothing is cached there or there is no storage.
    pub async fn read(&self, url: &str, position: u64, length: u64) -> Result<Option<Bytes>> {
        let Some(store) = self.store() else {
            return Ok(None);
        };
        let key = self.cache_key(url);
        spawn_blocking(move || store.read(&key, position, length)).await?
    }

    /// Enforces eviction bounds now. Returns the number of spans removed.
    pub async fn trim_to_capacity(&self) -> Result<usize> {
        let Some(store) = self.store() else {
            return Ok(0);
        };
        let evictor = Arc::clone(&self.evictor);
        Ok(spawn_blocking(move || evictor.trim_to_capacity(store.as_ref())).await?)
    }

    pub fn stats(&self) -> CacheStats {
        let store = self.store();
        CacheStats {
            total_bytes: store.as_ref().map_or(0, |s| s.total_bytes()),
            span_count: store.as_ref().map_or(0, |s| s.span_count()),
            key_count: store.as_ref().map_or(0, |s| s.keys().len()),
            capacity_bytes: self.config().cache_size_bytes(),
            live_preloads: self.scheduler.live_urls().len(),
            evictor: self.evictor.stats(),
        }
    }

    /// Cancels preloads and removes every span. Returns the number removed.
    #[instrument(skip_all)]
    pub async fn clear(&self) -> Result<usize> {
        self.scheduler.cancel_all();
        let Some(store) = self.store() else {
            return Ok(0);
        };

        let removed = spawn_blocking(move || {
            let mut removed = 0usize;
            for key in store.keys() {
                for span in store.spans(&key) {
                    match store.remove_span(&span) {
                        Ok(()) => removed += 1,
                        Err(PlaybackError::SpanNotFound { .. }) => {}
                        Err(e) => warn!(key = %span.key, error = %e, "Failed to remove span"),
                    }
                }
            }
            removed
        })
        .await?;

        if let Some(bus) = &self.event_bus {
            let _ = bus.emit(CoreEvent::Cache(CacheEvent::Cleared {
                spans_removed: removed as u64,
            }));
        }
        info!(removed, "Cache cleared");
        Ok(removed)
    }

    /// Applies a new configuration.
    ///
    /// Eviction bounds change in place. When the storage root changed (and
    /// the store is not a custom one) the old store is detached and a store
    /// at the new root is opened.
    #[instrument(skip_all)]
    pub async fn update_config(&self, config: CacheConfig) -> Result<()> {
        let config = Arc::new(config);
        let previous = self.config();
        self.evictor
            .update_limits(EvictionLimits::from(config.as_ref()));

        if !self.custom_store && previous.storage_root() != config.storage_root() {
            self.scheduler.attach_store(None);
            let old = self.store.write().take();
            if let Some(old) = old {
                old.set_listener(None);
            }
            self.evictor.reset();

            let store =
                open_store(config.storage_root().cloned(), Arc::clone(&self.evictor)).await?;
            if let Some(store) = &store {
                announce_store(self.event_bus.as_ref(), store.as_ref());
            }
            *self.store.write() = store.clone();
            self.scheduler.attach_store(store);
        }

        self.scheduler.update_config(Arc::clone(&config)).await;
        *self.config.write() = config;

        let trimmed = self.trim_to_capacity().await?;
        debug!(trimmed, "Configuration applied");
        Ok(())
    }

    /// Stops preloading and event delivery.
    #[instrument(skip_all)]
    pub async fn shutdown(&self) {
        self.scheduler.shutdown().await;
        self.dispatcher
            .shutdown(self.config().shutdown_grace())
            .await;
        info!("Prefetch service shut down");
    }
}

async fn open_store(
    root: Option<PathBuf>,
    evictor: Arc<LruSpanEvictor>,
) -> Result<Option<Arc<dyn SpanStore>>> {
    let Some(root) = root else {
        debug!("No storage root configured, preloading disabled");
        return Ok(None);
    };
    let store = spawn_blocking(move || -> Result<Arc<dyn SpanStore>> {
        let store: Arc<dyn SpanStore> = Arc::new(FileSpanStore::open(root)?);
        store.set_listener(Some(evictor as Arc<dyn SpanStoreListener>));
        Ok(store)
    })
    .await??;
    Ok(Some(store))
}

async fn attach_listener(
    store: Arc<dyn SpanStore>,
    evictor: Arc<LruSpanEvictor>,
) -> Result<Arc<dyn SpanStore>> {
    let store = spawn_blocking(move || {
        store.set_listener(Some(evictor as Arc<dyn SpanStoreListener>));
        store
    })
    .await?;
    Ok(store)
}

fn announce_store(event_bus: Option<&EventBus>, store: &dyn SpanStore) {
    if let Some(bus) = event_bus {
        let _ = bus.emit(CoreEvent::Cache(CacheEvent::StoreOpened {
            spans: store.span_count() as u64,
            total_bytes: store.total_bytes(),
        }));
    }
}
