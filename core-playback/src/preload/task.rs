//! A single preload: fetch the first bytes of one URL into the span store.
//!
//! ```text
//! Created ──execute──▶ Running ──▶ Succeeded
//!    │                    ├──────▶ Failed    (error or timeout)
//!    └──────cancel────────┴──────▶ Canceled
//! ```
//!
//! The first terminal transition wins and emits the task's only terminal
//! event. Progress events are never sent after it.

use bridge_traits::http::{ByteRange, HttpClient};
use core_async::io::{read_up_to, skip};
use core_async::sync::mpsc::UnboundedSender;
use core_async::sync::CancellationToken;
use core_async::time::{sleep, Duration};
use core_runtime::events::PreloadEvent;
use core_runtime::logging::redact_url;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use tracing::{debug, instrument, warn};

use super::pool::{PoolError, WorkerPool};
use crate::cache::SpanStore;
use crate::error::{PlaybackError, Result};

/// Bytes buffered before each store write.
pub const FRAGMENT_SIZE: usize = 256 * 1024;

/// In-flight tasks keyed by URL.
pub(crate) type LiveTasks = Arc<Mutex<HashMap<String, Arc<PreloadTask>>>>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskState {
    Created,
    Running,
    Succeeded,
    Failed(String),
    Canceled,
}

impl TaskState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskState::Succeeded | TaskState::Failed(_) | TaskState::Canceled
        )
    }
}

/// Everything a task needs besides its URL and key.
#[derive(Clone)]
pub struct PreloadContext {
    pub store: Arc<dyn SpanStore>,
    pub http: Arc<dyn HttpClient>,
    pub events: UnboundedSender<PreloadEvent>,
    /// Bytes to have cached from offset zero.
    pub bytes_to_fetch: u64,
    pub timeout: Duration,
}

pub struct PreloadTask {
    url: String,
    key: String,
    ctx: PreloadContext,
    state: Mutex<TaskState>,
    token: CancellationToken,
    live: Option<Weak<Mutex<HashMap<String, Arc<PreloadTask>>>>>,
}

impl PreloadTask {
    pub fn new(url: impl Into<String>, key: impl Into<String>, ctx: PreloadContext) -> Arc<Self> {
        Arc::new(Self::build(url.into(), key.into(), ctx, None))
    }

    /// Task that removes itself from `live` when it terminates.
    pub(crate) fn tracked(url: &str, key: String, ctx: PreloadContext, live: &LiveTasks) -> Arc<Self> {
        Arc::new(Self::build(
            url.to_string(),
            key,
            ctx,
            Some(Arc::downgrade(live)),
        ))
    }

    fn build(
        url: String,
        key: String,
        ctx: PreloadContext,
        live: Option<Weak<Mutex<HashMap<String, Arc<PreloadTask>>>>>,
    ) -> Self {
        Self {
            url,
            key,
            ctx,
            state: Mutex::new(TaskState::Created),
            token: CancellationToken::new(),
            live,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn state(&self) -> TaskState {
        self.state.lock().clone()
    }

    pub fn is_terminal(&self) -> bool {
        self.state.lock().is_terminal()
    }

    /// Submits the fetch to `pool` and arms the timeout.
    ///
    /// A task that is no longer `Created` is left alone. If the pool refuses
    /// the job the task ends as `Canceled` without emitting an event.
    pub fn execute(self: &Arc<Self>, pool: &WorkerPool) -> std::result::Result<(), PoolError> {
        {
            let mut state = self.state.lock();
            if *state != TaskState::Created {
                debug!(url = %redact_url(&self.url), state = ?*state, "Task already started");
                return Ok(());
            }
            *state = TaskState::Running;
        }

        let task = Arc::clone(self);
        if let Err(e) = pool.submit(Box::pin(task.run())) {
            {
                let mut state = self.state.lock();
                if !state.is_terminal() {
                    *state = TaskState::Canceled;
                }
            }
            self.token.cancel();
            self.detach();
            debug!(url = %redact_url(&self.url), error = %e, "Preload rejected by pool");
            return Err(e);
        }

        let task = Arc::clone(self);
        pool.handle().spawn(async move {
            core_async::select! {
                _ = task.token.cancelled() => {}
                _ = sleep(task.ctx.timeout) => task.on_timeout(),
            }
        });
        Ok(())
    }

    /// Cancels the task. Returns `false` if it had already terminated.
    pub fn cancel(&self) -> bool {
        let canceled = self.finish(
            TaskState::Canceled,
            PreloadEvent::Canceled {
                url: self.url.clone(),
            },
        );
        if canceled {
            debug!(url = %redact_url(&self.url), "Preload canceled");
        }
        canceled
    }

    #[instrument(skip_all, fields(url = %redact_url(&self.url)))]
    async fn run(self: Arc<Self>) {
        if self.token.is_cancelled() {
            return;
        }

        let outcome = core_async::select! {
            biased;
            _ = self.token.cancelled() => return,
            outcome = self.fetch() => outcome,
        };

        match outcome {
            Ok(()) => {
                if self.finish(
                    TaskState::Succeeded,
                    PreloadEvent::Succeeded {
                        url: self.url.clone(),
                    },
                ) {
                    debug!("Preload succeeded");
                }
            }
            Err(e) => {
                let message = e.to_string();
                if self.finish(
                    TaskState::Failed(message.clone()),
                    PreloadEvent::Failed {
                        url: self.url.clone(),
                        message,
                    },
                ) {
                    warn!(error = %e, "Preload failed");
                }
            }
        }
    }

    async fn fetch(&self) -> Result<()> {
        let total = self.ctx.bytes_to_fetch;
        let mut cached = self.ctx.store.cached_length(&self.key, 0, total);
        if cached >= total {
            return Ok(());
        }

        let mut stream = self
            .ctx
            .http
            .download_range(self.url.clone(), ByteRange::new(cached, total))
            .await?;

        if !stream.is_partial() && cached > 0 {
            // Range ignored: the body starts at zero.
            let skipped = skip(&mut stream.reader, cached).await?;
            if skipped < cached {
                return Ok(());
            }
        }

        let mut buf = vec![0u8; FRAGMENT_SIZE];
        while cached < total {
            let want = (total - cached).min(FRAGMENT_SIZE as u64) as usize;
            let read = read_up_to(&mut stream.reader, &mut buf[..want]).await?;
            if read == 0 {
                break;
            }

            let store = Arc::clone(&self.ctx.store);
            let key = self.key.clone();
            let fragment = buf[..read].to_vec();
            let position = cached;
            core_async::task::spawn_blocking(move || store.write(&key, position, &fragment))
                .await??;

            cached += read as u64;
            self.report_progress(cached, total);

            if read < want {
                // Content shorter than the preload target.
                break;
            }
        }
        Ok(())
    }

    fn report_progress(&self, bytes_loaded: u64, bytes_total: u64) {
        let state = self.state.lock();
        if state.is_terminal() {
            return;
        }
        let _ = self.ctx.events.send(PreloadEvent::Progress {
            url: self.url.clone(),
            bytes_loaded,
            bytes_total,
        });
    }

    fn on_timeout(&self) {
        let millis = self.ctx.timeout.as_millis() as u64;
        let message = PlaybackError::Timeout(millis).to_string();
        if self.finish(
            TaskState::Failed(message.clone()),
            PreloadEvent::Failed {
                url: self.url.clone(),
                message,
            },
        ) {
            warn!(url = %redact_url(&self.url), timeout_ms = millis, "Preload timed out");
        }
    }

    /// Moves to a terminal state and emits `event`, unless already terminal.
    fn finish(&self, next: TaskState, event: PreloadEvent) -> bool {
        {
            let mut state = self.state.lock();
            if state.is_terminal() {
                return false;
            }
            *state = next;
            let _ = self.ctx.events.send(event);
        }
        self.token.cancel();
        self.detach();
        true
    }

    fn detach(&self) {
        let Some(live) = self.live.as_ref().and_then(Weak::upgrade) else {
            return;
        };
        let mut live = live.lock();
        let is_self = live
            .get(&self.url)
            .is_some_and(|task| std::ptr::eq(Arc::as_ptr(task), self));
        if is_self {
            live.remove(&self.url);
        }
    }
}

impl std::fmt::Debug for PreloadTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PreloadTask")
            .field("url", &redact_url(&self.url))
            .field("key", &self.key)
            .field("state", &*self.state.lock())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemorySpanStore;
    use async_trait::async_trait;
    use bridge_traits::error::{BridgeError, Result as BridgeResult};
    use bridge_traits::http::{HttpRequest, HttpResponse, RangeStream};
    use core_async::runtime::Handle;
    use core_async::sync::mpsc;

    /// Serves a fixed body, honoring ranges, optionally stalling forever.
    struct BodyClient {
        body: Vec<u8>,
        honor_range: bool,
        stall: bool,
    }

    #[async_trait]
    impl HttpClient for BodyClient {
        async fn execute(&self, _request: HttpRequest) -> BridgeResult<HttpResponse> {
            Err(BridgeError::NotAvailable("execute".to_string()))
        }

        async fn download_range(&self, _url: String, range: ByteRange) -> BridgeResult<RangeStream> {
            if self.stall {
                std::future::pending::<()>().await;
            }
            let (status, body) = if self.honor_range {
                let start = (range.start as usize).min(self.body.len());
                let end = range
                    .end
                    .map(|e| (e as usize).min(self.body.len()))
                    .unwrap_or(self.body.len());
                (206, self.body[start..end].to_vec())
            } else {
                (200, self.body.clone())
            };
            Ok(RangeStream {
                status,
                content_length: Some(body.len() as u64),
                reader: Box::new(std::io::Cursor::new(body)),
            })
        }
    }

    fn context(
        client: BodyClient,
        store: Arc<MemorySpanStore>,
        bytes_to_fetch: u64,
        timeout: Duration,
    ) -> (PreloadContext, mpsc::UnboundedReceiver<PreloadEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        let ctx = PreloadContext {
            store,
            http: Arc::new(client),
            events,
            bytes_to_fetch,
            timeout,
        };
        (ctx, rx)
    }

    async fn terminal(rx: &mut mpsc::UnboundedReceiver<PreloadEvent>) -> PreloadEvent {
        loop {
            let event = rx.recv().await.unwrap();
            if event.is_terminal() {
                return event;
            }
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_fetches_in_fragments_and_succeeds() {
        let body: Vec<u8> = (0..600_000u32).map(|i| i as u8).collect();
        let store = Arc::new(MemorySpanStore::new());
        let client = BodyClient {
            body: body.clone(),
            honor_range: true,
            stall: false,
        };
        let (ctx, mut rx) = context(client, store.clone(), 600_000, Duration::from_secs(5));
        let pool = WorkerPool::new(Handle::current(), 1, 1, 4);

        let task = PreloadTask::new("https://h/a.mp3?sig=x", "https://h/a.mp3", ctx);
        task.execute(&pool).unwrap();

        let mut progress = Vec::new();
        loop {
            match rx.recv().await.unwrap() {
                PreloadEvent::Progress { bytes_loaded, .. } => progress.push(bytes_loaded),
                PreloadEvent::Succeeded { .. } => break,
                other => panic!("unexpected event: {:?}", other),
            }
        }

        assert_eq!(progress, vec![262_144, 524_288, 600_000]);
        assert_eq!(task.state(), TaskState::Succeeded);
        assert_eq!(store.cached_length("https://h/a.mp3", 0, u64::MAX), 600_000);
        assert_eq!(store.span_count(), 3);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_resumes_after_cached_prefix_when_range_ignored() {
        let body: Vec<u8> = (0..100u8).collect();
        let store = Arc::new(MemorySpanStore::new());
        store.write("k", 0, &body[..40]).unwrap();

        let client = BodyClient {
            body: body.clone(),
            honor_range: false,
            stall: false,
        };
        let (ctx, mut rx) = context(client, store.clone(), 100, Duration::from_secs(5));
        let pool = WorkerPool::new(Handle::current(), 1, 1, 4);

        PreloadTask::new("u", "k", ctx).execute(&pool).unwrap();
        assert!(matches!(terminal(&mut rx).await, PreloadEvent::Succeeded { .. }));

        let cached = store.read("k", 0, 100).unwrap().unwrap();
        assert_eq!(&cached[..], &body[..]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_short_content_is_success() {
        let store = Arc::new(MemorySpanStore::new());
        let client = BodyClient {
            body: vec![7; 10],
            honor_range: true,
            stall: false,
        };
        let (ctx, mut rx) = context(client, store.clone(), 1000, Duration::from_secs(5));
        let pool = WorkerPool::new(Handle::current(), 1, 1, 4);

        PreloadTask::new("u", "k", ctx).execute(&pool).unwrap();
        assert!(matches!(terminal(&mut rx).await, PreloadEvent::Succeeded { .. }));
        assert_eq!(store.total_bytes(), 10);
    }

    #[tokio::test]
    async fn test_cancel_before_execute_emits_only_canceled() {
        let store = Arc::new(MemorySpanStore::new());
        let client = BodyClient {
            body: vec![1; 10],
            honor_range: true,
            stall: false,
        };
        let (ctx, mut rx) = context(client, store.clone(), 10, Duration::from_secs(5));
        let pool = WorkerPool::new(Handle::current(), 1, 1, 4);

        let task = PreloadTask::new("u", "k", ctx);
        assert!(task.cancel());
        assert!(!task.cancel());
        task.execute(&pool).unwrap();

        assert_eq!(
            rx.recv().await.unwrap(),
            PreloadEvent::Canceled {
                url: "u".to_string()
            }
        );
        drop(task);
        pool.shutdown(Duration::from_millis(100)).await;
        assert!(rx.try_recv().is_err());
        assert_eq!(store.total_bytes(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_timeout_fails_and_interrupts_fetch() {
        let store = Arc::new(MemorySpanStore::new());
        let client = BodyClient {
            body: Vec::new(),
            honor_range: true,
            stall: true,
        };
        let (ctx, mut rx) = context(client, store, 10, Duration::from_millis(50));
        let pool = WorkerPool::new(Handle::current(), 1, 1, 4);

        let task = PreloadTask::new("u", "k", ctx);
        task.execute(&pool).unwrap();

        match terminal(&mut rx).await {
            PreloadEvent::Failed { message, .. } => {
                assert_eq!(message, "preload timed out after 50 ms")
            }
            other => panic!("unexpected event: {:?}", other),
        }
        assert!(matches!(task.state(), TaskState::Failed(_)));

        // The stalled fetch observed the token, freeing the only worker.
        pool.shutdown(Duration::from_secs(2)).await;
        assert_eq!(pool.worker_count(), 0);
    }

    #[tokio::test]
    async fn test_rejected_task_is_canceled_silently_and_detached() {
        let store = Arc::new(MemorySpanStore::new());
        let client = BodyClient {
            body: vec![1; 10],
            honor_range: true,
            stall: false,
        };
        let (ctx, mut rx) = context(client, store, 10, Duration::from_secs(5));
        let pool = WorkerPool::new(Handle::current(), 1, 1, 1);
        pool.shutdown(Duration::from_millis(10)).await;

        let live: LiveTasks = Arc::default();
        let task = PreloadTask::tracked("u", "k".to_string(), ctx, &live);
        live.lock().insert("u".to_string(), Arc::clone(&task));

        assert_eq!(task.execute(&pool), Err(PoolError::ShutDown));
        assert_eq!(task.state(), TaskState::Canceled);
        assert!(live.lock().is_empty());
        assert!(rx.try_recv().is_err());
    }
}
