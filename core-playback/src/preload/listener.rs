//! Delivery of preload events to the host.
//!
//! Tasks push [`PreloadEvent`]s into an unbounded channel. A single
//! dispatcher task drains it, calls the host's [`PreloadListener`] and
//! mirrors every event onto the [`EventBus`], so callbacks always run on one
//! context and in per-task order.

use core_async::runtime::Handle;
use core_async::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use core_async::sync::CancellationToken;
use core_async::task::JoinHandle;
use core_async::time::{timeout, Duration};
use core_runtime::events::{CoreEvent, EventBus, PreloadEvent};
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, warn};

/// Host callbacks for preload outcomes.
pub trait PreloadListener: Send + Sync {
    fn on_preload_success(&self, url: &str);

    fn on_preload_failed(&self, url: &str, message: &str);

    fn on_preload_progress(&self, _url: &str, _bytes_loaded: u64, _bytes_total: u64) {}

    fn on_preload_canceled(&self, _url: &str) {}
}

/// Listener that ignores everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopPreloadListener;

impl PreloadListener for NoopPreloadListener {
    fn on_preload_success(&self, _url: &str) {}

    fn on_preload_failed(&self, _url: &str, _message: &str) {}
}

/// Owns the consumer side of the preload event channel.
pub struct PreloadEventDispatcher {
    sender: UnboundedSender<PreloadEvent>,
    stop: CancellationToken,
    join: Mutex<Option<JoinHandle<()>>>,
}

impl PreloadEventDispatcher {
    pub fn spawn(
        handle: &Handle,
        listener: Arc<dyn PreloadListener>,
        event_bus: Option<EventBus>,
    ) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        let stop = CancellationToken::new();
        let join = handle.spawn(dispatch_loop(
            receiver,
            listener,
            event_bus,
            stop.clone(),
        ));

        Self {
            sender,
            stop,
            join: Mutex::new(Some(join)),
        }
    }

    /// Sender handed to the scheduler and its tasks.
    pub fn sender(&self) -> UnboundedSender<PreloadEvent> {
        self.sender.clone()
    }

    /// Delivers what is already queued, then stops. Waits at most `grace`.
    pub async fn shutdown(&self, grace: Duration) {
        self.stop.cancel();
        let Some(join) = self.join.lock().take() else {
            return;
        };
        let abort = join.abort_handle();
        if timeout(grace, join).await.is_err() {
            warn!("Preload event dispatcher did not stop in time");
            abort.abort();
        }
    }
}

async fn dispatch_loop(
    mut receiver: UnboundedReceiver<PreloadEvent>,
    listener: Arc<dyn PreloadListener>,
    event_bus: Option<EventBus>,
    stop: CancellationToken,
) {
    loop {
        core_async::select! {
            biased;
            event = receiver.recv() => match event {
                Some(event) => deliver(listener.as_ref(), event_bus.as_ref(), event),
                None => break,
            },
            _ = stop.cancelled() => {
                while let Ok(event) = receiver.try_recv() {
                    deliver(listener.as_ref(), event_bus.as_ref(), event);
                }
                break;
            }
        }
    }
    debug!("Preload event dispatcher stopped");
}

fn deliver(listener: &dyn PreloadListener, event_bus: Option<&EventBus>, event: PreloadEvent) {
    match &event {
        PreloadEvent::Progress {
            url,
            bytes_loaded,
            bytes_total,
        } => listener.on_preload_progress(url, *bytes_loaded, *bytes_total),
        PreloadEvent::Succeeded { url } => listener.on_preload_success(url),
        PreloadEvent::Failed { url, message } => listener.on_preload_failed(url, message),
        PreloadEvent::Canceled { url } => listener.on_preload_canceled(url),
    }

    if let Some(bus) = event_bus {
        let _ = bus.emit(CoreEvent::Preload(event));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Recorder {
        calls: Mutex<Vec<String>>,
    }

    impl PreloadListener for Recorder {
        fn on_preload_success(&self, url: &str) {
            self.calls.lock().push(format!("success:{url}"));
        }

        fn on_preload_failed(&self, url: &str, message: &str) {
            self.calls.lock().push(format!("failed:{url}:{message}"));
        }

        fn on_preload_progress(&self, url: &str, bytes_loaded: u64, bytes_total: u64) {
            self.calls
                .lock()
                .push(format!("progress:{url}:{bytes_loaded}/{bytes_total}"));
        }
    }

    #[tokio::test]
    async fn test_events_reach_listener_and_bus_in_order() {
        let recorder = Arc::new(Recorder::default());
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();
        let dispatcher =
            PreloadEventDispatcher::spawn(&Handle::current(), recorder.clone(), Some(bus));

        let sender = dispatcher.sender();
        sender
            .send(PreloadEvent::Progress {
                url: "a".to_string(),
                bytes_loaded: 1,
                bytes_total: 2,
            })
            .unwrap();
        sender
            .send(PreloadEvent::Failed {
                url: "a".to_string(),
                message: "boom".to_string(),
            })
            .unwrap();
        sender
            .send(PreloadEvent::Canceled {
                url: "b".to_string(),
            })
            .unwrap();
        sender
            .send(PreloadEvent::Succeeded {
                url: "c".to_string(),
            })
            .unwrap();

        dispatcher.shutdown(Duration::from_secs(1)).await;

        assert_eq!(
            *recorder.calls.lock(),
            vec!["progress:a:1/2", "failed:a:boom", "success:c"]
        );

        let first = rx.recv().await.unwrap();
        assert!(matches!(first, CoreEvent::Preload(PreloadEvent::Progress { .. })));
        assert!(rx.recv().await.unwrap().is_terminal_preload());
    }

    #[tokio::test]
    async fn test_shutdown_twice_is_harmless() {
        let dispatcher = PreloadEventDispatcher::spawn(
            &Handle::current(),
            Arc::new(NoopPreloadListener),
            None,
        );
        dispatcher.shutdown(Duration::from_millis(100)).await;
        dispatcher.shutdown(Duration::from_millis(100)).await;
    }
}
