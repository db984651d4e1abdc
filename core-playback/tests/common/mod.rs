//! Fakes shared by the integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use bridge_traits::error::{BridgeError, Result as BridgeResult};
use bridge_traits::http::{ByteRange, HttpClient, HttpRequest, HttpResponse, RangeStream};
use bridge_traits::network::{NetworkInfo, NetworkMonitor, NetworkQuality, NetworkType};
use core_playback::preload::PreloadListener;
use core_runtime::events::PreloadEvent;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedReceiver;

/// HTTP client serving scripted bodies, honoring byte ranges.
#[derive(Default)]
pub struct ScriptedHttpClient {
    bodies: Mutex<HashMap<String, Vec<u8>>>,
    stalled: Mutex<HashSet<String>>,
    failures: Mutex<HashMap<String, u16>>,
    requests: Mutex<Vec<(String, ByteRange)>>,
}

impl ScriptedHttpClient {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn serve(&self, url: &str, body: Vec<u8>) {
        self.bodies.lock().insert(url.to_string(), body);
    }

    /// Requests for `url` never answer.
    pub fn stall(&self, url: &str) {
        self.stalled.lock().insert(url.to_string());
    }

    pub fn fail(&self, url: &str, status: u16) {
        self.failures.lock().insert(url.to_string(), status);
    }

    pub fn requested_urls(&self) -> Vec<String> {
        self.requests.lock().iter().map(|(url, _)| url.clone()).collect()
    }

    pub fn requests(&self) -> Vec<(String, ByteRange)> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl HttpClient for ScriptedHttpClient {
    async fn execute(&self, _request: HttpRequest) -> BridgeResult<HttpResponse> {
        Err(BridgeError::NotAvailable("execute".to_string()))
    }

    async fn download_range(&self, url: String, range: ByteRange) -> BridgeResult<RangeStream> {
        self.requests.lock().push((url.clone(), range));

        if let Some(status) = self.failures.lock().get(&url).copied() {
            return Err(BridgeError::HttpStatus { status, url });
        }
        if self.stalled.lock().contains(&url) {
            std::future::pending::<()>().await;
        }

        let body = self
            .bodies
            .lock()
            .get(&url)
            .cloned()
            .ok_or_else(|| BridgeError::HttpStatus {
                status: 404,
                url: url.clone(),
            })?;

        let start = (range.start as usize).min(body.len());
        let end = range
            .end
            .map(|end| (end as usize).min(body.len()))
            .unwrap_or(body.len());
        let slice = body[start..end.max(start)].to_vec();

        Ok(RangeStream {
            status: 206,
            content_length: Some(slice.len() as u64),
            reader: Box::new(std::io::Cursor::new(slice)),
        })
    }
}

/// Network monitor reporting whatever the test last set.
pub struct FixedNetworkMonitor {
    info: Mutex<BridgeResult<NetworkInfo>>,
}

impl FixedNetworkMonitor {
    pub fn wifi() -> Arc<Self> {
        Self::with(NetworkInfo::connected(NetworkType::WiFi).with_quality(NetworkQuality::Good))
    }

    pub fn with(info: NetworkInfo) -> Arc<Self> {
        Arc::new(Self {
            info: Mutex::new(Ok(info)),
        })
    }

    pub fn set(&self, info: NetworkInfo) {
        *self.info.lock() = Ok(info);
    }

    pub fn set_failing(&self) {
        *self.info.lock() = Err(BridgeError::OperationFailed("probe failed".to_string()));
    }
}

#[async_trait]
impl NetworkMonitor for FixedNetworkMonitor {
    async fn get_network_info(&self) -> BridgeResult<NetworkInfo> {
        match &*self.info.lock() {
            Ok(info) => Ok(info.clone()),
            Err(e) => Err(BridgeError::OperationFailed(e.to_string())),
        }
    }
}

/// Listener recording callbacks as strings.
#[derive(Default)]
pub struct RecordingListener {
    calls: Mutex<Vec<String>>,
}

impl RecordingListener {
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }
}

impl PreloadListener for RecordingListener {
    fn on_preload_success(&self, url: &str) {
        self.calls.lock().push(format!("success:{url}"));
    }

    fn on_preload_failed(&self, url: &str, message: &str) {
        self.calls.lock().push(format!("failed:{url}:{message}"));
    }

    fn on_preload_canceled(&self, url: &str) {
        self.calls.lock().push(format!("canceled:{url}"));
    }
}

/// Waits for the next terminal event of `url`, skipping everything else.
pub async fn next_terminal(rx: &mut UnboundedReceiver<PreloadEvent>, url: &str) -> PreloadEvent {
    let wait = async {
        loop {
            match rx.recv().await {
                Some(event) if event.is_terminal() && event.url() == url => return event,
                Some(_) => continue,
                None => panic!("event channel closed"),
            }
        }
    };
    tokio::time::timeout(std::time::Duration::from_secs(10), wait)
        .await
        .expect("timed out waiting for terminal event")
}

/// Drains everything currently queued.
pub fn drain(rx: &mut UnboundedReceiver<PreloadEvent>) -> Vec<PreloadEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

pub fn body(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}
