//! Shared utilities for integration testing.

#![allow(dead_code)]

use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::time::Instant;

use execution_guard::clock::TokioClock;
use execution_guard::{ExecutionGuard, GuardConfig, UpstreamError, UpstreamResponse};

/// Epoch anchor aligned to a 5s fingerprint window.
pub const ANCHOR_MS: u64 = 1_700_000_000_000;

/// Config with pacing, throttling and jitter turned off.
pub fn fast_config() -> GuardConfig {
    let mut config = GuardConfig::default();
    config.queue.min_delay_ms = 0;
    config.retry.min_interval_ms = 0;
    config.retry.jitter_ms = 0;
    config
}

/// Guard on the tokio clock, anchored so windows start at test start.
pub fn guard_with(config: GuardConfig) -> ExecutionGuard {
    ExecutionGuard::with_clock(config, Arc::new(TokioClock::anchored_at(ANCHOR_MS)))
        .expect("valid test config")
}

/// Upstream that replays a fixed list of statuses, then repeats the last.
#[derive(Clone)]
pub struct ScriptedUpstream {
    script: Arc<Vec<u16>>,
    calls: Arc<AtomicU32>,
    dispatches: Arc<Mutex<Vec<Instant>>>,
}

impl ScriptedUpstream {
    pub fn new(script: &[u16]) -> Self {
        assert!(!script.is_empty());
        Self {
            script: Arc::new(script.to_vec()),
            calls: Arc::new(AtomicU32::new(0)),
            dispatches: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn always(status: u16) -> Self {
        Self::new(&[status])
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    /// Instants at which the upstream was invoked.
    pub fn dispatches(&self) -> Vec<Instant> {
        self.dispatches.lock().unwrap().clone()
    }

    /// A call closure suitable for `guarded_execute`.
    pub fn call(
        &self,
    ) -> impl Fn() -> std::future::Ready<Result<UpstreamResponse, UpstreamError>>
           + Clone
           + Send
           + Sync
           + 'static {
        let upstream = self.clone();
        move || {
            let n = upstream.calls.fetch_add(1, Ordering::SeqCst) as usize;
            upstream.dispatches.lock().unwrap().push(Instant::now());
            let status = upstream.script[n.min(upstream.script.len() - 1)];
            std::future::ready(Ok(UpstreamResponse::new(status, format!("response #{n}"))))
        }
    }
}

/// Start a programmable mock backend on an ephemeral port.
pub async fn start_programmable_backend<F, Fut>(f: F) -> SocketAddr
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = (u16, String)> + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let f = Arc::new(f);

    tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((mut socket, _)) => {
                    let f = f.clone();
                    tokio::spawn(async move {
                        let mut buf = [0u8; 4096];
                        let _ = socket.read(&mut buf).await;

                        let (status, body) = f().await;
                        let status_text = match status {
                            200 => "200 OK",
                            400 => "400 Bad Request",
                            429 => "429 Too Many Requests",
                            500 => "500 Internal Server Error",
                            502 => "502 Bad Gateway",
                            503 => "503 Service Unavailable",
                            _ => "200 OK",
                        };

                        let response_str = format!(
                            "HTTP/1.1 {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                            status_text,
                            body.len(),
                            body
                        );
                        let _ = socket.write_all(response_str.as_bytes()).await;
                        let _ = socket.shutdown().await;
                        tokio::time::sleep(Duration::from_millis(10)).await;
                    });
                }
                Err(_) => break,
            }
        }
    });

    addr
}

/// A `guarded_execute` call that POSTs to `url` with reqwest.
pub fn http_call(
    client: reqwest::Client,
    url: String,
) -> impl Fn() -> std::pin::Pin<Box<dyn Future<Output = Result<UpstreamResponse, UpstreamError>> + Send>>
       + Send
       + Sync
       + 'static {
    move || {
        let client = client.clone();
        let url = url.clone();
        Box::pin(async move {
            let res = client
                .post(&url)
                .send()
                .await
                .map_err(|e| UpstreamError::connection(e.to_string()))?;
            let status = res.status().as_u16();
            let body = res
                .bytes()
                .await
                .map_err(|e| UpstreamError::connection(e.to_string()))?;
            Ok(UpstreamResponse::new(status, body.to_vec()))
        })
    }
}

/// Serve the admin router for `guard` on an ephemeral port.
pub async fn start_admin(guard: ExecutionGuard) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let shutdown = execution_guard::Shutdown::new();
    let rx = shutdown.subscribe();

    tokio::spawn(async move {
        // Keep the sender alive for the server's lifetime.
        let _shutdown = shutdown;
        let _ = execution_guard::admin::serve(listener, guard, rx).await;
    });

    addr
}
