//! Rate-limited gateway to the NetBox API.
//!
//! Every call to NetBox, reads included, goes through one [`Gateway`]. It
//! owns a single lane: calls are serialized, spaced by at least `delay`, and
//! transient failures (429/502/503 and transport errors) are retried with a
//! linear backoff of `backoff_factor × attempt` seconds.

use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::{sleep, sleep_until, Instant};
use tracing::{debug, warn};

use crate::error::{is_retryable_status, NetboxError, Result};
use crate::transport::{ApiRequest, Transport};

/// Pacing and retry policy.
#[derive(Debug, Clone, PartialEq)]
pub struct GatewayConfig {
    /// Minimum spacing between consecutive sends
    pub delay: Duration,
    /// Total attempts per call, including the first (at least 1)
    pub retry_total: u32,
    /// Seconds of backoff per failed attempt number
    pub backoff_factor: f64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            delay: Duration::from_millis(200),
            retry_total: 5,
            backoff_factor: 1.0,
        }
    }
}

impl GatewayConfig {
    /// Wait before retrying after failed attempt `attempt` (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        Duration::from_secs_f64((self.backoff_factor * f64::from(attempt)).max(0.0))
    }
}

/// Serializing, pacing, retrying front of a [`Transport`].
pub struct Gateway {
    transport: Arc<dyn Transport>,
    config: GatewayConfig,
    /// Time of the previous send
    lane: Mutex<Option<Instant>>,
    requests_total: AtomicU64,
    errors_total: AtomicU64,
}

impl Gateway {
    pub fn new(transport: Arc<dyn Transport>, config: GatewayConfig) -> Self {
        Self {
            transport,
            config,
            lane: Mutex::new(None),
            requests_total: AtomicU64::new(0),
            errors_total: AtomicU64::new(0),
        }
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    /// Attempts sent so far (retries included).
    pub fn requests_total(&self) -> u64 {
        self.requests_total.load(Ordering::Relaxed)
    }

    /// Attempts that failed so far (retried or not).
    pub fn errors_total(&self) -> u64 {
        self.errors_total.load(Ordering::Relaxed)
    }

    /// Execute one call and return the response body.
    pub async fn execute(&self, request: &ApiRequest) -> Result<Value> {
        let mut lane = self.lane.lock().await;
        let retry_total = self.config.retry_total.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;

            if let Some(previous) = *lane {
                let earliest = previous + self.config.delay;
                if Instant::now() < earliest {
                    sleep_until(earliest).await;
                }
            }
            *lane = Some(Instant::now());
            self.requests_total.fetch_add(1, Ordering::Relaxed);

            let last_status = match self.transport.send(request).await {
                Ok(response) if response.is_success() => {
                    debug!(
                        operation = %request.operation(),
                        status = response.status,
                        attempt,
                        "NetBox call succeeded"
                    );
                    return Ok(response.body);
                }
                Ok(response) => {
                    self.errors_total.fetch_add(1, Ordering::Relaxed);
                    let status = response.status;
                    if status == 401 || status == 403 {
                        return Err(NetboxError::Unauthorized {
                            status,
                            operation: request.operation(),
                            entity: request.entity_label(),
                        });
                    }
                    if !is_retryable_status(status) {
                        return Err(NetboxError::Status {
                            status,
                            operation: request.operation(),
                            entity: request.entity_label(),
                            body: response.body.to_string(),
                        });
                    }
                    Some(status)
                }
                Err(e) if e.is_transport() => {
                    self.errors_total.fetch_add(1, Ordering::Relaxed);
                    warn!(operation = %request.operation(), error = %e, "NetBox transport error");
                    None
                }
                Err(e) => {
                    self.errors_total.fetch_add(1, Ordering::Relaxed);
                    return Err(e);
                }
            };

            if attempt >= retry_total {
                return Err(NetboxError::RetriesExhausted {
                    attempts: attempt,
                    last_status,
                    operation: request.operation(),
                    entity: request.entity_label(),
                });
            }

            let wait = self.config.backoff(attempt);
            warn!(
                operation = %request.operation(),
                entity = %request.entity_label(),
                status = ?last_status,
                attempt,
                wait_ms = wait.as_millis() as u64,
                "Retrying NetBox call"
            );
            sleep(wait).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::ApiResponse;
    use async_trait::async_trait;
    use std::sync::Mutex as StdMutex;

    /// Replays scripted outcomes and records send times.
    struct ScriptedTransport {
        script: StdMutex<Vec<std::result::Result<u16, ()>>>,
        sent_at: StdMutex<Vec<Instant>>,
    }

    impl ScriptedTransport {
        fn new(script: Vec<std::result::Result<u16, ()>>) -> Arc<Self> {
            Arc::new(Self {
                script: StdMutex::new(script.into_iter().rev().collect()),
                sent_at: StdMutex::new(Vec::new()),
            })
        }

        fn sends(&self) -> Vec<Instant> {
            self.sent_at.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Transport for ScriptedTransport {
        async fn send(&self, request: &ApiRequest) -> Result<ApiResponse> {
            self.sent_at.lock().unwrap().push(Instant::now());
            match self.script.lock().unwrap().pop().unwrap_or(Ok(200)) {
                Ok(status) => Ok(ApiResponse::new(status, serde_json::json!({"status": status}))),
                Err(()) => Err(NetboxError::Transport {
                    operation: request.operation(),
                    message: "connection reset".to_string(),
                }),
            }
        }
    }

    // Paused-clock timers fire on millisecond ticks.
    fn assert_about(actual: Duration, expected: Duration) {
        assert!(
            actual >= expected && actual < expected + Duration::from_millis(10),
            "expected ~{expected:?}, got {actual:?}"
        );
    }

    fn gateway(transport: Arc<ScriptedTransport>, delay_ms: u64, retry_total: u32) -> Gateway {
        Gateway::new(
            transport,
            GatewayConfig {
                delay: Duration::from_millis(delay_ms),
                retry_total,
                backoff_factor: 1.0,
            },
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_503_exhausts_with_linear_backoff() {
        let transport = ScriptedTransport::new(vec![Ok(503), Ok(503), Ok(503)]);
        let gw = gateway(transport.clone(), 0, 3);
        let start = Instant::now();

        let err = gw
            .execute(&ApiRequest::get("/api/status/").for_entity("web01"))
            .await
            .unwrap_err();

        match err {
            NetboxError::RetriesExhausted { attempts, last_status, ref entity, .. } => {
                assert_eq!(attempts, 3);
                assert_eq!(last_status, Some(503));
                assert_eq!(entity, "web01");
            }
            other => panic!("unexpected error: {other}"),
        }

        let sends = transport.sends();
        assert_eq!(sends.len(), 3);
        assert_about(sends[1] - sends[0], Duration::from_secs(1));
        assert_about(sends[2] - sends[1], Duration::from_secs(2));
        assert_about(sends[2] - start, Duration::from_secs(3));
        assert_eq!(gw.requests_total(), 3);
        assert_eq!(gw.errors_total(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_429_then_success() {
        let transport = ScriptedTransport::new(vec![Ok(429), Ok(200)]);
        let gw = gateway(transport.clone(), 0, 5);

        let body = gw.execute(&ApiRequest::get("/api/status/")).await.unwrap();

        assert_eq!(body["status"], 200);
        assert_eq!(transport.sends().len(), 2);
        assert_eq!(gw.errors_total(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transport_error_is_retried() {
        let transport = ScriptedTransport::new(vec![Err(()), Ok(502), Ok(201)]);
        let gw = gateway(transport.clone(), 0, 5);

        assert!(gw.execute(&ApiRequest::get("/api/status/")).await.is_ok());
        assert_eq!(transport.sends().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_client_error_fails_immediately() {
        let transport = ScriptedTransport::new(vec![Ok(400)]);
        let gw = gateway(transport.clone(), 0, 5);

        let err = gw
            .execute(&ApiRequest::post("/api/ipam/ip-addresses/", serde_json::json!({})))
            .await
            .unwrap_err();

        assert!(matches!(err, NetboxError::Status { status: 400, .. }));
        assert_eq!(transport.sends().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_auth_failure_is_not_retried() {
        let transport = ScriptedTransport::new(vec![Ok(403)]);
        let gw = gateway(transport.clone(), 0, 5);

        let err = gw.execute(&ApiRequest::get("/api/status/")).await.unwrap_err();

        assert!(err.is_auth());
        assert_eq!(transport.sends().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_minimum_spacing_between_calls() {
        let transport = ScriptedTransport::new(vec![]);
        let gw = gateway(transport.clone(), 200, 1);

        for _ in 0..3 {
            gw.execute(&ApiRequest::get("/api/status/")).await.unwrap();
        }

        let sends = transport.sends();
        assert_eq!(sends.len(), 3);
        assert!(sends[1] - sends[0] >= Duration::from_millis(200));
        assert!(sends[2] - sends[1] >= Duration::from_millis(200));
    }

    #[test]
    fn test_backoff_is_factor_times_attempt() {
        let config = GatewayConfig {
            backoff_factor: 0.5,
            ..GatewayConfig::default()
        };
        assert_eq!(config.backoff(1), Duration::from_millis(500));
        assert_eq!(config.backoff(4), Duration::from_secs(2));
    }
}
