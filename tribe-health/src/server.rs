use std::{sync::Arc, time::Duration};

use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
};
use tokio::{net::TcpListener, sync::broadcast};
use tower_http::timeout::TimeoutLayer;
use tribe_common::Signal;

use crate::{HealthChecker, HealthConfig, HealthError};

/// Probes must answer within this
const PROBE_TIMEOUT: Duration = Duration::from_secs(1);

/// Serves `/health/live` and `/health/ready`
pub struct HealthServer {
    listener: TcpListener,
    router: Router,
}

impl HealthServer {
    /// Bind the listener; serving starts with [`HealthServer::serve`]
    pub async fn new(
        config: &HealthConfig,
        checker: Arc<HealthChecker>,
    ) -> Result<Self, HealthError> {
        let listener = TcpListener::bind(&config.listen_address)
            .await
            .map_err(|source| HealthError::Bind {
                address: config.listen_address.clone(),
                source,
            })?;

        tracing::info!(address = %config.listen_address, "Health check server bound");

        Ok(Self {
            listener,
            router: router(checker),
        })
    }

    pub fn local_addr(&self) -> Result<std::net::SocketAddr, HealthError> {
        self.listener
            .local_addr()
            .map_err(|e| HealthError::Server(e.to_string()))
    }

    /// Serve until a shutdown signal arrives
    pub async fn serve(self, mut shutdown: broadcast::Receiver<Signal>) -> Result<(), HealthError> {
        axum::serve(self.listener, self.router)
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
                tracing::info!("Health check server received shutdown signal");
            })
            .await
            .map_err(|e| HealthError::Server(e.to_string()))?;

        tracing::info!("Health check server stopped");
        Ok(())
    }
}

fn router(checker: Arc<HealthChecker>) -> Router {
    Router::new()
        .route("/health/live", get(liveness))
        .route("/health/ready", get(readiness))
        .with_state(checker)
        .layer(probe_timeout())
}

fn probe_timeout() -> TimeoutLayer {
    TimeoutLayer::with_status_code(StatusCode::REQUEST_TIMEOUT, PROBE_TIMEOUT)
}

async fn liveness(State(checker): State<Arc<HealthChecker>>) -> Response {
    if checker.is_alive() {
        (StatusCode::OK, "OK").into_response()
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "Service Unavailable").into_response()
    }
}

async fn readiness(State(checker): State<Arc<HealthChecker>>) -> Response {
    let status = checker.status();
    if status.ready {
        (StatusCode::OK, "OK").into_response()
    } else {
        tracing::warn!(
            worker_running = status.worker_running,
            backend_ready = status.backend_ready,
            circuit_open = status.circuit_open,
            waiting = status.waiting,
            max_queue_size = status.max_queue_size,
            "Readiness probe failed"
        );
        (StatusCode::SERVICE_UNAVAILABLE, Json(status)).into_response()
    }
}
