use std::{
    future::Future,
    sync::{Arc, LazyLock},
    time::Duration,
};

use tokio::sync::broadcast;
use tribe_common::{EmailSender, Signal, internal, logging, tracing};
use tribe_control::ControlServer;
use tribe_health::{HealthChecker, HealthServer};
use tribe_queue::{CircuitState, Dispatcher};
use tribe_sendgrid::SendGridSender;

use crate::{config::TribeConfig, control_handler::TribeControlHandler};

/// How often readiness flags are refreshed from the queue
const HEALTH_REFRESH_INTERVAL: Duration = Duration::from_secs(5);

pub static SHUTDOWN_BROADCAST: LazyLock<broadcast::Sender<Signal>> = LazyLock::new(|| {
    let (sender, _receiver) = broadcast::channel(64);
    sender
});

async fn shutdown() -> anyhow::Result<()> {
    let mut terminate = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            internal!(level = INFO, "CTRL+C entered, shutting down");
        }
        _ = terminate.recv() => {
            internal!(level = INFO, "Terminate signal received, shutting down");
        }
    };

    Ok(())
}

/// Copy queue state into the readiness flags
pub async fn refresh_health(dispatcher: &Dispatcher, checker: &HealthChecker) {
    let Some(queue) = dispatcher.queue() else {
        // Direct mode has no backend or worker to wait on
        checker.set_backend_ready(true);
        checker.set_worker_running(true);
        checker.set_circuit_open(dispatcher.circuit_breaker().state() == CircuitState::Open);
        return;
    };

    checker.set_worker_running(queue.is_worker_running());
    match queue.queue_metrics().await {
        Ok(snapshot) => {
            checker.set_backend_ready(true);
            checker.set_waiting(snapshot.waiting);
            checker.set_circuit_open(snapshot.circuit_breaker == CircuitState::Open);
        }
        Err(e) => {
            tracing::warn!(error = %e, "Queue backend health check failed");
            checker.set_backend_ready(false);
        }
    }
}

async fn monitor_health(
    dispatcher: Arc<Dispatcher>,
    checker: Arc<HealthChecker>,
    mut shutdown: broadcast::Receiver<Signal>,
) {
    let mut interval = tokio::time::interval(HEALTH_REFRESH_INTERVAL);
    loop {
        tokio::select! {
            _ = interval.tick() => refresh_health(&dispatcher, &checker).await,
            _ = shutdown.recv() => break,
        }
    }
}

/// Owns every long-running component of the daemon
pub struct Tribe {
    config: TribeConfig,
}

impl Tribe {
    #[must_use]
    pub const fn new(config: TribeConfig) -> Self {
        Self { config }
    }

    /// Run until SIGINT or SIGTERM, then shut everything down in order
    ///
    /// # Errors
    ///
    /// Fails if the provider or queue cannot be set up, or a server cannot
    /// bind its address.
    pub async fn run(self) -> anyhow::Result<()> {
        logging::init();

        let Self { config } = self;
        internal!(level = INFO, environment = %config.environment, "Tribe starting");

        tribe_metrics::init_metrics(&config.metrics)?;

        let sender: Arc<dyn EmailSender> = Arc::new(SendGridSender::new(config.sendgrid)?);
        let dispatcher = Arc::new(
            Dispatcher::from_config(config.queue, config.environment, Arc::clone(&sender)).await?,
        );

        internal!(level = INFO, mode = %dispatcher.mode(), "Dispatcher ready");

        if let Some(queue) = dispatcher.queue() {
            queue.start_worker(sender);
        }

        let checker = Arc::new(HealthChecker::new(config.health.max_queue_size));
        refresh_health(&dispatcher, &checker).await;

        let mut services = tokio::task::JoinSet::new();

        if config.health.enabled {
            let server = HealthServer::new(&config.health, Arc::clone(&checker)).await?;
            services.spawn(service("health", async move {
                server.serve(SHUTDOWN_BROADCAST.subscribe()).await
            }));
            services.spawn(service("health monitor", {
                let dispatcher = Arc::clone(&dispatcher);
                let checker = Arc::clone(&checker);
                async move {
                    monitor_health(dispatcher, checker, SHUTDOWN_BROADCAST.subscribe()).await;
                    Ok::<_, std::convert::Infallible>(())
                }
            }));
        }

        if config.control.enabled {
            let handler = Arc::new(TribeControlHandler::new(Arc::clone(&dispatcher)));
            let server = ControlServer::new(config.control.socket_path, handler);
            services.spawn(service("control", async move {
                server.serve(SHUTDOWN_BROADCAST.subscribe()).await
            }));
        }

        internal!(level = INFO, "Tribe running");

        let result = tokio::select! {
            r = shutdown() => r,
            Some(joined) = services.join_next() => match joined {
                Ok(name) => Err(anyhow::anyhow!("{name} service stopped unexpectedly")),
                Err(e) => Err(anyhow::anyhow!("Service task failed: {e}")),
            },
        };

        internal!(level = INFO, "Shutting down...");

        let _ = SHUTDOWN_BROADCAST.send(Signal::Shutdown);
        if let Err(e) = dispatcher.close().await {
            tracing::error!(error = %e, "Failed to close email queue cleanly");
        }
        while services.join_next().await.is_some() {}

        let _ = SHUTDOWN_BROADCAST.send(Signal::Finalised);
        internal!(level = INFO, "Tribe stopped");

        result
    }
}

/// Log how a service ended and hand back its name
async fn service<F, E>(name: &'static str, fut: F) -> &'static str
where
    F: Future<Output = Result<(), E>> + Send,
    E: std::fmt::Display,
{
    match fut.await {
        Ok(()) => internal!(level = DEBUG, service = name, "Service stopped"),
        Err(e) => tracing::error!(service = name, error = %e, "Service failed"),
    }
    name
}
