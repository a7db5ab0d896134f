//! Control requests against the running dispatcher

use std::{sync::Arc, time::Instant};

use async_trait::async_trait;
use tribe_control::{
    CircuitCommand, CircuitSummary, ControlError, DeadLetterSummary, EmailRequest, JobSummary,
    QueueCommand, QueueSummary, Request, RequestCommand, Response, ResponseData, SystemCommand,
    SystemStatus, server::CommandHandler,
};
use tribe_queue::{Dispatched, Dispatcher, EmailQueue, JobId, QueueError};

pub struct TribeControlHandler {
    dispatcher: Arc<Dispatcher>,
    start_time: Instant,
}

impl TribeControlHandler {
    #[must_use]
    pub fn new(dispatcher: Arc<Dispatcher>) -> Self {
        Self {
            dispatcher,
            start_time: Instant::now(),
        }
    }

    fn queue(&self) -> tribe_control::Result<&EmailQueue> {
        self.dispatcher.queue().ok_or_else(|| {
            ControlError::ServerError(
                "Queue commands are unavailable in direct mode (no queue backend configured)"
                    .to_string(),
            )
        })
    }

    fn handle_system(&self, command: SystemCommand) -> Response {
        match command {
            SystemCommand::Ping => Response::ok(),
            SystemCommand::Status => Response::data(ResponseData::SystemStatus(SystemStatus {
                version: env!("CARGO_PKG_VERSION").to_string(),
                uptime_secs: self.start_time.elapsed().as_secs(),
                mode: self.dispatcher.mode().to_string(),
                worker_running: self.dispatcher.queue().is_some_and(EmailQueue::is_worker_running),
            })),
        }
    }

    async fn enqueue(&self, request: EmailRequest) -> tribe_control::Result<Response> {
        match self.dispatcher.dispatch(request.into()).await.map_err(server_error)? {
            Dispatched::Queued(handle) => Ok(Response::data(ResponseData::Enqueued(
                JobSummary::from(&handle),
            ))),
            Dispatched::Sent(result) if result.success => Ok(Response::data(ResponseData::Message(
                format!(
                    "Sent directly, message id {}",
                    result.message_id.as_deref().unwrap_or("unknown")
                ),
            ))),
            Dispatched::Sent(result) => Err(ControlError::ServerError(format!(
                "Direct send failed: {}",
                result.error.as_deref().unwrap_or("unknown error")
            ))),
        }
    }

    async fn handle_queue(&self, command: QueueCommand) -> tribe_control::Result<Response> {
        let data = match command {
            QueueCommand::Enqueue(request) => return self.enqueue(request).await,
            QueueCommand::Metrics => {
                let snapshot = self.queue()?.queue_metrics().await.map_err(server_error)?;
                ResponseData::QueueMetrics(QueueSummary::from(&snapshot))
            }
            QueueCommand::DeadLetters => ResponseData::DeadLetters(
                self.queue()?
                    .dead_letters()
                    .await
                    .map_err(server_error)?
                    .iter()
                    .map(DeadLetterSummary::from)
                    .collect(),
            ),
            QueueCommand::Retry { job_id } => {
                let handle = self
                    .queue()?
                    .retry_dead_letter_job(&JobId::from(job_id))
                    .await
                    .map_err(server_error)?;
                ResponseData::Retried(handle.as_ref().map(JobSummary::from))
            }
            QueueCommand::Purge { job_id } => ResponseData::Purged(
                self.queue()?
                    .purge_dead_letter(&JobId::from(job_id))
                    .await
                    .map_err(server_error)?,
            ),
        };

        Ok(Response::data(data))
    }

    fn handle_circuit(&self, command: CircuitCommand) -> Response {
        let reset = command == CircuitCommand::Reset;
        let stats = match self.dispatcher.queue() {
            Some(queue) => {
                if reset {
                    queue.reset_circuit_breaker();
                }
                queue.circuit_breaker_stats()
            }
            None => {
                let breaker = self.dispatcher.circuit_breaker();
                if reset {
                    breaker.reset();
                }
                breaker.stats()
            }
        };

        Response::data(ResponseData::Circuit(CircuitSummary::from(stats)))
    }
}

fn server_error(err: QueueError) -> ControlError {
    ControlError::ServerError(err.to_string())
}

#[async_trait]
impl CommandHandler for TribeControlHandler {
    async fn handle_request(&self, request: Request) -> tribe_control::Result<Response> {
        match request.command {
            RequestCommand::System(command) => Ok(self.handle_system(command)),
            RequestCommand::Queue(command) => self.handle_queue(command).await,
            RequestCommand::Circuit(command) => Ok(self.handle_circuit(command)),
        }
    }
}
