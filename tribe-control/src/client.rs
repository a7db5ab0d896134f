use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use tokio::net::UnixStream;
use tracing::debug;

use crate::{
    ControlError, PROTOCOL_VERSION, Request, RequestCommand, Response, ResponsePayload, Result,
    frame::{self, MAX_RESPONSE_SIZE},
};

/// One-shot client: each request opens its own connection
#[derive(Debug, Clone)]
pub struct ControlClient {
    socket_path: PathBuf,
    timeout: Duration,
}

impl ControlClient {
    #[must_use]
    pub fn new(socket_path: impl Into<PathBuf>) -> Self {
        Self {
            socket_path: socket_path.into(),
            timeout: Duration::from_secs(10),
        }
    }

    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Fail early with a readable error when the daemon is not running
    pub fn check_socket_exists(&self) -> Result<()> {
        if self.socket_path.exists() {
            Ok(())
        } else {
            Err(ControlError::InvalidSocketPath(format!(
                "Socket does not exist: {}",
                self.socket_path.display()
            )))
        }
    }

    #[must_use]
    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Send `command` and wait for the answer
    ///
    /// An error payload from the daemon becomes [`ControlError::ServerError`].
    pub async fn send(&self, command: RequestCommand) -> Result<Response> {
        self.send_request(Request::new(command)).await
    }

    pub async fn send_request(&self, request: Request) -> Result<Response> {
        tokio::time::timeout(self.timeout, self.round_trip(request))
            .await
            .map_err(|_| ControlError::Timeout)?
    }

    async fn round_trip(&self, request: Request) -> Result<Response> {
        debug!(path = %self.socket_path.display(), "Connecting to control socket");
        let mut stream = UnixStream::connect(&self.socket_path).await?;

        frame::write(&mut stream, &request).await?;
        let response: Response = frame::read(&mut stream, MAX_RESPONSE_SIZE).await?;

        if !response.is_version_compatible() {
            return Err(ControlError::IncompatibleVersion {
                peer: response.version,
                local: PROTOCOL_VERSION,
            });
        }

        if let ResponsePayload::Error(message) = response.payload {
            return Err(ControlError::ServerError(message));
        }

        Ok(response)
    }
}
