#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;
use std::{
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use async_trait::async_trait;
use tokio::{
    net::{UnixListener, UnixStream},
    sync::broadcast,
};
use tracing::{debug, error, info, trace, warn};
use tribe_common::Signal;

use crate::{
    ControlError, PROTOCOL_VERSION, Request, Response, Result,
    frame::{self, MAX_REQUEST_SIZE},
};

/// Upper bound on reading a request or writing a response
const IO_TIMEOUT: Duration = Duration::from_secs(30);

#[async_trait]
pub trait CommandHandler: Send + Sync {
    async fn handle_request(&self, request: Request) -> Result<Response>;
}

/// Serves control requests on a Unix domain socket
pub struct ControlServer {
    socket_path: PathBuf,
    handler: Arc<dyn CommandHandler>,
}

impl ControlServer {
    pub fn new(socket_path: impl Into<PathBuf>, handler: Arc<dyn CommandHandler>) -> Self {
        Self {
            socket_path: socket_path.into(),
            handler,
        }
    }

    #[must_use]
    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Bind the socket and serve until a shutdown signal arrives
    ///
    /// A leftover socket file is removed unless another process is still
    /// answering on it. The socket is created with mode 0600.
    pub async fn serve(&self, mut shutdown: broadcast::Receiver<Signal>) -> Result<()> {
        let socket_path = self.socket_path.as_path();
        if socket_path.exists() {
            if UnixStream::connect(socket_path).await.is_ok() {
                return Err(ControlError::Io(std::io::Error::new(
                    std::io::ErrorKind::AddrInUse,
                    format!(
                        "Socket already in use by running instance: {}",
                        socket_path.display()
                    ),
                )));
            }
            info!(path = %socket_path.display(), "Removing stale control socket");
            tokio::fs::remove_file(socket_path).await?;
        }

        let listener = UnixListener::bind(socket_path)?;

        #[cfg(unix)]
        {
            let mut perms = tokio::fs::metadata(socket_path).await?.permissions();
            perms.set_mode(0o600);
            tokio::fs::set_permissions(socket_path, perms).await?;
        }

        info!(path = %socket_path.display(), "Control socket listening (mode 0600)");

        loop {
            tokio::select! {
                result = listener.accept() => match result {
                    Ok((stream, _addr)) => {
                        let handler = Arc::clone(&self.handler);
                        tokio::spawn(async move {
                            if let Err(e) = handle_connection(stream, handler).await {
                                error!(error = %e, "Error handling control connection");
                            }
                        });
                    }
                    Err(e) => error!(error = %e, "Error accepting control connection"),
                },
                sig = shutdown.recv() => {
                    match sig {
                        Ok(Signal::Shutdown | Signal::Finalised) => {
                            info!("Control server shutting down");
                        }
                        Err(e) => error!(error = %e, "Control server shutdown channel error"),
                    }
                    break;
                }
            }
        }

        if socket_path.exists() {
            debug!(path = %socket_path.display(), "Removing control socket");
            let _ = tokio::fs::remove_file(socket_path).await;
        }

        Ok(())
    }
}

async fn handle_connection(mut stream: UnixStream, handler: Arc<dyn CommandHandler>) -> Result<()> {
    let read = frame::read(&mut stream, MAX_REQUEST_SIZE);
    let request: Request = tokio::time::timeout(IO_TIMEOUT, read)
        .await
        .map_err(|_| ControlError::Timeout)??;

    trace!(?request, "Received control request");

    let response = if request.is_version_compatible() {
        match handler.handle_request(request).await {
            Ok(response) => response,
            Err(e) => {
                warn!(error = %e, "Error handling control request");
                Response::error(e.to_string())
            }
        }
    } else {
        Response::error(
            ControlError::IncompatibleVersion {
                peer: request.version,
                local: PROTOCOL_VERSION,
            }
            .to_string(),
        )
    };

    trace!(?response, "Sending control response");

    tokio::time::timeout(IO_TIMEOUT, frame::write(&mut stream, &response))
        .await
        .map_err(|_| ControlError::Timeout)??;

    Ok(())
}
