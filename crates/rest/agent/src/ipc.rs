//! Line-based control protocol over a Unix socket.
//!
//! One request per line, one reply line per request:
//!
//! ```text
//! screen-on | screen-off | shown <token> | hidden <token> | lost <token>
//! foreground <app-id> | trigger | status | shutdown
//! ```
//!
//! Replies are `ok`, `ok <text>` or `err <message>`.

use rest_core::{ContextToken, EngineHandle};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt as _, AsyncWriteExt as _, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Error, Debug)]
pub enum IpcError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Connection timeout")]
    Timeout,
    #[error("Bad request: {0}")]
    BadRequest(String),
    #[error("Daemon closed the connection without replying")]
    NoReply,
    #[error("Daemon error: {0}")]
    Daemon(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    ScreenOn,
    ScreenOff,
    Shown(ContextToken),
    Hidden(ContextToken),
    Lost(ContextToken),
    Foreground(String),
    Trigger,
    Status,
    Shutdown,
}

impl Request {
    pub fn parse(line: &str) -> Result<Self, IpcError> {
        let line = line.trim();
        let (verb, arg) = match line.split_once(char::is_whitespace) {
            Some((verb, arg)) => (verb, Some(arg.trim())),
            None => (line, None),
        };

        let token = |arg: Option<&str>| -> Result<ContextToken, IpcError> {
            arg.and_then(|a| a.parse().ok())
                .map(ContextToken)
                .ok_or_else(|| IpcError::BadRequest(format!("{verb} needs a numeric token")))
        };

        match (verb, arg) {
            ("screen-on", None) => Ok(Request::ScreenOn),
            ("screen-off", None) => Ok(Request::ScreenOff),
            ("shown", arg) => token(arg).map(Request::Shown),
            ("hidden", arg) => token(arg).map(Request::Hidden),
            ("lost", arg) => token(arg).map(Request::Lost),
            ("foreground", Some(app_id)) if !app_id.is_empty() => {
                Ok(Request::Foreground(app_id.to_string()))
            }
            ("trigger", None) => Ok(Request::Trigger),
            ("status", None) => Ok(Request::Status),
            ("shutdown", None) => Ok(Request::Shutdown),
            _ => Err(IpcError::BadRequest(line.to_string())),
        }
    }
}

impl fmt::Display for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Request::ScreenOn => f.write_str("screen-on"),
            Request::ScreenOff => f.write_str("screen-off"),
            Request::Shown(token) => write!(f, "shown {token}"),
            Request::Hidden(token) => write!(f, "hidden {token}"),
            Request::Lost(token) => write!(f, "lost {token}"),
            Request::Foreground(app_id) => write!(f, "foreground {app_id}"),
            Request::Trigger => f.write_str("trigger"),
            Request::Status => f.write_str("status"),
            Request::Shutdown => f.write_str("shutdown"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    Ok(Option<String>),
    Err(String),
}

impl Response {
    pub fn parse(line: &str) -> Self {
        let line = line.trim_end();
        if let Some(message) = line.strip_prefix("err") {
            return Response::Err(message.trim_start().to_string());
        }
        match line.strip_prefix("ok") {
            Some("") => Response::Ok(None),
            Some(text) => Response::Ok(Some(text.trim_start().to_string())),
            None => Response::Err(format!("unexpected reply: {line}")),
        }
    }

    pub fn into_result(self) -> Result<Option<String>, IpcError> {
        match self {
            Response::Ok(text) => Ok(text),
            Response::Err(message) => Err(IpcError::Daemon(message)),
        }
    }
}

impl fmt::Display for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Response::Ok(None) => f.write_str("ok"),
            Response::Ok(Some(text)) => write!(f, "ok {text}"),
            Response::Err(message) => write!(f, "err {message}"),
        }
    }
}

/// Apply one request to the engine.
pub async fn dispatch(
    request: Request,
    handle: &EngineHandle,
    shutdown: &CancellationToken,
) -> Response {
    let result = match request {
        Request::ScreenOn => handle.screen_on().map(|()| None),
        Request::ScreenOff => handle.screen_off().map(|()| None),
        Request::Shown(token) => handle.surface_shown(token).map(|()| None),
        Request::Hidden(token) => handle.surface_hidden(token).map(|()| None),
        Request::Lost(token) => handle.surface_lost(token).map(|()| None),
        Request::Foreground(app_id) => handle.foreground_changed(app_id).map(|()| None),
        Request::Trigger => handle.try_trigger().await.map(|accepted| {
            let text = if accepted {
                "break started"
            } else {
                "break already in progress"
            };
            Some(text.to_string())
        }),
        Request::Status => {
            let summary = handle.status().borrow().summary();
            Ok(Some(summary))
        }
        Request::Shutdown => {
            info!("shutdown requested over IPC");
            shutdown.cancel();
            Ok(None)
        }
    };
    match result {
        Ok(text) => Response::Ok(text),
        Err(e) => Response::Err(e.to_string()),
    }
}

/// Server side - runs in the daemon
pub struct IpcServer {
    listener: UnixListener,
    path: PathBuf,
}

impl IpcServer {
    pub fn bind(path: &Path) -> Result<Self, IpcError> {
        // stale socket from a previous run
        let _ = std::fs::remove_file(path);
        let listener = UnixListener::bind(path)?;
        info!(path = %path.display(), "IPC server listening");
        Ok(Self {
            listener,
            path: path.to_path_buf(),
        })
    }

    /// Accept connections until `shutdown` fires.
    pub async fn serve(self, handle: EngineHandle, shutdown: CancellationToken) {
        loop {
            let stream = tokio::select! {
                () = shutdown.cancelled() => break,
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, _)) => stream,
                    Err(e) => {
                        error!(error = %e, "accept failed");
                        continue;
                    }
                },
            };

            let handle = handle.clone();
            let shutdown = shutdown.clone();
            tokio::spawn(async move {
                if let Err(e) = serve_connection(stream, &handle, &shutdown).await {
                    debug!(error = %e, "IPC connection ended");
                }
            });
        }
        debug!("IPC server stopped");
    }
}

impl Drop for IpcServer {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

async fn serve_connection(
    stream: UnixStream,
    handle: &EngineHandle,
    shutdown: &CancellationToken,
) -> Result<(), IpcError> {
    let (read, mut write) = stream.into_split();
    let mut lines = BufReader::new(read).lines();

    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let response = match Request::parse(&line) {
            Ok(request) => {
                debug!(%request, "IPC request");
                dispatch(request, handle, shutdown).await
            }
            Err(e) => Response::Err(e.to_string()),
        };
        write.write_all(format!("{response}\n").as_bytes()).await?;
    }
    Ok(())
}

/// Client side - used by the CLI and the overlay
pub struct IpcClient {
    path: PathBuf,
}

impl IpcClient {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Send one request and wait for its reply.
    pub async fn send(&self, request: &Request) -> Result<Option<String>, IpcError> {
        tokio::time::timeout(REQUEST_TIMEOUT, self.round_trip(request))
            .await
            .map_err(|_| IpcError::Timeout)?
    }

    async fn round_trip(&self, request: &Request) -> Result<Option<String>, IpcError> {
        let stream = UnixStream::connect(&self.path).await?;
        let (read, mut write) = stream.into_split();
        write.write_all(format!("{request}\n").as_bytes()).await?;

        let mut lines = BufReader::new(read).lines();
        let line = lines.next_line().await?.ok_or(IpcError::NoReply)?;
        Response::parse(&line).into_result()
    }
}

/// Check if daemon is running
pub async fn is_daemon_running(path: &Path) -> bool {
    IpcClient::new(path).send(&Request::Status).await.is_ok()
}
