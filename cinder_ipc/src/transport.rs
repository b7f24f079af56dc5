//! Control transport layer.
//!
//! Carries one command payload to the tunnel worker's control endpoint and
//! awaits the single correlated reply. The transport does not correlate
//! concurrent requests; callers that need more than one request in flight
//! must serialize their sends.
//!
//! Frames are length-prefixed (u32 little-endian). An empty reply frame
//! means the worker completed the request without producing a response.

use async_trait::async_trait;
use log::debug;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{UnixListener, UnixStream};
use tokio::time::{timeout, Duration};

/// Result type for IPC operations
pub type IpcResult<T> = Result<T, IpcError>;

/// Error type for IPC operations
#[derive(Error, Debug)]
pub enum IpcError {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Connection error
    #[error("Connection error: {0}")]
    Connection(String),

    /// Protocol error
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Timeout error
    #[error("Timeout error: {0}")]
    Timeout(String),
}

/// Guard on writes so a wedged worker cannot block a send forever. The
/// reply wait is governed by the caller's own timeout window instead.
const WRITE_TIMEOUT: Duration = Duration::from_secs(5);

/// Control payloads are small; anything larger is a framing bug.
const MAX_FRAME: usize = 64 * 1024;

/// One request/reply exchange with the tunnel worker.
#[async_trait]
pub trait ControlTransport: Send + Sync {
    /// Send one command payload and await the single correlated reply.
    ///
    /// `Ok(None)` means the worker completed the request without a
    /// response.
    async fn exchange(&mut self, payload: &[u8]) -> IpcResult<Option<Vec<u8>>>;

    /// Close the connection
    async fn close(&mut self) -> IpcResult<()>;
}

/// Factory for control transports, so a channel can re-establish the
/// connection after a timeout or transport failure.
#[async_trait]
pub trait ControlConnector: Send + Sync {
    async fn connect(&self) -> IpcResult<Box<dyn ControlTransport>>;
}

async fn write_frame(stream: &mut UnixStream, data: &[u8]) -> IpcResult<()> {
    let len = data.len() as u32;
    match timeout(WRITE_TIMEOUT, async {
        stream.write_all(&len.to_le_bytes()).await?;
        stream.write_all(data).await
    })
    .await
    {
        Ok(result) => result.map_err(IpcError::Io),
        Err(_) => Err(IpcError::Timeout("write operation timed out".to_string())),
    }
}

async fn read_frame(stream: &mut UnixStream) -> IpcResult<Vec<u8>> {
    let mut len_buf = [0u8; 4];
    stream.read_exact(&mut len_buf).await.map_err(IpcError::Io)?;

    let len = u32::from_le_bytes(len_buf) as usize;
    if len > MAX_FRAME {
        return Err(IpcError::Protocol(format!("frame too large: {} bytes", len)));
    }

    let mut data = vec![0u8; len];
    stream.read_exact(&mut data).await.map_err(IpcError::Io)?;
    Ok(data)
}

/// Unix Domain Socket transport to the worker control endpoint.
pub struct UnixSocketTransport {
    stream: UnixStream,
}

impl UnixSocketTransport {
    /// Connect to the worker control socket at the given path.
    pub async fn connect<P: AsRef<Path>>(path: P) -> IpcResult<Self> {
        let stream = UnixStream::connect(path)
            .await
            .map_err(|e| IpcError::Connection(format!("failed to connect to socket: {}", e)))?;
        Ok(Self { stream })
    }
}

#[async_trait]
impl ControlTransport for UnixSocketTransport {
    async fn exchange(&mut self, payload: &[u8]) -> IpcResult<Option<Vec<u8>>> {
        write_frame(&mut self.stream, payload).await?;
        debug!("sent {} byte control payload", payload.len());

        let reply = read_frame(&mut self.stream).await?;
        if reply.is_empty() {
            Ok(None)
        } else {
            Ok(Some(reply))
        }
    }

    async fn close(&mut self) -> IpcResult<()> {
        self.stream.shutdown().await.map_err(IpcError::Io)?;
        Ok(())
    }
}

/// Connector producing [`UnixSocketTransport`] connections.
pub struct UnixConnector {
    path: PathBuf,
}

impl UnixConnector {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl ControlConnector for UnixConnector {
    async fn connect(&self) -> IpcResult<Box<dyn ControlTransport>> {
        let transport = UnixSocketTransport::connect(&self.path).await?;
        Ok(Box::new(transport))
    }
}

/// Worker-side listener for the control endpoint.
pub struct ControlListener {
    listener: UnixListener,
    socket_path: PathBuf,
}

impl ControlListener {
    /// Bind the control endpoint at the given path, replacing any stale
    /// socket file.
    pub async fn bind<P: AsRef<Path>>(path: P) -> IpcResult<Self> {
        let socket_path = path.as_ref().to_path_buf();

        if socket_path.exists() {
            std::fs::remove_file(&socket_path).map_err(|e| {
                IpcError::Connection(format!("failed to remove existing socket: {}", e))
            })?;
        }

        let listener = UnixListener::bind(&socket_path)
            .map_err(|e| IpcError::Connection(format!("failed to bind to socket: {}", e)))?;

        Ok(Self {
            listener,
            socket_path,
        })
    }

    /// Accept a new control connection.
    pub async fn accept(&self) -> IpcResult<WorkerConnection> {
        let (stream, _) = self
            .listener
            .accept()
            .await
            .map_err(|e| IpcError::Connection(format!("failed to accept connection: {}", e)))?;
        Ok(WorkerConnection { stream })
    }
}

impl Drop for ControlListener {
    fn drop(&mut self) {
        // Clean up the socket file when the listener is dropped
        let _ = std::fs::remove_file(&self.socket_path);
    }
}

/// One accepted control connection on the worker side.
pub struct WorkerConnection {
    stream: UnixStream,
}

impl WorkerConnection {
    /// Receive the next command payload. `Ok(None)` means the peer closed
    /// the connection.
    pub async fn receive_command(&mut self) -> IpcResult<Option<Vec<u8>>> {
        let mut len_buf = [0u8; 4];
        match self.stream.read_exact(&mut len_buf).await {
            Ok(_) => {}
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(IpcError::Io(e)),
        }

        let len = u32::from_le_bytes(len_buf) as usize;
        if len > MAX_FRAME {
            return Err(IpcError::Protocol(format!("frame too large: {} bytes", len)));
        }

        let mut data = vec![0u8; len];
        self.stream.read_exact(&mut data).await.map_err(IpcError::Io)?;
        Ok(Some(data))
    }

    /// Send the single reply for the last received command. `None` sends an
    /// empty frame, telling the peer the request completed without a
    /// response.
    pub async fn send_reply(&mut self, reply: Option<&[u8]>) -> IpcResult<()> {
        write_frame(&mut self.stream, reply.unwrap_or_default()).await
    }

    /// Close the connection
    pub async fn close(&mut self) -> IpcResult<()> {
        self.stream.shutdown().await.map_err(IpcError::Io)?;
        Ok(())
    }
}
