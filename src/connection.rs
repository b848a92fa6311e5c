//! Connection to the controller process.
//!
//! The bridge is the connecting side: the controller listens on a local
//! socket whose path is handed to the simulator as the `socket` option, and
//! the bridge connects to it at start of simulation.
//!
//! # Safety
//! - Exactly one handle exists per run; the dispatcher owns it
//! - After [`ConnectionHandle::close`] every read and write fails with
//!   `ConnectionError::Closed`; nothing touches the released socket

use std::io::{ErrorKind, Read, Write};
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{BridgeError, BridgeResult, ConfigurationError, ConnectionError};
use crate::protocol::frame;

/// Byte stream underneath a connection handle.
pub trait Channel: Read + Write + Send {
    /// Shuts the stream down in both directions. Best effort.
    fn shutdown(&mut self);
}

#[cfg(unix)]
impl Channel for std::os::unix::net::UnixStream {
    fn shutdown(&mut self) {
        let _ = std::os::unix::net::UnixStream::shutdown(self, std::net::Shutdown::Both);
    }
}

/// Why the handshake failed.
#[derive(Debug, Error)]
#[allow(missing_docs)]
pub enum ConnectError {
    /// The socket option resolved to nothing.
    #[error("no socket path supplied")]
    MissingPath {
        option: String,
    },

    /// Nothing is bound at the path, or the listener refused.
    #[error("no controller listening at {}: {source}", path.display())]
    NoListener {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("permission denied for {}", path.display())]
    PermissionDenied {
        path: PathBuf,
    },

    #[error("connecting to {} failed: {source}", path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

impl From<ConnectError> for BridgeError {
    fn from(err: ConnectError) -> Self {
        match err {
            ConnectError::MissingPath { option } => ConfigurationError::MissingOption { option }.into(),
            ConnectError::NoListener { path, source } => ConnectionError::NoListener {
                path,
                message: source.to_string(),
            }
            .into(),
            ConnectError::PermissionDenied { path } => ConnectionError::PermissionDenied { path }.into(),
            ConnectError::Io { path, source } => ConnectionError::ConnectFailed {
                message: format!("{}: {source}", path.display()),
            }
            .into(),
        }
    }
}

/// Open, frame-oriented channel to the controller.
pub struct ConnectionHandle {
    channel: Option<Box<dyn Channel>>,
    peer: String,
    session_id: Uuid,
    max_frame_bytes: usize,
}

impl std::fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("peer", &self.peer)
            .field("session_id", &self.session_id)
            .field("open", &self.is_open())
            .finish_non_exhaustive()
    }
}

impl ConnectionHandle {
    /// Wraps an already-open channel.
    pub fn from_channel(channel: impl Channel + 'static, peer: impl Into<String>, max_frame_bytes: usize) -> Self {
        Self {
            channel: Some(Box::new(channel)),
            peer: peer.into(),
            session_id: Uuid::new_v4(),
            max_frame_bytes,
        }
    }

    /// Session identifier used to correlate log records.
    #[must_use]
    pub const fn session_id(&self) -> Uuid {
        self.session_id
    }

    /// Description of the remote end.
    #[must_use]
    pub fn peer(&self) -> &str {
        &self.peer
    }

    /// Returns true until [`close`](Self::close) is called.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.channel.is_some()
    }

    /// Blocks until one complete frame arrives.
    ///
    /// Returns `Ok(None)` when the controller closed the connection between
    /// frames.
    ///
    /// # Errors
    /// `ConnectionError` for I/O failures or a closed handle, `ProtocolError`
    /// for a bad frame.
    pub fn read_frame(&mut self) -> BridgeResult<Option<Vec<u8>>> {
        let max = self.max_frame_bytes;
        let channel = self.channel.as_mut().ok_or(ConnectionError::Closed)?;
        frame::read_frame(channel, max)
    }

    /// Writes one complete frame.
    ///
    /// # Errors
    /// `ConnectionError::Closed` after close, `WriteFailed` on I/O failure.
    pub fn write_frame(&mut self, bytes: &[u8]) -> Result<(), ConnectionError> {
        let channel = self.channel.as_mut().ok_or(ConnectionError::Closed)?;
        frame::write_frame(channel, bytes)
    }

    /// Releases the channel. Idempotent.
    pub fn close(&mut self) {
        if let Some(mut channel) = self.channel.take() {
            channel.shutdown();
            debug!(session = %self.session_id, peer = %self.peer, "connection closed");
        }
    }
}

impl Drop for ConnectionHandle {
    fn drop(&mut self) {
        self.close();
    }
}

/// Opens the channel to the controller listening at `path`.
///
/// # Errors
/// `ConnectError::MissingPath` when no path was configured; otherwise the
/// variant matching why the socket could not be reached.
pub fn connect(path: Option<&str>, option: &str, max_frame_bytes: usize) -> Result<ConnectionHandle, ConnectError> {
    let path = match path {
        Some(p) if !p.is_empty() => Path::new(p),
        _ => {
            return Err(ConnectError::MissingPath {
                option: option.to_string(),
            })
        }
    };
    let handle = connect_socket(path, max_frame_bytes)?;
    info!(session = %handle.session_id, peer = %handle.peer, "connected to controller");
    Ok(handle)
}

#[cfg(unix)]
fn connect_socket(path: &Path, max_frame_bytes: usize) -> Result<ConnectionHandle, ConnectError> {
    use std::os::unix::net::UnixStream;

    let stream = UnixStream::connect(path).map_err(|source| match source.kind() {
        ErrorKind::NotFound | ErrorKind::ConnectionRefused => ConnectError::NoListener {
            path: path.to_path_buf(),
            source,
        },
        ErrorKind::PermissionDenied => ConnectError::PermissionDenied {
            path: path.to_path_buf(),
        },
        _ => ConnectError::Io {
            path: path.to_path_buf(),
            source,
        },
    })?;
    Ok(ConnectionHandle::from_channel(
        stream,
        path.display().to_string(),
        max_frame_bytes,
    ))
}

#[cfg(not(unix))]
fn connect_socket(path: &Path, _max_frame_bytes: usize) -> Result<ConnectionHandle, ConnectError> {
    Err(ConnectError::Io {
        path: path.to_path_buf(),
        source: std::io::Error::new(ErrorKind::Unsupported, "local sockets are not supported on this platform"),
    })
}
