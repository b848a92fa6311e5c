//! Controller side of the bridge protocol.
//!
//! The controller owns the socket: it binds a listener, launches the
//! simulator with `+socket+<path>`, and accepts the bridge's connection.
//! [`Controller`] then drives the simulation one command at a time.

use std::io::ErrorKind;
use std::os::unix::net::UnixListener;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};
use uuid::Uuid;

use crate::connection::ConnectionHandle;
use crate::error::{BridgeResult, ConnectionError, ProtocolError};
use crate::protocol::{frame, Command, Operation, Response, DEFAULT_MAX_FRAME_BYTES};

/// Listening socket for one bridge connection.
///
/// Dropping the listener removes the socket file.
#[derive(Debug)]
pub struct ControllerListener {
    listener: UnixListener,
    path: PathBuf,
}

impl ControllerListener {
    /// Binds a listener at `path`, replacing a stale socket file.
    ///
    /// # Errors
    /// `ConnectionError::ConnectFailed` if the socket cannot be bound.
    pub fn bind(path: impl AsRef<Path>) -> Result<Self, ConnectionError> {
        let path = path.as_ref().to_path_buf();
        match std::fs::remove_file(&path) {
            Ok(()) => warn!(path = %path.display(), "removed stale socket file"),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => {
                return Err(ConnectionError::ConnectFailed {
                    message: format!("{}: {e}", path.display()),
                })
            }
        }
        let listener = UnixListener::bind(&path).map_err(|e| ConnectionError::ConnectFailed {
            message: format!("bind {}: {e}", path.display()),
        })?;
        Ok(Self { listener, path })
    }

    /// Socket path to hand to the simulator.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The plus-arg that points the simulator at this listener.
    #[must_use]
    pub fn plus_arg(&self) -> String {
        format!("+socket+{}", self.path.display())
    }

    /// Blocks until the bridge connects.
    ///
    /// # Errors
    /// `ConnectionError::ConnectFailed` if accept fails.
    pub fn accept(&self) -> Result<Controller, ConnectionError> {
        let (stream, _) = self.listener.accept().map_err(|e| ConnectionError::ConnectFailed {
            message: format!("accept: {e}"),
        })?;
        debug!(path = %self.path.display(), "bridge connected");
        Ok(Controller {
            handle: ConnectionHandle::from_channel(stream, self.path.display().to_string(), DEFAULT_MAX_FRAME_BYTES),
        })
    }
}

impl Drop for ControllerListener {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            if e.kind() != ErrorKind::NotFound {
                warn!(path = %self.path.display(), error = %e, "failed to remove socket file");
            }
        }
    }
}

/// Connected controller.
#[derive(Debug)]
pub struct Controller {
    handle: ConnectionHandle,
}

impl Controller {
    /// Sends one command and returns its request id.
    ///
    /// # Errors
    /// Connection or encoding failures.
    pub fn send(&mut self, op: Operation) -> BridgeResult<Uuid> {
        let cmd = Command::new(op);
        let bytes = frame::encode(&cmd, DEFAULT_MAX_FRAME_BYTES)?;
        self.handle.write_frame(&bytes)?;
        Ok(cmd.request_id)
    }

    /// Writes raw bytes, framed or not.
    ///
    /// # Errors
    /// Connection failures.
    pub fn send_raw(&mut self, bytes: &[u8]) -> Result<(), ConnectionError> {
        self.handle.write_frame(bytes)
    }

    /// Receives the next response, or `None` if the bridge hung up.
    ///
    /// # Errors
    /// Connection failures or an undecodable frame.
    pub fn recv(&mut self) -> BridgeResult<Option<Response>> {
        match self.handle.read_frame()? {
            Some(bytes) => Ok(Some(frame::decode(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Sends a command and waits for its response.
    ///
    /// # Errors
    /// Connection failures, a hang-up, or a response for another request.
    pub fn call(&mut self, op: Operation) -> BridgeResult<Response> {
        let request_id = self.send(op)?;
        let resp = self.recv()?.ok_or(ConnectionError::Closed)?;
        if resp.request_id != request_id {
            return Err(ProtocolError::Malformed {
                message: format!("response for {} while waiting for {request_id}", resp.request_id),
            }
            .into());
        }
        Ok(resp)
    }

    /// Closes the connection.
    pub fn close(&mut self) {
        self.handle.close();
    }
}
