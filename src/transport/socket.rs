//! Unix-socket [`Transport`] implementation.
//!
//! The primary binds a Unix stream socket next to the other per-user runtime
//! files.  A secondary instance connects, writes its payload and closes the
//! connection.
//!
//! # Wire format
//!
//! One connection carries exactly one message: the encoded payload followed
//! by `\n`.  Encoded payloads never contain a raw newline (see
//! [`codec`](crate::codec)), so the newline unambiguously ends the message.
//!
//! ```text
//! /usr/bin/soloinst : /home/me/bracket.stl\n
//! ```

use crate::lock::normalize_version;
use crate::traits::{Delivery, Receiver, Transport};
use log::{debug, error, info};
use std::io::{self, Read, Write};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

/// Longest message accepted from a single connection, in bytes.
const MAX_MESSAGE_LEN: usize = 1 << 20;

/// How long an accepted client gets to deliver its whole message.
const CONNECTION_DEADLINE: Duration = Duration::from_millis(200);

/// Upper bound on the time spent in one dispatch pass.
const PASS_BUDGET: Duration = Duration::from_millis(500);

/// Connections accepted per dispatch pass; the rest wait in the backlog.
const MAX_CONNECTIONS_PER_PASS: usize = 32;

/// Directory for per-user runtime files (`$XDG_RUNTIME_DIR`, or the temp
/// directory where that does not exist).
pub fn default_runtime_dir() -> PathBuf {
    dirs::runtime_dir().unwrap_or_else(std::env::temp_dir)
}

/// A [`Transport`] over a Unix stream socket.
#[derive(Debug, Clone)]
pub struct SocketTransport {
    path: PathBuf,
}

/// Errors produced by the Unix socket transport.
#[derive(Debug, thiserror::Error)]
pub enum SocketTransportError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("payload contains a raw newline")]
    Framing,
}

impl SocketTransport {
    /// Create a transport using the socket at `path`.
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    /// Socket for `app_name` at `version` inside `runtime_dir`, keyed the
    /// same way as the instance lock.
    pub fn for_instance(runtime_dir: &Path, app_name: &str, version: &str) -> Self {
        Self::new(runtime_dir.join(format!(
            "{}-{}.sock",
            app_name,
            normalize_version(version)
        )))
    }

    /// The filesystem path of the socket.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Transport for SocketTransport {
    type Error = SocketTransportError;
    type Peer = UnixStream;
    type Receiver = SocketReceiver;

    fn delivery(&self) -> Delivery {
        Delivery::Push
    }

    fn locate_primary(&self) -> Result<Option<UnixStream>, Self::Error> {
        match UnixStream::connect(&self.path) {
            Ok(stream) => Ok(Some(stream)),
            Err(e)
                if matches!(
                    e.kind(),
                    io::ErrorKind::NotFound | io::ErrorKind::ConnectionRefused
                ) =>
            {
                debug!("no primary listening on {}: {}", self.path.display(), e);
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    fn deliver_message(&self, mut peer: UnixStream, payload: &str) -> Result<(), Self::Error> {
        if payload.contains('\n') {
            return Err(SocketTransportError::Framing);
        }
        let mut frame = String::with_capacity(payload.len() + 1);
        frame.push_str(payload);
        frame.push('\n');
        peer.write_all(frame.as_bytes())?;
        peer.shutdown(std::net::Shutdown::Write)?;
        Ok(())
    }

    /// Bind the socket and switch it to non-blocking accepts.
    ///
    /// Any socket file already at the path is removed first: only the lock
    /// holder calls this, so a leftover file belongs to a dead primary.
    fn receive_messages(&self) -> Result<SocketReceiver, Self::Error> {
        let _ = std::fs::remove_file(&self.path);
        if let Some(dir) = self.path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        let listener = UnixListener::bind(&self.path)?;
        listener.set_nonblocking(true)?;
        info!("listening on {}", self.path.display());
        Ok(SocketReceiver {
            listener,
            path: self.path.clone(),
        })
    }
}

/// The bound end of a [`SocketTransport`].  Removes the socket file when
/// dropped.
#[derive(Debug)]
pub struct SocketReceiver {
    listener: UnixListener,
    path: PathBuf,
}

impl Receiver for SocketReceiver {
    type Error = SocketTransportError;

    fn dispatch(&mut self, handler: &mut dyn FnMut(String)) -> Result<usize, Self::Error> {
        let mut handled = 0;
        let pass_deadline = Instant::now() + PASS_BUDGET;
        let mut accepted = 0;
        while accepted < MAX_CONNECTIONS_PER_PASS {
            if Instant::now() >= pass_deadline {
                debug!("dispatch pass budget used up");
                break;
            }
            match self.listener.accept() {
                Ok((stream, _)) => {
                    debug!("client connected");
                    accepted += 1;
                    let deadline = (Instant::now() + CONNECTION_DEADLINE).min(pass_deadline);
                    match read_message(stream, deadline) {
                        Ok(Some(message)) => {
                            handler(message);
                            handled += 1;
                        }
                        Ok(None) => debug!("client sent nothing"),
                        Err(e) => error!("read error: {}", e),
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Ok(handled)
    }
}

impl Drop for SocketReceiver {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

/// Read the single newline-terminated message of one connection.
///
/// Gives up with `TimedOut` once `deadline` passes, however the client
/// paces its writes.  A connection closed before sending anything yields
/// `None`.
fn read_message(mut stream: UnixStream, deadline: Instant) -> io::Result<Option<String>> {
    // Some platforms hand out accepted sockets in the listener's
    // non-blocking mode.
    stream.set_nonblocking(false)?;
    let mut message = Vec::new();
    let mut chunk = [0u8; 4096];
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(io::Error::new(
                io::ErrorKind::TimedOut,
                "client did not finish its message in time",
            ));
        }
        stream.set_read_timeout(Some(remaining))?;
        let n = match stream.read(&mut chunk) {
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        if n == 0 {
            if message.is_empty() {
                return Ok(None);
            }
            break;
        }
        message.extend_from_slice(&chunk[..n]);
        if let Some(end) = message.iter().position(|&b| b == b'\n') {
            message.truncate(end);
            break;
        }
        if message.len() > MAX_MESSAGE_LEN {
            return Err(io::Error::new(io::ErrorKind::InvalidData, "message too long"));
        }
    }
    String::from_utf8(message)
        .map(Some)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}

//  Tests
