//! Blocking TCP client for the RNDC control channel.

use std::io::{Read, Write};
use std::net::TcpStream;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, trace};

use crate::session::{Event, Session, SessionError};
use crate::wire::{WireError, DEFAULT_PORT, MAX_PACKET_LEN};

/// Errors surfaced by [`Client`].
#[derive(Debug, Error)]
pub enum ClientError {
    /// A host is required and none was supplied.
    #[error("a host is required")]
    MissingHost,

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error("connection error: {0}")]
    Io(#[from] std::io::Error),

    /// The session stopped emitting events without finishing.
    #[error("session ended without a result")]
    NoResult,
}

/// Per-call overrides for [`Client::command_with`].
#[derive(Debug, Clone, Default)]
pub struct CallOpts {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub key: Option<String>,
}

/// A reusable handle for issuing commands to a name server.
///
/// Each call opens a fresh TCP connection, runs one [`Session`] to
/// completion, and returns the server's reply text.
///
/// ```no_run
/// use rndc::Client;
///
/// # fn main() -> Result<(), rndc::ClientError> {
/// let client = Client::new("127.0.0.1", "c2VjcmV0c2VjcmV0")?;
/// let status = client.command("status")?;
/// println!("{status}");
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct Client {
    host: String,
    port: u16,
    key: String,
    timeout: Option<Duration>,
}

impl Client {
    /// Create a client for `host` with a Base64 secret.
    ///
    /// The key is validated eagerly; the port defaults to 953.
    ///
    /// # Errors
    ///
    /// [`ClientError::MissingHost`] for an empty host, key errors via
    /// [`SessionError`].
    pub fn new(host: impl Into<String>, key: impl Into<String>) -> Result<Self, ClientError> {
        let host = host.into();
        if host.is_empty() {
            return Err(ClientError::MissingHost);
        }
        let key = key.into();
        crate::Key::from_base64(&key).map_err(SessionError::Wire)?;
        Ok(Self {
            host,
            port: DEFAULT_PORT,
            key,
            timeout: None,
        })
    }

    /// Override the control channel port.
    #[must_use]
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Apply a read and write timeout to the underlying socket.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Execute one command and return the server's reply text.
    ///
    /// # Errors
    ///
    /// I/O failures, or a [`SessionError`] if the exchange could not be
    /// authenticated or completed.
    pub fn command(&self, command: &str) -> Result<String, ClientError> {
        self.command_with(command, CallOpts::default())
    }

    /// Execute one command with per-call host/port/key overrides.
    ///
    /// # Errors
    ///
    /// As [`Client::command`].
    pub fn command_with(&self, command: &str, opts: CallOpts) -> Result<String, ClientError> {
        let host = opts.host.as_deref().unwrap_or(&self.host);
        let port = opts.port.unwrap_or(self.port);
        let key = opts.key.as_deref().unwrap_or(&self.key);

        let mut session = Session::client(key, command)?;
        let addr = format!("{host}:{port}");
        debug!(%addr, %command, "connecting");
        let mut stream = TcpStream::connect(&addr)?;
        stream.set_read_timeout(self.timeout)?;
        stream.set_write_timeout(self.timeout)?;

        let mut event = session.start();
        loop {
            match event {
                Some(Event::WantWrite(bytes)) => {
                    stream.write_all(&bytes)?;
                    trace!(len = bytes.len(), "packet sent");
                    event = session.next(None);
                }
                Some(Event::WantRead) => {
                    let buf = read_packet(&mut stream)?;
                    trace!(len = buf.len(), "packet received");
                    event = session.next(Some(&buf));
                }
                Some(Event::Finished(text)) => {
                    debug!(%command, "command finished");
                    return Ok(text);
                }
                Some(Event::Failed(err)) => return Err(err.into()),
                None => return Err(ClientError::NoResult),
            }
        }
    }
}

/// Read one length-prefixed packet, prefix included, from a byte stream.
///
/// The session consumes complete packets only; this is the reassembly
/// layer between a stream transport and [`Session::next`].
///
/// # Errors
///
/// I/O failures (including an unexpected EOF mid-packet), or
/// [`WireError::PacketTooLarge`] when the prefix exceeds the size cap.
pub fn read_packet<R: Read>(stream: &mut R) -> Result<Vec<u8>, ClientError> {
    let mut prefix = [0u8; 4];
    stream.read_exact(&mut prefix)?;
    let len = u32::from_be_bytes(prefix) as usize;
    if len > MAX_PACKET_LEN {
        return Err(SessionError::Wire(WireError::PacketTooLarge(len)).into());
    }
    let mut buf = vec![0u8; 4 + len];
    buf[..4].copy_from_slice(&prefix);
    stream.read_exact(&mut buf[4..])?;
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn new_requires_host_and_key() {
        assert!(matches!(
            Client::new("", "aabc"),
            Err(ClientError::MissingHost)
        ));
        assert!(matches!(
            Client::new("localhost", ""),
            Err(ClientError::Session(SessionError::Wire(
                WireError::MissingKey
            )))
        ));
    }

    #[test]
    fn default_port_is_953() {
        let client = Client::new("localhost", "aabc").unwrap();
        assert_eq!(client.port, 953);
        assert_eq!(client.with_port(8953).port, 8953);
    }

    #[test]
    fn read_packet_reassembles_by_prefix() {
        let mut framed = 3u32.to_be_bytes().to_vec();
        framed.extend_from_slice(b"abc");
        framed.extend_from_slice(b"next packet");
        let mut cursor = Cursor::new(framed);
        let packet = read_packet(&mut cursor).unwrap();
        assert_eq!(&packet[..4], &3u32.to_be_bytes());
        assert_eq!(&packet[4..], b"abc");
        assert_eq!(cursor.position(), 7);
    }

    #[test]
    fn read_packet_rejects_oversized_prefix() {
        let framed = u32::MAX.to_be_bytes();
        let mut cursor = Cursor::new(framed.to_vec());
        assert!(matches!(
            read_packet(&mut cursor),
            Err(ClientError::Session(SessionError::Wire(
                WireError::PacketTooLarge(_)
            )))
        ));
    }

    #[test]
    fn read_packet_propagates_truncation() {
        let mut framed = 10u32.to_be_bytes().to_vec();
        framed.extend_from_slice(b"short");
        let mut cursor = Cursor::new(framed);
        assert!(matches!(read_packet(&mut cursor), Err(ClientError::Io(_))));
    }
}
