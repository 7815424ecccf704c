//! The RNDC handshake state machine.
//!
//! A [`Session`] pairs two packets with an authentication handshake: the
//! initiator sends a signed opening packet carrying a command, receives a
//! nonce-bearing challenge, echoes the nonce alongside the command, and
//! reads the result. The responder mirrors the exchange and refuses any
//! response whose nonce is not the one it issued.
//!
//! The session performs no I/O and never blocks. Every suspension point is
//! an [`Event`] handed to the caller: write these bytes, read a complete
//! packet, or stop with a result or an error. The caller resumes with
//! exactly one [`Session::next`] per `WantWrite`/`WantRead`. One session
//! executes one command; after `Done` or `Failed` it emits nothing more.
//!
//! ```text
//! client                                      server
//!   opening (command) ─────────────────────▶
//!                     ◀───── challenge (nonce)
//!   response (command + nonce echo) ───────▶
//!                     ◀───────── result (text)
//! ```

use std::time::{SystemTime, UNIX_EPOCH};

use thiserror::Error;
use tracing::{debug, trace};

use crate::auth::Key;
use crate::wire::{Packet, WireError};

/// Which end of the exchange this session plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Client,
    Server,
}

/// Coarse progress through the handshake.
///
/// `SentOpening` covers the first outbound packet of either role (the
/// client's opening, the server's challenge); `SentResponse` the second
/// (the client's nonce echo, the server's result).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Start,
    SentOpening,
    SentResponse,
    Done,
    Failed,
}

/// What the session needs from its driver next.
#[derive(Debug)]
pub enum Event {
    /// Transmit these bytes, then call `next(None)`.
    WantWrite(Vec<u8>),
    /// Read one complete packet, then call `next(Some(&buf))`.
    WantRead,
    /// Terminal success. Carries the response text for clients and the
    /// received command for servers.
    Finished(String),
    /// Terminal failure.
    Failed(SessionError),
}

/// Errors that move a session to [`SessionState::Failed`].
#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Wire(#[from] WireError),

    /// A command is required to open a client session.
    #[error("a command is required")]
    MissingCommand,

    /// The peer's packet lacked a field the handshake depends on.
    #[error("peer packet is missing {0}")]
    MissingField(&'static str),

    /// The response did not echo the nonce this session issued.
    #[error("nonce mismatch: issued {issued:?}, got {got:?}")]
    NonceMismatch { issued: String, got: String },

    /// The driver resumed the session out of step.
    #[error("invalid session step: {0}")]
    InvalidStep(&'static str),
}

/// Outstanding I/O the driver owes the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Pending {
    Write,
    Read,
}

/// A single-use handshake for one command.
pub struct Session {
    role: Role,
    state: SessionState,
    pending: Option<Pending>,
    key: Key,
    command: Option<String>,
    nonce: Option<Vec<u8>>,
    fixed_nonce: Option<u32>,
    reply: Option<String>,
    serial: u32,
}

impl Session {
    /// Create a client session that will execute `command`.
    ///
    /// # Errors
    ///
    /// Key problems ([`WireError::MissingKey`], [`WireError::BadKey`]) and
    /// [`SessionError::MissingCommand`] for an empty command.
    pub fn client(key: &str, command: &str) -> Result<Self, SessionError> {
        let key = Key::from_base64(key).map_err(SessionError::Wire)?;
        if command.is_empty() {
            return Err(SessionError::MissingCommand);
        }
        Ok(Self::with_role(Role::Client, key, Some(command.to_owned())))
    }

    /// Create a server session that will answer one exchange.
    ///
    /// # Errors
    ///
    /// Key problems ([`WireError::MissingKey`], [`WireError::BadKey`]).
    pub fn server(key: &str) -> Result<Self, SessionError> {
        let key = Key::from_base64(key).map_err(SessionError::Wire)?;
        Ok(Self::with_role(Role::Server, key, None))
    }

    fn with_role(role: Role, key: Key, command: Option<String>) -> Self {
        Self {
            role,
            state: SessionState::Start,
            pending: None,
            key,
            command,
            nonce: None,
            fixed_nonce: None,
            reply: None,
            // Random seed so serials do not restart from zero every session.
            serial: rand::random::<u32>() & 0x00ff_ffff,
        }
    }

    /// Use a fixed challenge nonce instead of a random one (server role).
    #[must_use]
    pub fn with_nonce(mut self, nonce: u32) -> Self {
        self.fixed_nonce = Some(nonce);
        self
    }

    /// Set the reply text the server role places in the result packet.
    #[must_use]
    pub fn with_reply(mut self, text: impl Into<String>) -> Self {
        self.reply = Some(text.into());
        self
    }

    #[must_use]
    pub fn role(&self) -> Role {
        self.role
    }

    #[must_use]
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// True once the session has reached `Done` or `Failed`.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        matches!(self.state, SessionState::Done | SessionState::Failed)
    }

    /// The command in flight: the configured one for clients, the one
    /// learned from the opening packet for servers.
    #[must_use]
    pub fn command(&self) -> Option<&str> {
        self.command.as_deref()
    }

    /// Enter the state machine and produce the first event.
    ///
    /// Returns `None` if the session already started.
    pub fn start(&mut self) -> Option<Event> {
        if self.state != SessionState::Start || self.pending.is_some() {
            return None;
        }
        Some(self.advance(None))
    }

    /// Resume after the previous event: `next(None)` acknowledges a
    /// `WantWrite`, `next(Some(buf))` answers a `WantRead` with one
    /// complete packet.
    ///
    /// Returns `None` once the session is terminal.
    pub fn next(&mut self, input: Option<&[u8]>) -> Option<Event> {
        if self.is_finished() {
            return None;
        }
        if self.state == SessionState::Start && self.pending.is_none() {
            return Some(self.fail(SessionError::InvalidStep("next() called before start()")));
        }
        Some(self.advance(input))
    }

    fn state_ordinal(state: SessionState) -> u8 {
        match state {
            SessionState::Start => 0,
            SessionState::SentOpening => 1,
            SessionState::SentResponse => 2,
            SessionState::Done | SessionState::Failed => 3,
        }
    }

    fn advance(&mut self, input: Option<&[u8]>) -> Event {
        let old = self.state;
        let event = match self.step(input) {
            Ok(event) => event,
            Err(err) => self.fail(err),
        };
        debug_assert!(
            Self::state_ordinal(self.state) >= Self::state_ordinal(old),
            "state regression: {old:?} -> {:?}",
            self.state
        );
        event
    }

    fn fail(&mut self, err: SessionError) -> Event {
        debug!(role = ?self.role, state = ?self.state, error = %err, "session failed");
        self.state = SessionState::Failed;
        self.pending = None;
        Event::Failed(err)
    }

    fn step(&mut self, input: Option<&[u8]>) -> Result<Event, SessionError> {
        use Pending::{Read, Write};
        use Role::{Client, Server};
        use SessionState::{SentOpening, SentResponse, Start};

        match (self.role, self.state, self.pending, input) {
            // Client: opening packet with the command, no nonce.
            (Client, Start, None, None) => {
                let bytes = self.build_opening()?.encode()?;
                trace!(len = bytes.len(), "client opening");
                self.state = SentOpening;
                self.pending = Some(Write);
                Ok(Event::WantWrite(bytes))
            }
            // Either role, either round: a completed write flips to a read,
            // except the server's final write which finishes the session.
            (Client, SentOpening | SentResponse, Some(Write), None)
            | (Server, SentOpening, Some(Write), None) => {
                self.pending = Some(Read);
                Ok(Event::WantRead)
            }
            // Client: challenge arrives; echo its nonce with the command.
            (Client, SentOpening, Some(Read), Some(buf)) => {
                let challenge = Packet::decode(buf, &self.key)?;
                let nonce = challenge
                    .nonce()
                    .ok_or(SessionError::MissingField("_ctrl._nonce"))?
                    .to_vec();
                trace!("challenge nonce received");
                let bytes = self.build_client_response(&nonce)?.encode()?;
                self.nonce = Some(nonce);
                self.state = SentResponse;
                self.pending = Some(Write);
                Ok(Event::WantWrite(bytes))
            }
            // Client: result arrives.
            (Client, SentResponse, Some(Read), Some(buf)) => {
                let result = Packet::decode(buf, &self.key)?;
                let text = result.result_text().unwrap_or_default().to_owned();
                self.state = SessionState::Done;
                self.pending = None;
                debug!(command = self.command.as_deref(), "command finished");
                Ok(Event::Finished(text))
            }
            // Server: wait for the opening packet.
            (Server, Start, None, None) => {
                self.pending = Some(Read);
                Ok(Event::WantRead)
            }
            // Server: opening arrives; issue a challenge nonce.
            (Server, Start, Some(Read), Some(buf)) => {
                let opening = Packet::decode(buf, &self.key)?;
                let command = opening
                    .data()
                    .get_str("type")
                    .ok_or(SessionError::MissingField("_data.type"))?
                    .to_owned();
                trace!(%command, "opening received");
                self.command = Some(command);
                let nonce = self.fixed_nonce.unwrap_or_else(rand::random);
                let bytes = self.build_challenge(nonce)?.encode()?;
                self.nonce = Some(nonce.to_string().into_bytes());
                self.state = SentOpening;
                self.pending = Some(Write);
                Ok(Event::WantWrite(bytes))
            }
            // Server: response arrives; the echoed nonce must match.
            (Server, SentOpening, Some(Read), Some(buf)) => {
                let response = Packet::decode(buf, &self.key)?;
                let got = response
                    .nonce()
                    .ok_or(SessionError::MissingField("_ctrl._nonce"))?;
                let issued = self
                    .nonce
                    .as_deref()
                    .ok_or(SessionError::InvalidStep("no nonce was issued"))?;
                if got != issued {
                    return Err(SessionError::NonceMismatch {
                        issued: String::from_utf8_lossy(issued).into_owned(),
                        got: String::from_utf8_lossy(got).into_owned(),
                    });
                }
                let bytes = self.build_result()?.encode()?;
                self.state = SentResponse;
                self.pending = Some(Write);
                Ok(Event::WantWrite(bytes))
            }
            // Server: result written; report the command that was served.
            (Server, SentResponse, Some(Write), None) => {
                let command = self.command.clone().unwrap_or_default();
                self.state = SessionState::Done;
                self.pending = None;
                debug!(%command, "exchange finished");
                Ok(Event::Finished(command))
            }
            (_, _, Some(Read), None) => Err(SessionError::InvalidStep(
                "next() without data while a read was pending",
            )),
            (_, _, Some(Write), Some(_)) => Err(SessionError::InvalidStep(
                "next() with data while a write was pending",
            )),
            _ => Err(SessionError::InvalidStep("state machine out of step")),
        }
    }

    /// A fresh packet with `_ctrl` stamped: serial, time, expiry.
    fn stamped(&mut self) -> Packet {
        let mut packet = Packet::with_key(self.key.clone());
        self.serial = self.serial.wrapping_add(1);
        let now = unix_time();
        let ctrl = packet.ctrl_mut();
        ctrl.insert("_ser", self.serial);
        ctrl.insert("_tim", now);
        ctrl.insert("_exp", now + 60);
        packet
    }

    fn build_opening(&mut self) -> Result<Packet, SessionError> {
        let command = self.command.clone().ok_or(SessionError::MissingCommand)?;
        let mut packet = self.stamped();
        packet.data_mut().insert("type", command);
        Ok(packet)
    }

    fn build_client_response(&mut self, nonce: &[u8]) -> Result<Packet, SessionError> {
        let mut packet = self.build_opening()?;
        packet.set_nonce_bytes(nonce);
        Ok(packet)
    }

    fn build_challenge(&mut self, nonce: u32) -> Result<Packet, SessionError> {
        let mut packet = self.stamped();
        packet.set_nonce(nonce);
        Ok(packet)
    }

    fn build_result(&mut self) -> Result<Packet, SessionError> {
        let reply = self.reply.clone().unwrap_or_default();
        let mut packet = self.stamped();
        packet.data_mut().insert("text", reply);
        Ok(packet)
    }
}

/// Seconds since the Unix epoch, zero if the clock is before it.
fn unix_time() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}
