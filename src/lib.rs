//! Client and server plumbing for the BIND remote name daemon control
//! protocol, version 1 (HMAC-MD5).
//!
//! Three layers, leaves first:
//!
//! * [`wire`] — the packet codec: a length-prefixed, recursively typed
//!   "table of named values" with a fixed HMAC-MD5 signature slot.
//! * [`session`] — a pure, single-use state machine pairing the challenge
//!   and response packets of one command. It holds no sockets and performs
//!   no I/O; drivers act on the [`Event`]s it emits, which makes the same
//!   core usable from blocking, async, and server-side code.
//! * [`client`] — a convenience blocking TCP wrapper around a client-role
//!   session.
//!
//! ```no_run
//! # fn main() -> Result<(), rndc::ClientError> {
//! let client = rndc::Client::new("ns1.example.com", "bWFueSBzZWNyZXRz")?;
//! let reply = client.command("reload example.com")?;
//! println!("{reply}");
//! # Ok(())
//! # }
//! ```

pub mod auth;
pub mod client;
pub mod session;
pub mod wire;

#[doc(hidden)]
pub mod test_support;

pub use auth::Key;
pub use client::{read_packet, CallOpts, Client, ClientError};
pub use session::{Event, Role, Session, SessionError, SessionState};
pub use wire::{Packet, Table, Value, WireError, DEFAULT_PORT};
