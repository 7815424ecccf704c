//! Shared builders for unit and integration tests.
#![allow(dead_code)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::must_use_candidate)]

use crate::auth::Key;
use crate::session::Session;
use crate::wire::Packet;

/// The Base64 secret used throughout the test suite.
pub const TEST_KEY: &str = "aabc";

/// Decoded form of [`TEST_KEY`].
pub fn mk_key() -> Key {
    Key::from_base64(TEST_KEY).unwrap()
}

/// An empty packet signed with the test key.
pub fn mk_packet() -> Packet {
    Packet::new(TEST_KEY).unwrap()
}

/// An encoded command packet, as a client would open with.
pub fn mk_opening(command: &str) -> Vec<u8> {
    let mut p = mk_packet();
    p.data_mut().insert("type", command);
    p.encode().unwrap()
}

/// A client session for `command` using the test key.
pub fn mk_client(command: &str) -> Session {
    Session::client(TEST_KEY, command).unwrap()
}

/// A server session with a fixed nonce and reply using the test key.
pub fn mk_server(nonce: u32, reply: &str) -> Session {
    Session::server(TEST_KEY)
        .unwrap()
        .with_nonce(nonce)
        .with_reply(reply)
}
