//! RNDC v1 wire format.
//!
//! An RNDC packet is a length-prefixed, versioned "table of named values":
//!
//! ```text
//! packet     := length:u32_be body:byte[length]
//! body       := version:u32_be table_body
//! table_body := entry*                      (until end of enclosing scope)
//! entry      := klen:u8 key:byte[klen] value
//! value      := type:u8 vlen:u32_be payload:byte[vlen]
//! ```
//!
//! Type byte 1 is a binary string, 2 a nested table, 3 a list of bare
//! values. All integers are network byte order; integers carried as data
//! (version, nonce, serial, timestamps) travel as decimal ASCII strings.
//!
//! The first entry of every body is `_auth`, a table holding the single key
//! `hmd5` whose 88-byte payload is the signature slot: an `'A'` algorithm
//! tag, 22 characters of Base64 HMAC-MD5 digest, and 65 bytes of zero
//! padding. The digest covers every byte after the slot, so the `_auth`
//! section occupies a fixed range at the start of the packet.
//!
//! Decoding is strict: the length prefix must match the buffer exactly, the
//! version must be 1, table keys must be unique, and unknown type bytes are
//! rejected.

mod packet;
mod value;

pub use packet::Packet;
pub use value::{Table, Value};

use thiserror::Error;

/// The only protocol version this crate speaks.
pub const VERSION: u32 = 1;

/// Default RNDC control channel port.
pub const DEFAULT_PORT: u16 = 953;

/// Upper bound on a single packet, enforced on decode and by the client's
/// length-prefix reader.
pub const MAX_PACKET_LEN: usize = 1 << 20;

/// Length of the `_auth.hmd5` payload: tag + digest + zero padding.
pub const SIG_SLOT_LEN: usize = 88;

/// Length of the Base64 HMAC-MD5 digest with its `==` padding stripped.
pub const SIG_DIGEST_LEN: usize = 22;

/// Nesting limit for decoded tables and lists.
pub(crate) const MAX_DEPTH: usize = 16;

/// Longest key the 1-byte key-length field can carry.
pub(crate) const MAX_KEY_LEN: usize = 255;

pub(crate) const AUTH_KEY: &str = "_auth";
pub(crate) const HMD5_KEY: &str = "hmd5";
pub(crate) const CTRL_KEY: &str = "_ctrl";
pub(crate) const DATA_KEY: &str = "_data";
pub(crate) const NONCE_KEY: &str = "_nonce";

/// Byte offset of the signature slot payload within an encoded packet.
///
/// length(4) + version(4) + `_auth` entry header(11) + `hmd5` entry
/// header(10).
pub(crate) const SIG_SLOT_OFFSET: usize = 29;

/// Byte offset of the first signed byte: the key-length byte of the entry
/// following `_auth`.
pub(crate) const SIGNED_REGION_OFFSET: usize = SIG_SLOT_OFFSET + SIG_SLOT_LEN;

/// Errors produced by the packet codec.
#[derive(Debug, Error)]
pub enum WireError {
    /// A key is required and none was supplied.
    #[error("key is required")]
    MissingKey,

    /// The key was not valid Base64.
    #[error("key is not valid base64: {0}")]
    BadKey(#[from] base64::DecodeError),

    /// The buffer ended in the middle of an entry.
    #[error("packet truncated: wanted {wanted} more bytes at offset {offset}")]
    ShortRead { offset: usize, wanted: usize },

    /// Bytes remained after the structure the length fields described.
    #[error("{0} trailing bytes after packet end")]
    TrailingData(usize),

    /// The version field was not 1.
    #[error("unsupported protocol version {0}, expected 1")]
    BadMagic(u32),

    /// The packet did not open with a well-formed `_auth.hmd5` section.
    #[error("malformed authentication section: {0}")]
    BadAuth(&'static str),

    /// The HMAC-MD5 digest did not match the packet contents.
    #[error("signature verification failed")]
    BadSignature,

    /// A table carried the same key twice.
    #[error("duplicate table key {0:?}")]
    DuplicateKey(String),

    /// An unrecognized wire type byte.
    #[error("unknown data type 0x{0:02x}")]
    UnknownDataType(u8),

    /// A table key was not ASCII.
    #[error("table key is not ASCII")]
    BadTableKey,

    /// A table key longer than the 1-byte length field allows.
    #[error("table key {0:?} exceeds 255 bytes")]
    KeyTooLong(String),

    /// A value too large for its u32 length field.
    #[error("value of {0} bytes exceeds the u32 length field")]
    ValueTooLarge(usize),

    /// A packet larger than [`MAX_PACKET_LEN`].
    #[error("packet of {0} bytes exceeds the size cap")]
    PacketTooLarge(usize),

    /// Tables or lists nested past the decoder's depth limit.
    #[error("value nesting exceeds the depth limit")]
    DepthLimit,
}
