//! Packet assembly, signing, and verification.

use super::value::{decode_table_body, encode_entry, encode_table_body, Reader, TYPE_BYTES, TYPE_TABLE};
use super::{
    Table, Value, WireError, AUTH_KEY, CTRL_KEY, DATA_KEY, HMD5_KEY, MAX_DEPTH, MAX_PACKET_LEN,
    NONCE_KEY, SIGNED_REGION_OFFSET, SIG_DIGEST_LEN, SIG_SLOT_LEN, SIG_SLOT_OFFSET, VERSION,
};
use crate::auth::Key;

static EMPTY_TABLE: Table = Table::new();

/// One RNDC control packet.
///
/// The body is an ordered [`Table`] conventionally holding two sub-tables:
/// `_ctrl` (serial, timestamps, nonce) and `_data` (the command or the
/// server's reply). The `_auth` signature entry is synthesized during
/// [`Packet::encode`] and consumed during [`Packet::decode`]; it never
/// appears in [`Packet::body`].
#[derive(Debug, Clone)]
pub struct Packet {
    key: Key,
    version: u32,
    body: Table,
}

impl Packet {
    /// Create an empty packet signed with the given Base64 key.
    ///
    /// The body starts with empty `_ctrl` and `_data` sub-tables and
    /// version 1.
    ///
    /// # Errors
    ///
    /// [`WireError::MissingKey`] for an empty key, [`WireError::BadKey`]
    /// for malformed Base64.
    pub fn new(key: &str) -> Result<Self, WireError> {
        Ok(Self::with_key(Key::from_base64(key)?))
    }

    /// Create an empty packet from an already-decoded [`Key`].
    #[must_use]
    pub fn with_key(key: Key) -> Self {
        let mut body = Table::new();
        body.insert(CTRL_KEY, Table::new());
        body.insert(DATA_KEY, Table::new());
        Self {
            key,
            version: VERSION,
            body,
        }
    }

    /// Protocol version carried by the packet.
    #[must_use]
    pub fn version(&self) -> u32 {
        self.version
    }

    /// The full top-level table (without `_auth`).
    #[must_use]
    pub fn body(&self) -> &Table {
        &self.body
    }

    /// The `_ctrl` control sub-table.
    #[must_use]
    pub fn ctrl(&self) -> &Table {
        self.body.get_table(CTRL_KEY).unwrap_or(&EMPTY_TABLE)
    }

    pub fn ctrl_mut(&mut self) -> &mut Table {
        self.body.subtable_mut(CTRL_KEY)
    }

    /// The `_data` payload sub-table.
    #[must_use]
    pub fn data(&self) -> &Table {
        self.body.get_table(DATA_KEY).unwrap_or(&EMPTY_TABLE)
    }

    pub fn data_mut(&mut self) -> &mut Table {
        self.body.subtable_mut(DATA_KEY)
    }

    /// Raw bytes of `_ctrl._nonce`, exactly as they appeared on the wire.
    #[must_use]
    pub fn nonce(&self) -> Option<&[u8]> {
        self.ctrl().get_bytes(NONCE_KEY)
    }

    /// `_ctrl._nonce` parsed as a decimal integer.
    #[must_use]
    pub fn nonce_u32(&self) -> Option<u32> {
        self.ctrl().get_u32(NONCE_KEY)
    }

    /// Store an integer nonce as decimal ASCII under `_ctrl._nonce`.
    pub fn set_nonce(&mut self, nonce: u32) {
        self.ctrl_mut().insert(NONCE_KEY, nonce);
    }

    /// Echo nonce bytes verbatim under `_ctrl._nonce`.
    pub fn set_nonce_bytes(&mut self, raw: &[u8]) {
        self.ctrl_mut().insert(NONCE_KEY, raw);
    }

    /// The server's reply text at `_data.text`.
    #[must_use]
    pub fn text(&self) -> Option<&str> {
        self.data().get_str("text")
    }

    /// The server's error text at `_data.err`.
    #[must_use]
    pub fn err(&self) -> Option<&str> {
        self.data().get_str("err")
    }

    /// Reply text with `_data.text` preferred over `_data.err`.
    #[must_use]
    pub fn result_text(&self) -> Option<&str> {
        self.text().or_else(|| self.err())
    }

    /// Serialize and sign the packet.
    ///
    /// The body is emitted with the 88-byte signature slot zero-filled,
    /// the HMAC-MD5 of everything after the slot is computed, and the
    /// tagged digest is written back into the slot. Encoding equal packets
    /// yields equal bytes.
    ///
    /// # Errors
    ///
    /// Propagates table encoding failures; [`WireError::PacketTooLarge`]
    /// if the result would exceed the size cap.
    pub fn encode(&self) -> Result<Vec<u8>, WireError> {
        let mut out = Vec::with_capacity(256);
        out.extend_from_slice(&[0u8; 4]);
        out.extend_from_slice(&self.version.to_be_bytes());

        let mut auth = Table::new();
        auth.insert(HMD5_KEY, vec![0u8; SIG_SLOT_LEN]);
        let auth = Value::Table(auth);
        encode_entry(&mut out, AUTH_KEY, &auth)?;
        debug_assert_eq!(out.len(), SIGNED_REGION_OFFSET, "_auth section drifted");

        encode_table_body(&mut out, &self.body)?;

        if out.len() > MAX_PACKET_LEN {
            return Err(WireError::PacketTooLarge(out.len()));
        }
        let body_len = (out.len() - 4) as u32;
        out[..4].copy_from_slice(&body_len.to_be_bytes());

        let digest = self.key.sign(&out[SIGNED_REGION_OFFSET..]);
        let slot = &mut out[SIG_SLOT_OFFSET..SIG_SLOT_OFFSET + SIG_SLOT_LEN];
        slot[0] = b'A';
        slot[1..=SIG_DIGEST_LEN].copy_from_slice(&digest);
        Ok(out)
    }

    /// Parse and verify a complete packet.
    ///
    /// The signature is checked before the remainder of the body is
    /// parsed, so a tampered packet fails with [`WireError::BadSignature`]
    /// regardless of what was altered past the slot.
    ///
    /// # Errors
    ///
    /// * [`WireError::ShortRead`] / [`WireError::TrailingData`] when the
    ///   buffer does not match its length prefix.
    /// * [`WireError::BadMagic`] for any version other than 1.
    /// * [`WireError::BadAuth`] when the `_auth.hmd5` section is malformed.
    /// * [`WireError::BadSignature`] when the digest does not match.
    /// * Table decoding errors for the rest of the body.
    pub fn decode(bytes: &[u8], key: &Key) -> Result<Self, WireError> {
        let mut r = Reader::new(bytes);
        let declared = r.u32_be()? as usize;
        if declared > MAX_PACKET_LEN {
            return Err(WireError::PacketTooLarge(declared));
        }
        let present = bytes.len() - 4;
        if declared > present {
            return Err(WireError::ShortRead {
                offset: bytes.len(),
                wanted: declared - present,
            });
        }
        if declared < present {
            return Err(WireError::TrailingData(present - declared));
        }

        let version = r.u32_be()?;
        if version != VERSION {
            return Err(WireError::BadMagic(version));
        }

        let digest = Self::read_auth(&mut r)?;
        debug_assert_eq!(r.pos(), SIGNED_REGION_OFFSET, "_auth section drifted");
        key.verify(&bytes[SIGNED_REGION_OFFSET..], &digest)?;

        let body = decode_table_body(&mut r, MAX_DEPTH)?;
        Ok(Self {
            key: key.clone(),
            version,
            body,
        })
    }

    /// Consume the leading `_auth` entry and return the 22-byte digest.
    fn read_auth(r: &mut Reader<'_>) -> Result<[u8; SIG_DIGEST_LEN], WireError> {
        let klen = r.u8()? as usize;
        if r.take(klen)? != AUTH_KEY.as_bytes() {
            return Err(WireError::BadAuth("first entry is not _auth"));
        }
        if r.u8()? != TYPE_TABLE {
            return Err(WireError::BadAuth("_auth is not a table"));
        }
        let auth_len = r.u32_be()? as usize;
        let mut auth = Reader::new(r.take(auth_len)?);

        let klen = auth.u8()? as usize;
        if auth.take(klen)? != HMD5_KEY.as_bytes() {
            return Err(WireError::BadAuth("_auth entry is not hmd5"));
        }
        if auth.u8()? != TYPE_BYTES {
            return Err(WireError::BadAuth("hmd5 is not a binary string"));
        }
        if auth.u32_be()? as usize != SIG_SLOT_LEN {
            return Err(WireError::BadAuth("signature slot has the wrong length"));
        }
        let slot = auth.take(SIG_SLOT_LEN)?;
        if !auth.is_empty() {
            return Err(WireError::BadAuth("unexpected entries after hmd5"));
        }
        if slot[0] != b'A' {
            return Err(WireError::BadAuth("unknown algorithm tag"));
        }
        let mut digest = [0u8; SIG_DIGEST_LEN];
        digest.copy_from_slice(&slot[1..=SIG_DIGEST_LEN]);
        Ok(digest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: &str = "aabc";

    fn key() -> Key {
        Key::from_base64(KEY).unwrap()
    }

    #[test]
    fn minimal_packet_shape() {
        let p = Packet::new(KEY).unwrap();
        assert_eq!(p.version(), 1);
        assert!(p.ctrl().is_empty());
        assert!(p.data().is_empty());
        assert!(p.nonce().is_none());
    }

    #[test]
    fn nonce_is_decimal_ascii() {
        let mut p = Packet::new(KEY).unwrap();
        p.set_nonce(121);
        assert_eq!(p.ctrl().get_bytes("_nonce"), Some(&b"121"[..]));
        assert_eq!(p.nonce_u32(), Some(121));
    }

    #[test]
    fn missing_key_rejected() {
        assert!(matches!(Packet::new(""), Err(WireError::MissingKey)));
        assert!(matches!(Packet::new("   "), Err(WireError::MissingKey)));
    }

    #[test]
    fn malformed_key_rejected() {
        assert!(matches!(Packet::new("not base64!"), Err(WireError::BadKey(_))));
    }

    #[test]
    fn signature_slot_layout() {
        let mut p = Packet::new(KEY).unwrap();
        p.data_mut().insert("type", "status");
        let bytes = p.encode().unwrap();

        // length prefix covers everything after itself
        let declared = u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as usize;
        assert_eq!(declared, bytes.len() - 4);
        // version 1
        assert_eq!(&bytes[4..8], &[0, 0, 0, 1]);
        // _auth entry header
        assert_eq!(bytes[8], 5);
        assert_eq!(&bytes[9..14], b"_auth");
        // algorithm tag, digest, zero padding
        assert_eq!(bytes[SIG_SLOT_OFFSET], b'A');
        let digest = &bytes[SIG_SLOT_OFFSET + 1..SIG_SLOT_OFFSET + 1 + SIG_DIGEST_LEN];
        assert!(digest.iter().all(|b| b.is_ascii_alphanumeric() || *b == b'+' || *b == b'/'));
        let padding = &bytes[SIG_SLOT_OFFSET + 1 + SIG_DIGEST_LEN..SIGNED_REGION_OFFSET];
        assert!(padding.iter().all(|b| *b == 0));

        // zeroing the slot and re-signing reproduces the digest
        let resigned = key().sign(&bytes[SIGNED_REGION_OFFSET..]);
        assert_eq!(&resigned[..], digest);
    }

    #[test]
    fn encode_is_deterministic() {
        let mut p = Packet::new(KEY).unwrap();
        p.data_mut().insert("type", "reload example.com");
        p.set_nonce(7);
        assert_eq!(p.encode().unwrap(), p.encode().unwrap());
    }

    #[test]
    fn round_trip_preserves_body() {
        let mut p = Packet::new(KEY).unwrap();
        p.data_mut().insert("type", "status");
        let bytes = p.encode().unwrap();
        let back = Packet::decode(&bytes, &key()).unwrap();
        assert_eq!(back.version(), 1);
        assert_eq!(back.data().get_str("type"), Some("status"));
        assert_eq!(back.body(), p.body());
    }

    #[test]
    fn wrong_key_is_bad_signature() {
        let mut p = Packet::new(KEY).unwrap();
        p.data_mut().insert("type", "status");
        let bytes = p.encode().unwrap();
        let other = Key::from_base64("AAAA").unwrap();
        assert!(matches!(
            Packet::decode(&bytes, &other),
            Err(WireError::BadSignature)
        ));
    }

    #[test]
    fn tamper_outside_slot_is_bad_signature() {
        let mut p = Packet::new(KEY).unwrap();
        p.data_mut().insert("type", "status");
        let mut bytes = p.encode().unwrap();
        let at = SIGNED_REGION_OFFSET + 3;
        bytes[at] ^= 0x01;
        assert!(matches!(
            Packet::decode(&bytes, &key()),
            Err(WireError::BadSignature)
        ));
    }

    #[test]
    fn bad_magic_rejected() {
        let mut p = Packet::new(KEY).unwrap();
        p.data_mut().insert("type", "status");
        let mut bytes = p.encode().unwrap();
        bytes[7] = 2;
        assert!(matches!(
            Packet::decode(&bytes, &key()),
            Err(WireError::BadMagic(2))
        ));
    }

    #[test]
    fn truncated_packet_is_short_read() {
        let p = Packet::new(KEY).unwrap();
        let bytes = p.encode().unwrap();
        let cut = &bytes[..bytes.len() - 5];
        assert!(matches!(
            Packet::decode(cut, &key()),
            Err(WireError::ShortRead { wanted: 5, .. })
        ));
    }

    #[test]
    fn trailing_bytes_rejected() {
        let p = Packet::new(KEY).unwrap();
        let mut bytes = p.encode().unwrap();
        bytes.push(0);
        assert!(matches!(
            Packet::decode(&bytes, &key()),
            Err(WireError::TrailingData(1))
        ));
    }

    #[test]
    fn duplicate_top_level_key_rejected() {
        // Hand-assemble a signed packet whose body repeats a key.
        let mut out = vec![0u8; 4];
        out.extend_from_slice(&1u32.to_be_bytes());
        let mut auth = Table::new();
        auth.insert(HMD5_KEY, vec![0u8; SIG_SLOT_LEN]);
        encode_entry(&mut out, AUTH_KEY, &Value::Table(auth)).unwrap();
        encode_entry(&mut out, "cat", &Value::from("a")).unwrap();
        encode_entry(&mut out, "cat", &Value::from("b")).unwrap();
        let body_len = (out.len() - 4) as u32;
        out[..4].copy_from_slice(&body_len.to_be_bytes());
        let digest = key().sign(&out[SIGNED_REGION_OFFSET..]);
        out[SIG_SLOT_OFFSET] = b'A';
        out[SIG_SLOT_OFFSET + 1..=SIG_SLOT_OFFSET + SIG_DIGEST_LEN].copy_from_slice(&digest);
        assert!(matches!(
            Packet::decode(&out, &key()),
            Err(WireError::DuplicateKey(k)) if k == "cat"
        ));
    }

    #[test]
    fn empty_buffer_is_short_read() {
        assert!(matches!(
            Packet::decode(&[], &key()),
            Err(WireError::ShortRead { .. })
        ));
    }
}
