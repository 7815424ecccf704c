//! Key material and packet authentication.
//!
//! RNDC v1 authenticates packets with HMAC-MD5 over everything after the
//! signature slot. The 16-byte digest travels Base64-encoded with its `==`
//! padding stripped, leaving 22 characters.

use core::fmt;

use base64::{prelude::BASE64_STANDARD, Engine};
use hmac::{Hmac, Mac};
use md5::Md5;
use subtle::ConstantTimeEq;
use zeroize::Zeroizing;

use crate::wire::{WireError, SIG_DIGEST_LEN};

type HmacMd5 = Hmac<Md5>;

/// A decoded HMAC-MD5 secret.
///
/// Held decoded for the lifetime of its sessions and packets; the secret
/// is wiped when the last clone drops.
#[derive(Clone)]
pub struct Key {
    secret: Zeroizing<Vec<u8>>,
}

impl fmt::Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Key(..)")
    }
}

impl Key {
    /// Decode a Base64 secret. Surrounding whitespace is ignored.
    ///
    /// # Errors
    ///
    /// [`WireError::MissingKey`] if the input is empty,
    /// [`WireError::BadKey`] if it is not valid Base64.
    pub fn from_base64(encoded: &str) -> Result<Self, WireError> {
        let encoded = encoded.trim();
        if encoded.is_empty() {
            return Err(WireError::MissingKey);
        }
        let secret = BASE64_STANDARD.decode(encoded)?;
        Ok(Self {
            secret: Zeroizing::new(secret),
        })
    }

    /// Sign a byte range, returning the truncated Base64 digest.
    #[must_use]
    pub(crate) fn sign(&self, signed: &[u8]) -> [u8; SIG_DIGEST_LEN] {
        let mut mac =
            HmacMd5::new_from_slice(&self.secret).expect("HMAC accepts arbitrary key lengths");
        mac.update(signed);
        let digest = mac.finalize().into_bytes();
        let mut encoded = BASE64_STANDARD.encode(digest);
        encoded.truncate(SIG_DIGEST_LEN);
        let mut out = [0u8; SIG_DIGEST_LEN];
        out.copy_from_slice(encoded.as_bytes());
        out
    }

    /// Recompute the digest for a byte range and compare in constant time.
    ///
    /// # Errors
    ///
    /// [`WireError::BadSignature`] on mismatch.
    pub(crate) fn verify(&self, signed: &[u8], digest: &[u8]) -> Result<(), WireError> {
        let computed = self.sign(signed);
        if bool::from(computed.ct_eq(digest)) {
            Ok(())
        } else {
            Err(WireError::BadSignature)
        }
    }
}
