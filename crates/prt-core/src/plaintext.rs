//! Plaintext extraction and truncated HMAC verification
//!
//! Plaintext layout:
//!
//! ```text
//! [version:1][ordinal:1][signal:16][hmac:8]
//! ```
//!
//! The tag is the first 8 bytes of HMAC-SHA-256(secret, version || ordinal || signal).

use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

use crate::constants::{HMAC_SIZE, PLAINTEXT_SIZE, SIGNAL_SIZE};
use crate::decrypt::DecryptedPayload;
use crate::error::Error;
use crate::{HmacTag, Result, Signal};

type HmacSha256 = Hmac<Sha256>;

/// Verified plaintext of a token
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaintextToken {
    pub version: u8,
    /// Token type discriminator
    pub ordinal: u8,
    pub signal: Signal,
    /// Computed once at extraction; `false` means corrupted or tampered
    pub hmac_valid: bool,
}

impl PlaintextToken {
    /// True unless every signal byte is zero
    pub fn has_nonzero_signal(&self) -> bool {
        self.signal.iter().any(|&b| b != 0)
    }
}

/// Split a decrypted payload into fields and check its tag.
///
/// A tag mismatch is reported through `hmac_valid`, not as an error.
pub fn extract(payload: &DecryptedPayload<'_>) -> Result<PlaintextToken> {
    let bytes = &payload.plaintext_bytes;
    if bytes.len() < PLAINTEXT_SIZE {
        return Err(Error::PayloadTooShort {
            actual: bytes.len(),
        });
    }

    let version = bytes[0];
    let ordinal = bytes[1];
    let mut signal = [0u8; SIGNAL_SIZE];
    signal.copy_from_slice(&bytes[2..2 + SIGNAL_SIZE]);
    let received = &bytes[2 + SIGNAL_SIZE..PLAINTEXT_SIZE];

    let hmac_valid = verify_hmac(payload.hmac_secret, version, ordinal, &signal, received);

    Ok(PlaintextToken {
        version,
        ordinal,
        signal,
        hmac_valid,
    })
}

/// Truncated HMAC-SHA-256 over `version || ordinal || signal`
pub fn compute_hmac(secret: &[u8], version: u8, ordinal: u8, signal: &Signal) -> HmacTag {
    let mut mac = match HmacSha256::new_from_slice(secret) {
        Ok(mac) => mac,
        Err(_) => unreachable!("HMAC-SHA-256 accepts keys of any length"),
    };
    mac.update(&[version, ordinal]);
    mac.update(signal);
    let full = mac.finalize().into_bytes();

    let mut tag = [0u8; HMAC_SIZE];
    tag.copy_from_slice(&full[..HMAC_SIZE]);
    tag
}

/// Compare a received tag against the expected one.
///
/// Every byte is examined regardless of where the first mismatch is; a tag
/// of the wrong length never matches.
pub fn verify_hmac(
    secret: &[u8],
    version: u8,
    ordinal: u8,
    signal: &Signal,
    received: &[u8],
) -> bool {
    let expected = compute_hmac(secret, version, ordinal, signal);
    received.ct_eq(&expected[..]).into()
}
