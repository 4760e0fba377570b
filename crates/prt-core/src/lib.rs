//! prt-core: Probabilistic Reveal Token (PRT) processing primitives
//!
//! This crate holds the synchronous half of the PRT receiver:
//! - Token: parses the 79-byte serialized token and its header wire form
//! - Decrypt: ElGamal point decryption on P-256 with the epoch scalar
//! - Plaintext: field extraction and truncated HMAC-SHA-256 verification
//! - Domain: script-blocking classification table
//!
//! Nothing in here performs I/O. Key material and the classification table
//! are fetched by `prt-client`; state and aggregation live in `prt-monitor`.
//!
//! # Trust Model
//!
//! This crate only ever *receives* tokens.
//!
//! | Check | Outcome on failure |
//! |-------|--------------------|
//! | Buffer length == 79 | [`Error::InvalidLength`] |
//! | `u` / `e` size fields == 33 | [`Error::InvalidPointSize`] |
//! | `u` / `e` are valid curve points | [`Error::PointDecodeFailure`] |
//! | Recovered payload >= 26 bytes | [`Error::PayloadTooShort`] |
//! | Truncated HMAC matches | `hmac_valid = false`, token is kept |
//!
//! An HMAC mismatch is data, not an error: callers decide what a tampered
//! or corrupted token means for them.

mod decrypt;
pub mod domain;
mod error;
mod keys;
mod plaintext;
mod token;

pub use decrypt::{decrypt, DecryptedPayload};
pub use domain::{DomainClassification, DomainTable, ScriptBlockingScope};
pub use error::{Error, PointField};
pub use keys::{EpochKeyMaterial, KeyDocument};
pub use plaintext::{compute_hmac, extract, verify_hmac, PlaintextToken};
pub use token::{decode_header, ProbabilisticRevealToken, SerializedToken};

pub type Result<T> = std::result::Result<T, Error>;

/// Compressed SEC1 P-256 point
pub type CurvePoint = [u8; constants::POINT_SIZE];

/// Revealed application signal
pub type Signal = [u8; constants::SIGNAL_SIZE];

/// Truncated HMAC tag
pub type HmacTag = [u8; constants::HMAC_SIZE];

/// Constants for the token wire format
pub mod constants {
    /// Serialized token size: version + 2 * (size + point) + epoch id
    pub const TOKEN_SIZE: usize = 79;

    /// Compressed P-256 point size
    pub const POINT_SIZE: usize = 33;

    /// Epoch identifier size
    pub const EPOCH_ID_SIZE: usize = 8;

    /// Signal size inside the plaintext
    pub const SIGNAL_SIZE: usize = 16;

    /// Truncated HMAC size
    pub const HMAC_SIZE: usize = 8;

    /// Minimum plaintext: version + ordinal + signal + hmac
    pub const PLAINTEXT_SIZE: usize = 2 + SIGNAL_SIZE + HMAC_SIZE;

    /// Low-order padding bits the sender adds to the X coordinate
    pub const PADDING_BITS: usize = 24;
}
