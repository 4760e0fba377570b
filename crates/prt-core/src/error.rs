//! Core error types

use thiserror::Error;

/// Which of the two ElGamal components a failure refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PointField {
    U,
    E,
}

impl std::fmt::Display for PointField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PointField::U => write!(f, "u"),
            PointField::E => write!(f, "e"),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("Invalid base64 in token header: {0}")]
    InvalidBase64(String),

    #[error("Invalid token length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },

    #[error("Invalid point size for {field}: expected 33, got {size}")]
    InvalidPointSize { field: PointField, size: u16 },

    #[error("Point {field} is not a valid P-256 point")]
    PointDecodeFailure { field: PointField },

    #[error("Decrypted payload too short: expected at least 26 bytes, got {actual}")]
    PayloadTooShort { actual: usize },

    #[error("Invalid key material: {0}")]
    InvalidKeyMaterial(String),
}
