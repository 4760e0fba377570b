//! Token deserialization
//!
//! Serialized layout (79 bytes, big-endian sizes):
//!
//! ```text
//! [version:1][u_size:2][u:33][e_size:2][e:33][epoch_id:8]
//! ```
//!
//! On the wire the buffer travels as a structured-field byte sequence:
//! base64 wrapped in `:` delimiters.

use base64::alphabet;
use base64::engine::general_purpose::{GeneralPurpose, GeneralPurposeConfig, URL_SAFE_NO_PAD};
use base64::engine::DecodePaddingMode;
use base64::Engine;

use crate::constants::{EPOCH_ID_SIZE, POINT_SIZE, TOKEN_SIZE};
use crate::error::{Error, PointField};
use crate::{CurvePoint, Result};

/// Raw serialized token
pub type SerializedToken = [u8; TOKEN_SIZE];

/// Header values are not consistently padded in the wild
const HEADER_BASE64: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// Decoded Probabilistic Reveal Token
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbabilisticRevealToken {
    /// Token format version
    pub version: u8,
    /// First ElGamal component
    pub u: CurvePoint,
    /// Second ElGamal component
    pub e: CurvePoint,
    /// Raw epoch identifier
    pub epoch_id: [u8; EPOCH_ID_SIZE],
    /// Header text as observed, used as a cache and metadata key
    pub header_text: String,
    /// URL-safe unpadded base64 of `epoch_id`, names the key document
    pub epoch_id_base64: String,
}

impl ProbabilisticRevealToken {
    /// Parse a serialized token buffer.
    ///
    /// The length is checked before any field is read.
    pub fn from_bytes(data: &[u8], header_text: impl Into<String>) -> Result<Self> {
        if data.len() != TOKEN_SIZE {
            return Err(Error::InvalidLength {
                expected: TOKEN_SIZE,
                actual: data.len(),
            });
        }

        let version = data[0];
        let mut offset = 1;

        let u = read_point(data, &mut offset, PointField::U)?;
        let e = read_point(data, &mut offset, PointField::E)?;

        let mut epoch_id = [0u8; EPOCH_ID_SIZE];
        epoch_id.copy_from_slice(&data[offset..offset + EPOCH_ID_SIZE]);

        Ok(Self {
            version,
            u,
            e,
            epoch_id,
            header_text: header_text.into(),
            epoch_id_base64: URL_SAFE_NO_PAD.encode(epoch_id),
        })
    }

    /// Serialize back to the 79-byte layout
    pub fn to_bytes(&self) -> SerializedToken {
        let mut out = [0u8; TOKEN_SIZE];
        out[0] = self.version;
        let size = (POINT_SIZE as u16).to_be_bytes();
        out[1..3].copy_from_slice(&size);
        out[3..36].copy_from_slice(&self.u);
        out[36..38].copy_from_slice(&size);
        out[38..71].copy_from_slice(&self.e);
        out[71..].copy_from_slice(&self.epoch_id);
        out
    }
}

/// Read a length-prefixed point, advancing `offset`
fn read_point(data: &[u8], offset: &mut usize, field: PointField) -> Result<CurvePoint> {
    let size = u16::from_be_bytes([data[*offset], data[*offset + 1]]);
    if size as usize != POINT_SIZE {
        return Err(Error::InvalidPointSize { field, size });
    }
    *offset += 2;

    let mut point = [0u8; POINT_SIZE];
    point.copy_from_slice(&data[*offset..*offset + POINT_SIZE]);
    *offset += POINT_SIZE;
    Ok(point)
}

/// Decode a PRT header value into a token.
///
/// Accepts the structured-field form (`:<base64>:`) as well as bare base64.
pub fn decode_header(header_text: &str) -> Result<ProbabilisticRevealToken> {
    let trimmed = header_text.trim();
    let body = trimmed.strip_prefix(':').unwrap_or(trimmed);
    let body = body.strip_suffix(':').unwrap_or(body);

    let bytes = HEADER_BASE64
        .decode(body)
        .map_err(|e| Error::InvalidBase64(e.to_string()))?;

    ProbabilisticRevealToken::from_bytes(&bytes, header_text)
}
