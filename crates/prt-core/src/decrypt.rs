//! ElGamal point decryption on P-256
//!
//! The sender encodes the plaintext into the X coordinate of a curve point
//! `M`, leaving the low 24 bits free so it can search for a valid point.
//! With epoch secret `x` and ciphertext `(u, e) = (rG, M + r·xG)`:
//!
//! ```text
//! M = e - x·u
//! plaintext = X(M) >> 24
//! ```

use p256::elliptic_curve::group::GroupEncoding;
use p256::elliptic_curve::point::AffineCoordinates;
use p256::ProjectivePoint;

use crate::constants::PADDING_BITS;
use crate::error::{Error, PointField};
use crate::keys::EpochKeyMaterial;
use crate::token::ProbabilisticRevealToken;
use crate::{CurvePoint, Result};

/// Output of decryption, input to plaintext extraction
#[derive(Debug)]
pub struct DecryptedPayload<'k> {
    /// Big-endian plaintext with leading zero bytes removed
    pub plaintext_bytes: Vec<u8>,
    /// HMAC secret of the epoch the token was encrypted under
    pub hmac_secret: &'k [u8],
}

/// Decrypt a token with its epoch key material
pub fn decrypt<'k>(
    token: &ProbabilisticRevealToken,
    key: &'k EpochKeyMaterial,
) -> Result<DecryptedPayload<'k>> {
    let u = decode_point(&token.u, PointField::U)?;
    let e = decode_point(&token.e, PointField::E)?;

    let xu = u * **key.private_scalar();
    let decrypted = e - xu;

    Ok(DecryptedPayload {
        plaintext_bytes: strip_padding(&decrypted),
        hmac_secret: key.hmac_secret(),
    })
}

fn decode_point(bytes: &CurvePoint, field: PointField) -> Result<ProjectivePoint> {
    Option::<ProjectivePoint>::from(ProjectivePoint::from_bytes((&bytes[..]).into()))
        .ok_or(Error::PointDecodeFailure { field })
}

/// Shift the X coordinate right by the padding and return the minimal
/// big-endian encoding of what remains.
fn strip_padding(point: &ProjectivePoint) -> Vec<u8> {
    let x = point.to_affine().x();
    let shifted = &x[..x.len() - PADDING_BITS / 8];
    let first = shifted
        .iter()
        .position(|&b| b != 0)
        .unwrap_or(shifted.len());
    shifted[first..].to_vec()
}
