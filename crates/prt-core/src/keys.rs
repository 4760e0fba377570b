//! Epoch key material and its published JSON document

use base64::alphabet;
use base64::engine::general_purpose::{GeneralPurpose, GeneralPurposeConfig};
use base64::engine::DecodePaddingMode;
use base64::Engine;
use p256::{FieldBytes, NonZeroScalar};
use serde::Deserialize;
use zeroize::{Zeroize, Zeroizing};

use crate::error::Error;
use crate::Result;

const KEY_BASE64: GeneralPurpose = GeneralPurpose::new(
    &alphabet::URL_SAFE,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

const SCALAR_SIZE: usize = 32;

/// Key document as published at `{epochIdBase64}.json`.
///
/// Unknown fields are ignored; the two fields below are mandatory.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyDocument {
    pub private_key: String,
    pub hmac_secret: String,
}

impl KeyDocument {
    /// Parse a key document from JSON bytes
    pub fn from_json(data: &[u8]) -> Result<Self> {
        serde_json::from_slice(data).map_err(|e| Error::InvalidKeyMaterial(e.to_string()))
    }

    /// Validate and convert into usable key material
    pub fn into_key_material(self) -> Result<EpochKeyMaterial> {
        let scalar_bytes = Zeroizing::new(
            KEY_BASE64
                .decode(self.private_key.trim())
                .map_err(|e| Error::InvalidKeyMaterial(format!("privateKey: {e}")))?,
        );
        if scalar_bytes.is_empty() || scalar_bytes.len() > SCALAR_SIZE {
            return Err(Error::InvalidKeyMaterial(format!(
                "privateKey: expected at most {SCALAR_SIZE} bytes, got {}",
                scalar_bytes.len()
            )));
        }

        // Left-pad: big-integer encoders drop leading zero bytes
        let mut padded = Zeroizing::new([0u8; SCALAR_SIZE]);
        padded[SCALAR_SIZE - scalar_bytes.len()..].copy_from_slice(&scalar_bytes);
        let repr = FieldBytes::from(*padded);
        let scalar = Option::<NonZeroScalar>::from(NonZeroScalar::from_repr(repr));
        let private_scalar = scalar.ok_or_else(|| {
            Error::InvalidKeyMaterial("privateKey: not a valid non-zero P-256 scalar".into())
        })?;

        let hmac_secret = KEY_BASE64
            .decode(self.hmac_secret.trim())
            .map_err(|e| Error::InvalidKeyMaterial(format!("hmacSecret: {e}")))?;
        if hmac_secret.is_empty() {
            return Err(Error::InvalidKeyMaterial("hmacSecret: empty".into()));
        }

        Ok(EpochKeyMaterial::new(private_scalar, hmac_secret))
    }
}

/// Per-epoch decryption scalar and HMAC secret
pub struct EpochKeyMaterial {
    private_scalar: NonZeroScalar,
    hmac_secret: Zeroizing<Vec<u8>>,
}

impl EpochKeyMaterial {
    pub fn new(private_scalar: NonZeroScalar, hmac_secret: Vec<u8>) -> Self {
        Self {
            private_scalar,
            hmac_secret: Zeroizing::new(hmac_secret),
        }
    }

    /// Parse and validate a key document in one step
    pub fn from_json(data: &[u8]) -> Result<Self> {
        KeyDocument::from_json(data)?.into_key_material()
    }

    pub fn private_scalar(&self) -> &NonZeroScalar {
        &self.private_scalar
    }

    pub fn hmac_secret(&self) -> &[u8] {
        &self.hmac_secret
    }
}

impl Drop for EpochKeyMaterial {
    fn drop(&mut self) {
        self.private_scalar.zeroize();
    }
}

impl std::fmt::Debug for EpochKeyMaterial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EpochKeyMaterial")
            .field("private_scalar", &"<redacted>")
            .field("hmac_secret_len", &self.hmac_secret.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;

    fn scalar_b64(bytes: &[u8]) -> String {
        URL_SAFE_NO_PAD.encode(bytes)
    }

    #[test]
    fn test_parse_valid_document() {
        let mut scalar = [0u8; 32];
        scalar[31] = 7;
        let json = format!(
            r#"{{"privateKey":"{}","hmacSecret":"{}","epochId":"ignored"}}"#,
            scalar_b64(&scalar),
            scalar_b64(b"sixteen byte key")
        );

        let key = EpochKeyMaterial::from_json(json.as_bytes()).unwrap();
        assert_eq!(key.hmac_secret(), b"sixteen byte key");
        assert_eq!(FieldBytes::from(*key.private_scalar()).as_slice(), &scalar[..]);
    }

    #[test]
    fn test_short_scalar_is_left_padded() {
        let json = format!(
            r#"{{"privateKey":"{}","hmacSecret":"{}"}}"#,
            scalar_b64(&[0x01, 0x02]),
            scalar_b64(b"k")
        );
        let key = EpochKeyMaterial::from_json(json.as_bytes()).unwrap();
        let repr = FieldBytes::from(*key.private_scalar());
        assert_eq!(&repr[30..], &[0x01, 0x02]);
        assert!(repr[..30].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_missing_field_fails_closed() {
        let err = EpochKeyMaterial::from_json(br#"{"privateKey":"AQ"}"#).unwrap_err();
        assert!(matches!(err, Error::InvalidKeyMaterial(_)));
    }

    #[test]
    fn test_wrong_type_fails_closed() {
        let err =
            EpochKeyMaterial::from_json(br#"{"privateKey":null,"hmacSecret":"AQ"}"#).unwrap_err();
        assert!(matches!(err, Error::InvalidKeyMaterial(_)));
    }

    #[test]
    fn test_zero_scalar_rejected() {
        let json = format!(
            r#"{{"privateKey":"{}","hmacSecret":"AQ"}}"#,
            scalar_b64(&[0u8; 32])
        );
        assert!(EpochKeyMaterial::from_json(json.as_bytes()).is_err());
    }

    #[test]
    fn test_out_of_range_scalar_rejected() {
        let json = format!(
            r#"{{"privateKey":"{}","hmacSecret":"AQ"}}"#,
            scalar_b64(&[0xffu8; 32])
        );
        assert!(EpochKeyMaterial::from_json(json.as_bytes()).is_err());
    }

    #[test]
    fn test_oversized_scalar_rejected() {
        let json = format!(
            r#"{{"privateKey":"{}","hmacSecret":"AQ"}}"#,
            scalar_b64(&[0x01u8; 33])
        );
        assert!(EpochKeyMaterial::from_json(json.as_bytes()).is_err());
    }

    #[test]
    fn test_empty_hmac_secret_rejected() {
        let json = format!(
            r#"{{"privateKey":"{}","hmacSecret":""}}"#,
            scalar_b64(&[0x01])
        );
        assert!(EpochKeyMaterial::from_json(json.as_bytes()).is_err());
    }

    #[test]
    fn test_debug_redacts_scalar() {
        let json = format!(
            r#"{{"privateKey":"{}","hmacSecret":"AQ"}}"#,
            scalar_b64(&[0x2a])
        );
        let key = EpochKeyMaterial::from_json(json.as_bytes()).unwrap();
        let rendered = format!("{key:?}");
        assert!(rendered.contains("<redacted>"));
    }
}
