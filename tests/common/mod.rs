//! Shared fixtures: a sender-side token sealer and a key/domain-list server

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::get;
use axum::Router;
use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use base64::Engine;
use hmac::{Hmac, Mac};
use p256::elliptic_curve::group::GroupEncoding;
use p256::{AffinePoint, FieldBytes, NonZeroScalar, ProjectivePoint};
use rand::rngs::OsRng;
use sha2::Sha256;

/// Key material for one epoch, as the token issuer holds it
pub struct EpochKeys {
    pub secret: NonZeroScalar,
    pub hmac_secret: Vec<u8>,
    pub epoch_id: [u8; 8],
}

impl EpochKeys {
    pub fn random(epoch_id: [u8; 8]) -> Self {
        let mut hmac_secret = vec![0u8; 32];
        rand::RngCore::fill_bytes(&mut OsRng, &mut hmac_secret);
        Self {
            secret: NonZeroScalar::random(&mut OsRng),
            hmac_secret,
            epoch_id,
        }
    }

    pub fn epoch_id_base64(&self) -> String {
        URL_SAFE_NO_PAD.encode(self.epoch_id)
    }

    /// The `{epochIdBase64}.json` document
    pub fn document(&self) -> String {
        serde_json::json!({
            "epochId": self.epoch_id_base64(),
            "privateKey": URL_SAFE_NO_PAD.encode(FieldBytes::from(self.secret)),
            "hmacSecret": URL_SAFE_NO_PAD.encode(&self.hmac_secret),
        })
        .to_string()
    }

    /// 26-byte plaintext with a correct tag
    pub fn plaintext(&self, version: u8, ordinal: u8, signal: [u8; 16]) -> Vec<u8> {
        let mut mac = Hmac::<Sha256>::new_from_slice(&self.hmac_secret).unwrap();
        mac.update(&[version, ordinal]);
        mac.update(&signal);
        let tag = mac.finalize().into_bytes();

        let mut out = vec![version, ordinal];
        out.extend_from_slice(&signal);
        out.extend_from_slice(&tag[..8]);
        out
    }

    /// Encrypt a plaintext and wrap it as a header value
    pub fn seal_header(&self, plaintext: &[u8]) -> String {
        let message = embed(plaintext);
        let public = ProjectivePoint::GENERATOR * *self.secret;
        let r = NonZeroScalar::random(&mut OsRng);
        let u = ProjectivePoint::GENERATOR * *r;
        let e = message + public * *r;

        let mut buf = vec![1u8, 0, 33];
        buf.extend_from_slice(&u.to_affine().to_bytes());
        buf.extend_from_slice(&[0, 33]);
        buf.extend_from_slice(&e.to_affine().to_bytes());
        buf.extend_from_slice(&self.epoch_id);
        format!(":{}:", STANDARD.encode(buf))
    }
}

/// Place the plaintext in the top 29 bytes of an x coordinate and search
/// the low 3 bytes for a point on the curve
fn embed(plaintext: &[u8]) -> ProjectivePoint {
    assert!(plaintext.len() <= 29);
    let mut encoded = [0u8; 33];
    encoded[0] = 0x02;
    encoded[30 - plaintext.len()..30].copy_from_slice(plaintext);

    for pad in 0u32..(1 << 24) {
        encoded[30..].copy_from_slice(&pad.to_be_bytes()[1..]);
        let candidate = AffinePoint::from_bytes((&encoded[..]).into());
        if let Some(point) = Option::<AffinePoint>::from(candidate) {
            return point.into();
        }
    }
    panic!("no curve point for plaintext");
}

pub const DOMAIN_LIST: &str = "\
| Domain | Owner | Scope |
|---|---|---|
| tracker.example | Example Corp | Entire domain blocked |
| cdn.example | Example Corp | Some scripts blocked |
";

struct Published {
    documents: HashMap<String, String>,
    key_requests: AtomicUsize,
}

/// Key and domain list server running on an ephemeral port
pub struct ReferenceServer {
    pub base_url: String,
    published: Arc<Published>,
}

impl ReferenceServer {
    pub async fn start(epochs: &[&EpochKeys]) -> Self {
        let published = Arc::new(Published {
            documents: epochs
                .iter()
                .map(|k| (format!("{}.json", k.epoch_id_base64()), k.document()))
                .collect(),
            key_requests: AtomicUsize::new(0),
        });

        async fn key_document(
            State(published): State<Arc<Published>>,
            Path(file): Path<String>,
        ) -> (StatusCode, String) {
            published.key_requests.fetch_add(1, Ordering::SeqCst);
            // Let concurrent lookups pile up behind the first fetch
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
            match published.documents.get(&file) {
                Some(doc) => (StatusCode::OK, doc.clone()),
                None => (StatusCode::NOT_FOUND, "unknown epoch".to_string()),
            }
        }

        let app = Router::new()
            .route("/prt/v1/:file", get(key_document))
            .route("/mdl.md", get(|| async { DOMAIN_LIST }))
            .with_state(Arc::clone(&published));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            base_url: format!("http://{}", addr),
            published,
        }
    }

    pub fn key_url(&self) -> String {
        format!("{}/prt/v1", self.base_url)
    }

    pub fn domain_list_url(&self) -> String {
        format!("{}/mdl.md", self.base_url)
    }

    pub fn key_requests(&self) -> usize {
        self.published.key_requests.load(Ordering::SeqCst)
    }
}
