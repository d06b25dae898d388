//! Session tokens: HS256 JWTs whose payload only holds the user ID.

use aws_lc_rs::hmac;
use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use serde::{Deserialize, Serialize};


/// The only claim we put into a token. Other claims in incoming tokens (e.g.
/// `iat`) are ignored.
#[derive(Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct Claims {
    pub(crate) user_id: String,
}

#[derive(Debug, PartialEq, Eq)]
pub(crate) enum TokenError {
    Malformed(&'static str),
    UnsupportedAlgorithm,
    BadSignature,
}

#[derive(Deserialize)]
struct Header {
    alg: String,
}

const HEADER: &str = r#"{"alg":"HS256","typ":"JWT"}"#;

/// Signs and verifies tokens with an HMAC-SHA256 key derived from the
/// configured secret.
pub(crate) struct TokenSigner {
    key: hmac::Key,
}

impl TokenSigner {
    pub(crate) fn new(secret: &[u8]) -> Self {
        Self { key: hmac::Key::new(hmac::HMAC_SHA256, secret) }
    }

    /// Encodes and signs the given claims. The same claims always result in
    /// the same token.
    pub(crate) fn sign(&self, claims: &Claims) -> String {
        let payload_json = serde_json::to_string(claims)
            .expect("failed to serialize JWT payload");

        let mut jwt = String::new();
        URL_SAFE_NO_PAD.encode_string(HEADER, &mut jwt);
        jwt.push('.');
        URL_SAFE_NO_PAD.encode_string(payload_json, &mut jwt);

        let signature = hmac::sign(&self.key, jwt.as_bytes());
        jwt.push('.');
        URL_SAFE_NO_PAD.encode_string(signature.as_ref(), &mut jwt);

        jwt
    }

    /// Checks the signature (in constant time) and returns the decoded claims.
    pub(crate) fn verify(&self, token: &str) -> Result<Claims, TokenError> {
        let mut parts = token.split('.');
        let (Some(header_b64), Some(payload_b64), Some(signature_b64), None)
            = (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(TokenError::Malformed("expected three dot-separated parts"));
        };

        let header = decode_json::<Header>(header_b64)?;
        if header.alg != "HS256" {
            return Err(TokenError::UnsupportedAlgorithm);
        }

        let signature = URL_SAFE_NO_PAD.decode(signature_b64)
            .map_err(|_| TokenError::Malformed("signature is not base64"))?;
        let signing_input = &token[..header_b64.len() + 1 + payload_b64.len()];
        hmac::verify(&self.key, signing_input.as_bytes(), &signature)
            .map_err(|_| TokenError::BadSignature)?;

        decode_json(payload_b64)
    }
}

fn decode_json<T: for<'de> Deserialize<'de>>(part: &str) -> Result<T, TokenError> {
    let raw = URL_SAFE_NO_PAD.decode(part)
        .map_err(|_| TokenError::Malformed("part is not base64"))?;
    serde_json::from_slice(&raw).map_err(|_| TokenError::Malformed("part is not valid JSON"))
}
