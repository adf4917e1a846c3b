//! HS256 JSON Web Token signing and verification

use super::Identity;
use crate::error::TokenError;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, Secret};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

const ALGORITHM: &str = "HS256";

#[derive(Debug, Serialize, Deserialize)]
struct Header {
    alg: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    typ: Option<String>,
}

/// Token payload. `sub` falls back to `user_id` or `id` when absent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Claims {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exp: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iat: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nbf: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
}

impl Claims {
    /// Claims for `subject`, valid for `ttl_secs` from now
    pub fn new(subject: impl Into<String>, username: Option<String>, ttl_secs: i64) -> Self {
        let now = chrono::Utc::now().timestamp();
        Self {
            sub: Some(subject.into()),
            username,
            exp: Some(now + ttl_secs),
            iat: Some(now),
            nbf: None,
            user_id: None,
            id: None,
        }
    }

    /// The user identifier, whichever claim carries it
    pub fn subject(&self) -> Option<String> {
        if let Some(sub) = self.sub.as_deref().filter(|s| !s.is_empty()) {
            return Some(sub.to_string());
        }

        [&self.user_id, &self.id]
            .into_iter()
            .flatten()
            .find_map(|value| match value {
                Value::String(s) if !s.is_empty() => Some(s.clone()),
                Value::Number(n) => Some(n.to_string()),
                _ => None,
            })
    }

    pub fn identity(&self) -> Option<Identity> {
        Some(Identity {
            id: self.subject()?,
            username: self.username.clone(),
        })
    }
}

/// Signs and verifies tokens against one shared secret
#[derive(Clone)]
pub struct TokenVerifier {
    secret: Secret<String>,
}

impl std::fmt::Debug for TokenVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenVerifier").finish_non_exhaustive()
    }
}

impl TokenVerifier {
    pub fn new(secret: Secret<String>) -> Self {
        Self { secret }
    }

    fn mac(&self) -> Result<HmacSha256, TokenError> {
        HmacSha256::new_from_slice(self.secret.expose_secret().as_bytes())
            .map_err(|e| TokenError::Signing(format!("Invalid secret: {}", e)))
    }

    /// Produce a compact HS256 token for `claims`
    pub fn issue(&self, claims: &Claims) -> Result<String, TokenError> {
        let header = Header {
            alg: ALGORITHM.to_string(),
            typ: Some("JWT".to_string()),
        };
        let header = serde_json::to_vec(&header).map_err(|e| TokenError::Signing(e.to_string()))?;
        let payload = serde_json::to_vec(claims).map_err(|e| TokenError::Signing(e.to_string()))?;

        let signing_input = format!(
            "{}.{}",
            URL_SAFE_NO_PAD.encode(header),
            URL_SAFE_NO_PAD.encode(payload)
        );

        let mut mac = self.mac()?;
        mac.update(signing_input.as_bytes());
        let signature = URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes());

        Ok(format!("{}.{}", signing_input, signature))
    }

    /// Verify signature and time claims, returning the decoded claims
    pub fn verify(&self, token: &str) -> Result<Claims, TokenError> {
        self.verify_at(token, chrono::Utc::now().timestamp())
    }

    /// Same as [`verify`](Self::verify) against an explicit clock
    pub fn verify_at(&self, token: &str, now: i64) -> Result<Claims, TokenError> {
        let mut parts = token.split('.');
        let (Some(header_b64), Some(payload_b64), Some(signature_b64), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(TokenError::Malformed);
        };

        let header: Header = decode_segment(header_b64)?;
        if header.alg != ALGORITHM {
            return Err(TokenError::UnsupportedAlgorithm(header.alg));
        }

        let signature = URL_SAFE_NO_PAD
            .decode(signature_b64)
            .map_err(|_| TokenError::Malformed)?;

        let mut mac = self.mac()?;
        mac.update(header_b64.as_bytes());
        mac.update(b".");
        mac.update(payload_b64.as_bytes());
        mac.verify_slice(&signature)
            .map_err(|_| TokenError::InvalidSignature)?;

        let claims: Claims = decode_segment(payload_b64)?;

        // exp is mandatory
        let exp = claims.exp.ok_or(TokenError::MissingClaims)?;
        if exp <= now {
            return Err(TokenError::Expired);
        }

        if let Some(nbf) = claims.nbf {
            if nbf > now {
                return Err(TokenError::NotYetValid);
            }
        }

        if claims.subject().is_none() {
            return Err(TokenError::MissingClaims);
        }

        Ok(claims)
    }
}

fn decode_segment<T: serde::de::DeserializeOwned>(segment: &str) -> Result<T, TokenError> {
    let bytes = URL_SAFE_NO_PAD
        .decode(segment)
        .map_err(|_| TokenError::Malformed)?;
    serde_json::from_slice(&bytes).map_err(|_| TokenError::Malformed)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn verifier(secret: &str) -> TokenVerifier {
        TokenVerifier::new(Secret::new(secret.to_string()))
    }

    #[test]
    fn test_issue_and_verify() {
        let verifier = verifier("test_secret");
        let token = verifier
            .issue(&Claims::new("42", Some("ada".to_string()), 3600))
            .unwrap();

        let claims = verifier.verify(&token).unwrap();
        assert_eq!(claims.subject().as_deref(), Some("42"));
        assert_eq!(claims.identity().unwrap().username.as_deref(), Some("ada"));
    }

    #[test]
    fn test_wrong_secret_is_invalid_signature() {
        let token = verifier("a").issue(&Claims::new("1", None, 3600)).unwrap();
        assert_eq!(verifier("b").verify(&token), Err(TokenError::InvalidSignature));
    }

    #[test]
    fn test_tampered_payload_is_invalid_signature() {
        let verifier = verifier("s");
        let token = verifier.issue(&Claims::new("1", None, 3600)).unwrap();
        let forged = verifier.issue(&Claims::new("2", None, 3600)).unwrap();

        let parts: Vec<&str> = token.split('.').collect();
        let forged_parts: Vec<&str> = forged.split('.').collect();
        let spliced = format!("{}.{}.{}", parts[0], forged_parts[1], parts[2]);

        assert_eq!(verifier.verify(&spliced), Err(TokenError::InvalidSignature));
    }

    #[test]
    fn test_expired_token_with_valid_signature() {
        let verifier = verifier("s");
        let mut claims = Claims::new("1", None, 3600);
        claims.exp = Some(chrono::Utc::now().timestamp() - 10);
        let token = verifier.issue(&claims).unwrap();

        assert_eq!(verifier.verify(&token), Err(TokenError::Expired));
    }

    #[test]
    fn test_verify_at_boundary() {
        let verifier = verifier("s");
        let mut claims = Claims::new("1", None, 0);
        claims.exp = Some(1_000);
        let token = verifier.issue(&claims).unwrap();

        assert!(verifier.verify_at(&token, 999).is_ok());
        assert_eq!(verifier.verify_at(&token, 1_000), Err(TokenError::Expired));
    }

    #[test]
    fn test_missing_exp_rejected() {
        let verifier = verifier("s");
        let mut claims = Claims::new("1", None, 3600);
        claims.exp = None;
        let token = verifier.issue(&claims).unwrap();

        assert_eq!(verifier.verify(&token), Err(TokenError::MissingClaims));
    }

    #[test]
    fn test_not_yet_valid() {
        let verifier = verifier("s");
        let mut claims = Claims::new("1", None, 3600);
        claims.nbf = Some(chrono::Utc::now().timestamp() + 600);
        let token = verifier.issue(&claims).unwrap();

        assert_eq!(verifier.verify(&token), Err(TokenError::NotYetValid));
    }

    #[test]
    fn test_numeric_user_id_fallback() {
        let verifier = verifier("s");
        let mut claims = Claims::new("x", None, 3600);
        claims.sub = None;
        claims.user_id = Some(serde_json::json!(17));
        let token = verifier.issue(&claims).unwrap();

        assert_eq!(verifier.verify(&token).unwrap().subject().as_deref(), Some("17"));
    }

    #[test]
    fn test_malformed_tokens() {
        let verifier = verifier("s");
        assert_eq!(verifier.verify("abc"), Err(TokenError::Malformed));
        assert_eq!(verifier.verify("a.b.c.d"), Err(TokenError::Malformed));
        assert_eq!(verifier.verify("!!.??.**"), Err(TokenError::Malformed));
    }

    #[test]
    fn test_alg_none_rejected() {
        let verifier = verifier("s");
        let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"none"}"#);
        let payload = URL_SAFE_NO_PAD.encode(br#"{"sub":"1","exp":99999999999}"#);
        let token = format!("{}.{}.", header, payload);

        assert_eq!(
            verifier.verify(&token),
            Err(TokenError::UnsupportedAlgorithm("none".to_string()))
        );
    }
}
