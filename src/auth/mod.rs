use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::types::AuthConfig;

/// Identity attached to a verified bearer token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserInfo {
    pub uid: String,
    pub name: String,
    pub email: String,
    #[serde(default)]
    pub email_verified: bool,
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("missing Authorization header")]
    MissingHeader,

    #[error("token expired")]
    Expired,

    #[error("token revoked")]
    Revoked,

    #[error("malformed token")]
    Malformed,

    #[error("certificate fetch error: {0}")]
    CertificateFetch(String),

    #[error("email not verified")]
    Unverified,

    #[error("admin credential rejected")]
    AdminRejected,
}

/// External token verification: an opaque bearer token in, an identity out,
/// with the upstream failure category preserved.
#[async_trait]
pub trait TokenVerifier: Send + Sync {
    async fn verify(&self, token: &str) -> Result<UserInfo, AuthError>;
}

/// Verifier backed by the identity service's verify endpoint.
pub struct HttpTokenVerifier {
    http: reqwest::Client,
    verify_url: String,
}

#[derive(Serialize)]
struct VerifyRequest<'a> {
    token: &'a str,
}

#[derive(Deserialize)]
struct VerifyFailure {
    error: String,
}

impl HttpTokenVerifier {
    pub fn new(cfg: &AuthConfig) -> Result<Self, AuthError> {
        let http = reqwest::Client::builder()
            .user_agent("sportfolios-engine/0.1")
            .build()
            .map_err(|e| AuthError::CertificateFetch(e.to_string()))?;
        Ok(Self { http, verify_url: cfg.verify_url.clone() })
    }

    fn categorize(failure: &str) -> AuthError {
        match failure {
            "expired" => AuthError::Expired,
            "revoked" => AuthError::Revoked,
            "malformed" => AuthError::Malformed,
            other => AuthError::CertificateFetch(other.to_string()),
        }
    }
}

#[async_trait]
impl TokenVerifier for HttpTokenVerifier {
    async fn verify(&self, token: &str) -> Result<UserInfo, AuthError> {
        let resp = self
            .http
            .post(&self.verify_url)
            .json(&VerifyRequest { token })
            .send()
            .await
            .map_err(|e| AuthError::CertificateFetch(e.to_string()))?;

        if resp.status().is_success() {
            let user: UserInfo =
                resp.json().await.map_err(|e| AuthError::CertificateFetch(e.to_string()))?;
            if !user.email_verified {
                return Err(AuthError::Unverified);
            }
            return Ok(user);
        }

        match resp.json::<VerifyFailure>().await {
            Ok(failure) => Err(Self::categorize(&failure.error)),
            Err(_) => Err(AuthError::Malformed),
        }
    }
}

/// Admin routes authenticate with a separately-hashed credential: the
/// SHA-256 digest of the supplied header must equal the configured digest.
pub struct AdminCredential {
    digest: Vec<u8>,
}

impl AdminCredential {
    pub fn from_hex(digest_hex: &str) -> anyhow::Result<Self> {
        let digest = hex::decode(digest_hex)?;
        anyhow::ensure!(digest.len() == 32, "admin digest must be 32 bytes");
        Ok(Self { digest })
    }

    pub fn verify(&self, header: Option<&str>) -> Result<(), AuthError> {
        let supplied = header.ok_or(AuthError::MissingHeader)?;
        let digest = Sha256::digest(supplied.as_bytes());
        if digest.as_slice() == self.digest.as_slice() {
            Ok(())
        } else {
            Err(AuthError::AdminRejected)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn admin_credential_accepts_matching_digest() {
        let digest = hex::encode(Sha256::digest(b"letmein"));
        let admin = AdminCredential::from_hex(&digest).unwrap();
        assert!(admin.verify(Some("letmein")).is_ok());
        assert!(matches!(admin.verify(Some("wrong")), Err(AuthError::AdminRejected)));
        assert!(matches!(admin.verify(None), Err(AuthError::MissingHeader)));
    }

    #[test]
    fn failure_categories_are_preserved() {
        assert!(matches!(HttpTokenVerifier::categorize("expired"), AuthError::Expired));
        assert!(matches!(HttpTokenVerifier::categorize("revoked"), AuthError::Revoked));
        assert!(matches!(HttpTokenVerifier::categorize("malformed"), AuthError::Malformed));
        assert!(matches!(
            HttpTokenVerifier::categorize("cert-fetch"),
            AuthError::CertificateFetch(_)
        ));
    }
}
