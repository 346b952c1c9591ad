//! Bearer token authentication.
//!
//! Tokens are issued out-of-band by the identity service and signed
//! with its Ed25519 key. The server's entire contract with the token
//! format is `verify(token) -> identity`; everything else about the
//! credential lives with the issuer.
//!
//! Wire format: `<user_id>.<expires_unix>.<signature_hex>` where the
//! signature covers `<user_id>|<expires_unix>`.

use chrono::{DateTime, Utc};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};

use crate::error::AuthError;
use crate::types::UserId;

/// Verifies bearer tokens against the issuer's public key.
#[derive(Debug, Clone)]
pub struct TokenVerifier {
    issuer_pubkey: [u8; 32],
}

impl TokenVerifier {
    pub fn new(issuer_pubkey: [u8; 32]) -> Self {
        Self { issuer_pubkey }
    }

    /// Verify a bearer token, returning the authenticated identity.
    pub fn verify(&self, token: &str) -> Result<UserId, AuthError> {
        let token = token.trim();
        if token.is_empty() {
            return Err(AuthError::Missing);
        }

        // Split from the right: the user id itself may contain dots.
        let mut parts = token.rsplitn(3, '.');
        let sig_hex = parts.next().ok_or(AuthError::Malformed)?;
        let expires_str = parts.next().ok_or(AuthError::Malformed)?;
        let user_id = parts.next().ok_or(AuthError::Malformed)?;
        if user_id.is_empty() {
            return Err(AuthError::Malformed);
        }

        let expires: i64 = expires_str.parse().map_err(|_| AuthError::Malformed)?;
        if Utc::now().timestamp() > expires {
            return Err(AuthError::Expired);
        }

        let sig_bytes = hex::decode(sig_hex).map_err(|_| AuthError::Malformed)?;
        let signature =
            Signature::from_slice(&sig_bytes).map_err(|_| AuthError::Malformed)?;
        let verifying_key = VerifyingKey::from_bytes(&self.issuer_pubkey)
            .map_err(|_| AuthError::BadSignature)?;

        let payload = signing_payload(user_id, expires);
        verifying_key
            .verify(payload.as_bytes(), &signature)
            .map_err(|_| AuthError::BadSignature)?;

        Ok(UserId::new(user_id))
    }
}

/// Issue a token for `user_id` valid until `expires`. Used by tests
/// and operator tooling; production tokens come from the identity
/// service.
pub fn issue_token(user_id: &UserId, expires: DateTime<Utc>, key: &SigningKey) -> String {
    let expires = expires.timestamp();
    let payload = signing_payload(user_id.as_str(), expires);
    let signature = key.sign(payload.as_bytes());
    format!(
        "{}.{}.{}",
        user_id.as_str(),
        expires,
        hex::encode(signature.to_bytes())
    )
}

fn signing_payload(user_id: &str, expires: i64) -> String {
    format!("{user_id}|{expires}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use rand::rngs::OsRng;

    fn keypair() -> (SigningKey, TokenVerifier) {
        let key = SigningKey::generate(&mut OsRng);
        let verifier = TokenVerifier::new(key.verifying_key().to_bytes());
        (key, verifier)
    }

    #[test]
    fn round_trip() {
        let (key, verifier) = keypair();
        let id = UserId::new("alice");
        let token = issue_token(&id, Utc::now() + Duration::hours(1), &key);
        assert_eq!(verifier.verify(&token).unwrap(), id);
    }

    #[test]
    fn user_id_with_dots_survives() {
        let (key, verifier) = keypair();
        let id = UserId::new("alice.v2.kim");
        let token = issue_token(&id, Utc::now() + Duration::hours(1), &key);
        assert_eq!(verifier.verify(&token).unwrap(), id);
    }

    #[test]
    fn expired_token_rejected() {
        let (key, verifier) = keypair();
        let token = issue_token(
            &UserId::new("alice"),
            Utc::now() - Duration::minutes(1),
            &key,
        );
        assert!(matches!(verifier.verify(&token), Err(AuthError::Expired)));
    }

    #[test]
    fn wrong_key_rejected() {
        let (key, _) = keypair();
        let (_, other_verifier) = keypair();
        let token = issue_token(&UserId::new("alice"), Utc::now() + Duration::hours(1), &key);
        assert!(matches!(
            other_verifier.verify(&token),
            Err(AuthError::BadSignature)
        ));
    }

    #[test]
    fn tampered_identity_rejected() {
        let (key, verifier) = keypair();
        let token = issue_token(&UserId::new("alice"), Utc::now() + Duration::hours(1), &key);
        let forged = token.replacen("alice", "mallory", 1);
        assert!(matches!(
            verifier.verify(&forged),
            Err(AuthError::BadSignature)
        ));
    }

    #[test]
    fn garbage_rejected() {
        let (_, verifier) = keypair();
        assert!(matches!(verifier.verify(""), Err(AuthError::Missing)));
        assert!(matches!(
            verifier.verify("not-a-token"),
            Err(AuthError::Malformed)
        ));
    }
}
