use std::time::{Duration, SystemTime};

use josekit::JoseError;
use josekit::{jws::{JwsHeader, HS256}, jwt::{self, JwtPayload}, Value};

use auth_check::Identity;

use crate::users::User;

const ADMIN_CLAIM: &str = "admin";

/// Issues and verifies HS256 session tokens.
pub struct TokenIssuer {
    signing_key: Vec<u8>,
    issuer: String,
    audience: String,
    ttl: Duration,
}

impl TokenIssuer {
    pub fn new(signing_key: impl Into<Vec<u8>>, issuer: &str, audience: &str, ttl: Duration) -> Self {
        TokenIssuer {
            signing_key: signing_key.into(),
            issuer: issuer.to_string(),
            audience: audience.to_string(),
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Generates a JWT for the given user, subject = username, with an `admin` claim.
    pub fn issue(&self, user: &User) -> Result<String, JoseError> {
        self.issue_at(user, SystemTime::now())
    }

    fn issue_at(&self, user: &User, now: SystemTime) -> Result<String, JoseError> {
        let mut header = JwsHeader::new();
        header.set_token_type("JWT");

        let mut payload = JwtPayload::new();
        payload.set_issuer(self.issuer.as_str());
        payload.set_audience(vec![self.audience.as_str()]);
        payload.set_subject(user.username.as_str());
        payload.set_issued_at(&now);
        payload.set_not_before(&now);
        payload.set_expires_at(&(now + self.ttl));
        payload.set_claim(ADMIN_CLAIM, Some(Value::Bool(user.admin)))?;

        let signer = HS256.signer_from_bytes(&self.signing_key)?;
        jwt::encode_with_signer(&payload, &header, &signer)
    }

    /// Verifies signature and registered claims; the identity if all hold.
    pub fn verify(&self, token: &str) -> Option<Identity> {
        let payload = match self.decode(token) {
            Ok(payload) => payload,
            Err(err) => {
                // signature verification failed, worth logging the event.
                tracing::warn!("Token verification failed: Invalid token: {}", err);
                return None;
            }
        };
        let now = SystemTime::now();

        if payload.expires_at().is_none_or(|exp| exp <= now) {
            tracing::debug!("Token verification failed: Token has expired");
            return None;
        }

        if payload.issuer() != Some(self.issuer.as_str()) {
            tracing::debug!("Token verification failed: Invalid issuer");
            return None;
        }

        if !payload.audience().is_some_and(|aud| aud.contains(&self.audience.as_str())) {
            tracing::debug!("Token verification failed: Invalid audience");
            return None;
        }

        if payload.issued_at().is_none_or(|iat| iat > now) {
            tracing::debug!("Token verification failed: Invalid issued at time");
            return None;
        }

        if payload.not_before().is_none_or(|nbf| nbf > now) {
            tracing::debug!("Token verification failed: Invalid not before time");
            return None;
        }

        let Some(username) = payload.subject() else {
            tracing::debug!("Token verification failed: Missing subject");
            return None;
        };

        let admin = payload
            .claim(ADMIN_CLAIM)
            .and_then(Value::as_bool)
            .unwrap_or(false);

        tracing::debug!("Token verification successful for user: {}", username);
        Some(Identity { username: username.to_string(), admin })
    }

    fn decode(&self, token: &str) -> Result<JwtPayload, JoseError> {
        let verifier = HS256.verifier_from_bytes(&self.signing_key)?;
        jwt::decode_with_verifier(token, &verifier).map(|(payload, _)| payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: &[u8] = b"0123456789abcdef0123456789abcdef";

    fn issuer() -> TokenIssuer {
        TokenIssuer::new(KEY, "file-store", "file-store", Duration::from_secs(30 * 60))
    }

    fn user(admin: bool) -> User {
        User { username: "alice".into(), password_hash: String::new(), admin }
    }

    #[test]
    fn issued_token_carries_identity() {
        let tokens = issuer();
        let identity = tokens.verify(&tokens.issue(&user(true)).unwrap()).unwrap();
        assert_eq!(identity, Identity { username: "alice".into(), admin: true });

        let identity = tokens.verify(&tokens.issue(&user(false)).unwrap()).unwrap();
        assert!(!identity.admin);
    }

    #[test]
    fn expired_token_is_rejected() {
        let tokens = issuer();
        let an_hour_ago = SystemTime::now() - Duration::from_secs(3600);
        let token = tokens.issue_at(&user(false), an_hour_ago).unwrap();
        assert!(tokens.verify(&token).is_none());
    }

    #[test]
    fn foreign_signature_or_audience_is_rejected() {
        let token = issuer().issue(&user(false)).unwrap();

        let other_key = TokenIssuer::new(&b"another-key-another-key-another!!"[..], "file-store", "file-store", Duration::from_secs(60));
        assert!(other_key.verify(&token).is_none());

        let other_audience = TokenIssuer::new(KEY, "file-store", "elsewhere", Duration::from_secs(60));
        assert!(other_audience.verify(&token).is_none());

        assert!(issuer().verify("not.a.jwt").is_none());
    }
}
