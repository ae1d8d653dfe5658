//! Identity verification boundary.
//!
//! Token issuance and policy live outside the hub; the hub only asks a
//! verifier which identity a presented token stands for.

use chathub_core::line::valid_identity;
use chathub_core::{verify_token, HubError, HubResult};
use tracing::debug;

/// Maps an opaque auth token to the identity it proves.
pub trait IdentityVerifier: Send + Sync {
    fn verify(&self, token: &str) -> HubResult<String>;
}

/// Verifies HMAC identity tokens signed with a shared secret.
pub struct HmacVerifier {
    secret: Vec<u8>,
}

impl HmacVerifier {
    pub fn new(secret: Vec<u8>) -> Self {
        Self { secret }
    }
}

impl IdentityVerifier for HmacVerifier {
    fn verify(&self, token: &str) -> HubResult<String> {
        let claims = verify_token(&self.secret, token)?;
        if !valid_identity(&claims.username) {
            return Err(HubError::Token(format!(
                "unusable identity in token: {:?}",
                claims.username
            )));
        }
        debug!(identity = %claims.username, expires_at = claims.expires_at, "token verified");
        Ok(claims.username)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chathub_core::issue_token;

    #[test]
    fn accepts_signed_token() {
        let verifier = HmacVerifier::new(b"secret".to_vec());
        let token = issue_token(b"secret", "alice", 60);
        assert_eq!(verifier.verify(&token).unwrap(), "alice");
    }

    #[test]
    fn rejects_foreign_token() {
        let verifier = HmacVerifier::new(b"secret".to_vec());
        let token = issue_token(b"other", "alice", 60);
        assert!(verifier.verify(&token).is_err());
    }

    #[test]
    fn rejects_separator_in_identity() {
        let verifier = HmacVerifier::new(b"secret".to_vec());
        let token = issue_token(b"secret", "a:b", 60);
        assert!(matches!(verifier.verify(&token), Err(HubError::Token(_))));
    }
}
