//! HMAC identity tokens.
//!
//! A token binds a username to an expiry time and is signed with a shared
//! secret. Format: `<hex(username)>.<expiry unix secs>.<hex(HMAC-SHA256)>`

use ring::hmac;

use crate::error::{HubError, HubResult};

/// Verified contents of a token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Claims {
    pub username: String,
    pub expires_at: u64,
}

fn now_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

fn signing_input(username_hex: &str, expiry: u64) -> Vec<u8> {
    format!("{username_hex}.{expiry}").into_bytes()
}

/// Issue a token for `username`, valid for `ttl_secs`.
///
/// Expiry saturates at `u64::MAX`, so a huge TTL means "never expires".
pub fn issue_token(secret: &[u8], username: &str, ttl_secs: u64) -> String {
    let expiry = now_secs().saturating_add(ttl_secs);
    let username_hex = hex::encode(username.as_bytes());

    let key = hmac::Key::new(hmac::HMAC_SHA256, secret);
    let tag = hmac::sign(&key, &signing_input(&username_hex, expiry));

    format!("{username_hex}.{expiry}.{}", hex::encode(tag.as_ref()))
}

/// Verify a token's signature and expiry, returning its claims.
pub fn verify_token(secret: &[u8], token: &str) -> HubResult<Claims> {
    let mut parts = token.trim().splitn(3, '.');
    let (Some(username_hex), Some(expiry_str), Some(tag_hex)) =
        (parts.next(), parts.next(), parts.next())
    else {
        return Err(HubError::Token("malformed token".into()));
    };

    let expiry: u64 = expiry_str
        .parse()
        .map_err(|_| HubError::Token("malformed expiry".into()))?;
    let tag = hex::decode(tag_hex).map_err(|_| HubError::Token("malformed signature".into()))?;

    let key = hmac::Key::new(hmac::HMAC_SHA256, secret);
    hmac::verify(&key, &signing_input(username_hex, expiry), &tag)
        .map_err(|_| HubError::Token("invalid signature".into()))?;

    if now_secs() > expiry {
        return Err(HubError::Token("token expired".into()));
    }

    let username = hex::decode(username_hex)
        .ok()
        .and_then(|bytes| String::from_utf8(bytes).ok())
        .ok_or_else(|| HubError::Token("malformed username".into()))?;

    Ok(Claims {
        username,
        expires_at: expiry,
    })
}

/// Generate a random 32-byte secret.
pub fn generate_secret() -> Vec<u8> {
    use rand::RngCore;
    let mut secret = vec![0u8; 32];
    rand::thread_rng().fill_bytes(&mut secret);
    secret
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn issue_and_verify() {
        let secret = generate_secret();
        let token = issue_token(&secret, "alice", 3600);
        let claims = verify_token(&secret, &token).unwrap();
        assert_eq!(claims.username, "alice");
        assert!(claims.expires_at > now_secs());
    }

    #[test]
    fn huge_ttl_saturates() {
        let token = issue_token(b"k", "alice", u64::MAX);
        let claims = verify_token(b"k", &token).unwrap();
        assert_eq!(claims.username, "alice");
        assert_eq!(claims.expires_at, u64::MAX);
    }

    #[test]
    fn wrong_secret_fails() {
        let token = issue_token(b"secret-one", "alice", 3600);
        assert!(verify_token(b"secret-two", &token).is_err());
    }

    #[test]
    fn tampered_username_fails() {
        let secret = b"shared";
        let token = issue_token(secret, "alice", 3600);
        let forged = token.replacen(&hex::encode("alice"), &hex::encode("admin"), 1);
        assert!(matches!(verify_token(secret, &forged), Err(HubError::Token(_))));
    }

    #[test]
    fn expired_token_fails() {
        let secret = b"shared";
        let username_hex = hex::encode("alice");
        let expiry = now_secs() - 10;
        let key = hmac::Key::new(hmac::HMAC_SHA256, secret);
        let tag = hmac::sign(&key, &signing_input(&username_hex, expiry));
        let token = format!("{username_hex}.{expiry}.{}", hex::encode(tag.as_ref()));
        let err = verify_token(secret, &token).unwrap_err();
        assert!(err.to_string().contains("expired"));
    }

    #[test]
    fn garbage_is_malformed() {
        assert!(verify_token(b"k", "invalid.token.here").is_err());
        assert!(verify_token(b"k", "").is_err());
    }
}
