//! `chathub token <username>`: issue an identity token.

use anyhow::{bail, Result};
use chathub_core::issue_token;
use chathub_core::line::valid_identity;

/// 72 hours.
pub const DEFAULT_TTL: u64 = 72 * 3600;

pub fn run(username: &str, secret: &str, ttl: u64) -> Result<()> {
    println!("{}", issue(username, secret, ttl)?);
    Ok(())
}

fn issue(username: &str, secret: &str, ttl: u64) -> Result<String> {
    if !valid_identity(username) {
        bail!("invalid username {username:?}");
    }
    let secret = super::parse_secret(secret)?;
    Ok(issue_token(&secret, username, ttl))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chathub_core::verify_token;

    #[test]
    fn issued_token_verifies() {
        let token = issue("alice", "0a0b0c", 60).unwrap();
        let claims = verify_token(&[0x0a, 0x0b, 0x0c], &token).unwrap();
        assert_eq!(claims.username, "alice");
    }

    #[test]
    fn rejects_bad_input() {
        assert!(issue("alice", "not-hex", 60).is_err());
        assert!(issue("a:b", "00", 60).is_err());
        assert!(issue("", "00", 60).is_err());
    }
}
