use anyhow::{anyhow, Result};
use base64::Engine;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// An issued session token. Access rights are copied from the credential at
/// issuance time and are not re-read afterwards; a rights change on the
/// credential does not propagate to tokens already out in the wild.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionToken {
    #[serde(rename = "tokenId")]
    pub token_id: String,
    #[serde(rename = "userName")]
    pub user_name: String,
    #[serde(rename = "accessRights")]
    pub access_rights: Vec<i32>,
    /// Explicit revocation flag. A token is usable iff `valid` and unexpired.
    pub valid: bool,
    #[serde(rename = "expirationTime")]
    pub expiration_time: DateTime<Utc>,
}

impl SessionToken {
    /// Usable iff `valid == true` and `now < expiration_time`.
    pub fn usable_at(&self, now: DateTime<Utc>) -> bool {
        self.valid && now < self.expiration_time
    }
}

/// Outcome of a token validation check. Never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TokenState {
    Valid,
    Expired,
    Invalid,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenRights {
    #[serde(rename = "accessRights")]
    pub access_rights: Vec<i32>,
    pub state: TokenState,
}

impl TokenRights {
    pub fn denied(state: TokenState) -> Self {
        Self { access_rights: Vec::new(), state }
    }
}

/// Token id source. Ids must be effectively unguessable and unique without
/// any uniqueness verification against the token store, so a generator that
/// cannot produce entropy must fail rather than fall back.
pub trait TokenIds: Send + Sync {
    fn generate(&self) -> Result<String>;
}

/// Default generator: 256-bit random token, base64url without padding.
#[derive(Debug, Clone, Copy, Default)]
pub struct RandomTokenIds;

impl TokenIds for RandomTokenIds {
    fn generate(&self) -> Result<String> {
        let mut buf = [0u8; 32];
        getrandom::getrandom(&mut buf)
            .map_err(|e| anyhow!("token id entropy source failed: {}", e))?;
        Ok(base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(buf))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn usable_window_is_half_open() {
        let now = Utc::now();
        let tok = SessionToken {
            token_id: "t".into(),
            user_name: "u".into(),
            access_rights: vec![1],
            valid: true,
            expiration_time: now,
        };
        // expiration_time <= now means expired
        assert!(!tok.usable_at(now));
        assert!(tok.usable_at(now - Duration::seconds(1)));
    }

    #[test]
    fn revoked_token_is_never_usable() {
        let now = Utc::now();
        let tok = SessionToken {
            token_id: "t".into(),
            user_name: "u".into(),
            access_rights: vec![1],
            valid: false,
            expiration_time: now + Duration::hours(1),
        };
        assert!(!tok.usable_at(now));
    }

    #[test]
    fn random_ids_are_distinct_and_urlsafe() {
        let ids = RandomTokenIds;
        let a = ids.generate().unwrap();
        let b = ids.generate().unwrap();
        assert_ne!(a, b);
        assert_eq!(a.len(), 43); // 32 bytes, base64url, no padding
        assert!(a.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
    }
}
