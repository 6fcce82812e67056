use std::sync::Arc;

use anyhow::Result;
use chrono::{Duration, Utc};

use crate::storage::{CredentialStore, TokenStore};
use crate::tprintln;

use super::credential::{Account, AccessRight};
use super::session::{RandomTokenIds, SessionToken, TokenIds, TokenRights, TokenState};

/// Fixed validity window from issuance; tokens are not renewed by use.
const TOKEN_TTL_SECS: i64 = 60 * 60;

/// Issues session tokens against the credential store and validates them
/// against the token store. All collaborators are injected; there is no
/// default store wiring here.
pub struct Authorizer {
    credentials: Arc<dyn CredentialStore>,
    tokens: Arc<dyn TokenStore>,
    ids: Arc<dyn TokenIds>,
    ttl: Duration,
}

impl Authorizer {
    pub fn new(credentials: Arc<dyn CredentialStore>, tokens: Arc<dyn TokenStore>) -> Self {
        Self::with_ids(credentials, tokens, Arc::new(RandomTokenIds))
    }

    pub fn with_ids(
        credentials: Arc<dyn CredentialStore>,
        tokens: Arc<dyn TokenStore>,
        ids: Arc<dyn TokenIds>,
    ) -> Self {
        Self { credentials, tokens, ids, ttl: Duration::seconds(TOKEN_TTL_SECS) }
    }

    /// Exchange a username/password pair for a fresh session token.
    ///
    /// A credential mismatch is a normal negative result (`Ok(None)`), left to
    /// the caller to map to a "wrong username or password" response. Store
    /// failures, including the token insert, propagate as errors.
    pub fn issue_token(&self, account: &Account) -> Result<Option<SessionToken>> {
        let Some(cred) = self
            .credentials
            .find_by_credentials(&account.username, &account.password)?
        else {
            return Ok(None);
        };
        let token = SessionToken {
            token_id: self.ids.generate()?,
            user_name: cred.username,
            access_rights: cred.access_rights,
            valid: true,
            expiration_time: Utc::now() + self.ttl,
        };
        self.tokens.insert(&token)?;
        tprintln!("auth.issue user={} expires={}", token.user_name, token.expiration_time);
        Ok(Some(token))
    }

    /// Validate a bearer token id and report its rights and state.
    ///
    /// Unknown, revoked, and expired tokens are success-typed results with a
    /// discriminating state, never errors; only store failures propagate.
    pub fn validate_token(&self, token_id: &str) -> Result<TokenRights> {
        let Some(token) = self.tokens.find_by_id(token_id)? else {
            return Ok(TokenRights::denied(TokenState::Invalid));
        };
        if token.usable_at(Utc::now()) {
            return Ok(TokenRights { access_rights: token.access_rights, state: TokenState::Valid });
        }
        // Not usable: revocation wins over expiry; an unrevoked token can
        // only be here because its window has passed.
        if !token.valid {
            return Ok(TokenRights::denied(TokenState::Invalid));
        }
        Ok(TokenRights::denied(TokenState::Expired))
    }

    /// Per-request authorization decision: the token must validate as VALID
    /// and carry the required right. An absent or empty bearer token is
    /// unauthorized without touching the store.
    pub fn authorized(&self, token_id: Option<&str>, required: AccessRight) -> Result<bool> {
        let Some(token_id) = token_id.filter(|t| !t.is_empty()) else {
            return Ok(false);
        };
        let rights = self.validate_token(token_id)?;
        Ok(rights.state == TokenState::Valid && rights.access_rights.contains(&required.code()))
    }

    /// Revoke a token by flagging it invalid in place. Returns false when the
    /// token id is unknown. Deliberately not linearizable against concurrent
    /// validation; a racing validate may still observe the stale valid flag.
    pub fn revoke_token(&self, token_id: &str) -> Result<bool> {
        let Some(mut token) = self.tokens.find_by_id(token_id)? else {
            return Ok(false);
        };
        token.valid = false;
        self.tokens.update(&token)?;
        tprintln!("auth.revoke user={}", token.user_name);
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::Credential;
    use anyhow::anyhow;
    use parking_lot::Mutex;

    struct MemCredentials(Vec<Credential>);

    impl CredentialStore for MemCredentials {
        fn find_by_credentials(&self, username: &str, password: &str) -> Result<Option<Credential>> {
            Ok(self
                .0
                .iter()
                .find(|c| c.username == username && c.password == password)
                .cloned())
        }
        fn insert(&self, _cred: &Credential) -> Result<()> { Ok(()) }
        fn delete_by_credentials(&self, _username: &str, _password: &str) -> Result<()> { Ok(()) }
    }

    #[derive(Default)]
    struct MemTokens(Mutex<Vec<SessionToken>>);

    impl TokenStore for MemTokens {
        fn find_by_id(&self, token_id: &str) -> Result<Option<SessionToken>> {
            Ok(self.0.lock().iter().find(|t| t.token_id == token_id).cloned())
        }
        fn insert(&self, token: &SessionToken) -> Result<()> {
            self.0.lock().push(token.clone());
            Ok(())
        }
        fn update(&self, token: &SessionToken) -> Result<()> {
            let mut items = self.0.lock();
            if let Some(slot) = items.iter_mut().find(|t| t.token_id == token.token_id) {
                *slot = token.clone();
            }
            Ok(())
        }
        fn delete_by_id(&self, _token_id: &str) -> Result<()> { Ok(()) }
    }

    /// Token store whose every operation fails, for error propagation checks.
    struct BrokenTokens;

    impl TokenStore for BrokenTokens {
        fn find_by_id(&self, _token_id: &str) -> Result<Option<SessionToken>> {
            Err(anyhow!("connection lost"))
        }
        fn insert(&self, _token: &SessionToken) -> Result<()> {
            Err(anyhow!("connection lost"))
        }
        fn update(&self, _token: &SessionToken) -> Result<()> {
            Err(anyhow!("connection lost"))
        }
        fn delete_by_id(&self, _token_id: &str) -> Result<()> {
            Err(anyhow!("connection lost"))
        }
    }

    fn someone() -> Credential {
        Credential {
            username: "someone".into(),
            password: "password".into(),
            access_rights: vec![1, 2, 3],
        }
    }

    fn authorizer_with(tokens: Arc<dyn TokenStore>) -> Authorizer {
        Authorizer::new(Arc::new(MemCredentials(vec![someone()])), tokens)
    }

    #[test]
    fn issue_token_copies_credential_fields_and_stores_it() {
        let tokens = Arc::new(MemTokens::default());
        let auth = authorizer_with(tokens.clone());

        let account = Account { username: "someone".into(), password: "password".into() };
        let token = auth.issue_token(&account).unwrap().expect("token for valid credential");

        assert_eq!(token.user_name, "someone");
        assert_eq!(token.access_rights, vec![1, 2, 3]);
        assert!(token.valid);
        assert!(token.expiration_time > Utc::now());
        // persisted under its id
        let stored = tokens.find_by_id(&token.token_id).unwrap().unwrap();
        assert_eq!(stored, token);
    }

    #[test]
    fn issue_token_rejects_unknown_credentials() {
        let auth = authorizer_with(Arc::new(MemTokens::default()));
        let account = Account { username: "someone".into(), password: "wrong".into() };
        assert!(auth.issue_token(&account).unwrap().is_none());
        let account = Account { username: "nobody".into(), password: "password".into() };
        assert!(auth.issue_token(&account).unwrap().is_none());
    }

    #[test]
    fn validate_round_trip_reports_valid_with_same_rights() {
        let auth = authorizer_with(Arc::new(MemTokens::default()));
        let account = Account { username: "someone".into(), password: "password".into() };
        let token = auth.issue_token(&account).unwrap().unwrap();

        let rights = auth.validate_token(&token.token_id).unwrap();
        assert_eq!(rights.state, TokenState::Valid);
        assert_eq!(rights.access_rights, vec![1, 2, 3]);

        // idempotent without intervening mutation
        let again = auth.validate_token(&token.token_id).unwrap();
        assert_eq!(again, rights);
    }

    #[test]
    fn validate_unknown_token_is_invalid() {
        let auth = authorizer_with(Arc::new(MemTokens::default()));
        let rights = auth.validate_token("no-such-token").unwrap();
        assert_eq!(rights, TokenRights::denied(TokenState::Invalid));
    }

    #[test]
    fn validate_revoked_token_is_invalid_regardless_of_expiry() {
        let tokens = Arc::new(MemTokens::default());
        tokens
            .insert(&SessionToken {
                token_id: "revoked".into(),
                user_name: "someone".into(),
                access_rights: vec![1, 2, 3],
                valid: false,
                expiration_time: Utc::now() + Duration::hours(1),
            })
            .unwrap();
        let auth = authorizer_with(tokens);
        let rights = auth.validate_token("revoked").unwrap();
        assert_eq!(rights.state, TokenState::Invalid);
        assert!(rights.access_rights.is_empty());
    }

    #[test]
    fn validate_expired_token_is_expired() {
        let tokens = Arc::new(MemTokens::default());
        tokens
            .insert(&SessionToken {
                token_id: "stale".into(),
                user_name: "someone".into(),
                access_rights: vec![1, 2, 3],
                valid: true,
                expiration_time: Utc::now() - Duration::seconds(1),
            })
            .unwrap();
        let auth = authorizer_with(tokens);
        let rights = auth.validate_token("stale").unwrap();
        assert_eq!(rights.state, TokenState::Expired);
        assert!(rights.access_rights.is_empty());
    }

    #[test]
    fn authorized_requires_membership_of_required_right() {
        let auth = authorizer_with(Arc::new(MemTokens::default()));
        let account = Account { username: "someone".into(), password: "password".into() };
        let token = auth.issue_token(&account).unwrap().unwrap();

        // rights [1,2,3]: Read (1) granted, Create (0) not
        assert!(auth.authorized(Some(&token.token_id), AccessRight::Read).unwrap());
        assert!(!auth.authorized(Some(&token.token_id), AccessRight::Create).unwrap());
    }

    #[test]
    fn authorized_without_token_skips_the_store() {
        // BrokenTokens would error on any store access
        let auth = authorizer_with(Arc::new(BrokenTokens));
        assert!(!auth.authorized(None, AccessRight::Read).unwrap());
        assert!(!auth.authorized(Some(""), AccessRight::Read).unwrap());
    }

    /// Id source with no entropy available.
    struct NoEntropyIds;

    impl TokenIds for NoEntropyIds {
        fn generate(&self) -> Result<String> {
            Err(anyhow!("entropy source unavailable"))
        }
    }

    #[test]
    fn issue_token_fails_when_id_generation_fails() {
        let auth = Authorizer::with_ids(
            Arc::new(MemCredentials(vec![someone()])),
            Arc::new(MemTokens::default()),
            Arc::new(NoEntropyIds),
        );
        let account = Account { username: "someone".into(), password: "password".into() };
        // No predictable fallback id: the issue fails outright
        assert!(auth.issue_token(&account).is_err());
    }

    #[test]
    fn store_failures_propagate() {
        let auth = authorizer_with(Arc::new(BrokenTokens));
        let account = Account { username: "someone".into(), password: "password".into() };
        assert!(auth.issue_token(&account).is_err());
        assert!(auth.validate_token("whatever").is_err());
        assert!(auth.authorized(Some("whatever"), AccessRight::Read).is_err());
    }

    #[test]
    fn revoke_flips_valid_and_later_validation_sees_invalid() {
        let auth = authorizer_with(Arc::new(MemTokens::default()));
        let account = Account { username: "someone".into(), password: "password".into() };
        let token = auth.issue_token(&account).unwrap().unwrap();

        assert!(auth.revoke_token(&token.token_id).unwrap());
        let rights = auth.validate_token(&token.token_id).unwrap();
        assert_eq!(rights.state, TokenState::Invalid);

        assert!(!auth.revoke_token("no-such-token").unwrap());
    }
}
