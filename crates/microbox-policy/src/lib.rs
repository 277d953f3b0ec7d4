//! In-process [`AuthN`] and [`AuthZ`] adapters.
//!
//! Passwords are stored as salted SHA-256 digests and never leave the
//! adapter; tokens are opaque random strings with a fixed lifetime.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{TimeDelta, Utc};
use microbox_protocol::{Account, AuthN, AuthZ, KernelError, KernelResult, TokenClaims};
use sha2::{Digest, Sha256};
use tokio::sync::RwLock;
use tracing::{debug, instrument};
use uuid::Uuid;

pub const DEFAULT_MIN_PASSWORD_LEN: usize = 8;

struct Credential {
    account: Account,
    salt: String,
    digest: String,
    signed_in: bool,
}

impl Credential {
    fn new(username: &str, password: &str) -> Self {
        let salt = Uuid::new_v4().simple().to_string();
        let digest = digest(&salt, password);
        Self {
            account: Account {
                username: username.to_owned(),
                groups: Vec::new(),
                enabled: true,
                created_at: Utc::now(),
            },
            salt,
            digest,
            signed_in: false,
        }
    }

    fn matches(&self, password: &str) -> bool {
        let candidate = digest(&self.salt, password);
        candidate.len() == self.digest.len()
            && candidate
                .bytes()
                .zip(self.digest.bytes())
                .fold(0u8, |acc, (a, b)| acc | (a ^ b))
                == 0
    }

    fn rotate(&mut self, password: &str) {
        self.salt = Uuid::new_v4().simple().to_string();
        self.digest = digest(&self.salt, password);
    }
}

fn digest(salt: &str, password: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(b":");
    hasher.update(password.as_bytes());
    hex::encode(hasher.finalize())
}

fn invalid_credentials() -> KernelError {
    KernelError::Unauthorized("invalid username or password".to_owned())
}

/// Local user accounts held in memory.
#[derive(Clone)]
pub struct MemoryAuthN {
    users: Arc<RwLock<HashMap<String, Credential>>>,
    min_password_len: usize,
}

impl Default for MemoryAuthN {
    fn default() -> Self {
        Self::new(DEFAULT_MIN_PASSWORD_LEN)
    }
}

impl MemoryAuthN {
    pub fn new(min_password_len: usize) -> Self {
        Self {
            users: Arc::new(RwLock::new(HashMap::new())),
            min_password_len,
        }
    }

    fn check_password(&self, password: &str) -> KernelResult<()> {
        if password.chars().count() < self.min_password_len {
            return Err(KernelError::validation(
                "password",
                format!("must be at least {} characters", self.min_password_len),
            ));
        }
        Ok(())
    }

    pub async fn is_signed_in(&self, username: &str) -> bool {
        self.users
            .read()
            .await
            .get(username)
            .is_some_and(|credential| credential.signed_in)
    }

    pub async fn set_enabled(&self, username: &str, enabled: bool) -> KernelResult<Account> {
        let mut users = self.users.write().await;
        let credential = users
            .get_mut(username)
            .ok_or_else(|| KernelError::NotFound(format!("user {username}")))?;
        credential.account.enabled = enabled;
        if !enabled {
            credential.signed_in = false;
        }
        Ok(credential.account.clone())
    }

    pub async fn set_groups<I, S>(&self, username: &str, groups: I) -> KernelResult<Account>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut users = self.users.write().await;
        let credential = users
            .get_mut(username)
            .ok_or_else(|| KernelError::NotFound(format!("user {username}")))?;
        credential.account.groups = groups.into_iter().map(Into::into).collect();
        Ok(credential.account.clone())
    }
}

#[async_trait]
impl AuthN for MemoryAuthN {
    #[instrument(skip(self, password))]
    async fn login(&self, username: &str, password: &str) -> KernelResult<Account> {
        let mut users = self.users.write().await;
        let Some(credential) = users.get_mut(username) else {
            return Err(invalid_credentials());
        };
        if !credential.matches(password) {
            return Err(invalid_credentials());
        }
        if !credential.account.enabled {
            return Err(KernelError::Unauthorized(format!("account {username} is disabled")));
        }
        credential.signed_in = true;
        debug!("login accepted");
        Ok(credential.account.clone())
    }

    #[instrument(skip(self))]
    async fn logout(&self, username: &str) -> KernelResult<()> {
        let mut users = self.users.write().await;
        let credential = users
            .get_mut(username)
            .ok_or_else(|| KernelError::NotFound(format!("user {username}")))?;
        credential.signed_in = false;
        Ok(())
    }

    #[instrument(skip(self, password))]
    async fn register(&self, username: &str, password: &str) -> KernelResult<Account> {
        if username.trim().is_empty() {
            return Err(KernelError::validation("username", "cannot be empty"));
        }
        self.check_password(password)?;
        let mut users = self.users.write().await;
        if users.contains_key(username) {
            return Err(KernelError::AlreadyExists(format!("user {username}")));
        }
        let credential = Credential::new(username, password);
        let account = credential.account.clone();
        users.insert(username.to_owned(), credential);
        debug!("account registered");
        Ok(account)
    }

    #[instrument(skip(self))]
    async fn delete(&self, username: &str) -> KernelResult<()> {
        self.users
            .write()
            .await
            .remove(username)
            .map(|_| ())
            .ok_or_else(|| KernelError::NotFound(format!("user {username}")))
    }

    #[instrument(skip(self, password))]
    async fn reset(&self, username: &str, password: &str) -> KernelResult<Account> {
        self.check_password(password)?;
        let mut users = self.users.write().await;
        let credential = users
            .get_mut(username)
            .ok_or_else(|| KernelError::NotFound(format!("user {username}")))?;
        credential.rotate(password);
        credential.signed_in = false;
        Ok(credential.account.clone())
    }
}

struct TokenEntry {
    claims: TokenClaims,
    revoked: bool,
}

impl TokenEntry {
    fn valid_claims(&self) -> KernelResult<&TokenClaims> {
        if self.revoked {
            return Err(KernelError::TokenRevoked);
        }
        if Utc::now() >= self.claims.expires_at {
            return Err(KernelError::TokenExpired);
        }
        Ok(&self.claims)
    }
}

/// Opaque bearer tokens with a fixed time-to-live.
#[derive(Clone)]
pub struct TokenAuthZ {
    ttl: TimeDelta,
    tokens: Arc<RwLock<HashMap<String, TokenEntry>>>,
}

impl Default for TokenAuthZ {
    fn default() -> Self {
        Self::new(TimeDelta::hours(1))
    }
}

impl TokenAuthZ {
    pub fn new(ttl: TimeDelta) -> Self {
        Self {
            ttl,
            tokens: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn ttl(&self) -> TimeDelta {
        self.ttl
    }

    /// Drop expired and revoked tokens. Returns how many were removed.
    pub async fn purge(&self) -> usize {
        let now = Utc::now();
        let mut tokens = self.tokens.write().await;
        let before = tokens.len();
        tokens.retain(|_, entry| !entry.revoked && entry.claims.expires_at > now);
        before - tokens.len()
    }

    fn mint(&self, subject: &str) -> (String, TokenEntry) {
        let token = Uuid::new_v4().simple().to_string();
        let issued_at = Utc::now();
        let claims = TokenClaims {
            subject: subject.to_owned(),
            issued_at,
            expires_at: issued_at + self.ttl,
        };
        (
            token,
            TokenEntry {
                claims,
                revoked: false,
            },
        )
    }
}

#[async_trait]
impl AuthZ for TokenAuthZ {
    #[instrument(skip(self))]
    async fn issue_token(&self, subject: &str) -> KernelResult<String> {
        if subject.trim().is_empty() {
            return Err(KernelError::validation("subject", "cannot be empty"));
        }
        let (token, entry) = self.mint(subject);
        self.tokens.write().await.insert(token.clone(), entry);
        Ok(token)
    }

    /// Validation and revocation of the old token happen under one write
    /// guard, so a token refreshes at most once.
    #[instrument(skip_all)]
    async fn refresh_token(&self, token: &str) -> KernelResult<String> {
        let mut tokens = self.tokens.write().await;
        let entry = tokens.get_mut(token).ok_or(KernelError::TokenInvalid)?;
        let subject = entry.valid_claims()?.subject.clone();
        entry.revoked = true;
        let (fresh, entry) = self.mint(&subject);
        tokens.insert(fresh.clone(), entry);
        debug!(%subject, "token refreshed");
        Ok(fresh)
    }

    #[instrument(skip_all)]
    async fn revoke_token(&self, token: &str) -> KernelResult<()> {
        let mut tokens = self.tokens.write().await;
        let entry = tokens.get_mut(token).ok_or(KernelError::TokenInvalid)?;
        entry.revoked = true;
        Ok(())
    }

    #[instrument(skip_all)]
    async fn check_token(&self, token: &str) -> KernelResult<TokenClaims> {
        let tokens = self.tokens.read().await;
        let entry = tokens.get(token).ok_or(KernelError::TokenInvalid)?;
        entry.valid_claims().cloned()
    }
}

#[cfg(test)]
mod tests {
    use anyhow::Result;

    use super::*;

    #[tokio::test]
    async fn register_then_login() -> Result<()> {
        let authn = MemoryAuthN::default();
        let account = authn.register("ada", "correct horse").await?;
        assert_eq!(account.username, "ada");
        assert!(account.enabled);

        let signed_in = authn.login("ada", "correct horse").await?;
        assert_eq!(signed_in, account);
        assert!(authn.is_signed_in("ada").await);

        authn.logout("ada").await?;
        assert!(!authn.is_signed_in("ada").await);
        Ok(())
    }

    #[tokio::test]
    async fn wrong_password_and_unknown_user_are_unauthorized() -> Result<()> {
        let authn = MemoryAuthN::default();
        authn.register("ada", "correct horse").await?;

        assert!(authn.login("ada", "battery staple").await.unwrap_err().is_unauthorized());
        assert!(authn.login("bob", "correct horse").await.unwrap_err().is_unauthorized());
        Ok(())
    }

    #[tokio::test]
    async fn registration_rules() -> Result<()> {
        let authn = MemoryAuthN::default();
        assert!(matches!(
            authn.register("ada", "short").await.unwrap_err(),
            KernelError::Validation { .. }
        ));
        assert!(matches!(
            authn.register("", "long enough").await.unwrap_err(),
            KernelError::Validation { .. }
        ));
        authn.register("ada", "long enough").await?;
        assert!(matches!(
            authn.register("ada", "long enough").await.unwrap_err(),
            KernelError::AlreadyExists(_)
        ));
        Ok(())
    }

    #[tokio::test]
    async fn reset_replaces_the_password() -> Result<()> {
        let authn = MemoryAuthN::default();
        authn.register("ada", "first password").await?;
        authn.reset("ada", "second password").await?;

        assert!(authn.login("ada", "first password").await.is_err());
        authn.login("ada", "second password").await?;
        assert!(authn.reset("nobody", "whatever1").await.unwrap_err().is_not_found());
        Ok(())
    }

    #[tokio::test]
    async fn disabled_accounts_cannot_login() -> Result<()> {
        let authn = MemoryAuthN::default();
        authn.register("ada", "correct horse").await?;
        authn.set_enabled("ada", false).await?;
        assert!(authn.login("ada", "correct horse").await.unwrap_err().is_unauthorized());

        let account = authn.set_groups("ada", ["admin", "ops"]).await?;
        assert_eq!(account.groups, vec!["admin", "ops"]);
        Ok(())
    }

    #[tokio::test]
    async fn delete_removes_the_account() -> Result<()> {
        let authn = MemoryAuthN::default();
        authn.register("ada", "correct horse").await?;
        authn.delete("ada").await?;
        assert!(authn.login("ada", "correct horse").await.is_err());
        assert!(authn.delete("ada").await.unwrap_err().is_not_found());
        Ok(())
    }

    #[tokio::test]
    async fn token_checks_distinguish_failures() -> Result<()> {
        let authz = TokenAuthZ::default();
        let token = authz.issue_token("ada").await?;
        let claims = authz.check_token(&token).await?;
        assert_eq!(claims.subject, "ada");
        assert!(claims.expires_at > claims.issued_at);

        assert!(matches!(
            authz.check_token("not-a-token").await.unwrap_err(),
            KernelError::TokenInvalid
        ));

        authz.revoke_token(&token).await?;
        assert!(matches!(
            authz.check_token(&token).await.unwrap_err(),
            KernelError::TokenRevoked
        ));

        let expiring = TokenAuthZ::new(TimeDelta::zero());
        let stale = expiring.issue_token("ada").await?;
        assert!(matches!(
            expiring.check_token(&stale).await.unwrap_err(),
            KernelError::TokenExpired
        ));
        Ok(())
    }

    #[tokio::test]
    async fn refresh_rotates_the_token() -> Result<()> {
        let authz = TokenAuthZ::default();
        let old = authz.issue_token("ada").await?;
        let new = authz.refresh_token(&old).await?;

        assert_ne!(old, new);
        assert_eq!(authz.check_token(&new).await?.subject, "ada");
        assert!(matches!(
            authz.check_token(&old).await.unwrap_err(),
            KernelError::TokenRevoked
        ));
        assert_eq!(authz.purge().await, 1);
        Ok(())
    }

    #[tokio::test]
    async fn concurrent_refreshes_rotate_once() -> Result<()> {
        let authz = TokenAuthZ::default();
        let old = authz.issue_token("ada").await?;

        let refreshes: Vec<_> = (0..8)
            .map(|_| {
                let authz = authz.clone();
                let old = old.clone();
                tokio::spawn(async move { authz.refresh_token(&old).await })
            })
            .collect();
        let mut issued = Vec::new();
        for refresh in refreshes {
            match refresh.await? {
                Ok(token) => issued.push(token),
                Err(error) => assert!(matches!(error, KernelError::TokenRevoked)),
            }
        }

        assert_eq!(issued.len(), 1);
        assert_eq!(authz.check_token(&issued[0]).await?.subject, "ada");
        Ok(())
    }
}
