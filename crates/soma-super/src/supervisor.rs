use std::collections::HashMap;
use std::future::Future;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use soma_config::ActivationMode;
use soma_store::{CredentialRow, Store, TokenRow, UserRow};
use tokio::sync::RwLock;
use tracing::{info, warn};
use uuid::Uuid;

use crate::credentials::{hash_password, verify_password};
use crate::error::SuperError;
use crate::kex::{KexReply, KexSession};
use crate::ldap::OwnershipVerifier;
use crate::tokens::{generate_salt, mint_token};

/// Target of the audit log; security-relevant events are written here
/// regardless of the client-facing outcome.
const AUDIT: &str = "audit";

/// Every encrypted endpoint replies no earlier than this after arrival,
/// regardless of outcome.
const ENCRYPTED_FLOOR: StdDuration = StdDuration::from_secs(1);

// ── Wire payloads (inside the encrypted envelope) ─────────────────────────────

#[derive(Debug, Serialize, Deserialize)]
pub struct ActivateRequest {
    pub user: String,
    pub password: String,
    /// Secret for the external ownership check (LDAP password).
    pub ownership_secret: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "variant", rename_all = "snake_case")]
pub enum PasswordVariant {
    Change { current_password: String },
    Reset { ownership_secret: String },
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PasswordRequest {
    pub user: String,
    pub new_password: String,
    #[serde(flatten)]
    pub variant: PasswordVariant,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TokenRequest {
    pub user: String,
    pub password: String,
}

/// What the client gets back from a successful activation, password
/// operation, or token request.
#[derive(Debug, Serialize, Deserialize)]
pub struct TokenIdentity {
    pub user: String,
    pub token: String,
    pub valid_from: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// Token invalidation variants.
#[derive(Debug, Clone, PartialEq)]
pub enum InvalidateScope {
    /// The token used to authenticate this request.
    Current,
    /// Every token of the requesting account.
    AllOwn,
    /// Every token of a named account (admin only; authorization is
    /// enforced at the API boundary).
    Account(String),
    /// Every token in the system (admin only).
    Global,
}

// ── Supervisor ────────────────────────────────────────────────────────────────

/// Owner of credentials, tokens, and key-exchange state. The r/w master
/// instance keeps the authoritative token set in memory and mirrors
/// every change to the store.
pub struct Supervisor {
    store: Arc<dyn Store>,
    verifier: Arc<dyn OwnershipVerifier>,
    activation: ActivationMode,
    token_key: Vec<u8>,
    credential_expiry_days: u32,
    kex_expiry_seconds: i64,
    credentials: RwLock<HashMap<String, CredentialRow>>,
    tokens: RwLock<HashMap<String, TokenRow>>,
    kex: RwLock<HashMap<Uuid, KexSession>>,
}

impl Supervisor {
    pub fn new(
        store: Arc<dyn Store>,
        verifier: Arc<dyn OwnershipVerifier>,
        activation: ActivationMode,
        token_key: Vec<u8>,
        credential_expiry_days: u32,
        kex_expiry_seconds: i64,
    ) -> Self {
        sodiumoxide::init().ok();
        Supervisor {
            store,
            verifier,
            activation,
            token_key,
            credential_expiry_days,
            kex_expiry_seconds,
            credentials: RwLock::new(HashMap::new()),
            tokens: RwLock::new(HashMap::new()),
            kex: RwLock::new(HashMap::new()),
        }
    }

    /// Load the authoritative token set from the store.
    pub async fn load(&self) -> Result<(), SuperError> {
        let now = Utc::now();
        let rows = self.store.list_valid_tokens(now).await?;
        let mut tokens = self.tokens.write().await;
        for row in rows {
            tokens.insert(row.token.clone(), row);
        }
        info!(count = tokens.len(), "supervisor loaded token table");
        Ok(())
    }

    // ── Key exchange ──────────────────────────────────────────────────────────

    /// Open a key-exchange session from the client's public key and IV.
    pub async fn kex_init(
        &self,
        peer_public_hex: &str,
        iv_hex: &str,
        source_ip: IpAddr,
    ) -> Result<KexReply, SuperError> {
        let session =
            KexSession::initiate(peer_public_hex, iv_hex, source_ip, self.kex_expiry_seconds)?;
        let reply = session.reply();

        let mut kex = self.kex.write().await;
        let now = Utc::now();
        kex.retain(|_, s| !s.is_expired(now));
        kex.insert(session.request_id, session);
        Ok(reply)
    }

    /// Decrypt one message under a kex session, checking TTL and source.
    async fn kex_open(
        &self,
        request_id: Uuid,
        source_ip: IpAddr,
        ciphertext: &[u8],
    ) -> Result<Vec<u8>, SuperError> {
        let mut kex = self.kex.write().await;
        let session = kex.get_mut(&request_id).ok_or(SuperError::KexGone)?;
        if session.is_expired(Utc::now()) {
            kex.remove(&request_id);
            return Err(SuperError::KexGone);
        }
        if !session.is_same_source(source_ip) {
            warn!(target: AUDIT, %request_id, %source_ip, "kex source address mismatch");
            return Err(SuperError::Forbidden);
        }
        session.decrypt(ciphertext)
    }

    async fn kex_seal(&self, request_id: Uuid, plaintext: &[u8]) -> Result<Vec<u8>, SuperError> {
        let mut kex = self.kex.write().await;
        let session = kex.get_mut(&request_id).ok_or(SuperError::KexGone)?;
        Ok(session.encrypt(plaintext))
    }

    /// Constant-time floor for encrypted endpoints: hold the reply until
    /// at least one second after arrival and collapse every failure except
    /// NotImplemented into an opaque Forbidden.
    async fn delayed<T, F>(&self, fut: F) -> Result<T, SuperError>
    where
        F: Future<Output = Result<T, SuperError>>,
    {
        let start = tokio::time::Instant::now();
        let result = fut.await;
        tokio::time::sleep_until(start + ENCRYPTED_FLOOR).await;
        match result {
            Ok(v) => Ok(v),
            Err(e @ SuperError::NotImplemented(_)) => Err(e),
            Err(e) => {
                warn!(target: AUDIT, error = %e, "encrypted endpoint failure");
                Err(SuperError::Forbidden)
            }
        }
    }

    // ── Activation ────────────────────────────────────────────────────────────

    /// Activate an inactive account: verify external ownership, persist
    /// credentials and the first token in one batch, mark the account
    /// active, and return the token under the session.
    pub async fn activate_user(
        &self,
        request_id: Uuid,
        source_ip: IpAddr,
        ciphertext: &[u8],
    ) -> Result<Vec<u8>, SuperError> {
        self.delayed(self.activate_inner(request_id, source_ip, ciphertext))
            .await
    }

    async fn activate_inner(
        &self,
        request_id: Uuid,
        source_ip: IpAddr,
        ciphertext: &[u8],
    ) -> Result<Vec<u8>, SuperError> {
        if self.activation == ActivationMode::MailToken {
            return Err(SuperError::NotImplemented(
                "mailtoken activation is declared but not wired".into(),
            ));
        }

        let plaintext = self.kex_open(request_id, source_ip, ciphertext).await?;
        let req: ActivateRequest = serde_json::from_slice(&plaintext)
            .map_err(|e| SuperError::BadRequest(e.to_string()))?;

        let user = self
            .store
            .get_user_by_name(&req.user)
            .await?
            .ok_or(SuperError::Forbidden)?;
        if user.active || user.deleted {
            warn!(target: AUDIT, user = %req.user, "activation of active or deleted account");
            return Err(SuperError::Forbidden);
        }
        if !self.verifier.verify(&req.user, &req.ownership_secret).await? {
            warn!(target: AUDIT, user = %req.user, "ownership verification failed");
            return Err(SuperError::Forbidden);
        }

        let identity = self.issue_credentials(&user, &req.password).await?;
        self.store
            .upsert_user(&UserRow { active: true, ..user.clone() })
            .await?;

        info!(target: AUDIT, user = %req.user, "account activated");
        let reply = serde_json::to_vec(&identity)
            .map_err(|e| SuperError::Internal(e.to_string()))?;
        self.kex_seal(request_id, &reply).await
    }

    /// Write a fresh credential and token pair for a user.
    async fn issue_credentials(
        &self,
        user: &UserRow,
        password: &str,
    ) -> Result<TokenIdentity, SuperError> {
        let now = Utc::now();
        let phc_hash = hash_password(password)?;
        let credential = CredentialRow {
            user_id: user.id,
            user_name: user.name.clone(),
            phc_hash,
            valid_from: now,
            expires_at: now + Duration::days(self.credential_expiry_days as i64),
            active: true,
        };
        let token_row = self.mint_token_row(&user.name, now)?;

        self.store.upsert_credential(&credential).await?;
        self.store.insert_token(&token_row).await?;

        self.credentials
            .write()
            .await
            .insert(user.name.clone(), credential);
        self.tokens
            .write()
            .await
            .insert(token_row.token.clone(), token_row.clone());

        Ok(TokenIdentity {
            user: user.name.clone(),
            token: token_row.token,
            valid_from: token_row.valid_from,
            expires_at: token_row.expires_at,
        })
    }

    fn mint_token_row(&self, user: &str, now: DateTime<Utc>) -> Result<TokenRow, SuperError> {
        let salt = generate_salt();
        let token = mint_token(&self.token_key, user, now, &salt);
        Ok(TokenRow {
            token,
            salt,
            user_name: user.to_string(),
            valid_from: now,
            expires_at: now + Duration::hours(16),
            bound_ip: None,
        })
    }

    // ── Password change / reset ───────────────────────────────────────────────

    pub async fn password(
        &self,
        request_id: Uuid,
        source_ip: IpAddr,
        ciphertext: &[u8],
    ) -> Result<Vec<u8>, SuperError> {
        self.delayed(self.password_inner(request_id, source_ip, ciphertext))
            .await
    }

    async fn password_inner(
        &self,
        request_id: Uuid,
        source_ip: IpAddr,
        ciphertext: &[u8],
    ) -> Result<Vec<u8>, SuperError> {
        let plaintext = self.kex_open(request_id, source_ip, ciphertext).await?;
        let req: PasswordRequest = serde_json::from_slice(&plaintext)
            .map_err(|e| SuperError::BadRequest(e.to_string()))?;

        let user = self
            .store
            .get_user_by_name(&req.user)
            .await?
            .filter(|u| u.active && !u.deleted)
            .ok_or(SuperError::Forbidden)?;

        match &req.variant {
            PasswordVariant::Change { current_password } => {
                let cred = self
                    .store
                    .get_active_credential(&req.user)
                    .await?
                    .ok_or(SuperError::Forbidden)?;
                if !verify_password(current_password, &cred.phc_hash) {
                    warn!(target: AUDIT, user = %req.user, "password change with wrong password");
                    return Err(SuperError::Forbidden);
                }
            }
            PasswordVariant::Reset { ownership_secret } => {
                if self.activation == ActivationMode::MailToken {
                    return Err(SuperError::NotImplemented(
                        "mailtoken reset is declared but not wired".into(),
                    ));
                }
                if !self.verifier.verify(&req.user, ownership_secret).await? {
                    warn!(target: AUDIT, user = %req.user, "password reset ownership failure");
                    return Err(SuperError::Forbidden);
                }
            }
        }

        // previous credentials die one second before the new one starts
        let now = Utc::now();
        self.store
            .expire_credentials_before(&req.user, now - Duration::seconds(1))
            .await?;
        // previously issued tokens are revoked alongside
        let _ = self.store.expire_tokens_for_user(&req.user, now).await?;
        self.tokens
            .write()
            .await
            .retain(|_, t| t.user_name != req.user);

        let identity = self.issue_credentials(&user, &req.new_password).await?;
        info!(target: AUDIT, user = %req.user, "password updated");
        let reply = serde_json::to_vec(&identity)
            .map_err(|e| SuperError::Internal(e.to_string()))?;
        self.kex_seal(request_id, &reply).await
    }

    // ── Token request ─────────────────────────────────────────────────────────

    /// Issue a fresh token to a user presenting their password.
    pub async fn token_request(
        &self,
        request_id: Uuid,
        source_ip: IpAddr,
        ciphertext: &[u8],
    ) -> Result<Vec<u8>, SuperError> {
        self.delayed(self.token_request_inner(request_id, source_ip, ciphertext))
            .await
    }

    async fn token_request_inner(
        &self,
        request_id: Uuid,
        source_ip: IpAddr,
        ciphertext: &[u8],
    ) -> Result<Vec<u8>, SuperError> {
        let plaintext = self.kex_open(request_id, source_ip, ciphertext).await?;
        let req: TokenRequest = serde_json::from_slice(&plaintext)
            .map_err(|e| SuperError::BadRequest(e.to_string()))?;

        let user = self
            .store
            .get_user_by_name(&req.user)
            .await?
            .filter(|u| u.active && !u.deleted)
            .ok_or(SuperError::Forbidden)?;
        let cred = self
            .store
            .get_active_credential(&req.user)
            .await?
            .ok_or(SuperError::Forbidden)?;
        if cred.expires_at <= Utc::now() || !verify_password(&req.password, &cred.phc_hash) {
            warn!(target: AUDIT, user = %req.user, "token request rejected");
            return Err(SuperError::Forbidden);
        }

        let token_row = self.mint_token_row(&user.name, Utc::now())?;
        self.store.insert_token(&token_row).await?;
        self.tokens
            .write()
            .await
            .insert(token_row.token.clone(), token_row.clone());

        info!(target: AUDIT, user = %req.user, "token issued");
        let identity = TokenIdentity {
            user: user.name,
            token: token_row.token,
            valid_from: token_row.valid_from,
            expires_at: token_row.expires_at,
        };
        let reply = serde_json::to_vec(&identity)
            .map_err(|e| SuperError::Internal(e.to_string()))?;
        self.kex_seal(request_id, &reply).await
    }

    // ── Token invalidation ────────────────────────────────────────────────────

    /// Invalidate tokens. The authenticating token must exist in exactly
    /// one persisted row; any other count means the authentication
    /// system is corrupt and the process aborts.
    pub async fn token_invalidate(
        &self,
        auth_user: &str,
        auth_token: &str,
        scope: InvalidateScope,
    ) -> Result<u64, SuperError> {
        let now = Utc::now();
        let count = match &scope {
            InvalidateScope::Current => {
                let affected = self.store.expire_token(auth_token, now).await?;
                if affected != 1 {
                    tracing::error!(
                        target: AUDIT,
                        user = auth_user,
                        affected,
                        "supervisor corrupted: authenticating token matched {} rows",
                        affected
                    );
                    // deliberate fail-fast: the authentication system is
                    // in an impossible state
                    panic!("supervisor corruption detected, check audit log");
                }
                self.tokens.write().await.remove(auth_token);
                affected
            }
            InvalidateScope::AllOwn => {
                let affected = self.store.expire_tokens_for_user(auth_user, now).await?;
                self.tokens
                    .write()
                    .await
                    .retain(|_, t| t.user_name != auth_user);
                affected
            }
            InvalidateScope::Account(target) => {
                let affected = self.store.expire_tokens_for_user(target, now).await?;
                self.tokens.write().await.retain(|_, t| &t.user_name != target);
                affected
            }
            InvalidateScope::Global => {
                let affected = self.store.expire_all_tokens(now).await?;
                self.tokens.write().await.clear();
                affected
            }
        };
        info!(target: AUDIT, user = auth_user, ?scope, count, "tokens invalidated");
        Ok(count)
    }

    // ── Authentication ────────────────────────────────────────────────────────

    /// BasicAuth check for every ordinary request: user, token, and the
    /// token's bound address when one was recorded.
    pub async fn authenticate_basic(
        &self,
        user_name: &str,
        token: &str,
        source_ip: IpAddr,
    ) -> Result<UserRow, SuperError> {
        let now = Utc::now();
        let valid = {
            let tokens = self.tokens.read().await;
            tokens
                .get(token)
                .map(|t| {
                    t.user_name == user_name
                        && t.is_valid_at(now)
                        && t.bound_ip
                            .as_deref()
                            .map(|ip| ip.parse::<IpAddr>().map_or(false, |b| b == source_ip))
                            .unwrap_or(true)
                })
                .unwrap_or(false)
        };
        if !valid {
            return Err(SuperError::Unauthorized);
        }
        self.store
            .get_user_by_name(user_name)
            .await?
            .filter(|u| u.active && !u.deleted)
            .ok_or(SuperError::Unauthorized)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kex::TestPeer;
    use crate::ldap::StaticVerifier;
    use soma_domain::{TeamId, UserId};
    use soma_store::InMemoryStore;

    const IP: &str = "198.51.100.7";

    fn ip() -> IpAddr {
        IP.parse().unwrap()
    }

    async fn setup(activation: ActivationMode, kex_ttl: i64) -> (Arc<Supervisor>, Arc<InMemoryStore>) {
        let store = Arc::new(InMemoryStore::new());
        store
            .upsert_user(&UserRow {
                id: UserId::generate(),
                name: "jdoe".into(),
                team_id: TeamId::generate(),
                active: false,
                deleted: false,
            })
            .await
            .unwrap();
        let verifier = Arc::new(StaticVerifier::new().accept("jdoe", "ldap-pass"));
        let supervisor = Arc::new(Supervisor::new(
            store.clone(),
            verifier,
            activation,
            b"0123456789abcdef".to_vec(),
            365,
            kex_ttl,
        ));
        (supervisor, store)
    }

    async fn activate(
        supervisor: &Supervisor,
        peer: &mut TestPeer,
    ) -> Result<TokenIdentity, SuperError> {
        let reply = supervisor
            .kex_init(&peer.public_hex(), &peer.iv_hex(), ip())
            .await?;
        let payload = serde_json::to_vec(&ActivateRequest {
            user: "jdoe".into(),
            password: "hunter2hunter2".into(),
            ownership_secret: "ldap-pass".into(),
        })
        .unwrap();
        let ciphertext = peer.encrypt(&reply.public_key, &payload);
        let sealed = supervisor
            .activate_user(reply.request_id, ip(), &ciphertext)
            .await?;
        let plain = peer.decrypt(&reply.public_key, &sealed);
        Ok(serde_json::from_slice(&plain).unwrap())
    }

    #[tokio::test(start_paused = true)]
    async fn activation_issues_working_token() {
        let (supervisor, store) = setup(ActivationMode::Ldap, 60).await;
        let mut peer = TestPeer::new();

        let identity = activate(&supervisor, &mut peer).await.unwrap();
        assert_eq!(identity.user, "jdoe");

        // the account is now active and the token authenticates
        let user = store.get_user_by_name("jdoe").await.unwrap().unwrap();
        assert!(user.active);
        supervisor
            .authenticate_basic("jdoe", &identity.token, ip())
            .await
            .unwrap();
        // and it is persisted exactly once
        assert!(store.get_token(&identity.token).await.unwrap().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn activation_of_active_account_is_opaque_forbidden() {
        let (supervisor, store) = setup(ActivationMode::Ldap, 60).await;
        let user = store.get_user_by_name("jdoe").await.unwrap().unwrap();
        store.upsert_user(&UserRow { active: true, ..user }).await.unwrap();

        let mut peer = TestPeer::new();
        let err = activate(&supervisor, &mut peer).await.unwrap_err();
        assert!(matches!(err, SuperError::Forbidden));
    }

    #[tokio::test(start_paused = true)]
    async fn wrong_ownership_secret_is_opaque_forbidden() {
        let (supervisor, _) = setup(ActivationMode::Ldap, 60).await;
        let mut peer = TestPeer::new();
        let reply = supervisor
            .kex_init(&peer.public_hex(), &peer.iv_hex(), ip())
            .await
            .unwrap();
        let payload = serde_json::to_vec(&ActivateRequest {
            user: "jdoe".into(),
            password: "hunter2hunter2".into(),
            ownership_secret: "wrong".into(),
        })
        .unwrap();
        let ciphertext = peer.encrypt(&reply.public_key, &payload);
        let err = supervisor
            .activate_user(reply.request_id, ip(), &ciphertext)
            .await
            .unwrap_err();
        assert!(matches!(err, SuperError::Forbidden));
    }

    #[tokio::test(start_paused = true)]
    async fn encrypted_failures_take_at_least_one_second() {
        let (supervisor, _) = setup(ActivationMode::Ldap, 60).await;
        let start = tokio::time::Instant::now();
        let err = supervisor
            .activate_user(Uuid::new_v4(), ip(), b"garbage")
            .await
            .unwrap_err();
        assert!(matches!(err, SuperError::Forbidden));
        assert!(start.elapsed() >= StdDuration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn expired_kex_session_is_rejected() {
        let (supervisor, _) = setup(ActivationMode::Ldap, 0).await;
        let mut peer = TestPeer::new();
        let reply = supervisor
            .kex_init(&peer.public_hex(), &peer.iv_hex(), ip())
            .await
            .unwrap();

        tokio::time::sleep(StdDuration::from_secs(2)).await;
        let payload = serde_json::to_vec(&ActivateRequest {
            user: "jdoe".into(),
            password: "hunter2hunter2".into(),
            ownership_secret: "ldap-pass".into(),
        })
        .unwrap();
        let ciphertext = peer.encrypt(&reply.public_key, &payload);
        let err = supervisor
            .activate_user(reply.request_id, ip(), &ciphertext)
            .await
            .unwrap_err();
        // a valid-looking decryption attempt on a stale session still fails
        assert!(matches!(err, SuperError::Forbidden));
    }

    #[tokio::test(start_paused = true)]
    async fn kex_from_other_address_is_rejected() {
        let (supervisor, _) = setup(ActivationMode::Ldap, 60).await;
        let mut peer = TestPeer::new();
        let reply = supervisor
            .kex_init(&peer.public_hex(), &peer.iv_hex(), ip())
            .await
            .unwrap();
        let payload = serde_json::to_vec(&ActivateRequest {
            user: "jdoe".into(),
            password: "x".into(),
            ownership_secret: "y".into(),
        })
        .unwrap();
        let ciphertext = peer.encrypt(&reply.public_key, &payload);
        let err = supervisor
            .activate_user(reply.request_id, "203.0.113.99".parse().unwrap(), &ciphertext)
            .await
            .unwrap_err();
        assert!(matches!(err, SuperError::Forbidden));
    }

    #[tokio::test(start_paused = true)]
    async fn mailtoken_activation_surfaces_not_implemented() {
        let (supervisor, _) = setup(ActivationMode::MailToken, 60).await;
        let err = supervisor
            .activate_user(Uuid::new_v4(), ip(), b"anything")
            .await
            .unwrap_err();
        assert!(matches!(err, SuperError::NotImplemented(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn invalidate_current_token() {
        let (supervisor, store) = setup(ActivationMode::Ldap, 60).await;
        let mut peer = TestPeer::new();
        let identity = activate(&supervisor, &mut peer).await.unwrap();

        let count = supervisor
            .token_invalidate("jdoe", &identity.token, InvalidateScope::Current)
            .await
            .unwrap();
        assert_eq!(count, 1);

        // the token no longer authenticates and the row is expired
        let err = supervisor
            .authenticate_basic("jdoe", &identity.token, ip())
            .await
            .unwrap_err();
        assert!(matches!(err, SuperError::Unauthorized));
        let row = store.get_token(&identity.token).await.unwrap().unwrap();
        assert!(row.expires_at <= Utc::now());
    }

    #[tokio::test(start_paused = true)]
    async fn password_change_supersedes_credentials_and_tokens() {
        let (supervisor, store) = setup(ActivationMode::Ldap, 60).await;
        let mut peer = TestPeer::new();
        let identity = activate(&supervisor, &mut peer).await.unwrap();

        // run the password change through a fresh kex session
        let mut peer2 = TestPeer::new();
        let reply = supervisor
            .kex_init(&peer2.public_hex(), &peer2.iv_hex(), ip())
            .await
            .unwrap();
        let payload = serde_json::to_vec(&PasswordRequest {
            user: "jdoe".into(),
            new_password: "correct horse".into(),
            variant: PasswordVariant::Change {
                current_password: "hunter2hunter2".into(),
            },
        })
        .unwrap();
        let ciphertext = peer2.encrypt(&reply.public_key, &payload);
        let sealed = supervisor
            .password(reply.request_id, ip(), &ciphertext)
            .await
            .unwrap();
        let fresh: TokenIdentity =
            serde_json::from_slice(&peer2.decrypt(&reply.public_key, &sealed)).unwrap();

        // the old token is gone, the new one works
        assert!(supervisor
            .authenticate_basic("jdoe", &identity.token, ip())
            .await
            .is_err());
        supervisor
            .authenticate_basic("jdoe", &fresh.token, ip())
            .await
            .unwrap();

        // the superseded credential is inactive
        let active = store.get_active_credential("jdoe").await.unwrap().unwrap();
        assert!(verify_password("correct horse", &active.phc_hash));
    }

    #[tokio::test(start_paused = true)]
    async fn password_change_with_wrong_current_password_fails() {
        let (supervisor, _) = setup(ActivationMode::Ldap, 60).await;
        let mut peer = TestPeer::new();
        activate(&supervisor, &mut peer).await.unwrap();

        let mut peer2 = TestPeer::new();
        let reply = supervisor
            .kex_init(&peer2.public_hex(), &peer2.iv_hex(), ip())
            .await
            .unwrap();
        let payload = serde_json::to_vec(&PasswordRequest {
            user: "jdoe".into(),
            new_password: "other".into(),
            variant: PasswordVariant::Change { current_password: "wrong".into() },
        })
        .unwrap();
        let ciphertext = peer2.encrypt(&reply.public_key, &payload);
        let err = supervisor
            .password(reply.request_id, ip(), &ciphertext)
            .await
            .unwrap_err();
        assert!(matches!(err, SuperError::Forbidden));
    }
}
