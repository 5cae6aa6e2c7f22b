use std::sync::Arc;

use anyhow::Result;
use soma_config::{ActivationMode, Config};
use soma_perm::{Cache, CacheUpdate};
use soma_store::Store;
use soma_super::{DenyAllVerifier, LdapVerifier, OwnershipVerifier, Supervisor};
use tracing::info;

/// Rebuild the permission cache from the persisted authorization rows:
/// sections and actions first, then the permission mappings, then the
/// grants.
pub async fn build_permission_cache(store: &dyn Store) -> Result<Cache> {
    let cache = Cache::new();

    let sections = store.list_sections().await?;
    for section in &sections {
        cache.perform(CacheUpdate::AddSection(section.clone()));
    }
    let actions = store.list_actions().await?;
    for action in &actions {
        cache.perform(CacheUpdate::AddAction(action.clone()));
    }
    let mappings = store.list_permission_mappings().await?;
    for m in &mappings {
        let update = match m.action_id {
            Some(action_id) => CacheUpdate::MapAction {
                permission_id: m.permission_id,
                section_id: m.section_id,
                action_id,
            },
            None => CacheUpdate::MapSection {
                permission_id: m.permission_id,
                section_id: m.section_id,
            },
        };
        cache.perform(update);
    }
    let grants = store.list_grants().await?;
    for grant in &grants {
        cache.perform(CacheUpdate::Grant(grant.clone()));
    }

    info!(
        sections = sections.len(),
        actions = actions.len(),
        mappings = mappings.len(),
        grants = grants.len(),
        "permission cache rebuilt"
    );
    Ok(cache)
}

/// Wire the supervisor with the configured activation mechanism.
pub fn build_supervisor(store: Arc<dyn Store>, config: &Config) -> Result<Supervisor> {
    let verifier: Arc<dyn OwnershipVerifier> = match (&config.auth.activation, &config.ldap) {
        (ActivationMode::Ldap, Some(ldap)) => Arc::new(LdapVerifier::new(ldap.clone())),
        // mailtoken surfaces NotImplemented before verification is reached
        _ => Arc::new(DenyAllVerifier),
    };
    Ok(Supervisor::new(
        store,
        verifier,
        config.auth.activation.clone(),
        config.auth.token_key.clone(),
        config.auth.credential_expiry_days,
        soma_super::DEFAULT_KEX_EXPIRY_SECONDS,
    ))
}
