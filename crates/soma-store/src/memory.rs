use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use soma_domain::{
    ActionId, CheckId, CheckInstanceId, ElementId, InstanceState, JobId, MonitoringId,
    PermissionId, PropertyInstanceId, RepositoryId, SectionId, TeamId, UserId,
};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::StoreError;
use crate::rows::*;
use crate::store::Store;

#[derive(Debug, Default)]
struct Inner {
    repositories: HashMap<RepositoryId, RepositoryRow>,
    elements: HashMap<ElementId, ElementRow>,
    properties: HashMap<PropertyInstanceId, PropertyRow>,
    checks: HashMap<CheckId, CheckRow>,
    instances: HashMap<CheckInstanceId, InstanceRow>,
    jobs: HashMap<JobId, JobRow>,
    sections: HashMap<SectionId, SectionRow>,
    actions: HashMap<ActionId, ActionRow>,
    permissions: HashMap<PermissionId, PermissionRow>,
    grants: HashMap<Uuid, GrantRow>,
    permission_mappings: Vec<PermissionMappingRow>,
    users: HashMap<UserId, UserRow>,
    nodes: HashMap<ElementId, NodeInventoryRow>,
    team_services: HashMap<(TeamId, String), TeamServiceRow>,
    levels: HashMap<String, LevelRow>,
    monitorings: HashMap<MonitoringId, MonitoringRow>,
    credentials: Vec<CredentialRow>,
    tokens: HashMap<String, TokenRow>,
}

/// In-memory implementation of [`Store`].
///
/// All data is lost on process exit. Suitable for tests and local runs.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    inner: Arc<RwLock<Inner>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for InMemoryStore {
    // ── Repositories ──────────────────────────────────────────────────────────

    async fn create_repository(&self, row: &RepositoryRow) -> Result<(), StoreError> {
        let mut guard = self.inner.write().await;
        if guard.repositories.values().any(|r| r.name == row.name && !r.deleted) {
            return Err(StoreError::Conflict(format!(
                "repository '{}' already exists",
                row.name
            )));
        }
        guard.repositories.insert(row.id, row.clone());
        Ok(())
    }

    async fn get_repository(&self, id: RepositoryId) -> Result<Option<RepositoryRow>, StoreError> {
        Ok(self.inner.read().await.repositories.get(&id).cloned())
    }

    async fn get_repository_by_name(
        &self,
        name: &str,
    ) -> Result<Option<RepositoryRow>, StoreError> {
        let guard = self.inner.read().await;
        Ok(guard
            .repositories
            .values()
            .find(|r| r.name == name && !r.deleted)
            .cloned())
    }

    async fn list_repositories(&self) -> Result<Vec<RepositoryRow>, StoreError> {
        let guard = self.inner.read().await;
        let mut out: Vec<RepositoryRow> =
            guard.repositories.values().filter(|r| !r.deleted).cloned().collect();
        out.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(out)
    }

    async fn set_repository_active(
        &self,
        id: RepositoryId,
        active: bool,
    ) -> Result<(), StoreError> {
        let mut guard = self.inner.write().await;
        let repo = guard
            .repositories
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(format!("repository {}", id)))?;
        repo.active = active;
        Ok(())
    }

    // ── Tree rows ─────────────────────────────────────────────────────────────

    async fn list_elements(
        &self,
        repository_id: RepositoryId,
    ) -> Result<Vec<ElementRow>, StoreError> {
        let guard = self.inner.read().await;
        Ok(guard
            .elements
            .values()
            .filter(|e| e.repository_id == repository_id)
            .cloned()
            .collect())
    }

    async fn repository_of_element(
        &self,
        element_id: ElementId,
    ) -> Result<Option<RepositoryRow>, StoreError> {
        let guard = self.inner.read().await;
        let repo_id = match guard.elements.get(&element_id) {
            Some(e) => e.repository_id,
            None => return Ok(None),
        };
        Ok(guard.repositories.get(&repo_id).cloned())
    }

    async fn list_properties(
        &self,
        repository_id: RepositoryId,
    ) -> Result<Vec<PropertyRow>, StoreError> {
        let guard = self.inner.read().await;
        Ok(guard
            .properties
            .values()
            .filter(|p| p.repository_id == repository_id)
            .cloned()
            .collect())
    }

    async fn list_checks(&self, repository_id: RepositoryId) -> Result<Vec<CheckRow>, StoreError> {
        let guard = self.inner.read().await;
        Ok(guard
            .checks
            .values()
            .filter(|c| c.repository_id == repository_id)
            .cloned()
            .collect())
    }

    // ── Check instances ───────────────────────────────────────────────────────

    async fn list_instances(
        &self,
        repository_id: RepositoryId,
    ) -> Result<Vec<InstanceRow>, StoreError> {
        let guard = self.inner.read().await;
        Ok(guard
            .instances
            .values()
            .filter(|i| i.repository_id == repository_id)
            .cloned()
            .collect())
    }

    async fn get_instance(&self, id: CheckInstanceId) -> Result<Option<InstanceRow>, StoreError> {
        Ok(self.inner.read().await.instances.get(&id).cloned())
    }

    async fn list_instances_for_check(
        &self,
        check_id: CheckId,
    ) -> Result<Vec<InstanceRow>, StoreError> {
        let guard = self.inner.read().await;
        Ok(guard
            .instances
            .values()
            .filter(|i| i.check_id == check_id)
            .cloned()
            .collect())
    }

    async fn update_instance_state(
        &self,
        id: CheckInstanceId,
        state: InstanceState,
    ) -> Result<(), StoreError> {
        let mut guard = self.inner.write().await;
        let inst = guard
            .instances
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(format!("instance {}", id)))?;
        inst.state = state;
        Ok(())
    }

    // ── Jobs ──────────────────────────────────────────────────────────────────

    async fn insert_job(&self, row: &JobRow) -> Result<(), StoreError> {
        let mut guard = self.inner.write().await;
        if guard.jobs.contains_key(&row.id) {
            return Err(StoreError::Conflict(format!("job {} already exists", row.id)));
        }
        guard.jobs.insert(row.id, row.clone());
        Ok(())
    }

    async fn get_job(&self, id: JobId) -> Result<Option<JobRow>, StoreError> {
        Ok(self.inner.read().await.jobs.get(&id).cloned())
    }

    async fn list_jobs_for_user(&self, user_id: UserId) -> Result<Vec<JobRow>, StoreError> {
        let guard = self.inner.read().await;
        let mut out: Vec<JobRow> = guard
            .jobs
            .values()
            .filter(|j| j.user_id == user_id)
            .cloned()
            .collect();
        out.sort_by(|a, b| b.queued_at.cmp(&a.queued_at));
        Ok(out)
    }

    async fn list_unfinished_jobs(&self) -> Result<Vec<JobRow>, StoreError> {
        let guard = self.inner.read().await;
        Ok(guard
            .jobs
            .values()
            .filter(|j| {
                matches!(
                    j.status,
                    soma_domain::JobStatus::Queued | soma_domain::JobStatus::InProgress
                )
            })
            .cloned()
            .collect())
    }

    // ── Transactional batch ───────────────────────────────────────────────────

    async fn apply(&self, ops: &[PersistOp]) -> Result<(), StoreError> {
        // the single write lock is the transaction boundary: readers see
        // either none or all of the batch
        let mut guard = self.inner.write().await;
        for op in ops {
            match op {
                PersistOp::UpsertElement(row) => {
                    guard.elements.insert(row.id, row.clone());
                }
                PersistOp::DeleteElement { element_id, .. } => {
                    guard.elements.remove(element_id);
                }
                PersistOp::UpsertProperty(row) => {
                    guard.properties.insert(row.property.instance_id, row.clone());
                }
                PersistOp::DeleteProperty { instance_id, .. } => {
                    guard.properties.remove(instance_id);
                }
                PersistOp::UpsertCheck(row) => {
                    guard.checks.insert(row.check.check_id, row.clone());
                }
                PersistOp::DeleteCheck { check_id, .. } => {
                    guard.checks.remove(check_id);
                }
                PersistOp::UpsertInstance(row) => {
                    guard.instances.insert(row.id, row.clone());
                }
                PersistOp::UpdateInstanceState { instance_id, state } => {
                    if let Some(inst) = guard.instances.get_mut(instance_id) {
                        inst.state = *state;
                    }
                }
                PersistOp::UpdateJob { job_id, status, result, error, finished_at } => {
                    if let Some(job) = guard.jobs.get_mut(job_id) {
                        job.status = *status;
                        job.result = *result;
                        job.error = error.clone();
                        job.finished_at = *finished_at;
                    }
                }
                PersistOp::MarkNodeAssigned { node_id, assigned } => {
                    if let Some(node) = guard.nodes.get_mut(node_id) {
                        node.assigned = *assigned;
                    }
                }
            }
        }
        Ok(())
    }

    // ── Authorization rows ────────────────────────────────────────────────────

    async fn upsert_section(&self, row: &SectionRow) -> Result<(), StoreError> {
        self.inner.write().await.sections.insert(row.id, row.clone());
        Ok(())
    }

    async fn delete_section(&self, id: SectionId) -> Result<(), StoreError> {
        self.inner.write().await.sections.remove(&id);
        Ok(())
    }

    async fn list_sections(&self) -> Result<Vec<SectionRow>, StoreError> {
        Ok(self.inner.read().await.sections.values().cloned().collect())
    }

    async fn upsert_action(&self, row: &ActionRow) -> Result<(), StoreError> {
        self.inner.write().await.actions.insert(row.id, row.clone());
        Ok(())
    }

    async fn delete_action(&self, id: ActionId) -> Result<(), StoreError> {
        self.inner.write().await.actions.remove(&id);
        Ok(())
    }

    async fn list_actions(&self) -> Result<Vec<ActionRow>, StoreError> {
        Ok(self.inner.read().await.actions.values().cloned().collect())
    }

    async fn upsert_permission(&self, row: &PermissionRow) -> Result<(), StoreError> {
        self.inner.write().await.permissions.insert(row.id, row.clone());
        Ok(())
    }

    async fn delete_permission(&self, id: PermissionId) -> Result<(), StoreError> {
        self.inner.write().await.permissions.remove(&id);
        Ok(())
    }

    async fn list_permissions(&self) -> Result<Vec<PermissionRow>, StoreError> {
        Ok(self.inner.read().await.permissions.values().cloned().collect())
    }

    async fn insert_grant(&self, row: &GrantRow) -> Result<(), StoreError> {
        self.inner.write().await.grants.insert(row.id, row.clone());
        Ok(())
    }

    async fn delete_grant(&self, id: Uuid) -> Result<(), StoreError> {
        self.inner.write().await.grants.remove(&id);
        Ok(())
    }

    async fn list_grants(&self) -> Result<Vec<GrantRow>, StoreError> {
        Ok(self.inner.read().await.grants.values().cloned().collect())
    }

    async fn insert_permission_mapping(
        &self,
        row: &PermissionMappingRow,
    ) -> Result<(), StoreError> {
        let mut guard = self.inner.write().await;
        if !guard.permission_mappings.contains(row) {
            guard.permission_mappings.push(row.clone());
        }
        Ok(())
    }

    async fn delete_permission_mapping(
        &self,
        row: &PermissionMappingRow,
    ) -> Result<(), StoreError> {
        self.inner
            .write()
            .await
            .permission_mappings
            .retain(|m| m != row);
        Ok(())
    }

    async fn list_permission_mappings(&self) -> Result<Vec<PermissionMappingRow>, StoreError> {
        Ok(self.inner.read().await.permission_mappings.clone())
    }

    // ── Inventory ─────────────────────────────────────────────────────────────

    async fn get_user(&self, id: UserId) -> Result<Option<UserRow>, StoreError> {
        Ok(self.inner.read().await.users.get(&id).cloned())
    }

    async fn get_user_by_name(&self, name: &str) -> Result<Option<UserRow>, StoreError> {
        let guard = self.inner.read().await;
        Ok(guard.users.values().find(|u| u.name == name).cloned())
    }

    async fn upsert_user(&self, row: &UserRow) -> Result<(), StoreError> {
        self.inner.write().await.users.insert(row.id, row.clone());
        Ok(())
    }

    async fn get_node_inventory(
        &self,
        node_id: ElementId,
    ) -> Result<Option<NodeInventoryRow>, StoreError> {
        Ok(self.inner.read().await.nodes.get(&node_id).cloned())
    }

    async fn upsert_node_inventory(&self, row: &NodeInventoryRow) -> Result<(), StoreError> {
        self.inner.write().await.nodes.insert(row.node_id, row.clone());
        Ok(())
    }

    async fn list_team_services(
        &self,
        team_id: TeamId,
    ) -> Result<Vec<TeamServiceRow>, StoreError> {
        let guard = self.inner.read().await;
        Ok(guard
            .team_services
            .values()
            .filter(|s| s.team_id == team_id)
            .cloned()
            .collect())
    }

    async fn upsert_team_service(&self, row: &TeamServiceRow) -> Result<(), StoreError> {
        self.inner
            .write()
            .await
            .team_services
            .insert((row.team_id, row.service.clone()), row.clone());
        Ok(())
    }

    async fn list_levels(&self) -> Result<Vec<LevelRow>, StoreError> {
        let guard = self.inner.read().await;
        let mut out: Vec<LevelRow> = guard.levels.values().cloned().collect();
        out.sort_by_key(|l| l.numeric);
        Ok(out)
    }

    async fn upsert_level(&self, row: &LevelRow) -> Result<(), StoreError> {
        self.inner.write().await.levels.insert(row.name.clone(), row.clone());
        Ok(())
    }

    async fn list_monitorings(&self) -> Result<Vec<MonitoringRow>, StoreError> {
        Ok(self.inner.read().await.monitorings.values().cloned().collect())
    }

    async fn upsert_monitoring(&self, row: &MonitoringRow) -> Result<(), StoreError> {
        self.inner.write().await.monitorings.insert(row.id, row.clone());
        Ok(())
    }

    // ── Credentials and tokens ────────────────────────────────────────────────

    async fn upsert_credential(&self, row: &CredentialRow) -> Result<(), StoreError> {
        self.inner.write().await.credentials.push(row.clone());
        Ok(())
    }

    async fn get_active_credential(
        &self,
        user_name: &str,
    ) -> Result<Option<CredentialRow>, StoreError> {
        let guard = self.inner.read().await;
        Ok(guard
            .credentials
            .iter()
            .filter(|c| c.user_name == user_name && c.active)
            .max_by_key(|c| c.valid_from)
            .cloned())
    }

    async fn expire_credentials_before(
        &self,
        user_name: &str,
        cutoff: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut guard = self.inner.write().await;
        for c in guard
            .credentials
            .iter_mut()
            .filter(|c| c.user_name == user_name && c.valid_from < cutoff)
        {
            c.active = false;
            c.expires_at = cutoff;
        }
        Ok(())
    }

    async fn insert_token(&self, row: &TokenRow) -> Result<(), StoreError> {
        let mut guard = self.inner.write().await;
        if guard.tokens.contains_key(&row.token) {
            return Err(StoreError::Conflict("token collision".into()));
        }
        guard.tokens.insert(row.token.clone(), row.clone());
        Ok(())
    }

    async fn get_token(&self, token: &str) -> Result<Option<TokenRow>, StoreError> {
        Ok(self.inner.read().await.tokens.get(token).cloned())
    }

    async fn expire_token(&self, token: &str, at: DateTime<Utc>) -> Result<u64, StoreError> {
        let mut guard = self.inner.write().await;
        match guard.tokens.get_mut(token) {
            Some(row) if row.expires_at > at => {
                row.expires_at = at;
                Ok(1)
            }
            _ => Ok(0),
        }
    }

    async fn expire_tokens_for_user(
        &self,
        user_name: &str,
        at: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        let mut guard = self.inner.write().await;
        let mut count = 0;
        for row in guard
            .tokens
            .values_mut()
            .filter(|t| t.user_name == user_name && t.expires_at > at)
        {
            row.expires_at = at;
            count += 1;
        }
        Ok(count)
    }

    async fn expire_all_tokens(&self, at: DateTime<Utc>) -> Result<u64, StoreError> {
        let mut guard = self.inner.write().await;
        let mut count = 0;
        for row in guard.tokens.values_mut().filter(|t| t.expires_at > at) {
            row.expires_at = at;
            count += 1;
        }
        Ok(count)
    }

    async fn list_valid_tokens(&self, now: DateTime<Utc>) -> Result<Vec<TokenRow>, StoreError> {
        let guard = self.inner.read().await;
        Ok(guard
            .tokens
            .values()
            .filter(|t| t.is_valid_at(now))
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use soma_domain::{JobResult, JobStatus};
    use soma_tree::ElementKind;

    fn repo_row(name: &str) -> RepositoryRow {
        RepositoryRow {
            id: RepositoryId::generate(),
            name: name.into(),
            team_id: TeamId::generate(),
            active: false,
            deleted: false,
        }
    }

    #[tokio::test]
    async fn repository_create_and_lookup() {
        let store = InMemoryStore::new();
        let row = repo_row("alpha");
        store.create_repository(&row).await.unwrap();

        assert!(store.get_repository(row.id).await.unwrap().is_some());
        assert!(store.get_repository_by_name("alpha").await.unwrap().is_some());
        assert!(store.get_repository_by_name("beta").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn duplicate_repository_name_conflicts() {
        let store = InMemoryStore::new();
        store.create_repository(&repo_row("alpha")).await.unwrap();
        let err = store.create_repository(&repo_row("alpha")).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
    }

    #[tokio::test]
    async fn apply_batch_lands_atomically() {
        let store = InMemoryStore::new();
        let repo = repo_row("gamma");
        store.create_repository(&repo).await.unwrap();

        let el = ElementRow {
            id: ElementId::generate(),
            repository_id: repo.id,
            parent_id: None,
            kind: ElementKind::Group,
            name: "g1".into(),
            team_id: repo.team_id,
            state: soma_domain::ObjectState::Standalone,
        };
        store
            .apply(&[
                PersistOp::UpsertElement(el.clone()),
                PersistOp::DeleteElement { repository_id: repo.id, element_id: el.id },
            ])
            .await
            .unwrap();
        assert!(store.list_elements(repo.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn job_update_via_apply() {
        let store = InMemoryStore::new();
        let job = JobRow {
            id: JobId::generate(),
            status: JobStatus::Queued,
            result: JobResult::Pending,
            job_type: "create_bucket".into(),
            repository_id: RepositoryId::generate(),
            user_id: UserId::generate(),
            team_id: TeamId::generate(),
            queued_at: Utc::now(),
            finished_at: None,
            raw_request: serde_json::json!({}),
            error: None,
        };
        store.insert_job(&job).await.unwrap();
        assert_eq!(store.list_unfinished_jobs().await.unwrap().len(), 1);

        store
            .apply(&[PersistOp::UpdateJob {
                job_id: job.id,
                status: JobStatus::Processed,
                result: JobResult::Success,
                error: None,
                finished_at: Some(Utc::now()),
            }])
            .await
            .unwrap();
        assert!(store.list_unfinished_jobs().await.unwrap().is_empty());
        let reloaded = store.get_job(job.id).await.unwrap().unwrap();
        assert_eq!(reloaded.status, JobStatus::Processed);
    }

    #[tokio::test]
    async fn token_expiry_counts_rows() {
        let store = InMemoryStore::new();
        let now = Utc::now();
        let row = TokenRow {
            token: "deadbeef".into(),
            salt: "salt".into(),
            user_name: "jdoe".into(),
            valid_from: now - Duration::minutes(1),
            expires_at: now + Duration::hours(1),
            bound_ip: None,
        };
        store.insert_token(&row).await.unwrap();

        assert_eq!(store.expire_token("deadbeef", now).await.unwrap(), 1);
        // second expiry matches nothing: the row is already expired
        assert_eq!(store.expire_token("deadbeef", now).await.unwrap(), 0);
        assert_eq!(store.expire_token("unknown", now).await.unwrap(), 0);

        let stored = store.get_token("deadbeef").await.unwrap().unwrap();
        assert!(stored.expires_at <= now);
    }

    #[tokio::test]
    async fn credential_supersession() {
        let store = InMemoryStore::new();
        let now = Utc::now();
        let old = CredentialRow {
            user_id: UserId::generate(),
            user_name: "jdoe".into(),
            phc_hash: "old".into(),
            valid_from: now - Duration::days(30),
            expires_at: now + Duration::days(335),
            active: true,
        };
        store.upsert_credential(&old).await.unwrap();

        let cutoff = now - Duration::seconds(1);
        store.expire_credentials_before("jdoe", cutoff).await.unwrap();
        let new = CredentialRow {
            user_id: old.user_id,
            user_name: "jdoe".into(),
            phc_hash: "new".into(),
            valid_from: now,
            expires_at: now + Duration::days(365),
            active: true,
        };
        store.upsert_credential(&new).await.unwrap();

        let active = store.get_active_credential("jdoe").await.unwrap().unwrap();
        assert_eq!(active.phc_hash, "new");
    }
}
