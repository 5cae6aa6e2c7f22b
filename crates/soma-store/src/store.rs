use async_trait::async_trait;
use chrono::{DateTime, Utc};
use soma_domain::{
    CheckId, CheckInstanceId, InstanceState, JobId, PermissionId, RepositoryId, TeamId, UserId,
};
use soma_domain::ElementId;

use crate::error::StoreError;
use crate::rows::*;

/// The persistent store behind every component. One trait, one pool;
/// prepared statements are named in [`crate::catalog`] so errors always
/// reference a stable statement identifier.
#[async_trait]
pub trait Store: Send + Sync + 'static {
    // ── Repositories ──────────────────────────────────────────────────────────

    async fn create_repository(&self, row: &RepositoryRow) -> Result<(), StoreError>;
    async fn get_repository(&self, id: RepositoryId) -> Result<Option<RepositoryRow>, StoreError>;
    async fn get_repository_by_name(&self, name: &str)
        -> Result<Option<RepositoryRow>, StoreError>;
    async fn list_repositories(&self) -> Result<Vec<RepositoryRow>, StoreError>;
    async fn set_repository_active(&self, id: RepositoryId, active: bool)
        -> Result<(), StoreError>;

    // ── Tree rows ─────────────────────────────────────────────────────────────

    async fn list_elements(&self, repository_id: RepositoryId)
        -> Result<Vec<ElementRow>, StoreError>;
    /// Resolve the repository enclosing a bucket/group/cluster/node id.
    async fn repository_of_element(
        &self,
        element_id: ElementId,
    ) -> Result<Option<RepositoryRow>, StoreError>;
    async fn list_properties(
        &self,
        repository_id: RepositoryId,
    ) -> Result<Vec<PropertyRow>, StoreError>;
    async fn list_checks(&self, repository_id: RepositoryId) -> Result<Vec<CheckRow>, StoreError>;

    // ── Check instances ───────────────────────────────────────────────────────

    async fn list_instances(
        &self,
        repository_id: RepositoryId,
    ) -> Result<Vec<InstanceRow>, StoreError>;
    async fn get_instance(&self, id: CheckInstanceId) -> Result<Option<InstanceRow>, StoreError>;
    async fn list_instances_for_check(
        &self,
        check_id: CheckId,
    ) -> Result<Vec<InstanceRow>, StoreError>;
    async fn update_instance_state(
        &self,
        id: CheckInstanceId,
        state: InstanceState,
    ) -> Result<(), StoreError>;

    // ── Jobs ──────────────────────────────────────────────────────────────────

    async fn insert_job(&self, row: &JobRow) -> Result<(), StoreError>;
    async fn get_job(&self, id: JobId) -> Result<Option<JobRow>, StoreError>;
    async fn list_jobs_for_user(&self, user_id: UserId) -> Result<Vec<JobRow>, StoreError>;
    async fn list_unfinished_jobs(&self) -> Result<Vec<JobRow>, StoreError>;

    // ── Transactional batch ───────────────────────────────────────────────────

    /// Apply the operation list atomically: one SQL transaction, or one
    /// write-lock critical section for the in-memory store.
    async fn apply(&self, ops: &[PersistOp]) -> Result<(), StoreError>;

    // ── Authorization rows ────────────────────────────────────────────────────

    async fn upsert_section(&self, row: &SectionRow) -> Result<(), StoreError>;
    async fn delete_section(&self, id: soma_domain::SectionId) -> Result<(), StoreError>;
    async fn list_sections(&self) -> Result<Vec<SectionRow>, StoreError>;
    async fn upsert_action(&self, row: &ActionRow) -> Result<(), StoreError>;
    async fn delete_action(&self, id: soma_domain::ActionId) -> Result<(), StoreError>;
    async fn list_actions(&self) -> Result<Vec<ActionRow>, StoreError>;
    async fn upsert_permission(&self, row: &PermissionRow) -> Result<(), StoreError>;
    async fn delete_permission(&self, id: PermissionId) -> Result<(), StoreError>;
    async fn list_permissions(&self) -> Result<Vec<PermissionRow>, StoreError>;
    async fn insert_grant(&self, row: &GrantRow) -> Result<(), StoreError>;
    async fn delete_grant(&self, id: uuid::Uuid) -> Result<(), StoreError>;
    async fn list_grants(&self) -> Result<Vec<GrantRow>, StoreError>;
    async fn insert_permission_mapping(
        &self,
        row: &PermissionMappingRow,
    ) -> Result<(), StoreError>;
    async fn delete_permission_mapping(
        &self,
        row: &PermissionMappingRow,
    ) -> Result<(), StoreError>;
    async fn list_permission_mappings(&self) -> Result<Vec<PermissionMappingRow>, StoreError>;

    // ── Inventory ─────────────────────────────────────────────────────────────

    async fn get_user(&self, id: UserId) -> Result<Option<UserRow>, StoreError>;
    async fn get_user_by_name(&self, name: &str) -> Result<Option<UserRow>, StoreError>;
    async fn upsert_user(&self, row: &UserRow) -> Result<(), StoreError>;
    async fn get_node_inventory(
        &self,
        node_id: ElementId,
    ) -> Result<Option<NodeInventoryRow>, StoreError>;
    async fn upsert_node_inventory(&self, row: &NodeInventoryRow) -> Result<(), StoreError>;
    async fn list_team_services(&self, team_id: TeamId)
        -> Result<Vec<TeamServiceRow>, StoreError>;
    async fn upsert_team_service(&self, row: &TeamServiceRow) -> Result<(), StoreError>;
    async fn list_levels(&self) -> Result<Vec<LevelRow>, StoreError>;
    async fn upsert_level(&self, row: &LevelRow) -> Result<(), StoreError>;
    async fn list_monitorings(&self) -> Result<Vec<MonitoringRow>, StoreError>;
    async fn upsert_monitoring(&self, row: &MonitoringRow) -> Result<(), StoreError>;

    // ── Credentials and tokens ────────────────────────────────────────────────

    async fn upsert_credential(&self, row: &CredentialRow) -> Result<(), StoreError>;
    async fn get_active_credential(
        &self,
        user_name: &str,
    ) -> Result<Option<CredentialRow>, StoreError>;
    /// Deactivate every credential of a user whose `valid_from` predates
    /// the cutoff; used when a new credential supersedes the old ones.
    async fn expire_credentials_before(
        &self,
        user_name: &str,
        cutoff: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    async fn insert_token(&self, row: &TokenRow) -> Result<(), StoreError>;
    async fn get_token(&self, token: &str) -> Result<Option<TokenRow>, StoreError>;
    /// Set `expires_at` on a token and return how many rows matched.
    /// A count other than one is a corruption signal for the caller.
    async fn expire_token(&self, token: &str, at: DateTime<Utc>) -> Result<u64, StoreError>;
    async fn expire_tokens_for_user(
        &self,
        user_name: &str,
        at: DateTime<Utc>,
    ) -> Result<u64, StoreError>;
    async fn expire_all_tokens(&self, at: DateTime<Utc>) -> Result<u64, StoreError>;
    async fn list_valid_tokens(&self, now: DateTime<Utc>) -> Result<Vec<TokenRow>, StoreError>;
}
