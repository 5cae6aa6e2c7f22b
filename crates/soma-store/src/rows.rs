use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use soma_domain::{
    CheckId, CheckInstanceId, ElementId, InstanceState, JobId, JobResult, JobStatus, ObjectState,
    RepositoryId, ServerId, ServiceAttribute, TeamId, UserId,
};
use soma_tree::{ElementKind, PlacedCheck, PropertyInstance};

// ── Tree rows (soma namespace) ────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepositoryRow {
    pub id: RepositoryId,
    pub name: String,
    pub team_id: TeamId,
    pub active: bool,
    pub deleted: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ElementRow {
    pub id: ElementId,
    pub repository_id: RepositoryId,
    pub parent_id: Option<ElementId>,
    pub kind: ElementKind,
    pub name: String,
    pub team_id: TeamId,
    pub state: ObjectState,
}

/// One directly-placed property. Inherited copies are reconstructed at
/// Treekeeper boot and never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyRow {
    pub repository_id: RepositoryId,
    pub element_id: ElementId,
    pub property: PropertyInstance,
}

/// One directly-placed check configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckRow {
    pub repository_id: RepositoryId,
    pub element_id: ElementId,
    pub check: PlacedCheck,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceRow {
    pub id: CheckInstanceId,
    pub repository_id: RepositoryId,
    pub check_id: CheckId,
    pub element_id: ElementId,
    pub version: u64,
    pub constraint_hash: String,
    pub constraint_val_hash: String,
    pub instance_service_cfg_hash: String,
    pub service_config: Value,
    pub state: InstanceState,
}

impl InstanceRow {
    /// Equivalence for dedup: same check and same triple-hash.
    pub fn same_signature(&self, other: &InstanceRow) -> bool {
        self.check_id == other.check_id
            && self.constraint_hash == other.constraint_hash
            && self.constraint_val_hash == other.constraint_val_hash
            && self.instance_service_cfg_hash == other.instance_service_cfg_hash
    }
}

// ── Jobs ──────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRow {
    pub id: JobId,
    pub status: JobStatus,
    pub result: JobResult,
    pub job_type: String,
    pub repository_id: RepositoryId,
    pub user_id: UserId,
    pub team_id: TeamId,
    pub queued_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub raw_request: Value,
    pub error: Option<String>,
}

// ── Inventory rows ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserRow {
    pub id: UserId,
    pub name: String,
    pub team_id: TeamId,
    pub active: bool,
    pub deleted: bool,
}

/// Authoritative node attributes from the inventory namespace. GuidePost
/// hydrates `assign_node` requests from this row; client-supplied values
/// are discarded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeInventoryRow {
    pub node_id: ElementId,
    pub asset_id: u64,
    pub name: String,
    pub team_id: TeamId,
    pub server_id: ServerId,
    pub online: bool,
    pub deleted: bool,
    pub assigned: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TeamServiceRow {
    pub team_id: TeamId,
    pub service: String,
    pub attributes: Vec<ServiceAttribute>,
}

// ── Auth rows ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CredentialRow {
    pub user_id: UserId,
    pub user_name: String,
    /// PHC-format KDF hash of the password.
    pub phc_hash: String,
    pub valid_from: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub active: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenRow {
    pub token: String,
    pub salt: String,
    pub user_name: String,
    pub valid_from: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub bound_ip: Option<String>,
}

impl TokenRow {
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        self.valid_from <= now && self.expires_at > now
    }
}

// ── Transactional batch ───────────────────────────────────────────────────────

/// One persistence operation produced by translating a tree action
/// event. All operations of one Treekeeper request are applied in a
/// single transaction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum PersistOp {
    UpsertElement(ElementRow),
    DeleteElement {
        repository_id: RepositoryId,
        element_id: ElementId,
    },
    UpsertProperty(PropertyRow),
    DeleteProperty {
        repository_id: RepositoryId,
        instance_id: soma_domain::PropertyInstanceId,
    },
    UpsertCheck(CheckRow),
    DeleteCheck {
        repository_id: RepositoryId,
        check_id: CheckId,
    },
    UpsertInstance(InstanceRow),
    UpdateInstanceState {
        instance_id: CheckInstanceId,
        state: InstanceState,
    },
    UpdateJob {
        job_id: JobId,
        status: JobStatus,
        result: JobResult,
        error: Option<String>,
        finished_at: Option<DateTime<Utc>>,
    },
    MarkNodeAssigned {
        node_id: ElementId,
        assigned: bool,
    },
}

// ── Grant row ─────────────────────────────────────────────────────────────────

/// One section- or action-level permission mapping; the permission
/// cache is rebuilt from these rows at startup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PermissionMappingRow {
    pub permission_id: soma_domain::PermissionId,
    pub section_id: soma_domain::SectionId,
    /// `None` maps the whole section.
    pub action_id: Option<soma_domain::ActionId>,
}

/// Grants are stored whole; the permission cache is rebuilt from these
/// rows at startup.
pub type GrantRow = soma_domain::Grant;
pub type SectionRow = soma_domain::Section;
pub type ActionRow = soma_domain::Action;
pub type PermissionRow = soma_domain::Permission;
pub type LevelRow = soma_domain::Level;

/// Monitoring system registration; grants may be scoped to one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitoringRow {
    pub id: soma_domain::MonitoringId,
    pub name: String,
    pub contact_user_id: Option<UserId>,
}
