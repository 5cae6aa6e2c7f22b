use serde::{Deserialize, Serialize};

// ── Object lifecycle ──────────────────────────────────────────────────────────

/// Lifecycle state of a tree element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ObjectState {
    Floating,
    Standalone,
    Grouped,
    Deleted,
    Frozen,
    Active,
}

impl ObjectState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ObjectState::Floating => "floating",
            ObjectState::Standalone => "standalone",
            ObjectState::Grouped => "grouped",
            ObjectState::Deleted => "deleted",
            ObjectState::Frozen => "frozen",
            ObjectState::Active => "active",
        }
    }

    /// All states, in the order the object-state listing endpoint reports them.
    pub fn all() -> &'static [ObjectState] {
        &[
            ObjectState::Floating,
            ObjectState::Standalone,
            ObjectState::Grouped,
            ObjectState::Deleted,
            ObjectState::Frozen,
            ObjectState::Active,
        ]
    }
}

impl std::fmt::Display for ObjectState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ── Bucket environment ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Dev,
    Qa,
    Prelive,
    Live,
}

impl Environment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Dev => "dev",
            Environment::Qa => "qa",
            Environment::Prelive => "prelive",
            Environment::Live => "live",
        }
    }
}

impl std::fmt::Display for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "dev" => Ok(Environment::Dev),
            "qa" => Ok(Environment::Qa),
            "prelive" => Ok(Environment::Prelive),
            "live" => Ok(Environment::Live),
            other => Err(format!("unknown environment '{}'", other)),
        }
    }
}

// ── Views ─────────────────────────────────────────────────────────────────────

/// Visibility band a property or check applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum View {
    Internal,
    External,
    Local,
    Any,
}

impl View {
    pub fn as_str(&self) -> &'static str {
        match self {
            View::Internal => "internal",
            View::External => "external",
            View::Local => "local",
            View::Any => "any",
        }
    }
}

impl std::fmt::Display for View {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ── Threshold predicates ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Predicate {
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = "<=")]
    Le,
    #[serde(rename = "=")]
    Eq,
    #[serde(rename = ">=")]
    Ge,
    #[serde(rename = ">")]
    Gt,
}

impl Predicate {
    pub fn symbol(&self) -> &'static str {
        match self {
            Predicate::Lt => "<",
            Predicate::Le => "<=",
            Predicate::Eq => "=",
            Predicate::Ge => ">=",
            Predicate::Gt => ">",
        }
    }
}

impl std::fmt::Display for Predicate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.symbol())
    }
}

// ── Property types ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PropertyType {
    System,
    Custom,
    Service,
    Oncall,
}

impl PropertyType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PropertyType::System => "system",
            PropertyType::Custom => "custom",
            PropertyType::Service => "service",
            PropertyType::Oncall => "oncall",
        }
    }
}

impl std::fmt::Display for PropertyType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ── Job lifecycle ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    InProgress,
    Processed,
    Failed,
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            JobStatus::Queued => "queued",
            JobStatus::InProgress => "in_progress",
            JobStatus::Processed => "processed",
            JobStatus::Failed => "failed",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobResult {
    Pending,
    Success,
    Failure,
}

impl std::fmt::Display for JobResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            JobResult::Pending => "pending",
            JobResult::Success => "success",
            JobResult::Failure => "failure",
        };
        write!(f, "{}", s)
    }
}

// ── Check instance lifecycle ──────────────────────────────────────────────────

/// Workflow state of a materialised check instance.
///
/// Transitions:
///   AwaitingComputation → Computed → AwaitingRollout
///     → RolloutInProgress → Active
///   Active → AwaitingDeprovision → DeprovisionInProgress → Deprovisioned
///   RolloutInProgress → RolloutFailed
///   DeprovisionInProgress → DeprovisionFailed
///   Blocked holds a newer version while an older one is mid-deprovision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceState {
    AwaitingComputation,
    Computed,
    AwaitingRollout,
    RolloutInProgress,
    Active,
    AwaitingDeprovision,
    DeprovisionInProgress,
    Deprovisioned,
    RolloutFailed,
    DeprovisionFailed,
    Blocked,
}

impl InstanceState {
    pub fn as_str(&self) -> &'static str {
        match self {
            InstanceState::AwaitingComputation => "awaiting_computation",
            InstanceState::Computed => "computed",
            InstanceState::AwaitingRollout => "awaiting_rollout",
            InstanceState::RolloutInProgress => "rollout_in_progress",
            InstanceState::Active => "active",
            InstanceState::AwaitingDeprovision => "awaiting_deprovision",
            InstanceState::DeprovisionInProgress => "deprovision_in_progress",
            InstanceState::Deprovisioned => "deprovisioned",
            InstanceState::RolloutFailed => "rollout_failed",
            InstanceState::DeprovisionFailed => "deprovision_failed",
            InstanceState::Blocked => "blocked",
        }
    }

    /// Terminal states accept no further transitions except operator retry.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            InstanceState::Deprovisioned
                | InstanceState::RolloutFailed
                | InstanceState::DeprovisionFailed
        )
    }
}

impl std::fmt::Display for InstanceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ── Authorization vocabulary ──────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubjectKind {
    User,
    Admin,
    Tool,
    Team,
}

impl SubjectKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubjectKind::User => "user",
            SubjectKind::Admin => "admin",
            SubjectKind::Tool => "tool",
            SubjectKind::Team => "team",
        }
    }
}

impl std::fmt::Display for SubjectKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Permission category. The `:grant` counterparts confer the right to
/// delegate the base category to others.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Category {
    #[serde(rename = "omnipotence")]
    Omnipotence,
    #[serde(rename = "system")]
    System,
    #[serde(rename = "global")]
    Global,
    #[serde(rename = "global:grant")]
    GlobalGrant,
    #[serde(rename = "permission")]
    Permission,
    #[serde(rename = "permission:grant")]
    PermissionGrant,
    #[serde(rename = "operations")]
    Operations,
    #[serde(rename = "operations:grant")]
    OperationsGrant,
    #[serde(rename = "repository")]
    Repository,
    #[serde(rename = "repository:grant")]
    RepositoryGrant,
    #[serde(rename = "team")]
    Team,
    #[serde(rename = "team:grant")]
    TeamGrant,
    #[serde(rename = "monitoring")]
    Monitoring,
    #[serde(rename = "monitoring:grant")]
    MonitoringGrant,
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Omnipotence => "omnipotence",
            Category::System => "system",
            Category::Global => "global",
            Category::GlobalGrant => "global:grant",
            Category::Permission => "permission",
            Category::PermissionGrant => "permission:grant",
            Category::Operations => "operations",
            Category::OperationsGrant => "operations:grant",
            Category::Repository => "repository",
            Category::RepositoryGrant => "repository:grant",
            Category::Team => "team",
            Category::TeamGrant => "team:grant",
            Category::Monitoring => "monitoring",
            Category::MonitoringGrant => "monitoring:grant",
        }
    }

    /// The `:grant` counterpart of a base category, if one exists.
    pub fn grant_counterpart(&self) -> Option<Category> {
        match self {
            Category::Global => Some(Category::GlobalGrant),
            Category::Permission => Some(Category::PermissionGrant),
            Category::Operations => Some(Category::OperationsGrant),
            Category::Repository => Some(Category::RepositoryGrant),
            Category::Team => Some(Category::TeamGrant),
            Category::Monitoring => Some(Category::MonitoringGrant),
            _ => None,
        }
    }

    /// Categories whose grants land in the unscoped (global) grant map.
    pub fn is_global_scope(&self) -> bool {
        matches!(
            self,
            Category::Omnipotence
                | Category::System
                | Category::Global
                | Category::GlobalGrant
                | Category::Permission
                | Category::PermissionGrant
                | Category::Operations
                | Category::OperationsGrant
        )
    }
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn predicate_symbols_are_stable() {
        assert_eq!(Predicate::Lt.symbol(), "<");
        assert_eq!(Predicate::Le.symbol(), "<=");
        assert_eq!(Predicate::Eq.symbol(), "=");
        assert_eq!(Predicate::Ge.symbol(), ">=");
        assert_eq!(Predicate::Gt.symbol(), ">");
    }

    #[test]
    fn grant_counterparts() {
        assert_eq!(
            Category::Repository.grant_counterpart(),
            Some(Category::RepositoryGrant)
        );
        assert_eq!(Category::Omnipotence.grant_counterpart(), None);
        assert_eq!(Category::RepositoryGrant.grant_counterpart(), None);
    }

    #[test]
    fn terminal_instance_states() {
        assert!(InstanceState::Deprovisioned.is_terminal());
        assert!(InstanceState::RolloutFailed.is_terminal());
        assert!(!InstanceState::Blocked.is_terminal());
        assert!(!InstanceState::Active.is_terminal());
    }

    #[test]
    fn category_serde_uses_colon_names() {
        let json = serde_json::to_string(&Category::RepositoryGrant).unwrap();
        assert_eq!(json, "\"repository:grant\"");
    }
}
