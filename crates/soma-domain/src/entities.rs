use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::ids::*;
use crate::types::*;

// ── Properties ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceAttribute {
    pub name: String,
    pub value: String,
}

/// The typed payload of a property.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum PropertyPayload {
    System {
        name: String,
        value: String,
    },
    Custom {
        id: PropertyInstanceId,
        name: String,
        value: String,
    },
    Service {
        name: String,
        attributes: Vec<ServiceAttribute>,
    },
    Oncall {
        id: OncallId,
        name: String,
        number: String,
    },
}

impl PropertyPayload {
    pub fn property_type(&self) -> PropertyType {
        match self {
            PropertyPayload::System { .. } => PropertyType::System,
            PropertyPayload::Custom { .. } => PropertyType::Custom,
            PropertyPayload::Service { .. } => PropertyType::Service,
            PropertyPayload::Oncall { .. } => PropertyType::Oncall,
        }
    }

    /// The name component of the `(type, view, name)` conflict key.
    pub fn name(&self) -> &str {
        match self {
            PropertyPayload::System { name, .. } => name,
            PropertyPayload::Custom { name, .. } => name,
            PropertyPayload::Service { name, .. } => name,
            PropertyPayload::Oncall { name, .. } => name,
        }
    }
}

/// A property as requested by a client, before placement assigns
/// instance ids.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertySpec {
    pub view: View,
    pub inheritance: bool,
    pub children_only: bool,
    pub payload: PropertyPayload,
}

// ── Checks ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Threshold {
    pub predicate: Predicate,
    pub level: String,
    pub value: i64,
}

/// A single check-configuration constraint. Instances are only
/// materialised on elements satisfying every constraint of the check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "constraint_type", rename_all = "lowercase")]
pub enum Constraint {
    /// Element-intrinsic property, e.g. environment or object state.
    Native { property: String, value: String },
    System { name: String, value: String },
    Custom { id: PropertyInstanceId, value: String },
    /// Team-scoped: the element must carry the named service property.
    Service { team_id: TeamId, name: String },
    /// Matches a service attribute value on whatever service applies.
    Attribute { name: String, value: String },
    Oncall { id: OncallId },
}

impl Constraint {
    /// Stable identifier used as the hashing key for this constraint.
    /// Deterministic regardless of the order constraints were supplied in.
    pub fn identifier(&self) -> String {
        match self {
            Constraint::Native { property, .. } => format!("native/{}", property),
            Constraint::System { name, .. } => format!("system/{}", name),
            Constraint::Custom { id, .. } => format!("custom/{}", id),
            Constraint::Service { team_id, name } => format!("service/{}/{}", team_id, name),
            Constraint::Attribute { name, .. } => format!("attribute/{}", name),
            Constraint::Oncall { id } => format!("oncall/{}", id),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckConfig {
    pub id: CheckId,
    pub name: String,
    pub capability_id: CapabilityId,
    pub interval_sec: u64,
    pub view: View,
    pub inheritance: bool,
    pub children_only: bool,
    pub enabled: bool,
    pub thresholds: Vec<Threshold>,
    pub constraints: Vec<Constraint>,
}

// ── Authorization entities ────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Section {
    pub id: SectionId,
    pub name: String,
    pub category: Category,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    pub id: ActionId,
    pub name: String,
    pub section_id: SectionId,
    pub category: Category,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Permission {
    pub id: PermissionId,
    pub name: String,
    pub category: Category,
}

/// Tree object kinds a repository-scoped grant can name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScopeObjectKind {
    Repository,
    Bucket,
    Group,
    Cluster,
    Node,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "scope", rename_all = "lowercase")]
pub enum GrantScope {
    Global,
    Tree {
        object_kind: ScopeObjectKind,
        object_id: uuid::Uuid,
    },
    Team {
        team_id: TeamId,
    },
    Monitoring {
        monitoring_id: MonitoringId,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Grant {
    pub id: uuid::Uuid,
    pub permission_id: PermissionId,
    pub category: Category,
    pub recipient_kind: SubjectKind,
    pub recipient_id: uuid::Uuid,
    pub scope: GrantScope,
}

// ── Lookup entities ───────────────────────────────────────────────────────────

/// Alerting level, referenced by name from thresholds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Level {
    pub name: String,
    pub short_name: String,
    pub numeric: u16,
}

/// Per-team service catalog: service name to its defined attributes.
/// Service and attribute constraints resolve through this.
pub type ServiceCatalog = HashMap<TeamId, HashMap<String, Vec<ServiceAttribute>>>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constraint_identifier_is_value_independent() {
        let a = Constraint::System { name: "fs_type".into(), value: "ext4".into() };
        let b = Constraint::System { name: "fs_type".into(), value: "xfs".into() };
        assert_eq!(a.identifier(), b.identifier());
    }

    #[test]
    fn property_payload_reports_its_type() {
        let p = PropertyPayload::Service { name: "httpd".into(), attributes: vec![] };
        assert_eq!(p.property_type(), PropertyType::Service);
        assert_eq!(p.name(), "httpd");
    }
}
