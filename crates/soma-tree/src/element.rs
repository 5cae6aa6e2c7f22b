use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use soma_domain::{
    CheckConfig, CheckId, ElementId, Environment, ObjectState, PropertyInstanceId,
    PropertyPayload, PropertyType, RepositoryId, ServerId, TeamId, View,
};

// ── Element kinds ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ElementKind {
    Repository,
    Bucket {
        environment: Environment,
        repository_id: RepositoryId,
        frozen: bool,
    },
    Group,
    Cluster,
    Node {
        asset_id: u64,
        server_id: ServerId,
        online: bool,
    },
}

impl ElementKind {
    pub fn kind_name(&self) -> &'static str {
        match self {
            ElementKind::Repository => "repository",
            ElementKind::Bucket { .. } => "bucket",
            ElementKind::Group => "group",
            ElementKind::Cluster => "cluster",
            ElementKind::Node { .. } => "node",
        }
    }

    /// Legal parent/child edges:
    /// Repository→Bucket, Bucket→{Group,Cluster,Node},
    /// Group→{Group,Cluster,Node}, Cluster→Node.
    pub fn may_parent(&self, child: &ElementKind) -> bool {
        match (self, child) {
            (ElementKind::Repository, ElementKind::Bucket { .. }) => true,
            (ElementKind::Bucket { .. }, ElementKind::Group)
            | (ElementKind::Bucket { .. }, ElementKind::Cluster)
            | (ElementKind::Bucket { .. }, ElementKind::Node { .. }) => true,
            (ElementKind::Group, ElementKind::Group)
            | (ElementKind::Group, ElementKind::Cluster)
            | (ElementKind::Group, ElementKind::Node { .. }) => true,
            (ElementKind::Cluster, ElementKind::Node { .. }) => true,
            _ => false,
        }
    }
}

// ── Lookup handle ─────────────────────────────────────────────────────────────

/// Outcome of a tree lookup. `Fault` is the sentinel returned for
/// ambiguous results so concurrent finds never hand out dangling ids;
/// operations receiving a `Fault` become no-ops that report the failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Handle {
    Element(ElementId),
    Fault,
    Nil,
}

impl Handle {
    pub fn is_fault(&self) -> bool {
        matches!(self, Handle::Fault)
    }

    pub fn element_id(&self) -> Option<ElementId> {
        match self {
            Handle::Element(id) => Some(*id),
            _ => None,
        }
    }
}

// ── Properties ────────────────────────────────────────────────────────────────

/// One placed property. Direct placements have
/// `instance_id == source_instance_id`; inherited copies point their
/// `source_instance_id` at the ancestor's placement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyInstance {
    pub instance_id: PropertyInstanceId,
    pub source_instance_id: PropertyInstanceId,
    pub view: View,
    pub inheritance: bool,
    pub children_only: bool,
    pub payload: PropertyPayload,
}

impl PropertyInstance {
    pub fn is_inherited(&self) -> bool {
        self.instance_id != self.source_instance_id
    }

    /// The conflict key: a second property with the same key on the same
    /// element shadows inheritance.
    pub fn conflict_key(&self) -> (PropertyType, View, String) {
        (
            self.payload.property_type(),
            self.view,
            self.payload.name().to_string(),
        )
    }
}

/// The four per-type property maps of an element, keyed by instance id.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PropertyMaps {
    pub oncall: HashMap<PropertyInstanceId, PropertyInstance>,
    pub service: HashMap<PropertyInstanceId, PropertyInstance>,
    pub system: HashMap<PropertyInstanceId, PropertyInstance>,
    pub custom: HashMap<PropertyInstanceId, PropertyInstance>,
}

impl PropertyMaps {
    pub fn map(&self, t: PropertyType) -> &HashMap<PropertyInstanceId, PropertyInstance> {
        match t {
            PropertyType::Oncall => &self.oncall,
            PropertyType::Service => &self.service,
            PropertyType::System => &self.system,
            PropertyType::Custom => &self.custom,
        }
    }

    pub fn map_mut(
        &mut self,
        t: PropertyType,
    ) -> &mut HashMap<PropertyInstanceId, PropertyInstance> {
        match t {
            PropertyType::Oncall => &mut self.oncall,
            PropertyType::Service => &mut self.service,
            PropertyType::System => &mut self.system,
            PropertyType::Custom => &mut self.custom,
        }
    }

    pub fn iter_all(&self) -> impl Iterator<Item = &PropertyInstance> {
        self.oncall
            .values()
            .chain(self.service.values())
            .chain(self.system.values())
            .chain(self.custom.values())
    }

    pub fn is_empty(&self) -> bool {
        self.oncall.is_empty()
            && self.service.is_empty()
            && self.system.is_empty()
            && self.custom.is_empty()
    }
}

// ── Checks ────────────────────────────────────────────────────────────────────

/// One placed check configuration. Inherited copies carry their own
/// `check_id` and share `source_check_id` with the origin placement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlacedCheck {
    pub check_id: CheckId,
    pub source_check_id: CheckId,
    pub config: CheckConfig,
}

impl PlacedCheck {
    pub fn is_inherited(&self) -> bool {
        self.check_id != self.source_check_id
    }
}

// ── Element ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Element {
    pub id: ElementId,
    pub kind: ElementKind,
    pub name: String,
    pub state: ObjectState,
    pub team_id: TeamId,
    /// Upward reference, resolved through the owning tree. Never
    /// serialised; the child list is authoritative, and the store keeps
    /// parentage in its own column.
    #[serde(skip)]
    pub parent: Option<ElementId>,
    /// Children in arrival order.
    pub children: Vec<ElementId>,
    pub properties: PropertyMaps,
    pub checks: HashMap<CheckId, PlacedCheck>,
}

impl Element {
    pub fn new(id: ElementId, kind: ElementKind, name: String, team_id: TeamId) -> Self {
        let state = match kind {
            ElementKind::Repository => ObjectState::Active,
            ElementKind::Bucket { .. } => ObjectState::Active,
            _ => ObjectState::Floating,
        };
        Element {
            id,
            kind,
            name,
            state,
            team_id,
            parent: None,
            children: Vec::new(),
            properties: PropertyMaps::default(),
            checks: HashMap::new(),
        }
    }

    pub fn is_frozen_bucket(&self) -> bool {
        matches!(self.kind, ElementKind::Bucket { frozen: true, .. })
    }

    /// Look a property up across all four maps.
    pub fn property(&self, instance_id: PropertyInstanceId) -> Option<&PropertyInstance> {
        self.properties.iter_all().find(|p| p.instance_id == instance_id)
    }

    /// True if the element directly carries a property with this conflict key.
    pub fn has_conflicting_property(&self, key: &(PropertyType, View, String)) -> bool {
        self.properties.map(key.0).values().any(|p| {
            p.view == key.1 && p.payload.name() == key.2
        })
    }
}
