use serde::{Deserialize, Serialize};
use soma_domain::{CheckId, ElementId, ObjectState, PropertyInstanceId, PropertyType};

use crate::element::{ElementKind, PlacedCheck, PropertyInstance};

/// One entry in the action stream a tree emits while a mutation is
/// applied. The Treekeeper drains this stream after every request and
/// translates it into persistence operations; all events of one request
/// form one transaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TreeEvent {
    ElementCreated {
        element_id: ElementId,
        kind: ElementKind,
        name: String,
        team_id: soma_domain::TeamId,
        parent_id: Option<ElementId>,
    },
    ElementRemoved {
        element_id: ElementId,
        kind: ElementKind,
    },
    MembershipChanged {
        element_id: ElementId,
        old_parent: Option<ElementId>,
        new_parent: ElementId,
    },
    StateChanged {
        element_id: ElementId,
        old: ObjectState,
        new: ObjectState,
    },
    BucketFrozen {
        element_id: ElementId,
        frozen: bool,
    },
    PropertySet {
        element_id: ElementId,
        property: PropertyInstance,
    },
    PropertyDeleted {
        element_id: ElementId,
        instance_id: PropertyInstanceId,
        property_type: PropertyType,
    },
    CheckSet {
        element_id: ElementId,
        check: PlacedCheck,
    },
    CheckDeleted {
        element_id: ElementId,
        check_id: CheckId,
    },
}

impl TreeEvent {
    pub fn element_id(&self) -> ElementId {
        match self {
            TreeEvent::ElementCreated { element_id, .. }
            | TreeEvent::ElementRemoved { element_id, .. }
            | TreeEvent::MembershipChanged { element_id, .. }
            | TreeEvent::StateChanged { element_id, .. }
            | TreeEvent::BucketFrozen { element_id, .. }
            | TreeEvent::PropertySet { element_id, .. }
            | TreeEvent::PropertyDeleted { element_id, .. }
            | TreeEvent::CheckSet { element_id, .. }
            | TreeEvent::CheckDeleted { element_id, .. } => *element_id,
        }
    }
}
