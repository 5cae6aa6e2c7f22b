use serde::{Deserialize, Serialize};
use soma_domain::{
    BucketId, CheckConfig, CheckId, ElementId, Environment, JobId, PropertyInstanceId,
    PropertySpec, RepositoryId, TeamId, UserId,
};
use soma_store::NodeInventoryRow;
use tokio::sync::oneshot;
use uuid::Uuid;

use crate::error::ServiceError;

/// Mutating operations routed through GuidePost into a Treekeeper.
/// Serialised whole into the Job row for audit.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Payload {
    CreateBucket {
        repository_id: RepositoryId,
        name: String,
        environment: Environment,
        team_id: TeamId,
    },
    CreateGroup {
        bucket_id: BucketId,
        name: String,
        team_id: TeamId,
    },
    CreateCluster {
        bucket_id: BucketId,
        name: String,
        team_id: TeamId,
    },
    AddGroupToGroup {
        bucket_id: BucketId,
        group_id: ElementId,
        parent_group_id: ElementId,
    },
    AddClusterToGroup {
        bucket_id: BucketId,
        cluster_id: ElementId,
        group_id: ElementId,
    },
    AddNodeToGroup {
        bucket_id: BucketId,
        node_id: ElementId,
        group_id: ElementId,
    },
    AddNodeToCluster {
        bucket_id: BucketId,
        node_id: ElementId,
        cluster_id: ElementId,
    },
    AssignNode {
        node_id: ElementId,
        repository_id: RepositoryId,
        bucket_id: BucketId,
        /// Filled by GuidePost from the inventory namespace; anything
        /// the client supplied here is discarded.
        #[serde(skip_serializing_if = "Option::is_none")]
        inventory: Option<NodeInventoryRow>,
    },
    SetProperty {
        element_id: ElementId,
        spec: PropertySpec,
    },
    DeleteProperty {
        element_id: ElementId,
        instance_id: PropertyInstanceId,
    },
    SetCheck {
        element_id: ElementId,
        config: CheckConfig,
    },
    DeleteCheck {
        element_id: ElementId,
        check_id: CheckId,
    },
    FreezeBucket {
        bucket_id: BucketId,
        frozen: bool,
    },
    DetachElement {
        element_id: ElementId,
    },
    DestroyElement {
        element_id: ElementId,
    },
}

impl Payload {
    /// Job type string recorded on the Job row.
    pub fn job_type(&self) -> &'static str {
        match self {
            Payload::CreateBucket { .. } => "create_bucket",
            Payload::CreateGroup { .. } => "create_group",
            Payload::CreateCluster { .. } => "create_cluster",
            Payload::AddGroupToGroup { .. } => "add_group_to_group",
            Payload::AddClusterToGroup { .. } => "add_cluster_to_group",
            Payload::AddNodeToGroup { .. } => "add_node_to_group",
            Payload::AddNodeToCluster { .. } => "add_node_to_cluster",
            Payload::AssignNode { .. } => "assign_node",
            Payload::SetProperty { .. } => "set_property",
            Payload::DeleteProperty { .. } => "delete_property",
            Payload::SetCheck { .. } => "set_check",
            Payload::DeleteCheck { .. } => "delete_check",
            Payload::FreezeBucket { .. } => "freeze_bucket",
            Payload::DetachElement { .. } => "detach_element",
            Payload::DestroyElement { .. } => "destroy_element",
        }
    }

    /// The repository id, when the payload carries it directly.
    pub fn repository_id(&self) -> Option<RepositoryId> {
        match self {
            Payload::CreateBucket { repository_id, .. }
            | Payload::AssignNode { repository_id, .. } => Some(*repository_id),
            _ => None,
        }
    }

    /// The element through which GuidePost joins up to the repository
    /// when no repository id is present.
    pub fn anchor_element(&self) -> Option<ElementId> {
        match self {
            Payload::CreateBucket { .. } => None,
            Payload::CreateGroup { bucket_id, .. }
            | Payload::CreateCluster { bucket_id, .. }
            | Payload::AddGroupToGroup { bucket_id, .. }
            | Payload::AddClusterToGroup { bucket_id, .. }
            | Payload::AddNodeToGroup { bucket_id, .. }
            | Payload::AddNodeToCluster { bucket_id, .. }
            | Payload::FreezeBucket { bucket_id, .. } => {
                Some(ElementId::new(bucket_id.as_uuid()))
            }
            Payload::AssignNode { .. } => None,
            Payload::SetProperty { element_id, .. }
            | Payload::DeleteProperty { element_id, .. }
            | Payload::SetCheck { element_id, .. }
            | Payload::DeleteCheck { element_id, .. }
            | Payload::DetachElement { element_id }
            | Payload::DestroyElement { element_id } => Some(*element_id),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    pub id: Uuid,
    pub section: String,
    pub action: String,
    pub user_id: UserId,
    pub team_id: TeamId,
    /// Present once GuidePost has persisted the Job row.
    pub job_id: Option<JobId>,
    pub payload: Payload,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ReplyPayload {
    /// Mutation accepted; the Treekeeper's outcome lands on the Job row.
    Accepted { job_id: JobId },
    /// Synchronous completion.
    Done,
}

pub type Reply = Result<ReplyPayload, ServiceError>;

/// What travels over a handler channel: the request plus its reply slot.
#[derive(Debug)]
pub struct Envelope {
    pub request: Request,
    pub reply: oneshot::Sender<Reply>,
}

impl Envelope {
    pub fn new(request: Request) -> (Self, oneshot::Receiver<Reply>) {
        let (tx, rx) = oneshot::channel();
        (Envelope { request, reply: tx }, rx)
    }
}
