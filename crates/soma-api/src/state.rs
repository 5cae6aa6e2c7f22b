use std::sync::Arc;
use std::time::Duration;

use soma_keeper::{ForestCustodian, HandlerMap, WorkflowEngine};
use soma_perm::Cache;
use soma_store::Store;
use soma_super::Supervisor;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub handlers: Arc<HandlerMap>,
    pub supervisor: Arc<Supervisor>,
    pub perm: Arc<Cache>,
    pub custodian: Arc<ForestCustodian>,
    pub workflow: Arc<WorkflowEngine>,
    pub readonly: bool,
    /// Per-request deadline for replies from core handlers.
    pub request_timeout: Duration,
}
