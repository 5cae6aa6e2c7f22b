use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Utc;
use soma_domain::{
    validate_entity_name, CheckId, CheckInstanceId, ElementId, InstanceState, JobResult,
    JobStatus,
};
use soma_store::{ElementRow, InstanceRow, PersistOp, PropertyRow, RepositoryRow, Store};
use soma_tree::{
    verify, AttachRequest, ComputedInstance, Element, ElementKind, FindRequest, Handle, Tree,
    TreeEvent,
};
use tokio::sync::{broadcast, mpsc};
use tracing::{error, info, warn};

use crate::bus::GrimReaper;
use crate::error::{KeeperError, ServiceError};
use crate::request::{Envelope, Payload, Reply, ReplyPayload, Request};
use crate::workflow::WorkflowEngine;

/// Shared status block GuidePost consults before forwarding work.
#[derive(Debug, Default)]
pub struct KeeperStatus {
    ready: AtomicBool,
    broken: AtomicBool,
}

impl KeeperStatus {
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    pub fn is_broken(&self) -> bool {
        self.broken.load(Ordering::Acquire)
    }

    fn mark_ready(&self) {
        self.ready.store(true, Ordering::Release);
    }

    fn mark_broken(&self) {
        self.broken.store(true, Ordering::Release);
    }
}

/// Per-repository single-writer engine. Owns the in-memory tree, applies
/// mutations transactionally, and materialises check instances.
///
/// One Treekeeper consumes one input queue in strict FIFO order; a
/// request sees the effects of every earlier request in the same keeper
/// and none of any later one.
pub struct TreeKeeper {
    repository: RepositoryRow,
    store: Arc<dyn Store>,
    workflow: Arc<WorkflowEngine>,
    status: Arc<KeeperStatus>,
    input: mpsc::Receiver<Envelope>,
    shutdown: broadcast::Receiver<()>,
    _ack: mpsc::Sender<()>,
    tree: Tree,
}

impl TreeKeeper {
    /// Spawn the keeper task. Returns the status block and the intake
    /// sender for registration.
    pub fn spawn(
        repository: RepositoryRow,
        store: Arc<dyn Store>,
        workflow: Arc<WorkflowEngine>,
        reaper: &GrimReaper,
    ) -> (Arc<KeeperStatus>, mpsc::Sender<Envelope>) {
        let status = Arc::new(KeeperStatus::default());
        let (tx, rx) = mpsc::channel(64);
        let (shutdown, ack) = reaper.subscribe();
        let tree = Tree::new(repository.id, repository.name.clone(), repository.team_id);
        let keeper = TreeKeeper {
            repository,
            store,
            workflow,
            status: status.clone(),
            input: rx,
            shutdown,
            _ack: ack,
            tree,
        };
        tokio::spawn(keeper.run());
        (status, tx)
    }

    async fn run(mut self) {
        match self.boot().await {
            Ok(()) => {
                self.status.mark_ready();
                info!(repository = %self.repository.name, "treekeeper ready");
            }
            Err(e) => {
                error!(repository = %self.repository.name, error = %e, "treekeeper broken at boot");
                self.status.mark_broken();
            }
        }

        loop {
            tokio::select! {
                _ = self.shutdown.recv() => {
                    info!(repository = %self.repository.name, "treekeeper draining");
                    self.input.close();
                    while let Some(env) = self.input.recv().await {
                        self.dispatch(env).await;
                    }
                    break;
                }
                maybe = self.input.recv() => {
                    match maybe {
                        Some(env) => self.dispatch(env).await,
                        None => break,
                    }
                }
            }
        }
        info!(repository = %self.repository.name, "treekeeper stopped");
    }

    async fn dispatch(&mut self, env: Envelope) {
        if self.status.is_broken() {
            let _ = env.reply.send(Err(ServiceError::gone(format!(
                "repository {} is broken",
                self.repository.name
            ))));
            return;
        }
        let reply = self.process(&env.request).await;
        if env.reply.send(reply).is_err() {
            warn!(repository = %self.repository.name, "reply receiver dropped");
        }
    }

    // ── Boot ──────────────────────────────────────────────────────────────────

    /// Load the full repository state: elements parents-first, then
    /// properties, then checks, rebuild inherited copies, verify the
    /// tree shape, and count existing instances.
    async fn boot(&mut self) -> Result<(), KeeperError> {
        let repo = self.repository.clone();
        let tree = load_tree(self.store.as_ref(), &repo).await?;
        let instances = self.store.list_instances(repo.id).await?;
        info!(
            repository = %repo.name,
            elements = tree.len(),
            instances = instances.len(),
            "treekeeper loaded"
        );
        self.tree = tree;
        Ok(())
    }

    /// Roll the in-memory tree back by re-loading it from the store.
    async fn reload(&mut self) {
        if let Err(e) = self.boot().await {
            error!(repository = %self.repository.name, error = %e, "rollback reload failed");
            self.status.mark_broken();
        }
    }

    // ── Request processing ────────────────────────────────────────────────────

    async fn process(&mut self, request: &Request) -> Reply {
        let applied = self.apply_to_tree(&request.payload);
        let events = self.tree.drain_events();

        let extra_ops = match applied {
            Ok(ops) => ops,
            Err(e) => {
                if !events.is_empty() {
                    // partial mutation; restore the in-memory tree
                    self.reload().await;
                }
                self.fail_job(request, &e).await;
                return Err(e);
            }
        };

        let mut ops = self.translate(&events);
        ops.extend(extra_ops);

        // recompute instances affected by this request
        let existing = match self.store.list_instances(self.repository.id).await {
            Ok(rows) => rows,
            Err(e) => {
                self.reload().await;
                let err = ServiceError::from(e);
                self.fail_job(request, &err).await;
                return Err(err);
            }
        };
        let touched: Vec<ElementId> = events.iter().map(|e| e.element_id()).collect();
        let (instance_ops, to_compute, to_deprovision) =
            self.recompute_instances(&touched, &existing);
        ops.extend(instance_ops);

        // every event of one request lands in one transaction
        if let Err(e) = self.store.apply(&ops).await {
            error!(repository = %self.repository.name, error = %e, "transaction failed, rolling back");
            self.reload().await;
            let err = ServiceError::from(e);
            self.fail_job(request, &err).await;
            return Err(err);
        }

        // drive the workflow outside the transaction
        for id in to_compute {
            if let Err(e) = self.workflow.instance_computed(id).await {
                warn!(instance = %id, error = %e, "workflow advance failed");
            }
        }
        for id in to_deprovision {
            if let Err(e) = self.workflow.start_deprovision(id).await {
                warn!(instance = %id, error = %e, "deprovision start failed");
            }
        }

        // the job closes only once the computed instances are in flight
        if let Some(job_id) = request.job_id {
            let op = PersistOp::UpdateJob {
                job_id,
                status: JobStatus::Processed,
                result: JobResult::Success,
                error: None,
                finished_at: Some(Utc::now()),
            };
            if let Err(e) = self.store.apply(&[op]).await {
                error!(job = %job_id, error = %e, "failed to mark job processed");
            }
        }

        Ok(ReplyPayload::Done)
    }

    async fn fail_job(&self, request: &Request, err: &ServiceError) {
        if let Some(job_id) = request.job_id {
            let op = PersistOp::UpdateJob {
                job_id,
                status: JobStatus::Failed,
                result: JobResult::Failure,
                error: Some(err.message.clone()),
                finished_at: Some(Utc::now()),
            };
            if let Err(e) = self.store.apply(&[op]).await {
                error!(job = %job_id, error = %e, "failed to mark job failed");
            }
        }
    }

    // ── Tree mutation ─────────────────────────────────────────────────────────

    /// Apply one request payload to the tree. Returns extra persistence
    /// operations that accompany the event stream (inventory flags).
    fn apply_to_tree(&mut self, payload: &Payload) -> Result<Vec<PersistOp>, ServiceError> {
        match payload {
            Payload::CreateBucket { name, environment, team_id, .. } => {
                validate_entity_name(name).map_err(|e| ServiceError::bad_request(e.to_string()))?;
                let kind = ElementKind::Bucket {
                    environment: *environment,
                    repository_id: self.repository.id,
                    frozen: false,
                };
                self.tree.attach(AttachRequest {
                    parent: Handle::Element(self.tree.root_id()),
                    element_id: ElementId::generate(),
                    kind,
                    name: name.clone(),
                    team_id: *team_id,
                })?;
                Ok(vec![])
            }
            Payload::CreateGroup { bucket_id, name, team_id } => {
                validate_entity_name(name).map_err(|e| ServiceError::bad_request(e.to_string()))?;
                let parent = self.find_element(ElementId::new(bucket_id.as_uuid()))?;
                self.tree.attach(AttachRequest {
                    parent,
                    element_id: ElementId::generate(),
                    kind: ElementKind::Group,
                    name: name.clone(),
                    team_id: *team_id,
                })?;
                Ok(vec![])
            }
            Payload::CreateCluster { bucket_id, name, team_id } => {
                validate_entity_name(name).map_err(|e| ServiceError::bad_request(e.to_string()))?;
                let parent = self.find_element(ElementId::new(bucket_id.as_uuid()))?;
                self.tree.attach(AttachRequest {
                    parent,
                    element_id: ElementId::generate(),
                    kind: ElementKind::Cluster,
                    name: name.clone(),
                    team_id: *team_id,
                })?;
                Ok(vec![])
            }
            Payload::AddGroupToGroup { group_id, parent_group_id, .. } => {
                let child = self.find_element(*group_id)?;
                let parent = self.find_element(*parent_group_id)?;
                self.tree.reparent(child, parent)?;
                Ok(vec![])
            }
            Payload::AddClusterToGroup { cluster_id, group_id, .. } => {
                let child = self.find_element(*cluster_id)?;
                let parent = self.find_element(*group_id)?;
                self.tree.reparent(child, parent)?;
                Ok(vec![])
            }
            Payload::AddNodeToGroup { node_id, group_id, .. } => {
                let child = self.find_element(*node_id)?;
                let parent = self.find_element(*group_id)?;
                self.tree.reparent(child, parent)?;
                Ok(vec![])
            }
            Payload::AddNodeToCluster { node_id, cluster_id, .. } => {
                let child = self.find_element(*node_id)?;
                let parent = self.find_element(*cluster_id)?;
                self.tree.reparent(child, parent)?;
                Ok(vec![])
            }
            Payload::AssignNode { node_id, bucket_id, inventory, .. } => {
                let inventory = inventory.as_ref().ok_or_else(|| {
                    ServiceError::internal("assign_node arrived without inventory hydration")
                })?;
                let parent = self.find_element(ElementId::new(bucket_id.as_uuid()))?;
                self.tree.attach(AttachRequest {
                    parent,
                    element_id: *node_id,
                    kind: ElementKind::Node {
                        asset_id: inventory.asset_id,
                        server_id: inventory.server_id,
                        online: inventory.online,
                    },
                    name: inventory.name.clone(),
                    team_id: inventory.team_id,
                })?;
                Ok(vec![PersistOp::MarkNodeAssigned { node_id: *node_id, assigned: true }])
            }
            Payload::SetProperty { element_id, spec } => {
                let target = self.find_element(*element_id)?;
                self.tree.set_property(target, spec.clone())?;
                Ok(vec![])
            }
            Payload::DeleteProperty { element_id, instance_id } => {
                let target = self.find_element(*element_id)?;
                self.tree.delete_property(target, *instance_id)?;
                Ok(vec![])
            }
            Payload::SetCheck { element_id, config } => {
                let target = self.find_element(*element_id)?;
                self.tree.set_check(target, config.clone())?;
                Ok(vec![])
            }
            Payload::DeleteCheck { element_id, check_id } => {
                let target = self.find_element(*element_id)?;
                self.tree.delete_check(target, *check_id)?;
                Ok(vec![])
            }
            Payload::FreezeBucket { bucket_id, frozen } => {
                let target = self.find_element(ElementId::new(bucket_id.as_uuid()))?;
                self.tree.set_bucket_frozen(target, *frozen)?;
                Ok(vec![])
            }
            Payload::DetachElement { element_id } => {
                let target = self.find_element(*element_id)?;
                self.tree.detach(target)?;
                Ok(vec![])
            }
            Payload::DestroyElement { element_id } => {
                let target = self.find_element(*element_id)?;
                self.tree.destroy(target)?;
                Ok(vec![])
            }
        }
    }

    fn find_element(&self, id: ElementId) -> Result<Handle, ServiceError> {
        match self.tree.find(&FindRequest::by_id(id)) {
            Handle::Nil => Err(ServiceError::not_found(format!("element {}", id))),
            handle => Ok(handle),
        }
    }

    // ── Event translation ─────────────────────────────────────────────────────

    /// Translate the action event stream into persistence operations.
    /// Only direct placements are persisted; inherited copies are
    /// rebuilt at boot.
    fn translate(&self, events: &[TreeEvent]) -> Vec<PersistOp> {
        let repo = self.repository.id;
        let mut ops = Vec::new();
        let mut upserted: HashSet<ElementId> = HashSet::new();

        for ev in events {
            match ev {
                TreeEvent::ElementCreated { element_id, .. }
                | TreeEvent::MembershipChanged { element_id, .. }
                | TreeEvent::StateChanged { element_id, .. }
                | TreeEvent::BucketFrozen { element_id, .. } => {
                    if upserted.insert(*element_id) {
                        if let Some(row) = self.element_row(*element_id) {
                            ops.push(PersistOp::UpsertElement(row));
                        }
                    }
                }
                TreeEvent::ElementRemoved { element_id, .. } => {
                    ops.push(PersistOp::DeleteElement {
                        repository_id: repo,
                        element_id: *element_id,
                    });
                }
                TreeEvent::PropertySet { element_id, property } => {
                    if !property.is_inherited() {
                        ops.push(PersistOp::UpsertProperty(PropertyRow {
                            repository_id: repo,
                            element_id: *element_id,
                            property: property.clone(),
                        }));
                    }
                }
                TreeEvent::PropertyDeleted { instance_id, .. } => {
                    ops.push(PersistOp::DeleteProperty {
                        repository_id: repo,
                        instance_id: *instance_id,
                    });
                }
                TreeEvent::CheckSet { element_id, check } => {
                    if !check.is_inherited() {
                        ops.push(PersistOp::UpsertCheck(soma_store::CheckRow {
                            repository_id: repo,
                            element_id: *element_id,
                            check: check.clone(),
                        }));
                    }
                }
                TreeEvent::CheckDeleted { check_id, .. } => {
                    ops.push(PersistOp::DeleteCheck {
                        repository_id: repo,
                        check_id: *check_id,
                    });
                }
            }
        }
        ops
    }

    fn element_row(&self, id: ElementId) -> Option<ElementRow> {
        let el = self.tree.element(id)?;
        Some(ElementRow {
            id: el.id,
            repository_id: self.repository.id,
            parent_id: el.parent,
            kind: el.kind.clone(),
            name: el.name.clone(),
            team_id: el.team_id,
            state: el.state,
        })
    }

    // ── Instance recomputation ────────────────────────────────────────────────

    /// Diff the computed instance set of every affected check against
    /// the persisted rows.
    ///
    /// Retain on identical triple-hash, version-bump (blocked) on
    /// change, create at version zero otherwise; rows whose signature
    /// disappeared are queued for deprovisioning.
    fn recompute_instances(
        &self,
        touched: &[ElementId],
        existing: &[InstanceRow],
    ) -> (Vec<PersistOp>, Vec<CheckInstanceId>, Vec<CheckInstanceId>) {
        let mut affected: Vec<CheckId> = self.tree.checks_affected_by(touched);
        let live: HashSet<CheckId> = self.tree.source_check_ids().into_iter().collect();
        for row in existing {
            // checks deleted by this request still need their instances
            // deprovisioned
            if !live.contains(&row.check_id)
                && !row.state.is_terminal()
                && !affected.contains(&row.check_id)
            {
                affected.push(row.check_id);
            }
        }

        let mut ops = Vec::new();
        let mut to_compute = Vec::new();
        let mut to_deprovision = Vec::new();

        for check_id in affected {
            let computed = dedup_by_signature(self.tree.compute_instances_for(check_id));
            let rows: Vec<&InstanceRow> =
                existing.iter().filter(|r| r.check_id == check_id).collect();

            let mut retained: HashSet<CheckInstanceId> = HashSet::new();
            let mut created: Vec<InstanceRow> = Vec::new();

            for ci in &computed {
                let same = rows.iter().find(|r| {
                    r.constraint_hash == ci.constraint_hash
                        && r.constraint_val_hash == ci.constraint_val_hash
                        && r.instance_service_cfg_hash == ci.instance_service_cfg_hash
                        && r.state != InstanceState::Deprovisioned
                });
                if let Some(row) = same {
                    retained.insert(row.id);
                    continue;
                }
                // a changed or new signature: the next version number
                // within this constraint line
                let prior: Vec<&&InstanceRow> = rows
                    .iter()
                    .filter(|r| r.constraint_hash == ci.constraint_hash)
                    .collect();
                let version = prior.iter().map(|r| r.version + 1).max().unwrap_or(0);
                let blocked = prior.iter().any(|r| !r.state.is_terminal());
                let state = if blocked {
                    InstanceState::Blocked
                } else {
                    InstanceState::AwaitingComputation
                };
                created.push(self.instance_row(ci, version, state));
            }

            // rows that no longer correspond to any computed instance
            for row in &rows {
                if retained.contains(&row.id) || row.state.is_terminal() {
                    continue;
                }
                let still_computed = computed.iter().any(|ci| {
                    ci.constraint_hash == row.constraint_hash
                        && ci.constraint_val_hash == row.constraint_val_hash
                        && ci.instance_service_cfg_hash == row.instance_service_cfg_hash
                });
                if !still_computed {
                    to_deprovision.push(row.id);
                }
            }

            for row in created {
                if row.state == InstanceState::AwaitingComputation {
                    to_compute.push(row.id);
                }
                ops.push(PersistOp::UpsertInstance(row));
            }
        }
        (ops, to_compute, to_deprovision)
    }

    fn instance_row(
        &self,
        ci: &ComputedInstance,
        version: u64,
        state: InstanceState,
    ) -> InstanceRow {
        InstanceRow {
            id: CheckInstanceId::generate(),
            repository_id: self.repository.id,
            check_id: ci.check_id,
            element_id: ci.element_id,
            version,
            constraint_hash: ci.constraint_hash.clone(),
            constraint_val_hash: ci.constraint_val_hash.clone(),
            instance_service_cfg_hash: ci.instance_service_cfg_hash.clone(),
            service_config: serde_json::to_value(&ci.service_config)
                .unwrap_or(serde_json::Value::Null),
            state,
        }
    }
}

/// Reconstruct a repository's tree from its persisted rows: elements
/// parents-first, then properties and checks in dependency order,
/// inherited copies rebuilt, shape verified.
pub async fn load_tree(store: &dyn Store, repo: &RepositoryRow) -> Result<Tree, KeeperError> {
    let mut tree = Tree::new(repo.id, repo.name.clone(), repo.team_id);

    for svc in store.list_team_services(repo.team_id).await? {
        tree.service_catalog
            .entry(svc.team_id)
            .or_default()
            .insert(svc.service, svc.attributes);
    }

    let mut pending = store.list_elements(repo.id).await?;
    while !pending.is_empty() {
        let before = pending.len();
        let mut rest = Vec::new();
        for row in pending {
            let parent_present = row
                .parent_id
                .map(|p| tree.element(p).is_some())
                .unwrap_or(false);
            if parent_present {
                let mut el = Element::new(row.id, row.kind.clone(), row.name.clone(), row.team_id);
                el.parent = row.parent_id;
                el.state = row.state;
                tree.load_element(el)?;
            } else {
                rest.push(row);
            }
        }
        if rest.len() == before {
            return Err(KeeperError::Boot(format!(
                "{} elements reference parents outside the repository",
                rest.len()
            )));
        }
        pending = rest;
    }

    for row in store.list_properties(repo.id).await? {
        tree.load_property(row.element_id, row.property)?;
    }
    for row in store.list_checks(repo.id).await? {
        tree.load_check(row.element_id, row.check)?;
    }
    tree.rebuild_inheritance();
    verify(&tree)?;
    Ok(tree)
}

/// Two computed instances with identical triple-hash are equivalent;
/// only one is materialised.
fn dedup_by_signature(computed: Vec<ComputedInstance>) -> Vec<ComputedInstance> {
    let mut seen: HashMap<(String, String, String), ()> = HashMap::new();
    computed
        .into_iter()
        .filter(|ci| {
            seen.insert(
                (
                    ci.constraint_hash.clone(),
                    ci.constraint_val_hash.clone(),
                    ci.instance_service_cfg_hash.clone(),
                ),
                (),
            )
            .is_none()
        })
        .collect()
}
