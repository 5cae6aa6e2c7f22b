use std::sync::Arc;
use std::time::Duration;

use soma_domain::{validate_entity_name, RepositoryId, TeamId};
use soma_store::{CheckRow, ElementRow, PersistOp, PropertyRow, RepositoryRow, Store};
use tracing::info;

use crate::bus::{repository_key, GrimReaper, HandlerMap, Intake, RegisteredHandler};
use crate::error::ServiceError;
use crate::treekeeper::{load_tree, TreeKeeper};
use crate::workflow::WorkflowEngine;

/// How long repository creation waits for the new Treekeeper to become
/// ready before reporting failure.
const READINESS_TIMEOUT: Duration = Duration::from_secs(10);

/// Creates, activates, and clones repositories; spawns one Treekeeper
/// per active repository and registers it in the handler map.
pub struct ForestCustodian {
    store: Arc<dyn Store>,
    handlers: Arc<HandlerMap>,
    workflow: Arc<WorkflowEngine>,
    reaper: Arc<GrimReaper>,
}

impl ForestCustodian {
    pub fn new(
        store: Arc<dyn Store>,
        handlers: Arc<HandlerMap>,
        workflow: Arc<WorkflowEngine>,
        reaper: Arc<GrimReaper>,
    ) -> Self {
        ForestCustodian { store, handlers, workflow, reaper }
    }

    /// Spawn Treekeepers for every active repository; called at daemon
    /// startup.
    pub async fn boot_all(&self) -> Result<usize, ServiceError> {
        let repositories = self.store.list_repositories().await.map_err(ServiceError::from)?;
        let mut count = 0;
        for repo in repositories.into_iter().filter(|r| r.active) {
            self.spawn_keeper(repo).await;
            count += 1;
        }
        info!(count, "forest custodian spawned treekeepers");
        Ok(count)
    }

    /// Create a repository, spawn its Treekeeper, and wait for
    /// readiness before acknowledging.
    pub async fn create_repository(
        &self,
        name: &str,
        team_id: TeamId,
    ) -> Result<RepositoryRow, ServiceError> {
        validate_entity_name(name).map_err(|e| ServiceError::bad_request(e.to_string()))?;
        let row = RepositoryRow {
            id: RepositoryId::generate(),
            name: name.to_string(),
            team_id,
            active: false,
            deleted: false,
        };
        self.store.create_repository(&row).await.map_err(ServiceError::from)?;

        let status = self.spawn_keeper(row.clone()).await;
        if !await_ready(&status, READINESS_TIMEOUT).await {
            return Err(ServiceError::unavailable(format!(
                "treekeeper for {} did not become ready",
                name
            )));
        }
        self.store
            .set_repository_active(row.id, true)
            .await
            .map_err(ServiceError::from)?;
        info!(repository = name, id = %row.id, "repository created and active");
        Ok(RepositoryRow { active: true, ..row })
    }

    /// Activate an existing repository: spawn and register its keeper.
    pub async fn activate_repository(&self, id: RepositoryId) -> Result<(), ServiceError> {
        let repo = self
            .store
            .get_repository(id)
            .await
            .map_err(ServiceError::from)?
            .filter(|r| !r.deleted)
            .ok_or_else(|| ServiceError::not_found(format!("repository {}", id)))?;
        if self
            .handlers
            .lookup(&repository_key(&repo.name))
            .await
            .is_some()
        {
            return Err(ServiceError::conflict(format!(
                "repository {} already has a treekeeper",
                repo.name
            )));
        }
        let status = self.spawn_keeper(repo.clone()).await;
        if !await_ready(&status, READINESS_TIMEOUT).await {
            return Err(ServiceError::unavailable(format!(
                "treekeeper for {} did not become ready",
                repo.name
            )));
        }
        self.store
            .set_repository_active(id, true)
            .await
            .map_err(ServiceError::from)?;
        Ok(())
    }

    /// Deep-clone a repository under a new name: fresh element,
    /// property, and check identities, inherited copies rebuilt, then a
    /// keeper of its own.
    pub async fn clone_repository(
        &self,
        source_id: RepositoryId,
        new_name: &str,
    ) -> Result<RepositoryRow, ServiceError> {
        validate_entity_name(new_name).map_err(|e| ServiceError::bad_request(e.to_string()))?;
        let source = self
            .store
            .get_repository(source_id)
            .await
            .map_err(ServiceError::from)?
            .filter(|r| !r.deleted)
            .ok_or_else(|| ServiceError::not_found(format!("repository {}", source_id)))?;

        let source_tree = load_tree(self.store.as_ref(), &source)
            .await
            .map_err(ServiceError::from)?;
        let new_id = RepositoryId::generate();
        let clone = source_tree.clone_repository(new_id, new_name.to_string());

        let row = RepositoryRow {
            id: new_id,
            name: new_name.to_string(),
            team_id: source.team_id,
            active: false,
            deleted: false,
        };
        self.store.create_repository(&row).await.map_err(ServiceError::from)?;

        // persist the cloned tree: elements parents-first, then direct
        // property and check placements
        let mut ops: Vec<PersistOp> = Vec::new();
        let mut order = vec![clone.root_id()];
        order.extend(clone.descendants(clone.root_id()));
        for id in order {
            let el = clone
                .element(id)
                .ok_or_else(|| ServiceError::internal("clone lost an element"))?;
            if id != clone.root_id() {
                ops.push(PersistOp::UpsertElement(ElementRow {
                    id: el.id,
                    repository_id: new_id,
                    parent_id: el.parent,
                    kind: el.kind.clone(),
                    name: el.name.clone(),
                    team_id: el.team_id,
                    state: el.state,
                }));
            }
            for p in el.properties.iter_all().filter(|p| !p.is_inherited()) {
                ops.push(PersistOp::UpsertProperty(PropertyRow {
                    repository_id: new_id,
                    element_id: el.id,
                    property: p.clone(),
                }));
            }
            for c in el.checks.values().filter(|c| !c.is_inherited()) {
                ops.push(PersistOp::UpsertCheck(CheckRow {
                    repository_id: new_id,
                    element_id: el.id,
                    check: c.clone(),
                }));
            }
        }
        self.store.apply(&ops).await.map_err(ServiceError::from)?;

        let status = self.spawn_keeper(row.clone()).await;
        if !await_ready(&status, READINESS_TIMEOUT).await {
            return Err(ServiceError::unavailable(format!(
                "treekeeper for {} did not become ready",
                new_name
            )));
        }
        self.store
            .set_repository_active(new_id, true)
            .await
            .map_err(ServiceError::from)?;
        info!(source = %source.name, clone = new_name, "repository cloned");
        Ok(RepositoryRow { active: true, ..row })
    }

    async fn spawn_keeper(
        &self,
        repo: RepositoryRow,
    ) -> Arc<crate::treekeeper::KeeperStatus> {
        let key = repository_key(&repo.name);
        let (status, intake) = TreeKeeper::spawn(
            repo,
            self.store.clone(),
            self.workflow.clone(),
            &self.reaper,
        );
        self.handlers
            .register(
                key,
                RegisteredHandler {
                    intake: Intake::new(intake),
                    keeper_status: Some(status.clone()),
                },
            )
            .await;
        status
    }
}

async fn await_ready(status: &crate::treekeeper::KeeperStatus, timeout: Duration) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if status.is_ready() {
            return true;
        }
        if status.is_broken() || tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
