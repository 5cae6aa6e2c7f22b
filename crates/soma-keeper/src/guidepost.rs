use std::sync::Arc;

use chrono::Utc;
use soma_domain::{JobId, JobResult, JobStatus, RepositoryId};
use soma_store::{JobRow, RepositoryRow, Store};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

use crate::bus::{repository_key, GrimReaper, HandlerMap, Intake, RegisteredHandler, GUIDEPOST};
use crate::error::ServiceError;
use crate::request::{Envelope, Payload, Reply, ReplyPayload, Request};

/// Front dispatcher for every mutating request: resolves the target
/// repository, verifies its Treekeeper is ready and not broken,
/// persists the Job row, and forwards the request. The caller gets the
/// Job id immediately; the Treekeeper's outcome lands on the Job row.
pub struct GuidePost {
    store: Arc<dyn Store>,
    handlers: Arc<HandlerMap>,
    readonly: bool,
    input: mpsc::Receiver<Envelope>,
    shutdown: broadcast::Receiver<()>,
    _ack: mpsc::Sender<()>,
}

impl GuidePost {
    /// Spawn the dispatcher task and register its intake in the handler
    /// map under the `guidepost` key.
    pub async fn spawn(
        store: Arc<dyn Store>,
        handlers: Arc<HandlerMap>,
        readonly: bool,
        reaper: &GrimReaper,
    ) -> mpsc::Sender<Envelope> {
        let (tx, rx) = mpsc::channel(64);
        let (shutdown, ack) = reaper.subscribe();
        handlers
            .register(
                GUIDEPOST,
                RegisteredHandler { intake: Intake::new(tx.clone()), keeper_status: None },
            )
            .await;
        let gp = GuidePost { store, handlers, readonly, input: rx, shutdown, _ack: ack };
        tokio::spawn(gp.run());
        tx
    }

    async fn run(mut self) {
        loop {
            tokio::select! {
                _ = self.shutdown.recv() => {
                    self.input.close();
                    while let Some(env) = self.input.recv().await {
                        self.process(env).await;
                    }
                    break;
                }
                maybe = self.input.recv() => {
                    match maybe {
                        Some(env) => self.process(env).await,
                        None => break,
                    }
                }
            }
        }
        info!("guidepost stopped");
    }

    async fn process(&self, env: Envelope) {
        let Envelope { mut request, reply } = env;
        let outcome = self.dispatch(&mut request).await;
        if reply.send(outcome).is_err() {
            warn!(request = %request.id, "guidepost reply receiver dropped");
        }
    }

    async fn dispatch(&self, request: &mut Request) -> Reply {
        if self.readonly {
            return Err(ServiceError::conflict("Readonly instance"));
        }

        let repository = self.resolve_repository(&request.payload).await?;
        self.hydrate(&mut request.payload).await?;

        // the treekeeper must be registered, ready, and not broken;
        // each failure is distinct
        let key = repository_key(&repository.name);
        let handler = self.handlers.lookup(&key).await.ok_or_else(|| {
            ServiceError::unavailable(format!(
                "no treekeeper registered for repository {}",
                repository.name
            ))
        })?;
        let status = handler.keeper_status.as_ref().ok_or_else(|| {
            ServiceError::internal(format!("handler {} has no keeper status", key))
        })?;
        if status.is_broken() {
            return Err(ServiceError::gone(format!(
                "repository {} is broken",
                repository.name
            )));
        }
        if !status.is_ready() {
            return Err(ServiceError::unavailable(format!(
                "repository {} not fully loaded yet",
                repository.name
            )));
        }

        // persist the job, then hand off
        let job_id = JobId::generate();
        request.job_id = Some(job_id);
        let job = JobRow {
            id: job_id,
            status: JobStatus::Queued,
            result: JobResult::Pending,
            job_type: request.payload.job_type().to_string(),
            repository_id: repository.id,
            user_id: request.user_id,
            team_id: request.team_id,
            queued_at: Utc::now(),
            finished_at: None,
            raw_request: serde_json::to_value(&*request)
                .map_err(|e| ServiceError::internal(e.to_string()))?,
            error: None,
        };
        self.store.insert_job(&job).await.map_err(ServiceError::from)?;

        let (keeper_env, keeper_reply) = Envelope::new(request.clone());
        if handler.intake.normal.send(keeper_env).await.is_err() {
            // keeper went away between lookup and send
            let _ = self
                .store
                .apply(&[soma_store::PersistOp::UpdateJob {
                    job_id,
                    status: JobStatus::Failed,
                    result: JobResult::Failure,
                    error: Some("treekeeper unavailable".into()),
                    finished_at: Some(Utc::now()),
                }])
                .await;
            return Err(ServiceError::unavailable(format!(
                "repository {} shut its intake",
                repository.name
            )));
        }

        // drain the keeper's eventual reply so it is never orphaned
        let job_type = request.payload.job_type();
        tokio::spawn(async move {
            match keeper_reply.await {
                Ok(Ok(_)) => debug!(%job_id, job_type, "job processed"),
                Ok(Err(e)) => debug!(%job_id, job_type, error = %e, "job failed"),
                Err(_) => warn!(%job_id, job_type, "keeper dropped the reply"),
            }
        });

        info!(%job_id, job_type, repository = %repository.name, "job queued");
        Ok(ReplyPayload::Accepted { job_id })
    }

    /// Resolve the target repository from whatever identifiers the
    /// payload carries, joining upward through the store when only a
    /// bucket or element id is present.
    async fn resolve_repository(&self, payload: &Payload) -> Result<RepositoryRow, ServiceError> {
        if let Some(repo_id) = payload.repository_id() {
            return self.repository_by_id(repo_id).await;
        }
        let anchor = payload
            .anchor_element()
            .ok_or_else(|| ServiceError::bad_request("request carries no target identifier"))?;
        self.store
            .repository_of_element(anchor)
            .await
            .map_err(ServiceError::from)?
            .ok_or_else(|| ServiceError::not_found(format!("no repository encloses {}", anchor)))
    }

    async fn repository_by_id(&self, id: RepositoryId) -> Result<RepositoryRow, ServiceError> {
        self.store
            .get_repository(id)
            .await
            .map_err(ServiceError::from)?
            .filter(|r| !r.deleted)
            .ok_or_else(|| ServiceError::not_found(format!("repository {}", id)))
    }

    /// Hydrate `assign_node` with the authoritative inventory row;
    /// client-supplied attributes are discarded.
    async fn hydrate(&self, payload: &mut Payload) -> Result<(), ServiceError> {
        if let Payload::AssignNode { node_id, inventory, .. } = payload {
            let row = self
                .store
                .get_node_inventory(*node_id)
                .await
                .map_err(ServiceError::from)?
                .ok_or_else(|| ServiceError::not_found(format!("node {}", node_id)))?;
            if row.deleted || !row.online {
                return Err(ServiceError::conflict(format!(
                    "node {} is not assignable",
                    node_id
                )));
            }
            if row.assigned {
                return Err(ServiceError::conflict(format!(
                    "node {} is already assigned",
                    node_id
                )));
            }
            *inventory = Some(row);
        }
        Ok(())
    }
}
