use std::sync::Arc;

use soma_domain::{CheckInstanceId, InstanceState};
use soma_store::{InstanceRow, Store};
use tracing::{debug, info, warn};

use crate::error::KeeperError;
use crate::eye::EyeNotifier;

/// The workflow state machine over check instances.
///
/// Three inputs drive it: the Treekeeper's computation output, external
/// rollout/deprovision acknowledgements, and operator retry or forced
/// set requests.
pub struct WorkflowEngine {
    store: Arc<dyn Store>,
    notifier: Option<EyeNotifier>,
}

impl WorkflowEngine {
    pub fn new(store: Arc<dyn Store>, notifier: Option<EyeNotifier>) -> Self {
        WorkflowEngine { store, notifier }
    }

    async fn load(&self, id: CheckInstanceId) -> Result<InstanceRow, KeeperError> {
        self.store
            .get_instance(id)
            .await?
            .ok_or_else(|| KeeperError::Internal(format!("instance {} vanished", id)))
    }

    async fn transition(
        &self,
        row: &InstanceRow,
        to: InstanceState,
    ) -> Result<(), KeeperError> {
        debug!(instance = %row.id, from = %row.state, %to, "instance transition");
        self.store.update_instance_state(row.id, to).await?;
        Ok(())
    }

    fn expect_state(
        row: &InstanceRow,
        allowed: &[InstanceState],
        to: InstanceState,
    ) -> Result<(), KeeperError> {
        if allowed.contains(&row.state) {
            Ok(())
        } else {
            Err(KeeperError::InvalidTransition { instance: row.id, from: row.state, to })
        }
    }

    // ── Treekeeper input ──────────────────────────────────────────────────────

    /// Advance a freshly computed instance:
    /// `awaiting_computation → computed → awaiting_rollout`, then begin
    /// the rollout. Blocked instances stay put until their predecessor
    /// reaches a terminal state.
    pub async fn instance_computed(&self, id: CheckInstanceId) -> Result<(), KeeperError> {
        let row = self.load(id).await?;
        if row.state == InstanceState::Blocked {
            return Ok(());
        }
        Self::expect_state(&row, &[InstanceState::AwaitingComputation], InstanceState::Computed)?;
        self.transition(&row, InstanceState::Computed).await?;
        self.transition(&row, InstanceState::AwaitingRollout).await?;
        let mut row = row;
        row.state = InstanceState::AwaitingRollout;
        self.begin_rollout(&row).await
    }

    async fn begin_rollout(&self, row: &InstanceRow) -> Result<(), KeeperError> {
        Self::expect_state(row, &[InstanceState::AwaitingRollout], InstanceState::RolloutInProgress)?;
        self.transition(row, InstanceState::RolloutInProgress).await?;
        if let Some(notifier) = &self.notifier {
            if let Err(e) = notifier.notify(row.id).await {
                warn!(instance = %row.id, error = %e, "rollout notification failed");
                self.store
                    .update_instance_state(row.id, InstanceState::RolloutFailed)
                    .await?;
            }
        }
        Ok(())
    }

    // ── External acknowledgements ─────────────────────────────────────────────

    /// Success/failure acknowledgement for an in-flight rollout or
    /// deprovision.
    pub async fn acknowledge(
        &self,
        id: CheckInstanceId,
        success: bool,
    ) -> Result<InstanceState, KeeperError> {
        let row = self.load(id).await?;
        let next = match (row.state, success) {
            (InstanceState::RolloutInProgress, true) => InstanceState::Active,
            (InstanceState::RolloutInProgress, false) => InstanceState::RolloutFailed,
            (InstanceState::DeprovisionInProgress, true) => InstanceState::Deprovisioned,
            (InstanceState::DeprovisionInProgress, false) => InstanceState::DeprovisionFailed,
            (from, _) => {
                return Err(KeeperError::InvalidTransition {
                    instance: id,
                    from,
                    to: InstanceState::Active,
                })
            }
        };
        self.transition(&row, next).await?;
        if next == InstanceState::Deprovisioned {
            self.promote_blocked(&row).await?;
        }
        Ok(next)
    }

    /// Once the previous version is gone, the oldest blocked successor
    /// for the same `(check_id, constraint_hash)` resumes.
    async fn promote_blocked(&self, finished: &InstanceRow) -> Result<(), KeeperError> {
        let siblings = self
            .store
            .list_instances_for_check(finished.check_id)
            .await?;
        let any_live = siblings.iter().any(|s| {
            s.constraint_hash == finished.constraint_hash
                && s.state != InstanceState::Blocked
                && !s.state.is_terminal()
        });
        if any_live {
            return Ok(());
        }
        let next = siblings
            .iter()
            .filter(|s| {
                s.constraint_hash == finished.constraint_hash
                    && s.state == InstanceState::Blocked
            })
            .min_by_key(|s| s.version);
        if let Some(blocked) = next {
            info!(instance = %blocked.id, version = blocked.version, "promoting blocked version");
            self.transition(blocked, InstanceState::AwaitingRollout).await?;
            let mut row = blocked.clone();
            row.state = InstanceState::AwaitingRollout;
            self.begin_rollout(&row).await?;
        }
        Ok(())
    }

    // ── Deprovisioning ────────────────────────────────────────────────────────

    /// Take an instance out of service. Instances that never reached
    /// the monitoring system are retired directly; deployed ones go
    /// through the deprovision leg.
    pub async fn start_deprovision(&self, id: CheckInstanceId) -> Result<(), KeeperError> {
        let row = self.load(id).await?;
        match row.state {
            InstanceState::AwaitingComputation
            | InstanceState::Computed
            | InstanceState::AwaitingRollout
            | InstanceState::Blocked => {
                // never deployed, nothing to tear down
                self.transition(&row, InstanceState::Deprovisioned).await?;
                self.promote_blocked(&row).await
            }
            InstanceState::Active
            | InstanceState::RolloutInProgress
            | InstanceState::RolloutFailed => {
                self.transition(&row, InstanceState::AwaitingDeprovision).await?;
                self.store
                    .update_instance_state(row.id, InstanceState::DeprovisionInProgress)
                    .await?;
                if let Some(notifier) = &self.notifier {
                    if let Err(e) = notifier.notify(row.id).await {
                        warn!(instance = %row.id, error = %e, "deprovision notification failed");
                        self.store
                            .update_instance_state(row.id, InstanceState::DeprovisionFailed)
                            .await?;
                    }
                }
                Ok(())
            }
            InstanceState::AwaitingDeprovision | InstanceState::DeprovisionInProgress => Ok(()),
            from @ (InstanceState::Deprovisioned | InstanceState::DeprovisionFailed) => {
                Err(KeeperError::InvalidTransition {
                    instance: id,
                    from,
                    to: InstanceState::AwaitingDeprovision,
                })
            }
        }
    }

    // ── Operator inputs ───────────────────────────────────────────────────────

    /// Retry a failed rollout or deprovision.
    pub async fn retry(&self, id: CheckInstanceId) -> Result<(), KeeperError> {
        let row = self.load(id).await?;
        match row.state {
            InstanceState::RolloutFailed => {
                self.transition(&row, InstanceState::AwaitingRollout).await?;
                let mut row = row;
                row.state = InstanceState::AwaitingRollout;
                self.begin_rollout(&row).await
            }
            InstanceState::DeprovisionFailed => {
                self.transition(&row, InstanceState::AwaitingDeprovision).await?;
                self.store
                    .update_instance_state(row.id, InstanceState::DeprovisionInProgress)
                    .await?;
                if let Some(notifier) = &self.notifier {
                    if let Err(e) = notifier.notify(row.id).await {
                        self.store
                            .update_instance_state(row.id, InstanceState::DeprovisionFailed)
                            .await?;
                        return Err(e);
                    }
                }
                Ok(())
            }
            from => Err(KeeperError::InvalidTransition {
                instance: id,
                from,
                to: InstanceState::AwaitingRollout,
            }),
        }
    }

    /// Forced state set; operator override without validation.
    pub async fn force_set(
        &self,
        id: CheckInstanceId,
        state: InstanceState,
    ) -> Result<(), KeeperError> {
        let row = self.load(id).await?;
        warn!(instance = %id, from = %row.state, to = %state, "forced workflow state set");
        self.store.update_instance_state(id, state).await?;
        Ok(())
    }
}
