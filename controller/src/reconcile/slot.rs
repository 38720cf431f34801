use super::retry::{RetryConfig, RetryDecision, calculate_retry_delay};
use crate::error::NodeCommandError;
use crate::node::{self, NodeCommander};
use parking_lot::Mutex;
use policy::{Decision, GrantId, NodeCommand};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone)]
pub(crate) struct DeliverySettings {
    pub retry: RetryConfig,
    pub command_timeout: Duration,
}

/// Ledger revisions a decision was evaluated from: the grant's usage entry and
/// the owner's account entry, if the owner has one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct StateRevision {
    pub usage: u64,
    pub account: Option<u64>,
}

impl StateRevision {
    /// Whether `self` saw strictly less ledger state than `other`. Revisions
    /// taken with and without an account are not comparable.
    pub fn precedes(&self, other: &StateRevision) -> bool {
        let account_older = match (self.account, other.account) {
            (Some(mine), Some(theirs)) => mine <= theirs,
            (None, None) => true,
            _ => false,
        };
        self != other && self.usage <= other.usage && account_older
    }

    /// Componentwise maximum; an account revision on either side is kept.
    pub fn max(self, other: StateRevision) -> StateRevision {
        let account = match (self.account, other.account) {
            (Some(mine), Some(theirs)) => Some(mine.max(theirs)),
            (mine, theirs) => mine.or(theirs),
        };
        StateRevision {
            usage: self.usage.max(other.usage),
            account,
        }
    }
}

/// One published decision and the command that enforces it. Generations grow
/// by one per publish and identify which dispatch an acknowledgement belongs to.
/// Dispatches without a revision, such as a revoke, are never treated as stale
/// and never make a later dispatch stale.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Dispatch {
    pub generation: u64,
    pub decision: Decision,
    pub command: NodeCommand,
    pub revision: Option<StateRevision>,
}

#[derive(Debug, Default)]
struct SlotState {
    applied: Mutex<Option<Dispatch>>,
    failed: AtomicBool,
}

/// Latest-wins mailbox for one grant's node commands.
///
/// A single worker task per slot delivers commands in publish order. Publishing
/// while a delivery is in flight supersedes it: the in-flight call is dropped
/// and only the newest command is sent. Dropping the slot lets the worker finish
/// the last published command and exit.
pub(crate) struct DeliverySlot {
    tx: watch::Sender<Option<Dispatch>>,
    state: Arc<SlotState>,
}

impl DeliverySlot {
    pub fn spawn(
        grant_id: GrantId,
        commander: Arc<dyn NodeCommander>,
        settings: DeliverySettings,
    ) -> Self {
        let (tx, rx) = watch::channel(None);
        let state = Arc::new(SlotState::default());
        tokio::spawn(deliver_loop(grant_id, rx, state.clone(), commander, settings));
        Self { tx, state }
    }

    /// Publishes a command unless it repeats the latest one or was evaluated
    /// from older ledger state than the latest one. A repeat is still published
    /// after the previous delivery gave up.
    pub fn publish(
        &self,
        decision: Decision,
        command: NodeCommand,
        revision: Option<StateRevision>,
    ) -> bool {
        let retry_failed = self.state.failed.load(Ordering::Acquire);
        let published = self.tx.send_if_modified(|latest| {
            if let (Some(incoming), Some(current)) = (revision, latest.as_ref().and_then(|d| d.revision))
                && incoming.precedes(&current)
            {
                debug!(?incoming, ?current, "Stale decision not published");
                return false;
            }
            if let Some(current) = latest.as_mut()
                && current.decision == decision
                && current.command == command
                && !retry_failed
            {
                // Unchanged: remember the newer revision without waking the worker.
                if let Some(incoming) = revision {
                    current.revision = Some(current.revision.map_or(incoming, |r| r.max(incoming)));
                }
                return false;
            }
            let generation = latest.as_ref().map_or(1, |d| d.generation + 1);
            *latest = Some(Dispatch {
                generation,
                decision,
                command,
                revision,
            });
            true
        });
        if published {
            self.state.failed.store(false, Ordering::Release);
        }
        published
    }

    pub fn latest(&self) -> Option<Dispatch> {
        self.tx.borrow().clone()
    }

    pub fn applied(&self) -> Option<Dispatch> {
        self.state.applied.lock().clone()
    }

    pub fn delivery_failed(&self) -> bool {
        self.state.failed.load(Ordering::Acquire)
    }
}

async fn deliver_loop(
    grant_id: GrantId,
    mut rx: watch::Receiver<Option<Dispatch>>,
    state: Arc<SlotState>,
    commander: Arc<dyn NodeCommander>,
    settings: DeliverySettings,
) {
    // `changed` still yields a value published just before the sender dropped.
    while rx.changed().await.is_ok() {
        deliver_latest(grant_id, &mut rx, &state, commander.as_ref(), &settings).await;
    }
    debug!(grant_id, "Delivery worker stopped");
}

async fn deliver_latest(
    grant_id: GrantId,
    rx: &mut watch::Receiver<Option<Dispatch>>,
    state: &SlotState,
    commander: &dyn NodeCommander,
    settings: &DeliverySettings,
) {
    'latest: loop {
        let Some(dispatch) = rx.borrow_and_update().clone() else {
            return;
        };
        let mut attempt = 0;

        loop {
            let outcome = tokio::select! {
                outcome = tokio::time::timeout(
                    settings.command_timeout,
                    node::deliver(commander, &dispatch.command),
                ) => outcome,
                Ok(()) = rx.changed() => {
                    debug!(grant_id, generation = dispatch.generation, "Command superseded in flight");
                    continue 'latest;
                }
            };

            let failure = match outcome {
                Ok(Ok(())) => {
                    acknowledge(grant_id, rx, state, dispatch);
                    return;
                }
                Ok(Err(e)) => e,
                Err(_) => NodeCommandError::Transient(format!(
                    "no acknowledgement within {:?}",
                    settings.command_timeout
                )),
            };

            if !failure.is_transient() {
                error!(grant_id, command = %dispatch.command, error = %failure, "Node rejected command");
                state.failed.store(true, Ordering::Release);
                return;
            }

            match calculate_retry_delay(attempt, &settings.retry) {
                RetryDecision::Retry(delay_ms) => {
                    warn!(
                        grant_id,
                        attempt,
                        delay_ms,
                        error = %failure,
                        "Node command failed, retrying"
                    );
                    attempt += 1;
                    tokio::select! {
                        _ = tokio::time::sleep(Duration::from_millis(delay_ms)) => {}
                        Ok(()) = rx.changed() => continue 'latest,
                    }
                }
                RetryDecision::GiveUp => {
                    error!(
                        grant_id,
                        command = %dispatch.command,
                        error = %failure,
                        "Giving up on node command, will resend on next reconcile"
                    );
                    state.failed.store(true, Ordering::Release);
                    return;
                }
            }
        }
    }
}

/// Records an acknowledgement unless a newer command was published meanwhile.
fn acknowledge(
    grant_id: GrantId,
    rx: &watch::Receiver<Option<Dispatch>>,
    state: &SlotState,
    dispatch: Dispatch,
) {
    let latest = rx.borrow().as_ref().map(|d| d.generation);
    if latest != Some(dispatch.generation) {
        debug!(
            grant_id,
            generation = dispatch.generation,
            "Acknowledgement for superseded command dropped"
        );
        return;
    }
    info!(grant_id, decision = %dispatch.decision, command = %dispatch.command, "Node acknowledged command");
    *state.applied.lock() = Some(dispatch);
}
