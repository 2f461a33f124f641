//! C2: the check scheduler.

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use vigil_registry::Registry;
use vigil_runner::{CheckInvocation, WorkerPool};
use vigil_types::{ObjectKey, Timestamp};

use crate::state_machine;

/// Asked once per due service before a check is dispatched (§4.2,
/// "Authority: before dispatching, the scheduler asks C7 ..."). Injected
/// rather than a direct dependency on `vigil-cluster` to keep C2 and C7
/// decoupled — the cluster router depends on the scheduler's types, not
/// the other way round.
pub trait AuthorityOracle: Send + Sync {
    fn is_authoritative(&self, key: &ObjectKey) -> bool;
}

/// An oracle that always claims authority — single-node operation, or
/// tests that don't care about cluster delegation.
pub struct AlwaysAuthoritative;

impl AuthorityOracle for AlwaysAuthoritative {
    fn is_authoritative(&self, _key: &ObjectKey) -> bool {
        true
    }
}

/// Drives C1/C3 for every service with active checks enabled.
pub struct Scheduler {
    registry: Arc<Registry>,
    pool: Arc<WorkerPool>,
    authority: Arc<dyn AuthorityOracle>,
    default_timeout: Duration,
    tick_interval: Duration,
    /// Serializes scan ticks; a tick that's still dispatching when the
    /// next timer fires is allowed to finish rather than overlap.
    tick_lock: Mutex<()>,
}

impl Scheduler {
    pub fn new(
        registry: Arc<Registry>,
        pool: Arc<WorkerPool>,
        authority: Arc<dyn AuthorityOracle>,
        default_timeout: Duration,
    ) -> Self {
        Self {
            registry,
            pool,
            authority,
            default_timeout,
            tick_interval: Duration::from_millis(200),
            tick_lock: Mutex::new(()),
        }
    }

    /// Runs the scheduler loop until `shutdown` is cancelled.
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        let mut ticker = tokio::time::interval(self.tick_interval);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    debug!("scheduler shutting down");
                    return;
                }
                _ = ticker.tick() => {
                    self.tick().await;
                }
            }
        }
    }

    /// Scans every service once, dispatching the ones whose `next_check`
    /// is due and a worker slot is free.
    async fn tick(&self) {
        let _guard = self.tick_lock.lock().await;
        let now = Timestamp::now();

        for handle in self.registry.iter_services() {
            let (key, due, enabled, authoritative, invocation);
            {
                let service = handle.read().await;
                key = service.key();
                due = service.force_next_check || service.next_check.as_secs() <= now.as_secs();
                enabled = service.enable_active_checks;
                authoritative = self.authority.is_authoritative(&key);
                invocation = service.check_command.clone();
            }
            let timeout = self.default_timeout;

            if !enabled || !due {
                continue;
            }

            if !authoritative {
                // Not our check to run; just avoid re-evaluating this
                // service on every tick until the authoritative peer's
                // CheckResult message updates it for real.
                let bump = {
                    let service = handle.read().await;
                    Timestamp::now() + service.check_interval
                };
                if let Err(err) = self.registry.set_next_check(&key, bump, None).await {
                    warn!(%key, %err, "failed to bump next_check for non-authoritative service");
                }
                continue;
            }

            if self.pool.available_permits() == 0 {
                // C1's queue is full: pause, try again next tick.
                break;
            }

            self.dispatch(key, invocation, timeout);
        }
    }

    fn dispatch(&self, key: ObjectKey, argv: Vec<String>, timeout: Duration) {
        let registry = Arc::clone(&self.registry);
        let handle_invocation = CheckInvocation::new(argv, timeout);
        let join = self.pool.submit(handle_invocation);

        tokio::spawn(async move {
            let outcome = match join.await {
                Ok(outcome) => outcome,
                Err(_join_err) => return, // worker task panicked; next tick retries
            };

            let result = vigil_types::CheckResult::from_plugin_output(
                outcome.execution_start,
                outcome.execution_end,
                outcome.execution_start,
                outcome.execution_end,
                outcome.exit_status,
                &outcome.output,
            );

            let Some(service_handle) = registry.get_service(&key) else {
                return; // removed from config between dispatch and completion
            };

            let (old_state, old_state_type, current_attempt, max_check_attempts, check_interval, retry_interval, never_scheduled) = {
                let service = service_handle.read().await;
                (
                    service.state,
                    service.state_type,
                    service.current_attempt,
                    service.max_check_attempts,
                    service.check_interval,
                    service.retry_interval,
                    service.last_check_result.is_none(),
                )
            };

            let transition = state_machine::transition(
                old_state,
                old_state_type,
                current_attempt,
                max_check_attempts,
                &result,
            );

            if let Err(err) = registry
                .set_check_result(
                    &key,
                    result,
                    transition.state,
                    transition.state_type,
                    transition.current_attempt,
                    None,
                )
                .await
            {
                warn!(%key, %err, "failed to apply check result");
            }

            let next_check = next_check_after(
                Timestamp::now(),
                transition.state_type,
                check_interval,
                retry_interval,
                never_scheduled,
            );
            if let Err(err) = registry.set_next_check(&key, next_check, None).await {
                warn!(%key, %err, "failed to schedule next check");
            }
            if let Err(err) = registry.set_force_next_check(&key, false, None).await {
                warn!(%key, %err, "failed to clear force_next_check");
            }
        });
    }
}

/// `next_check = now + (retry_interval if Soft else check_interval)`,
/// except the very first scheduling of a service, which is randomized
/// within `[now, now + check_interval)` to spread restart load (§4.2).
fn next_check_after(
    now: Timestamp,
    state_type: vigil_types::StateType,
    check_interval: f64,
    retry_interval: f64,
    never_scheduled: bool,
) -> Timestamp {
    if never_scheduled {
        let jitter = rand::thread_rng().gen_range(0.0..check_interval.max(f64::EPSILON));
        return now + jitter;
    }
    let delay = if state_type == vigil_types::StateType::Soft {
        retry_interval
    } else {
        check_interval
    };
    now + delay
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_schedule_is_jittered_within_interval() {
        let now = Timestamp::from_secs(1000.0);
        let scheduled = next_check_after(now, vigil_types::StateType::Hard, 60.0, 10.0, true);
        assert!(scheduled.as_secs() >= now.as_secs());
        assert!(scheduled.as_secs() < now.as_secs() + 60.0);
    }

    #[test]
    fn soft_state_uses_retry_interval() {
        let now = Timestamp::from_secs(1000.0);
        let scheduled = next_check_after(now, vigil_types::StateType::Soft, 60.0, 10.0, false);
        assert_eq!(scheduled.as_secs(), 1010.0);
    }

    #[test]
    fn hard_state_uses_check_interval() {
        let now = Timestamp::from_secs(1000.0);
        let scheduled = next_check_after(now, vigil_types::StateType::Hard, 60.0, 10.0, false);
        assert_eq!(scheduled.as_secs(), 1060.0);
    }
}
