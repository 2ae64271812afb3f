//! pakt wait: poll package collections until they converge.
//!
//! The core is [`poll_until`]: an immediate first attempt, then fixed-interval
//! retries under a wall-clock timeout, with prompt cancellation. The three
//! `wait_for_*` entry points bind it to a [`PackageStore`] and a predicate.

#![forbid(unsafe_code)]

use std::future::Future;
use std::time::{Duration, Instant};

use metrics::counter;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use pakt_core::{ConditionKind, DesiredState, PackageView, WaitError};
use pakt_kube::{PackageKind, PackageStore};

/// What a predicate concluded about one fetched collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Satisfied,
    /// Keep polling; the reason is a human-readable diagnostic line.
    NotYet(String),
}

/// Destination for per-attempt diagnostic lines. Injected so the poller can
/// be tested without a process-wide logger; output is operator-facing text,
/// not a machine contract.
pub trait DiagSink: Send + Sync {
    fn line(&self, msg: &str);
}

/// Default sink: routes diagnostics through `tracing` at info level.
pub struct TracingSink;

impl DiagSink for TracingSink {
    fn line(&self, msg: &str) {
        info!(target: "pakt_wait", "{}", msg);
    }
}

/// Poll `fetch` at `interval` spacing until `predicate` is satisfied, the
/// wall-clock `timeout` elapses, the fetch or predicate fails, or `cancel`
/// fires. The first attempt runs immediately; fetch/predicate errors are
/// terminal, never retried. Observed items are reported to `sink` only
/// after a successful fetch.
pub async fn poll_until<T, F, Fut, P>(
    cancel: &CancellationToken,
    interval: Duration,
    timeout: Duration,
    mut fetch: F,
    mut predicate: P,
    sink: &dyn DiagSink,
) -> Result<(), WaitError>
where
    T: std::fmt::Debug,
    F: FnMut() -> Fut,
    Fut: Future<Output = anyhow::Result<Vec<T>>>,
    P: FnMut(&[T]) -> anyhow::Result<Verdict>,
{
    let start = Instant::now();
    let mut attempts: u32 = 0;
    loop {
        if cancel.is_cancelled() {
            counter!("pakt_wait_cancelled", 1u64);
            return Err(WaitError::Cancelled);
        }
        attempts += 1;
        let items = match fetch().await {
            Ok(items) => items,
            Err(e) => {
                counter!("pakt_wait_transport_errors", 1u64);
                return Err(WaitError::Transport(e));
            }
        };
        counter!("pakt_wait_attempts", 1u64);
        sink.line(&format!("attempt {}: observed {} item(s): {:?}", attempts, items.len(), items));
        match predicate(&items) {
            Ok(Verdict::Satisfied) => {
                counter!("pakt_wait_satisfied", 1u64);
                debug!(attempts, elapsed_ms = %start.elapsed().as_millis(), "condition satisfied");
                return Ok(());
            }
            Ok(Verdict::NotYet(reason)) => sink.line(&reason),
            Err(e) => {
                counter!("pakt_wait_transport_errors", 1u64);
                return Err(WaitError::Transport(e));
            }
        }
        let elapsed = start.elapsed();
        if elapsed >= timeout {
            counter!("pakt_wait_timeouts", 1u64);
            return Err(WaitError::TimedOut { timeout, elapsed, attempts });
        }
        tokio::select! {
            _ = cancel.cancelled() => {
                counter!("pakt_wait_cancelled", 1u64);
                return Err(WaitError::Cancelled);
            }
            _ = tokio::time::sleep(interval) => {}
        }
    }
}

/// Satisfied iff exactly one provider exists and it is both Installed and
/// Healthy.
pub fn all_installed_and_healthy<T: PackageView>(items: &[T]) -> Verdict {
    if items.len() != 1 {
        return Verdict::NotYet(format!("expected exactly one provider, found {}", items.len()));
    }
    for p in items {
        let installed = p.condition(ConditionKind::Installed);
        if !installed.is_true() {
            return Verdict::NotYet(format!("provider {} is not installed ({})", p.name(), installed));
        }
        let healthy = p.condition(ConditionKind::Healthy);
        if !healthy.is_true() {
            return Verdict::NotYet(format!("provider {} is not healthy ({})", p.name(), healthy));
        }
    }
    Verdict::Satisfied
}

/// Satisfied iff exactly two revisions exist, the one carrying
/// `new_package` is Active, the one carrying `old_package` is Inactive,
/// and every revision is Healthy. Revisions matching neither identifier
/// skip the activation check but are still health-checked.
pub fn revision_transitioned<T: PackageView>(items: &[T], new_package: &str, old_package: &str) -> Verdict {
    if items.len() != 2 {
        return Verdict::NotYet(format!("expected two provider revisions, found {}", items.len()));
    }
    for r in items {
        if r.package() == Some(new_package) && r.desired_state() != Some(DesiredState::Active) {
            return Verdict::NotYet(format!("revision {} for the new package is not active", r.name()));
        }
        if r.package() == Some(old_package) && r.desired_state() != Some(DesiredState::Inactive) {
            return Verdict::NotYet(format!("revision {} for the old package has not been discarded", r.name()));
        }
        let healthy = r.condition(ConditionKind::Healthy);
        if !healthy.is_true() {
            return Verdict::NotYet(format!("revision {} is not healthy ({})", r.name(), healthy));
        }
    }
    Verdict::Satisfied
}

/// Satisfied iff the collection is empty.
pub fn all_deleted<T: PackageView>(items: &[T]) -> Verdict {
    if items.is_empty() {
        Verdict::Satisfied
    } else {
        Verdict::NotYet(format!("{} provider(s) still present", items.len()))
    }
}

/// Wait until exactly one provider is installed and healthy.
pub async fn wait_for_all_providers_installed(
    cancel: &CancellationToken,
    store: &dyn PackageStore,
    interval: Duration,
    timeout: Duration,
) -> Result<(), WaitError> {
    wait_for_all_providers_installed_with_sink(cancel, store, interval, timeout, &TracingSink).await
}

pub async fn wait_for_all_providers_installed_with_sink(
    cancel: &CancellationToken,
    store: &dyn PackageStore,
    interval: Duration,
    timeout: Duration,
    sink: &dyn DiagSink,
) -> Result<(), WaitError> {
    info!(interval_ms = %interval.as_millis(), timeout_ms = %timeout.as_millis(), "waiting for provider install");
    poll_until(
        cancel,
        interval,
        timeout,
        move || store.list(PackageKind::Provider),
        |items| Ok(all_installed_and_healthy(items)),
        sink,
    )
    .await
}

/// Wait until the revision carrying `new_package` is Active, the one
/// carrying `old_package` is Inactive, and both are healthy. Equal
/// identifiers are rejected up front: the activation and discard checks
/// would contradict each other on a single revision.
pub async fn wait_for_revision_transition(
    cancel: &CancellationToken,
    store: &dyn PackageStore,
    new_package: &str,
    old_package: &str,
    interval: Duration,
    timeout: Duration,
) -> Result<(), WaitError> {
    wait_for_revision_transition_with_sink(cancel, store, new_package, old_package, interval, timeout, &TracingSink)
        .await
}

pub async fn wait_for_revision_transition_with_sink(
    cancel: &CancellationToken,
    store: &dyn PackageStore,
    new_package: &str,
    old_package: &str,
    interval: Duration,
    timeout: Duration,
    sink: &dyn DiagSink,
) -> Result<(), WaitError> {
    if new_package == old_package {
        return Err(WaitError::InvalidTransition(format!(
            "new and old package identifiers must differ (both {:?})",
            new_package
        )));
    }
    info!(new = %new_package, old = %old_package, interval_ms = %interval.as_millis(), timeout_ms = %timeout.as_millis(), "waiting for revision transition");
    poll_until(
        cancel,
        interval,
        timeout,
        move || store.list(PackageKind::ProviderRevision),
        |items| Ok(revision_transitioned(items, new_package, old_package)),
        sink,
    )
    .await
}

/// Wait until no providers remain.
pub async fn wait_for_all_providers_deleted(
    cancel: &CancellationToken,
    store: &dyn PackageStore,
    interval: Duration,
    timeout: Duration,
) -> Result<(), WaitError> {
    wait_for_all_providers_deleted_with_sink(cancel, store, interval, timeout, &TracingSink).await
}

pub async fn wait_for_all_providers_deleted_with_sink(
    cancel: &CancellationToken,
    store: &dyn PackageStore,
    interval: Duration,
    timeout: Duration,
    sink: &dyn DiagSink,
) -> Result<(), WaitError> {
    info!(interval_ms = %interval.as_millis(), timeout_ms = %timeout.as_millis(), "waiting for provider deletion");
    poll_until(
        cancel,
        interval,
        timeout,
        move || store.list(PackageKind::Provider),
        |items| Ok(all_deleted(items)),
        sink,
    )
    .await
}
