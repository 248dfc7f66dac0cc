//! Plan execution.
//!
//! The [`Executor`] walks a [`Plan`] with a bounded worker pool. An entry is
//! admitted once every planned dependency is available; each admitted entry
//! runs its own lifecycle (see [`entry`]) and reports a terminal state.
//!
//! Failure handling depends on the [`FailurePolicy`]:
//! - stop-on-first-failure: nothing new is admitted after a failure, running
//!   entries finish, and everything not started is skipped
//! - best-effort: only the transitive dependents of a failure are skipped

pub mod actions;
mod entry;
pub mod env;
pub mod prefix;
pub mod types;

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::plan::{Plan, PlanEntry, PlanReason};
use crate::platform::PlatformDescriptor;
use crate::receipt::ReceiptStore;

use entry::{EntryJob, Shared, run_entry};

pub use actions::{Invocation, InvocationOutput, Invoker, ProcessInvoker};
pub use env::{EntryScope, EnvSnapshot};
pub use prefix::PrefixTransaction;
pub use types::{EntryReport, EntryState, ExecuteConfig, ExecuteError, ExecutionReport, FailurePolicy, SkipReason};

/// Runs plans against an [`Invoker`].
pub struct Executor<I: Invoker = ProcessInvoker> {
  config: ExecuteConfig,
  invoker: Arc<I>,
  receipts: Option<ReceiptStore>,
}

enum Readiness {
  Ready,
  Waiting,
  /// A dependency will never be available; carries the failed package.
  Blocked(String),
}

impl<I: Invoker> Executor<I> {
  pub fn new(config: ExecuteConfig, invoker: I) -> Self {
    Self {
      config,
      invoker: Arc::new(invoker),
      receipts: None,
    }
  }

  /// Record a receipt for every entry that reaches `Done`.
  pub fn with_receipts(mut self, store: ReceiptStore) -> Self {
    self.receipts = Some(store);
    self
  }

  pub fn config(&self) -> &ExecuteConfig {
    &self.config
  }

  pub fn invoker(&self) -> &I {
    &self.invoker
  }

  /// Execute every entry of `plan` for `platform`.
  ///
  /// Never fails as a whole: per-entry errors are captured in the report,
  /// which lists every entry in plan order.
  pub async fn execute(&self, plan: &Plan, platform: &PlatformDescriptor) -> ExecutionReport {
    info!(
      entries = plan.len(),
      parallelism = self.config.parallelism,
      policy = %self.config.policy,
      "starting plan execution"
    );

    let shared = Arc::new(Shared {
      config: self.config.clone(),
      invoker: self.invoker.clone(),
      receipts: self.receipts.clone(),
      platform: *platform,
      halted: AtomicBool::new(false),
    });
    let semaphore = Arc::new(Semaphore::new(self.config.parallelism.max(1)));
    let versions = self.dependency_versions(plan);

    let mut reports: HashMap<String, EntryReport> = HashMap::new();
    let mut running: HashSet<String> = HashSet::new();
    let mut join_set = JoinSet::new();

    loop {
      if !shared.halted.load(Ordering::SeqCst) {
        for entry in plan.entries() {
          let name = entry.name();
          if running.contains(name) || reports.contains_key(name) {
            continue;
          }

          match readiness(&shared, entry, &reports) {
            Readiness::Waiting => {}
            Readiness::Blocked(failed) => {
              warn!(package = %name, dependency = %failed, "skipping entry, dependency failed");
              reports.insert(
                name.to_string(),
                EntryReport::skipped(name, SkipReason::DependencyFailed(failed)),
              );
            }
            Readiness::Ready => {
              debug!(package = %name, "admitting entry");
              running.insert(name.to_string());
              let job = EntryJob {
                recipe: entry.recipe.clone(),
                dependencies: entry.dependencies.clone(),
                dependency_versions: versions.clone(),
                on_request: entry.reason == PlanReason::Target,
              };
              join_set.spawn(spawn_entry(name.to_string(), job, shared.clone(), semaphore.clone()));
            }
          }
        }
      }

      let Some(joined) = join_set.join_next().await else {
        break;
      };

      let (name, report) = match joined {
        Ok(result) => result,
        Err(e) => {
          error!(error = %e, "entry worker failed");
          continue;
        }
      };

      running.remove(&name);
      reports.insert(name, report);
    }

    // Whatever was never admitted.
    for entry in plan.entries() {
      let name = entry.name();
      if reports.contains_key(name) {
        continue;
      }
      let reason = match readiness(&shared, entry, &reports) {
        Readiness::Blocked(failed) => SkipReason::DependencyFailed(failed),
        _ => SkipReason::Halted,
      };
      warn!(package = %name, reason = %reason, "entry not started");
      reports.insert(name.to_string(), EntryReport::skipped(name, reason));
    }

    let report = ExecutionReport {
      entries: plan
        .entries()
        .iter()
        .filter_map(|e| reports.remove(e.name()))
        .collect(),
    };

    info!(
      done = report.count(EntryState::Done),
      failed = report.count(EntryState::Failed),
      skipped = report.count(EntryState::Skipped),
      "plan execution complete"
    );

    report
  }

  /// Versions of everything an entry may depend on: planned recipes, then
  /// already-installed packages from the receipt store.
  fn dependency_versions(&self, plan: &Plan) -> BTreeMap<String, String> {
    let mut versions: BTreeMap<String, String> = plan
      .entries()
      .iter()
      .map(|e| (e.name().to_string(), e.recipe.version.clone()))
      .collect();

    if let Some(store) = &self.receipts {
      for name in plan.satisfied() {
        match store.load(name) {
          Ok(Some(receipt)) => {
            versions.insert(name.clone(), receipt.version);
          }
          Ok(None) => {}
          Err(e) => warn!(package = %name, error = %e, "cannot read receipt"),
        }
      }
    }

    versions
  }
}

fn readiness<I: Invoker>(shared: &Shared<I>, entry: &PlanEntry, reports: &HashMap<String, EntryReport>) -> Readiness {
  let mut waiting = false;
  for dep in &entry.depends_on {
    match reports.get(dep) {
      None => waiting = true,
      Some(report) if shared.is_available(report) => {}
      Some(report) => {
        let failed = match &report.skip_reason {
          Some(SkipReason::DependencyFailed(root)) => root.clone(),
          _ => report.name.clone(),
        };
        return Readiness::Blocked(failed);
      }
    }
  }
  if waiting { Readiness::Waiting } else { Readiness::Ready }
}

impl Executor<ProcessInvoker> {
  /// An executor that spawns real processes.
  pub fn with_processes(config: ExecuteConfig) -> Self {
    Self::new(config, ProcessInvoker)
  }
}

/// Wait for a worker slot, then run the entry on its own task so a panic is
/// reported against the entry instead of tearing down the pool.
async fn spawn_entry<I: Invoker>(
  name: String,
  job: EntryJob,
  shared: Arc<Shared<I>>,
  semaphore: Arc<Semaphore>,
) -> (String, EntryReport) {
  let Ok(_permit) = semaphore.acquire_owned().await else {
    return (name.clone(), EntryReport::skipped(&name, SkipReason::Halted));
  };

  match tokio::spawn(run_entry(job, shared.clone())).await {
    Ok(report) => (name, report),
    Err(e) => {
      error!(package = %name, error = %e, "entry task panicked");
      let report = EntryReport::failed(&name, ExecuteError::Panicked(e.to_string()));
      shared.observe(&report);
      (name, report)
    }
  }
}

/// Execute `plan` with real processes, recording receipts in `receipts`.
pub async fn execute_plan(
  plan: &Plan,
  platform: &PlatformDescriptor,
  config: ExecuteConfig,
  receipts: Option<ReceiptStore>,
) -> ExecutionReport {
  let mut executor = Executor::with_processes(config);
  if let Some(store) = receipts {
    executor = executor.with_receipts(store);
  }
  executor.execute(plan, platform).await
}
