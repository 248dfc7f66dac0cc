//! The lifecycle of a single plan entry.
//!
//! `Pending -> Preparing -> Building -> Installing -> Testing -> Done`, with
//! `Failed` reachable from every non-terminal state. The entry's scope and
//! environment snapshot live only as long as [`run_entry`].

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use tracing::{debug, error, info, warn};

use crate::execute::actions::{self, Invoker, StepContext, fetch::url_to_filename, fetch_verified, run_step};
use crate::execute::env::{EntryScope, EnvSnapshot};
use crate::execute::prefix::PrefixTransaction;
use crate::execute::types::{EntryReport, EntryState, ExecuteConfig, ExecuteError, FailurePolicy, SkipReason};
use crate::platform::{PlatformDescriptor, ResolvedDependencySet, resolve_steps};
use crate::receipt::{Receipt, ReceiptDependency, ReceiptStore};
use crate::recipe::{BOTTLE_STRIP_COMPONENTS, BuildStep, EnvMutation, Recipe};

/// Everything an entry task shares with the scheduler.
pub(crate) struct Shared<I: Invoker> {
  pub config: ExecuteConfig,
  pub invoker: Arc<I>,
  pub receipts: Option<ReceiptStore>,
  pub platform: PlatformDescriptor,
  /// Set once stop-on-first-failure has halted admissions.
  pub halted: AtomicBool,
}

impl<I: Invoker> Shared<I> {
  /// Whether dependents may proceed on top of this entry.
  pub fn is_available(&self, report: &EntryReport) -> bool {
    match report.state {
      EntryState::Done => true,
      EntryState::Failed => {
        !self.config.tests_block_dependents && report.error.as_ref().is_some_and(ExecuteError::is_test_failure)
      }
      _ => false,
    }
  }

  /// Halt admissions if `report` is a failure the policy stops on. Done from
  /// the worker, before its slot is released, so queued entries observe it.
  pub fn observe(&self, report: &EntryReport) {
    if self.config.policy == FailurePolicy::StopOnFirstFailure
      && report.state == EntryState::Failed
      && !self.is_available(report)
      && !self.halted.swap(true, Ordering::SeqCst)
    {
      warn!(package = %report.name, "halting execution after failure");
    }
  }
}

/// One entry handed to a worker.
pub(crate) struct EntryJob {
  pub recipe: Arc<Recipe>,
  pub dependencies: ResolvedDependencySet,
  /// Versions of the dependencies, for the receipt.
  pub dependency_versions: BTreeMap<String, String>,
  pub on_request: bool,
}

struct Progress {
  name: String,
  history: Vec<EntryState>,
  started: Instant,
}

impl Progress {
  fn new(name: &str) -> Self {
    Self {
      name: name.to_string(),
      history: vec![EntryState::Pending],
      started: Instant::now(),
    }
  }

  fn enter(&mut self, state: EntryState) {
    info!(package = %self.name, state = %state, "entry transition");
    self.history.push(state);
  }

  fn finish(mut self, error: Option<ExecuteError>) -> EntryReport {
    let state = if error.is_some() {
      EntryState::Failed
    } else {
      EntryState::Done
    };
    self.enter(state);
    EntryReport {
      name: self.name,
      state,
      history: self.history,
      error,
      skip_reason: None,
      duration: self.started.elapsed(),
    }
  }
}

/// Run one entry to a terminal state.
pub(crate) async fn run_entry<I: Invoker>(job: EntryJob, shared: Arc<Shared<I>>) -> EntryReport {
  let name = job.recipe.name.clone();

  if shared.halted.load(Ordering::SeqCst) {
    warn!(package = %name, "skipping entry, execution halted");
    return EntryReport::skipped(&name, SkipReason::Halted);
  }

  let mut progress = Progress::new(&name);
  let result = drive(&job, &shared, &mut progress).await;

  let report = match result {
    Ok(()) => {
      info!(package = %name, "entry done");
      progress.finish(None)
    }
    Err(e) => {
      if e.is_test_failure() {
        error!(package = %name, error = %e, "test failed");
      } else {
        error!(package = %name, error = %e, "entry failed");
      }
      progress.finish(Some(e))
    }
  };

  shared.observe(&report);
  report
}

async fn drive<I: Invoker>(job: &EntryJob, shared: &Shared<I>, progress: &mut Progress) -> Result<(), ExecuteError> {
  let config = &shared.config;
  let invoker = shared.invoker.as_ref();
  let recipe = job.recipe.as_ref();

  progress.enter(EntryState::Preparing);
  let scope = EntryScope::create(&config.work_root, &recipe.name)?;
  let prefix = config.prefix_root.join(&recipe.name);
  let schedule = resolve_steps(recipe, &shared.platform);

  let opt = opt_prefixes(&config.prefix_root, &job.dependencies);
  let ctx = StepContext::new(
    &recipe.name,
    &recipe.version,
    prefix.clone(),
    scope.src(),
    scope.path().to_path_buf(),
    config.prefix_root.clone(),
    opt,
  );
  let env = entry_env(&scope, config, &job.dependencies, &schedule.env, &ctx)?;

  let bottle = if config.fetch_sources && config.pour_bottles {
    recipe
      .bottle
      .as_ref()
      .and_then(|b| b.choose(&recipe.name, &recipe.build_identity(), &shared.platform))
  } else {
    None
  };

  let poured = match &bottle {
    Some(choice) => {
      info!(package = %recipe.name, tag = %choice.tag, "using bottle");
      Some(fetch_verified(&choice.url, &choice.sha256, &config.downloads_dir).await?)
    }
    None => {
      if recipe.bottle.is_some() && config.pour_bottles {
        debug!(package = %recipe.name, platform = %shared.platform, "no bottle for platform, building from source");
      }
      if config.fetch_sources {
        let archive = fetch_verified(&recipe.source.url, &recipe.source.sha256, &config.downloads_dir).await?;
        actions::unpack_source(&archive, &url_to_filename(&recipe.source.url), &scope.src(), &env, invoker).await?;

        for patch in &recipe.patches {
          let path = fetch_verified(&patch.url, &patch.sha256, &config.downloads_dir).await?;
          debug!(package = %recipe.name, patch = %patch.url, "applying patch");
          actions::apply_patch(&path, &scope.src(), &env, invoker).await?;
        }
      }
      None
    }
  };

  progress.enter(EntryState::Building);
  if poured.is_none() {
    run_steps(&schedule.build, &ctx, &env, config, invoker).await?;
  }

  progress.enter(EntryState::Installing);
  let tx = PrefixTransaction::begin(&prefix).await?;
  if tx.is_reinstall() {
    info!(package = %recipe.name, "replacing previous install");
  }
  let installed = match &poured {
    Some(archive) => actions::extract_archive(archive, tx.prefix(), BOTTLE_STRIP_COMPONENTS, &env, invoker).await,
    None => run_steps(&schedule.install, &ctx, &env, config, invoker).await,
  };
  if let Err(e) = installed {
    tx.rollback().await;
    return Err(e);
  }

  if let Some(test) = schedule.test.as_ref().filter(|steps| !steps.is_empty()) {
    progress.enter(EntryState::Testing);
    if let Err(e) = run_steps(test, &ctx, &env, config, invoker).await {
      // Dependents still run on top of a failed test unless tests block them.
      if config.tests_block_dependents {
        tx.rollback().await;
      } else {
        tx.commit().await;
      }
      return Err(ExecuteError::TestFailed(Box::new(e)));
    }
  }

  tx.commit().await;

  if let Some(store) = &shared.receipts {
    let mut receipt = build_receipt(job, &shared.platform, &prefix);
    receipt.poured_from_bottle = poured.is_some();
    store.record(&receipt)?;
    debug!(package = %recipe.name, "receipt recorded");
  }

  drop(scope);
  Ok(())
}

async fn run_steps<I: Invoker>(
  steps: &[BuildStep],
  ctx: &StepContext,
  env: &EnvSnapshot,
  config: &ExecuteConfig,
  invoker: &I,
) -> Result<(), ExecuteError> {
  for step in steps {
    run_step(step, ctx, env, config.shell.as_deref(), invoker).await?;
  }
  Ok(())
}

fn opt_prefixes(prefix_root: &Path, dependencies: &ResolvedDependencySet) -> BTreeMap<String, String> {
  dependencies
    .iter()
    .map(|d| (d.name.clone(), prefix_root.join(&d.name).to_string_lossy().into_owned()))
    .collect()
}

/// Base isolated env, then dependency search paths, then recipe mutations.
fn entry_env(
  scope: &EntryScope,
  config: &ExecuteConfig,
  dependencies: &ResolvedDependencySet,
  mutations: &[EnvMutation],
  ctx: &StepContext,
) -> Result<EnvSnapshot, ExecuteError> {
  let mut env = EnvSnapshot::isolated(scope, &config.base_path);

  // Reverse so the first declared dependency ends up first on the path.
  let deps: Vec<_> = dependencies.iter().collect();
  for dep in deps.into_iter().rev() {
    let opt: PathBuf = config.prefix_root.join(&dep.name);
    env.prepend_path("PATH", &opt.join("bin"));
    env.prepend_path("PKG_CONFIG_PATH", &opt.join("lib").join("pkgconfig"));
  }

  for mutation in mutations {
    let value = ctx.expand(&mutation.value)?;
    env.apply(&mutation.key, &value, &mutation.op);
  }

  Ok(env)
}

fn build_receipt(job: &EntryJob, platform: &PlatformDescriptor, prefix: &Path) -> Receipt {
  let mut receipt = Receipt::new(&job.recipe, &platform.triple(), prefix, job.on_request);

  for dep in job.dependencies.iter() {
    if !dep.phases.run {
      receipt.build_dependencies.push(dep.name.clone());
      continue;
    }
    match job.dependency_versions.get(&dep.name) {
      Some(version) => receipt.runtime_dependencies.push(ReceiptDependency {
        name: dep.name.clone(),
        version: version.clone(),
      }),
      None => warn!(package = %job.recipe.name, dependency = %dep.name, "dependency version unknown, not recorded"),
    }
  }

  receipt
}
