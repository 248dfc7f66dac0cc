//! Test helpers for cellar-lib.

use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use semver::VersionReq;

use crate::execute::ExecuteError;
use crate::execute::actions::{Invocation, InvocationOutput, Invoker};

use crate::platform::{Arch, OsFamily, PlatformDescriptor, PlatformPredicate};
use crate::recipe::{Bottle, BuildStep, ConflictSpec, DependencySpec, EnvMutation, EnvOp, Phase, Recipe, Source, StepAction};

pub const FAKE_SHA256: &str = "10a0f4654f62140a6dd4d380dcf0bbdbdcf6e697556863dc499c296182f081a3";

pub fn linux() -> PlatformDescriptor {
  PlatformDescriptor::new(OsFamily::Linux, 6, Arch::X86_64)
}

/// The platform the tests run on, for tests that spawn real processes.
pub fn host() -> PlatformDescriptor {
  PlatformDescriptor::current().unwrap_or_else(|_| linux())
}

/// Fluent in-memory recipe construction.
pub struct RecipeBuilder {
  recipe: Recipe,
}

impl RecipeBuilder {
  pub fn new(name: &str) -> Self {
    Self {
      recipe: Recipe {
        name: name.to_string(),
        version: "1.0.0".to_string(),
        revision: 0,
        license: None,
        desc: None,
        homepage: None,
        source: Source {
          url: format!("https://example.com/{name}-1.0.0.tar.gz"),
          sha256: FAKE_SHA256.to_string(),
        },
        head: None,
        patches: Vec::new(),
        bottle: None,
        dependencies: Vec::new(),
        conflicts: Vec::new(),
        env: Vec::new(),
        build: Vec::new(),
        install: Vec::new(),
        test: None,
      },
    }
  }

  pub fn version(mut self, version: &str) -> Self {
    self.recipe.version = version.to_string();
    self
  }

  pub fn revision(mut self, revision: u32) -> Self {
    self.recipe.revision = revision;
    self
  }

  pub fn dep(mut self, name: &str, phase: Phase) -> Self {
    self.recipe.dependencies.push(DependencySpec {
      name: name.to_string(),
      phase,
      platform: None,
      version: None,
    });
    self
  }

  pub fn dep_on(mut self, name: &str, phase: Phase, platform: PlatformPredicate) -> Self {
    self.recipe.dependencies.push(DependencySpec {
      name: name.to_string(),
      phase,
      platform: Some(platform),
      version: None,
    });
    self
  }

  pub fn dep_version(mut self, name: &str, req: &str) -> Self {
    self.recipe.dependencies.push(DependencySpec {
      name: name.to_string(),
      phase: Phase::Run,
      platform: None,
      version: Some(VersionReq::parse(req).unwrap()),
    });
    self
  }

  pub fn bottle(mut self, root_url: &str, tag: &str, sha256: &str) -> Self {
    let bottle = self.recipe.bottle.get_or_insert_with(|| Bottle {
      root_url: root_url.to_string(),
      rebuild: 0,
      sha256: Default::default(),
    });
    bottle.sha256.insert(tag.to_string(), sha256.to_string());
    self
  }

  pub fn conflict(mut self, name: &str, because: &str) -> Self {
    self.recipe.conflicts.push(ConflictSpec {
      name: name.to_string(),
      because: because.to_string(),
    });
    self
  }

  pub fn set_env(mut self, key: &str, value: &str) -> Self {
    self.recipe.env.push(EnvMutation {
      key: key.to_string(),
      value: value.to_string(),
      op: EnvOp::Set,
      platform: None,
    });
    self
  }

  pub fn prepend_env(mut self, key: &str, value: &str) -> Self {
    self.recipe.env.push(EnvMutation {
      key: key.to_string(),
      value: value.to_string(),
      op: EnvOp::Prepend {
        separator: ":".to_string(),
      },
      platform: None,
    });
    self
  }

  pub fn build_shell(mut self, script: &str) -> Self {
    self.recipe.build.push(shell_step(script));
    self
  }

  pub fn install_shell(mut self, script: &str) -> Self {
    self.recipe.install.push(shell_step(script));
    self
  }

  pub fn install_step(mut self, action: StepAction) -> Self {
    self.recipe.install.push(BuildStep {
      action,
      cwd: None,
      platform: None,
    });
    self
  }

  pub fn test_shell(mut self, script: &str) -> Self {
    self.recipe.test.get_or_insert_with(Vec::new).push(shell_step(script));
    self
  }

  pub fn build(self) -> Recipe {
    self.recipe
  }
}

fn shell_step(script: &str) -> BuildStep {
  BuildStep {
    action: StepAction::Shell {
      script: script.to_string(),
    },
    cwd: None,
    platform: None,
  }
}

/// Records invocations instead of spawning processes.
///
/// Any invocation whose command line contains one of the failure markers
/// exits with code 1. Concurrency is tracked so tests can assert on the
/// number of entries running at once.
#[derive(Default)]
pub struct FakeInvoker {
  calls: Mutex<Vec<Invocation>>,
  fail_markers: Vec<String>,
  delay: Duration,
  running: AtomicUsize,
  peak: AtomicUsize,
}

impl FakeInvoker {
  pub fn failing_on(marker: &str) -> Self {
    Self {
      fail_markers: vec![marker.to_string()],
      ..Self::default()
    }
  }

  pub fn with_delay(mut self, delay: Duration) -> Self {
    self.delay = delay;
    self
  }

  pub fn calls(&self) -> Vec<Invocation> {
    self.calls.lock().unwrap().clone()
  }

  /// Command lines, in invocation order.
  pub fn commands(&self) -> Vec<String> {
    self.calls().iter().map(Invocation::display).collect()
  }

  pub fn peak_concurrency(&self) -> usize {
    self.peak.load(Ordering::SeqCst)
  }
}

impl Invoker for FakeInvoker {
  async fn invoke(&self, invocation: Invocation) -> Result<InvocationOutput, ExecuteError> {
    let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
    self.peak.fetch_max(now, Ordering::SeqCst);

    let display = invocation.display();
    self.calls.lock().unwrap().push(invocation);
    if !self.delay.is_zero() {
      tokio::time::sleep(self.delay).await;
    }
    self.running.fetch_sub(1, Ordering::SeqCst);

    let failed = self.fail_markers.iter().any(|m| display.contains(m.as_str()));
    Ok(InvocationOutput {
      code: Some(if failed { 1 } else { 0 }),
      stdout: String::new(),
      stderr: if failed { format!("{display}: failed") } else { String::new() },
    })
  }
}
