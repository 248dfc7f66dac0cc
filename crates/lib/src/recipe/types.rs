use std::fmt;

use semver::VersionReq;
use serde::{Deserialize, Serialize};

use super::bottle::Bottle;
use crate::platform::predicate::applies;
use crate::platform::{PlatformDescriptor, PlatformPredicate};
use crate::version::BuildIdentity;

/// Lifecycle stage during which a dependency is required.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Phase {
  #[serde(rename = "build")]
  Build,
  #[serde(rename = "test")]
  Test,
  #[default]
  #[serde(rename = "run")]
  Run,
  #[serde(rename = "build+test")]
  BuildTest,
}

impl Phase {
  pub fn as_str(&self) -> &'static str {
    match self {
      Phase::Build => "build",
      Phase::Test => "test",
      Phase::Run => "run",
      Phase::BuildTest => "build+test",
    }
  }

  /// The set of lifecycle stages this phase covers.
  pub fn stages(&self) -> PhaseSet {
    match self {
      Phase::Build => PhaseSet::BUILD,
      Phase::Test => PhaseSet::TEST,
      Phase::Run => PhaseSet::RUN,
      Phase::BuildTest => PhaseSet::BUILD.union(PhaseSet::TEST),
    }
  }
}

impl fmt::Display for Phase {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.as_str())
  }
}

/// A union of lifecycle stages.
///
/// Several declarations of the same dependency (or several dependents pulling
/// in the same package) merge into one set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct PhaseSet {
  pub build: bool,
  pub test: bool,
  pub run: bool,
}

impl PhaseSet {
  pub const EMPTY: PhaseSet = PhaseSet {
    build: false,
    test: false,
    run: false,
  };
  pub const BUILD: PhaseSet = PhaseSet {
    build: true,
    test: false,
    run: false,
  };
  pub const TEST: PhaseSet = PhaseSet {
    build: false,
    test: true,
    run: false,
  };
  pub const RUN: PhaseSet = PhaseSet {
    build: false,
    test: false,
    run: true,
  };

  pub const fn union(self, other: PhaseSet) -> PhaseSet {
    PhaseSet {
      build: self.build || other.build,
      test: self.test || other.test,
      run: self.run || other.run,
    }
  }

  pub fn contains(&self, phase: Phase) -> bool {
    let stages = phase.stages();
    (!stages.build || self.build) && (!stages.test || self.test) && (!stages.run || self.run)
  }

  pub fn intersects(&self, phase: Phase) -> bool {
    let stages = phase.stages();
    (stages.build && self.build) || (stages.test && self.test) || (stages.run && self.run)
  }

  pub fn is_empty(&self) -> bool {
    *self == Self::EMPTY
  }

  /// Needed only while building, never at run time or for tests.
  pub fn is_build_only(&self) -> bool {
    self.build && !self.test && !self.run
  }

  /// Needed only for the post-install test.
  pub fn is_test_only(&self) -> bool {
    self.test && !self.build && !self.run
  }
}

impl fmt::Display for PhaseSet {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let names: Vec<&str> = [(self.build, "build"), (self.test, "test"), (self.run, "run")]
      .into_iter()
      .filter_map(|(set, name)| set.then_some(name))
      .collect();
    write!(f, "{}", names.join("+"))
  }
}

/// A checksummed download location.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Source {
  pub url: String,
  pub sha256: String,
}

/// Development source tracking a branch; never checksummed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HeadSource {
  pub url: String,
  #[serde(default)]
  pub branch: Option<String>,
}

/// A dependency declaration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DependencySpec {
  pub name: String,
  #[serde(default)]
  pub phase: Phase,
  #[serde(default)]
  pub platform: Option<PlatformPredicate>,
  #[serde(default)]
  pub version: Option<VersionReq>,
}

/// An artifact that cannot coexist with the recipe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConflictSpec {
  pub name: String,
  pub because: String,
}

/// How an environment mutation combines with an existing value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EnvOp {
  Set,
  Prepend { separator: String },
  Append { separator: String },
}

/// A scoped environment change applied while preparing an entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "EnvDecl")]
pub struct EnvMutation {
  pub key: String,
  pub value: String,
  pub op: EnvOp,
  pub platform: Option<PlatformPredicate>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct EnvDecl {
  set: Option<String>,
  prepend: Option<String>,
  append: Option<String>,
  value: String,
  separator: Option<String>,
  platform: Option<PlatformPredicate>,
}

impl TryFrom<EnvDecl> for EnvMutation {
  type Error = String;

  fn try_from(decl: EnvDecl) -> Result<Self, Self::Error> {
    let (key, op) = match (decl.set, decl.prepend, decl.append) {
      (Some(key), None, None) => {
        if decl.separator.is_some() {
          return Err(format!("env '{key}': separator is only valid with prepend/append"));
        }
        (key, EnvOp::Set)
      }
      (None, Some(key), None) => (
        key,
        EnvOp::Prepend {
          separator: decl.separator.unwrap_or_else(|| ":".to_string()),
        },
      ),
      (None, None, Some(key)) => (
        key,
        EnvOp::Append {
          separator: decl.separator.unwrap_or_else(|| " ".to_string()),
        },
      ),
      _ => return Err("env entry must have exactly one of: set, prepend, append".to_string()),
    };

    if key.is_empty() || key.contains('=') {
      return Err(format!("invalid environment variable name '{key}'"));
    }

    Ok(Self {
      key,
      value: decl.value,
      op,
      platform: decl.platform,
    })
  }
}

/// What a build step does.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StepAction {
  /// Invoke a program with arguments.
  Run { program: String, args: Vec<String> },
  /// Run a script through the platform shell.
  Shell { script: String },
  /// Regex replacement inside a file, failing when nothing matches.
  Inreplace {
    path: String,
    pattern: String,
    replacement: String,
  },
  /// Copy a file or directory into the install prefix.
  InstallFile { from: String, to: String },
}

/// One ordered unit of work inside a recipe stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "StepDecl")]
pub struct BuildStep {
  pub action: StepAction,
  pub cwd: Option<String>,
  pub platform: Option<PlatformPredicate>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct StepDecl {
  run: Option<String>,
  #[serde(default)]
  args: Vec<String>,
  shell: Option<String>,
  inreplace: Option<String>,
  pattern: Option<String>,
  replacement: Option<String>,
  install_file: Option<String>,
  to: Option<String>,
  cwd: Option<String>,
  platform: Option<PlatformPredicate>,
}

impl TryFrom<StepDecl> for BuildStep {
  type Error = String;

  fn try_from(decl: StepDecl) -> Result<Self, Self::Error> {
    let kinds = [
      decl.run.is_some(),
      decl.shell.is_some(),
      decl.inreplace.is_some(),
      decl.install_file.is_some(),
    ];
    if kinds.iter().filter(|k| **k).count() != 1 {
      return Err("step must have exactly one of: run, shell, inreplace, install_file".to_string());
    }

    if decl.run.is_none() && !decl.args.is_empty() {
      return Err("args is only valid with run".to_string());
    }

    let action = if let Some(program) = decl.run {
      if program.is_empty() {
        return Err("run: program must not be empty".to_string());
      }
      StepAction::Run {
        program,
        args: decl.args,
      }
    } else if let Some(script) = decl.shell {
      StepAction::Shell { script }
    } else if let Some(path) = decl.inreplace {
      let pattern = decl.pattern.ok_or("inreplace requires pattern")?;
      regex::Regex::new(&pattern).map_err(|e| format!("inreplace pattern: {e}"))?;
      StepAction::Inreplace {
        path,
        pattern,
        replacement: decl.replacement.ok_or("inreplace requires replacement")?,
      }
    } else if let Some(from) = decl.install_file {
      StepAction::InstallFile {
        from,
        to: decl.to.ok_or("install_file requires to")?,
      }
    } else {
      unreachable!("exactly one step kind was checked above")
    };

    Ok(Self {
      action,
      cwd: decl.cwd,
      platform: decl.platform,
    })
  }
}

/// An immutable package recipe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Recipe {
  pub name: String,
  pub version: String,
  #[serde(default)]
  pub revision: u32,
  #[serde(default)]
  pub license: Option<String>,
  #[serde(default)]
  pub desc: Option<String>,
  #[serde(default)]
  pub homepage: Option<String>,
  pub source: Source,
  #[serde(default)]
  pub head: Option<HeadSource>,
  #[serde(default)]
  pub patches: Vec<Source>,
  /// Prebuilt archives that can be poured instead of building.
  #[serde(default)]
  pub bottle: Option<Bottle>,
  #[serde(default)]
  pub dependencies: Vec<DependencySpec>,
  #[serde(default)]
  pub conflicts: Vec<ConflictSpec>,
  #[serde(default)]
  pub env: Vec<EnvMutation>,
  #[serde(default)]
  pub build: Vec<BuildStep>,
  #[serde(default)]
  pub install: Vec<BuildStep>,
  #[serde(default)]
  pub test: Option<Vec<BuildStep>>,
}

impl Recipe {
  /// Dependencies declared for a phase (declarations covering several phases
  /// count for each of them).
  pub fn dependencies_for_phase(&self, phase: Phase) -> impl Iterator<Item = &DependencySpec> {
    self
      .dependencies
      .iter()
      .filter(move |dep| dep.phase.stages().intersects(phase))
  }

  /// Dependencies whose platform predicate is exactly `predicate`
  /// (`None` selects the unconditional ones).
  pub fn dependencies_for_predicate(&self, predicate: Option<&PlatformPredicate>) -> impl Iterator<Item = &DependencySpec> {
    self
      .dependencies
      .iter()
      .filter(move |dep| dep.platform.as_ref() == predicate)
  }

  /// Dependencies that apply on `platform`, in declaration order.
  pub fn dependencies_for_platform<'a>(
    &'a self,
    platform: &'a PlatformDescriptor,
  ) -> impl Iterator<Item = &'a DependencySpec> + 'a {
    self
      .dependencies
      .iter()
      .filter(move |dep| applies(dep.platform.as_ref(), platform))
  }

  /// The (version, revision) pair that identifies a build of this recipe.
  pub fn build_identity(&self) -> BuildIdentity {
    BuildIdentity::new(&self.version, self.revision)
  }

  /// Whether the recipe declares a post-install test.
  pub fn has_test(&self) -> bool {
    self.test.as_ref().is_some_and(|steps| !steps.is_empty())
  }
}
