//! Step dispatch.
//!
//! Placeholders in every step field are substituted against a [`StepContext`]
//! before the step runs. External commands go through the [`Invoker`]; file
//! steps run in-process.

pub mod fetch;
pub mod file;
pub mod invoke;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::execute::env::EnvSnapshot;
use crate::execute::types::ExecuteError;
use crate::placeholder::{self, PlaceholderError, Resolver, Var};
use crate::recipe::{BuildStep, StepAction};

pub use fetch::fetch_verified;
pub use invoke::{Invocation, InvocationOutput, Invoker, ProcessInvoker, get_shell, run_checked};

/// Placeholder values for one entry.
#[derive(Debug, Clone)]
pub struct StepContext {
  pub name: String,
  pub version: String,
  pub prefix: PathBuf,
  pub src: PathBuf,
  pub work: PathBuf,
  pub cellar: PathBuf,
  /// Install prefixes of the entry's resolved dependencies.
  pub opt: BTreeMap<String, String>,
  prefix_str: String,
  src_str: String,
  work_str: String,
  cellar_str: String,
}

impl StepContext {
  pub fn new(
    name: &str,
    version: &str,
    prefix: PathBuf,
    src: PathBuf,
    work: PathBuf,
    cellar: PathBuf,
    opt: BTreeMap<String, String>,
  ) -> Self {
    Self {
      name: name.to_string(),
      version: version.to_string(),
      prefix_str: prefix.to_string_lossy().into_owned(),
      src_str: src.to_string_lossy().into_owned(),
      work_str: work.to_string_lossy().into_owned(),
      cellar_str: cellar.to_string_lossy().into_owned(),
      prefix,
      src,
      work,
      cellar,
      opt,
    }
  }

  /// Substitute placeholders in `input`.
  pub fn expand(&self, input: &str) -> Result<String, PlaceholderError> {
    placeholder::substitute(input, self)
  }

  /// Resolve a step path: placeholders first, then relative to `base`.
  fn expand_path(&self, input: &str, base: &Path) -> Result<PathBuf, PlaceholderError> {
    let expanded = PathBuf::from(self.expand(input)?);
    Ok(if expanded.is_absolute() {
      expanded
    } else {
      base.join(expanded)
    })
  }
}

impl Resolver for StepContext {
  fn resolve_var(&self, var: Var) -> Result<&str, PlaceholderError> {
    Ok(match var {
      Var::Prefix => &self.prefix_str,
      Var::Src => &self.src_str,
      Var::Work => &self.work_str,
      Var::Name => &self.name,
      Var::Version => &self.version,
      Var::Cellar => &self.cellar_str,
    })
  }

  fn resolve_opt(&self, package: &str) -> Result<&str, PlaceholderError> {
    self
      .opt
      .get(package)
      .map(String::as_str)
      .ok_or_else(|| PlaceholderError::UnknownDependency(package.to_string()))
  }
}

/// Run one recipe step.
pub async fn run_step(
  step: &BuildStep,
  ctx: &StepContext,
  env: &EnvSnapshot,
  shell: Option<&str>,
  invoker: &impl Invoker,
) -> Result<(), ExecuteError> {
  let cwd = match &step.cwd {
    Some(cwd) => ctx.expand_path(cwd, &ctx.src)?,
    None => ctx.src.clone(),
  };

  match &step.action {
    StepAction::Run { program, args } => {
      let args = args.iter().map(|a| ctx.expand(a)).collect::<Result<Vec<_>, _>>()?;
      let invocation = Invocation {
        program: ctx.expand(program)?,
        args,
        env: env.clone().into_map(),
        cwd,
      };
      info!(cmd = %invocation.display(), "run");
      run_checked(invoker, invocation).await?;
    }

    StepAction::Shell { script } => {
      let script = ctx.expand(script)?;
      let (program, mut args) = get_shell(shell);
      args.push(script);
      debug!(shell = %program, "shell step");
      run_checked(
        invoker,
        Invocation {
          program,
          args,
          env: env.clone().into_map(),
          cwd,
        },
      )
      .await?;
    }

    StepAction::Inreplace {
      path,
      pattern,
      replacement,
    } => {
      let path = ctx.expand_path(path, &cwd)?;
      let replacement = ctx.expand(replacement)?;
      file::inreplace(&path, pattern, &replacement)?;
    }

    StepAction::InstallFile { from, to } => {
      let from = ctx.expand_path(from, &cwd)?;
      let to = ctx.expand(to)?;
      file::install_file(&from, &ctx.prefix, &to)?;
    }
  }

  Ok(())
}

const ARCHIVE_SUFFIXES: &[&str] = &[
  ".tar", ".tar.gz", ".tgz", ".tar.xz", ".txz", ".tar.bz2", ".tbz", ".tar.zst",
];

/// Whether a source file should be unpacked rather than copied.
pub fn is_archive(file_name: &str) -> bool {
  let lower = file_name.to_ascii_lowercase();
  ARCHIVE_SUFFIXES.iter().any(|suffix| lower.ends_with(suffix))
}

/// Place a fetched source into `src`: archives are extracted with their top
/// directory stripped, anything else is copied in under `file_name`.
pub async fn unpack_source(
  archive: &Path,
  file_name: &str,
  src: &Path,
  env: &EnvSnapshot,
  invoker: &impl Invoker,
) -> Result<(), ExecuteError> {
  if !is_archive(file_name) {
    tokio::fs::copy(archive, src.join(file_name)).await?;
    return Ok(());
  }

  extract_archive(archive, src, 1, env, invoker).await
}

/// Extract a tar archive into `dest`, dropping `strip_components` leading
/// path components.
pub async fn extract_archive(
  archive: &Path,
  dest: &Path,
  strip_components: usize,
  env: &EnvSnapshot,
  invoker: &impl Invoker,
) -> Result<(), ExecuteError> {
  run_checked(
    invoker,
    Invocation {
      program: "tar".to_string(),
      args: vec![
        "-xf".to_string(),
        archive.to_string_lossy().into_owned(),
        "-C".to_string(),
        dest.to_string_lossy().into_owned(),
        format!("--strip-components={strip_components}"),
      ],
      env: env.clone().into_map(),
      cwd: dest.to_path_buf(),
    },
  )
  .await?;
  Ok(())
}

/// Apply a unified diff to `src` with `-p1`.
pub async fn apply_patch(patch: &Path, src: &Path, env: &EnvSnapshot, invoker: &impl Invoker) -> Result<(), ExecuteError> {
  run_checked(
    invoker,
    Invocation {
      program: "patch".to_string(),
      args: vec![
        "-p1".to_string(),
        "-i".to_string(),
        patch.to_string_lossy().into_owned(),
      ],
      env: env.clone().into_map(),
      cwd: src.to_path_buf(),
    },
  )
  .await?;
  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::util::testutil::FakeInvoker;
  use tempfile::TempDir;

  fn ctx(root: &Path) -> StepContext {
    let src = root.join("src");
    std::fs::create_dir_all(&src).unwrap();
    let opt = BTreeMap::from([("ffmpeg".to_string(), "/cellar/ffmpeg".to_string())]);
    StepContext::new(
      "mpv",
      "0.40.0",
      root.join("cellar/mpv"),
      src,
      root.to_path_buf(),
      root.join("cellar"),
      opt,
    )
  }

  fn step(action: StepAction) -> BuildStep {
    BuildStep {
      action,
      cwd: None,
      platform: None,
    }
  }

  #[tokio::test]
  async fn run_step_substitutes_program_and_args() {
    let dir = TempDir::new().unwrap();
    let ctx = ctx(dir.path());
    let invoker = FakeInvoker::default();
    let mut env = EnvSnapshot::default();
    env.set("PATH", "/usr/bin");

    let s = step(StepAction::Run {
      program: "meson".to_string(),
      args: vec![
        "setup".to_string(),
        "--prefix=$${prefix}".to_string(),
        "-Dffmpeg=$${opt:ffmpeg}".to_string(),
      ],
    });
    run_step(&s, &ctx, &env, None, &invoker).await.unwrap();

    let calls = invoker.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].program, "meson");
    assert_eq!(calls[0].args[1], format!("--prefix={}", dir.path().join("cellar/mpv").display()));
    assert_eq!(calls[0].args[2], "-Dffmpeg=/cellar/ffmpeg");
    assert_eq!(calls[0].cwd, dir.path().join("src"));
    assert_eq!(calls[0].env.get("PATH").map(String::as_str), Some("/usr/bin"));
  }

  #[tokio::test]
  async fn unknown_dependency_placeholder_fails_before_running() {
    let dir = TempDir::new().unwrap();
    let invoker = FakeInvoker::default();
    let s = step(StepAction::Shell {
      script: "ls $${opt:libass}".to_string(),
    });

    let err = run_step(&s, &ctx(dir.path()), &EnvSnapshot::default(), None, &invoker)
      .await
      .unwrap_err();
    assert!(matches!(
      err,
      ExecuteError::Placeholder(PlaceholderError::UnknownDependency(ref name)) if name == "libass"
    ));
    assert!(invoker.calls().is_empty());
  }

  #[tokio::test]
  async fn relative_cwd_is_under_src() {
    let dir = TempDir::new().unwrap();
    let invoker = FakeInvoker::default();
    let s = BuildStep {
      action: StepAction::Shell {
        script: "make".to_string(),
      },
      cwd: Some("build".to_string()),
      platform: None,
    };
    run_step(&s, &ctx(dir.path()), &EnvSnapshot::default(), None, &invoker)
      .await
      .unwrap();
    assert_eq!(invoker.calls()[0].cwd, dir.path().join("src/build"));
  }

  #[tokio::test]
  async fn failing_command_surfaces_as_cmd_failed() {
    let dir = TempDir::new().unwrap();
    let invoker = FakeInvoker::failing_on("make check");
    let s = step(StepAction::Shell {
      script: "make check".to_string(),
    });
    let err = run_step(&s, &ctx(dir.path()), &EnvSnapshot::default(), None, &invoker)
      .await
      .unwrap_err();
    assert!(matches!(err, ExecuteError::CmdFailed { .. }));
  }

  #[tokio::test]
  async fn file_steps_resolve_against_src_and_prefix() {
    let dir = TempDir::new().unwrap();
    let ctx = ctx(dir.path());
    std::fs::write(ctx.src.join("config.h"), "#define PREFIX \"/usr\"\n").unwrap();
    std::fs::write(ctx.src.join("mpv"), "bin").unwrap();
    let invoker = FakeInvoker::default();
    let env = EnvSnapshot::default();

    let edit = step(StepAction::Inreplace {
      path: "config.h".to_string(),
      pattern: "/usr".to_string(),
      replacement: "$${prefix}".to_string(),
    });
    run_step(&edit, &ctx, &env, None, &invoker).await.unwrap();
    let contents = std::fs::read_to_string(ctx.src.join("config.h")).unwrap();
    assert!(contents.contains(&ctx.prefix.to_string_lossy().into_owned()));

    let install = step(StepAction::InstallFile {
      from: "mpv".to_string(),
      to: "bin/".to_string(),
    });
    run_step(&install, &ctx, &env, None, &invoker).await.unwrap();
    assert!(ctx.prefix.join("bin/mpv").is_file());
    assert!(invoker.calls().is_empty());
  }

  #[tokio::test]
  async fn non_archive_sources_are_copied() {
    let dir = TempDir::new().unwrap();
    let downloaded = dir.path().join("abc--install.sh");
    std::fs::write(&downloaded, "#!/bin/sh").unwrap();
    let src = dir.path().join("src");
    std::fs::create_dir_all(&src).unwrap();
    let invoker = FakeInvoker::default();

    unpack_source(&downloaded, "install.sh", &src, &EnvSnapshot::default(), &invoker)
      .await
      .unwrap();
    assert!(src.join("install.sh").is_file());
    assert!(invoker.calls().is_empty());
  }

  #[tokio::test]
  async fn archives_are_extracted_with_tar() {
    let dir = TempDir::new().unwrap();
    let invoker = FakeInvoker::default();
    unpack_source(
      &dir.path().join("x.tar.gz"),
      "mpv-0.40.0.tar.gz",
      dir.path(),
      &EnvSnapshot::default(),
      &invoker,
    )
    .await
    .unwrap();
    let calls = invoker.calls();
    assert_eq!(calls[0].program, "tar");
    assert!(calls[0].args.contains(&"--strip-components=1".to_string()));
  }

  #[test]
  fn archive_detection() {
    assert!(is_archive("mpv-0.40.0.tar.gz"));
    assert!(is_archive("zlib-1.3.1.TAR.XZ"));
    assert!(!is_archive("fix-build.patch"));
    assert!(!is_archive("install.sh"));
  }
}
