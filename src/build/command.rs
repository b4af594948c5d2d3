// src/build/command.rs

//! Build command collaborators
//!
//! The scheduler hands each dispatched node to a [`BuildCommand`]. The
//! shell implementation runs the recipe's `build.steps` one at a time with
//! `sh -c` inside the node's stage directory, under a cleared environment
//! holding only the composed variables. Children are polled with a short
//! `wait_timeout` so cancellation and the per-node timeout are honored while
//! a step runs.

use super::cancel::CancellationToken;
use crate::error::{Error, Result};
use crate::recipe::{RecipeRegistry, expand_template};
use crate::spec::Spec;
use std::collections::BTreeMap;
use std::fs;
use std::io::Read;
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use wait_timeout::ChildExt;

const SHELL: &str = "/bin/sh";

/// How often a running child is checked for cancellation
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Marker written into prefixes by [`NoopBuildCommand`]
pub const INSTALL_MARKER: &str = ".kiln-install";

/// Everything a command needs to build one node
#[derive(Debug, Clone)]
pub struct BuildInvocation {
    /// Concrete spec of the node, without its dependency tree
    pub spec: Spec,
    pub key: String,
    pub prefix: PathBuf,
    pub stage_dir: PathBuf,
    pub env: BTreeMap<String, String>,
    pub jobs: usize,
    pub timeout: Option<Duration>,
}

/// What a finished (or aborted) command produced
#[derive(Debug, Clone, Default)]
pub struct CommandOutput {
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub cancelled: bool,
    pub timed_out: bool,
}

impl CommandOutput {
    /// Output of a command that did nothing and succeeded
    pub fn ok() -> Self {
        Self {
            exit_code: Some(0),
            ..Self::default()
        }
    }

    pub fn success(&self) -> bool {
        self.exit_code == Some(0) && !self.cancelled && !self.timed_out
    }
}

/// Builds and installs one node
///
/// `Err` means the command could not be run at all; a command that ran and
/// failed returns `Ok` with a non-zero exit code.
pub trait BuildCommand: Send + Sync {
    fn run(&self, invocation: &BuildInvocation, cancel: &CancellationToken) -> Result<CommandOutput>;
}

/// Runs recipe build steps through the shell
#[derive(Debug, Clone)]
pub struct ShellBuildCommand {
    registry: Arc<RecipeRegistry>,
}

impl ShellBuildCommand {
    pub fn new(registry: Arc<RecipeRegistry>) -> Self {
        Self { registry }
    }

    /// Placeholder values for `%(...)s` in build steps
    fn template_vars(invocation: &BuildInvocation) -> BTreeMap<String, String> {
        let spec = &invocation.spec;
        let mut vars = BTreeMap::new();
        vars.insert("prefix".to_string(), invocation.prefix.display().to_string());
        vars.insert("stage".to_string(), invocation.stage_dir.display().to_string());
        vars.insert("jobs".to_string(), invocation.jobs.to_string());
        vars.insert("name".to_string(), spec.name.clone());
        vars.insert(
            "version".to_string(),
            spec.version
                .as_ref()
                .map(|v| v.to_string())
                .unwrap_or_default(),
        );
        for (name, value) in spec.variants.iter() {
            vars.insert(format!("variant.{}", name), value.to_string());
        }
        vars
    }

    fn run_step(
        &self,
        step: &str,
        invocation: &BuildInvocation,
        cancel: &CancellationToken,
        started: Instant,
    ) -> Result<CommandOutput> {
        let mut child = Command::new(SHELL)
            .arg("-c")
            .arg(step)
            .current_dir(&invocation.stage_dir)
            .env_clear()
            .envs(&invocation.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| Error::io(&invocation.stage_dir, e))?;

        // Drain both pipes while the child runs
        let stdout = drain(child.stdout.take());
        let stderr = drain(child.stderr.take());

        let mut output = CommandOutput::default();
        loop {
            if let Some(status) = child.wait_timeout(POLL_INTERVAL)? {
                output.exit_code = status.code();
                break;
            }
            if cancel.is_cancelled() {
                warn!("Cancelling build step of {}", invocation.key);
                stop(&mut child);
                output.cancelled = true;
                break;
            }
            if let Some(limit) = invocation.timeout {
                if started.elapsed() >= limit {
                    warn!("Build of {} timed out after {}s", invocation.key, limit.as_secs());
                    stop(&mut child);
                    output.timed_out = true;
                    break;
                }
            }
        }

        output.stdout = stdout.join().unwrap_or_default();
        output.stderr = stderr.join().unwrap_or_default();
        Ok(output)
    }
}

impl BuildCommand for ShellBuildCommand {
    fn run(&self, invocation: &BuildInvocation, cancel: &CancellationToken) -> Result<CommandOutput> {
        let recipe = self.registry.lookup(&invocation.spec.name)?;
        fs::create_dir_all(&invocation.prefix).map_err(|e| Error::io(&invocation.prefix, e))?;

        if recipe.build_steps.is_empty() {
            debug!("{} has no build steps", invocation.key);
            return Ok(CommandOutput::ok());
        }

        let vars = Self::template_vars(invocation);
        let started = Instant::now();
        let mut combined = CommandOutput::ok();

        for step in &recipe.build_steps {
            let command = expand_template(step, &vars);
            info!("[{}] {}", invocation.spec.name, command);

            let output = self.run_step(&command, invocation, cancel, started)?;
            combined.stdout.push_str(&output.stdout);
            combined.stderr.push_str(&output.stderr);
            combined.exit_code = output.exit_code;
            combined.cancelled = output.cancelled;
            combined.timed_out = output.timed_out;

            if !output.success() {
                break;
            }
        }

        Ok(combined)
    }
}

/// Records an install without building anything
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopBuildCommand;

impl BuildCommand for NoopBuildCommand {
    fn run(&self, invocation: &BuildInvocation, cancel: &CancellationToken) -> Result<CommandOutput> {
        if cancel.is_cancelled() {
            return Ok(CommandOutput {
                cancelled: true,
                ..CommandOutput::default()
            });
        }
        fs::create_dir_all(&invocation.prefix).map_err(|e| Error::io(&invocation.prefix, e))?;
        let marker = invocation.prefix.join(INSTALL_MARKER);
        fs::write(&marker, format!("{}\n", invocation.key)).map_err(|e| Error::io(&marker, e))?;
        Ok(CommandOutput::ok())
    }
}

fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> thread::JoinHandle<String> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        if let Some(mut pipe) = pipe {
            let _ = pipe.read_to_end(&mut buf);
        }
        String::from_utf8_lossy(&buf).into_owned()
    })
}

fn stop(child: &mut Child) {
    if let Err(e) = child.kill() {
        debug!("Failed to kill build step: {}", e);
    }
    let _ = child.wait();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recipe::{PackageRecipe, VersionDecl};
    use crate::variant::VariantMap;
    use crate::version::Version;

    fn registry(steps: &[&str]) -> Arc<RecipeRegistry> {
        let mut recipe = PackageRecipe::new("demo");
        recipe.versions.push(VersionDecl::new(Version::parse("1.2").unwrap()));
        recipe.build_steps = steps.iter().map(|s| s.to_string()).collect();
        let mut registry = RecipeRegistry::new();
        registry.register(recipe).unwrap();
        Arc::new(registry)
    }

    fn invocation(root: &std::path::Path) -> BuildInvocation {
        let stage_dir = root.join("stage");
        fs::create_dir_all(&stage_dir).unwrap();
        let mut env = BTreeMap::new();
        env.insert("PATH".to_string(), "/usr/bin:/bin".to_string());
        env.insert("GREETING".to_string(), "hello".to_string());
        BuildInvocation {
            spec: Spec::concrete("demo", Version::parse("1.2").unwrap(), VariantMap::new()),
            key: "demo@1.2".to_string(),
            prefix: root.join("prefix"),
            stage_dir,
            env,
            jobs: 2,
            timeout: None,
        }
    }

    #[test]
    fn test_shell_steps_expand_and_run() {
        let dir = tempfile::tempdir().unwrap();
        let command = ShellBuildCommand::new(registry(&[
            "echo %(name)s-%(version)s -j%(jobs)s",
            "echo $GREETING > %(prefix)s/out.txt",
        ]));
        let inv = invocation(dir.path());

        let output = command.run(&inv, &CancellationToken::new()).unwrap();
        assert!(output.success());
        assert_eq!(output.stdout.trim(), "demo-1.2 -j2");
        let written = fs::read_to_string(inv.prefix.join("out.txt")).unwrap();
        assert_eq!(written.trim(), "hello");
    }

    #[test]
    fn test_shell_environment_is_cleared() {
        let dir = tempfile::tempdir().unwrap();
        let command = ShellBuildCommand::new(registry(&["echo \"[$HOME]\""]));

        let output = command.run(&invocation(dir.path()), &CancellationToken::new()).unwrap();
        assert_eq!(output.stdout.trim(), "[]");
    }

    #[test]
    fn test_failing_step_stops_sequence() {
        let dir = tempfile::tempdir().unwrap();
        let command = ShellBuildCommand::new(registry(&["echo oops >&2; exit 3", "echo never"]));

        let output = command.run(&invocation(dir.path()), &CancellationToken::new()).unwrap();
        assert!(!output.success());
        assert_eq!(output.exit_code, Some(3));
        assert_eq!(output.stderr.trim(), "oops");
        assert!(!output.stdout.contains("never"));
    }

    #[test]
    fn test_timeout_kills_step() {
        let dir = tempfile::tempdir().unwrap();
        let command = ShellBuildCommand::new(registry(&["sleep 5"]));
        let mut inv = invocation(dir.path());
        inv.timeout = Some(Duration::from_millis(200));

        let started = Instant::now();
        let output = command.run(&inv, &CancellationToken::new()).unwrap();
        assert!(output.timed_out);
        assert!(!output.success());
        assert!(started.elapsed() < Duration::from_secs(4));
    }

    #[test]
    fn test_cancellation_kills_step() {
        let dir = tempfile::tempdir().unwrap();
        let command = ShellBuildCommand::new(registry(&["sleep 5"]));
        let inv = invocation(dir.path());
        let cancel = CancellationToken::new();

        let remote = cancel.clone();
        let canceller = thread::spawn(move || {
            thread::sleep(Duration::from_millis(200));
            remote.cancel();
        });

        let output = command.run(&inv, &cancel).unwrap();
        canceller.join().unwrap();
        assert!(output.cancelled);
        assert!(!output.success());
    }

    #[test]
    fn test_noop_writes_marker() {
        let dir = tempfile::tempdir().unwrap();
        let inv = invocation(dir.path());
        let output = NoopBuildCommand.run(&inv, &CancellationToken::new()).unwrap();
        assert!(output.success());
        let marker = fs::read_to_string(inv.prefix.join(INSTALL_MARKER)).unwrap();
        assert_eq!(marker.trim(), "demo@1.2");
    }
}
