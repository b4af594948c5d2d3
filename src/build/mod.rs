// src/build/mod.rs

//! Parallel execution of build plans
//!
//! The [`Scheduler`] owns every state transition of a plan's nodes. Builds
//! run on a bounded rayon pool; each worker reports back over a channel and
//! the coordinating thread decides what becomes ready next. A node is
//! dispatched only once all of its dependencies succeeded. When a node fails
//! its transitive dependents are skipped while unrelated branches keep
//! building, unless `fail_fast` is set, in which case the shared
//! [`CancellationToken`] stops everything. A node whose directories or
//! environment cannot be set up aborts the whole build with an error.

mod cancel;
mod command;
mod environment;
mod report;

pub use cancel::CancellationToken;
pub use command::{
    BuildCommand, BuildInvocation, CommandOutput, INSTALL_MARKER, NoopBuildCommand,
    ShellBuildCommand,
};
pub use environment::{Environment, EnvironmentComposer, dir_variable};
pub use report::{BuildReport, NodeReport};

use crate::config::KilnConfig;
use crate::error::{Error, Result};
use crate::plan::{BuildPlan, BuildState, NodeId};
use crate::recipe::RecipeRegistry;
use chrono::Utc;
use std::collections::BTreeSet;
use std::fs;
use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::mpsc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Options controlling a build
#[derive(Debug, Clone)]
pub struct BuildOptions {
    pub max_parallelism: usize,
    pub dry_run: bool,
    pub fail_fast: bool,
    pub install_root: PathBuf,
    pub stage_root: PathBuf,
    pub keep_stage: bool,
    pub command_timeout: Option<Duration>,
    pub base_path: String,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self::from_config(&KilnConfig::default())
    }
}

impl BuildOptions {
    pub fn from_config(config: &KilnConfig) -> Self {
        Self {
            max_parallelism: config.max_parallelism(),
            dry_run: false,
            fail_fast: config.build.fail_fast,
            install_root: config.paths.install_root.clone(),
            stage_root: config.paths.stage_root.clone(),
            keep_stage: config.build.keep_stage,
            command_timeout: config.command_timeout(),
            base_path: config.build.base_path.clone(),
        }
    }

    fn workers(&self) -> usize {
        self.max_parallelism.max(1)
    }
}

/// Message from a worker to the coordinator
struct Completion {
    id: NodeId,
    result: Result<CommandOutput>,
    elapsed: Duration,
}

pub struct Scheduler {
    registry: Arc<RecipeRegistry>,
    command: Arc<dyn BuildCommand>,
    cancel: CancellationToken,
}

impl Scheduler {
    pub fn new(registry: Arc<RecipeRegistry>, command: Arc<dyn BuildCommand>) -> Self {
        Self {
            registry,
            command,
            cancel: CancellationToken::new(),
        }
    }

    /// Token that aborts a running [`Scheduler::execute`] from another thread
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Build every node of `plan`
    ///
    /// Command failures end up in the report. Setup problems are returned
    /// as errors once running commands have been cancelled and collected:
    /// a worker pool that cannot start, an unknown recipe, a dependency
    /// without an install location, or a stage directory that cannot be
    /// created.
    pub fn execute(&self, plan: &mut BuildPlan, options: &BuildOptions) -> Result<BuildReport> {
        let started_at = Utc::now();
        let mut reports: Vec<NodeReport> = (0..plan.len())
            .map(|i| NodeReport::new(plan, NodeId(i)))
            .collect();

        if options.dry_run {
            for id in plan.order() {
                info!("Would build {}", plan.node(*id));
            }
            return Ok(finish(plan, reports, true, false, started_at));
        }

        let workers = options.workers();
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|i| format!("kiln-build-{}", i))
            .build()
            .map_err(|e| Error::ConfigError(format!("Failed to start build workers: {}", e)))?;

        info!("Building {} packages with {} workers", plan.len(), workers);

        let position: Vec<usize> = {
            let mut position = vec![0; plan.len()];
            for (pos, id) in plan.order().iter().enumerate() {
                position[id.0] = pos;
            }
            position
        };
        let mut waiting: Vec<usize> = (0..plan.len())
            .map(|i| plan.dependencies(NodeId(i)).count())
            .collect();
        let mut ready: BTreeSet<usize> = (0..plan.len())
            .filter(|i| waiting[*i] == 0)
            .map(|i| position[i])
            .collect();

        let (tx, rx) = mpsc::channel::<Completion>();
        let mut running = 0usize;

        loop {
            while running < workers && !self.cancel.is_cancelled() {
                let Some(pos) = ready.pop_first() else {
                    break;
                };
                let id = plan.order()[pos];

                let invocation = match self.prepare(plan, id, options) {
                    Ok(invocation) => invocation,
                    Err(e) => {
                        warn!("Cannot start build of {}: {}", plan.node(id).key, e);
                        self.cancel.cancel();
                        for _ in 0..running {
                            if rx.recv().is_err() {
                                break;
                            }
                        }
                        return Err(e);
                    }
                };

                info!("Building {}", plan.node(id));
                plan.node_mut(id).state = BuildState::Running;
                reports[id.0].prefix = Some(invocation.prefix.clone());
                reports[id.0].started_at = Some(Utc::now());
                running += 1;

                let command = Arc::clone(&self.command);
                let cancel = self.cancel.clone();
                let tx = tx.clone();
                pool.spawn(move || {
                    let start = Instant::now();
                    let result = panic::catch_unwind(AssertUnwindSafe(|| command.run(&invocation, &cancel)))
                        .unwrap_or_else(|_| {
                            Err(Error::BuildCommand {
                                package: invocation.spec.name.clone(),
                                exit_code: None,
                                stderr: "build command panicked".to_string(),
                            })
                        });
                    let _ = tx.send(Completion {
                        id,
                        result,
                        elapsed: start.elapsed(),
                    });
                });
            }

            if running == 0 {
                break;
            }

            let Ok(completion) = rx.recv() else {
                break;
            };
            running -= 1;
            let id = completion.id;

            let report = &mut reports[id.0];
            report.finished_at = Some(Utc::now());
            report.duration = Some(completion.elapsed);

            let outcome = match completion.result {
                Ok(output) => {
                    report.exit_code = output.exit_code;
                    report.stdout = output.stdout.clone();
                    report.stderr = output.stderr.clone();
                    if output.success() {
                        Ok(())
                    } else {
                        Err(failure_message(plan, id, &output, options))
                    }
                }
                Err(e) => Err(e.to_string()),
            };

            match outcome {
                Ok(()) => {
                    info!("Built {} in {:.1}s", plan.node(id).key, completion.elapsed.as_secs_f64());
                    plan.node_mut(id).state = BuildState::Success;
                    if !options.keep_stage {
                        remove_stage(options, plan, id);
                    }
                    let dependents: Vec<NodeId> = plan.dependents(id).collect();
                    for dependent in dependents {
                        waiting[dependent.0] -= 1;
                        if waiting[dependent.0] == 0 && plan.node(dependent).state == BuildState::Pending {
                            ready.insert(position[dependent.0]);
                        }
                    }
                }
                Err(message) => {
                    warn!("Build of {} failed: {}", plan.node(id).key, message);
                    reports[id.0].error = Some(message);
                    self.fail(plan, id, &mut ready, &position, options);
                }
            }
        }

        let cancelled = self.cancel.is_cancelled();
        for i in 0..plan.len() {
            let node = plan.node_mut(NodeId(i));
            if node.state == BuildState::Pending {
                debug!("Skipping {}: build cancelled", node.key);
                node.state = BuildState::Skipped;
                reports[i].error = Some("build cancelled".to_string());
            }
        }

        for report in &mut reports {
            report.state = plan.node(report.id).state;
        }
        let report = finish(plan, reports, false, cancelled, started_at);
        info!(
            "Build finished: {} built, {} failed, {} skipped",
            report.count(BuildState::Success),
            report.count(BuildState::Failed),
            report.count(BuildState::Skipped)
        );
        Ok(report)
    }

    /// Assign directories and compose the environment for `id`
    fn prepare(&self, plan: &mut BuildPlan, id: NodeId, options: &BuildOptions) -> Result<BuildInvocation> {
        let dir_name = plan.node(id).dir_name();
        let prefix = options.install_root.join(&dir_name);
        let stage_dir = options.stage_root.join(&dir_name);
        fs::create_dir_all(&stage_dir).map_err(|e| Error::io(&stage_dir, e))?;
        plan.node_mut(id).prefix = Some(prefix.clone());

        let env = EnvironmentComposer::new(&self.registry, &options.base_path).compose(plan, id)?;
        let node = plan.node(id);

        Ok(BuildInvocation {
            spec: node.spec.clone(),
            key: node.key.clone(),
            prefix,
            stage_dir,
            env,
            jobs: options.workers(),
            timeout: options.command_timeout,
        })
    }

    /// Mark `id` failed and skip everything downstream of it
    fn fail(
        &self,
        plan: &mut BuildPlan,
        id: NodeId,
        ready: &mut BTreeSet<usize>,
        position: &[usize],
        options: &BuildOptions,
    ) {
        plan.node_mut(id).state = BuildState::Failed;
        for dependent in plan.transitive_dependents(id) {
            let node = plan.node_mut(dependent);
            if node.state == BuildState::Pending {
                debug!("Skipping {}: depends on failed {}", node.key, id);
                node.state = BuildState::Skipped;
                ready.remove(&position[dependent.0]);
            }
        }
        if options.fail_fast && !self.cancel.is_cancelled() {
            info!("Cancelling remaining builds (fail fast)");
            self.cancel.cancel();
        }
    }
}

fn failure_message(plan: &BuildPlan, id: NodeId, output: &CommandOutput, options: &BuildOptions) -> String {
    let package = plan.node(id).name().to_string();
    if output.cancelled {
        Error::Cancelled(package).to_string()
    } else if output.timed_out {
        let secs = options.command_timeout.map(|t| t.as_secs()).unwrap_or_default();
        format!("Build of '{}' timed out after {}s", package, secs)
    } else {
        Error::BuildCommand {
            package,
            exit_code: output.exit_code,
            stderr: output.stderr.clone(),
        }
        .to_string()
    }
}

fn remove_stage(options: &BuildOptions, plan: &BuildPlan, id: NodeId) {
    let stage = options.stage_root.join(plan.node(id).dir_name());
    if let Err(e) = fs::remove_dir_all(&stage) {
        debug!("Failed to remove stage {}: {}", stage.display(), e);
    }
}

fn finish(
    plan: &BuildPlan,
    mut reports: Vec<NodeReport>,
    dry_run: bool,
    cancelled: bool,
    started_at: chrono::DateTime<Utc>,
) -> BuildReport {
    let order: Vec<NodeReport> = plan
        .order()
        .iter()
        .map(|id| std::mem::replace(&mut reports[id.0], NodeReport::new(plan, *id)))
        .collect();
    BuildReport {
        nodes: order,
        dry_run,
        cancelled,
        started_at,
        finished_at: Utc::now(),
    }
}
