use anyhow::anyhow;
use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{Semaphore, mpsc};
use tracing::{debug, info, warn};

use super::events::SchedulerEvent;
use super::flusher::OrderedFlusher;
use super::plan::{SchedulerConfig, Step, plan_steps};
use crate::checkpoint::{Checkpoint, CheckpointStore, tree_digest};
use crate::errors::PipelineError;
use crate::flow_config::ToolConfig;
use crate::gate::{ProcessToolRunner, QualityGateDecision, QualityGateRunner, ToolRunner};
use crate::hooks::{HookContext, HookRegistry};
use crate::lane::Lane;
use crate::stage::{StageContext, StageId, StageRunner};
use crate::status::{RunState, StatusRecord, StatusTracker, WorkflowRun};

/// What a finished (or halted) invocation reports back.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub run: WorkflowRun,
    pub record: StatusRecord,
    /// Stages executed successfully by this invocation, ascending
    pub executed: Vec<StageId>,
    /// The run was already complete; nothing was executed
    pub already_complete: bool,
}

/// Result of one stage execution on a worker thread.
struct MemberReport {
    stage: StageId,
    log: Vec<String>,
    result: Result<Option<Checkpoint>, PipelineError>,
}

/// Drives a change through its lane.
///
/// The controlling task owns the [`WorkflowRun`] and is the only writer of the
/// status record. Stage work runs on blocking worker threads; members of the
/// parallel group share a pool bounded by [`SchedulerConfig::workers`].
pub struct StageScheduler {
    config: SchedulerConfig,
    runner: Arc<dyn StageRunner>,
    hooks: Arc<HookRegistry>,
    tools: Arc<BTreeMap<String, ToolConfig>>,
    tool_runner: Arc<dyn ToolRunner>,
    state_root: PathBuf,
    status: StatusTracker,
    event_tx: Option<mpsc::Sender<SchedulerEvent>>,
}

impl StageScheduler {
    /// `state_root` holds one state directory per change (status, checkpoints, gate logs).
    pub fn new(config: SchedulerConfig, runner: Arc<dyn StageRunner>, state_root: &Path) -> Self {
        Self {
            config,
            runner,
            hooks: Arc::new(HookRegistry::new()),
            tools: Arc::new(BTreeMap::new()),
            tool_runner: Arc::new(ProcessToolRunner),
            state_root: state_root.to_path_buf(),
            status: StatusTracker::new(state_root),
            event_tx: None,
        }
    }

    pub fn with_hooks(mut self, hooks: HookRegistry) -> Self {
        self.hooks = Arc::new(hooks);
        self
    }

    pub fn with_tools(
        mut self,
        tools: BTreeMap<String, ToolConfig>,
        tool_runner: Arc<dyn ToolRunner>,
    ) -> Self {
        self.tools = Arc::new(tools);
        self.tool_runner = tool_runner;
        self
    }

    /// Set event channel for progress reporting.
    pub fn with_event_channel(mut self, tx: mpsc::Sender<SchedulerEvent>) -> Self {
        self.event_tx = Some(tx);
        self
    }

    async fn emit_event(&self, event: SchedulerEvent) {
        if let Some(tx) = &self.event_tx {
            let _ = tx.send(event).await;
        }
    }

    /// Run (or resume) `ctx.change_id` through `lane`, writing stage output to `out`.
    ///
    /// Without `resume` an existing status record is refused. With `resume`
    /// the record must name the same lane, its checkpoints must exist and the
    /// change directory must still hash to the recorded digest.
    pub async fn execute(
        &self,
        lane: &Lane,
        ctx: StageContext,
        resume: bool,
        out: &mut (dyn Write + Send),
    ) -> Result<RunReport, PipelineError> {
        let change_id = ctx.change_id.clone();
        let state_dir = self.state_root.join(&change_id);
        let checkpoints = CheckpointStore::new(&state_dir);

        let existing = self.status.read(&change_id)?;
        let (mut run, mut gate) = match existing {
            Some(record) if resume => {
                if record.status == RunState::Completed {
                    info!(change_id = %change_id, "Run already complete, nothing to resume");
                    return Ok(RunReport {
                        run: WorkflowRun::from_record(&record),
                        record,
                        executed: Vec::new(),
                        already_complete: true,
                    });
                }
                self.validate_resume(&record, lane, &ctx.change_dir, &checkpoints)?;
                (WorkflowRun::from_record(&record), record.quality_gate)
            }
            Some(record) => {
                return Err(PipelineError::InvalidInvocation(format!(
                    "change '{}' already has a {} run; use --resume to continue or `changeflow reset {}` to start over",
                    change_id, record.status, change_id
                )));
            }
            None => {
                if resume {
                    info!(change_id = %change_id, "No status record found, starting a new run");
                }
                (WorkflowRun::new(&change_id, lane.name), None)
            }
        };

        std::fs::create_dir_all(&ctx.change_dir)
            .map_err(|e| PipelineError::io(&ctx.change_dir, e))?;
        run.state = RunState::Running;
        run.last_error = None;
        self.persist(&mut run, &ctx.change_dir, gate.as_ref())?;

        let pending: Vec<StageId> = lane
            .stages
            .iter()
            .copied()
            .filter(|s| !run.completed_stages.contains(s))
            .collect();
        let skipped: Vec<StageId> = lane
            .stages
            .iter()
            .copied()
            .filter(|s| run.completed_stages.contains(s))
            .collect();
        info!(
            change_id = %change_id,
            lane = %lane.name,
            pending = pending.len(),
            skipped = skipped.len(),
            "Starting pipeline run"
        );
        self.emit_event(SchedulerEvent::RunStarted {
            change_id: change_id.clone(),
            lane: lane.name,
            pending: pending.clone(),
            skipped,
            resumed: resume,
        })
        .await;

        let ctx = Arc::new(ctx);
        let steps = plan_steps(&lane.stages, &run.completed_stages, &self.config);
        let mut executed = Vec::new();

        for step in steps {
            let outcome = match step {
                Step::Serial(stage) => {
                    self.run_serial(stage, lane, &ctx, &state_dir, &checkpoints, &mut run, &mut gate, out)
                        .await
                        .map(|()| vec![stage])
                }
                Step::Group(members) => {
                    self.run_group(&members, &ctx, &checkpoints, &mut run, gate.as_ref(), out)
                        .await
                }
            };
            match outcome {
                Ok(done) => executed.extend(done),
                Err(err) => {
                    self.emit_event(SchedulerEvent::RunCompleted { success: false })
                        .await;
                    return Err(err);
                }
            }
        }

        run.complete();
        let record = self.persist(&mut run, &ctx.change_dir, gate.as_ref())?;
        info!(change_id = %change_id, executed = executed.len(), "Pipeline run completed");
        self.emit_event(SchedulerEvent::RunCompleted { success: true })
            .await;

        Ok(RunReport {
            run,
            record,
            executed,
            already_complete: false,
        })
    }

    fn validate_resume(
        &self,
        record: &StatusRecord,
        lane: &Lane,
        change_dir: &Path,
        checkpoints: &CheckpointStore,
    ) -> Result<(), PipelineError> {
        if record.lane != lane.name {
            return Err(PipelineError::InvalidInvocation(format!(
                "change '{}' was started on lane '{}', cannot resume on lane '{}'",
                record.change_id, record.lane, lane.name
            )));
        }
        if !record.resumable {
            return Err(PipelineError::InvalidInvocation(format!(
                "run for '{}' is not resumable; use `changeflow reset {}` or restore a checkpoint",
                record.change_id, record.change_id
            )));
        }
        for &stage in &record.completed_stages {
            if checkpoints.latest_for_stage(stage)?.is_none() {
                return Err(PipelineError::CheckpointNotFound {
                    id: format!("{:02}-*", stage.index()),
                });
            }
        }
        let actual = tree_digest(change_dir)?;
        if actual != record.tree_digest {
            return Err(PipelineError::IntegrityMismatch {
                change_id: record.change_id.clone(),
                expected: record.tree_digest.clone(),
                actual,
            });
        }
        debug!(change_id = %record.change_id, "Resume preconditions hold");
        Ok(())
    }

    /// Write the status record with a fresh digest of the change directory.
    fn persist(
        &self,
        run: &mut WorkflowRun,
        change_dir: &Path,
        gate: Option<&QualityGateDecision>,
    ) -> Result<StatusRecord, PipelineError> {
        run.tree_digest = Some(tree_digest(change_dir)?);
        Ok(self.status.write(run, gate)?)
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_serial(
        &self,
        stage: StageId,
        lane: &Lane,
        ctx: &Arc<StageContext>,
        state_dir: &Path,
        checkpoints: &CheckpointStore,
        run: &mut WorkflowRun,
        gate: &mut Option<QualityGateDecision>,
        out: &mut (dyn Write + Send),
    ) -> Result<(), PipelineError> {
        run.mark_running(stage);
        self.persist(run, &ctx.change_dir, gate.as_ref())?;
        self.emit_event(SchedulerEvent::StageStarted { stage }).await;

        let report = {
            let runner = self.runner.clone();
            let hooks = self.hooks.clone();
            let ctx = ctx.clone();
            blocking(stage, move || Ok(execute_member(stage, &ctx, runner.as_ref(), &hooks)))
            .await
        };
        let mut report = report.unwrap_or_else(|err| MemberReport {
            stage,
            log: Vec::new(),
            result: Err(err),
        });
        let mut extra = Vec::new();

        if report.result.is_ok() && stage == self.config.quality_gate_stage {
            match self.evaluate_gate(stage, lane, ctx, state_dir).await {
                Ok(decision) => {
                    extra.push(format!("quality gate {}", decision.summary()));
                    self.emit_event(SchedulerEvent::GateEvaluated {
                        stage,
                        passed: decision.passed(),
                        advisory: decision.advisory,
                        summary: decision.summary(),
                    })
                    .await;
                    if decision.blocks() {
                        report.result = Err(PipelineError::QualityGateFailure {
                            stage,
                            summary: decision.summary(),
                        });
                    } else if !decision.passed() {
                        warn!(lane = %lane.name, "Advisory quality gate failed: {}", decision.summary());
                    }
                    *gate = Some(decision);
                }
                Err(err) => report.result = Err(err),
            }
        }

        if report.result.is_ok() {
            let store = checkpoints.clone();
            let dir = ctx.change_dir.clone();
            report.result = blocking(stage, move || store.save(stage, &dir))
                .await
                .map(Some);
        }

        let mut lines = report.log.clone();
        lines.extend(extra);
        write_block(out, stage, &lines, &report.result)?;

        match report.result {
            Ok(checkpoint) => {
                run.mark_completed(stage);
                self.persist(run, &ctx.change_dir, gate.as_ref())?;
                self.emit_event(SchedulerEvent::StageCompleted {
                    stage,
                    checkpoint: checkpoint.map(|c| c.id).unwrap_or_default(),
                })
                .await;
                Ok(())
            }
            Err(err) => {
                self.emit_event(SchedulerEvent::StageFailed {
                    stage,
                    error: err.to_string(),
                })
                .await;
                self.fail(run, &ctx.change_dir, gate.as_ref(), &[(stage, &err)])?;
                Err(err)
            }
        }
    }

    /// Run pending parallel-group members on the bounded pool.
    ///
    /// After the first failure no further member is dispatched; members
    /// already running finish. Checkpoints and the completed set are written
    /// after every dispatched member has returned.
    async fn run_group(
        &self,
        members: &[StageId],
        ctx: &Arc<StageContext>,
        checkpoints: &CheckpointStore,
        run: &mut WorkflowRun,
        gate: Option<&QualityGateDecision>,
        out: &mut (dyn Write + Send),
    ) -> Result<Vec<StageId>, PipelineError> {
        let workers = self.config.workers.clamp(1, members.len().max(1));
        info!(members = members.len(), workers, "Dispatching parallel group");
        self.emit_event(SchedulerEvent::GroupStarted {
            stages: members.to_vec(),
            workers,
        })
        .await;
        if let Some(first) = members.first() {
            run.mark_running(*first);
            self.persist(run, &ctx.change_dir, gate)?;
        }

        let semaphore = Arc::new(Semaphore::new(workers));
        let cancelled = Arc::new(AtomicBool::new(false));
        let (tx, mut rx) = mpsc::unbounded_channel::<MemberReport>();
        let mut dispatched = Vec::new();
        let mut handles = Vec::new();

        for &stage in members {
            let permit = semaphore
                .clone()
                .acquire_owned()
                .await
                .map_err(|e| anyhow!("worker pool closed: {}", e))?;
            if cancelled.load(Ordering::SeqCst) {
                debug!(stage = %stage, "Not dispatching after group failure");
                break;
            }
            self.emit_event(SchedulerEvent::StageStarted { stage }).await;

            let runner = self.runner.clone();
            let hooks = self.hooks.clone();
            let ctx = ctx.clone();
            let tx = tx.clone();
            let cancelled = cancelled.clone();
            handles.push(tokio::task::spawn_blocking(move || {
                let report = execute_member(stage, &ctx, runner.as_ref(), &hooks);
                if report.result.is_err() {
                    // must be visible before the permit is released
                    cancelled.store(true, Ordering::SeqCst);
                }
                let _ = tx.send(report);
                drop(permit);
            }));
            dispatched.push(stage);
        }
        drop(tx);

        let mut reports: BTreeMap<StageId, MemberReport> = BTreeMap::new();
        while let Some(report) = rx.recv().await {
            reports.insert(report.stage, report);
        }
        for handle in handles {
            if let Err(e) = handle.await {
                warn!("Group worker did not finish cleanly: {}", e);
            }
        }
        for &stage in &dispatched {
            reports.entry(stage).or_insert_with(|| MemberReport {
                stage,
                log: Vec::new(),
                result: Err(PipelineError::StageExecution {
                    stage,
                    message: "stage worker panicked".to_string(),
                }),
            });
        }

        // Snapshots are taken only after the join, in ascending stage order, so
        // the current line of checkpoints follows stage order.
        for report in reports.values_mut() {
            if report.result.is_ok() {
                let store = checkpoints.clone();
                let dir = ctx.change_dir.clone();
                let stage = report.stage;
                report.result = blocking(stage, move || store.save(stage, &dir))
                    .await
                    .map(Some);
            }
        }

        let mut flusher = OrderedFlusher::new(dispatched.iter().copied(), &mut *out);
        for report in reports.values() {
            flusher
                .submit(report.stage, render_block(report.stage, &report.log, &report.result))
                .map_err(|e| PipelineError::io("<output>", e))?;
            match &report.result {
                Ok(checkpoint) => {
                    self.emit_event(SchedulerEvent::StageCompleted {
                        stage: report.stage,
                        checkpoint: checkpoint.as_ref().map(|c| c.id.clone()).unwrap_or_default(),
                    })
                    .await
                }
                Err(err) => {
                    self.emit_event(SchedulerEvent::StageFailed {
                        stage: report.stage,
                        error: err.to_string(),
                    })
                    .await
                }
            }
        }
        flusher
            .finish()
            .map_err(|e| PipelineError::io("<output>", e))?;

        let mut completed = Vec::new();
        let mut failures: Vec<(StageId, PipelineError)> = Vec::new();
        for (stage, report) in reports {
            match report.result {
                Ok(_) => {
                    run.mark_completed(stage);
                    completed.push(stage);
                }
                Err(err) => failures.push((stage, err)),
            }
        }
        let not_started: Vec<StageId> = members
            .iter()
            .copied()
            .filter(|s| !dispatched.contains(s))
            .collect();
        self.emit_event(SchedulerEvent::GroupCompleted {
            completed: completed.clone(),
            failed: failures.iter().map(|(s, _)| *s).collect(),
            not_started,
        })
        .await;

        if failures.is_empty() {
            self.persist(run, &ctx.change_dir, gate)?;
            return Ok(completed);
        }
        let refs: Vec<(StageId, &PipelineError)> = failures.iter().map(|(s, e)| (*s, e)).collect();
        self.fail(run, &ctx.change_dir, gate, &refs)?;
        // failures are ascending; report the lowest stage
        let (_, first) = failures.swap_remove(0);
        Err(first)
    }

    fn fail(
        &self,
        run: &mut WorkflowRun,
        change_dir: &Path,
        gate: Option<&QualityGateDecision>,
        failures: &[(StageId, &PipelineError)],
    ) -> Result<(), PipelineError> {
        let mut resumable = true;
        for (stage, err) in failures.iter().rev() {
            run.mark_failed(*stage, err.to_string());
            resumable &= err.resume_viable();
        }
        if let Some((stage, err)) = failures.first() {
            warn!(stage = %stage, "Stage failed: {}", err);
        }
        run.halt(resumable);
        self.persist(run, change_dir, gate)?;
        Ok(())
    }

    async fn evaluate_gate(
        &self,
        stage: StageId,
        lane: &Lane,
        ctx: &StageContext,
        state_dir: &Path,
    ) -> Result<QualityGateDecision, PipelineError> {
        let tools = self.tools.clone();
        let tool_runner = self.tool_runner.clone();
        let lane = lane.clone();
        let workdir = ctx.project_dir.clone();
        let output_dir = state_dir.join("gate");
        blocking(stage, move || {
            let decision = QualityGateRunner::new(&tools, tool_runner.as_ref(), workdir)
                .with_output_dir(output_dir)
                .run(&lane)?;
            Ok(decision)
        })
        .await
    }
}

/// Run hooks and the stage. Checkpoints are left to the controller.
fn execute_member(
    stage: StageId,
    ctx: &StageContext,
    runner: &dyn StageRunner,
    hooks: &HookRegistry,
) -> MemberReport {
    if let Err(err) = hooks.run_hooks(&HookContext::for_stage(stage, ctx)) {
        return MemberReport {
            stage,
            log: Vec::new(),
            result: Err(err),
        };
    }
    debug!(stage = %stage, change_id = %ctx.change_id, "Running stage");
    match runner.run(stage, ctx) {
        Ok(outcome) => MemberReport {
            stage,
            log: outcome.log,
            result: Ok(None),
        },
        Err(failure) => MemberReport {
            stage,
            log: failure.log,
            result: Err(PipelineError::StageExecution {
                stage,
                message: failure.message,
            }),
        },
    }
}

async fn blocking<T, F>(stage: StageId, f: F) -> Result<T, PipelineError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, PipelineError> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| PipelineError::StageExecution {
            stage,
            message: format!("stage worker panicked: {}", e),
        })?
}

/// Output block of one stage: its log lines and a closing status line.
fn render_block<T>(stage: StageId, log: &[String], result: &Result<T, PipelineError>) -> Vec<String> {
    let mut lines: Vec<String> = log.iter().map(|l| format!("[{}] {}", stage, l)).collect();
    match result {
        Ok(_) => lines.push(format!("[{}] done", stage)),
        Err(PipelineError::StageExecution { message, .. }) => {
            lines.push(format!("[{}] failed: {}", stage, message))
        }
        Err(err) => lines.push(format!("[{}] failed: {}", stage, err)),
    }
    lines
}

fn write_block<T>(
    out: &mut (dyn Write + Send),
    stage: StageId,
    log: &[String],
    result: &Result<T, PipelineError>,
) -> Result<(), PipelineError> {
    let mut flusher = OrderedFlusher::new([stage], &mut *out);
    flusher
        .submit(stage, render_block(stage, log, result))
        .map_err(|e| PipelineError::io("<output>", e))
}
