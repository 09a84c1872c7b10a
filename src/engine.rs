// DAMONBENCH LIFECYCLE ENGINE
// DRIVES ONE CONFIGURATION AT A TIME THROUGH:
//
//   Idle -> Preparing -> Running -> CapturingResult -> TearingDown -> Done
//                 \___________\______________\______-> Aborted
//
// PREPARATION ORDER (EACH REVERSAL REGISTERED BEFORE ITS STEP IS APPLIED):
//   1. DROP PAGE CACHE         (ONE-SHOT)
//   2. SWAP OFF                (ONE-SHOT)
//   3. STOP OPTIMIZER          (BASELINE ONLY, ONE-SHOT)
//   4. CREATE CGROUP + LIMIT   -> DeleteBoundary
//   5. START OPTIMIZER         -> DetachOptimizer (OPTIMIZED ONLY)
//   6. SMT OFF                 -> EnableSmt (ONLY IF SMT WAS "on" AT PROBE)
// TEARDOWN UNWINDS LIFO: SMT COMES BACK FIRST, RIGHT AFTER THE WORKLOAD.
//
// SMT OFF COMES LAST, NOT BEFORE THE CGROUP: STRICT LIFO THEN PUTS
// SMT ON FIRST IN TEARDOWN, SO THE HOST RUNS WITH SMT OFF ONLY FOR THE
// WORKLOAD ITSELF. THE CGROUP AND OPTIMIZER STEPS DO NOT DEPEND ON SMT.
//
// STRICTLY SEQUENTIAL. EVERY RUN OWNS THE ONE CGROUP NAME AND THE ONE
// OPTIMIZER ATTACHMENT FOR ITS WHOLE DURATION. NO WORKLOAD TIMEOUT: A HUNG
// WORKLOAD BLOCKS THE INVOCATION.

use std::fmt;
use std::time::Instant;

use tracing::{debug, error, info, warn};

use crate::boundary::{BoundaryManager, BoundaryName, IsolationBoundary};
use crate::cleanup::{self, CleanupJournal, CleanupStack, CleanupTask};
use crate::error::{BenchError, Result, Severity};
use crate::exec::{Executor, WorkloadInvocation};
use crate::machine::{MachineState, SmtControl};
use crate::matrix::{ConfigRecord, CGROUP_NAME, CGROUP_SIZE};
use crate::optimizer::OptimizerController;
use crate::results::{BenchmarkResult, ResultCollector, RUNTIME_SEC};
use crate::workload::Workload;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RunState {
    Idle,
    Preparing,
    Running,
    CapturingResult,
    TearingDown,
    Done,
    Aborted,
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RunState::Idle => "IDLE",
            RunState::Preparing => "PREPARING",
            RunState::Running => "RUNNING",
            RunState::CapturingResult => "CAPTURING",
            RunState::TearingDown => "TEARING_DOWN",
            RunState::Done => "DONE",
            RunState::Aborted => "ABORTED",
        };
        f.write_str(s)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum FailurePolicy {
    // A FAILED RUN ENDS THE INVOCATION. MEASUREMENTS AFTER A FAULT ARE SUSPECT.
    #[default]
    AbortInvocation,
    // RECOVERABLE RUN FAILURES ARE LOGGED AND THE NEXT CONFIGURATION RUNS.
    // FATAL FAILURES STILL END THE INVOCATION.
    ContinueOnRunFailure,
}

#[derive(Debug)]
pub enum RunOutcome {
    Completed(BenchmarkResult),
    RunFailed(BenchError),
    // A RESULT MAY SURVIVE A FATAL TEARDOWN: THE MEASUREMENT ITSELF WAS VALID
    Fatal {
        error: BenchError,
        result: Option<BenchmarkResult>,
    },
}

#[derive(Clone, Debug, Default)]
pub struct EngineSettings {
    pub policy: FailurePolicy,
    pub boundaries: BoundaryManager,
    pub optimizer: OptimizerController,
}

// PARSED VIEW OF THE HOST-FACING KEYS OF ONE RECORD
struct RunTarget {
    boundary: BoundaryName,
    memory_limit: u64,
}

impl RunTarget {
    fn from_config(config: &ConfigRecord) -> Result<Self> {
        let boundary = BoundaryName::parse(config.get_str(CGROUP_NAME)?)?;
        let memory_limit = config.get_u64(CGROUP_SIZE)?;
        if memory_limit == 0 {
            return Err(BenchError::Configuration(format!(
                "{} must be non-zero",
                CGROUP_SIZE
            )));
        }
        Ok(Self {
            boundary,
            memory_limit,
        })
    }
}

pub struct Engine<E: Executor> {
    exec: E,
    machine: MachineState,
    boundaries: BoundaryManager,
    optimizer: OptimizerController,
    cleanup: CleanupStack,
    policy: FailurePolicy,
    state: RunState,
    trace: Vec<RunState>,
    active: Option<IsolationBoundary>,
}

impl<E: Executor> Engine<E> {
    pub fn new(mut exec: E, settings: EngineSettings) -> Self {
        let machine = MachineState::probe(&mut exec);
        Self::with_machine(exec, machine, settings)
    }

    pub fn with_machine(exec: E, machine: MachineState, settings: EngineSettings) -> Self {
        Self {
            exec,
            machine,
            boundaries: settings.boundaries,
            optimizer: settings.optimizer,
            cleanup: CleanupStack::new(),
            policy: settings.policy,
            state: RunState::Idle,
            trace: vec![RunState::Idle],
            active: None,
        }
    }

    // SHARE PENDING CLEANUP WITH A TERMINATION HANDLER
    pub fn with_journal(mut self, journal: CleanupJournal) -> Self {
        self.cleanup = CleanupStack::with_journal(journal);
        self
    }

    pub fn executor(&self) -> &E {
        &self.exec
    }

    pub fn executor_mut(&mut self) -> &mut E {
        &mut self.exec
    }

    pub fn machine(&self) -> &MachineState {
        &self.machine
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    // STATES VISITED BY THE MOST RECENT run_one()
    pub fn last_run_states(&self) -> &[RunState] {
        &self.trace
    }

    pub fn active_boundary(&self) -> Option<&IsolationBoundary> {
        self.active.as_ref()
    }

    pub fn pending_cleanup(&self) -> &[CleanupTask] {
        self.cleanup.pending()
    }

    fn enter(&mut self, next: RunState) {
        debug!(from = %self.state, to = %next, "run state");
        self.state = next;
        self.trace.push(next);
    }

    // ONE-SHOT TOGGLES ARE BEST-EFFORT UNLESS THE EXECUTOR ITSELF IS GONE
    fn best_effort(&self, what: &str, result: Result<()>) -> Result<()> {
        match result {
            Ok(()) => Ok(()),
            Err(e) if e.severity() == Severity::Fatal => Err(e),
            Err(e) => {
                warn!(step = what, error = %e, "best-effort step failed, continuing");
                Ok(())
            }
        }
    }

    fn prepare<W: Workload>(
        &mut self,
        workload: &W,
        config: &ConfigRecord,
    ) -> Result<(BoundaryName, WorkloadInvocation)> {
        // RESOLVE EVERYTHING THAT CAN FAIL WITHOUT TOUCHING THE HOST FIRST
        let target = RunTarget::from_config(config)?;
        let invocation = workload.command(config)?;
        let optimized = target.boundary.is_optimized();

        let r = self.machine.drop_page_cache(&mut self.exec);
        self.best_effort("drop page cache", r)?;
        let r = self.machine.disable_swap(&mut self.exec);
        self.best_effort("disable swap", r)?;

        if !optimized {
            self.optimizer.ensure_stopped(&mut self.exec)?;
        }

        self.cleanup.register(CleanupTask::DeleteBoundary(target.boundary));
        let mut boundary =
            self.boundaries
                .create(&mut self.exec, target.boundary, target.memory_limit)?;

        if optimized {
            self.cleanup.register(CleanupTask::DetachOptimizer);
            let attached = self.optimizer.attach(&mut self.exec, &mut boundary);
            self.active = Some(boundary);
            attached?;
        } else {
            self.active = Some(boundary);
        }

        // A JOURNALED EnableSmt MUST MEAN WE MAY HAVE TURNED SMT OFF
        if self.machine.smt_at_start() == SmtControl::On {
            self.cleanup.register(CleanupTask::EnableSmt);
            let r = self.machine.disable_smt(&mut self.exec).map(|_| ());
            self.best_effort("disable SMT", r)?;
        }

        Ok((target.boundary, invocation))
    }

    fn measure<W: Workload>(
        &mut self,
        workload: &W,
        config: &ConfigRecord,
        boundary: BoundaryName,
        invocation: &WorkloadInvocation,
    ) -> Result<BenchmarkResult> {
        self.enter(RunState::Running);
        let start = Instant::now();
        let output = self.exec.run_workload(boundary.as_str(), invocation);
        let elapsed = start.elapsed();

        let output = output.map_err(|source| {
            if source.is_host_failure() {
                BenchError::HostState {
                    what: format!("launch {}", workload.name()),
                    source,
                }
            } else {
                BenchError::WorkloadExecution {
                    benchmark: workload.name().to_string(),
                    source,
                }
            }
        })?;

        self.enter(RunState::CapturingResult);
        let metrics = workload.parse_results(&output, elapsed)?;
        Ok(BenchmarkResult::new(config.clone(), metrics))
    }

    fn teardown(&mut self) -> Result<()> {
        let tasks = self.cleanup.drain_lifo();
        debug!(tasks = tasks.len(), "unwinding cleanup");
        let r = cleanup::unwind(
            tasks,
            &mut self.exec,
            &mut self.machine,
            &self.boundaries,
            &self.optimizer,
        );
        self.active = None;
        r
    }

    pub fn run_one<W: Workload>(&mut self, workload: &W, config: &ConfigRecord) -> RunOutcome {
        self.state = RunState::Idle;
        self.trace.clear();
        self.trace.push(RunState::Idle);

        self.enter(RunState::Preparing);
        let measured = self
            .prepare(workload, config)
            .and_then(|(boundary, invocation)| {
                self.measure(workload, config, boundary, &invocation)
            });

        match measured {
            Ok(result) => {
                self.enter(RunState::TearingDown);
                match self.teardown() {
                    Ok(()) => {
                        self.enter(RunState::Done);
                        RunOutcome::Completed(result)
                    }
                    // ANYTHING LEFT ALIVE (BUSY CGROUP, SMT OFF) MAKES THE
                    // NEXT RUN UNSAFE, WHATEVER THE ERROR'S OWN SEVERITY
                    Err(error) => {
                        self.enter(RunState::Aborted);
                        RunOutcome::Fatal {
                            error,
                            result: Some(result),
                        }
                    }
                }
            }
            Err(error) => {
                self.enter(RunState::Aborted);
                error!(config = %config, error = %error, "run aborted, rolling back");
                if let Err(teardown) = self.teardown() {
                    // THE DEGRADED HOST OUTRANKS THE ORIGINAL FAULT
                    error!(original = %error, "rollback could not restore the host");
                    return RunOutcome::Fatal {
                        error: teardown,
                        result: None,
                    };
                }
                match error.severity() {
                    Severity::Run => RunOutcome::RunFailed(error),
                    Severity::Fatal => RunOutcome::Fatal {
                        error,
                        result: None,
                    },
                }
            }
        }
    }

    // REJECT A MATRIX THE ENGINE CANNOT RUN BEFORE ANY HOST STATE CHANGES
    fn preflight(&self, configs: &[ConfigRecord]) -> Result<()> {
        let first = configs.first().ok_or_else(|| {
            BenchError::Configuration("no configurations to run".to_string())
        })?;
        let keys: Vec<&str> = first.keys().collect();

        for config in configs {
            if !config.keys().eq(keys.iter().copied()) {
                return Err(BenchError::Configuration(format!(
                    "inconsistent option keys: `{}` vs `{}`",
                    config, first
                )));
            }
            let target = RunTarget::from_config(config)?;
            if target.boundary.is_optimized() && self.optimizer.descriptor().is_none() {
                return Err(BenchError::Configuration(format!(
                    "{} runs require an optimizer config",
                    target.boundary
                )));
            }
        }
        Ok(())
    }

    pub fn run_all<W: Workload>(
        &mut self,
        workload: &W,
        configs: &[ConfigRecord],
        results: &mut ResultCollector,
    ) -> Result<()> {
        self.preflight(configs)?;

        let total = configs.len();
        let mut failed = 0usize;
        let mut outcome = Ok(());

        for (i, config) in configs.iter().enumerate() {
            info!(run = i + 1, of = total, config = %config, "run starting");
            match self.run_one(workload, config) {
                RunOutcome::Completed(result) => {
                    info!(
                        run = i + 1,
                        runtime_sec = result.metric(RUNTIME_SEC).unwrap_or(f64::NAN),
                        "run complete"
                    );
                    results.push(result);
                }
                RunOutcome::RunFailed(error) => match self.policy {
                    FailurePolicy::ContinueOnRunFailure => {
                        failed += 1;
                        warn!(run = i + 1, error = %error, "run failed, continuing with next configuration");
                    }
                    FailurePolicy::AbortInvocation => {
                        outcome = Err(error);
                        break;
                    }
                },
                RunOutcome::Fatal { error, result } => {
                    if let Some(result) = result {
                        results.push(result);
                    }
                    outcome = Err(error);
                    break;
                }
            }
        }

        // EVERY EXIT PATH LEAVES SMT AS IT WAS FOUND
        if let Err(e) = self.machine.enable_smt(&mut self.exec) {
            error!(error = %e, "final SMT restore failed");
            if outcome.is_ok() {
                outcome = Err(e);
            }
        }

        if failed > 0 {
            warn!(failed, of = total, "some runs failed");
        }
        outcome
    }
}

// A PANIC IN A WORKLOAD HOOK MUST NOT LEAVE THE HOST DEGRADED
impl<E: Executor> Drop for Engine<E> {
    fn drop(&mut self) {
        if !self.cleanup.is_empty() {
            warn!(pending = self.cleanup.pending().len(), "engine dropped mid-run, unwinding");
            let _ = self.teardown();
        }
        if let Err(e) = self.machine.enable_smt(&mut self.exec) {
            error!(error = %e, "SMT restore on drop failed");
        }
    }
}
