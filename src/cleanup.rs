// DAMONBENCH CLEANUP STACK
// EVERY REVERSIBLE PREPARATION STEP REGISTERS ITS REVERSAL BEFORE THE RUN
// MOVES ON. TEARDOWN POPS THE STACK (LIFO), SO IT UNDOES PREPARATION IN
// EXACTLY THE REVERSE ORDER, INCLUDING AFTER A PARTIAL PREPARATION.
//
// THE STACK IS MIRRORED INTO A JOURNAL SHARED WITH THE TERMINATION HANDLER.
// A SIGINT/SIGTERM MID-RUN REPLAYS WHATEVER IS STILL PENDING.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::{error, info, warn};

use crate::boundary::{BoundaryManager, BoundaryName};
use crate::error::{BenchError, Result};
use crate::exec::Executor;
use crate::machine::MachineState;
use crate::optimizer::OptimizerController;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CleanupTask {
    EnableSmt,
    DeleteBoundary(BoundaryName),
    DetachOptimizer,
}

impl CleanupTask {
    // WHAT A KILLED INVOCATION MAY HAVE LEFT BEHIND, IN REGISTRATION ORDER.
    // UNWOUND LIFO, SMT COMES BACK FIRST.
    pub fn outermost() -> Vec<CleanupTask> {
        vec![
            CleanupTask::DetachOptimizer,
            CleanupTask::DeleteBoundary(BoundaryName::Damon),
            CleanupTask::DeleteBoundary(BoundaryName::Baseline),
            CleanupTask::EnableSmt,
        ]
    }

    pub fn execute<E: Executor>(
        self,
        exec: &mut E,
        machine: &mut MachineState,
        boundaries: &BoundaryManager,
        optimizer: &OptimizerController,
    ) -> Result<()> {
        match self {
            CleanupTask::EnableSmt => machine.enable_smt(exec),
            CleanupTask::DeleteBoundary(name) => boundaries
                .delete(exec, name)
                .map_err(|e| BenchError::teardown(format!("delete {}", name), e)),
            CleanupTask::DetachOptimizer => optimizer
                .detach(exec)
                .map_err(|e| BenchError::teardown("stop optimizer", e)),
        }
    }
}

impl fmt::Display for CleanupTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CleanupTask::EnableSmt => f.write_str("enable SMT"),
            CleanupTask::DeleteBoundary(name) => write!(f, "delete {}", name),
            CleanupTask::DetachOptimizer => f.write_str("stop optimizer"),
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct CleanupJournal(Arc<Mutex<Vec<CleanupTask>>>);

impl CleanupJournal {
    pub fn new() -> Self {
        Self::default()
    }

    // A PANIC WHILE HOLDING THE LOCK MUST NOT STOP THE HOST FROM BEING RESTORED
    fn lock(&self) -> MutexGuard<'_, Vec<CleanupTask>> {
        self.0.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn sync(&self, tasks: &[CleanupTask]) {
        let mut pending = self.lock();
        pending.clear();
        pending.extend_from_slice(tasks);
    }

    pub fn pending(&self) -> Vec<CleanupTask> {
        self.lock().clone()
    }

    // TAKE EVERYTHING PENDING SO A SECOND SIGNAL DOES NOT REPLAY IT AGAIN
    pub fn take(&self) -> Vec<CleanupTask> {
        std::mem::take(&mut *self.lock())
    }
}

#[derive(Debug, Default)]
pub struct CleanupStack {
    tasks: Vec<CleanupTask>,
    journal: CleanupJournal,
}

impl CleanupStack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_journal(journal: CleanupJournal) -> Self {
        Self {
            tasks: Vec::new(),
            journal,
        }
    }

    pub fn register(&mut self, task: CleanupTask) {
        self.tasks.push(task);
        self.journal.sync(&self.tasks);
    }

    pub fn pending(&self) -> &[CleanupTask] {
        &self.tasks
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    // POP EVERYTHING, NEWEST FIRST, AND CLEAR
    pub fn drain_lifo(&mut self) -> Vec<CleanupTask> {
        let mut tasks = std::mem::take(&mut self.tasks);
        tasks.reverse();
        self.journal.sync(&self.tasks);
        tasks
    }
}

// RUN TASKS IN THE GIVEN ORDER. A FAILED TASK IS LOGGED AND THE REMAINING
// TASKS STILL RUN. AFTER EVERYTHING HAS BEEN ATTEMPTED THE FIRST FAILURE IS
// RETURNED, AN SMT RESTORE FAILURE TAKING PRECEDENCE.
pub fn unwind<E: Executor>(
    tasks: Vec<CleanupTask>,
    exec: &mut E,
    machine: &mut MachineState,
    boundaries: &BoundaryManager,
    optimizer: &OptimizerController,
) -> Result<()> {
    let mut smt = None;
    let mut first = None;
    for task in tasks {
        match task.execute(exec, machine, boundaries, optimizer) {
            Ok(()) => {}
            Err(e @ BenchError::SmtRestore { .. }) => {
                error!(task = %task, error = %e, "cleanup failed, host degraded");
                smt.get_or_insert(e);
            }
            Err(e) => {
                warn!(task = %task, error = %e, "cleanup failed, continuing");
                first.get_or_insert(e);
            }
        }
    }
    match smt.or(first) {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

// BEST-EFFORT REPLAY FROM THE TERMINATION HANDLER. THE ENGINE'S MachineState
// IS UNREACHABLE FROM HERE: PASS MachineState::owing_smt_restore(). THE ENGINE
// ONLY JOURNALS EnableSmt WHEN SMT WAS "on" AT PROBE, SO WRITING "on" BACK
// NEVER CHANGES A HOST THAT STARTED WITH SMT OFF.
pub fn emergency_unwind<E: Executor>(
    journal: &CleanupJournal,
    exec: &mut E,
    machine: &mut MachineState,
    boundaries: &BoundaryManager,
    optimizer: &OptimizerController,
) -> Result<()> {
    let mut tasks = journal.take();
    if tasks.is_empty() {
        return Ok(());
    }
    tasks.reverse();
    info!(pending = tasks.len(), "replaying cleanup after termination");
    unwind(tasks, exec, machine, boundaries, optimizer)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drain_is_reverse_of_registration() {
        let mut s = CleanupStack::new();
        s.register(CleanupTask::DeleteBoundary(BoundaryName::Damon));
        s.register(CleanupTask::DetachOptimizer);
        s.register(CleanupTask::EnableSmt);
        assert_eq!(
            s.drain_lifo(),
            vec![
                CleanupTask::EnableSmt,
                CleanupTask::DetachOptimizer,
                CleanupTask::DeleteBoundary(BoundaryName::Damon),
            ]
        );
        assert!(s.is_empty());
        assert!(s.drain_lifo().is_empty());
    }

    #[test]
    fn journal_mirrors_stack() {
        let journal = CleanupJournal::new();
        let mut s = CleanupStack::with_journal(journal.clone());
        s.register(CleanupTask::DeleteBoundary(BoundaryName::Baseline));
        s.register(CleanupTask::EnableSmt);
        assert_eq!(journal.pending(), s.pending().to_vec());

        s.drain_lifo();
        assert!(journal.pending().is_empty());
    }

    #[test]
    fn journal_take_empties() {
        let journal = CleanupJournal::new();
        let mut s = CleanupStack::with_journal(journal.clone());
        s.register(CleanupTask::EnableSmt);
        assert_eq!(journal.take(), vec![CleanupTask::EnableSmt]);
        assert!(journal.take().is_empty());
    }

    #[test]
    fn outermost_unwinds_smt_first() {
        let mut tasks = CleanupTask::outermost();
        tasks.reverse();
        assert_eq!(tasks[0], CleanupTask::EnableSmt);
        assert_eq!(*tasks.last().unwrap(), CleanupTask::DetachOptimizer);
    }

    #[test]
    fn task_labels() {
        assert_eq!(
            CleanupTask::DeleteBoundary(BoundaryName::Damon).to_string(),
            "delete damon_test"
        );
        assert_eq!(CleanupTask::EnableSmt.to_string(), "enable SMT");
    }
}
