// RESTORE SUBCOMMAND
// FOR A HOST LEFT BEHIND BY A SIGKILLED OR CRASHED RUN: STOP THE OPTIMIZER,
// DELETE BOTH TEST CGROUPS, TURN SMT BACK ON. EVERY STEP IS IDEMPOTENT, SO
// RUNNING THIS ON A CLEAN HOST IS HARMLESS.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use tracing::info;

use damonbench::boundary::{BoundaryManager, CGROUP_ROOT, DEFAULT_SETUP_ATTEMPTS};
use damonbench::cleanup::{unwind, CleanupTask};
use damonbench::machine::{MachineState, SmtControl};
use damonbench::optimizer::{OptimizerController, DEFAULT_PROGRAM};
use damonbench::{Executor, SudoExecutor};

use super::SEP;

#[derive(Args, Clone, Debug)]
pub struct RestoreArgs {
    // LEAVE SMT AS IT IS (HOST WAS RUNNING WITH SMT OFF ON PURPOSE)
    #[arg(long)]
    pub keep_smt_off: bool,

    // OPTIMIZER CONTROL PROGRAM
    #[arg(long, default_value = DEFAULT_PROGRAM)]
    pub optimizer_program: String,

    // CGROUP V2 MOUNT POINT
    #[arg(long, default_value = CGROUP_ROOT)]
    pub cgroup_root: PathBuf,

    // DO NOT PREFIX PRIVILEGED COMMANDS WITH sudo (ALREADY ROOT)
    #[arg(long)]
    pub no_sudo: bool,
}

pub fn run_restore(args: RestoreArgs) -> Result<()> {
    let mut exec = SudoExecutor::new(!args.no_sudo);
    let boundaries = BoundaryManager::new(
        args.cgroup_root.clone(),
        DEFAULT_SETUP_ATTEMPTS,
        std::time::Duration::from_millis(200),
    );
    let optimizer = OptimizerController::new(args.optimizer_program.clone(), None);

    let mut machine = MachineState::probe(&mut exec);
    let smt_off = machine.smt_at_start() == SmtControl::Off;
    if smt_off && !args.keep_smt_off {
        machine = MachineState::owing_smt_restore();
    }

    println!("{}", SEP);
    println!("DAMONBENCH RESTORE");
    println!("{}", SEP);
    println!("SMT AT START:    {}", machine_label(smt_off, &machine));

    let mut tasks = CleanupTask::outermost();
    tasks.reverse();
    for t in &tasks {
        println!("  {}", t.to_string().to_uppercase());
    }
    info!(tasks = tasks.len(), "restoring host");

    unwind(tasks, &mut exec, &mut machine, &boundaries, &optimizer)
        .context("host restore incomplete")?;

    let after = exec
        .read(std::path::Path::new(damonbench::machine::SMT_CONTROL))
        .map(|s| s.trim().to_string())
        .unwrap_or_else(|_| "-".to_string());
    println!("SMT NOW:         {}", after);
    println!("RESTORE COMPLETE");
    Ok(())
}

fn machine_label(smt_off: bool, machine: &MachineState) -> &'static str {
    if smt_off {
        "off"
    } else {
        machine.smt_at_start().label()
    }
}
