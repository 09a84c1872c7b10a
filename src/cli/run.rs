// RUN + PLAN SUBCOMMANDS
// BUILDS THE FILE-SEARCH MATRIX FROM ARGUMENTS, INSTALLS THE TERMINATION
// HANDLER, DRIVES THE ENGINE, PRINTS THE SUMMARY AND WRITES RESULTS.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Args;
use tracing::{info, warn};

use damonbench::boundary::{BoundaryManager, DEFAULT_SETUP_ATTEMPTS};
use damonbench::cleanup::{emergency_unwind, CleanupJournal};
use damonbench::machine::MachineState;
use damonbench::matrix::MatrixInput;
use damonbench::optimizer::{OptimizerController, DEFAULT_PROGRAM};
use damonbench::units::{format_bytes, parse_size};
use damonbench::workload::{FileSearch, Workload, DEFAULT_PASSES, DEFAULT_PATTERN};
use damonbench::{Engine, EngineSettings, FailurePolicy, ResultCollector, SudoExecutor};

use super::{is_root, SEP};

// EXIT STATUS AFTER A SIGNAL-DRIVEN CLEANUP (128 + SIGINT)
const SIGNAL_EXIT: i32 = 130;

#[derive(Args, Clone, Debug)]
pub struct MatrixArgs {
    // DIRECTORY THE SEARCH RUNS OVER
    #[arg(long)]
    pub data_dir: PathBuf,

    // SEARCH PATTERN
    #[arg(long, default_value = DEFAULT_PATTERN)]
    pub pattern: String,

    // ITERATIONS PER CONFIGURATION
    #[arg(long, default_value_t = 1)]
    pub iterations: u32,

    // SEARCH PASSES PER RUN (REPEATABLE: --passes 10 --passes 20)
    #[arg(long, default_values_t = vec![DEFAULT_PASSES], value_parser = clap::value_parser!(u32).range(1..))]
    pub passes: Vec<u32>,

    // CGROUP MEMORY LIMIT (REPEATABLE), e.g. 1GiB, 512M
    #[arg(long, value_parser = parse_size, default_values_t = vec![damonbench::units::GIB])]
    pub cgroup_size: Vec<u64>,

    // BASELINE CGROUP ONLY (NO DAMON VARIANT)
    #[arg(long)]
    pub default_only: bool,
}

impl MatrixArgs {
    fn workload(&self) -> FileSearch {
        FileSearch {
            data_dir: self.data_dir.clone(),
            pattern: self.pattern.clone(),
            passes: self.passes.clone(),
            cgroup_sizes: self.cgroup_size.clone(),
        }
    }

    fn input(&self) -> MatrixInput {
        MatrixInput::new(self.iterations, self.default_only)
    }
}

#[derive(Args, Clone, Debug)]
pub struct RunArgs {
    #[command(flatten)]
    pub matrix: MatrixArgs,

    // DAMON kdamonds CONFIG (REQUIRED UNLESS --default-only)
    #[arg(long)]
    pub optimizer_config: Option<PathBuf>,

    // OPTIMIZER CONTROL PROGRAM
    #[arg(long, default_value = DEFAULT_PROGRAM)]
    pub optimizer_program: String,

    // WRITE JSON RESULTS HERE
    #[arg(long)]
    pub output: Option<PathBuf>,

    // CONTINUE WITH THE NEXT CONFIGURATION AFTER A RECOVERABLE RUN FAILURE
    #[arg(long)]
    pub keep_going: bool,

    // ATTEMPTS PER CGROUP SETUP STEP
    #[arg(long, default_value_t = DEFAULT_SETUP_ATTEMPTS)]
    pub setup_attempts: u32,

    // CGROUP V2 MOUNT POINT
    #[arg(long, default_value = damonbench::boundary::CGROUP_ROOT)]
    pub cgroup_root: PathBuf,

    // DO NOT PREFIX PRIVILEGED COMMANDS WITH sudo (ALREADY ROOT)
    #[arg(long)]
    pub no_sudo: bool,
}

pub fn run_plan(args: MatrixArgs) -> Result<()> {
    let workload = args.workload();
    let configs = workload.configs(&args.input())?;

    println!("{}", SEP);
    println!("DAMONBENCH PLAN: {}", workload.name().to_uppercase());
    println!("{}", SEP);
    for (i, c) in configs.iter().enumerate() {
        println!("{:>4}  {}", i + 1, c);
    }
    println!();
    println!("TOTAL RUNS: {}", configs.len());
    Ok(())
}

pub fn run_bench(args: RunArgs) -> Result<()> {
    if !args.matrix.data_dir.is_dir() {
        bail!(
            "filesearch data directory not found: {}",
            args.matrix.data_dir.display()
        );
    }
    if args.no_sudo && !is_root() {
        warn!("--no-sudo without root: privileged steps will likely fail");
    }

    let workload = args.matrix.workload();
    let configs = workload.configs(&args.matrix.input())?;

    let sudo = !args.no_sudo;
    let boundaries = BoundaryManager::new(
        args.cgroup_root.clone(),
        args.setup_attempts,
        Duration::from_millis(200),
    );
    let optimizer = OptimizerController::new(args.optimizer_program.clone(), args.optimizer_config.clone());

    // SIGINT/SIGTERM: REPLAY WHATEVER THE CURRENT RUN HAS NOT UNDONE YET
    let journal = CleanupJournal::new();
    {
        let journal = journal.clone();
        let boundaries = boundaries.clone();
        let optimizer = optimizer.clone();
        ctrlc::set_handler(move || {
            eprintln!("\nDAMONBENCH INTERRUPTED -- RESTORING HOST");
            let mut exec = SudoExecutor::new(sudo);
            let mut machine = MachineState::owing_smt_restore();
            if let Err(e) =
                emergency_unwind(&journal, &mut exec, &mut machine, &boundaries, &optimizer)
            {
                eprintln!("RESTORE INCOMPLETE: {}", e);
                eprintln!("RUN `damonbench restore` BEFORE BENCHMARKING AGAIN");
            }
            std::process::exit(SIGNAL_EXIT);
        })?;
    }

    let policy = if args.keep_going {
        FailurePolicy::ContinueOnRunFailure
    } else {
        FailurePolicy::AbortInvocation
    };

    println!("{}", SEP);
    println!("DAMONBENCH: {}", workload.name().to_uppercase());
    println!("{}", SEP);
    println!("DATA DIR:        {}", args.matrix.data_dir.display());
    println!("PATTERN:         {}", args.matrix.pattern);
    println!("RUNS:            {}", configs.len());
    println!(
        "CGROUP SIZES:    {}",
        args.matrix
            .cgroup_size
            .iter()
            .map(|s| format_bytes(*s))
            .collect::<Vec<_>>()
            .join(", ")
    );
    println!("DEFAULT ONLY:    {}", args.matrix.default_only);
    println!(
        "DAMON CONFIG:    {}",
        args.optimizer_config
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "-".to_string())
    );
    println!("ON FAILURE:      {}", if args.keep_going { "CONTINUE" } else { "ABORT" });
    println!();

    let settings = EngineSettings {
        policy,
        boundaries,
        optimizer,
    };
    let mut engine = Engine::new(SudoExecutor::new(sudo), settings).with_journal(journal);
    let mut results = ResultCollector::new();
    let outcome = engine.run_all(&workload, &configs, &mut results);
    drop(engine);

    println!();
    println!("{}", SEP);
    println!("DAMONBENCH SUMMARY ({} OF {} RUNS)", results.len(), configs.len());
    println!("{}", SEP);
    for line in results.summary_table() {
        println!("{}", line);
    }
    println!("{}", SEP);

    // PARTIAL RESULTS ARE STILL WORTH KEEPING
    if let Some(path) = &args.output {
        results.write_json(path)?;
        info!(path = %path.display(), results = results.len(), "results written");
    }

    outcome.context("benchmark aborted")
}
