// DAMONBENCH -- DAMON CGROUP BENCHMARK HARNESS
// RUNS A WORKLOAD REPEATEDLY INSIDE MEMORY-LIMITED CGROUPS, WITH AND WITHOUT
// THE DAMON OPTIMIZER ATTACHED, AND RECORDS WALL-CLOCK RUNTIME PER RUN.
//
// HOST STATE (CACHE, SWAP, SMT, CGROUPS, DAMON) IS PREPARED AND RESTORED BY
// THE LIBRARY ENGINE. THIS BINARY HANDLES: ARGUMENTS, LOGGING, SIGNALS, OUTPUT.

mod cli;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "damonbench")]
#[command(about = "DAMONBENCH -- A/B BENCHMARKS WITH AND WITHOUT DAMON IN MEMORY-LIMITED CGROUPS")]
struct Cli {
    // DEBUG LOGGING (RUST_LOG OVERRIDES)
    #[arg(long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    // RUN THE FILE-SEARCH BENCHMARK MATRIX (REQUIRES ROOT OR SUDO)
    Run(cli::run::RunArgs),

    // PRINT THE CONFIGURATION MATRIX WITHOUT TOUCHING THE HOST
    Plan(cli::run::MatrixArgs),

    // CHECK TOOLS, KERNEL CONFIG, CGROUP V2 AND SMT CONTROL
    Check,

    // RESTORE THE HOST AFTER A KILLED RUN: STOP DAMON, DELETE CGROUPS, SMT ON
    Restore(cli::restore::RestoreArgs),
}

fn init_logging(verbose: bool) {
    let default = if verbose { "damonbench=debug" } else { "damonbench=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Command::Run(args) => cli::run::run_bench(args),
        Command::Plan(args) => cli::run::run_plan(args),
        Command::Check => cli::check::run_check(),
        Command::Restore(args) => cli::restore::run_restore(args),
    }
}
