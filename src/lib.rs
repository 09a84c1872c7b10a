// DAMONBENCH LIBRARY
// BENCHMARK LIFECYCLE ENGINE: CONFIG MATRIX, HOST PREPARATION/RESTORATION,
// OPTIMIZER SEQUENCING, RESULT COLLECTION. SHARED BY THE BINARY AND tests/.

pub mod boundary;
pub mod cleanup;
pub mod engine;
pub mod error;
pub mod exec;
pub mod machine;
pub mod matrix;
pub mod optimizer;
pub mod results;
pub mod units;
pub mod workload;

pub use engine::{Engine, EngineSettings, FailurePolicy, RunOutcome, RunState};
pub use error::{BenchError, ExecError, Severity};
pub use exec::{CommandOutput, Executor, SudoExecutor, WorkloadInvocation};
pub use results::{BenchmarkResult, ResultCollector};
