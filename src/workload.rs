// DAMONBENCH WORKLOADS
// A WORKLOAD KNOWS THREE THINGS: WHICH CONFIGURATIONS IT WANTS, WHICH
// COMMAND TO RUN FOR ONE OF THEM, AND HOW TO TURN THAT RUN INTO METRICS.
// THE ENGINE NEVER LOOKS INSIDE THE COMMAND.

use std::path::PathBuf;
use std::time::Duration;

use crate::boundary::BoundaryName;
use crate::error::{BenchError, Result};
use crate::exec::{CommandOutput, WorkloadInvocation};
use crate::matrix::{
    ConfigRecord, MatrixBuilder, MatrixInput, BENCHMARK, CGROUP_NAME, CGROUP_SIZE, PASSES,
};
use crate::results::{Metrics, RUNTIME_SEC};
use crate::units::GIB;

pub trait Workload {
    fn name(&self) -> &str;

    fn configs(&self, input: &MatrixInput) -> Result<Vec<ConfigRecord>>;

    fn command(&self, config: &ConfigRecord) -> Result<WorkloadInvocation>;

    // RESULT HOOK. DEFAULT: WALL-CLOCK ONLY.
    fn parse_results(&self, _output: &CommandOutput, elapsed: Duration) -> Result<Metrics> {
        Ok(runtime_metrics(elapsed))
    }
}

pub fn runtime_metrics(elapsed: Duration) -> Metrics {
    let mut m = Metrics::new();
    m.insert(RUNTIME_SEC.to_string(), elapsed.as_secs_f64());
    m
}

// --default-only RESTRICTS THE VARIANT DIMENSION TO THE BASELINE
pub fn cgroup_variants(default_only: bool) -> Vec<&'static str> {
    if default_only {
        vec![BoundaryName::Baseline.as_str()]
    } else {
        BoundaryName::ALL.iter().map(|n| n.as_str()).collect()
    }
}

pub const DEFAULT_PATTERN: &str = "write";
pub const DEFAULT_PASSES: u32 = 20;
pub const DEFAULT_CGROUP_SIZE: u64 = GIB;

// RIPGREP OVER A DATA DIRECTORY, `passes` TIMES IN A ROW, OUTPUT DISCARDED
#[derive(Clone, Debug)]
pub struct FileSearch {
    pub data_dir: PathBuf,
    pub pattern: String,
    pub passes: Vec<u32>,
    pub cgroup_sizes: Vec<u64>,
}

impl FileSearch {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            pattern: DEFAULT_PATTERN.to_string(),
            passes: vec![DEFAULT_PASSES],
            cgroup_sizes: vec![DEFAULT_CGROUP_SIZE],
        }
    }
}

impl Workload for FileSearch {
    fn name(&self) -> &str {
        "filesearch"
    }

    fn configs(&self, input: &MatrixInput) -> Result<Vec<ConfigRecord>> {
        if self.passes.contains(&0) {
            return Err(zero_passes());
        }
        let builder = MatrixBuilder::new()
            .option(PASSES, &self.passes)
            .option(CGROUP_SIZE, &self.cgroup_sizes)
            .option(CGROUP_NAME, &cgroup_variants(input.default_only))
            .option(BENCHMARK, &[self.name()]);
        input
            .apply_extra(builder)
            .iterations(input.iterations)
            .build()
    }

    fn command(&self, config: &ConfigRecord) -> Result<WorkloadInvocation> {
        let passes = config.get_u64(PASSES)?;
        let passes = u32::try_from(passes)
            .map_err(|_| BenchError::Configuration(format!("passes {} out of range", passes)))?;
        if passes == 0 {
            return Err(zero_passes());
        }
        Ok(WorkloadInvocation::new(vec![
            "rg".to_string(),
            self.pattern.clone(),
            self.data_dir.display().to_string(),
        ])
        .repeat(passes)
        .discard_stdout())
    }
}

// ZERO PASSES WOULD "SUCCEED" WITHOUT RUNNING ANYTHING
fn zero_passes() -> BenchError {
    BenchError::Configuration(format!("{} must be at least 1", PASSES))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matrix::ITERATION;

    #[test]
    fn default_matrix_has_both_variants() {
        let w = FileSearch::new("/data/linux");
        let configs = w.configs(&MatrixInput::new(2, false)).unwrap();
        assert_eq!(configs.len(), 4);
        let keys: Vec<&str> = configs[0].keys().collect();
        assert_eq!(keys, vec![PASSES, CGROUP_SIZE, CGROUP_NAME, BENCHMARK, ITERATION]);
        assert_eq!(configs[0].get_u64(CGROUP_SIZE).unwrap(), GIB);
        assert_eq!(configs[3].get_str(CGROUP_NAME).unwrap(), "damon_test");
    }

    #[test]
    fn default_only_halves_matrix() {
        let w = FileSearch::new("/data/linux");
        let full = w.configs(&MatrixInput::new(3, false)).unwrap();
        let base = w.configs(&MatrixInput::new(3, true)).unwrap();
        assert_eq!(base.len() * 2, full.len());
        assert!(base
            .iter()
            .all(|c| c.get_str(CGROUP_NAME).unwrap() == "baseline_test"));
    }

    #[test]
    fn command_is_argv_with_repeat() {
        let w = FileSearch::new("/data/linux");
        let configs = w.configs(&MatrixInput::new(1, true)).unwrap();
        let inv = w.command(&configs[0]).unwrap();
        assert_eq!(inv.argv, vec!["rg", "write", "/data/linux"]);
        assert_eq!(inv.repeat, DEFAULT_PASSES);
        assert!(inv.discard_stdout);
    }

    #[test]
    fn zero_passes_rejected() {
        let mut w = FileSearch::new("/data/linux");
        w.passes = vec![20, 0];
        let err = w.configs(&MatrixInput::new(1, true)).unwrap_err();
        assert!(matches!(err, BenchError::Configuration(_)));

        // A HAND-BUILT RECORD CANNOT SNEAK PAST command() EITHER
        let config = MatrixBuilder::new()
            .option(PASSES, &[0u32])
            .build()
            .unwrap()
            .remove(0);
        assert!(FileSearch::new("/data").command(&config).is_err());
    }

    #[test]
    fn default_hook_reports_runtime() {
        let w = FileSearch::new("/data");
        let m = w
            .parse_results(&CommandOutput::default(), Duration::from_millis(1500))
            .unwrap();
        assert_eq!(m[RUNTIME_SEC], 1.5);
    }
}
