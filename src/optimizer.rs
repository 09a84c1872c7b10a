// DAMONBENCH OPTIMIZER CONTROL
// STARTS/STOPS THE KERNEL MEMORY OPTIMIZER (DAMON, VIA `damo`) FOR ONE
// BOUNDARY. THE DESCRIPTOR (A kdamonds JSON FILE) IS PASSED THROUGH
// UNTOUCHED; IT IS WHAT BINDS THE OPTIMIZER TO THE CGROUP.
//
// STOP IS UNCONDITIONAL AND "ALREADY STOPPED" COUNTS AS STOPPED.

use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::boundary::IsolationBoundary;
use crate::error::{BenchError, ExecError, Result};
use crate::exec::{argv, Executor};

pub const DEFAULT_PROGRAM: &str = "damo";

#[derive(Clone, Debug)]
pub struct OptimizerController {
    program: String,
    descriptor: Option<PathBuf>,
}

impl OptimizerController {
    pub fn new(program: impl Into<String>, descriptor: Option<PathBuf>) -> Self {
        Self {
            program: program.into(),
            descriptor,
        }
    }

    pub fn descriptor(&self) -> Option<&Path> {
        self.descriptor.as_deref()
    }

    fn start_argv(&self, descriptor: &Path) -> Vec<String> {
        argv([
            self.program.clone(),
            "start".to_string(),
            "--kdamonds".to_string(),
            descriptor.display().to_string(),
        ])
    }

    fn stop_argv(&self) -> Vec<String> {
        argv([self.program.clone(), "stop".to_string()])
    }

    // BLOCKS UNTIL THE START COMMAND RETURNS
    pub fn attach<E: Executor>(&self, exec: &mut E, boundary: &mut IsolationBoundary) -> Result<()> {
        let descriptor = self.descriptor.as_deref().ok_or_else(|| {
            BenchError::Configuration(format!(
                "{} requests the optimizer but no optimizer config was given",
                boundary.name
            ))
        })?;
        exec.run(&self.start_argv(descriptor))
            .map_err(|e| BenchError::setup(format!("start optimizer for {}", boundary.name), e))?;
        boundary.optimizer_attached = true;
        info!(cgroup = %boundary.name, config = %descriptor.display(), "optimizer attached");
        Ok(())
    }

    // A NON-ZERO EXIT FROM `stop` MEANS NOTHING WAS RUNNING
    pub fn detach<E: Executor>(&self, exec: &mut E) -> std::result::Result<(), ExecError> {
        match exec.run(&self.stop_argv()) {
            Ok(_) => {
                info!("optimizer stopped");
                Ok(())
            }
            Err(ExecError::Failed { stderr, .. }) => {
                debug!(stderr = %stderr, "optimizer already stopped");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    // CALLED BEFORE EVERY BASELINE RUN SO NO OPTIMIZER LEAKS ACROSS VARIANTS
    pub fn ensure_stopped<E: Executor>(&self, exec: &mut E) -> Result<()> {
        self.detach(exec)
            .map_err(|e| BenchError::setup("ensure optimizer stopped", e))
    }
}

impl Default for OptimizerController {
    fn default() -> Self {
        Self::new(DEFAULT_PROGRAM, None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::boundary::BoundaryName;

    #[test]
    fn start_passes_descriptor_through() {
        let c = OptimizerController::new("damo", Some(PathBuf::from("/etc/damon/cfg.json")));
        assert_eq!(
            c.start_argv(Path::new("/etc/damon/cfg.json")),
            vec!["damo", "start", "--kdamonds", "/etc/damon/cfg.json"]
        );
        assert_eq!(c.stop_argv(), vec!["damo", "stop"]);
    }

    #[test]
    fn attach_without_descriptor_is_configuration_error() {
        struct Never;
        impl Executor for Never {
            fn run(&mut self, _: &[String]) -> std::result::Result<crate::exec::CommandOutput, ExecError> {
                panic!("must not run")
            }
            fn write(&mut self, _: &Path, _: &str) -> std::result::Result<(), ExecError> {
                panic!("must not write")
            }
            fn read(&mut self, _: &Path) -> std::result::Result<String, ExecError> {
                panic!("must not read")
            }
            fn run_workload(
                &mut self,
                _: &str,
                _: &crate::exec::WorkloadInvocation,
            ) -> std::result::Result<crate::exec::CommandOutput, ExecError> {
                panic!("must not run workload")
            }
        }

        let c = OptimizerController::default();
        let mut b = IsolationBoundary {
            name: BoundaryName::Damon,
            memory_limit: 1 << 30,
            optimizer_attached: false,
        };
        let err = c.attach(&mut Never, &mut b).unwrap_err();
        assert!(matches!(err, BenchError::Configuration(_)));
        assert!(!b.optimizer_attached);
    }
}
