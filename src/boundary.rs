// DAMONBENCH ISOLATION BOUNDARIES
// MEMORY-LIMITED CGROUPS THE WORKLOAD RUNS INSIDE. TWO WELL-KNOWN NAMES:
//   baseline_test  -- NO OPTIMIZER
//   damon_test     -- OPTIMIZER ATTACHED
//
// CREATION ALWAYS DELETES FIRST, SO A NAME NEVER EXISTS TWICE. A MISSING
// CGROUP ON DELETE IS SUCCESS: THE FIRST RUN OF AN INVOCATION HAS NOTHING
// TO DELETE.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::error::{BenchError, ExecError, Result};
use crate::exec::{argv, Executor};
use crate::units::format_bytes;

pub const CGROUP_ROOT: &str = "/sys/fs/cgroup";
pub const DEFAULT_SETUP_ATTEMPTS: u32 = 3;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BoundaryName {
    Baseline,
    Damon,
}

impl BoundaryName {
    pub const ALL: [BoundaryName; 2] = [BoundaryName::Baseline, BoundaryName::Damon];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Baseline => "baseline_test",
            Self::Damon => "damon_test",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|n| n.as_str() == s)
            .ok_or_else(|| {
                BenchError::Configuration(format!(
                    "unknown cgroup `{}` (expected baseline_test or damon_test)",
                    s
                ))
            })
    }

    // THE OPTIMIZED VARIANT IS DECIDED BY WHICH BOUNDARY A RUN ASKS FOR
    pub fn is_optimized(self) -> bool {
        matches!(self, Self::Damon)
    }
}

impl fmt::Display for BoundaryName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IsolationBoundary {
    pub name: BoundaryName,
    pub memory_limit: u64,
    pub optimizer_attached: bool,
}

#[derive(Clone, Debug)]
pub struct BoundaryManager {
    root: PathBuf,
    attempts: u32,
    retry_delay: Duration,
}

impl Default for BoundaryManager {
    fn default() -> Self {
        Self::new(CGROUP_ROOT, DEFAULT_SETUP_ATTEMPTS, Duration::from_millis(200))
    }
}

impl BoundaryManager {
    pub fn new(root: impl Into<PathBuf>, attempts: u32, retry_delay: Duration) -> Self {
        Self {
            root: root.into(),
            attempts: attempts.max(1),
            retry_delay,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn limit_path(&self, name: BoundaryName) -> PathBuf {
        self.root.join(name.as_str()).join("memory.max")
    }

    fn group_arg(name: BoundaryName) -> String {
        format!("memory:{}", name.as_str())
    }

    // RETRY A SETUP STEP. A MISSING EXECUTOR IS NOT WORTH RETRYING.
    fn attempt<T>(
        &self,
        what: &str,
        mut step: impl FnMut() -> std::result::Result<T, ExecError>,
    ) -> Result<T> {
        let mut tries = 0;
        loop {
            tries += 1;
            match step() {
                Ok(v) => return Ok(v),
                Err(e) if e.is_host_failure() || tries >= self.attempts => {
                    return Err(BenchError::setup(what, e));
                }
                Err(e) => {
                    warn!(what, attempt = tries, of = self.attempts, error = %e, "setup step failed, retrying");
                    std::thread::sleep(self.retry_delay);
                }
            }
        }
    }

    pub fn create<E: Executor>(
        &self,
        exec: &mut E,
        name: BoundaryName,
        memory_limit: u64,
    ) -> Result<IsolationBoundary> {
        self.delete(exec, name)
            .map_err(|e| BenchError::setup(format!("clear stale {}", name), e))?;

        let create = argv(["cgcreate".to_string(), "-g".to_string(), Self::group_arg(name)]);
        self.attempt(&format!("create {}", name), || exec.run(&create))?;

        let path = self.limit_path(name);
        let value = format!("{}\n", memory_limit);
        self.attempt(&format!("limit {}", name), || exec.write(&path, &value))?;

        info!(
            cgroup = %name,
            limit = %format_bytes(memory_limit),
            "cgroup created"
        );
        Ok(IsolationBoundary {
            name,
            memory_limit,
            optimizer_attached: false,
        })
    }

    // DELETE, TREATING "NOT FOUND" AS SUCCESS. ANY OTHER FAILURE (BUSY
    // CGROUP, PERMISSION) SURFACES: THE CGROUP MAY STILL BE ALIVE.
    pub fn delete<E: Executor>(
        &self,
        exec: &mut E,
        name: BoundaryName,
    ) -> std::result::Result<(), ExecError> {
        let delete = argv(["cgdelete".to_string(), "-g".to_string(), Self::group_arg(name)]);
        match exec.run(&delete) {
            Ok(_) => {
                debug!(cgroup = %name, "cgroup deleted");
                Ok(())
            }
            Err(ExecError::Failed { ref stderr, .. }) if cgroup_absent(stderr) => {
                debug!(cgroup = %name, stderr = %stderr, "cgroup absent");
                Ok(())
            }
            Err(e) => {
                warn!(cgroup = %name, error = %e, "cgroup delete failed");
                Err(e)
            }
        }
    }
}

// cgdelete REPORTS A MISSING GROUP AS ENOENT OR "... does not exist"
pub fn cgroup_absent(stderr: &str) -> bool {
    let s = stderr.to_ascii_lowercase();
    s.contains("no such file or directory") || s.contains("does not exist")
}
