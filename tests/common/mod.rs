// DAMONBENCH FAKE HOST
// AN IN-MEMORY Executor THAT MODELS THE PIECES OF A LINUX HOST THE ENGINE
// TOUCHES: CGROUPS, SMT CONTROL, SWAP, PAGE CACHE, THE DAMON FRONTEND.
// EVERY MUTATION IS APPENDED TO AN ORDERED EVENT LOG. FAULTS ARE INJECTED
// THROUGH THE PUBLIC fail_* FIELDS.

#![allow(dead_code)]

use std::collections::{BTreeMap, BTreeSet};
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use damonbench::boundary::BoundaryManager;
use damonbench::machine::MachineState;
use damonbench::optimizer::OptimizerController;
use damonbench::{
    CommandOutput, Engine, EngineSettings, ExecError, Executor, FailurePolicy, WorkloadInvocation,
};

pub const CGROUP_ROOT: &str = "/fake/cgroup";
pub const SMT_PATH: &str = "/fake/smt/control";
pub const DROP_PATH: &str = "/fake/drop_caches";
pub const KDAMONDS: &str = "/fake/kdamonds.json";

// WHAT THE HOST LOOKED LIKE WHILE A WORKLOAD WAS RUNNING
#[derive(Clone, Debug)]
pub struct WorkloadSnapshot {
    pub scope: String,
    pub limit: Option<u64>,
    pub live_cgroups: usize,
    pub optimizer_running: bool,
    pub smt: String,
    pub swap_on: bool,
    pub repeat: u32,
}

pub struct FakeHost {
    pub events: Vec<String>,
    // NAME -> memory.max (None UNTIL WRITTEN)
    pub cgroups: BTreeMap<String, Option<u64>>,
    pub smt: String,
    pub swap_on: bool,
    pub optimizer_running: bool,
    pub workloads: Vec<WorkloadSnapshot>,
    // CGROUPS WITH A LINGERING PROCESS: cgdelete FAILS WITH EBUSY
    pub busy: BTreeSet<String>,

    // FAIL THE NEXT n WORKLOADS WITH EXIT 1
    pub fail_workloads: u32,
    // FAIL THE NEXT n cgcreate CALLS
    pub fail_cgcreate: u32,
    pub fail_optimizer_start: bool,
    pub fail_smt_restore: bool,
    // PROGRAM THAT CANNOT BE LAUNCHED AT ALL
    pub unavailable: Option<String>,
}

impl Default for FakeHost {
    fn default() -> Self {
        Self {
            events: Vec::new(),
            cgroups: BTreeMap::new(),
            smt: "on".to_string(),
            swap_on: true,
            optimizer_running: false,
            workloads: Vec::new(),
            busy: BTreeSet::new(),
            fail_workloads: 0,
            fail_cgcreate: 0,
            fail_optimizer_start: false,
            fail_smt_restore: false,
            unavailable: None,
        }
    }
}

fn failed(argv: &[String], stderr: &str) -> ExecError {
    ExecError::Failed {
        argv: argv.join(" "),
        code: Some(1),
        stderr: stderr.to_string(),
    }
}

fn ok() -> Result<CommandOutput, ExecError> {
    Ok(CommandOutput {
        code: Some(0),
        ..CommandOutput::default()
    })
}

impl FakeHost {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_smt(mut self, smt: &str) -> Self {
        self.smt = smt.to_string();
        self
    }

    fn scope(arg: &str) -> String {
        arg.strip_prefix("memory:").unwrap_or(arg).to_string()
    }

    // "<root>/<name>/memory.max" -> name
    fn limit_target(path: &Path) -> Option<String> {
        let rest = path.strip_prefix(CGROUP_ROOT).ok()?;
        let mut parts = rest.iter();
        let name = parts.next()?.to_str()?.to_string();
        match parts.next()?.to_str()? {
            "memory.max" => Some(name),
            _ => None,
        }
    }

    // EVENTS FROM THE FIRST ONE STARTING WITH `prefix`
    pub fn events_from(&self, prefix: &str) -> Vec<String> {
        match self.events.iter().position(|e| e.starts_with(prefix)) {
            Some(i) => self.events[i..].to_vec(),
            None => Vec::new(),
        }
    }

    pub fn position(&self, event: &str) -> Option<usize> {
        self.events.iter().position(|e| e == event)
    }

    pub fn count(&self, event: &str) -> usize {
        self.events.iter().filter(|e| e.as_str() == event).count()
    }

    // NOTHING OF OURS LEFT ON THE HOST
    pub fn is_restored(&self) -> bool {
        self.cgroups.is_empty() && !self.optimizer_running && self.smt == "on"
    }
}

impl Executor for FakeHost {
    fn run(&mut self, argv: &[String]) -> Result<CommandOutput, ExecError> {
        let program = argv.first().map(String::as_str).unwrap_or("");
        if self.unavailable.as_deref() == Some(program) {
            return Err(ExecError::Unavailable {
                program: program.to_string(),
                source: io::Error::new(io::ErrorKind::NotFound, "no such file or directory"),
            });
        }

        let args: Vec<&str> = argv.iter().map(String::as_str).collect();
        match args.as_slice() {
            ["sync"] => {
                self.events.push("sync".to_string());
                ok()
            }
            ["swapoff", "-a"] => {
                self.swap_on = false;
                self.events.push("swapoff".to_string());
                ok()
            }
            ["cgcreate", "-g", group] => {
                let name = Self::scope(group);
                if self.fail_cgcreate > 0 {
                    self.fail_cgcreate -= 1;
                    self.events.push(format!("cgcreate {} (failed)", name));
                    return Err(failed(argv, "cgroup change of group failed"));
                }
                assert!(
                    !self.cgroups.contains_key(&name),
                    "cgroup {} created twice",
                    name
                );
                self.cgroups.insert(name.clone(), None);
                self.events.push(format!("cgcreate {}", name));
                ok()
            }
            ["cgdelete", "-g", group] => {
                let name = Self::scope(group);
                if self.busy.contains(&name) && self.cgroups.contains_key(&name) {
                    self.events.push(format!("cgdelete {} (busy)", name));
                    return Err(failed(
                        argv,
                        &format!("cgdelete: cannot remove group '{}': Device or resource busy", name),
                    ));
                }
                if self.cgroups.remove(&name).is_some() {
                    self.events.push(format!("cgdelete {}", name));
                    ok()
                } else {
                    Err(failed(
                        argv,
                        &format!("cgdelete: cannot remove group '{}': No such file or directory", name),
                    ))
                }
            }
            ["damo", "start", "--kdamonds", _] => {
                if self.fail_optimizer_start {
                    return Err(failed(argv, "kdamond start failed"));
                }
                self.optimizer_running = true;
                self.events.push("damo start".to_string());
                ok()
            }
            ["damo", "stop"] => {
                if !self.optimizer_running {
                    return Err(failed(argv, "no running kdamond"));
                }
                self.optimizer_running = false;
                self.events.push("damo stop".to_string());
                ok()
            }
            _ => panic!("fake host: unexpected command {:?}", argv),
        }
    }

    fn write(&mut self, path: &Path, contents: &str) -> Result<(), ExecError> {
        let value = contents.trim();
        if path == Path::new(SMT_PATH) {
            if value == "on" && self.fail_smt_restore {
                return Err(ExecError::Io {
                    op: "write",
                    path: path.to_path_buf(),
                    source: io::Error::new(io::ErrorKind::PermissionDenied, "permission denied"),
                });
            }
            self.smt = value.to_string();
            self.events.push(format!("smt {}", value));
            return Ok(());
        }
        if path == Path::new(DROP_PATH) {
            assert_eq!(value, "3");
            self.events.push("drop caches".to_string());
            return Ok(());
        }
        if let Some(name) = Self::limit_target(path) {
            let Some(limit) = self.cgroups.get_mut(&name) else {
                return Err(ExecError::Io {
                    op: "write",
                    path: path.to_path_buf(),
                    source: io::Error::new(io::ErrorKind::NotFound, "no such cgroup"),
                });
            };
            let bytes: u64 = value.parse().expect("memory.max takes bytes");
            *limit = Some(bytes);
            self.events.push(format!("limit {} {}", name, bytes));
            return Ok(());
        }
        panic!("fake host: unexpected write to {}", path.display());
    }

    fn read(&mut self, path: &Path) -> Result<String, ExecError> {
        if path == Path::new(SMT_PATH) {
            return Ok(format!("{}\n", self.smt));
        }
        Err(ExecError::Io {
            op: "read",
            path: path.to_path_buf(),
            source: io::Error::new(io::ErrorKind::NotFound, "no such file"),
        })
    }

    fn run_workload(
        &mut self,
        scope: &str,
        invocation: &WorkloadInvocation,
    ) -> Result<CommandOutput, ExecError> {
        self.events.push(format!("workload {}", scope));
        self.workloads.push(WorkloadSnapshot {
            scope: scope.to_string(),
            limit: self.cgroups.get(scope).copied().flatten(),
            live_cgroups: self.cgroups.len(),
            optimizer_running: self.optimizer_running,
            smt: self.smt.clone(),
            swap_on: self.swap_on,
            repeat: invocation.repeat,
        });
        if self.fail_workloads > 0 {
            self.fail_workloads -= 1;
            return Err(failed(&invocation.argv, "rg: permission denied"));
        }
        ok()
    }
}

pub fn settings(policy: FailurePolicy, descriptor: bool) -> EngineSettings {
    EngineSettings {
        policy,
        boundaries: BoundaryManager::new(CGROUP_ROOT, 3, Duration::ZERO),
        optimizer: OptimizerController::new(
            "damo",
            descriptor.then(|| PathBuf::from(KDAMONDS)),
        ),
    }
}

pub fn engine_with<E: Executor>(mut host: E, settings: EngineSettings) -> Engine<E> {
    let machine = MachineState::probe_at(&mut host, Path::new(SMT_PATH), Path::new(DROP_PATH));
    Engine::with_machine(host, machine, settings)
}

pub fn engine(host: FakeHost, policy: FailurePolicy) -> Engine<FakeHost> {
    engine_with(host, settings(policy, true))
}
