// DAMONBENCH PRIVILEGED EXECUTION
// ALL HOST MUTATION GOES THROUGH AN Executor: CGROUPS, CONTROL FILES,
// CACHE/SWAP/SMT TOGGLES, OPTIMIZER START/STOP, AND THE SCOPED WORKLOAD.
//
// COMMANDS ARE ARGUMENT VECTORS. NOTHING IS EVER ROUTED THROUGH `sh -c`:
// CONTROL FILES ARE WRITTEN WITH `sudo tee <path>` (VALUE ON STDIN), AND
// WORKLOAD REPETITION IS A COUNT CONSUMED HERE, NOT A SHELL LOOP.

use std::io::Write;
use std::os::unix::process::CommandExt;
use std::path::Path;
use std::process::{Command, Stdio};

use tracing::{debug, trace};

use crate::error::ExecError;

// KEEP ERROR MESSAGES READABLE WHEN A TOOL DUMPS A LOT ON STDERR
const STDERR_TAIL: usize = 512;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

// ONE WORKLOAD LAUNCH: argv RUN `repeat` TIMES BACK TO BACK INSIDE THE SCOPE.
// A FAILING PASS STOPS THE REPETITION.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WorkloadInvocation {
    pub argv: Vec<String>,
    pub repeat: u32,
    pub discard_stdout: bool,
}

impl WorkloadInvocation {
    pub fn new(argv: Vec<String>) -> Self {
        Self {
            argv,
            repeat: 1,
            discard_stdout: false,
        }
    }

    pub fn repeat(mut self, passes: u32) -> Self {
        self.repeat = passes;
        self
    }

    pub fn discard_stdout(mut self) -> Self {
        self.discard_stdout = true;
        self
    }
}

/// Privileged execution collaborator.
///
/// `run` and `write` may need elevated privilege; `read` never does.
/// Non-zero exits are reported as [`ExecError::Failed`], launch failures
/// as [`ExecError::Unavailable`].
pub trait Executor {
    fn run(&mut self, argv: &[String]) -> Result<CommandOutput, ExecError>;

    fn write(&mut self, path: &Path, contents: &str) -> Result<(), ExecError>;

    fn read(&mut self, path: &Path) -> Result<String, ExecError>;

    fn run_workload(
        &mut self,
        scope: &str,
        invocation: &WorkloadInvocation,
    ) -> Result<CommandOutput, ExecError>;
}

// LETS A CALLER LEND AN EXECUTOR AND INSPECT IT AFTER THE BORROWER IS GONE
impl<E: Executor + ?Sized> Executor for &mut E {
    fn run(&mut self, argv: &[String]) -> Result<CommandOutput, ExecError> {
        (**self).run(argv)
    }

    fn write(&mut self, path: &Path, contents: &str) -> Result<(), ExecError> {
        (**self).write(path, contents)
    }

    fn read(&mut self, path: &Path) -> Result<String, ExecError> {
        (**self).read(path)
    }

    fn run_workload(
        &mut self,
        scope: &str,
        invocation: &WorkloadInvocation,
    ) -> Result<CommandOutput, ExecError> {
        (**self).run_workload(scope, invocation)
    }
}

pub fn argv<I, S>(parts: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    parts.into_iter().map(Into::into).collect()
}

pub fn render(argv: &[String]) -> String {
    argv.join(" ")
}

fn tail(s: &str) -> String {
    let s = s.trim();
    if s.len() <= STDERR_TAIL {
        return s.to_string();
    }
    let mut start = s.len() - STDERR_TAIL;
    while !s.is_char_boundary(start) {
        start += 1;
    }
    format!("...{}", &s[start..])
}

fn check(argv: &[String], out: CommandOutput) -> Result<CommandOutput, ExecError> {
    if out.success() {
        Ok(out)
    } else {
        Err(ExecError::Failed {
            argv: render(argv),
            code: out.code,
            stderr: tail(&out.stderr),
        })
    }
}

pub struct SudoExecutor {
    sudo: bool,
}

impl SudoExecutor {
    pub fn new(sudo: bool) -> Self {
        Self { sudo }
    }

    fn privileged(&self, argv: &[String]) -> Command {
        if self.sudo {
            let mut cmd = Command::new("sudo");
            cmd.args(argv);
            cmd
        } else {
            let mut cmd = Command::new(&argv[0]);
            cmd.args(&argv[1..]);
            cmd
        }
    }

    fn launcher(&self, argv: &[String]) -> String {
        if self.sudo {
            "sudo".to_string()
        } else {
            argv[0].clone()
        }
    }
}

impl Executor for SudoExecutor {
    fn run(&mut self, argv: &[String]) -> Result<CommandOutput, ExecError> {
        if argv.is_empty() {
            return Err(ExecError::Failed {
                argv: String::new(),
                code: None,
                stderr: "empty argument vector".to_string(),
            });
        }
        debug!(cmd = %render(argv), sudo = self.sudo, "exec");
        let out = self
            .privileged(argv)
            .stdin(Stdio::null())
            .output()
            .map_err(|source| ExecError::Unavailable {
                program: self.launcher(argv),
                source,
            })?;
        let out = CommandOutput {
            code: out.status.code(),
            stdout: String::from_utf8_lossy(&out.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&out.stderr).into_owned(),
        };
        trace!(code = ?out.code, "exec done");
        check(argv, out)
    }

    fn write(&mut self, path: &Path, contents: &str) -> Result<(), ExecError> {
        debug!(path = %path.display(), value = contents.trim(), "write");
        if !self.sudo {
            return std::fs::write(path, contents).map_err(|source| ExecError::Io {
                op: "write",
                path: path.to_path_buf(),
                source,
            });
        }

        let tee = argv(["tee".to_string(), path.display().to_string()]);
        let mut child = self
            .privileged(&tee)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| ExecError::Unavailable {
                program: "sudo".to_string(),
                source,
            })?;

        // STDIN MUST BE CLOSED BEFORE WAITING OR tee NEVER SEES EOF
        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(contents.as_bytes())
                .map_err(|source| ExecError::Io {
                    op: "write",
                    path: path.to_path_buf(),
                    source,
                })?;
        }

        let out = child.wait_with_output().map_err(|source| ExecError::Io {
            op: "write",
            path: path.to_path_buf(),
            source,
        })?;
        check(
            &tee,
            CommandOutput {
                code: out.status.code(),
                stdout: String::new(),
                stderr: String::from_utf8_lossy(&out.stderr).into_owned(),
            },
        )
        .map(|_| ())
    }

    fn read(&mut self, path: &Path) -> Result<String, ExecError> {
        std::fs::read_to_string(path).map_err(|source| ExecError::Io {
            op: "read",
            path: path.to_path_buf(),
            source,
        })
    }

    fn run_workload(
        &mut self,
        scope: &str,
        invocation: &WorkloadInvocation,
    ) -> Result<CommandOutput, ExecError> {
        let mut full = argv(["cgexec", "-g"]);
        full.push(format!("memory:{}", scope));
        full.extend(invocation.argv.iter().cloned());

        let mut collected = CommandOutput {
            code: Some(0),
            ..CommandOutput::default()
        };

        for pass in 1..=invocation.repeat {
            trace!(pass, of = invocation.repeat, cmd = %render(&full), "workload pass");
            // OWN PROCESS GROUP + PDEATHSIG: A KILLED HARNESS TAKES THE WORKLOAD WITH IT
            let child = unsafe {
                Command::new(&full[0])
                    .args(&full[1..])
                    .stdin(Stdio::null())
                    .stdout(if invocation.discard_stdout {
                        Stdio::null()
                    } else {
                        Stdio::piped()
                    })
                    .stderr(Stdio::piped())
                    .process_group(0)
                    .pre_exec(|| {
                        libc::prctl(libc::PR_SET_PDEATHSIG, libc::SIGTERM as libc::c_ulong);
                        Ok(())
                    })
                    .spawn()
                    .map_err(|source| ExecError::Unavailable {
                        program: full[0].clone(),
                        source,
                    })?
            };

            let out = child.wait_with_output().map_err(|source| ExecError::Unavailable {
                program: full[0].clone(),
                source,
            })?;

            collected.code = out.status.code();
            collected.stdout.push_str(&String::from_utf8_lossy(&out.stdout));
            collected.stderr.push_str(&String::from_utf8_lossy(&out.stderr));
            if !out.status.success() {
                break;
            }
        }

        check(&full, collected)
    }
}
