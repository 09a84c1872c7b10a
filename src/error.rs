// DAMONBENCH ERROR TAXONOMY
// EVERY HOST-SIDE FAILURE ORIGINATES IN THE PRIVILEGED EXECUTOR (ExecError).
// THE LIFECYCLE WRAPS IT INTO A BenchError THAT KNOWS HOW FAR IT MAY PROPAGATE.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExecError {
    // PROGRAM COULD NOT BE LAUNCHED AT ALL (sudo/cgcreate MISSING, EXEC DENIED)
    #[error("cannot launch `{program}`: {source}")]
    Unavailable {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("`{argv}` exited with {}: {stderr}", exit_label(.code))]
    Failed {
        argv: String,
        code: Option<i32>,
        stderr: String,
    },

    #[error("{op} {}: {source}", .path.display())]
    Io {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

fn exit_label(code: &Option<i32>) -> String {
    match code {
        Some(c) => c.to_string(),
        None => "signal".to_string(),
    }
}

impl ExecError {
    // THE COLLABORATOR ITSELF IS GONE. NOTHING AFTER THIS CAN BE TRUSTED.
    pub fn is_host_failure(&self) -> bool {
        matches!(self, ExecError::Unavailable { .. })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Severity {
    // ABORT THIS RUN; THE INVOCATION MAY CONTINUE IF THE POLICY ALLOWS IT
    Run,
    // ABORT THE WHOLE INVOCATION
    Fatal,
}

#[derive(Debug, Error)]
pub enum BenchError {
    #[error("resource setup failed ({what}): {source}")]
    ResourceSetup {
        what: String,
        #[source]
        source: ExecError,
    },

    #[error("resource teardown failed ({what}): {source}")]
    ResourceTeardown {
        what: String,
        #[source]
        source: ExecError,
    },

    #[error("workload `{benchmark}` failed: {source}")]
    WorkloadExecution {
        benchmark: String,
        #[source]
        source: ExecError,
    },

    #[error("could not build result for `{benchmark}`: {reason}")]
    ResultParse { benchmark: String, reason: String },

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("host state failure ({what}): {source}")]
    HostState {
        what: String,
        #[source]
        source: ExecError,
    },

    #[error("SMT could not be re-enabled, host left degraded: {source}")]
    SmtRestore {
        #[source]
        source: ExecError,
    },
}

impl BenchError {
    // SETUP FAILURES DEGRADE TO HostState WHEN THE EXECUTOR ITSELF IS MISSING
    pub fn setup(what: impl Into<String>, source: ExecError) -> Self {
        let what = what.into();
        if source.is_host_failure() {
            BenchError::HostState { what, source }
        } else {
            BenchError::ResourceSetup { what, source }
        }
    }

    pub fn teardown(what: impl Into<String>, source: ExecError) -> Self {
        BenchError::ResourceTeardown {
            what: what.into(),
            source,
        }
    }

    pub fn severity(&self) -> Severity {
        match self {
            BenchError::ResourceSetup { .. }
            | BenchError::ResourceTeardown { .. }
            | BenchError::WorkloadExecution { .. }
            | BenchError::ResultParse { .. } => Severity::Run,
            BenchError::Configuration(_)
            | BenchError::HostState { .. }
            | BenchError::SmtRestore { .. } => Severity::Fatal,
        }
    }
}

pub type Result<T, E = BenchError> = std::result::Result<T, E>;
