//! Job-level failures.
//!
//! Record-level anomalies never show up here; a workload recovers from them
//! inside its map function. Everything in [`JobError`] aborts the job.

use std::fmt;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// The phase a task belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Map,
    Reduce,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Map => f.write_str("map"),
            Phase::Reduce => f.write_str("reduce"),
        }
    }
}

#[derive(Error, Debug)]
pub enum JobError {
    /// An input file or split could not be opened or read.
    #[error("input `{}` is unavailable: {source}", .path.display())]
    SourceUnavailable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The output location is already taken and `force` was not set.
    #[error("output `{}` already exists", .0.display())]
    OutputAlreadyExists(PathBuf),

    /// A task kept failing until its attempts ran out.
    #[error("{phase} task {task} failed after {attempts} attempt(s): {reason}")]
    TaskFailure {
        phase: Phase,
        task: usize,
        attempts: u32,
        reason: String,
    },

    #[error("no workload named `{0}`")]
    UnknownWorkload(String),

    #[error("invalid job configuration: {0}")]
    InvalidConfig(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl JobError {
    /// Whether retrying the failed task could possibly help.
    pub fn is_retryable(&self) -> bool {
        matches!(self, JobError::Io(_))
    }
}
