use clap::{ArgAction, Parser, Subcommand};
use serde::{Deserialize, Serialize};

use crate::JobError;

pub mod engine;
pub mod sink;

pub const DEFAULT_REDUCERS: u32 = 4;
pub const DEFAULT_SPLIT_SIZE: u64 = 64 * 1024 * 1024;
pub const DEFAULT_MAX_ATTEMPTS: u32 = 4;
pub const DEFAULT_COMBINE_THRESHOLD: usize = 64 * 1024;

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Args {
    #[clap(subcommand)]
    pub command: Commands,

    /// Increase log verbosity (-v debug, -vv trace). `RUST_LOG` wins if set.
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run a job on this machine
    Submit {
        /// Input file, directory or glob spec
        #[arg(short, long)]
        input: String,

        /// Name of the workload
        #[arg(short, long, default_value = "weather-max")]
        workload: String,

        /// Output directory; must not exist unless --force is given
        #[arg(short, long)]
        output: String,

        /// Number of reduce shards (one output partition each)
        #[arg(short = 'r', long, default_value_t = DEFAULT_REDUCERS)]
        reducers: u32,

        /// Maximum split size in bytes
        #[arg(long, default_value_t = DEFAULT_SPLIT_SIZE)]
        split_size: u64,

        /// Attempts per task before the job fails
        #[arg(long, default_value_t = DEFAULT_MAX_ATTEMPTS)]
        max_attempts: u32,

        /// Buffered map output pairs that trigger an intermediate combine
        #[arg(long, default_value_t = DEFAULT_COMBINE_THRESHOLD)]
        combine_threshold: usize,

        /// Replace an existing output directory
        #[arg(long)]
        force: bool,

        /// Auxiliary arguments to pass to the MapReduce application.
        #[clap(value_parser, last = true)]
        args: Vec<String>,
    },
}

impl From<Commands> for Job {
    fn from(command: Commands) -> Self {
        match command {
            Commands::Submit {
                input,
                workload,
                output,
                reducers,
                split_size,
                max_attempts,
                combine_threshold,
                force,
                args,
            } => Job {
                input,
                workload,
                output,
                args,
                reducers,
                split_size,
                max_attempts,
                combine_threshold,
                force,
            },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub input: String,
    pub workload: String,
    pub output: String,
    pub args: Vec<String>,
    pub reducers: u32,
    pub split_size: u64,
    pub max_attempts: u32,
    pub combine_threshold: usize,
    pub force: bool,
}

impl Job {
    /// A `weather-max` job with default tuning.
    pub fn new(input: impl ToString, output: impl ToString) -> Self {
        Self {
            input: input.to_string(),
            workload: String::from("weather-max"),
            output: output.to_string(),
            args: Vec::new(),
            reducers: DEFAULT_REDUCERS,
            split_size: DEFAULT_SPLIT_SIZE,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            combine_threshold: DEFAULT_COMBINE_THRESHOLD,
            force: false,
        }
    }

    pub fn validate(&self) -> Result<(), JobError> {
        let invalid = |reason: &str| Err(JobError::InvalidConfig(reason.to_string()));
        if self.reducers == 0 {
            return invalid("reducers must be at least 1");
        }
        if self.split_size == 0 {
            return invalid("split size must be positive");
        }
        if self.max_attempts == 0 {
            return invalid("max attempts must be at least 1");
        }
        if self.combine_threshold == 0 {
            return invalid("combine threshold must be positive");
        }
        Ok(())
    }
}
