use anyhow::*;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;
use weathermax::standalone::{engine::run_job, Args, Job};

fn parse_args() -> (Job, u8) {
    let args = Args::parse();
    (Job::from(args.command), args.verbose)
}

fn init_tracing(verbose: u8) {
    let default = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(verbose >= 2)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> Result<()> {
    let (job, verbose) = parse_args();
    init_tracing(verbose);
    info!(input = %job.input, output = %job.output, workload = %job.workload, "submitting job");

    let summary = run_job(&job).with_context(|| format!("job writing to `{}` failed", job.output))?;
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}
