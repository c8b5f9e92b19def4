use anyhow::{Context, Result};
use bytes::Bytes;
use dashmap::DashMap;
use itertools::Itertools;
use rayon::prelude::*;
use serde::Serialize;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};

use crate::source::{self, Split, SplitReader};
use crate::standalone::sink::{OutputCommitter, PartitionWriter};
use crate::standalone::Job;
use crate::*;

// types related to this engine
type BucketIndex = u32;
type Buckets = DashMap<BucketIndex, Vec<KeyValue>>;

/// What one successful map task hands to the shuffle.
#[derive(Debug, Default)]
pub struct MapTaskOutput {
    /// Combined pairs, indexed by reduce shard.
    pub buckets: Vec<Vec<KeyValue>>,
    pub records: u64,
}

/// Totals reported by a finished job.
#[derive(Debug, Clone, Serialize)]
pub struct JobSummary {
    pub splits: usize,
    pub records: u64,
    /// Pairs that crossed the shuffle, after combining.
    pub shuffled_pairs: u64,
    pub keys_written: u64,
    pub output: PathBuf,
}

/// Runs `attempt` until it succeeds or `max_attempts` is used up.
///
/// Errors and panics both count as a failed attempt. A
/// [`JobError`] that is not retryable ends the task immediately.
pub fn with_retries<T>(
    phase: Phase,
    task: usize,
    max_attempts: u32,
    mut attempt: impl FnMut() -> Result<T>,
) -> Result<T, JobError> {
    let mut reason = String::new();
    for n in 1..=max_attempts {
        let err = match panic::catch_unwind(AssertUnwindSafe(&mut attempt)) {
            Ok(Ok(value)) => return Ok(value),
            Ok(Err(err)) => err,
            Err(payload) => anyhow::anyhow!("panicked: {}", utils::panic_message(payload)),
        };
        let err = match err.downcast::<JobError>() {
            Ok(job_err) if !job_err.is_retryable() => {
                error!(%phase, task, error = %job_err, "task failed, not retrying");
                return Err(job_err);
            }
            Ok(job_err) => anyhow::Error::new(job_err),
            Err(err) => err,
        };
        reason = format!("{err:#}");
        warn!(%phase, task, attempt = n, max_attempts, error = %reason, "task attempt failed");
    }
    error!(%phase, task, max_attempts, "task exhausted its attempts");
    Err(JobError::TaskFailure {
        phase,
        task,
        attempts: max_attempts,
        reason,
    })
}

/// Groups `kvs` by key and folds every group with `reduce`.
///
/// The result is sorted by key and holds one pair per distinct key.
pub fn combine(mut kvs: Vec<KeyValue>, reduce: ReduceFn, aux: &Bytes) -> Result<Vec<KeyValue>> {
    kvs.sort_unstable_by_key(KeyValue::key);
    let mut combined = Vec::new();
    for (key, value_group) in &kvs.into_iter().chunk_by(KeyValue::key) {
        let iter = value_group.map(KeyValue::into_value);
        let value = reduce(key.clone(), Box::new(iter), aux.clone())?;
        combined.push(KeyValue::new(key, value));
    }
    Ok(combined)
}

/// Maps one split, combining locally whenever the buffer grows past the
/// job's threshold and once more at the end.
pub fn map_split(
    split: &Split,
    job: &Job,
    engine: &Workload,
    aux: &Bytes,
) -> Result<MapTaskOutput> {
    let reader = SplitReader::open(split)?;
    let map_func = engine.map_fn;

    let mut buffer: Vec<KeyValue> = Vec::new();
    let mut next_combine = job.combine_threshold;
    let mut records: u64 = 0;
    for line in reader {
        let (offset, line) = line.with_context(|| {
            format!("reading {} [{}, {})", split.path.display(), split.start, split.end)
        })?;
        records += 1;
        let input_kv = KeyValue::new(utils::record_key(&split.path, offset), line);
        for item in map_func(input_kv, aux.clone())? {
            buffer.push(item?);
        }
        if buffer.len() >= next_combine {
            if let Some(combine_fn) = engine.combine_fn {
                buffer = combine(buffer, combine_fn, aux)?;
            }
            // many distinct keys would otherwise re-trigger on every record
            next_combine = job.combine_threshold.max(buffer.len() * 2);
        }
    }
    if let Some(combine_fn) = engine.combine_fn {
        buffer = combine(buffer, combine_fn, aux)?;
    }

    let mut buckets = vec![Vec::new(); job.reducers as usize];
    for kv in buffer {
        let bucket_no = (engine.partition_fn)(&kv.key, job.reducers);
        if bucket_no >= job.reducers {
            return Err(JobError::InvalidConfig(format!(
                "partitioner sent a key to shard {bucket_no} of {}",
                job.reducers
            ))
            .into());
        }
        buckets[bucket_no as usize].push(kv);
    }
    debug!(split = split.index, records, "map task done");
    Ok(MapTaskOutput { buckets, records })
}

/// Runs one map task per split in parallel and shuffles their output into
/// per-shard buckets. Returns once every map task has finished.
pub fn perform_map(
    job: &Job,
    splits: &[Split],
    engine: &Workload,
    aux: &Bytes,
) -> Result<(Buckets, u64), JobError> {
    let outputs = splits
        .par_iter()
        .map(|split| {
            with_retries(Phase::Map, split.index, job.max_attempts, || {
                map_split(split, job, engine, aux)
            })
        })
        .collect::<Result<Vec<_>, JobError>>()?;

    let records: u64 = outputs.iter().map(|out| out.records).sum();
    let buckets: Buckets = (0..job.reducers).map(|shard| (shard, Vec::new())).collect();
    outputs.into_par_iter().for_each(|out| {
        for (bucket_no, kvs) in out.buckets.into_iter().enumerate() {
            if kvs.is_empty() {
                continue;
            }
            #[allow(clippy::unwrap_or_default)]
            buckets
                .entry(bucket_no as BucketIndex)
                .or_insert(Vec::new())
                .extend(kvs);
        }
    });
    Ok((buckets, records))
}

/// Reduces one shard's sorted bucket into its partition file.
///
/// Keys are reduced one group at a time. Returns the number of lines written.
pub fn reduce_shard(
    reduce_id: BucketIndex,
    bkt: &[KeyValue],
    job: &Job,
    engine: &Workload,
    aux: &Bytes,
    out_path: &Path,
) -> Result<u64> {
    let reduce_func = engine.reduce_fn;
    let mut out_file = PartitionWriter::create(out_path)
        .with_context(|| format!("creating {}", out_path.display()))?;
    let mut written = 0;
    for (key, value_group) in &bkt.iter().chunk_by(|kv| kv.key()) {
        if (engine.partition_fn)(&key, job.reducers) != reduce_id {
            return Err(JobError::InvalidConfig(format!(
                "key {:?} does not belong to shard {reduce_id}",
                String::from_utf8_lossy(&key)
            ))
            .into());
        }
        let iter = value_group.map(KeyValue::value);
        let out = reduce_func(key.clone(), Box::new(iter), aux.clone())?;
        if let Some(rendered) = (engine.render_fn)(&key, out, aux.clone())? {
            out_file.write_record(&key, &rendered)?;
            written += 1;
        }
    }
    out_file.finish()?;
    Ok(written)
}

/// Reduces every shard in parallel, one output partition per shard.
///
/// Returns the total number of keys written.
pub fn perform_reduce(
    job: &Job,
    engine: &Workload,
    aux: &Bytes,
    buckets: Buckets,
    committer: &OutputCommitter,
) -> Result<u64, JobError> {
    buckets
        .into_par_iter()
        .map(|(reduce_id, mut bkt)| {
            bkt.sort_unstable_by_key(KeyValue::key);
            let out_path = committer.partition_path(reduce_id);
            with_retries(Phase::Reduce, reduce_id as usize, job.max_attempts, || {
                reduce_shard(reduce_id, &bkt, job, engine, aux, &out_path)
            })
        })
        .try_reduce(|| 0, |a, b| Ok(a + b))
}

/// Runs `job` with the workload registered under `job.workload`.
pub fn run_job(job: &Job) -> Result<JobSummary, JobError> {
    let engine = workload::try_named(&job.workload)
        .ok_or_else(|| JobError::UnknownWorkload(job.workload.clone()))?;
    run_workload(job, &engine)
}

/// Runs `job` with an explicit workload.
///
/// Output is all-or-nothing: on any error the output path is left untouched.
pub fn run_workload(job: &Job, engine: &Workload) -> Result<JobSummary, JobError> {
    job.validate()?;
    let serialized_args = serde_json::to_string(&job.args)
        .map(Bytes::from)
        .map_err(|e| JobError::InvalidConfig(format!("workload args: {e}")))?;

    let files = source::expand_input(&job.input)?;
    let splits = source::plan_splits(&files, job.split_size)?;
    let committer = OutputCommitter::prepare(&job.output, job.force)?;
    info!(files = files.len(), splits = splits.len(), reducers = job.reducers, "map phase");

    /*  The map phase also shuffles: a task's output is handed to the
     *  buckets only after the task succeeded, so retries never duplicate.
     */
    let (buckets, records) = perform_map(job, &splits, engine, &serialized_args)?;
    let shuffled_pairs: u64 = buckets.iter().map(|b| b.value().len() as u64).sum();
    info!(records, shuffled_pairs, "reduce phase");

    let keys_written = perform_reduce(job, engine, &serialized_args, buckets, &committer)?;
    let output = committer.commit()?;
    info!(keys_written, output = %output.display(), "job committed");

    Ok(JobSummary {
        splits: splits.len(),
        records,
        shuffled_pairs,
        keys_written,
        output,
    })
}
