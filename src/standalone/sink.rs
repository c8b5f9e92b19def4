//! Output partitions and the job-level commit.
//!
//! Reduce tasks write into a hidden staging directory beside the requested
//! output. The staging directory becomes the output in a single rename once
//! every shard is done; until then nothing is visible at the output path.

use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::JobError;

/// File name of the partition owned by `shard`.
pub fn partition_name(shard: u32) -> String {
    format!("mr-out-{shard}")
}

/// Owns the staging directory for one job's output.
///
/// Dropping it without calling [`OutputCommitter::commit`] removes the
/// staging directory, so a failed job publishes nothing.
#[derive(Debug)]
pub struct OutputCommitter {
    output: PathBuf,
    staging: PathBuf,
    force: bool,
    committed: bool,
}

impl OutputCommitter {
    /// Checks the output location and creates the staging directory.
    pub fn prepare(output: impl AsRef<Path>, force: bool) -> Result<Self, JobError> {
        let output = output.as_ref().to_path_buf();
        if output.exists() && !force {
            return Err(JobError::OutputAlreadyExists(output));
        }
        let name = output
            .file_name()
            .ok_or_else(|| {
                JobError::InvalidConfig(format!("output `{}` has no file name", output.display()))
            })?
            .to_string_lossy()
            .into_owned();
        let parent = match output.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&parent)?;

        let staging = parent.join(format!(".{}.staging-{}", name, Uuid::new_v4()));
        fs::create_dir(&staging)?;
        debug!(staging = %staging.display(), "created staging directory");

        Ok(Self {
            output,
            staging,
            force,
            committed: false,
        })
    }

    /// Where the partition for `shard` is written before the commit.
    pub fn partition_path(&self, shard: u32) -> PathBuf {
        self.staging.join(partition_name(shard))
    }

    /// Publishes the staged partitions at the output path.
    pub fn commit(mut self) -> Result<PathBuf, JobError> {
        if self.output.exists() {
            if !self.force {
                return Err(JobError::OutputAlreadyExists(self.output.clone()));
            }
            warn!(output = %self.output.display(), "replacing existing output");
            if self.output.is_dir() {
                fs::remove_dir_all(&self.output)?;
            } else {
                fs::remove_file(&self.output)?;
            }
        }
        fs::rename(&self.staging, &self.output)?;
        self.committed = true;
        Ok(self.output.clone())
    }
}

impl Drop for OutputCommitter {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        if let Err(e) = fs::remove_dir_all(&self.staging) {
            if e.kind() != io::ErrorKind::NotFound {
                warn!(staging = %self.staging.display(), error = %e, "could not remove staging directory");
            }
        }
    }
}

/// Writes `key<TAB>value` lines to one partition file.
pub struct PartitionWriter {
    out: BufWriter<File>,
}

impl PartitionWriter {
    /// Creates (or truncates) the partition file.
    pub fn create(path: &Path) -> io::Result<Self> {
        Ok(Self {
            out: BufWriter::new(File::create(path)?),
        })
    }

    pub fn write_record(&mut self, key: &[u8], value: &str) -> io::Result<()> {
        self.out.write_all(key)?;
        self.out.write_all(b"\t")?;
        self.out.write_all(value.as_bytes())?;
        self.out.write_all(b"\n")
    }

    /// Flushes and syncs the partition.
    pub fn finish(self) -> io::Result<()> {
        let file = self.out.into_inner().map_err(|e| e.into_error())?;
        file.sync_all()
    }
}
