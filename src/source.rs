//! Record source: expands the job input into files, cuts files into
//! line-aligned splits and reads the lines of one split lazily.
//!
//! A split covers the byte range `[start, end)` of one file. It owns every
//! line whose first byte lies inside that range, even if the line runs past
//! `end`. A reader for a split that does not start at offset 0 therefore
//! skips the tail of the line that straddles `start`; the previous split
//! has already read it.

use bytes::Bytes;
use glob::glob;
use std::fs::{self, File};
use std::io::{self, BufRead, BufReader, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::JobError;

/// An independently readable chunk of one input file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Split {
    /// Position of this split in the job's split list.
    pub index: usize,
    pub path: PathBuf,
    pub start: u64,
    pub end: u64,
}

/// Resolves the job input into a sorted list of files.
///
/// `input` may name a file, a directory (all regular files directly inside
/// it, ignoring names starting with `.` or `_`) or a glob pattern. Matching
/// nothing is an error: missing input must not look like empty input.
pub fn expand_input(input: &str) -> Result<Vec<PathBuf>, JobError> {
    let mut files = Vec::new();
    let path = Path::new(input);
    if path.exists() {
        collect_files(path, &mut files)?;
    } else {
        let entries = glob(input)
            .map_err(|e| JobError::InvalidConfig(format!("bad input pattern `{input}`: {e}")))?;
        for entry in entries {
            let entry = entry.map_err(|e| JobError::SourceUnavailable {
                path: e.path().to_path_buf(),
                source: io::Error::from(e),
            })?;
            collect_files(&entry, &mut files)?;
        }
    }

    if files.is_empty() {
        return Err(JobError::SourceUnavailable {
            path: PathBuf::from(input),
            source: io::Error::new(io::ErrorKind::NotFound, "input matched no files"),
        });
    }
    files.sort();
    files.dedup();
    Ok(files)
}

fn collect_files(path: &Path, files: &mut Vec<PathBuf>) -> Result<(), JobError> {
    let unavailable = |source| JobError::SourceUnavailable {
        path: path.to_path_buf(),
        source,
    };
    if !path.is_dir() {
        files.push(path.to_path_buf());
        return Ok(());
    }
    for entry in fs::read_dir(path).map_err(unavailable)? {
        let entry = entry.map_err(unavailable)?;
        let hidden = entry
            .file_name()
            .to_str()
            .map_or(false, |name| name.starts_with('.') || name.starts_with('_'));
        if !hidden && entry.file_type().map_err(unavailable)?.is_file() {
            files.push(entry.path());
        }
    }
    Ok(())
}

/// Cuts every file into splits of at most `split_size` bytes.
///
/// Empty files contribute no splits.
pub fn plan_splits(files: &[PathBuf], split_size: u64) -> Result<Vec<Split>, JobError> {
    if split_size == 0 {
        return Err(JobError::InvalidConfig(String::from("split size must be positive")));
    }
    let mut splits = Vec::new();
    for path in files {
        let len = fs::metadata(path)
            .map_err(|source| JobError::SourceUnavailable {
                path: path.clone(),
                source,
            })?
            .len();
        let mut start = 0;
        while start < len {
            let end = start.saturating_add(split_size).min(len);
            splits.push(Split {
                index: splits.len(),
                path: path.clone(),
                start,
                end,
            });
            start = end;
        }
        debug!(path = %path.display(), len, "planned splits");
    }
    Ok(splits)
}

/// Lazily yields `(offset, line)` for every line owned by one split.
///
/// Lines are returned without their `\n` or `\r\n` terminator.
pub struct SplitReader {
    reader: BufReader<File>,
    pos: u64,
    end: u64,
    buf: Vec<u8>,
}

impl SplitReader {
    pub fn open(split: &Split) -> Result<Self, JobError> {
        let unavailable = |source| JobError::SourceUnavailable {
            path: split.path.clone(),
            source,
        };
        let file = File::open(&split.path).map_err(unavailable)?;
        let mut reader = BufReader::new(file);
        let mut pos = split.start;
        if split.start > 0 {
            // Start one byte early so a line beginning exactly at `start`
            // is kept: the skipped "tail" is then just the previous '\n'.
            reader
                .seek(SeekFrom::Start(split.start - 1))
                .map_err(unavailable)?;
            let mut tail = Vec::new();
            let skipped = reader.read_until(b'\n', &mut tail).map_err(unavailable)?;
            pos = split.start - 1 + skipped as u64;
        }
        Ok(Self {
            reader,
            pos,
            end: split.end,
            buf: Vec::new(),
        })
    }
}

impl Iterator for SplitReader {
    type Item = io::Result<(u64, Bytes)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.pos >= self.end {
            return None;
        }
        self.buf.clear();
        let offset = self.pos;
        match self.reader.read_until(b'\n', &mut self.buf) {
            Ok(0) => None,
            Ok(n) => {
                self.pos += n as u64;
                Some(Ok((offset, Bytes::copy_from_slice(trim_line_end(&self.buf)))))
            }
            Err(e) => Some(Err(e)),
        }
    }
}

fn trim_line_end(line: &[u8]) -> &[u8] {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    line.strip_suffix(b"\r").unwrap_or(line)
}
