use bytes::Bytes;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::{tempdir, TempDir};
use weathermax::standalone::engine::{run_job, run_workload};
use weathermax::standalone::Job;
use weathermax::workload::{self, weather_max};
use weathermax::{JobError, KeyValue, MapOutput, Phase, Workload};

/// A quoted 40-field observation row.
fn row(lat: &str, long: &str, tmax: &str) -> String {
    let mut fields: Vec<String> = (0..40).map(|i| format!("c{i}")).collect();
    fields[2] = lat.to_string();
    fields[3] = long.to_string();
    fields[36] = tmax.to_string();
    let quoted: Vec<String> = fields.iter().map(|f| format!("\"{f}\"")).collect();
    quoted.join(",")
}

fn header() -> String {
    row("LATITUDE", "LONGITUDE", "TMAX")
}

fn write_input(dir: &Path, name: &str, rows: &[String]) -> PathBuf {
    let path = dir.join(name);
    let mut text = rows.join("\n");
    text.push('\n');
    fs::write(&path, text).unwrap();
    path
}

/// Reads every partition, checking each key appears once across all of them.
fn read_output(dir: &Path) -> BTreeMap<String, String> {
    let mut results = BTreeMap::new();
    for part in partitions(dir) {
        for line in fs::read_to_string(&part).unwrap().lines() {
            let (key, value) = line.split_once('\t').unwrap();
            let prev = results.insert(key.to_string(), value.to_string());
            assert!(prev.is_none(), "key {key} written twice");
        }
    }
    results
}

fn partitions(dir: &Path) -> Vec<PathBuf> {
    let mut parts: Vec<PathBuf> = fs::read_dir(dir).unwrap().map(|e| e.unwrap().path()).collect();
    parts.sort();
    parts
}

fn scratch() -> (TempDir, PathBuf) {
    let dir = tempdir().unwrap();
    let input = dir.path().join("input");
    fs::create_dir(&input).unwrap();
    (dir, input)
}

fn sample_rows() -> Vec<String> {
    let mut rows = vec![header()];
    for i in 0..200 {
        let lat = format!("{}.{}", 30 + i % 7, i % 3);
        let long = format!("-{}.5", 70 + i % 5);
        rows.push(row(&lat, &long, &format!("{}.25", (i * 37) % 45)));
    }
    rows.push(String::from("a,b"));
    rows.push(row("44.1", "-70.0", ""));
    rows
}

#[test]
fn three_records_two_keys() {
    let (dir, input) = scratch();
    write_input(
        &input,
        "obs.csv",
        &[row("40", "-73", "10.0"), row("40", "-73", "22.5"), row("41", "-74", "5.0")],
    );
    let output = dir.path().join("out");
    let job = Job {
        reducers: 3,
        ..Job::new(input.display(), output.display())
    };
    let summary = run_job(&job).unwrap();

    assert_eq!(summary.records, 3);
    assert_eq!(summary.keys_written, 2);
    assert_eq!(partitions(&output).len(), 3);
    let expected: BTreeMap<String, String> = [("40,-73", "22.5"), ("41,-74", "5.0")]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    assert_eq!(read_output(&output), expected);
}

#[test]
fn malformed_rows_do_not_abort_and_do_not_win() {
    let (dir, input) = scratch();
    write_input(
        &input,
        "obs.csv",
        &[
            String::from("a,b"),
            row("40.5", "-73.9", ""),
            row("40.5", "-73.9", "18.5"),
            row("12.0", "8.0", "not a number"),
        ],
    );
    let output = dir.path().join("out");
    run_job(&Job::new(input.display(), output.display())).unwrap();

    let results = read_output(&output);
    assert_eq!(results["40.5,-73.9"], "18.5");
    let sentinel = format!("{:?}", weather_max::SENTINEL);
    assert_eq!(results["NA"], sentinel);
    assert_eq!(results["12.0,8.0"], sentinel);
}

#[test]
fn malformed_only_keys_can_be_omitted_or_marked() {
    let (dir, input) = scratch();
    write_input(&input, "obs.csv", &[String::from("a,b"), row("1", "2", "3")]);

    let omitted = dir.path().join("omit");
    let job = Job {
        args: vec!["--malformed-only".into(), "omit".into()],
        ..Job::new(input.display(), omitted.display())
    };
    run_job(&job).unwrap();
    assert_eq!(read_output(&omitted).keys().collect::<Vec<_>>(), vec!["1,2"]);

    let marked = dir.path().join("marker");
    let job = Job {
        args: vec!["--malformed-only".into(), "marker".into()],
        ..Job::new(input.display(), marked.display())
    };
    run_job(&job).unwrap();
    assert_eq!(read_output(&marked)["NA"], "MalformedOnly");
}

#[test]
fn header_rows_are_data_unless_skipped() {
    let (dir, input) = scratch();
    write_input(&input, "a.csv", &[header(), row("1", "2", "3")]);
    write_input(&input, "b.csv", &[header(), row("1", "2", "4")]);

    let kept = dir.path().join("kept");
    run_job(&Job::new(input.display(), kept.display())).unwrap();
    assert!(read_output(&kept).contains_key("LATITUDE,LONGITUDE"));

    let skipped = dir.path().join("skipped");
    let job = Job {
        args: vec!["--skip-header".into()],
        split_size: 50,
        ..Job::new(input.display(), skipped.display())
    };
    let summary = run_job(&job).unwrap();
    assert_eq!(summary.records, 4);
    let results = read_output(&skipped);
    assert_eq!(results.len(), 1);
    assert_eq!(results["1,2"], "4.0");
}

#[test]
fn shard_count_only_redistributes() {
    let (dir, input) = scratch();
    write_input(&input, "part-0.csv", &sample_rows());
    write_input(&input, "part-1.csv", &sample_rows()[50..]);

    let mut results = Vec::new();
    for (reducers, split_size) in [(1, 1 << 20), (8, 333), (3, 97)] {
        let output = dir.path().join(format!("out-{reducers}"));
        let job = Job {
            reducers,
            split_size,
            combine_threshold: 16,
            ..Job::new(input.display(), output.display())
        };
        run_job(&job).unwrap();
        assert_eq!(partitions(&output).len(), reducers as usize);
        results.push(read_output(&output));
    }
    assert!(results.len() == 3 && results[0].len() > 30);
    assert_eq!(results[0], results[1]);
    assert_eq!(results[0], results[2]);
}

#[test]
fn reruns_are_byte_identical() {
    let (dir, input) = scratch();
    write_input(&input, "obs.csv", &sample_rows());

    let mut contents = Vec::new();
    for run in 0..2 {
        let output = dir.path().join(format!("run-{run}"));
        let job = Job {
            reducers: 4,
            split_size: 512,
            ..Job::new(input.display(), output.display())
        };
        run_job(&job).unwrap();
        let bytes: Vec<Vec<u8>> = partitions(&output).iter().map(|p| fs::read(p).unwrap()).collect();
        contents.push(bytes);
    }
    assert_eq!(contents[0], contents[1]);
}

#[test]
fn existing_output_fails_before_work() {
    let (dir, input) = scratch();
    write_input(&input, "obs.csv", &[row("1", "2", "3")]);
    let output = dir.path().join("out");
    fs::create_dir(&output).unwrap();
    fs::write(output.join("keep-me"), "x").unwrap();

    let err = run_job(&Job::new(input.display(), output.display())).unwrap_err();
    assert!(matches!(err, JobError::OutputAlreadyExists(_)));
    assert!(output.join("keep-me").exists());

    let job = Job {
        force: true,
        ..Job::new(input.display(), output.display())
    };
    run_job(&job).unwrap();
    assert!(!output.join("keep-me").exists());
    assert_eq!(read_output(&output)["1,2"], "3.0");
}

#[test]
fn missing_input_is_an_error_not_empty_output() {
    let dir = tempdir().unwrap();
    let parent = dir.path().join("results");
    let output = parent.join("out");
    let err = run_job(&Job::new(dir.path().join("nothing-*.csv").display(), output.display()))
        .unwrap_err();
    assert!(matches!(err, JobError::SourceUnavailable { .. }), "{err}");
    // input is resolved before any output directory is created
    assert!(!parent.exists());
    assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
}

fn broken_map(_kv: KeyValue, _aux: Bytes) -> MapOutput {
    anyhow::bail!("disk on fire")
}

#[test]
fn failed_map_task_publishes_nothing() {
    let (dir, input) = scratch();
    write_input(&input, "obs.csv", &sample_rows());
    let output = dir.path().join("out");
    let engine = Workload {
        map_fn: broken_map,
        ..workload::named("weather-max").unwrap()
    };
    let job = Job {
        max_attempts: 2,
        ..Job::new(input.display(), output.display())
    };

    match run_workload(&job, &engine).unwrap_err() {
        JobError::TaskFailure { phase, attempts, reason, .. } => {
            assert_eq!(phase, Phase::Map);
            assert_eq!(attempts, 2);
            assert!(reason.contains("disk on fire"));
        }
        other => panic!("unexpected {other}"),
    }
    // only the input directory remains; no output, no staging leftovers
    let names: Vec<String> = fs::read_dir(dir.path())
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    assert_eq!(names, vec!["input"]);
}

#[test]
fn unknown_workload() {
    let dir = tempdir().unwrap();
    let job = Job {
        workload: String::from("wc"),
        ..Job::new(dir.path().display(), dir.path().join("out").display())
    };
    assert!(matches!(run_job(&job), Err(JobError::UnknownWorkload(_))));
}

#[test]
fn empty_input_still_writes_every_partition() {
    let (dir, input) = scratch();
    fs::write(input.join("empty.csv"), "").unwrap();
    let output = dir.path().join("out");
    let job = Job {
        reducers: 5,
        ..Job::new(input.display(), output.display())
    };
    let summary = run_job(&job).unwrap();
    assert_eq!(summary.splits, 0);
    assert_eq!(partitions(&output).len(), 5);
    assert!(read_output(&output).is_empty());
}
