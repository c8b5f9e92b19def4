//! Maximum recorded temperature per coordinate.
//!
//! Records are CSV-like weather observations. The key is the raw latitude
//! and longitude text (fields 2 and 3), the value is TMAX (field 36).
//! Malformed records are never dropped: a missing coordinate collapses into
//! the `NA` key and a missing or unparseable TMAX becomes [`SENTINEL`].

use crate::*;
use anyhow::{bail, Result};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use clap::{Parser, ValueEnum};
use std::cell::RefCell;
use thiserror::Error;
use tracing::{debug, warn};

const LATITUDE: usize = 2;
const LONGITUDE: usize = 3;
const TMAX: usize = 36;

/// Key used for records that have no coordinate fields.
pub const MALFORMED_KEY: &str = "NA";

/// Stand-in for an unreadable TMAX. Never wins a max against a real reading.
pub const SENTINEL: f32 = f32::MIN;

/// What to write for a key that only ever saw [`SENTINEL`] values.
#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum MalformedOnly {
    /// Write the sentinel itself.
    Sentinel,
    /// Leave the key out of the output.
    Omit,
    /// Write `MalformedOnly` in place of a number.
    Marker,
}

#[derive(Parser, Debug, Clone, PartialEq)]
#[clap(no_binary_name = true)]
struct Args {
    /// Drop the first line of every input file.
    #[clap(long)]
    skip_header: bool,

    #[clap(long, value_enum, default_value_t = MalformedOnly::Sentinel)]
    malformed_only: MalformedOnly,
}

/// Why a field could not be used.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ParseError {
    #[error("field {0} is missing")]
    MissingField(usize),
    #[error("field {field} is not a number: `{text}`")]
    NotANumber { field: usize, text: String },
}

/// Parses the workload's auxiliary arguments, caching the last result per
/// thread since map runs once per record.
fn args(aux: &Bytes) -> Result<Args> {
    thread_local! {
        static PARSED: RefCell<Option<(Bytes, Args)>> = const { RefCell::new(None) };
    }
    PARSED.with(|cell| -> Result<Args> {
        if let Some((raw, args)) = cell.borrow().as_ref() {
            if raw == aux {
                return Ok(args.clone());
            }
        }
        let argv: Vec<String> = if aux.is_empty() {
            Vec::new()
        } else {
            serde_json::from_slice(aux)?
        };
        let args = Args::try_parse_from(argv)?;
        *cell.borrow_mut() = Some((aux.clone(), args.clone()));
        Ok(args)
    })
}

/// Splits a line into fields: quotes removed, split on `,`, trailing empty
/// fields dropped.
pub fn fields(line: &str) -> Vec<String> {
    let mut fields: Vec<String> = line.replace('"', "").split(',').map(str::to_string).collect();
    while fields.last().is_some_and(|f| f.is_empty()) {
        fields.pop();
    }
    fields
}

/// The coordinate key, `lat,long`, kept as opaque text.
pub fn parse_key(fields: &[String]) -> Result<String, ParseError> {
    match (fields.get(LATITUDE), fields.get(LONGITUDE)) {
        (Some(lat), Some(long)) => Ok(format!("{lat},{long}")),
        (None, _) => Err(ParseError::MissingField(LATITUDE)),
        (Some(_), None) => Err(ParseError::MissingField(LONGITUDE)),
    }
}

pub fn parse_tmax(fields: &[String]) -> Result<f32, ParseError> {
    let raw = fields.get(TMAX).ok_or(ParseError::MissingField(TMAX))?;
    let not_a_number = || ParseError::NotANumber {
        field: TMAX,
        text: raw.clone(),
    };
    let value: f32 = raw.trim().parse().map_err(|_| not_a_number())?;
    if value.is_nan() {
        return Err(not_a_number());
    }
    Ok(value)
}

/// Extracts `(key, tmax)` from one line, substituting [`MALFORMED_KEY`] and
/// [`SENTINEL`] for fields that cannot be used.
pub fn extract(line: &str) -> (String, f32) {
    let fields = fields(line);
    let key = parse_key(&fields).unwrap_or_else(|err| {
        debug!(%err, line, "malformed record, using `{MALFORMED_KEY}` key");
        MALFORMED_KEY.to_string()
    });
    let tmax = parse_tmax(&fields).unwrap_or_else(|err| {
        debug!(%err, line, "malformed record, using sentinel TMAX");
        SENTINEL
    });
    (key, tmax)
}

pub fn encode(value: f32) -> Bytes {
    let mut buf = BytesMut::with_capacity(4);
    buf.put_f32(value);
    buf.freeze()
}

pub fn decode(mut value: Bytes) -> Result<f32> {
    if value.len() != 4 {
        bail!("expected a 4 byte f32 value, got {} bytes", value.len());
    }
    Ok(value.get_f32())
}

pub fn map(kv: KeyValue, aux: Bytes) -> MapOutput {
    let args = args(&aux)?;
    if args.skip_header && utils::record_offset(&kv.key) == Some(0) {
        return Ok(Box::new(std::iter::empty()));
    }

    let line = String::from_utf8_lossy(&kv.value);
    let (key, tmax) = extract(&line);
    let out = KeyValue::new(Bytes::from(key), encode(tmax));
    Ok(Box::new(std::iter::once(Ok(out))))
}

/// Maximum of all values for a key under [`f32::total_cmp`], so `0.0`
/// beats `-0.0` whatever order the values arrive in. Also used as the
/// combiner.
pub fn reduce(
    key: Bytes,
    values: Box<dyn Iterator<Item = Bytes> + '_>,
    _aux: Bytes,
) -> Result<Bytes> {
    let mut max: Option<f32> = None;
    for value in values {
        let value = decode(value)?;
        max = Some(max.map_or(value, |m| std::cmp::max_by(m, value, f32::total_cmp)));
    }
    let max = max.unwrap_or_else(|| {
        warn!(key = %String::from_utf8_lossy(&key), "empty group, reporting sentinel");
        SENTINEL
    });
    Ok(encode(max))
}

pub fn render(_key: &Bytes, value: Bytes, aux: Bytes) -> Result<Option<String>> {
    let max = decode(value)?;
    if max == SENTINEL {
        match args(&aux)?.malformed_only {
            MalformedOnly::Sentinel => {}
            MalformedOnly::Omit => return Ok(None),
            MalformedOnly::Marker => return Ok(Some(String::from("MalformedOnly"))),
        }
    }
    Ok(Some(format!("{max:?}")))
}
