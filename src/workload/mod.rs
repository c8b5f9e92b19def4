//! Converts MapReduce application names to actual application code.
//!
//! # Example
//!
//! To get the weather maximum application:
//! ```
//! # use anyhow::Result;
//! use weathermax::workload;
//! # fn main() -> Result<()> {
//! let app = workload::named("weather-max")?;
//! assert!(app.combine_fn.is_some());
//! # Ok(())
//! # }
//! ```

use crate::{hash_partition, Workload};
use anyhow::{bail, Result};

pub mod weather_max;

/// Gets the [`Workload`] named `name`.
///
/// Returns [`None`] if no application with the given name was found.
pub fn try_named(name: &str) -> Option<Workload> {
    match name {
        "weather-max" | "max-temp" => Some(Workload {
            map_fn: weather_max::map,
            combine_fn: Some(weather_max::reduce),
            reduce_fn: weather_max::reduce,
            partition_fn: hash_partition,
            render_fn: weather_max::render,
        }),
        _ => None,
    }
}

/// Gets the [`Workload`] named `name`.
///
/// Returns an [`anyhow::Error`] if no application with the given name was found.
pub fn named(name: &str) -> Result<Workload> {
    match try_named(name) {
        Some(app) => Ok(app),
        None => bail!("No app named `{}` found.", name),
    }
}
