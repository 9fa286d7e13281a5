/*
Copyright 2025 The wbgt-metrics developers

This file is part of WBGT Climate Metrics (wbgt-metrics).

WBGT Climate Metrics (wbgt-metrics) is a free software: you can redistribute it and/or modify
it under the terms of the GNU General Public License as published by
the Free Software Foundation; either version 3 of the License, or
(at your option) any later version.

WBGT Climate Metrics (wbgt-metrics) is distributed in the hope that it will be useful,
but WITHOUT ANY WARRANTY; without even the implied warranty of
MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
GNU General Public License for more details.

You should have received a copy of the GNU General Public License
along with WBGT Climate Metrics (wbgt-metrics). If not, see https://www.gnu.org/licenses/.
*/

//! WBGT Climate Metrics (wbgt-metrics) is a batch tool computing
//! multi-year Wet Bulb Globe Temperature statistics from a daily
//! reanalysis time series that is too large to be held in memory.
//!
//! The tool reads the daily files, reduces them into six climate
//! grids (annual mean, 95th percentile and four exceedance counts)
//! and writes them into one CF-compliant NetCDF file, with optional
//! GeoTIFF exports and a per-biome summary for downstream mapping.

mod constants;
mod errors;
mod pipeline;

use cap::Cap;
use env_logger::Env;
use log::{error, info};
use std::{alloc, process};

type Float = f64;

/// Global allocator used by the pipeline.
///
/// Capping the heap at the limit set in the configuration file
/// makes a blown memory budget fail as an allocation error
/// instead of the process being silently killed by the system.
#[global_allocator]
static ALLOCATOR: Cap<alloc::System> = Cap::new(alloc::System, usize::MAX);

/// The main program function.
/// Prepares the runtime environment and calls the [`pipeline::main`].
///
/// The logger needs to be initiated before anything else
/// as the log stream is the only error-reporting channel.
fn main() {
    #[cfg(not(feature = "debug"))]
    let logger_env = Env::new().filter_or("WBGT_LOG_LEVEL", "info");

    #[cfg(feature = "debug")]
    let logger_env = Env::new().filter_or("WBGT_LOG_LEVEL", "debug");

    env_logger::Builder::from_env(logger_env)
        .format_timestamp_millis()
        .init();

    match pipeline::main() {
        Ok(_) => info!("Processing complete. Check the output files and log."),
        Err(err) => {
            error!("Processing failed with error: {}", err);
            process::exit(1);
        }
    }
}
