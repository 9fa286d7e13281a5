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

//! Module containing the actual processing pipeline.
//!
//! The pipeline runs in four stages:
//!
//! 1. The daily input files are opened as one lazily-read series.
//! 2. The six statistics are computed one after another. Each grid is
//!    written to an intermediate file as soon as it is complete and
//!    released from memory, except the 95th percentile which is kept
//!    until the days above it have been counted.
//! 3. The intermediate grids are assembled into the combined CF file.
//!    Intermediates are removed only when that write succeeded, so a
//!    failed assembly can be rerun with `output.assembly_only`.
//! 4. Optional exports: one GeoTIFF per statistic and a per-biome
//!    summary table. A failed raster conversion is logged and does not
//!    affect the other rasters or the combined file.
//!
//! Peak memory is bounded by the larger of one lazy partition
//! (`input.partition`) and one longitude chunk of the whole series
//! (`statistics.longitude_chunks`).

mod biomes;
mod chunking;
mod configuration;
mod output;
mod series;
mod statistics;

#[cfg(test)]
mod super_tests;

use crate::{
    errors::PipelineError,
    pipeline::{
        configuration::Config,
        output::{export_rasters, GdalTranslate, IntermediateStore, OutputCollection, RasterConverter},
        series::{GriddedTimeSeries, TimeSeriesSource},
        statistics::{
            compute_annual_mean, compute_days_above, compute_days_above_p95, compute_p95, Statistic,
        },
    },
    ALLOCATOR,
};
use log::{debug, info, warn};
use rayon::{ThreadPool, ThreadPoolBuilder};
use std::path::Path;

/// Main pipeline function, reading `config.yaml` from the
/// working directory and running all stages.
pub fn main() -> Result<(), PipelineError> {
    info!("Preparing the pipeline core");

    let core = Core::new()?;
    let converter = GdalTranslate::new(&core.config.output.geotiff.program);

    run(&core.config, &core.threadpool, &converter)
}

/// Structure containing the checked configuration
/// and the resources prepared from it.
#[derive(Debug)]
pub struct Core {
    pub config: Config,
    pub threadpool: ThreadPool,
}

impl Core {
    /// Pipeline [`Core`] constructor.
    ///
    /// Memory limit and thread pool are set up before
    /// any input data is touched.
    pub fn new() -> Result<Self, PipelineError> {
        debug!("Reading configuration from config.yaml");
        let config = Config::new_from_file(Path::new("config.yaml"))?;

        debug!("Setting memory limit");
        ALLOCATOR
            .set_limit(config.resources.memory.saturating_mul(1024 * 1024))
            .map_err(|_| PipelineError::MemoryLimit(config.resources.memory))?;

        debug!("Setting up ThreadPool");
        let threadpool = ThreadPoolBuilder::new()
            .num_threads(config.resources.threads as usize)
            .stack_size(2 * 1024 * 1024)
            .build()?;

        Ok(Core { config, threadpool })
    }
}

/// Runs all pipeline stages with the given configuration.
pub fn run(
    config: &Config,
    threadpool: &ThreadPool,
    converter: &dyn RasterConverter,
) -> Result<(), PipelineError> {
    let store = if config.output.assembly_only {
        info!(
            "Skipping computation, assembling intermediates from {}",
            config.output.temp_dir.display()
        );
        IntermediateStore::open(&config.output.temp_dir)
    } else {
        info!("Opening dataset...");
        let series = GriddedTimeSeries::open(&config.input)?;
        let store = IntermediateStore::create(&config.output.temp_dir)?;

        compute_statistics(&series, config, threadpool, &store)?;

        store
    };

    info!("Combining all metrics into final output file...");
    let collection = OutputCollection::assemble(store.load_all()?, config.provenance.clone())?;
    collection.write(&config.output.file)?;
    info!("Final output saved to: {}", config.output.file.display());

    collection.log_summary();
    drop(collection);

    debug!("Cleaning up temporary files");
    if let Err(err) = store.remove() {
        warn!("Cannot remove temporary files: {}", err);
    }

    if config.output.geotiff.enabled {
        let report = export_rasters(converter, &config.output.file, &config.output.geotiff);

        if !report.failed.is_empty() {
            warn!(
                "{} of {} GeoTIFF conversions failed",
                report.failed.len(),
                report.failed.len() + report.created.len()
            );
        }
    }

    if let Some(biome_settings) = &config.biomes {
        let rows = biomes::stratify(biome_settings, &config.output.file)?;
        debug!("Written {} biome summary rows", rows);
    }

    Ok(())
}

/// Computes all statistics in order and saves each one
/// into the intermediate store.
fn compute_statistics<S: TimeSeriesSource>(
    series: &S,
    config: &Config,
    threadpool: &ThreadPool,
    store: &IntermediateStore,
) -> Result<(), PipelineError> {
    let partition = config.input.partition;
    let longitude_chunks = config.statistics.longitude_chunks;

    info!("Calculating annual statistics...");

    info!("[1/6] Calculating annual mean...");
    let annual_mean = compute_annual_mean(series, partition)?;
    store.save(&annual_mean)?;
    drop(annual_mean);

    info!(
        "[2/6] Calculating 95th percentile in {} longitude chunks...",
        longitude_chunks
    );
    let p95 = compute_p95(series, longitude_chunks, threadpool)?;
    store.save(&p95)?;

    info!("[3/6] Calculating days above 95th percentile...");
    let days_above_p95 = compute_days_above_p95(series, &p95, partition)?;
    store.save(&days_above_p95)?;
    drop(days_above_p95);
    drop(p95);

    let fixed = [
        Statistic::DaysAbove27C,
        Statistic::DaysAbove29C,
        Statistic::DaysAbove31C,
    ];

    for (step, statistic) in (4..).zip(fixed) {
        info!("[{}/6] Calculating {}...", step, statistic.metadata().long_name);

        let grid = compute_days_above(series, statistic, partition)?;
        store.save(&grid)?;
    }

    Ok(())
}
