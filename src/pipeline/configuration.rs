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

//! Module responsible for parsing and checking the configuration file.
//!
//! To provide meaningful error messages the configuration file uses
//! [YAML](https://en.wikipedia.org/wiki/YAML) and `serde` to enforce
//! strong typing and automatic type checking.
//!
//! The structures and their fields in this module directly correspond to
//! the fields inside `config.yaml` so you can check this documentation
//! for more details how to set the config file.

use crate::errors::ConfigError;
use serde::Deserialize;
use std::{
    fs,
    path::{Path, PathBuf},
};

/// Shape (in gridpoints) of a single lazy-evaluation partition.
///
/// Only one partition of the input series is held in memory
/// at a time when the annual statistics are reduced, so it must
/// fit comfortably in the memory available to the process.
#[derive(Copy, Clone, Eq, PartialEq, Debug, Deserialize)]
pub struct PartitionShape {
    pub time: usize,
    pub latitude: usize,
    pub longitude: usize,
}

impl Default for PartitionShape {
    fn default() -> Self {
        PartitionShape {
            time: 365,
            latitude: 601,
            longitude: 1440,
        }
    }
}

/// Fields with information about the input time series.
#[derive(Clone, PartialEq, Debug, Deserialize)]
pub struct Input {
    /// Glob pattern matching the daily NetCDF files,
    /// eg. `/data/ERA5_heat/wbgtmax_*_daily_ERA5.nc`.
    ///
    /// Matched files are concatenated along time in sorted
    /// path order and must:
    ///
    /// - contain the configured variable on (time, latitude, longitude),
    /// - share identical latitude and longitude coordinates,
    /// - follow each other in time.
    pub files: String,

    /// _(Optional)_ Name of the variable to read.
    ///
    /// Defaults to `wbgtmax`.
    #[serde(default = "Input::default_variable")]
    pub variable: String,

    /// _(Optional)_ Partition shape used for lazy reading.
    ///
    /// Defaults to 365 days of the full 0.25 degree global grid.
    /// None of the components can be less than `1`.
    #[serde(default)]
    pub partition: PartitionShape,
}

impl Input {
    fn default_variable() -> String {
        "wbgtmax".to_string()
    }

    pub fn check_bounds(&self) -> Result<(), ConfigError> {
        if self.files.trim().is_empty() {
            return Err(ConfigError::OutOfBounds("Input file pattern cannot be empty"));
        }

        if self.partition.time < 1 || self.partition.latitude < 1 || self.partition.longitude < 1
        {
            return Err(ConfigError::OutOfBounds(
                "Partition shape components cannot be less than 1",
            ));
        }

        Ok(())
    }
}

/// _(Optional)_ Fields tuning the statistics computation.
#[derive(Clone, PartialEq, Debug, Deserialize)]
pub struct Statistics {
    /// _(Optional)_ Number of longitude chunks in which the
    /// 95th percentile is computed. Peak memory of that step
    /// is roughly the size of the input divided by this number.
    ///
    /// Cannot be less than `1`. Defaults to `6`.
    #[serde(default = "Statistics::default_longitude_chunks")]
    pub longitude_chunks: usize,
}

impl Statistics {
    fn default_longitude_chunks() -> usize {
        6
    }

    pub fn check_bounds(&self) -> Result<(), ConfigError> {
        if self.longitude_chunks < 1 {
            return Err(ConfigError::OutOfBounds(
                "Number of longitude chunks cannot be less than 1",
            ));
        }

        Ok(())
    }
}

impl Default for Statistics {
    fn default() -> Self {
        Statistics {
            longitude_chunks: Statistics::default_longitude_chunks(),
        }
    }
}

/// _(Optional)_ Fields of the GeoTIFF export.
#[derive(Clone, PartialEq, Debug, Deserialize)]
pub struct GeoTiff {
    #[serde(default = "GeoTiff::default_enabled")]
    pub enabled: bool,

    /// File name prefix of exported rasters. Defaults to `wbgt_`.
    #[serde(default = "GeoTiff::default_prefix")]
    pub prefix: String,

    /// Directory of exported rasters. Defaults to working directory.
    #[serde(default = "GeoTiff::default_directory")]
    pub directory: PathBuf,

    /// Raster conversion program. Defaults to `gdal_translate`
    /// found in `PATH`.
    #[serde(default = "GeoTiff::default_program")]
    pub program: PathBuf,
}

impl GeoTiff {
    fn default_enabled() -> bool {
        true
    }

    fn default_prefix() -> String {
        "wbgt_".to_string()
    }

    fn default_directory() -> PathBuf {
        PathBuf::from(".")
    }

    fn default_program() -> PathBuf {
        PathBuf::from("gdal_translate")
    }
}

impl Default for GeoTiff {
    fn default() -> Self {
        GeoTiff {
            enabled: GeoTiff::default_enabled(),
            prefix: GeoTiff::default_prefix(),
            directory: GeoTiff::default_directory(),
            program: GeoTiff::default_program(),
        }
    }
}

/// _(Optional)_ Fields with information about the outputs.
#[derive(Clone, PartialEq, Debug, Deserialize)]
pub struct Output {
    /// Combined NetCDF file. Defaults to `wbgt_annual_metrics.nc`.
    #[serde(default = "Output::default_file")]
    pub file: PathBuf,

    /// Directory for per-statistic intermediate files.
    /// It is removed after the combined file has been written
    /// and preserved when writing fails.
    ///
    /// Defaults to `temp_wbgt_processing`.
    #[serde(default = "Output::default_temp_dir")]
    pub temp_dir: PathBuf,

    /// When set, statistics are not computed and the combined
    /// file is assembled from intermediates left by a previous run.
    ///
    /// Defaults to `false`.
    #[serde(default)]
    pub assembly_only: bool,

    #[serde(default)]
    pub geotiff: GeoTiff,
}

impl Output {
    fn default_file() -> PathBuf {
        PathBuf::from("wbgt_annual_metrics.nc")
    }

    fn default_temp_dir() -> PathBuf {
        PathBuf::from("temp_wbgt_processing")
    }

    pub fn check_bounds(&self) -> Result<(), ConfigError> {
        if self.file.as_os_str().is_empty() || self.temp_dir.as_os_str().is_empty() {
            return Err(ConfigError::OutOfBounds("Output paths cannot be empty"));
        }

        if self.geotiff.enabled && self.geotiff.program.as_os_str().is_empty() {
            return Err(ConfigError::OutOfBounds(
                "Raster conversion program cannot be empty",
            ));
        }

        Ok(())
    }
}

impl Default for Output {
    fn default() -> Self {
        Output {
            file: Output::default_file(),
            temp_dir: Output::default_temp_dir(),
            assembly_only: false,
            geotiff: GeoTiff::default(),
        }
    }
}

/// _(Optional)_ Dataset-level attributes of the combined file.
#[derive(Clone, PartialEq, Debug, Deserialize)]
#[serde(default)]
pub struct Provenance {
    pub title: String,
    pub institution: String,
    pub source: String,
    pub author: String,
    pub contact: String,
    pub description: String,
    pub references: String,
}

impl Default for Provenance {
    fn default() -> Self {
        Provenance {
            title: "Wet Bulb Globe Temperature (WBGT) Climate Metrics".to_string(),
            institution: "NSF NCAR".to_string(),
            source: "ERA5 reanalysis".to_string(),
            author: "Jacob Stuivenvolt-Allen".to_string(),
            contact: "jsallen@ucar.edu".to_string(),
            description: "Multi-year averaged statistics and threshold exceedance metrics for daily maximum WBGT".to_string(),
            references: "Heat risk thresholds based on occupational health guidelines".to_string(),
        }
    }
}

/// _(Optional)_ Fields of the biome stratification summary.
#[derive(Clone, PartialEq, Debug, Deserialize)]
pub struct Biomes {
    /// Biome-ID grid rasterized onto the input grid.
    pub file: PathBuf,

    /// Name of the biome-ID variable. Defaults to `BIOME_ID`.
    #[serde(default = "Biomes::default_variable")]
    pub variable: String,

    /// CSV file with per-biome summary. Defaults to `wbgt_biome_summary.csv`.
    #[serde(default = "Biomes::default_summary")]
    pub summary: PathBuf,
}

impl Biomes {
    fn default_variable() -> String {
        "BIOME_ID".to_string()
    }

    fn default_summary() -> PathBuf {
        PathBuf::from("wbgt_biome_summary.csv")
    }
}

/// _(Optional)_ Fields with information about
/// resources available for the pipeline.
#[derive(Clone, PartialEq, PartialOrd, Debug, Deserialize)]
pub struct Resources {
    /// _(Optional)_ Thread count used for reductions.
    /// A single thread is enough, more threads only
    /// speed up per-cell reductions and never change results.
    ///
    /// Cannot be less than `1`. Defaults to `1`.
    #[serde(default = "Resources::default_threads")]
    pub threads: u16,

    /// _(Optional)_ Heap memory limit in MB.
    ///
    /// Cannot be less than `128`. Defaults to whole addressable-space
    /// (`2^32` or `2^64` bytes).
    ///
    /// By default, Rust memory allocator doesn't know about memory
    /// available in your system. When the allocator has a capped
    /// memory amount available it will abort the process with
    /// an OOM error message instead of the process being killed
    /// by the system without any additional information.
    ///
    /// If the percentile step exhausts the limit, increase
    /// `statistics.longitude_chunks` rather than the limit.
    #[serde(default = "Resources::default_memory")]
    pub memory: usize,
}

impl Resources {
    fn default_threads() -> u16 {
        1
    }

    fn default_memory() -> usize {
        usize::MAX / (1024 * 1024)
    }

    /// Checks if thread count and memory limit are
    /// above limits.
    pub fn check_bounds(&self) -> Result<(), ConfigError> {
        if self.threads < 1 {
            return Err(ConfigError::OutOfBounds(
                "Available threads cannot be less than 1",
            ));
        }

        if self.memory < 128 {
            return Err(ConfigError::OutOfBounds(
                "Available memory cannot be less than 128 MB",
            ));
        }

        Ok(())
    }
}

impl Default for Resources {
    fn default() -> Self {
        Resources {
            threads: Resources::default_threads(),
            memory: Resources::default_memory(),
        }
    }
}

/// Main config structure representing the fields in
/// configuration file.
#[derive(Clone, PartialEq, Debug, Deserialize)]
pub struct Config {
    pub input: Input,

    #[serde(default)]
    pub statistics: Statistics,

    #[serde(default)]
    pub output: Output,

    #[serde(default)]
    pub provenance: Provenance,

    #[serde(default)]
    pub biomes: Option<Biomes>,

    #[serde(default)]
    pub resources: Resources,
}

impl Config {
    /// Config structure constructor, responsible for
    /// deserializing configuration and checking it.
    pub fn new_from_file(file_path: &Path) -> Result<Config, ConfigError> {
        let data = fs::read(file_path)?;

        Config::new_from_slice(data.as_slice())
    }

    pub fn new_from_slice(data: &[u8]) -> Result<Config, ConfigError> {
        let config: Config = serde_yaml::from_slice(data)?;

        config.input.check_bounds()?;
        config.statistics.check_bounds()?;
        config.output.check_bounds()?;
        config.resources.check_bounds()?;

        Ok(config)
    }
}
