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

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Error while reading config.yaml: {0}")]
    Config(#[from] ConfigError),

    #[error("Error while creating ThreadPool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),

    #[error("Cannot set the memory limit of {0} MB")]
    MemoryLimit(usize),

    #[error("Error while accessing input data: {0}")]
    DataAccess(#[from] DataAccessError),

    #[error("Error while computing statistics: {0}")]
    Computation(#[from] ComputationError),

    #[error("Error while exporting output: {0}")]
    Export(#[from] ExportError),

    #[error("Error while stratifying by biome: {0}")]
    Stratification(#[from] StratificationError),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Cannot open config.yaml: {0}")]
    CantOpenFile(#[from] std::io::Error),

    #[error("Cannot deserialize config.yaml: {0}")]
    CantDeserialize(#[from] serde_yaml::Error),

    #[error("Configuration component is out of bounds {0}")]
    OutOfBounds(&'static str),
}

#[derive(Error, Debug)]
pub enum DataAccessError {
    #[error("Invalid file pattern: {0}")]
    BadPattern(#[from] glob::PatternError),

    #[error("Cannot list matched file: {0}")]
    BadPath(#[from] glob::GlobError),

    #[error("No files match the pattern {0}")]
    NoFiles(String),

    #[error("NetCDF error in {path}: {source}")]
    NetCdf {
        path: PathBuf,
        #[source]
        source: netcdf::Error,
    },

    #[error("Variable {variable} not found in {path}")]
    MissingVariable { variable: String, path: PathBuf },

    #[error("Variable {variable} in {path} has unexpected dimensions {found:?}")]
    UnexpectedDimensions {
        variable: String,
        path: PathBuf,
        found: Vec<String>,
    },

    #[error("Spatial axis {axis} in {path} does not match the first input file")]
    MismatchedAxis { axis: String, path: PathBuf },

    #[error("Time axis is not strictly increasing at {0}")]
    NonMonotonicTime(PathBuf),

    #[error("Cannot decode time units {0:?}")]
    TimeUnits(String),

    #[error("Unsupported calendar {0:?}")]
    UnsupportedCalendar(String),

    #[error("Requested window {0} is outside of the series")]
    OutOfRange(String),
}

#[derive(Error, Debug)]
pub enum ComputationError {
    #[error("Reduction over longitude chunk {index} (indices {start}:{end}) failed: {source}")]
    Chunk {
        index: usize,
        start: usize,
        end: usize,
        #[source]
        source: DataAccessError,
    },

    #[error("Reduction over partition (latitude {lat_start}:{lat_end}, longitude {lon_start}:{lon_end}) failed: {source}")]
    Partition {
        lat_start: usize,
        lat_end: usize,
        lon_start: usize,
        lon_end: usize,
        #[source]
        source: DataAccessError,
    },

    #[error("Cannot split {len} longitudes into {chunks} chunks")]
    InvalidChunking { len: usize, chunks: usize },

    #[error("Grid shape mismatch: expected {expected:?}, found {found:?}")]
    ShapeMismatch {
        expected: (usize, usize),
        found: (usize, usize),
    },

    #[error("Statistic {0} has no fixed threshold")]
    NoFixedThreshold(&'static str),

    #[error("Cannot concatenate longitude chunks: {0}")]
    Concatenate(#[from] ndarray::ShapeError),
}

#[derive(Error, Debug)]
pub enum ExportError {
    #[error("Cannot prepare output location: {0}")]
    Io(#[from] std::io::Error),

    #[error("NetCDF error in {path}: {source}")]
    NetCdf {
        path: PathBuf,
        #[source]
        source: netcdf::Error,
    },

    #[error("Variable {variable} not found in {path}")]
    MissingVariable { variable: String, path: PathBuf },

    #[error("Coordinates of {0} differ from the other grids")]
    MismatchedCoordinates(String),

    #[error("Valid value of {0} collides with the missing-value sentinel")]
    SentinelCollision(String),
}

#[derive(Error, Debug)]
pub enum ConversionError {
    #[error("Cannot run {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{program} exited with {status}: {stderr}")]
    Failed {
        program: String,
        status: std::process::ExitStatus,
        stderr: String,
    },
}

#[derive(Error, Debug)]
pub enum StratificationError {
    #[error("Cannot read grids: {0}")]
    Grids(#[from] ExportError),

    #[error("NetCDF error in {path}: {source}")]
    NetCdf {
        path: PathBuf,
        #[source]
        source: netcdf::Error,
    },

    #[error("Variable {variable} not found in {path}")]
    MissingVariable { variable: String, path: PathBuf },

    #[error("Biome grid and metric grids are not co-registered: {0}")]
    NotCoregistered(&'static str),

    #[error("Cannot flush biome summary: {0}")]
    Io(#[from] std::io::Error),

    #[error("Cannot write biome summary: {0}")]
    Csv(#[from] csv::Error),
}
