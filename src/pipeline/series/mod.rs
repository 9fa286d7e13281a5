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

//! Module responsible for opening the daily input files
//! and presenting them as one lazily-read time series.
//!
//! Opening the series reads only coordinates and metadata of every
//! file. Data values are read on demand, one [`Window`] at a time,
//! so that no more than the requested block is ever held in memory.

mod calendar;
mod partition;

pub use self::partition::{tiles, SeriesShape, Tile, Window};

use self::calendar::TimeUnits;
use crate::{
    constants::{LATITUDE_NAMES, LONGITUDE_NAMES},
    errors::DataAccessError,
    pipeline::configuration::Input,
    Float,
};
use chrono::{Datelike, NaiveDateTime};
use glob::glob;
use log::{debug, info};
use ndarray::{s, Array3};
use netcdf::{AttributeValue, Variable};
use rustc_hash::FxHashSet;
use std::path::{Path, PathBuf};

/// Latitude and longitude axes shared by the series
/// and every grid derived from it.
#[derive(Clone, PartialEq, Debug)]
pub struct Coordinates {
    pub latitude_name: String,
    pub longitude_name: String,
    pub latitudes: Vec<Float>,
    pub longitudes: Vec<Float>,
}

impl Coordinates {
    pub fn shape(&self) -> (usize, usize) {
        (self.latitudes.len(), self.longitudes.len())
    }
}

/// Read access to a (time, latitude, longitude) series
/// used by the reductions.
pub trait TimeSeriesSource {
    fn shape(&self) -> SeriesShape;

    /// Calendar year of every time step.
    fn years(&self) -> &[i32];

    fn coordinates(&self) -> &Coordinates;

    /// Materializes the requested block with missing values as NaN.
    fn read_window(&self, window: &Window) -> Result<Array3<f32>, DataAccessError>;

    /// Distinct years of the series in ascending order.
    fn distinct_years(&self) -> Vec<i32> {
        let unique: FxHashSet<i32> = self.years().iter().copied().collect();
        let mut unique: Vec<i32> = unique.into_iter().collect();
        unique.sort_unstable();

        unique
    }
}

/// CF packing and masking attributes of the data variable.
#[derive(Clone, PartialEq, Debug)]
struct Packing {
    scale_factor: f32,
    add_offset: f32,
    fill_values: Vec<f32>,
}

impl Packing {
    fn unpack(&self, raw: f32) -> f32 {
        if !raw.is_finite() || self.fill_values.contains(&raw) {
            return f32::NAN;
        }

        raw * self.scale_factor + self.add_offset
    }
}

/// Single input file and its position in the concatenated series.
#[derive(Clone, PartialEq, Debug)]
struct SourceFile {
    path: PathBuf,
    time_offset: usize,
    time_len: usize,
    packing: Packing,
}

/// Multi-file daily series read lazily from NetCDF files.
#[derive(Debug)]
pub struct GriddedTimeSeries {
    variable: String,
    files: Vec<SourceFile>,
    coordinates: Coordinates,
    years: Vec<i32>,
}

impl GriddedTimeSeries {
    /// Matches the input pattern and reads the metadata of all
    /// files, checking that they form one consistent series.
    pub fn open(input: &Input) -> Result<Self, DataAccessError> {
        debug!("Matching input files with {}", input.files);

        let mut paths = glob(&input.files)?.collect::<Result<Vec<PathBuf>, _>>()?;
        paths.sort();

        if paths.is_empty() {
            return Err(DataAccessError::NoFiles(input.files.clone()));
        }

        let mut files = Vec::with_capacity(paths.len());
        let mut coordinates: Option<Coordinates> = None;
        let mut years = vec![];
        let mut last_time = None;

        for path in paths {
            debug!("Reading metadata of {}", path.display());

            let header = read_header(&path, &input.variable)?;

            match &coordinates {
                Some(first) => check_same_axes(first, &header.coordinates, &path)?,
                None => coordinates = Some(header.coordinates),
            }

            for datetime in &header.times {
                if last_time.map_or(false, |last| datetime <= &last) {
                    return Err(DataAccessError::NonMonotonicTime(path));
                }
                last_time = Some(*datetime);
            }

            files.push(SourceFile {
                path,
                time_offset: years.len(),
                time_len: header.years.len(),
                packing: header.packing,
            });

            years.extend(header.years);
        }

        let coordinates = coordinates.ok_or_else(|| DataAccessError::NoFiles(input.files.clone()))?;

        info!(
            "Opened {} with {} time steps in {} files on {}x{} grid",
            input.variable,
            years.len(),
            files.len(),
            coordinates.latitudes.len(),
            coordinates.longitudes.len()
        );

        Ok(GriddedTimeSeries {
            variable: input.variable.clone(),
            files,
            coordinates,
            years,
        })
    }
}

impl TimeSeriesSource for GriddedTimeSeries {
    fn shape(&self) -> SeriesShape {
        SeriesShape {
            time: self.years.len(),
            latitude: self.coordinates.latitudes.len(),
            longitude: self.coordinates.longitudes.len(),
        }
    }

    fn years(&self) -> &[i32] {
        &self.years
    }

    fn coordinates(&self) -> &Coordinates {
        &self.coordinates
    }

    fn read_window(&self, window: &Window) -> Result<Array3<f32>, DataAccessError> {
        if !window.fits(self.shape()) {
            return Err(DataAccessError::OutOfRange(window.to_string()));
        }

        let mut block = Array3::from_elem(window.shape(), f32::NAN);

        for file in &self.files {
            let file_end = file.time_offset + file.time_len;
            let start = window.time.start.max(file.time_offset);
            let end = window.time.end.min(file_end);

            if start >= end {
                continue;
            }

            let local = (start - file.time_offset)..(end - file.time_offset);
            let netcdf_err = |source| DataAccessError::NetCdf {
                path: file.path.clone(),
                source,
            };

            let nc_file = netcdf::open(&file.path).map_err(netcdf_err)?;
            let variable = nc_file.variable(&self.variable).ok_or_else(|| {
                DataAccessError::MissingVariable {
                    variable: self.variable.clone(),
                    path: file.path.clone(),
                }
            })?;

            let raw = variable
                .get_values::<f32, _>((
                    local.clone(),
                    window.latitude.clone(),
                    window.longitude.clone(),
                ))
                .map_err(netcdf_err)?;

            let raw = Array3::from_shape_vec(
                (local.len(), window.latitude.len(), window.longitude.len()),
                raw,
            )
            .map_err(|_| DataAccessError::OutOfRange(window.to_string()))?;

            let dest_start = start - window.time.start;
            let dest_end = end - window.time.start;

            block
                .slice_mut(s![dest_start..dest_end, .., ..])
                .zip_mut_with(&raw, |dest, &raw| *dest = file.packing.unpack(raw));
        }

        Ok(block)
    }
}

/// Metadata of a single input file.
struct Header {
    coordinates: Coordinates,
    times: Vec<NaiveDateTime>,
    years: Vec<i32>,
    packing: Packing,
}

/// Reads coordinates, decoded time and packing attributes
/// of the data variable in one input file.
fn read_header(path: &Path, variable_name: &str) -> Result<Header, DataAccessError> {
    let netcdf_err = |source| DataAccessError::NetCdf {
        path: path.to_path_buf(),
        source,
    };
    let missing = |variable: &str| DataAccessError::MissingVariable {
        variable: variable.to_string(),
        path: path.to_path_buf(),
    };

    let file = netcdf::open(path).map_err(netcdf_err)?;
    let variable = file
        .variable(variable_name)
        .ok_or_else(|| missing(variable_name))?;

    let dimensions: Vec<String> = variable
        .dimensions()
        .iter()
        .map(|dim| dim.name().to_string())
        .collect();

    if dimensions.len() != 3
        || !LATITUDE_NAMES.contains(&dimensions[1].as_str())
        || !LONGITUDE_NAMES.contains(&dimensions[2].as_str())
    {
        return Err(DataAccessError::UnexpectedDimensions {
            variable: variable_name.to_string(),
            path: path.to_path_buf(),
            found: dimensions,
        });
    }

    let read_axis = |name: &str| -> Result<Vec<Float>, DataAccessError> {
        let axis = file.variable(name).ok_or_else(|| missing(name))?;

        axis.get_values::<Float, _>(..).map_err(netcdf_err)
    };

    let time_offsets = read_axis(&dimensions[0])?;
    let latitudes = read_axis(&dimensions[1])?;
    let longitudes = read_axis(&dimensions[2])?;

    let time_axis = file
        .variable(&dimensions[0])
        .ok_or_else(|| missing(&dimensions[0]))?;
    let units = string_attribute(&time_axis, "units")
        .map_err(netcdf_err)?
        .ok_or_else(|| DataAccessError::TimeUnits(String::new()))?;
    let calendar = string_attribute(&time_axis, "calendar").map_err(netcdf_err)?;
    let units = TimeUnits::parse(&units, calendar.as_deref())?;

    let mut times = Vec::with_capacity(time_offsets.len());
    for offset in time_offsets {
        let datetime = units
            .decode(offset)
            .ok_or_else(|| DataAccessError::TimeUnits(format!("{} (offset {})", path.display(), offset)))?;
        times.push(datetime);
    }
    let years = times.iter().map(|datetime| datetime.year()).collect();

    let mut fill_values = vec![];
    for name in ["_FillValue", "missing_value"] {
        if let Some(fill) = numeric_attribute(&variable, name).map_err(netcdf_err)? {
            fill_values.push(fill as f32);
        }
    }

    let packing = Packing {
        scale_factor: numeric_attribute(&variable, "scale_factor")
            .map_err(netcdf_err)?
            .unwrap_or(1.0) as f32,
        add_offset: numeric_attribute(&variable, "add_offset")
            .map_err(netcdf_err)?
            .unwrap_or(0.0) as f32,
        fill_values,
    };

    Ok(Header {
        coordinates: Coordinates {
            latitude_name: dimensions[1].clone(),
            longitude_name: dimensions[2].clone(),
            latitudes,
            longitudes,
        },
        times,
        years,
        packing,
    })
}

fn check_same_axes(
    first: &Coordinates,
    other: &Coordinates,
    path: &Path,
) -> Result<(), DataAccessError> {
    if first.latitudes != other.latitudes || first.latitude_name != other.latitude_name {
        return Err(DataAccessError::MismatchedAxis {
            axis: other.latitude_name.clone(),
            path: path.to_path_buf(),
        });
    }

    if first.longitudes != other.longitudes || first.longitude_name != other.longitude_name {
        return Err(DataAccessError::MismatchedAxis {
            axis: other.longitude_name.clone(),
            path: path.to_path_buf(),
        });
    }

    Ok(())
}

/// Reads a scalar numeric attribute regardless of its stored type.
pub(super) fn numeric_attribute(
    variable: &Variable,
    name: &str,
) -> Result<Option<Float>, netcdf::Error> {
    let value = match variable.attribute(name) {
        Some(attribute) => attribute.value()?,
        None => return Ok(None),
    };

    let value = match value {
        AttributeValue::Double(v) => Some(v),
        AttributeValue::Float(v) => Some(Float::from(v)),
        AttributeValue::Int(v) => Some(Float::from(v)),
        AttributeValue::Short(v) => Some(Float::from(v)),
        AttributeValue::Schar(v) => Some(Float::from(v)),
        AttributeValue::Uchar(v) => Some(Float::from(v)),
        AttributeValue::Doubles(v) => v.first().copied(),
        AttributeValue::Floats(v) => v.first().map(|&v| Float::from(v)),
        AttributeValue::Ints(v) => v.first().map(|&v| Float::from(v)),
        AttributeValue::Shorts(v) => v.first().map(|&v| Float::from(v)),
        _ => None,
    };

    Ok(value)
}

pub(super) fn string_attribute(
    variable: &Variable,
    name: &str,
) -> Result<Option<String>, netcdf::Error> {
    match variable.attribute(name) {
        Some(attribute) => match attribute.value()? {
            AttributeValue::Str(value) => Ok(Some(value)),
            _ => Ok(None),
        },
        None => Ok(None),
    }
}

/// Series held fully in memory, for exercising reductions
/// without input files.
#[cfg(test)]
pub struct MemorySeries {
    pub data: Array3<f32>,
    pub years: Vec<i32>,
    pub coordinates: Coordinates,
}

#[cfg(test)]
impl MemorySeries {
    pub fn new(data: Array3<f32>, years: Vec<i32>) -> Self {
        let (_, nlat, nlon) = data.dim();

        MemorySeries {
            data,
            years,
            coordinates: Coordinates {
                latitude_name: "latitude".to_string(),
                longitude_name: "longitude".to_string(),
                latitudes: (0..nlat).map(|i| 90.0 - i as Float).collect(),
                longitudes: (0..nlon).map(|j| j as Float).collect(),
            },
        }
    }
}

#[cfg(test)]
impl TimeSeriesSource for MemorySeries {
    fn shape(&self) -> SeriesShape {
        let (time, latitude, longitude) = self.data.dim();

        SeriesShape {
            time,
            latitude,
            longitude,
        }
    }

    fn years(&self) -> &[i32] {
        &self.years
    }

    fn coordinates(&self) -> &Coordinates {
        &self.coordinates
    }

    fn read_window(&self, window: &Window) -> Result<Array3<f32>, DataAccessError> {
        if !window.fits(self.shape()) {
            return Err(DataAccessError::OutOfRange(window.to_string()));
        }

        Ok(self
            .data
            .slice(s![
                window.time.clone(),
                window.latitude.clone(),
                window.longitude.clone()
            ])
            .to_owned())
    }
}

/// In-memory series whose reads fail when they touch
/// any longitude of `failing`.
#[cfg(test)]
pub struct FailingSeries {
    pub inner: MemorySeries,
    pub failing: std::ops::Range<usize>,
}

#[cfg(test)]
impl TimeSeriesSource for FailingSeries {
    fn shape(&self) -> SeriesShape {
        self.inner.shape()
    }

    fn years(&self) -> &[i32] {
        self.inner.years()
    }

    fn coordinates(&self) -> &Coordinates {
        self.inner.coordinates()
    }

    fn read_window(&self, window: &Window) -> Result<Array3<f32>, DataAccessError> {
        if window.longitude.start < self.failing.end && self.failing.start < window.longitude.end {
            return Err(DataAccessError::OutOfRange(window.to_string()));
        }

        self.inner.read_window(window)
    }
}
