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

//! Module responsible for writing and reading derived grids.
//!
//! Grids are written as CF-style NetCDF variables: 32-bit floats,
//! deflate compressed, with the missing-value sentinel as fill value
//! and their fixed metadata as attributes. The same layout is used
//! for the per-statistic intermediate files and the combined file.

mod collection;
mod geotiff;

pub use self::collection::{read_grids, OutputCollection};
pub use self::geotiff::{export_rasters, GdalTranslate, RasterConverter, RasterReport};

use crate::{
    constants::{DEFLATE_LEVEL, FILL_VALUE},
    errors::ExportError,
    pipeline::{
        series::Coordinates,
        statistics::{DerivedGrid, Statistic},
    },
    Float,
};
use log::debug;
use ndarray::Array2;
use netcdf::{File, FileMut};
use std::{
    fs,
    path::{Path, PathBuf},
};

/// Directory holding one NetCDF file per computed statistic,
/// written by the computation stage and read back by assembly.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct IntermediateStore {
    dir: PathBuf,
}

impl IntermediateStore {
    pub fn create(dir: &Path) -> Result<Self, ExportError> {
        fs::create_dir_all(dir)?;

        Ok(IntermediateStore::open(dir))
    }

    pub fn open(dir: &Path) -> Self {
        IntermediateStore {
            dir: dir.to_path_buf(),
        }
    }

    pub fn path(&self, statistic: Statistic) -> PathBuf {
        self.dir.join(format!("{}.nc", statistic.name()))
    }

    pub fn save(&self, grid: &DerivedGrid) -> Result<(), ExportError> {
        let path = self.path(grid.statistic);
        debug!("Saving {} to {}", grid.statistic, path.display());

        let netcdf_err = |source| ExportError::NetCdf {
            path: path.clone(),
            source,
        };

        let mut file = netcdf::create(&path).map_err(netcdf_err)?;
        define_coordinates(&mut file, &grid.coordinates).map_err(netcdf_err)?;
        write_grid(&mut file, &path, grid)?;

        Ok(())
    }

    pub fn load(&self, statistic: Statistic) -> Result<DerivedGrid, ExportError> {
        let path = self.path(statistic);
        debug!("Loading {} from {}", statistic, path.display());

        let file = netcdf::open(&path).map_err(|source| ExportError::NetCdf {
            path: path.clone(),
            source,
        })?;

        read_grid(&file, &path, statistic)
    }

    /// Loads all statistics in their canonical order.
    pub fn load_all(&self) -> Result<Vec<DerivedGrid>, ExportError> {
        Statistic::ALL
            .iter()
            .map(|&statistic| self.load(statistic))
            .collect()
    }

    pub fn remove(self) -> Result<(), ExportError> {
        fs::remove_dir_all(&self.dir)?;

        Ok(())
    }
}

/// Adds latitude and longitude dimensions with their
/// coordinate variables.
fn define_coordinates(file: &mut FileMut, coordinates: &Coordinates) -> Result<(), netcdf::Error> {
    let lat_name = coordinates.latitude_name.as_str();
    let lon_name = coordinates.longitude_name.as_str();

    file.add_dimension(lat_name, coordinates.latitudes.len())?;
    file.add_dimension(lon_name, coordinates.longitudes.len())?;

    {
        let mut latitude = file.add_variable::<Float>(lat_name, &[lat_name])?;
        latitude.put_attribute("standard_name", "latitude")?;
        latitude.put_attribute("long_name", "latitude")?;
        latitude.put_attribute("units", "degrees_north")?;
        latitude.put_values(&coordinates.latitudes, ..)?;
    }

    {
        let mut longitude = file.add_variable::<Float>(lon_name, &[lon_name])?;
        longitude.put_attribute("standard_name", "longitude")?;
        longitude.put_attribute("long_name", "longitude")?;
        longitude.put_attribute("units", "degrees_east")?;
        longitude.put_values(&coordinates.longitudes, ..)?;
    }

    Ok(())
}

/// Encodes grid values with the fill value in place of NaN.
fn encode_values(grid: &DerivedGrid) -> Result<Vec<f32>, ExportError> {
    let mut encoded = Vec::with_capacity(grid.values.len());

    for &value in grid.values.iter() {
        if value.is_nan() {
            encoded.push(FILL_VALUE);
        } else if value as f32 == FILL_VALUE {
            return Err(ExportError::SentinelCollision(grid.statistic.name().to_string()));
        } else {
            encoded.push(value as f32);
        }
    }

    Ok(encoded)
}

/// Writes one grid with its metadata into a file
/// which already has its coordinates defined.
fn write_grid(file: &mut FileMut, path: &Path, grid: &DerivedGrid) -> Result<(), ExportError> {
    let netcdf_err = |source| ExportError::NetCdf {
        path: path.to_path_buf(),
        source,
    };

    let metadata = grid.metadata();
    let encoded = encode_values(grid)?;

    let mut variable = file
        .add_variable::<f32>(
            metadata.name,
            &[
                grid.coordinates.latitude_name.as_str(),
                grid.coordinates.longitude_name.as_str(),
            ],
        )
        .map_err(netcdf_err)?;

    variable
        .set_compression(DEFLATE_LEVEL, true)
        .map_err(netcdf_err)?;
    variable.set_fill_value(FILL_VALUE).map_err(netcdf_err)?;

    variable
        .put_attribute("long_name", metadata.long_name)
        .map_err(netcdf_err)?;
    variable
        .put_attribute("units", metadata.units)
        .map_err(netcdf_err)?;
    variable
        .put_attribute("description", metadata.description)
        .map_err(netcdf_err)?;
    if let Some(risk_level) = metadata.risk_level {
        variable
            .put_attribute("risk_level", risk_level.as_str())
            .map_err(netcdf_err)?;
    }
    variable
        .put_attribute("grid_mapping", "crs")
        .map_err(netcdf_err)?;

    variable.put_values(&encoded, ..).map_err(netcdf_err)?;

    Ok(())
}

/// Reads one grid with its coordinates, turning fill values into NaN.
fn read_grid(file: &File, path: &Path, statistic: Statistic) -> Result<DerivedGrid, ExportError> {
    let netcdf_err = |source| ExportError::NetCdf {
        path: path.to_path_buf(),
        source,
    };
    let missing = |variable: &str| ExportError::MissingVariable {
        variable: variable.to_string(),
        path: path.to_path_buf(),
    };

    let variable = file
        .variable(statistic.name())
        .ok_or_else(|| missing(statistic.name()))?;

    let dimensions: Vec<String> = variable
        .dimensions()
        .iter()
        .map(|dim| dim.name().to_string())
        .collect();

    if dimensions.len() != 2 {
        return Err(ExportError::MismatchedCoordinates(statistic.name().to_string()));
    }

    let read_axis = |name: &str| -> Result<Vec<Float>, ExportError> {
        file.variable(name)
            .ok_or_else(|| missing(name))?
            .get_values::<Float, _>(..)
            .map_err(netcdf_err)
    };

    let coordinates = Coordinates {
        latitudes: read_axis(&dimensions[0])?,
        longitudes: read_axis(&dimensions[1])?,
        latitude_name: dimensions[0].clone(),
        longitude_name: dimensions[1].clone(),
    };

    let raw = variable.get_values::<f32, _>(..).map_err(netcdf_err)?;
    let values = Array2::from_shape_vec(coordinates.shape(), raw)
        .map_err(|_| ExportError::MismatchedCoordinates(statistic.name().to_string()))?
        .mapv(|value| {
            if value == FILL_VALUE || value.is_nan() {
                Float::NAN
            } else {
                Float::from(value)
            }
        });

    Ok(DerivedGrid {
        statistic,
        values,
        coordinates,
    })
}

#[cfg(test)]
mod tests {
    use super::IntermediateStore;
    use crate::errors::ExportError;
    use crate::pipeline::{
        series::Coordinates,
        statistics::{DerivedGrid, Statistic},
    };
    use float_cmp::approx_eq;
    use ndarray::array;

    fn coordinates() -> Coordinates {
        Coordinates {
            latitude_name: "latitude".to_string(),
            longitude_name: "longitude".to_string(),
            latitudes: vec![10.0, 9.75],
            longitudes: vec![0.0, 0.25, 0.5],
        }
    }

    #[test]
    fn intermediate_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = IntermediateStore::create(&dir.path().join("temp")).unwrap();

        let grid = DerivedGrid::new(
            Statistic::DaysAbove29C,
            array![[1.5, f64::NAN, 0.0], [365.0, 12.25, 3.0]],
            coordinates(),
        )
        .unwrap();

        store.save(&grid).unwrap();
        let loaded = store.load(Statistic::DaysAbove29C).unwrap();

        assert_eq!(loaded.coordinates, grid.coordinates);
        assert!(loaded.values[[0, 1]].is_nan());
        for (a, b) in loaded.values.iter().zip(grid.values.iter()) {
            if !b.is_nan() {
                assert!(approx_eq!(f64, *a, *b, epsilon = 1e-5));
            }
        }

        store.remove().unwrap();
        assert!(!dir.path().join("temp").exists());
    }

    #[test]
    fn sentinel_collision_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = IntermediateStore::create(dir.path()).unwrap();

        let grid = DerivedGrid::new(
            Statistic::AnnualMean,
            array![[-9999.0, 1.0, 2.0], [3.0, 4.0, 5.0]],
            coordinates(),
        )
        .unwrap();

        assert!(matches!(
            store.save(&grid),
            Err(ExportError::SentinelCollision(_))
        ));
    }

    #[test]
    fn missing_intermediate() {
        let dir = tempfile::tempdir().unwrap();
        let store = IntermediateStore::open(dir.path());

        assert!(matches!(
            store.load(Statistic::P95),
            Err(ExportError::NetCdf { .. })
        ));
    }
}
