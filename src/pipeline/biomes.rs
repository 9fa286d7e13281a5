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

//! Module summarizing the derived grids within terrestrial biomes.
//!
//! For every biome and every grid, the valid cells of the grid
//! falling into the biome are collected and summarized by their count,
//! mean and closest-observation 15th and 85th percentiles. The last two
//! are the colour-scale range used when the grids are mapped per biome.

use crate::{
    constants::BIOMES,
    errors::StratificationError,
    pipeline::{
        configuration::Biomes,
        output::read_grids,
        series::Coordinates,
        statistics::{closest_observation, DerivedGrid},
    },
    Float,
};
use float_cmp::approx_eq;
use log::{debug, info};
use ndarray::{Array2, Zip};
use serde::Serialize;
use std::path::Path;

const BIOME_FILL: i32 = -1;
const LOWER_QUANTILE: Float = 0.15;
const UPPER_QUANTILE: Float = 0.85;
const COORDINATE_TOLERANCE: Float = 1e-4;

/// Biome-ID grid on the latitude-longitude grid of the metrics.
#[derive(Clone, PartialEq, Debug)]
pub struct BiomeGrid {
    pub ids: Array2<i32>,
    pub latitudes: Vec<Float>,
    pub longitudes: Vec<Float>,
}

impl BiomeGrid {
    pub fn read(path: &Path, variable_name: &str) -> Result<Self, StratificationError> {
        debug!("Reading biome grid {} from {}", variable_name, path.display());

        let netcdf_err = |source| StratificationError::NetCdf {
            path: path.to_path_buf(),
            source,
        };
        let missing = |variable: &str| StratificationError::MissingVariable {
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

        if dimensions.len() != 2 {
            return Err(StratificationError::NotCoregistered(
                "biome grid is not two-dimensional",
            ));
        }

        let read_axis = |name: &str| -> Result<Vec<Float>, StratificationError> {
            file.variable(name)
                .ok_or_else(|| missing(name))?
                .get_values::<Float, _>(..)
                .map_err(netcdf_err)
        };

        let latitudes = read_axis(&dimensions[0])?;
        let longitudes = read_axis(&dimensions[1])?;

        let raw = variable.get_values::<Float, _>(..).map_err(netcdf_err)?;
        let ids = Array2::from_shape_vec((latitudes.len(), longitudes.len()), raw)
            .map_err(|_| StratificationError::NotCoregistered("biome grid shape"))?
            .mapv(|id| if id.is_finite() { id.round() as i32 } else { BIOME_FILL });

        Ok(BiomeGrid {
            ids,
            latitudes,
            longitudes,
        })
    }

    /// Checks that the biome grid lies on the same cells as `coordinates`.
    pub fn check_coregistered(&self, coordinates: &Coordinates) -> Result<(), StratificationError> {
        let axis_matches = |a: &[Float], b: &[Float]| {
            a.len() == b.len()
                && a.iter()
                    .zip(b)
                    .all(|(x, y)| approx_eq!(Float, *x, *y, epsilon = COORDINATE_TOLERANCE))
        };

        if self.ids.dim() != coordinates.shape() {
            return Err(StratificationError::NotCoregistered("grid shapes differ"));
        }

        if !axis_matches(&self.latitudes, &coordinates.latitudes) {
            return Err(StratificationError::NotCoregistered("latitudes differ"));
        }

        if !axis_matches(&self.longitudes, &coordinates.longitudes) {
            return Err(StratificationError::NotCoregistered("longitudes differ"));
        }

        Ok(())
    }
}

/// Distribution of one grid within one biome.
#[derive(Clone, PartialEq, Debug, Serialize)]
pub struct BiomeSummary {
    pub biome_id: i32,
    pub biome_name: &'static str,
    pub variable: &'static str,
    pub cells: usize,
    pub mean: Float,
    pub p15: f32,
    pub p85: f32,
}

/// Summarizes `grid` in biome `biome_id`.
///
/// Returns `None` when the biome contains no valid cell of the grid.
pub fn summarize(
    grid: &DerivedGrid,
    biomes: &BiomeGrid,
    biome_id: i32,
    biome_name: &'static str,
) -> Option<BiomeSummary> {
    let mut values: Vec<f32> = Vec::new();

    Zip::from(&grid.values)
        .and(&biomes.ids)
        .for_each(|&value, &id| {
            if id == biome_id && !value.is_nan() {
                values.push(value as f32);
            }
        });

    if values.is_empty() {
        return None;
    }

    let cells = values.len();
    let mean = values.iter().map(|&v| Float::from(v)).sum::<Float>() / cells as Float;
    let p15 = closest_observation(&mut values, LOWER_QUANTILE)?;
    let p85 = closest_observation(&mut values, UPPER_QUANTILE)?;

    Some(BiomeSummary {
        biome_id,
        biome_name,
        variable: grid.statistic.name(),
        cells,
        mean,
        p15,
        p85,
    })
}

/// Summarizes every grid of the combined file in every
/// biome and writes the rows into the configured CSV file.
///
/// Returns the number of written rows.
pub fn stratify(settings: &Biomes, combined: &Path) -> Result<usize, StratificationError> {
    info!("Summarizing metrics by biome...");

    let grids = read_grids(combined)?;
    let biomes = BiomeGrid::read(&settings.file, &settings.variable)?;

    for grid in &grids {
        biomes.check_coregistered(&grid.coordinates)?;
    }

    let mut writer = csv::Writer::from_path(&settings.summary)?;
    let mut rows = 0;

    for (biome_id, biome_name) in BIOMES {
        for grid in &grids {
            match summarize(grid, &biomes, biome_id, biome_name) {
                Some(summary) => {
                    writer.serialize(summary)?;
                    rows += 1;
                }
                None => debug!("No valid {} cells in biome {}", grid.statistic, biome_name),
            }
        }
    }

    writer.flush()?;

    info!("  Biome summary written to {}", settings.summary.display());

    Ok(rows)
}
