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

//! Sub-module assembling all derived grids into one CF file.

use super::{define_coordinates, read_grid, write_grid};
use crate::{
    constants::{PRIME_MERIDIAN, WGS84_A, WGS84_INV_F, WGS84_WKT},
    errors::ExportError,
    pipeline::{
        configuration::Provenance,
        statistics::{DerivedGrid, Statistic},
    },
    Float,
};
use chrono::{Local, NaiveDateTime};
use log::info;
use netcdf::FileMut;
use std::path::Path;

/// Grid-mapping attributes written on the scalar `crs` variable.
#[derive(Clone, PartialEq, Debug)]
pub struct CrsDescriptor {
    pub grid_mapping_name: &'static str,
    pub longitude_of_prime_meridian: Float,
    pub semi_major_axis: Float,
    pub inverse_flattening: Float,
    pub crs_wkt: &'static str,
}

impl CrsDescriptor {
    pub fn wgs84() -> Self {
        CrsDescriptor {
            grid_mapping_name: "latitude_longitude",
            longitude_of_prime_meridian: PRIME_MERIDIAN,
            semi_major_axis: WGS84_A,
            inverse_flattening: WGS84_INV_F,
            crs_wkt: WGS84_WKT,
        }
    }

    fn write(&self, file: &mut FileMut) -> Result<(), netcdf::Error> {
        let mut crs = file.add_variable::<i32>("crs", &[])?;
        crs.put_attribute("grid_mapping_name", self.grid_mapping_name)?;
        crs.put_attribute("longitude_of_prime_meridian", self.longitude_of_prime_meridian)?;
        crs.put_attribute("semi_major_axis", self.semi_major_axis)?;
        crs.put_attribute("inverse_flattening", self.inverse_flattening)?;
        crs.put_attribute("crs_wkt", self.crs_wkt)?;
        crs.put_values(&[0_i32], ..)?;

        Ok(())
    }
}

/// All derived grids on one shared grid, ready to be written
/// as a single self-describing file.
#[derive(Clone, PartialEq, Debug)]
pub struct OutputCollection {
    grids: Vec<DerivedGrid>,
    crs: CrsDescriptor,
    provenance: Provenance,
    created: NaiveDateTime,
}

impl OutputCollection {
    /// Checks that all grids share the coordinates of the
    /// first one and orders them canonically.
    pub fn assemble(
        mut grids: Vec<DerivedGrid>,
        provenance: Provenance,
    ) -> Result<Self, ExportError> {
        if let Some((first, rest)) = grids.split_first() {
            for grid in rest {
                if grid.coordinates != first.coordinates {
                    return Err(ExportError::MismatchedCoordinates(
                        grid.statistic.name().to_string(),
                    ));
                }
            }
        }

        grids.sort_by_key(|grid| grid.statistic);

        Ok(OutputCollection {
            grids,
            crs: CrsDescriptor::wgs84(),
            provenance,
            created: Local::now().naive_local(),
        })
    }

    pub fn write(&self, path: &Path) -> Result<(), ExportError> {
        info!("Writing combined output to {}", path.display());

        let netcdf_err = |source| ExportError::NetCdf {
            path: path.to_path_buf(),
            source,
        };

        let mut file = netcdf::create(path).map_err(netcdf_err)?;

        if let Some(first) = self.grids.first() {
            define_coordinates(&mut file, &first.coordinates).map_err(netcdf_err)?;
        }

        self.crs.write(&mut file).map_err(netcdf_err)?;

        for grid in &self.grids {
            write_grid(&mut file, path, grid)?;
        }

        self.write_provenance(&mut file).map_err(netcdf_err)?;

        Ok(())
    }

    fn write_provenance(&self, file: &mut FileMut) -> Result<(), netcdf::Error> {
        let history = format!("Created {}", self.created.format("%Y-%m-%d %H:%M:%S"));
        let provenance = &self.provenance;

        file.add_attribute("title", provenance.title.as_str())?;
        file.add_attribute("institution", provenance.institution.as_str())?;
        file.add_attribute("source", provenance.source.as_str())?;
        file.add_attribute("history", history.as_str())?;
        file.add_attribute("author", provenance.author.as_str())?;
        file.add_attribute("contact", provenance.contact.as_str())?;
        file.add_attribute("description", provenance.description.as_str())?;
        file.add_attribute("references", provenance.references.as_str())?;
        file.add_attribute("Conventions", "CF-1.8")?;

        Ok(())
    }

    /// Logs mean, minimum and maximum of every grid.
    pub fn log_summary(&self) {
        info!("Summary statistics:");

        for grid in &self.grids {
            info!("{}:", grid.statistic);

            match grid.summary() {
                Some(summary) => {
                    info!("  Mean: {:.2}", summary.mean);
                    info!("  Min:  {:.2}", summary.min);
                    info!("  Max:  {:.2}", summary.max);
                }
                None => info!("  No valid cells"),
            }
        }
    }
}

/// Reads every statistic present in a combined output file.
pub fn read_grids(path: &Path) -> Result<Vec<DerivedGrid>, ExportError> {
    let file = netcdf::open(path).map_err(|source| ExportError::NetCdf {
        path: path.to_path_buf(),
        source,
    })?;

    Statistic::ALL
        .iter()
        .filter(|statistic| file.variable(statistic.name()).is_some())
        .map(|&statistic| read_grid(&file, path, statistic))
        .collect()
}
