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

//! Sub-module exporting every variable of the combined file
//! as a single-band GeoTIFF with an external converter.

use crate::{
    constants::WGS84_EPSG,
    errors::ConversionError,
    pipeline::{configuration::GeoTiff, statistics::Statistic},
};
use log::{error, info};
use std::{
    path::{Path, PathBuf},
    process::Command,
};

/// Converts one variable of a NetCDF file into a raster file.
pub trait RasterConverter {
    fn convert(&self, source: &Path, variable: &str, target: &Path) -> Result<(), ConversionError>;
}

/// Converter running `gdal_translate` with LZW compression,
/// internal tiling and the geographic WGS84 reference.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct GdalTranslate {
    program: PathBuf,
}

impl GdalTranslate {
    pub fn new(program: &Path) -> Self {
        GdalTranslate {
            program: program.to_path_buf(),
        }
    }
}

impl RasterConverter for GdalTranslate {
    fn convert(&self, source: &Path, variable: &str, target: &Path) -> Result<(), ConversionError> {
        let program = self.program.display().to_string();

        let output = Command::new(&self.program)
            .args(["-of", "GTiff"])
            .args(["-co", "COMPRESS=LZW"])
            .args(["-co", "TILED=YES"])
            .args(["-a_srs", WGS84_EPSG])
            .arg(format!("NETCDF:{}:{}", source.display(), variable))
            .arg(target)
            .output()
            .map_err(|source| ConversionError::Spawn {
                program: program.clone(),
                source,
            })?;

        if !output.status.success() {
            return Err(ConversionError::Failed {
                program,
                status: output.status,
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok(())
    }
}

/// Outcome of a raster export. Failed conversions do
/// not prevent the remaining ones from being attempted.
#[derive(Debug, Default)]
pub struct RasterReport {
    pub created: Vec<PathBuf>,
    pub failed: Vec<(Statistic, ConversionError)>,
}

/// Converts every statistic of the combined file into
/// `<directory>/<prefix><name>.tif`.
pub fn export_rasters(
    converter: &dyn RasterConverter,
    source: &Path,
    settings: &GeoTiff,
) -> RasterReport {
    info!("Converting to GeoTIFF...");

    let mut report = RasterReport::default();

    for statistic in Statistic::ALL {
        let target = settings
            .directory
            .join(format!("{}{}.tif", settings.prefix, statistic.name()));

        match converter.convert(source, statistic.name(), &target) {
            Ok(()) => {
                info!("  Created: {}", target.display());
                report.created.push(target);
            }
            Err(err) => {
                error!("  Error converting {}: {}", statistic, err);
                report.failed.push((statistic, err));
            }
        }
    }

    report
}
