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

//! Module containing constants used by the pipeline.

use crate::Float;

/// Missing-value sentinel written into every output data grid.
pub const FILL_VALUE: f32 = -9999.0;

/// Quantile of the percentile statistic.
pub const P95_QUANTILE: Float = 0.95;

/// WBGT threshold (degC) of moderate heat risk.
pub const MODERATE_RISK_WBGT: f32 = 27.0;

/// WBGT threshold (degC) of high heat risk.
pub const HIGH_RISK_WBGT: f32 = 29.0;

/// WBGT threshold (degC) of extreme heat risk.
pub const EXTREME_RISK_WBGT: f32 = 31.0;

/// Deflate level applied to output grids.
pub const DEFLATE_LEVEL: i32 = 4;

///WGS84 ellipsoid semi-major axis
pub const WGS84_A: Float = 6_378_137.0;

///WGS84 ellipsoid inverse flattening
#[allow(clippy::excessive_precision)]
pub const WGS84_INV_F: Float = 298.257_223_563;

///Greenwich prime meridian longitude
pub const PRIME_MERIDIAN: Float = 0.0;

///WGS84 geographic coordinate system in OGC well-known-text
pub const WGS84_WKT: &str = r#"GEOGCS["WGS 84",DATUM["WGS_1984",SPHEROID["WGS 84",6378137,298.257223563,AUTHORITY["EPSG","7030"]],AUTHORITY["EPSG","6326"]],PRIMEM["Greenwich",0,AUTHORITY["EPSG","8901"]],UNIT["degree",0.0174532925199433,AUTHORITY["EPSG","9122"]],AUTHORITY["EPSG","4326"]]"#;

/// EPSG code assigned to exported rasters.
pub const WGS84_EPSG: &str = "EPSG:4326";

/// Accepted names of the latitude dimension.
pub const LATITUDE_NAMES: [&str; 2] = ["latitude", "lat"];

/// Accepted names of the longitude dimension.
pub const LONGITUDE_NAMES: [&str; 2] = ["longitude", "lon"];

/// Ecoregion biome names indexed by rasterized biome ID.
pub const BIOMES: [(i32, &str); 15] = [
    (1, "Boreal Forests/Taiga"),
    (2, "Deserts & Xeric Shrublands"),
    (3, "Flooded Grasslands & Savannas"),
    (4, "Mangroves"),
    (5, "Mediterranean Forests, Woodlands & Scrub"),
    (6, "Montane Grasslands & Shrublands"),
    (7, "Rock and Ice"),
    (8, "Temperate Broadleaf & Mixed Forests"),
    (9, "Temperate Conifer Forests"),
    (10, "Temperate Grasslands, Savannas & Shrublands"),
    (11, "Tropical & Subtropical Coniferous Forests"),
    (12, "Tropical & Subtropical Dry Broadleaf Forests"),
    (13, "Tropical & Subtropical Grasslands, Savannas & Shrublands"),
    (14, "Tropical & Subtropical Moist Broadleaf Forests"),
    (15, "Tundra"),
];
