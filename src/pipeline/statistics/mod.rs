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

//! Module with the six WBGT climate statistics: their
//! fixed metadata records and the reductions producing them.
//!
//! Every statistic reduces the time axis away and yields a
//! [`DerivedGrid`] on exactly the spatial axes of the input series.
//! Missing cells are kept as NaN in memory and only turned into the
//! fill value when written.

mod annual;
mod percentile;

pub use self::annual::{reduce_annual, AnnualRule, Threshold};
pub use self::percentile::{chunked_percentile, closest_observation};

use crate::{
    constants::{EXTREME_RISK_WBGT, HIGH_RISK_WBGT, MODERATE_RISK_WBGT, P95_QUANTILE},
    errors::ComputationError,
    pipeline::{
        configuration::PartitionShape,
        series::{Coordinates, TimeSeriesSource},
    },
    Float,
};
use log::info;
use ndarray::Array2;
use rayon::ThreadPool;
use std::fmt;

/// Heat risk category of exceedance statistics.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub enum RiskLevel {
    Moderate,
    High,
    Extreme,
}

impl RiskLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            RiskLevel::Moderate => "moderate",
            RiskLevel::High => "high",
            RiskLevel::Extreme => "extreme",
        }
    }
}

/// Fixed description of a derived grid written
/// as variable attributes.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct GridMetadata {
    pub name: &'static str,
    pub long_name: &'static str,
    pub units: &'static str,
    pub description: &'static str,
    pub risk_level: Option<RiskLevel>,
}

/// The statistics computed by the pipeline, in computation order.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub enum Statistic {
    AnnualMean,
    P95,
    DaysAboveP95,
    DaysAbove27C,
    DaysAbove29C,
    DaysAbove31C,
}

impl Statistic {
    pub const ALL: [Statistic; 6] = [
        Statistic::AnnualMean,
        Statistic::P95,
        Statistic::DaysAboveP95,
        Statistic::DaysAbove27C,
        Statistic::DaysAbove29C,
        Statistic::DaysAbove31C,
    ];

    pub fn name(self) -> &'static str {
        self.metadata().name
    }

    /// WBGT threshold of statistics counting days above a constant.
    pub fn fixed_threshold(self) -> Option<f32> {
        match self {
            Statistic::DaysAbove27C => Some(MODERATE_RISK_WBGT),
            Statistic::DaysAbove29C => Some(HIGH_RISK_WBGT),
            Statistic::DaysAbove31C => Some(EXTREME_RISK_WBGT),
            _ => None,
        }
    }

    pub fn metadata(self) -> GridMetadata {
        match self {
            Statistic::AnnualMean => GridMetadata {
                name: "wbgtmax_annual_mean",
                long_name: "Multi-year mean of annual maximum wet bulb globe temperature",
                units: "degC",
                description: "Mean of annual maximum WBGT values averaged across all years",
                risk_level: None,
            },
            Statistic::P95 => GridMetadata {
                name: "wbgtmax_p95",
                long_name: "95th percentile of daily maximum wet bulb globe temperature",
                units: "degC",
                description: "95th percentile threshold across entire time period",
                risk_level: None,
            },
            Statistic::DaysAboveP95 => GridMetadata {
                name: "days_above_p95",
                long_name: "Mean annual days exceeding 95th percentile WBGT",
                units: "days",
                description: "Average number of days per year exceeding the 95th percentile threshold",
                risk_level: None,
            },
            Statistic::DaysAbove27C => GridMetadata {
                name: "days_above_27C",
                long_name: "Mean annual days with WBGT ≥ 27°C",
                units: "days",
                description: "Average number of days per year with moderate heat risk (WBGT ≥ 27°C)",
                risk_level: Some(RiskLevel::Moderate),
            },
            Statistic::DaysAbove29C => GridMetadata {
                name: "days_above_29C",
                long_name: "Mean annual days with WBGT ≥ 29°C",
                units: "days",
                description: "Average number of days per year with high heat risk (WBGT ≥ 29°C)",
                risk_level: Some(RiskLevel::High),
            },
            Statistic::DaysAbove31C => GridMetadata {
                name: "days_above_31C",
                long_name: "Mean annual days with WBGT ≥ 31°C",
                units: "days",
                description: "Average number of days per year with extreme heat risk (WBGT ≥ 31°C)",
                risk_level: Some(RiskLevel::Extreme),
            },
        }
    }
}

impl fmt::Display for Statistic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Time-reduced field on the latitude-longitude grid of the series.
#[derive(Clone, PartialEq, Debug)]
pub struct DerivedGrid {
    pub statistic: Statistic,
    pub values: Array2<Float>,
    pub coordinates: Coordinates,
}

impl DerivedGrid {
    pub fn new(
        statistic: Statistic,
        values: Array2<Float>,
        coordinates: Coordinates,
    ) -> Result<Self, ComputationError> {
        if values.dim() != coordinates.shape() {
            return Err(ComputationError::ShapeMismatch {
                expected: coordinates.shape(),
                found: values.dim(),
            });
        }

        Ok(DerivedGrid {
            statistic,
            values,
            coordinates,
        })
    }

    pub fn metadata(&self) -> GridMetadata {
        self.statistic.metadata()
    }

    pub fn summary(&self) -> Option<GridSummary> {
        GridSummary::of(&self.values)
    }
}

/// Mean, minimum and maximum over the valid cells of a grid.
#[derive(Copy, Clone, PartialEq, Debug)]
pub struct GridSummary {
    pub mean: Float,
    pub min: Float,
    pub max: Float,
}

impl GridSummary {
    /// Returns `None` when the grid has no valid cell.
    pub fn of(values: &Array2<Float>) -> Option<Self> {
        let mut sum = 0.0;
        let mut count = 0_usize;
        let mut min = Float::INFINITY;
        let mut max = Float::NEG_INFINITY;

        for &value in values.iter().filter(|v| !v.is_nan()) {
            sum += value;
            count += 1;
            min = min.min(value);
            max = max.max(value);
        }

        if count == 0 {
            return None;
        }

        Some(GridSummary {
            mean: sum / count as Float,
            min,
            max,
        })
    }
}

/// Computes the multi-year mean of annual means.
pub fn compute_annual_mean<S: TimeSeriesSource>(
    source: &S,
    partition: PartitionShape,
) -> Result<DerivedGrid, ComputationError> {
    let values = reduce_annual(source, partition, &AnnualRule::Mean)?;

    finish(Statistic::AnnualMean, values, source.coordinates())
}

/// Computes the 95th percentile one longitude chunk at a time.
pub fn compute_p95<S: TimeSeriesSource>(
    source: &S,
    longitude_chunks: usize,
    threadpool: &ThreadPool,
) -> Result<DerivedGrid, ComputationError> {
    let values = chunked_percentile(source, longitude_chunks, P95_QUANTILE, threadpool)?;

    finish(Statistic::P95, values, source.coordinates())
}

/// Computes the mean annual count of days at or above
/// the constant threshold of `statistic`.
pub fn compute_days_above<S: TimeSeriesSource>(
    source: &S,
    statistic: Statistic,
    partition: PartitionShape,
) -> Result<DerivedGrid, ComputationError> {
    let threshold = statistic
        .fixed_threshold()
        .ok_or(ComputationError::NoFixedThreshold(statistic.name()))?;

    let rule = AnnualRule::CountAtLeast(Threshold::Fixed(threshold));
    let values = reduce_annual(source, partition, &rule)?;

    finish(statistic, values, source.coordinates())
}

/// Computes the mean annual count of days at or above
/// the per-cell 95th percentile.
pub fn compute_days_above_p95<S: TimeSeriesSource>(
    source: &S,
    p95: &DerivedGrid,
    partition: PartitionShape,
) -> Result<DerivedGrid, ComputationError> {
    if p95.values.dim() != source.coordinates().shape() {
        return Err(ComputationError::ShapeMismatch {
            expected: source.coordinates().shape(),
            found: p95.values.dim(),
        });
    }

    let rule = AnnualRule::CountAtLeast(Threshold::PerCell(&p95.values));
    let values = reduce_annual(source, partition, &rule)?;

    finish(Statistic::DaysAboveP95, values, source.coordinates())
}

fn finish(
    statistic: Statistic,
    values: Array2<Float>,
    coordinates: &Coordinates,
) -> Result<DerivedGrid, ComputationError> {
    let grid = DerivedGrid::new(statistic, values, coordinates.clone())?;

    match grid.summary() {
        Some(summary) => info!("  Mean: {:.2}", summary.mean),
        None => info!("  Mean: no valid cells"),
    }

    Ok(grid)
}
