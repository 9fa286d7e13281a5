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

//! Sub-module reducing the series year by year.
//!
//! The series is streamed through the partition grid: for every
//! spatial tile the time blocks are read in order and folded into
//! per-cell accumulators, and each block is released before the
//! next one is read. As the time axis is strictly increasing, the
//! steps of one calendar year are contiguous and a single year
//! of partial sums per cell is enough.

use crate::{
    errors::ComputationError,
    pipeline::{
        configuration::PartitionShape,
        series::{tiles, Tile, TimeSeriesSource},
    },
    Float,
};
use indicatif::{ProgressBar, ProgressStyle};
use log::debug;
use ndarray::{s, Array2, ArrayView2, ArrayView3, Axis, Zip};

/// Value a sample must reach to be counted.
#[derive(Copy, Clone, PartialEq, Debug)]
pub enum Threshold<'a> {
    Fixed(f32),
    /// Threshold grid covering the whole series plane.
    PerCell(&'a Array2<Float>),
}

/// Reduction applied within each calendar year
/// before averaging across years.
#[derive(Copy, Clone, PartialEq, Debug)]
pub enum AnnualRule<'a> {
    /// Mean of the valid samples.
    Mean,
    /// Number of valid samples at or above the threshold.
    CountAtLeast(Threshold<'a>),
}

/// Reduces the whole series with `rule` per calendar year
/// and averages the yearly results.
///
/// Cells without any valid sample in the series are NaN.
pub fn reduce_annual<S: TimeSeriesSource>(
    source: &S,
    partition: PartitionShape,
    rule: &AnnualRule,
) -> Result<Array2<Float>, ComputationError> {
    let shape = source.shape();
    let years_count = source.distinct_years().len();
    let step_years = source.years();

    let mut result = Array2::from_elem((shape.latitude, shape.longitude), Float::NAN);
    let tiles = tiles(shape, partition);

    debug!(
        "Reducing {} time steps of {} years in {} tiles",
        shape.time,
        years_count,
        tiles.len()
    );

    let tiles_bar = ProgressBar::new(tiles.len() as u64);
    tiles_bar.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}] [{wide_bar:.cyan/blue}] {pos}/{len} tiles")
            .progress_chars("#>-"),
    );

    for tile in &tiles {
        let reduced = reduce_tile(source, tile, step_years, years_count, rule)?;

        result
            .slice_mut(s![tile.latitude.clone(), tile.longitude.clone()])
            .assign(&reduced);

        tiles_bar.inc(1);
    }

    tiles_bar.finish_and_clear();

    Ok(result)
}

fn reduce_tile<S: TimeSeriesSource>(
    source: &S,
    tile: &Tile,
    step_years: &[i32],
    years_count: usize,
    rule: &AnnualRule,
) -> Result<Array2<Float>, ComputationError> {
    let tile_shape = (tile.latitude.len(), tile.longitude.len());

    let mut accumulator = match rule {
        AnnualRule::Mean => Accumulator::Mean(MeanOfYears::new(tile_shape)),
        AnnualRule::CountAtLeast(threshold) => {
            let threshold = match threshold {
                Threshold::Fixed(value) => TileThreshold::Fixed(*value),
                Threshold::PerCell(grid) => TileThreshold::PerCell(
                    grid.slice(s![tile.latitude.clone(), tile.longitude.clone()]),
                ),
            };
            Accumulator::Count(Exceedances::new(tile_shape, threshold))
        }
    };

    for window in tile.time_blocks() {
        let block = source
            .read_window(&window)
            .map_err(|source| ComputationError::Partition {
                lat_start: tile.latitude.start,
                lat_end: tile.latitude.end,
                lon_start: tile.longitude.start,
                lon_end: tile.longitude.end,
                source,
            })?;

        accumulator.fold(block.view(), &step_years[window.time.clone()]);
    }

    Ok(accumulator.finish(years_count))
}

enum Accumulator<'a> {
    Mean(MeanOfYears),
    Count(Exceedances<'a>),
}

impl<'a> Accumulator<'a> {
    fn fold(&mut self, block: ArrayView3<f32>, block_years: &[i32]) {
        for (step, &year) in block.axis_iter(Axis(0)).zip(block_years) {
            match self {
                Accumulator::Mean(acc) => acc.add(step, year),
                Accumulator::Count(acc) => acc.add(step),
            }
        }
    }

    fn finish(self, years_count: usize) -> Array2<Float> {
        match self {
            Accumulator::Mean(acc) => acc.finish(),
            Accumulator::Count(acc) => acc.finish(years_count),
        }
    }
}

/// Running mean of yearly means, NaN-skipping at both levels.
struct MeanOfYears {
    current_year: Option<i32>,
    year_sum: Array2<Float>,
    year_valid: Array2<u32>,
    means_sum: Array2<Float>,
    means_count: Array2<u32>,
}

impl MeanOfYears {
    fn new(shape: (usize, usize)) -> Self {
        MeanOfYears {
            current_year: None,
            year_sum: Array2::zeros(shape),
            year_valid: Array2::zeros(shape),
            means_sum: Array2::zeros(shape),
            means_count: Array2::zeros(shape),
        }
    }

    fn add(&mut self, step: ArrayView2<f32>, year: i32) {
        if self.current_year != Some(year) {
            self.close_year();
            self.current_year = Some(year);
        }

        Zip::from(&mut self.year_sum)
            .and(&mut self.year_valid)
            .and(&step)
            .for_each(|sum, valid, &value| {
                if !value.is_nan() {
                    *sum += Float::from(value);
                    *valid += 1;
                }
            });
    }

    fn close_year(&mut self) {
        Zip::from(&mut self.means_sum)
            .and(&mut self.means_count)
            .and(&mut self.year_sum)
            .and(&mut self.year_valid)
            .for_each(|means_sum, means_count, sum, valid| {
                if *valid > 0 {
                    *means_sum += *sum / Float::from(*valid);
                    *means_count += 1;
                }
                *sum = 0.0;
                *valid = 0;
            });
    }

    fn finish(mut self) -> Array2<Float> {
        self.close_year();

        Zip::from(&self.means_sum)
            .and(&self.means_count)
            .map_collect(|&sum, &count| {
                if count > 0 {
                    sum / Float::from(count)
                } else {
                    Float::NAN
                }
            })
    }
}

enum TileThreshold<'a> {
    Fixed(f32),
    PerCell(ArrayView2<'a, Float>),
}

/// Counts of samples reaching the threshold. The mean over years is
/// the total count divided by the number of years in the series, as
/// a year without valid samples counts zero days.
struct Exceedances<'a> {
    threshold: TileThreshold<'a>,
    hits: Array2<u32>,
    valid: Array2<u32>,
}

impl<'a> Exceedances<'a> {
    fn new(shape: (usize, usize), threshold: TileThreshold<'a>) -> Self {
        Exceedances {
            threshold,
            hits: Array2::zeros(shape),
            valid: Array2::zeros(shape),
        }
    }

    fn add(&mut self, step: ArrayView2<f32>) {
        match &self.threshold {
            TileThreshold::Fixed(threshold) => {
                let threshold = *threshold;

                Zip::from(&mut self.hits)
                    .and(&mut self.valid)
                    .and(&step)
                    .for_each(|hits, valid, &value| {
                        if !value.is_nan() {
                            *valid += 1;
                            if value >= threshold {
                                *hits += 1;
                            }
                        }
                    });
            }
            TileThreshold::PerCell(thresholds) => {
                Zip::from(&mut self.hits)
                    .and(&mut self.valid)
                    .and(&step)
                    .and(thresholds)
                    .for_each(|hits, valid, &value, &threshold| {
                        if !value.is_nan() {
                            *valid += 1;
                            if Float::from(value) >= threshold {
                                *hits += 1;
                            }
                        }
                    });
            }
        }
    }

    fn finish(self, years_count: usize) -> Array2<Float> {
        Zip::from(&self.hits)
            .and(&self.valid)
            .map_collect(|&hits, &valid| {
                if valid > 0 && years_count > 0 {
                    Float::from(hits) / years_count as Float
                } else {
                    Float::NAN
                }
            })
    }
}

#[cfg(test)]
mod tests {
    use super::{reduce_annual, AnnualRule, Threshold};
    use crate::errors::ComputationError;
    use crate::pipeline::{
        configuration::PartitionShape,
        series::{FailingSeries, MemorySeries},
    };
    use float_cmp::approx_eq;
    use ndarray::{array, Array2, Array3};

    fn partition(time: usize, latitude: usize, longitude: usize) -> PartitionShape {
        PartitionShape {
            time,
            latitude,
            longitude,
        }
    }

    /// Two cells over two years, the first year with two
    /// samples and the second one with four.
    fn two_years() -> MemorySeries {
        let data = Array3::from_shape_vec(
            (6, 1, 2),
            vec![
                20.0, 28.0, //
                22.0, 30.0, //
                30.0, f32::NAN, //
                30.0, f32::NAN, //
                30.0, 32.0, //
                30.0, f32::NAN,
            ],
        )
        .unwrap();

        MemorySeries::new(data, vec![2000, 2000, 2001, 2001, 2001, 2001])
    }

    #[test]
    fn mean_of_annual_means() {
        let series = two_years();
        let mean = reduce_annual(&series, partition(4, 1, 1), &AnnualRule::Mean).unwrap();

        // equal weight per year regardless of its sample count
        assert!(approx_eq!(f64, mean[[0, 0]], (21.0 + 30.0) / 2.0));
        assert!(approx_eq!(f64, mean[[0, 1]], (29.0 + 32.0) / 2.0));
    }

    #[test]
    fn partition_shape_does_not_change_results() {
        let series = two_years();

        for rule in [
            AnnualRule::Mean,
            AnnualRule::CountAtLeast(Threshold::Fixed(29.0)),
        ] {
            let reference = reduce_annual(&series, partition(100, 100, 100), &rule).unwrap();

            for time in 1..7 {
                let other = reduce_annual(&series, partition(time, 1, 1), &rule).unwrap();
                assert_eq!(other, reference);
            }
        }
    }

    #[test]
    fn counts_averaged_over_all_years() {
        let series = two_years();
        let rule = AnnualRule::CountAtLeast(Threshold::Fixed(30.0));
        let counts = reduce_annual(&series, partition(2, 1, 2), &rule).unwrap();

        // 0 days in 2000 and 4 days in 2001
        assert!(approx_eq!(f64, counts[[0, 0]], 2.0));
        // 1 day in 2000 and 1 day in 2001
        assert!(approx_eq!(f64, counts[[0, 1]], 1.0));
    }

    #[test]
    fn per_cell_threshold() {
        let series = two_years();
        let thresholds: Array2<f64> = array![[30.0, 28.0]];
        let rule = AnnualRule::CountAtLeast(Threshold::PerCell(&thresholds));
        let counts = reduce_annual(&series, partition(3, 1, 1), &rule).unwrap();

        assert!(approx_eq!(f64, counts[[0, 0]], 2.0));
        assert!(approx_eq!(f64, counts[[0, 1]], 1.5));
    }

    #[test]
    fn cells_without_data_are_missing() {
        let data = Array3::from_shape_vec((2, 1, 2), vec![f32::NAN, 27.0, f32::NAN, 26.0]).unwrap();
        let series = MemorySeries::new(data, vec![1990, 1991]);

        let mean = reduce_annual(&series, partition(1, 1, 1), &AnnualRule::Mean).unwrap();
        assert!(mean[[0, 0]].is_nan());
        assert!(approx_eq!(f64, mean[[0, 1]], 26.5));

        let rule = AnnualRule::CountAtLeast(Threshold::Fixed(27.0));
        let counts = reduce_annual(&series, partition(1, 1, 1), &rule).unwrap();
        assert!(counts[[0, 0]].is_nan());
        assert!(approx_eq!(f64, counts[[0, 1]], 0.5));
    }

    #[test]
    fn failed_tile_reports_its_range() {
        let series = FailingSeries {
            inner: two_years(),
            failing: 1..2,
        };

        for rule in [
            AnnualRule::Mean,
            AnnualRule::CountAtLeast(Threshold::Fixed(29.0)),
        ] {
            let result = reduce_annual(&series, partition(2, 1, 1), &rule);

            assert!(matches!(
                result,
                Err(ComputationError::Partition {
                    lat_start: 0,
                    lat_end: 1,
                    lon_start: 1,
                    lon_end: 2,
                    ..
                })
            ));
        }
    }
}
