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

//! Sub-module computing percentiles over time in longitude chunks.
//!
//! The percentile of a cell needs all of its samples at once, so the
//! series cannot be streamed through time as for the annual statistics.
//! Instead, the longitude axis is cut into chunks and each chunk is read
//! over the whole time axis, reduced and released before the next one.
//!
//! Percentiles use the closest-observation estimator, which always
//! returns one of the samples. Chunked results are therefore exactly
//! equal to those computed on the whole array.

use crate::{
    errors::ComputationError,
    pipeline::{
        chunking::{plan_longitude_chunks, ChunkSpec},
        series::{SeriesShape, TimeSeriesSource, Window},
    },
    Float,
};
use indicatif::{ProgressBar, ProgressStyle};
use log::{debug, info};
use ndarray::{concatenate, Array2, Array3, ArrayView2, ArrayView3, Axis, Zip};
use rayon::ThreadPool;

/// Index of the closest observation to quantile `q`
/// in `n` sorted samples.
///
/// The virtual index `n*q - 1.5` is rounded up, except when it is
/// already integer and even, and clipped to the samples.
pub fn closest_observation_index(n: usize, q: Float) -> usize {
    debug_assert!(n > 0);

    let virtual_index = n as Float * q - 1.5;
    let previous = virtual_index.floor();
    let gamma = virtual_index - previous;

    let index = if gamma == 0.0 && (previous as i64) % 2 == 0 {
        previous
    } else {
        previous + 1.0
    };

    index.clamp(0.0, (n - 1) as Float) as usize
}

/// Quantile `q` of the valid (non-NaN) samples, reordering them.
///
/// Returns `None` when there are no valid samples.
pub fn closest_observation(samples: &mut Vec<f32>, q: Float) -> Option<f32> {
    samples.retain(|value| !value.is_nan());

    if samples.is_empty() {
        return None;
    }

    let index = closest_observation_index(samples.len(), q);
    let (_, value, _) = samples.select_nth_unstable_by(index, f32::total_cmp);

    Some(*value)
}

/// Quantile `q` over the time axis of a (time, latitude, longitude)
/// block, cell by cell on the current thread pool.
pub fn percentile_over_time(block: ArrayView3<f32>, q: Float) -> Array2<Float> {
    let (_, nlat, nlon) = block.dim();
    let mut result = Array2::from_elem((nlat, nlon), Float::NAN);

    Zip::from(&mut result)
        .and(block.lanes(Axis(0)))
        .par_for_each(|cell, samples| {
            let mut samples = samples.to_vec();

            if let Some(value) = closest_observation(&mut samples, q) {
                *cell = Float::from(value);
            }
        });

    result
}

/// Iterator materializing one longitude chunk of the series
/// over the whole time axis at a time.
///
/// Each slab is owned by the consumer, which drops it before
/// requesting the next one, so at most one chunk is resident.
struct LongitudeSlabs<'s, S: TimeSeriesSource> {
    source: &'s S,
    shape: SeriesShape,
    chunks: std::vec::IntoIter<ChunkSpec>,
}

impl<'s, S: TimeSeriesSource> Iterator for LongitudeSlabs<'s, S> {
    type Item = Result<(ChunkSpec, Array3<f32>), ComputationError>;

    fn next(&mut self) -> Option<Self::Item> {
        let chunk = self.chunks.next()?;

        if chunk.is_empty() {
            return Some(Ok((chunk, Array3::zeros((self.shape.time, self.shape.latitude, chunk.len())))));
        }

        let window = Window {
            time: 0..self.shape.time,
            latitude: 0..self.shape.latitude,
            longitude: chunk.range(),
        };

        let slab = self
            .source
            .read_window(&window)
            .map(|slab| (chunk, slab))
            .map_err(|source| ComputationError::Chunk {
                index: chunk.index,
                start: chunk.start,
                end: chunk.end,
                source,
            });

        Some(slab)
    }
}

/// Quantile `q` over time of the whole series, computed in
/// `chunks` longitude chunks and reassembled in longitude order.
///
/// Cells of each chunk are reduced in parallel on `threadpool`.
pub fn chunked_percentile<S: TimeSeriesSource>(
    source: &S,
    chunks: usize,
    q: Float,
    threadpool: &ThreadPool,
) -> Result<Array2<Float>, ComputationError> {
    let shape = source.shape();
    let plan = plan_longitude_chunks(shape.longitude, chunks)?;
    let chunks_count = plan.len();

    let slabs = LongitudeSlabs {
        source,
        shape,
        chunks: plan.into_iter(),
    };

    let mut pieces: Vec<Array2<Float>> = Vec::with_capacity(chunks_count);

    let chunks_bar = ProgressBar::new(chunks_count as u64);
    chunks_bar.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}] [{wide_bar:.cyan/blue}] {pos}/{len} chunks")
            .progress_chars("#>-"),
    );

    for slab in slabs {
        let (chunk, slab) = slab?;

        info!(
            "  Processing longitude chunk {}/{} (indices {}:{})...",
            chunk.index + 1,
            chunks_count,
            chunk.start,
            chunk.end
        );

        pieces.push(threadpool.install(|| percentile_over_time(slab.view(), q)));
        drop(slab);

        debug!("Chunk {} complete", chunk.index + 1);
        chunks_bar.inc(1);
    }

    chunks_bar.finish_and_clear();

    debug!("Combining longitude chunks");

    let views: Vec<ArrayView2<Float>> = pieces.iter().map(|piece| piece.view()).collect();
    let result = concatenate(Axis(1), &views)?;

    Ok(result)
}
