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

//! Module planning the longitude chunks in which
//! the percentile statistic is computed.
//!
//! The longitude axis is split with integer division into
//! contiguous chunks and the last chunk absorbs the remainder,
//! so the chunks always tile the axis exactly once.

use crate::errors::ComputationError;
use std::ops::Range;

/// Contiguous sub-range `start..end` of the longitude axis.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct ChunkSpec {
    pub index: usize,
    pub start: usize,
    pub end: usize,
}

impl ChunkSpec {
    pub fn range(&self) -> Range<usize> {
        self.start..self.end
    }

    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }
}

/// Splits a longitude axis of length `len` into `chunks` chunks.
///
/// When `chunks` exceeds `len` all but the last chunk are empty.
pub fn plan_longitude_chunks(len: usize, chunks: usize) -> Result<Vec<ChunkSpec>, ComputationError> {
    if chunks == 0 {
        return Err(ComputationError::InvalidChunking { len, chunks });
    }

    let chunk_size = len / chunks;

    let plan = (0..chunks)
        .map(|index| ChunkSpec {
            index,
            start: index * chunk_size,
            end: if index < chunks - 1 {
                (index + 1) * chunk_size
            } else {
                len
            },
        })
        .collect();

    Ok(plan)
}

#[cfg(test)]
mod tests {
    use super::plan_longitude_chunks;
    use crate::errors::ComputationError;

    #[test]
    fn chunks_tile_axis() {
        for len in 1..60 {
            for chunks in 1..=len + 3 {
                let plan = plan_longitude_chunks(len, chunks).unwrap();

                assert_eq!(plan.len(), chunks);
                assert_eq!(plan.first().unwrap().start, 0);
                assert_eq!(plan.last().unwrap().end, len);

                for pair in plan.windows(2) {
                    assert_eq!(pair[0].end, pair[1].start);
                }

                assert!(plan.iter().all(|chunk| chunk.start <= chunk.end));
                assert_eq!(plan.iter().map(|chunk| chunk.len()).sum::<usize>(), len);
                assert_eq!(
                    plan.last().unwrap().len(),
                    len - (chunks - 1) * (len / chunks)
                );
            }
        }
    }

    #[test]
    fn era5_grid() {
        let plan = plan_longitude_chunks(1440, 6).unwrap();

        assert!(plan.iter().all(|chunk| chunk.len() == 240));
        assert_eq!(plan[5].range(), 1200..1440);
    }

    #[test]
    fn remainder_goes_last() {
        let plan = plan_longitude_chunks(10, 3).unwrap();

        assert_eq!(
            plan.iter().map(|chunk| chunk.range()).collect::<Vec<_>>(),
            vec![0..3, 3..6, 6..10]
        );
    }

    #[test]
    fn more_chunks_than_longitudes() {
        let plan = plan_longitude_chunks(4, 6).unwrap();

        assert!(plan[..5].iter().all(|chunk| chunk.is_empty()));
        assert_eq!(plan[5].range(), 0..4);
    }

    #[test]
    fn zero_chunks() {
        assert!(matches!(
            plan_longitude_chunks(4, 0),
            Err(ComputationError::InvalidChunking { .. })
        ));
    }
}
