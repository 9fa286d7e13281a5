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

//! Sub-module with index windows and the partitioning
//! of the series used for memory-bounded reductions.

use crate::pipeline::configuration::PartitionShape;
use std::{fmt, ops::Range};

/// Length of the series along each axis.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct SeriesShape {
    pub time: usize,
    pub latitude: usize,
    pub longitude: usize,
}

/// Contiguous index ranges selecting a block of the series.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Window {
    pub time: Range<usize>,
    pub latitude: Range<usize>,
    pub longitude: Range<usize>,
}

impl Window {
    pub fn shape(&self) -> (usize, usize, usize) {
        (self.time.len(), self.latitude.len(), self.longitude.len())
    }

    pub fn fits(&self, shape: SeriesShape) -> bool {
        self.time.start <= self.time.end
            && self.latitude.start <= self.latitude.end
            && self.longitude.start <= self.longitude.end
            && self.time.end <= shape.time
            && self.latitude.end <= shape.latitude
            && self.longitude.end <= shape.longitude
    }
}

impl fmt::Display for Window {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[time {}:{}, latitude {}:{}, longitude {}:{}]",
            self.time.start,
            self.time.end,
            self.latitude.start,
            self.latitude.end,
            self.longitude.start,
            self.longitude.end
        )
    }
}

/// Spatial tile of the partition grid, through which
/// the series is streamed block by block along time.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Tile {
    pub latitude: Range<usize>,
    pub longitude: Range<usize>,
    time_len: usize,
    time_step: usize,
}

impl Tile {
    /// Windows of this tile in time order, each
    /// at most one partition long.
    pub fn time_blocks(&self) -> impl Iterator<Item = Window> + '_ {
        split_axis(self.time_len, self.time_step).map(move |time| Window {
            time,
            latitude: self.latitude.clone(),
            longitude: self.longitude.clone(),
        })
    }
}

/// Lists spatial tiles covering the whole series
/// in row-major (latitude, then longitude) order.
pub fn tiles(shape: SeriesShape, partition: PartitionShape) -> Vec<Tile> {
    let mut tiles = vec![];

    for latitude in split_axis(shape.latitude, partition.latitude) {
        for longitude in split_axis(shape.longitude, partition.longitude) {
            tiles.push(Tile {
                latitude: latitude.clone(),
                longitude,
                time_len: shape.time,
                time_step: partition.time,
            });
        }
    }

    tiles
}

/// Splits `0..len` into consecutive ranges of at most `step` items.
fn split_axis(len: usize, step: usize) -> impl Iterator<Item = Range<usize>> {
    let step = step.max(1);

    (0..len)
        .step_by(step)
        .map(move |start| start..(start + step).min(len))
}

#[cfg(test)]
mod tests {
    use super::{tiles, SeriesShape, Window};
    use crate::pipeline::configuration::PartitionShape;

    #[test]
    fn tiles_cover_plane() {
        let shape = SeriesShape {
            time: 10,
            latitude: 5,
            longitude: 7,
        };
        let partition = PartitionShape {
            time: 4,
            latitude: 2,
            longitude: 3,
        };

        let tiles = tiles(shape, partition);
        assert_eq!(tiles.len(), 3 * 3);

        let mut covered = vec![0_u8; 5 * 7];
        for tile in &tiles {
            for i in tile.latitude.clone() {
                for j in tile.longitude.clone() {
                    covered[i * 7 + j] += 1;
                }
            }
        }
        assert!(covered.iter().all(|&c| c == 1));

        let blocks: Vec<Window> = tiles[0].time_blocks().collect();
        assert_eq!(blocks.len(), 3);
        assert_eq!(blocks[0].time, 0..4);
        assert_eq!(blocks[2].time, 8..10);
        assert_eq!(blocks[2].shape(), (2, 2, 3));
    }

    #[test]
    fn window_bounds() {
        let shape = SeriesShape {
            time: 3,
            latitude: 4,
            longitude: 4,
        };

        assert!(Window {
            time: 0..3,
            latitude: 0..4,
            longitude: 2..4
        }
        .fits(shape));

        assert!(!Window {
            time: 0..4,
            latitude: 0..4,
            longitude: 0..4
        }
        .fits(shape));
    }
}
