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

//! Scenario tests running the whole pipeline on small
//! synthetic series written as NetCDF files.

use crate::errors::{ConversionError, DataAccessError, ExportError, PipelineError};
use crate::pipeline::{
    configuration::Config,
    output::{read_grids, RasterConverter},
    run,
    series::{GriddedTimeSeries, MemorySeries, TimeSeriesSource},
    statistics::{compute_days_above, compute_days_above_p95, compute_p95, DerivedGrid, Statistic},
};
use float_cmp::approx_eq;
use ndarray::{s, Array2, Array3};
use rayon::{ThreadPool, ThreadPoolBuilder};
use std::{
    cell::RefCell,
    fs,
    path::{Path, PathBuf},
};

/// Records requested conversions, failing on one variable.
struct RecordingConverter {
    failing: Option<&'static str>,
    calls: RefCell<Vec<String>>,
}

impl RecordingConverter {
    fn new(failing: Option<&'static str>) -> Self {
        RecordingConverter {
            failing,
            calls: RefCell::new(vec![]),
        }
    }
}

impl RasterConverter for RecordingConverter {
    fn convert(&self, _: &Path, variable: &str, _: &Path) -> Result<(), ConversionError> {
        self.calls.borrow_mut().push(variable.to_string());

        if self.failing == Some(variable) {
            return Err(ConversionError::Spawn {
                program: "recording".to_string(),
                source: std::io::Error::new(std::io::ErrorKind::Other, "conversion failed"),
            });
        }

        Ok(())
    }
}

fn threadpool() -> ThreadPool {
    ThreadPoolBuilder::new().num_threads(2).build().unwrap()
}

/// Writes a daily series with steps `first_day..` in days since 2000-01-01.
fn write_series(path: &Path, first_day: f64, data: &Array3<f32>) {
    let (nt, nlat, nlon) = data.dim();
    let mut file = netcdf::create(path).unwrap();

    file.add_dimension("time", nt).unwrap();
    file.add_dimension("latitude", nlat).unwrap();
    file.add_dimension("longitude", nlon).unwrap();

    {
        let mut time = file.add_variable::<f64>("time", &["time"]).unwrap();
        time.put_attribute("units", "days since 2000-01-01 00:00:00")
            .unwrap();
        time.put_attribute("calendar", "standard").unwrap();
        let values: Vec<f64> = (0..nt).map(|t| first_day + t as f64).collect();
        time.put_values(&values, ..).unwrap();
    }

    {
        let mut latitude = file.add_variable::<f64>("latitude", &["latitude"]).unwrap();
        let values: Vec<f64> = (0..nlat).map(|i| 10.0 - i as f64 * 0.25).collect();
        latitude.put_values(&values, ..).unwrap();
    }

    {
        let mut longitude = file
            .add_variable::<f64>("longitude", &["longitude"])
            .unwrap();
        let values: Vec<f64> = (0..nlon).map(|j| j as f64 * 0.25).collect();
        longitude.put_values(&values, ..).unwrap();
    }

    {
        let mut wbgtmax = file
            .add_variable::<f32>("wbgtmax", &["time", "latitude", "longitude"])
            .unwrap();
        wbgtmax.set_fill_value(-32767.0_f32).unwrap();
        let values: Vec<f32> = data
            .iter()
            .map(|v| if v.is_nan() { -32767.0 } else { *v })
            .collect();
        wbgtmax.put_values(&values, ..).unwrap();
    }
}

/// 3 days on a 4x4 grid, all at 30 degC except cell (1, 2)
/// which drops to 26 degC on the second day.
fn reference_scenario() -> Array3<f32> {
    let mut data = Array3::from_elem((3, 4, 4), 30.0);
    data[[1, 1, 2]] = 26.0;

    data
}

fn config_yaml(dir: &Path, extra: &str) -> Config {
    let yaml = format!(
        r#"
input:
  files: "{dir}/wbgtmax_*.nc"
  partition: {{ time: 2, latitude: 3, longitude: 3 }}
statistics:
  longitude_chunks: 3
output:
  file: "{dir}/wbgt_annual_metrics.nc"
  temp_dir: "{dir}/temp_wbgt_processing"
  geotiff:
    directory: "{dir}"
{extra}
"#,
        dir = dir.display(),
        extra = extra
    );

    Config::new_from_slice(yaml.as_bytes()).unwrap()
}

fn grid<'a>(grids: &'a [DerivedGrid], statistic: Statistic) -> &'a Array2<f64> {
    &grids
        .iter()
        .find(|grid| grid.statistic == statistic)
        .unwrap()
        .values
}

fn assert_everywhere(values: &Array2<f64>, expected: f64, special: f64) {
    for ((i, j), value) in values.indexed_iter() {
        let expected = if (i, j) == (1, 2) { special } else { expected };
        assert!(
            approx_eq!(f64, *value, expected, epsilon = 1e-4),
            "cell ({}, {}): {} != {}",
            i,
            j,
            value,
            expected
        );
    }
}

#[test]
fn reference_scenario_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    write_series(&dir.path().join("wbgtmax_2000_daily.nc"), 0.0, &reference_scenario());

    let config = config_yaml(dir.path(), "");
    let converter = RecordingConverter::new(None);

    run(&config, &threadpool(), &converter).unwrap();

    let grids = read_grids(&config.output.file).unwrap();
    assert_eq!(grids.len(), 6);

    assert_everywhere(grid(&grids, Statistic::AnnualMean), 30.0, 86.0 / 3.0);
    assert_everywhere(grid(&grids, Statistic::P95), 30.0, 30.0);
    assert_everywhere(grid(&grids, Statistic::DaysAboveP95), 3.0, 2.0);
    assert_everywhere(grid(&grids, Statistic::DaysAbove27C), 3.0, 2.0);
    assert_everywhere(grid(&grids, Statistic::DaysAbove29C), 3.0, 2.0);
    assert_everywhere(grid(&grids, Statistic::DaysAbove31C), 0.0, 0.0);

    for grid in &grids {
        assert_eq!(grid.values.dim(), (4, 4));
        assert_eq!(grid.coordinates.latitude_name, "latitude");
        assert!(approx_eq!(f64, grid.coordinates.longitudes[3], 0.75));
    }

    assert!(!config.output.temp_dir.exists());
    assert_eq!(converter.calls.borrow().len(), 6);
}

#[test]
fn files_concatenated_along_time() {
    let single_dir = tempfile::tempdir().unwrap();
    let split_dir = tempfile::tempdir().unwrap();

    // two years with missing samples
    let data = Array3::from_shape_fn((8, 3, 5), |(t, i, j)| {
        if (t + 2 * i + j) % 7 == 0 {
            f32::NAN
        } else {
            24.0 + ((t * 5 + i * 3 + j) % 11) as f32
        }
    });

    write_series(&single_dir.path().join("wbgtmax_all.nc"), 362.0, &data);
    write_series(
        &split_dir.path().join("wbgtmax_2000.nc"),
        362.0,
        &data.slice(s![..4, .., ..]).to_owned(),
    );
    write_series(
        &split_dir.path().join("wbgtmax_2001.nc"),
        366.0,
        &data.slice(s![4.., .., ..]).to_owned(),
    );

    let converter = RecordingConverter::new(None);
    let single = config_yaml(single_dir.path(), "");
    let split = config_yaml(split_dir.path(), "");

    run(&single, &threadpool(), &converter).unwrap();
    run(&split, &threadpool(), &converter).unwrap();

    let single = read_grids(&single.output.file).unwrap();
    let split = read_grids(&split.output.file).unwrap();

    for (a, b) in single.iter().zip(split.iter()) {
        assert_eq!(a.statistic, b.statistic);
        for (x, y) in a.values.iter().zip(b.values.iter()) {
            assert!(x.is_nan() && y.is_nan() || x == y);
        }
    }
}

#[test]
fn non_monotonic_files_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let data = Array3::from_elem((3, 2, 2), 28.0_f32);

    write_series(&dir.path().join("wbgtmax_a.nc"), 10.0, &data);
    write_series(&dir.path().join("wbgtmax_b.nc"), 11.0, &data);

    let config = config_yaml(dir.path(), "");

    assert!(GriddedTimeSeries::open(&config.input).is_err());
    assert!(matches!(
        run(&config, &threadpool(), &RecordingConverter::new(None)),
        Err(PipelineError::DataAccess(_))
    ));
}

#[test]
fn unmatched_pattern_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_yaml(dir.path(), "");

    assert!(matches!(
        GriddedTimeSeries::open(&config.input),
        Err(DataAccessError::NoFiles(_))
    ));
}

#[test]
fn file_without_variable_rejected() {
    let dir = tempfile::tempdir().unwrap();
    write_series(&dir.path().join("wbgtmax_2000.nc"), 0.0, &reference_scenario());

    let mut config = config_yaml(dir.path(), "");
    config.input.variable = "tasmax".to_string();

    match GriddedTimeSeries::open(&config.input) {
        Err(DataAccessError::MissingVariable { variable, .. }) => assert_eq!(variable, "tasmax"),
        other => panic!("unexpected result: {:?}", other.map(|_| ())),
    }
}

#[test]
fn mismatched_longitudes_rejected() {
    let dir = tempfile::tempdir().unwrap();
    write_series(&dir.path().join("wbgtmax_2000.nc"), 0.0, &reference_scenario());
    write_series(
        &dir.path().join("wbgtmax_2001.nc"),
        3.0,
        &Array3::from_elem((3, 4, 3), 28.0),
    );

    let config = config_yaml(dir.path(), "");

    match GriddedTimeSeries::open(&config.input) {
        Err(DataAccessError::MismatchedAxis { axis, path }) => {
            assert_eq!(axis, "longitude");
            assert!(path.ends_with("wbgtmax_2001.nc"));
        }
        other => panic!("unexpected result: {:?}", other.map(|_| ())),
    }
}

#[test]
fn shifted_longitudes_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let second = dir.path().join("wbgtmax_2001.nc");
    write_series(&dir.path().join("wbgtmax_2000.nc"), 0.0, &reference_scenario());
    write_series(&second, 3.0, &reference_scenario());

    // same length, shifted by half a cell
    {
        let mut file = netcdf::append(&second).unwrap();
        let mut longitude = file.variable_mut("longitude").unwrap();
        longitude
            .put_values(&[0.125_f64, 0.375, 0.625, 0.875], ..)
            .unwrap();
    }

    let config = config_yaml(dir.path(), "");

    assert!(matches!(
        GriddedTimeSeries::open(&config.input),
        Err(DataAccessError::MismatchedAxis { .. })
    ));
}

#[test]
fn missing_cells_written_as_fill() {
    let dir = tempfile::tempdir().unwrap();
    let mut data = reference_scenario();
    data.slice_mut(s![.., 0, 0]).fill(f32::NAN);

    write_series(&dir.path().join("wbgtmax_2000_daily.nc"), 0.0, &data);

    let config = config_yaml(dir.path(), "");
    run(&config, &threadpool(), &RecordingConverter::new(None)).unwrap();

    let file = netcdf::open(&config.output.file).unwrap();
    for statistic in Statistic::ALL {
        let raw = file
            .variable(statistic.name())
            .unwrap()
            .get_values::<f32, _>(..)
            .unwrap();

        assert_eq!(raw[0], -9999.0, "{}", statistic);
        assert!(raw[1..].iter().all(|&v| v != -9999.0 && !v.is_nan()));
    }
    drop(file);

    let grids = read_grids(&config.output.file).unwrap();
    for grid in &grids {
        assert!(grid.values[[0, 0]].is_nan());
    }
}

#[test]
fn failed_conversion_is_isolated() {
    let dir = tempfile::tempdir().unwrap();
    write_series(&dir.path().join("wbgtmax_2000_daily.nc"), 0.0, &reference_scenario());

    let config = config_yaml(dir.path(), "");
    let converter = RecordingConverter::new(Some("days_above_29C"));

    run(&config, &threadpool(), &converter).unwrap();

    assert_eq!(converter.calls.borrow().len(), 6);
    assert_eq!(read_grids(&config.output.file).unwrap().len(), 6);
}

#[test]
fn failed_write_keeps_intermediates() {
    let dir = tempfile::tempdir().unwrap();
    write_series(&dir.path().join("wbgtmax_2000_daily.nc"), 0.0, &reference_scenario());

    let mut config = config_yaml(dir.path(), "");
    let target = config.output.file.clone();
    config.output.file = dir.path().join("missing_dir").join("out.nc");

    let result = run(&config, &threadpool(), &RecordingConverter::new(None));

    assert!(matches!(
        result,
        Err(PipelineError::Export(ExportError::NetCdf { .. }))
    ));
    assert!(config.output.temp_dir.exists());

    config.output.file = target;
    config.output.assembly_only = true;
    fs::remove_file(dir.path().join("wbgtmax_2000_daily.nc")).unwrap();

    run(&config, &threadpool(), &RecordingConverter::new(None)).unwrap();

    let grids = read_grids(&config.output.file).unwrap();
    assert_everywhere(grid(&grids, Statistic::DaysAboveP95), 3.0, 2.0);
    assert!(!config.output.temp_dir.exists());
}

#[test]
fn threshold_counts_do_not_depend_on_order() {
    let data = Array3::from_shape_fn((30, 4, 6), |(t, i, j)| {
        if (t * 3 + i + j) % 13 == 0 {
            f32::NAN
        } else {
            25.0 + ((t * 7 + i * 5 + j * 3) % 17) as f32 * 0.5
        }
    });
    let years = (0..30).map(|t| 1990 + t as i32 / 10).collect();
    let series = MemorySeries::new(data, years);
    let partition = crate::pipeline::configuration::PartitionShape {
        time: 7,
        latitude: 3,
        longitude: 4,
    };
    let pool = threadpool();

    let p95 = compute_p95(&series, 4, &pool).unwrap();

    let compute = |statistic: Statistic| match statistic {
        Statistic::DaysAboveP95 => compute_days_above_p95(&series, &p95, partition).unwrap(),
        other => compute_days_above(&series, other, partition).unwrap(),
    };

    let forward: Vec<DerivedGrid> = [
        Statistic::DaysAboveP95,
        Statistic::DaysAbove27C,
        Statistic::DaysAbove29C,
        Statistic::DaysAbove31C,
    ]
    .into_iter()
    .map(compute)
    .collect();

    let mut backward: Vec<DerivedGrid> = [
        Statistic::DaysAbove31C,
        Statistic::DaysAbove29C,
        Statistic::DaysAbove27C,
        Statistic::DaysAboveP95,
    ]
    .into_iter()
    .map(compute)
    .collect();
    backward.reverse();

    assert_eq!(forward, backward);
    assert_eq!(series.distinct_years(), vec![1990, 1991, 1992]);
}

#[test]
fn biome_summary_written() {
    let dir = tempfile::tempdir().unwrap();
    write_series(&dir.path().join("wbgtmax_2000_daily.nc"), 0.0, &reference_scenario());

    let biome_path: PathBuf = dir.path().join("biomes.nc");
    {
        let mut file = netcdf::create(&biome_path).unwrap();
        file.add_dimension("latitude", 4).unwrap();
        file.add_dimension("longitude", 4).unwrap();

        let latitudes: Vec<f64> = (0..4).map(|i| 10.0 - i as f64 * 0.25).collect();
        let longitudes: Vec<f64> = (0..4).map(|j| j as f64 * 0.25).collect();

        file.add_variable::<f64>("latitude", &["latitude"])
            .unwrap()
            .put_values(&latitudes, ..)
            .unwrap();
        file.add_variable::<f64>("longitude", &["longitude"])
            .unwrap()
            .put_values(&longitudes, ..)
            .unwrap();

        // left half tundra, right half deserts, one unassigned cell
        let mut ids: Vec<i32> = (0..16).map(|k| if k % 4 < 2 { 15 } else { 2 }).collect();
        ids[0] = -1;

        let mut biome = file
            .add_variable::<i32>("BIOME_ID", &["latitude", "longitude"])
            .unwrap();
        biome.set_fill_value(-1_i32).unwrap();
        biome.put_values(&ids, ..).unwrap();
    }

    let extra = format!(
        "biomes:\n  file: \"{}\"\n  summary: \"{}\"\n",
        biome_path.display(),
        dir.path().join("summary.csv").display()
    );
    let config = config_yaml(dir.path(), &extra);

    run(&config, &threadpool(), &RecordingConverter::new(None)).unwrap();

    let mut reader = csv::Reader::from_path(dir.path().join("summary.csv")).unwrap();
    let rows: Vec<csv::StringRecord> = reader.records().map(|r| r.unwrap()).collect();

    // two biomes times six metrics
    assert_eq!(rows.len(), 12);

    let deserts_days_27 = rows
        .iter()
        .find(|row| &row[0] == "2" && &row[2] == "days_above_27C")
        .unwrap();
    assert_eq!(&deserts_days_27[3], "8");
    assert_eq!(deserts_days_27[5].parse::<f32>().unwrap(), 2.0);
    assert_eq!(deserts_days_27[6].parse::<f32>().unwrap(), 3.0);

    let tundra_mean = rows
        .iter()
        .find(|row| &row[0] == "15" && &row[2] == "wbgtmax_annual_mean")
        .unwrap();
    assert_eq!(&tundra_mean[3], "7");
}
