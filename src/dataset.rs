//! Gold dataset loading and temporal partitioning.
//!
//! Datasets are CSV files with a `date` column, a `target` column and any
//! number of numeric feature columns. Rows are sorted time-ascending on
//! load; splitting is always temporal (no shuffling) so the train partition
//! never sees the future.

use chrono::NaiveDate;
use std::ops::Range;
use std::path::Path;
use tracing::warn;

use crate::error::{RecastError, Result};

const DATE_COLUMN: &str = "date";
const TARGET_COLUMN: &str = "target";

/// An in-memory tabular dataset, rows sorted by date ascending.
#[derive(Debug, Clone)]
pub struct Dataset {
    pub dates: Vec<NaiveDate>,
    pub feature_names: Vec<String>,
    /// Row-major feature matrix, one inner vec per row.
    pub features: Vec<Vec<f64>>,
    pub target: Vec<f64>,
}

impl Dataset {
    /// Load a dataset from CSV and sort it time-ascending.
    ///
    /// Columns listed in `expected_features` but absent from the file are
    /// filled with a neutral 0.0 default and reported, never silently
    /// dropped. This keeps a model trained on a newer schema usable on an
    /// older dataset version.
    pub fn from_csv<P: AsRef<Path>>(path: P, expected_features: &[String]) -> Result<Self> {
        let path = path.as_ref();
        let mut reader = csv::Reader::from_path(path).map_err(|e| {
            RecastError::DataAccess(format!("cannot open {}: {e}", path.display()))
        })?;

        let headers = reader.headers()?.clone();
        let mut date_idx = None;
        let mut target_idx = None;
        let mut feature_cols: Vec<(usize, String)> = Vec::new();
        for (i, name) in headers.iter().enumerate() {
            match name {
                DATE_COLUMN => date_idx = Some(i),
                TARGET_COLUMN => target_idx = Some(i),
                _ => feature_cols.push((i, name.to_string())),
            }
        }
        let date_idx = date_idx.ok_or_else(|| {
            RecastError::DataAccess(format!("{}: missing `date` column", path.display()))
        })?;
        let target_idx = target_idx.ok_or_else(|| {
            RecastError::DataAccess(format!("{}: missing `target` column", path.display()))
        })?;

        let mut dates = Vec::new();
        let mut features = Vec::new();
        let mut target = Vec::new();
        for (row_no, record) in reader.records().enumerate() {
            let record = record?;
            let date_raw = record.get(date_idx).unwrap_or("");
            let date = NaiveDate::parse_from_str(date_raw, "%Y-%m-%d").map_err(|e| {
                RecastError::DataAccess(format!(
                    "{} row {}: bad date {date_raw:?}: {e}",
                    path.display(),
                    row_no + 1
                ))
            })?;
            let y = parse_cell(&record, target_idx, TARGET_COLUMN, path, row_no)?;

            let mut row = Vec::with_capacity(feature_cols.len());
            for (idx, name) in &feature_cols {
                row.push(parse_cell(&record, *idx, name, path, row_no)?);
            }

            dates.push(date);
            features.push(row);
            target.push(y);
        }

        if dates.is_empty() {
            return Err(RecastError::DataAccess(format!(
                "{}: dataset has no rows",
                path.display()
            )));
        }

        let mut feature_names: Vec<String> =
            feature_cols.into_iter().map(|(_, name)| name).collect();

        // Fill expected-but-missing columns with the neutral default.
        for expected in expected_features {
            if !feature_names.contains(expected) {
                warn!(
                    column = %expected,
                    path = %path.display(),
                    "expected feature column missing; filling with 0.0"
                );
                feature_names.push(expected.clone());
                for row in &mut features {
                    row.push(0.0);
                }
            }
        }

        // Stable sort by date preserves intra-day row order from the file.
        let mut order: Vec<usize> = (0..dates.len()).collect();
        order.sort_by_key(|&i| dates[i]);
        let dates = order.iter().map(|&i| dates[i]).collect();
        let features = order.iter().map(|&i| features[i].clone()).collect();
        let target = order.iter().map(|&i| target[i]).collect();

        Ok(Self {
            dates,
            feature_names,
            features,
            target,
        })
    }

    pub fn len(&self) -> usize {
        self.dates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dates.is_empty()
    }

    /// Clone out a contiguous row range as its own dataset.
    pub fn subset(&self, range: Range<usize>) -> Dataset {
        Dataset {
            dates: self.dates[range.clone()].to_vec(),
            feature_names: self.feature_names.clone(),
            features: self.features[range.clone()].to_vec(),
            target: self.target[range].to_vec(),
        }
    }

    /// Deterministic temporal split: the first `floor(n * (1 - test_fraction))`
    /// rows train, the remainder test. Train timestamps never exceed the
    /// minimum test timestamp because rows are date-sorted.
    pub fn temporal_split(&self, test_fraction: f64) -> Result<(Dataset, Dataset)> {
        if !(0.0..1.0).contains(&test_fraction) || test_fraction == 0.0 {
            return Err(RecastError::Validation(format!(
                "test_fraction must be in (0, 1), got {test_fraction}"
            )));
        }
        let n = self.len();
        let train_count = (n as f64 * (1.0 - test_fraction)).floor() as usize;
        if train_count == 0 || train_count == n {
            return Err(RecastError::DataAccess(format!(
                "dataset with {n} rows cannot be split with test_fraction {test_fraction}"
            )));
        }
        Ok((self.subset(0..train_count), self.subset(train_count..n)))
    }
}

fn parse_cell(
    record: &csv::StringRecord,
    idx: usize,
    name: &str,
    path: &Path,
    row_no: usize,
) -> Result<f64> {
    let raw = record.get(idx).unwrap_or("");
    raw.trim().parse::<f64>().map_err(|_| {
        RecastError::DataAccess(format!(
            "{} row {}: column {name:?} is not numeric: {raw:?}",
            path.display(),
            row_no + 1
        ))
    })
}

/// Expanding walk-forward folds over `n` rows.
///
/// Rows are cut into `k + 1` contiguous blocks; fold i trains on blocks
/// `0..=i` and validates on block `i + 1`. The requested fold count is
/// reduced until every block holds at least one row; fewer than one usable
/// fold yields an empty vec (caller skips cross-validation).
pub fn expanding_folds(n: usize, k: usize) -> Vec<(Range<usize>, Range<usize>)> {
    let mut k = k;
    while k >= 1 && n / (k + 1) == 0 {
        k -= 1;
    }
    if k == 0 {
        return Vec::new();
    }

    let block = n / (k + 1);
    // Remainder rows go to the initial training block.
    let first = block + n % (k + 1);
    let mut folds = Vec::with_capacity(k);
    for i in 0..k {
        let train_end = first + i * block;
        let val_end = train_end + block;
        folds.push((0..train_end, train_end..val_end));
    }
    folds
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_csv(contents: &str) -> tempfile::NamedTempFile {
        let mut f = tempfile::Builder::new().suffix(".csv").tempfile().unwrap();
        f.write_all(contents.as_bytes()).unwrap();
        f
    }

    #[test]
    fn loads_and_sorts_by_date() {
        let f = write_csv(
            "date,temp_lag1,temp_lag2,target\n\
             2024-01-03,3.0,2.0,4.0\n\
             2024-01-01,1.0,0.5,2.0\n\
             2024-01-02,2.0,1.0,3.0\n",
        );
        let ds = Dataset::from_csv(f.path(), &[]).unwrap();
        assert_eq!(ds.len(), 3);
        assert_eq!(ds.feature_names, vec!["temp_lag1", "temp_lag2"]);
        assert_eq!(ds.target, vec![2.0, 3.0, 4.0]);
        assert!(ds.dates.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn missing_expected_feature_filled_with_zero() {
        let f = write_csv("date,temp_lag1,target\n2024-01-01,1.0,2.0\n");
        let expected = vec!["temp_lag1".to_string(), "humidity".to_string()];
        let ds = Dataset::from_csv(f.path(), &expected).unwrap();
        assert_eq!(ds.feature_names, vec!["temp_lag1", "humidity"]);
        assert_eq!(ds.features[0], vec![1.0, 0.0]);
    }

    #[test]
    fn missing_target_column_is_data_error() {
        let f = write_csv("date,temp_lag1\n2024-01-01,1.0\n");
        let err = Dataset::from_csv(f.path(), &[]).unwrap_err();
        assert!(matches!(err, RecastError::DataAccess(_)));
    }

    #[test]
    fn non_numeric_cell_is_data_error() {
        let f = write_csv("date,temp_lag1,target\n2024-01-01,abc,2.0\n");
        let err = Dataset::from_csv(f.path(), &[]).unwrap_err();
        assert!(matches!(err, RecastError::DataAccess(_)));
    }

    #[test]
    fn split_is_deterministic_80_20() {
        let rows: String = (0..100)
            .map(|i| format!("2024-{:02}-{:02},{}.0,{}.0\n", i / 28 + 1, i % 28 + 1, i, i))
            .collect();
        let f = write_csv(&format!("date,x,target\n{rows}"));
        let ds = Dataset::from_csv(f.path(), &[]).unwrap();
        let (train, test) = ds.temporal_split(0.2).unwrap();
        assert_eq!(train.len(), 80);
        assert_eq!(test.len(), 20);
        assert!(train.dates.last().unwrap() <= test.dates.first().unwrap());
    }

    #[test]
    fn split_rejects_degenerate_fraction() {
        let f = write_csv("date,x,target\n2024-01-01,1.0,2.0\n2024-01-02,2.0,3.0\n");
        let ds = Dataset::from_csv(f.path(), &[]).unwrap();
        assert!(ds.temporal_split(0.0).is_err());
        assert!(ds.temporal_split(1.0).is_err());
    }

    #[test]
    fn expanding_folds_cover_expected_ranges() {
        let folds = expanding_folds(10, 4);
        assert_eq!(folds.len(), 4);
        // 10 rows, 5 blocks of 2.
        assert_eq!(folds[0], (0..2, 2..4));
        assert_eq!(folds[3], (0..8, 8..10));
        // Every fold trains strictly on the past.
        for (train, val) in &folds {
            assert!(train.end == val.start);
        }
    }

    #[test]
    fn expanding_folds_reduce_for_small_datasets() {
        // 3 rows cannot support 5 folds; reduce instead of crashing.
        let folds = expanding_folds(3, 5);
        assert!(!folds.is_empty());
        assert!(folds.len() <= 2);
        // A single row supports no folds at all.
        assert!(expanding_folds(1, 3).is_empty());
    }
}
