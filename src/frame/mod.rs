// src/frame/mod.rs
//! DataFrame operations the stages share, on top of `polars`.
//!
//! Every function takes its input by reference and returns a new frame. Missing
//! columns always surface as [`ReportError::Schema`] with both column sets.

pub mod read;
pub mod write;

pub use read::{read_frame, ReadOptions};
pub use write::{read_sheet_headers, sheet_names, write_workbook};

use chrono::{DateTime, NaiveDateTime};
use polars::functions::concat_df_diagonal;
use polars::prelude::*;
use std::collections::{BTreeMap, BTreeSet};

use crate::error::ReportError;

const LEFT_ROW: &str = "__left_row";
const RIGHT_ROW: &str = "__right_row";

fn datetime_type() -> DataType {
    DataType::Datetime(TimeUnit::Milliseconds, None)
}

pub fn column_names(df: &DataFrame) -> Vec<String> {
    df.get_column_names().iter().map(|c| c.to_string()).collect()
}

fn is_number(dtype: &DataType) -> bool {
    dtype.is_float() || dtype.is_integer()
}

fn missing_columns<S: AsRef<str>>(df: &DataFrame, names: &[S], context: &str) -> ReportError {
    let actual = column_names(df);
    ReportError::Schema {
        context: context.to_string(),
        missing: names
            .iter()
            .map(|n| n.as_ref())
            .filter(|n| !actual.iter().any(|a| a == n))
            .map(str::to_string)
            .collect(),
        actual,
        expected: names.iter().map(|n| n.as_ref().to_string()).collect(),
    }
}

/// Fail with a schema error unless every one of `names` is present.
pub fn require<S: AsRef<str>>(df: &DataFrame, names: &[S], context: &str) -> Result<(), ReportError> {
    let actual = column_names(df);
    if names.iter().all(|n| actual.iter().any(|a| a == n.as_ref())) {
        Ok(())
    } else {
        Err(missing_columns(df, names, context))
    }
}

/// Project to `names` in the given order. Never returns a partial frame.
pub fn select<S: AsRef<str>>(
    df: &DataFrame,
    names: &[S],
    context: &str,
) -> Result<DataFrame, ReportError> {
    df.select(names.iter().map(|n| n.as_ref()))
        .map_err(|e| match e {
            PolarsError::ColumnNotFound(_) => missing_columns(df, names, context),
            other => other.into(),
        })
}

/// Rename columns present in `renames`; absent source names are ignored.
pub fn rename(df: &DataFrame, renames: &BTreeMap<String, String>) -> Result<DataFrame, ReportError> {
    let present = column_names(df);
    let mut out = df.clone();
    for (from, to) in renames.iter().filter(|(from, _)| present.contains(from)) {
        out.rename(from, to.as_str().into())?;
    }
    // polars 0.46 `DataFrame::rename` leaves the cached schema stale.
    out.clear_schema();
    Ok(out)
}

/// Text form of a key column. Whole numbers drop their fraction (`12`, not
/// `12.0`); nulls stay null.
pub fn key_column(column: &Column) -> Result<Column, ReportError> {
    let name = column.name().clone();
    match column.dtype() {
        DataType::String => Ok(column.clone()),
        dtype if is_number(dtype) => {
            let values: Vec<Option<String>> = column
                .cast(&DataType::Float64)?
                .f64()?
                .into_iter()
                .map(|v| v.map(read::number_text))
                .collect();
            Ok(Column::new(name, values))
        }
        _ => Ok(column.cast(&DataType::String)?),
    }
}

/// Values of `column` as text, top to bottom.
pub fn texts(df: &DataFrame, column: &str) -> Result<Vec<Option<String>>, ReportError> {
    require(df, &[column], "column lookup")?;
    let keys = key_column(df.column(column)?)?;
    Ok(keys.str()?.into_iter().map(|v| v.map(str::to_string)).collect())
}

/// Values of `column` as numbers; text that is not a number reads as null.
pub fn numbers(df: &DataFrame, column: &str) -> Result<Vec<Option<f64>>, ReportError> {
    require(df, &[column], "column lookup")?;
    Ok(df
        .column(column)?
        .cast(&DataType::Float64)?
        .f64()?
        .into_iter()
        .collect())
}

/// Values of a datetime column.
pub fn datetime_values(column: &Column) -> Result<Vec<Option<NaiveDateTime>>, ReportError> {
    Ok(column
        .cast(&datetime_type())?
        .cast(&DataType::Int64)?
        .i64()?
        .into_iter()
        .map(|ms| ms.and_then(DateTime::from_timestamp_millis).map(|d| d.naive_utc()))
        .collect())
}

/// Millisecond datetime column named `name`.
pub fn datetime_column(
    name: &str,
    values: &[Option<NaiveDateTime>],
) -> Result<Column, ReportError> {
    let millis: Vec<Option<i64>> = values
        .iter()
        .map(|v| v.map(|dt| dt.and_utc().timestamp_millis()))
        .collect();
    Ok(Series::new(name.into(), millis).cast(&datetime_type())?.into())
}

/// Distinct non-null keys of `column`.
pub fn key_set(df: &DataFrame, column: &str) -> Result<BTreeSet<String>, ReportError> {
    Ok(texts(df, column)?.into_iter().flatten().collect())
}

/// Keep rows whose `column` key is in `keys`.
pub fn filter_in(
    df: &DataFrame,
    column: &str,
    keys: &BTreeSet<String>,
) -> Result<DataFrame, ReportError> {
    require(df, &[column], "row filter")?;
    let keys = Series::new(
        "keys".into(),
        keys.iter().map(String::as_str).collect::<Vec<_>>(),
    );
    Ok(df
        .clone()
        .lazy()
        .filter(col(column).cast(DataType::String).is_in(lit(keys)))
        .collect()?)
}

/// Keep rows whose `column` text equals `value`.
pub fn filter_eq(df: &DataFrame, column: &str, value: &str) -> Result<DataFrame, ReportError> {
    require(df, &[column], "row filter")?;
    Ok(df
        .clone()
        .lazy()
        .filter(col(column).cast(DataType::String).eq(lit(value)))
        .collect()?)
}

/// Keep rows whose `column` value is strictly greater than `floor`.
pub fn filter_above(df: &DataFrame, column: &str, floor: f64) -> Result<DataFrame, ReportError> {
    require(df, &[column], "row filter")?;
    Ok(df
        .clone()
        .lazy()
        .filter(col(column).cast(DataType::Float64).gt(lit(floor)))
        .collect()?)
}

/// Left join on `left_on` = `right_on`.
///
/// Left rows keep their order, each repeated once per matching right row in
/// right-hand order; unmatched rows get nulls. The right key is dropped and other
/// clashing right-hand names get a `_right` suffix. Keys of different types are
/// compared as text.
pub fn left_join(
    left: &DataFrame,
    right: &DataFrame,
    left_on: &str,
    right_on: &str,
) -> Result<DataFrame, ReportError> {
    require(left, &[left_on], "left join (left key)")?;
    require(right, &[right_on], "left join (right key)")?;

    let (mut left, mut right) = (left.clone(), right.clone());
    if left.column(left_on)?.dtype() != right.column(right_on)?.dtype() {
        let l = key_column(left.column(left_on)?)?;
        left.with_column(l)?;
        let r = key_column(right.column(right_on)?)?;
        right.with_column(r)?;
    }

    let joined = left
        .lazy()
        .with_row_index(LEFT_ROW, None)
        .join(
            right.lazy().with_row_index(RIGHT_ROW, None),
            [col(left_on)],
            [col(right_on)],
            JoinArgs::new(JoinType::Left),
        )
        .sort(
            [LEFT_ROW, RIGHT_ROW],
            SortMultipleOptions::default().with_nulls_last(true),
        )
        .collect()?;
    Ok(joined.drop(LEFT_ROW)?.drop(RIGHT_ROW)?)
}

/// Sum `value` per distinct `key`, sorted by key. Null keys are dropped and
/// non-numeric values contribute nothing.
pub fn group_sum(df: &DataFrame, key: &str, value: &str) -> Result<DataFrame, ReportError> {
    require(df, &[key, value], "group sum")?;
    Ok(df
        .clone()
        .lazy()
        .filter(col(key).is_not_null())
        .group_by([col(key)])
        .agg([col(value).cast(DataType::Float64).sum()])
        .sort([key], SortMultipleOptions::default())
        .collect()?)
}

/// Stable sort by one column, nulls last.
pub fn sort_by(df: &DataFrame, column: &str) -> Result<DataFrame, ReportError> {
    require(df, &[column], "sort")?;
    Ok(df.sort(
        [column],
        SortMultipleOptions::default()
            .with_maintain_order(true)
            .with_nulls_last(true),
    )?)
}

/// Move `name` to `index` (clamped to the last position), keeping the others in order.
pub fn place_column(df: &DataFrame, name: &str, index: usize) -> Result<DataFrame, ReportError> {
    require(df, &[name], "column placement")?;
    let mut order: Vec<String> = column_names(df).into_iter().filter(|c| c != name).collect();
    order.insert(index.min(order.len()), name.to_string());
    select(df, &order, "column placement")
}

/// Add (or overwrite) a text column holding `value` on every row.
pub fn with_constant(df: &DataFrame, name: &str, value: &str) -> Result<DataFrame, ReportError> {
    let mut out = df.clone();
    out.with_column(Column::new(name.into(), vec![value; df.height()]))?;
    Ok(out)
}

/// Stack frames top to bottom. Columns are the union in order of first
/// appearance; cells missing on either side are null.
pub fn stack(frames: &[DataFrame]) -> Result<DataFrame, ReportError> {
    // An all-null column carries whatever type its reader guessed; give it the
    // type the same column has where it holds values.
    let mut typed: BTreeMap<String, DataType> = BTreeMap::new();
    for df in frames {
        for c in df.get_columns() {
            if c.null_count() < c.len() {
                typed
                    .entry(c.name().to_string())
                    .or_insert_with(|| c.dtype().clone());
            }
        }
    }
    let aligned = frames
        .iter()
        .map(|df| {
            let mut out = df.clone();
            for c in df.get_columns() {
                match typed.get(c.name().as_str()) {
                    Some(dtype) if c.null_count() == c.len() && c.dtype() != dtype => {
                        out.with_column(c.cast(dtype)?)?;
                    }
                    _ => {}
                }
            }
            Ok(out)
        })
        .collect::<Result<Vec<_>, ReportError>>()?;
    Ok(concat_df_diagonal(&aligned)?)
}

/// Append one row given as (column, value) pairs; unnamed columns stay null.
pub fn append_row(df: &DataFrame, cells: &[(&str, AnyValue<'_>)]) -> Result<DataFrame, ReportError> {
    let names: Vec<&str> = cells.iter().map(|(n, _)| *n).collect();
    require(df, &names, "row append")?;
    let columns = cells
        .iter()
        .map(|(name, value)| {
            let dtype = df.column(name)?.dtype().clone();
            let series =
                Series::from_any_values((*name).into(), std::slice::from_ref(value), false)?;
            Ok(series.cast(&dtype)?.into())
        })
        .collect::<Result<Vec<Column>, ReportError>>()?;
    stack(&[df.clone(), DataFrame::new(columns)?])
}

/// Sum of the numeric values of `column`.
pub fn sum(df: &DataFrame, column: &str) -> Result<f64, ReportError> {
    Ok(numbers(df, column)?.into_iter().flatten().sum())
}

/// Text values of `column` with nulls as empty strings.
#[cfg(test)]
pub(crate) fn strings(df: &DataFrame, column: &str) -> Vec<String> {
    texts(df, column)
        .unwrap()
        .into_iter()
        .map(Option::unwrap_or_default)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use polars::df;

    #[test]
    fn select_missing_column_is_schema_error() {
        let frame = df!("a" => [1.0], "b" => [2.0]).unwrap();
        let err = select(&frame, &["a", "c", "d"], "projection").unwrap_err();
        match err {
            ReportError::Schema {
                missing,
                actual,
                expected,
                ..
            } => {
                assert_eq!(missing, vec!["c", "d"]);
                assert_eq!(actual, vec!["a", "b"]);
                assert_eq!(expected, vec!["a", "c", "d"]);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn left_join_keeps_unmatched_and_repeats_matches() {
        let left = df!(
            "route" => [Some("A"), Some("B"), None],
            "v" => [1.0, 2.0, 3.0]
        )
        .unwrap();
        let right = df!("route" => ["A", "A"], "w" => [10.0, 11.0]).unwrap();
        let out = left_join(&left, &right, "route", "route").unwrap();
        assert_eq!(column_names(&out), vec!["route", "v", "w"]);
        assert_eq!(strings(&out, "route"), vec!["A", "A", "B", ""]);
        assert_eq!(numbers(&out, "v").unwrap(), vec![Some(1.0), Some(1.0), Some(2.0), Some(3.0)]);
        assert_eq!(numbers(&out, "w").unwrap(), vec![Some(10.0), Some(11.0), None, None]);
    }

    #[test]
    fn left_join_suffixes_clashing_right_columns() {
        let left = df!("车签" => ["T1"], "x" => [1.0]).unwrap();
        let right = df!("电子车签" => ["T1"], "x" => [5.0]).unwrap();
        let out = left_join(&left, &right, "车签", "电子车签").unwrap();
        assert_eq!(numbers(&out, "x").unwrap(), vec![Some(1.0)]);
        assert_eq!(numbers(&out, "x_right").unwrap(), vec![Some(5.0)]);
    }

    #[test]
    fn left_join_matches_numeric_and_text_keys() {
        let left = df!("id" => ["12", "13"]).unwrap();
        let right = df!("id" => [12.0], "fine" => [80.0]).unwrap();
        let out = left_join(&left, &right, "id", "id").unwrap();
        assert_eq!(numbers(&out, "fine").unwrap(), vec![Some(80.0), None]);
    }

    #[test]
    fn group_sum_sorts_and_drops_null_keys() {
        let frame = df!(
            "center" => [Some("b"), Some("a"), Some("b"), None, Some("a")],
            "qty" => [Some(3.0), Some(2.0), Some(4.0), Some(100.0), None]
        )
        .unwrap();
        let out = group_sum(&frame, "center", "qty").unwrap();
        assert_eq!(strings(&out, "center"), vec!["a", "b"]);
        assert_eq!(numbers(&out, "qty").unwrap(), vec![Some(2.0), Some(7.0)]);
    }

    #[test]
    fn sort_is_stable() {
        let frame = df!("k" => ["b", "a", "b", "a"], "i" => [0.0, 1.0, 2.0, 3.0]).unwrap();
        let out = sort_by(&frame, "k").unwrap();
        assert_eq!(
            numbers(&out, "i").unwrap(),
            vec![Some(1.0), Some(3.0), Some(0.0), Some(2.0)]
        );
    }

    #[test]
    fn place_column_moves_without_reordering_others() {
        let frame = df!("a" => [1.0], "b" => [1.0], "c" => [1.0], "d" => [1.0]).unwrap();
        let moved = place_column(&frame, "d", 1).unwrap();
        assert_eq!(column_names(&moved), vec!["a", "d", "b", "c"]);
        let last = place_column(&frame, "a", 9).unwrap();
        assert_eq!(column_names(&last), vec!["b", "c", "d", "a"]);
    }

    #[test]
    fn stack_unions_columns() {
        let top = df!("a" => [1.0], "b" => [2.0]).unwrap();
        let bottom = df!("b" => [3.0], "c" => [4.0]).unwrap();
        let out = stack(&[top, bottom]).unwrap();
        assert_eq!(column_names(&out), vec!["a", "b", "c"]);
        assert_eq!(numbers(&out, "a").unwrap(), vec![Some(1.0), None]);
        assert_eq!(numbers(&out, "c").unwrap(), vec![None, Some(4.0)]);
    }

    #[test]
    fn append_row_fills_unnamed_cells_with_null() {
        let frame = df!("kind" => ["x"], "qty" => [1.0], "note" => ["y"]).unwrap();
        let out = append_row(
            &frame,
            &[("kind", AnyValue::String("total")), ("qty", AnyValue::Float64(1.0))],
        )
        .unwrap();
        assert_eq!(out.height(), 2);
        assert_eq!(strings(&out, "kind"), vec!["x", "total"]);
        assert_eq!(strings(&out, "note"), vec!["y", ""]);
        assert!(append_row(&frame, &[("nope", AnyValue::Float64(0.0))]).is_err());
    }

    #[test]
    fn whole_number_keys_read_without_fraction() {
        let frame = df!("k" => [Some(12.0), Some(1.5), None]).unwrap();
        assert_eq!(
            texts(&frame, "k").unwrap(),
            vec![Some("12".to_string()), Some("1.5".to_string()), None]
        );
    }

    #[test]
    fn filters_by_key_set_text_and_floor() {
        let frame = df!(
            "route" => ["A", "B", "C"],
            "flag" => ["是", "否", "是"],
            "qty" => [Some(150.0), Some(400.0), None]
        )
        .unwrap();
        let keys = BTreeSet::from(["A".to_string(), "B".to_string()]);
        assert_eq!(strings(&filter_in(&frame, "route", &keys).unwrap(), "route"), vec!["A", "B"]);
        assert_eq!(strings(&filter_eq(&frame, "flag", "是").unwrap(), "route"), vec!["A", "C"]);
        assert_eq!(strings(&filter_above(&frame, "qty", 150.0).unwrap(), "route"), vec!["B"]);
    }
}
