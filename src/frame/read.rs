use calamine::{open_workbook_auto, Data, DataType as _, Reader};
use chrono::{DurationRound, NaiveDateTime, TimeDelta};
use csv::ReaderBuilder;
use polars::prelude::*;
use std::{collections::BTreeSet, path::Path};
use tracing::debug;

use super::datetime_column;
use crate::error::ReportError;

/// How to locate the header row of a source file and how to type its columns.
#[derive(Debug, Clone, Default)]
pub struct ReadOptions {
    /// Leading rows discarded before the header row (e.g. a title banner).
    pub skip_rows: usize,
    /// Columns kept as text whatever their cells look like (ticket numbers, keys).
    pub text_columns: Vec<String>,
}

impl ReadOptions {
    pub fn with_skip_rows(mut self, rows: usize) -> Self {
        self.skip_rows = rows;
        self
    }

    pub fn with_text_columns<S: AsRef<str>>(mut self, columns: &[S]) -> Self {
        self.text_columns = columns.iter().map(|c| c.as_ref().to_string()).collect();
        self
    }
}

/// One source cell before its column's type is decided.
#[derive(Debug, Clone, PartialEq)]
enum Raw {
    Blank,
    Text(String),
    Number(f64),
    DateTime(NaiveDateTime),
}

impl Raw {
    /// A CSV field: blank, a number, or text. Digit strings that only make sense
    /// as identifiers (leading zero, more digits than an f64 holds) stay text.
    fn from_field(field: &str) -> Self {
        let s = field.trim();
        if s.is_empty() {
            return Raw::Blank;
        }
        if looks_like_identifier(s) {
            return Raw::Text(s.to_string());
        }
        match s.parse::<f64>() {
            Ok(v) if v.is_finite() => Raw::Number(v),
            _ => Raw::Text(s.to_string()),
        }
    }

    /// CSV text as it came from the file; typed later unless kept as text.
    fn field(field: &str) -> Self {
        match field.trim() {
            "" => Raw::Blank,
            s => Raw::Text(s.to_string()),
        }
    }

    fn infer(self) -> Self {
        match self {
            Raw::Text(s) => Raw::from_field(&s),
            other => other,
        }
    }

    fn from_data(d: &Data) -> Self {
        match d {
            Data::Empty | Data::Error(_) => Raw::Blank,
            Data::Int(i) => Raw::Number(*i as f64),
            Data::Float(f) => Raw::Number(*f),
            Data::Bool(b) => Raw::Text(if *b { "TRUE" } else { "FALSE" }.to_string()),
            Data::String(s) if s.trim().is_empty() => Raw::Blank,
            Data::String(s) => Raw::Text(s.trim().to_string()),
            // Serial day fractions are not exact; snap to the second.
            Data::DateTime(_) | Data::DateTimeIso(_) => d
                .as_datetime()
                .map(|dt| Raw::DateTime(dt.duration_round(TimeDelta::seconds(1)).unwrap_or(dt)))
                .unwrap_or_else(|| Raw::Text(d.to_string())),
            Data::DurationIso(s) => Raw::Text(s.clone()),
        }
    }

    fn into_text(self) -> Self {
        match self {
            Raw::Number(v) => Raw::Text(number_text(v)),
            Raw::DateTime(dt) => Raw::Text(dt.format("%Y-%m-%d %H:%M:%S").to_string()),
            other => other,
        }
    }

    fn text(&self) -> Option<String> {
        match self {
            Raw::Blank => None,
            Raw::Text(s) => Some(s.clone()),
            Raw::Number(v) => Some(number_text(*v)),
            Raw::DateTime(dt) => Some(dt.format("%Y-%m-%d %H:%M:%S").to_string()),
        }
    }
}

fn looks_like_identifier(s: &str) -> bool {
    let digits = s.trim_start_matches(|c| c == '+' || c == '-');
    !digits.is_empty()
        && digits.bytes().all(|b| b.is_ascii_digit())
        && (digits.len() > 15 || (digits.len() > 1 && digits.starts_with('0')))
}

/// Whole numbers without a fraction (`12`), everything else as Rust prints it.
pub(crate) fn number_text(v: f64) -> String {
    if v.fract() == 0.0 && v.abs() < 1e15 {
        format!("{:.0}", v)
    } else {
        v.to_string()
    }
}

/// Load a `.csv` or spreadsheet (first worksheet) into a `DataFrame`.
///
/// CSV fields are text until typed; spreadsheet cells keep their stored type.
/// Columns in [`ReadOptions::text_columns`] stay text either way. Any other
/// column becomes `Float64` when every cell is a number (or blank), a millisecond
/// datetime when every cell is a datetime, and text otherwise.
#[tracing::instrument(level = "debug", skip(opts), fields(path = %path.display()))]
pub fn read_frame(path: &Path, opts: &ReadOptions) -> Result<DataFrame, ReportError> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();

    let (grid, infer) = match ext.as_str() {
        "csv" => (read_csv_grid(path)?, true),
        "xlsx" | "xlsm" | "xlsb" | "xls" | "ods" => (read_sheet_grid(path)?, false),
        other => {
            return Err(ReportError::Read {
                path: path.to_path_buf(),
                message: format!("unsupported file type `{}`", other),
            })
        }
    };

    let df = grid_to_frame(path, grid, infer, opts)?;
    debug!(rows = df.height(), cols = df.width(), "loaded source");
    Ok(df)
}

fn read_csv_grid(path: &Path) -> Result<Vec<Vec<Raw>>, ReportError> {
    let read_err = |e: csv::Error| ReportError::Read {
        path: path.to_path_buf(),
        message: e.to_string(),
    };
    let mut rdr = ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_path(path)
        .map_err(read_err)?;

    let mut out = Vec::new();
    for record in rdr.records() {
        let record = record.map_err(read_err)?;
        out.push(record.iter().map(Raw::field).collect());
    }
    Ok(out)
}

fn read_sheet_grid(path: &Path) -> Result<Vec<Vec<Raw>>, ReportError> {
    let read_err = |message: String| ReportError::Read {
        path: path.to_path_buf(),
        message,
    };
    let mut workbook = open_workbook_auto(path).map_err(|e| read_err(e.to_string()))?;
    let range = workbook
        .worksheet_range_at(0)
        .ok_or_else(|| read_err("workbook has no worksheets".into()))?
        .map_err(|e| read_err(e.to_string()))?;

    Ok(range
        .rows()
        .map(|row| row.iter().map(Raw::from_data).collect())
        .collect())
}

fn grid_to_frame(
    path: &Path,
    grid: Vec<Vec<Raw>>,
    infer: bool,
    opts: &ReadOptions,
) -> Result<DataFrame, ReportError> {
    let mut lines = grid.into_iter().skip(opts.skip_rows);
    let names = match lines.next() {
        Some(header) => header_names(&header),
        None => {
            return Err(ReportError::Read {
                path: path.to_path_buf(),
                message: format!("no header row after skipping {} row(s)", opts.skip_rows),
            })
        }
    };

    let mut cells: Vec<Vec<Raw>> = vec![Vec::new(); names.len()];
    for row in lines.filter(|r| r.iter().any(|c| *c != Raw::Blank)) {
        let mut row = row.into_iter();
        for column in cells.iter_mut() {
            column.push(row.next().unwrap_or(Raw::Blank));
        }
    }

    let columns = names
        .iter()
        .zip(cells)
        .map(|(name, values)| {
            let as_text = opts.text_columns.iter().any(|t| t == name);
            let values = if infer && !as_text {
                values.into_iter().map(Raw::infer).collect()
            } else {
                values
            };
            build_column(name, values, as_text)
        })
        .collect::<Result<Vec<Column>, ReportError>>()?;
    Ok(DataFrame::new(columns)?)
}

fn build_column(name: &str, values: Vec<Raw>, as_text: bool) -> Result<Column, ReportError> {
    if as_text {
        let text: Vec<Option<String>> = values.into_iter().map(|v| v.into_text().text()).collect();
        return Ok(Column::new(name.into(), text));
    }
    if values.iter().all(|v| matches!(v, Raw::Blank | Raw::Number(_))) {
        let numbers: Vec<Option<f64>> = values
            .iter()
            .map(|v| match v {
                Raw::Number(x) => Some(*x),
                _ => None,
            })
            .collect();
        return Ok(Column::new(name.into(), numbers));
    }
    if values.iter().all(|v| matches!(v, Raw::Blank | Raw::DateTime(_))) {
        let stamps: Vec<Option<NaiveDateTime>> = values
            .iter()
            .map(|v| match v {
                Raw::DateTime(dt) => Some(*dt),
                _ => None,
            })
            .collect();
        return datetime_column(name, &stamps);
    }
    let text: Vec<Option<String>> = values.iter().map(Raw::text).collect();
    Ok(Column::new(name.into(), text))
}

/// Clean header names: trim, strip a BOM, name blanks `Unnamed: i`, and suffix
/// repeated names with `.1`, `.2`, ...
fn header_names(raw: &[Raw]) -> Vec<String> {
    let mut seen: BTreeSet<String> = BTreeSet::new();
    raw.iter()
        .enumerate()
        .map(|(i, h)| {
            let text = h.text().unwrap_or_default();
            let base = text.trim().trim_start_matches('\u{feff}').trim().to_string();
            let base = if base.is_empty() {
                format!("Unnamed: {}", i)
            } else {
                base
            };
            let mut name = base.clone();
            let mut n = 1;
            while !seen.insert(name.clone()) {
                name = format!("{}.{}", base, n);
                n += 1;
            }
            name
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{column_names, numbers, strings, texts};
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn reads_csv_with_banner_row() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("线路罚款-0520.csv");
        fs::write(
            &path,
            "\u{feff}线路罚款明细,,\n电子车签,线路名称,罚款金额\nT1,北京中心-上海中心,200\nT2,,\n,,\n",
        )
        .unwrap();

        let df = read_frame(&path, &ReadOptions::default().with_skip_rows(1)).unwrap();
        assert_eq!(column_names(&df), vec!["电子车签", "线路名称", "罚款金额"]);
        assert_eq!(df.height(), 2, "blank rows are dropped");
        assert_eq!(strings(&df, "电子车签"), vec!["T1", "T2"]);
        assert_eq!(numbers(&df, "罚款金额").unwrap(), vec![Some(200.0), None]);
        assert_eq!(texts(&df, "线路名称").unwrap()[1], None);
    }

    #[test]
    fn long_digit_ids_and_leading_zeros_stay_text() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("ids.csv");
        fs::write(
            &path,
            "电子车签,网点编码,罚款金额\n2405200012345678901,007,200\n2405200012345678902,010,80\n",
        )
        .unwrap();

        let df = read_frame(&path, &ReadOptions::default()).unwrap();
        assert_eq!(
            strings(&df, "电子车签"),
            vec!["2405200012345678901", "2405200012345678902"]
        );
        assert_eq!(strings(&df, "网点编码"), vec!["007", "010"]);
        assert_eq!(df.column("罚款金额").unwrap().dtype(), &DataType::Float64);
    }

    #[test]
    fn text_columns_are_never_numeric() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("tickets.csv");
        fs::write(&path, "车签,未达成量\n1200,150\n1300,20\n").unwrap();

        let opts = ReadOptions::default().with_text_columns(&["车签"]);
        let df = read_frame(&path, &opts).unwrap();
        assert_eq!(df.column("车签").unwrap().dtype(), &DataType::String);
        assert_eq!(strings(&df, "车签"), vec!["1200", "1300"]);
        assert_eq!(df.column("未达成量").unwrap().dtype(), &DataType::Float64);
    }

    #[test]
    fn header_names_are_deduplicated() {
        let raw: Vec<Raw> = ["a", "", "a", " a "].iter().map(|s| Raw::from_field(s)).collect();
        assert_eq!(header_names(&raw), vec!["a", "Unnamed: 1", "a.1", "a.2"]);
    }

    #[test]
    fn short_rows_are_padded() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("short.csv");
        fs::write(&path, "a,b,c\n1\n").unwrap();
        let df = read_frame(&path, &ReadOptions::default()).unwrap();
        assert_eq!(numbers(&df, "a").unwrap(), vec![Some(1.0)]);
        assert_eq!(numbers(&df, "c").unwrap(), vec![None]);
    }

    #[test]
    fn unknown_extension_is_read_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("notes.txt");
        fs::write(&path, "x").unwrap();
        let err = read_frame(&path, &ReadOptions::default()).unwrap_err();
        assert!(matches!(err, ReportError::Read { .. }));
    }

    #[test]
    fn missing_file_is_read_error() {
        let err = read_frame(Path::new("/nonexistent/城市对应中心.xlsx"), &ReadOptions::default())
            .unwrap_err();
        assert!(matches!(err, ReportError::Read { .. }));
    }
}
