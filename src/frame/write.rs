use calamine::{open_workbook_auto, Reader};
use polars::prelude::*;
use rust_xlsxwriter::{Format, Workbook, Worksheet, XlsxError};
use std::path::Path;
use tracing::info;

use super::{datetime_values, is_number};
use crate::error::ReportError;

/// Write each `(sheet name, frame)` pair as one worksheet, in order, with a header row.
#[tracing::instrument(level = "info", skip(sheets), fields(path = %path.display()))]
pub fn write_workbook(path: &Path, sheets: &[(&str, &DataFrame)]) -> Result<(), ReportError> {
    let write_err = |e: XlsxError| ReportError::Write {
        path: path.to_path_buf(),
        message: e.to_string(),
    };

    let mut workbook = Workbook::new();
    let header = Format::new().set_bold();
    let datetime = Format::new().set_num_format("yyyy-mm-dd hh:mm:ss");

    for (name, df) in sheets {
        let sheet = workbook.add_worksheet();
        sheet.set_name(*name).map_err(write_err)?;
        write_sheet(sheet, df, &header, &datetime).map_err(|e| ReportError::Write {
            path: path.to_path_buf(),
            message: format!("sheet `{}`: {}", name, e),
        })?;
        info!(sheet = *name, rows = df.height(), "sheet written");
    }

    workbook.save(path).map_err(write_err)
}

/// Column by column; nulls leave the cell blank.
fn write_sheet(
    sheet: &mut Worksheet,
    df: &DataFrame,
    header: &Format,
    datetime: &Format,
) -> anyhow::Result<()> {
    for (c, column) in df.get_columns().iter().enumerate() {
        let c = u16::try_from(c)?;
        sheet.write_string_with_format(0, c, column.name().as_str(), header)?;

        match column.dtype() {
            DataType::Datetime(_, _) => {
                for (r, v) in datetime_values(column)?.iter().enumerate() {
                    if let Some(dt) = v {
                        sheet.write_datetime_with_format(row(r)?, c, dt, datetime)?;
                    }
                }
            }
            DataType::Boolean => {
                for (r, v) in column.bool()?.into_iter().enumerate() {
                    if let Some(b) = v {
                        sheet.write_boolean(row(r)?, c, b)?;
                    }
                }
            }
            dtype if is_number(dtype) => {
                let values = column.cast(&DataType::Float64)?;
                for (r, v) in values.f64()?.into_iter().enumerate() {
                    if let Some(x) = v {
                        sheet.write_number(row(r)?, c, x)?;
                    }
                }
            }
            _ => {
                let values = column.cast(&DataType::String)?;
                for (r, v) in values.str()?.into_iter().enumerate() {
                    if let Some(s) = v {
                        sheet.write_string(row(r)?, c, s)?;
                    }
                }
            }
        }
    }
    Ok(())
}

/// Worksheet row of data row `r`, below the header.
fn row(r: usize) -> anyhow::Result<u32> {
    Ok(u32::try_from(r + 1)?)
}

/// Header row of worksheet `sheet` in an existing workbook.
pub fn read_sheet_headers(path: &Path, sheet: &str) -> Result<Vec<String>, ReportError> {
    let read_err = |message: String| ReportError::Read {
        path: path.to_path_buf(),
        message,
    };
    let mut workbook = open_workbook_auto(path).map_err(|e| read_err(e.to_string()))?;
    let range = workbook
        .worksheet_range(sheet)
        .map_err(|e| read_err(format!("sheet `{}`: {}", sheet, e)))?;
    Ok(range
        .rows()
        .next()
        .map(|row| row.iter().map(|d| d.to_string()).collect())
        .unwrap_or_default())
}

/// Worksheet names of an existing workbook, in file order.
pub fn sheet_names(path: &Path) -> Result<Vec<String>, ReportError> {
    let workbook = open_workbook_auto(path).map_err(|e| ReportError::Read {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;
    Ok(workbook.sheet_names().to_vec())
}
