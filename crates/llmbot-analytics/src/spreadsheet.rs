//! Conversion of the analytics log into an XLSX workbook.

use rust_xlsxwriter::{Workbook, XlsxError};
use std::path::Path;

use crate::append_log::LogTable;

/// Name of the single worksheet in exported workbooks.
pub const SHEET_NAME: &str = "analytics";

/// Largest integer an XLSX number cell holds exactly (2^53).
const MAX_EXACT_INTEGER: i64 = 9_007_199_254_740_992;

/// Write `table` to `path` as a workbook: header row, then one row per record.
///
/// Integer cells become numbers so token counts can be summed in the sheet;
/// everything else is written as text.
pub fn write_workbook(table: &LogTable, path: &Path) -> Result<(), XlsxError> {
    let mut workbook = Workbook::new();
    let worksheet = workbook.add_worksheet();
    worksheet.set_name(SHEET_NAME)?;

    for (col, header) in table.headers.iter().enumerate() {
        worksheet.write_string(0, col as u16, header)?;
    }

    for (i, row) in table.rows.iter().enumerate() {
        let row_idx = (i + 1) as u32;
        for (col, cell) in row.iter().enumerate() {
            match integer_cell(cell) {
                Some(n) => {
                    worksheet.write_number(row_idx, col as u16, n)?;
                }
                None => {
                    worksheet.write_string(row_idx, col as u16, cell)?;
                }
            }
        }
    }

    workbook.save(path)?;
    Ok(())
}

fn integer_cell(cell: &str) -> Option<f64> {
    cell.parse::<i64>()
        .ok()
        .filter(|n| n.abs() <= MAX_EXACT_INTEGER)
        .map(|n| n as f64)
}
