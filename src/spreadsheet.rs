//! Recipient lists in spreadsheets.
//!
//! Numbers are read from column A of the first worksheet. The downloadable
//! template has a `Phone Number | Name` header and one example row.

use std::io::Cursor;

use calamine::{open_workbook_auto_from_rs, Data, Reader};
use rust_xlsxwriter::{Format, Workbook, XlsxError};
use thiserror::Error;

use crate::jid;

pub const TEMPLATE_FILE_NAME: &str = "recipients-template.xlsx";
pub const XLSX_CONTENT_TYPE: &str =
    "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet";

const EXAMPLE_NUMBER: &str = "15551234567";

#[derive(Debug, Error)]
pub enum SpreadsheetError {
    #[error("unreadable workbook: {0}")]
    Open(String),
    #[error("workbook has no worksheets")]
    NoWorksheet,
    #[error("failed to build template: {0}")]
    Template(#[from] XlsxError),
}

/// Phone numbers from column A of the first worksheet, top to bottom.
///
/// A first row that does not look like a phone number is treated as a header.
/// Blank cells are skipped. Numbers stored as floats lose their `.0`.
pub fn read_numbers(bytes: Vec<u8>) -> Result<Vec<String>, SpreadsheetError> {
    let mut workbook = open_workbook_auto_from_rs(Cursor::new(bytes))
        .map_err(|e| SpreadsheetError::Open(e.to_string()))?;
    let range = workbook
        .worksheet_range_at(0)
        .ok_or(SpreadsheetError::NoWorksheet)?
        .map_err(|e| SpreadsheetError::Open(e.to_string()))?;

    let mut numbers = Vec::new();
    for (row_index, row) in range.rows().enumerate() {
        let Some(value) = row.first().and_then(cell_text) else {
            continue;
        };
        if row_index == 0 && !jid::is_phone_like(&value) {
            continue;
        }
        numbers.push(value);
    }
    Ok(numbers)
}

fn cell_text(cell: &Data) -> Option<String> {
    match cell {
        Data::String(s) => {
            let s = s.trim();
            (!s.is_empty()).then(|| s.to_string())
        }
        Data::Int(i) => Some(i.to_string()),
        Data::Float(f) if f.fract() == 0.0 => Some(format!("{f:.0}")),
        Data::Float(f) => Some(f.to_string()),
        _ => None,
    }
}

/// The blank recipients workbook offered for download.
pub fn template() -> Result<Vec<u8>, SpreadsheetError> {
    let mut workbook = Workbook::new();
    let header = Format::new().set_bold();

    let sheet = workbook.add_worksheet();
    sheet.set_name("Recipients")?;
    sheet.write_string_with_format(0, 0, "Phone Number", &header)?;
    sheet.write_string_with_format(0, 1, "Name", &header)?;
    sheet.write_string(1, 0, EXAMPLE_NUMBER)?;
    sheet.write_string(1, 1, "Example Contact")?;
    sheet.set_column_width(0, 20)?;
    sheet.set_column_width(1, 24)?;

    Ok(workbook.save_to_buffer()?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn workbook(rows: &[&[CellValue]]) -> Vec<u8> {
        let mut workbook = Workbook::new();
        let sheet = workbook.add_worksheet();
        for (r, row) in rows.iter().enumerate() {
            for (c, cell) in row.iter().enumerate() {
                let (r, c) = (r as u32, c as u16);
                match cell {
                    CellValue::Text(s) => sheet.write_string(r, c, *s).map(|_| ()),
                    CellValue::Number(n) => sheet.write_number(r, c, *n).map(|_| ()),
                    CellValue::Blank => Ok(()),
                }
                .unwrap();
            }
        }
        workbook.save_to_buffer().unwrap()
    }

    enum CellValue {
        Text(&'static str),
        Number(f64),
        Blank,
    }
    use CellValue::{Blank, Number, Text};

    #[test]
    fn template_reads_back_as_the_example_number() {
        let bytes = template().unwrap();
        assert_eq!(read_numbers(bytes).unwrap(), [EXAMPLE_NUMBER]);
    }

    #[test]
    fn numeric_cells_drop_the_fraction() {
        let bytes = workbook(&[
            &[Number(15_551_234_567.0)],
            &[Blank],
            &[Text(" +44 7700 900123 ")],
            &[Number(447_700_900_124.0), Text("Bob")],
        ]);
        assert_eq!(
            read_numbers(bytes).unwrap(),
            ["15551234567", "+44 7700 900123", "447700900124"]
        );
    }

    #[test]
    fn only_the_first_row_can_be_a_header() {
        let bytes = workbook(&[&[Text("Numbers")], &[Text("15551234567")], &[Text("call me")]]);
        assert_eq!(read_numbers(bytes).unwrap(), ["15551234567", "call me"]);
    }

    #[test]
    fn garbage_is_not_a_workbook() {
        assert!(matches!(
            read_numbers(b"definitely not a spreadsheet".to_vec()),
            Err(SpreadsheetError::Open(_))
        ));
    }
}
