use std::io::{Cursor, Read, Seek};
use std::path::Path;

use calamine::{open_workbook_auto, open_workbook_auto_from_rs, Data, Range, Reader, Sheets};
use serde::Serialize;

use crate::format::number_text;

// Fixed cell layout agreed with the spreadsheet producer (zero-based, absolute).
pub const FIRST_ROW: u32 = 4;
pub const LAST_ROW: u32 = 33;
pub const CLASS_COL: u32 = 4; // E
pub const NAME_COL: u32 = 38; // AM
pub const SESSIONS_COL: u32 = 39; // AN
pub const PRICE_COL: u32 = 40; // AO
pub const FEE_COL: u32 = 41; // AP

#[derive(Debug, thiserror::Error)]
pub enum SheetError {
    #[error("failed to open workbook: {0}")]
    Open(#[from] calamine::Error),
    #[error("workbook has no worksheets")]
    NoWorksheet,
}

/// Identity of a student inside one loaded sheet. Assigned at parse time and used as the
/// only key for UI state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct StudentId(pub u32);

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentRecord {
    pub id: StudentId,
    pub sequence_number: u32,
    pub name: String,
    pub class_name: String,
    pub session_count: f64,
    pub price_per_session: f64,
    pub total_fee: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CellValue {
    Empty,
    Text(String),
    Number(f64),
    Bool(bool),
    Error,
}

impl CellValue {
    /// Permissive numeric coercion. Anything that does not resolve to a finite number is 0.
    pub fn to_number(&self) -> f64 {
        let v = match self {
            CellValue::Number(n) => *n,
            CellValue::Bool(b) => {
                if *b {
                    1.0
                } else {
                    0.0
                }
            }
            CellValue::Text(s) => parse_number_text(s),
            CellValue::Empty | CellValue::Error => 0.0,
        };
        if v.is_finite() {
            v
        } else {
            0.0
        }
    }

    /// Text form of the cell. Falsy cells (blank, `0`, `false`) yield an empty string.
    pub fn to_text(&self) -> String {
        match self {
            CellValue::Text(s) => s.clone(),
            CellValue::Number(n) if *n == 0.0 || n.is_nan() => String::new(),
            CellValue::Number(n) => number_text(*n),
            CellValue::Bool(true) => "TRUE".to_string(),
            CellValue::Bool(false) | CellValue::Empty | CellValue::Error => String::new(),
        }
    }
}

impl From<&Data> for CellValue {
    fn from(d: &Data) -> Self {
        match d {
            Data::Empty => CellValue::Empty,
            Data::String(s) => CellValue::Text(s.clone()),
            Data::Float(f) => CellValue::Number(*f),
            Data::Int(i) => CellValue::Number(*i as f64),
            Data::Bool(b) => CellValue::Bool(*b),
            Data::DateTime(dt) => CellValue::Number(dt.as_f64()),
            Data::DateTimeIso(s) | Data::DurationIso(s) => CellValue::Text(s.clone()),
            Data::Error(_) => CellValue::Error,
        }
    }
}

fn parse_number_text(s: &str) -> f64 {
    let t = s.trim();
    if t.is_empty() {
        return 0.0;
    }
    if let Some(hex) = t.strip_prefix("0x").or_else(|| t.strip_prefix("0X")) {
        return u64::from_str_radix(hex, 16)
            .map(|v| v as f64)
            .unwrap_or(0.0);
    }
    // Rust's float grammar also accepts "inf"/"nan"; both are rejected by the finite check.
    t.parse::<f64>().unwrap_or(0.0)
}

/// Random access to cells by absolute zero-based position.
pub trait CellSource {
    fn cell(&self, row: u32, col: u32) -> CellValue;
}

impl CellSource for Range<Data> {
    fn cell(&self, row: u32, col: u32) -> CellValue {
        self.get_value((row, col))
            .map(CellValue::from)
            .unwrap_or(CellValue::Empty)
    }
}

/// Row-major grid; short rows and missing rows read as empty cells.
impl CellSource for Vec<Vec<CellValue>> {
    fn cell(&self, row: u32, col: u32) -> CellValue {
        self.get(row as usize)
            .and_then(|r| r.get(col as usize))
            .cloned()
            .unwrap_or(CellValue::Empty)
    }
}

/// Reads the fixed student window. Rows without a name are skipped and do not consume a
/// sequence number.
pub fn extract_students<S: CellSource + ?Sized>(source: &S) -> Vec<StudentRecord> {
    let mut students = Vec::new();
    let mut next_seq: u32 = 1;

    for row in FIRST_ROW..=LAST_ROW {
        let name = source.cell(row, NAME_COL).to_text();
        let name = name.trim();
        if name.is_empty() {
            continue;
        }

        let seq = next_seq;
        next_seq += 1;
        students.push(StudentRecord {
            id: StudentId(seq),
            sequence_number: seq,
            name: name.to_string(),
            class_name: source.cell(row, CLASS_COL).to_text().trim().to_string(),
            session_count: source.cell(row, SESSIONS_COL).to_number(),
            price_per_session: source.cell(row, PRICE_COL).to_number(),
            total_fee: source.cell(row, FEE_COL).to_number(),
        });
    }

    students
}

#[derive(Debug, Clone)]
pub struct ParsedSheet {
    pub sheet_name: String,
    pub students: Vec<StudentRecord>,
}

pub fn read_workbook_path(path: &Path) -> Result<ParsedSheet, SheetError> {
    let mut wb = open_workbook_auto(path)?;
    read_first_sheet(&mut wb)
}

pub fn read_workbook_bytes(bytes: Vec<u8>) -> Result<ParsedSheet, SheetError> {
    let mut wb = open_workbook_auto_from_rs(Cursor::new(bytes))?;
    read_first_sheet(&mut wb)
}

/// Only the first worksheet is read; the rest of the workbook is ignored.
fn read_first_sheet<RS: Read + Seek>(wb: &mut Sheets<RS>) -> Result<ParsedSheet, SheetError> {
    let Some(sheet_name) = wb.sheet_names().first().cloned() else {
        return Err(SheetError::NoWorksheet);
    };
    let range = wb.worksheet_range(&sheet_name)?;
    Ok(ParsedSheet {
        students: extract_students(&range),
        sheet_name,
    })
}
