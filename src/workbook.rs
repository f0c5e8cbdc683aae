// src/workbook.rs

use crate::config::SheetNames;
use crate::error::Error;
use crate::models::{Customer, WorkItem};
use calamine::{Data, ExcelDateTime, Range, Reader, Sheets, open_workbook_auto};
use chrono::Datelike;
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::HashSet;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::str::FromStr;
use time::{Date, Month};
use tracing::{debug, info};

/// A spreadsheet cell reduced to what the loader cares about.
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Empty,
    Text(String),
    Number(f64),
    Date(Date),
    /// Booleans, durations, error values.
    Other(String),
}

impl Cell {
    /// Trimmed textual form, `None` for blank cells.
    pub fn text(&self) -> Option<String> {
        let s = match self {
            Cell::Empty => return None,
            Cell::Text(s) | Cell::Other(s) => s.trim().to_string(),
            Cell::Number(n) => number_to_string(*n),
            Cell::Date(d) => d.to_string(),
        };
        (!s.is_empty()).then_some(s)
    }

    pub fn is_blank(&self) -> bool {
        self.text().is_none()
    }
}

/// Whole numbers lose their fraction so `1001.0` keys match `"1001"`.
fn number_to_string(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        n.to_string()
    }
}

impl From<&Data> for Cell {
    fn from(data: &Data) -> Self {
        match data {
            Data::Empty => Cell::Empty,
            Data::String(s) => Cell::Text(s.clone()),
            Data::Int(i) => Cell::Number(*i as f64),
            Data::Float(f) => Cell::Number(*f),
            Data::DateTime(dt) if dt.is_datetime() => excel_date(dt)
                .map(Cell::Date)
                .unwrap_or_else(|| Cell::Other(dt.as_f64().to_string())),
            Data::DateTimeIso(s) => iso_to_date(s)
                .map(Cell::Date)
                .unwrap_or_else(|| Cell::Other(s.clone())),
            other => Cell::Other(other.to_string()),
        }
    }
}

/// Calendar date of a date-formatted cell. calamine knows whether the
/// workbook uses the 1900 or the 1904 date system; time-only cells and
/// out-of-range serials yield `None`.
pub fn excel_date(dt: &ExcelDateTime) -> Option<Date> {
    let serial = dt.as_f64();
    if !serial.is_finite() || serial < 1.0 {
        return None;
    }
    let day = dt.as_datetime()?.date();
    let month = Month::try_from(u8::try_from(day.month()).ok()?).ok()?;
    Date::from_calendar_date(day.year(), month, u8::try_from(day.day()).ok()?).ok()
}

/// Accepts `YYYY-MM-DD` with or without a trailing `THH:MM:SS`.
fn iso_to_date(s: &str) -> Option<Date> {
    let format = time::macros::format_description!("[year]-[month]-[day]");
    let day_part = s.get(..10)?;
    Date::parse(day_part, &format).ok()
}

/// One row, addressed by its absolute 1-based spreadsheet row number.
#[derive(Debug, Clone, PartialEq)]
pub struct SheetRow {
    pub number: u32,
    pub cells: Vec<Cell>,
}

impl SheetRow {
    pub fn new(number: u32, cells: Vec<Cell>) -> Self {
        Self { number, cells }
    }

    pub fn cell(&self, column: usize) -> &Cell {
        self.cells.get(column).unwrap_or(&Cell::Empty)
    }
}

/// Anything that can hand out the rows of a named sheet.
pub trait RowSource {
    fn rows(&mut self, sheet: &str) -> Result<Vec<SheetRow>, Error>;
}

/// An xlsx/xlsm/xls/ods file read through calamine.
pub struct Workbook {
    sheets: Sheets<BufReader<File>>,
}

impl Workbook {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, Error> {
        let path = path.as_ref();
        info!(path = %path.display(), "Opening workbook");
        Ok(Self {
            sheets: open_workbook_auto(path)?,
        })
    }
}

impl RowSource for Workbook {
    fn rows(&mut self, sheet: &str) -> Result<Vec<SheetRow>, Error> {
        if !self.sheets.sheet_names().iter().any(|name| name == sheet) {
            return Err(Error::MissingSheet(sheet.to_string()));
        }
        let range = self.sheets.worksheet_range(sheet)?;
        Ok(range_rows(&range))
    }
}

/// calamine ranges start at the first used cell, not at A1. Re-anchor them
/// so column indices and row numbers are absolute.
fn range_rows(range: &Range<Data>) -> Vec<SheetRow> {
    let Some((first_row, first_col)) = range.start() else {
        return Vec::new();
    };
    range
        .rows()
        .enumerate()
        .map(|(i, row)| {
            let mut cells = vec![Cell::Empty; first_col as usize];
            cells.extend(row.iter().map(Cell::from));
            SheetRow::new(first_row + i as u32 + 1, cells)
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Row validation
// ---------------------------------------------------------------------------

/// Why a row did not make it into the loaded data.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SkipReason {
    MissingField { field: &'static str },
    InvalidNumber { field: &'static str, value: String },
    NotPositive { field: &'static str },
    NotADate,
    DuplicateCustomer { number: String },
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SkipReason::MissingField { field } => write!(f, "missing {field}"),
            SkipReason::InvalidNumber { field, value } => {
                write!(f, "{field} `{value}` is not a number")
            }
            SkipReason::NotPositive { field } => write!(f, "{field} is not positive"),
            SkipReason::NotADate => write!(f, "date cell does not hold a date"),
            SkipReason::DuplicateCustomer { number } => {
                write!(f, "customer {number} already defined")
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SkippedRow {
    pub sheet: String,
    pub row: u32,
    pub reason: SkipReason,
}

/// Everything read from the workbook.
#[derive(Debug, Default)]
pub struct Loaded {
    pub customers: Vec<Customer>,
    pub work_items: Vec<WorkItem>,
    pub skipped: Vec<SkippedRow>,
}

const CUSTOMER_REQUIRED: [(usize, &str); 4] =
    [(0, "number"), (1, "company"), (2, "contact"), (3, "address")];

const WORK_ITEM_REQUIRED: [(usize, &str); 4] = [
    (0, "customer number"),
    (1, "description"),
    (2, "quantity"),
    (3, "rate"),
];

const WORK_ITEM_DATE_COLUMN: usize = 5;

/// Reads both sheets. Dirty rows are skipped and reported, never fatal.
pub fn load(source: &mut impl RowSource, sheets: &SheetNames) -> Result<Loaded, Error> {
    let mut loaded = Loaded::default();

    let customer_rows = source.rows(&sheets.customers)?;
    let mut seen = HashSet::new();
    for row in data_rows(&customer_rows) {
        let outcome = parse_customer(row).and_then(|customer| {
            if seen.insert(customer.number.clone()) {
                Ok(customer)
            } else {
                Err(SkipReason::DuplicateCustomer {
                    number: customer.number,
                })
            }
        });
        match outcome {
            Ok(customer) => loaded.customers.push(customer),
            Err(reason) => loaded.skip(&sheets.customers, row.number, reason),
        }
    }

    let item_rows = source.rows(&sheets.work_items)?;
    for row in data_rows(&item_rows) {
        match parse_work_item(row) {
            Ok(item) => loaded.work_items.push(item),
            Err(reason) => loaded.skip(&sheets.work_items, row.number, reason),
        }
    }

    info!(
        customers = loaded.customers.len(),
        work_items = loaded.work_items.len(),
        skipped = loaded.skipped.len(),
        "Workbook loaded"
    );
    Ok(loaded)
}

impl Loaded {
    fn skip(&mut self, sheet: &str, row: u32, reason: SkipReason) {
        debug!(sheet = %sheet, row, reason = %reason, "Skipping row");
        self.skipped.push(SkippedRow {
            sheet: sheet.to_string(),
            row,
            reason,
        });
    }
}

/// Row 1 is the header; fully blank rows are formatting leftovers, not data.
fn data_rows(rows: &[SheetRow]) -> impl Iterator<Item = &SheetRow> {
    rows.iter()
        .filter(|row| row.number > 1)
        .filter(|row| row.cells.iter().any(|c| !c.is_blank()))
}

fn required(row: &SheetRow, fields: &[(usize, &'static str)]) -> Result<(), SkipReason> {
    match fields.iter().find(|(column, _)| row.cell(*column).is_blank()) {
        Some(&(_, field)) => Err(SkipReason::MissingField { field }),
        None => Ok(()),
    }
}

fn optional_text(row: &SheetRow, column: usize) -> Option<String> {
    row.cell(column).text()
}

fn parse_customer(row: &SheetRow) -> Result<Customer, SkipReason> {
    required(row, &CUSTOMER_REQUIRED)?;
    let text = |column| optional_text(row, column).unwrap_or_default();

    Ok(Customer {
        number: text(0),
        company: text(1),
        contact: optional_text(row, 2),
        street: text(3),
        postal_code: text(4),
        city: text(5),
        iban: optional_text(row, 6),
        email: optional_text(row, 7),
    })
}

fn parse_work_item(row: &SheetRow) -> Result<WorkItem, SkipReason> {
    required(row, &WORK_ITEM_REQUIRED)?;

    let quantity = parse_positive(row.cell(2), "quantity")?;
    let rate = parse_positive(row.cell(3), "rate")?;
    let Cell::Date(date) = row.cell(WORK_ITEM_DATE_COLUMN) else {
        return Err(SkipReason::NotADate);
    };

    Ok(WorkItem {
        customer_number: optional_text(row, 0).unwrap_or_default(),
        description: optional_text(row, 1).unwrap_or_default(),
        quantity,
        rate,
        date: *date,
    })
}

/// Numbers go through their string form, so text cells like `"2.5"` work too.
fn parse_positive(cell: &Cell, field: &'static str) -> Result<Decimal, SkipReason> {
    let raw = cell.text().ok_or(SkipReason::MissingField { field })?;
    let value = Decimal::from_str(&raw)
        .or_else(|_| Decimal::from_scientific(&raw))
        .map_err(|_| SkipReason::InvalidNumber {
            field,
            value: raw.clone(),
        })?;
    if value <= Decimal::ZERO {
        return Err(SkipReason::NotPositive { field });
    }
    Ok(value)
}
