// src/models.rs

use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use time::Date;

/// The invoicing party. Doubles as the QR-bill creditor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompanyInfo {
    pub name: String,
    pub street: String,
    pub postal_code: String,
    pub city: String,
    #[serde(default = "default_country")]
    pub country: String,
    pub iban: String,
    /// Name printed below the closing. Falls back to `name`.
    #[serde(default)]
    pub signatory: Option<String>,
}

fn default_country() -> String {
    "CH".to_string()
}

impl CompanyInfo {
    pub fn signatory(&self) -> &str {
        self.signatory.as_deref().unwrap_or(&self.name)
    }

    /// IBAN without the grouping spaces people like to type.
    pub fn compact_iban(&self) -> String {
        self.iban.chars().filter(|c| !c.is_whitespace()).collect()
    }
}

/// A row of the customers sheet.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Customer {
    pub number: String,
    pub company: String,
    pub contact: Option<String>,
    pub street: String,
    pub postal_code: String,
    pub city: String,
    /// Loaded for completeness, never printed.
    pub iban: Option<String>,
    pub email: Option<String>,
}

/// A row of the work-items sheet: billable hours for one customer on one day.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkItem {
    pub customer_number: String,
    pub description: String,
    pub quantity: Decimal,
    pub rate: Decimal,
    pub date: Date,
}

impl WorkItem {
    /// Line total. Derived on every call so it can never drift from its inputs.
    pub fn total(&self) -> Decimal {
        self.quantity * self.rate
    }
}

/// Rounds half away from zero to cents and pins the scale to two places.
pub fn round_cents(value: Decimal) -> Decimal {
    let mut rounded = value.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero);
    rounded.rescale(2);
    rounded
}

/// `2` -> `"2.00"`, `1.005` -> `"1.01"`.
pub fn format_amount(value: Decimal) -> String {
    round_cents(value).to_string()
}

pub fn format_quantity(value: Decimal) -> String {
    format_amount(value)
}

/// `("CHF", 100)` -> `"CHF 100.00"`.
pub fn format_money(currency: &str, value: Decimal) -> String {
    format!("{currency} {}", format_amount(value))
}

/// `YYYYMMDD`, used in invoice numbers and file names.
pub fn compact_date(date: Date) -> String {
    format!(
        "{:04}{:02}{:02}",
        date.year(),
        u8::from(date.month()),
        date.day()
    )
}

/// `dd.mm.yyyy`, the way the date is printed on the invoice.
pub fn display_date(date: Date) -> String {
    format!(
        "{:02}.{:02}.{:04}",
        date.day(),
        u8::from(date.month()),
        date.year()
    )
}
