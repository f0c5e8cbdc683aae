// src/aggregate.rs

use crate::models::{Customer, WorkItem, compact_date};
use rust_decimal::Decimal;
use std::collections::BTreeSet;
use time::Date;

/// The work items of one customer on one billing date, plus their sum.
#[derive(Debug, Clone, PartialEq)]
pub struct Selection<'a> {
    pub line_items: Vec<&'a WorkItem>,
    pub total: Decimal,
}

/// Picks the items billed to `customer_number` on `billing_date`.
///
/// `None` means there is nothing to invoice, which callers treat as a skip.
/// The total is left unrounded; rounding belongs to display.
pub fn select_line_items<'a>(
    items: &'a [WorkItem],
    customer_number: &str,
    billing_date: Date,
) -> Option<Selection<'a>> {
    let line_items: Vec<&WorkItem> = items
        .iter()
        .filter(|item| item.customer_number == customer_number && item.date == billing_date)
        .collect();

    if line_items.is_empty() {
        return None;
    }

    let total = line_items.iter().map(|item| item.total()).sum();
    Some(Selection { line_items, total })
}

/// Every billing date present in the work items, oldest first.
pub fn distinct_dates(items: &[WorkItem]) -> BTreeSet<Date> {
    items.iter().map(|item| item.date).collect()
}

/// `{customer}-{YYYYMMDD}`.
pub fn invoice_number(customer_number: &str, billing_date: Date) -> String {
    format!("{customer_number}-{}", compact_date(billing_date))
}

/// `Invoice_{customer}-{YYYYMMDD}.pdf`. Path separators and other characters
/// that are not portable in file names become `_`, so a customer key can
/// never leave the output directory.
pub fn invoice_file_name(customer_number: &str, billing_date: Date) -> String {
    let number: String = invoice_number(customer_number, billing_date)
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();
    format!("Invoice_{number}.pdf")
}

/// A renderable invoice. Only exists when it has at least one line item.
#[derive(Debug, Clone)]
pub struct Invoice<'a> {
    pub customer: &'a Customer,
    pub billing_date: Date,
    pub line_items: Vec<&'a WorkItem>,
    pub total: Decimal,
}

impl<'a> Invoice<'a> {
    pub fn build(customer: &'a Customer, items: &'a [WorkItem], billing_date: Date) -> Option<Self> {
        let Selection { line_items, total } =
            select_line_items(items, &customer.number, billing_date)?;
        Some(Self {
            customer,
            billing_date,
            line_items,
            total,
        })
    }

    pub fn number(&self) -> String {
        invoice_number(&self.customer.number, self.billing_date)
    }
}
