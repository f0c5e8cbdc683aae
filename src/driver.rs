// src/driver.rs

use crate::aggregate::{distinct_dates, invoice_file_name};
use crate::config::Config;
use crate::error::Error;
use crate::models::{compact_date, display_date};
use crate::pdfgen::{InvoiceRenderer, RenderedInvoice};
use crate::workbook::{Loaded, SkippedRow};
use serde::Serialize;
use std::fs;
use time::Date;
use tracing::{error, info, warn};

/// Which billing dates to invoice.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DateSelection {
    /// Every date that appears in the work items.
    All,
    Only(Date),
}

#[derive(Debug, Serialize)]
pub struct GeneratedInvoice {
    pub customer: String,
    pub date: String,
    #[serde(flatten)]
    pub invoice: RenderedInvoice,
}

#[derive(Debug, Serialize)]
pub struct FailedInvoice {
    pub customer: String,
    pub date: String,
    pub error: String,
}

#[derive(Debug, Default, Serialize)]
pub struct RunReport {
    pub generated: Vec<GeneratedInvoice>,
    /// (customer, date) pairs that had no line items.
    pub empty_pairs: usize,
    pub failures: Vec<FailedInvoice>,
    pub skipped_rows: Vec<SkippedRow>,
}

impl RunReport {
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Renders one invoice per (date, customer) pair that has line items.
///
/// A failing invoice is recorded and the batch moves on; only problems with
/// the output directory abort the run.
pub fn run(config: &Config, loaded: &Loaded, selection: DateSelection) -> Result<RunReport, Error> {
    fs::create_dir_all(&config.output_dir)?;

    let dates: Vec<Date> = match selection {
        DateSelection::All => distinct_dates(&loaded.work_items).into_iter().collect(),
        DateSelection::Only(date) => vec![date],
    };
    info!(
        dates = dates.len(),
        customers = loaded.customers.len(),
        output_dir = %config.output_dir.display(),
        "Generating invoices"
    );

    let renderer = InvoiceRenderer::new(config);
    let mut report = RunReport {
        skipped_rows: loaded.skipped.clone(),
        ..RunReport::default()
    };

    for &date in &dates {
        for customer in &loaded.customers {
            let output = config
                .output_dir
                .join(invoice_file_name(&customer.number, date));

            match renderer.render(customer, &loaded.work_items, date, &output) {
                Ok(Some(invoice)) => {
                    if invoice.degraded {
                        warn!(invoice = %invoice.number, "Invoice written without payment slip");
                    }
                    report.generated.push(GeneratedInvoice {
                        customer: customer.number.clone(),
                        date: compact_date(date),
                        invoice,
                    });
                }
                Ok(None) => report.empty_pairs += 1,
                Err(e) => {
                    error!(
                        customer = %customer.number,
                        date = %display_date(date),
                        error = %e,
                        "Invoice failed"
                    );
                    report.failures.push(FailedInvoice {
                        customer: customer.number.clone(),
                        date: compact_date(date),
                        error: e.to_string(),
                    });
                }
            }
        }
    }

    info!(
        generated = report.generated.len(),
        empty = report.empty_pairs,
        failed = report.failures.len(),
        skipped_rows = report.skipped_rows.len(),
        "Run finished"
    );
    Ok(report)
}
