// src/pdfgen/mod.rs

//! Two-page invoice PDF: the letter with the itemised table, then the
//! Swiss QR payment slip as an embedded bitmap.

mod layout;

use crate::aggregate::Invoice;
use crate::config::Config;
use crate::error::Error;
use crate::models::{CompanyInfo, Customer, WorkItem, display_date, format_money, format_quantity};
use crate::qrbill::{Address, QrBill};
use crate::raster::{self, RasterImage, Scratch};
use layout::{
    Align, CONTENT_WIDTH, HEADING1, HEADING2, MARGIN, NORMAL, NORMAL_BOLD, PdfBuilder,
    SMALL_GRAY, TextStyle, wrap,
};
use rust_decimal::Decimal;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use time::Date;
use tracing::{debug, info, warn};

const SIGNATURE_WIDTH: f32 = 100.0;
const SIGNATURE_HEIGHT: f32 = 50.0;
/// The slip is 210×105 mm, so it keeps a 2:1 aspect ratio.
const SLIP_HEIGHT: f32 = CONTENT_WIDTH / 2.0;

/// Column widths of the line-item table.
const COLUMNS: [f32; 5] = [30.0, 200.0, 60.0, 70.0, 70.0];
const DESCRIPTION_COLUMN: usize = 1;
const CELL_PAD_X: f32 = 6.0;
const CELL_PAD_Y: f32 = 3.0;
const TABLE_RULE: f32 = 1.0;

#[derive(Debug, Clone, Serialize)]
pub struct RenderedInvoice {
    pub path: PathBuf,
    pub number: String,
    pub total: Decimal,
    pub line_items: usize,
    /// The payment slip could not be rasterised; page 2 is blank.
    pub degraded: bool,
}

/// Turns the slip SVG at the first path into a PNG at the second.
type Rasteriser = fn(&Path, &Path, u32) -> Result<(), Error>;

pub struct InvoiceRenderer<'a> {
    company: &'a CompanyInfo,
    currency: &'a str,
    payment_term_days: u32,
    signature: Option<&'a Path>,
    slip_dpi: u32,
    rasterise: Rasteriser,
}

impl<'a> InvoiceRenderer<'a> {
    pub fn new(config: &'a Config) -> Self {
        Self {
            company: &config.company,
            currency: &config.currency,
            payment_term_days: config.payment_term_days,
            signature: config.signature.as_deref(),
            slip_dpi: config.slip_dpi,
            rasterise: raster::svg_to_png,
        }
    }

    #[cfg(test)]
    fn with_rasteriser(mut self, rasterise: Rasteriser) -> Self {
        self.rasterise = rasterise;
        self
    }

    /// Renders the invoice for `customer` on `billing_date` into `output`.
    ///
    /// `work_items` is the full list; matching happens here. Returns
    /// `Ok(None)` without touching the filesystem when nothing matches.
    pub fn render(
        &self,
        customer: &Customer,
        work_items: &[WorkItem],
        billing_date: Date,
        output: &Path,
    ) -> Result<Option<RenderedInvoice>, Error> {
        let Some(invoice) = Invoice::build(customer, work_items, billing_date) else {
            debug!(
                customer = %customer.number,
                date = %display_date(billing_date),
                "No line items, nothing to render"
            );
            return Ok(None);
        };
        let number = invoice.number();

        // Validate the slip before spending time on layout.
        let bill = QrBill::new(
            &self.company.iban,
            Address::from(self.company),
            Some(Address::from(customer)),
            Some(invoice.total),
            self.currency,
            Some(format!("Rechnung {number}")),
        )?;

        let mut pdf = PdfBuilder::new();
        self.write_letter(&mut pdf, &invoice);

        pdf.new_page();
        let slip = self.rasterise_slip(&bill, output)?;
        let degraded = slip.is_none();
        if let Some(image) = &slip {
            pdf.image(image, MARGIN, CONTENT_WIDTH, SLIP_HEIGHT);
        }

        let bytes = pdf.finish(&format!("Rechnung {number}"))?;
        fs::write(output, bytes)?;

        info!(
            invoice = %number,
            items = invoice.line_items.len(),
            total = %invoice.total,
            path = %output.display(),
            degraded,
            "Invoice written"
        );
        Ok(Some(RenderedInvoice {
            path: output.to_path_buf(),
            number,
            total: invoice.total,
            line_items: invoice.line_items.len(),
            degraded,
        }))
    }

    fn write_letter(&self, pdf: &mut PdfBuilder, invoice: &Invoice<'_>) {
        let company = self.company;
        let customer = invoice.customer;

        pdf.paragraph(
            &SMALL_GRAY,
            &format!(
                "{} · {} · {} {}",
                company.name, company.street, company.postal_code, company.city
            ),
        );
        pdf.spacer(20.0);

        pdf.paragraph(&NORMAL, &customer.company);
        if let Some(contact) = &customer.contact {
            pdf.paragraph(&NORMAL, contact);
        }
        pdf.paragraph(&NORMAL, &customer.street);
        pdf.paragraph(
            &NORMAL,
            &format!("{} {}", customer.postal_code, customer.city),
        );
        pdf.spacer(40.0);

        pdf.paragraph(
            &NORMAL,
            &format!("Datum: {}", display_date(invoice.billing_date)),
        );
        pdf.spacer(20.0);

        pdf.paragraph(&HEADING1, &format!("RECHNUNG Nr. {}", invoice.number()));
        pdf.spacer(20.0);

        let salutation = match &customer.contact {
            Some(contact) => format!("Guten Tag {contact},"),
            None => "Guten Tag,".to_string(),
        };
        pdf.paragraph(&NORMAL, &salutation);
        pdf.spacer(10.0);
        pdf.paragraph(
            &NORMAL,
            "Vielen Dank für den Auftrag. Ich erlaube mir, folgende Leistungen in Rechnung zu stellen.",
        );
        pdf.spacer(20.0);

        self.write_table(pdf, invoice);
        pdf.spacer(40.0);

        pdf.paragraph(&HEADING2, "Zahlungsbedingungen:");
        pdf.spacer(10.0);
        pdf.paragraph(&NORMAL, &payment_terms(self.payment_term_days));
        pdf.spacer(40.0);

        pdf.paragraph(&NORMAL, "Freundliche Grüsse");
        pdf.spacer(20.0);
        if let Some(signature) = self.load_signature() {
            pdf.image(&signature, MARGIN, SIGNATURE_WIDTH, SIGNATURE_HEIGHT);
        }
        pdf.spacer(20.0);
        pdf.paragraph(&NORMAL, company.signatory());
    }

    fn write_table(&self, pdf: &mut PdfBuilder, invoice: &Invoice<'_>) {
        let header = ["Pos.", "Bezeichnung", "Menge", "Preis/Std", "Total"].map(String::from);
        let header_style = [NORMAL_BOLD; 5];

        table_row(pdf, &header, &header_style, true);

        for (index, item) in invoice.line_items.iter().enumerate() {
            let cells = [
                (index + 1).to_string(),
                item.description.clone(),
                format_quantity(item.quantity),
                format_money(self.currency, item.rate),
                format_money(self.currency, item.total()),
            ];
            let height = row_height(&cells, &[NORMAL; 5]);
            if pdf.ensure_space(height) {
                table_row(pdf, &header, &header_style, true);
            }
            table_row(pdf, &cells, &[NORMAL; 5], false);
        }

        let totals = [
            String::new(),
            String::new(),
            String::new(),
            "Total:".to_string(),
            format_money(self.currency, invoice.total),
        ];
        let styles = [NORMAL, NORMAL, NORMAL, NORMAL_BOLD, NORMAL_BOLD];
        pdf.ensure_space(row_height(&totals, &styles));
        let top = pdf.cursor();
        pdf.rule(MARGIN, MARGIN + table_width(), top, TABLE_RULE);
        table_row(pdf, &totals, &styles, false);
    }

    /// Produces the slip bitmap. A rasteriser failure degrades the invoice
    /// instead of failing it; anything before that propagates.
    fn rasterise_slip(&self, bill: &QrBill, output: &Path) -> Result<Option<RasterImage>, Error> {
        let parent = match output.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        let scratch = Scratch::new_in(parent)?;
        let svg_path = scratch.file("slip.svg");
        let png_path = scratch.file("slip.png");

        let result = bill
            .to_svg()
            .and_then(|svg| Ok(fs::write(&svg_path, svg)?));
        if let Err(e) = result {
            scratch.cleanup();
            return Err(e);
        }

        let image = match (self.rasterise)(&svg_path, &png_path, self.slip_dpi)
            .and_then(|()| raster::load_png(&png_path))
        {
            Ok(image) => Some(image),
            Err(e) => {
                warn!(error = %e, "Payment slip rasterisation failed, page 2 left blank");
                None
            }
        };
        scratch.cleanup();
        Ok(image)
    }

    fn load_signature(&self) -> Option<RasterImage> {
        let path = self.signature?;
        if !path.exists() {
            debug!(path = %path.display(), "No signature image");
            return None;
        }
        match raster::load_png(path) {
            Ok(image) => Some(image),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Signature image unreadable, skipped");
                None
            }
        }
    }
}

fn payment_terms(days: u32) -> String {
    format!(
        "Bitte überweisen Sie den Rechnungsbetrag innerhalb von {days} Tagen. (ab Rechnungsdatum) \
         Nach dem Überweisen vom Rechnungsbetrag gilt das Projekt als abgeschlossen. \
         Für neue Projekte stehe ich Ihnen jederzeit zur Verfügung."
    )
}

fn table_width() -> f32 {
    COLUMNS.iter().sum()
}

/// Only the description column wraps; amounts stay on one line.
fn cell_lines(column: usize, text: &str, style: &TextStyle) -> Vec<String> {
    if column == DESCRIPTION_COLUMN {
        wrap(text, style, COLUMNS[column] - 2.0 * CELL_PAD_X)
    } else {
        vec![text.to_string()]
    }
}

fn row_height(cells: &[String; 5], styles: &[TextStyle; 5]) -> f32 {
    let lines = cells
        .iter()
        .zip(styles)
        .enumerate()
        .map(|(column, (text, style))| cell_lines(column, text, style).len())
        .max()
        .unwrap_or(1);
    lines as f32 * NORMAL.leading + 2.0 * CELL_PAD_Y
}

/// Draws one row at the cursor and advances past it. The last two
/// columns are right-aligned.
fn table_row(pdf: &mut PdfBuilder, cells: &[String; 5], styles: &[TextStyle; 5], header: bool) {
    let top = pdf.cursor();
    let height = row_height(cells, styles);
    if header {
        pdf.rule(MARGIN, MARGIN + table_width(), top, TABLE_RULE);
    }

    let mut x = MARGIN;
    for (column, ((text, style), width)) in cells.iter().zip(styles).zip(COLUMNS).enumerate() {
        let right_aligned = column >= COLUMNS.len() - 2;
        for (i, line) in cell_lines(column, text, style).iter().enumerate() {
            let line_top = top + CELL_PAD_Y + i as f32 * style.leading;
            if right_aligned {
                pdf.text_at(x + width - CELL_PAD_X, line_top, style, Align::Right, line);
            } else {
                pdf.text_at(x + CELL_PAD_X, line_top, style, Align::Left, line);
            }
        }
        x += width;
    }

    if header {
        pdf.rule(MARGIN, MARGIN + table_width(), top + height, TABLE_RULE);
    }
    pdf.spacer(height);
}

#[cfg(test)]
mod tests {
    use super::*;
    use lopdf::content::Content;
    use lopdf::{Document, Object};
    use std::str::FromStr;
    use time::macros::date;

    fn config(signature: Option<PathBuf>) -> Config {
        let mut config = Config::from_toml(
            r#"
            [company]
            name = "Muster Informatik"
            street = "Bahnhofstrasse 1"
            postal_code = "8001"
            city = "Zürich"
            iban = "CH93 0076 2011 6238 5295 7"
            "#,
        )
        .unwrap();
        config.signature = signature;
        config
    }

    fn customer(number: &str, company: &str) -> Customer {
        Customer {
            number: number.to_string(),
            company: company.to_string(),
            contact: Some("Anna Meier".to_string()),
            street: "Hauptstrasse 5".to_string(),
            postal_code: "3000".to_string(),
            city: "Bern".to_string(),
            iban: None,
            email: None,
        }
    }

    fn item(customer: &str, description: &str, qty: &str, rate: &str, date: Date) -> WorkItem {
        WorkItem {
            customer_number: customer.to_string(),
            description: description.to_string(),
            quantity: Decimal::from_str(qty).unwrap(),
            rate: Decimal::from_str(rate).unwrap(),
            date,
        }
    }

    fn items() -> Vec<WorkItem> {
        vec![
            item("1001", "Beratung", "2", "50", date!(2024 - 01 - 01)),
            item("1001", "Programmierung", "1.5", "120", date!(2024 - 01 - 01)),
            item("1002", "Support", "1", "80", date!(2024 - 01 - 01)),
        ]
    }

    /// Every `Tj` string on `page` (1-based), still WinAnsi encoded.
    fn page_strings(doc: &Document, page: u32) -> Vec<Vec<u8>> {
        let page_id = doc.get_pages()[&page];
        let content = Content::decode(&doc.get_page_content(page_id).unwrap()).unwrap();
        content
            .operations
            .into_iter()
            .filter(|op| op.operator == "Tj")
            .filter_map(|op| match op.operands.first() {
                Some(Object::String(bytes, _)) => Some(bytes.clone()),
                _ => None,
            })
            .collect()
    }

    fn page_has_image(doc: &Document, page: u32) -> bool {
        let page_id = doc.get_pages()[&page];
        let content = Content::decode(&doc.get_page_content(page_id).unwrap()).unwrap();
        content.operations.iter().any(|op| op.operator == "Do")
    }

    fn load(path: &Path) -> Document {
        let mut doc = Document::load(path).unwrap();
        doc.decompress();
        doc
    }

    fn has_text(strings: &[Vec<u8>], text: &str) -> bool {
        let wanted = layout::win_ansi(text);
        strings.iter().any(|s| *s == wanted)
    }

    #[test]
    fn renders_letter_and_slip() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(None);
        let renderer = InvoiceRenderer::new(&config);
        let output = dir.path().join("Invoice_1001-20240101.pdf");

        let rendered = renderer
            .render(&customer("1001", "Muster AG"), &items(), date!(2024 - 01 - 01), &output)
            .unwrap()
            .unwrap();

        assert_eq!(rendered.number, "1001-20240101");
        assert_eq!(rendered.total, Decimal::from(280));
        assert_eq!(rendered.line_items, 2);

        let doc = load(&output);
        assert_eq!(doc.get_pages().len(), 2);

        let first = page_strings(&doc, 1);
        assert!(has_text(&first, "RECHNUNG Nr. 1001-20240101"));
        assert!(has_text(&first, "Datum: 01.01.2024"));
        assert!(has_text(&first, "Guten Tag Anna Meier,"));
        assert!(has_text(&first, "CHF 280.00"));
        assert!(has_text(&first, "Programmierung"));
        assert!(!has_text(&first, "Support"));
        assert!(has_text(&first, "Muster Informatik"));

        assert!(!rendered.degraded);
        assert!(page_has_image(&doc, 2));
    }

    #[test]
    fn payment_terms_use_the_configured_day_count() {
        assert_eq!(
            payment_terms(30),
            "Bitte überweisen Sie den Rechnungsbetrag innerhalb von 30 Tagen. (ab Rechnungsdatum) \
             Nach dem Überweisen vom Rechnungsbetrag gilt das Projekt als abgeschlossen. \
             Für neue Projekte stehe ich Ihnen jederzeit zur Verfügung."
        );

        let dir = tempfile::tempdir().unwrap();
        let mut config = config(None);
        config.payment_term_days = 30;
        let output = dir.path().join("terms.pdf");
        InvoiceRenderer::new(&config)
            .render(&customer("1001", "Muster AG"), &items(), date!(2024 - 01 - 01), &output)
            .unwrap();

        // Wrapped lines are consecutive `Tj` strings.
        let text = page_strings(&load(&output), 1).join(&b' ');
        let wanted = layout::win_ansi(&payment_terms(30));
        assert!(text.windows(wanted.len()).any(|w| w == wanted.as_slice()));
    }

    #[test]
    fn raster_failure_still_writes_the_invoice() {
        fn failing(_: &Path, _: &Path, _: u32) -> Result<(), Error> {
            Err(Error::Raster("no renderer available".to_string()))
        }

        let dir = tempfile::tempdir().unwrap();
        let config = config(None);
        let renderer = InvoiceRenderer::new(&config).with_rasteriser(failing);
        let output = dir.path().join("Invoice_1001-20240101.pdf");

        let rendered = renderer
            .render(&customer("1001", "Muster AG"), &items(), date!(2024 - 01 - 01), &output)
            .unwrap()
            .unwrap();

        assert!(rendered.degraded);
        assert!(output.exists());
        let doc = load(&output);
        assert_eq!(doc.get_pages().len(), 2);
        assert!(has_text(&page_strings(&doc, 1), "RECHNUNG Nr. 1001-20240101"));
        assert!(!page_has_image(&doc, 2));
        // Scratch directory removed even on the degraded path.
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn nothing_matching_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(None);
        let renderer = InvoiceRenderer::new(&config);
        let output = dir.path().join("Invoice_1002-20240102.pdf");

        let result = renderer
            .render(&customer("1002", "Beta GmbH"), &items(), date!(2024 - 01 - 02), &output)
            .unwrap();

        assert!(result.is_none());
        assert!(!output.exists());
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn output_is_reproducible_and_leaves_no_scratch_files() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(None);
        let renderer = InvoiceRenderer::new(&config);
        let first = dir.path().join("a.pdf");
        let second = dir.path().join("b.pdf");
        let customer = customer("1001", "Muster AG");

        renderer.render(&customer, &items(), date!(2024 - 01 - 01), &first).unwrap();
        renderer.render(&customer, &items(), date!(2024 - 01 - 01), &second).unwrap();

        assert_eq!(fs::read(&first).unwrap(), fs::read(&second).unwrap());
        let names: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(names.len(), 2);
    }

    #[test]
    fn long_tables_continue_on_a_new_page() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(None);
        let renderer = InvoiceRenderer::new(&config);
        let output = dir.path().join("long.pdf");
        let many: Vec<WorkItem> = (0..60)
            .map(|i| {
                item(
                    "1001",
                    &format!("Wartungsarbeiten am Server Nummer {i} inklusive ausführlicher Dokumentation"),
                    "1",
                    "10",
                    date!(2024 - 01 - 01),
                )
            })
            .collect();

        let rendered = renderer
            .render(&customer("1001", "Muster AG"), &many, date!(2024 - 01 - 01), &output)
            .unwrap()
            .unwrap();

        assert_eq!(rendered.total, Decimal::from(600));
        let doc = load(&output);
        let pages = doc.get_pages().len() as u32;
        assert!(pages > 2);
        // Header repeated on the continuation page, slip last.
        assert!(has_text(&page_strings(&doc, 2), "Bezeichnung"));
        assert!(page_strings(&doc, pages).is_empty());
    }

    #[test]
    fn oversized_customer_name_is_a_render_error() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(None);
        let renderer = InvoiceRenderer::new(&config);
        let output = dir.path().join("bad.pdf");

        let result = renderer.render(
            &customer("1001", &"X".repeat(71)),
            &items(),
            date!(2024 - 01 - 01),
            &output,
        );

        assert!(matches!(result, Err(Error::QrBill(_))));
        assert!(!output.exists());
    }

    #[test]
    fn signature_is_embedded_when_present() {
        let dir = tempfile::tempdir().unwrap();
        let signature = dir.path().join("signature.png");
        let mut pixmap = resvg::tiny_skia::Pixmap::new(4, 2).unwrap();
        pixmap.fill(resvg::tiny_skia::Color::BLACK);
        pixmap.save_png(&signature).unwrap();

        let with = config(Some(signature));
        let output = dir.path().join("signed.pdf");
        InvoiceRenderer::new(&with)
            .render(&customer("1001", "Muster AG"), &items(), date!(2024 - 01 - 01), &output)
            .unwrap();
        assert!(page_has_image(&load(&output), 1));

        let missing = config(Some(dir.path().join("absent.png")));
        let output = dir.path().join("unsigned.pdf");
        InvoiceRenderer::new(&missing)
            .render(&customer("1001", "Muster AG"), &items(), date!(2024 - 01 - 01), &output)
            .unwrap();
        assert!(!page_has_image(&load(&output), 1));
    }
}
