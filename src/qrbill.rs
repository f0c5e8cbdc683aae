// src/qrbill.rs

//! Swiss QR-bill: the payload behind the QR code and the 210×105 mm
//! payment slip (receipt + payment part) drawn around it as SVG.

use crate::config::{is_qr_iban, validate_iban};
use crate::error::Error;
use crate::models::{CompanyInfo, Customer, format_amount};
use qrcode::{Color, EcLevel, QrCode};
use rust_decimal::Decimal;
use std::fmt::Write as _;

const MAX_NAME: usize = 70;
const MAX_STREET: usize = 70;
const MAX_POSTAL_CODE: usize = 16;
const MAX_CITY: usize = 35;
const MAX_MESSAGE: usize = 140;

/// Side length of the printed QR code in millimetres.
const QR_SIZE_MM: f32 = 46.0;
const CROSS_SIZE_MM: f32 = 7.0;

/// A structured ("S") address as the standard defines it.
#[derive(Debug, Clone, PartialEq)]
pub struct Address {
    pub name: String,
    pub street: String,
    pub postal_code: String,
    pub city: String,
    pub country: String,
}

impl Address {
    fn validate(&self, role: &str) -> Result<(), Error> {
        check_field(role, "name", &self.name, MAX_NAME)?;
        check_field(role, "street", &self.street, MAX_STREET)?;
        check_field(role, "postal code", &self.postal_code, MAX_POSTAL_CODE)?;
        check_field(role, "city", &self.city, MAX_CITY)?;
        if self.country.len() != 2 || !self.country.chars().all(|c| c.is_ascii_uppercase()) {
            return Err(Error::QrBill(format!(
                "{role} country `{}` is not an ISO 3166 code",
                self.country
            )));
        }
        Ok(())
    }

    fn payload_lines(&self) -> [&str; 7] {
        [
            "S",
            self.name.as_str(),
            self.street.as_str(),
            "",
            self.postal_code.as_str(),
            self.city.as_str(),
            self.country.as_str(),
        ]
    }

    fn display_lines(&self) -> Vec<String> {
        vec![
            self.name.clone(),
            self.street.clone(),
            format!("{} {}", self.postal_code, self.city),
        ]
    }
}

impl From<&CompanyInfo> for Address {
    fn from(company: &CompanyInfo) -> Self {
        Self {
            name: company.name.clone(),
            street: company.street.clone(),
            postal_code: company.postal_code.clone(),
            city: company.city.clone(),
            country: company.country.clone(),
        }
    }
}

impl From<&Customer> for Address {
    fn from(customer: &Customer) -> Self {
        Self {
            name: customer.company.clone(),
            street: customer.street.clone(),
            postal_code: customer.postal_code.clone(),
            city: customer.city.clone(),
            country: "CH".to_string(),
        }
    }
}

fn check_field(role: &str, field: &str, value: &str, max: usize) -> Result<(), Error> {
    let len = value.chars().count();
    if value.trim().is_empty() {
        return Err(Error::QrBill(format!("{role} {field} is empty")));
    }
    if len > max {
        return Err(Error::QrBill(format!(
            "{role} {field} has {len} characters, at most {max} allowed"
        )));
    }
    Ok(())
}

/// A validated payment slip, reference type `NON`.
#[derive(Debug, Clone)]
pub struct QrBill {
    account: String,
    creditor: Address,
    debtor: Option<Address>,
    amount: Option<Decimal>,
    currency: String,
    message: Option<String>,
}

impl QrBill {
    pub fn new(
        account: &str,
        creditor: Address,
        debtor: Option<Address>,
        amount: Option<Decimal>,
        currency: &str,
        message: Option<String>,
    ) -> Result<Self, Error> {
        let account: String = account.chars().filter(|c| !c.is_whitespace()).collect();
        validate_iban(&account).map_err(|e| Error::QrBill(e.to_string()))?;
        // Reference type is always NON, which a QR-IBAN does not allow.
        if is_qr_iban(&account) {
            return Err(Error::QrBill(format!(
                "QR-IBAN `{account}` requires a QR reference"
            )));
        }
        creditor.validate("creditor")?;
        if let Some(debtor) = &debtor {
            debtor.validate("debtor")?;
        }
        if !matches!(currency, "CHF" | "EUR") {
            return Err(Error::QrBill(format!("unsupported currency `{currency}`")));
        }
        if let Some(amount) = amount {
            let max = Decimal::new(99_999_999_999, 2);
            if amount < Decimal::new(1, 2) || amount > max {
                return Err(Error::QrBill(format!(
                    "amount {amount} outside 0.01..=999999999.99"
                )));
            }
        }
        let message = message.map(|m| m.replace(['\r', '\n'], " "));
        if let Some(message) = &message {
            if message.chars().count() > MAX_MESSAGE {
                return Err(Error::QrBill(format!(
                    "message longer than {MAX_MESSAGE} characters"
                )));
            }
        }

        Ok(Self {
            account,
            creditor,
            debtor,
            amount,
            currency: currency.to_string(),
            message,
        })
    }

    /// The text encoded in the QR code, CR LF separated.
    pub fn payload(&self) -> String {
        let amount = self.amount.map(format_amount).unwrap_or_default();
        let empty_address = ["", "", "", "", "", "", ""];

        let mut lines: Vec<&str> = vec!["SPC", "0200", "1", self.account.as_str()];
        lines.extend(self.creditor.payload_lines());
        // Ultimate creditor: reserved, always empty.
        lines.extend(empty_address);
        lines.push(&amount);
        lines.push(&self.currency);
        match &self.debtor {
            Some(debtor) => lines.extend(debtor.payload_lines()),
            None => lines.extend(empty_address),
        }
        lines.push("NON");
        lines.push("");
        lines.push(self.message.as_deref().unwrap_or(""));
        lines.push("EPD");

        lines.join("\r\n")
    }

    /// Renders the whole slip as a standalone SVG document in millimetres.
    pub fn to_svg(&self) -> Result<String, Error> {
        let code = QrCode::with_error_correction_level(self.payload().as_bytes(), EcLevel::M)
            .map_err(|e| Error::QrBill(format!("QR encoding failed: {e}")))?;

        let mut svg = SvgWriter::new(210.0, 105.0);
        svg.rect(0.0, 0.0, 210.0, 105.0, "#ffffff");
        svg.dashed_line(0.0, 0.2, 210.0, 0.2);
        svg.dashed_line(62.0, 0.0, 62.0, 105.0);

        self.draw_receipt(&mut svg);
        self.draw_payment_part(&mut svg, &code);

        Ok(svg.finish())
    }

    fn draw_receipt(&self, svg: &mut SvgWriter) {
        let x = 5.0;
        svg.text(x, 10.0, 11.0, true, "Empfangsschein");

        let y = svg.block(x, 17.0, 6.0, 8.0, "Konto / Zahlbar an", &self.creditor_lines());
        match &self.debtor {
            Some(debtor) => {
                svg.block(x, y, 6.0, 8.0, "Zahlbar durch", &debtor.display_lines());
            }
            None => {
                svg.text(x, y, 6.0, true, "Zahlbar durch (Name/Adresse)");
                svg.corner_box(x, y + 1.5, 52.0, 20.0);
            }
        }

        self.draw_amount(svg, x, 68.0, 6.0, 8.0, 18.0);
        svg.text_end(57.0, 82.0, 6.0, true, "Annahmestelle");
    }

    fn draw_payment_part(&self, svg: &mut SvgWriter, code: &QrCode) {
        let x = 67.0;
        svg.text(x, 10.0, 11.0, true, "Zahlteil");
        svg.qr(x, 17.0, QR_SIZE_MM, code);
        self.draw_amount(svg, x, 72.0, 8.0, 10.0, 22.0);

        let info_x = 118.0;
        let mut y = svg.block(info_x, 10.0, 8.0, 10.0, "Konto / Zahlbar an", &self.creditor_lines());
        if let Some(message) = &self.message {
            y = svg.block(
                info_x,
                y,
                8.0,
                10.0,
                "Zusätzliche Informationen",
                &[message.clone()],
            );
        }
        match &self.debtor {
            Some(debtor) => {
                svg.block(info_x, y, 8.0, 10.0, "Zahlbar durch", &debtor.display_lines());
            }
            None => {
                svg.text(info_x, y, 8.0, true, "Zahlbar durch (Name/Adresse)");
                svg.corner_box(info_x, y + 2.0, 65.0, 25.0);
            }
        }
    }

    fn draw_amount(
        &self,
        svg: &mut SvgWriter,
        x: f32,
        y: f32,
        label_pt: f32,
        value_pt: f32,
        amount_offset: f32,
    ) {
        svg.text(x, y, label_pt, true, "Währung");
        svg.text(x + amount_offset, y, label_pt, true, "Betrag");
        let value_y = y + pt_to_mm(value_pt) * 1.4;
        svg.text(x, value_y, value_pt, false, &self.currency);
        match self.amount {
            Some(amount) => {
                svg.text(x + amount_offset, value_y, value_pt, false, &group_thousands(&format_amount(amount)));
            }
            None => svg.corner_box(x + amount_offset, y + 1.0, 30.0, 10.0),
        }
    }

    fn creditor_lines(&self) -> Vec<String> {
        let mut lines = vec![format_iban(&self.account)];
        lines.extend(self.creditor.display_lines());
        lines
    }
}

/// `CH9300762011623852957` -> `CH93 0076 2011 6238 5295 7`.
pub fn format_iban(iban: &str) -> String {
    iban.chars()
        .collect::<Vec<_>>()
        .chunks(4)
        .map(|chunk| chunk.iter().collect::<String>())
        .collect::<Vec<_>>()
        .join(" ")
}

/// `1234567.50` -> `1 234 567.50`, the way the slip prints amounts.
pub fn group_thousands(amount: &str) -> String {
    let (int_part, frac_part) = amount.split_once('.').unwrap_or((amount, ""));
    let (sign, digits) = match int_part.strip_prefix('-') {
        Some(rest) => ("-", rest),
        None => ("", int_part),
    };
    let mut grouped = String::new();
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push(' ');
        }
        grouped.push(c);
    }
    if frac_part.is_empty() {
        format!("{sign}{grouped}")
    } else {
        format!("{sign}{grouped}.{frac_part}")
    }
}

fn pt_to_mm(pt: f32) -> f32 {
    pt * 25.4 / 72.0
}

fn xml_escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            _ => out.push(c),
        }
    }
    out
}

// ---------------------------------------------------------------------------
// SVG output
// ---------------------------------------------------------------------------

const FONT_FAMILY: &str = "Helvetica, Arial, 'Liberation Sans', sans-serif";

struct SvgWriter {
    body: String,
    width: f32,
    height: f32,
}

impl SvgWriter {
    fn new(width: f32, height: f32) -> Self {
        Self {
            body: String::new(),
            width,
            height,
        }
    }

    fn text(&mut self, x: f32, y: f32, size_pt: f32, bold: bool, content: &str) {
        self.text_anchored(x, y, size_pt, bold, content, "start");
    }

    fn text_end(&mut self, x: f32, y: f32, size_pt: f32, bold: bool, content: &str) {
        self.text_anchored(x, y, size_pt, bold, content, "end");
    }

    fn text_anchored(&mut self, x: f32, y: f32, size_pt: f32, bold: bool, content: &str, anchor: &str) {
        let weight = if bold { "bold" } else { "normal" };
        let _ = write!(
            self.body,
            r#"<text x="{x:.2}" y="{y:.2}" font-family="{FONT_FAMILY}" font-size="{:.3}" font-weight="{weight}" text-anchor="{anchor}">{}</text>"#,
            pt_to_mm(size_pt),
            xml_escape(content)
        );
        self.body.push('\n');
    }

    /// A bold label followed by value lines. Returns the y of the next block.
    fn block(&mut self, x: f32, y: f32, label_pt: f32, value_pt: f32, label: &str, lines: &[String]) -> f32 {
        self.text(x, y, label_pt, true, label);
        let line_height = pt_to_mm(value_pt) * 1.25;
        let mut y = y + line_height;
        for line in lines {
            self.text(x, y, value_pt, false, line);
            y += line_height;
        }
        y + line_height * 0.6
    }

    fn rect(&mut self, x: f32, y: f32, w: f32, h: f32, fill: &str) {
        let _ = writeln!(
            self.body,
            r#"<rect x="{x:.3}" y="{y:.3}" width="{w:.3}" height="{h:.3}" fill="{fill}"/>"#
        );
    }

    fn dashed_line(&mut self, x1: f32, y1: f32, x2: f32, y2: f32) {
        let _ = writeln!(
            self.body,
            r##"<line x1="{x1:.2}" y1="{y1:.2}" x2="{x2:.2}" y2="{y2:.2}" stroke="#000000" stroke-width="0.2" stroke-dasharray="1 0.6"/>"##
        );
    }

    /// The corner marks of a blank field to be filled in by hand.
    fn corner_box(&mut self, x: f32, y: f32, w: f32, h: f32) {
        let l = 3.0;
        let corners = [
            (x, y + l, x, y, x + l, y),
            (x + w - l, y, x + w, y, x + w, y + l),
            (x, y + h - l, x, y + h, x + l, y + h),
            (x + w - l, y + h, x + w, y + h, x + w, y + h - l),
        ];
        for (ax, ay, bx, by, cx, cy) in corners {
            let _ = writeln!(
                self.body,
                r##"<polyline points="{ax:.2},{ay:.2} {bx:.2},{by:.2} {cx:.2},{cy:.2}" fill="none" stroke="#000000" stroke-width="0.26"/>"##
            );
        }
    }

    fn qr(&mut self, x: f32, y: f32, size: f32, code: &QrCode) {
        let modules = code.width();
        let module = size / modules as f32;
        let mut path = String::new();
        for (i, color) in code.to_colors().into_iter().enumerate() {
            if color == Color::Dark {
                let mx = x + (i % modules) as f32 * module;
                let my = y + (i / modules) as f32 * module;
                let _ = write!(path, "M{mx:.3} {my:.3}h{module:.3}v{module:.3}h-{module:.3}z");
            }
        }
        let _ = writeln!(self.body, r##"<path d="{path}" fill="#000000"/>"##);

        // Swiss cross: white frame, black square, white cross.
        let cx = x + size / 2.0;
        let cy = y + size / 2.0;
        let half = CROSS_SIZE_MM / 2.0;
        self.rect(cx - half, cy - half, CROSS_SIZE_MM, CROSS_SIZE_MM, "#ffffff");
        let inner = CROSS_SIZE_MM - 1.0;
        self.rect(cx - inner / 2.0, cy - inner / 2.0, inner, inner, "#000000");
        let (bar_long, bar_short) = (3.9, 1.17);
        self.rect(cx - bar_short / 2.0, cy - bar_long / 2.0, bar_short, bar_long, "#ffffff");
        self.rect(cx - bar_long / 2.0, cy - bar_short / 2.0, bar_long, bar_short, "#ffffff");
    }

    fn finish(self) -> String {
        format!(
            concat!(
                r#"<?xml version="1.0" encoding="UTF-8"?>"#,
                "\n",
                r#"<svg xmlns="http://www.w3.org/2000/svg" width="{w}mm" height="{h}mm" viewBox="0 0 {w} {h}">"#,
                "\n{body}</svg>\n"
            ),
            w = self.width,
            h = self.height,
            body = self.body
        )
    }
}
