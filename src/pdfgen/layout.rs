// src/pdfgen/layout.rs

//! A small top-to-bottom page builder on top of `lopdf`: standard fonts,
//! wrapped paragraphs, rules and bitmap images, with automatic page breaks.

use crate::error::Error;
use crate::raster::RasterImage;
use lopdf::content::{Content, Operation};
use lopdf::{Document, Object, ObjectId, Stream, StringFormat, dictionary};

pub const PAGE_WIDTH: f32 = 595.0;
pub const PAGE_HEIGHT: f32 = 842.0;
pub const MARGIN: f32 = 40.0;
pub const CONTENT_WIDTH: f32 = PAGE_WIDTH - 2.0 * MARGIN;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Font {
    Regular,
    Bold,
}

impl Font {
    fn resource_name(self) -> &'static str {
        match self {
            Font::Regular => "F1",
            Font::Bold => "F2",
        }
    }

    fn base_font(self) -> &'static str {
        match self {
            Font::Regular => "Helvetica",
            Font::Bold => "Helvetica-Bold",
        }
    }

    fn widths(self) -> &'static [u16; 95] {
        match self {
            Font::Regular => &HELVETICA_WIDTHS,
            Font::Bold => &HELVETICA_BOLD_WIDTHS,
        }
    }

    /// Advance width of `text` at `size`, from the AFM metrics.
    pub fn measure(self, text: &str, size: f32) -> f32 {
        let widths = self.widths();
        let units: u32 = text
            .chars()
            .map(|c| match c as u32 {
                code @ 32..=126 => widths[(code - 32) as usize] as u32,
                _ => 556,
            })
            .sum();
        units as f32 * size / 1000.0
    }
}

#[derive(Debug, Clone, Copy)]
pub struct TextStyle {
    pub font: Font,
    pub size: f32,
    pub leading: f32,
    /// 0.0 = black, 1.0 = white.
    pub gray: f32,
}

pub const NORMAL: TextStyle = TextStyle {
    font: Font::Regular,
    size: 10.0,
    leading: 12.0,
    gray: 0.0,
};

pub const NORMAL_BOLD: TextStyle = TextStyle {
    font: Font::Bold,
    ..NORMAL
};

pub const SMALL_GRAY: TextStyle = TextStyle {
    font: Font::Regular,
    size: 8.0,
    leading: 10.0,
    gray: 0.5,
};

pub const HEADING1: TextStyle = TextStyle {
    font: Font::Bold,
    size: 18.0,
    leading: 22.0,
    gray: 0.0,
};

pub const HEADING2: TextStyle = TextStyle {
    font: Font::Bold,
    size: 14.0,
    leading: 18.0,
    gray: 0.0,
};

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Align {
    Left,
    Right,
}

/// Greedy word wrap. A single word wider than `max_width` gets its own line.
pub fn wrap(text: &str, style: &TextStyle, max_width: f32) -> Vec<String> {
    let mut lines = Vec::new();
    let mut current = String::new();
    for word in text.split_whitespace() {
        let candidate = if current.is_empty() {
            word.to_string()
        } else {
            format!("{current} {word}")
        };
        if !current.is_empty() && style.font.measure(&candidate, style.size) > max_width {
            lines.push(std::mem::replace(&mut current, word.to_string()));
        } else {
            current = candidate;
        }
    }
    if !current.is_empty() || lines.is_empty() {
        lines.push(current);
    }
    lines
}

/// Maps text onto WinAnsiEncoding; anything outside it becomes `?`.
pub fn win_ansi(text: &str) -> Vec<u8> {
    text.chars()
        .map(|c| match c {
            '€' => 0x80,
            '‚' => 0x82,
            '„' => 0x84,
            '…' => 0x85,
            '‘' => 0x91,
            '’' => 0x92,
            '“' => 0x93,
            '”' => 0x94,
            '•' => 0x95,
            '–' => 0x96,
            '—' => 0x97,
            c if (c as u32) < 0x80 || (0xA0..=0xFF).contains(&(c as u32)) => c as u8,
            _ => b'?',
        })
        .collect()
}

pub struct PdfBuilder {
    document: Document,
    pages: Vec<Vec<Operation>>,
    images: Vec<(String, ObjectId)>,
    /// Distance from the top edge of the current page.
    cursor: f32,
}

impl PdfBuilder {
    pub fn new() -> Self {
        Self {
            document: Document::with_version("1.5"),
            pages: vec![Vec::new()],
            images: Vec::new(),
            cursor: MARGIN,
        }
    }

    pub fn cursor(&self) -> f32 {
        self.cursor
    }

    pub fn new_page(&mut self) {
        self.pages.push(Vec::new());
        self.cursor = MARGIN;
    }

    /// Starts a new page unless `height` still fits above the bottom margin.
    /// Returns whether a break happened.
    pub fn ensure_space(&mut self, height: f32) -> bool {
        let fits = self.cursor + height <= PAGE_HEIGHT - MARGIN;
        let page_is_empty = self.cursor <= MARGIN;
        if fits || page_is_empty {
            return false;
        }
        self.new_page();
        true
    }

    pub fn spacer(&mut self, height: f32) {
        self.cursor += height;
    }

    fn ops(&mut self) -> &mut Vec<Operation> {
        // `pages` always holds at least one page.
        let last = self.pages.len() - 1;
        &mut self.pages[last]
    }

    /// Draws one line with its top edge at `top`. Does not move the cursor.
    pub fn text_at(&mut self, x: f32, top: f32, style: &TextStyle, align: Align, text: &str) {
        if text.is_empty() {
            return;
        }
        let x = match align {
            Align::Left => x,
            Align::Right => x - style.font.measure(text, style.size),
        };
        let baseline = PAGE_HEIGHT - (top + style.size);
        let ops = self.ops();
        ops.push(Operation::new("BT", vec![]));
        ops.push(Operation::new(
            "Tf",
            vec![style.font.resource_name().into(), style.size.into()],
        ));
        ops.push(Operation::new("g", vec![style.gray.into()]));
        ops.push(Operation::new("Td", vec![x.into(), baseline.into()]));
        ops.push(Operation::new(
            "Tj",
            vec![Object::String(win_ansi(text), StringFormat::Literal)],
        ));
        ops.push(Operation::new("ET", vec![]));
    }

    /// Wraps `text` to the content width and flows it down the page.
    pub fn paragraph(&mut self, style: &TextStyle, text: &str) {
        for line in wrap(text, style, CONTENT_WIDTH) {
            self.ensure_space(style.leading);
            let top = self.cursor;
            self.text_at(MARGIN, top, style, Align::Left, &line);
            self.cursor += style.leading;
        }
    }

    /// Horizontal rule at `top`, measured from the page top.
    pub fn rule(&mut self, x1: f32, x2: f32, top: f32, width: f32) {
        let y = PAGE_HEIGHT - top;
        let ops = self.ops();
        ops.push(Operation::new("q", vec![]));
        ops.push(Operation::new("w", vec![width.into()]));
        ops.push(Operation::new("G", vec![0.into()]));
        ops.push(Operation::new("m", vec![x1.into(), y.into()]));
        ops.push(Operation::new("l", vec![x2.into(), y.into()]));
        ops.push(Operation::new("S", vec![]));
        ops.push(Operation::new("Q", vec![]));
    }

    /// Places `image` scaled to `width`×`height` at the cursor and advances.
    pub fn image(&mut self, image: &RasterImage, x: f32, width: f32, height: f32) {
        self.ensure_space(height);
        let name = format!("Im{}", self.images.len() + 1);
        let stream = Stream::new(
            dictionary! {
                "Type" => "XObject",
                "Subtype" => "Image",
                "Width" => image.width as i64,
                "Height" => image.height as i64,
                "ColorSpace" => "DeviceRGB",
                "BitsPerComponent" => 8,
            },
            image.rgb.clone(),
        );
        let id = self.document.add_object(stream);
        self.images.push((name.clone(), id));

        let y = PAGE_HEIGHT - (self.cursor + height);
        let ops = self.ops();
        ops.push(Operation::new("q", vec![]));
        ops.push(Operation::new(
            "cm",
            vec![
                width.into(),
                0.into(),
                0.into(),
                height.into(),
                x.into(),
                y.into(),
            ],
        ));
        ops.push(Operation::new("Do", vec![Object::Name(name.into_bytes())]));
        ops.push(Operation::new("Q", vec![]));
        self.cursor += height;
    }

    /// Assembles the object graph and serialises it.
    pub fn finish(mut self, title: &str) -> Result<Vec<u8>, Error> {
        let pages_id = self.document.new_object_id();

        let mut fonts = lopdf::Dictionary::new();
        for font in [Font::Regular, Font::Bold] {
            let font_id = self.document.add_object(dictionary! {
                "Type" => "Font",
                "Subtype" => "Type1",
                "BaseFont" => font.base_font(),
                "Encoding" => "WinAnsiEncoding",
            });
            fonts.set(font.resource_name(), font_id);
        }
        let mut xobjects = lopdf::Dictionary::new();
        for (name, id) in &self.images {
            xobjects.set(name.as_str(), *id);
        }
        let resources_id = self.document.add_object(dictionary! {
            "Font" => fonts,
            "XObject" => xobjects,
        });

        let mut page_ids = Vec::with_capacity(self.pages.len());
        for operations in std::mem::take(&mut self.pages) {
            let content = Content { operations };
            let content_id = self
                .document
                .add_object(Stream::new(dictionary! {}, content.encode()?));
            let page_id = self.document.add_object(dictionary! {
                "Type" => "Page",
                "Parent" => pages_id,
                "MediaBox" => vec![0.into(), 0.into(), PAGE_WIDTH.into(), PAGE_HEIGHT.into()],
                "Contents" => content_id,
                "Resources" => resources_id,
            });
            page_ids.push(page_id);
        }

        let count = page_ids.len() as i64;
        self.document.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => page_ids.into_iter().map(Object::Reference).collect::<Vec<_>>(),
                "Count" => count,
            }),
        );
        let catalog_id = self.document.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        let info_id = self.document.add_object(dictionary! {
            "Title" => Object::String(win_ansi(title), StringFormat::Literal),
            "Producer" => Object::string_literal("qr_invoicer"),
        });
        self.document.trailer.set("Root", catalog_id);
        self.document.trailer.set("Info", info_id);

        self.document.compress();

        let mut buffer = Vec::new();
        self.document.save_to(&mut buffer)?;
        Ok(buffer)
    }
}

/// Helvetica advance widths for ASCII 32..=126 (Adobe AFM).
const HELVETICA_WIDTHS: [u16; 95] = [
    278, 278, 355, 556, 556, 889, 667, 191, 333, 333, 389, 584, 278, 333, 278, 278, // ' '../
    556, 556, 556, 556, 556, 556, 556, 556, 556, 556, 278, 278, 584, 584, 584, 556, // 0..?
    1015, 667, 667, 722, 722, 667, 611, 778, 722, 278, 500, 667, 556, 833, 722, 778, // @..O
    667, 778, 722, 667, 611, 722, 667, 944, 667, 667, 611, 278, 278, 278, 469, 556, // P.._
    333, 556, 556, 500, 556, 556, 278, 556, 556, 222, 222, 500, 222, 833, 556, 556, // `..o
    556, 556, 333, 500, 278, 556, 500, 722, 500, 500, 500, 334, 260, 334, 584, // p..~
];

/// Helvetica-Bold advance widths for ASCII 32..=126 (Adobe AFM).
const HELVETICA_BOLD_WIDTHS: [u16; 95] = [
    278, 333, 474, 556, 556, 889, 722, 238, 333, 333, 389, 584, 278, 333, 278, 278, // ' '../
    556, 556, 556, 556, 556, 556, 556, 556, 556, 556, 333, 333, 584, 584, 584, 611, // 0..?
    975, 722, 722, 722, 722, 667, 611, 778, 722, 278, 556, 722, 611, 833, 722, 778, // @..O
    667, 778, 722, 667, 611, 722, 667, 944, 667, 667, 611, 333, 278, 333, 584, 556, // P.._
    333, 556, 611, 556, 611, 556, 333, 611, 611, 278, 278, 556, 278, 889, 611, 611, // `..o
    611, 611, 389, 556, 333, 611, 556, 778, 556, 556, 500, 389, 280, 389, 584, // p..~
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn measures_with_afm_widths() {
        assert_eq!(Font::Regular.measure("100", 10.0), 16.68);
        assert!(Font::Bold.measure("Total", 10.0) > Font::Regular.measure("Total", 10.0));
        assert_eq!(Font::Regular.measure("", 10.0), 0.0);
    }

    #[test]
    fn wraps_on_word_boundaries() {
        let text = "Vielen Dank für den Auftrag. Ich erlaube mir, folgende Leistungen in Rechnung zu stellen.";
        let lines = wrap(text, &NORMAL, 150.0);
        assert!(lines.len() > 1);
        assert_eq!(lines.join(" "), text);
        for line in &lines {
            assert!(NORMAL.font.measure(line, NORMAL.size) <= 150.0 || !line.contains(' '));
        }
    }

    #[test]
    fn wrap_keeps_empty_text_as_one_line() {
        assert_eq!(wrap("", &NORMAL, 100.0), vec![String::new()]);
        assert_eq!(wrap("Überlang", &NORMAL, 1.0), vec!["Überlang".to_string()]);
    }

    #[test]
    fn win_ansi_mapping() {
        assert_eq!(win_ansi("Grüsse · €"), b"Gr\xfcsse \xb7 \x80".to_vec());
        assert_eq!(win_ansi("→"), b"?".to_vec());
    }

    #[test]
    fn breaks_pages_when_full() {
        let mut pdf = PdfBuilder::new();
        assert!(!pdf.ensure_space(100.0));
        pdf.spacer(PAGE_HEIGHT - 2.0 * MARGIN - 50.0);
        assert!(pdf.ensure_space(100.0));
        assert_eq!(pdf.pages.len(), 2);
        assert_eq!(pdf.cursor(), MARGIN);
    }

    #[test]
    fn finished_document_loads() {
        let mut pdf = PdfBuilder::new();
        pdf.paragraph(&NORMAL, "Hallo");
        pdf.new_page();
        pdf.paragraph(&HEADING1, "Seite zwei");
        let bytes = pdf.finish("Test").unwrap();

        let doc = Document::load_mem(&bytes).unwrap();
        assert_eq!(doc.get_pages().len(), 2);
    }
}
