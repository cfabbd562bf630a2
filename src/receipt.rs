//! Receipt layout. A receipt is an SVG document with a fixed width; its height depends
//! only on which optional blocks (logo, bank details, payment QR) are present.
//!
//! Images are left as [`ImageSlot`] placeholders so the asset loader can resolve them
//! (or drop them when they fail to load) before anything is rasterized.

use std::fmt::Write as _;
use std::path::PathBuf;

use serde::Serialize;

use crate::config::{BankInfo, OrgInfo};
use crate::format::format_amount;
use crate::sheet::StudentRecord;

pub const RECEIPT_WIDTH: f32 = 420.0;
const PAD: f32 = 24.0;
const LOGO_SIZE: f32 = 56.0;
const QR_SIZE: f32 = 168.0;
const ROW_H: f32 = 30.0;
const BANK_ROW_H: f32 = 22.0;
const FONT_FAMILY: &str = "Be Vietnam Pro, Segoe UI, Arial, sans-serif";
const PLACEHOLDER: &str = "—";
const CURRENCY: &str = "VND";
const SESSION_UNIT: &str = "buổi";

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RenderTarget {
    /// Visible preview; `scale` only sizes the host's container.
    Preview { scale: f32 },
    /// Off-screen instance used for export.
    Export,
}

impl RenderTarget {
    pub fn container_scale(self) -> f32 {
        match self {
            RenderTarget::Preview { scale } => scale,
            RenderTarget::Export => 1.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ImageRole {
    Logo,
    PaymentQr,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ImageSlot {
    pub role: ImageRole,
    pub source: PathBuf,
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Part {
    Markup(String),
    Image(ImageSlot),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReceiptDocument {
    pub width: f32,
    pub height: f32,
    pub parts: Vec<Part>,
    pub target: RenderTarget,
}

impl ReceiptDocument {
    /// Image placeholders in document order.
    pub fn image_slots(&self) -> impl Iterator<Item = &ImageSlot> {
        self.parts.iter().filter_map(|p| match p {
            Part::Image(slot) => Some(slot),
            Part::Markup(_) => None,
        })
    }

    /// Same content, different destination.
    pub fn retarget(mut self, target: RenderTarget) -> Self {
        self.target = target;
        self
    }
}

struct Builder {
    parts: Vec<Part>,
    buf: String,
    y: f32,
}

impl Builder {
    fn new() -> Self {
        Self {
            parts: Vec::new(),
            buf: String::new(),
            y: PAD,
        }
    }

    fn image(&mut self, slot: ImageSlot) {
        if !self.buf.is_empty() {
            self.parts.push(Part::Markup(std::mem::take(&mut self.buf)));
        }
        self.parts.push(Part::Image(slot));
    }

    fn text(&mut self, x: f32, y: f32, anchor: &str, size: f32, weight: u16, fill: &str, content: &str) {
        let _ = write!(
            self.buf,
            r#"<text x="{x}" y="{y}" text-anchor="{anchor}" font-size="{size}" font-weight="{weight}" fill="{fill}">{}</text>"#,
            escape_xml(content)
        );
    }

    fn rect(&mut self, x: f32, y: f32, w: f32, h: f32, rx: f32, fill: &str, stroke: Option<&str>) {
        let _ = write!(
            self.buf,
            r#"<rect x="{x}" y="{y}" width="{w}" height="{h}" rx="{rx}" fill="{fill}""#
        );
        if let Some(s) = stroke {
            let _ = write!(self.buf, r#" stroke="{s}" stroke-width="1""#);
        }
        self.buf.push_str("/>");
    }

    fn hline(&mut self, y: f32, stroke: &str) {
        let _ = write!(
            self.buf,
            r#"<line x1="{}" y1="{y}" x2="{}" y2="{y}" stroke="{stroke}" stroke-width="1"/>"#,
            PAD,
            RECEIPT_WIDTH - PAD
        );
    }

    fn finish(mut self, target: RenderTarget) -> ReceiptDocument {
        if !self.buf.is_empty() {
            self.parts.push(Part::Markup(std::mem::take(&mut self.buf)));
        }
        ReceiptDocument {
            width: RECEIPT_WIDTH,
            height: self.y + PAD,
            parts: self.parts,
            target,
        }
    }
}

pub fn render_receipt(student: &StudentRecord, org: &OrgInfo, target: RenderTarget) -> ReceiptDocument {
    let mut b = Builder::new();
    let center = RECEIPT_WIDTH / 2.0;
    let left = PAD;
    let right = RECEIPT_WIDTH - PAD;

    // Header
    if let Some(logo) = &org.logo_path {
        b.image(ImageSlot {
            role: ImageRole::Logo,
            source: logo.clone(),
            x: center - LOGO_SIZE / 2.0,
            y: b.y,
            width: LOGO_SIZE,
            height: LOGO_SIZE,
        });
        b.y += LOGO_SIZE + 8.0;
    }
    let org_name = if org.name.trim().is_empty() {
        "TRƯỜNG HỌC"
    } else {
        org.name.as_str()
    };
    b.y += 20.0;
    b.text(center, b.y, "middle", 20.0, 700, "#1a365d", org_name);
    for line in &org.contact_lines {
        b.y += 18.0;
        b.text(center, b.y, "middle", 12.0, 400, "#4a5568", line.trim());
    }
    b.y += 34.0;
    b.text(center, b.y, "middle", 18.0, 700, "#2d3748", &org.title.to_uppercase());
    b.y += 14.0;
    b.hline(b.y, "#cbd5e0");

    // Student fields
    let class_name = if student.class_name.is_empty() {
        PLACEHOLDER.to_string()
    } else {
        student.class_name.clone()
    };
    let fields = [
        ("Tên Học Sinh", student.name.clone()),
        ("Lớp", class_name),
        (
            "Số Buổi Học",
            format!("{} {}", format_amount(Some(student.session_count)), SESSION_UNIT),
        ),
        (
            "Học Phí 1 Buổi",
            format!("{} {}", format_amount(Some(student.price_per_session)), CURRENCY),
        ),
    ];
    b.y += 6.0;
    for (label, value) in &fields {
        b.y += ROW_H;
        b.text(left, b.y - 10.0, "start", 13.0, 400, "#718096", label);
        b.text(right, b.y - 10.0, "end", 14.0, 600, "#1a202c", value);
        b.hline(b.y, "#edf2f7");
    }

    // Total due
    b.y += 16.0;
    let total_h = 60.0;
    b.rect(left, b.y, right - left, total_h, 10.0, "#2b6cb0", None);
    b.text(left + 16.0, b.y + 36.0, "start", 14.0, 600, "#ebf8ff", "Tổng học phí");
    b.text(
        right - 16.0,
        b.y + 38.0,
        "end",
        22.0,
        800,
        "#ffffff",
        &format!("{} {}", format_amount(Some(student.total_fee)), CURRENCY),
    );
    b.y += total_h;

    if let Some(bank) = &org.bank {
        bank_block(&mut b, bank);
    }

    if let Some(qr) = &org.qr_image_path {
        b.y += 16.0;
        b.image(ImageSlot {
            role: ImageRole::PaymentQr,
            source: qr.clone(),
            x: center - QR_SIZE / 2.0,
            y: b.y,
            width: QR_SIZE,
            height: QR_SIZE,
        });
        b.y += QR_SIZE;
    }

    b.finish(target)
}

fn bank_block(b: &mut Builder, bank: &BankInfo) {
    let left = PAD;
    let right = RECEIPT_WIDTH - PAD;
    let rows = [
        ("Ngân hàng", bank.bank_name.as_str()),
        ("Số TK", bank.account_number.as_str()),
        ("Chủ TK", bank.account_owner.as_str()),
    ];
    let block_h = 34.0 + BANK_ROW_H * rows.len() as f32 + 8.0;

    b.y += 16.0;
    b.rect(left, b.y, right - left, block_h, 8.0, "#f7fafc", Some("#e2e8f0"));
    let top = b.y;
    b.text(left + 14.0, top + 24.0, "start", 13.0, 700, "#2d3748", "Thông tin thanh toán");
    for (i, (label, value)) in rows.into_iter().enumerate() {
        let y = top + 34.0 + BANK_ROW_H * (i as f32 + 1.0) - 6.0;
        let value = if value.trim().is_empty() { PLACEHOLDER } else { value };
        b.text(left + 14.0, y, "start", 12.0, 400, "#718096", label);
        b.text(right - 14.0, y, "end", 13.0, 600, "#1a202c", value);
    }
    b.y += block_h;
}

/// Wraps finished body markup into a standalone SVG document with an opaque background.
pub fn svg_envelope(width: f32, height: f32, body: &str) -> String {
    format!(
        r##"<svg xmlns="http://www.w3.org/2000/svg" width="{width}" height="{height}" viewBox="0 0 {width} {height}" font-family="{FONT_FAMILY}"><rect x="0" y="0" width="{width}" height="{height}" fill="#ffffff"/>{body}</svg>"##
    )
}

pub fn escape_xml(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for ch in s.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            c if (c as u32) < 0x20 && c != '\t' && c != '\n' && c != '\r' => {}
            c => out.push(c),
        }
    }
    out
}
