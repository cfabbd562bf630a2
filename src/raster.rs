use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use resvg::{tiny_skia, usvg};

use crate::assets::{self, AssetSource, ReadyDocument};
use crate::config::OrgInfo;
use crate::receipt::{render_receipt, ReceiptDocument, RenderTarget};
use crate::sheet::StudentRecord;

#[derive(Debug, thiserror::Error)]
pub enum RasterError {
    #[error("invalid raster scale {0}")]
    InvalidScale(f32),
    #[error("receipt markup could not be parsed: {0}")]
    Parse(String),
    #[error("cannot allocate a {width}x{height} surface")]
    Surface { width: u32, height: u32 },
    #[error("png encoding failed: {0}")]
    Encode(String),
    #[error("rasterizer failed: {0}")]
    Capability(String),
    #[error("no usable fonts were loaded")]
    NoFonts,
}

/// Vietnamese-capable faces bundled with the binary; hosts without them still draw text.
const EMBEDDED_FONTS: [&[u8]; 2] = [
    include_bytes!("../resources/fonts/DejaVuSans.ttf"),
    include_bytes!("../resources/fonts/DejaVuSans-Bold.ttf"),
];

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RasterOptions {
    /// Device pixels per document pixel.
    pub scale: f32,
    /// Always painted under the document; exports are never transparent.
    pub background: [u8; 3],
}

impl Default for RasterOptions {
    fn default() -> Self {
        Self {
            scale: 2.0,
            background: [0xFF, 0xFF, 0xFF],
        }
    }
}

/// RGBA8 pixels, row-major.
#[derive(Debug, Clone, PartialEq)]
pub struct Bitmap {
    pub width: u32,
    pub height: u32,
    pub rgba: Vec<u8>,
}

impl Bitmap {
    #[cfg(test)]
    pub fn is_opaque(&self) -> bool {
        self.rgba.chunks_exact(4).all(|px| px[3] == 0xFF)
    }

    pub fn to_png(&self) -> Result<Vec<u8>, RasterError> {
        let size = tiny_skia::IntSize::from_wh(self.width, self.height).ok_or(RasterError::Surface {
            width: self.width,
            height: self.height,
        })?;
        let pixmap = tiny_skia::Pixmap::from_vec(self.rgba.clone(), size).ok_or(RasterError::Surface {
            width: self.width,
            height: self.height,
        })?;
        pixmap
            .encode_png()
            .map_err(|e| RasterError::Encode(e.to_string()))
    }

    #[cfg(test)]
    pub fn to_data_url(&self) -> Result<String, RasterError> {
        Ok(png_data_url(&self.to_png()?))
    }
}

pub fn png_data_url(png: &[u8]) -> String {
    format!("data:image/png;base64,{}", STANDARD.encode(png))
}

/// Capability that turns a ready receipt into pixels.
pub trait Rasterizer: Send + Sync {
    fn render(&self, doc: &ReadyDocument, opts: &RasterOptions) -> Result<Bitmap, RasterError>;
}

/// usvg + resvg + tiny-skia. The font database is built once and shared by every render.
pub struct ResvgRasterizer {
    fontdb: Arc<usvg::fontdb::Database>,
}

impl ResvgRasterizer {
    pub fn new(font_dirs: &[PathBuf]) -> Result<Self, RasterError> {
        let mut db = usvg::fontdb::Database::new();
        for font in EMBEDDED_FONTS {
            db.load_font_data(font.to_vec());
        }
        let embedded = first_family(&db).ok();
        db.load_system_fonts();
        for dir in font_dirs {
            db.load_fonts_dir(dir);
        }
        // Generic `sans-serif` defaults to "Arial", which many Linux hosts lack.
        let family = match embedded {
            Some(f) => f,
            None => first_family(&db)?,
        };
        db.set_sans_serif_family(family.as_str());
        log::debug!(
            "font database ready with {} faces, sans-serif -> {family}",
            db.len()
        );
        Ok(Self { fontdb: Arc::new(db) })
    }
}

fn first_family(db: &usvg::fontdb::Database) -> Result<String, RasterError> {
    db.faces()
        .find_map(|face| face.families.first().map(|(name, _)| name.clone()))
        .ok_or(RasterError::NoFonts)
}

impl Rasterizer for ResvgRasterizer {
    fn render(&self, doc: &ReadyDocument, opts: &RasterOptions) -> Result<Bitmap, RasterError> {
        if !(opts.scale.is_finite() && opts.scale > 0.0) {
            return Err(RasterError::InvalidScale(opts.scale));
        }

        let mut usvg_opts = usvg::Options::default();
        usvg_opts.fontdb = self.fontdb.clone();
        let tree = usvg::Tree::from_str(&doc.svg, &usvg_opts)
            .map_err(|e| RasterError::Parse(e.to_string()))?;

        let width = (doc.width * opts.scale).ceil() as u32;
        let height = (doc.height * opts.scale).ceil() as u32;
        let mut pixmap =
            tiny_skia::Pixmap::new(width, height).ok_or(RasterError::Surface { width, height })?;
        let [r, g, b] = opts.background;
        pixmap.fill(tiny_skia::Color::from_rgba8(r, g, b, 0xFF));

        // The preview's container scale never reaches the rasterizer; only the export scale does.
        resvg::render(
            &tree,
            tiny_skia::Transform::from_scale(opts.scale, opts.scale),
            &mut pixmap.as_mut(),
        );

        Ok(Bitmap {
            width,
            height,
            rgba: pixmap.take(),
        })
    }
}

/// Tracks hidden render containers. Each off-screen render owns exactly one container for
/// the duration of the call.
#[derive(Debug, Clone, Default)]
pub struct OffscreenHost {
    live: Arc<AtomicUsize>,
}

struct Stage<'a> {
    host: &'a OffscreenHost,
    doc: ReceiptDocument,
}

impl Drop for Stage<'_> {
    fn drop(&mut self) {
        self.host.live.fetch_sub(1, Ordering::SeqCst);
    }
}

impl OffscreenHost {
    #[cfg(test)]
    pub fn live_containers(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    fn stage(&self, doc: ReceiptDocument) -> Stage<'_> {
        self.live.fetch_add(1, Ordering::SeqCst);
        Stage {
            host: self,
            doc: doc.retarget(RenderTarget::Export),
        }
    }

    /// Stages the document, waits for its images to settle, rasterizes, and tears the
    /// container down whether or not rasterization succeeded.
    pub fn render(
        &self,
        doc: ReceiptDocument,
        assets: &dyn AssetSource,
        rasterizer: &dyn Rasterizer,
        opts: &RasterOptions,
    ) -> Result<Bitmap, RasterError> {
        let stage = self.stage(doc);
        log::trace!("staged receipt with {} image slots", stage.doc.image_slots().count());
        let ready = assets::resolve(&stage.doc, assets);
        rasterizer.render(&ready, opts)
    }
}

/// Everything needed to turn a student into an image, shareable with the batch worker.
#[derive(Clone)]
pub struct ExportPipeline {
    pub rasterizer: Arc<dyn Rasterizer>,
    pub assets: Arc<dyn AssetSource>,
    pub host: OffscreenHost,
    pub options: RasterOptions,
}

impl ExportPipeline {
    pub fn new(rasterizer: Arc<dyn Rasterizer>, assets: Arc<dyn AssetSource>, options: RasterOptions) -> Self {
        Self {
            rasterizer,
            assets,
            host: OffscreenHost::default(),
            options,
        }
    }

    pub fn rasterize(&self, student: &StudentRecord, org: &OrgInfo) -> Result<Bitmap, RasterError> {
        let doc = render_receipt(student, org, RenderTarget::Export);
        self.host
            .render(doc, self.assets.as_ref(), self.rasterizer.as_ref(), &self.options)
    }

    pub fn render_png(&self, student: &StudentRecord, org: &OrgInfo) -> Result<Vec<u8>, RasterError> {
        self.rasterize(student, org)?.to_png()
    }

    /// Markup for the on-screen preview; same content as the export.
    pub fn preview(&self, student: &StudentRecord, org: &OrgInfo, scale: f32) -> ReadyDocument {
        let doc = render_receipt(student, org, RenderTarget::Preview { scale });
        assets::resolve(&doc, self.assets.as_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assets::FsAssets;
    use crate::sheet::StudentId;

    struct Failing;

    impl Rasterizer for Failing {
        fn render(&self, _doc: &ReadyDocument, _opts: &RasterOptions) -> Result<Bitmap, RasterError> {
            Err(RasterError::Capability("boom".into()))
        }
    }

    fn student() -> StudentRecord {
        StudentRecord {
            id: StudentId(3),
            sequence_number: 3,
            name: "Lê Minh".into(),
            class_name: "12C".into(),
            session_count: 10.0,
            price_per_session: 120000.0,
            total_fee: 1200000.0,
        }
    }

    #[test]
    fn container_is_released_after_failure() {
        let pipeline = ExportPipeline::new(Arc::new(Failing), Arc::new(FsAssets), RasterOptions::default());
        let res = pipeline.rasterize(&student(), &OrgInfo::default());
        assert!(matches!(res, Err(RasterError::Capability(_))));
        assert_eq!(pipeline.host.live_containers(), 0);
    }

    #[test]
    fn resvg_output_is_opaque_and_scaled() {
        let rasterizer = ResvgRasterizer::new(&[]).expect("fonts");
        let pipeline = ExportPipeline::new(Arc::new(rasterizer), Arc::new(FsAssets), RasterOptions::default());
        let org = OrgInfo {
            qr_image_path: None,
            ..OrgInfo::default()
        };
        let bitmap = pipeline.rasterize(&student(), &org).expect("rasterize");
        let doc = render_receipt(&student(), &org, RenderTarget::Export);
        assert_eq!(bitmap.width, (doc.width * 2.0).ceil() as u32);
        assert_eq!(bitmap.height, (doc.height * 2.0).ceil() as u32);
        assert!(bitmap.is_opaque());
        assert_eq!(pipeline.host.live_containers(), 0);

        let png = bitmap.to_png().expect("encode");
        assert!(png.starts_with(&[0x89, b'P', b'N', b'G']));
        assert!(bitmap.to_data_url().expect("data url").starts_with("data:image/png;base64,"));
    }

    #[test]
    fn receipt_text_is_drawn() {
        let rasterizer = ResvgRasterizer::new(&[]).expect("fonts");
        let pipeline = ExportPipeline::new(Arc::new(rasterizer), Arc::new(FsAssets), RasterOptions::default());
        let org = OrgInfo {
            qr_image_path: None,
            ..OrgInfo::default()
        };
        let short = StudentRecord {
            name: "Nguyen Van A".into(),
            total_fee: 1.0,
            ..student()
        };
        let long = StudentRecord {
            name: "Trần Thị Bích Ngọc".into(),
            total_fee: 999_999_999.0,
            ..student()
        };
        let a = pipeline.rasterize(&short, &org).expect("rasterize");
        let b = pipeline.rasterize(&long, &org).expect("rasterize");
        assert_eq!((a.width, a.height), (b.width, b.height));
        assert_ne!(a.rgba, b.rgba, "student text must reach the bitmap");
    }

    #[test]
    fn embedded_fonts_provide_sans_serif() {
        let rasterizer = ResvgRasterizer::new(&[]).expect("fonts");
        assert_eq!(first_family(&rasterizer.fontdb).ok().as_deref(), Some("DejaVu Sans"));
        let empty = usvg::fontdb::Database::new();
        assert!(matches!(first_family(&empty), Err(RasterError::NoFonts)));
    }

    #[test]
    fn preview_scale_does_not_change_markup() {
        let pipeline = ExportPipeline::new(Arc::new(Failing), Arc::new(FsAssets), RasterOptions::default());
        let org = OrgInfo::default();
        let a = pipeline.preview(&student(), &org, 0.5);
        let b = pipeline.preview(&student(), &org, 1.5);
        assert_eq!(a.svg, b.svg);
        assert_eq!(a.container_scale, 0.5);
    }

    #[test]
    fn rejects_bad_scale() {
        let rasterizer = ResvgRasterizer::new(&[]).expect("fonts");
        let doc = assets::resolve(
            &render_receipt(&student(), &OrgInfo::default(), RenderTarget::Export),
            &FsAssets,
        );
        let opts = RasterOptions {
            scale: 0.0,
            ..RasterOptions::default()
        };
        assert!(matches!(rasterizer.render(&doc, &opts), Err(RasterError::InvalidScale(_))));
    }
}
