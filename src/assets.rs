use std::fmt::Write as _;
use std::path::Path;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;

use crate::receipt::{svg_envelope, ImageRole, Part, ReceiptDocument};

#[derive(Debug, thiserror::Error)]
pub enum AssetError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("{0} is not a supported image")]
    Unsupported(String),
}

/// Where receipt images come from.
pub trait AssetSource: Send + Sync {
    fn fetch(&self, source: &Path) -> Result<Vec<u8>, AssetError>;
}

/// Reads images from the local filesystem.
#[derive(Debug, Default, Clone, Copy)]
pub struct FsAssets;

impl AssetSource for FsAssets {
    fn fetch(&self, source: &Path) -> Result<Vec<u8>, AssetError> {
        std::fs::read(source).map_err(|e| AssetError::Io {
            path: source.to_string_lossy().to_string(),
            source: e,
        })
    }
}

pub fn sniff_mime(bytes: &[u8]) -> Option<&'static str> {
    if bytes.starts_with(&[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A]) {
        Some("image/png")
    } else if bytes.starts_with(&[0xFF, 0xD8, 0xFF]) {
        Some("image/jpeg")
    } else if bytes.starts_with(b"GIF87a") || bytes.starts_with(b"GIF89a") {
        Some("image/gif")
    } else if bytes.len() >= 12 && &bytes[0..4] == b"RIFF" && &bytes[8..12] == b"WEBP" {
        Some("image/webp")
    } else {
        None
    }
}

/// A receipt whose images have all settled, either embedded or hidden.
#[derive(Debug, Clone, PartialEq)]
pub struct ReadyDocument {
    pub svg: String,
    pub width: f32,
    pub height: f32,
    pub container_scale: f32,
    pub hidden: Vec<ImageRole>,
}

/// Loads every image slot before returning. Images that cannot be loaded are left out of
/// the markup; their space stays reserved so nothing below them moves.
pub fn resolve(doc: &ReceiptDocument, assets: &dyn AssetSource) -> ReadyDocument {
    let mut body = String::new();
    let mut hidden = Vec::new();

    for part in &doc.parts {
        match part {
            Part::Markup(m) => body.push_str(m),
            Part::Image(slot) => {
                let loaded = assets.fetch(&slot.source).and_then(|bytes| {
                    let mime = sniff_mime(&bytes).ok_or_else(|| {
                        AssetError::Unsupported(slot.source.to_string_lossy().to_string())
                    })?;
                    Ok((mime, bytes))
                });
                match loaded {
                    Ok((mime, bytes)) => {
                        let _ = write!(
                            body,
                            r#"<image x="{}" y="{}" width="{}" height="{}" preserveAspectRatio="xMidYMid meet" href="data:{};base64,{}"/>"#,
                            slot.x,
                            slot.y,
                            slot.width,
                            slot.height,
                            mime,
                            STANDARD.encode(&bytes)
                        );
                    }
                    Err(e) => {
                        log::debug!("hiding {:?} image: {e}", slot.role);
                        hidden.push(slot.role);
                    }
                }
            }
        }
    }

    ReadyDocument {
        svg: svg_envelope(doc.width, doc.height, &body),
        width: doc.width,
        height: doc.height,
        container_scale: doc.target.container_scale(),
        hidden,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OrgInfo;
    use crate::receipt::{render_receipt, RenderTarget};
    use crate::sheet::{StudentId, StudentRecord};
    use std::collections::HashMap;
    use std::path::PathBuf;

    struct MapAssets(HashMap<PathBuf, Vec<u8>>);

    impl AssetSource for MapAssets {
        fn fetch(&self, source: &Path) -> Result<Vec<u8>, AssetError> {
            self.0.get(source).cloned().ok_or_else(|| AssetError::Io {
                path: source.to_string_lossy().to_string(),
                source: std::io::Error::from(std::io::ErrorKind::NotFound),
            })
        }
    }

    fn student() -> StudentRecord {
        StudentRecord {
            id: StudentId(1),
            sequence_number: 1,
            name: "An".into(),
            class_name: "9A".into(),
            session_count: 4.0,
            price_per_session: 100000.0,
            total_fee: 400000.0,
        }
    }

    const PNG_MAGIC: [u8; 8] = [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];

    #[test]
    fn missing_qr_is_hidden_without_changing_size() {
        let org = OrgInfo::default();
        let doc = render_receipt(&student(), &org, RenderTarget::Export);
        let ready = resolve(&doc, &MapAssets(HashMap::new()));
        assert_eq!(ready.hidden, vec![ImageRole::PaymentQr]);
        assert!(!ready.svg.contains("<image"));
        assert_eq!(ready.height, doc.height);
    }

    #[test]
    fn loaded_images_are_inlined() {
        let org = OrgInfo {
            logo_path: Some(PathBuf::from("logo.png")),
            ..OrgInfo::default()
        };
        let mut files = HashMap::new();
        files.insert(PathBuf::from("logo.png"), PNG_MAGIC.to_vec());
        files.insert(PathBuf::from("images/qr1.png"), b"not an image".to_vec());
        let doc = render_receipt(&student(), &org, RenderTarget::Export);
        let ready = resolve(&doc, &MapAssets(files));
        assert_eq!(ready.hidden, vec![ImageRole::PaymentQr]);
        assert_eq!(ready.svg.matches("<image").count(), 1);
        assert!(ready.svg.contains("data:image/png;base64,"));
    }

    #[test]
    fn sniffs_common_formats() {
        assert_eq!(sniff_mime(&PNG_MAGIC), Some("image/png"));
        assert_eq!(sniff_mime(&[0xFF, 0xD8, 0xFF, 0xE0]), Some("image/jpeg"));
        assert_eq!(sniff_mime(b"GIF89a...."), Some("image/gif"));
        assert_eq!(sniff_mime(b"hello"), None);
    }
}
