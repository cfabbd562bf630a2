use std::collections::HashSet;
use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use serde_json::json;
use sha2::{Digest, Sha256};
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::raster::{png_data_url, RasterError};
use crate::sheet::StudentRecord;

const MANIFEST_ENTRY: &str = "manifest.json";
pub const ARCHIVE_FORMAT: &str = "receiptd-batch-v1";

#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    #[error(transparent)]
    Render(#[from] RasterError),
    #[error("failed to write {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("archive error: {0}")]
    Archive(#[from] zip::result::ZipError),
    #[error("clipboard is not available: {0}")]
    ClipboardUnsupported(String),
    #[error("clipboard write failed: {0}")]
    ClipboardFailed(String),
}

impl ExportError {
    fn io(path: &Path, source: std::io::Error) -> Self {
        ExportError::Io {
            path: path.to_string_lossy().to_string(),
            source,
        }
    }
}

/// `{name}_{class}.png`; class is left out when empty. Characters that would escape the
/// output directory or break a file name are replaced with `_`.
pub fn file_name_for(student: &StudentRecord) -> String {
    let name = if student.name.trim().is_empty() {
        "phieu"
    } else {
        student.name.trim()
    };
    let stem = if student.class_name.trim().is_empty() {
        name.to_string()
    } else {
        format!("{}_{}", name, student.class_name.trim())
    };
    format!("{}.png", sanitize_stem(&stem))
}

pub fn sanitize_stem(stem: &str) -> String {
    let cleaned: String = stem
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();
    let trimmed = cleaned.trim_matches(|c: char| c == '.' || c.is_whitespace());
    if trimmed.is_empty() {
        "phieu".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Where downloaded receipts go.
pub trait DownloadSink: Send {
    /// Stores one image; returns the name it was stored under.
    fn save(&mut self, file_name: &str, png: &[u8]) -> Result<String, ExportError>;
    /// Completes the destination. Returns the archive path for bundled sinks.
    fn finish(&mut self) -> Result<Option<PathBuf>, ExportError> {
        Ok(None)
    }
}

/// Second and later uses of a name get ` (2)`, ` (3)`, ... before the extension.
#[derive(Debug, Default)]
struct UniqueNames {
    used: HashSet<String>,
}

impl UniqueNames {
    fn claim(&mut self, file_name: &str) -> String {
        if self.used.insert(file_name.to_lowercase()) {
            return file_name.to_string();
        }
        let (stem, ext) = match file_name.rsplit_once('.') {
            Some((s, e)) => (s, format!(".{e}")),
            None => (file_name, String::new()),
        };
        let mut n = 2;
        loop {
            let candidate = format!("{stem} ({n}){ext}");
            if self.used.insert(candidate.to_lowercase()) {
                return candidate;
            }
            n += 1;
        }
    }
}

/// One PNG file per receipt in a directory.
#[derive(Debug)]
pub struct DirectorySink {
    dir: PathBuf,
    names: UniqueNames,
}

impl DirectorySink {
    pub fn create(dir: &Path) -> Result<Self, ExportError> {
        std::fs::create_dir_all(dir).map_err(|e| ExportError::io(dir, e))?;
        Ok(Self {
            dir: dir.to_path_buf(),
            names: UniqueNames::default(),
        })
    }
}

impl DownloadSink for DirectorySink {
    fn save(&mut self, file_name: &str, png: &[u8]) -> Result<String, ExportError> {
        let mut name = self.names.claim(file_name);
        // Files left by an earlier export are not overwritten.
        while self.dir.join(&name).exists() {
            name = self.names.claim(file_name);
        }
        let path = self.dir.join(&name);
        std::fs::write(&path, png).map_err(|e| ExportError::io(&path, e))?;
        Ok(path.to_string_lossy().to_string())
    }
}

/// All receipts of a batch in one zip, with a manifest carrying a SHA-256 per entry.
pub struct ZipSink {
    path: PathBuf,
    zip: Option<ZipWriter<File>>,
    names: UniqueNames,
    entries: Vec<serde_json::Value>,
    sheet_name: String,
}

impl ZipSink {
    pub fn create(path: &Path, sheet_name: &str) -> Result<Self, ExportError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ExportError::io(parent, e))?;
        }
        let (file, path) = create_new_unique(path)?;
        Ok(Self {
            path,
            zip: Some(ZipWriter::new(file)),
            names: UniqueNames::default(),
            entries: Vec::new(),
            sheet_name: sheet_name.to_string(),
        })
    }

    /// Where the archive is written; differs from the requested path when that was taken.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn writer(&mut self) -> Result<&mut ZipWriter<File>, ExportError> {
        self.zip
            .as_mut()
            .ok_or(ExportError::Archive(zip::result::ZipError::FileNotFound))
    }
}

impl DownloadSink for ZipSink {
    fn save(&mut self, file_name: &str, png: &[u8]) -> Result<String, ExportError> {
        let name = self.names.claim(file_name);
        // PNG data is already deflated.
        let opts = FileOptions::default().compression_method(CompressionMethod::Stored);
        let zip = self.writer()?;
        zip.start_file(name.as_str(), opts)?;
        zip.write_all(png).map_err(|e| ExportError::io(Path::new(&name), e))?;
        self.entries.push(json!({
            "name": name,
            "bytes": png.len(),
            "sha256": hex_digest(png),
        }));
        Ok(name)
    }

    fn finish(&mut self) -> Result<Option<PathBuf>, ExportError> {
        let Some(mut zip) = self.zip.take() else {
            return Ok(Some(self.path.clone()));
        };
        let manifest = json!({
            "format": ARCHIVE_FORMAT,
            "appVersion": env!("CARGO_PKG_VERSION"),
            "exportedAt": chrono::Utc::now().to_rfc3339(),
            "sheetName": self.sheet_name,
            "entries": self.entries,
        });
        let opts = FileOptions::default().compression_method(CompressionMethod::Deflated);
        zip.start_file(MANIFEST_ENTRY, opts)?;
        let text = serde_json::to_string_pretty(&manifest).unwrap_or_else(|_| "{}".to_string());
        zip.write_all(text.as_bytes())
            .map_err(|e| ExportError::io(&self.path, e))?;
        zip.finish()?;
        Ok(Some(self.path.clone()))
    }
}

/// Creates `path`, or `stem (2).ext`, `stem (3).ext`, ... when it already exists.
fn create_new_unique(path: &Path) -> Result<(File, PathBuf), ExportError> {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();
    let ext = path
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();
    let mut candidate = path.to_path_buf();
    let mut n = 1;
    loop {
        match OpenOptions::new().write(true).create_new(true).open(&candidate) {
            Ok(file) => return Ok((file, candidate)),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                n += 1;
                candidate = path.with_file_name(format!("{stem} ({n}){ext}"));
            }
            Err(e) => return Err(ExportError::io(&candidate, e)),
        }
    }
}

fn hex_digest(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

#[derive(Debug, Clone, PartialEq)]
pub enum ClipboardOutcome {
    /// The image is on the system clipboard.
    Written,
    /// The host should place this PNG data URL on its clipboard.
    Forwarded { data_url: String },
}

pub trait Clipboard: Send {
    fn write_png(&mut self, png: &[u8]) -> Result<ClipboardOutcome, ExportError>;
}

/// Hands the PNG back to the host UI, which owns the real clipboard.
#[derive(Debug, Default)]
pub struct HostClipboard;

impl Clipboard for HostClipboard {
    fn write_png(&mut self, png: &[u8]) -> Result<ClipboardOutcome, ExportError> {
        Ok(ClipboardOutcome::Forwarded {
            data_url: png_data_url(png),
        })
    }
}

/// Pipes the PNG into an external clipboard tool such as `wl-copy --type image/png`.
#[derive(Debug)]
pub struct CommandClipboard {
    argv: Vec<String>,
}

impl CommandClipboard {
    pub fn new(argv: Vec<String>) -> Self {
        Self { argv }
    }
}

impl Clipboard for CommandClipboard {
    fn write_png(&mut self, png: &[u8]) -> Result<ClipboardOutcome, ExportError> {
        let Some((program, args)) = self.argv.split_first() else {
            return Err(ExportError::ClipboardUnsupported(
                "no clipboard command configured".to_string(),
            ));
        };
        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| ExportError::ClipboardUnsupported(format!("{program}: {e}")))?;
        if let Some(mut stdin) = child.stdin.take() {
            if let Err(e) = stdin.write_all(png) {
                drop(stdin);
                // The tool may still be running; never leave it unreaped.
                let _ = child.kill();
                let _ = child.wait();
                return Err(ExportError::ClipboardFailed(e.to_string()));
            }
        }
        let status = child
            .wait()
            .map_err(|e| ExportError::ClipboardFailed(e.to_string()))?;
        if status.success() {
            Ok(ClipboardOutcome::Written)
        } else {
            Err(ExportError::ClipboardFailed(format!("{program} exited with {status}")))
        }
    }
}
