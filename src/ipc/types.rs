use std::sync::mpsc::Sender;
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use serde::Deserialize;
use uuid::Uuid;

use crate::assets::FsAssets;
use crate::batch::{BatchStatus, CancelToken};
use crate::clock::{Clock, SystemClock};
use crate::config::{OrgInfo, Settings};
use crate::export::{Clipboard, CommandClipboard, DownloadSink, HostClipboard};
use crate::ipc::error::event;
use crate::raster::{ExportPipeline, RasterError, RasterOptions, ResvgRasterizer};
use crate::registry::Registry;
use crate::sheet::StudentRecord;

#[derive(Debug, Deserialize, Clone)]
pub struct Request {
    pub id: String,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

/// Outbound line channel. Responses and events share it so lines never interleave.
#[derive(Debug, Clone)]
pub struct Outbox(Sender<serde_json::Value>);

impl Outbox {
    pub fn new(tx: Sender<serde_json::Value>) -> Self {
        Self(tx)
    }

    pub fn send(&self, msg: serde_json::Value) {
        if self.0.send(msg).is_err() {
            log::debug!("outbox closed; dropping message");
        }
    }

    pub fn event(&self, name: &str, payload: serde_json::Value) {
        self.send(event(name, payload));
    }
}

/// A batch accepted by `batch.start`, started once its response has been written.
pub struct PendingBatch {
    pub job_id: Uuid,
    pub items: Vec<StudentRecord>,
    pub org: OrgInfo,
    pub sink: Box<dyn DownloadSink>,
}

#[derive(Default)]
pub struct BatchSlot {
    pub status: Arc<Mutex<BatchStatus>>,
    pub cancel: Option<CancelToken>,
    pub worker: Option<JoinHandle<()>>,
    pub pending: Option<PendingBatch>,
}

pub struct AppState {
    pub settings: Settings,
    pub registry: Registry,
    pub pipeline: ExportPipeline,
    pub clock: Arc<dyn Clock>,
    pub clipboard: Box<dyn Clipboard>,
    pub outbox: Outbox,
    pub batch: BatchSlot,
}

impl AppState {
    pub fn new(settings: Settings, outbox: Outbox) -> Result<Self, RasterError> {
        let rasterizer = ResvgRasterizer::new(&settings.font_dirs)?;
        let options = RasterOptions {
            scale: settings.raster_scale,
            ..RasterOptions::default()
        };
        let pipeline = ExportPipeline::new(Arc::new(rasterizer), Arc::new(FsAssets), options);
        let clipboard: Box<dyn Clipboard> = match &settings.clipboard_command {
            Some(argv) => Box::new(CommandClipboard::new(argv.clone())),
            None => Box::new(HostClipboard),
        };
        Ok(Self {
            settings,
            registry: Registry::default(),
            pipeline,
            clock: Arc::new(SystemClock),
            clipboard,
            outbox,
            batch: BatchSlot::default(),
        })
    }
}
