use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use image::{GenericImageView, ImageFormat};

use crate::error::StagingError;

use super::DraftId;

/// Displayable stand-in for a staged image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImagePreview {
    pub mime: &'static str,
    pub data_url: String,
    pub byte_len: usize,
    pub dimensions: Option<(u32, u32)>,
}

impl ImagePreview {
    pub fn summary(&self) -> String {
        let size = human_bytes(self.byte_len);
        match self.dimensions {
            Some((w, h)) => format!("{} {w}x{h}, {size}", self.mime),
            None => format!("{}, {size}", self.mime),
        }
    }
}

const SUPPORTED: [ImageFormat; 5] = [
    ImageFormat::Png,
    ImageFormat::Jpeg,
    ImageFormat::Gif,
    ImageFormat::WebP,
    ImageFormat::Bmp,
];

/// Format guessed from the leading bytes, limited to what the server accepts.
pub fn sniff_format(bytes: &[u8]) -> Option<ImageFormat> {
    image::guess_format(bytes)
        .ok()
        .filter(|format| SUPPORTED.contains(format))
}

pub fn sniff_mime(bytes: &[u8]) -> Option<&'static str> {
    sniff_format(bytes).map(|format| format.to_mime_type())
}

/// Decodes the whole image so a truncated or corrupt file is caught before upload.
pub fn derive_preview(bytes: &[u8]) -> Result<ImagePreview, StagingError> {
    let format = sniff_format(bytes).ok_or(StagingError::UnsupportedImage)?;
    let decoded = image::load_from_memory_with_format(bytes, format)
        .map_err(|err| StagingError::CorruptImage(err.to_string()))?;
    let mime = format.to_mime_type();
    let encoded = STANDARD.encode(bytes);
    Ok(ImagePreview {
        mime,
        data_url: format!("data:{mime};base64,{encoded}"),
        byte_len: bytes.len(),
        dimensions: Some(decoded.dimensions()),
    })
}

fn human_bytes(len: usize) -> String {
    const KIB: f64 = 1024.0;
    let len_f = len as f64;
    if len_f >= KIB * KIB {
        format!("{:.1} MiB", len_f / (KIB * KIB))
    } else if len_f >= KIB {
        format!("{:.1} KiB", len_f / KIB)
    } else {
        format!("{len} B")
    }
}

/// Identifies which draft, and which image staged into it, a preview belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PreviewTicket {
    pub draft: DraftId,
    pub seq: u64,
}

/// Off-thread preview derivation that can be abandoned before or while it runs.
#[derive(Debug)]
pub struct PreviewJob {
    ticket: PreviewTicket,
    bytes: Arc<[u8]>,
    cancelled: Arc<AtomicBool>,
}

#[derive(Debug, Clone)]
pub struct PreviewHandle {
    ticket: PreviewTicket,
    cancelled: Arc<AtomicBool>,
}

#[derive(Debug, Clone)]
pub struct PreviewOutcome {
    pub ticket: PreviewTicket,
    pub result: Result<ImagePreview, StagingError>,
}

impl PreviewJob {
    pub(crate) fn new(ticket: PreviewTicket, bytes: Arc<[u8]>) -> Self {
        Self {
            ticket,
            bytes,
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn ticket(&self) -> PreviewTicket {
        self.ticket
    }

    pub fn handle(&self) -> PreviewHandle {
        PreviewHandle {
            ticket: self.ticket,
            cancelled: Arc::clone(&self.cancelled),
        }
    }

    /// Returns `None` when the job was cancelled before or during derivation.
    pub fn run(self) -> Option<PreviewOutcome> {
        if self.cancelled.load(Ordering::Acquire) {
            return None;
        }
        let result = derive_preview(&self.bytes);
        if self.cancelled.load(Ordering::Acquire) {
            return None;
        }
        Some(PreviewOutcome {
            ticket: self.ticket,
            result,
        })
    }
}

impl PreviewHandle {
    pub fn ticket(&self) -> PreviewTicket {
        self.ticket
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}
