//! Preview request and response types.

use std::sync::Arc;

use super::codec::CodecError;
use crate::settings::Settings;

/// Unique identifier for preview render requests.
///
/// Ids are allocated from one monotonically increasing counter per preview
/// service and never reset; a result is applied only while its id is still
/// the active one for its slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct RequestId(pub u64);

impl RequestId {
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }
}

/// The two preview surfaces kept per page.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PreviewSlot {
    /// Plain raster of the page, no enhancement or compression.
    Original,
    /// Enhanced raster with simulated compression artifacts.
    Processed,
}

/// Raw RGB bitmap handed back to the embedding view.
#[derive(Clone, Debug, PartialEq)]
pub struct PreviewImage {
    pub pixels: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

/// Request sent to the preview render worker.
#[derive(Debug)]
pub enum PreviewRequest {
    Render {
        id: RequestId,
        page: usize,
        slot: PreviewSlot,
        settings: Settings,
    },

    /// Shutdown the worker.
    Shutdown,
}

/// Response from the preview render worker.
#[derive(Debug)]
pub enum PreviewResponse {
    Rendered {
        id: RequestId,
        page: usize,
        slot: PreviewSlot,
        image: Arc<PreviewImage>,
    },

    Error {
        id: RequestId,
        page: usize,
        slot: PreviewSlot,
        error: CodecError,
    },
}
