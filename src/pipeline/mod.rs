//! Page processing pipeline: batch compression and interactive preview.

mod codec;
mod pool;
mod preview;
mod request;
mod state;

pub use codec::{
    CodecError, EncodedImage, MupdfCodec, PageCodec, PageResult, PageSizePts, encode,
    pack_bilevel_rows,
};
pub use pool::{CompressionJob, ProgressEvent, RunError, RunOutcome, run_compression};
pub use preview::{PreviewEvent, PreviewService, preview_worker};
pub use request::{PreviewImage, PreviewRequest, PreviewResponse, PreviewSlot, RequestId};
pub use state::{Command, DEBOUNCE_WINDOW, Effect, PreviewState};

/// DPI used for the untouched "original" preview slot, independent of the
/// target DPI being previewed.
pub const PREVIEW_ORIGINAL_DPI: u32 = 150;
