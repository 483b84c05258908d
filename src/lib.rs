// Export modules for use in tests
pub mod assembler;
pub mod luma;
pub mod pipeline;
pub mod settings;
pub mod transform;

// Re-export the main pipeline components
pub use pipeline::{CompressionJob, MupdfCodec, PageCodec, PreviewService, ProgressEvent};
pub use settings::Settings;
pub use transform::{OutputFormat, TransformedImage};
