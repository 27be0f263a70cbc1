//! Image decoding and encoding services
//!
//! Keeps codec handling out of the processing pipeline so the pipeline only
//! ever sees decoded bitmaps.

pub mod format;
pub mod io;

pub use format::OutputFormatHandler;
pub use io::ImageIOService;
