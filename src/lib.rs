//! Normalizes raw device recordings into browser-playable video so they can
//! be labelled.
//!
//! ```no_run
//! use clipnorm::{normalize_directory, FfmpegConverter, NormalizerConfig};
//! use std::path::Path;
//!
//! let config = NormalizerConfig::default();
//! let report = normalize_directory(Path::new("public/data"), &FfmpegConverter::new(&config), &config)?;
//! assert!(report.is_success());
//! # Ok::<(), clipnorm::NormalizeError>(())
//! ```

mod config;
mod convert;
mod discover;
mod error;
mod logging;
mod normalize;
mod poster;
mod probe;
mod transcode;

pub use config::{
    AudioCodec, FailurePolicy, NormalizerConfig, VideoCodec, DEFAULT_INPUT_EXTENSION,
    DEFAULT_OUTPUT_EXTENSION,
};
pub use convert::{convert_one, Converter, FfmpegConverter, DURATION_TOLERANCE};
pub use discover::{find_sources, output_path_for};
pub use error::{NormalizeError, Result};
pub use logging::init_logging;
pub use normalize::{normalize_directory, normalize_directory_parallel, BatchReport};
pub use poster::write_poster;
pub use probe::{probe, MediaInfo};
pub use transcode::init;
