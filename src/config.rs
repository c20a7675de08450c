use clap::ValueEnum;
use ffmpeg_next::codec;

use crate::error::{NormalizeError, Result};

pub const DEFAULT_INPUT_EXTENSION: &str = "mov";
pub const DEFAULT_OUTPUT_EXTENSION: &str = "mp4";

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum VideoCodec {
    H264,
    Hevc,
}

impl VideoCodec {
    pub(crate) fn id(self) -> codec::Id {
        match self {
            VideoCodec::H264 => codec::Id::H264,
            VideoCodec::Hevc => codec::Id::HEVC,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum AudioCodec {
    Aac,
    Mp3,
}

impl AudioCodec {
    pub(crate) fn id(self) -> codec::Id {
        match self {
            AudioCodec::Aac => codec::Id::AAC,
            AudioCodec::Mp3 => codec::Id::MP3,
        }
    }
}

/// What the batch does when a single conversion fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FailurePolicy {
    /// Abort the remaining batch on the first failure.
    FailFast,
    /// Record the failure and move on to the next recording.
    #[default]
    Continue,
}

/// Everything the normalizer needs; nothing is read from globals.
#[derive(Debug, Clone)]
pub struct NormalizerConfig {
    /// Extension of source recordings, without the leading dot.
    pub input_extension: String,
    /// Extension of normalized recordings, without the leading dot.
    pub output_extension: String,
    pub video_codec: VideoCodec,
    pub audio_codec: AudioCodec,
    /// Leave an existing normalized recording alone instead of re-encoding.
    pub skip_existing: bool,
    pub failure_policy: FailurePolicy,
    /// Probe the encoded file before it replaces the output path.
    pub verify: bool,
    /// Write `<base>.jpg` from the first video frame of each output.
    pub poster: bool,
    /// Maximum concurrent conversions. 1 runs the batch sequentially.
    pub jobs: usize,
}

impl Default for NormalizerConfig {
    fn default() -> Self {
        Self {
            input_extension: DEFAULT_INPUT_EXTENSION.to_owned(),
            output_extension: DEFAULT_OUTPUT_EXTENSION.to_owned(),
            video_codec: VideoCodec::H264,
            audio_codec: AudioCodec::Aac,
            skip_existing: false,
            failure_policy: FailurePolicy::Continue,
            verify: true,
            poster: false,
            jobs: 1,
        }
    }
}

impl NormalizerConfig {
    pub fn with_extensions(mut self, input: &str, output: &str) -> Self {
        self.input_extension = trim_dot(input).to_owned();
        self.output_extension = trim_dot(output).to_owned();
        self
    }

    pub fn with_skip_existing(mut self, skip_existing: bool) -> Self {
        self.skip_existing = skip_existing;
        self
    }

    pub fn with_failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.failure_policy = policy;
        self
    }

    pub fn with_jobs(mut self, jobs: usize) -> Self {
        self.jobs = jobs.max(1);
        self
    }

    /// Rejects settings under which an output could land on its source.
    pub fn validate(&self) -> Result<()> {
        if self.input_extension.is_empty() || self.output_extension.is_empty() {
            return Err(NormalizeError::InvalidConfig {
                reason: "input and output extensions must not be empty".to_owned(),
            });
        }
        // Case-insensitive filesystems treat clip.MOV and clip.mov as one file.
        if self
            .input_extension
            .eq_ignore_ascii_case(&self.output_extension)
        {
            return Err(NormalizeError::InvalidConfig {
                reason: format!(
                    "output extension .{} would overwrite .{} recordings",
                    self.output_extension, self.input_extension
                ),
            });
        }
        Ok(())
    }
}

fn trim_dot(extension: &str) -> &str {
    extension.strip_prefix('.').unwrap_or(extension)
}
