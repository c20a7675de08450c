use std::path::Path;
use std::time::{Duration, Instant};

use ffmpeg_next::format;
use tracing::{debug, info, warn};

use crate::config::{AudioCodec, NormalizerConfig, VideoCodec};
use crate::error::{NormalizeError, Result};
use crate::poster;
use crate::probe::{probe, MediaInfo};
use crate::transcode::{self, transcode_file, DecodeError};

/// Largest accepted difference between source and output duration.
pub const DURATION_TOLERANCE: Duration = Duration::from_secs(1);

/// Turns one source recording into one normalized recording.
pub trait Converter: Send + Sync {
    fn convert(&self, source: &Path, output: &Path) -> Result<()>;
}

/// [`Converter`] backed by the in-process ffmpeg pipeline.
#[derive(Debug, Clone)]
pub struct FfmpegConverter {
    video_codec: VideoCodec,
    audio_codec: AudioCodec,
    verify: bool,
    poster: bool,
}

impl FfmpegConverter {
    pub fn new(config: &NormalizerConfig) -> Self {
        Self {
            video_codec: config.video_codec,
            audio_codec: config.audio_codec,
            verify: config.verify,
            poster: config.poster,
        }
    }
}

impl Default for FfmpegConverter {
    fn default() -> Self {
        Self::new(&NormalizerConfig::default())
    }
}

impl Converter for FfmpegConverter {
    fn convert(&self, source: &Path, output: &Path) -> Result<()> {
        if is_same_file(source, output) {
            return Err(NormalizeError::encode_failure(
                source,
                format!("output {} would replace the source", output.display()),
            ));
        }
        transcode::init().map_err(|e| NormalizeError::encode_failure(source, e))?;
        let started = Instant::now();

        let mut input =
            format::input(source).map_err(|e| NormalizeError::source_unreadable(source, e))?;
        let source_info = MediaInfo::from_input(&input);
        if !source_info.has_video() && !source_info.has_audio() {
            return Err(NormalizeError::source_unreadable(
                source,
                "no audio or video stream",
            ));
        }

        // Encode next to the output so the final rename stays on one filesystem.
        let parent = output
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or(Path::new("."));
        let extension = output
            .extension()
            .and_then(|ext| ext.to_str())
            .unwrap_or("mp4");
        let temp_path = tempfile::Builder::new()
            .prefix(".clipnorm-")
            .suffix(&format!(".{extension}"))
            .tempfile_in(parent)
            .map_err(|e| {
                NormalizeError::encode_failure(
                    source,
                    format!("cannot write to {}: {e}", parent.display()),
                )
            })?
            .into_temp_path();
        debug!(temp = %temp_path.display(), "Encoding into temporary file");

        transcode_file(&mut input, &temp_path, self.video_codec, self.audio_codec)
            .map_err(|e| pipeline_error(source, e))?;
        drop(input);

        if self.verify {
            verify_output(&temp_path, &source_info)
                .map_err(|e| NormalizeError::encode_failure(source, format!("{e:#}")))?;
        }

        temp_path.persist(output).map_err(|e| {
            NormalizeError::encode_failure(
                source,
                format!("cannot move into {}: {}", output.display(), e.error),
            )
        })?;
        info!(
            source = %source.display(),
            output = %output.display(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Converted"
        );

        if self.poster && source_info.has_video() {
            let poster_path = output.with_extension("jpg");
            if let Err(e) = poster::write_poster(output, &poster_path) {
                warn!(output = %output.display(), error = %format!("{e:#}"), "Poster not written");
            }
        }

        Ok(())
    }
}

/// Converts `source` into `output` using the codecs and checks in `config`.
pub fn convert_one(source: &Path, output: &Path, config: &NormalizerConfig) -> Result<()> {
    config.validate()?;
    FfmpegConverter::new(config).convert(source, output)
}

/// Decoder-side failures mean the source is bad; the rest is ours.
fn pipeline_error(source: &Path, err: anyhow::Error) -> NormalizeError {
    if err.downcast_ref::<DecodeError>().is_some() {
        NormalizeError::source_unreadable(source, format!("{err:#}"))
    } else {
        NormalizeError::encode_failure(source, format!("{err:#}"))
    }
}

fn is_same_file(source: &Path, output: &Path) -> bool {
    if source == output {
        return true;
    }
    #[cfg(unix)]
    {
        use std::os::unix::fs::MetadataExt;
        if let (Ok(a), Ok(b)) = (std::fs::metadata(source), std::fs::metadata(output)) {
            return a.dev() == b.dev() && a.ino() == b.ino();
        }
    }
    false
}

fn verify_output(encoded: &Path, source: &MediaInfo) -> anyhow::Result<()> {
    let info = probe(encoded)?;
    anyhow::ensure!(
        info.has_video() == source.has_video() && info.has_audio() == source.has_audio(),
        "output streams differ from source (video: {}, audio: {})",
        info.has_video(),
        info.has_audio()
    );
    let duration = info
        .duration
        .filter(|d| !d.is_zero())
        .ok_or(anyhow::anyhow!("output has no duration"))?;
    if let Some(expected) = source.duration {
        let drift = if duration > expected {
            duration - expected
        } else {
            expected - duration
        };
        anyhow::ensure!(
            drift <= DURATION_TOLERANCE,
            "output lasts {:.2}s, source {:.2}s",
            duration.as_secs_f64(),
            expected.as_secs_f64()
        );
    }
    Ok(())
}
