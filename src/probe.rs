use std::path::Path;
use std::time::Duration;

use ffmpeg_next::{codec, format, media, rescale};

/// Container-level facts about a recording. Attached pictures (cover art)
/// do not count as video.
#[derive(Debug, Clone, PartialEq)]
pub struct MediaInfo {
    /// `None` when the container does not declare a duration.
    pub duration: Option<Duration>,
    pub video_codec: Option<codec::Id>,
    pub audio_codec: Option<codec::Id>,
}

impl MediaInfo {
    pub(crate) fn from_input(input: &format::context::Input) -> Self {
        let duration = match input.duration() {
            d if d > 0 => Some(Duration::from_secs_f64(
                d as f64 * f64::from(rescale::TIME_BASE),
            )),
            _ => None,
        };
        // Cover art is a video stream to ffmpeg but is never transcoded.
        let codec_of = |kind: media::Type| {
            input
                .streams()
                .filter(|stream| {
                    !stream
                        .disposition()
                        .contains(format::stream::Disposition::ATTACHED_PIC)
                })
                .find(|stream| stream.parameters().medium() == kind)
                .map(|stream| stream.parameters().id())
        };

        Self {
            duration,
            video_codec: codec_of(media::Type::Video),
            audio_codec: codec_of(media::Type::Audio),
        }
    }

    pub fn has_video(&self) -> bool {
        self.video_codec.is_some()
    }

    pub fn has_audio(&self) -> bool {
        self.audio_codec.is_some()
    }
}

/// Opens `path` as a media container and reads its [`MediaInfo`].
pub fn probe(path: &Path) -> anyhow::Result<MediaInfo> {
    crate::transcode::init()?;
    let input = format::input(path)?;
    Ok(MediaInfo::from_input(&input))
}
