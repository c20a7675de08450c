use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use clap::Parser;
use clipnorm::{
    init_logging, normalize_directory, normalize_directory_parallel, AudioCodec, FailurePolicy,
    FfmpegConverter, NormalizerConfig, VideoCodec, DEFAULT_INPUT_EXTENSION,
    DEFAULT_OUTPUT_EXTENSION,
};

#[derive(Parser)]
#[command(name = "clipnorm", version)]
#[command(about = "Convert raw recordings into browser-playable video before labelling", long_about = None)]
struct Cli {
    /// Directory holding the recordings (not searched recursively)
    #[arg(env = "CLIPNORM_MEDIA_DIR", default_value = "public/data")]
    media_dir: PathBuf,
    /// Extension of source recordings
    #[arg(long, default_value = DEFAULT_INPUT_EXTENSION)]
    input_ext: String,
    /// Extension of normalized recordings
    #[arg(long, default_value = DEFAULT_OUTPUT_EXTENSION)]
    output_ext: String,
    #[arg(long, value_enum, default_value_t = VideoCodec::H264)]
    video_codec: VideoCodec,
    #[arg(long, value_enum, default_value_t = AudioCodec::Aac)]
    audio_codec: AudioCodec,
    /// Keep normalized recordings that already exist
    #[arg(long)]
    skip_existing: bool,
    /// Stop at the first failed conversion
    #[arg(long)]
    fail_fast: bool,
    /// Skip probing the encoded file before it replaces the output
    #[arg(long)]
    no_verify: bool,
    /// Also write a JPEG poster frame next to each output
    #[arg(long)]
    poster: bool,
    /// Conversions to run at once
    #[arg(short, long, env = "CLIPNORM_JOBS", default_value_t = 1)]
    jobs: usize,
    #[arg(short, long)]
    verbose: bool,
}

impl Cli {
    fn config(&self) -> NormalizerConfig {
        let failure_policy = if self.fail_fast {
            FailurePolicy::FailFast
        } else {
            FailurePolicy::Continue
        };
        NormalizerConfig {
            video_codec: self.video_codec,
            audio_codec: self.audio_codec,
            verify: !self.no_verify,
            poster: self.poster,
            ..NormalizerConfig::default()
        }
        .with_extensions(&self.input_ext, &self.output_ext)
        .with_skip_existing(self.skip_existing)
        .with_failure_policy(failure_policy)
        .with_jobs(self.jobs)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose)?;
    clipnorm::init()?;

    let config = cli.config();
    config.validate()?;
    let converter = Arc::new(FfmpegConverter::new(&config));
    let started = Instant::now();

    let report = if config.jobs > 1 {
        normalize_directory_parallel(&cli.media_dir, converter, &config).await?
    } else {
        normalize_directory(&cli.media_dir, converter.as_ref(), &config)?
    };
    report.log_summary(started.elapsed());

    if !report.is_success() {
        anyhow::bail!(
            "{} of {} recordings failed to normalize",
            report.failed.len(),
            report.total()
        );
    }
    Ok(())
}
