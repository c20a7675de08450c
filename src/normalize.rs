//! Batch normalization of a media directory.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info};

use crate::config::{FailurePolicy, NormalizerConfig};
use crate::convert::Converter;
use crate::discover::{find_sources, output_path_for};
use crate::error::{NormalizeError, Result};

/// Outcome of one batch run.
#[derive(Debug, Default)]
pub struct BatchReport {
    /// Normalized recordings written in this run.
    pub converted: Vec<PathBuf>,
    /// Source recordings left alone because their output already existed.
    pub skipped: Vec<PathBuf>,
    /// Source recordings whose conversion failed.
    pub failed: Vec<(PathBuf, NormalizeError)>,
}

impl BatchReport {
    pub fn total(&self) -> usize {
        self.converted.len() + self.skipped.len() + self.failed.len()
    }

    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }

    pub fn log_summary(&self, elapsed: Duration) {
        info!(
            total = self.total(),
            converted = self.converted.len(),
            skipped = self.skipped.len(),
            failed = self.failed.len(),
            elapsed_s = elapsed.as_secs_f64(),
            "Normalization finished"
        );
        for (source, err) in &self.failed {
            error!(source = %source.display(), kind = err.kind(), "{err}");
        }
    }

    fn record(&mut self, source: PathBuf, output: PathBuf, result: Result<()>) {
        match result {
            Ok(()) => self.converted.push(output),
            Err(err) => {
                error!(source = %source.display(), kind = err.kind(), "{err}");
                self.failed.push((source, err));
            }
        }
    }
}

enum Job {
    Convert { source: PathBuf, output: PathBuf },
    Skip { source: PathBuf, output: PathBuf },
}

fn plan(dir: &Path, config: &NormalizerConfig) -> Result<Vec<Job>> {
    config.validate()?;
    let sources = find_sources(dir, &config.input_extension)?;
    info!(
        dir = %dir.display(),
        sources = sources.len(),
        "Converting all .{} files to .{}",
        config.input_extension,
        config.output_extension
    );
    Ok(sources
        .into_iter()
        .filter_map(|source| {
            let output =
                output_path_for(&source, &config.input_extension, &config.output_extension)?;
            if config.skip_existing && output.exists() {
                Some(Job::Skip { source, output })
            } else {
                Some(Job::Convert { source, output })
            }
        })
        .collect())
}

/// Converts every source recording in `dir`, one at a time.
///
/// Under [`FailurePolicy::FailFast`] the first failed conversion is returned
/// as the error and the rest of the directory is left untouched. Under
/// [`FailurePolicy::Continue`] failures are collected in the report.
pub fn normalize_directory<C>(
    dir: &Path,
    converter: &C,
    config: &NormalizerConfig,
) -> Result<BatchReport>
where
    C: Converter + ?Sized,
{
    let mut report = BatchReport::default();
    for job in plan(dir, config)? {
        match job {
            Job::Skip { source, output } => {
                debug!(output = %output.display(), "Already normalized, skipping");
                report.skipped.push(source);
            }
            Job::Convert { source, output } => {
                info!("Converting {} to .{}", source.display(), config.output_extension);
                let result = converter.convert(&source, &output);
                if config.failure_policy == FailurePolicy::FailFast {
                    result?;
                    report.converted.push(output);
                } else {
                    report.record(source, output, result);
                }
            }
        }
    }
    Ok(report)
}

/// Like [`normalize_directory`], but runs up to `config.jobs` conversions at
/// once on tokio's blocking pool.
///
/// Under [`FailurePolicy::FailFast`] the first failure cancels conversions
/// that have not started yet; ones already running finish on their own.
pub async fn normalize_directory_parallel<C>(
    dir: &Path,
    converter: Arc<C>,
    config: &NormalizerConfig,
) -> Result<BatchReport>
where
    C: Converter + ?Sized + 'static,
{
    let semaphore = Arc::new(Semaphore::new(config.jobs.max(1)));
    let mut tasks = JoinSet::new();
    let mut report = BatchReport::default();

    for job in plan(dir, config)? {
        match job {
            Job::Skip { source, output } => {
                debug!(output = %output.display(), "Already normalized, skipping");
                report.skipped.push(source);
            }
            Job::Convert { source, output } => {
                let converter = Arc::clone(&converter);
                let semaphore = Arc::clone(&semaphore);
                tasks.spawn(async move {
                    let _permit = semaphore.acquire_owned().await;
                    info!("Converting {}", source.display());
                    let (s, o) = (source.clone(), output.clone());
                    let result = tokio::task::spawn_blocking(move || converter.convert(&s, &o))
                        .await
                        .unwrap_or_else(|join_error| {
                            Err(NormalizeError::encode_failure(&source, join_error))
                        });
                    (source, output, result)
                });
            }
        }
    }

    while let Some(joined) = tasks.join_next().await {
        let (source, output, result) = match joined {
            Ok(outcome) => outcome,
            Err(join_error) => {
                debug!(%join_error, "Conversion task cancelled");
                continue;
            }
        };
        match result {
            Err(err) if config.failure_policy == FailurePolicy::FailFast => {
                tasks.shutdown().await;
                return Err(err);
            }
            result => report.record(source, output, result),
        }
    }

    report.converted.sort();
    report.failed.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(report)
}
