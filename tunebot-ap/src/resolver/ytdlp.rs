//! yt-dlp backed content resolver
//!
//! Each resolve runs one `yt-dlp` child process that downloads into a
//! private staging directory under the songs directory. The file is moved
//! into the songs directory only after yt-dlp exits successfully, so an
//! interrupted, failed or timed-out download never leaves a file the cache
//! could point at. The staging directory is removed on every path.

use super::{ContentResolver, ResolvedTrack};
use crate::config::ResolverConfig;
use crate::error::ResolutionError;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info, warn};

/// Fields printed by yt-dlp after the file has been moved to its final name
const PRINT_FIELDS: [&str; 3] = ["after_move:filepath", "after_move:title", "after_move:webpage_url"];

pub struct YtDlpResolver {
    program: String,
    format: String,
    output_template: String,
    cookie_file: Option<PathBuf>,
    extra_args: Vec<String>,
    timeout: Duration,
    songs_dir: PathBuf,
}

impl YtDlpResolver {
    pub fn new(config: &ResolverConfig, songs_dir: impl Into<PathBuf>) -> Self {
        Self {
            program: config.program.clone(),
            format: config.format.clone(),
            output_template: config.output_template.clone(),
            cookie_file: config.cookie_file.clone(),
            extra_args: config.extra_args.clone(),
            timeout: config.timeout(),
            songs_dir: songs_dir.into(),
        }
    }

    fn build_args(&self, staging_dir: &Path, reference: &str) -> Vec<String> {
        let mut args = vec![
            "--no-playlist".to_string(),
            "--no-progress".to_string(),
            "--restrict-filenames".to_string(),
            "--default-search".to_string(),
            "auto".to_string(),
            "-f".to_string(),
            self.format.clone(),
            "-o".to_string(),
            staging_dir.join(&self.output_template).to_string_lossy().into_owned(),
        ];

        for field in PRINT_FIELDS {
            args.push("--print".to_string());
            args.push(field.to_string());
        }

        if let Some(cookies) = &self.cookie_file {
            args.push("--cookies".to_string());
            args.push(cookies.to_string_lossy().into_owned());
        }

        args.extend(self.extra_args.iter().cloned());
        args.push("--".to_string());
        args.push(reference.to_string());
        args
    }
}

#[async_trait]
impl ContentResolver for YtDlpResolver {
    async fn resolve(&self, reference: &str) -> Result<ResolvedTrack, ResolutionError> {
        tokio::fs::create_dir_all(&self.songs_dir).await.map_err(|e| {
            ResolutionError::Unknown(format!(
                "Cannot create songs directory {}: {}",
                self.songs_dir.display(),
                e
            ))
        })?;

        let staging = tempfile::Builder::new()
            .prefix(".fetch-")
            .tempdir_in(&self.songs_dir)
            .map_err(|e| ResolutionError::Unknown(format!("Cannot create staging directory: {}", e)))?;

        let args = self.build_args(staging.path(), reference);
        debug!(program = %self.program, reference = %reference, "Running yt-dlp");

        let child = Command::new(&self.program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| ResolutionError::Unknown(format!("Failed to start {}: {}", self.program, e)))?;

        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                return Err(ResolutionError::Unknown(format!("yt-dlp I/O error: {}", e)));
            }
            Err(_) => {
                warn!(reference = %reference, timeout_secs = self.timeout.as_secs(), "yt-dlp timed out");
                return Err(ResolutionError::Unknown(format!(
                    "yt-dlp timed out after {}s",
                    self.timeout.as_secs()
                )));
            }
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let err = classify_failure(&stderr);
            warn!(reference = %reference, status = %output.status, error = %err, "yt-dlp failed");
            return Err(err);
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let printed = parse_print_output(&stdout).ok_or_else(|| {
            ResolutionError::Unknown("yt-dlp produced no file information".to_string())
        })?;

        let file_name = printed
            .filepath
            .file_name()
            .ok_or_else(|| ResolutionError::Unknown(format!("Bad output path {}", printed.filepath.display())))?;
        let final_path = self.songs_dir.join(file_name);

        tokio::fs::rename(&printed.filepath, &final_path).await.map_err(|e| {
            ResolutionError::Unknown(format!(
                "Failed to move {} into place: {}",
                printed.filepath.display(),
                e
            ))
        })?;

        info!(title = %printed.title, path = %final_path.display(), "Downloaded track");

        Ok(ResolvedTrack {
            title: printed.title,
            canonical_url: printed.webpage_url,
            local_path: final_path,
        })
    }
}

#[derive(Debug, PartialEq)]
struct PrintedTrack {
    filepath: PathBuf,
    title: String,
    webpage_url: String,
}

/// First complete `filepath`/`title`/`webpage_url` triple on stdout
fn parse_print_output(stdout: &str) -> Option<PrintedTrack> {
    let mut lines = stdout.lines().map(str::trim).filter(|l| !l.is_empty());
    let filepath = lines.next()?;
    let title = lines.next()?;
    let webpage_url = lines.next()?;

    Some(PrintedTrack {
        filepath: PathBuf::from(filepath),
        title: title.to_string(),
        webpage_url: webpage_url.to_string(),
    })
}

/// Map yt-dlp's stderr onto the resolution error taxonomy
pub fn classify_failure(stderr: &str) -> ResolutionError {
    let message = stderr
        .lines()
        .rev()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .unwrap_or("yt-dlp exited with an error")
        .to_string();
    let lower = stderr.to_lowercase();

    if lower.contains("429") || lower.contains("too many requests") {
        ResolutionError::RateLimited(message)
    } else if lower.contains("403") || lower.contains("forbidden") {
        ResolutionError::Forbidden(message)
    } else if lower.contains("404")
        || lower.contains("unavailable")
        || lower.contains("not found")
        || lower.contains("unsupported url")
    {
        ResolutionError::NotFound(message)
    } else {
        ResolutionError::Unknown(message)
    }
}
