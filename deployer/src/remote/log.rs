//! Per-attempt device logs

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::fs;
use tokio::io::AsyncWriteExt;

use crate::errors::DeployError;
use crate::filesys::dir::Dir;
use crate::utils::format_duration;

const RULE: &str = "============================================================";

/// Output stream a log line came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stream {
    Stdout,
    Stderr,
}

impl Stream {
    fn tag(&self) -> &'static str {
        match self {
            Stream::Stdout => "out",
            Stream::Stderr => "err",
        }
    }
}

/// Identifying details written at the top of a log
#[derive(Debug, Clone)]
pub struct LogHeader {
    pub device_name: String,
    pub platform: String,
    pub address: String,
    pub location: String,
    /// Command with secrets redacted
    pub command: String,
}

/// Location of one attempt's log file, named by device and start time
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttemptLog {
    path: PathBuf,
}

impl AttemptLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// `<logs_dir>/<device>-<YYYYmmddTHHMMSSZ>.log`
    pub fn for_attempt(logs_dir: &Dir, device_name: &str, started_at: DateTime<Utc>) -> Self {
        let safe_name: String = device_name
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        let name = format!("{}-{}.log", safe_name, started_at.format("%Y%m%dT%H%M%S%.3fZ"));
        Self::new(logs_dir.path().join(name))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Create the file and write the header
    pub async fn open(&self, header: &LogHeader) -> Result<LogWriter, DeployError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let mut writer = LogWriter {
            file: fs::File::create(&self.path).await?,
        };
        let text = format!(
            "{RULE}\nDeployment Log: {}\n{RULE}\nPlatform:    {}\nIP:          {}\nLocation:    {}\nTimestamp:   {}\nCommand:     {}\n{RULE}\n",
            header.device_name,
            header.platform,
            header.address,
            header.location,
            Utc::now().to_rfc3339(),
            header.command,
        );
        writer.write(&text).await?;
        Ok(writer)
    }

    /// Write a complete log for an attempt that failed before any remote output
    pub async fn write_failure(&self, header: &LogHeader, error: &DeployError) -> Result<(), DeployError> {
        let mut writer = self.open(header).await?;
        writer.note(&error.to_string()).await?;
        writer.finish(None, Duration::ZERO).await
    }
}

/// Append handle for an open attempt log
pub struct LogWriter {
    file: fs::File,
}

impl LogWriter {
    async fn write(&mut self, text: &str) -> Result<(), DeployError> {
        self.file.write_all(text.as_bytes()).await?;
        Ok(())
    }

    /// One line of remote output
    pub async fn line(&mut self, stream: Stream, line: &str) -> Result<(), DeployError> {
        self.write(&format!("{}| {}\n", stream.tag(), line)).await
    }

    /// A deployer-side note, e.g. a phase change or a timeout
    pub async fn note(&mut self, text: &str) -> Result<(), DeployError> {
        self.write(&format!("--- {}\n", text)).await
    }

    /// Write the footer and flush to disk
    pub async fn finish(mut self, exit_code: Option<i32>, duration: Duration) -> Result<(), DeployError> {
        let exit = exit_code.map_or_else(|| "none".to_string(), |c| c.to_string());
        let text = format!(
            "{RULE}\nExit code:   {}\nDuration:    {}\n",
            exit,
            format_duration(duration)
        );
        self.write(&text).await?;
        self.file.sync_all().await?;
        Ok(())
    }
}
