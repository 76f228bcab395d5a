//! File-based metrics exporter: atomic JSON snapshot writes via a
//! temp-file-then-rename, so a monitoring tool never observes a partial
//! file. Adapted from the source codebase's `metrics::file::FileExporter`.

use std::io::Write;
use std::path::PathBuf;

use async_trait::async_trait;

use super::{MetricsExporter, MetricsSnapshot};
use crate::config::FileMetricsConfig;
use crate::types::TelemetryError;

pub struct FileExporter {
    path: PathBuf,
    pretty_print: bool,
}

impl FileExporter {
    pub fn new(config: FileMetricsConfig) -> Result<Self, TelemetryError> {
        if let Some(parent) = config.path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| TelemetryError::ExporterError(format!("creating metrics dir: {e}")))?;
        }
        Ok(Self {
            path: config.path,
            pretty_print: config.pretty_print,
        })
    }
}

#[async_trait]
impl MetricsExporter for FileExporter {
    async fn export(&self, snapshot: &MetricsSnapshot) -> Result<(), TelemetryError> {
        let json = if self.pretty_print {
            serde_json::to_string_pretty(snapshot)
        } else {
            serde_json::to_string(snapshot)
        }
        .map_err(|e| TelemetryError::ExporterError(e.to_string()))?;

        let path = self.path.clone();
        tokio::task::spawn_blocking(move || -> Result<(), TelemetryError> {
            let parent = path.parent().unwrap_or_else(|| std::path::Path::new("."));
            let mut tmp = tempfile::NamedTempFile::new_in(parent)
                .map_err(|e| TelemetryError::ExporterError(e.to_string()))?;
            tmp.write_all(json.as_bytes())
                .map_err(|e| TelemetryError::ExporterError(e.to_string()))?;
            tmp.flush().map_err(|e| TelemetryError::ExporterError(e.to_string()))?;
            tmp.persist(&path)
                .map_err(|e| TelemetryError::ExporterError(format!("persisting metrics file: {e}")))?;
            Ok(())
        })
        .await
        .map_err(|e| TelemetryError::ExporterError(format!("blocking task panicked: {e}")))??;

        tracing::debug!(path = %self.path.display(), "metrics snapshot written");
        Ok(())
    }

    async fn shutdown(&self) -> Result<(), TelemetryError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn export_writes_readable_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("metrics.json");
        let exporter = FileExporter::new(FileMetricsConfig { path: path.clone(), pretty_print: false }).unwrap();
        exporter.export(&MetricsSnapshot::default()).await.unwrap();
        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(contents.contains("router"));
    }
}
