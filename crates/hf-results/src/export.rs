//! Writes fetched frames and metrics to disk.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use hf_core::{CategoryId, ResultId};
use serde::Serialize;

use crate::types::{ArtifactPayload, StepArtifactSet};
use crate::{ResultsError, ResultsResult};

const METRICS_FILE: &str = "metrics.jsonl";

/// Frame export rooted at a directory.
///
/// Layout: `<root>/<result>/<category>/<step:06>.jpg` for images and one
/// `<root>/metrics.jsonl` line per metric value.
#[derive(Debug, Clone)]
pub struct FrameExport {
    root_dir: PathBuf,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExportSummary {
    pub images_written: usize,
    pub metrics_written: usize,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct MetricLine<'a> {
    result_id: &'a ResultId,
    step: u64,
    category_id: CategoryId,
    category: String,
    value: f64,
}

impl FrameExport {
    pub fn new(root_dir: PathBuf) -> ResultsResult<Self> {
        if root_dir.exists() && !root_dir.is_dir() {
            return Err(ResultsError::InvalidPath {
                message: format!("{} is not a directory", root_dir.display()),
            });
        }
        fs::create_dir_all(&root_dir)?;
        Ok(Self { root_dir })
    }

    pub fn root(&self) -> &Path {
        &self.root_dir
    }

    pub fn frame_path(&self, result_id: &ResultId, category: &str, step: u64) -> PathBuf {
        self.root_dir
            .join(path_component(result_id.as_str()))
            .join(path_component(category))
            .join(format!("{step:06}.jpg"))
    }

    pub fn metrics_path(&self) -> PathBuf {
        self.root_dir.join(METRICS_FILE)
    }

    /// Existing frames are overwritten; metric lines are appended.
    pub fn write_sets<'a, I>(&self, sets: I) -> ResultsResult<ExportSummary>
    where
        I: IntoIterator<Item = &'a StepArtifactSet>,
    {
        let mut summary = ExportSummary::default();
        let mut metric_lines = String::new();

        for set in sets {
            for artifact in &set.artifacts {
                match &artifact.payload {
                    ArtifactPayload::Image { .. } => {
                        let Some(bytes) = artifact.decode_image()? else {
                            continue;
                        };
                        let path = self.frame_path(&set.result_id, &artifact.label(), set.step);
                        if let Some(parent) = path.parent() {
                            fs::create_dir_all(parent)?;
                        }
                        fs::write(path, bytes)?;
                        summary.images_written += 1;
                    }
                    ArtifactPayload::Metric { value } => {
                        let line = MetricLine {
                            result_id: &set.result_id,
                            step: set.step,
                            category_id: artifact.category_id,
                            category: artifact.label(),
                            value: *value,
                        };
                        metric_lines.push_str(&serde_json::to_string(&line)?);
                        metric_lines.push('\n');
                        summary.metrics_written += 1;
                    }
                }
            }
        }

        if !metric_lines.is_empty() {
            let mut file = fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(self.metrics_path())?;
            file.write_all(metric_lines.as_bytes())?;
        }

        Ok(summary)
    }
}

fn path_component(raw: &str) -> String {
    let cleaned: String = raw
        .trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c.to_ascii_lowercase()
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.is_empty() {
        "_".to_string()
    } else {
        cleaned
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn path_components_are_sanitized() {
        assert_eq!(path_component("Pigpen 3"), "pigpen_3");
        assert_eq!(path_component("../etc"), "___etc");
        assert_eq!(path_component("   "), "_");
    }
}
