//! Per-run artifact directories.
//!
//! A [`Session`] owns one directory under the configured base dir
//! (`GAME_QA_SESSION_DIR`, default `/tmp/game-qa`) holding the screenshot of
//! every step attempt and a `summary.json`. The directory is removed on drop
//! unless the session is kept.

use std::fs;
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::config;
use crate::detector::ClassId;
use crate::flow::SessionSummary;

const METADATA_FILE: &str = ".session.json";
const SUMMARY_FILE: &str = "summary.json";

/// A run's artifact directory
#[derive(Debug, Clone)]
pub struct Session {
    /// Unique session ID
    pub id: String,
    /// Root directory for this session
    pub dir: PathBuf,
    /// Whether to keep files after the session ends
    pub keep: bool,
    /// Page under test, recorded in the metadata file
    pub game_url: Option<String>,
}

impl Session {
    /// Create a session with a unique ID under the configured base dir
    pub fn new() -> Self {
        let id = generate_session_id();
        let dir = base_dir().join(&id);
        Self {
            id,
            dir,
            keep: false,
            game_url: None,
        }
    }

    /// Create a session named after `name` plus a timestamp
    pub fn with_name(name: &str) -> Self {
        let id = format!("{}_{}", sanitize_name(name), generate_timestamp_suffix());
        let dir = base_dir().join(&id);
        Self {
            id,
            dir,
            keep: false,
            game_url: None,
        }
    }

    /// Use an explicit directory; such sessions are kept by default
    pub fn in_dir(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        let id = dir
            .file_name()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(generate_session_id);
        Self {
            id,
            dir,
            keep: true,
            game_url: None,
        }
    }

    pub fn keep(mut self, keep: bool) -> Self {
        self.keep = keep;
        self
    }

    pub fn game_url(mut self, url: impl Into<String>) -> Self {
        self.game_url = Some(url.into());
        self
    }

    /// Create the directory and write session metadata
    pub fn init(&self) -> std::io::Result<()> {
        fs::create_dir_all(&self.dir)?;

        let metadata = serde_json::json!({
            "id": self.id,
            "created": chrono::Utc::now().to_rfc3339(),
            "game_url": self.game_url,
        });
        fs::write(
            self.dir.join(METADATA_FILE),
            serde_json::to_string_pretty(&metadata)?,
        )?;
        Ok(())
    }

    /// Screenshot path for the `step`-th attempt (1-based) of `class_id`
    pub fn step_path(&self, step: usize, class_id: ClassId) -> PathBuf {
        self.dir.join(format!("step_{}_class_{}.png", step, class_id))
    }

    /// Path for a named one-off capture
    pub fn capture_path(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{}.png", sanitize_name(name)))
    }

    /// Write a step screenshot, creating the directory if needed
    pub fn write_step(&self, step: usize, class_id: ClassId, png: &[u8]) -> std::io::Result<PathBuf> {
        fs::create_dir_all(&self.dir)?;
        let path = self.step_path(step, class_id);
        fs::write(&path, png)?;
        Ok(path)
    }

    /// Write `summary.json`
    pub fn write_summary(&self, summary: &SessionSummary) -> std::io::Result<PathBuf> {
        fs::create_dir_all(&self.dir)?;
        let path = self.dir.join(SUMMARY_FILE);
        fs::write(&path, serde_json::to_string_pretty(summary)?)?;
        Ok(path)
    }

    /// All PNG files in the session, sorted by name
    pub fn list_captures(&self) -> std::io::Result<Vec<PathBuf>> {
        let mut captures = Vec::new();
        if self.dir.exists() {
            for entry in fs::read_dir(&self.dir)? {
                let path = entry?.path();
                if path.extension().map(|e| e == "png").unwrap_or(false) {
                    captures.push(path);
                }
            }
        }
        captures.sort();
        Ok(captures)
    }

    /// Remove the directory unless kept
    pub fn cleanup(&self) -> std::io::Result<()> {
        if self.dir.exists() && !self.keep {
            fs::remove_dir_all(&self.dir)?;
        }
        Ok(())
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if !self.keep {
            let _ = fs::remove_dir_all(&self.dir);
        }
    }
}

fn base_dir() -> PathBuf {
    PathBuf::from(config::session_base_dir())
}

fn generate_session_id() -> String {
    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0);
    format!("session_{}_{}", timestamp, std::process::id())
}

fn generate_timestamp_suffix() -> String {
    chrono::Utc::now().format("%Y%m%d_%H%M%S").to_string()
}

/// Keep `[A-Za-z0-9_-]`, map everything else to `_`
fn sanitize_name(name: &str) -> String {
    name.chars()
        .map(|c| match c {
            'a'..='z' | 'A'..='Z' | '0'..='9' | '-' | '_' => c,
            _ => '_',
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detector::StepResult;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_session_new() {
        let session = Session::new();
        assert!(session.id.starts_with("session_"));
        assert!(session.dir.starts_with(config::session_base_dir()));
        assert!(!session.keep);
    }

    #[test]
    fn test_session_with_name() {
        let session = Session::with_name("smoke run");
        assert!(session.id.starts_with("smoke_run_"));
    }

    #[test]
    fn test_sanitize_name() {
        assert_eq!(sanitize_name("https://a.b/c"), "https___a_b_c");
        assert_eq!(sanitize_name("ok-name_1"), "ok-name_1");
    }

    #[test]
    fn test_step_path() {
        let session = Session::in_dir("/tmp/x");
        assert!(session.step_path(3, 7).ends_with("step_3_class_7.png"));
    }

    #[test]
    fn test_writes_steps_and_summary() {
        let tmp = tempfile::tempdir().unwrap();
        let session = Session::in_dir(tmp.path().join("run")).game_url("https://example.com");
        session.init().unwrap();

        session.write_step(1, 0, b"png").unwrap();
        let summary = SessionSummary {
            test_id: "t1".to_string(),
            final_result: Some(serde_json::json!({"status": "success"})),
            history: vec![StepResult {
                class_id: 0,
                passed: true,
                detection: None,
            }],
        };
        let path = session.write_summary(&summary).unwrap();

        let read: SessionSummary =
            serde_json::from_str(&fs::read_to_string(path).unwrap()).unwrap();
        assert_eq!(read, summary);
        assert_eq!(session.list_captures().unwrap().len(), 1);
    }

    #[test]
    fn test_unkept_session_removed_on_drop() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("gone");
        {
            let session = Session::in_dir(&dir).keep(false);
            session.init().unwrap();
            assert!(dir.exists());
        }
        assert!(!dir.exists());
    }
}
