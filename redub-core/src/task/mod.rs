//! Durable task model.

pub mod store;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle of a task. `Succeeded` and `Failed` are terminal: within
/// one run the status never regresses out of them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Queued,
    Running,
    Succeeded,
    Failed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Queued => "queued",
            TaskStatus::Running => "running",
            TaskStatus::Succeeded => "succeeded",
            TaskStatus::Failed => "failed",
        }
    }

    pub fn parse(raw: &str) -> Self {
        match raw {
            "queued" => TaskStatus::Queued,
            "running" => TaskStatus::Running,
            "succeeded" => TaskStatus::Succeeded,
            _ => TaskStatus::Failed,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Succeeded | TaskStatus::Failed)
    }
}

/// A produced file registered against a task, exposed to clients via
/// its download URL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    pub name: String,
    pub local_path: String,
    #[serde(default)]
    pub download_url: String,
}

impl Artifact {
    pub fn new(name: impl Into<String>, local_path: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            local_path: local_path.into(),
            download_url: String::new(),
        }
    }
}

/// The durable task record. Mutated exclusively by the worker that owns
/// it while running.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub task_id: String,
    pub source_url: String,
    pub status: TaskStatus,
    pub status_message: String,
    pub fail_reason: String,
    pub process_pct: u8,
    pub origin_language: String,
    pub target_language: String,
    pub title: String,
    pub description: String,
    pub translated_title: String,
    pub translated_description: String,
    pub cover_path: String,
    pub tts_voice_code: String,
    pub speech_download_url: String,
    pub artifacts: Vec<Artifact>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Task {
    pub fn new(task_id: impl Into<String>, source_url: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            task_id: task_id.into(),
            source_url: source_url.into(),
            status: TaskStatus::Queued,
            status_message: String::new(),
            fail_reason: String::new(),
            process_pct: 0,
            origin_language: String::new(),
            target_language: String::new(),
            title: String::new(),
            description: String::new(),
            translated_title: String::new(),
            translated_description: String::new(),
            cover_path: String::new(),
            tts_voice_code: String::new(),
            speech_download_url: String::new(),
            artifacts: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Advance progress; decreases are ignored so the percentage stays
    /// monotonic within a run.
    pub fn advance_pct(&mut self, pct: u8) {
        if pct > self.process_pct {
            self.process_pct = pct.min(100);
        }
    }

    /// Register an artifact, replacing an earlier one with the same
    /// name (stages may re-run on retry).
    pub fn push_artifact(&mut self, artifact: Artifact) {
        if let Some(existing) = self.artifacts.iter_mut().find(|a| a.name == artifact.name) {
            *existing = artifact;
        } else {
            self.artifacts.push(artifact);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pct_is_monotonic() {
        let mut task = Task::new("t", "local:/tmp/v.mp4");
        task.advance_pct(40);
        task.advance_pct(10);
        assert_eq!(task.process_pct, 40);
        task.advance_pct(120);
        assert_eq!(task.process_pct, 100);
    }

    #[test]
    fn artifacts_dedupe_by_name() {
        let mut task = Task::new("t", "u");
        task.push_artifact(Artifact::new("origin.srt", "/a/origin.srt"));
        task.push_artifact(Artifact::new("origin.srt", "/b/origin.srt"));
        assert_eq!(task.artifacts.len(), 1);
        assert_eq!(task.artifacts[0].local_path, "/b/origin.srt");
    }

    #[test]
    fn status_string_roundtrip() {
        for status in [
            TaskStatus::Queued,
            TaskStatus::Running,
            TaskStatus::Succeeded,
            TaskStatus::Failed,
        ] {
            assert_eq!(TaskStatus::parse(status.as_str()), status);
        }
        assert_eq!(TaskStatus::parse("garbage"), TaskStatus::Failed);
    }
}
