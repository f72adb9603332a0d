//! SQLite-backed task store.
//!
//! Uses `sqlx` with runtime-verified queries so no database needs to
//! exist at compile time; `sqlx::migrate!` embeds the migrations
//! directory into the binary (resolved against this crate's root).
//!
//! `save` is an upsert keyed by the public `task_id`: the internal
//! primary key survives updates and child artifacts are rewritten as a
//! unit, mirroring how the task record is owned by exactly one worker
//! at a time.

use chrono::{DateTime, Utc};
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;
use tracing::warn;

use super::{Artifact, Task, TaskStatus};

pub const STALE_FAIL_REASON: &str = "服务重启，任务被中断 Task interrupted by server restart";
pub const STALE_STATUS_MESSAGE: &str = "任务中断 Task Interrupted";

#[derive(Clone, Debug)]
pub struct TaskStore {
    pool: SqlitePool,
}

#[derive(Debug, sqlx::FromRow)]
struct TaskRow {
    id: i64,
    task_id: String,
    source_url: String,
    status: String,
    status_message: String,
    fail_reason: String,
    process_pct: i64,
    origin_language: String,
    target_language: String,
    title: String,
    description: String,
    translated_title: String,
    translated_description: String,
    cover_path: String,
    tts_voice_code: String,
    speech_download_url: String,
    created_at: String,
}

impl TaskStore {
    /// Open (or create) the database at `url` and run pending
    /// migrations. Use `sqlite::memory:` in tests.
    pub async fn connect(url: &str) -> Result<Self, sqlx::Error> {
        // An in-memory database exists per connection, so it must be
        // pinned to exactly one that never gets recycled.
        let options = if url.contains(":memory:") {
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            SqlitePoolOptions::new().max_connections(4)
        };
        let pool = options.connect(url).await?;
        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(Self { pool })
    }

    /// Upsert by `task_id`, preserving the internal primary key and
    /// rewriting child artifacts.
    pub async fn save(&self, task: &Task) -> Result<(), sqlx::Error> {
        let mut tx = self.pool.begin().await?;

        let existing: Option<(i64,)> = sqlx::query_as("SELECT id FROM tasks WHERE task_id = ?1")
            .bind(&task.task_id)
            .fetch_optional(&mut *tx)
            .await?;

        let updated_at = Utc::now().to_rfc3339();
        let pk = match existing {
            Some((id,)) => {
                sqlx::query(
                    "UPDATE tasks SET source_url = ?1, status = ?2, status_message = ?3, \
                     fail_reason = ?4, process_pct = ?5, origin_language = ?6, \
                     target_language = ?7, title = ?8, description = ?9, \
                     translated_title = ?10, translated_description = ?11, cover_path = ?12, \
                     tts_voice_code = ?13, speech_download_url = ?14, updated_at = ?15 \
                     WHERE id = ?16",
                )
                .bind(&task.source_url)
                .bind(task.status.as_str())
                .bind(&task.status_message)
                .bind(&task.fail_reason)
                .bind(task.process_pct as i64)
                .bind(&task.origin_language)
                .bind(&task.target_language)
                .bind(&task.title)
                .bind(&task.description)
                .bind(&task.translated_title)
                .bind(&task.translated_description)
                .bind(&task.cover_path)
                .bind(&task.tts_voice_code)
                .bind(&task.speech_download_url)
                .bind(&updated_at)
                .bind(id)
                .execute(&mut *tx)
                .await?;
                id
            }
            None => {
                let result = sqlx::query(
                    "INSERT INTO tasks (task_id, source_url, status, status_message, \
                     fail_reason, process_pct, origin_language, target_language, title, \
                     description, translated_title, translated_description, cover_path, \
                     tts_voice_code, speech_download_url, created_at, updated_at) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)",
                )
                .bind(&task.task_id)
                .bind(&task.source_url)
                .bind(task.status.as_str())
                .bind(&task.status_message)
                .bind(&task.fail_reason)
                .bind(task.process_pct as i64)
                .bind(&task.origin_language)
                .bind(&task.target_language)
                .bind(&task.title)
                .bind(&task.description)
                .bind(&task.translated_title)
                .bind(&task.translated_description)
                .bind(&task.cover_path)
                .bind(&task.tts_voice_code)
                .bind(&task.speech_download_url)
                .bind(task.created_at.to_rfc3339())
                .bind(&updated_at)
                .execute(&mut *tx)
                .await?;
                result.last_insert_rowid()
            }
        };

        sqlx::query("DELETE FROM artifacts WHERE task_pk = ?1")
            .bind(pk)
            .execute(&mut *tx)
            .await?;
        for (position, artifact) in task.artifacts.iter().enumerate() {
            sqlx::query(
                "INSERT INTO artifacts (task_pk, position, name, local_path, download_url) \
                 VALUES (?1, ?2, ?3, ?4, ?5)",
            )
            .bind(pk)
            .bind(position as i64)
            .bind(&artifact.name)
            .bind(&artifact.local_path)
            .bind(&artifact.download_url)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await
    }

    /// Fetch one task with its artifacts eagerly loaded.
    pub async fn get(&self, task_id: &str) -> Result<Option<Task>, sqlx::Error> {
        let row: Option<TaskRow> = sqlx::query_as(
            "SELECT id, task_id, source_url, status, status_message, fail_reason, \
             process_pct, origin_language, target_language, title, description, \
             translated_title, translated_description, cover_path, tts_voice_code, \
             speech_download_url, created_at \
             FROM tasks WHERE task_id = ?1",
        )
        .bind(task_id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => {
                let pk = row.id;
                let mut task = task_from_row(row);
                task.artifacts = self.load_artifacts(pk).await?;
                Ok(Some(task))
            }
            None => Ok(None),
        }
    }

    /// Recent tasks, newest first.
    pub async fn list(&self, limit: i64) -> Result<Vec<Task>, sqlx::Error> {
        let rows: Vec<TaskRow> = sqlx::query_as(
            "SELECT id, task_id, source_url, status, status_message, fail_reason, \
             process_pct, origin_language, target_language, title, description, \
             translated_title, translated_description, cover_path, tts_voice_code, \
             speech_download_url, created_at \
             FROM tasks ORDER BY created_at DESC LIMIT ?1",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        let mut tasks = Vec::with_capacity(rows.len());
        for row in rows {
            let pk = row.id;
            let mut task = task_from_row(row);
            task.artifacts = self.load_artifacts(pk).await?;
            tasks.push(task);
        }
        Ok(tasks)
    }

    /// Delete a task and its artifacts.
    pub async fn delete(&self, task_id: &str) -> Result<(), sqlx::Error> {
        let mut tx = self.pool.begin().await?;
        let existing: Option<(i64,)> = sqlx::query_as("SELECT id FROM tasks WHERE task_id = ?1")
            .bind(task_id)
            .fetch_optional(&mut *tx)
            .await?;
        if let Some((pk,)) = existing {
            sqlx::query("DELETE FROM artifacts WHERE task_pk = ?1")
                .bind(pk)
                .execute(&mut *tx)
                .await?;
            sqlx::query("DELETE FROM tasks WHERE id = ?1")
                .bind(pk)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await
    }

    /// One-shot zombie reaping on startup: any task a previous process
    /// incarnation left in `running` is coerced to `failed`.
    pub async fn reap_stale(&self) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE tasks SET status = 'failed', fail_reason = ?1, status_message = ?2, \
             updated_at = ?3 WHERE status = 'running'",
        )
        .bind(STALE_FAIL_REASON)
        .bind(STALE_STATUS_MESSAGE)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn load_artifacts(&self, task_pk: i64) -> Result<Vec<Artifact>, sqlx::Error> {
        let rows: Vec<(String, String, String)> = sqlx::query_as(
            "SELECT name, local_path, download_url FROM artifacts \
             WHERE task_pk = ?1 ORDER BY position ASC",
        )
        .bind(task_pk)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|(name, local_path, download_url)| Artifact {
                name,
                local_path,
                download_url,
            })
            .collect())
    }
}

fn task_from_row(row: TaskRow) -> Task {
    let created_at = row.created_at.parse::<DateTime<Utc>>().unwrap_or_else(|e| {
        warn!(raw = %row.created_at, error = %e, "failed to parse task created_at; using now");
        Utc::now()
    });
    Task {
        task_id: row.task_id,
        source_url: row.source_url,
        status: TaskStatus::parse(&row.status),
        status_message: row.status_message,
        fail_reason: row.fail_reason,
        process_pct: row.process_pct.clamp(0, 100) as u8,
        origin_language: row.origin_language,
        target_language: row.target_language,
        title: row.title,
        description: row.description,
        translated_title: row.translated_title,
        translated_description: row.translated_description,
        cover_path: row.cover_path,
        tts_voice_code: row.tts_voice_code,
        speech_download_url: row.speech_download_url,
        artifacts: Vec::new(),
        created_at,
        updated_at: Utc::now(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn memory_store() -> TaskStore {
        TaskStore::connect("sqlite::memory:").await.unwrap()
    }

    #[tokio::test]
    async fn save_then_get_roundtrips_artifacts() {
        let store = memory_store().await;

        let mut task = Task::new("abc_1234", "local:/tmp/v.mp4");
        task.origin_language = "en".into();
        task.target_language = "zh-CN".into();
        task.push_artifact(Artifact::new("origin.srt", "/tasks/abc_1234/output/origin.srt"));
        task.push_artifact(Artifact::new("target.srt", "/tasks/abc_1234/output/target.srt"));
        store.save(&task).await.unwrap();

        let loaded = store.get("abc_1234").await.unwrap().unwrap();
        assert_eq!(loaded.source_url, "local:/tmp/v.mp4");
        assert_eq!(loaded.status, TaskStatus::Queued);
        assert_eq!(loaded.artifacts.len(), 2);
        assert_eq!(loaded.artifacts[0].name, "origin.srt");
    }

    #[tokio::test]
    async fn save_is_an_upsert_by_task_id() {
        let store = memory_store().await;

        let mut task = Task::new("dup", "u1");
        store.save(&task).await.unwrap();
        task.status = TaskStatus::Running;
        task.process_pct = 40;
        task.push_artifact(Artifact::new("a", "/p/a"));
        store.save(&task).await.unwrap();

        let loaded = store.get("dup").await.unwrap().unwrap();
        assert_eq!(loaded.status, TaskStatus::Running);
        assert_eq!(loaded.process_pct, 40);
        assert_eq!(loaded.artifacts.len(), 1);
        assert_eq!(store.list(10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn list_is_newest_first() {
        let store = memory_store().await;

        let mut older = Task::new("older", "u");
        older.created_at = Utc::now() - chrono::Duration::hours(1);
        store.save(&older).await.unwrap();
        store.save(&Task::new("newer", "u")).await.unwrap();

        let listed = store.list(10).await.unwrap();
        assert_eq!(listed[0].task_id, "newer");
        assert_eq!(listed[1].task_id, "older");

        let limited = store.list(1).await.unwrap();
        assert_eq!(limited.len(), 1);
    }

    #[tokio::test]
    async fn delete_removes_task_and_artifacts() {
        let store = memory_store().await;
        let mut task = Task::new("gone", "u");
        task.push_artifact(Artifact::new("a", "/p/a"));
        store.save(&task).await.unwrap();

        store.delete("gone").await.unwrap();
        assert!(store.get("gone").await.unwrap().is_none());
        // Deleting a missing task is a no-op.
        store.delete("gone").await.unwrap();
    }

    #[tokio::test]
    async fn reap_stale_fails_running_tasks_only() {
        let store = memory_store().await;

        let mut running = Task::new("zombie", "u");
        running.status = TaskStatus::Running;
        store.save(&running).await.unwrap();

        let mut done = Task::new("done", "u");
        done.status = TaskStatus::Succeeded;
        store.save(&done).await.unwrap();

        store.save(&Task::new("waiting", "u")).await.unwrap();

        assert_eq!(store.reap_stale().await.unwrap(), 1);

        for task in store.list(10).await.unwrap() {
            assert_ne!(task.status, TaskStatus::Running, "{}", task.task_id);
        }
        let zombie = store.get("zombie").await.unwrap().unwrap();
        assert_eq!(zombie.status, TaskStatus::Failed);
        assert_eq!(zombie.fail_reason, STALE_FAIL_REASON);
        let done = store.get("done").await.unwrap().unwrap();
        assert_eq!(done.status, TaskStatus::Succeeded);
    }
}
