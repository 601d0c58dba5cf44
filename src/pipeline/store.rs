//! SQLite-backed pipeline store.
//!
//! Schema notes: decimal scores and revenue are stored as TEXT and
//! reparsed, deletes cascade from ideas to everything derived from them,
//! and the unique keys (idea dedup hash, one row per idea/variant, one
//! queue entry per idea/platform, one analytics row per platform/post/day)
//! make the external triggers idempotent.

use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use tracing::info;

use crate::error::{BotError, Result};
use crate::pipeline::{
    AnalyticsRow, Approval, Asset, ContentIdea, DailyMetrics, Hook, IdeaStatus, NewIdea, Pattern,
    PublishQueueEntry, QaResult, Script, ScriptStatus, Variant,
};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS content_ideas (
    id              INTEGER PRIMARY KEY AUTOINCREMENT,
    dedup_hash      TEXT NOT NULL UNIQUE,
    title           TEXT NOT NULL,
    summary         TEXT,
    source          TEXT,
    freshness_score TEXT NOT NULL DEFAULT '0',
    potential_score TEXT NOT NULL DEFAULT '0',
    status          TEXT NOT NULL DEFAULT 'new',
    created_at      TEXT NOT NULL,
    updated_at      TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS scripts (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    idea_id     INTEGER NOT NULL REFERENCES content_ideas(id) ON DELETE CASCADE,
    variant     TEXT NOT NULL CHECK (variant IN ('A', 'B', 'C')),
    body        TEXT NOT NULL,
    status      TEXT NOT NULL DEFAULT 'draft',
    qa_feedback TEXT,
    created_at  TEXT NOT NULL,
    UNIQUE (idea_id, variant)
);

CREATE TABLE IF NOT EXISTS assets (
    id         INTEGER PRIMARY KEY AUTOINCREMENT,
    idea_id    INTEGER NOT NULL REFERENCES content_ideas(id) ON DELETE CASCADE,
    script_id  INTEGER REFERENCES scripts(id) ON DELETE SET NULL,
    kind       TEXT NOT NULL,
    location   TEXT NOT NULL,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS qa_results (
    id         INTEGER PRIMARY KEY AUTOINCREMENT,
    idea_id    INTEGER NOT NULL REFERENCES content_ideas(id) ON DELETE CASCADE,
    script_id  INTEGER REFERENCES scripts(id) ON DELETE SET NULL,
    passed     INTEGER NOT NULL,
    notes      TEXT,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS approvals (
    id         INTEGER PRIMARY KEY AUTOINCREMENT,
    idea_id    INTEGER NOT NULL REFERENCES content_ideas(id) ON DELETE CASCADE,
    approved   INTEGER NOT NULL,
    approver   TEXT NOT NULL,
    notes      TEXT,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS publish_queue (
    id            INTEGER PRIMARY KEY AUTOINCREMENT,
    idea_id       INTEGER NOT NULL REFERENCES content_ideas(id) ON DELETE CASCADE,
    platform      TEXT NOT NULL,
    scheduled_for TEXT NOT NULL,
    posted_at     TEXT,
    post_id       TEXT,
    UNIQUE (idea_id, platform)
);

CREATE TABLE IF NOT EXISTS analytics_daily (
    id       INTEGER PRIMARY KEY AUTOINCREMENT,
    platform TEXT NOT NULL,
    post_id  TEXT NOT NULL,
    date     TEXT NOT NULL,
    views    INTEGER NOT NULL DEFAULT 0 CHECK (views >= 0),
    likes    INTEGER NOT NULL DEFAULT 0 CHECK (likes >= 0),
    comments INTEGER NOT NULL DEFAULT 0 CHECK (comments >= 0),
    shares   INTEGER NOT NULL DEFAULT 0 CHECK (shares >= 0),
    revenue  TEXT NOT NULL DEFAULT '0',
    UNIQUE (platform, post_id, date)
);

CREATE TABLE IF NOT EXISTS hooks_library (
    id              INTEGER PRIMARY KEY AUTOINCREMENT,
    text            TEXT NOT NULL UNIQUE,
    category        TEXT,
    usage_count     INTEGER NOT NULL DEFAULT 0,
    avg_performance TEXT NOT NULL DEFAULT '0'
);

CREATE TABLE IF NOT EXISTS patterns_library (
    id              INTEGER PRIMARY KEY AUTOINCREMENT,
    name            TEXT NOT NULL UNIQUE,
    description     TEXT,
    usage_count     INTEGER NOT NULL DEFAULT 0,
    avg_performance TEXT NOT NULL DEFAULT '0'
);
"#;

#[derive(Clone)]
pub struct PipelineStore {
    pool: SqlitePool,
}

fn decode_err(msg: impl Into<String>) -> BotError {
    BotError::Database(sqlx::Error::Decode(msg.into().into()))
}

fn get_decimal(row: &SqliteRow, col: &str) -> Result<Decimal> {
    let raw: String = row.try_get(col).map_err(BotError::Database)?;
    Decimal::from_str(&raw).map_err(|e| decode_err(format!("{col}: {e}")))
}

fn get_datetime(row: &SqliteRow, col: &str) -> Result<DateTime<Utc>> {
    let raw: String = row.try_get(col).map_err(BotError::Database)?;
    raw.parse().map_err(|e| decode_err(format!("{col}: {e}")))
}

fn get_opt_datetime(row: &SqliteRow, col: &str) -> Result<Option<DateTime<Utc>>> {
    let raw: Option<String> = row.try_get(col).map_err(BotError::Database)?;
    raw.map(|s| s.parse().map_err(|e| decode_err(format!("{col}: {e}"))))
        .transpose()
}

impl PipelineStore {
    pub async fn connect(path: &str) -> Result<Self> {
        if let Some(dir) = std::path::Path::new(path).parent() {
            if !dir.as_os_str().is_empty() {
                std::fs::create_dir_all(dir)?;
            }
        }
        let options = SqliteConnectOptions::from_str(&format!("sqlite://{path}"))
            .map_err(BotError::Database)?
            .create_if_missing(true)
            .foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await?;
        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    #[cfg(test)]
    pub async fn connect_in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(
                SqliteConnectOptions::from_str("sqlite::memory:")
                    .map_err(BotError::Database)?
                    .foreign_keys(true),
            )
            .await?;
        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    async fn migrate(&self) -> Result<()> {
        sqlx::raw_sql(SCHEMA).execute(&self.pool).await?;
        info!("pipeline schema ready");
        Ok(())
    }

    /// Insert a new idea; returns `None` when the dedup hash already exists.
    pub async fn insert_idea(&self, idea: &NewIdea) -> Result<Option<i64>> {
        idea.validate()?;
        let now = Utc::now().to_rfc3339();
        let result = sqlx::query(
            "INSERT INTO content_ideas
                (dedup_hash, title, summary, source, freshness_score, potential_score,
                 status, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, 'new', ?, ?)
             ON CONFLICT (dedup_hash) DO NOTHING",
        )
        .bind(&idea.dedup_hash)
        .bind(&idea.title)
        .bind(&idea.summary)
        .bind(&idea.source)
        .bind(idea.freshness_score.to_string())
        .bind(idea.potential_score.to_string())
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Ok(None);
        }
        Ok(Some(result.last_insert_rowid()))
    }

    pub async fn get_idea(&self, id: i64) -> Result<Option<ContentIdea>> {
        let row = sqlx::query("SELECT * FROM content_ideas WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| idea_from_row(&r)).transpose()
    }

    pub async fn list_ideas(&self, status: Option<IdeaStatus>) -> Result<Vec<ContentIdea>> {
        let rows = match status {
            Some(s) => {
                sqlx::query("SELECT * FROM content_ideas WHERE status = ? ORDER BY id")
                    .bind(s.as_str())
                    .fetch_all(&self.pool)
                    .await?
            }
            None => {
                sqlx::query("SELECT * FROM content_ideas ORDER BY id")
                    .fetch_all(&self.pool)
                    .await?
            }
        };
        rows.iter().map(idea_from_row).collect()
    }

    /// Advance an idea's lifecycle. Backward moves fail with
    /// [`BotError::InvalidTransition`], as does losing a race with a
    /// concurrent transition.
    pub async fn advance_idea(&self, id: i64, next: IdeaStatus) -> Result<ContentIdea> {
        let idea = self
            .get_idea(id)
            .await?
            .ok_or_else(|| BotError::MarketNotFound(format!("idea {id}")))?;
        let next = idea.status.advance_to(next)?;
        if !self.transition_status(id, idea.status, next).await? {
            // Someone else moved the idea between our read and the update.
            let current = self
                .get_idea(id)
                .await?
                .map(|i| i.status.as_str().to_string())
                .unwrap_or_else(|| "deleted".to_string());
            return Err(BotError::InvalidTransition(
                current,
                next.as_str().to_string(),
            ));
        }
        Ok(ContentIdea {
            status: next,
            updated_at: Utc::now(),
            ..idea
        })
    }

    /// Compare-and-set the status column. Returns false when the row no
    /// longer holds `from`, leaving it untouched.
    async fn transition_status(&self, id: i64, from: IdeaStatus, to: IdeaStatus) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE content_ideas SET status = ?, updated_at = ? WHERE id = ? AND status = ?",
        )
        .bind(to.as_str())
        .bind(Utc::now().to_rfc3339())
        .bind(id)
        .bind(from.as_str())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Cascades to scripts, assets, QA results, approvals and queue rows.
    pub async fn delete_idea(&self, id: i64) -> Result<bool> {
        let result = sqlx::query("DELETE FROM content_ideas WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn add_script(&self, idea_id: i64, variant: Variant, body: &str) -> Result<i64> {
        let result = sqlx::query(
            "INSERT INTO scripts (idea_id, variant, body, status, created_at)
             VALUES (?, ?, ?, 'draft', ?)",
        )
        .bind(idea_id)
        .bind(variant.as_str())
        .bind(body)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(result.last_insert_rowid())
    }

    pub async fn scripts_for_idea(&self, idea_id: i64) -> Result<Vec<Script>> {
        let rows = sqlx::query("SELECT * FROM scripts WHERE idea_id = ? ORDER BY variant")
            .bind(idea_id)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(script_from_row).collect()
    }

    pub async fn set_script_status(
        &self,
        script_id: i64,
        status: ScriptStatus,
        qa_feedback: Option<&str>,
    ) -> Result<()> {
        sqlx::query("UPDATE scripts SET status = ?, qa_feedback = ? WHERE id = ?")
            .bind(status.as_str())
            .bind(qa_feedback)
            .bind(script_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn add_asset(
        &self,
        idea_id: i64,
        script_id: Option<i64>,
        kind: &str,
        location: &str,
    ) -> Result<i64> {
        let result = sqlx::query(
            "INSERT INTO assets (idea_id, script_id, kind, location, created_at)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(idea_id)
        .bind(script_id)
        .bind(kind)
        .bind(location)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(result.last_insert_rowid())
    }

    pub async fn assets_for_idea(&self, idea_id: i64) -> Result<Vec<Asset>> {
        let rows = sqlx::query("SELECT * FROM assets WHERE idea_id = ? ORDER BY id")
            .bind(idea_id)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(asset_from_row).collect()
    }

    pub async fn add_qa_result(
        &self,
        idea_id: i64,
        script_id: Option<i64>,
        passed: bool,
        notes: Option<&str>,
    ) -> Result<i64> {
        let result = sqlx::query(
            "INSERT INTO qa_results (idea_id, script_id, passed, notes, created_at)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(idea_id)
        .bind(script_id)
        .bind(passed)
        .bind(notes)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(result.last_insert_rowid())
    }

    pub async fn qa_results_for_idea(&self, idea_id: i64) -> Result<Vec<QaResult>> {
        let rows = sqlx::query("SELECT * FROM qa_results WHERE idea_id = ? ORDER BY id")
            .bind(idea_id)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(qa_from_row).collect()
    }

    pub async fn add_approval(
        &self,
        idea_id: i64,
        approved: bool,
        approver: &str,
        notes: Option<&str>,
    ) -> Result<i64> {
        let result = sqlx::query(
            "INSERT INTO approvals (idea_id, approved, approver, notes, created_at)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(idea_id)
        .bind(approved)
        .bind(approver)
        .bind(notes)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(result.last_insert_rowid())
    }

    pub async fn approvals_for_idea(&self, idea_id: i64) -> Result<Vec<Approval>> {
        let rows = sqlx::query("SELECT * FROM approvals WHERE idea_id = ? ORDER BY id")
            .bind(idea_id)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(approval_from_row).collect()
    }

    /// Schedule an idea on a platform; one entry per (idea, platform).
    /// Returns `false` when a schedule already exists.
    pub async fn enqueue_publish(
        &self,
        idea_id: i64,
        platform: &str,
        scheduled_for: DateTime<Utc>,
    ) -> Result<bool> {
        let result = sqlx::query(
            "INSERT INTO publish_queue (idea_id, platform, scheduled_for)
             VALUES (?, ?, ?)
             ON CONFLICT (idea_id, platform) DO NOTHING",
        )
        .bind(idea_id)
        .bind(platform)
        .bind(scheduled_for.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn mark_published(&self, queue_id: i64, post_id: &str) -> Result<()> {
        sqlx::query("UPDATE publish_queue SET posted_at = ?, post_id = ? WHERE id = ?")
            .bind(Utc::now().to_rfc3339())
            .bind(post_id)
            .bind(queue_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Entries due at or before `now` that have not been posted yet.
    pub async fn due_publishes(&self, now: DateTime<Utc>) -> Result<Vec<PublishQueueEntry>> {
        let rows = sqlx::query(
            "SELECT * FROM publish_queue
             WHERE posted_at IS NULL AND scheduled_for <= ?
             ORDER BY scheduled_for",
        )
        .bind(now.to_rfc3339())
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(queue_from_row).collect()
    }

    /// Insert or update the per-day metrics for one post.
    pub async fn upsert_analytics(
        &self,
        platform: &str,
        post_id: &str,
        date: NaiveDate,
        metrics: &DailyMetrics,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO analytics_daily
                (platform, post_id, date, views, likes, comments, shares, revenue)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT (platform, post_id, date) DO UPDATE SET
                views = excluded.views,
                likes = excluded.likes,
                comments = excluded.comments,
                shares = excluded.shares,
                revenue = excluded.revenue",
        )
        .bind(platform)
        .bind(post_id)
        .bind(date.to_string())
        .bind(metrics.views)
        .bind(metrics.likes)
        .bind(metrics.comments)
        .bind(metrics.shares)
        .bind(metrics.revenue.to_string())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn analytics_for_post(
        &self,
        platform: &str,
        post_id: &str,
    ) -> Result<Vec<AnalyticsRow>> {
        let rows = sqlx::query(
            "SELECT * FROM analytics_daily WHERE platform = ? AND post_id = ? ORDER BY date",
        )
        .bind(platform)
        .bind(post_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(analytics_from_row).collect()
    }

    pub async fn add_hook(&self, text: &str, category: Option<&str>) -> Result<i64> {
        let result = sqlx::query(
            "INSERT INTO hooks_library (text, category) VALUES (?, ?)
             ON CONFLICT (text) DO NOTHING",
        )
        .bind(text)
        .bind(category)
        .execute(&self.pool)
        .await?;
        Ok(result.last_insert_rowid())
    }

    /// Bump usage and fold one observation into the running average.
    pub async fn record_hook_use(&self, hook_id: i64, performance: Decimal) -> Result<()> {
        let row = sqlx::query("SELECT usage_count, avg_performance FROM hooks_library WHERE id = ?")
            .bind(hook_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| BotError::MarketNotFound(format!("hook {hook_id}")))?;
        let count: i64 = row.try_get("usage_count").map_err(BotError::Database)?;
        let avg = get_decimal(&row, "avg_performance")?;
        let new_count = count + 1;
        let new_avg = (avg * Decimal::from(count) + performance) / Decimal::from(new_count);
        sqlx::query("UPDATE hooks_library SET usage_count = ?, avg_performance = ? WHERE id = ?")
            .bind(new_count)
            .bind(new_avg.to_string())
            .bind(hook_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn top_hooks(&self, limit: i64) -> Result<Vec<Hook>> {
        let rows = sqlx::query(
            "SELECT * FROM hooks_library
             ORDER BY CAST(avg_performance AS REAL) DESC, usage_count DESC
             LIMIT ?",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(hook_from_row).collect()
    }

    pub async fn add_pattern(&self, name: &str, description: Option<&str>) -> Result<i64> {
        let result = sqlx::query(
            "INSERT INTO patterns_library (name, description) VALUES (?, ?)
             ON CONFLICT (name) DO NOTHING",
        )
        .bind(name)
        .bind(description)
        .execute(&self.pool)
        .await?;
        Ok(result.last_insert_rowid())
    }

    pub async fn list_patterns(&self) -> Result<Vec<Pattern>> {
        let rows = sqlx::query("SELECT * FROM patterns_library ORDER BY id")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(pattern_from_row).collect()
    }
}

fn idea_from_row(row: &SqliteRow) -> Result<ContentIdea> {
    let status_raw: String = row.try_get("status").map_err(BotError::Database)?;
    let status = IdeaStatus::parse(&status_raw)
        .ok_or_else(|| decode_err(format!("unknown idea status {status_raw}")))?;
    Ok(ContentIdea {
        id: row.try_get("id").map_err(BotError::Database)?,
        dedup_hash: row.try_get("dedup_hash").map_err(BotError::Database)?,
        title: row.try_get("title").map_err(BotError::Database)?,
        summary: row.try_get("summary").map_err(BotError::Database)?,
        source: row.try_get("source").map_err(BotError::Database)?,
        freshness_score: get_decimal(row, "freshness_score")?,
        potential_score: get_decimal(row, "potential_score")?,
        status,
        created_at: get_datetime(row, "created_at")?,
        updated_at: get_datetime(row, "updated_at")?,
    })
}

fn script_from_row(row: &SqliteRow) -> Result<Script> {
    let variant_raw: String = row.try_get("variant").map_err(BotError::Database)?;
    let status_raw: String = row.try_get("status").map_err(BotError::Database)?;
    Ok(Script {
        id: row.try_get("id").map_err(BotError::Database)?,
        idea_id: row.try_get("idea_id").map_err(BotError::Database)?,
        variant: Variant::parse(&variant_raw)
            .ok_or_else(|| decode_err(format!("unknown variant {variant_raw}")))?,
        body: row.try_get("body").map_err(BotError::Database)?,
        status: ScriptStatus::parse(&status_raw)
            .ok_or_else(|| decode_err(format!("unknown script status {status_raw}")))?,
        qa_feedback: row.try_get("qa_feedback").map_err(BotError::Database)?,
        created_at: get_datetime(row, "created_at")?,
    })
}

fn asset_from_row(row: &SqliteRow) -> Result<Asset> {
    Ok(Asset {
        id: row.try_get("id").map_err(BotError::Database)?,
        idea_id: row.try_get("idea_id").map_err(BotError::Database)?,
        script_id: row.try_get("script_id").map_err(BotError::Database)?,
        kind: row.try_get("kind").map_err(BotError::Database)?,
        location: row.try_get("location").map_err(BotError::Database)?,
        created_at: get_datetime(row, "created_at")?,
    })
}

fn qa_from_row(row: &SqliteRow) -> Result<QaResult> {
    Ok(QaResult {
        id: row.try_get("id").map_err(BotError::Database)?,
        idea_id: row.try_get("idea_id").map_err(BotError::Database)?,
        script_id: row.try_get("script_id").map_err(BotError::Database)?,
        passed: row.try_get("passed").map_err(BotError::Database)?,
        notes: row.try_get("notes").map_err(BotError::Database)?,
        created_at: get_datetime(row, "created_at")?,
    })
}

fn approval_from_row(row: &SqliteRow) -> Result<Approval> {
    Ok(Approval {
        id: row.try_get("id").map_err(BotError::Database)?,
        idea_id: row.try_get("idea_id").map_err(BotError::Database)?,
        approved: row.try_get("approved").map_err(BotError::Database)?,
        approver: row.try_get("approver").map_err(BotError::Database)?,
        notes: row.try_get("notes").map_err(BotError::Database)?,
        created_at: get_datetime(row, "created_at")?,
    })
}

fn queue_from_row(row: &SqliteRow) -> Result<PublishQueueEntry> {
    Ok(PublishQueueEntry {
        id: row.try_get("id").map_err(BotError::Database)?,
        idea_id: row.try_get("idea_id").map_err(BotError::Database)?,
        platform: row.try_get("platform").map_err(BotError::Database)?,
        scheduled_for: get_datetime(row, "scheduled_for")?,
        posted_at: get_opt_datetime(row, "posted_at")?,
        post_id: row.try_get("post_id").map_err(BotError::Database)?,
    })
}

fn analytics_from_row(row: &SqliteRow) -> Result<AnalyticsRow> {
    let date_raw: String = row.try_get("date").map_err(BotError::Database)?;
    Ok(AnalyticsRow {
        id: row.try_get("id").map_err(BotError::Database)?,
        platform: row.try_get("platform").map_err(BotError::Database)?,
        post_id: row.try_get("post_id").map_err(BotError::Database)?,
        date: date_raw
            .parse()
            .map_err(|e| decode_err(format!("date: {e}")))?,
        metrics: DailyMetrics {
            views: row.try_get("views").map_err(BotError::Database)?,
            likes: row.try_get("likes").map_err(BotError::Database)?,
            comments: row.try_get("comments").map_err(BotError::Database)?,
            shares: row.try_get("shares").map_err(BotError::Database)?,
            revenue: get_decimal(row, "revenue")?,
        },
    })
}

fn hook_from_row(row: &SqliteRow) -> Result<Hook> {
    Ok(Hook {
        id: row.try_get("id").map_err(BotError::Database)?,
        text: row.try_get("text").map_err(BotError::Database)?,
        category: row.try_get("category").map_err(BotError::Database)?,
        usage_count: row.try_get("usage_count").map_err(BotError::Database)?,
        avg_performance: get_decimal(row, "avg_performance")?,
    })
}

fn pattern_from_row(row: &SqliteRow) -> Result<Pattern> {
    Ok(Pattern {
        id: row.try_get("id").map_err(BotError::Database)?,
        name: row.try_get("name").map_err(BotError::Database)?,
        description: row.try_get("description").map_err(BotError::Database)?,
        usage_count: row.try_get("usage_count").map_err(BotError::Database)?,
        avg_performance: get_decimal(row, "avg_performance")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn idea(hash: &str) -> NewIdea {
        NewIdea {
            dedup_hash: hash.into(),
            title: "5 mistakes every new trader makes".into(),
            summary: Some("listicle".into()),
            source: Some("trends".into()),
            freshness_score: dec!(0.8),
            potential_score: dec!(0.6),
        }
    }

    #[tokio::test]
    async fn test_insert_and_dedup() {
        let store = PipelineStore::connect_in_memory().await.unwrap();
        let id = store.insert_idea(&idea("h1")).await.unwrap().unwrap();
        assert!(id > 0);
        // same hash is silently deduplicated
        assert!(store.insert_idea(&idea("h1")).await.unwrap().is_none());
        assert!(store.insert_idea(&idea("h2")).await.unwrap().is_some());

        let loaded = store.get_idea(id).await.unwrap().unwrap();
        assert_eq!(loaded.status, IdeaStatus::New);
        assert_eq!(loaded.freshness_score, dec!(0.8));
    }

    #[tokio::test]
    async fn test_negative_scores_rejected() {
        let store = PipelineStore::connect_in_memory().await.unwrap();
        let mut bad = idea("h1");
        bad.potential_score = dec!(-1);
        assert!(store.insert_idea(&bad).await.is_err());
    }

    #[tokio::test]
    async fn test_lifecycle_monotonic() {
        let store = PipelineStore::connect_in_memory().await.unwrap();
        let id = store.insert_idea(&idea("h1")).await.unwrap().unwrap();

        let advanced = store.advance_idea(id, IdeaStatus::Scripted).await.unwrap();
        assert_eq!(advanced.status, IdeaStatus::Scripted);
        store.advance_idea(id, IdeaStatus::Approved).await.unwrap();

        // backward move rejected and not persisted
        let err = store.advance_idea(id, IdeaStatus::Qa).await.unwrap_err();
        assert!(matches!(err, BotError::InvalidTransition(_, _)));
        let current = store.get_idea(id).await.unwrap().unwrap();
        assert_eq!(current.status, IdeaStatus::Approved);
    }

    #[tokio::test]
    async fn test_stale_transition_leaves_row_untouched() {
        let store = PipelineStore::connect_in_memory().await.unwrap();
        let id = store.insert_idea(&idea("h1")).await.unwrap().unwrap();
        store.advance_idea(id, IdeaStatus::Scripted).await.unwrap();

        // a writer holding a snapshot from before the advance must not win
        let won = store
            .transition_status(id, IdeaStatus::New, IdeaStatus::Qa)
            .await
            .unwrap();
        assert!(!won);
        let current = store.get_idea(id).await.unwrap().unwrap();
        assert_eq!(current.status, IdeaStatus::Scripted);

        let won = store
            .transition_status(id, IdeaStatus::Scripted, IdeaStatus::Qa)
            .await
            .unwrap();
        assert!(won);
    }

    #[tokio::test]
    async fn test_script_variants_unique_per_idea() {
        let store = PipelineStore::connect_in_memory().await.unwrap();
        let id = store.insert_idea(&idea("h1")).await.unwrap().unwrap();
        store.add_script(id, Variant::A, "draft a").await.unwrap();
        store.add_script(id, Variant::B, "draft b").await.unwrap();
        // second A for the same idea violates the unique key
        assert!(store.add_script(id, Variant::A, "again").await.is_err());

        let scripts = store.scripts_for_idea(id).await.unwrap();
        assert_eq!(scripts.len(), 2);
        assert_eq!(scripts[0].variant, Variant::A);
        assert_eq!(scripts[0].status, ScriptStatus::Draft);
    }

    #[tokio::test]
    async fn test_cascade_delete() {
        let store = PipelineStore::connect_in_memory().await.unwrap();
        let id = store.insert_idea(&idea("h1")).await.unwrap().unwrap();
        let script_id = store.add_script(id, Variant::A, "draft").await.unwrap();
        store
            .add_asset(id, Some(script_id), "video", "s3://bucket/v.mp4")
            .await
            .unwrap();
        store
            .add_qa_result(id, Some(script_id), true, None)
            .await
            .unwrap();
        store.add_approval(id, true, "ops", None).await.unwrap();
        store
            .enqueue_publish(id, "youtube", Utc::now())
            .await
            .unwrap();

        assert!(store.delete_idea(id).await.unwrap());
        assert!(store.scripts_for_idea(id).await.unwrap().is_empty());
        assert!(store.assets_for_idea(id).await.unwrap().is_empty());
        assert!(store.qa_results_for_idea(id).await.unwrap().is_empty());
        assert!(store.approvals_for_idea(id).await.unwrap().is_empty());
        assert!(store.due_publishes(Utc::now()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_publish_queue_unique_and_due() {
        let store = PipelineStore::connect_in_memory().await.unwrap();
        let id = store.insert_idea(&idea("h1")).await.unwrap().unwrap();
        let now = Utc::now();

        assert!(store.enqueue_publish(id, "youtube", now).await.unwrap());
        assert!(!store.enqueue_publish(id, "youtube", now).await.unwrap());
        assert!(store.enqueue_publish(id, "tiktok", now).await.unwrap());

        let due = store.due_publishes(now).await.unwrap();
        assert_eq!(due.len(), 2);

        store.mark_published(due[0].id, "post-1").await.unwrap();
        assert_eq!(store.due_publishes(now).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_analytics_upsert() {
        let store = PipelineStore::connect_in_memory().await.unwrap();
        let date = NaiveDate::from_ymd_opt(2025, 8, 1).unwrap();
        let first = DailyMetrics {
            views: 100,
            likes: 10,
            comments: 2,
            shares: 1,
            revenue: dec!(0.50),
        };
        store
            .upsert_analytics("youtube", "post-1", date, &first)
            .await
            .unwrap();
        // same key updates in place
        let second = DailyMetrics {
            views: 250,
            likes: 25,
            comments: 5,
            shares: 3,
            revenue: dec!(1.25),
        };
        store
            .upsert_analytics("youtube", "post-1", date, &second)
            .await
            .unwrap();

        let rows = store.analytics_for_post("youtube", "post-1").await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].metrics.views, 250);
        assert_eq!(rows[0].metrics.revenue, dec!(1.25));
    }

    #[tokio::test]
    async fn test_hook_running_average() {
        let store = PipelineStore::connect_in_memory().await.unwrap();
        let id = store.add_hook("you won't believe", Some("curiosity")).await.unwrap();
        store.record_hook_use(id, dec!(0.4)).await.unwrap();
        store.record_hook_use(id, dec!(0.8)).await.unwrap();

        let hooks = store.top_hooks(10).await.unwrap();
        assert_eq!(hooks.len(), 1);
        assert_eq!(hooks[0].usage_count, 2);
        assert_eq!(hooks[0].avg_performance, dec!(0.6));
    }

    #[tokio::test]
    async fn test_patterns() {
        let store = PipelineStore::connect_in_memory().await.unwrap();
        store.add_pattern("before_after", Some("transformation")).await.unwrap();
        store.add_pattern("before_after", None).await.unwrap();
        assert_eq!(store.list_patterns().await.unwrap().len(), 1);
    }
}
