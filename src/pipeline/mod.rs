//! Content-pipeline persistence.
//!
//! The pipeline tracks content ideas from discovery to publication. The
//! store is driven by external triggers (webhooks, cron), so the lifecycle
//! is enforced here at the API: an idea's status only ever moves forward.

pub mod store;

pub use store::PipelineStore;

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::{BotError, Result};

/// Idea lifecycle, in order. Transitions are monotonic: any forward step
/// is allowed, backward steps are rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdeaStatus {
    New,
    Scripted,
    AssetsReady,
    Qa,
    Approved,
    Scheduled,
    Published,
}

impl IdeaStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            IdeaStatus::New => "new",
            IdeaStatus::Scripted => "scripted",
            IdeaStatus::AssetsReady => "assets_ready",
            IdeaStatus::Qa => "qa",
            IdeaStatus::Approved => "approved",
            IdeaStatus::Scheduled => "scheduled",
            IdeaStatus::Published => "published",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "new" => Some(IdeaStatus::New),
            "scripted" => Some(IdeaStatus::Scripted),
            "assets_ready" => Some(IdeaStatus::AssetsReady),
            "qa" => Some(IdeaStatus::Qa),
            "approved" => Some(IdeaStatus::Approved),
            "scheduled" => Some(IdeaStatus::Scheduled),
            "published" => Some(IdeaStatus::Published),
            _ => None,
        }
    }

    fn rank(&self) -> u8 {
        match self {
            IdeaStatus::New => 0,
            IdeaStatus::Scripted => 1,
            IdeaStatus::AssetsReady => 2,
            IdeaStatus::Qa => 3,
            IdeaStatus::Approved => 4,
            IdeaStatus::Scheduled => 5,
            IdeaStatus::Published => 6,
        }
    }

    /// Validate a forward-only transition.
    pub fn advance_to(self, next: IdeaStatus) -> Result<IdeaStatus> {
        if next.rank() > self.rank() {
            Ok(next)
        } else {
            Err(BotError::InvalidTransition(
                self.as_str().to_string(),
                next.as_str().to_string(),
            ))
        }
    }
}

/// Script variants, three drafts per idea.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Variant {
    A,
    B,
    C,
}

impl Variant {
    pub fn as_str(&self) -> &'static str {
        match self {
            Variant::A => "A",
            Variant::B => "B",
            Variant::C => "C",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "A" => Some(Variant::A),
            "B" => Some(Variant::B),
            "C" => Some(Variant::C),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScriptStatus {
    Draft,
    Qa,
    Approved,
    Rejected,
}

impl ScriptStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScriptStatus::Draft => "draft",
            ScriptStatus::Qa => "qa",
            ScriptStatus::Approved => "approved",
            ScriptStatus::Rejected => "rejected",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "draft" => Some(ScriptStatus::Draft),
            "qa" => Some(ScriptStatus::Qa),
            "approved" => Some(ScriptStatus::Approved),
            "rejected" => Some(ScriptStatus::Rejected),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentIdea {
    pub id: i64,
    pub dedup_hash: String,
    pub title: String,
    pub summary: Option<String>,
    pub source: Option<String>,
    pub freshness_score: Decimal,
    pub potential_score: Decimal,
    pub status: IdeaStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Insert payload for a new idea; scores must be non-negative.
#[derive(Debug, Clone)]
pub struct NewIdea {
    pub dedup_hash: String,
    pub title: String,
    pub summary: Option<String>,
    pub source: Option<String>,
    pub freshness_score: Decimal,
    pub potential_score: Decimal,
}

impl NewIdea {
    pub fn validate(&self) -> Result<()> {
        if self.freshness_score < Decimal::ZERO || self.potential_score < Decimal::ZERO {
            return Err(BotError::Config("idea scores must be non-negative".into()));
        }
        if self.dedup_hash.is_empty() {
            return Err(BotError::Config("dedup_hash must not be empty".into()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Script {
    pub id: i64,
    pub idea_id: i64,
    pub variant: Variant,
    pub body: String,
    pub status: ScriptStatus,
    pub qa_feedback: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Asset {
    pub id: i64,
    pub idea_id: i64,
    pub script_id: Option<i64>,
    pub kind: String,
    pub location: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QaResult {
    pub id: i64,
    pub idea_id: i64,
    pub script_id: Option<i64>,
    pub passed: bool,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Approval {
    pub id: i64,
    pub idea_id: i64,
    pub approved: bool,
    pub approver: String,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublishQueueEntry {
    pub id: i64,
    pub idea_id: i64,
    pub platform: String,
    pub scheduled_for: DateTime<Utc>,
    pub posted_at: Option<DateTime<Utc>>,
    pub post_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DailyMetrics {
    pub views: i64,
    pub likes: i64,
    pub comments: i64,
    pub shares: i64,
    pub revenue: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyticsRow {
    pub id: i64,
    pub platform: String,
    pub post_id: String,
    pub date: NaiveDate,
    pub metrics: DailyMetrics,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Hook {
    pub id: i64,
    pub text: String,
    pub category: Option<String>,
    pub usage_count: i64,
    pub avg_performance: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pattern {
    pub id: i64,
    pub name: String,
    pub description: Option<String>,
    pub usage_count: i64,
    pub avg_performance: Decimal,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_forward_transitions_allowed() {
        assert_eq!(
            IdeaStatus::New.advance_to(IdeaStatus::Scripted).unwrap(),
            IdeaStatus::Scripted
        );
        // skipping stages forward is fine
        assert!(IdeaStatus::New.advance_to(IdeaStatus::Published).is_ok());
        assert!(IdeaStatus::Qa.advance_to(IdeaStatus::Scheduled).is_ok());
    }

    #[test]
    fn test_backward_and_self_transitions_rejected() {
        assert!(matches!(
            IdeaStatus::Approved.advance_to(IdeaStatus::Qa),
            Err(BotError::InvalidTransition(_, _))
        ));
        assert!(IdeaStatus::New.advance_to(IdeaStatus::New).is_err());
        assert!(IdeaStatus::Published
            .advance_to(IdeaStatus::Scheduled)
            .is_err());
    }

    #[test]
    fn test_status_round_trip() {
        for status in [
            IdeaStatus::New,
            IdeaStatus::Scripted,
            IdeaStatus::AssetsReady,
            IdeaStatus::Qa,
            IdeaStatus::Approved,
            IdeaStatus::Scheduled,
            IdeaStatus::Published,
        ] {
            assert_eq!(IdeaStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(IdeaStatus::parse("bogus"), None);
    }

    #[test]
    fn test_new_idea_validation() {
        let mut idea = NewIdea {
            dedup_hash: "abc".into(),
            title: "t".into(),
            summary: None,
            source: None,
            freshness_score: dec!(0.5),
            potential_score: dec!(0.9),
        };
        assert!(idea.validate().is_ok());
        idea.freshness_score = dec!(-0.1);
        assert!(idea.validate().is_err());
        idea.freshness_score = dec!(0);
        idea.dedup_hash.clear();
        assert!(idea.validate().is_err());
    }
}
