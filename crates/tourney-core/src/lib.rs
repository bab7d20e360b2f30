//! Core domain model for tournament reconciliation between the Portal and the Website.

use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const CRATE_NAME: &str = "tourney-core";

/// Approval status of a Portal application.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ApplicationStatus {
    Submitted,
    PendingReview,
    Approved,
    Rejected,
}

impl ApplicationStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Submitted => "submitted",
            Self::PendingReview => "pending-review",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
        }
    }
}

/// Source-of-truth submission owned by the Portal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TournamentApplication {
    pub application_id: String,
    pub title: String,
    #[serde(default)]
    pub start_date: Option<NaiveDate>,
    #[serde(default)]
    pub end_date: Option<NaiveDate>,
    pub status: ApplicationStatus,
    #[serde(default)]
    pub organizer: Option<String>,
    #[serde(default)]
    pub venue: Option<String>,
    #[serde(default)]
    pub contact_phone: Option<String>,
}

impl TournamentApplication {
    pub fn is_approved(&self) -> bool {
        self.status == ApplicationStatus::Approved
    }
}

/// Public visibility of a Website record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum VisibilityState {
    #[default]
    Staging,
    Ready,
    Live,
}

impl VisibilityState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Staging => "staging",
            Self::Ready => "ready",
            Self::Live => "live",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "staging" => Some(Self::Staging),
            "ready" => Some(Self::Ready),
            "live" => Some(Self::Live),
            _ => None,
        }
    }

    pub fn is_promoted(self) -> bool {
        !matches!(self, Self::Staging)
    }
}

impl fmt::Display for VisibilityState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fields a staging record needs before it can go public.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequiredField {
    SourceApplicationId,
    ContactPhone,
    Venue,
    Organizer,
}

impl RequiredField {
    pub const ALL: [RequiredField; 4] = [
        RequiredField::SourceApplicationId,
        RequiredField::ContactPhone,
        RequiredField::Venue,
        RequiredField::Organizer,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::SourceApplicationId => "source_application_id",
            Self::ContactPhone => "contact_phone",
            Self::Venue => "venue",
            Self::Organizer => "organizer",
        }
    }
}

impl fmt::Display for RequiredField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Public catalog entry owned by the Website.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TournamentRecord {
    pub id: Uuid,
    pub name: String,
    #[serde(default)]
    pub start_date: Option<NaiveDate>,
    #[serde(default)]
    pub end_date: Option<NaiveDate>,
    #[serde(default)]
    pub source_application_id: Option<String>,
    #[serde(default)]
    pub managed_by_source: bool,
    #[serde(default)]
    pub visibility: VisibilityState,
    #[serde(default)]
    pub contact_phone: Option<String>,
    #[serde(default)]
    pub venue: Option<String>,
    #[serde(default)]
    pub organizer: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub promoted_at: Option<DateTime<Utc>>,
}

impl TournamentRecord {
    /// New administrative entry: staging, no Portal link.
    pub fn new(name: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            start_date: None,
            end_date: None,
            source_application_id: None,
            managed_by_source: false,
            visibility: VisibilityState::Staging,
            contact_phone: None,
            venue: None,
            organizer: None,
            created_at: now,
            updated_at: now,
            promoted_at: None,
        }
    }

    /// Staging record seeded from an approved application.
    pub fn from_application(application: &TournamentApplication, now: DateTime<Utc>) -> Self {
        Self {
            start_date: application.start_date,
            end_date: application.end_date,
            source_application_id: Some(application.application_id.clone()),
            managed_by_source: true,
            contact_phone: application.contact_phone.clone(),
            venue: application.venue.clone(),
            organizer: application.organizer.clone(),
            ..Self::new(application.title.clone(), now)
        }
    }

    /// Source id with blank values treated as absent.
    pub fn source_id(&self) -> Option<&str> {
        present(&self.source_application_id)
    }

    pub fn has_source_id(&self) -> bool {
        self.source_id().is_some()
    }

    pub fn missing_fields(&self) -> Vec<RequiredField> {
        RequiredField::ALL
            .into_iter()
            .filter(|field| {
                let value = match field {
                    RequiredField::SourceApplicationId => &self.source_application_id,
                    RequiredField::ContactPhone => &self.contact_phone,
                    RequiredField::Venue => &self.venue,
                    RequiredField::Organizer => &self.organizer,
                };
                present(value).is_none()
            })
            .collect()
    }

    pub fn is_complete(&self) -> bool {
        self.missing_fields().is_empty()
    }

    /// Advances `staging -> ready -> live` when complete and returns the states
    /// passed through. Empty when the record is already live or incomplete.
    pub fn promote(&mut self, now: DateTime<Utc>) -> Vec<VisibilityState> {
        if self.visibility == VisibilityState::Live || !self.is_complete() {
            return Vec::new();
        }
        let mut passed = Vec::with_capacity(2);
        if self.visibility == VisibilityState::Staging {
            self.visibility = VisibilityState::Ready;
            passed.push(VisibilityState::Ready);
        }
        self.visibility = VisibilityState::Live;
        passed.push(VisibilityState::Live);
        self.promoted_at = Some(now);
        self.updated_at = now;
        passed
    }
}

fn present(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 5, 1, 9, 0, 0).single().unwrap()
    }

    fn complete_record() -> TournamentRecord {
        let mut record = TournamentRecord::new("Summer Cup", ts());
        record.source_application_id = Some("A1".into());
        record.contact_phone = Some("+44 20 7946 0000".into());
        record.venue = Some("Riverside Hall".into());
        record.organizer = Some("County Association".into());
        record
    }

    #[test]
    fn blank_values_count_as_missing() {
        let mut record = complete_record();
        record.venue = Some("   ".into());
        record.source_application_id = Some(String::new());
        assert_eq!(
            record.missing_fields(),
            vec![RequiredField::SourceApplicationId, RequiredField::Venue]
        );
        assert!(!record.has_source_id());
    }

    #[test]
    fn promotion_passes_through_ready() {
        let mut record = complete_record();
        let passed = record.promote(ts());
        assert_eq!(passed, vec![VisibilityState::Ready, VisibilityState::Live]);
        assert_eq!(record.visibility, VisibilityState::Live);
        assert_eq!(record.promoted_at, Some(ts()));
        assert!(record.promote(ts()).is_empty());
    }

    #[test]
    fn incomplete_record_stays_in_staging() {
        let mut record = complete_record();
        record.organizer = None;
        assert!(record.promote(ts()).is_empty());
        assert_eq!(record.visibility, VisibilityState::Staging);
    }

    #[test]
    fn application_wire_format_is_camel_case() {
        let app: TournamentApplication = serde_json::from_str(
            r#"{"applicationId":"A1","title":"Summer Cup","status":"pending-review","startDate":"2026-07-04"}"#,
        )
        .unwrap();
        assert_eq!(app.application_id, "A1");
        assert_eq!(app.status, ApplicationStatus::PendingReview);
        assert_eq!(app.start_date, NaiveDate::from_ymd_opt(2026, 7, 4));
        assert!(!app.is_approved());
    }
}
