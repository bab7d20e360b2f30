//! Deciding whether a Portal application and a Website record denote the same tournament.

use std::str::FromStr;

use strsim::jaro_winkler;
use tourney_core::{TournamentApplication, TournamentRecord};

pub trait RecordMatcher: Send + Sync {
    fn name(&self) -> &'static str;

    fn is_match(&self, application: &TournamentApplication, record: &TournamentRecord) -> bool;

    /// Candidates in the order `records` lists them. Pure read.
    fn find_matches<'a>(
        &self,
        application: &TournamentApplication,
        records: &'a [TournamentRecord],
    ) -> Vec<&'a TournamentRecord> {
        records
            .iter()
            .filter(|record| self.is_match(application, record))
            .collect()
    }
}

/// Exact, case-sensitive title equality. Trailing whitespace or punctuation
/// differences do not match.
#[derive(Debug, Default, Clone, Copy)]
pub struct ExactTitleMatcher;

impl RecordMatcher for ExactTitleMatcher {
    fn name(&self) -> &'static str {
        "exact"
    }

    fn is_match(&self, application: &TournamentApplication, record: &TournamentRecord) -> bool {
        application.title == record.name
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NormalizedTitleMatcher;

impl RecordMatcher for NormalizedTitleMatcher {
    fn name(&self) -> &'static str {
        "normalized"
    }

    fn is_match(&self, application: &TournamentApplication, record: &TournamentRecord) -> bool {
        let title = normalize_title(&application.title);
        !title.is_empty() && title == normalize_title(&record.name)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct FuzzyTitleMatcher {
    pub threshold: f64,
}

impl FuzzyTitleMatcher {
    pub fn score(&self, application: &TournamentApplication, record: &TournamentRecord) -> f64 {
        jaro_winkler(&normalize_title(&application.title), &normalize_title(&record.name))
    }
}

impl RecordMatcher for FuzzyTitleMatcher {
    fn name(&self) -> &'static str {
        "fuzzy"
    }

    fn is_match(&self, application: &TournamentApplication, record: &TournamentRecord) -> bool {
        self.score(application, record) >= self.threshold
    }
}

pub fn normalize_title(input: &str) -> String {
    input
        .chars()
        .flat_map(char::to_lowercase)
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MatchMode {
    #[default]
    Exact,
    Normalized,
    Fuzzy,
}

impl FromStr for MatchMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "exact" => Ok(Self::Exact),
            "normalized" => Ok(Self::Normalized),
            "fuzzy" => Ok(Self::Fuzzy),
            other => Err(format!("unknown match mode {other:?}")),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct MatcherConfig {
    pub mode: MatchMode,
    pub fuzzy_threshold: f64,
}

impl Default for MatcherConfig {
    fn default() -> Self {
        Self {
            mode: MatchMode::Exact,
            fuzzy_threshold: 0.95,
        }
    }
}

pub fn matcher_for(config: &MatcherConfig) -> Box<dyn RecordMatcher> {
    match config.mode {
        MatchMode::Exact => Box::new(ExactTitleMatcher),
        MatchMode::Normalized => Box::new(NormalizedTitleMatcher),
        MatchMode::Fuzzy => Box::new(FuzzyTitleMatcher {
            threshold: config.fuzzy_threshold,
        }),
    }
}
