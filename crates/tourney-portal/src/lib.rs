//! Portal application feeds: the read-only source of truth for tournament approvals.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;
use tourney_core::TournamentApplication;
use tourney_storage::{FetchError, HttpClientConfig, HttpFetcher};
use uuid::Uuid;

pub const CRATE_NAME: &str = "tourney-portal";

pub const APPLICATIONS_PATH: &str = "api/tournament-applications";

#[derive(Debug, Error)]
pub enum PortalError {
    #[error("portal unavailable: {0}")]
    Unavailable(String),
    #[error("decoding applications from {origin}: {message}")]
    Decode { origin: String, message: String },
    #[error("reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl From<FetchError> for PortalError {
    fn from(err: FetchError) -> Self {
        PortalError::Unavailable(err.to_string())
    }
}

/// Read access to Portal applications. Implementations return every
/// application they know about; filtering by status is the caller's job.
#[async_trait]
pub trait ApplicationSource: Send + Sync {
    fn source_name(&self) -> &str;

    async fn fetch_applications(&self) -> Result<Vec<TournamentApplication>, PortalError>;

    async fn fetch_application(
        &self,
        application_id: &str,
    ) -> Result<Option<TournamentApplication>, PortalError> {
        Ok(self
            .fetch_applications()
            .await?
            .into_iter()
            .find(|a| a.application_id == application_id))
    }
}

/// Accepts either a bare list or `{ applications: [...] }`.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ApplicationFeed {
    List(Vec<TournamentApplication>),
    Wrapped { applications: Vec<TournamentApplication> },
}

impl ApplicationFeed {
    fn into_applications(self) -> Vec<TournamentApplication> {
        match self {
            ApplicationFeed::List(list) => list,
            ApplicationFeed::Wrapped { applications } => applications,
        }
    }
}

pub fn parse_json_feed(origin: &str, bytes: &[u8]) -> Result<Vec<TournamentApplication>, PortalError> {
    serde_json::from_slice::<ApplicationFeed>(bytes)
        .map(ApplicationFeed::into_applications)
        .map_err(|err| PortalError::Decode {
            origin: origin.to_string(),
            message: err.to_string(),
        })
}

pub fn parse_yaml_feed(origin: &str, text: &str) -> Result<Vec<TournamentApplication>, PortalError> {
    serde_yaml::from_str::<ApplicationFeed>(text)
        .map(ApplicationFeed::into_applications)
        .map_err(|err| PortalError::Decode {
            origin: origin.to_string(),
            message: err.to_string(),
        })
}

/// Fixed in-process feed, mainly for tests and seeding.
#[derive(Debug, Clone, Default)]
pub struct StaticApplicationSource {
    applications: Vec<TournamentApplication>,
    unavailable: bool,
}

impl StaticApplicationSource {
    pub fn new(applications: Vec<TournamentApplication>) -> Self {
        Self {
            applications,
            unavailable: false,
        }
    }

    /// A feed that always fails, to simulate an unreachable Portal.
    pub fn unavailable() -> Self {
        Self {
            applications: Vec::new(),
            unavailable: true,
        }
    }
}

#[async_trait]
impl ApplicationSource for StaticApplicationSource {
    fn source_name(&self) -> &str {
        "static"
    }

    async fn fetch_applications(&self) -> Result<Vec<TournamentApplication>, PortalError> {
        if self.unavailable {
            return Err(PortalError::Unavailable("static source marked unavailable".into()));
        }
        Ok(self.applications.clone())
    }
}

/// Exported Portal data on disk, `.yaml`/`.yml` or JSON.
#[derive(Debug, Clone)]
pub struct FixtureApplicationSource {
    path: PathBuf,
}

impl FixtureApplicationSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn is_yaml(&self) -> bool {
        matches!(
            self.path.extension().and_then(|e| e.to_str()),
            Some("yaml") | Some("yml")
        )
    }
}

#[async_trait]
impl ApplicationSource for FixtureApplicationSource {
    fn source_name(&self) -> &str {
        "fixture"
    }

    async fn fetch_applications(&self) -> Result<Vec<TournamentApplication>, PortalError> {
        let bytes = tokio::fs::read(&self.path).await.map_err(|source| PortalError::Io {
            path: self.path.clone(),
            source,
        })?;
        let origin = self.path.display().to_string();
        let applications = if self.is_yaml() {
            let text = String::from_utf8(bytes).map_err(|err| PortalError::Decode {
                origin: origin.clone(),
                message: err.to_string(),
            })?;
            parse_yaml_feed(&origin, &text)?
        } else {
            parse_json_feed(&origin, &bytes)?
        };
        tracing::debug!(path = %origin, count = applications.len(), "loaded fixture applications");
        Ok(applications)
    }
}

/// Portal REST endpoint returning approved applications as a JSON array.
#[derive(Debug)]
pub struct HttpApplicationSource {
    base_url: String,
    http: HttpFetcher,
}

impl HttpApplicationSource {
    pub fn new(base_url: impl Into<String>, config: HttpClientConfig) -> anyhow::Result<Self> {
        Ok(Self {
            base_url: base_url.into(),
            http: HttpFetcher::new(config)?,
        })
    }

    pub fn applications_url(&self) -> String {
        format!(
            "{}/{}?status=approved",
            self.base_url.trim_end_matches('/'),
            APPLICATIONS_PATH
        )
    }
}

#[async_trait]
impl ApplicationSource for HttpApplicationSource {
    fn source_name(&self) -> &str {
        "portal-http"
    }

    async fn fetch_applications(&self) -> Result<Vec<TournamentApplication>, PortalError> {
        let url = self.applications_url();
        let resp = self.http.fetch_bytes(Uuid::new_v4(), &url).await?;
        parse_json_feed(&resp.final_url, &resp.body)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PortalConfig {
    Fixture(PathBuf),
    Http { base_url: String },
}

pub fn source_for(
    config: &PortalConfig,
    http: HttpClientConfig,
) -> anyhow::Result<Box<dyn ApplicationSource>> {
    Ok(match config {
        PortalConfig::Fixture(path) => Box::new(FixtureApplicationSource::new(path.clone())),
        PortalConfig::Http { base_url } => Box::new(HttpApplicationSource::new(base_url.clone(), http)?),
    })
}
