use std::path::Path;

use tourney_core::ApplicationStatus;
use tourney_portal::{ApplicationSource, FixtureApplicationSource};

#[tokio::test]
async fn shipped_fixture_feed_parses() {
    let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("../../fixtures/applications.json");
    let source = FixtureApplicationSource::new(path);

    let applications = source.fetch_applications().await.expect("fixture feed");
    assert_eq!(applications.len(), 3);
    assert_eq!(
        applications.iter().filter(|a| a.is_approved()).count(),
        2
    );
    assert_eq!(applications[2].status, ApplicationStatus::PendingReview);

    let summer = source
        .fetch_application("A1")
        .await
        .expect("lookup")
        .expect("A1 present");
    assert_eq!(summer.title, "Summer Cup");
    assert_eq!(summer.venue.as_deref(), Some("Riverside Hall"));
}
