//! Repository identity: foreign stanzas, unreadable repositories and the
//! leader's teardown of its claim

mod common;

use common::{stanza, FakeEngine, FakeTool, FakeWorkload, Fixed, InfoAnswer};
use pgwarden::backup::{BackupState, ClusterIdentity, RepositoryIdentityChecker, StanzaName};
use pgwarden::common::{PeerData, RetryPolicy};
use pgwarden::{Error, Refusal};
use std::sync::Arc;
use std::time::Duration;

struct Harness {
    stanza: StanzaName,
    engine: Arc<FakeEngine>,
    tool: Arc<FakeTool>,
    workload: Arc<FakeWorkload>,
    peer: Arc<PeerData>,
    checker: RepositoryIdentityChecker,
}

impl Harness {
    fn new(info: InfoAnswer) -> Self {
        let stanza = ClusterIdentity::new("prod", "patroni-pg").stanza_name();
        let engine = Arc::new(FakeEngine::new());
        let tool = Arc::new(FakeTool::new(info));
        let workload = Arc::new(FakeWorkload::default());
        let peer = Arc::new(PeerData::in_memory());
        let checker = RepositoryIdentityChecker::new(
            "pg/0",
            stanza.clone(),
            tool.clone(),
            workload.clone(),
            engine.clone(),
            peer.clone(),
            RetryPolicy::exponential(3, Duration::from_millis(1), Duration::from_millis(4)),
        );
        let harness = Self {
            stanza,
            engine,
            tool,
            workload,
            peer,
            checker,
        };
        harness.claim();
        harness
    }

    fn claim(&self) {
        let writer = self.peer.app_writer(&Fixed(true)).unwrap();
        BackupState::new(self.peer.clone())
            .claim(&writer, &self.stanza)
            .unwrap();
    }

    fn claimed(&self) -> Option<String> {
        BackupState::new(self.peer.clone()).claimed()
    }
}

#[tokio::test]
async fn test_no_data_is_refused() {
    let h = Harness::new(InfoAnswer::NoData);

    let err = h.checker.can_use_repository(&Fixed(true)).await.unwrap_err();
    assert!(matches!(err, Error::Refused(Refusal::RepositoryUnreadable)));
    assert_eq!(
        err.to_string(),
        "failed to initialize stanza, check your S3 settings"
    );
    // Nothing is torn down on an unreadable repository.
    assert_eq!(h.claimed().as_deref(), Some("prod.patroni-pg"));
    assert!(h.workload.calls().is_empty());
}

#[tokio::test]
async fn test_tool_failure_is_refused_without_retrying_terminal_errors() {
    let h = Harness::new(InfoAnswer::Fails);

    let err = h.checker.can_use_repository(&Fixed(false)).await.unwrap_err();
    assert!(matches!(err, Error::Refused(Refusal::RepositoryUnreadable)));
    assert_eq!(h.tool.count("info"), 1);
}

#[tokio::test]
async fn test_empty_repository_is_usable() {
    let h = Harness::new(InfoAnswer::Listing(Vec::new()));

    h.checker.can_use_repository(&Fixed(true)).await.unwrap();
    assert_eq!(h.tool.calls(), vec!["info *".to_string()]);
}

#[tokio::test]
async fn test_matching_stanza_is_usable() {
    let h = Harness::new(InfoAnswer::Listing(vec![stanza(
        "prod.patroni-pg",
        &["20230101-090000F"],
    )]));

    h.checker.can_use_repository(&Fixed(true)).await.unwrap();
    assert_eq!(h.claimed().as_deref(), Some("prod.patroni-pg"));
    assert!(h.workload.calls().is_empty());
    assert_eq!(h.engine.reloads(), 0);
}

#[tokio::test]
async fn test_replica_tolerates_foreign_stanza() {
    let h = Harness::new(InfoAnswer::Listing(vec![stanza("staging.patroni-pg", &[])]));

    h.checker.can_use_repository(&Fixed(false)).await.unwrap();
    assert_eq!(h.claimed().as_deref(), Some("prod.patroni-pg"));
    assert!(h.workload.calls().is_empty());
    assert_eq!(h.engine.started_calls(), 0);
}

#[tokio::test]
async fn test_leader_releases_claim_on_foreign_stanza() {
    let h = Harness::new(InfoAnswer::Listing(vec![
        stanza("prod.patroni-pg", &[]),
        stanza("staging.patroni-pg", &["20230101-090000F"]),
    ]));

    let err = h.checker.can_use_repository(&Fixed(true)).await.unwrap_err();
    assert!(matches!(err, Error::Refused(Refusal::ForeignRepository)));
    assert_eq!(
        err.to_string(),
        "the S3 repository has backups from another cluster"
    );

    assert_eq!(h.claimed(), None);
    assert_eq!(h.workload.calls(), vec!["update_config(force)".to_string()]);
    assert_eq!(h.engine.started_calls(), 1);
    assert_eq!(h.engine.reloads(), 1);
}

#[tokio::test]
async fn test_leader_skips_reload_when_member_not_started() {
    let h = Harness::new(InfoAnswer::Listing(vec![stanza("staging.patroni-pg", &[])]));
    h.engine.set_started(Some(false));

    let err = h.checker.can_use_repository(&Fixed(true)).await.unwrap_err();
    assert!(matches!(err, Error::Refused(Refusal::ForeignRepository)));
    assert_eq!(h.claimed(), None);
    assert_eq!(h.workload.count("update_config(force)"), 1);
    assert_eq!(h.engine.started_calls(), 1);
    assert_eq!(h.engine.reloads(), 0);
}

#[tokio::test]
async fn test_leader_skips_reload_when_member_state_unknown() {
    let h = Harness::new(InfoAnswer::Listing(vec![stanza("staging.patroni-pg", &[])]));
    h.engine.set_started(None);

    let err = h.checker.can_use_repository(&Fixed(true)).await.unwrap_err();
    assert!(matches!(err, Error::Refused(Refusal::ForeignRepository)));
    assert_eq!(h.claimed(), None);
    assert_eq!(h.engine.started_calls(), 1);
    assert_eq!(h.engine.reloads(), 0);
}
