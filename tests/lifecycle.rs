//! End-to-end lifecycle coverage against the real coordinator actor (spec.md
//! §8 "happy path" seed scenario): session_start, two heartbeats, a
//! milestone, and an explicit session_end, driven entirely through the
//! public `CoordinatorHandle` API.

use useaid::chain::{ChainStore, FileState, MilestoneCategory, MilestoneComplexity, RecordType};
use useaid::config::DaemonConfig;
use useaid::coordinator::{self, CoordinatorDeps, MilestoneInput, SessionEndParams, SessionStartParams};
use useaid::index::{ConnectionMap, MilestonesIndex, SessionsIndex};
use useaid::keystore::Keystore;

#[tokio::test]
async fn happy_path_produces_six_records_and_matching_indices() {
    let dir = tempfile::tempdir().unwrap();
    let chain = ChainStore::open(dir.path().join("data")).unwrap();
    let keystore = std::sync::Arc::new(Keystore::load_or_generate(dir.path().join("keystore.json")).unwrap());
    let sessions_index = SessionsIndex::open(dir.path().join("sessions.json"));
    let milestones_index = MilestonesIndex::open(dir.path().join("milestones.json"));
    let connection_map = ConnectionMap::open(dir.path().join("connection_map.json"));

    let handle = coordinator::spawn(CoordinatorDeps {
        chain: chain.clone(),
        keystore,
        sessions_index: sessions_index.clone(),
        milestones_index: milestones_index.clone(),
        connection_map,
        config: DaemonConfig::default(),
    });

    let start = handle
        .session_start(
            "conn-1".to_string(),
            SessionStartParams {
                client: "example-ide".to_string(),
                task_type: "coding".to_string(),
                conversation_id: Some("C1".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    handle.heartbeat("conn-1".to_string()).await.unwrap();
    handle.heartbeat("conn-1".to_string()).await.unwrap();

    let end = handle
        .session_end(
            "conn-1".to_string(),
            SessionEndParams {
                languages: vec!["go".to_string()],
                files_touched: 3,
                milestones: vec![MilestoneInput {
                    title: "Add search".to_string(),
                    private_title: None,
                    category: MilestoneCategory::Feature,
                    complexity: MilestoneComplexity::Medium,
                    duration_minutes: 12,
                    languages: vec!["go".to_string()],
                }],
                evaluation: None,
            },
        )
        .await
        .unwrap();

    assert_eq!(end.session_id, start.session_id);
    assert_eq!(chain.file_state(&start.session_id), FileState::Sealed);

    let records = chain.read_chain(&start.session_id).unwrap();
    assert_eq!(records.len(), 6);
    assert!(matches!(records[0].record_type, RecordType::SessionStart));
    assert!(matches!(records[1].record_type, RecordType::Heartbeat));
    assert!(matches!(records[2].record_type, RecordType::Heartbeat));
    assert!(matches!(records[3].record_type, RecordType::Milestone));
    assert!(matches!(records[4].record_type, RecordType::SessionEnd));
    assert!(matches!(records[5].record_type, RecordType::SessionSeal));

    let seal = sessions_index.get(&start.session_id).unwrap().unwrap();
    assert_eq!(seal.record_count, 6);
    assert_eq!(seal.heartbeat_count, 2);
    assert_eq!(seal.languages, vec!["go".to_string()]);
    assert_eq!(seal.files_touched, 3);

    let milestones = milestones_index.list().unwrap();
    assert_eq!(milestones.len(), 1);
    assert_eq!(milestones[0].session_id, start.session_id);
    assert_eq!(milestones[0].title, "Add search");
}
