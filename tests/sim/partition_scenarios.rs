//! Shard pre-balancing against a fake chunk map.

use crate::fakes::{AdminCall, FakeShardAdmin};
use keyhole_sim::partition::partition_collection;
use keyhole_sim::SimError;
use std::time::Duration;
use tokio::time::Instant;

const NS: &str = "_KEYHOLE_88800.examples";

fn chunks(expected: &[(&str, &str)]) -> Vec<(String, String)> {
    expected
        .iter()
        .map(|(min, shard)| (min.to_string(), shard.to_string()))
        .collect()
}

#[tokio::test(start_paused = true)]
async fn test_three_shards_get_one_range_each() {
    let admin = FakeShardAdmin::new("shard00", 3);
    let started = Instant::now();

    let report = partition_collection(
        &admin,
        "_KEYHOLE_88800",
        "examples",
        "email",
        Duration::from_secs(1),
    )
    .await
    .unwrap();

    assert!(started.elapsed() >= Duration::from_secs(1));
    assert_eq!(report.primary, "shard00");
    assert_eq!(report.splits, vec!["H", "O", "V"]);
    assert!(report.skipped_splits.is_empty());

    let calls = admin.calls();
    assert_eq!(calls[0], AdminCall::EnableSharding("_KEYHOLE_88800".to_string()));
    assert_eq!(
        calls[1],
        AdminCall::ShardCollection(NS.to_string(), "email".to_string())
    );

    // Highest chunk first, shards in enumeration order.
    let moves: Vec<_> = calls
        .iter()
        .filter(|call| matches!(call, AdminCall::Move(..)))
        .cloned()
        .collect();
    assert_eq!(
        moves,
        vec![
            AdminCall::Move("V".to_string(), "shard01".to_string()),
            AdminCall::Move("O".to_string(), "shard02".to_string()),
            AdminCall::Move("H".to_string(), "shard03".to_string()),
        ]
    );

    assert_eq!(
        admin.chunk_map(),
        chunks(&[
            ("MinKey", "shard00"),
            ("H", "shard03"),
            ("O", "shard02"),
            ("V", "shard01"),
        ])
    );

    // The final chunk map agrees with the plan's range assignments.
    let plan = report.plan.unwrap();
    let planned: Vec<(String, String)> = plan
        .assignments
        .iter()
        .map(|a| (a.range_start.to_string(), a.shard_id.clone()))
        .collect();
    assert_eq!(planned, admin.chunk_map());
}

#[tokio::test(start_paused = true)]
async fn test_rerun_skips_existing_splits() {
    let admin = FakeShardAdmin::new("shard00", 3);
    partition_collection(&admin, "_KEYHOLE_88800", "examples", "email", Duration::ZERO)
        .await
        .unwrap();

    let report =
        partition_collection(&admin, "_KEYHOLE_88800", "examples", "email", Duration::ZERO)
            .await
            .unwrap();

    assert!(report.splits.is_empty());
    assert_eq!(report.skipped_splits, vec!["H", "O", "V"]);
    assert!(report.moves.is_empty());
    assert_eq!(admin.splits(), vec!["H", "O", "V"]);
}

#[tokio::test(start_paused = true)]
async fn test_primary_only_cluster_is_left_alone() {
    let admin = FakeShardAdmin::new("shard00", 0);

    let report =
        partition_collection(&admin, "_KEYHOLE_88800", "examples", "email", Duration::ZERO)
            .await
            .unwrap();

    assert!(report.plan.is_none());
    assert!(report.splits.is_empty());
    assert!(report.moves.is_empty());
    assert_eq!(admin.chunk_map(), chunks(&[("MinKey", "shard00")]));
}

#[tokio::test(start_paused = true)]
async fn test_split_failure_aborts() {
    let mut admin = FakeShardAdmin::new("shard00", 3);
    admin.fail_split_at = Some("O".to_string());

    let err = partition_collection(&admin, "_KEYHOLE_88800", "examples", "email", Duration::ZERO)
        .await
        .unwrap_err();

    match err {
        SimError::Split { ns, key, .. } => {
            assert_eq!(ns, NS);
            assert_eq!(key, "O");
        }
        other => panic!("expected a split error, got {other}"),
    }
    assert_eq!(admin.splits(), vec!["H"]);
    assert!(!admin
        .calls()
        .iter()
        .any(|call| matches!(call, AdminCall::Move(..))));
}

#[tokio::test(start_paused = true)]
async fn test_move_failure_aborts() {
    let mut admin = FakeShardAdmin::new("shard00", 2);
    admin.fail_moves = true;

    let err = partition_collection(&admin, "_KEYHOLE_88800", "examples", "email", Duration::ZERO)
        .await
        .unwrap_err();

    match err {
        SimError::MoveChunk { ns, to, .. } => {
            assert_eq!(ns, NS);
            assert_eq!(to, "shard01");
        }
        other => panic!("expected a move error, got {other}"),
    }
}

#[tokio::test(start_paused = true)]
async fn test_shard_collection_failure_is_a_sharding_error() {
    let mut admin = FakeShardAdmin::new("shard00", 3);
    admin.fail_shard_collection = true;

    let err = partition_collection(&admin, "_KEYHOLE_88800", "examples", "email", Duration::ZERO)
        .await
        .unwrap_err();

    assert!(matches!(err, SimError::Sharding(_)));
    assert!(admin.splits().is_empty());
}
