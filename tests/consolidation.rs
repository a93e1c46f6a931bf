//! Duplicate analytics target consolidation against the in-memory database.

use pg_relay::consolidate::{consolidate, ConsolidationOptions, LogicalIdentity, SuffixSeparator};
use pg_relay::database::{AnalyticsStore, ConsolidationTables};
use pg_relay::testing::fixtures::{
    analytics_database, analytics_database_with_references, clicks_for, row,
};
use pg_relay::testing::MemoryDatabase;
use relay_core::RunStatus;
use serde_json::json;
use tokio_test::assert_err;

fn options(dry_run: bool) -> ConsolidationOptions {
    ConsolidationOptions {
        target_type: "brand".to_string(),
        tables: ConsolidationTables::default(),
        dry_run,
    }
}

fn target_ids(db: &MemoryDatabase) -> Vec<i64> {
    db.rows("analytics_targets")
        .iter()
        .filter_map(|r| r["id"].as_i64())
        .collect()
}

#[tokio::test]
async fn test_merge_preserves_click_totals() {
    let db = analytics_database(
        &[
            (1, "brand", "Brand"),
            (2, "brand", "Brand - 10OFF"),
            (3, "brand", "Brand - 15OFF"),
            (4, "brand", "Other"),
        ],
        &[5, 3, 2, 4],
    );

    let report = consolidate(&db, &SuffixSeparator::default(), &options(false))
        .await
        .unwrap();

    assert_eq!(report.status, RunStatus::Succeeded);
    assert_eq!(report.groups_examined, 1);
    assert_eq!(report.merged.len(), 1);
    let merge = &report.merged[0];
    assert_eq!(merge.canonical_id, "1");
    assert_eq!(merge.removed_ids, vec!["2", "3"]);
    assert_eq!(merge.clicks_repointed, 5);
    assert_eq!(merge.clicks_total, 10);

    assert_eq!(clicks_for(&db, 1), 10);
    assert_eq!(clicks_for(&db, 4), 4);
    assert_eq!(db.row_count("click_events"), 14);
    assert_eq!(target_ids(&db), vec![1, 4]);
}

#[tokio::test]
async fn test_group_without_canonical_is_left_alone() {
    let db = analytics_database(
        &[(5, "brand", "Acme - A"), (6, "brand", "Acme - B")],
        &[2, 7],
    );

    let report = consolidate(&db, &SuffixSeparator::default(), &options(false))
        .await
        .unwrap();

    assert_eq!(report.status, RunStatus::SucceededWithWarnings);
    assert!(report.merged.is_empty());
    assert_eq!(report.flagged.len(), 1);
    assert_eq!(report.flagged[0].logical_name, "Acme");
    assert_eq!(report.flagged[0].member_ids, vec!["5", "6"]);
    assert_eq!(target_ids(&db), vec![5, 6]);
    assert_eq!((clicks_for(&db, 5), clicks_for(&db, 6)), (2, 7));
}

#[tokio::test]
async fn test_targets_of_different_entities_are_not_merged() {
    let db = analytics_database_with_references(
        &[
            (1, "brand", "Brand", Some("A")),
            (2, "brand", "Brand", Some("B")),
            (3, "brand", "Brand - 10OFF", Some("B")),
        ],
        &[1, 1, 1],
    );

    let report = consolidate(&db, &SuffixSeparator::default(), &options(false))
        .await
        .unwrap();

    assert_eq!(report.groups_examined, 1);
    assert_eq!(report.merged.len(), 1);
    assert_eq!(report.merged[0].canonical_id, "2");
    assert_eq!(report.merged[0].removed_ids, vec!["3"]);
    assert_eq!(target_ids(&db), vec![1, 2]);
    assert_eq!((clicks_for(&db, 1), clicks_for(&db, 2)), (1, 2));
}

#[tokio::test]
async fn test_group_without_canonical_reports_its_entity() {
    let db = analytics_database_with_references(
        &[
            (1, "brand", "Acme", Some("A")),
            (2, "brand", "Acme - X", Some("B")),
            (3, "brand", "Acme - Y", Some("B")),
        ],
        &[1, 1, 1],
    );

    let report = consolidate(&db, &SuffixSeparator::default(), &options(false))
        .await
        .unwrap();

    assert!(report.merged.is_empty());
    assert_eq!(report.flagged.len(), 1);
    assert_eq!(report.flagged[0].referenced_entity_id.as_deref(), Some("B"));
    assert_eq!(report.flagged[0].member_ids, vec!["2", "3"]);
    assert_eq!(target_ids(&db), vec![1, 2, 3]);
}

#[tokio::test]
async fn test_targets_without_name_are_ignored() {
    let db = analytics_database(&[(1, "brand", "Brand"), (2, "brand", "Brand - 10OFF")], &[1, 1]);
    db.insert_fixture_rows(
        "analytics_targets",
        [row(json!({
            "id": 3,
            "target_type": "brand",
            "target_name": null,
            "referenced_entity_id": null,
        }))],
    );

    let targets = db
        .load_targets(&ConsolidationTables::default(), "brand")
        .await
        .unwrap();
    assert_eq!(targets.len(), 2);

    consolidate(&db, &SuffixSeparator::default(), &options(false))
        .await
        .unwrap();
    assert_eq!(target_ids(&db), vec![1, 3]);
}

#[tokio::test]
async fn test_only_requested_type_is_considered() {
    let db = analytics_database(
        &[
            (1, "brand", "Brand"),
            (2, "campaign", "Brand - 10OFF"),
        ],
        &[1, 1],
    );

    let report = consolidate(&db, &SuffixSeparator::default(), &options(false))
        .await
        .unwrap();

    assert_eq!(report.groups_examined, 0);
    assert_eq!(target_ids(&db), vec![1, 2]);
}

#[tokio::test]
async fn test_dry_run_changes_nothing() {
    let db = analytics_database(
        &[(1, "brand", "Brand"), (2, "brand", "Brand - 10OFF")],
        &[1, 2],
    );

    let report = consolidate(&db, &SuffixSeparator::default(), &options(true))
        .await
        .unwrap();

    assert!(report.merged.is_empty());
    assert_eq!(report.planned.len(), 1);
    assert_eq!(report.planned[0].duplicate_ids, vec!["2"]);
    assert_eq!(target_ids(&db), vec![1, 2]);
    assert_eq!(clicks_for(&db, 2), 2);
}

#[tokio::test]
async fn test_failed_merge_rolls_back_every_group() {
    let db = analytics_database(
        &[
            (1, "brand", "Alpha"),
            (2, "brand", "Alpha - X"),
            (3, "brand", "Beta"),
            (4, "brand", "Beta - Y"),
        ],
        &[1, 2, 3, 4],
    );
    db.fail_delete_of("4");

    assert_err!(consolidate(&db, &SuffixSeparator::default(), &options(false)).await);
    assert_eq!(target_ids(&db), vec![1, 2, 3, 4]);
    assert_eq!(clicks_for(&db, 2), 2);
    assert_eq!(clicks_for(&db, 4), 4);
}

#[tokio::test]
async fn test_second_run_finds_nothing_to_merge() {
    let db = analytics_database(
        &[(1, "brand", "Brand"), (2, "brand", "Brand - 10OFF")],
        &[3, 3],
    );
    consolidate(&db, &SuffixSeparator::default(), &options(false))
        .await
        .unwrap();

    let report = consolidate(&db, &SuffixSeparator::default(), &options(false))
        .await
        .unwrap();

    assert_eq!(report.groups_examined, 0);
    assert!(report.merged.is_empty());
    assert_eq!(clicks_for(&db, 1), 6);
}

struct ParenthesizedSuffix;

impl LogicalIdentity for ParenthesizedSuffix {
    fn logical_name<'a>(&self, target_name: &'a str) -> &'a str {
        match target_name.find(" (") {
            Some(end) if target_name.ends_with(')') => &target_name[..end],
            _ => target_name,
        }
    }
}

#[tokio::test]
async fn test_custom_identity_rule() {
    let db = analytics_database(
        &[
            (1, "brand", "Shop"),
            (2, "brand", "Shop (summer)"),
            (3, "brand", "Shop - 10OFF"),
        ],
        &[1, 1, 1],
    );

    let report = consolidate(&db, &ParenthesizedSuffix, &options(false))
        .await
        .unwrap();

    assert_eq!(report.merged[0].removed_ids, vec!["2"]);
    assert_eq!(target_ids(&db), vec![1, 3]);
    assert_eq!(clicks_for(&db, 1), 2);
}

#[tokio::test]
async fn test_lost_connection_is_an_error() {
    let db = analytics_database(&[(1, "brand", "Brand")], &[1]);
    db.disconnect();
    assert_err!(consolidate(&db, &SuffixSeparator::default(), &options(false)).await);
}
