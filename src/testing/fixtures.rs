//! Schemas and rows shared by the unit and integration tests
//!
//! A small blog (users, posts, comments) covers ordering and replay; the
//! analytics tables cover consolidation.

use relay_core::{ColumnDefinition, Row, TableSchema};
use serde_json::{json, Value};

use super::memory::MemoryDatabase;

/// Turn a `json!({...})` object into a row. Panics on anything else.
pub fn row(value: Value) -> Row {
    match value {
        Value::Object(map) => map,
        other => panic!("fixture row must be a JSON object, got {other}"),
    }
}

fn serial(table: &str) -> ColumnDefinition {
    ColumnDefinition::new("id", "integer", false)
        .with_default(format!("nextval('{table}_id_seq'::regclass)"))
}

pub fn users_schema() -> TableSchema {
    TableSchema::new(
        "users",
        vec![
            serial("users"),
            ColumnDefinition::new("email", "text", false),
            ColumnDefinition::new("name", "text", true),
        ],
    )
    .with_primary_key(&["id"])
    .with_index("users_email_key", &["email"], true)
}

pub fn posts_schema() -> TableSchema {
    TableSchema::new(
        "posts",
        vec![
            serial("posts"),
            ColumnDefinition::new("user_id", "integer", false),
            ColumnDefinition::new("title", "text", false),
            ColumnDefinition::new("body", "text", true),
        ],
    )
    .with_primary_key(&["id"])
    .with_foreign_key("user_id", "users", "id")
}

pub fn comments_schema() -> TableSchema {
    TableSchema::new(
        "comments",
        vec![
            serial("comments"),
            ColumnDefinition::new("post_id", "integer", false),
            ColumnDefinition::new("user_id", "integer", false),
            ColumnDefinition::new("body", "text", false),
        ],
    )
    .with_primary_key(&["id"])
    .with_foreign_key("post_id", "posts", "id")
    .with_foreign_key("user_id", "users", "id")
}

/// Blog schemas, children first so ordering has to be derived.
pub fn blog_schemas() -> Vec<TableSchema> {
    vec![comments_schema(), posts_schema(), users_schema()]
}

pub fn user_row(id: i64, email: &str) -> Row {
    row(json!({"id": id, "email": email, "name": format!("User {id}")}))
}

pub fn post_row(id: i64, user_id: i64) -> Row {
    row(json!({"id": id, "user_id": user_id, "title": format!("Post {id}"), "body": null}))
}

pub fn comment_row(id: i64, post_id: i64, user_id: i64) -> Row {
    row(json!({"id": id, "post_id": post_id, "user_id": user_id, "body": "Nice post"}))
}

/// Source database with 3 users, 4 posts and 5 comments.
pub fn blog_source() -> MemoryDatabase {
    let db = MemoryDatabase::new("source");
    for schema in blog_schemas() {
        db.add_table(schema);
    }
    db.insert_fixture_rows(
        "users",
        (1..=3).map(|id| user_row(id, &format!("user{id}@example.com"))),
    );
    db.insert_fixture_rows("posts", [post_row(1, 1), post_row(2, 1), post_row(3, 2), post_row(4, 3)]);
    db.insert_fixture_rows(
        "comments",
        [
            comment_row(1, 1, 2),
            comment_row(2, 1, 3),
            comment_row(3, 2, 2),
            comment_row(4, 3, 1),
            comment_row(5, 4, 1),
        ],
    );
    db
}

/// Empty target database with the blog tables created.
pub fn blog_target() -> MemoryDatabase {
    let db = MemoryDatabase::new("target");
    for schema in blog_schemas() {
        db.add_table(schema);
    }
    db
}

pub fn analytics_targets_schema() -> TableSchema {
    TableSchema::new(
        "analytics_targets",
        vec![
            serial("analytics_targets"),
            ColumnDefinition::new("target_type", "text", false),
            ColumnDefinition::new("target_name", "text", false),
            ColumnDefinition::new("referenced_entity_id", "text", true),
        ],
    )
    .with_primary_key(&["id"])
}

pub fn click_events_schema() -> TableSchema {
    TableSchema::new(
        "click_events",
        vec![
            serial("click_events"),
            ColumnDefinition::new("target_id", "integer", false),
            ColumnDefinition::new("clicked_at", "timestamp with time zone", false),
        ],
    )
    .with_primary_key(&["id"])
    .with_foreign_key("target_id", "analytics_targets", "id")
}

/// Analytics database holding `targets` as `(id, type, name)` and
/// `clicks[i]` events for `targets[i]`.
pub fn analytics_database(targets: &[(i64, &str, &str)], clicks: &[usize]) -> MemoryDatabase {
    let targets: Vec<(i64, &str, &str, Option<&str>)> = targets
        .iter()
        .map(|&(id, target_type, name)| (id, target_type, name, None))
        .collect();
    analytics_database_with_references(&targets, clicks)
}

/// Like [`analytics_database`], with targets given as
/// `(id, type, name, referenced entity)`.
pub fn analytics_database_with_references(
    targets: &[(i64, &str, &str, Option<&str>)],
    clicks: &[usize],
) -> MemoryDatabase {
    let db = MemoryDatabase::new("target")
        .with_table(analytics_targets_schema())
        .with_table(click_events_schema());
    db.insert_fixture_rows(
        "analytics_targets",
        targets.iter().map(|(id, target_type, name, referenced)| {
            row(json!({
                "id": id,
                "target_type": target_type,
                "target_name": name,
                "referenced_entity_id": referenced,
            }))
        }),
    );

    let mut event_id = 0;
    let mut events = Vec::new();
    for ((target_id, ..), count) in targets.iter().zip(clicks) {
        for _ in 0..*count {
            event_id += 1;
            events.push(row(json!({
                "id": event_id,
                "target_id": target_id,
                "clicked_at": "2024-05-01T12:00:00Z",
            })));
        }
    }
    db.insert_fixture_rows("click_events", events);
    db
}

/// Clicks currently attributed to target `id`.
pub fn clicks_for(db: &MemoryDatabase, id: i64) -> usize {
    db.rows("click_events")
        .iter()
        .filter(|event| event.get("target_id") == Some(&json!(id)))
        .count()
}
