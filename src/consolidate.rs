//! Duplicate consolidation for analytics targets
//!
//! Analytics targets are sometimes recorded with a decorating suffix, e.g.
//! "Brand - 10OFF" next to "Brand". The suffix is not part of the target's
//! identity, so click statistics end up split across several records.
//!
//! The engine groups targets of one type by the entity they reference and
//! their logical name, picks the
//! record whose name *is* the logical name as canonical, moves every click
//! event of the other members onto it and deletes them. Groups without a
//! canonical member are reported and left untouched. All merges of a run
//! commit together or not at all.
//!
//! Grouping depends only on the [`LogicalIdentity`] trait; the default
//! [`SuffixSeparator`] truncates at the first `" - "`.

use anyhow::{Context, Result};
use relay_core::RunStatus;
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::BTreeMap;
use tracing::{info, warn};

use crate::config::DEFAULT_SEPARATOR;
use crate::database::{
    AnalyticsStore, AnalyticsTarget, AppliedMerge, ConsolidationTables, GroupMerge,
};

/// Maps a raw target name to the name that identifies it.
pub trait LogicalIdentity: Send + Sync {
    fn logical_name<'a>(&self, target_name: &'a str) -> &'a str;
}

/// Logical name is everything before the first occurrence of a separator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SuffixSeparator {
    separator: String,
}

impl SuffixSeparator {
    pub fn new(separator: impl Into<String>) -> Self {
        Self {
            separator: separator.into(),
        }
    }
}

impl Default for SuffixSeparator {
    fn default() -> Self {
        Self::new(DEFAULT_SEPARATOR)
    }
}

impl LogicalIdentity for SuffixSeparator {
    fn logical_name<'a>(&self, target_name: &'a str) -> &'a str {
        if self.separator.is_empty() {
            return target_name;
        }
        match target_name.find(&self.separator) {
            Some(end) => &target_name[..end],
            None => target_name,
        }
    }
}

/// A group that shares a logical name but has no member carrying it exactly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FlaggedGroup {
    pub logical_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub referenced_entity_id: Option<String>,
    pub member_ids: Vec<String>,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConsolidationPlan {
    /// Groups with more than one member.
    pub groups_examined: usize,
    pub merges: Vec<GroupMerge>,
    pub flagged: Vec<FlaggedGroup>,
}

/// Group `targets` by referenced entity and logical name and decide what
/// to merge.
///
/// Targets referencing different entities never share a group; targets
/// without a referenced entity group with each other. When several members
/// carry the logical name exactly, the one with the lowest id is canonical
/// and the others are merged into it.
pub fn plan_consolidation(
    targets: &[AnalyticsTarget],
    identity: &dyn LogicalIdentity,
) -> ConsolidationPlan {
    let mut groups: BTreeMap<(Option<&str>, &str), Vec<&AnalyticsTarget>> = BTreeMap::new();
    for target in targets {
        let key = (
            target.referenced_entity_id.as_deref(),
            identity.logical_name(&target.target_name),
        );
        groups.entry(key).or_default().push(target);
    }

    let mut plan = ConsolidationPlan::default();
    for ((referenced_entity_id, logical_name), mut members) in groups {
        if members.len() < 2 {
            continue;
        }
        plan.groups_examined += 1;
        members.sort_by(|a, b| compare_ids(&a.id, &b.id));

        let Some(canonical) = members.iter().find(|m| m.target_name == logical_name) else {
            plan.flagged.push(FlaggedGroup {
                logical_name: logical_name.to_string(),
                referenced_entity_id: referenced_entity_id.map(str::to_string),
                member_ids: members.iter().map(|m| m.id.clone()).collect(),
                reason: format!("no target is named exactly '{logical_name}'"),
            });
            continue;
        };

        plan.merges.push(GroupMerge {
            logical_name: logical_name.to_string(),
            canonical_id: canonical.id.clone(),
            duplicate_ids: members
                .iter()
                .filter(|m| m.id != canonical.id)
                .map(|m| m.id.clone())
                .collect(),
        });
    }
    plan
}

/// Numeric order when both ids are integers, text order otherwise.
fn compare_ids(a: &str, b: &str) -> Ordering {
    match (a.parse::<i64>(), b.parse::<i64>()) {
        (Ok(a), Ok(b)) => a.cmp(&b),
        _ => a.cmp(b),
    }
}

#[derive(Debug, Clone)]
pub struct ConsolidationOptions {
    pub target_type: String,
    pub tables: ConsolidationTables,
    /// Report the plan without changing anything.
    pub dry_run: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsolidationReport {
    pub target_type: String,
    pub dry_run: bool,
    pub groups_examined: usize,
    /// Merges that were committed.
    pub merged: Vec<AppliedMerge>,
    /// Merges computed but not applied (dry run only).
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub planned: Vec<GroupMerge>,
    pub flagged: Vec<FlaggedGroup>,
    pub status: RunStatus,
}

pub async fn consolidate<A: AnalyticsStore>(
    store: &A,
    identity: &dyn LogicalIdentity,
    options: &ConsolidationOptions,
) -> Result<ConsolidationReport> {
    let targets = store
        .load_targets(&options.tables, &options.target_type)
        .await
        .with_context(|| format!("Failed to load '{}' analytics targets", options.target_type))?;
    info!(
        target_type = %options.target_type,
        targets = targets.len(),
        "Loaded analytics targets"
    );

    let plan = plan_consolidation(&targets, identity);
    for group in &plan.flagged {
        warn!(
            group = %group.logical_name,
            members = ?group.member_ids,
            "Leaving group untouched: {}",
            group.reason
        );
    }

    let (merged, planned) = if options.dry_run || plan.merges.is_empty() {
        (Vec::new(), plan.merges)
    } else {
        let merged = store
            .apply_merges(&options.tables, &plan.merges)
            .await
            .context("Consolidation rolled back")?;
        (merged, Vec::new())
    };

    for merge in &planned {
        info!(
            group = %merge.logical_name,
            canonical = %merge.canonical_id,
            duplicates = ?merge.duplicate_ids,
            "Would merge"
        );
    }

    let status = RunStatus::from_warnings(!plan.flagged.is_empty());
    info!(
        groups = plan.groups_examined,
        merged = merged.len(),
        flagged = plan.flagged.len(),
        dry_run = options.dry_run,
        "Consolidation {status}"
    );

    Ok(ConsolidationReport {
        target_type: options.target_type.clone(),
        dry_run: options.dry_run,
        groups_examined: plan.groups_examined,
        merged,
        planned,
        flagged: plan.flagged,
        status,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target(id: &str, name: &str) -> AnalyticsTarget {
        AnalyticsTarget {
            id: id.to_string(),
            target_type: "brand".to_string(),
            target_name: name.to_string(),
            referenced_entity_id: None,
        }
    }

    fn referencing(id: &str, name: &str, entity: &str) -> AnalyticsTarget {
        AnalyticsTarget {
            referenced_entity_id: Some(entity.to_string()),
            ..target(id, name)
        }
    }

    #[test]
    fn test_suffix_separator_truncates_at_first_separator() {
        let identity = SuffixSeparator::default();
        assert_eq!(identity.logical_name("Brand - 10OFF"), "Brand");
        assert_eq!(identity.logical_name("Brand - 10OFF - Summer"), "Brand");
        assert_eq!(identity.logical_name("Brand"), "Brand");
        assert_eq!(identity.logical_name("Brand-10OFF"), "Brand-10OFF");
    }

    #[test]
    fn test_custom_separator() {
        let identity = SuffixSeparator::new(" | ");
        assert_eq!(identity.logical_name("Shop | promo"), "Shop");
        assert_eq!(SuffixSeparator::new("").logical_name("A - B"), "A - B");
    }

    #[test]
    fn test_plan_merges_into_exact_name() {
        let targets = vec![
            target("3", "Brand - 15OFF"),
            target("1", "Brand"),
            target("2", "Brand - 10OFF"),
            target("4", "Other"),
        ];
        let plan = plan_consolidation(&targets, &SuffixSeparator::default());

        assert_eq!(plan.groups_examined, 1);
        assert!(plan.flagged.is_empty());
        assert_eq!(
            plan.merges,
            vec![GroupMerge {
                logical_name: "Brand".to_string(),
                canonical_id: "1".to_string(),
                duplicate_ids: vec!["2".to_string(), "3".to_string()],
            }]
        );
    }

    #[test]
    fn test_plan_flags_group_without_canonical() {
        let targets = vec![target("7", "Acme - A"), target("8", "Acme - B")];
        let plan = plan_consolidation(&targets, &SuffixSeparator::default());

        assert!(plan.merges.is_empty());
        assert_eq!(plan.flagged.len(), 1);
        assert_eq!(plan.flagged[0].logical_name, "Acme");
        assert_eq!(plan.flagged[0].member_ids, vec!["7", "8"]);
    }

    #[test]
    fn test_plan_picks_lowest_id_among_exact_names() {
        let targets = vec![
            target("10", "Brand"),
            target("9", "Brand"),
            target("11", "Brand - X"),
        ];
        let plan = plan_consolidation(&targets, &SuffixSeparator::default());

        assert_eq!(plan.merges[0].canonical_id, "9");
        assert_eq!(plan.merges[0].duplicate_ids, vec!["10", "11"]);
    }

    #[test]
    fn test_plan_keeps_referenced_entities_apart() {
        let targets = vec![
            referencing("1", "Brand", "A"),
            referencing("2", "Brand", "B"),
            referencing("3", "Brand - 10OFF", "B"),
            referencing("4", "Brand - 20OFF", "C"),
        ];
        let plan = plan_consolidation(&targets, &SuffixSeparator::default());

        assert_eq!(plan.groups_examined, 1);
        assert_eq!(
            plan.merges,
            vec![GroupMerge {
                logical_name: "Brand".to_string(),
                canonical_id: "2".to_string(),
                duplicate_ids: vec!["3".to_string()],
            }]
        );
        assert!(plan.flagged.is_empty());
    }

    #[test]
    fn test_compare_ids_numeric_and_text() {
        assert_eq!(compare_ids("9", "10"), Ordering::Less);
        assert_eq!(compare_ids("b1", "a2"), Ordering::Greater);
    }
}
