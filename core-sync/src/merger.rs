//! Folding proposed extras into one value per relation row
//!
//! Each extra field merges by its [`ExtraKind`]:
//!
//! - **Identifier**: the current value stays unless a proposal comes from a
//!   strictly higher-priority source, or from the same source with a
//!   different key. A null proposal never replaces anything.
//! - **Scalar**: the last non-null proposal that differs wins. Proposals are
//!   visited in sorted order, so the result depends only on their content.
//! - **Count**: the maximum of the existing value and every proposal.

use core_library::{ExtraKind, ExtraTuple, ExtraValue, Relation};
use std::collections::BTreeSet;

/// Result of merging one row
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeOutcome {
    pub merged: ExtraTuple,
    /// The merged tuple differs from the existing one
    pub do_update: bool,
}

fn merge_identifier(current: ExtraValue, proposed: &ExtraValue) -> ExtraValue {
    let Some(candidate) = proposed.as_identifier() else {
        return current;
    };
    match current.as_identifier() {
        None => proposed.clone(),
        Some(existing) => {
            let better_source = candidate.source_rank() < existing.source_rank();
            let same_source_new_key = candidate.source.eq_ignore_ascii_case(&existing.source)
                && (candidate.id_type != existing.id_type || candidate.key != existing.key);
            if better_source || same_source_new_key {
                proposed.clone()
            } else {
                current
            }
        }
    }
}

fn merge_scalar(current: ExtraValue, proposed: &ExtraValue) -> ExtraValue {
    if proposed.is_null() || *proposed == current {
        current
    } else {
        proposed.clone()
    }
}

fn merge_count(current: ExtraValue, proposed: &ExtraValue) -> ExtraValue {
    match (current.as_int(), proposed.as_int()) {
        (Some(a), Some(b)) => ExtraValue::Int(a.max(b)),
        (None, Some(_)) => proposed.clone(),
        _ => current,
    }
}

/// Merge `proposals` for one row into `existing`
///
/// With no existing row the result is the value a create would write and
/// `do_update` is false.
pub fn merge(
    relation: Relation,
    existing: Option<&ExtraTuple>,
    proposals: &BTreeSet<ExtraTuple>,
) -> MergeOutcome {
    let fields = relation.descriptor().extras;
    let mut merged: ExtraTuple = existing
        .cloned()
        .unwrap_or_else(|| vec![ExtraValue::Null; fields.len()]);
    merged.resize(fields.len(), ExtraValue::Null);

    for proposal in proposals {
        for (index, field) in fields.iter().enumerate() {
            let Some(proposed) = proposal.get(index) else {
                continue;
            };
            let current = std::mem::replace(&mut merged[index], ExtraValue::Null);
            merged[index] = match field.kind {
                ExtraKind::Identifier => merge_identifier(current, proposed),
                ExtraKind::Scalar => merge_scalar(current, proposed),
                ExtraKind::Count => merge_count(current, proposed),
            };
        }
    }

    let do_update = existing.is_some_and(|existing| *existing != merged);
    MergeOutcome { merged, do_update }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_library::IdentifierKey;

    fn ident(source: &str, key: &str) -> ExtraValue {
        ExtraValue::Identifier(IdentifierKey::new(source, "series", key))
    }

    fn proposals(tuples: Vec<ExtraTuple>) -> BTreeSet<ExtraTuple> {
        tuples.into_iter().collect()
    }

    #[test]
    fn test_lower_priority_source_never_replaces() {
        let existing = vec![ident("comicvine", "4050-1")];
        let outcome = merge(
            Relation::Publisher,
            Some(&existing),
            &proposals(vec![vec![ident("unknown", "zzz")]]),
        );
        assert_eq!(outcome.merged, existing);
        assert!(!outcome.do_update);
    }

    #[test]
    fn test_higher_priority_source_replaces() {
        let existing = vec![ident("gcd", "77")];
        let outcome = merge(
            Relation::Tag,
            Some(&existing),
            &proposals(vec![vec![ident("metron", "12")]]),
        );
        assert_eq!(outcome.merged, vec![ident("metron", "12")]);
        assert!(outcome.do_update);
    }

    #[test]
    fn test_same_source_new_key_replaces() {
        let existing = vec![ident("comicvine", "1")];
        let outcome = merge(
            Relation::Character,
            Some(&existing),
            &proposals(vec![vec![ident("comicvine", "2")]]),
        );
        assert_eq!(outcome.merged, vec![ident("comicvine", "2")]);
    }

    #[test]
    fn test_null_identifier_keeps_existing() {
        let existing = vec![ident("metron", "9")];
        let outcome = merge(
            Relation::Team,
            Some(&existing),
            &proposals(vec![vec![ExtraValue::Null]]),
        );
        assert!(!outcome.do_update);
        assert_eq!(outcome.merged, existing);
    }

    #[test]
    fn test_create_takes_first_identifier() {
        let outcome = merge(
            Relation::Genre,
            None,
            &proposals(vec![vec![ExtraValue::Null], vec![ident("lcg", "3")]]),
        );
        assert_eq!(outcome.merged, vec![ident("lcg", "3")]);
        assert!(!outcome.do_update);
    }

    #[test]
    fn test_scalar_last_non_null_wins() {
        let existing = vec![ExtraValue::Text("https://a".to_string())];
        let outcome = merge(
            Relation::Identifier,
            Some(&existing),
            &proposals(vec![
                vec![ExtraValue::Null],
                vec![ExtraValue::Text("https://b".to_string())],
            ]),
        );
        assert_eq!(outcome.merged, vec![ExtraValue::Text("https://b".to_string())]);
        assert!(outcome.do_update);

        let unchanged = merge(
            Relation::Identifier,
            Some(&existing),
            &proposals(vec![vec![ExtraValue::Null]]),
        );
        assert!(!unchanged.do_update);
    }

    #[test]
    fn test_count_never_regresses() {
        let existing = vec![ExtraValue::Null, ExtraValue::Int(12)];
        let outcome = merge(
            Relation::Series,
            Some(&existing),
            &proposals(vec![
                vec![ExtraValue::Null, ExtraValue::Int(4)],
                vec![ExtraValue::Null, ExtraValue::Int(9)],
            ]),
        );
        assert_eq!(outcome.merged[1], ExtraValue::Int(12));
        assert!(!outcome.do_update);

        let grown = merge(
            Relation::Volume,
            Some(&vec![ExtraValue::Int(3)]),
            &proposals(vec![vec![ExtraValue::Int(5)], vec![ExtraValue::Null]]),
        );
        assert_eq!(grown.merged, vec![ExtraValue::Int(5)]);
        assert!(grown.do_update);
    }

    #[test]
    fn test_order_independent() {
        let a = vec![ident("metron", "1"), ExtraValue::Text("Earth-616".to_string())];
        let b = vec![ident("comicvine", "2"), ExtraValue::Null];
        let forward = merge(Relation::Universe, None, &proposals(vec![a.clone(), b.clone()]));
        let backward = merge(Relation::Universe, None, &proposals(vec![b, a]));
        assert_eq!(forward, backward);
        assert_eq!(forward.merged[0], ident("comicvine", "2"));
        assert_eq!(forward.merged[1], ExtraValue::Text("Earth-616".to_string()));
    }

    #[test]
    fn test_relation_without_extras() {
        let outcome = merge(Relation::Credit, Some(&vec![]), &proposals(vec![vec![]]));
        assert!(outcome.merged.is_empty());
        assert!(!outcome.do_update);
    }
}
