//! Index selection for queries that name no index.
//!
//! Every candidate (the table itself, then each declared index) whose
//! partition key has an equality clause is scored, and the highest score
//! wins:
//!
//! | Match | Score |
//! |-------|-------|
//! | partition key `=` | 100 |
//! | sort key `=` | +50 |
//! | sort key `begins_with` | +40 |
//! | sort key range | +30 |
//! | the table itself | +20 |
//! | global index | +10 |
//!
//! Ties go to the earlier candidate. Global indexes are skipped for
//! strongly consistent reads.

use tracing::debug;

use crate::expr::{FieldCompare, Operator};
use crate::schema::{IndexKind, KeySpec, Schema};

/// The index to read from, or `None` for the table. The table is also the
/// answer when no candidate has a partition-key equality, in which case the
/// read becomes a scan.
pub(crate) fn select_index(
    schema: &Schema,
    clauses: &[FieldCompare],
    consistent: bool,
) -> Option<String> {
    let resolved: Vec<(String, Operator)> = clauses
        .iter()
        .filter(|c| !c.size && !c.field.contains(['.', '[']))
        .map(|c| (schema.attribute_name(&c.field), c.op))
        .collect();

    let mut best: Option<(u32, Option<&str>)> = None;
    if let Ok(pk) = schema.partition_key()
        && let Some(score) = score(pk, schema.sort_key(), &resolved)
    {
        best = Some((score + 20, None));
    }
    for index in schema.indexes() {
        if consistent && index.kind == IndexKind::Global {
            continue;
        }
        let Some(pk) = index.partition_key.as_ref() else {
            continue;
        };
        let Some(mut score) = score(pk, index.sort_key.as_ref(), &resolved) else {
            continue;
        };
        if index.kind == IndexKind::Global {
            score += 10;
        }
        if best.is_none_or(|(top, _)| score > top) {
            best = Some((score, Some(index.name.as_str())));
        }
    }

    let chosen = best.and_then(|(_, name)| name).map(str::to_owned);
    if let Some(name) = &chosen {
        debug!(table = schema.table(), index = %name, "selected index");
    }
    chosen
}

fn score(pk: &KeySpec, sk: Option<&KeySpec>, clauses: &[(String, Operator)]) -> Option<u32> {
    if !clauses
        .iter()
        .any(|(attribute, op)| *attribute == pk.attribute && *op == Operator::Eq)
    {
        return None;
    }
    let sort = sk
        .and_then(|sk| clauses.iter().find(|(attribute, _)| *attribute == sk.attribute))
        .map_or(0, |(_, op)| match op {
            Operator::Eq => 50,
            Operator::BeginsWith => 40,
            Operator::Lt | Operator::Le | Operator::Gt | Operator::Ge | Operator::Between => 30,
            _ => 0,
        });
    Some(100 + sort)
}
