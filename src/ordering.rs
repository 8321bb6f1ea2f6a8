//! Constraint-based ordering of decorators and advisors.
//!
//! Each contribution has an id and a list of constraints of the form
//! `before:<pattern>` or `after:<pattern>`, where the pattern is a case-insensitive
//! glob over contribution ids. The result lists contributions outermost first:
//! `before:X` places a contribution ahead of (outside) every contribution whose id
//! matches `X`. Ties are broken by case-insensitive id, so the order only depends
//! on the set of contributions, never on registration order.

use std::cmp::Reverse;
use std::collections::{BTreeSet, BinaryHeap};

use crate::descriptors::{compile_glob, AdvisorDef, DecoratorDef};
use crate::error::{IocError, IocResult};

/// Something that takes part in constraint ordering.
pub trait Orderable {
    fn order_id(&self) -> &str;
    fn order_constraints(&self) -> &[String];
}

impl Orderable for DecoratorDef {
    fn order_id(&self) -> &str {
        &self.id
    }

    fn order_constraints(&self) -> &[String] {
        &self.constraints
    }
}

impl Orderable for AdvisorDef {
    fn order_id(&self) -> &str {
        &self.id
    }

    fn order_constraints(&self) -> &[String] {
        &self.constraints
    }
}

impl<T: Orderable + ?Sized> Orderable for std::sync::Arc<T> {
    fn order_id(&self) -> &str {
        (**self).order_id()
    }

    fn order_constraints(&self) -> &[String] {
        (**self).order_constraints()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Before,
    After,
}

struct Constraint {
    direction: Direction,
    pattern: String,
    glob: globset::GlobMatcher,
}

fn parse_constraint(owner: &str, raw: &str) -> IocResult<Constraint> {
    let invalid = |reason: String| IocError::OrderingConstraint {
        id: owner.to_string(),
        constraint: raw.to_string(),
        reason,
    };

    let (prefix, pattern) = raw
        .split_once(':')
        .ok_or_else(|| invalid("expected 'before:<id>' or 'after:<id>'".to_string()))?;
    let direction = match prefix.trim().to_lowercase().as_str() {
        "before" => Direction::Before,
        "after" => Direction::After,
        other => return Err(invalid(format!("unknown constraint type '{other}'"))),
    };
    let pattern = pattern.trim();
    if pattern.is_empty() {
        return Err(invalid("missing target id".to_string()));
    }
    let glob = compile_glob(pattern).map_err(invalid)?;

    Ok(Constraint {
        direction,
        pattern: pattern.to_string(),
        glob,
    })
}

fn is_literal(pattern: &str) -> bool {
    !pattern.contains(['*', '?', '[', '{'])
}

/// Checks every constraint of `items` against the full set of contributions.
///
/// Fails on malformed constraints, on literal targets that name no contribution,
/// on duplicate ids, and on cycles.
pub fn validate_constraints<T: Orderable>(items: &[T]) -> IocResult<()> {
    let mut seen = BTreeSet::new();
    for item in items {
        if !seen.insert(item.order_id().to_lowercase()) {
            return Err(IocError::Configuration(format!(
                "contribution id '{}' is used more than once",
                item.order_id()
            )));
        }
    }

    for item in items {
        for raw in item.order_constraints() {
            let constraint = parse_constraint(item.order_id(), raw)?;
            if is_literal(&constraint.pattern)
                && !items.iter().any(|other| constraint.glob.is_match(other.order_id()))
            {
                return Err(IocError::OrderingConstraint {
                    id: item.order_id().to_string(),
                    constraint: raw.clone(),
                    reason: format!("no contribution has id '{}'", constraint.pattern),
                });
            }
        }
    }

    let refs: Vec<&T> = items.iter().collect();
    sorted_indices(&refs).map(|_| ())
}

/// Orders `items` by their constraints, outermost first.
///
/// Constraints naming contributions outside `items` are ignored, which lets the
/// registry order the subset that applies to one service.
pub fn order_by_constraints<T: Orderable>(items: Vec<T>) -> IocResult<Vec<T>> {
    let order = {
        let refs: Vec<&T> = items.iter().collect();
        sorted_indices(&refs)?
    };
    let mut slots: Vec<Option<T>> = items.into_iter().map(Some).collect();
    Ok(order
        .into_iter()
        .filter_map(|index| slots[index].take())
        .collect())
}

fn sorted_indices<T: Orderable>(items: &[&T]) -> IocResult<Vec<usize>> {
    let count = items.len();
    let keys: Vec<String> = items.iter().map(|item| item.order_id().to_lowercase()).collect();

    // successors[a] contains b when a must come before b.
    let mut successors: Vec<BTreeSet<usize>> = vec![BTreeSet::new(); count];
    for (index, item) in items.iter().enumerate() {
        for raw in item.order_constraints() {
            let constraint = parse_constraint(item.order_id(), raw)?;
            for (other, candidate) in items.iter().enumerate() {
                if other == index || !constraint.glob.is_match(candidate.order_id()) {
                    continue;
                }
                match constraint.direction {
                    Direction::Before => successors[index].insert(other),
                    Direction::After => successors[other].insert(index),
                };
            }
        }
    }

    let mut in_degree = vec![0usize; count];
    for targets in &successors {
        for &target in targets {
            in_degree[target] += 1;
        }
    }

    let mut ready: BinaryHeap<Reverse<(String, usize)>> = (0..count)
        .filter(|&index| in_degree[index] == 0)
        .map(|index| Reverse((keys[index].clone(), index)))
        .collect();

    let mut order = Vec::with_capacity(count);
    while let Some(Reverse((_, index))) = ready.pop() {
        order.push(index);
        for &next in &successors[index] {
            in_degree[next] -= 1;
            if in_degree[next] == 0 {
                ready.push(Reverse((keys[next].clone(), next)));
            }
        }
    }

    if order.len() < count {
        let mut ids: Vec<String> = (0..count)
            .filter(|index| in_degree[*index] > 0)
            .map(|index| items[index].order_id().to_string())
            .collect();
        ids.sort_by_key(|id| id.to_lowercase());
        return Err(IocError::OrderingCycle { ids });
    }

    Ok(order)
}
