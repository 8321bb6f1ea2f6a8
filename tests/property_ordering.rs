/// Property-based tests for contribution ordering
///
/// The computed order must depend only on the set of contributions, never on
/// the order in which they were registered, and must honor every constraint.
use ferrous_ioc::ordering::{order_by_constraints, Orderable};
use proptest::prelude::*;

#[derive(Debug, Clone)]
struct Contribution {
    id: String,
    constraints: Vec<String>,
}

impl Orderable for Contribution {
    fn order_id(&self) -> &str {
        &self.id
    }

    fn order_constraints(&self) -> &[String] {
        &self.constraints
    }
}

/// Contributions `c0..cN` with constraints drawn from a hidden ranking, so the
/// constraints can never form a cycle.
fn acyclic_contributions() -> impl Strategy<Value = Vec<Contribution>> {
    (2usize..9).prop_flat_map(|count| {
        let ranking = Just((0..count).collect::<Vec<usize>>()).prop_shuffle();
        let targets = (0..count)
            .map(|_| proptest::collection::btree_set(0..count, 0..3))
            .collect::<Vec<_>>();
        (ranking, targets).prop_map(|(ranking, targets)| {
            targets
                .into_iter()
                .enumerate()
                .map(|(index, targets)| Contribution {
                    id: if index % 2 == 0 { format!("C{index}") } else { format!("c{index}") },
                    constraints: targets
                        .into_iter()
                        .filter(|target| *target != index)
                        .map(|target| {
                            let direction = if ranking[index] < ranking[target] { "before" } else { "after" };
                            format!("{direction}:c{target}")
                        })
                        .collect(),
                })
                .collect()
        })
    })
}

fn ids(items: &[Contribution]) -> Vec<String> {
    items.iter().map(|item| item.id.clone()).collect()
}

fn position(order: &[String], id: &str) -> usize {
    order
        .iter()
        .position(|candidate| candidate.eq_ignore_ascii_case(id))
        .unwrap()
}

proptest! {
    #[test]
    fn order_ignores_registration_order(
        (items, shuffled) in acyclic_contributions()
            .prop_flat_map(|items| (Just(items.clone()), Just(items).prop_shuffle()))
    ) {
        let expected = ids(&order_by_constraints(items).unwrap());
        let actual = ids(&order_by_constraints(shuffled).unwrap());
        prop_assert_eq!(expected, actual);
    }
}

proptest! {
    #[test]
    fn order_honors_every_constraint(items in acyclic_contributions()) {
        let order = ids(&order_by_constraints(items.clone()).unwrap());
        prop_assert_eq!(order.len(), items.len());

        for item in &items {
            for constraint in &item.constraints {
                let (direction, target) = constraint.split_once(':').unwrap();
                let (mine, theirs) = (position(&order, &item.id), position(&order, target));
                if direction == "before" {
                    prop_assert!(mine < theirs, "{} should precede {} in {:?}", item.id, target, order);
                } else {
                    prop_assert!(mine > theirs, "{} should follow {} in {:?}", item.id, target, order);
                }
            }
        }
    }
}

proptest! {
    #[test]
    fn unconstrained_items_sort_by_id_ignoring_case(
        names in proptest::collection::btree_set("[a-z]{1,6}", 1..8),
        upper in any::<bool>(),
    ) {
        let items: Vec<Contribution> = names
            .iter()
            .rev()
            .map(|name| Contribution {
                id: if upper { name.to_uppercase() } else { name.clone() },
                constraints: Vec::new(),
            })
            .collect();

        let order: Vec<String> = ids(&order_by_constraints(items).unwrap())
            .into_iter()
            .map(|id| id.to_lowercase())
            .collect();
        let expected: Vec<String> = names.into_iter().collect();
        prop_assert_eq!(order, expected);
    }
}
