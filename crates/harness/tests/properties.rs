use std::collections::BTreeMap;

use optilock_core::{FieldValue, RecordId};
use optilock_engine::{Engine, EngineConfig, EngineError, WriteOptions, rebuild};
use optilock_harness::{category_schema, check_nested_set};
use optilock_storage::MemoryTable;
use proptest::prelude::*;

/// Node `i` hangs under an earlier node or is a root, so the forest is
/// acyclic by construction.
fn forest() -> impl Strategy<Value = Vec<Option<usize>>> {
    (1usize..14).prop_flat_map(|n| {
        (0..n)
            .map(|i| {
                if i == 0 {
                    Just(None).boxed()
                } else {
                    proptest::option::of(0..i).boxed()
                }
            })
            .collect::<Vec<_>>()
    })
}

fn load(parents: &[Option<usize>]) -> MemoryTable {
    let mut table = MemoryTable::new(category_schema());
    for (i, parent) in parents.iter().enumerate() {
        let id = RecordId::new(i as i64 + 1);
        table.insert(
            id,
            [
                ("name".to_string(), FieldValue::from(format!("n{:02}", (i * 7) % 13).as_str())),
                (
                    "parent_id".to_string(),
                    FieldValue::from(parent.map(|p| RecordId::new(p as i64 + 1))),
                ),
            ],
        );
    }
    table
}

fn nodes(table: &MemoryTable) -> Vec<(i64, Option<i64>, i64, i64)> {
    table
        .ids()
        .map(|id| {
            let parent = table
                .value(id, "parent_id")
                .and_then(FieldValue::as_reference)
                .flatten()
                .map(|p| p.get());
            let (left, right) = table
                .interval(id)
                .map(|iv| (iv.left, iv.right))
                .unwrap_or((-1, -1));
            (id.get(), parent, left, right)
        })
        .collect()
}

/// Children of each parent, sorted by (name, id), must have increasing
/// left bounds.
fn check_sibling_order(table: &MemoryTable) -> Result<(), String> {
    let mut groups: BTreeMap<Option<i64>, Vec<(String, i64, i64)>> = BTreeMap::new();
    for (id, parent, left, _) in nodes(table) {
        let name = table
            .value(RecordId::new(id), "name")
            .and_then(FieldValue::as_text)
            .unwrap_or_default()
            .to_string();
        groups.entry(parent).or_default().push((name, id, left));
    }
    for (parent, mut siblings) in groups {
        siblings.sort();
        for pair in siblings.windows(2) {
            if pair[0].2 >= pair[1].2 {
                return Err(format!(
                    "under {parent:?}: {} ({}) precedes {} ({}) but is not to its left",
                    pair[0].1, pair[0].0, pair[1].1, pair[1].0
                ));
            }
        }
    }
    Ok(())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn rebuilt_forest_is_a_valid_nested_set(parents in forest()) {
        let mut table = load(&parents);
        prop_assert_eq!(rebuild(&mut table).unwrap(), parents.len());
        prop_assert_eq!(check_nested_set(&nodes(&table)), Ok(()));
        prop_assert_eq!(check_sibling_order(&table), Ok(()));
    }

    #[test]
    fn random_moves_keep_the_nested_set_valid(
        parents in forest(),
        moves in proptest::collection::vec(
            (proptest::collection::vec(0usize..14, 1..4), proptest::option::of(0usize..14)),
            1..12,
        ),
    ) {
        let n = parents.len();
        let mut table = load(&parents);
        rebuild(&mut table).unwrap();
        let mut engine = Engine::new(EngineConfig::default());

        for (picked, target) in moves {
            let ids: Vec<RecordId> = picked.iter().map(|i| RecordId::new((i % n) as i64 + 1)).collect();
            let target = target.map(|t| RecordId::new((t % n) as i64 + 1));
            let values = BTreeMap::from([("parent_id".to_string(), FieldValue::from(target))]);
            let snapshot = table.clone();
            match engine.write(&mut table, &ids, values, WriteOptions::default()) {
                Ok(_) => {}
                // A rejected move is rolled back by the caller.
                Err(EngineError::Cycle { .. }) => table = snapshot,
                Err(other) => return Err(TestCaseError::fail(format!("{other}"))),
            }
            prop_assert_eq!(check_nested_set(&nodes(&table)), Ok(()));
            prop_assert_eq!(check_sibling_order(&table), Ok(()));
        }
    }
}
