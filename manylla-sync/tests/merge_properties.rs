use manylla_sync::ConflictResolver;
use proptest::prelude::*;
use serde_json::{Value, json};
use std::collections::BTreeSet;

/// A record with an id drawn from a small pool so sides overlap.
fn record() -> impl Strategy<Value = (u8, Value)> {
    (0u8..12, "[a-z]{0,6}", proptest::option::of(0i64..1_000)).prop_map(|(id, text, ts)| {
        let mut obj = json!({ "id": format!("e{id}"), "text": text });
        if let Some(ts) = ts {
            obj["updatedAt"] = json!(ts);
        }
        (id, obj)
    })
}

/// Payload whose `entries` may repeat an id when `allow_duplicates` is set.
fn payload_with(allow_duplicates: bool) -> impl Strategy<Value = Value> {
    (
        proptest::collection::vec(record(), 0..8),
        proptest::collection::vec("[a-c]", 0..5),
        proptest::option::of("[a-z]{1,8}"),
    )
        .prop_map(move |(records, tags, name)| {
            let mut seen = BTreeSet::new();
            let entries: Vec<Value> = records
                .into_iter()
                .filter(|(id, _)| allow_duplicates || seen.insert(*id))
                .map(|(_, v)| v)
                .collect();
            let mut obj = json!({ "entries": entries, "tags": tags });
            if let Some(name) = name {
                obj["name"] = json!(name);
            }
            obj
        })
}

fn payload() -> impl Strategy<Value = Value> {
    payload_with(false)
}

fn entry_ids(value: &Value) -> BTreeSet<String> {
    value["entries"]
        .as_array()
        .map(|items| {
            items
                .iter()
                .filter_map(|e| e["id"].as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(128))]

    #[test]
    fn merge_with_self_is_identity(a in payload()) {
        prop_assert_eq!(ConflictResolver::merge(&a, &a), a);
    }

    #[test]
    fn merge_with_self_is_identity_with_repeated_ids(a in payload_with(true)) {
        prop_assert_eq!(ConflictResolver::merge(&a, &a), a);
    }

    #[test]
    fn merged_ids_are_order_independent(a in payload(), b in payload()) {
        let ab = entry_ids(&ConflictResolver::merge(&a, &b));
        let ba = entry_ids(&ConflictResolver::merge(&b, &a));
        prop_assert_eq!(&ab, &ba);

        let union: BTreeSet<String> = entry_ids(&a).union(&entry_ids(&b)).cloned().collect();
        prop_assert_eq!(ab, union);
    }

    #[test]
    fn one_sided_keys_survive(a in payload(), b in payload()) {
        let merged = ConflictResolver::merge(&a, &b);
        for side in [&a, &b] {
            for key in side.as_object().unwrap().keys() {
                prop_assert!(merged.get(key).is_some(), "lost key {}", key);
            }
        }
    }

    #[test]
    fn merging_null_returns_other_side(a in payload()) {
        prop_assert_eq!(ConflictResolver::merge(&Value::Null, &a), a.clone());
        prop_assert_eq!(ConflictResolver::merge(&a, &Value::Null), a);
    }
}
