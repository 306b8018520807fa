//! Merge of local and remote payload snapshots.
//!
//! Payloads are opaque JSON. The merge is structural:
//! objects are merged key by key, arrays of records carrying an `id` are
//! merged record by record, and any other array becomes a de-duplicated
//! union. Where both sides hold different values, the side whose
//! `updatedAt` is newer wins; without a usable timestamp the decision is
//! inherited from the enclosing object, and at the top level local wins.

use chrono::DateTime;
use serde_json::{Map, Value};
use std::cmp::Ordering;
use std::collections::HashMap;

/// Field consulted to decide which side is newer.
pub const UPDATED_AT: &str = "updatedAt";
/// Field identifying a record inside an array.
pub const ID_FIELD: &str = "id";

/// Which snapshot wins a conflicting value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Local,
    Remote,
}

/// Parsed `updatedAt` value. Anything parsable outranks raw text.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
enum Stamp {
    Text(String),
    Millis(i64),
}

fn stamp_of(value: &Value) -> Option<Stamp> {
    match value.as_object()?.get(UPDATED_AT)? {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f as i64))
            .map(Stamp::Millis),
        Value::String(s) => Some(
            DateTime::parse_from_rfc3339(s)
                .map(|dt| Stamp::Millis(dt.timestamp_millis()))
                .unwrap_or_else(|_| Stamp::Text(s.clone())),
        ),
        _ => None,
    }
}

/// Decides the winning side from two `updatedAt` values.
///
/// Falls back to `inherited` when the stamps are equal or either is missing,
/// except that a present stamp beats a missing one.
fn newer_side(local: &Value, remote: &Value, inherited: Side) -> Side {
    match (stamp_of(local), stamp_of(remote)) {
        (Some(l), Some(r)) => match l.cmp(&r) {
            Ordering::Less => Side::Remote,
            Ordering::Greater => Side::Local,
            Ordering::Equal => inherited,
        },
        (Some(_), None) => Side::Local,
        (None, Some(_)) => Side::Remote,
        (None, None) => inherited,
    }
}

fn id_key(value: &Value) -> Option<String> {
    match value.as_object()?.get(ID_FIELD)? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn is_record_array(items: &[Value]) -> bool {
    items.iter().all(|v| id_key(v).is_some())
}

/// Structural merge of payload snapshots.
pub struct ConflictResolver;

impl ConflictResolver {
    /// Merges `remote` into `local`.
    ///
    /// Nothing present on exactly one side is dropped, and
    /// `merge(a, a) == a` for any `a`.
    pub fn merge(local: &Value, remote: &Value) -> Value {
        merge_value(local, remote, Side::Local)
    }

    /// Which side a top-level merge favours for conflicting values.
    pub fn preferred_side(local: &Value, remote: &Value) -> Side {
        newer_side(local, remote, Side::Local)
    }
}

fn merge_value(local: &Value, remote: &Value, inherited: Side) -> Value {
    match (local, remote) {
        (Value::Null, other) | (other, Value::Null) => other.clone(),
        (Value::Object(l), Value::Object(r)) => {
            let side = newer_side(local, remote, inherited);
            Value::Object(merge_objects(l, r, side))
        }
        (Value::Array(l), Value::Array(r)) => Value::Array(merge_arrays(l, r, inherited)),
        (l, r) if l == r => l.clone(),
        (l, r) => match inherited {
            Side::Local => l.clone(),
            Side::Remote => r.clone(),
        },
    }
}

fn merge_objects(local: &Map<String, Value>, remote: &Map<String, Value>, side: Side) -> Map<String, Value> {
    let mut out = Map::new();
    for (key, lv) in local {
        let merged = match remote.get(key) {
            Some(rv) => merge_value(lv, rv, side),
            None => lv.clone(),
        };
        out.insert(key.clone(), merged);
    }
    for (key, rv) in remote {
        if !local.contains_key(key) {
            out.insert(key.clone(), rv.clone());
        }
    }
    out
}

fn merge_arrays(local: &[Value], remote: &[Value], inherited: Side) -> Vec<Value> {
    if is_record_array(local) && is_record_array(remote) && !(local.is_empty() && remote.is_empty()) {
        merge_records(local, remote, inherited)
    } else {
        union(local, remote, inherited)
    }
}

/// Record arrays: local order first, then remote-only records.
///
/// Records sharing an id are paired by occurrence, so the second local `x`
/// merges with the second remote `x`.
fn merge_records(local: &[Value], remote: &[Value], inherited: Side) -> Vec<Value> {
    let mut remote_by_id: HashMap<String, Vec<&Value>> = HashMap::with_capacity(remote.len());
    for item in remote {
        if let Some(id) = id_key(item) {
            remote_by_id.entry(id).or_default().push(item);
        }
    }

    let mut local_counts: HashMap<String, usize> = HashMap::with_capacity(local.len());
    let mut out = Vec::with_capacity(local.len() + remote.len());
    for item in local {
        let Some(id) = id_key(item) else { continue };
        let nth = local_counts.entry(id.clone()).or_default();
        let merged = match remote_by_id.get(&id).and_then(|matches| matches.get(*nth)) {
            Some(other) => merge_value(item, other, inherited),
            None => item.clone(),
        };
        *nth += 1;
        out.push(merged);
    }

    let mut remote_counts: HashMap<String, usize> = HashMap::with_capacity(remote.len());
    for item in remote {
        let Some(id) = id_key(item) else { continue };
        let nth = remote_counts.entry(id.clone()).or_default();
        if *nth >= local_counts.get(&id).copied().unwrap_or(0) {
            out.push(item.clone());
        }
        *nth += 1;
    }
    out
}

/// Order-preserving union, the winning side's elements first.
fn union(local: &[Value], remote: &[Value], inherited: Side) -> Vec<Value> {
    let (first, second) = match inherited {
        Side::Local => (local, remote),
        Side::Remote => (remote, local),
    };
    let mut out = first.to_vec();
    for item in second {
        if !first.contains(item) && !out[first.len()..].contains(item) {
            out.push(item.clone());
        }
    }
    out
}
