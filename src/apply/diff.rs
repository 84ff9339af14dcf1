//! Subset comparison and JSON merge patches.
//!
//! A desired manifest is satisfied when every field it sets is present with
//! the same value in the live object. Fields the live object has on top
//! (server defaults, other controllers' fields, status) are ignored.

use serde_json::{Map, Value};

/// Top-level fields never patched.
const IMMUTABLE_TOP_LEVEL: [&str; 3] = ["apiVersion", "kind", "status"];

/// Empty desired values are satisfied by an absent field.
fn is_empty(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Object(map) => map.is_empty(),
        Value::Array(items) => items.is_empty(),
        _ => false,
    }
}

/// Whether `actual` already carries everything `desired` sets.
///
/// Objects compare key by key; arrays compare element-wise and must have the
/// same length.
pub fn is_subset(desired: &Value, actual: &Value) -> bool {
    match (desired, actual) {
        (Value::Object(d), Value::Object(a)) => d.iter().all(|(k, dv)| match a.get(k) {
            Some(av) => is_subset(dv, av),
            None => is_empty(dv),
        }),
        (Value::Array(d), Value::Array(a)) => {
            d.len() == a.len() && d.iter().zip(a).all(|(dv, av)| is_subset(dv, av))
        }
        (d, Value::Null) => is_empty(d),
        (d, a) => d == a,
    }
}

/// Minimal merge patch taking `actual` to a superset of `desired`, or `None`
/// when nothing differs.
///
/// Differing arrays are replaced whole, as merge patch semantics require.
pub fn merge_patch_for(desired: &Value, actual: &Value) -> Option<Value> {
    let (Value::Object(d), Value::Object(a)) = (desired, actual) else {
        return (!is_subset(desired, actual)).then(|| desired.clone());
    };

    let patch = object_patch(d, a, true);
    (!patch.is_empty()).then_some(Value::Object(patch))
}

fn object_patch(desired: &Map<String, Value>, actual: &Map<String, Value>, top: bool) -> Map<String, Value> {
    let mut patch = Map::new();
    for (key, dv) in desired {
        if top && IMMUTABLE_TOP_LEVEL.contains(&key.as_str()) {
            continue;
        }
        match (dv, actual.get(key)) {
            (Value::Object(dm), Some(Value::Object(am))) => {
                let nested = object_patch(dm, am, false);
                if !nested.is_empty() {
                    patch.insert(key.clone(), Value::Object(nested));
                }
            }
            (dv, Some(av)) if is_subset(dv, av) => {}
            (dv, None) if is_empty(dv) => {}
            (dv, _) => {
                patch.insert(key.clone(), dv.clone());
            }
        }
    }
    patch
}

/// Merge patch taking `previous` exactly to `next`, or `None` if they are
/// equal. Keys dropped from `next` are written as `null`.
pub fn merge_diff(previous: &Value, next: &Value) -> Option<Value> {
    match (previous, next) {
        (Value::Object(p), Value::Object(n)) => {
            let mut patch = Map::new();
            for key in p.keys().filter(|k| !n.contains_key(*k)) {
                patch.insert(key.clone(), Value::Null);
            }
            for (key, nv) in n {
                match p.get(key) {
                    Some(pv) => {
                        if let Some(nested) = merge_diff(pv, nv) {
                            patch.insert(key.clone(), nested);
                        }
                    }
                    None => {
                        patch.insert(key.clone(), nv.clone());
                    }
                }
            }
            (!patch.is_empty()).then_some(Value::Object(patch))
        }
        (p, n) if p == n => None,
        (_, n) => Some(n.clone()),
    }
}

/// Apply an RFC 7386 merge patch in place.
pub fn apply_merge_patch(target: &mut Value, patch: &Value) {
    let Value::Object(patch_map) = patch else {
        *target = patch.clone();
        return;
    };
    if !target.is_object() {
        *target = Value::Object(Map::new());
    }
    if let Value::Object(target_map) = target {
        for (key, value) in patch_map {
            if value.is_null() {
                target_map.remove(key);
            } else {
                apply_merge_patch(target_map.entry(key.clone()).or_insert(Value::Null), value);
            }
        }
    }
}
