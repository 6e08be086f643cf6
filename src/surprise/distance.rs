/// Distance between a predicted and an actual structured outcome.
///
/// Outcomes are JSON objects. Each field present on either side contributes a
/// per-field distance in [0, 1]; the result is the mean. Categorical fields
/// (strings, bools) are all-or-nothing, numbers contribute their relative
/// magnitude difference, nested objects recurse, arrays compare as sets.
/// A field missing on one side counts as a full mismatch.
use serde_json::Value as JsonValue;
use std::collections::{BTreeSet, HashSet};

/// Distance in [0, 1], or `None` when the inputs cannot be compared
/// (not objects, or both empty). Only the first `max_fields` field names, in
/// sorted order, are considered.
pub fn outcome_distance(predicted: &JsonValue, actual: &JsonValue, max_fields: usize) -> Option<f64> {
    let (JsonValue::Object(p), JsonValue::Object(a)) = (predicted, actual) else {
        return None;
    };
    let keys: BTreeSet<&String> = p.keys().chain(a.keys()).collect();
    if keys.is_empty() || max_fields == 0 {
        return None;
    }

    let considered: Vec<&String> = keys.into_iter().take(max_fields).collect();
    let total: f64 = considered
        .iter()
        .map(|key| match (p.get(key.as_str()), a.get(key.as_str())) {
            (Some(pv), Some(av)) => value_distance(pv, av, max_fields),
            _ => 1.0,
        })
        .sum();
    Some((total / considered.len() as f64).clamp(0.0, 1.0))
}

fn value_distance(predicted: &JsonValue, actual: &JsonValue, max_fields: usize) -> f64 {
    match (predicted, actual) {
        (JsonValue::Null, JsonValue::Null) => 0.0,
        (JsonValue::Bool(p), JsonValue::Bool(a)) => categorical(p == a),
        (JsonValue::String(p), JsonValue::String(a)) => {
            categorical(p.trim().eq_ignore_ascii_case(a.trim()))
        }
        (JsonValue::Number(p), JsonValue::Number(a)) => match (p.as_f64(), a.as_f64()) {
            (Some(p), Some(a)) => magnitude(p, a),
            _ => 1.0,
        },
        (JsonValue::Object(_), JsonValue::Object(_)) => {
            outcome_distance(predicted, actual, max_fields).unwrap_or(0.0)
        }
        (JsonValue::Array(p), JsonValue::Array(a)) => {
            let p: HashSet<String> = p.iter().map(JsonValue::to_string).collect();
            let a: HashSet<String> = a.iter().map(JsonValue::to_string).collect();
            1.0 - crate::text::jaccard(&p, &a)
        }
        _ => 1.0,
    }
}

fn categorical(equal: bool) -> f64 {
    if equal { 0.0 } else { 1.0 }
}

/// Relative difference, scaled so values below 1 in magnitude compare absolutely.
fn magnitude(p: f64, a: f64) -> f64 {
    if !p.is_finite() || !a.is_finite() {
        return 1.0;
    }
    let scale = p.abs().max(a.abs()).max(1.0);
    ((p - a).abs() / scale).clamp(0.0, 1.0)
}
