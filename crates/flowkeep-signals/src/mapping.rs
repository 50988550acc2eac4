//! Dot-path payload-to-signal-data mapping (§4.5): a subscription declares, for each
//! output field, a dot-path into the raw webhook payload. Missing paths map to `null`
//! rather than dropping the signal — a partially-populated signal is still delivered.

use std::collections::BTreeMap;

use serde_json::Value;

/// field name -> dot-path into the payload, e.g. `{"order_id": "data.order.id"}`.
pub type PayloadMapping = BTreeMap<String, String>;

/// Applies `mapping` to `payload`, producing a flat JSON object of mapped field -> value.
pub fn map_payload(mapping: &PayloadMapping, payload: &Value) -> Value {
    let mut out = serde_json::Map::with_capacity(mapping.len());
    for (field, path) in mapping {
        out.insert(field.clone(), resolve_path(payload, path));
    }
    Value::Object(out)
}

/// Resolves a `.`-separated path (e.g. `"data.order.id"`) against a JSON value. Array
/// segments are not supported — only object traversal — matching the subscription model's
/// declarative mapping scope. Any missing key, or a path segment reached on a non-object,
/// resolves to `Value::Null`.
fn resolve_path(payload: &Value, path: &str) -> Value {
    let mut current = payload;
    for segment in path.split('.') {
        match current.get(segment) {
            Some(next) => current = next,
            None => return Value::Null,
        }
    }
    current.clone()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn maps_nested_fields_by_dot_path() {
        let payload = json!({"data": {"order": {"id": "ord_1", "total": 42}}});
        let mut mapping = PayloadMapping::new();
        mapping.insert("order_id".into(), "data.order.id".into());
        mapping.insert("total".into(), "data.order.total".into());

        let mapped = map_payload(&mapping, &payload);
        assert_eq!(mapped["order_id"], json!("ord_1"));
        assert_eq!(mapped["total"], json!(42));
    }

    #[test]
    fn missing_path_maps_to_null() {
        let payload = json!({"data": {}});
        let mut mapping = PayloadMapping::new();
        mapping.insert("order_id".into(), "data.order.id".into());

        let mapped = map_payload(&mapping, &payload);
        assert_eq!(mapped["order_id"], Value::Null);
    }

    #[test]
    fn path_through_non_object_maps_to_null() {
        let payload = json!({"data": "not an object"});
        let mut mapping = PayloadMapping::new();
        mapping.insert("order_id".into(), "data.order.id".into());

        let mapped = map_payload(&mapping, &payload);
        assert_eq!(mapped["order_id"], Value::Null);
    }

    #[test]
    fn top_level_field_with_single_segment_path() {
        let payload = json!({"order_id": "ord_1"});
        let mut mapping = PayloadMapping::new();
        mapping.insert("order_id".into(), "order_id".into());

        let mapped = map_payload(&mapping, &payload);
        assert_eq!(mapped["order_id"], json!("ord_1"));
    }
}
