//! Dotted path lookup into JSON documents.

use serde_json::Value;

/// Navigate a dotted path such as `data.items.[0].id`.
///
/// Array elements may be addressed as `[N]` or plain `N`.
pub fn lookup<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = value;

    for segment in path.split('.') {
        match current {
            Value::Object(obj) => {
                current = obj.get(segment)?;
            }
            Value::Array(arr) => {
                let index = segment
                    .strip_prefix('[')
                    .and_then(|s| s.strip_suffix(']'))
                    .unwrap_or(segment);
                let idx: usize = index.parse().ok()?;
                current = arr.get(idx)?;
            }
            _ => return None,
        }
    }

    Some(current)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_lookup_nested_object() {
        let doc = json!({"data": {"id": "42", "count": 7}});
        assert_eq!(lookup(&doc, "data.id"), Some(&json!("42")));
        assert_eq!(lookup(&doc, "data.count"), Some(&json!(7)));
        assert_eq!(lookup(&doc, "data.missing"), None);
    }

    #[test]
    fn test_lookup_array_index() {
        let doc = json!({"items": [{"id": "a"}, {"id": "b"}]});
        assert_eq!(lookup(&doc, "items.[1].id"), Some(&json!("b")));
        assert_eq!(lookup(&doc, "items.0.id"), Some(&json!("a")));
        assert_eq!(lookup(&doc, "items.[5].id"), None);
        assert_eq!(lookup(&doc, "items.first"), None);
    }

    #[test]
    fn test_lookup_through_scalar() {
        let doc = json!({"name": "device"});
        assert_eq!(lookup(&doc, "name.length"), None);
    }
}
