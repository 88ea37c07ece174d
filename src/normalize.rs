//! Canonical value representations shared by local persistence and outbound payloads.

use serde_json::Value;

use crate::fields::FieldMap;

/// Whether a value carries information. Blank strings, the literal "N/A" and
/// empty lists do not. Any non-empty list counts, whatever its entries.
pub fn is_filled(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::String(s) => {
            let s = s.trim();
            !s.is_empty() && !s.eq_ignore_ascii_case("n/a")
        }
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
        Value::Bool(_) | Value::Number(_) => true,
    }
}

/// Canonical comma-joined form of a multi-select value: entries trimmed,
/// empties dropped, duplicates removed keeping first-seen order. Absent or
/// empty input yields `""`.
pub fn normalize_multi_select(value: &Value) -> String {
    let mut out: Vec<String> = Vec::new();
    collect_entries(value, &mut out);
    out.join(",")
}

fn collect_entries(value: &Value, out: &mut Vec<String>) {
    match value {
        Value::Null | Value::Object(_) => {}
        Value::String(s) => {
            for part in s.split(',') {
                let part = part.trim();
                if !part.is_empty() && !out.iter().any(|seen| seen == part) {
                    out.push(part.to_string());
                }
            }
        }
        Value::Array(items) => {
            for item in items {
                collect_entries(item, out);
            }
        }
        Value::Bool(_) | Value::Number(_) => {
            let s = value.to_string();
            if !out.contains(&s) {
                out.push(s);
            }
        }
    }
}

pub fn normalize_category(value: &Value) -> String {
    match value {
        Value::String(s) => s.trim().to_lowercase(),
        Value::Null => String::new(),
        other => other.to_string().to_lowercase(),
    }
}

/// Normalize one field's value according to its mapping metadata; anything
/// that is neither multi-select nor the category passes through unchanged.
pub fn normalize_field_value(fields: &FieldMap, field: &str, value: Value) -> Value {
    if fields.is_multi_select(field) {
        Value::String(normalize_multi_select(&value))
    } else if field == "category" {
        Value::String(normalize_category(&value))
    } else {
        value
    }
}

/// `is_filled` after normalization, so `" , "` in a multi-select counts as empty.
pub fn is_field_filled(fields: &FieldMap, field: &str, value: &Value) -> bool {
    if fields.is_multi_select(field) {
        !normalize_multi_select(value).is_empty()
    } else {
        is_filled(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fields::FIELD_DEFINITIONS;
    use serde_json::json;

    #[test]
    fn filled_detection() {
        assert!(!is_filled(&Value::Null));
        assert!(!is_filled(&json!("")));
        assert!(!is_filled(&json!("   ")));
        assert!(!is_filled(&json!("N/A")));
        assert!(!is_filled(&json!("n/a")));
        assert!(!is_filled(&json!([])));
        assert!(is_filled(&json!("x")));
        assert!(is_filled(&json!(0)));
        assert!(is_filled(&json!(false)));
        assert!(is_filled(&json!(["a"])));
        assert!(is_filled(&json!([""])));
    }

    #[test]
    fn multi_select_collapses_duplicates_and_whitespace() {
        assert_eq!(normalize_multi_select(&json!("a, b, a")), "a,b");
        assert_eq!(normalize_multi_select(&json!(["cash", " card ", "cash"])), "cash,card");
        assert_eq!(normalize_multi_select(&json!(",, ,")), "");
        assert_eq!(normalize_multi_select(&Value::Null), "");
        assert_eq!(normalize_multi_select(&json!([])), "");
    }

    #[test]
    fn multi_select_is_idempotent() {
        let inputs = [
            json!("a, b, a"),
            json!(["x,y", "y", " z "]),
            json!(""),
            json!([1, "1", 2]),
            json!("sunday,monday ,sunday,,"),
        ];
        for input in inputs {
            let once = normalize_multi_select(&input);
            let twice = normalize_multi_select(&Value::String(once.clone()));
            assert_eq!(once, twice, "input {input}");
        }
    }

    #[test]
    fn category_is_lowercased_and_trimmed() {
        assert_eq!(normalize_category(&json!("  Restaurant ")), "restaurant");
        assert_eq!(normalize_category(&Value::Null), "");
    }

    #[test]
    fn field_dispatch_follows_metadata() {
        let fields = FieldMap::from_definitions(FIELD_DEFINITIONS).unwrap();
        assert_eq!(
            normalize_field_value(&fields, "holidays", json!(["eid", "eid", "national"])),
            json!("eid,national")
        );
        assert_eq!(
            normalize_field_value(&fields, "language", Value::Null),
            json!("")
        );
        assert_eq!(
            normalize_field_value(&fields, "category", json!("MOSQUE")),
            json!("mosque")
        );
        assert_eq!(
            normalize_field_value(&fields, "poi_name_en", json!("  Al Baik ")),
            json!("  Al Baik ")
        );
        assert!(!is_field_filled(&fields, "payment_methods", &json!(" , ")));
        assert!(is_field_filled(&fields, "payment_methods", &json!("cash")));
    }
}
