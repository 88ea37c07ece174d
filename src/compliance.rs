//! Weighted completeness scoring against the category-specific rubric.

use serde::Serialize;
use serde_json::{Map, Value};

use crate::normalize::{is_field_filled, is_filled, normalize_category};
use crate::rubric::{category_group, CategoryGroup, EvalKind, RubricEntry};
use crate::schema::Schema;

/// Observed attachment counts. `None` means "not looked up", which removes
/// the matching media entries from the applicable set instead of failing them.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MediaCounts {
    pub images: Option<u32>,
    pub videos: Option<u32>,
}

impl MediaCounts {
    pub fn observed(images: u32, videos: u32) -> Self {
        Self {
            images: Some(images),
            videos: Some(videos),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Compliance {
    pub score: f64,
    pub is_complete: bool,
    pub total_fields: u32,
    pub filled_fields: u32,
    pub missing_fields: Vec<String>,
    /// SAR.
    pub earned_weight: f64,
    /// SAR.
    pub applicable_weight: f64,
    pub category_group: CategoryGroup,
}

/// Score `record` (local field ids plus `latitude`/`longitude`) for `category`.
pub fn evaluate(
    schema: &Schema,
    record: &Map<String, Value>,
    category: &str,
    media: MediaCounts,
) -> Compliance {
    let group = category_group(category);
    let mut applicable: u32 = 0;
    let mut earned: u32 = 0;
    let mut total_fields = 0;
    let mut filled_fields = 0;
    let mut missing_fields = Vec::new();

    for entry in schema.rubric.entries_for(group) {
        let filled = match entry.kind {
            EvalKind::ImageCount { min } => match media.images {
                Some(count) => count >= min,
                None => continue,
            },
            EvalKind::VideoCount { min } => match media.videos {
                Some(count) => count >= min,
                None => continue,
            },
            EvalKind::Coordinates => {
                field_filled(record, "latitude") && field_filled(record, "longitude")
            }
            EvalKind::Plain { alternate } => {
                plain_filled(schema, record, entry)
                    || alternate.is_some_and(|alt| {
                        record
                            .get(alt)
                            .is_some_and(|v| is_field_filled(&schema.fields, alt, v))
                    })
            }
        };

        applicable += entry.weight;
        total_fields += 1;
        if filled {
            earned += entry.weight;
            filled_fields += 1;
        } else if entry.mandatory {
            missing_fields.push(entry.field.to_string());
        }
    }

    let score = if applicable == 0 {
        0.0
    } else {
        round2(100.0 * f64::from(earned) / f64::from(applicable))
    };

    Compliance {
        score,
        is_complete: missing_fields.is_empty(),
        total_fields,
        filled_fields,
        missing_fields,
        earned_weight: f64::from(earned) / 100.0,
        applicable_weight: f64::from(applicable) / 100.0,
        category_group: group,
    }
}

/// Score a record whose category is read from its own `category` field.
pub fn evaluate_record(schema: &Schema, record: &Map<String, Value>, media: MediaCounts) -> Compliance {
    let category = normalize_category(record.get("category").unwrap_or(&Value::Null));
    evaluate(schema, record, &category, media)
}

fn field_filled(record: &Map<String, Value>, key: &str) -> bool {
    record.get(key).is_some_and(is_filled)
}

fn plain_filled(schema: &Schema, record: &Map<String, Value>, entry: &RubricEntry) -> bool {
    record
        .get(entry.field)
        .is_some_and(|v| is_field_filled(&schema.fields, entry.field, v))
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fields::FieldMap;
    use crate::rubric::{Applicability, Rubric, RUBRIC_ENTRIES};
    use serde_json::json;

    fn schema() -> Schema {
        Schema::load().unwrap()
    }

    fn record(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    fn full_record() -> Map<String, Value> {
        let mut map = Map::new();
        for entry in RUBRIC_ENTRIES {
            if let EvalKind::Plain { .. } = entry.kind {
                map.insert(entry.field.to_string(), json!("yes"));
            }
        }
        map.insert("latitude".into(), json!(24.7));
        map.insert("longitude".into(), json!(46.6));
        map
    }

    #[test]
    fn empty_record_scores_zero_and_lists_mandatory_fields() {
        let c = evaluate(&schema(), &Map::new(), "", MediaCounts::default());
        assert_eq!(c.score, 0.0);
        assert!(!c.is_complete);
        assert!(c.missing_fields.contains(&"_coordinates".to_string()));
        assert!(!c.missing_fields.contains(&"website".to_string()));
        assert!(!c.missing_fields.contains(&"_business_exterior".to_string()));
        assert_eq!(c.filled_fields, 0);
    }

    #[test]
    fn full_record_scores_hundred() {
        let s = schema();
        for category in ["restaurant", "mosque", "park", "office"] {
            let mut rec = full_record();
            rec.insert("category".into(), json!(category));
            let c = evaluate_record(&s, &rec, MediaCounts::observed(3, 1));
            assert_eq!(c.score, 100.0, "{category}");
            assert!(c.is_complete);
            assert_eq!(c.filled_fields, c.total_fields);
        }
    }

    #[test]
    fn score_stays_within_bounds() {
        let s = schema();
        let mut rec = Map::new();
        rec.insert("poi_name_en".into(), json!("Cafe"));
        rec.insert("wifi".into(), json!("yes"));
        for category in ["restaurant", "mosque", "travel", "", "XYZ"] {
            for media in [
                MediaCounts::default(),
                MediaCounts::observed(0, 0),
                MediaCounts::observed(5, 2),
            ] {
                let c = evaluate(&s, &rec, category, media);
                assert!((0.0..=100.0).contains(&c.score));
                assert_eq!(c.is_complete, c.missing_fields.is_empty());
                assert!(c.earned_weight <= c.applicable_weight);
            }
        }
    }

    #[test]
    fn missing_fields_are_mandatory_for_the_group() {
        let s = schema();
        let c = evaluate(&s, &Map::new(), "mosque", MediaCounts::observed(0, 0));
        for field in &c.missing_fields {
            let entry = s
                .rubric
                .entries_for(CategoryGroup::Mosque)
                .find(|e| e.field == field.as_str())
                .unwrap();
            assert!(entry.mandatory);
        }
    }

    #[test]
    fn media_entries_skipped_only_when_not_observed() {
        let s = schema();
        let rec = full_record();
        let unobserved = evaluate(&s, &rec, "office", MediaCounts::default());
        let zero = evaluate(&s, &rec, "office", MediaCounts::observed(0, 0));

        assert_eq!(unobserved.applicable_weight, 28.25);
        assert_eq!(zero.applicable_weight, 46.83);
        assert!(unobserved.is_complete);
        assert_eq!(unobserved.score, 100.0);
        assert!(zero.missing_fields.contains(&"_business_exterior".to_string()));
        assert!(zero.missing_fields.contains(&"_business_interior".to_string()));
        assert!(!zero.missing_fields.contains(&"_interior_video".to_string()));
        assert!(zero.score < 100.0);
    }

    #[test]
    fn interior_needs_two_images() {
        let s = schema();
        let rec = full_record();
        let one = evaluate(&s, &rec, "office", MediaCounts::observed(1, 1));
        assert_eq!(one.missing_fields, vec!["_business_interior".to_string()]);
        let two = evaluate(&s, &rec, "office", MediaCounts::observed(2, 1));
        assert!(two.is_complete);
    }

    #[test]
    fn entrance_counts_when_only_legacy_column_is_set() {
        let s = schema();
        let mut rec = full_record();
        rec.remove("entrance_description");
        rec.insert("entrance_location".into(), json!("north gate"));
        let c = evaluate(&s, &rec, "office", MediaCounts::observed(2, 1));
        assert!(c.is_complete);

        rec.remove("entrance_location");
        let c = evaluate(&s, &rec, "office", MediaCounts::observed(2, 1));
        assert_eq!(c.missing_fields, vec!["entrance_description".to_string()]);
    }

    #[test]
    fn na_and_blank_values_are_unfilled() {
        let s = schema();
        let mut rec = full_record();
        rec.insert("poi_name_ar".into(), json!("N/A"));
        rec.insert("holidays".into(), json!(" , "));
        let c = evaluate(&s, &rec, "office", MediaCounts::observed(2, 1));
        assert_eq!(
            c.missing_fields,
            vec!["poi_name_ar".to_string(), "holidays".to_string()]
        );
    }

    #[test]
    fn empty_rubric_scores_zero() {
        static ONLY_MOSQUE: &[RubricEntry] = &[RubricEntry {
            field: "_mosque_photo",
            mandatory: false,
            applies: Applicability::Group(CategoryGroup::Mosque),
            weight: 100,
            kind: EvalKind::ImageCount { min: 1 },
        }];
        static NO_FIELDS: &[crate::fields::FieldDef] = &[];
        let s = Schema::from_parts(
            FieldMap::from_definitions(NO_FIELDS).unwrap(),
            Rubric::from_entries(ONLY_MOSQUE),
        )
        .unwrap();
        let c = evaluate(&s, &Map::new(), "restaurant", MediaCounts::observed(0, 0));
        assert_eq!(c.score, 0.0);
        assert_eq!(c.total_fields, 0);
        assert!(c.is_complete);
    }

    #[test]
    fn restaurant_with_partial_data() {
        let rec = record(json!({
            "poi_name_en": "Al Baik",
            "poi_name_ar": "البيك",
            "category": "restaurant",
            "phone_number": "+966500000000",
            "working_hours": "10:00-23:00"
        }));
        let c = evaluate_record(&schema(), &rec, MediaCounts::observed(0, 0));
        assert!(!c.is_complete);
        assert!(c.score > 0.0 && c.score < 100.0);
        assert!(c.missing_fields.contains(&"_coordinates".to_string()));
        assert!(c.missing_fields.contains(&"legal_name".to_string()));
        assert!(!c.missing_fields.contains(&"poi_name_en".to_string()));
        assert_eq!(c.category_group, CategoryGroup::RestaurantsCafes);
    }
}
