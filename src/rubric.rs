//! Weighted, category-aware compliance rubric.
//!
//! Weights are money-denominated and kept in halalas (hundredths of a riyal)
//! so that sums stay exact; the standard table adds up to 52.20 SAR.

use serde::Serialize;

/// Rubric-applicability bucket derived from a record's category code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CategoryGroup {
    RestaurantsCafes,
    AttractionLandmark,
    Mosque,
    Other,
}

impl CategoryGroup {
    pub fn as_str(&self) -> &'static str {
        match self {
            CategoryGroup::RestaurantsCafes => "restaurants_cafes",
            CategoryGroup::AttractionLandmark => "attraction_landmark",
            CategoryGroup::Mosque => "mosque",
            CategoryGroup::Other => "other",
        }
    }
}

/// Classify a raw category code. Unknown or blank codes fall into `Other`.
pub fn category_group(category: &str) -> CategoryGroup {
    match category.trim().to_ascii_lowercase().as_str() {
        "restaurant" | "restaurants" | "cafe" | "bakery" => CategoryGroup::RestaurantsCafes,
        "park" | "entertainment" | "culture_art" | "travel" => CategoryGroup::AttractionLandmark,
        "mosque" => CategoryGroup::Mosque,
        _ => CategoryGroup::Other,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applicability {
    All,
    Group(CategoryGroup),
}

impl Applicability {
    pub fn covers(&self, group: CategoryGroup) -> bool {
        match self {
            Applicability::All => true,
            Applicability::Group(g) => *g == group,
        }
    }
}

/// How an entry decides whether it is filled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvalKind {
    /// Value of the named field; `alternate` is a legacy column that also counts.
    Plain { alternate: Option<&'static str> },
    /// Both `latitude` and `longitude` must be present.
    Coordinates,
    ImageCount { min: u32 },
    VideoCount { min: u32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RubricEntry {
    pub field: &'static str,
    pub mandatory: bool,
    pub applies: Applicability,
    /// Weight in halalas.
    pub weight: u32,
    pub kind: EvalKind,
}

impl RubricEntry {
    const fn plain(field: &'static str, weight: u32) -> Self {
        Self {
            field,
            mandatory: false,
            applies: Applicability::All,
            weight,
            kind: EvalKind::Plain { alternate: None },
        }
    }

    const fn special(field: &'static str, weight: u32, kind: EvalKind) -> Self {
        Self {
            kind,
            ..Self::plain(field, weight)
        }
    }

    const fn mandatory(self) -> Self {
        Self {
            mandatory: true,
            ..self
        }
    }

    const fn only(self, group: CategoryGroup) -> Self {
        Self {
            applies: Applicability::Group(group),
            ..self
        }
    }

    const fn or_from(self, alternate: &'static str) -> Self {
        Self {
            kind: EvalKind::Plain {
                alternate: Some(alternate),
            },
            ..self
        }
    }
}

use CategoryGroup::{AttractionLandmark, Mosque, RestaurantsCafes};

pub const RUBRIC_ENTRIES: &[RubricEntry] = &[
    // Identity
    RubricEntry::plain("poi_name_ar", 179).mandatory(),
    RubricEntry::plain("poi_name_en", 179).mandatory(),
    RubricEntry::plain("legal_name", 180).mandatory(),
    RubricEntry::plain("category", 179).mandatory(),
    RubricEntry::plain("secondary_category", 178).mandatory(),
    RubricEntry::plain("company_status", 179).mandatory(),
    RubricEntry::plain("commercial_license", 50),
    // Location and contact
    RubricEntry::special("_coordinates", 179, EvalKind::Coordinates).mandatory(),
    RubricEntry::plain("entrance_description", 179)
        .mandatory()
        .or_from("entrance_location"),
    RubricEntry::plain("building_number", 50),
    RubricEntry::plain("floor_number", 50),
    RubricEntry::plain("phone_number", 50),
    RubricEntry::plain("website", 50),
    RubricEntry::plain("social_media", 50),
    RubricEntry::plain("language", 37),
    RubricEntry::plain("is_landmark", 37).only(AttractionLandmark),
    RubricEntry::plain("pickup_point_exists", 36),
    // Operations
    RubricEntry::plain("working_days", 133).mandatory(),
    RubricEntry::plain("working_hours", 133).mandatory(),
    RubricEntry::plain("break_time", 133).mandatory(),
    RubricEntry::plain("holidays", 131).mandatory(),
    // Visual media
    RubricEntry::special("_business_exterior", 179, EvalKind::ImageCount { min: 1 }).mandatory(),
    RubricEntry::special("_business_interior", 179, EvalKind::ImageCount { min: 2 }).mandatory(),
    RubricEntry::special("_interior_video", 1500, EvalKind::VideoCount { min: 1 }),
    RubricEntry::plain("has_physical_menu", 350),
    RubricEntry::plain("menu_barcode_url", 150).only(RestaurantsCafes),
    RubricEntry::plain("cuisine", 50).only(RestaurantsCafes),
    // Facilities
    RubricEntry::plain("payment_methods", 50),
    RubricEntry::plain("has_parking_lot", 25),
    RubricEntry::plain("valet_parking", 25),
    RubricEntry::plain("is_wheelchair_accessible", 20),
    RubricEntry::plain("wifi", 20),
    RubricEntry::plain("dine_in", 20).only(RestaurantsCafes),
    RubricEntry::plain("has_family_seating", 20).only(RestaurantsCafes),
    RubricEntry::plain("large_groups_can_be_seated", 20).only(RestaurantsCafes),
    RubricEntry::plain("has_separate_rooms_for_dining", 20).only(RestaurantsCafes),
    RubricEntry::plain("music", 20).only(RestaurantsCafes),
    RubricEntry::plain("live_sport_broadcasting", 20).only(RestaurantsCafes),
    RubricEntry::plain("has_smoking_area", 20).only(RestaurantsCafes),
    RubricEntry::plain("has_a_waiting_area", 20).only(RestaurantsCafes),
    RubricEntry::plain("shisha", 20).only(RestaurantsCafes),
    // Specialized
    RubricEntry::plain("has_women_only_prayer_room", 40).only(Mosque),
    RubricEntry::plain("offers_iftar_menu", 27).only(RestaurantsCafes),
    RubricEntry::plain("is_open_during_suhoor", 27).only(RestaurantsCafes),
    RubricEntry::plain("provides_iftar_tent", 26).only(Mosque),
];

/// Sum of every entry's weight in the standard table, in halalas.
pub const TOTAL_WEIGHT: u32 = 5220;

#[derive(Debug, Clone)]
pub struct Rubric {
    entries: &'static [RubricEntry],
}

impl Rubric {
    pub fn standard() -> Self {
        Self::from_entries(RUBRIC_ENTRIES)
    }

    pub fn from_entries(entries: &'static [RubricEntry]) -> Self {
        Self { entries }
    }

    pub fn entries(&self) -> &'static [RubricEntry] {
        self.entries
    }

    /// Entries applicable to `group`, in table order.
    pub fn entries_for(&self, group: CategoryGroup) -> impl Iterator<Item = &'static RubricEntry> {
        let entries = self.entries;
        entries.iter().filter(move |e| e.applies.covers(group))
    }

    pub fn total_weight(&self) -> u32 {
        self.entries.iter().map(|e| e.weight).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn weight_for(group: CategoryGroup) -> u32 {
        Rubric::standard().entries_for(group).map(|e| e.weight).sum()
    }

    #[test]
    fn classifies_category_groups() {
        assert_eq!(category_group("restaurant"), CategoryGroup::RestaurantsCafes);
        assert_eq!(category_group(" Cafe "), CategoryGroup::RestaurantsCafes);
        assert_eq!(category_group("bakery"), CategoryGroup::RestaurantsCafes);
        assert_eq!(category_group("park"), CategoryGroup::AttractionLandmark);
        assert_eq!(category_group("culture_art"), CategoryGroup::AttractionLandmark);
        assert_eq!(category_group("mosque"), CategoryGroup::Mosque);
        assert_eq!(category_group("MOSQUE"), CategoryGroup::Mosque);
        assert_eq!(category_group(""), CategoryGroup::Other);
        assert_eq!(category_group("XYZ"), CategoryGroup::Other);
    }

    #[test]
    fn standard_table_sums_to_fixed_total() {
        assert_eq!(Rubric::standard().total_weight(), TOTAL_WEIGHT);
        assert_eq!(weight_for(CategoryGroup::Other), 4683);
        assert_eq!(weight_for(CategoryGroup::RestaurantsCafes), 4683 + 434);
        assert_eq!(weight_for(CategoryGroup::AttractionLandmark), 4683 + 37);
        assert_eq!(weight_for(CategoryGroup::Mosque), 4683 + 66);
    }

    #[test]
    fn image_thresholds_are_per_entry() {
        let rubric = Rubric::standard();
        let thresholds: Vec<_> = rubric
            .entries()
            .iter()
            .filter_map(|e| match e.kind {
                EvalKind::ImageCount { min } => Some((e.field, min)),
                _ => None,
            })
            .collect();
        assert_eq!(
            thresholds,
            vec![("_business_exterior", 1), ("_business_interior", 2)]
        );
    }

    #[test]
    fn entrance_accepts_legacy_column() {
        let entry = RUBRIC_ENTRIES
            .iter()
            .find(|e| e.field == "entrance_description")
            .unwrap();
        assert_eq!(
            entry.kind,
            EvalKind::Plain {
                alternate: Some("entrance_location")
            }
        );
        assert!(entry.mandatory);
    }

    #[test]
    fn mosque_subset_excludes_restaurant_entries() {
        let fields: Vec<_> = Rubric::standard()
            .entries_for(CategoryGroup::Mosque)
            .map(|e| e.field)
            .collect();
        assert!(fields.contains(&"provides_iftar_tent"));
        assert!(fields.contains(&"has_women_only_prayer_room"));
        assert!(!fields.contains(&"cuisine"));
        assert!(!fields.contains(&"is_landmark"));
    }
}
