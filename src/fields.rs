//! Bidirectional mapping between local field identifiers and the remote
//! feature service's attribute names.
//!
//! The table is total on local identifiers and partial on remote ones: a few
//! local columns (legacy or review-only) never leave this system.

use std::collections::HashMap;

use crate::schema::SchemaError;

/// One row of the mapping table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldDef {
    pub local: &'static str,
    pub remote: Option<&'static str>,
    pub required: bool,
    pub multi_select: bool,
    pub editable: bool,
}

impl FieldDef {
    const fn synced(local: &'static str, remote: &'static str) -> Self {
        Self {
            local,
            remote: Some(remote),
            required: false,
            multi_select: false,
            editable: true,
        }
    }

    const fn local_only(local: &'static str) -> Self {
        Self {
            local,
            remote: None,
            required: false,
            multi_select: false,
            editable: false,
        }
    }

    const fn required(self) -> Self {
        Self {
            required: true,
            ..self
        }
    }

    const fn multi(self) -> Self {
        Self {
            multi_select: true,
            ..self
        }
    }
}

pub const FIELD_DEFINITIONS: &[FieldDef] = &[
    // Identity
    FieldDef::synced("poi_name_ar", "name_ar").required(),
    FieldDef::synced("poi_name_en", "name_en").required(),
    FieldDef::synced("legal_name", "legal_name"),
    FieldDef::synced("category", "category").required(),
    FieldDef::synced("secondary_category", "secondary_category"),
    FieldDef::synced("company_status", "company_status").required(),
    FieldDef::synced("status_notes", "status_notes"),
    FieldDef::synced("identity_correct", "identity_correct"),
    FieldDef::synced("identity_notes", "identity_notes"),
    FieldDef::synced("surveyor_username", "agent_name"),
    // Contact
    FieldDef::synced("phone_number", "phone_number"),
    FieldDef::synced("website", "website"),
    FieldDef::synced("social_media", "social_media"),
    FieldDef::synced("language", "language").multi(),
    // Working info
    FieldDef::synced("working_days", "working_days").required(),
    FieldDef::synced("working_hours", "working_hours_each_day").required(),
    FieldDef::synced("break_time", "break_time_each_day"),
    FieldDef::synced("holidays", "holidays").multi(),
    FieldDef::synced("payment_methods", "accepted_payment_methods").multi(),
    FieldDef::synced("commercial_license", "commercial_license_number"),
    // Location
    FieldDef::synced("building_number", "building_number"),
    FieldDef::synced("floor_number", "floor_number"),
    FieldDef::synced("entrance_description", "entrance_description"),
    FieldDef::local_only("entrance_location"),
    FieldDef::synced("is_landmark", "is_landmark"),
    FieldDef::synced("pickup_point_exists", "pickup_point_exists"),
    FieldDef::synced("pickup_description", "pickup_description"),
    // Menu
    FieldDef::synced("has_physical_menu", "has_physical_menu"),
    FieldDef::synced("has_digital_menu", "has_digital_menu"),
    FieldDef::synced("menu_barcode_url", "menu_barcode_url"),
    FieldDef::synced("cuisine", "cuisine"),
    // Dining services
    FieldDef::synced("dine_in", "dine_in"),
    FieldDef::synced("only_delivery", "only_delivery"),
    FieldDef::synced("drive_thru", "drive_thru"),
    FieldDef::synced("order_from_car", "order_from_car"),
    FieldDef::synced("has_family_seating", "has_family_seating"),
    FieldDef::synced("has_separate_rooms_for_dining", "has_separate_rooms_for_dining"),
    FieldDef::synced("large_groups_can_be_seated", "large_groups_can_be_seated"),
    FieldDef::synced("reservation", "reservation"),
    // Facilities
    FieldDef::synced("has_parking_lot", "has_parking_lot"),
    FieldDef::synced("valet_parking", "valet_parking"),
    FieldDef::synced("wifi", "wifi"),
    FieldDef::synced("is_wheelchair_accessible", "is_wheelchair_accessible"),
    FieldDef::synced("has_smoking_area", "has_smoking_area"),
    FieldDef::synced("has_a_waiting_area", "has_a_waiting_area"),
    FieldDef::synced("has_women_only_prayer_room", "has_women_only_prayer_room"),
    FieldDef::synced("children_area", "children_area"),
    // Entertainment
    FieldDef::synced("music", "music"),
    FieldDef::synced("live_sport_broadcasting", "live_sport_broadcasting"),
    FieldDef::synced("shisha", "shisha"),
    // Ramadan
    FieldDef::synced("offers_iftar_menu", "offers_iftar_menu"),
    FieldDef::synced("is_open_during_suhoor", "is_open_during_suhoor"),
    FieldDef::synced("provides_iftar_tent", "provides_iftar_tent"),
    // Access
    FieldDef::synced("require_ticket", "require_ticket"),
    FieldDef::synced("is_free_entry", "is_free_entry"),
    // Notes
    FieldDef::synced("general_notes", "general_notes"),
];

/// Immutable lookup structure over a definition table.
#[derive(Debug, Clone)]
pub struct FieldMap {
    defs: &'static [FieldDef],
    by_local: HashMap<&'static str, usize>,
    by_remote: HashMap<&'static str, usize>,
}

impl FieldMap {
    /// Build the lookup over `defs`, rejecting duplicate identifiers on either side.
    pub fn from_definitions(defs: &'static [FieldDef]) -> Result<Self, SchemaError> {
        let mut by_local = HashMap::with_capacity(defs.len());
        let mut by_remote = HashMap::with_capacity(defs.len());
        for (idx, def) in defs.iter().enumerate() {
            if by_local.insert(def.local, idx).is_some() {
                return Err(SchemaError::DuplicateLocalField(def.local));
            }
            if let Some(remote) = def.remote {
                if by_remote.insert(remote, idx).is_some() {
                    return Err(SchemaError::DuplicateRemoteField(remote));
                }
            }
            if def.multi_select && def.remote.is_none() {
                return Err(SchemaError::LocalOnlyMultiSelect(def.local));
            }
        }
        Ok(Self {
            defs,
            by_local,
            by_remote,
        })
    }

    pub fn definitions(&self) -> &'static [FieldDef] {
        self.defs
    }

    pub fn get(&self, local: &str) -> Option<&'static FieldDef> {
        let defs = self.defs;
        self.by_local.get(local).map(|&idx| &defs[idx])
    }

    pub fn contains(&self, local: &str) -> bool {
        self.by_local.contains_key(local)
    }

    pub fn to_remote(&self, local: &str) -> Option<&'static str> {
        self.get(local).and_then(|def| def.remote)
    }

    pub fn to_local(&self, remote: &str) -> Option<&'static str> {
        let defs = self.defs;
        self.by_remote.get(remote).map(|&idx| defs[idx].local)
    }

    pub fn is_multi_select(&self, local: &str) -> bool {
        self.get(local).map(|def| def.multi_select).unwrap_or(false)
    }

    pub fn is_editable(&self, local: &str) -> bool {
        self.get(local).map(|def| def.editable).unwrap_or(false)
    }

    pub fn editable_fields(&self) -> impl Iterator<Item = &'static str> {
        let defs = self.defs;
        defs.iter().filter(|d| d.editable).map(|d| d.local)
    }

    pub fn multi_select_fields(&self) -> impl Iterator<Item = &'static str> {
        let defs = self.defs;
        defs.iter().filter(|d| d.multi_select).map(|d| d.local)
    }

    pub fn required_fields(&self) -> impl Iterator<Item = &'static str> {
        let defs = self.defs;
        defs.iter().filter(|d| d.required).map(|d| d.local)
    }

    /// Fields that have a remote counterpart, in table order.
    pub fn synced_fields(&self) -> impl Iterator<Item = (&'static str, &'static str)> {
        let defs = self.defs;
        defs.iter()
            .filter_map(|d| d.remote.map(|remote| (d.local, remote)))
    }
}
