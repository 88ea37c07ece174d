//! The static tables (field mapping + rubric), validated once at startup and
//! shared read-only afterwards.

use std::collections::HashSet;
use thiserror::Error;

use crate::fields::{FieldMap, FIELD_DEFINITIONS};
use crate::rubric::{EvalKind, Rubric, TOTAL_WEIGHT};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SchemaError {
    #[error("local field '{0}' is defined twice")]
    DuplicateLocalField(&'static str),
    #[error("remote field '{0}' is mapped twice")]
    DuplicateRemoteField(&'static str),
    #[error("multi-select field '{0}' has no remote counterpart")]
    LocalOnlyMultiSelect(&'static str),
    #[error("rubric lists '{0}' twice")]
    DuplicateRubricField(&'static str),
    #[error("rubric field '{0}' is not in the field mapping")]
    UnmappedRubricField(&'static str),
    #[error("rubric field '{field}' falls back to unknown column '{alternate}'")]
    UnmappedAlternate {
        field: &'static str,
        alternate: &'static str,
    },
    #[error("synthetic rubric entry '{0}' collides with a mapped field")]
    SyntheticFieldMapped(&'static str),
    #[error("required field '{0}' is not a mandatory rubric entry")]
    RequiredNotMandatory(&'static str),
    #[error("rubric weights sum to {actual}, expected {expected}")]
    WeightTotal { expected: u32, actual: u32 },
}

#[derive(Debug, Clone)]
pub struct Schema {
    pub fields: FieldMap,
    pub rubric: Rubric,
}

impl Schema {
    /// Build and cross-check the standard tables.
    pub fn load() -> Result<Self, SchemaError> {
        let schema = Self::from_parts(
            FieldMap::from_definitions(FIELD_DEFINITIONS)?,
            Rubric::standard(),
        )?;
        let actual = schema.rubric.total_weight();
        if actual != TOTAL_WEIGHT {
            return Err(SchemaError::WeightTotal {
                expected: TOTAL_WEIGHT,
                actual,
            });
        }
        Ok(schema)
    }

    pub fn from_parts(fields: FieldMap, rubric: Rubric) -> Result<Self, SchemaError> {
        let mut seen = HashSet::new();
        for entry in rubric.entries() {
            if !seen.insert(entry.field) {
                return Err(SchemaError::DuplicateRubricField(entry.field));
            }
            match entry.kind {
                EvalKind::Plain { alternate } => {
                    if !fields.contains(entry.field) {
                        return Err(SchemaError::UnmappedRubricField(entry.field));
                    }
                    if let Some(alternate) = alternate {
                        if !fields.contains(alternate) {
                            return Err(SchemaError::UnmappedAlternate {
                                field: entry.field,
                                alternate,
                            });
                        }
                    }
                }
                _ => {
                    if fields.contains(entry.field) {
                        return Err(SchemaError::SyntheticFieldMapped(entry.field));
                    }
                }
            }
        }

        for required in fields.required_fields() {
            let mandatory = rubric
                .entries()
                .iter()
                .any(|e| e.field == required && e.mandatory);
            if !mandatory {
                return Err(SchemaError::RequiredNotMandatory(required));
            }
        }

        Ok(Self { fields, rubric })
    }
}
