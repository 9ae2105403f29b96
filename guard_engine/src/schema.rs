//! Table/column catalog for the optional schema layer.
//!
//! Deployments that want unknown-reference errors (E101/E102) install a
//! [`SchemaCatalog`] on the engine; without one the layer does not run.
//! Like the policy table, the catalog is immutable after construction and
//! shared read-only across requests.
//!
//! The YAML shape:
//!
//! ```yaml
//! tables:
//!   person:
//!     - person_id
//!     - gender_concept_id
//!   visit_occurrence:
//!     - person_id
//!     - visit_concept_id
//! ```

use std::collections::{HashMap, HashSet};
use std::path::Path;

use serde::Deserialize;

use crate::errors::ConfigError;

/// YAML file shape for a schema catalog.
#[derive(Debug, Deserialize)]
struct CatalogFile {
    tables: HashMap<String, Vec<String>>,
}

/// Immutable mapping from table name to its column set.
#[derive(Debug, Clone)]
pub struct SchemaCatalog {
    tables: HashMap<String, HashSet<String>>,
}

impl SchemaCatalog {
    /// A builtin catalog covering the commonly queried OMOP CDM tables.
    ///
    /// Deployments with a full CDM definition should load it from YAML; this
    /// subset exists so the layer is usable out of the box.
    #[must_use]
    pub fn builtin_omop() -> Self {
        let defs: &[(&str, &[&str])] = &[
            (
                "person",
                &[
                    "person_id",
                    "gender_concept_id",
                    "year_of_birth",
                    "race_concept_id",
                    "ethnicity_concept_id",
                    "state_code",
                ],
            ),
            (
                "condition_occurrence",
                &[
                    "condition_occurrence_id",
                    "person_id",
                    "condition_concept_id",
                    "condition_type_concept_id",
                ],
            ),
            (
                "drug_exposure",
                &[
                    "drug_exposure_id",
                    "person_id",
                    "drug_concept_id",
                    "drug_type_concept_id",
                ],
            ),
            (
                "measurement",
                &[
                    "measurement_id",
                    "person_id",
                    "measurement_concept_id",
                    "value_as_number",
                    "unit_concept_id",
                ],
            ),
            (
                "observation",
                &[
                    "observation_id",
                    "person_id",
                    "observation_concept_id",
                    "value_as_concept_id",
                ],
            ),
            (
                "visit_occurrence",
                &[
                    "visit_occurrence_id",
                    "person_id",
                    "visit_concept_id",
                    "visit_type_concept_id",
                ],
            ),
        ];

        let tables = defs
            .iter()
            .map(|(table, columns)| {
                let set = columns.iter().map(|c| (*c).to_owned()).collect();
                ((*table).to_owned(), set)
            })
            .collect();
        Self { tables }
    }

    /// Build a catalog from YAML text. Table and column names are lowercased.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] if the YAML does not match the expected
    /// shape.
    pub fn from_yaml_str(text: &str) -> Result<Self, ConfigError> {
        let file: CatalogFile = serde_yaml::from_str(text)
            .map_err(|e| ConfigError::Parse("schema catalog".to_owned(), e.to_string()))?;
        let tables = file
            .tables
            .into_iter()
            .map(|(table, columns)| {
                let set = columns.iter().map(|c| c.to_lowercase()).collect();
                (table.to_lowercase(), set)
            })
            .collect();
        Ok(Self { tables })
    }

    /// Build a catalog from a YAML file on disk.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Read`] if the file cannot be read, or
    /// [`ConfigError::Parse`] if it cannot be parsed.
    pub fn from_yaml_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Read(path.display().to_string(), e.to_string()))?;
        Self::from_yaml_str(&text)
    }

    /// Whether the catalog knows the given table.
    #[must_use]
    pub fn has_table(&self, table: &str) -> bool {
        self.tables.contains_key(&table.to_lowercase())
    }

    /// Whether any of the given tables defines the column.
    #[must_use]
    pub fn any_table_has_column(&self, tables: &[String], column: &str) -> bool {
        let column = column.to_lowercase();
        tables.iter().any(|t| {
            self.tables
                .get(t.as_str())
                .is_some_and(|cols| cols.contains(&column))
        })
    }

    /// Number of tables in the catalog.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tables.len()
    }

    /// Whether the catalog has no tables.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_knows_core_tables() {
        let catalog = SchemaCatalog::builtin_omop();
        assert!(catalog.has_table("person"));
        assert!(catalog.has_table("PERSON"));
        assert!(catalog.has_table("visit_occurrence"));
        assert!(!catalog.has_table("secret_table"));
    }

    #[test]
    fn column_lookup_spans_referenced_tables() {
        let catalog = SchemaCatalog::builtin_omop();
        let tables = vec!["person".to_owned(), "measurement".to_owned()];
        assert!(catalog.any_table_has_column(&tables, "gender_concept_id"));
        assert!(catalog.any_table_has_column(&tables, "value_as_number"));
        assert!(!catalog.any_table_has_column(&tables, "visit_concept_id"));
    }

    #[test]
    fn yaml_catalog_lowercases_names() {
        let yaml = "tables:\n  Person:\n    - Person_Id\n";
        let catalog = SchemaCatalog::from_yaml_str(yaml).unwrap();
        assert!(catalog.has_table("person"));
        assert!(catalog.any_table_has_column(&["person".to_owned()], "PERSON_ID"));
    }

    #[test]
    fn malformed_yaml_is_a_config_error() {
        assert!(matches!(
            SchemaCatalog::from_yaml_str("tables: 3"),
            Err(ConfigError::Parse(..))
        ));
    }
}
