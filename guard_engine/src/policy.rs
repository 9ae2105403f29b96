//! The PHI policy rule table.
//!
//! Maps case-normalized column names to the Safe Harbor category that blocks
//! them. The table is constructed once at process start — from the builtin
//! list or a YAML file — and shared read-only by every validation request;
//! no writer exists after construction, so concurrent lookups need no
//! locking.
//!
//! The YAML shape mirrors the deployment configuration:
//!
//! ```yaml
//! direct_identifiers:
//!   - patient_name
//!   - ssn
//! geographic_prohibited:
//!   - zip_code
//! date_prohibited:
//!   - birth_date
//! ```

use std::collections::HashMap;
use std::path::Path;

use serde::Deserialize;

use crate::errors::ConfigError;

/// The three blocked-identifier groupings used by the scanner.
///
/// Each grouping carries its own rejection code; the finer Safe Harbor
/// category (1–18) is reported as descriptive text via
/// [`PolicyRuleTable::identifier_kind`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PhiCategory {
    /// A direct identifier (names, numbers, contact details, biometrics).
    Direct,
    /// Geography finer than state level.
    Geographic,
    /// A date element more specific than year.
    Date,
}

/// Direct identifiers blocked by default, grouped by Safe Harbor category.
const DIRECT_IDENTIFIERS: &[&str] = &[
    // Names (category 1)
    "patient_name",
    "first_name",
    "last_name",
    "middle_name",
    "given_name",
    "family_name",
    "full_name",
    "name",
    // SSN (category 7)
    "ssn",
    "social_security_number",
    "social_security_no",
    // Record and account numbers (categories 8-11, 18)
    "mrn",
    "medical_record_number",
    "medical_record_no",
    "patient_id",
    "health_plan_id",
    "beneficiary_id",
    "subscriber_id",
    "member_id",
    "account_number",
    "account_no",
    "certificate_number",
    "license_number",
    "driver_license",
    // Contact details (categories 4-6)
    "phone",
    "telephone",
    "phone_number",
    "tel_no",
    "fax",
    "fax_number",
    "email",
    "email_address",
    // Vehicle and device identifiers (categories 12-13)
    "vehicle_id",
    "vin",
    "license_plate",
    "device_id",
    "serial_number",
    "device_serial",
    // Network identifiers (categories 14-15)
    "url",
    "web_url",
    "website",
    "ip_address",
    "ip_addr",
    "mac_address",
    // Biometrics and images (categories 16-17)
    "fingerprint",
    "retinal_scan",
    "biometric",
    "facial_image",
    "photograph",
];

/// Geographic columns blocked by default (category 2).
const GEOGRAPHIC_PROHIBITED: &[&str] = &[
    "street_address",
    "address",
    "address_line_1",
    "address_line_2",
    "street",
    "city",
    "town",
    "county",
    "zip",
    "zip_code",
    "zipcode",
    "postal_code",
    "latitude",
    "longitude",
    "lat",
    "lon",
    "geocode",
];

/// Date columns blocked by default (category 3).
const DATE_PROHIBITED: &[&str] = &[
    "birth_date",
    "birthdate",
    "date_of_birth",
    "dob",
    "death_date",
    "admission_date",
    "discharge_date",
    "visit_date",
    "month_of_birth",
    "day_of_birth",
    "month",
    "day",
];

/// YAML file shape for a policy table.
#[derive(Debug, Deserialize)]
struct PolicyFile {
    #[serde(default)]
    direct_identifiers: Vec<String>,
    #[serde(default)]
    geographic_prohibited: Vec<String>,
    #[serde(default)]
    date_prohibited: Vec<String>,
}

/// Immutable mapping from normalized identifier to blocking category.
#[derive(Debug, Clone)]
pub struct PolicyRuleTable {
    entries: HashMap<String, PhiCategory>,
}

impl PolicyRuleTable {
    /// The builtin table covering the eighteen Safe Harbor categories.
    #[must_use]
    pub fn builtin() -> Self {
        let mut entries = HashMap::new();
        for name in DIRECT_IDENTIFIERS {
            entries.insert((*name).to_owned(), PhiCategory::Direct);
        }
        for name in GEOGRAPHIC_PROHIBITED {
            entries.insert((*name).to_owned(), PhiCategory::Geographic);
        }
        for name in DATE_PROHIBITED {
            entries.insert((*name).to_owned(), PhiCategory::Date);
        }
        Self { entries }
    }

    /// Build a table from YAML text.
    ///
    /// Identifier keys are lowercased on insert so that lookups stay
    /// case-insensitive regardless of how the file spells them. When the same
    /// name appears in more than one list, the more specific grouping wins in
    /// the order direct > geographic > date.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] if the YAML does not match the expected
    /// shape.
    pub fn from_yaml_str(text: &str) -> Result<Self, ConfigError> {
        let file: PolicyFile = serde_yaml::from_str(text)
            .map_err(|e| ConfigError::Parse("policy table".to_owned(), e.to_string()))?;

        let mut entries = HashMap::new();
        for name in &file.date_prohibited {
            entries.insert(name.to_lowercase(), PhiCategory::Date);
        }
        for name in &file.geographic_prohibited {
            entries.insert(name.to_lowercase(), PhiCategory::Geographic);
        }
        for name in &file.direct_identifiers {
            entries.insert(name.to_lowercase(), PhiCategory::Direct);
        }
        Ok(Self { entries })
    }

    /// Build a table from a YAML file on disk.
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

    /// Look up a (not necessarily normalized) identifier.
    ///
    /// Lowercases before lookup; quoting and qualification are the caller's
    /// concern.
    #[must_use]
    pub fn lookup(&self, identifier: &str) -> Option<PhiCategory> {
        self.entries.get(&identifier.to_lowercase()).copied()
    }

    /// Number of blocked identifiers in the table.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the table has no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate over all blocked identifier names.
    pub fn identifiers(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// Descriptive Safe Harbor category text for a blocked direct identifier.
    ///
    /// Used in E201 messages; falls through to the catch-all category 18 for
    /// names that match no specific group.
    #[must_use]
    pub fn identifier_kind(name: &str) -> &'static str {
        let lower = name.to_lowercase();
        let has = |needles: &[&str]| needles.iter().any(|n| lower.contains(n));

        if has(&["name", "first", "last", "given", "family"]) {
            "name (Safe Harbor category 1)"
        } else if has(&["ssn", "social_security"]) {
            "SSN (Safe Harbor category 7)"
        } else if has(&["mrn", "medical_record"]) {
            "medical record number (Safe Harbor category 8)"
        } else if has(&["phone", "telephone", "tel", "fax"]) {
            "telephone/fax number (Safe Harbor categories 4-5)"
        } else if lower.contains("email") {
            "email address (Safe Harbor category 6)"
        } else if has(&["account", "beneficiary", "subscriber", "member"]) {
            "account/beneficiary number (Safe Harbor categories 9-10)"
        } else if has(&["license", "certificate", "driver"]) {
            "license/certificate number (Safe Harbor category 11)"
        } else if has(&["vehicle", "vin"]) {
            "vehicle identifier (Safe Harbor category 12)"
        } else if has(&["device", "serial"]) {
            "device identifier (Safe Harbor category 13)"
        } else if has(&["url", "web", "ip", "mac"]) {
            "web/IP identifier (Safe Harbor categories 14-15)"
        } else if has(&["fingerprint", "biometric", "retinal", "facial", "photo"]) {
            "biometric identifier (Safe Harbor category 16)"
        } else {
            "unique identifier (Safe Harbor category 18)"
        }
    }
}

impl Default for PolicyRuleTable {
    fn default() -> Self {
        Self::builtin()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_table_blocks_known_identifiers() {
        let table = PolicyRuleTable::builtin();
        assert_eq!(table.lookup("patient_name"), Some(PhiCategory::Direct));
        assert_eq!(table.lookup("ssn"), Some(PhiCategory::Direct));
        assert_eq!(table.lookup("zip_code"), Some(PhiCategory::Geographic));
        assert_eq!(table.lookup("birth_date"), Some(PhiCategory::Date));
        assert_eq!(table.lookup("gender_concept_id"), None);
        assert_eq!(table.lookup("person_id"), None);
    }

    #[test]
    fn lookup_is_case_insensitive() {
        let table = PolicyRuleTable::builtin();
        assert_eq!(table.lookup("Patient_Name"), Some(PhiCategory::Direct));
        assert_eq!(table.lookup("SSN"), Some(PhiCategory::Direct));
        assert_eq!(table.lookup("ZIP_CODE"), Some(PhiCategory::Geographic));
    }

    #[test]
    fn yaml_table_normalizes_keys() {
        let yaml = "direct_identifiers:\n  - Tumor_Registry_Id\ngeographic_prohibited:\n  - Barrio\ndate_prohibited: []\n";
        let table = PolicyRuleTable::from_yaml_str(yaml).unwrap();
        assert_eq!(table.lookup("tumor_registry_id"), Some(PhiCategory::Direct));
        assert_eq!(table.lookup("BARRIO"), Some(PhiCategory::Geographic));
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn yaml_missing_sections_default_to_empty() {
        let table = PolicyRuleTable::from_yaml_str("direct_identifiers:\n  - ssn\n").unwrap();
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn malformed_yaml_is_a_config_error() {
        let result = PolicyRuleTable::from_yaml_str("direct_identifiers: 12");
        assert!(matches!(result, Err(ConfigError::Parse(..))));
    }

    #[test]
    fn direct_wins_over_other_groupings() {
        let yaml =
            "direct_identifiers:\n  - overlap\ngeographic_prohibited:\n  - overlap\ndate_prohibited:\n  - overlap\n";
        let table = PolicyRuleTable::from_yaml_str(yaml).unwrap();
        assert_eq!(table.lookup("overlap"), Some(PhiCategory::Direct));
    }

    #[test]
    fn identifier_kind_maps_categories() {
        assert!(PolicyRuleTable::identifier_kind("patient_name").contains("category 1"));
        assert!(PolicyRuleTable::identifier_kind("ssn").contains("category 7"));
        assert!(PolicyRuleTable::identifier_kind("mrn").contains("category 8"));
        assert!(PolicyRuleTable::identifier_kind("email").contains("category 6"));
        assert!(PolicyRuleTable::identifier_kind("fingerprint").contains("category 16"));
        assert!(PolicyRuleTable::identifier_kind("health_plan_xyz").contains("category 18"));
    }
}
