//! Stage trait, per-request context, and the stage registry.
//!
//! Every policy layer implements [`Stage`]: read the context, return `Ok(())`
//! to continue or a [`Rejection`] to stop the pipeline. Stages are stateless
//! beyond their compiled patterns and must be `Send + Sync` so independent
//! requests can run in parallel.
//!
//! Two layers sit outside the registry because of where they run: the
//! lexical gate precedes parsing (no tree exists yet) and sample execution
//! follows wrapping (it needs the wrapped text). The orchestrator sequences
//! those explicitly; everything in between comes from
//! [`build_stage_registry`] in fixed order.

pub mod aggregation;
pub mod ascii_gate;
pub mod circumvention;
pub mod injection_scan;
pub mod phi_scan;
pub mod sample_exec;
pub mod schema_check;

use crate::config::GuardConfig;
use crate::errors::{ConfigError, Rejection};
use crate::policy::PolicyRuleTable;
use crate::schema::SchemaCatalog;
use crate::token_tree::Statement;
use crate::types::{Layer, Span};

/// Per-request state threaded through the pipeline.
///
/// Owned by exactly one validation call; nothing here is shared across
/// concurrent requests. The references point at the engine's read-only
/// configuration and rule tables.
pub struct ValidationContext<'a> {
    /// The raw query text.
    pub query: &'a str,
    /// Request identifier for logging.
    pub request_id: &'a str,
    /// Engine configuration.
    pub config: &'a GuardConfig,
    /// The PHI rule table.
    pub policy: &'a PolicyRuleTable,
    /// Optional schema catalog; `None` disables the schema layer.
    pub schema: Option<&'a SchemaCatalog>,
    /// The token tree, set once the adapter has run.
    pub statement: Option<Statement<'a>>,
    /// Whether a GROUP BY clause was observed (set by the aggregation layer).
    pub group_by_seen: bool,
    /// Source span of the mandated patient count expression, once located.
    pub patient_count_span: Option<Span>,
    /// The guarded rewrite, set once the wrapper has run.
    pub wrapped_query: Option<String>,
}

impl<'a> ValidationContext<'a> {
    /// Build a fresh context for one request.
    #[must_use]
    pub fn new(
        query: &'a str,
        request_id: &'a str,
        config: &'a GuardConfig,
        policy: &'a PolicyRuleTable,
        schema: Option<&'a SchemaCatalog>,
    ) -> Self {
        Self {
            query,
            request_id,
            config,
            policy,
            schema,
            statement: None,
            group_by_seen: false,
            patient_count_span: None,
            wrapped_query: None,
        }
    }
}

/// One validation layer.
pub trait Stage: Send + Sync {
    /// Unique stage name, used in logs and report keys.
    fn name(&self) -> &'static str;

    /// The pipeline layer this stage implements.
    fn layer(&self) -> Layer;

    /// Run the check. `Ok(())` continues the pipeline; any rejection is
    /// terminal for the request.
    fn check(&self, ctx: &mut ValidationContext<'_>) -> Result<(), Rejection>;
}

/// Build the tree-stage registry in fixed pipeline order.
///
/// The schema layer is included only when a catalog is installed, the
/// injection layer only when enabled in config. Extension layers share the
/// same [`Stage`] contract so they can be added or removed here without
/// touching the orchestrator or the other stages.
///
/// # Errors
///
/// Returns a [`ConfigError`] if a configured injection pattern fails to
/// compile.
pub fn build_stage_registry(
    config: &GuardConfig,
    with_schema: bool,
) -> Result<Vec<Box<dyn Stage>>, ConfigError> {
    let mut stages: Vec<Box<dyn Stage>> = Vec::new();
    if with_schema {
        stages.push(Box::new(schema_check::SchemaCheck));
    }
    stages.push(Box::new(phi_scan::PhiScan));
    stages.push(Box::new(aggregation::AggregationCheck::new()));
    stages.push(Box::new(circumvention::CircumventionCheck::new()));
    if config.enable_injection_scan {
        stages.push(Box::new(injection_scan::InjectionScan::new(
            &config.injection,
        )?));
    }
    Ok(stages)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_order_is_fixed() {
        let config = GuardConfig::default();
        let stages = build_stage_registry(&config, false).unwrap();
        let names: Vec<&str> = stages.iter().map(|s| s.name()).collect();
        assert_eq!(names, vec!["phi_scan", "aggregation", "circumvention"]);
    }

    #[test]
    fn registry_includes_optional_layers() {
        let mut config = GuardConfig::default();
        config.enable_injection_scan = true;
        let stages = build_stage_registry(&config, true).unwrap();
        let names: Vec<&str> = stages.iter().map(|s| s.name()).collect();
        assert_eq!(
            names,
            vec![
                "schema_check",
                "phi_scan",
                "aggregation",
                "circumvention",
                "injection_scan",
            ]
        );
    }

    #[test]
    fn invalid_injection_pattern_is_fatal() {
        let mut config = GuardConfig::default();
        config.enable_injection_scan = true;
        config.injection.encoding_patterns = vec!["([unclosed".to_owned()];
        assert!(build_stage_registry(&config, false).is_err());
    }
}
