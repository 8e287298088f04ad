//! # Workflow Policy Loading
//!
//! Reads the TOML workflow policy and turns it into a validated
//! [`Workflow`] plus the per-user [`PermissionTable`].
//!
//! With no `--config` the built-in seven-stage lifecycle is used and no user
//! holds any capability.

use stagegate_core::{PermissionTable, StageGateError, StageId, Workflow, WorkflowConfig};
use std::path::Path;

/// Maximum policy file size (1 MB).
const MAX_CONFIG_FILE_SIZE: u64 = 1024 * 1024;

/// Validated policy the binary runs with.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub workflow: Workflow,
    pub permissions: PermissionTable,
}

impl AppConfig {
    /// Build from an already-parsed configuration.
    pub fn from_config(config: &WorkflowConfig) -> Result<Self, StageGateError> {
        Ok(Self {
            workflow: config.build()?,
            permissions: config.permission_table()?,
        })
    }

    /// The built-in workflow without any permission grants.
    pub fn builtin() -> Result<Self, StageGateError> {
        Self::from_config(&WorkflowConfig::default_workflow())
    }

    /// Load from `path`, or fall back to the built-in workflow.
    pub fn load(path: Option<&Path>) -> Result<Self, StageGateError> {
        let Some(path) = path else {
            tracing::debug!("No --config given, using the built-in workflow");
            return Self::builtin();
        };

        let metadata = std::fs::metadata(path).map_err(|e| {
            StageGateError::Io(format!("Cannot read config '{}': {}", path.display(), e))
        })?;
        if metadata.len() > MAX_CONFIG_FILE_SIZE {
            return Err(StageGateError::Config(format!(
                "Config file size {} bytes exceeds maximum allowed {} bytes",
                metadata.len(),
                MAX_CONFIG_FILE_SIZE
            )));
        }

        let text = std::fs::read_to_string(path).map_err(|e| {
            StageGateError::Io(format!("Cannot read config '{}': {}", path.display(), e))
        })?;
        let app = Self::from_config(&parse_workflow(&text)?)?;
        tracing::info!(
            path = %path.display(),
            stages = app.workflow.registry.len(),
            users = app.permissions.len(),
            "Workflow policy loaded"
        );
        Ok(app)
    }
}

/// Parse a TOML workflow policy.
pub fn parse_workflow(text: &str) -> Result<WorkflowConfig, StageGateError> {
    toml::from_str(text).map_err(|e| StageGateError::Config(format!("Invalid TOML: {}", e)))
}

/// Resolve a stage given on the command line or in a URL.
///
/// A decimal id is taken as-is, so an unknown id still reaches validation
/// and is reported there. Anything else must be a known slug.
pub fn resolve_stage(workflow: &Workflow, key: &str) -> Result<StageId, StageGateError> {
    let key = key.trim();
    if let Ok(id) = key.parse::<u64>() {
        return Ok(StageId(id));
    }
    workflow
        .registry
        .by_slug(key)
        .map(|stage| stage.id)
        .ok_or_else(|| StageGateError::InvalidArgument(format!("unknown stage '{}'", key)))
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use stagegate_core::UserId;
    use stagegate_core::primitives::{BYPASS_ACTION, TRANSITION_RESOURCE};
    use stagegate_core::{PermissionChecker, ProjectField};

    const POLICY: &str = r#"
[[stages]]
id = 1
slug = "intake"
name = "Intake"
order = 1

[[stages]]
id = 2
slug = "design"
name = "Design"
order = 2
required_approvals = true
exit_criteria = ["Design frozen"]

[documents]
design = [
    { category = "spec", label = "Specification", required = true, min_count = 1 },
]

[fields]
design = ["description"]

[rules]
intake = []
design = [
    { kind = "value_at_least", min_cents = 100000, required = false },
]

[permissions]
"7" = ["stage_transition:bypass"]
"#;

    #[test]
    fn policy_file_parses_and_builds() {
        let app = AppConfig::from_config(&parse_workflow(POLICY).unwrap()).unwrap();
        assert_eq!(app.workflow.registry.len(), 2);
        assert_eq!(
            app.workflow.fields.for_stage(StageId(2)),
            &[ProjectField::Description]
        );

        let grants = app.permissions.for_user(UserId(7));
        assert!(
            grants
                .check_permission(TRANSITION_RESOURCE, BYPASS_ACTION)
                .unwrap()
                .allowed
        );
        assert!(app.permissions.for_user(UserId(8)).is_empty());
    }

    #[test]
    fn shipped_policy_builds() {
        let text = include_str!("../../../stagegate.toml");
        let app = AppConfig::from_config(&parse_workflow(text).unwrap()).unwrap();
        assert_eq!(app.workflow.registry.len(), 7);
        assert_eq!(app.permissions.len(), 2);
        assert_eq!(
            app.workflow.rules.for_stage("quotation").map(<[_]>::len),
            Some(2)
        );
    }

    #[test]
    fn missing_rules_entry_is_rejected() {
        let text = POLICY.replace("intake = []\n", "");
        let config = parse_workflow(&text).unwrap();
        assert!(matches!(
            AppConfig::from_config(&config),
            Err(StageGateError::Config(_))
        ));
    }

    #[test]
    fn malformed_toml_is_a_config_error() {
        assert!(matches!(
            parse_workflow("stages = 3 = 4"),
            Err(StageGateError::Config(_))
        ));
    }

    #[test]
    fn load_from_disk_and_builtin_fallback() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stagegate.toml");
        std::fs::write(&path, POLICY).unwrap();
        assert_eq!(
            AppConfig::load(Some(&path)).unwrap().workflow.registry.len(),
            2
        );
        assert_eq!(AppConfig::load(None).unwrap().workflow.registry.len(), 7);
        assert!(matches!(
            AppConfig::load(Some(&dir.path().join("missing.toml"))),
            Err(StageGateError::Io(_))
        ));
    }

    #[test]
    fn stages_resolve_by_slug_or_id() {
        let app = AppConfig::builtin().unwrap();
        assert_eq!(
            resolve_stage(&app.workflow, "quotation").unwrap(),
            StageId(3)
        );
        assert_eq!(resolve_stage(&app.workflow, " 42 ").unwrap(), StageId(42));
        assert!(resolve_stage(&app.workflow, "nowhere").is_err());
    }
}
