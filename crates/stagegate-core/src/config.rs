//! # Workflow Configuration
//!
//! Policy the engine consumes but does not own: the stage list, the
//! per-stage document and field requirements, the stage-specific rule book
//! and the per-user permission grants.
//!
//! [`WorkflowConfig`] is the serde shape (the binary reads it from TOML);
//! [`WorkflowConfig::build`] validates it into a [`Workflow`]. Every check a
//! misconfiguration could slip past at runtime happens here instead, so a
//! bad file fails at startup.

use crate::documents::{DocumentRequirement, RequirementTable};
use crate::prerequisites::{FieldTable, RuleBook, StageRule};
use crate::primitives::MAX_CATEGORY_LENGTH;
use crate::registry::{StageRegistry, WorkflowStage};
use crate::sources::StaticPermissions;
use crate::{ProjectField, StageGateError, StageId, UserId};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

// =============================================================================
// SERDE SHAPE
// =============================================================================

/// One stage as written in configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageConfig {
    pub id: u64,
    pub slug: String,
    pub name: String,
    pub order: u32,
    #[serde(default)]
    pub exit_criteria: Vec<String>,
    #[serde(default)]
    pub required_approvals: bool,
}

/// Raw workflow configuration. Maps are keyed by stage slug.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowConfig {
    pub stages: Vec<StageConfig>,
    #[serde(default)]
    pub documents: BTreeMap<String, Vec<DocumentRequirement>>,
    #[serde(default)]
    pub fields: BTreeMap<String, Vec<ProjectField>>,
    /// Must name every stage; an empty list means no custom rules.
    #[serde(default)]
    pub rules: BTreeMap<String, Vec<StageRule>>,
    /// User id (decimal string) -> `resource:action` grants.
    #[serde(default)]
    pub permissions: BTreeMap<String, Vec<String>>,
}

/// Validated workflow policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Workflow {
    pub registry: StageRegistry,
    pub documents: RequirementTable,
    pub fields: FieldTable,
    pub rules: RuleBook,
}

/// Grants per user.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PermissionTable {
    by_user: BTreeMap<UserId, StaticPermissions>,
}

impl PermissionTable {
    /// Grants of `user`; unknown users get none.
    #[must_use]
    pub fn for_user(&self, user: UserId) -> StaticPermissions {
        self.by_user.get(&user).cloned().unwrap_or_default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.by_user.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_user.is_empty()
    }
}

impl WorkflowConfig {
    /// Validate into a [`Workflow`].
    pub fn build(&self) -> Result<Workflow, StageGateError> {
        let registry = StageRegistry::new(
            self.stages
                .iter()
                .map(|s| WorkflowStage {
                    id: StageId(s.id),
                    slug: s.slug.clone(),
                    name: s.name.clone(),
                    order: s.order,
                    exit_criteria: s.exit_criteria.clone(),
                    required_approvals: s.required_approvals,
                })
                .collect(),
        )?;

        let mut documents = RequirementTable::new();
        for (slug, requirements) in &self.documents {
            let stage = known_stage(&registry, slug, "documents")?;
            let mut seen = BTreeSet::new();
            for requirement in requirements {
                validate_requirement(slug, requirement)?;
                if !seen.insert(requirement.category.as_str()) {
                    return Err(StageGateError::Config(format!(
                        "stage '{}' lists document category '{}' twice",
                        slug, requirement.category
                    )));
                }
            }
            documents.insert(stage, requirements.clone());
        }

        let mut fields = FieldTable::new();
        for (slug, stage_fields) in &self.fields {
            let stage = known_stage(&registry, slug, "fields")?;
            let unique: BTreeSet<_> = stage_fields.iter().collect();
            if unique.len() != stage_fields.len() {
                return Err(StageGateError::Config(format!(
                    "stage '{}' lists a project field twice",
                    slug
                )));
            }
            fields.insert(stage, stage_fields.clone());
        }

        let rules = RuleBook::new(self.rules.clone());
        rules.validate_against(&registry)?;

        Ok(Workflow {
            registry,
            documents,
            fields,
            rules,
        })
    }

    /// Parse the `permissions` section.
    pub fn permission_table(&self) -> Result<PermissionTable, StageGateError> {
        let mut by_user = BTreeMap::new();
        for (user, grants) in &self.permissions {
            let id: u64 = user.trim().parse().map_err(|_| {
                StageGateError::Config(format!("permission key '{}' is not a user id", user))
            })?;
            by_user.insert(UserId(id), StaticPermissions::from_grants(grants)?);
        }
        Ok(PermissionTable { by_user })
    }

    /// The built-in seven-stage quote-to-delivery lifecycle.
    #[must_use]
    pub fn default_workflow() -> Self {
        let stage = |id: u64, slug: &str, name: &str, criteria: &[&str], approvals: bool| {
            StageConfig {
                id,
                slug: slug.to_string(),
                name: name.to_string(),
                order: id as u32,
                exit_criteria: criteria.iter().map(|c| (*c).to_string()).collect(),
                required_approvals: approvals,
            }
        };

        let stages = vec![
            stage(1, "inquiry", "Inquiry", &["Customer request logged"], false),
            stage(
                2,
                "technical_review",
                "Technical review",
                &["RFQ, drawings and BOM on file", "Scope understood"],
                false,
            ),
            stage(
                3,
                "quotation",
                "Quotation",
                &["Engineering, quality and production have reviewed", "Quote issued"],
                false,
            ),
            stage(
                4,
                "customer_approval",
                "Customer approval",
                &["Quote accepted by the customer"],
                true,
            ),
            stage(
                5,
                "order_confirmation",
                "Order confirmation",
                &["Purchase order received"],
                false,
            ),
            stage(
                6,
                "production",
                "Production",
                &["Released to the shop floor"],
                true,
            ),
            stage(
                7,
                "delivery",
                "Delivery",
                &["Goods shipped", "Inspection report filed"],
                false,
            ),
        ];

        let mut documents = BTreeMap::new();
        documents.insert(
            "technical_review".to_string(),
            vec![
                DocumentRequirement::required("rfq", 1).with_label("Request for quotation"),
                DocumentRequirement::required("drawing", 1).with_label("Technical drawing"),
                DocumentRequirement::required("bom", 1).with_label("Bill of materials"),
            ],
        );
        documents.insert(
            "quotation".to_string(),
            vec![
                DocumentRequirement::required("cost_breakdown", 1).with_label("Cost breakdown"),
                DocumentRequirement::optional("supplier_quote", 2).with_label("Supplier quotes"),
            ],
        );
        documents.insert(
            "customer_approval".to_string(),
            vec![DocumentRequirement::required("quote", 1).with_label("Issued quote")],
        );
        documents.insert(
            "order_confirmation".to_string(),
            vec![DocumentRequirement::required("purchase_order", 1).with_label("Purchase order")],
        );
        documents.insert(
            "delivery".to_string(),
            vec![
                DocumentRequirement::required("delivery_note", 1).with_label("Delivery note"),
                DocumentRequirement::optional("inspection_report", 1)
                    .with_label("Inspection report"),
            ],
        );

        let mut fields = BTreeMap::new();
        fields.insert(
            "technical_review".to_string(),
            vec![ProjectField::CustomerReference, ProjectField::Description],
        );
        fields.insert(
            "quotation".to_string(),
            vec![ProjectField::EstimatedValue, ProjectField::ContactEmail],
        );
        fields.insert("production".to_string(), vec![ProjectField::DueDate]);

        let mut rules: BTreeMap<String, Vec<StageRule>> = stages
            .iter()
            .map(|s| (s.slug.clone(), Vec::new()))
            .collect();
        rules.insert(
            "quotation".to_string(),
            vec![StageRule::DepartmentReviews {
                departments: vec![
                    "Engineering".to_string(),
                    "Quality".to_string(),
                    "Production".to_string(),
                ],
                required: true,
            }],
        );
        rules.insert(
            "order_confirmation".to_string(),
            vec![StageRule::AttributePresent {
                key: "po_number".to_string(),
                label: Some("Purchase order number".to_string()),
                required: true,
            }],
        );

        Self {
            stages,
            documents,
            fields,
            rules,
            permissions: BTreeMap::new(),
        }
    }
}

fn known_stage(registry: &StageRegistry, slug: &str, section: &str) -> Result<StageId, StageGateError> {
    registry.by_slug(slug).map(|s| s.id).ok_or_else(|| {
        StageGateError::Config(format!("{} configured for unknown stage '{}'", section, slug))
    })
}

fn validate_requirement(slug: &str, requirement: &DocumentRequirement) -> Result<(), StageGateError> {
    if requirement.category.trim().is_empty() || requirement.category.len() > MAX_CATEGORY_LENGTH {
        return Err(StageGateError::Config(format!(
            "stage '{}' has an invalid document category '{}'",
            slug, requirement.category
        )));
    }
    if requirement.min_count == 0 {
        return Err(StageGateError::Config(format!(
            "stage '{}': min_count of '{}' must be at least 1",
            slug, requirement.category
        )));
    }
    Ok(())
}

// =============================================================================
// TESTS
// =============================================================================
