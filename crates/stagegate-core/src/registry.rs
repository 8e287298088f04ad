//! # Stage Registry
//!
//! Ordered catalog of lifecycle stages.
//!
//! Orders are unique and strictly increasing; the "next stage" of a stage is
//! the one whose order equals `current.order + 1`. The registry is near-static
//! configuration and is validated once, when it is built.

use crate::primitives::{MAX_SLUG_LENGTH, MAX_STAGES};
use crate::{StageGateError, StageId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// =============================================================================
// WORKFLOW STAGE
// =============================================================================

/// One named, ordered step in a project's lifecycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowStage {
    pub id: StageId,
    /// Stable identifier used to key per-stage policy tables.
    pub slug: String,
    pub name: String,
    pub order: u32,
    #[serde(default)]
    pub exit_criteria: Vec<String>,
    #[serde(default)]
    pub required_approvals: bool,
}

impl WorkflowStage {
    #[must_use]
    pub fn new(id: StageId, slug: impl Into<String>, name: impl Into<String>, order: u32) -> Self {
        Self {
            id,
            slug: slug.into(),
            name: name.into(),
            order,
            exit_criteria: Vec::new(),
            required_approvals: false,
        }
    }

    #[must_use]
    pub fn with_approvals(mut self) -> Self {
        self.required_approvals = true;
        self
    }

    #[must_use]
    pub fn with_exit_criteria(mut self, criteria: &[&str]) -> Self {
        self.exit_criteria = criteria.iter().map(|c| (*c).to_string()).collect();
        self
    }
}

impl std::fmt::Display for WorkflowStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}. {}", self.order, self.name)
    }
}

// =============================================================================
// REGISTRY
// =============================================================================

/// The validated, ordered set of stages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageRegistry {
    /// Stages keyed by order (the total order of the lifecycle).
    by_order: BTreeMap<u32, WorkflowStage>,
    /// Reverse lookup: StageId -> order.
    index: BTreeMap<StageId, u32>,
}

impl StageRegistry {
    /// Build a registry, rejecting duplicate ids, slugs or orders and gaps in the order.
    pub fn new(stages: Vec<WorkflowStage>) -> Result<Self, StageGateError> {
        if stages.is_empty() {
            return Err(StageGateError::Config(
                "workflow must define at least one stage".to_string(),
            ));
        }
        if stages.len() > MAX_STAGES {
            return Err(StageGateError::Config(format!(
                "workflow defines {} stages, maximum is {}",
                stages.len(),
                MAX_STAGES
            )));
        }

        let mut by_order = BTreeMap::new();
        let mut index = BTreeMap::new();
        let mut slugs = BTreeMap::new();

        for stage in stages {
            if stage.slug.is_empty() || stage.slug.len() > MAX_SLUG_LENGTH {
                return Err(StageGateError::Config(format!(
                    "stage {} has an invalid slug '{}'",
                    stage.id, stage.slug
                )));
            }
            if let Some(other) = slugs.insert(stage.slug.clone(), stage.id) {
                return Err(StageGateError::Config(format!(
                    "slug '{}' is used by both {} and {}",
                    stage.slug, other, stage.id
                )));
            }
            if index.insert(stage.id, stage.order).is_some() {
                return Err(StageGateError::Config(format!(
                    "duplicate stage id {}",
                    stage.id
                )));
            }
            let order = stage.order;
            if by_order.insert(order, stage).is_some() {
                return Err(StageGateError::Config(format!(
                    "duplicate stage order {}",
                    order
                )));
            }
        }

        // Orders must be contiguous so that "next" is always order + 1.
        let orders: Vec<u32> = by_order.keys().copied().collect();
        for pair in orders.windows(2) {
            if pair[1] != pair[0].saturating_add(1) {
                return Err(StageGateError::Config(format!(
                    "stage orders must be contiguous: gap between {} and {}",
                    pair[0], pair[1]
                )));
            }
        }

        Ok(Self { by_order, index })
    }

    /// All stages in lifecycle order.
    pub fn stages(&self) -> impl Iterator<Item = &WorkflowStage> {
        self.by_order.values()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.by_order.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_order.is_empty()
    }

    #[must_use]
    pub fn get(&self, id: StageId) -> Option<&WorkflowStage> {
        self.index.get(&id).and_then(|order| self.by_order.get(order))
    }

    #[must_use]
    pub fn by_slug(&self, slug: &str) -> Option<&WorkflowStage> {
        self.by_order.values().find(|s| s.slug == slug)
    }

    #[must_use]
    pub fn by_order(&self, order: u32) -> Option<&WorkflowStage> {
        self.by_order.get(&order)
    }

    /// The entry stage of the lifecycle.
    #[must_use]
    pub fn first(&self) -> Option<&WorkflowStage> {
        self.by_order.values().next()
    }

    /// The final stage of the lifecycle.
    #[must_use]
    pub fn last(&self) -> Option<&WorkflowStage> {
        self.by_order.values().next_back()
    }

    /// The stage whose order equals `current.order + 1`.
    #[must_use]
    pub fn next_after(&self, current: &WorkflowStage) -> Option<&WorkflowStage> {
        self.by_order.get(&current.order.checked_add(1)?)
    }

    #[must_use]
    pub fn is_final(&self, stage: &WorkflowStage) -> bool {
        self.last().is_some_and(|last| last.id == stage.id)
    }

    pub(crate) fn slugs(&self) -> impl Iterator<Item = &str> {
        self.by_order.values().map(|s| s.slug.as_str())
    }
}

// =============================================================================
// TESTS
// =============================================================================
