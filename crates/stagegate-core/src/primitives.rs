//! # Gating Primitives
//!
//! Fixed constants of the gating engine. Policy (which stages exist, which
//! documents they need) is configuration; these values are not.

/// Permission resource guarding stage moves.
pub const TRANSITION_RESOURCE: &str = "stage_transition";

/// Action that lets a caller override failed required checks.
pub const BYPASS_ACTION: &str = "bypass";

/// Action that lets a caller move to a stage other than the immediate next one.
pub const NON_SEQUENTIAL_ACTION: &str = "non_sequential";

/// Minutes in one day, used for "days in stage" reporting.
pub const MINUTES_PER_DAY: i64 = 24 * 60;

// =============================================================================
// INPUT VALIDATION LIMITS
// =============================================================================

/// Maximum length for transition and bypass reasons.
///
/// Longer reasons are rejected before anything is recorded.
pub const MAX_REASON_LENGTH: usize = 4096;

/// Maximum length for a document category key.
pub const MAX_CATEGORY_LENGTH: usize = 64;

/// Maximum length for a stage slug.
pub const MAX_SLUG_LENGTH: usize = 64;

/// Maximum number of stages in one workflow.
pub const MAX_STAGES: usize = 64;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minutes_per_day() {
        assert_eq!(MINUTES_PER_DAY, 1440);
    }

    #[test]
    fn actions_are_distinct() {
        assert_ne!(BYPASS_ACTION, NON_SEQUENTIAL_ACTION);
    }
}
