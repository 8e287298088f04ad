//! # Property-Based Tests
//!
//! Aggregation, ledger and determinism invariants checked with proptest.

use chrono::{DateTime, Duration, TimeZone, Utc};
use proptest::collection::vec;
use proptest::prelude::*;
use stagegate_core::{
    CheckCategory, CheckStatus, ConfirmTransition, DocumentEvaluator, DocumentRequirement,
    Engine, HistoryStore, MemoryStore, NewDocument, PrerequisiteCheck, PrerequisiteResult,
    Project, ProjectId, ProjectStore, RequirementTable, StageId, StaticPermissions,
    TransitionRecord, UserId, WorkflowConfig,
};

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0)
        .single()
        .expect("valid timestamp")
}

fn status_strategy() -> impl Strategy<Value = CheckStatus> {
    prop_oneof![
        Just(CheckStatus::Passed),
        Just(CheckStatus::Failed),
        Just(CheckStatus::Pending),
    ]
}

proptest! {
    /// required_passed holds exactly when every required check passed.
    #[test]
    fn required_passed_iff_all_required_passed(
        checks in vec((any::<bool>(), status_strategy()), 0..24)
    ) {
        let built: Vec<PrerequisiteCheck> = checks
            .iter()
            .enumerate()
            .map(|(i, (required, status))| PrerequisiteCheck {
                status: *status,
                ..PrerequisiteCheck::passed(
                    format!("c{}", i),
                    CheckCategory::System,
                    "check",
                    format!("check {}", i),
                    *required,
                )
            })
            .collect();

        let result = PrerequisiteResult::from_checks(built);
        let expected = checks
            .iter()
            .all(|(required, status)| !required || *status == CheckStatus::Passed);
        prop_assert_eq!(result.required_passed, expected);

        let failed_required = checks
            .iter()
            .filter(|(required, status)| *required && *status == CheckStatus::Failed)
            .count();
        prop_assert_eq!(result.errors.len(), failed_required);
        prop_assert_eq!(result.checks.len(), checks.len());
    }

    /// Closed entries carry exact durations; exactly one entry stays open.
    #[test]
    fn ledger_durations_match_timestamps(gaps in vec(0i64..20_000, 1..12)) {
        let mut store = MemoryStore::new();
        let mut at = t0();
        let mut from = None;

        for (i, gap) in gaps.iter().enumerate() {
            at += Duration::minutes(*gap);
            let to = StageId(i as u64 + 1);
            store
                .append_transition(
                    &TransitionRecord {
                        project_id: ProjectId(1),
                        from_stage_id: from,
                        to_stage_id: to,
                        user_id: UserId(1),
                        reason: None,
                        bypass_required: false,
                        bypass_reason: None,
                    },
                    at,
                )
                .expect("append");
            from = Some(to);
        }

        let entries = store.entries(ProjectId(1)).expect("entries");
        prop_assert_eq!(entries.len(), gaps.len());
        prop_assert_eq!(entries.iter().filter(|e| e.exited_at.is_none()).count(), 1);
        prop_assert!(entries.last().is_some_and(|e| e.exited_at.is_none()));

        for (entry, next_gap) in entries.iter().zip(gaps.iter().skip(1)) {
            prop_assert_eq!(entry.duration_minutes, Some(*next_gap));
        }
        for pair in entries.windows(2) {
            prop_assert_eq!(pair[1].from_stage_id, Some(pair[0].to_stage_id));
        }
    }

    /// Optional-only requirement tables never block.
    #[test]
    fn optional_requirements_never_block(
        min_counts in vec(1u32..4, 0..6),
        uploads in vec(0usize..6, 0..10)
    ) {
        let categories: Vec<String> = (0..min_counts.len()).map(|i| format!("doc{}", i)).collect();
        let mut table = RequirementTable::new();
        table.insert(
            StageId(2),
            categories
                .iter()
                .zip(&min_counts)
                .map(|(c, n)| DocumentRequirement::optional(c.clone(), *n))
                .collect(),
        );

        let mut store = MemoryStore::new();
        store
            .save_project(&Project::new(ProjectId(1), "p"))
            .expect("save");
        for index in uploads {
            if let Some(category) = categories.get(index) {
                store
                    .attach_document(
                        NewDocument {
                            project_id: ProjectId(1),
                            category: category.clone(),
                            file_name: "f.pdf".to_string(),
                        },
                        t0(),
                    )
                    .expect("attach");
            }
        }

        let report = DocumentEvaluator::new(&table)
            .can_advance_to_stage(&store, ProjectId(1), StageId(2))
            .expect("report");
        prop_assert!(report.can_advance);
        prop_assert!(report.blockers.is_empty());
        prop_assert!(report.validation.missing.is_empty());
    }

    /// Two validations without an intervening write agree.
    #[test]
    fn validation_idempotent(categories in vec(prop_oneof![Just("rfq"), Just("drawing"), Just("bom"), Just("misc")], 0..6)) {
        let workflow = WorkflowConfig::default_workflow().build().expect("workflow");
        let target = workflow.registry.by_slug("technical_review").expect("stage").id;
        let first_stage = workflow.registry.by_slug("inquiry").expect("stage").id;
        let mut engine = Engine::in_memory(workflow);

        let mut project = Project::new(ProjectId(1), "p");
        project.customer_reference = Some("ref".to_string());
        engine.create_project(project).expect("create");
        engine
            .confirm_transition(
                &ConfirmTransition {
                    project_id: ProjectId(1),
                    target_stage_id: first_stage,
                    user_id: UserId(1),
                    reason: None,
                    bypass_reason: None,
                },
                &StaticPermissions::none(),
                t0(),
            )
            .expect("enter");
        for category in categories {
            engine
                .attach_document(
                    NewDocument {
                        project_id: ProjectId(1),
                        category: category.to_string(),
                        file_name: "f.pdf".to_string(),
                    },
                    t0(),
                )
                .expect("attach");
        }

        let permissions = StaticPermissions::none();
        let a = engine.validate_transition(ProjectId(1), target, &permissions, t0()).expect("a");
        let b = engine.validate_transition(ProjectId(1), target, &permissions, t0()).expect("b");
        prop_assert_eq!(a, b);
    }
}
