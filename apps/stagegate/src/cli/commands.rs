//! # CLI Command Implementations
//!
//! Every command loads the workflow policy, opens the engine over the chosen
//! backend, performs one operation and prints the result, as text or as JSON
//! with `--json-mode`.

use crate::api::{self, AppState};
use crate::config::{AppConfig, resolve_stage};
use chrono::{DateTime, Duration, Utc};
use stagegate_core::{
    ApprovalId, ApprovalStatus, CheckCategory, CheckStatus, ConfirmTransition, Engine, NewApproval,
    NewDocument, NewReview, Project, ProjectId, StageGateError, StageId, StaticPermissions,
    UserId, Verdict, Workflow, history,
};
use std::path::PathBuf;

// =============================================================================
// CONTEXT
// =============================================================================

/// Global flags every command sees.
#[derive(Debug, Clone)]
pub struct CommandContext {
    pub database: PathBuf,
    pub backend: String,
    pub config: Option<PathBuf>,
    pub user: u64,
    pub json_mode: bool,
    pub verbose: bool,
}

impl CommandContext {
    fn load_config(&self) -> Result<AppConfig, StageGateError> {
        AppConfig::load(self.config.as_deref())
    }

    fn permissions(&self, app: &AppConfig) -> StaticPermissions {
        app.permissions.for_user(UserId(self.user))
    }
}

/// Arguments of `project add`.
#[derive(Debug, Clone)]
pub struct NewProjectArgs {
    pub id: u64,
    pub name: String,
    pub customer_reference: Option<String>,
    pub description: Option<String>,
    pub estimated_value: Option<i64>,
    pub contact_email: Option<String>,
    pub due_date: Option<String>,
    pub attributes: Vec<String>,
}

impl NewProjectArgs {
    fn to_project(&self) -> Result<Project, StageGateError> {
        let mut project = Project::new(ProjectId(self.id), self.name.clone());
        project.customer_reference = self.customer_reference.clone();
        project.description = self.description.clone();
        project.estimated_value_cents = self.estimated_value;
        project.contact_email = self.contact_email.clone();
        project.due_date = self
            .due_date
            .as_deref()
            .map(|raw| {
                DateTime::parse_from_rfc3339(raw)
                    .map(|d| d.with_timezone(&Utc))
                    .map_err(|e| {
                        StageGateError::InvalidArgument(format!("due date '{}': {}", raw, e))
                    })
            })
            .transpose()?;
        for attribute in &self.attributes {
            let (key, value) = attribute.split_once('=').ok_or_else(|| {
                StageGateError::InvalidArgument(format!(
                    "attribute '{}' must look like key=value",
                    attribute
                ))
            })?;
            project
                .attributes
                .insert(key.trim().to_string(), value.trim().to_string());
        }
        Ok(project)
    }
}

// =============================================================================
// SERVER COMMAND
// =============================================================================

/// Start the HTTP server.
pub async fn cmd_server(ctx: &CommandContext, host: &str, port: u16) -> Result<(), StageGateError> {
    let app = ctx.load_config()?;
    let engine = open_engine(ctx, app.workflow.clone())?;

    println!("Stagegate Server Starting...");
    println!();
    println!("Configuration:");
    println!("  Host:     {}", host);
    println!("  Port:     {}", port);
    println!("  Backend:  {}", ctx.backend);
    println!("  Database: {:?}", ctx.database);
    println!("  Stages:   {}", app.workflow.registry.len());
    println!();
    println!("Endpoints:");
    println!("  GET  /stages                          - Stage catalog");
    println!("  POST /projects                        - Register a project");
    println!("  POST /transitions/validate            - Evaluate a transition");
    println!("  POST /transitions/confirm             - Commit a transition");
    println!("  GET  /projects/{{id}}/can-advance/{{stage}} - Document readiness");
    println!("  GET  /projects/{{id}}/history           - Stage history");
    println!("  GET  /health                          - Health check");
    println!();
    println!("Press Ctrl+C to stop");
    println!();

    let state = AppState::new(engine, app.permissions);
    let addr = format!("{}:{}", host, port);
    api::run_server(&addr, state).await
}

// =============================================================================
// INIT & STAGES
// =============================================================================

/// Initialize a new database and check the policy file, if any.
pub fn cmd_init(ctx: &CommandContext, force: bool) -> Result<(), StageGateError> {
    if ctx.backend != "redb" {
        return Err(StageGateError::InvalidArgument(
            "init only applies to the redb backend".to_string(),
        ));
    }
    let app = ctx.load_config()?;

    if ctx.database.exists() {
        if !force {
            return Err(StageGateError::InvalidArgument(
                "Database already exists. Use --force to overwrite.".to_string(),
            ));
        }
        std::fs::remove_file(&ctx.database)
            .map_err(|e| StageGateError::Io(format!("Remove db: {}", e)))?;
    }

    let _engine = Engine::with_redb(app.workflow.clone(), &ctx.database)?;
    println!("Initialized new redb database at {:?}", ctx.database);
    println!(
        "Workflow: {} stages, {} users with grants",
        app.workflow.registry.len(),
        app.permissions.len()
    );
    Ok(())
}

/// List stages with their requirements.
pub fn cmd_stages(ctx: &CommandContext) -> Result<(), StageGateError> {
    let app = ctx.load_config()?;
    let workflow = &app.workflow;

    if ctx.json_mode {
        let stages: Vec<serde_json::Value> = workflow
            .registry
            .stages()
            .map(|stage| {
                serde_json::json!({
                    "stage": stage,
                    "documents": workflow.documents.for_stage(stage.id),
                    "fields": workflow.fields.for_stage(stage.id),
                    "rules": workflow.rules.for_stage(&stage.slug).unwrap_or(&[]),
                })
            })
            .collect();
        print_json(&serde_json::json!({ "stages": stages }));
        return Ok(());
    }

    println!("Workflow Stages");
    println!("===============");
    for stage in workflow.registry.stages() {
        let approval = if stage.required_approvals {
            " [approval]"
        } else {
            ""
        };
        println!("{} ({}){}", stage, stage.slug, approval);
        for requirement in workflow.documents.for_stage(stage.id) {
            println!(
                "    document: {} x{}{}",
                requirement.display_name(),
                requirement.min_count,
                if requirement.required { "" } else { " (optional)" }
            );
        }
        for field in workflow.fields.for_stage(stage.id) {
            println!("    field:    {}", field.label());
        }
        if ctx.verbose {
            for criterion in &stage.exit_criteria {
                println!("    exit:     {}", criterion);
            }
        }
    }
    Ok(())
}

// =============================================================================
// PROJECT COMMANDS
// =============================================================================

pub fn cmd_project_add(ctx: &CommandContext, args: NewProjectArgs) -> Result<(), StageGateError> {
    let app = ctx.load_config()?;
    let mut engine = open_engine(ctx, app.workflow)?;
    let project = engine.create_project(args.to_project()?)?;

    if ctx.json_mode {
        print_json(&project);
    } else {
        println!("Registered {} ({})", project.id, project.name);
    }
    Ok(())
}

pub fn cmd_project_show(ctx: &CommandContext, id: u64) -> Result<(), StageGateError> {
    let app = ctx.load_config()?;
    let engine = open_engine(ctx, app.workflow)?;
    let project = engine.project(ProjectId(id))?;

    if ctx.json_mode {
        print_json(&project);
        return Ok(());
    }

    println!("{}: {}", project.id, project.name);
    println!("Status: {}", project.status.as_str());
    println!(
        "Stage:  {}",
        project
            .current_stage_id
            .map(|s| stage_label(engine.workflow(), s))
            .unwrap_or_else(|| "(not entered)".to_string())
    );
    if let Some(value) = project.estimated_value_cents {
        println!("Value:  {}", stagegate_core::prerequisites::format_cents(value));
    }
    for (key, value) in &project.attributes {
        println!("  {} = {}", key, value);
    }
    Ok(())
}

// =============================================================================
// CALLER-SIDE WRITES
// =============================================================================

pub fn cmd_document_attach(
    ctx: &CommandContext,
    project: u64,
    category: String,
    file: String,
) -> Result<(), StageGateError> {
    let app = ctx.load_config()?;
    let mut engine = open_engine(ctx, app.workflow)?;
    let document = engine.attach_document(
        NewDocument {
            project_id: ProjectId(project),
            category,
            file_name: file,
        },
        Utc::now(),
    )?;

    if ctx.json_mode {
        print_json(&document);
    } else {
        println!(
            "Attached '{}' as {} to {}",
            document.file_name, document.category, document.project_id
        );
    }
    Ok(())
}

pub fn cmd_approval_request(
    ctx: &CommandContext,
    project: u64,
    stage: &str,
    approver: u64,
    deadline_days: Option<i64>,
) -> Result<(), StageGateError> {
    let app = ctx.load_config()?;
    let stage = resolve_stage(&app.workflow, stage)?;
    let now = Utc::now();
    let deadline = deadline_days
        .map(|days| {
            Duration::try_days(days)
                .and_then(|d| now.checked_add_signed(d))
                .ok_or_else(|| {
                    StageGateError::InvalidArgument(format!("deadline of {} days", days))
                })
        })
        .transpose()?;

    let mut engine = open_engine(ctx, app.workflow)?;
    let approval = engine.request_approval(
        NewApproval {
            project_id: ProjectId(project),
            stage_id: stage,
            approver_id: UserId(approver),
            deadline,
        },
        now,
    )?;

    if ctx.json_mode {
        print_json(&approval);
    } else {
        println!(
            "Approval #{} requested from user {} for {}",
            approval.id.0,
            approval.approver_id.0,
            stage_label(engine.workflow(), approval.stage_id)
        );
    }
    Ok(())
}

/// Parse a decision given on the command line.
pub fn parse_decision(raw: &str) -> Result<ApprovalStatus, StageGateError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "approved" | "approve" => Ok(ApprovalStatus::Approved),
        "rejected" | "reject" => Ok(ApprovalStatus::Rejected),
        other => Err(StageGateError::InvalidArgument(format!(
            "decision '{}' must be approved or rejected",
            other
        ))),
    }
}

pub fn cmd_approval_decide(
    ctx: &CommandContext,
    id: u64,
    status: &str,
    comment: Option<String>,
) -> Result<(), StageGateError> {
    let status = parse_decision(status)?;
    let app = ctx.load_config()?;
    let mut engine = open_engine(ctx, app.workflow)?;
    let decided = engine.decide_approval(ApprovalId(id), status, comment, Utc::now())?;

    if ctx.json_mode {
        print_json(&decided);
    } else {
        println!("Approval #{} is now {:?}", decided.id.0, decided.status);
    }
    Ok(())
}

pub fn cmd_review_add(
    ctx: &CommandContext,
    project: u64,
    department: String,
    notes: Option<String>,
) -> Result<(), StageGateError> {
    let app = ctx.load_config()?;
    let mut engine = open_engine(ctx, app.workflow)?;
    let review = engine.add_review(
        NewReview {
            project_id: ProjectId(project),
            department,
            reviewer_id: UserId(ctx.user),
            notes,
        },
        Utc::now(),
    )?;

    if ctx.json_mode {
        print_json(&review);
    } else {
        println!(
            "{} review recorded for {}",
            review.department, review.project_id
        );
    }
    Ok(())
}

// =============================================================================
// TRANSITION COMMANDS
// =============================================================================

/// Evaluate a transition without committing it.
pub fn cmd_validate(ctx: &CommandContext, project: u64, stage: &str) -> Result<(), StageGateError> {
    let app = ctx.load_config()?;
    let target = resolve_stage(&app.workflow, stage)?;
    let permissions = ctx.permissions(&app);
    let engine = open_engine(ctx, app.workflow)?;
    let verdict = engine.validate_transition(ProjectId(project), target, &permissions, Utc::now())?;

    if ctx.json_mode {
        print_json(&verdict);
        return Ok(());
    }
    print_verdict(engine.workflow(), &verdict, ctx.verbose);
    Ok(())
}

/// Document-only readiness.
pub fn cmd_can_advance(
    ctx: &CommandContext,
    project: u64,
    stage: &str,
) -> Result<(), StageGateError> {
    let app = ctx.load_config()?;
    let target = resolve_stage(&app.workflow, stage)?;
    let engine = open_engine(ctx, app.workflow)?;
    let report = engine.can_advance_to_stage(ProjectId(project), target)?;

    if ctx.json_mode {
        print_json(&report);
        return Ok(());
    }

    println!(
        "{}: {}",
        stage_label(engine.workflow(), target),
        if report.can_advance {
            "documents complete"
        } else {
            "documents missing"
        }
    );
    let summary = report.validation.summary;
    println!(
        "Required: {} satisfied, {} missing, {} short of {}",
        summary.satisfied, summary.missing, summary.invalid, summary.total_required
    );
    for blocker in &report.blockers {
        println!("  x {}", blocker);
    }
    for warning in &report.warnings {
        println!("  ! {}", warning);
    }
    Ok(())
}

/// Commit a transition.
pub fn cmd_advance(
    ctx: &CommandContext,
    project: u64,
    stage: &str,
    reason: Option<String>,
    bypass_reason: Option<String>,
) -> Result<(), StageGateError> {
    let app = ctx.load_config()?;
    let target = resolve_stage(&app.workflow, stage)?;
    let permissions = ctx.permissions(&app);
    let mut engine = open_engine(ctx, app.workflow)?;

    let receipt = engine.confirm_transition(
        &ConfirmTransition {
            project_id: ProjectId(project),
            target_stage_id: target,
            user_id: UserId(ctx.user),
            reason,
            bypass_reason,
        },
        &permissions,
        Utc::now(),
    )?;

    if ctx.json_mode {
        print_json(&receipt);
        return Ok(());
    }

    println!(
        "{} moved to {}{}",
        receipt.project_id,
        stage_label(engine.workflow(), receipt.to_stage_id),
        if receipt.bypassed { " (bypass)" } else { "" }
    );
    for warning in &receipt.verdict.warnings {
        println!("  ! {}", warning);
    }
    for notice in &receipt.notices {
        println!("  ! {}", notice);
    }
    Ok(())
}

/// Stage history with time spent per stage.
pub fn cmd_history(ctx: &CommandContext, project: u64) -> Result<(), StageGateError> {
    let app = ctx.load_config()?;
    let engine = open_engine(ctx, app.workflow)?;
    let project = engine.project(ProjectId(project))?;
    let entries = engine.get_history(project.id)?;
    let now = Utc::now();
    let timeline = history::stage_timeline(&entries, now);
    let days = history::days_in_current_stage(&entries, now);

    if ctx.json_mode {
        print_json(&serde_json::json!({
            "project_id": project.id,
            "entries": entries,
            "timeline": timeline,
            "days_in_current_stage": days,
        }));
        return Ok(());
    }

    println!("History of {} ({})", project.id, project.name);
    for (entry, row) in entries.iter().zip(&timeline) {
        println!(
            "  {}  {:<28} {:>8} min{}{}",
            row.entered_at.format("%Y-%m-%d %H:%M"),
            stage_label(engine.workflow(), row.stage_id),
            row.minutes,
            if row.exited_at.is_none() { "  (current)" } else { "" },
            if row.bypassed { "  [bypass]" } else { "" }
        );
        if ctx.verbose
            && let Some(reason) = &entry.bypass_reason
        {
            println!("      bypass reason: {}", reason);
        }
    }
    if let Some(days) = days {
        println!("Days in current stage: {}", days);
    }
    Ok(())
}

// =============================================================================
// HELPER FUNCTIONS
// =============================================================================

/// Open the engine over the backend named by `--backend`.
pub fn open_engine(ctx: &CommandContext, workflow: Workflow) -> Result<Engine, StageGateError> {
    match ctx.backend.as_str() {
        "redb" => Engine::with_redb(workflow, &ctx.database),
        "memory" => Ok(Engine::in_memory(workflow)),
        other => Err(StageGateError::InvalidArgument(format!(
            "unknown backend '{}' (expected redb or memory)",
            other
        ))),
    }
}

fn stage_label(workflow: &Workflow, id: StageId) -> String {
    workflow
        .registry
        .get(id)
        .map(|s| s.name.clone())
        .unwrap_or_else(|| id.to_string())
}

fn print_json<T: serde::Serialize + ?Sized>(value: &T) {
    println!(
        "{}",
        serde_json::to_string_pretty(value).unwrap_or_default()
    );
}

fn status_mark(status: CheckStatus) -> &'static str {
    match status {
        CheckStatus::Passed => "ok",
        CheckStatus::Failed => "x ",
        CheckStatus::Pending => "..",
    }
}

fn print_verdict(workflow: &Workflow, verdict: &Verdict, verbose: bool) {
    let from = verdict
        .from_stage_id
        .map(|s| stage_label(workflow, s))
        .unwrap_or_else(|| "(none)".to_string());
    println!(
        "{} -> {} for {}",
        from,
        stage_label(workflow, verdict.target_stage_id),
        verdict.project_id
    );

    let outcome = if verdict.is_valid {
        "ALLOWED"
    } else if verdict.requires_bypass {
        "BLOCKED (bypass available)"
    } else {
        "BLOCKED"
    };
    println!("Verdict: {}", outcome);
    if verdict.requires_approval {
        println!("Target stage requires approval");
    }

    if verbose {
        for category in CheckCategory::ALL {
            let mut checks = verdict.prerequisite_result.in_category(category).peekable();
            if checks.peek().is_none() {
                continue;
            }
            println!();
            println!("{}:", category.label());
            for check in checks {
                println!("  [{}] {}", status_mark(check.status), check.description);
                if let Some(details) = &check.details {
                    println!("       {}", details);
                }
            }
        }
        println!();
    }

    for error in &verdict.errors {
        println!("  x {}", error);
    }
    for warning in &verdict.warnings {
        println!("  ! {}", warning);
    }
}

// =============================================================================
// TESTS
// =============================================================================
