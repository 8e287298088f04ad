//! # Stagegate CLI Module
//!
//! ## Available Commands
//!
//! - `server` - Start the HTTP server
//! - `init` - Initialize a new database
//! - `stages` - List the workflow stages
//! - `project add|show` - Register or inspect a project
//! - `document attach` - Attach a document to a project
//! - `approval request|decide` - Drive approval requests
//! - `review add` - Record a completed department review
//! - `validate` - Evaluate a transition without committing it
//! - `can-advance` - Document-only readiness for a stage
//! - `advance` - Commit a transition
//! - `history` - Stage history with time spent per stage

mod commands;

use clap::{Parser, Subcommand};
use stagegate_core::StageGateError;
use std::path::PathBuf;

pub use commands::*;

// =============================================================================
// CLI STRUCTURE
// =============================================================================

/// Stagegate - stage transition prerequisite validation
///
/// Decides whether a project may move to a target lifecycle stage and keeps
/// a ledger of every stage it passed through.
#[derive(Parser, Debug)]
#[command(name = "stagegate")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Show every prerequisite check, not just the failures
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Suppress banner output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Path to the redb database
    #[arg(short = 'D', long, global = true, default_value = "stagegate.redb")]
    pub database: PathBuf,

    /// Storage backend: "redb" (ACID database) or "memory" (discarded on exit)
    #[arg(short = 'B', long, global = true, default_value = "redb")]
    pub backend: String,

    /// Workflow policy file (TOML); the built-in workflow is used when omitted
    #[arg(short = 'c', long, global = true)]
    pub config: Option<PathBuf>,

    /// Acting user id; capability grants come from the policy file
    #[arg(short = 'U', long, global = true, default_value = "0")]
    pub user: u64,

    /// Output in JSON format (for programmatic access)
    #[arg(long, global = true)]
    pub json_mode: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Available CLI commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start HTTP server
    Server {
        /// Host to bind to
        #[arg(short = 'H', long, default_value = "127.0.0.1")]
        host: String,

        /// Port to bind to
        #[arg(short, long, default_value = "8080")]
        port: u16,
    },

    /// Initialize a new empty database
    Init {
        /// Force initialization even if database exists
        #[arg(short, long)]
        force: bool,
    },

    /// List the workflow stages in order
    Stages,

    /// Register or inspect projects
    #[command(subcommand)]
    Project(ProjectCommand),

    /// Manage project documents
    #[command(subcommand)]
    Document(DocumentCommand),

    /// Manage approval requests
    #[command(subcommand)]
    Approval(ApprovalCommand),

    /// Manage department reviews
    #[command(subcommand)]
    Review(ReviewCommand),

    /// Evaluate a transition without committing it
    Validate {
        #[arg(short, long)]
        project: u64,

        /// Target stage (slug or numeric id)
        #[arg(short, long)]
        stage: String,
    },

    /// Check only the document requirements of a stage
    CanAdvance {
        #[arg(short, long)]
        project: u64,

        /// Stage (slug or numeric id)
        #[arg(short, long)]
        stage: String,
    },

    /// Commit a transition
    Advance {
        #[arg(short, long)]
        project: u64,

        /// Target stage (slug or numeric id)
        #[arg(short, long)]
        stage: String,

        /// Why the project is moving
        #[arg(short, long)]
        reason: Option<String>,

        /// Justification for overriding failed prerequisites
        #[arg(short, long)]
        bypass_reason: Option<String>,
    },

    /// Show stage history and time spent per stage
    History {
        #[arg(short, long)]
        project: u64,
    },
}

#[derive(Subcommand, Debug)]
pub enum ProjectCommand {
    /// Register a new project
    Add {
        #[arg(long)]
        id: u64,

        #[arg(short, long)]
        name: String,

        #[arg(long)]
        customer_reference: Option<String>,

        #[arg(long)]
        description: Option<String>,

        /// Estimated value in cents
        #[arg(long)]
        estimated_value: Option<i64>,

        #[arg(long)]
        contact_email: Option<String>,

        /// RFC 3339 timestamp
        #[arg(long)]
        due_date: Option<String>,

        /// Free-form attribute as key=value (repeatable)
        #[arg(short, long = "attribute")]
        attributes: Vec<String>,
    },

    /// Show a project
    Show {
        #[arg(long)]
        id: u64,
    },
}

#[derive(Subcommand, Debug)]
pub enum DocumentCommand {
    /// Record that a document was attached
    Attach {
        #[arg(short, long)]
        project: u64,

        #[arg(long)]
        category: String,

        #[arg(short, long)]
        file: String,
    },
}

#[derive(Subcommand, Debug)]
pub enum ApprovalCommand {
    /// Ask an approver to sign off entry into a stage
    Request {
        #[arg(short, long)]
        project: u64,

        /// Stage (slug or numeric id)
        #[arg(short, long)]
        stage: String,

        #[arg(short, long)]
        approver: u64,

        /// Deadline in days from now
        #[arg(short, long)]
        deadline_days: Option<i64>,
    },

    /// Approve or reject a request
    Decide {
        #[arg(long)]
        id: u64,

        /// "approved" or "rejected"
        #[arg(short, long)]
        status: String,

        #[arg(long)]
        comment: Option<String>,
    },
}

#[derive(Subcommand, Debug)]
pub enum ReviewCommand {
    /// Record a completed department review
    Add {
        #[arg(short, long)]
        project: u64,

        #[arg(short, long)]
        department: String,

        #[arg(short, long)]
        notes: Option<String>,
    },
}

// =============================================================================
// COMMAND EXECUTION
// =============================================================================

/// Execute the CLI with parsed arguments.
pub async fn execute(cli: Cli) -> Result<(), StageGateError> {
    let ctx = CommandContext {
        database: cli.database,
        backend: cli.backend,
        config: cli.config,
        user: cli.user,
        json_mode: cli.json_mode,
        verbose: cli.verbose,
    };

    match cli.command {
        Some(Commands::Server { host, port }) => cmd_server(&ctx, &host, port).await,
        Some(Commands::Init { force }) => cmd_init(&ctx, force),
        Some(Commands::Stages) | None => cmd_stages(&ctx),
        Some(Commands::Project(ProjectCommand::Add {
            id,
            name,
            customer_reference,
            description,
            estimated_value,
            contact_email,
            due_date,
            attributes,
        })) => cmd_project_add(
            &ctx,
            NewProjectArgs {
                id,
                name,
                customer_reference,
                description,
                estimated_value,
                contact_email,
                due_date,
                attributes,
            },
        ),
        Some(Commands::Project(ProjectCommand::Show { id })) => cmd_project_show(&ctx, id),
        Some(Commands::Document(DocumentCommand::Attach {
            project,
            category,
            file,
        })) => cmd_document_attach(&ctx, project, category, file),
        Some(Commands::Approval(ApprovalCommand::Request {
            project,
            stage,
            approver,
            deadline_days,
        })) => cmd_approval_request(&ctx, project, &stage, approver, deadline_days),
        Some(Commands::Approval(ApprovalCommand::Decide {
            id,
            status,
            comment,
        })) => cmd_approval_decide(&ctx, id, &status, comment),
        Some(Commands::Review(ReviewCommand::Add {
            project,
            department,
            notes,
        })) => cmd_review_add(&ctx, project, department, notes),
        Some(Commands::Validate { project, stage }) => cmd_validate(&ctx, project, &stage),
        Some(Commands::CanAdvance { project, stage }) => cmd_can_advance(&ctx, project, &stage),
        Some(Commands::Advance {
            project,
            stage,
            reason,
            bypass_reason,
        }) => cmd_advance(&ctx, project, &stage, reason, bypass_reason),
        Some(Commands::History { project }) => cmd_history(&ctx, project),
    }
}
