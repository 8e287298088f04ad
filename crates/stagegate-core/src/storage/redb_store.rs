//! # redb-backed Store
//!
//! A disk-backed store using the redb embedded database:
//! - ACID transactions, one write transaction per logical operation
//! - Crash safety (copy-on-write B-trees)
//! - Records stored as postcard bytes
//!
//! Per-project collections use `(project_id, record_id)` tuple keys so a
//! project's records are one contiguous range scan.
//!
//! ## Open-entry uniqueness
//!
//! `OPEN_ENTRIES` maps a project to its single open history entry. The
//! close-then-open of `append_transition` reads and rewrites that row inside
//! the same write transaction as the two history rows, and redb serializes
//! writers, so two transitions for one project can never both observe "no
//! open entry".

use super::{apply_decision, pending_request};
use crate::history::{StageHistoryEntry, TransitionRecord, advance_ledger};
use crate::sources::{
    HistoryStore, NewApproval, NewDocument, NewReview, ProjectStore, WorkflowSources,
};
use crate::{
    ApprovalId, ApprovalRequest, ApprovalStatus, DepartmentReview, Document, DocumentId, EntryId,
    Project, ProjectId, ReviewId, StageGateError, StageId,
};
use chrono::{DateTime, Utc};
use redb::{Database, ReadableDatabase, ReadableTable, ReadableTableMetadata, TableDefinition};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::path::Path;

/// Table for projects: ProjectId(u64) -> serialized Project bytes
const PROJECTS: TableDefinition<u64, &[u8]> = TableDefinition::new("projects");

/// Table for documents: (project_id, document_id) -> serialized Document
const DOCUMENTS: TableDefinition<(u64, u64), &[u8]> = TableDefinition::new("documents");

/// Table for approvals: (project_id, approval_id) -> serialized ApprovalRequest
const APPROVALS: TableDefinition<(u64, u64), &[u8]> = TableDefinition::new("approvals");

/// Table for approval lookup on decide: approval_id -> project_id
const APPROVAL_INDEX: TableDefinition<u64, u64> = TableDefinition::new("approval_index");

/// Table for reviews: (project_id, review_id) -> serialized DepartmentReview
const REVIEWS: TableDefinition<(u64, u64), &[u8]> = TableDefinition::new("reviews");

/// Table for history: (project_id, entry_id) -> serialized StageHistoryEntry
const HISTORY: TableDefinition<(u64, u64), &[u8]> = TableDefinition::new("history");

/// Uniqueness constraint: project_id -> its one open entry_id
const OPEN_ENTRIES: TableDefinition<u64, u64> = TableDefinition::new("open_entries");

/// Table for metadata: key string -> value u64 (id counters)
const METADATA: TableDefinition<&str, u64> = TableDefinition::new("metadata");

const NEXT_DOCUMENT_ID: &str = "next_document_id";
const NEXT_APPROVAL_ID: &str = "next_approval_id";
const NEXT_REVIEW_ID: &str = "next_review_id";
const NEXT_ENTRY_ID: &str = "next_entry_id";

fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, StageGateError> {
    postcard::to_allocvec(value).map_err(|e| StageGateError::Serialization(e.to_string()))
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, StageGateError> {
    postcard::from_bytes(bytes).map_err(|e| StageGateError::Serialization(e.to_string()))
}

/// Increment and return a counter from the metadata table.
fn bump(meta: &mut redb::Table<'_, &'static str, u64>, key: &str) -> Result<u64, StageGateError> {
    let current = meta
        .get(key)
        .map_err(|e| StageGateError::Io(e.to_string()))?
        .map(|v| v.value())
        .unwrap_or(0);
    let next = current.saturating_add(1);
    meta.insert(key, next)
        .map_err(|e| StageGateError::Io(e.to_string()))?;
    Ok(next)
}

/// A disk-backed store using redb.
pub struct RedbStore {
    db: Database,
}

impl std::fmt::Debug for RedbStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedbStore").finish_non_exhaustive()
    }
}

impl RedbStore {
    /// Open or create a store at the given path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StageGateError> {
        let db =
            Database::create(path.as_ref()).map_err(|e| StageGateError::Io(e.to_string()))?;

        // Initialize tables if they don't exist
        {
            let write_txn = db
                .begin_write()
                .map_err(|e| StageGateError::Io(e.to_string()))?;
            let _ = write_txn
                .open_table(PROJECTS)
                .map_err(|e| StageGateError::Io(e.to_string()))?;
            let _ = write_txn
                .open_table(DOCUMENTS)
                .map_err(|e| StageGateError::Io(e.to_string()))?;
            let _ = write_txn
                .open_table(APPROVALS)
                .map_err(|e| StageGateError::Io(e.to_string()))?;
            let _ = write_txn
                .open_table(APPROVAL_INDEX)
                .map_err(|e| StageGateError::Io(e.to_string()))?;
            let _ = write_txn
                .open_table(REVIEWS)
                .map_err(|e| StageGateError::Io(e.to_string()))?;
            let _ = write_txn
                .open_table(HISTORY)
                .map_err(|e| StageGateError::Io(e.to_string()))?;
            let _ = write_txn
                .open_table(OPEN_ENTRIES)
                .map_err(|e| StageGateError::Io(e.to_string()))?;
            let _ = write_txn
                .open_table(METADATA)
                .map_err(|e| StageGateError::Io(e.to_string()))?;
            write_txn
                .commit()
                .map_err(|e| StageGateError::Io(e.to_string()))?;
        }

        Ok(Self { db })
    }

    /// Number of stored projects.
    pub fn project_count(&self) -> Result<u64, StageGateError> {
        let read_txn = self
            .db
            .begin_read()
            .map_err(|e| StageGateError::Io(e.to_string()))?;
        let table = read_txn
            .open_table(PROJECTS)
            .map_err(|e| StageGateError::Io(e.to_string()))?;
        table.len().map_err(|e| StageGateError::Io(e.to_string()))
    }

    /// All records of one project in a tuple-keyed table.
    fn scan<T: DeserializeOwned>(
        &self,
        definition: TableDefinition<'static, (u64, u64), &'static [u8]>,
        project: ProjectId,
    ) -> Result<Vec<T>, StageGateError> {
        let read_txn = self
            .db
            .begin_read()
            .map_err(|e| StageGateError::Io(e.to_string()))?;
        let table = read_txn
            .open_table(definition)
            .map_err(|e| StageGateError::Io(e.to_string()))?;

        let mut records = Vec::new();
        for entry in table
            .range((project.0, 0u64)..=(project.0, u64::MAX))
            .map_err(|e| StageGateError::Io(e.to_string()))?
        {
            let (_, value) = entry.map_err(|e| StageGateError::Io(e.to_string()))?;
            records.push(decode(value.value())?);
        }
        Ok(records)
    }

    fn require_project(
        projects: &impl ReadableTable<u64, &'static [u8]>,
        id: ProjectId,
    ) -> Result<(), StageGateError> {
        let exists = projects
            .get(id.0)
            .map_err(|e| StageGateError::Io(e.to_string()))?
            .is_some();
        if exists {
            Ok(())
        } else {
            Err(StageGateError::ProjectNotFound(id))
        }
    }
}

impl WorkflowSources for RedbStore {
    fn documents(
        &self,
        project: ProjectId,
        category: &str,
    ) -> Result<Vec<Document>, StageGateError> {
        let documents: Vec<Document> = self.scan(DOCUMENTS, project)?;
        Ok(documents
            .into_iter()
            .filter(|d| d.category == category)
            .collect())
    }

    fn approvals(
        &self,
        project: ProjectId,
        stage: StageId,
    ) -> Result<Vec<ApprovalRequest>, StageGateError> {
        let approvals: Vec<ApprovalRequest> = self.scan(APPROVALS, project)?;
        Ok(approvals
            .into_iter()
            .filter(|a| a.stage_id == stage)
            .collect())
    }

    fn reviews(&self, project: ProjectId) -> Result<Vec<DepartmentReview>, StageGateError> {
        self.scan(REVIEWS, project)
    }
}

impl ProjectStore for RedbStore {
    fn project(&self, id: ProjectId) -> Result<Option<Project>, StageGateError> {
        let read_txn = self
            .db
            .begin_read()
            .map_err(|e| StageGateError::Io(e.to_string()))?;
        let table = read_txn
            .open_table(PROJECTS)
            .map_err(|e| StageGateError::Io(e.to_string()))?;
        match table
            .get(id.0)
            .map_err(|e| StageGateError::Io(e.to_string()))?
        {
            Some(data) => Ok(Some(decode(data.value())?)),
            None => Ok(None),
        }
    }

    fn save_project(&mut self, project: &Project) -> Result<(), StageGateError> {
        let bytes = encode(project)?;
        let write_txn = self
            .db
            .begin_write()
            .map_err(|e| StageGateError::Io(e.to_string()))?;
        {
            let mut table = write_txn
                .open_table(PROJECTS)
                .map_err(|e| StageGateError::Io(e.to_string()))?;
            table
                .insert(project.id.0, bytes.as_slice())
                .map_err(|e| StageGateError::Io(e.to_string()))?;
        }
        write_txn
            .commit()
            .map_err(|e| StageGateError::Io(e.to_string()))?;
        Ok(())
    }

    fn set_current_stage(&mut self, id: ProjectId, stage: StageId) -> Result<(), StageGateError> {
        let write_txn = self
            .db
            .begin_write()
            .map_err(|e| StageGateError::Io(e.to_string()))?;
        {
            let mut table = write_txn
                .open_table(PROJECTS)
                .map_err(|e| StageGateError::Io(e.to_string()))?;
            let mut project: Project = match table
                .get(id.0)
                .map_err(|e| StageGateError::Io(e.to_string()))?
            {
                Some(data) => decode(data.value())?,
                None => return Err(StageGateError::ProjectNotFound(id)),
            };
            project.current_stage_id = Some(stage);
            let bytes = encode(&project)?;
            table
                .insert(id.0, bytes.as_slice())
                .map_err(|e| StageGateError::Io(e.to_string()))?;
        }
        write_txn
            .commit()
            .map_err(|e| StageGateError::Io(e.to_string()))?;
        Ok(())
    }

    fn attach_document(
        &mut self,
        document: NewDocument,
        now: DateTime<Utc>,
    ) -> Result<Document, StageGateError> {
        document.validate()?;
        let write_txn = self
            .db
            .begin_write()
            .map_err(|e| StageGateError::Io(e.to_string()))?;
        let stored = {
            let projects = write_txn
                .open_table(PROJECTS)
                .map_err(|e| StageGateError::Io(e.to_string()))?;
            Self::require_project(&projects, document.project_id)?;
            let mut meta = write_txn
                .open_table(METADATA)
                .map_err(|e| StageGateError::Io(e.to_string()))?;
            let mut table = write_txn
                .open_table(DOCUMENTS)
                .map_err(|e| StageGateError::Io(e.to_string()))?;

            let id = DocumentId(bump(&mut meta, NEXT_DOCUMENT_ID)?);
            let stored = Document {
                id,
                project_id: document.project_id,
                category: document.category,
                file_name: document.file_name,
                uploaded_at: now,
            };
            let bytes = encode(&stored)?;
            table
                .insert((stored.project_id.0, id.0), bytes.as_slice())
                .map_err(|e| StageGateError::Io(e.to_string()))?;
            stored
        };
        write_txn
            .commit()
            .map_err(|e| StageGateError::Io(e.to_string()))?;
        Ok(stored)
    }

    fn request_approval(
        &mut self,
        approval: NewApproval,
        now: DateTime<Utc>,
    ) -> Result<ApprovalRequest, StageGateError> {
        let write_txn = self
            .db
            .begin_write()
            .map_err(|e| StageGateError::Io(e.to_string()))?;
        let request = {
            let projects = write_txn
                .open_table(PROJECTS)
                .map_err(|e| StageGateError::Io(e.to_string()))?;
            Self::require_project(&projects, approval.project_id)?;
            let mut meta = write_txn
                .open_table(METADATA)
                .map_err(|e| StageGateError::Io(e.to_string()))?;
            let mut table = write_txn
                .open_table(APPROVALS)
                .map_err(|e| StageGateError::Io(e.to_string()))?;
            let mut index = write_txn
                .open_table(APPROVAL_INDEX)
                .map_err(|e| StageGateError::Io(e.to_string()))?;

            let id = ApprovalId(bump(&mut meta, NEXT_APPROVAL_ID)?);
            let request = pending_request(id, approval, now);
            let bytes = encode(&request)?;
            table
                .insert((request.project_id.0, id.0), bytes.as_slice())
                .map_err(|e| StageGateError::Io(e.to_string()))?;
            index
                .insert(id.0, request.project_id.0)
                .map_err(|e| StageGateError::Io(e.to_string()))?;
            request
        };
        write_txn
            .commit()
            .map_err(|e| StageGateError::Io(e.to_string()))?;
        Ok(request)
    }

    fn decide_approval(
        &mut self,
        id: ApprovalId,
        status: ApprovalStatus,
        comment: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<ApprovalRequest, StageGateError> {
        let write_txn = self
            .db
            .begin_write()
            .map_err(|e| StageGateError::Io(e.to_string()))?;
        let request = {
            let index = write_txn
                .open_table(APPROVAL_INDEX)
                .map_err(|e| StageGateError::Io(e.to_string()))?;
            let project = index
                .get(id.0)
                .map_err(|e| StageGateError::Io(e.to_string()))?
                .map(|v| v.value())
                .ok_or_else(|| {
                    StageGateError::InvalidArgument(format!("approval {} does not exist", id.0))
                })?;

            let mut table = write_txn
                .open_table(APPROVALS)
                .map_err(|e| StageGateError::Io(e.to_string()))?;
            let mut request: ApprovalRequest = match table
                .get((project, id.0))
                .map_err(|e| StageGateError::Io(e.to_string()))?
            {
                Some(data) => decode(data.value())?,
                None => {
                    return Err(StageGateError::Persistence(format!(
                        "approval {} is indexed but missing",
                        id.0
                    )));
                }
            };
            apply_decision(&mut request, status, comment, now)?;
            let bytes = encode(&request)?;
            table
                .insert((project, id.0), bytes.as_slice())
                .map_err(|e| StageGateError::Io(e.to_string()))?;
            request
        };
        write_txn
            .commit()
            .map_err(|e| StageGateError::Io(e.to_string()))?;
        Ok(request)
    }

    fn add_review(
        &mut self,
        review: NewReview,
        now: DateTime<Utc>,
    ) -> Result<DepartmentReview, StageGateError> {
        review.validate()?;
        let write_txn = self
            .db
            .begin_write()
            .map_err(|e| StageGateError::Io(e.to_string()))?;
        let stored = {
            let projects = write_txn
                .open_table(PROJECTS)
                .map_err(|e| StageGateError::Io(e.to_string()))?;
            Self::require_project(&projects, review.project_id)?;
            let mut meta = write_txn
                .open_table(METADATA)
                .map_err(|e| StageGateError::Io(e.to_string()))?;
            let mut table = write_txn
                .open_table(REVIEWS)
                .map_err(|e| StageGateError::Io(e.to_string()))?;

            let id = ReviewId(bump(&mut meta, NEXT_REVIEW_ID)?);
            let stored = DepartmentReview {
                id,
                project_id: review.project_id,
                department: review.department,
                reviewer_id: review.reviewer_id,
                completed_at: now,
                notes: review.notes,
            };
            let bytes = encode(&stored)?;
            table
                .insert((stored.project_id.0, id.0), bytes.as_slice())
                .map_err(|e| StageGateError::Io(e.to_string()))?;
            stored
        };
        write_txn
            .commit()
            .map_err(|e| StageGateError::Io(e.to_string()))?;
        Ok(stored)
    }
}

impl HistoryStore for RedbStore {
    fn append_transition(
        &mut self,
        record: &TransitionRecord,
        now: DateTime<Utc>,
    ) -> Result<StageHistoryEntry, StageGateError> {
        let project = record.project_id;
        let write_txn = self
            .db
            .begin_write()
            .map_err(|e| StageGateError::Persistence(e.to_string()))?;
        let opened = {
            let mut history = write_txn
                .open_table(HISTORY)
                .map_err(|e| StageGateError::Persistence(e.to_string()))?;
            let mut open_entries = write_txn
                .open_table(OPEN_ENTRIES)
                .map_err(|e| StageGateError::Persistence(e.to_string()))?;
            let mut meta = write_txn
                .open_table(METADATA)
                .map_err(|e| StageGateError::Persistence(e.to_string()))?;

            let open_id = open_entries
                .get(project.0)
                .map_err(|e| StageGateError::Persistence(e.to_string()))?
                .map(|v| v.value());
            let open: Option<StageHistoryEntry> = match open_id {
                Some(entry_id) => match history
                    .get((project.0, entry_id))
                    .map_err(|e| StageGateError::Persistence(e.to_string()))?
                {
                    Some(data) => Some(decode(data.value())?),
                    None => {
                        return Err(StageGateError::Persistence(format!(
                            "open entry {} of {} is missing",
                            entry_id, project
                        )));
                    }
                },
                None => None,
            };

            let new_id = EntryId(bump(&mut meta, NEXT_ENTRY_ID)?);
            let (closed, opened) = advance_ledger(open, record, new_id, now);

            if let Some(closed) = closed {
                let bytes = encode(&closed)?;
                history
                    .insert((project.0, closed.id.0), bytes.as_slice())
                    .map_err(|e| StageGateError::Persistence(e.to_string()))?;
            }
            let bytes = encode(&opened)?;
            history
                .insert((project.0, new_id.0), bytes.as_slice())
                .map_err(|e| StageGateError::Persistence(e.to_string()))?;
            open_entries
                .insert(project.0, new_id.0)
                .map_err(|e| StageGateError::Persistence(e.to_string()))?;
            opened
        };
        write_txn
            .commit()
            .map_err(|e| StageGateError::Persistence(e.to_string()))?;
        Ok(opened)
    }

    fn entries(&self, project: ProjectId) -> Result<Vec<StageHistoryEntry>, StageGateError> {
        let mut entries: Vec<StageHistoryEntry> = self.scan(HISTORY, project)?;
        entries.sort_by(|a, b| a.entered_at.cmp(&b.entered_at).then(a.id.cmp(&b.id)));
        Ok(entries)
    }
}
