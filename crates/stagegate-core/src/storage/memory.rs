//! In-memory store. Deterministic iteration via BTreeMap.

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
use std::collections::BTreeMap;

/// Volatile store for tests, the CLI's `--backend memory` and embedding.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    projects: BTreeMap<ProjectId, Project>,
    documents: BTreeMap<(ProjectId, DocumentId), Document>,
    approvals: BTreeMap<ApprovalId, ApprovalRequest>,
    reviews: BTreeMap<(ProjectId, ReviewId), DepartmentReview>,
    history: BTreeMap<(ProjectId, EntryId), StageHistoryEntry>,
    /// Uniqueness index: the one open entry per project.
    open_entries: BTreeMap<ProjectId, EntryId>,
    next_document_id: u64,
    next_approval_id: u64,
    next_review_id: u64,
    next_entry_id: u64,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn require_project(&self, id: ProjectId) -> Result<(), StageGateError> {
        if self.projects.contains_key(&id) {
            Ok(())
        } else {
            Err(StageGateError::ProjectNotFound(id))
        }
    }
}

fn next(counter: &mut u64) -> u64 {
    *counter = counter.saturating_add(1);
    *counter
}

impl WorkflowSources for MemoryStore {
    fn documents(
        &self,
        project: ProjectId,
        category: &str,
    ) -> Result<Vec<Document>, StageGateError> {
        Ok(self
            .documents
            .range((project, DocumentId(0))..=(project, DocumentId(u64::MAX)))
            .map(|(_, d)| d)
            .filter(|d| d.category == category)
            .cloned()
            .collect())
    }

    fn approvals(
        &self,
        project: ProjectId,
        stage: StageId,
    ) -> Result<Vec<ApprovalRequest>, StageGateError> {
        Ok(self
            .approvals
            .values()
            .filter(|a| a.project_id == project && a.stage_id == stage)
            .cloned()
            .collect())
    }

    fn reviews(&self, project: ProjectId) -> Result<Vec<DepartmentReview>, StageGateError> {
        Ok(self
            .reviews
            .range((project, ReviewId(0))..=(project, ReviewId(u64::MAX)))
            .map(|(_, r)| r.clone())
            .collect())
    }
}

impl ProjectStore for MemoryStore {
    fn project(&self, id: ProjectId) -> Result<Option<Project>, StageGateError> {
        Ok(self.projects.get(&id).cloned())
    }

    fn save_project(&mut self, project: &Project) -> Result<(), StageGateError> {
        self.projects.insert(project.id, project.clone());
        Ok(())
    }

    fn set_current_stage(&mut self, id: ProjectId, stage: StageId) -> Result<(), StageGateError> {
        let project = self
            .projects
            .get_mut(&id)
            .ok_or(StageGateError::ProjectNotFound(id))?;
        project.current_stage_id = Some(stage);
        Ok(())
    }

    fn attach_document(
        &mut self,
        document: NewDocument,
        now: DateTime<Utc>,
    ) -> Result<Document, StageGateError> {
        document.validate()?;
        self.require_project(document.project_id)?;
        let id = DocumentId(next(&mut self.next_document_id));
        let stored = Document {
            id,
            project_id: document.project_id,
            category: document.category,
            file_name: document.file_name,
            uploaded_at: now,
        };
        self.documents
            .insert((stored.project_id, id), stored.clone());
        Ok(stored)
    }

    fn request_approval(
        &mut self,
        approval: NewApproval,
        now: DateTime<Utc>,
    ) -> Result<ApprovalRequest, StageGateError> {
        self.require_project(approval.project_id)?;
        let id = ApprovalId(next(&mut self.next_approval_id));
        let request = pending_request(id, approval, now);
        self.approvals.insert(id, request.clone());
        Ok(request)
    }

    fn decide_approval(
        &mut self,
        id: ApprovalId,
        status: ApprovalStatus,
        comment: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<ApprovalRequest, StageGateError> {
        let request = self.approvals.get_mut(&id).ok_or_else(|| {
            StageGateError::InvalidArgument(format!("approval {} does not exist", id.0))
        })?;
        apply_decision(request, status, comment, now)?;
        Ok(request.clone())
    }

    fn add_review(
        &mut self,
        review: NewReview,
        now: DateTime<Utc>,
    ) -> Result<DepartmentReview, StageGateError> {
        review.validate()?;
        self.require_project(review.project_id)?;
        let id = ReviewId(next(&mut self.next_review_id));
        let stored = DepartmentReview {
            id,
            project_id: review.project_id,
            department: review.department,
            reviewer_id: review.reviewer_id,
            completed_at: now,
            notes: review.notes,
        };
        self.reviews.insert((stored.project_id, id), stored.clone());
        Ok(stored)
    }
}

impl HistoryStore for MemoryStore {
    fn append_transition(
        &mut self,
        record: &TransitionRecord,
        now: DateTime<Utc>,
    ) -> Result<StageHistoryEntry, StageGateError> {
        let project = record.project_id;
        let open = match self.open_entries.get(&project) {
            Some(entry_id) => Some(
                self.history
                    .get(&(project, *entry_id))
                    .cloned()
                    .ok_or_else(|| {
                        StageGateError::Persistence(format!(
                            "open entry {} of {} is missing",
                            entry_id.0, project
                        ))
                    })?,
            ),
            None => None,
        };

        let new_id = EntryId(next(&mut self.next_entry_id));
        let (closed, opened) = advance_ledger(open, record, new_id, now);

        if let Some(closed) = closed {
            self.history.insert((project, closed.id), closed);
        }
        self.history.insert((project, new_id), opened.clone());
        self.open_entries.insert(project, new_id);
        Ok(opened)
    }

    fn entries(&self, project: ProjectId) -> Result<Vec<StageHistoryEntry>, StageGateError> {
        let mut entries: Vec<_> = self
            .history
            .range((project, EntryId(0))..=(project, EntryId(u64::MAX)))
            .map(|(_, e)| e.clone())
            .collect();
        entries.sort_by(|a, b| a.entered_at.cmp(&b.entered_at).then(a.id.cmp(&b.id)));
        Ok(entries)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::UserId;
    use chrono::{Duration, TimeZone};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 6, 1, 9, 30, 0).unwrap()
    }

    #[test]
    fn writes_need_an_existing_project() {
        let mut store = MemoryStore::new();
        let result = store.attach_document(
            NewDocument {
                project_id: ProjectId(9),
                category: "rfq".to_string(),
                file_name: "rfq.pdf".to_string(),
            },
            now(),
        );
        assert!(matches!(result, Err(StageGateError::ProjectNotFound(_))));
        assert!(store.set_current_stage(ProjectId(9), StageId(1)).is_err());
    }

    #[test]
    fn documents_filtered_by_project_and_category() {
        let mut store = MemoryStore::new();
        for id in [1, 2] {
            store
                .save_project(&Project::new(ProjectId(id), "p"))
                .unwrap();
        }
        for (project, category) in [(1, "rfq"), (1, "bom"), (2, "rfq")] {
            store
                .attach_document(
                    NewDocument {
                        project_id: ProjectId(project),
                        category: category.to_string(),
                        file_name: "f.pdf".to_string(),
                    },
                    now(),
                )
                .unwrap();
        }
        assert_eq!(store.documents(ProjectId(1), "rfq").unwrap().len(), 1);
        assert_eq!(store.documents(ProjectId(2), "bom").unwrap().len(), 0);
    }

    #[test]
    fn only_one_open_entry_per_project() {
        let mut store = MemoryStore::new();
        let record = |from: Option<u64>, to: u64| TransitionRecord {
            project_id: ProjectId(1),
            from_stage_id: from.map(StageId),
            to_stage_id: StageId(to),
            user_id: UserId(1),
            reason: Some("next".to_string()),
            bypass_required: false,
            bypass_reason: None,
        };
        store.append_transition(&record(None, 1), now()).unwrap();
        store
            .append_transition(&record(Some(1), 2), now() + Duration::hours(3))
            .unwrap();

        let entries = store.entries(ProjectId(1)).unwrap();
        assert_eq!(entries.iter().filter(|e| e.is_open()).count(), 1);
        assert_eq!(entries[0].duration_minutes, Some(180));
        assert_eq!(entries[0].exit_reason.as_deref(), Some("next"));
    }
}
