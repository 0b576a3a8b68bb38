//! Seams to the collaborators owned by the host platform: submission records,
//! per-learner state and learner/course lookups.
//!
//! Postgres implementations live in `db_storage`; the in-memory ones here are
//! used by tests and local runs.

use crate::errors::AppError;
use crate::models::{LearnerState, StudentItem, Submission};
use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

/// External record of learner submissions.
#[async_trait]
pub trait SubmissionStore: Send + Sync {
    /// Submissions for the item, newest first.
    async fn get_submissions(&self, item: &StudentItem) -> Result<Vec<Submission>, AppError>;

    async fn create_submission(
        &self,
        item: &StudentItem,
        answer: Value,
    ) -> Result<Submission, AppError>;
}

/// Per-learner persisted fields, keyed by `(learner_id, block_id)`.
#[async_trait]
pub trait LearnerStateStore: Send + Sync {
    async fn load(&self, learner_id: &str, block_id: &str) -> Result<LearnerState, AppError>;

    async fn save(
        &self,
        learner_id: &str,
        block_id: &str,
        state: &LearnerState,
    ) -> Result<(), AppError>;
}

/// Learner identity, course and grade callbacks of the host platform.
#[async_trait]
pub trait HostPlatform: Send + Sync {
    /// Resolves an anonymous learner id to the real user id, if known.
    async fn get_real_user(&self, anonymous_id: &str) -> Result<Option<String>, AppError>;

    /// Link to the external course target configured for the course.
    async fn external_course_target(&self, course_id: &str) -> Result<Option<String>, AppError>;

    async fn publish_grade(
        &self,
        item: &StudentItem,
        weight: f64,
        max_weight: f64,
    ) -> Result<(), AppError>;
}

#[derive(Default)]
pub struct InMemorySubmissionStore {
    submissions: RwLock<Vec<Submission>>,
}

impl InMemorySubmissionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SubmissionStore for InMemorySubmissionStore {
    async fn get_submissions(&self, item: &StudentItem) -> Result<Vec<Submission>, AppError> {
        let submissions = self.submissions.read().await;
        let mut matching: Vec<Submission> = submissions
            .iter()
            .filter(|s| &s.student_item == item)
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(matching)
    }

    async fn create_submission(
        &self,
        item: &StudentItem,
        answer: Value,
    ) -> Result<Submission, AppError> {
        let submission = Submission {
            uuid: Uuid::new_v4(),
            student_item: item.clone(),
            answer,
            created_at: Utc::now(),
        };
        self.submissions.write().await.push(submission.clone());
        Ok(submission)
    }
}

#[derive(Default)]
pub struct InMemoryLearnerStateStore {
    states: RwLock<HashMap<(String, String), LearnerState>>,
}

impl InMemoryLearnerStateStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LearnerStateStore for InMemoryLearnerStateStore {
    async fn load(&self, learner_id: &str, block_id: &str) -> Result<LearnerState, AppError> {
        let states = self.states.read().await;
        Ok(states
            .get(&(learner_id.to_string(), block_id.to_string()))
            .cloned()
            .unwrap_or_default())
    }

    async fn save(
        &self,
        learner_id: &str,
        block_id: &str,
        state: &LearnerState,
    ) -> Result<(), AppError> {
        self.states
            .write()
            .await
            .insert((learner_id.to_string(), block_id.to_string()), state.clone());
        Ok(())
    }
}
