use crate::errors::{AppError, ResultExt};
use crate::models::{BlockLocation, LearnerState, ResolvedSurvey, StudentItem, Submission};
use crate::settings::{BlockSettings, SurveyBlock};
use crate::stores::{HostPlatform, LearnerStateStore, SubmissionStore};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::types::Json;
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

#[derive(Debug, FromRow)]
struct SubmissionRow {
    uuid: Uuid,
    student_id: String,
    course_id: String,
    item_id: String,
    item_type: String,
    answer: Json<Value>,
    created_at: DateTime<Utc>,
}

impl From<SubmissionRow> for Submission {
    fn from(row: SubmissionRow) -> Self {
        Submission {
            uuid: row.uuid,
            student_item: StudentItem {
                student_id: row.student_id,
                course_id: row.course_id,
                item_id: row.item_id,
                item_type: row.item_type,
            },
            answer: row.answer.0,
            created_at: row.created_at,
        }
    }
}

#[derive(Debug, FromRow)]
struct BlockRow {
    usage_key: String,
    course_id: String,
    settings: Json<BlockSettings>,
    survey_id: Option<String>,
    survey_link: Option<String>,
    collector_id: Option<String>,
    previous_survey_id: Option<String>,
}

impl From<BlockRow> for SurveyBlock {
    fn from(row: BlockRow) -> Self {
        SurveyBlock {
            location: BlockLocation::new(row.course_id, row.usage_key),
            settings: row.settings.0,
            resolved: ResolvedSurvey {
                survey_id: row.survey_id,
                survey_link: row.survey_link,
                collector_id: row.collector_id,
                previous_survey_id: row.previous_survey_id,
            },
        }
    }
}

/// Submission records in `survey_embed.submissions`.
pub struct PgSubmissionStore {
    pool: PgPool,
}

impl PgSubmissionStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SubmissionStore for PgSubmissionStore {
    async fn get_submissions(&self, item: &StudentItem) -> Result<Vec<Submission>, AppError> {
        let rows = sqlx::query_as::<_, SubmissionRow>(
            r#"
            SELECT uuid, student_id, course_id, item_id, item_type, answer, created_at
            FROM survey_embed.submissions
            WHERE student_id = $1 AND course_id = $2 AND item_id = $3 AND item_type = $4
            ORDER BY created_at DESC
            "#,
        )
        .bind(&item.student_id)
        .bind(&item.course_id)
        .bind(&item.item_id)
        .bind(&item.item_type)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::SubmissionStore(e.to_string()))?;

        Ok(rows.into_iter().map(Submission::from).collect())
    }

    async fn create_submission(
        &self,
        item: &StudentItem,
        answer: Value,
    ) -> Result<Submission, AppError> {
        let row = sqlx::query_as::<_, SubmissionRow>(
            r#"
            INSERT INTO survey_embed.submissions
                (uuid, student_id, course_id, item_id, item_type, answer)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING uuid, student_id, course_id, item_id, item_type, answer, created_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(&item.student_id)
        .bind(&item.course_id)
        .bind(&item.item_id)
        .bind(&item.item_type)
        .bind(Json(answer))
        .fetch_one(&self.pool)
        .await
        .map_err(|e| AppError::SubmissionStore(e.to_string()))?;

        tracing::info!(
            "Created submission {} for {} on {}",
            row.uuid,
            row.student_id,
            row.item_id
        );
        Ok(row.into())
    }
}

/// Per-learner fields in `survey_embed.learner_states`.
pub struct PgLearnerStateStore {
    pool: PgPool,
}

impl PgLearnerStateStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl LearnerStateStore for PgLearnerStateStore {
    async fn load(&self, learner_id: &str, block_id: &str) -> Result<LearnerState, AppError> {
        let completed: Option<bool> = sqlx::query_scalar(
            "SELECT completed_survey FROM survey_embed.learner_states WHERE learner_id = $1 AND block_id = $2",
        )
        .bind(learner_id)
        .bind(block_id)
        .fetch_optional(&self.pool)
        .await
        .context("Loading learner state")?;

        Ok(LearnerState {
            completed_survey: completed.unwrap_or(false),
        })
    }

    async fn save(
        &self,
        learner_id: &str,
        block_id: &str,
        state: &LearnerState,
    ) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO survey_embed.learner_states (learner_id, block_id, completed_survey)
            VALUES ($1, $2, $3)
            ON CONFLICT (learner_id, block_id)
            DO UPDATE SET completed_survey = EXCLUDED.completed_survey, updated_at = NOW()
            "#,
        )
        .bind(learner_id)
        .bind(block_id)
        .bind(state.completed_survey)
        .execute(&self.pool)
        .await
        .context("Saving learner state")?;

        Ok(())
    }
}

/// Learner identity, course and grade tables shared with the LMS.
pub struct PgHostPlatform {
    pool: PgPool,
}

impl PgHostPlatform {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl HostPlatform for PgHostPlatform {
    async fn get_real_user(&self, anonymous_id: &str) -> Result<Option<String>, AppError> {
        let user_id: Option<String> = sqlx::query_scalar(
            "SELECT user_id FROM survey_embed.anonymous_user_ids WHERE anonymous_user_id = $1",
        )
        .bind(anonymous_id)
        .fetch_optional(&self.pool)
        .await
        .context("Resolving anonymous user id")?;

        Ok(user_id)
    }

    async fn external_course_target(&self, course_id: &str) -> Result<Option<String>, AppError> {
        let target: Option<Option<String>> = sqlx::query_scalar(
            "SELECT external_course_target FROM survey_embed.courses WHERE course_id = $1",
        )
        .bind(course_id)
        .fetch_optional(&self.pool)
        .await
        .context("Loading course")?;

        Ok(target.flatten())
    }

    async fn publish_grade(
        &self,
        item: &StudentItem,
        weight: f64,
        max_weight: f64,
    ) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO survey_embed.grades (student_id, course_id, item_id, weight, max_weight)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (student_id, course_id, item_id)
            DO UPDATE SET weight = EXCLUDED.weight,
                          max_weight = EXCLUDED.max_weight,
                          published_at = NOW()
            "#,
        )
        .bind(&item.student_id)
        .bind(&item.course_id)
        .bind(&item.item_id)
        .bind(weight)
        .bind(max_weight)
        .execute(&self.pool)
        .await
        .context("Publishing grade")?;

        tracing::info!(
            "Published grade {}/{} for {} on {}",
            weight,
            max_weight,
            item.student_id,
            item.item_id
        );
        Ok(())
    }
}

/// Component instances in `survey_embed.blocks`.
pub struct BlockStorage {
    pool: PgPool,
}

impl BlockStorage {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn load_block(&self, usage_key: &str) -> Result<Option<SurveyBlock>, AppError> {
        let row = sqlx::query_as::<_, BlockRow>(
            r#"
            SELECT usage_key, course_id, settings, survey_id, survey_link,
                   collector_id, previous_survey_id
            FROM survey_embed.blocks
            WHERE usage_key = $1
            "#,
        )
        .bind(usage_key)
        .fetch_optional(&self.pool)
        .await
        .context("Loading survey block")?;

        Ok(row.map(SurveyBlock::from))
    }

    pub async fn save_block(&self, block: &SurveyBlock) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO survey_embed.blocks
                (usage_key, course_id, settings, survey_id, survey_link,
                 collector_id, previous_survey_id)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (usage_key)
            DO UPDATE SET course_id = EXCLUDED.course_id,
                          settings = EXCLUDED.settings,
                          survey_id = EXCLUDED.survey_id,
                          survey_link = EXCLUDED.survey_link,
                          collector_id = EXCLUDED.collector_id,
                          previous_survey_id = EXCLUDED.previous_survey_id,
                          updated_at = NOW()
            "#,
        )
        .bind(&block.location.usage_key)
        .bind(&block.location.course_id)
        .bind(Json(&block.settings))
        .bind(&block.resolved.survey_id)
        .bind(&block.resolved.survey_link)
        .bind(&block.resolved.collector_id)
        .bind(&block.resolved.previous_survey_id)
        .execute(&self.pool)
        .await
        .context("Saving survey block")?;

        tracing::info!("Saved survey block {}", block.location.usage_key);
        Ok(())
    }
}
