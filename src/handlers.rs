use crate::completion::{BlockServices, CompletionOrchestrator};
use crate::db_storage::BlockStorage;
use crate::errors::AppError;
use crate::models::{
    BlockLocation, CompletionPage, CompletionStatus, ConfirmationPage, HandlerQuery,
    StudentViewContext,
};
use crate::settings::{BlockSettings, EditableSettings, SurveyBlock};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde_json::json;
use sqlx::PgPool;
use std::sync::Arc;

/// Shared application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    /// Database connection pool.
    pub db: PgPool,
    /// SurveyMonkey connector and host-platform stores used by every block.
    pub services: BlockServices,
    /// Persisted component instances.
    pub blocks: Arc<BlockStorage>,
}

/// Health check endpoint.
pub async fn health(State(state): State<Arc<AppState>>) -> (StatusCode, Json<serde_json::Value>) {
    let database = match sqlx::query("SELECT 1").execute(&state.db).await {
        Ok(_) => "up",
        Err(e) => {
            tracing::warn!("Health check database probe failed: {}", e);
            "down"
        }
    };

    (
        StatusCode::OK,
        Json(json!({
            "status": "healthy",
            "service": "survey-embed",
            "version": env!("CARGO_PKG_VERSION"),
            "database": database
        })),
    )
}

async fn load_block(
    state: &AppState,
    course_id: &str,
    usage_key: &str,
) -> Result<SurveyBlock, AppError> {
    let block = state
        .blocks
        .load_block(usage_key)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Survey block {} not found", usage_key)))?;

    if block.location.course_id != course_id {
        return Err(AppError::NotFound(format!(
            "Survey block {} not found in course {}",
            usage_key, course_id
        )));
    }

    Ok(block)
}

fn require_uid(query: &HandlerQuery) -> Result<&str, AppError> {
    query
        .uid
        .as_deref()
        .filter(|uid| !uid.trim().is_empty())
        .ok_or_else(|| AppError::BadRequest("uid query parameter required".to_string()))
}

/// GET /courses/:course_id/xblock/:usage_key/handler/completion
///
/// Page SurveyMonkey redirects learners to once they finish the survey.
pub async fn completion(
    State(state): State<Arc<AppState>>,
    Path((course_id, usage_key)): Path<(String, String)>,
    Query(query): Query<HandlerQuery>,
) -> Result<Json<CompletionPage>, AppError> {
    let uid = require_uid(&query)?;
    tracing::info!("GET completion - block: {}, learner: {}", usage_key, uid);

    let block = load_block(&state, &course_id, &usage_key).await?;
    let mut orchestrator = CompletionOrchestrator::load(&block, &state.services, uid).await;
    let completed_survey = orchestrator.verify_completion().await;

    Ok(Json(CompletionPage {
        course_id: block.location.course_id.clone(),
        completed_survey,
    }))
}

/// GET /courses/:course_id/xblock/:usage_key/handler/confirmation
///
/// Records completion for surveys of external courses, then points the
/// learner back to the course.
pub async fn confirmation(
    State(state): State<Arc<AppState>>,
    Path((course_id, usage_key)): Path<(String, String)>,
    Query(query): Query<HandlerQuery>,
) -> Result<Json<ConfirmationPage>, AppError> {
    let uid = require_uid(&query)?;
    tracing::info!("GET confirmation - block: {}, learner: {}", usage_key, uid);

    let block = load_block(&state, &course_id, &usage_key).await?;
    let mut orchestrator = CompletionOrchestrator::load(&block, &state.services, uid).await;
    orchestrator.record_confirmation(uid).await;
    let completed_survey = orchestrator.verify_completion().await;

    let course_link = state
        .services
        .host
        .external_course_target(&block.location.course_id)
        .await
        .unwrap_or_else(|e| {
            tracing::warn!(
                "Could not load external target of course {}: {}",
                block.location.course_id,
                e
            );
            None
        });

    Ok(Json(ConfirmationPage {
        completed_survey,
        course_link,
    }))
}

/// GET /courses/:course_id/xblock/:usage_key/handler/verify_completion
pub async fn verify_completion(
    State(state): State<Arc<AppState>>,
    Path((course_id, usage_key)): Path<(String, String)>,
    Query(query): Query<HandlerQuery>,
) -> Result<Json<CompletionStatus>, AppError> {
    let uid = require_uid(&query)?;

    let block = load_block(&state, &course_id, &usage_key).await?;
    let mut orchestrator = CompletionOrchestrator::load(&block, &state.services, uid).await;
    let completed = orchestrator.verify_completion().await;

    tracing::info!(
        "GET verify_completion - block: {}, learner: {}, completed: {}",
        usage_key,
        uid,
        completed
    );

    Ok(Json(CompletionStatus { completed }))
}

/// GET /courses/:course_id/xblock/:usage_key/student_view
pub async fn student_view(
    State(state): State<Arc<AppState>>,
    Path((course_id, usage_key)): Path<(String, String)>,
    Query(query): Query<HandlerQuery>,
) -> Result<Json<StudentViewContext>, AppError> {
    let uid = require_uid(&query)?;
    tracing::info!(
        "GET student_view - block: {}, learner: {}, author_mode: {}",
        usage_key,
        uid,
        query.author_mode
    );

    let block = load_block(&state, &course_id, &usage_key).await?;
    let mut orchestrator = CompletionOrchestrator::load(&block, &state.services, uid).await;
    let context = orchestrator.student_view_context(query.author_mode).await;

    Ok(Json(context))
}

/// GET /courses/:course_id/xblock/:usage_key/settings
///
/// Editable fields plus the current values. The client secret is never echoed.
pub async fn get_settings(
    State(state): State<Arc<AppState>>,
    Path((course_id, usage_key)): Path<(String, String)>,
) -> Result<Json<serde_json::Value>, AppError> {
    tracing::info!("GET settings - block: {}", usage_key);

    let settings = match load_block(&state, &course_id, &usage_key).await {
        Ok(block) => block.settings.redacted(),
        Err(AppError::NotFound(_)) => BlockSettings::default(),
        Err(e) => return Err(e),
    };

    Ok(Json(json!({
        "fields": BlockSettings::describe_fields(),
        "settings": settings,
    })))
}

/// PUT /courses/:course_id/xblock/:usage_key/settings
///
/// Validates against SurveyMonkey and saves the settings together with the
/// resolved survey ids and link. Any validation message rejects the save.
/// The stored block is echoed back without its client secret.
pub async fn put_settings(
    State(state): State<Arc<AppState>>,
    Path((course_id, usage_key)): Path<(String, String)>,
    Json(settings): Json<BlockSettings>,
) -> Result<Json<SurveyBlock>, AppError> {
    tracing::info!("PUT settings - block: {}", usage_key);

    let location = BlockLocation::new(course_id, usage_key);
    let report = settings
        .validate(&state.services.connector, &location)
        .await;

    if !report.is_valid() {
        tracing::warn!(
            "Rejected settings of block {}: {:?}",
            location.usage_key,
            report.message_texts()
        );
        return Err(AppError::ValidationFailed(report.message_texts()));
    }

    let block = SurveyBlock {
        location,
        settings,
        resolved: report.resolved,
    };
    state.blocks.save_block(&block).await?;

    Ok(Json(block.redacted()))
}
