//! SurveyMonkey course component service.
//!
//! Embeds a SurveyMonkey survey in a course unit: validates operator settings
//! against the SurveyMonkey API, tracks learner completion through the
//! submission store and can rewrite survey question headings with a learner's
//! answers to an earlier survey.
//!
//! # Modules
//!
//! - `cache`: TTL cache for tokens and metadata lookups.
//! - `completion`: Completion tracking and question-heading recap.
//! - `config`: Configuration management.
//! - `db`: Database connection, pool and migrations.
//! - `db_storage`: Postgres stores for blocks, submissions and learner state.
//! - `errors`: Error handling types.
//! - `handlers`: HTTP request handlers.
//! - `models`: SurveyMonkey payloads and domain models.
//! - `settings`: Operator-editable block settings.
//! - `stores`: Store traits and in-memory implementations.
//! - `surveymonkey_client`: SurveyMonkey API client.
//! - `validation`: Settings validation against SurveyMonkey.

pub mod cache;
pub mod completion;
pub mod config;
pub mod db;
pub mod db_storage;
pub mod errors;
pub mod handlers;
pub mod models;
pub mod settings;
pub mod stores;
pub mod surveymonkey_client;
pub mod validation;
