//! Settings validation against SurveyMonkey.
//!
//! Runs when an operator saves a component: checks the credentials, resolves
//! the configured survey names to ids and picks the weblink collector whose
//! url is embedded for learners. Every problem becomes an operator-facing
//! message; any message blocks the save.

use crate::errors::ResultExt;
use crate::models::{BlockLocation, Collector, ResolvedSurvey, Survey};
use crate::settings::BlockSettings;
use crate::surveymonkey_client::{SurveyMonkeyClient, SurveyMonkeyConnector};
use serde::Serialize;
use std::fmt;

/// One operator-facing problem found while validating.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationMessage {
    pub text: String,
}

impl ValidationMessage {
    pub fn error(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }
}

/// Messages gathered while validating, plus whatever was resolved on the way.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ValidationReport {
    pub messages: Vec<ValidationMessage>,
    pub resolved: ResolvedSurvey,
}

impl ValidationReport {
    /// Any message blocks the save.
    pub fn is_valid(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn add(&mut self, message: ValidationMessage) {
        tracing::info!("Settings validation: {}", message.text);
        self.messages.push(message);
    }

    pub fn message_texts(&self) -> Vec<String> {
        self.messages.iter().map(|m| m.text.clone()).collect()
    }
}

/// Why no survey could be picked for a configured name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SurveyLookupError {
    Missing(String),
    Ambiguous(String),
}

impl fmt::Display for SurveyLookupError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SurveyLookupError::Missing(name) => write!(f, "{} survey does not exist.", name),
            SurveyLookupError::Ambiguous(name) => {
                write!(f, "There are two or more surveys with the {} name.", name)
            }
        }
    }
}

/// Why no collector link could be picked for a survey.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectorSelectionError {
    NoCollectors,
    NoWeblinkCollector,
}

impl fmt::Display for CollectorSelectionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CollectorSelectionError::NoCollectors => {
                write!(f, "The survey must have at least one defined collector.")
            }
            CollectorSelectionError::NoWeblinkCollector => write!(
                f,
                "The survey must have at least one weblink defined collector."
            ),
        }
    }
}

/// Exactly one survey must carry `name` as its title.
pub fn match_survey_by_title<'a>(
    surveys: &'a [Survey],
    name: &str,
) -> Result<&'a Survey, SurveyLookupError> {
    let mut matching = surveys.iter().filter(|survey| survey.title == name);

    match (matching.next(), matching.next()) {
        (Some(survey), None) => Ok(survey),
        (Some(_), Some(_)) => Err(SurveyLookupError::Ambiguous(name.to_string())),
        (None, _) => Err(SurveyLookupError::Missing(name.to_string())),
    }
}

/// First collector of type `weblink` wins.
pub fn pick_weblink_collector(
    collectors: &[Collector],
) -> Result<&Collector, CollectorSelectionError> {
    if collectors.is_empty() {
        return Err(CollectorSelectionError::NoCollectors);
    }

    collectors
        .iter()
        .find(|collector| collector.is_weblink())
        .ok_or(CollectorSelectionError::NoWeblinkCollector)
}

/// Resolves a survey title to its id.
///
/// A failed listing counts as "no surveys": the upstream error is logged and
/// the operator sees the "does not exist" message.
pub async fn resolve_survey_id(
    api: &SurveyMonkeyClient,
    name: &str,
) -> Result<String, SurveyLookupError> {
    let surveys = api
        .list_surveys(&[("title", name)])
        .await
        .unwrap_or_else(|e| {
            tracing::warn!("Listing surveys titled '{}' failed: {}", name, e);
            Vec::new()
        });

    match_survey_by_title(&surveys, name).map(|survey| survey.id.clone())
}

/// Looks up the survey's collectors and returns the chosen weblink collector.
pub async fn resolve_survey_link(
    api: &SurveyMonkeyClient,
    survey_id: &str,
    cache_scope_id: &str,
) -> Result<Collector, CollectorSelectionError> {
    let collectors = api
        .list_collectors(
            survey_id,
            cache_scope_id,
            &[("include", "url,type,survey_id")],
        )
        .await
        .unwrap_or_else(|e| {
            tracing::warn!("Listing collectors of survey {} failed: {}", survey_id, e);
            Vec::new()
        });

    pick_weblink_collector(&collectors).cloned()
}

/// Validates `settings` and resolves the survey ids and link to persist.
pub async fn validate_settings(
    settings: &BlockSettings,
    connector: &SurveyMonkeyConnector,
    location: &BlockLocation,
) -> ValidationReport {
    let mut report = ValidationReport::default();

    if settings.weight < 0.0 {
        report.add(ValidationMessage::error(
            "Score must be greater than or equal to 0.",
        ));
    }

    let Some(credentials) = settings.credentials() else {
        report.add(ValidationMessage::error(
            "Invalid client id or client secret",
        ));
        return report;
    };

    let api = match connector
        .connect(&credentials, settings.cache_duration())
        .await
        .context(format!("Connecting client {}", credentials.client_id))
    {
        Ok(api) => api,
        Err(e) if e.is_invalid_credentials() => {
            report.add(ValidationMessage::error(
                "Invalid client id or client secret",
            ));
            return report;
        }
        Err(e) => {
            tracing::error!("Could not connect to SurveyMonkey: {}", e);
            report.add(ValidationMessage::error(
                "SurveyMonkey could not be reached, try again later.",
            ));
            return report;
        }
    };

    let survey_name = settings.survey_name.as_deref().unwrap_or_default();
    let survey_id = match resolve_survey_id(&api, survey_name).await {
        Ok(id) => id,
        Err(e) => {
            report.add(ValidationMessage::error(e.to_string()));
            return report;
        }
    };
    report.resolved.survey_id = Some(survey_id.clone());

    match resolve_survey_link(&api, &survey_id, location.block_id()).await {
        Ok(collector) => {
            report.resolved.survey_link = collector.url;
            report.resolved.collector_id = Some(collector.id);
        }
        Err(e) => report.add(ValidationMessage::error(e.to_string())),
    }

    if settings.overwrite_survey_questions {
        let previous_name = settings.previous_survey_name.as_deref().unwrap_or_default();
        match resolve_survey_id(&api, previous_name).await {
            Ok(id) => report.resolved.previous_survey_id = Some(id),
            Err(e) => report.add(ValidationMessage::error(e.to_string())),
        }
    }

    report
}
