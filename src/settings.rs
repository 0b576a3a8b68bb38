//! Operator configuration of one survey component instance.

use crate::models::{BlockLocation, ResolvedSurvey};
use crate::surveymonkey_client::{Credentials, SurveyMonkeyConnector};
use crate::validation::{self, ValidationReport};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Placeholder text shown in a fresh component. Leaving it untouched means
/// no heading templates are configured.
pub const DEFAULT_QUESTION_HEADINGS_TEXT: &str = "SurveyMonkey question heading one.\r\n
        SurveyMonkey question heading two.\r\n
        Split every question in a new line.\r\n
        If you want to recap the user's response from a previous survey,\r\n
        just add the heading of the question you want to recap embraced by {question to recap}.\r\n";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BlockSettings {
    pub display_name: String,
    pub survey_name: Option<String>,
    pub text_link: String,
    pub trackable: bool,
    pub introductory_text: String,
    pub weight: f64,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub inline_survey_view: bool,
    pub is_for_external_course: bool,
    pub overwrite_survey_questions: bool,
    pub previous_survey_name: Option<String>,
    pub overwritten_question_headings: String,
    pub surveymonkey_api_cache_duration: u64,
}

impl Default for BlockSettings {
    fn default() -> Self {
        Self {
            display_name: "SurveyMonkey".to_string(),
            survey_name: None,
            text_link: "Complete the Survey".to_string(),
            trackable: false,
            introductory_text: String::new(),
            weight: 1.0,
            client_id: None,
            client_secret: None,
            inline_survey_view: false,
            is_for_external_course: false,
            overwrite_survey_questions: false,
            previous_survey_name: None,
            overwritten_question_headings: DEFAULT_QUESTION_HEADINGS_TEXT.to_string(),
            surveymonkey_api_cache_duration: 86_400,
        }
    }
}

impl BlockSettings {
    pub fn credentials(&self) -> Option<Credentials> {
        match (&self.client_id, &self.client_secret) {
            (Some(id), Some(secret)) => Some(Credentials::new(id.clone(), secret.clone())),
            _ => None,
        }
    }

    pub fn cache_duration(&self) -> Duration {
        Duration::from_secs(self.surveymonkey_api_cache_duration)
    }

    /// Heading templates, one per non-blank line.
    ///
    /// Empty when overwriting is disabled or the placeholder text is unchanged.
    pub fn question_heading_templates(&self) -> Vec<String> {
        if !self.overwrite_survey_questions
            || self.overwritten_question_headings == DEFAULT_QUESTION_HEADINGS_TEXT
        {
            return Vec::new();
        }

        self.overwritten_question_headings
            .split(['\n', '\r'])
            .filter(|line| !line.trim().is_empty())
            .map(str::to_string)
            .collect()
    }

    /// Points the component is worth.
    pub fn max_score(&self) -> f64 {
        self.weight
    }

    /// Copy safe to hand back to operators: a configured secret reads as empty.
    pub fn redacted(&self) -> Self {
        Self {
            client_secret: self.client_secret.as_ref().map(|_| String::new()),
            ..self.clone()
        }
    }
}

/// A component instance: where it lives, what the operator configured and
/// what was resolved against SurveyMonkey when it was saved.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SurveyBlock {
    pub location: BlockLocation,
    pub settings: BlockSettings,
    #[serde(default)]
    pub resolved: ResolvedSurvey,
}

impl SurveyBlock {
    /// The block with its settings redacted, for responses.
    pub fn redacted(&self) -> Self {
        Self {
            settings: self.settings.redacted(),
            ..self.clone()
        }
    }
}

/// One editable field as presented to operators.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldDescriptor {
    pub name: &'static str,
    pub display_name: &'static str,
    pub help: &'static str,
}

/// Settings that operators edit and that must validate before being saved.
#[async_trait]
pub trait EditableSettings {
    fn describe_fields() -> Vec<FieldDescriptor>;

    async fn validate(
        &self,
        connector: &SurveyMonkeyConnector,
        location: &BlockLocation,
    ) -> ValidationReport;
}

#[async_trait]
impl EditableSettings for BlockSettings {
    fn describe_fields() -> Vec<FieldDescriptor> {
        vec![
            FieldDescriptor {
                name: "display_name",
                display_name: "Display Name",
                help: "Enter the name that students see for this component.",
            },
            FieldDescriptor {
                name: "survey_name",
                display_name: "SurveyMonkey Name",
                help: "Enter the survey name.",
            },
            FieldDescriptor {
                name: "text_link",
                display_name: "Text Link",
                help: "Enter the text that will be shown instead of the url.",
            },
            FieldDescriptor {
                name: "trackable",
                display_name: "User Tracking",
                help: "Make true if you want to track the survey using the user_id.",
            },
            FieldDescriptor {
                name: "introductory_text",
                display_name: "Introductory Text",
                help: "This contains an introductory text which is displayed to the student above the survey link.",
            },
            FieldDescriptor {
                name: "weight",
                display_name: "Score",
                help: "Defines the number of points each problem is worth.",
            },
            FieldDescriptor {
                name: "client_id",
                display_name: "Client ID",
                help: "Your public identifier for your surveymonkey app",
            },
            FieldDescriptor {
                name: "client_secret",
                display_name: "Client Secret",
                help: "It is a secret known only to the application and the authorization server.",
            },
            FieldDescriptor {
                name: "inline_survey_view",
                display_name: "Inline survey view",
                help: "True if you want to show the survey as a course content, otherwise it will show the external link to the survey.",
            },
            FieldDescriptor {
                name: "is_for_external_course",
                display_name: "External course",
                help: "True if the survey is for an external course.",
            },
            FieldDescriptor {
                name: "overwrite_survey_questions",
                display_name: "Overwrite survey questions.",
                help: "True if you want to overwrite the questions of the survey with the headings passed to Question headings setting.",
            },
            FieldDescriptor {
                name: "previous_survey_name",
                display_name: "Previous survey name.",
                help: "The previous survey name to recap the responses.",
            },
            FieldDescriptor {
                name: "overwritten_question_headings",
                display_name: "Question headings.",
                help: "Write the questions to overwrite the headings of the SurveyMonkey questions.",
            },
            FieldDescriptor {
                name: "surveymonkey_api_cache_duration",
                display_name: "SurveyMonkey API cache duration.",
                help: "Specify the time in seconds to caching the results of the SurveyMonkey API. If you set to 0 the cache will be deleted and you could reach the maximum SurveyMonkey API calls.",
            },
        ]
    }

    async fn validate(
        &self,
        connector: &SurveyMonkeyConnector,
        location: &BlockLocation,
    ) -> ValidationReport {
        validation::validate_settings(self, connector, location).await
    }
}
