use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use uuid::Uuid;

/// Collector type whose url is embedded in the unit.
pub const WEBLINK_COLLECTOR: &str = "weblink";

/// `item_type` recorded on every submission created for this component.
pub const SURVEY_ITEM_TYPE: &str = "surveymonkey";

// ============ SurveyMonkey API Models ============

/// Paged list envelope returned by the SurveyMonkey list endpoints.
///
/// Only the first page is ever read; pagination is not followed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListEnvelope<T> {
    #[serde(default = "Vec::new")]
    pub data: Vec<T>,
    #[serde(default)]
    pub per_page: Option<u32>,
    #[serde(default)]
    pub page: Option<u32>,
    #[serde(default)]
    pub total: Option<u32>,
}

impl<T> Default for ListEnvelope<T> {
    fn default() -> Self {
        Self {
            data: Vec::new(),
            per_page: None,
            page: None,
            total: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Survey {
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub href: Option<String>,
}

/// A survey's distribution channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Collector {
    pub id: String,
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub survey_id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
}

impl Collector {
    pub fn is_weblink(&self) -> bool {
        self.kind == WEBLINK_COLLECTOR
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SurveyDetails {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub pages: Vec<SurveyPage>,
}

impl SurveyDetails {
    /// Only the first page is ever consulted.
    pub fn first_page(&self) -> Option<&SurveyPage> {
        self.pages.first()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SurveyPage {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub questions: Vec<SurveyQuestion>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SurveyQuestion {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub headings: Vec<QuestionHeading>,
}

impl SurveyQuestion {
    pub fn heading(&self) -> Option<&str> {
        self.headings.first().map(|h| h.heading.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QuestionHeading {
    #[serde(default)]
    pub heading: String,
}

/// PATCH body for `/v3/surveys/{id}/pages/{page_id}/questions/{question_id}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuestionHeadingPatch {
    pub headings: Vec<QuestionHeading>,
}

impl QuestionHeadingPatch {
    pub fn new(heading: impl Into<String>) -> Self {
        Self {
            headings: vec![QuestionHeading {
                heading: heading.into(),
            }],
        }
    }
}

/// One respondent's submission as returned by the bulk responses endpoints.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResponseRecord {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub custom_variables: HashMap<String, Value>,
    #[serde(default)]
    pub pages: Vec<ResponsePage>,
}

impl ResponseRecord {
    /// Tracking identifier carried as the `uid` query parameter of the survey link.
    pub fn uid(&self) -> Option<&str> {
        self.custom_variables.get("uid").and_then(Value::as_str)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResponsePage {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub questions: Vec<ResponseQuestion>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResponseQuestion {
    #[serde(default)]
    pub id: String,
    /// Present when responses are requested with `simple=true`.
    #[serde(default)]
    pub heading: String,
    #[serde(default)]
    pub answers: Vec<ResponseAnswer>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResponseAnswer {
    #[serde(default)]
    pub simple_text: Option<String>,
    #[serde(default)]
    pub choice_id: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
}

pub type ResponseSet = ListEnvelope<ResponseRecord>;

/// OAuth2 token endpoint response.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub token_type: Option<String>,
}

// ============ Recap Models ============

/// A learner's answer to one question of the recap survey.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecapAnswer {
    pub page_id: String,
    pub question_id: String,
    pub question_heading: String,
    pub question_answer: String,
}

// ============ Submission / Learner Models ============

/// Identifies one learner's attempt at one component instance.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StudentItem {
    pub student_id: String,
    pub course_id: String,
    pub item_id: String,
    pub item_type: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Submission {
    pub uuid: Uuid,
    pub student_item: StudentItem,
    pub answer: Value,
    pub created_at: DateTime<Utc>,
}

/// Per-learner mutable record for one component instance.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LearnerState {
    pub completed_survey: bool,
}

/// Where a component instance lives in the course.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockLocation {
    pub course_id: String,
    pub usage_key: String,
}

impl BlockLocation {
    pub fn new(course_id: impl Into<String>, usage_key: impl Into<String>) -> Self {
        Self {
            course_id: course_id.into(),
            usage_key: usage_key.into(),
        }
    }

    /// Block id is the last `@`-separated segment of the usage key.
    pub fn block_id(&self) -> &str {
        self.usage_key
            .rsplit('@')
            .next()
            .unwrap_or(self.usage_key.as_str())
    }
}

/// Survey data resolved against SurveyMonkey when settings are saved.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResolvedSurvey {
    pub survey_id: Option<String>,
    pub survey_link: Option<String>,
    pub collector_id: Option<String>,
    pub previous_survey_id: Option<String>,
}

// ============ View Models ============

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StudentViewContext {
    pub title: String,
    pub introductory_text: String,
    pub text_link: String,
    pub survey_link: Option<String>,
    pub completed_survey: bool,
    pub completion_page: String,
    pub inline_survey_view: bool,
    pub is_for_external_course: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionPage {
    pub course_id: String,
    pub completed_survey: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfirmationPage {
    pub completed_survey: bool,
    pub course_link: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionStatus {
    pub completed: bool,
}

/// Query string accepted by the learner-facing handlers.
#[derive(Debug, Clone, Deserialize)]
pub struct HandlerQuery {
    pub uid: Option<String>,
    #[serde(default)]
    pub author_mode: bool,
}
