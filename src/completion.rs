//! Completion tracking and question-heading recap for one learner.
//!
//! Flow for a learner viewing the component:
//! 1. Load the learner's persisted state (completed or not)
//! 2. Optionally rewrite the target survey's headings with the learner's
//!    answers to the recap survey
//! 3. Check the submission store for a completion record
//!
//! Failures of SurveyMonkey or of the submission store are logged and turned
//! into their fallbacks (no rewrite, not completed); nothing here returns an
//! error to the learner-facing view.

use crate::models::{
    LearnerState, RecapAnswer, ResponseRecord, StudentItem, StudentViewContext, SURVEY_ITEM_TYPE,
};
use crate::settings::SurveyBlock;
use crate::stores::{HostPlatform, LearnerStateStore, SubmissionStore};
use crate::surveymonkey_client::{SurveyMonkeyClient, SurveyMonkeyConnector};
use regex::{Captures, Regex};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::OnceCell;

/// Shared collaborators every orchestrator needs.
#[derive(Clone)]
pub struct BlockServices {
    pub connector: SurveyMonkeyConnector,
    pub submissions: Arc<dyn SubmissionStore>,
    pub learner_states: Arc<dyn LearnerStateStore>,
    pub host: Arc<dyn HostPlatform>,
    pub lms_root_url: String,
}

/// `{lms_root}/courses/{course}/xblock/{usage}/handler/{name}`.
pub fn handler_url(lms_root_url: &str, block: &SurveyBlock, handler_name: &str) -> String {
    format!(
        "{}/courses/{}/xblock/{}/handler/{}",
        lms_root_url.trim_end_matches('/'),
        block.location.course_id,
        block.location.usage_key,
        handler_name
    )
}

/// Matches `{heading}` for any of the given recap headings, taken literally.
/// Longer headings are tried first so overlapping ones resolve the same way
/// on every call.
fn placeholder_pattern<'h>(headings: impl Iterator<Item = &'h str>) -> Option<Regex> {
    let mut headings: Vec<&str> = headings.collect();
    if headings.is_empty() {
        return None;
    }
    headings.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));
    let alternatives: Vec<String> = headings.into_iter().map(regex::escape).collect();

    let pattern = format!(r"\{{({})\}}", alternatives.join("|"));
    match Regex::new(&pattern) {
        Ok(regex) => Some(regex),
        Err(e) => {
            tracing::warn!("Could not build recap placeholder pattern: {}", e);
            None
        }
    }
}

/// Splices recap answers into heading templates.
///
/// Every `{question heading}` placeholder naming a recap question is replaced
/// by the learner's answer; unknown placeholders stay verbatim. Headings are
/// matched literally, braces included. When the recap survey repeats a
/// heading, the first answer wins. One heading per template, in template
/// order.
pub fn finalize_headings(templates: &[String], answers: &[RecapAnswer]) -> Vec<String> {
    let mut by_heading: HashMap<&str, &str> = HashMap::new();
    for answer in answers {
        by_heading
            .entry(answer.question_heading.as_str())
            .or_insert(answer.question_answer.as_str());
    }

    let Some(pattern) = placeholder_pattern(by_heading.keys().copied()) else {
        return templates.to_vec();
    };

    templates
        .iter()
        .map(|template| {
            pattern
                .replace_all(template, |caps: &Captures| match by_heading.get(&caps[1]) {
                    Some(answer) => answer.to_string(),
                    None => caps[0].to_string(),
                })
                .into_owned()
        })
        .collect()
}

/// First-page `{heading -> first answer}` pairs of one recap response.
///
/// Questions the learner left unanswered are skipped.
pub fn extract_recap_answers(record: &ResponseRecord) -> Vec<RecapAnswer> {
    let Some(page) = record.pages.first() else {
        return Vec::new();
    };

    page.questions
        .iter()
        .filter_map(|question| {
            let answer = question.answers.first()?;
            Some(RecapAnswer {
                page_id: page.id.clone(),
                question_id: question.id.clone(),
                question_heading: question.heading.clone(),
                question_answer: answer.simple_text.clone().unwrap_or_default(),
            })
        })
        .collect()
}

/// Completion state machine (`NOT_COMPLETED -> COMPLETED`) and recap logic
/// for one learner on one component instance.
pub struct CompletionOrchestrator<'a> {
    block: &'a SurveyBlock,
    services: &'a BlockServices,
    learner_id: String,
    state: LearnerState,
    api: OnceCell<Option<SurveyMonkeyClient>>,
}

impl<'a> CompletionOrchestrator<'a> {
    /// Loads the learner's persisted state. A failed load starts from
    /// "not completed".
    pub async fn load(
        block: &'a SurveyBlock,
        services: &'a BlockServices,
        learner_id: impl Into<String>,
    ) -> CompletionOrchestrator<'a> {
        let learner_id = learner_id.into();
        let state = services
            .learner_states
            .load(&learner_id, block.location.block_id())
            .await
            .unwrap_or_else(|e| {
                tracing::warn!(
                    "Could not load state of learner {} for block {}: {}",
                    learner_id,
                    block.location.block_id(),
                    e
                );
                LearnerState::default()
            });

        Self {
            block,
            services,
            learner_id,
            state,
            api: OnceCell::new(),
        }
    }

    pub fn learner_id(&self) -> &str {
        &self.learner_id
    }

    pub fn is_completed(&self) -> bool {
        self.state.completed_survey
    }

    pub fn student_item(&self) -> StudentItem {
        StudentItem {
            student_id: self.learner_id.clone(),
            course_id: self.block.location.course_id.clone(),
            item_id: self.block.location.block_id().to_string(),
            item_type: SURVEY_ITEM_TYPE.to_string(),
        }
    }

    /// Connects lazily; `None` when credentials are missing or rejected.
    async fn api(&self) -> Option<&SurveyMonkeyClient> {
        self.api
            .get_or_init(|| async {
                let credentials = self.block.settings.credentials()?;
                match self
                    .services
                    .connector
                    .connect(&credentials, self.block.settings.cache_duration())
                    .await
                {
                    Ok(api) => Some(api),
                    Err(e) => {
                        tracing::warn!(
                            "SurveyMonkey unavailable for block {}: {}",
                            self.block.location.block_id(),
                            e
                        );
                        None
                    }
                }
            })
            .await
            .as_ref()
    }

    /// Returns whether the learner completed the survey, moving to COMPLETED
    /// when the submission store holds a record for them.
    ///
    /// Once completed, no store is consulted again.
    pub async fn verify_completion(&mut self) -> bool {
        if self.state.completed_survey {
            return true;
        }

        let item = self.student_item();
        match self.services.submissions.get_submissions(&item).await {
            Ok(submissions) if !submissions.is_empty() => {
                self.state.completed_survey = true;
                tracing::info!(
                    "Learner {} completed survey block {}",
                    self.learner_id,
                    item.item_id
                );

                if let Err(e) = self
                    .services
                    .learner_states
                    .save(&self.learner_id, &item.item_id, &self.state)
                    .await
                {
                    tracing::warn!("Could not persist completion of {}: {}", self.learner_id, e);
                }

                let weight = self.block.settings.max_score();
                if let Err(e) = self.services.host.publish_grade(&item, weight, weight).await {
                    tracing::warn!("Could not publish grade for {}: {}", self.learner_id, e);
                }

                true
            }
            Ok(_) => false,
            Err(e) => {
                tracing::info!(
                    "Error getting submissions for the survey {} related to course {}: {}",
                    self.block.settings.survey_name.as_deref().unwrap_or_default(),
                    self.block.location.course_id,
                    e
                );
                false
            }
        }
    }

    /// Marks the survey complete for external courses once SurveyMonkey
    /// redirects the learner back with their tracking id.
    pub async fn record_confirmation(&self, anonymous_uid: &str) {
        let user = match self.services.host.get_real_user(anonymous_uid).await {
            Ok(user) => user,
            Err(e) => {
                tracing::warn!("Could not resolve learner {}: {}", anonymous_uid, e);
                return;
            }
        };

        if user.is_none() || !self.block.settings.is_for_external_course {
            return;
        }

        if let Err(e) = self
            .services
            .submissions
            .create_submission(&self.student_item(), json!({"survey_completed": true}))
            .await
        {
            tracing::info!(
                "Error creating a submission for the survey {} related to course {}: {}",
                self.block.settings.survey_name.as_deref().unwrap_or_default(),
                self.block.location.course_id,
                e
            );
        }
    }

    /// The learner's first-page answers to the recap survey.
    ///
    /// `None` when responses cannot be fetched or none carries the learner's
    /// tracking id. The first matching response wins.
    pub async fn previous_survey_answers(
        &self,
        api: &SurveyMonkeyClient,
        previous_survey_id: &str,
    ) -> Option<Vec<RecapAnswer>> {
        let responses = match api
            .get_survey_responses(previous_survey_id, &[("simple", "true")])
            .await
        {
            Ok(responses) => responses,
            Err(e) => {
                tracing::warn!(
                    "Could not fetch responses of recap survey {}: {}",
                    previous_survey_id,
                    e
                );
                return None;
            }
        };

        let record = responses
            .data
            .iter()
            .find(|record| record.uid() == Some(self.learner_id.as_str()))?;

        Some(extract_recap_answers(record))
    }

    /// Rewrites the target survey's first-page question headings from the
    /// operator's templates, by position. Extra templates are ignored.
    pub async fn overwrite_question_headings(&self) {
        let templates = self.block.settings.question_heading_templates();
        if templates.is_empty() {
            return;
        }

        let resolved = &self.block.resolved;
        let (Some(survey_id), Some(previous_survey_id)) =
            (&resolved.survey_id, &resolved.previous_survey_id)
        else {
            tracing::warn!(
                "Block {} has no survey or recap survey id, skipping heading overwrite",
                self.block.location.block_id()
            );
            return;
        };

        let Some(api) = self.api().await else {
            return;
        };

        let Some(answers) = self.previous_survey_answers(api, previous_survey_id).await else {
            tracing::debug!(
                "No recap response for learner {} in survey {}",
                self.learner_id,
                previous_survey_id
            );
            return;
        };

        let headings = finalize_headings(&templates, &answers);

        let details = match api
            .get_survey_details(survey_id, self.block.location.block_id())
            .await
        {
            Ok(details) => details,
            Err(e) => {
                tracing::warn!("Could not fetch details of survey {}: {}", survey_id, e);
                return;
            }
        };

        // Pagination is not supported by the API calls, so only the first page is used.
        let Some(page) = details.first_page() else {
            return;
        };

        for (heading, question) in headings.iter().zip(page.questions.iter()) {
            if let Err(e) = api
                .patch_question_heading(survey_id, &page.id, &question.id, heading)
                .await
            {
                tracing::warn!("Could not overwrite heading of question {}: {}", question.id, e);
            }
        }

        if headings.len() > page.questions.len() {
            tracing::debug!(
                "Survey {} has {} questions, ignoring {} extra headings",
                survey_id,
                page.questions.len(),
                headings.len() - page.questions.len()
            );
        }
    }

    /// Survey link for this learner, tagged with `uid` when tracking is on.
    pub fn survey_link(&self) -> Option<String> {
        let link = self.block.resolved.survey_link.as_deref()?;
        if !self.block.settings.trackable {
            return Some(link.to_string());
        }

        match url::Url::parse(link) {
            Ok(mut url) => {
                url.query_pairs_mut().append_pair("uid", &self.learner_id);
                Some(url.to_string())
            }
            Err(_) => Some(format!("{}?uid={}", link, self.learner_id)),
        }
    }

    /// Context rendered by the learner-facing view.
    pub async fn student_view_context(&mut self, author_mode: bool) -> StudentViewContext {
        let block = self.block;
        let settings = &block.settings;

        if settings.overwrite_survey_questions && !(author_mode || self.state.completed_survey) {
            self.overwrite_question_headings().await;
        }

        let completed_survey = if author_mode {
            true
        } else {
            self.verify_completion().await
        };

        StudentViewContext {
            title: settings.display_name.clone(),
            introductory_text: settings.introductory_text.clone(),
            text_link: settings.text_link.clone(),
            survey_link: self.survey_link(),
            completed_survey,
            completion_page: handler_url(&self.services.lms_root_url, block, "completion"),
            inline_survey_view: settings.inline_survey_view,
            is_for_external_course: settings.is_for_external_course,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ResponseAnswer, ResponsePage, ResponseQuestion};

    fn recap(heading: &str, answer: &str) -> RecapAnswer {
        RecapAnswer {
            page_id: "p1".to_string(),
            question_id: format!("q-{}", heading),
            question_heading: heading.to_string(),
            question_answer: answer.to_string(),
        }
    }

    #[test]
    fn test_placeholder_replaced_by_answer() {
        let headings = finalize_headings(&["Score: {Q1}".to_string()], &[recap("Q1", "5")]);
        assert_eq!(headings, vec!["Score: 5".to_string()]);
    }

    #[test]
    fn test_unknown_placeholder_left_verbatim() {
        let headings = finalize_headings(&["Score: {Q1}".to_string()], &[]);
        assert_eq!(headings, vec!["Score: {Q1}".to_string()]);
    }

    #[test]
    fn test_multiple_placeholders_and_first_answer_wins() {
        let templates = vec![
            "You said {Colour} and {Animal}, {Colour} again".to_string(),
            "Plain heading".to_string(),
        ];
        let answers = vec![
            recap("Colour", "blue"),
            recap("Animal", "otter"),
            recap("Colour", "red"),
        ];

        assert_eq!(
            finalize_headings(&templates, &answers),
            vec![
                "You said blue and otter, blue again".to_string(),
                "Plain heading".to_string()
            ]
        );
    }

    #[test]
    fn test_heading_with_braces_is_matched_literally() {
        let templates = vec![
            "You said {Rate us {1-5}}".to_string(),
            "Cost {$ (USD)?} and {1-5}".to_string(),
        ];
        let answers = vec![recap("Rate us {1-5}", "4"), recap("$ (USD)?", "10")];

        assert_eq!(
            finalize_headings(&templates, &answers),
            vec!["You said 4".to_string(), "Cost 10 and {1-5}".to_string()]
        );
    }

    #[test]
    fn test_extract_skips_unanswered_questions() {
        let record = ResponseRecord {
            id: "r1".to_string(),
            custom_variables: HashMap::new(),
            pages: vec![ResponsePage {
                id: "p1".to_string(),
                questions: vec![
                    ResponseQuestion {
                        id: "q1".to_string(),
                        heading: "Q1".to_string(),
                        answers: vec![ResponseAnswer {
                            simple_text: Some("5".to_string()),
                            ..ResponseAnswer::default()
                        }],
                    },
                    ResponseQuestion {
                        id: "q2".to_string(),
                        heading: "Q2".to_string(),
                        answers: vec![],
                    },
                ],
            }],
        };

        let answers = extract_recap_answers(&record);
        assert_eq!(answers.len(), 1);
        assert_eq!(answers[0].question_heading, "Q1");
        assert_eq!(answers[0].question_answer, "5");
        assert_eq!(answers[0].page_id, "p1");
    }

    #[test]
    fn test_extract_without_pages() {
        assert!(extract_recap_answers(&ResponseRecord::default()).is_empty());
    }
}
