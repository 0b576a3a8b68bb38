/// Completion tracking and heading recap against in-memory stores and a mocked SurveyMonkey
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use survey_embed::cache::MokaApiCache;
use survey_embed::completion::{BlockServices, CompletionOrchestrator};
use survey_embed::errors::AppError;
use survey_embed::models::{BlockLocation, ResolvedSurvey, StudentItem, Submission};
use survey_embed::settings::{BlockSettings, SurveyBlock};
use survey_embed::stores::{
    HostPlatform, InMemoryLearnerStateStore, InMemorySubmissionStore, SubmissionStore,
};
use survey_embed::surveymonkey_client::SurveyMonkeyConnector;
use wiremock::matchers::{body_json, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const LEARNER: &str = "anon-1";

#[derive(Default)]
struct RecordingHost {
    users: HashMap<String, String>,
    external_target: Option<String>,
    grades: Mutex<Vec<(StudentItem, f64, f64)>>,
}

impl RecordingHost {
    fn grades(&self) -> Vec<(StudentItem, f64, f64)> {
        self.grades.lock().unwrap().clone()
    }
}

#[async_trait]
impl HostPlatform for RecordingHost {
    async fn get_real_user(&self, anonymous_id: &str) -> Result<Option<String>, AppError> {
        Ok(self.users.get(anonymous_id).cloned())
    }

    async fn external_course_target(&self, _course_id: &str) -> Result<Option<String>, AppError> {
        Ok(self.external_target.clone())
    }

    async fn publish_grade(
        &self,
        item: &StudentItem,
        weight: f64,
        max_weight: f64,
    ) -> Result<(), AppError> {
        self.grades
            .lock()
            .unwrap()
            .push((item.clone(), weight, max_weight));
        Ok(())
    }
}

/// Delegates to an in-memory store and counts lookups.
#[derive(Default)]
struct CountingSubmissions {
    inner: InMemorySubmissionStore,
    lookups: AtomicUsize,
}

#[async_trait]
impl SubmissionStore for CountingSubmissions {
    async fn get_submissions(&self, item: &StudentItem) -> Result<Vec<Submission>, AppError> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        self.inner.get_submissions(item).await
    }

    async fn create_submission(
        &self,
        item: &StudentItem,
        answer: Value,
    ) -> Result<Submission, AppError> {
        self.inner.create_submission(item, answer).await
    }
}

struct FailingSubmissions;

#[async_trait]
impl SubmissionStore for FailingSubmissions {
    async fn get_submissions(&self, _item: &StudentItem) -> Result<Vec<Submission>, AppError> {
        Err(AppError::SubmissionStore("connection refused".to_string()))
    }

    async fn create_submission(
        &self,
        _item: &StudentItem,
        _answer: Value,
    ) -> Result<Submission, AppError> {
        Err(AppError::SubmissionStore("connection refused".to_string()))
    }
}

fn services(
    base_url: &str,
    submissions: Arc<dyn SubmissionStore>,
    host: Arc<RecordingHost>,
) -> BlockServices {
    BlockServices {
        connector: SurveyMonkeyConnector::new(base_url, Arc::new(MokaApiCache::new())).unwrap(),
        submissions,
        learner_states: Arc::new(InMemoryLearnerStateStore::new()),
        host,
        lms_root_url: "https://lms.example.com/".to_string(),
    }
}

fn block(settings: BlockSettings) -> SurveyBlock {
    SurveyBlock {
        location: BlockLocation::new(
            "course-v1:Org+CS101+2024",
            "block-v1:Org+CS101+2024+type@surveymonkey+block@b1",
        ),
        settings,
        resolved: ResolvedSurvey {
            survey_id: Some("100".to_string()),
            survey_link: Some("https://www.surveymonkey.com/r/ABC".to_string()),
            collector_id: Some("c1".to_string()),
            previous_survey_id: Some("200".to_string()),
        },
    }
}

fn recap_settings(headings: &str) -> BlockSettings {
    BlockSettings {
        survey_name: Some("Exit Poll".to_string()),
        client_id: Some("client-1".to_string()),
        client_secret: Some("secret-1".to_string()),
        overwrite_survey_questions: true,
        previous_survey_name: Some("Entry Poll".to_string()),
        overwritten_question_headings: headings.to_string(),
        ..BlockSettings::default()
    }
}

async fn mount_token(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/oauth/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "test-token",
            "token_type": "bearer"
        })))
        .mount(server)
        .await;
}

async fn mount_recap_responses(server: &MockServer, responses: Value) {
    Mock::given(method("GET"))
        .and(path("/v3/surveys/200/responses/bulk"))
        .and(query_param("simple", "true"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "data": responses })))
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_extra_templates_are_ignored() {
    let server = MockServer::start().await;
    mount_token(&server).await;
    mount_recap_responses(
        &server,
        json!([
            {"id": "r0", "custom_variables": {"uid": "someone-else"}, "pages": []},
            {
                "id": "r1",
                "custom_variables": {"uid": LEARNER},
                "pages": [{
                    "id": "rp1",
                    "questions": [
                        {"id": "a1", "heading": "Colour", "answers": [{"simple_text": "blue"}]},
                        {"id": "a2", "heading": "Animal", "answers": [{"simple_text": "otter"}]}
                    ]
                }]
            }
        ]),
    )
    .await;
    Mock::given(method("GET"))
        .and(path("/v3/surveys/100/details"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "100",
            "pages": [{"id": "p1", "questions": [{"id": "q1"}, {"id": "q2"}]}]
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("PATCH"))
        .and(path("/v3/surveys/100/pages/p1/questions/q1"))
        .and(body_json(json!({"headings": [{"heading": "You picked blue"}]})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("PATCH"))
        .and(path("/v3/surveys/100/pages/p1/questions/q2"))
        .and(body_json(json!({"headings": [{"heading": "otter or {Plant}?"}]})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .expect(1)
        .mount(&server)
        .await;

    let block = block(recap_settings(
        "You picked {Colour}\n\n{Animal} or {Plant}?\nNever used",
    ));
    let services = services(
        &server.uri(),
        Arc::new(InMemorySubmissionStore::new()),
        Arc::new(RecordingHost::default()),
    );

    let orchestrator = CompletionOrchestrator::load(&block, &services, LEARNER).await;
    orchestrator.overwrite_question_headings().await;

    let patched: Vec<String> = server
        .received_requests()
        .await
        .unwrap()
        .iter()
        .filter(|request| request.method.to_string() == "PATCH")
        .map(|request| request.url.path().to_string())
        .collect();
    assert_eq!(
        patched,
        vec![
            "/v3/surveys/100/pages/p1/questions/q1".to_string(),
            "/v3/surveys/100/pages/p1/questions/q2".to_string()
        ]
    );
}

#[tokio::test]
async fn test_no_recap_response_means_no_patch() {
    let server = MockServer::start().await;
    mount_token(&server).await;
    mount_recap_responses(
        &server,
        json!([{"id": "r0", "custom_variables": {"uid": "someone-else"}, "pages": []}]),
    )
    .await;
    Mock::given(method("GET"))
        .and(path("/v3/surveys/100/details"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "100", "pages": []})))
        .expect(0)
        .mount(&server)
        .await;
    Mock::given(method("PATCH"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let block = block(recap_settings("You picked {Colour}"));
    let services = services(
        &server.uri(),
        Arc::new(InMemorySubmissionStore::new()),
        Arc::new(RecordingHost::default()),
    );

    let mut orchestrator = CompletionOrchestrator::load(&block, &services, LEARNER).await;
    let context = orchestrator.student_view_context(false).await;

    assert!(!context.completed_survey);
}

#[tokio::test]
async fn test_default_heading_text_skips_surveymonkey() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let mut settings = recap_settings("");
    settings.overwritten_question_headings = BlockSettings::default().overwritten_question_headings;
    let block = block(settings);
    let services = services(
        &server.uri(),
        Arc::new(InMemorySubmissionStore::new()),
        Arc::new(RecordingHost::default()),
    );

    CompletionOrchestrator::load(&block, &services, LEARNER)
        .await
        .overwrite_question_headings()
        .await;
}

#[tokio::test]
async fn test_verify_completion_transitions_once() {
    let submissions = Arc::new(CountingSubmissions::default());
    let host = Arc::new(RecordingHost::default());
    let services = services("http://127.0.0.1:9", submissions.clone(), host.clone());
    let block = block(BlockSettings {
        weight: 2.0,
        ..BlockSettings::default()
    });

    let mut orchestrator = CompletionOrchestrator::load(&block, &services, LEARNER).await;
    assert!(!orchestrator.verify_completion().await);
    assert!(host.grades().is_empty());

    submissions
        .create_submission(&orchestrator.student_item(), json!({"survey_completed": true}))
        .await
        .unwrap();

    assert!(orchestrator.verify_completion().await);
    assert!(orchestrator.verify_completion().await);
    assert_eq!(submissions.lookups.load(Ordering::SeqCst), 2);

    let grades = host.grades();
    assert_eq!(grades.len(), 1);
    assert_eq!(grades[0].0.item_id, "b1");
    assert_eq!(grades[0].0.item_type, "surveymonkey");
    assert_eq!((grades[0].1, grades[0].2), (2.0, 2.0));

    // Completion is persisted: a fresh load starts COMPLETED without a lookup.
    let mut reloaded = CompletionOrchestrator::load(&block, &services, LEARNER).await;
    assert!(reloaded.is_completed());
    assert!(reloaded.verify_completion().await);
    assert_eq!(submissions.lookups.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_submission_store_failure_reads_as_not_completed() {
    let host = Arc::new(RecordingHost::default());
    let services = services("http://127.0.0.1:9", Arc::new(FailingSubmissions), host.clone());
    let block = block(BlockSettings::default());

    let mut orchestrator = CompletionOrchestrator::load(&block, &services, LEARNER).await;
    assert!(!orchestrator.verify_completion().await);
    assert!(!orchestrator.is_completed());
    assert!(host.grades().is_empty());
}

#[tokio::test]
async fn test_confirmation_for_external_course() {
    let host = Arc::new(RecordingHost {
        users: HashMap::from([(LEARNER.to_string(), "user-1".to_string())]),
        external_target: Some("https://external.example/course".to_string()),
        ..RecordingHost::default()
    });
    let submissions = Arc::new(InMemorySubmissionStore::new());
    let services = services("http://127.0.0.1:9", submissions.clone(), host);
    let block = block(BlockSettings {
        is_for_external_course: true,
        ..BlockSettings::default()
    });

    let mut orchestrator = CompletionOrchestrator::load(&block, &services, LEARNER).await;
    orchestrator.record_confirmation(LEARNER).await;

    let recorded = submissions
        .get_submissions(&orchestrator.student_item())
        .await
        .unwrap();
    assert_eq!(recorded.len(), 1);
    assert_eq!(recorded[0].answer, json!({"survey_completed": true}));
    assert!(orchestrator.verify_completion().await);
}

#[tokio::test]
async fn test_confirmation_ignored_for_internal_course_or_unknown_user() {
    let host = Arc::new(RecordingHost {
        users: HashMap::from([(LEARNER.to_string(), "user-1".to_string())]),
        ..RecordingHost::default()
    });
    let submissions = Arc::new(InMemorySubmissionStore::new());
    let services = services("http://127.0.0.1:9", submissions.clone(), host);

    let internal = block(BlockSettings::default());
    let orchestrator = CompletionOrchestrator::load(&internal, &services, LEARNER).await;
    orchestrator.record_confirmation(LEARNER).await;
    assert!(submissions
        .get_submissions(&orchestrator.student_item())
        .await
        .unwrap()
        .is_empty());

    let external = block(BlockSettings {
        is_for_external_course: true,
        ..BlockSettings::default()
    });
    let stranger = CompletionOrchestrator::load(&external, &services, "anon-unknown").await;
    stranger.record_confirmation("anon-unknown").await;
    assert!(submissions
        .get_submissions(&stranger.student_item())
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn test_author_view_context() {
    let submissions = Arc::new(CountingSubmissions::default());
    let services = services(
        "http://127.0.0.1:9",
        submissions.clone(),
        Arc::new(RecordingHost::default()),
    );
    let block = block(BlockSettings {
        display_name: "Exit survey".to_string(),
        trackable: true,
        ..BlockSettings::default()
    });

    let mut orchestrator = CompletionOrchestrator::load(&block, &services, LEARNER).await;
    let context = orchestrator.student_view_context(true).await;

    assert!(context.completed_survey);
    assert_eq!(context.title, "Exit survey");
    assert_eq!(
        context.survey_link.as_deref(),
        Some("https://www.surveymonkey.com/r/ABC?uid=anon-1")
    );
    assert_eq!(
        context.completion_page,
        "https://lms.example.com/courses/course-v1:Org+CS101+2024/xblock/block-v1:Org+CS101+2024+type@surveymonkey+block@b1/handler/completion"
    );
    assert_eq!(submissions.lookups.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_untracked_link_is_unchanged() {
    let services = services(
        "http://127.0.0.1:9",
        Arc::new(InMemorySubmissionStore::new()),
        Arc::new(RecordingHost::default()),
    );
    let block = block(BlockSettings::default());

    let orchestrator = CompletionOrchestrator::load(&block, &services, LEARNER).await;
    assert_eq!(
        orchestrator.survey_link().as_deref(),
        Some("https://www.surveymonkey.com/r/ABC")
    );
}

async fn mount_learner_recap(server: &MockServer) {
    mount_recap_responses(
        server,
        json!([{
            "id": "r1",
            "custom_variables": {"uid": LEARNER},
            "pages": [{
                "id": "rp1",
                "questions": [{"id": "a1", "heading": "Colour", "answers": [{"simple_text": "blue"}]}]
            }]
        }]),
    )
    .await;
}

async fn overwrite_with_details(details: ResponseTemplate) -> MockServer {
    let server = MockServer::start().await;
    mount_token(&server).await;
    mount_learner_recap(&server).await;
    Mock::given(method("GET"))
        .and(path("/v3/surveys/100/details"))
        .respond_with(details)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("PATCH"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .expect(0)
        .mount(&server)
        .await;

    let block = block(recap_settings("You picked {Colour}"));
    let services = services(
        &server.uri(),
        Arc::new(InMemorySubmissionStore::new()),
        Arc::new(RecordingHost::default()),
    );

    CompletionOrchestrator::load(&block, &services, LEARNER)
        .await
        .overwrite_question_headings()
        .await;

    server
}

#[tokio::test]
async fn test_survey_without_pages_is_left_alone() {
    let server = overwrite_with_details(
        ResponseTemplate::new(200).set_body_json(json!({"id": "100", "pages": []})),
    )
    .await;

    let requests = server.received_requests().await.unwrap();
    assert!(requests
        .iter()
        .all(|request| request.method.to_string() != "PATCH"));
}

#[tokio::test]
async fn test_failed_details_lookup_is_left_alone() {
    let server = overwrite_with_details(ResponseTemplate::new(500).set_body_string("boom")).await;

    let requests = server.received_requests().await.unwrap();
    assert!(requests
        .iter()
        .any(|request| request.url.path() == "/v3/surveys/100/details"));
    assert!(requests
        .iter()
        .all(|request| request.method.to_string() != "PATCH"));
}
