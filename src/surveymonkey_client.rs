use crate::cache::{cache_key, credentials_digest, ApiCache, ValidatedCacheEntry};
use crate::errors::AppError;
use crate::models::{
    Collector, ListEnvelope, QuestionHeadingPatch, ResponseSet, Survey, SurveyDetails,
    TokenResponse,
};
use reqwest::header::AUTHORIZATION;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Default lifetime of cached tokens and metadata lookups (24h).
pub const DEFAULT_CACHE_DURATION: Duration = Duration::from_secs(86_400);

/// Query-string filters passed through to SurveyMonkey list endpoints.
pub type Filters<'a> = &'a [(&'a str, &'a str)];

/// OAuth2 client credentials of a SurveyMonkey app.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub client_id: String,
    pub client_secret: String,
}

impl Credentials {
    pub fn new(client_id: impl Into<String>, client_secret: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: client_secret.into(),
        }
    }
}

/// Opens authenticated SurveyMonkey clients that share one HTTP pool and cache.
#[derive(Clone)]
pub struct SurveyMonkeyConnector {
    http: reqwest::Client,
    base_url: String,
    cache: Arc<dyn ApiCache>,
}

impl SurveyMonkeyConnector {
    pub fn new(base_url: impl Into<String>, cache: Arc<dyn ApiCache>) -> Result<Self, AppError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| {
                AppError::ExternalApiError(format!("Failed to create SurveyMonkey client: {}", e))
            })?;

        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            cache,
        })
    }

    /// Authenticates (or reuses a cached bearer token) and returns a ready client.
    ///
    /// A zero `cache_duration` evicts any cached token and fetches a fresh one.
    pub async fn connect(
        &self,
        credentials: &Credentials,
        cache_duration: Duration,
    ) -> Result<SurveyMonkeyClient, AppError> {
        let key = cache_key(
            "token",
            &credentials.client_id,
            &credentials_digest(&credentials.client_id, &credentials.client_secret),
        );

        let authorization = if cache_duration.is_zero() {
            self.cache.delete(&key).await;
            self.authenticate(credentials).await?
        } else if let Some(cached) = self
            .cache
            .get(&key)
            .await
            .and_then(|raw| ValidatedCacheEntry::deserialize_and_validate(&raw))
        {
            tracing::debug!(
                "SurveyMonkey token cache HIT for client {}",
                credentials.client_id
            );
            cached
        } else {
            let authorization = self.authenticate(credentials).await?;
            self.cache
                .set(
                    &key,
                    ValidatedCacheEntry::new(authorization.clone()).serialize(),
                    cache_duration,
                )
                .await;
            authorization
        };

        Ok(SurveyMonkeyClient {
            http: self.http.clone(),
            base_url: self.base_url.clone(),
            client_id: credentials.client_id.clone(),
            authorization,
            cache: Arc::clone(&self.cache),
            cache_duration,
        })
    }

    /// OAuth2 client-credentials exchange against `/oauth/token`.
    ///
    /// Returns the value for the `Authorization` header.
    async fn authenticate(&self, credentials: &Credentials) -> Result<String, AppError> {
        let url = format!("{}/oauth/token", self.base_url);
        tracing::info!(
            "Authenticating SurveyMonkey client {}",
            credentials.client_id
        );

        let response = self
            .http
            .post(&url)
            .basic_auth(&credentials.client_id, Some(&credentials.client_secret))
            .form(&[("grant_type", "client_credentials")])
            .send()
            .await
            .map_err(|e| {
                AppError::ExternalApiError(format!("SurveyMonkey token request failed: {}", e))
            })?;

        let status = response.status();
        tracing::info!("SurveyMonkey token response with status code = {}", status);

        if status == StatusCode::BAD_REQUEST || status == StatusCode::UNAUTHORIZED {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(AppError::InvalidCredentials(format!(
                "SurveyMonkey rejected client {} ({}): {}",
                credentials.client_id, status, error_text
            )));
        }

        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(AppError::ExternalApiError(format!(
                "SurveyMonkey token endpoint returned {}: {}",
                status, error_text
            )));
        }

        let token: TokenResponse = response.json().await.map_err(|e| {
            AppError::ExternalApiError(format!("Failed to parse SurveyMonkey token: {}", e))
        })?;

        Ok(format!("Bearer {}", token.access_token))
    }
}

/// Authenticated SurveyMonkey v3 client.
///
/// Survey, collector and detail lookups are memoized in the shared cache for
/// `cache_duration`; responses and mutations always hit the network.
#[derive(Clone)]
pub struct SurveyMonkeyClient {
    http: reqwest::Client,
    base_url: String,
    client_id: String,
    authorization: String,
    cache: Arc<dyn ApiCache>,
    cache_duration: Duration,
}

impl SurveyMonkeyClient {
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn cache_duration(&self) -> Duration {
        self.cache_duration
    }

    /// GET `/v3/surveys`, optionally filtered (e.g. by `title`).
    pub async fn list_surveys(&self, filters: Filters<'_>) -> Result<Vec<Survey>, AppError> {
        let key = cache_key("surveys", &self.client_id, &filters_scope(filters));
        let envelope: ListEnvelope<Survey> = self
            .cached(key, self.call_api_get("v3/surveys", filters))
            .await?;
        Ok(envelope.data)
    }

    /// GET `/v3/surveys/{id}/collectors`, cached per client and `cache_scope_id`.
    pub async fn list_collectors(
        &self,
        survey_id: &str,
        cache_scope_id: &str,
        filters: Filters<'_>,
    ) -> Result<Vec<Collector>, AppError> {
        let key = cache_key(
            "collectors",
            &self.client_id,
            &format!("{}-{}", cache_scope_id, survey_id),
        );
        let path = format!("v3/surveys/{}/collectors", survey_id);
        let envelope: ListEnvelope<Collector> =
            self.cached(key, self.call_api_get(&path, filters)).await?;
        Ok(envelope.data)
    }

    /// GET `/v3/surveys/{id}/details`, cached per client and `cache_scope_id`.
    pub async fn get_survey_details(
        &self,
        survey_id: &str,
        cache_scope_id: &str,
    ) -> Result<SurveyDetails, AppError> {
        let key = cache_key(
            "details",
            &self.client_id,
            &format!("{}-{}", cache_scope_id, survey_id),
        );
        let path = format!("v3/surveys/{}/details", survey_id);
        self.cached(key, self.call_api_get(&path, &[])).await
    }

    /// GET `/v3/surveys/{id}/responses/bulk`. Never cached.
    pub async fn get_survey_responses(
        &self,
        survey_id: &str,
        filters: Filters<'_>,
    ) -> Result<ResponseSet, AppError> {
        let path = format!("v3/surveys/{}/responses/bulk", survey_id);
        self.call_api_get(&path, filters).await
    }

    /// GET `/v3/collectors/{id}/responses/bulk`. Never cached.
    pub async fn get_collector_responses(
        &self,
        collector_id: &str,
        filters: Filters<'_>,
    ) -> Result<ResponseSet, AppError> {
        let path = format!("v3/collectors/{}/responses/bulk", collector_id);
        self.call_api_get(&path, filters).await
    }

    /// PATCH a question's heading. Returns the fields SurveyMonkey echoes back.
    pub async fn patch_question_heading(
        &self,
        survey_id: &str,
        page_id: &str,
        question_id: &str,
        new_heading: &str,
    ) -> Result<Value, AppError> {
        let url = format!(
            "{}/v3/surveys/{}/pages/{}/questions/{}",
            self.base_url, survey_id, page_id, question_id
        );

        let response = self
            .http
            .patch(&url)
            .header(AUTHORIZATION, &self.authorization)
            .json(&QuestionHeadingPatch::new(new_heading))
            .send()
            .await
            .map_err(|e| {
                AppError::ExternalApiError(format!("SurveyMonkey patch request failed: {}", e))
            })?;

        let status = response.status();
        tracing::info!("SurveyMonkey patch response with status code = {}", status);

        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            tracing::error!(
                "An error has occurred trying to patch question {} = {}",
                question_id,
                status
            );
            return Err(AppError::ExternalApiError(format!(
                "SurveyMonkey returned {} patching question {}: {}",
                status, question_id, error_text
            )));
        }

        response.json().await.map_err(|e| {
            AppError::ExternalApiError(format!("Failed to parse SurveyMonkey patch response: {}", e))
        })
    }

    async fn call_api_get<T: DeserializeOwned>(
        &self,
        path: &str,
        filters: Filters<'_>,
    ) -> Result<T, AppError> {
        let url = format!("{}/{}", self.base_url, path);

        let response = self
            .http
            .get(&url)
            .header(AUTHORIZATION, &self.authorization)
            .query(filters)
            .send()
            .await
            .map_err(|e| AppError::ExternalApiError(format!("SurveyMonkey request failed: {}", e)))?;

        let status = response.status();
        tracing::info!(
            "SurveyMonkey get {} response with status code = {}",
            path,
            status
        );

        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            tracing::error!("An error has occurred calling {} = {}", path, status);
            return Err(AppError::ExternalApiError(format!(
                "SurveyMonkey returned {} for {}: {}",
                status, path, error_text
            )));
        }

        response.json().await.map_err(|e| {
            AppError::ExternalApiError(format!("Failed to parse SurveyMonkey response: {}", e))
        })
    }

    /// Serves `key` from the cache or awaits `fetch` and stores its success.
    ///
    /// A zero cache duration evicts the key and always fetches.
    async fn cached<T, Fut>(&self, key: String, fetch: Fut) -> Result<T, AppError>
    where
        T: Serialize + DeserializeOwned,
        Fut: Future<Output = Result<T, AppError>>,
    {
        if self.cache_duration.is_zero() {
            self.cache.delete(&key).await;
            return fetch.await;
        }

        if let Some(raw) = self.cache.get(&key).await {
            match ValidatedCacheEntry::deserialize_and_validate(&raw)
                .and_then(|data| serde_json::from_str::<T>(&data).ok())
            {
                Some(value) => {
                    tracing::debug!("SurveyMonkey cache HIT: {}", key);
                    return Ok(value);
                }
                None => tracing::warn!("Discarding unreadable cache entry {}", key),
            }
        }

        tracing::debug!("SurveyMonkey cache MISS: {}", key);
        let value = fetch.await?;

        if let Ok(json_str) = serde_json::to_string(&value) {
            self.cache
                .set(
                    &key,
                    ValidatedCacheEntry::new(json_str).serialize(),
                    self.cache_duration,
                )
                .await;
        }

        Ok(value)
    }
}

fn filters_scope(filters: Filters<'_>) -> String {
    if filters.is_empty() {
        return "all".to_string();
    }
    filters
        .iter()
        .map(|(name, value)| format!("{}={}", name, value))
        .collect::<Vec<_>>()
        .join("&")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MokaApiCache;

    #[test]
    fn test_connector_creation() {
        let connector =
            SurveyMonkeyConnector::new("https://api.example.com/", Arc::new(MokaApiCache::new()));
        assert!(connector.is_ok());
        assert_eq!(connector.unwrap().base_url, "https://api.example.com");
    }

    #[test]
    fn test_filters_scope() {
        assert_eq!(filters_scope(&[]), "all");
        assert_eq!(
            filters_scope(&[("title", "Exit Poll"), ("per_page", "50")]),
            "title=Exit Poll&per_page=50"
        );
    }
}
