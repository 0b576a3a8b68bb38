use serde::Deserialize;

/// Default SurveyMonkey API host.
pub const DEFAULT_SURVEYMONKEY_BASE_URL: &str = "https://api.surveymonkey.com";

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub database_url: String,
    pub port: u16,
    /// Root URL of the LMS, used to build handler URLs shown to operators and learners.
    pub lms_root_url: String,
    pub surveymonkey_base_url: String,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let config = Self {
            database_url: std::env::var("DB_URL")
                .or_else(|_| std::env::var("DATABASE_URL"))
                .map_err(|_| {
                    anyhow::anyhow!("DB_URL or DATABASE_URL environment variable required")
                })
                .and_then(|url| {
                    if url.trim().is_empty() {
                        anyhow::bail!("DB_URL cannot be empty");
                    }
                    if !url.starts_with("postgresql://") && !url.starts_with("postgres://") {
                        anyhow::bail!("DB_URL must start with postgresql:// or postgres://");
                    }
                    Ok(url)
                })?,
            port: std::env::var("PORT")
                .unwrap_or_else(|_| "3000".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("PORT must be a valid number between 1-65535"))?,
            lms_root_url: std::env::var("LMS_ROOT_URL")
                .map_err(|_| anyhow::anyhow!("LMS_ROOT_URL environment variable required"))
                .and_then(|url| {
                    if url.trim().is_empty() {
                        anyhow::bail!("LMS_ROOT_URL cannot be empty");
                    }
                    if !url.starts_with("http://") && !url.starts_with("https://") {
                        anyhow::bail!("LMS_ROOT_URL must start with http:// or https://");
                    }
                    Ok(url)
                })?,
            surveymonkey_base_url: std::env::var("SURVEYMONKEY_BASE_URL")
                .ok()
                .filter(|s| !s.trim().is_empty())
                .map(|url| {
                    if !url.starts_with("http://") && !url.starts_with("https://") {
                        anyhow::bail!("SURVEYMONKEY_BASE_URL must start with http:// or https://");
                    }
                    Ok(url.trim_end_matches('/').to_string())
                })
                .transpose()?
                .unwrap_or_else(|| DEFAULT_SURVEYMONKEY_BASE_URL.to_string()),
        };

        // Log successful configuration load (without sensitive values)
        tracing::info!("Configuration loaded successfully");
        tracing::debug!(
            "Database URL: {}...",
            &config.database_url[..20.min(config.database_url.len())]
        );
        tracing::debug!("LMS root URL: {}", config.lms_root_url);
        tracing::debug!("SurveyMonkey base URL: {}", config.surveymonkey_base_url);
        tracing::debug!("Server Port: {}", config.port);

        Ok(config)
    }
}
