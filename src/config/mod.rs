use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct AppConfig {
    /// Server bind address (e.g., "0.0.0.0:3000"). Optional for worker processes.
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// PostgreSQL connection string
    pub database_url: String,

    /// Redis connection string for job queue
    pub redis_url: String,

    /// Object storage bucket holding collection files
    pub storage_bucket: String,

    /// S3-compatible endpoint URL
    pub storage_endpoint: String,

    /// Storage region name
    #[serde(default = "default_storage_region")]
    pub storage_region: String,

    /// Storage access key ID
    pub storage_access_key: String,

    /// Storage secret access key
    pub storage_secret_key: String,

    /// Base URL of the label detection service
    pub detector_url: String,

    /// API token for the label detection service
    pub detector_api_token: String,

    /// Base URL of the vision model gateway
    pub model_url: String,

    /// API token for the vision model gateway
    pub model_api_token: String,

    /// Optional token exchange endpoint; when set, short-lived credentials
    /// are leased from here instead of sending the static token
    pub model_token_url: Option<String>,

    /// Optional base URL of the agent gateway used for context augmentation
    pub agent_gateway_url: Option<String>,
}

fn default_bind_addr() -> String {
    "0.0.0.0:3000".to_string()
}

fn default_storage_region() -> String {
    "auto".to_string()
}

impl AppConfig {
    pub fn from_env() -> Result<Self, envy::Error> {
        dotenvy::dotenv().ok();
        envy::from_env()
    }
}
