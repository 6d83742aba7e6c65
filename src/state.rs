mod request_id;

use std::sync::Arc;

use crate::config::AppConfig;
use crate::error::RelayError;
use crate::tools::{ToolRegistry, WeatherTool};
use crate::transport::{build_reqwest_client, OpenAiCompletionClient};

use request_id::RequestIdGenerator;

/// Shared application state accessible to all handlers.
pub struct AppState {
    pub config: AppConfig,
    pub completion: Arc<OpenAiCompletionClient>,
    pub tools: Arc<ToolRegistry>,
    request_ids: RequestIdGenerator,
}

impl AppState {
    /// Build the outbound client, the completion client and the tool registry.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Config`] when the HTTP client cannot be built or
    /// the upstream base URL is invalid.
    pub fn from_config(config: AppConfig) -> Result<Self, RelayError> {
        let http = build_reqwest_client(&config.server)?;
        let completion = OpenAiCompletionClient::new(http.clone(), &config.upstream)?;
        let tools = ToolRegistry::new().with_tool(Arc::new(WeatherTool::new(
            http,
            config.tools.weather_base_url.clone(),
        )));
        Ok(Self::new(config, completion, tools))
    }

    #[must_use]
    pub fn new(config: AppConfig, completion: OpenAiCompletionClient, tools: ToolRegistry) -> Self {
        Self {
            config,
            completion: Arc::new(completion),
            tools: Arc::new(tools),
            request_ids: RequestIdGenerator::new(),
        }
    }

    pub fn next_request_seq(&self) -> u64 {
        self.request_ids.next_seq()
    }

    #[must_use]
    pub fn request_uuid(&self, request_seq: u64) -> uuid::Uuid {
        self.request_ids.request_uuid(request_seq)
    }
}
