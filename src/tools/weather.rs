use futures_util::future::BoxFuture;
use serde_json::Value;

use super::{ParameterSpec, Tool, ToolDeclaration, ToolError};
use crate::util::truncate_for_message;

pub const WEATHER_TOOL_NAME: &str = "get_current_weather";

const ERROR_BODY_MAX_CHARS: usize = 200;

/// Current weather lookup against an Open-Meteo compatible forecast API.
pub struct WeatherTool {
    client: reqwest::Client,
    base_url: String,
    declaration: ToolDeclaration,
}

impl WeatherTool {
    #[must_use]
    pub fn new(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            declaration: ToolDeclaration {
                name: WEATHER_TOOL_NAME.to_string(),
                description: "Get the current weather at a location".to_string(),
                parameters: vec![
                    ParameterSpec::required(
                        "latitude",
                        "number",
                        "The latitude of the location",
                    ),
                    ParameterSpec::required(
                        "longitude",
                        "number",
                        "The longitude of the location",
                    ),
                ],
            },
        }
    }

    fn coordinate(&self, args: &Value, key: &str) -> Result<f64, ToolError> {
        args.get(key).and_then(Value::as_f64).ok_or_else(|| {
            ToolError::execution(
                WEATHER_TOOL_NAME,
                format!("missing or non-numeric argument '{key}'"),
            )
        })
    }

    async fn fetch(&self, latitude: f64, longitude: f64) -> Result<Value, ToolError> {
        let latitude = latitude.to_string();
        let longitude = longitude.to_string();
        let response = self
            .client
            .get(&self.base_url)
            .query(&[
                ("latitude", latitude.as_str()),
                ("longitude", longitude.as_str()),
                ("current", "temperature_2m"),
                ("hourly", "temperature_2m"),
                ("daily", "sunrise,sunset"),
                ("timezone", "auto"),
            ])
            .send()
            .await
            .map_err(|err| ToolError::execution(WEATHER_TOOL_NAME, err))?;

        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(|err| ToolError::execution(WEATHER_TOOL_NAME, err))?;
        if !status.is_success() {
            let text = String::from_utf8_lossy(&body);
            return Err(ToolError::execution(
                WEATHER_TOOL_NAME,
                format!(
                    "weather service returned {}: {}",
                    status.as_u16(),
                    truncate_for_message(&text, ERROR_BODY_MAX_CHARS)
                ),
            ));
        }

        serde_json::from_slice(&body).map_err(|err| ToolError::execution(WEATHER_TOOL_NAME, err))
    }
}

impl Tool for WeatherTool {
    fn declaration(&self) -> &ToolDeclaration {
        &self.declaration
    }

    fn call<'a>(&'a self, args: &'a Value) -> BoxFuture<'a, Result<Value, ToolError>> {
        Box::pin(async move {
            let latitude = self.coordinate(args, "latitude")?;
            let longitude = self.coordinate(args, "longitude")?;
            tracing::debug!(latitude, longitude, "fetching current weather");
            self.fetch(latitude, longitude).await
        })
    }
}
