use serde::Deserialize;

use crate::config::ResponseMode;
use crate::error::RelayError;

const DEFAULT_PROTOCOL: &str = "data";

/// Body of `POST /api/chat`.
#[derive(Debug, Clone, Deserialize)]
pub struct ChatRequestBody {
    pub messages: Vec<ClientMessage>,
}

/// One conversation turn as the client SDK sends it.
#[derive(Debug, Clone, Deserialize)]
pub struct ClientMessage {
    pub role: String,
    #[serde(default)]
    pub content: String,
    #[serde(default, rename = "experimental_attachments")]
    pub attachments: Vec<ClientAttachment>,
    #[serde(default, rename = "toolInvocations")]
    pub tool_invocations: Vec<ToolInvocation>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ClientAttachment {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default, rename = "contentType")]
    pub content_type: String,
    #[serde(default)]
    pub url: String,
}

/// A tool call the client already saw completed in an earlier turn.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolInvocation {
    pub tool_call_id: String,
    pub tool_name: String,
    #[serde(default)]
    pub args: serde_json::Value,
    #[serde(default)]
    pub result: serde_json::Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientRole {
    System,
    User,
    Assistant,
    Tool,
}

impl ClientRole {
    /// # Errors
    ///
    /// Returns [`RelayError::Validation`] for roles outside
    /// `system`/`user`/`assistant`/`tool`.
    pub fn parse(role: &str) -> Result<Self, RelayError> {
        match role {
            "system" => Ok(ClientRole::System),
            "user" => Ok(ClientRole::User),
            "assistant" => Ok(ClientRole::Assistant),
            "tool" => Ok(ClientRole::Tool),
            other => Err(RelayError::Validation(format!("Unknown message role '{other}'"))),
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            ClientRole::System => "system",
            ClientRole::User => "user",
            ClientRole::Assistant => "assistant",
            ClientRole::Tool => "tool",
        }
    }
}

/// Query parameters of `POST /api/chat`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatQuery {
    /// Client protocol label; logged only.
    pub protocol: String,
    pub mode: ResponseMode,
    pub debug: bool,
}

impl ChatQuery {
    /// Parse the raw query string, falling back to `default_mode` when `mode`
    /// is absent.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Validation`] for an unknown `mode` or a `debug`
    /// value that is not a boolean.
    pub fn parse(query: Option<&str>, default_mode: ResponseMode) -> Result<Self, RelayError> {
        let mut parsed = ChatQuery {
            protocol: DEFAULT_PROTOCOL.to_string(),
            mode: default_mode,
            debug: false,
        };
        let Some(query) = query else {
            return Ok(parsed);
        };

        for (key, value) in url::form_urlencoded::parse(query.as_bytes()) {
            match key.as_ref() {
                "protocol" => parsed.protocol = value.into_owned(),
                "mode" => {
                    parsed.mode = ResponseMode::from_query_value(&value).ok_or_else(|| {
                        RelayError::Validation(format!(
                            "Unsupported mode '{value}', expected 'function' or 'xml'"
                        ))
                    })?;
                }
                "debug" => parsed.debug = parse_query_bool(&value)?,
                _ => {}
            }
        }
        Ok(parsed)
    }
}

fn parse_query_bool(value: &str) -> Result<bool, RelayError> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(RelayError::Validation(format!(
            "Invalid boolean for 'debug': '{value}'"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deserialize_client_message() {
        let body: ChatRequestBody = serde_json::from_str(
            r#"{"messages":[{
                "role":"assistant",
                "content":"",
                "experimental_attachments":[{"name":"cat.png","contentType":"image/png","url":"https://x/cat.png"}],
                "toolInvocations":[{"toolCallId":"call_1","toolName":"get_current_weather","args":{"latitude":1},"result":{"t":2},"state":"result"}]
            }]}"#,
        )
        .unwrap();
        let msg = &body.messages[0];
        assert_eq!(msg.role, "assistant");
        assert_eq!(msg.attachments[0].content_type, "image/png");
        assert_eq!(msg.tool_invocations[0].tool_call_id, "call_1");
        assert_eq!(msg.tool_invocations[0].args["latitude"], 1);
    }

    #[test]
    fn test_minimal_message_defaults() {
        let msg: ClientMessage = serde_json::from_str(r#"{"role":"user"}"#).unwrap();
        assert!(msg.content.is_empty());
        assert!(msg.attachments.is_empty());
        assert!(msg.tool_invocations.is_empty());
    }

    #[test]
    fn test_role_parse() {
        assert_eq!(ClientRole::parse("tool").unwrap(), ClientRole::Tool);
        assert!(matches!(
            ClientRole::parse("developer"),
            Err(RelayError::Validation(_))
        ));
    }

    #[test]
    fn test_query_defaults() {
        let q = ChatQuery::parse(None, ResponseMode::Function).unwrap();
        assert_eq!(q.protocol, "data");
        assert_eq!(q.mode, ResponseMode::Function);
        assert!(!q.debug);

        let q = ChatQuery::parse(Some(""), ResponseMode::Xml).unwrap();
        assert_eq!(q.mode, ResponseMode::Xml);
    }

    #[test]
    fn test_query_values() {
        let q = ChatQuery::parse(Some("protocol=text&mode=xml&debug=true"), ResponseMode::Function)
            .unwrap();
        assert_eq!(q.protocol, "text");
        assert_eq!(q.mode, ResponseMode::Xml);
        assert!(q.debug);
    }

    #[test]
    fn test_query_rejects_unknown_mode_and_bad_bool() {
        assert!(ChatQuery::parse(Some("mode=yaml"), ResponseMode::Function).is_err());
        assert!(ChatQuery::parse(Some("debug=maybe"), ResponseMode::Function).is_err());
    }
}
