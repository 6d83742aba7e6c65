use serde_json::Value;

use crate::error::RelayError;
use crate::protocol::client::{ClientAttachment, ClientMessage, ClientRole, ToolInvocation};
use crate::protocol::openai_chat::{
    CompletionRequest, OpenAiContent, OpenAiContentPart, OpenAiImageUrl, OpenAiMessage,
    OpenAiStreamOptions, OpenAiTool, OpenAiToolCall, OpenAiToolCallFunction, OpenAiToolFunction,
};
use crate::tools::ToolDeclaration;

const FUNCTION_TYPE: &str = "function";

/// Convert client messages into upstream messages, preserving order.
///
/// Each message keeps its role and carries its text and attachments as
/// content parts. Messages with tool invocations also carry `tool_calls` and
/// are followed by one `tool` message per invocation.
///
/// # Errors
///
/// Returns [`RelayError::Validation`] for an unknown role or a malformed
/// attachment. Nothing is converted in that case.
pub fn convert_client_messages(
    messages: &[ClientMessage],
) -> Result<Vec<OpenAiMessage>, RelayError> {
    let mut out = Vec::with_capacity(messages.len());
    for message in messages {
        let role = ClientRole::parse(&message.role)?;

        let mut parts = Vec::with_capacity(1 + message.attachments.len());
        parts.push(OpenAiContentPart::Text {
            text: message.content.clone(),
        });
        for attachment in &message.attachments {
            if let Some(part) = attachment_part(attachment)? {
                parts.push(part);
            }
        }

        let tool_calls = if message.tool_invocations.is_empty() {
            None
        } else {
            Some(
                message
                    .tool_invocations
                    .iter()
                    .map(invocation_tool_call)
                    .collect(),
            )
        };

        out.push(OpenAiMessage {
            role: role.as_str().to_string(),
            content: Some(OpenAiContent::Parts(parts)),
            tool_calls,
            tool_call_id: None,
        });

        for invocation in &message.tool_invocations {
            out.push(OpenAiMessage {
                role: ClientRole::Tool.as_str().to_string(),
                content: Some(OpenAiContent::Text(json_text(&invocation.result))),
                tool_calls: None,
                tool_call_id: Some(invocation.tool_call_id.clone()),
            });
        }
    }
    Ok(out)
}

fn attachment_part(
    attachment: &ClientAttachment,
) -> Result<Option<OpenAiContentPart>, RelayError> {
    let content_type = attachment.content_type.trim();
    if content_type.is_empty() {
        return Err(RelayError::Validation(
            "Attachment is missing a content type".to_string(),
        ));
    }
    if attachment.url.trim().is_empty() {
        return Err(RelayError::Validation(
            "Attachment is missing a URL".to_string(),
        ));
    }
    url::Url::parse(&attachment.url).map_err(|err| {
        RelayError::Validation(format!("Invalid attachment URL '{}': {err}", attachment.url))
    })?;

    if content_type.starts_with("image") {
        Ok(Some(OpenAiContentPart::ImageUrl {
            image_url: OpenAiImageUrl {
                url: attachment.url.clone(),
            },
        }))
    } else if content_type.starts_with("text") {
        Ok(Some(OpenAiContentPart::Text {
            text: attachment.url.clone(),
        }))
    } else {
        tracing::debug!(
            content_type,
            name = attachment.name.as_deref().unwrap_or(""),
            "skipping attachment with unsupported content type"
        );
        Ok(None)
    }
}

fn invocation_tool_call(invocation: &ToolInvocation) -> OpenAiToolCall {
    OpenAiToolCall {
        id: invocation.tool_call_id.clone(),
        type_: FUNCTION_TYPE.to_string(),
        function: OpenAiToolCallFunction {
            name: invocation.tool_name.clone(),
            arguments: json_text(&invocation.args),
        },
    }
}

fn json_text(value: &Value) -> String {
    serde_json::to_string(value).unwrap_or_else(|_| "null".to_string())
}

/// Render tool declarations as upstream function tools.
#[must_use]
pub fn openai_tools(declarations: &[ToolDeclaration]) -> Vec<OpenAiTool> {
    declarations
        .iter()
        .map(|decl| OpenAiTool {
            type_: FUNCTION_TYPE.to_string(),
            function: OpenAiToolFunction {
                name: decl.name.clone(),
                description: Some(decl.description.clone()),
                parameters: Some(decl.parameters_schema()),
            },
        })
        .collect()
}

/// Assemble the completion request. Streaming requests ask for the trailing
/// usage chunk; an empty tool list is omitted.
#[must_use]
pub fn build_completion_request(
    messages: Vec<OpenAiMessage>,
    model: &str,
    stream: bool,
    tools: &[ToolDeclaration],
) -> CompletionRequest {
    CompletionRequest {
        model: model.to_string(),
        messages,
        tools: if tools.is_empty() {
            None
        } else {
            Some(openai_tools(tools))
        },
        stream: Some(stream),
        stream_options: stream.then_some(OpenAiStreamOptions {
            include_usage: Some(true),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::ParameterSpec;
    use serde_json::json;

    fn message(value: Value) -> ClientMessage {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_user_text_becomes_single_text_part() {
        let out = convert_client_messages(&[message(json!({"role": "user", "content": "Hi"}))])
            .unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(
            serde_json::to_value(&out[0]).unwrap(),
            json!({"role": "user", "content": [{"type": "text", "text": "Hi"}]})
        );
    }

    #[test]
    fn test_attachments_map_by_content_type() {
        let out = convert_client_messages(&[message(json!({
            "role": "user",
            "content": "look",
            "experimental_attachments": [
                {"name": "a.png", "contentType": "image/png", "url": "https://x/a.png"},
                {"name": "b.txt", "contentType": "text/plain", "url": "data:text/plain;base64,aGk="},
                {"name": "c.pdf", "contentType": "application/pdf", "url": "https://x/c.pdf"}
            ]
        }))])
        .unwrap();
        assert_eq!(
            serde_json::to_value(&out[0]).unwrap()["content"],
            json!([
                {"type": "text", "text": "look"},
                {"type": "image_url", "image_url": {"url": "https://x/a.png"}},
                {"type": "text", "text": "data:text/plain;base64,aGk="}
            ])
        );
    }

    #[test]
    fn test_tool_invocations_expand_into_tool_messages() {
        let out = convert_client_messages(&[
            message(json!({"role": "user", "content": "weather?"})),
            message(json!({
                "role": "assistant",
                "content": "",
                "toolInvocations": [
                    {"toolCallId": "call_1", "toolName": "get_current_weather",
                     "args": {"latitude": 1.5}, "result": {"t": 20}},
                    {"toolCallId": "call_2", "toolName": "get_current_weather",
                     "args": {"latitude": 2.5}, "result": {"t": 21}}
                ]
            })),
        ])
        .unwrap();

        assert_eq!(out.len(), 4);
        assert_eq!(out[0].role, "user");
        assert_eq!(out[1].role, "assistant");
        let calls = out[1].tool_calls.as_ref().unwrap();
        assert_eq!(calls[0].id, "call_1");
        assert_eq!(calls[0].type_, "function");
        assert_eq!(calls[0].function.arguments, "{\"latitude\":1.5}");
        assert_eq!(out[2].role, "tool");
        assert_eq!(out[2].tool_call_id.as_deref(), Some("call_1"));
        assert_eq!(out[2].content, Some(OpenAiContent::Text("{\"t\":20}".into())));
        assert_eq!(out[3].tool_call_id.as_deref(), Some("call_2"));
    }

    #[test]
    fn test_unknown_role_is_rejected() {
        let err = convert_client_messages(&[
            message(json!({"role": "user", "content": "ok"})),
            message(json!({"role": "narrator", "content": "no"})),
        ])
        .unwrap_err();
        assert!(matches!(err, RelayError::Validation(_)));
    }

    #[test]
    fn test_malformed_attachments_are_rejected() {
        for attachment in [
            json!({"contentType": "image/png", "url": ""}),
            json!({"contentType": "image/png", "url": "not a url"}),
            json!({"contentType": "", "url": "https://x/a.png"}),
        ] {
            let err = convert_client_messages(&[message(json!({
                "role": "user",
                "content": "x",
                "experimental_attachments": [attachment]
            }))])
            .unwrap_err();
            assert!(matches!(err, RelayError::Validation(_)));
        }
    }

    #[test]
    fn test_build_streaming_request() {
        let decl = ToolDeclaration {
            name: "get_current_weather".into(),
            description: "Get the current weather at a location".into(),
            parameters: vec![ParameterSpec::required("latitude", "number", "lat")],
        };
        let req = build_completion_request(Vec::new(), "gpt-4o", true, &[decl]);
        let value = serde_json::to_value(&req).unwrap();
        assert_eq!(value["stream"], true);
        assert_eq!(value["stream_options"]["include_usage"], true);
        assert_eq!(value["tools"][0]["type"], "function");
        assert_eq!(value["tools"][0]["function"]["name"], "get_current_weather");
        assert_eq!(
            value["tools"][0]["function"]["parameters"]["required"],
            json!(["latitude"])
        );
    }

    #[test]
    fn test_build_non_streaming_request_without_tools() {
        let req = build_completion_request(Vec::new(), "gpt-4o", false, &[]);
        let value = serde_json::to_value(&req).unwrap();
        assert_eq!(value["stream"], false);
        assert!(value.get("stream_options").is_none());
        assert!(value.get("tools").is_none());
    }
}
