use std::fmt::Write as _;
use std::sync::LazyLock;

use regex_lite::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::tools::ToolDeclaration;

const REASONING_TAG: &[u8] = b"reasoning";
const TOOL_TAG: &[u8] = b"tool";
const ANSWER_TAG: &[u8] = b"answer";

static REASONING_RE: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"(?s)<reasoning>(.*?)</reasoning>").ok());
static TOOL_RE: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"(?s)<tool>(.*?)</tool>").ok());
static ANSWER_RE: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"(?s)<answer>(.*?)</answer>").ok());

/// Tool call decoded from the tool region.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParsedToolCall {
    pub tool: String,
    #[serde(default)]
    pub args: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TaggedResponse {
    pub reasoning: String,
    pub tool_call: Option<ParsedToolCall>,
}

#[derive(Debug, Default)]
struct Regions {
    reasoning: Option<String>,
    tool: Option<String>,
}

impl Regions {
    fn is_empty(&self) -> bool {
        self.reasoning.is_none() && self.tool.is_none()
    }
}

/// Split a complete model response into reasoning text and an optional tool
/// call. Never fails: without any recognised region the whole text is the
/// reasoning.
#[must_use]
pub fn parse_tagged_response(text: &str) -> TaggedResponse {
    let regions = match read_regions_strict(text) {
        Ok(regions) => regions,
        Err(err) => {
            tracing::debug!(error = %err, "strict tag read failed, using lenient scan");
            read_regions_lenient(text)
        }
    };

    if regions.is_empty() {
        return TaggedResponse {
            reasoning: text.to_string(),
            tool_call: None,
        };
    }

    TaggedResponse {
        reasoning: regions.reasoning.unwrap_or_default(),
        tool_call: regions.tool.as_deref().and_then(decode_tool_call),
    }
}

fn decode_tool_call(region: &str) -> Option<ParsedToolCall> {
    if region.is_empty() || region == "null" {
        return None;
    }
    match serde_json::from_str::<ParsedToolCall>(region) {
        Ok(call) => Some(call),
        Err(err) => {
            tracing::warn!(error = %err, content = region, "discarding undecodable tool region");
            None
        }
    }
}

/// Which region the reader is currently inside.
#[derive(Clone, Copy, PartialEq, Eq)]
enum Slot {
    Reasoning,
    Tool,
}

fn slot_for(tag: &[u8]) -> Option<Slot> {
    match tag {
        REASONING_TAG => Some(Slot::Reasoning),
        TOOL_TAG | ANSWER_TAG => Some(Slot::Tool),
        _ => None,
    }
}

#[derive(Debug, thiserror::Error)]
enum StrictReadError {
    #[error("XML parse error: {0}")]
    Xml(String),
    #[error("nested markup inside a region")]
    NestedMarkup,
}

fn read_regions_strict(text: &str) -> Result<Regions, StrictReadError> {
    use quick_xml::events::Event;
    use quick_xml::Reader;

    let mut reader = Reader::from_str(text);
    let mut regions = Regions::default();
    let mut current: Option<(Slot, String)> = None;

    loop {
        let event = reader
            .read_event()
            .map_err(|err| StrictReadError::Xml(err.to_string()))?;
        match event {
            Event::Start(ref e) => {
                let slot = slot_for(e.name().as_ref());
                match (&current, slot) {
                    (None, Some(slot)) => current = Some((slot, String::new())),
                    (Some(_), _) => return Err(StrictReadError::NestedMarkup),
                    (None, None) => {}
                }
            }
            Event::Empty(ref e) => {
                if let (None, Some(slot)) = (&current, slot_for(e.name().as_ref())) {
                    store(&mut regions, slot, String::new());
                }
            }
            Event::End(ref e) => {
                if let Some((slot, _)) = &current {
                    if slot_for(e.name().as_ref()) == Some(*slot) {
                        if let Some((slot, content)) = current.take() {
                            store(&mut regions, slot, content);
                        }
                    }
                }
            }
            Event::Text(ref e) => {
                if let Some((_, content)) = current.as_mut() {
                    let decoded = e
                        .unescape()
                        .map_err(|err| StrictReadError::Xml(err.to_string()))?;
                    content.push_str(&decoded);
                }
            }
            Event::CData(ref e) => {
                if let Some((_, content)) = current.as_mut() {
                    content.push_str(&String::from_utf8_lossy(e.as_ref()));
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    Ok(regions)
}

/// Keep the first occurrence of each region.
fn store(regions: &mut Regions, slot: Slot, content: String) {
    let target = match slot {
        Slot::Reasoning => &mut regions.reasoning,
        Slot::Tool => &mut regions.tool,
    };
    if target.is_none() {
        *target = Some(content.trim().to_string());
    }
}

fn read_regions_lenient(text: &str) -> Regions {
    let capture = |re: &LazyLock<Option<Regex>>| {
        re.as_ref()
            .and_then(|re| re.captures(text))
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str().trim().to_string())
    };
    Regions {
        reasoning: capture(&REASONING_RE),
        tool: capture(&TOOL_RE).or_else(|| capture(&ANSWER_RE)),
    }
}

/// System prompt instructing the model to answer in the tagged format and
/// describing the available tools.
#[must_use]
pub fn structured_system_prompt(tools: &[ToolDeclaration]) -> String {
    let mut prompt = String::with_capacity(1024);
    if tools.is_empty() {
        prompt.push_str("You have no tools available.");
    } else {
        let names: Vec<String> = tools.iter().map(|t| format!("'{}'", t.name)).collect();
        let _ = write!(
            prompt,
            "You have access to the following tools: {}. \
             **Always think step-by-step before calling a tool.**\n",
            names.join(", ")
        );
        for tool in tools {
            let _ = write!(prompt, "\n{}: {}\nArgs:\n", tool.name, tool.description);
            for param in &tool.parameters {
                let _ = writeln!(
                    prompt,
                    "- {}: {} ({}{})",
                    param.name,
                    param.json_type,
                    param.description,
                    if param.required { "" } else { ", optional" }
                );
            }
        }
    }

    let example = tools.first().map_or("tool_name", |t| t.name.as_str());
    let _ = write!(
        prompt,
        "\nRespond in the following XML format:\n\
         <reasoning>\n...\n</reasoning>\n<tool>\n...\n</tool>\n\n\
         For tool calls, return a JSON object inside the 'tool' section with the following fields:\n\
         - tool: str (e.g. \"{example}\")\n\
         - args: dict of argument names to values\n\n\
         Always include your reasoning in the 'reasoning' section before making any tool calls.\n\
         If no tool is needed, leave the 'tool' section empty or put null.\n"
    );
    prompt
}
