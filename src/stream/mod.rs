//! Claude CLI `stream-json` output.
//!
//! Every stdout line is one JSON event. [`Transcript`] folds the events of a
//! session into the text the agent produced and the final result record.

use crate::util::truncate_chars;
use serde::Deserialize;
use serde_json::Value;

/// Events from Claude CLI's stream-json output format
#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
pub enum StreamEvent {
    #[serde(rename = "assistant")]
    Assistant {
        message: AssistantMessage,
        #[serde(default)]
        session_id: String,
    },

    #[serde(rename = "user")]
    User {},

    #[serde(rename = "result")]
    Result {
        subtype: String,
        #[serde(default)]
        result: Option<String>,
        #[serde(default)]
        is_error: bool,
    },

    #[serde(rename = "system")]
    System { subtype: String },

    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
pub struct AssistantMessage {
    #[serde(default)]
    pub content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
pub enum ContentBlock {
    #[serde(rename = "tool_use")]
    ToolUse {
        name: String,
        input: Value,
        #[serde(default)]
        id: String,
    },

    #[serde(rename = "text")]
    Text { text: String },

    #[serde(other)]
    Other,
}

/// Something worth showing while a session runs.
#[derive(Debug, Clone, PartialEq)]
pub enum Activity {
    Tool { emoji: &'static str, description: String },
    Thinking(String),
}

/// Accumulated output of one Claude session.
#[derive(Debug, Default)]
pub struct Transcript {
    text: String,
    result: Option<String>,
    is_error: bool,
    session_id: Option<String>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one stdout line in, returning the activities it carried.
    /// Lines that are not stream events are kept as raw text.
    pub fn push_line(&mut self, line: &str) -> Vec<Activity> {
        let line = line.trim_end();
        if line.is_empty() {
            return Vec::new();
        }

        let Ok(event) = serde_json::from_str::<StreamEvent>(line) else {
            self.text.push_str(line);
            self.text.push('\n');
            return Vec::new();
        };

        let mut activities = Vec::new();
        match event {
            StreamEvent::Assistant {
                message,
                session_id,
            } => {
                if !session_id.is_empty() {
                    self.session_id = Some(session_id);
                }
                for block in message.content {
                    match block {
                        ContentBlock::ToolUse { name, input, .. } => {
                            activities.push(Activity::Tool {
                                emoji: tool_emoji(&name),
                                description: describe_tool_use(&name, &input),
                            });
                        }
                        ContentBlock::Text { text } => {
                            self.text.push_str(&text);
                            self.text.push('\n');
                            let snippet = first_line(&text, 60);
                            if !snippet.is_empty() {
                                activities.push(Activity::Thinking(snippet));
                            }
                        }
                        ContentBlock::Other => {}
                    }
                }
            }
            StreamEvent::Result {
                result, is_error, ..
            } => {
                self.result = result;
                self.is_error = is_error;
            }
            StreamEvent::User { .. } | StreamEvent::System { .. } | StreamEvent::Other => {}
        }
        activities
    }

    /// The final result when Claude reported one, else all text seen.
    pub fn output(&self) -> &str {
        self.result.as_deref().unwrap_or(&self.text)
    }

    /// All assistant text plus the final result, for verdict scanning.
    pub fn full_text(&self) -> String {
        match &self.result {
            Some(result) => format!("{}\n{}", self.text, result),
            None => self.text.clone(),
        }
    }

    pub fn is_error(&self) -> bool {
        self.is_error
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }
}

/// Human-readable description of a tool call.
pub fn describe_tool_use(name: &str, input: &Value) -> String {
    let field = |key: &str| input.get(key).and_then(|v| v.as_str());
    match name {
        "Read" | "Write" | "Edit" => {
            let verb = match name {
                "Read" => "Reading",
                "Write" => "Creating",
                _ => "Editing",
            };
            let path = field("file_path")
                .map(shorten_path)
                .unwrap_or_else(|| "file".to_string());
            format!("{}: {}", verb, path)
        }
        "Bash" => format!(
            "Running: {}",
            field("command")
                .map(|c| truncate_chars(c, 40))
                .unwrap_or_else(|| "command".to_string())
        ),
        "Glob" => format!("Searching: {}", field("pattern").unwrap_or("*")),
        "Grep" => format!(
            "Grep: {}",
            field("pattern")
                .map(|p| truncate_chars(p, 30))
                .unwrap_or_else(|| "pattern".to_string())
        ),
        "Task" => format!("Agent: {}", field("description").unwrap_or("subagent")),
        _ => name.to_string(),
    }
}

pub fn tool_emoji(name: &str) -> &'static str {
    match name {
        "Read" => "\u{1F4D6}",
        "Write" => "\u{1F4DD}",
        "Edit" => "\u{270F}\u{FE0F}",
        "Bash" => "\u{2699}\u{FE0F}",
        "Glob" => "\u{1F50D}",
        "Grep" => "\u{1F50E}",
        "Task" => "\u{1F916}",
        _ => "\u{1F527}",
    }
}

fn shorten_path(path: &str) -> String {
    let parts: Vec<&str> = path.split('/').collect();
    if parts.len() <= 2 {
        path.to_string()
    } else {
        parts[parts.len() - 2..].join("/")
    }
}

fn first_line(text: &str, max_chars: usize) -> String {
    truncate_chars(text.lines().next().unwrap_or(text).trim(), max_chars)
}
