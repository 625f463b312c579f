// ABOUTME: Normalized project brief submitted to start a build
// ABOUTME: Renders the brief as the first message of a session and serializes it as the job payload

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A normalized brief. Anything beyond title and summary is carried in
/// `details` and forwarded to the backend untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Brief {
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(flatten)]
    pub details: Map<String, Value>,
}

impl Brief {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Default::default()
        }
    }

    pub fn with_summary(mut self, summary: impl Into<String>) -> Self {
        self.summary = Some(summary.into());
        self
    }

    pub fn with_detail(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.details.insert(key.into(), value.into());
        self
    }

    /// Job payload for `POST /jobs/init`.
    pub fn to_payload(&self) -> Value {
        let mut payload = self.details.clone();
        payload.insert("title".to_string(), Value::String(self.title.clone()));
        if let Some(summary) = &self.summary {
            payload.insert("summary".to_string(), Value::String(summary.clone()));
        }
        Value::Object(payload)
    }

    /// Markdown rendering used as the opening message of a session.
    pub fn render(&self) -> String {
        let mut out = format!("# {}\n", self.title.trim());
        if let Some(summary) = self.summary.as_deref().map(str::trim) {
            if !summary.is_empty() {
                out.push('\n');
                out.push_str(summary);
                out.push('\n');
            }
        }

        let lines: Vec<String> = self
            .details
            .iter()
            .filter_map(|(key, value)| {
                render_value(value).map(|text| format!("- **{}**: {}", humanize(key), text))
            })
            .collect();
        if !lines.is_empty() {
            out.push('\n');
            out.push_str(&lines.join("\n"));
            out.push('\n');
        }
        out
    }
}

fn humanize(key: &str) -> String {
    let spaced = key.replace(['_', '-'], " ");
    let mut chars = spaced.trim().chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

fn render_value(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) if s.trim().is_empty() => None,
        Value::String(s) => Some(s.trim().to_string()),
        Value::Array(items) if items.is_empty() => None,
        Value::Array(items) => Some(
            items
                .iter()
                .filter_map(render_value)
                .collect::<Vec<_>>()
                .join(", "),
        ),
        other => Some(other.to_string()),
    }
}
