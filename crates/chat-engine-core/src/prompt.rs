//! `{{variable}}` prompt templates.
//!
//! Templates are plain text with double-brace placeholders. Whitespace inside
//! the braces is ignored (`{{ question }}` works). String values are inserted
//! verbatim; any other JSON value is inserted as compact JSON.
//!
//! ```rust
//! use chat_engine_core::prompt::PromptTemplate;
//! use serde_json::json;
//!
//! let t = PromptTemplate::new("Q: {{question}}");
//! let vars = json!({ "question": "why?" });
//! assert_eq!(t.render(vars.as_object().unwrap()).unwrap(), "Q: why?");
//! ```

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::models::ChainValues;

/// Default prompt for rewriting a follow-up question into a standalone one.
pub const DEFAULT_CONDENSE_QUESTION_TEMPLATE: &str = "Given the following conversation and a follow up question, \
rephrase the follow up question to be a standalone question, in its original language.

Chat History:
{{chat_history}}
Follow Up Input: {{question}}
Standalone question:";

/// Default prompt for answering from retrieved context.
pub const DEFAULT_QA_TEMPLATE: &str = "Use the following pieces of context to answer the question at the end. \
If you don't know the answer, just say that you don't know, don't try to make up an answer.

{{context}}

Question: {{question}}
Helpful Answer:";

/// Default prompt for classifying a question into structured JSON.
pub const DEFAULT_CLASSIFY_TEMPLATE: &str = "Classify the question below. Respond only with a JSON object \
containing the keys \"originalLanguage\", \"language\", \"category\", and \"question\" \
(the question translated to English).

Question: {{question}}
JSON:";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PromptTemplate {
    template: String,
}

impl PromptTemplate {
    pub fn new(template: impl Into<String>) -> Self {
        Self {
            template: template.into(),
        }
    }

    pub fn template(&self) -> &str {
        &self.template
    }

    /// Names of all placeholders, in order of first appearance.
    pub fn input_variables(&self) -> Vec<String> {
        let mut names: Vec<String> = Vec::new();
        for segment in segments(&self.template) {
            if let Segment::Variable(name) = segment {
                if !names.iter().any(|n| n == name) {
                    names.push(name.to_string());
                }
            }
        }
        names
    }

    /// Substitute every placeholder from `values`.
    ///
    /// Fails if a placeholder has no value or a brace is left unclosed.
    pub fn render(&self, values: &ChainValues) -> Result<String> {
        if let Some(pos) = unclosed_placeholder(&self.template) {
            bail!("unclosed placeholder at byte {} in prompt template", pos);
        }

        let mut out = String::with_capacity(self.template.len());
        for segment in segments(&self.template) {
            match segment {
                Segment::Text(text) => out.push_str(text),
                Segment::Variable(name) => match values.get(name) {
                    Some(Value::String(s)) => out.push_str(s),
                    Some(other) => out.push_str(&other.to_string()),
                    None => bail!("missing value for prompt variable `{}`", name),
                },
            }
        }
        Ok(out)
    }
}

enum Segment<'a> {
    Text(&'a str),
    Variable(&'a str),
}

fn segments(template: &str) -> Vec<Segment<'_>> {
    let mut out = Vec::new();
    let mut rest = template;
    while let Some(start) = rest.find("{{") {
        let Some(len) = rest[start + 2..].find("}}") else {
            break;
        };
        if start > 0 {
            out.push(Segment::Text(&rest[..start]));
        }
        out.push(Segment::Variable(rest[start + 2..start + 2 + len].trim()));
        rest = &rest[start + 2 + len + 2..];
    }
    if !rest.is_empty() {
        out.push(Segment::Text(rest));
    }
    out
}

fn unclosed_placeholder(template: &str) -> Option<usize> {
    let mut offset = 0;
    let mut rest = template;
    while let Some(start) = rest.find("{{") {
        match rest[start + 2..].find("}}") {
            Some(len) => {
                let consumed = start + 2 + len + 2;
                offset += consumed;
                rest = &rest[consumed..];
            }
            None => return Some(offset + start),
        }
    }
    None
}
