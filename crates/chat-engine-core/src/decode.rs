//! Structured-output decoders for classification results.

use serde_json::Value;

use crate::error::ChainError;
use crate::status::ChainOperation;
use crate::traits::OutputDecoder;

/// Decodes model output into a JSON object.
///
/// Models frequently wrap JSON in a markdown fence or add a sentence around
/// it, so the decoder strips fences and parses the outermost `{ ... }` span.
/// Anything that does not yield an object is an
/// [`OutputParse`](ChainError::OutputParse) error attributed to CLASSIFY;
/// the chain re-attributes it to whichever step ran the decoder.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonObjectDecoder;

impl OutputDecoder for JsonObjectDecoder {
    fn decode(&self, raw: &str) -> Result<Value, ChainError> {
        let text = strip_code_fence(raw.trim());

        let (start, end) = match (text.find('{'), text.rfind('}')) {
            (Some(s), Some(e)) if s < e => (s, e),
            _ => {
                return Err(ChainError::OutputParse {
                    operation: ChainOperation::Classify,
                    message: format!("no JSON object found in output: {}", truncate(raw)),
                })
            }
        };

        let value: Value =
            serde_json::from_str(&text[start..=end]).map_err(|e| ChainError::OutputParse {
                operation: ChainOperation::Classify,
                message: format!("{} in output: {}", e, truncate(raw)),
            })?;

        if !value.is_object() {
            return Err(ChainError::OutputParse {
                operation: ChainOperation::Classify,
                message: "expected a JSON object".to_string(),
            });
        }
        Ok(value)
    }

    fn describe(&self) -> &str {
        "json_object"
    }
}

fn strip_code_fence(text: &str) -> &str {
    let Some(rest) = text.strip_prefix("```") else {
        return text;
    };
    // drop the info string (e.g. "json") on the opening fence line
    let body = rest.split_once('\n').map(|(_, b)| b).unwrap_or(rest);
    body.trim_end().strip_suffix("```").unwrap_or(body).trim()
}

fn truncate(raw: &str) -> String {
    const MAX: usize = 200;
    if raw.chars().count() <= MAX {
        raw.to_string()
    } else {
        let head: String = raw.chars().take(MAX).collect();
        format!("{}...", head)
    }
}
