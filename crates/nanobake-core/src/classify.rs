//! Response classification
//!
//! Maps a `generateContent` response body onto the outcomes the engine
//! cares about. Only [`Classification::Image`] completes a job; every other
//! variant is treated as a failure of the endpoint that produced it.

use std::fmt;

use serde_json::Value;

use crate::job::GeneratedImage;
use crate::provider::GenerateContentResponse;

/// MIME type assumed when an inline part omits one
const DEFAULT_IMAGE_MIME: &str = "image/png";

const RAW_PREVIEW_CHARS: usize = 200;
const TEXT_PREVIEW_CHARS: usize = 100;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classification {
    /// An image, plus any text that accompanied it
    Image {
        image: GeneratedImage,
        thinking: Option<String>,
    },
    /// The model answered with text only
    TextOnly { preview: String },
    /// The prompt was rejected by the provider's safety filter
    SafetyBlocked { reason: String },
    /// No candidates and no block reason
    Empty { raw: String },
    /// Candidates without any usable part
    Malformed,
}

impl fmt::Display for Classification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Image { image, .. } => write!(f, "image ({})", image.mime_type),
            Self::TextOnly { preview } => {
                write!(f, "No image data in response (model replied: {}...)", preview)
            }
            Self::SafetyBlocked { reason } => {
                write!(f, "Content blocked by safety policy: {}", reason)
            }
            Self::Empty { raw } => write!(f, "No result generated (response: {})", raw),
            Self::Malformed => write!(f, "No image data in response"),
        }
    }
}

/// Classify a provider response
///
/// `body` is the bytes `response` was decoded from; an [`Classification::Empty`]
/// outcome previews it so fields the typed response drops stay visible.
pub fn classify(response: &GenerateContentResponse, body: &[u8]) -> Classification {
    let Some(candidate) = response.candidates.first() else {
        let block_reason = response
            .prompt_feedback
            .as_ref()
            .and_then(|f| f.block_reason.as_deref())
            .filter(|r| !r.is_empty());

        return match block_reason {
            Some(reason) => Classification::SafetyBlocked {
                reason: reason.to_string(),
            },
            None => Classification::Empty {
                raw: raw_preview(body),
            },
        };
    };

    let parts = candidate
        .content
        .as_ref()
        .map(|c| c.parts.as_slice())
        .unwrap_or_default();

    let mut image = None;
    let mut texts: Vec<&str> = Vec::new();

    for part in parts {
        match &part.inline_data {
            Some(inline) if !inline.data.is_empty() => {
                // A later image supersedes an earlier one.
                image = Some(GeneratedImage {
                    mime_type: inline
                        .mime_type
                        .clone()
                        .unwrap_or_else(|| DEFAULT_IMAGE_MIME.to_string()),
                    data: inline.data.clone(),
                });
            }
            _ => {
                if let Some(text) = part.text.as_deref() {
                    texts.push(text);
                }
            }
        }
    }

    match (image, texts.first()) {
        (Some(image), _) => Classification::Image {
            image,
            thinking: (!texts.is_empty()).then(|| texts.join("\n")),
        },
        (None, Some(first)) => Classification::TextOnly {
            preview: first.chars().take(TEXT_PREVIEW_CHARS).collect(),
        },
        (None, None) => Classification::Malformed,
    }
}

fn raw_preview(body: &[u8]) -> String {
    // Compacted when it is JSON, otherwise as received
    let raw = match serde_json::from_slice::<Value>(body) {
        Ok(value) => value.to_string(),
        Err(_) => String::from_utf8_lossy(body).into_owned(),
    };
    raw.chars().take(RAW_PREVIEW_CHARS).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn classify_json(value: serde_json::Value) -> Classification {
        let body = serde_json::to_vec(&value).unwrap();
        let response: GenerateContentResponse = serde_json::from_slice(&body).unwrap();
        classify(&response, &body)
    }

    #[test]
    fn test_image_with_text() {
        let classification = classify_json(json!({
            "candidates": [{"content": {"parts": [
                {"text": "Sketching first"},
                {"inlineData": {"mimeType": "image/jpeg", "data": "/9j/AAA"}},
                {"text": "Done"}
            ]}}]
        }));

        match classification {
            Classification::Image { image, thinking } => {
                assert_eq!(image.mime_type, "image/jpeg");
                assert_eq!(image.data, "/9j/AAA");
                assert_eq!(thinking.as_deref(), Some("Sketching first\nDone"));
            }
            other => panic!("Expected image, got {:?}", other),
        }
    }

    #[test]
    fn test_image_defaults_mime_and_last_wins() {
        let classification = classify_json(json!({
            "candidates": [{"content": {"parts": [
                {"inlineData": {"mimeType": "image/png", "data": "FIRST"}},
                {"inlineData": {"data": "SECOND"}}
            ]}}]
        }));

        match classification {
            Classification::Image { image, thinking } => {
                assert_eq!(image.data, "SECOND");
                assert_eq!(image.mime_type, "image/png");
                assert!(thinking.is_none());
            }
            other => panic!("Expected image, got {:?}", other),
        }
    }

    #[test]
    fn test_safety_blocked() {
        let classification = classify_json(json!({"promptFeedback": {"blockReason": "SAFETY"}}));
        assert_eq!(
            classification,
            Classification::SafetyBlocked {
                reason: "SAFETY".to_string()
            }
        );
        assert!(classification.to_string().contains("SAFETY"));
    }

    #[test]
    fn test_empty_carries_truncated_raw() {
        let classification = classify_json(json!({
            "candidates": [],
            "modelVersion": "x".repeat(500)
        }));

        match classification {
            Classification::Empty { raw } => {
                assert!(raw.contains("modelVersion"));
                assert_eq!(raw.chars().count(), 200);
            }
            other => panic!("Expected empty, got {:?}", other),
        }
    }

    #[test]
    fn test_empty_block_reason_is_empty() {
        let classification = classify_json(json!({"promptFeedback": {"blockReason": ""}}));
        assert!(matches!(classification, Classification::Empty { .. }));
    }

    #[test]
    fn test_empty_keeps_unmodelled_feedback_fields() {
        let classification = classify_json(json!({
            "candidates": [],
            "promptFeedback": {"safetyRatings": [
                {"category": "HARM_CATEGORY_DANGEROUS_CONTENT", "probability": "LOW"}
            ]}
        }));

        match classification {
            Classification::Empty { raw } => {
                assert!(raw.contains("\"candidates\":[]"));
                assert!(raw.contains("safetyRatings"));
                assert!(raw.contains("HARM_CATEGORY_DANGEROUS_CONTENT"));
            }
            other => panic!("Expected empty, got {:?}", other),
        }
    }

    #[test]
    fn test_empty_preview_of_pretty_body_is_compact() {
        let body = b"{\n  \"candidates\": [],\n  \"modelVersion\": \"v1\"\n}\n";
        let response: GenerateContentResponse = serde_json::from_slice(body).unwrap();

        assert_eq!(
            classify(&response, body),
            Classification::Empty {
                raw: r#"{"candidates":[],"modelVersion":"v1"}"#.to_string()
            }
        );
    }

    #[test]
    fn test_text_only() {
        let long = "I can't draw that. ".repeat(20);
        let classification = classify_json(json!({
            "candidates": [{"content": {"parts": [{"text": long}, {"text": "second"}]}}]
        }));

        match classification {
            Classification::TextOnly { preview } => {
                assert_eq!(preview.chars().count(), 100);
                assert!(preview.starts_with("I can't draw that."));
            }
            other => panic!("Expected text only, got {:?}", other),
        }
    }

    #[test]
    fn test_malformed() {
        let no_parts = classify_json(json!({"candidates": [{"content": {"parts": []}}]}));
        assert_eq!(no_parts, Classification::Malformed);

        let no_content = classify_json(json!({"candidates": [{"finishReason": "OTHER"}]}));
        assert_eq!(no_content, Classification::Malformed);

        let empty_inline = classify_json(json!({
            "candidates": [{"content": {"parts": [{"inlineData": {"mimeType": "image/png", "data": ""}}]}}]
        }));
        assert_eq!(empty_inline, Classification::Malformed);
    }

    #[test]
    fn test_only_first_candidate_considered() {
        let classification = classify_json(json!({
            "candidates": [
                {"content": {"parts": [{"text": "no"}]}},
                {"content": {"parts": [{"inlineData": {"data": "IMG"}}]}}
            ]
        }));
        assert!(matches!(classification, Classification::TextOnly { .. }));
    }
}
