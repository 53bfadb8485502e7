//! Wire types for the `generateContent` method
//!
//! The REST surface is camelCase (`inlineData`, `mimeType`, `promptFeedback`).

use serde::{Deserialize, Deserializer, Serialize};

/// Request body: `{ contents: [{ parts: [...] }], generationConfig? }`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateContentRequest {
    pub contents: Vec<Content>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generation_config: Option<GenerateContentConfig>,
}

impl GenerateContentRequest {
    /// Single-turn request from a list of parts
    pub fn from_parts(parts: Vec<Part>) -> Self {
        Self {
            contents: vec![Content { parts }],
            generation_config: None,
        }
    }

    /// Parts of the first (and only) content entry
    pub fn parts(&self) -> &[Part] {
        self.contents
            .first()
            .map(|c| c.parts.as_slice())
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Content {
    #[serde(default, deserialize_with = "null_as_default")]
    pub parts: Vec<Part>,
}

/// A payload fragment carrying text or inline binary data
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Part {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inline_data: Option<InlineData>,
}

impl Part {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            inline_data: None,
        }
    }

    pub fn inline(mime_type: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            text: None,
            inline_data: Some(InlineData {
                mime_type: Some(mime_type.into()),
                data: data.into(),
            }),
        }
    }
}

/// Base64 payload plus its MIME type
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InlineData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    #[serde(default)]
    pub data: String,
}

/// The request's `generationConfig` object
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateContentConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_config: Option<ImageConfig>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aspect_ratio: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_size: Option<String>,
}

/// Response body: `{ candidates: [...], promptFeedback? }`
///
/// Fields outside this model are ignored; diagnostics read the raw body.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateContentResponse {
    #[serde(
        default,
        deserialize_with = "null_as_default",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub candidates: Vec<Candidate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt_feedback: Option<PromptFeedback>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Candidate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<Content>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptFeedback {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_reason: Option<String>,
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_wire_shape() {
        let request = GenerateContentRequest::from_parts(vec![
            Part::inline("image/png", "AAAA"),
            Part::text("a cat"),
        ]);

        assert_eq!(
            serde_json::to_value(&request).unwrap(),
            json!({
                "contents": [{
                    "parts": [
                        {"inlineData": {"mimeType": "image/png", "data": "AAAA"}},
                        {"text": "a cat"}
                    ]
                }]
            })
        );
    }

    #[test]
    fn test_response_tolerates_nulls_and_extras() {
        let response: GenerateContentResponse = serde_json::from_value(json!({
            "candidates": null,
            "usageMetadata": {"totalTokenCount": 3},
            "promptFeedback": {"safetyRatings": []}
        }))
        .unwrap();

        assert!(response.candidates.is_empty());
        assert!(response.prompt_feedback.unwrap().block_reason.is_none());
    }

    #[test]
    fn test_request_generation_config_wire_name() {
        let mut request = GenerateContentRequest::from_parts(vec![Part::text("a cat")]);
        request.generation_config = Some(GenerateContentConfig {
            image_config: Some(ImageConfig {
                aspect_ratio: Some("16:9".to_string()),
                image_size: None,
            }),
        });

        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(
            value["generationConfig"],
            json!({"imageConfig": {"aspectRatio": "16:9"}})
        );
    }

    #[test]
    fn test_response_parts() {
        let response: GenerateContentResponse = serde_json::from_value(json!({
            "candidates": [{
                "content": {"parts": [
                    {"text": "here you go"},
                    {"inlineData": {"mimeType": "image/jpeg", "data": "/9j/"}}
                ]},
                "finishReason": "STOP"
            }],
            "promptFeedback": {"blockReason": null}
        }))
        .unwrap();

        let parts = &response.candidates[0].content.as_ref().unwrap().parts;
        assert_eq!(parts[0].text.as_deref(), Some("here you go"));
        assert_eq!(
            parts[1].inline_data.as_ref().unwrap().mime_type.as_deref(),
            Some("image/jpeg")
        );
        assert!(response.prompt_feedback.unwrap().block_reason.is_none());
    }
}
