//! Generation requests and their wire payloads

use std::fmt;
use std::path::Path;

use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::ModelNames;
use crate::error::{Error, Result};
use crate::provider::{GenerateContentConfig, GenerateContentRequest, ImageConfig, Part};

/// Model selector exposed to callers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ModelChoice {
    /// Quick, cheaper image model
    Fast,
    /// Higher quality model; the only one honouring size hints
    #[default]
    Pro,
}

impl ModelChoice {
    /// Parse a selector; anything unrecognised selects [`ModelChoice::Pro`]
    pub fn from_selector(selector: &str) -> Self {
        match selector.trim().to_lowercase().as_str() {
            "fast" | "nano-banana" => Self::Fast,
            _ => Self::Pro,
        }
    }

    /// Upstream model name for this selector
    pub fn model_name<'a>(&self, names: &'a ModelNames) -> &'a str {
        match self {
            Self::Fast => &names.fast,
            Self::Pro => &names.pro,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Fast => "fast",
            Self::Pro => "pro",
        }
    }
}

impl From<String> for ModelChoice {
    fn from(value: String) -> Self {
        Self::from_selector(&value)
    }
}

impl From<ModelChoice> for String {
    fn from(value: ModelChoice) -> Self {
        value.as_str().to_string()
    }
}

impl fmt::Display for ModelChoice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Output resolution hint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SizeHint {
    #[serde(rename = "1K")]
    OneK,
    #[serde(rename = "2K")]
    TwoK,
    #[serde(rename = "4K")]
    FourK,
}

impl SizeHint {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_uppercase().as_str() {
            "1K" => Some(Self::OneK),
            "2K" => Some(Self::TwoK),
            "4K" => Some(Self::FourK),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OneK => "1K",
            Self::TwoK => "2K",
            Self::FourK => "4K",
        }
    }
}

impl fmt::Display for SizeHint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A reference image as MIME type plus base64 payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferenceImage {
    pub mime_type: String,
    pub data: String,
}

impl ReferenceImage {
    /// Parse `data:image/<subtype>;base64,<payload>`
    ///
    /// Returns `None` for anything that does not match.
    pub fn from_data_url(url: &str) -> Option<Self> {
        let rest = url.strip_prefix("data:")?;
        let (mime_type, data) = rest.split_once(";base64,")?;

        let subtype = mime_type.strip_prefix("image/")?;
        if subtype.is_empty() || !subtype.chars().all(|c| c.is_alphanumeric() || c == '_') {
            return None;
        }
        if data.is_empty() {
            return None;
        }

        Some(Self {
            mime_type: mime_type.to_string(),
            data: data.to_string(),
        })
    }

    /// Encode raw image bytes, sniffing the MIME type from the content
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let format = image::guess_format(bytes)
            .map_err(|e| Error::InvalidInput(format!("Not a recognised image: {}", e)))?;

        Ok(Self {
            mime_type: format.to_mime_type().to_string(),
            data: BASE64.encode(bytes),
        })
    }

    /// Read and encode an image file
    pub fn from_file(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path).map_err(|e| {
            Error::InvalidInput(format!("Cannot read {}: {}", path.display(), e))
        })?;
        Self::from_bytes(&bytes)
    }
}

/// A caller's image generation request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationRequest {
    pub prompt: String,
    #[serde(default)]
    pub model: ModelChoice,
    #[serde(default)]
    pub reference_images: Vec<ReferenceImage>,
    #[serde(default)]
    pub size: Option<SizeHint>,
    #[serde(default)]
    pub aspect_ratio: Option<String>,
}

impl GenerationRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            model: ModelChoice::default(),
            reference_images: Vec::new(),
            size: None,
            aspect_ratio: None,
        }
    }

    pub fn with_model(mut self, model: ModelChoice) -> Self {
        self.model = model;
        self
    }

    pub fn with_reference(mut self, image: ReferenceImage) -> Self {
        self.reference_images.push(image);
        self
    }

    /// Add a reference image given as a data URL; malformed URLs are skipped
    pub fn with_reference_data_url(mut self, url: &str) -> Self {
        match ReferenceImage::from_data_url(url) {
            Some(image) => self.reference_images.push(image),
            None => debug!(prefix = %url.chars().take(32).collect::<String>(), "Skipping malformed data URL"),
        }
        self
    }

    pub fn with_size(mut self, size: SizeHint) -> Self {
        self.size = Some(size);
        self
    }

    pub fn with_aspect_ratio(mut self, ratio: impl Into<String>) -> Self {
        self.aspect_ratio = Some(ratio.into());
        self
    }

    /// Whether the prompt carries any non-whitespace text
    pub fn has_prompt(&self) -> bool {
        !self.prompt.trim().is_empty()
    }
}

/// Translate a request into the provider payload
///
/// The text part is always present and always last. Each reference image is
/// inserted at the front in supply order, so images end up reversed:
/// `[A, B]` + `T` becomes `[B, A, T]`.
pub fn build_payload(request: &GenerationRequest) -> GenerateContentRequest {
    let mut parts = vec![Part::text(request.prompt.clone())];
    for image in &request.reference_images {
        parts.insert(0, Part::inline(image.mime_type.clone(), image.data.clone()));
    }

    let mut payload = GenerateContentRequest::from_parts(parts);
    payload.generation_config = image_config(request).map(|image_config| GenerateContentConfig {
        image_config: Some(image_config),
    });
    payload
}

fn image_config(request: &GenerationRequest) -> Option<ImageConfig> {
    let aspect_ratio = request
        .aspect_ratio
        .as_deref()
        .map(str::trim)
        .filter(|r| !r.is_empty())
        .map(str::to_string);

    let image_size = match request.model {
        ModelChoice::Pro => request.size.map(|s| s.as_str().to_string()),
        ModelChoice::Fast => None,
    };

    if aspect_ratio.is_none() && image_size.is_none() {
        return None;
    }
    Some(ImageConfig {
        aspect_ratio,
        image_size,
    })
}
