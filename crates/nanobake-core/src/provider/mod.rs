//! Generation provider integration
//!
//! This module provides:
//! - Wire types for the Gemini `generateContent` method
//! - A streaming HTTP transport with the credential sent as a header

mod transport;
mod types;

pub use transport::{API_KEY_HEADER, ByteStream, HttpTransport, StreamingResponse, Transport};
pub use types::{
    Candidate, Content, GenerateContentConfig, GenerateContentRequest, GenerateContentResponse,
    ImageConfig, InlineData, Part, PromptFeedback,
};
