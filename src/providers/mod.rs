/*!
 * Collaborator interfaces used by the pipeline.
 *
 * The pipeline never talks to a network or spawns a media process itself.
 * It is driven through three traits:
 * - `GenerativeModel`: text (+ optional inline audio) in, raw text out
 * - `Transcriber`: audio slice in, timed segments out
 * - `MediaService`: probing, one-time audio decoding and slicing
 *
 * `mock` contains scripted implementations used by the test suite.
 */

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt::Debug;
use std::path::Path;
use std::sync::Arc;

use crate::errors::ProviderError;

pub mod mock;

/// Who produced a conversation turn
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    User,
    Model,
}

/// An encoded slice of audio ready to be sent inline to a provider
#[derive(Debug, Clone, PartialEq)]
pub struct AudioClip {
    /// Absolute start of the slice in the source media (seconds)
    pub start: f64,
    /// Absolute end of the slice in the source media (seconds)
    pub end: f64,
    /// MIME type of `data`
    pub mime_type: String,
    /// Encoded audio
    pub data: Bytes,
}

impl AudioClip {
    /// Length of the clip in seconds
    pub fn duration(&self) -> f64 {
        (self.end - self.start).max(0.0)
    }
}

/// A piece of a conversation turn
#[derive(Debug, Clone, PartialEq)]
pub enum ContentPart {
    Text(String),
    InlineAudio(AudioClip),
}

/// One conversation turn
#[derive(Debug, Clone, PartialEq)]
pub struct ChatTurn {
    pub role: Role,
    pub parts: Vec<ContentPart>,
}

impl ChatTurn {
    /// A user turn with a single text part
    pub fn user_text(text: impl Into<String>) -> Self {
        Self { role: Role::User, parts: vec![ContentPart::Text(text.into())] }
    }

    /// A model turn with a single text part
    pub fn model_text(text: impl Into<String>) -> Self {
        Self { role: Role::Model, parts: vec![ContentPart::Text(text.into())] }
    }

    /// Concatenated text of all text parts
    pub fn text(&self) -> String {
        self.parts
            .iter()
            .filter_map(|p| match p {
                ContentPart::Text(t) => Some(t.as_str()),
                ContentPart::InlineAudio(_) => None,
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Whether this turn carries inline audio
    pub fn has_audio(&self) -> bool {
        self.parts.iter().any(|p| matches!(p, ContentPart::InlineAudio(_)))
    }
}

/// A request to a generative model
#[derive(Debug, Clone, PartialEq)]
pub struct GenerateRequest {
    /// Model name to use
    pub model: String,
    /// System instruction
    pub system_instruction: String,
    /// Conversation so far; the last turn is the user's request
    pub turns: Vec<ChatTurn>,
    /// JSON schema the response should follow
    pub response_schema: Option<serde_json::Value>,
}

impl GenerateRequest {
    /// A single-turn request
    pub fn new(model: &str, system_instruction: impl Into<String>, user_parts: Vec<ContentPart>) -> Self {
        Self {
            model: model.to_string(),
            system_instruction: system_instruction.into(),
            turns: vec![ChatTurn { role: Role::User, parts: user_parts }],
            response_schema: None,
        }
    }

    /// Attach a response schema
    pub fn with_schema(mut self, schema: serde_json::Value) -> Self {
        self.response_schema = Some(schema);
        self
    }

    /// Text of the first user turn
    pub fn prompt_text(&self) -> String {
        self.turns.first().map(ChatTurn::text).unwrap_or_default()
    }

    /// Whether any turn carries inline audio
    pub fn has_audio(&self) -> bool {
        self.turns.iter().any(ChatTurn::has_audio)
    }
}

/// A timed segment from a transcription engine, relative to the clip start
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptSegment {
    pub start: f64,
    pub end: f64,
    pub text: String,
}

/// Result of probing a media file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaInfo {
    pub duration: f64,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub codec: Option<String>,
}

/// Decoded mono PCM kept in memory for the whole job
#[derive(Debug, Clone)]
pub struct AudioBuffer {
    pub sample_rate: u32,
    pub samples: Arc<[f32]>,
}

impl AudioBuffer {
    /// Create a buffer from mono samples
    pub fn new(sample_rate: u32, samples: Vec<f32>) -> Self {
        Self { sample_rate, samples: samples.into() }
    }

    /// Length in seconds
    pub fn duration(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f64 / self.sample_rate as f64
    }
}

/// Common trait for generative model adapters
#[async_trait]
pub trait GenerativeModel: Send + Sync + Debug {
    /// Generate raw text for the request
    ///
    /// # Arguments
    /// * `request` - System instruction, conversation turns and optional schema
    ///
    /// # Returns
    /// * `Result<String, ProviderError>` - Raw model text or an error
    async fn generate(&self, request: GenerateRequest) -> Result<String, ProviderError>;
}

/// Common trait for transcription engines (cloud or local)
#[async_trait]
pub trait Transcriber: Send + Sync + Debug {
    /// Transcribe a clip; segment times are relative to the clip start
    async fn transcribe(&self, clip: &AudioClip, model_id: &str) -> Result<Vec<TranscriptSegment>, ProviderError>;
}

/// Media collaborator: probing, decoding and slicing
#[async_trait]
pub trait MediaService: Send + Sync + Debug {
    /// Probe duration and stream properties
    async fn probe(&self, path: &Path) -> Result<MediaInfo, ProviderError>;

    /// Decode the audio track once into memory
    async fn decode_audio(&self, path: &Path) -> Result<AudioBuffer, ProviderError>;

    /// Encode the `[start, end)` range (seconds) of a decoded buffer
    async fn slice_audio(&self, audio: &AudioBuffer, start: f64, end: f64) -> Result<AudioClip, ProviderError>;
}
