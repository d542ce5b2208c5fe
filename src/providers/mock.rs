/*!
 * Mock provider implementations for testing.
 *
 * This module provides scripted collaborators that simulate provider behaviour
 * without any external calls:
 * - `ScriptedModel` - answers generation requests from a closure or a queue
 * - `MockTranscriber` - produces evenly spaced segments per clip
 * - `InMemoryMedia` - synthetic decoded audio with optional silent regions
 */

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use crate::errors::ProviderError;
use crate::providers::{
    AudioBuffer, AudioClip, GenerateRequest, GenerativeModel, MediaInfo, MediaService, TranscriptSegment, Transcriber,
};

/// Closure answering a generation request; the second argument is the zero-based call number
pub type Responder = Arc<dyn Fn(&GenerateRequest, usize) -> Result<String, ProviderError> + Send + Sync>;

/// Scripted generative model
pub struct ScriptedModel {
    responder: Responder,
    calls: AtomicUsize,
    requests: Mutex<Vec<GenerateRequest>>,
    delay: Option<Duration>,
}

impl fmt::Debug for ScriptedModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScriptedModel")
            .field("calls", &self.calls.load(Ordering::SeqCst))
            .finish()
    }
}

impl ScriptedModel {
    /// Create a model answering with the given closure
    pub fn new<F>(responder: F) -> Self
    where
        F: Fn(&GenerateRequest, usize) -> Result<String, ProviderError> + Send + Sync + 'static,
    {
        Self {
            responder: Arc::new(responder),
            calls: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
            delay: None,
        }
    }

    /// Always answer with the same text
    pub fn replying(text: &str) -> Self {
        let text = text.to_string();
        Self::new(move |_, _| Ok(text.clone()))
    }

    /// Answer from a queue; the last entry repeats once the queue is drained
    pub fn sequence(responses: Vec<Result<String, ProviderError>>) -> Self {
        let queue = Mutex::new(VecDeque::from(responses));
        Self::new(move |_, _| {
            let mut queue = queue.lock();
            match queue.len() {
                0 => Err(ProviderError::RequestFailed("script exhausted".into())),
                1 => queue[0].clone(),
                _ => queue.pop_front().unwrap_or_else(|| Err(ProviderError::RequestFailed("script exhausted".into()))),
            }
        })
    }

    /// Always fail with the given error
    pub fn failing(error: ProviderError) -> Self {
        Self::new(move |_, _| Err(error.clone()))
    }

    /// Sleep before answering each request
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Number of requests received
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Copies of all requests received so far
    pub fn requests(&self) -> Vec<GenerateRequest> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl GenerativeModel for ScriptedModel {
    async fn generate(&self, request: GenerateRequest) -> Result<String, ProviderError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().push(request.clone());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        (self.responder)(&request, call)
    }
}

/// Closure answering a transcription request
pub type TranscriptResponder = Arc<dyn Fn(&AudioClip) -> Result<Vec<TranscriptSegment>, ProviderError> + Send + Sync>;

/// Scripted transcription engine
pub struct MockTranscriber {
    responder: TranscriptResponder,
    calls: AtomicUsize,
}

impl fmt::Debug for MockTranscriber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MockTranscriber")
            .field("calls", &self.calls.load(Ordering::SeqCst))
            .finish()
    }
}

impl MockTranscriber {
    /// Create a transcriber answering with the given closure
    pub fn new<F>(responder: F) -> Self
    where
        F: Fn(&AudioClip) -> Result<Vec<TranscriptSegment>, ProviderError> + Send + Sync + 'static,
    {
        Self { responder: Arc::new(responder), calls: AtomicUsize::new(0) }
    }

    /// Produce `count` evenly spaced segments per clip, text tagged with the clip start
    pub fn evenly_spaced(count: usize) -> Self {
        Self::new(move |clip| {
            let span = clip.duration() / count.max(1) as f64;
            Ok((0..count)
                .map(|k| TranscriptSegment {
                    start: k as f64 * span,
                    end: k as f64 * span + span * 0.8,
                    text: format!("clip {} line {}", clip.start as u64, k),
                })
                .collect())
        })
    }

    /// Number of clips transcribed
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transcriber for MockTranscriber {
    async fn transcribe(&self, clip: &AudioClip, _model_id: &str) -> Result<Vec<TranscriptSegment>, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        (self.responder)(clip)
    }
}

/// Synthetic media source with a fixed duration
#[derive(Debug, Clone)]
pub struct InMemoryMedia {
    duration: f64,
    sample_rate: u32,
    silences: Vec<(f64, f64)>,
    decode_calls: Arc<AtomicUsize>,
}

impl InMemoryMedia {
    /// Media of the given length in seconds; audio is loud everywhere
    pub fn new(duration: f64) -> Self {
        Self { duration, sample_rate: 100, silences: Vec::new(), decode_calls: Arc::new(AtomicUsize::new(0)) }
    }

    /// Mark `[start, end)` (seconds) as silent in the decoded buffer
    pub fn with_silence(mut self, start: f64, end: f64) -> Self {
        self.silences.push((start, end));
        self
    }

    /// Number of decode calls made
    pub fn decode_count(&self) -> usize {
        self.decode_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MediaService for InMemoryMedia {
    async fn probe(&self, _path: &Path) -> Result<MediaInfo, ProviderError> {
        Ok(MediaInfo { duration: self.duration, width: None, height: None, codec: Some("pcm".into()) })
    }

    async fn decode_audio(&self, _path: &Path) -> Result<AudioBuffer, ProviderError> {
        self.decode_calls.fetch_add(1, Ordering::SeqCst);
        let total = (self.duration * self.sample_rate as f64).round() as usize;
        let samples = (0..total)
            .map(|i| {
                let t = i as f64 / self.sample_rate as f64;
                let silent = self.silences.iter().any(|(s, e)| t >= *s && t < *e);
                if silent { 0.0 } else if i % 2 == 0 { 0.5 } else { -0.5 }
            })
            .collect();
        Ok(AudioBuffer::new(self.sample_rate, samples))
    }

    async fn slice_audio(&self, audio: &AudioBuffer, start: f64, end: f64) -> Result<AudioClip, ProviderError> {
        let start = start.max(0.0);
        let end = end.min(audio.duration());
        if end <= start {
            return Err(ProviderError::RequestFailed(format!("empty slice {:.2}-{:.2}", start, end)));
        }
        Ok(AudioClip {
            start,
            end,
            mime_type: "audio/wav".into(),
            data: Bytes::from(format!("{:.3}-{:.3}", start, end)),
        })
    }
}
