//! Generation progress reporting.
//!
//! Reports observable progress while outlines and sections stream in, so
//! users see tokens as they arrive and know which section is active.
//! Progress is emitted on **stderr** so stdout remains parseable for scripts.

use std::io::Write;
use std::sync::Mutex;

use crate::cancel::StopToken;
use crate::models::CacheMetrics;

/// A single progress event from the generators or the orchestrator.
#[derive(Clone, Debug, PartialEq)]
pub enum GenerationEvent {
    /// Raw outline text as it streams, before the outline is parsed.
    OutlineDelta(String),
    /// A section became the active one.
    SectionStarted {
        index: usize,
        id: String,
        title: String,
    },
    /// Streamed text for the active section.
    Delta { index: usize, text: String },
    /// The active section settled successfully.
    SectionCompleted {
        index: usize,
        id: String,
        word_count: u32,
    },
    /// Vendor cache usage for the call that just finished.
    Usage(CacheMetrics),
}

/// Receives progress events. Implementations write to stderr (human or JSON).
pub trait GenerationObserver: Send + Sync {
    /// Emit a progress event. Called from the generation loop.
    fn on_event(&self, event: &GenerationEvent);
}

/// Human-friendly progress on stderr: section headings followed by the streamed prose.
pub struct StderrProgress;

impl GenerationObserver for StderrProgress {
    fn on_event(&self, event: &GenerationEvent) {
        let text = match event {
            GenerationEvent::OutlineDelta(t) => t.clone(),
            GenerationEvent::SectionStarted { index, title, .. } => {
                format!("\n== [{}] {} ==\n", index + 1, title)
            }
            GenerationEvent::Delta { text, .. } => text.clone(),
            GenerationEvent::SectionCompleted { word_count, .. } => {
                format!("\n-- {} words\n", word_count)
            }
            GenerationEvent::Usage(m) => {
                if m.total_tokens == 0 {
                    return;
                }
                format!(
                    "-- cache: {} / {} tokens ({:.0}%)\n",
                    m.cached_tokens,
                    m.total_tokens,
                    m.hit_ratio() * 100.0
                )
            }
        };
        let mut err = std::io::stderr().lock();
        let _ = err.write_all(text.as_bytes());
        let _ = err.flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl GenerationObserver for JsonProgress {
    fn on_event(&self, event: &GenerationEvent) {
        let obj = match event {
            GenerationEvent::OutlineDelta(text) => serde_json::json!({
                "event": "outline_delta",
                "text": text
            }),
            GenerationEvent::SectionStarted { index, id, title } => serde_json::json!({
                "event": "section_started",
                "index": index,
                "id": id,
                "title": title
            }),
            GenerationEvent::Delta { index, text } => serde_json::json!({
                "event": "delta",
                "index": index,
                "text": text
            }),
            GenerationEvent::SectionCompleted {
                index,
                id,
                word_count,
            } => serde_json::json!({
                "event": "section_completed",
                "index": index,
                "id": id,
                "word_count": word_count
            }),
            GenerationEvent::Usage(m) => serde_json::json!({
                "event": "usage",
                "cached_tokens": m.cached_tokens,
                "total_tokens": m.total_tokens
            }),
        };
        if let Ok(line) = serde_json::to_string(&obj) {
            let _ = writeln!(std::io::stderr().lock(), "{}", line);
        }
    }
}

/// No-op observer when progress is disabled.
pub struct NoProgress;

impl GenerationObserver for NoProgress {
    fn on_event(&self, _event: &GenerationEvent) {}
}

/// Fans one event out to several observers, in order.
pub struct Fanout<'a>(pub Vec<&'a dyn GenerationObserver>);

impl GenerationObserver for Fanout<'_> {
    fn on_event(&self, event: &GenerationEvent) {
        for o in &self.0 {
            o.on_event(event);
        }
    }
}

/// Progress mode for the CLI: off, human (stderr), or JSON (stderr).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ProgressMode {
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// Default: human progress when stderr is a TTY, otherwise off.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "off" => Some(ProgressMode::Off),
            "human" => Some(ProgressMode::Human),
            "json" => Some(ProgressMode::Json),
            _ => None,
        }
    }

    /// Build an observer for this mode.
    pub fn observer(&self) -> Box<dyn GenerationObserver> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}

/// Point-in-time copy of a [`SessionState`].
#[derive(Debug, Default, Clone, PartialEq)]
pub struct SessionSnapshot {
    pub in_progress: bool,
    pub streaming_section: Option<String>,
    pub buffer: String,
}

/// Transient state of one generation session.
///
/// Tracks whether a run is in progress, which section is streaming, and
/// the text streamed so far for it. Never persisted; [`reset`](SessionState::reset)
/// whenever a document is loaded or a new one is started.
#[derive(Debug, Default)]
pub struct SessionState {
    inner: Mutex<SessionSnapshot>,
    stop: StopToken,
}

impl SessionState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop_token(&self) -> &StopToken {
        &self.stop
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.lock().clone()
    }

    /// Mark a run as started.
    pub fn start(&self) {
        self.lock().in_progress = true;
    }

    /// End a run. Returns the state as the run left it, so a section cut off
    /// by a stop or failure is still named, then clears the streaming state.
    pub fn finish(&self) -> SessionSnapshot {
        let mut s = self.lock();
        let last = s.clone();
        s.in_progress = false;
        s.streaming_section = None;
        s.buffer.clear();
        last
    }

    pub fn reset(&self) {
        *self.lock() = SessionSnapshot::default();
        self.stop.reset();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, SessionSnapshot> {
        self.inner.lock().unwrap_or_else(|p| p.into_inner())
    }
}

impl GenerationObserver for SessionState {
    fn on_event(&self, event: &GenerationEvent) {
        let mut s = self.lock();
        match event {
            GenerationEvent::OutlineDelta(text) => s.buffer.push_str(text),
            GenerationEvent::SectionStarted { id, .. } => {
                // Replacing the id keeps at most one section streaming.
                s.streaming_section = Some(id.clone());
                s.buffer.clear();
            }
            GenerationEvent::Delta { text, .. } => s.buffer.push_str(text),
            GenerationEvent::SectionCompleted { id, .. } => {
                if s.streaming_section.as_deref() == Some(id.as_str()) {
                    s.streaming_section = None;
                }
                s.buffer.clear();
            }
            GenerationEvent::Usage(_) => {}
        }
    }
}
