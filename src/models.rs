//! Core data models used throughout Draftsmith.
//!
//! These types represent the outlines, sections, documents, and knowledge
//! base records that flow between the generators, the orchestrator, and
//! the store. Field names serialize in camelCase so that model-produced
//! outline JSON (`subSteps`) maps directly onto [`Section`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Per-document generation settings, snapshotted when the outline is made.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    pub tone: String,
    pub target_words: u32,
    #[serde(default)]
    pub allowed_elements: Vec<String>,
    #[serde(default)]
    pub denied_elements: Vec<String>,
    /// Local knowledge base id to blend into prompts.
    #[serde(default)]
    pub knowledge_base: Option<String>,
    /// Overrides `[generation] model` for this document.
    #[serde(default)]
    pub model: Option<String>,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            tone: "neutral".to_string(),
            target_words: 1200,
            allowed_elements: Vec::new(),
            denied_elements: Vec::new(),
            knowledge_base: None,
            model: None,
        }
    }
}

/// One unit of document structure with optional generated prose.
///
/// `content` and `word_count` are only changed through
/// [`set_content`](Section::set_content) and
/// [`clear_content`](Section::clear_content), which keep them paired.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Section {
    pub id: String,
    pub title: String,
    pub role: String,
    #[serde(default)]
    pub sub_steps: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cues: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    word_count: Option<u32>,
}

impl Section {
    pub fn new(
        id: impl Into<String>,
        title: impl Into<String>,
        role: impl Into<String>,
        sub_steps: Vec<String>,
    ) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            role: role.into(),
            sub_steps,
            cues: None,
            content: None,
            word_count: None,
        }
    }

    pub fn content(&self) -> Option<&str> {
        self.content.as_deref()
    }

    pub fn word_count(&self) -> Option<u32> {
        self.word_count
    }

    pub fn has_content(&self) -> bool {
        self.content.is_some()
    }

    pub fn set_content(&mut self, content: String, word_count: u32) {
        self.content = Some(content);
        self.word_count = Some(word_count);
    }

    pub fn clear_content(&mut self) {
        self.content = None;
        self.word_count = None;
    }

    /// Builder used by tests and by manual edits.
    pub fn with_content(mut self, content: impl Into<String>) -> Self {
        let content = content.into();
        let words = crate::section::word_count(&content);
        self.set_content(content, words);
        self
    }
}

/// Title plus ordered sections: the document skeleton.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Outline {
    pub title: String,
    pub sections: Vec<Section>,
}

/// A document under authoring, persisted as a whole after every settled change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Document {
    pub id: String,
    pub prompt: String,
    pub outline: Outline,
    pub config: GenerationConfig,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Vendor response id of the last completed call, reused for context continuation.
    #[serde(default)]
    pub last_response_id: Option<String>,
}

impl Document {
    pub fn new(prompt: impl Into<String>, outline: Outline, config: GenerationConfig) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            prompt: prompt.into(),
            outline,
            config,
            created_at: now,
            updated_at: now,
            last_response_id: None,
        }
    }

    pub fn sections(&self) -> &[Section] {
        &self.outline.sections
    }

    pub fn section_index(&self, id: &str) -> Option<usize> {
        self.outline.sections.iter().position(|s| s.id == id)
    }

    /// Indices of sections still lacking content, in outline order.
    pub fn pending_sections(&self) -> Vec<usize> {
        self.outline
            .sections
            .iter()
            .enumerate()
            .filter(|(_, s)| !s.has_content())
            .map(|(i, _)| i)
            .collect()
    }

    /// Sections with content strictly before `index`, in outline order.
    pub fn completed_before(&self, index: usize) -> Vec<Section> {
        self.outline
            .sections
            .iter()
            .take(index)
            .filter(|s| s.has_content())
            .cloned()
            .collect()
    }

    pub fn is_complete(&self) -> bool {
        self.outline.sections.iter().all(Section::has_content)
    }

    pub fn total_words(&self) -> u32 {
        self.outline
            .sections
            .iter()
            .filter_map(Section::word_count)
            .sum()
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

/// Vendor prompt-cache usage for one or more calls. Display only.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheMetrics {
    pub cached_tokens: u64,
    pub total_tokens: u64,
}

impl CacheMetrics {
    pub fn hit_ratio(&self) -> f64 {
        if self.total_tokens == 0 {
            0.0
        } else {
            self.cached_tokens as f64 / self.total_tokens as f64
        }
    }

    pub fn add(&mut self, other: &CacheMetrics) {
        self.cached_tokens += other.cached_tokens;
        self.total_tokens += other.total_tokens;
    }
}

/// Local record of a vendor-hosted vector store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KnowledgeBase {
    pub id: String,
    pub name: String,
    pub vector_store_id: String,
    #[serde(default)]
    pub files: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl KnowledgeBase {
    pub fn new(name: impl Into<String>, vector_store_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            vector_store_id: vector_store_id.into(),
            files: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }
}

/// A ranked retrieval hit from a knowledge base.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snippet {
    pub filename: String,
    pub score: f64,
    pub chunks: Vec<String>,
}
