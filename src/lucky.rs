//! "I'm feeling lucky": a whole document from a random premise.
//!
//! [`lucky_setup`] draws a premise, a tone, and a word target; [`run_lucky`]
//! turns that into an outline and then runs the orchestrator over it. The
//! document is saved once the outline exists and again when the run
//! settles, whether it completed, stopped, or failed.

use anyhow::Result;
use rand::Rng;

use crate::backend::GenerationBackend;
use crate::cancel::StopToken;
use crate::error::OrchestratorError;
use crate::models::{Document, GenerationConfig};
use crate::orchestrator::{generate_all, RunOptions, RunSummary};
use crate::outline::{generate_outline, OutlineRequest};
use crate::progress::{GenerationEvent, GenerationObserver};
use crate::store::DocumentStore;

const PREMISES: &[&str] = &[
    "A lighthouse keeper discovers the light has been signalling someone for decades",
    "A beginner's guide to keeping sourdough starter alive through a busy month",
    "The last day of a small-town video rental shop",
    "How a city decides where to plant its trees",
    "Two rival bakers forced to share a kitchen during a festival",
    "A field guide to the sounds of an old house at night",
    "An engineer explains why bridges hum in the wind",
    "A letter to a future self found inside a library book",
    "Planning a week-long walking trip with no car",
    "A retired cartographer maps a town that is not on any map",
];

const TONES: &[&str] = &[
    "warm",
    "playful",
    "suspenseful",
    "matter-of-fact",
    "wistful",
    "enthusiastic",
    "dry and witty",
];

const MIN_WORDS: u32 = 600;
const MAX_WORDS: u32 = 1500;
const WORD_STEP: u32 = 100;

/// Randomly drawn inputs for a lucky run.
#[derive(Debug, Clone, PartialEq)]
pub struct LuckySetup {
    pub premise: String,
    pub tone: String,
    pub target_words: u32,
}

impl LuckySetup {
    /// Generation settings for this setup, layered over `base`.
    pub fn config(&self, base: &GenerationConfig) -> GenerationConfig {
        GenerationConfig {
            tone: self.tone.clone(),
            target_words: self.target_words,
            ..base.clone()
        }
    }
}

pub fn lucky_setup<R: Rng + ?Sized>(rng: &mut R) -> LuckySetup {
    let premise = PREMISES[rng.gen_range(0..PREMISES.len())];
    let tone = TONES[rng.gen_range(0..TONES.len())];
    let steps = (MAX_WORDS - MIN_WORDS) / WORD_STEP;
    let target_words = MIN_WORDS + rng.gen_range(0..=steps) * WORD_STEP;

    LuckySetup {
        premise: premise.to_string(),
        tone: tone.to_string(),
        target_words,
    }
}

/// A lucky document and how its section run ended.
pub struct LuckyRun {
    pub document: Document,
    pub outcome: Result<RunSummary, OrchestratorError>,
}

/// Outline the premise, save, generate every section, save again.
///
/// Returns `Err` only when no document could be created (outline failure
/// or the first save failing). Section run outcomes are reported in
/// [`LuckyRun::outcome`] alongside the partially written document.
pub async fn run_lucky(
    backend: &dyn GenerationBackend,
    store: &dyn DocumentStore,
    setup: &LuckySetup,
    base: &GenerationConfig,
    options: &RunOptions<'_>,
    stop: &StopToken,
    observer: &dyn GenerationObserver,
) -> Result<LuckyRun> {
    let config = setup.config(base);
    let model = config.model.clone().unwrap_or_else(|| options.model.to_string());

    tracing::info!(premise = %setup.premise, tone = %setup.tone, words = setup.target_words, "lucky run");

    let outline = generate_outline(
        backend,
        OutlineRequest {
            config: &config,
            prompt: &setup.premise,
            context: None,
            previous_response_id: None,
            model: &model,
        },
        &mut |text: &str| observer.on_event(&GenerationEvent::OutlineDelta(text.to_string())),
    )
    .await?;

    let mut document = Document::new(setup.premise.clone(), outline.outline, config);
    document.last_response_id = outline.response_id;
    store.save_document(&document).await?;

    let outcome = generate_all(backend, &mut document, options, stop, observer).await;

    if let Err(e) = store.save_document(&document).await {
        tracing::warn!(document = %document.id, error = %e, "failed to save lucky document");
    }

    Ok(LuckyRun { document, outcome })
}
