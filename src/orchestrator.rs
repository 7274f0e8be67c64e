//! Sequential section generation.
//!
//! [`generate_all`] fills every empty section of a document, one at a
//! time and in outline order. Sections that already have content are
//! skipped, so re-running after a stop or a failure resumes at the first
//! empty section. Nothing is rolled back: sections completed before a stop
//! or failure keep their content.
//!
//! # Checkpoints
//!
//! ```text
//! for each empty section, in order:
//!   stop? ──▶ Stopped
//!   SectionStarted
//!   generate (stop polled per chunk) ──▶ Stopped | Failed
//!   record content, SectionCompleted, autosave
//!   stop? ──▶ Stopped
//! ```
//!
//! The document is exclusively borrowed for the whole run, so no other
//! writer can touch the working copy while a run is active.

use crate::autosave::AutoSaver;
use crate::backend::GenerationBackend;
use crate::cancel::StopToken;
use crate::error::{GenerationError, OrchestratorError};
use crate::knowledge::KnowledgeSource;
use crate::models::{CacheMetrics, Document};
use crate::progress::{GenerationEvent, GenerationObserver};
use crate::section::{generate_section, SectionRequest, SectionResult};

/// Collaborators and settings for a run.
pub struct RunOptions<'a> {
    pub model: &'a str,
    /// Knowledge base consulted before each section.
    pub knowledge: Option<&'a KnowledgeSource<'a>>,
    /// Receives the document after every settled section.
    pub autosave: Option<&'a AutoSaver>,
}

impl<'a> RunOptions<'a> {
    pub fn new(model: &'a str) -> Self {
        Self {
            model,
            knowledge: None,
            autosave: None,
        }
    }
}

/// What a completed run did.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunSummary {
    /// Ids of the sections generated in this run, in order.
    pub generated: Vec<String>,
    /// Summed vendor cache usage across the run's calls.
    pub usage: CacheMetrics,
}

/// Generate content for every section lacking it, in outline order.
///
/// Returns immediately, without any backend call, when every section
/// already has content.
pub async fn generate_all(
    backend: &dyn GenerationBackend,
    document: &mut Document,
    options: &RunOptions<'_>,
    stop: &StopToken,
    observer: &dyn GenerationObserver,
) -> Result<RunSummary, OrchestratorError> {
    if document.outline.sections.is_empty() {
        return Err(OrchestratorError::Failed(GenerationError::InvalidInput(
            "document has no outline sections".to_string(),
        )));
    }

    let mut summary = RunSummary::default();
    let pending = document.pending_sections();
    if pending.is_empty() {
        tracing::debug!(document = %document.id, "all sections already generated");
        return Ok(summary);
    }

    tracing::info!(document = %document.id, pending = pending.len(), "starting section run");

    for index in pending {
        if stop.is_stopped() {
            tracing::info!(document = %document.id, "run stopped before section {}", index);
            return Err(OrchestratorError::Stopped);
        }

        let result = run_one(backend, document, index, options, stop, observer).await;
        let result = match result {
            Ok(r) => r,
            Err(e) => {
                if !e.is_stopped() {
                    tracing::warn!(document = %document.id, section = index, error = %e, "section generation failed");
                }
                return Err(e.into());
            }
        };

        if let Some(ref usage) = result.usage {
            summary.usage.add(usage);
        }
        summary
            .generated
            .push(document.outline.sections[index].id.clone());

        if stop.is_stopped() {
            tracing::info!(document = %document.id, "run stopped after section {}", index);
            return Err(OrchestratorError::Stopped);
        }
    }

    Ok(summary)
}

/// Regenerate one section, replacing its content in place.
///
/// The section keeps its id and position. Its previous content survives
/// unless the new generation succeeds.
pub async fn regenerate_section(
    backend: &dyn GenerationBackend,
    document: &mut Document,
    section_id: &str,
    options: &RunOptions<'_>,
    stop: &StopToken,
    observer: &dyn GenerationObserver,
) -> Result<SectionResult, OrchestratorError> {
    let index = document.section_index(section_id).ok_or_else(|| {
        OrchestratorError::Failed(GenerationError::InvalidInput(format!(
            "section {} is not part of the outline",
            section_id
        )))
    })?;

    Ok(run_one(backend, document, index, options, stop, observer).await?)
}

/// Generate section `index` against the live document and record the result.
async fn run_one(
    backend: &dyn GenerationBackend,
    document: &mut Document,
    index: usize,
    options: &RunOptions<'_>,
    stop: &StopToken,
    observer: &dyn GenerationObserver,
) -> Result<SectionResult, GenerationError> {
    let (id, title, role) = {
        let s = &document.outline.sections[index];
        (s.id.clone(), s.title.clone(), s.role.clone())
    };

    observer.on_event(&GenerationEvent::SectionStarted {
        index,
        id: id.clone(),
        title: title.clone(),
    });

    let context = match options.knowledge {
        Some(source) => source.lookup(&format!("{} {}", title, role)).await,
        None => None,
    };

    // Taken from the live document so sections written earlier in this run are included.
    let previous = document.completed_before(index);
    let model = document.config.model.as_deref().unwrap_or(options.model);

    let result = generate_section(
        backend,
        SectionRequest {
            outline: &document.outline,
            section_id: &id,
            previous: &previous,
            config: &document.config,
            context: context.as_deref(),
            previous_response_id: document.last_response_id.as_deref(),
            model,
        },
        stop,
        &mut |text: &str| {
            observer.on_event(&GenerationEvent::Delta {
                index,
                text: text.to_string(),
            })
        },
    )
    .await?;

    document.outline.sections[index].set_content(result.content.clone(), result.word_count);
    if result.response_id.is_some() {
        document.last_response_id = result.response_id.clone();
    }
    document.touch();

    observer.on_event(&GenerationEvent::SectionCompleted {
        index,
        id,
        word_count: result.word_count,
    });
    if let Some(usage) = result.usage {
        observer.on_event(&GenerationEvent::Usage(usage));
    }
    if let Some(saver) = options.autosave {
        saver.schedule(document.clone());
    }

    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{ScriptedBackend, ScriptedResponse};
    use crate::models::{GenerationConfig, Outline, Section};
    use crate::progress::NoProgress;

    fn document(sections: Vec<Section>) -> Document {
        Document::new(
            "p",
            Outline {
                title: "T".to_string(),
                sections,
            },
            GenerationConfig::default(),
        )
    }

    #[tokio::test]
    async fn test_empty_outline_is_failure() {
        let backend = ScriptedBackend::new();
        let mut doc = document(vec![]);
        let err = generate_all(
            &backend,
            &mut doc,
            &RunOptions::new("m"),
            &StopToken::new(),
            &NoProgress,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, OrchestratorError::Failed(_)));
    }

    #[tokio::test]
    async fn test_stop_requested_before_run_generates_nothing() {
        let backend = ScriptedBackend::new();
        let mut doc = document(vec![Section::new("a", "A", "", vec![])]);
        let stop = StopToken::new();
        stop.stop();
        let err = generate_all(&backend, &mut doc, &RunOptions::new("m"), &stop, &NoProgress)
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::Stopped));
        assert_eq!(backend.calls(), 0);
    }

    #[tokio::test]
    async fn test_usage_is_summed_and_response_id_chained() {
        let backend = ScriptedBackend::new();
        backend
            .push(ScriptedResponse::text("one").with_usage(CacheMetrics {
                cached_tokens: 10,
                total_tokens: 100,
            }))
            .push(ScriptedResponse::text("two").with_usage(CacheMetrics {
                cached_tokens: 30,
                total_tokens: 100,
            }));
        let mut doc = document(vec![
            Section::new("a", "A", "", vec![]),
            Section::new("b", "B", "", vec![]),
        ]);

        let summary = generate_all(
            &backend,
            &mut doc,
            &RunOptions::new("m"),
            &StopToken::new(),
            &NoProgress,
        )
        .await
        .unwrap();

        assert_eq!(summary.usage.cached_tokens, 40);
        assert_eq!(summary.usage.total_tokens, 200);
        let requests = backend.requests();
        assert_eq!(requests[0].previous_response_id, None);
        assert_eq!(requests[1].previous_response_id.as_deref(), Some("resp-1"));
        assert_eq!(doc.last_response_id.as_deref(), Some("resp-2"));
    }

    #[tokio::test]
    async fn test_document_model_overrides_run_model() {
        let backend = ScriptedBackend::new();
        backend.push(ScriptedResponse::text("x"));
        let mut doc = document(vec![Section::new("a", "A", "", vec![])]);
        doc.config.model = Some("special".to_string());

        generate_all(
            &backend,
            &mut doc,
            &RunOptions::new("m"),
            &StopToken::new(),
            &NoProgress,
        )
        .await
        .unwrap();
        assert_eq!(backend.requests()[0].model, "special");
    }
}
