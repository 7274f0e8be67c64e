//! Document commands: create, generate, inspect, delete.
//!
//! `new` only produces and saves an outline. `generate` fills sections and
//! is the resumable step: Ctrl-C stops it at the next chunk boundary,
//! completed sections stay saved, and running it again picks up at the
//! first empty section.

use anyhow::{bail, Result};
use std::sync::Arc;
use std::time::Duration;

use crate::autosave::AutoSaver;
use crate::backend::{create_backend, GenerationBackend};
use crate::config::Config;
use crate::error::{GenerationError, OrchestratorError};
use crate::kb_cmd::find_knowledge_base;
use crate::knowledge::{lookup_context, KnowledgeSource, OpenAiVectorStore, SearchOptions};
use crate::lucky::{lucky_setup, run_lucky};
use crate::models::{Document, GenerationConfig};
use crate::orchestrator::{generate_all, regenerate_section, RunOptions, RunSummary};
use crate::outline::{generate_outline, OutlineRequest};
use crate::progress::{Fanout, GenerationEvent, GenerationObserver, ProgressMode, SessionState};
use crate::store::{DocumentStore, SqliteStore};

/// Flags for `draft new`; `None` falls back to `[defaults]`.
#[derive(Debug, Default, Clone)]
pub struct NewOptions {
    pub tone: Option<String>,
    pub words: Option<u32>,
    pub allow: Vec<String>,
    pub deny: Vec<String>,
    pub knowledge_base: Option<String>,
    pub model: Option<String>,
}

impl NewOptions {
    pub fn apply(&self, mut base: GenerationConfig) -> GenerationConfig {
        if let Some(ref tone) = self.tone {
            base.tone = tone.clone();
        }
        if let Some(words) = self.words {
            base.target_words = words;
        }
        if !self.allow.is_empty() {
            base.allowed_elements = self.allow.clone();
        }
        if !self.deny.is_empty() {
            base.denied_elements = self.deny.clone();
        }
        if self.model.is_some() {
            base.model = self.model.clone();
        }
        base
    }
}

pub async fn run_new(
    config: &Config,
    prompt: &str,
    options: &NewOptions,
    progress: ProgressMode,
) -> Result<()> {
    let store = SqliteStore::open(config).await?;
    let mut generation = options.apply(config.defaults.generation_config());

    let mut vector_store_id = None;
    if let Some(ref key) = options.knowledge_base {
        let Some(kb) = find_knowledge_base(&store, key).await? else {
            bail!("knowledge base not found: {}", key);
        };
        generation.knowledge_base = Some(kb.id);
        vector_store_id = Some(kb.vector_store_id);
    }

    let backend = create_backend(&config.generation)?;
    let observer = progress.observer();
    tracing::info!(backend = backend.name(), "outlining new document");

    let context = match vector_store_id {
        Some(ref vs) => match OpenAiVectorStore::new(&config.generation) {
            Ok(client) => {
                lookup_context(&client, vs, prompt, SearchOptions::from(&config.knowledge)).await
            }
            Err(e) => {
                tracing::warn!(error = %e, "knowledge base unavailable; outlining without it");
                None
            }
        },
        None => None,
    };

    let model = generation
        .model
        .clone()
        .unwrap_or_else(|| backend.default_model().to_string());
    let outline = generate_outline(
        backend.as_ref(),
        OutlineRequest {
            config: &generation,
            prompt,
            context: context.as_deref(),
            previous_response_id: None,
            model: &model,
        },
        &mut |text: &str| observer.on_event(&GenerationEvent::OutlineDelta(text.to_string())),
    )
    .await
    .map_err(|e| anyhow::anyhow!("outline generation failed: {} ({})", e, retry_hint(&e)))?;

    let mut doc = Document::new(prompt, outline.outline, generation);
    doc.last_response_id = outline.response_id;
    store.save_document(&doc).await?;
    store.close().await;

    if progress != ProgressMode::Off {
        eprintln!();
    }
    println!("{}", doc.id);
    println!("{} ({} sections)", doc.outline.title, doc.sections().len());
    for (i, section) in doc.sections().iter().enumerate() {
        println!("  {}. {}", i + 1, section.title);
    }
    Ok(())
}

/// Build the retriever for a document's knowledge base, if it has one that still exists.
async fn knowledge_client(
    config: &Config,
    store: &dyn DocumentStore,
    doc: &Document,
) -> Option<(OpenAiVectorStore, String)> {
    let key = doc.config.knowledge_base.as_deref()?;
    let kb = match find_knowledge_base(store, key).await {
        Ok(Some(kb)) => kb,
        Ok(None) => {
            tracing::warn!(knowledge_base = key, "knowledge base no longer exists");
            return None;
        }
        Err(e) => {
            tracing::warn!(error = %e, "could not load knowledge base");
            return None;
        }
    };
    match OpenAiVectorStore::new(&config.generation) {
        Ok(client) => Some((client, kb.vector_store_id)),
        Err(e) => {
            tracing::warn!(error = %e, "knowledge base unavailable; generating without it");
            None
        }
    }
}

/// What a CLI section run needs besides the backend and the store.
pub struct GenerateSettings<'a> {
    /// Regenerate only this section instead of filling every empty one.
    pub section: Option<&'a str>,
    pub knowledge: Option<&'a KnowledgeSource<'a>>,
    pub debounce: Duration,
}

/// Run sections of `doc` inside `session`, autosaving as sections settle.
///
/// The document is saved once more after the run. A failing store is
/// logged and does not change the returned outcome.
pub async fn generate_document(
    backend: &dyn GenerationBackend,
    store: Arc<dyn DocumentStore>,
    doc: &mut Document,
    settings: &GenerateSettings<'_>,
    session: &SessionState,
    observer: &dyn GenerationObserver,
) -> Result<RunSummary, OrchestratorError> {
    let saver = AutoSaver::spawn(store.clone(), settings.debounce);
    let options = RunOptions {
        model: backend.default_model(),
        knowledge: settings.knowledge,
        autosave: Some(&saver),
    };
    let observers = Fanout(vec![observer, session as &dyn GenerationObserver]);
    let stop = session.stop_token();

    tracing::info!(backend = backend.name(), document = %doc.id, "generating sections");
    session.start();

    let outcome = match settings.section {
        Some(section_id) => regenerate_section(backend, doc, section_id, &options, stop, &observers)
            .await
            .map(|result| RunSummary {
                generated: vec![section_id.to_string()],
                usage: result.usage.unwrap_or_default(),
            }),
        None => generate_all(backend, doc, &options, stop, &observers).await,
    };

    saver.shutdown().await;
    if let Err(e) = store.save_document(doc).await {
        tracing::warn!(document = %doc.id, error = %e, "final save failed; relying on autosaved progress");
    }
    outcome
}

pub async fn run_generate(
    config: &Config,
    id: &str,
    section: Option<&str>,
    progress: ProgressMode,
) -> Result<()> {
    let store = Arc::new(SqliteStore::open(config).await?);
    let Some(mut doc) = store.load_document(id).await? else {
        bail!("document not found: {}", id);
    };
    if section.is_none() && doc.is_complete() {
        println!("All {} sections already generated.", doc.sections().len());
        return Ok(());
    }

    let backend = create_backend(&config.generation)?;
    let observer = progress.observer();
    let knowledge = knowledge_client(config, store.as_ref(), &doc).await;
    let source = knowledge.as_ref().map(|(client, vs)| KnowledgeSource {
        retriever: client,
        collection_id: vs.clone(),
        options: SearchOptions::from(&config.knowledge),
    });

    let session = SessionState::new();
    let watcher = session.stop_token().stop_on_ctrl_c();
    let settings = GenerateSettings {
        section,
        knowledge: source.as_ref(),
        debounce: Duration::from_millis(config.autosave.debounce_ms),
    };

    let outcome = generate_document(
        backend.as_ref(),
        store.clone(),
        &mut doc,
        &settings,
        &session,
        observer.as_ref(),
    )
    .await;

    watcher.abort();
    store.close().await;

    let last = session.finish();
    report(&doc, outcome, last.streaming_section.as_deref(), progress)
}

pub async fn run_lucky_cmd(config: &Config, progress: ProgressMode) -> Result<()> {
    let store = Arc::new(SqliteStore::open(config).await?);
    let backend = create_backend(&config.generation)?;
    let observer = progress.observer();
    let setup = lucky_setup(&mut rand::thread_rng());

    eprintln!(
        "Premise: {} ({}, ~{} words)",
        setup.premise, setup.tone, setup.target_words
    );
    tracing::info!(backend = backend.name(), "starting lucky document");

    let saver = AutoSaver::spawn(
        store.clone(),
        Duration::from_millis(config.autosave.debounce_ms),
    );
    let session = SessionState::new();
    let watcher = session.stop_token().stop_on_ctrl_c();
    let options = RunOptions {
        model: backend.default_model(),
        knowledge: None,
        autosave: Some(&saver),
    };

    session.start();
    let run = run_lucky(
        backend.as_ref(),
        store.as_ref(),
        &setup,
        &config.defaults.generation_config(),
        &options,
        session.stop_token(),
        &Fanout(vec![observer.as_ref(), &session as &dyn GenerationObserver]),
    )
    .await;

    watcher.abort();
    saver.shutdown().await;
    store.close().await;

    let last = session.finish();
    let run = run?;
    report(
        &run.document,
        run.outcome,
        last.streaming_section.as_deref(),
        progress,
    )
}

/// What to suggest after a failed call.
fn retry_hint(e: &GenerationError) -> &'static str {
    match e {
        GenerationError::Parse(_) => "the model's reply could not be read; try again",
        GenerationError::Transport(_) => "check your connection and [generation] settings",
        GenerationError::InvalidInput(_) => "check the document's outline",
        GenerationError::Stopped => "run again to continue",
    }
}

/// Print how a run ended. `cut_off` names the section that was streaming
/// when it stopped or failed; its partial text is not kept.
fn report(
    doc: &Document,
    outcome: Result<RunSummary, OrchestratorError>,
    cut_off: Option<&str>,
    progress: ProgressMode,
) -> Result<()> {
    if progress != ProgressMode::Off {
        eprintln!();
    }
    let done = doc.sections().iter().filter(|s| s.has_content()).count();
    if outcome.is_err() {
        if let Some(section) = cut_off.and_then(|id| doc.section_index(id)) {
            eprintln!(
                "Discarded partial text of section {} ({}).",
                section + 1,
                doc.sections()[section].title
            );
        }
    }

    match outcome {
        Ok(summary) => {
            println!(
                "{}: {} section(s) generated, {}/{} complete, {} words",
                doc.id,
                summary.generated.len(),
                done,
                doc.sections().len(),
                doc.total_words()
            );
            if summary.usage.total_tokens > 0 {
                println!(
                    "Prompt cache: {:.0}% of {} tokens",
                    summary.usage.hit_ratio() * 100.0,
                    summary.usage.total_tokens
                );
            }
            Ok(())
        }
        Err(OrchestratorError::Stopped) => {
            println!(
                "Stopped with {}/{} sections complete; run `draft generate {}` to resume.",
                done,
                doc.sections().len(),
                doc.id
            );
            Ok(())
        }
        Err(OrchestratorError::Failed(e)) => {
            bail!(
                "generation failed: {} ({}/{} sections complete and saved; {}, then run `draft generate {}`)",
                e,
                done,
                doc.sections().len(),
                retry_hint(&e),
                doc.id
            )
        }
    }
}

pub async fn run_list(config: &Config) -> Result<()> {
    let store = SqliteStore::open(config).await?;
    let docs = store.list_documents().await?;
    store.close().await;

    if docs.is_empty() {
        println!("No documents.");
        return Ok(());
    }

    println!("{:<38} {:>7} {:>6}  {:<16}  TITLE", "ID", "DONE", "WORDS", "UPDATED");
    for doc in docs {
        let done = doc.sections().iter().filter(|s| s.has_content()).count();
        println!(
            "{:<38} {:>7} {:>6}  {:<16}  {}",
            doc.id,
            format!("{}/{}", done, doc.sections().len()),
            doc.total_words(),
            doc.updated_at.format("%Y-%m-%d %H:%M"),
            doc.outline.title
        );
    }
    Ok(())
}

pub async fn run_show(config: &Config, id: &str) -> Result<()> {
    let store = SqliteStore::open(config).await?;
    let doc = store.load_document(id).await?;
    store.close().await;
    let Some(doc) = doc else {
        bail!("document not found: {}", id);
    };

    println!("{}", doc.outline.title);
    println!("  id:      {}", doc.id);
    println!("  prompt:  {}", doc.prompt);
    println!(
        "  tone:    {}, target {} words",
        doc.config.tone, doc.config.target_words
    );
    if let Some(ref kb) = doc.config.knowledge_base {
        println!("  kb:      {}", kb);
    }
    println!("  created: {}", doc.created_at.to_rfc3339());
    println!("  updated: {}", doc.updated_at.to_rfc3339());
    println!();
    for (i, section) in doc.sections().iter().enumerate() {
        let status = match section.word_count() {
            Some(words) => format!("{} words", words),
            None => "pending".to_string(),
        };
        println!("  {:>2}. [{}] {} ({})", i + 1, section.id, section.title, status);
    }
    Ok(())
}

pub async fn run_delete(config: &Config, id: &str) -> Result<()> {
    let store = SqliteStore::open(config).await?;
    let removed = store.delete_document(id).await?;
    store.close().await;
    if !removed {
        bail!("document not found: {}", id);
    }
    println!("Deleted {}", id);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{ScriptedBackend, ScriptedResponse};
    use crate::models::{KnowledgeBase, Outline, Section};
    use crate::progress::NoProgress;
    use crate::store::InMemoryStore;
    use async_trait::async_trait;

    fn outlined(n: usize) -> Document {
        let sections = (0..n)
            .map(|i| Section::new(format!("s{}", i), format!("Part {}", i + 1), "", vec![]))
            .collect();
        Document::new(
            "p",
            Outline {
                title: "T".to_string(),
                sections,
            },
            GenerationConfig::default(),
        )
    }

    #[test]
    fn test_new_options_override_defaults() {
        let options = NewOptions {
            tone: Some("wry".to_string()),
            words: Some(800),
            deny: vec!["dialogue".to_string()],
            ..Default::default()
        };
        let config = options.apply(GenerationConfig {
            allowed_elements: vec!["lists".to_string()],
            ..Default::default()
        });
        assert_eq!(config.tone, "wry");
        assert_eq!(config.target_words, 800);
        assert_eq!(config.allowed_elements, vec!["lists".to_string()]);
        assert_eq!(config.denied_elements, vec!["dialogue".to_string()]);
        assert_eq!(config.model, None);
    }

    #[test]
    fn test_stopped_run_reports_success() {
        let doc = outlined(1);
        assert!(report(&doc, Err(OrchestratorError::Stopped), None, ProgressMode::Off).is_ok());
        let failed = OrchestratorError::Failed(GenerationError::Transport("offline".to_string()));
        assert!(report(&doc, Err(failed), Some("s0"), ProgressMode::Off).is_err());
    }

    #[test]
    fn test_retry_hint_depends_on_error_kind() {
        assert!(retry_hint(&GenerationError::Parse("bad json".into())).contains("try again"));
        assert!(
            retry_hint(&GenerationError::Transport("timeout".into())).contains("connection")
        );
    }

    /// Keeps knowledge bases in memory but rejects every document save.
    struct FailingStore(InMemoryStore);

    #[async_trait]
    impl DocumentStore for FailingStore {
        async fn save_document(&self, _doc: &Document) -> Result<()> {
            bail!("disk full")
        }
        async fn load_document(&self, id: &str) -> Result<Option<Document>> {
            self.0.load_document(id).await
        }
        async fn list_documents(&self) -> Result<Vec<Document>> {
            self.0.list_documents().await
        }
        async fn delete_document(&self, id: &str) -> Result<bool> {
            self.0.delete_document(id).await
        }
        async fn save_knowledge_base(&self, kb: &KnowledgeBase) -> Result<()> {
            self.0.save_knowledge_base(kb).await
        }
        async fn load_knowledge_base(&self, id: &str) -> Result<Option<KnowledgeBase>> {
            self.0.load_knowledge_base(id).await
        }
        async fn list_knowledge_bases(&self) -> Result<Vec<KnowledgeBase>> {
            self.0.list_knowledge_bases().await
        }
        async fn delete_knowledge_base(&self, id: &str) -> Result<bool> {
            self.0.delete_knowledge_base(id).await
        }
    }

    fn settings() -> GenerateSettings<'static> {
        GenerateSettings {
            section: None,
            knowledge: None,
            debounce: Duration::from_millis(1),
        }
    }

    #[tokio::test]
    async fn test_failing_store_does_not_fail_the_run() {
        let backend = ScriptedBackend::new();
        backend
            .push(ScriptedResponse::text("first part"))
            .push(ScriptedResponse::text("second part"));
        let store: Arc<dyn DocumentStore> = Arc::new(FailingStore(InMemoryStore::new()));
        let session = SessionState::new();
        let mut doc = outlined(2);

        let outcome =
            generate_document(&backend, store, &mut doc, &settings(), &session, &NoProgress).await;

        assert!(outcome.is_ok(), "outcome: {:?}", outcome);
        assert!(doc.is_complete());
        assert_eq!(backend.requests()[0].model, "scripted-model");
        let last = session.finish();
        assert!(last.streaming_section.is_none());
        assert!(report(&doc, outcome, None, ProgressMode::Off).is_ok());
    }

    #[tokio::test]
    async fn test_stopped_run_names_cut_off_section_then_clears_it() {
        let session = SessionState::new();
        let backend = ScriptedBackend::new();
        backend
            .push(ScriptedResponse::text("first part"))
            .push(ScriptedResponse::chunks(["half ", "done"]).stop_after_chunk(session.stop_token(), 1));
        let store: Arc<dyn DocumentStore> = Arc::new(InMemoryStore::new());
        let mut doc = outlined(3);

        let outcome = generate_document(
            &backend,
            store.clone(),
            &mut doc,
            &settings(),
            &session,
            &NoProgress,
        )
        .await;

        assert!(matches!(outcome, Err(OrchestratorError::Stopped)));
        let last = session.finish();
        assert!(last.in_progress);
        assert_eq!(last.streaming_section.as_deref(), Some("s1"));
        assert_eq!(last.buffer, "half ");

        let after = session.snapshot();
        assert!(!after.in_progress);
        assert!(after.streaming_section.is_none());
        assert!(after.buffer.is_empty());

        let saved = store.load_document(&doc.id).await.unwrap().unwrap();
        assert_eq!(saved.sections()[0].content(), Some("first part"));
        assert!(!saved.sections()[1].has_content());
    }
}
