//! Knowledge base commands.
//!
//! Each local [`KnowledgeBase`] record points at one hosted vector store.
//! Commands accept either the local id or the name.

use anyhow::{bail, Result};
use std::path::Path;

use crate::config::Config;
use crate::knowledge::{lookup_context, OpenAiVectorStore, SearchOptions};
use crate::models::KnowledgeBase;
use crate::store::{DocumentStore, SqliteStore};

/// Find a knowledge base by local id, falling back to an exact name match.
pub async fn find_knowledge_base(
    store: &dyn DocumentStore,
    key: &str,
) -> Result<Option<KnowledgeBase>> {
    if let Some(kb) = store.load_knowledge_base(key).await? {
        return Ok(Some(kb));
    }
    Ok(store
        .list_knowledge_bases()
        .await?
        .into_iter()
        .find(|kb| kb.name == key))
}

async fn require_knowledge_base(store: &dyn DocumentStore, key: &str) -> Result<KnowledgeBase> {
    match find_knowledge_base(store, key).await? {
        Some(kb) => Ok(kb),
        None => bail!("knowledge base not found: {}", key),
    }
}

pub async fn run_kb_create(config: &Config, name: &str) -> Result<()> {
    if name.trim().is_empty() {
        bail!("knowledge base name must not be empty");
    }
    let store = SqliteStore::open(config).await?;
    if find_knowledge_base(&store, name).await?.is_some() {
        bail!("a knowledge base named '{}' already exists", name);
    }

    let client = OpenAiVectorStore::new(&config.generation)?;
    let vector_store_id = client.create_store(name).await?;
    let kb = KnowledgeBase::new(name, vector_store_id);
    store.save_knowledge_base(&kb).await?;
    store.close().await;

    println!("Created knowledge base {} ({})", kb.name, kb.id);
    Ok(())
}

pub async fn run_kb_add(config: &Config, key: &str, file: &Path) -> Result<()> {
    if !file.is_file() {
        bail!("not a file: {}", file.display());
    }
    let store = SqliteStore::open(config).await?;
    let mut kb = require_knowledge_base(&store, key).await?;

    let client = OpenAiVectorStore::new(&config.generation)?;
    let file_id = client.upload_file(file).await?;
    client.attach_file(&kb.vector_store_id, &file_id).await?;

    let filename = file
        .file_name()
        .map(|f| f.to_string_lossy().to_string())
        .unwrap_or_else(|| file.display().to_string());
    kb.files.push(filename.clone());
    kb.updated_at = chrono::Utc::now();
    store.save_knowledge_base(&kb).await?;
    store.close().await;

    tracing::info!(knowledge_base = %kb.id, file_id = %file_id, "file attached");
    println!("Added {} to {} (indexing continues in the background)", filename, kb.name);
    Ok(())
}

pub async fn run_kb_list(config: &Config) -> Result<()> {
    let store = SqliteStore::open(config).await?;
    let kbs = store.list_knowledge_bases().await?;
    store.close().await;

    if kbs.is_empty() {
        println!("No knowledge bases.");
        return Ok(());
    }

    println!("{:<38} {:<24} {:>5}  UPDATED", "ID", "NAME", "FILES");
    for kb in kbs {
        println!(
            "{:<38} {:<24} {:>5}  {}",
            kb.id,
            kb.name,
            kb.files.len(),
            kb.updated_at.format("%Y-%m-%d %H:%M")
        );
    }
    Ok(())
}

pub async fn run_kb_search(config: &Config, key: &str, query: &str) -> Result<()> {
    let store = SqliteStore::open(config).await?;
    let kb = require_knowledge_base(&store, key).await?;
    store.close().await;

    let client = OpenAiVectorStore::new(&config.generation)?;
    let options = SearchOptions::from(&config.knowledge);
    match lookup_context(&client, &kb.vector_store_id, query, options).await {
        Some(context) => println!("{}", context),
        None => println!("No results."),
    }
    Ok(())
}

/// Delete the hosted store, then the local record.
pub async fn run_kb_delete(config: &Config, key: &str) -> Result<()> {
    let store = SqliteStore::open(config).await?;
    let kb = require_knowledge_base(&store, key).await?;

    let client = OpenAiVectorStore::new(&config.generation)?;
    if let Err(e) = client.delete_store(&kb.vector_store_id).await {
        tracing::warn!(vector_store = %kb.vector_store_id, error = %e, "could not delete hosted store; removing local record anyway");
    }
    store.delete_knowledge_base(&kb.id).await?;
    store.close().await;

    println!("Deleted knowledge base {}", kb.name);
    Ok(())
}
