//! Storage abstraction for documents and knowledge base records.
//!
//! The [`DocumentStore`] trait is the persistence contract the rest of
//! the crate relies on. Generation never depends on it for correctness;
//! it only provides continuity across sessions.
//!
//! | Method | Purpose |
//! |--------|---------|
//! | [`save_document`](DocumentStore::save_document) | Insert or update a whole document |
//! | [`load_document`](DocumentStore::load_document) | Fetch a document by id |
//! | [`list_documents`](DocumentStore::list_documents) | All documents, most recently updated first |
//! | [`delete_document`](DocumentStore::delete_document) | Remove a document |
//! | `*_knowledge_base` | The same four for knowledge base records |
//!
//! Saving an existing id never changes its original `created_at`.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};
use std::collections::HashMap;
use std::sync::RwLock;

use crate::models::{Document, KnowledgeBase};

#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn save_document(&self, doc: &Document) -> Result<()>;
    async fn load_document(&self, id: &str) -> Result<Option<Document>>;
    async fn list_documents(&self) -> Result<Vec<Document>>;
    /// Returns whether a document was removed.
    async fn delete_document(&self, id: &str) -> Result<bool>;

    async fn save_knowledge_base(&self, kb: &KnowledgeBase) -> Result<()>;
    async fn load_knowledge_base(&self, id: &str) -> Result<Option<KnowledgeBase>>;
    async fn list_knowledge_bases(&self) -> Result<Vec<KnowledgeBase>>;
    async fn delete_knowledge_base(&self, id: &str) -> Result<bool>;
}

fn from_millis(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_default()
}

// ============ SQLite ============

/// SQLite implementation of [`DocumentStore`].
///
/// Each record is one row holding its JSON form, with title and
/// timestamps duplicated into columns for listing.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Connect to the configured database, creating the schema if needed.
    pub async fn open(config: &crate::config::Config) -> Result<Self> {
        let pool = crate::db::connect(config).await?;
        crate::migrate::apply(&pool).await?;
        Ok(Self::new(pool))
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    fn decode_document(row: &sqlx::sqlite::SqliteRow) -> Result<Document> {
        let body: String = row.get("body_json");
        let mut doc: Document =
            serde_json::from_str(&body).with_context(|| "Corrupt document record")?;
        doc.created_at = from_millis(row.get("created_at"));
        Ok(doc)
    }

    fn decode_knowledge_base(row: &sqlx::sqlite::SqliteRow) -> Result<KnowledgeBase> {
        let body: String = row.get("body_json");
        let mut kb: KnowledgeBase =
            serde_json::from_str(&body).with_context(|| "Corrupt knowledge base record")?;
        kb.created_at = from_millis(row.get("created_at"));
        Ok(kb)
    }
}

#[async_trait]
impl DocumentStore for SqliteStore {
    async fn save_document(&self, doc: &Document) -> Result<()> {
        let body = serde_json::to_string(doc)?;
        sqlx::query(
            r#"
            INSERT INTO documents (id, title, body_json, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                title = excluded.title,
                body_json = excluded.body_json,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&doc.id)
        .bind(&doc.outline.title)
        .bind(&body)
        .bind(doc.created_at.timestamp_millis())
        .bind(doc.updated_at.timestamp_millis())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn load_document(&self, id: &str) -> Result<Option<Document>> {
        let row = sqlx::query("SELECT body_json, created_at FROM documents WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::decode_document).transpose()
    }

    async fn list_documents(&self) -> Result<Vec<Document>> {
        let rows = sqlx::query(
            "SELECT body_json, created_at FROM documents ORDER BY updated_at DESC, id ASC",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(Self::decode_document).collect()
    }

    async fn delete_document(&self, id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM documents WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn save_knowledge_base(&self, kb: &KnowledgeBase) -> Result<()> {
        let body = serde_json::to_string(kb)?;
        sqlx::query(
            r#"
            INSERT INTO knowledge_bases (id, name, vector_store_id, body_json, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                vector_store_id = excluded.vector_store_id,
                body_json = excluded.body_json,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&kb.id)
        .bind(&kb.name)
        .bind(&kb.vector_store_id)
        .bind(&body)
        .bind(kb.created_at.timestamp_millis())
        .bind(kb.updated_at.timestamp_millis())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn load_knowledge_base(&self, id: &str) -> Result<Option<KnowledgeBase>> {
        let row = sqlx::query("SELECT body_json, created_at FROM knowledge_bases WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::decode_knowledge_base).transpose()
    }

    async fn list_knowledge_bases(&self) -> Result<Vec<KnowledgeBase>> {
        let rows = sqlx::query(
            "SELECT body_json, created_at FROM knowledge_bases ORDER BY updated_at DESC, id ASC",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(Self::decode_knowledge_base).collect()
    }

    async fn delete_knowledge_base(&self, id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM knowledge_bases WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

// ============ In-memory ============

/// In-memory store for tests.
///
/// Uses `HashMap`s behind `std::sync::RwLock`.
#[derive(Default)]
pub struct InMemoryStore {
    docs: RwLock<HashMap<String, Document>>,
    kbs: RwLock<HashMap<String, KnowledgeBase>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn by_recency<T>(items: &mut [T], key: impl Fn(&T) -> (DateTime<Utc>, &str)) {
    items.sort_by(|a, b| {
        let (ua, ia) = key(a);
        let (ub, ib) = key(b);
        ub.cmp(&ua).then(ia.cmp(ib))
    });
}

#[async_trait]
impl DocumentStore for InMemoryStore {
    async fn save_document(&self, doc: &Document) -> Result<()> {
        let mut docs = self.docs.write().unwrap_or_else(|p| p.into_inner());
        let mut stored = doc.clone();
        if let Some(existing) = docs.get(&doc.id) {
            stored.created_at = existing.created_at;
        }
        docs.insert(doc.id.clone(), stored);
        Ok(())
    }

    async fn load_document(&self, id: &str) -> Result<Option<Document>> {
        let docs = self.docs.read().unwrap_or_else(|p| p.into_inner());
        Ok(docs.get(id).cloned())
    }

    async fn list_documents(&self) -> Result<Vec<Document>> {
        let docs = self.docs.read().unwrap_or_else(|p| p.into_inner());
        let mut all: Vec<Document> = docs.values().cloned().collect();
        by_recency(&mut all, |d| (d.updated_at, d.id.as_str()));
        Ok(all)
    }

    async fn delete_document(&self, id: &str) -> Result<bool> {
        let mut docs = self.docs.write().unwrap_or_else(|p| p.into_inner());
        Ok(docs.remove(id).is_some())
    }

    async fn save_knowledge_base(&self, kb: &KnowledgeBase) -> Result<()> {
        let mut kbs = self.kbs.write().unwrap_or_else(|p| p.into_inner());
        let mut stored = kb.clone();
        if let Some(existing) = kbs.get(&kb.id) {
            stored.created_at = existing.created_at;
        }
        kbs.insert(kb.id.clone(), stored);
        Ok(())
    }

    async fn load_knowledge_base(&self, id: &str) -> Result<Option<KnowledgeBase>> {
        let kbs = self.kbs.read().unwrap_or_else(|p| p.into_inner());
        Ok(kbs.get(id).cloned())
    }

    async fn list_knowledge_bases(&self) -> Result<Vec<KnowledgeBase>> {
        let kbs = self.kbs.read().unwrap_or_else(|p| p.into_inner());
        let mut all: Vec<KnowledgeBase> = kbs.values().cloned().collect();
        by_recency(&mut all, |k| (k.updated_at, k.id.as_str()));
        Ok(all)
    }

    async fn delete_knowledge_base(&self, id: &str) -> Result<bool> {
        let mut kbs = self.kbs.write().unwrap_or_else(|p| p.into_inner());
        Ok(kbs.remove(id).is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{GenerationConfig, Outline, Section};
    use chrono::Duration;
    use tempfile::TempDir;

    fn doc(title: &str) -> Document {
        Document::new(
            "prompt",
            Outline {
                title: title.to_string(),
                sections: vec![Section::new("a", "A", "intro", vec![])],
            },
            GenerationConfig::default(),
        )
    }

    async fn sqlite_store(tmp: &TempDir) -> SqliteStore {
        let pool = crate::db::connect_path(&tmp.path().join("draft.sqlite"))
            .await
            .unwrap();
        crate::migrate::apply(&pool).await.unwrap();
        SqliteStore::new(pool)
    }

    async fn check_roundtrip_and_created_at(store: &dyn DocumentStore) {
        let mut d = doc("First");
        store.save_document(&d).await.unwrap();
        let original_created = store.load_document(&d.id).await.unwrap().unwrap().created_at;

        d.created_at = d.created_at + Duration::days(3);
        d.outline.sections[0] = d.outline.sections[0].clone().with_content("Some prose here");
        d.touch();
        store.save_document(&d).await.unwrap();

        let loaded = store.load_document(&d.id).await.unwrap().unwrap();
        assert_eq!(loaded.created_at, original_created);
        assert_eq!(loaded.outline.sections[0].word_count(), Some(3));

        assert!(store.load_document("missing").await.unwrap().is_none());
    }

    async fn check_list_order_and_delete(store: &dyn DocumentStore) {
        let mut older = doc("Older");
        older.updated_at = older.updated_at - Duration::hours(1);
        let newer = doc("Newer");
        store.save_document(&older).await.unwrap();
        store.save_document(&newer).await.unwrap();

        let titles: Vec<String> = store
            .list_documents()
            .await
            .unwrap()
            .into_iter()
            .map(|d| d.outline.title)
            .collect();
        assert_eq!(titles, vec!["Newer".to_string(), "Older".to_string()]);

        assert!(store.delete_document(&older.id).await.unwrap());
        assert!(!store.delete_document(&older.id).await.unwrap());
        assert_eq!(store.list_documents().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_memory_store_preserves_created_at() {
        check_roundtrip_and_created_at(&InMemoryStore::new()).await;
    }

    #[tokio::test]
    async fn test_memory_store_orders_by_recency() {
        check_list_order_and_delete(&InMemoryStore::new()).await;
    }

    #[tokio::test]
    async fn test_sqlite_store_preserves_created_at() {
        let tmp = TempDir::new().unwrap();
        check_roundtrip_and_created_at(&sqlite_store(&tmp).await).await;
    }

    #[tokio::test]
    async fn test_sqlite_store_orders_by_recency() {
        let tmp = TempDir::new().unwrap();
        check_list_order_and_delete(&sqlite_store(&tmp).await).await;
    }

    #[tokio::test]
    async fn test_sqlite_knowledge_bases() {
        let tmp = TempDir::new().unwrap();
        let store = sqlite_store(&tmp).await;
        let mut kb = KnowledgeBase::new("notes", "vs_123");
        store.save_knowledge_base(&kb).await.unwrap();
        kb.files.push("file_1".to_string());
        store.save_knowledge_base(&kb).await.unwrap();

        let loaded = store.load_knowledge_base(&kb.id).await.unwrap().unwrap();
        assert_eq!(loaded.vector_store_id, "vs_123");
        assert_eq!(loaded.files, vec!["file_1".to_string()]);
        assert_eq!(store.list_knowledge_bases().await.unwrap().len(), 1);
        assert!(store.delete_knowledge_base(&kb.id).await.unwrap());
    }
}
