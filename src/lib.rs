//! # Draftsmith
//!
//! A local-first outline-then-expand document authoring engine backed by
//! hosted language models.
//!
//! A prompt becomes a structured outline; each section is then written in
//! order, with the sections already written fed back as context so the
//! prose stays continuous. Runs stream token by token, can be stopped at
//! any chunk boundary, and resume at the first empty section.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌─────────────┐   ┌──────────────┐   ┌──────────┐
//! │  Prompt  │──▶│   Outline   │──▶│ Orchestrator │──▶│  SQLite  │
//! │  + KB    │   │  generator  │   │  (sections)  │   │ autosave │
//! └──────────┘   └─────────────┘   └──────┬───────┘   └────┬─────┘
//!                                         │                │
//!                                         ▼                ▼
//!                                   ┌──────────┐     ┌──────────┐
//!                                   │ Backend  │     │  Export  │
//!                                   │  (SSE)   │     │ text/md  │
//!                                   └──────────┘     └──────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! draft init
//! draft new "A beginner's guide to tide pools"
//! draft generate <id>
//! draft export <id> --format markdown
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`error`] | Generation and run error kinds |
//! | [`cancel`] | Cooperative stop token |
//! | [`backend`] | Streaming text generation backends |
//! | [`prompt`] | Prompt construction |
//! | [`outline`] | Outline generation and parsing |
//! | [`section`] | Single-section generation |
//! | [`orchestrator`] | Sequential, resumable section runs |
//! | [`progress`] | Progress events and observers |
//! | [`knowledge`] | Knowledge base retrieval |
//! | [`store`] | Document persistence |
//! | [`autosave`] | Debounced background saving |
//! | [`export`] | Text and Markdown rendering |
//! | [`lucky`] | Random-premise documents |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |
//! | [`doc_cmd`], [`kb_cmd`] | CLI command implementations |

pub mod autosave;
pub mod backend;
pub mod cancel;
pub mod config;
pub mod db;
pub mod doc_cmd;
pub mod error;
pub mod export;
pub mod kb_cmd;
pub mod knowledge;
pub mod lucky;
pub mod migrate;
pub mod models;
pub mod orchestrator;
pub mod outline;
pub mod progress;
pub mod prompt;
pub mod section;
pub mod store;
