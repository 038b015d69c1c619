//! # mealbot
//!
//! A retrieval-augmented chatbot for muscle-building nutrition and meal
//! advice. Documents about food and training nutrition are chunked, embedded,
//! and stored in a local SQLite index; at chat time the conversation is
//! rewritten into a search query, the closest chunks are retrieved, and a
//! hosted completion model streams a persona-grounded answer into the
//! browser.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌──────────────┐   ┌───────────┐
//! │   Loader     │──▶│ Chunk+Embed  │──▶│  SQLite   │
//! │  files/URLs  │   │   pipeline   │   │  vectors  │
//! └──────────────┘   └──────────────┘   └─────┬─────┘
//!        (offline: `mealbot ingest`)          │
//!                                             ▼
//!                  ┌───────────┐       ┌────────────┐
//!                  │ Completion│◀─────▶│  Retriever │
//!                  │  (stream) │       │  + persona │
//!                  └─────┬─────┘       └────────────┘
//!                        ▼
//!                  ┌───────────┐
//!                  │  Chat UI  │  (online: `mealbot serve`)
//!                  └───────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`loader`] | Local file and web document loading |
//! | [`chunk`] | Overlapping-window text chunking |
//! | [`embedding`] | OpenAI embeddings client + vector utilities |
//! | [`index`] | Persistent similarity index |
//! | [`ingest`] | Offline indexing pipeline |
//! | [`llm`] | Chat completion client (streaming) |
//! | [`rag`] | Query rewriting, retrieval, answer streaming |
//! | [`session`] | Per-session conversation state |
//! | [`search`] | CLI retrieval debugging |
//! | [`server`] | Chat HTTP server |
//! | [`db`] | Database connection |
//! | [`error`] | Typed chat-path errors |

pub mod chunk;
pub mod config;
pub mod db;
pub mod embedding;
pub mod error;
pub mod index;
pub mod ingest;
pub mod llm;
pub mod loader;
pub mod models;
pub mod rag;
pub mod search;
pub mod server;
pub mod session;
