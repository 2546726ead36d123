//! # talkdb
//!
//! A natural-language SQL assistant for relational databases.
//!
//! talkdb introspects a target database, indexes its tables and columns as
//! embeddings in a local SQLite store, and answers plain-language questions
//! by retrieving the nearest schema context, generating SQL with a language
//! model, executing it, and repairing failed queries automatically — via a
//! CLI and an SSE-streaming HTTP server.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌──────────────┐   ┌───────────┐
//! │ Target DB    │──▶│   Refresh     │──▶│  SQLite    │
//! │ PG / SQLite  │   │ Introspect+   │   │ embedding  │
//! └──────┬───────┘   │ Embed schema  │   │ index      │
//!        │           └──────────────┘   └─────┬─────┘
//!        │                                    │
//!        │      ┌─────────────────────────────┘
//!        ▼      ▼
//! ┌─────────────────────────────────────────┐
//! │ Pipeline: retrieve → generate SQL →      │
//! │ execute (repair ×3) → insights           │
//! └──────────┬───────────────┬──────────────┘
//!            ▼               ▼
//!       ┌──────────┐   ┌──────────┐
//!       │   CLI    │   │   HTTP   │
//!       │  (tdb)   │   │  (SSE)   │
//!       └──────────┘   └──────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! tdb init                        # scaffold config
//! tdb refresh                     # introspect + index the target schema
//! tdb search "revenue by region"  # inspect retrieval
//! tdb ask "top customers in Q2?"  # full pipeline
//! tdb serve                       # start HTTP server
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`introspect`] | Target schema introspection |
//! | [`index`] | Embedding index generations |
//! | [`schema_store`] | Schema document persistence and refresh |
//! | [`retrieve`] | Top-K schema context retrieval |
//! | [`synthesize`] | SQL generation prompts and parsing |
//! | [`execute`] | Query execution against the target |
//! | [`insights`] | Result summaries |
//! | [`pipeline`] | Question-to-answer orchestration |
//! | [`server`] | HTTP server with SSE streaming |
//! | [`db`] | Index store connection |
//! | [`migrate`] | Index store schema migrations |
//! | [`target`] | Scoped target database connections |
//! | [`embedding`] | Embedding service client |
//! | [`generation`] | Generation service client |
//! | [`error`] | Pipeline error taxonomy |
//! | [`progress`] | Refresh progress reporting |
//! | [`status`] | Index status summary |

pub mod config;
pub mod db;
pub mod embedding;
pub mod error;
pub mod execute;
pub mod generation;
pub mod index;
pub mod insights;
pub mod introspect;
pub mod migrate;
pub mod models;
pub mod pipeline;
pub mod progress;
pub mod retrieve;
pub mod schema_store;
pub mod server;
pub mod status;
pub mod synthesize;
pub mod target;
