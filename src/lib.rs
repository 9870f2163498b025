//! # TranslateX
//!
//! Translate `.docx` documents with LLM providers while keeping every byte
//! of formatting that is not text.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌─────────┐   ┌─────────────────────────────┐   ┌─────────────┐
//! │ Extract  │──▶│  Chunk  │──▶│ Scheduler                   │──▶│ Reassemble  │
//! │ (docx)   │   │         │   │ cache · glossary · limiter  │   │ (docx)      │
//! └──────────┘   └─────────┘   │ checkpoint · provider       │   └─────────────┘
//!                              └─────────────────────────────┘
//! ```
//!
//! Pure logic (data model, chunking, glossary, prompts, cache keys, the
//! `Translator` trait) lives in the `translatex-core` crate. This crate adds
//! everything that touches the network, the filesystem or the runtime.
//!
//! ## Quick Start
//!
//! ```bash
//! export OPENAI_API_KEY=...
//! translatex report.docx -o translated/
//! translatex ./contracts --provider gemini --target-lang French --review
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`logging`] | `tracing` subscriber setup |
//! | [`docx`] | Run extraction and reassembly |
//! | [`checkpoint`] | Resumable per-document progress |
//! | [`sqlite_cache`] | Persistent translation cache |
//! | [`db`] | Cache database connection |
//! | [`migrate`] | Cache schema |
//! | [`rate_limit`] | Per-provider request budget |
//! | [`providers`] | OpenAI, Gemini, Groq, OpenRouter adapters |
//! | [`glossary_file`] | Glossary file loading |
//! | [`scheduler`] | Bounded-concurrency chunk scheduling |
//! | [`pipeline`] | Single-document job |
//! | [`batch`] | Directory mode |
//! | [`review`] | Side-by-side HTML review page |
//! | [`progress`] | Progress reporting |

pub mod batch;
pub mod checkpoint;
pub mod config;
pub mod db;
pub mod docx;
pub mod glossary_file;
pub mod logging;
pub mod migrate;
pub mod pipeline;
pub mod progress;
pub mod providers;
pub mod rate_limit;
pub mod review;
pub mod scheduler;
pub mod sqlite_cache;

pub use translatex_core::error::{Result, TranslateError};
