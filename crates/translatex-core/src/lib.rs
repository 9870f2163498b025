//! # TranslateX Core
//!
//! Shared, I/O-free logic for TranslateX: the run/chunk data model, the
//! greedy run chunker, glossary substitution, prompt and marker handling,
//! the error taxonomy, and the [`translator::Translator`] and
//! [`cache::TranslationCache`] capability traits.
//!
//! This crate contains no tokio, sqlx, reqwest, or filesystem access. The
//! `translatex` crate wires these pieces to real documents, providers, and
//! storage.

pub mod cache;
pub mod chunk;
pub mod error;
pub mod glossary;
pub mod models;
pub mod prompt;
pub mod translator;
