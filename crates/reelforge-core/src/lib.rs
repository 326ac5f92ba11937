//! # Reelforge Core
//!
//! Pure resolution and quality logic for Reelforge: data models, the query
//! guardrail, versioned gate policy and gate engine, relevance scoring,
//! controlled fallback, the provider and cache abstractions, per-beat
//! manifest resolution, manifest-bound assembly, and frame-level quality
//! analysis.
//!
//! This crate contains no tokio runtime, sqlx, HTTP client, or process
//! spawning. I/O-bound pieces (SQLite cache, provider adapters, ffmpeg)
//! live in the `reelforge` crate and plug in through [`provider::Provider`]
//! and [`cache::CacheStore`].

pub mod assembly;
pub mod cache;
pub mod error;
pub mod fallback;
pub mod gate;
pub mod guardrail;
pub mod manifest;
pub mod models;
pub mod policy;
pub mod provider;
pub mod quality;
pub mod scoring;
pub mod text;
