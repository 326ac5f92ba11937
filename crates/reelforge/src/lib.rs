//! # Reelforge
//!
//! **Resolve narrative shot plans into ranked archival media manifests, then
//! compile them into video.**
//!
//! Reelforge takes a shot plan (ordered beats with narration, keywords,
//! shot types and draft search queries), searches several archival media
//! providers, filters results through a versioned relevance gate, ranks them
//! deterministically, and persists the outcome as a manifest. A separate
//! compilation run turns the manifest into a timed clip sequence and a single
//! video file, using only assets the manifest lists.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────┐   ┌───────────┐   ┌────────────┐   ┌──────────┐
//! │ Shot plan │──▶│ Guardrail │──▶│ Providers  │──▶│  SQLite  │
//! │  (JSON)   │   │  repair   │   │ IA/EU/WM/PX│   │  cache   │
//! └───────────┘   └───────────┘   └────────────┘   └────┬─────┘
//!                                                       │ gate re-applied
//!                                                       ▼ on every read
//!                 ┌───────────┐   ┌────────────┐   ┌──────────┐
//!                 │  ffmpeg   │◀──│  Compile   │◀──│ Manifest │
//!                 │  output   │   │ (quality)  │   │  (JSON)  │
//!                 └───────────┘   └────────────┘   └──────────┘
//! ```
//!
//! Pure logic (guardrail, gate, scoring, fallback, per-beat resolution,
//! manifest index, frame analysis) lives in `reelforge_core`. This crate
//! adds configuration, storage, HTTP adapters, process spawning and the CLI.
//!
//! ## Quick Start
//!
//! ```bash
//! reel init                                  # create the cache database
//! reel providers                             # check provider availability
//! reel queries plans/bletchley.json          # offline query check
//! reel resolve plans/bletchley.json          # build the manifest
//! reel compile data/manifests/ep01.manifest.json
//! ```
//!
//! ## Providers
//!
//! | Provider | Media | Credential | Module |
//! |----------|-------|------------|--------|
//! | Internet Archive | video, image | none | [`provider_archive`] |
//! | Europeana | video, image | API key | [`provider_europeana`] |
//! | Wikimedia Commons | video, image | none | [`provider_commons`] |
//! | Pexels | video, photo | API key | [`provider_pexels`] |
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing and validation |
//! | [`db`] | SQLite connection pool with WAL mode |
//! | [`migrate`] | Cache and run-history schema (idempotent) |
//! | [`sqlite_cache`] | SQLite [`reelforge_core::cache::CacheStore`] |
//! | [`http`] | Throttled, retrying JSON client shared by adapters |
//! | [`providers`] | Registry construction and `reel providers` |
//! | [`resolve`] | Concurrent resolution driver with cancellation |
//! | [`manifest_file`] | Shot plan loading, manifest persistence |
//! | [`compile`] | Compilation engine and `reel compile` |
//! | [`media`] | HTTP download, ffprobe/ffmpeg inspection and transcoding |
//! | [`queries`] | Offline guardrail report |
//! | [`policy_info`] | Active gate policy summary |
//! | [`stats`] | Cache statistics and purge |
//! | [`progress`] | Progress reporting on stderr |
//!
//! ## Configuration
//!
//! Reelforge is configured via a TOML file (default: `config/reel.toml`).
//! See [`config`] for all options and [`config::load_config`] for the
//! validation rules.

pub mod compile;
pub mod config;
pub mod db;
pub mod http;
pub mod manifest_file;
pub mod media;
pub mod migrate;
pub mod policy_info;
pub mod progress;
pub mod provider_archive;
pub mod provider_commons;
pub mod provider_europeana;
pub mod provider_pexels;
pub mod providers;
pub mod queries;
pub mod resolve;
pub mod sqlite_cache;
pub mod stats;

pub use reelforge_core::{error::PipelineError, manifest::Manifest, models::ShotPlan};
