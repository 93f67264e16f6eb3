//! # Engagement Hub
//!
//! Backend for software-development engagements: requirement documents are
//! uploaded, extracted, and analysed by a generative model, and vendors are
//! ranked by a weighted score over their evaluations.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌───────────┐   ┌────────────┐   ┌──────────┐
//! │  Upload  │──▶│   Blobs   │──▶│  Extract   │──▶│ Analysis │──▶ model
//! │ (multi-  │   │  fs / S3  │   │ text/media │   │  batch   │
//! │  part)   │   └───────────┘   └────────────┘   └────┬─────┘
//! └──────────┘                                         ▼
//!                                                 ┌──────────┐
//!              vendors ── evaluations ── scoring ─│  SQLite  │
//!                                                 └──────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! ehub init                      # create database
//! ehub extract ./notes.txt       # try the extractor on a local file
//! ehub serve                     # start HTTP server
//! ehub vendors <project-id>      # ranked vendor scores
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`extract`] | Extension-based text extraction |
//! | [`scoring`] | Weighted vendor scoring |
//! | [`llm`] | Generative model clients |
//! | [`analysis`] | Batch document analysis |
//! | [`store`] | Persistence gateway (SQLite, in-memory) |
//! | [`storage`] | Blob storage (filesystem, S3) |
//! | [`documents`] | Document upload / delete / analyze flows |
//! | [`vendors`] | Vendor and evaluation flows |
//! | [`requirements`] | Requirement drafting |
//! | [`server`] | HTTP API |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod analysis;
pub mod config;
pub mod db;
pub mod documents;
pub mod error;
pub mod extract;
pub mod llm;
pub mod migrate;
pub mod models;
pub mod requirements;
pub mod scoring;
pub mod server;
pub mod storage;
pub mod store;
pub mod vendors;
