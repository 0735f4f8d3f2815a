//! # Clip Catalog
//!
//! Reconciles a directory tree of audio clips into a SQLite catalog.
//!
//! A clip is every `.mp3`, `.m4a`, and `.m4r` file in one directory that
//! shares a stem. Each scan walks the tree, decides per clip whether the
//! catalog row must be inserted, updated, or deleted, applies those writes,
//! and then syncs tags read from the clip's canonical source file.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌─────────────┐   ┌──────────────┐
//! │  ClipWalk   │──▶│ Reconciler  │──▶│    SQLite    │
//! │ dir+stem    │   │ ins/upd/del │   │ clips+tags   │
//! └─────────────┘   └──────┬──────┘   │   + FTS5     │
//!                          │          └──────▲───────┘
//!                          ▼                 │
//!                   ┌─────────────┐          │
//!                   │MetadataSync │──────────┘
//!                   │   (lofty)   │
//!                   └─────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! clipcat init                    # create database
//! clipcat scan /srv/clips         # reconcile the catalog
//! clipcat list clips/             # inspect a subtree
//! clipcat stats
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`error`] | Scan error taxonomy |
//! | [`grouper`] | Directory walk and clip grouping |
//! | [`tag_extract`] | Tag extraction from audio files |
//! | [`reconcile`] | Insert/update/delete decisions and write retry |
//! | [`metadata_sync`] | Tag row synchronization |
//! | [`report`] | Run phases and the final report |
//! | [`scan`] | End-to-end scan pipeline |
//! | [`store`] | Catalog storage abstraction |
//! | [`progress`] | Scan progress reporting |
//! | [`list`] | Catalog listing |
//! | [`stats`] | Catalog statistics |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod config;
pub mod db;
pub mod error;
pub mod grouper;
pub mod list;
pub mod metadata_sync;
pub mod migrate;
pub mod models;
pub mod progress;
pub mod reconcile;
pub mod report;
pub mod scan;
pub mod stats;
pub mod store;
pub mod tag_extract;
