//! # Core Types
//!
//! The data the engine moves around. Nothing here does I/O or spawns
//! tasks; the policies (`revalidation`, `boundary`) are plain functions
//! over snapshots and match chains.
//!
//! ```text
//!        Event ──────────────┐
//!                            ▼
//!                   ┌─────────────────┐
//!                   │     ENGINE      │   (crate::engine)
//!                   │ loads, cancels, │
//!                   │     merges      │
//!                   └────────┬────────┘
//!          uses              │ commits
//!   ┌──────────────┐         ▼
//!   │ revalidation │  ┌─────────────┐
//!   │ boundary     │  │  Snapshot   │──► on_change
//!   │ result       │  │ transition  │
//!   └──────────────┘  │ fetchers    │
//!                     │ loader_data │
//!                     └─────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`location`]: `Location` and the redirect marker it can carry
//! - [`route`]: route records, matches and the loader/action traits
//! - [`result`]: what a loader or action produced, classified
//! - [`transition`] / [`fetcher`]: the two state machines' states
//! - [`state`]: `Snapshot`, patches and the store
//! - [`config`]: `~/.waypoint/config.toml` and its resolution

pub mod boundary;
pub mod config;
pub mod event;
pub mod fetcher;
pub mod location;
pub mod result;
pub mod revalidation;
pub mod route;
pub mod state;
pub mod transition;
