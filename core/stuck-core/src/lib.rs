//! # stuck-core
//!
//! Stuck-detection engine for autonomous task sessions, one per managed
//! repository. The orchestrator reports status and output; the engine
//! decides whether a session looks stalled, raises an alert, escalates it
//! while it lasts and resolves it when the condition clears.
//!
//! ## Design Principles
//!
//! - **No I/O**: classification is pure arithmetic over tracker state and a clock.
//! - **Run to completion**: every public call finishes under one lock before
//!   any subscriber sees its events.
//! - **Isolated delivery**: a failing subscriber is logged and skipped.
//! - **One alert per repository**: an alert exists iff its tracker is stuck.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use stuck_core::stuck_engine;
//! use stuck_protocol::{RepoStateUpdate, TaskStatus};
//!
//! let engine = stuck_engine(None);
//! engine.subscribe(|event| {
//!     println!("{:?}", event.kind());
//!     Ok(())
//! });
//! engine.update_repo_state(
//!     RepoStateUpdate::new("repo-1", "api", TaskStatus::Running).with_session("s-1"),
//! );
//! ```

pub mod alerts;
pub mod clock;
pub mod config;
pub mod detection;
pub mod engine;
pub mod error;
pub mod events;
pub mod global;
pub mod history;
pub mod policy;
pub mod tracker;

pub use alerts::{AlertRegistry, Escalation};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{StuckConfig, StuckConfigPatch};
pub use engine::{StuckEngine, TICK_INTERVAL};
pub use error::{Result, StuckError};
pub use events::{EventBus, SubscriptionId};
pub use global::{stuck_engine, try_stuck_engine};
pub use history::BoundedRing;
pub use policy::{describe, severity_for, suggested_action};
pub use tracker::{StatusEntry, Tracker, TrackerSnapshot};
