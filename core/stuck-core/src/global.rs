//! Process-wide engine instance.
//!
//! Hosts may run their initialization path more than once (reloads, several
//! plugins sharing one process). The engine and its loop must still exist
//! exactly once, so construction goes through a `OnceCell` rather than
//! whatever module-level caching the host happens to provide.

use once_cell::sync::OnceCell;

use crate::config::{StuckConfig, StuckConfigPatch};
use crate::engine::StuckEngine;

static ENGINE: OnceCell<StuckEngine> = OnceCell::new();

/// Returns the process-wide engine, creating and starting it on first use.
///
/// The first caller's `config` is merged over the defaults before the loop
/// starts. Later callers' `config` is merged into the running engine; the
/// loop is never restarted.
pub fn stuck_engine(config: Option<StuckConfigPatch>) -> &'static StuckEngine {
    let mut pending = config;
    let engine = ENGINE.get_or_init(|| {
        let patch = pending.take().unwrap_or_default();
        let engine = StuckEngine::new(StuckConfig::default().merged(&patch));
        engine.start();
        engine
    });

    if let Some(patch) = pending {
        engine.update_config(patch);
    }
    engine
}

/// The process-wide engine if something already created it.
pub fn try_stuck_engine() -> Option<&'static StuckEngine> {
    ENGINE.get()
}
