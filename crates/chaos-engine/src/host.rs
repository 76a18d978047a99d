//! A [`SessionHost`] that logs everything the scheduler emits.
//!
//! Replication messages are encoded to JSON and logged at `info`, standing
//! in for the network transport. The per-tick status callback lives here
//! too, since both report the same state.

use std::collections::BTreeMap;

use chaos_core::host::SessionHost;
use chaos_core::runner::TickCallback;
use chaos_core::session::ChaosSession;
use chaos_core::timer::ClockReading;
use chaos_types::{ActiveEffectInfo, DispatchId, Notice, ReplicationMessage};
use tracing::{debug, info, warn};

/// Logs replication traffic and notices, and tracks what is active.
#[derive(Debug, Default)]
pub struct LoggingHost {
    broadcasts: u64,
    active: BTreeMap<DispatchId, ActiveEffectInfo>,
}

impl LoggingHost {
    /// Create a host with nothing recorded.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replication messages sent so far.
    pub const fn broadcasts(&self) -> u64 {
        self.broadcasts
    }

    /// Timed effects the scheduler reported as active.
    pub fn active(&self) -> impl Iterator<Item = &ActiveEffectInfo> {
        self.active.values()
    }
}

impl SessionHost for LoggingHost {
    fn broadcast(&mut self, message: &ReplicationMessage) {
        self.broadcasts = self.broadcasts.saturating_add(1);
        match serde_json::to_string(message) {
            Ok(json) => info!(
                dispatch_id = %message.dispatch_id(),
                payload = json.as_str(),
                "Replication message"
            ),
            Err(e) => warn!(error = %e, "Failed to encode replication message"),
        }
    }

    fn notice(&mut self, notice: &Notice) {
        match notice {
            Notice::EffectActivated { display_name } => {
                info!(effect = display_name.as_str(), "Activating effect");
            }
            Notice::EffectFailed { display_name } => {
                warn!(effect = display_name.as_str(), "Effect hook failed");
            }
            Notice::CannotActivate { display_name } => {
                warn!(effect = display_name.as_str(), "Cannot activate effect right now");
            }
        }
    }

    fn timed_effect_started(&mut self, effect: &ActiveEffectInfo) {
        debug!(
            dispatch_id = %effect.dispatch_id,
            effect = effect.identifier.as_str(),
            duration = %effect.duration,
            "Timed effect active"
        );
        self.active.insert(effect.dispatch_id, effect.clone());
    }

    fn timed_effect_ended(&mut self, dispatch_id: DispatchId) {
        if self.active.remove(&dispatch_id).is_none() {
            warn!(dispatch_id = %dispatch_id, "End reported for unknown timed effect");
        }
    }
}

/// Logs a status line whenever the set of active effects changes.
#[derive(Debug, Default)]
pub struct StatusCallback {
    last_active: usize,
    last_dispatch_count: u64,
}

impl StatusCallback {
    /// Create a callback that has seen nothing yet.
    pub const fn new() -> Self {
        Self {
            last_active: 0,
            last_dispatch_count: 0,
        }
    }
}

impl TickCallback for StatusCallback {
    fn on_tick(&mut self, reading: &ClockReading, session: &ChaosSession) {
        let active = session.active_effects().len();
        let dispatch_count = session.dispatcher().dispatch_count();
        if active == self.last_active && dispatch_count == self.last_dispatch_count {
            return;
        }
        self.last_active = active;
        self.last_dispatch_count = dispatch_count;

        let effects: Vec<String> = session
            .active_effect_infos()
            .into_iter()
            .map(|info| match info.remaining_seconds {
                Some(remaining) => format!("{} ({remaining:.1}s)", info.identifier),
                None => info.identifier,
            })
            .collect();
        info!(
            stopwatch = reading.stopwatch,
            paused = reading.stopwatch_paused,
            dispatch_count,
            next_activation_in = session.time_until_next_activation(),
            active = ?effects,
            "Status"
        );
    }
}
