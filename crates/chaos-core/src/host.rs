//! The [`SessionHost`] trait and its stock implementations.
//!
//! The scheduler never talks to the network, the chat, or the overlay
//! directly. Everything outbound goes through a [`SessionHost`] passed into
//! each call, and every call is synchronous: a message handed to
//! [`SessionHost::broadcast`] has been handed off before the scheduler takes
//! its next step.

use chaos_types::{ActiveEffectInfo, DispatchId, Notice, ReplicationMessage};

/// Outbound side of a session.
pub trait SessionHost {
    /// Deliver a replication message to every observer.
    fn broadcast(&mut self, message: &ReplicationMessage);

    /// Show a user-visible notice.
    fn notice(&mut self, notice: &Notice) {
        let _ = notice;
    }

    /// A timed effect became active.
    fn timed_effect_started(&mut self, effect: &ActiveEffectInfo) {
        let _ = effect;
    }

    /// A timed effect ended.
    fn timed_effect_ended(&mut self, dispatch_id: DispatchId) {
        let _ = dispatch_id;
    }
}

/// A host that discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullHost;

impl SessionHost for NullHost {
    fn broadcast(&mut self, _message: &ReplicationMessage) {}
}

/// A host that records everything it receives, in order.
#[derive(Debug, Default, Clone)]
pub struct RecordingHost {
    /// Replication messages.
    pub messages: Vec<ReplicationMessage>,
    /// Notices.
    pub notices: Vec<Notice>,
    /// Timed effects reported as started.
    pub started: Vec<ActiveEffectInfo>,
    /// Dispatch IDs reported as ended.
    pub ended: Vec<DispatchId>,
}

impl RecordingHost {
    /// Create an empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop everything recorded so far.
    pub fn clear(&mut self) {
        self.messages.clear();
        self.notices.clear();
        self.started.clear();
        self.ended.clear();
    }

    /// Identifiers of every `EffectDispatched` message, in order.
    pub fn dispatched_identifiers(&self) -> Vec<&str> {
        self.messages
            .iter()
            .filter_map(|message| match message {
                ReplicationMessage::EffectDispatched(dispatched) => {
                    Some(dispatched.effect_identifier.as_str())
                }
                ReplicationMessage::EffectEnded(_) => None,
            })
            .collect()
    }

    /// Dispatch IDs of every `EffectEnded` message, in order.
    pub fn ended_messages(&self) -> Vec<DispatchId> {
        self.messages
            .iter()
            .filter_map(|message| match message {
                ReplicationMessage::EffectEnded(ended) => Some(ended.dispatch_id),
                ReplicationMessage::EffectDispatched(_) => None,
            })
            .collect()
    }
}

impl SessionHost for RecordingHost {
    fn broadcast(&mut self, message: &ReplicationMessage) {
        self.messages.push(message.clone());
    }

    fn notice(&mut self, notice: &Notice) {
        self.notices.push(notice.clone());
    }

    fn timed_effect_started(&mut self, effect: &ActiveEffectInfo) {
        self.started.push(effect.clone());
    }

    fn timed_effect_ended(&mut self, dispatch_id: DispatchId) {
        self.ended.push(dispatch_id);
    }
}
