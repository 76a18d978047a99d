//! Timed-effect lifecycle management.
//!
//! [`TimedEffectManager`] owns every active duration-bearing instance. On
//! the authority it decides when instances end: fixed-duration instances
//! when their time runs out, until-stage-end instances when the stage
//! completes, everything on shutdown. Observers never end anything on
//! their own; they wait for [`EffectEnded`] messages.
//!
//! Ending an instance always runs its end hook exactly once. The order is:
//! remove from the active list, run `on_end`, broadcast [`EffectEnded`]
//! (authority, networked, not suppressed), notify the host. Dropping the
//! manager ends whatever is still active without broadcasting.

use chaos_types::{
    ActiveEffectInfo, DispatchId, DurationKind, EffectEnded, EffectIndex, ReplicationMessage, Role,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::effect::{Effect, HookKind, invoke_hook};
use crate::eligibility::ActivationContext;
use crate::host::{NullHost, SessionHost};
use crate::registry::EffectDefinition;

/// Duration bookkeeping for one active instance.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimedState {
    /// Duration policy.
    pub kind: DurationKind,
    /// Total duration in seconds for fixed-duration instances, after
    /// multipliers and extensions.
    pub duration: Option<f64>,
    /// Game-clock seconds since the instance started.
    pub elapsed: f64,
}

impl TimedState {
    /// Fresh state. `duration` defaults to the policy's base duration.
    pub fn new(kind: DurationKind, duration: Option<f64>) -> Self {
        Self {
            kind,
            duration: duration.or_else(|| kind.fixed_seconds()),
            elapsed: 0.0,
        }
    }

    /// Seconds left, for fixed-duration instances.
    pub fn remaining(&self) -> Option<f64> {
        match self.kind {
            DurationKind::FixedDuration { seconds } => {
                Some(self.duration.unwrap_or(seconds) - self.elapsed)
            }
            DurationKind::UntilStageEnd | DurationKind::Permanent => None,
        }
    }

    /// Whether a fixed-duration instance has run out.
    pub fn is_expired(&self) -> bool {
        self.remaining().is_some_and(|remaining| remaining <= 0.0)
    }

    /// Whether the instance still blocks an activation scheduled
    /// `context.delay` seconds from now.
    pub fn outlasts(&self, context: &ActivationContext) -> bool {
        self.remaining()
            .is_none_or(|remaining| remaining > context.delay)
    }

    /// Multiply the total duration. No-op for non-fixed instances.
    pub fn scale_duration(&mut self, factor: f64) {
        if let Some(duration) = self.duration.as_mut() {
            if factor.is_finite() && factor > 0.0 {
                *duration *= factor;
            }
        }
    }

    /// Advance elapsed time. No-op for non-fixed instances.
    pub fn advance(&mut self, seconds: f64) {
        if self.kind.is_fixed() && seconds.is_finite() && seconds > 0.0 {
            self.elapsed += seconds;
        }
    }
}

/// One active timed effect instance.
pub struct ActiveTimedEffect {
    effect: EffectIndex,
    identifier: String,
    display_name: String,
    dispatch_id: DispatchId,
    rng_seed: u64,
    networked: bool,
    ignore_duration_modifiers: bool,
    timing: TimedState,
    payload: Box<dyn Effect>,
}

impl ActiveTimedEffect {
    /// Wrap a started payload.
    pub fn new(
        definition: &EffectDefinition,
        dispatch_id: DispatchId,
        rng_seed: u64,
        timing: TimedState,
        payload: Box<dyn Effect>,
    ) -> Self {
        Self {
            effect: definition.index(),
            identifier: definition.identifier().to_owned(),
            display_name: definition.display_name().to_owned(),
            dispatch_id,
            rng_seed,
            networked: definition.is_networked(),
            ignore_duration_modifiers: definition.ignores_duration_modifiers(),
            timing,
            payload,
        }
    }

    /// Catalog index of the effect.
    pub const fn effect(&self) -> EffectIndex {
        self.effect
    }

    /// Effect identifier.
    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    /// Dispatch ID of this instance.
    pub const fn dispatch_id(&self) -> DispatchId {
        self.dispatch_id
    }

    /// Seed of this instance's RNG branch.
    pub const fn rng_seed(&self) -> u64 {
        self.rng_seed
    }

    /// Whether duration multipliers leave this instance alone.
    pub const fn ignores_duration_modifiers(&self) -> bool {
        self.ignore_duration_modifiers
    }

    /// Duration bookkeeping.
    pub const fn timing(&self) -> &TimedState {
        &self.timing
    }

    /// Mutable duration bookkeeping, for effects that extend their peers.
    pub const fn timing_mut(&mut self) -> &mut TimedState {
        &mut self.timing
    }

    /// The payload.
    pub fn payload(&self) -> &dyn Effect {
        self.payload.as_ref()
    }

    /// The mutable payload.
    pub fn payload_mut(&mut self) -> &mut dyn Effect {
        self.payload.as_mut()
    }

    /// Overlay view of this instance.
    pub fn info(&self) -> ActiveEffectInfo {
        ActiveEffectInfo {
            dispatch_id: self.dispatch_id,
            identifier: self.identifier.clone(),
            display_name: self.display_name.clone(),
            duration: self.timing.kind,
            remaining_seconds: self.timing.remaining(),
        }
    }
}

impl core::fmt::Debug for ActiveTimedEffect {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ActiveTimedEffect")
            .field("identifier", &self.identifier)
            .field("dispatch_id", &self.dispatch_id)
            .field("timing", &self.timing)
            .finish_non_exhaustive()
    }
}

/// Whether ending an instance notifies observers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EndBroadcast {
    Send,
    Suppress,
}

/// Owner of all active timed effect instances.
#[derive(Debug)]
pub struct TimedEffectManager {
    role: Role,
    active: Vec<ActiveTimedEffect>,
}

impl TimedEffectManager {
    /// An empty manager for the given role.
    pub const fn new(role: Role) -> Self {
        Self {
            role,
            active: Vec::new(),
        }
    }

    /// The role this manager acts as.
    pub const fn role(&self) -> Role {
        self.role
    }

    // -----------------------------------------------------------------------
    // Registration
    // -----------------------------------------------------------------------

    /// Take ownership of a started instance.
    pub fn register(&mut self, entry: ActiveTimedEffect, host: &mut dyn SessionHost) {
        debug!(
            effect = entry.identifier.as_str(),
            dispatch_id = %entry.dispatch_id,
            duration = %entry.timing.kind,
            "Timed effect registered"
        );
        host.timed_effect_started(&entry.info());
        self.active.push(entry);
    }

    // -----------------------------------------------------------------------
    // Expiry
    // -----------------------------------------------------------------------

    /// Advance fixed-duration instances by `delta_seconds` of game time.
    ///
    /// On the authority, instances whose time ran out are ended.
    pub fn update(&mut self, delta_seconds: f64, host: &mut dyn SessionHost) {
        for entry in &mut self.active {
            entry.timing.advance(delta_seconds);
        }
        if self.role.is_authority() {
            self.end_where(|entry| entry.timing.is_expired(), EndBroadcast::Send, host);
        }
    }

    /// End every until-stage-end instance. Authority only.
    pub fn on_stage_end(&mut self, host: &mut dyn SessionHost) {
        if !self.role.is_authority() {
            return;
        }
        self.end_where(
            |entry| matches!(entry.timing.kind, DurationKind::UntilStageEnd),
            EndBroadcast::Send,
            host,
        );
    }

    /// End every instance and tell observers. Used by operator commands.
    pub fn end_all(&mut self, host: &mut dyn SessionHost) -> usize {
        let count = self.active.len();
        self.end_where(|_| true, EndBroadcast::Send, host);
        info!(count, "Ended all active timed effects");
        count
    }

    /// End every instance without broadcasting. Runs on session teardown.
    pub fn shutdown(&mut self) {
        if self.active.is_empty() {
            return;
        }
        debug!(count = self.active.len(), "Shutting down timed effects");
        self.end_where(|_| true, EndBroadcast::Suppress, &mut NullHost);
    }

    /// End one instance by dispatch ID and tell observers.
    ///
    /// Returns false, with a warning, if no such instance is active.
    pub fn end_by_dispatch_id(&mut self, dispatch_id: DispatchId, host: &mut dyn SessionHost) -> bool {
        let Some(position) = self.position_of(dispatch_id) else {
            warn!(dispatch_id = %dispatch_id, "No timed effect registered with this dispatch ID");
            return false;
        };
        self.end_at(position, EndBroadcast::Send, host);
        true
    }

    /// Apply an [`EffectEnded`] message from the authority.
    pub fn receive_end(&mut self, message: &EffectEnded, host: &mut dyn SessionHost) -> bool {
        if self.role.is_authority() {
            warn!(dispatch_id = %message.dispatch_id, "Authority received an end message, ignoring");
            return false;
        }
        let Some(position) = self.position_of(message.dispatch_id) else {
            warn!(
                dispatch_id = %message.dispatch_id,
                "No timed effect registered with this dispatch ID"
            );
            return false;
        };
        self.end_at(position, EndBroadcast::Suppress, host);
        true
    }

    fn end_where(
        &mut self,
        predicate: impl Fn(&ActiveTimedEffect) -> bool,
        broadcast: EndBroadcast,
        host: &mut dyn SessionHost,
    ) {
        let mut position = self.active.len();
        while position > 0 {
            position = position.saturating_sub(1);
            if self.active.get(position).is_some_and(&predicate) {
                self.end_at(position, broadcast, host);
            }
        }
    }

    fn end_at(&mut self, position: usize, broadcast: EndBroadcast, host: &mut dyn SessionHost) {
        if position >= self.active.len() {
            return;
        }
        let mut entry = self.active.remove(position);
        let _ = invoke_hook(&entry.identifier, HookKind::End, || entry.payload.on_end());

        if broadcast == EndBroadcast::Send && self.role.is_authority() && entry.networked {
            host.broadcast(&ReplicationMessage::EffectEnded(EffectEnded {
                dispatch_id: entry.dispatch_id,
            }));
        }
        host.timed_effect_ended(entry.dispatch_id);
        debug!(
            effect = entry.identifier.as_str(),
            dispatch_id = %entry.dispatch_id,
            "Timed effect ended"
        );
    }

    fn position_of(&self, dispatch_id: DispatchId) -> Option<usize> {
        self.active
            .iter()
            .position(|entry| entry.dispatch_id == dispatch_id)
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    /// Number of active instances.
    pub const fn len(&self) -> usize {
        self.active.len()
    }

    /// Whether nothing is active.
    pub const fn is_empty(&self) -> bool {
        self.active.is_empty()
    }

    /// Whether any instance of `effect` is active.
    pub fn is_active(&self, effect: EffectIndex) -> bool {
        self.active.iter().any(|entry| entry.effect == effect)
    }

    /// Number of active instances of `effect`.
    pub fn active_count(&self, effect: EffectIndex) -> usize {
        self.active
            .iter()
            .filter(|entry| entry.effect == effect)
            .count()
    }

    /// Whether an instance of `effect` is active and will still be active
    /// `context.delay` seconds from now. Non-fixed instances always are.
    pub fn any_instance_active(&self, effect: EffectIndex, context: &ActivationContext) -> bool {
        self.active
            .iter()
            .any(|entry| entry.effect == effect && entry.timing.outlasts(context))
    }

    /// Look up an instance by dispatch ID.
    pub fn get(&self, dispatch_id: DispatchId) -> Option<&ActiveTimedEffect> {
        self.active
            .iter()
            .find(|entry| entry.dispatch_id == dispatch_id)
    }

    /// All active instances in registration order.
    pub fn iter(&self) -> impl Iterator<Item = &ActiveTimedEffect> {
        self.active.iter()
    }

    /// All active instances, mutably.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut ActiveTimedEffect> {
        self.active.iter_mut()
    }

    /// Active payloads of concrete type `T`.
    pub fn instances_of_type<T: Effect>(&self) -> impl Iterator<Item = &T> {
        self.active
            .iter()
            .filter_map(|entry| entry.payload.downcast_ref::<T>())
    }

    /// Active payloads of concrete type `T`, mutably.
    pub fn instances_of_type_mut<T: Effect>(&mut self) -> impl Iterator<Item = &mut T> {
        self.active
            .iter_mut()
            .filter_map(|entry| entry.payload.downcast_mut::<T>())
    }

    /// Product of every active instance's duration multiplier.
    pub fn duration_multiplier(&self) -> f64 {
        self.active
            .iter()
            .map(|entry| entry.payload.duration_multiplier())
            .filter(|factor| factor.is_finite() && *factor > 0.0)
            .product()
    }

    /// Duration multiplier that applies to a new instance of `definition`.
    pub fn duration_multiplier_for(&self, definition: &EffectDefinition) -> f64 {
        if definition.ignores_duration_modifiers() {
            1.0
        } else {
            self.duration_multiplier()
        }
    }

    /// Overlay views of every active instance.
    pub fn infos(&self) -> Vec<ActiveEffectInfo> {
        self.active.iter().map(ActiveTimedEffect::info).collect()
    }
}

impl Drop for TimedEffectManager {
    fn drop(&mut self) {
        self.shutdown();
    }
}
