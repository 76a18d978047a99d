//! The effect dispatcher.
//!
//! [`EffectDispatcher`] turns a chosen effect into a running instance. On
//! the authority it announces the effect, re-checks eligibility, allocates
//! a dispatch ID and an instance seed, runs the payload hooks, replicates
//! the instance to observers and counts the activation. Observers and save
//! restoration go through [`EffectDispatcher::replay`], which rebuilds an
//! instance from its serialized form without drawing any randomness.

use chaos_types::{
    DispatchArgs, DispatchFlags, DispatchId, EffectDispatched, EffectIndex, Notice,
    ReplicationMessage, Role, SerializedEffect,
};
use tracing::{debug, error, info, warn};

use crate::counters::ActivationCounters;
use crate::effect::{Effect, EffectContext, HookKind, invoke_hook};
use crate::eligibility::{ActivationContext, Eligibility};
use crate::host::SessionHost;
use crate::lifecycle::{ActiveTimedEffect, TimedEffectManager, TimedState};
use crate::registry::{EffectDefinition, EffectRegistry};
use crate::rng::EffectRng;
use crate::settings::EffectSettingsStore;

/// Everything a dispatch touches besides the dispatcher itself.
pub struct DispatchEnv<'a> {
    /// The effect catalog.
    pub registry: &'a EffectRegistry,
    /// Live per-effect settings.
    pub settings: &'a EffectSettingsStore,
    /// Active timed effects.
    pub active: &'a mut TimedEffectManager,
    /// Outbound side of the session.
    pub host: &'a mut dyn SessionHost,
}

/// Why a dispatch did not start an instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    /// Observers cannot dispatch, and the authority does not replay.
    WrongRole,
    /// The effect is not in the catalog.
    UnknownEffect,
    /// Eligibility was re-checked and refused the effect.
    Ineligible,
    /// The payload could not decode its replicated state.
    DeserializeFailed,
    /// The dispatch counter is exhausted.
    DispatchIdsExhausted,
}

impl core::fmt::Display for RejectReason {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let text = match self {
            Self::WrongRole => "wrong role",
            Self::UnknownEffect => "unknown effect",
            Self::Ineligible => "not activatable",
            Self::DeserializeFailed => "deserialize failed",
            Self::DispatchIdsExhausted => "dispatch IDs exhausted",
        };
        f.write_str(text)
    }
}

/// Result of a dispatch attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// An instance was started.
    Dispatched {
        /// The dispatched effect.
        effect: EffectIndex,
        /// ID of the new instance.
        dispatch_id: DispatchId,
    },
    /// Nothing was started.
    Rejected(RejectReason),
}

impl DispatchOutcome {
    /// Whether an instance was started.
    pub const fn is_dispatched(&self) -> bool {
        matches!(self, Self::Dispatched { .. })
    }

    /// The new instance's dispatch ID, if one was started.
    pub const fn dispatch_id(&self) -> Option<DispatchId> {
        match self {
            Self::Dispatched { dispatch_id, .. } => Some(*dispatch_id),
            Self::Rejected(_) => None,
        }
    }
}

/// Creates and starts effect instances.
#[derive(Debug, Clone)]
pub struct EffectDispatcher {
    role: Role,
    rng: EffectRng,
    dispatch_count: u64,
    counters: ActivationCounters,
    has_attempted_dispatch: bool,
}

impl EffectDispatcher {
    /// A dispatcher drawing instance seeds from `rng`.
    pub fn new(role: Role, rng: EffectRng, effect_count: usize) -> Self {
        Self {
            role,
            rng,
            dispatch_count: 0,
            counters: ActivationCounters::new(effect_count),
            has_attempted_dispatch: false,
        }
    }

    /// Eligibility view over this dispatcher's counters.
    pub const fn eligibility<'a>(
        &'a self,
        registry: &'a EffectRegistry,
        settings: &'a EffectSettingsStore,
        active: &'a TimedEffectManager,
    ) -> Eligibility<'a> {
        Eligibility::new(registry, settings, &self.counters, active)
    }

    /// Dispatch `effect` on the authority.
    pub fn dispatch(
        &mut self,
        effect: EffectIndex,
        args: DispatchArgs,
        env: &mut DispatchEnv<'_>,
    ) -> DispatchOutcome {
        if !self.role.is_authority() {
            warn!(effect = %effect, "Observers cannot dispatch effects");
            return DispatchOutcome::Rejected(RejectReason::WrongRole);
        }
        let Some(definition) = env.registry.get(effect) else {
            warn!(effect = %effect, "Dispatch requested for unknown effect");
            return DispatchOutcome::Rejected(RejectReason::UnknownEffect);
        };
        let identifier = definition.identifier();

        if !args.has(DispatchFlags::DONT_SEND_NOTICE) {
            env.host.notice(&Notice::EffectActivated {
                display_name: definition.display_name().to_owned(),
            });
        }
        self.has_attempted_dispatch = true;

        if !args.has(DispatchFlags::TRUST_CALLER)
            && !Eligibility::new(env.registry, env.settings, &self.counters, env.active)
                .can_activate(effect, &ActivationContext::NOW)
        {
            debug!(effect = identifier, "Effect is not activatable, not starting");
            return DispatchOutcome::Rejected(RejectReason::Ineligible);
        }

        let Some(dispatch_id) = DispatchId(self.dispatch_count).next() else {
            error!(effect = identifier, "Dispatch counter exhausted");
            return DispatchOutcome::Rejected(RejectReason::DispatchIdsExhausted);
        };
        self.dispatch_count = dispatch_id.into_inner();
        let rng_seed = args
            .override_seed
            .unwrap_or_else(|| self.rng.next_seed());

        let mut payload = definition.create_instance();
        {
            let mut pre_start_rng = EffectRng::from_seed(rng_seed);
            let mut ctx = EffectContext {
                dispatch_id,
                rng: &mut pre_start_rng,
                active_effects: &mut *env.active,
            };
            if invoke_hook(identifier, HookKind::PreStart, || {
                payload.on_pre_start(&mut ctx)
            })
            .is_err()
            {
                notice_failed(definition, env.host);
            }
        }

        let timing = definition.duration().map(|kind| {
            let mut timing = TimedState::new(kind, None);
            timing.scale_duration(env.active.duration_multiplier_for(definition));
            timing
        });

        if definition.is_networked() {
            let data = invoke_hook(identifier, HookKind::Serialize, || payload.serialize())
                .unwrap_or_default();
            env.host
                .broadcast(&ReplicationMessage::EffectDispatched(EffectDispatched {
                    effect_identifier: identifier.to_owned(),
                    flags: args.flags,
                    override_seed: args.override_seed,
                    instance: SerializedEffect {
                        dispatch_id,
                        rng_seed,
                        duration: timing.and_then(|timing| timing.duration),
                        data,
                    },
                }));
        }

        start_instance(definition, dispatch_id, rng_seed, timing, payload, env);

        if !args.has(DispatchFlags::DONT_COUNT) {
            self.counters.increment(effect);
        }
        info!(
            effect = identifier,
            dispatch_id = %dispatch_id,
            seed = rng_seed,
            "Dispatched effect"
        );
        DispatchOutcome::Dispatched {
            effect,
            dispatch_id,
        }
    }

    /// Start an instance replicated from the authority.
    pub fn receive_dispatch(
        &mut self,
        message: &EffectDispatched,
        env: &mut DispatchEnv<'_>,
    ) -> DispatchOutcome {
        if self.role.is_authority() {
            warn!(
                effect = message.effect_identifier.as_str(),
                "Authority received a dispatch message, ignoring"
            );
            return DispatchOutcome::Rejected(RejectReason::WrongRole);
        }
        Self::replay(&message.effect_identifier, &message.instance, 0.0, env)
    }

    /// Rebuild and start an instance from its serialized form.
    ///
    /// `elapsed` is how far into its duration the instance already is. No
    /// randomness is drawn, nothing is counted, and nothing is broadcast.
    pub fn replay(
        identifier: &str,
        instance: &SerializedEffect,
        elapsed: f64,
        env: &mut DispatchEnv<'_>,
    ) -> DispatchOutcome {
        let Some(definition) = env.registry.definition_by_identifier(identifier) else {
            warn!(effect = identifier, "Replicated effect is not in the catalog, skipping");
            return DispatchOutcome::Rejected(RejectReason::UnknownEffect);
        };
        let mut payload = definition.create_instance();
        if invoke_hook(identifier, HookKind::Deserialize, || {
            payload.deserialize(&instance.data)
        })
        .is_err()
        {
            return DispatchOutcome::Rejected(RejectReason::DeserializeFailed);
        }

        let timing = definition.duration().map(|kind| {
            let mut timing = TimedState::new(kind, instance.duration);
            timing.advance(elapsed);
            timing
        });
        start_instance(
            definition,
            instance.dispatch_id,
            instance.rng_seed,
            timing,
            payload,
            env,
        );
        debug!(
            effect = identifier,
            dispatch_id = %instance.dispatch_id,
            "Started replicated effect"
        );
        DispatchOutcome::Dispatched {
            effect: definition.index(),
            dispatch_id: instance.dispatch_id,
        }
    }

    // -----------------------------------------------------------------------
    // State
    // -----------------------------------------------------------------------

    /// The role this dispatcher acts as.
    pub const fn role(&self) -> Role {
        self.role
    }

    /// The instance-seed stream.
    pub const fn rng(&self) -> &EffectRng {
        &self.rng
    }

    /// Replace the instance-seed stream, used when restoring a save.
    pub fn set_rng(&mut self, rng: EffectRng) {
        self.rng = rng;
    }

    /// Last allocated dispatch ID, or zero before the first dispatch.
    pub const fn dispatch_count(&self) -> u64 {
        self.dispatch_count
    }

    /// Overwrite the dispatch counter, used when restoring a save.
    pub const fn set_dispatch_count(&mut self, count: u64) {
        self.dispatch_count = count;
    }

    /// Activation counters.
    pub const fn counters(&self) -> &ActivationCounters {
        &self.counters
    }

    /// Mutable activation counters.
    pub const fn counters_mut(&mut self) -> &mut ActivationCounters {
        &mut self.counters
    }

    /// Whether any dispatch has been attempted this session.
    pub const fn has_attempted_dispatch(&self) -> bool {
        self.has_attempted_dispatch
    }
}

/// Run `on_start`, then hand the instance to the lifecycle manager or,
/// for instant effects, end it right away.
///
/// `on_start` always sees a fresh stream seeded from the instance seed, so
/// every participant draws the same values.
fn start_instance(
    definition: &EffectDefinition,
    dispatch_id: DispatchId,
    rng_seed: u64,
    timing: Option<TimedState>,
    mut payload: Box<dyn Effect>,
    env: &mut DispatchEnv<'_>,
) {
    let identifier = definition.identifier();
    let mut instance_rng = EffectRng::from_seed(rng_seed);
    {
        let mut ctx = EffectContext {
            dispatch_id,
            rng: &mut instance_rng,
            active_effects: &mut *env.active,
        };
        if invoke_hook(identifier, HookKind::Start, || payload.on_start(&mut ctx)).is_err() {
            notice_failed(definition, env.host);
        }
    }

    match timing {
        Some(timing) => env.active.register(
            ActiveTimedEffect::new(definition, dispatch_id, rng_seed, timing, payload),
            env.host,
        ),
        None => {
            let _ = invoke_hook(identifier, HookKind::End, || payload.on_end());
        }
    }
}

fn notice_failed(definition: &EffectDefinition, host: &mut dyn SessionHost) {
    host.notice(&Notice::EffectFailed {
        display_name: definition.display_name().to_owned(),
    });
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::float_cmp)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use chaos_types::DurationKind;
    use serde::{Deserialize, Serialize};

    use super::*;
    use crate::effect::{HookError, HookResult};
    use crate::host::RecordingHost;
    use crate::registry::EffectDescriptor;

    #[derive(Debug, Default, Serialize, Deserialize)]
    struct Roller {
        roll: u64,
    }

    impl Effect for Roller {
        fn on_pre_start(&mut self, ctx: &mut EffectContext<'_>) -> HookResult {
            self.roll = ctx.rng.next_seed() % 1000;
            Ok(())
        }

        fn serialize(&self) -> Result<Vec<u8>, HookError> {
            Ok(serde_json::to_vec(self)?)
        }

        fn deserialize(&mut self, data: &[u8]) -> HookResult {
            *self = serde_json::from_slice(data)?;
            Ok(())
        }
    }

    static INSTANT_ENDS: AtomicU32 = AtomicU32::new(0);

    #[derive(Debug, Default)]
    struct Instant;

    impl Effect for Instant {
        fn on_end(&mut self) -> HookResult {
            INSTANT_ENDS.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[derive(Debug, Default)]
    struct Broken;

    impl Effect for Broken {
        fn on_start(&mut self, _ctx: &mut EffectContext<'_>) -> HookResult {
            Err(HookError::failed("no target"))
        }
    }

    #[derive(Debug, Default)]
    struct Doubler;

    impl Effect for Doubler {
        fn duration_multiplier(&self) -> f64 {
            2.0
        }
    }

    fn registry() -> EffectRegistry {
        EffectRegistry::from_descriptors([
            EffectDescriptor::new::<Roller>("roller", "Roller")
                .networked()
                .timed(DurationKind::FixedDuration { seconds: 10.0 })
                .allow_duplicates(false),
            EffectDescriptor::new::<Instant>("instant", "Instant").networked(),
            EffectDescriptor::new::<Broken>("broken", "Broken"),
            EffectDescriptor::new::<Doubler>("doubler", "Doubler")
                .timed(DurationKind::UntilStageEnd)
                .ignore_duration_modifiers(),
        ])
    }

    struct Fixture {
        registry: EffectRegistry,
        settings: EffectSettingsStore,
        active: TimedEffectManager,
        host: RecordingHost,
        dispatcher: EffectDispatcher,
    }

    impl Fixture {
        fn new(role: Role) -> Self {
            let registry = registry();
            let settings = EffectSettingsStore::from_registry(&registry);
            let dispatcher = EffectDispatcher::new(role, EffectRng::from_seed(42), registry.len());
            Self {
                registry,
                settings,
                active: TimedEffectManager::new(role),
                host: RecordingHost::new(),
                dispatcher,
            }
        }

        fn index(&self, identifier: &str) -> EffectIndex {
            self.registry.find_by_identifier(identifier).unwrap()
        }

        fn dispatch(&mut self, identifier: &str, args: DispatchArgs) -> DispatchOutcome {
            let effect = self.index(identifier);
            let mut env = DispatchEnv {
                registry: &self.registry,
                settings: &self.settings,
                active: &mut self.active,
                host: &mut self.host,
            };
            self.dispatcher.dispatch(effect, args, &mut env)
        }

        fn receive(&mut self, message: &EffectDispatched) -> DispatchOutcome {
            let mut env = DispatchEnv {
                registry: &self.registry,
                settings: &self.settings,
                active: &mut self.active,
                host: &mut self.host,
            };
            self.dispatcher.receive_dispatch(message, &mut env)
        }
    }

    fn dispatched_message(host: &RecordingHost) -> EffectDispatched {
        host.messages
            .iter()
            .find_map(|message| match message {
                ReplicationMessage::EffectDispatched(dispatched) => Some(dispatched.clone()),
                ReplicationMessage::EffectEnded(_) => None,
            })
            .unwrap()
    }

    #[test]
    fn dispatch_ids_start_at_one_and_increase() {
        let mut fixture = Fixture::new(Role::Authority);
        let first = fixture.dispatch("instant", DispatchArgs::default());
        let second = fixture.dispatch("instant", DispatchArgs::default());
        assert_eq!(first.dispatch_id(), Some(DispatchId(1)));
        assert_eq!(second.dispatch_id(), Some(DispatchId(2)));
        assert_eq!(fixture.dispatcher.dispatch_count(), 2);
    }

    #[test]
    fn networked_dispatch_announces_then_broadcasts() {
        let mut fixture = Fixture::new(Role::Authority);
        fixture.dispatch("roller", DispatchArgs::default());
        assert_eq!(
            fixture.host.notices,
            vec![Notice::EffectActivated {
                display_name: String::from("Roller")
            }]
        );
        let message = dispatched_message(&fixture.host);
        assert_eq!(message.effect_identifier, "roller");
        assert_eq!(message.instance.dispatch_id, DispatchId(1));
        assert_eq!(message.instance.duration, Some(10.0));
        assert!(!message.instance.data.is_empty());
        assert_eq!(fixture.active.len(), 1);
    }

    #[test]
    fn observer_replay_reproduces_instance() {
        let mut authority = Fixture::new(Role::Authority);
        authority.dispatch("roller", DispatchArgs::default());
        let message = dispatched_message(&authority.host);

        let mut observer = Fixture::new(Role::Observer);
        let outcome = observer.receive(&message);
        assert_eq!(outcome.dispatch_id(), Some(DispatchId(1)));

        let original = authority.active.instances_of_type::<Roller>().next().unwrap().roll;
        let replica = observer.active.instances_of_type::<Roller>().next().unwrap().roll;
        assert_eq!(original, replica);
        assert!(observer.host.messages.is_empty());
        assert_eq!(observer.dispatcher.dispatch_count(), 0);
    }

    #[test]
    fn override_seed_replaces_stream_draw() {
        let mut a = Fixture::new(Role::Authority);
        let mut b = Fixture::new(Role::Authority);
        b.dispatcher.set_rng(EffectRng::from_seed(7));
        a.dispatch("roller", DispatchArgs::default().seeded(1234));
        b.dispatch("roller", DispatchArgs::default().seeded(1234));
        let roll_a = a.active.instances_of_type::<Roller>().next().unwrap().roll;
        let roll_b = b.active.instances_of_type::<Roller>().next().unwrap().roll;
        assert_eq!(roll_a, roll_b);
        assert_eq!(dispatched_message(&a.host).override_seed, Some(1234));
    }

    #[test]
    fn ineligible_dispatch_is_rejected_after_notice() {
        let mut fixture = Fixture::new(Role::Authority);
        fixture.dispatch("roller", DispatchArgs::default());
        fixture.host.clear();

        let outcome = fixture.dispatch("roller", DispatchArgs::default());
        assert_eq!(outcome, DispatchOutcome::Rejected(RejectReason::Ineligible));
        assert_eq!(fixture.host.notices.len(), 1);
        assert!(fixture.host.messages.is_empty());
        assert_eq!(fixture.dispatcher.dispatch_count(), 1);

        let trusted = fixture.dispatch(
            "roller",
            DispatchArgs::with_flags(DispatchFlags::TRUST_CALLER | DispatchFlags::DONT_SEND_NOTICE),
        );
        assert!(trusted.is_dispatched());
        assert_eq!(fixture.host.notices.len(), 1);
    }

    #[test]
    fn dont_count_skips_counters() {
        let mut fixture = Fixture::new(Role::Authority);
        let instant = fixture.index("instant");
        fixture.dispatch("instant", DispatchArgs::with_flags(DispatchFlags::DONT_COUNT));
        assert_eq!(fixture.dispatcher.counters().counter(instant).run, 0);
        fixture.dispatch("instant", DispatchArgs::default());
        assert_eq!(fixture.dispatcher.counters().counter(instant).run, 1);
        assert_eq!(fixture.dispatcher.counters().counter(instant).stage, 1);
    }

    #[test]
    fn instant_effects_end_immediately() {
        let mut fixture = Fixture::new(Role::Authority);
        let before = INSTANT_ENDS.load(Ordering::SeqCst);
        fixture.dispatch("instant", DispatchArgs::default());
        assert!(INSTANT_ENDS.load(Ordering::SeqCst) > before);
        assert!(fixture.active.is_empty());
    }

    #[test]
    fn hook_failure_notices_and_continues() {
        let mut fixture = Fixture::new(Role::Authority);
        let outcome = fixture.dispatch("broken", DispatchArgs::default());
        assert!(outcome.is_dispatched());
        assert!(fixture.host.notices.contains(&Notice::EffectFailed {
            display_name: String::from("Broken")
        }));
    }

    #[test]
    fn active_multipliers_scale_new_durations() {
        let mut fixture = Fixture::new(Role::Authority);
        fixture.dispatch("doubler", DispatchArgs::default());
        fixture.dispatch("roller", DispatchArgs::default());
        let message = dispatched_message(&fixture.host);
        assert_eq!(message.instance.duration, Some(20.0));
    }

    #[test]
    fn roles_are_enforced() {
        let mut observer = Fixture::new(Role::Observer);
        let outcome = observer.dispatch("instant", DispatchArgs::default());
        assert_eq!(outcome, DispatchOutcome::Rejected(RejectReason::WrongRole));
        assert!(!observer.dispatcher.has_attempted_dispatch());

        let mut authority = Fixture::new(Role::Authority);
        let message = EffectDispatched {
            effect_identifier: String::from("instant"),
            flags: DispatchFlags::NONE,
            override_seed: None,
            instance: SerializedEffect {
                dispatch_id: DispatchId(3),
                rng_seed: 0,
                duration: None,
                data: Vec::new(),
            },
        };
        assert_eq!(
            authority.receive(&message),
            DispatchOutcome::Rejected(RejectReason::WrongRole)
        );
    }

    #[test]
    fn unknown_replicated_effect_is_skipped() {
        let mut observer = Fixture::new(Role::Observer);
        let message = EffectDispatched {
            effect_identifier: String::from("ghost"),
            flags: DispatchFlags::NONE,
            override_seed: None,
            instance: SerializedEffect {
                dispatch_id: DispatchId(1),
                rng_seed: 0,
                duration: None,
                data: Vec::new(),
            },
        };
        assert_eq!(
            observer.receive(&message),
            DispatchOutcome::Rejected(RejectReason::UnknownEffect)
        );
    }
}
