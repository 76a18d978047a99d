//! The session context object.
//!
//! A [`ChaosSession`] owns every piece of scheduler state for one run: the
//! live settings, the dispatcher with its counters and instance-seed
//! stream, the active timed effects, and the activation signaler. It has
//! no global state; the host and the clock reading are passed into every
//! call that needs them.
//!
//! # Random streams
//!
//! A master stream seeded from the run seed is branched, in a fixed order,
//! into the instance-seed stream, the selection stream, the vote stream
//! and the command stream. Two sessions built from the same seed and fed
//! the same inputs make the same choices.

use std::sync::Arc;

use chaos_types::{
    ActivationMode, ActiveEffectInfo, DispatchArgs, DispatchFlags, EffectIndex, Notice,
    ReplicationMessage, Role, SerializedEffect,
};
use chrono::Utc;
use tracing::{debug, info, warn};

use crate::commands::{ChaosCommand, CommandError, CommandOutcome};
use crate::config::{ChaosConfig, GeneralConfig};
use crate::dispatcher::{DispatchEnv, DispatchOutcome, EffectDispatcher, RejectReason};
use crate::effect::{HookKind, invoke_hook};
use crate::eligibility::{ActivationContext, Eligibility};
use crate::host::SessionHost;
use crate::lifecycle::TimedEffectManager;
use crate::registry::EffectRegistry;
use crate::rng::EffectRng;
use crate::settings::EffectSettingsStore;
use crate::signaler::{ActivationSignaler, TimerSignaler, VoteSignaler};
use crate::snapshot::{
    SNAPSHOT_VERSION, SavedRunCount, SavedTimedEffect, SchedulerSnapshot, SnapshotError,
    TimerSnapshot,
};
use crate::timer::ClockReading;

/// All scheduler state for one run.
#[derive(Debug)]
pub struct ChaosSession {
    registry: Arc<EffectRegistry>,
    settings: EffectSettingsStore,
    general: GeneralConfig,
    dispatcher: EffectDispatcher,
    active: TimedEffectManager,
    signaler: ActivationSignaler,
    command_rng: EffectRng,
    role: Role,
    run_seed: u64,
    stage: u32,
    last_reading: ClockReading,
}

impl ChaosSession {
    /// Build a session over `registry` starting at `reading`.
    ///
    /// The run seed comes from `config.session.seed`, or from entropy when
    /// absent. With `general.seeded_selection` off, the selection and vote
    /// streams are seeded from entropy instead.
    pub fn new(registry: Arc<EffectRegistry>, config: &ChaosConfig, reading: ClockReading) -> Self {
        let role = config.session.role;
        let run_seed = config
            .session
            .seed
            .unwrap_or_else(|| EffectRng::from_entropy().next_seed());

        let mut master = EffectRng::from_seed(run_seed);
        let effect_rng = master.branch();
        let mut selection_rng = master.branch();
        let mut vote_rng = master.branch();
        let command_rng = master.branch();
        if !config.general.seeded_selection {
            selection_rng = EffectRng::from_entropy();
            vote_rng = EffectRng::from_entropy();
        }

        let settings = EffectSettingsStore::with_overrides(&registry, &config.effects);
        let signaler = match config.activation.mode {
            ActivationMode::Timer => ActivationSignaler::Timer(TimerSignaler::new(
                &config.general,
                config.selection,
                &reading,
                selection_rng,
            )),
            ActivationMode::Vote => ActivationSignaler::Vote(VoteSignaler::new(
                &config.general,
                config.activation,
                &reading,
                vote_rng,
            )),
        };

        info!(
            role = ?role,
            seed = run_seed,
            mode = ?config.activation.mode,
            effect_count = registry.len(),
            "Chaos session created"
        );

        Self {
            dispatcher: EffectDispatcher::new(role, effect_rng, registry.len()),
            active: TimedEffectManager::new(role),
            registry,
            settings,
            general: config.general,
            signaler,
            command_rng,
            role,
            run_seed,
            stage: 0,
            last_reading: reading,
        }
    }

    // -----------------------------------------------------------------------
    // Ticking
    // -----------------------------------------------------------------------

    /// Advance the session to `reading`.
    ///
    /// Timed effects count down by the stopwatch delta since the previous
    /// tick. On the authority the signaler then runs and may dispatch.
    pub fn tick(&mut self, reading: ClockReading, host: &mut dyn SessionHost) -> Option<DispatchOutcome> {
        let delta = (reading.stopwatch - self.last_reading.stopwatch).max(0.0);
        self.last_reading = reading;
        self.active.update(delta, host);

        if !self.role.is_authority() {
            return None;
        }
        let registry: &EffectRegistry = &self.registry;
        let mut env = DispatchEnv {
            registry,
            settings: &self.settings,
            active: &mut self.active,
            host,
        };
        self.signaler
            .update(&reading, &self.general, &mut self.dispatcher, &mut env)
    }

    /// Begin a new stage: zero the stage counters and let the signaler
    /// draw its per-stage list.
    pub fn start_stage(&mut self) {
        self.stage = self.stage.saturating_add(1);
        self.dispatcher.counters_mut().reset_stage();
        let eligibility = self
            .dispatcher
            .eligibility(&self.registry, &self.settings, &self.active);
        self.signaler.start_stage(&eligibility);
        info!(stage = self.stage, "Stage started");
    }

    /// End the current stage, ending every until-stage-end effect.
    pub fn end_stage(&mut self, host: &mut dyn SessionHost) {
        self.active.on_stage_end(host);
        debug!(stage = self.stage, "Stage ended");
    }

    /// Dispatch `effect` directly.
    pub fn dispatch(
        &mut self,
        effect: EffectIndex,
        args: DispatchArgs,
        host: &mut dyn SessionHost,
    ) -> DispatchOutcome {
        let registry: &EffectRegistry = &self.registry;
        let mut env = DispatchEnv {
            registry,
            settings: &self.settings,
            active: &mut self.active,
            host,
        };
        self.dispatcher.dispatch(effect, args, &mut env)
    }

    // -----------------------------------------------------------------------
    // Replication
    // -----------------------------------------------------------------------

    /// Apply a message from the authority. Returns whether state changed.
    pub fn receive(&mut self, message: &ReplicationMessage, host: &mut dyn SessionHost) -> bool {
        match message {
            ReplicationMessage::EffectDispatched(dispatched) => {
                let registry: &EffectRegistry = &self.registry;
                let mut env = DispatchEnv {
                    registry,
                    settings: &self.settings,
                    active: &mut self.active,
                    host,
                };
                self.dispatcher
                    .receive_dispatch(dispatched, &mut env)
                    .is_dispatched()
            }
            ReplicationMessage::EffectEnded(ended) => self.active.receive_end(ended, host),
        }
    }

    // -----------------------------------------------------------------------
    // Commands and votes
    // -----------------------------------------------------------------------

    /// Parse and run one command line.
    ///
    /// # Errors
    ///
    /// Returns [`CommandError`] if the line does not parse or the command
    /// fails.
    pub fn execute_line(
        &mut self,
        line: &str,
        host: &mut dyn SessionHost,
    ) -> Result<CommandOutcome, CommandError> {
        let command: ChaosCommand = line.parse()?;
        self.execute(command, host)
    }

    /// Run a debug command.
    ///
    /// # Errors
    ///
    /// Returns [`CommandError::NotAuthority`] on observers,
    /// [`CommandError::UnknownEffect`] for unknown identifiers and
    /// [`CommandError::Ineligible`] when a forced effect cannot start.
    pub fn execute(
        &mut self,
        command: ChaosCommand,
        host: &mut dyn SessionHost,
    ) -> Result<CommandOutcome, CommandError> {
        if !self.role.is_authority() {
            return Err(CommandError::NotAuthority);
        }
        debug!(command = command.name(), "Executing command");
        match command {
            ChaosCommand::ForceDispatch { identifier, seed } => {
                self.force_dispatch(identifier, seed, host)
            }
            ChaosCommand::ForceDispatchRandom => {
                let effect = self
                    .dispatcher
                    .eligibility(&self.registry, &self.settings, &self.active)
                    .pick_activatable(&mut self.command_rng, &ActivationContext::NOW, |_| true);
                let args =
                    DispatchArgs::with_flags(DispatchFlags::TRUST_CALLER | DispatchFlags::DONT_COUNT);
                dispatched_or_rejected(self.dispatch(effect, args, host))
            }
            ChaosCommand::EndAllActiveEffects => Ok(CommandOutcome::Ended {
                count: self.active.end_all(host),
            }),
            ChaosCommand::SkipScheduled => {
                let count = self
                    .signaler
                    .timer_mut()
                    .skip_all_scheduled(&self.last_reading);
                info!(count, "Skipped scheduled activations");
                Ok(CommandOutcome::Skipped { count })
            }
            ChaosCommand::Rewind { seconds } => {
                self.signaler.timer_mut().rewind(seconds);
                info!(seconds, "Rewound activation timer");
                Ok(CommandOutcome::Rewound { seconds })
            }
        }
    }

    fn force_dispatch(
        &mut self,
        identifier: String,
        seed: Option<u64>,
        host: &mut dyn SessionHost,
    ) -> Result<CommandOutcome, CommandError> {
        let Some(definition) = self.registry.definition_by_identifier(&identifier) else {
            return Err(CommandError::UnknownEffect { identifier });
        };
        let effect = definition.index();
        let display_name = definition.display_name().to_owned();

        let mut args = DispatchArgs::with_flags(DispatchFlags::DONT_COUNT);
        if let Some(seed) = seed {
            args = args.seeded(seed);
        }
        match self.dispatch(effect, args, host) {
            DispatchOutcome::Rejected(RejectReason::Ineligible) => {
                host.notice(&Notice::CannotActivate { display_name });
                Err(CommandError::Ineligible { identifier })
            }
            outcome => dispatched_or_rejected(outcome),
        }
    }

    /// Record a chat message as a vote. Always false in timer mode.
    pub fn submit_vote(&mut self, voter: impl Into<String>, message: &str) -> bool {
        match &mut self.signaler {
            ActivationSignaler::Vote(signaler) => signaler.submit_vote(voter, message),
            ActivationSignaler::Timer(_) => false,
        }
    }

    // -----------------------------------------------------------------------
    // Persistence
    // -----------------------------------------------------------------------

    /// Capture the scheduler state as of `reading`.
    ///
    /// # Errors
    ///
    /// Returns [`SnapshotError::NotAuthority`] on observers.
    pub fn snapshot(&self, reading: &ClockReading) -> Result<SchedulerSnapshot, SnapshotError> {
        if !self.role.is_authority() {
            return Err(SnapshotError::NotAuthority);
        }
        let timer = self.signaler.timer();
        let run_counts = self
            .dispatcher
            .counters()
            .iter()
            .filter(|(_, counter)| counter.run > 0)
            .filter_map(|(effect, counter)| {
                self.registry.get(effect).map(|definition| SavedRunCount {
                    effect: definition.identifier().to_owned(),
                    count: counter.run,
                })
            })
            .collect();
        let active_effects = self
            .active
            .iter()
            .map(|entry| SavedTimedEffect {
                effect: entry.identifier().to_owned(),
                dispatch_id: entry.dispatch_id(),
                rng_seed: entry.rng_seed(),
                duration: entry.timing().duration,
                remaining: entry.timing().remaining(),
                data: invoke_hook(entry.identifier(), HookKind::Serialize, || {
                    entry.payload().serialize()
                })
                .unwrap_or_default(),
            })
            .collect();

        Ok(SchedulerSnapshot {
            version: SNAPSHOT_VERSION,
            saved_at: Utc::now(),
            effect_rng: self.dispatcher.rng().clone(),
            selection_rng: self.signaler.rng().clone(),
            dispatch_count: self.dispatcher.dispatch_count(),
            timer: TimerSnapshot {
                stopwatch_time: reading.stopwatch,
                realtime_time: reading.realtime,
                stopwatch_last_activation: timer.stopwatch_last_activation(),
                realtime_last_activation: timer.realtime_last_activation(),
            },
            run_counts,
            active_effects,
        })
    }

    /// Replace the scheduler state with `snapshot`, resuming at `reading`.
    ///
    /// Effects already active are ended first. Saved instances are started
    /// again without broadcasting and without drawing randomness; saved
    /// identifiers missing from the catalog are skipped. The timer keeps
    /// the same distance to its next activation on both clocks. Returns
    /// how many instances were restored.
    ///
    /// # Errors
    ///
    /// Returns [`SnapshotError::NotAuthority`] on observers and
    /// [`SnapshotError::UnsupportedVersion`] for other format versions.
    pub fn restore(
        &mut self,
        snapshot: &SchedulerSnapshot,
        reading: &ClockReading,
        host: &mut dyn SessionHost,
    ) -> Result<usize, SnapshotError> {
        if !self.role.is_authority() {
            return Err(SnapshotError::NotAuthority);
        }
        if snapshot.version != SNAPSHOT_VERSION {
            return Err(SnapshotError::UnsupportedVersion {
                found: snapshot.version,
                expected: SNAPSHOT_VERSION,
            });
        }

        self.active.end_all(host);
        self.dispatcher.set_rng(snapshot.effect_rng.clone());
        self.dispatcher.set_dispatch_count(snapshot.dispatch_count);
        self.signaler.set_rng(snapshot.selection_rng.clone());

        let counters = self.dispatcher.counters_mut();
        counters.reset_run();
        for saved in &snapshot.run_counts {
            match self.registry.find_by_identifier(&saved.effect) {
                Some(effect) => counters.set_run_count(effect, saved.count),
                None => warn!(effect = saved.effect.as_str(), "Saved count for unknown effect, skipping"),
            }
        }

        let saved_timer = snapshot.timer;
        let timer = self.signaler.timer_mut();
        timer.set_stopwatch_last_activation(
            saved_timer.stopwatch_last_activation - saved_timer.stopwatch_time + reading.stopwatch,
            reading,
        );
        timer.set_realtime_last_activation(
            saved_timer.realtime_last_activation - saved_timer.realtime_time + reading.realtime,
        );

        let mut restored = 0_usize;
        for saved in &snapshot.active_effects {
            let instance = SerializedEffect {
                dispatch_id: saved.dispatch_id,
                rng_seed: saved.rng_seed,
                duration: saved.duration,
                data: saved.data.clone(),
            };
            let registry: &EffectRegistry = &self.registry;
            let mut env = DispatchEnv {
                registry,
                settings: &self.settings,
                active: &mut self.active,
                host: &mut *host,
            };
            if EffectDispatcher::replay(&saved.effect, &instance, saved.elapsed(), &mut env)
                .is_dispatched()
            {
                restored = restored.saturating_add(1);
            }
        }
        self.last_reading = *reading;

        info!(
            dispatch_count = snapshot.dispatch_count,
            restored,
            saved_at = %snapshot.saved_at,
            "Restored scheduler state"
        );
        Ok(restored)
    }

    /// End every active effect without broadcasting.
    pub fn shutdown(&mut self) {
        self.active.shutdown();
        info!(stage = self.stage, dispatch_count = self.dispatcher.dispatch_count(), "Chaos session shut down");
    }

    // -----------------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------------

    /// The role of this session.
    pub const fn role(&self) -> Role {
        self.role
    }

    /// The run seed every stream was derived from.
    pub const fn run_seed(&self) -> u64 {
        self.run_seed
    }

    /// Stages started so far.
    pub const fn stage(&self) -> u32 {
        self.stage
    }

    /// The effect catalog.
    pub fn registry(&self) -> &EffectRegistry {
        &self.registry
    }

    /// Live per-effect settings.
    pub const fn settings(&self) -> &EffectSettingsStore {
        &self.settings
    }

    /// Live per-effect settings, mutably. Changes apply to the next
    /// selection.
    pub const fn settings_mut(&mut self) -> &mut EffectSettingsStore {
        &mut self.settings
    }

    /// Global switches.
    pub const fn general(&self) -> &GeneralConfig {
        &self.general
    }

    /// Global switches, mutably. Changes apply on the next tick.
    pub const fn general_mut(&mut self) -> &mut GeneralConfig {
        &mut self.general
    }

    /// The dispatcher.
    pub const fn dispatcher(&self) -> &EffectDispatcher {
        &self.dispatcher
    }

    /// Active timed effects.
    pub const fn active_effects(&self) -> &TimedEffectManager {
        &self.active
    }

    /// Active timed effects, mutably.
    pub const fn active_effects_mut(&mut self) -> &mut TimedEffectManager {
        &mut self.active
    }

    /// Overlay view of every active timed effect.
    pub fn active_effect_infos(&self) -> Vec<ActiveEffectInfo> {
        self.active.infos()
    }

    /// The activation signaler.
    pub const fn signaler(&self) -> &ActivationSignaler {
        &self.signaler
    }

    /// Eligibility view over the current state.
    pub fn eligibility(&self) -> Eligibility<'_> {
        self.dispatcher
            .eligibility(&self.registry, &self.settings, &self.active)
    }

    /// The clock reading of the last tick.
    pub const fn last_reading(&self) -> ClockReading {
        self.last_reading
    }

    /// Seconds until the signaler's next activation.
    pub fn time_until_next_activation(&self) -> f64 {
        self.signaler.timer().time_remaining(&self.last_reading)
    }
}

fn dispatched_or_rejected(outcome: DispatchOutcome) -> Result<CommandOutcome, CommandError> {
    match outcome {
        DispatchOutcome::Dispatched {
            effect,
            dispatch_id,
        } => Ok(CommandOutcome::Dispatched {
            effect,
            dispatch_id,
        }),
        DispatchOutcome::Rejected(reason) => Err(CommandError::Rejected {
            reason: reason.to_string(),
        }),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::float_cmp)]
mod tests {
    use chaos_types::{DispatchId, DurationKind};

    use super::*;
    use crate::effect::Effect;
    use crate::host::RecordingHost;
    use crate::registry::EffectDescriptor;

    #[derive(Debug, Default)]
    struct Fog;
    impl Effect for Fog {}

    #[derive(Debug, Default)]
    struct Confetti;
    impl Effect for Confetti {}

    fn registry() -> Arc<EffectRegistry> {
        Arc::new(EffectRegistry::from_descriptors([
            EffectDescriptor::new::<Fog>("fog", "Fog")
                .networked()
                .timed(DurationKind::FixedDuration { seconds: 30.0 })
                .allow_duplicates(false),
            EffectDescriptor::new::<Confetti>("confetti", "Confetti").networked(),
        ]))
    }

    fn config(role: Role) -> ChaosConfig {
        let mut config = ChaosConfig::default();
        config.session.seed = Some(7);
        config.session.role = role;
        config
    }

    #[test]
    fn timer_dispatches_once_per_period() {
        let mut session = ChaosSession::new(registry(), &config(Role::Authority), ClockReading::running(0.0));
        let mut host = RecordingHost::new();
        assert!(session.tick(ClockReading::running(30.0), &mut host).is_none());
        let outcome = session.tick(ClockReading::running(60.0), &mut host).unwrap();
        assert_eq!(outcome.dispatch_id(), Some(DispatchId(1)));
        assert!(session.tick(ClockReading::running(61.0), &mut host).is_none());
    }

    #[test]
    fn disabled_dispatching_stops_the_timer() {
        let mut session = ChaosSession::new(registry(), &config(Role::Authority), ClockReading::running(0.0));
        session.general_mut().disable_dispatching = true;
        let mut host = RecordingHost::new();
        assert!(session.tick(ClockReading::running(120.0), &mut host).is_none());
        assert_eq!(session.dispatcher().dispatch_count(), 0);
    }

    #[test]
    fn force_dispatch_skips_counters() {
        let mut session = ChaosSession::new(registry(), &config(Role::Authority), ClockReading::running(0.0));
        let mut host = RecordingHost::new();
        let outcome = session
            .execute_line("force-dispatch FOG 99", &mut host)
            .unwrap();
        let fog = session.registry().find_by_identifier("fog").unwrap();
        assert_eq!(
            outcome,
            CommandOutcome::Dispatched {
                effect: fog,
                dispatch_id: DispatchId(1),
            }
        );
        assert_eq!(session.dispatcher().counters().counter(fog).run, 0);
        assert_eq!(session.active_effects().get(DispatchId(1)).unwrap().rng_seed(), 99);
    }

    #[test]
    fn force_dispatch_of_running_effect_is_refused() {
        let mut session = ChaosSession::new(registry(), &config(Role::Authority), ClockReading::running(0.0));
        let mut host = RecordingHost::new();
        session.execute_line("force-dispatch fog", &mut host).unwrap();
        let result = session.execute_line("force-dispatch fog", &mut host);
        assert!(matches!(result, Err(CommandError::Ineligible { .. })));
        assert!(host.notices.contains(&Notice::CannotActivate {
            display_name: String::from("Fog"),
        }));
    }

    #[test]
    fn unknown_effect_and_observer_are_refused() {
        let mut authority = ChaosSession::new(registry(), &config(Role::Authority), ClockReading::running(0.0));
        let mut host = RecordingHost::new();
        assert!(matches!(
            authority.execute_line("force-dispatch lava", &mut host),
            Err(CommandError::UnknownEffect { .. })
        ));

        let mut observer = ChaosSession::new(registry(), &config(Role::Observer), ClockReading::running(0.0));
        assert_eq!(
            observer.execute(ChaosCommand::ForceDispatchRandom, &mut host),
            Err(CommandError::NotAuthority)
        );
        assert!(matches!(
            observer.snapshot(&ClockReading::running(0.0)),
            Err(SnapshotError::NotAuthority)
        ));
    }

    #[test]
    fn skip_and_rewind_move_the_timer() {
        let mut session = ChaosSession::new(registry(), &config(Role::Authority), ClockReading::running(0.0));
        let mut host = RecordingHost::new();
        session.tick(ClockReading::running(10.0), &mut host);
        session.execute(ChaosCommand::Rewind { seconds: 20.0 }, &mut host).unwrap();
        assert_eq!(session.time_until_next_activation(), 30.0);

        session.execute(ChaosCommand::Rewind { seconds: 100.0 }, &mut host).unwrap();
        let skipped = session.execute(ChaosCommand::SkipScheduled, &mut host).unwrap();
        assert_eq!(skipped, CommandOutcome::Skipped { count: 2 });
        assert!(session.tick(ClockReading::running(11.0), &mut host).is_none());
    }

    #[test]
    fn end_all_broadcasts_each_end() {
        let mut session = ChaosSession::new(registry(), &config(Role::Authority), ClockReading::running(0.0));
        let mut host = RecordingHost::new();
        session.execute_line("force-dispatch fog", &mut host).unwrap();
        let ended = session
            .execute(ChaosCommand::EndAllActiveEffects, &mut host)
            .unwrap();
        assert_eq!(ended, CommandOutcome::Ended { count: 1 });
        assert_eq!(host.ended_messages(), vec![DispatchId(1)]);
        assert!(session.active_effects().is_empty());
    }

    #[test]
    fn observer_follows_replication() {
        let mut authority = ChaosSession::new(registry(), &config(Role::Authority), ClockReading::running(0.0));
        let mut observer = ChaosSession::new(registry(), &config(Role::Observer), ClockReading::running(0.0));
        let mut authority_host = RecordingHost::new();
        let mut observer_host = RecordingHost::new();

        authority.execute_line("force-dispatch fog", &mut authority_host).unwrap();
        for message in &authority_host.messages {
            assert!(observer.receive(message, &mut observer_host));
        }
        assert_eq!(observer.active_effects().len(), 1);

        // Observers never time effects out on their own.
        observer.tick(ClockReading::running(100.0), &mut observer_host);
        assert_eq!(observer.active_effects().len(), 1);

        authority_host.clear();
        authority.tick(ClockReading::running(31.0), &mut authority_host);
        let end = authority_host
            .messages
            .iter()
            .find(|message| matches!(message, ReplicationMessage::EffectEnded(_)))
            .unwrap();
        assert!(observer.receive(end, &mut observer_host));
        assert!(observer.active_effects().is_empty());
    }

    #[test]
    fn timer_mode_ignores_votes() {
        let mut session = ChaosSession::new(registry(), &config(Role::Authority), ClockReading::running(0.0));
        assert!(!session.submit_vote("ana", "1"));
    }
}
