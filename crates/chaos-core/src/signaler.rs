//! Activation signalers: what decides that the next effect should start.
//!
//! [`TimerSignaler`] dispatches a weighted pick every time its timer fires.
//! [`VoteSignaler`] runs a vote between timer fires and dispatches the
//! winner. Both re-read the live [`GeneralConfig`] on every update, so a
//! period change or the global dispatch switch applies on the next tick.

use std::collections::BTreeSet;

use chaos_types::{DispatchArgs, DispatchFlags, EffectIndex};
use tracing::{debug, info, warn};

use crate::config::{ActivationConfig, GeneralConfig, SelectionConfig};
use crate::dispatcher::{DispatchEnv, DispatchOutcome, EffectDispatcher};
use crate::eligibility::{ActivationContext, Eligibility};
use crate::rng::EffectRng;
use crate::timer::{ClockReading, DualClockTimer};
use crate::vote::{VoteOption, VoteSelection};

/// Dispatches a weighted random effect on every timer fire.
#[derive(Debug, Clone)]
pub struct TimerSignaler {
    timer: DualClockTimer,
    rng: EffectRng,
    selection: SelectionConfig,
    stage_effects: Option<BTreeSet<EffectIndex>>,
}

impl TimerSignaler {
    /// A signaler whose first fire is one period after `reading`.
    pub fn new(
        general: &GeneralConfig,
        selection: SelectionConfig,
        reading: &ClockReading,
        rng: EffectRng,
    ) -> Self {
        Self {
            timer: DualClockTimer::new(general.time_between_effects, *reading),
            rng,
            selection,
            stage_effects: None,
        }
    }

    /// Draw this stage's effect list, if per-stage lists are enabled.
    ///
    /// Effects are drawn by weight without replacement from every enabled
    /// effect.
    pub fn start_stage(&mut self, eligibility: &Eligibility<'_>) {
        if !self.selection.per_stage_effect_list {
            self.stage_effects = None;
            return;
        }
        let mut pool = eligibility.enabled_effects(|_| true);
        let size = usize::try_from(self.selection.per_stage_list_size).unwrap_or(usize::MAX);
        let mut picked = BTreeSet::new();
        while picked.len() < size {
            let Some(effect) = pool.get_and_remove_random(&mut self.rng) else {
                break;
            };
            picked.insert(effect);
        }
        info!(effect_count = picked.len(), "Generated per-stage effect list");
        self.stage_effects = Some(picked);
    }

    /// This stage's effect list, when per-stage lists are enabled.
    pub const fn stage_effects(&self) -> Option<&BTreeSet<EffectIndex>> {
        self.stage_effects.as_ref()
    }

    /// Advance the timer and dispatch if it fires.
    pub fn update(
        &mut self,
        reading: &ClockReading,
        general: &GeneralConfig,
        dispatcher: &mut EffectDispatcher,
        env: &mut DispatchEnv<'_>,
    ) -> Option<DispatchOutcome> {
        self.timer.set_period(general.time_between_effects);
        if general.disable_dispatching || !self.timer.update(reading) {
            return None;
        }

        let Self {
            rng, stage_effects, ..
        } = self;
        let effect = dispatcher
            .eligibility(env.registry, env.settings, env.active)
            .pick_activatable(rng, &ActivationContext::NOW, |effect| {
                stage_effects
                    .as_ref()
                    .is_none_or(|list| list.contains(&effect))
            });
        debug!(effect = %effect, "Timer picked effect");
        Some(dispatcher.dispatch(
            effect,
            DispatchArgs::with_flags(DispatchFlags::TRUST_CALLER),
            env,
        ))
    }

    /// The underlying timer.
    pub const fn timer(&self) -> &DualClockTimer {
        &self.timer
    }

    /// The underlying timer, mutably.
    pub const fn timer_mut(&mut self) -> &mut DualClockTimer {
        &mut self.timer
    }

    /// The selection stream.
    pub const fn rng(&self) -> &EffectRng {
        &self.rng
    }

    /// Replace the selection stream, used when restoring a save.
    pub fn set_rng(&mut self, rng: EffectRng) {
        self.rng = rng;
    }
}

/// Runs audience votes and dispatches each winner.
#[derive(Debug, Clone)]
pub struct VoteSignaler {
    timer: DualClockTimer,
    rng: EffectRng,
    activation: ActivationConfig,
    vote: VoteSelection<String>,
    vote_start_count: u32,
}

impl VoteSignaler {
    /// A signaler whose first vote closes one period after `reading`.
    pub fn new(
        general: &GeneralConfig,
        activation: ActivationConfig,
        reading: &ClockReading,
        rng: EffectRng,
    ) -> Self {
        Self {
            timer: DualClockTimer::new(general.time_between_effects, *reading),
            rng,
            activation,
            vote: VoteSelection::new(activation.winner_mode),
            vote_start_count: 0,
        }
    }

    /// Number of options per vote, counting the random option.
    pub fn option_count(&self) -> usize {
        let effects = usize::try_from(self.activation.vote_options).unwrap_or(usize::MAX);
        if self.activation.include_random_option {
            effects.saturating_add(1)
        } else {
            effects
        }
    }

    /// Open the next vote.
    ///
    /// Candidates must be able to start when the vote closes. When they
    /// run out, the remaining slots are filled with the fallback effect.
    pub fn begin_next_vote(&mut self, reading: &ClockReading, eligibility: &Eligibility<'_>) {
        let offset_numbers = self.vote_start_count % 2 != 0;
        self.vote_start_count = self.vote_start_count.wrapping_add(1);

        let closes_in = self.timer.time_remaining(reading);
        let mut candidates = eligibility.activatable_effects(&ActivationContext::with_delay(closes_in));

        let total = self.option_count();
        let mut options = Vec::with_capacity(total);
        for position in 0..total {
            let is_last = position.saturating_add(1) == total;
            if self.activation.include_random_option && is_last {
                options.push(VoteOption::Random);
                continue;
            }
            match candidates.get_and_remove_random(&mut self.rng) {
                Some(effect) => options.push(VoteOption::Effect(effect)),
                None => {
                    warn!(position, "No activatable effects remain for vote option");
                    options.push(VoteOption::Effect(eligibility.fallback()));
                }
            }
        }

        debug!(option_count = options.len(), offset_numbers, "Started vote");
        self.vote.start_vote(options, offset_numbers);
    }

    /// Advance the timer; when it fires, dispatch the winner and open the
    /// next vote.
    pub fn update(
        &mut self,
        reading: &ClockReading,
        general: &GeneralConfig,
        dispatcher: &mut EffectDispatcher,
        env: &mut DispatchEnv<'_>,
    ) -> Option<DispatchOutcome> {
        self.timer.set_period(general.time_between_effects);
        if general.disable_dispatching {
            if self.vote.is_active() {
                self.vote.end_vote();
            }
            return None;
        }
        if !self.vote.is_active() {
            let eligibility = dispatcher.eligibility(env.registry, env.settings, env.active);
            self.begin_next_vote(reading, &eligibility);
        }
        if !self.timer.update(reading) {
            return None;
        }

        let outcome = match self.vote.resolve(&mut self.rng) {
            Some(VoteOption::Random) => {
                let effect = dispatcher
                    .eligibility(env.registry, env.settings, env.active)
                    .pick_activatable(&mut self.rng, &ActivationContext::NOW, |_| true);
                Some(dispatcher.dispatch(
                    effect,
                    DispatchArgs::with_flags(DispatchFlags::TRUST_CALLER),
                    env,
                ))
            }
            Some(VoteOption::Effect(effect)) => {
                Some(dispatcher.dispatch(effect, DispatchArgs::default(), env))
            }
            None => {
                warn!("Failed to get vote result");
                None
            }
        };

        let eligibility = dispatcher.eligibility(env.registry, env.settings, env.active);
        self.begin_next_vote(reading, &eligibility);
        outcome
    }

    /// Record a chat message as a vote. Returns whether it counted.
    pub fn submit_vote(&mut self, voter: impl Into<String>, message: &str) -> bool {
        self.vote.submit_vote(voter.into(), message)
    }

    /// The current vote.
    pub const fn vote(&self) -> &VoteSelection<String> {
        &self.vote
    }

    /// The underlying timer.
    pub const fn timer(&self) -> &DualClockTimer {
        &self.timer
    }

    /// The underlying timer, mutably.
    pub const fn timer_mut(&mut self) -> &mut DualClockTimer {
        &mut self.timer
    }

    /// The vote stream.
    pub const fn rng(&self) -> &EffectRng {
        &self.rng
    }

    /// Replace the vote stream, used when restoring a save.
    pub fn set_rng(&mut self, rng: EffectRng) {
        self.rng = rng;
    }
}

/// The active signaler of a session.
#[derive(Debug, Clone)]
pub enum ActivationSignaler {
    /// Timer-driven weighted picks.
    Timer(TimerSignaler),
    /// Audience votes.
    Vote(VoteSignaler),
}

impl ActivationSignaler {
    /// Advance and dispatch if due.
    pub fn update(
        &mut self,
        reading: &ClockReading,
        general: &GeneralConfig,
        dispatcher: &mut EffectDispatcher,
        env: &mut DispatchEnv<'_>,
    ) -> Option<DispatchOutcome> {
        match self {
            Self::Timer(signaler) => signaler.update(reading, general, dispatcher, env),
            Self::Vote(signaler) => signaler.update(reading, general, dispatcher, env),
        }
    }

    /// Stage start hook.
    pub fn start_stage(&mut self, eligibility: &Eligibility<'_>) {
        if let Self::Timer(signaler) = self {
            signaler.start_stage(eligibility);
        }
    }

    /// The underlying timer.
    pub const fn timer(&self) -> &DualClockTimer {
        match self {
            Self::Timer(signaler) => signaler.timer(),
            Self::Vote(signaler) => signaler.timer(),
        }
    }

    /// The underlying timer, mutably.
    pub const fn timer_mut(&mut self) -> &mut DualClockTimer {
        match self {
            Self::Timer(signaler) => signaler.timer_mut(),
            Self::Vote(signaler) => signaler.timer_mut(),
        }
    }

    /// The selection or vote stream.
    pub const fn rng(&self) -> &EffectRng {
        match self {
            Self::Timer(signaler) => signaler.rng(),
            Self::Vote(signaler) => signaler.rng(),
        }
    }

    /// Replace the selection or vote stream.
    pub fn set_rng(&mut self, rng: EffectRng) {
        match self {
            Self::Timer(signaler) => signaler.set_rng(rng),
            Self::Vote(signaler) => signaler.set_rng(rng),
        }
    }
}
