//! End-to-end scheduler scenarios: selection, expiry, voting and
//! save/restore, driven through [`ChaosSession`] the way a host would.

#![allow(
    clippy::unwrap_used,
    clippy::float_cmp,
    clippy::indexing_slicing,
    clippy::arithmetic_side_effects,
    clippy::missing_panics_doc
)]

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use chaos_core::config::ChaosConfig;
use chaos_core::effect::{Effect, EffectContext, HookError, HookResult};
use chaos_core::eligibility::ActivationContext;
use chaos_core::host::RecordingHost;
use chaos_core::registry::{EffectDescriptor, EffectRegistry};
use chaos_core::rng::EffectRng;
use chaos_core::session::ChaosSession;
use chaos_core::signaler::ActivationSignaler;
use chaos_core::snapshot::SchedulerSnapshot;
use chaos_core::timer::ClockReading;
use chaos_core::vote::VoteOption;
use chaos_types::{ActivationMode, DispatchId, DurationKind, Role};
use serde::{Deserialize, Serialize};

fn authority_config(seed: u64) -> ChaosConfig {
    let mut config = ChaosConfig::default();
    config.session.seed = Some(seed);
    config.session.role = Role::Authority;
    config
}

// =============================================================================
// Scenario A: zero-weight effects are never selected
// =============================================================================

#[derive(Debug, Default)]
struct Alpha;
impl Effect for Alpha {}

#[derive(Debug, Default)]
struct Beta;
impl Effect for Beta {}

#[derive(Debug, Default)]
struct Idle;
impl Effect for Idle {}

#[test]
fn zero_weight_effect_is_never_selected() {
    let registry = Arc::new(EffectRegistry::from_descriptors([
        EffectDescriptor::new::<Alpha>("a", "A").weight(1.0),
        EffectDescriptor::new::<Beta>("b", "B").weight(0.0),
        EffectDescriptor::new::<Idle>("nothing", "Nothing").weight(0.1),
    ]));
    let session = ChaosSession::new(registry, &authority_config(1), ClockReading::running(0.0));
    let a = session.registry().find_by_identifier("a").unwrap();
    let b = session.registry().find_by_identifier("b").unwrap();
    let nothing = session.registry().find_by_identifier("nothing").unwrap();
    assert_eq!(session.registry().fallback(), nothing);

    let eligibility = session.eligibility();
    let mut rng = EffectRng::from_seed(2024);
    let mut counts = [0_u32; 3];
    for _ in 0..10_000 {
        let picked = eligibility.pick_activatable(&mut rng, &ActivationContext::NOW, |_| true);
        assert_ne!(picked, b);
        if picked == a {
            counts[0] += 1;
        } else if picked == nothing {
            counts[2] += 1;
        }
    }
    assert_eq!(counts[0] + counts[2], 10_000);
    // Expected share of "a" is 1.0 / 1.1.
    assert!((8_800..9_350).contains(&counts[0]), "a picked {} times", counts[0]);
}

// =============================================================================
// Scenario B: fixed-duration expiry ends exactly once
// =============================================================================

static SHIELD_ENDS: AtomicU32 = AtomicU32::new(0);

#[derive(Debug, Default)]
struct Shield;

impl Effect for Shield {
    fn on_end(&mut self) -> HookResult {
        SHIELD_ENDS.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[test]
fn thirty_second_effect_ends_once_between_29_9_and_30_1() {
    let registry = Arc::new(EffectRegistry::from_descriptors([
        EffectDescriptor::new::<Shield>("shield", "Shield")
            .networked()
            .timed(DurationKind::FixedDuration { seconds: 30.0 }),
    ]));
    let mut session = ChaosSession::new(registry, &authority_config(3), ClockReading::running(0.0));
    let mut host = RecordingHost::new();

    session.execute_line("force-dispatch shield", &mut host).unwrap();
    let id = DispatchId(1);
    assert!(session.active_effects().get(id).is_some());

    session.tick(ClockReading::running(29.9), &mut host);
    assert!(session.active_effects().get(id).is_some());
    assert_eq!(SHIELD_ENDS.load(Ordering::SeqCst), 0);

    session.tick(ClockReading::running(30.1), &mut host);
    assert!(session.active_effects().get(id).is_none());
    assert_eq!(SHIELD_ENDS.load(Ordering::SeqCst), 1);
    assert_eq!(host.ended_messages(), vec![id]);
    assert_eq!(host.ended, vec![id]);

    session.tick(ClockReading::running(40.0), &mut host);
    assert_eq!(SHIELD_ENDS.load(Ordering::SeqCst), 1);
    assert_eq!(host.ended_messages().len(), 1);
}

// =============================================================================
// Scenario C: most votes wins, re-votes overwrite
// =============================================================================

#[derive(Debug, Default)]
struct Red;
impl Effect for Red {}

#[derive(Debug, Default)]
struct Green;
impl Effect for Green {}

#[derive(Debug, Default)]
struct Blue;
impl Effect for Blue {}

#[test]
fn vote_winner_is_dispatched_and_revotes_overwrite() {
    let registry = Arc::new(EffectRegistry::from_descriptors([
        EffectDescriptor::new::<Red>("red", "Red").networked(),
        EffectDescriptor::new::<Green>("green", "Green").networked(),
        EffectDescriptor::new::<Blue>("blue", "Blue").networked(),
    ]));
    let mut config = authority_config(5);
    config.activation.mode = ActivationMode::Vote;
    config.activation.vote_options = 3;
    config.activation.include_random_option = false;
    let mut session = ChaosSession::new(registry, &config, ClockReading::running(0.0));
    let mut host = RecordingHost::new();

    // The first tick opens the vote.
    assert!(session.tick(ClockReading::running(0.0), &mut host).is_none());
    let ActivationSignaler::Vote(signaler) = session.signaler() else {
        panic!("vote mode builds a vote signaler");
    };
    let options = signaler.vote().options().to_vec();
    assert_eq!(options.len(), 3);
    assert!(!signaler.vote().offset_numbers());

    for (voter, vote) in ["v1", "v2", "v3", "v4", "v5"].into_iter().zip(["1", "1", "2", "3", "1"]) {
        assert!(session.submit_vote(voter, vote));
    }
    // Voting again replaces the earlier vote.
    assert!(session.submit_vote("v1", "1"));
    assert!(session.submit_vote("v4", "2"));

    let ActivationSignaler::Vote(signaler) = session.signaler() else {
        panic!("vote mode builds a vote signaler");
    };
    assert_eq!(signaler.vote().tallies(), vec![3, 2, 0]);
    assert_eq!(signaler.vote().total_votes(), 5);

    let outcome = session.tick(ClockReading::running(60.0), &mut host).unwrap();
    let VoteOption::Effect(winner) = options[0] else {
        panic!("no random option was requested");
    };
    assert!(outcome.is_dispatched());
    let dispatched = session.registry().get(winner).unwrap().identifier().to_owned();
    assert_eq!(host.dispatched_identifiers(), vec![dispatched.as_str()]);

    // The next vote opened with offset numbering and no carried-over votes.
    let ActivationSignaler::Vote(signaler) = session.signaler() else {
        panic!("vote mode builds a vote signaler");
    };
    assert!(signaler.vote().is_active());
    assert!(signaler.vote().offset_numbers());
    assert_eq!(signaler.vote().total_votes(), 0);
}

// =============================================================================
// Scenario D: save and restore mid-run
// =============================================================================

#[derive(Debug, Default, Serialize, Deserialize)]
struct Fog {
    density: u64,
}

impl Effect for Fog {
    fn on_pre_start(&mut self, ctx: &mut EffectContext<'_>) -> HookResult {
        self.density = ctx.rng.next_seed() % 100;
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

#[derive(Debug, Default)]
struct Storm;
impl Effect for Storm {}

#[derive(Debug, Default)]
struct Spark;
impl Effect for Spark {}

fn weather_registry() -> Arc<EffectRegistry> {
    Arc::new(EffectRegistry::from_descriptors([
        EffectDescriptor::new::<Fog>("fog", "Fog")
            .networked()
            .timed(DurationKind::FixedDuration { seconds: 30.0 }),
        EffectDescriptor::new::<Storm>("storm", "Storm")
            .networked()
            .timed(DurationKind::UntilStageEnd),
        EffectDescriptor::new::<Spark>("spark", "Spark"),
    ]))
}

#[test]
fn restore_resumes_counter_and_active_effects() {
    let mut session = ChaosSession::new(weather_registry(), &authority_config(9), ClockReading::running(0.0));
    let mut host = RecordingHost::new();
    for _ in 0..45 {
        session.execute_line("force-dispatch spark", &mut host).unwrap();
    }
    session.execute_line("force-dispatch fog", &mut host).unwrap();
    session.execute_line("force-dispatch storm", &mut host).unwrap();
    session.tick(ClockReading::running(17.5), &mut host);
    assert_eq!(session.dispatcher().dispatch_count(), 47);

    let density = session
        .active_effects()
        .instances_of_type::<Fog>()
        .next()
        .unwrap()
        .density;
    let json = session
        .snapshot(&ClockReading::running(17.5))
        .unwrap()
        .to_json()
        .unwrap();
    session.shutdown();

    // A fresh process resumes from the saved file.
    let snapshot = SchedulerSnapshot::from_json(&json).unwrap();
    let mut resumed = ChaosSession::new(weather_registry(), &authority_config(9), ClockReading::running(0.0));
    let mut resumed_host = RecordingHost::new();
    let restored = resumed
        .restore(&snapshot, &ClockReading::running(0.0), &mut resumed_host)
        .unwrap();
    assert_eq!(restored, 2);
    assert!(resumed_host.messages.is_empty());

    let fog = resumed.active_effects().get(DispatchId(46)).unwrap();
    assert_eq!(fog.identifier(), "fog");
    assert_eq!(fog.timing().remaining(), Some(12.5));
    let storm = resumed.active_effects().get(DispatchId(47)).unwrap();
    assert_eq!(storm.timing().kind, DurationKind::UntilStageEnd);
    assert_eq!(storm.timing().remaining(), None);
    assert_eq!(
        resumed
            .active_effects()
            .instances_of_type::<Fog>()
            .next()
            .unwrap()
            .density,
        density
    );

    // The timer keeps its distance to the next activation.
    assert_eq!(resumed.time_until_next_activation(), 42.5);

    let next = resumed.execute_line("force-dispatch spark", &mut resumed_host).unwrap();
    assert!(matches!(
        next,
        chaos_core::commands::CommandOutcome::Dispatched {
            dispatch_id: DispatchId(48),
            ..
        }
    ));
}

#[test]
fn restore_skips_unknown_effects() {
    let mut session = ChaosSession::new(weather_registry(), &authority_config(9), ClockReading::running(0.0));
    let mut host = RecordingHost::new();
    session.execute_line("force-dispatch storm", &mut host).unwrap();
    let mut snapshot = session.snapshot(&ClockReading::running(1.0)).unwrap();
    snapshot.active_effects[0].effect = String::from("volcano");
    snapshot.run_counts.push(chaos_core::snapshot::SavedRunCount {
        effect: String::from("volcano"),
        count: 4,
    });

    let mut resumed = ChaosSession::new(weather_registry(), &authority_config(9), ClockReading::running(0.0));
    let restored = resumed
        .restore(&snapshot, &ClockReading::running(0.0), &mut host)
        .unwrap();
    assert_eq!(restored, 0);
    assert!(resumed.active_effects().is_empty());
    assert_eq!(resumed.dispatcher().dispatch_count(), 1);
    let storm = resumed.registry().find_by_identifier("storm").unwrap();
    assert_eq!(resumed.dispatcher().counters().counter(storm).run, 0);
}
