//! End-to-end determinism: a seed plus an ordered intent sequence must
//! reproduce a run exactly, and background work must never perturb it.

use dungeon_descent::{
    from_save_string, to_save_string, Direction, GenerationProfile, PlayerIntent, Simulation,
};

fn new_sim(seed: u64) -> Simulation {
    let _ = env_logger::builder().is_test(true).try_init();
    Simulation::new(seed, 64, 64, GenerationProfile::default()).unwrap()
}

fn intent_script() -> Vec<PlayerIntent> {
    use Direction::*;
    vec![
        PlayerIntent::Wait,
        PlayerIntent::Move(East),
        PlayerIntent::Move(East),
        PlayerIntent::Move(South),
        PlayerIntent::Wait,
        PlayerIntent::Move(Southeast),
        PlayerIntent::Move(North),
        PlayerIntent::Attack(West),
        PlayerIntent::Move(West),
        PlayerIntent::Wait,
        PlayerIntent::Move(Northwest),
        PlayerIntent::Move(South),
        PlayerIntent::Wait,
        PlayerIntent::Wait,
        PlayerIntent::Move(East),
    ]
}

#[test]
fn identical_seeds_replay_identical_turns() {
    let mut a = new_sim(42);
    let mut b = new_sim(42);

    for intent in intent_script() {
        let ra = a.step_turn(intent).unwrap();
        let rb = b.step_turn(intent).unwrap();
        assert_eq!(ra, rb);
    }
    assert_eq!(a.rng_cursor(), b.rng_cursor());
    assert_eq!(to_save_string(&a).unwrap(), to_save_string(&b).unwrap());
}

#[test]
fn different_seeds_diverge() {
    let a = new_sim(1);
    let b = new_sim(2);
    let kinds_a: Vec<_> = a.map().tiles().iter().map(|t| t.kind).collect();
    let kinds_b: Vec<_> = b.map().tiles().iter().map(|t| t.kind).collect();
    assert_ne!(kinds_a, kinds_b);
}

#[test]
fn prefetch_does_not_perturb_the_run() {
    let mut with_prefetch = new_sim(42);
    let mut without = new_sim(42);

    for (i, intent) in intent_script().into_iter().enumerate() {
        if i == 3 {
            with_prefetch.prefetch_next_level();
        }
        let ra = with_prefetch.step_turn(intent).unwrap();
        let rb = without.step_turn(intent).unwrap();
        assert_eq!(ra, rb, "diverged at intent {i}");
    }
    assert_eq!(with_prefetch.rng_cursor(), without.rng_cursor());
}

#[test]
fn prefetched_descent_matches_foreground_descent() {
    let mut a = new_sim(42);
    let mut b = new_sim(42);
    a.prefetch_next_level();
    a.descend().unwrap();
    b.descend().unwrap();

    for (ta, tb) in a.map().tiles().iter().zip(b.map().tiles()) {
        assert_eq!(ta.kind, tb.kind);
    }
    // Populated identically too: same intents keep replaying identically.
    for intent in intent_script() {
        assert_eq!(a.step_turn(intent).unwrap(), b.step_turn(intent).unwrap());
    }
}

#[test]
fn save_mid_run_resumes_bit_identically() {
    let script = intent_script();
    let mut original = new_sim(1234);
    for intent in &script[..7] {
        original.step_turn(*intent).unwrap();
    }

    let snapshot = to_save_string(&original).unwrap();
    let mut restored = from_save_string(&snapshot).unwrap();

    for intent in &script[7..] {
        let ra = original.step_turn(*intent).unwrap();
        let rb = restored.step_turn(*intent).unwrap();
        assert_eq!(ra, rb);
    }
    assert_eq!(
        to_save_string(&original).unwrap(),
        to_save_string(&restored).unwrap()
    );
}

#[test]
fn saved_profile_survives_resume_and_descent() {
    let profile = GenerationProfile {
        wall_probability: 0.52,
        cave_minimum_depth: 1,
        vault_probability: 0.5,
        ..GenerationProfile::default()
    };
    let mut original = Simulation::new(77, 64, 64, profile).unwrap();
    original.step_turn(PlayerIntent::Wait).unwrap();

    let mut restored = from_save_string(&to_save_string(&original).unwrap()).unwrap();
    original.descend().unwrap();
    restored.descend().unwrap();

    // A resumed run must generate the same next level as the uninterrupted
    // one, which requires the generation knobs to ride along in the save.
    assert_eq!(original.depth(), restored.depth());
    for (ta, tb) in original.map().tiles().iter().zip(restored.map().tiles()) {
        assert_eq!(ta.kind, tb.kind);
    }
    for intent in intent_script() {
        assert_eq!(
            original.step_turn(intent).unwrap(),
            restored.step_turn(intent).unwrap()
        );
    }
}

#[test]
fn rejected_intents_do_not_advance_or_draw() {
    let mut sim = new_sim(42);
    let cursor_before = sim.rng_cursor();
    // Uses an empty inventory slot, which is always invalid at start.
    let result = sim.step_turn(PlayerIntent::UseItem(0)).unwrap();
    assert!(result.events.is_empty());
    assert_eq!(result.turn_number, 0);
    assert_eq!(sim.turn_number(), 0);
    assert_eq!(sim.rng_cursor(), cursor_before);
}
