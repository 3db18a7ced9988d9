//! Level generation invariants: connectivity, sealed borders, and
//! reproducibility across the seed space.

use dungeon_descent::{generate_level, DescentError, GenerationProfile, TileKind};

fn default_profile() -> GenerationProfile {
    let _ = env_logger::builder().is_test(true).try_init();
    GenerationProfile::default()
}

#[test]
fn reference_seed_produces_a_level() {
    let (map, points) = generate_level(42, 1, 64, 64, &default_profile()).unwrap();
    assert!(!points.rooms.is_empty());
    assert!(map.is_walkable(points.rooms[0]));
    assert!(map.walkable_count() > 100);
}

#[test]
fn floor_is_one_connected_component_across_seeds() {
    let profile = default_profile();
    for seed in 0..30 {
        for depth in [1, 3, 7] {
            let (map, points) = generate_level(seed, depth, 64, 64, &profile).unwrap();
            let reachable = map.reachable_from(points.rooms[0]);
            assert_eq!(
                reachable,
                map.walkable_count(),
                "seed {seed} depth {depth}: {} of {} tiles reachable",
                reachable,
                map.walkable_count()
            );
        }
    }
}

#[test]
fn border_ring_is_always_wall() {
    let profile = default_profile();
    for seed in 0..30 {
        let (map, _) = generate_level(seed, 2, 64, 64, &profile).unwrap();
        assert!(map.boundary_sealed(), "seed {seed} leaked the border");
    }
}

#[test]
fn same_inputs_reproduce_the_same_level() {
    let profile = default_profile();
    let (a, pa) = generate_level(9001, 4, 80, 64, &profile).unwrap();
    let (b, pb) = generate_level(9001, 4, 80, 64, &profile).unwrap();
    assert_eq!(a.tiles(), b.tiles());
    assert_eq!(pa.rooms, pb.rooms);
    assert_eq!(pa.pockets, pb.pockets);
}

#[test]
fn undersized_maps_are_rejected() {
    for (w, h) in [(63, 64), (64, 63), (10, 10)] {
        let err = generate_level(1, 1, w, h, &default_profile()).unwrap_err();
        assert!(matches!(err, DescentError::Generation(_)), "{w}x{h}");
    }
}

#[test]
fn deep_levels_generate_with_cave_texture() {
    let profile = default_profile();
    let mut saw_pockets = false;
    for seed in 0..10 {
        let (_, points) = generate_level(seed, 10, 64, 64, &profile).unwrap();
        saw_pockets |= !points.pockets.is_empty();
    }
    assert!(saw_pockets, "no cave pockets in any deep level");
}

#[test]
fn decorations_appear_somewhere_in_the_seed_space() {
    let profile = default_profile();
    let (mut secret, mut lever, mut trap) = (0usize, 0usize, 0usize);
    for seed in 0..10 {
        let (map, _) = generate_level(seed, 3, 64, 64, &profile).unwrap();
        for tile in map.tiles() {
            if tile.kind == TileKind::SecretWall {
                secret += 1;
            }
            if tile.lever {
                lever += 1;
            }
            if tile.trap_armed {
                trap += 1;
            }
        }
    }
    assert!(secret > 0, "no secret walls in 10 levels");
    assert!(lever > 0, "no levers in 10 levels");
    assert!(trap > 0, "no traps in 10 levels");
}

#[test]
fn spawn_points_are_walkable() {
    let profile = default_profile();
    for seed in 0..10 {
        let (map, points) = generate_level(seed, 5, 64, 64, &profile).unwrap();
        for pos in points.all() {
            assert!(map.is_walkable(pos), "seed {seed}: spawn point {pos:?} blocked");
        }
    }
}
