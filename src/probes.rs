//! A lazy cache of short horizontal obstacle probes around the agent.
//! Probes are taken in 8 compass directions relative to the view at 2
//! height tiers (full collider height and above jumpable height) and are
//! computed only when a caller actually asks for them.

use cgmath::{InnerSpace, Vector3};
use rand::Rng;

use crate::math;
use crate::physics::EntityState;
use crate::world::{clip_mask, CollisionWorld, NavWorld};

/// How far a probe reaches from the collider edge.
pub const TRACE_DEPTH: f32 = 32.0;

/// Obstacles lower than this can be jumped over.
pub const JUMPABLE_HEIGHT: f32 = 40.0;

/// Probe direction indices. The first four map directly to movement keys.
pub mod probe_dir {
    pub const FRONT: u32 = 0;
    pub const BACK: u32 = 1;
    pub const LEFT: u32 = 2;
    pub const RIGHT: u32 = 3;
    pub const FRONT_LEFT: u32 = 4;
    pub const FRONT_RIGHT: u32 = 5;
    pub const BACK_LEFT: u32 = 6;
    pub const BACK_RIGHT: u32 = 7;
}

/// Bit for a full-height probe in the given direction.
pub const fn full_bit(dir: u32) -> u16 {
    1 << dir
}

/// Bit for an above-jumpable-height probe in the given direction.
pub const fn jumpable_bit(dir: u32) -> u16 {
    1 << (dir + 8)
}

pub const ALL_FULL_BITS: u16 = 0x00ff;
pub const ALL_JUMPABLE_BITS: u16 = 0xff00;

const SQRT1_2: f32 = std::f32::consts::FRAC_1_SQRT_2;

/// (forward fraction, right fraction) per probe direction.
const DIR_FRACTIONS: [(f32, f32); 8] = [
    (1.0, 0.0),
    (-1.0, 0.0),
    (0.0, -1.0),
    (0.0, 1.0),
    (SQRT1_2, -SQRT1_2),
    (SQRT1_2, SQRT1_2),
    (-SQRT1_2, -SQRT1_2),
    (-SQRT1_2, SQRT1_2),
];

/// (forward key, right key) per probe direction.
const DIR_KEY_MOVES: [(i8, i8); 8] = [
    (1, 0),
    (-1, 0),
    (0, -1),
    (0, 1),
    (1, -1),
    (1, 1),
    (-1, -1),
    (-1, 1),
];

#[derive(Clone, Copy, Debug)]
pub struct ProbeResult {
    /// 1.0 means the probe is fully open.
    pub trace_fraction: f32,
    /// The probed horizontal direction (unit length).
    pub dir: Vector3<f32>,
}

impl Default for ProbeResult {
    fn default() -> Self {
        Self {
            trace_fraction: 1.0,
            dir: Vector3::new(1.0, 0.0, 0.0),
        }
    }
}

impl ProbeResult {
    pub fn is_fully_open(&self) -> bool {
        self.trace_fraction == 1.0
    }
}

pub enum ObstacleAvoidanceResult {
    /// The intended direction is not obstructed.
    NoObstacles,
    /// A better direction was found.
    Corrected(Vector3<f32>),
    /// No probed direction improves on going straight. The caller keeps its
    /// intended direction and relies on its own failure handling.
    KeptAsIs,
}

/// Which probe height tier an avoidance query consults: the full collider
/// height, or only the band above jumpable obstacle height.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProbeTier {
    FullHeight,
    AboveJumpable,
}

impl ProbeTier {
    fn bit_shift(self) -> u32 {
        match self {
            ProbeTier::FullHeight => 0,
            ProbeTier::AboveJumpable => 8,
        }
    }
}

/// The per-frame probe cache. Stored once per predicted frame; cloning is
/// cheap and a clone stays valid since probes are tied to an origin.
#[derive(Clone, Debug)]
pub struct ProbeCache {
    results: [ProbeResult; 16],
    results_mask: u16,
    did_area_test: bool,
    has_no_full_height_obstacles: bool,
}

impl Default for ProbeCache {
    fn default() -> Self {
        Self {
            results: [ProbeResult::default(); 16],
            results_mask: 0,
            did_area_test: false,
            has_no_full_height_obstacles: false,
        }
    }
}

impl ProbeCache {
    pub fn clear(&mut self) {
        self.results_mask = 0;
        self.did_area_test = false;
        self.has_no_full_height_obstacles = false;
    }

    pub fn result(&self, bit_index: u32) -> &ProbeResult {
        debug_assert!(self.results_mask & (1 << bit_index) != 0);
        &self.results[bit_index as usize]
    }

    /// Ensure every probe requested by `mask` has been computed.
    pub fn test_for_results_mask<W: CollisionWorld + NavWorld>(
        &mut self,
        world: &W,
        state: &EntityState,
        mask: u16,
    ) {
        let needed = mask & !self.results_mask;
        if needed == 0 {
            return;
        }

        // A cheap whole-area test first: if the expanded collider box fits
        // inside the current area bounds, every probe is open.
        if !self.did_area_test {
            self.did_area_test = true;
            self.has_no_full_height_obstacles = Self::area_contains_expanded_box(world, state);
        }

        let forward = math::try_normalize_2d(state.forward_dir())
            .unwrap_or_else(|| Vector3::new(1.0, 0.0, 0.0));
        let right = state.right_dir();

        for dir_index in 0..8u32 {
            let dir = forward * DIR_FRACTIONS[dir_index as usize].0
                + right * DIR_FRACTIONS[dir_index as usize].1;
            for (bit_index, z_offset) in [
                (dir_index, 0.0f32),
                (dir_index + 8, JUMPABLE_HEIGHT),
            ] {
                let bit = 1u16 << bit_index;
                if needed & bit == 0 {
                    continue;
                }
                let fraction = if self.has_no_full_height_obstacles {
                    1.0
                } else {
                    Self::probe_fraction(world, state, dir, z_offset)
                };
                self.results[bit_index as usize] = ProbeResult {
                    trace_fraction: fraction,
                    dir,
                };
                self.results_mask |= bit;
            }
        }
    }

    fn area_contains_expanded_box<W: NavWorld>(world: &W, state: &EntityState) -> bool {
        if state.curr_area == 0 {
            return false;
        }
        let area = world.area(state.curr_area);
        let mins = state.abs_mins() - Vector3::new(TRACE_DEPTH, TRACE_DEPTH, 0.0);
        let maxs = state.abs_maxs() + Vector3::new(TRACE_DEPTH, TRACE_DEPTH, 0.0);
        mins.x >= area.mins.x
            && mins.y >= area.mins.y
            && maxs.x <= area.maxs.x
            && maxs.y <= area.maxs.y
            && mins.z >= area.mins.z
            && maxs.z <= area.maxs.z
    }

    fn probe_fraction<W: CollisionWorld>(
        world: &W,
        state: &EntityState,
        dir: Vector3<f32>,
        z_offset: f32,
    ) -> f32 {
        let mut mins = state.mins;
        mins.z = (mins.z + z_offset).min(state.maxs.z - 1.0);
        let from = state.origin;
        let to = from + dir * TRACE_DEPTH;
        let trace = world.trace_box(from, to, mins, state.maxs, clip_mask::SOLID);
        if trace.start_solid {
            0.0
        } else {
            trace.fraction
        }
    }

    /// Probe directions consulted when steering around an obstacle ahead.
    const AVOIDANCE_DIRS: [u32; 4] = [
        probe_dir::LEFT,
        probe_dir::RIGHT,
        probe_dir::FRONT_LEFT,
        probe_dir::FRONT_RIGHT,
    ];

    /// Test whether `intended` (a horizontal unit direction) runs into an
    /// obstacle at the given height tier and pick a better direction if one
    /// of the side probes scores above going straight. Side probes are
    /// scored by openness weighted by alignment with the current velocity,
    /// so the correction never fights the agent's momentum.
    /// `correction_fraction` in [0, 1] biases both the scoring and the
    /// final blend toward the most open direction.
    pub fn try_avoid_obstacles<W: CollisionWorld + NavWorld>(
        &mut self,
        world: &W,
        state: &EntityState,
        intended: Vector3<f32>,
        correction_fraction: f32,
        tier: ProbeTier,
    ) -> ObstacleAvoidanceResult {
        let shift = tier.bit_shift();
        let mut mask = 1u16 << (probe_dir::FRONT + shift);
        for dir in Self::AVOIDANCE_DIRS {
            mask |= 1u16 << (dir + shift);
        }
        self.test_for_results_mask(world, state, mask);

        let front = self.results[(probe_dir::FRONT + shift) as usize];
        if front.is_fully_open() && front.dir.dot(intended) > 0.95 {
            return ObstacleAvoidanceResult::NoObstacles;
        }

        let align_dir = math::try_normalize_2d(state.velocity).unwrap_or(intended);
        let alpha = 0.51 + 0.24 * correction_fraction;
        let beta = 0.49 - 0.24 * correction_fraction;
        let score = |result: &ProbeResult| {
            let value = alpha * result.trace_fraction + beta * result.dir.dot(align_dir).max(0.0);
            if result.is_fully_open() {
                value * 3.0
            } else {
                value
            }
        };

        let mut best_score = score(&front);
        let mut best_dir = None;
        for dir in Self::AVOIDANCE_DIRS {
            let result = &self.results[(dir + shift) as usize];
            if result.trace_fraction < 0.3 {
                continue;
            }
            let dir_score = score(result);
            if dir_score > best_score {
                best_score = dir_score;
                best_dir = Some(result.dir);
            }
        }

        match best_dir {
            None => ObstacleAvoidanceResult::KeptAsIs,
            Some(dir) => {
                let blended = intended * (1.0 - correction_fraction) + dir * correction_fraction;
                match math::try_normalize(blended) {
                    Some(corrected) => ObstacleAvoidanceResult::Corrected(corrected),
                    None => ObstacleAvoidanceResult::Corrected(dir),
                }
            }
        }
    }

    /// Movement keys that head toward `target` while preferring directions
    /// not blocked above jumpable height. Returns (forward, right).
    pub fn make_key_moves_to_target<W: CollisionWorld + NavWorld>(
        &mut self,
        world: &W,
        state: &EntityState,
        target: Vector3<f32>,
    ) -> (i8, i8) {
        self.test_for_results_mask(world, state, ALL_JUMPABLE_BITS);

        let to_target = match math::try_normalize_2d(target - state.origin) {
            Some(dir) => dir,
            None => return (0, 0),
        };

        let mut best_score = f32::MIN;
        let mut best_keys = (0, 0);
        for dir_index in 0..8usize {
            let result = &self.results[dir_index + 8];
            if result.trace_fraction < 0.5 {
                continue;
            }
            let score = result.dir.dot(to_target) + 0.3 * result.trace_fraction;
            if score > best_score {
                best_score = score;
                best_keys = DIR_KEY_MOVES[dir_index];
            }
        }
        best_keys
    }

    /// Like [`Self::make_key_moves_to_target`] but adds a random sideways
    /// component to look less predictable.
    pub fn make_randomized_key_moves_to_target<W, R>(
        &mut self,
        rng: &mut R,
        world: &W,
        state: &EntityState,
        target: Vector3<f32>,
    ) -> (i8, i8)
    where
        W: CollisionWorld + NavWorld,
        R: Rng,
    {
        let (forward, right) = self.make_key_moves_to_target(world, state, target);
        if forward != 0 && right == 0 && rng.gen_bool(0.5) {
            let side = if rng.gen_bool(0.5) { 1 } else { -1 };
            let dir_index = Self::keys_to_dir_index(forward, side);
            if self.results[dir_index + 8].trace_fraction > 0.7 {
                return (forward, side);
            }
        }
        (forward, right)
    }

    /// Random movement keys among directions open above jumpable height.
    pub fn make_random_key_moves<W, R>(
        &mut self,
        rng: &mut R,
        world: &W,
        state: &EntityState,
    ) -> (i8, i8)
    where
        W: CollisionWorld + NavWorld,
        R: Rng,
    {
        self.test_for_results_mask(world, state, ALL_JUMPABLE_BITS);

        let mut open = [0usize; 8];
        let mut num_open = 0;
        for dir_index in 0..8usize {
            if self.results[dir_index + 8].trace_fraction > 0.7 {
                open[num_open] = dir_index;
                num_open += 1;
            }
        }
        if num_open == 0 {
            return (0, 0);
        }
        DIR_KEY_MOVES[open[rng.gen_range(0..num_open)]]
    }

    fn keys_to_dir_index(forward: i8, right: i8) -> usize {
        for (i, &keys) in DIR_KEY_MOVES.iter().enumerate() {
            if keys == (forward, right) {
                return i;
            }
        }
        0
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::test_support::BoxWorld;

    #[test]
    fn test_open_area_shortcut_marks_all_probes_open() {
        let world = BoxWorld::flat();
        let state = world.spawn_grounded(Vector3::new(0.0, 0.0, 25.0));
        let mut cache = ProbeCache::default();
        cache.test_for_results_mask(&world, &state, ALL_FULL_BITS | ALL_JUMPABLE_BITS);
        for i in 0..16u32 {
            assert!(cache.result(i).is_fully_open());
        }
    }

    #[test]
    fn test_front_wall_blocks_front_probe() {
        let mut world = BoxWorld::flat();
        // Close wall ahead of the spawn (yaw 0 looks toward +x). The nav
        // area ends at the wall face, as real areas never contain solids.
        world.add_wall(Vector3::new(24.0, -128.0, 0.0), Vector3::new(48.0, 128.0, 128.0));
        world.areas[1].maxs.x = 24.0;
        let state = world.spawn_grounded(Vector3::new(0.0, 0.0, 25.0));

        let mut cache = ProbeCache::default();
        cache.test_for_results_mask(&world, &state, ALL_FULL_BITS);
        assert!(!cache.result(probe_dir::FRONT).is_fully_open());
        assert!(cache.result(probe_dir::BACK).is_fully_open());
        assert!(cache.result(probe_dir::LEFT).is_fully_open());
    }

    #[test]
    fn test_avoidance_steers_away_from_wall() {
        let mut world = BoxWorld::flat();
        world.add_wall(Vector3::new(24.0, -128.0, 0.0), Vector3::new(48.0, 128.0, 128.0));
        world.areas[1].maxs.x = 24.0;
        let state = world.spawn_grounded(Vector3::new(0.0, 0.0, 25.0));

        let mut cache = ProbeCache::default();
        let intended = Vector3::new(1.0, 0.0, 0.0);
        match cache.try_avoid_obstacles(&world, &state, intended, 0.8, ProbeTier::FullHeight) {
            ObstacleAvoidanceResult::Corrected(dir) => {
                // Steered off the +x axis
                assert!(dir.x < 0.95, "dir = {:?}", dir);
            }
            _ => panic!("expected a corrected direction"),
        }
    }

    #[test]
    fn test_avoidance_keeps_intended_dir_in_a_dead_end() {
        let mut world = BoxWorld::flat();
        // A pocket: wall ahead and close walls on both sides. No side probe
        // scores better than pushing straight at the front wall.
        world.add_wall(Vector3::new(24.0, -128.0, 0.0), Vector3::new(48.0, 128.0, 128.0));
        world.add_wall(Vector3::new(-128.0, 20.0, 0.0), Vector3::new(128.0, 44.0, 128.0));
        world.add_wall(Vector3::new(-128.0, -44.0, 0.0), Vector3::new(128.0, -20.0, 128.0));
        world.areas[1].maxs.x = 24.0;
        world.areas[1].mins.y = -20.0;
        world.areas[1].maxs.y = 20.0;
        let state = world.spawn_grounded(Vector3::new(0.0, 0.0, 25.0));

        let mut cache = ProbeCache::default();
        let intended = Vector3::new(1.0, 0.0, 0.0);
        match cache.try_avoid_obstacles(&world, &state, intended, 0.8, ProbeTier::FullHeight) {
            ObstacleAvoidanceResult::KeptAsIs => {}
            ObstacleAvoidanceResult::NoObstacles => panic!("the front probe is blocked"),
            ObstacleAvoidanceResult::Corrected(dir) => {
                panic!("no side is better here, got {:?}", dir)
            }
        }
    }

    #[test]
    fn test_jumpable_tier_ignores_low_obstacles() {
        let mut world = BoxWorld::flat();
        // Knee-high step ahead: blocks the full-height tier, passes under
        // the above-jumpable one
        world.add_wall(Vector3::new(24.0, -128.0, 0.0), Vector3::new(48.0, 128.0, 30.0));
        world.areas[1].maxs.x = 24.0;
        let state = world.spawn_grounded(Vector3::new(0.0, 0.0, 25.0));
        let intended = Vector3::new(1.0, 0.0, 0.0);

        let mut cache = ProbeCache::default();
        assert!(matches!(
            cache.try_avoid_obstacles(&world, &state, intended, 0.8, ProbeTier::AboveJumpable),
            ObstacleAvoidanceResult::NoObstacles
        ));
        match cache.try_avoid_obstacles(&world, &state, intended, 0.8, ProbeTier::FullHeight) {
            ObstacleAvoidanceResult::Corrected(dir) => assert!(dir.x < 0.95, "dir = {:?}", dir),
            _ => panic!("expected a corrected direction at full height"),
        }
    }

    #[test]
    fn test_key_moves_prefer_open_side() {
        let mut world = BoxWorld::flat();
        // Tall wall ahead; the target is behind it, so keys should steer
        // to a side instead of straight forward.
        world.add_wall(Vector3::new(24.0, -128.0, 0.0), Vector3::new(48.0, 128.0, 256.0));
        world.areas[1].maxs.x = 24.0;
        let state = world.spawn_grounded(Vector3::new(0.0, 0.0, 25.0));

        let mut cache = ProbeCache::default();
        let (forward, right) = cache.make_key_moves_to_target(
            &world,
            &state,
            Vector3::new(300.0, 0.0, 25.0),
        );
        assert!(!(forward == 1 && right == 0));
        assert!(forward != 0 || right != 0);
    }
}
