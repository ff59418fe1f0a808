//! Selection of jumpable spots: candidate points the agent could reach
//! with a single jump (or an externally applied knockback), verified by
//! the trajectory predictor. Candidates are scored once, kept in a binary
//! heap and tested best-first; the first candidate whose simulated flight
//! lands cleanly wins.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use cgmath::Vector3;
use log::trace;

use crate::math;
use crate::physics::EntityState;
use crate::trajectory::{stop_event, Results, TrajectoryPredictor};
use crate::world::{area_contents, AreaNum, PhysicsWorld};

/// A scored candidate spot. The heap orders by score, largest first.
#[derive(Clone, Copy, Debug)]
pub struct SpotAndScore {
    pub origin: Vector3<f32>,
    pub score: f32,
    pub area: AreaNum,
}

impl PartialEq for SpotAndScore {
    fn eq(&self, other: &Self) -> bool {
        self.score == other.score
    }
}

impl Eq for SpotAndScore {}

impl PartialOrd for SpotAndScore {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for SpotAndScore {
    fn cmp(&self, other: &Self) -> Ordering {
        self.score.total_cmp(&other.score)
    }
}

/// How the flight toward a spot starts.
#[derive(Clone, Copy, Debug)]
pub enum JumpImpulse {
    /// Run at the spot and jump: horizontal run speed plus vertical jump
    /// speed.
    RunAndJump { run_speed: f32, jump_speed: f32 },
    /// A fixed initial velocity (jump pad or weapon knockback).
    Knockback(Vector3<f32>),
}

/// Where candidate spots come from.
#[derive(Clone, Copy, Debug)]
pub enum CandidateSource {
    Box {
        mins: Vector3<f32>,
        maxs: Vector3<f32>,
    },
    FloorCluster(u32),
}

/// An accepted spot and the predicted flight to it.
#[derive(Clone, Copy, Debug)]
pub struct JumpableSpot {
    pub origin: Vector3<f32>,
    pub area: AreaNum,
    pub flight_millis: u32,
}

/// Landing must end up within this 2D distance of the candidate.
const LANDING_TOLERANCE: f32 = 48.0;

/// The detector with its reusable scratch buffers.
pub struct JumpSpotsDetector {
    predictor: TrajectoryPredictor,
    areas_buf: Vec<AreaNum>,
    heap: BinaryHeap<SpotAndScore>,
}

impl Default for JumpSpotsDetector {
    fn default() -> Self {
        Self::new()
    }
}

impl JumpSpotsDetector {
    pub fn new() -> Self {
        Self {
            predictor: TrajectoryPredictor::new(),
            areas_buf: Vec::new(),
            heap: BinaryHeap::new(),
        }
    }

    /// Find the best reachable spot. `prefer_near` biases scoring toward a
    /// point of interest (usually the nav target); otherwise higher and
    /// closer spots score better.
    pub fn find_jumpable_spot<W: PhysicsWorld>(
        &mut self,
        world: &W,
        state: &EntityState,
        impulse: JumpImpulse,
        source: CandidateSource,
        prefer_near: Option<Vector3<f32>>,
    ) -> Option<JumpableSpot> {
        self.collect_candidates(world, state, source, prefer_near);
        trace!("testing {} jumpable spot candidates", self.heap.len());

        // Candidates come off the heap already best-first; the first one
        // that survives the flight test is the answer
        while let Some(candidate) = self.heap.pop() {
            if let Some(spot) = self.test_candidate(world, state, impulse, &candidate) {
                self.heap.clear();
                return Some(spot);
            }
        }
        None
    }

    fn collect_candidates<W: PhysicsWorld>(
        &mut self,
        world: &W,
        state: &EntityState,
        source: CandidateSource,
        prefer_near: Option<Vector3<f32>>,
    ) {
        self.areas_buf.clear();
        self.heap.clear();
        match source {
            CandidateSource::Box { mins, maxs } => {
                world.areas_in_box(mins, maxs, &mut self.areas_buf)
            }
            CandidateSource::FloorCluster(cluster) => {
                world.floor_cluster_areas(cluster, &mut self.areas_buf)
            }
        }

        for &num in &self.areas_buf {
            let area = world.area(num);
            if !area.is_grounded() {
                continue;
            }
            if area.contents
                & (area_contents::LAVA | area_contents::SLIME | area_contents::DO_NOT_ENTER)
                != 0
            {
                continue;
            }
            let spot = Vector3::new(area.center.x, area.center.y, area.mins.z - state.mins.z);
            if num == state.curr_area || math::distance_2d(spot, state.origin) < 24.0 {
                continue;
            }
            let score = match prefer_near {
                Some(point) => -math::distance(spot, point),
                None => (spot.z - state.origin.z) - 0.2 * math::distance_2d(spot, state.origin),
            };
            self.heap.push(SpotAndScore {
                origin: spot,
                score,
                area: num,
            });
        }
    }

    fn test_candidate<W: PhysicsWorld>(
        &mut self,
        world: &W,
        state: &EntityState,
        impulse: JumpImpulse,
        candidate: &SpotAndScore,
    ) -> Option<JumpableSpot> {
        let velocity = match impulse {
            JumpImpulse::RunAndJump {
                run_speed,
                jump_speed,
            } => {
                let dir = math::try_normalize_2d(candidate.origin - state.origin)?;
                Vector3::new(dir.x * run_speed, dir.y * run_speed, jump_speed)
            }
            JumpImpulse::Knockback(velocity) => velocity,
        };

        self.predictor = TrajectoryPredictor::new();
        self.predictor
            .set_step_millis(64)
            .set_num_steps(24)
            .set_gravity(world.gravity())
            .set_collider_bounds(state.mins, state.maxs)
            .add_stop_event_flags(stop_event::HIT_SOLID)
            .set_enter_area_props(
                0,
                area_contents::LAVA | area_contents::SLIME | area_contents::DO_NOT_ENTER,
            );

        let mut results = Results::default();
        let events = self
            .predictor
            .run(world, state.origin, velocity, &mut results);

        if events != stop_event::HIT_SOLID {
            return None;
        }
        let trace = results.trace.as_ref()?;
        if !trace.hit_walkable_plane() {
            return None;
        }
        if math::distance_2d(results.origin, candidate.origin) > LANDING_TOLERANCE {
            return None;
        }
        if (results.origin.z - candidate.origin.z).abs() > 40.0 {
            return None;
        }
        Some(JumpableSpot {
            origin: candidate.origin,
            area: candidate.area,
            flight_millis: results.millis_ahead,
        })
    }
}
