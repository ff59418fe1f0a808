//! Interfaces to the external collaborators of the planner: the collision
//! tracing primitives, the navigation graph and the black-box physics
//! integrator. The planning core only queries these, it never mutates them.

use cgmath::Vector3;

use crate::input::Input;
use crate::physics::{EntityState, FrameEvents};

/// Navigation area number. 0 means "no area".
pub type AreaNum = u32;

/// Reachability (nav edge) number. 0 means "no reachability".
pub type ReachNum = u32;

/// Static per-area flags of the navigation graph.
pub mod area_flags {
    pub const GROUNDED: u32 = 1 << 0;
    pub const LADDER: u32 = 1 << 1;
    pub const LIQUID: u32 = 1 << 2;
    pub const DISABLED: u32 = 1 << 3;
    pub const WALL: u32 = 1 << 4;
    pub const INCLINED_FLOOR: u32 = 1 << 5;
    /// Skip-collision hints: a step shorter than the given shift cannot hit
    /// anything while airborne inside this area.
    pub const SKIP_COLLISION_16: u32 = 1 << 6;
    pub const SKIP_COLLISION_32: u32 = 1 << 7;
    pub const SKIP_COLLISION_48: u32 = 1 << 8;
}

/// Per-area contents bits of the navigation graph.
pub mod area_contents {
    pub const WATER: u32 = 1 << 0;
    pub const LAVA: u32 = 1 << 1;
    pub const SLIME: u32 = 1 << 2;
    pub const DO_NOT_ENTER: u32 = 1 << 3;
    pub const JUMPPAD: u32 = 1 << 4;
    pub const TELEPORTER: u32 = 1 << 5;
}

/// Point/brush contents bits reported by collision queries.
pub mod contents {
    pub const SOLID: u32 = 1 << 0;
    pub const WATER: u32 = 1 << 1;
    pub const LAVA: u32 = 1 << 2;
    pub const SLIME: u32 = 1 << 3;
    pub const DO_NOT_ENTER: u32 = 1 << 4;
    pub const NO_DROP: u32 = 1 << 5;

    pub const HAZARDOUS: u32 = LAVA | SLIME | DO_NOT_ENTER;
}

/// Trace clipping masks.
pub mod clip_mask {
    use super::contents;

    pub const SOLID: u32 = contents::SOLID;
    pub const WATER: u32 = contents::WATER | contents::LAVA | contents::SLIME;
    pub const SOLID_AND_WATER: u32 = SOLID | WATER;
}

/// A plane with z-normal at or above this value can be stood upon.
pub const WALKABLE_NORMAL_Z: f32 = 0.7;

/// Result of a box trace between two points.
#[derive(Clone, Debug)]
pub struct Trace {
    /// Covered fraction of the segment in [0, 1]. 1 means nothing was hit.
    pub fraction: f32,
    pub end: Vector3<f32>,
    /// Normal of the hit plane. Meaningless if `fraction == 1.0`.
    pub plane_normal: Vector3<f32>,
    /// Contents of the hit brush.
    pub contents: u32,
    pub start_solid: bool,
    /// Entity hit by the entity-testing trace variant, if any.
    pub hit_entity: Option<u32>,
}

impl Trace {
    pub fn is_empty(&self) -> bool {
        self.fraction == 1.0 && !self.start_solid
    }

    pub fn hit_walkable_plane(&self) -> bool {
        self.fraction != 1.0 && self.plane_normal.z >= WALKABLE_NORMAL_Z
    }
}

/// How a reachability is traveled.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TravelType {
    Walk,
    WalkOffLedge,
    BarrierJump,
    WaterJump,
    Jump,
    StrafeJump,
    DoubleJump,
    JumpPad,
    Teleport,
    Elevator,
    Ladder,
}

/// A directed edge of the navigation graph.
#[derive(Clone, Debug)]
pub struct Reach {
    pub travel_type: TravelType,
    /// The area this reachability leads to.
    pub area: AreaNum,
    pub start: Vector3<f32>,
    pub end: Vector3<f32>,
}

/// Static properties of a navigation area.
#[derive(Clone, Debug)]
pub struct NavArea {
    pub mins: Vector3<f32>,
    pub maxs: Vector3<f32>,
    pub center: Vector3<f32>,
    pub flags: u32,
    pub contents: u32,
    /// 0 if the area does not belong to a floor cluster.
    pub floor_cluster: u32,
    /// 0 if the area does not belong to a stairs cluster.
    pub stairs_cluster: u32,
}

impl NavArea {
    pub fn is_grounded(&self) -> bool {
        self.flags & area_flags::GROUNDED != 0
    }
}

/// Result of a route query toward a goal area.
#[derive(Clone, Copy, Debug)]
pub struct RouteResult {
    /// The first reachability to take.
    pub reach_num: ReachNum,
    /// Travel time in hundredths of a second. Always positive.
    pub travel_time: u32,
}

/// Collision tracing primitives of the engine.
pub trait CollisionWorld {
    /// Box trace against world geometry only.
    fn trace_box(
        &self,
        from: Vector3<f32>,
        to: Vector3<f32>,
        mins: Vector3<f32>,
        maxs: Vector3<f32>,
        clip: u32,
    ) -> Trace;

    /// Box trace against world geometry and dynamic entities.
    /// `ignore` is an entity to exclude (usually the agent itself).
    fn trace_box_vs_entities(
        &self,
        from: Vector3<f32>,
        to: Vector3<f32>,
        mins: Vector3<f32>,
        maxs: Vector3<f32>,
        clip: u32,
        ignore: Option<u32>,
    ) -> Trace;

    fn point_contents(&self, point: Vector3<f32>) -> u32;

    /// Potential-visibility test between two points. A conservative
    /// implementation may always return true.
    fn is_potentially_visible(&self, from: Vector3<f32>, to: Vector3<f32>) -> bool {
        let _ = (from, to);
        true
    }
}

/// Queries against the precomputed navigation graph.
pub trait NavWorld {
    fn area_at(&self, point: Vector3<f32>) -> AreaNum;

    fn area(&self, num: AreaNum) -> &NavArea;

    fn reach(&self, num: ReachNum) -> &Reach;

    /// The preferred route toward `goal` from any of `from_areas`.
    fn route(&self, from_areas: &[AreaNum], goal: AreaNum) -> Option<RouteResult>;

    /// Ordered list of areas crossed by the segment, appended to `out`.
    fn areas_crossed(&self, from: Vector3<f32>, to: Vector3<f32>, out: &mut Vec<AreaNum>);

    /// Areas intersecting the given box, appended to `out`.
    fn areas_in_box(&self, mins: Vector3<f32>, maxs: Vector3<f32>, out: &mut Vec<AreaNum>);

    /// Areas of a floor cluster, appended to `out`.
    fn floor_cluster_areas(&self, cluster: u32, out: &mut Vec<AreaNum>);

    /// Whether routing currently excludes the area (e.g. occupied by enemies).
    fn is_area_temporarily_excluded(&self, num: AreaNum) -> bool {
        let _ = num;
        false
    }
}

/// Result of one black-box physics step.
#[derive(Clone, Debug)]
pub struct StepResult {
    pub state: EntityState,
    pub events: FrameEvents,
}

/// The full environment the planner runs against: collision, navigation and
/// the opaque "advance state by N millis given input" integrator.
pub trait PhysicsWorld: CollisionWorld + NavWorld {
    /// Advance `state` by `millis` under `input`. Must be a pure function of
    /// its arguments; the planner calls it speculatively and discards results
    /// on rollback.
    fn advance(&self, state: &EntityState, input: &Input, millis: u32) -> StepResult;

    /// The fixed physics tick in milliseconds. Step durations used by the
    /// planner are always positive multiples of this.
    fn tick_millis(&self) -> u32 {
        16
    }

    fn gravity(&self) -> f32 {
        850.0
    }

    fn run_speed(&self) -> f32 {
        320.0
    }

    fn jump_speed(&self) -> f32 {
        280.0
    }

    fn dash_speed(&self) -> f32 {
        450.0
    }

    /// The integrator's nominal view turn speed in degrees per second at a
    /// turn speed multiplier of 1.
    fn base_turn_speed(&self) -> f32 {
        360.0
    }
}
