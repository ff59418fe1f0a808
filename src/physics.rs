//! The agent's physical state snapshot and the discrete events a physics
//! step may report. The integrator itself is external (see
//! [`crate::world::PhysicsWorld`]); this module only describes its inputs
//! and outputs.

use cgmath::{InnerSpace, Vector3, Zero};

use crate::math;
use crate::world::{AreaNum, NavWorld};

/// What the agent is standing on, if anything.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Ground {
    None,
    World,
    /// Standing on a moving platform entity.
    Platform {
        mins: Vector3<f32>,
        maxs: Vector3<f32>,
        /// The platform has stopped at its top position.
        at_top: bool,
    },
}

/// A full snapshot of the agent's derived physical state at one instant.
/// Copied for every simulated frame, so it should stay reasonably compact.
#[derive(Clone, Debug)]
pub struct EntityState {
    pub origin: Vector3<f32>,
    pub velocity: Vector3<f32>,
    /// View pitch in degrees, negative is up.
    pub pitch: f32,
    /// View yaw in degrees.
    pub yaw: f32,
    /// Collider bounds relative to the origin.
    pub mins: Vector3<f32>,
    pub maxs: Vector3<f32>,
    pub ground: Ground,
    /// Z component of the ground plane normal. 1.0 on flat ground,
    /// meaningless while airborne.
    pub ground_normal_z: f32,
    /// 0 = dry, 1 = feet wet, 2 = waist, 3 = submerged.
    pub water_level: u8,
    /// Contents bits of the liquid the agent is in, 0 if none.
    pub water_type: u32,
    /// Area containing the origin, 0 if none.
    pub curr_area: AreaNum,
    /// Area containing the origin during the previous step.
    pub prev_area: AreaNum,
    /// Grounded area under the agent (dropped to floor), 0 if none.
    pub grounded_area: AreaNum,
    /// Distance from the collider bottom down to the floor.
    /// `f32::INFINITY` when unknown or very high.
    pub height_over_ground: f32,
}

impl EntityState {
    pub fn speed(&self) -> f32 {
        self.velocity.magnitude()
    }

    pub fn square_speed(&self) -> f32 {
        self.velocity.magnitude2()
    }

    pub fn speed_2d(&self) -> f32 {
        (self.velocity.x * self.velocity.x + self.velocity.y * self.velocity.y).sqrt()
    }

    pub fn forward_dir(&self) -> Vector3<f32> {
        math::forward_dir(self.pitch, self.yaw)
    }

    pub fn right_dir(&self) -> Vector3<f32> {
        math::right_dir(self.yaw)
    }

    pub fn has_ground(&self) -> bool {
        !matches!(self.ground, Ground::None)
    }

    pub fn is_high_above_ground(&self) -> bool {
        self.height_over_ground > 64.0
    }

    pub fn abs_mins(&self) -> Vector3<f32> {
        self.origin + self.mins
    }

    pub fn abs_maxs(&self) -> Vector3<f32> {
        self.origin + self.maxs
    }

    /// Start areas for a routing query: the grounded area first (routing
    /// prefers it), then the current area, deduplicated, zeroes skipped.
    pub fn routing_start_areas(&self) -> RoutingAreas {
        let mut areas = RoutingAreas { nums: [0; 2], len: 0 };
        if self.grounded_area != 0 {
            areas.nums[areas.len] = self.grounded_area;
            areas.len += 1;
        }
        if self.curr_area != 0 && self.curr_area != self.grounded_area {
            areas.nums[areas.len] = self.curr_area;
            areas.len += 1;
        }
        areas
    }

    /// Refresh area numbers after the origin has been modified externally
    /// (the integrator is expected to do this itself on ordinary steps).
    pub fn update_areas<W: NavWorld>(&mut self, world: &W) {
        let new_area = world.area_at(self.origin);
        if new_area != self.curr_area {
            self.prev_area = self.curr_area;
            self.curr_area = new_area;
        }
        self.grounded_area = if new_area != 0 && world.area(new_area).is_grounded() {
            new_area
        } else {
            0
        };
    }
}

impl Default for EntityState {
    fn default() -> Self {
        Self {
            origin: Vector3::zero(),
            velocity: Vector3::zero(),
            pitch: 0.0,
            yaw: 0.0,
            mins: Vector3::new(-16.0, -16.0, -24.0),
            maxs: Vector3::new(16.0, 16.0, 40.0),
            ground: Ground::World,
            ground_normal_z: 1.0,
            water_level: 0,
            water_type: 0,
            curr_area: 0,
            prev_area: 0,
            grounded_area: 0,
            height_over_ground: 0.0,
        }
    }
}

/// See [`EntityState::routing_start_areas`].
#[derive(Clone, Copy, Debug)]
pub struct RoutingAreas {
    nums: [AreaNum; 2],
    len: usize,
}

impl RoutingAreas {
    pub fn single(num: AreaNum) -> Self {
        if num == 0 {
            Self { nums: [0; 2], len: 0 }
        } else {
            Self { nums: [num, 0], len: 1 }
        }
    }

    pub fn as_slice(&self) -> &[AreaNum] {
        &self.nums[..self.len]
    }
}

/// Discrete events reported by one physics step.
#[derive(Clone, Debug, Default)]
pub struct FrameEvents {
    pub has_jumped: bool,
    pub has_dashed: bool,
    pub has_walljumped: bool,
    pub has_taken_fall_damage: bool,
    pub has_touched_jumppad: bool,
    /// Destination the touched jump pad throws toward.
    pub jumppad_target: Option<Vector3<f32>>,
    pub has_touched_teleporter: bool,
    pub has_touched_platform: bool,
    /// Entities of other touched triggers (usually items), capped by the
    /// integrator to a small count.
    pub other_touched_triggers: Vec<u32>,
}

impl FrameEvents {
    pub fn clear(&mut self) {
        self.has_jumped = false;
        self.has_dashed = false;
        self.has_walljumped = false;
        self.has_taken_fall_damage = false;
        self.has_touched_jumppad = false;
        self.jumppad_target = None;
        self.has_touched_teleporter = false;
        self.has_touched_platform = false;
        self.other_touched_triggers.clear();
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_routing_start_areas_dedup() {
        let mut state = EntityState::default();
        state.curr_area = 7;
        state.grounded_area = 7;
        assert_eq!(state.routing_start_areas().as_slice(), &[7]);

        state.grounded_area = 3;
        assert_eq!(state.routing_start_areas().as_slice(), &[3, 7]);

        state.grounded_area = 0;
        assert_eq!(state.routing_start_areas().as_slice(), &[7]);
    }
}
