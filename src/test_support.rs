//! A small axis-aligned box world used by the unit tests. Collision is
//! swept AABB vs a list of solid boxes, navigation areas are boxes looked
//! up by containment, and the integrator is a deliberately simple ground
//! mover that honors the input contract.

use cgmath::{InnerSpace, Vector3, Zero};

use crate::input::Input;
use crate::math;
use crate::physics::{EntityState, FrameEvents, Ground};
use crate::world::{
    area_flags, clip_mask, contents, AreaNum, CollisionWorld, NavArea, NavWorld, PhysicsWorld,
    Reach, ReachNum, RouteResult, StepResult, Trace, TravelType,
};

pub struct BoxWorld {
    pub solids: Vec<(Vector3<f32>, Vector3<f32>)>,
    /// Boxes of non-solid contents (water, lava) with their contents bits.
    pub fluids: Vec<(Vector3<f32>, Vector3<f32>, u32)>,
    /// Index 0 is a dummy; area numbers index this directly.
    pub areas: Vec<NavArea>,
    pub reaches: Vec<Reach>,
    /// ((from, goal), result) pairs.
    pub routes: Vec<((AreaNum, AreaNum), RouteResult)>,
    pub excluded_areas: Vec<AreaNum>,
}

fn dummy_area() -> NavArea {
    NavArea {
        mins: Vector3::zero(),
        maxs: Vector3::zero(),
        center: Vector3::zero(),
        flags: 0,
        contents: 0,
        floor_cluster: 0,
        stairs_cluster: 0,
    }
}

pub fn grounded_area(mins: Vector3<f32>, maxs: Vector3<f32>) -> NavArea {
    NavArea {
        center: (mins + maxs) * 0.5,
        mins,
        maxs,
        flags: area_flags::GROUNDED,
        contents: 0,
        floor_cluster: 0,
        stairs_cluster: 0,
    }
}

impl BoxWorld {
    /// A flat floor at z = 0 spanning +-1024 in x and y, with a single
    /// grounded area covering it.
    pub fn flat() -> Self {
        let floor = (
            Vector3::new(-1024.0, -1024.0, -64.0),
            Vector3::new(1024.0, 1024.0, 0.0),
        );
        Self {
            solids: vec![floor],
            fluids: Vec::new(),
            areas: vec![
                dummy_area(),
                grounded_area(
                    Vector3::new(-1024.0, -1024.0, 0.0),
                    Vector3::new(1024.0, 1024.0, 128.0),
                ),
            ],
            reaches: vec![Reach {
                travel_type: TravelType::Walk,
                area: 0,
                start: Vector3::zero(),
                end: Vector3::zero(),
            }],
            routes: Vec::new(),
            excluded_areas: Vec::new(),
        }
    }

    pub fn add_wall(&mut self, mins: Vector3<f32>, maxs: Vector3<f32>) {
        self.solids.push((mins, maxs));
    }

    pub fn spawn_grounded(&self, origin: Vector3<f32>) -> EntityState {
        let mut state = EntityState {
            origin,
            ..Default::default()
        };
        state.update_areas(self);
        state
    }
}

fn box_contains(mins: Vector3<f32>, maxs: Vector3<f32>, p: Vector3<f32>) -> bool {
    p.x >= mins.x && p.x <= maxs.x && p.y >= mins.y && p.y <= maxs.y && p.z >= mins.z && p.z <= maxs.z
}

/// Segment vs AABB slab test. Returns (entry fraction, hit axis normal).
fn sweep_segment(
    from: Vector3<f32>,
    to: Vector3<f32>,
    mins: Vector3<f32>,
    maxs: Vector3<f32>,
) -> Option<(f32, Vector3<f32>)> {
    let delta = to - from;
    let mut t_enter = 0.0f32;
    let mut t_exit = 1.0f32;
    let mut normal = Vector3::zero();
    for axis in 0..3 {
        let (o, d, lo, hi) = (from[axis], delta[axis], mins[axis], maxs[axis]);
        if d.abs() < 1e-8 {
            if o < lo || o > hi {
                return None;
            }
            continue;
        }
        let inv = 1.0 / d;
        let (mut t0, mut t1) = ((lo - o) * inv, (hi - o) * inv);
        let mut axis_normal = Vector3::zero();
        axis_normal[axis] = -d.signum();
        if t0 > t1 {
            std::mem::swap(&mut t0, &mut t1);
        }
        if t0 > t_enter {
            t_enter = t0;
            normal = axis_normal;
        }
        t_exit = t_exit.min(t1);
        if t_enter > t_exit {
            return None;
        }
    }
    if t_enter <= 0.0 {
        // Started inside
        return Some((0.0, Vector3::zero()));
    }
    Some((t_enter, normal))
}

impl CollisionWorld for BoxWorld {
    fn trace_box(
        &self,
        from: Vector3<f32>,
        to: Vector3<f32>,
        mins: Vector3<f32>,
        maxs: Vector3<f32>,
        clip: u32,
    ) -> Trace {
        let mut best = Trace {
            fraction: 1.0,
            end: to,
            plane_normal: Vector3::zero(),
            contents: 0,
            start_solid: false,
            hit_entity: None,
        };
        if clip & clip_mask::SOLID == 0 {
            return best;
        }
        for &(bmins, bmaxs) in &self.solids {
            // Expand by the collider to sweep a point
            let emins = bmins + Vector3::new(-maxs.x, -maxs.y, -maxs.z);
            let emaxs = bmaxs + Vector3::new(-mins.x, -mins.y, -mins.z);
            if let Some((fraction, normal)) = sweep_segment(from, to, emins, emaxs) {
                if fraction == 0.0 && normal == Vector3::zero() {
                    best.start_solid = true;
                    best.fraction = 0.0;
                    best.end = from;
                    best.contents = contents::SOLID;
                    continue;
                }
                if fraction < best.fraction {
                    // Back off slightly so the result is not inside the box
                    let backed = (fraction - 1e-3).max(0.0);
                    best.fraction = backed;
                    best.end = from + (to - from) * backed;
                    best.plane_normal = normal;
                    best.contents = contents::SOLID;
                }
            }
        }
        best
    }

    fn trace_box_vs_entities(
        &self,
        from: Vector3<f32>,
        to: Vector3<f32>,
        mins: Vector3<f32>,
        maxs: Vector3<f32>,
        clip: u32,
        _ignore: Option<u32>,
    ) -> Trace {
        self.trace_box(from, to, mins, maxs, clip)
    }

    fn point_contents(&self, point: Vector3<f32>) -> u32 {
        for &(mins, maxs) in &self.solids {
            if box_contains(mins, maxs, point) {
                return contents::SOLID;
            }
        }
        for &(mins, maxs, bits) in &self.fluids {
            if box_contains(mins, maxs, point) {
                return bits;
            }
        }
        0
    }
}

impl NavWorld for BoxWorld {
    fn area_at(&self, point: Vector3<f32>) -> AreaNum {
        for (i, area) in self.areas.iter().enumerate().skip(1) {
            if box_contains(area.mins, area.maxs, point) {
                return i as AreaNum;
            }
        }
        0
    }

    fn area(&self, num: AreaNum) -> &NavArea {
        &self.areas[num as usize]
    }

    fn reach(&self, num: ReachNum) -> &Reach {
        &self.reaches[num as usize]
    }

    fn route(&self, from_areas: &[AreaNum], goal: AreaNum) -> Option<RouteResult> {
        for &from in from_areas {
            if from == goal {
                return Some(RouteResult {
                    reach_num: 0,
                    travel_time: 1,
                });
            }
            for &((f, g), result) in &self.routes {
                if f == from && g == goal {
                    return Some(result);
                }
            }
        }
        None
    }

    fn areas_crossed(&self, from: Vector3<f32>, to: Vector3<f32>, out: &mut Vec<AreaNum>) {
        let len = (to - from).magnitude();
        let steps = (len / 8.0).ceil().max(1.0) as usize;
        let mut last = AreaNum::MAX;
        for i in 0..=steps {
            let p = from + (to - from) * (i as f32 / steps as f32);
            let area = self.area_at(p);
            if area != last {
                out.push(area);
                last = area;
            }
        }
    }

    fn areas_in_box(&self, mins: Vector3<f32>, maxs: Vector3<f32>, out: &mut Vec<AreaNum>) {
        for (i, area) in self.areas.iter().enumerate().skip(1) {
            let overlaps = area.mins.x <= maxs.x
                && area.maxs.x >= mins.x
                && area.mins.y <= maxs.y
                && area.maxs.y >= mins.y
                && area.mins.z <= maxs.z
                && area.maxs.z >= mins.z;
            if overlaps {
                out.push(i as AreaNum);
            }
        }
    }

    fn floor_cluster_areas(&self, cluster: u32, out: &mut Vec<AreaNum>) {
        for (i, area) in self.areas.iter().enumerate().skip(1) {
            if area.floor_cluster == cluster && cluster != 0 {
                out.push(i as AreaNum);
            }
        }
    }

    fn is_area_temporarily_excluded(&self, num: AreaNum) -> bool {
        self.excluded_areas.contains(&num)
    }
}

impl PhysicsWorld for BoxWorld {
    fn advance(&self, state: &EntityState, input: &Input, millis: u32) -> StepResult {
        let mut next = state.clone();
        let mut events = FrameEvents::default();
        let dt = millis as f32 * 0.001;

        // Turn toward the commanded view
        let max_turn = self.base_turn_speed() * dt * input.turn_speed_multiplier;
        let (pitch, yaw) = input.turned_angles(next.pitch, next.yaw, max_turn);
        next.pitch = pitch;
        next.yaw = yaw;

        let grounded = next.has_ground();
        if grounded {
            let forward = math::try_normalize_2d(next.forward_dir()).unwrap_or(Vector3::zero());
            let right = next.right_dir();
            let mut wish =
                forward * input.forward_move as f32 + right * input.right_move as f32;
            if wish.magnitude2() > 1e-6 {
                wish = wish.normalize();
            }
            let speed = if input.walk {
                self.run_speed() * 0.5
            } else {
                self.run_speed()
            };
            next.velocity.x = wish.x * speed;
            next.velocity.y = wish.y * speed;
            if input.up_move > 0 {
                next.velocity.z = self.jump_speed();
                next.ground = Ground::None;
                events.has_jumped = true;
            } else {
                next.velocity.z = 0.0;
            }
        } else {
            next.velocity.z -= self.gravity() * dt;
        }

        // Move and clip
        let target = next.origin + next.velocity * dt;
        let trace = self.trace_box(next.origin, target, next.mins, next.maxs, clip_mask::SOLID);
        next.origin = trace.end;
        if !trace.is_empty() {
            let into = next.velocity.dot(trace.plane_normal);
            if into < 0.0 {
                next.velocity -= trace.plane_normal * into;
            }
        }

        // Ground check: snap down onto walkable ground within step range,
        // so a spawn slightly above the floor settles instead of flickering
        // between grounded and airborne
        let below = next.origin - Vector3::new(0.0, 0.0, 2.0);
        let down = self.trace_box(next.origin, below, next.mins, next.maxs, clip_mask::SOLID);
        if !down.is_empty() && down.plane_normal.z >= 0.7 && next.velocity.z <= 0.0 {
            next.origin = down.end;
            next.ground = Ground::World;
            next.ground_normal_z = down.plane_normal.z;
            next.height_over_ground = 0.0;
        } else if next.velocity.z > 0.0 || down.is_empty() {
            next.ground = Ground::None;
            let deep = next.origin - Vector3::new(0.0, 0.0, 256.0);
            let fall = self.trace_box(next.origin, deep, next.mins, next.maxs, clip_mask::SOLID);
            next.height_over_ground = if fall.is_empty() {
                f32::INFINITY
            } else {
                256.0 * fall.fraction
            };
        }

        let feet = next.origin + Vector3::new(0.0, 0.0, next.mins.z + 1.0);
        let water = self.point_contents(feet);
        next.water_type = water & clip_mask::WATER;
        next.water_level = if next.water_type != 0 { 2 } else { 0 };

        next.update_areas(self);
        StepResult {
            state: next,
            events,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_flat_world_walk_forward() {
        let world = BoxWorld::flat();
        let state = world.spawn_grounded(Vector3::new(0.0, 0.0, 25.0));
        assert_eq!(state.curr_area, 1);

        let mut input = Input::default();
        input.forward_move = 1;
        input.is_ucmd_set = true;
        let result = world.advance(&state, &input, 48);
        // Yaw 0 means +x
        assert!(result.state.origin.x > state.origin.x + 10.0);
        assert!(result.state.has_ground());
    }

    #[test]
    fn test_wall_stops_movement() {
        let mut world = BoxWorld::flat();
        world.add_wall(Vector3::new(64.0, -128.0, 0.0), Vector3::new(96.0, 128.0, 128.0));
        let mut state = world.spawn_grounded(Vector3::new(0.0, 0.0, 25.0));

        let mut input = Input::default();
        input.forward_move = 1;
        input.is_ucmd_set = true;
        for _ in 0..20 {
            state = world.advance(&state, &input, 48).state;
        }
        // Stopped in front of the wall (collider half-width 16)
        assert!(state.origin.x < 64.0);
        assert!(state.origin.x > 40.0);
    }
}
