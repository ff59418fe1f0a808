//! A reusable ballistic trajectory predictor: simulates a collider box under
//! constant gravity for a bounded number of fixed-size steps, stopping on
//! configurable events. It is a pure function of its start state and
//! configuration and knows nothing about planning.

use cgmath::Vector3;

use crate::world::{clip_mask, AreaNum, CollisionWorld, NavWorld, Trace};

/// Stop event bits. A run result is a combination of these.
pub mod stop_event {
    /// The trajectory hit solid world geometry. A solid hit always
    /// terminates a run; the bit is reported whether or not requested.
    pub const HIT_SOLID: u32 = 1 << 0;
    /// The trajectory hit a dynamic entity (requires entity collision props).
    pub const HIT_ENTITY: u32 = 1 << 1;
    pub const ENTER_LIQUID: u32 = 1 << 2;
    pub const LEAVE_LIQUID: u32 = 1 << 3;
    /// Entered the area set by `set_enter_area_num()`.
    pub const ENTER_AREA_NUM: u32 = 1 << 4;
    /// Left the area set by `set_leave_area_num()`.
    pub const LEAVE_AREA_NUM: u32 = 1 << 5;
    /// Entered an area matching the flags criterion.
    pub const ENTER_AREA_FLAGS: u32 = 1 << 6;
    /// Entered an area matching the contents criterion.
    pub const ENTER_AREA_CONTENTS: u32 = 1 << 7;
    /// The final extrapolated step was taken (timeout estimate).
    pub const EXTRAPOLATED: u32 = 1 << 8;
    /// A step inspector has interrupted the run.
    pub const INTERRUPTED: u32 = 1 << 9;
}

/// Where a run ended and what it crossed on its last step.
#[derive(Clone, Debug)]
pub struct Results {
    pub origin: Vector3<f32>,
    /// The collision trace of the stopping step, if it stopped on a hit.
    pub trace: Option<Trace>,
    /// The last navigation area crossed by the trajectory.
    pub last_area: AreaNum,
    pub millis_ahead: u32,
}

impl Default for Results {
    fn default() -> Self {
        Self {
            origin: Vector3::new(0.0, 0.0, 0.0),
            trace: None,
            last_area: 0,
            millis_ahead: 0,
        }
    }
}

impl Results {
    pub fn clear(&mut self) {
        *self = Self::default();
    }
}

/// Per-step extension point. Return true to terminate the run early
/// (the run result will contain [`stop_event::INTERRUPTED`]).
pub trait StepInspector {
    fn on_predictor_step(&mut self, results: &Results) -> bool {
        let _ = results;
        false
    }
}

/// The default no-op inspector.
pub struct NoInspector;

impl StepInspector for NoInspector {}

/// Which area conditions are active for a run. Precompiled once per run so
/// irrelevant conditions are never tested on the hot path.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum AreaConds {
    None,
    NumOnly,
    PropsOnly,
    NumAndProps,
}

#[derive(Clone, Debug)]
pub struct TrajectoryPredictor {
    step_millis: u32,
    num_steps: u32,
    collider_mins: Vector3<f32>,
    collider_maxs: Vector3<f32>,
    gravity: f32,
    stop_events: u32,
    enter_area_num: AreaNum,
    leave_area_num: AreaNum,
    enter_area_flags: u32,
    enter_area_contents: u32,
    test_entities: bool,
    ignore_entity: Option<u32>,
    extrapolate_last_step: bool,
    // Scratch for area traces, reused across steps
    areas_buf: Vec<AreaNum>,
}

impl Default for TrajectoryPredictor {
    fn default() -> Self {
        Self::new()
    }
}

impl TrajectoryPredictor {
    pub fn new() -> Self {
        Self {
            step_millis: 128,
            num_steps: 8,
            collider_mins: Vector3::new(0.0, 0.0, 0.0),
            collider_maxs: Vector3::new(0.0, 0.0, 0.0),
            gravity: 850.0,
            stop_events: 0,
            enter_area_num: 0,
            leave_area_num: 0,
            enter_area_flags: 0,
            enter_area_contents: 0,
            test_entities: false,
            ignore_entity: None,
            extrapolate_last_step: false,
            areas_buf: Vec::new(),
        }
    }

    pub fn set_step_millis(&mut self, millis: u32) -> &mut Self {
        debug_assert!(millis > 0);
        self.step_millis = millis;
        self
    }

    pub fn set_num_steps(&mut self, steps: u32) -> &mut Self {
        debug_assert!(steps > 0);
        self.num_steps = steps;
        self
    }

    pub fn set_collider_bounds(&mut self, mins: Vector3<f32>, maxs: Vector3<f32>) -> &mut Self {
        self.collider_mins = mins;
        self.collider_maxs = maxs;
        self
    }

    pub fn set_gravity(&mut self, gravity: f32) -> &mut Self {
        self.gravity = gravity;
        self
    }

    pub fn add_stop_event_flags(&mut self, flags: u32) -> &mut Self {
        self.stop_events |= flags;
        self
    }

    pub fn set_enter_area_num(&mut self, area: AreaNum) -> &mut Self {
        self.enter_area_num = area;
        self.stop_events |= stop_event::ENTER_AREA_NUM;
        self
    }

    pub fn set_leave_area_num(&mut self, area: AreaNum) -> &mut Self {
        self.leave_area_num = area;
        self.stop_events |= stop_event::LEAVE_AREA_NUM;
        self
    }

    /// Stop when entering an area that matches any of the given flags or
    /// contents bits. A zero criterion is not tested.
    pub fn set_enter_area_props(&mut self, flags: u32, contents: u32) -> &mut Self {
        self.enter_area_flags = flags;
        self.enter_area_contents = contents;
        if flags != 0 {
            self.stop_events |= stop_event::ENTER_AREA_FLAGS;
        }
        if contents != 0 {
            self.stop_events |= stop_event::ENTER_AREA_CONTENTS;
        }
        self
    }

    pub fn set_entities_collision_props(&mut self, test: bool, ignore: Option<u32>) -> &mut Self {
        self.test_entities = test;
        self.ignore_entity = ignore;
        if test {
            self.stop_events |= stop_event::HIT_ENTITY;
        }
        self
    }

    /// Perform one extra non-traced step beyond the last sampled point when
    /// no stop event fired, for callers that want a timeout estimate rather
    /// than a collision point.
    pub fn set_extrapolate_last_step(&mut self, extrapolate: bool) -> &mut Self {
        self.extrapolate_last_step = extrapolate;
        self
    }

    fn area_conds(&self) -> AreaConds {
        let num = self.stop_events & (stop_event::ENTER_AREA_NUM | stop_event::LEAVE_AREA_NUM) != 0;
        let props = self.stop_events
            & (stop_event::ENTER_AREA_FLAGS | stop_event::ENTER_AREA_CONTENTS)
            != 0;
        match (num, props) {
            (false, false) => AreaConds::None,
            (true, false) => AreaConds::NumOnly,
            (false, true) => AreaConds::PropsOnly,
            (true, true) => AreaConds::NumAndProps,
        }
    }

    pub fn run<W: CollisionWorld + NavWorld>(
        &mut self,
        world: &W,
        origin: Vector3<f32>,
        velocity: Vector3<f32>,
        results: &mut Results,
    ) -> u32 {
        self.run_with(world, origin, velocity, results, &mut NoInspector)
    }

    /// Run the simulation. Always terminates: after `num_steps` steps or on
    /// the first requested stop event. Returns the fired event bits
    /// (0 if the step count was exhausted without an event).
    pub fn run_with<W, I>(
        &mut self,
        world: &W,
        origin: Vector3<f32>,
        velocity: Vector3<f32>,
        results: &mut Results,
        inspector: &mut I,
    ) -> u32
    where
        W: CollisionWorld + NavWorld,
        I: StepInspector,
    {
        let area_conds = self.area_conds();
        let dt = self.step_millis as f32 * 0.001;

        let mut pos = origin;
        let mut vel = velocity;
        let mut was_in_liquid =
            world.point_contents(pos) & clip_mask::WATER != 0;
        let mut was_in_leave_area =
            self.leave_area_num != 0 && world.area_at(pos) == self.leave_area_num;

        results.origin = pos;
        results.last_area = world.area_at(pos);
        results.millis_ahead = 0;

        for _ in 0..self.num_steps {
            // Analytic integration under constant gravity
            let mut next = pos + vel * dt;
            next.z -= 0.5 * self.gravity * dt * dt;
            vel.z -= self.gravity * dt;

            let trace = if self.test_entities {
                world.trace_box_vs_entities(
                    pos,
                    next,
                    self.collider_mins,
                    self.collider_maxs,
                    clip_mask::SOLID,
                    self.ignore_entity,
                )
            } else {
                world.trace_box(
                    pos,
                    next,
                    self.collider_mins,
                    self.collider_maxs,
                    clip_mask::SOLID,
                )
            };

            let step_end = trace.end;
            let hit = !trace.is_empty();
            let hit_entity = trace.hit_entity.is_some();

            results.millis_ahead += self.step_millis;
            results.origin = step_end;

            if area_conds != AreaConds::None {
                if let Some(events) = self.inspect_crossed_areas(world, pos, step_end, area_conds) {
                    results.last_area = *self.areas_buf.last().unwrap_or(&results.last_area);
                    return events;
                }
                if let Some(last) = self.areas_buf.last() {
                    results.last_area = *last;
                }
                if was_in_leave_area && results.last_area != self.leave_area_num {
                    return stop_event::LEAVE_AREA_NUM;
                }
                was_in_leave_area = results.last_area == self.leave_area_num;
            } else {
                results.last_area = world.area_at(step_end);
            }

            let in_liquid = world.point_contents(step_end) & clip_mask::WATER != 0;
            if in_liquid != was_in_liquid {
                if in_liquid && self.stop_events & stop_event::ENTER_LIQUID != 0 {
                    results.trace = Some(trace);
                    return stop_event::ENTER_LIQUID;
                }
                if !in_liquid && self.stop_events & stop_event::LEAVE_LIQUID != 0 {
                    results.trace = Some(trace);
                    return stop_event::LEAVE_LIQUID;
                }
                was_in_liquid = in_liquid;
            }

            if hit {
                results.trace = Some(trace);
                if hit_entity {
                    return stop_event::HIT_ENTITY;
                }
                // A solid hit terminates the run unconditionally
                return stop_event::HIT_SOLID;
            }

            if inspector.on_predictor_step(results) {
                return stop_event::INTERRUPTED;
            }

            pos = step_end;
        }

        if self.extrapolate_last_step {
            let mut next = pos + vel * dt;
            next.z -= 0.5 * self.gravity * dt * dt;
            results.origin = next;
            results.millis_ahead += self.step_millis;
            results.last_area = world.area_at(next);
            return stop_event::EXTRAPOLATED;
        }

        0
    }

    /// Inspect every area crossed by the segment. Returns the fired events
    /// if an active condition matched. Fills `self.areas_buf` as a side
    /// effect; its last element is the last crossed area.
    fn inspect_crossed_areas<W: NavWorld>(
        &mut self,
        world: &W,
        from: Vector3<f32>,
        to: Vector3<f32>,
        conds: AreaConds,
    ) -> Option<u32> {
        self.areas_buf.clear();
        // Taking the buffer is required to appease the borrow checker here;
        // put it back before any return.
        let mut buf = std::mem::take(&mut self.areas_buf);
        world.areas_crossed(from, to, &mut buf);

        let mut fired = None;
        for &area_num in &buf {
            match conds {
                AreaConds::NumOnly => {
                    if self.enter_area_num != 0 && area_num == self.enter_area_num {
                        fired = Some(stop_event::ENTER_AREA_NUM);
                        break;
                    }
                }
                AreaConds::PropsOnly => {
                    if let Some(events) = self.test_area_props(world, area_num) {
                        fired = Some(events);
                        break;
                    }
                }
                AreaConds::NumAndProps => {
                    if self.enter_area_num != 0 && area_num == self.enter_area_num {
                        fired = Some(stop_event::ENTER_AREA_NUM);
                        break;
                    }
                    if let Some(events) = self.test_area_props(world, area_num) {
                        fired = Some(events);
                        break;
                    }
                }
                AreaConds::None => unreachable!(),
            }
        }

        self.areas_buf = buf;
        fired
    }

    fn test_area_props<W: NavWorld>(&self, world: &W, area_num: AreaNum) -> Option<u32> {
        if area_num == 0 {
            return None;
        }
        let area = world.area(area_num);
        if self.enter_area_flags != 0 && area.flags & self.enter_area_flags != 0 {
            return Some(stop_event::ENTER_AREA_FLAGS);
        }
        if self.enter_area_contents != 0 && area.contents & self.enter_area_contents != 0 {
            return Some(stop_event::ENTER_AREA_CONTENTS);
        }
        None
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::test_support::{grounded_area, BoxWorld};
    use crate::world::area_contents;

    fn player_bounds() -> (Vector3<f32>, Vector3<f32>) {
        (Vector3::new(-16.0, -16.0, -24.0), Vector3::new(16.0, 16.0, 40.0))
    }

    #[test]
    fn test_falling_trajectory_hits_floor() {
        let world = BoxWorld::flat();
        let mut predictor = TrajectoryPredictor::new();
        let (mins, maxs) = player_bounds();
        predictor
            .set_step_millis(64)
            .set_num_steps(32)
            .set_collider_bounds(mins, maxs)
            .add_stop_event_flags(stop_event::HIT_SOLID);

        let mut results = Results::default();
        let events = predictor.run(
            &world,
            Vector3::new(0.0, 0.0, 300.0),
            Vector3::new(100.0, 0.0, 0.0),
            &mut results,
        );
        assert_eq!(events, stop_event::HIT_SOLID);
        // Came to rest just above the floor plane at z = 0
        assert!(results.origin.z < 60.0, "z = {}", results.origin.z);
        assert!(results.origin.x > 0.0);
        assert!(results.millis_ahead > 0);
        let trace = results.trace.as_ref().unwrap();
        assert!(trace.hit_walkable_plane());
    }

    #[test]
    fn test_area_contents_stop_fires_before_solid_hit() {
        let mut world = BoxWorld::flat();
        // Split the floor into a safe strip and a hazard strip in front of
        // a far wall. The hazard must be reported instead of the wall hit.
        world.areas[1] = grounded_area(
            Vector3::new(-1024.0, -1024.0, 0.0),
            Vector3::new(200.0, 1024.0, 128.0),
        );
        let mut lava = grounded_area(
            Vector3::new(200.0, -1024.0, 0.0),
            Vector3::new(1024.0, 1024.0, 128.0),
        );
        lava.contents = area_contents::LAVA;
        world.areas.push(lava);
        world.add_wall(
            Vector3::new(800.0, -1024.0, 0.0),
            Vector3::new(832.0, 1024.0, 256.0),
        );

        let mut predictor = TrajectoryPredictor::new();
        let (mins, maxs) = player_bounds();
        predictor
            .set_step_millis(48)
            .set_num_steps(48)
            .set_collider_bounds(mins, maxs)
            .set_gravity(0.0)
            .add_stop_event_flags(stop_event::HIT_SOLID)
            .set_enter_area_props(0, area_contents::LAVA);

        let mut results = Results::default();
        let events = predictor.run(
            &world,
            Vector3::new(0.0, 0.0, 50.0),
            Vector3::new(400.0, 0.0, 0.0),
            &mut results,
        );
        assert_eq!(events, stop_event::ENTER_AREA_CONTENTS);
        assert!(results.origin.x < 800.0);
    }

    #[test]
    fn test_extrapolated_step_on_timeout() {
        let world = BoxWorld::flat();
        let mut predictor = TrajectoryPredictor::new();
        predictor
            .set_step_millis(16)
            .set_num_steps(4)
            .set_gravity(0.0)
            .set_extrapolate_last_step(true);

        let mut results = Results::default();
        let events = predictor.run(
            &world,
            Vector3::new(0.0, 0.0, 100.0),
            Vector3::new(100.0, 0.0, 0.0),
            &mut results,
        );
        assert_eq!(events, stop_event::EXTRAPOLATED);
        assert_eq!(results.millis_ahead, 16 * 5);
    }

    #[test]
    fn test_enter_area_num_stop() {
        let mut world = BoxWorld::flat();
        world.areas[1] = grounded_area(
            Vector3::new(-1024.0, -1024.0, 0.0),
            Vector3::new(200.0, 1024.0, 128.0),
        );
        world.areas.push(grounded_area(
            Vector3::new(200.0, -1024.0, 0.0),
            Vector3::new(1024.0, 1024.0, 128.0),
        ));

        let mut predictor = TrajectoryPredictor::new();
        predictor
            .set_step_millis(48)
            .set_num_steps(64)
            .set_gravity(0.0)
            .set_enter_area_num(2);

        let mut results = Results::default();
        let events = predictor.run(
            &world,
            Vector3::new(0.0, 0.0, 50.0),
            Vector3::new(400.0, 0.0, 0.0),
            &mut results,
        );
        assert_eq!(events, stop_event::ENTER_AREA_NUM);
        assert_eq!(results.last_area, 2);
    }

    #[test]
    fn test_leave_area_num_stop() {
        let world = BoxWorld::flat();
        let mut predictor = TrajectoryPredictor::new();
        predictor
            .set_step_millis(48)
            .set_num_steps(32)
            .set_gravity(0.0)
            .set_leave_area_num(1);

        let mut results = Results::default();
        let events = predictor.run(
            &world,
            Vector3::new(900.0, 0.0, 50.0),
            Vector3::new(400.0, 0.0, 0.0),
            &mut results,
        );
        assert_eq!(events, stop_event::LEAVE_AREA_NUM);
        assert_ne!(results.last_area, 1);
    }

    #[test]
    fn test_inspector_interrupts_run() {
        struct StopAfter {
            seen: u32,
            limit: u32,
        }
        impl StepInspector for StopAfter {
            fn on_predictor_step(&mut self, _results: &Results) -> bool {
                self.seen += 1;
                self.seen >= self.limit
            }
        }

        let world = BoxWorld::flat();
        let mut predictor = TrajectoryPredictor::new();
        predictor.set_step_millis(16).set_num_steps(16).set_gravity(0.0);

        let mut results = Results::default();
        let mut inspector = StopAfter { seen: 0, limit: 2 };
        let events = predictor.run_with(
            &world,
            Vector3::new(0.0, 0.0, 100.0),
            Vector3::new(50.0, 0.0, 0.0),
            &mut results,
            &mut inspector,
        );
        assert_eq!(events, stop_event::INTERRUPTED);
        assert_eq!(results.millis_ahead, 16 * 2);
    }

    #[test]
    fn test_run_is_bounded_without_events() {
        let world = BoxWorld::flat();
        let mut predictor = TrajectoryPredictor::new();
        predictor.set_step_millis(16).set_num_steps(8).set_gravity(0.0);

        let mut results = Results::default();
        let events = predictor.run(
            &world,
            Vector3::new(0.0, 0.0, 100.0),
            Vector3::new(10.0, 0.0, 0.0),
            &mut results,
        );
        assert_eq!(events, 0);
        assert_eq!(results.millis_ahead, 16 * 8);
    }
}
