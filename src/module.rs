//! The movement module facade: owns the bot-side state and the prediction
//! context, serves one action record per game frame, and rebuilds the plan
//! only when the cached one stops matching reality.

use cgmath::{InnerSpace, Vector3};
use log::{debug, warn};
use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::actions::{ActionKind, ActionsState};
use crate::fallback::{Fallback, FallbackStatus};
use crate::input::ActionRecord;
use crate::jump_spots::JumpSpotsDetector;
use crate::math;
use crate::movement_state::MovementState;
use crate::params::PlanningParams;
use crate::physics::{EntityState, FrameEvents};
use crate::plan::{self, PredictionContext};
use crate::world::{AreaNum, PhysicsWorld};

/// Where the agent currently wants to get.
#[derive(Clone, Copy, Debug)]
pub struct NavTarget {
    pub area: AreaNum,
    pub origin: Vector3<f32>,
    /// Being within this distance of `origin` counts as arrival.
    pub radius: f32,
}

/// The per-agent state the planner works with: tactical intent, active
/// sub-states and scripts, and persistent action data.
pub struct Bot {
    pub entity_state: EntityState,
    pub movement_state: MovementState,
    pub actions_state: ActionsState,
    pub active_fallback: Option<Fallback>,
    pub nav_target: Option<NavTarget>,
    pub params: PlanningParams,
    pub rng: StdRng,
    /// Landing candidates saved when a flight starts.
    pub saved_landing_areas: Vec<AreaNum>,
    /// Weapon index used for weapon jumps.
    pub weapon_jump_weapon: u8,
    /// Tactical intent flags set by the combat layer.
    pub should_attack: bool,
    pub should_move_carefully: bool,
    /// Level time of the last external knockback.
    pub last_knockback_at: i64,
    /// Level time of the last frame that moved the agent usefully.
    last_useful_movement_at: i64,
}

impl Bot {
    pub fn new(params: PlanningParams, rng_seed: u64) -> Self {
        Self {
            entity_state: EntityState::default(),
            movement_state: MovementState::default(),
            actions_state: ActionsState::default(),
            active_fallback: None,
            nav_target: None,
            params,
            rng: StdRng::seed_from_u64(rng_seed),
            saved_landing_areas: Vec::new(),
            weapon_jump_weapon: 0,
            should_attack: false,
            should_move_carefully: false,
            last_knockback_at: i64::MIN / 2,
            last_useful_movement_at: 0,
        }
    }
}

/// The public entry point. One per agent.
pub struct MovementModule {
    pub bot: Bot,
    cx: PredictionContext,
    pub jump_spots: JumpSpotsDetector,
    /// Plans built so far, for diagnostics.
    pub plans_built: u64,
    last_frame_at: i64,
}

impl MovementModule {
    pub fn new(params: PlanningParams, rng_seed: u64) -> Self {
        Self {
            bot: Bot::new(params, rng_seed),
            cx: PredictionContext::new(),
            jump_spots: JumpSpotsDetector::new(),
            plans_built: 0,
            last_frame_at: 0,
        }
    }

    pub fn set_nav_target(&mut self, target: NavTarget) {
        let changed = match self.bot.nav_target {
            Some(old) => old.area != target.area,
            None => true,
        };
        self.bot.nav_target = Some(target);
        if changed {
            self.cx.plan_is_valid = false;
        }
    }

    pub fn clear_nav_target(&mut self) {
        if self.bot.nav_target.take().is_some() {
            self.cx.plan_is_valid = false;
        }
    }

    pub fn set_fallback(&mut self, fallback: Fallback) {
        self.bot.active_fallback = Some(fallback);
        self.cx.plan_is_valid = false;
    }

    /// Tell the module an external impulse changed the velocity. For a
    /// short grace period velocity mismatches will not drop the cached
    /// plan, and the knockback itself does.
    pub fn notify_knockback(&mut self, now: i64) {
        self.bot.last_knockback_at = now;
        self.cx.plan_is_valid = false;
    }

    /// Feed the real frame events so trigger touches activate the same
    /// sub-states prediction would.
    pub fn notify_frame_events(&mut self, events: &FrameEvents) {
        if events.has_touched_jumppad {
            if let Some(target) = events.jumppad_target {
                self.bot.movement_state.jumppad.activate(target);
                self.cx.plan_is_valid = false;
            }
        }
        if events.has_touched_teleporter {
            self.cx.plan_is_valid = false;
        }
    }

    /// Millis since the agent last made useful progress.
    pub fn blocked_for_millis(&self, now: i64) -> i64 {
        now - self.bot.last_useful_movement_at
    }

    pub fn is_blocked(&self, now: i64) -> bool {
        self.blocked_for_millis(now) > self.bot.params.blocked_timeout_millis
    }

    /// The per-frame entry point: the action and input record to apply for
    /// the frame at `now`, reusing the cached plan when it still matches
    /// `real_state`.
    pub fn action_and_record_for_time<W: PhysicsWorld>(
        &mut self,
        world: &W,
        now: i64,
        real_state: &EntityState,
    ) -> (ActionKind, ActionRecord) {
        let frame_millis = (now - self.last_frame_at).clamp(0, 64) as u32;
        self.last_frame_at = now;
        self.bot.movement_state.frame(frame_millis);
        self.bot.movement_state.try_deactivate(real_state);
        self.bot.entity_state = real_state.clone();
        self.track_blocked_state(now, real_state);
        self.drop_finished_fallback(world, real_state, now);

        if self.cx.plan_is_valid {
            if let Some(result) = self.cached_action_and_record(now, real_state) {
                return result;
            }
            debug!("cached plan no longer matches reality, replanning");
            self.cx.plan_is_valid = false;
        }

        match plan::build_plan(world, &mut self.bot, &mut self.cx, now) {
            Ok(()) => {
                self.plans_built += 1;
                self.cached_action_and_record(now, real_state)
                    .unwrap_or_else(|| self.relaxed_record(real_state))
            }
            Err(err) => {
                warn!("plan building failed: {err}");
                self.cx.plan_is_valid = false;
                self.relaxed_record(real_state)
            }
        }
    }

    /// A do-no-harm record for frames where no plan is available.
    fn relaxed_record(&self, state: &EntityState) -> (ActionKind, ActionRecord) {
        let mut record = ActionRecord::default();
        record.input.can_override_look_vec = true;
        record.input.can_override_ucmd = true;
        if state.square_speed() > 1.0 {
            let dir = state.velocity / state.speed();
            record.input.set_intended_look_dir(dir, true);
        } else {
            record.input.set_already_computed_angles(state.pitch, state.yaw);
            record.input.is_look_dir_set = true;
        }
        (ActionKind::Default, record)
    }

    fn track_blocked_state(&mut self, now: i64, real_state: &EntityState) {
        // Any of: moving, having arrived, riding something
        let moving = real_state.square_speed() > 10.0 * 10.0;
        let arrived = self
            .bot
            .nav_target
            .map(|target| math::distance(real_state.origin, target.origin) < target.radius)
            .unwrap_or(true);
        if moving || arrived || !real_state.has_ground() {
            self.bot.last_useful_movement_at = now;
        }
    }

    fn drop_finished_fallback<W: PhysicsWorld>(
        &mut self,
        world: &W,
        real_state: &EntityState,
        now: i64,
    ) {
        if let Some(fallback) = self.bot.active_fallback.as_mut() {
            match fallback.check_status(world, real_state, now) {
                FallbackStatus::Pending => {}
                status => {
                    debug!("dropping fallback ({status:?})");
                    self.bot.active_fallback = None;
                    self.cx.plan_is_valid = false;
                }
            }
        }
    }

    /// Serve a record from the cached plan if reality still matches the
    /// prediction for this time point.
    fn cached_action_and_record(
        &mut self,
        now: i64,
        real_state: &EntityState,
    ) -> Option<(ActionKind, ActionRecord)> {
        let elapsed = now - self.cx.plan_started_at;
        if elapsed < 0 || elapsed > u32::MAX as i64 {
            return None;
        }
        let elapsed = elapsed as u32;
        let frames = &self.cx.frames[..self.cx.top_of_stack_index()];
        if frames.is_empty() {
            return None;
        }

        let index = frames
            .iter()
            .position(|frame| elapsed < frame.timestamp + frame.step_millis)?;
        let frame = &frames[index];
        if elapsed < frame.timestamp {
            return None;
        }

        // The module's sub-states must still be the combination the plan
        // was built for
        if self.bot.movement_state.contained_states_mask() != frame.states_mask {
            return None;
        }

        let next_origin = frames
            .get(index + 1)
            .map(|next| next.entity_state.origin)
            .unwrap_or(self.cx.sim_state.origin);
        let next_velocity = frames
            .get(index + 1)
            .map(|next| next.entity_state.velocity)
            .unwrap_or(self.cx.sim_state.velocity);

        let frac = (elapsed - frame.timestamp) as f32 / frame.step_millis as f32;
        let expected_origin =
            frame.entity_state.origin + (next_origin - frame.entity_state.origin) * frac;
        let params = &self.bot.params;

        if math::distance(real_state.origin, expected_origin) > params.max_origin_mismatch {
            return None;
        }

        let in_knockback_grace = now - self.bot.last_knockback_at <= params.knockback_grace_millis;
        if !in_knockback_grace {
            let expected_velocity =
                frame.entity_state.velocity + (next_velocity - frame.entity_state.velocity) * frac;
            let expected_speed = expected_velocity.magnitude();
            let real_speed = real_state.speed();
            let speed_tolerance = (params.max_speed_mismatch_fraction * expected_speed).max(1.0);
            if (real_speed - expected_speed).abs() > speed_tolerance {
                return None;
            }
            if expected_speed > 1.0 && real_speed > 1.0 {
                let expected_dir = expected_velocity / expected_speed;
                let real_dir = real_state.velocity / real_speed;
                if expected_dir.dot(real_dir) < params.min_velocity_dir_cosine {
                    return None;
                }
            }
        }

        // The view must not have drifted from what the plan assumed
        let expected_forward = frames
            .get(index + 1)
            .map(|next| next.entity_state.forward_dir())
            .unwrap_or_else(|| self.cx.sim_state.forward_dir());
        if !frame.record.input.can_override_look_vec
            && real_state.forward_dir().dot(expected_forward) < params.min_look_dir_cosine
            && frac > 0.5
        {
            return None;
        }

        let mut record = frame.record.clone();
        // Mid-frame: blend the commanded look dir toward the next frame's
        // so the turn stays smooth between plan frames
        if frac > 0.0 {
            if let Some(next) = frames.get(index + 1) {
                if record.input.is_look_dir_set && next.record.input.is_look_dir_set {
                    let a = record.input.intended_look_dir();
                    let b = next.record.input.intended_look_dir();
                    if let Some(blended) = math::try_normalize(a + (b - a) * frac) {
                        record.input.set_intended_look_dir(blended, true);
                    }
                }
            }
        }
        // Cheating state overrides apply only at the frame start
        if frac > 0.0 {
            record.clear_modified_velocity();
        }
        Some((frame.action, record))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::plan::MAX_PREDICTED_STATES;
    use crate::test_support::BoxWorld;

    fn module() -> MovementModule {
        MovementModule::new(PlanningParams::default(), 7)
    }

    #[test]
    fn test_no_nav_target_yields_relaxed_default() {
        let world = BoxWorld::flat();
        let state = world.spawn_grounded(Vector3::new(0.0, 0.0, 25.0));
        let mut module = module();

        let (action, record) = module.action_and_record_for_time(&world, 0, &state);
        assert_eq!(action, ActionKind::Default);
        assert!(record.input.can_override_look_vec);
        assert_eq!(module.cx.top_of_stack_index(), 1);
    }

    #[test]
    fn test_close_target_steered_directly() {
        let world = BoxWorld::flat();
        let state = world.spawn_grounded(Vector3::new(0.0, 0.0, 25.0));
        let mut module = module();
        module.set_nav_target(NavTarget {
            area: 1,
            origin: Vector3::new(60.0, 0.0, 25.0),
            radius: 24.0,
        });

        let (action, record) = module.action_and_record_for_time(&world, 0, &state);
        assert_eq!(action, ActionKind::Default);
        // Looking along +x already, so the keys go down immediately
        assert_eq!(record.input.forward_move, 1);
        assert_eq!(module.cx.top_of_stack_index(), 1);
    }

    #[test]
    fn test_far_target_builds_multi_frame_plan() {
        let world = BoxWorld::flat();
        let state = world.spawn_grounded(Vector3::new(0.0, 0.0, 25.0));
        let mut module = module();
        module.set_nav_target(NavTarget {
            area: 1,
            origin: Vector3::new(700.0, 0.0, 25.0),
            radius: 32.0,
        });

        let (action, _record) = module.action_and_record_for_time(&world, 0, &state);
        assert_eq!(action, ActionKind::WalkCarefully);
        let frames = module.cx.top_of_stack_index();
        assert!(frames > 1, "expected a multi frame plan, got {frames}");
        assert!(frames <= MAX_PREDICTED_STATES);
    }

    #[test]
    fn test_plan_is_reused_while_reality_matches() {
        let world = BoxWorld::flat();
        let mut state = world.spawn_grounded(Vector3::new(0.0, 0.0, 25.0));
        let mut module = module();
        module.set_nav_target(NavTarget {
            area: 1,
            origin: Vector3::new(700.0, 0.0, 25.0),
            radius: 32.0,
        });

        let mut now = 0i64;
        let (_, record) = module.action_and_record_for_time(&world, now, &state);
        assert_eq!(module.plans_built, 1);

        // Following the plan's own inputs must keep the plan cached
        for _ in 0..4 {
            state = world.advance(&state, &record.input, 48).state;
            now += 48;
            let (_, _next) = module.action_and_record_for_time(&world, now, &state);
        }
        assert_eq!(module.plans_built, 1);
    }

    #[test]
    fn test_origin_mismatch_forces_replan() {
        let world = BoxWorld::flat();
        let state = world.spawn_grounded(Vector3::new(0.0, 0.0, 25.0));
        let mut module = module();
        module.set_nav_target(NavTarget {
            area: 1,
            origin: Vector3::new(700.0, 0.0, 25.0),
            radius: 32.0,
        });

        module.action_and_record_for_time(&world, 0, &state);
        assert_eq!(module.plans_built, 1);

        // Teleport sideways well past the mismatch threshold
        let mut displaced = state.clone();
        displaced.origin.y += 50.0;
        displaced.update_areas(&world);
        module.action_and_record_for_time(&world, 48, &displaced);
        assert_eq!(module.plans_built, 2);
    }

    #[test]
    fn test_plan_always_terminates_and_stays_bounded() {
        // A box canyon: the walk cannot reach the unreachable area, every
        // sequence keeps failing, and the engine must still terminate
        let mut world = BoxWorld::flat();
        world.areas.push(crate::test_support::grounded_area(
            Vector3::new(2000.0, 2000.0, 0.0),
            Vector3::new(2100.0, 2100.0, 128.0),
        ));
        // No route entry: area 2 is unreachable

        let state = world.spawn_grounded(Vector3::new(0.0, 0.0, 25.0));
        let mut module = module();
        module.set_nav_target(NavTarget {
            area: 2,
            origin: Vector3::new(2050.0, 2050.0, 25.0),
            radius: 32.0,
        });

        let (_action, _record) = module.action_and_record_for_time(&world, 0, &state);
        assert!(module.cx.top_of_stack_index() <= MAX_PREDICTED_STATES);
    }

    #[test]
    fn test_capacity_overflow_disables_the_overflowing_action() {
        use crate::physics::Ground;

        // A jump pad flight started far above the ground cannot land within
        // the plan stack; the flight action must be excluded and the plan
        // must still come out valid instead of filling the whole stack
        let world = BoxWorld::flat();
        let mut state = world.spawn_grounded(Vector3::new(0.0, 0.0, 25.0));
        state.origin.z = 6000.0;
        state.ground = Ground::None;
        state.height_over_ground = f32::INFINITY;
        state.update_areas(&world);

        let mut module = module();
        module.bot.movement_state.jumppad.activate(Vector3::new(0.0, 0.0, 25.0));

        let (_action, _record) = module.action_and_record_for_time(&world, 0, &state);
        assert!(module.cx.is_action_disabled(ActionKind::FlyUntilLanding));
        assert!(module.cx.plan_is_valid);
        assert!(module.cx.top_of_stack_index() < MAX_PREDICTED_STATES);
    }

    #[test]
    fn test_knockback_invalidates_plan() {
        let world = BoxWorld::flat();
        let state = world.spawn_grounded(Vector3::new(0.0, 0.0, 25.0));
        let mut module = module();
        module.set_nav_target(NavTarget {
            area: 1,
            origin: Vector3::new(700.0, 0.0, 25.0),
            radius: 32.0,
        });

        module.action_and_record_for_time(&world, 0, &state);
        assert_eq!(module.plans_built, 1);
        module.notify_knockback(48);
        module.action_and_record_for_time(&world, 48, &state);
        assert_eq!(module.plans_built, 2);
    }
}
