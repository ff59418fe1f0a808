//! The forward-simulation engine. A plan is built by stepping the physics
//! speculatively under inputs synthesized by movement actions, frame by
//! frame, with savepoints to roll back to when an action sequence turns out
//! not to work.

use cgmath::{InnerSpace, Vector3};
use log::{debug, trace};
use thiserror::Error;

use crate::actions::{self, ActionKind};
use crate::input::ActionRecord;
use crate::math;
use crate::module::Bot;
use crate::movement_state::MovementState;
use crate::physics::{EntityState, FrameEvents};
use crate::probes::ProbeCache;
use crate::world::{clip_mask, contents, AreaNum, PhysicsWorld, ReachNum};

/// Hard capacity of the plan stack. A plan never predicts further than
/// this many frames ahead.
pub const MAX_PREDICTED_STATES: usize = 48;

/// The default duration of one predicted frame. Always a multiple of the
/// physics tick.
pub const DEFAULT_STEP_MILLIS: u32 = 48;

/// Total rollbacks allowed while building one plan before the engine gives
/// up on the failing action.
const MAX_ROLLBACKS: u32 = 24;

/// Hard bound on prediction step iterations per plan.
const MAX_ITERATIONS: u32 = 1024;

#[derive(Error, Debug)]
pub enum PlanError {
    /// Every applicable action was tested for the same frame and each
    /// refused, which indicates an action implementation bug.
    #[error("no action accepted frame {frame} (tested mask {tested_mask:#x})")]
    SuggestionLoop { frame: usize, tested_mask: u32 },
    #[error("plan building exceeded {0} prediction step iterations")]
    IterationLimit(u32),
    #[error("action {action:?} kept failing after {rollbacks} rollbacks")]
    PersistentFailure { action: ActionKind, rollbacks: u32 },
}

/// Why an action application sequence ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StopReason {
    /// The action achieved what it was applied for.
    Succeeded,
    /// Another action took over.
    Switched,
    /// The action was disabled for the rest of this plan.
    Disabled,
    /// The sequence failed and prediction rolls back.
    Failed,
}

/// One committed frame of the plan under construction. `entity_state` and
/// `movement_state` are snapshots taken before the frame's physics step.
#[derive(Clone, Debug)]
pub struct PredictedFrame {
    pub entity_state: EntityState,
    pub movement_state: MovementState,
    pub record: ActionRecord,
    pub action: ActionKind,
    /// Millis ahead of the plan start at the snapshot.
    pub timestamp: u32,
    pub step_millis: u32,
    /// Active movement sub-states at the snapshot, for cache validation.
    pub states_mask: u8,
}

/// A stack of lazily computed per-frame values kept aligned with the plan
/// stack. Rollbacks keep values below the new top so they can be reused
/// when the same frames are re-predicted.
#[derive(Clone, Debug)]
pub struct CacheStack<T> {
    values: Vec<Option<T>>,
}

impl<T> Default for CacheStack<T> {
    fn default() -> Self {
        Self { values: Vec::new() }
    }
}

impl<T> CacheStack<T> {
    fn align_for_top(&mut self, top: usize) {
        self.values.truncate(top);
        while self.values.len() <= top {
            self.values.push(None);
        }
    }

    fn clear(&mut self) {
        self.values.clear();
    }

    pub fn get_or_compute(&mut self, index: usize, compute: impl FnOnce() -> T) -> &T {
        debug_assert!(index < self.values.len());
        self.values[index].get_or_insert_with(compute)
    }
}

/// The per-pass borrowing bundle handed to actions and fallbacks.
pub struct PlanEnv<'a, W: PhysicsWorld> {
    pub world: &'a W,
    pub bot: &'a mut Bot,
    pub cx: &'a mut PredictionContext,
}

/// Bookkeeping of the currently running action application sequence.
#[derive(Clone, Copy, Debug)]
pub struct SequenceState {
    pub start_frame: usize,
    pub origin_at_start: Vector3<f32>,
    pub travel_time_at_start: u32,
}

/// The persistent planning state: the plan stack, the simulated state at
/// its top, the savepoint and the per-frame caches.
pub struct PredictionContext {
    pub frames: Vec<PredictedFrame>,
    probe_caches: Vec<ProbeCache>,
    reach_chain_cache: CacheStack<Vec<ReachNum>>,
    pub may_hit_cache: CacheStack<bool>,
    pub keep_speed_cache: CacheStack<bool>,

    /// The simulated physical state at the top of the stack.
    pub sim_state: EntityState,
    /// The simulated movement sub-states at the top of the stack.
    pub movement_state: MovementState,
    /// Events of the last simulated physics step.
    pub frame_events: FrameEvents,
    /// The record being filled for the current frame.
    pub record: ActionRecord,

    top_of_stack_index: usize,
    savepoint_index: usize,
    pub total_millis_ahead: u32,
    pub prediction_step_millis: u32,
    /// Simulated absolute level time in millis.
    pub level_time: i64,
    /// Level time when the plan was started.
    pub plan_started_at: i64,

    pub active_action: Option<ActionKind>,
    pub action_suggested_by_action: Option<ActionKind>,
    pub sequence: SequenceState,
    /// Actions excluded for the rest of this plan.
    pub disabled_actions_mask: u32,

    pub cannot_apply_action: bool,
    pub should_rollback: bool,
    pub is_completed: bool,

    rollbacks: u32,
    sequence_starts: u32,
    sequence_stops: u32,
    /// Set when the last plan build failed; the cached plan is then unusable.
    pub plan_is_valid: bool,
}

impl Default for PredictionContext {
    fn default() -> Self {
        Self::new()
    }
}

impl PredictionContext {
    pub fn new() -> Self {
        Self {
            frames: Vec::with_capacity(MAX_PREDICTED_STATES),
            probe_caches: Vec::with_capacity(MAX_PREDICTED_STATES),
            reach_chain_cache: CacheStack::default(),
            may_hit_cache: CacheStack::default(),
            keep_speed_cache: CacheStack::default(),
            sim_state: EntityState::default(),
            movement_state: MovementState::default(),
            frame_events: FrameEvents::default(),
            record: ActionRecord::default(),
            top_of_stack_index: 0,
            savepoint_index: 0,
            total_millis_ahead: 0,
            prediction_step_millis: DEFAULT_STEP_MILLIS,
            level_time: 0,
            plan_started_at: 0,
            active_action: None,
            action_suggested_by_action: None,
            sequence: SequenceState {
                start_frame: 0,
                origin_at_start: Vector3::new(0.0, 0.0, 0.0),
                travel_time_at_start: 0,
            },
            disabled_actions_mask: 0,
            cannot_apply_action: false,
            should_rollback: false,
            is_completed: false,
            rollbacks: 0,
            sequence_starts: 0,
            sequence_stops: 0,
            plan_is_valid: false,
        }
    }

    pub fn top_of_stack_index(&self) -> usize {
        self.top_of_stack_index
    }

    pub fn savepoint_index(&self) -> usize {
        self.savepoint_index
    }

    /// Millis the current frame will simulate. Multiple of the physics tick.
    pub fn step_millis(&self) -> u32 {
        self.prediction_step_millis
    }

    /// Request a custom duration for the current frame.
    pub fn set_step_millis(&mut self, millis: u32, tick: u32) {
        debug_assert!(millis > 0 && millis % tick == 0);
        self.prediction_step_millis = millis;
    }

    pub fn is_action_disabled(&self, kind: ActionKind) -> bool {
        self.disabled_actions_mask & kind.bit() != 0
    }

    pub fn disable_action(&mut self, kind: ActionKind) {
        self.disabled_actions_mask |= kind.bit();
    }

    /// Stop prediction: the plan up to and including the current frame is
    /// the result.
    pub fn set_completed(&mut self) {
        self.is_completed = true;
    }

    /// Stop the current sequence and retry from the savepoint.
    pub fn set_pending_rollback(&mut self) {
        self.cannot_apply_action = true;
        self.should_rollback = true;
    }

    /// The current action does not apply; `suggested` (or the engine's own
    /// choice if `None`) should plan this frame instead.
    pub fn cannot_apply(&mut self, suggested: Option<ActionKind>) {
        self.cannot_apply_action = true;
        self.action_suggested_by_action = suggested;
    }

    /// Move the savepoint to `top + offset` (offset may be negative).
    pub fn mark_savepoint(&mut self, offset: i32) {
        let index = self.top_of_stack_index as i32 + offset;
        debug_assert!(index >= 0 && index <= self.top_of_stack_index as i32);
        self.savepoint_index = index as usize;
    }

    pub fn probe_cache(&mut self) -> &mut ProbeCache {
        &mut self.probe_caches[self.top_of_stack_index]
    }

    fn reset(&mut self, state: &EntityState, movement_state: &MovementState, level_time: i64) {
        self.frames.clear();
        self.probe_caches.clear();
        self.reach_chain_cache.clear();
        self.may_hit_cache.clear();
        self.keep_speed_cache.clear();
        self.sim_state = state.clone();
        self.movement_state = *movement_state;
        self.frame_events.clear();
        self.record.clear();
        self.top_of_stack_index = 0;
        self.savepoint_index = 0;
        self.total_millis_ahead = 0;
        self.prediction_step_millis = DEFAULT_STEP_MILLIS;
        self.level_time = level_time;
        self.plan_started_at = level_time;
        self.active_action = None;
        self.action_suggested_by_action = None;
        self.disabled_actions_mask = 0;
        self.cannot_apply_action = false;
        self.should_rollback = false;
        self.is_completed = false;
        self.rollbacks = 0;
        self.sequence_starts = 0;
        self.sequence_stops = 0;
        self.plan_is_valid = false;
    }

    /// Make the stacks consistent with the top index before planning a
    /// frame: drop frames above it (after a rollback) and push the slot for
    /// the frame about to be planned.
    fn setup_stack_for_step(&mut self) {
        debug_assert!(self.top_of_stack_index < MAX_PREDICTED_STATES);
        self.frames.truncate(self.top_of_stack_index);
        // The cache slot at the top may already exist (pushed by the
        // previous step for its post-step origin, which is exactly this
        // frame's origin); reuse it in that case
        self.probe_caches.truncate(self.top_of_stack_index + 1);
        while self.probe_caches.len() <= self.top_of_stack_index {
            self.probe_caches.push(ProbeCache::default());
        }

        self.frames.push(PredictedFrame {
            entity_state: self.sim_state.clone(),
            movement_state: self.movement_state,
            record: ActionRecord::default(),
            action: ActionKind::Default,
            timestamp: self.total_millis_ahead,
            step_millis: self.prediction_step_millis,
            states_mask: self.movement_state.contained_states_mask(),
        });
        self.probe_caches.push(ProbeCache::default());

        self.reach_chain_cache.align_for_top(self.top_of_stack_index);
        self.may_hit_cache.align_for_top(self.top_of_stack_index);
        self.keep_speed_cache.align_for_top(self.top_of_stack_index);

        self.record.clear();
        self.action_suggested_by_action = None;
        self.cannot_apply_action = false;
        self.should_rollback = false;
    }

    fn rollback_to_savepoint(&mut self) {
        debug_assert!(self.savepoint_index <= self.top_of_stack_index);
        debug_assert!(self.savepoint_index < self.frames.len());
        self.top_of_stack_index = self.savepoint_index;
        let frame = &self.frames[self.savepoint_index];
        self.sim_state = frame.entity_state.clone();
        self.movement_state = frame.movement_state;
        self.total_millis_ahead = frame.timestamp;
        self.level_time = self.plan_started_at + frame.timestamp as i64;
        self.prediction_step_millis = frame.step_millis;
        self.frame_events.clear();
        self.rollbacks += 1;
        trace!(
            "rollback to frame {} ({} total)",
            self.savepoint_index,
            self.rollbacks
        );
    }

    fn save_action_on_stack(&mut self, action: ActionKind) {
        let frame = &mut self.frames[self.top_of_stack_index];
        frame.record = self.record.clone();
        frame.action = action;
        frame.step_millis = self.prediction_step_millis;
        self.top_of_stack_index += 1;
    }

    /// The chain of reachabilities from the simulated position toward the
    /// goal area, computed lazily per frame.
    pub fn reach_chain<W: PhysicsWorld>(&mut self, world: &W, goal: AreaNum) -> &[ReachNum] {
        let index = self.top_of_stack_index;
        let state = &self.sim_state;
        self.reach_chain_cache.align_for_top(index);
        self.reach_chain_cache
            .get_or_compute(index, || {
                let mut chain = Vec::new();
                let mut from_areas = state.routing_start_areas();
                for _ in 0..24 {
                    let route = match world.route(from_areas.as_slice(), goal) {
                        Some(route) => route,
                        None => break,
                    };
                    if route.reach_num == 0 {
                        // Already in the goal area
                        break;
                    }
                    chain.push(route.reach_num);
                    let next_area = world.reach(route.reach_num).area;
                    if next_area == goal || next_area == 0 {
                        break;
                    }
                    from_areas = crate::physics::RoutingAreas::single(next_area);
                }
                chain
            })
            .as_slice()
    }

    /// Travel time toward the goal from the simulated position, in
    /// hundredths of a second. `None` if unreachable.
    pub fn travel_time_to<W: PhysicsWorld>(&self, world: &W, goal: AreaNum) -> Option<u32> {
        world
            .route(self.sim_state.routing_start_areas().as_slice(), goal)
            .map(|route| route.travel_time)
    }

    /// A relaxed input: look along the velocity (or keep the current view
    /// when standing), everything overridable by aiming code.
    pub fn set_default_input(&mut self) {
        let input = &mut self.record.input;
        input.clear();
        input.can_override_look_vec = true;
        input.can_override_ucmd = true;
        if self.sim_state.square_speed() > 1.0 {
            let dir = self.sim_state.velocity / self.sim_state.speed();
            input.set_intended_look_dir(dir, true);
        } else {
            input.set_already_computed_angles(self.sim_state.pitch, self.sim_state.yaw);
            input.is_look_dir_set = true;
        }
    }

    /// Speed up the simulated velocity beyond what the integrator would
    /// produce, by `frac` in [0, 1] of the allowed gain. Ground friction and
    /// air control of a real player are poorly modeled by input alone, this
    /// keeps predicted trajectories honest about what a skilled player
    /// reaches.
    pub fn cheating_accelerate<W: PhysicsWorld>(&mut self, world: &W, bot: &Bot, frac: f32) {
        let speed_2d = self.sim_state.speed_2d();
        if speed_2d < 1.0 {
            return;
        }
        let max_speed = world.dash_speed().max(world.run_speed()) * 1.5;
        if speed_2d >= max_speed {
            return;
        }
        let gain = frac.clamp(0.0, 1.0)
            * bot.params.max_accel_speed_gain_fraction
            * (max_speed - speed_2d);
        let scale = (speed_2d + gain) / speed_2d;
        self.sim_state.velocity.x *= scale;
        self.sim_state.velocity.y *= scale;
        self.record.set_modified_velocity(self.sim_state.velocity);
    }

    /// Rotate the simulated 2D velocity toward `to_point` keeping the speed,
    /// by `frac` in [0, 1].
    pub fn cheating_correct_velocity(&mut self, to_point: Vector3<f32>, frac: f32) {
        let speed_2d = self.sim_state.speed_2d();
        if speed_2d < 1.0 {
            return;
        }
        let vel_dir = match math::try_normalize_2d(self.sim_state.velocity) {
            Some(dir) => dir,
            None => return,
        };
        let target_dir = match math::try_normalize_2d(to_point - self.sim_state.origin) {
            Some(dir) => dir,
            None => return,
        };
        let frac = frac.clamp(0.0, 1.0);
        let blended = match math::try_normalize(vel_dir + (target_dir - vel_dir) * frac) {
            Some(dir) => dir,
            None => return,
        };
        self.sim_state.velocity.x = blended.x * speed_2d;
        self.sim_state.velocity.y = blended.y * speed_2d;
        self.record.set_modified_velocity(self.sim_state.velocity);
    }

    /// Whether running along the current look dir would keep a potential
    /// attack target in the field of fire. Cached per frame.
    pub fn may_hit_while_running(&mut self) -> bool {
        let index = self.top_of_stack_index;
        let state = &self.sim_state;
        self.may_hit_cache.align_for_top(index);
        *self.may_hit_cache.get_or_compute(index, || {
            if state.square_speed() < 1.0 {
                return true;
            }
            match math::try_normalize_2d(state.velocity) {
                Some(vel_dir) => {
                    let forward = state.forward_dir();
                    let forward_2d = Vector3::new(forward.x, forward.y, 0.0);
                    match math::try_normalize(forward_2d) {
                        Some(fwd) => fwd.dot(vel_dir) > 0.7,
                        None => false,
                    }
                }
                None => true,
            }
        })
    }

    /// Whether keeping the current (high) speed is safe: the trajectory
    /// ahead lands on walkable ground without crossing hazards. Cached per
    /// frame.
    pub fn can_safely_keep_high_speed<W: PhysicsWorld>(&mut self, world: &W) -> bool {
        let index = self.top_of_stack_index;
        let state = self.sim_state.clone();
        self.keep_speed_cache.align_for_top(index);
        *self.keep_speed_cache.get_or_compute(index, || {
            use crate::trajectory::{stop_event, Results, TrajectoryPredictor};
            let mut predictor = TrajectoryPredictor::new();
            predictor
                .set_step_millis(96)
                .set_num_steps(8)
                .set_gravity(world.gravity())
                .set_collider_bounds(state.mins, state.maxs)
                .add_stop_event_flags(stop_event::HIT_SOLID)
                .set_enter_area_props(
                    crate::world::area_flags::DISABLED,
                    crate::world::area_contents::LAVA
                        | crate::world::area_contents::SLIME
                        | crate::world::area_contents::DO_NOT_ENTER,
                );
            let mut results = Results::default();
            let events = predictor.run(world, state.origin, state.velocity, &mut results);
            if events & (stop_event::ENTER_AREA_FLAGS | stop_event::ENTER_AREA_CONTENTS) != 0 {
                return false;
            }
            if events & stop_event::HIT_SOLID != 0 {
                return results
                    .trace
                    .as_ref()
                    .map(|trace| trace.hit_walkable_plane())
                    .unwrap_or(false);
            }
            // Ran out of steps without hitting anything: falling far
            false
        })
    }
}

/// Build a full plan from the bot's current state. On success the context
/// holds `top_of_stack_index` committed frames and `plan_is_valid` is set.
pub fn build_plan<W: PhysicsWorld>(
    world: &W,
    bot: &mut Bot,
    cx: &mut PredictionContext,
    level_time: i64,
) -> Result<(), PlanError> {
    cx.reset(&bot.entity_state, &bot.movement_state, level_time);
    actions::before_planning(bot);

    let mut iterations = 0u32;
    loop {
        iterations += 1;
        if iterations > MAX_ITERATIONS {
            return Err(PlanError::IterationLimit(MAX_ITERATIONS));
        }
        next_prediction_step(world, bot, cx)?;
        if cx.is_completed {
            break;
        }
    }

    cx.plan_is_valid = true;
    debug!(
        "plan built: {} frames, {} millis ahead, {} rollbacks",
        cx.top_of_stack_index, cx.total_millis_ahead, cx.rollbacks
    );
    // The bot adopts the simulated sub-state evolution of the first frame
    if let Some(first) = cx.frames.first() {
        bot.movement_state = first.movement_state;
    }
    actions::after_planning(bot, cx);
    Ok(())
}

fn next_prediction_step<W: PhysicsWorld>(
    world: &W,
    bot: &mut Bot,
    cx: &mut PredictionContext,
) -> Result<(), PlanError> {
    cx.setup_stack_for_step();

    // Pick the action that plans this frame, letting actions hand over
    // until one accepts. The tested mask bounds the handover chain.
    let mut tested_mask = 0u32;
    let action = loop {
        let candidate = match cx.active_action {
            Some(action) => action,
            None => {
                let suggested = {
                    let mut env = PlanEnv { world, bot, cx };
                    actions::suggest_suitable_action(&mut env)
                };
                begin_sequence(cx, world, bot, suggested);
                suggested
            }
        };

        if tested_mask & candidate.bit() != 0 {
            return Err(PlanError::SuggestionLoop {
                frame: cx.top_of_stack_index,
                tested_mask,
            });
        }
        tested_mask |= candidate.bit();

        {
            let mut env = PlanEnv { world, bot, cx };
            actions::plan_step(candidate, &mut env);
        }

        if !cx.cannot_apply_action {
            break candidate;
        }
        if cx.should_rollback {
            break candidate;
        }

        // Hand over to the suggested action (or let the engine pick).
        // A disabled suggestion falls through to the engine's own choice.
        end_sequence(cx, bot, candidate, StopReason::Switched);
        let next = cx
            .action_suggested_by_action
            .take()
            .filter(|kind| !cx.is_action_disabled(*kind));
        cx.cannot_apply_action = false;
        if let Some(next) = next {
            begin_sequence(cx, world, bot, next);
            cx.active_action = Some(next);
        } else {
            cx.active_action = None;
        }
    };

    if cx.should_rollback {
        end_sequence(cx, bot, action, StopReason::Failed);
        cx.active_action = None;
        if cx.rollbacks >= MAX_ROLLBACKS {
            if matches!(action, ActionKind::Default) {
                return Err(PlanError::PersistentFailure {
                    action,
                    rollbacks: cx.rollbacks,
                });
            }
            cx.disable_action(action);
            debug!("{:?} disabled after {} rollbacks", action, cx.rollbacks);
        }
        cx.rollback_to_savepoint();
        return Ok(());
    }

    if cx.is_completed {
        // The record of the completing frame still becomes part of the plan
        cx.save_action_on_stack(action);
        end_sequence(cx, bot, action, StopReason::Succeeded);
        cx.active_action = None;
        return Ok(());
    }

    next_movement_step(world, bot, cx);
    cx.save_action_on_stack(action);

    {
        let frame_index = cx.top_of_stack_index - 1;
        let mut env = PlanEnv { world, bot, cx };
        actions::check_step_results(action, &mut env, frame_index);
    }

    if cx.should_rollback {
        end_sequence(cx, bot, action, StopReason::Failed);
        cx.active_action = None;
        // The frame written by this step is discarded by the truncation in
        // the next setup
        cx.top_of_stack_index -= 1;
        if cx.rollbacks >= MAX_ROLLBACKS {
            if matches!(action, ActionKind::Default) {
                return Err(PlanError::PersistentFailure {
                    action,
                    rollbacks: cx.rollbacks,
                });
            }
            cx.disable_action(action);
        }
        cx.rollback_to_savepoint();
        return Ok(());
    }

    if cx.is_completed {
        end_sequence(cx, bot, action, StopReason::Succeeded);
        cx.active_action = None;
        return Ok(());
    }

    // Ran out of capacity: the sequence cannot finish within the stack.
    // Exclude the action for the rest of this plan and retry from the
    // savepoint with whatever remains applicable.
    if cx.top_of_stack_index >= MAX_PREDICTED_STATES {
        debug!("{:?} overflowed the plan stack capacity, disabling", action);
        cx.disable_action(action);
        end_sequence(cx, bot, action, StopReason::Disabled);
        cx.active_action = None;
        cx.rollback_to_savepoint();
    }
    Ok(())
}

fn begin_sequence<W: PhysicsWorld>(
    cx: &mut PredictionContext,
    world: &W,
    bot: &Bot,
    action: ActionKind,
) {
    cx.active_action = Some(action);
    cx.sequence_starts += 1;
    cx.sequence = SequenceState {
        start_frame: cx.top_of_stack_index,
        origin_at_start: cx.sim_state.origin,
        travel_time_at_start: bot
            .nav_target
            .and_then(|target| cx.travel_time_to(world, target.area))
            .unwrap_or(0),
    };
    actions::on_sequence_started(action, cx);
}

fn end_sequence(cx: &mut PredictionContext, bot: &mut Bot, action: ActionKind, reason: StopReason) {
    cx.sequence_stops += 1;
    let stopped_at = cx.top_of_stack_index;
    match reason {
        // The successful part of the plan must never be re-predicted
        StopReason::Succeeded => cx.savepoint_index = stopped_at.min(MAX_PREDICTED_STATES - 1),
        // The switching frame is re-planned by the next action
        StopReason::Switched | StopReason::Disabled => {
            cx.savepoint_index = cx.savepoint_index.min(stopped_at)
        }
        // Keep the savepoint where the failed sequence started from
        StopReason::Failed => {}
    }
    actions::on_sequence_stopped(action, bot, cx, reason, stopped_at);
}

/// Apply the synthesized record to the simulated state through the black
/// box integrator and advance the simulated clocks.
fn next_movement_step<W: PhysicsWorld>(world: &W, bot: &Bot, cx: &mut PredictionContext) {
    // A pending look-at-point overrides an overridable look dir
    if cx.movement_state.pending_look_at_point.is_active() && cx.record.input.can_override_look_vec
    {
        let point = cx.movement_state.pending_look_at_point.origin();
        if let Some(dir) = math::try_normalize(point - cx.sim_state.origin) {
            cx.record.input.set_intended_look_dir(dir, true);
            cx.record.input.turn_speed_multiplier =
                cx.movement_state.pending_look_at_point.turn_speed_multiplier;
        }
    }

    // Agents turn at their own configured rate; scale the multiplier so the
    // integrator's nominal rate matches
    cx.record.input.turn_speed_multiplier *= bot.params.base_turn_speed / world.base_turn_speed();

    if let Some(velocity) = cx.record.modified_velocity() {
        cx.sim_state.velocity = velocity;
    }

    let millis = cx.prediction_step_millis;
    let result = world.advance(&cx.sim_state, &cx.record.input, millis);
    cx.sim_state = result.state;
    cx.frame_events = result.events;

    cx.movement_state.frame(millis);
    cx.movement_state.try_deactivate(&cx.sim_state);

    cx.total_millis_ahead += millis;
    cx.level_time = cx.plan_started_at + cx.total_millis_ahead as i64;
}

/// Whether the simulated position has entered hazardous contents.
pub fn is_in_hazard<W: PhysicsWorld>(world: &W, state: &EntityState) -> bool {
    let feet = state.origin + Vector3::new(0.0, 0.0, state.mins.z + 1.0);
    world.point_contents(feet) & contents::HAZARDOUS != 0
        || world.point_contents(state.origin) & contents::HAZARDOUS != 0
}

/// Probe straight down below the origin.
pub fn trace_to_ground<W: PhysicsWorld>(
    world: &W,
    state: &EntityState,
    depth: f32,
) -> crate::world::Trace {
    let below = state.origin - Vector3::new(0.0, 0.0, depth);
    world.trace_box(state.origin, below, state.mins, state.maxs, clip_mask::SOLID)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::module::NavTarget;
    use crate::params::PlanningParams;
    use crate::test_support::BoxWorld;

    fn bot_at(world: &BoxWorld, origin: Vector3<f32>) -> Bot {
        let mut bot = Bot::new(PlanningParams::default(), 11);
        bot.entity_state = world.spawn_grounded(origin);
        bot
    }

    #[test]
    fn test_plan_frames_are_contiguous_and_bounded() {
        let world = BoxWorld::flat();
        let mut bot = bot_at(&world, Vector3::new(0.0, 0.0, 25.0));
        bot.nav_target = Some(NavTarget {
            area: 1,
            origin: Vector3::new(700.0, 0.0, 25.0),
            radius: 32.0,
        });

        let mut cx = PredictionContext::new();
        build_plan(&world, &mut bot, &mut cx, 0).unwrap();

        let top = cx.top_of_stack_index();
        assert!(top >= 2 && top <= MAX_PREDICTED_STATES, "top = {}", top);
        assert!(cx.savepoint_index() <= top);
        assert_eq!(cx.frames.len(), top);
        for i in 0..top - 1 {
            assert_eq!(
                cx.frames[i + 1].timestamp,
                cx.frames[i].timestamp + cx.frames[i].step_millis
            );
        }
        // Every started sequence was stopped exactly once
        assert_eq!(cx.sequence_starts, cx.sequence_stops);
        assert!(cx.sequence_starts >= 1);
    }

    #[test]
    fn test_blocked_walk_disables_the_action_and_terminates() {
        let mut world = BoxWorld::flat();
        world.add_wall(Vector3::new(24.0, -128.0, 0.0), Vector3::new(48.0, 128.0, 160.0));
        world.areas[1].maxs.x = 24.0;
        let mut bot = bot_at(&world, Vector3::new(0.0, 0.0, 25.0));
        bot.nav_target = Some(NavTarget {
            area: 1,
            origin: Vector3::new(300.0, 0.0, 25.0),
            radius: 24.0,
        });

        let mut cx = PredictionContext::new();
        build_plan(&world, &mut bot, &mut cx, 0).unwrap();

        assert!(cx.is_action_disabled(ActionKind::WalkCarefully));
        assert!(cx.plan_is_valid);
        let top = cx.top_of_stack_index();
        assert!(top >= 1 && top <= MAX_PREDICTED_STATES);
        // Rolled back frames are gone from the committed plan
        assert_eq!(cx.frames.len(), top);
        assert!(cx.savepoint_index() <= top);
        assert_eq!(cx.sequence_starts, cx.sequence_stops);
    }

    #[test]
    fn test_turn_speed_multiplier_scales_with_params() {
        let world = BoxWorld::flat();
        let mut params = PlanningParams::default();
        params.base_turn_speed = 720.0;
        let mut bot = Bot::new(params, 3);
        bot.entity_state = world.spawn_grounded(Vector3::new(0.0, 0.0, 25.0));
        bot.nav_target = Some(NavTarget {
            area: 1,
            origin: Vector3::new(0.0, 700.0, 25.0),
            radius: 32.0,
        });

        let mut cx = PredictionContext::new();
        build_plan(&world, &mut bot, &mut cx, 0).unwrap();

        let multiplier = cx.frames[0].record.input.turn_speed_multiplier;
        assert!((multiplier - 2.0).abs() < 1e-6, "multiplier = {}", multiplier);
    }
}
