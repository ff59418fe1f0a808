//! Movement actions: the closed set of behaviors an agent can apply for a
//! stretch of predicted frames. Each action synthesizes input for the
//! current frame, may hand the frame over to a better-suited action, and
//! checks the physics outcome of its own steps.

mod bunny;
mod camp;
mod combat;
mod jumppad;
mod platform;
mod swim;
mod walk;
mod weapon_jump;

use cgmath::{InnerSpace, Vector3};
use log::trace;

use crate::math;
use crate::module::Bot;
use crate::plan::{self, PlanEnv, PredictionContext, StopReason};
use crate::world::{area_contents, area_flags, PhysicsWorld};

/// Every movement behavior the planner can apply. The discriminant order
/// is also the bit order of disable/tested masks.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ActionKind {
    /// The last-resort action: follow the active fallback script or emit a
    /// relaxed single-frame input. Never refuses a frame.
    Default,
    WalkCarefully,
    BunnyFollowingReachChain,
    BunnyTestingSavedLookDirs,
    BunnyToBestShortcutArea,
    RidePlatform,
    Swim,
    CampASpot,
    CombatDodgeSemiRandomly,
    HandleTriggeredJumppad,
    FlyUntilLanding,
    LandOnSavedAreas,
    ScheduleWeaponJump,
    TriggerWeaponJump,
    CorrectWeaponJump,
}

impl ActionKind {
    pub fn bit(self) -> u32 {
        1 << self as u32
    }
}

/// Static properties controlling the generic step-result checks.
pub struct ActionProps {
    pub stop_on_entering_water: bool,
    pub stop_on_touch_jumppad: bool,
    pub stop_on_touch_teleporter: bool,
    pub stop_on_touch_platform: bool,
    pub fail_on_hazard_impact: bool,
}

pub const fn props(kind: ActionKind) -> ActionProps {
    use ActionKind::*;
    match kind {
        Swim => ActionProps {
            stop_on_entering_water: false,
            stop_on_touch_jumppad: true,
            stop_on_touch_teleporter: true,
            stop_on_touch_platform: true,
            fail_on_hazard_impact: true,
        },
        RidePlatform => ActionProps {
            stop_on_entering_water: true,
            stop_on_touch_jumppad: true,
            stop_on_touch_teleporter: true,
            stop_on_touch_platform: false,
            fail_on_hazard_impact: true,
        },
        HandleTriggeredJumppad | FlyUntilLanding | LandOnSavedAreas => ActionProps {
            stop_on_entering_water: true,
            stop_on_touch_jumppad: false,
            stop_on_touch_teleporter: true,
            stop_on_touch_platform: true,
            // Flight paths over hazards cannot be corrected anyway
            fail_on_hazard_impact: false,
        },
        ScheduleWeaponJump | TriggerWeaponJump | CorrectWeaponJump => ActionProps {
            stop_on_entering_water: true,
            stop_on_touch_jumppad: true,
            stop_on_touch_teleporter: true,
            stop_on_touch_platform: true,
            fail_on_hazard_impact: false,
        },
        _ => ActionProps {
            stop_on_entering_water: true,
            stop_on_touch_jumppad: true,
            stop_on_touch_teleporter: true,
            stop_on_touch_platform: true,
            fail_on_hazard_impact: true,
        },
    }
}

/// Persistent per-action data surviving across plans.
#[derive(Default)]
pub struct ActionsState {
    pub bunny: BunnyState,
    pub combat: CombatState,
}

#[derive(Default)]
pub struct BunnyState {
    /// Look dirs that led to completed bunny sequences in earlier plans.
    pub saved_look_dirs: Vec<Vector3<f32>>,
    /// The saved dir being tested within the current plan.
    pub current_dir_index: usize,
    /// Frame index of the last grounded frame with improved travel time.
    pub last_improvement_frame: usize,
}

impl BunnyState {
    const MAX_SAVED_DIRS: usize = 8;

    pub fn save_look_dir(&mut self, dir: Vector3<f32>) {
        if self.saved_look_dirs.len() >= Self::MAX_SAVED_DIRS {
            self.saved_look_dirs.remove(0);
        }
        self.saved_look_dirs.push(dir);
    }
}

#[derive(Default)]
pub struct CombatState {
    pub rolls_this_plan: u32,
}

pub(crate) fn before_planning(bot: &mut Bot) {
    bot.actions_state.bunny.current_dir_index = 0;
    bot.actions_state.bunny.last_improvement_frame = 0;
    bot.actions_state.combat.rolls_this_plan = 0;
}

pub(crate) fn after_planning(_bot: &mut Bot, _cx: &PredictionContext) {}

/// Pick the action best matching the simulated situation, in priority
/// order. Disabled actions fall through to the next candidate; `Default`
/// always accepts.
pub(crate) fn suggest_suitable_action<W: PhysicsWorld>(env: &mut PlanEnv<W>) -> ActionKind {
    use ActionKind::*;
    let cx = &env.cx;
    let state = &cx.sim_state;
    let movement = &cx.movement_state;

    let pick = |kind: ActionKind| -> Option<ActionKind> {
        (!cx.is_action_disabled(kind)).then_some(kind)
    };

    let suggested = if state.water_level > 1 {
        pick(Swim)
    } else if movement.jumppad.has_touched_jumppad && !movement.jumppad.has_entered_jumppad {
        pick(HandleTriggeredJumppad)
    } else if movement.fly_until_landing.is_active() {
        if movement.fly_until_landing.is_landing() {
            pick(LandOnSavedAreas).or(pick(FlyUntilLanding))
        } else {
            pick(FlyUntilLanding)
        }
    } else if movement.weapon_jump.has_triggered_weapon_jump
        && !movement.weapon_jump.has_corrected_weapon_jump
    {
        pick(CorrectWeaponJump)
    } else if movement.weapon_jump.has_pending_weapon_jump {
        pick(TriggerWeaponJump)
    } else if matches!(
        state.ground,
        crate::physics::Ground::Platform { at_top: false, .. }
    ) {
        pick(RidePlatform)
    } else if movement.camping_spot.is_active() {
        pick(CampASpot)
    } else if env.bot.active_fallback.is_some() {
        pick(Default)
    } else if env.bot.should_attack && !cx.is_action_disabled(CombatDodgeSemiRandomly) {
        Some(CombatDodgeSemiRandomly)
    } else {
        pick(WalkCarefully)
    };

    let suggested = suggested.unwrap_or(Default);
    trace!(
        "suggested {:?} at frame {}",
        suggested,
        cx.top_of_stack_index()
    );
    suggested
}

pub(crate) fn plan_step<W: PhysicsWorld>(kind: ActionKind, env: &mut PlanEnv<W>) {
    use ActionKind::*;
    match kind {
        Default => walk::plan_default(env),
        WalkCarefully => walk::plan_walk_carefully(env),
        BunnyFollowingReachChain => bunny::plan_following_reach_chain(env),
        BunnyTestingSavedLookDirs => bunny::plan_testing_saved_look_dirs(env),
        BunnyToBestShortcutArea => bunny::plan_to_best_shortcut_area(env),
        RidePlatform => platform::plan_ride(env),
        Swim => swim::plan_swim(env),
        CampASpot => camp::plan_camp(env),
        CombatDodgeSemiRandomly => combat::plan_dodge(env),
        HandleTriggeredJumppad => jumppad::plan_handle_triggered(env),
        FlyUntilLanding => jumppad::plan_fly_until_landing(env),
        LandOnSavedAreas => jumppad::plan_land_on_saved_areas(env),
        ScheduleWeaponJump => weapon_jump::plan_schedule(env),
        TriggerWeaponJump => weapon_jump::plan_trigger(env),
        CorrectWeaponJump => weapon_jump::plan_correct(env),
    }
}

/// Validate the physics outcome of the step that just ran. `frame_index`
/// is the committed frame holding the pre-step snapshot.
pub(crate) fn check_step_results<W: PhysicsWorld>(
    kind: ActionKind,
    env: &mut PlanEnv<W>,
    frame_index: usize,
) {
    use ActionKind::*;
    match kind {
        WalkCarefully => walk::check_walk_carefully(env, frame_index),
        BunnyFollowingReachChain | BunnyTestingSavedLookDirs | BunnyToBestShortcutArea => {
            bunny::check_bunny(kind, env, frame_index)
        }
        RidePlatform => platform::check_ride(env, frame_index),
        Swim => swim::check_swim(env, frame_index),
        CombatDodgeSemiRandomly => combat::check_dodge(env, frame_index),
        FlyUntilLanding | LandOnSavedAreas => jumppad::check_flight(kind, env, frame_index),
        TriggerWeaponJump | CorrectWeaponJump => {
            weapon_jump::check_jump(kind, env, frame_index)
        }
        Default | CampASpot | HandleTriggeredJumppad | ScheduleWeaponJump => {}
    }
    if !env.cx.should_rollback && !env.cx.is_completed {
        check_common_results(kind, env, frame_index);
    }
}

fn check_common_results<W: PhysicsWorld>(kind: ActionKind, env: &mut PlanEnv<W>, frame_index: usize) {
    let props = props(kind);
    let world = env.world;
    let prev_state = env.cx.frames[frame_index].entity_state.clone();
    let new_state = &env.cx.sim_state;

    // Transitions into hazardous contents fail the sequence; being already
    // inside does not (the plan has to get out somehow)
    if props.fail_on_hazard_impact
        && plan::is_in_hazard(world, new_state)
        && !plan::is_in_hazard(world, &prev_state)
    {
        trace!("step entered hazardous contents, rolling back");
        env.cx.set_pending_rollback();
        return;
    }

    // Same for disabled/do-not-enter/excluded areas
    let new_area = new_state.curr_area;
    if new_area != 0 && new_area != prev_state.curr_area {
        let area = world.area(new_area);
        let bad_transition = area.flags & area_flags::DISABLED != 0
            || area.contents & area_contents::DO_NOT_ENTER != 0
            || world.is_area_temporarily_excluded(new_area);
        if bad_transition {
            let prev_bad = prev_state.curr_area != 0 && {
                let prev = world.area(prev_state.curr_area);
                prev.flags & area_flags::DISABLED != 0
                    || prev.contents & area_contents::DO_NOT_ENTER != 0
                    || world.is_area_temporarily_excluded(prev_state.curr_area)
            };
            if !prev_bad {
                trace!("step entered excluded area {}, rolling back", new_area);
                env.cx.set_pending_rollback();
                return;
            }
        }
    }

    let events = &env.cx.frame_events;
    if props.stop_on_touch_jumppad && events.has_touched_jumppad {
        if let Some(target) = events.jumppad_target {
            env.cx.movement_state.jumppad.activate(target);
        }
        env.cx.set_completed();
        return;
    }
    if props.stop_on_touch_teleporter && events.has_touched_teleporter {
        env.cx.set_completed();
        return;
    }
    if props.stop_on_touch_platform && events.has_touched_platform {
        env.cx.set_completed();
        return;
    }
    if props.stop_on_entering_water
        && new_state.water_level > 1
        && prev_state.water_level <= 1
    {
        env.cx.set_completed();
        return;
    }

    // Reaching the navigation target always completes the plan
    if let Some(target) = env.bot.nav_target {
        if math::distance(new_state.origin, target.origin) < target.radius {
            env.cx.set_completed();
        }
    }
}

pub(crate) fn on_sequence_started(_kind: ActionKind, cx: &mut PredictionContext) {
    // A failed sequence rolls back to where it began
    cx.mark_savepoint(0);
}

pub(crate) fn on_sequence_stopped(
    kind: ActionKind,
    bot: &mut Bot,
    cx: &mut PredictionContext,
    reason: StopReason,
    stopped_at: usize,
) {
    use ActionKind::*;
    match kind {
        BunnyFollowingReachChain => {
            if reason == StopReason::Succeeded {
                if let Some(record) = cx.frames.get(cx.sequence.start_frame) {
                    if record.record.input.is_look_dir_set {
                        bot.actions_state
                            .bunny
                            .save_look_dir(record.record.input.intended_look_dir());
                    }
                }
            }
        }
        BunnyTestingSavedLookDirs => {
            if reason == StopReason::Failed {
                // Try the next saved dir on the re-predicted frames
                bot.actions_state.bunny.current_dir_index += 1;
            }
        }
        _ => {}
    }
    trace!(
        "{:?} sequence [{}, {}) stopped: {:?}",
        kind,
        cx.sequence.start_frame,
        stopped_at,
        reason
    );
}

/// The next point to move toward: far enough ahead along the reach chain
/// to be worth aligning with, or the nav target itself when near.
pub(crate) fn intended_point<W: PhysicsWorld>(env: &mut PlanEnv<W>) -> Option<Vector3<f32>> {
    let target = env.bot.nav_target?;
    let origin = env.cx.sim_state.origin;
    if math::distance(origin, target.origin) < env.bot.params.close_to_target_distance {
        return Some(target.origin);
    }
    let chain: Vec<_> = env.cx.reach_chain(env.world, target.area).to_vec();
    for &reach_num in &chain {
        let reach = env.world.reach(reach_num);
        if math::distance_2d(origin, reach.start) > 24.0 {
            return Some(reach.start);
        }
        if math::distance_2d(origin, reach.end) > 24.0 {
            return Some(reach.end);
        }
    }
    Some(target.origin)
}

/// Common grounded steering: look at the point, press forward once the
/// view is roughly aligned with it.
pub(crate) fn steer_to_point<W: PhysicsWorld>(env: &mut PlanEnv<W>, point: Vector3<f32>) {
    let state = &env.cx.sim_state;
    let to_point = point - state.origin;
    let look_dir = if to_point.z.abs() < 24.0 {
        math::try_normalize_2d(to_point)
    } else {
        math::try_normalize(to_point)
    };
    let input = &mut env.cx.record.input;
    input.is_ucmd_set = true;
    let look_dir = match look_dir {
        Some(dir) => dir,
        None => return,
    };
    input.set_intended_look_dir(look_dir, true);

    let aligned = math::try_normalize_2d(state.forward_dir())
        .zip(math::try_normalize_2d(to_point))
        .map(|(fwd, dir)| fwd.dot(dir) > 0.9)
        .unwrap_or(false);
    if aligned {
        input.forward_move = 1;
    }
}
