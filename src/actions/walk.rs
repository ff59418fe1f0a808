//! The default (single-frame, never-refusing) action and the careful
//! ground walk.

use crate::actions::{self, ActionKind};
use crate::fallback::FallbackStatus;
use crate::math;
use crate::plan::PlanEnv;
use crate::probes::{full_bit, probe_dir};
use crate::world::PhysicsWorld;

/// Frames a walk sequence predicts ahead before declaring success.
const WALK_SEQUENCE_FRAMES: usize = 12;

/// The last resort: apply the active fallback script, or steer straight at
/// a close nav target, or emit a relaxed input. Always completes on its
/// first frame; there is nothing to validate by predicting further.
pub(super) fn plan_default<W: PhysicsWorld>(env: &mut PlanEnv<W>) {
    if let Some(fallback) = env.bot.active_fallback.as_mut() {
        let status = fallback.check_status(env.world, &env.cx.sim_state, env.cx.level_time);
        if status == FallbackStatus::Pending {
            let mut input = std::mem::take(&mut env.cx.record.input);
            fallback.setup_input(&env.cx.sim_state, &mut input);
            env.cx.record.input = input;
            env.cx.set_completed();
            return;
        }
        // Completed or invalid scripts are dropped by the module after the
        // plan; fall through to the relaxed input here
    }

    if let Some(target) = env.bot.nav_target {
        let close = math::distance(env.cx.sim_state.origin, target.origin)
            < env.bot.params.close_to_target_distance;
        if close {
            env.cx.record.input.clear();
            actions::steer_to_point(env, target.origin);
            env.cx.set_completed();
            return;
        }
    }

    env.cx.set_default_input();
    env.cx.set_completed();
}

pub(super) fn plan_walk_carefully<W: PhysicsWorld>(env: &mut PlanEnv<W>) {
    let state = &env.cx.sim_state;
    let target = match env.bot.nav_target {
        Some(target) => target,
        None => {
            env.cx.cannot_apply(Some(ActionKind::Default));
            return;
        }
    };
    if !state.has_ground() || state.is_high_above_ground() {
        env.cx.cannot_apply(Some(ActionKind::Default));
        return;
    }
    // A close target needs no walk sequence; the default action steers at
    // it directly and finishes the approach in a single frame
    if math::distance(state.origin, target.origin) < env.bot.params.close_to_target_distance {
        env.cx.cannot_apply(Some(ActionKind::Default));
        return;
    }
    // A target far above with no route at all calls for a weapon jump
    if target.origin.z - state.origin.z > 128.0
        && !env.cx.is_action_disabled(ActionKind::ScheduleWeaponJump)
        && !env.cx.movement_state.weapon_jump.is_active()
        && env
            .world
            .route(state.routing_start_areas().as_slice(), target.area)
            .is_none()
    {
        env.cx.cannot_apply(Some(ActionKind::ScheduleWeaponJump));
        return;
    }
    // Too fast for careful stepping; the bunny family handles high speeds
    if state.speed_2d() > env.world.run_speed() * 1.2 {
        env.cx.cannot_apply(Some(ActionKind::BunnyToBestShortcutArea));
        return;
    }

    let point = match actions::intended_point(env) {
        Some(point) => point,
        None => {
            env.cx.cannot_apply(Some(ActionKind::Default));
            return;
        }
    };

    env.cx.record.input.clear();
    actions::steer_to_point(env, point);
    if env.bot.should_move_carefully {
        env.cx.record.input.walk = true;
    }
}

pub(super) fn check_walk_carefully<W: PhysicsWorld>(env: &mut PlanEnv<W>, frame_index: usize) {
    let (prev_speed_2d, prev_has_ground, prev_grounded, forward_move) = {
        let frame = &env.cx.frames[frame_index];
        (
            frame.entity_state.speed_2d(),
            frame.entity_state.has_ground(),
            frame.entity_state.grounded_area,
            frame.record.input.forward_move,
        )
    };
    let new_speed_2d = env.cx.sim_state.speed_2d();
    let new_has_ground = env.cx.sim_state.has_ground();

    // Bumping into a wall while holding forward wastes the whole sequence
    if forward_move != 0
        && prev_has_ground
        && new_has_ground
        && new_speed_2d < 0.1 * env.world.run_speed()
        && prev_speed_2d < 0.1 * env.world.run_speed()
    {
        let state = env.cx.sim_state.clone();
        let world = env.world;
        let cache = env.cx.probe_cache();
        cache.test_for_results_mask(world, &state, full_bit(probe_dir::FRONT));
        if !cache.result(probe_dir::FRONT).is_fully_open() {
            env.cx.set_pending_rollback();
            return;
        }
    }

    if let Some(target) = env.bot.nav_target {
        // The walk must not make the target less reachable
        let at_start = env.cx.sequence.travel_time_at_start;
        let tolerance = env.bot.params.travel_time_regression_tolerance;
        if at_start > 0 {
            match env.cx.travel_time_to(env.world, target.area) {
                Some(now) if now <= at_start + tolerance => {}
                // Small regressions are routine inside one floor cluster
                // where the router rounds aggressively
                Some(_) if same_floor_cluster(env, prev_grounded) => {}
                _ => {
                    env.cx.set_pending_rollback();
                    return;
                }
            }
        }
    }

    if env.cx.top_of_stack_index() - env.cx.sequence.start_frame >= WALK_SEQUENCE_FRAMES {
        env.cx.set_completed();
    }
}

fn same_floor_cluster<W: PhysicsWorld>(env: &PlanEnv<W>, prev_grounded: u32) -> bool {
    let new_grounded = env.cx.sim_state.grounded_area;
    if prev_grounded == 0 || new_grounded == 0 {
        return false;
    }
    let prev_cluster = env.world.area(prev_grounded).floor_cluster;
    prev_cluster != 0 && prev_cluster == env.world.area(new_grounded).floor_cluster
}
