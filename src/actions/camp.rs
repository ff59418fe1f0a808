//! Holding a camping spot: small randomized strafes inside its radius
//! while keeping the watched point in view.

use crate::actions::ActionKind;
use crate::math;
use crate::plan::PlanEnv;
use crate::world::PhysicsWorld;

pub(super) fn plan_camp<W: PhysicsWorld>(env: &mut PlanEnv<W>) {
    if !env.cx.movement_state.camping_spot.is_active() {
        env.cx.cannot_apply(Some(ActionKind::Default));
        return;
    }

    let state = env.cx.sim_state.clone();
    let spot = env.cx.movement_state.camping_spot;
    let origin = spot.origin();

    env.cx.record.input.clear();

    // Drifted out: walk back first, camping strafes resume inside
    if math::distance_2d(state.origin, origin) > spot.radius {
        let input = &mut env.cx.record.input;
        input.is_ucmd_set = true;
        if let Some(dir) = math::try_normalize_2d(origin - state.origin) {
            input.set_intended_look_dir(dir, true);
            input.forward_move = 1;
        }
        env.cx.set_completed();
        return;
    }

    let (forward, right) = if env.cx.movement_state.camping_spot.are_key_move_dirs_valid() {
        env.cx.movement_state.camping_spot.key_move_dirs()
    } else {
        env.cx
            .movement_state
            .camping_spot
            .roll_key_move_dirs(&mut env.bot.rng)
    };

    if env.cx.movement_state.camping_spot.needs_new_look_at_point() {
        env.cx
            .movement_state
            .camping_spot
            .refresh_look_at_point_timer(&mut env.bot.rng);
    }

    let look_point = env
        .cx
        .movement_state
        .camping_spot
        .look_at_point()
        .unwrap_or_else(|| {
            // No watched point: look along a slightly jittered current view
            state.origin + state.forward_dir() * 128.0
        });

    let input = &mut env.cx.record.input;
    input.is_ucmd_set = true;
    input.forward_move = forward;
    input.right_move = right;
    input.walk = true;
    // Higher alertness, snappier turns
    input.turn_speed_multiplier = 1.0 + env.cx.movement_state.camping_spot.alertness;
    if let Some(dir) = math::try_normalize(look_point - state.origin) {
        env.cx.record.input.set_intended_look_dir(dir, true);
    } else {
        env.cx
            .record
            .input
            .set_already_computed_angles(state.pitch, state.yaw);
        env.cx.record.input.is_look_dir_set = true;
    }

    // Strafing in place needs no lookahead; one frame per plan suffices
    env.cx.set_completed();
}
