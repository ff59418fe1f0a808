//! Riding a moving platform: stand still near its center and wait.

use cgmath::Vector3;

use crate::math;
use crate::physics::Ground;
use crate::plan::PlanEnv;
use crate::world::PhysicsWorld;

pub(super) fn plan_ride<W: PhysicsWorld>(env: &mut PlanEnv<W>) {
    let (mins, maxs) = match env.cx.sim_state.ground {
        Ground::Platform {
            mins,
            maxs,
            at_top: false,
        } => (mins, maxs),
        // Not riding (or already done); let the engine pick
        _ => {
            env.cx.cannot_apply(None);
            return;
        }
    };

    let center = (mins + maxs) * 0.5;
    let origin = env.cx.sim_state.origin;
    let to_center = Vector3::new(center.x - origin.x, center.y - origin.y, 0.0);

    let input = &mut env.cx.record.input;
    input.clear();
    input.is_ucmd_set = true;
    // Aiming is free while waiting
    input.can_override_look_vec = true;
    input.can_override_ucmd = false;

    // Drift toward the center so the platform edge cannot shear us off
    if let Some(dir) = math::try_normalize_2d(to_center) {
        if math::distance_2d(origin, center) > 16.0 {
            input.set_intended_look_dir(dir, true);
            input.forward_move = 1;
            input.walk = true;
            input.can_override_look_vec = false;
        } else {
            input.set_already_computed_angles(env.cx.sim_state.pitch, env.cx.sim_state.yaw);
            input.is_look_dir_set = true;
        }
    } else {
        input.set_already_computed_angles(env.cx.sim_state.pitch, env.cx.sim_state.yaw);
        input.is_look_dir_set = true;
    }
}

pub(super) fn check_ride<W: PhysicsWorld>(env: &mut PlanEnv<W>, _frame_index: usize) {
    match env.cx.sim_state.ground {
        // Reached the top, or stepped off: ordinary planning resumes
        Ground::Platform { at_top: true, .. } | Ground::World => env.cx.set_completed(),
        _ => {}
    }
}
