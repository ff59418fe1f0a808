//! Movement while submerged.

use crate::actions;
use crate::math;
use crate::plan::PlanEnv;
use crate::world::{contents, PhysicsWorld};

pub(super) fn plan_swim<W: PhysicsWorld>(env: &mut PlanEnv<W>) {
    let state = &env.cx.sim_state;
    if state.water_level <= 1 {
        env.cx.cannot_apply(None);
        return;
    }

    // In harmful liquids the only goal is getting out, straight up
    let must_surface =
        state.water_type & (contents::LAVA | contents::SLIME) != 0 || env.bot.nav_target.is_none();

    let point = if must_surface {
        None
    } else {
        actions::intended_point(env)
    };

    let input = &mut env.cx.record.input;
    input.clear();
    input.is_ucmd_set = true;

    match point {
        Some(point) => {
            let state = &env.cx.sim_state;
            let to_point = point - state.origin;
            if let Some(dir) = math::try_normalize(to_point) {
                let input = &mut env.cx.record.input;
                input.set_intended_look_dir(dir, true);
                input.forward_move = 1;
                // Fight sinking while moving horizontally
                if to_point.z > -8.0 {
                    input.up_move = 1;
                }
            }
        }
        None => {
            let input = &mut env.cx.record.input;
            input.up_move = 1;
            input.set_already_computed_angles(env.cx.sim_state.pitch, env.cx.sim_state.yaw);
            input.is_look_dir_set = true;
        }
    }
}

pub(super) fn check_swim<W: PhysicsWorld>(env: &mut PlanEnv<W>, frame_index: usize) {
    let prev_water = env.cx.frames[frame_index].entity_state.water_level;
    let new_water = env.cx.sim_state.water_level;
    // Surfacing hands the frame flow back to ground actions
    if new_water <= 1 && prev_water > 1 {
        env.cx.set_completed();
    }
}
