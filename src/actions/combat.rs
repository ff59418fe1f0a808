//! Semi-random keyboard dodging for fights: keep moving with hard to
//! predict key combinations while leaving the view free for aiming.

use crate::actions::ActionKind;
use crate::plan::PlanEnv;
use crate::world::PhysicsWorld;

/// How long a rolled key combination stays held, in millis.
const KEY_MOVES_TIMEOUT: u16 = 400;

/// Dodge sequences predict only a few frames; fights change too fast for
/// deep lookahead to pay off.
const DODGE_SEQUENCE_FRAMES: usize = 6;

pub(super) fn plan_dodge<W: PhysicsWorld>(env: &mut PlanEnv<W>) {
    if !env.bot.should_attack {
        env.cx.cannot_apply(Some(ActionKind::WalkCarefully));
        return;
    }
    let state = env.cx.sim_state.clone();
    if !state.has_ground() {
        // Keep whatever trajectory the dodge jump had
        env.cx.set_default_input();
        return;
    }

    if !env.cx.movement_state.key_move_dirs.is_active() {
        let world = env.world;
        let target = env.bot.nav_target;
        let (forward, right) = {
            let rng = &mut env.bot.rng;
            let cache = env.cx.probe_cache();
            match target {
                Some(target) => {
                    cache.make_randomized_key_moves_to_target(rng, world, &state, target.origin)
                }
                None => cache.make_random_key_moves(rng, world, &state),
            }
        };
        env.cx
            .movement_state
            .key_move_dirs
            .activate(forward, right, KEY_MOVES_TIMEOUT);
        env.bot.actions_state.combat.rolls_this_plan += 1;
    }

    let dirs = env.cx.movement_state.key_move_dirs;
    let input = &mut env.cx.record.input;
    input.clear();
    input.is_ucmd_set = true;
    input.forward_move = dirs.forward_move;
    input.right_move = dirs.right_move;
    // The view belongs to the aiming code during a fight
    input.can_override_look_vec = true;
    input.can_override_pitch = true;
    input.set_already_computed_angles(state.pitch, state.yaw);
    input.is_look_dir_set = true;
}

pub(super) fn check_dodge<W: PhysicsWorld>(env: &mut PlanEnv<W>, frame_index: usize) {
    let prev_speed = env.cx.frames[frame_index].entity_state.speed_2d();
    let new_speed = env.cx.sim_state.speed_2d();
    // Ran the dodge into a wall
    if prev_speed > 30.0 && new_speed < 0.2 * prev_speed && env.cx.sim_state.has_ground() {
        env.cx.movement_state.key_move_dirs.deactivate();
        env.cx.set_pending_rollback();
        return;
    }
    if env.cx.top_of_stack_index() - env.cx.sequence.start_frame >= DODGE_SEQUENCE_FRAMES {
        env.cx.set_completed();
    }
}
