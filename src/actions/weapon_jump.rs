//! Weapon jumps: using self-damage knockback to reach places the router
//! has no ordinary route to. Three stages, each its own action: schedule
//! (decide and aim), trigger (fire at the ground while jumping) and
//! correct (cheat the resulting velocity toward the target).

use cgmath::{InnerSpace, Vector3};

use crate::actions::ActionKind;
use crate::math;
use crate::plan::PlanEnv;
use crate::world::{clip_mask, PhysicsWorld};

/// Minimum height gap that justifies burning health on a weapon jump.
const MIN_HEIGHT_GAP: f32 = 128.0;

/// Estimated knockback speed of a point-blank self-hit.
const KNOCKBACK_SPEED: f32 = 700.0;

/// cos of the max aim error before firing.
const AIM_COSINE: f32 = 0.996;

pub(super) fn plan_schedule<W: PhysicsWorld>(env: &mut PlanEnv<W>) {
    let target = match env.bot.nav_target {
        Some(target) => target,
        None => {
            env.cx.cannot_apply(Some(ActionKind::Default));
            return;
        }
    };
    let state = env.cx.sim_state.clone();

    let applicable = state.has_ground()
        && !env.cx.movement_state.weapon_jump.is_active()
        && target.origin.z - state.origin.z > MIN_HEIGHT_GAP
        && env
            .world
            .route(state.routing_start_areas().as_slice(), target.area)
            .is_none();
    if !applicable {
        env.cx.cannot_apply(Some(ActionKind::Default));
        return;
    }

    // Fire target: the floor right below
    let below = state.origin - Vector3::new(0.0, 0.0, 80.0);
    let trace = env
        .world
        .trace_box(state.origin, below, state.mins, state.maxs, clip_mask::SOLID);
    if trace.is_empty() {
        env.cx.cannot_apply(Some(ActionKind::Default));
        return;
    }

    env.cx.movement_state.weapon_jump.activate(
        state.origin,
        target.origin,
        trace.end - Vector3::new(0.0, 0.0, state.maxs.z),
        env.bot.weapon_jump_weapon,
    );
    env.cx.cannot_apply(Some(ActionKind::TriggerWeaponJump));
}

pub(super) fn plan_trigger<W: PhysicsWorld>(env: &mut PlanEnv<W>) {
    if !env.cx.movement_state.weapon_jump.has_pending_weapon_jump {
        env.cx.cannot_apply(None);
        return;
    }
    let state = env.cx.sim_state.clone();
    let fire_target = env.cx.movement_state.weapon_jump.fire_target();
    let weapon = env.cx.movement_state.weapon_jump.weapon;

    let to_fire = match math::try_normalize(fire_target - state.origin) {
        Some(dir) => dir,
        None => Vector3::new(0.0, 0.0, -1.0),
    };

    let input = &mut env.cx.record.input;
    input.clear();
    input.is_ucmd_set = true;
    input.can_override_look_vec = false;
    input.can_override_pitch = false;
    input.turn_speed_multiplier = 2.0;
    input.set_intended_look_dir(to_fire, true);
    env.cx.record.pending_weapon = Some(weapon);

    // Keep turning until the aim is good enough to fire
    if state.forward_dir().dot(to_fire) < AIM_COSINE {
        return;
    }

    let input = &mut env.cx.record.input;
    input.up_move = 1;
    input.attack = true;

    // The integrator knows nothing about the rocket; inject the knockback
    let jump_target = env.cx.movement_state.weapon_jump.jump_target();
    let mut velocity = state.velocity;
    velocity.z = velocity.z.max(0.0) + KNOCKBACK_SPEED;
    if let Some(dir) = math::try_normalize_2d(jump_target - state.origin) {
        velocity.x += dir.x * 0.3 * KNOCKBACK_SPEED;
        velocity.y += dir.y * 0.3 * KNOCKBACK_SPEED;
    }
    env.cx.record.set_modified_velocity(velocity);

    env.cx.movement_state.weapon_jump.has_pending_weapon_jump = false;
    env.cx.movement_state.weapon_jump.has_triggered_weapon_jump = true;
}

pub(super) fn plan_correct<W: PhysicsWorld>(env: &mut PlanEnv<W>) {
    if !env.cx.movement_state.weapon_jump.has_triggered_weapon_jump {
        env.cx.cannot_apply(None);
        return;
    }
    let state = env.cx.sim_state.clone();
    if state.has_ground() {
        // Never got airborne: the knockback estimate was wrong
        env.cx.movement_state.weapon_jump.deactivate();
        env.cx.set_pending_rollback();
        return;
    }

    let jump_target = env.cx.movement_state.weapon_jump.jump_target();
    env.cx.cheating_correct_velocity(jump_target, 0.8);

    env.cx.movement_state.weapon_jump.has_triggered_weapon_jump = false;
    env.cx.movement_state.weapon_jump.has_corrected_weapon_jump = true;
    env.cx
        .movement_state
        .fly_until_landing
        .activate_with_distance_threshold(jump_target, 72.0);

    let input = &mut env.cx.record.input;
    input.clear();
    input.is_ucmd_set = true;
    input.can_override_look_vec = false;
    match math::try_normalize(jump_target - state.origin) {
        Some(dir) => input.set_intended_look_dir(dir, true),
        None => {
            input.set_already_computed_angles(state.pitch, state.yaw);
            input.is_look_dir_set = true;
        }
    }
}

pub(super) fn check_jump<W: PhysicsWorld>(
    kind: ActionKind,
    env: &mut PlanEnv<W>,
    _frame_index: usize,
) {
    // The flight actions take over once the correction stage has run; a
    // trigger step that somehow lost its state fails the sequence
    if matches!(kind, ActionKind::TriggerWeaponJump)
        && !env.cx.movement_state.weapon_jump.is_active()
    {
        env.cx.set_pending_rollback();
    }
}
