//! Jump pad flights: entering the pad, the uncontrollable flight phase and
//! landing on areas saved at launch time.

use cgmath::Vector3;

use crate::actions::ActionKind;
use crate::math;
use crate::plan::PlanEnv;
use crate::world::{AreaNum, PhysicsWorld};

/// Landing area candidates saved at launch, most preferred first.
const MAX_SAVED_LANDING_AREAS: usize = 4;

/// Begin the flight: save landing candidates around the pad target and
/// hand the frame to the flight action.
pub(super) fn plan_handle_triggered<W: PhysicsWorld>(env: &mut PlanEnv<W>) {
    if !env.cx.movement_state.jumppad.has_touched_jumppad {
        env.cx.cannot_apply(None);
        return;
    }
    let target = env.cx.movement_state.jumppad.target();

    env.cx.movement_state.jumppad.has_entered_jumppad = true;
    env.cx
        .movement_state
        .fly_until_landing
        .activate_with_z_threshold(target);

    save_landing_areas(env, target);
    env.cx.cannot_apply(Some(ActionKind::FlyUntilLanding));
}

fn save_landing_areas<W: PhysicsWorld>(env: &mut PlanEnv<W>, target: Vector3<f32>) {
    let half = Vector3::new(128.0, 128.0, 96.0);
    let mut candidates = Vec::new();
    env.world
        .areas_in_box(target - half, target + half, &mut candidates);

    let world = env.world;
    let goal = env.bot.nav_target.map(|t| t.area);
    candidates.retain(|&num| world.area(num).is_grounded());
    // Prefer areas that can still route to the nav target after landing
    candidates.sort_by_key(|&num| {
        let routable = goal
            .and_then(|goal| {
                world.route(crate::physics::RoutingAreas::single(num).as_slice(), goal)
            })
            .map(|route| route.travel_time)
            .unwrap_or(u32::MAX);
        let center = world.area(num).center;
        (routable, math::distance_2d(center, target) as u32)
    });
    candidates.truncate(MAX_SAVED_LANDING_AREAS);

    env.bot.saved_landing_areas = candidates;
}

/// The ballistic phase: nothing to steer, just watch for the landing
/// threshold and keep the view on the target.
pub(super) fn plan_fly_until_landing<W: PhysicsWorld>(env: &mut PlanEnv<W>) {
    if !env.cx.movement_state.fly_until_landing.is_active() {
        env.cx.cannot_apply(None);
        return;
    }
    if env.cx.sim_state.has_ground() {
        // Already down; let ground actions take over
        env.cx.movement_state.fly_until_landing.deactivate();
        env.cx.cannot_apply(None);
        return;
    }
    let state = env.cx.sim_state.clone();
    if env.cx.movement_state.fly_until_landing.check_for_landing(&state) {
        env.cx.cannot_apply(Some(ActionKind::LandOnSavedAreas));
        return;
    }

    let target = env.cx.movement_state.fly_until_landing.target();
    let input = &mut env.cx.record.input;
    input.clear();
    input.is_ucmd_set = true;
    input.can_override_look_vec = false;
    match math::try_normalize(target - state.origin) {
        Some(dir) => input.set_intended_look_dir(dir, true),
        None => {
            input.set_already_computed_angles(state.pitch, state.yaw);
            input.is_look_dir_set = true;
        }
    }
}

/// The landing phase: air-control toward the best saved area.
pub(super) fn plan_land_on_saved_areas<W: PhysicsWorld>(env: &mut PlanEnv<W>) {
    if env.cx.sim_state.has_ground() {
        env.cx.movement_state.fly_until_landing.deactivate();
        env.cx.set_completed();
        return;
    }

    let state = env.cx.sim_state.clone();
    let aim = best_landing_point(env, &state.origin).unwrap_or_else(|| {
        // No saved candidate below, aim at the flight target
        env.cx.movement_state.fly_until_landing.target()
    });

    let input = &mut env.cx.record.input;
    input.clear();
    input.is_ucmd_set = true;
    input.can_override_look_vec = false;
    input.forward_move = 1;
    match math::try_normalize(aim - state.origin) {
        Some(dir) => input.set_intended_look_dir(dir, true),
        None => {
            input.set_already_computed_angles(state.pitch, state.yaw);
            input.is_look_dir_set = true;
        }
    }
}

fn best_landing_point<W: PhysicsWorld>(
    env: &PlanEnv<W>,
    origin: &Vector3<f32>,
) -> Option<Vector3<f32>> {
    let below: Vec<AreaNum> = env
        .bot
        .saved_landing_areas
        .iter()
        .copied()
        .filter(|&num| env.world.area(num).maxs.z < origin.z)
        .collect();
    let num = below.first().copied()?;
    Some(env.world.area(num).center)
}

pub(super) fn check_flight<W: PhysicsWorld>(
    _kind: ActionKind,
    env: &mut PlanEnv<W>,
    _frame_index: usize,
) {
    if env.cx.sim_state.has_ground() {
        env.cx.movement_state.fly_until_landing.deactivate();
        env.cx.movement_state.jumppad.deactivate();
        env.cx.set_completed();
    }
    // A flight that never lands eventually overflows the plan stack; the
    // engine then disables the flight action and rolls back
}
