//! High-speed hop-based movement along the reach chain. Bunny sequences
//! are speculative by nature: they commit to a look dir for a stretch of
//! frames and rely on the rollback machinery when the stretch turns out to
//! lose speed or reachability.

use cgmath::Vector3;

use crate::actions::{self, ActionKind};
use crate::math;
use crate::physics::RoutingAreas;
use crate::plan::PlanEnv;
use crate::probes::{ObstacleAvoidanceResult, ProbeTier};
use crate::world::PhysicsWorld;

/// A bunny sequence rolls back when it cannot report progress for this
/// many frames.
const MAX_FRAMES_WITHOUT_IMPROVEMENT: usize = 16;

/// Grounded frames with improved travel time needed to declare success.
const FRAMES_TO_COMPLETE: usize = 8;

/// A shortcut area must beat the current route by at least this much
/// (hundredths of a second) to be worth leaving the reach chain for.
const MIN_SHORTCUT_GAIN: u32 = 10;

/// Shortcut areas closer than this are not worth aiming at.
const MIN_SHORTCUT_DISTANCE: f32 = 64.0;

pub(super) fn plan_following_reach_chain<W: PhysicsWorld>(env: &mut PlanEnv<W>) {
    let point = match applicable_intended_point(env) {
        Some(point) => point,
        None => return,
    };
    let intended_dir = match math::try_normalize_2d(point - env.cx.sim_state.origin) {
        Some(dir) => dir,
        None => {
            env.cx.cannot_apply(Some(ActionKind::Default));
            return;
        }
    };
    plan_hops_along_dir(env, intended_dir);
}

/// Hop straight toward the floor-cluster area that shortens the route the
/// most, ignoring the reach chain's detours across the same floor.
pub(super) fn plan_to_best_shortcut_area<W: PhysicsWorld>(env: &mut PlanEnv<W>) {
    if applicable_intended_point(env).is_none() {
        return;
    }
    let dir = match shortcut_area_dir(env) {
        Some(dir) => dir,
        None => {
            env.cx.cannot_apply(Some(ActionKind::BunnyTestingSavedLookDirs));
            return;
        }
    };
    plan_hops_along_dir(env, dir);
}

/// The direction toward the area of the current floor cluster with the
/// best remaining travel time, if any area beats the current route.
fn shortcut_area_dir<W: PhysicsWorld>(env: &mut PlanEnv<W>) -> Option<Vector3<f32>> {
    let target = env.bot.nav_target?;
    let grounded = env.cx.sim_state.grounded_area;
    let origin = env.cx.sim_state.origin;
    if grounded == 0 {
        return None;
    }
    let cluster = env.world.area(grounded).floor_cluster;
    if cluster == 0 {
        return None;
    }
    let current_time = env.cx.travel_time_to(env.world, target.area)?;

    let mut areas = Vec::new();
    env.world.floor_cluster_areas(cluster, &mut areas);
    let mut best: Option<(u32, Vector3<f32>)> = None;
    for num in areas {
        if num == grounded {
            continue;
        }
        let center = env.world.area(num).center;
        if math::distance_2d(center, origin) < MIN_SHORTCUT_DISTANCE {
            continue;
        }
        let time = match env
            .world
            .route(RoutingAreas::single(num).as_slice(), target.area)
        {
            Some(route) => route.travel_time,
            None => continue,
        };
        if time + MIN_SHORTCUT_GAIN > current_time {
            continue;
        }
        if best.map_or(true, |(best_time, _)| time < best_time) {
            best = Some((time, center));
        }
    }
    let (_, center) = best?;
    math::try_normalize_2d(center - origin)
}

pub(super) fn plan_testing_saved_look_dirs<W: PhysicsWorld>(env: &mut PlanEnv<W>) {
    if applicable_intended_point(env).is_none() {
        return;
    }
    let index = env.bot.actions_state.bunny.current_dir_index;
    let dir = match env.bot.actions_state.bunny.saved_look_dirs.get(index) {
        Some(&dir) => dir,
        None => {
            // Every saved dir was tried within this plan
            env.cx.disable_action(ActionKind::BunnyTestingSavedLookDirs);
            env.cx.cannot_apply(Some(ActionKind::BunnyFollowingReachChain));
            return;
        }
    };
    let dir = match math::try_normalize_2d(dir) {
        Some(dir) => dir,
        None => {
            env.cx.cannot_apply(Some(ActionKind::BunnyFollowingReachChain));
            return;
        }
    };
    plan_hops_along_dir(env, dir);
}

/// Common applicability gate. Returns `None` after flagging the handover.
fn applicable_intended_point<W: PhysicsWorld>(env: &mut PlanEnv<W>) -> Option<Vector3<f32>> {
    if env.bot.nav_target.is_none() {
        env.cx.cannot_apply(Some(ActionKind::Default));
        return None;
    }
    // Hops lock the view; refuse them when that would take a likely
    // target out of the field of fire
    if env.bot.should_attack && !env.cx.may_hit_while_running() {
        env.cx.cannot_apply(Some(ActionKind::CombatDodgeSemiRandomly));
        return None;
    }
    let state = &env.cx.sim_state;
    // Bunnying off a ledge blind is how bots die in lava
    if !state.has_ground() && !env.cx.can_safely_keep_high_speed(env.world) {
        env.cx.cannot_apply(Some(ActionKind::Default));
        return None;
    }
    match actions::intended_point(env) {
        Some(point) => Some(point),
        None => {
            env.cx.cannot_apply(Some(ActionKind::Default));
            None
        }
    }
}

fn plan_hops_along_dir<W: PhysicsWorld>(env: &mut PlanEnv<W>, intended_dir: Vector3<f32>) {
    // Steer around full-height obstacles; the correction gets stronger the
    // slower we go (a fast agent cannot turn much anyway)
    let state = env.cx.sim_state.clone();
    let speed_frac = math::bounded_fraction(state.speed_2d(), env.world.dash_speed());
    let correction = 1.0 - 0.7 * speed_frac;
    let world = env.world;
    let dir = {
        let cache = env.cx.probe_cache();
        match cache.try_avoid_obstacles(
            world,
            &state,
            intended_dir,
            correction,
            ProbeTier::FullHeight,
        ) {
            // A dead end here is for the rollback machinery to judge
            ObstacleAvoidanceResult::NoObstacles | ObstacleAvoidanceResult::KeptAsIs => {
                intended_dir
            }
            ObstacleAvoidanceResult::Corrected(corrected) => corrected,
        }
    };

    let input = &mut env.cx.record.input;
    input.clear();
    input.is_ucmd_set = true;
    input.set_intended_look_dir(dir, true);
    input.forward_move = 1;
    input.can_override_look_vec = false;

    let grounded = state.has_ground();
    if grounded {
        if state.speed_2d() >= 0.9 * env.world.run_speed() {
            // Keep hopping to preserve speed
            input.up_move = 1;
        } else if state.speed_2d() < 0.5 * env.world.run_speed() {
            // A dash rebuilds speed fastest
            input.special = true;
        }
    } else {
        // Model air control the integrator undersells
        env.cx.cheating_accelerate(env.world, env.bot, speed_frac);
    }
}

pub(super) fn check_bunny<W: PhysicsWorld>(
    _kind: ActionKind,
    env: &mut PlanEnv<W>,
    frame_index: usize,
) {
    let target = match env.bot.nav_target {
        Some(target) => target,
        None => return,
    };
    let new_state = &env.cx.sim_state;
    let grounded = new_state.has_ground();

    // Landing hard loses most 2D speed; a bunny sequence that does that
    // was a bad idea from the start
    let prev_speed_2d = env.cx.frames[frame_index].entity_state.speed_2d();
    let run_speed = env.world.run_speed();
    if grounded && prev_speed_2d > 1.3 * run_speed {
        if env.cx.sim_state.speed_2d() < 0.6 * prev_speed_2d {
            env.cx.set_pending_rollback();
            return;
        }
    }

    let at_start = env.cx.sequence.travel_time_at_start;
    let now = env.cx.travel_time_to(env.world, target.area);
    let improved = match (at_start, now) {
        (0, _) => false,
        (_, None) => {
            // The spot we bunnied into cannot reach the target at all
            env.cx.set_pending_rollback();
            return;
        }
        (start, Some(now)) => now < start,
    };

    let top = env.cx.top_of_stack_index();
    if grounded && improved {
        env.bot.actions_state.bunny.last_improvement_frame = top;
        if top - env.cx.sequence.start_frame >= FRAMES_TO_COMPLETE {
            env.cx.set_completed();
            return;
        }
    }

    let last_progress = env
        .bot
        .actions_state
        .bunny
        .last_improvement_frame
        .max(env.cx.sequence.start_frame);
    if top - last_progress > MAX_FRAMES_WITHOUT_IMPROVEMENT {
        env.cx.set_pending_rollback();
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::module::{Bot, NavTarget};
    use crate::params::PlanningParams;
    use crate::plan::PredictionContext;
    use crate::test_support::{grounded_area, BoxWorld};
    use crate::world::RouteResult;

    #[test]
    fn test_shortcut_picks_the_better_routed_cluster_area() {
        let mut world = BoxWorld::flat();
        // Two areas share floor cluster 1; routing from the second is much
        // cheaper, so it is worth cutting across to it
        world.areas[1] = grounded_area(
            Vector3::new(-1024.0, -1024.0, 0.0),
            Vector3::new(0.0, 1024.0, 128.0),
        );
        world.areas[1].floor_cluster = 1;
        let mut east_half = grounded_area(
            Vector3::new(0.0, -1024.0, 0.0),
            Vector3::new(1024.0, 1024.0, 128.0),
        );
        east_half.floor_cluster = 1;
        world.areas.push(east_half);
        world.areas.push(grounded_area(
            Vector3::new(2000.0, 2000.0, 0.0),
            Vector3::new(2100.0, 2100.0, 128.0),
        ));
        world.routes.push(((1, 3), RouteResult { reach_num: 0, travel_time: 500 }));
        world.routes.push(((2, 3), RouteResult { reach_num: 0, travel_time: 300 }));

        let mut bot = Bot::new(PlanningParams::default(), 5);
        bot.nav_target = Some(NavTarget {
            area: 3,
            origin: Vector3::new(2050.0, 2050.0, 25.0),
            radius: 32.0,
        });
        let mut cx = PredictionContext::new();
        cx.sim_state = world.spawn_grounded(Vector3::new(-500.0, 0.0, 25.0));
        let mut env = PlanEnv { world: &world, bot: &mut bot, cx: &mut cx };

        let dir = shortcut_area_dir(&mut env).expect("a shortcut dir");
        assert!(dir.x > 0.99, "dir = {:?}", dir);
    }

    #[test]
    fn test_shortcut_declines_outside_floor_clusters() {
        let world = BoxWorld::flat();
        let mut bot = Bot::new(PlanningParams::default(), 5);
        bot.nav_target = Some(NavTarget {
            area: 1,
            origin: Vector3::new(700.0, 0.0, 25.0),
            radius: 32.0,
        });
        let mut cx = PredictionContext::new();
        cx.sim_state = world.spawn_grounded(Vector3::new(0.0, 0.0, 25.0));
        let mut env = PlanEnv { world: &world, bot: &mut bot, cx: &mut cx };

        plan_to_best_shortcut_area(&mut env);
        assert!(env.cx.cannot_apply_action);
    }
}
