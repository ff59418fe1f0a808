//! Scripted movement fallbacks: small hand-written recipes used when the
//! navigation graph offers no usable route from the current position
//! (after a knockback, on stairs or ramps the router handles poorly, or
//! when a jumpable spot has been picked). A fallback synthesizes input
//! directly, without forward simulation, until it completes or turns
//! invalid.

use cgmath::{InnerSpace, Vector3};
use log::debug;

use crate::input::Input;
use crate::math;
use crate::physics::EntityState;
use crate::world::{AreaNum, CollisionWorld, NavWorld};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FallbackStatus {
    /// Keep following the recipe.
    Pending,
    /// The recipe reached its goal; ordinary planning should resume.
    Completed,
    /// The recipe can no longer succeed and must be dropped.
    Invalid,
}

/// An active movement fallback. Timeouts are absolute level time in millis.
#[derive(Clone, Debug)]
pub enum Fallback {
    WalkToPoint {
        target: Vector3<f32>,
        reach_radius: f32,
        /// Allow hopping over small obstacles on the way.
        allow_jumping: bool,
        timeout_at: i64,
    },
    JumpToSpot {
        start: Vector3<f32>,
        target: Vector3<f32>,
        /// Keep running until at least this 2D speed before jumping.
        run_speed: f32,
        has_jumped: bool,
        timeout_at: i64,
    },
    JumpOverBarrier {
        /// A point atop the barrier to aim the jump at.
        top: Vector3<f32>,
        /// Where to continue once over it.
        target: Vector3<f32>,
        has_reached_top: bool,
        timeout_at: i64,
    },
    FallDown {
        /// The landing point below the ledge.
        target: Vector3<f32>,
        reach_radius: f32,
        timeout_at: i64,
    },
    UseTrigger {
        /// Where the trigger volume is.
        trigger_origin: Vector3<f32>,
        /// Entering this area means the trigger has fired.
        exit_area: AreaNum,
        timeout_at: i64,
    },
    ExitRamp {
        exit_point: Vector3<f32>,
        exit_area: AreaNum,
        timeout_at: i64,
    },
    ExitStairs {
        stairs_cluster: u32,
        exit_point: Vector3<f32>,
        exit_area: AreaNum,
        timeout_at: i64,
    },
}

impl Fallback {
    fn timeout_at(&self) -> i64 {
        match *self {
            Fallback::WalkToPoint { timeout_at, .. }
            | Fallback::JumpToSpot { timeout_at, .. }
            | Fallback::JumpOverBarrier { timeout_at, .. }
            | Fallback::FallDown { timeout_at, .. }
            | Fallback::UseTrigger { timeout_at, .. }
            | Fallback::ExitRamp { timeout_at, .. }
            | Fallback::ExitStairs { timeout_at, .. } => timeout_at,
        }
    }

    /// Check completion/invalidation against a physical state. Works both
    /// for the real state each frame and for simulated states, so the
    /// planner can predict when a fallback will end.
    pub fn check_status<W: CollisionWorld + NavWorld>(
        &mut self,
        world: &W,
        state: &EntityState,
        level_time: i64,
    ) -> FallbackStatus {
        if level_time >= self.timeout_at() {
            debug!("fallback timed out: {:?}", self);
            return FallbackStatus::Invalid;
        }
        match *self {
            Fallback::WalkToPoint {
                target,
                reach_radius,
                ..
            } => {
                if math::distance_2d(state.origin, target) < reach_radius
                    && (state.origin.z - target.z).abs() < 32.0
                {
                    FallbackStatus::Completed
                } else {
                    FallbackStatus::Pending
                }
            }
            Fallback::JumpToSpot {
                target, has_jumped, ..
            } => {
                if has_jumped && state.has_ground() {
                    if math::distance_2d(state.origin, target) < 48.0 {
                        FallbackStatus::Completed
                    } else if state.origin.z < target.z - 64.0 {
                        // Landed short and below the spot
                        FallbackStatus::Invalid
                    } else {
                        FallbackStatus::Pending
                    }
                } else {
                    FallbackStatus::Pending
                }
            }
            Fallback::JumpOverBarrier {
                top,
                target,
                has_reached_top,
                ..
            } => {
                if has_reached_top {
                    if state.has_ground() && math::distance_2d(state.origin, target) < 40.0 {
                        FallbackStatus::Completed
                    } else {
                        FallbackStatus::Pending
                    }
                } else if state.origin.z < top.z - 128.0 {
                    FallbackStatus::Invalid
                } else {
                    FallbackStatus::Pending
                }
            }
            Fallback::FallDown {
                target,
                reach_radius,
                ..
            } => {
                if state.has_ground()
                    && (state.origin.z - target.z).abs() < 32.0
                    && math::distance_2d(state.origin, target) < reach_radius
                {
                    FallbackStatus::Completed
                } else if state.has_ground() && state.origin.z < target.z - 64.0 {
                    FallbackStatus::Invalid
                } else {
                    FallbackStatus::Pending
                }
            }
            Fallback::UseTrigger { exit_area, .. }
            | Fallback::ExitRamp { exit_area, .. } => {
                if state.curr_area == exit_area || state.grounded_area == exit_area {
                    FallbackStatus::Completed
                } else {
                    FallbackStatus::Pending
                }
            }
            Fallback::ExitStairs {
                stairs_cluster,
                exit_area,
                ..
            } => {
                if state.curr_area == exit_area || state.grounded_area == exit_area {
                    return FallbackStatus::Completed;
                }
                // Also done once no longer inside the stairs cluster
                if state.grounded_area != 0
                    && world.area(state.grounded_area).stairs_cluster != stairs_cluster
                {
                    FallbackStatus::Completed
                } else {
                    FallbackStatus::Pending
                }
            }
        }
    }

    /// Fill the input for one frame of following the recipe.
    pub fn setup_input(&mut self, state: &EntityState, input: &mut Input) {
        match self {
            Fallback::WalkToPoint {
                target,
                allow_jumping,
                ..
            } => {
                let jump = *allow_jumping;
                steer_to_point(state, *target, input);
                if jump && state.has_ground() {
                    // Hop over minor clutter when barely moving while keys
                    // are held
                    if input.forward_move != 0 && state.speed_2d() < 30.0 {
                        input.up_move = 1;
                    }
                }
            }
            Fallback::JumpToSpot {
                start,
                target,
                run_speed,
                has_jumped,
                ..
            } => {
                steer_to_point(state, *target, input);
                if !*has_jumped && state.has_ground() {
                    let past_start = math::distance_2d(state.origin, *start) > 24.0;
                    if state.speed_2d() >= *run_speed || past_start {
                        input.up_move = 1;
                        *has_jumped = true;
                    }
                } else {
                    // Keep the dir in the air, don't fight the trajectory
                    input.clear_movement_directions();
                    input.forward_move = 1;
                }
            }
            Fallback::JumpOverBarrier {
                top,
                target,
                has_reached_top,
                ..
            } => {
                if !*has_reached_top {
                    if state.origin.z + state.mins.z >= top.z - 4.0 {
                        *has_reached_top = true;
                    }
                }
                let aim = if *has_reached_top { *target } else { *top };
                steer_to_point(state, aim, input);
                if !*has_reached_top && state.has_ground() {
                    if math::distance_2d(state.origin, *top) < 48.0 {
                        input.up_move = 1;
                    }
                }
            }
            Fallback::FallDown { target, .. } => {
                // Aim past the ledge at the landing point projected to the
                // current height so the walk-off is straight
                let mut aim = *target;
                aim.z = state.origin.z;
                steer_to_point(state, aim, input);
                if !state.has_ground() {
                    input.clear_movement_directions();
                }
            }
            Fallback::UseTrigger { trigger_origin, .. } => {
                steer_to_point(state, *trigger_origin, input);
                input.walk = true;
            }
            Fallback::ExitRamp { exit_point, .. }
            | Fallback::ExitStairs { exit_point, .. } => {
                steer_to_point(state, *exit_point, input);
                // Sliding off a ramp edge is the common failure, move
                // deliberately
                input.walk = true;
            }
        }
    }
}

/// Common steering: look at the point and press forward once sufficiently
/// aligned. Leaves the look vector authoritative so aiming code does not
/// yank it away mid-recipe.
fn steer_to_point(state: &EntityState, target: Vector3<f32>, input: &mut Input) {
    input.clear();
    input.is_ucmd_set = true;
    input.can_override_look_vec = false;
    input.can_override_ucmd = false;

    let to_target = target - state.origin;
    let look_dir = if to_target.z.abs() < 24.0 {
        math::try_normalize_2d(to_target)
    } else {
        math::try_normalize(to_target)
    };
    let look_dir = match look_dir {
        Some(dir) => dir,
        None => return,
    };
    input.set_intended_look_dir(look_dir, true);

    let forward_2d = math::try_normalize_2d(state.forward_dir());
    let target_2d = math::try_normalize_2d(to_target);
    if let (Some(forward), Some(target_dir)) = (forward_2d, target_2d) {
        if forward.dot(target_dir) > 0.9 {
            input.forward_move = 1;
        }
    } else {
        // Right above/below the point, any keys would orbit it
        input.forward_move = 0;
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::test_support::BoxWorld;
    use crate::world::PhysicsWorld;

    #[test]
    fn test_walk_to_point_completes() {
        let world = BoxWorld::flat();
        let mut state = world.spawn_grounded(Vector3::new(0.0, 0.0, 25.0));
        let mut fallback = Fallback::WalkToPoint {
            target: Vector3::new(200.0, 100.0, 25.0),
            reach_radius: 32.0,
            allow_jumping: false,
            timeout_at: 10_000,
        };

        let mut level_time = 0i64;
        let mut completed = false;
        for _ in 0..200 {
            match fallback.check_status(&world, &state, level_time) {
                FallbackStatus::Completed => {
                    completed = true;
                    break;
                }
                FallbackStatus::Invalid => panic!("fallback turned invalid"),
                FallbackStatus::Pending => {}
            }
            let mut input = Input::default();
            fallback.setup_input(&state, &mut input);
            state = world.advance(&state, &input, 48).state;
            level_time += 48;
        }
        assert!(completed, "did not reach the target, at {:?}", state.origin);
    }

    #[test]
    fn test_walk_to_point_times_out() {
        let world = BoxWorld::flat();
        let state = world.spawn_grounded(Vector3::new(0.0, 0.0, 25.0));
        let mut fallback = Fallback::WalkToPoint {
            target: Vector3::new(900.0, 0.0, 25.0),
            reach_radius: 32.0,
            allow_jumping: false,
            timeout_at: 1_000,
        };
        assert_eq!(
            fallback.check_status(&world, &state, 1_500),
            FallbackStatus::Invalid
        );
    }

    #[test]
    fn test_jump_to_spot_jumps_once_moving() {
        let world = BoxWorld::flat();
        let mut state = world.spawn_grounded(Vector3::new(0.0, 0.0, 25.0));
        let mut fallback = Fallback::JumpToSpot {
            start: state.origin,
            target: Vector3::new(300.0, 0.0, 25.0),
            run_speed: 250.0,
            has_jumped: false,
            timeout_at: 10_000,
        };

        let mut jumped = false;
        for _ in 0..40 {
            let mut input = Input::default();
            fallback.setup_input(&state, &mut input);
            let result = world.advance(&state, &input, 48);
            if result.events.has_jumped {
                jumped = true;
                break;
            }
            state = result.state;
        }
        assert!(jumped);
        assert!(matches!(fallback, Fallback::JumpToSpot { has_jumped: true, .. }));
    }

    #[test]
    fn test_exit_stairs_completes_outside_cluster() {
        let mut world = BoxWorld::flat();
        world.areas[1].stairs_cluster = 3;
        world.areas.push(crate::test_support::grounded_area(
            Vector3::new(1024.0, -1024.0, 0.0),
            Vector3::new(2048.0, 1024.0, 128.0),
        ));

        let state = world.spawn_grounded(Vector3::new(0.0, 0.0, 25.0));
        let mut fallback = Fallback::ExitStairs {
            stairs_cluster: 3,
            exit_point: Vector3::new(1100.0, 0.0, 25.0),
            exit_area: 2,
            timeout_at: 10_000,
        };
        assert_eq!(
            fallback.check_status(&world, &state, 0),
            FallbackStatus::Pending
        );

        let mut outside = state.clone();
        outside.curr_area = 2;
        outside.grounded_area = 2;
        assert_eq!(
            fallback.check_status(&world, &outside, 0),
            FallbackStatus::Completed
        );
    }
}
