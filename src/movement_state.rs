//! Auxiliary movement sub-states carried across frames (and across
//! predicted frames, so each is compact and trivially copyable). Each
//! sub-state is a small state machine activated by an action or an external
//! event and deactivated by its own condition.

use cgmath::Vector3;
use rand::Rng;

use crate::input::PackedVec;
use crate::math;
use crate::physics::EntityState;

/// Bits identifying the active sub-states, used to validate that cached
/// plans were built for a matching state combination.
pub mod state_bits {
    pub const JUMPPAD: u8 = 1 << 0;
    pub const WEAPON_JUMP: u8 = 1 << 1;
    pub const PENDING_LOOK_AT_POINT: u8 = 1 << 2;
    pub const CAMPING_SPOT: u8 = 1 << 3;
    pub const FLY_UNTIL_LANDING: u8 = 1 << 4;
}

/// A spot the agent should hold, strafing around it and optionally keeping
/// a given point in view.
#[derive(Clone, Copy, Debug, Default)]
pub struct CampingSpotState {
    origin: PackedVec,
    look_at_point: Option<PackedVec>,
    pub radius: f32,
    /// In [0, 1]. Higher alertness means jerkier, more frequent direction
    /// changes.
    pub alertness: f32,
    forward_move: i8,
    right_move: i8,
    move_dirs_time_left: u16,
    look_at_point_time_left: u16,
    is_active: bool,
}

impl CampingSpotState {
    pub fn activate(&mut self, origin: Vector3<f32>, radius: f32, alertness: f32) {
        self.origin = origin.into();
        self.radius = radius;
        self.alertness = alertness.clamp(0.0, 1.0);
        self.look_at_point = None;
        self.move_dirs_time_left = 0;
        self.look_at_point_time_left = 0;
        self.is_active = true;
    }

    pub fn deactivate(&mut self) {
        self.is_active = false;
    }

    pub fn is_active(&self) -> bool {
        self.is_active
    }

    pub fn origin(&self) -> Vector3<f32> {
        self.origin.into()
    }

    pub fn set_look_at_point(&mut self, point: Vector3<f32>) {
        self.look_at_point = Some(point.into());
    }

    pub fn look_at_point(&self) -> Option<Vector3<f32>> {
        self.look_at_point.map(Into::into)
    }

    pub fn are_key_move_dirs_valid(&self) -> bool {
        self.move_dirs_time_left > 0
    }

    pub fn key_move_dirs(&self) -> (i8, i8) {
        (self.forward_move, self.right_move)
    }

    /// Pick new random strafe keys. The timeout shrinks with alertness.
    pub fn roll_key_move_dirs<R: Rng>(&mut self, rng: &mut R) -> (i8, i8) {
        self.forward_move = rng.gen_range(-1..=1);
        self.right_move = rng.gen_range(-1..=1);
        let base = 400.0 + 300.0 * (1.0 - self.alertness);
        self.move_dirs_time_left = (base * rng.gen_range(0.75..1.25)) as u16;
        (self.forward_move, self.right_move)
    }

    pub fn needs_new_look_at_point(&self) -> bool {
        self.look_at_point_time_left == 0
    }

    pub fn refresh_look_at_point_timer<R: Rng>(&mut self, rng: &mut R) {
        let base = 800.0 + 800.0 * (1.0 - self.alertness);
        self.look_at_point_time_left = (base * rng.gen_range(0.75..1.25)) as u16;
    }

    fn frame(&mut self, millis: u32) {
        let millis = millis.min(u16::MAX as u32) as u16;
        self.move_dirs_time_left = self.move_dirs_time_left.saturating_sub(millis);
        self.look_at_point_time_left = self.look_at_point_time_left.saturating_sub(millis);
    }

    fn try_deactivate(&mut self, state: &EntityState) {
        if !self.is_active {
            return;
        }
        // Give up on the spot once knocked well out of its radius
        if math::distance(state.origin, self.origin.into()) > self.radius + 32.0 {
            self.is_active = false;
        }
    }
}

/// Becomes active when a jump pad is touched and stays active for the
/// whole flight.
#[derive(Clone, Copy, Debug, Default)]
pub struct JumppadState {
    target: PackedVec,
    pub has_touched_jumppad: bool,
    /// The flight handling has started (input is locked until landing).
    pub has_entered_jumppad: bool,
}

impl JumppadState {
    pub fn activate(&mut self, target: Vector3<f32>) {
        self.target = target.into();
        self.has_touched_jumppad = true;
        self.has_entered_jumppad = false;
    }

    pub fn deactivate(&mut self) {
        self.has_touched_jumppad = false;
        self.has_entered_jumppad = false;
    }

    pub fn is_active(&self) -> bool {
        self.has_touched_jumppad || self.has_entered_jumppad
    }

    pub fn target(&self) -> Vector3<f32> {
        self.target.into()
    }

    fn try_deactivate(&mut self, state: &EntityState) {
        if self.has_entered_jumppad && state.has_ground() {
            self.deactivate();
        }
    }
}

/// A scheduled weapon jump: aim down, fire, then correct the velocity.
#[derive(Clone, Copy, Debug, Default)]
pub struct WeaponJumpState {
    jump_target: PackedVec,
    fire_target: PackedVec,
    origin_at_start: PackedVec,
    pub weapon: u8,
    pub has_pending_weapon_jump: bool,
    pub has_triggered_weapon_jump: bool,
    pub has_corrected_weapon_jump: bool,
}

impl WeaponJumpState {
    pub fn activate(
        &mut self,
        origin: Vector3<f32>,
        jump_target: Vector3<f32>,
        fire_target: Vector3<f32>,
        weapon: u8,
    ) {
        self.origin_at_start = origin.into();
        self.jump_target = jump_target.into();
        self.fire_target = fire_target.into();
        self.weapon = weapon;
        self.has_pending_weapon_jump = true;
        self.has_triggered_weapon_jump = false;
        self.has_corrected_weapon_jump = false;
    }

    pub fn deactivate(&mut self) {
        self.has_pending_weapon_jump = false;
        self.has_triggered_weapon_jump = false;
        self.has_corrected_weapon_jump = false;
    }

    pub fn is_active(&self) -> bool {
        self.has_pending_weapon_jump
            || self.has_triggered_weapon_jump
            || self.has_corrected_weapon_jump
    }

    pub fn jump_target(&self) -> Vector3<f32> {
        self.jump_target.into()
    }

    pub fn fire_target(&self) -> Vector3<f32> {
        self.fire_target.into()
    }

    pub fn origin_at_start(&self) -> Vector3<f32> {
        self.origin_at_start.into()
    }

    fn try_deactivate(&mut self, state: &EntityState) {
        // The correction is the last stage; once done and landed, the jump
        // is over.
        if self.has_corrected_weapon_jump && state.has_ground() {
            self.deactivate();
        }
    }
}

/// A timed request to look at a given point, overriding the per-action
/// look direction until it expires.
#[derive(Clone, Copy, Debug, Default)]
pub struct PendingLookAtPointState {
    origin: PackedVec,
    pub turn_speed_multiplier: f32,
    time_left: u16,
}

impl PendingLookAtPointState {
    pub fn activate(&mut self, point: Vector3<f32>, turn_speed_multiplier: f32, timeout: u16) {
        self.origin = point.into();
        self.turn_speed_multiplier = turn_speed_multiplier;
        self.time_left = timeout;
    }

    pub fn deactivate(&mut self) {
        self.time_left = 0;
    }

    pub fn is_active(&self) -> bool {
        self.time_left > 0
    }

    pub fn origin(&self) -> Vector3<f32> {
        self.origin.into()
    }

    fn frame(&mut self, millis: u32) {
        self.time_left = self.time_left.saturating_sub(millis.min(u16::MAX as u32) as u16);
    }
}

/// Active while airborne after a jump pad or weapon jump: keep looking at
/// the target until close enough, then switch to landing.
#[derive(Clone, Copy, Debug, Default)]
pub struct FlyUntilLandingState {
    target: PackedVec,
    /// When zero, landing starts once below the target height instead of
    /// within a distance.
    landing_distance_threshold: f32,
    is_triggered: bool,
    is_landing: bool,
}

impl FlyUntilLandingState {
    pub fn activate_with_distance_threshold(&mut self, target: Vector3<f32>, threshold: f32) {
        self.target = target.into();
        self.landing_distance_threshold = threshold;
        self.is_triggered = true;
        self.is_landing = false;
    }

    pub fn activate_with_z_threshold(&mut self, target: Vector3<f32>) {
        self.target = target.into();
        self.landing_distance_threshold = 0.0;
        self.is_triggered = true;
        self.is_landing = false;
    }

    pub fn deactivate(&mut self) {
        self.is_triggered = false;
        self.is_landing = false;
    }

    pub fn is_active(&self) -> bool {
        self.is_triggered
    }

    pub fn target(&self) -> Vector3<f32> {
        self.target.into()
    }

    pub fn is_landing(&self) -> bool {
        self.is_landing
    }

    /// Once landing has started it never reverts within the same flight.
    pub fn check_for_landing(&mut self, state: &EntityState) -> bool {
        if self.is_landing {
            return true;
        }
        if !self.is_triggered {
            return false;
        }
        let target: Vector3<f32> = self.target.into();
        let start_landing = if self.landing_distance_threshold > 0.0 {
            math::distance(state.origin, target) < self.landing_distance_threshold
        } else {
            state.origin.z < target.z
        };
        if start_landing {
            self.is_landing = true;
        }
        start_landing
    }

    fn try_deactivate(&mut self, state: &EntityState) {
        if self.is_landing && state.has_ground() {
            self.deactivate();
        }
    }
}

/// Currently held movement keys with a validity timeout, shared by actions
/// that dodge with keyboard input rather than view alignment.
#[derive(Clone, Copy, Debug, Default)]
pub struct KeyMoveDirsState {
    pub forward_move: i8,
    pub right_move: i8,
    time_left: u16,
}

impl KeyMoveDirsState {
    pub fn activate(&mut self, forward: i8, right: i8, timeout: u16) {
        self.forward_move = forward;
        self.right_move = right;
        self.time_left = timeout;
    }

    pub fn deactivate(&mut self) {
        self.time_left = 0;
    }

    pub fn is_active(&self) -> bool {
        self.time_left > 0
    }

    fn frame(&mut self, millis: u32) {
        self.time_left = self.time_left.saturating_sub(millis.min(u16::MAX as u32) as u16);
    }
}

/// All movement sub-states together. Copied for every predicted frame.
#[derive(Clone, Copy, Debug, Default)]
pub struct MovementState {
    pub camping_spot: CampingSpotState,
    pub jumppad: JumppadState,
    pub weapon_jump: WeaponJumpState,
    pub pending_look_at_point: PendingLookAtPointState,
    pub fly_until_landing: FlyUntilLandingState,
    pub key_move_dirs: KeyMoveDirsState,
}

impl MovementState {
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Advance all timers by the frame duration.
    pub fn frame(&mut self, millis: u32) {
        self.camping_spot.frame(millis);
        self.pending_look_at_point.frame(millis);
        self.key_move_dirs.frame(millis);
    }

    /// Let every sub-state check its own deactivation condition against the
    /// (real or simulated) physical state.
    pub fn try_deactivate(&mut self, state: &EntityState) {
        self.camping_spot.try_deactivate(state);
        self.jumppad.try_deactivate(state);
        self.weapon_jump.try_deactivate(state);
        self.fly_until_landing.try_deactivate(state);
    }

    /// The key-move-dirs state is excluded: it is a steering hint, not a
    /// plan-relevant mode.
    pub fn contained_states_mask(&self) -> u8 {
        let mut mask = 0;
        if self.jumppad.is_active() {
            mask |= state_bits::JUMPPAD;
        }
        if self.weapon_jump.is_active() {
            mask |= state_bits::WEAPON_JUMP;
        }
        if self.pending_look_at_point.is_active() {
            mask |= state_bits::PENDING_LOOK_AT_POINT;
        }
        if self.camping_spot.is_active() {
            mask |= state_bits::CAMPING_SPOT;
        }
        if self.fly_until_landing.is_active() {
            mask |= state_bits::FLY_UNTIL_LANDING;
        }
        mask
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::physics::Ground;

    #[test]
    fn test_pending_look_at_point_expires() {
        let mut state = PendingLookAtPointState::default();
        state.activate(Vector3::new(10.0, 0.0, 0.0), 1.5, 300);
        assert!(state.is_active());
        state.frame(200);
        assert!(state.is_active());
        state.frame(200);
        assert!(!state.is_active());
    }

    #[test]
    fn test_fly_until_landing_z_threshold() {
        let mut fly = FlyUntilLandingState::default();
        fly.activate_with_z_threshold(Vector3::new(0.0, 0.0, 100.0));

        let mut entity = EntityState::default();
        entity.ground = Ground::None;
        entity.origin.z = 300.0;
        assert!(!fly.check_for_landing(&entity));

        entity.origin.z = 90.0;
        assert!(fly.check_for_landing(&entity));
        // Landing never reverts even if carried back above the threshold
        entity.origin.z = 300.0;
        assert!(fly.check_for_landing(&entity));

        entity.ground = Ground::World;
        fly.try_deactivate(&entity);
        assert!(!fly.is_active());
    }

    #[test]
    fn test_contained_states_mask() {
        let mut movement = MovementState::default();
        assert_eq!(movement.contained_states_mask(), 0);

        movement.jumppad.activate(Vector3::new(0.0, 0.0, 0.0));
        movement.camping_spot.activate(Vector3::new(0.0, 0.0, 0.0), 64.0, 0.5);
        assert_eq!(
            movement.contained_states_mask(),
            state_bits::JUMPPAD | state_bits::CAMPING_SPOT
        );

        // Key move dirs must not affect the mask
        movement.key_move_dirs.activate(1, 0, 500);
        assert_eq!(
            movement.contained_states_mask(),
            state_bits::JUMPPAD | state_bits::CAMPING_SPOT
        );
    }

    #[test]
    fn test_camping_spot_deactivates_when_knocked_away() {
        let mut movement = MovementState::default();
        movement
            .camping_spot
            .activate(Vector3::new(0.0, 0.0, 0.0), 48.0, 0.0);

        let mut entity = EntityState::default();
        entity.origin = Vector3::new(30.0, 0.0, 0.0);
        movement.try_deactivate(&entity);
        assert!(movement.camping_spot.is_active());

        entity.origin = Vector3::new(120.0, 0.0, 0.0);
        movement.try_deactivate(&entity);
        assert!(!movement.camping_spot.is_active());
    }
}
