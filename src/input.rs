//! The synthesized control input and the per-step action record.

use cgmath::{InnerSpace, Vector3, Zero};

use crate::math;

/// Which input rotations (moving with a look direction rotated relative to
/// the travel direction) the active action allows.
pub mod rotation {
    pub const NONE: u8 = 0;
    pub const BACK: u8 = 1 << 0;
    pub const SIDES: u8 = 1 << 1;
    pub const ALL: u8 = BACK | SIDES;
}

/// A fixed-point packed vector (1/16 of a unit per step). Used where vectors
/// are copied for every simulated frame and full precision is not needed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PackedVec {
    coords: [i16; 3],
}

impl From<Vector3<f32>> for PackedVec {
    fn from(v: Vector3<f32>) -> Self {
        let pack = |x: f32| (x * 16.0).clamp(i16::MIN as f32, i16::MAX as f32) as i16;
        Self {
            coords: [pack(v.x), pack(v.y), pack(v.z)],
        }
    }
}

impl From<PackedVec> for Vector3<f32> {
    fn from(v: PackedVec) -> Self {
        const SCALE: f32 = 1.0 / 16.0;
        Vector3::new(
            v.coords[0] as f32 * SCALE,
            v.coords[1] as f32 * SCALE,
            v.coords[2] as f32 * SCALE,
        )
    }
}

/// A control input for one frame: where to look, how to move, what buttons
/// to hold, and what the input application code is allowed to override.
#[derive(Clone, Debug)]
pub struct Input {
    intended_look_dir: Vector3<f32>,
    /// Explicit view angles (pitch, yaw). When set, they take priority over
    /// the intended look direction.
    already_computed_angles: Option<(f32, f32)>,
    pub forward_move: i8,
    pub right_move: i8,
    pub up_move: i8,
    pub attack: bool,
    pub special: bool,
    pub walk: bool,
    pub allowed_rotation_mask: u8,
    /// Aiming code may replace the movement keys.
    pub can_override_ucmd: bool,
    /// Aiming code may replace the whole look vector.
    pub can_override_look_vec: bool,
    /// Aiming code may replace the pitch only.
    pub can_override_pitch: bool,
    pub is_ucmd_set: bool,
    pub is_look_dir_set: bool,
    pub turn_speed_multiplier: f32,
}

impl Default for Input {
    fn default() -> Self {
        Self {
            intended_look_dir: Vector3::zero(),
            already_computed_angles: None,
            forward_move: 0,
            right_move: 0,
            up_move: 0,
            attack: false,
            special: false,
            walk: false,
            allowed_rotation_mask: rotation::ALL,
            can_override_ucmd: false,
            can_override_look_vec: false,
            can_override_pitch: true,
            is_ucmd_set: false,
            is_look_dir_set: false,
            turn_speed_multiplier: 1.0,
        }
    }
}

impl Input {
    pub fn clear(&mut self) {
        *self = Self::default();
    }

    pub fn clear_movement_directions(&mut self) {
        self.forward_move = 0;
        self.right_move = 0;
        self.up_move = 0;
    }

    /// Set the intended look direction. `normalized` promises the vector is
    /// already unit length so renormalization can be skipped.
    pub fn set_intended_look_dir(&mut self, dir: Vector3<f32>, normalized: bool) {
        self.intended_look_dir = if normalized {
            dir
        } else {
            let len2 = dir.magnitude2();
            if len2 > 1e-8 {
                dir / len2.sqrt()
            } else {
                dir
            }
        };
        self.is_look_dir_set = true;
    }

    pub fn intended_look_dir(&self) -> Vector3<f32> {
        debug_assert!(self.is_look_dir_set);
        self.intended_look_dir
    }

    pub fn set_already_computed_angles(&mut self, pitch: f32, yaw: f32) {
        self.already_computed_angles = Some((pitch, yaw));
    }

    pub fn already_computed_angles(&self) -> Option<(f32, f32)> {
        self.already_computed_angles
    }

    pub fn has_already_computed_angles(&self) -> bool {
        self.already_computed_angles.is_some()
    }

    /// The view angles after applying this input to the given (pitch, yaw)
    /// for one frame, turning by at most `max_degrees`. Input application
    /// code and simulating integrators should both go through this so
    /// predicted and actual turns agree.
    pub fn turned_angles(&self, pitch: f32, yaw: f32, max_degrees: f32) -> (f32, f32) {
        if let Some(angles) = self.already_computed_angles {
            return angles;
        }
        if !self.is_look_dir_set {
            return (pitch, yaw);
        }
        let (target_pitch, target_yaw) = math::dir_to_angles(self.intended_look_dir);
        (
            math::turn_toward(pitch, target_pitch, max_degrees),
            math::turn_toward(yaw, target_yaw, max_degrees),
        )
    }
}

/// The per-step output contract of a movement action: the synthesized input
/// plus optional "cheating" state overrides applied before the physics step.
#[derive(Clone, Debug, Default)]
pub struct ActionRecord {
    pub input: Input,
    modified_velocity: Option<PackedVec>,
    /// A pending weapon switch request (weapon index).
    pub pending_weapon: Option<u8>,
}

impl ActionRecord {
    pub fn clear(&mut self) {
        self.input.clear();
        self.modified_velocity = None;
        self.pending_weapon = None;
    }

    pub fn set_modified_velocity(&mut self, velocity: Vector3<f32>) {
        self.modified_velocity = Some(velocity.into());
    }

    pub fn clear_modified_velocity(&mut self) {
        self.modified_velocity = None;
    }

    pub fn modified_velocity(&self) -> Option<Vector3<f32>> {
        self.modified_velocity.map(Into::into)
    }

    pub fn has_modified_velocity(&self) -> bool {
        self.modified_velocity.is_some()
    }
}
