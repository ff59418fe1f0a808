//! Small vector and angle helpers shared by the planning code.

use cgmath::{InnerSpace, Vector3};

/// Wrap the angle value in [-180, 180)
pub(crate) fn wrap_degrees(x: f32) -> f32 {
    x - (x + 180.0).div_euclid(360.0) * 360.0
}

/// Convert view angles (pitch, yaw in degrees) to a forward direction.
pub(crate) fn forward_dir(pitch: f32, yaw: f32) -> Vector3<f32> {
    let (sp, cp) = pitch.to_radians().sin_cos();
    let (sy, cy) = yaw.to_radians().sin_cos();
    Vector3::new(cp * cy, cp * sy, -sp)
}

/// The right direction for given view angles, ignoring roll.
pub(crate) fn right_dir(yaw: f32) -> Vector3<f32> {
    let (sy, cy) = yaw.to_radians().sin_cos();
    Vector3::new(sy, -cy, 0.0)
}

/// Yaw and pitch (degrees) that would make the agent look along `dir`.
pub(crate) fn dir_to_angles(dir: Vector3<f32>) -> (f32, f32) {
    let yaw = dir.y.atan2(dir.x).to_degrees();
    let dist_2d = (dir.x * dir.x + dir.y * dir.y).sqrt();
    let pitch = -dir.z.atan2(dist_2d).to_degrees();
    (pitch, yaw)
}

/// Rotate `from` toward `to` by at most `max_step` degrees (both in degrees).
pub(crate) fn turn_toward(from: f32, to: f32, max_step: f32) -> f32 {
    let delta = wrap_degrees(to - from);
    if delta.abs() <= max_step {
        to
    } else {
        wrap_degrees(from + max_step.copysign(delta))
    }
}

/// Normalized copy of `v`, or `None` for a (nearly) zero vector.
pub(crate) fn try_normalize(v: Vector3<f32>) -> Option<Vector3<f32>> {
    let len2 = v.magnitude2();
    if len2 < 1e-8 {
        return None;
    }
    Some(v / len2.sqrt())
}

/// Normalized 2D projection of `v` (z zeroed), or `None` if degenerate.
pub(crate) fn try_normalize_2d(v: Vector3<f32>) -> Option<Vector3<f32>> {
    try_normalize(Vector3::new(v.x, v.y, 0.0))
}

pub(crate) fn distance_2d(a: Vector3<f32>, b: Vector3<f32>) -> f32 {
    let dx = a.x - b.x;
    let dy = a.y - b.y;
    (dx * dx + dy * dy).sqrt()
}

pub(crate) fn distance(a: Vector3<f32>, b: Vector3<f32>) -> f32 {
    (a - b).magnitude()
}

/// `value / bound` clamped to [0, 1].
pub(crate) fn bounded_fraction(value: f32, bound: f32) -> f32 {
    (value / bound).clamp(0.0, 1.0)
}
