//! Tunable planning thresholds gathered in one place so embedders can
//! adjust them without touching the planner.

/// Thresholds and tolerances of the planner. The defaults match a player
/// collider of 32x32x64 units and the default physics constants of
/// [`crate::world::PhysicsWorld`].
#[derive(Clone, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct PlanningParams {
    /// Max distance between the actual origin and a cached frame origin
    /// for the cached plan to stay valid.
    pub max_origin_mismatch: f32,
    /// Max relative speed difference for a cached frame to stay valid.
    pub max_speed_mismatch_fraction: f32,
    /// Min cosine between actual and predicted velocity directions.
    pub min_velocity_dir_cosine: f32,
    /// Min cosine between actual and predicted look directions.
    pub min_look_dir_cosine: f32,
    /// For this long after an external knockback, velocity mismatches do
    /// not invalidate the cached plan.
    pub knockback_grace_millis: i64,
    /// Base turn speed in degrees per second, before per-input multipliers.
    pub base_turn_speed: f32,
    /// Travel time toward the target may regress by up to this much
    /// (hundredths of a second) within a walk sequence before it is judged
    /// a step in the wrong direction.
    pub travel_time_regression_tolerance: u32,
    /// Within this distance of the navigation target the planner considers
    /// the approach trivial and stops predicting past it.
    pub close_to_target_distance: f32,
    /// Speed-ups may not gain more than this fraction of the max speed the
    /// integrator itself could produce.
    pub max_accel_speed_gain_fraction: f32,
    /// After being unable to move usefully for this long the planner
    /// reports itself blocked.
    pub blocked_timeout_millis: i64,
}

impl Default for PlanningParams {
    fn default() -> Self {
        Self {
            max_origin_mismatch: 3.0,
            max_speed_mismatch_fraction: 0.005,
            // cos(5 degrees)
            min_velocity_dir_cosine: 0.996,
            min_look_dir_cosine: 0.996,
            knockback_grace_millis: 32,
            base_turn_speed: 360.0,
            travel_time_regression_tolerance: 5,
            close_to_target_distance: 72.0,
            max_accel_speed_gain_fraction: 0.5,
            blocked_timeout_millis: 4000,
        }
    }
}
