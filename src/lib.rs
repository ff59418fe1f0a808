//! Predictive movement planning for game agents.
//!
//! The planner forward-simulates the agent's physics under inputs
//! synthesized by a closed set of movement actions, committing the
//! simulated frames to a plan stack with savepoint/rollback semantics.
//! The resulting plan is cached and served frame by frame for as long as
//! reality keeps matching the prediction.
//!
//! The embedding engine supplies collision tracing, the navigation graph
//! and the physics integrator through the traits in [`world`].

mod actions;
mod fallback;
mod input;
mod jump_spots;
mod math;
mod module;
mod movement_state;
mod params;
mod physics;
mod plan;
mod probes;
#[cfg(test)]
mod test_support;
mod trajectory;
mod world;

pub use actions::ActionKind;
pub use fallback::{Fallback, FallbackStatus};
pub use input::{ActionRecord, Input, PackedVec};
pub use jump_spots::{
    CandidateSource, JumpImpulse, JumpSpotsDetector, JumpableSpot, SpotAndScore,
};
pub use module::{Bot, MovementModule, NavTarget};
pub use movement_state::{
    CampingSpotState, FlyUntilLandingState, JumppadState, KeyMoveDirsState, MovementState,
    PendingLookAtPointState, WeaponJumpState,
};
pub use params::PlanningParams;
pub use physics::{EntityState, FrameEvents, Ground, RoutingAreas};
pub use plan::{PlanError, PredictedFrame, PredictionContext, MAX_PREDICTED_STATES};
pub use probes::{ObstacleAvoidanceResult, ProbeCache, ProbeResult, ProbeTier};
pub use trajectory::{Results as TrajectoryResults, StepInspector, TrajectoryPredictor};
pub use world::{
    AreaNum, CollisionWorld, NavArea, NavWorld, PhysicsWorld, Reach, ReachNum, RouteResult,
    StepResult, Trace, TravelType,
};
