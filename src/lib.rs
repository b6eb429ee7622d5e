//! Fixed-step rigid-body simulation with a sweep-and-slide kinematic
//! character controller.

pub mod character;
pub mod collision;
pub mod components;
pub mod config;
pub mod dynamics;
pub mod engine;
pub mod error;
pub mod fsm;
pub mod scene;
pub mod simulation;
pub mod systems;

pub use config::{CharacterSettings, PhysicsSettings};
pub use error::{PhysicsError, PhysicsResult};
pub use simulation::Simulation;
