//! Error types for setup-time failures.
//!
//! Per-frame physical edge cases (penetration, stuck sweeps, contact buffer
//! overflow) are absorbed by the stepping code and never show up here.

use thiserror::Error;

/// Unified error type for shape, configuration and registration failures.
#[derive(Debug, Error)]
pub enum PhysicsError {
    /// Shape dimensions are degenerate or inconsistent.
    #[error("Invalid shape: {0}")]
    InvalidShape(String),

    /// A character controller needs a convex collision shape.
    #[error("Character controller requires a convex shape")]
    MissingConvexShape,

    /// Configuration value is out of its valid range.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// The entity has no physics registration.
    #[error("Entity has no physics registration")]
    UnknownEntity,

    /// I/O operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration file could not be parsed.
    #[error("Config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),
}

/// Convenience alias for `Result<T, PhysicsError>`.
pub type PhysicsResult<T> = Result<T, PhysicsError>;
