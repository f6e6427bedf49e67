//! UCM-Entities: naming and backend boundary for PUCM
//!
//! This crate names the objects of a UCM repository and defines the
//! operations the coordination engine consumes from the version-control
//! backend.
//!
//! ## Layer 0 - Entities
//!
//! Focus: entity identity, promotion levels, and the backend contract.
//!
//! ## Key Components
//!
//! - `EntityRef`: parsed fully-qualified entity name
//! - `EntityCache`: process-lifetime identity cache
//! - `PromotionLevel`: ordered baseline maturity
//! - `UcmBackend`: async trait over backend queries and mutations

mod error;
pub mod backend;
pub mod cache;
pub mod entity;
pub mod fakes;
pub mod plevel;

pub use backend::{LoadModules, Tag, UcmBackend};
pub use cache::EntityCache;
pub use entity::{EntityKind, EntityRef};
pub use error::UcmError;
pub use plevel::PromotionLevel;

/// Result type for ucm-entities operations
pub type UcmResult<T> = std::result::Result<T, UcmError>;
