// src/lib.rs
//! Authorization over an entity hierarchy.
//!
//! A [`Slice`] bundles policies, templates, template links and entities.
//! [`is_authorized`] decides a [`Request`] against a slice; a
//! [`PolicyEngine`] serves a slice to many threads and swaps in new ones on
//! reload.
//!
//! ```rust
//! use treetop_slice::{Entity, EntityUid, Request, Slice, is_authorized};
//!
//! let alice: EntityUid = r#"User::"alice""#.parse().unwrap();
//! let slice = Slice::builder()
//!     .policy_text(r#"permit (principal in Group::"admins", action == Action::"view", resource);"#)
//!     .unwrap()
//!     .entity(Entity::with_uid(alice).with_parent(r#"Group::"admins""#.parse().unwrap()))
//!     .build()
//!     .unwrap();
//!
//! let request = Request::parse(r#"User::"alice""#, r#"Action::"view""#, r#"Doc::"d1""#).unwrap();
//! let decision = is_authorized(&slice, &request);
//! assert!(decision.allowed);
//! assert_eq!(decision.policy_ids(), vec!["policy0"]);
//! ```
pub use config::{EngineConfig, UnknownEntityMode};
pub use engine::PolicyEngine;
pub use entities::EntityStore;
pub use error::PolicyError;
pub use evaluator::{Authorizer, is_authorized};
pub use loader::compile_policy;
pub use parser::{parse_expr, parse_policies, parse_policy};
pub use policy_set::PolicySet;
pub use slice::{LinkError, Slice, SliceBuilder};
pub use template::{Template, TemplateLink, instantiate};
pub use timers::PhaseDurations;
pub use types::*;

mod config;
mod engine;
mod entities;
mod error;
mod evaluator;
mod loader;
pub mod metrics;
mod parser;
mod policy_match;
mod policy_set;
mod query;
mod slice;
mod template;
mod timers;
pub mod types;

#[cfg(test)]
mod tests;
