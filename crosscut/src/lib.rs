// Copyright 2025 Crosscut Contributors
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Crosscut - runtime method interception
//!
//! Crosscut attaches extra behavior ("advice") to a named operation on an
//! owning type without touching the operation's own definition. Advice comes
//! in three kinds:
//!
//! - **before**: runs ahead of the operation, in registration order;
//! - **after**: runs once the call has resolved, in registration order,
//!   observing post-call instance state;
//! - **around**: wraps the operation; may transform the result, call inward
//!   any number of times via [`Chain::proceed`], or short-circuit the whole
//!   call via [`Chain::abort`]. The most recently registered around-advice
//!   is the outermost layer.
//!
//! # Architecture
//!
//! Operations live in a per-registry method table keyed by
//! `(owner type, name)`. Registering the first advice for an operation weaves
//! it: the original implementation is captured and the table entry replaced
//! by a single wrapper compiled from the advice record. [`Registry::reset`]
//! puts every original back.
//!
//! The registry is `Send + Sync`; registration is expected during setup, but
//! all interior state sits behind `parking_lot` locks and no lock is held
//! while advice runs.
//!
//! # Example
//!
//! ```rust,ignore
//! use crosscut::{Registry, Value};
//! use serde_json::json;
//!
//! let registry = Registry::new();
//! registry.define::<Kitchen, _>("cook", |kitchen, args| Ok(json!("stew")));
//!
//! registry.before::<Kitchen, _>("cook", |kitchen, args| {
//!     tracing::info!("preheating");
//!     Ok(())
//! })?;
//!
//! registry.around::<Kitchen, _>("cook", |kitchen, args, chain| {
//!     if kitchen.is_closed() {
//!         chain.abort("sandwich");
//!     }
//!     chain.proceed()
//! })?;
//!
//! let dinner = registry.call(&kitchen, "cook", &[])?;
//! ```

pub mod advice;
pub mod error;
pub mod registry;

mod weaver;

// Re-exports
pub use advice::{AdviceKind, Chain, Instance, Method};
pub use error::{WeaveError, WeaveResult};
pub use registry::{OperationKey, Registry};

pub use serde_json::Value;
