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

//! Advice callable shapes and the around-chain control-flow handle.

use std::any::{type_name, Any};
use std::fmt;
use std::sync::Arc;

use serde_json::Value;

use crate::error::{WeaveError, WeaveResult};

/// Opaque handle to the receiver of a woven operation.
///
/// Registration is typed; dispatch downcasts back to the concrete owner.
/// Advice that mutates receiver state across a call does so through the
/// receiver's own interior mutability.
pub type Instance = dyn Any + Send + Sync;

/// A dispatchable operation: the function-table entry form of a method.
///
/// Holds the original implementation until the operation is advised, and the
/// weaver-produced wrapper afterwards.
pub type Method = Arc<dyn Fn(&Instance, &[Value]) -> WeaveResult<Value> + Send + Sync>;

/// Type-erased before-advice. Return values are discarded; errors abort the
/// call and propagate.
pub(crate) type BeforeFn = Arc<dyn Fn(&Instance, &[Value]) -> WeaveResult<()> + Send + Sync>;

/// Type-erased after-advice. Same shape as before-advice; runs once the
/// around-chain has resolved.
pub(crate) type AfterFn = Arc<dyn Fn(&Instance, &[Value]) -> WeaveResult<()> + Send + Sync>;

/// Type-erased around-advice: one layer of the around-chain.
pub(crate) type AroundFn =
    Arc<dyn for<'c> Fn(&Instance, &[Value], &mut Chain<'c>) -> WeaveResult<Value> + Send + Sync>;

/// The three kinds of advice an operation can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdviceKind {
    Before,
    After,
    Around,
}

impl fmt::Display for AdviceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AdviceKind::Before => f.write_str("before"),
            AdviceKind::After => f.write_str("after"),
            AdviceKind::Around => f.write_str("around"),
        }
    }
}

/// Control-flow handle passed to around-advice.
///
/// Each around-advice is one layer of the chain. [`Chain::proceed`] invokes
/// the next layer inward (ultimately the original operation) and returns its
/// result; the advice's own return value flows outward to the enclosing
/// layer. [`Chain::abort`] makes its value the result of the whole chain.
///
/// Abort is a value short-circuit, not an unwind: code in already-entered
/// layers keeps running, but every subsequent `proceed` is a no-op returning
/// [`Value::Null`] and all layer return values after the abort are ignored.
/// The first abort wins.
pub struct Chain<'c> {
    pub(crate) instance: &'c Instance,
    pub(crate) args: &'c [Value],
    /// Remaining layers in execution order, outermost first.
    pub(crate) layers: &'c [AroundFn],
    pub(crate) original: &'c Method,
    pub(crate) depth: usize,
    pub(crate) aborted: Option<Value>,
}

impl<'c> Chain<'c> {
    /// Invoke the next layer inward and return its result.
    ///
    /// An advice may call this zero or more times. Calling it zero times
    /// means the original operation never runs and the advice's own return
    /// value is the layer's result.
    pub fn proceed(&mut self) -> WeaveResult<Value> {
        if self.aborted.is_some() {
            return Ok(Value::Null);
        }
        let depth = self.depth;
        self.depth = depth + 1;
        let result = match self.layers.get(depth) {
            Some(layer) => {
                let layer = Arc::clone(layer);
                let (instance, args) = (self.instance, self.args);
                layer(instance, args, self)
            }
            None => (self.original)(self.instance, self.args),
        };
        self.depth = depth;
        if self.aborted.is_some() {
            // The inner result is dead once the chain is aborted; errors
            // still propagate.
            return result.map(|_| Value::Null);
        }
        result
    }

    /// Short-circuit the entire around-chain with `value`.
    pub fn abort(&mut self, value: impl Into<Value>) {
        if self.aborted.is_none() {
            self.aborted = Some(value.into());
        }
    }

    /// Whether some layer has already aborted the chain.
    pub fn is_aborted(&self) -> bool {
        self.aborted.is_some()
    }
}

/// Downcast an opaque instance back to its concrete owner type.
pub(crate) fn downcast<T: Any>(instance: &Instance) -> WeaveResult<&T> {
    instance
        .downcast_ref::<T>()
        .ok_or(WeaveError::InstanceMismatch {
            expected: type_name::<T>(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn advice_kind_display() {
        assert_eq!(AdviceKind::Before.to_string(), "before");
        assert_eq!(AdviceKind::After.to_string(), "after");
        assert_eq!(AdviceKind::Around.to_string(), "around");
    }

    #[test]
    fn downcast_rejects_wrong_type() {
        let value: Box<Instance> = Box::new(42_u32);
        assert!(downcast::<u32>(value.as_ref()).is_ok());
        assert!(matches!(
            downcast::<String>(value.as_ref()),
            Err(WeaveError::InstanceMismatch { .. })
        ));
    }
}
