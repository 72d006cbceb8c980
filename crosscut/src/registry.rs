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

//! Advice registry and operation method table.
//!
//! The registry owns two things: the method table that makes operations
//! dispatchable by `(owner type, name)`, and the per-operation advice
//! records the weaver compiles into a call. Registering the first advice of
//! any kind for an operation installs interception exactly once; later
//! registrations only append to the chains.

use std::any::{type_name, Any, TypeId};
use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::Value;

use crate::advice::{downcast, AdviceKind, AfterFn, AroundFn, BeforeFn, Chain, Instance, Method};
use crate::error::{WeaveError, WeaveResult};
use crate::weaver;

/// Identity of one interceptable operation: owner type plus operation name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct OperationKey {
    owner: TypeId,
    name: String,
}

impl OperationKey {
    pub(crate) fn of<T: Any>(name: &str) -> Self {
        Self {
            owner: TypeId::of::<T>(),
            name: name.to_string(),
        }
    }

    pub(crate) fn for_instance(instance: &Instance, name: &str) -> Self {
        Self {
            owner: instance.type_id(),
            name: name.to_string(),
        }
    }

    /// The operation name half of the key.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn owner(&self) -> TypeId {
        self.owner
    }
}

/// Per-operation advice state.
///
/// A record exists iff interception is installed for its key, so `original`
/// is captured exactly when the operation is first advised. Chains are
/// append-only; insertion order is registration order.
pub(crate) struct AdviceRecord {
    pub(crate) before: Vec<BeforeFn>,
    pub(crate) after: Vec<AfterFn>,
    pub(crate) around: Vec<AroundFn>,
    /// The unmodified implementation, captured at install time. All chains
    /// invoke through this reference, never through the replaced table
    /// entry, so a woven call cannot recurse into its own wrapper.
    pub(crate) original: Method,
}

impl AdviceRecord {
    fn new(original: Method) -> Self {
        Self {
            before: Vec::new(),
            after: Vec::new(),
            around: Vec::new(),
            original,
        }
    }

    pub(crate) fn advice_count(&self) -> usize {
        self.before.len() + self.after.len() + self.around.len()
    }
}

pub(crate) type RecordMap = HashMap<OperationKey, AdviceRecord>;

/// Process-scoped registry of operations and their advice.
///
/// Owners register operations with [`Registry::define`]; callers dispatch
/// through [`Registry::call`]; advice attaches with [`Registry::before`],
/// [`Registry::after`] and [`Registry::around`]. [`Registry::reset`]
/// restores every advised operation to its original behavior.
pub struct Registry {
    /// Owner type names, for diagnostics only.
    owners: RwLock<HashMap<TypeId, &'static str>>,
    /// Live dispatch table: original until woven, wrapper after.
    methods: RwLock<HashMap<OperationKey, Method>>,
    /// Shared with installed wrappers, which read their chains per call.
    records: Arc<RwLock<RecordMap>>,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            owners: RwLock::new(HashMap::new()),
            methods: RwLock::new(HashMap::new()),
            records: Arc::new(RwLock::new(RecordMap::new())),
        }
    }

    /// Register an original operation `name` on owner type `T`.
    ///
    /// Redefining an existing entry replaces it.
    pub fn define<T, F>(&self, name: impl Into<String>, body: F)
    where
        T: Any + Send + Sync,
        F: Fn(&T, &[Value]) -> WeaveResult<Value> + Send + Sync + 'static,
    {
        let name = name.into();
        let owner = type_name::<T>();
        let method: Method = Arc::new(move |instance: &Instance, args: &[Value]| {
            body(downcast::<T>(instance)?, args)
        });

        self.owners.write().insert(TypeId::of::<T>(), owner);
        self.methods.write().insert(OperationKey::of::<T>(&name), method);
        tracing::debug!(owner, operation = %name, "operation defined");
    }

    /// Dispatch `name` on `instance` through the method table.
    ///
    /// Reaches the weaver-produced wrapper once the operation is advised,
    /// and the original implementation otherwise.
    pub fn call(&self, instance: &Instance, name: &str, args: &[Value]) -> WeaveResult<Value> {
        let key = OperationKey::for_instance(instance, name);
        let owner = self
            .owners
            .read()
            .get(&key.owner())
            .copied()
            .ok_or(WeaveError::OwnerNotFound)?;
        let method = self
            .methods
            .read()
            .get(&key)
            .cloned()
            .ok_or_else(|| WeaveError::OperationNotFound {
                owner: owner.to_string(),
                name: name.to_string(),
            })?;
        // The lock is released before the call so advice may re-enter the
        // registry.
        method(instance, args)
    }

    /// Attach before-advice to `(T, name)`.
    ///
    /// Runs strictly before the original operation, in registration order.
    pub fn before<T, F>(&self, name: &str, advice: F) -> WeaveResult<()>
    where
        T: Any + Send + Sync,
        F: Fn(&T, &[Value]) -> WeaveResult<()> + Send + Sync + 'static,
    {
        let hook: BeforeFn = Arc::new(move |instance: &Instance, args: &[Value]| {
            advice(downcast::<T>(instance)?, args)
        });
        self.register::<T>(name, AdviceKind::Before, |record| record.before.push(hook))
    }

    /// Attach after-advice to `(T, name)`.
    ///
    /// Runs once the around-chain has resolved, in registration order, and
    /// observes post-call instance state.
    pub fn after<T, F>(&self, name: &str, advice: F) -> WeaveResult<()>
    where
        T: Any + Send + Sync,
        F: Fn(&T, &[Value]) -> WeaveResult<()> + Send + Sync + 'static,
    {
        let hook: AfterFn = Arc::new(move |instance: &Instance, args: &[Value]| {
            advice(downcast::<T>(instance)?, args)
        });
        self.register::<T>(name, AdviceKind::After, |record| record.after.push(hook))
    }

    /// Attach around-advice to `(T, name)`.
    ///
    /// The most recently registered around-advice becomes the outermost
    /// layer of the chain. See [`Chain`] for the proceed/abort contract.
    pub fn around<T, F>(&self, name: &str, advice: F) -> WeaveResult<()>
    where
        T: Any + Send + Sync,
        F: for<'c> Fn(&T, &[Value], &mut Chain<'c>) -> WeaveResult<Value>
            + Send
            + Sync
            + 'static,
    {
        let layer: AroundFn =
            Arc::new(move |instance: &Instance, args: &[Value], chain: &mut Chain<'_>| {
                advice(downcast::<T>(instance)?, args, chain)
            });
        self.register::<T>(name, AdviceKind::Around, |record| record.around.push(layer))
    }

    /// Locate or create the advice record for `(T, name)`, installing
    /// interception on first registration, then append via `push`.
    fn register<T: Any>(
        &self,
        name: &str,
        kind: AdviceKind,
        push: impl FnOnce(&mut AdviceRecord),
    ) -> WeaveResult<()> {
        let key = OperationKey::of::<T>(name);
        let owner = type_name::<T>();

        let mut records = self.records.write();
        if let Some(record) = records.get_mut(&key) {
            push(record);
            tracing::debug!(owner, operation = name, kind = %kind, "advice registered");
            return Ok(());
        }

        // First advice for this operation: capture the original and swap the
        // wrapper into the method table. The lookup failing here is the only
        // registration error, and it happens before anything is installed.
        let mut methods = self.methods.write();
        let original =
            methods
                .get(&key)
                .cloned()
                .ok_or_else(|| WeaveError::OperationNotFound {
                    owner: owner.to_string(),
                    name: name.to_string(),
                })?;
        let wrapper = weaver::weave(Arc::clone(&self.records), key.clone(), Arc::clone(&original));
        methods.insert(key.clone(), wrapper);
        drop(methods);
        tracing::debug!(owner, operation = name, "interception installed");

        let record = records.entry(key).or_insert_with(|| AdviceRecord::new(original));
        push(record);
        tracing::debug!(owner, operation = name, kind = %kind, "advice registered");
        Ok(())
    }

    /// Discard all advice and restore every woven operation's original
    /// implementation in the method table.
    ///
    /// Runs under both write locks, so callers never observe a half-reset
    /// registry. Defined operations survive; advice does not.
    pub fn reset(&self) {
        let mut records = self.records.write();
        let mut methods = self.methods.write();
        let restored = records.len();
        for (key, record) in records.drain() {
            methods.insert(key, record.original);
        }
        tracing::debug!(restored, "registry reset");
    }

    /// Whether interception is installed for `(T, name)`.
    pub fn is_advised<T: Any>(&self, name: &str) -> bool {
        self.records.read().contains_key(&OperationKey::of::<T>(name))
    }

    /// Total advice attached to `(T, name)` across all three chains.
    pub fn advice_count<T: Any>(&self, name: &str) -> usize {
        self.records
            .read()
            .get(&OperationKey::of::<T>(name))
            .map(AdviceRecord::advice_count)
            .unwrap_or(0)
    }

    /// List `(owner name, operation name)` for every advised operation.
    pub fn advised_operations(&self) -> Vec<(String, String)> {
        let owners = self.owners.read();
        self.records
            .read()
            .keys()
            .map(|key| {
                let owner = owners.get(&key.owner()).copied().unwrap_or("<unknown>");
                (owner.to_string(), key.name().to_string())
            })
            .collect()
    }
}
