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

//! Interception weaver: wrapper construction and chain composition.
//!
//! The weaver produces the single [`Method`] that replaces an advised
//! operation in the method table, and defines the invocation order contract:
//!
//! 1. before-advice, registration order;
//! 2. the around-chain, most recently registered layer outermost, the
//!    original operation innermost;
//! 3. after-advice, registration order.
//!
//! The overall result is the around-chain's result, untouched by step 3. An
//! error from any phase propagates to the caller and skips everything still
//! pending.

use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::Value;

use crate::advice::{AfterFn, AroundFn, BeforeFn, Chain, Instance, Method};
use crate::error::WeaveResult;
use crate::registry::{OperationKey, RecordMap};

/// Per-call view of an operation's advice, cloned out of the registry so no
/// lock is held while advice runs. Advice bodies may therefore re-enter the
/// registry; chain appends land on the next call.
struct Woven {
    before: Vec<BeforeFn>,
    after: Vec<AfterFn>,
    around: Vec<AroundFn>,
    original: Method,
}

/// Build the wrapper that replaces `key`'s original implementation.
///
/// The wrapper reads its chains from the shared record map on every call, so
/// advice registered after installation takes effect without reinstalling.
pub(crate) fn weave(
    records: Arc<RwLock<RecordMap>>,
    key: OperationKey,
    original: Method,
) -> Method {
    Arc::new(move |instance: &Instance, args: &[Value]| {
        let woven = {
            let records = records.read();
            match records.get(&key) {
                Some(record) => Woven {
                    before: record.before.clone(),
                    after: record.after.clone(),
                    around: record.around.clone(),
                    original: Arc::clone(&record.original),
                },
                // A caller raced a reset and reached a wrapper whose record
                // is gone; behave as the unadvised original.
                None => return original(instance, args),
            }
        };
        invoke(&woven, instance, args)
    })
}

fn invoke(woven: &Woven, instance: &Instance, args: &[Value]) -> WeaveResult<Value> {
    tracing::trace!(
        before = woven.before.len(),
        around = woven.around.len(),
        after = woven.after.len(),
        "woven invocation"
    );

    for advice in &woven.before {
        advice(instance, args)?;
    }

    let result = run_chain(woven, instance, args)?;

    for advice in &woven.after {
        advice(instance, args)?;
    }

    Ok(result)
}

/// Evaluate the around-chain, degenerating to a direct original call when no
/// around-advice is registered.
fn run_chain(woven: &Woven, instance: &Instance, args: &[Value]) -> WeaveResult<Value> {
    // Registration order is innermost-to-outermost; execution wants the
    // outermost layer first.
    let layers: Vec<AroundFn> = woven.around.iter().rev().cloned().collect();
    let mut chain = Chain {
        instance,
        args,
        layers: &layers,
        original: &woven.original,
        depth: 0,
        aborted: None,
    };
    let result = chain.proceed()?;
    Ok(chain.aborted.take().unwrap_or(result))
}

#[cfg(test)]
mod tests {
    use crate::error::WeaveError;
    use crate::registry::Registry;
    use anyhow::anyhow;
    use parking_lot::Mutex;
    use serde_json::{json, Value};
    use std::sync::Arc;

    /// Test owner whose `eat` returns `"food"` and records the side effect,
    /// and whose `feed` stores its arguments on the instance.
    #[derive(Default)]
    struct GuineaPig {
        plate: Mutex<String>,
        food: Mutex<Vec<Value>>,
    }

    impl GuineaPig {
        fn print(&self, text: &str) {
            self.plate.lock().push_str(text);
        }
    }

    fn guinea_pig_registry() -> Registry {
        let registry = Registry::new();
        registry.define::<GuineaPig, _>("eat", |pig, _args| {
            pig.print("food");
            Ok(json!("food"))
        });
        registry.define::<GuineaPig, _>("feed", |pig, args| {
            *pig.food.lock() = args.to_vec();
            Ok(Value::Null)
        });
        registry
    }

    fn text(value: &Value) -> String {
        value.as_str().unwrap_or_default().to_string()
    }

    #[test]
    fn zero_advice_is_transparent() {
        let registry = guinea_pig_registry();
        let pig = GuineaPig::default();
        let result = registry.call(&pig, "eat", &[]).unwrap();
        assert_eq!(result, json!("food"));
        assert_eq!(*pig.plate.lock(), "food");
    }

    #[test]
    fn before_advice_runs_in_registration_order() {
        let registry = guinea_pig_registry();
        registry
            .before::<GuineaPig, _>("eat", |pig: &GuineaPig, _args| {
                pig.print("eat ");
                Ok(())
            })
            .unwrap();
        registry
            .before::<GuineaPig, _>("eat", |pig: &GuineaPig, _args| {
                pig.print("some ");
                Ok(())
            })
            .unwrap();

        let pig = GuineaPig::default();
        registry.call(&pig, "eat", &[]).unwrap();
        assert_eq!(*pig.plate.lock(), "eat some food");
    }

    #[test]
    fn after_advice_runs_in_registration_order() {
        let registry = guinea_pig_registry();
        registry
            .after::<GuineaPig, _>("eat", |pig: &GuineaPig, _args| {
                pig.print(" must");
                Ok(())
            })
            .unwrap();
        registry
            .after::<GuineaPig, _>("eat", |pig: &GuineaPig, _args| {
                pig.print(" be eaten");
                Ok(())
            })
            .unwrap();

        let pig = GuineaPig::default();
        registry.call(&pig, "eat", &[]).unwrap();
        assert_eq!(*pig.plate.lock(), "food must be eaten");
    }

    #[test]
    fn after_advice_observes_post_call_state() {
        let registry = guinea_pig_registry();
        registry
            .after::<GuineaPig, _>("feed", |pig: &GuineaPig, args| {
                for arg in args {
                    pig.print(&format!("{} ", text(arg)));
                }
                for food in pig.food.lock().iter() {
                    pig.print(&format!("{} ", text(food)));
                }
                Ok(())
            })
            .unwrap();

        let pig = GuineaPig::default();
        registry
            .call(&pig, "feed", &[json!("apple"), json!("orange")])
            .unwrap();
        assert_eq!(*pig.plate.lock(), "apple orange apple orange ");
    }

    #[test]
    fn before_advice_observes_pristine_state() {
        let registry = guinea_pig_registry();
        registry
            .before::<GuineaPig, _>("feed", |pig: &GuineaPig, args| {
                assert!(pig.food.lock().is_empty());
                for arg in args {
                    pig.print(&format!("{} ", text(arg)));
                }
                Ok(())
            })
            .unwrap();

        let pig = GuineaPig::default();
        registry
            .call(&pig, "feed", &[json!("apple"), json!("orange")])
            .unwrap();
        assert_eq!(*pig.plate.lock(), "apple orange ");
        assert_eq!(pig.food.lock().len(), 2);
    }

    #[test]
    fn around_advice_transforms_the_result() {
        let registry = guinea_pig_registry();
        registry
            .around::<GuineaPig, _>("eat", |_pig: &GuineaPig, _args, chain| {
                let inner = chain.proceed()?;
                Ok(json!(format!("{} please", text(&inner))))
            })
            .unwrap();

        let pig = GuineaPig::default();
        let result = registry.call(&pig, "eat", &[]).unwrap();
        assert_eq!(result, json!("food please"));
    }

    #[test]
    fn last_registered_around_is_outermost() {
        let registry = guinea_pig_registry();
        registry
            .around::<GuineaPig, _>("eat", |_pig: &GuineaPig, _args, chain| {
                let inner = chain.proceed()?;
                Ok(json!(format!("eat {} right", text(&inner))))
            })
            .unwrap();
        registry
            .around::<GuineaPig, _>("eat", |_pig: &GuineaPig, _args, chain| {
                let inner = chain.proceed()?;
                Ok(json!(format!("must {} now", text(&inner))))
            })
            .unwrap();

        let pig = GuineaPig::default();
        let result = registry.call(&pig, "eat", &[]).unwrap();
        assert_eq!(result, json!("must eat food right now"));
    }

    #[test]
    fn abort_short_circuits_the_chain() {
        let registry = guinea_pig_registry();
        registry
            .around::<GuineaPig, _>("eat", |_pig: &GuineaPig, _args, chain| chain.proceed())
            .unwrap();
        registry
            .around::<GuineaPig, _>("eat", |_pig: &GuineaPig, _args, chain| {
                chain.abort("diet");
                chain.proceed()
            })
            .unwrap();

        let pig = GuineaPig::default();
        let result = registry.call(&pig, "eat", &[]).unwrap();
        assert_eq!(result, json!("diet"));
        // The original never ran.
        assert_eq!(*pig.plate.lock(), "");
    }

    #[test]
    fn proceed_after_abort_is_inert() {
        let proceeded = Arc::new(Mutex::new(Vec::new()));

        let registry = guinea_pig_registry();
        let log = Arc::clone(&proceeded);
        registry
            .around::<GuineaPig, _>("eat", move |_pig: &GuineaPig, _args, chain| {
                chain.abort("stop");
                let first = chain.proceed()?;
                let second = chain.proceed()?;
                log.lock().push((first, second));
                Ok(json!("ignored"))
            })
            .unwrap();

        let pig = GuineaPig::default();
        let result = registry.call(&pig, "eat", &[]).unwrap();
        assert_eq!(result, json!("stop"));
        assert_eq!(*pig.plate.lock(), "");
        assert_eq!(proceeded.lock().as_slice(), &[(Value::Null, Value::Null)]);
    }

    #[test]
    fn first_abort_wins() {
        let registry = guinea_pig_registry();
        registry
            .around::<GuineaPig, _>("eat", |_pig: &GuineaPig, _args, chain| {
                chain.abort("inner");
                Ok(Value::Null)
            })
            .unwrap();
        registry
            .around::<GuineaPig, _>("eat", |_pig: &GuineaPig, _args, chain| {
                let inner = chain.proceed()?;
                chain.abort("outer");
                Ok(inner)
            })
            .unwrap();

        let pig = GuineaPig::default();
        let result = registry.call(&pig, "eat", &[]).unwrap();
        assert_eq!(result, json!("inner"));
    }

    #[test]
    fn fallthrough_without_proceed_returns_advice_value() {
        let registry = guinea_pig_registry();
        registry
            .around::<GuineaPig, _>("eat", |_pig: &GuineaPig, _args, _chain| Ok(json!("skipped")))
            .unwrap();

        let pig = GuineaPig::default();
        let result = registry.call(&pig, "eat", &[]).unwrap();
        assert_eq!(result, json!("skipped"));
        assert_eq!(*pig.plate.lock(), "");
    }

    #[test]
    fn around_advice_may_proceed_twice() {
        let registry = guinea_pig_registry();
        registry
            .around::<GuineaPig, _>("eat", |_pig: &GuineaPig, _args, chain| {
                chain.proceed()?;
                chain.proceed()
            })
            .unwrap();

        let pig = GuineaPig::default();
        let result = registry.call(&pig, "eat", &[]).unwrap();
        assert_eq!(result, json!("food"));
        assert_eq!(*pig.plate.lock(), "foodfood");
    }

    #[test]
    fn before_error_skips_everything() {
        let registry = guinea_pig_registry();
        registry
            .before::<GuineaPig, _>("eat", |_pig: &GuineaPig, _args| {
                Err(anyhow!("not hungry").into())
            })
            .unwrap();
        registry
            .after::<GuineaPig, _>("eat", |pig: &GuineaPig, _args| {
                pig.print(" never");
                Ok(())
            })
            .unwrap();

        let pig = GuineaPig::default();
        let err = registry.call(&pig, "eat", &[]).unwrap_err();
        assert!(matches!(err, WeaveError::Advice(_)));
        assert_eq!(err.to_string(), "not hungry");
        assert_eq!(*pig.plate.lock(), "");
    }

    #[test]
    fn original_error_skips_after_advice() {
        let registry = guinea_pig_registry();
        registry.define::<GuineaPig, _>("choke", |_pig, _args| Err(anyhow!("stuck").into()));
        registry
            .after::<GuineaPig, _>("choke", |pig: &GuineaPig, _args| {
                pig.print(" recovered");
                Ok(())
            })
            .unwrap();

        let pig = GuineaPig::default();
        let err = registry.call(&pig, "choke", &[]).unwrap_err();
        assert_eq!(err.to_string(), "stuck");
        assert_eq!(*pig.plate.lock(), "");
    }

    #[test]
    fn around_error_outranks_pending_abort() {
        let registry = guinea_pig_registry();
        registry
            .around::<GuineaPig, _>("eat", |_pig: &GuineaPig, _args, chain| {
                chain.abort("diet");
                Err(anyhow!("collapsed").into())
            })
            .unwrap();

        let pig = GuineaPig::default();
        let err = registry.call(&pig, "eat", &[]).unwrap_err();
        assert_eq!(err.to_string(), "collapsed");
    }

    #[test]
    fn after_error_propagates_but_original_already_ran() {
        let registry = guinea_pig_registry();
        registry
            .after::<GuineaPig, _>("eat", |_pig: &GuineaPig, _args| {
                Err(anyhow!("indigestion").into())
            })
            .unwrap();

        let pig = GuineaPig::default();
        let err = registry.call(&pig, "eat", &[]).unwrap_err();
        assert_eq!(err.to_string(), "indigestion");
        assert_eq!(*pig.plate.lock(), "food");
    }
}
