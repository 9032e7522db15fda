//! The callback invoker: a pure function dispatching `(operation,
//! callback_name, state, config, args)` to the matching [`Callback`]
//! closure. Never blocks, never suspends, never schedules work.

use std::collections::HashMap;

use crate::descriptor::operation::{CallbackKey, EmitSink, Operation};
use crate::descriptor::port::PortName;
use crate::value::Value;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum InvokeError {
    #[error("unknown callback {name}/{arity}")]
    UnknownCallback { name: String, arity: usize },
}

/// Result of a single callback invocation: its return value, the state it
/// leaves behind, and whatever it emitted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallResult {
    pub result: Value,
    pub state: Value,
    pub emits: HashMap<PortName, Vec<Value>>,
}

impl CallResult {
    fn nil_with(state: Value) -> Self {
        Self {
            result: Value::Nil,
            state,
            emits: HashMap::new(),
        }
    }
}

/// Invoke `key` on `operation`. If `state` is `None`, `operation.initial_state`
/// is used.
pub fn call(
    operation: &Operation,
    key: &CallbackKey,
    state: Option<&Value>,
    config: &Value,
    args: &[Value],
) -> Result<CallResult, InvokeError> {
    let callback = operation
        .callback(key)
        .ok_or_else(|| InvokeError::UnknownCallback {
            name: key.name.clone(),
            arity: key.arity,
        })?;

    let mut state = state.cloned().unwrap_or_else(|| operation.initial_state.clone());
    let mut emits = EmitSink::new();
    let result = callback.invoke(&mut state, config, args, &mut emits);

    Ok(CallResult {
        result,
        state,
        emits: emits.into_emits(),
    })
}

/// As [`call`], but returns a nil result instead of [`InvokeError`] when the
/// callback does not exist.
pub fn call_if_exists(
    operation: &Operation,
    key: &CallbackKey,
    state: Option<&Value>,
    config: &Value,
    args: &[Value],
) -> CallResult {
    match call(operation, key, state, config, args) {
        Ok(result) => result,
        Err(InvokeError::UnknownCallback { .. }) => {
            CallResult::nil_with(state.cloned().unwrap_or(Value::Nil))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::operation::Callback;
    use crate::descriptor::port::PortName;

    fn counter_op() -> Operation {
        let react = Callback::new(
            "react",
            1,
            true,
            true,
            true,
            |state, _config, args, emit| {
                let next = state.as_int().unwrap_or(0) + 1;
                *state = Value::Int(next);
                emit.push("out", Value::List(vec![args[0].clone(), Value::Int(next)]));
                Value::Nil
            },
        );
        Operation::new(
            Some("Count".into()),
            vec![],
            vec![PortName::new("out")],
            Value::Int(0),
            None,
            None,
            vec![react],
        )
        .unwrap()
    }

    #[test]
    fn call_uses_initial_state_when_absent() {
        let op = counter_op();
        let res = call(
            &op,
            &CallbackKey::new("react", 1),
            None,
            &Value::Nil,
            &[Value::str("x")],
        )
        .unwrap();
        assert_eq!(res.state, Value::Int(1));
        assert_eq!(
            res.emits.get(&PortName::new("out")).unwrap(),
            &vec![Value::List(vec![Value::str("x"), Value::Int(1)])]
        );
    }

    #[test]
    fn call_chains_state_across_invocations() {
        let op = counter_op();
        let first = call(
            &op,
            &CallbackKey::new("react", 1),
            None,
            &Value::Nil,
            &[Value::str("x")],
        )
        .unwrap();
        let second = call(
            &op,
            &CallbackKey::new("react", 1),
            Some(&first.state),
            &Value::Nil,
            &[Value::str("x")],
        )
        .unwrap();
        assert_eq!(second.state, Value::Int(2));
    }

    #[test]
    fn unknown_callback_errors() {
        let op = counter_op();
        let err = call(
            &op,
            &CallbackKey::new("missing", 0),
            None,
            &Value::Nil,
            &[],
        )
        .unwrap_err();
        assert_eq!(
            err,
            InvokeError::UnknownCallback {
                name: "missing".into(),
                arity: 0
            }
        );
    }

    #[test]
    fn call_if_exists_is_nil_for_missing_callback() {
        let op = counter_op();
        let res = call_if_exists(&op, &CallbackKey::new("missing", 0), None, &Value::Nil, &[]);
        assert_eq!(res.result, Value::Nil);
        assert!(res.emits.is_empty());
    }
}
