//! Built-in `Operation`s used by skitter's own test suite: small enough that
//! their behaviour is obvious by inspection, so tests exercising strategies
//! and the deployment engine don't also have to exercise a bespoke
//! operation.
//!
//! Every operation here defines a single callback, `("react", 1)`, so
//! [`crate::strategies::process_hook`] can drive all of them the same way.

use std::sync::{Arc, Mutex};

use skitter_core::descriptor::operation::Callback;
use skitter_core::descriptor::port::PortName;
use skitter_core::value::Value;
use skitter_core::Operation;

/// Forwards whatever it receives to its `out` port, unchanged. Used as a
/// workflow's entry point in tests, driven by sending directly into its
/// worker's mailbox.
pub fn source() -> Arc<Operation> {
    Arc::new(
        Operation::new(
            Some("Source".into()),
            vec![],
            vec![PortName::new("out")],
            Value::Nil,
            None,
            None,
            vec![Callback::new("react", 1, false, false, true, |_state, _config, args, emit| {
                emit.push("out", args[0].clone());
                Value::Nil
            })],
        )
        .unwrap(),
    )
}

/// Forwards `in` to `out` unchanged.
pub fn identity() -> Arc<Operation> {
    Arc::new(
        Operation::new(
            Some("Identity".into()),
            vec![PortName::new("in")],
            vec![PortName::new("out")],
            Value::Nil,
            None,
            None,
            vec![Callback::new("react", 1, false, false, true, |_state, _config, args, emit| {
                emit.push("out", args[0].clone());
                Value::Nil
            })],
        )
        .unwrap(),
    )
}

/// Appends every received value to a shared `Vec`, for assertions. Not
/// registerable under a name (the recorder is per-construction), so tests
/// build it directly and place it in a workflow node rather than looking
/// it up by name.
pub fn sink(recorder: Arc<Mutex<Vec<Value>>>) -> Arc<Operation> {
    Arc::new(
        Operation::new(
            None,
            vec![PortName::new("in")],
            vec![],
            Value::Nil,
            None,
            None,
            vec![Callback::new("react", 1, true, true, false, move |state, _config, args, _emit| {
                recorder.lock().unwrap().push(args[0].clone());
                *state = args[0].clone();
                Value::Nil
            })],
        )
        .unwrap(),
    )
}

/// A named, recorder-free sink for multi-node/registry demos: logs what it
/// receives instead of accumulating it anywhere observable in-process.
pub fn logging_sink() -> Arc<Operation> {
    Arc::new(
        Operation::new(
            Some("Sink".into()),
            vec![PortName::new("in")],
            vec![],
            Value::Nil,
            None,
            None,
            vec![Callback::new("react", 1, false, true, false, |state, _config, args, _emit| {
                tracing::info!(value = ?args[0], "sink received value");
                *state = args[0].clone();
                Value::Nil
            })],
        )
        .unwrap(),
    )
}

/// Emits a running count of how many messages it has received, as
/// `Value::Int`.
pub fn count() -> Arc<Operation> {
    Arc::new(
        Operation::new(
            Some("Count".into()),
            vec![PortName::new("in")],
            vec![PortName::new("out")],
            Value::Int(0),
            None,
            None,
            vec![Callback::new("react", 1, true, true, true, |state, _config, _args, emit| {
                let next = state.as_int().unwrap_or(0) + 1;
                *state = Value::Int(next);
                emit.push("out", Value::Int(next));
                Value::Int(next)
            })],
        )
        .unwrap(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use skitter_core::descriptor::operation::CallbackKey;
    use skitter_core::invoke;

    #[test]
    fn count_increments_and_emits_running_total() {
        let op = count();
        let key = CallbackKey::new("react", 1);
        let first = invoke::call(&op, &key, None, &Value::Nil, &[Value::str("x")]).unwrap();
        assert_eq!(first.state, Value::Int(1));
        let second = invoke::call(&op, &key, Some(&first.state), &Value::Nil, &[Value::str("y")]).unwrap();
        assert_eq!(second.state, Value::Int(2));
        assert_eq!(
            second.emits.get(&PortName::new("out")).unwrap(),
            &vec![Value::Int(2)]
        );
    }

    #[test]
    fn sink_records_every_value_it_sees() {
        let recorder = Arc::new(Mutex::new(Vec::new()));
        let op = sink(recorder.clone());
        let key = CallbackKey::new("react", 1);
        invoke::call(&op, &key, None, &Value::Nil, &[Value::Int(1)]).unwrap();
        invoke::call(&op, &key, None, &Value::Nil, &[Value::Int(2)]).unwrap();
        assert_eq!(*recorder.lock().unwrap(), vec![Value::Int(1), Value::Int(2)]);
    }
}
