//! Command surface: a single dispatch table invoked by name with a list of
//! dynamic values, the shape a UI bridge calls into.
//!
//! Failures follow one rule: unknown names, unknown UUIDs and precondition
//! violations return a falsey value; queries return empty payloads. Commands
//! never panic and never block the audio thread — they flip atomics and swap
//! snapshots.

use crate::audio::engine::TransportEngine;
use crate::audio::node::NodeKind;
use crate::value::Value;

fn str_param<'a>(params: &'a [Value], index: usize) -> Option<&'a str> {
    params.get(index).and_then(Value::as_str)
}

fn int_param(params: &[Value], index: usize) -> Option<i64> {
    params.get(index).and_then(Value::as_i64)
}

fn float_param(params: &[Value], index: usize) -> Option<f64> {
    params.get(index).and_then(Value::as_f64)
}

fn ok(result: bool) -> Value {
    Value::Bool(result)
}

/// Invoke a command by name. The table mirrors what the view layer binds to.
pub fn dispatch(engine: &TransportEngine, name: &str, params: &[Value]) -> Value {
    // Commands arrive on the control thread; use the opportunity to release
    // nodes whose removal grace period has passed.
    engine.collect_garbage();

    match name {
        "ping" => Value::from("pong"),

        "toggle_playback" => {
            engine.toggle_playback();
            ok(true)
        }

        "start_recording_in_node" => match str_param(params, 0) {
            Some(uuid) => ok(engine.start_recording_in_node(uuid)),
            None => ok(false),
        },

        "stop_recording_in_node" => match str_param(params, 0) {
            Some(uuid) => ok(engine.stop_recording_in_node(uuid)),
            None => ok(false),
        },

        "get_graph_state" => engine.graph_state(),

        "get_waveform" => {
            let Some(uuid) = str_param(params, 0) else {
                return Value::Array(Vec::new());
            };
            let num_peaks = int_param(params, 1).unwrap_or(100).max(0) as usize;
            Value::from_peaks(engine.waveform(uuid, num_peaks))
        }

        "enter_box" => match str_param(params, 0) {
            Some(uuid) => ok(engine.enter_box(uuid)),
            None => ok(false),
        },

        "exit_box" => ok(engine.exit_box()),

        "create_node" => {
            let kind = match str_param(params, 0) {
                Some("clip") => NodeKind::Clip,
                Some("box") => NodeKind::Box,
                _ => return ok(false),
            };
            let x = float_param(params, 1);
            let y = float_param(params, 2);
            match engine.create_node(kind, x, y) {
                Some(uuid) => Value::Str(uuid),
                None => ok(false),
            }
        }

        "rename_node" => match (str_param(params, 0), str_param(params, 1)) {
            (Some(uuid), Some(new_name)) => ok(engine.rename_node(uuid, new_name)),
            _ => ok(false),
        },

        "set_node_input" => match (str_param(params, 0), int_param(params, 1)) {
            (Some(uuid), Some(channel)) if channel >= 0 => {
                ok(engine.set_node_input(uuid, channel as usize))
            }
            _ => ok(false),
        },

        "set_loop_points" => match (
            str_param(params, 0),
            int_param(params, 1),
            int_param(params, 2),
        ) {
            (Some(uuid), Some(start), Some(end)) => ok(engine.set_loop_points(uuid, start, end)),
            _ => ok(false),
        },

        "toggle_solo" => match str_param(params, 0) {
            Some(uuid) => ok(engine.toggle_solo(uuid)),
            None => ok(false),
        },

        "toggle_play" => match str_param(params, 0) {
            Some(uuid) => ok(engine.toggle_play(uuid)),
            None => ok(false),
        },

        "delete_node" => match str_param(params, 0) {
            Some(uuid) => ok(engine.delete_node(uuid)),
            None => ok(false),
        },

        "get_input_list" => engine.input_list(),

        _ => {
            log::warn!("Unknown command: {}", name);
            ok(false)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine() -> TransportEngine {
        TransportEngine::new(1000.0)
    }

    #[test]
    fn ping_pongs() {
        let engine = engine();
        assert_eq!(dispatch(&engine, "ping", &[]), Value::from("pong"));
    }

    #[test]
    fn unknown_command_is_falsey() {
        let engine = engine();
        assert!(!dispatch(&engine, "reticulate_splines", &[]).truthy());
    }

    #[test]
    fn missing_params_are_falsey() {
        let engine = engine();
        assert!(!dispatch(&engine, "start_recording_in_node", &[]).truthy());
        assert!(!dispatch(&engine, "rename_node", &[Value::from("id")]).truthy());
        assert!(!dispatch(&engine, "create_node", &[Value::from("widget")]).truthy());
    }

    #[test]
    fn lookup_miss_is_falsey_or_empty() {
        let engine = engine();
        assert!(!dispatch(&engine, "toggle_play", &[Value::from("ghost")]).truthy());
        assert_eq!(
            dispatch(&engine, "get_waveform", &[Value::from("ghost"), Value::Int(8)]),
            Value::Array(Vec::new())
        );
    }

    #[test]
    fn create_node_returns_uuid() {
        let engine = engine();
        let result = dispatch(&engine, "create_node", &[Value::from("clip")]);
        let uuid = result.as_str().expect("uuid string");
        assert!(engine.find(uuid).is_some());
    }

    #[test]
    fn graph_state_reports_transport() {
        let engine = engine();
        dispatch(&engine, "toggle_playback", &[]);
        let state = dispatch(&engine, "get_graph_state", &[]);
        assert_eq!(state.get("isPlaying").and_then(Value::as_bool), Some(true));
        assert_eq!(state.get("type").and_then(Value::as_str), Some("box"));
        assert!(state.get("focusedId").is_some());
    }

    #[test]
    fn input_list_shape() {
        let engine = engine();
        engine.set_input_names(vec!["Mic 1".into(), "Mic 2".into()]);
        let result = dispatch(&engine, "get_input_list", &[]);
        let inputs = result.get("inputs").expect("inputs key");
        assert_eq!(
            inputs,
            &Value::Array(vec![Value::from("Mic 1"), Value::from("Mic 2")])
        );
    }
}
