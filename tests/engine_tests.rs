//! End-to-end behavior through the transport engine and the command surface.

use loopbox::audio::node::NodeKind;
use loopbox::audio::TransportEngine;
use loopbox::commands::dispatch;
use loopbox::value::Value;

const SR: f64 = 1000.0;

fn run_block(engine: &TransportEngine, input: &[f32]) {
    let mut outputs = vec![0.0f32; 2 * input.len()];
    engine.on_block(&[input], &mut outputs, 2, input.len());
}

fn run_silence(engine: &TransportEngine, frames: usize) {
    run_block(engine, &vec![0.0f32; frames]);
}

fn node_duration(engine: &TransportEngine, uuid: &str) -> i64 {
    engine.find(uuid).unwrap().core().duration()
}

#[test]
fn quantum_origin_through_commands() {
    let engine = TransportEngine::new(SR);
    let uuid = dispatch(&engine, "create_node", &[Value::from("clip")])
        .as_str()
        .expect("uuid")
        .to_string();

    assert!(!engine.is_playing());
    assert!(dispatch(&engine, "start_recording_in_node", &[Value::from(uuid.as_str())]).truthy());
    assert!(engine.is_playing(), "recording auto-starts the transport");

    run_block(&engine, &[0.5f32; 1000]);
    assert_eq!(engine.master_pos(), 1000);

    assert!(dispatch(&engine, "stop_recording_in_node", &[Value::from(uuid.as_str())]).truthy());

    assert_eq!(engine.root().effective_quantum(), 1000);
    assert_eq!(node_duration(&engine, &uuid), 1000);

    let state = dispatch(&engine, "get_graph_state", &[]);
    let nodes = state.get("nodes").expect("nodes array");
    let Value::Array(children) = nodes else {
        panic!("nodes should be an array");
    };
    assert_eq!(children.len(), 1);
    let clip_meta = &children[0];
    assert_eq!(clip_meta.get("duration").and_then(|v| v.as_i64()), Some(1000));
    assert_eq!(clip_meta.get("isPlaying").and_then(|v| v.as_bool()), Some(true));
    assert_eq!(
        clip_meta.get("effectiveQuantum").and_then(|v| v.as_i64()),
        Some(1000)
    );

    let peaks = dispatch(
        &engine,
        "get_waveform",
        &[Value::from(uuid.as_str()), Value::Int(4)],
    );
    let Value::Array(peaks) = peaks else {
        panic!("peaks should be an array");
    };
    assert_eq!(peaks.len(), 4);
    for peak in &peaks {
        assert!((peak.as_f64().unwrap() - 0.5).abs() < 1e-6);
    }
}

#[test]
fn toggle_playback_stop_rewinds_master() {
    let engine = TransportEngine::new(SR);
    dispatch(&engine, "toggle_playback", &[]);
    run_silence(&engine, 300);
    assert_eq!(engine.master_pos(), 300);

    dispatch(&engine, "toggle_playback", &[]);
    assert!(!engine.is_playing());
    assert_eq!(engine.master_pos(), 0);
}

#[test]
fn lcm_synchronization() {
    // Clip 1 defines Q. Clip 2 spans 4Q. Clip 3 spans 8Q and is recorded
    // from master 2Q, so its buffer rotates by 2Q and its launch point is
    // 6Q, putting all three in phase on the shared grid.
    let engine = TransportEngine::new(SR);
    let q: i64 = 1000;

    let c1 = engine.create_node(NodeKind::Clip, None, None).unwrap();
    engine.start_recording_in_node(&c1);
    run_silence(&engine, 1000);
    engine.stop_recording_in_node(&c1);
    assert_eq!(node_duration(&engine, &c1), q);

    engine.toggle_playback(); // stop: master back to 0
    engine.toggle_playback();

    let c2 = engine.create_node(NodeKind::Clip, None, None).unwrap();
    engine.start_recording_in_node(&c2);
    for _ in 0..4 {
        run_silence(&engine, 1000);
    }
    engine.stop_recording_in_node(&c2);
    assert_eq!(node_duration(&engine, &c2), 4 * q);
    assert_eq!(engine.find(&c2).unwrap().core().launch_point(), 0);

    engine.toggle_playback();
    engine.toggle_playback();
    run_silence(&engine, 2000);
    assert_eq!(engine.master_pos(), 2 * q);

    let c3 = engine.create_node(NodeKind::Clip, None, None).unwrap();
    engine.start_recording_in_node(&c3);
    for _ in 0..8 {
        run_silence(&engine, 1000);
    }
    engine.stop_recording_in_node(&c3);

    let clip3 = engine.find(&c3).unwrap();
    assert_eq!(clip3.core().duration(), 8 * q);
    assert_eq!(clip3.core().launch_point(), 6 * q);
    assert_eq!(clip3.core().anchor_phase(), 0); // rotation reset the anchor
    assert_eq!((engine.master_pos() + 6 * q) % (8 * q), 0);

    // One more frame: clip 1 and clip 3 sit at phase 0, clip 2 halfway.
    run_silence(&engine, 1);
    assert_eq!(engine.find(&c1).unwrap().core().playhead(), 0.0);
    assert_eq!(engine.find(&c2).unwrap().core().playhead(), 0.5);
    assert_eq!(clip3.core().playhead(), 0.0);
}

#[test]
fn solo_round_trip() {
    let engine = TransportEngine::new(SR);
    let uuid = engine.create_node(NodeKind::Clip, None, None).unwrap();

    assert!(dispatch(&engine, "toggle_solo", &[Value::from(uuid.as_str())]).truthy());
    let state = dispatch(&engine, "get_graph_state", &[]);
    assert_eq!(
        state.get("soloedId").and_then(|v| v.as_str()),
        Some(uuid.as_str())
    );

    assert!(dispatch(&engine, "toggle_solo", &[Value::from(uuid.as_str())]).truthy());
    let state = dispatch(&engine, "get_graph_state", &[]);
    assert_eq!(state.get("soloedId").and_then(|v| v.as_str()), Some(""));

    assert!(!dispatch(&engine, "toggle_solo", &[Value::from("missing")]).truthy());
}

#[test]
fn box_navigation_and_scoped_creation() {
    let engine = TransportEngine::new(SR);
    let box_id = dispatch(&engine, "create_node", &[Value::from("box")])
        .as_str()
        .unwrap()
        .to_string();

    assert!(dispatch(&engine, "enter_box", &[Value::from(box_id.as_str())]).truthy());
    let state = dispatch(&engine, "get_graph_state", &[]);
    assert_eq!(
        state.get("focusedId").and_then(|v| v.as_str()),
        Some(box_id.as_str())
    );

    let inner = dispatch(&engine, "create_node", &[Value::from("clip")])
        .as_str()
        .unwrap()
        .to_string();
    let parent = engine
        .find(&inner)
        .unwrap()
        .core()
        .parent_node()
        .unwrap();
    assert_eq!(parent.core().uuid(), box_id);

    assert!(dispatch(&engine, "exit_box", &[]).truthy());
    assert!(!dispatch(&engine, "exit_box", &[]).truthy());
}

#[test]
fn rename_and_input_channel() {
    let engine = TransportEngine::new(SR);
    let uuid = engine.create_node(NodeKind::Clip, None, None).unwrap();

    assert!(dispatch(
        &engine,
        "rename_node",
        &[Value::from(uuid.as_str()), Value::from("Bassline")]
    )
    .truthy());
    assert_eq!(engine.find(&uuid).unwrap().core().name(), "Bassline");

    assert!(dispatch(
        &engine,
        "set_node_input",
        &[Value::from(uuid.as_str()), Value::Int(1)]
    )
    .truthy());
    let node = engine.find(&uuid).unwrap();
    assert_eq!(node.as_clip().unwrap().input_channel(), 1);
}

#[test]
fn preferred_channel_clamps_to_available_inputs() {
    let engine = TransportEngine::new(SR);
    let uuid = engine.create_node(NodeKind::Clip, None, None).unwrap();
    engine.set_node_input(&uuid, 5);

    engine.start_recording_in_node(&uuid);
    // Only one hardware channel: the preferred index clamps down to it.
    run_block(&engine, &[0.7f32; 100]);
    engine.stop_recording_in_node(&uuid);

    assert_eq!(node_duration(&engine, &uuid), 100);
    let node = engine.find(&uuid).unwrap();
    assert_eq!(node.as_clip().unwrap().buffer().get(0), 0.7);
}

#[test]
fn set_loop_points_validates() {
    let engine = TransportEngine::new(SR);
    let uuid = engine.create_node(NodeKind::Clip, None, None).unwrap();

    // Uncommitted clip: nothing to constrain.
    assert!(!engine.set_loop_points(&uuid, 0, 10));

    engine.start_recording_in_node(&uuid);
    run_silence(&engine, 1000);
    engine.stop_recording_in_node(&uuid);

    assert!(engine.set_loop_points(&uuid, 200, 600));
    let node = engine.find(&uuid).unwrap();
    assert_eq!(node.core().loop_start(), 200);
    assert_eq!(node.core().loop_end(), 600);

    // Clamped into the committed duration.
    assert!(engine.set_loop_points(&uuid, 500, 5000));
    assert_eq!(node.core().loop_end(), 1000);

    assert!(!engine.set_loop_points(&uuid, 700, 300));
    assert!(!engine.set_loop_points("missing", 0, 10));
}

#[test]
fn toggle_play_pauses_and_resumes() {
    let engine = TransportEngine::new(SR);
    let uuid = engine.create_node(NodeKind::Clip, None, None).unwrap();

    assert!(!engine.toggle_play(&uuid), "nothing recorded yet");

    engine.start_recording_in_node(&uuid);
    run_silence(&engine, 500);
    engine.stop_recording_in_node(&uuid);

    let node = engine.find(&uuid).unwrap();
    assert!(node.as_clip().unwrap().is_playing());

    assert!(engine.toggle_play(&uuid));
    assert!(!node.as_clip().unwrap().is_playing());
    assert!(engine.toggle_play(&uuid));
    assert!(node.as_clip().unwrap().is_playing());
}

#[test]
fn delete_node_through_commands() {
    let engine = TransportEngine::new(SR);
    let keep = engine.create_node(NodeKind::Clip, None, None).unwrap();
    let gone = engine.create_node(NodeKind::Clip, None, None).unwrap();

    assert!(dispatch(&engine, "delete_node", &[Value::from(gone.as_str())]).truthy());
    assert!(engine.find(&gone).is_none());
    assert!(engine.find(&keep).is_some());

    let state = dispatch(&engine, "get_graph_state", &[]);
    assert_eq!(state.get("childCount").and_then(|v| v.as_i64()), Some(1));
}

#[test]
fn unknown_uuid_commands_are_noops() {
    let engine = TransportEngine::new(SR);
    assert!(!dispatch(&engine, "start_recording_in_node", &[Value::from("ghost")]).truthy());
    assert!(!dispatch(&engine, "stop_recording_in_node", &[Value::from("ghost")]).truthy());
    assert!(!dispatch(&engine, "rename_node", &[Value::from("ghost"), Value::from("x")]).truthy());
    assert!(!dispatch(&engine, "enter_box", &[Value::from("ghost")]).truthy());
    assert!(!engine.is_playing(), "failed record request must not start transport");
}

#[test]
fn get_input_list_defaults_empty() {
    let engine = TransportEngine::new(SR);
    let result = dispatch(&engine, "get_input_list", &[]);
    assert_eq!(result.get("inputs"), Some(&Value::Array(Vec::new())));
}
