//! Quantum derivation and the hysteresis stop/commit paths.

use loopbox::audio::node::{Node, ProcessContext};
use std::sync::Arc;

const SR: f64 = 1000.0;

fn capture(node: &Arc<Node>, input: &[f32], master_pos: i64) {
    let mut ctx = ProcessContext::new(SR, input.len());
    ctx.is_recording = true;
    ctx.master_pos = master_pos;
    node.as_clip().unwrap().process(&[input], &mut [], 0, &ctx);
}

fn record(node: &Arc<Node>, len: usize, master_pos: i64) {
    let clip = node.as_clip().unwrap();
    clip.start_recording();
    capture(node, &vec![0.0f32; len], master_pos);
    clip.stop_recording(master_pos + len as i64);
}

fn add_clip(root: &Arc<Node>, name: &str) -> Arc<Node> {
    let node = Node::new_clip(name, SR);
    Node::add_child(root, node.clone());
    node
}

#[test]
fn recursive_discovery() {
    let root = Node::new_box("root");
    let clip1 = add_clip(&root, "clip1");

    let sub_box = Node::new_box("sub");
    let clip2 = Node::new_clip("clip2", SR);
    Node::add_child(&sub_box, clip2.clone());
    Node::add_child(&root, sub_box.clone());

    assert_eq!(root.effective_quantum(), 0);
    assert_eq!(clip2.effective_quantum(), 0);

    record(&clip1, 100, 0);
    assert_eq!(clip1.intrinsic_duration(), 100);
    assert_eq!(root.effective_quantum(), 100);
    assert_eq!(sub_box.effective_quantum(), 100);
    assert_eq!(clip2.effective_quantum(), 100);
}

#[test]
fn nearest_container_quantum_wins() {
    let root = Node::new_box("root");
    let outer = add_clip(&root, "outer");
    record(&outer, 1000, 0);

    let sub_box = Node::new_box("sub");
    Node::add_child(&root, sub_box.clone());
    let inner = Node::new_clip("inner", SR);
    Node::add_child(&sub_box, inner.clone());

    // Before the sub-box resolves its own quantum, the ancestor's applies.
    assert_eq!(inner.effective_quantum(), 1000);

    record(&inner, 500, 0);
    let second = Node::new_clip("second", SR);
    Node::add_child(&sub_box, second.clone());
    assert_eq!(sub_box.effective_quantum(), 500);
    assert_eq!(second.effective_quantum(), 500);

    // Siblings of the sub-box still see the root grid.
    let sibling = add_clip(&root, "sibling");
    assert_eq!(sibling.effective_quantum(), 1000);
}

#[test]
fn quantum_origin() {
    // First recording in an empty root defines the grid.
    let root = Node::new_box("root");
    let clip = add_clip(&root, "origin");
    record(&clip, 1000, 0);

    assert_eq!(root.effective_quantum(), 1000);
    assert_eq!(clip.core().duration(), 1000);
    assert!(clip.as_clip().unwrap().is_playing());
    assert_eq!(clip.core().launch_point(), 0);
}

#[test]
fn late_snap_within_tolerance() {
    // 1100 captured against Q = 1000: |1100 - 1000| = 100 < 150, so the
    // commit snaps back to the clean multiple.
    let root = Node::new_box("root");
    let master = add_clip(&root, "master");
    record(&master, 1000, 0);

    let slave = add_clip(&root, "slave");
    record(&slave, 1100, 0);

    assert_eq!(slave.core().duration(), 1000);
    assert_eq!(slave.core().loop_end(), 1000);
    assert!(slave.as_clip().unwrap().is_playing());
}

#[test]
fn anticipatory_stop_holds_until_boundary() {
    // 950 captured against Q = 1000: the boundary is 50 samples ahead,
    // inside the tolerance window, so the stop is deferred and capture
    // continues until the boundary crossing commits at exactly 1000.
    let root = Node::new_box("root");
    let master = add_clip(&root, "master");
    record(&master, 1000, 0);

    let slave = add_clip(&root, "slave");
    let clip = slave.as_clip().unwrap();
    clip.start_recording();
    capture(&slave, &vec![0.0f32; 950], 0);

    clip.stop_recording(950);
    assert!(clip.is_awaiting_stop());
    assert!(clip.is_capturing());
    assert!(clip.core().is_recording());

    capture(&slave, &vec![0.0f32; 100], 950);
    assert!(!clip.core().is_recording());
    assert!(!clip.is_awaiting_stop());
    assert_eq!(clip.core().duration(), 1000);
    assert_eq!(clip.core().loop_end(), 1000);
    assert!(clip.is_playing());
    assert_eq!(clip.core().launch_point(), 0);
}

#[test]
fn raw_stop_outside_tolerance_snaps_loop_region() {
    // 2500 captured against Q = 1000: no candidate within 150 samples, so
    // the raw length stays and only the loop region snaps down.
    let root = Node::new_box("root");
    let master = add_clip(&root, "master");
    record(&master, 1000, 0);

    let slave = add_clip(&root, "slave");
    record(&slave, 2500, 0);

    let clip = slave.as_clip().unwrap();
    assert!(!clip.core().is_recording());
    assert_eq!(clip.core().duration(), 2500);
    assert_eq!(clip.core().loop_start(), 0);
    assert_eq!(clip.core().loop_end(), 2000);
}

#[test]
fn raw_stop_shorter_than_quantum_defaults_to_half() {
    // 700 captured against Q = 1000: outside tolerance of 500 and 1000; the
    // loop region falls back to Q/2.
    let root = Node::new_box("root");
    let master = add_clip(&root, "master");
    record(&master, 1000, 0);

    let slave = add_clip(&root, "slave");
    record(&slave, 700, 0);

    assert_eq!(slave.core().duration(), 700);
    assert_eq!(slave.core().loop_end(), 500);
}

#[test]
fn short_take_waits_for_subdivision() {
    // 230 captured against Q = 1000: the smallest subdivision above the
    // take is Q/4 = 250, only 20 samples ahead, so the stop defers and the
    // commit lands exactly on the subdivision.
    let root = Node::new_box("root");
    let master = add_clip(&root, "master");
    record(&master, 1000, 0);

    let slave = add_clip(&root, "slave");
    let clip = slave.as_clip().unwrap();
    clip.start_recording();
    capture(&slave, &vec![0.0f32; 230], 0);
    clip.stop_recording(230);
    assert!(clip.is_awaiting_stop());
    assert_eq!(clip.awaiting_stop_at(), 250);

    capture(&slave, &vec![0.0f32; 40], 230);
    assert_eq!(clip.core().duration(), 250);
    assert!(clip.is_playing());
}

#[test]
fn exact_subdivision_commits_immediately() {
    // A take of exactly Q/2 has a zero-distance candidate behind it: no
    // reason to keep recording.
    let root = Node::new_box("root");
    let master = add_clip(&root, "master");
    record(&master, 1000, 0);

    let slave = add_clip(&root, "slave");
    record(&slave, 500, 0);

    let clip = slave.as_clip().unwrap();
    assert!(!clip.is_awaiting_stop());
    assert_eq!(clip.core().duration(), 500);
}

#[test]
fn no_quantum_commit_is_raw() {
    let root = Node::new_box("root");
    let clip = add_clip(&root, "free");
    record(&clip, 777, 0);
    assert_eq!(clip.core().duration(), 777);
    assert_eq!(clip.core().loop_end(), 777);
}
