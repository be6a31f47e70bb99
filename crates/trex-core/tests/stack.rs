//! Integration coverage for the channel-specific bottom-width invariant
//! across a push, which the plain unit tests in stack.rs don't exercise
//! (they only check construction-time validation).

use trex_core::stack::{Layer, Stack};

fn channel_layer(volume: f64, bottom_width: f64) -> Layer {
    Layer {
        thickness: volume / 10.0,
        volume,
        porosity: 0.4,
        bottom_width: Some(bottom_width),
        gsd: vec![1.0],
        min_volume: 1.0,
        max_volume: 10.0,
        bed_elevation: 0.0,
    }
}

#[test]
fn push_then_recompute_keeps_bottom_width_within_channel_bound() {
    let mut stack = Stack::new(vec![channel_layer(5.0, 2.0)], Some(4.0)).unwrap();
    let flag = stack.volume_change(1, 6.0); // 5.0 + 6.0 = 11.0 > max_volume(10.0)
    assert_eq!(flag, trex_core::stack::StackFlag::Push);
    stack.push(vec![1.0], 0.4, 0.5);
    stack.recompute_channel_bottom_widths().unwrap();
    assert!(stack.layer(2).bottom_width.unwrap() <= 4.0 + 1e-9);
    assert!(stack.layer(2).bottom_width.unwrap() >= stack.layer(1).bottom_width.unwrap() - 1e-9);
}

#[test]
fn gsd_closure_holds_after_repeated_pops() {
    let mut stack = Stack::new(
        vec![
            channel_layer(10.0, 1.0),
            channel_layer(2.0, 1.0),
            channel_layer(0.3, 1.0),
        ],
        Some(3.0),
    )
    .unwrap();
    stack.pop();
    stack.pop();
    assert_eq!(stack.nstack(), 1);
    assert!(stack.gsd_closure_ok());
}
