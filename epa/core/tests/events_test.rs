//! Event handle and reference count tests for epa-core

use epa_core::{BlockId, Event, EventRef, RefCount, Signal, INIT_EVENT};

#[test]
fn test_constant_events_carry_their_signal() {
    assert_eq!(INIT_EVENT, EventRef::Const(Signal::INIT));
    assert!(INIT_EVENT.is_const());
    assert_eq!(INIT_EVENT.block(), None);

    let view = Event::constant(Signal::ENTRY);
    assert_eq!(view.signal(), Signal::ENTRY);
    assert_eq!(view.generator(), None);
}

#[test]
fn test_dynamic_handle_exposes_block() {
    let evt = EventRef::Dynamic(BlockId::new(0x40));
    assert!(!evt.is_const());
    assert_eq!(evt.block().map(BlockId::offset), Some(0x40));
}

#[test]
fn test_refcount_reaches_zero_once() {
    let mut rc = RefCount::new();
    assert!(rc.acquire());
    assert!(rc.acquire());
    rc.release();
    assert!(!rc.is_collectable());
    rc.release();
    assert!(rc.is_collectable());
    assert_eq!(rc.count(), 0);
}

#[test]
fn test_refcount_refuses_past_max() {
    let mut rc = RefCount::new();
    for _ in 0..RefCount::MAX {
        assert!(rc.acquire());
    }
    assert!(!rc.acquire());
    assert_eq!(rc.count(), RefCount::MAX);

    rc.release();
    assert!(rc.acquire());
    assert_eq!(rc.count(), RefCount::MAX);
}

#[test]
fn test_signal_display() {
    assert_eq!(format!("{}", Signal::EXIT), "EXIT");
    assert_eq!(format!("{}", Signal::new(42)), "SIG(42)");
}
