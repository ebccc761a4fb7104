//! Executor behavior over real descriptors (loopback UDP sockets).

use std::cell::{Cell, RefCell};
use std::net::UdpSocket;
use std::os::fd::AsRawFd;
use std::rc::Rc;
use std::time::{Duration, Instant};

use redmux::{Callback, Executor, ExecutorError, Trigger, MAX_CALLBACKS};

/// Nonblocking receiver on an ephemeral loopback port, plus a sender
/// already connected to it.
fn udp_pair() -> (Rc<UdpSocket>, UdpSocket) {
    let rx = UdpSocket::bind("127.0.0.1:0").unwrap();
    rx.set_nonblocking(true).unwrap();
    let tx = UdpSocket::bind("127.0.0.1:0").unwrap();
    tx.connect(rx.local_addr().unwrap()).unwrap();
    (Rc::new(rx), tx)
}

/// Drain everything pending so level-triggered readiness goes quiet.
fn drain(rx: &UdpSocket) {
    let mut buf = [0u8; 64];
    while rx.recv(&mut buf).is_ok() {}
}

#[test]
fn poll_without_registrations_and_without_timeout_is_an_error() {
    let executor = Executor::new().unwrap();
    assert!(matches!(
        executor.poll_once(None),
        Err(ExecutorError::NothingToAwait)
    ));
}

#[test]
fn poll_without_registrations_degrades_to_sleep() {
    let executor = Executor::new().unwrap();
    let start = Instant::now();
    let dispatched = executor.poll_once(Some(Duration::from_millis(50))).unwrap();
    assert_eq!(dispatched, 0);
    assert!(start.elapsed() >= Duration::from_millis(40));
}

#[test]
fn active_count_tracks_handle_lifetime() {
    let executor = Executor::new().unwrap();
    let (rx, _tx) = udp_pair();
    assert_eq!(executor.active_count(), 0);

    let handle = executor
        .register_callback(Trigger::Readable(rx.as_raw_fd()), |_| {})
        .unwrap();
    assert_eq!(executor.active_count(), 1);

    drop(handle);
    assert_eq!(executor.active_count(), 0);
}

#[test]
fn readable_callback_fires_with_a_timestamp() {
    let executor = Executor::new().unwrap();
    let (rx, tx) = udp_pair();

    let fired = Rc::new(Cell::new(None::<Instant>));
    let flag = Rc::clone(&fired);
    let sock = Rc::clone(&rx);
    let _handle = executor
        .register_callback(Trigger::Readable(rx.as_raw_fd()), move |now| {
            flag.set(Some(now));
            drain(&sock);
        })
        .unwrap();

    let before = Instant::now();
    tx.send(b"ping").unwrap();
    let dispatched = executor.poll_once(Some(Duration::from_secs(2))).unwrap();
    assert_eq!(dispatched, 1);
    let stamp = fired.get().expect("callback did not fire");
    assert!(stamp >= before);
}

#[test]
fn writable_callback_fires_immediately_on_a_fresh_socket() {
    let executor = Executor::new().unwrap();
    let (rx, _tx) = udp_pair();

    let fired = Rc::new(Cell::new(false));
    let flag = Rc::clone(&fired);
    let _handle = executor
        .register_callback(Trigger::Writable(rx.as_raw_fd()), move |_| flag.set(true))
        .unwrap();

    let dispatched = executor.poll_once(Some(Duration::from_secs(2))).unwrap();
    assert_eq!(dispatched, 1);
    assert!(fired.get());
}

#[test]
fn moved_handle_keeps_the_registration_alive() {
    let executor = Executor::new().unwrap();
    let (rx, tx) = udp_pair();

    let count = Rc::new(Cell::new(0u32));
    let counter = Rc::clone(&count);
    let sock = Rc::clone(&rx);
    let handle = executor
        .register_callback(Trigger::Readable(rx.as_raw_fd()), move |_| {
            counter.set(counter.get() + 1);
            drain(&sock);
        })
        .unwrap();

    // Relocate the handle; the armed token is an index, not an address.
    let parked: Vec<Callback<'_>> = vec![handle];

    tx.send(b"one").unwrap();
    executor.poll_once(Some(Duration::from_secs(2))).unwrap();
    assert_eq!(count.get(), 1);

    tx.send(b"two").unwrap();
    executor.poll_once(Some(Duration::from_secs(2))).unwrap();
    assert_eq!(count.get(), 2);

    drop(parked);
    assert_eq!(executor.active_count(), 0);
}

#[test]
fn dropped_handle_never_fires() {
    let executor = Executor::new().unwrap();
    let (rx, tx) = udp_pair();

    let fired = Rc::new(Cell::new(false));
    let flag = Rc::clone(&fired);
    let handle = executor
        .register_callback(Trigger::Readable(rx.as_raw_fd()), move |_| flag.set(true))
        .unwrap();
    drop(handle);

    tx.send(b"late").unwrap();
    let dispatched = executor.poll_once(Some(Duration::from_millis(50))).unwrap();
    assert_eq!(dispatched, 0);
    assert!(!fired.get());
}

#[test]
fn callback_can_cancel_a_sibling_registration() {
    let executor: &'static Executor = Box::leak(Box::new(Executor::new().unwrap()));
    let (rx_a, tx_a) = udp_pair();
    let (rx_b, tx_b) = udp_pair();

    let b_fired = Rc::new(Cell::new(false));
    let b_flag = Rc::clone(&b_fired);
    let handle_b = executor
        .register_callback(Trigger::Readable(rx_b.as_raw_fd()), move |_| {
            b_flag.set(true);
        })
        .unwrap();

    let parked_b: Rc<RefCell<Option<Callback<'static>>>> =
        Rc::new(RefCell::new(Some(handle_b)));
    let to_cancel = Rc::clone(&parked_b);
    let sock_a = Rc::clone(&rx_a);
    let handle_a = executor
        .register_callback(Trigger::Readable(rx_a.as_raw_fd()), move |_| {
            drain(&sock_a);
            // Cancelling from inside a dispatch is legal and immediate.
            to_cancel.borrow_mut().take();
        })
        .unwrap();

    // Only A is ready; A's callback drops B's handle.
    tx_a.send(b"go").unwrap();
    let dispatched = executor.poll_once(Some(Duration::from_secs(2))).unwrap();
    assert_eq!(dispatched, 1);
    assert_eq!(executor.active_count(), 1);

    // B's socket becoming readable afterwards must not dispatch anything.
    tx_b.send(b"too-late").unwrap();
    let dispatched = executor.poll_once(Some(Duration::from_millis(50))).unwrap();
    assert_eq!(dispatched, 0);
    assert!(!b_fired.get());

    drop(handle_a);
}

#[test]
fn callback_can_register_a_new_callback() {
    let executor: &'static Executor = Box::leak(Box::new(Executor::new().unwrap()));
    let (rx_a, tx_a) = udp_pair();
    let (rx_c, tx_c) = udp_pair();

    let c_fired = Rc::new(Cell::new(false));
    let parked: Rc<RefCell<Vec<Callback<'static>>>> = Rc::new(RefCell::new(Vec::new()));

    let store = Rc::clone(&parked);
    let c_flag = Rc::clone(&c_fired);
    let sock_a = Rc::clone(&rx_a);
    let sock_c = Rc::clone(&rx_c);
    let handle_a = executor
        .register_callback(Trigger::Readable(rx_a.as_raw_fd()), move |_| {
            drain(&sock_a);
            let flag = Rc::clone(&c_flag);
            let sock = Rc::clone(&sock_c);
            let handle = executor
                .register_callback(Trigger::Readable(sock.as_raw_fd()), move |_| {
                    flag.set(true);
                    drain(&sock);
                })
                .unwrap();
            store.borrow_mut().push(handle);
        })
        .unwrap();

    // C's socket is already readable, but C is armed mid-dispatch and
    // must not fire before the next poll cycle.
    tx_c.send(b"early").unwrap();
    tx_a.send(b"go").unwrap();
    let dispatched = executor.poll_once(Some(Duration::from_secs(2))).unwrap();
    assert_eq!(dispatched, 1);
    assert!(!c_fired.get());

    let dispatched = executor.poll_once(Some(Duration::from_secs(2))).unwrap();
    assert_eq!(dispatched, 1);
    assert!(c_fired.get());

    drop(handle_a);
    parked.borrow_mut().clear();
    assert_eq!(executor.active_count(), 0);
}

#[test]
fn capacity_is_bounded_and_slots_are_reusable() {
    let executor = Executor::new().unwrap();
    let sockets: Vec<_> = (0..=MAX_CALLBACKS).map(|_| udp_pair().0).collect();

    let mut handles = Vec::new();
    for sock in sockets.iter().take(MAX_CALLBACKS) {
        handles.push(
            executor
                .register_callback(Trigger::Readable(sock.as_raw_fd()), |_| {})
                .unwrap(),
        );
    }
    assert_eq!(executor.active_count(), MAX_CALLBACKS);

    let overflow =
        executor.register_callback(Trigger::Readable(sockets[MAX_CALLBACKS].as_raw_fd()), |_| {});
    assert!(matches!(
        overflow,
        Err(ExecutorError::CapacityExhausted { capacity }) if capacity == MAX_CALLBACKS
    ));

    // Freeing one slot makes room again.
    handles.pop();
    let replacement = executor
        .register_callback(Trigger::Readable(sockets[MAX_CALLBACKS].as_raw_fd()), |_| {})
        .unwrap();
    assert_eq!(executor.active_count(), MAX_CALLBACKS);
    drop(replacement);
}
