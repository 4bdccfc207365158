//! Integration tests for the distributor rate regimes.
//!
//! Ticks are injected by hand with software synthesis disabled, so every
//! delivered timestamp is one the test chose.

use metronome_core::{Controller, Generator};
use metronome_dispatch::{decode_timestamps, Connection, Distributor};
use metronome_shared::{
    DistributorConfig, GeneratorConfig, NoopPriorityHint, PriorityHint, VsyncError,
};
use std::io::ErrorKind;
use std::os::unix::net::UnixDatagram;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// Time for the distributor thread to consume one injected tick.
const SETTLE: Duration = Duration::from_millis(20);

fn distributor(name: &str) -> (Arc<Generator>, Distributor) {
    let hint: Arc<dyn PriorityHint> = Arc::new(NoopPriorityHint);
    let generator = Generator::new(GeneratorConfig::default(), hint.clone()).unwrap();
    let controller = Controller::new(&generator, 0);
    let config = DistributorConfig::default().without_soft_vsync();
    let distributor = Distributor::new(controller, name, &config, hint).unwrap();
    (generator, distributor)
}

fn receiver(connection: &Connection) -> UnixDatagram {
    let socket = UnixDatagram::from(connection.get_receive_fd().unwrap());
    socket.set_nonblocking(true).unwrap();
    socket
}

/// Drains everything queued on the socket.
fn drain(socket: &UnixDatagram) -> Vec<i64> {
    let mut out = Vec::new();
    let mut buf = [0u8; 256];
    loop {
        match socket.recv(&mut buf) {
            Ok(n) => out.extend(decode_timestamps(&buf[..n])),
            Err(e) if e.kind() == ErrorKind::WouldBlock => return out,
            Err(e) => panic!("recv failed: {e}"),
        }
    }
}

fn tick(distributor: &Distributor, timestamp: i64) {
    distributor.on_vsync_event(timestamp);
    thread::sleep(SETTLE);
}

#[test]
fn test_one_shot_delivers_exactly_once() {
    let (_generator, distributor) = distributor("one-shot");
    let conn = Connection::new(&distributor, "app");
    distributor.add_connection(&conn).unwrap();
    let rx = receiver(&conn);

    distributor.request_next_vsync(&conn).unwrap();
    tick(&distributor, 1000);

    let mut buf = [0u8; 64];
    let n = rx.recv(&mut buf).unwrap();
    assert_eq!(n, 8);
    assert_eq!(i64::from_ne_bytes(buf[..8].try_into().unwrap()), 1000);
    assert!(drain(&rx).is_empty());

    let info = &distributor.get_vsync_connection_infos()[0];
    assert_eq!(info.rate, -1);
    assert_eq!(info.post_count, 1);
}

#[test]
fn test_periodic_rate_divides_ticks() {
    let (_generator, distributor) = distributor("periodic");
    let conn = Connection::new(&distributor, "app");
    distributor.add_connection(&conn).unwrap();
    let rx = receiver(&conn);

    distributor.set_vsync_rate(3, &conn).unwrap();
    thread::sleep(SETTLE);
    for count in 1..=6 {
        tick(&distributor, count * 1000);
    }

    assert_eq!(drain(&rx), vec![3000, 6000]);
    assert_eq!(distributor.get_vsync_connection_infos()[0].rate, 3);
}

#[test]
fn test_request_is_idempotent_while_armed() {
    let (_generator, distributor) = distributor("idempotent");
    let conn = Connection::new(&distributor, "app");
    distributor.add_connection(&conn).unwrap();
    let rx = receiver(&conn);

    distributor.request_next_vsync(&conn).unwrap();
    distributor.request_next_vsync(&conn).unwrap();
    tick(&distributor, 10);
    tick(&distributor, 20);

    assert_eq!(drain(&rx), vec![10]);
}

#[test]
fn test_request_on_periodic_connection_is_noop() {
    let (_generator, distributor) = distributor("periodic-request");
    let conn = Connection::new(&distributor, "app");
    distributor.add_connection(&conn).unwrap();

    distributor.set_vsync_rate(2, &conn).unwrap();
    distributor.request_next_vsync(&conn).unwrap();
    assert_eq!(distributor.get_vsync_connection_infos()[0].rate, 2);
}

#[test]
fn test_duplicate_rate_rejected() {
    let (_generator, distributor) = distributor("dup-rate");
    let conn = Connection::new(&distributor, "app");
    distributor.add_connection(&conn).unwrap();

    assert_eq!(distributor.set_vsync_rate(2, &conn), Ok(()));
    assert_eq!(
        distributor.set_vsync_rate(2, &conn),
        Err(VsyncError::InvalidArguments)
    );
    assert_eq!(
        distributor.set_vsync_rate(0, &conn),
        Err(VsyncError::InvalidArguments)
    );
    assert_eq!(
        distributor.set_high_priority_vsync_rate(-1, &conn),
        Err(VsyncError::InvalidArguments)
    );
}

#[test]
fn test_add_remove_validation() {
    let (_generator, distributor) = distributor("membership");
    let conn = Connection::new(&distributor, "app");

    assert_eq!(
        distributor.request_next_vsync(&conn),
        Err(VsyncError::InvalidArguments)
    );
    assert_eq!(
        distributor.remove_connection(&conn),
        Err(VsyncError::InvalidArguments)
    );
    assert_eq!(distributor.add_connection(&conn), Ok(()));
    assert_eq!(
        distributor.add_connection(&conn),
        Err(VsyncError::InvalidArguments)
    );
    assert_eq!(distributor.remove_connection(&conn), Ok(()));
    assert_eq!(distributor.connection_count(), 0);
}

#[test]
fn test_insertion_order_within_tick() {
    let (_generator, distributor) = distributor("order");
    let names = ["first", "second", "third"];
    let conns: Vec<_> = names
        .iter()
        .map(|name| Connection::new(&distributor, *name))
        .collect();
    for conn in &conns {
        distributor.add_connection(conn).unwrap();
        distributor.set_vsync_rate(1, conn).unwrap();
    }

    let infos = distributor.get_vsync_connection_infos();
    let listed: Vec<_> = infos.iter().map(|i| i.name.as_str()).collect();
    assert_eq!(listed, names);

    tick(&distributor, 500);
    for conn in &conns {
        assert_eq!(conn.post_count(), 1);
    }
}

#[test]
fn test_qos_rate_overrides_reported_rate() {
    let (_generator, distributor) = distributor("qos");
    let wm = Connection::new(&distributor, "WM_4242");
    let app = Connection::new(&distributor, "app_4242");
    distributor.add_connection(&wm).unwrap();
    distributor.add_connection(&app).unwrap();

    distributor.set_vsync_rate(2, &wm).unwrap();
    assert_eq!(distributor.get_qos_vsync_rate_infos(), vec![(4242, 2)]);

    distributor.set_qos_vsync_rate(4242, 5).unwrap();
    assert_eq!(distributor.get_qos_vsync_rate_infos(), vec![(4242, 5)]);

    // Unknown pid is accepted and changes nothing
    distributor.set_qos_vsync_rate(1, 9).unwrap();
    assert_eq!(distributor.get_qos_vsync_rate_infos(), vec![(4242, 5)]);
    assert_eq!(
        distributor.set_qos_vsync_rate(4242, 0),
        Err(VsyncError::InvalidArguments)
    );

    let info = &distributor.get_vsync_connection_infos()[0];
    assert_eq!(info.rate, 2);
    assert!(info.high_priority_state);
    assert_eq!(info.high_priority_rate, 5);
}

#[test]
fn test_qos_rate_drives_delivery() {
    let (_generator, distributor) = distributor("qos-delivery");
    let wm = Connection::new(&distributor, "WM_77");
    distributor.add_connection(&wm).unwrap();
    let rx = receiver(&wm);

    distributor.set_vsync_rate(1, &wm).unwrap();
    distributor.set_qos_vsync_rate(77, 2).unwrap();
    thread::sleep(SETTLE);
    for count in 1..=4 {
        tick(&distributor, count * 100);
    }
    assert_eq!(drain(&rx), vec![200, 400]);
}

#[test]
fn test_full_channel_rearms_one_shot() {
    let (_generator, distributor) = distributor("backpressure");
    let conn = Connection::new(&distributor, "slow");
    distributor.add_connection(&conn).unwrap();
    let rx = receiver(&conn);

    // Fill the socket buffer
    while conn.post_event(1).is_ok() {}
    let filled = conn.post_count();

    distributor.request_next_vsync(&conn).unwrap();
    tick(&distributor, 2);
    // Post failed with would-block; the request is kept for the next tick
    assert_eq!(distributor.get_vsync_connection_infos()[0].rate, 0);
    assert_eq!(conn.post_count(), filled);

    assert_eq!(drain(&rx).len() as u64, filled);
    tick(&distributor, 3);
    assert_eq!(drain(&rx), vec![3]);
    assert_eq!(distributor.get_vsync_connection_infos()[0].rate, -1);
}

#[test]
fn test_unwanted_tick_disables_controller() {
    let (generator, distributor) = distributor("power");
    let conn = Connection::new(&distributor, "app");
    distributor.add_connection(&conn).unwrap();

    distributor.request_next_vsync(&conn).unwrap();
    thread::sleep(SETTLE);
    assert!(distributor.is_vsync_enabled());
    assert_eq!(generator.listener_count(), 1);

    // First tick satisfies the request, second finds nobody waiting
    tick(&distributor, 100);
    tick(&distributor, 200);
    assert!(!distributor.is_vsync_enabled());
    assert_eq!(generator.listener_count(), 0);
}
