//! End-to-end transfer tests: server and client exchanging device messages
//! over real localhost sockets.

use std::io::Write;
use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam_channel::unbounded;

use prahari::net::connection::Connection;
use prahari::{
    DeviceClient, DeviceError, DeviceMessage, DeviceServer, Dispatcher, ErrorKind, Measurement,
    Serializer,
};

fn measurement_message() -> DeviceMessage {
    let mut m = Measurement::new("d1").unwrap();
    m.temperature_sensors = vec![1, 2, 3];
    m.fan_speeds = vec![1];
    DeviceMessage::Measurement(m)
}

fn error_message() -> DeviceMessage {
    DeviceMessage::Error(DeviceError::new("d1", ErrorKind::Exploded).unwrap())
}

/// Spin up a listening server and a connected client on the given port.
/// Returns them together with a channel of server-received messages.
fn connected_pair(
    dispatcher: &Dispatcher,
    port: u16,
) -> (
    DeviceServer,
    DeviceClient,
    crossbeam_channel::Receiver<DeviceMessage>,
) {
    let server = DeviceServer::new(dispatcher, Serializer::default());
    let client = DeviceClient::new(dispatcher, Serializer::default());

    let (msg_tx, msg_rx) = unbounded();
    server.on_message(move |message| {
        let _ = msg_tx.send(message);
    });

    let (connect_tx, connect_rx) = unbounded();
    client.on_connect(move || {
        let _ = connect_tx.send(());
    });

    server.listen("127.0.0.1", port);
    thread::sleep(Duration::from_millis(200));

    client.connect("127.0.0.1", port).unwrap();
    connect_rx
        .recv_timeout(Duration::from_secs(5))
        .expect("client did not connect");

    (server, client, msg_rx)
}

#[test]
fn test_measurement_transfer() {
    let dispatcher = Dispatcher::new(4).unwrap();
    let (_server, client, messages) = connected_pair(&dispatcher, 12345);

    client.send(measurement_message());

    let received = messages
        .recv_timeout(Duration::from_secs(5))
        .expect("server did not receive the message");
    assert_eq!(received, measurement_message());

    // exactly once
    assert!(messages.recv_timeout(Duration::from_millis(300)).is_err());
}

#[test]
fn test_error_transfer() {
    let dispatcher = Dispatcher::new(4).unwrap();
    let (_server, client, messages) = connected_pair(&dispatcher, 12346);

    client.send(error_message());

    let received = messages.recv_timeout(Duration::from_secs(5)).unwrap();
    assert_eq!(received, error_message());
}

#[test]
fn test_multiple_messages_arrive_in_order() {
    let dispatcher = Dispatcher::new(4).unwrap();
    let (_server, client, messages) = connected_pair(&dispatcher, 12347);

    // all queued before the peer acknowledges anything
    client.send(error_message());
    client.send(measurement_message());
    client.send(measurement_message());
    client.send(error_message());

    let received: Vec<DeviceMessage> = (0..4)
        .map(|_| messages.recv_timeout(Duration::from_secs(5)).unwrap())
        .collect();

    assert_eq!(
        received,
        vec![
            error_message(),
            measurement_message(),
            measurement_message(),
            error_message(),
        ]
    );
}

#[test]
fn test_sends_hit_the_wire_in_call_order() {
    let dispatcher = Dispatcher::new(4).unwrap();
    let (_server, client, messages) = connected_pair(&dispatcher, 12348);

    let batch: Vec<DeviceMessage> = (0..3)
        .map(|i| {
            let mut m = Measurement::new("d1").unwrap();
            m.temperature_sensors = vec![i];
            DeviceMessage::Measurement(m)
        })
        .collect();

    for message in &batch {
        client.send(message.clone());
    }

    let received: Vec<DeviceMessage> = (0..3)
        .map(|_| messages.recv_timeout(Duration::from_secs(5)).unwrap())
        .collect();
    assert_eq!(received, batch);
}

#[test]
fn test_invalid_server_ip_reports_error_without_connecting() {
    let dispatcher = Dispatcher::new(2).unwrap();
    let client = DeviceClient::new(&dispatcher, Serializer::default());

    let (error_tx, error_rx) = unbounded();
    client.on_error(move || {
        let _ = error_tx.send(());
    });
    let connected = Arc::new(AtomicUsize::new(0));
    let c = Arc::clone(&connected);
    client.on_connect(move || {
        c.fetch_add(1, Ordering::SeqCst);
    });

    // "1.2.3" is not a valid IPv4 literal
    client.connect("1.2.3", 12345).unwrap();

    error_rx
        .recv_timeout(Duration::from_secs(2))
        .expect("on_error did not fire");
    assert_eq!(connected.load(Ordering::SeqCst), 0);
    assert!(!client.is_connected());
}

#[test]
fn test_connection_refused_reports_error() {
    let dispatcher = Dispatcher::new(2).unwrap();
    let client = DeviceClient::new(&dispatcher, Serializer::default());

    let (error_tx, error_rx) = unbounded();
    client.on_error(move || {
        let _ = error_tx.send(());
    });

    // nothing listens on this port
    client.connect("127.0.0.1", 49377).unwrap();

    error_rx
        .recv_timeout(Duration::from_secs(5))
        .expect("on_error did not fire");
    assert!(!client.is_connected());
}

#[test]
fn test_duplicate_connect_rejected_without_disturbing_first() {
    let dispatcher = Dispatcher::new(4).unwrap();
    let server = DeviceServer::new(&dispatcher, Serializer::default());
    let client = DeviceClient::new(&dispatcher, Serializer::default());

    let (connect_tx, connect_rx) = unbounded();
    client.on_connect(move || {
        let _ = connect_tx.send(());
    });

    server.listen("127.0.0.1", 12351);
    thread::sleep(Duration::from_millis(200));

    client.connect("127.0.0.1", 12351).unwrap();
    // second call races the first attempt's completion: rejected either way
    assert!(client.connect("127.0.0.1", 12351).is_err());

    // the first attempt still completes
    connect_rx
        .recv_timeout(Duration::from_secs(5))
        .expect("first connect attempt was disturbed");
    assert!(client.connect("127.0.0.1", 12351).is_err());
}

#[test]
fn test_no_callbacks_after_connection_destroyed() {
    let dispatcher = Dispatcher::new(4).unwrap();

    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    let accept = thread::spawn(move || listener.accept().unwrap().0);
    let stream = TcpStream::connect(addr).unwrap();
    let mut peer = accept.join().unwrap();

    let connection = Connection::new(stream, &dispatcher, Serializer::default()).unwrap();
    let callbacks = Arc::new(AtomicUsize::new(0));
    let c = Arc::clone(&callbacks);
    connection.on_message(move |_| {
        c.fetch_add(1, Ordering::SeqCst);
    });
    let c = Arc::clone(&callbacks);
    connection.on_close(move |_| {
        c.fetch_add(1, Ordering::SeqCst);
    });
    let c = Arc::clone(&callbacks);
    connection.on_error(move |_| {
        c.fetch_add(1, Ordering::SeqCst);
    });

    connection.start_receive();
    // leave a write in flight as well
    connection.send(measurement_message());
    thread::sleep(Duration::from_millis(100));

    drop(connection);

    // complete both I/O directions externally
    let frame = Serializer::default().encode(&measurement_message()).unwrap();
    let _ = peer.write_all(&frame);
    drop(peer);

    thread::sleep(Duration::from_millis(300));
    assert_eq!(callbacks.load(Ordering::SeqCst), 0);
}

#[test]
fn test_one_failing_connection_leaves_others_alive() {
    let dispatcher = Dispatcher::new(4).unwrap();
    let server = DeviceServer::new(&dispatcher, Serializer::default());

    let (msg_tx, msg_rx) = unbounded();
    server.on_message(move |message| {
        let _ = msg_tx.send(message);
    });
    server.listen("127.0.0.1", 12353);
    thread::sleep(Duration::from_millis(200));

    let make_client = || {
        let client = DeviceClient::new(&dispatcher, Serializer::default());
        let (tx, rx) = unbounded();
        client.on_connect(move || {
            let _ = tx.send(());
        });
        client.connect("127.0.0.1", 12353).unwrap();
        rx.recv_timeout(Duration::from_secs(5)).unwrap();
        client
    };
    let dying = make_client();
    let surviving = make_client();

    wait_until(|| server.connection_count() == 2);
    drop(dying);
    wait_until(|| server.connection_count() == 1);

    surviving.send(measurement_message());
    let received = msg_rx.recv_timeout(Duration::from_secs(5)).unwrap();
    assert_eq!(received, measurement_message());
}

fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..500 {
        if condition() {
            return;
        }
        thread::sleep(Duration::from_millis(10));
    }
    panic!("condition not reached within timeout");
}
