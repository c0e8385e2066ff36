//! TCP connection actor
//!
//! A [`Connection`] owns one connected socket and translates between the
//! byte stream and [`DeviceMessage`]s. Incoming bytes accumulate in a
//! residue buffer and are decoded as soon as a complete frame is present;
//! outgoing messages queue up and are written strictly one at a time, in
//! `send` order.
//!
//! Blocking socket I/O runs on two dedicated threads per connection (reader
//! and writer). Their completions cross back into the actor's dispatch lane
//! through [`dispatch::wrap`], so queue and buffer are only ever touched
//! inside the lane, and a connection destroyed with I/O still in flight
//! emits no further callbacks.
//!
//! Event surface: `on_message` (decoded message), `on_close` (orderly peer
//! shutdown), `on_error` (any other terminal I/O failure). Teardown-induced
//! cancellation surfaces nothing.

use std::collections::VecDeque;
use std::io::{Read, Write};
use std::net::{Shutdown, TcpStream};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;

use crossbeam_channel::{Receiver, Sender};

use crate::config::RECV_BUFFER_LEN;
use crate::dispatch::{self, Dispatcher, Lane};
use crate::error::Result;
use crate::handler::HandlerSlot;
use crate::messages::DeviceMessage;
use crate::net::wire::Serializer;

/// Process-unique connection identifier, assigned at actor creation and
/// never reused. Bookkeeping only - it is not sent on the wire.
pub type ConnectionId = u64;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(0);

fn generate_id() -> ConnectionId {
    NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed)
}

/// Outcome of one blocking socket read, reported by the reader thread
enum ReadEvent {
    Data(Vec<u8>),
    /// Orderly EOF from the peer
    Closed,
    Failed(std::io::Error),
}

struct ConnState {
    /// Pending outbound messages, drained strictly FIFO. Unbounded: a
    /// stalled peer lets this grow without limit (see DESIGN.md).
    send_queue: VecDeque<DeviceMessage>,
    /// The queue head has been encoded and handed to the writer thread
    write_in_flight: bool,
    /// Bytes read from the socket but not yet decoded into a message
    residue: Vec<u8>,
    receive_started: bool,
}

struct ConnectionShared {
    id: ConnectionId,
    lane: Lane,
    stream: TcpStream,
    serializer: Serializer,
    writer_tx: Sender<Vec<u8>>,
    state: Mutex<ConnState>,
    on_message: HandlerSlot<DeviceMessage>,
    on_error: HandlerSlot<ConnectionId>,
    on_close: HandlerSlot<ConnectionId>,
}

impl Drop for ConnectionShared {
    fn drop(&mut self) {
        // unblock outstanding reads; their completions find a dead owner
        let _ = self.stream.shutdown(Shutdown::Both);
    }
}

/// Actor transferring device messages over one TCP connection.
///
/// Not `Clone`: a connection is reachable by exactly one owner (the server's
/// connection table entry, or the client's single slot). Dropping it shuts
/// the socket down and discards all in-flight completions.
pub struct Connection {
    shared: Arc<ConnectionShared>,
}

impl Connection {
    /// Wrap an already-connected socket.
    ///
    /// Handlers should be wired before calling [`start_receive`].
    ///
    /// [`start_receive`]: Connection::start_receive
    pub fn new(stream: TcpStream, dispatcher: &Dispatcher, serializer: Serializer) -> Result<Self> {
        stream.set_nodelay(true)?;
        let writer_stream = stream.try_clone()?;
        let (writer_tx, writer_rx) = crossbeam_channel::unbounded::<Vec<u8>>();
        let lane = dispatcher.lane();
        let id = generate_id();

        let shared = Arc::new(ConnectionShared {
            id,
            lane: lane.clone(),
            stream,
            serializer,
            writer_tx,
            state: Mutex::new(ConnState {
                send_queue: VecDeque::new(),
                write_in_flight: false,
                residue: Vec::new(),
                receive_started: false,
            }),
            on_message: HandlerSlot::new(),
            on_error: HandlerSlot::new(),
            on_close: HandlerSlot::new(),
        });

        let write_done = dispatch::wrap(&lane, &shared, |owner, result: std::io::Result<()>| {
            owner.handle_write_done(result);
        });
        thread::Builder::new()
            .name(format!("conn-{}-writer", id))
            .spawn(move || writer_loop(writer_stream, writer_rx, write_done))?;

        log::debug!("connection {} created", id);
        Ok(Self { shared })
    }

    /// Unique identifier of this connection
    pub fn id(&self) -> ConnectionId {
        self.shared.id
    }

    /// Assign the decoded-message callback
    pub fn on_message<F>(&self, handler: F)
    where
        F: Fn(DeviceMessage) + Send + Sync + 'static,
    {
        self.shared.on_message.set(handler);
    }

    /// Assign the error callback (receives the connection id)
    pub fn on_error<F>(&self, handler: F)
    where
        F: Fn(ConnectionId) + Send + Sync + 'static,
    {
        self.shared.on_error.set(handler);
    }

    /// Assign the orderly-close callback (receives the connection id)
    pub fn on_close<F>(&self, handler: F)
    where
        F: Fn(ConnectionId) + Send + Sync + 'static,
    {
        self.shared.on_close.set(handler);
    }

    /// Start the receive loop. Subsequent calls are no-ops.
    pub fn start_receive(&self) {
        dispatch::post(&self.shared.lane, &self.shared, |owner| {
            start_receive_impl(owner);
        });
    }

    /// Queue a message for sending. Returns immediately; the message goes
    /// out after everything queued before it.
    pub fn send(&self, message: DeviceMessage) {
        dispatch::post(&self.shared.lane, &self.shared, move |owner| {
            owner.send_impl(message);
        });
    }
}

impl ConnectionShared {
    fn send_impl(&self, message: DeviceMessage) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.send_queue.push_back(message);
        if !state.write_in_flight {
            self.write_next(&mut state);
        }
    }

    // Pop the queue head, encode it and hand it to the writer thread.
    // Must run inside the lane with the state lock held.
    fn write_next(&self, state: &mut ConnState) {
        while let Some(message) = state.send_queue.pop_front() {
            match self.serializer.encode(&message) {
                Ok(frame) => {
                    state.write_in_flight = true;
                    if self.writer_tx.send(frame).is_err() {
                        // writer thread already gone: teardown in progress
                        state.write_in_flight = false;
                    }
                    return;
                }
                Err(e) => {
                    // skip the unencodable message, keep the queue moving
                    log::error!("connection {}: failed to encode message: {}", self.id, e);
                }
            }
        }
    }

    fn handle_write_done(&self, result: std::io::Result<()>) {
        match result {
            Ok(()) => {
                let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
                state.write_in_flight = false;
                self.write_next(&mut state);
            }
            Err(e) => {
                {
                    let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
                    state.write_in_flight = false;
                }
                log::debug!("connection {}: write error: {}", self.id, e);
                self.on_error.invoke(self.id);
            }
        }
    }

    fn handle_read_event(&self, event: ReadEvent) {
        match event {
            ReadEvent::Data(bytes) => {
                let decoded = {
                    let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
                    state.residue.extend_from_slice(&bytes);
                    let mut decoded = Vec::new();
                    loop {
                        let (message, consumed) = self.serializer.decode(&state.residue);
                        match message {
                            Some(message) => {
                                debug_assert!(consumed > 0);
                                state.residue.drain(..consumed);
                                decoded.push(message);
                            }
                            None => break,
                        }
                    }
                    decoded
                };
                for message in decoded {
                    self.on_message.invoke(message);
                }
            }
            ReadEvent::Closed => {
                log::debug!("connection {}: peer closed", self.id);
                self.on_close.invoke(self.id);
            }
            ReadEvent::Failed(e) => {
                log::debug!("connection {}: read error: {}", self.id, e);
                self.on_error.invoke(self.id);
            }
        }
    }
}

fn start_receive_impl(owner: &Arc<ConnectionShared>) {
    {
        let mut state = owner.state.lock().unwrap_or_else(|e| e.into_inner());
        if state.receive_started {
            return;
        }
        state.receive_started = true;
    }

    let stream = match owner.stream.try_clone() {
        Ok(stream) => stream,
        Err(e) => {
            log::error!("connection {}: failed to clone socket: {}", owner.id, e);
            owner.on_error.invoke(owner.id);
            return;
        }
    };

    let on_event = dispatch::wrap(&owner.lane, owner, |owner, event: ReadEvent| {
        owner.handle_read_event(event);
    });

    let spawned = thread::Builder::new()
        .name(format!("conn-{}-reader", owner.id))
        .spawn(move || reader_loop(stream, on_event));
    if let Err(e) = spawned {
        log::error!("connection {}: failed to spawn reader: {}", owner.id, e);
        owner.on_error.invoke(owner.id);
    }
}

fn reader_loop(mut stream: TcpStream, on_event: impl Fn(ReadEvent)) {
    let mut buffer = [0u8; RECV_BUFFER_LEN];
    loop {
        match stream.read(&mut buffer) {
            Ok(0) => {
                on_event(ReadEvent::Closed);
                break;
            }
            Ok(n) => on_event(ReadEvent::Data(buffer[..n].to_vec())),
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => {
                on_event(ReadEvent::Failed(e));
                break;
            }
        }
    }
}

fn writer_loop(
    mut stream: TcpStream,
    rx: Receiver<Vec<u8>>,
    on_done: impl Fn(std::io::Result<()>),
) {
    while let Ok(frame) = rx.recv() {
        let result = stream.write_all(&frame);
        let failed = result.is_err();
        on_done(result);
        if failed {
            break;
        }
    }
}
