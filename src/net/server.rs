//! TCP server accepting device connections
//!
//! The monitor side of the transport. Each accepted socket becomes a
//! [`Connection`] tracked in a table keyed by connection id; the table entry
//! is the sole owner of the actor, so erasing it tears the socket down.
//! Decoded messages from every connection re-emit through the server's own
//! `on_message` - the server never multiplexes by device, attribution
//! travels inside the message payload.
//!
//! A failing connection only loses its own table entry; the remaining
//! connections are untouched. Bind and listen failures surface through
//! `on_error` and abort the listen attempt without retry.

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;

use crate::config::ACCEPT_POLL_INTERVAL;
use crate::dispatch::{self, Dispatcher, Lane};
use crate::handler::HandlerSlot;
use crate::messages::DeviceMessage;
use crate::net::connection::{Connection, ConnectionId};
use crate::net::wire::Serializer;

struct ServerState {
    connections: HashMap<ConnectionId, Connection>,
    listening: bool,
}

struct ServerShared {
    lane: Lane,
    dispatcher: Dispatcher,
    serializer: Serializer,
    state: Mutex<ServerState>,
    accept_running: Arc<AtomicBool>,
    on_message: HandlerSlot<DeviceMessage>,
    on_error: HandlerSlot<()>,
}

impl Drop for ServerShared {
    fn drop(&mut self) {
        self.accept_running.store(false, Ordering::Relaxed);
    }
}

/// TCP server listening for connections from devices
#[derive(Clone)]
pub struct DeviceServer {
    shared: Arc<ServerShared>,
}

impl DeviceServer {
    pub fn new(dispatcher: &Dispatcher, serializer: Serializer) -> Self {
        Self {
            shared: Arc::new(ServerShared {
                lane: dispatcher.lane(),
                dispatcher: dispatcher.clone(),
                serializer,
                state: Mutex::new(ServerState {
                    connections: HashMap::new(),
                    listening: false,
                }),
                accept_running: Arc::new(AtomicBool::new(false)),
                on_message: HandlerSlot::new(),
                on_error: HandlerSlot::new(),
            }),
        }
    }

    /// Assign the callback for every message received on any connection
    pub fn on_message<F>(&self, handler: F)
    where
        F: Fn(DeviceMessage) + Send + Sync + 'static,
    {
        self.shared.on_message.set(handler);
    }

    /// Assign the error callback
    pub fn on_error<F>(&self, handler: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.shared.on_error.set(move |()| handler());
    }

    /// Bind and start accepting. Failures emit `on_error` and abort the
    /// attempt; calling again while already listening is a no-op.
    pub fn listen(&self, ip: &str, port: u16) {
        let ip = ip.to_string();
        dispatch::post(&self.shared.lane, &self.shared, move |owner| {
            listen_impl(owner, &ip, port);
        });
    }

    /// Number of currently tracked device connections
    pub fn connection_count(&self) -> usize {
        let state = self.shared.state.lock().unwrap_or_else(|e| e.into_inner());
        state.connections.len()
    }
}

fn listen_impl(owner: &Arc<ServerShared>, ip: &str, port: u16) {
    {
        let state = owner.state.lock().unwrap_or_else(|e| e.into_inner());
        if state.listening {
            return;
        }
    }

    let addr: IpAddr = match ip.parse() {
        Ok(addr) => addr,
        Err(e) => {
            log::error!("invalid listen address {}: {}", ip, e);
            owner.on_error.invoke(());
            return;
        }
    };

    let listener = match TcpListener::bind(SocketAddr::new(addr, port)) {
        Ok(listener) => listener,
        Err(e) => {
            log::error!("failed to bind {}:{}: {}", ip, port, e);
            owner.on_error.invoke(());
            return;
        }
    };
    if let Err(e) = listener.set_nonblocking(true) {
        log::error!("failed to set listener nonblocking: {}", e);
        owner.on_error.invoke(());
        return;
    }

    let running = Arc::clone(&owner.accept_running);
    running.store(true, Ordering::Relaxed);

    let on_accept = dispatch::wrap(
        &owner.lane,
        owner,
        |server, result: std::io::Result<TcpStream>| {
            handle_accept(server, result);
        },
    );

    let spawned = thread::Builder::new()
        .name("server-accept".to_string())
        .spawn(move || accept_loop(listener, running, on_accept));
    match spawned {
        Ok(_) => {
            let mut state = owner.state.lock().unwrap_or_else(|e| e.into_inner());
            state.listening = true;
            log::info!("listening on {}:{}", ip, port);
        }
        Err(e) => {
            log::error!("failed to spawn accept thread: {}", e);
            owner.on_error.invoke(());
        }
    }
}

fn accept_loop(
    listener: TcpListener,
    running: Arc<AtomicBool>,
    on_accept: impl Fn(std::io::Result<TcpStream>),
) {
    while running.load(Ordering::Relaxed) {
        match listener.accept() {
            Ok((stream, addr)) => {
                log::debug!("accepted connection from {}", addr);
                on_accept(Ok(stream));
            }
            Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                thread::sleep(ACCEPT_POLL_INTERVAL);
            }
            Err(e) => {
                // fatal accept error stops the loop; intentional shutdown
                // only ever arrives through the running flag and is silent
                on_accept(Err(e));
                break;
            }
        }
    }
}

fn handle_accept(owner: &Arc<ServerShared>, result: std::io::Result<TcpStream>) {
    let stream = match result {
        Ok(stream) => stream,
        Err(e) => {
            log::error!("accept failed: {}", e);
            owner.on_error.invoke(());
            return;
        }
    };

    let connection = match Connection::new(stream, &owner.dispatcher, owner.serializer.clone()) {
        Ok(connection) => connection,
        Err(e) => {
            log::error!("failed to wrap accepted socket: {}", e);
            owner.on_error.invoke(());
            return;
        }
    };

    // re-emit decoded messages through the server's own surface
    let server = Arc::downgrade(owner);
    connection.on_message(move |message| {
        if let Some(server) = server.upgrade() {
            server.on_message.invoke(message);
        }
    });

    // close and error both route to the single remove handler
    let remove = dispatch::wrap(&owner.lane, owner, |server, id: ConnectionId| {
        server.remove_connection(id);
    });
    connection.on_close(remove.clone());
    connection.on_error(remove);

    connection.start_receive();

    let id = connection.id();
    let mut state = owner.state.lock().unwrap_or_else(|e| e.into_inner());
    state.connections.insert(id, connection);
    log::info!(
        "device connection {} registered ({} active)",
        id,
        state.connections.len()
    );
}

impl ServerShared {
    // Erase the table entry; dropping the actor closes its socket
    fn remove_connection(&self, id: ConnectionId) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if state.connections.remove(&id).is_some() {
            log::info!(
                "connection {} removed ({} active)",
                id,
                state.connections.len()
            );
        }
    }
}
