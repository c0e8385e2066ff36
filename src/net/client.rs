//! TCP client connecting a device to the monitor
//!
//! The device side of the transport: one outbound connection at a time.
//! `connect` resolves the address, performs the TCP connect on a dedicated
//! thread and wraps the socket in a [`Connection`] whose events forward to
//! the client's own surface (`on_connect`, `on_message`, `on_close`,
//! `on_error`).
//!
//! A malformed address surfaces through `on_error` before any socket
//! operation. A duplicate `connect` while one is established or outstanding
//! is rejected with an error and has no side effect. `send` before a
//! connection exists logs a warning and drops the message.

use std::net::{IpAddr, SocketAddr, TcpStream};
use std::sync::{Arc, Mutex};
use std::thread;

use crate::dispatch::{self, Dispatcher, Lane};
use crate::error::{Error, Result};
use crate::handler::HandlerSlot;
use crate::messages::DeviceMessage;
use crate::net::connection::{Connection, ConnectionId};
use crate::net::wire::Serializer;

struct ClientState {
    connection: Option<Connection>,
    connecting: bool,
}

struct ClientShared {
    lane: Lane,
    dispatcher: Dispatcher,
    serializer: Serializer,
    state: Mutex<ClientState>,
    on_connect: HandlerSlot<()>,
    on_error: HandlerSlot<()>,
    on_close: HandlerSlot<()>,
    on_message: HandlerSlot<DeviceMessage>,
}

/// TCP client reporting device messages to the monitor server
#[derive(Clone)]
pub struct DeviceClient {
    shared: Arc<ClientShared>,
}

impl DeviceClient {
    pub fn new(dispatcher: &Dispatcher, serializer: Serializer) -> Self {
        Self {
            shared: Arc::new(ClientShared {
                lane: dispatcher.lane(),
                dispatcher: dispatcher.clone(),
                serializer,
                state: Mutex::new(ClientState {
                    connection: None,
                    connecting: false,
                }),
                on_connect: HandlerSlot::new(),
                on_error: HandlerSlot::new(),
                on_close: HandlerSlot::new(),
                on_message: HandlerSlot::new(),
            }),
        }
    }

    /// Assign the connection-established callback
    pub fn on_connect<F>(&self, handler: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.shared.on_connect.set(move |()| handler());
    }

    /// Assign the error callback
    pub fn on_error<F>(&self, handler: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.shared.on_error.set(move |()| handler());
    }

    /// Assign the orderly-close callback
    pub fn on_close<F>(&self, handler: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.shared.on_close.set(move |()| handler());
    }

    /// Assign the callback for messages received from the server
    pub fn on_message<F>(&self, handler: F)
    where
        F: Fn(DeviceMessage) + Send + Sync + 'static,
    {
        self.shared.on_message.set(handler);
    }

    /// Start connecting to the monitor server.
    ///
    /// Rejected with an error (and no side effect) while a connection is
    /// established or a previous attempt is still outstanding. A malformed
    /// address emits `on_error` without touching the network; the call
    /// itself still succeeds. The outcome of a well-formed attempt arrives
    /// through `on_connect` or `on_error`.
    pub fn connect(&self, ip: &str, port: u16) -> Result<()> {
        let addr = {
            let mut state = self.shared.state.lock().unwrap_or_else(|e| e.into_inner());
            if state.connection.is_some() {
                return Err(Error::AlreadyConnected);
            }
            if state.connecting {
                return Err(Error::ConnectInProgress);
            }
            let addr: IpAddr = match ip.parse() {
                Ok(addr) => addr,
                Err(_) => {
                    drop(state);
                    log::error!("invalid server address: {}", ip);
                    self.shared.on_error.invoke(());
                    return Ok(());
                }
            };
            state.connecting = true;
            SocketAddr::new(addr, port)
        };

        let on_connected = dispatch::wrap(
            &self.shared.lane,
            &self.shared,
            |owner, result: std::io::Result<TcpStream>| {
                handle_connected(owner, result);
            },
        );

        let spawned = thread::Builder::new()
            .name("client-connect".to_string())
            .spawn(move || on_connected(TcpStream::connect(addr)));
        if let Err(e) = spawned {
            let mut state = self.shared.state.lock().unwrap_or_else(|e| e.into_inner());
            state.connecting = false;
            return Err(e.into());
        }

        log::debug!("connecting to {}", addr);
        Ok(())
    }

    /// Send a message to the server.
    ///
    /// Without an established connection the message is dropped and the
    /// condition is reported through logging - not a hard failure.
    pub fn send(&self, message: DeviceMessage) {
        let state = self.shared.state.lock().unwrap_or_else(|e| e.into_inner());
        match &state.connection {
            Some(connection) => connection.send(message),
            None => log::warn!(
                "not connected, dropping message from device {}",
                message.device_name()
            ),
        }
    }

    /// Whether a connection is currently established
    pub fn is_connected(&self) -> bool {
        let state = self.shared.state.lock().unwrap_or_else(|e| e.into_inner());
        state.connection.is_some()
    }
}

fn handle_connected(owner: &Arc<ClientShared>, result: std::io::Result<TcpStream>) {
    {
        let mut state = owner.state.lock().unwrap_or_else(|e| e.into_inner());
        state.connecting = false;
    }

    let stream = match result {
        Ok(stream) => stream,
        Err(e) => {
            log::error!("connect failed: {}", e);
            owner.on_error.invoke(());
            return;
        }
    };

    let connection = match Connection::new(stream, &owner.dispatcher, owner.serializer.clone()) {
        Ok(connection) => connection,
        Err(e) => {
            log::error!("failed to wrap connected socket: {}", e);
            owner.on_error.invoke(());
            return;
        }
    };

    let client = Arc::downgrade(owner);
    connection.on_message(move |message| {
        if let Some(client) = client.upgrade() {
            client.on_message.invoke(message);
        }
    });

    // peer close / connection error release the slot first, so a later
    // connect may retry, then surface through the client's own handlers
    let closed = dispatch::wrap(&owner.lane, owner, |client, _id: ConnectionId| {
        client.clear_connection();
        client.on_close.invoke(());
    });
    connection.on_close(closed);

    let errored = dispatch::wrap(&owner.lane, owner, |client, _id: ConnectionId| {
        client.clear_connection();
        client.on_error.invoke(());
    });
    connection.on_error(errored);

    connection.start_receive();

    {
        let mut state = owner.state.lock().unwrap_or_else(|e| e.into_inner());
        state.connection = Some(connection);
    }
    log::info!("connected to server");
    owner.on_connect.invoke(());
}

impl ClientShared {
    fn clear_connection(&self) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.connection = None;
    }
}
