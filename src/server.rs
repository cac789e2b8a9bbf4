//! Multi-peer TCP listener (spec.md §4.3): accepts, numbers, limits,
//! broadcasts to, and evicts concurrent peers, all driven by the same
//! reactor as every session. Implemented as free functions taking
//! `&mut Reactor` for the same borrow-splitting reason as `session.rs`.

use crate::error::Error;
use crate::reactor::{EventType, Reactor, Target};
use crate::session::{self, SessionId};
use crate::timer::TimerToken;
use mio::net::TcpListener;
use mio::{Interest, Token};
use slotmap::new_key_type;
use slab::Slab;
use std::time::Duration;

new_key_type! {
    /// Identifies one server within a reactor's server table.
    pub struct ServerId;
}

/// A numbered accepted peer (spec.md glossary — monotonic within a
/// server's lifetime, never reused).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClientId(pub u64);

/// Server admission policy (spec.md §4.3).
#[derive(Debug, Clone, Copy)]
pub enum ClientLimit {
    /// At most one peer; further connections are accepted then closed.
    Single,
    /// At most `n` peers (`n >= 2`).
    Bounded(usize),
    /// No admission cap (implementations should still respect descriptor budgets).
    Unlimited,
}

impl ClientLimit {
    fn cap(self) -> Option<usize> {
        match self {
            ClientLimit::Single => Some(1),
            ClientLimit::Bounded(n) => Some(n),
            ClientLimit::Unlimited => None,
        }
    }
}

/// The three multi-client callbacks of spec.md §6.
#[derive(Default)]
pub(crate) struct MultiCallbackSet {
    pub on_data: Option<Box<dyn FnMut(ClientId, &[u8]) + Send>>,
    pub on_connect: Option<Box<dyn FnMut(ClientId, &str) + Send>>,
    pub on_disconnect: Option<Box<dyn FnMut(ClientId) + Send>>,
}

struct PeerSlot {
    client_id: ClientId,
    session: SessionId,
}

pub(crate) struct Server {
    pub(crate) state: session::LinkState,
    port: u16,
    listener: Option<TcpListener>,
    token: Option<Token>,
    limit: ClientLimit,
    peers: Slab<PeerSlot>,
    session_to_slot: std::collections::HashMap<SessionId, usize>,
    next_client_id: u64,
    callbacks: MultiCallbackSet,
    port_retry_enabled: bool,
    max_port_retries: u32,
    port_retry_interval: Duration,
    port_retry_attempt: u32,
    port_retry_timer: Option<TimerToken>,
}

impl Server {
    fn new(port: u16, limit: ClientLimit, callbacks: MultiCallbackSet, port_retry_enabled: bool, max_port_retries: u32, port_retry_interval: Duration) -> Self {
        Self {
            state: session::LinkState::Idle,
            port,
            listener: None,
            token: None,
            limit,
            peers: Slab::new(),
            session_to_slot: std::collections::HashMap::new(),
            next_client_id: 0,
            callbacks,
            port_retry_enabled,
            max_port_retries,
            port_retry_interval,
            port_retry_attempt: 0,
            port_retry_timer: None,
        }
    }

    /// Number of currently admitted peers.
    pub(crate) fn client_count(&self) -> usize {
        self.peers.len()
    }

    /// `ClientId`s of every currently admitted peer, in admission order.
    pub(crate) fn connected_clients(&self) -> Vec<ClientId> {
        let mut ids: Vec<ClientId> = self.peers.iter().map(|(_, slot)| slot.client_id).collect();
        ids.sort_unstable();
        ids
    }
}

/// Construct an idle server. Call [`start`] to bind.
#[allow(clippy::too_many_arguments)]
pub(crate) fn spawn(
    reactor: &mut Reactor,
    port: u16,
    limit: ClientLimit,
    callbacks: MultiCallbackSet,
    port_retry_enabled: bool,
    max_port_retries: u32,
    port_retry_interval: Duration,
) -> ServerId {
    reactor
        .servers
        .insert(Server::new(port, limit, callbacks, port_retry_enabled, max_port_retries, port_retry_interval))
}

/// Bind the listening socket. Idempotent outside `Idle`/`Closed`/`Error`.
pub(crate) fn start(reactor: &mut Reactor, id: ServerId) {
    let Some(server) = reactor.servers.get(id) else { return };
    if matches!(server.state, session::LinkState::Connecting | session::LinkState::Listening) {
        return;
    }
    attempt_bind(reactor, id);
}

fn attempt_bind(reactor: &mut Reactor, id: ServerId) {
    reactor.servers[id].state = session::LinkState::Connecting;
    let port = reactor.servers[id].port;
    let addr = format!("0.0.0.0:{port}").parse().expect("valid socket address");

    match TcpListener::bind(addr) {
        Ok(mut listener) => {
            let token = reactor.next_token();
            if reactor.poll.registry().register(&mut listener, token, Interest::READABLE).is_err() {
                report_server_error(reactor, id, "failed to register listener with reactor");
                return;
            }
            let server = &mut reactor.servers[id];
            server.listener = Some(listener);
            server.token = Some(token);
            server.state = session::LinkState::Listening;
            server.port_retry_attempt = 0;
            reactor.tokens.insert(token, Target::Listener(id));
            tracing::debug!(component = "server", operation = "bind", server = ?id, port, "-> Listening");
        }
        Err(e) if is_address_in_use(&e) && reactor.servers[id].port_retry_enabled => {
            retry_bind_or_fail(reactor, id, e);
        }
        Err(e) => {
            report_server_error(reactor, id, &format!("bind failed: {e}"));
            reactor.servers[id].state = session::LinkState::Error;
        }
    }
}

fn is_address_in_use(e: &std::io::Error) -> bool {
    e.kind() == std::io::ErrorKind::AddrInUse
}

fn retry_bind_or_fail(reactor: &mut Reactor, id: ServerId, cause: std::io::Error) {
    let server = &mut reactor.servers[id];
    if server.port_retry_attempt >= server.max_port_retries {
        server.state = session::LinkState::Error;
        report_server_error(reactor, id, &format!("port retry exhausted: {cause}"));
        return;
    }
    server.port_retry_attempt += 1;
    let interval = server.port_retry_interval;
    let timer = reactor.timers.schedule(interval, Target::Listener(id));
    reactor.servers[id].port_retry_timer = Some(timer);
}

/// Port-retry timer fired: attempt to bind again.
pub(crate) fn on_port_retry_timer(reactor: &mut Reactor, id: ServerId) {
    if reactor.servers.get(id).is_none() {
        return;
    }
    reactor.servers[id].port_retry_timer = None;
    attempt_bind(reactor, id);
}

/// Stop listening, tear down every admitted peer, and cancel any pending
/// port-retry timer.
pub(crate) fn stop(reactor: &mut Reactor, id: ServerId) {
    let Some(server) = reactor.servers.get(id) else { return };
    if matches!(server.state, session::LinkState::Idle | session::LinkState::Closed) {
        return;
    }

    if let Some(timer) = reactor.servers[id].port_retry_timer.take() {
        reactor.timers.cancel(timer);
    }

    let peer_sessions: Vec<SessionId> = reactor.servers[id].peers.iter().map(|(_, slot)| slot.session).collect();
    for session_id in peer_sessions {
        session::stop(reactor, session_id);
    }

    let Some(server) = reactor.servers.get_mut(id) else { return };
    let token = server.token.take();
    let mut listener = server.listener.take();
    server.state = session::LinkState::Closed;

    if let Some(token) = token {
        reactor.tokens.remove(&token);
        if let Some(listener) = listener.as_mut() {
            let _ = reactor.poll.registry().deregister(listener);
        }
    }
}

/// Dispatch one readiness notification on the listening socket.
pub(crate) fn on_event(reactor: &mut Reactor, id: ServerId, kind: EventType) {
    match kind {
        EventType::Readable => accept_until_would_block(reactor, id),
        EventType::Error => {
            report_server_error(reactor, id, "listener reported an error");
            if let Some(server) = reactor.servers.get_mut(id) {
                server.state = session::LinkState::Error;
            }
        }
        EventType::Writable | EventType::Hangup => {}
    }
}

fn accept_until_would_block(reactor: &mut Reactor, id: ServerId) {
    loop {
        let accepted = {
            let Some(server) = reactor.servers.get_mut(id) else { return };
            let Some(listener) = server.listener.as_mut() else { return };
            listener.accept()
        };

        match accepted {
            Ok((stream, addr)) => {
                let _ = socket2::SockRef::from(&stream).set_nodelay(true);
                admit(reactor, id, stream, addr.to_string());
            }
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => return,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => {
                report_server_error(reactor, id, &format!("accept failed: {e}"));
                return;
            }
        }
    }
}

fn admit(reactor: &mut Reactor, id: ServerId, stream: mio::net::TcpStream, peer_addr: String) {
    let at_capacity = {
        let server = &reactor.servers[id];
        server.limit.cap().map(|cap| server.peers.len() >= cap).unwrap_or(false)
    };
    if at_capacity {
        // Close without numbering: no ClientId is allocated, no callback fires.
        drop(stream);
        return;
    }

    let client_id = {
        let server = &mut reactor.servers[id];
        let client_id = ClientId(server.next_client_id);
        server.next_client_id += 1;
        client_id
    };

    let session_id = session::spawn_tcp_peer(reactor, id, stream, peer_addr.clone());

    let server = &mut reactor.servers[id];
    let slot_index = server.peers.insert(PeerSlot { client_id, session: session_id });
    server.session_to_slot.insert(session_id, slot_index);
    tracing::debug!(component = "server", operation = "accept", server = ?id, client = client_id.0, addr = %peer_addr, "peer admitted");
    if let Some(cb) = server.callbacks.on_connect.as_mut() {
        cb(client_id, &peer_addr);
    }

    // The peer's socket was accepted already-connected; register it with
    // the reactor and begin reading exactly as a completed client connect would.
    if session::begin_peer(reactor, session_id).is_err() {
        session::stop(reactor, session_id);
    }
}

/// A peer session reached `Closed`/`Error`: remove it from the admission
/// table and fire the multi-client disconnect callback.
pub(crate) fn on_peer_closed(reactor: &mut Reactor, id: ServerId, session_id: SessionId) {
    let Some(server) = reactor.servers.get_mut(id) else { return };
    let Some(slot_index) = server.session_to_slot.remove(&session_id) else { return };
    let slot = server.peers.remove(slot_index);
    tracing::debug!(component = "server", operation = "evict", server = ?id, client = slot.client_id.0, "peer evicted");
    if let Some(cb) = server.callbacks.on_disconnect.as_mut() {
        cb(slot.client_id);
    }
}

/// A peer session completed a read: forward to the multi-client data callback.
pub(crate) fn on_peer_data(reactor: &mut Reactor, id: ServerId, session_id: SessionId, data: &[u8]) {
    let Some(server) = reactor.servers.get_mut(id) else { return };
    let Some(&slot_index) = server.session_to_slot.get(&session_id) else { return };
    let client_id = server.peers[slot_index].client_id;
    if let Some(cb) = server.callbacks.on_data.as_mut() {
        cb(client_id, data);
    }
}

/// Copy `bytes` to every admitted peer's TX queue (spec.md §4.3). Partial
/// per-peer failure is non-fatal; each peer reports its own error.
pub(crate) fn broadcast(reactor: &mut Reactor, id: ServerId, bytes: &[u8]) {
    let Some(server) = reactor.servers.get(id) else { return };
    let session_ids: Vec<SessionId> = server.peers.iter().map(|(_, slot)| slot.session).collect();
    for session_id in session_ids {
        session::send(reactor, session_id, bytes);
    }
}

/// Send `bytes` to one peer. No-op if `client_id` is not currently admitted.
pub(crate) fn send_to(reactor: &mut Reactor, id: ServerId, client_id: ClientId, bytes: &[u8]) {
    let Some(server) = reactor.servers.get(id) else { return };
    let Some((_, slot)) = server.peers.iter().find(|(_, slot)| slot.client_id == client_id) else { return };
    let session_id = slot.session;
    session::send(reactor, session_id, bytes);
}

pub(crate) fn set_on_data(reactor: &mut Reactor, id: ServerId, cb: Box<dyn FnMut(ClientId, &[u8]) + Send>) {
    if let Some(server) = reactor.servers.get_mut(id) {
        server.callbacks.on_data = Some(cb);
    }
}

pub(crate) fn set_on_connect(reactor: &mut Reactor, id: ServerId, cb: Box<dyn FnMut(ClientId, &str) + Send>) {
    if let Some(server) = reactor.servers.get_mut(id) {
        server.callbacks.on_connect = Some(cb);
    }
}

pub(crate) fn set_on_disconnect(reactor: &mut Reactor, id: ServerId, cb: Box<dyn FnMut(ClientId) + Send>) {
    if let Some(server) = reactor.servers.get_mut(id) {
        server.callbacks.on_disconnect = Some(cb);
    }
}

fn report_server_error(reactor: &mut Reactor, id: ServerId, message: &str) {
    let _ = id;
    let info = crate::error_handler::ErrorInfo::new(
        Error::connection(message.to_string()).level(),
        Error::connection(message.to_string()).category(),
        "server",
        "bind_or_accept",
        message.to_string(),
    );
    crate::error_handler::ErrorHandler::global().report(info);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_client_limit_caps_at_one() {
        assert_eq!(ClientLimit::Single.cap(), Some(1));
        assert_eq!(ClientLimit::Bounded(3).cap(), Some(3));
        assert_eq!(ClientLimit::Unlimited.cap(), None);
    }
}
