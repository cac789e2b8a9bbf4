//! Uniform event surface over a session or server (spec.md §4.5).
//!
//! [`Channel`] fronts a single TCP client or serial session; [`ServerChannel`]
//! fronts a multi-peer TCP server. They are two distinct types rather than
//! one enum with runtime-checked variants: the teacher's dispatch registry
//! (`Arc<dyn EventHandler>`) hides carrier identity behind a trait object,
//! but here misusing a server-only operation (`broadcast`, `send_to`, a
//! client-count query) on a single-peer channel is a compile error instead
//! of a silent no-op or a panic.
//!
//! Both types are thin: a [`crate::reactor::ReactorHandle`] plus the
//! slotmap key identifying their session/server. Every mutating call runs
//! immediately against the paused reactor when called reentrantly from a
//! callback on the reactor thread itself (spec.md §9 — "send from within a
//! callback appends directly rather than posting"), and is otherwise
//! `post`ed to run there; every reading call (`is_connected`,
//! `get_client_count`, `get_connected_clients`) follows the same split but
//! also waits for the result, round-tripping through a one-shot channel
//! when not already on the reactor thread (see [`crate::reactor::with_current_reactor`]).

use crate::reactor::{self, Reactor, ReactorGuard, ReactorHandle};
use crate::server::{ClientId, ServerId};
use crate::session::SessionId;
use std::sync::{mpsc, Arc};

/// Run `f` against the live reactor and return its result, whether called
/// from the reactor thread itself (a reentrant callback) or from any other
/// thread (a synchronous round trip through the task queue).
fn query<T, F>(handle: &ReactorHandle, f: F) -> T
where
    T: Send + 'static,
    F: FnOnce(&mut Reactor) -> T + Send + 'static,
{
    if reactor::on_reactor_thread() {
        return reactor::with_current_reactor(f);
    }
    let (tx, rx) = mpsc::sync_channel(1);
    handle.post(move |reactor| {
        let _ = tx.send(f(reactor));
    });
    rx.recv().expect("reactor dropped the response channel before replying")
}

/// Run `f` against the live reactor, the same way `query` does, but
/// without waiting for a result: called from the reactor thread itself
/// (a callback invoking `send`/`broadcast`/etc. on its own channel), `f`
/// runs immediately against the paused reactor rather than being queued
/// behind itself; from any other thread it is `post`ed as usual (spec.md
/// §9's re-entrancy note).
fn dispatch<F>(handle: &ReactorHandle, f: F)
where
    F: FnOnce(&mut Reactor) + Send + 'static,
{
    if reactor::on_reactor_thread() {
        reactor::with_current_reactor(f);
    } else {
        handle.post(f);
    }
}

/// Handle to a single TCP client or serial-port session.
#[derive(Clone)]
pub struct Channel {
    pub(crate) reactor: ReactorHandle,
    pub(crate) id: SessionId,
    /// Held when `auto_manage` was set at construction, keeping the
    /// reactor's poll timeout bounded for this channel's lifetime.
    pub(crate) guard: Option<Arc<ReactorGuard>>,
}

impl Channel {
    /// Begin connecting (TCP client) or opening (serial). No-op outside
    /// `Idle`/`Closed`/`Error`.
    pub fn start(&self) {
        let id = self.id;
        dispatch(&self.reactor, move |reactor| crate::session::start(reactor, id));
    }

    /// Tear the session down. Idempotent; the universal cancellation
    /// primitive (spec.md §5).
    pub fn stop(&self) {
        let id = self.id;
        dispatch(&self.reactor, move |reactor| crate::session::stop(reactor, id));
    }

    /// Queue `bytes` for sending. Silently dropped if not `Connected`
    /// (spec.md §9 open question (a)).
    pub fn send(&self, bytes: impl Into<Vec<u8>>) {
        let id = self.id;
        let bytes = bytes.into();
        dispatch(&self.reactor, move |reactor| crate::session::send(reactor, id, &bytes));
    }

    /// Queue `line` plus a trailing `\n`.
    pub fn send_line(&self, line: impl Into<String>) {
        let id = self.id;
        let line = line.into();
        dispatch(&self.reactor, move |reactor| crate::session::send_line(reactor, id, &line));
    }

    /// Whether the session is currently `Connected`.
    pub fn is_connected(&self) -> bool {
        let id = self.id;
        query(&self.reactor, move |reactor| crate::session::is_connected(reactor, id))
    }

    /// Register (or replace) the data callback. Takes effect immediately,
    /// including after `start()`.
    pub fn on_data(&self, cb: impl FnMut(&[u8]) + Send + 'static) {
        let id = self.id;
        dispatch(&self.reactor, move |reactor| crate::session::set_on_data(reactor, id, Box::new(cb)));
    }

    /// Register (or replace) the connect callback.
    pub fn on_connect(&self, cb: impl FnMut() + Send + 'static) {
        let id = self.id;
        dispatch(&self.reactor, move |reactor| crate::session::set_on_connect(reactor, id, Box::new(cb)));
    }

    /// Register (or replace) the disconnect callback.
    pub fn on_disconnect(&self, cb: impl FnMut() + Send + 'static) {
        let id = self.id;
        dispatch(&self.reactor, move |reactor| crate::session::set_on_disconnect(reactor, id, Box::new(cb)));
    }

    /// Register (or replace) the error callback.
    pub fn on_error(&self, cb: impl FnMut(String) + Send + 'static) {
        let id = self.id;
        dispatch(&self.reactor, move |reactor| crate::session::set_on_error(reactor, id, Box::new(cb)));
    }
}

/// Handle to a multi-peer TCP server.
#[derive(Clone)]
pub struct ServerChannel {
    pub(crate) reactor: ReactorHandle,
    pub(crate) id: ServerId,
    /// Held when `auto_manage` was set at construction, keeping the
    /// reactor's poll timeout bounded for this channel's lifetime.
    pub(crate) guard: Option<Arc<ReactorGuard>>,
}

impl ServerChannel {
    /// Bind the listening socket. No-op outside `Idle`/`Closed`/`Error`.
    pub fn start(&self) {
        let id = self.id;
        dispatch(&self.reactor, move |reactor| crate::server::start(reactor, id));
    }

    /// Stop every peer and close the listener.
    pub fn stop(&self) {
        let id = self.id;
        dispatch(&self.reactor, move |reactor| crate::server::stop(reactor, id));
    }

    /// Queue `bytes` for every currently admitted peer.
    pub fn broadcast(&self, bytes: impl Into<Vec<u8>>) {
        let id = self.id;
        let bytes = bytes.into();
        dispatch(&self.reactor, move |reactor| crate::server::broadcast(reactor, id, &bytes));
    }

    /// Queue `bytes` for one admitted peer. A no-op if `client_id` is not
    /// currently connected.
    pub fn send_to(&self, client_id: ClientId, bytes: impl Into<Vec<u8>>) {
        let id = self.id;
        let bytes = bytes.into();
        dispatch(&self.reactor, move |reactor| crate::server::send_to(reactor, id, client_id, &bytes));
    }

    /// Number of currently admitted peers.
    pub fn get_client_count(&self) -> usize {
        let id = self.id;
        query(&self.reactor, move |reactor| {
            reactor.servers.get(id).map(|s| s.client_count()).unwrap_or(0)
        })
    }

    /// `ClientId`s of every currently admitted peer, in admission order.
    pub fn get_connected_clients(&self) -> Vec<ClientId> {
        let id = self.id;
        query(&self.reactor, move |reactor| {
            reactor.servers.get(id).map(|s| s.connected_clients()).unwrap_or_default()
        })
    }

    /// Register (or replace) the per-peer data callback.
    pub fn on_data(&self, cb: impl FnMut(ClientId, &[u8]) + Send + 'static) {
        let id = self.id;
        dispatch(&self.reactor, move |reactor| crate::server::set_on_data(reactor, id, Box::new(cb)));
    }

    /// Register (or replace) the per-peer connect callback.
    pub fn on_connect(&self, cb: impl FnMut(ClientId, &str) + Send + 'static) {
        let id = self.id;
        dispatch(&self.reactor, move |reactor| crate::server::set_on_connect(reactor, id, Box::new(cb)));
    }

    /// Register (or replace) the per-peer disconnect callback.
    pub fn on_disconnect(&self, cb: impl FnMut(ClientId) + Send + 'static) {
        let id = self.id;
        dispatch(&self.reactor, move |reactor| crate::server::set_on_disconnect(reactor, id, Box::new(cb)));
    }
}
