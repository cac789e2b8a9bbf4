//! Declarative construction (spec.md §6): one builder that knows every
//! carrier kind at once, validates eagerly the way
//! `cyclone::config::ConfigManager` validates a loaded `CycloneConfig`
//! before it is ever handed to a caller, and hands back an already-wired
//! [`Channel`] or [`ServerChannel`].
//!
//! `.build()` and `.build_server()` are two finishers rather than one
//! method returning an enum: which one applies is determined by which
//! constructor (`tcp_client`/`serial` vs `tcp_server`) started the chain,
//! and calling the wrong finisher is itself a configuration error, caught
//! here rather than deferred to a runtime variant check inside `Channel`.

use crate::channel::{Channel, ServerChannel};
use crate::error::{Error, Result};
use crate::reactor::Reactor;
pub use crate::server::ClientLimit;
use crate::server::MultiCallbackSet;
use crate::session::CallbackSet;
use crate::validate;
use std::sync::Arc;
use std::time::Duration;

/// Serial port parity (spec.md §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Parity {
    /// No parity bit.
    None,
    /// Odd parity.
    Odd,
    /// Even parity.
    Even,
}

enum Target {
    TcpClient { host: String, port: u16 },
    TcpServer { port: u16 },
    Serial { device: String, baud_rate: u32 },
}

/// Fluent, validated construction of a [`Channel`] or [`ServerChannel`]
/// over any of the three supported carriers (spec.md §1).
pub struct TransportBuilder {
    target: Target,
    data_bits: u8,
    stop_bits: u8,
    parity: Parity,
    flow_control: bool,
    retry_interval_ms: u64,
    max_retries: Option<u32>,
    port_retry_enabled: bool,
    max_port_retries: u32,
    port_retry_interval_ms: u64,
    client_limit: ClientLimit,
    auto_start: bool,
    auto_manage: bool,
    use_independent_context: bool,
    on_data: Option<Box<dyn FnMut(&[u8]) + Send>>,
    on_connect: Option<Box<dyn FnMut() + Send>>,
    on_disconnect: Option<Box<dyn FnMut() + Send>>,
    on_error: Option<Box<dyn FnMut(String) + Send>>,
    on_peer_data: Option<Box<dyn FnMut(crate::server::ClientId, &[u8]) + Send>>,
    on_peer_connect: Option<Box<dyn FnMut(crate::server::ClientId, &str) + Send>>,
    on_peer_disconnect: Option<Box<dyn FnMut(crate::server::ClientId) + Send>>,
}

impl TransportBuilder {
    fn blank(target: Target) -> Self {
        Self {
            target,
            data_bits: 8,
            stop_bits: 1,
            parity: Parity::None,
            flow_control: false,
            retry_interval_ms: 2_000,
            max_retries: None,
            port_retry_enabled: false,
            max_port_retries: 0,
            port_retry_interval_ms: 1_000,
            client_limit: ClientLimit::Unlimited,
            auto_start: false,
            auto_manage: false,
            use_independent_context: false,
            on_data: None,
            on_connect: None,
            on_disconnect: None,
            on_error: None,
            on_peer_data: None,
            on_peer_connect: None,
            on_peer_disconnect: None,
        }
    }

    /// Begin building an outbound TCP client connecting to `host:port`.
    pub fn tcp_client(host: impl Into<String>, port: u16) -> Self {
        Self::blank(Target::TcpClient { host: host.into(), port })
    }

    /// Begin building a listening, multi-peer TCP server on `port`.
    pub fn tcp_server(port: u16) -> Self {
        Self::blank(Target::TcpServer { port })
    }

    /// Begin building a serial port session on `device` at `baud_rate`.
    pub fn serial(device: impl Into<String>, baud_rate: u32) -> Self {
        Self::blank(Target::Serial { device: device.into(), baud_rate })
    }

    /// Serial data bits (5..=8). Ignored for TCP targets.
    pub fn data_bits(mut self, bits: u8) -> Self {
        self.data_bits = bits;
        self
    }

    /// Serial stop bits (1..=2). Ignored for TCP targets.
    pub fn stop_bits(mut self, bits: u8) -> Self {
        self.stop_bits = bits;
        self
    }

    /// Serial parity. Ignored for TCP targets.
    pub fn parity(mut self, parity: Parity) -> Self {
        self.parity = parity;
        self
    }

    /// Serial RTS/CTS flow control. Ignored for TCP targets.
    pub fn flow_control(mut self, enabled: bool) -> Self {
        self.flow_control = enabled;
        self
    }

    /// Reconnect delay for client/serial sessions (default 2000ms).
    pub fn retry_interval_ms(mut self, ms: u64) -> Self {
        self.retry_interval_ms = ms;
        self
    }

    /// Cap the number of reconnect attempts. Unbounded by default.
    pub fn max_retries(mut self, max: u32) -> Self {
        self.max_retries = Some(max);
        self
    }

    /// Server bind retry policy (spec.md §4.3). Ignored for client/serial targets.
    pub fn enable_port_retry(mut self, enable: bool, max_retries: u32, interval_ms: u64) -> Self {
        self.port_retry_enabled = enable;
        self.max_port_retries = max_retries;
        self.port_retry_interval_ms = interval_ms;
        self
    }

    /// Admit at most one peer at a time.
    pub fn single_client(mut self) -> Self {
        self.client_limit = ClientLimit::Single;
        self
    }

    /// Admit at most `n` concurrent peers.
    pub fn bounded_clients(mut self, n: usize) -> Self {
        self.client_limit = ClientLimit::Bounded(n);
        self
    }

    /// Admit any number of concurrent peers (the default).
    pub fn unlimited_clients(mut self) -> Self {
        self.client_limit = ClientLimit::Unlimited;
        self
    }

    /// Call `start()` automatically as part of `.build()`/`.build_server()`.
    pub fn auto_start(mut self, enabled: bool) -> Self {
        self.auto_start = enabled;
        self
    }

    /// Hold a reactor work-guard for the lifetime of the returned channel,
    /// so the loop keeps polling at a bounded timeout even while this is
    /// the only live channel and no I/O or timers are pending.
    pub fn auto_manage(mut self, enabled: bool) -> Self {
        self.auto_manage = enabled;
        self
    }

    /// Bind to a freshly created reactor instead of the process singleton
    /// (spec.md §4.1 `create_independent`, typically for test isolation).
    pub fn use_independent_context(mut self, enabled: bool) -> Self {
        self.use_independent_context = enabled;
        self
    }

    /// Register the single-peer data callback.
    pub fn on_data(mut self, cb: impl FnMut(&[u8]) + Send + 'static) -> Self {
        self.on_data = Some(Box::new(cb));
        self
    }

    /// Register the single-peer connect callback.
    pub fn on_connect(mut self, cb: impl FnMut() + Send + 'static) -> Self {
        self.on_connect = Some(Box::new(cb));
        self
    }

    /// Register the single-peer disconnect callback.
    pub fn on_disconnect(mut self, cb: impl FnMut() + Send + 'static) -> Self {
        self.on_disconnect = Some(Box::new(cb));
        self
    }

    /// Register the single-peer error callback.
    pub fn on_error(mut self, cb: impl FnMut(String) + Send + 'static) -> Self {
        self.on_error = Some(Box::new(cb));
        self
    }

    /// Register the multi-client data callback (server targets only).
    pub fn on_peer_data(mut self, cb: impl FnMut(crate::server::ClientId, &[u8]) + Send + 'static) -> Self {
        self.on_peer_data = Some(Box::new(cb));
        self
    }

    /// Register the multi-client connect callback (server targets only).
    pub fn on_peer_connect(mut self, cb: impl FnMut(crate::server::ClientId, &str) + Send + 'static) -> Self {
        self.on_peer_connect = Some(Box::new(cb));
        self
    }

    /// Register the multi-client disconnect callback (server targets only).
    pub fn on_peer_disconnect(mut self, cb: impl FnMut(crate::server::ClientId) + Send + 'static) -> Self {
        self.on_peer_disconnect = Some(Box::new(cb));
        self
    }

    fn validate_common(&self) -> Result<()> {
        if self.retry_interval_ms == 0 {
            return Err(Error::config("retry_interval_ms must be >= 1"));
        }
        if !validate::is_valid_data_bits(self.data_bits) {
            return Err(Error::config(format!("invalid data_bits: {}", self.data_bits)));
        }
        if !validate::is_valid_stop_bits(self.stop_bits) {
            return Err(Error::config(format!("invalid stop_bits: {}", self.stop_bits)));
        }
        Ok(())
    }

    fn reactor_handle(&self) -> crate::reactor::ReactorHandle {
        if self.use_independent_context {
            Reactor::create_independent()
        } else {
            Reactor::global().clone()
        }
    }

    /// Validate and construct a [`Channel`] for a `tcp_client` or `serial`
    /// target. Returns a configuration error if this builder targets a
    /// TCP server (use [`Self::build_server`] instead).
    pub fn build(self) -> Result<Channel> {
        self.validate_common()?;
        if matches!(self.target, Target::TcpServer { .. }) {
            return Err(Error::config("build() called on a tcp_server builder; use build_server()"));
        }
        let retry_interval = Duration::from_millis(self.retry_interval_ms);
        let callbacks = CallbackSet {
            on_data: self.on_data,
            on_connect: self.on_connect,
            on_disconnect: self.on_disconnect,
            on_error: self.on_error,
        };

        let handle = self.reactor_handle();
        let max_retries = self.max_retries;
        let auto_start = self.auto_start;
        let (tx, rx) = std::sync::mpsc::sync_channel(1);

        match self.target {
            Target::TcpClient { host, port } => {
                if !validate::is_valid_host(&host) {
                    return Err(Error::config(format!("invalid host: {host}")));
                }
                if !validate::is_valid_port(port) {
                    return Err(Error::config(format!("invalid port: {port}")));
                }
                handle.post(move |reactor| {
                    let id = crate::session::spawn_tcp_client(reactor, host, port, retry_interval, max_retries, callbacks);
                    if auto_start {
                        crate::session::start(reactor, id);
                    }
                    let _ = tx.send(id);
                });
            }
            Target::Serial { device, baud_rate } => {
                if !validate::is_valid_device_path(&device) {
                    return Err(Error::config(format!("invalid device path: {device}")));
                }
                if !validate::is_valid_baud_rate(baud_rate) {
                    return Err(Error::config(format!("invalid baud_rate: {baud_rate}")));
                }
                let data_bits = self.data_bits;
                let stop_bits = self.stop_bits;
                let parity = self.parity;
                let flow_control = self.flow_control;
                handle.post(move |reactor| {
                    let id = crate::session::spawn_serial(
                        reactor,
                        device,
                        baud_rate,
                        data_bits,
                        stop_bits,
                        parity,
                        flow_control,
                        retry_interval,
                        max_retries,
                        callbacks,
                    );
                    if auto_start {
                        crate::session::start(reactor, id);
                    }
                    let _ = tx.send(id);
                });
            }
            Target::TcpServer { .. } => {
                return Err(Error::config("build() called on a tcp_server builder; use build_server()"));
            }
        }

        let id = rx.recv().map_err(|_| Error::system("reactor dropped before channel construction completed"))?;
        let guard = if self.auto_manage { Some(Arc::new(handle.guard())) } else { None };
        Ok(Channel { reactor: handle, id, guard })
    }

    /// Validate and construct a [`ServerChannel`] for a `tcp_server`
    /// target. Returns a configuration error for any other target.
    pub fn build_server(self) -> Result<ServerChannel> {
        self.validate_common()?;
        let port = match self.target {
            Target::TcpServer { port } => port,
            _ => return Err(Error::config("build_server() called on a non-server builder; use build()")),
        };
        if !validate::is_valid_port(port) {
            return Err(Error::config(format!("invalid port: {port}")));
        }
        if let ClientLimit::Bounded(0) | ClientLimit::Bounded(1) = self.client_limit {
            return Err(Error::config(
                "bounded_clients() requires n >= 2; use single_client() for n == 1 or unlimited_clients() for no cap",
            ));
        }

        let callbacks = MultiCallbackSet {
            on_data: self.on_peer_data,
            on_connect: self.on_peer_connect,
            on_disconnect: self.on_peer_disconnect,
        };
        let port_retry_interval = Duration::from_millis(self.port_retry_interval_ms);
        let port_retry_enabled = self.port_retry_enabled;
        let max_port_retries = self.max_port_retries;
        let client_limit = self.client_limit;
        let auto_start = self.auto_start;

        let handle = self.reactor_handle();
        let (tx, rx) = std::sync::mpsc::sync_channel(1);
        handle.post(move |reactor| {
            let id = crate::server::spawn(reactor, port, client_limit, callbacks, port_retry_enabled, max_port_retries, port_retry_interval);
            if auto_start {
                crate::server::start(reactor, id);
            }
            let _ = tx.send(id);
        });

        let id = rx.recv().map_err(|_| Error::system("reactor dropped before server construction completed"))?;
        let guard = if self.auto_manage { Some(Arc::new(handle.guard())) } else { None };
        Ok(ServerChannel { reactor: handle, id, guard })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_zero_retry_interval() {
        let err = TransportBuilder::tcp_client("example.com", 9000).retry_interval_ms(0).build();
        assert!(err.is_err());
    }

    #[test]
    fn rejects_invalid_host() {
        let err = TransportBuilder::tcp_client("not a host!", 9000).build();
        assert!(err.is_err());
    }

    #[test]
    fn rejects_zero_port() {
        let err = TransportBuilder::tcp_server(0).build_server();
        assert!(err.is_err());
    }

    #[test]
    fn rejects_invalid_baud_rate() {
        let err = TransportBuilder::serial("/dev/ttyUSB0", 0).build();
        assert!(err.is_err());
    }

    #[test]
    fn rejects_bounded_zero_clients() {
        let err = TransportBuilder::tcp_server(9001).bounded_clients(0).build_server();
        assert!(err.is_err());
    }

    #[test]
    fn rejects_bounded_one_client() {
        let err = TransportBuilder::tcp_server(9003).bounded_clients(1).build_server();
        assert!(err.is_err());
    }

    #[test]
    fn client_builder_refuses_build_server() {
        let err = TransportBuilder::tcp_client("example.com", 9000).build_server();
        assert!(err.is_err());
    }

    #[test]
    fn server_builder_refuses_build() {
        let err = TransportBuilder::tcp_server(9002).build();
        assert!(err.is_err());
    }
}
