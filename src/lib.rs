//! # conduit
//!
//! A unified, event-driven transport library. One programming model over
//! three byte-stream carriers — outbound TCP connections, listening TCP
//! servers that multiplex many peers, and local serial ports.
//!
//! Callers compose a transport declaratively with [`TransportBuilder`],
//! get back a [`Channel`] (or [`ServerChannel`] for a TCP server), and
//! interact with it through non-blocking `send`/`send_line` calls and
//! callbacks delivered on the reactor thread.
//!
//! ## Quick start
//!
//! ```no_run
//! use conduit::TransportBuilder;
//!
//! let channel = TransportBuilder::tcp_client("example.com", 9000)
//!     .retry_interval_ms(2000)
//!     .on_data(|bytes| println!("got {} bytes", bytes.len()))
//!     .on_connect(|| println!("connected"))
//!     .build()
//!     .expect("valid configuration");
//!
//! channel.start();
//! channel.send_line("hello");
//! ```
//!
//! ## Architecture
//!
//! ```text
//! Channel / ServerChannel   (L2 — uniform event surface)
//! ErrorHandler              (L2 — process-wide error sink)
//! Session / Server          (L1 — per-endpoint state machine, fan-out)
//! Reactor / MemoryPool      (L0 — event loop, size-classed buffer pool)
//! ```
//!
//! All Session/Server state is mutated exclusively on the reactor thread
//! that owns it; every other entry point takes effect by posting work to
//! that thread (see [`reactor::Reactor::post`]).

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]
#![warn(clippy::all)]
#![allow(clippy::type_complexity)]

pub mod channel;
pub mod config;
pub mod error;
pub mod error_handler;
pub mod logger;
pub mod pool;
pub mod reactor;
pub mod server;
pub mod session;
pub mod timer;
pub mod validate;

pub use channel::{Channel, ServerChannel};
pub use config::{ClientLimit, Parity, TransportBuilder};
pub use error::{Error, Result};
pub use error_handler::{ErrorHandler, ErrorInfo};
pub use reactor::Reactor;
pub use server::ClientId;
pub use session::LinkState;
