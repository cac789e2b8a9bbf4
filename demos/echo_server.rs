//! Multi-peer TCP echo server.
//!
//! Accepts any number of concurrent peers and writes back whatever each
//! one sends. Run with `cargo run --example echo_server -- 9000`.

use conduit::TransportBuilder;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

fn main() {
    tracing_subscriber::fmt().with_env_filter(EnvFilter::from_default_env()).init();

    let port: u16 = std::env::args().nth(1).and_then(|s| s.parse().ok()).unwrap_or(9000);
    let connected = Arc::new(AtomicUsize::new(0));

    let server = TransportBuilder::tcp_server(port)
        .unlimited_clients()
        .enable_port_retry(true, 5, 500)
        .auto_start(true)
        .auto_manage(true)
        .build_server()
        .expect("valid server configuration");

    {
        let connected = connected.clone();
        server.on_connect(move |client_id, peer_addr| {
            let now = connected.fetch_add(1, Ordering::SeqCst) + 1;
            println!("client {client_id:?} connected from {peer_addr} ({now} online)");
        });
    }
    {
        let connected = connected.clone();
        server.on_disconnect(move |client_id| {
            let now = connected.fetch_sub(1, Ordering::SeqCst) - 1;
            println!("client {client_id:?} disconnected ({now} online)");
        });
    }
    {
        let handler = server.clone();
        server.on_data(move |client_id, bytes| {
            handler.send_to(client_id, bytes.to_vec());
        });
    }

    println!("echoing on 0.0.0.0:{port}; ctrl-c to stop");
    loop {
        std::thread::sleep(Duration::from_secs(1));
    }
}
