//! TCP client that sends a line every second and prints whatever comes
//! back, reconnecting automatically if the server goes away.
//!
//! Run with `cargo run --example echo_client -- 127.0.0.1 9000`.

use conduit::TransportBuilder;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

fn main() {
    tracing_subscriber::fmt().with_env_filter(EnvFilter::from_default_env()).init();

    let mut args = std::env::args().skip(1);
    let host = args.next().unwrap_or_else(|| "127.0.0.1".to_string());
    let port: u16 = args.next().and_then(|s| s.parse().ok()).unwrap_or(9000);

    let channel = TransportBuilder::tcp_client(host.clone(), port)
        .retry_interval_ms(1_000)
        .auto_start(true)
        .auto_manage(true)
        .on_connect(|| println!("connected"))
        .on_disconnect(|| println!("disconnected, retrying"))
        .on_error(|message| eprintln!("error: {message}"))
        .on_data(|bytes| println!("echo: {}", String::from_utf8_lossy(bytes)))
        .build()
        .expect("valid client configuration");

    println!("connecting to {host}:{port}");
    let mut counter: u64 = 0;
    loop {
        std::thread::sleep(Duration::from_secs(1));
        counter += 1;
        if channel.is_connected() {
            channel.send_line(format!("ping {counter}"));
        }
    }
}
