//! BoltServe demo binary.
//!
//! Runs the server with one of two bundled responders: a byte-for-byte
//! echo, or a command table answering ping/hello style requests. Stops
//! cleanly on Ctrl+C.

use boltserve::{echo_handler, MessageHandler, ResponseTable, TcpServer};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Which bundled responder to serve
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Echo,
    Command,
}

/// Server configuration
struct Config {
    /// Port to listen on
    port: u16,
    /// Responder to run
    mode: Mode,
    /// Maximum concurrent connections
    max_connections: usize,
    /// Worker threads (0 = hardware parallelism)
    threads: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 9876,
            mode: Mode::Command,
            max_connections: boltserve::DEFAULT_MAX_CONNECTIONS,
            threads: 0,
        }
    }
}

impl Config {
    /// Parse configuration from command-line arguments
    fn from_args() -> Self {
        let mut config = Config::default();
        let args: Vec<String> = std::env::args().collect();

        let mut i = 1;
        while i < args.len() {
            match args[i].as_str() {
                "--port" | "-p" => {
                    config.port = parse_value(&args, i, "port");
                    i += 2;
                }
                "--mode" | "-m" => {
                    let value: String = parse_value(&args, i, "mode");
                    config.mode = match value.as_str() {
                        "echo" => Mode::Echo,
                        "command" => Mode::Command,
                        other => {
                            eprintln!("Error: unknown mode '{other}' (expected echo|command)");
                            std::process::exit(1);
                        }
                    };
                    i += 2;
                }
                "--max-connections" | "-c" => {
                    config.max_connections = parse_value(&args, i, "max-connections");
                    i += 2;
                }
                "--threads" | "-t" => {
                    config.threads = parse_value(&args, i, "threads");
                    i += 2;
                }
                "--help" => {
                    print_help();
                    std::process::exit(0);
                }
                "--version" | "-v" => {
                    println!("boltserve version {}", boltserve::VERSION);
                    std::process::exit(0);
                }
                _ => {
                    eprintln!("Unknown argument: {}", args[i]);
                    print_help();
                    std::process::exit(1);
                }
            }
        }

        config
    }

    fn handler(&self) -> MessageHandler {
        match self.mode {
            Mode::Echo => echo_handler(),
            Mode::Command => ResponseTable::new(
                "Command not recognized. Type 'help' to see available commands.",
            )
            .with("hello", "Hello!")
            .with("help", "Available commands: hello, help, info, time, ping")
            .with("info", "BoltServe demo server")
            .with("ping", "pong")
            .with("time", "Current time information")
            .into_handler(),
        }
    }
}

/// Parses the value following a flag, exiting with a message when it is
/// missing or malformed.
fn parse_value<T: std::str::FromStr>(args: &[String], i: usize, name: &str) -> T {
    let Some(raw) = args.get(i + 1) else {
        eprintln!("Error: --{name} requires a value");
        std::process::exit(1);
    };
    raw.parse().unwrap_or_else(|_| {
        eprintln!("Error: invalid value for --{name}: {raw}");
        std::process::exit(1);
    })
}

fn print_help() {
    println!(
        r#"
BoltServe - A Concurrent TCP Request/Response Server

USAGE:
    boltserve [OPTIONS]

OPTIONS:
    -p, --port <PORT>              Port to listen on (default: 9876)
    -m, --mode <echo|command>      Responder to run (default: command)
    -c, --max-connections <N>      Connection cap (default: 8)
    -t, --threads <N>              Worker threads, 0 = hardware parallelism
    -v, --version                  Print version information
        --help                     Print this help message

EXAMPLES:
    boltserve                      # Command responder on port 9876
    boltserve --mode echo          # Echo server
    boltserve -p 8765 -t 4 -c 64   # Custom port, threads, and cap

CONNECTING:
    $ nc 127.0.0.1 9876
    ping
    pong
"#
    );
}

/// Blocks the calling thread until Ctrl+C.
///
/// Uses a dedicated single-thread runtime so `TcpServer::stop` can run
/// afterwards outside of any async context.
fn wait_for_shutdown_signal() -> anyhow::Result<()> {
    let signal_runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    signal_runtime.block_on(tokio::signal::ctrl_c())?;
    Ok(())
}

fn main() -> anyhow::Result<()> {
    let config = Config::from_args();

    // Set up logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let mut server = TcpServer::with_capacity(config.port, config.handler(), config.max_connections)?;

    info!(
        port = config.port,
        mode = ?config.mode,
        max_connections = config.max_connections,
        "Starting BoltServe"
    );
    server.start(config.threads)?;

    info!("Server running. Press Ctrl+C to stop.");
    wait_for_shutdown_signal()?;

    info!("Shutdown signal received, stopping server...");
    server.stop();
    info!("Server shutdown complete");

    Ok(())
}
