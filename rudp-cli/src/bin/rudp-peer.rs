//! rudp Peer - exchange lines with a remote peer
//!
//! Reads lines from stdin and sends each as one message on the chosen
//! channel; prints every message delivered by any channel.

use anyhow::Context;
use bytes::Bytes;
use clap::Parser;
use crossbeam::channel::{self, Receiver};
use rudp_cli::{display_connection_stats, Config, PeerConfig};
use rudp::io::{DeltaClock, Timer};
use rudp::{Connection, DatagramSocket, UdpTransceiver};
use std::io::{self, BufRead};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

/// Receive buffer for one datagram
const RECV_BUFFER_SIZE: usize = 65536;

/// How long to keep running after stdin closes, so resends can finish
const LINGER: Duration = Duration::from_secs(2);

#[derive(Parser, Debug)]
#[command(name = "rudp-peer")]
#[command(about = "Exchange stdin lines with a remote rudp peer", long_about = None)]
struct Args {
    /// TOML configuration file (a [peer] section)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Local bind address
    #[arg(short, long)]
    bind: Option<SocketAddr>,

    /// Remote peer address
    #[arg(short, long)]
    remote: Option<SocketAddr>,

    /// Channel id used for stdin lines
    #[arg(long)]
    channel: Option<u8>,

    /// Statistics interval in seconds (0 disables)
    #[arg(long)]
    stats: Option<u64>,

    /// Print an example configuration file and exit
    #[arg(long)]
    print_example: bool,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    if args.print_example {
        print!("{}", toml::to_string_pretty(&Config::example_peer())?);
        return Ok(());
    }

    let default_level = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(io::stderr)
        .init();

    let config = peer_config(&args)?;
    let channels = config.channel_configs()?;
    if config.send_channel as usize >= channels.len() {
        anyhow::bail!(
            "send channel {} out of range ({} channels configured)",
            config.send_channel,
            channels.len()
        );
    }

    let socket = Arc::new(DatagramSocket::bind(config.bind)?);
    tracing::info!(local = %socket.local_addr()?, remote = %config.remote, "rudp peer starting");

    let datagrams = spawn_reader(&socket)?;
    let mut lines = spawn_stdin();
    let ticker = channel::tick(config.update_interval());

    let mut connection = Connection::new(config.remote, channels)?;
    connection.open();
    let mut transceiver = UdpTransceiver::new(socket, config.remote);

    let mut clock = DeltaClock::new(Duration::from_secs(1));
    let mut stats_timer = Timer::new(config.stats_interval());
    let mut linger_until: Option<Instant> = None;

    loop {
        channel::select! {
            recv(datagrams) -> datagram => {
                let (from, data) = datagram.context("socket reader stopped")?;
                connection.on_datagram(from, &data, &mut transceiver);
            }
            recv(lines) -> line => match line {
                Ok(line) => {
                    let message = Bytes::from(line.into_bytes());
                    if let Err(e) = connection.send(config.send_channel, message, &mut transceiver) {
                        tracing::warn!(error = %e, "failed to send line");
                    }
                }
                Err(_) => {
                    tracing::info!("stdin closed, lingering for resends");
                    linger_until = Some(Instant::now() + LINGER);
                }
            },
            recv(ticker) -> _ => {
                connection.update(clock.tick(), &mut transceiver);
                if config.stats_interval_secs > 0 && stats_timer.try_fire() {
                    display_connection_stats(&connection, clock.elapsed());
                }
                if linger_until.map_or(false, |deadline| Instant::now() >= deadline) {
                    break;
                }
            }
        }

        if linger_until.is_some() {
            lines = channel::never();
        }
        while let Some((from, message)) = transceiver.pop_delivered() {
            println!("[{}] {}", from, String::from_utf8_lossy(&message));
        }
    }

    display_connection_stats(&connection, clock.elapsed());
    let io_stats = transceiver.stats();
    tracing::info!(
        datagrams_sent = io_stats.datagrams_sent,
        send_failures = io_stats.send_failures,
        "rudp peer finished"
    );
    Ok(())
}

/// Configuration from the file (if any) with flags taking precedence
fn peer_config(args: &Args) -> anyhow::Result<PeerConfig> {
    let mut config = match &args.config {
        Some(path) => Config::from_file(path)
            .with_context(|| format!("failed to load {}", path.display()))?
            .peer
            .context("configuration file has no [peer] section")?,
        None => {
            let mut example = Config::example_peer()
                .peer
                .context("example configuration has no [peer] section")?;
            example.bind = args.bind.context("--bind is required without --config")?;
            example.remote = args.remote.context("--remote is required without --config")?;
            example
        }
    };

    if let Some(bind) = args.bind {
        config.bind = bind;
    }
    if let Some(remote) = args.remote {
        config.remote = remote;
    }
    if let Some(channel) = args.channel {
        config.send_channel = channel;
    }
    if let Some(stats) = args.stats {
        config.stats_interval_secs = stats;
    }
    Ok(config)
}

/// Read datagrams on a blocking clone of the socket and forward them
fn spawn_reader(socket: &DatagramSocket) -> anyhow::Result<Receiver<(SocketAddr, Bytes)>> {
    let reader = socket.try_clone()?;
    reader.set_nonblocking(false)?;
    reader.set_read_timeout(Some(Duration::from_millis(100)))?;

    let (tx, rx) = channel::bounded(1024);
    thread::Builder::new()
        .name("rudp-reader".to_string())
        .spawn(move || {
            let mut buf = vec![0u8; RECV_BUFFER_SIZE];
            loop {
                match reader.recv_from(&mut buf) {
                    Ok((n, from)) => {
                        if tx.send((from, Bytes::copy_from_slice(&buf[..n]))).is_err() {
                            break;
                        }
                    }
                    Err(e) if e.is_would_block() => continue,
                    Err(e) => tracing::warn!(error = %e, "receive failed"),
                }
            }
        })?;
    Ok(rx)
}

/// Forward stdin lines; the channel disconnects at end of input
fn spawn_stdin() -> Receiver<String> {
    let (tx, rx) = channel::unbounded();
    thread::spawn(move || {
        for line in io::stdin().lock().lines() {
            match line {
                Ok(line) => {
                    if tx.send(line).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, "failed to read stdin");
                    break;
                }
            }
        }
    });
    rx
}
