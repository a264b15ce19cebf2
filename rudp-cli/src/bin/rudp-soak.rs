//! rudp Soak - drive one channel over a simulated lossy link
//!
//! Two in-memory connections exchange numbered messages through a
//! deterministic link that drops, duplicates and reorders datagrams. The
//! run reports what arrived, and for reliable channels fails unless every
//! message arrived exactly once.

use anyhow::Context;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use clap::Parser;
use rudp_cli::{
    display_connection_stats, ChannelEntry, Config, KindConfig, LinkProfile, LossyLink, SoakConfig,
};
use rudp_protocol::{BufferedTransceiver, ChannelError, ChannelKind, Connection};
use std::collections::HashSet;
use std::net::SocketAddr;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "rudp-soak")]
#[command(about = "Soak-test a rudp channel over a simulated lossy link", long_about = None)]
struct Args {
    /// TOML configuration file (a [soak] section)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Channel kind (unreliable-unordered, unreliable-ordered, reliable-ordered)
    #[arg(short, long, default_value = "reliable-ordered")]
    kind: String,

    /// Messages to send
    #[arg(short, long)]
    messages: Option<u64>,

    /// Bytes per message
    #[arg(short, long)]
    size: Option<usize>,

    /// Drop every Nth datagram (0 = never)
    #[arg(long)]
    drop_every: Option<u64>,

    /// Duplicate every Nth datagram (0 = never)
    #[arg(long)]
    duplicate_every: Option<u64>,

    /// Swap every Nth datagram with the next (0 = never)
    #[arg(long)]
    swap_every: Option<u64>,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

/// What the receiving side saw
#[derive(Debug, Default)]
struct Report {
    delivered: u64,
    duplicates: u64,
    out_of_order: u64,
    seen: HashSet<u64>,
    last: Option<u64>,
}

impl Report {
    fn record(&mut self, message: &Bytes) -> anyhow::Result<()> {
        anyhow::ensure!(message.len() >= 8, "delivered message too short");
        let mut header = &message[..8];
        let index = header.get_u64();

        self.delivered += 1;
        if !self.seen.insert(index) {
            self.duplicates += 1;
        }
        if self.last.map_or(false, |last| index < last) {
            self.out_of_order += 1;
        }
        self.last = Some(index);
        Ok(())
    }
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let default_level = if args.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    let config = soak_config(&args)?;
    let kind: ChannelKind = config.channel.kind.into();
    let channel_config = config.channel.channel_config()?;
    anyhow::ensure!(config.message_size >= 8, "messages must be at least 8 bytes");

    let addr_a = SocketAddr::from(([10, 0, 0, 1], 5000));
    let addr_b = SocketAddr::from(([10, 0, 0, 2], 5000));
    let mut a = Connection::new(addr_b, [(kind, channel_config.clone())])?;
    let mut b = Connection::new(addr_a, [(kind, channel_config)])?;
    a.open();
    b.open();

    let profile = LinkProfile {
        drop_every: config.drop_every,
        duplicate_every: config.duplicate_every,
        swap_every: config.swap_every,
    };
    let mut link_ab = LossyLink::new(profile);
    let mut link_ba = LossyLink::new(profile);
    let mut a_tx = BufferedTransceiver::new();
    let mut b_tx = BufferedTransceiver::new();

    println!(
        "Soaking {} channel: {} messages of {} bytes, {:?}",
        kind, config.messages, config.message_size, profile
    );

    let tick = config.tick();
    let mut report = Report::default();
    let mut sent = 0u64;
    let mut idle_ticks = 0u64;
    let mut ticks = 0u64;

    while idle_ticks < config.drain_ticks {
        ticks += 1;
        for _ in 0..config.burst {
            if sent == config.messages {
                break;
            }
            match a.send(0, numbered_message(sent, config.message_size), &mut a_tx) {
                Ok(()) => sent += 1,
                Err(ChannelError::QueueFull(_)) => break,
                Err(e) => return Err(e).context("send failed"),
            }
        }

        a.update(tick, &mut a_tx);
        b.update(tick, &mut b_tx);
        for datagram in link_ab.carry(a_tx.drain_outbound()) {
            b.on_datagram(addr_a, &datagram, &mut b_tx);
        }
        for datagram in link_ba.carry(b_tx.drain_outbound()) {
            a.on_datagram(addr_b, &datagram, &mut a_tx);
        }

        for message in b_tx.drain_delivered() {
            report.record(&message)?;
        }

        if sent < config.messages {
            continue;
        }
        idle_ticks += 1;
        if kind == ChannelKind::ReliableOrdered
            && report.seen.len() as u64 == sent
            && a.stats().reliable.messages_acked == sent
        {
            break;
        }
    }

    let elapsed = tick * ticks as u32;
    display_connection_stats(&a, elapsed);
    display_connection_stats(&b, elapsed);

    let missing = sent - report.seen.len() as u64;
    println!("\nSimulated time: {:?} ({} ticks)", elapsed, ticks);
    println!(
        "Link A->B: {:?}\nLink B->A: {:?}",
        link_ab.stats(),
        link_ba.stats()
    );
    println!(
        "Sent {} | delivered {} | unique {} | missing {} | duplicates {} | out of order {}",
        sent,
        report.delivered,
        report.seen.len(),
        missing,
        report.duplicates,
        report.out_of_order
    );

    if kind == ChannelKind::ReliableOrdered {
        anyhow::ensure!(missing == 0, "{} messages never delivered", missing);
        anyhow::ensure!(report.duplicates == 0, "{} messages delivered twice", report.duplicates);
        if b.stats().reliable.stall_releases == 0 {
            anyhow::ensure!(report.out_of_order == 0, "messages delivered out of order");
        }
    }
    Ok(())
}

/// Message `index` padded to `size` bytes
fn numbered_message(index: u64, size: usize) -> Bytes {
    let mut buf = BytesMut::with_capacity(size);
    buf.put_u64(index);
    buf.resize(size, (index % 251) as u8);
    buf.freeze()
}

/// Configuration from the file (if any) with flags taking precedence
fn soak_config(args: &Args) -> anyhow::Result<SoakConfig> {
    let mut config = match &args.config {
        Some(path) => Config::from_file(path)
            .with_context(|| format!("failed to load {}", path.display()))?
            .soak
            .context("configuration file has no [soak] section")?,
        None => {
            let mut example = Config::example_soak()
                .soak
                .context("example configuration has no [soak] section")?;
            let kind = parse_kind(&args.kind)?;
            if kind != KindConfig::ReliableOrdered {
                // Unreliable channels do not fragment
                example.message_size = 256;
            }
            example.channel = ChannelEntry::new("soak", kind);
            example
        }
    };

    if let Some(messages) = args.messages {
        config.messages = messages;
    }
    if let Some(size) = args.size {
        config.message_size = size;
    }
    if let Some(drop_every) = args.drop_every {
        config.drop_every = drop_every;
    }
    if let Some(duplicate_every) = args.duplicate_every {
        config.duplicate_every = duplicate_every;
    }
    if let Some(swap_every) = args.swap_every {
        config.swap_every = swap_every;
    }
    Ok(config)
}

fn parse_kind(kind: &str) -> anyhow::Result<KindConfig> {
    let kind = match kind.parse::<ChannelKind>()? {
        ChannelKind::UnreliableUnordered => KindConfig::UnreliableUnordered,
        ChannelKind::UnreliableOrdered => KindConfig::UnreliableOrdered,
        ChannelKind::ReliableOrdered => KindConfig::ReliableOrdered,
    };
    Ok(kind)
}
