//! Statistics display and formatting

use rudp_protocol::{Connection, ConnectionStats, MessageChannel};
use std::io::Write;
use std::time::Duration;

/// Format bytes in human-readable form
pub fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

/// Format RTT in human-readable form
pub fn format_rtt(rtt: Duration) -> String {
    let micros = rtt.as_micros();
    if micros >= 1_000_000 {
        format!("{:.2}s", rtt.as_secs_f64())
    } else if micros >= 1_000 {
        format!("{:.2}ms", micros as f64 / 1_000.0)
    } else {
        format!("{}µs", micros)
    }
}

/// Format a 0.0..=1.0 ratio as a percentage
pub fn format_percent(ratio: f32) -> String {
    format!("{:.1}%", ratio * 100.0)
}

/// Format duration in human-readable form
pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    let hours = secs / 3600;
    let minutes = (secs % 3600) / 60;
    let seconds = secs % 60;

    if hours > 0 {
        format!("{}h {:02}m {:02}s", hours, minutes, seconds)
    } else if minutes > 0 {
        format!("{}m {:02}s", minutes, seconds)
    } else {
        format!("{}s", seconds)
    }
}

/// Display connection statistics with one row per channel
pub fn display_connection_stats(connection: &Connection, uptime: Duration) {
    let stats = connection.stats();

    println!("\n┌─────────────────────────────────────────────────────────────┐");
    println!("│ CONNECTION {:<49}│", connection.remote_addr().to_string());
    println!("├─────────────────────────────────────────────────────────────┤");
    println!("│ Uptime:   {:<50}│", format_duration(uptime));
    println!(
        "│ Packets:  {:<50}│",
        format!(
            "{} sent / {} received / {} acked / {} lost",
            stats.packets.packets_sent,
            stats.packets.packets_received,
            stats.packets.packets_acked,
            stats.packets.packets_lost
        )
    );
    println!(
        "│ Bytes:    {:<50}│",
        format!(
            "{} sent / {} received",
            format_bytes(stats.packets.bytes_sent),
            format_bytes(stats.packets.bytes_received)
        )
    );
    println!(
        "│ Messages: {:<50}│",
        format!(
            "{} delivered / {} resent fragments",
            stats.reliable.messages_delivered, stats.reliable.fragments_resent
        )
    );
    println!(
        "│ Dropped:  {:<50}│",
        format!(
            "{} stale / {} invalid / {} unknown channel",
            stats.packets.packets_stale,
            stats.packets.packets_invalid + stats.invalid,
            stats.unknown_channel
        )
    );
    println!("├────┬──────────────────────┬──────────┬──────────┬──────────┤");
    println!("│ Id │ Kind                 │ RTT      │ Loss     │ Sent     │");
    println!("├────┼──────────────────────┼──────────┼──────────┼──────────┤");

    for channel in connection.channels() {
        let controller = channel.controller();
        let rtt = if controller.stats().packets_acked > 0 {
            format_rtt(controller.rtt())
        } else {
            "N/A".to_string()
        };
        println!(
            "│ {:2} │ {:20} │ {:8} │ {:8} │ {:8} │",
            channel.channel_id(),
            channel.kind().to_string(),
            rtt,
            format_percent(controller.packet_loss()),
            controller.stats().packets_sent
        );
    }

    println!("└────┴──────────────────────┴──────────┴──────────┴──────────┘");
}

/// Display compact stats on one line (for continuous updates)
pub fn display_compact_stats(stats: &ConnectionStats, elapsed: Duration) {
    print!(
        "\r[{:8}] Sent: {} | Recv: {} | RTT: {} | Loss: {} | Delivered: {}         ",
        format_duration(elapsed),
        format_bytes(stats.packets.bytes_sent),
        format_bytes(stats.packets.bytes_received),
        format_rtt(stats.rtt),
        format_percent(stats.packet_loss),
        stats.reliable.messages_delivered
    );

    let _ = std::io::stdout().flush();
}
