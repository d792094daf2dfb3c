use crate::protocol::{PeerStat, StatsReport};
use std::io::{self, Write};
use std::net::SocketAddr;

/// Renders a report as the lines an operator sees, blank terminator included.
///
/// ```text
/// [seq=42] from node 7 (10.0.0.3)
///   peer  1: avg 10.500 us, loss 0
///   peer  2: avg n/a, loss 3
///
/// ```
pub fn render_lines(report: &StatsReport, from: SocketAddr) -> Vec<String> {
    let mut lines = Vec::with_capacity(report.peers().len() + 2);
    lines.push(format!(
        "[seq={}] from node {} ({})",
        report.seq(),
        report.src_id(),
        from.ip()
    ));
    lines.extend(report.peers().iter().map(render_peer));
    lines.push(String::new());
    lines
}

fn render_peer(peer: &PeerStat) -> String {
    format!(
        "  peer {:2}: avg {}, loss {}",
        peer.peer_id,
        format_rtt(peer),
        peer.loss_count
    )
}

pub fn format_rtt(peer: &PeerStat) -> String {
    match peer.rtt_us() {
        Some(us) => format!("{:.3} us", us),
        None => "n/a".to_string(),
    }
}

pub fn render_ignored(from: SocketAddr, len: usize) -> String {
    format!("[{}] Ignored packet (len={})", from.ip(), len)
}

/// Operator-facing output. Every call flushes before returning.
pub struct Reporter<W: Write> {
    out: W,
}

impl Reporter<io::Stdout> {
    pub fn stdout() -> Self {
        Self::new(io::stdout())
    }
}

impl<W: Write> Reporter<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    pub fn report(&mut self, report: &StatsReport, from: SocketAddr) -> io::Result<()> {
        for line in render_lines(report, from) {
            writeln!(self.out, "{}", line)?;
        }
        self.out.flush()
    }

    pub fn ignored(&mut self, from: SocketAddr, len: usize) -> io::Result<()> {
        writeln!(self.out, "{}", render_ignored(from, len))?;
        self.out.flush()
    }

    #[cfg(test)]
    pub fn into_inner(self) -> W {
        self.out
    }
}
