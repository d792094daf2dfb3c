use crate::config::ListenerConfig;
use crate::protocol::{self, DecodePolicy, RejectReason, StatsReport};
use crate::report::Reporter;
use anyhow::Context;
use std::future::Future;
use std::io::{self, Write};
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use tokio::net::UdpSocket;
use tracing::{debug, info, warn};

/// Largest datagram read in one receive; anything longer is cut by the OS.
pub const MAX_DATAGRAM: usize = 4096;

/// What happened to one datagram.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Reported { seq: u64, peers: usize },
    Ignored(RejectReason),
}

/// Owns the bound UDP endpoint for the lifetime of the process.
pub struct Listener {
    socket: UdpSocket,
    policy: DecodePolicy,
}

impl Listener {
    /// Must be called from within a tokio runtime.
    pub fn bind(config: &ListenerConfig) -> anyhow::Result<Self> {
        let addr = config.bind_addr()?;
        let socket = socket2::Socket::new(
            socket2::Domain::for_address(addr),
            socket2::Type::DGRAM,
            Some(socket2::Protocol::UDP),
        )?;

        // [::] should also receive reports from IPv4 senders.
        if addr.is_ipv6() {
            socket.set_only_v6(false)?;
        }
        if let Some(size) = config.recv_buffer_bytes {
            socket
                .set_recv_buffer_size(size)
                .with_context(|| format!("failed to set receive buffer to {} bytes", size))?;
        }

        socket
            .bind(&addr.into())
            .with_context(|| format!("failed to bind UDP endpoint on {}", addr))?;
        socket.set_nonblocking(true)?;

        let std_socket: std::net::UdpSocket = socket.into();
        let socket = UdpSocket::from_std(std_socket)?;

        Ok(Self {
            socket,
            policy: config.decode_policy(),
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Receives and handles datagrams one at a time until `shutdown` resolves.
    ///
    /// Malformed datagrams never end the loop; only a failure to write to the
    /// operator output does.
    pub async fn run<W: Write>(
        &self,
        reporter: &mut Reporter<W>,
        shutdown: impl Future<Output = ()>,
    ) -> anyhow::Result<()> {
        tokio::pin!(shutdown);
        let mut buf = [0u8; MAX_DATAGRAM];

        loop {
            tokio::select! {
                biased;
                res = self.socket.recv_from(&mut buf) => {
                    match res {
                        Ok((len, from)) => {
                            let outcome = dispatch(&buf[..len], from, self.policy, reporter)
                                .context("failed to write to operator output")?;
                            match outcome {
                                Outcome::Reported { seq, peers } => {
                                    debug!("Report seq={} from {} with {} peers", seq, from, peers)
                                }
                                Outcome::Ignored(reason) => {
                                    debug!("Ignored datagram from {}: {}", from, reason)
                                }
                            }
                        }
                        Err(e) => warn!("Receive error: {}", e),
                    }
                }
                _ = &mut shutdown => {
                    info!("Stopping listener on {}", self.local_addr()?);
                    break;
                }
            }
        }

        Ok(())
    }
}

/// Decodes one datagram and writes either the report or a one-line diagnostic.
pub fn dispatch<W: Write>(
    payload: &[u8],
    from: SocketAddr,
    policy: DecodePolicy,
    reporter: &mut Reporter<W>,
) -> io::Result<Outcome> {
    match protocol::decode_with(payload, policy) {
        Ok(report) => {
            reporter.report(&report, from)?;
            Ok(Outcome::Reported {
                seq: report.seq(),
                peers: report.peers().len(),
            })
        }
        Err(reason) => {
            reporter.ignored(from, payload.len())?;
            Ok(Outcome::Ignored(reason))
        }
    }
}

/// Sends a single encoded report to `target` from an ephemeral port.
pub async fn send_report(target: SocketAddr, report: &StatsReport) -> anyhow::Result<usize> {
    let local: SocketAddr = if target.is_ipv4() {
        (Ipv4Addr::UNSPECIFIED, 0).into()
    } else {
        (Ipv6Addr::UNSPECIFIED, 0).into()
    };
    let socket = UdpSocket::bind(local).await?;
    let sent = socket
        .send_to(&report.to_bytes(), target)
        .await
        .with_context(|| format!("failed to send report to {}", target))?;
    Ok(sent)
}
