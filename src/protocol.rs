use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;

/// Message type tag of a stats report. The only tag this listener accepts.
pub const MSG_STATS_REPORT: u8 = 20;

/// Largest number of peers a single report can declare (`peer_count` is one byte).
pub const MAX_PEERS: usize = u8::MAX as usize;

/// RTT value written on the wire when the sender has no sample for a peer.
pub const RTT_UNKNOWN: f32 = -1.0;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RejectReason {
    #[error("payload too short: {len} bytes")]
    TooShort { len: usize },
    #[error("unrecognized message type {msg_type}")]
    WrongType { msg_type: u8 },
    #[error("peer list truncated: {complete} of {declared} records present")]
    Truncated { declared: u8, complete: usize },
    #[error("{extra} trailing bytes after declared peer records")]
    TrailingBytes { extra: usize },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EncodeError {
    #[error("report carries {count} peers, at most 255 fit in a header")]
    TooManyPeers { count: usize },
}

/// How the decoder treats a payload whose length disagrees with `peer_count`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DecodePolicy {
    /// Keep whatever complete peer records are present; ignore trailing bytes.
    #[default]
    Lenient,
    /// Require exactly `peer_count` records and nothing after them.
    Strict,
}

/// Fixed header in front of every stats report.
///
/// Layout (little-endian):
/// - msg_type: u8 (1 byte)
/// - peer_count: u8 (1 byte)
/// - reserved: u16 (2 bytes, ignored)
/// - src_id: u32 (4 bytes)
/// - seq: u64 (8 bytes)
/// Total: 16 bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatsHeader {
    pub peer_count: u8,
    pub src_id: u32,
    pub seq: u64,
}

impl StatsHeader {
    pub const SIZE: usize = 16;

    pub fn encode(&self, buf: &mut impl BufMut) {
        buf.put_u8(MSG_STATS_REPORT);
        buf.put_u8(self.peer_count);
        buf.put_u16_le(0);
        buf.put_u32_le(self.src_id);
        buf.put_u64_le(self.seq);
    }

    pub fn decode(buf: &mut impl Buf) -> Result<Self, RejectReason> {
        if buf.remaining() < Self::SIZE {
            return Err(RejectReason::TooShort {
                len: buf.remaining(),
            });
        }
        let msg_type = buf.get_u8();
        if msg_type != MSG_STATS_REPORT {
            return Err(RejectReason::WrongType { msg_type });
        }
        let peer_count = buf.get_u8();
        let _reserved = buf.get_u16_le();
        let src_id = buf.get_u32_le();
        let seq = buf.get_u64_le();

        Ok(Self {
            peer_count,
            src_id,
            seq,
        })
    }
}

/// One peer record: `peer_id: u32`, `avg_rtt_us: f32`, `loss_count: u32`, 12 bytes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PeerStat {
    pub peer_id: u32,
    /// Negative means "no RTT available". Use [`PeerStat::rtt_us`] to read it.
    pub avg_rtt_us: f32,
    pub loss_count: u32,
}

impl PeerStat {
    pub const SIZE: usize = 12;

    pub fn new(peer_id: u32, avg_rtt_us: f32, loss_count: u32) -> Self {
        Self {
            peer_id,
            avg_rtt_us,
            loss_count,
        }
    }

    pub fn unknown_rtt(peer_id: u32, loss_count: u32) -> Self {
        Self::new(peer_id, RTT_UNKNOWN, loss_count)
    }

    /// Average RTT in microseconds, or `None` for the sentinel (anything not `>= 0`, NaN included).
    pub fn rtt_us(&self) -> Option<f32> {
        (self.avg_rtt_us >= 0.0).then_some(self.avg_rtt_us)
    }

    fn encode(&self, buf: &mut impl BufMut) {
        buf.put_u32_le(self.peer_id);
        buf.put_f32_le(self.avg_rtt_us);
        buf.put_u32_le(self.loss_count);
    }

    fn decode(buf: &mut impl Buf) -> Self {
        Self {
            peer_id: buf.get_u32_le(),
            avg_rtt_us: buf.get_f32_le(),
            loss_count: buf.get_u32_le(),
        }
    }
}

/// A decoded stats report. Lives for the processing of a single datagram.
#[derive(Debug, Clone, PartialEq)]
pub struct StatsReport {
    src_id: u32,
    seq: u64,
    peers: Vec<PeerStat>,
}

impl StatsReport {
    pub fn new(src_id: u32, seq: u64, peers: Vec<PeerStat>) -> Result<Self, EncodeError> {
        if peers.len() > MAX_PEERS {
            return Err(EncodeError::TooManyPeers { count: peers.len() });
        }
        Ok(Self { src_id, seq, peers })
    }

    pub fn src_id(&self) -> u32 {
        self.src_id
    }

    pub fn seq(&self) -> u64 {
        self.seq
    }

    /// Peers in wire order.
    pub fn peers(&self) -> &[PeerStat] {
        &self.peers
    }

    pub fn encoded_len(&self) -> usize {
        StatsHeader::SIZE + self.peers.len() * PeerStat::SIZE
    }

    pub fn encode(&self, buf: &mut impl BufMut) {
        let header = StatsHeader {
            // `new` and the decoder both cap the list at MAX_PEERS.
            peer_count: self.peers.len() as u8,
            src_id: self.src_id,
            seq: self.seq,
        };
        header.encode(buf);
        for peer in &self.peers {
            peer.encode(buf);
        }
    }

    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.encoded_len());
        self.encode(&mut buf);
        buf.freeze()
    }
}

/// Decodes a datagram with the default (lenient) truncation policy.
#[allow(dead_code)]
pub fn decode(payload: &[u8]) -> Result<StatsReport, RejectReason> {
    decode_with(payload, DecodePolicy::Lenient)
}

pub fn decode_with(payload: &[u8], policy: DecodePolicy) -> Result<StatsReport, RejectReason> {
    let mut buf = payload;
    let header = StatsHeader::decode(&mut buf)?;

    if policy == DecodePolicy::Strict {
        let expected = header.peer_count as usize * PeerStat::SIZE;
        let remaining = buf.remaining();
        if remaining < expected {
            return Err(RejectReason::Truncated {
                declared: header.peer_count,
                complete: remaining / PeerStat::SIZE,
            });
        }
        if remaining > expected {
            return Err(RejectReason::TrailingBytes {
                extra: remaining - expected,
            });
        }
    }

    let mut peers = Vec::with_capacity(header.peer_count as usize);
    for _ in 0..header.peer_count {
        if buf.remaining() < PeerStat::SIZE {
            break;
        }
        peers.push(PeerStat::decode(&mut buf));
    }

    Ok(StatsReport {
        src_id: header.src_id,
        seq: header.seq,
        peers,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{Rng, thread_rng};

    fn sample_payload() -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(&[20, 2, 0, 0]);
        buf.extend_from_slice(&7u32.to_le_bytes());
        buf.extend_from_slice(&42u64.to_le_bytes());
        buf.extend_from_slice(&1u32.to_le_bytes());
        buf.extend_from_slice(&10.5f32.to_le_bytes());
        buf.extend_from_slice(&0u32.to_le_bytes());
        buf.extend_from_slice(&2u32.to_le_bytes());
        buf.extend_from_slice(&(-1.0f32).to_le_bytes());
        buf.extend_from_slice(&3u32.to_le_bytes());
        buf
    }

    #[test]
    fn test_decode_hand_built_report() {
        let report = decode(&sample_payload()).expect("valid report");
        assert_eq!(report.src_id(), 7);
        assert_eq!(report.seq(), 42);
        assert_eq!(
            report.peers(),
            &[PeerStat::new(1, 10.5, 0), PeerStat::new(2, -1.0, 3)]
        );
        assert_eq!(report.peers()[0].rtt_us(), Some(10.5));
        assert_eq!(report.peers()[1].rtt_us(), None);
    }

    #[test]
    fn test_too_short_regardless_of_content() {
        for len in 0..StatsHeader::SIZE {
            let payload = vec![MSG_STATS_REPORT; len];
            assert_eq!(decode(&payload), Err(RejectReason::TooShort { len }));
            assert_eq!(
                decode_with(&payload, DecodePolicy::Strict),
                Err(RejectReason::TooShort { len })
            );
        }
    }

    #[test]
    fn test_wrong_type_regardless_of_rest() {
        let mut payload = sample_payload();
        for msg_type in [0u8, 10, 11, 19, 21, 255] {
            payload[0] = msg_type;
            assert_eq!(decode(&payload), Err(RejectReason::WrongType { msg_type }));
        }

        // Header-sized garbage with a bad tag is still WrongType, not a truncation.
        let mut garbage = vec![0xAB; StatsHeader::SIZE];
        garbage[1] = 200;
        assert_eq!(
            decode_with(&garbage, DecodePolicy::Strict),
            Err(RejectReason::WrongType { msg_type: 0xAB })
        );
    }

    #[test]
    fn test_truncated_peer_list_is_partial_success() {
        let peers: Vec<PeerStat> = (1..=3).map(|i| PeerStat::new(i, i as f32, i)).collect();
        let report = StatsReport::new(9, 1, peers.clone()).unwrap();
        let mut payload = report.to_bytes().to_vec();
        payload[1] = 5;
        // Half of a fourth record.
        payload.extend_from_slice(&[0u8; 6]);

        let decoded = decode(&payload).expect("lenient decode");
        assert_eq!(decoded.peers(), peers.as_slice());
        assert_eq!(decoded.src_id(), 9);
    }

    #[test]
    fn test_reserved_ignored_and_trailing_bytes_lenient() {
        let mut payload = sample_payload();
        payload[2] = 0xFF;
        payload[3] = 0xEE;
        payload.extend_from_slice(&[1, 2, 3]);
        let report = decode(&payload).unwrap();
        assert_eq!(report.peers().len(), 2);
    }

    #[test]
    fn test_strict_rejects_length_mismatch() {
        let mut short = sample_payload();
        short.truncate(StatsHeader::SIZE + PeerStat::SIZE + 4);
        assert_eq!(
            decode_with(&short, DecodePolicy::Strict),
            Err(RejectReason::Truncated {
                declared: 2,
                complete: 1
            })
        );

        let mut long = sample_payload();
        long.push(0);
        assert_eq!(
            decode_with(&long, DecodePolicy::Strict),
            Err(RejectReason::TrailingBytes { extra: 1 })
        );

        assert!(decode_with(&sample_payload(), DecodePolicy::Strict).is_ok());
    }

    #[test]
    fn test_encode_matches_wire_layout() {
        let report = StatsReport::new(
            7,
            42,
            vec![PeerStat::new(1, 10.5, 0), PeerStat::unknown_rtt(2, 3)],
        )
        .unwrap();
        assert_eq!(report.encoded_len(), 40);
        assert_eq!(report.to_bytes().as_ref(), sample_payload().as_slice());
    }

    #[test]
    fn test_zero_peers() {
        let report = StatsReport::new(1, u64::MAX, Vec::new()).unwrap();
        let bytes = report.to_bytes();
        assert_eq!(bytes.len(), StatsHeader::SIZE);
        assert_eq!(decode(&bytes).unwrap(), report);
    }

    #[test]
    fn test_too_many_peers() {
        let peers = vec![PeerStat::unknown_rtt(1, 0); MAX_PEERS + 1];
        assert_eq!(
            StatsReport::new(1, 1, peers),
            Err(EncodeError::TooManyPeers {
                count: MAX_PEERS + 1
            })
        );
    }

    #[test]
    fn test_random_reports_survive_the_wire() {
        let mut rng = thread_rng();
        for _ in 0..64 {
            let count = rng.gen_range(0..=MAX_PEERS);
            let peers = (0..count)
                .map(|_| {
                    let rtt = if rng.gen_bool(0.2) {
                        RTT_UNKNOWN
                    } else {
                        rng.gen_range(0.0f32..100_000.0)
                    };
                    PeerStat::new(rng.r#gen(), rtt, rng.r#gen())
                })
                .collect();
            let report = StatsReport::new(rng.r#gen(), rng.r#gen(), peers).unwrap();
            let bytes = report.to_bytes();
            assert_eq!(decode(&bytes).unwrap(), report);
            assert_eq!(decode_with(&bytes, DecodePolicy::Strict).unwrap(), report);
        }
    }
}
