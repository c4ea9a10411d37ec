use crate::connection::Connection;
use crate::packet::{Direction, Packet};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Heuristic sensitivity preset.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Sensitivity {
    Lenient,
    #[default]
    Balanced,
    Strict,
}

/// Tunable evidence thresholds behind a sensitivity preset.
#[derive(Clone, Copy, Debug)]
pub struct Thresholds {
    /// Consecutive pure ACKs needed as delayed-ACK evidence
    pub delayed_ack_count: u32,
    /// ACK latency (vs the acknowledged data packet) counting as delayed
    pub delayed_ack_ms: u64,
    /// Growth ratio for slow-start step detection
    pub slow_start_ratio: f64,
    /// Divisor modifier for the Nagle payload floor
    pub nagle_modifier: f64,
}

impl Sensitivity {
    pub fn thresholds(self) -> Thresholds {
        match self {
            Sensitivity::Lenient => Thresholds {
                delayed_ack_count: 2,
                delayed_ack_ms: 100,
                slow_start_ratio: 0.7,
                nagle_modifier: 1.4,
            },
            Sensitivity::Balanced => Thresholds {
                delayed_ack_count: 3,
                delayed_ack_ms: 150,
                slow_start_ratio: 0.5,
                nagle_modifier: 1.7,
            },
            Sensitivity::Strict => Thresholds {
                delayed_ack_count: 4,
                delayed_ack_ms: 200,
                slow_start_ratio: 0.3,
                nagle_modifier: 2.0,
            },
        }
    }

    pub fn from_name(name: &str) -> Option<Sensitivity> {
        match name.to_ascii_uppercase().as_str() {
            "LENIENT" => Some(Sensitivity::Lenient),
            "BALANCED" => Some(Sensitivity::Balanced),
            "STRICT" => Some(Sensitivity::Strict),
            _ => None,
        }
    }
}

/// Per-direction verdict for one feature.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct DirectionVerdict {
    pub outgoing: bool,
    pub incoming: bool,
}

impl DirectionVerdict {
    pub fn get(self, direction: Direction) -> bool {
        match direction {
            Direction::Outgoing => self.outgoing,
            Direction::Incoming => self.incoming,
        }
    }

    fn set(&mut self, direction: Direction, value: bool) {
        match direction {
            Direction::Outgoing => self.outgoing = value,
            Direction::Incoming => self.incoming = value,
        }
    }

    pub fn any(self) -> bool {
        self.outgoing || self.incoming
    }
}

/// Heuristic verdicts for one connection.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct FeatureReport {
    pub delayed_ack: DirectionVerdict,
    pub nagle: DirectionVerdict,
    pub slow_start: DirectionVerdict,
}

impl FeatureReport {
    pub fn any(self) -> bool {
        self.delayed_ack.any() || self.nagle.any() || self.slow_start.any()
    }
}

const DIRECTIONS: [Direction; 2] = [Direction::Outgoing, Direction::Incoming];

/// Only the earliest data segments matter for slow-start growth
const SLOW_START_WINDOW: usize = 10;
/// Consecutive expanding steps asserting slow start
const SLOW_START_MIN_RUN: u32 = 2;

/// Run all detectors over the connection's accumulated packets.
pub fn detect(conn: &Connection, sensitivity: Sensitivity) -> FeatureReport {
    let packets = conn.store().snapshot();
    let thresholds = sensitivity.thresholds();
    FeatureReport {
        delayed_ack: detect_delayed_ack(&packets, &thresholds),
        nagle: detect_nagle(conn, &packets, &thresholds),
        slow_start: detect_slow_start(&packets, &thresholds),
    }
}

/// Delayed-ACK evidence: walking newest to oldest, pure ACKs that follow
/// data-carrying packets. Either a long enough consecutive run or a
/// latency above the threshold (relative to the acknowledged data packet)
/// counts. The feature is asserted for a direction once the evidence
/// exceeds half of that direction's packet count.
fn detect_delayed_ack(packets: &[Arc<Packet>], t: &Thresholds) -> DirectionVerdict {
    let mut totals = [0u32; 2];
    for p in packets {
        totals[p.direction().index()] += 1;
    }

    let mut evidence = [0u32; 2];
    let mut consecutive = [0u32; 2];
    for p in packets.iter().rev() {
        let i = p.direction().index();
        if !p.is_pure_ack() {
            consecutive[i] = 0;
            continue;
        }
        // the data packet this ACK acknowledges
        let acked = packets
            .iter()
            .rev()
            .find(|q| q.seq < p.ack && q.carries_data() && q.direction() != p.direction());
        let Some(data) = acked else { continue };
        consecutive[i] += 1;
        let late = p.ts >= data.ts && (p.ts - data.ts).as_millis() > t.delayed_ack_ms;
        if consecutive[i] >= t.delayed_ack_count || late {
            evidence[i] += 1;
            consecutive[i] = 0;
        }
    }

    let mut verdict = DirectionVerdict::default();
    for d in DIRECTIONS {
        let i = d.index();
        verdict.set(d, evidence[i] * 2 > totals[i]);
    }
    verdict
}

/// Nagle-style coalescing: once an MSS is known for a direction, data
/// packets filled close to it (payload >= MSS - MSS/modifier) indicate
/// buffered small writes.
fn detect_nagle(conn: &Connection, packets: &[Arc<Packet>], t: &Thresholds) -> DirectionVerdict {
    let mut verdict = DirectionVerdict::default();
    for d in DIRECTIONS {
        let Some(mss) = conn.attrs(d).mss else { continue };
        let mss = f64::from(mss);
        let floor = mss - mss / t.nagle_modifier;
        let mut total = 0usize;
        let mut evidence = 0usize;
        for p in packets.iter().filter(|p| p.direction() == d) {
            total += 1;
            if p.carries_data() && p.payload_len as f64 >= floor {
                evidence += 1;
            }
        }
        verdict.set(d, evidence * 2 > total);
    }
    verdict
}

/// Slow-start heuristic: within the first few data segments of a
/// direction, a step between consecutive segments is expanding when
/// `prev_len <= ratio * next_len`; a run of expanding steps asserts the
/// feature. A smaller ratio demands faster growth.
fn detect_slow_start(packets: &[Arc<Packet>], t: &Thresholds) -> DirectionVerdict {
    let mut verdict = DirectionVerdict::default();
    for d in DIRECTIONS {
        let data: Vec<&Arc<Packet>> = packets
            .iter()
            .filter(|p| p.direction() == d && p.carries_data())
            .take(SLOW_START_WINDOW)
            .collect();
        let mut run = 0u32;
        for w in data.windows(2) {
            let (prev, next) = (w[0], w[1]);
            if prev.payload_len as f64 <= t.slow_start_ratio * next.payload_len as f64 {
                run += 1;
                if run >= SLOW_START_MIN_RUN {
                    verdict.set(d, true);
                    break;
                }
            } else {
                run = 0;
            }
        }
    }
    verdict
}
