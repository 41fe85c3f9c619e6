// Per-packet dispatch tying flows, clock inference, and passive-ping
// matching together

use tracing::{info, warn};

use crate::capture::{PacketInput, ParseOutcome};
use crate::flow::{FlowRecord, MinPing};
use crate::flowtable::FlowTable;
use crate::matchtable::TsMatchTable;
use crate::output::MetricRecord;

/// Per-interval reject and traffic counters for the summary report.
#[derive(Debug, Default, Clone)]
pub struct Counters {
    /// Packets seen since the last summary.
    pub pkt_cnt: u64,
    /// Packets seen since startup; drives the packet-count stop limit.
    pub total_pkts: u64,
    pub not_tcp: u64,
    pub no_ts: u64,
    pub not_v4or6: u64,
    pub uni_dir: u64,
}

fn printnz(v: u64, s: &str) -> String {
    if v > 0 {
        format!("{}{}", v, s)
    } else {
        String::new()
    }
}

/// Settings the dispatch needs from the command line.
#[derive(Debug, Clone)]
pub struct CoordinatorSettings {
    /// Age limit for unmatched TSval entries, seconds.
    pub tsval_max_age: f64,
    /// Idle time after which a flow is forgotten, seconds.
    pub flow_max_idle: f64,
    /// Flow admission cap.
    pub max_flows: usize,
    /// Skip TSval tracking for packets addressed to the local host.
    pub filt_local: bool,
    /// The capture interface's own address, when known.
    pub local_ip: Option<String>,
    /// Log a banner when the first packet arrives.
    pub announce_first: bool,
}

/// Owns the flow and match tables and processes packets in capture
/// order. Capture times are normalized against the first packet's
/// integer seconds so microsecond precision survives in a double, and
/// all periodic work is driven by that normalized capture clock, which
/// keeps offline runs deterministic.
pub struct Coordinator {
    settings: CoordinatorSettings,
    flows: FlowTable,
    ts_tbl: TsMatchTable,
    counters: Counters,
    /// First packet's integer seconds; None until a usable packet.
    off_tm: Option<i64>,
    /// Fractional part of the first packet's capture time.
    start_tm: f64,
    /// Normalized capture time of the most recent usable packet.
    cap_tm: f64,
    nxt_clean: f64,
}

impl Coordinator {
    pub fn new(settings: CoordinatorSettings) -> Self {
        let flows = FlowTable::new(settings.max_flows);
        Coordinator {
            settings,
            flows,
            ts_tbl: TsMatchTable::new(),
            counters: Counters::default(),
            off_tm: None,
            start_tm: 0.0,
            cap_tm: 0.0,
            nxt_clean: 0.0,
        }
    }

    /// Normalized capture time of the most recent usable packet.
    pub fn cap_tm(&self) -> f64 {
        self.cap_tm
    }

    /// Capture time elapsed since the first usable packet.
    pub fn elapsed(&self) -> f64 {
        self.cap_tm - self.start_tm
    }

    pub fn counters(&self) -> &Counters {
        &self.counters
    }

    pub fn flow_count(&self) -> usize {
        self.flows.len()
    }

    pub fn flow(&self, key: &str) -> Option<&FlowRecord> {
        self.flows.get(key)
    }

    pub fn match_entries(&self) -> usize {
        self.ts_tbl.len()
    }

    /// Summary line for stderr. Zero-valued reject counters are left out.
    pub fn summary_line(&self) -> String {
        format!(
            "{} flows, {} packets, {}{}{}{}",
            self.flows.len(),
            self.counters.pkt_cnt,
            printnz(self.counters.no_ts, " no TS opt, "),
            printnz(self.counters.uni_dir, " uni-directional, "),
            printnz(self.counters.not_tcp, " not TCP, "),
            printnz(self.counters.not_v4or6, " not v4 or v6, "),
        )
    }

    /// Reset the per-interval counters after a summary was reported.
    pub fn reset_interval_counters(&mut self) {
        self.counters.pkt_cnt = 0;
        self.counters.no_ts = 0;
        self.counters.uni_dir = 0;
        self.counters.not_tcp = 0;
        self.counters.not_v4or6 = 0;
    }

    /// Process one parsed frame; returns a record to emit, if any.
    pub fn handle_frame(&mut self, outcome: ParseOutcome) -> Option<MetricRecord> {
        self.counters.pkt_cnt += 1;
        self.counters.total_pkts += 1;
        let record = match outcome {
            ParseOutcome::NotTcp => {
                self.counters.not_tcp += 1;
                None
            }
            ParseOutcome::NoTimestamp => {
                self.counters.no_ts += 1;
                None
            }
            ParseOutcome::NotIp => {
                self.counters.not_v4or6 += 1;
                None
            }
            ParseOutcome::Packet(pi) => self.process(pi),
        };
        if self.off_tm.is_some() && self.cap_tm >= self.nxt_clean {
            self.ts_tbl.age_out(self.cap_tm, self.settings.tsval_max_age);
            self.flows.age_out(self.cap_tm, self.settings.flow_max_idle);
            self.nxt_clean = self.cap_tm + self.settings.tsval_max_age;
        }
        record
    }

    fn process(&mut self, pi: PacketInput) -> Option<MetricRecord> {
        // a zero TSval carries no clock information; a zero echo is only
        // legitimate on the opening SYN
        if pi.ts == 0 || (pi.ecr == 0 && !pi.syn_only) {
            return None;
        }

        match self.off_tm {
            None => {
                self.off_tm = Some(pi.sec);
                self.start_tm = pi.usec as f64 * 1e-6;
                self.cap_tm = self.start_tm;
                if self.settings.announce_first {
                    info!("First packet at {}", crate::output::fmt_wall_clock(pi.sec));
                }
            }
            Some(off) => {
                self.cap_tm = (pi.sec - off) as f64 + pi.usec as f64 * 1e-6;
            }
        }
        let cap_tm = self.cap_tm;

        let fkey = format!("{}+{}", pi.src, pi.dst);
        let rkey = format!("{}+{}", pi.dst, pi.src);

        if !self.flows.contains(&fkey) {
            let mut fr = FlowRecord::new();
            fr.start_tm = cap_tm;
            fr.start_ts = fr.twrap.extend(pi.ts);
            if !self.flows.try_insert(fkey.clone(), fr) {
                // table full; drop until something ages out
                return None;
            }
            if self.flows.contains(&rkey) {
                self.flows.pair(&fkey, &rkey);
            }
        }

        let Some(rev_flow) = self.flows.get(&fkey).map(|f| f.rev_flow) else {
            warn!("flow {} missing from table right after insert", fkey);
            return None;
        };
        let rev_clock = if rev_flow {
            self.flows.clock_of(&rkey)
        } else {
            None
        };

        let fr = self.flows.get_mut(&fkey)?;
        let ts_ext = fr.twrap.extend(pi.ts);
        let ecr_ext = fr.ewrap.extend(pi.ecr);
        fr.last_tm = cap_tm;
        fr.bytes_snt += pi.sz as f64;
        fr.pkt_cnt += 1;

        let dv = fr.compute_dv(cap_tm, ts_ext, ecr_ext, rev_clock);
        let dvs = dv.iter().any(|d| d.is_some());

        // passive-ping matching runs only when both directions of the
        // flow pass the capture point
        let mut rtt_origin = None;
        if rev_flow {
            rtt_origin = self.ts_tbl.take(&format!("{}+{}", rkey, pi.ecr));
            let to_local = self.settings.local_ip.as_deref() == Some(pi.dst_host.as_str());
            if !self.settings.filt_local || !to_local {
                self.ts_tbl.observe(format!("{}+{}", fkey, pi.ts), cap_tm);
            }
        } else {
            self.counters.uni_dir += 1;
        }

        let rel_sec = self.off_tm.map_or(0, |off| pi.sec - off);
        if dvs && rtt_origin.is_none() {
            return Some(MetricRecord {
                sec: pi.sec,
                rel_sec,
                usec: pi.usec,
                rtt: None,
                min_rtt: None,
                bytes_snt: fr.bytes_snt,
                dv,
                flow: fkey,
            });
        }
        if let Some(t0) = rtt_origin {
            let rtt = cap_tm - t0;
            if fr.min_ping.map_or(true, |m| rtt < m.rtt) {
                fr.min_ping = Some(MinPing {
                    rtt,
                    ts: ts_ext - fr.start_ts,
                    tm: cap_tm,
                });
            }
            let min_rtt = fr.min_ping.map(|m| m.rtt);
            return Some(MetricRecord {
                sec: pi.sec,
                rel_sec,
                usec: pi.usec,
                rtt: Some(rtt),
                min_rtt,
                bytes_snt: fr.bytes_snt,
                dv,
                flow: fkey,
            });
        }
        None
    }
}
