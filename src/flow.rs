// Per-flow state and delay-variation computation

use crate::constants::{MIN_CLOCK_PACKETS, MIN_CLOCK_SPAN, SKEW_TOLERANCE, SPT_QUANTUM};
use crate::movingmin::MovingMin;
use crate::tswrap::TsWrap;

/// A (capture time, extended TSval) pair.
#[derive(Debug, Clone, Copy, Default)]
pub struct TimeSample {
    pub tm: f64,
    pub ts: i64,
}

/// Best passive-ping round trip seen on a flow so far.
#[derive(Debug, Clone, Copy)]
pub struct MinPing {
    /// Smallest RTT observed, in seconds.
    pub rtt: f64,
    /// Extended TSval, relative to the flow's start, when it was observed.
    pub ts: i64,
    /// Capture time when it was observed.
    pub tm: f64,
}

/// Snapshot of a flow's usable clock, handed to the reverse direction
/// for its delay-variation computation.
#[derive(Debug, Clone, Copy)]
pub struct ClockEstimate {
    pub zero_ts: i64,
    pub zero_tm: f64,
    pub sp_ts: f64,
}

/// Delay variations for one packet, in seconds. Index 0 is destination
/// to sender, 1 is sender to the capture point, 2 is destination through
/// the sender to the capture point. `None` means not computable.
pub type DelayVariation = [Option<f64>; 3];

/// State for one direction of traffic between a source and destination.
///
/// Tracks byte and packet counts, TSval wrap state for both timestamp
/// fields, the best passive-ping RTT, and the inferred sender clock used
/// to convert TSvals into send-time estimates.
#[derive(Debug, Clone)]
pub struct FlowRecord {
    /// Capture time of the flow's first packet.
    pub start_tm: f64,
    /// Extended TSval of the flow's first packet.
    pub start_ts: i64,
    /// Capture time of the most recent packet; drives idle eviction.
    pub last_tm: f64,
    /// Wrap state for the TSval stream.
    pub twrap: TsWrap,
    /// Wrap state for the ECR stream.
    pub ewrap: TsWrap,
    /// Bytes seen on this flow so far.
    pub bytes_snt: f64,
    /// Packets seen on this flow so far.
    pub pkt_cnt: u64,
    /// Best passive-ping round trip so far.
    pub min_ping: Option<MinPing>,
    /// True while the exact reverse flow is present in the table.
    pub rev_flow: bool,

    // clock inference
    mm: MovingMin,
    /// Lower convex hull of interval minima, colinear points included.
    lh_pts: Vec<TimeSample>,
    /// Reference point where added queueing delay is taken as zero.
    pub zero_ts: i64,
    pub zero_tm: f64,
    /// Inferred seconds per TSval tick.
    pub sp_ts: f64,
    /// Flow-relative time the clock was last set.
    pub sp_set: f64,
    /// True while an acceptable clock estimate is available.
    pub clk_set: bool,
    /// Most recent sample accepted for clock inference.
    lst_ts: TimeSample,
}

fn cross(o: TimeSample, a: TimeSample, b: TimeSample) -> f64 {
    (a.ts - o.ts) as f64 * (b.tm - o.tm) - (a.tm - o.tm) * (b.ts - o.ts) as f64
}

impl FlowRecord {
    pub fn new() -> Self {
        let mut mm = MovingMin::default();
        // samples arrive in flow-relative coordinates, so ticks start at 0
        mm.set_first_interval(0);
        FlowRecord {
            start_tm: 0.0,
            start_ts: 0,
            last_tm: 0.0,
            twrap: TsWrap::new(),
            ewrap: TsWrap::new(),
            bytes_snt: 0.0,
            pkt_cnt: 0,
            min_ping: None,
            rev_flow: false,
            mm,
            lh_pts: Vec::new(),
            zero_ts: 0,
            zero_tm: 0.0,
            sp_ts: 0.0,
            sp_set: 0.0,
            clk_set: false,
            lst_ts: TimeSample::default(),
        }
    }

    /// Current clock snapshot, when one is set.
    pub fn clock(&self) -> Option<ClockEstimate> {
        if !self.clk_set {
            return None;
        }
        Some(ClockEstimate {
            zero_ts: self.zero_ts,
            zero_tm: self.zero_tm,
            sp_ts: self.sp_ts,
        })
    }

    /// Feed one (capture time, extended TSval) observation into clock
    /// inference and report whether a usable clock is set.
    ///
    /// Interval minima of capture time over the TSval axis are collected
    /// into a lower convex hull. The hull's longest segment gives the
    /// candidate seconds-per-tick slope; its right endpoint becomes the
    /// zero-delay reference. A slope that quantizes to zero, or sits too
    /// far from its quantized value, invalidates the clock.
    pub fn compute_ticks(&mut self, tm: f64, ts: i64) -> bool {
        // only the first appearance of a TSval is usable
        if self.pkt_cnt > 0 && self.lst_ts.ts >= ts {
            return self.clk_set;
        }
        self.lst_ts = TimeSample { tm, ts };
        let tm = tm - self.start_tm;
        let ts = ts - self.start_ts;
        self.mm.add_sample(tm, ts);
        if !self.mm.new_interval(ts) {
            return self.clk_set;
        }
        let Some(p) = self.mm.interval_min() else {
            return self.clk_set;
        };
        let new_val = TimeSample { tm: p.v, ts: p.t };
        // hull kept with colinear intermediates
        while self.lh_pts.len() >= 2
            && cross(
                self.lh_pts[self.lh_pts.len() - 2],
                self.lh_pts[self.lh_pts.len() - 1],
                new_val,
            ) < 0.0
        {
            self.lh_pts.pop();
        }
        self.lh_pts.push(new_val);
        // segment view of the same hull, colinear intermediates removed
        let mut lh_segs: Vec<TimeSample> = self.lh_pts[..self.lh_pts.len() - 1].to_vec();
        while lh_segs.len() >= 2
            && cross(lh_segs[lh_segs.len() - 2], lh_segs[lh_segs.len() - 1], new_val) <= 0.0
        {
            lh_segs.pop();
        }
        lh_segs.push(new_val);

        if ts < MIN_CLOCK_SPAN || self.lh_pts.len() < 2 || self.pkt_cnt < MIN_CLOCK_PACKETS {
            return self.clk_set;
        }

        // longest segment on the ts axis; ties keep the latest
        let mut longest = 0i64;
        let mut li = 0usize;
        for i in 1..lh_segs.len() {
            let span = lh_segs[i].ts - lh_segs[i - 1].ts;
            if span >= longest {
                longest = span;
                li = i;
            }
        }
        if li == 0 {
            return self.clk_set;
        }
        if lh_segs[li].ts + self.start_ts == self.zero_ts {
            // same segment as last time; only move the reference to a
            // later passive-ping minimum
            if let Some(min) = self.min_ping {
                if min.ts > self.zero_ts {
                    self.zero_ts = min.ts;
                    self.zero_tm = min.tm;
                }
            }
            return self.clk_set;
        }

        let m = (lh_segs[li].tm - lh_segs[li - 1].tm) / (lh_segs[li].ts - lh_segs[li - 1].ts) as f64;
        let spt = (m / SPT_QUANTUM).round() * SPT_QUANTUM;
        if spt == 0.0 {
            self.clk_set = false;
            return self.clk_set;
        }
        let skew = (m - spt).abs();
        if skew / spt > SKEW_TOLERANCE {
            self.clk_set = false;
            return self.clk_set;
        }
        self.sp_ts = spt;
        self.zero_ts = self.start_ts + lh_segs[li].ts;
        self.zero_tm = self.start_tm + lh_segs[li].tm;
        self.clk_set = true;
        self.sp_set = tm;
        self.clk_set
    }

    /// Delay variations for one packet.
    ///
    /// Capture time is send time plus intrinsic delay plus queue delay.
    /// Taking the zero point as the moment of zero queue delay folds the
    /// intrinsic delay out of both sides, so the difference between
    /// capture time and the clock-implied send time is the queueing a
    /// packet picked up beyond the reference. The sender-to-capture-point
    /// value needs only this direction's clock; the two destination-side
    /// values need the reverse flow's clock for the echoed timestamp.
    pub fn compute_dv(
        &mut self,
        tm: f64,
        ts: i64,
        ecr: i64,
        rev_clock: Option<ClockEstimate>,
    ) -> DelayVariation {
        let mut dv: DelayVariation = [None; 3];
        let mut src_tm = None;
        if self.compute_ticks(tm, ts) {
            let mut s = (ts - self.zero_ts) as f64 * self.sp_ts + self.zero_tm;
            if s > tm {
                s = tm;
            }
            dv[1] = Some(tm - s);
            src_tm = Some(s);
        }
        let Some(rc) = rev_clock else {
            return dv;
        };
        let dst_tm = (ecr - rc.zero_ts) as f64 * rc.sp_ts + rc.zero_tm;
        if dst_tm > tm {
            return dv;
        }
        dv[2] = Some(tm - dst_tm);
        if let Some(s) = src_tm {
            dv[0] = Some(s - dst_tm);
        }
        dv
    }
}

impl Default for FlowRecord {
    fn default() -> Self {
        Self::new()
    }
}
