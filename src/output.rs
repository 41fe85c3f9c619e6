// Metric line formatting and buffered stdout output

use std::io::{self, BufWriter, Stdout, Write};
use std::time::{Duration, Instant};

use chrono::{Local, TimeZone};

use crate::constants::{FLUSH_INTERVAL_MS, LIVE_MACHINE_FLUSH_INTERVAL_MS};

/// One emitted packet's metrics. `rtt` and `min_rtt` are present only
/// for passive-ping returns; unset delay variations stay `None` until
/// the formatting boundary.
#[derive(Debug, Clone)]
pub struct MetricRecord {
    /// Capture timestamp, absolute integer seconds.
    pub sec: i64,
    /// Integer seconds since the first captured packet's second.
    pub rel_sec: i64,
    /// Capture timestamp, microseconds part.
    pub usec: i64,
    pub rtt: Option<f64>,
    pub min_rtt: Option<f64>,
    pub bytes_snt: f64,
    pub dv: [Option<f64>; 3],
    pub flow: String,
}

/// Render a time difference with an SI prefix: two fractional digits
/// below ten units, one below a hundred, none above.
pub fn fmt_time_diff(dt: f64) -> String {
    let (scaled, prefix) = if dt < 1e-3 {
        (dt * 1e6, "u")
    } else if dt < 1.0 {
        (dt * 1e3, "m")
    } else {
        (dt, "")
    };
    if scaled < 10.0 {
        format!("{:.2}{}s", scaled, prefix)
    } else if scaled < 100.0 {
        format!("{:.1}{}s", scaled, prefix)
    } else {
        format!(" {:.0}{}s", scaled, prefix)
    }
}

/// Local wall-clock rendering of an absolute capture second.
pub fn fmt_wall_clock(sec: i64) -> String {
    Local
        .timestamp_opt(sec, 0)
        .single()
        .map(|t| t.format("%a %b %e %H:%M:%S %Y").to_string())
        .unwrap_or_else(|| sec.to_string())
}

fn fmt_hms(sec: i64) -> String {
    Local
        .timestamp_opt(sec, 0)
        .single()
        .map(|t| t.format("%H:%M:%S").to_string())
        .unwrap_or_else(|| "--:--:--".to_string())
}

/// Human-readable line: wall clock, round trip and minimum (or dashes),
/// the three delay variations, and the flow key.
pub fn format_human(rec: &MetricRecord) -> String {
    let mut line = match (rec.rtt, rec.min_rtt) {
        (Some(rtt), Some(min)) => format!(
            "{} {} {}",
            fmt_hms(rec.sec),
            fmt_time_diff(rtt),
            fmt_time_diff(min)
        ),
        _ => format!("{} - -", fmt_hms(rec.sec)),
    };
    for dv in rec.dv {
        line.push(' ');
        match dv {
            Some(v) => line.push_str(&fmt_time_diff(v)),
            None => line.push('-'),
        }
    }
    line.push(' ');
    line.push_str(&rec.flow);
    line.push('\n');
    line
}

/// Machine-readable line: timestamp as seconds since capture start, all
/// times in decimal seconds with 6 fractional digits, -1 for
/// unavailable values, byte count as an integer.
pub fn format_machine(rec: &MetricRecord) -> String {
    let dv = rec.dv.map(|d| d.unwrap_or(-1.0));
    match (rec.rtt, rec.min_rtt) {
        (Some(rtt), Some(min)) => format!(
            "{}.{:06} {:.6} {:.6} {:.0} {:.6} {:.6} {:.6} {}\n",
            rec.rel_sec, rec.usec, rtt, min, rec.bytes_snt, dv[0], dv[1], dv[2], rec.flow
        ),
        _ => format!(
            "{}.{:06} -1 -1 {:.0} {:.6} {:.6} {:.6} {}\n",
            rec.rel_sec, rec.usec, rec.bytes_snt, dv[0], dv[1], dv[2], rec.flow
        ),
    }
}

/// Buffered stdout writer for metric lines.
///
/// Lines are flushed on a wall-clock cadence rather than per line; a
/// live capture feeding a display program through machine output gets a
/// tighter cadence.
pub struct MetricWriter {
    out: BufWriter<Stdout>,
    machine: bool,
    flush_interval: Duration,
    next_flush: Instant,
}

impl MetricWriter {
    pub fn new(machine: bool, live: bool) -> Self {
        let flush_interval = if live && machine {
            Duration::from_millis(LIVE_MACHINE_FLUSH_INTERVAL_MS)
        } else {
            Duration::from_millis(FLUSH_INTERVAL_MS)
        };
        MetricWriter {
            out: BufWriter::new(io::stdout()),
            machine,
            flush_interval,
            next_flush: Instant::now() + flush_interval,
        }
    }

    pub fn write(&mut self, rec: &MetricRecord) -> io::Result<()> {
        let line = if self.machine {
            format_machine(rec)
        } else {
            format_human(rec)
        };
        self.out.write_all(line.as_bytes())?;
        if Instant::now() >= self.next_flush {
            self.out.flush()?;
            self.next_flush = Instant::now() + self.flush_interval;
        }
        Ok(())
    }

    pub fn flush(&mut self) -> io::Result<()> {
        self.out.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> MetricRecord {
        MetricRecord {
            sec: 1_700_000_000,
            rel_sec: 0,
            usec: 42,
            rtt: None,
            min_rtt: None,
            bytes_snt: 12345.0,
            dv: [None, Some(0.02), None],
            flow: "10.0.0.1:4000+10.0.0.2:80".to_string(),
        }
    }

    #[test]
    fn test_fmt_time_diff_ranges() {
        assert_eq!(fmt_time_diff(0.00314), "3.14ms");
        assert_eq!(fmt_time_diff(0.0000042), "4.20us");
        assert_eq!(fmt_time_diff(0.000055), "55.0us");
        assert_eq!(fmt_time_diff(0.000250), " 250us");
        assert_eq!(fmt_time_diff(0.0421), "42.1ms");
        assert_eq!(fmt_time_diff(1.2), "1.20s");
        assert_eq!(fmt_time_diff(250.0), " 250s");
    }

    #[test]
    fn test_machine_line_without_rtt() {
        let rec = record();
        let line = format_machine(&rec);
        assert_eq!(
            line,
            "0.000042 -1 -1 12345 -1.000000 0.020000 -1.000000 10.0.0.1:4000+10.0.0.2:80\n"
        );
    }

    #[test]
    fn test_machine_line_with_rtt() {
        let mut rec = record();
        rec.rtt = Some(0.05);
        rec.min_rtt = Some(0.045);
        rec.rel_sec = 11;
        rec.usec = 250_000;
        let line = format_machine(&rec);
        assert_eq!(
            line,
            "11.250000 0.050000 0.045000 12345 -1.000000 0.020000 -1.000000 10.0.0.1:4000+10.0.0.2:80\n"
        );
    }

    #[test]
    fn test_human_line_without_rtt() {
        let line = format_human(&record());
        // time-of-day column depends on the local zone; check the rest
        assert!(line.ends_with(" - - - 20.0ms - 10.0.0.1:4000+10.0.0.2:80\n"));
    }

    #[test]
    fn test_human_line_with_rtt() {
        let mut rec = record();
        rec.rtt = Some(0.05);
        rec.min_rtt = Some(0.045);
        let line = format_human(&rec);
        assert!(line.contains(" 50.0ms 45.0ms "));
        assert!(!line.contains(" - - "));
    }
}
