// Shared constants and tunables for the delay estimator

/// Span added to the extension offset at each 32-bit TSval wrap.
pub const WRAP_SPAN: i64 = 1 << 32;

/// MovingMin window length, in TSval ticks.
pub const INTERVAL: i64 = 100;

/// Sub-interval spaces per MovingMin window; stored non-decreasing
/// candidates are kept at least interval/spaces ticks apart.
pub const INTERVAL_SPACES: i64 = 5;

/// TSval progress required on a flow before clock inference may run.
pub const MIN_CLOCK_SPAN: i64 = 3 * INTERVAL;

/// Packets required on a flow before clock inference may run.
pub const MIN_CLOCK_PACKETS: u64 = 20;

/// Quantization step for the inferred seconds-per-tick; TSval clocks
/// commonly tick at 1 ms.
pub const SPT_QUANTUM: f64 = 1e-3;

/// Relative skew allowed between the raw hull slope and its quantized
/// value before the clock estimate is rejected.
pub const SKEW_TOLERANCE: f64 = 0.005;

/// Maximum number of concurrently tracked flows; packets for new flows
/// beyond this are dropped until something ages out.
pub const MAX_FLOWS: usize = 10_000;

/// Bytes captured per packet. Whole packets are taken so the slicing
/// parser always sees as many bytes as the IP header claims.
pub const SNAP_LEN: i32 = 65535;

/// Live-capture poll timeout in milliseconds.
pub const CAPTURE_TIMEOUT_MS: i32 = 250;

/// stdout flush cadence for metric lines.
pub const FLUSH_INTERVAL_MS: u64 = 1000;

/// Flush cadence when piping machine-readable output from a live
/// capture to an analysis or display program.
pub const LIVE_MACHINE_FLUSH_INTERVAL_MS: u64 = 100;
