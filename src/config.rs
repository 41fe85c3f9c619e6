use clap::Parser;

/// Passive delay estimator and locator for TCP flows
///
/// Watches TCP traffic carrying the timestamp option and reports, per
/// conforming packet, passive-ping round trips and delay variations for
/// the path segments around the capture point.
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Config {
    /// Do live capture from interface <ifname>
    #[arg(
        short,
        long,
        value_name = "IFNAME",
        conflicts_with = "read",
        required_unless_present = "read"
    )]
    pub interface: Option<String>,

    /// Process capture file <pcap>
    #[arg(short, long, value_name = "PCAP")]
    pub read: Option<String>,

    /// pcap filter applied to packets, e.g. 'net 74.125.0.0/16 or 45.57.0.0/17'
    #[arg(short, long, value_name = "EXPR")]
    pub filter: Option<String>,

    /// Stop after capturing <num> packets
    #[arg(short, long, value_name = "NUM", default_value_t = 0)]
    pub count: u64,

    /// Stop after capturing for <num> seconds
    #[arg(short, long, value_name = "NUM", default_value_t = 0.0)]
    pub seconds: f64,

    /// Don't print summary reports to stderr
    #[arg(short, long)]
    pub quiet: bool,

    /// Print summary reports to stderr every sumInt seconds (the default)
    #[arg(short, long)]
    pub verbose: bool,

    /// Show RTTs through local host applications
    #[arg(short = 'l', long = "showLocal")]
    pub show_local: bool,

    /// Machine readable output: timestamps as seconds since capture
    /// start, all times in seconds with 1 us resolution
    #[arg(short, long)]
    pub machine: bool,

    /// Summary report print interval in seconds
    #[arg(long = "sumInt", value_name = "NUM", default_value_t = 10.0)]
    pub sum_int: f64,

    /// Max age in seconds of an unmatched TSval
    #[arg(long = "tsvalMaxAge", value_name = "NUM", default_value_t = 10.0)]
    pub tsval_max_age: f64,

    /// Flows idle longer than this many seconds are deleted
    #[arg(long = "flowMaxIdle", value_name = "NUM", default_value_t = 300.0)]
    pub flow_max_idle: f64,
}

impl Config {
    /// Summary interval with the quiet flag applied; 0 disables
    /// summaries.
    pub fn effective_sum_int(&self) -> f64 {
        if self.quiet {
            0.0
        } else {
            self.sum_int
        }
    }

    /// BPF program: TCP only, narrowed by the user expression if one
    /// was given.
    pub fn bpf_filter(&self) -> String {
        match &self.filter {
            Some(expr) => format!("tcp and ({})", expr),
            None => "tcp".to_string(),
        }
    }
}
