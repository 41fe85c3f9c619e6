// dlyloc - passive delay estimator and locator for TCP flows

use clap::Parser;
use tracing::{error, info};

use dlyloc::capture::{self, PacketSource};
use dlyloc::config::Config;
use dlyloc::constants::MAX_FLOWS;
use dlyloc::coordinator::{Coordinator, CoordinatorSettings};
use dlyloc::output::MetricWriter;

fn main() {
    let config = match Config::try_parse() {
        Ok(config) => config,
        Err(e) => {
            let bad_args = e.use_stderr();
            let _ = e.print();
            std::process::exit(if bad_args { 1 } else { 0 });
        }
    };

    init_logging(config.verbose);

    let filter = config.bpf_filter();
    let live = config.interface.is_some();
    let mut source = match (&config.interface, &config.read) {
        (Some(ifname), _) => match PacketSource::open_live(ifname, &filter) {
            Ok(source) => source,
            Err(e) => {
                error!("Couldn't open {}: {}", ifname, e);
                std::process::exit(1);
            }
        },
        (None, Some(path)) => match PacketSource::open_file(path, &filter) {
            Ok(source) => source,
            Err(e) => {
                error!("Couldn't open {}: {}", path, e);
                std::process::exit(1);
            }
        },
        (None, None) => {
            error!("need an interface or a capture file");
            std::process::exit(1);
        }
    };

    // passive pings through the capture host itself are suppressed
    // unless asked for, and only make sense on a live interface
    let mut filt_local = live && !config.show_local;
    let mut local_ip = None;
    if filt_local {
        local_ip = config.interface.as_deref().and_then(capture::local_addr_of);
        if local_ip.is_none() {
            filt_local = false;
        }
    }

    let sum_int = config.effective_sum_int();
    let mut coordinator = Coordinator::new(CoordinatorSettings {
        tsval_max_age: config.tsval_max_age,
        flow_max_idle: config.flow_max_idle,
        max_flows: MAX_FLOWS,
        filt_local,
        local_ip,
        announce_first: sum_int > 0.0,
    });
    let mut writer = MetricWriter::new(config.machine, live);
    let link = source.datalink();
    let mut nxt_sum = 0.0f64;

    while let Some(frame) = source.next_frame() {
        let outcome = capture::parse_frame(link, &frame);
        if let Some(record) = coordinator.handle_frame(outcome) {
            if let Err(e) = writer.write(&record) {
                error!("output write failed: {}", e);
                break;
            }
        }

        if (config.seconds > 0.0 && coordinator.elapsed() >= config.seconds)
            || (config.count > 0 && coordinator.counters().total_pkts >= config.count)
        {
            info!("{}", coordinator.summary_line());
            info!(
                "Captured {} packets in {:.6} seconds",
                coordinator.counters().total_pkts,
                coordinator.elapsed()
            );
            break;
        }
        if sum_int > 0.0 && coordinator.cap_tm() >= nxt_sum {
            if nxt_sum > 0.0 {
                info!("{}", coordinator.summary_line());
                coordinator.reset_interval_counters();
            }
            nxt_sum = coordinator.cap_tm() + sum_int;
        }
    }

    if let Err(e) = writer.flush() {
        error!("output flush failed: {}", e);
    }
}

/// Route diagnostics to stderr; stdout carries only metric lines.
fn init_logging(verbose: bool) {
    let subscriber = tracing_subscriber::fmt()
        .with_target(false)
        .with_writer(std::io::stderr);
    if verbose {
        subscriber.with_max_level(tracing::Level::DEBUG).init();
    } else {
        subscriber.with_max_level(tracing::Level::INFO).init();
    }
}
