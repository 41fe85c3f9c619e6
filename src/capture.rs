// Packet capture and header extraction

use etherparse::{NetSlice, SlicedPacket, TcpOptionElement, TransportSlice};
use pcap::{Active, Capture, Linktype, Offline};

use crate::constants::{CAPTURE_TIMEOUT_MS, SNAP_LEN};

/// One captured frame: libpcap timestamp, on-wire length, and the
/// captured bytes (possibly truncated to the snap length).
#[derive(Debug, Clone)]
pub struct Frame {
    pub sec: i64,
    pub usec: i64,
    pub wire_len: usize,
    pub data: Vec<u8>,
}

/// A fully parsed TCP packet carrying the timestamp option. This is
/// what the per-packet dispatch consumes.
#[derive(Debug, Clone)]
pub struct PacketInput {
    /// Raw capture timestamp, seconds part.
    pub sec: i64,
    /// Raw capture timestamp, microseconds part.
    pub usec: i64,
    /// Source endpoint as "ip:port".
    pub src: String,
    /// Destination endpoint as "ip:port".
    pub dst: String,
    /// Bare destination address, for the local-host filter.
    pub dst_host: String,
    /// Raw 32-bit TSval from the timestamp option.
    pub ts: u32,
    /// Raw 32-bit echo reply from the timestamp option.
    pub ecr: u32,
    /// True when the TCP flags are exactly SYN.
    pub syn_only: bool,
    /// Total bytes of the packet on the wire.
    pub sz: usize,
}

/// Result of parsing one frame. The reject variants map onto the
/// dispatch counters.
#[derive(Debug)]
pub enum ParseOutcome {
    Packet(PacketInput),
    NotTcp,
    NoTimestamp,
    NotIp,
}

/// Parse a captured frame down to the fields the estimator needs.
pub fn parse_frame(link: Linktype, frame: &Frame) -> ParseOutcome {
    let sliced = if link == Linktype::ETHERNET {
        SlicedPacket::from_ethernet(&frame.data).ok()
    } else if link == Linktype::NULL || link == Linktype::LOOP {
        // 4-byte address-family header before the IP packet
        if frame.data.len() < 4 {
            return ParseOutcome::NotIp;
        }
        SlicedPacket::from_ip(&frame.data[4..]).ok()
    } else {
        SlicedPacket::from_ip(&frame.data).ok()
    };
    let Some(sliced) = sliced else {
        return ParseOutcome::NotTcp;
    };

    let tcp = match &sliced.transport {
        Some(TransportSlice::Tcp(tcp)) => tcp.to_header(),
        _ => return ParseOutcome::NotTcp,
    };

    let mut tsopt = None;
    for opt in tcp.options_iterator() {
        if let Ok(TcpOptionElement::Timestamp(tsval, ecr)) = opt {
            tsopt = Some((tsval, ecr));
            break;
        }
    }
    let Some((ts, ecr)) = tsopt else {
        return ParseOutcome::NoTimestamp;
    };

    let (src_host, dst_host) = match &sliced.net {
        Some(NetSlice::Ipv4(v4)) => (
            v4.header().source_addr().to_string(),
            v4.header().destination_addr().to_string(),
        ),
        Some(NetSlice::Ipv6(v6)) => (
            v6.header().source_addr().to_string(),
            v6.header().destination_addr().to_string(),
        ),
        _ => return ParseOutcome::NotIp,
    };

    let syn_only = tcp.syn
        && !tcp.ack
        && !tcp.fin
        && !tcp.rst
        && !tcp.psh
        && !tcp.urg
        && !tcp.ece
        && !tcp.cwr;

    ParseOutcome::Packet(PacketInput {
        sec: frame.sec,
        usec: frame.usec,
        src: format!("{}:{}", src_host, tcp.source_port),
        dst: format!("{}:{}", dst_host, tcp.destination_port),
        dst_host,
        ts,
        ecr,
        syn_only,
        sz: frame.wire_len,
    })
}

/// A live interface or an offline capture file, already filtered down
/// to TCP with any user expression applied.
pub enum PacketSource {
    Live(Capture<Active>),
    File(Capture<Offline>),
}

impl PacketSource {
    pub fn open_live(ifname: &str, filter: &str) -> Result<Self, pcap::Error> {
        let mut cap = Capture::from_device(ifname)?
            .promisc(false)
            .snaplen(SNAP_LEN)
            .timeout(CAPTURE_TIMEOUT_MS)
            .open()?;
        cap.filter(filter, true)?;
        Ok(PacketSource::Live(cap))
    }

    pub fn open_file(path: &str, filter: &str) -> Result<Self, pcap::Error> {
        let mut cap = Capture::from_file(path)?;
        cap.filter(filter, true)?;
        Ok(PacketSource::File(cap))
    }

    pub fn datalink(&self) -> Linktype {
        match self {
            PacketSource::Live(cap) => cap.get_datalink(),
            PacketSource::File(cap) => cap.get_datalink(),
        }
    }

    /// Next frame, or None at end of input. Live-capture poll timeouts
    /// are retried; any other error ends the stream.
    pub fn next_frame(&mut self) -> Option<Frame> {
        loop {
            let next = match self {
                PacketSource::Live(cap) => cap.next_packet(),
                PacketSource::File(cap) => cap.next_packet(),
            };
            match next {
                Ok(pkt) => {
                    return Some(Frame {
                        sec: pkt.header.ts.tv_sec as i64,
                        usec: pkt.header.ts.tv_usec as i64,
                        wire_len: pkt.header.len as usize,
                        data: pkt.data.to_vec(),
                    });
                }
                Err(pcap::Error::TimeoutExpired) => continue,
                Err(_) => return None,
            }
        }
    }
}

/// First IPv4 address of a capture interface, used to suppress
/// passive-ping tracking of flows terminating on the local host.
pub fn local_addr_of(ifname: &str) -> Option<String> {
    let devices = pcap::Device::list().ok()?;
    let dev = devices.into_iter().find(|d| d.name == ifname)?;
    dev.addresses
        .iter()
        .map(|a| a.addr)
        .find(|a| a.is_ipv4())
        .map(|a| a.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Ethernet + IPv4 + TCP frame with the given flags byte and TCP
    /// options bytes appended to a 20-byte TCP header.
    fn v4_tcp_frame(flags: u8, options: &[u8]) -> Frame {
        assert_eq!(options.len() % 4, 0);
        let tcp_len = 20 + options.len();
        let ip_total = 20 + tcp_len;
        let mut data = Vec::new();
        // ethernet
        data.extend_from_slice(&[0x02, 0, 0, 0, 0, 1]);
        data.extend_from_slice(&[0x02, 0, 0, 0, 0, 2]);
        data.extend_from_slice(&[0x08, 0x00]);
        // ipv4, no options
        data.push(0x45);
        data.push(0);
        data.extend_from_slice(&(ip_total as u16).to_be_bytes());
        data.extend_from_slice(&[0, 0, 0, 0]); // id, flags/frag
        data.push(64); // ttl
        data.push(6); // tcp
        data.extend_from_slice(&[0, 0]); // checksum (not validated)
        data.extend_from_slice(&[10, 0, 0, 1]);
        data.extend_from_slice(&[10, 0, 0, 2]);
        // tcp
        data.extend_from_slice(&1234u16.to_be_bytes());
        data.extend_from_slice(&80u16.to_be_bytes());
        data.extend_from_slice(&1u32.to_be_bytes()); // seq
        data.extend_from_slice(&2u32.to_be_bytes()); // ack
        data.push(((tcp_len / 4) as u8) << 4);
        data.push(flags);
        data.extend_from_slice(&1024u16.to_be_bytes()); // window
        data.extend_from_slice(&[0, 0, 0, 0]); // checksum, urgent
        data.extend_from_slice(options);
        let wire_len = data.len();
        Frame {
            sec: 1_700_000_000,
            usec: 250_000,
            wire_len,
            data,
        }
    }

    fn ts_option(tsval: u32, ecr: u32) -> Vec<u8> {
        let mut opt = vec![1, 1, 8, 10];
        opt.extend_from_slice(&tsval.to_be_bytes());
        opt.extend_from_slice(&ecr.to_be_bytes());
        opt
    }

    #[test]
    fn test_parse_v4_with_timestamp() {
        let frame = v4_tcp_frame(0x10, &ts_option(0xDEAD_BEEF, 0x1234_5678));
        match parse_frame(Linktype::ETHERNET, &frame) {
            ParseOutcome::Packet(pi) => {
                assert_eq!(pi.src, "10.0.0.1:1234");
                assert_eq!(pi.dst, "10.0.0.2:80");
                assert_eq!(pi.dst_host, "10.0.0.2");
                assert_eq!(pi.ts, 0xDEAD_BEEF);
                assert_eq!(pi.ecr, 0x1234_5678);
                assert!(!pi.syn_only);
                assert_eq!(pi.sz, frame.wire_len);
                assert_eq!(pi.sec, 1_700_000_000);
                assert_eq!(pi.usec, 250_000);
            }
            other => panic!("expected packet, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_pure_syn() {
        let frame = v4_tcp_frame(0x02, &ts_option(7, 0));
        match parse_frame(Linktype::ETHERNET, &frame) {
            ParseOutcome::Packet(pi) => assert!(pi.syn_only),
            other => panic!("expected packet, got {:?}", other),
        }
    }

    #[test]
    fn test_syn_ack_is_not_pure_syn() {
        let frame = v4_tcp_frame(0x12, &ts_option(7, 9));
        match parse_frame(Linktype::ETHERNET, &frame) {
            ParseOutcome::Packet(pi) => assert!(!pi.syn_only),
            other => panic!("expected packet, got {:?}", other),
        }
    }

    #[test]
    fn test_missing_timestamp_option() {
        let frame = v4_tcp_frame(0x10, &[]);
        assert!(matches!(
            parse_frame(Linktype::ETHERNET, &frame),
            ParseOutcome::NoTimestamp
        ));
    }

    #[test]
    fn test_udp_rejected() {
        let mut data = Vec::new();
        data.extend_from_slice(&[0x02, 0, 0, 0, 0, 1]);
        data.extend_from_slice(&[0x02, 0, 0, 0, 0, 2]);
        data.extend_from_slice(&[0x08, 0x00]);
        data.push(0x45);
        data.push(0);
        data.extend_from_slice(&28u16.to_be_bytes());
        data.extend_from_slice(&[0, 0, 0, 0]);
        data.push(64);
        data.push(17); // udp
        data.extend_from_slice(&[0, 0]);
        data.extend_from_slice(&[10, 0, 0, 1]);
        data.extend_from_slice(&[10, 0, 0, 2]);
        data.extend_from_slice(&53u16.to_be_bytes());
        data.extend_from_slice(&53u16.to_be_bytes());
        data.extend_from_slice(&8u16.to_be_bytes());
        data.extend_from_slice(&[0, 0]);
        let wire_len = data.len();
        let frame = Frame {
            sec: 0,
            usec: 0,
            wire_len,
            data,
        };
        assert!(matches!(
            parse_frame(Linktype::ETHERNET, &frame),
            ParseOutcome::NotTcp
        ));
    }

    #[test]
    fn test_parse_v6_with_timestamp() {
        let options = ts_option(100, 200);
        let tcp_len = 20 + options.len();
        let mut data = Vec::new();
        data.extend_from_slice(&[0x02, 0, 0, 0, 0, 1]);
        data.extend_from_slice(&[0x02, 0, 0, 0, 0, 2]);
        data.extend_from_slice(&[0x86, 0xDD]);
        // ipv6 fixed header
        data.extend_from_slice(&[0x60, 0, 0, 0]);
        data.extend_from_slice(&(tcp_len as u16).to_be_bytes());
        data.push(6); // next header: tcp
        data.push(64); // hop limit
        let mut src = [0u8; 16];
        src[15] = 1;
        let mut dst = [0u8; 16];
        dst[15] = 2;
        data.extend_from_slice(&src);
        data.extend_from_slice(&dst);
        // tcp
        data.extend_from_slice(&443u16.to_be_bytes());
        data.extend_from_slice(&9000u16.to_be_bytes());
        data.extend_from_slice(&1u32.to_be_bytes());
        data.extend_from_slice(&2u32.to_be_bytes());
        data.push(((tcp_len / 4) as u8) << 4);
        data.push(0x10);
        data.extend_from_slice(&1024u16.to_be_bytes());
        data.extend_from_slice(&[0, 0, 0, 0]);
        data.extend_from_slice(&options);
        let wire_len = data.len();
        let frame = Frame {
            sec: 0,
            usec: 0,
            wire_len,
            data,
        };
        match parse_frame(Linktype::ETHERNET, &frame) {
            ParseOutcome::Packet(pi) => {
                assert_eq!(pi.src, "::1:443");
                assert_eq!(pi.dst, "::2:9000");
                assert_eq!(pi.dst_host, "::2");
                assert_eq!(pi.ts, 100);
                assert_eq!(pi.ecr, 200);
            }
            other => panic!("expected packet, got {:?}", other),
        }
    }
}
