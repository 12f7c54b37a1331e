//! # ARP and ICMP Packet Builders
//!
//! ## Purpose
//!
//! Pure packet constructors: given addressing information and, where
//! relevant, the frame that triggered a reply, build a complete owned
//! Ethernet frame ready to hand to a `LinkDriver::send`. None of these
//! functions touch the routing table, ARP cache, or pending queue — they are
//! the F component of the design (§2), kept separate from the engine so they
//! can be tested in isolation.
//!
//! ## Main components
//!
//! - `build_arp_request` / `build_arp_reply`: RFC 826 ARP packets.
//! - `build_icmp_echo_reply`: the type-0 reply to an echo request addressed
//!   to us.
//! - `build_icmp_error`: the type-3 (destination unreachable) and type-11
//!   (time exceeded) error replies, each carrying the triggering IPv4 header
//!   plus up to 8 bytes of its payload (RFC 792).

use std::net::Ipv4Addr;

use crate::checksum::internet_checksum;
use crate::wire::{
    ArpHeader, EthernetHeader, IcmpHeader, Ipv4Header, ARP_HTYPE_ETHERNET, ARP_OP_REPLY,
    ARP_OP_REQUEST, ETHERTYPE_ARP, ETHERTYPE_IPV4, IPPROTO_ICMP, MAC_BROADCAST,
};

/// Builds an ARP request asking who has `target_ip`, sent from `src_mac`/`src_ip`.
pub fn build_arp_request(src_mac: [u8; 6], src_ip: Ipv4Addr, target_ip: Ipv4Addr) -> Vec<u8> {
    let mut buf = vec![0u8; EthernetHeader::LEN + ArpHeader::LEN];
    EthernetHeader {
        dst: MAC_BROADCAST,
        src: src_mac,
        ether_type: ETHERTYPE_ARP,
    }
    .write(&mut buf[..EthernetHeader::LEN]);
    ArpHeader {
        htype: ARP_HTYPE_ETHERNET,
        ptype: ETHERTYPE_IPV4,
        hlen: 6,
        plen: 4,
        op: ARP_OP_REQUEST,
        sha: src_mac,
        spa: src_ip,
        tha: [0; 6],
        tpa: target_ip,
    }
    .write(&mut buf[EthernetHeader::LEN..]);
    buf
}

/// Builds the reply to an ARP request addressed to one of our interfaces:
/// swaps source/target hardware and protocol addresses and sets `op = 2`.
pub fn build_arp_reply(iface_mac: [u8; 6], iface_ip: Ipv4Addr, request: &ArpHeader) -> Vec<u8> {
    let mut buf = vec![0u8; EthernetHeader::LEN + ArpHeader::LEN];
    EthernetHeader {
        dst: request.sha,
        src: iface_mac,
        ether_type: ETHERTYPE_ARP,
    }
    .write(&mut buf[..EthernetHeader::LEN]);
    ArpHeader {
        htype: ARP_HTYPE_ETHERNET,
        ptype: ETHERTYPE_IPV4,
        hlen: 6,
        plen: 4,
        op: ARP_OP_REPLY,
        sha: iface_mac,
        spa: iface_ip,
        tha: request.sha,
        tpa: request.spa,
    }
    .write(&mut buf[EthernetHeader::LEN..]);
    buf
}

/// Builds an ICMP echo reply (type 0) to `trigger`, a full received frame
/// whose payload is the echo request `icmp`. Preserves `id` and `sequence`.
pub fn build_icmp_echo_reply(
    trigger: &[u8],
    out_mac: [u8; 6],
    out_ip: Ipv4Addr,
    icmp: &IcmpHeader,
) -> Vec<u8> {
    let eth = EthernetHeader::parse(trigger).expect("caller already validated the Ethernet header");
    let ip = Ipv4Header::parse(&trigger[EthernetHeader::LEN..])
        .expect("caller already validated the IPv4 header");

    let icmp_off = EthernetHeader::LEN + Ipv4Header::LEN;
    let total_len = Ipv4Header::LEN + IcmpHeader::LEN;
    let mut buf = vec![0u8; EthernetHeader::LEN + total_len];

    EthernetHeader {
        dst: eth.src,
        src: out_mac,
        ether_type: ETHERTYPE_IPV4,
    }
    .write(&mut buf[..EthernetHeader::LEN]);

    Ipv4Header {
        ihl: 5,
        version: 4,
        tos: 0,
        total_len: total_len as u16,
        identification: 1,
        flags_frag_offset: 0,
        ttl: 64,
        protocol: IPPROTO_ICMP,
        checksum: 0,
        saddr: out_ip,
        daddr: ip.saddr,
    }
    .write(&mut buf[EthernetHeader::LEN..icmp_off]);

    IcmpHeader {
        icmp_type: crate::wire::ICMP_TYPE_ECHO_REPLY,
        code: 0,
        checksum: 0,
        rest: icmp.rest,
    }
    .write(&mut buf[icmp_off..icmp_off + IcmpHeader::LEN]);

    finalize_checksums(&mut buf, icmp_off);
    buf
}

/// Builds an ICMP error reply (type 3 destination-unreachable or type 11
/// time-exceeded) to `trigger`. The error body is the triggering IPv4 header
/// plus up to the first 8 bytes of its payload, per RFC 792.
pub fn build_icmp_error(icmp_type: u8, trigger: &[u8], out_mac: [u8; 6], out_ip: Ipv4Addr) -> Vec<u8> {
    let eth = EthernetHeader::parse(trigger).expect("caller already validated the Ethernet header");
    let ip_bytes = &trigger[EthernetHeader::LEN..];
    let ip = Ipv4Header::parse(ip_bytes).expect("caller already validated the IPv4 header");

    let payload_start = EthernetHeader::LEN + Ipv4Header::LEN;
    let payload_available = trigger.len().saturating_sub(payload_start);
    let payload_copy_len = payload_available.min(8);
    let error_body_len = Ipv4Header::LEN + payload_copy_len;

    let icmp_off = EthernetHeader::LEN + Ipv4Header::LEN;
    let total_len = Ipv4Header::LEN + IcmpHeader::LEN + error_body_len;
    let mut buf = vec![0u8; EthernetHeader::LEN + total_len];

    EthernetHeader {
        dst: eth.src,
        src: out_mac,
        ether_type: ETHERTYPE_IPV4,
    }
    .write(&mut buf[..EthernetHeader::LEN]);

    Ipv4Header {
        ihl: 5,
        version: 4,
        tos: 0,
        total_len: total_len as u16,
        identification: 1,
        flags_frag_offset: 0,
        ttl: 64,
        protocol: IPPROTO_ICMP,
        checksum: 0,
        saddr: out_ip,
        daddr: ip.saddr,
    }
    .write(&mut buf[EthernetHeader::LEN..icmp_off]);

    IcmpHeader {
        icmp_type,
        code: 0,
        checksum: 0,
        rest: [0; 4],
    }
    .write(&mut buf[icmp_off..icmp_off + IcmpHeader::LEN]);

    let body_off = icmp_off + IcmpHeader::LEN;
    buf[body_off..body_off + Ipv4Header::LEN].copy_from_slice(&ip_bytes[..Ipv4Header::LEN]);
    buf[body_off + Ipv4Header::LEN..body_off + Ipv4Header::LEN + payload_copy_len]
        .copy_from_slice(&trigger[payload_start..payload_start + payload_copy_len]);

    finalize_checksums(&mut buf, icmp_off);
    buf
}

/// Zeroes and recomputes the ICMP checksum (over the ICMP header and body)
/// and the IPv4 header checksum, in that order, on a freshly-built frame.
fn finalize_checksums(buf: &mut [u8], icmp_off: usize) {
    buf[icmp_off + 2] = 0;
    buf[icmp_off + 3] = 0;
    let icmp_csum = internet_checksum(&buf[icmp_off..]);
    buf[icmp_off + 2..icmp_off + 4].copy_from_slice(&icmp_csum.to_be_bytes());

    let ip_off = EthernetHeader::LEN;
    buf[ip_off + 10] = 0;
    buf[ip_off + 11] = 0;
    let ip_csum = internet_checksum(&buf[ip_off..ip_off + Ipv4Header::LEN]);
    buf[ip_off + 10..ip_off + 12].copy_from_slice(&ip_csum.to_be_bytes());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::{ARP_OP_REQUEST, ICMP_TYPE_DEST_UNREACHABLE, ICMP_TYPE_ECHO_REQUEST};

    fn echo_request_frame(id: u16, seq: u16, ttl: u8) -> Vec<u8> {
        let icmp_off = EthernetHeader::LEN + Ipv4Header::LEN;
        let total_len = Ipv4Header::LEN + IcmpHeader::LEN;
        let mut buf = vec![0u8; EthernetHeader::LEN + total_len];
        EthernetHeader {
            dst: [0xaa; 6],
            src: [0xbb; 6],
            ether_type: ETHERTYPE_IPV4,
        }
        .write(&mut buf[..EthernetHeader::LEN]);
        Ipv4Header {
            ihl: 5,
            version: 4,
            tos: 0,
            total_len: total_len as u16,
            identification: 0,
            flags_frag_offset: 0,
            ttl,
            protocol: IPPROTO_ICMP,
            checksum: 0,
            saddr: Ipv4Addr::new(203, 0, 113, 5),
            daddr: Ipv4Addr::new(192, 0, 2, 1),
        }
        .write(&mut buf[EthernetHeader::LEN..icmp_off]);
        IcmpHeader {
            icmp_type: ICMP_TYPE_ECHO_REQUEST,
            code: 0,
            checksum: 0,
            rest: IcmpHeader::echo_rest(id, seq),
        }
        .write(&mut buf[icmp_off..icmp_off + IcmpHeader::LEN]);
        buf
    }

    #[test]
    fn arp_request_fields_round_trip() {
        let src_mac = [0x02, 0x00, 0x00, 0x00, 0x00, 0x01];
        let src_ip = Ipv4Addr::new(192, 0, 2, 1);
        let target_ip = Ipv4Addr::new(192, 0, 2, 2);
        let frame = build_arp_request(src_mac, src_ip, target_ip);

        let eth = EthernetHeader::parse(&frame).unwrap();
        assert_eq!(eth.dst, MAC_BROADCAST);
        assert_eq!(eth.src, src_mac);
        assert_eq!(eth.ether_type, ETHERTYPE_ARP);

        let arp = ArpHeader::parse(&frame[EthernetHeader::LEN..]).unwrap();
        assert_eq!(arp.op, ARP_OP_REQUEST);
        assert_eq!(arp.sha, src_mac);
        assert_eq!(arp.spa, src_ip);
        assert_eq!(arp.tha, [0; 6]);
        assert_eq!(arp.tpa, target_ip);
    }

    #[test]
    fn arp_reply_swaps_addresses() {
        let request = ArpHeader {
            htype: ARP_HTYPE_ETHERNET,
            ptype: ETHERTYPE_IPV4,
            hlen: 6,
            plen: 4,
            op: ARP_OP_REQUEST,
            sha: [0x10; 6],
            spa: Ipv4Addr::new(192, 0, 2, 50),
            tha: [0; 6],
            tpa: Ipv4Addr::new(192, 0, 2, 1),
        };
        let iface_mac = [0x20; 6];
        let iface_ip = Ipv4Addr::new(192, 0, 2, 1);
        let frame = build_arp_reply(iface_mac, iface_ip, &request);

        let eth = EthernetHeader::parse(&frame).unwrap();
        assert_eq!(eth.dst, request.sha);
        assert_eq!(eth.src, iface_mac);

        let arp = ArpHeader::parse(&frame[EthernetHeader::LEN..]).unwrap();
        assert_eq!(arp.op, ARP_OP_REPLY);
        assert_eq!(arp.sha, iface_mac);
        assert_eq!(arp.spa, iface_ip);
        assert_eq!(arp.tha, request.sha);
        assert_eq!(arp.tpa, request.spa);
    }

    #[test]
    fn echo_reply_preserves_id_and_sequence() {
        let trigger = echo_request_frame(7, 3, 64);
        let icmp_off = EthernetHeader::LEN + Ipv4Header::LEN;
        let icmp = IcmpHeader::parse(&trigger[icmp_off..]).unwrap();
        let out_mac = [0x30; 6];
        let out_ip = Ipv4Addr::new(192, 0, 2, 1);

        let reply = build_icmp_echo_reply(&trigger, out_mac, out_ip, &icmp);

        let eth = EthernetHeader::parse(&reply).unwrap();
        assert_eq!(eth.src, out_mac);
        assert_eq!(eth.dst, [0xbb; 6]);

        let ip = Ipv4Header::parse(&reply[EthernetHeader::LEN..]).unwrap();
        assert_eq!(ip.saddr, out_ip);
        assert_eq!(ip.daddr, Ipv4Addr::new(203, 0, 113, 5));
        let mut ip_hdr = reply[EthernetHeader::LEN..EthernetHeader::LEN + Ipv4Header::LEN].to_vec();
        ip_hdr[10] = 0;
        ip_hdr[11] = 0;
        assert_eq!(internet_checksum(&ip_hdr), ip.checksum);

        let reply_icmp = IcmpHeader::parse(&reply[icmp_off..]).unwrap();
        assert_eq!(reply_icmp.icmp_type, crate::wire::ICMP_TYPE_ECHO_REPLY);
        assert_eq!(reply_icmp.id(), 7);
        assert_eq!(reply_icmp.sequence(), 3);
        assert_eq!(internet_checksum(&reply[icmp_off..]), 0);
    }

    #[test]
    fn icmp_error_carries_original_header_and_first_8_payload_bytes() {
        let mut trigger = echo_request_frame(1, 1, 5);
        trigger.extend_from_slice(&[0xde, 0xad, 0xbe, 0xef]);
        let out_mac = [0x40; 6];
        let out_ip = Ipv4Addr::new(192, 0, 2, 1);

        let reply = build_icmp_error(ICMP_TYPE_DEST_UNREACHABLE, &trigger, out_mac, out_ip);

        let icmp_off = EthernetHeader::LEN + Ipv4Header::LEN;
        let icmp = IcmpHeader::parse(&reply[icmp_off..]).unwrap();
        assert_eq!(icmp.icmp_type, ICMP_TYPE_DEST_UNREACHABLE);
        assert_eq!(internet_checksum(&reply[icmp_off..]), 0);

        let body_off = icmp_off + IcmpHeader::LEN;
        let original_ip_bytes = &trigger[EthernetHeader::LEN..EthernetHeader::LEN + Ipv4Header::LEN];
        assert_eq!(&reply[body_off..body_off + Ipv4Header::LEN], original_ip_bytes);

        let original_payload_start = EthernetHeader::LEN + Ipv4Header::LEN;
        let expected_payload = &trigger[original_payload_start..original_payload_start + 8];
        assert_eq!(
            &reply[body_off + Ipv4Header::LEN..body_off + Ipv4Header::LEN + 8],
            expected_payload
        );

        let ip = Ipv4Header::parse(&reply[EthernetHeader::LEN..]).unwrap();
        assert_eq!(ip.daddr, Ipv4Addr::new(203, 0, 113, 5));
        let mut ip_hdr = reply[EthernetHeader::LEN..EthernetHeader::LEN + Ipv4Header::LEN].to_vec();
        ip_hdr[10] = 0;
        ip_hdr[11] = 0;
        assert_eq!(internet_checksum(&ip_hdr), ip.checksum);
    }

    #[test]
    fn icmp_error_with_short_trigger_payload_copies_only_whats_there() {
        let trigger = echo_request_frame(1, 1, 5); // no extra payload bytes past the ICMP header
        let reply = build_icmp_error(ICMP_TYPE_DEST_UNREACHABLE, &trigger, [0; 6], Ipv4Addr::UNSPECIFIED);
        let icmp_off = EthernetHeader::LEN + Ipv4Header::LEN;
        let body_off = icmp_off + IcmpHeader::LEN;
        assert_eq!(reply.len(), body_off + Ipv4Header::LEN);
    }
}
