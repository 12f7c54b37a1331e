//! # Forwarding Engine
//!
//! ## Purpose
//!
//! The single-threaded, blocking event loop that ties every other module
//! together: receive a frame on some interface, decide what to do with it,
//! and either forward it, queue it behind an ARP request, or answer it
//! directly. This is a direct generalization of the original router's
//! `handle_ip`/`handle_arp` dispatch to a typed, multi-interface driver.
//!
//! ## Main components
//!
//! - [`LinkDriver`]: the capability trait a concrete link layer (raw
//!   `AF_PACKET` sockets, or an in-memory mock in tests) implements.
//! - [`Forwarder`]: owns the routing table, ARP cache, and pending queue, and
//!   drives them from whatever `LinkDriver` it is given.
//!
//! ## Non-goals
//!
//! No fragmentation, no IP options, no ICMP redirect/source-quench, no
//! NAT — see the crate-level specification for the full list.

use std::io;
use std::net::Ipv4Addr;

use crate::arp::ArpCache;
use crate::builders::{build_arp_reply, build_arp_request, build_icmp_echo_reply, build_icmp_error};
use crate::checksum::internet_checksum;
use crate::queue::PendingQueue;
use crate::table::RouteTable;
use crate::wire::{
    ArpHeader, EthernetHeader, IcmpHeader, Ipv4Header, ARP_OP_REPLY, ARP_OP_REQUEST, ETHERTYPE_ARP,
    ETHERTYPE_IPV4, ICMP_TYPE_DEST_UNREACHABLE, ICMP_TYPE_ECHO_REPLY, ICMP_TYPE_ECHO_REQUEST,
    ICMP_TYPE_TIME_EXCEEDED, IPPROTO_ICMP, MAX_PACKET_LEN,
};

/// Capability trait for the raw link layer a [`Forwarder`] drives.
///
/// Abstracts over "some number of interfaces, each identified by a `u16`
/// index, on which whole Ethernet frames can be sent and received." A real
/// implementation binds one `AF_PACKET` socket per interface; tests use an
/// in-memory mock with a scripted receive queue.
pub trait LinkDriver {
    /// Blocks until a frame is available on any bound interface, then
    /// returns the interface it arrived on and the frame bytes.
    fn recv_any(&mut self) -> io::Result<(u16, Vec<u8>)>;

    /// Sends a complete Ethernet frame out `iface`.
    fn send(&mut self, iface: u16, frame: &[u8]) -> io::Result<()>;

    /// The MAC address bound to `iface`.
    fn iface_mac(&self, iface: u16) -> io::Result<[u8; 6]>;

    /// The IPv4 address configured on `iface`.
    fn iface_ipv4(&self, iface: u16) -> io::Result<Ipv4Addr>;
}

/// Owns the routing table, ARP cache, and pending-datagram queue, and
/// dispatches received frames to the right handler.
pub struct Forwarder<D: LinkDriver> {
    driver: D,
    table: RouteTable,
    arp: ArpCache,
    pending: PendingQueue,
}

impl<D: LinkDriver> Forwarder<D> {
    pub fn new(driver: D, table: RouteTable) -> Self {
        Self {
            driver,
            table,
            arp: ArpCache::new(),
            pending: PendingQueue::new(),
        }
    }

    /// Borrows the underlying link driver, e.g. so a test can inspect the
    /// frames a mock driver recorded.
    pub fn driver(&self) -> &D {
        &self.driver
    }

    /// Runs the blocking receive loop forever, or until the driver returns
    /// an error.
    pub fn run(&mut self) -> io::Result<()> {
        loop {
            let (iface, frame) = self.driver.recv_any()?;
            if frame.len() > MAX_PACKET_LEN {
                log::warn!("dropping oversized frame ({} bytes) on iface {}", frame.len(), iface);
                continue;
            }
            self.process_one(iface, &frame);
        }
    }

    /// Dispatches a single received frame. Public so tests can drive the
    /// engine without a real blocking receive loop.
    pub fn process_one(&mut self, iface: u16, frame: &[u8]) {
        let Some(eth) = EthernetHeader::parse(frame) else {
            log::debug!("iface {}: frame too short for an Ethernet header, dropping", iface);
            return;
        };

        match self.driver.iface_mac(iface) {
            Ok(our_mac) if eth.dst == our_mac || eth.dst == crate::wire::MAC_BROADCAST => {}
            Ok(_) => {
                log::debug!("iface {}: frame not addressed to us, dropping", iface);
                return;
            }
            Err(err) => {
                log::warn!("iface {}: could not read interface MAC, dropping frame: {}", iface, err);
                return;
            }
        }

        match eth.ether_type {
            ETHERTYPE_ARP => self.handle_arp(iface, &eth, &frame[EthernetHeader::LEN..]),
            ETHERTYPE_IPV4 => self.handle_ipv4(iface, frame),
            other => log::debug!("iface {}: unhandled ether-type {:#06x}, dropping", iface, other),
        }
    }

    fn handle_arp(&mut self, iface: u16, _eth: &EthernetHeader, body: &[u8]) {
        let Some(arp) = ArpHeader::parse(body) else {
            log::debug!("iface {}: frame too short for an ARP header, dropping", iface);
            return;
        };

        match arp.op {
            ARP_OP_REQUEST => self.handle_arp_request(iface, &arp),
            ARP_OP_REPLY => self.handle_arp_reply(iface, &arp),
            other => log::debug!("iface {}: unhandled ARP op {}, dropping", iface, other),
        }
    }

    fn handle_arp_request(&mut self, iface: u16, arp: &ArpHeader) {
        let Ok(iface_ip) = self.driver.iface_ipv4(iface) else {
            log::warn!("iface {}: no IPv4 address bound, cannot answer ARP request", iface);
            return;
        };
        if arp.tpa != iface_ip {
            return;
        }
        let Ok(iface_mac) = self.driver.iface_mac(iface) else {
            log::warn!("iface {}: no MAC address bound, cannot answer ARP request", iface);
            return;
        };

        self.arp.insert(arp.spa, arp.sha);

        let reply = build_arp_reply(iface_mac, iface_ip, arp);
        if let Err(err) = self.driver.send(iface, &reply) {
            log::warn!("iface {}: failed to send ARP reply: {}", iface, err);
        }
    }

    fn handle_arp_reply(&mut self, _iface: u16, arp: &ArpHeader) {
        self.arp.insert(arp.spa, arp.sha);
        self.drain_pending_head(arp.spa, arp.sha);
    }

    /// Checks only the head of the pending queue: re-derives the route (and
    /// thus the next hop) for the head datagram's destination, and if that
    /// next hop is the neighbor that was just learned, sends it out the
    /// route's egress interface. Otherwise the queue is left untouched. A
    /// queued datagram is never popped unless it is actually sent, so
    /// nothing is ever silently dropped.
    fn drain_pending_head(&mut self, resolved_ip: Ipv4Addr, resolved_mac: [u8; 6]) {
        let Some(head) = self.pending.peek_front() else {
            return;
        };
        let Some(ip) = Ipv4Header::parse(&head[EthernetHeader::LEN..]) else {
            return;
        };
        let Some(route) = self.table.best_route(ip.daddr) else {
            return;
        };
        if route.next_hop != resolved_ip {
            return;
        }
        let datagram = self.pending.dequeue().expect("just peeked a non-empty queue");
        self.send_with_mac(route.out_iface, &datagram, resolved_mac);
    }

    fn handle_ipv4(&mut self, iface: u16, frame: &[u8]) {
        let ip_bytes = &frame[EthernetHeader::LEN..];
        let Some(ip) = Ipv4Header::parse(ip_bytes) else {
            log::debug!("iface {}: frame too short for an IPv4 header, dropping", iface);
            return;
        };
        if ip.version != 4 || ip.ihl != 5 {
            log::debug!("iface {}: unsupported IPv4 version/ihl, dropping", iface);
            return;
        }
        if internet_checksum(&ip_bytes[..Ipv4Header::LEN]) != 0 {
            log::debug!("iface {}: bad IPv4 header checksum, dropping", iface);
            return;
        }

        if ip.ttl <= 1 {
            log::debug!("iface {}: ttl expired from {}, sending ICMP time-exceeded", iface, ip.saddr);
            self.reply_icmp_error(iface, ICMP_TYPE_TIME_EXCEEDED, frame);
            return;
        }

        let mut datagram = frame.to_vec();
        decrement_ttl_and_rewrite_checksum(&mut datagram);

        let Ok(iface_ip) = self.driver.iface_ipv4(iface) else {
            log::warn!("iface {}: no IPv4 address bound, dropping", iface);
            return;
        };
        if ip.daddr == iface_ip {
            self.handle_local_delivery(iface, &datagram, iface_ip);
            return;
        }

        let Some(route) = self.table.best_route(ip.daddr) else {
            log::debug!("iface {}: no route to {}, sending ICMP destination-unreachable", iface, ip.daddr);
            self.reply_icmp_error(iface, ICMP_TYPE_DEST_UNREACHABLE, &datagram);
            return;
        };

        let Ok(out_mac) = self.driver.iface_mac(route.out_iface) else {
            log::warn!("iface {}: no MAC bound for egress iface {}, dropping", iface, route.out_iface);
            return;
        };
        EthernetHeader::write_src(&mut datagram, out_mac);

        match self.arp.lookup(route.next_hop) {
            Some(mac) => self.send_with_mac(route.out_iface, &datagram, mac),
            None => {
                self.pending.enqueue(datagram);
                self.send_arp_request(route.out_iface, out_mac, route.next_hop);
            }
        }
    }

    fn handle_local_delivery(&mut self, iface: u16, datagram: &[u8], iface_ip: Ipv4Addr) {
        let ip_bytes = &datagram[EthernetHeader::LEN..];
        let ip = Ipv4Header::parse(ip_bytes).expect("already parsed once");
        if ip.protocol != IPPROTO_ICMP {
            log::debug!(
                "iface {}: non-ICMP datagram addressed to us from {}, dropping",
                iface,
                ip.saddr
            );
            return;
        }

        let icmp_off = EthernetHeader::LEN + Ipv4Header::LEN;
        let Some(icmp) = IcmpHeader::parse(&datagram[icmp_off..]) else {
            log::debug!("iface {}: truncated ICMP message addressed to us, dropping", iface);
            return;
        };
        if icmp.icmp_type != ICMP_TYPE_ECHO_REQUEST {
            log::debug!(
                "iface {}: non-echo ICMP type {} addressed to us, dropping",
                iface,
                icmp.icmp_type
            );
            return;
        }

        let Ok(out_mac) = self.driver.iface_mac(iface) else {
            log::warn!("iface {}: no MAC address bound, cannot answer echo request", iface);
            return;
        };
        let reply = build_icmp_echo_reply(datagram, out_mac, iface_ip, &icmp);
        if let Err(err) = self.driver.send(iface, &reply) {
            log::warn!("iface {}: failed to send ICMP echo reply: {}", iface, err);
        }
    }

    fn reply_icmp_error(&mut self, iface: u16, icmp_type: u8, trigger: &[u8]) {
        let Ok(out_mac) = self.driver.iface_mac(iface) else {
            log::warn!("iface {}: no MAC address bound, cannot send ICMP error", iface);
            return;
        };
        let Ok(out_ip) = self.driver.iface_ipv4(iface) else {
            log::warn!("iface {}: no IPv4 address bound, cannot send ICMP error", iface);
            return;
        };
        let reply = build_icmp_error(icmp_type, trigger, out_mac, out_ip);
        if let Err(err) = self.driver.send(iface, &reply) {
            log::warn!("iface {}: failed to send ICMP error: {}", iface, err);
        }
    }

    fn send_arp_request(&mut self, iface: u16, src_mac: [u8; 6], target_ip: Ipv4Addr) {
        let Ok(src_ip) = self.driver.iface_ipv4(iface) else {
            log::warn!("iface {}: no IPv4 address bound, cannot send ARP request", iface);
            return;
        };
        let request = build_arp_request(src_mac, src_ip, target_ip);
        if let Err(err) = self.driver.send(iface, &request) {
            log::warn!("iface {}: failed to send ARP request: {}", iface, err);
        }
    }

    fn send_with_mac(&mut self, iface: u16, datagram: &[u8], dst_mac: [u8; 6]) {
        let mut out = datagram.to_vec();
        EthernetHeader::write_dst(&mut out, dst_mac);
        if let Err(err) = self.driver.send(iface, &out) {
            log::warn!("iface {}: failed to send datagram: {}", iface, err);
        }
    }
}

/// Decrements the IPv4 TTL by one and recomputes the header checksum, in
/// place, on an already-length-validated frame (Ethernet header followed by
/// an IPv4 header with no options).
fn decrement_ttl_and_rewrite_checksum(frame: &mut [u8]) {
    let ip_off = EthernetHeader::LEN;
    frame[ip_off + 8] -= 1;
    frame[ip_off + 10] = 0;
    frame[ip_off + 11] = 0;
    let checksum = internet_checksum(&frame[ip_off..ip_off + Ipv4Header::LEN]);
    frame[ip_off + 10..ip_off + 12].copy_from_slice(&checksum.to_be_bytes());
}

impl EthernetHeader {
    fn write_src(frame: &mut [u8], src: [u8; 6]) {
        frame[6..12].copy_from_slice(&src);
    }

    fn write_dst(frame: &mut [u8], dst: [u8; 6]) {
        frame[0..6].copy_from_slice(&dst);
    }
}
