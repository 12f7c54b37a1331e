//! # Raw Link Driver
//!
//! ## Purpose
//!
//! Implements [`router_core::LinkDriver`] over Linux `AF_PACKET` raw sockets,
//! one per configured interface. This is the only part of the router that
//! talks to the kernel; everything above it works in terms of owned frame
//! buffers and interface indices.
//!
//! ## How it works
//!
//! Each interface gets its own `SOCK_RAW` socket bound to that interface via
//! `sockaddr_ll`. The interface's MAC and IPv4 address are fetched once at
//! bind time with the `SIOCGIFHWADDR`/`SIOCGIFADDR` ioctls and cached, since
//! they never change for the lifetime of the process. `recv_any` multiplexes
//! all bound sockets with `libc::poll` and returns the first one that has a
//! frame ready.

use std::io;
use std::net::Ipv4Addr;
use std::os::fd::{AsRawFd, FromRawFd as _, OwnedFd};

use router_core::MAX_PACKET_LEN;

struct BoundInterface {
    name: String,
    iface: u16,
    fd: OwnedFd,
    mac: [u8; 6],
    ipv4: Ipv4Addr,
}

/// A [`router_core::LinkDriver`] backed by one `AF_PACKET` socket per
/// configured interface.
pub struct RawLinkDriver {
    interfaces: Vec<BoundInterface>,
}

impl RawLinkDriver {
    /// Binds a raw socket to each named interface, in the order given. The
    /// position in `names` becomes that interface's `u16` index, as referred
    /// to by route file entries and by [`router_core::LinkDriver`].
    pub fn bind(names: &[String]) -> io::Result<Self> {
        let mut interfaces = Vec::with_capacity(names.len());
        for (i, name) in names.iter().enumerate() {
            let iface = i as u16;
            let fd = bind_raw_socket(name)?;
            let mac = iface_hwaddr(fd.as_raw_fd(), name)?;
            let ipv4 = iface_ipv4(fd.as_raw_fd(), name)?;
            log::info!("bound iface {} ({}) mac={} ip={}", iface, name, format_mac(mac), ipv4);
            interfaces.push(BoundInterface {
                name: name.clone(),
                iface,
                fd,
                mac,
                ipv4,
            });
        }
        Ok(Self { interfaces })
    }

    fn find(&self, iface: u16) -> io::Result<&BoundInterface> {
        self.interfaces
            .iter()
            .find(|b| b.iface == iface)
            .ok_or_else(|| io::Error::other(format!("no such interface index {}", iface)))
    }
}

impl router_core::LinkDriver for RawLinkDriver {
    fn recv_any(&mut self) -> io::Result<(u16, Vec<u8>)> {
        let mut pollfds: Vec<libc::pollfd> = self
            .interfaces
            .iter()
            .map(|b| libc::pollfd {
                fd: b.fd.as_raw_fd(),
                events: libc::POLLIN,
                revents: 0,
            })
            .collect();

        loop {
            let rc = unsafe { libc::poll(pollfds.as_mut_ptr(), pollfds.len() as libc::nfds_t, -1) };
            if rc < 0 {
                let err = io::Error::last_os_error();
                if err.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                return Err(err);
            }

            for (idx, pfd) in pollfds.iter().enumerate() {
                if pfd.revents & libc::POLLIN == 0 {
                    continue;
                }
                let iface = &self.interfaces[idx];
                let mut buf = vec![0u8; MAX_PACKET_LEN];
                let n = unsafe {
                    libc::recv(iface.fd.as_raw_fd(), buf.as_mut_ptr().cast(), buf.len(), 0)
                };
                if n < 0 {
                    let err = io::Error::last_os_error();
                    if err.kind() == io::ErrorKind::WouldBlock || err.kind() == io::ErrorKind::Interrupted {
                        continue;
                    }
                    return Err(err);
                }
                buf.truncate(n as usize);
                return Ok((iface.iface, buf));
            }
        }
    }

    fn send(&mut self, iface: u16, frame: &[u8]) -> io::Result<()> {
        let bound = self.find(iface)?;
        let n = unsafe {
            libc::send(bound.fd.as_raw_fd(), frame.as_ptr().cast(), frame.len(), 0)
        };
        if n < 0 {
            return Err(io::Error::other(format!("send on {} ({}) failed: {}", bound.iface, bound.name, io::Error::last_os_error())));
        }
        Ok(())
    }

    fn iface_mac(&self, iface: u16) -> io::Result<[u8; 6]> {
        Ok(self.find(iface)?.mac)
    }

    fn iface_ipv4(&self, iface: u16) -> io::Result<Ipv4Addr> {
        Ok(self.find(iface)?.ipv4)
    }
}

fn bind_raw_socket(name: &str) -> io::Result<OwnedFd> {
    let ifindex = iface_index(name)?;

    let fd = unsafe { libc::socket(libc::AF_PACKET, libc::SOCK_RAW, (libc::ETH_P_ALL as u16).to_be() as i32) };
    if fd < 0 {
        return Err(io::Error::last_os_error());
    }
    let fd = unsafe { OwnedFd::from_raw_fd(fd) };

    let sll = libc::sockaddr_ll {
        sll_family: libc::AF_PACKET as u16,
        sll_protocol: (libc::ETH_P_ALL as u16).to_be(),
        sll_ifindex: ifindex,
        sll_hatype: 0,
        sll_pkttype: 0,
        sll_halen: 0,
        sll_addr: [0; 8],
    };
    let rc = unsafe {
        libc::bind(
            fd.as_raw_fd(),
            &sll as *const _ as *const libc::sockaddr,
            size_of::<libc::sockaddr_ll>() as libc::socklen_t,
        )
    };
    if rc < 0 {
        return Err(io::Error::other(format!("failed to bind raw socket to {}: {}", name, io::Error::last_os_error())));
    }
    Ok(fd)
}

fn iface_index(name: &str) -> io::Result<i32> {
    let mut if_req: libc::ifreq = unsafe { std::mem::zeroed() };
    copy_iface_name(&mut if_req, name)?;
    unsafe {
        let socket_fd = libc::socket(libc::AF_INET, libc::SOCK_DGRAM, 0);
        if socket_fd < 0 {
            return Err(io::Error::last_os_error());
        }
        let rc = libc::ioctl(socket_fd, libc::SIOCGIFINDEX, &mut if_req);
        libc::close(socket_fd);
        if rc < 0 {
            return Err(io::Error::other(format!("SIOCGIFINDEX failed for {}: {}", name, io::Error::last_os_error())));
        }
        Ok(if_req.ifr_ifru.ifru_ifindex)
    }
}

fn iface_hwaddr(_fd: i32, name: &str) -> io::Result<[u8; 6]> {
    let mut if_req: libc::ifreq = unsafe { std::mem::zeroed() };
    copy_iface_name(&mut if_req, name)?;
    unsafe {
        let socket_fd = libc::socket(libc::AF_INET, libc::SOCK_DGRAM, 0);
        if socket_fd < 0 {
            return Err(io::Error::last_os_error());
        }
        let rc = libc::ioctl(socket_fd, libc::SIOCGIFHWADDR, &mut if_req);
        libc::close(socket_fd);
        if rc < 0 {
            return Err(io::Error::other(format!("SIOCGIFHWADDR failed for {}: {}", name, io::Error::last_os_error())));
        }
        let mut mac = [0u8; 6];
        for (i, v) in if_req.ifr_ifru.ifru_hwaddr.sa_data[..6].iter().enumerate() {
            mac[i] = *v as u8;
        }
        Ok(mac)
    }
}

fn iface_ipv4(_fd: i32, name: &str) -> io::Result<Ipv4Addr> {
    let mut if_req: libc::ifreq = unsafe { std::mem::zeroed() };
    copy_iface_name(&mut if_req, name)?;
    unsafe {
        let socket_fd = libc::socket(libc::AF_INET, libc::SOCK_DGRAM, 0);
        if socket_fd < 0 {
            return Err(io::Error::last_os_error());
        }
        let rc = libc::ioctl(socket_fd, libc::SIOCGIFADDR, &mut if_req);
        libc::close(socket_fd);
        if rc < 0 {
            return Err(io::Error::other(format!("SIOCGIFADDR failed for {}: {}", name, io::Error::last_os_error())));
        }
        let sockaddr_in = &if_req.ifr_ifru.ifru_addr as *const libc::sockaddr as *const libc::sockaddr_in;
        let addr_bits = (*sockaddr_in).sin_addr.s_addr;
        Ok(Ipv4Addr::from(u32::from_be(addr_bits)))
    }
}

fn copy_iface_name(if_req: &mut libc::ifreq, name: &str) -> io::Result<()> {
    if name.len() >= if_req.ifr_name.len() {
        return Err(io::Error::other(format!("interface name {:?} too long", name)));
    }
    for (dst, src) in if_req.ifr_name.iter_mut().zip(name.as_bytes()) {
        *dst = *src as libc::c_char;
    }
    Ok(())
}

fn format_mac(mac: [u8; 6]) -> String {
    mac.iter()
        .map(|b| format!("{:02x}", b))
        .collect::<Vec<_>>()
        .join(":")
}
