#![doc = include_str!("../README.md")]

pub mod arp;
pub mod builders;
pub mod checksum;
pub mod engine;
pub mod queue;
pub mod route_file;
pub mod table;
pub mod wire;

pub use arp::ArpCache;
pub use checksum::internet_checksum;
pub use engine::{Forwarder, LinkDriver};
pub use queue::PendingQueue;
pub use table::{RouteEntry, RouteTable};
pub use wire::MAX_PACKET_LEN;
