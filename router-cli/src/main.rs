//! # `static-router` Binary
//!
//! ## Purpose
//!
//! Thin bootstrap: parse arguments, load the routing table from a file,
//! bind a raw socket to each named interface, and hand both to
//! [`router_core::Forwarder`] to run forever.
//!
//! ## Main components
//!
//! - [`Args`]: the CLI surface (`clap` derive).
//! - [`link::RawLinkDriver`]: the only platform-specific piece, implementing
//!   `router_core::LinkDriver` over `AF_PACKET` sockets.

mod link;

use clap::Parser;
use router_core::{Forwarder, RouteTable};

/// Static IPv4 software router.
#[derive(Parser, Debug)]
#[command(arg_required_else_help = true, version, about)]
struct Args {
    /// Path to the routing table file (prefix next_hop mask iface per line).
    rtable: String,

    /// Interface names to bind, in the order referenced by `iface` in the
    /// routing table (iface 0 is the first name given, iface 1 the second,
    /// and so on).
    #[arg(required = true)]
    interfaces: Vec<String>,
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();

    let table = RouteTable::from_file(&args.rtable)
        .map_err(|e| anyhow::anyhow!("failed to load routing table {:?}: {}", args.rtable, e))?;
    log::info!("loaded {} route(s) from {:?}", table.len(), args.rtable);

    let driver = link::RawLinkDriver::bind(&args.interfaces)
        .map_err(|e| anyhow::anyhow!("failed to bind interfaces {:?}: {}", args.interfaces, e))?;

    let mut forwarder = Forwarder::new(driver, table);
    forwarder.run().map_err(|e| anyhow::anyhow!("forwarding loop exited: {}", e))?;
    Ok(())
}
