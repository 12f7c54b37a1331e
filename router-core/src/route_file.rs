//! # Routing Table File Loader
//!
//! ## Purpose
//!
//! Parses the static routing table file given on the command line into
//! [`RouteEntry`](crate::table::RouteEntry) values for [`RouteTable::load`].
//!
//! ## How it works
//!
//! One route per line, whitespace-separated: `prefix next_hop mask iface`.
//! Blank lines and lines starting with `#` are skipped. A line that fails to
//! parse is logged with `log::warn!` and skipped rather than aborting the
//! whole load — one bad line in an otherwise-good file shouldn't stop the
//! router from starting.

use std::fs;
use std::io;
use std::net::Ipv4Addr;
use std::path::Path;

use crate::table::{RouteEntry, RouteTable};

impl RouteTable {
    /// Reads and parses the route file at `path`, then builds a table from
    /// the entries that parsed successfully.
    ///
    /// Propagates the `io::Error` from opening/reading the file; a malformed
    /// individual line is not an error, just a skipped route.
    pub fn from_file<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let contents = fs::read_to_string(path)?;
        let entries = parse_route_lines(&contents);
        Ok(Self::load(entries))
    }
}

fn parse_route_lines(contents: &str) -> Vec<RouteEntry> {
    let mut entries = Vec::new();
    for (lineno, line) in contents.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        match parse_route_line(line) {
            Some(entry) => entries.push(entry),
            None => log::warn!("route file line {}: could not parse {:?}, skipping", lineno + 1, line),
        }
    }
    entries
}

fn parse_route_line(line: &str) -> Option<RouteEntry> {
    let mut fields = line.split_whitespace();
    let prefix: Ipv4Addr = fields.next()?.parse().ok()?;
    let next_hop: Ipv4Addr = fields.next()?.parse().ok()?;
    let mask: Ipv4Addr = fields.next()?.parse().ok()?;
    let out_iface: u16 = fields.next()?.parse().ok()?;
    if fields.next().is_some() {
        return None;
    }
    Some(RouteEntry {
        prefix,
        mask,
        next_hop,
        out_iface,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_well_formed_lines() {
        let entries = parse_route_lines(
            "10.0.0.0 192.0.2.1 255.0.0.0 1\n0.0.0.0 192.0.2.254 0.0.0.0 0\n",
        );
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].prefix, Ipv4Addr::new(10, 0, 0, 0));
        assert_eq!(entries[0].next_hop, Ipv4Addr::new(192, 0, 2, 1));
        assert_eq!(entries[0].mask, Ipv4Addr::new(255, 0, 0, 0));
        assert_eq!(entries[0].out_iface, 1);
    }

    #[test]
    fn skips_blank_and_comment_lines() {
        let entries = parse_route_lines("\n# a comment\n10.0.0.0 192.0.2.1 255.0.0.0 1\n   \n");
        assert_eq!(entries.len(), 1);
    }

    #[test]
    fn skips_unparseable_line_without_aborting_rest_of_file() {
        let entries = parse_route_lines(
            "not a route\n10.0.0.0 192.0.2.1 255.0.0.0 1\nextra field here is bad 1 2\n",
        );
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].out_iface, 1);
    }

    #[test]
    fn missing_fields_is_rejected() {
        assert!(parse_route_line("10.0.0.0 192.0.2.1").is_none());
    }
}
