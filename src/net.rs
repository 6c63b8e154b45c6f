//! Network-interface collaborator contract (spec.md §6, §9 "Polymorphism
//! over network interfaces").
//!
//! Physical link bring-up (WiFi station / wired Ethernet adapter drivers)
//! and IP interface selection/failover are explicitly out of scope (spec.md
//! §1); the core only consumes "network is up / address is known". This
//! module defines that narrow capability as a trait with two
//! infrastructure-free implementations, so the forwarder can be wired and
//! tested without a real network stack, and a failover orchestrator that
//! depends only on the trait.

use std::net::IpAddr;

/// Shared capability set for a network interface, per spec.md §9's
/// "{init, start, stop, status, netif-accessor}".
pub trait NetworkLink: Send + Sync {
    fn start(&mut self);
    fn stop(&mut self);
    fn is_up(&self) -> bool;
    fn address(&self) -> Option<IpAddr>;
}

/// Test double for a WiFi station interface. Never touches real hardware;
/// `set_up` is how a driving test (or a future real backend behind this
/// same trait) reports link state changes.
pub struct WifiLink {
    up: bool,
    address: Option<IpAddr>,
}

impl WifiLink {
    pub fn new() -> Self {
        Self { up: false, address: None }
    }

    pub fn set_up(&mut self, address: Option<IpAddr>) {
        self.up = address.is_some();
        self.address = address;
    }
}

impl Default for WifiLink {
    fn default() -> Self {
        Self::new()
    }
}

impl NetworkLink for WifiLink {
    fn start(&mut self) {}
    fn stop(&mut self) {
        self.up = false;
        self.address = None;
    }
    fn is_up(&self) -> bool {
        self.up
    }
    fn address(&self) -> Option<IpAddr> {
        self.address
    }
}

/// Test double for a wired Ethernet interface.
pub struct EthernetLink {
    up: bool,
    address: Option<IpAddr>,
}

impl EthernetLink {
    pub fn new() -> Self {
        Self { up: false, address: None }
    }

    pub fn set_up(&mut self, address: Option<IpAddr>) {
        self.up = address.is_some();
        self.address = address;
    }
}

impl Default for EthernetLink {
    fn default() -> Self {
        Self::new()
    }
}

impl NetworkLink for EthernetLink {
    fn start(&mut self) {}
    fn stop(&mut self) {
        self.up = false;
        self.address = None;
    }
    fn is_up(&self) -> bool {
        self.up
    }
    fn address(&self) -> Option<IpAddr> {
        self.address
    }
}

/// Picks the first link reporting `is_up()`, preferring the order the links
/// were registered in. Consumes only [`NetworkLink`], never a concrete type
/// (spec.md §9).
pub struct FailoverLink {
    links: Vec<Box<dyn NetworkLink>>,
}

impl FailoverLink {
    pub fn new(links: Vec<Box<dyn NetworkLink>>) -> Self {
        Self { links }
    }

    pub fn active(&self) -> Option<&dyn NetworkLink> {
        self.links.iter().find(|l| l.is_up()).map(|l| l.as_ref())
    }

    pub fn is_up(&self) -> bool {
        self.active().is_some()
    }

    pub fn address(&self) -> Option<IpAddr> {
        self.active().and_then(|l| l.address())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    #[test]
    fn failover_prefers_first_up_link() {
        let mut wifi = WifiLink::new();
        wifi.set_up(Some(IpAddr::V4(Ipv4Addr::new(192, 168, 1, 10))));
        let eth = EthernetLink::new();

        let failover = FailoverLink::new(vec![Box::new(wifi), Box::new(eth)]);
        assert!(failover.is_up());
        assert_eq!(failover.address(), Some(IpAddr::V4(Ipv4Addr::new(192, 168, 1, 10))));
    }

    #[test]
    fn failover_falls_back_when_primary_down() {
        let wifi = WifiLink::new();
        let mut eth = EthernetLink::new();
        eth.set_up(Some(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 5))));

        let failover = FailoverLink::new(vec![Box::new(wifi), Box::new(eth)]);
        assert_eq!(failover.address(), Some(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 5))));
    }

    #[test]
    fn failover_down_when_no_link_up() {
        let failover = FailoverLink::new(vec![Box::new(WifiLink::new()), Box::new(EthernetLink::new())]);
        assert!(!failover.is_up());
    }
}
