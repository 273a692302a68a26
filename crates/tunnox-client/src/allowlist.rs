//! Network/port allowlist for target-side tunnel requests (spec.md §4.12
//! "ambient" hardening): a compromised or malicious gateway can direct this
//! client to dial any `host:port` it likes, so dial targets are checked
//! against an operator-configured CIDR/port allowlist before the client
//! ever opens a socket to them. An empty allowlist allows everything,
//! matching the teacher's default-open behavior for operators who haven't
//! configured one.

use std::net::IpAddr;
use std::str::FromStr;

use ipnetwork::IpNetwork;

#[derive(Debug, Clone, Default)]
pub struct Allowlist {
    networks: Vec<IpNetwork>,
    ports: Vec<u16>,
}

impl Allowlist {
    pub fn new(networks: Vec<String>, ports: Vec<u16>) -> Result<Self, String> {
        let networks = networks
            .into_iter()
            .map(|n| IpNetwork::from_str(&n).map_err(|e| format!("invalid CIDR '{n}': {e}")))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { networks, ports })
    }

    /// Check whether `host:port` may be dialed. `host` must already be a
    /// literal IP address; callers resolve domain names before calling this
    /// (an allowlist on a pre-resolution hostname would be trivially
    /// bypassed by DNS).
    pub fn is_allowed(&self, host: &str, port: u16) -> bool {
        match IpAddr::from_str(host) {
            Ok(ip) => self.is_ip_allowed(&ip) && self.is_port_allowed(port),
            Err(_) => {
                // Not a literal IP (e.g. a domain name): nothing to check
                // it against, so fall back to the port rule alone.
                self.is_port_allowed(port)
            }
        }
    }

    fn is_ip_allowed(&self, ip: &IpAddr) -> bool {
        self.networks.is_empty() || self.networks.iter().any(|n| n.contains(*ip))
    }

    fn is_port_allowed(&self, port: u16) -> bool {
        self.ports.is_empty() || self.ports.contains(&port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_invalid_cidr() {
        assert!(Allowlist::new(vec!["not-a-cidr".into()], vec![]).is_err());
    }

    #[test]
    fn empty_allowlist_allows_everything() {
        let allowlist = Allowlist::new(vec![], vec![]).unwrap();
        assert!(allowlist.is_allowed("192.168.1.10", 8080));
        assert!(allowlist.is_allowed("8.8.8.8", 53));
    }

    #[test]
    fn rejects_ip_outside_allowed_networks() {
        let allowlist = Allowlist::new(vec!["192.168.0.0/16".into()], vec![]).unwrap();
        assert!(allowlist.is_allowed("192.168.1.10", 8080));
        assert!(!allowlist.is_allowed("10.0.0.1", 8080));
    }

    #[test]
    fn rejects_port_outside_allowed_ports() {
        let allowlist = Allowlist::new(vec![], vec![8080, 3000]).unwrap();
        assert!(allowlist.is_allowed("10.0.0.1", 3000));
        assert!(!allowlist.is_allowed("10.0.0.1", 22));
    }

    #[test]
    fn domain_names_fall_back_to_the_port_rule() {
        let allowlist = Allowlist::new(vec!["192.168.0.0/16".into()], vec![443]).unwrap();
        assert!(allowlist.is_allowed("internal.example.com", 443));
        assert!(!allowlist.is_allowed("internal.example.com", 22));
    }
}
