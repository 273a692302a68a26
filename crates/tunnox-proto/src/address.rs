//! `host:port` / `scheme://host:port` parsing.

use thiserror::Error;

use crate::config::MappingProtocol;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AddressError {
    #[error("address '{0}' is missing a port")]
    MissingPort(String),
    #[error("invalid port '{0}' in address '{1}'")]
    InvalidPort(String, String),
    #[error("port {0} out of range [1,65535]")]
    PortOutOfRange(u16),
    #[error("empty host in '{0}'")]
    EmptyHost(String),
}

/// Parse a bind address of the form `host:port`. An empty host is accepted
/// (it is the caller's job to decide whether a wildcard bind is intended).
pub fn parse_listen(s: &str) -> Result<(String, u16), AddressError> {
    let (host, port_str) = s
        .rsplit_once(':')
        .ok_or_else(|| AddressError::MissingPort(s.to_string()))?;
    let port: u16 = port_str
        .parse()
        .map_err(|_| AddressError::InvalidPort(port_str.to_string(), s.to_string()))?;
    if port == 0 {
        return Err(AddressError::PortOutOfRange(port));
    }
    Ok((host.to_string(), port))
}

/// Parse a target of the form `scheme://host:port` or bare `host:port`.
/// Port `0` is valid only when `protocol` is `socks5` (dynamic target
/// sentinel); every other protocol requires `[1,65535]`.
pub fn parse_target(s: &str) -> Result<(String, u16, MappingProtocol), AddressError> {
    let (scheme, rest) = match s.split_once("://") {
        Some((scheme, rest)) => (Some(scheme), rest),
        None => (None, s),
    };

    let protocol = scheme
        .map(MappingProtocol::from_scheme)
        .unwrap_or(MappingProtocol::Tcp);

    let (host, port_str) = rest
        .rsplit_once(':')
        .ok_or_else(|| AddressError::MissingPort(s.to_string()))?;
    if host.is_empty() {
        return Err(AddressError::EmptyHost(s.to_string()));
    }
    let port: u16 = port_str
        .parse()
        .map_err(|_| AddressError::InvalidPort(port_str.to_string(), s.to_string()))?;

    let port_is_dynamic_sentinel = port == 0 && matches!(protocol, MappingProtocol::Socks5);
    if port == 0 && !port_is_dynamic_sentinel {
        return Err(AddressError::PortOutOfRange(port));
    }

    Ok((host.to_string(), port, protocol))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_listen_accepts_valid_port() {
        assert_eq!(
            parse_listen("0.0.0.0:8080").unwrap(),
            ("0.0.0.0".to_string(), 8080)
        );
    }

    #[test]
    fn parse_listen_rejects_port_out_of_range() {
        assert!(parse_listen("0.0.0.0:0").is_err());
        assert!(parse_listen("host:not-a-port").is_err());
    }

    #[test]
    fn parse_target_defaults_to_tcp_for_bare_host_port() {
        let (host, port, proto) = parse_target("example.com:443").unwrap();
        assert_eq!(host, "example.com");
        assert_eq!(port, 443);
        assert_eq!(proto, MappingProtocol::Tcp);
    }

    #[test]
    fn parse_target_reads_scheme_prefix() {
        let (host, port, proto) = parse_target("socks5://example.com:1080").unwrap();
        assert_eq!(host, "example.com");
        assert_eq!(port, 1080);
        assert_eq!(proto, MappingProtocol::Socks5);
    }

    #[test]
    fn socks5_port_zero_is_the_dynamic_target_sentinel() {
        assert!(parse_target("socks5://example.com:0").is_ok());
        assert!(parse_target("tcp://example.com:0").is_err());
    }

    #[test]
    fn address_format_round_trips_except_socks5_zero() {
        for (scheme, proto) in [
            ("tcp", MappingProtocol::Tcp),
            ("udp", MappingProtocol::Udp),
            ("socks5", MappingProtocol::Socks5),
        ] {
            let s = format!("{scheme}://host:4000");
            let (host, port, parsed) = parse_target(&s).unwrap();
            assert_eq!((host.as_str(), port, parsed), ("host", 4000, proto));
        }
    }
}
