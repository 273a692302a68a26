//! Normalize a configured endpoint into a `ws(s)://…/_tunnox` URL.

/// Accepts `http(s)://host[:port][/path]` or a bare `host[:port]` and
/// returns the `ws(s)://host[:port]/_tunnox` URL to dial.
pub fn normalize_ws_url(addr: &str) -> String {
    if let Some(rest) = addr.strip_prefix("wss://").or_else(|| addr.strip_prefix("ws://")) {
        let scheme = if addr.starts_with("wss://") { "wss" } else { "ws" };
        return format!("{scheme}://{}", with_tunnox_path(rest));
    }
    if let Some(rest) = addr.strip_prefix("https://") {
        return format!("wss://{}", with_tunnox_path(rest));
    }
    if let Some(rest) = addr.strip_prefix("http://") {
        return format!("ws://{}", with_tunnox_path(rest));
    }
    format!("wss://{}", with_tunnox_path(addr))
}

fn with_tunnox_path(host_and_maybe_path: &str) -> String {
    if host_and_maybe_path.contains('/') {
        host_and_maybe_path.to_string()
    } else {
        format!("{host_and_maybe_path}/_tunnox")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_host_gets_wss_scheme_and_tunnox_path() {
        assert_eq!(
            normalize_ws_url("ws.tunnox.net"),
            "wss://ws.tunnox.net/_tunnox"
        );
    }

    #[test]
    fn https_becomes_wss() {
        assert_eq!(
            normalize_ws_url("https://gw.example.com:8443"),
            "wss://gw.example.com:8443/_tunnox"
        );
    }

    #[test]
    fn http_becomes_ws() {
        assert_eq!(
            normalize_ws_url("http://gw.example.com:8080"),
            "ws://gw.example.com:8080/_tunnox"
        );
    }

    #[test]
    fn explicit_path_is_preserved() {
        assert_eq!(
            normalize_ws_url("wss://gw.example.com/custom"),
            "wss://gw.example.com/custom"
        );
    }
}
