//! Outbound URL policy and error sanitizing.
//!
//! In HTTP mode the upstream endpoint comes from a request header, so the server may be asked to
//! fetch arbitrary URLs. The policy restricts those fetches; STDIO mode uses [`OutboundPolicy::permissive`].

use crate::client::HttpToolsError;
use std::collections::HashSet;
use std::net::IpAddr;
use tokio::net::lookup_host;
use url::Url;

#[derive(Debug, Clone)]
pub struct OutboundPolicy {
    /// If set, only these hosts are allowed (lowercase).
    allowed_hosts: Option<HashSet<String>>,
    /// If false, hosts resolving to loopback/private/link-local addresses are rejected.
    allow_private_networks: bool,
}

impl OutboundPolicy {
    #[must_use]
    pub fn permissive() -> Self {
        Self {
            allowed_hosts: None,
            allow_private_networks: true,
        }
    }

    /// Policy for caller-supplied endpoints. An empty allowlist means any public host.
    #[must_use]
    pub fn restricted<I, S>(allowed_hosts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let hosts: HashSet<String> = allowed_hosts
            .into_iter()
            .map(|h| h.as_ref().trim().to_ascii_lowercase())
            .filter(|h| !h.is_empty())
            .collect();
        Self {
            allowed_hosts: (!hosts.is_empty()).then_some(hosts),
            allow_private_networks: false,
        }
    }

    /// Validate a URL before making an outbound request.
    ///
    /// # Errors
    ///
    /// Returns an error if the scheme is not `http(s)`, the host is not allowlisted, or the host
    /// resolves to a disallowed address.
    pub async fn check_url(&self, url: &Url) -> Result<(), HttpToolsError> {
        let scheme = url.scheme();
        if scheme != "http" && scheme != "https" {
            return Err(HttpToolsError::Blocked(format!(
                "Outbound HTTP blocked: unsupported URL scheme '{scheme}'"
            )));
        }
        let Some(host) = url.host_str() else {
            return Err(HttpToolsError::Blocked(
                "Outbound HTTP blocked: missing URL host".to_string(),
            ));
        };

        if let Some(allowed) = &self.allowed_hosts
            && !allowed.contains(&host.to_ascii_lowercase())
        {
            return Err(HttpToolsError::Blocked(format!(
                "Outbound HTTP blocked: host '{host}' not in allowlist"
            )));
        }
        if self.allow_private_networks {
            return Ok(());
        }

        let bare = host.trim_start_matches('[').trim_end_matches(']');
        if let Ok(ip) = bare.parse::<IpAddr>() {
            return if is_denied_ip(ip) {
                Err(HttpToolsError::Blocked(format!(
                    "Outbound HTTP blocked: destination IP '{ip}' is not allowed"
                )))
            } else {
                Ok(())
            };
        }

        let port = url.port_or_known_default().unwrap_or(443);
        let addrs = lookup_host((host, port)).await.map_err(|e| {
            HttpToolsError::Transport(format!("DNS lookup failed for host '{host}': {e}"))
        })?;
        let mut saw_any = false;
        for addr in addrs {
            saw_any = true;
            if is_denied_ip(addr.ip()) {
                return Err(HttpToolsError::Blocked(format!(
                    "Outbound HTTP blocked: host '{host}' resolved to disallowed IP '{}'",
                    addr.ip()
                )));
            }
        }
        if !saw_any {
            return Err(HttpToolsError::Transport(format!(
                "DNS lookup returned no addresses for host '{host}'"
            )));
        }
        Ok(())
    }
}

impl Default for OutboundPolicy {
    fn default() -> Self {
        Self::permissive()
    }
}

/// Drop credentials, query and fragment from a URL for logging.
#[must_use]
pub fn redact_url(url: &Url) -> String {
    let mut u = url.clone();
    let _ = u.set_username("");
    let _ = u.set_password(None);
    u.set_query(None);
    u.set_fragment(None);
    u.to_string()
}

#[must_use]
pub fn sanitize_reqwest_error(e: &reqwest::Error) -> String {
    let mut msg = e.to_string();
    if let Some(u) = e.url() {
        msg = msg.replace(u.as_str(), &redact_url(u));
    }
    msg
}

fn is_denied_ip(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            v4.is_loopback()
                || v4.is_private()
                || v4.is_link_local()
                || v4.is_unspecified()
                || v4.is_broadcast()
                || v4.is_documentation()
                // 100.64.0.0/10 carrier-grade NAT
                || (v4.octets()[0] == 100 && (v4.octets()[1] & 0xC0) == 64)
        }
        IpAddr::V6(v6) => {
            if let Some(v4) = v6.to_ipv4_mapped() {
                return is_denied_ip(IpAddr::V4(v4));
            }
            let first = v6.segments()[0];
            v6.is_loopback()
                || v6.is_unspecified()
                || (first & 0xFE00) == 0xFC00 // unique local
                || (first & 0xFFC0) == 0xFE80 // link local
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url(s: &str) -> Url {
        Url::parse(s).expect("url")
    }

    #[tokio::test]
    async fn permissive_allows_loopback() {
        let p = OutboundPolicy::permissive();
        p.check_url(&url("http://127.0.0.1:9000/x"))
            .await
            .expect("allowed");
    }

    #[tokio::test]
    async fn restricted_blocks_private_literals() {
        let p = OutboundPolicy::restricted(Vec::<String>::new());
        for u in [
            "http://127.0.0.1/x",
            "http://10.1.2.3/x",
            "http://[::1]/x",
            "http://169.254.169.254/latest",
        ] {
            let err = p.check_url(&url(u)).await.expect_err("private destination");
            assert!(matches!(err, HttpToolsError::Blocked(_)), "{u}: {err:?}");
        }
        p.check_url(&url("https://8.8.8.8/"))
            .await
            .expect("public literal allowed");
    }

    #[tokio::test]
    async fn allowlist_is_case_insensitive() {
        let p = OutboundPolicy::restricted(["API.Platform.SoftwareOne.com"]);
        let err = p
            .check_url(&url("https://evil.example.com/"))
            .await
            .expect_err("not allowlisted");
        assert!(matches!(err, HttpToolsError::Blocked(_)), "{err:?}");
        assert!(err.to_string().contains("not in allowlist"));
    }

    #[test]
    fn redact_url_strips_secrets() {
        let u = url("https://user:pw@api.x.com/public/v1/orders?token=abc#frag");
        assert_eq!(redact_url(&u), "https://api.x.com/public/v1/orders");
    }
}
