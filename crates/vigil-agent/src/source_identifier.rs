//! Source-identifier resolver (§4.8).
//!
//! For each request-header chunk, decides whether the header carries a
//! new, strictly-higher-priority source identifier for the session. A
//! failure anywhere in this path (bad base64, bad JSON, unparseable IP)
//! simply leaves the previous identifier in place (§7 kind 7) — it never
//! affects the verdict.

use base64::{engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD}, Engine as _};
use vigil_config::SourceIdentifierConfig;
use vigil_protocol::HeaderList;

use crate::session::{SourceIdentifier, SourceIdentifierKind};

/// Resolves the header bulk against the configured priority list and
/// returns every session-relevant observation: an optional new identifier
/// candidate, plus an optional `proxy_ip` value to save regardless of
/// whether XFF became the identifier (§4.8: "writes the parsed IP under
/// the key `proxy_ip` ... regardless of whether it also became the source
/// identifier").
#[derive(Debug, Default)]
pub struct ResolvedIdentity {
    pub candidate: Option<SourceIdentifier>,
    pub proxy_ip: Option<String>,
}

pub fn resolve(headers: &HeaderList, config: &SourceIdentifierConfig) -> ResolvedIdentity {
    let mut result = ResolvedIdentity::default();

    for custom_key in &config.custom_headers {
        if let Some(header) = headers.find(custom_key) {
            result.candidate = Some(SourceIdentifier {
                kind: SourceIdentifierKind::CustomHeader,
                value: header.value.clone(),
            });
            return result;
        }
    }

    if let Some(header) = headers.find(vigil_protocol::headers::names::AUTHORIZATION) {
        if let Some(value) = resolve_jwt(&header.value, &config.jwt_claim_fields) {
            result.candidate = Some(SourceIdentifier {
                kind: SourceIdentifierKind::Authorization,
                value,
            });
            return result;
        }
    }

    if let Some(header) = headers.find(vigil_protocol::headers::names::X_FORWARDED_FOR) {
        if let Some((first_ip, all_valid)) = parse_xff(&header.value) {
            if all_valid && is_trusted(&first_ip, &config.xff_trusted_cidrs) {
                result.proxy_ip = Some(first_ip.clone());
                result.candidate = Some(SourceIdentifier {
                    kind: SourceIdentifierKind::XForwardedFor,
                    value: first_ip,
                });
                return result;
            }
        }
    }

    if let Some(header) = headers.find(vigil_protocol::headers::names::COOKIE) {
        if let Some(value) = resolve_cookie(&header.value, &config.cookie_keys) {
            result.candidate = Some(SourceIdentifier {
                kind: SourceIdentifierKind::Cookie,
                value,
            });
        }
    }

    result
}

/// `"Bearer "` prefix, then the base64 payload between the first two `.`
/// characters, decoded and walked as a JSON object for the first
/// configured claim field present.
fn resolve_jwt(header_value: &str, claim_fields: &[String]) -> Option<String> {
    let token = header_value.strip_prefix("Bearer ")?;
    let mut parts = token.splitn(3, '.');
    let _header_b64 = parts.next()?;
    let payload_b64 = parts.next()?;

    let decoded = URL_SAFE_NO_PAD
        .decode(payload_b64)
        .or_else(|_| STANDARD.decode(payload_b64))
        .ok()?;

    let claims: serde_json::Value = serde_json::from_slice(&decoded).ok()?;
    let object = claims.as_object()?;

    for field in claim_fields {
        if let Some(value) = object.get(field) {
            return Some(match value {
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            });
        }
    }
    None
}

/// Splits on `,`, strips optional `[ipv6]:port` or `ipv4:port` suffixes,
/// and validates each trimmed token as an IP address. Returns the first
/// token and whether every token validated.
fn parse_xff(header_value: &str) -> Option<(String, bool)> {
    let tokens: Vec<&str> = header_value.split(',').collect();
    if tokens.is_empty() {
        return None;
    }

    let mut all_valid = true;
    let mut first: Option<String> = None;
    for token in &tokens {
        let trimmed = strip_port(token.trim());
        if trimmed.parse::<std::net::IpAddr>().is_err() {
            all_valid = false;
        }
        if first.is_none() {
            first = Some(trimmed.to_string());
        }
    }

    first.map(|f| (f, all_valid))
}

fn strip_port(token: &str) -> &str {
    if let Some(rest) = token.strip_prefix('[') {
        if let Some(end) = rest.find(']') {
            return &rest[..end];
        }
        return token;
    }
    // A bare IPv4:port has exactly one ':'; a bare IPv6 address has more
    // than one, so only strip when there's a single colon.
    if token.matches(':').count() == 1 {
        if let Some((ip, _port)) = token.rsplit_once(':') {
            return ip;
        }
    }
    token
}

/// Empty trust list means "trust all" (§4.8 P7).
fn is_trusted(ip: &str, trusted_cidrs: &[String]) -> bool {
    if trusted_cidrs.is_empty() {
        return true;
    }
    let Ok(addr) = ip.parse::<std::net::IpAddr>() else {
        return false;
    };
    trusted_cidrs.iter().any(|cidr| cidr_contains(cidr, addr))
}

fn cidr_contains(cidr: &str, addr: std::net::IpAddr) -> bool {
    let (network_str, prefix_str) = match cidr.split_once('/') {
        Some(parts) => parts,
        None => (cidr, match addr {
            std::net::IpAddr::V4(_) => "32",
            std::net::IpAddr::V6(_) => "128",
        }),
    };
    let Ok(network) = network_str.parse::<std::net::IpAddr>() else {
        return false;
    };
    let Ok(prefix) = prefix_str.parse::<u32>() else {
        return false;
    };

    match (network, addr) {
        (std::net::IpAddr::V4(net), std::net::IpAddr::V4(ip)) => {
            let mask = if prefix == 0 { 0 } else { u32::MAX << (32 - prefix.min(32)) };
            (u32::from(net) & mask) == (u32::from(ip) & mask)
        }
        (std::net::IpAddr::V6(net), std::net::IpAddr::V6(ip)) => {
            let mask = if prefix == 0 { 0u128 } else { u128::MAX << (128 - prefix.min(128)) };
            (u128::from(net) & mask) == (u128::from(ip) & mask)
        }
        _ => false,
    }
}

/// Searches for any configured cookie key, plus the built-in
/// `_oauth2_proxy` and `jsessionid`. For `_oauth2_proxy`, base64-decodes
/// the value and keeps everything before `|`.
fn resolve_cookie(header_value: &str, configured_keys: &[String]) -> Option<String> {
    let pairs = parse_cookie_pairs(header_value);

    let mut keys: Vec<&str> = configured_keys.iter().map(String::as_str).collect();
    keys.push("_oauth2_proxy");
    keys.push("jsessionid");

    for key in keys {
        if let Some((_, value)) = pairs.iter().find(|(k, _)| k.eq_ignore_ascii_case(key)) {
            if key.eq_ignore_ascii_case("_oauth2_proxy") {
                if let Ok(decoded) = STANDARD.decode(value) {
                    if let Ok(text) = String::from_utf8(decoded) {
                        return Some(text.split('|').next().unwrap_or("").to_string());
                    }
                }
                continue;
            }
            return Some((*value).to_string());
        }
    }
    None
}

fn parse_cookie_pairs(header_value: &str) -> Vec<(&str, &str)> {
    header_value
        .split(';')
        .filter_map(|part| {
            let part = part.trim();
            part.split_once('=').map(|(k, v)| (k.trim(), v.trim()))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use vigil_protocol::HttpHeader;

    fn headers_with(key: &str, value: &str) -> HeaderList {
        let mut list = HeaderList::new();
        list.push(HttpHeader::new(key.to_string(), value.to_string(), 0, true));
        list
    }

    #[test]
    fn xff_first_entry_becomes_candidate_and_proxy_ip() {
        let headers = headers_with("X-Forwarded-For", "10.0.0.1, 10.0.0.2");
        let resolved = resolve(&headers, &SourceIdentifierConfig::default());
        assert_eq!(resolved.proxy_ip.as_deref(), Some("10.0.0.1"));
        assert_eq!(resolved.candidate.unwrap().value, "10.0.0.1");
    }

    #[test]
    fn xff_rejects_non_ip_entries() {
        let headers = headers_with("X-Forwarded-For", "10.0.0.1, not-an-ip");
        let resolved = resolve(&headers, &SourceIdentifierConfig::default());
        assert!(resolved.candidate.is_none());
        assert!(resolved.proxy_ip.is_none());
    }

    #[test]
    fn xff_honors_trust_cidr() {
        let headers = headers_with("X-Forwarded-For", "192.168.1.5");
        let mut config = SourceIdentifierConfig::default();
        config.xff_trusted_cidrs = vec!["10.0.0.0/8".to_string()];
        let resolved = resolve(&headers, &config);
        assert!(resolved.candidate.is_none());

        config.xff_trusted_cidrs = vec!["192.168.0.0/16".to_string()];
        let resolved = resolve(&headers, &config);
        assert!(resolved.candidate.is_some());
    }

    #[test]
    fn xff_strips_port_suffix() {
        let headers = headers_with("X-Forwarded-For", "10.0.0.1:8080");
        let resolved = resolve(&headers, &SourceIdentifierConfig::default());
        assert_eq!(resolved.candidate.unwrap().value, "10.0.0.1");
    }

    #[test]
    fn cookie_jsessionid_is_recognized() {
        let headers = headers_with("Cookie", "foo=bar; jsessionid=ABC123");
        let resolved = resolve(&headers, &SourceIdentifierConfig::default());
        assert_eq!(resolved.candidate.unwrap().value, "ABC123");
    }

    #[test]
    fn cookie_oauth2_proxy_is_decoded_and_truncated_at_pipe() {
        let raw = STANDARD.encode("alice@example.com|token|extra");
        let headers = headers_with("Cookie", &format!("_oauth2_proxy={raw}"));
        let resolved = resolve(&headers, &SourceIdentifierConfig::default());
        assert_eq!(resolved.candidate.unwrap().value, "alice@example.com");
    }

    #[test]
    fn custom_header_outranks_everything_else() {
        let mut list = HeaderList::new();
        list.push(HttpHeader::new("X-Client-Id".into(), "custom-123".into(), 0, false));
        list.push(HttpHeader::new("X-Forwarded-For".into(), "10.0.0.1".into(), 1, true));

        let mut config = SourceIdentifierConfig::default();
        config.custom_headers = vec!["X-Client-Id".to_string()];

        let resolved = resolve(&list, &config);
        assert_eq!(resolved.candidate.unwrap().value, "custom-123");
    }

    #[test]
    fn malformed_jwt_is_skipped_without_error() {
        let headers = headers_with("Authorization", "Bearer not-a-jwt");
        let resolved = resolve(&headers, &SourceIdentifierConfig::default());
        assert!(resolved.candidate.is_none());
    }

    #[test]
    fn jwt_claim_resolved_from_bearer_token() {
        let payload = serde_json::json!({"sub": "user-42"});
        let payload_b64 = URL_SAFE_NO_PAD.encode(payload.to_string());
        let token = format!("Bearer header.{payload_b64}.signature");
        let headers = headers_with("Authorization", &token);
        let resolved = resolve(&headers, &SourceIdentifierConfig::default());
        assert_eq!(resolved.candidate.unwrap().value, "user-42");
    }
}
