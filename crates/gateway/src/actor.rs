//! Who is calling: hashed client IP, session presence and user agent.

use std::net::IpAddr;

use axum::http::{header, HeaderMap};
use sha2::{Digest, Sha256};

use pr_conversations::redact::truncate;
use pr_domain::config::AnalyticsConfig;
use pr_domain::conversation::{ActorContext, ActorType};

/// Hex characters kept from the salted digest.
const IP_HASH_LEN: usize = 24;

fn header_str<'a>(headers: &'a HeaderMap, name: impl header::AsHeaderName) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

/// First `x-forwarded-for` hop, then `x-real-ip`, then the socket peer.
pub fn client_ip(headers: &HeaderMap, peer: Option<IpAddr>) -> Option<String> {
    let forwarded = header_str(headers, "x-forwarded-for")
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty());

    forwarded
        .or_else(|| header_str(headers, "x-real-ip"))
        .map(str::to_owned)
        .or_else(|| peer.map(|ip| ip.to_string()))
}

/// Salted one-way hash of the client IP.
pub fn hash_ip(salt: &str, ip: &str) -> String {
    let digest = Sha256::digest(format!("{salt}:{ip}").as_bytes());
    let mut hashed = hex::encode(digest);
    hashed.truncate(IP_HASH_LEN);
    hashed
}

fn has_session_cookie(headers: &HeaderMap, names: &[String]) -> bool {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .any(|(name, value)| !value.is_empty() && names.iter().any(|n| n == name))
}

/// Best-effort context for the caller. Never fails; anything that cannot
/// be determined is left out.
pub fn build_actor_context(
    headers: &HeaderMap,
    peer: Option<IpAddr>,
    actor_type: ActorType,
    salt: &str,
    cfg: &AnalyticsConfig,
) -> ActorContext {
    ActorContext {
        actor_type,
        has_session: has_session_cookie(headers, &cfg.session_cookie_names),
        ip_hash: client_ip(headers, peer).map(|ip| hash_ip(salt, &ip)),
        user_agent: header_str(headers, header::USER_AGENT)
            .map(|ua| truncate(ua, cfg.user_agent_max_chars)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers(pairs: &[(&'static str, &str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.append(*name, HeaderValue::from_str(value).unwrap());
        }
        map
    }

    #[test]
    fn forwarded_for_wins_over_real_ip_and_peer() {
        let h = headers(&[
            ("x-forwarded-for", " 203.0.113.7, 10.0.0.1"),
            ("x-real-ip", "198.51.100.2"),
        ]);
        let peer = Some("127.0.0.1".parse().unwrap());
        assert_eq!(client_ip(&h, peer).as_deref(), Some("203.0.113.7"));

        let h = headers(&[("x-real-ip", "198.51.100.2")]);
        assert_eq!(client_ip(&h, peer).as_deref(), Some("198.51.100.2"));

        assert_eq!(client_ip(&HeaderMap::new(), peer).as_deref(), Some("127.0.0.1"));
        assert_eq!(client_ip(&HeaderMap::new(), None), None);
    }

    #[test]
    fn ip_hash_is_salted_and_short() {
        let a = hash_ip("analytics", "203.0.113.7");
        let b = hash_ip("other", "203.0.113.7");
        assert_eq!(a.len(), IP_HASH_LEN);
        assert_ne!(a, b);
        assert!(!a.contains("203"));
        assert_eq!(a, hash_ip("analytics", "203.0.113.7"));
    }

    #[test]
    fn context_from_headers() {
        let cfg = AnalyticsConfig {
            user_agent_max_chars: 8,
            ..Default::default()
        };
        let h = headers(&[
            ("cookie", "theme=dark; session_token=abc123"),
            ("user-agent", "Mozilla/5.0 (X11; Linux x86_64)"),
            ("x-real-ip", "198.51.100.2"),
        ]);
        let actor = build_actor_context(&h, None, ActorType::Public, "salt", &cfg);
        assert_eq!(actor.actor_type, ActorType::Public);
        assert!(actor.has_session);
        assert_eq!(actor.ip_hash, Some(hash_ip("salt", "198.51.100.2")));
        assert_eq!(actor.user_agent.as_deref(), Some("Mozilla/…"));
    }

    #[test]
    fn bare_request_yields_empty_context() {
        let actor = build_actor_context(
            &HeaderMap::new(),
            None,
            ActorType::Admin,
            "salt",
            &AnalyticsConfig::default(),
        );
        assert_eq!(actor.actor_type, ActorType::Admin);
        assert!(!actor.has_session);
        assert!(actor.ip_hash.is_none());
        assert!(actor.user_agent.is_none());
    }

    #[test]
    fn empty_session_cookie_does_not_count() {
        let h = headers(&[("cookie", "session_token=; other=1")]);
        let actor = build_actor_context(&h, None, ActorType::Public, "s", &AnalyticsConfig::default());
        assert!(!actor.has_session);
    }
}
