//! Access control helpers for the evaluation service front-end.
//!
//! Bearer tokens are digested at construction, so the plaintext never sits
//! in server state. Allow rules are stored as canonical byte prefixes: an
//! exact address is simply a full-width prefix, which makes matching a
//! single prefix comparison for both rule forms.

use sha2::{Digest, Sha256};
use std::net::IpAddr;
use std::str::FromStr;
use subtle::ConstantTimeEq;

/// Authentication configuration for the front-end server.
#[derive(Debug, Clone)]
pub enum AuthConfig {
    /// No authentication required.
    None,
    /// Bearer token authentication. Only the SHA-256 digest of the token
    /// is retained.
    Bearer { token_digest: [u8; 32] },
}

impl AuthConfig {
    pub fn bearer(token: impl AsRef<str>) -> Self {
        AuthConfig::Bearer {
            token_digest: Sha256::digest(token.as_ref().as_bytes()).into(),
        }
    }

    /// Validate an `Authorization` header value against the configuration.
    ///
    /// The presented token is digested as well, so the comparison runs over
    /// two fixed-length values and `ct_eq` never takes a data-dependent
    /// early exit.
    pub fn validate(&self, header: &str) -> bool {
        match self {
            AuthConfig::None => true,
            AuthConfig::Bearer { token_digest } => match header.strip_prefix("Bearer ") {
                Some(presented) => {
                    let presented_digest: [u8; 32] = Sha256::digest(presented.as_bytes()).into();
                    presented_digest[..].ct_eq(&token_digest[..]).into()
                }
                None => false,
            },
        }
    }
}

/// IP filter for restricting server access.
///
/// An empty filter allows everything; otherwise a client must match at
/// least one rule.
#[derive(Debug, Clone, Default)]
pub struct IpFilter {
    rules: Vec<PrefixRule>,
}

impl IpFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an allow rule: an exact address (`"10.8.0.5"`, `"fd12::7"`) or a
    /// CIDR block (`"172.16.0.0/12"`, `"fd00::/8"`).
    pub fn allow(&mut self, entry: &str) -> Result<(), String> {
        self.rules.push(PrefixRule::parse(entry)?);
        Ok(())
    }

    pub fn is_allowed(&self, addr: IpAddr) -> bool {
        self.rules.is_empty() || self.rules.iter().any(|rule| rule.matches(addr))
    }
}

/// One allow rule in canonical form. IPv4 occupies the first four octets.
#[derive(Debug, Clone)]
struct PrefixRule {
    octets: [u8; 16],
    prefix_len: u8,
    v4: bool,
}

impl PrefixRule {
    fn parse(entry: &str) -> Result<PrefixRule, String> {
        let (addr_part, prefix_part) = match entry.split_once('/') {
            Some((addr, prefix)) => (addr, Some(prefix)),
            None => (entry, None),
        };

        let addr = IpAddr::from_str(addr_part)
            .map_err(|e| format!("invalid address in '{}': {}", entry, e))?;
        let width: u8 = if addr.is_ipv4() { 32 } else { 128 };

        let prefix_len = match prefix_part {
            Some(p) => p
                .parse::<u8>()
                .map_err(|_| format!("invalid prefix length in '{}'", entry))?,
            // A bare address is an exact match: a full-width prefix.
            None => width,
        };
        if prefix_len > width {
            return Err(format!(
                "prefix length /{} is too long for {}",
                prefix_len, addr_part
            ));
        }

        Ok(PrefixRule {
            octets: canonical_octets(addr),
            prefix_len,
            v4: addr.is_ipv4(),
        })
    }

    fn matches(&self, addr: IpAddr) -> bool {
        if addr.is_ipv4() != self.v4 {
            return false;
        }
        prefix_eq(&canonical_octets(addr), &self.octets, self.prefix_len)
    }
}

fn canonical_octets(addr: IpAddr) -> [u8; 16] {
    let mut out = [0u8; 16];
    match addr {
        IpAddr::V4(v4) => out[..4].copy_from_slice(&v4.octets()),
        IpAddr::V6(v6) => out.copy_from_slice(&v6.octets()),
    }
    out
}

/// Do the leading `bits` bits of `a` and `b` agree?
fn prefix_eq(a: &[u8; 16], b: &[u8; 16], bits: u8) -> bool {
    let whole = usize::from(bits / 8);
    if a[..whole] != b[..whole] {
        return false;
    }
    let rem = bits % 8;
    rem == 0 || (a[whole] ^ b[whole]) >> (8 - rem) == 0
}
