//! SPF mechanism and directive types (RFC 4408 Section 5).

use std::fmt;
use std::net::{Ipv4Addr, Ipv6Addr};

/// Qualifier prefix on a directive. Defaults to Pass if omitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Qualifier {
    Pass,     // +
    Fail,     // -
    SoftFail, // ~
    Neutral,  // ?
}

impl Qualifier {
    /// Parse a single-char qualifier prefix. Returns (Qualifier, remaining str).
    /// If no qualifier prefix, defaults to Pass.
    pub fn parse_prefix(s: &str) -> (Qualifier, &str) {
        match s.as_bytes().first() {
            Some(b'+') => (Qualifier::Pass, &s[1..]),
            Some(b'-') => (Qualifier::Fail, &s[1..]),
            Some(b'~') => (Qualifier::SoftFail, &s[1..]),
            Some(b'?') => (Qualifier::Neutral, &s[1..]),
            _ => (Qualifier::Pass, s),
        }
    }
}

impl fmt::Display for Qualifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Qualifier::Pass => write!(f, "+"),
            Qualifier::Fail => write!(f, "-"),
            Qualifier::SoftFail => write!(f, "~"),
            Qualifier::Neutral => write!(f, "?"),
        }
    }
}

/// A CIDR prefix length pair for A and MX mechanisms.
/// `v4` defaults to 32, `v6` defaults to 128 when not specified.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DualCidr {
    pub v4: u8,
    pub v6: u8,
}

impl Default for DualCidr {
    fn default() -> Self {
        Self { v4: 32, v6: 128 }
    }
}

/// SPF mechanism (RFC 4408 Section 5).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mechanism {
    /// `all`
    All,
    /// `include:<domain-spec>`
    Include(String),
    /// `a[:<domain-spec>][/cidr4][//cidr6]`
    A {
        domain: Option<String>,
        cidr: DualCidr,
    },
    /// `mx[:<domain-spec>][/cidr4][//cidr6]`
    Mx {
        domain: Option<String>,
        cidr: DualCidr,
    },
    /// `ptr[:<domain-spec>]`
    Ptr(Option<String>),
    /// `ip4:<ip4-network>[/cidr]`
    Ip4 { addr: Ipv4Addr, prefix_len: u8 },
    /// `ip6:<ip6-network>[/cidr]`
    Ip6 { addr: Ipv6Addr, prefix_len: u8 },
    /// `exists:<domain-spec>`
    Exists(String),
}

/// A directive = qualifier + mechanism.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Directive {
    pub qualifier: Qualifier,
    pub mechanism: Mechanism,
}

/// Error type for SPF record parsing. All parse failures map to PermError
/// in evaluation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SpfParseError {
    #[error("invalid SPF version: expected 'v=spf1'")]
    InvalidVersion,
    #[error("unknown mechanism: {0}")]
    UnknownMechanism(String),
    #[error("invalid mechanism argument: {0}")]
    InvalidArgument(String),
    #[error("duplicate modifier: {0}")]
    DuplicateModifier(String),
    #[error("missing required argument for {0}")]
    MissingArgument(String),
    #[error("invalid CIDR prefix: {0}")]
    InvalidCidr(String),
}

/// Parse a mechanism from its textual representation, qualifier already
/// stripped. The name is the leading alphanumeric run; the remainder must
/// be empty, a `:<arg>` value, or a `/<cidr>` suffix.
pub fn parse_mechanism(term: &str) -> Result<Mechanism, SpfParseError> {
    let name_end = term
        .find(|c: char| !c.is_ascii_alphanumeric())
        .unwrap_or(term.len());
    let name = term[..name_end].to_ascii_lowercase();
    let rest = &term[name_end..];

    // The remainder is either ":value" (value may carry a CIDR suffix for
    // a/mx), "/cidr..." (a/mx only), or nothing.
    let (arg, cidr_only) = match rest.as_bytes().first() {
        None => (None, None),
        Some(b':') => (Some(&rest[1..]), None),
        Some(b'/') => (None, Some(rest)),
        _ => return Err(SpfParseError::InvalidArgument(term.to_string())),
    };

    match name.as_str() {
        "all" => {
            if arg.is_some() || cidr_only.is_some() {
                return Err(SpfParseError::InvalidArgument(
                    "all mechanism takes no arguments".into(),
                ));
            }
            Ok(Mechanism::All)
        }
        "include" => {
            let domain = required_arg(arg, cidr_only, "include")?;
            Ok(Mechanism::Include(domain.to_string()))
        }
        "exists" => {
            let domain = required_arg(arg, cidr_only, "exists")?;
            Ok(Mechanism::Exists(domain.to_string()))
        }
        "ptr" => {
            if cidr_only.is_some() {
                return Err(SpfParseError::InvalidArgument(
                    "ptr takes no CIDR suffix".into(),
                ));
            }
            Ok(Mechanism::Ptr(arg.filter(|a| !a.is_empty()).map(String::from)))
        }
        "a" | "mx" => {
            let suffix = arg.or(cidr_only).unwrap_or("");
            let (domain_part, cidr) = parse_dual_cidr(suffix)?;
            let domain = if domain_part.is_empty() {
                None
            } else {
                Some(domain_part)
            };
            if name == "a" {
                Ok(Mechanism::A { domain, cidr })
            } else {
                Ok(Mechanism::Mx { domain, cidr })
            }
        }
        "ip4" => {
            let raw = required_arg(arg, cidr_only, "ip4")?;
            let (addr_str, prefix_len) = split_ip_prefix(raw, 32)?;
            let addr: Ipv4Addr = addr_str
                .parse()
                .map_err(|_| SpfParseError::InvalidArgument(format!("invalid IPv4: {addr_str}")))?;
            Ok(Mechanism::Ip4 { addr, prefix_len })
        }
        "ip6" => {
            let raw = required_arg(arg, cidr_only, "ip6")?;
            let (addr_str, prefix_len) = split_ip_prefix(raw, 128)?;
            let addr: Ipv6Addr = addr_str
                .parse()
                .map_err(|_| SpfParseError::InvalidArgument(format!("invalid IPv6: {addr_str}")))?;
            Ok(Mechanism::Ip6 { addr, prefix_len })
        }
        _ => Err(SpfParseError::UnknownMechanism(name)),
    }
}

fn required_arg<'a>(
    arg: Option<&'a str>,
    cidr_only: Option<&str>,
    mech: &str,
) -> Result<&'a str, SpfParseError> {
    if cidr_only.is_some() {
        return Err(SpfParseError::InvalidArgument(format!(
            "{mech} takes no CIDR suffix"
        )));
    }
    arg.filter(|a| !a.is_empty())
        .ok_or_else(|| SpfParseError::MissingArgument(mech.to_string()))
}

/// Split "addr/prefix" for ip4/ip6, validating the prefix against `max`.
fn split_ip_prefix(raw: &str, max: u8) -> Result<(&str, u8), SpfParseError> {
    match raw.split_once('/') {
        Some((addr, prefix_str)) => {
            let prefix = prefix_str
                .parse::<u8>()
                .map_err(|_| SpfParseError::InvalidCidr(raw.to_string()))?;
            if prefix > max {
                return Err(SpfParseError::InvalidCidr(format!(
                    "CIDR {prefix} exceeds {max}"
                )));
            }
            Ok((addr, prefix))
        }
        None => Ok((raw, max)),
    }
}

/// Parse an a/mx argument of the form `[domain][/cidr4][//cidr6]`.
/// Returns the domain part (possibly empty) and the prefix lengths.
fn parse_dual_cidr(s: &str) -> Result<(String, DualCidr), SpfParseError> {
    let mut cidr = DualCidr::default();
    let mut rest = s;

    if let Some(pos) = rest.find("//") {
        let v6_str = &rest[pos + 2..];
        cidr.v6 = v6_str
            .parse::<u8>()
            .map_err(|_| SpfParseError::InvalidCidr(format!("invalid IPv6 CIDR: {v6_str}")))?;
        if cidr.v6 > 128 {
            return Err(SpfParseError::InvalidCidr(format!(
                "IPv6 CIDR {0} exceeds 128",
                cidr.v6
            )));
        }
        rest = &rest[..pos];
    }

    if let Some(pos) = rest.rfind('/') {
        let v4_str = &rest[pos + 1..];
        if !v4_str.is_empty() {
            cidr.v4 = v4_str
                .parse::<u8>()
                .map_err(|_| SpfParseError::InvalidCidr(format!("invalid IPv4 CIDR: {v4_str}")))?;
            if cidr.v4 > 32 {
                return Err(SpfParseError::InvalidCidr(format!(
                    "IPv4 CIDR {0} exceeds 32",
                    cidr.v4
                )));
            }
            rest = &rest[..pos];
        }
    }

    Ok((rest.to_string(), cidr))
}

impl fmt::Display for Mechanism {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mechanism::All => write!(f, "all"),
            Mechanism::Include(d) => write!(f, "include:{d}"),
            Mechanism::A { domain, cidr } => write_a_mx(f, "a", domain, cidr),
            Mechanism::Mx { domain, cidr } => write_a_mx(f, "mx", domain, cidr),
            Mechanism::Ptr(d) => {
                write!(f, "ptr")?;
                if let Some(d) = d {
                    write!(f, ":{d}")?;
                }
                Ok(())
            }
            Mechanism::Ip4 { addr, prefix_len } => {
                write!(f, "ip4:{addr}")?;
                if *prefix_len != 32 {
                    write!(f, "/{prefix_len}")?;
                }
                Ok(())
            }
            Mechanism::Ip6 { addr, prefix_len } => {
                write!(f, "ip6:{addr}")?;
                if *prefix_len != 128 {
                    write!(f, "/{prefix_len}")?;
                }
                Ok(())
            }
            Mechanism::Exists(d) => write!(f, "exists:{d}"),
        }
    }
}

fn write_a_mx(
    f: &mut fmt::Formatter<'_>,
    name: &str,
    domain: &Option<String>,
    cidr: &DualCidr,
) -> fmt::Result {
    write!(f, "{name}")?;
    if let Some(d) = domain {
        write!(f, ":{d}")?;
    }
    if cidr.v4 != 32 {
        write!(f, "/{}", cidr.v4)?;
    }
    if cidr.v6 != 128 {
        write!(f, "//{}", cidr.v6)?;
    }
    Ok(())
}

impl fmt::Display for Directive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Only print qualifier if not Pass (the default)
        if self.qualifier != Qualifier::Pass {
            write!(f, "{}", self.qualifier)?;
        }
        write!(f, "{}", self.mechanism)
    }
}
