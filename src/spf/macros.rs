//! SPF macro expansion (RFC 4408 Section 8).

use std::net::IpAddr;

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MacroError {
    #[error("trailing % in macro string")]
    TrailingPercent,
    #[error("unclosed macro expression")]
    UnclosedMacro,
    #[error("empty macro expression")]
    EmptyMacro,
    #[error("invalid macro escape: %{0}")]
    InvalidEscape(char),
    #[error("unknown macro letter: {0}")]
    UnknownMacro(char),
    #[error("macro %{{{0}}} only allowed in exp= context")]
    ExpOnlyMacro(char),
    #[error("invalid digit count in macro")]
    InvalidDigits,
}

/// Context for macro expansion, borrowed from the evaluation state.
#[derive(Debug, Clone, Copy)]
pub struct MacroContext<'a> {
    /// Full sender address (local-part@domain).
    pub sender: &'a str,
    /// Current domain being evaluated (changes during include/redirect).
    pub domain: &'a str,
    /// Connecting client IP.
    pub client_ip: IpAddr,
    /// HELO/EHLO identity.
    pub helo: &'a str,
    /// Receiving MTA domain, for the exp-only %{r} macro.
    pub receiver: Option<&'a str>,
}

impl<'a> MacroContext<'a> {
    /// Local-part of the sender, "postmaster" when absent.
    pub fn local_part(&self) -> &str {
        match self.sender.rsplit_once('@') {
            Some((local, _)) if !local.is_empty() => local,
            _ => "postmaster",
        }
    }

    /// Domain of the sender, falling back to the current domain.
    pub fn sender_domain(&self) -> &str {
        match self.sender.rsplit_once('@') {
            Some((_, domain)) => domain,
            None => self.domain,
        }
    }

    /// %{i}: dotted decimal for IPv4, dot-separated nibbles for IPv6.
    fn ip_macro_format(&self) -> String {
        match self.client_ip {
            IpAddr::V4(v4) => v4.to_string(),
            IpAddr::V6(v6) => {
                let mut nibbles = String::with_capacity(63);
                for segment in v6.segments() {
                    for shift in [12u32, 8, 4, 0] {
                        if !nibbles.is_empty() {
                            nibbles.push('.');
                        }
                        let nibble = (segment >> shift) & 0xf;
                        nibbles.push(char::from_digit(nibble as u32, 16).unwrap_or('0'));
                    }
                }
                nibbles
            }
        }
    }

    /// %{v}: "in-addr" for IPv4, "ip6" for IPv6.
    fn ip_version(&self) -> &'static str {
        match self.client_ip {
            IpAddr::V4(_) => "in-addr",
            IpAddr::V6(_) => "ip6",
        }
    }
}

/// Expand SPF macros in a domain-spec or explanation string.
///
/// `exp_context` controls whether explanation-only macros (%{c}, %{r}, %{t})
/// are allowed. A string without `%` comes back unchanged.
pub fn expand(input: &str, ctx: &MacroContext, exp_context: bool) -> Result<String, MacroError> {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars();

    while let Some(c) = chars.next() {
        if c != '%' {
            result.push(c);
            continue;
        }

        match chars.next() {
            Some('%') => result.push('%'),
            Some('_') => result.push(' '),
            Some('-') => result.push_str("%20"),
            Some('{') => {
                let mut body = String::new();
                loop {
                    match chars.next() {
                        Some('}') => break,
                        Some(c) => body.push(c),
                        None => return Err(MacroError::UnclosedMacro),
                    }
                }
                result.push_str(&expand_macro_body(&body, ctx, exp_context)?);
            }
            Some(c) => return Err(MacroError::InvalidEscape(c)),
            None => return Err(MacroError::TrailingPercent),
        }
    }

    Ok(result)
}

/// Expand a macro body (the part inside %{ ... }).
/// Format: <letter>[<digits>][r][<delimiters>]
fn expand_macro_body(
    body: &str,
    ctx: &MacroContext,
    exp_context: bool,
) -> Result<String, MacroError> {
    let mut chars = body.chars();
    let letter = chars.next().ok_or(MacroError::EmptyMacro)?;
    let rest: String = chars.collect();

    let value = macro_value(letter.to_ascii_lowercase(), ctx, exp_context)?;
    let (digits, reverse, delimiters) = parse_transformers(&rest)?;
    let transformed = apply_transformers(&value, digits, reverse, &delimiters);

    // Uppercase macro letters URL-escape their expansion.
    if letter.is_ascii_uppercase() {
        Ok(url_escape(&transformed))
    } else {
        Ok(transformed)
    }
}

fn macro_value(letter: char, ctx: &MacroContext, exp_context: bool) -> Result<String, MacroError> {
    match letter {
        's' => Ok(ctx.sender.to_string()),
        'l' => Ok(ctx.local_part().to_string()),
        'o' => Ok(ctx.sender_domain().to_string()),
        'd' => Ok(ctx.domain.to_string()),
        'i' => Ok(ctx.ip_macro_format()),
        // Validated PTR name: "unknown" is an RFC-permitted placeholder
        // that avoids extra reverse-DNS traffic.
        'p' => Ok("unknown".to_string()),
        'v' => Ok(ctx.ip_version().to_string()),
        'h' => Ok(ctx.helo.to_string()),
        'c' | 'r' | 't' => {
            if !exp_context {
                return Err(MacroError::ExpOnlyMacro(letter));
            }
            match letter {
                'c' => Ok(ctx.client_ip.to_string()),
                'r' => Ok(ctx.receiver.unwrap_or("unknown").to_string()),
                't' => Ok(std::time::SystemTime::now()
                    .duration_since(std::time::UNIX_EPOCH)
                    .map(|d| d.as_secs().to_string())
                    .unwrap_or_else(|_| "0".into())),
                _ => unreachable!(),
            }
        }
        _ => Err(MacroError::UnknownMacro(letter)),
    }
}

/// Parse transformer suffix: [digits][r][delimiters]
fn parse_transformers(rest: &str) -> Result<(Option<usize>, bool, String), MacroError> {
    let mut chars = rest.chars().peekable();

    let mut digit_str = String::new();
    while let Some(&c) = chars.peek() {
        if c.is_ascii_digit() {
            digit_str.push(c);
            chars.next();
        } else {
            break;
        }
    }
    let digits = if digit_str.is_empty() {
        None
    } else {
        Some(digit_str.parse().map_err(|_| MacroError::InvalidDigits)?)
    };

    let reverse = matches!(chars.peek(), Some('r') | Some('R'));
    if reverse {
        chars.next();
    }

    let delimiters: String = chars.collect();
    let delimiters = if delimiters.is_empty() {
        ".".to_string()
    } else {
        delimiters
    };

    Ok((digits, reverse, delimiters))
}

/// Split by the delimiter set, optionally reverse, keep the last N labels,
/// rejoin with dots (always dots, regardless of the original delimiter).
fn apply_transformers(
    value: &str,
    digits: Option<usize>,
    reverse: bool,
    delimiters: &str,
) -> String {
    if digits.is_none() && !reverse && delimiters == "." {
        return value.to_string();
    }

    let delim_chars: Vec<char> = delimiters.chars().collect();
    let mut parts: Vec<&str> = value.split(|c: char| delim_chars.contains(&c)).collect();

    if reverse {
        parts.reverse();
    }

    if let Some(n) = digits {
        // n == 0 means all parts
        if n > 0 && n < parts.len() {
            parts = parts[parts.len() - n..].to_vec();
        }
    }

    parts.join(".")
}

/// Percent-encode everything outside the URL-unreserved set.
fn url_escape(s: &str) -> String {
    let mut encoded = String::with_capacity(s.len() * 3);
    for byte in s.bytes() {
        if byte.is_ascii_alphanumeric() || matches!(byte, b'-' | b'_' | b'.' | b'~') {
            encoded.push(byte as char);
        } else {
            encoded.push_str(&format!("%{:02X}", byte));
        }
    }
    encoded
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn test_ctx() -> MacroContext<'static> {
        MacroContext {
            sender: "strong-bad@email.example.com",
            domain: "email.example.com",
            client_ip: IpAddr::V4(Ipv4Addr::new(192, 0, 2, 3)),
            helo: "mx.example.org",
            receiver: Some("receiver.example.com"),
        }
    }

    #[test]
    fn no_macros_is_identity() {
        let ctx = test_ctx();
        assert_eq!(
            expand("example.com", &ctx, false).unwrap(),
            "example.com"
        );
        assert_eq!(
            expand("_spf.sub.example.org", &ctx, false).unwrap(),
            "_spf.sub.example.org"
        );
    }

    #[test]
    fn expand_sender() {
        let ctx = test_ctx();
        assert_eq!(
            expand("%{s}", &ctx, false).unwrap(),
            "strong-bad@email.example.com"
        );
    }

    #[test]
    fn expand_local_part_and_sender_domain() {
        let ctx = test_ctx();
        assert_eq!(expand("%{l}", &ctx, false).unwrap(), "strong-bad");
        assert_eq!(expand("%{o}", &ctx, false).unwrap(), "email.example.com");
    }

    #[test]
    fn expand_domain() {
        let ctx = test_ctx();
        assert_eq!(expand("%{d}", &ctx, false).unwrap(), "email.example.com");
    }

    #[test]
    fn expand_ip() {
        let ctx = test_ctx();
        assert_eq!(expand("%{i}", &ctx, false).unwrap(), "192.0.2.3");
    }

    #[test]
    fn expand_ip_reversed() {
        let ctx = test_ctx();
        assert_eq!(expand("%{ir}", &ctx, false).unwrap(), "3.2.0.192");
    }

    #[test]
    fn expand_ip6_nibbles() {
        let mut ctx = test_ctx();
        ctx.client_ip = "2001:db8::cb01".parse().unwrap();
        let nibbles = expand("%{i}", &ctx, false).unwrap();
        assert!(nibbles.starts_with("2.0.0.1.0.d.b.8"));
        assert!(nibbles.ends_with("c.b.0.1"));
        assert_eq!(nibbles.split('.').count(), 32);
    }

    #[test]
    fn expand_ip_version() {
        let mut ctx = test_ctx();
        assert_eq!(expand("%{v}", &ctx, false).unwrap(), "in-addr");
        ctx.client_ip = "::1".parse().unwrap();
        assert_eq!(expand("%{v}", &ctx, false).unwrap(), "ip6");
    }

    #[test]
    fn expand_helo() {
        let ctx = test_ctx();
        assert_eq!(expand("%{h}", &ctx, false).unwrap(), "mx.example.org");
    }

    #[test]
    fn expand_keep_last_n_labels() {
        let ctx = test_ctx();
        assert_eq!(expand("%{d2}", &ctx, false).unwrap(), "example.com");
        assert_eq!(expand("%{d1}", &ctx, false).unwrap(), "com");
    }

    #[test]
    fn expand_reversed_with_digits() {
        let ctx = test_ctx();
        // "email.example.com" reversed is com.example.email; last 1 is email
        assert_eq!(expand("%{d1r}", &ctx, false).unwrap(), "email");
    }

    #[test]
    fn expand_custom_delimiter() {
        let ctx = test_ctx();
        // local-part "strong-bad" split on '-', rejoined with dots
        assert_eq!(expand("%{l-}", &ctx, false).unwrap(), "strong.bad");
        assert_eq!(expand("%{lr-}", &ctx, false).unwrap(), "bad.strong");
    }

    #[test]
    fn expand_composite_domain_spec() {
        let ctx = test_ctx();
        assert_eq!(
            expand("%{ir}.%{v}._spf.%{d2}", &ctx, false).unwrap(),
            "3.2.0.192.in-addr._spf.example.com"
        );
    }

    #[test]
    fn literal_escapes() {
        let ctx = test_ctx();
        assert_eq!(expand("%%", &ctx, false).unwrap(), "%");
        assert_eq!(expand("%_", &ctx, false).unwrap(), " ");
        assert_eq!(expand("%-", &ctx, false).unwrap(), "%20");
    }

    #[test]
    fn uppercase_url_escapes() {
        let ctx = test_ctx();
        assert_eq!(
            expand("%{S}", &ctx, false).unwrap(),
            "strong-bad%40email.example.com"
        );
    }

    #[test]
    fn unknown_macro_letter_is_error() {
        let ctx = test_ctx();
        assert_eq!(
            expand("%{z}", &ctx, false).unwrap_err(),
            MacroError::UnknownMacro('z')
        );
    }

    #[test]
    fn malformed_macros_are_errors() {
        let ctx = test_ctx();
        assert_eq!(expand("%", &ctx, false).unwrap_err(), MacroError::TrailingPercent);
        assert_eq!(expand("%{d", &ctx, false).unwrap_err(), MacroError::UnclosedMacro);
        assert_eq!(expand("%{}", &ctx, false).unwrap_err(), MacroError::EmptyMacro);
        assert_eq!(expand("%x", &ctx, false).unwrap_err(), MacroError::InvalidEscape('x'));
    }

    #[test]
    fn exp_only_macros_gated() {
        let ctx = test_ctx();
        assert_eq!(
            expand("%{c}", &ctx, false).unwrap_err(),
            MacroError::ExpOnlyMacro('c')
        );
        assert_eq!(expand("%{c}", &ctx, true).unwrap(), "192.0.2.3");
        assert_eq!(
            expand("%{r}", &ctx, true).unwrap(),
            "receiver.example.com"
        );
        assert!(expand("%{t}", &ctx, true).is_ok());
    }

    #[test]
    fn ptr_macro_placeholder() {
        let ctx = test_ctx();
        assert_eq!(expand("%{p}", &ctx, false).unwrap(), "unknown");
    }

    #[test]
    fn sender_without_local_part() {
        let mut ctx = test_ctx();
        ctx.sender = "example.com";
        assert_eq!(expand("%{l}", &ctx, false).unwrap(), "postmaster");
        assert_eq!(expand("%{o}", &ctx, false).unwrap(), "email.example.com");
    }
}
