//! SPF record parsing.

use super::mechanism::{parse_mechanism, Directive, Qualifier, SpfParseError};

/// Parsed SPF record. Directive order is semantically significant:
/// mechanisms are evaluated left-to-right, first match wins.
#[derive(Debug, Clone)]
pub struct SpfRecord {
    pub directives: Vec<Directive>,
    pub redirect: Option<String>,
    pub exp: Option<String>,
    pub raw: String,
}

impl SpfRecord {
    /// Check if a TXT record is an SPF record: case-insensitive `v=spf1`
    /// followed by a space or end-of-string. Non-SPF TXT records coexist
    /// on the same name and are simply not candidates.
    pub fn is_spf_record(txt: &str) -> bool {
        let lower = txt.trim().to_ascii_lowercase();
        lower == "v=spf1" || lower.starts_with("v=spf1 ")
    }

    /// Parse an SPF TXT record.
    pub fn parse(txt: &str) -> Result<Self, SpfParseError> {
        let txt = txt.trim();

        if !Self::is_spf_record(txt) {
            return Err(SpfParseError::InvalidVersion);
        }

        let mut directives = Vec::new();
        let mut redirect = None;
        let mut exp = None;

        // Skip the "v=spf1" version token.
        for term in txt[6..].split_whitespace() {
            // Modifiers are name=value; a '=' before any ':' marks one.
            let is_modifier = match (term.find('='), term.find(':')) {
                (Some(eq), Some(colon)) => eq < colon,
                (Some(_), None) => true,
                _ => false,
            };

            if is_modifier {
                let (name, value) = term.split_once('=').unwrap_or((term, ""));
                match name.to_ascii_lowercase().as_str() {
                    "redirect" => {
                        if redirect.is_some() {
                            return Err(SpfParseError::DuplicateModifier("redirect".into()));
                        }
                        if value.is_empty() {
                            return Err(SpfParseError::MissingArgument("redirect".into()));
                        }
                        redirect = Some(value.to_string());
                    }
                    "exp" => {
                        if exp.is_some() {
                            return Err(SpfParseError::DuplicateModifier("exp".into()));
                        }
                        if value.is_empty() {
                            return Err(SpfParseError::MissingArgument("exp".into()));
                        }
                        exp = Some(value.to_string());
                    }
                    // Unknown modifiers are ignored per RFC permissiveness.
                    _ => {}
                }
                continue;
            }

            let (qualifier, mech_str) = Qualifier::parse_prefix(term);
            let mechanism = parse_mechanism(mech_str)?;
            directives.push(Directive {
                qualifier,
                mechanism,
            });
        }

        Ok(SpfRecord {
            directives,
            redirect,
            exp,
            raw: txt.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spf::mechanism::Mechanism;
    use std::net::Ipv4Addr;

    #[test]
    fn parse_minimal() {
        let record = SpfRecord::parse("v=spf1 -all").unwrap();
        assert_eq!(record.directives.len(), 1);
        assert_eq!(record.directives[0].qualifier, Qualifier::Fail);
        assert_eq!(record.directives[0].mechanism, Mechanism::All);
    }

    #[test]
    fn parse_bare_version() {
        let record = SpfRecord::parse("v=spf1").unwrap();
        assert!(record.directives.is_empty());
        assert!(record.redirect.is_none());
    }

    #[test]
    fn parse_preserves_order() {
        let record =
            SpfRecord::parse("v=spf1 ip4:192.0.2.0/24 a mx -all").unwrap();
        assert_eq!(record.directives.len(), 4);
        assert!(matches!(
            &record.directives[0].mechanism,
            Mechanism::Ip4 { addr, prefix_len: 24 } if *addr == Ipv4Addr::new(192, 0, 2, 0)
        ));
        assert!(matches!(&record.directives[1].mechanism, Mechanism::A { .. }));
        assert!(matches!(&record.directives[2].mechanism, Mechanism::Mx { .. }));
        assert_eq!(record.directives[3].mechanism, Mechanism::All);
    }

    #[test]
    fn parse_include() {
        let record = SpfRecord::parse("v=spf1 include:_spf.example.com -all").unwrap();
        assert!(matches!(
            &record.directives[0].mechanism,
            Mechanism::Include(domain) if domain == "_spf.example.com"
        ));
    }

    #[test]
    fn parse_redirect() {
        let record = SpfRecord::parse("v=spf1 redirect=_spf.example.com").unwrap();
        assert_eq!(record.redirect, Some("_spf.example.com".to_string()));
        assert!(record.directives.is_empty());
    }

    #[test]
    fn parse_duplicate_redirect_is_error() {
        let err = SpfRecord::parse("v=spf1 redirect=a.example redirect=b.example");
        assert!(matches!(err, Err(SpfParseError::DuplicateModifier(_))));
    }

    #[test]
    fn parse_exp() {
        let record = SpfRecord::parse("v=spf1 -all exp=explain.example.com").unwrap();
        assert_eq!(record.exp, Some("explain.example.com".to_string()));
    }

    #[test]
    fn parse_duplicate_exp_is_error() {
        let err = SpfRecord::parse("v=spf1 exp=a.example exp=b.example -all");
        assert!(matches!(err, Err(SpfParseError::DuplicateModifier(_))));
    }

    #[test]
    fn parse_unknown_modifier_ignored() {
        let record = SpfRecord::parse("v=spf1 moo=cow -all").unwrap();
        assert_eq!(record.directives.len(), 1);
    }

    #[test]
    fn parse_unknown_mechanism_is_error() {
        let err = SpfRecord::parse("v=spf1 unknownmech:foo -all");
        assert!(matches!(err, Err(SpfParseError::UnknownMechanism(_))));
    }

    #[test]
    fn parse_case_insensitive() {
        let record = SpfRecord::parse("V=SPF1 IP4:192.0.2.1 -ALL").unwrap();
        assert_eq!(record.directives.len(), 2);
    }

    #[test]
    fn parse_a_variants() {
        let record =
            SpfRecord::parse("v=spf1 a a:example.com a/24 a:example.com/24//64 -all").unwrap();
        assert_eq!(record.directives.len(), 5);
    }

    #[test]
    fn reject_wrong_version() {
        assert!(SpfRecord::parse("v=spf2 -all").is_err());
        assert!(SpfRecord::parse("spf1 -all").is_err());
        // "v=spf10" is not "v=spf1" + term
        assert!(SpfRecord::parse("v=spf10 -all").is_err());
    }

    #[test]
    fn is_spf_record_boundaries() {
        assert!(SpfRecord::is_spf_record("v=spf1"));
        assert!(SpfRecord::is_spf_record("v=spf1 -all"));
        assert!(SpfRecord::is_spf_record("V=SPF1 ~all"));
        assert!(!SpfRecord::is_spf_record("v=spf10 -all"));
        assert!(!SpfRecord::is_spf_record("google-site-verification=abc"));
    }

    #[test]
    fn parse_colon_in_modifier_value() {
        // macro-laden modifier values contain ':' after '='
        let record = SpfRecord::parse("v=spf1 exp=exp.%{d}.example.com -all").unwrap();
        assert_eq!(record.exp.as_deref(), Some("exp.%{d}.example.com"));
    }
}
