/// Normalize a domain: lowercase + strip trailing dot.
pub fn normalize(domain: &str) -> String {
    let d = domain.to_ascii_lowercase();
    d.strip_suffix('.').unwrap_or(&d).to_string()
}

/// Compare two domains after normalization.
pub fn domains_equal(a: &str, b: &str) -> bool {
    normalize(a) == normalize(b)
}

/// Check if `child` is a subdomain of `parent` (after normalization).
/// A domain is NOT a subdomain of itself.
pub fn is_subdomain_of(child: &str, parent: &str) -> bool {
    let nc = normalize(child);
    let np = normalize(parent);
    if nc == np {
        return false;
    }
    nc.ends_with(&format!(".{}", np))
}

/// Extract domain part from an email address (after `@`).
/// Returns None if no `@` is present.
pub fn domain_from_email(email: &str) -> Option<&str> {
    email.rsplit_once('@').map(|(_, domain)| domain)
}

/// Extract local part from an email address (before `@`).
/// Returns the entire string if no `@` is present.
pub fn local_part_from_email(email: &str) -> &str {
    match email.rsplit_once('@') {
        Some((local, _)) => local,
        None => email,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_lowercase_and_trailing_dot() {
        assert_eq!(normalize("Mail.EXAMPLE.COM."), "mail.example.com");
        assert_eq!(normalize("example.com"), "example.com");
    }

    #[test]
    fn domains_equal_case_and_dot_insensitive() {
        assert!(domains_equal("Example.COM.", "example.com"));
        assert!(!domains_equal("example.com", "example.org"));
    }

    #[test]
    fn subdomain_true() {
        assert!(is_subdomain_of("mail.example.com", "example.com"));
        assert!(is_subdomain_of("a.b.c.example.com", "example.com"));
    }

    #[test]
    fn subdomain_self_is_not_subdomain() {
        assert!(!is_subdomain_of("example.com", "example.com"));
    }

    #[test]
    fn subdomain_partial_label_no_match() {
        // "notexample.com" is NOT a subdomain of "example.com"
        assert!(!is_subdomain_of("notexample.com", "example.com"));
    }

    #[test]
    fn subdomain_case_insensitive() {
        assert!(is_subdomain_of("MAIL.Example.COM", "example.com"));
    }

    #[test]
    fn email_splitting() {
        assert_eq!(domain_from_email("user@example.com"), Some("example.com"));
        assert_eq!(domain_from_email("example.com"), None);
        assert_eq!(local_part_from_email("user@example.com"), "user");
        assert_eq!(local_part_from_email("noatsign"), "noatsign");
    }

    #[test]
    fn email_splitting_multiple_at() {
        // rsplit_once takes the last @
        assert_eq!(domain_from_email("user@host@example.com"), Some("example.com"));
    }
}
