//! Domain-name helpers shared by the ingestion pipeline and the query engine.
//!
//! All names handled here are presentation-form FQDNs: lower-case ASCII,
//! dot-separated labels, terminated by a trailing dot. The record key
//! encoding and the wildcard/zone scans all rely on that normal form.

/// Normalize a name to a lower-case FQDN with a trailing dot.
pub fn to_lower_fqdn(name: &str) -> String {
    let lower = name.to_ascii_lowercase();
    if lower.ends_with('.') {
        lower
    } else {
        format!("{lower}.")
    }
}

/// Split an FQDN into its labels, ignoring the trailing root dot.
fn labels(fqdn: &str) -> Vec<&str> {
    fqdn.trim_end_matches('.')
        .split('.')
        .filter(|l| !l.is_empty())
        .collect()
}

/// An apex domain is a root domain without a subdomain, e.g. `example.com.`.
pub fn is_apex(fqdn: &str) -> bool {
    labels(fqdn).len() == 2
}

/// A subdomain carries at least one label below an apex, e.g. `www.example.com.`.
pub fn is_subdomain(fqdn: &str) -> bool {
    labels(fqdn).len() > 2
}

/// Whether the leftmost label of a name is the wildcard token `*`.
pub fn is_wildcard(fqdn: &str) -> bool {
    labels(fqdn).first() == Some(&"*")
}

/// The parent of a name: the name with its leftmost label stripped.
///
/// Returns `None` for the root and for single-label names.
pub fn parent(fqdn: &str) -> Option<String> {
    let labels = labels(fqdn);
    if labels.len() < 2 {
        return None;
    }
    Some(format!("{}.", labels[1..].join(".")))
}

/// The single-label wildcard form of a name: `x.example.com.` -> `*.example.com.`.
///
/// Wildcards match at one label depth only, so the form is derived from the
/// direct parent (RFC 1034 section 4.3.3).
pub fn wildcard_qname(fqdn: &str) -> Option<String> {
    parent(fqdn).map(|p| format!("*.{p}"))
}

/// Whether `fqdn` equals `zone` or lies under it, on label boundaries.
///
/// `a.rock.` is in `rock.` but `notrock.` is not.
pub fn is_in_zone(fqdn: &str, zone: &str) -> bool {
    fqdn == zone || fqdn.ends_with(&format!(".{zone}"))
}

/// Whether a name falls inside one of the configured authoritative zones.
pub fn is_local(fqdn: &str, zones: &[String]) -> bool {
    zones.iter().any(|zone| is_in_zone(fqdn, zone))
}

/// The configured zone a name belongs to, preferring the longest suffix.
pub fn zone_for<'a>(fqdn: &str, zones: &'a [String]) -> Option<&'a String> {
    zones
        .iter()
        .filter(|zone| is_in_zone(fqdn, zone))
        .max_by_key(|zone| zone.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_to_lower_fqdn() {
        assert_eq!(to_lower_fqdn("Foo.Example.COM"), "foo.example.com.");
        assert_eq!(to_lower_fqdn("foo.example.com."), "foo.example.com.");
    }

    #[test]
    fn test_apex_and_subdomain() {
        assert!(is_apex("example.com."));
        assert!(!is_apex("www.example.com."));
        assert!(!is_apex("com."));

        assert!(is_subdomain("www.example.com."));
        assert!(is_subdomain("a.b.example.com."));
        assert!(!is_subdomain("example.com."));
    }

    #[test]
    fn test_wildcard_form() {
        assert_eq!(
            wildcard_qname("x.rock.").as_deref(),
            Some("*.rock.")
        );
        assert_eq!(
            wildcard_qname("a.b.rock.").as_deref(),
            Some("*.b.rock.")
        );
        assert_eq!(wildcard_qname("rock."), None);
    }

    #[test]
    fn test_is_wildcard() {
        assert!(is_wildcard("*.rock."));
        assert!(!is_wildcard("a.rock."));
    }

    #[test]
    fn test_zone_membership_is_label_safe() {
        let zones = vec!["rock.".to_string(), "services.cloud.".to_string()];

        assert!(is_local("a.rock.", &zones));
        assert!(is_local("rock.", &zones));
        assert!(is_local("x.services.cloud.", &zones));
        assert!(!is_local("notrock.", &zones));
        assert!(!is_local("a.notrock.", &zones));
    }

    #[test]
    fn test_zone_for_prefers_longest_suffix() {
        let zones = vec!["cloud.".to_string(), "services.cloud.".to_string()];
        assert_eq!(
            zone_for("x.services.cloud.", &zones).map(String::as_str),
            Some("services.cloud.")
        );
        assert_eq!(
            zone_for("y.cloud.", &zones).map(String::as_str),
            Some("cloud.")
        );
        assert_eq!(zone_for("z.elsewhere.", &zones), None);
    }
}
