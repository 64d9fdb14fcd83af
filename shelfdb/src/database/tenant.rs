//! Per-tenant resource naming for the document store

use sha2::{Digest, Sha256};

/// Longest collection name produced; well under the server's namespace limit
const MAX_COLLECTION_NAME_LEN: usize = 120;

/// Hex digits of the tenant fingerprint
const FINGERPRINT_LEN: usize = 16;

/// Derive the collection name for `tenant_id`
///
/// Falls back to `base` when no tenant is available. Characters outside
/// `[A-Za-z0-9_-]` are replaced with `_`, so `$` and `.` can never reach the
/// server's namespace. Whenever the id had to be rewritten or cut, or could
/// be mistaken for a rewritten one, a fingerprint of the raw id is appended
/// so distinct tenants never share a collection.
pub fn collection_name(base: &str, tenant_id: Option<&str>) -> String {
    let tenant = match tenant_id {
        Some(t) if !t.trim().is_empty() => t,
        _ => return base.to_string(),
    };

    let sanitized: String = tenant
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect();

    let mut name = format!("{}_{}", base, sanitized);
    let rewritten = sanitized != tenant;
    if !rewritten && name.len() <= MAX_COLLECTION_NAME_LEN && !has_fingerprint_suffix(&name) {
        return name;
    }

    // Only ASCII remains after sanitizing, so byte truncation is safe
    name.truncate(MAX_COLLECTION_NAME_LEN - FINGERPRINT_LEN - 1);
    name.push('_');
    name.push_str(&fingerprint(tenant));
    name
}

fn fingerprint(tenant: &str) -> String {
    let digest = Sha256::digest(tenant.as_bytes());
    digest[..FINGERPRINT_LEN / 2]
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect()
}

/// Whether `name` ends like a fingerprinted name
fn has_fingerprint_suffix(name: &str) -> bool {
    let Some((_, suffix)) = name.rsplit_once('_') else {
        return false;
    };
    suffix.len() == FINGERPRINT_LEN
        && suffix
            .bytes()
            .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_falls_back_to_base() {
        assert_eq!(collection_name("products", None), "products");
        assert_eq!(collection_name("products", Some("")), "products");
        assert_eq!(collection_name("products", Some("   ")), "products");
    }

    #[test]
    fn test_suffixes_tenant() {
        assert_eq!(collection_name("products", Some("42")), "products_42");
        assert_eq!(
            collection_name("transactions", Some("user-7f3a")),
            "transactions_user-7f3a"
        );
    }

    #[test]
    fn test_deterministic_and_sanitized() {
        let a = collection_name("settings", Some("jane.doe@example.com"));
        let b = collection_name("settings", Some("jane.doe@example.com"));
        assert_eq!(a, b);
        assert!(a.starts_with("settings_jane_doe_example_com_"));
        assert_eq!(a.len(), "settings_jane_doe_example_com_".len() + FINGERPRINT_LEN);
        assert!(!collection_name("products", Some("$where")).contains('$'));
    }

    #[test]
    fn test_distinct_tenants_get_distinct_names() {
        let dotted = collection_name("products", Some("jane.doe"));
        let plain = collection_name("products", Some("jane_doe"));
        assert_eq!(plain, "products_jane_doe");
        assert_ne!(dotted, plain);

        assert_ne!(
            collection_name("products", Some(" a")),
            collection_name("products", Some("a"))
        );

        // A clean id shaped like a fingerprinted name cannot claim its slot
        let forged_id = dotted.trim_start_matches("products_");
        assert_ne!(collection_name("products", Some(forged_id)), dotted);
    }

    #[test]
    fn test_caps_length_without_collisions() {
        let long_a = format!("{}a", "x".repeat(499));
        let long_b = format!("{}b", "x".repeat(499));
        let a = collection_name("products", Some(&long_a));
        let b = collection_name("products", Some(&long_b));
        assert_eq!(a.len(), MAX_COLLECTION_NAME_LEN);
        assert_eq!(b.len(), MAX_COLLECTION_NAME_LEN);
        assert_ne!(a, b);
    }
}
