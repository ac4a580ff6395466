//! Key layout shared by every backend.
//!
//! Caller keys are opaque: each one is stored as `ENTRY_<key>`, so no
//! caller key can land on one of the three families holding the index:
//!
//! - `IDX_<real key>`: variants cached for a resource
//! - `SURROGATE_<tag>`: variants tagged with a surrogate key
//! - `VARIANT_<variant key>`: owner and tags of one variant
use crate::codec::Headers;

pub const ENTRY_PREFIX: &str = "ENTRY_";
pub const MAPPING_PREFIX: &str = "IDX_";
pub const SURROGATE_PREFIX: &str = "SURROGATE_";
pub const VARIANT_PREFIX: &str = "VARIANT_";

const SEPARATOR: char = '\u{1F}';

/// Backend slot of the caller key `key`.
pub fn entry_key(key: &str) -> String {
    format!("{ENTRY_PREFIX}{key}")
}

/// Caller key stored in the backend slot `slot`, `None` for index records.
pub fn user_key(slot: &str) -> Option<&str> {
    slot.strip_prefix(ENTRY_PREFIX)
}

pub fn mapping_key(real_key: &str) -> String {
    format!("{MAPPING_PREFIX}{real_key}")
}

pub fn surrogate_key(tag: &str) -> String {
    format!("{SURROGATE_PREFIX}{tag}")
}

pub fn variant_links_key(variant_key: &str) -> String {
    format!("{VARIANT_PREFIX}{variant_key}")
}

/// Derive a variant key from the resource key, the request headers the
/// response varies on and an optional label.
///
/// Header names are lowercased and sorted so the same negotiation always
/// lands on the same key whatever order the headers arrived in.
pub fn variant_key(real_key: &str, varied: &Headers, label: Option<&str>) -> String {
    let mut pairs: Vec<(String, &str)> = varied
        .iter()
        .map(|(n, v)| (n.to_ascii_lowercase(), v))
        .collect();
    pairs.sort();

    let mut key = real_key.to_string();
    for (name, value) in pairs {
        key.push(SEPARATOR);
        key.push_str(&name);
        key.push(':');
        key.push_str(value);
    }
    if let Some(label) = label.filter(|l| !l.is_empty()) {
        key.push(SEPARATOR);
        key.push_str(label);
    }
    key
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn caller_keys_never_meet_index_records() {
        let key = "IDX_GET-http-example.com-/";
        assert_ne!(entry_key(key), mapping_key("GET-http-example.com-/"));
        assert_eq!(user_key(&entry_key(key)), Some(key));

        assert_eq!(user_key(&mapping_key("res")), None);
        assert_eq!(user_key(&surrogate_key("products")), None);
        assert_eq!(user_key(&variant_links_key("v1")), None);
    }

    #[test]
    fn variant_key_ignores_header_order_and_case() {
        let a: Headers =
            [("Accept-Encoding", "gzip"), ("Accept", "text/html")].into_iter().collect();
        let b: Headers =
            [("accept", "text/html"), ("ACCEPT-ENCODING", "gzip")].into_iter().collect();

        assert_eq!(variant_key("res", &a, None), variant_key("res", &b, None));
    }

    #[test]
    fn variant_key_distinguishes_values_and_labels() {
        let gzip: Headers = [("Accept-Encoding", "gzip")].into_iter().collect();
        let br: Headers = [("Accept-Encoding", "br")].into_iter().collect();

        assert_ne!(variant_key("res", &gzip, None), variant_key("res", &br, None));
        assert_ne!(
            variant_key("res", &gzip, Some("v1")),
            variant_key("res", &gzip, Some("v2"))
        );
        assert_eq!(variant_key("res", &Headers::new(), Some("")), "res");
    }
}
