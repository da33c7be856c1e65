//! Percent-decoded query string parsing.
//!
//! `application/x-www-form-urlencoded`-style decoding: `+` becomes a space,
//! `%XX` escapes are decoded, and both are applied to keys and values. A
//! malformed escape sequence never rejects the request — it degrades to the
//! raw bytes for that component (via [`percent_encoding`]'s lossy decode)
//! since query string cosmetics are not framing-level failures.
//!
//! Parameter names are unique: inserting an already-present key overwrites
//! its value in place rather than appending a second pair.

use percent_encoding::percent_decode_str;

/// The decoded `key=value` pairs from a request's query string. Keys are
/// unique and keep the position of their first occurrence; a repeated key
/// overwrites the stored value (last value wins).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryMap {
    pairs: Vec<(String, String)>,
}

impl QueryMap {
    /// Parses a raw query string (without the leading `?`). An empty string
    /// yields an empty map rather than one pair with an empty key.
    pub(crate) fn parse(raw: &str) -> Self {
        let mut map = Self::default();
        if raw.is_empty() {
            return map;
        }

        for segment in raw.split('&').filter(|segment| !segment.is_empty()) {
            let (key, value) = match segment.split_once('=') {
                Some((key, value)) => (decode_component(key), decode_component(value)),
                None => (decode_component(segment), String::new()),
            };
            map.insert(key, value);
        }

        map
    }

    fn insert(&mut self, key: String, value: String) {
        match self.pairs.iter_mut().find(|(k, _)| *k == key) {
            Some((_, existing)) => *existing = value,
            None => self.pairs.push((key, value)),
        }
    }

    /// The value stored under `key`, if present.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.pairs
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Iterates all decoded pairs in first-occurrence order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.pairs.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Whether the query string contained no pairs at all.
    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }
}

fn decode_component(raw: &str) -> String {
    let plus_decoded = raw.replace('+', " ");
    percent_decode_str(&plus_decoded).decode_utf8_lossy().into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_query_yields_empty_map() {
        assert!(QueryMap::parse("").is_empty());
    }

    #[test]
    fn plain_pairs_round_trip() {
        let q = QueryMap::parse("sort=name&debug");
        assert_eq!(q.get("sort"), Some("name"));
        assert_eq!(q.get("debug"), Some(""));
        assert_eq!(q.get("missing"), None);
    }

    #[test]
    fn plus_decodes_to_space() {
        let q = QueryMap::parse("q=hello+world");
        assert_eq!(q.get("q"), Some("hello world"));
    }

    #[test]
    fn percent_escapes_decode_on_key_and_value() {
        let q = QueryMap::parse("na%6de=val%75e");
        assert_eq!(q.get("name"), Some("value"));
    }

    #[test]
    fn malformed_escape_falls_back_without_rejecting() {
        let q = QueryMap::parse("broken=100%zz");
        assert_eq!(q.get("broken"), Some("100%zz"));
    }

    #[test]
    fn duplicate_keys_keep_last_value_only() {
        let q = QueryMap::parse("tag=a&tag=b");
        assert_eq!(q.get("tag"), Some("b"));
        assert_eq!(q.iter().collect::<Vec<_>>(), vec![("tag", "b")]);
    }

    #[test]
    fn iteration_preserves_first_occurrence_order() {
        let q = QueryMap::parse("a=1&b=2&a=3");
        assert_eq!(
            q.iter().collect::<Vec<_>>(),
            vec![("a", "3"), ("b", "2")]
        );
    }
}
