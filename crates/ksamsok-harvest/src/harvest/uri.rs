//! Namespace URI normalization
//!
//! Sources have published payloads with misspelled vocabulary namespaces and
//! doubled path segments for years. Every namespace URI that passes through
//! payload re-serialization is rewritten here before it is written out:
//! first the fixed correction table, then the legacy prefix lookup.
//!
//! Only namespace URIs are rewritten. Local names and text content are never
//! touched.

const KSAMSOK_BASE: &str = "http://kulturarvsdata.se/";

/// Known-bad substrings and their canonical replacements, applied in order.
///
/// No replacement contains any of the keys (`aukt` does not contain `aut`).
const CORRECTIONS: &[(&str, &str)] = &[
    (
        "http://kulturarvsdata.se/resurser/aut",
        "http://kulturarvsdata.se/resurser/aukt",
    ),
    (
        "http://kulturarvsdata.se/resurser/aukt/geo/continent/continent",
        "http://kulturarvsdata.se/resurser/aukt/geo/continent",
    ),
    (
        "http://kulturarvsdata.se/resurser/aukt/geo/country/country",
        "http://kulturarvsdata.se/resurser/aukt/geo/country",
    ),
    (
        "http://kulturarvsdata.se/resurser/aukt/geo/county/county",
        "http://kulturarvsdata.se/resurser/aukt/geo/county",
    ),
    (
        "http://kulturarvsdata.se/resurser/aukt/geo/municipality/municipality",
        "http://kulturarvsdata.se/resurser/aukt/geo/municipality",
    ),
    (
        "http://kulturarvsdata.se/resurser/aukt/geo/parish/parish",
        "http://kulturarvsdata.se/resurser/aukt/geo/parish",
    ),
    (
        "http://kulturarvsdata.se/resurser/aukt/geo/province/province",
        "http://kulturarvsdata.se/resurser/aukt/geo/province",
    ),
    (
        "http://kulturarvsdata.se/resurser/contextsupertype/contextsupertype",
        "http://kulturarvsdata.se/resurser/contextsupertype",
    ),
    (
        "http://kulturarvsdata.se/resurser/contexttyp/contexttype",
        "http://kulturarvsdata.se/resurser/contexttype",
    ),
    (
        "http://kulturarvsdata.se/resurser/contexttype/contexttype",
        "http://kulturarvsdata.se/resurser/contexttype",
    ),
    (
        "http://kulturarvsdata.se/resurser/dataquality/dataquality",
        "http://kulturarvsdata.se/resurser/dataquality",
    ),
    (
        "http://kulturarvsdata.se/resurser/entitysupertype/entitysupertype",
        "http://kulturarvsdata.se/resurser/entitysupertype",
    ),
    (
        "http://kulturarvsdata.se/resurser/entitytype/entitytype",
        "http://kulturarvsdata.se/resurser/entitytype",
    ),
    (
        "http://kulturarvsdata.se/resurser/license/license",
        "http://kulturarvsdata.se/resurser/license",
    ),
    (
        "http://kulturarvsdata.se/resurser/subject/subject",
        "http://kulturarvsdata.se/resurser/subject",
    ),
    (
        "http://kulturarvsdata.se/resurser/theme/theme",
        "http://kulturarvsdata.se/resurser/theme",
    ),
    (
        "http://kulturarvsdata.se/resurser/title/title",
        "http://kulturarvsdata.se/resurser/title",
    ),
];

/// Legacy host spellings rewritten to the canonical base
const DEFAULT_PREFIXES: &[(&str, &str)] = &[
    ("https://kulturarvsdata.se/", KSAMSOK_BASE),
    ("http://www.kulturarvsdata.se/", KSAMSOK_BASE),
];

/// Rewrites namespace URIs to their canonical form.
///
/// Stateless once built; a single instance is shared by every record of a run.
#[derive(Debug, Clone)]
pub struct UriNormalizer {
    prefixes: Vec<(String, String)>,
}

impl Default for UriNormalizer {
    fn default() -> Self {
        Self {
            prefixes: DEFAULT_PREFIXES
                .iter()
                .map(|(from, to)| (from.to_string(), to.to_string()))
                .collect(),
        }
    }
}

impl UriNormalizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a legacy prefix mapping, consulted after the built-in ones.
    pub fn with_prefix(mut self, legacy: impl Into<String>, canonical: impl Into<String>) -> Self {
        self.prefixes.push((legacy.into(), canonical.into()));
        self
    }

    /// Rewrite `uri` to canonical form.
    ///
    /// The correction table and the prefix lookup are applied in that order
    /// until the URI stops changing, so nested doubled segments and typos
    /// behind a legacy prefix are fixed in one call.
    pub fn normalize(&self, uri: &str) -> String {
        let mut current = uri.to_string();
        for _ in 0..MAX_PASSES {
            let next = self.lookup_prefix(correct_faulty(&current));
            if next == current {
                break;
            }
            current = next;
        }
        current
    }

    fn lookup_prefix(&self, uri: String) -> String {
        match self
            .prefixes
            .iter()
            .find(|(legacy, _)| uri.starts_with(legacy.as_str()))
        {
            Some((legacy, canonical)) => format!("{}{}", canonical, &uri[legacy.len()..]),
            None => uri,
        }
    }
}

/// Upper bound on normalization passes; a misconfigured custom prefix that
/// maps onto another legacy prefix must not spin forever.
const MAX_PASSES: usize = 8;

fn correct_faulty(uri: &str) -> String {
    CORRECTIONS
        .iter()
        .fold(uri.to_string(), |acc, (bad, good)| {
            if acc.contains(bad) {
                acc.replace(bad, good)
            } else {
                acc
            }
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_misspelled_authority_namespace() {
        let normalizer = UriNormalizer::new();
        assert_eq!(
            normalizer.normalize("http://kulturarvsdata.se/resurser/aut/foo"),
            "http://kulturarvsdata.se/resurser/aukt/foo"
        );
        assert_eq!(
            normalizer.normalize("http://kulturarvsdata.se/resurser/aukt/foo"),
            "http://kulturarvsdata.se/resurser/aukt/foo"
        );
    }

    #[test]
    fn test_doubled_segments_collapse() {
        let normalizer = UriNormalizer::new();
        assert_eq!(
            normalizer.normalize("http://kulturarvsdata.se/resurser/aut/geo/county/county#"),
            "http://kulturarvsdata.se/resurser/aukt/geo/county#"
        );
        assert_eq!(
            normalizer.normalize("http://kulturarvsdata.se/resurser/contexttyp/contexttype#"),
            "http://kulturarvsdata.se/resurser/contexttype#"
        );
        assert_eq!(
            normalizer.normalize("http://kulturarvsdata.se/resurser/theme/theme"),
            "http://kulturarvsdata.se/resurser/theme"
        );
    }

    #[test]
    fn test_prefix_lookup_only_rewrites_leading_prefix() {
        let normalizer = UriNormalizer::new();
        assert_eq!(
            normalizer.normalize("https://kulturarvsdata.se/ksamsok#"),
            "http://kulturarvsdata.se/ksamsok#"
        );
        assert_eq!(
            normalizer.normalize("http://www.kulturarvsdata.se/resurser/subject/subject"),
            "http://kulturarvsdata.se/resurser/subject"
        );
        assert_eq!(
            normalizer.normalize("urn:x:https://kulturarvsdata.se/"),
            "urn:x:https://kulturarvsdata.se/"
        );
    }

    #[test]
    fn test_unrelated_uris_untouched() {
        let normalizer = UriNormalizer::new();
        for uri in [
            "http://www.w3.org/1999/02/22-rdf-syntax-ns#",
            "http://www.openarchives.org/OAI/2.0/",
            "",
        ] {
            assert_eq!(normalizer.normalize(uri), uri);
        }
    }

    #[test]
    fn test_nested_doubles_and_hidden_typos_fixed_in_one_call() {
        let normalizer = UriNormalizer::new();
        assert_eq!(
            normalizer.normalize("http://kulturarvsdata.se/resurser/aukt/geo/county/county/county"),
            "http://kulturarvsdata.se/resurser/aukt/geo/county"
        );
        assert_eq!(
            normalizer.normalize("https://kulturarvsdata.se/resurser/aut/geo/parish/parish"),
            "http://kulturarvsdata.se/resurser/aukt/geo/parish"
        );
    }

    #[test]
    fn test_custom_prefix() {
        let normalizer = UriNormalizer::new().with_prefix("http://old.example/", "http://new.example/");
        assert_eq!(normalizer.normalize("http://old.example/ns#"), "http://new.example/ns#");
        // built-in entries still win
        assert_eq!(
            normalizer.normalize("https://kulturarvsdata.se/x"),
            "http://kulturarvsdata.se/x"
        );
    }

    fn known_bad() -> impl Strategy<Value = &'static str> {
        proptest::sample::select(CORRECTIONS.iter().map(|(bad, _)| *bad).collect::<Vec<_>>())
    }

    proptest! {
        #[test]
        fn prop_normalize_is_idempotent_and_removes_typos(
            head in "[a-z:/#]{0,12}",
            bad in known_bad(),
            tail in "[a-z#/]{0,12}",
        ) {
            let normalizer = UriNormalizer::new();
            let uri = format!("{}{}{}", head, bad, tail);
            let once = normalizer.normalize(&uri);
            let twice = normalizer.normalize(&once);
            prop_assert_eq!(&once, &twice);

            for (bad, _) in CORRECTIONS {
                prop_assert!(!once.contains(bad), "{} left in {}", bad, once);
            }
        }
    }
}
