//! Turns raw input text into a [`Query`].

use kestrel_types::{Query, WILDCARD_ACTION_KEYWORD};
use std::collections::BTreeSet;

/// Parse `raw_text` against the set of registered action keywords.
///
/// The first whitespace-delimited token is adopted as the action keyword when
/// it equals a registered keyword exactly; `"abc"` never matches `"ab"`.
/// Otherwise the whole input (trimmed at both ends) becomes the search text.
/// Pure: the same input and keyword set always give the same query.
#[must_use]
pub fn parse(raw_text: &str, known_keywords: &BTreeSet<String>) -> Query {
    let text = raw_text.trim();

    let (token, rest) = match text.find(char::is_whitespace) {
        Some(idx) => (&text[..idx], &text[idx..]),
        None => (text, ""),
    };

    if !token.is_empty() && token != WILDCARD_ACTION_KEYWORD && known_keywords.contains(token) {
        return Query {
            raw_text: raw_text.to_string(),
            action_keyword: token.to_string(),
            search: rest.trim().to_string(),
        };
    }

    Query {
        raw_text: raw_text.to_string(),
        action_keyword: String::new(),
        search: text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn keywords(list: &[&str]) -> BTreeSet<String> {
        list.iter().map(|k| (*k).to_string()).collect()
    }

    #[test]
    fn test_keyword_adopted() {
        let query = parse("> calc 2+2", &keywords(&[">", "f"]));
        assert_eq!(query.action_keyword, ">");
        assert_eq!(query.search, "calc 2+2");
        assert_eq!(query.raw_text, "> calc 2+2");
    }

    #[test]
    fn test_no_keyword_match() {
        let query = parse("  report  draft ", &keywords(&[">"]));
        assert_eq!(query.action_keyword, "");
        assert_eq!(query.search, "report  draft");
        assert_eq!(query.raw_text, "  report  draft ");
    }

    #[test]
    fn test_keyword_is_exact_token() {
        let query = parse("abc def", &keywords(&["ab"]));
        assert_eq!(query.action_keyword, "");
        assert_eq!(query.search, "abc def");
    }

    #[test]
    fn test_keyword_glued_to_search_does_not_match() {
        let query = parse(">calc", &keywords(&[">"]));
        assert_eq!(query.action_keyword, "");
        assert_eq!(query.search, ">calc");
    }

    #[test]
    fn test_whitespace_run_after_keyword_collapses() {
        let query = parse("f \t   my   notes", &keywords(&["f"]));
        assert_eq!(query.action_keyword, "f");
        assert_eq!(query.search, "my   notes");
    }

    #[test]
    fn test_keyword_alone() {
        let query = parse(">", &keywords(&[">"]));
        assert_eq!(query.action_keyword, ">");
        assert_eq!(query.search, "");
    }

    #[test]
    fn test_empty_input() {
        let query = parse("", &keywords(&[">"]));
        assert_eq!(query, Query::default());
        let blank = parse("   ", &keywords(&[">"]));
        assert_eq!(blank.action_keyword, "");
        assert_eq!(blank.search, "");
    }

    #[test]
    fn test_wildcard_never_matches() {
        let query = parse("* anything", &keywords(&["*"]));
        assert_eq!(query.action_keyword, "");
        assert_eq!(query.search, "* anything");
    }

    #[test]
    fn test_unregistered_keyword_stays_in_search() {
        let query = parse("g rust async", &keywords(&["f"]));
        assert_eq!(query.action_keyword, "");
        assert_eq!(query.search, "g rust async");
    }

    proptest! {
        #[test]
        fn parse_is_deterministic(
            raw in ".{0,40}",
            kws in prop::collection::btree_set("[a-z>=!]{1,3}", 0..4),
        ) {
            prop_assert_eq!(parse(&raw, &kws), parse(&raw, &kws));
        }

        #[test]
        fn matched_keyword_is_registered_first_token(
            raw in "[a-z> ]{0,20}",
            kws in prop::collection::btree_set("[a-z>]{1,2}", 0..4),
        ) {
            let query = parse(&raw, &kws);
            if query.is_keyword_scoped() {
                prop_assert!(kws.contains(&query.action_keyword));
                prop_assert_eq!(raw.split_whitespace().next(), Some(query.action_keyword.as_str()));
            } else {
                prop_assert_eq!(query.search.as_str(), raw.trim());
            }
        }
    }
}
