use std::collections::BTreeMap;

/// Returns true iff `source` contains at least one complete `${...}` token.
#[must_use]
pub fn contains_placeholder(source: &str) -> bool {
    source
        .find("${")
        .and_then(|start| source.get(start.saturating_add(2)..))
        .is_some_and(|rest| rest.contains('}'))
}

/// Expands `${name}` tokens in `source` against `row`.
///
/// A name absent from `row` is emitted as the literal key text without
/// braces. A dangling `${` with no closing brace is passed through
/// verbatim. An empty `row` yields `source` unchanged.
#[must_use]
pub fn replace(source: &str, row: &BTreeMap<String, String>) -> String {
    if row.is_empty() {
        return source.to_owned();
    }

    let mut rest = source;
    let mut output = String::with_capacity(source.len());

    while let Some(start) = rest.find("${") {
        let (before, token_start) = rest.split_at(start);
        output.push_str(before);
        let after = match token_start.strip_prefix("${") {
            Some(after) => after,
            None => {
                rest = token_start;
                break;
            }
        };
        let Some(end) = after.find('}') else {
            // No closing brace, keep the tail verbatim.
            rest = token_start;
            break;
        };
        let (key, after_end) = after.split_at(end);
        match row.get(key) {
            Some(value) => output.push_str(value),
            None => output.push_str(key),
        }
        rest = after_end.strip_prefix('}').unwrap_or(after_end);
    }

    output.push_str(rest);
    output
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(key, value)| ((*key).to_owned(), (*value).to_owned()))
            .collect()
    }

    #[test]
    fn detects_placeholder() {
        assert!(contains_placeholder("Hello, ${name}"));
        assert!(contains_placeholder("${a}${b}"));
        assert!(!contains_placeholder("Hello, name"));
        assert!(!contains_placeholder("Hello, ${name"));
        assert!(!contains_placeholder("Hello, $name}"));
        assert!(!contains_placeholder(""));
    }

    #[test]
    fn replaces_known_key() {
        let vars = row(&[("name", "barrage")]);
        assert_eq!(replace("Hello, ${name}", &vars), "Hello, barrage");
    }

    #[test]
    fn replaces_multiple_tokens() {
        let vars = row(&[("a", "1"), ("b", "2")]);
        assert_eq!(replace("${a}+${b}=${a}${b}", &vars), "1+2=12");
    }

    #[test]
    fn missing_key_emits_key_text() {
        let vars = row(&[("name", "x")]);
        assert_eq!(replace("Hello, ${nope}", &vars), "Hello, nope");
    }

    #[test]
    fn dangling_token_passes_through() {
        let vars = row(&[("name", "x")]);
        assert_eq!(replace("Hello, ${name", &vars), "Hello, ${name");
    }

    #[test]
    fn empty_row_is_unchanged() {
        let vars = BTreeMap::new();
        assert_eq!(replace("Hello, ${name}", &vars), "Hello, ${name}");
    }

    #[test]
    fn replace_is_idempotent_for_plain_values() {
        let vars = row(&[("name", "plain"), ("id", "42")]);
        let once = replace("u=${name}&id=${id}&x=${missing}", &vars);
        let twice = replace(&once, &vars);
        assert_eq!(once, twice);
    }
}
