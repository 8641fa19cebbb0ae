//! Prompt template expansion.
//!
//! Supports `{{PLACEHOLDER}}` syntax. Unknown placeholders are left as-is.

/// Expand `{{NAME}}` placeholders using `lookup`.
///
/// Each placeholder is resolved once; values are inserted verbatim and never
/// re-scanned, so a value containing `{{X}}` is not expanded again. Names
/// containing whitespace and unterminated `{{` are emitted literally.
#[must_use]
pub fn expand_template(template: &str, vars: &[(&str, &str)]) -> String {
    let mut result = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(open) = rest.find("{{") {
        result.push_str(&rest[..open]);
        let after_open = &rest[open + 2..];

        let Some(close) = after_open.find("}}") else {
            result.push_str(&rest[open..]);
            return result;
        };
        let name = &after_open[..close];

        if name.is_empty() || name.contains(char::is_whitespace) {
            result.push_str("{{");
            rest = after_open;
            continue;
        }

        match vars.iter().find(|(key, _)| *key == name) {
            Some((_, value)) => result.push_str(value),
            None => result.push_str(&rest[open..open + 2 + close + 2]),
        }
        rest = &after_open[close + 2..];
    }

    result.push_str(rest);
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_placeholders_returns_unchanged() {
        assert_eq!(expand_template("Hello world", &[]), "Hello world");
    }

    #[test]
    fn test_single_placeholder_expanded() {
        assert_eq!(
            expand_template("FILE: {{FILE_PATH}}", &[("FILE_PATH", "@src/main.rs")]),
            "FILE: @src/main.rs"
        );
    }

    #[test]
    fn test_same_placeholder_used_twice() {
        assert_eq!(expand_template("{{X}} and {{X}}", &[("X", "a")]), "a and a");
    }

    #[test]
    fn test_unknown_placeholder_left_as_is() {
        assert_eq!(expand_template("{{UNKNOWN}}", &[]), "{{UNKNOWN}}");
    }

    #[test]
    fn test_adjacent_placeholders() {
        assert_eq!(expand_template("{{A}}{{B}}", &[("A", "x"), ("B", "y")]), "xy");
    }

    #[test]
    fn test_unterminated_placeholder_kept() {
        assert_eq!(expand_template("start {{INCOMPLETE", &[]), "start {{INCOMPLETE");
    }

    #[test]
    fn test_whitespace_in_name_not_matched() {
        assert_eq!(expand_template("{{ QUERY }}", &[("QUERY", "q")]), "{{ QUERY }}");
    }

    #[test]
    fn test_values_are_not_rescanned() {
        let result = expand_template("{{QUERY}} / {{DIRECTORY}}", &[
            ("QUERY", "find {{DIRECTORY}}"),
            ("DIRECTORY", "src"),
        ]);
        assert_eq!(result, "find {{DIRECTORY}} / src");
    }

    #[test]
    fn test_multibyte_text_preserved() {
        assert_eq!(expand_template("→ {{A}} ✓", &[("A", "ü")]), "→ ü ✓");
    }
}
