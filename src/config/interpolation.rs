// Copyright 2026 The Ferry Project
// SPDX-License-Identifier: Apache-2.0

use super::error::ConfigError;

/// Expand `${VAR}` and `${VAR:-fallback}` references from the environment.
///
/// A bare `${VAR}` that is not set is an error; with a `:-` fallback the
/// fallback text is used instead. Unterminated references are kept literally.
pub fn resolve_variables(input: &str) -> Result<String, ConfigError> {
    resolve_with(input, |name| std::env::var(name).ok())
}

pub(crate) fn resolve_with(
    input: &str,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<String, ConfigError> {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];

        let Some(end) = after.find('}') else {
            out.push_str(&rest[start..]);
            return Ok(out);
        };

        let reference = &after[..end];
        let (name, fallback) = match reference.split_once(":-") {
            Some((name, fallback)) => (name, Some(fallback)),
            None => (reference, None),
        };

        if name.is_empty() {
            out.push_str(&rest[start..start + 2 + end + 1]);
        } else {
            match (lookup(name), fallback) {
                (Some(value), _) => out.push_str(&value),
                (None, Some(fallback)) => out.push_str(fallback),
                (None, None) => {
                    return Err(ConfigError::UndefinedVariable {
                        name: name.to_string(),
                    })
                }
            }
        }

        rest = &after[end + 1..];
    }

    out.push_str(rest);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env(name: &str) -> Option<String> {
        match name {
            "FERRY_ENDPOINT_ID" => Some("ep-123".to_string()),
            "EMPTY" => Some(String::new()),
            _ => None,
        }
    }

    #[test]
    fn plain_text_unchanged() {
        assert_eq!(resolve_with("https://a.example", env).unwrap(), "https://a.example");
    }

    #[test]
    fn variable_is_substituted() {
        assert_eq!(
            resolve_with("/endpoints/${FERRY_ENDPOINT_ID}/x", env).unwrap(),
            "/endpoints/ep-123/x"
        );
    }

    #[test]
    fn fallback_used_when_unset() {
        assert_eq!(resolve_with("${NOPE:-dev}", env).unwrap(), "dev");
    }

    #[test]
    fn set_but_empty_wins_over_fallback() {
        assert_eq!(resolve_with("[${EMPTY:-x}]", env).unwrap(), "[]");
    }

    #[test]
    fn undefined_variable_is_error() {
        let err = resolve_with("${NOPE}", env).unwrap_err();
        assert!(matches!(err, ConfigError::UndefinedVariable { name } if name == "NOPE"));
    }

    #[test]
    fn unterminated_reference_kept_literally() {
        assert_eq!(resolve_with("abc ${OPEN", env).unwrap(), "abc ${OPEN");
    }

    #[test]
    fn empty_reference_kept_literally() {
        assert_eq!(resolve_with("a${}b", env).unwrap(), "a${}b");
    }
}
