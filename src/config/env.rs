use std::collections::HashMap;

use crate::error::PbmockError;

use super::types::PbmockConfig;

/// Expand environment variable references in a string.
///
/// Supported syntaxes:
/// - `${VAR}` - replaced with the variable's value; error if unset
/// - `${VAR:-fallback}` - the variable's value, or `fallback` if unset or empty
///
/// A `$` not followed by `{` is kept as is.
pub fn expand_env_vars(input: &str) -> Result<String, PbmockError> {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch != '$' || chars.peek() != Some(&'{') {
            result.push(ch);
            continue;
        }
        chars.next();

        let mut expr = String::new();
        let mut closed = false;
        for c in chars.by_ref() {
            if c == '}' {
                closed = true;
                break;
            }
            expr.push(c);
        }
        if !closed {
            return Err(env_error(format!("Unclosed variable reference: ${{{expr}")));
        }

        match expr.split_once(":-") {
            Some((name, fallback)) => match std::env::var(name) {
                Ok(val) if !val.is_empty() => result.push_str(&val),
                _ => result.push_str(fallback),
            },
            None => {
                let val = std::env::var(&expr).map_err(|_| {
                    env_error(format!("Environment variable '{expr}' is not set"))
                })?;
                result.push_str(&val);
            }
        }
    }

    Ok(result)
}

fn expand_opt(value: &mut Option<String>) -> Result<(), PbmockError> {
    if let Some(v) = value {
        *v = expand_env_vars(v)?;
    }
    Ok(())
}

/// Expand environment variables in every string setting.
pub fn expand_config(config: &mut PbmockConfig) -> Result<(), PbmockError> {
    for schema in &mut config.schemas {
        *schema = expand_env_vars(schema)?;
    }

    let mock = &mut config.mock;
    expand_opt(&mut mock.dir)?;
    expand_opt(&mut mock.host)?;
    expand_opt(&mut mock.prefix)?;
    expand_opt(&mut mock.file_suffix)?;

    expand_opt(&mut config.call.base_url)?;
    config.call.headers = config
        .call
        .headers
        .iter()
        .map(|(k, v)| Ok((k.clone(), expand_env_vars(v)?)))
        .collect::<Result<HashMap<_, _>, PbmockError>>()?;
    Ok(())
}

fn env_error(detail: String) -> PbmockError {
    PbmockError::ConfigError {
        path: std::path::PathBuf::from("<env>"),
        detail,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expand_dollar_brace_var() {
        std::env::set_var("PBMOCK_TEST_VAR1", "hello");
        let result = expand_env_vars("prefix-${PBMOCK_TEST_VAR1}-suffix").unwrap();
        assert_eq!(result, "prefix-hello-suffix");
        std::env::remove_var("PBMOCK_TEST_VAR1");
    }

    #[test]
    fn expand_unset_errors() {
        std::env::remove_var("PBMOCK_TEST_UNSET_XYZ");
        let err = expand_env_vars("${PBMOCK_TEST_UNSET_XYZ}").unwrap_err();
        assert_eq!(err.code(), "config_error");
        assert!(err.to_string().contains("PBMOCK_TEST_UNSET_XYZ"));
        assert!(err.to_string().contains("not set"));
    }

    #[test]
    fn expand_fallback_when_unset_or_empty() {
        std::env::remove_var("PBMOCK_TEST_FB_UNSET");
        assert_eq!(
            expand_env_vars("${PBMOCK_TEST_FB_UNSET:-8080}").unwrap(),
            "8080"
        );
        std::env::set_var("PBMOCK_TEST_FB_EMPTY", "");
        assert_eq!(
            expand_env_vars("${PBMOCK_TEST_FB_EMPTY:-fallback}").unwrap(),
            "fallback"
        );
        std::env::remove_var("PBMOCK_TEST_FB_EMPTY");
    }

    #[test]
    fn expand_fallback_when_set() {
        std::env::set_var("PBMOCK_TEST_FB_SET", "real");
        let result = expand_env_vars("${PBMOCK_TEST_FB_SET:-default_val}").unwrap();
        assert_eq!(result, "real");
        std::env::remove_var("PBMOCK_TEST_FB_SET");
    }

    #[test]
    fn unclosed_reference_errors() {
        let err = expand_env_vars("${OOPS").unwrap_err();
        assert!(err.to_string().contains("Unclosed"));
    }

    #[test]
    fn lone_dollar_is_literal() {
        assert_eq!(expand_env_vars("cost: $5").unwrap(), "cost: $5");
    }

    #[test]
    fn expand_config_expands_string_settings() {
        std::env::set_var("PBMOCK_TEST_CFG_DIR", "/srv/mocks");
        std::env::set_var("PBMOCK_TEST_CFG_TOKEN", "tok");

        let mut cfg: PbmockConfig = serde_json::from_str(
            r#"{
                "schemas": ["${PBMOCK_TEST_CFG_DIR}/schema.json"],
                "mock": {"dir": "${PBMOCK_TEST_CFG_DIR}", "prefix": "${PBMOCK_TEST_CFG_NOPE:-/api}"},
                "call": {"headers": {"Authorization": "Bearer ${PBMOCK_TEST_CFG_TOKEN}"}}
            }"#,
        )
        .unwrap();
        expand_config(&mut cfg).unwrap();

        assert_eq!(cfg.schemas, vec!["/srv/mocks/schema.json"]);
        assert_eq!(cfg.mock.dir.as_deref(), Some("/srv/mocks"));
        assert_eq!(cfg.mock.prefix.as_deref(), Some("/api"));
        assert_eq!(cfg.call.headers.get("Authorization").unwrap(), "Bearer tok");

        std::env::remove_var("PBMOCK_TEST_CFG_DIR");
        std::env::remove_var("PBMOCK_TEST_CFG_TOKEN");
    }
}
