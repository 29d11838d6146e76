use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::descriptor::{MethodDescriptor, HTTP_RULE_OPTION};
use crate::error::PbmockError;

/// REST binding declared on an RPC method (`google.api.http`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HttpRule {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub get: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub put: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub post: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delete: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub patch: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_body: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub additional_bindings: Vec<HttpRule>,
}

impl HttpRule {
    /// `post: <template>, body: "*"`
    pub fn post(template: &str) -> Self {
        Self {
            post: Some(template.to_string()),
            body: Some("*".to_string()),
            ..Self::default()
        }
    }

    fn post_template(&self) -> Option<&str> {
        self.post.as_deref().filter(|p| !p.is_empty())
    }

    fn describe(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| format!("{self:?}"))
    }
}

/// The accepted binding shape: POST with the whole message as JSON body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostBinding {
    pub post: String,
}

/// Extract the HTTP rule from a method's options, defaulting to an empty rule.
pub fn get_rule(options: &Map<String, Value>) -> Result<HttpRule, PbmockError> {
    match options.get(HTTP_RULE_OPTION) {
        None | Some(Value::Null) => Ok(HttpRule::default()),
        Some(value) => serde_json::from_value(value.clone()).map_err(|_| {
            PbmockError::UnsupportedBinding {
                rule: value.to_string(),
            }
        }),
    }
}

pub fn parse_rule(rule: &HttpRule) -> Result<PostBinding, PbmockError> {
    let post = rule
        .post_template()
        .ok_or_else(|| PbmockError::UnsupportedBinding {
            rule: rule.describe(),
        })?;

    if let Some(body) = rule.body.as_deref() {
        if body != "*" {
            return Err(PbmockError::UnsupportedBodyMapping {
                rule: rule.describe(),
            });
        }
    }

    Ok(PostBinding {
        post: post.to_string(),
    })
}

pub fn method_binding(method: &MethodDescriptor) -> Result<PostBinding, PbmockError> {
    parse_rule(&get_rule(&method.options)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn options(rule: Value) -> Map<String, Value> {
        let mut map = Map::new();
        map.insert(HTTP_RULE_OPTION.to_string(), rule);
        map
    }

    #[test]
    fn get_rule_defaults_to_empty() {
        assert_eq!(get_rule(&Map::new()).unwrap(), HttpRule::default());
    }

    #[test]
    fn get_rule_reads_option() {
        let rule = get_rule(&options(json!({"post": "/v1/hello", "body": "*"}))).unwrap();
        assert_eq!(rule, HttpRule::post("/v1/hello"));
    }

    #[test]
    fn get_rule_reads_additional_bindings() {
        let rule = get_rule(&options(json!({
            "post": "/v1/hello",
            "additional_bindings": [{"get": "/v1/hello/{name}"}]
        })))
        .unwrap();
        assert_eq!(rule.additional_bindings.len(), 1);
        assert_eq!(rule.additional_bindings[0].get.as_deref(), Some("/v1/hello/{name}"));
    }

    #[test]
    fn get_rule_rejects_malformed_option() {
        let err = get_rule(&options(json!("post /v1/hello"))).unwrap_err();
        assert_eq!(err.code(), "unsupported_binding");
    }

    #[test]
    fn parse_rule_accepts_post_with_wildcard_body() {
        let rule = HttpRule::post("/x");
        assert_eq!(parse_rule(&rule).unwrap(), PostBinding { post: "/x".into() });
        // idempotent
        assert_eq!(parse_rule(&rule).unwrap(), parse_rule(&rule).unwrap());
    }

    #[test]
    fn parse_rule_accepts_post_without_body() {
        let rule = HttpRule {
            post: Some("/x".into()),
            ..HttpRule::default()
        };
        assert_eq!(parse_rule(&rule).unwrap().post, "/x");
    }

    #[test]
    fn parse_rule_rejects_missing_post() {
        for rule in [
            HttpRule::default(),
            HttpRule {
                get: Some("/x".into()),
                ..HttpRule::default()
            },
            HttpRule {
                post: Some(String::new()),
                body: Some("*".into()),
                ..HttpRule::default()
            },
        ] {
            let err = parse_rule(&rule).unwrap_err();
            assert!(
                matches!(err, PbmockError::UnsupportedBinding { .. }),
                "got: {err}"
            );
        }
    }

    #[test]
    fn parse_rule_rejects_partial_body() {
        let rule = HttpRule {
            post: Some("/x".into()),
            body: Some("payload".into()),
            ..HttpRule::default()
        };
        let err = parse_rule(&rule).unwrap_err();
        assert!(matches!(err, PbmockError::UnsupportedBodyMapping { .. }));
        assert!(err.to_string().contains("payload"));
    }
}
