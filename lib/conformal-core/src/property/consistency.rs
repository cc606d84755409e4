use std::collections::BTreeSet;

use async_trait::async_trait;
use http::header::{ALLOW, HeaderName};
use http::Method;

use super::{Property, PropertyContext, PropertyResult};
use crate::ConformalError;
use crate::http::{Request, Response};

/// Parses an `Allow` header value: comma-separated, whitespace-tolerant,
/// case-insensitive. Empty tokens are ignored.
pub(crate) fn parse_allow(value: &str) -> BTreeSet<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .map(str::to_uppercase)
        .collect()
}

/// HEAD must mirror GET: no body, same status, same headers.
#[derive(Debug, Clone, Default)]
pub struct HeadGetConsistencyProperty;

#[async_trait]
impl Property for HeadGetConsistencyProperty {
    fn name(&self) -> &str {
        "HEAD-GET Response Consistency"
    }

    fn description(&self) -> &str {
        "HEAD must return the same status and headers as GET, without a body"
    }

    fn rfc_reference(&self) -> Option<&str> {
        Some("RFC 7231 §4.3.2")
    }

    async fn check(
        &self,
        ctx: &PropertyContext,
        request: &Request,
        response: &Response,
    ) -> Result<PropertyResult, ConformalError> {
        if request.method != Method::HEAD {
            return Ok(PropertyResult::not_applicable());
        }

        if response.content_length().unwrap_or(0) > 0 || !response.body.is_empty() {
            return Ok(PropertyResult::fail(format!(
                "HEAD response carries a body ({} bytes, Content-Length {:?})",
                response.body.len(),
                response.content_length()
            )));
        }

        // Same URI, same request headers, but GET.
        let mut get_request = request.clone();
        get_request.method = Method::GET;
        let get_response = ctx.probe(&get_request).await?;

        if response.status != get_response.status {
            return Ok(PropertyResult::fail(format!(
                "status differs between HEAD ({}) and GET ({})",
                response.status.as_u16(),
                get_response.status.as_u16()
            )));
        }

        let mut names: Vec<HeaderName> = response.headers.keys().cloned().collect();
        for name in get_response.headers.keys() {
            if !names.contains(name) {
                names.push(name.clone());
            }
        }
        let differing: Vec<String> = names
            .into_iter()
            .filter_map(|name| {
                let head_value = response.header_joined(&name);
                let get_value = get_response.header_joined(&name);
                (head_value != get_value).then(|| {
                    format!(
                        "{name}: HEAD={} GET={}",
                        head_value.unwrap_or_else(|| "<absent>".to_string()),
                        get_value.unwrap_or_else(|| "<absent>".to_string())
                    )
                })
            })
            .collect();

        let result = if differing.is_empty() {
            PropertyResult::pass()
        } else {
            PropertyResult::fail_with_details(
                "headers differ between HEAD and GET",
                differing.join("; "),
            )
        };
        Ok(result)
    }
}

/// An OPTIONS response must advertise exactly the declared methods.
#[derive(Debug, Clone, Default)]
pub struct OptionsAllowProperty;

#[async_trait]
impl Property for OptionsAllowProperty {
    fn name(&self) -> &str {
        "OPTIONS Allow Header"
    }

    fn description(&self) -> &str {
        "OPTIONS must advertise the declared methods in its Allow header"
    }

    fn rfc_reference(&self) -> Option<&str> {
        Some("RFC 7231 §4.3.7")
    }

    async fn check(
        &self,
        ctx: &PropertyContext,
        request: &Request,
        response: &Response,
    ) -> Result<PropertyResult, ConformalError> {
        if request.method != Method::OPTIONS {
            return Ok(PropertyResult::not_applicable());
        }

        let mut required: BTreeSet<String> = ctx
            .catalog()
            .methods_for(&request.path)
            .iter()
            .map(|method| method.as_str().to_uppercase())
            .collect();
        required.insert(Method::OPTIONS.as_str().to_uppercase());

        let Some(allow) = response.header_joined(&ALLOW) else {
            return Ok(PropertyResult::fail("missing Allow header"));
        };
        let advertised = parse_allow(&allow);

        let missing: Vec<&String> = required.difference(&advertised).collect();
        let undeclared: Vec<&String> = advertised.difference(&required).collect();
        if missing.is_empty() && undeclared.is_empty() {
            return Ok(PropertyResult::pass());
        }

        let mut parts = Vec::new();
        if !missing.is_empty() {
            parts.push(format!("missing {missing:?}"));
        }
        if !undeclared.is_empty() {
            parts.push(format!("not declared {undeclared:?}"));
        }
        Ok(PropertyResult::fail_with_details(
            "Allow header does not match the declared methods",
            parts.join(", "),
        ))
    }
}

/// A 405 response must name the permitted methods in `Allow`.
///
/// Only the presence of the header is checked, not its content.
#[derive(Debug, Clone, Default)]
pub struct MethodNotAllowedAllowProperty;

#[async_trait]
impl Property for MethodNotAllowedAllowProperty {
    fn name(&self) -> &str {
        "405 Method Not Allowed Allow Header"
    }

    fn description(&self) -> &str {
        "A 405 response must carry an Allow header"
    }

    fn rfc_reference(&self) -> Option<&str> {
        Some("RFC 7231 §6.5.5")
    }

    async fn check(
        &self,
        _ctx: &PropertyContext,
        _request: &Request,
        response: &Response,
    ) -> Result<PropertyResult, ConformalError> {
        if response.status != http::StatusCode::METHOD_NOT_ALLOWED {
            return Ok(PropertyResult::not_applicable());
        }
        let result = if response.headers.contains_key(ALLOW) {
            PropertyResult::pass()
        } else {
            PropertyResult::fail("missing Allow header")
        };
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_parse_allow_lists_loosely() {
        let parsed = parse_allow("get, post ,  HEAD");
        let expected: BTreeSet<String> = ["GET", "POST", "HEAD"]
            .into_iter()
            .map(str::to_string)
            .collect();
        assert_eq!(parsed, expected);
    }

    #[test]
    fn should_ignore_empty_allow_tokens() {
        let parsed = parse_allow("get,,post,");
        assert_eq!(parsed.len(), 2);
    }

    #[test]
    fn should_expose_stable_identity() {
        assert_eq!(
            HeadGetConsistencyProperty.name(),
            "HEAD-GET Response Consistency"
        );
        assert_eq!(
            HeadGetConsistencyProperty.rfc_reference(),
            Some("RFC 7231 §4.3.2")
        );
        assert_eq!(OptionsAllowProperty.name(), "OPTIONS Allow Header");
        assert_eq!(
            OptionsAllowProperty.rfc_reference(),
            Some("RFC 7231 §4.3.7")
        );
        assert_eq!(
            MethodNotAllowedAllowProperty.name(),
            "405 Method Not Allowed Allow Header"
        );
        assert_eq!(
            MethodNotAllowedAllowProperty.rfc_reference(),
            Some("RFC 7231 §6.5.5")
        );
    }
}
