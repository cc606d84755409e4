use async_trait::async_trait;
use http::{Method, StatusCode};
use serde_json::json;

use super::{Property, PropertyContext, PropertyResult, ensure_sampled};
use crate::ConformalError;
use crate::http::{Request, Response};

const RFC_REFERENCE: &str = "RFC 7231 §4.2.2";

/// Replays a request and compares state and status against the first exchange.
///
/// The clone is rebuilt from the stored body bytes, so it is independently
/// consumable regardless of how the first request was sent.
async fn replay(
    ctx: &PropertyContext,
    request: &Request,
) -> Result<(Response, crate::state::StateDiff), ConformalError> {
    let before = ctx.capture().await?;
    let clone = request.clone();
    let second = ctx.probe(&clone).await?;
    let after = ctx.capture().await?;
    ensure_sampled(&before, &after)?;
    Ok((second, before.diff(&after)))
}

/// PUT applied twice must yield the same state and status as applied once.
#[derive(Debug, Clone, Default)]
pub struct PutIdempotencyProperty;

#[async_trait]
impl Property for PutIdempotencyProperty {
    fn name(&self) -> &str {
        "PUT Method Idempotency"
    }

    fn description(&self) -> &str {
        "Repeating a successful PUT must not change state or status"
    }

    fn rfc_reference(&self) -> Option<&str> {
        Some(RFC_REFERENCE)
    }

    async fn check(
        &self,
        ctx: &PropertyContext,
        request: &Request,
        response: &Response,
    ) -> Result<PropertyResult, ConformalError> {
        if request.method != Method::PUT || !response.is_success() {
            return Ok(PropertyResult::not_applicable());
        }

        let (second, diff) = replay(ctx, request).await?;
        if diff.has_changes() {
            return Ok(PropertyResult::fail_with_details(
                "second request caused additional state changes",
                diff.summary(),
            ));
        }
        if response.status != second.status {
            return Ok(PropertyResult::fail(format!(
                "different status codes on repeat: {} then {}",
                response.status.as_u16(),
                second.status.as_u16()
            )));
        }
        Ok(PropertyResult::pass()
            .with_metric("firstStatus", json!(response.status.as_u16()))
            .with_metric("secondStatus", json!(second.status.as_u16())))
    }
}

/// DELETE applied twice must converge: same status, or a success followed by 404.
#[derive(Debug, Clone, Default)]
pub struct DeleteIdempotencyProperty;

impl DeleteIdempotencyProperty {
    /// The status pairs accepted as idempotent DELETE behavior.
    fn accepts(first: StatusCode, second: StatusCode) -> bool {
        if first == second {
            return true;
        }
        let gone_after_success = matches!(first.as_u16(), 200 | 202 | 204)
            && second == StatusCode::NOT_FOUND;
        gone_after_success
    }
}

#[async_trait]
impl Property for DeleteIdempotencyProperty {
    fn name(&self) -> &str {
        "DELETE Method Idempotency"
    }

    fn description(&self) -> &str {
        "Repeating a DELETE must not change state beyond the first call"
    }

    fn rfc_reference(&self) -> Option<&str> {
        Some(RFC_REFERENCE)
    }

    async fn check(
        &self,
        ctx: &PropertyContext,
        request: &Request,
        response: &Response,
    ) -> Result<PropertyResult, ConformalError> {
        if request.method != Method::DELETE {
            return Ok(PropertyResult::not_applicable());
        }

        let (second, diff) = replay(ctx, request).await?;
        if diff.has_changes() {
            return Ok(PropertyResult::fail_with_details(
                "second request caused additional state changes",
                diff.summary(),
            ));
        }
        if !Self::accepts(response.status, second.status) {
            return Ok(PropertyResult::fail(format!(
                "non-idempotent status sequence: {} then {}",
                response.status.as_u16(),
                second.status.as_u16()
            )));
        }
        Ok(PropertyResult::pass()
            .with_metric("firstStatus", json!(response.status.as_u16()))
            .with_metric("secondStatus", json!(second.status.as_u16())))
    }
}
