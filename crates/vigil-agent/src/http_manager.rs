//! The `HttpManager` trait boundary (§1, §4.7 step h).
//!
//! Policy evaluation — rules, triggers, and access-control decisions — is
//! an external collaborator the inspection loop calls into; this module
//! only names the seam. A production deployment wires a real
//! implementation (local intelligence, a remote policy engine, whatever
//! the access-control layer ends up being) behind this trait object; this
//! crate ships a conservative default alongside it for tests and for a
//! standalone agent with no policy engine attached.

use async_trait::async_trait;

use vigil_common::SessionId;
use vigil_protocol::{CompressionType, HeaderList, HttpBody, TransactionMetadata, Verdict};

/// The typed value a given chunk kind carries into policy evaluation.
#[derive(Debug, Clone)]
pub enum InspectionPayload {
    RequestStart(TransactionMetadata),
    Headers(HeaderList),
    Body(HttpBody),
    ResponseCode {
        status: u16,
        content_encoding: CompressionType,
    },
    ContentLength(u64),
    End,
}

/// Everything `HttpManager::inspect` needs about the chunk under
/// evaluation, independent of how it arrived (ring frame vs. a delayed
/// `HoldData` replay).
#[derive(Debug, Clone)]
pub struct InspectionInput {
    pub session_id: SessionId,
    pub is_request: bool,
    pub tenant_id: String,
    pub profile_id: String,
    pub payload: InspectionPayload,
}

/// Policy evaluation interface consumed, not implemented, by the core
/// (§1). `inspect` is called once per dispatched chunk (§4.7 step h);
/// `inspect_delayed_verdict` resolves a chunk the policy layer previously
/// asked to hold (`Wait`, or explicit `HoldData`, §4.7).
#[async_trait]
pub trait HttpManager: Send + Sync {
    async fn inspect(&self, input: InspectionInput) -> Verdict;

    async fn inspect_delayed_verdict(&self, input: InspectionInput) -> Verdict;
}

/// A fail-open-by-default manager that always accepts. Useful as the
/// out-of-the-box policy when no real engine is configured, and as the
/// inspection loop's test double.
pub struct AlwaysAcceptManager;

#[async_trait]
impl HttpManager for AlwaysAcceptManager {
    async fn inspect(&self, _input: InspectionInput) -> Verdict {
        Verdict::Accept
    }

    async fn inspect_delayed_verdict(&self, _input: InspectionInput) -> Verdict {
        Verdict::Accept
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn always_accept_manager_accepts_every_payload() {
        let manager = AlwaysAcceptManager;
        let input = InspectionInput {
            session_id: SessionId(1),
            is_request: true,
            tenant_id: String::new(),
            profile_id: String::new(),
            payload: InspectionPayload::End,
        };
        assert_eq!(manager.inspect(input.clone()).await, Verdict::Accept);
        assert_eq!(manager.inspect_delayed_verdict(input).await, Verdict::Accept);
    }
}
