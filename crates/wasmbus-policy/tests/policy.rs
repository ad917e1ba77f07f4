use core::time::Duration;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use wasmbus::{codec, lattice_request, Bus, Error, InprocBus};
use wasmbus_policy::*;

const SUBJECT: &str = "wasmcloud.policy";

/// Engine that allows everything except components it was told to reject.
struct TestEngine {
    rejected_component: String,
}

#[async_trait]
impl Api for TestEngine {
    async fn start_component(&self, req: StartComponentRequest) -> Result<Response, Error> {
        if req.request.component_id == self.rejected_component {
            return Ok(req.deny("component is blocked"));
        }
        Ok(req.allow(""))
    }

    async fn start_provider(&self, req: StartProviderRequest) -> Result<Response, Error> {
        Ok(req.allow(""))
    }

    async fn perform_invocation(&self, req: PerformInvocationRequest) -> Result<Response, Error> {
        Ok(req.deny("invocations are audited"))
    }
}

fn test_bus() -> Arc<dyn Bus> {
    Arc::new(InprocBus::new())
}

async fn start_engine(bus: &Arc<dyn Bus>) -> anyhow::Result<Server> {
    let server = Server::new(
        Arc::clone(bus),
        SUBJECT,
        Arc::new(TestEngine {
            rejected_component: "bad-apple".to_string(),
        }),
    );
    server.serve().await?;
    Ok(server)
}

#[tokio::test]
async fn start_component_is_dispatched_by_kind() -> anyhow::Result<()> {
    let bus = test_bus();
    let server = start_engine(&bus).await?;

    let req = StartComponentRequest {
        request_id: "X".to_string(),
        kind: KIND_START_COMPONENT.to_string(),
        version: "v1".to_string(),
        request: StartComponentPayload {
            component_id: "echo".to_string(),
            ..Default::default()
        },
        ..Default::default()
    };
    let resp: Response =
        lattice_request(bus.as_ref(), SUBJECT, &req, Duration::from_secs(1)).await?;
    assert_eq!(resp.request_id, "X");
    assert!(resp.permitted);

    server.drain().await?;
    Ok(())
}

#[tokio::test]
async fn each_kind_reaches_its_handler() -> anyhow::Result<()> {
    let bus = test_bus();
    let server = start_engine(&bus).await?;

    let deny = StartComponentRequest {
        request_id: "1".to_string(),
        kind: KIND_START_COMPONENT.to_string(),
        request: StartComponentPayload {
            component_id: "bad-apple".to_string(),
            ..Default::default()
        },
        ..Default::default()
    };
    let resp: Response =
        lattice_request(bus.as_ref(), SUBJECT, &deny, Duration::from_secs(1)).await?;
    assert!(!resp.permitted);
    assert_eq!(resp.message, "component is blocked");

    let provider = StartProviderRequest {
        request_id: "2".to_string(),
        kind: KIND_START_PROVIDER.to_string(),
        ..Default::default()
    };
    let resp: Response =
        lattice_request(bus.as_ref(), SUBJECT, &provider, Duration::from_secs(1)).await?;
    assert!(resp.permitted);

    let invocation = PerformInvocationRequest {
        request_id: "3".to_string(),
        kind: KIND_PERFORM_INVOCATION.to_string(),
        request: PerformInvocationPayload {
            interface: "wasi:http/incoming-handler".to_string(),
            function: "handle".to_string(),
            ..Default::default()
        },
        ..Default::default()
    };
    let resp: Response =
        lattice_request(bus.as_ref(), SUBJECT, &invocation, Duration::from_secs(1)).await?;
    assert!(!resp.permitted);
    assert_eq!(resp.request_id, "3");

    server.drain().await?;
    Ok(())
}

#[tokio::test]
async fn unknown_kind_gets_no_reply_and_hits_error_stream() -> anyhow::Result<()> {
    let bus = test_bus();
    let server = start_engine(&bus).await?;
    let mut errors = server.error_stream().expect("error stream available once");

    let body = json!({
        "requestId": "X",
        "kind": "unknown",
        "version": "v1",
    });
    let msg = codec::encode(SUBJECT, &body)?;

    // No reply is published for an unknown kind, so the request times out.
    let result = tokio::time::timeout(Duration::from_millis(200), bus.request(msg)).await;
    assert!(result.is_err(), "expected no reply for unknown kind");

    let err = tokio::time::timeout(Duration::from_secs(1), errors.recv())
        .await?
        .expect("operation error should be reported");
    assert!(matches!(err.error, Error::Operation(_)));
    assert!(err.error.to_string().contains("unknown request kind"));

    server.drain().await?;
    Ok(())
}
