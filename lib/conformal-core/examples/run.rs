use async_trait::async_trait;
use conformal_core::state::{EntityKindDescriptor, StateSource};
use conformal_core::{
    CancellationToken, ConformalError, ConformanceReport, ConformanceTester, HttpServiceClient,
};

/// A store adapter exposing nothing; state-based checks degrade to no-ops.
///
/// Point this at your real database adapter to light up the safety and
/// idempotency properties.
#[derive(Debug)]
struct EmptyStore;

#[async_trait]
impl StateSource for EmptyStore {
    async fn entity_kinds(&self) -> Result<Vec<EntityKindDescriptor>, ConformalError> {
        Ok(Vec::new())
    }

    async fn count(&self, _kind: &str) -> Result<u64, ConformalError> {
        Ok(0)
    }

    async fn list_all(&self, _kind: &str) -> Result<Vec<serde_json::Value>, ConformalError> {
        Ok(Vec::new())
    }

    async fn random_key(&self, _kind: &str) -> Result<Option<serde_json::Value>, ConformalError> {
        Ok(None)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().pretty().init();

    let client = HttpServiceClient::builder()
        .host("localhost")
        .port(8080)
        .build()?;

    let cancel = CancellationToken::new();
    let tester = ConformanceTester::builder()
        .with_openapi_url("http://localhost:8080/swagger/v1/swagger.json")
        .with_service_client(client)
        .with_state_source(EmptyStore)
        .build(&cancel)
        .await?;

    let results = tester.run_all(5, &cancel).await;
    let report = ConformanceReport::from_reports("local service", results);
    println!("{}", serde_json::to_string_pretty(&report)?);

    Ok(())
}
