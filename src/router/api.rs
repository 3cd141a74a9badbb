// Router HTTP API implementation
// This file provides HTTP endpoints for transfers, batches, funds checks,
// giveaway rounds and engine statistics
//
// Numan Thabit 2025 Nov

use super::execution::ExecutionStats;
use super::outcome::{ExecutionOutcome, FundsStatus, TransferKind, TransferRequest, MAX_DETAIL_CHARS};
use super::router::{BatchItem, BatchReport, CrossChainRouter};
use crate::config::NetworkId;
use crate::distributor::{Claim, ClaimDecision, Distributor, RoundConfig, RoundSummary};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router as AxumRouter,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use url::Url;

#[derive(Clone)]
pub struct ApiState {
    pub router: Arc<CrossChainRouter>,
    pub distributor: Arc<Distributor>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn api_error(status: StatusCode, err: impl ToString) -> ApiError {
    let mut error = err.to_string();
    if error.chars().count() > MAX_DETAIL_CHARS {
        error = error.chars().take(MAX_DETAIL_CHARS).collect();
    }
    (status, Json(ErrorResponse { error }))
}

fn bad_request(err: impl ToString) -> ApiError {
    api_error(StatusCode::BAD_REQUEST, err)
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize)]
pub struct TransferBody {
    /// Platform user id of the paying party
    pub sender: String,
    /// Recipient tag or raw address
    pub recipient: String,
    pub amount: Decimal,
    pub token: String,
    pub network: NetworkId,
    #[serde(default = "default_true")]
    pub allow_reroute: bool,
    #[serde(default)]
    pub kind: TransferKind,
}

#[derive(Debug, Serialize)]
pub struct TransferResponse {
    pub message: String,
    #[serde(flatten)]
    pub outcome: ExecutionOutcome,
}

#[derive(Debug, Deserialize)]
pub struct BatchEntry {
    pub recipient: String,
    pub amount: Decimal,
}

#[derive(Debug, Deserialize)]
pub struct BatchBody {
    pub sender: String,
    pub command_token: String,
    pub network: NetworkId,
    pub transfers: Vec<BatchEntry>,
}

#[derive(Debug, Deserialize)]
pub struct FundsBody {
    pub sender: String,
    pub amount: Decimal,
    #[serde(default)]
    pub exclude_network: Option<NetworkId>,
}

#[derive(Debug, Serialize)]
pub struct NetworkView {
    pub id: NetworkId,
    pub chain_id: u64,
    pub symbol: String,
    pub decimals: u32,
    pub endpoint: Option<Url>,
    pub endpoint_index: usize,
    pub endpoints: usize,
    pub builder_suffix: bool,
}

#[derive(Debug, Deserialize)]
pub struct RoundBody {
    pub host: String,
    pub capacity: usize,
    pub per_claim_amount: Decimal,
    pub network: NetworkId,
    pub duration_secs: u64,
    pub round_token: String,
    #[serde(default)]
    pub retry_failed_claimants: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RoundStarted {
    pub round_id: u64,
}

#[derive(Debug, Deserialize)]
pub struct ClaimBody {
    pub claimant: String,
    #[serde(default)]
    pub tag: Option<String>,
    /// Free text to pull a tag from when `tag` is absent
    #[serde(default)]
    pub text: Option<String>,
}

/// Create the HTTP router with API endpoints
pub fn create_api_router(state: ApiState) -> AxumRouter {
    AxumRouter::new()
        .route("/health", get(health_check))
        .route("/api/v1/transfer", post(transfer))
        .route("/api/v1/batch", post(batch))
        .route("/api/v1/funds", post(check_funds))
        .route("/api/v1/stats", get(get_stats))
        .route("/api/v1/networks", get(list_networks))
        .route("/api/v1/rounds", post(start_round))
        .route("/api/v1/rounds/:id", get(round_status))
        .route("/api/v1/rounds/:id/claims", post(submit_claim))
        .with_state(state)
}

/// Health check endpoint
async fn health_check() -> StatusCode {
    StatusCode::OK
}

async fn transfer(
    State(state): State<ApiState>,
    Json(body): Json<TransferBody>,
) -> Result<Json<TransferResponse>, ApiError> {
    let resolver = state.distributor.resolver();
    let sender = resolver
        .resolve_sender(&body.sender)
        .await
        .map_err(bad_request)?;
    let recipient = resolver
        .resolve_recipient(&body.recipient)
        .await
        .map_err(bad_request)?;
    let mut req = TransferRequest::new(sender, recipient, body.amount, body.token, body.network)
        .map_err(bad_request)?
        .with_reroute(body.allow_reroute);
    if body.kind == TransferKind::Disbursement {
        req = req.disbursement();
    }

    let outcome = state
        .router
        .route_and_execute(&req)
        .await
        .map_err(bad_request)?;
    Ok(Json(TransferResponse {
        message: outcome.user_message(),
        outcome,
    }))
}

async fn batch(
    State(state): State<ApiState>,
    Json(body): Json<BatchBody>,
) -> Result<Json<BatchReport>, ApiError> {
    let resolver = state.distributor.resolver();
    let sender = resolver
        .resolve_sender(&body.sender)
        .await
        .map_err(bad_request)?;
    let mut items = Vec::with_capacity(body.transfers.len());
    for entry in &body.transfers {
        let recipient = resolver
            .resolve_recipient(&entry.recipient)
            .await
            .map_err(bad_request)?;
        items.push(BatchItem {
            recipient,
            amount: entry.amount,
        });
    }
    let report = state
        .router
        .route_batch(sender, &items, &body.command_token, &body.network)
        .await
        .map_err(bad_request)?;
    Ok(Json(report))
}

async fn check_funds(
    State(state): State<ApiState>,
    Json(body): Json<FundsBody>,
) -> Result<Json<Vec<FundsStatus>>, ApiError> {
    let sender = state
        .distributor
        .resolver()
        .resolve_sender(&body.sender)
        .await
        .map_err(bad_request)?;
    if body.amount <= Decimal::ZERO {
        return Err(bad_request("amount must be positive"));
    }
    let statuses = state
        .router
        .check_funds_across_networks(sender, body.amount, body.exclude_network.as_ref())
        .await;
    Ok(Json(statuses))
}

async fn get_stats(State(state): State<ApiState>) -> Json<ExecutionStats> {
    Json(state.router.get_stats())
}

async fn list_networks(State(state): State<ApiState>) -> Json<Vec<NetworkView>> {
    let registry = state.router.registry();
    let views = registry
        .networks()
        .map(|config| NetworkView {
            id: config.id.clone(),
            chain_id: config.chain_id,
            symbol: config.symbol.clone(),
            decimals: config.decimals,
            endpoint: registry.current_endpoint(config.id.as_str()),
            endpoint_index: registry.cursor(config.id.as_str()).unwrap_or_default(),
            endpoints: config.endpoints.len(),
            builder_suffix: config.builder_suffix,
        })
        .collect();
    Json(views)
}

async fn start_round(
    State(state): State<ApiState>,
    Json(body): Json<RoundBody>,
) -> Result<Json<RoundStarted>, ApiError> {
    let host = state
        .distributor
        .resolver()
        .resolve_sender(&body.host)
        .await
        .map_err(bad_request)?;
    let round = state
        .distributor
        .start(RoundConfig {
            capacity: body.capacity,
            per_claim_amount: body.per_claim_amount,
            network: body.network,
            duration: Duration::from_secs(body.duration_secs),
            host,
            round_token: body.round_token,
            retry_failed_claimants: body.retry_failed_claimants,
        })
        .await
        .map_err(bad_request)?;
    Ok(Json(RoundStarted {
        round_id: round.id(),
    }))
}

async fn submit_claim(
    State(state): State<ApiState>,
    Path(id): Path<u64>,
    Json(body): Json<ClaimBody>,
) -> Result<Json<ClaimDecision>, ApiError> {
    let round = state
        .distributor
        .round(id)
        .await
        .ok_or_else(|| api_error(StatusCode::NOT_FOUND, format!("no round {id}")))?;
    let claim = match body.tag {
        Some(tag) => Claim::new(body.claimant, tag),
        None => Claim::from_text(body.claimant, body.text.as_deref().unwrap_or_default()),
    };
    Ok(Json(round.on_claim(claim).await))
}

async fn round_status(
    State(state): State<ApiState>,
    Path(id): Path<u64>,
) -> Result<Json<RoundSummary>, ApiError> {
    let round = state
        .distributor
        .round(id)
        .await
        .ok_or_else(|| api_error(StatusCode::NOT_FOUND, format!("no round {id}")))?;
    round.poll_deadline().await;
    Ok(Json(round.summary().await))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::StaticDirectory;
    use crate::router::scenario_tests::{stack, ALICE, BOB};
    use crate::transport::mock::{network, MockChain};
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    fn app(chain: &Arc<MockChain>) -> (AxumRouter, Vec<crate::config::NetworkConfig>) {
        let nets = vec![network("x", 6, 2), network("y", 6, 1)];
        let (router, _ledger) = stack(chain, nets.clone());
        let directory = StaticDirectory::new(
            [("bob".to_string(), BOB)],
            [("u-alice".to_string(), ALICE)],
        );
        let distributor = Arc::new(Distributor::new(Arc::clone(&router), Arc::new(directory)));
        (
            create_api_router(ApiState {
                router,
                distributor,
            }),
            nets,
        )
    }

    async fn call(app: AxumRouter, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(match body {
                Some(v) => Body::from(v.to_string()),
                None => Body::empty(),
            })
            .unwrap();
        let resp = app.oneshot(request).await.unwrap();
        let status = resp.status();
        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    #[tokio::test]
    async fn health_is_ok() {
        let chain = MockChain::new();
        let (app, _) = app(&chain);
        let (status, _) = call(app, "GET", "/health", None).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn transfer_resolves_tags_and_reports_outcome() {
        let chain = MockChain::new();
        let (app, nets) = app(&chain);
        chain.fund(&nets[0], ALICE, "10");
        chain.approve(&nets[0], ALICE, "10");

        let (status, body) = call(
            app,
            "POST",
            "/api/v1/transfer",
            Some(json!({
                "sender": "u-alice",
                "recipient": "@Bob",
                "amount": "2.5",
                "token": "msg-1",
                "network": "x"
            })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "success");
        assert_eq!(body["network"], "x");
        assert!(body["message"].as_str().unwrap().starts_with("Sent 2.5"));
    }

    #[tokio::test]
    async fn transfer_body_never_carries_transport_text() {
        let chain = MockChain::new();
        let (app, nets) = app(&chain);
        chain.fund(&nets[0], ALICE, "10");
        chain.approve(&nets[0], ALICE, "10");
        chain.kill_network(&nets[0]);

        let (status, body) = call(
            app,
            "POST",
            "/api/v1/transfer",
            Some(json!({
                "sender": "u-alice",
                "recipient": "@bob",
                "amount": "1",
                "token": "msg-dead",
                "network": "x"
            })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "failed");
        assert_eq!(body["kind"], "network_unreachable");
        assert_eq!(body["detail"], "all endpoints failed");
        let raw = body.to_string();
        assert!(!raw.contains("rpc.test"), "{raw}");
        assert!(!raw.contains("connection refused"), "{raw}");
    }

    #[tokio::test]
    async fn unresolved_tag_is_bad_request() {
        let chain = MockChain::new();
        let (app, _) = app(&chain);
        let (status, body) = call(
            app,
            "POST",
            "/api/v1/transfer",
            Some(json!({
                "sender": "u-alice",
                "recipient": "@nobody",
                "amount": "1",
                "token": "msg-2",
                "network": "x"
            })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("@nobody"));
    }

    #[tokio::test]
    async fn funds_endpoint_scans_every_network() {
        let chain = MockChain::new();
        let (app, nets) = app(&chain);
        chain.fund(&nets[1], ALICE, "3");
        let (status, body) = call(
            app,
            "POST",
            "/api/v1/funds",
            Some(json!({ "sender": "u-alice", "amount": "2" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let list = body.as_array().unwrap();
        assert_eq!(list.len(), 2);
        assert_eq!(list[1]["network"], "y");
        assert_eq!(list[1]["has_balance"], true);
        assert_eq!(list[1]["has_allowance"], false);
    }

    #[tokio::test]
    async fn networks_show_current_endpoint() {
        let chain = MockChain::new();
        let (app, nets) = app(&chain);
        let (status, body) = call(app, "GET", "/api/v1/networks", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body[0]["id"], "x");
        assert_eq!(body[0]["endpoint"], nets[0].endpoints[0].as_str());
        assert_eq!(body[0]["endpoints"], 2);
    }

    #[tokio::test]
    async fn rounds_admit_claims_and_report_progress() {
        let chain = MockChain::new();
        let (app, nets) = app(&chain);
        chain.fund(&nets[0], ALICE, "10");
        chain.approve(&nets[0], ALICE, "10");

        let (status, body) = call(
            app.clone(),
            "POST",
            "/api/v1/rounds",
            Some(json!({
                "host": "u-alice",
                "capacity": 1,
                "per_claim_amount": "1",
                "network": "x",
                "duration_secs": 60,
                "round_token": "giveaway-1"
            })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let id = body["round_id"].as_u64().unwrap();

        let (_, decision) = call(
            app.clone(),
            "POST",
            &format!("/api/v1/rounds/{id}/claims"),
            Some(json!({ "claimant": "u-9", "text": "me! @bob" })),
        )
        .await;
        assert_eq!(decision["decision"], "processed");
        assert_eq!(decision["slot"], 1);

        let (_, decision) = call(
            app.clone(),
            "POST",
            &format!("/api/v1/rounds/{id}/claims"),
            Some(json!({ "claimant": "u-10", "tag": "bob" })),
        )
        .await;
        assert_eq!(decision["decision"], "rejected");
        assert_eq!(decision["reason"]["reason"], "round_closed");

        let (_, summary) = call(app.clone(), "GET", &format!("/api/v1/rounds/{id}"), None).await;
        assert_eq!(summary["end"], "capacity_reached");
        assert_eq!(summary["admissions"].as_array().unwrap().len(), 1);

        let (status, _) = call(app, "GET", "/api/v1/rounds/999", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
