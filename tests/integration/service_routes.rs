//! HTTP routes driven end to end through the router and the in-memory chain.

mod mock_chain;

use std::sync::Arc;

use alloy::primitives::Address;
use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use rust_decimal_macros::dec;
use tower::ServiceExt;

use treasury_gate::api::build_router;
use treasury_gate::config::AppConfig;
use treasury_gate::context::{Collaborators, ServiceContext, TreasuryAddresses};

use mock_chain::{endpoints, wei, MockChain, MockConnector, TREASURY};

const DEST: &str = "0xA0D44B2B1E2E828B466a458e3D08384B950ed655";
const GWEI_20: u128 = 20_000_000_000;

fn context(chain: Arc<MockChain>, addresses: TreasuryAddresses) -> Arc<ServiceContext> {
    let mut cfg = AppConfig::default();
    cfg.oracle.seed_price_usd = dec!(2000);
    Arc::new(ServiceContext::new(
        cfg,
        Collaborators {
            connector: MockConnector::new(vec![("primary", chain)]),
            endpoints: endpoints(),
            price_sources: vec![],
            balance_fallback: None,
        },
        addresses,
    ))
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn post_json(uri: &str, json: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(json.to_string()))
        .unwrap()
}

async fn call(ctx: &Arc<ServiceContext>, req: Request<Body>) -> (StatusCode, serde_json::Value) {
    let resp = build_router(ctx.clone()).oneshot(req).await.unwrap();
    let status = resp.status();
    let body = axum::body::to_bytes(resp.into_body(), 64_000).await.unwrap();
    (status, serde_json::from_slice(&body).unwrap())
}

#[tokio::test]
async fn test_balance_reads_chain() {
    let ctx = context(MockChain::new(wei("0.5"), GWEI_20), TreasuryAddresses::default());

    let (status, json) = call(&ctx, get("/balance")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["balance"].as_f64().unwrap(), 0.5);
    assert_eq!(json["balanceUSD"].as_f64().unwrap(), 1000.0);
    assert_eq!(json["rpc"], "primary");
    assert_eq!(json["address"].as_str().unwrap(), TREASURY.to_string());
}

#[tokio::test]
async fn test_convert_moves_value() {
    let chain = MockChain::new(wei("1"), GWEI_20);
    let ctx = context(chain.clone(), TreasuryAddresses::default());

    let body = format!(r#"{{"toAddress": "{DEST}", "amountUSD": 500}}"#);
    let (status, json) = call(&ctx, post_json("/withdraw", &body)).await;
    assert_eq!(status, StatusCode::OK, "{json}");
    assert_eq!(json["success"], true);
    assert_eq!(json["amountETH"].as_f64().unwrap(), 0.25);
    assert_eq!(json["amountUSD"].as_f64().unwrap(), 500.0);
    assert_eq!(json["gasCostETH"].as_f64().unwrap(), 0.00042);
    assert_eq!(json["confirmed"], true);
    assert!(json["txHash"].as_str().unwrap().starts_with("0x"));

    assert_eq!(chain.sent().len(), 1);
    assert_eq!(chain.balance_now(), wei("0.74958"));
}

#[tokio::test]
async fn test_convert_uses_default_destination() {
    let chain = MockChain::new(wei("1"), GWEI_20);
    let default = Address::repeat_byte(0x22);
    let ctx = context(
        chain.clone(),
        TreasuryAddresses {
            fee_recipient: None,
            default_destination: Some(default),
        },
    );

    let (status, json) = call(&ctx, post_json("/convert", r#"{"percentage": 10}"#)).await;
    assert_eq!(status, StatusCode::OK, "{json}");
    assert_eq!(json["amountETH"].as_f64().unwrap(), 0.1);
    assert_eq!(chain.sent()[0].to, default);
}

#[tokio::test]
async fn test_insufficient_funds_response() {
    let chain = MockChain::new(wei("0.01"), GWEI_20);
    let ctx = context(chain.clone(), TreasuryAddresses::default());

    let body = format!(r#"{{"to": "{DEST}", "amount": 0.01}}"#);
    let (status, json) = call(&ctx, post_json("/send-eth", &body)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["error"], "insufficient_funds");
    assert_eq!(json["maxWithdrawable"].as_f64().unwrap(), 0.00866);
    assert!(json["message"].as_str().unwrap().contains("need amount + gas"));
    assert!(chain.sent().is_empty());
}

#[tokio::test]
async fn test_fund_from_earnings_prefers_treasury_field() {
    let chain = MockChain::new(wei("1"), GWEI_20);
    let ctx = context(chain.clone(), TreasuryAddresses::default());

    let body = format!(r#"{{"treasury": "{DEST}", "to": "0x0000000000000000000000000000000000000001", "amountETH": 0.05}}"#);
    let (status, json) = call(&ctx, post_json("/fund-from-earnings", &body)).await;
    assert_eq!(status, StatusCode::OK, "{json}");
    assert_eq!(chain.sent()[0].to, DEST.parse::<Address>().unwrap());
    assert_eq!(json["amountETH"].as_f64().unwrap(), 0.05);
}

#[tokio::test]
async fn test_rpc_failure_is_bad_gateway() {
    let chain = MockChain::new(wei("1"), GWEI_20);
    chain.revert_next();
    let ctx = context(chain, TreasuryAddresses::default());

    let body = format!(r#"{{"to": "{DEST}", "amount": 0.1}}"#);
    let (status, json) = call(&ctx, post_json("/transfer", &body)).await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(json["error"], "chain");
    assert_eq!(json["kind"], "reverted");
    assert!(json["txHash"].is_string());
}

#[tokio::test]
async fn test_execute_requires_funding_floor() {
    let chain = MockChain::new(wei("0.004"), GWEI_20);
    let fee_recipient = Address::repeat_byte(0x33);
    let ctx = context(
        chain.clone(),
        TreasuryAddresses {
            fee_recipient: Some(fee_recipient),
            default_destination: None,
        },
    );

    let (status, json) = call(&ctx, post_json("/execute", "")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["error"], "below_funding_floor");
    assert_eq!(json["required"].as_f64().unwrap(), 0.01);
    assert_eq!(json["current"].as_f64().unwrap(), 0.004);

    chain.set_balance(wei("0.02"));
    let (status, json) = call(&ctx, post_json("/execute", "")).await;
    assert_eq!(status, StatusCode::OK, "{json}");
    assert_eq!(json["success"], true);
    assert_eq!(json["backendBalance"].as_f64().unwrap(), 0.02);
    assert_eq!(json["feeRecipient"].as_str().unwrap(), fee_recipient.to_string());
    // Execute never moves value
    assert!(chain.sent().is_empty());
}

#[tokio::test]
async fn test_status_reflects_balance_refresh_and_accrual() {
    let chain = MockChain::new(wei("0.05"), GWEI_20);
    let ctx = context(chain, TreasuryAddresses::default());

    ctx.balance.refresh().await;
    ctx.accrual.tick().await;

    let (status, json) = call(&ctx, get("/status")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["engineState"], "active");
    assert_eq!(json["backendBalance"].as_f64().unwrap(), 0.05);
    assert_eq!(json["rpc"], "primary");
    // 1000 × 0.00001 × 2000
    assert_eq!(json["totalPnL"].as_f64().unwrap(), 20.0);
    assert_eq!(json["totalTrades"], 1_000);

    // Earnings report merged totals only
    let (_, json) = call(&ctx, get("/earnings")).await;
    assert_eq!(json["totalTrades"], 0);
    ctx.accrual.merge().await;
    let (_, json) = call(&ctx, get("/earnings")).await;
    assert_eq!(json["totalTrades"], 1_000);
    assert_eq!(json["totalPnL"].as_f64().unwrap(), 20.0);
}
