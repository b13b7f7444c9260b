//! Widget HTTP API
//!
//! Thin JSON surface over `BinanceService` for the front end. Never exposes
//! tokens.
//!
//! Endpoints:
//! - GET  /oauth/authorize-url   start the PKCE flow, return the authorization URL
//! - POST /oauth/token           exchange the redirect's code for tokens
//! - POST /oauth/revoke          revoke the access token and clear credentials
//! - GET  /ticker/price          last price for `symbol`
//! - GET  /ticker/volume         24h volume for `symbol`
//! - GET  /account/balances      free balance per asset
//! - GET  /account/deposit       deposit address for `coin`
//! - POST /convert/quote         quote a conversion
//! - POST /convert/confirm       execute a quoted conversion
//! - GET  /convert/assets        convertible assets and their targets
//! - GET  /tld                   Binance site TLD for the user's country

use std::sync::Arc;

use axum::Router;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use binance_client::BinanceService;
use serde::Deserialize;
use tracing::{info, warn};

/// Build the widget API router.
pub fn build_api_router(service: Arc<BinanceService>) -> Router {
    Router::new()
        .route("/oauth/authorize-url", get(authorize_url))
        .route("/oauth/token", post(exchange_token))
        .route("/oauth/revoke", post(revoke_token))
        .route("/ticker/price", get(ticker_price))
        .route("/ticker/volume", get(ticker_volume))
        .route("/account/balances", get(account_balances))
        .route("/account/deposit", get(deposit_info))
        .route("/convert/quote", post(convert_quote))
        .route("/convert/confirm", post(confirm_convert))
        .route("/convert/assets", get(convert_assets))
        .route("/tld", get(tld))
        .with_state(service)
}

fn json(status: StatusCode, body: serde_json::Value) -> impl IntoResponse {
    (
        status,
        [(axum::http::header::CONTENT_TYPE, "application/json")],
        body.to_string(),
    )
}

/// 200 on success, 502 when Binance did not deliver.
fn upstream_status(success: bool) -> StatusCode {
    if success {
        StatusCode::OK
    } else {
        StatusCode::BAD_GATEWAY
    }
}

/// GET /oauth/authorize-url
///
/// Every call replaces the pending PKCE pair; only the latest URL can be
/// completed.
async fn authorize_url(State(service): State<Arc<BinanceService>>) -> impl IntoResponse {
    let url = service.authorization_url();
    info!("PKCE flow initiated");
    json(
        StatusCode::OK,
        serde_json::json!({ "authorization_url": url }),
    )
}

#[derive(Deserialize)]
struct ExchangeRequest {
    code: String,
}

/// POST /oauth/token
async fn exchange_token(
    State(service): State<Arc<BinanceService>>,
    axum::Json(body): axum::Json<ExchangeRequest>,
) -> impl IntoResponse {
    let code = body.code.trim();
    if code.is_empty() {
        return json(
            StatusCode::BAD_REQUEST,
            serde_json::json!({ "success": false, "error": "code must not be empty" }),
        );
    }

    let success = service.exchange_code(code.to_string()).await;
    if !success {
        warn!("authorization code exchange failed");
    }
    json(
        upstream_status(success),
        serde_json::json!({ "success": success }),
    )
}

/// POST /oauth/revoke
async fn revoke_token(State(service): State<Arc<BinanceService>>) -> impl IntoResponse {
    let success = service.revoke_token().await;
    json(
        upstream_status(success),
        serde_json::json!({ "success": success }),
    )
}

#[derive(Deserialize)]
struct SymbolQuery {
    symbol: String,
}

/// GET /ticker/price?symbol=BTCUSDT
async fn ticker_price(
    State(service): State<Arc<BinanceService>>,
    Query(query): Query<SymbolQuery>,
) -> impl IntoResponse {
    let price = service.ticker_price(&query.symbol).await;
    json(
        StatusCode::OK,
        serde_json::json!({ "symbol": query.symbol, "price": price }),
    )
}

/// GET /ticker/volume?symbol=BTCUSDT
async fn ticker_volume(
    State(service): State<Arc<BinanceService>>,
    Query(query): Query<SymbolQuery>,
) -> impl IntoResponse {
    let volume = service.ticker_volume(&query.symbol).await;
    json(
        StatusCode::OK,
        serde_json::json!({ "symbol": query.symbol, "volume": volume }),
    )
}

/// GET /account/balances
async fn account_balances(State(service): State<Arc<BinanceService>>) -> impl IntoResponse {
    let (balances, success) = service.account_balances().await;
    json(
        upstream_status(success),
        serde_json::json!({ "success": success, "balances": balances }),
    )
}

#[derive(Deserialize)]
struct CoinQuery {
    coin: String,
}

/// GET /account/deposit?coin=BTC
async fn deposit_info(
    State(service): State<Arc<BinanceService>>,
    Query(query): Query<CoinQuery>,
) -> impl IntoResponse {
    let (info, success) = service.deposit_info(&query.coin).await;
    json(
        upstream_status(success),
        serde_json::json!({
            "success": success,
            "coin": query.coin,
            "address": info.address,
            "url": info.url,
        }),
    )
}

#[derive(Deserialize)]
struct QuoteRequest {
    from: String,
    to: String,
    amount: String,
}

/// POST /convert/quote
///
/// A quote without an id means Binance did not produce one.
async fn convert_quote(
    State(service): State<Arc<BinanceService>>,
    axum::Json(body): axum::Json<QuoteRequest>,
) -> impl IntoResponse {
    let quote = service
        .convert_quote(&body.from, &body.to, &body.amount)
        .await;
    let status = upstream_status(!quote.quote_id.is_empty());
    json(status, serde_json::json!(quote))
}

#[derive(Deserialize)]
struct ConfirmRequest {
    quote_id: String,
}

/// POST /convert/confirm
///
/// A rejected confirmation is still a well-formed answer, so it is returned
/// with 200 and the upstream message.
async fn confirm_convert(
    State(service): State<Arc<BinanceService>>,
    axum::Json(body): axum::Json<ConfirmRequest>,
) -> impl IntoResponse {
    let status = service.confirm_convert(&body.quote_id).await;
    json(StatusCode::OK, serde_json::json!(status))
}

/// GET /convert/assets
async fn convert_assets(State(service): State<Arc<BinanceService>>) -> impl IntoResponse {
    let assets = service.convert_assets().await;
    json(StatusCode::OK, serde_json::json!({ "assets": assets }))
}

/// GET /tld
async fn tld(State(service): State<Arc<BinanceService>>) -> impl IntoResponse {
    json(StatusCode::OK, serde_json::json!({ "tld": service.tld() }))
}
