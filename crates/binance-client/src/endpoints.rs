//! Market data and account endpoints
//!
//! Thin wrappers over the multiplexer. Bodies are only parsed for 2xx
//! replies; anything else yields the endpoint's default value. Account
//! endpoints carry the current access token as a query parameter.

use std::collections::BTreeMap;

use binance_auth::{
    PATH_ACCOUNT_BALANCES, PATH_CONVERT_ASSETS, PATH_CONVERT_CONFIRM, PATH_CONVERT_QUOTE,
    PATH_DEPOSIT_INFO, PATH_TICKER_PRICE, PATH_TICKER_VOLUME,
};
use tracing::debug;
use transport::OutboundRequest;

use crate::multiplexer::Response;
use crate::parser::{self, ConfirmStatus, ConvertQuote, DepositInfo};
use crate::service::{BinanceService, endpoint};

/// Price reported when the ticker could not be read.
pub const DEFAULT_PRICE: &str = "0.00";

/// Volume reported when the ticker could not be read.
pub const DEFAULT_VOLUME: &str = "0";

impl BinanceService {
    /// Last price for `symbol`, e.g. `BTCUSDT`.
    pub async fn ticker_price(&self, symbol: &str) -> String {
        let url = endpoint(self.api_host(), PATH_TICKER_PRICE, &[("symbol", symbol)]);
        let response = self.multiplexer().fetch(OutboundRequest::get(url)).await;
        success_body(&response, "ticker_price")
            .and_then(parser::ticker_price)
            .unwrap_or_else(|| DEFAULT_PRICE.to_string())
    }

    /// 24h traded volume for `symbol`.
    pub async fn ticker_volume(&self, symbol: &str) -> String {
        let url = endpoint(self.api_host(), PATH_TICKER_VOLUME, &[("symbol", symbol)]);
        let response = self.multiplexer().fetch(OutboundRequest::get(url)).await;
        success_body(&response, "ticker_volume")
            .and_then(parser::ticker_volume)
            .unwrap_or_else(|| DEFAULT_VOLUME.to_string())
    }

    /// Free balance per asset, and whether the request succeeded.
    pub async fn account_balances(&self) -> (BTreeMap<String, String>, bool) {
        let access = self.access_token().await;
        let url = endpoint(
            self.oauth_host(),
            PATH_ACCOUNT_BALANCES,
            &[("access_token", access.as_str())],
        );
        let response = self.multiplexer().fetch(OutboundRequest::get(url)).await;
        match success_body(&response, "account_balances") {
            Some(body) => (parser::account_balances(body), true),
            None => (BTreeMap::new(), false),
        }
    }

    /// Deposit address for `coin`, and whether the request succeeded.
    pub async fn deposit_info(&self, coin: &str) -> (DepositInfo, bool) {
        let access = self.access_token().await;
        let url = endpoint(
            self.oauth_host(),
            PATH_DEPOSIT_INFO,
            &[("coin", coin), ("access_token", access.as_str())],
        );
        let response = self.multiplexer().fetch(OutboundRequest::get(url)).await;
        match success_body(&response, "deposit_info") {
            Some(body) => (parser::deposit_info(body), true),
            None => (DepositInfo::default(), false),
        }
    }

    /// Quote for converting `amount` of `from` into `to`.
    pub async fn convert_quote(&self, from: &str, to: &str, amount: &str) -> ConvertQuote {
        let access = self.access_token().await;
        let url = endpoint(
            self.oauth_host(),
            PATH_CONVERT_QUOTE,
            &[
                ("fromAsset", from),
                ("toAsset", to),
                ("baseAsset", from),
                ("amount", amount),
                ("access_token", access.as_str()),
            ],
        );
        let response = self.multiplexer().fetch(OutboundRequest::post(url, None)).await;
        success_body(&response, "convert_quote")
            .map(parser::convert_quote)
            .unwrap_or_default()
    }

    /// Execute a previously quoted conversion.
    pub async fn confirm_convert(&self, quote_id: &str) -> ConfirmStatus {
        let access = self.access_token().await;
        let url = endpoint(
            self.oauth_host(),
            PATH_CONVERT_CONFIRM,
            &[("quoteId", quote_id), ("access_token", access.as_str())],
        );
        let response = self.multiplexer().fetch(OutboundRequest::post(url, None)).await;
        success_body(&response, "confirm_convert")
            .map(parser::confirm_status)
            .unwrap_or_default()
    }

    /// Assets that can be converted, each with its possible targets.
    pub async fn convert_assets(&self) -> BTreeMap<String, Vec<String>> {
        let access = self.access_token().await;
        let url = endpoint(
            self.oauth_host(),
            PATH_CONVERT_ASSETS,
            &[("access_token", access.as_str())],
        );
        let response = self.multiplexer().fetch(OutboundRequest::get(url)).await;
        success_body(&response, "convert_assets")
            .map(parser::convert_assets)
            .unwrap_or_default()
    }
}

fn success_body<'a>(response: &'a Response, operation: &str) -> Option<&'a str> {
    if response.is_success() {
        Some(&response.body)
    } else {
        debug!(operation, status = response.status, "non-success reply, using default");
        None
    }
}
