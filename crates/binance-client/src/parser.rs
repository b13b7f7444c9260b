//! Field extraction from Binance response bodies
//!
//! Only called for 2xx responses. Every function is total: a missing field,
//! a field of the wrong type or an unparseable body yields the default for
//! that field, never an error.
//!
//! Account endpoints wrap their payload in an envelope:
//! `{"code":"000000","message":null,"data":...,"success":true}`.

use std::collections::BTreeMap;

use binance_auth::TokenResponse;
use serde::Serialize;
use serde_json::Value;

/// Result of a convert-quote request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ConvertQuote {
    pub quote_id: String,
    pub quote_price: String,
    pub total_fee: String,
    pub total_amount: String,
}

/// Deposit address for a coin.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DepositInfo {
    pub address: String,
    pub url: String,
}

/// Outcome of confirming a convert quote.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ConfirmStatus {
    pub success: bool,
    pub error_message: String,
}

fn parse(body: &str) -> Value {
    serde_json::from_str(body).unwrap_or(Value::Null)
}

fn string_field(value: &Value, key: &str) -> String {
    value
        .get(key)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

/// Access and refresh tokens from the token endpoint.
pub fn tokens(body: &str) -> (String, String) {
    let token = TokenResponse::from_body(body);
    (token.access_token, token.refresh_token)
}

/// `{"symbol":"BTCUSDT","price":"7137.98000000"}`
pub fn ticker_price(body: &str) -> Option<String> {
    parse(body)
        .get("price")
        .and_then(Value::as_str)
        .map(str::to_string)
}

/// 24h ticker statistics; only `volume` is used.
pub fn ticker_volume(body: &str) -> Option<String> {
    parse(body)
        .get("volume")
        .and_then(Value::as_str)
        .map(str::to_string)
}

/// Free balance per asset from `data: [{"asset":"BTC","free":"0.1",...}]`.
pub fn account_balances(body: &str) -> BTreeMap<String, String> {
    let json = parse(body);
    let Some(entries) = json.get("data").and_then(Value::as_array) else {
        return BTreeMap::new();
    };

    entries
        .iter()
        .filter_map(|entry| {
            let asset = entry.get("asset")?.as_str()?;
            let free = entry.get("free")?.as_str()?;
            Some((asset.to_string(), free.to_string()))
        })
        .collect()
}

/// `data: {"coin":"BTC","address":"...","tag":"","url":"..."}`
pub fn deposit_info(body: &str) -> DepositInfo {
    let json = parse(body);
    let data = json.get("data").unwrap_or(&Value::Null);
    DepositInfo {
        address: string_field(data, "address"),
        url: string_field(data, "url"),
    }
}

/// `data: {"quoteId":"...","quotePrice":"...","totalFee":"...","totalAmount":"..."}`
pub fn convert_quote(body: &str) -> ConvertQuote {
    let json = parse(body);
    let data = json.get("data").unwrap_or(&Value::Null);
    ConvertQuote {
        quote_id: string_field(data, "quoteId"),
        quote_price: string_field(data, "quotePrice"),
        total_fee: string_field(data, "totalFee"),
        total_amount: string_field(data, "totalAmount"),
    }
}

/// Success requires `success: true` and a non-null `data`. The message is
/// surfaced whenever the body carries one.
pub fn confirm_status(body: &str) -> ConfirmStatus {
    let json = parse(body);
    let success = json.get("success").and_then(Value::as_bool) == Some(true)
        && json.get("data").is_some_and(|data| !data.is_null());
    ConfirmStatus {
        success,
        error_message: string_field(&json, "message"),
    }
}

/// Convertible pairs: `data: [{"assetCode":"BTC","subSelector":[{"assetCode":"ETH"}]}]`.
pub fn convert_assets(body: &str) -> BTreeMap<String, Vec<String>> {
    let json = parse(body);
    let Some(entries) = json.get("data").and_then(Value::as_array) else {
        return BTreeMap::new();
    };

    entries
        .iter()
        .filter_map(|entry| {
            let code = entry.get("assetCode")?.as_str()?;
            let targets = entry
                .get("subSelector")
                .and_then(Value::as_array)
                .map(|subs| {
                    subs.iter()
                        .filter_map(|sub| sub.get("assetCode")?.as_str().map(str::to_string))
                        .collect()
                })
                .unwrap_or_default();
            Some((code.to_string(), targets))
        })
        .collect()
}

/// `{"code":"000000","data":true,"success":true}`
pub fn revoke_success(body: &str) -> bool {
    parse(body).get("success").and_then(Value::as_bool) == Some(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokens_from_exchange_body() {
        let (access, refresh) = tokens(
            r#"{"access_token":"83f2bf51","refresh_token":"fb5587ee","scope":"read","token_type":"bearer","expires_in":30714}"#,
        );
        assert_eq!(access, "83f2bf51");
        assert_eq!(refresh, "fb5587ee");
    }

    #[test]
    fn ticker_fields() {
        assert_eq!(
            ticker_price(r#"{"symbol":"BTCUSDT","price":"7137.98000000"}"#).as_deref(),
            Some("7137.98000000")
        );
        assert_eq!(
            ticker_volume(r#"{"symbol":"BTCUSDT","volume":"1337"}"#).as_deref(),
            Some("1337")
        );
        assert_eq!(ticker_price(r#"{"symbol":"BTCUSDT"}"#), None);
        assert_eq!(ticker_volume("not json"), None);
    }

    #[test]
    fn balances_map_asset_to_free() {
        let balances = account_balances(
            r#"{"code":"000000","message":null,"data":[
                {"asset":"BNB","free":"10114.00000000","locked":"0.00000000"},
                {"asset":"BTC","free":"2.45000000","locked":"0.10000000"},
                {"asset":"ETH"}
            ],"success":true}"#,
        );
        assert_eq!(balances.len(), 2);
        assert_eq!(balances["BNB"], "10114.00000000");
        assert_eq!(balances["BTC"], "2.45000000");
    }

    #[test]
    fn balances_without_data_are_empty() {
        assert!(account_balances(r#"{"code":"000000","data":null}"#).is_empty());
    }

    #[test]
    fn deposit_info_fields() {
        let info = deposit_info(
            r#"{"code":"000000","message":null,"data":{"coin":"BTC","address":"112tfsHDk6Yk8PbNnTVkv7yPox4aWYYDtW","tag":"","url":"https://btc.com/112tfsHDk6Yk8PbNnTVkv7yPox4aWYYDtW"},"success":true}"#,
        );
        assert_eq!(info.address, "112tfsHDk6Yk8PbNnTVkv7yPox4aWYYDtW");
        assert_eq!(
            info.url,
            "https://btc.com/112tfsHDk6Yk8PbNnTVkv7yPox4aWYYDtW"
        );
        assert_eq!(deposit_info("{}"), DepositInfo::default());
    }

    #[test]
    fn quote_fields() {
        let quote = convert_quote(
            r#"{"code":"000000","data":{"quoteId":"b5481fb7f8314bb2baf55aa6d4fcf068","quotePrice":"1094.01086957","tradeFee":"8","railFee":"0","totalFee":"8","totalAmount":"10950.10869570","showPrice":"1094.01086957"},"success":true}"#,
        );
        assert_eq!(quote.quote_id, "b5481fb7f8314bb2baf55aa6d4fcf068");
        assert_eq!(quote.quote_price, "1094.01086957");
        assert_eq!(quote.total_fee, "8");
        assert_eq!(quote.total_amount, "10950.10869570");
    }

    #[test]
    fn confirm_status_success_and_failure() {
        let ok = confirm_status(
            r#"{"code":"000000","message":null,"data":{"quoteId":"b548","status":"FAIL"},"success":true}"#,
        );
        assert!(ok.success);
        assert_eq!(ok.error_message, "");

        let failed = confirm_status(
            r#"{"code":"117041","message":"Quote expired. Please try again.","data":null,"success":false}"#,
        );
        assert!(!failed.success);
        assert_eq!(failed.error_message, "Quote expired. Please try again.");
    }

    #[test]
    fn convert_assets_lists_targets() {
        let assets = convert_assets(
            r#"{"code":"000000","data":[
                {"assetCode":"BTC","assetName":"Bitcoin","subSelector":[{"assetCode":"BNB"},{"assetCode":"ETH"}]},
                {"assetCode":"BNB","subSelector":[]},
                {"assetName":"nameless"}
            ],"success":true}"#,
        );
        assert_eq!(assets.len(), 2);
        assert_eq!(assets["BTC"], vec!["BNB", "ETH"]);
        assert!(assets["BNB"].is_empty());
    }

    #[test]
    fn revoke_flag() {
        assert!(revoke_success(
            r#"{"code":"000000","message":null,"data":true,"success":true}"#
        ));
        assert!(!revoke_success(
            r#"{"code":"000000","message":null,"data":false,"success":false}"#
        ));
        assert!(!revoke_success(""));
    }
}
