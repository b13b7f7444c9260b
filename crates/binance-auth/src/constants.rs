//! Binance OAuth constants
//!
//! Public client configuration for the Binance widget. The client ID
//! identifies the public application and is baked in at build time from
//! `BINANCE_CLIENT_ID` when set; deployments may override it in config.

/// OAuth client ID, empty unless provided at build time.
pub const DEFAULT_CLIENT_ID: &str = match option_env!("BINANCE_CLIENT_ID") {
    Some(id) => id,
    None => "",
};

/// Base URL of the accounts host (authorization, token and account APIs).
pub const OAUTH_HOST: &str = "https://accounts.binance.com";

/// Base URL of the public market-data API.
pub const API_HOST: &str = "https://api.binance.com";

/// Authorization endpoint the user is sent to. Not affected by host overrides.
pub const AUTHORIZE_ENDPOINT: &str = "https://accounts.binance.com/en/oauth/authorize";

/// Custom-scheme redirect handled by the embedding application.
pub const REDIRECT_URI: &str = "com.brave.binance://authorization";

/// Requested scopes, comma separated as Binance expects.
pub const SCOPES: &str = "user:email,user:address,asset:balance,asset:ocbs";

pub const PATH_ACCESS_TOKEN: &str = "/oauth/token";
pub const PATH_ACCOUNT_BALANCES: &str = "/oauth-api/v1/balance";
pub const PATH_CONVERT_QUOTE: &str = "/oauth-api/v1/ocbs/quote";
pub const PATH_CONVERT_CONFIRM: &str = "/oauth-api/v1/ocbs/confirm";
pub const PATH_CONVERT_ASSETS: &str = "/oauth-api/v1/ocbs/support-coins";
pub const PATH_DEPOSIT_INFO: &str = "/oauth-api/v1/get-charge-address";
pub const PATH_REVOKE_TOKEN: &str = "/oauth-api/v1/revoke-token";
pub const PATH_TICKER_PRICE: &str = "/api/v3/ticker/price";
pub const PATH_TICKER_VOLUME: &str = "/api/v3/ticker/24hr";

/// Preference keys for the persisted, encrypted token pair.
pub const ACCESS_TOKEN_PREF: &str = "binance.access_token";
pub const REFRESH_TOKEN_PREF: &str = "binance.refresh_token";
