//! OAuth flow controller
//!
//! Owns the PKCE pair, the pending authorization code, the credential store
//! and the multiplexer. Data endpoints live in `endpoints`.

use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use binance_auth::{
    CredentialStore, PATH_ACCESS_TOKEN, PATH_REVOKE_TOKEN, PkcePair, PreferenceStore, SecretCodec,
    build_authorization_url, exchange_form,
};
use common::Secret;
use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};
use transport::{OutboundRequest, Transport, Url};

use crate::multiplexer::{Multiplexer, Response};
use crate::parser;

/// Hosts and client identity the service talks to.
///
/// Hosts are base URLs; only their scheme and authority are used.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostConfig {
    pub oauth_host: Url,
    pub api_host: Url,
    pub client_id: String,
    /// ISO country code of the user, if known.
    pub country: Option<String>,
}

impl HostConfig {
    pub fn new(
        oauth_host: &str,
        api_host: &str,
        client_id: impl Into<String>,
    ) -> common::Result<Self> {
        Ok(Self {
            oauth_host: parse_host(oauth_host)?,
            api_host: parse_host(api_host)?,
            client_id: client_id.into(),
            country: None,
        })
    }

    /// Production Binance hosts with the given client ID.
    pub fn binance(client_id: impl Into<String>) -> common::Result<Self> {
        Self::new(binance_auth::OAUTH_HOST, binance_auth::API_HOST, client_id)
    }

    pub fn with_country(mut self, country: impl Into<String>) -> Self {
        self.country = Some(country.into());
        self
    }
}

fn parse_host(host: &str) -> common::Result<Url> {
    let url = Url::parse(host)?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(common::Error::Config(format!(
            "host {host} must use http or https, not {other}"
        ))),
    }
}

/// Build `{base}{path}?{params}`. The base's own path and query are replaced.
pub(crate) fn endpoint(base: &Url, path: &str, params: &[(&str, &str)]) -> Url {
    let mut url = base.clone();
    url.set_path(path);
    url.set_query(None);
    if !params.is_empty() {
        url.query_pairs_mut().extend_pairs(params);
    }
    url
}

#[derive(Default)]
struct Session {
    pkce: Option<PkcePair>,
    auth_code: Option<Secret<String>>,
}

type SharedSession = Arc<Mutex<Session>>;

fn lock_session(session: &SharedSession) -> MutexGuard<'_, Session> {
    session.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Binance connector for one user profile.
///
/// Shared through `Arc`. The session lock is never held across an `.await`.
/// Credential updates run on the multiplexer's completion path, so they are
/// applied even when the caller stops waiting for the outcome.
pub struct BinanceService {
    hosts: HostConfig,
    multiplexer: Multiplexer,
    credentials: Arc<CredentialStore>,
    session: SharedSession,
}

impl BinanceService {
    /// Restores persisted credentials before returning; never fails.
    pub async fn new(
        hosts: HostConfig,
        transport: Arc<dyn Transport>,
        codec: Arc<dyn SecretCodec>,
        prefs: Arc<dyn PreferenceStore>,
    ) -> Self {
        let credentials = CredentialStore::load(codec, prefs).await;
        info!(
            oauth_host = %hosts.oauth_host,
            api_host = %hosts.api_host,
            "binance service initialized"
        );
        Self {
            hosts,
            multiplexer: Multiplexer::new(transport),
            credentials: Arc::new(credentials),
            session: Arc::new(Mutex::new(Session::default())),
        }
    }

    /// Start an authorization round trip.
    ///
    /// Generates a fresh PKCE pair, replacing any earlier one, so only the
    /// verifier behind the most recent URL can complete an exchange.
    pub fn authorization_url(&self) -> String {
        let pkce = PkcePair::generate();
        let url = build_authorization_url(&self.hosts.client_id, &pkce.challenge);
        self.session().pkce = Some(pkce);
        debug!("generated authorization url");
        url
    }

    /// Record the code delivered by the authorization redirect.
    pub fn set_auth_code(&self, code: impl Into<String>) {
        self.session().auth_code = Some(Secret::new(code.into()));
    }

    /// Exchange the pending authorization code for a token pair.
    ///
    /// The code is consumed whether or not the exchange succeeds.
    pub async fn exchange_token(&self) -> bool {
        let code = self
            .session()
            .auth_code
            .take()
            .map(|code| code.expose().clone())
            .unwrap_or_default();
        self.exchange_code(code).await
    }

    /// Exchange `code` for a token pair. The pending slot is left untouched.
    ///
    /// On a 2xx reply the returned tokens are saved; a persistence failure is
    /// logged and does not change the result. Returns whether an access token
    /// was obtained.
    pub async fn exchange_code(&self, code: String) -> bool {
        let verifier = self
            .session()
            .pkce
            .as_ref()
            .map(|pkce| pkce.verifier.clone())
            .unwrap_or_default();
        if code.is_empty() || verifier.is_empty() {
            warn!(
                has_code = !code.is_empty(),
                has_verifier = !verifier.is_empty(),
                "token exchange without a complete authorization round trip"
            );
        }

        let url = endpoint(&self.hosts.oauth_host, PATH_ACCESS_TOKEN, &[]);
        let body = exchange_form(&code, &self.hosts.client_id, &verifier);
        let credentials = Arc::clone(&self.credentials);
        self.issue_and_apply(OutboundRequest::post(url, Some(body)), move |response| {
            complete_exchange(credentials, response)
        })
        .await
    }

    /// Revoke the current access token.
    ///
    /// Local state is only cleared once Binance confirms the revocation.
    pub async fn revoke_token(&self) -> bool {
        let access = self.credentials.access_token().await;
        let url = endpoint(
            &self.hosts.oauth_host,
            PATH_REVOKE_TOKEN,
            &[("access_token", access.as_str())],
        );
        let credentials = Arc::clone(&self.credentials);
        let session = Arc::clone(&self.session);
        self.issue_and_apply(OutboundRequest::post(url, None), move |response| {
            complete_revoke(credentials, session, response)
        })
        .await
    }

    /// Issue `request` and run `complete` on its response from the
    /// multiplexer's continuation. The caller only waits for the flag.
    async fn issue_and_apply<F, Fut>(&self, request: OutboundRequest, complete: F) -> bool
    where
        F: FnOnce(Response) -> Fut + Send + 'static,
        Fut: Future<Output = bool> + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        self.multiplexer.issue(request, move |response| {
            tokio::spawn(async move {
                let _ = tx.send(complete(response).await);
            });
        });
        rx.await.unwrap_or(false)
    }

    /// Top-level domain of the Binance site for the user's country.
    pub fn tld(&self) -> &'static str {
        match self.hosts.country.as_deref() {
            Some(country) if country.eq_ignore_ascii_case("US") => "us",
            _ => "com",
        }
    }

    pub fn credentials(&self) -> &CredentialStore {
        &self.credentials
    }

    pub fn multiplexer(&self) -> &Multiplexer {
        &self.multiplexer
    }

    pub fn hosts(&self) -> &HostConfig {
        &self.hosts
    }

    /// Challenge of the current PKCE pair, if an authorization URL was built.
    pub fn pending_challenge(&self) -> Option<String> {
        self.session().pkce.as_ref().map(|pkce| pkce.challenge.clone())
    }

    pub fn set_client_id_for_test(&mut self, client_id: impl Into<String>) {
        self.hosts.client_id = client_id.into();
    }

    pub fn set_oauth_host_for_test(&mut self, host: Url) {
        self.hosts.oauth_host = host;
    }

    pub fn set_api_host_for_test(&mut self, host: Url) {
        self.hosts.api_host = host;
    }

    fn session(&self) -> MutexGuard<'_, Session> {
        lock_session(&self.session)
    }

    /// Access token to attach to an account request.
    pub(crate) async fn access_token(&self) -> String {
        self.credentials.access_token().await
    }

    pub(crate) fn oauth_host(&self) -> &Url {
        &self.hosts.oauth_host
    }

    pub(crate) fn api_host(&self) -> &Url {
        &self.hosts.api_host
    }
}

async fn complete_exchange(credentials: Arc<CredentialStore>, response: Response) -> bool {
    if !response.is_success() {
        warn!(status = response.status, "token exchange rejected");
        return false;
    }

    let (access, refresh) = parser::tokens(&response.body);
    let obtained = !access.is_empty();
    if let Err(e) = credentials.save(access, refresh).await {
        error!(error = %e, "failed to persist exchanged tokens");
    }
    info!(authenticated = obtained, "token exchange completed");
    obtained
}

async fn complete_revoke(
    credentials: Arc<CredentialStore>,
    session: SharedSession,
    response: Response,
) -> bool {
    if !response.is_success() {
        warn!(status = response.status, "token revocation rejected");
        return false;
    }
    if !parser::revoke_success(&response.body) {
        warn!("token revocation not confirmed");
        return false;
    }

    lock_session(&session).pkce = None;
    if let Err(e) = credentials.clear().await {
        error!(error = %e, "failed to persist cleared tokens");
    }
    info!("token revoked");
    true
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::testing::{GatedTransport, ScriptedTransport, form, query, reply};
    use binance_auth::{
        ACCESS_TOKEN_PREF, AUTHORIZE_ENDPOINT, AesGcmCodec, MemoryPreferences, REDIRECT_URI,
        compute_challenge,
    };
    use std::time::Duration;
    use transport::Method;

    pub(crate) fn hosts() -> HostConfig {
        HostConfig::new("https://accounts.test", "https://api.test", "client-1").unwrap()
    }

    pub(crate) async fn service_with(
        transport: Arc<dyn Transport>,
        prefs: Arc<MemoryPreferences>,
    ) -> BinanceService {
        let codec = Arc::new(AesGcmCodec::from_key(&[7u8; 32]).unwrap());
        BinanceService::new(hosts(), transport, codec, prefs).await
    }

    pub(crate) async fn service(transport: Arc<ScriptedTransport>) -> BinanceService {
        service_with(transport, Arc::new(MemoryPreferences::new())).await
    }

    fn url_params(url: &str) -> std::collections::HashMap<String, String> {
        query(&Url::parse(url).unwrap())
    }

    /// Authorization server that only accepts the verifier matching the
    /// most recent challenge it was shown.
    fn authorization_server(expected: Arc<Mutex<Option<String>>>) -> Arc<ScriptedTransport> {
        ScriptedTransport::new(move |request| {
            let body = request.form_body.clone().unwrap_or_default();
            let params = form(&body);
            let verifier = params.get("code_verifier").cloned().unwrap_or_default();
            let challenge = compute_challenge(&verifier);
            let accepted = expected.lock().unwrap().as_deref() == Some(challenge.as_str());
            if accepted && params.get("code").map(String::as_str) == Some("auth-code") {
                Some(reply(
                    200,
                    r#"{"access_token":"at_new","refresh_token":"rt_new"}"#,
                ))
            } else {
                Some(reply(400, r#"{"error":"invalid_grant"}"#))
            }
        })
    }

    #[test]
    fn host_config_rejects_other_schemes() {
        assert!(HostConfig::new("ftp://accounts.test", "https://api.test", "c").is_err());
        assert!(HostConfig::new("not a url", "https://api.test", "c").is_err());
        let hosts = HostConfig::binance("c").unwrap();
        assert_eq!(hosts.oauth_host.as_str(), "https://accounts.binance.com/");
    }

    #[test]
    fn endpoint_replaces_path_and_encodes_params() {
        let base = Url::parse("http://127.0.0.1:8080/ignored?x=1").unwrap();
        let url = endpoint(&base, "/api/v3/ticker/price", &[("symbol", "BTC USDT")]);
        assert_eq!(
            url.as_str(),
            "http://127.0.0.1:8080/api/v3/ticker/price?symbol=BTC+USDT"
        );
        let bare = endpoint(&base, "/oauth/token", &[]);
        assert_eq!(bare.as_str(), "http://127.0.0.1:8080/oauth/token");
    }

    #[tokio::test]
    async fn authorization_url_carries_fresh_challenge() {
        let svc = service(ScriptedTransport::new(|_| None)).await;

        let first = svc.authorization_url();
        let first_challenge = svc.pending_challenge().unwrap();
        let second = svc.authorization_url();
        let second_challenge = svc.pending_challenge().unwrap();

        assert!(first.starts_with(AUTHORIZE_ENDPOINT));
        assert_ne!(first_challenge, second_challenge);
        assert_eq!(url_params(&first)["code_challenge"], first_challenge);
        assert_eq!(url_params(&second)["code_challenge"], second_challenge);
        assert_eq!(url_params(&second)["client_id"], "client-1");
        assert_eq!(url_params(&second)["code_challenge_method"], "S256");
    }

    #[tokio::test]
    async fn exchange_sends_form_and_saves_tokens() {
        let expected = Arc::new(Mutex::new(None));
        let transport = authorization_server(expected.clone());
        let prefs = Arc::new(MemoryPreferences::new());
        let svc = service_with(transport.clone(), prefs.clone()).await;

        svc.authorization_url();
        *expected.lock().unwrap() = svc.pending_challenge();
        svc.set_auth_code("auth-code");
        assert!(svc.exchange_token().await);

        let request = transport.last_request();
        assert_eq!(request.method, Method::POST);
        assert_eq!(request.url.as_str(), "https://accounts.test/oauth/token");
        let params = form(request.form_body.as_deref().unwrap());
        assert_eq!(params["grant_type"], "authorization_code");
        assert_eq!(params["client_id"], "client-1");
        assert_eq!(params["redirect_uri"], REDIRECT_URI);

        let credential = svc.credentials().current().await;
        assert_eq!(credential.access.expose(), "at_new");
        assert_eq!(credential.refresh.expose(), "rt_new");
        assert!(prefs.get_string(ACCESS_TOKEN_PREF).await.is_some());

        // Authenticated calls now carry the new token
        svc.account_balances().await;
        assert_eq!(query(&transport.last_request().url)["access_token"], "at_new");
    }

    #[tokio::test]
    async fn only_the_latest_verifier_is_accepted() {
        let expected = Arc::new(Mutex::new(None));
        let svc = service(authorization_server(expected.clone())).await;

        // The user authorizes against the first URL, then a second is built
        svc.authorization_url();
        *expected.lock().unwrap() = svc.pending_challenge();
        svc.authorization_url();

        svc.set_auth_code("auth-code");
        assert!(!svc.exchange_token().await);
        assert!(!svc.credentials().is_authenticated().await);
    }

    #[tokio::test]
    async fn rejected_exchange_keeps_stored_credentials() {
        let transport = ScriptedTransport::routes(&[(PATH_ACCESS_TOKEN, 401, "{}")]);
        let svc = service(transport).await;
        svc.credentials()
            .save("at_old".into(), "rt_old".into())
            .await
            .unwrap();

        svc.authorization_url();
        svc.set_auth_code("auth-code");
        assert!(!svc.exchange_token().await);
        assert_eq!(svc.credentials().access_token().await, "at_old");
    }

    #[tokio::test]
    async fn auth_code_is_consumed_even_on_failure() {
        let transport = ScriptedTransport::new(|_| None);
        let svc = service(transport.clone()).await;

        svc.authorization_url();
        svc.set_auth_code("auth-code");
        assert!(!svc.exchange_token().await);
        assert!(!svc.exchange_token().await);

        let requests = transport.requests();
        assert_eq!(requests.len(), 2);
        let first = form(requests[0].form_body.as_deref().unwrap());
        let second = form(requests[1].form_body.as_deref().unwrap());
        assert_eq!(first["code"], "auth-code");
        assert_eq!(second["code"], "");
    }

    #[tokio::test]
    async fn exchange_without_access_token_reports_failure() {
        let transport =
            ScriptedTransport::routes(&[(PATH_ACCESS_TOKEN, 200, r#"{"refresh_token":"rt"}"#)]);
        let svc = service(transport).await;
        svc.authorization_url();
        svc.set_auth_code("auth-code");
        assert!(!svc.exchange_token().await);
    }

    #[tokio::test]
    async fn explicit_code_is_sent_instead_of_pending_one() {
        let transport = ScriptedTransport::new(|_| None);
        let svc = service(transport.clone()).await;

        svc.authorization_url();
        svc.set_auth_code("stale");
        let (first, second) = tokio::join!(
            svc.exchange_code("code-a".into()),
            svc.exchange_code("code-b".into())
        );
        assert!(!first && !second);

        let mut sent: Vec<String> = transport
            .requests()
            .iter()
            .map(|request| form(request.form_body.as_deref().unwrap())["code"].clone())
            .collect();
        sent.sort();
        assert_eq!(sent, ["code-a", "code-b"]);

        // The pending slot is untouched and still consumed by exchange_token
        assert!(!svc.exchange_token().await);
        let last = transport.last_request();
        assert_eq!(form(last.form_body.as_deref().unwrap())["code"], "stale");
    }

    async fn wait_for_idle(svc: &BinanceService) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while svc.multiplexer().in_flight() > 0 {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn exchange_is_saved_when_caller_goes_away() {
        let transport = GatedTransport::new();
        let gate = transport.gate(PATH_ACCESS_TOKEN);
        let prefs = Arc::new(MemoryPreferences::new());
        let svc = Arc::new(service_with(transport, prefs.clone()).await);

        svc.authorization_url();
        svc.set_auth_code("auth-code");
        let caller = tokio::spawn({
            let svc = Arc::clone(&svc);
            async move { svc.exchange_token().await }
        });
        while svc.multiplexer().in_flight() == 0 {
            tokio::task::yield_now().await;
        }
        caller.abort();
        assert!(caller.await.unwrap_err().is_cancelled());

        gate.send(reply(
            200,
            r#"{"access_token":"at_X","refresh_token":"rt_Y"}"#,
        ))
        .unwrap();
        wait_for_idle(&svc).await;

        tokio::time::timeout(Duration::from_secs(5), async {
            while !svc.credentials().is_authenticated().await {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();
        assert_eq!(svc.credentials().access_token().await, "at_X");
        assert!(prefs.get_string(ACCESS_TOKEN_PREF).await.is_some());

        // Restart restores the pair
        let restarted = service_with(ScriptedTransport::new(|_| None), prefs).await;
        assert_eq!(restarted.credentials().access_token().await, "at_X");
    }

    #[tokio::test]
    async fn revoke_is_applied_when_caller_goes_away() {
        let transport = GatedTransport::new();
        let gate = transport.gate(PATH_REVOKE_TOKEN);
        let svc = Arc::new(service_with(transport, Arc::new(MemoryPreferences::new())).await);
        svc.credentials()
            .save("at_live".into(), "rt_live".into())
            .await
            .unwrap();
        svc.authorization_url();

        let caller = tokio::spawn({
            let svc = Arc::clone(&svc);
            async move { svc.revoke_token().await }
        });
        while svc.multiplexer().in_flight() == 0 {
            tokio::task::yield_now().await;
        }
        caller.abort();
        assert!(caller.await.unwrap_err().is_cancelled());

        gate.send(reply(200, r#"{"code":"000000","data":true,"success":true}"#))
            .unwrap();
        wait_for_idle(&svc).await;

        tokio::time::timeout(Duration::from_secs(5), async {
            while svc.credentials().is_authenticated().await {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();
        assert!(svc.pending_challenge().is_none());
    }

    #[tokio::test]
    async fn unconfirmed_revoke_keeps_credentials() {
        let transport = ScriptedTransport::routes(&[(
            PATH_REVOKE_TOKEN,
            200,
            r#"{"code":"000000","data":false,"success":false}"#,
        )]);
        let svc = service(transport.clone()).await;
        svc.credentials()
            .save("at_live".into(), "rt_live".into())
            .await
            .unwrap();
        svc.authorization_url();

        assert!(!svc.revoke_token().await);
        assert_eq!(svc.credentials().access_token().await, "at_live");
        assert!(svc.pending_challenge().is_some());

        let request = transport.last_request();
        assert_eq!(request.method, Method::POST);
        assert_eq!(query(&request.url)["access_token"], "at_live");
    }

    #[tokio::test]
    async fn confirmed_revoke_clears_everything() {
        let transport = ScriptedTransport::routes(&[(
            PATH_REVOKE_TOKEN,
            200,
            r#"{"code":"000000","data":true,"success":true}"#,
        )]);
        let prefs = Arc::new(MemoryPreferences::new());
        let svc = service_with(transport, prefs.clone()).await;
        svc.credentials()
            .save("at_live".into(), "rt_live".into())
            .await
            .unwrap();
        svc.authorization_url();

        assert!(svc.revoke_token().await);
        assert!(!svc.credentials().is_authenticated().await);
        assert!(svc.pending_challenge().is_none());

        // Restart sees the cleared pair
        let restarted = service_with(ScriptedTransport::new(|_| None), prefs).await;
        assert_eq!(restarted.credentials().access_token().await, "");
    }

    #[tokio::test]
    async fn revoke_error_status_is_failure() {
        let transport = ScriptedTransport::routes(&[(PATH_REVOKE_TOKEN, 500, r#"{"success":true}"#)]);
        let svc = service(transport).await;
        svc.credentials()
            .save("at_live".into(), "rt_live".into())
            .await
            .unwrap();
        assert!(!svc.revoke_token().await);
        assert!(svc.credentials().is_authenticated().await);
    }

    #[tokio::test]
    async fn tld_follows_country() {
        let transport = ScriptedTransport::new(|_| None);
        let codec = Arc::new(AesGcmCodec::from_key(&[7u8; 32]).unwrap());
        let prefs = Arc::new(MemoryPreferences::new());

        let us = BinanceService::new(
            hosts().with_country("US"),
            transport.clone(),
            codec.clone(),
            prefs.clone(),
        )
        .await;
        assert_eq!(us.tld(), "us");

        let de = BinanceService::new(
            hosts().with_country("DE"),
            transport.clone(),
            codec.clone(),
            prefs.clone(),
        )
        .await;
        assert_eq!(de.tld(), "com");

        let unknown = BinanceService::new(hosts(), transport, codec, prefs).await;
        assert_eq!(unknown.tld(), "com");
    }

    #[tokio::test]
    async fn test_seams_redirect_requests() {
        let transport = ScriptedTransport::routes(&[(
            PATH_ACCESS_TOKEN,
            200,
            r#"{"access_token":"at","refresh_token":"rt"}"#,
        )]);
        let mut svc = service(transport.clone()).await;
        svc.set_oauth_host_for_test(Url::parse("http://127.0.0.1:9999").unwrap());
        svc.set_api_host_for_test(Url::parse("http://127.0.0.1:9998").unwrap());
        svc.set_client_id_for_test("client-test");

        let url = svc.authorization_url();
        assert_eq!(url_params(&url)["client_id"], "client-test");
        assert!(url.starts_with(AUTHORIZE_ENDPOINT));

        svc.set_auth_code("c");
        assert!(svc.exchange_token().await);
        assert_eq!(
            transport.last_request().url.as_str(),
            "http://127.0.0.1:9999/oauth/token"
        );
        assert_eq!(svc.hosts().api_host.as_str(), "http://127.0.0.1:9998/");
    }
}
