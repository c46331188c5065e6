use parking_lot::Mutex;
use reqwest::Method;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use url::Url;

use crate::auth::{
    anonymous_header, bearer_header, select_mode, AuthMode, AuthState, Credentials,
};
use crate::canonical::{encode_component, query_views, serialize_params};
use crate::client::{Config, JWT_PATH};
use crate::error::{ParaError, Result};
use crate::object::ParaObject;
use crate::pager::{items_at, items_from_list, Pager};
use crate::response::{get_path, HttpResponse};
use crate::signer::RequestSigner;
use crate::time::now_millis;
use crate::token::TokenState;
use crate::transport::{PreparedRequest, ReqwestTransport, Transport};

/// An outgoing call before authentication
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestDescriptor {
    /// HTTP method
    pub method: Method,
    /// Absolute path on the endpoint, e.g. `/v1/dog/123`
    pub path: String,
    /// Extra headers; `Authorization` is replaced during dispatch
    pub headers: BTreeMap<String, String>,
    /// Query parameters in order; a key may repeat
    pub query: Vec<(String, String)>,
    /// Raw request body, sent as JSON
    pub body: Option<Vec<u8>>,
}

impl RequestDescriptor {
    /// A request with no query, headers or body
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        RequestDescriptor {
            method,
            path: path.into(),
            headers: BTreeMap::new(),
            query: Vec::new(),
            body: None,
        }
    }

    /// Replace the query parameters
    pub fn with_query(mut self, query: Vec<(String, String)>) -> Self {
        self.query = query;
        self
    }

    /// Add or replace a header
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.insert(name.to_string(), value.to_string());
        self
    }

    /// Set the request body
    pub fn with_body(mut self, body: Vec<u8>) -> Self {
        self.body = Some(body);
        self
    }
}

/// `jwt` part of a sign-in or refresh response
#[derive(Debug, Deserialize)]
struct JwtData {
    access_token: String,
    expires: i64,
    refresh: i64,
}

#[derive(Debug, Deserialize)]
struct JwtResponse {
    user: Value,
    jwt: JwtData,
}

/// Successful sign-in or refresh payload, `None` on any other outcome
fn parse_jwt_response(response: &HttpResponse) -> Option<JwtResponse> {
    if !response.is_success() {
        return None;
    }
    let parsed: JwtResponse = serde_json::from_slice(&response.body).ok()?;
    if parsed.user.is_null() || parsed.jwt.access_token.is_empty() {
        return None;
    }
    Some(parsed)
}

fn ids_params(ids: &[String]) -> Vec<(String, String)> {
    ids.iter().map(|id| ("ids".to_string(), id.clone())).collect()
}

fn batch_items(entity: Option<Value>) -> Vec<ParaObject> {
    entity.as_ref().map(items_from_list).unwrap_or_default()
}

fn set_header(headers: &mut Vec<(String, String)>, name: &str, value: String) {
    headers.retain(|(k, _)| !k.eq_ignore_ascii_case(name));
    headers.push((name.to_string(), value));
}

fn with_query(base: &Url, query: &str) -> String {
    if query.is_empty() {
        base.as_str().to_string()
    } else {
        format!("{}?{}", base.as_str(), query)
    }
}

/// Client for a Para server.
///
/// Credentials and the bearer token are shared by every call made through the
/// client and are guarded by one lock, so a client can be used from several
/// threads. Token refresh and key rotation happen under that lock.
pub struct ParaClient<T: Transport = ReqwestTransport> {
    config: Config,
    signer: RequestSigner,
    transport: T,
    state: Mutex<AuthState>,
}

impl ParaClient<ReqwestTransport> {
    /// Create a client for the default endpoint. A blank secret key makes
    /// every call anonymous until a token is set.
    pub fn new(access_key: &str, secret_key: &str) -> Result<Self> {
        Self::with_config(access_key, secret_key, Config::default())
    }

    /// Create a client with a custom configuration
    pub fn with_config(access_key: &str, secret_key: &str, config: Config) -> Result<Self> {
        let transport = ReqwestTransport::new(&config)?;
        let credentials = Credentials::new(access_key, Some(secret_key.to_string()));
        Ok(Self::with_transport(credentials, config, transport))
    }
}

impl<T: Transport> ParaClient<T> {
    /// Create a client over any transport
    pub fn with_transport(credentials: Credentials, config: Config, transport: T) -> Self {
        ParaClient {
            signer: RequestSigner::new(config.service.clone(), config.region.clone()),
            config,
            transport,
            state: Mutex::new(AuthState::new(credentials)),
        }
    }

    /// Current configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Transport used to send requests
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Set the endpoint URL; blank restores the default
    pub fn set_endpoint(&mut self, endpoint: &str) {
        self.config = self.config.clone().with_endpoint(endpoint);
    }

    /// Set the API path prefix
    pub fn set_api_path(&mut self, path: &str) {
        self.config = self.config.clone().with_api_path(path);
    }

    /// Full path for an API resource, e.g. `"dog"` -> `"/v1/dog"`
    pub fn full_path(&self, resource: &str) -> String {
        self.config.full_path(resource)
    }

    /// The app's access key, e.g. `app:myapp`
    pub fn access_key(&self) -> String {
        self.state.lock().credentials.access_key().to_string()
    }

    // ----------------------------------------------------------------------
    // Token state

    /// The current JWT access token, `None` when not signed in
    pub fn access_token(&self) -> Option<String> {
        self.state.lock().token.value().map(str::to_string)
    }

    /// Set the JWT access token. Its `exp` and `refresh` claims drive
    /// automatic refresh; a token without readable claims is never refreshed.
    pub fn set_access_token(&self, token: &str) {
        self.state.lock().token.set_encoded(token);
    }

    /// Forget the JWT access token and its expiry metadata
    pub fn clear_access_token(&self) {
        self.state.lock().token.clear();
    }

    /// Snapshot of the current token state
    pub fn token_state(&self) -> TokenState {
        self.state.lock().token.clone()
    }

    // ----------------------------------------------------------------------
    // Dispatch

    /// Authenticate and send a request, returning the raw response.
    ///
    /// Fails locally with [`ParaError::MissingAccessKey`] when the client has
    /// no access key. Server errors are returned as responses, not errors.
    pub fn dispatch(&self, request: RequestDescriptor) -> Result<HttpResponse> {
        let prepared = {
            let mut state = self.state.lock();
            self.prepare(&mut state, request)?
        };
        self.transport.execute(&prepared)
    }

    fn prepare(&self, state: &mut AuthState, request: RequestDescriptor) -> Result<PreparedRequest> {
        let mode = select_mode(state, &request.method, &request.path).map_err(|e| {
            tracing::error!(method = %request.method, path = %request.path, "blank access key");
            e
        })?;
        tracing::debug!(method = %request.method, path = %request.path, ?mode, "dispatching");

        let base = Url::parse(&format!("{}{}", self.config.endpoint, request.path))?;
        let views = query_views(&serialize_params(&request.query));
        let mut headers: Vec<(String, String)> = request.headers.into_iter().collect();

        match mode {
            AuthMode::Anonymous => {
                let value = anonymous_header(state.credentials.access_key());
                set_header(&mut headers, "Authorization", value);
            }
            AuthMode::Bearer { refresh } => {
                // Header value chosen before any refresh; a failed refresh
                // clears the state but this call still carries the old token.
                let held = state.token.value().unwrap_or_default().to_string();
                let token = if refresh && state.token.is_refresh_due(now_millis()) {
                    if self.refresh_locked(state) {
                        state.token.value().unwrap_or_default().to_string()
                    } else {
                        held
                    }
                } else {
                    held
                };
                set_header(&mut headers, "Authorization", bearer_header(&token));
            }
            AuthMode::Signed => match state.credentials.secret_key() {
                Some(secret) => {
                    let signing_url = Url::parse(&with_query(&base, &views.signing))?;
                    let signature = self.signer.sign(
                        state.credentials.access_key(),
                        secret,
                        &request.method,
                        &signing_url,
                        request.body.as_deref().unwrap_or_default(),
                    )?;
                    for (name, value) in signature.into_pairs() {
                        set_header(&mut headers, &name, value);
                    }
                }
                None => {
                    let value = anonymous_header(state.credentials.access_key());
                    set_header(&mut headers, "Authorization", value);
                }
            },
        }

        Ok(PreparedRequest {
            method: request.method,
            url: with_query(&base, &views.transmit),
            headers,
            body: request.body,
        })
    }

    /// Exchange the held token for a new one. Must be called with the state
    /// lock held; sends the refresh call straight to the transport.
    fn refresh_locked(&self, state: &mut AuthState) -> bool {
        let Some(held) = state.token.value().map(str::to_string) else {
            return false;
        };

        let request = PreparedRequest {
            method: Method::GET,
            url: format!("{}{}", self.config.endpoint, JWT_PATH),
            headers: vec![("Authorization".to_string(), bearer_header(&held))],
            body: None,
        };

        match self.transport.execute(&request) {
            Ok(response) => match parse_jwt_response(&response) {
                Some(parsed) => {
                    state
                        .token
                        .set(parsed.jwt.access_token, parsed.jwt.expires, parsed.jwt.refresh);
                    tracing::debug!("access token refreshed");
                    true
                }
                None => {
                    tracing::warn!(status = response.status, "token refresh rejected, clearing token");
                    state.token.clear();
                    false
                }
            },
            Err(e) => {
                tracing::warn!(error = %e, "token refresh failed, clearing token");
                state.token.clear();
                false
            }
        }
    }

    /// Refresh the JWT access token if it is due. Requires a token obtained
    /// through [`sign_in`](Self::sign_in) or [`set_access_token`](Self::set_access_token).
    ///
    /// Returns true when the token was replaced.
    pub fn refresh_token(&self) -> bool {
        let mut state = self.state.lock();
        if state.token.is_refresh_due(now_millis()) {
            self.refresh_locked(&mut state)
        } else {
            false
        }
    }

    // ----------------------------------------------------------------------
    // Invocation helpers

    fn invoke(
        &self,
        method: Method,
        resource: &str,
        params: &[(String, String)],
        entity: Option<Value>,
    ) -> Result<HttpResponse> {
        let mut request =
            RequestDescriptor::new(method, self.full_path(resource)).with_query(params.to_vec());
        if let Some(entity) = entity {
            request = request.with_body(serde_json::to_vec(&entity)?);
        }
        self.dispatch(request)
    }

    /// GET an API resource
    pub fn invoke_get(&self, resource: &str, params: &[(String, String)]) -> Result<HttpResponse> {
        self.invoke(Method::GET, resource, params, None)
    }

    /// POST an entity to an API resource
    pub fn invoke_post(&self, resource: &str, entity: Option<Value>) -> Result<HttpResponse> {
        self.invoke(Method::POST, resource, &[], entity)
    }

    /// PUT an entity to an API resource
    pub fn invoke_put(&self, resource: &str, entity: Option<Value>) -> Result<HttpResponse> {
        self.invoke(Method::PUT, resource, &[], entity)
    }

    /// PATCH an API resource
    pub fn invoke_patch(&self, resource: &str, entity: Option<Value>) -> Result<HttpResponse> {
        self.invoke(Method::PATCH, resource, &[], entity)
    }

    /// DELETE an API resource
    pub fn invoke_delete(&self, resource: &str, params: &[(String, String)]) -> Result<HttpResponse> {
        self.invoke(Method::DELETE, resource, params, None)
    }

    // ----------------------------------------------------------------------
    // Persistence

    /// Persist an object. With both id and type set the object is PUT to its
    /// URI (overwriting), otherwise it is POSTed to its type.
    pub fn create(&self, obj: &ParaObject) -> Result<Option<ParaObject>> {
        let body = serde_json::to_value(obj)?;
        let response = if obj.id().is_some() {
            self.invoke_put(&obj.object_uri(), Some(body))?
        } else {
            self.invoke_post(&encode_component(obj.object_type()), Some(body))?
        };
        Ok(response.entity()?.and_then(ParaObject::from_value))
    }

    /// Read an object by id, optionally scoped by type
    pub fn read(&self, object_type: Option<&str>, id: &str) -> Result<Option<ParaObject>> {
        if id.is_empty() {
            return Ok(None);
        }
        let resource = match object_type.filter(|t| !t.is_empty()) {
            Some(t) => format!("{}/{}", encode_component(t), encode_component(id)),
            None => format!("_id/{}", encode_component(id)),
        };
        let response = self.invoke_get(&resource, &[])?;
        Ok(response.entity()?.and_then(ParaObject::from_value))
    }

    /// Partially update an object
    pub fn update(&self, obj: &ParaObject) -> Result<Option<ParaObject>> {
        let body = serde_json::to_value(obj)?;
        let response = self.invoke_patch(&obj.object_uri(), Some(body))?;
        Ok(response.entity()?.and_then(ParaObject::from_value))
    }

    /// Delete an object permanently
    pub fn delete(&self, obj: &ParaObject) -> Result<()> {
        self.invoke_delete(&obj.object_uri(), &[])?.entity()?;
        Ok(())
    }

    /// Create several objects in one call
    pub fn create_all(&self, objects: &[ParaObject]) -> Result<Vec<ParaObject>> {
        if objects.is_empty() {
            return Ok(Vec::new());
        }
        let response = self.invoke_post("_batch", Some(serde_json::to_value(objects)?))?;
        Ok(batch_items(response.entity()?))
    }

    /// Read several objects by id
    pub fn read_all(&self, ids: &[String]) -> Result<Vec<ParaObject>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let response = self.invoke_get("_batch", &ids_params(ids))?;
        Ok(batch_items(response.entity()?))
    }

    /// Partially update several objects in one call
    pub fn update_all(&self, objects: &[ParaObject]) -> Result<Vec<ParaObject>> {
        if objects.is_empty() {
            return Ok(Vec::new());
        }
        let response = self.invoke_patch("_batch", Some(serde_json::to_value(objects)?))?;
        Ok(batch_items(response.entity()?))
    }

    /// Delete several objects by id
    pub fn delete_all(&self, ids: &[String]) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        self.invoke_delete("_batch", &ids_params(ids))?.entity()?;
        Ok(())
    }

    /// One page of objects of a type
    pub fn list(&self, object_type: &str, pager: Option<&mut Pager>) -> Result<Vec<ParaObject>> {
        if object_type.is_empty() {
            return Ok(Vec::new());
        }
        let params = pager.as_deref().map(Pager::to_params).unwrap_or_default();
        let response = self.invoke_get(&encode_component(object_type), &params)?;
        Ok(match response.entity()? {
            Some(result) => items_at(&result, "items", pager),
            None => Vec::new(),
        })
    }

    // ----------------------------------------------------------------------
    // Misc

    /// Version of the Para server, `"unknown"` when not reported
    pub fn server_version(&self) -> Result<String> {
        let entity = self.invoke_get("", &[])?.entity()?;
        Ok(entity
            .as_ref()
            .and_then(|v| get_path(v, "version"))
            .and_then(Value::as_str)
            .filter(|v| !v.is_empty())
            .unwrap_or("unknown")
            .to_string())
    }

    /// Registered types of the app, plural form mapped to singular
    pub fn types(&self) -> Result<Option<Value>> {
        self.invoke_get("_types", &[])?.entity()
    }

    /// Number of objects of each type in the app
    pub fn types_count(&self) -> Result<Option<Value>> {
        let params = [("count".to_string(), "true".to_string())];
        self.invoke_get("_types", &params)?.entity()
    }

    /// The app object the client is authenticated as
    pub fn app(&self) -> Result<Option<ParaObject>> {
        self.me(None)
    }

    /// The user or app currently authenticated.
    ///
    /// With `jwt` the call carries that token instead of the client's own
    /// authentication and leaves the client's token state untouched.
    pub fn me(&self, jwt: Option<&str>) -> Result<Option<ParaObject>> {
        let response = match jwt.filter(|j| !j.is_empty()) {
            None => self.invoke_get("_me", &[])?,
            Some(jwt) => {
                if self.access_key().is_empty() {
                    return Err(ParaError::MissingAccessKey);
                }
                let header = if jwt.starts_with("Bearer") {
                    jwt.to_string()
                } else {
                    bearer_header(jwt)
                };
                self.transport.execute(&PreparedRequest {
                    method: Method::GET,
                    url: format!("{}{}", self.config.endpoint, self.full_path("_me")),
                    headers: vec![("Authorization".to_string(), header)],
                    body: None,
                })?
            }
        };
        Ok(response.entity()?.and_then(ParaObject::from_value))
    }

    /// Generate a new key pair for the app. On success the client switches to
    /// the new secret key; the old one stops working on the server.
    pub fn new_keys(&self) -> Result<Option<Value>> {
        let keys = self.invoke_post("_newkeys", None)?.entity()?;
        if let Some(secret) = keys
            .as_ref()
            .and_then(|k| get_path(k, "secretKey"))
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
        {
            self.state
                .lock()
                .credentials
                .rotate_secret_key(secret.to_string());
            tracing::debug!("secret key rotated");
        }
        Ok(keys)
    }

    // ----------------------------------------------------------------------
    // Access tokens

    /// Sign in with an identity provider token (`facebook`, `google`,
    /// `password`, ...). On success the returned JWT is kept when `remember`
    /// is set and the signed-in user is returned. Any failure clears the
    /// current token.
    pub fn sign_in(
        &self,
        provider: &str,
        provider_token: &str,
        remember: bool,
    ) -> Result<Option<ParaObject>> {
        if provider.is_empty() || provider_token.is_empty() {
            return Ok(None);
        }

        let credentials = json!({
            "appid": self.access_key(),
            "provider": provider,
            "token": provider_token,
        });
        let response = match self.invoke_post(JWT_PATH, Some(credentials)) {
            Ok(response) => response,
            Err(e) => {
                self.clear_access_token();
                return Err(e);
            }
        };

        match parse_jwt_response(&response) {
            Some(parsed) => {
                if remember {
                    self.state.lock().token.set(
                        parsed.jwt.access_token,
                        parsed.jwt.expires,
                        parsed.jwt.refresh,
                    );
                }
                Ok(ParaObject::from_value(parsed.user))
            }
            None => {
                tracing::warn!(status = response.status, provider, "sign in failed");
                self.clear_access_token();
                Ok(None)
            }
        }
    }

    /// Forget the JWT access token. The token is not revoked on the server.
    pub fn sign_out(&self) {
        self.clear_access_token();
    }

    /// Revoke every token of the signed-in user ("log out everywhere")
    pub fn revoke_all_tokens(&self) -> Result<bool> {
        Ok(self.invoke_delete(JWT_PATH, &[])?.entity()?.is_some())
    }
}
