use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chrono::NaiveDateTime;
use hmac::{Hmac, Mac};
use paraclient::signer::signing_key;
use paraclient::{
    Config, Credentials, HttpResponse, Pager, ParaClient, ParaError, ParaObject, PreparedRequest,
    RequestDescriptor, RequestSigner, Result, Transport, JWT_PATH,
};
use parking_lot::Mutex;
use reqwest::Method;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::thread;
use url::Url;

type Responder = Box<dyn Fn(&PreparedRequest) -> Result<HttpResponse> + Send + Sync>;

/// Transport that records every request and answers with a closure
struct RecordingTransport {
    requests: Mutex<Vec<PreparedRequest>>,
    responder: Responder,
}

impl RecordingTransport {
    fn new<F>(responder: F) -> Self
    where
        F: Fn(&PreparedRequest) -> Result<HttpResponse> + Send + Sync + 'static,
    {
        RecordingTransport {
            requests: Mutex::new(Vec::new()),
            responder: Box::new(responder),
        }
    }

    fn ok() -> Self {
        Self::new(|_| Ok(HttpResponse::new(200, "{}")))
    }

    fn requests(&self) -> Vec<PreparedRequest> {
        self.requests.lock().clone()
    }
}

impl Transport for RecordingTransport {
    fn execute(&self, request: &PreparedRequest) -> Result<HttpResponse> {
        self.requests.lock().push(request.clone());
        (self.responder)(request)
    }
}

const ENDPOINT: &str = "http://localhost:8080";
const FAR_FUTURE_SECS: i64 = 9_999_999_999;

fn client(access: &str, secret: Option<&str>, transport: RecordingTransport) -> ParaClient<RecordingTransport> {
    ParaClient::with_transport(
        Credentials::new(access, secret.map(str::to_string)),
        Config::new(ENDPOINT),
        transport,
    )
}

fn jwt(claims: &str) -> String {
    format!(
        "{}.{}.signature",
        URL_SAFE_NO_PAD.encode(r#"{"alg":"HS256"}"#),
        URL_SAFE_NO_PAD.encode(claims)
    )
}

/// A token that expires far in the future but whose refresh time has passed
fn refresh_due_jwt() -> String {
    jwt(&format!(r#"{{"exp":{},"refresh":1000000000}}"#, FAR_FUTURE_SECS))
}

fn jwt_body(token: &str) -> String {
    format!(
        r#"{{"user":{{"id":"u1","type":"user"}},"jwt":{{"access_token":"{}","expires":{},"refresh":{}}}}}"#,
        token,
        FAR_FUTURE_SECS * 1000,
        FAR_FUTURE_SECS * 1000
    )
}

fn is_refresh_call(request: &PreparedRequest) -> bool {
    request.method == Method::GET && request.url == format!("{}{}", ENDPOINT, JWT_PATH)
}

fn get(path: &str) -> RequestDescriptor {
    RequestDescriptor::new(Method::GET, path)
}

/// Recompute the signature a request should carry
fn expected_signature(access: &str, secret: &str, request: &PreparedRequest, signed_url: &str) -> String {
    let date = request.header("X-Amz-Date").expect("X-Amz-Date header");
    let now = NaiveDateTime::parse_from_str(date, "%Y%m%dT%H%M%SZ")
        .unwrap()
        .and_utc();
    RequestSigner::new("para", "us-east-1")
        .sign_at(
            access,
            secret,
            &request.method,
            &Url::parse(signed_url).unwrap(),
            request.body.as_deref().unwrap_or_default(),
            now,
        )
        .unwrap()
        .authorization
}

/// Authorization header built by hand from an already canonical URI and query
fn hand_signed_authorization(
    access: &str,
    secret: &str,
    request: &PreparedRequest,
    canonical_uri: &str,
    canonical_query: &str,
) -> String {
    let date = request.header("X-Amz-Date").expect("X-Amz-Date header");
    let day = &date[..8];
    let body_hash = format!("{:x}", Sha256::digest(request.body.as_deref().unwrap_or_default()));
    let canonical_request = format!(
        "{}\n{}\n{}\nhost:localhost:8080\nx-amz-date:{}\n\nhost;x-amz-date\n{}",
        request.method, canonical_uri, canonical_query, date, body_hash
    );
    let scope = format!("{}/us-east-1/para/aws4_request", day);
    let string_to_sign = format!(
        "AWS4-HMAC-SHA256\n{}\n{}\n{:x}",
        date,
        scope,
        Sha256::digest(canonical_request.as_bytes())
    );
    let key = signing_key(secret, day, "us-east-1", "para").unwrap();
    let mut mac = Hmac::<Sha256>::new_from_slice(&key).unwrap();
    mac.update(string_to_sign.as_bytes());
    let signature: String = mac
        .finalize()
        .into_bytes()
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect();
    format!(
        "AWS4-HMAC-SHA256 Credential={}/{}, SignedHeaders=host;x-amz-date, Signature={}",
        access, scope, signature
    )
}

#[test]
fn anonymous_call_carries_access_key_only() {
    let client = client("A", None, RecordingTransport::ok());

    let response = client.dispatch(get("/v1/_me")).unwrap();
    assert_eq!(response.status, 200);

    let requests = client.transport().requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].header("Authorization"), Some("Anonymous A"));
    assert_eq!(requests[0].header("X-Amz-Date"), None);
}

#[test]
fn blank_access_key_fails_before_dispatch() {
    let anonymous = client("", None, RecordingTransport::ok());
    let signed = client("", Some("S"), RecordingTransport::ok());
    let bearer = client("", Some("S"), RecordingTransport::ok());
    bearer.set_access_token(&refresh_due_jwt());

    for c in [&anonymous, &signed, &bearer] {
        for _ in 0..2 {
            let result = c.dispatch(get("/v1/_me"));
            assert!(matches!(result, Err(ParaError::MissingAccessKey)));
        }
        assert!(c.transport().requests().is_empty());
    }
}

#[test]
fn signed_call_signs_canonical_query_but_sends_original() {
    let client = client("A", Some("S"), RecordingTransport::ok());
    let request = get("/v1/dog").with_query(vec![
        ("a".to_string(), "1".to_string()),
        ("b".to_string(), "2".to_string()),
        ("a".to_string(), "3".to_string()),
    ]);

    client.dispatch(request).unwrap();

    let sent = &client.transport().requests()[0];
    assert_eq!(sent.url, "http://localhost:8080/v1/dog?a=1&b=2&a=3");
    assert_eq!(
        sent.header("Authorization").unwrap(),
        expected_signature("A", "S", sent, "http://localhost:8080/v1/dog?a=1&b=2")
    );
}

#[test]
fn signed_call_rewrites_plus_to_percent_20() {
    let client = client("A", Some("S"), RecordingTransport::ok());
    let request = get("/v1/search/query").with_query(vec![("q".to_string(), "big dog".to_string())]);

    client.dispatch(request).unwrap();

    let sent = &client.transport().requests()[0];
    assert_eq!(sent.url, "http://localhost:8080/v1/search/query?q=big%20dog");
    assert_eq!(
        sent.header("Authorization").unwrap(),
        expected_signature("A", "S", sent, &sent.url)
    );
    assert!(sent.header("X-Amz-Content-Sha256").is_some());
}

#[test]
fn bearer_token_wins_over_signing() {
    let client = client("A", Some("S"), RecordingTransport::ok());
    let token = jwt(&format!(r#"{{"exp":{}}}"#, FAR_FUTURE_SECS));
    client.set_access_token(&token);

    client.dispatch(get("/v1/_me")).unwrap();

    let requests = client.transport().requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(
        requests[0].header("Authorization"),
        Some(format!("Bearer {}", token).as_str())
    );
    assert_eq!(requests[0].header("X-Amz-Date"), None);
}

#[test]
fn due_token_is_refreshed_once_before_the_call() {
    let transport = RecordingTransport::new(|request| {
        if is_refresh_call(request) {
            Ok(HttpResponse::new(200, jwt_body("fresh")))
        } else {
            Ok(HttpResponse::new(200, "{}"))
        }
    });
    let client = client("A", None, transport);
    let old = refresh_due_jwt();
    client.set_access_token(&old);

    client.dispatch(get("/v1/_me")).unwrap();
    client.dispatch(get("/v1/dog")).unwrap();

    let requests = client.transport().requests();
    assert_eq!(requests.len(), 3);
    assert!(is_refresh_call(&requests[0]));
    assert_eq!(
        requests[0].header("Authorization"),
        Some(format!("Bearer {}", old).as_str())
    );
    assert_eq!(requests[1].header("Authorization"), Some("Bearer fresh"));
    assert_eq!(requests[2].header("Authorization"), Some("Bearer fresh"));

    let state = client.token_state();
    let token = state.token().unwrap();
    assert_eq!(token.expires_at, Some(FAR_FUTURE_SECS * 1000));
    assert_eq!(client.access_token().as_deref(), Some("fresh"));
}

#[test]
fn rejected_refresh_clears_token_but_call_keeps_old_header() {
    let transport = RecordingTransport::new(|request| {
        if is_refresh_call(request) {
            Ok(HttpResponse::new(401, r#"{"code":401,"message":"expired"}"#))
        } else {
            Ok(HttpResponse::new(200, "{}"))
        }
    });
    let client = client("A", None, transport);
    let old = refresh_due_jwt();
    client.set_access_token(&old);

    client.dispatch(get("/v1/_me")).unwrap();

    let requests = client.transport().requests();
    assert_eq!(requests.len(), 2);
    assert_eq!(
        requests[1].header("Authorization"),
        Some(format!("Bearer {}", old).as_str())
    );
    assert!(client.token_state().token().is_none());
    assert_eq!(client.access_token(), None);

    // the next call no longer has a token to send
    client.dispatch(get("/v1/_me")).unwrap();
    let requests = client.transport().requests();
    assert_eq!(requests.len(), 3);
    assert_eq!(requests[2].header("Authorization"), Some("Anonymous A"));
}

#[test]
fn failed_refresh_transport_clears_token() {
    let transport = RecordingTransport::new(|request| {
        if is_refresh_call(request) {
            Err(ParaError::RequestBuild("network unreachable".to_string()))
        } else {
            Ok(HttpResponse::new(200, "{}"))
        }
    });
    let client = client("A", Some("S"), transport);
    client.set_access_token(&refresh_due_jwt());

    client.dispatch(get("/v1/_me")).unwrap();
    assert!(client.token_state().token().is_none());

    client.dispatch(get("/v1/_me")).unwrap();
    let requests = client.transport().requests();
    assert_eq!(requests.len(), 3);
    assert!(requests[2]
        .header("Authorization")
        .unwrap()
        .starts_with("AWS4-HMAC-SHA256 Credential=A/"));
}

#[test]
fn refresh_call_itself_does_not_refresh() {
    let client = client("A", None, RecordingTransport::ok());
    client.set_access_token(&refresh_due_jwt());

    client.dispatch(get(JWT_PATH)).unwrap();

    let requests = client.transport().requests();
    assert_eq!(requests.len(), 1);
    assert!(client.access_token().is_some());
}

#[test]
fn token_without_claims_is_never_refreshed() {
    let client = client("A", None, RecordingTransport::ok());
    client.set_access_token("opaque-token");

    client.dispatch(get("/v1/_me")).unwrap();
    assert!(!client.refresh_token());

    let requests = client.transport().requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].header("Authorization"), Some("Bearer opaque-token"));
}

#[test]
fn explicit_refresh_token() {
    let transport = RecordingTransport::new(|_| Ok(HttpResponse::new(200, jwt_body("fresh"))));
    let client = client("A", None, transport);
    client.set_access_token(&refresh_due_jwt());

    assert!(client.refresh_token());
    assert_eq!(client.access_token().as_deref(), Some("fresh"));
    // new refresh time lies in the future
    assert!(!client.refresh_token());
    assert_eq!(client.transport().requests().len(), 1);
}

#[test]
fn concurrent_calls_refresh_only_once() {
    let transport = RecordingTransport::new(|request| {
        if is_refresh_call(request) {
            Ok(HttpResponse::new(200, jwt_body("fresh")))
        } else {
            Ok(HttpResponse::new(200, "{}"))
        }
    });
    let client = Arc::new(client("A", None, transport));
    client.set_access_token(&refresh_due_jwt());

    let handles: Vec<_> = (0..8)
        .map(|i| {
            let client = Arc::clone(&client);
            thread::spawn(move || {
                client.dispatch(get(&format!("/v1/dog/{}", i))).unwrap();
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let requests = client.transport().requests();
    assert_eq!(requests.len(), 9);
    assert_eq!(requests.iter().filter(|r| is_refresh_call(r)).count(), 1);
    assert!(requests
        .iter()
        .filter(|r| !is_refresh_call(r))
        .all(|r| r.header("Authorization") == Some("Bearer fresh")));
}

#[test]
fn sign_in_stores_token_and_failure_clears_it() {
    let transport = RecordingTransport::new(|request| {
        let body = request.body.as_deref().unwrap_or_default();
        if String::from_utf8_lossy(body).contains("good-token") {
            Ok(HttpResponse::new(200, jwt_body("session")))
        } else {
            Ok(HttpResponse::new(400, r#"{"code":400,"message":"bad token"}"#))
        }
    });
    let client = client("app:test", None, transport);

    let user = client.sign_in("facebook", "good-token", true).unwrap().unwrap();
    assert_eq!(user.id(), Some("u1"));
    assert_eq!(client.access_token().as_deref(), Some("session"));

    let sent = &client.transport().requests()[0];
    assert_eq!(sent.method, Method::POST);
    assert_eq!(sent.url, "http://localhost:8080/jwt_auth");
    let body: serde_json::Value = serde_json::from_slice(sent.body.as_deref().unwrap()).unwrap();
    assert_eq!(body["appid"], "app:test");
    assert_eq!(body["provider"], "facebook");

    assert!(client.sign_in("facebook", "bad", true).unwrap().is_none());
    assert_eq!(client.access_token(), None);
}

#[test]
fn sign_in_without_remember_keeps_state() {
    let transport = RecordingTransport::new(|_| Ok(HttpResponse::new(200, jwt_body("session"))));
    let client = client("app:test", Some("S"), transport);

    assert!(client.sign_in("google", "tok", false).unwrap().is_some());
    assert_eq!(client.access_token(), None);

    client.set_access_token("opaque");
    client.sign_out();
    assert_eq!(client.access_token(), None);
}

#[test]
fn new_keys_rotates_secret() {
    let transport = RecordingTransport::new(|request| {
        if request.url.ends_with("/v1/_newkeys") {
            Ok(HttpResponse::new(200, r#"{"accessKey":"A","secretKey":"S2"}"#))
        } else {
            Ok(HttpResponse::new(200, "{}"))
        }
    });
    let client = client("A", Some("S"), transport);

    let keys = client.new_keys().unwrap().unwrap();
    assert_eq!(keys["secretKey"], "S2");

    client.dispatch(get("/v1/_me")).unwrap();
    let requests = client.transport().requests();
    let sent = &requests[1];
    assert_eq!(
        sent.header("Authorization").unwrap(),
        expected_signature("A", "S2", sent, &sent.url)
    );
    assert_ne!(
        sent.header("Authorization").unwrap(),
        expected_signature("A", "S", sent, &sent.url)
    );
}

#[test]
fn list_with_selected_fields_signs_first_select_only() {
    let transport = RecordingTransport::new(|_| {
        Ok(HttpResponse::new(
            200,
            r#"{"items":[{"id":"1","type":"dog"},{"id":"2","type":"dog"}],"totalHits":2}"#,
        ))
    });
    let client = client("A", Some("S"), transport);
    let mut pager = Pager::new(1, 10);
    pager.select = vec!["id".to_string(), "name".to_string()];

    let items = client.list("dog", Some(&mut pager)).unwrap();
    assert_eq!(items.len(), 2);
    assert_eq!(pager.count, 2);

    let sent = &client.transport().requests()[0];
    assert_eq!(
        sent.url,
        "http://localhost:8080/v1/dog?page=1&desc=true&limit=10&sort=timestamp&select=id&select=name"
    );
    assert_eq!(
        sent.header("Authorization").unwrap(),
        expected_signature(
            "A",
            "S",
            sent,
            "http://localhost:8080/v1/dog?page=1&desc=true&limit=10&sort=timestamp&select=id"
        )
    );
}

#[test]
fn server_errors_pass_through_dispatch() {
    let transport = RecordingTransport::new(|_| Ok(HttpResponse::new(403, r#"{"code":403,"message":"no"}"#)));
    let client = client("A", Some("S"), transport);

    let response = client.dispatch(get("/v1/_me")).unwrap();
    assert_eq!(response.status, 403);

    let error = client.me(None).unwrap_err();
    assert!(error.is_permission_denied());
}

#[test]
fn me_with_explicit_jwt_bypasses_client_state() {
    let transport = RecordingTransport::new(|_| Ok(HttpResponse::new(200, r#"{"id":"u9","type":"user"}"#)));
    let client = client("A", Some("S"), transport);

    let me = client.me(Some("other-token")).unwrap().unwrap();
    assert_eq!(me.id(), Some("u9"));

    let sent = &client.transport().requests()[0];
    assert_eq!(sent.url, "http://localhost:8080/v1/_me");
    assert_eq!(sent.header("Authorization"), Some("Bearer other-token"));
    assert_eq!(client.access_token(), None);
}

#[test]
fn escaped_path_is_signed_double_encoded() {
    let client = client("A", Some("S"), RecordingTransport::ok());

    client.read(Some("dog"), "a b").unwrap();

    let sent = &client.transport().requests()[0];
    assert_eq!(sent.url, "http://localhost:8080/v1/dog/a%20b");
    assert_eq!(
        sent.header("Authorization").unwrap(),
        hand_signed_authorization("A", "S", sent, "/v1/dog/a%2520b", "")
    );
    assert_ne!(
        sent.header("Authorization").unwrap(),
        hand_signed_authorization("A", "S", sent, "/v1/dog/a%20b", "")
    );
}

#[test]
fn batch_create_and_update_send_json_arrays() {
    let transport = RecordingTransport::new(|request| {
        let body = if request.method == Method::POST {
            r#"[{"id":"1","type":"dog"},{"id":"2","type":"dog"}]"#
        } else {
            r#"[{"id":"1","type":"dog","name":"Max"}]"#
        };
        Ok(HttpResponse::new(200, body))
    });
    let client = client("A", Some("S"), transport);

    let mut rex = ParaObject::new(None, "dog");
    rex.set("name", "Rex");
    let created = client
        .create_all(&[rex, ParaObject::new(None, "dog")])
        .unwrap();
    assert_eq!(created.len(), 2);
    assert_eq!(created[1].id(), Some("2"));

    let mut max = created[0].clone();
    max.set("name", "Max");
    let updated = client.update_all(&[max]).unwrap();
    assert_eq!(updated[0].name(), Some("Max"));

    let requests = client.transport().requests();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[0].method, Method::POST);
    assert_eq!(requests[0].url, "http://localhost:8080/v1/_batch");
    let posted: serde_json::Value = serde_json::from_slice(requests[0].body.as_ref().unwrap()).unwrap();
    assert_eq!(posted.as_array().unwrap().len(), 2);
    assert_eq!(posted[0]["name"], "Rex");
    assert_eq!(requests[1].method, Method::PATCH);
    assert_eq!(requests[1].url, "http://localhost:8080/v1/_batch");
}

#[test]
fn batch_read_sends_every_id_but_signs_the_first() {
    let transport = RecordingTransport::new(|_| {
        Ok(HttpResponse::new(200, r#"[{"id":"1","type":"dog"},{},{"id":"2","type":"cat"}]"#))
    });
    let client = client("A", Some("S"), transport);

    let items = client.read_all(&["1".to_string(), "2".to_string()]).unwrap();
    assert_eq!(items.len(), 2);
    assert_eq!(items[1].object_type(), "cat");

    let sent = &client.transport().requests()[0];
    assert_eq!(sent.method, Method::GET);
    assert_eq!(sent.url, "http://localhost:8080/v1/_batch?ids=1&ids=2");
    assert_eq!(
        sent.header("Authorization").unwrap(),
        expected_signature("A", "S", sent, "http://localhost:8080/v1/_batch?ids=1")
    );
}

#[test]
fn batch_delete_sends_ids_as_query() {
    let transport = RecordingTransport::new(|_| Ok(HttpResponse::new(200, "[]")));
    let client = client("A", Some("S"), transport);

    client
        .delete_all(&["1".to_string(), "2".to_string(), "3".to_string()])
        .unwrap();

    let sent = &client.transport().requests()[0];
    assert_eq!(sent.method, Method::DELETE);
    assert_eq!(sent.url, "http://localhost:8080/v1/_batch?ids=1&ids=2&ids=3");
    assert!(sent.body.is_none());
}

#[test]
fn empty_batches_make_no_calls() {
    let client = client("A", Some("S"), RecordingTransport::ok());

    assert!(client.create_all(&[]).unwrap().is_empty());
    assert!(client.read_all(&[]).unwrap().is_empty());
    assert!(client.update_all(&[]).unwrap().is_empty());
    client.delete_all(&[]).unwrap();

    assert!(client.transport().requests().is_empty());
}

#[test]
fn types_and_type_counts() {
    let transport = RecordingTransport::new(|request| {
        if request.url.ends_with("count=true") {
            Ok(HttpResponse::new(200, r#"{"dog":3,"cat":1}"#))
        } else {
            Ok(HttpResponse::new(200, r#"{"dogs":"dog","cats":"cat"}"#))
        }
    });
    let client = client("A", Some("S"), transport);

    let types = client.types().unwrap().unwrap();
    assert_eq!(types["dogs"], "dog");
    let counts = client.types_count().unwrap().unwrap();
    assert_eq!(counts["dog"], 3);

    let requests = client.transport().requests();
    assert_eq!(requests[0].url, "http://localhost:8080/v1/_types");
    assert_eq!(requests[1].url, "http://localhost:8080/v1/_types?count=true");
}

#[test]
fn app_reads_authenticated_app() {
    let transport = RecordingTransport::new(|_| Ok(HttpResponse::new(200, r#"{"id":"app:A","type":"app"}"#)));
    let client = client("app:A", None, transport);

    let app = client.app().unwrap().unwrap();
    assert_eq!(app.object_type(), "app");

    let sent = &client.transport().requests()[0];
    assert_eq!(sent.url, "http://localhost:8080/v1/_me");
    assert_eq!(sent.header("Authorization"), Some("Anonymous app:A"));
}
