//! Edge client against a mock control plane

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, patch, post, put};
use axum::{Json, Router};
use secrecy::SecretString;
use serde_json::{json, Value};

use boop_engine::edge::dns::DnsRecord;
use boop_engine::edge::{EdgeClient, EdgeOptions, EdgeRouting};
use boop_engine::models::domain::DomainStatus;

const TOKEN: &str = "edge-token";

#[derive(Default)]
struct MockEdge {
    kv: Mutex<HashMap<String, String>>,
    kv_puts: AtomicUsize,
    zone_lookups: AtomicUsize,
    dns: Mutex<Vec<DnsRecord>>,
    dns_creates: AtomicUsize,
    dns_patches: AtomicUsize,
    fallback_puts: AtomicUsize,
    hostnames: Mutex<HashMap<String, Value>>,
    next_id: AtomicUsize,
}

type Shared = Arc<MockEdge>;

fn ok(result: Value) -> Response {
    Json(json!({ "success": true, "errors": [], "result": result })).into_response()
}

fn failure(message: &str) -> Response {
    Json(json!({ "success": false, "errors": [{ "message": message }], "result": null })).into_response()
}

fn authorized(headers: &HeaderMap) -> bool {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v == format!("Bearer {}", TOKEN))
}

async fn kv_put(
    State(mock): State<Shared>,
    Path((_account, _ns, key)): Path<(String, String, String)>,
    headers: HeaderMap,
    body: String,
) -> Response {
    if !authorized(&headers) {
        return StatusCode::FORBIDDEN.into_response();
    }
    mock.kv_puts.fetch_add(1, Ordering::SeqCst);
    mock.kv.lock().unwrap().insert(key, body);
    ok(Value::Null)
}

async fn kv_get(State(mock): State<Shared>, Path((_account, _ns, key)): Path<(String, String, String)>) -> Response {
    match mock.kv.lock().unwrap().get(&key) {
        Some(value) => value.clone().into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn kv_delete(
    State(mock): State<Shared>,
    Path((_account, _ns, key)): Path<(String, String, String)>,
) -> Response {
    match mock.kv.lock().unwrap().remove(&key) {
        Some(_) => ok(Value::Null),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn zones(State(mock): State<Shared>, Query(query): Query<HashMap<String, String>>) -> Response {
    mock.zone_lookups.fetch_add(1, Ordering::SeqCst);
    match query.get("name").map(String::as_str) {
        Some("boop.cat") => ok(json!([{ "id": "zone-1", "name": "boop.cat" }])),
        _ => ok(json!([])),
    }
}

async fn dns_list(State(mock): State<Shared>, Query(query): Query<HashMap<String, String>>) -> Response {
    let name = query.get("name").cloned().unwrap_or_default();
    let records: Vec<DnsRecord> = mock
        .dns
        .lock()
        .unwrap()
        .iter()
        .filter(|r| r.name == name)
        .cloned()
        .collect();
    ok(json!(records))
}

async fn dns_create(State(mock): State<Shared>, Json(mut record): Json<DnsRecord>) -> Response {
    mock.dns_creates.fetch_add(1, Ordering::SeqCst);
    record.id = format!("rec-{}", mock.dns_creates.load(Ordering::SeqCst));
    mock.dns.lock().unwrap().push(record.clone());
    ok(json!(record))
}

async fn dns_patch(
    State(mock): State<Shared>,
    Path((_zone, id)): Path<(String, String)>,
    Json(update): Json<DnsRecord>,
) -> Response {
    mock.dns_patches.fetch_add(1, Ordering::SeqCst);
    let mut records = mock.dns.lock().unwrap();
    match records.iter_mut().find(|r| r.id == id) {
        Some(record) => {
            record.kind = update.kind;
            record.content = update.content;
            record.proxied = update.proxied;
            ok(json!(record))
        }
        None => failure("record not found"),
    }
}

async fn fallback_origin(State(mock): State<Shared>, Json(body): Json<Value>) -> Response {
    mock.fallback_puts.fetch_add(1, Ordering::SeqCst);
    ok(json!({ "origin": body["origin"], "status": "pending_deployment" }))
}

async fn hostname_create(State(mock): State<Shared>, Json(body): Json<Value>) -> Response {
    let hostname = body["hostname"].as_str().unwrap_or_default().to_string();
    if hostname.starts_with("taken.") {
        return failure("Duplicate custom hostname found.");
    }
    let id = format!("ch_{}", mock.next_id.fetch_add(1, Ordering::SeqCst) + 1);
    let record = json!({
        "id": id,
        "hostname": hostname,
        "status": "pending",
        "ssl": {
            "status": "pending_validation",
            "method": body["ssl"]["method"],
            "validation_records": [{ "txt_name": format!("_acme-challenge.{}", hostname), "txt_value": "tok" }]
        },
        "ownership_verification": { "type": "txt", "name": format!("_cf-custom-hostname.{}", hostname), "value": "uuid" }
    });
    mock.hostnames.lock().unwrap().insert(id, record.clone());
    ok(record)
}

async fn hostname_search(State(mock): State<Shared>, Query(query): Query<HashMap<String, String>>) -> Response {
    let wanted = query.get("hostname").cloned().unwrap_or_default();
    let matches: Vec<Value> = mock
        .hostnames
        .lock()
        .unwrap()
        .values()
        .filter(|h| h["hostname"] == wanted.as_str())
        .cloned()
        .collect();
    ok(json!(matches))
}

async fn hostname_get(State(mock): State<Shared>, Path((_zone, id)): Path<(String, String)>) -> Response {
    match mock.hostnames.lock().unwrap().get(&id) {
        Some(record) => ok(record.clone()),
        None => (StatusCode::NOT_FOUND, Json(json!({ "success": false }))).into_response(),
    }
}

async fn hostname_delete(State(mock): State<Shared>, Path((_zone, id)): Path<(String, String)>) -> Response {
    mock.hostnames.lock().unwrap().remove(&id);
    ok(json!({ "id": id }))
}

async fn start_mock(zone_id: Option<&str>) -> (Shared, EdgeClient) {
    let mock: Shared = Arc::new(MockEdge::default());
    let kv_path = "/accounts/{account}/storage/kv/namespaces/{ns}/values/{key}";
    let app = Router::new()
        .route(kv_path, put(kv_put).get(kv_get).delete(kv_delete))
        .route("/zones", get(zones))
        .route("/zones/{zone}/dns_records", get(dns_list).post(dns_create))
        .route("/zones/{zone}/dns_records/{id}", patch(dns_patch))
        .route("/zones/{zone}/custom_hostnames/fallback_origin", put(fallback_origin))
        .route("/zones/{zone}/custom_hostnames", post(hostname_create).get(hostname_search))
        .route("/zones/{zone}/custom_hostnames/{id}", get(hostname_get).delete(hostname_delete))
        .with_state(mock.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base = format!("http://{}", listener.local_addr().unwrap());
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    let mut options = EdgeOptions::new(SecretString::from(TOKEN), "acct-1", "ns-1");
    options.api_base = base;
    options.root_domain = "boop.cat".to_string();
    options.zone_id = zone_id.map(str::to_string);
    (mock, EdgeClient::new(options).unwrap())
}

#[tokio::test]
async fn test_routing_upserts_are_idempotent() {
    let (mock, client) = start_mock(Some("zone-1")).await;

    client.ensure_routing("blog", "s1", "d1").await.unwrap();
    client.ensure_routing("blog", "s1", "d1").await.unwrap();

    {
        let kv = mock.kv.lock().unwrap();
        assert_eq!(kv.len(), 2);
        assert_eq!(kv.get("host:blog").map(String::as_str), Some("s1"));
        assert_eq!(kv.get("current:s1").map(String::as_str), Some("d1"));
    }
    assert_eq!(client.kv_get("current:s1").await.unwrap().as_deref(), Some("d1"));

    client.ensure_routing("blog", "s1", "d2").await.unwrap();
    assert_eq!(client.kv_get("current:s1").await.unwrap().as_deref(), Some("d2"));
}

#[tokio::test]
async fn test_empty_arguments_skip_keys() {
    let (mock, client) = start_mock(Some("zone-1")).await;

    client.ensure_routing("www.example.com", "s1", "").await.unwrap();
    assert_eq!(mock.kv_puts.load(Ordering::SeqCst), 1);
    assert!(client.kv_get("current:s1").await.unwrap().is_none());

    client.ensure_routing("", "s1", "d1").await.unwrap();
    assert_eq!(mock.kv_puts.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_remove_routing_tolerates_missing_keys() {
    let (mock, client) = start_mock(Some("zone-1")).await;
    client.ensure_routing("blog", "s1", "d1").await.unwrap();
    client.ensure_routing("www.example.com", "s1", "").await.unwrap();

    client.remove_routing("blog", "s1", "www.example.com").await.unwrap();
    assert!(mock.kv.lock().unwrap().is_empty());

    // second removal hits 404s only
    client.remove_routing("blog", "s1", "www.example.com").await.unwrap();
}

#[tokio::test]
async fn test_reroute_after_removal_leaves_latest_mapping() {
    let (mock, client) = start_mock(Some("zone-1")).await;

    client.ensure_routing("blog", "s1", "d1").await.unwrap();
    client.remove_routing("blog", "s1", "").await.unwrap();
    client.ensure_routing("blog", "s1", "d2").await.unwrap();

    let kv = mock.kv.lock().unwrap().clone();
    let expected: HashMap<String, String> = [
        ("host:blog".to_string(), "s1".to_string()),
        ("current:s1".to_string(), "d2".to_string()),
    ]
    .into_iter()
    .collect();
    assert_eq!(kv, expected);
}

#[tokio::test]
async fn test_lookup_query_values_are_escaped() {
    let (_mock, client) = start_mock(Some("zone-1")).await;
    let created = client.create_custom_hostname("a&b+c.example.com").await.unwrap();

    let found = client.find_custom_hostname("a&b+c.example.com").await.unwrap();
    assert_eq!(found.map(|h| h.id), Some(created.id));
    assert!(client.find_custom_hostname("a").await.unwrap().is_none());
}

#[tokio::test]
async fn test_fallback_origin_only_patches_on_difference() {
    let (mock, client) = start_mock(Some("zone-1")).await;

    client.ensure_fallback_origin("sites.boop.cat").await.unwrap();
    assert_eq!(mock.dns_creates.load(Ordering::SeqCst), 1);
    assert_eq!(mock.dns_patches.load(Ordering::SeqCst), 0);
    assert_eq!(mock.fallback_puts.load(Ordering::SeqCst), 1);

    client.ensure_fallback_origin("sites.boop.cat").await.unwrap();
    assert_eq!(mock.dns_creates.load(Ordering::SeqCst), 1);
    assert_eq!(mock.dns_patches.load(Ordering::SeqCst), 0);
    assert_eq!(mock.fallback_puts.load(Ordering::SeqCst), 2);

    mock.dns.lock().unwrap()[0].proxied = false;
    client.ensure_fallback_origin("sites.boop.cat").await.unwrap();
    assert_eq!(mock.dns_creates.load(Ordering::SeqCst), 1);
    assert_eq!(mock.dns_patches.load(Ordering::SeqCst), 1);
    assert!(mock.dns.lock().unwrap()[0].proxied);
}

#[tokio::test]
async fn test_zone_is_resolved_once() {
    let (mock, client) = start_mock(None).await;

    assert_eq!(client.zone_id().await.unwrap(), "zone-1");
    client.ensure_fallback_origin("sites.boop.cat").await.unwrap();
    client.create_custom_hostname("www.example.com").await.unwrap();

    assert_eq!(mock.zone_lookups.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_custom_hostname_lifecycle() {
    let (mock, client) = start_mock(Some("zone-1")).await;

    let created = client.create_custom_hostname("www.example.com").await.unwrap();
    assert_eq!(created.id, "ch_1");
    assert_eq!(created.combined_status(), DomainStatus::Pending);
    let kinds: Vec<&str> = created.records.iter().map(|r| r.kind.as_str()).collect();
    assert_eq!(kinds, vec!["txt", "ssl_txt"]);

    {
        let mut hostnames = mock.hostnames.lock().unwrap();
        let record = hostnames.get_mut("ch_1").unwrap();
        record["status"] = json!("active");
        record["ssl"]["status"] = json!("active");
    }
    let fetched = client.get_custom_hostname("ch_1").await.unwrap();
    assert_eq!(fetched.combined_status(), DomainStatus::Active);

    let found = client.find_custom_hostname("www.example.com").await.unwrap();
    assert_eq!(found.map(|h| h.id).as_deref(), Some("ch_1"));
    assert!(client.find_custom_hostname("nope.example.com").await.unwrap().is_none());

    client.delete_custom_hostname("ch_1").await.unwrap();
    assert!(mock.hostnames.lock().unwrap().is_empty());
    assert!(client.get_custom_hostname("ch_1").await.is_err());
}

#[tokio::test]
async fn test_unsuccessful_envelope_is_an_error() {
    let (_mock, client) = start_mock(Some("zone-1")).await;

    let err = client.create_custom_hostname("taken.example.com").await.unwrap_err();
    assert!(err.to_string().contains("Duplicate custom hostname found."), "{err}");
}

#[tokio::test]
async fn test_unknown_zone_is_an_error() {
    let mock: Shared = Arc::new(MockEdge::default());
    let app = Router::new().route("/zones", get(zones)).with_state(mock);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base = format!("http://{}", listener.local_addr().unwrap());
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    let mut options = EdgeOptions::new(SecretString::from(TOKEN), "acct-1", "ns-1");
    options.api_base = base;
    options.root_domain = "unknown.example".to_string();
    let client = EdgeClient::new(options).unwrap();

    let err = client.zone_id().await.unwrap_err();
    assert!(err.to_string().contains("zone not found"), "{err}");
}
