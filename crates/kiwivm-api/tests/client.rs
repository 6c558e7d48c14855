use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::sync::{Arc, Mutex};

use axum::Router;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::IntoResponse;
use axum::routing::get;
use kiwivm_api::{Error, KiwiClient};

const API_KEY: &str = "private_test_key_abc123";
const VEID: u64 = 123456;

type Recorded = Vec<(String, Vec<(String, String)>)>;

#[derive(Clone, Default)]
struct Mock {
    routes: Arc<HashMap<String, (StatusCode, String)>>,
    seen: Arc<Mutex<Recorded>>,
    headers: Arc<Mutex<Vec<HeaderMap>>>,
}

impl Mock {
    fn requests(&self) -> Recorded {
        self.seen.lock().unwrap().clone()
    }

    fn last_headers(&self) -> HeaderMap {
        self.headers
            .lock()
            .unwrap()
            .last()
            .cloned()
            .expect("no request recorded")
    }

    fn params_for(&self, op: &str) -> Vec<(String, String)> {
        self.requests()
            .into_iter()
            .find(|(seen, _)| seen == op)
            .map(|(_, params)| params)
            .unwrap_or_else(|| panic!("no request recorded for {op}"))
    }
}

fn param<'a>(params: &'a [(String, String)], key: &str) -> Option<&'a str> {
    params
        .iter()
        .find(|(k, _)| k == key)
        .map(|(_, v)| v.as_str())
}

async fn handle(
    State(mock): State<Mock>,
    Path(op): Path<String>,
    Query(params): Query<Vec<(String, String)>>,
    headers: HeaderMap,
) -> impl IntoResponse {
    mock.seen.lock().unwrap().push((op.clone(), params));
    mock.headers.lock().unwrap().push(headers);
    let (status, body) = mock
        .routes
        .get(&op)
        .cloned()
        .unwrap_or((StatusCode::OK, r#"{"error": 0}"#.to_string()));
    (status, [(header::CONTENT_TYPE, "application/json")], body)
}

/// Serve canned bodies keyed by operation name; unknown operations answer
/// `{"error": 0}`.
async fn serve(routes: &[(&str, StatusCode, &str)]) -> (KiwiClient, Mock) {
    let mock = Mock {
        routes: Arc::new(
            routes
                .iter()
                .map(|(op, status, body)| (op.to_string(), (*status, body.to_string())))
                .collect(),
        ),
        seen: Arc::default(),
        headers: Arc::default(),
    };

    let app = Router::new()
        .route("/v1/{*op}", get(handle))
        .with_state(mock.clone());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    let client = KiwiClient::new(API_KEY, VEID).with_base_url(format!("http://{addr}/v1/"));
    (client, mock)
}

/// Like [`serve`], with every canned body answered as HTTP 200.
async fn serve_json(routes: &[(&str, &str)]) -> (KiwiClient, Mock) {
    let routes: Vec<(&str, StatusCode, &str)> = routes
        .iter()
        .map(|&(op, body)| (op, StatusCode::OK, body))
        .collect();
    serve(&routes).await
}

// ── Envelope and transport ──────────────────────────────────────────

#[tokio::test]
async fn service_info_decodes_mixed_number_encodings() {
    let (client, mock) = serve_json(&[(
        "getServiceInfo",
        r#"{
            "error": 0,
            "hostname": "box.example.com",
            "node_location": "US, California",
            "plan_disk": "21474836480",
            "plan_ram": 1073741824,
            "plan_monthly_data": "1099511627776",
            "data_counter": 52428800,
            "monthly_data_multiplier": 1,
            "data_next_reset": "",
            "ip_addresses": ["203.0.113.7", "2001:db8:1:2::"],
            "ptr": [],
            "suspended": false
        }"#,
    )])
    .await;

    let info = client.get_service_info().await.unwrap();

    assert_eq!(info.hostname, "box.example.com");
    assert_eq!(info.plan_disk.get(), 21_474_836_480);
    assert_eq!(info.plan_ram.get(), 1_073_741_824);
    assert_eq!(info.data_next_reset.get(), 0);
    assert_eq!(info.ip_addresses.len(), 2);
    assert!(info.ptr.is_empty());

    let headers = mock.last_headers();
    assert_eq!(headers[header::ACCEPT], "application/json");
    let agent = headers[header::USER_AGENT].to_str().unwrap();
    assert_eq!(agent, concat!("bwh/", env!("CARGO_PKG_VERSION")));

    let params = mock.params_for("getServiceInfo");
    assert_eq!(param(&params, "veid"), Some("123456"));
    assert_eq!(param(&params, "api_key"), Some(API_KEY));
    assert_eq!(params.iter().filter(|(k, _)| k == "veid").count(), 1);
}

#[tokio::test]
async fn auth_failure_is_typed() {
    let (client, _) = serve_json(&[(
        "getServiceInfo",
        r#"{"error": 700005, "message": "Authentication failure"}"#,
    )])
    .await;

    let err = client.get_service_info().await.unwrap_err();
    assert!(err.is_auth_failure());
    assert!(!err.is_locked());
    assert_eq!(err.api_error().unwrap().message, "Authentication failure");
}

#[tokio::test]
async fn locked_error_carries_progress() {
    let (client, _) = serve_json(&[(
        "restart",
        r#"{
            "error": "788888",
            "message": "VE is currently locked",
            "additionalErrorInfo": "Reinstalling OS",
            "additionalLockingInfo": {
                "completed_percent": 30,
                "friendly_progress_message": "Unpacking template",
                "last_status_update_s_ago": 0
            }
        }"#,
    )])
    .await;

    let err = client.restart().await.unwrap_err();
    assert!(err.is_locked());
    assert_eq!(
        err.api_error().unwrap().to_string(),
        "788888: VE is currently locked\nOperation: Reinstalling OS\nProgress: 30% complete - Unpacking template"
    );
}

#[tokio::test]
async fn non_200_is_a_status_error() {
    let (client, _) = serve(&[("stop", StatusCode::BAD_GATEWAY, "upstream down")]).await;

    let err = client.stop().await.unwrap_err();
    match err {
        Error::Status { endpoint, status } => {
            assert_eq!(endpoint, "stop");
            assert_eq!(status, StatusCode::BAD_GATEWAY);
        }
        other => panic!("expected status error, got {other:?}"),
    }
}

#[tokio::test]
async fn malformed_body_is_a_decode_error() {
    let (client, _) = serve_json(&[("getRateLimitStatus", "<html>maintenance</html>")]).await;

    let err = client.get_rate_limit_status().await.unwrap_err();
    assert!(matches!(err, Error::Decode { ref endpoint, .. } if endpoint == "getRateLimitStatus"));
    assert!(err.is_transport());
}

#[tokio::test]
async fn unreachable_host_is_a_request_error() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let client = KiwiClient::new(API_KEY, VEID).with_base_url(format!("http://{addr}/v1"));
    let err = client.start().await.unwrap_err();
    assert!(matches!(err, Error::Request { .. }));
}

// ── Operations ──────────────────────────────────────────────────────

#[tokio::test]
async fn backups_get_their_token_injected() {
    let (client, _) = serve_json(&[(
        "backup/list",
        r#"{
            "error": 0,
            "backups": {
                "0123456789abcdef0123456789abcdef01234567": {
                    "size": "734003200", "os": "debian-12-x86_64", "md5": "d41d8cd9", "timestamp": 1700000000
                }
            }
        }"#,
    )])
    .await;

    let backups = client.list_backups().await.unwrap();
    let (token, backup) = backups.iter().next().unwrap();
    assert_eq!(&backup.token, token);
    assert_eq!(backup.size, 734_003_200);
    assert_eq!(backup.os, "debian-12-x86_64");
}

#[tokio::test]
async fn malformed_backup_token_sends_nothing() {
    let (client, mock) = serve(&[]).await;

    let err = client.copy_backup_to_snapshot("ABCDEF").await.unwrap_err();
    assert!(matches!(err, Error::Invalid(_)));
    assert!(mock.requests().is_empty());
}

#[tokio::test]
async fn ssh_keys_are_validated_then_newline_joined() {
    let (client, mock) = serve(&[]).await;

    let err = client
        .update_ssh_keys(&["ssh-ed25519 AAAA me", "rsa AAAA"])
        .await
        .unwrap_err();
    assert!(err.to_string().contains("position 2"));
    assert!(mock.requests().is_empty());

    // A second line smuggled inside one entry is not checked as its own key.
    let err = client
        .update_ssh_keys(&["ssh-rsa AAAA me\nnot-a-key garbage"])
        .await
        .unwrap_err();
    assert!(err.to_string().contains("position 1"));
    assert!(mock.requests().is_empty());

    client
        .update_ssh_keys(&["ssh-ed25519 AAAA me", "ssh-rsa BBBB you"])
        .await
        .unwrap();
    let params = mock.params_for("updateSshKeys");
    assert_eq!(
        param(&params, "ssh_keys"),
        Some("ssh-ed25519 AAAA me\nssh-rsa BBBB you\n")
    );
}

#[tokio::test]
async fn unknown_os_template_never_reaches_reinstall() {
    let (client, mock) = serve_json(&[(
        "getAvailableOS",
        r#"{"error": 0, "installed": "debian-12-x86_64", "templates": ["debian-12-x86_64", "ubuntu-24.04-x86_64"]}"#,
    )])
    .await;

    let err = client.reinstall_os("windows-xp").await.unwrap_err();
    assert!(matches!(err, Error::Invalid(_)));
    let ops: Vec<String> = mock.requests().into_iter().map(|(op, _)| op).collect();
    assert_eq!(ops, vec!["getAvailableOS"]);

    client.reinstall_os("ubuntu-24.04-x86_64").await.unwrap();
    assert_eq!(
        param(&mock.params_for("reinstallOS"), "os"),
        Some("ubuntu-24.04-x86_64")
    );
}

#[tokio::test]
async fn reinstall_with_fetched_templates_lists_them_once() {
    let (client, mock) = serve_json(&[(
        "getAvailableOS",
        r#"{"error": 0, "installed": "debian-12-x86_64", "templates": ["debian-12-x86_64", "ubuntu-24.04-x86_64"]}"#,
    )])
    .await;

    let available = client.get_available_os().await.unwrap();
    let err = client
        .reinstall_os_checked("windows-xp", &available)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Invalid(_)));

    client
        .reinstall_os_checked("ubuntu-24.04-x86_64", &available)
        .await
        .unwrap();

    let ops: Vec<String> = mock.requests().into_iter().map(|(op, _)| op).collect();
    assert_eq!(ops, vec!["getAvailableOS", "reinstallOS"]);
}

#[tokio::test]
async fn ipv6_delete_sends_bare_subnet() {
    let (client, mock) = serve(&[]).await;

    client.delete_ipv6(" 2001:db8:abcd:12::/64 ").await.unwrap();
    assert_eq!(
        param(&mock.params_for("ipv6/delete"), "ip"),
        Some("2001:db8:abcd:12::")
    );

    let err = client.delete_ipv6("203.0.113.7").await.unwrap_err();
    assert!(matches!(err, Error::Invalid(_)));
    assert_eq!(mock.requests().len(), 1);
}

#[tokio::test]
async fn snapshot_sticky_and_import_parameters() {
    let (client, mock) = serve(&[]).await;

    client
        .toggle_snapshot_sticky("backup-1.tar.gz", true)
        .await
        .unwrap();
    let params = mock.params_for("snapshot/toggleSticky");
    assert_eq!(param(&params, "snapshot"), Some("backup-1.tar.gz"));
    assert_eq!(param(&params, "sticky"), Some("1"));

    client.import_snapshot(987654, "tok123").await.unwrap();
    let params = mock.params_for("snapshot/import");
    assert_eq!(param(&params, "sourceVeid"), Some("987654"));
    assert_eq!(param(&params, "sourceToken"), Some("tok123"));
    // Identity stays ours even though a foreign VEID is passed along.
    assert_eq!(param(&params, "veid"), Some("123456"));
}

#[tokio::test]
async fn private_ip_assignment_omits_address_when_unspecified() {
    let (client, mock) = serve_json(&[(
        "privateIp/assign",
        r#"{"error": 0, "assigned_ips": ["10.8.0.12"]}"#,
    )])
    .await;

    let assigned = client.assign_private_ip(None).await.unwrap();
    assert_eq!(assigned, vec!["10.8.0.12"]);
    assert_eq!(param(&mock.params_for("privateIp/assign"), "ip"), None);

    client
        .delete_private_ip(Ipv4Addr::new(10, 8, 0, 12))
        .await
        .unwrap();
    assert_eq!(
        param(&mock.params_for("privateIp/delete"), "ip"),
        Some("10.8.0.12")
    );
}

#[tokio::test]
async fn migration_start_returns_new_ips() {
    let (client, mock) = serve_json(&[(
        "migrate/start",
        r#"{"error": 0, "notificationEmail": "ops@example.com", "newIps": ["198.51.100.4", "2001:db8:ff::"]}"#,
    )])
    .await;

    let resp = client
        .start_migration("JPOS_1", kiwivm_api::DEFAULT_MIGRATION_TIMEOUT)
        .await
        .unwrap();
    let (v4, v6) = resp.ip_families();
    assert_eq!(v4, vec!["198.51.100.4"]);
    assert_eq!(v6, vec!["2001:db8:ff::"]);
    assert_eq!(
        param(&mock.params_for("migrate/start"), "location"),
        Some("JPOS_1")
    );
}
