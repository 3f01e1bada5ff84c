//! End-to-end tests over a loopback transport pair: two fully wired bridges
//! exchanging real envelope bytes, one playing the native host and one the
//! embedded UI.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::{json, Map, Value};

use isometry_bridge::breaker::BreakerState;
use isometry_bridge::transport::loopback;
use isometry_bridge::{Bridge, BridgeConfig, BridgeError};

/// Fake storage layer bound as the `database` collaborator.
struct NodeStore {
    rows: Vec<Value>,
    executions: AtomicU64,
    failing: std::sync::atomic::AtomicBool,
}

impl NodeStore {
    fn new(rows: Vec<Value>) -> Arc<Self> {
        Arc::new(Self {
            rows,
            executions: AtomicU64::new(0),
            failing: std::sync::atomic::AtomicBool::new(false),
        })
    }

    async fn run_filter(&self) -> isometry_bridge::Result<Value> {
        self.executions.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(BridgeError::HandlerExecution("storage unavailable".into()));
        }
        Ok(json!({
            "nodes": self.rows,
            "count": self.rows.len(),
        }))
    }
}

fn host_bridge(
    transport: impl isometry_bridge::transport::Transport,
    store: Arc<NodeStore>,
    config: BridgeConfig,
) -> Arc<Bridge> {
    Bridge::builder(transport)
        .config(config)
        .collaborator("database", store)
        .handler_fn("filters", |method, params, ctx| async move {
            match method.as_str() {
                "filters.executeFilter" => {
                    let store = ctx.collaborator::<NodeStore>("database")?;
                    let sql = params
                        .get("sql")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string();
                    let limit = params.get("limit").and_then(Value::as_u64).unwrap_or(100);
                    let offset = params.get("offset").and_then(Value::as_u64).unwrap_or(0);

                    ctx.query_gate()
                        .execute(&sql, &[], limit, offset, || async move {
                            store.run_filter().await
                        })
                        .await
                }
                other => Err(BridgeError::UnknownMethod(other.to_string())),
            }
        })
        .handler_fn("viewport", |_method, params, _ctx| async move {
            Ok(Value::Object(params))
        })
        .build()
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

/// Wires a UI-side caller bridge and a host-side serving bridge together.
fn wired(config: BridgeConfig, store: Arc<NodeStore>) -> (Arc<Bridge>, Arc<Bridge>) {
    init_tracing();
    let ((ui_transport, ui_rx), (host_transport, host_rx)) = loopback();

    let ui = Bridge::builder(ui_transport).config(config.clone()).build();
    let host = host_bridge(host_transport, store, config);

    ui.spawn_inbound(ui_rx);
    host.spawn_inbound(host_rx);
    (ui, host)
}

fn filter_params(sql: &str) -> Map<String, Value> {
    let mut params = Map::new();
    params.insert("sql".into(), json!(sql));
    params.insert("limit".into(), json!(100));
    params.insert("offset".into(), json!(0));
    params
}

#[tokio::test]
async fn test_filter_query_roundtrip_and_cache_hit() {
    let store = NodeStore::new(vec![json!({"id": 1}), json!({"id": 2})]);
    let (ui, _host) = wired(BridgeConfig::default(), Arc::clone(&store));

    let sql = "SELECT * FROM nodes WHERE folder = 'Work'";
    let first = ui
        .send("filters.executeFilter", filter_params(sql))
        .await
        .unwrap();
    assert_eq!(first["count"], json!(2));
    assert_eq!(first["cached"], json!(false));

    let second = ui
        .send("filters.executeFilter", filter_params(sql))
        .await
        .unwrap();
    assert_eq!(second["count"], json!(2));
    assert_eq!(second["cached"], json!(true));

    // The storage layer ran exactly once.
    assert_eq!(store.executions.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_out_of_order_viewport_updates_still_process() {
    let store = NodeStore::new(vec![]);
    let (ui, host) = wired(BridgeConfig::default(), store);

    let newer = ui
        .send_update("viewport.update", Map::new(), 5)
        .await
        .unwrap();
    assert_eq!(newer["sequenceId"], json!(5));

    // Stale delivery: flagged on the host, but still dispatched and answered.
    let stale = ui
        .send_update("viewport.update", Map::new(), 3)
        .await
        .unwrap();
    assert_eq!(stale["sequenceId"], json!(3));

    assert_eq!(host.sequences().last_sequence_id("viewport"), Some(5));
}

#[tokio::test(start_paused = true)]
async fn test_request_timeout_when_peer_never_answers() {
    init_tracing();
    let ((ui_transport, _ui_rx), (_host_transport, _host_rx)) = loopback();

    let config = BridgeConfig {
        request_timeout: Duration::from_millis(50),
        ..BridgeConfig::default()
    };
    let ui = Bridge::builder(ui_transport).config(config).build();

    // The host endpoint exists but nothing pumps it.
    let err = ui
        .send("filters.executeFilter", Map::new())
        .await
        .unwrap_err();
    assert!(matches!(err, BridgeError::Timeout));
    assert_eq!(ui.pending_requests(), 0);
}

#[tokio::test]
async fn test_unknown_handler_travels_the_wire() {
    let store = NodeStore::new(vec![]);
    let (ui, _host) = wired(BridgeConfig::default(), store);

    let err = ui.send("ghosts.summon", Map::new()).await.unwrap_err();
    assert_eq!(err.to_string(), "Unknown handler: ghosts");
}

#[tokio::test]
async fn test_handler_error_surfaced_verbatim_across_boundary() {
    let store = NodeStore::new(vec![]);
    store.failing.store(true, Ordering::SeqCst);
    let (ui, _host) = wired(BridgeConfig::default(), store);

    let err = ui
        .send("filters.executeFilter", filter_params("SELECT 1"))
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), "storage unavailable");
}

#[tokio::test]
async fn test_breaker_short_circuits_after_threshold() {
    let store = NodeStore::new(vec![]);
    store.failing.store(true, Ordering::SeqCst);

    let config = BridgeConfig {
        breaker_threshold: 2,
        breaker_window: Duration::from_secs(60),
        breaker_cooldown: Duration::from_secs(60),
        ..BridgeConfig::default()
    };
    let (ui, host) = wired(config, Arc::clone(&store));

    for _ in 0..2 {
        let err = ui
            .send("filters.executeFilter", filter_params("SELECT 1"))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "storage unavailable");
    }
    assert_eq!(host.breaker().state(), BreakerState::Open);

    // Third call never reaches storage.
    let before = store.executions.load(Ordering::SeqCst);
    let err = ui
        .send("filters.executeFilter", filter_params("SELECT 1"))
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), "Circuit breaker is open");
    assert_eq!(store.executions.load(Ordering::SeqCst), before);
}

#[tokio::test]
async fn test_ping_and_statistics_admin_methods() {
    let store = NodeStore::new(vec![json!({"id": 1})]);
    let (ui, _host) = wired(BridgeConfig::default(), store);

    let pong = ui.send("filters.ping", Map::new()).await.unwrap();
    assert_eq!(pong["pong"], json!(true));
    assert!(pong["timestamp"].as_u64().unwrap() > 0);

    ui.send("filters.executeFilter", filter_params("SELECT 1"))
        .await
        .unwrap();

    let stats = ui.send("filters.getStatistics", Map::new()).await.unwrap();
    assert_eq!(
        stats["operations"]["filters.executeFilter"]["count"],
        json!(1)
    );
    assert_eq!(
        stats["operations"]["filters.executeFilter"]["successRate"],
        json!(1.0)
    );
    assert_eq!(stats["breaker"]["state"], json!("closed"));
    assert_eq!(stats["cache"]["entries"], json!(1));
}

#[tokio::test]
async fn test_cancel_pending_requests_admin_method() {
    let store = NodeStore::new(vec![]);
    let (ui, _host) = wired(BridgeConfig::default(), store);

    // Nothing is pending on the host side, so the count is zero; the point
    // is that the reserved method resolves over the wire.
    let result = ui
        .send("filters.cancelPendingRequests", Map::new())
        .await
        .unwrap();
    assert_eq!(result["cancelled"], json!(0));
}

#[tokio::test(start_paused = true)]
async fn test_coalesced_push_delivers_last_payload_once() {
    init_tracing();
    let seen: Arc<Mutex<Vec<Value>>> = Arc::new(Mutex::new(Vec::new()));
    let seen_clone = Arc::clone(&seen);

    let ((host_transport, _host_rx), (ui_transport, ui_rx)) = loopback();
    let host = Bridge::builder(host_transport).build();
    let ui = Bridge::builder(ui_transport)
        .handler_fn("render", move |_method, params, _ctx| {
            let seen = Arc::clone(&seen_clone);
            async move {
                seen.lock().unwrap().push(Value::Object(params));
                Ok(Value::Null)
            }
        })
        .build();
    ui.spawn_inbound(ui_rx);

    for frame in 1..=5 {
        host.push_coalesced("render.commands", json!({"frame": frame}));
    }

    tokio::time::sleep(Duration::from_millis(100)).await;

    let delivered = seen.lock().unwrap().clone();
    assert_eq!(delivered, vec![json!({"frame": 5})]);
}

#[tokio::test]
async fn test_immediate_push_supersedes_pending_coalesced() {
    init_tracing();
    let seen: Arc<Mutex<Vec<Value>>> = Arc::new(Mutex::new(Vec::new()));
    let seen_clone = Arc::clone(&seen);

    let ((host_transport, _host_rx), (ui_transport, ui_rx)) = loopback();
    let host = Bridge::builder(host_transport).build();
    let ui = Bridge::builder(ui_transport)
        .handler_fn("viewport", move |_method, params, _ctx| {
            let seen = Arc::clone(&seen_clone);
            async move {
                seen.lock().unwrap().push(Value::Object(params));
                Ok(Value::Null)
            }
        })
        .build();
    ui.spawn_inbound(ui_rx);

    host.push_coalesced("viewport.sync", json!({"zoom": 1.0}));
    host.push_immediate("viewport.sync", json!({"zoom": 2.0}))
        .unwrap();

    tokio::time::sleep(Duration::from_millis(100)).await;

    // The superseded coalesced payload never lands; only the immediate one.
    let delivered = seen.lock().unwrap().clone();
    assert_eq!(delivered, vec![json!({"zoom": 2.0})]);
}

#[tokio::test]
async fn test_handler_notification_reaches_caller_side() {
    init_tracing();
    let seen: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    let seen_clone = Arc::clone(&seen);

    let ((ui_transport, ui_rx), (host_transport, host_rx)) = loopback();
    let ui = Bridge::builder(ui_transport)
        .handler_fn("sync", move |method, _params, _ctx| {
            let seen = Arc::clone(&seen_clone);
            async move {
                seen.lock().unwrap().push(method);
                Ok(Value::Null)
            }
        })
        .build();
    let host = Bridge::builder(host_transport)
        .handler_fn("export", |_method, _params, ctx| async move {
            // Progress event pushed mid-operation, before the response.
            let mut progress = Map::new();
            progress.insert("progress".into(), json!(0.5));
            ctx.notify("sync.progress", progress)?;
            Ok(json!({"done": true}))
        })
        .build();
    ui.spawn_inbound(ui_rx);
    host.spawn_inbound(host_rx);

    let result = ui.send("export.run", Map::new()).await.unwrap();
    assert_eq!(result["done"], json!(true));

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(*seen.lock().unwrap(), vec!["sync.progress".to_string()]);
}

#[tokio::test]
async fn test_concurrent_requests_resolve_independently() {
    let store = NodeStore::new(vec![json!({"id": 1})]);
    let (ui, _host) = wired(BridgeConfig::default(), store);

    let mut handles = Vec::new();
    for offset in 0..8u64 {
        let ui = Arc::clone(&ui);
        handles.push(tokio::spawn(async move {
            let mut params = filter_params("SELECT * FROM nodes");
            params.insert("offset".into(), json!(offset * 100));
            ui.send("filters.executeFilter", params).await
        }));
    }

    for handle in handles {
        let result = handle.await.unwrap().unwrap();
        assert_eq!(result["count"], json!(1));
    }
    assert_eq!(ui.pending_requests(), 0);
}

#[tokio::test]
async fn test_shutdown_cancels_in_flight_calls() {
    init_tracing();
    let ((ui_transport, _ui_rx), _parked) = loopback();
    let ui = Bridge::builder(ui_transport).build();

    let caller = Arc::clone(&ui);
    let call = tokio::spawn(async move { caller.send("filters.executeFilter", Map::new()).await });
    tokio::time::sleep(Duration::from_millis(20)).await;

    assert_eq!(ui.shutdown(), 1);
    let err = call.await.unwrap().unwrap_err();
    assert!(matches!(err, BridgeError::Cancelled(_)));
}

#[tokio::test]
async fn test_shutdown_drops_pending_coalesced_flushes() {
    init_tracing();
    let seen: Arc<Mutex<Vec<Value>>> = Arc::new(Mutex::new(Vec::new()));
    let seen_clone = Arc::clone(&seen);

    let ((host_transport, _host_rx), (ui_transport, ui_rx)) = loopback();
    let host = Bridge::builder(host_transport).build();
    let ui = Bridge::builder(ui_transport)
        .handler_fn("render", move |_method, params, _ctx| {
            let seen = Arc::clone(&seen_clone);
            async move {
                seen.lock().unwrap().push(Value::Object(params));
                Ok(Value::Null)
            }
        })
        .build();
    ui.spawn_inbound(ui_rx);

    host.push_coalesced("render.commands", json!({"frame": 1}));
    host.shutdown();

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(seen.lock().unwrap().is_empty());
}
