#![allow(dead_code)]

use std::collections::VecDeque;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode as AxumStatus};
use axum::routing::post;
use axum::Router;
use chrono::Utc;
use reqwest::{Client, StatusCode};
use serde_json::{json, Value};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use uuid::Uuid;

use audit_relay::audit::store::{AuditFilter, Page, PageRequest, SortField, SortOrder};
use audit_relay::audit::{
    AuditStore, DeliveryService, EventBus, ReportClient, StatusUpdate, StoreError, WorkerPool,
};
use audit_relay::auth::jwt::Claims;
use audit_relay::config::{Config, PoolConfig, ReconcileConfig, ReportConfig, RetryPolicy};
use audit_relay::models::{AuditRecord, NewAuditRecord, OperationType, ReportStatus};
use audit_relay::state::SharedState;

pub const JWT_SECRET: &str = "test-jwt-secret-that-is-long-enough";
pub const API_KEY: &str = "test-api-key";

// ── In-memory audit store ───────────────────────────────────────

/// `AuditStore` kept in memory, with the same transition rules as Postgres.
#[derive(Default)]
pub struct MemoryStore {
    records: Mutex<Vec<AuditRecord>>,
    fail_inserts: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_fail_inserts(&self, fail: bool) {
        self.fail_inserts.store(fail, Ordering::SeqCst);
    }

    pub fn all(&self) -> Vec<AuditRecord> {
        self.records.lock().unwrap().clone()
    }

    pub fn len(&self) -> usize {
        self.records.lock().unwrap().len()
    }

    pub fn get(&self, id: Uuid) -> Option<AuditRecord> {
        self.records.lock().unwrap().iter().find(|r| r.id == id).cloned()
    }

    /// Insert a record directly in the given state, bypassing the bus.
    pub fn seed(&self, record: AuditRecord) {
        self.records.lock().unwrap().push(record);
    }
}

#[async_trait]
impl AuditStore for MemoryStore {
    async fn insert(&self, record: &NewAuditRecord) -> Result<AuditRecord, StoreError> {
        if self.fail_inserts.load(Ordering::SeqCst) {
            return Err(StoreError::Database(sqlx::Error::Protocol(
                "insert disabled for test".to_string(),
            )));
        }
        let now = Utc::now();
        let stored = AuditRecord {
            id: record.id,
            module_name: record.module_name.clone(),
            operation_type: record.operation_type,
            business_id: record.business_id.clone(),
            operator_id: record.operator_id,
            operator_name: record.operator_name.clone(),
            operate_time: record.operate_time,
            before_data: record.before_data.clone(),
            after_data: record.after_data.clone(),
            changed_fields: record.changed_fields.clone(),
            report_status: ReportStatus::Pending,
            retry_count: 0,
            fail_reason: None,
            last_report_time: None,
            client_ip: record.client_ip.clone(),
            trace_id: record.trace_id.clone(),
            create_time: now,
            update_time: now,
        };
        self.records.lock().unwrap().push(stored.clone());
        Ok(stored)
    }

    async fn update_status(
        &self,
        id: Uuid,
        update: &StatusUpdate,
    ) -> Result<Option<AuditRecord>, StoreError> {
        let mut records = self.records.lock().unwrap();
        let Some(record) = records.iter_mut().find(|r| r.id == id) else {
            return Ok(None);
        };
        if update.apply_to(record) {
            Ok(Some(record.clone()))
        } else {
            Ok(None)
        }
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<AuditRecord>, StoreError> {
        Ok(self.get(id))
    }

    async fn find_failed(
        &self,
        max_retry: i32,
        limit: i64,
    ) -> Result<Vec<AuditRecord>, StoreError> {
        let mut failed: Vec<AuditRecord> = self
            .all()
            .into_iter()
            .filter(|r| r.report_status == ReportStatus::Failed && r.retry_count < max_retry)
            .collect();
        failed.sort_by_key(|r| (r.operate_time, r.id));
        failed.truncate(limit.max(0) as usize);
        Ok(failed)
    }

    async fn query(
        &self,
        filter: &AuditFilter,
        page: PageRequest,
    ) -> Result<Page<AuditRecord>, StoreError> {
        let mut matched: Vec<AuditRecord> =
            self.all().into_iter().filter(|r| filter.matches(r)).collect();

        matched.sort_by(|a, b| {
            let ord = match filter.sort_field {
                SortField::OperateTime => a.operate_time.cmp(&b.operate_time),
                SortField::CreateTime => a.create_time.cmp(&b.create_time),
                SortField::RetryCount => a.retry_count.cmp(&b.retry_count),
            };
            match filter.sort_order {
                SortOrder::Asc => ord,
                SortOrder::Desc => ord.reverse(),
            }
        });

        let total = matched.len() as i64;
        let records = matched
            .into_iter()
            .skip(page.offset() as usize)
            .take(page.size as usize)
            .collect();
        Ok(Page::new(records, total, page))
    }
}

/// A stored record in the given delivery state.
pub fn sample_record(status: ReportStatus, retry_count: i32) -> AuditRecord {
    let now = Utc::now();
    AuditRecord {
        id: Uuid::now_v7(),
        module_name: "customer".to_string(),
        operation_type: OperationType::Update,
        business_id: Some("1001".to_string()),
        operator_id: 42,
        operator_name: "alice".to_string(),
        operate_time: now,
        before_data: Some(json!({ "id": 1001, "customerName": "Acme" })),
        after_data: Some(json!({ "id": 1001, "customerName": "Acme Ltd" })),
        changed_fields: Some(vec!["customerName".to_string()]),
        report_status: status,
        retry_count,
        fail_reason: (status == ReportStatus::Failed).then(|| "HTTP 500".to_string()),
        last_report_time: None,
        client_ip: Some("10.0.0.8".to_string()),
        trace_id: Uuid::new_v4().simple().to_string(),
        create_time: now,
        update_time: now,
    }
}

// ── Stub receiver ───────────────────────────────────────────────

/// How the stub answers one report.
#[derive(Debug, Clone, Copy)]
pub enum Reply {
    Status(u16),
    /// 200 with `success: false` in the body.
    Rejected,
    /// 200 with a body that isn't JSON.
    Garbage,
}

#[derive(Debug, Clone)]
pub struct ReceivedReport {
    pub request_id: Option<String>,
    pub api_key: Option<String>,
    pub content_type: Option<String>,
    pub body: Value,
}

#[derive(Default)]
struct StubState {
    script: Mutex<VecDeque<Reply>>,
    received: Mutex<Vec<ReceivedReport>>,
}

/// Audit receiver on a random port. Answers from its script, then 200.
pub struct StubReceiver {
    pub addr: SocketAddr,
    state: Arc<StubState>,
}

impl StubReceiver {
    pub async fn start(script: Vec<Reply>) -> Self {
        let state = Arc::new(StubState {
            script: Mutex::new(script.into()),
            received: Mutex::new(Vec::new()),
        });

        let app = Router::new()
            .route("/api/audit/logs", post(receive))
            .with_state(state.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind stub receiver");
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            axum::serve(listener, app).await.expect("Stub receiver failed");
        });

        Self { addr, state }
    }

    pub fn url(&self) -> String {
        format!("http://{}/api/audit/logs", self.addr)
    }

    pub fn push(&self, reply: Reply) {
        self.state.script.lock().unwrap().push_back(reply);
    }

    pub fn received(&self) -> Vec<ReceivedReport> {
        self.state.received.lock().unwrap().clone()
    }

    pub fn request_ids(&self) -> Vec<String> {
        self.received()
            .into_iter()
            .filter_map(|r| r.request_id)
            .collect()
    }

    pub fn report_config(&self) -> ReportConfig {
        ReportConfig {
            url: self.url(),
            api_key: API_KEY.to_string(),
            enabled: true,
            connect_timeout: Duration::from_secs(2),
            read_timeout: Duration::from_secs(2),
        }
    }
}

async fn receive(
    State(state): State<Arc<StubState>>,
    headers: HeaderMap,
    body: String,
) -> (AxumStatus, String) {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    };

    let count = {
        let mut received = state.received.lock().unwrap();
        received.push(ReceivedReport {
            request_id: header("x-request-id"),
            api_key: header("x-api-key"),
            content_type: header("content-type"),
            body: serde_json::from_str(&body).unwrap_or(Value::Null),
        });
        received.len()
    };

    let reply = state
        .script
        .lock()
        .unwrap()
        .pop_front()
        .unwrap_or(Reply::Status(200));

    match reply {
        Reply::Status(code) => {
            let status = AxumStatus::from_u16(code).unwrap();
            let body = if status.is_success() {
                json!({ "success": true, "auditId": format!("ext-{count}"), "receivedAt": Utc::now() })
            } else {
                json!({ "success": false, "message": "stub failure", "errorCode": code.to_string() })
            };
            (status, body.to_string())
        }
        Reply::Rejected => (
            AxumStatus::OK,
            json!({ "success": false, "message": "duplicate", "errorCode": "DUP" }).to_string(),
        ),
        Reply::Garbage => (AxumStatus::OK, "accepted".to_string()),
    }
}

// ── Pipeline wiring ─────────────────────────────────────────────

/// Retry policy with millisecond backoff.
pub fn fast_retry(max_attempts: u32) -> RetryPolicy {
    RetryPolicy {
        max_attempts,
        initial_interval_ms: 5,
        multiplier: 2.0,
        max_interval_ms: 20,
    }
}

pub fn small_pool() -> PoolConfig {
    PoolConfig {
        core_workers: 2,
        max_workers: 4,
        queue_capacity: 16,
        shutdown_timeout: Duration::from_secs(5),
    }
}

/// Bus, delivery and worker pool over a [`MemoryStore`].
pub struct Pipeline {
    pub store: Arc<MemoryStore>,
    pub delivery: Arc<DeliveryService>,
    pub workers: WorkerPool,
    pub bus: EventBus,
}

pub fn pipeline(report: ReportConfig, retry: RetryPolicy) -> Pipeline {
    let store = MemoryStore::new();
    let dyn_store: Arc<dyn AuditStore> = store.clone();
    let client = ReportClient::new(report, retry).expect("report client");
    let delivery = Arc::new(DeliveryService::new(dyn_store.clone(), client));
    let workers = WorkerPool::start(&small_pool());
    let bus = EventBus::new(workers.clone(), dyn_store, delivery.clone());
    Pipeline {
        store,
        delivery,
        workers,
        bus,
    }
}

/// Poll `check` until it returns true or five seconds pass.
pub async fn eventually<F, Fut>(mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while tokio::time::Instant::now() < deadline {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    false
}

/// Sign an access token the way the identity service does.
pub fn token(user_id: i64, username: &str) -> String {
    let claims = Claims {
        sub: user_id,
        username: username.to_string(),
        role_id: Some(1),
        role_name: Some("admin".to_string()),
        exp: (Utc::now() + chrono::Duration::hours(1)).timestamp(),
    };
    jsonwebtoken::encode(
        &jsonwebtoken::Header::default(),
        &claims,
        &jsonwebtoken::EncodingKey::from_secret(JWT_SECRET.as_bytes()),
    )
    .unwrap()
}

// ── Postgres-backed app ─────────────────────────────────────────

/// A running server with a dedicated test database.
pub struct TestApp {
    pub addr: SocketAddr,
    pub pool: PgPool,
    pub client: Client,
    pub db_name: String,
    pub state: SharedState,
}

impl TestApp {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub async fn get_auth(&self, path: &str, token: &str) -> (Value, StatusCode) {
        let resp = self
            .client
            .get(self.url(path))
            .bearer_auth(token)
            .send()
            .await
            .expect("get request failed");
        let status = resp.status();
        let body: Value = resp.json().await.unwrap_or(json!(null));
        (body, status)
    }

    pub async fn post_auth(&self, path: &str, token: &str, body: &Value) -> (Value, StatusCode) {
        let resp = self
            .client
            .post(self.url(path))
            .bearer_auth(token)
            .json(body)
            .send()
            .await
            .expect("post request failed");
        let status = resp.status();
        let body: Value = resp.json().await.unwrap_or(json!(null));
        (body, status)
    }

    pub async fn put_auth(&self, path: &str, token: &str, body: &Value) -> (Value, StatusCode) {
        let resp = self
            .client
            .put(self.url(path))
            .bearer_auth(token)
            .json(body)
            .send()
            .await
            .expect("put request failed");
        let status = resp.status();
        let body: Value = resp.json().await.unwrap_or(json!(null));
        (body, status)
    }

    pub async fn delete_auth(&self, path: &str, token: &str) -> StatusCode {
        self.client
            .delete(self.url(path))
            .bearer_auth(token)
            .send()
            .await
            .expect("delete request failed")
            .status()
    }

    /// Create a customer and return its JSON.
    pub async fn create_customer(&self, token: &str, name: &str, phone: &str) -> Value {
        let (body, status) = self
            .post_auth(
                "/api/v1/customers",
                token,
                &json!({
                    "customerName": name,
                    "contactName": "Zhang San",
                    "contactPhone": phone,
                    "customerSource": "web",
                    "customerStatus": "active"
                }),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "create customer failed: {body}");
        body
    }

    pub async fn audit_count(&self) -> i64 {
        sqlx::query_scalar("SELECT COUNT(*) FROM audit_records")
            .fetch_one(&self.pool)
            .await
            .unwrap()
    }
}

fn swap_db(url: &str, db_name: &str) -> String {
    url.rsplit_once('/')
        .map(|(base, _)| format!("{base}/{db_name}"))
        .unwrap_or_else(|| url.to_string())
}

/// A fresh, migrated database. Returns the pool and the database name.
pub async fn test_db() -> (PgPool, String) {
    let _ = dotenvy::dotenv();

    let base_url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set for tests");
    let db_name = format!("audit_relay_test_{}", Uuid::now_v7().simple());

    let admin_pool = PgPoolOptions::new()
        .max_connections(2)
        .connect(&swap_db(&base_url, "postgres"))
        .await
        .expect("Failed to connect to postgres for test DB creation");

    sqlx::query(&format!("CREATE DATABASE \"{db_name}\""))
        .execute(&admin_pool)
        .await
        .expect("Failed to create test database");

    admin_pool.close().await;

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&swap_db(&base_url, &db_name))
        .await
        .expect("Failed to connect to test database");

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .expect("Failed to run migrations on test database");

    (pool, db_name)
}

/// Spawn the app against a fresh temporary database.
pub async fn spawn_app(report: ReportConfig, retry: RetryPolicy) -> TestApp {
    let (pool, db_name) = test_db().await;
    let test_url = swap_db(
        &std::env::var("DATABASE_URL").expect("DATABASE_URL must be set for tests"),
        &db_name,
    );

    let config = Config {
        database_url: test_url,
        jwt_secret: JWT_SECRET.to_string(),
        host: "127.0.0.1".parse().unwrap(),
        port: 0,
        trusted_proxies: vec![],
        log_level: "warn".to_string(),
        report,
        retry,
        pool: small_pool(),
        reconcile: ReconcileConfig::default(),
    };

    let (app, state) = audit_relay::build_app(pool.clone(), config).expect("build app");

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind to random port");
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .expect("Server failed");
    });

    TestApp {
        addr,
        pool,
        client: Client::new(),
        db_name,
        state,
    }
}

/// Drop the test database.
pub async fn cleanup(app: TestApp) {
    drop_db(app.pool, &app.db_name).await;
}

pub async fn drop_db(pool: PgPool, db_name: &str) {
    pool.close().await;

    let base_url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set for tests");
    let admin_pool = PgPoolOptions::new()
        .max_connections(2)
        .connect(&swap_db(&base_url, "postgres"))
        .await
        .expect("Failed to connect for cleanup");

    let _ = sqlx::query(&format!("DROP DATABASE IF EXISTS \"{db_name}\" WITH (FORCE)"))
        .execute(&admin_pool)
        .await;

    admin_pool.close().await;
}
