//! End-to-end startup against the in-memory driver: migrations, both
//! listeners, and the same calls over RPC and the JSON gateway.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use serde_json::{json, Value};
use simplebank_core::messages::{
    CreateUserRequest, GetAccountRequest, GetAccountResponse, ListAccountsRequest,
    ListAccountsResponse, LoginUserRequest, LoginUserResponse,
};
use simplebank_core::{Code, Method};
use simplebank_server::config::{Config, SymmetricKey};
use simplebank_server::migrate::MigrationOutcome;
use simplebank_server::network::{ListenerKind, RpcClient};
use simplebank_server::store::Database;
use simplebank_server::supervisor::{self, Stage, StartupError};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

const KEY: &str = "12345678901234567890123456789012";

fn migration_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../../db/migration")
}

fn test_config() -> Config {
    Config {
        db_driver: "memory".to_string(),
        db_source: "memory://e2e".to_string(),
        http_server_address: "127.0.0.1:0".to_string(),
        rpc_server_address: "127.0.0.1:0".to_string(),
        token_symmetric_key: SymmetricKey::new(KEY),
        access_token_duration: Duration::from_secs(15 * 60),
        refresh_token_duration: Duration::from_secs(24 * 60 * 60),
        migration_url: format!("file://{}", migration_dir().display()),
        swagger_dir: PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../../doc/swagger"),
        rpc_reflection: true,
        cors_origins: vec!["*".to_string()],
    }
}

struct Running {
    rpc: SocketAddr,
    http: SocketAddr,
    stop: oneshot::Sender<()>,
    task: JoinHandle<Result<(), StartupError>>,
    migration: MigrationOutcome,
}

impl Running {
    async fn shutdown(self) {
        let _ = self.stop.send(());
        self.task
            .await
            .expect("supervisor task")
            .expect("clean shutdown");
    }

    fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.http, path)
    }
}

async fn start(config: Config, database: Database) -> Running {
    let ready = supervisor::prepare(config, database).await.expect("prepare");
    let listeners = supervisor::bind_listeners(&ready.config).await.expect("bind");
    let (rpc, http) = (listeners.rpc_addr(), listeners.gateway_addr());
    let (stop, stopped) = oneshot::channel::<()>();
    let task = tokio::spawn(listeners.serve(ready.core, async move {
        let _ = stopped.await;
    }));
    Running {
        rpc,
        http,
        stop,
        task,
        migration: ready.migration,
    }
}

fn new_user(username: &str) -> Value {
    json!({
        "username": username,
        "full_name": "Integration User",
        "email": format!("{username}@example.com"),
        "password": "secret123",
    })
}

#[tokio::test]
async fn fresh_store_migrates_then_restart_applies_nothing() {
    let database = Database::connect("memory", "memory://restart").await.expect("db");
    let http = reqwest::Client::new();

    let first = start(test_config(), database.clone()).await;
    match &first.migration {
        MigrationOutcome::Changed(report) => assert_eq!(report.versions, vec![1, 2]),
        MigrationOutcome::NoChange => panic!("fresh store must be migrated"),
    }
    let live = http.get(first.url("/health/live")).send().await.expect("liveness");
    assert_eq!(live.status(), reqwest::StatusCode::OK);
    let created = http
        .post(first.url("/v1/create_user"))
        .json(&new_user("alice"))
        .send()
        .await
        .expect("create user");
    assert_eq!(created.status(), reqwest::StatusCode::OK);
    first.shutdown().await;

    let second = start(test_config(), database).await;
    assert_eq!(second.migration, MigrationOutcome::NoChange);
    let mut client = RpcClient::connect(second.rpc).await.expect("connect");
    let login: LoginUserResponse = client
        .call(
            Method::LoginUser,
            &LoginUserRequest {
                username: "alice".to_string(),
                password: "secret123".to_string(),
            },
        )
        .await
        .expect("user survives restart");
    assert_eq!(login.user.username, "alice");
    second.shutdown().await;
}

#[tokio::test]
async fn gateway_and_rpc_share_one_core() {
    let database = Database::connect("memory", "memory://parity").await.expect("db");
    let running = start(test_config(), database).await;
    let http = reqwest::Client::new();

    // Created over HTTP, logged in over RPC.
    http.post(running.url("/v1/create_user"))
        .json(&new_user("bob"))
        .send()
        .await
        .expect("create user");
    let mut client = RpcClient::connect(running.rpc).await.expect("connect");
    let login: LoginUserResponse = client
        .call(
            Method::LoginUser,
            &LoginUserRequest {
                username: "bob".to_string(),
                password: "secret123".to_string(),
            },
        )
        .await
        .expect("login over rpc");

    // A token issued over RPC is accepted by the gateway.
    let account: Value = http
        .post(running.url("/v1/create_account"))
        .bearer_auth(&login.access_token)
        .json(&json!({"currency": "CAD", "ignored": true}))
        .send()
        .await
        .expect("create account")
        .json()
        .await
        .expect("json body");
    let id = account["account"]["id"].as_i64().expect("account id");

    client.set_access_token(login.access_token.clone());
    let fetched: GetAccountResponse = client
        .call(Method::GetAccount, &GetAccountRequest { id })
        .await
        .expect("get account over rpc");
    assert_eq!(fetched.account.currency, "CAD");
    let listed: ListAccountsResponse = client
        .call(
            Method::ListAccounts,
            &ListAccountsRequest {
                page_id: 1,
                page_size: 5,
            },
        )
        .await
        .expect("list accounts");
    assert_eq!(listed.accounts.len(), 1);

    // The same invalid request fails the same way on both transports.
    let invalid = CreateUserRequest {
        username: "Bad Name".to_string(),
        full_name: "Integration User".to_string(),
        email: "bad@example.com".to_string(),
        password: "secret123".to_string(),
    };
    let rpc_err = client
        .call::<_, Value>(Method::CreateUser, &invalid)
        .await
        .unwrap_err();
    let rpc_status = rpc_err.status().expect("status").clone();
    assert_eq!(rpc_status.code, Code::InvalidArgument);

    let response = http
        .post(running.url("/v1/create_user"))
        .json(&invalid)
        .send()
        .await
        .expect("gateway call");
    assert_eq!(response.status(), reqwest::StatusCode::BAD_REQUEST);
    let body: Value = response.json().await.expect("error body");
    assert_eq!(body["code"], json!(rpc_status.code.as_u16()));
    assert_eq!(body["message"], json!(rpc_status.message));
    assert_eq!(
        body["field_violations"][0]["field"],
        json!(rpc_status.field_violations[0].field)
    );

    let listed = client.list_methods().await.expect("reflection");
    assert_eq!(listed.methods.len(), Method::ALL.len());

    running.shutdown().await;
}

#[tokio::test]
async fn rpc_bind_failure_is_reported_before_the_gateway() {
    let rpc_blocker = tokio::net::TcpListener::bind("127.0.0.1:0").await.expect("blocker");
    let http_blocker = tokio::net::TcpListener::bind("127.0.0.1:0").await.expect("blocker");

    let mut config = test_config();
    config.rpc_server_address = rpc_blocker.local_addr().expect("addr").to_string();
    config.http_server_address = http_blocker.local_addr().expect("addr").to_string();

    let database = Database::connect("memory", "memory://bind").await.expect("db");
    let err = supervisor::run_with_database(config, database, std::future::pending())
        .await
        .unwrap_err();

    assert_eq!(err.stage(), Stage::RpcServing);
    match err {
        StartupError::Bind(bind) => assert_eq!(bind.kind, ListenerKind::Rpc),
        other => panic!("expected a bind error, got {other:?}"),
    }
}

#[tokio::test]
async fn short_key_fails_construction() {
    let mut config = test_config();
    config.token_symmetric_key = SymmetricKey::new("0123456789");

    let database = Database::connect("memory", "memory://shortkey").await.expect("db");
    let err = supervisor::run_with_database(config, database, std::future::pending())
        .await
        .unwrap_err();
    assert_eq!(err.stage(), Stage::CoreReady);
    assert!(matches!(err, StartupError::Construction(_)));
}

#[tokio::test]
async fn startup_from_a_config_directory() {
    let dir = tempfile::tempdir().expect("tempdir");
    std::fs::write(
        dir.path().join("app.env"),
        format!(
            "DB_DRIVER=memory\nDB_SOURCE=memory://from-file\nHTTP_SERVER_ADDRESS=127.0.0.1:0\n\
             GRPC_SERVER_ADDRESS=127.0.0.1:0\nTOKEN_SYMMETRIC_KEY={KEY}\n\
             ACCESS_TOKEN_DURATION=15m\nREFRESH_TOKEN_DURATION=24h\nMIGRATION_URL=file://{}\n",
            migration_dir().display()
        ),
    )
    .expect("write app.env");

    // An explicit empty environment keeps the host's variables out of the test.
    let config = Config::load_with_env(dir.path(), Vec::new()).expect("load config");
    assert_eq!(config.db_source, "memory://from-file");
    let database = Database::connect(&config.db_driver, &config.db_source)
        .await
        .expect("db");

    supervisor::run_with_database(config, database, async {
        tokio::time::sleep(Duration::from_millis(50)).await;
    })
    .await
    .expect("startup and clean shutdown");
}
