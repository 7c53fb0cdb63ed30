//! End-to-end tests: the real router on a loopback port, driven by agent
//! components from `gophkeeper-core`.

use chrono::Utc;
use gophkeeper_core::crypto::{derive_key, KEY_LEN};
use gophkeeper_core::session::UserInfo;
use gophkeeper_core::{
    AgentRuntime, AgentStore, ApiClient, EncryptedRecord, KeeperError, PasswordPayload,
    PlaintextCache, Reconciler, Record, RecordStatus, RecordValue, RuntimeConfig, SaveOutcome,
    Shutdown, TextPayload, UserInfoStorage, VaultService,
};
use gophkeeper_server::storage::models::{self, STATUS_CONFLICT, STATUS_SAVED};
use gophkeeper_server::{build_router, AppState, ServerConfig, ServerStorage};
use std::time::Duration;

/// Nothing listens here.
const UNREACHABLE: &str = "http://127.0.0.1:9";

struct TestServer {
    state: AppState,
    base: String,
}

impl TestServer {
    async fn start() -> Self {
        Self::with_config(ServerConfig {
            secret_key: Some("e2e-secret".to_string()),
            ..ServerConfig::default()
        })
        .await
    }

    async fn with_config(config: ServerConfig) -> Self {
        let state = AppState::new(ServerStorage::in_memory().unwrap(), &config);
        let router = build_router(state.clone(), &config);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        tokio::spawn(async move { axum::serve(listener, router).await });
        Self { state, base }
    }

    fn user_id(&self, login: &str) -> i64 {
        self.state.storage.find_user(login).unwrap().unwrap().id
    }

    fn versions(&self, login: &str, name: &str) -> Vec<models::EncryptedRecord> {
        self.state
            .storage
            .get_all(self.user_id(login))
            .unwrap()
            .into_iter()
            .find(|versions| versions[0].name == name)
            .unwrap_or_default()
    }
}

/// The server-side form of an agent's sealed version.
fn on_server(version: &EncryptedRecord) -> models::EncryptedRecord {
    models::EncryptedRecord {
        encrypted_data: version.encrypted_data.clone(),
        name: version.name.clone(),
        create_data: version.create_data,
        edit_date: version.edit_date,
    }
}

/// One agent process: its own store and session.
struct Agent {
    store: AgentStore,
    session: UserInfoStorage,
    client: ApiClient,
    vault: VaultService,
    reconciler: Reconciler,
}

impl Agent {
    fn new(base: &str) -> Self {
        let store = AgentStore::in_memory().unwrap();
        let session = UserInfoStorage::new();
        let client = ApiClient::new(base, session.clone(), store.clone()).unwrap();
        Self {
            vault: VaultService::new(client.clone()),
            reconciler: Reconciler::new(client.clone()),
            store,
            session,
            client,
        }
    }

    /// Record operations as seen while the server is unreachable.
    fn offline_vault(&self) -> VaultService {
        let client = ApiClient::new(UNREACHABLE, self.session.clone(), self.store.clone()).unwrap();
        VaultService::new(client)
    }

    async fn user_id(&self) -> i64 {
        self.session.user_id().await.unwrap()
    }

    async fn status(&self, name: &str) -> Option<RecordStatus> {
        self.store.get_status(self.user_id().await, name).unwrap()
    }

    /// Decrypted versions of a local record.
    async fn versions(&self, name: &str) -> Vec<Record> {
        let stored = self.store.get(self.user_id().await, name).unwrap().unwrap();
        let mut out = Vec::new();
        for version in &stored.versions {
            out.push(self.vault.decrypt(version, stored.status).await.unwrap());
        }
        out
    }

    /// The single sealed version stored locally for `name`.
    async fn sealed(&self, name: &str) -> EncryptedRecord {
        let stored = self.store.get(self.user_id().await, name).unwrap().unwrap();
        assert_eq!(stored.versions.len(), 1);
        stored.versions[0].clone()
    }

    async fn tick(&self) -> gophkeeper_core::TickReport {
        self.reconciler.tick(&mut Shutdown::never()).await.unwrap()
    }
}

fn password(name: &str, login: &str, pass: &str) -> Record {
    Record::new(
        name,
        "",
        &RecordValue::Password(PasswordPayload {
            login: login.to_string(),
            password: pass.to_string(),
        }),
    )
    .unwrap()
}

fn note(text: &str) -> RecordValue {
    RecordValue::Text(TextPayload {
        text: text.to_string(),
    })
}

#[tokio::test]
async fn fresh_user_adds_and_reconciles() {
    let server = TestServer::start().await;
    let a = Agent::new(&server.base);
    a.client.sign_up("alice", "hunter2").await.unwrap();

    let gmail = password("gmail", "a@x", "p");
    assert_eq!(a.vault.save_plain(&gmail).await.unwrap(), SaveOutcome::Synced);
    assert_eq!(a.status("gmail").await, Some(RecordStatus::Saved));

    // An all-SAVED store is left untouched by a tick.
    let report = a.tick().await;
    assert_eq!(report.pushed, 0);
    assert_eq!(report.pulled, 0);
    assert_eq!(report.pruned, 0);

    let remote = a.client.fetch_all().await.unwrap();
    assert_eq!(remote.len(), 1);
    assert_eq!(remote[0].len(), 1);
    let opened = a.vault.decrypt(&remote[0][0], RecordStatus::Saved).await.unwrap();
    assert_eq!(opened.value().unwrap(), gmail.value().unwrap());
    assert_eq!(opened.create_time, gmail.create_time);

    let cache = PlaintextCache::new(a.store.clone(), a.session.clone());
    let snapshot = cache.refresh().await.unwrap();
    assert_eq!(
        snapshot.get("gmail").unwrap().versions[0].value().unwrap(),
        gmail.value().unwrap()
    );
}

#[tokio::test]
async fn offline_edit_conflict_and_resolution() {
    let server = TestServer::start().await;
    let a = Agent::new(&server.base);
    let b = Agent::new(&server.base);

    a.client.sign_up("alice", "hunter2").await.unwrap();
    let gmail = password("gmail", "a@x", "p");
    a.vault.save_plain(&gmail).await.unwrap();

    b.client.sign_in("alice", "hunter2").await.unwrap();
    assert_eq!(b.tick().await.pulled, 1);
    assert_eq!(b.status("gmail").await, Some(RecordStatus::Saved));

    // A edits while offline.
    let a_edit = gmail.edited("from A", &note("A's version")).unwrap();
    assert_eq!(
        a.offline_vault().edit_plain(&a_edit).await.unwrap(),
        SaveOutcome::StoredLocally
    );
    assert_eq!(a.status("gmail").await, Some(RecordStatus::Changed));

    // B edits online.
    let b_edit = b.versions("gmail").await[0]
        .edited("from B", &note("B's version"))
        .unwrap();
    assert_eq!(b.vault.edit_plain(&b_edit).await.unwrap(), SaveOutcome::Synced);
    assert_eq!(b.status("gmail").await, Some(RecordStatus::Saved));

    // A reconnects: its edit is appended and both versions mirrored.
    let report = a.tick().await;
    assert_eq!(report.conflicts, 1);
    assert_eq!(a.status("gmail").await, Some(RecordStatus::Conflict));
    let versions = a.versions("gmail").await;
    assert_eq!(versions.len(), 2);
    let texts: Vec<RecordValue> = versions.iter().map(|v| v.value().unwrap()).collect();
    assert!(texts.contains(&note("A's version")));
    assert!(texts.contains(&note("B's version")));

    // A tick over a conflict does not append again.
    a.tick().await;
    assert_eq!(server.state.storage.get_all(server.user_id("alice")).unwrap()[0].len(), 2);

    // A picks its own version and edits it offline; the next tick resolves.
    let picked = versions
        .iter()
        .find(|v| v.value().unwrap() == note("A's version"))
        .unwrap();
    let fix = picked.edited("resolved", &note("merged")).unwrap();
    a.offline_vault().edit_plain(&fix).await.unwrap();
    assert_eq!(a.status("gmail").await, Some(RecordStatus::FixConflict));
    assert_eq!(a.versions("gmail").await.len(), 1);

    let report = a.tick().await;
    assert_eq!(report.pushed, 1);
    assert_eq!(a.status("gmail").await, Some(RecordStatus::Saved));

    b.tick().await;
    for agent in [&a, &b] {
        assert_eq!(agent.status("gmail").await, Some(RecordStatus::Saved));
        let versions = agent.versions("gmail").await;
        assert_eq!(versions.len(), 1);
        assert_eq!(versions[0].value().unwrap(), note("merged"));
    }
}

#[tokio::test]
async fn wrong_master_password_fails_decryption_without_writes() {
    let server = TestServer::start().await;
    let a = Agent::new(&server.base);
    let info = a.client.sign_up("alice", "hunter2").await.unwrap();
    a.vault.save_plain(&password("gmail", "a@x", "p")).await.unwrap();
    let before = a.store.list(info.user_id).unwrap();

    a.session
        .set(UserInfo {
            login: info.login.clone(),
            password: "wrong".to_string(),
            key: derive_key(b"wrong", KEY_LEN).unwrap(),
            user_id: info.user_id,
            token: info.token.clone(),
        })
        .await;

    let cache = PlaintextCache::new(a.store.clone(), a.session.clone());
    assert!(matches!(cache.refresh().await, Err(KeeperError::Crypto(_))));
    assert!(cache.snapshot().error.is_some());
    assert_eq!(a.store.list(info.user_id).unwrap(), before);
}

#[tokio::test]
async fn stale_agent_pulls_before_pushing() {
    let server = TestServer::start().await;
    let a = Agent::new(&server.base);
    a.client.sign_up("alice", "hunter2").await.unwrap();

    let fifteen_minutes_ago = Utc::now() - chrono::Duration::minutes(15);
    server
        .state
        .storage
        .set_last_seen(server.user_id("alice"), fifteen_minutes_ago)
        .unwrap();

    // A direct write is refused and nothing is stored.
    let bank = password("bank", "acct", "pin");
    assert!(matches!(
        a.vault.save_plain(&bank).await,
        Err(KeeperError::Forbidden)
    ));
    assert_eq!(a.status("bank").await, None);

    // The reconciler pulls, then retries the push.
    a.offline_vault().save_plain(&bank).await.unwrap();
    assert_eq!(a.status("bank").await, Some(RecordStatus::New));
    let report = a.tick().await;
    assert!(report.forbidden_retry);
    assert_eq!(report.pushed, 1);
    assert_eq!(a.status("bank").await, Some(RecordStatus::Saved));
}

#[tokio::test]
async fn delete_round_trip() {
    let server = TestServer::start().await;
    let a = Agent::new(&server.base);
    let b = Agent::new(&server.base);
    a.client.sign_up("alice", "hunter2").await.unwrap();
    b.client.sign_in("alice", "hunter2").await.unwrap();

    let gmail = password("gmail", "a@x", "p");
    a.vault.save_plain(&gmail).await.unwrap();
    b.tick().await;

    assert!(a.vault.delete("gmail").await.unwrap());
    assert_eq!(a.status("gmail").await, None);
    assert!(a.client.fetch_all().await.unwrap().is_empty());

    // Deleting again is harmless.
    assert!(!a.vault.delete("gmail").await.unwrap());

    // Other agents drop it on their next pull.
    assert_eq!(b.tick().await.pruned, 1);
    assert_eq!(b.status("gmail").await, None);

    // The name is free again.
    assert_eq!(
        a.vault.save_plain(&password("gmail", "b@x", "q")).await.unwrap(),
        SaveOutcome::Synced
    );
}

#[tokio::test]
async fn rejected_token_is_renewed_once() {
    let server = TestServer::start().await;
    let a = Agent::new(&server.base);
    a.client.sign_up("alice", "hunter2").await.unwrap();
    a.session.set_token("not-a-token").await.unwrap();

    let outcome = a.vault.save_plain(&password("gmail", "a@x", "p")).await.unwrap();
    assert_eq!(outcome, SaveOutcome::Synced);

    let token = a.session.token().await.unwrap();
    assert_ne!(token, "not-a-token");
    assert_eq!(a.store.authorize("alice").unwrap().unwrap().token, token);
}

#[tokio::test]
async fn second_rejection_surfaces_to_caller() {
    // Every token this server issues is already expired.
    let server = TestServer::with_config(ServerConfig {
        secret_key: Some("e2e-secret".to_string()),
        expire_token: 0,
        ..ServerConfig::default()
    })
    .await;
    let a = Agent::new(&server.base);
    a.client.sign_up("alice", "hunter2").await.unwrap();

    assert!(matches!(
        a.vault.save_plain(&password("gmail", "a@x", "p")).await,
        Err(KeeperError::Auth(_))
    ));
    assert!(matches!(a.client.fetch_all().await, Err(KeeperError::Auth(_))));
}

#[tokio::test]
async fn wrong_password_is_rejected_online() {
    let server = TestServer::start().await;
    let a = Agent::new(&server.base);
    a.client.sign_up("alice", "hunter2").await.unwrap();

    let b = Agent::new(&server.base);
    assert!(matches!(
        b.client.sign_in("alice", "hunter3").await,
        Err(KeeperError::Auth(_))
    ));
    assert!(matches!(
        b.client.sign_up("alice", "hunter2").await,
        Err(KeeperError::AlreadyExists(_))
    ));
}

#[tokio::test]
async fn background_runtime_pushes_offline_records() {
    let server = TestServer::start().await;
    let mut config = RuntimeConfig::new(&server.base);
    config.sync_period = Duration::from_millis(50);
    config.cache_period = Duration::from_millis(50);
    let mut runtime = AgentRuntime::new(config, AgentStore::in_memory().unwrap()).unwrap();
    let info = runtime.client.sign_up("alice", "hunter2").await.unwrap();

    let offline = VaultService::new(
        ApiClient::new(UNREACHABLE, runtime.session.clone(), runtime.store.clone()).unwrap(),
    );
    offline.save_plain(&password("gmail", "a@x", "p")).await.unwrap();

    runtime.start();
    let mut synced = false;
    for _ in 0..100 {
        if runtime.store.get_status(info.user_id, "gmail").unwrap() == Some(RecordStatus::Saved)
            && runtime.cache.snapshot().get("gmail").is_some()
        {
            synced = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    runtime.shutdown().await;

    assert!(synced);
    assert_eq!(server.state.storage.get_all(server.user_id("alice")).unwrap().len(), 1);
}

#[tokio::test]
async fn lost_add_response_settles_on_retry() {
    let server = TestServer::start().await;
    let a = Agent::new(&server.base);
    a.client.sign_up("alice", "hunter2").await.unwrap();
    a.offline_vault()
        .save_plain(&password("gmail", "a@x", "p"))
        .await
        .unwrap();

    // The server committed the add but the reply never reached the agent.
    let sealed = a.sealed("gmail").await;
    let user_id = server.user_id("alice");
    assert!(server.state.storage.add(user_id, &on_server(&sealed)).unwrap());

    let report = a.tick().await;
    assert_eq!(report.conflicts, 0);
    assert_eq!(a.status("gmail").await, Some(RecordStatus::Changed));

    let report = a.tick().await;
    assert_eq!(report.pushed, 1);
    assert_eq!(report.conflicts, 0);
    assert_eq!(a.status("gmail").await, Some(RecordStatus::Saved));
    assert_eq!(a.versions("gmail").await.len(), 1);
    assert_eq!(server.versions("alice", "gmail"), vec![on_server(&sealed)]);
    assert_eq!(server.state.storage.status(user_id, "gmail").unwrap(), Some(STATUS_SAVED));
}

#[tokio::test]
async fn lost_replace_response_settles_on_retry() {
    let server = TestServer::start().await;
    let a = Agent::new(&server.base);
    a.client.sign_up("alice", "hunter2").await.unwrap();
    let gmail = password("gmail", "a@x", "p");
    a.vault.save_plain(&gmail).await.unwrap();

    let edit = gmail.edited("", &note("new")).unwrap();
    a.offline_vault().edit_plain(&edit).await.unwrap();
    assert_eq!(a.status("gmail").await, Some(RecordStatus::Changed));

    let sealed = a.sealed("gmail").await;
    assert!(server
        .state
        .storage
        .replace(server.user_id("alice"), &on_server(&sealed))
        .unwrap());

    let report = a.tick().await;
    assert_eq!(report.pushed, 1);
    assert_eq!(report.conflicts, 0);
    assert_eq!(a.status("gmail").await, Some(RecordStatus::Saved));
    assert_eq!(server.versions("alice", "gmail"), vec![on_server(&sealed)]);
    assert_eq!(a.versions("gmail").await[0].value().unwrap(), note("new"));
}

#[tokio::test]
async fn same_name_created_on_two_agents_conflicts() {
    let server = TestServer::start().await;
    let a = Agent::new(&server.base);
    let b = Agent::new(&server.base);
    a.client.sign_up("alice", "hunter2").await.unwrap();
    b.client.sign_in("alice", "hunter2").await.unwrap();

    let from_a = password("gmail", "a@x", "p");
    let from_b = password("gmail", "b@x", "q");
    a.offline_vault().save_plain(&from_a).await.unwrap();
    b.offline_vault().save_plain(&from_b).await.unwrap();

    assert_eq!(a.tick().await.pushed, 1);
    assert_eq!(a.status("gmail").await, Some(RecordStatus::Saved));

    // B's add is refused; its record goes through replace next time.
    let report = b.tick().await;
    assert_eq!(report.pushed, 0);
    assert_eq!(report.conflicts, 0);
    assert_eq!(b.status("gmail").await, Some(RecordStatus::Changed));
    assert_eq!(b.versions("gmail").await[0].value().unwrap(), from_b.value().unwrap());

    let report = b.tick().await;
    assert_eq!(report.conflicts, 1);
    assert_eq!(
        server.state.storage.status(server.user_id("alice"), "gmail").unwrap(),
        Some(STATUS_CONFLICT)
    );
    assert_eq!(server.versions("alice", "gmail").len(), 2);

    a.tick().await;
    for agent in [&a, &b] {
        assert_eq!(agent.status("gmail").await, Some(RecordStatus::Conflict));
        let values: Vec<RecordValue> = agent
            .versions("gmail")
            .await
            .iter()
            .map(|v| v.value().unwrap())
            .collect();
        assert_eq!(values.len(), 2);
        assert!(values.contains(&from_a.value().unwrap()));
        assert!(values.contains(&from_b.value().unwrap()));
    }
}

#[tokio::test]
async fn edit_of_record_deleted_on_server_is_quarantined() {
    let server = TestServer::start().await;
    let a = Agent::new(&server.base);
    a.client.sign_up("alice", "hunter2").await.unwrap();
    let gmail = password("gmail", "a@x", "p");
    a.vault.save_plain(&gmail).await.unwrap();

    let edit = gmail.edited("", &note("offline edit")).unwrap();
    a.offline_vault().edit_plain(&edit).await.unwrap();
    assert!(server.state.storage.delete(server.user_id("alice"), "gmail").unwrap());

    let result = a.reconciler.tick(&mut Shutdown::never()).await;
    assert!(matches!(result, Err(KeeperError::Invariant(_))));
    assert_eq!(a.reconciler.quarantined(), vec!["gmail".to_string()]);
    assert_eq!(a.status("gmail").await, Some(RecordStatus::Changed));

    // Another agent recreates the name. The quarantined edit stays put.
    let b = Agent::new(&server.base);
    b.client.sign_in("alice", "hunter2").await.unwrap();
    let recreated = password("gmail", "b@x", "q")
        .edited("recreated", &note("from B"))
        .unwrap();
    assert_eq!(b.vault.save_plain(&recreated).await.unwrap(), SaveOutcome::Synced);

    let report = a.tick().await;
    assert_eq!(report.quarantined, 1);
    assert_eq!(report.pushed + report.conflicts, 0);
    assert_eq!(a.status("gmail").await, Some(RecordStatus::Changed));
    assert_eq!(server.versions("alice", "gmail").len(), 1);

    // A user edit releases it and the push resumes.
    let again = a.versions("gmail").await[0]
        .edited("", &note("edited again"))
        .unwrap();
    a.offline_vault().edit_plain(&again).await.unwrap();

    let report = a.tick().await;
    assert!(a.reconciler.quarantined().is_empty());
    assert_eq!(report.quarantined, 0);
    assert_eq!(report.conflicts, 1);
    assert_eq!(a.status("gmail").await, Some(RecordStatus::Conflict));
    assert_eq!(server.versions("alice", "gmail").len(), 2);
}
