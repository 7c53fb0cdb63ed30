//! Agent runtime: wires the services together and runs the background
//! reconciliation and cache-refresh tasks.

use crate::cache::PlaintextCache;
use crate::database::AgentStore;
use crate::session::UserInfoStorage;
use crate::shutdown::ShutdownTrigger;
use crate::sync::{ApiClient, Reconciler};
use crate::vault::VaultService;
use crate::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Default reconciliation period.
pub const DEFAULT_SYNC_PERIOD: Duration = Duration::from_secs(600);

/// Default plaintext cache refresh period.
pub const DEFAULT_CACHE_PERIOD: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Server base URL, e.g. `http://127.0.0.1:8080`.
    pub server_url: String,
    pub sync_period: Duration,
    pub cache_period: Duration,
}

impl RuntimeConfig {
    pub fn new(server_url: impl Into<String>) -> Self {
        Self {
            server_url: server_url.into(),
            sync_period: DEFAULT_SYNC_PERIOD,
            cache_period: DEFAULT_CACHE_PERIOD,
        }
    }
}

/// A running background task and its own cancellation trigger.
struct Task {
    name: &'static str,
    trigger: ShutdownTrigger,
    handle: JoinHandle<()>,
}

/// All agent services for one process.
pub struct AgentRuntime {
    pub config: RuntimeConfig,
    pub store: AgentStore,
    pub session: UserInfoStorage,
    pub client: ApiClient,
    pub vault: VaultService,
    pub reconciler: Arc<Reconciler>,
    pub cache: Arc<PlaintextCache>,
    root: ShutdownTrigger,
    tasks: Vec<Task>,
}

impl AgentRuntime {
    pub fn new(config: RuntimeConfig, store: AgentStore) -> Result<Self> {
        let session = UserInfoStorage::new();
        let client = ApiClient::new(&config.server_url, session.clone(), store.clone())?;
        let vault = VaultService::new(client.clone());
        let reconciler = Arc::new(Reconciler::new(client.clone()));
        let cache = Arc::new(PlaintextCache::new(store.clone(), session.clone()));

        Ok(Self {
            config,
            store,
            session,
            client,
            vault,
            reconciler,
            cache,
            root: ShutdownTrigger::new(),
            tasks: Vec::new(),
        })
    }

    /// Spawn the reconciliation and cache-refresh tasks.
    pub fn start(&mut self) {
        if !self.tasks.is_empty() {
            warn!("Agent runtime already started");
            return;
        }

        let trigger = self.root.child();
        let shutdown = trigger.subscribe();
        let reconciler = Arc::clone(&self.reconciler);
        let period = self.config.sync_period;
        let handle = tokio::spawn(async move { reconciler.run(period, shutdown).await });
        self.tasks.push(Task {
            name: "reconciler",
            trigger,
            handle,
        });

        let trigger = self.root.child();
        let shutdown = trigger.subscribe();
        let cache = Arc::clone(&self.cache);
        let period = self.config.cache_period;
        let handle = tokio::spawn(async move { cache.run(period, shutdown).await });
        self.tasks.push(Task {
            name: "cache",
            trigger,
            handle,
        });

        info!("Agent runtime started");
    }

    /// Stop a single background task by name.
    pub fn stop_task(&self, name: &str) -> bool {
        match self.tasks.iter().find(|t| t.name == name) {
            Some(task) => {
                task.trigger.cancel();
                true
            }
            None => false,
        }
    }

    /// A trigger cancelled together with the runtime, for foreground work.
    pub fn child_trigger(&self) -> ShutdownTrigger {
        self.root.child()
    }

    /// Cancel every task and wait for them to finish.
    pub async fn shutdown(&mut self) {
        self.root.cancel();
        for task in self.tasks.drain(..) {
            if let Err(e) = task.handle.await {
                warn!("Task {} ended abnormally: {}", task.name, e);
            }
        }
        info!("Agent runtime stopped");
    }
}
