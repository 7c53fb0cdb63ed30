//! Reconciler: the periodic three-phase sync of one signed-in user.
//!
//! 1. push `NEW` records through `/data/add`
//! 2. push `CHANGED` (conditional) and `FIX_CONFLICT` (unconditional)
//!    records through `/data/replace`, appending on conflict
//! 3. pull the authoritative set and mirror it locally
//!
//! Phases run sequentially and the first failing phase ends the tick.

use crate::database::{AgentStore, MirrorOutcome, StoredRecord};
use crate::record::{EncryptedRecord, RecordStatus};
use crate::session::UserInfoStorage;
use crate::shutdown::Shutdown;
use crate::sync::client::ApiClient;
use crate::sync::models::{ReplaceMode, Reply};
use crate::sync::state::{next_status, PushOutcome, SyncEvent};
use crate::{KeeperError, Result};
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// What one tick did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    /// The previous tick was still running, so this one did nothing.
    pub skipped: bool,
    /// Records the server accepted.
    pub pushed: usize,
    /// Records that ended up in conflict because of a push.
    pub conflicts: usize,
    /// Local rows written by the pull.
    pub pulled: usize,
    /// Local rows removed because the server no longer has them.
    pub pruned: usize,
    /// Records left alone because they are quarantined.
    pub quarantined: usize,
    /// The server demanded a pull before accepting pushes.
    pub forbidden_retry: bool,
}

/// Drives replication between the agent store and the server.
pub struct Reconciler {
    client: ApiClient,
    store: AgentStore,
    session: UserInfoStorage,
    running: tokio::sync::Mutex<()>,
    /// Records that violated an invariant, with the versions they held.
    quarantine: Mutex<HashMap<String, Vec<EncryptedRecord>>>,
}

fn unexpected(reply: Reply, name: &str) -> KeeperError {
    let status = match reply {
        Reply::ServerError(code) | Reply::Unexpected(code) => code,
        Reply::Ok => 200,
        Reply::Conflict => 409,
        Reply::NotFound => 404,
        Reply::Forbidden => 403,
    };
    KeeperError::Server {
        status,
        message: format!("unexpected reply for {:?}", name),
    }
}

impl Reconciler {
    pub fn new(client: ApiClient) -> Self {
        let store = client.store().clone();
        let session = client.session().clone();
        Self {
            client,
            store,
            session,
            running: tokio::sync::Mutex::new(()),
            quarantine: Mutex::new(HashMap::new()),
        }
    }

    /// Run one tick. Returns a skipped report if a tick is already running.
    pub async fn tick(&self, shutdown: &mut Shutdown) -> Result<TickReport> {
        let Ok(_running) = self.running.try_lock() else {
            debug!("Previous sync tick still running, skipping");
            return Ok(TickReport {
                skipped: true,
                ..TickReport::default()
            });
        };

        let user_id = self.session.user_id().await?;
        let mut report = TickReport::default();

        match self.push(user_id, shutdown, &mut report).await {
            Err(KeeperError::Forbidden) => {
                warn!("Server requires a pull before accepting pushes");
                report.forbidden_retry = true;
                self.pull(user_id, shutdown, &mut report).await?;
                self.push(user_id, shutdown, &mut report).await?;
            }
            other => other?,
        }
        self.pull(user_id, shutdown, &mut report).await?;

        Ok(report)
    }

    /// Tick every `period` until `shutdown` fires.
    pub async fn run(&self, period: Duration, mut shutdown: Shutdown) {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        info!("Reconciler started (period {:?})", period);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }
            if !self.session.is_signed_in().await {
                continue;
            }

            match self.tick(&mut shutdown).await {
                Ok(report) => debug!(?report, "Sync tick finished"),
                Err(KeeperError::Cancelled) => break,
                Err(e) if e.is_recoverable() => warn!("Sync tick deferred: {}", e),
                Err(e) => error!("Sync tick failed: {}", e),
            }
        }
        info!("Reconciler stopped");
    }

    /// Names currently quarantined.
    pub fn quarantined(&self) -> Vec<String> {
        let quarantine = self.quarantine.lock().unwrap_or_else(|e| e.into_inner());
        let mut names: Vec<String> = quarantine.keys().cloned().collect();
        names.sort();
        names
    }

    /// Whether `record` is quarantined. A record whose versions changed
    /// since it was quarantined has been edited by the user and is released.
    fn is_quarantined(&self, record: &StoredRecord) -> bool {
        let mut quarantine = self.quarantine.lock().unwrap_or_else(|e| e.into_inner());
        match quarantine.get(&record.name) {
            Some(versions) if *versions == record.versions => true,
            Some(_) => {
                info!("Record {:?} edited, leaving quarantine", record.name);
                quarantine.remove(&record.name);
                false
            }
            None => false,
        }
    }

    fn quarantine(&self, record: &StoredRecord, reason: &str) -> KeeperError {
        error!("Quarantining record {:?}: {}", record.name, reason);
        let mut quarantine = self.quarantine.lock().unwrap_or_else(|e| e.into_inner());
        quarantine.insert(record.name.clone(), record.versions.clone());
        KeeperError::Invariant(format!("{:?}: {}", record.name, reason))
    }

    fn release_missing(&self, present: &HashSet<String>) {
        let mut quarantine = self.quarantine.lock().unwrap_or_else(|e| e.into_inner());
        quarantine.retain(|name, _| present.contains(name));
    }

    /// Phases 1 and 2.
    async fn push(
        &self,
        user_id: i64,
        shutdown: &mut Shutdown,
        report: &mut TickReport,
    ) -> Result<()> {
        let records = self.store.list(user_id)?;
        let present: HashSet<String> = records.iter().map(|r| r.name.clone()).collect();
        self.release_missing(&present);

        let mut pending = Vec::new();
        for record in records {
            if !record.status.is_pending() {
                continue;
            }
            if self.is_quarantined(&record) {
                report.quarantined += 1;
                continue;
            }
            pending.push(record);
        }

        for record in pending.iter().filter(|r| r.status == RecordStatus::New) {
            self.push_new(user_id, record, shutdown, report).await?;
        }
        for record in pending.iter().filter(|r| r.status != RecordStatus::New) {
            self.push_changed(user_id, record, shutdown, report).await?;
        }
        Ok(())
    }

    fn single_version<'a>(&self, record: &'a StoredRecord) -> Result<&'a EncryptedRecord> {
        match record.versions.as_slice() {
            [version] => Ok(version),
            versions => Err(self.quarantine(
                record,
                &format!("{} holds {} versions", record.status, versions.len()),
            )),
        }
    }

    async fn push_new(
        &self,
        user_id: i64,
        record: &StoredRecord,
        shutdown: &mut Shutdown,
        report: &mut TickReport,
    ) -> Result<()> {
        let version = self.single_version(record)?;
        let reply = shutdown.guard(self.client.add(version)).await??;
        let outcome = match reply {
            Reply::Ok => PushOutcome::Accepted,
            Reply::Conflict => PushOutcome::Conflict,
            Reply::Forbidden => return Err(KeeperError::Forbidden),
            other => return Err(unexpected(other, &record.name)),
        };
        debug!("Pushed new record {:?}: {:?}", record.name, outcome);
        self.settle(user_id, record, version, outcome, report)
    }

    async fn push_changed(
        &self,
        user_id: i64,
        record: &StoredRecord,
        shutdown: &mut Shutdown,
        report: &mut TickReport,
    ) -> Result<()> {
        let version = self.single_version(record)?;
        let mode = match record.status {
            RecordStatus::FixConflict => ReplaceMode::Unconditional,
            _ => ReplaceMode::Conditional(record.base_edit_date),
        };

        let reply = shutdown.guard(self.client.replace(version, mode)).await??;
        let outcome = match reply {
            Reply::Ok => PushOutcome::Accepted,
            Reply::Conflict if record.status == RecordStatus::Changed => {
                debug!("Server rejected edit of {:?}, appending as a version", record.name);
                match shutdown.guard(self.client.append(version)).await?? {
                    Reply::Ok => PushOutcome::Conflict,
                    Reply::NotFound => {
                        return Err(self.quarantine(record, "server lost the record during append"))
                    }
                    Reply::Forbidden => return Err(KeeperError::Forbidden),
                    other => return Err(unexpected(other, &record.name)),
                }
            }
            Reply::NotFound => {
                return Err(self.quarantine(record, "server does not have the record"))
            }
            Reply::Forbidden => return Err(KeeperError::Forbidden),
            other => return Err(unexpected(other, &record.name)),
        };
        debug!("Pushed edit of {:?}: {:?}", record.name, outcome);
        self.settle(user_id, record, version, outcome, report)
    }

    /// Apply the status change for a push the server already answered.
    fn settle(
        &self,
        user_id: i64,
        record: &StoredRecord,
        pushed: &EncryptedRecord,
        outcome: PushOutcome,
        report: &mut TickReport,
    ) -> Result<()> {
        let status = next_status(Some(record.status), SyncEvent::Pushed(outcome))?;
        match outcome {
            PushOutcome::Accepted => report.pushed += 1,
            PushOutcome::Conflict if status == RecordStatus::Conflict => report.conflicts += 1,
            _ => {}
        }

        if self.store.settle(user_id, pushed, status)? {
            return Ok(());
        }
        if outcome == PushOutcome::Accepted
            && self.store.rebase(user_id, &record.name, pushed.edit_date)?
        {
            debug!("Record {:?} edited during push, kept for next tick", record.name);
            return Ok(());
        }
        debug!("Record {:?} changed during push, status left as is", record.name);
        Ok(())
    }

    /// Phase 3.
    async fn pull(
        &self,
        user_id: i64,
        shutdown: &mut Shutdown,
        report: &mut TickReport,
    ) -> Result<()> {
        let before = self.store.list(user_id)?;
        let groups = shutdown.guard(self.client.fetch_all()).await??;

        let mut remote = HashSet::new();
        for versions in groups {
            if shutdown.is_cancelled() {
                return Err(KeeperError::Cancelled);
            }
            let Some(first) = versions.first() else {
                continue;
            };
            let name = first.name.clone();
            if versions.iter().any(|v| v.name != name) {
                return Err(KeeperError::Invariant(format!(
                    "server group {:?} mixes record names",
                    name
                )));
            }

            let event = if versions.len() == 1 {
                SyncEvent::PulledSingle
            } else {
                SyncEvent::PulledMulti
            };
            let status = next_status(None, event)?;

            match self.store.mirror(user_id, &versions, status)? {
                MirrorOutcome::Replaced => report.pulled += 1,
                MirrorOutcome::Unchanged => {}
                MirrorOutcome::Skipped(local) => {
                    debug!("Keeping unpushed {} record {:?}", local, name)
                }
                MirrorOutcome::Missing => {
                    if !self.store.add_multi(user_id, &versions, status)? {
                        return Err(KeeperError::Invariant(format!(
                            "local store disagreed about {:?} between replace and add",
                            name
                        )));
                    }
                    report.pulled += 1;
                }
            }
            remote.insert(name);
        }

        for record in before {
            if remote.contains(&record.name) || record.status.is_pending() {
                continue;
            }
            if self.store.delete_exact(user_id, &record)? {
                debug!("Pruned {:?}, deleted on the server", record.name);
                report.pruned += 1;
            }
        }
        Ok(())
    }
}
