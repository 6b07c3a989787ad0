//! StateManager - actor that owns the JobStore
//!
//! Processes commands via channels so every connection task and every job
//! loop shares one serialized view of the registry.

use std::path::Path;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::domain::{Job, JobStatus};

use super::messages::{StateCommand, StateError, StateResponse};
use super::store::JobStore;

/// Handle to send commands to the StateManager
#[derive(Debug, Clone)]
pub struct StateManager {
    tx: mpsc::Sender<StateCommand>,
}

impl StateManager {
    /// Spawn a new StateManager actor
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn(registry_path: impl AsRef<Path>) -> eyre::Result<Self> {
        debug!(registry_path = %registry_path.as_ref().display(), "spawn: called");
        let store = JobStore::open(registry_path.as_ref())?;
        info!(job_count = store.len(), "Opened job registry");

        let (tx, rx) = mpsc::channel(256);
        tokio::spawn(actor_loop(store, rx));

        info!("StateManager spawned");
        Ok(Self { tx })
    }

    async fn request<T>(&self, build: impl FnOnce(oneshot::Sender<StateResponse<T>>) -> StateCommand) -> StateResponse<T> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(build(reply_tx))
            .await
            .map_err(|_| StateError::ChannelError)?;
        reply_rx.await.map_err(|_| StateError::ChannelError)?
    }

    /// Insert or overwrite a job, returning the previous descriptor
    pub async fn put_job(&self, name: &str, job: Job) -> StateResponse<Option<Job>> {
        debug!(%name, "put_job: called");
        let name = name.to_string();
        self.request(|reply| StateCommand::PutJob { name, job, reply }).await
    }

    /// Delete a job, returning it if it existed
    pub async fn remove_job(&self, name: &str) -> StateResponse<Option<Job>> {
        debug!(%name, "remove_job: called");
        let name = name.to_string();
        self.request(|reply| StateCommand::RemoveJob { name, reply }).await
    }

    pub async fn get_job(&self, name: &str) -> StateResponse<Option<Job>> {
        debug!(%name, "get_job: called");
        let name = name.to_string();
        self.request(|reply| StateCommand::GetJob { name, reply }).await
    }

    /// Job names in registry order
    pub async fn list_names(&self) -> StateResponse<Vec<String>> {
        debug!("list_names: called");
        self.request(|reply| StateCommand::ListNames { reply }).await
    }

    pub async fn snapshot(&self) -> StateResponse<Vec<(String, Job)>> {
        debug!("snapshot: called");
        self.request(|reply| StateCommand::Snapshot { reply }).await
    }

    /// Atomically move a job from `from` to `to`
    ///
    /// Returns false when the job is missing or not in `from`.
    pub async fn transition(&self, name: &str, from: JobStatus, to: JobStatus) -> StateResponse<bool> {
        debug!(%name, %from, %to, "transition: called");
        let name = name.to_string();
        self.request(|reply| StateCommand::Transition { name, from, to, reply })
            .await
    }

    /// Store the latest output of a job
    ///
    /// Returns false when the job no longer exists.
    pub async fn record_output(&self, name: &str, output: String) -> StateResponse<bool> {
        debug!(%name, output_len = output.len(), "record_output: called");
        let name = name.to_string();
        self.request(|reply| StateCommand::RecordOutput { name, output, reply })
            .await
    }

    /// Stop the actor after it drains queued commands
    pub async fn shutdown(&self) {
        debug!("shutdown: called");
        let _ = self.tx.send(StateCommand::Shutdown).await;
    }
}

/// Persist, rolling back the in-memory change with `undo` if the write fails
fn persist_or_rollback(store: &mut JobStore, undo: impl FnOnce(&mut JobStore)) -> StateResponse<()> {
    match store.save() {
        Ok(()) => Ok(()),
        Err(e) => {
            warn!(error = %e, "persist_or_rollback: save failed, rolling back");
            undo(store);
            Err(StateError::StoreError(e.to_string()))
        }
    }
}

async fn actor_loop(mut store: JobStore, mut rx: mpsc::Receiver<StateCommand>) {
    debug!("StateManager actor started");

    while let Some(cmd) = rx.recv().await {
        match cmd {
            StateCommand::PutJob { name, job, reply } => {
                debug!(%name, "actor_loop: PutJob command");
                let previous = store.insert(name.clone(), job);
                let undo_previous = previous.clone();
                let result = persist_or_rollback(&mut store, |store| match undo_previous {
                    Some(old) => {
                        store.insert(name, old);
                    }
                    None => {
                        store.remove(&name);
                    }
                })
                .map(|()| previous);
                let _ = reply.send(result);
            }

            StateCommand::RemoveJob { name, reply } => {
                debug!(%name, "actor_loop: RemoveJob command");
                let result = match store.remove(&name) {
                    Some(job) => {
                        let undo_job = job.clone();
                        persist_or_rollback(&mut store, |store| {
                            store.insert(name, undo_job);
                        })
                        .map(|()| Some(job))
                    }
                    None => Ok(None),
                };
                let _ = reply.send(result);
            }

            StateCommand::GetJob { name, reply } => {
                debug!(%name, "actor_loop: GetJob command");
                let _ = reply.send(Ok(store.get(&name).cloned()));
            }

            StateCommand::ListNames { reply } => {
                debug!("actor_loop: ListNames command");
                let _ = reply.send(Ok(store.names()));
            }

            StateCommand::Snapshot { reply } => {
                debug!("actor_loop: Snapshot command");
                let _ = reply.send(Ok(store.snapshot()));
            }

            StateCommand::Transition { name, from, to, reply } => {
                debug!(%name, %from, %to, "actor_loop: Transition command");
                let result = match store.get_mut(&name) {
                    Some(job) if job.status == from => {
                        job.status = to;
                        persist_or_rollback(&mut store, |store| {
                            if let Some(job) = store.get_mut(&name) {
                                job.status = from;
                            }
                        })
                        .map(|()| true)
                    }
                    _ => Ok(false),
                };
                let _ = reply.send(result);
            }

            StateCommand::RecordOutput { name, output, reply } => {
                debug!(%name, "actor_loop: RecordOutput command");
                let result = match store.get_mut(&name) {
                    Some(job) => {
                        job.last_output = output;
                        if let Err(e) = store.save() {
                            warn!(%name, error = %e, "Failed to persist job output");
                        }
                        Ok(true)
                    }
                    None => Ok(false),
                };
                let _ = reply.send(result);
            }

            StateCommand::Shutdown => {
                debug!("actor_loop: Shutdown command");
                info!("StateManager shutting down");
                break;
            }
        }
    }

    debug!("actor_loop: exiting");
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_put_get_list() {
        let temp = TempDir::new().unwrap();
        let state = StateManager::spawn(temp.path().join("apps.json")).unwrap();

        assert!(state.put_job("b", Job::new("b.sh", "true", 10)).await.unwrap().is_none());
        assert!(state.put_job("a", Job::new("a.sh", "true", 10)).await.unwrap().is_none());

        assert_eq!(state.list_names().await.unwrap(), vec!["a".to_string(), "b".to_string()]);
        assert_eq!(state.get_job("a").await.unwrap().unwrap().filename, "a.sh");
        assert!(state.get_job("zzz").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_put_overwrites_and_returns_previous() {
        let temp = TempDir::new().unwrap();
        let state = StateManager::spawn(temp.path().join("apps.json")).unwrap();

        state.put_job("x", Job::new("old.sh", "true", 10)).await.unwrap();
        let previous = state.put_job("x", Job::new("new.sh", "true", 10)).await.unwrap();
        assert_eq!(previous.unwrap().filename, "old.sh");
        assert_eq!(state.get_job("x").await.unwrap().unwrap().filename, "new.sh");
    }

    #[tokio::test]
    async fn test_transition_is_conditional() {
        let temp = TempDir::new().unwrap();
        let state = StateManager::spawn(temp.path().join("apps.json")).unwrap();
        state.put_job("x", Job::new("f", "true", 10)).await.unwrap();

        assert!(state.transition("x", JobStatus::Running, JobStatus::Stopped).await.unwrap());
        assert!(!state.transition("x", JobStatus::Running, JobStatus::Stopped).await.unwrap());
        assert!(!state.transition("missing", JobStatus::Stopped, JobStatus::Running).await.unwrap());
        assert_eq!(state.get_job("x").await.unwrap().unwrap().status, JobStatus::Stopped);
    }

    #[tokio::test]
    async fn test_record_output_on_missing_job() {
        let temp = TempDir::new().unwrap();
        let state = StateManager::spawn(temp.path().join("apps.json")).unwrap();

        assert!(!state.record_output("ghost", "out".to_string()).await.unwrap());
        state.put_job("x", Job::new("f", "true", 10)).await.unwrap();
        assert!(state.record_output("x", "out".to_string()).await.unwrap());
        assert_eq!(state.get_job("x").await.unwrap().unwrap().last_output, "out");
    }

    #[tokio::test]
    async fn test_mutations_are_persisted() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("apps.json");
        let state = StateManager::spawn(&path).unwrap();

        state.put_job("x", Job::new("f", "true", 10)).await.unwrap();
        state.put_job("y", Job::new("g", "true", 10)).await.unwrap();
        state.record_output("x", "hello".to_string()).await.unwrap();
        state.remove_job("y").await.unwrap();

        let reopened = JobStore::open(&path).unwrap();
        assert_eq!(reopened.names(), vec!["x".to_string()]);
        assert_eq!(reopened.get("x").unwrap().last_output, "hello");
    }

    #[tokio::test]
    async fn test_concurrent_puts_are_not_lost() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("apps.json");
        let state = StateManager::spawn(&path).unwrap();

        let mut handles = Vec::new();
        for i in 0..20 {
            let state = state.clone();
            handles.push(tokio::spawn(async move {
                state.put_job(&format!("job{i}"), Job::new("f", "true", 10)).await.unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(state.list_names().await.unwrap().len(), 20);
        assert_eq!(JobStore::open(&path).unwrap().len(), 20);
    }

    #[tokio::test]
    async fn test_shutdown_closes_channel() {
        let temp = TempDir::new().unwrap();
        let state = StateManager::spawn(temp.path().join("apps.json")).unwrap();
        state.shutdown().await;
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert!(matches!(state.list_names().await, Err(StateError::ChannelError)));
    }
}
