//! JobManager - public job operations and the loop task table
//!
//! The JobManager is responsible for:
//! - Materializing job files under the apps directory
//! - Mutating the registry through the StateManager
//! - Spawning one scheduler loop per running job and tracking its handle
//! - Cancelling and awaiting every loop on shutdown

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use eyre::{Context, Result};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::domain::{Job, JobStatus, is_plain_component};
use crate::protocol::Reply;
use crate::state::StateManager;

use super::runner::{DEFAULT_SHELL, JobRunner};
use super::scheduler::{JobLoopResult, run_job_loop};

const NOT_FOUND: &str = "Программа не найдена.";
const NOT_FOUND_OR_RUNNING: &str = "Программа не найдена или уже запущена.";
const NOT_FOUND_OR_STOPPED: &str = "Программа не найдена или уже остановлена.";
const INVALID_NAME: &str = "Ошибка: недопустимое имя программы или файла";

/// Configuration for the JobManager
#[derive(Debug, Clone)]
pub struct JobManagerConfig {
    /// Directory holding one subdirectory per job
    pub apps_dir: PathBuf,

    /// Shell used to interpret launch commands
    pub shell: String,

    /// How long shutdown waits for loops before aborting them
    pub shutdown_timeout: Duration,
}

impl Default for JobManagerConfig {
    fn default() -> Self {
        Self {
            apps_dir: PathBuf::from("apps"),
            shell: DEFAULT_SHELL.to_string(),
            shutdown_timeout: Duration::from_secs(10),
        }
    }
}

/// Handle to one spawned scheduler loop
#[derive(Debug)]
struct JobTask {
    token: CancellationToken,
    handle: JoinHandle<JobLoopResult>,
}

#[derive(Debug, Default)]
struct TaskTable {
    /// The current loop for each job name
    active: HashMap<String, JobTask>,
    /// Cancelled loops that may still be finishing an iteration
    retired: Vec<JobTask>,
}

impl TaskTable {
    /// Drop handles whose loops have already finished
    fn reap_finished(&mut self) {
        self.active.retain(|_, task| !task.handle.is_finished());
        self.retired.retain(|task| !task.handle.is_finished());
    }
}

/// Executes job operations against the registry and the loop table
#[derive(Debug)]
pub struct JobManager {
    config: JobManagerConfig,
    state: StateManager,
    runner: JobRunner,
    tasks: Mutex<TaskTable>,
    /// Held by add/remove/start/stop so a registry change and the matching
    /// loop table change happen as one step
    lifecycle: tokio::sync::Mutex<()>,
}

impl JobManager {
    pub fn new(config: JobManagerConfig, state: StateManager) -> Self {
        debug!(?config.apps_dir, shell = %config.shell, "JobManager::new: called");
        let runner = JobRunner::new(config.shell.clone());
        Self {
            config,
            state,
            runner,
            tasks: Mutex::new(TaskTable::default()),
            lifecycle: tokio::sync::Mutex::new(()),
        }
    }

    pub fn state(&self) -> &StateManager {
        &self.state
    }

    /// Directory a job's file lives in and its command runs in
    pub fn job_dir(&self, name: &str) -> PathBuf {
        self.config.apps_dir.join(name)
    }

    fn table(&self) -> std::sync::MutexGuard<'_, TaskTable> {
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register (or replace) a job, write its file, and start its loop
    pub async fn add(
        &self,
        name: &str,
        filename: &str,
        launch_command: &str,
        interval_ms: u64,
        file_contents: &str,
    ) -> Result<Reply> {
        debug!(%name, %filename, %launch_command, interval_ms, "add: called");
        if !is_plain_component(name) || !is_plain_component(filename) {
            debug!(%name, %filename, "add: rejected name");
            return Ok(Reply::message(INVALID_NAME));
        }

        let _guard = self.lifecycle.lock().await;

        // Never let two loops run for one name
        let previous = self.table().active.remove(name);
        if let Some(task) = previous {
            debug!(%name, "add: cancelling previous loop");
            task.token.cancel();
            log_loop_result(name, task.handle.await);
        }

        if let Err(e) = self.write_job_files(name, filename, file_contents).await {
            // The old loop is gone; leave the old entry startable instead of Running
            if self.state.transition(name, JobStatus::Running, JobStatus::Stopped).await? {
                warn!(%name, "add: files not written, previous job marked stopped");
            }
            return Err(e);
        }

        self.state
            .put_job(name, Job::new(filename, launch_command, interval_ms))
            .await
            .context("Failed to register job")?;
        self.spawn_loop(name);

        info!(%name, interval_ms, "Job added");
        Ok(Reply::message(format!("Программа {} добавлена и запущена.", name)))
    }

    /// Clear the job directory and write the job's file into it
    async fn write_job_files(&self, name: &str, filename: &str, file_contents: &str) -> Result<()> {
        let job_dir = self.job_dir(name);
        if tokio::fs::try_exists(&job_dir).await.unwrap_or(false) {
            tokio::fs::remove_dir_all(&job_dir)
                .await
                .with_context(|| format!("Failed to clear job directory {}", job_dir.display()))?;
        }
        tokio::fs::create_dir_all(&job_dir)
            .await
            .with_context(|| format!("Failed to create job directory {}", job_dir.display()))?;
        let file_path = job_dir.join(filename);
        tokio::fs::write(&file_path, file_contents)
            .await
            .with_context(|| format!("Failed to write job file {}", file_path.display()))?;
        Ok(())
    }

    /// Delete a job's directory and registry entry
    ///
    /// The loop is cancelled only once both are gone, so a failed removal
    /// leaves the job running as before.
    pub async fn remove(&self, name: &str) -> Result<Reply> {
        debug!(%name, "remove: called");
        let _guard = self.lifecycle.lock().await;
        if self.state.get_job(name).await?.is_none() {
            debug!(%name, "remove: not found");
            return Ok(Reply::message(NOT_FOUND));
        }

        let job_dir = self.job_dir(name);
        if is_plain_component(name) && tokio::fs::try_exists(&job_dir).await.unwrap_or(false) {
            tokio::fs::remove_dir_all(&job_dir)
                .await
                .with_context(|| format!("Failed to remove job directory {}", job_dir.display()))?;
        }

        self.state.remove_job(name).await.context("Failed to remove job")?;

        // Keep the handle so a later add of the same name waits for it
        if let Some(task) = self.table().active.get(name) {
            task.token.cancel();
        }
        info!(%name, "Job removed");
        Ok(Reply::message(format!("Программа {} удалена.", name)))
    }

    /// Resume a stopped job
    pub async fn start(&self, name: &str) -> Result<Reply> {
        debug!(%name, "start: called");
        let _guard = self.lifecycle.lock().await;
        if !self.state.transition(name, JobStatus::Stopped, JobStatus::Running).await? {
            debug!(%name, "start: not found or already running");
            return Ok(Reply::message(NOT_FOUND_OR_RUNNING));
        }
        self.spawn_loop(name);
        info!(%name, "Job started");
        Ok(Reply::message(format!("Программа {} запущена.", name)))
    }

    /// Stop a running job after its current iteration
    pub async fn stop(&self, name: &str) -> Result<Reply> {
        debug!(%name, "stop: called");
        let _guard = self.lifecycle.lock().await;
        if !self.state.transition(name, JobStatus::Running, JobStatus::Stopped).await? {
            debug!(%name, "stop: not found or already stopped");
            return Ok(Reply::message(NOT_FOUND_OR_STOPPED));
        }
        if let Some(task) = self.table().active.get(name) {
            task.token.cancel();
        }
        info!(%name, "Job stopped");
        Ok(Reply::message(format!("Программа {} остановлена.", name)))
    }

    pub async fn list(&self) -> Result<Reply> {
        debug!("list: called");
        Ok(Reply::List(self.state.list_names().await?))
    }

    /// Output of the job's most recent run
    pub async fn get_result(&self, name: &str) -> Result<Reply> {
        debug!(%name, "get_result: called");
        match self.state.get_job(name).await? {
            Some(job) => Ok(Reply::Message(job.last_output)),
            None => Ok(Reply::message(NOT_FOUND)),
        }
    }

    /// Spawn loops for jobs persisted as running
    ///
    /// Call once at startup, before serving connections.
    pub async fn resume_running(&self) -> Result<usize> {
        debug!("resume_running: called");
        let snapshot = self.state.snapshot().await.context("Failed to read registry")?;
        let mut resumed = 0;
        for (name, job) in snapshot {
            if job.is_running() {
                info!(%name, "Resuming job");
                self.spawn_loop(&name);
                resumed += 1;
            }
        }
        info!(resumed, "Resumed running jobs");
        Ok(resumed)
    }

    /// Number of loops that have not finished yet
    pub fn running_count(&self) -> usize {
        let table = self.table();
        table.active.values().filter(|t| !t.handle.is_finished()).count()
            + table.retired.iter().filter(|t| !t.handle.is_finished()).count()
    }

    /// Whether `name` has a loop that is neither cancelled nor finished
    pub fn has_live_loop(&self, name: &str) -> bool {
        self.table()
            .active
            .get(name)
            .is_some_and(|t| !t.token.is_cancelled() && !t.handle.is_finished())
    }

    fn spawn_loop(&self, name: &str) {
        debug!(%name, "spawn_loop: called");
        let token = CancellationToken::new();
        let handle = tokio::spawn(run_job_loop(
            name.to_string(),
            self.state.clone(),
            self.runner.clone(),
            self.job_dir(name),
            token.clone(),
        ));

        let mut table = self.table();
        table.reap_finished();
        if let Some(old) = table.active.insert(name.to_string(), JobTask { token, handle }) {
            debug!(%name, "spawn_loop: retiring previous loop");
            old.token.cancel();
            table.retired.push(old);
        }
        debug!(%name, active = table.active.len(), retired = table.retired.len(), "spawn_loop: complete");
    }

    /// Cancel every loop and wait for them to finish
    ///
    /// Loops still running after the shutdown timeout are aborted. Persisted
    /// statuses are left untouched so the next start resumes them.
    pub async fn shutdown(&self) {
        let tasks: Vec<(String, JobTask)> = {
            let mut table = self.table();
            let mut tasks: Vec<(String, JobTask)> = table.active.drain().collect();
            tasks.extend(table.retired.drain(..).map(|t| (String::new(), t)));
            tasks
        };
        info!("Shutting down JobManager with {} loops", tasks.len());

        for (_, task) in &tasks {
            task.token.cancel();
        }

        let deadline = tokio::time::Instant::now() + self.config.shutdown_timeout;
        for (name, mut task) in tasks {
            match tokio::time::timeout_at(deadline, &mut task.handle).await {
                Ok(result) => log_loop_result(&name, result),
                Err(_) => {
                    warn!(%name, "Aborting job loop after shutdown timeout");
                    task.handle.abort();
                }
            }
        }

        info!("JobManager shutdown complete");
    }
}

fn log_loop_result(name: &str, result: Result<JobLoopResult, tokio::task::JoinError>) {
    match result {
        Ok(JobLoopResult::Stopped { name, iterations }) => info!(%name, iterations, "Job loop stopped"),
        Ok(JobLoopResult::Removed { name, iterations }) => info!(%name, iterations, "Job loop ended, job removed"),
        Ok(JobLoopResult::Cancelled { name, iterations }) => info!(%name, iterations, "Job loop cancelled"),
        Ok(JobLoopResult::Failed { name, reason }) => error!(%name, %reason, "Job loop failed"),
        Err(e) => error!(%name, error = %e, "Job loop task panicked"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn manager(temp: &TempDir) -> JobManager {
        let state = StateManager::spawn(temp.path().join("apps.json")).unwrap();
        let config = JobManagerConfig {
            apps_dir: temp.path().join("apps"),
            shutdown_timeout: Duration::from_secs(5),
            ..Default::default()
        };
        JobManager::new(config, state)
    }

    async fn wait_for_output(manager: &JobManager, name: &str) -> String {
        for _ in 0..100 {
            if let Reply::Message(output) = manager.get_result(name).await.unwrap() {
                if !output.is_empty() && output != NOT_FOUND {
                    return output;
                }
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        String::new()
    }

    #[tokio::test]
    async fn test_add_writes_file_and_lists_job() {
        let temp = TempDir::new().unwrap();
        let manager = manager(&temp);

        let reply = manager.add("x", "f.py", "echo hi", 1000, "print(1)").await.unwrap();
        assert_eq!(reply, Reply::message("Программа x добавлена и запущена."));
        assert_eq!(
            std::fs::read_to_string(temp.path().join("apps").join("x").join("f.py")).unwrap(),
            "print(1)"
        );
        assert_eq!(manager.list().await.unwrap(), Reply::List(vec!["x".to_string()]));
        assert!(manager.has_live_loop("x"));

        manager.shutdown().await;
    }

    #[tokio::test]
    async fn test_add_eventually_records_output() {
        let temp = TempDir::new().unwrap();
        let manager = manager(&temp);

        manager.add("x", "f.sh", "cat f.sh", 50, "contents").await.unwrap();
        assert_eq!(wait_for_output(&manager, "x").await, "contents");

        manager.shutdown().await;
    }

    #[tokio::test]
    async fn test_add_rejects_path_like_names() {
        let temp = TempDir::new().unwrap();
        let manager = manager(&temp);

        let reply = manager.add("../evil", "f", "true", 10, "").await.unwrap();
        assert_eq!(reply, Reply::message(INVALID_NAME));
        let reply = manager.add("ok", "sub/f", "true", 10, "").await.unwrap();
        assert_eq!(reply, Reply::message(INVALID_NAME));
        assert_eq!(manager.list().await.unwrap(), Reply::List(Vec::new()));
    }

    #[tokio::test]
    async fn test_readd_replaces_loop_and_file() {
        let temp = TempDir::new().unwrap();
        let manager = manager(&temp);

        manager.add("x", "old.sh", "cat old.sh", 30, "old").await.unwrap();
        assert_eq!(wait_for_output(&manager, "x").await, "old");

        manager.add("x", "new.sh", "cat new.sh", 30, "new").await.unwrap();
        let job_dir = temp.path().join("apps").join("x");
        assert!(!job_dir.join("old.sh").exists());
        assert!(job_dir.join("new.sh").exists());
        assert_eq!(manager.running_count(), 1);

        let mut output = String::new();
        for _ in 0..100 {
            output = wait_for_output(&manager, "x").await;
            if output == "new" {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(output, "new");

        manager.shutdown().await;
    }

    #[tokio::test]
    async fn test_remove_deletes_directory_and_entry() {
        let temp = TempDir::new().unwrap();
        let manager = manager(&temp);

        manager.add("x", "f.py", "echo hi", 1000, "print(1)").await.unwrap();
        let reply = manager.remove("x").await.unwrap();
        assert_eq!(reply, Reply::message("Программа x удалена."));

        assert!(!temp.path().join("apps").join("x").exists());
        assert_eq!(manager.get_result("x").await.unwrap(), Reply::message(NOT_FOUND));
        assert_eq!(manager.remove("x").await.unwrap(), Reply::message(NOT_FOUND));

        manager.shutdown().await;
    }

    #[tokio::test]
    async fn test_stop_then_stop_again() {
        let temp = TempDir::new().unwrap();
        let manager = manager(&temp);

        manager.add("x", "f", "echo hi", 60_000, "").await.unwrap();
        let output_before = wait_for_output(&manager, "x").await;

        let reply = manager.stop("x").await.unwrap();
        assert_eq!(reply, Reply::message("Программа x остановлена."));
        let reply = manager.stop("x").await.unwrap();
        assert_eq!(reply, Reply::message(NOT_FOUND_OR_STOPPED));

        let job = manager.state().get_job("x").await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Stopped);
        assert_eq!(job.last_output, output_before);

        // Stop cancels the interval wait, so the loop ends promptly
        for _ in 0..100 {
            if !manager.has_live_loop("x") {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(!manager.has_live_loop("x"));
    }

    #[tokio::test]
    async fn test_stop_unknown_job() {
        let temp = TempDir::new().unwrap();
        let manager = manager(&temp);
        assert_eq!(manager.stop("nope").await.unwrap(), Reply::message(NOT_FOUND_OR_STOPPED));
    }

    #[tokio::test]
    async fn test_start_only_from_stopped() {
        let temp = TempDir::new().unwrap();
        let manager = manager(&temp);

        assert_eq!(manager.start("x").await.unwrap(), Reply::message(NOT_FOUND_OR_RUNNING));

        manager.add("x", "f", "true", 60_000, "").await.unwrap();
        assert_eq!(manager.start("x").await.unwrap(), Reply::message(NOT_FOUND_OR_RUNNING));

        manager.stop("x").await.unwrap();
        assert_eq!(manager.start("x").await.unwrap(), Reply::message("Программа x запущена."));
        assert!(manager.has_live_loop("x"));

        manager.shutdown().await;
        assert_eq!(manager.running_count(), 0);
    }

    #[tokio::test]
    async fn test_resume_running_spawns_persisted_jobs() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("apps.json");
        {
            let state = StateManager::spawn(&path).unwrap();
            state.put_job("on", Job::new("f", "echo resumed", 1000)).await.unwrap();
            let mut off = Job::new("g", "true", 1000);
            off.status = JobStatus::Stopped;
            state.put_job("off", off).await.unwrap();
            state.shutdown().await;
        }
        std::fs::create_dir_all(temp.path().join("apps").join("on")).unwrap();

        let manager = manager(&temp);
        assert_eq!(manager.resume_running().await.unwrap(), 1);
        assert!(manager.has_live_loop("on"));
        assert!(!manager.has_live_loop("off"));
        assert_eq!(wait_for_output(&manager, "on").await, "resumed\n");

        manager.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_start_stop_never_orphans_running_job() {
        let temp = TempDir::new().unwrap();
        let manager = Arc::new(manager(&temp));
        manager.add("x", "f", "true", 60_000, "").await.unwrap();

        for round in 0..50 {
            let stopper = {
                let manager = Arc::clone(&manager);
                tokio::spawn(async move { manager.stop("x").await.unwrap() })
            };
            let starter = {
                let manager = Arc::clone(&manager);
                tokio::spawn(async move { manager.start("x").await.unwrap() })
            };
            stopper.await.unwrap();
            starter.await.unwrap();

            let job = manager.state().get_job("x").await.unwrap().unwrap();
            if job.status == JobStatus::Running {
                assert!(manager.has_live_loop("x"), "round {round}: running job has no loop");
            } else {
                assert!(!manager.has_live_loop("x"), "round {round}: stopped job kept a loop");
            }
        }

        manager.shutdown().await;
    }

    #[tokio::test]
    async fn test_failed_readd_leaves_job_startable() {
        let temp = TempDir::new().unwrap();
        let manager = manager(&temp);
        manager.add("x", "f", "true", 60_000, "").await.unwrap();

        // File names longer than the filesystem limit fail at write time
        let long_name = "f".repeat(300);
        assert!(manager.add("x", &long_name, "true", 60_000, "").await.is_err());

        let job = manager.state().get_job("x").await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Stopped);
        assert!(!manager.has_live_loop("x"));

        assert_eq!(manager.start("x").await.unwrap(), Reply::message("Программа x запущена."));
        assert!(manager.has_live_loop("x"));

        manager.shutdown().await;
    }

    #[tokio::test]
    async fn test_failed_remove_keeps_job_running() {
        let temp = TempDir::new().unwrap();
        let manager = manager(&temp);
        manager.add("x", "f", "true", 60_000, "").await.unwrap();

        // A plain file where the job directory should be cannot be removed as a directory
        let job_dir = temp.path().join("apps").join("x");
        std::fs::remove_dir_all(&job_dir).unwrap();
        std::fs::write(&job_dir, "not a directory").unwrap();

        assert!(manager.remove("x").await.is_err());

        let job = manager.state().get_job("x").await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Running);
        assert!(manager.has_live_loop("x"));

        manager.shutdown().await;
    }

    #[tokio::test]
    async fn test_finished_handles_are_pruned() {
        let temp = TempDir::new().unwrap();
        let manager = manager(&temp);

        for i in 0..5 {
            let name = format!("job{i}");
            manager.add(&name, "f", "true", 10, "").await.unwrap();
            manager.remove(&name).await.unwrap();
        }
        for _ in 0..100 {
            if manager.running_count() == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(manager.running_count(), 0);

        manager.add("last", "f", "true", 60_000, "").await.unwrap();
        let table = manager.table();
        assert_eq!(table.active.len(), 1);
        assert!(table.active.contains_key("last"));
        assert!(table.retired.is_empty());
        drop(table);

        manager.shutdown().await;
    }

    #[tokio::test]
    async fn test_shutdown_keeps_persisted_status() {
        let temp = TempDir::new().unwrap();
        let manager = manager(&temp);

        manager.add("x", "f", "true", 60_000, "").await.unwrap();
        manager.shutdown().await;

        assert_eq!(manager.running_count(), 0);
        let job = manager.state().get_job("x").await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Running);
    }
}
