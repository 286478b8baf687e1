//! Shard executors
//!
//! `ProcessExecutor` runs each shard as a child process of the current
//! binary: the assignment goes in as JSON on stdin, the outcome comes back as
//! JSON on stdout, and logs stay on stderr. A crashed child only loses its
//! own shard. `InProcessExecutor` runs shards as tokio tasks over a shared
//! session pool.

use crate::config::HarvestConfig;
use crate::pipeline::{ShardAssignment, ShardOutcome, ShardWorker};
use crate::session::SessionPool;
use crate::HarvestError;
use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

/// Runs one shard to completion
#[async_trait]
pub trait ShardExecutor: Send + Sync {
    async fn run_shard(&self, assignment: ShardAssignment) -> Result<ShardOutcome, HarvestError>;
}

/// Launches one child process per shard
#[derive(Debug, Clone)]
pub struct ProcessExecutor {
    program: PathBuf,
    config_path: PathBuf,
    extra_args: Vec<String>,
}

impl ProcessExecutor {
    /// Re-launches the running binary in shard mode
    pub fn current(config_path: impl Into<PathBuf>) -> Result<Self, HarvestError> {
        Ok(Self::new(std::env::current_exe()?, config_path))
    }

    pub fn new(program: impl Into<PathBuf>, config_path: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            config_path: config_path.into(),
            extra_args: Vec::new(),
        }
    }

    /// Extra arguments passed to every child, such as verbosity flags
    pub fn with_args(mut self, args: impl IntoIterator<Item = String>) -> Self {
        self.extra_args.extend(args);
        self
    }
}

#[async_trait]
impl ShardExecutor for ProcessExecutor {
    async fn run_shard(&self, assignment: ShardAssignment) -> Result<ShardOutcome, HarvestError> {
        let index = assignment.index;
        let shard_error = |message: String| HarvestError::Shard { index, message };

        let mut child = Command::new(&self.program)
            .arg(&self.config_path)
            .arg("--shard")
            .arg(index.to_string())
            .args(&self.extra_args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()?;

        tracing::debug!("Launched shard {} as pid {:?}", index, child.id());

        let payload = serde_json::to_vec(&assignment)?;
        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(&payload).await?;
            stdin.shutdown().await?;
        }

        let output = child.wait_with_output().await?;
        if !output.status.success() {
            return Err(shard_error(format!("child exited with {}", output.status)));
        }

        let outcome: ShardOutcome = serde_json::from_slice(&output.stdout)
            .map_err(|e| shard_error(format!("unreadable shard result: {}", e)))?;
        if outcome.index != index {
            return Err(shard_error(format!(
                "child reported shard {} instead",
                outcome.index
            )));
        }

        Ok(outcome)
    }
}

/// Runs shards as tasks inside the current process
#[derive(Clone)]
pub struct InProcessExecutor {
    pool: Arc<SessionPool>,
    config: HarvestConfig,
}

impl InProcessExecutor {
    pub fn new(pool: Arc<SessionPool>, config: HarvestConfig) -> Self {
        Self { pool, config }
    }
}

#[async_trait]
impl ShardExecutor for InProcessExecutor {
    async fn run_shard(&self, assignment: ShardAssignment) -> Result<ShardOutcome, HarvestError> {
        let index = assignment.index;
        let worker = ShardWorker::new(index, self.pool.acquire(index)?, &self.config);

        tokio::spawn(async move { worker.run(assignment.urls).await })
            .await
            .map_err(|e| HarvestError::Shard {
                index,
                message: e.to_string(),
            })
    }
}
