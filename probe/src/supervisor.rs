//! プローブユニットタスクの監督
//!
//! 各ユニットのリスナーは独立したタスクで動く。失敗はここで記録・ログ出力され、
//! 呼び出し元へは伝播しない（1つのプローブの失敗で他のプローブは止まらない）。

use chrono::{DateTime, Utc};
use lifeline_common::{ProbeError, ProbeKind};
use serde::Serialize;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// タスクの結果
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "detail", rename_all = "snake_case")]
pub enum TaskOutcome {
    /// 実行中
    Running,
    /// 正常終了
    Completed,
    /// エラー終了
    Failed(String),
    /// panicで終了
    Panicked(String),
}

/// タスクの最新状態
#[derive(Debug, Clone, Serialize)]
pub struct TaskRecord {
    /// 結果
    pub outcome: TaskOutcome,
    /// 最終更新日時
    pub updated_at: DateTime<Utc>,
}

impl TaskRecord {
    fn now(outcome: TaskOutcome) -> Self {
        Self {
            outcome,
            updated_at: Utc::now(),
        }
    }
}

/// プローブ種別ごとのタスク監督
#[derive(Clone, Default)]
pub struct TaskSupervisor {
    records: Arc<RwLock<HashMap<ProbeKind, TaskRecord>>>,
    handles: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl TaskSupervisor {
    /// 新しい監督を作成
    pub fn new() -> Self {
        Self::default()
    }

    /// タスクを起動し、その結果を記録する
    pub async fn spawn<F>(&self, kind: ProbeKind, fut: F)
    where
        F: Future<Output = Result<(), ProbeError>> + Send + 'static,
    {
        self.records
            .write()
            .await
            .insert(kind, TaskRecord::now(TaskOutcome::Running));

        let records = self.records.clone();
        let handle = tokio::spawn(async move {
            let outcome = match tokio::spawn(fut).await {
                Ok(Ok(())) => {
                    info!(probe = %kind, "Probe task completed");
                    TaskOutcome::Completed
                }
                Ok(Err(err)) => {
                    error!(probe = %kind, code = err.code(), error = %err, "Probe task failed");
                    TaskOutcome::Failed(err.to_string())
                }
                Err(join_err) if join_err.is_panic() => {
                    error!(probe = %kind, error = %join_err, "Probe task panicked");
                    TaskOutcome::Panicked(join_err.to_string())
                }
                Err(join_err) => {
                    warn!(probe = %kind, error = %join_err, "Probe task cancelled");
                    TaskOutcome::Failed(join_err.to_string())
                }
            };

            records.write().await.insert(kind, TaskRecord::now(outcome));
        });

        self.handles.lock().await.push(handle);
    }

    /// 指定種別の最新状態
    pub async fn outcome(&self, kind: ProbeKind) -> Option<TaskRecord> {
        self.records.read().await.get(&kind).cloned()
    }

    /// 全種別の最新状態
    pub async fn snapshot(&self) -> HashMap<ProbeKind, TaskRecord> {
        self.records.read().await.clone()
    }

    /// 起動済みタスクが全て終わるまで待つ
    pub async fn join_all(&self) {
        let handles: Vec<_> = self.handles.lock().await.drain(..).collect();
        for handle in handles {
            if let Err(err) = handle.await {
                warn!(error = %err, "Probe supervisor task aborted");
            }
        }
    }
}
