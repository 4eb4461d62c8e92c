//! プローブ集約
//!
//! 設定から有効なプローブ種別ごとに [`ProbeUnit`] を1つ作り、
//! 一括起動・コントリビューター登録・状態取得を提供する。

use crate::supervisor::{TaskOutcome, TaskRecord, TaskSupervisor};
use crate::unit::{ProbeUnit, UnitState};
use lifeline_common::{HealthContributor, ProbeConfigSource, ProbeError, ProbeKind};
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// プローブ1つ分の状態
#[derive(Debug, Clone, Serialize)]
pub struct ProbeStatus {
    /// プローブ種別
    pub kind: ProbeKind,
    /// ユニット状態
    pub state: UnitState,
    /// リスナータスクの状態（未起動ならNone）
    pub task: Option<TaskRecord>,
}

impl ProbeStatus {
    /// リスナーが失敗したか
    pub fn is_failed(&self) -> bool {
        matches!(self.state, UnitState::Failed(_))
            || matches!(
                self.task.as_ref().map(|t| &t.outcome),
                Some(TaskOutcome::Failed(_)) | Some(TaskOutcome::Panicked(_))
            )
    }
}

/// 種別ごとのプローブユニットの集合
pub struct ProbeAggregator {
    units: [Option<Arc<ProbeUnit>>; 3],
    supervisor: TaskSupervisor,
    started: AtomicBool,
}

impl ProbeAggregator {
    /// 有効な種別ごとにユニットを作成する（まだバインドしない）
    pub fn new(source: &impl ProbeConfigSource) -> Self {
        let units = ProbeKind::ALL.map(|kind| {
            if source.is_probe_enabled(kind) {
                debug!(probe = %kind, "Probe enabled");
                Some(Arc::new(ProbeUnit::new(source.unit_params(kind))))
            } else {
                debug!(probe = %kind, "Probe disabled");
                None
            }
        });

        Self {
            units,
            supervisor: TaskSupervisor::new(),
            started: AtomicBool::new(false),
        }
    }

    /// 全ユニットのリスナーを起動する
    ///
    /// 各リスナーは独立したタスクで動き、この関数はすぐに戻る。
    /// バインド失敗は監督側で記録され、他のリスナーには影響しない。
    pub async fn listen_and_serve(&self, ctx: &CancellationToken) -> Result<(), ProbeError> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(ProbeError::AlreadyStarted);
        }

        for unit in self.units.iter().flatten() {
            let unit = unit.clone();
            let ctx = ctx.clone();
            self.supervisor
                .spawn(unit.kind(), async move { unit.listen_and_serve(&ctx).await })
                .await;
        }

        info!(probes = ?self.enabled_kinds(), "Healthcheck probes started");
        Ok(())
    }

    /// 指定種別のプローブにコントリビューターを追加する
    pub async fn add_probe_unit(
        &self,
        kind: ProbeKind,
        contributor: Arc<dyn HealthContributor>,
    ) -> Result<(), ProbeError> {
        let unit = self.unit(kind).ok_or(ProbeError::ProbeNotEnabled(kind))?;
        unit.add_probe_unit(contributor).await;
        Ok(())
    }

    /// livenessプローブにコントリビューターを追加
    pub async fn add_liveness_probe_unit(
        &self,
        contributor: Arc<dyn HealthContributor>,
    ) -> Result<(), ProbeError> {
        self.add_probe_unit(ProbeKind::Liveness, contributor).await
    }

    /// readinessプローブにコントリビューターを追加
    pub async fn add_readiness_probe_unit(
        &self,
        contributor: Arc<dyn HealthContributor>,
    ) -> Result<(), ProbeError> {
        self.add_probe_unit(ProbeKind::Readiness, contributor).await
    }

    /// startupプローブにコントリビューターを追加
    pub async fn add_startup_probe_unit(
        &self,
        contributor: Arc<dyn HealthContributor>,
    ) -> Result<(), ProbeError> {
        self.add_probe_unit(ProbeKind::Startup, contributor).await
    }

    /// 指定種別のユニット（無効ならNone）
    pub fn unit(&self, kind: ProbeKind) -> Option<&Arc<ProbeUnit>> {
        self.units[kind.index()].as_ref()
    }

    /// 有効な種別一覧
    pub fn enabled_kinds(&self) -> Vec<ProbeKind> {
        self.units.iter().flatten().map(|u| u.kind()).collect()
    }

    /// 全ユニットが `Created` を抜けるまで待つ
    ///
    /// リッスン中になったユニットのアドレスを返す。失敗したユニットは含まれない。
    pub async fn wait_listening(&self) -> Vec<(ProbeKind, SocketAddr)> {
        let mut listening = Vec::new();
        for unit in self.units.iter().flatten() {
            if let Some(addr) = unit.wait_listening().await {
                listening.push((unit.kind(), addr));
            }
        }
        listening
    }

    /// 全プローブの状態
    pub async fn status(&self) -> Vec<ProbeStatus> {
        let mut statuses = Vec::new();
        for unit in self.units.iter().flatten() {
            statuses.push(ProbeStatus {
                kind: unit.kind(),
                state: unit.state(),
                task: self.supervisor.outcome(unit.kind()).await,
            });
        }
        statuses
    }

    /// 全ユニットを停止する
    ///
    /// 起動前・停止済みのユニットも含めてエラーにはせず、タイムアウトのみ返す。
    pub async fn shutdown(&self) -> Result<(), ProbeError> {
        let mut result = Ok(());
        for unit in self.units.iter().flatten() {
            match unit.shutdown().await {
                Ok(()) | Err(ProbeError::AlreadyStopped(_)) => {}
                Err(err) => result = Err(err),
            }
        }
        self.supervisor.join_all().await;
        result
    }

    /// 起動済みリスナータスクの終了を待つ
    pub async fn join(&self) {
        self.supervisor.join_all().await;
    }
}
