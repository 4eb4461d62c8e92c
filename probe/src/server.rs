//! サーバー起動・シャットダウンハンドリング

use crate::aggregator::{ProbeAggregator, ProbeStatus};
use lifeline_common::{HealthCheckConfig, HealthFlag, ProbeError, ProbeKind};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// プロセス自身の状態を表すフラグ
///
/// liveness は起動直後から healthy、readiness / startup は全リスナーの起動後に healthy。
#[derive(Clone)]
pub struct ServiceFlags {
    /// livenessフラグ
    pub liveness: HealthFlag,
    /// readinessフラグ
    pub readiness: HealthFlag,
    /// startupフラグ
    pub startup: HealthFlag,
}

impl Default for ServiceFlags {
    fn default() -> Self {
        Self {
            liveness: HealthFlag::new(true),
            readiness: HealthFlag::new(false),
            startup: HealthFlag::new(false),
        }
    }
}

impl ServiceFlags {
    fn flag(&self, kind: ProbeKind) -> &HealthFlag {
        match kind {
            ProbeKind::Liveness => &self.liveness,
            ProbeKind::Readiness => &self.readiness,
            ProbeKind::Startup => &self.startup,
        }
    }
}

/// プローブサーバーを起動し、`ctx` がキャンセルされるまで待機する
///
/// 戻り値は停止後の各プローブの状態。
pub async fn run(
    config: &HealthCheckConfig,
    ctx: CancellationToken,
) -> Result<Vec<ProbeStatus>, ProbeError> {
    run_with_flags(config, ctx, ServiceFlags::default()).await
}

/// フラグを外から渡してプローブサーバーを起動する
pub async fn run_with_flags(
    config: &HealthCheckConfig,
    ctx: CancellationToken,
    flags: ServiceFlags,
) -> Result<Vec<ProbeStatus>, ProbeError> {
    let aggregator = ProbeAggregator::new(config);

    for kind in ProbeKind::ALL {
        match aggregator
            .add_probe_unit(kind, Arc::new(flags.flag(kind).clone()))
            .await
        {
            Ok(()) => {}
            Err(ProbeError::ProbeNotEnabled(kind)) => {
                info!(probe = %kind, "Probe disabled, skipping");
            }
            Err(err) => return Err(err),
        }
    }

    aggregator.listen_and_serve(&ctx).await?;

    let listening = aggregator.wait_listening().await;
    for (kind, addr) in &listening {
        info!(probe = %kind, %addr, "Probe listening");
    }

    if listening.len() == aggregator.enabled_kinds().len() {
        flags.startup.set_healthy(true);
        flags.readiness.set_healthy(true);
        info!("All probes listening, service is ready");
    } else {
        warn!(
            listening = listening.len(),
            enabled = aggregator.enabled_kinds().len(),
            "Some probes failed to start"
        );
    }

    ctx.cancelled().await;
    flags.readiness.set_healthy(false);

    aggregator.join().await;
    info!("Probe server shutdown complete");

    Ok(aggregator.status().await)
}

/// シャットダウンシグナルを待機し、`ctx` をキャンセルする
pub async fn shutdown_signal(ctx: CancellationToken) {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(error = %err, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                warn!(error = %err, "failed to install signal handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down...");
        }
        _ = terminate => {
            info!("Received SIGTERM, shutting down...");
        }
        _ = ctx.cancelled() => {
            info!("Shutdown requested, shutting down...");
        }
    }

    ctx.cancel();
}
