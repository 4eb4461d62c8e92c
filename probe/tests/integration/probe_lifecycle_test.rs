//! Integration Test: プローブのライフサイクル
//!
//! 無効化・バインド失敗・キャンセルによる停止・二重停止を確認する。

use lifeline_common::{HealthFlag, ProbeError, ProbeKind};
use lifeline_probe::{ProbeAggregator, TaskOutcome, UnitState};
use reqwest::StatusCode;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::support;

#[tokio::test]
async fn disabled_probe_rejects_contributor_and_never_binds() {
    let config = support::local_config().disable(ProbeKind::Startup);
    let aggregator = ProbeAggregator::new(&config);

    let err = aggregator
        .add_startup_probe_unit(Arc::new(HealthFlag::new(true)))
        .await
        .unwrap_err();
    assert!(matches!(err, ProbeError::ProbeNotEnabled(ProbeKind::Startup)));

    let probes = support::start(aggregator).await;
    let kinds: Vec<_> = probes.addrs.iter().map(|(kind, _)| *kind).collect();
    assert_eq!(kinds, vec![ProbeKind::Liveness, ProbeKind::Readiness]);

    probes.stop().await;
}

#[tokio::test]
async fn bind_conflict_fails_only_that_probe() {
    let occupied = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = occupied.local_addr().unwrap().port();

    let mut config = support::local_config();
    config.get_mut(ProbeKind::Readiness).port = port;

    let probes = support::start(ProbeAggregator::new(&config)).await;
    let kinds: Vec<_> = probes.addrs.iter().map(|(kind, _)| *kind).collect();
    assert_eq!(kinds, vec![ProbeKind::Liveness, ProbeKind::Startup]);

    let readiness = probes
        .aggregator
        .unit(ProbeKind::Readiness)
        .unwrap()
        .state();
    assert!(matches!(readiness, UnitState::Failed(_)));

    // 兄弟プローブは応答を続ける
    let (status, _, _) = support::probe(&probes.url(ProbeKind::Liveness)).await;
    assert_eq!(status, StatusCode::OK);
    let (status, _, _) = support::probe(&probes.url(ProbeKind::Startup)).await;
    assert_eq!(status, StatusCode::OK);

    let aggregator = probes.stop().await;
    let statuses = aggregator.status().await;
    let readiness = statuses
        .iter()
        .find(|s| s.kind == ProbeKind::Readiness)
        .unwrap();
    assert!(readiness.is_failed());
    assert!(matches!(
        readiness.task.as_ref().map(|t| &t.outcome),
        Some(TaskOutcome::Failed(_))
    ));

    drop(occupied);
}

#[tokio::test]
async fn cancel_stops_every_probe_within_write_timeout() {
    let probes = support::start(ProbeAggregator::new(&support::local_config())).await;
    let urls: Vec<_> = ProbeKind::ALL.iter().map(|k| probes.url(*k)).collect();

    let started = Instant::now();
    let aggregator = probes.stop().await;
    assert!(started.elapsed() < Duration::from_secs(2));

    for status in aggregator.status().await {
        assert_eq!(status.state, UnitState::Stopped);
        assert!(matches!(
            status.task.as_ref().map(|t| &t.outcome),
            Some(TaskOutcome::Completed)
        ));
    }

    for url in urls {
        assert!(support::client().get(&url).send().await.is_err());
    }
}

#[tokio::test]
async fn shutdown_twice_does_not_panic() {
    let probes = support::start(ProbeAggregator::new(&support::local_config())).await;

    assert!(probes.aggregator.shutdown().await.is_ok());
    assert!(probes.aggregator.shutdown().await.is_ok());

    let unit = probes.aggregator.unit(ProbeKind::Liveness).unwrap();
    assert!(matches!(
        unit.shutdown().await,
        Err(ProbeError::AlreadyStopped(ProbeKind::Liveness))
    ));

    probes.stop().await;
}

#[tokio::test]
async fn in_flight_request_finishes_during_shutdown() {
    use async_trait::async_trait;
    use lifeline_common::HealthContributor;
    use tokio_util::sync::CancellationToken;

    struct Slow;

    #[async_trait]
    impl HealthContributor for Slow {
        async fn is_healthy(&self, _ctx: &CancellationToken) -> bool {
            tokio::time::sleep(Duration::from_millis(300)).await;
            true
        }
    }

    let aggregator = ProbeAggregator::new(&support::local_config());
    aggregator
        .add_liveness_probe_unit(Arc::new(Slow))
        .await
        .unwrap();
    let probes = support::start(aggregator).await;

    let url = probes.url(ProbeKind::Liveness);
    let request = tokio::spawn(async move { support::probe(&url).await });
    tokio::time::sleep(Duration::from_millis(100)).await;

    probes.stop().await;

    let (status, _, _) = request.await.unwrap();
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn draining_does_not_cancel_in_flight_evaluation() {
    use async_trait::async_trait;
    use lifeline_common::HealthContributor;
    use tokio_util::sync::CancellationToken;

    struct CancelAware;

    #[async_trait]
    impl HealthContributor for CancelAware {
        async fn is_healthy(&self, ctx: &CancellationToken) -> bool {
            tokio::time::sleep(Duration::from_millis(300)).await;
            !ctx.is_cancelled()
        }
    }

    let aggregator = ProbeAggregator::new(&support::local_config());
    aggregator
        .add_liveness_probe_unit(Arc::new(CancelAware))
        .await
        .unwrap();
    let probes = support::start(aggregator).await;

    let url = probes.url(ProbeKind::Liveness);
    let request = tokio::spawn(async move { support::probe(&url).await });
    tokio::time::sleep(Duration::from_millis(100)).await;

    probes.stop().await;

    let (status, _, body) = request.await.unwrap();
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "healthy");
}
