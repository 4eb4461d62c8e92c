//! Integration Test: プローブエンドポイントの応答
//!
//! 実ソケットに対してHTTPリクエストを送り、ステータス・ボディ・独立性を確認する。

use async_trait::async_trait;
use lifeline_common::{HealthContributor, HealthFlag, ProbeKind};
use lifeline_probe::handler::{HEALTHY_MESSAGE, UNHEALTHY_MESSAGE};
use lifeline_probe::ProbeAggregator;
use reqwest::StatusCode;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::support;

struct Panicking;

#[async_trait]
impl HealthContributor for Panicking {
    async fn is_healthy(&self, _ctx: &CancellationToken) -> bool {
        panic!("contributor blew up")
    }
}

struct Stalled;

#[async_trait]
impl HealthContributor for Stalled {
    async fn is_healthy(&self, _ctx: &CancellationToken) -> bool {
        tokio::time::sleep(Duration::from_secs(30)).await;
        true
    }
}

#[tokio::test]
async fn three_probes_listen_on_distinct_addresses() {
    let probes = support::start(ProbeAggregator::new(&support::local_config())).await;

    assert_eq!(probes.addrs.len(), 3);
    let distinct: HashSet<_> = probes.addrs.iter().map(|(_, addr)| *addr).collect();
    assert_eq!(distinct.len(), 3);

    for kind in ProbeKind::ALL {
        let (status, content_type, body) = support::probe(&probes.url(kind)).await;
        assert_eq!(status, StatusCode::OK, "{} probe", kind);
        assert!(content_type.starts_with("text/plain"));
        assert_eq!(body, HEALTHY_MESSAGE);
    }

    probes.stop().await;
}

#[tokio::test]
async fn unhealthy_contributor_returns_teapot() {
    let aggregator = ProbeAggregator::new(&support::local_config());
    let ready = HealthFlag::new(false);
    aggregator
        .add_readiness_probe_unit(Arc::new(ready.clone()))
        .await
        .unwrap();
    aggregator
        .add_readiness_probe_unit(Arc::new(HealthFlag::new(true)))
        .await
        .unwrap();
    let probes = support::start(aggregator).await;

    let (status, _, body) = support::probe(&probes.url(ProbeKind::Readiness)).await;
    assert_eq!(status, StatusCode::IM_A_TEAPOT);
    assert_eq!(body, UNHEALTHY_MESSAGE);

    // 他のプローブには影響しない
    let (status, _, _) = support::probe(&probes.url(ProbeKind::Liveness)).await;
    assert_eq!(status, StatusCode::OK);

    ready.set_healthy(true);
    let (status, _, body) = support::probe(&probes.url(ProbeKind::Readiness)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, HEALTHY_MESSAGE);

    probes.stop().await;
}

#[tokio::test]
async fn any_method_is_accepted() {
    let probes = support::start(ProbeAggregator::new(&support::local_config())).await;

    let response = support::client()
        .post(probes.url(ProbeKind::Startup))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = support::client()
        .head(probes.url(ProbeKind::Startup))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    probes.stop().await;
}

#[tokio::test]
async fn other_paths_are_not_found() {
    let probes = support::start(ProbeAggregator::new(&support::local_config())).await;

    let url = format!("http://{}/readiness", probes.addr(ProbeKind::Liveness));
    let (status, _, _) = support::probe(&url).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    probes.stop().await;
}

#[tokio::test]
async fn panicking_contributor_does_not_kill_listener() {
    let aggregator = ProbeAggregator::new(&support::local_config());
    aggregator
        .add_liveness_probe_unit(Arc::new(Panicking))
        .await
        .unwrap();
    let probes = support::start(aggregator).await;

    for _ in 0..2 {
        let (status, _, _) = support::probe(&probes.url(ProbeKind::Liveness)).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    }

    let (status, _, _) = support::probe(&probes.url(ProbeKind::Readiness)).await;
    assert_eq!(status, StatusCode::OK);

    let aggregator = probes.stop().await;
    for status in aggregator.status().await {
        assert!(!status.is_failed(), "{} should stop cleanly", status.kind);
    }
}

#[tokio::test]
async fn slow_contributor_hits_write_timeout() {
    let mut config = support::local_config();
    config.get_mut(ProbeKind::Startup).write_timeout_ms = 200;

    let aggregator = ProbeAggregator::new(&config);
    aggregator
        .add_startup_probe_unit(Arc::new(Stalled))
        .await
        .unwrap();
    let probes = support::start(aggregator).await;

    let started = std::time::Instant::now();
    let (status, _, _) = support::probe(&probes.url(ProbeKind::Startup)).await;
    assert_eq!(status, StatusCode::REQUEST_TIMEOUT);
    assert!(started.elapsed() < Duration::from_secs(5));

    probes.stop().await;
}
