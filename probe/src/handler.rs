//! プローブリクエストハンドラー
//!
//! 登録済みのコントリビューターを全て評価し、1つの真偽値に畳み込む。
//! 評価は短絡しない: 途中で unhealthy が返っても残りのコントリビューターも呼ぶ。

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
};
use lifeline_common::HealthContributor;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Body returned when every contributor is healthy.
pub const HEALTHY_MESSAGE: &str = "healthy";

/// Body returned when at least one contributor is unhealthy.
pub const UNHEALTHY_MESSAGE: &str = "unhealthy";

/// Status returned when at least one contributor is unhealthy.
pub const UNHEALTHY_STATUS: StatusCode = StatusCode::IM_A_TEAPOT;

/// コントリビューター集合と評価ロジック
///
/// 登録は排他ロック、評価は共有ロックで行うため、
/// 並行する評価同士はブロックし合わない。
#[derive(Clone, Default)]
pub struct ProbeHandler {
    contributors: Arc<RwLock<Vec<Arc<dyn HealthContributor>>>>,
}

impl ProbeHandler {
    /// 空のハンドラーを作成
    pub fn new() -> Self {
        Self::default()
    }

    /// コントリビューターを追加
    pub async fn register(&self, contributor: Arc<dyn HealthContributor>) {
        let mut contributors = self.contributors.write().await;
        contributors.push(contributor);
    }

    /// 登録済みコントリビューター数
    pub async fn contributor_count(&self) -> usize {
        self.contributors.read().await.len()
    }

    /// 全コントリビューターを評価する
    ///
    /// 空集合は healthy。
    pub async fn evaluate(&self, ctx: &CancellationToken) -> bool {
        let contributors = self.contributors.read().await;

        let mut healthy = true;
        for contributor in contributors.iter() {
            healthy &= contributor.is_healthy(ctx).await;
        }

        debug!(contributors = contributors.len(), healthy, "Probe evaluated");
        healthy
    }
}

/// axumハンドラーに渡す状態
#[derive(Clone)]
pub(crate) struct ProbeState {
    pub(crate) handler: ProbeHandler,
    /// Parent of every per-request cancellation token.
    pub(crate) root: CancellationToken,
}

/// ANY <path> - プローブ評価
///
/// リクエストごとに子トークンを作り、リクエストが破棄された時点でキャンセルする。
pub(crate) async fn serve_probe(State(state): State<ProbeState>) -> Response {
    let ctx = state.root.child_token();
    let _guard = ctx.clone().drop_guard();

    if state.handler.evaluate(&ctx).await {
        plain_text(StatusCode::OK, HEALTHY_MESSAGE)
    } else {
        plain_text(UNHEALTHY_STATUS, UNHEALTHY_MESSAGE)
    }
}

pub(crate) fn plain_text(status: StatusCode, message: &'static str) -> Response {
    (
        status,
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        message,
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use proptest::prelude::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Fixed {
        healthy: bool,
        calls: AtomicUsize,
    }

    impl Fixed {
        fn new(healthy: bool) -> Arc<Self> {
            Arc::new(Self {
                healthy,
                calls: AtomicUsize::new(0),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl HealthContributor for Fixed {
        async fn is_healthy(&self, _ctx: &CancellationToken) -> bool {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.healthy
        }
    }

    #[tokio::test]
    async fn test_empty_handler_is_healthy() {
        let handler = ProbeHandler::new();
        assert!(handler.evaluate(&CancellationToken::new()).await);
        assert_eq!(handler.contributor_count().await, 0);
    }

    #[tokio::test]
    async fn test_every_contributor_called_after_unhealthy() {
        let handler = ProbeHandler::new();
        let first = Fixed::new(false);
        let second = Fixed::new(true);
        let third = Fixed::new(false);

        handler.register(first.clone()).await;
        handler.register(second.clone()).await;
        handler.register(third.clone()).await;

        assert!(!handler.evaluate(&CancellationToken::new()).await);
        assert_eq!(first.calls(), 1);
        assert_eq!(second.calls(), 1);
        assert_eq!(third.calls(), 1);
    }

    #[tokio::test]
    async fn test_contributor_sees_request_token() {
        struct CancelAware;

        #[async_trait]
        impl HealthContributor for CancelAware {
            async fn is_healthy(&self, ctx: &CancellationToken) -> bool {
                !ctx.is_cancelled()
            }
        }

        let handler = ProbeHandler::new();
        handler.register(Arc::new(CancelAware)).await;

        let ctx = CancellationToken::new();
        assert!(handler.evaluate(&ctx).await);
        ctx.cancel();
        assert!(!handler.evaluate(&ctx).await);
    }

    #[tokio::test]
    async fn test_concurrent_evaluations_share_lock() {
        struct Slow;

        #[async_trait]
        impl HealthContributor for Slow {
            async fn is_healthy(&self, _ctx: &CancellationToken) -> bool {
                tokio::time::sleep(std::time::Duration::from_millis(50)).await;
                true
            }
        }

        let handler = ProbeHandler::new();
        handler.register(Arc::new(Slow)).await;

        let ctx = CancellationToken::new();
        let started = std::time::Instant::now();
        let (a, b, c) = tokio::join!(
            handler.evaluate(&ctx),
            handler.evaluate(&ctx),
            handler.evaluate(&ctx)
        );

        assert!(a && b && c);
        // 共有ロックなので3回分の直列時間(150ms)より十分短い
        assert!(started.elapsed() < std::time::Duration::from_millis(140));
    }

    proptest! {
        /// 任意のコントリビューター集合で、評価結果は全員のANDと一致し、全員が1回ずつ呼ばれる
        #[test]
        fn evaluate_is_conjunction_over_all(states in prop::collection::vec(any::<bool>(), 0..12)) {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .unwrap();

            let contributors: Vec<Arc<Fixed>> = states.iter().map(|h| Fixed::new(*h)).collect();
            let verdict = runtime.block_on(async {
                let handler = ProbeHandler::new();
                for contributor in &contributors {
                    handler.register(contributor.clone()).await;
                }
                handler.evaluate(&CancellationToken::new()).await
            });

            prop_assert_eq!(verdict, states.iter().all(|h| *h));
            for contributor in &contributors {
                prop_assert_eq!(contributor.calls(), 1);
            }
        }
    }
}
