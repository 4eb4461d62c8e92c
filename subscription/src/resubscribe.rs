//! 上限付き再購読ループ
//!
//! ヘルスチェック呼び出しの中で同期的に実行され、呼び出し元を最大
//! `max_attempts × delay` の間ブロックする。バックオフもジッターもない固定間隔。

use lifeline_common::{BrokerError, ResubscribePolicy};
use std::future::Future;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// 購読を最大 `policy.max_attempts` 回試みる
///
/// 成功した時点で結果を返す。全試行が失敗した場合は `None`。
/// 試行回数は呼び出しごとにリセットされる。失敗のたびに（最後の試行でも）
/// `policy.delay` だけ待機する。`policy.abort_on_cancel` が有効なら、
/// キャンセル済みのトークンで次の試行に進まずに打ち切る。
pub async fn resubscribe<F, Fut, T>(
    policy: &ResubscribePolicy,
    ctx: &CancellationToken,
    mut attempt: F,
) -> Option<T>
where
    F: FnMut(u16) -> Fut,
    Fut: Future<Output = Result<T, BrokerError>>,
{
    for index in 0..policy.max_attempts {
        if policy.abort_on_cancel && ctx.is_cancelled() {
            warn!(attempt = index, "re-subscription aborted by cancellation");
            return None;
        }

        match attempt(index).await {
            Ok(subscription) => {
                info!(attempt = index, "re-subscription success");
                return Some(subscription);
            }
            Err(err) => {
                warn!(attempt = index, code = err.code(), error = %err, "unable to re-subscribe");
                if policy.abort_on_cancel {
                    tokio::select! {
                        _ = sleep(policy.delay) => {}
                        _ = ctx.cancelled() => {}
                    }
                } else {
                    sleep(policy.delay).await;
                }
            }
        }
    }

    warn!(
        attempts = policy.max_attempts,
        "re-subscription budget exhausted"
    );
    None
}
