//! テスト共通ユーティリティ

use lifeline_common::{HealthCheckConfig, ProbeKind};
use lifeline_probe::ProbeAggregator;
use std::net::SocketAddr;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// 全プローブを127.0.0.1のエフェメラルポートにバインドする設定
pub fn local_config() -> HealthCheckConfig {
    let mut config = HealthCheckConfig::default();
    for kind in ProbeKind::ALL {
        let probe = config.get_mut(kind);
        probe.host = "127.0.0.1".to_string();
        probe.port = 0;
        probe.read_timeout_ms = 1_000;
        probe.write_timeout_ms = 2_000;
    }
    config
}

/// 起動済みのアグリゲーターとそのキャンセルトークン
pub struct RunningProbes {
    pub aggregator: ProbeAggregator,
    pub ctx: CancellationToken,
    pub addrs: Vec<(ProbeKind, SocketAddr)>,
}

#[allow(dead_code)]
impl RunningProbes {
    /// 指定種別のリッスンアドレス
    pub fn addr(&self, kind: ProbeKind) -> SocketAddr {
        self.addrs
            .iter()
            .find(|(k, _)| *k == kind)
            .map(|(_, addr)| *addr)
            .expect("probe is not listening")
    }

    /// 指定種別のプローブURL
    pub fn url(&self, kind: ProbeKind) -> String {
        let path = self
            .aggregator
            .unit(kind)
            .expect("probe is not enabled")
            .params()
            .path()
            .to_string();
        format!("http://{}{}", self.addr(kind), path)
    }

    /// キャンセルして全リスナーの停止を待つ
    pub async fn stop(self) -> ProbeAggregator {
        self.ctx.cancel();
        tokio::time::timeout(Duration::from_secs(5), self.aggregator.join())
            .await
            .expect("probes did not stop in time");
        self.aggregator
    }
}

/// コントリビューター登録済みのアグリゲーターを起動する
pub async fn start(aggregator: ProbeAggregator) -> RunningProbes {
    let ctx = CancellationToken::new();
    aggregator
        .listen_and_serve(&ctx)
        .await
        .expect("failed to start probes");
    let addrs = aggregator.wait_listening().await;

    RunningProbes {
        aggregator,
        ctx,
        addrs,
    }
}

/// テスト用HTTPクライアント
pub fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(5))
        .build()
        .expect("failed to build http client")
}

/// GETしてステータス・Content-Type・ボディを返す
pub async fn probe(url: &str) -> (reqwest::StatusCode, String, String) {
    let response = client().get(url).send().await.expect("request failed");
    let status = response.status();
    let content_type = response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();
    let body = response.text().await.expect("failed to read body");
    (status, content_type, body)
}
