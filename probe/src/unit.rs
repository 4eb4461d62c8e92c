//! プローブユニット
//!
//! 1つのプローブ種別を1つのHTTPリスナーで公開する。
//!
//! 状態遷移: `Created → Listening → ShuttingDown → Stopped`、
//! バインドに失敗した場合のみ `Created → Failed`。

use crate::handler::{plain_text, serve_probe, ProbeHandler, ProbeState};
use async_trait::async_trait;
use axum::{http::StatusCode, response::Response, routing::any, Router};
use lifeline_common::{
    CommonError, HealthContributor, ManagedUnit, ProbeError, ProbeKind, UnitError, UnitParams,
};
use serde::Serialize;
use std::any::Any;
use std::net::SocketAddr;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use tokio::net::TcpListener;
use tokio::sync::{watch, Mutex};
use tokio_util::sync::CancellationToken;
use tower::ServiceBuilder;
use tower_http::{
    catch_panic::CatchPanicLayer,
    timeout::{RequestBodyTimeoutLayer, TimeoutLayer},
    trace::TraceLayer,
};
use tracing::{error, info, info_span, warn, Instrument};

/// プローブユニットの状態
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "detail", rename_all = "snake_case")]
pub enum UnitState {
    /// 作成済み・未起動
    Created,
    /// リッスン中（実際にバインドしたアドレス）
    Listening(SocketAddr),
    /// グレースフルシャットダウン中
    ShuttingDown,
    /// 停止済み
    Stopped,
    /// バインド失敗
    Failed(String),
}

impl UnitState {
    /// Terminal states never change again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, UnitState::Stopped | UnitState::Failed(_))
    }
}

/// 1プローブ分のHTTPリスナー
pub struct ProbeUnit {
    params: UnitParams,
    handler: ProbeHandler,
    state_tx: Arc<watch::Sender<UnitState>>,
    shutdown: CancellationToken,
    stop_requested: AtomicBool,
    /// 起動判定からバインドまでと、停止判定を直列化する
    transition: Mutex<()>,
}

impl ProbeUnit {
    /// 新しいユニットを作成（まだバインドしない）
    pub fn new(params: UnitParams) -> Self {
        let (state_tx, _) = watch::channel(UnitState::Created);

        Self {
            params,
            handler: ProbeHandler::new(),
            state_tx: Arc::new(state_tx),
            shutdown: CancellationToken::new(),
            stop_requested: AtomicBool::new(false),
            transition: Mutex::new(()),
        }
    }

    /// プローブ種別
    pub fn kind(&self) -> ProbeKind {
        self.params.kind()
    }

    /// 起動パラメータ
    pub fn params(&self) -> &UnitParams {
        &self.params
    }

    /// 現在の状態
    pub fn state(&self) -> UnitState {
        self.state_tx.borrow().clone()
    }

    /// バインド済みアドレス（リッスン中のみ）
    pub fn local_addr(&self) -> Option<SocketAddr> {
        match *self.state_tx.borrow() {
            UnitState::Listening(addr) => Some(addr),
            _ => None,
        }
    }

    /// 状態変化の購読
    pub fn subscribe_state(&self) -> watch::Receiver<UnitState> {
        self.state_tx.subscribe()
    }

    /// `Created` を抜けるまで待ち、リッスン中ならアドレスを返す
    pub async fn wait_listening(&self) -> Option<SocketAddr> {
        let mut rx = self.state_tx.subscribe();
        let state = match rx.wait_for(|s| *s != UnitState::Created).await {
            Ok(state) => state.clone(),
            Err(_) => return None,
        };
        match state {
            UnitState::Listening(addr) => Some(addr),
            _ => None,
        }
    }

    /// コントリビューターを追加
    pub async fn add_probe_unit(&self, contributor: Arc<dyn HealthContributor>) {
        self.handler.register(contributor).await;
    }

    /// ハンドラー（評価ロジック）への参照
    pub fn handler(&self) -> &ProbeHandler {
        &self.handler
    }

    /// バインドしてサービスを開始し、キャンセルされるまでブロックする
    ///
    /// バインド失敗は即座にエラーを返す。`ctx` かユニット自身の
    /// シャットダウンが要求されると、新規接続の受付を止め、処理中の
    /// リクエストを待ってからソケットを解放する。
    pub async fn listen_and_serve(&self, ctx: &CancellationToken) -> Result<(), ProbeError> {
        let address = self.params.listen_address();
        let span = info_span!("probe_unit", probe = %self.params.name(), address = %address);

        self.serve_inner(ctx, address).instrument(span).await
    }

    async fn serve_inner(&self, ctx: &CancellationToken, address: String) -> Result<(), ProbeError> {
        let Some(listener) = self.bind(address).await? else {
            return Ok(());
        };

        // 処理中リクエストのトークンは ctx から独立させ、ドレイン完了後にだけキャンセルする
        let requests = CancellationToken::new();
        let _requests_guard = requests.clone().drop_guard();

        let app = self.router(requests);
        let signal = {
            let ctx = ctx.clone();
            let shutdown = self.shutdown.clone();
            let state_tx = self.state_tx.clone();
            async move {
                tokio::select! {
                    _ = ctx.cancelled() => {}
                    _ = shutdown.cancelled() => {}
                }
                state_tx.send_replace(UnitState::ShuttingDown);
                info!("Shutdown requested, draining probe server...");
            }
        };

        let result = axum::serve(listener, app.into_make_service())
            .with_graceful_shutdown(signal)
            .await;

        self.state_tx.send_replace(UnitState::Stopped);

        match result {
            Ok(()) => {
                info!("Probe server shutdown complete");
                Ok(())
            }
            Err(source) => {
                error!(error = %source, "unable to shutdown http server");
                Err(ProbeError::Serve {
                    kind: self.kind(),
                    source,
                })
            }
        }
    }

    /// `Created` からバインドして `Listening` を公開する
    ///
    /// 停止が先に要求されていれば `Stopped` にしてリスナーを返さない。
    async fn bind(&self, address: String) -> Result<Option<TcpListener>, ProbeError> {
        let _transition = self.transition.lock().await;

        match self.state() {
            UnitState::Created => {}
            UnitState::Stopped => return Err(ProbeError::AlreadyStopped(self.kind())),
            _ => return Err(ProbeError::AlreadyStarted),
        }

        let listener = match TcpListener::bind(&address).await {
            Ok(listener) => listener,
            Err(source) => {
                error!(error = %source, "unable to listen and serve http server");
                self.state_tx
                    .send_replace(UnitState::Failed(source.to_string()));
                return Err(ProbeError::Bind { address, source });
            }
        };

        let local_addr = match listener.local_addr() {
            Ok(addr) => addr,
            Err(source) => {
                self.state_tx
                    .send_replace(UnitState::Failed(source.to_string()));
                return Err(ProbeError::Serve {
                    kind: self.kind(),
                    source,
                });
            }
        };

        if self.shutdown.is_cancelled() {
            drop(listener);
            self.state_tx.send_replace(UnitState::Stopped);
            return Ok(None);
        }

        self.state_tx.send_replace(UnitState::Listening(local_addr));
        info!(local_addr = %local_addr, path = %self.params.path(), "healthcheck probe server run successfully");
        Ok(Some(listener))
    }

    /// ミドルウェアチェーン付きのルーターを作成
    ///
    /// 外側から: リクエストログ → panic回復 → 書き込みタイムアウト → 読み込みタイムアウト
    fn router(&self, root: CancellationToken) -> Router {
        let state = ProbeState {
            handler: self.handler.clone(),
            root,
        };

        Router::new()
            .route(self.params.path(), any(serve_probe))
            .with_state(state)
            .layer(
                ServiceBuilder::new()
                    .layer(TraceLayer::new_for_http())
                    .layer(CatchPanicLayer::custom(panic_response))
                    .layer(TimeoutLayer::new(self.params.write_timeout()))
                    .layer(RequestBodyTimeoutLayer::new(self.params.read_timeout())),
            )
    }

    /// ユニットを停止する
    ///
    /// 初回呼び出しはリスナーの停止を待つ（書き込みタイムアウトまで）。
    /// 2回目以降は `AlreadyStopped` を返し、panicしない。
    pub async fn shutdown(&self) -> Result<(), ProbeError> {
        if self.stop_requested.swap(true, Ordering::SeqCst) {
            return Err(ProbeError::AlreadyStopped(self.kind()));
        }
        self.shutdown.cancel();

        let state = {
            let _transition = self.transition.lock().await;
            let state = self.state();
            if state == UnitState::Created {
                self.state_tx.send_replace(UnitState::Stopped);
            }
            state
        };

        match state {
            UnitState::Created | UnitState::Failed(_) => Ok(()),
            UnitState::Stopped => Err(ProbeError::AlreadyStopped(self.kind())),
            UnitState::Listening(_) | UnitState::ShuttingDown => {
                let timeout = self.params.write_timeout();
                let mut rx = self.state_tx.subscribe();
                let waited = tokio::time::timeout(timeout, rx.wait_for(UnitState::is_terminal))
                    .await
                    .map(|_| ());
                if waited.is_err() {
                    warn!(probe = %self.kind(), ?timeout, "Probe server did not stop in time");
                    return Err(ProbeError::ShutdownTimeout {
                        kind: self.kind(),
                        timeout,
                    });
                }
                Ok(())
            }
        }
    }
}

/// ハンドラー内のpanicを失敗レスポンスに変換する
fn panic_response(err: Box<dyn Any + Send + 'static>) -> Response {
    let details = if let Some(s) = err.downcast_ref::<String>() {
        s.clone()
    } else if let Some(s) = err.downcast_ref::<&str>() {
        s.to_string()
    } else {
        "unknown panic payload".to_string()
    };

    error!(panic = %details, "Probe handler panicked");
    plain_text(StatusCode::INTERNAL_SERVER_ERROR, "probe handler failed")
}

#[async_trait]
impl ManagedUnit for ProbeUnit {
    fn name(&self) -> &str {
        self.params.name()
    }

    async fn init(&self, _ctx: &CancellationToken) -> Result<(), UnitError> {
        if self.params.path().chars().any(char::is_whitespace) {
            return Err(CommonError::Validation(format!(
                "{} probe path must not contain whitespace",
                self.kind()
            ))
            .into());
        }
        if self.params.read_timeout().is_zero() || self.params.write_timeout().is_zero() {
            return Err(CommonError::Validation(format!(
                "{} probe timeouts must be greater than zero",
                self.kind()
            ))
            .into());
        }
        Ok(())
    }

    async fn run(&self, ctx: &CancellationToken) -> Result<(), UnitError> {
        Ok(self.listen_and_serve(ctx).await?)
    }

    async fn healthcheck(&self, _ctx: &CancellationToken) -> bool {
        matches!(self.state(), UnitState::Listening(_))
    }

    async fn shutdown(&self, _ctx: &CancellationToken) -> Result<(), UnitError> {
        Ok(ProbeUnit::shutdown(self).await?)
    }
}
