//! 自己修復購読ユニット
//!
//! キューグループ付きpush購読を1つ保持する。ヘルスチェックで購読が
//! 失われていることを検出すると、ポリシーに従って再購読を試みる。
//! ブローカー接続自体は共有物であり、このユニットが閉じることはない。

use crate::broker::{BrokerConnection, Message, Subscription};
use crate::resubscribe::resubscribe;
use async_trait::async_trait;
use lifeline_common::{
    BrokerError, ManagedUnit, ResubscribePolicy, SubscriptionConfig, SubscriptionError, UnitError,
};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument, Span};

/// 自己修復購読ユニット
pub struct SubscriptionUnit {
    name: String,
    connection: Arc<dyn BrokerConnection>,
    subject: String,
    queue_group: String,
    policy: ResubscribePolicy,
    sink: mpsc::Sender<Message>,
    /// ヘルスチェック全体の間ロックを保持し、並行する呼び出しが二重に再購読しないようにする
    handle: Mutex<Option<Box<dyn Subscription>>>,
    span: Span,
}

impl SubscriptionUnit {
    /// 新しいユニットを作成する（まだ購読しない）
    pub fn new(
        connection: Arc<dyn BrokerConnection>,
        subject: impl Into<String>,
        queue_group: impl Into<String>,
        policy: ResubscribePolicy,
        sink: mpsc::Sender<Message>,
    ) -> Self {
        let subject = subject.into();
        let queue_group = queue_group.into();
        let span = info_span!("subscription", subject = %subject, queue_group = %queue_group);

        Self {
            name: format!("subscription:{}", subject),
            connection,
            subject,
            queue_group,
            policy,
            sink,
            handle: Mutex::new(None),
            span,
        }
    }

    /// 設定からユニットを作成する
    pub fn from_config(
        connection: Arc<dyn BrokerConnection>,
        config: &SubscriptionConfig,
        sink: mpsc::Sender<Message>,
    ) -> Result<Self, SubscriptionError> {
        config.validate()?;
        Ok(Self::new(
            connection,
            config.subject.clone(),
            config.queue_group.clone(),
            config.resubscribe_policy(),
            sink,
        ))
    }

    /// 購読サブジェクト
    pub fn subject(&self) -> &str {
        &self.subject
    }

    /// キューグループ
    pub fn queue_group(&self) -> &str {
        &self.queue_group
    }

    /// 再購読ポリシー
    pub fn policy(&self) -> &ResubscribePolicy {
        &self.policy
    }

    /// 現在保持している購読のID
    pub async fn subscription_id(&self) -> Option<u64> {
        self.handle.lock().await.as_ref().map(|s| s.id())
    }

    async fn subscribe(&self) -> Result<Box<dyn Subscription>, BrokerError> {
        self.connection
            .queue_subscribe(&self.subject, &self.queue_group, self.sink.clone())
            .await
    }

    /// 購読を開始する
    ///
    /// 失敗しても再試行はしない。再試行はヘルスチェックの責務。
    /// 有効な購読を既に保持していれば何もしない。
    pub async fn run(&self, _ctx: &CancellationToken) -> Result<(), SubscriptionError> {
        async {
            let mut handle = self.handle.lock().await;
            if let Some(current) = handle.as_ref().filter(|s| s.is_valid()) {
                debug!(id = current.id(), "subscription already active");
                return Ok(());
            }

            if !self.connection.is_connected() {
                warn!("unable to subscribe, broker connection is down");
                return Err(SubscriptionError::NotConnected);
            }

            let subscription =
                self.subscribe()
                    .await
                    .map_err(|source| SubscriptionError::Subscribe {
                        subject: self.subject.clone(),
                        queue_group: self.queue_group.clone(),
                        source,
                    })?;

            info!(id = subscription.id(), "subscription started");
            *handle = Some(subscription);
            Ok(())
        }
        .instrument(self.span.clone())
        .await
    }

    /// 購読の健全性を確認する
    ///
    /// 接続断なら再購読を試みずに false。購読が無効なら、自動再購読が
    /// 有効な場合のみ上限付きで再購読を試みる。
    pub async fn healthcheck(&self, ctx: &CancellationToken) -> bool {
        async {
            let mut handle = self.handle.lock().await;

            if !self.connection.is_connected() {
                warn!("consumer lost broker connection");
                return false;
            }

            let valid = handle.as_ref().map(|s| s.is_valid()).unwrap_or(false);
            if valid {
                return true;
            }

            warn!("consumer lost broker subscription");
            if !self.policy.enabled {
                return false;
            }

            match resubscribe(&self.policy, ctx, |_| self.subscribe()).await {
                Some(subscription) => {
                    debug!(id = subscription.id(), "subscription handle replaced");
                    *handle = Some(subscription);
                    true
                }
                None => false,
            }
        }
        .instrument(self.span.clone())
        .await
    }

    /// 購読を解除してハンドルを破棄する
    ///
    /// 接続は閉じない。ハンドルがなければ何もしない。
    pub async fn shutdown(&self, _ctx: &CancellationToken) -> Result<(), SubscriptionError> {
        async {
            let Some(mut subscription) = self.handle.lock().await.take() else {
                debug!("no subscription to release");
                return Ok(());
            };

            if !subscription.is_valid() {
                debug!(id = subscription.id(), "subscription already closed by broker");
                return Ok(());
            }

            subscription
                .unsubscribe()
                .await
                .map_err(SubscriptionError::Unsubscribe)?;
            info!(id = subscription.id(), "unsubscribed");
            Ok(())
        }
        .instrument(self.span.clone())
        .await
    }
}

#[async_trait]
impl ManagedUnit for SubscriptionUnit {
    fn name(&self) -> &str {
        &self.name
    }

    async fn init(&self, _ctx: &CancellationToken) -> Result<(), UnitError> {
        Ok(())
    }

    async fn run(&self, ctx: &CancellationToken) -> Result<(), UnitError> {
        Ok(SubscriptionUnit::run(self, ctx).await?)
    }

    async fn healthcheck(&self, ctx: &CancellationToken) -> bool {
        SubscriptionUnit::healthcheck(self, ctx).await
    }

    async fn shutdown(&self, ctx: &CancellationToken) -> Result<(), UnitError> {
        Ok(SubscriptionUnit::shutdown(self, ctx).await?)
    }
}
