//! メッセージブローカー境界
//!
//! 購読ユニットが依存するのは接続状態の確認と、キューグループ付きの
//! push購読の作成だけ。具体的なブローカーはこのトレイトを実装する。

use async_trait::async_trait;
use bytes::Bytes;
use lifeline_common::BrokerError;
use tokio::sync::mpsc;

/// ブローカーから配送されるメッセージ
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// 配送元サブジェクト
    pub subject: String,
    /// ペイロード
    pub payload: Bytes,
    /// 返信先サブジェクト
    pub reply: Option<String>,
}

impl Message {
    /// 新しいメッセージを作成
    pub fn new(subject: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            subject: subject.into(),
            payload: payload.into(),
            reply: None,
        }
    }

    /// 返信先を設定
    pub fn with_reply(mut self, reply: impl Into<String>) -> Self {
        self.reply = Some(reply.into());
        self
    }
}

/// ブローカー接続
#[async_trait]
pub trait BrokerConnection: Send + Sync {
    /// 接続が確立しているか
    fn is_connected(&self) -> bool;

    /// キューグループ付きpush購読を作成する
    ///
    /// 配送されたメッセージは `sink` に送られる。
    async fn queue_subscribe(
        &self,
        subject: &str,
        queue_group: &str,
        sink: mpsc::Sender<Message>,
    ) -> Result<Box<dyn Subscription>, BrokerError>;
}

/// 購読ハンドル
#[async_trait]
pub trait Subscription: Send + Sync {
    /// ブローカー内で一意な購読ID
    fn id(&self) -> u64;

    /// 購読中のサブジェクト
    fn subject(&self) -> &str;

    /// 購読がまだ有効か
    fn is_valid(&self) -> bool;

    /// 購読を解除する
    async fn unsubscribe(&mut self) -> Result<(), BrokerError>;
}
