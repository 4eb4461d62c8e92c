//! プロセス内ブローカー
//!
//! 同一プロセス内でユニットを組み合わせる場合やテストで使う。
//! キューグループ内ではメッセージごとにラウンドロビンで1購読者にだけ配送し、
//! グループなしの購読者には全員に配送する。

use crate::broker::{BrokerConnection, Message, Subscription};
use async_trait::async_trait;
use bytes::Bytes;
use lifeline_common::BrokerError;
use std::collections::HashMap;
use std::sync::{
    atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering},
    Arc,
};
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};

struct Entry {
    id: u64,
    subject: String,
    queue_group: Option<String>,
    sink: mpsc::Sender<Message>,
    valid: Arc<AtomicBool>,
}

#[derive(Default)]
struct Registry {
    entries: Vec<Entry>,
    cursors: HashMap<(String, String), usize>,
}

struct Inner {
    connected: AtomicBool,
    next_id: AtomicU64,
    subscribe_calls: AtomicUsize,
    fail_next: AtomicUsize,
    registry: Mutex<Registry>,
}

/// プロセス内ブローカー
#[derive(Clone)]
pub struct MemoryBroker {
    inner: Arc<Inner>,
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBroker {
    /// 接続済みのブローカーを作成
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                connected: AtomicBool::new(true),
                next_id: AtomicU64::new(1),
                subscribe_calls: AtomicUsize::new(0),
                fail_next: AtomicUsize::new(0),
                registry: Mutex::new(Registry::default()),
            }),
        }
    }

    /// 接続断を発生させる（既存の購読は保持される）
    pub fn disconnect(&self) {
        if self.inner.connected.swap(false, Ordering::SeqCst) {
            warn!("Memory broker disconnected");
        }
    }

    /// 再接続
    pub fn reconnect(&self) {
        if !self.inner.connected.swap(true, Ordering::SeqCst) {
            info!("Memory broker reconnected");
        }
    }

    /// 全ての購読を無効化する（ブローカー側で購読が失われた状態）
    pub async fn invalidate_subscriptions(&self) {
        let mut registry = self.inner.registry.lock().await;
        for entry in registry.entries.drain(..) {
            entry.valid.store(false, Ordering::SeqCst);
        }
        registry.cursors.clear();
        warn!("Memory broker dropped every subscription");
    }

    /// 次の `n` 回の購読要求を失敗させる
    pub fn fail_next_subscribes(&self, n: usize) {
        self.inner.fail_next.store(n, Ordering::SeqCst);
    }

    /// これまでの購読要求回数
    pub fn subscribe_calls(&self) -> usize {
        self.inner.subscribe_calls.load(Ordering::SeqCst)
    }

    /// 有効な購読数
    pub async fn subscription_count(&self) -> usize {
        self.inner.registry.lock().await.entries.len()
    }

    /// キューグループなしの購読を作成する
    pub async fn subscribe(
        &self,
        subject: &str,
        sink: mpsc::Sender<Message>,
    ) -> Result<Box<dyn Subscription>, BrokerError> {
        self.register(subject, None, sink).await
    }

    /// メッセージを発行し、配送した購読者数を返す
    pub async fn publish(
        &self,
        subject: &str,
        payload: impl Into<Bytes>,
    ) -> Result<usize, BrokerError> {
        self.publish_message(Message::new(subject, payload)).await
    }

    /// 返信先付きでメッセージを発行する
    pub async fn publish_message(&self, message: Message) -> Result<usize, BrokerError> {
        if !self.is_connected() {
            return Err(BrokerError::Disconnected);
        }

        let targets = {
            let mut registry = self.inner.registry.lock().await;
            let Registry { entries, cursors } = &mut *registry;

            let mut targets = Vec::new();
            let mut groups: HashMap<&str, Vec<&Entry>> = HashMap::new();
            for entry in entries.iter().filter(|e| e.subject == message.subject) {
                match &entry.queue_group {
                    Some(group) => groups.entry(group.as_str()).or_default().push(entry),
                    None => targets.push(entry.sink.clone()),
                }
            }
            for (group, members) in groups {
                let cursor = cursors
                    .entry((message.subject.clone(), group.to_string()))
                    .or_insert(0);
                targets.push(members[*cursor % members.len()].sink.clone());
                *cursor = cursor.wrapping_add(1);
            }
            targets
        };

        let mut delivered = 0;
        for sink in targets {
            if sink.send(message.clone()).await.is_ok() {
                delivered += 1;
            } else {
                debug!(subject = %message.subject, "Subscriber channel closed, message dropped");
            }
        }
        Ok(delivered)
    }

    async fn register(
        &self,
        subject: &str,
        queue_group: Option<&str>,
        sink: mpsc::Sender<Message>,
    ) -> Result<Box<dyn Subscription>, BrokerError> {
        self.inner.subscribe_calls.fetch_add(1, Ordering::SeqCst);

        if !self.is_connected() {
            return Err(BrokerError::Disconnected);
        }
        let injected = self
            .inner
            .fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(BrokerError::Rejected("injected subscribe failure".to_string()));
        }

        let id = self.inner.next_id.fetch_add(1, Ordering::SeqCst);
        let valid = Arc::new(AtomicBool::new(true));
        self.inner.registry.lock().await.entries.push(Entry {
            id,
            subject: subject.to_string(),
            queue_group: queue_group.map(str::to_string),
            sink,
            valid: valid.clone(),
        });
        debug!(id, subject, queue_group = ?queue_group, "Memory subscription created");

        Ok(Box::new(MemorySubscription {
            id,
            subject: subject.to_string(),
            valid,
            broker: self.inner.clone(),
        }))
    }
}

#[async_trait]
impl BrokerConnection for MemoryBroker {
    fn is_connected(&self) -> bool {
        self.inner.connected.load(Ordering::SeqCst)
    }

    async fn queue_subscribe(
        &self,
        subject: &str,
        queue_group: &str,
        sink: mpsc::Sender<Message>,
    ) -> Result<Box<dyn Subscription>, BrokerError> {
        self.register(subject, Some(queue_group), sink).await
    }
}

/// [`MemoryBroker`] の購読ハンドル
struct MemorySubscription {
    id: u64,
    subject: String,
    valid: Arc<AtomicBool>,
    broker: Arc<Inner>,
}

#[async_trait]
impl Subscription for MemorySubscription {
    fn id(&self) -> u64 {
        self.id
    }

    fn subject(&self) -> &str {
        &self.subject
    }

    fn is_valid(&self) -> bool {
        self.valid.load(Ordering::SeqCst)
    }

    async fn unsubscribe(&mut self) -> Result<(), BrokerError> {
        if !self.valid.swap(false, Ordering::SeqCst) {
            return Err(BrokerError::Closed);
        }
        let mut registry = self.broker.registry.lock().await;
        registry.entries.retain(|entry| entry.id != self.id);
        Ok(())
    }
}
