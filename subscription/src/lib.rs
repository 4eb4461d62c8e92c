//! Lifeline subscription layer
//!
//! キューグループ付きpush購読を保持し、ヘルスチェックのたびに
//! 失われた購読を上限付きで再購読する自己修復ユニット

#![warn(missing_docs)]

/// メッセージブローカー境界（接続・購読ハンドル）
pub mod broker;

/// プロセス内ブローカー実装
pub mod memory;

/// 上限付き再購読ループ
pub mod resubscribe;

/// 自己修復購読ユニット
pub mod unit;

pub use broker::{BrokerConnection, Message, Subscription};
pub use memory::MemoryBroker;
pub use unit::SubscriptionUnit;
