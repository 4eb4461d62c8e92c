//! Lifeline common layer
//!
//! プローブ種別・設定・エラー型・ライフサイクル契約など、
//! probe / subscription 両クレートで共有する定義

#![warn(missing_docs)]

/// 設定管理（環境変数ヘルパー、プローブ設定、購読設定）
pub mod config;

/// エラー型定義
pub mod error;

/// ヘルスコントリビューターとManagedUnitライフサイクル契約
pub mod lifecycle;

/// 共通型定義
pub mod types;

pub use config::{HealthCheckConfig, ProbeConfig, ProbeConfigSource, SubscriptionConfig};
pub use error::{BrokerError, CommonError, ProbeError, SubscriptionError, UnitError};
pub use lifecycle::{HealthContributor, HealthFlag, ManagedUnit, UnitContributor};
pub use types::{ProbeKind, ResubscribePolicy, UnitParams};
