//! Lifeline health probe server
//!
//! liveness / readiness / startup の各プローブを独立したHTTPリスナーで公開する

#![warn(missing_docs)]

/// プローブ集約（種別ごとのユニット管理・一括起動）
pub mod aggregator;

/// CLIインターフェース
pub mod cli;

/// プローブリクエストハンドラー（コントリビューター評価）
pub mod handler;

/// ロギング初期化ユーティリティ
pub mod logging;

/// サーバー起動・シャットダウンハンドリング
pub mod server;

/// プローブユニットタスクの監督
pub mod supervisor;

/// プローブユニット（1リスナー = 1エンドポイント）
pub mod unit;

pub use aggregator::{ProbeAggregator, ProbeStatus};
pub use handler::ProbeHandler;
pub use server::ServiceFlags;
pub use supervisor::{TaskOutcome, TaskRecord, TaskSupervisor};
pub use unit::{ProbeUnit, UnitState};
