//! 共通型定義
//!
//! ProbeKind, UnitParams, ResubscribePolicy等のコアデータ型

use crate::error::CommonError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// プローブ種別
///
/// 固定の3種類。実行時に拡張されることはなく、スロットのインデックスとして使う。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProbeKind {
    /// Liveness probe
    Liveness,
    /// Readiness probe
    Readiness,
    /// Startup probe
    Startup,
}

impl ProbeKind {
    /// 全種別（インデックス順）
    pub const ALL: [ProbeKind; 3] = [ProbeKind::Liveness, ProbeKind::Readiness, ProbeKind::Startup];

    /// スロットインデックス (0..3)
    pub fn index(self) -> usize {
        match self {
            ProbeKind::Liveness => 0,
            ProbeKind::Readiness => 1,
            ProbeKind::Startup => 2,
        }
    }

    /// 文字列表現
    pub fn as_str(self) -> &'static str {
        match self {
            ProbeKind::Liveness => "liveness",
            ProbeKind::Readiness => "readiness",
            ProbeKind::Startup => "startup",
        }
    }

    /// 環境変数名に埋め込む大文字表現
    pub fn env_segment(self) -> &'static str {
        match self {
            ProbeKind::Liveness => "LIVENESS",
            ProbeKind::Readiness => "READINESS",
            ProbeKind::Startup => "STARTUP",
        }
    }
}

impl fmt::Display for ProbeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProbeKind {
    type Err = CommonError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "liveness" => Ok(ProbeKind::Liveness),
            "readiness" => Ok(ProbeKind::Readiness),
            "startup" => Ok(ProbeKind::Startup),
            other => Err(CommonError::Validation(format!("unknown probe kind: '{}'", other))),
        }
    }
}

/// プローブユニットの起動パラメータ
///
/// 設定から一度だけ構築され、ユニット生成後に変更されることはない。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitParams {
    kind: ProbeKind,
    host: String,
    port: u16,
    read_timeout: Duration,
    write_timeout: Duration,
    path: String,
    name: String,
}

impl UnitParams {
    /// 新しいパラメータを作成
    ///
    /// プローブ名は種別名になる。パスが `/` で始まらない場合は補う。
    pub fn new(
        kind: ProbeKind,
        host: impl Into<String>,
        port: u16,
        path: impl Into<String>,
        read_timeout: Duration,
        write_timeout: Duration,
    ) -> Self {
        let path = path.into();
        let path = if path.starts_with('/') {
            path
        } else {
            format!("/{}", path)
        };

        Self {
            kind,
            host: host.into(),
            port,
            read_timeout,
            write_timeout,
            path,
            name: kind.as_str().to_string(),
        }
    }

    /// プローブ名を上書きする
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// プローブ種別
    pub fn kind(&self) -> ProbeKind {
        self.kind
    }

    /// リッスンホスト
    pub fn host(&self) -> &str {
        &self.host
    }

    /// リッスンポート
    pub fn port(&self) -> u16 {
        self.port
    }

    /// `host:port` 形式のリッスンアドレス
    pub fn listen_address(&self) -> String {
        if self.host.contains(':') && !self.host.starts_with('[') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }

    /// リクエスト読み込みタイムアウト
    pub fn read_timeout(&self) -> Duration {
        self.read_timeout
    }

    /// レスポンス書き込みタイムアウト
    pub fn write_timeout(&self) -> Duration {
        self.write_timeout
    }

    /// リクエストパス
    pub fn path(&self) -> &str {
        &self.path
    }

    /// プローブ名
    pub fn name(&self) -> &str {
        &self.name
    }
}

/// 自動再購読ポリシー
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResubscribePolicy {
    /// 自動再購読を行うか
    pub enabled: bool,
    /// ヘルスチェック1回あたりの最大試行回数
    pub max_attempts: u16,
    /// 試行間の固定待機時間
    pub delay: Duration,
    /// キャンセル済みのコンテキストで試行ループを打ち切るか
    pub abort_on_cancel: bool,
}

impl ResubscribePolicy {
    /// 自動再購読を行わないポリシー
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            max_attempts: 0,
            delay: Duration::ZERO,
            abort_on_cancel: false,
        }
    }

    /// 自動再購読を行うポリシー
    pub fn bounded(max_attempts: u16, delay: Duration) -> Self {
        Self {
            enabled: true,
            max_attempts,
            delay,
            abort_on_cancel: false,
        }
    }

    /// キャンセルで試行ループを打ち切る
    pub fn abort_on_cancel(mut self, abort: bool) -> Self {
        self.abort_on_cancel = abort;
        self
    }
}

impl Default for ResubscribePolicy {
    fn default() -> Self {
        Self::bounded(3, Duration::from_secs(1))
    }
}
