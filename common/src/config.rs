//! 設定管理
//!
//! 環境変数ヘルパー、プローブ設定（種別ごとに1つのProbeConfig）、購読設定

use crate::error::CommonError;
use crate::types::{ProbeKind, ResubscribePolicy, UnitParams};
use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};
use std::str::FromStr;
use std::time::Duration;

/// Get an environment variable, treating empty values as unset.
pub fn get_env(name: &str) -> Option<String> {
    match std::env::var(name) {
        Ok(val) if !val.trim().is_empty() => Some(val),
        _ => None,
    }
}

/// Get an environment variable parsed to `T`, or `default`.
///
/// Unparsable values fall back to `default` with a warning.
pub fn get_env_parse<T: FromStr>(name: &str, default: T) -> T {
    match get_env(name) {
        Some(raw) => match raw.trim().parse() {
            Ok(val) => val,
            Err(_) => {
                tracing::warn!(variable = name, value = %raw, "Invalid value, using default");
                default
            }
        },
        None => default,
    }
}

/// Get a boolean environment variable (`1/true/yes/on`, `0/false/no/off`).
pub fn get_env_bool(name: &str, default: bool) -> bool {
    match get_env(name) {
        Some(raw) => match parse_bool(&raw) {
            Some(val) => val,
            None => {
                tracing::warn!(variable = name, value = %raw, "Invalid boolean, using default");
                default
            }
        },
        None => default,
    }
}

/// Get a duration environment variable (see [`parse_duration`]).
pub fn get_env_duration(name: &str, default: Duration) -> Duration {
    match get_env(name) {
        Some(raw) => match parse_duration(&raw) {
            Ok(val) => val,
            Err(e) => {
                tracing::warn!(variable = name, error = %e, "Invalid duration, using default");
                default
            }
        },
        None => default,
    }
}

/// Get a duration environment variable as whole milliseconds.
///
/// Durations that do not fit in `u64` milliseconds fall back to `default` with a warning.
pub fn get_env_millis(name: &str, default: Duration) -> u64 {
    let fallback = u64::try_from(default.as_millis()).unwrap_or(u64::MAX);
    match u64::try_from(get_env_duration(name, default).as_millis()) {
        Ok(millis) => millis,
        Err(_) => {
            tracing::warn!(variable = name, "Duration out of range, using default");
            fallback
        }
    }
}

/// Parse a boolean flag value.
pub fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Parse a duration such as `500ms`, `5s`, `2m`, `1h` or bare seconds (`10`).
pub fn parse_duration(value: &str) -> Result<Duration, CommonError> {
    let value = value.trim();
    let invalid = || CommonError::Config(format!("invalid duration: '{}'", value));

    let split = value
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(value.len());
    let (digits, unit) = value.split_at(split);
    if digits.is_empty() {
        return Err(invalid());
    }
    let amount: u64 = digits.parse().map_err(|_| invalid())?;

    match unit {
        "" | "s" => Ok(Duration::from_secs(amount)),
        "ms" => Ok(Duration::from_millis(amount)),
        "m" => amount
            .checked_mul(60)
            .map(Duration::from_secs)
            .ok_or_else(invalid),
        "h" => amount
            .checked_mul(3600)
            .map(Duration::from_secs)
            .ok_or_else(invalid),
        _ => Err(invalid()),
    }
}

/// Configuration capability consumed by the probe aggregator.
pub trait ProbeConfigSource {
    /// Whether the probe of this kind should be served.
    fn is_probe_enabled(&self, kind: ProbeKind) -> bool;

    /// Listener parameters for this kind.
    fn unit_params(&self, kind: ProbeKind) -> UnitParams;
}

/// 1プローブ分の設定
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeConfig {
    /// 有効/無効 (デフォルト: true)
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// リッスンホスト (デフォルト: "0.0.0.0")
    #[serde(default = "default_host")]
    pub host: String,

    /// リッスンポート
    pub port: u16,

    /// リクエストパス
    pub path: String,

    /// 読み込みタイムアウト（ミリ秒）(デフォルト: 5000)
    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,

    /// 書き込みタイムアウト（ミリ秒）(デフォルト: 10000)
    #[serde(default = "default_write_timeout_ms")]
    pub write_timeout_ms: u64,
}

fn default_enabled() -> bool {
    true
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_read_timeout_ms() -> u64 {
    5_000
}

fn default_write_timeout_ms() -> u64 {
    10_000
}

impl ProbeConfig {
    /// 種別ごとのデフォルト値
    ///
    /// liveness `/liveness:8200`, readiness `/readiness:8201`, startup `/startup:8202`
    pub fn defaults_for(kind: ProbeKind) -> Self {
        let (port, path) = match kind {
            ProbeKind::Liveness => (8200, "/liveness"),
            ProbeKind::Readiness => (8201, "/readiness"),
            ProbeKind::Startup => (8202, "/startup"),
        };

        Self {
            enabled: default_enabled(),
            host: default_host(),
            port,
            path: path.to_string(),
            read_timeout_ms: default_read_timeout_ms(),
            write_timeout_ms: default_write_timeout_ms(),
        }
    }

    /// 環境変数 `HEALTH_CHECK_<KIND>_*` から読み込む
    pub fn from_env(kind: ProbeKind) -> Self {
        let defaults = Self::defaults_for(kind);
        let var = |suffix: &str| format!("HEALTH_CHECK_{}_{}", kind.env_segment(), suffix);

        Self {
            enabled: get_env_bool(&var("ENABLED"), defaults.enabled),
            host: get_env(&var("HTTP_HOST")).unwrap_or(defaults.host.clone()),
            port: get_env_parse(&var("HTTP_PORT"), defaults.port),
            path: get_env(&var("HTTP_PATH")).unwrap_or(defaults.path.clone()),
            read_timeout_ms: get_env_millis(&var("HTTP_READ_TIMEOUT"), defaults.read_timeout()),
            write_timeout_ms: get_env_millis(
                &var("HTTP_WRITE_TIMEOUT"),
                defaults.write_timeout(),
            ),
        }
    }

    /// 読み込みタイムアウト
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    /// 書き込みタイムアウト
    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }

    /// 設定値を検証
    pub fn validate(&self, kind: ProbeKind) -> Result<(), CommonError> {
        if self.path.trim().is_empty() {
            return Err(CommonError::Validation(format!(
                "{} probe path must not be empty",
                kind
            )));
        }
        if self.read_timeout_ms == 0 || self.write_timeout_ms == 0 {
            return Err(CommonError::Validation(format!(
                "{} probe timeouts must be greater than zero",
                kind
            )));
        }
        Ok(())
    }

    /// ユニットパラメータに変換
    pub fn unit_params(&self, kind: ProbeKind) -> UnitParams {
        UnitParams::new(
            kind,
            self.host.clone(),
            self.port,
            self.path.clone(),
            self.read_timeout(),
            self.write_timeout(),
        )
    }
}

/// ヘルスチェック全体の設定（ProbeKindでキー付け）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthCheckConfig {
    probes: [ProbeConfig; 3],
}

impl HealthCheckConfig {
    /// 環境変数から読み込む
    pub fn from_env() -> Self {
        Self {
            probes: ProbeKind::ALL.map(ProbeConfig::from_env),
        }
    }

    /// 種別の設定
    pub fn get(&self, kind: ProbeKind) -> &ProbeConfig {
        &self.probes[kind.index()]
    }

    /// 種別の設定（可変）
    pub fn get_mut(&mut self, kind: ProbeKind) -> &mut ProbeConfig {
        &mut self.probes[kind.index()]
    }

    /// 種別の設定を差し替える
    pub fn with_probe(mut self, kind: ProbeKind, config: ProbeConfig) -> Self {
        self.probes[kind.index()] = config;
        self
    }

    /// 種別を無効化する
    pub fn disable(mut self, kind: ProbeKind) -> Self {
        self.probes[kind.index()].enabled = false;
        self
    }

    /// 有効な種別の一覧
    pub fn enabled_kinds(&self) -> Vec<ProbeKind> {
        ProbeKind::ALL
            .into_iter()
            .filter(|kind| self.get(*kind).enabled)
            .collect()
    }

    /// 有効なプローブの設定をすべて検証
    pub fn validate(&self) -> Result<(), CommonError> {
        for kind in self.enabled_kinds() {
            self.get(kind).validate(kind)?;
        }
        Ok(())
    }
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            probes: ProbeKind::ALL.map(ProbeConfig::defaults_for),
        }
    }
}

impl Serialize for HealthCheckConfig {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(ProbeKind::ALL.len()))?;
        for kind in ProbeKind::ALL {
            map.serialize_entry(kind.as_str(), self.get(kind))?;
        }
        map.end()
    }
}

impl ProbeConfigSource for HealthCheckConfig {
    fn is_probe_enabled(&self, kind: ProbeKind) -> bool {
        self.get(kind).enabled
    }

    fn unit_params(&self, kind: ProbeKind) -> UnitParams {
        self.get(kind).unit_params(kind)
    }
}

/// 購読ユニット設定
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionConfig {
    /// 購読サブジェクト
    pub subject: String,

    /// キューグループ名
    pub queue_group: String,

    /// 自動再購読 (デフォルト: true)
    #[serde(default = "default_auto_resubscribe")]
    pub auto_resubscribe: bool,

    /// ヘルスチェック1回あたりの再購読試行回数 (デフォルト: 3)
    #[serde(default = "default_auto_resubscribe_count")]
    pub auto_resubscribe_count: u16,

    /// 再購読試行間隔（ミリ秒）(デフォルト: 1000)
    #[serde(default = "default_auto_resubscribe_delay_ms")]
    pub auto_resubscribe_delay_ms: u64,

    /// キャンセル時に再購読ループを打ち切る (デフォルト: false)
    #[serde(default)]
    pub abort_resubscribe_on_cancel: bool,
}

fn default_auto_resubscribe() -> bool {
    true
}

fn default_auto_resubscribe_count() -> u16 {
    3
}

fn default_auto_resubscribe_delay_ms() -> u64 {
    1_000
}

impl SubscriptionConfig {
    /// デフォルトのポリシーで作成
    pub fn new(subject: impl Into<String>, queue_group: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            queue_group: queue_group.into(),
            auto_resubscribe: default_auto_resubscribe(),
            auto_resubscribe_count: default_auto_resubscribe_count(),
            auto_resubscribe_delay_ms: default_auto_resubscribe_delay_ms(),
            abort_resubscribe_on_cancel: false,
        }
    }

    /// 環境変数 `<PREFIX>_*` から読み込む
    ///
    /// `<PREFIX>_SUBJECT` と `<PREFIX>_QUEUE_GROUP` は必須。
    pub fn from_env(prefix: &str) -> Result<Self, CommonError> {
        let var = |suffix: &str| format!("{}_{}", prefix, suffix);

        let subject = get_env(&var("SUBJECT"))
            .ok_or_else(|| CommonError::Config(format!("{} is not set", var("SUBJECT"))))?;
        let queue_group = get_env(&var("QUEUE_GROUP"))
            .ok_or_else(|| CommonError::Config(format!("{} is not set", var("QUEUE_GROUP"))))?;

        let delay_ms = get_env_millis(
            &var("AUTO_RESUBSCRIBE_DELAY"),
            Duration::from_millis(default_auto_resubscribe_delay_ms()),
        );

        let config = Self {
            subject,
            queue_group,
            auto_resubscribe: get_env_bool(&var("AUTO_RESUBSCRIBE"), default_auto_resubscribe()),
            auto_resubscribe_count: get_env_parse(
                &var("AUTO_RESUBSCRIBE_COUNT"),
                default_auto_resubscribe_count(),
            ),
            auto_resubscribe_delay_ms: delay_ms,
            abort_resubscribe_on_cancel: get_env_bool(
                &var("ABORT_RESUBSCRIBE_ON_CANCEL"),
                false,
            ),
        };
        config.validate()?;
        Ok(config)
    }

    /// 設定値を検証
    pub fn validate(&self) -> Result<(), CommonError> {
        if self.subject.trim().is_empty() {
            return Err(CommonError::Validation("subject must not be empty".into()));
        }
        if self.queue_group.trim().is_empty() {
            return Err(CommonError::Validation(
                "queue group must not be empty".into(),
            ));
        }
        Ok(())
    }

    /// 再購読ポリシー
    pub fn resubscribe_policy(&self) -> ResubscribePolicy {
        ResubscribePolicy {
            enabled: self.auto_resubscribe,
            max_attempts: self.auto_resubscribe_count,
            delay: Duration::from_millis(self.auto_resubscribe_delay_ms),
            abort_on_cancel: self.abort_resubscribe_on_cancel,
        }
    }
}
