//! ロギング初期化ユーティリティ
//!
//! フィルタの優先順位: `LIFELINE_DEBUG` → `LIFELINE_LOG_LEVEL` → `RUST_LOG` → `info`

use lifeline_common::config::{get_env, get_env_bool};
use lifeline_common::CommonError;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const DEFAULT_DIRECTIVE: &str = "info";

/// 環境変数からフィルタディレクティブを決定する
pub fn filter_directive() -> String {
    resolve_directive(
        get_env_bool("LIFELINE_DEBUG", false),
        get_env("LIFELINE_LOG_LEVEL"),
        get_env("RUST_LOG"),
    )
}

fn resolve_directive(debug: bool, level: Option<String>, rust_log: Option<String>) -> String {
    if debug {
        return "debug".to_string();
    }
    level
        .or(rust_log)
        .unwrap_or_else(|| DEFAULT_DIRECTIVE.to_string())
}

/// グローバルsubscriberを初期化する
///
/// 2回目以降の呼び出しはエラーになる。
pub fn init() -> Result<(), CommonError> {
    let directive = filter_directive();
    let filter = EnvFilter::try_new(&directive).or_else(|err| {
        eprintln!("Invalid log filter '{}': {}, falling back to info", directive, err);
        EnvFilter::try_new(DEFAULT_DIRECTIVE)
    });
    let filter = filter.map_err(|e| CommonError::Config(e.to_string()))?;

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true))
        .with(filter)
        .try_init()
        .map_err(|e| CommonError::Config(format!("failed to initialize logging: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn test_debug_flag_wins() {
        assert_eq!(
            resolve_directive(true, Some("warn".into()), Some("error".into())),
            "debug"
        );
    }

    #[test]
    fn test_level_before_rust_log() {
        assert_eq!(
            resolve_directive(false, Some("warn".into()), Some("error".into())),
            "warn"
        );
        assert_eq!(resolve_directive(false, None, Some("error".into())), "error");
        assert_eq!(resolve_directive(false, None, None), "info");
    }

    #[test]
    #[serial]
    fn test_filter_directive_reads_env() {
        std::env::remove_var("LIFELINE_DEBUG");
        std::env::set_var("LIFELINE_LOG_LEVEL", "lifeline_probe=trace");
        assert_eq!(filter_directive(), "lifeline_probe=trace");

        std::env::set_var("LIFELINE_DEBUG", "true");
        assert_eq!(filter_directive(), "debug");

        std::env::remove_var("LIFELINE_DEBUG");
        std::env::remove_var("LIFELINE_LOG_LEVEL");
    }
}
