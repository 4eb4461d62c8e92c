//! CLI module for lifeline-probe
//!
//! Provides command-line interface for the probe server.

use clap::{Args, Parser, Subcommand};
use lifeline_common::{HealthCheckConfig, ProbeKind};

/// Lifeline - liveness / readiness / startup probe server
#[derive(Parser, Debug)]
#[command(name = "lifeline-probe")]
#[command(version, about, long_about = None)]
#[command(after_help = r#"ENVIRONMENT VARIABLES:
    HEALTH_CHECK_<KIND>_ENABLED             Enable the probe (default: true)
    HEALTH_CHECK_<KIND>_HTTP_HOST           Bind address (default: 0.0.0.0)
    HEALTH_CHECK_<KIND>_HTTP_PORT           Listen port (default: 8200 / 8201 / 8202)
    HEALTH_CHECK_<KIND>_HTTP_PATH           Request path (default: /liveness, /readiness, /startup)
    HEALTH_CHECK_<KIND>_HTTP_READ_TIMEOUT   Read timeout, e.g. 5s (default: 5s)
    HEALTH_CHECK_<KIND>_HTTP_WRITE_TIMEOUT  Write timeout, e.g. 10s (default: 10s)
    LIFELINE_LOG_LEVEL                      Log filter (default: info)
    LIFELINE_DEBUG                          Force debug logging

    <KIND> is one of LIVENESS, READINESS, STARTUP.
"#)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the probe listeners (default)
    Serve(ServeArgs),
    /// Print the effective configuration as JSON
    Config(ServeArgs),
}

/// serve サブコマンドの引数
#[derive(Args, Debug, Clone, Default)]
pub struct ServeArgs {
    /// Disable a probe (repeatable)
    #[arg(long = "disable", value_name = "KIND")]
    pub disable: Vec<ProbeKind>,

    /// Override the bind address of every probe
    #[arg(short = 'H', long)]
    pub host: Option<String>,
}

impl ServeArgs {
    /// 環境変数由来の設定にCLI引数を上書き適用する
    pub fn apply(&self, mut config: HealthCheckConfig) -> HealthCheckConfig {
        if let Some(host) = &self.host {
            for kind in ProbeKind::ALL {
                config.get_mut(kind).host = host.clone();
            }
        }
        for kind in &self.disable {
            config = config.disable(*kind);
        }
        config
    }
}
