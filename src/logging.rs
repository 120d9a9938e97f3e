//! ログ出力の初期化

use tracing::Level;
use tracing_subscriber::EnvFilter;

/// グローバルなログ出力を初期化
///
/// `RUST_LOG` が設定されていればそれを優先し、なければ `level` 以上を出力します。
pub fn init(level: Level) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.as_str().to_lowercase()));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))
}

/// `--debug` フラグに対応するログレベル
pub fn level_for(debug: bool) -> Level {
    if debug {
        Level::DEBUG
    } else {
        Level::INFO
    }
}
