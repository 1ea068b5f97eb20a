pub mod cli;
pub mod commands;
pub mod dataset;
pub mod ml;
pub mod model;

/// ログ出力を初期化
///
/// 既定のレベルは info、`verbose` 指定時は debug。`RUST_LOG` が設定されていればそちらを優先する。
pub fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .try_init();
}
