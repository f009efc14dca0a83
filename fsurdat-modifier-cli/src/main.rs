use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use tracing::{info, Level};

use fsurdat_modifier::ModifyConfig;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// 設定ファイル (.cfg)
    #[arg(value_name = "CFG_PATH")]
    cfg_path: PathBuf,

    /// 詳細ログを出力
    #[arg(short, long, conflicts_with = "silent")]
    verbose: bool,

    /// 警告とエラーのみ出力
    #[arg(short, long)]
    silent: bool,
}

fn main() -> Result<()> {
    // CLI引数の解析
    let args = Args::parse();

    // ログの初期化
    let level = if args.verbose {
        Level::DEBUG
    } else if args.silent {
        Level::WARN
    } else {
        Level::INFO
    };
    tracing_subscriber::fmt().with_max_level(level).init();

    // 処理開始時間を記録
    let start_time = std::time::Instant::now();

    info!("Reading config file: {:?}", args.cfg_path);
    let config = ModifyConfig::from_cfg_file(&args.cfg_path)
        .with_context(|| format!("Invalid config file: {}", args.cfg_path.display()))?;

    let output = fsurdat_modifier::run(&config)
        .with_context(|| format!("Failed to modify {}", config.fsurdat_in.display()))?;

    // 処理時間を表示
    let elapsed = start_time.elapsed();
    info!("Total processing time: {:?}", elapsed);
    println!("{}", output.display());

    Ok(())
}
