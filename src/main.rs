use anyhow::Result;
use batch_sql_evaluator::infrastructure::FsStore;
use batch_sql_evaluator::utils::logging;
use batch_sql_evaluator::{App, Config};

#[tokio::main]
async fn main() -> Result<()> {
    // 加载配置
    let config = Config::from_env();

    // 初始化日志
    logging::init(&config.log_filter);

    let checkpoint_dir = config.checkpoint_dir.clone();

    // 初始化并运行应用
    let summary = App::initialize(config).await?.run().await?;

    // 检查点全部清理后顺手删掉空目录
    if summary.failed.is_empty() {
        if let Err(e) = FsStore::new(&checkpoint_dir).remove_root_if_empty().await {
            tracing::warn!("⚠️ 删除检查点目录失败: {}", e);
        }
    }

    Ok(())
}
