use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use chrono::TimeDelta;
use serde::{Deserialize, Serialize};
use tracing_subscriber::EnvFilter;

use spindle_core::{
    EngineBuilder, EngineConfig, EnqueueOptions, Handler, HandlerError, Task, TaskContext,
    TaskState,
};

#[derive(Debug, Serialize, Deserialize)]
struct DeliverEmail {
    user_id: u64,
    template_id: String,
}

impl Task for DeliverEmail {
    const TYPE: &'static str = "email:deliver";
}

struct DeliverEmailHandler;

#[async_trait]
impl Handler<DeliverEmail> for DeliverEmailHandler {
    async fn handle(&self, ctx: TaskContext, task: DeliverEmail) -> Result<(), HandlerError> {
        if task.template_id.is_empty() {
            return Err(HandlerError::skip_retry("template_id is empty"));
        }
        tracing::info!(
            task_id = %ctx.task_id,
            user_id = task.user_id,
            template_id = %task.template_id,
            retry_count = ctx.retry_count,
            "sending email"
        );
        Ok(())
    }
}

/// 引数に JSON ファイルがあれば読み込み、環境変数で上書きする
fn load_config() -> anyhow::Result<EngineConfig> {
    let config = match std::env::args().nth(1) {
        Some(path) => EngineConfig::from_json_file(&path)
            .with_context(|| format!("loading config from {path}"))?,
        None => EngineConfig::default(),
    };
    Ok(config.apply_env_overrides()?)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .try_init();

    // (A) Engine を組み立てる（handler 未登録なら build で落ちる）
    let engine = EngineBuilder::new(load_config()?)
        .register::<DeliverEmail, _>(DeliverEmailHandler)?
        .expect_tasks(&[DeliverEmail::TYPE])
        .build()
        .await?;

    // (B) scheduler / janitor / workers を起動
    let handle = engine.start();

    // (C) 2 秒後に処理、完了後 5 日保持
    let info = engine
        .producer()
        .enqueue_task(
            &DeliverEmail {
                user_id: 42,
                template_id: "welcome".into(),
            },
            EnqueueOptions::new()
                .process_in(TimeDelta::seconds(2))
                .retention(Duration::from_secs(5 * 24 * 60 * 60)),
        )
        .await?;

    let inspector = engine.inspector();
    println!("{}", serde_json::to_string_pretty(&inspector.status(info.id).await?)?);

    // (D) 完了するか Ctrl-C まで待つ
    let wait_for_completion = async {
        loop {
            let status = inspector.status(info.id).await?;
            if matches!(status.state, TaskState::Completed | TaskState::Archived) {
                return anyhow::Ok(status);
            }
            tokio::time::sleep(Duration::from_millis(500)).await;
        }
    };

    tokio::select! {
        status = wait_for_completion => {
            println!("{}", serde_json::to_string_pretty(&status?)?);
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("interrupted");
        }
    }

    // (E) in-flight を drain して停止
    handle.shutdown().await;
    Ok(())
}
