//! scout：从产品网页提取结构化信息
//!
//! 用法: scout <url> [--out <path>] [--single-pass] [--config <path>]
//! 结果以格式化 JSON 打印到 stdout；日志输出到 stderr。

use std::path::PathBuf;

use anyhow::{bail, Context};
use scout::agent::{
    create_agent_components, extract_product_snapshot_single_pass, extract_product_snapshot_stream,
};
use scout::config::load_config;
use scout::react::LoopEvent;
use tokio::sync::mpsc;

const USAGE: &str = "Usage: scout <url> [--out <path>] [--single-pass] [--config <path>]";

#[derive(Debug, PartialEq)]
struct CliArgs {
    url: String,
    out: Option<PathBuf>,
    single_pass: bool,
    config: Option<PathBuf>,
}

fn parse_args(args: impl IntoIterator<Item = String>) -> anyhow::Result<CliArgs> {
    let mut url = None;
    let mut out = None;
    let mut single_pass = false;
    let mut config = None;

    let mut iter = args.into_iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--out" | "-o" => {
                out = Some(PathBuf::from(iter.next().context("--out requires a path")?));
            }
            "--config" | "-c" => {
                config = Some(PathBuf::from(iter.next().context("--config requires a path")?));
            }
            "--single-pass" => single_pass = true,
            "--help" | "-h" => bail!(USAGE),
            flag if flag.starts_with('-') => bail!("Unknown option: {}\n{}", flag, USAGE),
            _ if url.is_none() => url = Some(arg.clone()),
            _ => bail!("Unexpected argument: {}\n{}", arg, USAGE),
        }
    }

    Ok(CliArgs {
        url: url.context(USAGE)?,
        out,
        single_pass,
        config,
    })
}

fn log_event(event: &LoopEvent) {
    match event {
        LoopEvent::TurnStarted { turn, max_turns } => {
            tracing::info!("turn {}/{}", turn, max_turns)
        }
        LoopEvent::ToolCall {
            tool, arguments, ..
        } => tracing::info!("-> {} {}", tool, arguments),
        LoopEvent::ToolResult { tool, success, .. } => {
            tracing::info!("<- {} {}", tool, if *success { "ok" } else { "failed" })
        }
        LoopEvent::Finished { .. } | LoopEvent::Failed { .. } => {}
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = parse_args(std::env::args().skip(1))?;
    let cfg = load_config(args.config.clone()).context("Failed to load config")?;
    scout::observability::init(&cfg.log.level);

    let components = create_agent_components(&cfg).context("Failed to create agent")?;

    let outcome = if args.single_pass {
        extract_product_snapshot_single_pass(&components, &args.url).await
    } else {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let printer = tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                log_event(&event);
            }
        });
        let outcome = extract_product_snapshot_stream(&components, &args.url, tx).await;
        let _ = printer.await;
        outcome
    };
    let outcome =
        outcome.with_context(|| format!("Failed to scrape and analyze product: {}", args.url))?;

    tracing::info!(
        turns = outcome.turns,
        tool_dispatches = outcome.tool_dispatches,
        prompt_tokens = outcome.usage.prompt_tokens,
        completion_tokens = outcome.usage.completion_tokens,
        "done"
    );

    let json = serde_json::to_string_pretty(&outcome.payload)?;
    println!("{}", json);

    if let Some(path) = args.out {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        std::fs::write(&path, json + "\n")
            .with_context(|| format!("Failed to write {}", path.display()))?;
        tracing::info!(path = %path.display(), "snapshot written");
    }

    Ok(())
}
