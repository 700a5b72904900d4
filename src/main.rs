//! explore-agent 入口：加载配置、装配 Agent、运行一次探索并打印报告

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use explore_agent::{build_agent, load_config, observability};

#[derive(Parser, Debug)]
#[command(name = "explore-agent", about = "Goal-directed codebase exploration agent")]
struct Cli {
    /// 探索目标
    goal: String,

    /// 迭代上限（默认取配置 agent.max_iterations）
    #[arg(long)]
    max_iterations: Option<usize>,

    /// 额外的配置文件
    #[arg(long)]
    config: Option<PathBuf>,

    /// 工作区根目录（覆盖 tools.workspace_root）
    #[arg(long)]
    workspace: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    observability::init();
    let cli = Cli::parse();

    let mut cfg = load_config(cli.config).context("Failed to load config")?;
    if let Some(workspace) = cli.workspace {
        cfg.tools.workspace_root = Some(workspace);
    }

    let mut agent = build_agent(&cfg).context("Failed to build agent")?;
    let max_iterations = cli.max_iterations.unwrap_or(agent.max_iterations());
    let report = agent
        .run(&cli.goal, max_iterations)
        .await
        .context("Exploration failed")?;

    println!("{report}");
    Ok(())
}
