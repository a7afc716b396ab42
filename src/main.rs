//! Bee Engine 命令行
//!
//! - `bee-engine run <task> [-a ARGS] [--session ID] [--stream]`：运行任务，结果以 JSON 输出到 stdout
//! - `bee-engine tasks`：列出指令目录中的任务

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use clap::{Parser, Subcommand};
use futures_util::StreamExt;
use tokio_util::sync::CancellationToken;

use bee_engine::config::load_config;
use bee_engine::instructions::DirectoryInstructionSource;
use bee_engine::sandbox::SandboxMode;
use bee_engine::{observability, OrchestratorBuilder, RunRequest, StreamItem};

#[derive(Debug, Parser)]
#[command(name = "bee-engine", version, about = "Autonomous task execution engine")]
struct Cli {
    /// 额外的配置文件（覆盖 config/default.toml）
    #[arg(long, global = true, env = "BEE_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run a task until it completes, exhausts its budget or fails
    Run {
        task: String,
        /// Invocation arguments (${ARGUMENTS}, ${ARG_n})
        #[arg(short = 'a', long = "args", default_value = "")]
        arguments: String,
        /// Session id for history and session values
        #[arg(long)]
        session: Option<String>,
        /// Print lifecycle events as JSON lines before the result
        #[arg(long)]
        stream: bool,
        #[arg(long)]
        max_iterations: Option<usize>,
        /// none | process | container
        #[arg(long)]
        sandbox: Option<SandboxMode>,
        /// Model hint passed to the reasoning provider
        #[arg(long)]
        model: Option<String>,
    },
    /// List tasks in the instruction root
    Tasks,
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    observability::init();
    let cli = Cli::parse();
    let mut cfg = load_config(cli.config.clone()).context("Failed to load config")?;

    match cli.command {
        Command::Tasks => {
            let source = DirectoryInstructionSource::new(&cfg.instructions.root);
            let tasks = source.list_tasks().await.context("Failed to list tasks")?;
            if tasks.is_empty() {
                eprintln!("no tasks under {}", cfg.instructions.root.display());
            }
            for task in tasks {
                match task.description {
                    Some(desc) => println!("{}\t{}", task.name, desc),
                    None => println!("{}", task.name),
                }
            }
            Ok(ExitCode::SUCCESS)
        }
        Command::Run {
            task,
            arguments,
            session,
            stream,
            max_iterations,
            sandbox,
            model,
        } => {
            if let Some(n) = max_iterations {
                cfg.engine.max_iterations = n;
            }
            if let Some(mode) = sandbox {
                cfg.sandbox.mode = mode.to_string();
            }
            let builder = OrchestratorBuilder::new(cfg);
            let mut exec = builder.execution_config()?;
            exec.model_hint = model;
            let orchestrator = builder.build().context("Failed to build orchestrator")?;

            let mut request = RunRequest::new(task).with_arguments(arguments);
            request.session_id = session;

            let cancel = CancellationToken::new();
            let on_signal = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    tracing::warn!("interrupt received, cancelling run");
                    on_signal.cancel();
                }
            });

            let result = if stream {
                let mut items = orchestrator.run_stream(request, &exec, cancel)?;
                let mut finished = None;
                while let Some(item) = items.next().await {
                    match item {
                        StreamItem::Event(event) => println!("{}", serde_json::to_string(&event)?),
                        StreamItem::Finished(result) => finished = Some(result),
                    }
                }
                finished.context("stream ended without a result")?
            } else {
                orchestrator.run(request, &exec, cancel).await?
            };

            println!("{}", serde_json::to_string_pretty(&result)?);
            Ok(if result.success {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        }
    }
}
