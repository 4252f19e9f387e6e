//! 终端运行时
//!
//! run_scripted 依次提交预设问题（test 模式）；run_interactive 从标准输入逐行读取，
//! 输入退出词或 Ctrl-C 结束。每个问题都是一次独立请求，不跨请求保留对话。

use std::io::Write;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;

use crate::core::{Orchestrator, TurnOutcome};

/// 交互模式的退出词
pub const EXIT_COMMANDS: &[&str] = &["sair", "exit", "quit"];

pub fn is_exit_command(input: &str) -> bool {
    let input = input.trim();
    EXIT_COMMANDS.iter().any(|c| input.eq_ignore_ascii_case(c))
}

/// 处理单条输入并打印回复
pub async fn process_message(
    orchestrator: &Orchestrator,
    input: &str,
    cancel: CancellationToken,
) -> TurnOutcome {
    let outcome = orchestrator.handle_with_cancel(input, cancel).await;
    println!("\n🤖 Dr. IA:\n{}\n", outcome.answer);
    outcome
}

pub async fn run_scripted(orchestrator: &Orchestrator, queries: &[String]) -> Vec<TurnOutcome> {
    let mut outcomes = Vec::with_capacity(queries.len());
    for (i, query) in queries.iter().enumerate() {
        println!("{}", "=".repeat(60));
        println!("🧪 Test {}/{}: {}", i + 1, queries.len(), query);
        outcomes.push(process_message(orchestrator, query, CancellationToken::new()).await);
    }
    outcomes
}

pub async fn run_interactive(orchestrator: &Orchestrator, hospital: &str) -> anyhow::Result<()> {
    println!("🏥 Welcome to {hospital}! Ask about specialties, doctors or appointments.");
    println!("   Type one of {EXIT_COMMANDS:?} to leave.\n");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("👤 You: ");
        std::io::stdout().flush()?;

        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = tokio::signal::ctrl_c() => None,
        };
        let Some(line) = line else {
            break;
        };
        let input = line.trim();
        if input.is_empty() {
            continue;
        }
        if is_exit_command(input) {
            break;
        }

        // Ctrl-C 在处理中只取消当前请求
        let cancel = CancellationToken::new();
        let watcher = cancel.clone();
        let ctrl_c = tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                watcher.cancel();
            }
        });
        process_message(orchestrator, input, cancel).await;
        ctrl_c.abort();
    }

    println!("👋 Goodbye! Take care.");
    Ok(())
}
