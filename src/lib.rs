//! Dr. IA - 医院助理智能体编排核心
//!
//! 面向小型本地模型的工具调用编排：模型以文本哨兵块表达工具调用，编排器负责解析、分发、
//! 合成回复，并用有限轮次保证每个请求都能结束。
//!
//! 模块划分：
//! - **agent**: 终端运行时（test 模式 / 交互模式）
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 编排器、状态路由、错误与恢复、构建器
//! - **llm**: LLM 客户端抽象、ChatML 渲染与实现（OpenAI 兼容 / Mock）
//! - **memory**: 单次请求的对话状态
//! - **observability**: tracing 初始化与编排遥测
//! - **react**: 上下文压缩、工具调用解析、Planner、回复合成、主循环
//! - **tools**: 医院数据库、工具注册表与并发分发器

pub mod agent;
pub mod config;
pub mod core;
pub mod llm;
pub mod memory;
pub mod observability;
pub mod react;
pub mod tools;

pub use crate::core::{AgentBuilder, Orchestrator, OutcomeStatus, TurnOutcome};
