//! Coach - AI 训练教练编排引擎
//!
//! 模块划分：
//! - **config**: 应用配置加载（TOML + 环境变量 COACH__*）
//! - **core**: 请求上下文、路由、决策追踪、编排状态机、构建与关闭
//! - **actions**: 动作处理器（生成计划 / 修改计划 / 分析记录）与 prompt 组装
//! - **tools**: 只读数据工具（训练历史 / 当前计划 / 近期记录）与执行器
//! - **parser**: 结构化输出提取与计划合并
//! - **memory**: 工作记忆、长期向量记忆、用户偏好
//! - **llm**: 生成与嵌入后端（OpenAI 兼容 / DeepSeek / Mock）
//! - **store**: SQLite 与计划/记录仓库
//! - **observability**: 日志初始化

pub mod actions;
pub mod config;
pub mod core;
pub mod llm;
pub mod memory;
pub mod observability;
pub mod parser;
pub mod store;
pub mod tools;

pub use crate::actions::ActionKind;
pub use crate::core::{AgentError, AgentResponse, CoachAgent, CoachBuilder, Request};
