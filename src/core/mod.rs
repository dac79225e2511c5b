//! 核心编排层：请求上下文、错误、路由、决策追踪、编排状态机、构建与关闭

pub mod builder;
pub mod context;
pub mod error;
pub mod orchestrator;
pub mod router;
pub mod shutdown;
pub mod trace;

pub use builder::CoachBuilder;
pub use context::{AgentContext, AgentResponse, Request};
pub use error::AgentError;
pub use orchestrator::CoachAgent;
pub use router::{infer_action, ActionRouter};
pub use shutdown::{ShutdownCoordinator, ShutdownManager, ShutdownReason, WorkingStoreCleanup};
pub use trace::{DecisionKind, DecisionRecord, DecisionTracer};
