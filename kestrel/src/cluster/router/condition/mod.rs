pub mod condition_router;
pub mod matcher;

pub use condition_router::{ConditionRouter, ConditionRouterFactory};
