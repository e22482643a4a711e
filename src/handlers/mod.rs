pub mod membership;
pub mod project_handlers;
pub mod task_handlers;
pub mod user_handlers;
