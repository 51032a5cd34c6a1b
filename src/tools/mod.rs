//! Tool layer: registry, built-in tools, argument validation.

pub mod ask_user;
pub mod registry;
pub mod schema;
pub mod web_fetch;

pub use ask_user::{ClarificationRequest, ASK_USER_TOOL_ID, MAX_CLARIFICATIONS};
pub use registry::{
    ToolContext, ToolError, ToolExecutor, ToolOutcome, ToolRegistry, ToolSpec, SOURCE_TOOL_PREFIX,
};
pub use web_fetch::{WebFetchTool, WEB_FETCH_TOOL_ID};

use crate::tools::registry::ToolSpec as Spec;
use std::sync::Arc;

/// Register the built-in tools every deployment ships with.
pub fn register_builtins(registry: &mut ToolRegistry) {
    registry.add_spec(Spec {
        id: ASK_USER_TOOL_ID.to_string(),
        parent_id: ASK_USER_TOOL_ID.to_string(),
        function: ASK_USER_TOOL_ID.to_string(),
        description: ask_user::description().to_string(),
        parameters: ask_user::parameters(),
        concurrency: Some(1),
        requires_user_input: true,
        provider: None,
    });

    registry.add_spec(Spec {
        id: WEB_FETCH_TOOL_ID.to_string(),
        parent_id: WEB_FETCH_TOOL_ID.to_string(),
        function: WEB_FETCH_TOOL_ID.to_string(),
        description: web_fetch::WebFetchTool::description().to_string(),
        parameters: web_fetch::WebFetchTool::parameters(),
        concurrency: Some(4),
        requires_user_input: false,
        provider: None,
    });
    registry.register_executor(WEB_FETCH_TOOL_ID, Arc::new(WebFetchTool::new()));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtins_registered() {
        let mut registry = ToolRegistry::new();
        register_builtins(&mut registry);
        assert!(registry.has_tool(ASK_USER_TOOL_ID));
        assert!(registry.has_tool(WEB_FETCH_TOOL_ID));
        assert!(registry
            .get(ASK_USER_TOOL_ID)
            .unwrap()
            .requires_user_input);
    }
}
