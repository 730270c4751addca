//! Data-plane operations shared by every plugin

use log::{debug, warn};
use std::collections::HashSet;

use crate::mcp::{
    McpError, McpResult, McpSession, Primitive, PrimitiveKind, ToolArguments, ToolCallResult,
};

/// Invoke a tool. A tool-level `isError` result is returned as-is.
pub async fn call_tool(
    session: &McpSession,
    name: &str,
    arguments: ToolArguments,
) -> McpResult<ToolCallResult> {
    debug!("Calling tool {} over {}", name, session.transport_type());
    let result = session.call_tool(name, arguments).await?;
    if result.is_error() {
        warn!("Tool {} reported an error: {}", name, result.text());
    }
    Ok(result)
}

/// List resources, tools and prompts concurrently.
///
/// Categories the server did not advertise are skipped. A failing category is
/// logged and left out. Output order is resources, tools, prompts with
/// duplicate `(kind, name)` pairs removed.
pub async fn aggregate_primitives(session: &McpSession) -> McpResult<Vec<Primitive>> {
    if !session.is_open() {
        return Err(McpError::NotConnected);
    }

    let capabilities = session.server_capabilities();
    let resources = async {
        match capabilities.resources {
            Some(_) => Some(session.list_resources().await),
            None => None,
        }
    };
    let tools = async {
        match capabilities.tools {
            Some(_) => Some(session.list_tools().await),
            None => None,
        }
    };
    let prompts = async {
        match capabilities.prompts {
            Some(_) => Some(session.list_prompts().await),
            None => None,
        }
    };

    let (resources, tools, prompts) = futures::join!(resources, tools, prompts);

    let mut primitives = Vec::new();
    collect(&mut primitives, "resources", resources, Primitive::Resource);
    collect(&mut primitives, "tools", tools, Primitive::Tool);
    collect(&mut primitives, "prompts", prompts, Primitive::Prompt);

    Ok(dedup_primitives(primitives))
}

fn collect<T>(
    out: &mut Vec<Primitive>,
    category: &str,
    listed: Option<McpResult<Vec<T>>>,
    wrap: fn(T) -> Primitive,
) {
    match listed {
        None => debug!("Server does not advertise {}; skipping", category),
        Some(Ok(items)) => out.extend(items.into_iter().map(wrap)),
        Some(Err(e)) => {
            let failure = McpError::PartialListFailure {
                category: category.to_string(),
                message: e.to_string(),
            };
            warn!("{}", failure);
        }
    }
}

/// Drop later primitives whose `(kind, name)` was already seen
pub fn dedup_primitives(primitives: Vec<Primitive>) -> Vec<Primitive> {
    let mut seen: HashSet<(PrimitiveKind, String)> = HashSet::new();
    primitives
        .into_iter()
        .filter(|p| seen.insert((p.kind(), p.name().to_string())))
        .collect()
}
