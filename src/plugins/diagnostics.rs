//! Connection error diagnostics
//!
//! Rewrites raw connection failures into messages that say what to check.

use crate::mcp::McpError;
use crate::transport::TransportType;

fn path_hint(transport_type: TransportType) -> &'static str {
    match transport_type {
        TransportType::Sse => "SSE servers usually expose their stream at /sse",
        TransportType::WebSocket => "WebSocket servers usually listen on /message",
        TransportType::StreamableHttp => "Streamable HTTP servers usually answer on / or /mcp",
    }
}

/// Qualify a connection error with the transport name and a hint.
/// Errors that are not connection failures, or match no known pattern, pass through.
pub fn enrich_error(transport_type: TransportType, uri: &str, error: McpError) -> McpError {
    let original = match &error {
        McpError::ConnectionFailed(message)
        | McpError::TransportError(message)
        | McpError::InvalidResponse(message) => message.clone(),
        McpError::RequestTimeout { .. } => error.to_string(),
        _ => return error,
    };

    let lower = original.to_ascii_lowercase();
    let name = transport_type.display_name();

    let hint = if lower.contains("404") {
        format!(
            "{} endpoint not found (HTTP 404) at {}. {}",
            name,
            uri,
            path_hint(transport_type)
        )
    } else if lower.contains("timeout") || lower.contains("timed out") {
        format!(
            "{} connection to {} timed out. Check that the server is running and reachable",
            name, uri
        )
    } else if lower.contains("failed to fetch") || lower.contains("refused") {
        format!(
            "Cannot reach the {} server at {}. Make sure the MCP server is running and the address is correct",
            name, uri
        )
    } else if lower.contains("protocol") {
        format!(
            "{} protocol error talking to {}. The server may not speak {}; try another transport",
            name, uri, name
        )
    } else {
        return error;
    };

    McpError::ConnectionFailed(format!("{} ({})", hint, original))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_mentions_path() {
        let err = enrich_error(
            TransportType::Sse,
            "http://localhost:3006/wrong",
            McpError::ConnectionFailed("SSE stream returned HTTP 404 Not Found".to_string()),
        );
        let message = err.to_string();
        assert!(matches!(err, McpError::ConnectionFailed(_)));
        assert!(message.contains("SSE endpoint not found"));
        assert!(message.contains("/sse"));
    }

    #[test]
    fn test_refused_and_timeout_patterns() {
        let err = enrich_error(
            TransportType::StreamableHttp,
            "http://localhost:1",
            McpError::ConnectionFailed("Failed to fetch: error sending request".to_string()),
        );
        assert!(err.to_string().contains("Cannot reach the Streamable HTTP server"));

        let err = enrich_error(
            TransportType::StreamableHttp,
            "http://localhost:1",
            McpError::RequestTimeout {
                method: "initialize".to_string(),
                timeout_ms: 30_000,
            },
        );
        assert!(err.to_string().contains("timed out"));
        assert!(matches!(err, McpError::ConnectionFailed(_)));
    }

    #[test]
    fn test_protocol_pattern() {
        let err = enrich_error(
            TransportType::WebSocket,
            "ws://localhost:3006/message",
            McpError::ConnectionFailed("protocol error: invalid status line".to_string()),
        );
        assert!(err.to_string().contains("WebSocket protocol error"));
    }

    #[test]
    fn test_unrelated_errors_pass_through() {
        let err = enrich_error(
            TransportType::Sse,
            "http://h/sse",
            McpError::ConnectionFailed("something odd".to_string()),
        );
        assert_eq!(err.to_string(), "Connection failed: something odd");

        let err = enrich_error(TransportType::Sse, "http://h/sse", McpError::ConnectionTimeout(10));
        assert!(matches!(err, McpError::ConnectionTimeout(10)));

        let err = enrich_error(TransportType::Sse, "x", McpError::invalid_uri("x", "404"));
        assert!(matches!(err, McpError::InvalidUri { .. }));
    }
}
