//! Conversion of MCP tool results into the plain-text tool contract.

use crate::types::ContentBlock;

/// Returned when a tool call produces no content at all.
pub const NO_OUTPUT: &str = "(no output)";

/// Join every content block into one newline-separated string.
///
/// Text blocks contribute their text; any other block is rendered as its
/// JSON form so nothing the server returned is silently lost.
pub fn render_content(blocks: &[ContentBlock]) -> String {
    let parts: Vec<String> = blocks
        .iter()
        .map(|block| match block {
            ContentBlock::Text(text) => text.text.clone(),
            ContentBlock::Other(value) => value.to_string(),
        })
        .collect();

    let joined = parts.join("\n");
    if joined.is_empty() {
        NO_OUTPUT.to_string()
    } else {
        joined
    }
}
