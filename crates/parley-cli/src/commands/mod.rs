pub mod chat;
pub mod user;

use anyhow::{anyhow, Result};
use bat::{PrettyPrinter, WrappingMode};

/// Print `content` with syntax highlighting for `language`
pub fn render(content: &str, language: &str) -> Result<()> {
    PrettyPrinter::new()
        .input_from_bytes(content.as_bytes())
        .language(language)
        .wrapping_mode(WrappingMode::Character)
        .print()
        .map_err(|e| anyhow!("Failed to render output: {}", e))?;
    Ok(())
}
