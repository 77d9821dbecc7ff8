//! Output artifact parsing
//!
//! Pipelines publish their output as a flat `KEY=VALUE` file at a
//! well-known path inside the job artifacts.

use std::collections::HashMap;

/// Artifact path downloaded from the job of the step's test stage
pub const OUTPUT_ENV_PATH: &str = "target/output.env";

/// Parser for `KEY=VALUE` artifact text
pub struct ArtifactParser;

impl ArtifactParser {
    /// Parse newline separated `KEY=VALUE` pairs.
    ///
    /// Blank lines, lines without `=` and lines with an empty key are
    /// skipped. Only line terminators are stripped; the value is everything
    /// after the first `=`.
    pub fn parse(text: &str) -> HashMap<String, String> {
        let mut vars = HashMap::new();

        for line in text.split('\n') {
            let line = line.strip_suffix('\r').unwrap_or(line);
            if line.trim().is_empty() {
                continue;
            }
            let Some((key, value)) = line.split_once('=') else {
                continue;
            };
            if key.is_empty() {
                continue;
            }
            vars.insert(key.to_string(), value.to_string());
        }

        vars
    }
}
