//! Command line resolution
//!
//! Run commands come from language definitions as templates such as
//! `python3 {file}`. There is no quoting: every whitespace separated token
//! becomes one argument, verbatim.

use std::path::Path;

/// Placeholder replaced with the script path
pub const FILE_PLACEHOLDER: &str = "{file}";

/// Substitute `{file}` in `template` with `script`
pub fn resolve_template(template: &str, script: &Path) -> String {
    template.replace(FILE_PLACEHOLDER, &script.to_string_lossy())
}

/// Split a command line into program and arguments
pub fn tokenize(command: &str) -> Vec<String> {
    command.split_whitespace().map(str::to_string).collect()
}
