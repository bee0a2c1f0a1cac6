//! Scratch script files
//!
//! The code of a run is written to a temporary file that the interpreter
//! executes. The file is removed when the `ScriptFile` is dropped.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use tempfile::{Builder, TempPath};

/// Stem used when the script has no file name of its own
pub const DEFAULT_STEM: &str = "untitled";

/// Default scratch directory: `<os temp>/runpane`
pub fn default_dir() -> PathBuf {
    std::env::temp_dir().join("runpane")
}

/// A script written to disk for one run
#[derive(Debug)]
pub struct ScriptFile {
    path: TempPath,
}

impl ScriptFile {
    /// Write `content` to `<dir>/<stem>_<random>.<extension>`
    pub fn create(dir: &Path, stem: &str, extension: &str, content: &str) -> io::Result<Self> {
        fs::create_dir_all(dir)?;

        let prefix = format!("{}_", if stem.is_empty() { DEFAULT_STEM } else { stem });
        let suffix = format!(".{}", extension.trim_start_matches('.'));
        let mut file = Builder::new()
            .prefix(&prefix)
            .suffix(&suffix)
            .tempfile_in(dir)?;

        file.write_all(content.as_bytes())?;
        file.flush()?;

        // Close our handle, keep delete-on-drop
        Ok(Self {
            path: file.into_temp_path(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Directory the script lives in, used as the working directory
    pub fn dir(&self) -> &Path {
        self.path.parent().unwrap_or_else(|| Path::new("."))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_and_delete_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let scratch = dir.path().join("scratch");
        let script = ScriptFile::create(&scratch, "hello", "kts", "println(\"hi\")").unwrap();

        let path = script.path().to_path_buf();
        let name = path.file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with("hello_"));
        assert!(name.ends_with(".kts"));
        assert_eq!(script.dir(), scratch.as_path());
        assert_eq!(fs::read_to_string(&path).unwrap(), "println(\"hi\")");

        drop(script);
        assert!(!path.exists());
    }

    #[test]
    fn test_empty_stem_and_dotted_extension() {
        let dir = tempfile::tempdir().unwrap();
        let script = ScriptFile::create(dir.path(), "", ".py", "").unwrap();
        let name = script.path().file_name().unwrap().to_string_lossy().to_string();

        assert!(name.starts_with("untitled_"));
        assert!(name.ends_with(".py"));
        assert!(!name.ends_with("..py"));
    }
}
