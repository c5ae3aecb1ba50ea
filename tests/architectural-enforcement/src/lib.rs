//! Architectural Enforcement
//!
//! Source scans that keep the workspace honest:
//! - Production code never blocks the runtime with `std::thread::sleep`
//! - Library and daemon code reports through `tracing`, not stdout/stderr
//! - Production code propagates errors instead of panicking
//! - The core crate stays free of server and terminal concerns
//!
//! The scans live in `tests/`; this library holds the shared walking code.

use std::fs;
use std::path::{Path, PathBuf};

/// Workspace root, resolved from this crate's manifest directory
pub fn workspace_root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("../..")
        .canonicalize()
        .unwrap_or_else(|_| PathBuf::from(concat!(env!("CARGO_MANIFEST_DIR"), "/../..")))
}

/// One offending line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violation {
    /// File the line is in
    pub path: PathBuf,
    /// 1-based line number
    pub line: usize,
    /// The trimmed source line
    pub text: String,
}

impl std::fmt::Display for Violation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{} - {}", self.path.display(), self.line, self.text)
    }
}

/// Every `.rs` file under `dir` (relative to the workspace root)
pub fn rust_files(dir: &str) -> Vec<PathBuf> {
    let path = workspace_root().join(dir);
    assert!(path.exists(), "{} does not exist", path.display());

    walkdir::WalkDir::new(path)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| e.path().extension().and_then(|s| s.to_str()) == Some("rs"))
        .map(|e| e.into_path())
        .collect()
}

/// Production lines of a source file
///
/// Everything from the first `#[cfg(test)]` on is test code, and comments
/// are stripped.
pub fn production_lines(path: &Path) -> Vec<(usize, String)> {
    let Ok(content) = fs::read_to_string(path) else {
        return Vec::new();
    };

    content
        .lines()
        .enumerate()
        .take_while(|(_, line)| !line.trim_start().starts_with("#[cfg(test)]"))
        .filter_map(|(idx, line)| {
            let code = line.split("//").next().unwrap_or(line);
            (!code.trim().is_empty()).then(|| (idx + 1, code.to_string()))
        })
        .collect()
}

/// Scan production code under `dirs` for lines matching `forbidden`
pub fn scan(dirs: &[&str], forbidden: impl Fn(&str) -> bool) -> Vec<Violation> {
    let mut violations = Vec::new();
    for dir in dirs {
        for path in rust_files(dir) {
            for (line, code) in production_lines(&path) {
                if forbidden(&code) {
                    violations.push(Violation {
                        path: path.clone(),
                        line,
                        text: code.trim().to_string(),
                    });
                }
            }
        }
    }
    violations
}

/// Panic with a readable report if `violations` is non-empty
pub fn assert_clean(rule: &str, violations: &[Violation]) {
    if violations.is_empty() {
        return;
    }
    let report: Vec<String> = violations.iter().map(ToString::to_string).collect();
    panic!(
        "\n{rule}: {} violation(s)\n  {}\n",
        violations.len(),
        report.join("\n  ")
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_production_lines_stop_at_test_module() {
        let dir = std::env::temp_dir().join(format!("arch-enforcement-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        let file = dir.join("sample.rs");
        fs::write(
            &file,
            "fn a() {} // trailing\n// only a comment\nfn b() {}\n#[cfg(test)]\nmod tests { fn c() { x.unwrap(); } }\n",
        )
        .unwrap();

        let lines = production_lines(&file);
        fs::remove_dir_all(&dir).unwrap();

        assert_eq!(lines, vec![(1, "fn a() {} ".to_string()), (3, "fn b() {}".to_string())]);
    }

    #[test]
    fn test_workspace_root_contains_members() {
        assert!(workspace_root().join("conductor/core/Cargo.toml").exists());
    }
}
