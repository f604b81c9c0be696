// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::path::{Component, Path};

/// Closed list of shell fragments no tool will execute.  Matching is plain
/// substring search over the candidate command or source code.
const DESTRUCTIVE_PATTERNS: &[&str] = &[
    "rm -rf /",
    "rm -fr /",
    "mkfs",
    "dd of=/dev/",
    "> /dev/sda",
    "shutdown",
    "reboot",
    "halt -f",
    "chmod -R 777 /",
    ":(){ :|:& };:",
    ":(){:|:&};:",
    "subprocess.call(\"rm",
    "subprocess.call('rm",
    "os.system(\"rm",
    "os.system('rm",
];

/// Path components the file manager refuses to touch, regardless of depth.
const IGNORED_COMPONENTS: &[&str] = &[
    "node_modules",
    ".git",
    "target",
    "dist",
    "build",
    "out",
    "__pycache__",
    ".venv",
    "venv",
    ".idea",
    ".vscode",
];

/// Exact file names the file manager refuses to touch.
const IGNORED_FILES: &[&str] = &[
    "package-lock.json",
    "yarn.lock",
    "pnpm-lock.yaml",
    "Cargo.lock",
    ".DS_Store",
];

/// Bytes sampled from the head of a file for the binary heuristic.
const BINARY_SAMPLE_BYTES: usize = 8 * 1024;

/// Fraction of non-printable bytes above which content counts as binary.
const BINARY_CONTROL_RATIO: f64 = 0.3;

/// Return the first destructive fragment found in `input`, if any.
pub fn find_destructive(input: &str) -> Option<&'static str> {
    DESTRUCTIVE_PATTERNS.iter().copied().find(|p| input.contains(p))
}

/// Validate a tool-supplied path: must be relative and must not escape the
/// working directory through `..` segments.
pub fn validate_relative(path: &str) -> Result<(), String> {
    let p = Path::new(path);
    if p.is_absolute() {
        return Err(format!("absolute paths are not allowed: {path}"));
    }
    for comp in p.components() {
        if matches!(comp, Component::ParentDir) {
            return Err(format!("path escapes the working directory: {path}"));
        }
    }
    Ok(())
}

/// True when any path component (or the file name) is on the ignore list.
/// `extra` adds user-configured components to the built-in set.
pub fn is_ignored(path: &str, extra: &[String]) -> bool {
    let p = Path::new(path);
    for comp in p.components() {
        let Component::Normal(os) = comp else { continue };
        let Some(name) = os.to_str() else { continue };
        if IGNORED_COMPONENTS.contains(&name)
            || IGNORED_FILES.contains(&name)
            || name.starts_with(".env")
            || extra.iter().any(|e| e == name)
        {
            return true;
        }
    }
    false
}

/// Heuristic binary detection over a content sample: a NUL byte, or a
/// non-printable ratio above 30%, marks the content as binary.
pub fn is_binary(content: &[u8]) -> bool {
    let sample = &content[..content.len().min(BINARY_SAMPLE_BYTES)];
    if sample.is_empty() {
        return false;
    }
    if sample.contains(&0) {
        return true;
    }
    let control = sample
        .iter()
        .filter(|&&b| b < 0x09 || (0x0E..0x20).contains(&b) || b == 0x7F)
        .count();
    (control as f64 / sample.len() as f64) > BINARY_CONTROL_RATIO
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    // ── Destructive patterns ──────────────────────────────────────────────────

    #[test]
    fn rm_rf_root_is_blocked() {
        assert_eq!(find_destructive("rm -rf / --no-preserve-root"), Some("rm -rf /"));
    }

    #[test]
    fn fork_bomb_is_blocked() {
        assert!(find_destructive("echo hi; :(){ :|:& };:").is_some());
        assert!(find_destructive(":(){:|:&};:").is_some());
    }

    #[test]
    fn python_escape_shapes_are_blocked() {
        assert!(find_destructive(r#"subprocess.call("rm -rf ~")"#).is_some());
        assert!(find_destructive("os.system('rm -rf .')").is_some());
    }

    #[test]
    fn ordinary_commands_pass() {
        for cmd in ["ls -la", "cargo test", "rm build.log", "git status"] {
            assert_eq!(find_destructive(cmd), None, "{cmd} must pass");
        }
    }

    #[test]
    fn shutdown_is_blocked() {
        assert!(find_destructive("sudo shutdown -h now").is_some());
    }

    // ── Path validation ───────────────────────────────────────────────────────

    #[test]
    fn relative_paths_pass() {
        assert!(validate_relative("src/main.rs").is_ok());
        assert!(validate_relative("./notes.txt").is_ok());
    }

    #[test]
    fn absolute_paths_are_rejected() {
        assert!(validate_relative("/etc/passwd").is_err());
    }

    #[test]
    fn parent_escapes_are_rejected() {
        assert!(validate_relative("../secrets").is_err());
        assert!(validate_relative("src/../../etc/passwd").is_err());
    }

    // ── Ignore set ────────────────────────────────────────────────────────────

    #[test]
    fn ignored_directories_match_at_any_depth() {
        assert!(is_ignored("node_modules/lodash/index.js", &[]));
        assert!(is_ignored("src/vendor/.git/config", &[]));
        assert!(is_ignored("target/debug/app", &[]));
    }

    #[test]
    fn lockfiles_and_env_files_are_ignored() {
        assert!(is_ignored("Cargo.lock", &[]));
        assert!(is_ignored(".env", &[]));
        assert!(is_ignored("config/.env.production", &[]));
    }

    #[test]
    fn ordinary_source_paths_are_not_ignored() {
        assert!(!is_ignored("src/main.rs", &[]));
        assert!(!is_ignored("docs/environment.md", &[]));
    }

    #[test]
    fn extra_components_extend_the_set() {
        let extra = vec!["generated".to_string()];
        assert!(is_ignored("generated/schema.rs", &extra));
        assert!(!is_ignored("generated2/schema.rs", &extra));
    }

    // ── Binary heuristic ──────────────────────────────────────────────────────

    #[test]
    fn nul_byte_marks_binary() {
        assert!(is_binary(b"ELF\x00\x01\x02"));
    }

    #[test]
    fn plain_text_is_not_binary() {
        assert!(!is_binary(b"fn main() {\n    println!(\"hi\");\n}\n"));
    }

    #[test]
    fn empty_content_is_not_binary() {
        assert!(!is_binary(b""));
    }

    #[test]
    fn control_heavy_content_is_binary() {
        let noisy: Vec<u8> = (0..100).map(|i| if i % 2 == 0 { 0x01 } else { b'a' }).collect();
        assert!(is_binary(&noisy));
    }

    #[test]
    fn tabs_and_newlines_do_not_count_as_control_noise() {
        let text = b"a\tb\nc\rd\te\nf".repeat(10);
        assert!(!is_binary(&text));
    }
}
