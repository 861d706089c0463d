use std::path::{Path, PathBuf};

/// Name of the agent CLI binary.
pub const AGENT_BIN: &str = "claude";

/// Versioned extension install prefix used by editor-bundled copies of the
/// CLI, e.g. `~/.vscode/extensions/anthropic.claude-code-1.2.3/`.
const EXTENSION_PREFIX: &str = "anthropic.claude-code-";

/// Path of the bundled binary inside a versioned extension directory.
const EXTENSION_BIN_REL: &str = "resources/native/claude";

/// Locate the agent binary. Checked in order: PATH, editor extension
/// installs (latest version wins), then a fixed list of common install
/// locations. A miss here is a startup-time hard failure for the server,
/// never a per-request error.
pub fn find_agent_binary() -> Option<PathBuf> {
    if let Ok(path) = which::which(AGENT_BIN) {
        return Some(path);
    }

    let home = dirs::home_dir();

    if let Some(home) = &home {
        for extensions_dir in extension_dirs(home) {
            if let Some(bin) = latest_versioned_install(&extensions_dir, EXTENSION_PREFIX) {
                return Some(bin);
            }
        }
    }

    fallback_paths(home.as_deref())
        .into_iter()
        .find(|p| p.is_file())
}

fn extension_dirs(home: &Path) -> Vec<PathBuf> {
    vec![
        home.join(".vscode/extensions"),
        home.join(".vscode-insiders/extensions"),
        home.join(".cursor/extensions"),
    ]
}

fn fallback_paths(home: Option<&Path>) -> Vec<PathBuf> {
    let mut paths = vec![
        PathBuf::from("/usr/local/bin").join(AGENT_BIN),
        PathBuf::from("/opt/homebrew/bin").join(AGENT_BIN),
    ];
    if let Some(home) = home {
        paths.push(home.join(".local/bin").join(AGENT_BIN));
        paths.push(home.join(".claude/local").join(AGENT_BIN));
    }
    paths
}

/// Scan `extensions_dir` for `{prefix}<version>` directories and return the
/// bundled binary from the lexicographically-latest one that actually
/// contains it.
fn latest_versioned_install(extensions_dir: &Path, prefix: &str) -> Option<PathBuf> {
    let entries = std::fs::read_dir(extensions_dir).ok()?;

    let mut versions: Vec<PathBuf> = entries
        .flatten()
        .map(|e| e.path())
        .filter(|p| {
            p.is_dir()
                && p.file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.starts_with(prefix))
        })
        .collect();

    versions.sort();

    versions
        .into_iter()
        .rev()
        .map(|dir| dir.join(EXTENSION_BIN_REL))
        .find(|bin| bin.is_file())
}
