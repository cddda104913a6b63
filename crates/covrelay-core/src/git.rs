//! Repository metadata read straight from the `.git` directory.
//!
//! The on-disk format is parsed directly so the relay does not need a git
//! client in the common case. When the files are ambiguous (detached HEAD,
//! refs that are neither loose nor packed) the `git` executable is invoked
//! in the work tree as a fallback.

use std::path::{Path, PathBuf};
use std::process::Command;

use crate::error::GitError;

/// Name of the version-control metadata directory.
pub const GIT_DIR: &str = ".git";

/// Lines, counting the `[remote "origin"]` header, searched for its `url`.
const REMOTE_URL_LOOKAHEAD: usize = 10;

const HEADS_PREFIX: &str = "refs/heads/";

/// Result type for git helpers.
pub type Result<T> = std::result::Result<T, GitError>;

/// Contents of the `HEAD` file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Head {
    /// `ref: <refname>`, e.g. `refs/heads/main`.
    Symbolic(String),
    /// A raw object id.
    Detached(String),
}

/// A metadata field that could not be resolved, kept for diagnostics.
#[derive(Debug)]
pub struct FieldFailure {
    pub field: &'static str,
    pub error: GitError,
}

/// Whatever could be recovered from a repository.
#[derive(Debug, Default)]
pub struct GitMetadata {
    pub git_dir: PathBuf,
    pub remote_url: Option<String>,
    pub branch: Option<String>,
    pub commit: Option<String>,
    pub failures: Vec<FieldFailure>,
}

/// Walk up from `start` until a directory containing `.git/` is found.
pub fn find_git_dir(start: &Path) -> Result<PathBuf> {
    for dir in start.ancestors() {
        let candidate = dir.join(GIT_DIR);
        if candidate.is_dir() {
            return Ok(candidate);
        }
    }
    Err(GitError::NotARepository {
        start: start.to_path_buf(),
    })
}

/// Read the `origin` remote url from `<git_dir>/config`.
pub fn read_remote_origin(git_dir: &Path) -> Result<String> {
    let config = git_dir.join("config");
    let content = std::fs::read_to_string(&config)?;
    parse_remote_origin(&content).ok_or(GitError::RemoteNotFound { config })
}

fn parse_remote_origin(config: &str) -> Option<String> {
    let lines: Vec<&str> = config.lines().collect();
    for (i, line) in lines.iter().enumerate() {
        if line.trim() != "[remote \"origin\"]" {
            continue;
        }
        let window = lines.iter().take(i + REMOTE_URL_LOOKAHEAD).skip(i + 1);
        for candidate in window {
            if let Some(url) = candidate.trim().strip_prefix("url = ") {
                return Some(url.trim().to_string());
            }
        }
    }
    None
}

/// Parse `<git_dir>/HEAD`. Anything but a `ref:` line is taken as the
/// detached commit id.
pub fn read_head(git_dir: &Path) -> Result<Head> {
    let content = std::fs::read_to_string(git_dir.join("HEAD"))?;
    let content = content.trim();
    if let Some(refname) = content.strip_prefix("ref: ") {
        return Ok(Head::Symbolic(refname.trim().to_string()));
    }
    if content.is_empty() {
        return Err(GitError::HeadUnreadable("HEAD is empty".to_string()));
    }
    Ok(Head::Detached(content.to_string()))
}

/// Resolve a ref name to an object id via its loose file, then `packed-refs`.
pub fn resolve_ref(git_dir: &Path, refname: &str) -> Result<String> {
    match std::fs::read_to_string(git_dir.join(refname)) {
        Ok(content) => {
            let id = content.trim();
            if is_object_id(id) {
                return Ok(id.to_string());
            }
            Err(GitError::HeadUnreadable(format!(
                "{refname} does not hold an object id"
            )))
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            let packed = std::fs::read_to_string(git_dir.join("packed-refs"))?;
            find_packed_ref(&packed, refname).ok_or_else(|| {
                GitError::HeadUnreadable(format!("{refname} is neither loose nor packed"))
            })
        }
        Err(e) => Err(e.into()),
    }
}

fn find_packed_ref(packed: &str, refname: &str) -> Option<String> {
    packed
        .lines()
        .filter(|l| !l.starts_with('#') && !l.starts_with('^'))
        .filter_map(|l| l.split_once(' '))
        .find(|(_, name)| name.trim() == refname)
        .map(|(id, _)| id.to_string())
}

/// Current branch name; falls back to `git rev-parse --abbrev-ref HEAD`.
pub fn current_branch(git_dir: &Path) -> Result<String> {
    if let Ok(Head::Symbolic(refname)) = read_head(git_dir) {
        if let Some(name) = refname.strip_prefix(HEADS_PREFIX) {
            return Ok(name.to_string());
        }
    }
    run_git(work_tree(git_dir), &["rev-parse", "--abbrev-ref", "HEAD"])
}

/// Current commit id; falls back to `git rev-parse HEAD`.
pub fn current_commit(git_dir: &Path) -> Result<String> {
    match read_head(git_dir) {
        Ok(Head::Detached(id)) => return Ok(id),
        Ok(Head::Symbolic(refname)) => {
            if let Ok(id) = resolve_ref(git_dir, &refname) {
                return Ok(id);
            }
        }
        Err(_) => {}
    }
    run_git(work_tree(git_dir), &["rev-parse", "HEAD"])
}

/// Collect remote, branch and commit for the repository enclosing `start`.
///
/// Only a missing `.git` directory is an error; individual fields that
/// cannot be resolved are recorded in [`GitMetadata::failures`].
pub fn inspect(start: &Path) -> Result<GitMetadata> {
    let git_dir = find_git_dir(start)?;
    let mut meta = GitMetadata {
        git_dir: git_dir.clone(),
        ..GitMetadata::default()
    };

    match read_remote_origin(&git_dir) {
        Ok(url) => meta.remote_url = Some(url),
        Err(error) => meta.failures.push(FieldFailure {
            field: "remote",
            error,
        }),
    }
    match current_branch(&git_dir) {
        Ok(branch) => meta.branch = Some(branch),
        Err(error) => meta.failures.push(FieldFailure {
            field: "branch",
            error,
        }),
    }
    match current_commit(&git_dir) {
        Ok(commit) => meta.commit = Some(commit),
        Err(error) => meta.failures.push(FieldFailure {
            field: "commit",
            error,
        }),
    }

    Ok(meta)
}

fn work_tree(git_dir: &Path) -> &Path {
    git_dir.parent().unwrap_or(git_dir)
}

fn is_object_id(s: &str) -> bool {
    matches!(s.len(), 40 | 64) && s.chars().all(|c| c.is_ascii_hexdigit())
}

fn run_git(dir: &Path, args: &[&str]) -> Result<String> {
    let output = Command::new("git").args(args).current_dir(dir).output()?;

    if !output.status.success() {
        return Err(GitError::CommandFailed {
            args: args.join(" "),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }

    let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
    if stdout.is_empty() {
        return Err(GitError::CommandFailed {
            args: args.join(" "),
            stderr: "empty output".to_string(),
        });
    }
    Ok(stdout)
}
