//! Repository dashboard.
//!
//! Discovers git repositories under a project root, collects per-repo commit
//! activity and working-tree status by shelling out to `git`, adds file and
//! developer statistics plus a hard-coded-credential audit, and writes the
//! result to `dashboard_data.json`.

use crate::error::{OpsError, Result};
use crate::runner::CommandRunner;
use crate::{io, paths};
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Duration;
use walkdir::{DirEntry, WalkDir};

/// Timeout for each individual `git` invocation.
pub const GIT_TIMEOUT: Duration = Duration::from_secs(5);

const SKIP_DIRS: &[&str] = &[".git", "build", "node_modules", ".dart_tool", "target"];
const COUNTED_EXTENSIONS: &[&str] = &["dart", "js", "py", "md", "rs"];
const SOURCE_EXTENSIONS: &[&str] = &["dart", "js", "py", "ts", "rs"];
const ENV_LOOKUPS: &[&str] = &["process.env", "os.getenv", "os.environ", "env::var"];
const KEY_MARKERS: &[&str] = &["AIza", "sk-"];
/// Files larger than this are not read for line counts or the secret audit.
const MAX_READ_BYTES: u64 = 1024 * 1024;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dashboard {
    pub timestamp: DateTime<Utc>,
    pub repos: BTreeMap<String, RepoStats>,
    pub security: SecretAudit,
    pub developers: BTreeMap<String, DeveloperStats>,
    pub summary: DashboardSummary,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RepoStatus {
    Clean,
    Modified,
    #[default]
    Unknown,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LastCommit {
    pub hash: String,
    pub author: String,
    pub email: String,
    pub message: String,
    pub date: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FileStats {
    pub total_files: usize,
    pub by_extension: BTreeMap<String, usize>,
    pub total_lines: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RepoStats {
    pub name: String,
    pub path: PathBuf,
    pub branch: Option<String>,
    pub last_commit: Option<LastCommit>,
    pub commits_today: usize,
    pub commits_week: usize,
    pub files_changed: usize,
    pub status: RepoStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub files: FileStats,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeveloperStats {
    pub commits: usize,
    pub lines_changed: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecretIssue {
    pub file: String,
    pub issue: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecretAudit {
    pub overall: String,
    pub critical: Vec<SecretIssue>,
    pub warnings: Vec<SecretIssue>,
}

impl Default for SecretAudit {
    fn default() -> Self {
        Self {
            overall: "good".to_string(),
            critical: Vec::new(),
            warnings: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DashboardSummary {
    pub total_repos: usize,
    pub active_repos: usize,
    pub total_commits_week: usize,
    pub security_status: String,
    pub developer_count: usize,
}

// ---------------------------------------------------------------------------
// Parsing helpers
// ---------------------------------------------------------------------------

/// Number of non-blank lines.
pub fn count_lines(output: &str) -> usize {
    output.lines().filter(|l| !l.trim().is_empty()).count()
}

/// Parse `git log -1 --format=%H|%an|%ae|%s|%cd` output. The subject may
/// itself contain `|`, so the date is taken from the last field.
pub fn parse_last_commit(output: &str) -> Option<LastCommit> {
    let line = output.lines().find(|l| !l.trim().is_empty())?.trim();
    let fields: Vec<&str> = line.split('|').collect();
    if fields.len() < 5 {
        return None;
    }
    let date = fields[fields.len() - 1];
    let message = fields[3..fields.len() - 1].join("|");
    Some(LastCommit {
        hash: fields[0].chars().take(8).collect(),
        author: fields[1].to_string(),
        email: fields[2].to_string(),
        message,
        date: date.to_string(),
    })
}

static FILES_CHANGED_RE: OnceLock<Regex> = OnceLock::new();

fn files_changed_re() -> &'static Regex {
    FILES_CHANGED_RE.get_or_init(|| Regex::new(r"(\d+) files? changed").unwrap())
}

/// Files-changed count from the summary line of `git diff --stat`.
pub fn parse_files_changed(output: &str) -> usize {
    output
        .lines()
        .rev()
        .find_map(|l| files_changed_re().captures(l))
        .and_then(|c| c[1].parse().ok())
        .unwrap_or(0)
}

/// `git shortlog -sn` lines look like `    42\tJane Doe`.
pub fn parse_shortlog(output: &str) -> Vec<(String, usize)> {
    output
        .lines()
        .filter_map(|l| {
            let (count, name) = l.trim().split_once('\t')?;
            let count = count.trim().parse().ok()?;
            let name = name.trim();
            (!name.is_empty()).then(|| (name.to_string(), count))
        })
        .collect()
}

/// `git log --pretty=format:%an --numstat` alternates an author line with
/// `added\tdeleted\tpath` rows. Binary files report `-` and count as zero.
pub fn parse_numstat(output: &str) -> BTreeMap<String, usize> {
    let mut totals = BTreeMap::new();
    let mut author: Option<String> = None;
    for line in output.lines() {
        if line.trim().is_empty() {
            continue;
        }
        let parts: Vec<&str> = line.split('\t').collect();
        let is_stat = parts.len() == 3
            && parts[..2]
                .iter()
                .all(|p| *p == "-" || p.chars().all(|c| c.is_ascii_digit()));
        if is_stat {
            if let Some(a) = &author {
                let changed: usize = parts[..2].iter().filter_map(|p| p.parse::<usize>().ok()).sum();
                *totals.entry(a.clone()).or_insert(0) += changed;
            }
        } else {
            author = Some(line.trim().to_string());
        }
    }
    totals
}

// ---------------------------------------------------------------------------
// Discovery
// ---------------------------------------------------------------------------

fn git_ok(runner: &dyn CommandRunner, repo: &Path, args: &[&str]) -> Option<String> {
    match runner.run("git", args, Some(repo)) {
        Ok(c) if c.success => Some(c.stdout),
        Ok(_) => None,
        Err(e) => {
            tracing::debug!(repo = %repo.display(), error = %e, "git command failed");
            None
        }
    }
}

fn child_repos(dir: &Path) -> Vec<PathBuf> {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut out: Vec<PathBuf> = entries
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.is_dir() && p.join(".git").exists())
        .collect();
    out.sort();
    out
}

fn dir_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

/// The root itself when it is inside a git work tree, then every direct child
/// of the root and of `<root>/apps` that has a `.git` entry.
pub fn discover_repos(runner: &dyn CommandRunner, root: &Path) -> Vec<(String, PathBuf)> {
    let mut repos: Vec<(String, PathBuf)> = Vec::new();
    if git_ok(runner, root, &["rev-parse", "--git-dir"]).is_some() {
        repos.push((dir_name(root), root.to_path_buf()));
    }
    let candidates = child_repos(root)
        .into_iter()
        .chain(child_repos(&paths::apps_dir(root)));
    for path in candidates {
        let mut name = dir_name(&path);
        if repos.iter().any(|(n, _)| *n == name) {
            name = format!("{}/{}", dir_name(path.parent().unwrap_or(root)), name);
        }
        if !repos.iter().any(|(n, p)| *n == name || *p == path) {
            repos.push((name, path));
        }
    }
    repos
}

// ---------------------------------------------------------------------------
// Collection
// ---------------------------------------------------------------------------

pub fn repo_stats(runner: &dyn CommandRunner, name: &str, path: &Path) -> RepoStats {
    let mut stats = RepoStats {
        name: name.to_string(),
        path: path.to_path_buf(),
        ..Default::default()
    };

    match runner.run(
        "git",
        &["log", "-1", "--format=%H|%an|%ae|%s|%cd", "--date=iso"],
        Some(path),
    ) {
        Ok(c) if c.success => stats.last_commit = parse_last_commit(&c.stdout),
        Ok(_) => {}
        Err(e @ OpsError::Spawn { .. }) => {
            stats.status = RepoStatus::Error;
            stats.error = Some(e.to_string());
            return stats;
        }
        Err(e) => tracing::debug!(repo = name, error = %e, "git log failed"),
    }

    stats.branch = git_ok(runner, path, &["branch", "--show-current"])
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty());
    stats.commits_today = git_ok(runner, path, &["log", "--since=midnight", "--oneline"])
        .map(|s| count_lines(&s))
        .unwrap_or(0);
    stats.commits_week = git_ok(runner, path, &["log", "--since=7 days ago", "--oneline"])
        .map(|s| count_lines(&s))
        .unwrap_or(0);
    stats.files_changed = git_ok(runner, path, &["diff", "--stat"])
        .map(|s| parse_files_changed(&s))
        .unwrap_or(0);
    stats.status = match git_ok(runner, path, &["status", "--porcelain"]) {
        Some(out) if out.trim().is_empty() => RepoStatus::Clean,
        Some(_) => RepoStatus::Modified,
        None => RepoStatus::Unknown,
    };
    stats.files = file_stats(path);
    stats
}

fn not_skipped(entry: &DirEntry) -> bool {
    !(entry.file_type().is_dir()
        && entry.depth() > 0
        && SKIP_DIRS.iter().any(|d| entry.file_name() == *d))
}

fn source_files(root: &Path) -> impl Iterator<Item = DirEntry> {
    WalkDir::new(root)
        .into_iter()
        .filter_entry(not_skipped)
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
}

fn extension(entry: &DirEntry) -> Option<String> {
    entry
        .path()
        .extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase())
}

fn read_small(entry: &DirEntry) -> Option<String> {
    let len = entry.metadata().ok()?.len();
    if len > MAX_READ_BYTES {
        return None;
    }
    std::fs::read_to_string(entry.path()).ok()
}

pub fn file_stats(root: &Path) -> FileStats {
    let mut stats = FileStats::default();
    for entry in source_files(root) {
        stats.total_files += 1;
        let Some(ext) = extension(&entry) else {
            continue;
        };
        if !COUNTED_EXTENSIONS.contains(&ext.as_str()) {
            continue;
        }
        *stats.by_extension.entry(ext).or_insert(0) += 1;
        if let Some(text) = read_small(&entry) {
            stats.total_lines += text.lines().count();
        }
    }
    stats
}

/// Classify one source file. Returns `(critical, warning)` issue texts.
pub fn audit_source(text: &str) -> (Option<&'static str>, Option<&'static str>) {
    let uses_env = ENV_LOOKUPS.iter().any(|m| text.contains(m));
    if uses_env {
        return (None, None);
    }
    let critical = KEY_MARKERS
        .iter()
        .any(|m| text.contains(m))
        .then_some("possible hard-coded API key");
    let warning = (text.to_lowercase().contains("password") && text.contains('='))
        .then_some("password assignment without environment lookup");
    (critical, warning)
}

pub fn secret_audit(root: &Path, repos: &[(String, PathBuf)]) -> SecretAudit {
    let mut audit = SecretAudit::default();
    // The root repo contains the child repos; audit each file once.
    let mut seen: HashSet<PathBuf> = HashSet::new();
    for (_, repo) in repos {
        for entry in source_files(repo) {
            if !seen.insert(entry.path().to_path_buf()) {
                continue;
            }
            let is_source = extension(&entry).is_some_and(|e| SOURCE_EXTENSIONS.contains(&e.as_str()));
            if !is_source {
                continue;
            }
            let Some(text) = read_small(&entry) else {
                continue;
            };
            let file = entry
                .path()
                .strip_prefix(root)
                .unwrap_or(entry.path())
                .display()
                .to_string();
            let (critical, warning) = audit_source(&text);
            if let Some(issue) = critical {
                audit.critical.push(SecretIssue {
                    file: file.clone(),
                    issue: issue.to_string(),
                });
            }
            if let Some(issue) = warning {
                audit.warnings.push(SecretIssue {
                    file,
                    issue: issue.to_string(),
                });
            }
        }
    }
    if !audit.critical.is_empty() {
        audit.overall = "critical".to_string();
    }
    audit
}

pub fn developer_stats(
    runner: &dyn CommandRunner,
    repos: &[(String, PathBuf)],
) -> BTreeMap<String, DeveloperStats> {
    let mut devs: BTreeMap<String, DeveloperStats> = BTreeMap::new();
    for (_, path) in repos {
        if let Some(out) = git_ok(runner, path, &["shortlog", "-sn", "--all"]) {
            for (name, commits) in parse_shortlog(&out) {
                devs.entry(name).or_default().commits += commits;
            }
        }
        if let Some(out) = git_ok(runner, path, &["log", "--all", "--pretty=format:%an", "--numstat"]) {
            for (name, lines) in parse_numstat(&out) {
                devs.entry(name).or_default().lines_changed += lines;
            }
        }
    }
    devs
}

/// Collect everything. Never fails: per-repo problems are recorded on the
/// repo's `status`/`error` fields.
pub fn generate(runner: &dyn CommandRunner, root: &Path) -> Dashboard {
    let discovered = discover_repos(runner, root);
    tracing::debug!(count = discovered.len(), "discovered repositories");

    let repos: BTreeMap<String, RepoStats> = discovered
        .iter()
        .map(|(name, path)| (name.clone(), repo_stats(runner, name, path)))
        .collect();
    let security = secret_audit(root, &discovered);
    let developers = developer_stats(runner, &discovered);

    let summary = DashboardSummary {
        total_repos: repos.len(),
        active_repos: repos.values().filter(|r| r.commits_today > 0).count(),
        total_commits_week: repos.values().map(|r| r.commits_week).sum(),
        security_status: security.overall.clone(),
        developer_count: developers.len(),
    };

    Dashboard {
        timestamp: Utc::now(),
        repos,
        security,
        developers,
        summary,
    }
}

/// Write `dashboard_data.json` under `root` and return its path.
pub fn save(root: &Path, dashboard: &Dashboard) -> Result<PathBuf> {
    let path = paths::dashboard_path(root);
    io::write_json(&path, dashboard)?;
    tracing::info!(path = %path.display(), "dashboard written");
    Ok(path)
}

pub fn load(root: &Path) -> Option<Dashboard> {
    io::read_json_or_none(&paths::dashboard_path(root))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::ScriptedRunner;
    use tempfile::TempDir;

    fn scripted() -> ScriptedRunner {
        ScriptedRunner::new()
            .with_failure("git rev-parse --git-dir")
            .with(
                "git log -1 --format=%H|%an|%ae|%s|%cd --date=iso",
                "0123456789abcdef|Ada|ada@example.com|fix: a|b|2024-05-01 10:00:00 +0200\n",
            )
            .with("git branch --show-current", "main\n")
            .with("git log --since=midnight --oneline", "abc1 one\nabc2 two\n\n")
            .with(
                "git log --since=7 days ago --oneline",
                "abc1 one\nabc2 two\nabc3 three\n",
            )
            .with(
                "git diff --stat",
                " src/a.rs | 2 +-\n src/b.rs | 4 ++--\n 2 files changed, 3 insertions(+), 3 deletions(-)\n",
            )
            .with("git status --porcelain", " M src/a.rs\n")
            .with("git shortlog -sn --all", "    12\tAda\n     3\tGrace\n")
            .with(
                "git log --all --pretty=format:%an --numstat",
                "Ada\n10\t2\tsrc/a.rs\n-\t-\tlogo.png\n\nGrace\n1\t1\tREADME.md\n",
            )
    }

    fn project() -> TempDir {
        let dir = TempDir::new().unwrap();
        for repo in ["api", "apps/mobile"] {
            let p = dir.path().join(repo);
            std::fs::create_dir_all(p.join(".git")).unwrap();
            std::fs::write(p.join("main.py"), "print('hi')\nprint('there')\n").unwrap();
        }
        std::fs::create_dir_all(dir.path().join("notes")).unwrap();
        dir
    }

    #[test]
    fn count_lines_ignores_blanks() {
        assert_eq!(count_lines(""), 0);
        assert_eq!(count_lines("a\n\n  \nb\n"), 2);
    }

    #[test]
    fn last_commit_keeps_pipes_in_subject() {
        let c = parse_last_commit("0123456789abcdef|Ada|a@x|fix: a|b|2024-05-01\n").unwrap();
        assert_eq!(c.hash, "01234567");
        assert_eq!(c.message, "fix: a|b");
        assert_eq!(c.date, "2024-05-01");
        assert!(parse_last_commit("garbage").is_none());
    }

    #[test]
    fn files_changed_from_stat_summary() {
        assert_eq!(parse_files_changed(" 1 file changed, 1 insertion(+)\n"), 1);
        assert_eq!(parse_files_changed(""), 0);
    }

    #[test]
    fn numstat_sums_per_author() {
        let totals = parse_numstat("Ada\n10\t2\ta\n-\t-\tbin\nGrace\n1\t1\tb\nAda\n5\t0\tc\n");
        assert_eq!(totals["Ada"], 17);
        assert_eq!(totals["Grace"], 2);
    }

    #[test]
    fn discovers_children_and_apps() {
        let dir = project();
        let repos = discover_repos(&scripted(), dir.path());
        let names: Vec<&str> = repos.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, vec!["api", "mobile"]);
    }

    #[test]
    fn generate_collects_repo_stats() {
        let dir = project();
        let d = generate(&scripted(), dir.path());
        let api = &d.repos["api"];
        assert_eq!(api.branch.as_deref(), Some("main"));
        assert_eq!(api.commits_today, 2);
        assert_eq!(api.commits_week, 3);
        assert_eq!(api.files_changed, 2);
        assert_eq!(api.status, RepoStatus::Modified);
        assert_eq!(api.last_commit.as_ref().unwrap().author, "Ada");
        assert_eq!(api.files.by_extension["py"], 1);
        assert_eq!(api.files.total_lines, 2);

        assert_eq!(d.summary.total_repos, 2);
        assert_eq!(d.summary.active_repos, 2);
        assert_eq!(d.summary.total_commits_week, 6);
        assert_eq!(d.developers["Ada"].commits, 24);
        assert_eq!(d.developers["Ada"].lines_changed, 24);
        assert_eq!(d.summary.security_status, "good");
    }

    #[test]
    fn counts_are_stable_across_runs() {
        let dir = project();
        let runner = scripted();
        let first = generate(&runner, dir.path());
        let second = generate(&runner, dir.path());
        for (name, repo) in &first.repos {
            assert_eq!(repo.commits_today, second.repos[name].commits_today);
            assert_eq!(repo.commits_week, second.repos[name].commits_week);
        }
    }

    #[test]
    fn missing_git_marks_repo_error() {
        let dir = project();
        // No scripted responses: every git call fails to spawn.
        let d = generate(&ScriptedRunner::new(), dir.path());
        let api = &d.repos["api"];
        assert_eq!(api.status, RepoStatus::Error);
        assert!(api.error.is_some());
        assert_eq!(api.commits_today, 0);
    }

    #[test]
    fn failed_status_is_unknown() {
        let dir = project();
        let runner = ScriptedRunner::new()
            .with_failure("git rev-parse --git-dir")
            .with("git log -1 --format=%H|%an|%ae|%s|%cd --date=iso", "")
            .with_failure("git status --porcelain");
        let d = generate(&runner, dir.path());
        assert_eq!(d.repos["api"].status, RepoStatus::Unknown);
    }

    #[test]
    fn secret_audit_flags_literal_keys() {
        let dir = project();
        let api = dir.path().join("api");
        std::fs::write(api.join("keys.js"), "const k = 'AIzaSyExample';\n").unwrap();
        std::fs::write(api.join("db.py"), "password = 'hunter2'\n").unwrap();
        std::fs::write(
            api.join("ok.py"),
            "import os\nkey = os.getenv('KEY')  # sk-\n",
        )
        .unwrap();
        let repos = discover_repos(&scripted(), dir.path());
        let audit = secret_audit(dir.path(), &repos);
        assert_eq!(audit.overall, "critical");
        assert_eq!(audit.critical.len(), 1);
        assert!(audit.critical[0].file.ends_with("keys.js"));
        assert_eq!(audit.warnings.len(), 1);
    }

    #[test]
    fn file_stats_skips_build_dirs() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("node_modules/x")).unwrap();
        std::fs::write(dir.path().join("node_modules/x/index.js"), "x\n").unwrap();
        std::fs::write(dir.path().join("lib.rs"), "fn a() {}\n").unwrap();
        let stats = file_stats(dir.path());
        assert_eq!(stats.total_files, 1);
        assert_eq!(stats.by_extension.get("js"), None);
        assert_eq!(stats.by_extension["rs"], 1);
    }

    #[test]
    fn save_and_load() {
        let dir = project();
        let d = generate(&scripted(), dir.path());
        let path = save(dir.path(), &d).unwrap();
        assert!(path.ends_with("dashboard_data.json"));
        assert_eq!(load(dir.path()).unwrap(), d);
    }
}
