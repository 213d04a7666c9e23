use std::path::{Path, PathBuf};

/// Resolve the project root.
///
/// Priority:
/// 1. `--root` flag / `OPSDECK_ROOT` env var (passed in as `explicit`)
/// 2. Walk upward from `cwd` looking for a directory with an `apps/` child
///    and a `.git/` entry, i.e. the top of a multi-repo checkout
/// 3. Walk upward from `cwd` looking for `.git/`
/// 4. Fall back to `cwd`
pub fn resolve_root(explicit: Option<&Path>) -> PathBuf {
    if let Some(p) = explicit {
        return p.to_path_buf();
    }
    let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
    find_root(&cwd)
}

fn ancestors_matching(start: &Path, pred: impl Fn(&Path) -> bool) -> Option<PathBuf> {
    start.ancestors().find(|d| pred(d)).map(Path::to_path_buf)
}

pub fn find_root(start: &Path) -> PathBuf {
    ancestors_matching(start, |d| d.join(".git").exists() && d.join("apps").is_dir())
        .or_else(|| ancestors_matching(start, |d| d.join(".git").exists()))
        .unwrap_or_else(|| start.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn explicit_root_wins() {
        let dir = TempDir::new().unwrap();
        let result = resolve_root(Some(dir.path()));
        assert_eq!(result, dir.path());
    }

    #[test]
    fn prefers_multi_repo_top_over_nested_repo() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join(".git")).unwrap();
        let app = dir.path().join("apps/mobile");
        std::fs::create_dir_all(app.join(".git")).unwrap();
        let deep = app.join("lib/src");
        std::fs::create_dir_all(&deep).unwrap();

        assert_eq!(find_root(&deep), dir.path());
    }

    #[test]
    fn nearest_git_dir_otherwise() {
        let dir = TempDir::new().unwrap();
        let repo = dir.path().join("api");
        std::fs::create_dir_all(repo.join(".git")).unwrap();
        std::fs::create_dir_all(repo.join("src")).unwrap();
        assert_eq!(find_root(&repo.join("src")), repo);
    }

    #[test]
    fn falls_back_to_start() {
        let dir = TempDir::new().unwrap();
        // TempDir may live under a git checkout on some machines; only assert
        // when nothing above it is a repository.
        if dir.path().ancestors().all(|d| !d.join(".git").exists()) {
            assert_eq!(find_root(dir.path()), dir.path());
        }
    }
}
