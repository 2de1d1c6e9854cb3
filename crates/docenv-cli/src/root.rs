use docenv_core::paths;
use std::path::{Path, PathBuf};

/// Resolve the documentation project root.
///
/// Priority:
/// 1. `--root` flag / `DOCENV_ROOT` env var (passed in as `explicit`)
/// 2. Walk upward from `cwd` looking for `.docenv.yaml`
/// 3. Walk upward from `cwd` looking for `mkdocs.yml`
/// 4. Fall back to `cwd`
pub fn resolve_root(explicit: Option<&Path>) -> PathBuf {
    if let Some(p) = explicit {
        return p.to_path_buf();
    }

    let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
    find_upward(&cwd, paths::PROJECT_CONFIG_FILE)
        .or_else(|| find_upward(&cwd, paths::MANIFEST_FILE))
        .unwrap_or(cwd)
}

fn find_upward(start: &Path, marker: &str) -> Option<PathBuf> {
    start
        .ancestors()
        .find(|dir| dir.join(marker).is_file())
        .map(Path::to_path_buf)
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
    fn finds_manifest_above_subdir() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("mkdocs.yml"), "site_name: x\n").unwrap();
        let subdir = dir.path().join("docs/guide");
        std::fs::create_dir_all(&subdir).unwrap();

        assert_eq!(find_upward(&subdir, "mkdocs.yml").unwrap(), dir.path());
    }

    #[test]
    fn project_config_marks_root() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join(".docenv.yaml"), "").unwrap();
        let subdir = dir.path().join("docs");
        std::fs::create_dir_all(&subdir).unwrap();

        assert_eq!(find_upward(&subdir, ".docenv.yaml").unwrap(), dir.path());
        assert!(find_upward(&subdir, "mkdocs.yml").is_none());
    }
}
