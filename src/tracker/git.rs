use anyhow::{Context, Result};
use git2::{IndexAddOption, Repository, Signature, Status, StatusOptions};
use std::path::{Path, PathBuf};

pub struct GitTracker {
    repo: Repository,
}

impl GitTracker {
    pub fn new(project_dir: &Path) -> Result<Self> {
        let repo = Repository::open(project_dir).context("Failed to open git repository")?;
        Ok(Self { repo })
    }

    /// Open the repository at `project_dir`, or `None` when it is not a git work tree.
    pub fn try_open(project_dir: &Path) -> Option<Self> {
        Repository::open(project_dir).ok().map(|repo| Self { repo })
    }

    fn workdir(&self) -> Result<&Path> {
        self.repo
            .workdir()
            .context("Repository has no working directory")
    }

    /// Paths (relative to the work tree) with uncommitted changes, untracked included.
    pub fn changed_paths(&self) -> Result<Vec<PathBuf>> {
        let mut opts = StatusOptions::new();
        opts.include_untracked(true)
            .recurse_untracked_dirs(true)
            .include_ignored(false);
        let statuses = self
            .repo
            .statuses(Some(&mut opts))
            .context("Failed to read git status")?;

        let mut paths: Vec<PathBuf> = statuses
            .iter()
            .filter(|entry| entry.status() != Status::CURRENT && !entry.status().is_ignored())
            .filter_map(|entry| entry.path().map(PathBuf::from))
            .collect();
        paths.sort();
        paths.dedup();
        Ok(paths)
    }

    /// Changed paths outside the given work-tree-relative prefixes.
    pub fn dirty_paths_excluding(&self, excluded: &[PathBuf]) -> Result<Vec<PathBuf>> {
        Ok(self
            .changed_paths()?
            .into_iter()
            .filter(|path| !excluded.iter().any(|prefix| path.starts_with(prefix)))
            .collect())
    }

    /// Express `path` relative to the work tree, if it lies inside it.
    pub fn relative_to_workdir(&self, path: &Path) -> Result<Option<PathBuf>> {
        let workdir = self.workdir()?.canonicalize().context("Failed to resolve work tree")?;
        let absolute = match path.canonicalize() {
            Ok(p) => p,
            Err(_) => return Ok(None),
        };
        Ok(absolute.strip_prefix(&workdir).ok().map(Path::to_path_buf))
    }

    /// Stage everything under `dir` and commit it with `message`.
    ///
    /// Returns `None` when `dir` has nothing to commit.
    pub fn commit_dir(&self, dir: &Path, message: &str) -> Result<Option<String>> {
        let relative = self
            .relative_to_workdir(dir)?
            .with_context(|| format!("{} is not inside the git work tree", dir.display()))?;
        let pattern = format!("{}/*", relative.to_string_lossy().replace('\\', "/"));

        let mut index = self.repo.index()?;
        index.add_all([pattern.as_str()].iter(), IndexAddOption::DEFAULT, None)?;
        index.update_all([pattern.as_str()].iter(), None)?;
        index.write()?;

        let tree_id = index.write_tree()?;
        let parent = self.get_head_commit();
        if let Some(parent) = &parent
            && parent.tree_id() == tree_id
        {
            return Ok(None);
        }
        let tree = self.repo.find_tree(tree_id)?;

        let sig = self
            .repo
            .signature()
            .or_else(|_| Signature::now("changeflow", "changeflow@localhost"))?;

        // Handle unborn branch (new repo with no commits yet)
        let parents: Vec<&git2::Commit<'_>> = parent.iter().collect();
        let commit_id = self
            .repo
            .commit(Some("HEAD"), &sig, &sig, message, &tree, &parents)?;
        Ok(Some(commit_id.to_string()))
    }

    /// Get the HEAD commit if it exists (returns None for unborn branches)
    fn get_head_commit(&self) -> Option<git2::Commit<'_>> {
        self.repo
            .head()
            .ok()
            .and_then(|head| head.peel_to_commit().ok())
    }

    /// Get current HEAD SHA (returns None for unborn branches)
    pub fn head_sha(&self) -> Option<String> {
        self.get_head_commit().map(|c| c.id().to_string())
    }

    /// Message of the HEAD commit.
    pub fn head_message(&self) -> Option<String> {
        self.get_head_commit()
            .and_then(|c| c.message().map(str::to_string))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn setup_repo() -> (GitTracker, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let repo = Repository::init(dir.path()).unwrap();
        let mut config = repo.config().unwrap();
        config.set_str("user.name", "test").unwrap();
        config.set_str("user.email", "test@test.com").unwrap();
        drop(config);
        let tracker = GitTracker::new(dir.path()).unwrap();
        (tracker, dir)
    }

    fn commit_all(dir: &Path, msg: &str) {
        let repo = Repository::open(dir).unwrap();
        let mut index = repo.index().unwrap();
        index
            .add_all(["*"].iter(), IndexAddOption::DEFAULT, None)
            .unwrap();
        index.write().unwrap();
        let tree_id = index.write_tree().unwrap();
        let tree = repo.find_tree(tree_id).unwrap();
        let sig = Signature::now("test", "test@test.com").unwrap();
        if let Ok(head) = repo.head() {
            let parent = head.peel_to_commit().unwrap();
            repo.commit(Some("HEAD"), &sig, &sig, msg, &tree, &[&parent])
                .unwrap();
        } else {
            repo.commit(Some("HEAD"), &sig, &sig, msg, &tree, &[])
                .unwrap();
        }
    }

    #[test]
    fn test_changed_paths_lists_untracked_and_modified() {
        let (tracker, dir) = setup_repo();
        fs::write(dir.path().join("a.txt"), "one").unwrap();
        commit_all(dir.path(), "init");
        assert!(tracker.changed_paths().unwrap().is_empty());

        fs::write(dir.path().join("a.txt"), "two").unwrap();
        fs::create_dir_all(dir.path().join("docs")).unwrap();
        fs::write(dir.path().join("docs/new.md"), "x").unwrap();
        let paths = tracker.changed_paths().unwrap();
        assert_eq!(paths, vec![PathBuf::from("a.txt"), PathBuf::from("docs/new.md")]);
    }

    #[test]
    fn test_dirty_paths_excluding_prefixes() {
        let (tracker, dir) = setup_repo();
        fs::create_dir_all(dir.path().join("changes/x")).unwrap();
        fs::write(dir.path().join("changes/x/proposal.md"), "p").unwrap();
        fs::write(dir.path().join("main.rs"), "fn main() {}").unwrap();
        let dirty = tracker
            .dirty_paths_excluding(&[PathBuf::from("changes")])
            .unwrap();
        assert_eq!(dirty, vec![PathBuf::from("main.rs")]);
    }

    #[test]
    fn test_commit_dir_commits_only_that_dir() {
        let (tracker, dir) = setup_repo();
        assert!(tracker.head_sha().is_none());
        let change_dir = dir.path().join("changes/add-login");
        fs::create_dir_all(&change_dir).unwrap();
        fs::write(change_dir.join("proposal.md"), "# Proposal").unwrap();
        fs::write(dir.path().join("unrelated.txt"), "leave me").unwrap();

        let sha = tracker
            .commit_dir(&change_dir, "docs(add-login): add proposal")
            .unwrap()
            .unwrap();
        assert_eq!(sha.len(), 40);
        assert_eq!(
            tracker.head_message().unwrap(),
            "docs(add-login): add proposal"
        );
        // unrelated file stays uncommitted
        assert_eq!(
            tracker.changed_paths().unwrap(),
            vec![PathBuf::from("unrelated.txt")]
        );
        // nothing new to commit
        assert!(tracker.commit_dir(&change_dir, "chore: noop").unwrap().is_none());
    }

    #[test]
    fn test_try_open_outside_repo() {
        let dir = tempdir().unwrap();
        assert!(GitTracker::try_open(dir.path()).is_none());
    }
}
