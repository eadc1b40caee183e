//! Remote configuration and network operations: fetch, push, merge of upstream

use std::cell::RefCell;
use std::time::Instant;

use git2::build::CheckoutBuilder;
use git2::{
    Cred, CredentialType, ErrorClass, ErrorCode, FetchOptions, FetchPrune, PushOptions,
    RemoteCallbacks,
};

use super::repo::GitRepo;
use crate::{Error, Result};

/// Credential callbacks are retried by libgit2 on rejection; stop after this many
const MAX_CREDENTIAL_ATTEMPTS: u32 = 3;

/// Whether a push rejection message describes a non-fast-forward update
fn is_non_fast_forward(message: &str) -> bool {
    let message = message.to_ascii_lowercase();
    message.contains("non-fast") || message.contains("fetch first")
}

impl GitRepo {
    /// Make sure remote `name` exists and points at `url`
    pub fn ensure_remote(&self, name: &str, url: &str) -> Result<()> {
        match self.inner().find_remote(name) {
            Ok(remote) => {
                if remote.url() != Some(url) {
                    self.inner().remote_set_url(name, url)?;
                    tracing::info!(path = %self.root().display(), remote = name, url, "Updated remote URL");
                }
            }
            Err(e) if e.code() == ErrorCode::NotFound => {
                self.inner().remote(name, url)?;
                tracing::info!(path = %self.root().display(), remote = name, url, "Created remote");
            }
            Err(e) => return Err(e.into()),
        }
        Ok(())
    }

    /// Whether a remote with this name is configured
    pub fn has_remote(&self, name: &str) -> bool {
        self.inner().find_remote(name).is_ok()
    }

    /// Callbacks shared by fetch and push: credentials and transfer deadline
    fn remote_callbacks<'a>(&self, started: Instant) -> RemoteCallbacks<'a> {
        let mut callbacks = RemoteCallbacks::new();

        let token = self.credentials.token().map(|t| t.to_string());
        let config = self.inner().config().ok();
        let mut attempts = 0u32;
        callbacks.credentials(move |url, username_from_url, allowed| {
            attempts += 1;
            if attempts > MAX_CREDENTIAL_ATTEMPTS {
                return Err(git2::Error::new(
                    ErrorCode::Auth,
                    ErrorClass::Net,
                    format!("credentials for {} were rejected", url),
                ));
            }

            if allowed.contains(CredentialType::SSH_KEY) {
                return Cred::ssh_key_from_agent(username_from_url.unwrap_or("git"));
            }

            if allowed.contains(CredentialType::USER_PASS_PLAINTEXT) {
                if let Some(ref token) = token {
                    return Cred::userpass_plaintext("x-access-token", token);
                }
                if let Some(ref config) = config {
                    if let Ok(cred) = Cred::credential_helper(config, url, username_from_url) {
                        return Ok(cred);
                    }
                }
            }

            Cred::default()
        });

        let timeout = self.network_timeout;
        callbacks.transfer_progress(move |_| started.elapsed() < timeout);

        callbacks
    }

    /// Translate a transport error, reporting an expired deadline as a timeout
    fn transfer_error(&self, operation: String, started: Instant, err: git2::Error) -> Error {
        if started.elapsed() >= self.network_timeout {
            return Error::Timeout {
                operation,
                after: self.network_timeout,
            };
        }
        Error::from(err)
    }

    /// Fetch all branches of a remote, pruning branches deleted there
    pub fn fetch(&self, remote_name: &str) -> Result<()> {
        let mut remote = self.inner().find_remote(remote_name).map_err(|e| {
            Error::Config(format!("Remote '{}' not found: {}", remote_name, e))
        })?;

        let started = Instant::now();
        let mut fetch_options = FetchOptions::new();
        fetch_options
            .remote_callbacks(self.remote_callbacks(started))
            .prune(FetchPrune::On);

        remote
            .fetch(&[] as &[&str], Some(&mut fetch_options), None)
            .map_err(|e| self.transfer_error(format!("fetch from {}", remote_name), started, e))?;

        tracing::debug!(path = %self.root().display(), remote = remote_name, "Fetched");
        Ok(())
    }

    /// Push `branch` to the same-named branch on `remote_name`
    ///
    /// Without `set_upstream`, a branch with no upstream configured fails with
    /// [`Error::MissingUpstream`]. With it, the upstream is recorded after a
    /// successful push. A non-fast-forward rejection is
    /// [`Error::UpstreamConflict`].
    pub fn push(&self, remote_name: &str, branch: &str, set_upstream: bool) -> Result<()> {
        if !set_upstream && !self.has_upstream(branch)? {
            return Err(Error::MissingUpstream(branch.to_string()));
        }

        let mut remote = self.inner().find_remote(remote_name).map_err(|e| {
            Error::Config(format!("Remote '{}' not found: {}", remote_name, e))
        })?;

        let refname = format!("refs/heads/{}", branch);
        let local_oid = self
            .inner()
            .refname_to_id(&refname)
            .map_err(|_| Error::BranchNotFound(branch.to_string()))?;

        let started = Instant::now();
        let rejection: RefCell<Option<String>> = RefCell::new(None);
        {
            let mut callbacks = self.remote_callbacks(started);
            callbacks.push_update_reference(|_, status| {
                if let Some(status) = status {
                    *rejection.borrow_mut() = Some(status.to_string());
                }
                Ok(())
            });

            let mut push_options = PushOptions::new();
            push_options.remote_callbacks(callbacks);

            let refspec = format!("{}:{}", refname, refname);
            remote
                .push(&[refspec], Some(&mut push_options))
                .map_err(|e| {
                    match self.transfer_error(format!("push to {}", remote_name), started, e) {
                        Error::UpstreamConflict { message, .. } => Error::UpstreamConflict {
                            branch: branch.to_string(),
                            message,
                        },
                        Error::Git(message) if is_non_fast_forward(&message) => {
                            Error::UpstreamConflict {
                                branch: branch.to_string(),
                                message,
                            }
                        }
                        other => other,
                    }
                })?;
        }

        if let Some(message) = rejection.into_inner() {
            if is_non_fast_forward(&message) {
                return Err(Error::UpstreamConflict {
                    branch: branch.to_string(),
                    message,
                });
            }
            return Err(Error::Git(format!("Push of '{}' rejected: {}", branch, message)));
        }

        // Mirror the remote state locally, as `git push` does
        self.inner().reference(
            &format!("refs/remotes/{}/{}", remote_name, branch),
            local_oid,
            true,
            "push: update remote-tracking ref",
        )?;

        if set_upstream {
            self.set_upstream_config(branch, remote_name)?;
        }

        tracing::info!(path = %self.root().display(), remote = remote_name, branch, "Pushed");
        Ok(())
    }

    /// Integrate the fetched upstream of `branch` into HEAD
    ///
    /// Fast-forwards when possible, otherwise merges in memory and commits the
    /// result. Conflicts leave the repository untouched and return
    /// [`Error::MergeConflict`].
    pub fn merge_upstream(&self, branch: &str) -> Result<()> {
        let repo = self.inner();
        let upstream = self.upstream_ref(branch)?;

        let upstream_ref = match repo.find_reference(&upstream) {
            Ok(r) => r,
            Err(e) if e.code() == ErrorCode::NotFound => {
                tracing::debug!(branch, upstream, "Upstream has no commits yet, nothing to merge");
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };

        let theirs = repo.reference_to_annotated_commit(&upstream_ref)?;
        let (analysis, _) = repo.merge_analysis(&[&theirs])?;

        if analysis.is_up_to_date() {
            return Ok(());
        }

        let local_ref = format!("refs/heads/{}", branch);
        let their_commit = repo.find_commit(theirs.id())?;

        let mut checkout = CheckoutBuilder::new();
        checkout.safe();

        if analysis.is_fast_forward() || analysis.is_unborn() {
            repo.checkout_tree(their_commit.as_object(), Some(&mut checkout))?;
            repo.reference(&local_ref, their_commit.id(), true, "pull: fast-forward")?;
            repo.set_head(&local_ref)?;
            tracing::info!(path = %self.root().display(), branch, "Fast-forwarded");
            return Ok(());
        }

        let our_commit = repo.head()?.peel_to_commit()?;
        let mut index = repo.merge_commits(&our_commit, &their_commit, None)?;
        if index.has_conflicts() {
            return Err(Error::MergeConflict(format!(
                "'{}' and '{}' touch the same lines; resolve manually",
                branch, upstream
            )));
        }

        let tree_id = index.write_tree_to(repo)?;
        let tree = repo.find_tree(tree_id)?;
        repo.checkout_tree(tree.as_object(), Some(&mut checkout))?;

        let signature = self.signature()?;
        let upstream_short = upstream.trim_start_matches("refs/remotes/");
        let message = format!(
            "Merge remote-tracking branch '{}' into {}",
            upstream_short, branch
        );
        repo.commit(
            Some("HEAD"),
            &signature,
            &signature,
            &message,
            &tree,
            &[&our_commit, &their_commit],
        )?;

        tracing::info!(path = %self.root().display(), branch, "Merged upstream");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::super::repo::test_support::*;
    use super::super::repo::ORIGIN;
    use super::*;
    use std::path::{Path, PathBuf};
    use tempfile::TempDir;

    /// Bare remote plus two working copies sharing it
    struct Fixture {
        _temp: TempDir,
        remote: PathBuf,
        a: GitRepo,
        b_path: PathBuf,
    }

    fn fixture() -> Fixture {
        let temp = TempDir::new().unwrap();
        let remote = temp.path().join("remote.git");
        init_bare(&remote);

        let a_path = temp.path().join("a");
        std::fs::create_dir(&a_path).unwrap();
        init_repo_with_commit(&a_path);
        let a = GitRepo::open(&a_path).unwrap();
        a.ensure_remote(ORIGIN, remote.to_str().unwrap()).unwrap();
        a.push(ORIGIN, "main", true).unwrap();

        let b_path = temp.path().join("b");
        git2::Repository::clone(remote.to_str().unwrap(), &b_path).unwrap();

        Fixture {
            _temp: temp,
            remote,
            a,
            b_path,
        }
    }

    fn commit_in(path: &Path, file: &str, contents: &str) {
        std::fs::write(path.join(file), contents).unwrap();
        let repo = GitRepo::open(path).unwrap();
        repo.commit_all(&format!("edit {}", file)).unwrap();
    }

    #[test]
    fn test_non_fast_forward_detection() {
        assert!(is_non_fast_forward("cannot push non-fastforwardable reference"));
        assert!(is_non_fast_forward("rejected: fetch first"));
        assert!(!is_non_fast_forward("permission denied"));
        // Server-side policy rejections are not history conflicts
        assert!(!is_non_fast_forward("pre-receive hook declined: rejected"));
        assert!(!is_non_fast_forward("rejected: protected branch hook declined"));
    }

    #[test]
    fn test_ensure_remote_updates_url() {
        let f = fixture();
        f.a.ensure_remote(ORIGIN, "https://example.com/other.git").unwrap();
        assert_eq!(
            f.a.remote_url(ORIGIN).as_deref(),
            Some("https://example.com/other.git")
        );
        f.a.ensure_remote(ORIGIN, f.remote.to_str().unwrap()).unwrap();
        assert_eq!(f.a.remote_url(ORIGIN).as_deref(), f.remote.to_str());
    }

    #[test]
    fn test_push_without_upstream_is_missing_upstream() {
        let f = fixture();
        f.a.checkout_new("topic").unwrap();
        let err = f.a.push(ORIGIN, "topic", false).unwrap_err();
        assert!(err.is_retryable());
    }

    #[test]
    fn test_push_diverged_is_upstream_conflict() {
        let f = fixture();
        let b = GitRepo::open(&f.b_path).unwrap();
        commit_in(&f.b_path, "b.txt", "from b");
        b.push(ORIGIN, "main", false).unwrap();

        commit_in(f.a.root(), "a.txt", "from a");
        let err = f.a.push(ORIGIN, "main", false).unwrap_err();
        assert!(matches!(err, Error::UpstreamConflict { ref branch, .. } if branch == "main"));
    }

    #[test]
    fn test_merge_upstream_fast_forward() {
        let f = fixture();
        let b = GitRepo::open(&f.b_path).unwrap();
        commit_in(&f.b_path, "b.txt", "from b");
        b.push(ORIGIN, "main", false).unwrap();

        let before = f.a.head_commit().unwrap();
        f.a.fetch(ORIGIN).unwrap();
        f.a.merge_upstream("main").unwrap();

        assert_ne!(f.a.head_commit().unwrap(), before);
        assert_eq!(f.a.head_commit().unwrap(), b.head_commit().unwrap());
        assert!(f.a.root().join("b.txt").exists());
    }

    #[test]
    fn test_merge_upstream_diverged_creates_merge_commit() {
        let f = fixture();
        let b = GitRepo::open(&f.b_path).unwrap();
        commit_in(&f.b_path, "b.txt", "from b");
        b.push(ORIGIN, "main", false).unwrap();
        commit_in(f.a.root(), "a.txt", "from a");

        f.a.fetch(ORIGIN).unwrap();
        f.a.merge_upstream("main").unwrap();

        let head = f.a.inner().head().unwrap().peel_to_commit().unwrap();
        assert_eq!(head.parent_count(), 2);
        assert!(f.a.root().join("a.txt").exists());
        assert!(f.a.root().join("b.txt").exists());
    }

    #[test]
    fn test_merge_upstream_conflict_leaves_head() {
        let f = fixture();
        let b = GitRepo::open(&f.b_path).unwrap();
        commit_in(&f.b_path, "README.md", "theirs\n");
        b.push(ORIGIN, "main", false).unwrap();
        commit_in(f.a.root(), "README.md", "ours\n");

        let before = f.a.head_commit().unwrap();
        f.a.fetch(ORIGIN).unwrap();
        let err = f.a.merge_upstream("main").unwrap_err();

        assert!(matches!(err, Error::MergeConflict(_)));
        assert_eq!(f.a.head_commit().unwrap(), before);
        assert_eq!(
            std::fs::read_to_string(f.a.root().join("README.md")).unwrap(),
            "ours\n"
        );
    }
}
