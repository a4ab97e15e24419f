//! Fixtures for tests that need a remote

use std::path::Path;

use tempfile::TempDir;

/// An empty bare repository whose HEAD names `master`
pub(crate) fn bare_remote() -> (TempDir, String) {
    let dir = TempDir::new().unwrap();
    let repo = git2::Repository::init_bare(dir.path()).unwrap();
    repo.set_head("refs/heads/master").unwrap();
    let url = dir.path().to_str().unwrap().to_string();
    (dir, url)
}

/// Push a commit adding `path` to `branch` on the remote at `url`
pub(crate) fn seed_remote(url: &str, branch: &str, path: &str, content: &[u8]) {
    let work = TempDir::new().unwrap();
    let repo = git2::Repository::init(work.path()).unwrap();
    let remote_ref = format!("refs/heads/{}", branch);

    let mut remote = repo.remote("origin", url).unwrap();
    let parent_oid = {
        let refspec = format!("+{}:refs/remotes/origin/{}", remote_ref, branch);
        remote.fetch(&[&refspec], None, None).unwrap();
        repo.find_reference(&format!("refs/remotes/origin/{}", branch))
            .ok()
            .and_then(|r| r.target())
    };

    let file = work.path().join(path);
    if let Some(parent) = file.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(&file, content).unwrap();

    let mut index = repo.index().unwrap();
    if let Some(oid) = parent_oid {
        let parent = repo.find_commit(oid).unwrap();
        index.read_tree(&parent.tree().unwrap()).unwrap();
    }
    index.add_path(Path::new(path)).unwrap();
    let tree = repo.find_tree(index.write_tree().unwrap()).unwrap();

    let sig = git2::Signature::now("Seeder", "seed@example.com").unwrap();
    let parents: Vec<git2::Commit<'_>> = parent_oid
        .map(|oid| repo.find_commit(oid).unwrap())
        .into_iter()
        .collect();
    let parent_refs: Vec<&git2::Commit<'_>> = parents.iter().collect();
    repo.commit(Some(&remote_ref), &sig, &sig, "seed", &tree, &parent_refs)
        .unwrap();

    remote
        .push(&[&format!("{}:{}", remote_ref, remote_ref)], None)
        .unwrap();
}
