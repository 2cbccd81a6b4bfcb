//! Git shell-out.
//!
//! Every command runs in the folder that holds the file and is given the
//! bare file name, so the repository is found the way git normally finds it.

use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use tracing::{debug, instrument, warn};

use super::Vcs;
use crate::errors::VcsError;

#[derive(Debug, Clone)]
pub struct GitCli {
    program: PathBuf,
}

impl GitCli {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    /// Split `path` into the directory to run in and the name to pass.
    fn locate(path: &Path) -> Result<(PathBuf, String), VcsError> {
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| VcsError::InvalidPath(path.display().to_string()))?
            .to_string();
        let dir = match path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        Ok((dir, file_name))
    }

    fn run_git_in_dir(&self, dir: &Path, args: &[&str]) -> Result<String, VcsError> {
        let program = self.program.display().to_string();
        let mut cmd = Command::new(&self.program);
        cmd.current_dir(dir)
            .args(args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        debug!(cmd = ?format!("{} {}", program, args.join(" ")), dir = %dir.display(), "running git command");
        let output = cmd.output().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                VcsError::Unavailable(program.clone())
            } else {
                VcsError::IoError(e)
            }
        })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            let exit_code = output.status.code().unwrap_or(-1);
            warn!(exit_code, %stderr, "git command failed");
            return Err(VcsError::CommandFailed {
                program,
                exit_code,
                stderr,
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    fn run_on_file(&self, path: &Path, leading: &[&str]) -> Result<(), VcsError> {
        let (dir, file_name) = Self::locate(path)?;
        let args: Vec<&str> = leading
            .iter()
            .copied()
            .chain(["--", file_name.as_str()])
            .collect();
        self.run_git_in_dir(&dir, &args)?;
        Ok(())
    }
}

impl Vcs for GitCli {
    #[instrument(skip(self), fields(path = %path.display()))]
    fn checkout_ours(&self, path: &Path) -> Result<(), VcsError> {
        self.run_on_file(path, &["checkout", "--ours"])
    }

    #[instrument(skip(self), fields(path = %path.display()))]
    fn checkout_theirs(&self, path: &Path) -> Result<(), VcsError> {
        self.run_on_file(path, &["checkout", "--theirs"])
    }

    #[instrument(skip(self), fields(path = %path.display()))]
    fn mark_as_merged(&self, path: &Path) -> Result<(), VcsError> {
        self.run_on_file(path, &["add"])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_locate_splits_folder_and_name() {
        let (dir, name) = GitCli::locate(Path::new("Assets/Scenes/Main.unity")).unwrap();
        assert_eq!(dir, PathBuf::from("Assets/Scenes"));
        assert_eq!(name, "Main.unity");

        let (dir, name) = GitCli::locate(Path::new("Main.unity")).unwrap();
        assert_eq!(dir, PathBuf::from("."));
        assert_eq!(name, "Main.unity");
    }

    #[test]
    fn test_locate_rejects_bare_root() {
        assert!(matches!(
            GitCli::locate(Path::new("/")),
            Err(VcsError::InvalidPath(_))
        ));
    }

    #[test]
    fn test_missing_binary_is_unavailable() {
        let git = GitCli::new("/nonexistent/bin/git-for-scenemerge");
        let dir = tempfile::tempdir().unwrap();
        let err = git.checkout_ours(&dir.path().join("Main.unity")).unwrap_err();
        assert!(matches!(err, VcsError::Unavailable(_)));
    }
}
