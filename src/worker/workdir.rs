use std::io;
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Per-attempt scratch directory, `<base>/<job id>-<attempt>`.
///
/// A redelivered job can overlap a run that outlived its visibility timeout,
/// so every attempt gets its own directory. Removed by [`WorkDir::remove`]
/// once the job is done; dropping it without calling `remove` deletes it
/// synchronously.
#[derive(Debug)]
pub struct WorkDir {
    root: PathBuf,
    removed: bool,
}

impl WorkDir {
    pub async fn create(base: &Path, job_id: &str) -> io::Result<Self> {
        if !is_safe_component(job_id) {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("job id {job_id:?} is not usable as a directory name"),
            ));
        }

        let root = base.join(format!("{job_id}-{}", Uuid::new_v4().simple()));
        tokio::fs::create_dir_all(root.join("input")).await?;
        Ok(Self {
            root,
            removed: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.root
    }

    /// Where the downloaded source image is stored.
    pub fn input_path(&self, file_name: &str) -> PathBuf {
        self.root.join("input").join(file_name)
    }

    /// Detector project directory; each run writes to `runs/<name>`.
    pub fn runs_dir(&self) -> PathBuf {
        self.root.join("runs")
    }

    pub async fn remove(mut self) -> io::Result<()> {
        self.removed = true;
        match tokio::fs::remove_dir_all(&self.root).await {
            Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
            _ => Ok(()),
        }
    }
}

impl Drop for WorkDir {
    fn drop(&mut self) {
        if !self.removed {
            let _ = std::fs::remove_dir_all(&self.root);
        }
    }
}

fn is_safe_component(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && name != ".."
        && !name.contains(['/', '\\'])
        && !name.contains('\0')
}
