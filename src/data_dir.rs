use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

#[derive(Debug, Clone)]
pub struct DataDir {
    root: PathBuf,
}

impl DataDir {
    /// Resolve the data directory from, in order of priority:
    /// 1. An explicit path (from --data-dir)
    /// 2. The RAGDIGEST_DATA_DIR environment variable
    /// 3. The XDG data directory (~/.local/share/ragdigest/)
    pub fn resolve(explicit: Option<&Path>) -> Result<Self> {
        let root = if let Some(path) = explicit {
            path.to_path_buf()
        } else if let Ok(val) = std::env::var("RAGDIGEST_DATA_DIR") {
            PathBuf::from(val)
        } else {
            xdg::BaseDirectories::with_prefix("ragdigest")
                .get_data_home()
                .ok_or_else(|| {
                    Error::InvalidConfiguration(
                        "could not determine XDG data home directory".into(),
                    )
                })?
        };

        std::fs::create_dir_all(&root)
            .map_err(|_| Error::DataDir(root.clone()))?;

        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The redb database holding every collection.
    pub fn index_db(&self) -> PathBuf {
        self.root.join("index.redb")
    }

    /// Optional JSON config picked up by the CLI when present.
    pub fn config_file(&self) -> PathBuf {
        self.root.join("config.json")
    }
}
