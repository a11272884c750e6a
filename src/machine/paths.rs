//! Guest <-> host path mapping
//!
//! Guest paths look like `volume:dir/file`. A volume (or assign) name is
//! mapped to a host directory through the machine config. Paths without
//! a volume are relative to the host's current directory.

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;

/// Path mapping errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathError {
    /// Volume or assign is not configured
    UnknownVolume(String),
    /// Path tries to leave its volume
    Escapes(String),
}

impl fmt::Display for PathError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PathError::UnknownVolume(v) => write!(f, "unknown volume or assign: {}:", v),
            PathError::Escapes(p) => write!(f, "path leaves its volume: {}", p),
        }
    }
}

impl std::error::Error for PathError {}

#[derive(Debug, Clone, Default)]
pub struct PathManager {
    /// Lower-cased volume name to host directory
    assigns: HashMap<String, PathBuf>,
}

impl PathManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_assigns(assigns: &HashMap<String, String>) -> Self {
        let mut paths = Self::new();
        for (name, dir) in assigns {
            paths.add_assign(name, dir);
        }
        paths
    }

    /// Volume names are case insensitive, like on the guest
    pub fn add_assign(&mut self, name: &str, host_dir: &str) {
        self.assigns
            .insert(name.to_ascii_lowercase(), PathBuf::from(host_dir));
    }

    pub fn has_assign(&self, name: &str) -> bool {
        self.assigns.contains_key(&name.to_ascii_lowercase())
    }

    /// Base name of a guest path: everything after the last `/` or `:`
    pub fn ami_name_of_path(&self, path: &str) -> String {
        let start = path.rfind(['/', ':']).map(|i| i + 1).unwrap_or(0);
        path[start..].to_string()
    }

    /// Map a guest path to the host file system
    pub fn ami_to_sys_path(&self, path: &str) -> Result<PathBuf, PathError> {
        let (base, rest) = match path.split_once(':') {
            Some((volume, rest)) => {
                let dir = self
                    .assigns
                    .get(&volume.to_ascii_lowercase())
                    .ok_or_else(|| PathError::UnknownVolume(volume.to_string()))?;
                (dir.clone(), rest)
            }
            None => (PathBuf::new(), path),
        };

        let mut host = base;
        for part in rest.split('/').filter(|p| !p.is_empty()) {
            // host parent references would climb out of the volume
            if part == ".." {
                return Err(PathError::Escapes(path.to_string()));
            }
            host.push(part);
        }
        Ok(host)
    }
}
