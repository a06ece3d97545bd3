use crate::config::FileError;
use std::fs;
use std::path::{Path, PathBuf};

pub(crate) fn test_or_create_path(path: &Path) -> Result<bool, FileError> {
    let mut current_path = PathBuf::new();
    let mut created = false;
    for comp in path.components() {
        current_path.push(comp);
        let io_error = |e| FileError::Io(current_path.to_string_lossy().to_string(), e);
        match current_path.try_exists() {
            Ok(true) => {}
            Ok(false) => {
                created = true;
                fs::create_dir(&current_path).map_err(io_error)?;
            }
            Err(e) => Err(io_error(e))?,
        }
    }
    Ok(created)
}

pub fn test_or_create_profile(path: &Path) -> Result<bool, FileError> {
    let mut created = test_or_create_path(path)?;
    let profile_path = path.to_path_buf().join("profile.yml");
    let io_error = |e| FileError::Io(profile_path.to_string_lossy().to_string(), e);
    match profile_path.try_exists() {
        Ok(true) => {}
        Ok(false) => {
            created = true;
            fs::write(&profile_path, include_str!("default/profile.yml")).map_err(io_error)?;
        }
        Err(e) => Err(io_error(e))?,
    }
    Ok(created)
}

pub(crate) fn parse_paths(
    config: &Option<PathBuf>,
    app_data: &Option<PathBuf>,
) -> Result<(PathBuf, PathBuf), FileError> {
    let config_path = match config {
        None => {
            let home = PathBuf::from(std::env::var("HOME")?);
            home.join(".config").join("veilconn")
        }
        Some(p) => p.clone(),
    };
    let data_path = match app_data {
        None => {
            let home = PathBuf::from(std::env::var("HOME")?);
            home.join(".local").join("share").join("veilconn")
        }
        Some(p) => p.clone(),
    };
    Ok((config_path, data_path))
}

pub fn control_socket_path(data_path: &Path) -> PathBuf {
    data_path.join("veilconn.sock")
}

/// Well-known locations of the artifacts the local proxy engine reads.
/// The engine treats these as a protocol contract, so they are fixed
/// relative to the data directory.
#[derive(Debug, Clone)]
pub struct ArtifactPaths {
    root: PathBuf,
}

impl ArtifactPaths {
    pub fn new<P: AsRef<Path>>(data_path: P) -> Self {
        Self {
            root: data_path.as_ref().to_path_buf(),
        }
    }

    pub fn general_conf(&self) -> PathBuf {
        self.root.join("general.json")
    }

    pub fn socks_conf(&self) -> PathBuf {
        self.root.join("socks.xml")
    }

    pub fn shadowsocks_conf(&self) -> PathBuf {
        self.root.join("shadowsocks.json")
    }

    pub fn engine_conf_dir(&self) -> PathBuf {
        self.root.join("httpconf")
    }

    pub fn main_conf(&self) -> PathBuf {
        self.root.join("main.conf")
    }

    pub fn user_action(&self) -> PathBuf {
        self.engine_conf_dir().join("user.action")
    }

    pub fn template_dir(&self) -> PathBuf {
        self.root.join("httptemplate")
    }

    pub fn temporary_dir(&self) -> PathBuf {
        self.root.join("httptemporary")
    }

    pub fn log_dir(&self) -> PathBuf {
        self.root.join("log")
    }

    pub fn ensure_layout(&self) -> Result<(), FileError> {
        for dir in [
            self.engine_conf_dir(),
            self.template_dir(),
            self.temporary_dir(),
            self.log_dir(),
        ] {
            test_or_create_path(&dir)?;
        }
        Ok(())
    }
}
