use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::path::CasePolicy;
use crate::{
    ArchiveMount, CompressedArchiveMount, MountId, RamDiskMount, VfsError, VfsOptions,
    VirtualFileSystem, ZipArchiveMount,
};

/// Errors from loading or applying a [`VfsConfig`].
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("unknown mount type \"{kind}\" for {point}")]
    UnknownMountType { kind: String, point: String },
    #[error("mount at {point} needs a `source`")]
    MissingSource { point: String },
    #[error("mount at {point}: {source}")]
    Mount {
        point: String,
        #[source]
        source: VfsError,
    },
}

/// Top-level configuration loaded from a TOML file.
///
/// ```toml
/// [vfs]
/// case_sensitive = true
/// implicit_compression = true
///
/// [[mount]]
/// type = "system"
/// point = "/data"
/// source = "./assets"
/// priority = 0
/// ```
#[derive(Debug, Clone, Default, Deserialize)]
pub struct VfsConfig {
    #[serde(default)]
    pub vfs: VfsSection,
    #[serde(default)]
    pub mount: Vec<MountConfig>,
    /// Directory relative mount sources resolve against. Set by
    /// [`VfsConfig::load`] to the config file's directory.
    #[serde(skip)]
    pub base_dir: Option<PathBuf>,
}

/// The `[vfs]` table.
#[derive(Debug, Clone, Deserialize)]
pub struct VfsSection {
    #[serde(default = "default_true")]
    pub case_sensitive: bool,
    #[serde(default)]
    pub implicit_compression: bool,
}

impl Default for VfsSection {
    fn default() -> Self {
        Self {
            case_sensitive: true,
            implicit_compression: false,
        }
    }
}

fn default_true() -> bool {
    true
}

/// A single `[[mount]]` definition.
///
/// The `type` field selects the backing store: `"system"` (default),
/// `"archive"`, `"compressed_archive"`, `"zip"` or `"ramdisk"`. Every type except
/// `ramdisk` needs a `source` path on the host.
#[derive(Debug, Clone, Deserialize)]
pub struct MountConfig {
    #[serde(default = "default_mount_type")]
    pub r#type: String,
    pub point: String,
    pub source: Option<String>,
    #[serde(default)]
    pub priority: i32,
    #[serde(default)]
    pub read_only: bool,
}

fn default_mount_type() -> String {
    "system".into()
}

impl VfsConfig {
    /// Load a config from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config = Self::from_toml_str(&content)?;
        config.base_dir = path.parent().map(Path::to_path_buf);
        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    pub fn options(&self) -> VfsOptions {
        VfsOptions {
            case_policy: if self.vfs.case_sensitive {
                CasePolicy::Sensitive
            } else {
                CasePolicy::Insensitive
            },
            implicit_compression: self.vfs.implicit_compression,
        }
    }

    /// Build a file system with every configured mount.
    pub fn build(&self) -> Result<VirtualFileSystem, ConfigError> {
        let vfs = VirtualFileSystem::with_options(self.options());
        self.apply(&vfs)?;
        Ok(vfs)
    }

    /// Mount every configured store into an existing file system.
    pub fn apply(&self, vfs: &VirtualFileSystem) -> Result<Vec<MountId>, ConfigError> {
        self.mount
            .iter()
            .map(|mount| self.apply_one(vfs, mount))
            .collect()
    }

    fn apply_one(&self, vfs: &VirtualFileSystem, mount: &MountConfig) -> Result<MountId, ConfigError> {
        let point = mount.point.clone();
        let wrap = |source: VfsError| ConfigError::Mount {
            point: point.clone(),
            source,
        };
        let id = match mount.r#type.as_str() {
            "ramdisk" => vfs.mount(&mount.point, RamDiskMount::new(), mount.priority),
            "system" => {
                #[cfg(all(feature = "filesystem", not(target_arch = "wasm32")))]
                {
                    let root = self.source_path(mount)?;
                    let system = crate::SystemMount::new(root).with_read_only(mount.read_only);
                    vfs.mount(&mount.point, system, mount.priority)
                }
                #[cfg(not(all(feature = "filesystem", not(target_arch = "wasm32"))))]
                {
                    Err(VfsError::Unsupported(
                        "system mounts need the `filesystem` feature".into(),
                    ))
                }
            }
            "archive" => {
                let archive = ArchiveMount::open(self.source_path(mount)?).map_err(&wrap)?;
                vfs.mount(&mount.point, archive, mount.priority)
            }
            "compressed_archive" => {
                let archive =
                    CompressedArchiveMount::open(self.source_path(mount)?).map_err(&wrap)?;
                vfs.mount(&mount.point, archive, mount.priority)
            }
            "zip" => {
                let archive = ZipArchiveMount::open(self.source_path(mount)?).map_err(&wrap)?;
                vfs.mount(&mount.point, archive, mount.priority)
            }
            other => {
                return Err(ConfigError::UnknownMountType {
                    kind: other.to_owned(),
                    point: mount.point.clone(),
                });
            }
        }
        .map_err(&wrap)?;
        log::info!(
            "VfsConfig: {} mount at {} (priority {})",
            mount.r#type,
            mount.point,
            mount.priority
        );
        Ok(id)
    }

    fn source_path(&self, mount: &MountConfig) -> Result<PathBuf, ConfigError> {
        let source = mount.source.as_deref().ok_or_else(|| ConfigError::MissingSource {
            point: mount.point.clone(),
        })?;
        let source = Path::new(source);
        Ok(match &self.base_dir {
            Some(base) if source.is_relative() => base.join(source),
            _ => source.to_path_buf(),
        })
    }
}
