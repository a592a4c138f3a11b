//! DRM render node access.
//!
//! A render node (`/dev/dri/renderD128` and friends) gives an unprivileged
//! process shared access to a GPU for compute and offscreen rendering.
//! Opening it read/write is the permission check; the file then stays open
//! for as long as the [`RenderNode`] lives.  The kernel exposes the node's
//! PCI identity under sysfs, which is what ties the node to one of the
//! adapters the graphics stack enumerates.

use std::fs::{self, File, OpenOptions};
use std::os::unix::fs::FileTypeExt;
use std::path::{Path, PathBuf};

use crate::error::{ComputeError, Result};

const SYSFS_DRM_CLASS: &str = "/sys/class/drm";

/// An open render node.
///
/// The file descriptor is held but never used for ioctls; wgpu opens the
/// device on its own.
#[derive(Debug)]
pub struct RenderNode {
    path: PathBuf,
    identity: NodeIdentity,
    // Held open for the lifetime of the session; closed on drop.
    _file: File,
}

impl RenderNode {
    /// Open the device node at `path` for reading and writing.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&path)
            .map_err(|source| ComputeError::OpenNode {
                path: path.clone(),
                source,
            })?;

        let metadata = file.metadata().map_err(|source| ComputeError::OpenNode {
            path: path.clone(),
            source,
        })?;
        if !metadata.file_type().is_char_device() {
            return Err(ComputeError::NotADevice(path));
        }

        let identity = match sysfs_device_dir(&path) {
            Some(dir) => NodeIdentity::from_sysfs(&dir),
            None => NodeIdentity::default(),
        };
        log::info!("opened render node {} ({identity})", path.display());

        Ok(Self {
            path,
            identity,
            _file: file,
        })
    }

    /// The path the node was opened from, as given.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// PCI identity read from sysfs when the node was opened.
    pub fn identity(&self) -> &NodeIdentity {
        &self.identity
    }
}

/// Hardware identity of a render node as reported by sysfs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodeIdentity {
    /// PCI vendor id, `None` for non-PCI (platform) devices.
    pub vendor: Option<u32>,
    /// PCI device id.
    pub device: Option<u32>,
    /// Kernel driver bound to the device, e.g. `i915` or `amdgpu`.
    pub driver: Option<String>,
}

/// How well an adapter corresponds to a render node.  Ordered from worst
/// to best.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Affinity {
    Mismatch,
    /// The node carries no ids, so any adapter may be it.
    Unknown,
    /// Same vendor; the adapter does not report a device id.
    Vendor,
    Exact,
}

impl NodeIdentity {
    /// Read the identity from a sysfs device directory such as
    /// `/sys/class/drm/renderD128/device`.
    pub fn from_sysfs(dir: &Path) -> Self {
        let read_id = |name: &str| {
            fs::read_to_string(dir.join(name))
                .ok()
                .and_then(|text| parse_pci_id(&text))
        };
        let driver = fs::read_link(dir.join("driver"))
            .ok()
            .and_then(|link| link.file_name().map(|n| n.to_string_lossy().into_owned()));

        Self {
            vendor: read_id("vendor"),
            device: read_id("device"),
            driver,
        }
    }

    /// Compare against an adapter's reported PCI ids.
    pub fn affinity(&self, vendor: u32, device: u32) -> Affinity {
        match (self.vendor, self.device) {
            (Some(v), Some(d)) if v == vendor && d == device => Affinity::Exact,
            (Some(v), None) if v == vendor => Affinity::Vendor,
            (Some(v), _) if v == vendor && device == 0 => Affinity::Vendor,
            (Some(_), _) => Affinity::Mismatch,
            (None, _) => Affinity::Unknown,
        }
    }
}

impl std::fmt::Display for NodeIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (self.vendor, self.device) {
            (Some(v), Some(d)) => write!(f, "pci {v:04x}:{d:04x}")?,
            (Some(v), None) => write!(f, "pci {v:04x}:????")?,
            _ => write!(f, "no pci id")?,
        }
        if let Some(driver) = &self.driver {
            write!(f, ", driver {driver}")?;
        }
        Ok(())
    }
}

/// Parse a sysfs id file such as `0x8086\n`.
pub(crate) fn parse_pci_id(text: &str) -> Option<u32> {
    let text = text.trim();
    let hex = text
        .strip_prefix("0x")
        .or_else(|| text.strip_prefix("0X"))
        .unwrap_or(text);
    u32::from_str_radix(hex, 16).ok()
}

/// `/dev/dri/by-path/...` entries are symlinks, so resolve before taking
/// the node name.
fn sysfs_device_dir(path: &Path) -> Option<PathBuf> {
    let resolved = fs::canonicalize(path).ok()?;
    let name = resolved.file_name()?;
    Some(Path::new(SYSFS_DRM_CLASS).join(name).join("device"))
}
