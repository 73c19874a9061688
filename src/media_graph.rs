// SPDX-License-Identifier: GPL-3.0-only

//! Media Controller graph: entity/pad/link enumeration and link switching
//! (component 4.A).
//!
//! Entity/pad/link field shapes mirror `struct media_v2_entity` /
//! `media_v2_pad` / `media_v2_link` from `<linux/media.h>`. No `bindgen`-based
//! media-controller crate is available, so the ioctl structs are hand-rolled
//! here in the same raw-`libc::ioctl` style the rest of this codebase uses
//! for V4L2 access.

use std::fs::{File, OpenOptions};
use std::os::unix::io::AsRawFd;
use std::path::PathBuf;

use tracing::debug;

use crate::errors::MediaGraphError;
use crate::ioctl_util::iowr;

const MEDIA_IOC_TYPE: u8 = b'|';
const MEDIA_LNK_FL_ENABLED: u32 = 1 << 0;

#[repr(C)]
struct MediaDeviceInfo {
    driver: [u8; 16],
    model: [u8; 32],
    serial: [u8; 40],
    bus_info: [u8; 32],
    media_version: u32,
    hw_revision: u32,
    driver_version: u32,
    reserved: [u32; 31],
}

#[repr(C)]
#[derive(Clone, Copy)]
struct MediaV2Entity {
    id: u32,
    name: [u8; 64],
    function: u32,
    flags: u32,
    reserved: [u32; 4],
}

#[repr(C)]
#[derive(Clone, Copy)]
struct MediaV2Interface {
    id: u32,
    intf_type: u32,
    flags: u32,
    reserved: [u32; 9],
    devnode_major: u32,
    devnode_minor: u32,
    union_pad: [u32; 14],
}

#[repr(C)]
#[derive(Clone, Copy)]
struct MediaV2Pad {
    id: u32,
    entity_id: u32,
    flags: u32,
    index: u32,
    reserved: [u32; 4],
}

#[repr(C)]
#[derive(Clone, Copy)]
struct MediaV2Link {
    id: u32,
    source_id: u32,
    sink_id: u32,
    flags: u32,
    reserved: [u32; 6],
}

#[repr(C)]
struct MediaV2Topology {
    topology_version: u64,
    num_entities: u32,
    ptr_entities: u64,
    num_interfaces: u32,
    ptr_interfaces: u64,
    num_pads: u32,
    ptr_pads: u64,
    num_links: u32,
    ptr_links: u64,
}

#[repr(C)]
#[derive(Clone, Copy, Default)]
struct MediaPadDesc {
    entity: u32,
    index: u16,
    flags: u16,
    reserved: [u32; 2],
}

#[repr(C)]
#[derive(Clone, Copy, Default)]
struct MediaLinkDesc {
    source: MediaPadDesc,
    sink: MediaPadDesc,
    flags: u32,
    reserved: [u32; 2],
}

fn cstr_bytes_to_string(bytes: &[u8]) -> String {
    let len = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    String::from_utf8_lossy(&bytes[..len]).into_owned()
}

/// An entity in the media graph: `{id, name, function}` (3.).
#[derive(Debug, Clone)]
pub struct MediaEntity {
    pub id: u32,
    pub name: String,
    pub function: u32,
}

/// A pad belonging to an entity: `{id, entity_id, index, flags}` (3.).
#[derive(Debug, Clone, Copy)]
pub struct Pad {
    pub id: u32,
    pub entity_id: u32,
    pub index: u32,
    pub flags: u32,
}

/// A link between two pads: `{source_pad, sink_pad, flags}` (3.).
#[derive(Debug, Clone, Copy)]
pub struct Link {
    pub source_pad: u32,
    pub sink_pad: u32,
    pub flags: u32,
}

impl Link {
    pub fn enabled(&self) -> bool {
        self.flags & MEDIA_LNK_FL_ENABLED != 0
    }
}

/// An interface node (typically a devnode) exposed by the graph.
#[derive(Debug, Clone, Copy)]
pub struct Interface {
    pub id: u32,
    pub devnode_major: u32,
    pub devnode_minor: u32,
}

/// A handle onto one `/dev/mediaN` graph with an immutable topology
/// snapshot, taken via `MEDIA_IOC_G_TOPOLOGY` (4.A).
pub struct Device {
    file: File,
    pub entities: Vec<MediaEntity>,
    pub pads: Vec<Pad>,
    pub links: Vec<Link>,
    pub interfaces: Vec<Interface>,
}

impl Device {
    fn query_device_info(file: &File) -> Option<MediaDeviceInfo> {
        let mut info: MediaDeviceInfo = unsafe { std::mem::zeroed() };
        let nr = iowr::<MediaDeviceInfo>(MEDIA_IOC_TYPE, 0x00);
        let rc = unsafe { libc::ioctl(file.as_raw_fd(), nr as _, &mut info as *mut _) };
        if rc < 0 { None } else { Some(info) }
    }

    fn query_topology(&mut self) -> Result<(), MediaGraphError> {
        // First pass: sizes only, second pass: filled buffers. The kernel
        // reports counts back into the same struct, so we query twice:
        // once with null pointers to learn counts, once with buffers sized
        // to match.
        let mut topo: MediaV2Topology = unsafe { std::mem::zeroed() };
        let nr = iowr::<MediaV2Topology>(MEDIA_IOC_TYPE, 0x04);
        let rc = unsafe { libc::ioctl(self.file.as_raw_fd(), nr as _, &mut topo as *mut _) };
        if rc < 0 {
            return Err(MediaGraphError::IoctlFailed {
                name: "MEDIA_IOC_G_TOPOLOGY",
                errno: std::io::Error::last_os_error().raw_os_error().unwrap_or(-1),
            });
        }

        let mut entities = vec![
            MediaV2Entity {
                id: 0,
                name: [0; 64],
                function: 0,
                flags: 0,
                reserved: [0; 4]
            };
            topo.num_entities as usize
        ];
        let mut interfaces = vec![
            MediaV2Interface {
                id: 0,
                intf_type: 0,
                flags: 0,
                reserved: [0; 9],
                devnode_major: 0,
                devnode_minor: 0,
                union_pad: [0; 14],
            };
            topo.num_interfaces as usize
        ];
        let mut pads = vec![
            MediaV2Pad {
                id: 0,
                entity_id: 0,
                flags: 0,
                index: 0,
                reserved: [0; 4]
            };
            topo.num_pads as usize
        ];
        let mut links = vec![
            MediaV2Link {
                id: 0,
                source_id: 0,
                sink_id: 0,
                flags: 0,
                reserved: [0; 6]
            };
            topo.num_links as usize
        ];

        topo.ptr_entities = entities.as_mut_ptr() as u64;
        topo.ptr_interfaces = interfaces.as_mut_ptr() as u64;
        topo.ptr_pads = pads.as_mut_ptr() as u64;
        topo.ptr_links = links.as_mut_ptr() as u64;

        let rc = unsafe { libc::ioctl(self.file.as_raw_fd(), nr as _, &mut topo as *mut _) };
        if rc < 0 {
            return Err(MediaGraphError::IoctlFailed {
                name: "MEDIA_IOC_G_TOPOLOGY",
                errno: std::io::Error::last_os_error().raw_os_error().unwrap_or(-1),
            });
        }

        self.entities = entities
            .iter()
            .map(|e| MediaEntity {
                id: e.id,
                name: cstr_bytes_to_string(&e.name),
                function: e.function,
            })
            .collect();
        self.pads = pads
            .iter()
            .map(|p| Pad {
                id: p.id,
                entity_id: p.entity_id,
                index: p.index,
                flags: p.flags,
            })
            .collect();
        self.links = links
            .iter()
            .map(|l| Link {
                source_pad: l.source_id,
                sink_pad: l.sink_id,
                flags: l.flags,
            })
            .collect();
        self.interfaces = interfaces
            .iter()
            .map(|i| Interface {
                id: i.id,
                devnode_major: i.devnode_major,
                devnode_minor: i.devnode_minor,
            })
            .collect();

        Ok(())
    }

    /// Locate `/dev/mediaN` whose `MEDIA_IOC_DEVICE_INFO` driver field
    /// matches `driver_name`, and snapshot its topology.
    pub fn open_graph(driver_name: &str) -> Result<Device, MediaGraphError> {
        let entries = std::fs::read_dir("/dev").map_err(|_| MediaGraphError::NotFound {
            driver: driver_name.to_string(),
        })?;

        for entry in entries.flatten() {
            let name = entry.file_name();
            let name_str = name.to_string_lossy();
            if !name_str.starts_with("media") {
                continue;
            }
            let path = entry.path();
            let Ok(file) = OpenOptions::new().read(true).write(true).open(&path) else {
                continue;
            };
            let Some(info) = Self::query_device_info(&file) else {
                continue;
            };
            let driver = cstr_bytes_to_string(&info.driver);
            if driver != driver_name {
                continue;
            }

            debug!(path = %path.display(), driver, "opened media graph");
            let mut device = Device {
                file,
                entities: Vec::new(),
                pads: Vec::new(),
                links: Vec::new(),
                interfaces: Vec::new(),
            };
            device.query_topology()?;
            return Ok(device);
        }

        Err(MediaGraphError::NotFound {
            driver: driver_name.to_string(),
        })
    }

    /// Find the first entity whose name contains `name_substring`.
    pub fn find_entity(&self, name_substring: &str) -> Option<&MediaEntity> {
        self.entities.iter().find(|e| e.name.contains(name_substring))
    }

    /// The pads belonging to `entity_id`.
    pub fn pad_of_entity(&self, entity_id: u32) -> Vec<Pad> {
        self.pads
            .iter()
            .copied()
            .filter(|p| p.entity_id == entity_id)
            .collect()
    }

    /// The interface (devnode) linked to `entity_id`, if any.
    pub fn interface_of_entity(&self, entity_id: u32) -> Option<Interface> {
        let pad_ids: Vec<u32> = self.pad_of_entity(entity_id).iter().map(|p| p.id).collect();
        for link in &self.links {
            if pad_ids.contains(&link.sink_pad) || pad_ids.contains(&link.source_pad) {
                for iface in &self.interfaces {
                    if iface.id == link.source_pad || iface.id == link.sink_pad {
                        return Some(*iface);
                    }
                }
            }
        }
        None
    }

    /// Resolve a `(major, minor)` devnode pair to a `/dev/*` path, first via
    /// `/sys/dev/char/<major>:<minor>`, falling back to walking `/dev`.
    pub fn resolve_devnode(major: u32, minor: u32) -> Result<PathBuf, MediaGraphError> {
        let sysfs_link = format!("/sys/dev/char/{major}:{minor}");
        if let Ok(target) = std::fs::read_link(&sysfs_link) {
            if let Some(name) = target.file_name() {
                let candidate = PathBuf::from("/dev").join(name);
                if candidate.exists() {
                    return Ok(candidate);
                }
            }
            // Some drivers expose the uevent file with a DEVNAME entry
            // instead of a friendly symlink target; fall through to the
            // /dev walk in that case.
        }

        let entries = std::fs::read_dir("/dev").map_err(|_| MediaGraphError::DevnodeNotFound {
            major,
            minor,
        })?;
        for entry in entries.flatten() {
            let path = entry.path();
            let Ok(metadata) = entry.metadata() else {
                continue;
            };
            use std::os::unix::fs::MetadataExt;
            if !metadata.file_type().is_char_device() {
                continue;
            }
            let rdev = metadata.rdev();
            let found_major = libc::major(rdev) as u32;
            let found_minor = libc::minor(rdev) as u32;
            if found_major == major && found_minor == minor {
                return Ok(path);
            }
        }

        Err(MediaGraphError::DevnodeNotFound { major, minor })
    }

    /// Issue `MEDIA_IOC_SETUP_LINK` to enable or disable the link between
    /// `src_pad` and `sink_pad`.
    pub fn set_link(
        &mut self,
        src_pad: u32,
        sink_pad: u32,
        enabled: bool,
    ) -> Result<(), MediaGraphError> {
        let src = self
            .pads
            .iter()
            .find(|p| p.id == src_pad)
            .ok_or(MediaGraphError::EntityNotFound {
                name: format!("pad {src_pad}"),
            })?;
        let sink = self
            .pads
            .iter()
            .find(|p| p.id == sink_pad)
            .ok_or(MediaGraphError::EntityNotFound {
                name: format!("pad {sink_pad}"),
            })?;

        let mut desc = MediaLinkDesc {
            source: MediaPadDesc {
                entity: src.entity_id,
                index: src.index as u16,
                flags: 0,
                reserved: [0; 2],
            },
            sink: MediaPadDesc {
                entity: sink.entity_id,
                index: sink.index as u16,
                flags: 0,
                reserved: [0; 2],
            },
            flags: if enabled { MEDIA_LNK_FL_ENABLED } else { 0 },
            reserved: [0; 2],
        };

        let nr = iowr::<MediaLinkDesc>(MEDIA_IOC_TYPE, 0x03);
        let rc = unsafe { libc::ioctl(self.file.as_raw_fd(), nr as _, &mut desc as *mut _) };
        if rc < 0 {
            return Err(MediaGraphError::IoctlFailed {
                name: "MEDIA_IOC_SETUP_LINK",
                errno: std::io::Error::last_os_error().raw_os_error().unwrap_or(-1),
            });
        }

        if let Some(link) = self
            .links
            .iter_mut()
            .find(|l| l.source_pad == src_pad && l.sink_pad == sink_pad)
        {
            link.flags = if enabled {
                link.flags | MEDIA_LNK_FL_ENABLED
            } else {
                link.flags & !MEDIA_LNK_FL_ENABLED
            };
        }

        debug!(src_pad, sink_pad, enabled, "set_link");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn link_enabled_reflects_flag_bit() {
        let enabled = Link {
            source_pad: 1,
            sink_pad: 2,
            flags: MEDIA_LNK_FL_ENABLED,
        };
        let disabled = Link {
            source_pad: 1,
            sink_pad: 2,
            flags: 0,
        };
        assert!(enabled.enabled());
        assert!(!disabled.enabled());
    }

    #[test]
    fn cstr_bytes_to_string_stops_at_nul() {
        let mut buf = [0u8; 16];
        buf[..5].copy_from_slice(b"ov564");
        assert_eq!(cstr_bytes_to_string(&buf), "ov564");
    }
}
