// SPDX-License-Identifier: GPL-3.0-only

//! Shared ioctl-number encoding used by the media-controller and V4L2 raw
//! ioctl modules, avoiding duplicating the same `_IOC`-style arithmetic in
//! both `media_graph.rs` and `sensor.rs`.
//!
//! The kernel defines ioctl numbers via the `_IO`/`_IOR`/`_IOW`/`_IOWR`
//! macros in `include/uapi/asm-generic/ioctl.h`. We replicate that encoding
//! here instead of hand-copying hex literals, so each ioctl's type and
//! payload size stay visible at the call site.

const IOC_NONE: u32 = 0;
const IOC_WRITE: u32 = 1;
const IOC_READ: u32 = 2;

const IOC_NRBITS: u32 = 8;
const IOC_TYPEBITS: u32 = 8;
const IOC_SIZEBITS: u32 = 14;

const IOC_NRSHIFT: u32 = 0;
const IOC_TYPESHIFT: u32 = IOC_NRSHIFT + IOC_NRBITS;
const IOC_SIZESHIFT: u32 = IOC_TYPESHIFT + IOC_TYPEBITS;
const IOC_DIRSHIFT: u32 = IOC_SIZESHIFT + IOC_SIZEBITS;

const fn ioc(dir: u32, ty: u8, nr: u8, size: usize) -> libc::c_ulong {
    ((dir << IOC_DIRSHIFT)
        | ((ty as u32) << IOC_TYPESHIFT)
        | ((nr as u32) << IOC_NRSHIFT)
        | ((size as u32) << IOC_SIZESHIFT)) as libc::c_ulong
}

pub const fn io(ty: u8, nr: u8) -> libc::c_ulong {
    ioc(IOC_NONE, ty, nr, 0)
}

pub const fn ior<T>(ty: u8, nr: u8) -> libc::c_ulong {
    ioc(IOC_READ, ty, nr, std::mem::size_of::<T>())
}

pub const fn iow<T>(ty: u8, nr: u8) -> libc::c_ulong {
    ioc(IOC_WRITE, ty, nr, std::mem::size_of::<T>())
}

pub const fn iowr<T>(ty: u8, nr: u8) -> libc::c_ulong {
    ioc(IOC_READ | IOC_WRITE, ty, nr, std::mem::size_of::<T>())
}

/// Retry an ioctl-issuing closure on `EINTR`, matching the retry discipline
/// required of `set_control`/`get_control` in 4.B.
pub fn retry_eintr<F>(mut f: F) -> libc::c_int
where
    F: FnMut() -> libc::c_int,
{
    loop {
        let rc = f();
        if rc >= 0 {
            return rc;
        }
        if std::io::Error::last_os_error().raw_os_error() == Some(libc::EINTR) {
            continue;
        }
        return rc;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[repr(C)]
    struct Probe {
        _a: u32,
        _b: [u8; 100],
    }

    #[test]
    fn querycap_matches_known_literal() {
        // VIDIOC_QUERYCAP = _IOR('V', 0, struct v4l2_capability), capability
        // struct is 104 bytes; the teacher's v4l2_utils.rs hardcodes this as
        // 0x80685600.
        #[repr(C)]
        struct V4l2Capability {
            driver: [u8; 16],
            card: [u8; 32],
            bus_info: [u8; 32],
            version: u32,
            capabilities: u32,
            device_caps: u32,
            reserved: [u32; 3],
        }
        assert_eq!(ior::<V4l2Capability>(b'V', 0), 0x80685600);
    }

    #[test]
    fn dir_and_size_bits_are_disjoint() {
        let a = ior::<Probe>(b'|', 0x00);
        let b = iow::<Probe>(b'|', 0x00);
        assert_ne!(a, b);
    }
}
