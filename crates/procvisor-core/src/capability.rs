//! Credential and capability switching for namespace-entering helpers.
//!
//! A helper acts on behalf of a container process: it adopts the caller's
//! filesystem credentials so the kernel's DAC checks apply as they would to
//! the caller, then raises exactly the DAC-bypass capabilities the request
//! asks for.

use nix::unistd::{Gid, Uid, setfsgid, setfsuid};
use procvisor_common::error::{ProcvisorError, Result};

/// Linux capabilities a helper may be asked to raise or drop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    /// Bypass file read, write, and execute permission checks.
    DacOverride,
    /// Bypass file read and directory read/search permission checks.
    DacReadSearch,
}

impl Capability {
    /// Kernel capability number.
    #[must_use]
    pub const fn number(self) -> u32 {
        match self {
            Self::DacOverride => 1,
            Self::DacReadSearch => 2,
        }
    }
}

const LINUX_CAPABILITY_VERSION_3: u32 = 0x2008_0522;

#[repr(C)]
struct CapUserHeader {
    version: u32,
    pid: libc::c_int,
}

#[repr(C)]
#[derive(Debug, Default, Clone, Copy)]
struct CapUserData {
    effective: u32,
    permitted: u32,
    inheritable: u32,
}

fn capget() -> Result<[CapUserData; 2]> {
    let mut header = CapUserHeader {
        version: LINUX_CAPABILITY_VERSION_3,
        pid: 0,
    };
    let mut data = [CapUserData::default(); 2];
    // SAFETY: header and data are valid, properly sized `_LINUX_CAPABILITY_VERSION_3`
    // structures that outlive the call; pid 0 targets the calling thread.
    let rc = unsafe {
        libc::syscall(
            libc::SYS_capget,
            &raw mut header,
            data.as_mut_ptr(),
        )
    };
    if rc != 0 {
        return Err(ProcvisorError::PermissionDenied {
            message: format!("capget failed: {}", std::io::Error::last_os_error()),
        });
    }
    Ok(data)
}

fn capset(data: &[CapUserData; 2]) -> Result<()> {
    let mut header = CapUserHeader {
        version: LINUX_CAPABILITY_VERSION_3,
        pid: 0,
    };
    // SAFETY: same layout guarantees as in `capget`; the kernel only reads `data`.
    let rc = unsafe { libc::syscall(libc::SYS_capset, &raw mut header, data.as_ptr()) };
    if rc != 0 {
        return Err(ProcvisorError::PermissionDenied {
            message: format!("capset failed: {}", std::io::Error::last_os_error()),
        });
    }
    Ok(())
}

const fn slot(cap: Capability) -> (usize, u32) {
    let number = cap.number();
    ((number / 32) as usize, 1 << (number % 32))
}

/// Returns whether `cap` is in the calling thread's effective set.
///
/// # Errors
///
/// Returns an error if `capget(2)` fails.
pub fn has_effective(cap: Capability) -> Result<bool> {
    let data = capget()?;
    let (index, bit) = slot(cap);
    Ok(data[index].effective & bit != 0)
}

/// Raises (`enable = true`) or lowers the given capabilities in the calling
/// thread's effective set.
///
/// Raising only succeeds for capabilities still in the permitted set.
///
/// # Errors
///
/// Returns an error if `capget(2)`/`capset(2)` fails.
pub fn set_effective(caps: &[Capability], enable: bool) -> Result<()> {
    let mut data = capget()?;
    for &cap in caps {
        let (index, bit) = slot(cap);
        if enable {
            data[index].effective |= bit;
        } else {
            data[index].effective &= !bit;
        }
    }
    capset(&data)?;
    tracing::debug!(?caps, enable, "updated effective capabilities");
    Ok(())
}

/// Switches the filesystem uid/gid of the calling thread.
///
/// Moving the fsuid away from 0 clears the filesystem-related capabilities
/// from the effective set; callers re-raise them with [`set_effective`].
///
/// # Errors
///
/// Returns [`ProcvisorError::PermissionDenied`] if the kernel refused the
/// switch.
pub fn switch_fs_credentials(uid: u32, gid: u32) -> Result<()> {
    // setfsuid/setfsgid report the previous id, never an error; an invalid id
    // (-1) is always refused, which reads back the current value.
    let _previous_gid = setfsgid(Gid::from_raw(gid));
    let current_gid = setfsgid(Gid::from_raw(u32::MAX));
    if current_gid.as_raw() != gid {
        return Err(ProcvisorError::PermissionDenied {
            message: format!("setfsgid({gid}) refused"),
        });
    }

    let _previous_uid = setfsuid(Uid::from_raw(uid));
    let current_uid = setfsuid(Uid::from_raw(u32::MAX));
    if current_uid.as_raw() != uid {
        return Err(ProcvisorError::PermissionDenied {
            message: format!("setfsuid({uid}) refused"),
        });
    }

    tracing::debug!(uid, gid, "switched filesystem credentials");
    Ok(())
}
