//! Host platform detection and well-known directories.

pub mod arch;
pub mod paths;

pub use arch::Arch;

/// Whether the current process runs with root privileges.
///
/// OS bootstrap tools (debootstrap, pacstrap, dnf, zypper) need this to
/// create device nodes and set ownership inside the root filesystem.
#[cfg(unix)]
pub fn is_elevated() -> bool {
  rustix::process::geteuid().is_root()
}

#[cfg(not(unix))]
pub fn is_elevated() -> bool {
  false
}
