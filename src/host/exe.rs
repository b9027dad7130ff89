//! Path of the running executable, one implementation per OS family.

use std::path::PathBuf;

use crate::error::Result;

#[cfg(target_os = "linux")]
pub fn executable_path() -> Result<PathBuf> {
    let target = nix::fcntl::readlink("/proc/self/exe")?;
    Ok(PathBuf::from(target))
}

#[cfg(target_os = "macos")]
pub fn executable_path() -> Result<PathBuf> {
    use std::ffi::CStr;
    use std::os::raw::c_char;

    use crate::error::ErrorKind;

    let mut size: u32 = 0;
    // SAFETY: a null buffer with size 0 only reports the required size.
    unsafe { libc::_NSGetExecutablePath(std::ptr::null_mut(), &mut size) };

    let mut buf = vec![0 as c_char; size as usize];
    // SAFETY: buf holds exactly `size` bytes.
    if unsafe { libc::_NSGetExecutablePath(buf.as_mut_ptr(), &mut size) } != 0 {
        return Err(ErrorKind::RangeError);
    }

    // SAFETY: on success the buffer holds a NUL-terminated path.
    let path = unsafe { CStr::from_ptr(buf.as_ptr()) };
    Ok(PathBuf::from(path.to_string_lossy().into_owned()))
}

#[cfg(not(any(target_os = "linux", target_os = "macos")))]
pub fn executable_path() -> Result<PathBuf> {
    Ok(std::env::current_exe()?)
}
