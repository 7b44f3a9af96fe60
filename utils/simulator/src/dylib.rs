use std::ffi::{CStr, CString, c_void};
use std::ptr::NonNull;

use camino::{Utf8Path, Utf8PathBuf};

use crate::error::{HarnessError, Result};

/// A shared object opened with `dlopen`, closed on drop.
pub struct Library {
    handle: NonNull<c_void>,
    path: Utf8PathBuf,
}

impl Library {
    pub fn open(path: &Utf8Path) -> Result<Self> {
        let c_path = CString::new(path.as_str()).map_err(|e| HarnessError::Library {
            path: path.to_owned(),
            reason: e.to_string(),
        })?;

        let handle = unsafe { libc::dlopen(c_path.as_ptr(), libc::RTLD_LAZY | libc::RTLD_LOCAL) };
        let handle = NonNull::new(handle).ok_or_else(|| HarnessError::Library {
            path: path.to_owned(),
            reason: last_dl_error(),
        })?;

        tracing::debug!(%path, "opened shared library");
        Ok(Self {
            handle,
            path: path.to_owned(),
        })
    }

    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    /// Resolves `name` as a value of type `T`.
    ///
    /// # Safety
    ///
    /// `T` must be a pointer-sized type (normally an `extern "C"` function
    /// pointer) matching the actual signature of the exported symbol.
    pub unsafe fn symbol<T: Copy>(&self, name: &str) -> Result<T> {
        assert_eq!(
            std::mem::size_of::<T>(),
            std::mem::size_of::<*mut c_void>(),
            "symbol type must be pointer sized"
        );

        let c_name = CString::new(name).map_err(|e| HarnessError::Library {
            path: self.path.clone(),
            reason: e.to_string(),
        })?;
        let ptr = unsafe { libc::dlsym(self.handle.as_ptr(), c_name.as_ptr()) };
        if ptr.is_null() {
            return Err(HarnessError::Library {
                path: self.path.clone(),
                reason: format!("undefined symbol `{name}`"),
            });
        }
        Ok(unsafe { std::mem::transmute_copy::<*mut c_void, T>(&ptr) })
    }
}

impl Drop for Library {
    fn drop(&mut self) {
        unsafe {
            libc::dlclose(self.handle.as_ptr());
        }
    }
}

fn last_dl_error() -> String {
    let err = unsafe { libc::dlerror() };
    if err.is_null() {
        "unknown dlopen failure".to_owned()
    } else {
        unsafe { CStr::from_ptr(err) }.to_string_lossy().into_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_library_reports_path() {
        let err = Library::open(Utf8Path::new("/nonexistent/libdut.so"))
            .err()
            .expect("open must fail");
        match err {
            HarnessError::Library { path, .. } => assert_eq!(path, "/nonexistent/libdut.so"),
            other => panic!("unexpected error: {other}"),
        }
    }
}
