use std::ffi::c_void;

use camino::Utf8Path;

use super::ReferenceModel;
use crate::dylib::Library;
use crate::error::Result;
use crate::regs::RegisterVector;

type InitFn = unsafe extern "C" fn();
type MemcpyFn = unsafe extern "C" fn(u64, *mut c_void, usize);
type GetRegsFn = unsafe extern "C" fn(*mut c_void);
type SetRegsFn = unsafe extern "C" fn(*const c_void);
type ExecFn = unsafe extern "C" fn(u64);
type RaiseIntrFn = unsafe extern "C" fn(u64);
type DisplayFn = unsafe extern "C" fn();

/// A NEMU build exporting the difftest interface, loaded from a shared object.
///
/// The register buffer is an array of 64-bit words in the same slot order as
/// [`RegisterVector`]; the library must be built for the same layout.
pub struct NemuLibrary {
    init: InitFn,
    memcpy_from_dut: MemcpyFn,
    getregs: GetRegsFn,
    setregs: SetRegsFn,
    exec: ExecFn,
    raise_intr: RaiseIntrFn,
    display: Option<DisplayFn>,
    _library: Library,
}

impl NemuLibrary {
    pub fn open(path: &Utf8Path) -> Result<Self> {
        let library = Library::open(path)?;
        // SAFETY: signatures follow the NEMU difftest ABI.
        let nemu = unsafe {
            Self {
                init: library.symbol("difftest_init")?,
                memcpy_from_dut: library.symbol("difftest_memcpy_from_dut")?,
                getregs: library.symbol("difftest_getregs")?,
                setregs: library.symbol("difftest_setregs")?,
                exec: library.symbol("difftest_exec")?,
                raise_intr: library.symbol("difftest_raise_intr")?,
                display: library.symbol("isa_reg_display").ok(),
                _library: library,
            }
        };
        tracing::info!(%path, "loaded reference executor");
        Ok(nemu)
    }
}

impl ReferenceModel for NemuLibrary {
    fn init(&mut self) {
        unsafe { (self.init)() }
    }

    fn memcpy_from_dut(&mut self, addr: u64, bytes: &[u8]) {
        // The reference copies out of the buffer and never writes to it.
        unsafe { (self.memcpy_from_dut)(addr, bytes.as_ptr() as *mut c_void, bytes.len()) }
    }

    fn get_regs(&mut self, regs: &mut RegisterVector) {
        unsafe { (self.getregs)(regs.as_mut_slice().as_mut_ptr().cast()) }
    }

    fn set_regs(&mut self, regs: &RegisterVector) {
        unsafe { (self.setregs)(regs.as_slice().as_ptr().cast()) }
    }

    fn exec(&mut self, n: u64) {
        unsafe { (self.exec)(n) }
    }

    fn raise_intr(&mut self, no: u64) {
        unsafe { (self.raise_intr)(no) }
    }

    fn display(&mut self) {
        if let Some(display) = self.display {
            unsafe { display() }
        }
    }
}
