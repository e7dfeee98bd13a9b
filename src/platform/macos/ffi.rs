//! Raw framework entry points not wrapped by the core-graphics / core-foundation crates.

use std::ffi::c_void;

use core_foundation::dictionary::CFDictionaryRef;
use core_foundation::mach_port::CFMachPortRef;

#[link(name = "CoreGraphics", kind = "framework")]
extern "C" {
    pub fn CGEventTapEnable(tap: CFMachPortRef, enable: bool);
    pub fn CGEventTapIsEnabled(tap: CFMachPortRef) -> bool;
    pub fn CGPreflightScreenCaptureAccess() -> bool;
    pub fn CGRequestScreenCaptureAccess() -> bool;
}

#[link(name = "CoreFoundation", kind = "framework")]
extern "C" {
    pub fn CFMachPortInvalidate(port: CFMachPortRef);
    pub fn CFRunLoopStop(run_loop: *mut c_void);
}

#[link(name = "ApplicationServices", kind = "framework")]
extern "C" {
    pub fn AXIsProcessTrusted() -> bool;
    pub fn AXIsProcessTrustedWithOptions(options: CFDictionaryRef) -> bool;
}

// kIOHIDRequestTypeListenEvent
pub const IOHID_REQUEST_TYPE_LISTEN_EVENT: u32 = 1;

#[link(name = "IOKit", kind = "framework")]
extern "C" {
    pub fn IOHIDRequestAccess(request_type: u32) -> bool;
}

// AVCaptureDevice lives here; linked so the class is registered with the runtime.
#[link(name = "AVFoundation", kind = "framework")]
extern "C" {}

/// A run loop reference that may be stopped from another thread. `CFRunLoopStop`
/// is documented as thread-safe; nothing else is done through this handle.
#[derive(Clone, Copy)]
pub struct RunLoopHandle(pub *mut c_void);

unsafe impl Send for RunLoopHandle {}

impl RunLoopHandle {
    pub fn stop(&self) {
        unsafe { CFRunLoopStop(self.0) }
    }
}
