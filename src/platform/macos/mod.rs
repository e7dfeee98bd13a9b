mod capture;
mod event_tap;
mod ffi;
mod workspace;

use std::path::Path;
use std::process::Command;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc, Weak};
use std::thread;
use std::time::Duration;

use block2::RcBlock;
use core_foundation::base::TCFType;
use core_foundation::boolean::CFBoolean;
use core_foundation::dictionary::CFDictionary;
use core_foundation::runloop::{kCFRunLoopDefaultMode, CFRunLoop};
use core_foundation::string::CFString;
use log::{debug, error, info};
use objc2::runtime::Bool;
use objc2::{class, msg_send};
use objc2_foundation::NSString;

use self::event_tap::MacInputTap;
use self::ffi::RunLoopHandle;
use self::workspace::WorkspaceSubscription;
use super::{
    ActivationSink, AppIdentity, Capability, CaptureMethod, CapturedImage, InputSink, InputTap,
    Platform, Subscription, TapKind,
};
use crate::error::TrackerError;

// AVMediaTypeVideo
const MEDIA_TYPE_VIDEO: &str = "vide";
// AVAuthorizationStatusAuthorized
const AV_AUTHORIZED: isize = 3;

const MAIN_LOOP_SLICE: Duration = Duration::from_secs(1);

pub struct MacPlatform;

impl MacPlatform {
    pub fn new() -> Self {
        Self
    }
}

impl Platform for MacPlatform {
    fn probe(&self, capability: Capability) -> bool {
        match capability {
            Capability::Accessibility => unsafe { ffi::AXIsProcessTrusted() },
            Capability::InputMonitoring => event_tap::probe_input_monitoring(),
            Capability::Camera => camera_status() == AV_AUTHORIZED,
            Capability::ScreenRecording => unsafe { ffi::CGPreflightScreenCaptureAccess() },
        }
    }

    fn request(&self, capability: Capability) {
        info!("Requesting {capability} permission");
        match capability {
            Capability::Accessibility => {
                let options = CFDictionary::from_CFType_pairs(&[(
                    CFString::new("AXTrustedCheckOptionPrompt"),
                    CFBoolean::true_value(),
                )]);
                unsafe { ffi::AXIsProcessTrustedWithOptions(options.as_concrete_TypeRef()) };
            }
            Capability::InputMonitoring => {
                unsafe { ffi::IOHIDRequestAccess(ffi::IOHID_REQUEST_TYPE_LISTEN_EVENT) };
            }
            Capability::Camera => request_camera_access(),
            Capability::ScreenRecording => {
                unsafe { ffi::CGRequestScreenCaptureAccess() };
            }
        }
    }

    fn install_input_tap(
        &self,
        kind: TapKind,
        sink: Weak<dyn InputSink>,
    ) -> Result<Box<dyn InputTap>, TrackerError> {
        let tap = MacInputTap::install(kind, sink)?;
        Ok(Box::new(tap))
    }

    fn frontmost_app(&self) -> Option<AppIdentity> {
        workspace::frontmost_app()
    }

    fn observe_app_activation(
        &self,
        sink: Weak<dyn ActivationSink>,
    ) -> Result<Box<dyn Subscription>, TrackerError> {
        Ok(Box::new(WorkspaceSubscription::observe(sink)))
    }

    fn capture_screen(&self, method: CaptureMethod) -> Result<CapturedImage, TrackerError> {
        capture::capture(method)
    }

    fn open_folder(&self, path: &Path) -> Result<(), TrackerError> {
        Command::new("open")
            .arg(path)
            .spawn()
            .map(|_| ())
            .map_err(|err| TrackerError::TransientIo(format!("open failed: {err}")))
    }
}

fn camera_status() -> isize {
    let media_type = NSString::from_str(MEDIA_TYPE_VIDEO);
    unsafe { msg_send![class!(AVCaptureDevice), authorizationStatusForMediaType: &*media_type] }
}

fn request_camera_access() {
    let media_type = NSString::from_str(MEDIA_TYPE_VIDEO);
    let handler = RcBlock::new(|granted: Bool| {
        debug!("Camera consent answered: {}", granted.as_bool());
    });
    unsafe {
        let _: () = msg_send![
            class!(AVCaptureDevice),
            requestAccessForMediaType: &*media_type,
            completionHandler: &*handler
        ];
    }
}

/// Run the main thread's run loop (workspace notifications and hotkeys are
/// delivered through it) until `shutdown` fires.
pub fn run_main_loop(shutdown: mpsc::Receiver<()>) {
    let stopped = Arc::new(AtomicBool::new(false));
    let main_loop = RunLoopHandle(CFRunLoop::get_main().as_concrete_TypeRef() as *mut _);

    let stopper = {
        let stopped = Arc::clone(&stopped);
        thread::Builder::new()
            .name("devlapse-main-loop-stopper".into())
            .spawn(move || {
                let _ = shutdown.recv();
                stopped.store(true, Ordering::SeqCst);
                main_loop.stop();
            })
    };
    if let Err(err) = stopper {
        error!("Failed to spawn main loop stopper: {err}");
        return;
    }

    while !stopped.load(Ordering::SeqCst) {
        CFRunLoop::run_in_mode(unsafe { kCFRunLoopDefaultMode }, MAIN_LOOP_SLICE, false);
    }
    debug!("Main run loop exited");
}
