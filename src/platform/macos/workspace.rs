use std::ptr::NonNull;
use std::sync::Weak;

use block2::RcBlock;
use log::debug;
use objc2::rc::Retained;
use objc2::runtime::{AnyObject, ProtocolObject};
use objc2_app_kit::{
    NSRunningApplication, NSWorkspace, NSWorkspaceApplicationKey,
    NSWorkspaceDidActivateApplicationNotification,
};
use objc2_foundation::{NSNotification, NSObjectProtocol};

use crate::platform::{ActivationSink, AppIdentity, Subscription};

pub fn frontmost_app() -> Option<AppIdentity> {
    unsafe {
        let workspace = NSWorkspace::sharedWorkspace();
        let app = workspace.frontmostApplication()?;
        Some(identity_of(&app))
    }
}

unsafe fn identity_of(app: &NSRunningApplication) -> AppIdentity {
    AppIdentity {
        bundle_id: app.bundleIdentifier().map(|id| id.to_string()),
        pid: app.processIdentifier(),
        name: app.localizedName().map(|name| name.to_string()),
    }
}

/// The app named in an activation notification's payload. The frontmost app
/// is only a fallback: by the time the block runs it may already have changed.
unsafe fn activated_app(notification: &NSNotification) -> Option<AppIdentity> {
    let payload = notification.userInfo().and_then(|info| {
        let key: &AnyObject = NSWorkspaceApplicationKey;
        info.objectForKey(key)
    });
    match payload {
        Some(object) => {
            let app: Retained<NSRunningApplication> = Retained::cast(object);
            Some(identity_of(&app))
        }
        None => frontmost_app(),
    }
}

/// Observer token registered with the shared workspace notification center.
pub struct WorkspaceSubscription {
    observer: Retained<ProtocolObject<dyn NSObjectProtocol>>,
}

// The token is only handed back to `removeObserver:`, which is thread-safe.
unsafe impl Send for WorkspaceSubscription {}

impl WorkspaceSubscription {
    pub fn observe(sink: Weak<dyn ActivationSink>) -> Self {
        let block = RcBlock::new(move |notification: NonNull<NSNotification>| {
            let Some(sink) = sink.upgrade() else {
                return;
            };
            if let Some(app) = unsafe { activated_app(notification.as_ref()) } {
                sink.activated(app);
            }
        });

        let observer = unsafe {
            let center = NSWorkspace::sharedWorkspace().notificationCenter();
            center.addObserverForName_object_queue_usingBlock(
                Some(NSWorkspaceDidActivateApplicationNotification),
                None,
                None,
                &block,
            )
        };
        debug!("Subscribed to workspace app activation notifications");
        Self { observer }
    }
}

impl Subscription for WorkspaceSubscription {}

impl Drop for WorkspaceSubscription {
    fn drop(&mut self) {
        unsafe {
            let center = NSWorkspace::sharedWorkspace().notificationCenter();
            let observer: &AnyObject = (*self.observer).as_ref();
            center.removeObserver(observer);
        }
        debug!("Removed workspace app activation observer");
    }
}
