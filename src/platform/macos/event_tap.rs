use std::ffi::c_void;
use std::ptr::null_mut;
use std::sync::atomic::{AtomicBool, AtomicPtr, Ordering};
use std::sync::{mpsc, Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use core_foundation::base::TCFType;
use core_foundation::mach_port::CFMachPortRef;
use core_foundation::runloop::{kCFRunLoopCommonModes, kCFRunLoopDefaultMode, CFRunLoop};
use core_graphics::event::{
    CGEvent, CGEventTap, CGEventTapLocation, CGEventTapOptions, CGEventTapPlacement, CGEventType,
    EventField,
};
use log::{debug, error, warn};

use super::ffi::{CFMachPortInvalidate, CGEventTapEnable, CGEventTapIsEnabled, RunLoopHandle};
use crate::error::TrackerError;
use crate::platform::{InputSink, InputTap, MouseButton, RawInputEvent, TapKind};

/// Upper bound on how long the tap thread waits between stop checks.
const RUN_LOOP_SLICE: Duration = Duration::from_millis(250);

/// A listen-only session event tap running on its own thread and run loop.
pub struct MacInputTap {
    kind: TapKind,
    port: Arc<AtomicPtr<c_void>>,
    stopping: Arc<AtomicBool>,
    run_loop: RunLoopHandle,
    thread: Option<JoinHandle<()>>,
}

impl MacInputTap {
    pub fn install(kind: TapKind, sink: Weak<dyn InputSink>) -> Result<Self, TrackerError> {
        let port = Arc::new(AtomicPtr::new(null_mut()));
        let stopping = Arc::new(AtomicBool::new(false));
        let (ready_tx, ready_rx) = mpsc::channel();

        let thread = {
            let port = Arc::clone(&port);
            let stopping = Arc::clone(&stopping);
            thread::Builder::new()
                .name(format!("devlapse-{}", kind.label().replace(' ', "-")))
                .spawn(move || run_tap_thread(kind, sink, port, stopping, ready_tx))
                .map_err(|err| TrackerError::resource(kind.label(), err.to_string()))?
        };

        let run_loop = match ready_rx.recv() {
            Ok(Ok(run_loop)) => run_loop,
            Ok(Err(reason)) => {
                let _ = thread.join();
                return Err(TrackerError::resource(kind.label(), reason));
            }
            Err(_) => {
                let _ = thread.join();
                return Err(TrackerError::resource(
                    kind.label(),
                    "tap thread exited before signaling readiness",
                ));
            }
        };

        debug!("Installed {}", kind.label());
        Ok(Self {
            kind,
            port,
            stopping,
            run_loop,
            thread: Some(thread),
        })
    }
}

impl InputTap for MacInputTap {
    fn kind(&self) -> TapKind {
        self.kind
    }

    fn is_enabled(&self) -> bool {
        let port = self.port.load(Ordering::SeqCst);
        !port.is_null() && unsafe { CGEventTapIsEnabled(port as CFMachPortRef) }
    }
}

impl Drop for MacInputTap {
    fn drop(&mut self) {
        self.stopping.store(true, Ordering::SeqCst);
        self.run_loop.stop();
        if let Some(handle) = self.thread.take() {
            if handle.join().is_err() {
                error!("{} thread panicked during teardown", self.kind.label());
            }
        }
        debug!("Released {}", self.kind.label());
    }
}

fn run_tap_thread(
    kind: TapKind,
    sink: Weak<dyn InputSink>,
    port_cell: Arc<AtomicPtr<c_void>>,
    stopping: Arc<AtomicBool>,
    ready: mpsc::Sender<Result<RunLoopHandle, String>>,
) {
    let callback_port = Arc::clone(&port_cell);
    let tap = match CGEventTap::new(
        CGEventTapLocation::Session,
        CGEventTapPlacement::HeadInsertEventTap,
        CGEventTapOptions::ListenOnly,
        events_of_interest(kind),
        move |_proxy, event_type, event| {
            handle_event(&sink, &callback_port, event_type, event);
            None
        },
    ) {
        Ok(tap) => tap,
        Err(()) => {
            let _ = ready.send(Err("CGEventTapCreate returned null".into()));
            return;
        }
    };

    let port_ref = tap.mach_port.as_concrete_TypeRef();
    let source = match tap.mach_port.create_runloop_source(0) {
        Ok(source) => source,
        Err(()) => {
            unsafe { CFMachPortInvalidate(port_ref) };
            let _ = ready.send(Err("failed to create run loop source".into()));
            return;
        }
    };

    let run_loop = CFRunLoop::get_current();
    unsafe { run_loop.add_source(&source, kCFRunLoopCommonModes) };
    tap.enable();
    port_cell.store(port_ref as *mut c_void, Ordering::SeqCst);

    let handle = RunLoopHandle(run_loop.as_concrete_TypeRef() as *mut c_void);
    if ready.send(Ok(handle)).is_err() {
        stopping.store(true, Ordering::SeqCst);
    }

    while !stopping.load(Ordering::SeqCst) {
        CFRunLoop::run_in_mode(unsafe { kCFRunLoopDefaultMode }, RUN_LOOP_SLICE, false);
    }

    port_cell.store(null_mut(), Ordering::SeqCst);
    unsafe {
        CGEventTapEnable(port_ref, false);
        run_loop.remove_source(&source, kCFRunLoopCommonModes);
        CFMachPortInvalidate(port_ref);
    }
    drop(source);
    drop(tap);
}

fn events_of_interest(kind: TapKind) -> Vec<CGEventType> {
    match kind {
        TapKind::Mouse => vec![CGEventType::LeftMouseDown, CGEventType::RightMouseDown],
        TapKind::Keyboard => vec![CGEventType::KeyDown, CGEventType::FlagsChanged],
    }
}

fn handle_event(
    sink: &Weak<dyn InputSink>,
    port: &AtomicPtr<c_void>,
    event_type: CGEventType,
    event: &CGEvent,
) {
    match event_type {
        CGEventType::TapDisabledByTimeout | CGEventType::TapDisabledByUserInput => {
            let port = port.load(Ordering::SeqCst);
            if !port.is_null() {
                warn!("Event tap disabled by the system; re-enabling");
                unsafe { CGEventTapEnable(port as CFMachPortRef, true) };
            }
        }
        other => {
            let Some(raw) = translate(other, event) else {
                return;
            };
            if let Some(sink) = sink.upgrade() {
                sink.deliver(raw);
            }
        }
    }
}

fn translate(event_type: CGEventType, event: &CGEvent) -> Option<RawInputEvent> {
    let key_code = || {
        u16::try_from(event.get_integer_value_field(EventField::KEYBOARD_EVENT_KEYCODE))
            .unwrap_or(u16::MAX)
    };

    match event_type {
        CGEventType::LeftMouseDown => Some(RawInputEvent::MouseDown(MouseButton::Left)),
        CGEventType::RightMouseDown => Some(RawInputEvent::MouseDown(MouseButton::Right)),
        CGEventType::OtherMouseDown => Some(RawInputEvent::MouseDown(MouseButton::Other)),
        CGEventType::LeftMouseUp => Some(RawInputEvent::MouseUp(MouseButton::Left)),
        CGEventType::RightMouseUp => Some(RawInputEvent::MouseUp(MouseButton::Right)),
        CGEventType::LeftMouseDragged => Some(RawInputEvent::MouseDragged(MouseButton::Left)),
        CGEventType::RightMouseDragged => Some(RawInputEvent::MouseDragged(MouseButton::Right)),
        CGEventType::KeyDown => Some(RawInputEvent::KeyDown {
            key_code: key_code(),
            autorepeat: event.get_integer_value_field(EventField::KEYBOARD_EVENT_AUTOREPEAT) != 0,
        }),
        CGEventType::KeyUp => Some(RawInputEvent::KeyUp {
            key_code: key_code(),
        }),
        CGEventType::FlagsChanged => Some(RawInputEvent::FlagsChanged {
            key_code: key_code(),
        }),
        _ => None,
    }
}

struct ProbeTeardown {
    port: CFMachPortRef,
}

impl Drop for ProbeTeardown {
    fn drop(&mut self) {
        unsafe {
            CGEventTapEnable(self.port, false);
            CFMachPortInvalidate(self.port);
        }
    }
}

/// Input Monitoring has no query API: create a transient keyboard tap, try to
/// enable it and read back whether the system let it run. The tap is disabled
/// and destroyed on every path out of this function.
pub fn probe_input_monitoring() -> bool {
    let tap = match CGEventTap::new(
        CGEventTapLocation::Session,
        CGEventTapPlacement::HeadInsertEventTap,
        CGEventTapOptions::ListenOnly,
        vec![CGEventType::KeyDown],
        |_proxy, _event_type, _event| None,
    ) {
        Ok(tap) => tap,
        Err(()) => return false,
    };

    let probe = ProbeTeardown {
        port: tap.mach_port.as_concrete_TypeRef(),
    };
    unsafe {
        CGEventTapEnable(probe.port, true);
        CGEventTapIsEnabled(probe.port)
    }
}
