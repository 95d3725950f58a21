use std::ffi::OsStr;
use std::io;
use std::iter::once;
use std::os::windows::ffi::OsStrExt;
use std::ptr;

use anyhow::Result;
use winapi::shared::ntdef::HANDLE;
use winapi::um::winbase::{DeregisterEventSource, RegisterEventSourceW, ReportEventW};
use winapi::um::winnt::{EVENTLOG_ERROR_TYPE, EVENTLOG_INFORMATION_TYPE};

use crate::gensvc::Logger;

fn to_wide(s: &str) -> Vec<u16> {
    OsStr::new(s).encode_wide().chain(once(0)).collect()
}

/// Logger backed by the Windows application event log.
pub struct EventLog {
    handle: HANDLE,
}

// Event source handles may be used from any thread.
unsafe impl Send for EventLog {}
unsafe impl Sync for EventLog {}

impl EventLog {
    pub fn register(source: &str) -> Result<Self> {
        let source = to_wide(source);
        let handle = unsafe { RegisterEventSourceW(ptr::null(), source.as_ptr()) };
        if handle.is_null() {
            return Err(anyhow::Error::from(io::Error::last_os_error()));
        }
        Ok(EventLog { handle })
    }

    fn report(&self, kind: u16, event_id: u32, message: &str) {
        let message = to_wide(message);
        let mut strings = [message.as_ptr()];
        unsafe {
            ReportEventW(
                self.handle,
                kind,
                0,
                event_id,
                ptr::null_mut(),
                1,
                0,
                strings.as_mut_ptr(),
                ptr::null_mut(),
            );
        }
    }
}

impl Logger for EventLog {
    fn info(&self, event_id: u32, message: &str) {
        self.report(EVENTLOG_INFORMATION_TYPE, event_id, message);
    }

    fn error(&self, event_id: u32, message: &str) {
        self.report(EVENTLOG_ERROR_TYPE, event_id, message);
    }
}

impl Drop for EventLog {
    fn drop(&mut self) {
        unsafe { DeregisterEventSource(self.handle) };
    }
}
