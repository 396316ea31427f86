//! Win32 window [`Transport`] implementation.
//!
//! The primary is found by enumerating top-level windows and matching a
//! case-sensitive title substring plus an exact window class.  The payload
//! travels as a `WM_COPYDATA` message carrying a NUL-terminated UTF-16
//! buffer tagged with [`COPYDATA_ID`].
//!
//! Receiving is [`Delivery::Pull`]: the host's window procedure gets the
//! `WM_COPYDATA` message, extracts the payload with
//! [`payload_from_copydata`] and passes it to
//! [`MessageListener::handle_message`](crate::listener::MessageListener::handle_message).

use crate::traits::{Delivery, Receiver, Transport};
use log::{debug, trace};
use std::convert::Infallible;
use std::ffi::c_void;
use std::mem::size_of;
use windows_sys::Win32::Foundation::{BOOL, HWND, LPARAM};
use windows_sys::Win32::System::DataExchange::COPYDATASTRUCT;
use windows_sys::Win32::UI::WindowsAndMessaging::{
    EnumWindows, GetClassNameW, GetWindowTextW, SendMessageW, SetForegroundWindow, ShowWindow,
    SW_RESTORE, WM_COPYDATA,
};

/// `dwData` tag of our `WM_COPYDATA` messages.
pub const COPYDATA_ID: usize = 1;

const NAME_BUFFER_LEN: usize = 1000;

/// A [`Transport`] that talks to the primary's main window.
#[derive(Debug, Clone)]
pub struct WindowTransport {
    title: String,
    class: String,
}

impl WindowTransport {
    /// Match windows whose title contains `title` and whose class is exactly
    /// `class`.
    pub fn new(title: impl Into<String>, class: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            class: class.into(),
        }
    }
}

struct WindowSearch<'a> {
    title: &'a str,
    class: &'a str,
    found: Option<HWND>,
}

unsafe extern "system" fn enum_windows_proc(hwnd: HWND, lparam: LPARAM) -> BOOL {
    let search = &mut *(lparam as *mut WindowSearch);

    let mut buf = [0u16; NAME_BUFFER_LEN];
    let len = GetClassNameW(hwnd, buf.as_mut_ptr(), buf.len() as i32);
    let class = String::from_utf16_lossy(&buf[..len.max(0) as usize]);
    if class != search.class {
        return 1;
    }

    let len = GetWindowTextW(hwnd, buf.as_mut_ptr(), buf.len() as i32);
    let title = String::from_utf16_lossy(&buf[..len.max(0) as usize]);
    if !title.contains(search.title) {
        return 1;
    }

    search.found = Some(hwnd);
    0
}

impl Transport for WindowTransport {
    type Error = Infallible;
    type Peer = HWND;
    type Receiver = WindowReceiver;

    fn delivery(&self) -> Delivery {
        Delivery::Pull
    }

    fn locate_primary(&self) -> Result<Option<HWND>, Self::Error> {
        let mut search = WindowSearch {
            title: &self.title,
            class: &self.class,
            found: None,
        };
        unsafe {
            EnumWindows(
                Some(enum_windows_proc),
                &mut search as *mut WindowSearch as LPARAM,
            );
        }
        Ok(search.found)
    }

    /// Restore and raise the primary window, then send the payload.
    fn deliver_message(&self, hwnd: HWND, payload: &str) -> Result<(), Self::Error> {
        let mut wide: Vec<u16> = payload.encode_utf16().chain(std::iter::once(0)).collect();
        let data = COPYDATASTRUCT {
            dwData: COPYDATA_ID,
            cbData: (wide.len() * size_of::<u16>()) as u32,
            lpData: wide.as_mut_ptr() as *mut c_void,
        };
        unsafe {
            ShowWindow(hwnd, SW_RESTORE);
            SetForegroundWindow(hwnd);
            let handled = SendMessageW(
                hwnd,
                WM_COPYDATA,
                0,
                &data as *const COPYDATASTRUCT as LPARAM,
            );
            if handled == 0 {
                debug!("primary window did not acknowledge WM_COPYDATA");
            }
        }
        trace!("WM_COPYDATA sent");
        Ok(())
    }

    /// The receiving window belongs to the host, so there is nothing to
    /// claim here.
    fn receive_messages(&self) -> Result<WindowReceiver, Self::Error> {
        Ok(WindowReceiver)
    }
}

/// Placeholder endpoint for [`Delivery::Pull`]; messages arrive through the
/// host's window procedure.
#[derive(Debug)]
pub struct WindowReceiver;

impl Receiver for WindowReceiver {
    type Error = Infallible;

    fn dispatch(&mut self, _: &mut dyn FnMut(String)) -> Result<usize, Self::Error> {
        Ok(0)
    }
}

/// Extract our payload from the `LPARAM` of a `WM_COPYDATA` message.
///
/// Returns `None` for messages tagged with another `dwData` or carrying
/// invalid UTF-16.
///
/// # Safety
///
/// `lparam` must be the `LPARAM` of a `WM_COPYDATA` message that is
/// currently being handled, i.e. point to a valid `COPYDATASTRUCT`.
pub unsafe fn payload_from_copydata(lparam: LPARAM) -> Option<String> {
    let data = (lparam as *const COPYDATASTRUCT).as_ref()?;
    if data.dwData != COPYDATA_ID || data.lpData.is_null() {
        return None;
    }
    let units = std::slice::from_raw_parts(
        data.lpData as *const u16,
        data.cbData as usize / size_of::<u16>(),
    );
    let end = units.iter().position(|&u| u == 0).unwrap_or(units.len());
    String::from_utf16(&units[..end]).ok()
}
