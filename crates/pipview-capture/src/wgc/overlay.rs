//! The overlay window that hosts the composition surface.

use std::sync::Arc;

use parking_lot::Mutex;
use pipview_ipc::ContentSize;
use tracing::{debug, info, instrument, warn};
use windows::core::{w, HSTRING, PCWSTR};
use windows::Win32::Foundation::{HINSTANCE, HWND, LPARAM, LRESULT, WPARAM};
use windows::Win32::System::LibraryLoader::GetModuleHandleW;
use windows::Win32::UI::WindowsAndMessaging::{
    CreateWindowExW, DefWindowProcW, DestroyWindow, DispatchMessageW, GetMessageW,
    GetWindowLongPtrW, LoadCursorW, PostMessageW, PostQuitMessage, RegisterClassExW,
    SetWindowLongPtrW, SetWindowPos, TranslateMessage, CW_USEDEFAULT, GWLP_USERDATA, HTCAPTION,
    HWND_TOPMOST, IDC_ARROW, MSG, SWP_NOMOVE, SWP_NOSIZE, SWP_SHOWWINDOW, WM_CLOSE, WM_DESTROY,
    WM_NCHITTEST, WM_NCRBUTTONUP, WM_SIZE, WNDCLASSEXW, WS_EX_NOREDIRECTIONBITMAP, WS_POPUP,
    WS_VISIBLE,
};

use crate::error::CaptureError;
use crate::source::OverlayHost;
use crate::CaptureResult;

const CLASS_NAME: PCWSTR = w!("PipviewOverlay");

type ResizeCallback = Box<dyn Fn(ContentSize) + Send>;

/// Callback run on the window thread whenever the client area changes size.
/// It can be installed from any thread.
#[derive(Clone, Default)]
pub struct ResizeHook(Arc<Mutex<Option<ResizeCallback>>>);

impl ResizeHook {
    pub fn set(&self, callback: impl Fn(ContentSize) + Send + 'static) {
        *self.0.lock() = Some(Box::new(callback));
    }

    fn fire(&self, size: ContentSize) {
        if let Some(callback) = self.0.lock().as_ref() {
            callback(size);
        }
    }
}

struct OverlayState {
    resize: ResizeHook,
}

/// Borderless top-level window. Dragging anywhere moves it; a right click
/// closes it.
pub struct OverlayWindow {
    hwnd: isize,
    state: Box<OverlayState>,
}

impl OverlayWindow {
    /// Register the window class and create the window on the calling thread.
    #[instrument(name = "overlay_create", skip(title))]
    pub fn create(title: &str, size: ContentSize) -> CaptureResult<Self> {
        let module = unsafe { GetModuleHandleW(None)? };
        let instance = HINSTANCE(module.0);

        let class = WNDCLASSEXW {
            cbSize: std::mem::size_of::<WNDCLASSEXW>() as u32,
            lpfnWndProc: Some(window_proc),
            hInstance: instance,
            hCursor: unsafe { LoadCursorW(None, IDC_ARROW)? },
            lpszClassName: CLASS_NAME,
            ..Default::default()
        };

        if unsafe { RegisterClassExW(&class) } == 0 {
            return Err(CaptureError::WindowsApi {
                message: "Failed to register overlay window class".to_string(),
                source: None,
            });
        }

        let hwnd = unsafe {
            CreateWindowExW(
                WS_EX_NOREDIRECTIONBITMAP,
                CLASS_NAME,
                &HSTRING::from(title),
                WS_POPUP | WS_VISIBLE,
                CW_USEDEFAULT,
                CW_USEDEFAULT,
                size.width,
                size.height,
                None,
                None,
                instance,
                None,
            )?
        };

        let state = Box::new(OverlayState {
            resize: ResizeHook::default(),
        });
        unsafe {
            SetWindowLongPtrW(hwnd, GWLP_USERDATA, &*state as *const OverlayState as isize);
        }

        info!(%size, "Overlay window created");
        Ok(Self {
            hwnd: hwnd.0 as isize,
            state,
        })
    }

    /// Raw window handle.
    pub fn hwnd(&self) -> isize {
        self.hwnd
    }

    /// A handle that can be sent to other threads.
    pub fn handle(&self) -> OverlayHandle {
        OverlayHandle { hwnd: self.hwnd }
    }

    /// Hook fired with the new client size on `WM_SIZE`.
    pub fn resize_hook(&self) -> ResizeHook {
        self.state.resize.clone()
    }

    /// Pump messages until the window is destroyed.
    pub fn run_message_loop(&self) {
        let mut msg = MSG::default();
        unsafe {
            while GetMessageW(&mut msg, None, 0, 0).as_bool() {
                let _ = TranslateMessage(&msg);
                DispatchMessageW(&msg);
            }
        }
        debug!("Overlay message loop exited");
    }
}

impl Drop for OverlayWindow {
    fn drop(&mut self) {
        // The window may outlive us if the loop never ran.
        unsafe {
            SetWindowLongPtrW(HWND(self.hwnd as *mut _), GWLP_USERDATA, 0);
        }
    }
}

/// Thread-safe handle to the overlay window.
#[derive(Debug, Clone, Copy)]
pub struct OverlayHandle {
    hwnd: isize,
}

impl OverlayHandle {
    fn hwnd(self) -> HWND {
        HWND(self.hwnd as *mut _)
    }

    /// Ask the window to close.
    pub fn close(self) {
        if let Err(e) = unsafe { PostMessageW(self.hwnd(), WM_CLOSE, WPARAM(0), LPARAM(0)) } {
            warn!("Failed to close overlay window: {}", e);
        }
    }
}

impl OverlayHost for OverlayHandle {
    fn enter_overlay_mode(&self) {
        let result = unsafe {
            SetWindowPos(
                self.hwnd(),
                HWND_TOPMOST,
                0,
                0,
                0,
                0,
                SWP_NOMOVE | SWP_NOSIZE | SWP_SHOWWINDOW,
            )
        };
        match result {
            Ok(()) => debug!("Overlay is now topmost"),
            Err(e) => warn!("Failed to enter overlay mode: {}", e),
        }
    }
}

unsafe extern "system" fn window_proc(
    hwnd: HWND,
    msg: u32,
    wparam: WPARAM,
    lparam: LPARAM,
) -> LRESULT {
    let state = GetWindowLongPtrW(hwnd, GWLP_USERDATA) as *const OverlayState;

    match msg {
        WM_NCHITTEST => LRESULT(HTCAPTION as isize),
        WM_SIZE => {
            if let Some(state) = state.as_ref() {
                let width = (lparam.0 & 0xFFFF) as i32;
                let height = ((lparam.0 >> 16) & 0xFFFF) as i32;
                state.resize.fire(ContentSize::new(width, height));
            }
            LRESULT(0)
        }
        WM_NCRBUTTONUP => {
            let _ = DestroyWindow(hwnd);
            LRESULT(0)
        }
        WM_DESTROY => {
            SetWindowLongPtrW(hwnd, GWLP_USERDATA, 0);
            PostQuitMessage(0);
            LRESULT(0)
        }
        _ => DefWindowProcW(hwnd, msg, wparam, lparam),
    }
}
