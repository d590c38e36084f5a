//! Window sources and pickers.

use pipview_ipc::ContentSize;
use tracing::{debug, info, instrument};
use windows::core::Interface;
use windows::Foundation::TypedEventHandler;
use windows::Graphics::Capture::{GraphicsCaptureItem, GraphicsCapturePicker};
use windows::Win32::Foundation::{BOOL, HWND, LPARAM, RECT};
use windows::Win32::System::WinRT::Graphics::Capture::IGraphicsCaptureItemInterop;
use windows::Win32::UI::Shell::IInitializeWithWindow;
use windows::Win32::UI::WindowsAndMessaging::{
    EnumWindows, GetWindowRect, GetWindowTextLengthW, GetWindowTextW, GetWindowThreadProcessId,
    IsWindowVisible,
};

use super::to_size;
use crate::error::CaptureError;
use crate::frame_pool::{SignalHandler, SubscriptionToken};
use crate::source::{CaptureItem, SourcePicker};
use crate::CaptureResult;

/// Smallest window edge worth offering as a source.
const MIN_WINDOW_EDGE: i32 = 100;

/// A top-level window that can be captured.
#[derive(Debug, Clone)]
pub struct WindowInfo {
    /// Window handle.
    pub handle: isize,

    /// Window title.
    pub title: String,

    /// Process ID.
    pub process_id: u32,

    /// Outer window size.
    pub size: ContentSize,
}

impl WindowInfo {
    /// Create a capture item for this window.
    pub fn create_capture_item(&self) -> CaptureResult<WgcItem> {
        let interop: IGraphicsCaptureItemInterop =
            windows::core::factory::<GraphicsCaptureItem, IGraphicsCaptureItemInterop>()?;

        let hwnd = HWND(self.handle as *mut _);
        let item: GraphicsCaptureItem = unsafe { interop.CreateForWindow(hwnd)? };

        Ok(WgcItem::new(item))
    }
}

/// Enumerate visible, titled windows large enough to capture.
#[instrument(name = "enumerate_windows")]
pub fn enumerate_windows() -> CaptureResult<Vec<WindowInfo>> {
    let mut windows: Vec<WindowInfo> = Vec::new();

    unsafe {
        EnumWindows(
            Some(enum_window_callback),
            LPARAM(&mut windows as *mut Vec<WindowInfo> as isize),
        )
        .map_err(|e| CaptureError::WindowsApi {
            message: format!("Failed to enumerate windows: {}", e.message()),
            source: Some(e),
        })?;
    }

    debug!(count = windows.len(), "Enumerated windows");
    Ok(windows)
}

unsafe extern "system" fn enum_window_callback(hwnd: HWND, lparam: LPARAM) -> BOOL {
    let windows = &mut *(lparam.0 as *mut Vec<WindowInfo>);

    if !IsWindowVisible(hwnd).as_bool() {
        return BOOL::from(true);
    }

    let title_length = GetWindowTextLengthW(hwnd);
    if title_length == 0 {
        return BOOL::from(true);
    }

    let mut title_buffer: Vec<u16> = vec![0; (title_length + 1) as usize];
    let actual_length = GetWindowTextW(hwnd, &mut title_buffer);
    if actual_length == 0 {
        return BOOL::from(true);
    }

    let title = String::from_utf16_lossy(&title_buffer[..actual_length as usize]);
    if title.trim().is_empty() {
        return BOOL::from(true);
    }

    let mut rect = RECT::default();
    if GetWindowRect(hwnd, &mut rect).is_err() {
        return BOOL::from(true);
    }

    let size = ContentSize::new(rect.right - rect.left, rect.bottom - rect.top);
    if size.width < MIN_WINDOW_EDGE || size.height < MIN_WINDOW_EDGE {
        return BOOL::from(true);
    }

    let mut process_id: u32 = 0;
    GetWindowThreadProcessId(hwnd, Some(&mut process_id));

    windows.push(WindowInfo {
        handle: hwnd.0 as isize,
        title,
        process_id,
        size,
    });
    BOOL::from(true)
}

/// `GraphicsCaptureItem` plus its cached display name.
pub struct WgcItem {
    item: GraphicsCaptureItem,
    name: String,
}

impl WgcItem {
    pub fn new(item: GraphicsCaptureItem) -> Self {
        let name = item
            .DisplayName()
            .map(|name| name.to_string())
            .unwrap_or_default();
        Self { item, name }
    }

    pub fn item(&self) -> &GraphicsCaptureItem {
        &self.item
    }
}

impl CaptureItem for WgcItem {
    fn display_name(&self) -> String {
        self.name.clone()
    }

    fn size(&self) -> CaptureResult<ContentSize> {
        Ok(to_size(self.item.Size()?))
    }

    fn on_closed(&self, handler: SignalHandler) -> CaptureResult<SubscriptionToken> {
        let token = self.item.Closed(&TypedEventHandler::new(move |_, _| {
            handler();
            Ok(())
        }))?;
        Ok(SubscriptionToken(token))
    }

    fn remove_closed(&self, token: SubscriptionToken) {
        if let Err(e) = self.item.RemoveClosed(token.0) {
            debug!("Failed to remove closed handler: {}", e);
        }
    }
}

/// Picks the first window whose title contains a filter string.
pub struct WindowPicker {
    filter: String,
    exclude: isize,
}

impl WindowPicker {
    /// Match titles containing `filter`, ignoring case. `exclude` is skipped,
    /// normally the overlay window itself.
    pub fn new(filter: impl Into<String>, exclude: isize) -> Self {
        Self {
            filter: filter.into().to_lowercase(),
            exclude,
        }
    }
}

impl SourcePicker for WindowPicker {
    type Item = WgcItem;

    fn pick(&self) -> CaptureResult<Option<WgcItem>> {
        let window = enumerate_windows()?
            .into_iter()
            .filter(|w| w.handle != self.exclude)
            .find(|w| w.title.to_lowercase().contains(&self.filter))
            .ok_or_else(|| CaptureError::SourceNotFound(self.filter.clone()))?;

        info!(title = %window.title, size = %window.size, "Picked window");
        window.create_capture_item().map(Some)
    }
}

/// The system capture picker, parented to the overlay window.
pub struct SystemPicker {
    owner: isize,
}

impl SystemPicker {
    pub fn new(owner: isize) -> Self {
        Self { owner }
    }
}

impl SourcePicker for SystemPicker {
    type Item = WgcItem;

    fn pick(&self) -> CaptureResult<Option<WgcItem>> {
        let picker = GraphicsCapturePicker::new()?;
        let init: IInitializeWithWindow = picker.cast()?;
        unsafe { init.Initialize(HWND(self.owner as *mut _))? };

        match picker.PickSingleItemAsync()?.get() {
            Ok(item) => Ok(Some(WgcItem::new(item))),
            // Dismissing the picker completes with a null item.
            Err(e) if e.code().is_ok() => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}
