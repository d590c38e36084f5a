//! GPU-backed drawing surface shown by the compositor.

use pipview_ipc::ContentSize;
use tracing::warn;

use crate::CaptureResult;

/// Premultiplied RGBA color.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Color {
    pub r: f32,
    pub g: f32,
    pub b: f32,
    pub a: f32,
}

impl Color {
    /// Fully transparent black.
    pub const TRANSPARENT: Self = Self {
        r: 0.0,
        g: 0.0,
        b: 0.0,
        a: 0.0,
    };

    /// Components as an array in RGBA order.
    pub fn to_array(self) -> [f32; 4] {
        [self.r, self.g, self.b, self.a]
    }
}

/// Where a surface sits inside the window that shows it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Placement {
    pub scale: f32,
    pub offset_x: f32,
    pub offset_y: f32,
}

impl Placement {
    pub const IDENTITY: Self = Self {
        scale: 1.0,
        offset_x: 0.0,
        offset_y: 0.0,
    };

    /// Scale `content` uniformly to fit inside `viewport`, centered on both
    /// axes. Empty sizes give the identity placement.
    pub fn fit(content: ContentSize, viewport: ContentSize) -> Self {
        if content.is_empty() || viewport.is_empty() {
            return Self::IDENTITY;
        }

        let (cw, ch) = (content.width as f32, content.height as f32);
        let (vw, vh) = (viewport.width as f32, viewport.height as f32);
        let scale = (vw / cw).min(vh / ch);

        Self {
            scale,
            offset_x: (vw - cw * scale) / 2.0,
            offset_y: (vh - ch * scale) / 2.0,
        }
    }
}

/// A resizable surface the compositor displays.
///
/// Drawing happens between [`begin_draw`](Self::begin_draw) and
/// [`end_draw`](Self::end_draw); use [`draw`](Self::draw) to get a guard that
/// always ends and presents the draw.
pub trait DrawingSurface: Send + 'static {
    /// Image type that can be painted onto this surface.
    type Image;

    /// Current surface size.
    fn size(&self) -> ContentSize;

    /// Resize the backing buffers. Contents are undefined until the next draw.
    /// The surface stays fitted to its viewport.
    fn resize(&mut self, size: ContentSize) -> CaptureResult<()>;

    /// Set the area the surface is shown in and refit the surface to it.
    fn set_viewport(&mut self, viewport: ContentSize) -> CaptureResult<()>;

    /// Start a draw.
    fn begin_draw(&mut self) -> CaptureResult<()>;

    /// Fill the whole surface with `color`.
    fn clear(&mut self, color: Color) -> CaptureResult<()>;

    /// Paint `image` at the origin.
    fn draw_image(&mut self, image: &Self::Image) -> CaptureResult<()>;

    /// Finish the draw and present it.
    fn end_draw(&mut self) -> CaptureResult<()>;

    /// Begin a scoped draw session.
    fn draw(&mut self) -> CaptureResult<DrawSession<'_, Self>>
    where
        Self: Sized,
    {
        self.begin_draw()?;
        Ok(DrawSession {
            surface: self,
            finished: false,
        })
    }
}

/// Scoped draw on a [`DrawingSurface`]. The draw is ended on drop.
pub struct DrawSession<'a, S: DrawingSurface> {
    surface: &'a mut S,
    finished: bool,
}

impl<S: DrawingSurface> DrawSession<'_, S> {
    /// Fill the surface with `color`.
    pub fn clear(&mut self, color: Color) -> CaptureResult<()> {
        self.surface.clear(color)
    }

    /// Paint `image` onto the surface.
    pub fn draw_image(&mut self, image: &S::Image) -> CaptureResult<()> {
        self.surface.draw_image(image)
    }

    /// End the draw and report presentation errors.
    pub fn finish(mut self) -> CaptureResult<()> {
        self.finished = true;
        self.surface.end_draw()
    }
}

impl<S: DrawingSurface> Drop for DrawSession<'_, S> {
    fn drop(&mut self) {
        if !self.finished {
            if let Err(e) = self.surface.end_draw() {
                warn!("Failed to end draw session: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CaptureError;

    #[derive(Default)]
    struct LogSurface {
        ops: Vec<String>,
        fail_draw: bool,
    }

    impl DrawingSurface for LogSurface {
        type Image = &'static str;

        fn size(&self) -> ContentSize {
            ContentSize::new(1, 1)
        }

        fn resize(&mut self, size: ContentSize) -> CaptureResult<()> {
            self.ops.push(format!("resize {size}"));
            Ok(())
        }

        fn set_viewport(&mut self, viewport: ContentSize) -> CaptureResult<()> {
            self.ops.push(format!("viewport {viewport}"));
            Ok(())
        }

        fn begin_draw(&mut self) -> CaptureResult<()> {
            self.ops.push("begin".into());
            Ok(())
        }

        fn clear(&mut self, color: Color) -> CaptureResult<()> {
            self.ops.push(format!("clear {}", color.a));
            Ok(())
        }

        fn draw_image(&mut self, image: &Self::Image) -> CaptureResult<()> {
            if self.fail_draw {
                return Err(CaptureError::DeviceLost);
            }
            self.ops.push(format!("draw {image}"));
            Ok(())
        }

        fn end_draw(&mut self) -> CaptureResult<()> {
            self.ops.push("end".into());
            Ok(())
        }
    }

    #[test]
    fn test_session_ends_on_finish() {
        let mut surface = LogSurface::default();
        let mut session = surface.draw().unwrap();
        session.clear(Color::TRANSPARENT).unwrap();
        session.draw_image(&"frame").unwrap();
        session.finish().unwrap();

        assert_eq!(surface.ops, vec!["begin", "clear 0", "draw frame", "end"]);
    }

    #[test]
    fn test_session_ends_on_error_path() {
        let mut surface = LogSurface {
            fail_draw: true,
            ..Default::default()
        };

        let result = (|| {
            let mut session = surface.draw()?;
            session.clear(Color::TRANSPARENT)?;
            session.draw_image(&"frame")?;
            session.finish()
        })();

        assert!(matches!(result, Err(CaptureError::DeviceLost)));
        assert_eq!(surface.ops, vec!["begin", "clear 0", "end"]);
    }

    #[test]
    fn test_fit_letterboxes_wide_content() {
        let placement = Placement::fit(ContentSize::new(1600, 900), ContentSize::new(400, 400));

        assert_eq!(
            placement,
            Placement {
                scale: 0.25,
                offset_x: 0.0,
                offset_y: 87.5,
            }
        );
    }

    #[test]
    fn test_fit_pillarboxes_tall_content() {
        let placement = Placement::fit(ContentSize::new(300, 600), ContentSize::new(400, 300));

        assert_eq!(placement.scale, 0.5);
        assert_eq!(placement.offset_x, 125.0);
        assert_eq!(placement.offset_y, 0.0);
    }

    #[test]
    fn test_fit_scales_up_small_content() {
        let placement = Placement::fit(ContentSize::new(200, 100), ContentSize::new(800, 600));

        assert_eq!(placement.scale, 4.0);
        assert_eq!(placement.offset_y, 100.0);
    }

    #[test]
    fn test_fit_empty_is_identity() {
        assert_eq!(
            Placement::fit(ContentSize::default(), ContentSize::new(400, 400)),
            Placement::IDENTITY
        );
        assert_eq!(
            Placement::fit(ContentSize::new(400, 400), ContentSize::default()),
            Placement::IDENTITY
        );
    }
}
