// One click-through dimming window per display.
//
// Each window hosts a black `CALayer` masked by a `CAShapeLayer`. The mask
// path is the surface rectangle plus one rounded rectangle per hole, filled
// even-odd, so holes punch through the black. The mask's shadow blurs the
// hole edges by the feather radius. Opacity and path changes run inside a
// `CATransaction`, eased in and out when animated, and a later change simply
// replaces whatever is in flight.
//
// The window sits just below the screen saver, joins every Space, stays put
// during Mission Control and never shows up in window cycling.

use std::ptr;

use focusdim_shared::display::{DisplayDescriptor, DisplayId};
use focusdim_shared::overlay::{Curve, SurfaceUpdate, Transition};
use focusdim_shared::platform::{OverlaySurface, SurfaceFactory};
use kurbo::{BezPath, PathEl};
use objc2::rc::Retained;
use objc2::MainThreadMarker;
use objc2_app_kit::{
    NSBackingStoreType, NSColor, NSScreenSaverWindowLevel, NSWindow,
    NSWindowCollectionBehavior, NSWindowStyleMask,
};
use objc2_core_foundation::{CFRetained, CGPoint, CGRect, CGSize};
use objc2_core_graphics::{CGColor, CGMutablePath};
use objc2_quartz_core::{
    kCAFillRuleEvenOdd, kCAMediaTimingFunctionEaseInEaseOut, CALayer, CAMediaTimingFunction,
    CAShapeLayer, CATransaction,
};
use tracing::{debug, warn};

use crate::screens;

pub struct OverlayFactory {
    mtm: MainThreadMarker,
}

impl OverlayFactory {
    pub fn new(mtm: MainThreadMarker) -> Self {
        Self { mtm }
    }
}

impl SurfaceFactory for OverlayFactory {
    fn create_surface(&mut self, display: &DisplayDescriptor) -> Box<dyn OverlaySurface> {
        Box::new(OverlayWindow::new(self.mtm, display))
    }
}

pub struct OverlayWindow {
    mtm: MainThreadMarker,
    display_id: DisplayId,
    window: Retained<NSWindow>,
    dim: Retained<CALayer>,
    mask: Retained<CAShapeLayer>,
}

impl OverlayWindow {
    fn new(mtm: MainThreadMarker, display: &DisplayDescriptor) -> Self {
        let frame = screens::to_cocoa(display.frame, screens::primary_height(mtm));

        let window = unsafe {
            NSWindow::initWithContentRect_styleMask_backing_defer(
                mtm.alloc::<NSWindow>(),
                frame,
                NSWindowStyleMask::Borderless,
                NSBackingStoreType::Buffered,
                false,
            )
        };
        unsafe { window.setReleasedWhenClosed(false) };
        window.setOpaque(false);
        window.setBackgroundColor(Some(&NSColor::clearColor()));
        window.setIgnoresMouseEvents(true);
        window.setHasShadow(false);
        window.setLevel(NSScreenSaverWindowLevel - 1);
        window.setCollectionBehavior(
            NSWindowCollectionBehavior::CanJoinAllSpaces
                | NSWindowCollectionBehavior::Stationary
                | NSWindowCollectionBehavior::IgnoresCycle
                | NSWindowCollectionBehavior::FullScreenAuxiliary,
        );

        let dim = CALayer::new();
        let mask = CAShapeLayer::new();
        let black = CGColor::new_generic_rgb(0.0, 0.0, 0.0, 1.0);

        let bounds = local_bounds(display);
        dim.setFrame(bounds);
        dim.setBackgroundColor(Some(&black));
        dim.setOpacity(0.0);

        mask.setFrame(bounds);
        mask.setFillColor(Some(&black));
        mask.setFillRule(unsafe { kCAFillRuleEvenOdd });
        mask.setShadowColor(Some(&black));
        mask.setShadowOpacity(1.0);
        mask.setShadowOffset(CGSize::new(0.0, 0.0));
        dim.setMask(Some(&mask));

        let display_id = display.id;
        match window.contentView() {
            Some(content) => {
                content.setWantsLayer(true);
                match content.layer() {
                    Some(host) => host.addSublayer(&dim),
                    None => warn!(event = "focus.overlay.missing_host_layer", %display_id),
                }
            }
            None => warn!(event = "focus.overlay.missing_content_view", %display_id),
        }

        window.orderFrontRegardless();
        debug!(event = "focus.overlay.window_created", %display_id);

        Self {
            mtm,
            display_id,
            window,
            dim,
            mask,
        }
    }
}

impl OverlaySurface for OverlayWindow {
    fn set_frame(&mut self, display: &DisplayDescriptor) {
        debug!(event = "focus.overlay.relocated", display_id = %self.display_id);
        let frame = screens::to_cocoa(display.frame, screens::primary_height(self.mtm));
        self.window.setFrame_display(frame, true);

        let bounds = local_bounds(display);
        CATransaction::begin();
        CATransaction::setDisableActions(true);
        self.dim.setFrame(bounds);
        self.mask.setFrame(bounds);
        CATransaction::commit();
    }

    fn present(&mut self, update: &SurfaceUpdate) {
        CATransaction::begin();
        match update.transition {
            Some(transition) => begin_transition(transition),
            None => CATransaction::setDisableActions(true),
        }

        if let Some(shape) = &update.shape {
            let path = cg_path(&shape.to_path());
            self.mask.setPath(Some(&path));
        }
        self.mask.setShadowRadius(update.feather);
        self.dim.setOpacity(update.opacity as f32);

        CATransaction::commit();

        if update.opacity > 0.0 && !self.window.isVisible() {
            self.window.orderFrontRegardless();
        }
    }

    fn order_out(&mut self) {
        CATransaction::begin();
        CATransaction::setDisableActions(true);
        self.dim.setOpacity(0.0);
        CATransaction::commit();
        self.window.orderOut(None);
        debug!(event = "focus.overlay.ordered_out", display_id = %self.display_id);
    }
}

impl Drop for OverlayWindow {
    fn drop(&mut self) {
        self.window.orderOut(None);
        self.window.close();
    }
}

fn begin_transition(transition: Transition) {
    CATransaction::setAnimationDuration(transition.duration.as_secs_f64());
    let name = match transition.curve {
        Curve::EaseInEaseOut => unsafe { kCAMediaTimingFunctionEaseInEaseOut },
    };
    let timing = CAMediaTimingFunction::functionWithName(name);
    CATransaction::setAnimationTimingFunction(Some(&timing));
}

fn local_bounds(display: &DisplayDescriptor) -> CGRect {
    CGRect::new(
        CGPoint::new(0.0, 0.0),
        CGSize::new(display.frame.width(), display.frame.height()),
    )
}

/// Replay a kurbo path into a Core Graphics path.
fn cg_path(path: &BezPath) -> CFRetained<CGMutablePath> {
    let cg = CGMutablePath::new();
    let target = Some(&*cg);
    for element in path.elements() {
        unsafe {
            match *element {
                PathEl::MoveTo(p) => CGMutablePath::move_to_point(target, ptr::null(), p.x, p.y),
                PathEl::LineTo(p) => CGMutablePath::add_line_to_point(target, ptr::null(), p.x, p.y),
                PathEl::QuadTo(c, p) => {
                    CGMutablePath::add_quad_curve_to_point(target, ptr::null(), c.x, c.y, p.x, p.y)
                }
                PathEl::CurveTo(a, b, p) => CGMutablePath::add_curve_to_point(
                    target,
                    ptr::null(),
                    a.x,
                    a.y,
                    b.x,
                    b.y,
                    p.x,
                    p.y,
                ),
                PathEl::ClosePath => CGMutablePath::close_subpath(target),
            }
        }
    }
    cg
}
