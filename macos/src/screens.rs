// NSScreen enumeration in the global top-left coordinate space.
//
// AppKit reports screen frames with the origin at the bottom-left of the
// primary screen and y growing upwards. The accessibility API and the core
// work top-left, so frames are flipped against the primary screen's height.

use focusdim_shared::display::{DisplayDescriptor, DisplayId};
use focusdim_shared::platform::DisplayEnumerator;
use kurbo::Rect;
use objc2::MainThreadMarker;
use objc2_app_kit::NSScreen;
use objc2_foundation::{NSPoint, NSRect, NSSize, NSString};
use tracing::debug;

pub struct ScreenEnumerator {
    mtm: MainThreadMarker,
}

impl ScreenEnumerator {
    pub fn new(mtm: MainThreadMarker) -> Self {
        Self { mtm }
    }
}

impl DisplayEnumerator for ScreenEnumerator {
    fn displays(&self) -> Vec<DisplayDescriptor> {
        let screens = NSScreen::screens(self.mtm);
        let primary_height = primary_height(self.mtm);

        let mut displays = Vec::with_capacity(screens.count());
        for screen in screens.iter() {
            let Some(id) = display_id(&screen) else {
                debug!(event = "focus.screens.missing_display_number");
                continue;
            };
            let frame = to_top_left(screen.frame(), primary_height);
            displays.push(DisplayDescriptor::new(id, frame, screen.backingScaleFactor()));
        }
        displays
    }
}

/// Height of the screen holding the menu bar, the origin of both spaces.
pub fn primary_height(mtm: MainThreadMarker) -> f64 {
    let screens = NSScreen::screens(mtm);
    if screens.count() == 0 {
        return 0.0;
    }
    screens.objectAtIndex(0).frame().size.height
}

/// CGDirectDisplayID of a screen, via deviceDescription["NSScreenNumber"].
fn display_id(screen: &NSScreen) -> Option<DisplayId> {
    let description = screen.deviceDescription();
    let key = NSString::from_str("NSScreenNumber");
    let value = description.objectForKey(&key)?;
    let number: u32 = unsafe { objc2::msg_send![&*value, unsignedIntValue] };
    Some(DisplayId(number))
}

pub fn to_top_left(frame: NSRect, primary_height: f64) -> Rect {
    let top = primary_height - (frame.origin.y + frame.size.height);
    Rect::from_origin_size(
        (frame.origin.x, top),
        (frame.size.width, frame.size.height),
    )
}

/// Inverse of `to_top_left`, for positioning AppKit windows.
pub fn to_cocoa(frame: Rect, primary_height: f64) -> NSRect {
    let bottom = primary_height - frame.y1;
    NSRect::new(
        NSPoint::new(frame.x0, bottom),
        NSSize::new(frame.width(), frame.height()),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_primary_screen_keeps_origin() {
        let frame = NSRect::new(NSPoint::new(0.0, 0.0), NSSize::new(1920.0, 1080.0));
        assert_eq!(to_top_left(frame, 1080.0), Rect::new(0.0, 0.0, 1920.0, 1080.0));
    }

    #[test]
    fn test_screen_above_primary_has_negative_top() {
        let frame = NSRect::new(NSPoint::new(0.0, 1080.0), NSSize::new(2560.0, 1440.0));
        let rect = to_top_left(frame, 1080.0);
        assert_eq!(rect.y0, -1440.0);
        assert_eq!(rect.y1, 0.0);
    }

    #[test]
    fn test_to_cocoa_inverts_to_top_left() {
        let frame = NSRect::new(NSPoint::new(-1280.0, 200.0), NSSize::new(1280.0, 800.0));
        let back = to_cocoa(to_top_left(frame, 1080.0), 1080.0);
        assert_eq!(back.origin.x, -1280.0);
        assert_eq!(back.origin.y, 200.0);
        assert_eq!(back.size.width, 1280.0);
        assert_eq!(back.size.height, 800.0);
    }
}
