// FocusDim: dims every display except the focused window(s).
// Native macOS host: AppKit windows, Core Animation masks and the
// Accessibility API via objc2 and accessibility-sys.

#[cfg(target_os = "macos")]
mod accessibility;
#[cfg(target_os = "macos")]
mod app;
#[cfg(target_os = "macos")]
mod events;
#[cfg(target_os = "macos")]
mod overlay;
#[cfg(target_os = "macos")]
mod screens;
#[cfg(target_os = "macos")]
mod timer;

#[cfg(target_os = "macos")]
fn main() {
    focusdim_shared::logging::init_logging(false);
    app::run();
}

#[cfg(not(target_os = "macos"))]
fn main() {
    eprintln!("focusdim: only macOS is supported");
    std::process::exit(1);
}
