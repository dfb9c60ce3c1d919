// One-shot NSTimer driving the coordinator's debounced refresh.
//
// Arming replaces any timer already scheduled; firing hands control back
// to the coordinator, which decides whether the pending refresh is due.

use std::ptr::NonNull;
use std::time::Duration;

use block2::RcBlock;
use focusdim_shared::platform::DeferredExecutor;
use objc2::rc::Retained;
use objc2_foundation::NSTimer;
use tracing::trace;

use crate::app;

#[derive(Default)]
pub struct RefreshTimer {
    timer: Option<Retained<NSTimer>>,
}

impl RefreshTimer {
    pub fn new() -> Self {
        Self::default()
    }
}

impl DeferredExecutor for RefreshTimer {
    fn arm(&mut self, delay: Duration) {
        self.disarm();
        let block = RcBlock::new(|_timer: NonNull<NSTimer>| app::fire_timer());
        let timer = unsafe {
            NSTimer::scheduledTimerWithTimeInterval_repeats_block(delay.as_secs_f64(), false, &block)
        };
        trace!(event = "focus.timer.armed", delay_ms = delay.as_millis() as u64);
        self.timer = Some(timer);
    }

    fn disarm(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.invalidate();
        }
    }
}

impl Drop for RefreshTimer {
    fn drop(&mut self) {
        self.disarm();
    }
}
