//! Sleep/wake loop driven by a one-shot low-power timer.
//!
//! The timer interrupt does nothing but disarm its source and raise
//! [`WakeFlag`]; all business logic runs in the scheduler's context after the
//! flag has been consumed. The flag is the only datum shared between the
//! interrupt and the main context.

use portable_atomic::{AtomicBool, Ordering};

/// Edge-triggered wake flag set from interrupt context.
pub struct WakeFlag {
    pending: AtomicBool,
}

impl WakeFlag {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            pending: AtomicBool::new(false),
        }
    }

    /// Raises the flag. Safe to call from an interrupt handler.
    pub fn signal(&self) {
        self.pending.store(true, Ordering::Release);
    }

    /// Consumes the flag, returning whether it was raised.
    #[must_use]
    pub fn take(&self) -> bool {
        self.pending.swap(false, Ordering::AcqRel)
    }

    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.pending.load(Ordering::Acquire)
    }
}

impl Default for WakeFlag {
    fn default() -> Self {
        Self::new()
    }
}

/// One-shot low-power wake timer.
pub trait WakeTimer {
    /// Timer-specific error type.
    type Error;

    /// Arms a single expiry one nominal period from now.
    fn arm(&mut self);

    /// Enters the low-power state until any interrupt resumes execution.
    fn suspend(&mut self);

    /// Disarms the timer after a wake.
    ///
    /// # Errors
    ///
    /// Returns the timer error when the interrupt source could not be cleared.
    fn disarm(&mut self) -> Result<(), Self::Error>;
}

/// Facts about the wake that triggered the current tick.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct WakeEvent {
    /// Resumptions without the flag set before this wake arrived.
    pub spurious_resumes: u32,
    /// Disarming the timer failed; the tick runs regardless.
    pub disarm_failed: bool,
}

/// Per-tick handler invoked by the scheduler.
pub trait TickHandler {
    fn on_wake(&mut self, event: WakeEvent);
}

impl<F> TickHandler for F
where
    F: FnMut(WakeEvent),
{
    fn on_wake(&mut self, event: WakeEvent) {
        self(event);
    }
}

/// Owns the wake timer and runs the sleep/wake loop.
pub struct WakeScheduler<'a, T>
where
    T: WakeTimer,
{
    timer: T,
    flag: &'a WakeFlag,
    spurious_total: u32,
}

impl<'a, T> WakeScheduler<'a, T>
where
    T: WakeTimer,
{
    #[must_use]
    pub fn new(timer: T, flag: &'a WakeFlag) -> Self {
        Self {
            timer,
            flag,
            spurious_total: 0,
        }
    }

    /// Total resumptions that did not carry a wake since construction.
    #[must_use]
    pub fn spurious_total(&self) -> u32 {
        self.spurious_total
    }

    pub fn timer_mut(&mut self) -> &mut T {
        &mut self.timer
    }

    /// Clears any stale signal, arms the timer, and sleeps until the wake flag
    /// is observed.
    ///
    /// Resumptions caused by other interrupts go straight back to sleep. The
    /// timer is disarmed once the wake is seen; a disarm failure is reported in
    /// the returned event and otherwise ignored.
    pub fn wait_for_wake(&mut self) -> WakeEvent {
        // A signal left over from before arming belongs to no wake of ours.
        let _stale = self.flag.take();
        self.timer.arm();

        let mut spurious_resumes: u32 = 0;
        loop {
            self.timer.suspend();
            if self.flag.take() {
                break;
            }
            spurious_resumes = spurious_resumes.saturating_add(1);
        }
        self.spurious_total = self.spurious_total.saturating_add(spurious_resumes);

        let disarm_failed = self.timer.disarm().is_err();

        WakeEvent {
            spurious_resumes,
            disarm_failed,
        }
    }

    /// Runs one full iteration: sleep, wake, dispatch.
    pub fn run_once<H>(&mut self, handler: &mut H) -> WakeEvent
    where
        H: TickHandler + ?Sized,
    {
        let event = self.wait_for_wake();
        handler.on_wake(event);
        event
    }

    /// Runs forever.
    pub fn run<H>(&mut self, handler: &mut H) -> !
    where
        H: TickHandler + ?Sized,
    {
        loop {
            self.run_once(handler);
        }
    }
}
