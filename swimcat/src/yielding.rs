/// A cooperative yield, called on every iteration of a spin-wait.
///
/// Blocking writes and [`flush`](crate::RingChannel::flush) wait for the host by polling the
/// cursors. Between two polls the channel hands the processor to whatever the environment
/// offers: a scheduler, an executor's idle hook, or nothing at all.
pub trait Yield {
    /// Gives other cooperative work a chance to run.
    fn yield_now();
}

/// Busy-waits with a spin-loop hint. This is the default.
#[derive(Debug, Clone, Copy, Default)]
pub struct Spin;

impl Yield for Spin {
    #[inline]
    fn yield_now() {
        core::hint::spin_loop();
    }
}

/// Does nothing between polls.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoYield;

impl Yield for NoYield {
    #[inline(always)]
    fn yield_now() {}
}

/// Calls a `swimcat_yield` function provided by the firmware.
///
/// The firmware must define it, for example:
///
/// ```ignore
/// #[no_mangle]
/// fn swimcat_yield() {
///     cortex_m::asm::wfe();
/// }
/// ```
#[cfg(feature = "extern-yield")]
#[derive(Debug, Clone, Copy, Default)]
pub struct ExternYield;

#[cfg(feature = "extern-yield")]
extern "Rust" {
    fn swimcat_yield();
}

#[cfg(feature = "extern-yield")]
impl Yield for ExternYield {
    #[inline]
    fn yield_now() {
        // SAFETY: the symbol is a plain `fn()` provided by the firmware.
        unsafe { swimcat_yield() }
    }
}
