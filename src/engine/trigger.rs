use crate::io::MidiBuffer;

/// One step boundary falling inside the current buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StepTick {
    /// Steps dispatched before this one since playback started
    pub index: u64,
    /// Frame offset of the boundary from the start of the buffer
    pub offset: u32,
    /// Length of the current buffer in frames
    pub buffer_len: u32,
}

/// Sequencing logic driven by the step clock.
///
/// Called synchronously on the audio thread, in increasing offset order.
/// Implementations must not block or allocate.
pub trait StepTrigger: Send {
    fn on_step(&mut self, tick: StepTick, out: &mut MidiBuffer<'_>);
}

impl<F> StepTrigger for F
where
    F: FnMut(StepTick, &mut MidiBuffer<'_>) + Send,
{
    fn on_step(&mut self, tick: StepTick, out: &mut MidiBuffer<'_>) {
        self(tick, out)
    }
}
