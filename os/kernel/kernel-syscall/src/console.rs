use alloc::collections::VecDeque;
use alloc::vec::Vec;

/// The debug console behind `Cputs` and `Cgetc`.
pub trait Console {
    fn write(&mut self, bytes: &[u8]);

    /// Next input character, if one is waiting.
    fn read_char(&mut self) -> Option<u8>;
}

/// A console that records output and replays queued input.
#[derive(Debug, Default, Clone)]
pub struct BufferConsole {
    output: Vec<u8>,
    input: VecDeque<u8>,
}

impl BufferConsole {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue `bytes` as keyboard input.
    pub fn feed(&mut self, bytes: &[u8]) {
        self.input.extend(bytes);
    }

    /// Everything written so far.
    #[must_use]
    pub fn output(&self) -> &[u8] {
        &self.output
    }

    /// Take the output written so far, leaving the buffer empty.
    pub fn take_output(&mut self) -> Vec<u8> {
        core::mem::take(&mut self.output)
    }
}

impl Console for BufferConsole {
    fn write(&mut self, bytes: &[u8]) {
        self.output.extend_from_slice(bytes);
    }

    fn read_char(&mut self) -> Option<u8> {
        self.input.pop_front()
    }
}
