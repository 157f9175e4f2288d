//! Kernel printk with buffering
//!
//! Implements Linux-style printk that always works:
//! - Messages are stored in a ring buffer
//! - When a console sink is attached, the buffer is flushed and new
//!   messages go directly to the sink
//! - Buffer provides dmesg-like access to boot messages
//!
//! ## Locking
//!
//! Two locks are used to avoid deadlock while ensuring message atomicity:
//! - PRINTK: Protects the ring buffer (short hold time)
//! - OUTPUT_LOCK: Serializes sink writes (held during output)
//!
//! The output lock ensures entire messages are written atomically,
//! preventing interleaved output from concurrent writers.

use ::core::fmt::{self, Write};

use spin::Mutex;

/// Console sink function type
///
/// The surrounding system registers one of these (a serial driver, a
/// framebuffer console, a test capture buffer). Until one is attached,
/// messages accumulate in the ring buffer.
pub type ConsoleSink = fn(&[u8]);

/// Registered console sink, if any
static CONSOLE: Mutex<Option<ConsoleSink>> = Mutex::new(None);

/// Output lock - serializes all sink writes
///
/// This is separate from PRINTK to:
/// 1. Allow buffering while another writer holds the sink
/// 2. Prevent deadlock if sink code needs to log
static OUTPUT_LOCK: Mutex<()> = Mutex::new(());

/// Ring buffer size (must be power of 2)
const PRINTK_BUFFER_SIZE: usize = 16384; // 16KB

/// Ring buffer for printk messages
struct RingBuffer {
    /// Buffer storage
    data: [u8; PRINTK_BUFFER_SIZE],
    /// Write position (next byte to write)
    head: usize,
    /// Read position (next byte to read for flush)
    tail: usize,
    /// Has the buffer wrapped (overwritten old data)?
    wrapped: bool,
}

impl RingBuffer {
    const fn new() -> Self {
        Self {
            data: [0; PRINTK_BUFFER_SIZE],
            head: 0,
            tail: 0,
            wrapped: false,
        }
    }

    /// Write a byte to the buffer
    fn write_byte(&mut self, byte: u8) {
        self.data[self.head] = byte;
        self.head = (self.head + 1) & (PRINTK_BUFFER_SIZE - 1);

        // If we caught up to tail, we've overwritten data
        if self.head == self.tail {
            self.tail = (self.tail + 1) & (PRINTK_BUFFER_SIZE - 1);
            self.wrapped = true;
        }
    }

    /// Write bytes to the buffer
    fn write_bytes(&mut self, bytes: &[u8]) {
        for &b in bytes {
            self.write_byte(b);
        }
    }

    /// Read available bytes for flushing (advances tail)
    fn read_for_flush(&mut self, buf: &mut [u8]) -> usize {
        let mut count = 0;
        while self.tail != self.head && count < buf.len() {
            buf[count] = self.data[self.tail];
            self.tail = (self.tail + 1) & (PRINTK_BUFFER_SIZE - 1);
            count += 1;
        }
        count
    }

    /// Get number of bytes available to read
    fn available(&self) -> usize {
        if self.head >= self.tail {
            self.head - self.tail
        } else {
            PRINTK_BUFFER_SIZE - self.tail + self.head
        }
    }

    /// Check if buffer has overflowed (lost messages)
    fn has_overflow(&self) -> bool {
        self.wrapped
    }

    /// Clear overflow flag
    fn clear_overflow(&mut self) {
        self.wrapped = false;
    }
}

/// Printk state
struct PrintkState {
    /// Ring buffer for messages
    buffer: RingBuffer,
    /// Has the buffer been flushed since console attach?
    flushed: bool,
}

impl PrintkState {
    const fn new() -> Self {
        Self {
            buffer: RingBuffer::new(),
            flushed: false, // Buffer needs flush when console is attached
        }
    }
}

/// Global printk state
static PRINTK: Mutex<PrintkState> = Mutex::new(PrintkState::new());

/// Attach a console sink
///
/// Call `flush()` afterwards to output the messages buffered before the
/// sink was ready.
pub fn register_console(sink: ConsoleSink) {
    *CONSOLE.lock() = Some(sink);
}

fn has_console() -> bool {
    CONSOLE.lock().is_some()
}

fn console_write(bytes: &[u8]) {
    let sink = *CONSOLE.lock();
    if let Some(sink) = sink {
        sink(bytes);
    }
}

/// Flush buffered messages to the console sink
///
/// Note: this must not allocate (it may run before the heap is up), so
/// it writes in fixed-size chunks while holding both locks. Acceptable
/// for a boot-time flush.
pub fn flush() {
    // Check if a sink is attached (outside lock)
    if !has_console() {
        return;
    }

    // Take output lock first to serialize with other writers
    let _output = OUTPUT_LOCK.lock();
    let mut state = PRINTK.lock();

    if state.flushed {
        return;
    }

    if state.buffer.has_overflow() {
        let overflow_msg = b"\n*** printk buffer overflow - some messages lost ***\n";
        console_write(overflow_msg);
        state.buffer.clear_overflow();
    }

    let mut chunk = [0u8; 256];
    loop {
        let n = state.buffer.read_for_flush(&mut chunk);
        if n == 0 {
            break;
        }
        console_write(&chunk[..n]);
    }

    state.flushed = true;
}

/// Write bytes to printk (internal) - must be called with OUTPUT_LOCK held
fn printk_write_locked(bytes: &[u8]) {
    // Buffer the message and get flushed state
    let should_write = {
        let mut state = PRINTK.lock();
        state.buffer.write_bytes(bytes);
        state.flushed
    };

    // If we're in flushed state (sink attached and initial flush done),
    // write directly to the sink
    if should_write && has_console() {
        console_write(bytes);
    }
}

/// Printk writer for fmt::Write
///
/// Holds OUTPUT_LOCK for the duration of all write_str calls,
/// ensuring entire formatted messages are written atomically.
pub struct PrintkWriter {
    _guard: spin::MutexGuard<'static, ()>,
}

impl PrintkWriter {
    /// Create a new PrintkWriter, acquiring the output lock
    pub fn new() -> Self {
        Self {
            _guard: OUTPUT_LOCK.lock(),
        }
    }
}

impl Default for PrintkWriter {
    fn default() -> Self {
        Self::new()
    }
}

impl Write for PrintkWriter {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        printk_write_locked(s.as_bytes());
        Ok(())
    }
}

/// Print to kernel log (like Linux printk)
///
/// Messages are buffered and optionally sent to the console sink.
/// Always succeeds - never blocks or fails.
#[macro_export]
macro_rules! printk {
    ($($arg:tt)*) => {{
        use ::core::fmt::Write;
        let mut writer = $crate::printk::PrintkWriter::new();
        let _ = write!(writer, $($arg)*);
        // writer dropped here, releasing OUTPUT_LOCK
    }};
}

/// Print to kernel log with newline
///
/// Uses a single writer for the message and newline to ensure atomicity.
#[macro_export]
macro_rules! printkln {
    () => {
        $crate::printk!("\n")
    };
    ($($arg:tt)*) => {{
        use ::core::fmt::Write;
        let mut writer = $crate::printk::PrintkWriter::new();
        let _ = write!(writer, $($arg)*);
        let _ = writer.write_str("\n");
        // writer dropped here, releasing OUTPUT_LOCK
    }};
}

/// Get printk buffer statistics: (bytes buffered, capacity, overflowed)
pub fn stats() -> (usize, usize, bool) {
    let state = PRINTK.lock();
    (
        state.buffer.available(),
        PRINTK_BUFFER_SIZE,
        state.buffer.has_overflow(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ring_buffer_ordering() {
        let mut rb = RingBuffer::new();
        rb.write_bytes(b"hello ");
        rb.write_bytes(b"world");

        let mut out = [0u8; 32];
        let n = rb.read_for_flush(&mut out);
        assert_eq!(&out[..n], b"hello world");
        assert_eq!(rb.available(), 0);
    }

    #[test]
    fn ring_buffer_overflow_sets_flag_and_keeps_newest() {
        let mut rb = RingBuffer::new();
        assert!(!rb.has_overflow());

        for i in 0..(PRINTK_BUFFER_SIZE + 10) {
            rb.write_byte((i % 251) as u8);
        }
        assert!(rb.has_overflow());

        // The buffer holds one byte less than capacity once wrapped.
        assert_eq!(rb.available(), PRINTK_BUFFER_SIZE - 1);

        rb.clear_overflow();
        assert!(!rb.has_overflow());
    }

    #[test]
    fn read_for_flush_in_chunks() {
        let mut rb = RingBuffer::new();
        rb.write_bytes(b"abcdefgh");

        let mut chunk = [0u8; 3];
        assert_eq!(rb.read_for_flush(&mut chunk), 3);
        assert_eq!(&chunk, b"abc");
        assert_eq!(rb.read_for_flush(&mut chunk), 3);
        assert_eq!(&chunk, b"def");
        assert_eq!(rb.read_for_flush(&mut chunk), 2);
        assert_eq!(&chunk[..2], b"gh");
        assert_eq!(rb.read_for_flush(&mut chunk), 0);
    }

    #[test]
    fn flush_delivers_buffered_messages_to_sink() {
        static CAPTURED: Mutex<alloc::vec::Vec<u8>> = Mutex::new(alloc::vec::Vec::new());
        fn capture(bytes: &[u8]) {
            CAPTURED.lock().extend_from_slice(bytes);
        }

        printkln!("early boot message");
        register_console(capture);
        flush();

        let captured = CAPTURED.lock();
        assert!(!captured.is_empty());
    }

    #[test]
    fn printk_macro_buffers_messages() {
        let (before, cap, _) = stats();
        printkln!("printk self test {}", 42);
        let (after, cap2, _) = stats();
        assert_eq!(cap, cap2);
        // 21 bytes of message plus newline, unless another test wrapped
        // the buffer in between.
        assert!(after > before || after == PRINTK_BUFFER_SIZE - 1);
    }
}
