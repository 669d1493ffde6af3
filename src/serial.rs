//! Serial transport: byte-stream emitter and receive-side echo.
//!
//! Everything the device says goes out one byte at a time through a
//! [`ByteSink`]. The emitter does no buffering or retry of its own; whether a
//! write blocks is up to the sink (the firmware's UART FIFO).

/// Serial baud rate of the protocol UART (modem line)
pub const SERIAL_BAUD: u32 = 9600;

/// UART receive buffer size, also the longest line [`LineEcho`] accumulates
pub const UART_RX_BUF_SIZE: usize = 512;

/// Longest chunk handed to the UART in one go: a beacon line plus its
/// uplink commands (107 + 27 bytes), with headroom.
pub const MAX_LINE_LEN: usize = 160;

/// Outbound chunk built by the forwarder or the echo, then queued for the UART.
pub type LineBuffer = heapless::Vec<u8, MAX_LINE_LEN>;

/// Line terminator appended by [`emit_hex`]
pub const CRLF: &[u8] = b"\r\n";

/// Printed once at boot, before the first scan request.
pub const BANNER: &[u8] =
    b"\r\n\r\n------------------\r\n| BEACON SCANNER |\r\n------------------\r\n";

/// Outbound byte sink. Assumed to always accept a byte.
pub trait ByteSink {
    fn write_byte(&mut self, byte: u8);
}

impl<S: ByteSink + ?Sized> ByteSink for &mut S {
    fn write_byte(&mut self, byte: u8) {
        (**self).write_byte(byte);
    }
}

/// Bounded in-memory sink. Bytes past capacity are dropped.
impl<const N: usize> ByteSink for heapless::Vec<u8, N> {
    fn write_byte(&mut self, byte: u8) {
        let _ = self.push(byte);
    }
}

#[cfg(test)]
impl ByteSink for std::vec::Vec<u8> {
    fn write_byte(&mut self, byte: u8) {
        self.push(byte);
    }
}

/// Write `text` verbatim. No escaping, no terminator.
pub fn emit_text<S: ByteSink + ?Sized>(sink: &mut S, text: &[u8]) {
    for &b in text {
        sink.write_byte(b);
    }
}

/// Write `data` as uppercase hex, two characters per byte, optionally
/// colon-separated, followed by CRLF.
///
/// Empty input writes nothing, not even the terminator.
pub fn emit_hex<S: ByteSink + ?Sized>(sink: &mut S, data: &[u8], separate_with_colons: bool) {
    let mut remaining = data.len();
    for &b in data {
        remaining -= 1;
        sink.write_byte(hex_digit(b >> 4));
        sink.write_byte(hex_digit(b & 0x0F));

        if remaining > 0 {
            if separate_with_colons {
                sink.write_byte(b':');
            }
        } else {
            emit_text(sink, CRLF);
        }
    }
}

/// Print the boot banner.
pub fn emit_banner<S: ByteSink + ?Sized>(sink: &mut S) {
    emit_text(sink, BANNER);
}

#[inline]
fn hex_digit(nibble: u8) -> u8 {
    if nibble <= 9 {
        b'0' + nibble
    } else {
        b'A' + nibble - 10
    }
}

// ── Receive side ───────────────────────────────────────────────────────

/// Receive-side line accumulator with local echo.
///
/// Every byte fed in is echoed straight back to the sink, so a terminal on
/// the line sees what it typed and the modem's replies land in the same
/// stream. Lines end on `\n`, `\r`, or a full buffer; the terminator is kept.
pub struct LineEcho {
    buf: [u8; UART_RX_BUF_SIZE],
    pos: usize,
}

impl LineEcho {
    pub const fn new() -> Self {
        Self {
            buf: [0; UART_RX_BUF_SIZE],
            pos: 0,
        }
    }

    /// Echo `byte` and append it to the current line. Returns the completed
    /// line when `byte` finishes one.
    pub fn feed<S: ByteSink + ?Sized>(&mut self, byte: u8, echo: &mut S) -> Option<&[u8]> {
        echo.write_byte(byte);

        self.buf[self.pos] = byte;
        self.pos += 1;

        if byte == b'\n' || byte == b'\r' || self.pos >= self.buf.len() {
            if self.pos >= self.buf.len() && byte != b'\n' && byte != b'\r' {
                log::warn!("Serial line reached {} bytes without terminator", self.buf.len());
            }
            let len = self.pos;
            self.pos = 0;
            Some(&self.buf[..len])
        } else {
            None
        }
    }

    /// Bytes accumulated towards the current line.
    pub fn pending(&self) -> usize {
        self.pos
    }
}

impl Default for LineEcho {
    fn default() -> Self {
        Self::new()
    }
}
