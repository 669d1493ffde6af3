/// Secondary forwarding through a Sigfox AT modem sharing the serial line.
///
/// The uplink is tiny and slow, so only one beacon in every
/// [`UPLINK_SAMPLE_PERIOD`] is sent, and only its 6-byte tail.
use crate::serial::{emit_hex, emit_text, ByteSink};

/// Matches between two uplink samples. Fixed at build time.
pub const UPLINK_SAMPLE_PERIOD: u32 = 256;

/// Reset the modem's macro channel before a frame.
pub const AT_RESET_CHANNEL: &[u8] = b"AT&RC\r\n";

/// Send-frame command prefix; the hex payload follows.
pub const AT_SEND_FRAME: &[u8] = b"AT&SF=";

/// Offset of the condensed record inside the advertisement payload.
pub const RECORD_OFFSET: usize = 25;

/// Length of the condensed record: major, minor, tx power, RSSI slot.
pub const RECORD_LEN: usize = 6;

/// Condensed beacon record sent over the uplink.
pub type UplinkRecord = [u8; RECORD_LEN];

/// Whether the match with zero-based index `match_index` is sampled.
#[inline]
pub fn is_sampled(match_index: u32) -> bool {
    match_index % UPLINK_SAMPLE_PERIOD == 0
}

/// Emit the two-command sequence that sends `record`.
pub fn send_record<S: ByteSink + ?Sized>(sink: &mut S, record: &UplinkRecord) {
    emit_text(sink, AT_RESET_CHANNEL);
    emit_text(sink, AT_SEND_FRAME);
    emit_hex(sink, record, false);
    log::debug!("Uplink frame queued: {:02X?}", record);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sampling_period() {
        assert!(is_sampled(0));
        assert!(!is_sampled(1));
        assert!(!is_sampled(255));
        assert!(is_sampled(256));
        assert!(is_sampled(512));
        assert!(is_sampled(u32::MAX - 255));
    }

    #[test]
    fn send_record_wire_format() {
        let mut out: Vec<u8> = Vec::new();
        send_record(&mut out, &[0x00, 0x2A, 0x00, 0x07, 0xC5, 0xD8]);
        assert_eq!(out, b"AT&RC\r\nAT&SF=002A0007C5D8\r\n");
    }
}
