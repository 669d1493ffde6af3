/// Advertisement classifier and forwarder.
///
/// Recognises iBeacon-shaped advertisements by four fixed-offset bytes, not
/// by walking AD structures, stamps the RSSI into the payload and writes it
/// to the serial line. No per-device state is kept; the only memory is the
/// match counter that drives uplink sampling.
///
/// Expected layout of a matching payload:
/// ```text
///  0..3   flags AD structure (not checked)
///  3      AD length   = 0x1A
///  4      AD type     = 0xFF (manufacturer specific)
///  5..7   company ID  (not checked)
///  7      beacon type = 0x02
///  8      beacon len  = 0x15
///  9..25  proximity UUID
/// 25..30  major, minor, tx power
/// 30      RSSI slot (overwritten)
/// ```
use crate::serial::{emit_hex, emit_text, ByteSink};
use crate::uplink::{self, UplinkRecord, RECORD_LEN, RECORD_OFFSET};

/// Capacity of the scan buffer (largest extended advertising payload).
pub const SCAN_BUFFER_LEN: usize = 255;

/// Number of leading payload bytes dumped per beacon.
pub const DUMP_LEN: usize = 31;

/// Offset overwritten with the RSSI reading.
pub const RSSI_OFFSET: usize = 30;

/// RSSI written when the report carries none.
pub const RSSI_UNKNOWN: i8 = -1;

/// Prefix of a beacon line.
pub const BEACON_PREFIX: &[u8] = b"B: ";

/// Trailer after the hex dump of a beacon line.
pub const BEACON_TRAILER: &[u8] = b"=======\r\n\n";

/// The recognised beacon shape, as named fixed-offset markers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BeaconShape {
    /// AD structure length at offset 3
    pub ad_length: u8,
    /// AD type at offset 4
    pub ad_type: u8,
    /// Beacon sub-type at offset 7
    pub subtype: u8,
    /// Beacon sub-length at offset 8
    pub sublength: u8,
}

impl BeaconShape {
    pub const AD_LENGTH_OFFSET: usize = 3;
    pub const AD_TYPE_OFFSET: usize = 4;
    pub const SUBTYPE_OFFSET: usize = 7;
    pub const SUBLENGTH_OFFSET: usize = 8;

    /// 16-byte UUID + major/minor beacon in a manufacturer-specific AD.
    pub const IBEACON: Self = Self {
        ad_length: 0x1A,
        ad_type: 0xFF,
        subtype: 0x02,
        sublength: 0x15,
    };

    /// True iff all four markers sit at their offsets. Nothing else in the
    /// payload is looked at.
    pub fn matches(&self, payload: &AdvPayload) -> bool {
        let data = payload.as_buffer();
        data[Self::AD_LENGTH_OFFSET] == self.ad_length
            && data[Self::AD_TYPE_OFFSET] == self.ad_type
            && data[Self::SUBTYPE_OFFSET] == self.subtype
            && data[Self::SUBLENGTH_OFFSET] == self.sublength
    }
}

/// Fixed-capacity advertisement payload, built fresh for every report.
///
/// Bytes past the received length stay zero, so every fixed offset used by
/// the classifier is always readable.
#[derive(Clone)]
pub struct AdvPayload {
    buf: [u8; SCAN_BUFFER_LEN],
    len: usize,
}

impl AdvPayload {
    /// Copy `data` into a zeroed buffer, truncating past [`SCAN_BUFFER_LEN`].
    pub fn from_slice(data: &[u8]) -> Self {
        let len = data.len().min(SCAN_BUFFER_LEN);
        let mut buf = [0u8; SCAN_BUFFER_LEN];
        buf[..len].copy_from_slice(&data[..len]);
        Self { buf, len }
    }

    /// Received bytes.
    pub fn as_slice(&self) -> &[u8] {
        &self.buf[..self.len]
    }

    /// The whole zero-padded buffer.
    pub fn as_buffer(&self) -> &[u8; SCAN_BUFFER_LEN] {
        &self.buf
    }

    /// Number of bytes actually received.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Overwrite the RSSI slot with the two's-complement reading.
    pub fn stamp_rssi(&mut self, rssi: i8) {
        self.buf[RSSI_OFFSET] = rssi as u8;
    }

    /// The leading bytes written in a beacon line.
    pub fn dump(&self) -> &[u8] {
        &self.buf[..DUMP_LEN]
    }

    /// Bytes 25..31, the record sent over the uplink.
    pub fn uplink_record(&self) -> UplinkRecord {
        let mut record = [0u8; RECORD_LEN];
        record.copy_from_slice(&self.buf[RECORD_OFFSET..RECORD_OFFSET + RECORD_LEN]);
        record
    }
}

/// What the forwarder did with one advertisement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Not a beacon; nothing emitted.
    Ignored,
    /// Beacon line emitted.
    Forwarded,
    /// Beacon line emitted and the record sent over the uplink.
    ForwardedWithUplink,
}

/// Classifier plus the match counter it owns.
pub struct Forwarder {
    shape: BeaconShape,
    match_count: u32,
}

impl Forwarder {
    pub const fn new() -> Self {
        Self::with_shape(BeaconShape::IBEACON)
    }

    pub const fn with_shape(shape: BeaconShape) -> Self {
        Self {
            shape,
            match_count: 0,
        }
    }

    /// Handle one advertisement report.
    ///
    /// On a match the RSSI (or [`RSSI_UNKNOWN`]) is written into `payload`
    /// before anything is emitted, so both the beacon line and the uplink
    /// record carry it.
    pub fn on_advertisement<S: ByteSink + ?Sized>(
        &mut self,
        payload: &mut AdvPayload,
        rssi: Option<i8>,
        sink: &mut S,
    ) -> Disposition {
        if !self.shape.matches(payload) {
            return Disposition::Ignored;
        }

        let rssi = rssi.unwrap_or(RSSI_UNKNOWN);
        payload.stamp_rssi(rssi);

        emit_text(sink, BEACON_PREFIX);
        emit_hex(sink, payload.dump(), true);
        emit_text(sink, BEACON_TRAILER);

        let index = self.match_count;
        self.match_count = self.match_count.wrapping_add(1);
        log::debug!("Beacon #{} forwarded, rssi {}", index, rssi);

        if uplink::is_sampled(index) {
            uplink::send_record(sink, &payload.uplink_record());
            Disposition::ForwardedWithUplink
        } else {
            Disposition::Forwarded
        }
    }

    /// Beacons forwarded since boot (wrapping).
    pub fn match_count(&self) -> u32 {
        self.match_count
    }
}

impl Default for Forwarder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// 31-byte iBeacon advert with an empty RSSI slot.
    fn ibeacon() -> [u8; 31] {
        let mut p = [0u8; 31];
        p[..3].copy_from_slice(&[0x02, 0x01, 0x06]);
        p[3] = 0x1A;
        p[4] = 0xFF;
        p[5..7].copy_from_slice(&[0x4C, 0x00]);
        p[7] = 0x02;
        p[8] = 0x15;
        for (i, b) in p[9..25].iter_mut().enumerate() {
            *b = 0xA0 + i as u8;
        }
        p[25..30].copy_from_slice(&[0x00, 0x01, 0x00, 0x2A, 0xC5]);
        p
    }

    fn run(fwd: &mut Forwarder, data: &[u8], rssi: Option<i8>) -> (Disposition, String) {
        let mut out: Vec<u8> = Vec::new();
        let mut payload = AdvPayload::from_slice(data);
        let d = fwd.on_advertisement(&mut payload, rssi, &mut out);
        (d, String::from_utf8(out).unwrap())
    }

    // ── Payload buffer ──────────────────────────────────────────────

    #[test]
    fn payload_zero_pads_short_input() {
        let p = AdvPayload::from_slice(&[1, 2, 3]);
        assert_eq!(p.len(), 3);
        assert_eq!(p.as_slice(), &[1, 2, 3]);
        assert!(p.as_buffer()[3..].iter().all(|&b| b == 0));
    }

    #[test]
    fn payload_truncates_oversized_input() {
        let data = [0x55u8; 300];
        let p = AdvPayload::from_slice(&data);
        assert_eq!(p.len(), SCAN_BUFFER_LEN);
    }

    #[test]
    fn stamp_rssi_is_twos_complement() {
        let mut p = AdvPayload::from_slice(&ibeacon());
        p.stamp_rssi(-40);
        assert_eq!(p.as_buffer()[RSSI_OFFSET], 0xD8);
        p.stamp_rssi(-1);
        assert_eq!(p.as_buffer()[RSSI_OFFSET], 0xFF);
    }

    // ── Match predicate ─────────────────────────────────────────────

    #[test]
    fn ibeacon_shape_matches() {
        assert!(BeaconShape::IBEACON.matches(&AdvPayload::from_slice(&ibeacon())));
    }

    #[test]
    fn each_marker_is_required() {
        for offset in [3usize, 4, 7, 8] {
            let mut data = ibeacon();
            data[offset] ^= 0x01;
            assert!(
                !BeaconShape::IBEACON.matches(&AdvPayload::from_slice(&data)),
                "offset {offset} should be checked"
            );
        }
    }

    #[test]
    fn other_bytes_are_ignored() {
        let mut data = ibeacon();
        for i in (0..3).chain(5..7).chain(9..31) {
            data[i] = 0xEE;
        }
        assert!(BeaconShape::IBEACON.matches(&AdvPayload::from_slice(&data)));
    }

    #[test]
    fn short_and_empty_payloads_never_match() {
        assert!(!BeaconShape::IBEACON.matches(&AdvPayload::from_slice(&[])));
        assert!(!BeaconShape::IBEACON.matches(&AdvPayload::from_slice(&ibeacon()[..8])));
    }

    // ── Forwarder ───────────────────────────────────────────────────

    #[test]
    fn forwards_beacon_with_rssi() {
        let mut fwd = Forwarder::new();
        // Burn the first (uplink-sampled) match so only the beacon line is emitted.
        run(&mut fwd, &ibeacon(), Some(-40));

        let (d, out) = run(&mut fwd, &ibeacon(), Some(-40));
        assert_eq!(d, Disposition::Forwarded);
        assert_eq!(
            out,
            "B: 02:01:06:1A:FF:4C:00:02:15:\
             A0:A1:A2:A3:A4:A5:A6:A7:A8:A9:AA:AB:AC:AD:AE:AF:\
             00:01:00:2A:C5:D8\r\n=======\r\n\n"
        );
    }

    #[test]
    fn missing_rssi_writes_unknown_sentinel() {
        let mut fwd = Forwarder::new();
        let (_, out) = run(&mut fwd, &ibeacon(), None);
        let line = out.lines().next().unwrap();
        assert!(line.ends_with(":FF"));
    }

    #[test]
    fn rssi_overwrites_existing_slot() {
        let mut fwd = Forwarder::new();
        let mut data = ibeacon();
        data[30] = 0x77;
        let mut payload = AdvPayload::from_slice(&data);
        fwd.on_advertisement(&mut payload, Some(-90), &mut Vec::<u8>::new());
        assert_eq!(payload.as_buffer()[RSSI_OFFSET], (-90i8) as u8);
    }

    #[test]
    fn mismatch_is_silent_and_not_counted() {
        let mut fwd = Forwarder::new();
        let mut data = ibeacon();
        data[8] = 0x14;
        let (d, out) = run(&mut fwd, &data, Some(-40));
        assert_eq!(d, Disposition::Ignored);
        assert!(out.is_empty());
        assert_eq!(fwd.match_count(), 0);
    }

    #[test]
    fn first_match_also_goes_to_uplink() {
        let mut fwd = Forwarder::new();
        let (d, out) = run(&mut fwd, &ibeacon(), Some(-40));
        assert_eq!(d, Disposition::ForwardedWithUplink);
        assert!(out.ends_with("=======\r\n\nAT&RC\r\nAT&SF=0001002AC5D8\r\n"));
        assert_eq!(fwd.match_count(), 1);
    }

    #[test]
    fn uplink_fires_on_matches_1_257_513() {
        let mut fwd = Forwarder::new();
        let mut sampled = Vec::new();
        for n in 1..=600u32 {
            let (d, _) = run(&mut fwd, &ibeacon(), Some(-60));
            if d == Disposition::ForwardedWithUplink {
                sampled.push(n);
            }
        }
        assert_eq!(sampled, vec![1, 257, 513]);
    }

    #[test]
    fn mismatches_do_not_shift_sampling() {
        let mut fwd = Forwarder::new();
        let mut noise = ibeacon();
        noise[4] = 0x16;
        run(&mut fwd, &ibeacon(), Some(-60));
        for _ in 0..1000 {
            run(&mut fwd, &noise, Some(-60));
        }
        for _ in 2..257 {
            assert_eq!(run(&mut fwd, &ibeacon(), Some(-60)).0, Disposition::Forwarded);
        }
        assert_eq!(run(&mut fwd, &ibeacon(), Some(-60)).0, Disposition::ForwardedWithUplink);
    }
}
