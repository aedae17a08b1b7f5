use crate::Error;
use std::ops::Deref;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

pub const HEADER: [u8; 4] = [0xa5; 4];
pub const FOOTER: u8 = 0x55;

const HEADER_LENGTH: usize = HEADER.len();
// checksum(2) + footer(1)
const TRAILER_LENGTH: usize = 3;
// sequence(1) + entry count(1)
const PREAMBLE_LENGTH: usize = 2;
pub const RECORD_LENGTH: usize = 10;
pub const MAX_ENTRIES: usize = 30;

/// Frame without any records.
pub const MIN_FRAME_LENGTH: usize = HEADER_LENGTH + PREAMBLE_LENGTH + TRAILER_LENGTH;
pub const MAX_FRAME_LENGTH: usize = MIN_FRAME_LENGTH + MAX_ENTRIES * RECORD_LENGTH;

/// Additive 16 bit checksum over the payload bytes.
pub fn checksum(payload: &[u8]) -> u16 {
    let mut checksum: u16 = 0;
    for b in payload {
        checksum = checksum.wrapping_add(u16::from(*b));
    }
    checksum
}

/// Reverses the value and factor groups of every record in place.
///
/// The controller writes these two 4 byte groups in the opposite byte order from the rest
/// of the message. Records start after the sequence and entry count bytes; a group pair is
/// only touched when all 8 bytes are inside `payload`. Applying it twice is a no-op.
pub fn normalize(payload: &mut [u8]) {
    let mut offset = PREAMBLE_LENGTH + 2;
    while offset + 8 <= payload.len() {
        payload[offset..offset + 4].reverse();
        payload[offset + 4..offset + 8].reverse();
        offset += RECORD_LENGTH;
    }
}

fn validate_len(frame: &[u8]) -> Result<(), Error> {
    // MIN_FRAME_LENGTH < RECORD_LENGTH, so this is the "length mod 10 == 9" class
    if frame.len() % RECORD_LENGTH != MIN_FRAME_LENGTH || frame.len() > MAX_FRAME_LENGTH {
        log::warn!("Invalid frame size - received={}", frame.len());
        return Err(Error::MalformedLength(frame.len()));
    }
    Ok(())
}

fn validate_sentinels(frame: &[u8]) -> Result<(), Error> {
    if frame[..HEADER_LENGTH] != HEADER || frame[frame.len() - 1] != FOOTER {
        log::warn!("Invalid frame sentinel - buffer={frame:02X?}");
        return Err(Error::BadSentinel);
    }
    Ok(())
}

fn validate_checksum(frame: &[u8], payload: &[u8]) -> Result<(), Error> {
    let calculated = checksum(payload);
    let at = frame.len() - TRAILER_LENGTH;
    let received = u16::from_le_bytes([frame[at], frame[at + 1]]);
    if calculated != received {
        log::warn!(
            "Invalid checksum - calculated={calculated:04X} received={received:04X} buffer={frame:02X?}"
        );
        return Err(Error::ChecksumMismatch {
            calculated,
            received,
        });
    }
    Ok(())
}

/// Frame contents between header and checksum, after [`normalize`].
///
/// Only obtainable through [`NormalizedPayload::validate`], so it always belongs to a
/// frame that passed length, sentinel and checksum checks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedPayload(Vec<u8>);

impl NormalizedPayload {
    pub fn validate(frame: &[u8]) -> Result<Self, Error> {
        validate_len(frame)?;
        validate_sentinels(frame)?;
        let mut payload = frame[HEADER_LENGTH..frame.len() - TRAILER_LENGTH].to_vec();
        normalize(&mut payload);
        validate_checksum(frame, &payload)?;
        Ok(Self(payload))
    }

    // The length class guarantees at least the two preamble bytes.
    pub fn sequence(&self) -> u8 {
        self.0[0]
    }

    pub fn entry_count(&self) -> u8 {
        self.0[1]
    }
}

impl Deref for NormalizedPayload {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct DecodedEntry {
    pub channel_id: u8,
    pub raw_value: u32,
    pub raw_factor: u32,
    pub scaled_value: f64,
}

impl DecodedEntry {
    /// A factor of zero means the raw value is used unscaled.
    pub fn new(channel_id: u8, raw_value: u32, raw_factor: u32) -> Self {
        let scaled_value = if raw_factor == 0 {
            f64::from(raw_value)
        } else {
            f64::from(raw_value) / f64::from(raw_factor)
        };
        Self {
            channel_id,
            raw_value,
            raw_factor,
            scaled_value,
        }
    }

    fn decode(payload: &[u8], offset: usize) -> Result<Self, Error> {
        let record = payload
            .get(offset..offset + RECORD_LENGTH)
            .ok_or(Error::TruncatedRecord {
                offset,
                length: payload.len(),
            })?;
        // record[1] is reserved
        Ok(Self::new(
            record[0],
            u32::from_be_bytes([record[2], record[3], record[4], record[5]]),
            u32::from_be_bytes([record[6], record[7], record[8], record[9]]),
        ))
    }
}

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct DecodedMessage {
    pub sequence: u8,
    /// Entry count announced by the frame.
    pub entry_count: u8,
    pub entries: Vec<DecodedEntry>,
    /// `false` when the announced entries did not fit into the payload.
    pub complete: bool,
}

impl DecodedMessage {
    pub fn new(sequence: u8, entries: Vec<DecodedEntry>) -> Self {
        Self {
            sequence,
            entry_count: u8::try_from(entries.len()).unwrap_or(u8::MAX),
            entries,
            complete: true,
        }
    }

    /// Validates and decodes a frame without duplicate filtering.
    pub fn decode(frame: &[u8]) -> Result<Self, Error> {
        Ok(Self::from_payload(&NormalizedPayload::validate(frame)?))
    }

    pub fn from_payload(payload: &NormalizedPayload) -> Self {
        let sequence = payload.sequence();
        let entry_count = payload.entry_count();
        let mut entries = Vec::with_capacity(usize::from(entry_count).min(MAX_ENTRIES));
        let mut complete = true;

        let end = RECORD_LENGTH * usize::from(entry_count);
        for offset in (PREAMBLE_LENGTH..end).step_by(RECORD_LENGTH) {
            match DecodedEntry::decode(payload, offset) {
                Ok(entry) => {
                    log::trace!(
                        "Message #{} channel={:02X} value={} factor={} scaled={}",
                        sequence,
                        entry.channel_id,
                        entry.raw_value,
                        entry.raw_factor,
                        entry.scaled_value
                    );
                    entries.push(entry);
                }
                Err(err) => {
                    log::warn!(
                        "Message #{sequence} incomplete after {} of {entry_count} entries: {err}",
                        entries.len()
                    );
                    complete = false;
                    break;
                }
            }
        }

        Self {
            sequence,
            entry_count,
            entries,
            complete,
        }
    }

    /// Builds the wire frame for this message.
    pub fn encode(&self) -> Result<Vec<u8>, Error> {
        if self.entries.len() > MAX_ENTRIES {
            return Err(Error::RangeError);
        }
        let mut tx_buffer =
            Vec::with_capacity(MIN_FRAME_LENGTH + self.entries.len() * RECORD_LENGTH);
        tx_buffer.extend_from_slice(&HEADER);
        tx_buffer.push(self.sequence);
        tx_buffer.push(self.entries.len() as u8);
        for entry in &self.entries {
            tx_buffer.push(entry.channel_id);
            tx_buffer.push(0x00);
            tx_buffer.extend_from_slice(&entry.raw_value.to_le_bytes());
            tx_buffer.extend_from_slice(&entry.raw_factor.to_le_bytes());
        }
        // the sum does not depend on byte order, no need to normalize first
        let checksum = checksum(&tx_buffer[HEADER_LENGTH..]);
        tx_buffer.extend_from_slice(&checksum.to_le_bytes());
        tx_buffer.push(FOOTER);
        Ok(tx_buffer)
    }

    /// `(channel_id, scaled_value)` pairs in payload order.
    pub fn readings(&self) -> impl Iterator<Item = (u8, f64)> + '_ {
        self.entries
            .iter()
            .map(|entry| (entry.channel_id, entry.scaled_value))
    }
}

/// Duplicate suppression state, one per frame source.
///
/// Holds the sequence counter of the last validated frame. The controller increments an
/// 8 bit counter per frame, so a repeat after exactly 256 frames is suppressed as well.
#[derive(Debug, Clone, Default)]
pub struct DecoderState {
    last_sequence: Option<u8>,
}

impl DecoderState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn last_sequence(&self) -> Option<u8> {
        self.last_sequence
    }

    /// Records `sequence` and fails with [`Error::DuplicateSequence`] if it equals the
    /// previous one.
    pub fn check_sequence(&mut self, sequence: u8) -> Result<(), Error> {
        if self.last_sequence.replace(sequence) == Some(sequence) {
            log::debug!("Drop repeated message #{sequence}");
            return Err(Error::DuplicateSequence(sequence));
        }
        Ok(())
    }

    /// Validates, filters and decodes one frame.
    ///
    /// Rejected frames leave the state untouched.
    pub fn decode(&mut self, frame: &[u8]) -> Result<DecodedMessage, Error> {
        log::trace!("decode: {frame:02X?}");
        let payload = NormalizedPayload::validate(frame)?;
        self.check_sequence(payload.sequence())?;
        Ok(DecodedMessage::from_payload(&payload))
    }
}
