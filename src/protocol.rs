//! GATT Weight Measurement (0x2A9C) packet decoding.
//!
//! The packet is little-endian and variable length: a 16-bit flags bitfield,
//! two reserved bytes, a run of optional fields whose presence and width are
//! driven by the flag bits, then the 16-bit raw weight.

use crate::reader::{PacketReader, Truncated};
use crate::types::WeightReading;
use embassy_time::Instant;
use log::debug;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

pub const WEIGHT_SCALE_SERVICE: u16 = 0x181B;
pub const WEIGHT_MEASUREMENT_CHAR: u16 = 0x2A9C;

/// Expands a 16-bit assigned number onto the Bluetooth base UUID
/// (0000xxxx-0000-1000-8000-00805f9b34fb).
pub fn bluetooth_uuid(short: u16) -> Uuid {
    const BASE: u128 = 0x0000_0000_0000_1000_8000_00805F9B34FB;
    Uuid::from_u128(BASE | (u128::from(short) << 96))
}

const FLAG_IMPERIAL_UNITS: u16 = 1 << 0;
const FLAG_WEIGHT_PRESENT: u16 = 1 << 10;
const FLAG_STABILIZED: u16 = 1 << 13;
const FLAG_READING_INVALID: u16 = 1 << 15;

/// Bytes contributed by each optional field, indexed by flag bit. Bit 0 only
/// toggles the unit of the weight field itself, so it adds no skip. Bits 1-9
/// are timestamp, user id and body-composition fields of fixed width.
const OPTIONAL_FIELD_WIDTHS: [usize; 10] = [0, 7, 1, 2, 2, 2, 2, 2, 2, 2];

/// 0.01 lb expressed in kilograms.
const LB_RESOLUTION_KG: f64 = 0.00453592;
const SI_RESOLUTION_KG: f64 = 0.005;

/// How the stability counter (and the invalid marker) are interpreted. Scales
/// in the field disagree on which of these the firmware actually emits, so the
/// choice is explicit rather than guessed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DecodePolicy {
    /// Bit 15 invalidates the reading; the counter tracks consecutive packets
    /// with the stabilized bit (13) set.
    StableFlag,
    /// Bit 15 is ignored; the counter tracks consecutive packets decoding to
    /// an identical kilogram value.
    RepeatValue,
}

/// Outcome of decoding one notification payload.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Decoded {
    /// A new reading superseding the previous one.
    Reading(WeightReading),
    /// The scale marked the reading invalid; any held reading must be cleared.
    Invalidated,
    /// The packet carried no usable weight and is ignored.
    NoChange,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("notification carried no payload")]
    MissingPayload,
    #[error(transparent)]
    Truncated(#[from] Truncated),
}

/// Decodes a single Weight Measurement notification. A packet whose flags
/// claim more bytes than the buffer holds is rejected whole; no partial state
/// is ever produced.
pub fn decode_measurement(
    payload: Option<&[u8]>,
    previous: Option<&WeightReading>,
    policy: DecodePolicy,
) -> Result<Decoded, DecodeError> {
    let data = payload.ok_or(DecodeError::MissingPayload)?;
    debug!("Decoding measurement: {:02X?}", data);

    let mut reader = PacketReader::new(data);
    let flags = reader.read_u16_le()?;

    if policy == DecodePolicy::StableFlag && flags & FLAG_READING_INVALID != 0 {
        return Ok(Decoded::Invalidated);
    }

    if flags & FLAG_WEIGHT_PRESENT == 0 {
        return Ok(Decoded::NoChange);
    }

    // Two reserved bytes follow the flags, then the optional fields in
    // ascending bit order.
    reader.skip(2)?;
    for (bit, &width) in OPTIONAL_FIELD_WIDTHS.iter().enumerate() {
        if flags & (1 << bit) != 0 {
            reader.skip(width)?;
        }
    }

    let raw = reader.read_u16_le()?;
    let value_kg = if flags & FLAG_IMPERIAL_UNITS != 0 {
        f64::from(raw) * LB_RESOLUTION_KG
    } else {
        f64::from(raw) * SI_RESOLUTION_KG
    };

    let stability_count = match policy {
        DecodePolicy::StableFlag => {
            if flags & FLAG_STABILIZED != 0 {
                previous.map_or(0, |p| p.stability_count) + 1
            } else {
                0
            }
        }
        DecodePolicy::RepeatValue => match previous {
            Some(p) if p.value_kg == value_kg => p.stability_count + 1,
            _ => 0,
        },
    };

    Ok(Decoded::Reading(WeightReading {
        value_kg,
        timestamp: Instant::now(),
        stability_count,
    }))
}
