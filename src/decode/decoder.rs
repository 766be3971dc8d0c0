use tracing::trace;

use crate::core::catalog::{ByteOrder, MessageDefinition, SignalDefinition, SignalId, ValueType};

/// What happened to the signals of one decoded message
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DecodeOutcome {
    /// Signals decoded and handed to the sink
    pub decoded: usize,
    /// Signals gated off by their multiplexor
    pub inactive: usize,
    /// Signals whose bits lie outside the received payload
    pub unfit: usize,
}

/// Decode every live signal of `message` from `payload`
///
/// Multiplexed signals are only emitted when their multiplexor currently
/// carries the matching selector; everything else in the message is skipped.
pub fn decode_message<F>(message: &MessageDefinition, payload: &[u8], mut sink: F) -> DecodeOutcome
where
    F: FnMut(SignalId, f64),
{
    let mut outcome = DecodeOutcome::default();

    for (index, signal) in message.signals.iter().enumerate() {
        if !is_active(message, index, payload) {
            outcome.inactive += 1;
            continue;
        }

        match decode_signal(signal, payload) {
            Some(value) => {
                if !signal.in_range(value) {
                    trace!("Signal '{}' decoded {} outside its declared range", signal.name, value);
                }
                sink(message.signal_id(index), value);
                outcome.decoded += 1;
            }
            None => outcome.unfit += 1,
        }
    }

    outcome
}

/// Whether the signal at `index` is live for this payload
fn is_active(message: &MessageDefinition, index: usize, payload: &[u8]) -> bool {
    let signal = &message.signals[index];
    match (signal.multiplex.selector(), signal.controller) {
        (None, _) => true,
        (Some(selector), Some(controller)) => {
            let mux = &message.signals[controller];
            is_active(message, controller, payload)
                && extract_bits(payload, mux.start_bit, mux.bit_length, mux.byte_order) == Some(selector)
        }
        // Gated signal with no resolved multiplexor: never live
        (Some(_), None) => false,
    }
}

/// Decode a single signal to its physical value
pub fn decode_signal(signal: &SignalDefinition, payload: &[u8]) -> Option<f64> {
    let raw = extract_bits(payload, signal.start_bit, signal.bit_length, signal.byte_order)?;
    Some(raw_to_physical(signal, raw))
}

/// Apply signedness and the affine transform
pub fn raw_to_physical(signal: &SignalDefinition, raw: u64) -> f64 {
    let raw = match signal.value_type {
        ValueType::Signed => sign_extend(raw, signal.bit_length) as f64,
        ValueType::Unsigned => raw as f64,
    };
    raw * signal.factor + signal.offset
}

/// Encode a physical value into payload bytes (inverse of [`decode_signal`])
pub fn encode_physical(data: &mut [u8], signal: &SignalDefinition, physical_value: f64) -> bool {
    let raw = ((physical_value - signal.offset) / signal.factor).round() as i64;

    let raw_unsigned = if signal.bit_length >= 64 {
        raw as u64
    } else {
        (raw as u64) & ((1u64 << signal.bit_length) - 1)
    };

    insert_bits(data, raw_unsigned, signal.start_bit, signal.bit_length, signal.byte_order)
}

/// Extract bits from a byte array
///
/// # Arguments
/// * `data` - The frame payload
/// * `start_bit` - Starting bit position (DBC notation; the MSB for Motorola)
/// * `bit_length` - Number of bits to extract
/// * `byte_order` - Intel (little-endian) or Motorola (big-endian)
///
/// Returns `None` when any bit of the field lies outside `data`.
pub fn extract_bits(data: &[u8], start_bit: u16, bit_length: u8, byte_order: ByteOrder) -> Option<u64> {
    if bit_length == 0 || bit_length > 64 {
        return None;
    }

    let start_bit = start_bit as usize;
    let bit_length = bit_length as usize;

    match byte_order {
        ByteOrder::Intel => {
            if start_bit + bit_length > data.len() * 8 {
                return None;
            }

            // Bits are numbered LSB first within bytes, sequential across bytes
            let mut result: u64 = 0;
            let mut bits_remaining = bit_length;
            let mut current_byte = start_bit / 8;
            let mut current_bit = start_bit % 8;

            while bits_remaining > 0 {
                let bits_to_read = bits_remaining.min(8 - current_bit);
                // u32 so an 8-bit mask does not overflow
                let mask = (((1u32 << bits_to_read) - 1) << current_bit) as u8;
                let bits = ((data[current_byte] & mask) >> current_bit) as u64;

                result |= bits << (bit_length - bits_remaining);

                bits_remaining -= bits_to_read;
                current_bit = 0;
                current_byte += 1;
            }

            Some(result)
        }
        ByteOrder::Motorola => {
            // Walk from the MSB down the DBC sawtooth numbering
            let mut result: u64 = 0;
            let mut position = start_bit;
            for remaining in (0..bit_length).rev() {
                let byte = *data.get(position / 8)?;
                let bit = (byte >> (position % 8)) & 1;
                result |= (bit as u64) << remaining;
                if remaining > 0 {
                    position = next_motorola_bit(position);
                }
            }
            Some(result)
        }
    }
}

/// Insert bits into a byte array
pub fn insert_bits(data: &mut [u8], value: u64, start_bit: u16, bit_length: u8, byte_order: ByteOrder) -> bool {
    if bit_length == 0 || bit_length > 64 {
        return false;
    }

    let start_bit = start_bit as usize;
    let bit_length = bit_length as usize;

    match byte_order {
        ByteOrder::Intel => {
            if start_bit + bit_length > data.len() * 8 {
                return false;
            }

            let mut bits_remaining = bit_length;
            let mut current_byte = start_bit / 8;
            let mut current_bit = start_bit % 8;
            let mut value_shift = 0u32;

            while bits_remaining > 0 {
                let bits_to_write = bits_remaining.min(8 - current_bit);
                let bits = ((value >> value_shift) & ((1u64 << bits_to_write) - 1)) as u8;

                let clear_mask = !((((1u32 << bits_to_write) - 1) << current_bit) as u8);
                data[current_byte] = (data[current_byte] & clear_mask) | (bits << current_bit);

                bits_remaining -= bits_to_write;
                value_shift += bits_to_write as u32;
                current_bit = 0;
                current_byte += 1;
            }

            true
        }
        ByteOrder::Motorola => {
            let positions = motorola_positions(start_bit, bit_length);
            if positions.iter().any(|&p| p / 8 >= data.len()) {
                return false;
            }
            for (i, position) in positions.into_iter().enumerate() {
                let bit = ((value >> (bit_length - 1 - i)) & 1) as u8;
                let byte = &mut data[position / 8];
                *byte = (*byte & !(1 << (position % 8))) | (bit << (position % 8));
            }
            true
        }
    }
}

/// Physical bit positions (`byte * 8 + bit`) a signal occupies
pub fn signal_bit_positions(signal: &SignalDefinition) -> Vec<usize> {
    let start = signal.start_bit as usize;
    let length = signal.bit_length as usize;
    match signal.byte_order {
        ByteOrder::Intel => (start..start + length).collect(),
        ByteOrder::Motorola => motorola_positions(start, length),
    }
}

/// Motorola positions from MSB to LSB
fn motorola_positions(start_bit: usize, bit_length: usize) -> Vec<usize> {
    let mut positions = Vec::with_capacity(bit_length);
    let mut position = start_bit;
    for i in 0..bit_length {
        positions.push(position);
        if i + 1 < bit_length {
            position = next_motorola_bit(position);
        }
    }
    positions
}

/// Next less significant bit in DBC Motorola numbering:
/// 7..0 in byte 0, then 15..8 in byte 1, and so on
fn next_motorola_bit(position: usize) -> usize {
    if position % 8 == 0 {
        position + 15
    } else {
        position - 1
    }
}

/// Sign extend a value to 64 bits
pub fn sign_extend(value: u64, bit_length: u8) -> i64 {
    if bit_length == 0 || bit_length >= 64 {
        return value as i64;
    }

    let sign_bit = 1u64 << (bit_length - 1);
    if value & sign_bit != 0 {
        (value | !((1u64 << bit_length) - 1)) as i64
    } else {
        value as i64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::catalog::{Catalog, Multiplex};

    #[test]
    fn test_extract_bits_intel_single_byte() {
        let data = [0b11010010u8];
        // Extract bits 2-5 (4 bits starting at bit 2)
        let result = extract_bits(&data, 2, 4, ByteOrder::Intel);
        assert_eq!(result, Some(0b0100));
    }

    #[test]
    fn test_extract_bits_intel_multi_byte() {
        let data = [0xCDu8, 0xABu8];
        let result = extract_bits(&data, 0, 16, ByteOrder::Intel);
        assert_eq!(result, Some(0xABCD));
    }

    #[test]
    fn test_extract_bits_motorola() {
        // 16-bit big-endian value 0x1234 starting at MSB bit 7
        let data = [0x12u8, 0x34u8];
        assert_eq!(extract_bits(&data, 7, 16, ByteOrder::Motorola), Some(0x1234));
        // Upper nibble of byte 0
        assert_eq!(extract_bits(&data, 7, 4, ByteOrder::Motorola), Some(0x1));
    }

    #[test]
    fn test_extract_outside_payload() {
        let data = [0xFFu8];
        assert_eq!(extract_bits(&data, 4, 8, ByteOrder::Intel), None);
        assert_eq!(extract_bits(&data, 7, 16, ByteOrder::Motorola), None);
        assert_eq!(extract_bits(&data, 0, 0, ByteOrder::Intel), None);
    }

    #[test]
    fn test_insert_bits_intel() {
        let mut data = [0u8, 0u8];
        insert_bits(&mut data, 0xABCD, 0, 16, ByteOrder::Intel);
        assert_eq!(data, [0xCD, 0xAB]);
    }

    #[test]
    fn test_insert_bits_motorola() {
        let mut data = [0u8; 2];
        assert!(insert_bits(&mut data, 0x1234, 7, 16, ByteOrder::Motorola));
        assert_eq!(data, [0x12, 0x34]);
    }

    #[test]
    fn test_sign_extend() {
        assert_eq!(sign_extend(5, 4), 5);
        assert_eq!(sign_extend(0b1111, 4), -1);
        assert_eq!(sign_extend(0x80, 8), -128);
    }

    #[test]
    fn test_physical_round_trip() {
        let signals = [
            SignalDefinition::new("A", 4, 12).with_scaling(0.5, -40.0),
            SignalDefinition::new("B", 23, 10)
                .with_layout(ByteOrder::Motorola, ValueType::Signed)
                .with_scaling(0.1, 0.0),
            SignalDefinition::new("C", 32, 32)
                .with_layout(ByteOrder::Intel, ValueType::Signed)
                .with_scaling(0.001, 100.0),
        ];
        let values = [123.5, -12.3, 99.5];

        for (signal, value) in signals.iter().zip(values) {
            let mut data = [0u8; 8];
            assert!(encode_physical(&mut data, signal, value));
            let decoded = decode_signal(signal, &data).unwrap();
            assert!(
                (decoded - value).abs() < signal.factor / 2.0 + 1e-9,
                "{}: {} != {}",
                signal.name,
                decoded,
                value
            );
        }
    }

    #[test]
    fn test_bit_positions() {
        let intel = SignalDefinition::new("I", 6, 4);
        assert_eq!(signal_bit_positions(&intel), vec![6, 7, 8, 9]);

        let motorola = SignalDefinition::new("M", 1, 4).with_layout(ByteOrder::Motorola, ValueType::Unsigned);
        assert_eq!(signal_bit_positions(&motorola), vec![1, 0, 15, 14]);
    }

    fn multiplexed_catalog() -> Catalog {
        Catalog::new(vec![MessageDefinition::new(0x200, "Status", 8)
            .with_signal(SignalDefinition::new("Page", 0, 8).with_multiplex(Multiplex::Multiplexor))
            .with_signal(SignalDefinition::new("Counter", 56, 8))
            .with_signal(SignalDefinition::new("Oil", 8, 16).with_multiplex(Multiplex::multiplexed(1)))
            .with_signal(SignalDefinition::new("Fuel", 8, 16).with_multiplex(Multiplex::multiplexed(2)))
            .with_signal(SignalDefinition::new("SubPage", 24, 8).with_multiplex(Multiplex::Both {
                selector: 2,
                multiplexor: None,
            }))
            .with_signal(SignalDefinition::new("Deep", 32, 8).with_multiplex(Multiplex::Multiplexed {
                selector: 7,
                multiplexor: Some("SubPage".to_string()),
            }))])
        .unwrap()
    }

    fn decoded_names(catalog: &Catalog, payload: &[u8]) -> (Vec<String>, DecodeOutcome) {
        let mut names = Vec::new();
        let outcome = decode_message(&catalog.messages()[0], payload, |id, _| {
            names.push(catalog.signal(id).unwrap().name.clone());
        });
        (names, outcome)
    }

    #[test]
    fn test_multiplex_filtering() {
        let catalog = multiplexed_catalog();

        let (names, outcome) = decoded_names(&catalog, &[1, 0x10, 0, 7, 9, 0, 0, 3]);
        assert_eq!(names, vec!["Page", "Counter", "Oil"]);
        assert_eq!(outcome.inactive, 3);

        let (names, _) = decoded_names(&catalog, &[2, 0x10, 0, 7, 9, 0, 0, 3]);
        assert_eq!(names, vec!["Page", "Counter", "Fuel", "SubPage", "Deep"]);

        // Nested multiplexor active but on another selector
        let (names, _) = decoded_names(&catalog, &[2, 0x10, 0, 6, 9, 0, 0, 3]);
        assert_eq!(names, vec!["Page", "Counter", "Fuel", "SubPage"]);

        // Unknown selector: only the plain signals survive
        let (names, _) = decoded_names(&catalog, &[9, 0x10, 0, 7, 9, 0, 0, 3]);
        assert_eq!(names, vec!["Page", "Counter"]);
    }

    #[test]
    fn test_short_payload_marks_unfit() {
        let catalog = multiplexed_catalog();
        let (names, outcome) = decoded_names(&catalog, &[1, 0x10, 0]);
        assert_eq!(names, vec!["Page", "Oil"]);
        assert_eq!(outcome.unfit, 1);
    }

    #[test]
    fn test_decode_applies_scaling() {
        let catalog = Catalog::new(vec![MessageDefinition::new(0x123, "Temp", 8).with_signal(
            SignalDefinition::new("Coolant", 0, 8)
                .with_scaling(0.5, -40.0)
                .with_unit("degC"),
        )])
        .unwrap();

        let mut values = Vec::new();
        decode_message(&catalog.messages()[0], &[100], |id, v| values.push((id, v)));
        assert_eq!(values, vec![(catalog.signal_id("Coolant").unwrap(), 10.0)]);
    }
}
