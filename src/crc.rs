//! CRC-CCITT (polynomial 0x1021) as computed over the serial/USB EPOS wire
//! framing, one 16-bit word at a time.
//!
//! The two back-ends disagree on how a word's bytes feed the shift
//! register: the serial back-end byte-swaps every word, the USB back-end
//! byte-swaps every word *except the first*. Both divergences are kept
//! verbatim rather than unified, since unifying them would not round-trip
//! against real EPOS firmware.

const POLY: u16 = 0x1021;

fn step(mut crc: u16, word: u16) -> u16 {
    let mut shift: u16 = 0x8000;
    loop {
        let carry = crc & 0x8000;
        crc = crc.wrapping_shl(1);
        if word & shift != 0 {
            crc = crc.wrapping_add(1);
        }
        if carry != 0 {
            crc ^= POLY;
        }
        shift >>= 1;
        if shift == 0 {
            break;
        }
    }
    crc
}

fn words_le(data: &[u8]) -> impl Iterator<Item = u16> + '_ {
    data.chunks_exact(2).map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
}

/// Serial back-end CRC: every word is byte-swapped before folding.
pub fn serial_crc(data: &[u8]) -> u16 {
    words_le(data).fold(0u16, |crc, word| step(crc, word.swap_bytes()))
}

/// USB back-end CRC: every word except the first is byte-swapped before
/// folding.
pub fn usb_crc(data: &[u8]) -> u16 {
    words_le(data)
        .enumerate()
        .fold(0u16, |crc, (i, word)| {
            let fed = if i == 0 { word } else { word.swap_bytes() };
            step(crc, fed)
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn appended_crc_recomputes_to_zero_serial() {
        let mut frame = vec![0x11u8, 0x02, 0xAB, 0x34, 0x02, 0x12, 0x00, 0x00, 0x00, 0x00];
        let crc = serial_crc(&frame);
        let len = frame.len();
        frame[len - 2] = (crc >> 8) as u8;
        frame[len - 1] = crc as u8;
        assert_eq!(serial_crc(&frame), 0);
    }

    #[test]
    fn appended_crc_recomputes_to_zero_usb() {
        let mut frame = vec![0x00u8, 0x03, 0xAB, 0x34, 0x02, 0x12, 0x00, 0x00, 0x00, 0x00];
        let crc = usb_crc(&frame);
        let len = frame.len();
        frame[len - 2] = (crc >> 8) as u8;
        frame[len - 1] = crc as u8;
        assert_eq!(usb_crc(&frame), 0);
    }

    #[test]
    fn serial_and_usb_crc_differ_on_the_same_bytes() {
        let frame = [0x11u8, 0x02, 0xAB, 0x34, 0x02, 0x12, 0x00, 0x00];
        assert_ne!(serial_crc(&frame), usb_crc(&frame));
    }
}
