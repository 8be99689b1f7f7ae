use crc::{Crc, CRC_16_MODBUS};

/// Poly 0xA001 reflected, seed 0xFFFF, no final xor.
const CRC16: Crc<u16> = Crc::<u16>::new(&CRC_16_MODBUS);

pub fn crc16(bytes: &[u8]) -> u16 {
    CRC16.checksum(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_modbus_check_value() {
        assert_eq!(crc16(b"123456789"), 0x4B37);
    }

    #[test]
    fn empty_input_keeps_seed() {
        assert_eq!(crc16(&[]), 0xFFFF);
    }

    #[test]
    fn single_bytes() {
        assert_eq!(crc16(&[0x00]), 0x40BF);
        assert_eq!(crc16(b"A"), 0x707F);
    }

    #[test]
    fn any_single_byte_change_alters_checksum() {
        let payload: Vec<u8> = (0..=255u8).collect();
        let reference = crc16(&payload);

        for index in 0..payload.len() {
            let mut corrupted = payload.clone();
            corrupted[index] ^= 0x5A;
            assert_ne!(crc16(&corrupted), reference, "byte {index}");
        }
    }
}
