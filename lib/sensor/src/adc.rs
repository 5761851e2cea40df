//! Conversions from raw converter codes to physical units.

// ADC128S102 position converter, 12 bit, referenced to the potentiometer supply
pub const POSITION_MAX_CODE: u16 = 0x0FFF;

// MCP3208 shunt converter
pub const CURRENT_VREF: f32 = 0.55; // in volts, 10k:2k divider from 3v3
pub const SENSE_RESISTANCE: f32 = 0.1; // in ohms
pub const CURRENT_MAX_CODE: u16 = 0x0FFF;

// ADS1115 strain converter at +-0.256V full scale
pub const STRAIN_FULL_SCALE: f32 = 0.256; // in volts
const STRAIN_FULL_SCALE_CODE: f32 = 32768.0;

/// Normalized position in [0, 1], or `None` if the converter flagged the read.
pub fn position_from_code(code: u16) -> Option<f32> {
    if code > POSITION_MAX_CODE {
        return None;
    }
    Some(code as f32 / POSITION_MAX_CODE as f32)
}

/// Motor current in amps, or `None` if the null bit was not clear.
pub fn current_from_code(code: u16) -> Option<f32> {
    if code > CURRENT_MAX_CODE {
        return None;
    }
    Some(code as f32 * (CURRENT_VREF / 4096.0 / SENSE_RESISTANCE))
}

/// Bridge voltage in volts.
pub fn strain_from_code(code: i16) -> f32 {
    code as f32 * (STRAIN_FULL_SCALE / STRAIN_FULL_SCALE_CODE)
}

/// Word selecting the input converted on the following 16 bit transfer.
pub fn adc128_command(next_input: u8) -> u16 {
    ((next_input as u16 & 0b111) << 3) << 8
}

/// Start bit, single ended mode and the 3 bit input address, spread over 3 bytes.
pub fn mcp3208_command(input: u8) -> [u8; 3] {
    [
        0b0000_0110 | ((input >> 2) & 0b1),
        (input & 0b11) << 6,
        0x00,
    ]
}

/// 13 bits of result; the top one is the null bit and must be clear.
pub fn mcp3208_code(response: [u8; 3]) -> u16 {
    ((response[1] & 0b0001_1111) as u16) << 8 | response[2] as u16
}

// ADS1115 registers
pub const ADS1115_CONVERSION: u8 = 0x00;
pub const ADS1115_CONFIG: u8 = 0x01;

const ADS1115_START: u16 = 1 << 15; // reads back as "idle"
const ADS1115_MUX_MASK: u16 = 0b111 << 12;
const ADS1115_PGA_MASK: u16 = 0b111 << 9;
const ADS1115_PGA_0V256: u16 = 0b101 << 9;
const ADS1115_SINGLE_SHOT: u16 = 1 << 8;
const ADS1115_860SPS: u16 = 0b111 << 5;
const ADS1115_NO_COMPARATOR: u16 = 0b11;

pub const ADS1115_INPUTS: u8 = 3;

/// Single shot conversion of input `input` against AIN3.
pub fn ads1115_config(input: u8) -> u16 {
    let mux = (input % ADS1115_INPUTS) as u16 + 1;
    ADS1115_START | mux << 12 | ADS1115_PGA_0V256 | ADS1115_SINGLE_SHOT | ADS1115_860SPS | ADS1115_NO_COMPARATOR
}

/// The chip is still converting.
pub fn ads1115_busy(config: u16) -> bool {
    config & ADS1115_START == 0
}

/// True if the config register shows a finished conversion of `input`.
pub fn ads1115_ready(config: u16, input: u8) -> bool {
    let expected = ads1115_config(input);
    config & ADS1115_START != 0
        && config & ADS1115_MUX_MASK == expected & ADS1115_MUX_MASK
        && config & ADS1115_PGA_MASK == ADS1115_PGA_0V256
}

// supply sense on the MCU's own 12 bit converter
const MCU_VREF: f32 = 3.3; // in volts
const SUPPLY_DIVIDER: f32 = 11.0; // 10k:1k
const SUPPLY_CURRENT_GAIN: f32 = 0.1; // in volts per amp

pub fn supply_voltage_from_code(code: u16) -> f32 {
    code as f32 / 4096.0 * MCU_VREF * SUPPLY_DIVIDER
}

pub fn supply_current_from_code(code: u16) -> f32 {
    code as f32 / 4096.0 * MCU_VREF / SUPPLY_CURRENT_GAIN
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_position_range() {
        assert_eq!(position_from_code(0), Some(0.0));
        assert_eq!(position_from_code(POSITION_MAX_CODE), Some(1.0));
        assert_eq!(position_from_code(0x1000), None);
    }

    #[test]
    fn test_current_scale() {
        // full scale is vref across the shunt
        let full = current_from_code(CURRENT_MAX_CODE).unwrap();
        assert!((full - 5.5).abs() < 0.01, "{}", full);
        assert_eq!(current_from_code(0), Some(0.0));
    }

    #[test]
    fn test_mcp3208_null_bit() {
        assert_eq!(mcp3208_code([0xFF, 0x0F, 0xFF]), 0x0FFF);
        assert_eq!(current_from_code(mcp3208_code([0x00, 0x1F, 0xFF])), None);
        assert_eq!(mcp3208_command(7), [0b0000_0111, 0b1100_0000, 0]);
        assert_eq!(mcp3208_command(2), [0b0000_0110, 0b1000_0000, 0]);
    }

    #[test]
    fn test_adc128_command() {
        assert_eq!(adc128_command(0), 0);
        assert_eq!(adc128_command(1), 0x0800);
        assert_eq!(adc128_command(7), 0x3800);
    }

    #[test]
    fn test_ads1115_config() {
        assert_eq!(ads1115_config(0), 0b1001_1011_1110_0011);
        assert_eq!(ads1115_config(2) & (0b111 << 12), 0b011 << 12);
        assert_eq!(ads1115_config(3), ads1115_config(0));

        assert!(ads1115_ready(ads1115_config(1), 1));
        assert!(!ads1115_ready(ads1115_config(1), 2));
        // conversion still running
        assert!(!ads1115_ready(ads1115_config(1) & !(1 << 15), 1));
        assert!(ads1115_busy(ads1115_config(1) & !(1 << 15)));
        assert!(!ads1115_busy(ads1115_config(1)));
    }

    #[test]
    fn test_supply_scale() {
        assert!((supply_voltage_from_code(2048) - 18.15).abs() < 0.01);
        assert!((supply_current_from_code(1241) - 10.0).abs() < 0.01);
    }

    #[test]
    fn test_strain_scale() {
        assert_eq!(strain_from_code(0), 0.0);
        assert!((strain_from_code(i16::MIN) + 0.256).abs() < 1e-6);
    }
}
