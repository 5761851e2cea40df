use control::control_loop::{SensorFrame, SensorSource};
use control::output::{chip_slots, drive_register_frame, DriveSink, SlotCommand, DRIVER_FRAME_LEN, DRIVER_SLOTS};
use control::{ChipId, SupplySample};
use embedded_hal::blocking::i2c::{Write, WriteRead};
use embedded_hal::blocking::spi::Transfer;
use embedded_hal::digital::v2::OutputPin;
use sensor::adc;

pub const DRIVER_BASE_ADDRESS: u8 = 0b0110_0000;
pub const STRAIN_BASE_ADDRESS: u8 = 0b0100_1000;

pub const DRIVER_CHIPS: usize = 3;
pub const STRAIN_CHIPS: usize = 4;
pub const CONVERTERS: usize = 3;
const CONVERTER_INPUTS: usize = 8;

// driver chip registers
const MODE1: u8 = 0x00;
const MODE1_OSC_ON: u8 = 0x00;
const PWM0: u8 = 0x02;
const AUTO_INCREMENT: u8 = 0b1000_0000;

/// Board input voltage and current.
pub trait SupplySense {
    fn sample(&mut self) -> Option<SupplySample>;
}

/// The 24 channel board: LED driver chips for the H-bridges and strain
/// converters on I2C, position and current converters on SPI.
pub struct Board<I2C, SPI, CS, SUPPLY> {
    i2c: I2C,
    spi: SPI,
    position_cs: [CS; CONVERTERS],
    current_cs: [CS; CONVERTERS],
    supply: SUPPLY,
    // input each strain converter was last started on
    strain_inputs: [Option<u8>; STRAIN_CHIPS],
}

impl<I2C, SPI, CS, SUPPLY> Board<I2C, SPI, CS, SUPPLY>
where
    I2C: Write + WriteRead,
    SPI: Transfer<u8>,
    CS: OutputPin,
    SUPPLY: SupplySense,
{
    pub fn new(i2c: I2C, spi: SPI, position_cs: [CS; CONVERTERS], current_cs: [CS; CONVERTERS], supply: SUPPLY) -> Self {
        let mut board = Board {
            i2c,
            spi,
            position_cs,
            current_cs,
            supply,
            strain_inputs: [None; STRAIN_CHIPS],
        };
        for cs in board.position_cs.iter_mut().chain(board.current_cs.iter_mut()) {
            let _ = cs.set_high();
        }
        board
    }

    /// Starts the driver oscillators; give them 500us before driving.
    pub fn wake_drivers(&mut self) -> u32 {
        let mut errors = 0;
        for driver in 0..DRIVER_CHIPS {
            if self.i2c.write(DRIVER_BASE_ADDRESS + driver as u8, &[MODE1, MODE1_OSC_ON]).is_err() {
                errors += 1;
            }
        }
        errors
    }

    fn sample_positions(&mut self, positions: &mut [Option<f32>]) -> u32 {
        let mut errors = 0;
        for (converter, cs) in self.position_cs.iter_mut().enumerate() {
            if cs.set_low().is_err() {
                errors += 1;
                continue;
            }

            // each transfer returns the input selected by the previous one
            let mut word = adc::adc128_command(0).to_be_bytes();
            if self.spi.transfer(&mut word).is_err() {
                errors += 1;
            }
            for input in 0..CONVERTER_INPUTS {
                let mut word = adc::adc128_command(input as u8 + 1).to_be_bytes();
                match self.spi.transfer(&mut word) {
                    Ok(result) => {
                        let code = u16::from_be_bytes([result[0], result[1]]);
                        if let Some(position) = positions.get_mut(converter * CONVERTER_INPUTS + input) {
                            *position = adc::position_from_code(code);
                        }
                    }
                    Err(_) => errors += 1,
                }
            }

            let _ = cs.set_high();
        }
        errors
    }

    fn sample_currents(&mut self, currents: &mut [Option<f32>]) -> u32 {
        let mut errors = 0;
        for (converter, cs) in self.current_cs.iter_mut().enumerate() {
            for input in 0..CONVERTER_INPUTS {
                if cs.set_low().is_err() {
                    errors += 1;
                    continue;
                }
                let mut words = adc::mcp3208_command(input as u8);
                match self.spi.transfer(&mut words) {
                    Ok(result) => {
                        let code = adc::mcp3208_code([result[0], result[1], result[2]]);
                        if let Some(current) = currents.get_mut(converter * CONVERTER_INPUTS + input) {
                            *current = adc::current_from_code(code);
                        }
                    }
                    Err(_) => errors += 1,
                }
                let _ = cs.set_high();
            }
        }
        errors
    }

    fn start_strain(&mut self, chip: usize, input: u8) -> u32 {
        let address = STRAIN_BASE_ADDRESS + chip as u8;
        let [high, low] = adc::ads1115_config(input).to_be_bytes();

        self.strain_inputs[chip] = None;
        if self.i2c.write(address, &[adc::ADS1115_CONFIG, high, low]).is_err() {
            return 1;
        }
        self.strain_inputs[chip] = Some(input);
        0
    }

    /// Round robin over the inputs of every converter, one conversion per chip per call.
    fn sample_strains(&mut self, strains: &mut [Option<f32>]) -> u32 {
        let mut errors = 0;
        for chip in 0..STRAIN_CHIPS {
            let address = STRAIN_BASE_ADDRESS + chip as u8;
            let input = match self.strain_inputs[chip] {
                Some(input) => input,
                None => {
                    errors += self.start_strain(chip, 0);
                    continue;
                }
            };

            let mut config = [0u8; 2];
            if self.i2c.write_read(address, &[adc::ADS1115_CONFIG], &mut config).is_err() {
                errors += 1;
                continue;
            }
            let config = u16::from_be_bytes(config);
            if adc::ads1115_busy(config) {
                continue;
            }
            if !adc::ads1115_ready(config, input) {
                // lost its setup, start over on the same input
                errors += self.start_strain(chip, input);
                continue;
            }

            let mut conversion = [0u8; 2];
            if self.i2c.write_read(address, &[adc::ADS1115_CONVERSION], &mut conversion).is_err() {
                errors += 1;
                continue;
            }
            let index = chip * adc::ADS1115_INPUTS as usize + input as usize;
            if let Some(strain) = strains.get_mut(index) {
                *strain = Some(adc::strain_from_code(i16::from_be_bytes(conversion)));
            }

            errors += self.start_strain(chip, (input + 1) % adc::ADS1115_INPUTS);
        }
        errors
    }
}

impl<I2C, SPI, CS, SUPPLY, const N: usize, const G: usize> SensorSource<N, G> for Board<I2C, SPI, CS, SUPPLY>
where
    I2C: Write + WriteRead,
    SPI: Transfer<u8>,
    CS: OutputPin,
    SUPPLY: SupplySense,
{
    fn sample(&mut self, frame: &mut SensorFrame<N, G>) -> u32 {
        let mut errors = self.sample_positions(&mut frame.positions);
        errors += self.sample_currents(&mut frame.currents);
        errors += self.sample_strains(&mut frame.strains);
        frame.supply = self.supply.sample();
        errors
    }
}

impl<I2C, SPI, CS, SUPPLY> DriveSink for Board<I2C, SPI, CS, SUPPLY>
where
    I2C: Write + WriteRead,
    SPI: Transfer<u8>,
    CS: OutputPin,
    SUPPLY: SupplySense,
{
    fn write(&mut self, frame: &[SlotCommand]) -> u32 {
        let mut errors = 0;
        for driver in 0..DRIVER_CHIPS {
            let slots = chip_slots::<DRIVER_SLOTS>(frame, ChipId::Driver(driver as u8));

            let mut message = [0u8; 1 + DRIVER_FRAME_LEN];
            message[0] = PWM0 | AUTO_INCREMENT;
            message[1..].copy_from_slice(&drive_register_frame(&slots));

            if self.i2c.write(DRIVER_BASE_ADDRESS + driver as u8, &message).is_err() {
                errors += 1;
            }
        }
        errors
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use control::output::SlotDrive;
    use std::collections::HashMap;
    use std::vec::Vec;

    #[derive(Default)]
    struct MockI2c {
        writes: Vec<(u8, Vec<u8>)>,
        configs: HashMap<u8, u16>,
        conversion: i16,
        fail: bool,
    }

    impl Write for MockI2c {
        type Error = ();

        fn write(&mut self, address: u8, bytes: &[u8]) -> Result<(), ()> {
            if self.fail {
                return Err(());
            }
            if bytes.len() == 3 && bytes[0] == adc::ADS1115_CONFIG {
                self.configs.insert(address, u16::from_be_bytes([bytes[1], bytes[2]]));
            }
            self.writes.push((address, bytes.to_vec()));
            Ok(())
        }
    }

    impl WriteRead for MockI2c {
        type Error = ();

        fn write_read(&mut self, address: u8, bytes: &[u8], buffer: &mut [u8]) -> Result<(), ()> {
            if self.fail {
                return Err(());
            }
            let value = match bytes[0] {
                adc::ADS1115_CONFIG => self.configs.get(&address).copied().unwrap_or(0),
                _ => self.conversion as u16,
            };
            buffer.copy_from_slice(&value.to_be_bytes());
            Ok(())
        }
    }

    /// Answers the converters with code 0x100 * (input + 1).
    #[derive(Default)]
    struct MockSpi {
        selected: u8,
    }

    impl Transfer<u8> for MockSpi {
        type Error = ();

        fn transfer<'w>(&mut self, words: &'w mut [u8]) -> Result<&'w [u8], ()> {
            match words.len() {
                2 => {
                    let code = 0x100 * (self.selected as u16 + 1);
                    self.selected = (words[0] >> 3) & 0b111;
                    words.copy_from_slice(&code.to_be_bytes());
                }
                3 => {
                    let input = ((words[0] & 1) << 2) | (words[1] >> 6);
                    let [high, low] = (0x80 * (input as u16 + 1)).to_be_bytes();
                    words.copy_from_slice(&[0, high, low]);
                }
                _ => return Err(()),
            }
            Ok(words)
        }
    }

    struct MockPin;

    impl OutputPin for MockPin {
        type Error = core::convert::Infallible;

        fn set_low(&mut self) -> Result<(), Self::Error> {
            Ok(())
        }

        fn set_high(&mut self) -> Result<(), Self::Error> {
            Ok(())
        }
    }

    struct FixedSupply;

    impl SupplySense for FixedSupply {
        fn sample(&mut self) -> Option<SupplySample> {
            supply()
        }
    }

    type TestBoard = Board<MockI2c, MockSpi, MockPin, FixedSupply>;

    fn supply() -> Option<SupplySample> {
        Some(SupplySample {
            voltage: 12.0,
            current: 1.5,
        })
    }

    fn board() -> TestBoard {
        Board::new(
            MockI2c::default(),
            MockSpi::default(),
            [MockPin, MockPin, MockPin],
            [MockPin, MockPin, MockPin],
            FixedSupply,
        )
    }

    #[test]
    fn test_sample_converters() {
        let mut board = board();
        let mut frame = SensorFrame::<24, 12>::empty();

        let errors = board.sample(&mut frame);

        assert_eq!(errors, 0);
        assert_eq!(frame.positions[0], Some(256.0 / 4095.0));
        assert_eq!(frame.positions[7], Some(2048.0 / 4095.0));
        assert_eq!(frame.positions[15], Some(2048.0 / 4095.0));
        let current = frame.currents[9].unwrap();
        assert!((current - adc::current_from_code(0x100).unwrap()).abs() < 1e-6);
        assert_eq!(frame.supply, supply());
        // converters only started this round
        assert!(frame.strains.iter().all(|s| s.is_none()));
    }

    #[test]
    fn test_strain_round_robin() {
        let mut board = board();
        board.i2c.conversion = 1000;
        let mut frame = SensorFrame::<24, 12>::empty();

        board.sample(&mut frame);
        board.sample(&mut frame);
        board.sample(&mut frame);

        for chip in 0..STRAIN_CHIPS {
            assert_eq!(frame.strains[chip * 3], Some(adc::strain_from_code(1000)));
            assert_eq!(frame.strains[chip * 3 + 1], Some(adc::strain_from_code(1000)));
            assert_eq!(frame.strains[chip * 3 + 2], None);
        }
        assert_eq!(board.i2c.configs[&STRAIN_BASE_ADDRESS], adc::ads1115_config(2));
    }

    #[test]
    fn test_drive_registers() {
        let mut board = board();
        let frame = [SlotCommand {
            chip: ChipId::Driver(1),
            index: 0,
            drive: SlotDrive::Power(0.5),
        }];

        assert_eq!(board.write(&frame), 0);

        let writes: Vec<_> = board.i2c.writes.iter().filter(|(_, bytes)| bytes.len() == 23).collect();
        assert_eq!(writes.len(), 3);
        let (address, bytes) = writes[1];
        assert_eq!(*address, DRIVER_BASE_ADDRESS + 1);
        assert_eq!(bytes[0], 0x82);
        assert_eq!(bytes[2], 128);
        assert_eq!(bytes[19], 0b1000);
    }

    #[test]
    fn test_bus_errors_are_counted() {
        let mut board = board();
        board.i2c.fail = true;

        assert_eq!(board.wake_drivers(), 3);
        assert_eq!(board.write(&[]), 3);

        let mut frame = SensorFrame::<24, 12>::empty();
        assert_eq!(board.sample(&mut frame), 4);
        assert!(frame.positions[0].is_some());
    }
}
