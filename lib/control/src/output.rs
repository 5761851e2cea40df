use heapless::Vec;
use micromath::F32Ext;

use crate::mux::ChipId;

pub const MAX_SLOTS: usize = 32;
pub const DRIVER_SLOTS: usize = 8;

// drive registers starting at PWM0, auto incremented
pub const DRIVER_FRAME_LEN: usize = 22;

// PWM resolution of the driver chips
const MIN_POWER_STEP: f32 = 1.0 / 256.0;
const MAX_POWER_STEP: f32 = 255.0 / 256.0;

// LEDOUT field values, the two outputs of a slot are the two H-bridge inputs
const LED_OFF: u8 = 0b00;
const LED_FULL_ON: u8 = 0b01;
const LED_PWM: u8 = 0b10;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SlotDrive {
    Disabled,
    Power(f32),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SlotCommand {
    pub chip: ChipId,
    pub index: u8,
    pub drive: SlotDrive,
}

pub type DriveFrame = Vec<SlotCommand, MAX_SLOTS>;

/// Writes one tick's worth of slot commands to the hardware.
pub trait DriveSink {
    /// Returns the number of failed bus transactions.
    fn write(&mut self, frame: &[SlotCommand]) -> u32;
}

/// Drive values of one chip, slots nobody commanded are disabled.
pub fn chip_slots<const S: usize>(frame: &[SlotCommand], chip: ChipId) -> [SlotDrive; S] {
    let mut slots = [SlotDrive::Disabled; S];
    for command in frame.iter().filter(|c| c.chip == chip) {
        if let Some(slot) = slots.get_mut(command.index as usize) {
            *slot = command.drive;
        }
    }
    slots
}

/// Register image for a 16 channel LED driver running 8 H-bridges in brake mode.
///
/// Layout is PWM0..PWM15, GRPPWM, GRPFREQ, LEDOUT0..LEDOUT3. Off slots hold
/// both bridge inputs high, which brakes the motor.
pub fn drive_register_frame(slots: &[SlotDrive; DRIVER_SLOTS]) -> [u8; DRIVER_FRAME_LEN] {
    let mut data = [0u8; DRIVER_FRAME_LEN];
    data[16] = 0xFF; // group duty cycle
    data[17] = 0x00; // group frequency

    for (i, slot) in slots.iter().enumerate() {
        let power = match slot {
            SlotDrive::Disabled => 0.0,
            SlotDrive::Power(power) if power.is_nan() => 0.0,
            SlotDrive::Power(power) => *power,
        };
        let magnitude = power.abs();
        let reverse = power < 0.0;

        let (in1, in2) = if magnitude <= MIN_POWER_STEP {
            (LED_OFF, LED_OFF)
        } else if magnitude >= MAX_POWER_STEP {
            if reverse {
                (LED_FULL_ON, LED_OFF)
            } else {
                (LED_OFF, LED_FULL_ON)
            }
        } else {
            let duty = (magnitude * 256.0) as u8;
            if reverse {
                data[2 * i] = duty;
                (LED_PWM, LED_OFF)
            } else {
                data[2 * i + 1] = duty;
                (LED_OFF, LED_PWM)
            }
        };

        data[18 + i / 2] |= (in1 | in2 << 2) << ((i % 2) * 4);
    }

    data
}
