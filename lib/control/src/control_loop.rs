use bitset_core::BitSet;
use config::Config;
use heapless::spsc::Consumer;
use micromath::F32Ext;
use sensor::ExponentialAverage;

use crate::channel::{Channel, ChannelConfig, Gauge, GaugeConfig};
use crate::clamp;
use crate::command::LoopCommand;
use crate::mux::{self, Bindings, ChipId, ChipTable, Route};
use crate::output::{DriveFrame, DriveSink, SlotCommand, SlotDrive};
use crate::storage::{ConfigStore, StorageStatus};
use crate::telemetry::{BoardState, ChannelTelemetry, Configuration, Snapshot, SupplySample, Telemetry};
use crate::timing::{Clock, LoopTimer};

/// Raw readings for one tick. Entries left `None` keep last tick's value.
///
/// Positions and currents are indexed by board slot (see `Binding::slot`),
/// not by channel.
#[derive(Debug, Clone, PartialEq)]
pub struct SensorFrame<const N: usize, const G: usize> {
    pub positions: [Option<f32>; N], // normalized, before reverse_input
    pub currents: [Option<f32>; N], // in amps
    pub strains: [Option<f32>; G], // in volts
    pub supply: Option<SupplySample>,
}

impl<const N: usize, const G: usize> SensorFrame<N, G> {
    pub fn empty() -> Self {
        SensorFrame {
            positions: [None; N],
            currents: [None; N],
            strains: [None; G],
            supply: None,
        }
    }
}

pub trait SensorSource<const N: usize, const G: usize> {
    /// Returns the number of failed bus transactions.
    fn sample(&mut self, frame: &mut SensorFrame<N, G>) -> u32;
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TickReport {
    pub elapsed: f32, // in seconds
    pub bus_errors: u32,
    pub unbound: usize,
}

pub struct ControlLoop<const N: usize, const G: usize> {
    config: Config,
    chips: ChipTable,
    channels: [Channel; N],
    gauges: [Gauge; G],
    board: BoardState,
    timer: LoopTimer,
    state_average: ExponentialAverage,
    slow_average: ExponentialAverage,
    bindings: Bindings<N>,
    version: u32,
    pending_save: bool,
    pending_reload: bool,
}

/// Chip a channel drives when nothing else is configured: onboard slots first,
/// then the driver chips in order.
pub fn default_chip(config: &Config, channel: usize) -> ChipId {
    let onboard = config.onboard_slots as usize;
    if channel < onboard {
        return ChipId::Onboard;
    }
    if config.slots_per_driver == 0 {
        return ChipId::None;
    }
    let driver = (channel - onboard) / config.slots_per_driver as usize;
    if driver < config.driver_chips as usize {
        ChipId::Driver(driver as u8)
    } else {
        ChipId::None
    }
}

impl<const N: usize, const G: usize> ControlLoop<N, G> {
    pub fn new(config: Config) -> ControlLoop<N, G> {
        let defaults = ChannelConfig::from_defaults(&config.channel);

        ControlLoop {
            chips: ChipTable::from_config(&config),
            channels: core::array::from_fn(|i| Channel::new(defaults, default_chip(&config, i))),
            gauges: [Gauge::default(); G],
            board: BoardState {
                current_fraction: clamp(config.current_fraction, 0.0, 1.0),
                ..Default::default()
            },
            timer: LoopTimer::new(config.fps_gamma),
            state_average: ExponentialAverage::new(config.state_half_life),
            slow_average: ExponentialAverage::new(config.average_half_life),
            bindings: Bindings::default(),
            version: 0,
            pending_save: false,
            pending_reload: false,
            config,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn channels(&self) -> &[Channel; N] {
        &self.channels
    }

    pub fn gauges(&self) -> &[Gauge; G] {
        &self.gauges
    }

    pub fn board(&self) -> &BoardState {
        &self.board
    }

    pub fn bindings(&self) -> &Bindings<N> {
        &self.bindings
    }

    pub fn set_chip_table(&mut self, chips: ChipTable) {
        self.chips = chips;
    }

    /// Routes a channel to another chip from the next tick on.
    pub fn set_chip(&mut self, channel: usize, chip: ChipId) {
        if let Some(channel) = self.channels.get_mut(channel) {
            channel.chip = chip;
        }
    }

    pub fn apply(&mut self, command: LoopCommand<N, G>) {
        match command {
            LoopCommand::Drive { power_offset, seek } => {
                for (i, channel) in self.channels.iter_mut().enumerate() {
                    channel.set_drive(power_offset[i], seek[i]);
                }
            }
            LoopCommand::Configure { channels, gauges, persist } => {
                self.apply_configuration(&Configuration { channels, gauges });
                self.pending_save |= persist;
            }
            LoopCommand::SetEnabled(mask) => {
                for (i, channel) in self.channels.iter_mut().enumerate().take(32) {
                    channel.enabled = mask.bit_test(i);
                }
            }
            LoopCommand::SetCurrentFraction(fraction) => {
                if !fraction.is_nan() {
                    self.board.current_fraction = clamp(fraction, 0.0, 1.0);
                }
            }
            LoopCommand::Halt => self.halt(),
            LoopCommand::Reload => self.pending_reload = true,
        }
    }

    /// Applies everything queued since the last call, returns how many commands there were.
    pub fn apply_pending<const Q: usize>(&mut self, commands: &mut Consumer<'_, LoopCommand<N, G>, Q>) -> usize {
        let mut applied = 0;
        while let Some(command) = commands.dequeue() {
            self.apply(command);
            applied += 1;
        }
        applied
    }

    /// Drops every power offset and seek target.
    pub fn halt(&mut self) {
        for channel in self.channels.iter_mut() {
            channel.halt();
        }
    }

    pub fn configuration(&self) -> Configuration<N, G> {
        Configuration {
            channels: core::array::from_fn(|i| self.channels[i].config()),
            gauges: core::array::from_fn(|i| self.gauges[i].config),
        }
    }

    pub fn apply_configuration(&mut self, configuration: &Configuration<N, G>) {
        for (channel, config) in self.channels.iter_mut().zip(configuration.channels.iter()) {
            channel.configure(*config);
        }
        for (gauge, config) in self.gauges.iter_mut().zip(configuration.gauges.iter()) {
            gauge.config = *config;
        }
    }

    pub fn persist(&mut self, store: &mut impl ConfigStore) -> StorageStatus {
        let configuration = self.configuration();
        store.save(&configuration.channels, &configuration.gauges).map_err(|e| {
            log::error!("saving configuration failed: {:?}", e);
            e
        })
    }

    /// Loads stored settings. Nothing changes unless the whole load succeeds.
    pub fn reload(&mut self, store: &mut impl ConfigStore) -> StorageStatus {
        let mut configuration = self.configuration();
        if let Err(e) = store.load(&mut configuration.channels, &mut configuration.gauges) {
            log::error!("loading configuration failed: {:?}", e);
            return Err(e);
        }
        self.apply_configuration(&configuration);
        log::info!("configuration loaded");
        Ok(())
    }

    /// Runs a save or reload someone asked for, returning its status.
    pub fn service_storage(&mut self, store: &mut impl ConfigStore) -> Option<StorageStatus> {
        if self.pending_reload {
            self.pending_reload = false;
            return Some(self.reload(store));
        }
        if self.pending_save {
            self.pending_save = false;
            return Some(self.persist(store));
        }
        None
    }

    pub fn tick<IO>(&mut self, clock: &mut impl Clock, io: &mut IO) -> TickReport
    where
        IO: SensorSource<N, G> + DriveSink,
    {
        let elapsed = self.timer.update(clock, self.config.min_loop_period_us);

        let mut frame = SensorFrame::empty();
        let mut bus_errors = io.sample(&mut frame);

        self.update_board(frame.supply, elapsed);
        let state_average = self.state_average;
        for (gauge, volts) in self.gauges.iter_mut().zip(frame.strains.iter()) {
            if let Some(volts) = volts {
                gauge.observe(*volts, |new, previous| state_average.apply(new, previous, elapsed));
            }
        }

        let routes: [Route; N] = core::array::from_fn(|i| self.channels[i].route());
        let bindings = mux::bind(&routes, &self.chips);

        let mut drive = DriveFrame::new();
        let mut unbound = 0;
        let slow_average = self.slow_average;
        let current_fraction = self.board.current_fraction;

        for (i, channel) in self.channels.iter_mut().enumerate() {
            let binding = bindings.joint(i);

            // sensors are wired per slot, the same as the bridges
            if let Some(current) = binding.and_then(|b| frame.currents.get(b.slot).copied().flatten()) {
                channel.current = state_average.apply(current, channel.current, elapsed);
            }
            channel.avg_current = slow_average.apply(channel.current, channel.avg_current, elapsed);

            let power = match binding {
                Some(binding) => {
                    if let Some(raw) = frame.positions.get(binding.slot).copied().flatten() {
                        channel.observe_position(raw, |new, previous| state_average.apply(new, previous, elapsed));
                    }
                    let power = channel.step(elapsed, current_fraction);

                    // position is already logical, only the motor wiring is left
                    let power_out = if binding.reverse_output { -power } else { power };
                    let command = SlotCommand {
                        chip: binding.chip,
                        index: binding.index,
                        drive: SlotDrive::Power(power_out),
                    };
                    if drive.push(command).is_err() {
                        log::warn!("drive frame full, channel {} not driven", i);
                    }
                    power
                }
                None => {
                    if channel.chip != ChipId::None && (self.version == 0 || self.bindings.joint(i).is_some()) {
                        log::warn!("channel {} has no free slot on {:?}", i, channel.chip);
                    }
                    unbound += 1;
                    channel.position = None;
                    0.0
                }
            };

            channel.power = power;
            channel.avg_abs_power = slow_average.apply(power.abs(), channel.avg_abs_power, elapsed);
        }

        for (chip, index) in bindings.unclaimed(&self.chips) {
            let command = SlotCommand {
                chip,
                index,
                drive: SlotDrive::Disabled,
            };
            if drive.push(command).is_err() {
                log::warn!("drive frame full, {:?} slot {} not disabled", chip, index);
            }
        }

        bus_errors += io.write(&drive);

        self.bindings = bindings;
        self.board.bus_errors = self.board.bus_errors.wrapping_add(bus_errors);
        self.board.update_time_ms = (clock.now_us() / 1000) as u32;
        self.version = self.version.wrapping_add(1);

        TickReport {
            elapsed,
            bus_errors,
            unbound,
        }
    }

    fn update_board(&mut self, supply: Option<SupplySample>, elapsed: f32) {
        if let Some(supply) = supply {
            self.board.voltage = self.state_average.apply(supply.voltage, self.board.voltage, elapsed);
            self.board.current = self.state_average.apply(supply.current, self.board.current, elapsed);
        }
        self.board.power = self.board.voltage * self.board.current;
        self.board.energy += self.board.power * elapsed;
        self.board.fps = self.timer.fps;
        self.board.max_loop_time = self.timer.max_loop_us as f32 * 1e-6;
    }

    pub fn telemetry(&self) -> Telemetry<N, G> {
        Telemetry {
            board: self.board,
            channels: core::array::from_fn(|i| {
                let channel = &self.channels[i];
                ChannelTelemetry {
                    position: channel.position,
                    current: channel.current,
                    power: channel.power,
                    seek: channel.seek,
                    enabled: channel.enabled,
                }
            }),
            strains: core::array::from_fn(|i| self.gauges[i].strain),
        }
    }

    pub fn snapshot(&self) -> Snapshot<N, G> {
        Snapshot {
            version: self.version,
            telemetry: self.telemetry(),
            configuration: self.configuration(),
        }
    }

    pub fn gauge_config(&self, gauge: usize) -> Option<GaugeConfig> {
        self.gauges.get(gauge).map(|g| g.config)
    }
}
