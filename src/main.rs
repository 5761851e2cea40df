#![no_std]
#![no_main]

use panic_rtt_target as _;

#[rtic::app(device = stm32f4xx_hal::pac, dispatchers = [EXTI0, EXTI1])]
mod app {
    use dwt_systick_monotonic::DwtSystick;

    use rtt_target::{rprintln, rtt_init_print};
    use stm32f4xx_hal::{
        adc::{
            config::{AdcConfig, SampleTime},
            Adc,
        },
        flash::FlashExt,
        gpio::{Alternate, AlternateOD, Analog, Edge, ErasedPin, Input, Output, Pin, PushPull},
        i2c::I2c,
        otg_fs::{UsbBus, UsbBusType, USB},
        pac::{self, ADC1, FLASH, I2C1, SPI1},
        prelude::*,
        spi::Spi,
    };

    use heapless::spsc::Queue;

    use usb_device::bus::UsbBusAllocator;
    use usb_device::prelude::*;
    use usbd_serial::CdcAcmClass;

    use bbqueue::BBBuffer;

    use common::MAX_MESSAGE_LEN;
    use config::{Config, CHANNELS, GAUGES};
    use control::command::{CommandConsumer, CommandQueue};
    use control::{Clock, ControlLoop, Snapshot, SupplySample};
    use sensor::adc::{supply_current_from_code, supply_voltage_from_code};
    use sensor::counter::LongPress;

    use multidrive_firmware::app::board::{Board, SupplySense};
    use multidrive_firmware::app::comms::{get_comms_pair, ControllerComms, Incoming};
    use multidrive_firmware::app::rtt_log;
    use multidrive_firmware::app::storage::{FlashStore, Sector};
    use multidrive_firmware::app::usb::UsbCommunicator;

    const MONO_HZ: u32 = 100_000_000;
    const TICKS_PER_US: u32 = MONO_HZ / 1_000_000;

    #[monotonic(binds = SysTick, default = true)]
    type MyMono = DwtSystick<MONO_HZ>;

    const SEND_BUF: usize = 4096;
    const RECV_BUF: usize = 8;
    const CMD_BUF: usize = 8;
    const FRAME_BUF: usize = 2 * MAX_MESSAGE_LEN;

    // last 128K sector of the 512K part
    const CONFIG_SECTOR: u8 = 7;
    const CONFIG_OFFSET: usize = 0x6_0000;
    const CONFIG_LEN: usize = 0x2_0000;

    static LONG_PRESS: LongPress = LongPress::new();

    type Scl = Pin<'B', 6, AlternateOD<4>>;
    type Sda = Pin<'B', 7, AlternateOD<4>>;
    type BoardI2c = I2c<I2C1, (Scl, Sda)>;
    type Sck = Pin<'A', 5, Alternate<5>>;
    type Miso = Pin<'A', 6, Alternate<5>>;
    type Mosi = Pin<'A', 7, Alternate<5>>;
    type BoardSpi = Spi<SPI1, (Sck, Miso, Mosi)>;
    type ChipSelect = ErasedPin<Output<PushPull>>;
    type MainBoard = Board<BoardI2c, BoardSpi, ChipSelect, SupplyAdc>;

    type Comms = ControllerComms<SEND_BUF, RECV_BUF, CMD_BUF>;
    type Usb = UsbCommunicator<UsbBusType, SEND_BUF, RECV_BUF, FRAME_BUF>;

    pub struct SupplyAdc {
        adc: Adc<ADC1>,
        voltage: Pin<'A', 0, Analog>,
        current: Pin<'A', 1, Analog>,
    }

    impl SupplySense for SupplyAdc {
        fn sample(&mut self) -> Option<SupplySample> {
            let voltage = self.adc.convert(&self.voltage, SampleTime::Cycles_480);
            let current = self.adc.convert(&self.current, SampleTime::Cycles_480);
            Some(SupplySample {
                voltage: supply_voltage_from_code(voltage),
                current: supply_current_from_code(current),
            })
        }
    }

    pub struct ConfigSector {
        flash: FLASH,
    }

    impl Sector for ConfigSector {
        fn read(&self) -> &[u8] {
            &self.flash.read()[CONFIG_OFFSET..CONFIG_OFFSET + CONFIG_LEN]
        }

        fn erase(&mut self) -> Result<(), ()> {
            self.flash.unlocked().erase(CONFIG_SECTOR).map_err(|_| ())
        }

        fn program(&mut self, offset: usize, bytes: &[u8]) -> Result<(), ()> {
            self.flash
                .unlocked()
                .program(CONFIG_OFFSET + offset, bytes.iter())
                .map_err(|_| ())
        }
    }

    pub struct MonoClock;

    impl Clock for MonoClock {
        fn now_us(&mut self) -> u64 {
            monotonics::now().ticks() / TICKS_PER_US as u64
        }

        fn delay_us(&mut self, us: u32) {
            cortex_m::asm::delay(us.saturating_mul(TICKS_PER_US));
        }
    }

    fn now_ms() -> u32 {
        (monotonics::now().ticks() / (MONO_HZ / 1_000) as u64) as u32
    }

    #[shared]
    struct Shared {
        snapshot: Snapshot<CHANNELS, GAUGES>,
        button: Pin<'A', 2, Input>,
    }

    #[local]
    struct Local {
        control: ControlLoop<CHANNELS, GAUGES>,
        board: MainBoard,
        store: FlashStore<ConfigSector>,
        commands: CommandConsumer<'static, CHANNELS, GAUGES, CMD_BUF>,
        clock: MonoClock,
        power_hold: Pin<'B', 14, Output>,
        comms: Comms,
        usb: Usb,
    }

    #[init(local = [ep_memory: [u32; 1024] = [0; 1024],
    usb_bus: Option<UsbBusAllocator<UsbBus<USB>>> = None,
    recv_q: Queue<Incoming, RECV_BUF> = Queue::new(),
    command_q: CommandQueue<CHANNELS, GAUGES, CMD_BUF> = Queue::new()])]
    fn init(cx: init::Context) -> (Shared, Local, init::Monotonics) {
        static SEND_BBQ: BBBuffer<SEND_BUF> = BBBuffer::new();

        rtt_init_print!();
        rtt_log::init(log::LevelFilter::Info);
        rprintln!("init");

        let mut device: pac::Peripherals = cx.device;

        let rcc = device.RCC.constrain();
        let clocks = rcc
            .cfgr
            .use_hse(25.MHz())
            .sysclk(100.MHz())
            .hclk(100.MHz())
            .pclk1(50.MHz())
            .pclk2(100.MHz())
            .require_pll48clk()
            .freeze();

        let mut dcb = cx.core.DCB;
        let dwt = cx.core.DWT;
        let systick = cx.core.SYST;
        let mono = DwtSystick::new(&mut dcb, dwt, systick, MONO_HZ);

        let gpioa = device.GPIOA.split();
        let gpiob = device.GPIOB.split();

        // keep the supply latched on before anything else
        let mut power_hold = gpiob.pb14.into_push_pull_output();
        power_hold.set_high();

        let mut syscfg = device.SYSCFG.constrain();
        let mut button = gpioa.pa2.into_pull_down_input();
        button.make_interrupt_source(&mut syscfg);
        button.trigger_on_edge(&mut device.EXTI, Edge::Rising);
        button.enable_interrupt(&mut device.EXTI);

        let i2c = device.I2C1.i2c(
            (
                gpiob.pb6.into_alternate_open_drain(),
                gpiob.pb7.into_alternate_open_drain(),
            ),
            400.kHz(),
            &clocks,
        );
        let spi = device.SPI1.spi(
            (
                gpioa.pa5.into_alternate(),
                gpioa.pa6.into_alternate(),
                gpioa.pa7.into_alternate(),
            ),
            embedded_hal::spi::MODE_0,
            1.MHz(),
            &clocks,
        );
        let position_cs = [
            gpiob.pb0.into_push_pull_output().erase(),
            gpiob.pb1.into_push_pull_output().erase(),
            gpiob.pb2.into_push_pull_output().erase(),
        ];
        let current_cs = [
            gpiob.pb10.into_push_pull_output().erase(),
            gpiob.pb12.into_push_pull_output().erase(),
            gpiob.pb13.into_push_pull_output().erase(),
        ];
        let supply = SupplyAdc {
            adc: Adc::adc1(device.ADC1, true, AdcConfig::default()),
            voltage: gpioa.pa0.into_analog(),
            current: gpioa.pa1.into_analog(),
        };

        let mut board = Board::new(i2c, spi, position_cs, current_cs, supply);
        let missing = board.wake_drivers();
        if missing > 0 {
            log::warn!("{} driver chips did not answer", missing);
        }

        let usb = USB {
            usb_global: device.OTG_FS_GLOBAL,
            usb_device: device.OTG_FS_DEVICE,
            usb_pwrclk: device.OTG_FS_PWRCLK,
            pin_dm: gpioa.pa11.into_alternate(),
            pin_dp: gpioa.pa12.into_alternate(),
            hclk: clocks.hclk(),
        };

        let usb_bus: &'static UsbBusAllocator<UsbBusType> = cx.local.usb_bus.insert(UsbBusType::new(usb, cx.local.ep_memory));
        let serial = CdcAcmClass::new(usb_bus, 64);

        let mut usb_dev = UsbDeviceBuilder::new(usb_bus, UsbVidPid(0x16c0, 0x27dd))
            .manufacturer("Fake company")
            .product("Serial port")
            .serial_number("TEST")
            .device_class(usbd_serial::USB_CLASS_CDC)
            .build();

        let _ = usb_dev.force_reset();
        rprintln!("usb dev start");

        let mut usb_pull = gpioa.pa15.into_push_pull_output();
        usb_pull.set_low();
        cortex_m::asm::delay(10 * 1_000 * TICKS_PER_US);
        usb_pull.set_high();

        let config = Config::new();
        let mut control = ControlLoop::new(config);
        let mut store = FlashStore::new(ConfigSector { flash: device.FLASH });
        if let Err(e) = control.reload(&mut store) {
            log::warn!("using default settings: {:?}", e);
        }

        let (command_p, commands) = cx.local.command_q.split();
        let (comms, ends) = match get_comms_pair(&SEND_BBQ, cx.local.recv_q, command_p, config.hold_window_ms) {
            Ok(pair) => pair,
            Err(_) => panic!("send buffer already split"),
        };
        let usb = UsbCommunicator::new(serial, usb_dev, ends);

        control_tick::spawn().ok();
        usb_idle_polling::spawn().ok();
        rprintln!("spawned");

        (
            Shared {
                snapshot: control.snapshot(),
                button,
            },
            Local {
                control,
                board,
                store,
                commands,
                clock: MonoClock,
                power_hold,
                comms,
                usb,
            },
            init::Monotonics(mono),
        )
    }

    #[task(binds = EXTI2, shared = [button], priority = 3)]
    fn power_button(mut cx: power_button::Context) {
        cx.shared.button.lock(|button| button.clear_interrupt_pending_bit());
        LONG_PRESS.on_press(now_ms());
    }

    #[task(shared = [snapshot, button], local = [control, board, store, commands, clock, power_hold])]
    fn control_tick(cx: control_tick::Context) {
        let control_tick::Context { mut shared, local } = cx;

        local.control.apply_pending(local.commands);
        let report = local.control.tick(local.clock, local.board);
        if report.bus_errors > 0 {
            log::debug!("{} sensor reads failed", report.bus_errors);
        }
        if let Some(Err(e)) = local.control.service_storage(local.store) {
            log::error!("settings not saved: {:?}", e);
        }

        let snapshot = local.control.snapshot();
        shared.snapshot.lock(|shared| *shared = snapshot);

        let pressed = shared.button.lock(|button| button.is_high());
        if LONG_PRESS.held_for(now_ms(), pressed, local.control.config().long_press_ms) {
            rprintln!("power off");
            local.control.halt();
            local.control.tick(local.clock, local.board);
            local.power_hold.set_low();
        }

        // loop pacing happens inside tick
        control_tick::spawn().ok();
    }

    #[task(shared = [snapshot], local = [comms, usb], priority = 2)]
    fn usb_idle_polling(cx: usb_idle_polling::Context) {
        let usb_idle_polling::Context { mut shared, local } = cx;

        local.usb.poll();
        let now = now_ms();
        let result = shared.snapshot.lock(|snapshot| local.comms.tick(now, snapshot));
        if let Err(e) = result {
            log::debug!("comms: {:?}", e);
        }
        usb_idle_polling::spawn_after(500.micros()).ok();
    }
}
