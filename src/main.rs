//! Beacon scanner firmware
//!
//! Scans BLE advertisements continuously, forwards iBeacon-shaped ones as
//! hex lines over the protocol UART and samples one in 256 to the Sigfox
//! modem on the same line. Scan starts are deferred while flash is busy.

#![no_std]
#![no_main]

extern crate alloc;

use esp_backtrace as _;

esp_bootloader_esp_idf::esp_app_desc!();

use core::cell::RefCell;

use critical_section::Mutex;
use embassy_futures::select::{select, Either};
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;
use embassy_sync::signal::Signal;
use embassy_time::{Duration, Timer};
use esp_hal::interrupt::software::SoftwareInterruptControl;
use esp_hal::timer::timg::TimerGroup;
use esp_hal::uart::{self, RxError, Uart, UartRx, UartTx};
use esp_hal::Async;
use static_cell::StaticCell;

use trouble_host::prelude::*;

use beacon_scanner::beacon::{AdvPayload, Disposition, Forwarder};
use beacon_scanner::scheduler::{self, FlashGuard, ScanRadio, ScanScheduler, ScanTrigger};
use beacon_scanner::serial::{self, LineBuffer, LineEcho};
use beacon_scanner::{board, Error};

/// HCI value for "RSSI not available".
const HCI_RSSI_UNAVAILABLE: i8 = 127;

// ── Channel type aliases ──────────────────────────────────────────────

type TriggerChannel = Channel<CriticalSectionRawMutex, ScanTrigger, 4>;
type OutputChannel = Channel<CriticalSectionRawMutex, LineBuffer, 8>;
type ScanRequest = Signal<CriticalSectionRawMutex, ()>;

// ── Static channels and shared state ─────────────────────────────────

/// Scheduler triggers: startup, scan timeout, flash completion.
static TRIGGERS: TriggerChannel = Channel::new();

/// Chunks waiting for the protocol UART. Dropped when full, like a
/// saturated TX FIFO.
static OUTPUT_CHANNEL: OutputChannel = Channel::new();

/// Raised by the scheduler to (re)start the BLE scan session.
static SCAN_REQUEST: ScanRequest = Signal::new();

/// Flash busy flag. Anything writing flash brackets the write with it and
/// posts the returned trigger to `TRIGGERS`.
static FLASH: FlashGuard = FlashGuard::new();

/// Halt on an unrecoverable error; esp-backtrace prints the trace.
fn fatal(err: Error) -> ! {
    log::error!("Fatal: {}", err);
    panic!("{}", err);
}

// ── BLE advertisement handler ────────────────────────────────────────

/// Runs the forwarder on every advertisement report, synchronously on the
/// BLE runner. Reports are delivered one at a time; the critical section
/// only guards the counter against the executor, the UART write happens
/// later in `serial_tx_task`.
struct BeaconHandler {
    forwarder: Mutex<RefCell<Forwarder>>,
}

impl BeaconHandler {
    const fn new() -> Self {
        Self {
            forwarder: Mutex::new(RefCell::new(Forwarder::new())),
        }
    }

    fn on_report(&self, data: &[u8], rssi: i8) {
        let rssi = (rssi != HCI_RSSI_UNAVAILABLE).then_some(rssi);
        let mut payload = AdvPayload::from_slice(data);
        let mut line = LineBuffer::new();

        let disposition = critical_section::with(|cs| {
            self.forwarder
                .borrow_ref_mut(cs)
                .on_advertisement(&mut payload, rssi, &mut line)
        });

        if disposition != Disposition::Ignored {
            let _ = OUTPUT_CHANNEL.try_send(line);
        }
    }
}

impl EventHandler for BeaconHandler {
    fn on_adv_reports(&self, mut it: LeAdvReportsIter<'_>) {
        while let Some(Ok(report)) = it.next() {
            self.on_report(report.data, report.rssi);
        }
    }

    fn on_ext_adv_reports(&self, mut it: LeExtAdvReportsIter<'_>) {
        while let Some(Ok(report)) = it.next() {
            self.on_report(report.data, report.rssi);
        }
    }
}

// ── Scheduler collaborators ──────────────────────────────────────────

/// Hands scan starts to the BLE scan session future. Session start failures
/// surface there and are fatal.
struct ScanRequester;

impl ScanRadio for ScanRequester {
    fn start_scan(&mut self) -> Result<(), Error> {
        SCAN_REQUEST.signal(());
        Ok(())
    }
}

fn scan_config<'a>() -> ScanConfig<'a> {
    ScanConfig {
        active: scheduler::SCAN_ACTIVE,
        phys: PhySet::M1,
        interval: Duration::from_micros(scheduler::scan_interval_us()),
        window: Duration::from_micros(scheduler::scan_window_us()),
        timeout: Duration::from_millis(scheduler::scan_duration_ms().unwrap_or(0)),
        ..Default::default()
    }
}

// ── Entry point ──────────────────────────────────────────────────────

#[esp_rtos::main]
async fn main(spawner: embassy_executor::Spawner) {
    esp_println::logger::init_logger_from_env();

    let peripherals = esp_hal::init(esp_hal::Config::default());

    // Heap for the BLE controller.
    esp_alloc::heap_allocator!(size: 64 * 1024);

    // Start the RTOS: requires timer + software interrupt
    let timg0 = TimerGroup::new(peripherals.TIMG0);
    let sw_int = SoftwareInterruptControl::new(peripherals.SW_INTERRUPT);
    esp_rtos::start(timg0.timer0, sw_int.software_interrupt0);

    log::info!(
        "Beacon scanner v{} starting on {}",
        env!("CARGO_PKG_VERSION"),
        board::BOARD_NAME
    );

    // ── Protocol UART ──────────────────────────────────────────────────

    let uart_config = uart::Config::default().with_baudrate(serial::SERIAL_BAUD);
    let uart = Uart::new(peripherals.UART1, uart_config).unwrap_or_else(|e| {
        log::error!("UART config rejected: {:?}", e);
        fatal(Error::SerialConfig)
    });

    #[cfg(feature = "board-xiao")]
    let uart = uart.with_tx(peripherals.GPIO43).with_rx(peripherals.GPIO44);
    #[cfg(all(feature = "board-devkit", not(feature = "board-xiao")))]
    let uart = uart.with_tx(peripherals.GPIO17).with_rx(peripherals.GPIO16);

    #[cfg(any(feature = "board-xiao", feature = "board-devkit"))]
    log::info!(
        "Protocol UART at {} baud (TX GPIO{}, RX GPIO{})",
        serial::SERIAL_BAUD,
        board::UART_TX_PIN,
        board::UART_RX_PIN
    );

    let (rx, tx) = uart.into_async().split();
    spawner.spawn(serial_tx_task(tx)).unwrap();
    spawner.spawn(serial_rx_task(rx)).unwrap();

    // ── BLE radio initialization ───────────────────────────────────────

    let connector =
        esp_radio::ble::controller::BleConnector::new(peripherals.BT, Default::default())
            .expect("BLE connector init failed");

    let controller: ExternalController<_, 20> = ExternalController::new(connector);

    static HOST_RESOURCES: StaticCell<HostResources<DefaultPacketPool, 1, 2>> = StaticCell::new();
    let resources = HOST_RESOURCES.init(HostResources::new());

    let address = Address::random([0xff, 0x8f, 0x1a, 0x05, 0xe4, 0xab]);

    let stack = trouble_host::new(controller, resources).set_random_address(address);
    let Host {
        central,
        mut runner,
        ..
    } = stack.build();

    log::info!("BLE radio initialized");

    let mut banner = LineBuffer::new();
    serial::emit_banner(&mut banner);
    OUTPUT_CHANNEL.send(banner).await;

    spawner.spawn(scan_scheduler_task()).unwrap();
    TRIGGERS.send(ScanTrigger::Startup).await;

    let handler = BeaconHandler::new();

    // ── BLE orchestration ──────────────────────────────────────────────
    //
    // Two concurrent futures via join:
    //   1. BLE stack runner (drives HCI, delivers reports to the handler)
    //   2. Scan session (started on request, held until restart or timeout)

    let _ = embassy_futures::join::join(
        async {
            loop {
                if let Err(e) = runner.run_with_handler(&handler).await {
                    log::error!("BLE runner error: {:?}", e);
                    Timer::after(Duration::from_secs(1)).await;
                }
            }
        },
        async {
            let mut scanner = trouble_host::scan::Scanner::new(central);
            let config = scan_config();

            loop {
                SCAN_REQUEST.wait().await;

                loop {
                    #[cfg(feature = "esp32s3")]
                    let session = scanner.scan_ext(&config).await;
                    #[cfg(not(feature = "esp32s3"))]
                    let session = scanner.scan(&config).await;

                    let session = match session {
                        Ok(session) => session,
                        Err(e) => {
                            log::error!("BLE scan failed to start: {:?}", e);
                            fatal(Error::ScanStart);
                        }
                    };

                    // Reports flow through BeaconHandler on the runner while
                    // the session is alive.
                    let restart = match scheduler::scan_duration_ms() {
                        Some(ms) => matches!(
                            select(SCAN_REQUEST.wait(), Timer::after(Duration::from_millis(ms))).await,
                            Either::First(_)
                        ),
                        None => {
                            SCAN_REQUEST.wait().await;
                            true
                        }
                    };
                    drop(session);

                    if !restart {
                        log::info!("Scan window elapsed");
                        TRIGGERS.send(ScanTrigger::ScanTimeout).await;
                        break;
                    }
                }
            }
        },
    )
    .await;
}

/// Scan lifecycle task: owns the scheduler and feeds it triggers.
#[embassy_executor::task]
async fn scan_scheduler_task() {
    let mut sched = ScanScheduler::new();
    let mut radio = ScanRequester;

    loop {
        let trigger = TRIGGERS.receive().await;
        match sched.handle(trigger, &mut radio, &FLASH) {
            Ok(state) => log::debug!("{:?} -> {:?}", trigger, state),
            Err(e) => fatal(e),
        }
    }
}

/// Serial output task: sole owner of the protocol UART transmitter.
#[embassy_executor::task]
async fn serial_tx_task(mut tx: UartTx<'static, Async>) {
    loop {
        let chunk = OUTPUT_CHANNEL.receive().await;

        let mut rest = &chunk[..];
        while !rest.is_empty() {
            match tx.write_async(rest).await {
                Ok(n) => rest = &rest[n..],
                Err(e) => {
                    log::error!("UART transmit error: {:?}", e);
                    fatal(Error::SerialComm)
                }
            }
        }
    }
}

/// Protocol UART receive task: echoes every byte and logs completed lines
/// (modem replies). Line errors are fatal.
#[embassy_executor::task]
async fn serial_rx_task(mut rx: UartRx<'static, Async>) {
    let mut echo = LineEcho::new();
    let mut buf = [0u8; 64];

    loop {
        let n = match rx.read_async(&mut buf).await {
            Ok(n) => n,
            Err(RxError::FifoOverflowed) => fatal(Error::SerialFifo),
            Err(e) => {
                log::error!("UART receive error: {:?}", e);
                fatal(Error::SerialComm)
            }
        };

        let mut echoed = LineBuffer::new();
        for &byte in &buf[..n] {
            if let Some(line) = echo.feed(byte, &mut echoed) {
                if let Ok(s) = core::str::from_utf8(line) {
                    log::info!("Serial RX: {}", s.trim_end());
                }
            }
        }
        let _ = OUTPUT_CHANNEL.try_send(echoed);
    }
}
