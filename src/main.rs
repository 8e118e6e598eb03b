#![cfg_attr(target_arch = "avr", no_std)]
#![cfg_attr(target_arch = "avr", no_main)]
#![cfg_attr(target_arch = "avr", feature(abi_avr_interrupt))]

use cooptask::config::{priority, MAX_TASKS};
use cooptask::{Action, Config, Interrupts, LogLevel, PermanentTask, SerialLog, TaskManager};

static PERMANENT: [PermanentTask; 1] = [PermanentTask {
    action: Action::Nullary(heartbeat),
    priority: priority::LOW,
    delay: 0,
    period: 1000,
}];

const CONFIG: Config = Config {
    permanent: &PERMANENT,
    ..Config::DEFAULT
};

fn heartbeat() {
    report("heartbeat");
}

fn blink(led: usize) {
    report_led(led);
}

fn burst(level: usize) {
    report_level(level);
}

fn start_demo<I: Interrupts, const N: usize>(tasks: &TaskManager<'_, I, N>) {
    // a full pool is logged by the task manager
    let _ = tasks.schedule_count_with_input(blink, 0, priority::MEDIUM, 250, 250, 8);
    for level in [priority::LOWEST, priority::HIGHEST, priority::MEDIUM] {
        let _ = tasks.queue_with_input(burst, level as usize, level);
    }
}

#[cfg(target_arch = "avr")]
mod firmware {
    use super::*;

    use avr_device::atmega128a::Peripherals;
    use cooptask::hal::{SysTick, Usart0};
    use cooptask::{AvrInterrupts, Clock};
    use panic_halt as _;

    pub static CLOCK: Clock<AvrInterrupts> = Clock::new();
    pub static TASKS: TaskManager<'static, AvrInterrupts, MAX_TASKS> =
        TaskManager::with_config(&CLOCK, CONFIG);
    pub static LOG: SerialLog<Usart0> = SerialLog::new(Usart0::new(), LogLevel::Info);

    #[avr_device::interrupt(atmega128a)]
    fn TIMER0_COMP() {
        CLOCK.increment();
    }

    #[avr_device::entry]
    fn main() -> ! {
        // only fails if called twice
        let Some(dp) = Peripherals::take() else {
            #[allow(clippy::empty_loop)]
            loop {}
        };

        Usart0::configure(dp.USART0);
        let mut systick = SysTick::new(dp.TC0);

        CLOCK.init();
        TASKS.set_logger(&LOG);
        TASKS.init();

        systick.start();
        unsafe { avr_device::interrupt::enable() };

        start_demo(&TASKS);

        loop {
            TASKS.tick();
        }
    }

    pub fn report(what: &str) {
        let mut port = Usart0::new();
        ufmt::uwriteln!(port, "{} ms  {}\r", CLOCK.now(), what).ok();
    }

    pub fn report_led(led: usize) {
        let mut port = Usart0::new();
        ufmt::uwriteln!(port, "{} ms  toggle led {}\r", CLOCK.now(), led).ok();
    }

    pub fn report_level(level: usize) {
        let mut port = Usart0::new();
        ufmt::uwriteln!(port, "{} ms  burst at priority {}\r", CLOCK.now(), level).ok();
    }
}

#[cfg(target_arch = "avr")]
use firmware::{report, report_led, report_level};

#[cfg(not(target_arch = "avr"))]
mod simulation {
    use super::*;

    use std::convert::Infallible;
    use std::io::Write as _;

    use cooptask::{Clock, NoInterrupts};
    use embedded_hal::serial;

    type Tasks = TaskManager<'static, NoInterrupts, MAX_TASKS>;

    // `NoInterrupts` masks nothing, so these stay on the simulating thread
    thread_local! {
        static CLOCK: &'static Clock<NoInterrupts> = Box::leak(Box::new(Clock::new()));
        static TASKS: &'static Tasks =
            CLOCK.with(|clock| &*Box::leak(Box::new(TaskManager::with_config(*clock, CONFIG))));
    }

    fn clock() -> &'static Clock<NoInterrupts> {
        CLOCK.with(|clock| *clock)
    }

    fn tasks() -> &'static Tasks {
        TASKS.with(|tasks| *tasks)
    }

    /// Host stand-in for the console UART.
    pub struct Stdout;

    impl serial::Write<u8> for Stdout {
        type Error = Infallible;

        fn write(&mut self, byte: u8) -> nb::Result<(), Infallible> {
            if byte != b'\r' {
                std::io::stdout().write_all(&[byte]).ok();
            }
            Ok(())
        }

        fn flush(&mut self) -> nb::Result<(), Infallible> {
            std::io::stdout().flush().ok();
            Ok(())
        }
    }

    pub fn run(millis: u32) {
        let (clock, tasks) = (clock(), tasks());
        let log = Box::leak(Box::new(SerialLog::new(Stdout, LogLevel::Debug)));
        tasks.set_logger(log);
        tasks.init();
        start_demo(tasks);

        for _ in 0..millis {
            // the timer interrupt
            clock.increment();
            tasks.tick();
        }

        println!(
            "done at {}: {} queued, {} scheduled, high water {}",
            clock.now_formatted(),
            tasks.queue_len(),
            tasks.schedule_len(),
            tasks.high_water()
        );
        tasks.shutdown();
    }

    pub fn report(what: &str) {
        println!("{:>6} ms  {}", clock().now(), what);
    }

    pub fn report_led(led: usize) {
        println!("{:>6} ms  toggle led {}", clock().now(), led);
    }

    pub fn report_level(level: usize) {
        println!("{:>6} ms  burst at priority {}", clock().now(), level);
    }
}

#[cfg(not(target_arch = "avr"))]
use simulation::{report, report_led, report_level};

#[cfg(not(target_arch = "avr"))]
fn main() {
    let millis = std::env::args()
        .nth(1)
        .and_then(|arg| arg.parse().ok())
        .unwrap_or(3000);
    simulation::run(millis);
}
