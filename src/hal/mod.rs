pub mod timer;
pub mod uart;

// Re-export commonly used types
pub use timer::{Prescaler, SysTick};
pub use uart::Usart0;
