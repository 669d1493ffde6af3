/// Hardware abstraction for supported boards.
///
/// Each board module defines the protocol UART pins selected at compile
/// time via feature flags. The console (logs) stays on the default UART0 /
/// USB-serial-JTAG, so the modem line carries only protocol bytes.

#[cfg(feature = "board-xiao")]
mod hw {
    pub const UART_TX_PIN: u8 = 43; // D6
    pub const UART_RX_PIN: u8 = 44; // D7
    pub const BOARD_NAME: &str = "xiao_esp32s3";
}

#[cfg(all(feature = "board-devkit", not(feature = "board-xiao")))]
mod hw {
    pub const UART_TX_PIN: u8 = 17;
    pub const UART_RX_PIN: u8 = 16;
    pub const BOARD_NAME: &str = "esp32_devkitc";
}

#[cfg(not(any(feature = "board-xiao", feature = "board-devkit")))]
mod hw {
    pub const BOARD_NAME: &str = "unknown";
}

pub use hw::*;
