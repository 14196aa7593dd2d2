use alloc::collections::VecDeque;
use lazy_static::lazy_static;
use spin::Mutex;

/// Bytes kept in the transmit buffer before the oldest ones are dropped.
const TX_CAPACITY: usize = 64 * 1024;

/// COM1 of the simulated machine.
///
/// There is no line to drive, so transmitted bytes land in a bounded FIFO.
pub struct SerialPort {
    base: u16,
    tx: VecDeque<u8>,
    line_ctrl: u8,
}

impl SerialPort {
    pub const fn new(base: u16) -> SerialPort {
        SerialPort {
            base,
            tx: VecDeque::new(),
            line_ctrl: 0,
        }
    }

    /// 8 data bits, no parity, one stop bit.
    pub fn init(&mut self) {
        self.line_ctrl = 0x03;
        self.tx.clear();
    }

    pub fn base(&self) -> u16 {
        self.base
    }

    pub fn send(&mut self, data: u8) {
        if self.tx.len() == TX_CAPACITY {
            self.tx.pop_front();
        }
        self.tx.push_back(data);
    }
}

impl core::fmt::Write for SerialPort {
    fn write_str(&mut self, s: &str) -> core::fmt::Result {
        for byte in s.bytes() {
            self.send(byte);
        }
        Ok(())
    }
}

lazy_static! {
    pub static ref SERIAL1: Mutex<SerialPort> = {
        let mut serial_port = SerialPort::new(0x3F8);
        serial_port.init();
        Mutex::new(serial_port)
    };
}

#[doc(hidden)]
pub fn _print(args: ::core::fmt::Arguments) {
    use core::fmt::Write;
    // Writing into the FIFO cannot fail.
    let _ = SERIAL1.lock().write_fmt(args);
}

/// Raw bytes from user space (console writes) go out unformatted.
pub fn write_bytes(bytes: &[u8]) {
    let mut port = SERIAL1.lock();
    for &b in bytes {
        port.send(b);
    }
}

#[macro_export]
macro_rules! log_info {
    ($($arg:tt)*) => {
        $crate::serial::_print(format_args!("[INFO] "));
        $crate::serial::_print(format_args!($($arg)*));
        $crate::serial::_print(format_args!("\n"));
    };
}

#[macro_export]
macro_rules! log_warn {
    ($($arg:tt)*) => {
        $crate::serial::_print(format_args!("[WARN] "));
        $crate::serial::_print(format_args!($($arg)*));
        $crate::serial::_print(format_args!("\n"));
    };
}

#[macro_export]
macro_rules! log_error {
    ($($arg:tt)*) => {
        $crate::serial::_print(format_args!("[ERROR] "));
        $crate::serial::_print(format_args!($($arg)*));
        $crate::serial::_print(format_args!("\n"));
    };
}

pub fn init() {
    let _ = SERIAL1.lock();
}

#[cfg(test)]
mod tests {
    use super::SerialPort;
    use core::fmt::Write;

    #[test]
    fn transmit_buffer_is_bounded() {
        let mut port = SerialPort::new(0x3F8);
        port.init();
        for _ in 0..super::TX_CAPACITY + 10 {
            port.send(b'a');
        }
        port.send(b'z');
        assert_eq!(port.tx.len(), super::TX_CAPACITY);
        assert_eq!(port.tx.back(), Some(&b'z'));
    }

    #[test]
    fn formatted_writes_reach_the_fifo() {
        let mut port = SerialPort::new(0x2F8);
        port.init();
        write!(port, "[INFO] pid {}", 3).unwrap();
        assert!(port.tx.iter().eq(b"[INFO] pid 3".iter()));
        assert_eq!(port.base(), 0x2F8);
    }
}
