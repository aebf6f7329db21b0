//! Cartridge GPIO block (ROM offsets 0xC4-0xC9) and the two devices that
//! hang off it: the real-time clock and the solar sensor.

use chrono::{Datelike, Timelike};
use serde::{Deserialize, Serialize};

use crate::bitwise::Bits;

const PIN_SCK: u8 = 0;
const PIN_SIO: u8 = 1;
const PIN_CS: u8 = 2;

fn to_bcd(value: u32) -> u8 {
    (((value / 10) << 4) | (value % 10)) as u8
}

/// S-3511 real-time clock. Seeded from the host clock at creation and
/// advanced only by explicit `set_datetime`, so emulation stays
/// deterministic between runs of the same state.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct Rtc {
    /// (year 0-99, month, day, weekday, hour, minute, second).
    datetime: (u8, u8, u8, u8, u8, u8, u8),
    control: u8,

    // Serial engine.
    state: RtcState,
    shift: u64,
    bit_count: u32,
    sck_old: bool,
}

#[derive(Default, Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
enum RtcState {
    #[default]
    WaitCommand,
    Sending {
        bits_left: u32,
    },
    ReceivingControl {
        bits_left: u32,
    },
}

impl Default for Rtc {
    fn default() -> Self {
        let now = chrono::Local::now();
        Self {
            datetime: (
                (now.year() % 100) as u8,
                now.month() as u8,
                now.day() as u8,
                now.weekday().num_days_from_sunday() as u8,
                now.hour() as u8,
                now.minute() as u8,
                now.second() as u8,
            ),
            control: 0x40,
            state: RtcState::WaitCommand,
            shift: 0,
            bit_count: 0,
            sck_old: true,
        }
    }
}

impl Rtc {
    pub fn set_datetime(
        &mut self,
        year: u8,
        month: u8,
        day: u8,
        weekday: u8,
        hour: u8,
        minute: u8,
        second: u8,
    ) {
        self.datetime = (year, month, day, weekday, hour, minute, second);
    }

    fn datetime_payload(&self) -> (u64, u32) {
        let (year, month, day, weekday, hour, minute, second) = self.datetime;
        let bytes = [
            to_bcd(year.into()),
            to_bcd(month.into()),
            to_bcd(day.into()),
            to_bcd(weekday.into()),
            to_bcd(hour.into()),
            to_bcd(minute.into()),
            to_bcd(second.into()),
        ];

        let mut payload = 0_u64;
        for (i, byte) in bytes.iter().enumerate() {
            payload |= u64::from(*byte) << (i * 8);
        }
        (payload, 56)
    }

    fn time_payload(&self) -> (u64, u32) {
        let (_, _, _, _, hour, minute, second) = self.datetime;
        let payload = u64::from(to_bcd(hour.into()))
            | (u64::from(to_bcd(minute.into())) << 8)
            | (u64::from(to_bcd(second.into())) << 16);
        (payload, 24)
    }

    /// Chip deselected: abort whatever was in flight.
    fn deselect(&mut self) {
        self.state = RtcState::WaitCommand;
        self.shift = 0;
        self.bit_count = 0;
    }

    /// One SCK rising edge with data-in `sio`. Returns the output bit
    /// while a read command is shifting out.
    fn clock(&mut self, sio: bool) -> bool {
        match self.state {
            RtcState::WaitCommand => {
                self.shift |= u64::from(sio) << self.bit_count;
                self.bit_count += 1;

                if self.bit_count == 8 {
                    let command = (self.shift as u8).reverse_bits();
                    self.shift = 0;
                    self.bit_count = 0;

                    // Commands arrive as 0110 cccr.
                    if command >> 4 == 0b0110 {
                        let code = (command >> 1) & 7;
                        let read = command & 1 != 0;
                        self.start_command(code, read);
                    } else {
                        logger::log(format!("RTC bad command byte {command:#04X}"));
                    }
                }
                false
            }
            RtcState::Sending { bits_left } => {
                let out = self.shift & 1 != 0;
                self.shift >>= 1;
                self.state = if bits_left > 1 {
                    RtcState::Sending {
                        bits_left: bits_left - 1,
                    }
                } else {
                    RtcState::WaitCommand
                };
                out
            }
            RtcState::ReceivingControl { bits_left } => {
                self.shift = (self.shift >> 1) | (u64::from(sio) << 7);
                self.state = if bits_left > 1 {
                    RtcState::ReceivingControl {
                        bits_left: bits_left - 1,
                    }
                } else {
                    self.control = self.shift as u8;
                    RtcState::WaitCommand
                };
                false
            }
        }
    }

    fn start_command(&mut self, code: u8, read: bool) {
        match (code, read) {
            // Reset.
            (0, false) => {
                self.control = 0;
            }
            // Control register.
            (4, true) => {
                self.shift = u64::from(self.control);
                self.state = RtcState::Sending { bits_left: 8 };
            }
            (4, false) => {
                self.state = RtcState::ReceivingControl { bits_left: 8 };
            }
            // Full date/time.
            (2, true) => {
                let (payload, bits) = self.datetime_payload();
                self.shift = payload;
                self.state = RtcState::Sending { bits_left: bits };
            }
            // Time only.
            (6, true) => {
                let (payload, bits) = self.time_payload();
                self.shift = payload;
                self.state = RtcState::Sending { bits_left: bits };
            }
            _ => logger::log(format!("RTC unimplemented command {code} read={read}")),
        }
    }
}

/// Cartridge solar sensor: the guest strobes a reset line, then counts
/// clock pulses until the sensor line flips, giving a light reading.
#[derive(Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct SolarSensor {
    /// 0 (bright) to 0xFF (dark); compared against the pulse counter.
    pub level: u8,
    counter: u8,
    clock_old: bool,
}

impl SolarSensor {
    pub fn set_light(&mut self, level: u8) {
        self.level = level;
    }

    /// Pin 1 strobes reset, pin 0 clocks the counter.
    fn update(&mut self, reset: bool, clock: bool) -> bool {
        if reset {
            self.counter = 0;
        } else if clock && !self.clock_old {
            self.counter = self.counter.saturating_add(1);
        }
        self.clock_old = clock;

        self.counter >= self.level
    }
}

#[derive(Default, Clone, PartialEq, Serialize, Deserialize)]
pub enum GpioDevice {
    #[default]
    None,
    Rtc(Rtc),
    Solar(SolarSensor),
}

/// The GPIO register block: data (0xC4), direction (0xC6), control
/// (0xC8). Registers are readable only when the control bit says so.
#[derive(Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct Gpio {
    pub device: GpioDevice,
    data: u8,
    /// 1 = pin driven by the guest, 0 = pin driven by the device.
    direction: u8,
    /// Bit 0: registers readable.
    control: u8,
}

impl Gpio {
    pub fn attach(&mut self, device: GpioDevice) {
        self.device = device;
    }

    pub fn is_readable(&self) -> bool {
        self.control & 1 != 0
    }

    pub fn read_byte(&mut self, offset: u32) -> u8 {
        if !self.is_readable() {
            return 0;
        }

        match offset {
            0xC4 => {
                // Device-driven pins read back from the device.
                let input = self.device_output();
                (self.data & self.direction) | (input & !self.direction)
            }
            0xC6 => self.direction,
            0xC8 => self.control,
            _ => 0,
        }
    }

    pub fn write_byte(&mut self, offset: u32, value: u8) {
        match offset {
            0xC4 => {
                self.data = value & 0xF;
                self.drive_device();
            }
            0xC6 => self.direction = value & 0xF,
            0xC8 => self.control = value & 1,
            _ => {}
        }
    }

    fn device_output(&self) -> u8 {
        match &self.device {
            GpioDevice::None => 0,
            GpioDevice::Rtc(_) => self.data & (1 << PIN_SIO),
            GpioDevice::Solar(solar) => {
                if solar.counter >= solar.level {
                    1 << 3
                } else {
                    0
                }
            }
        }
    }

    fn drive_device(&mut self) {
        let data = self.data;
        match &mut self.device {
            GpioDevice::None => {}
            GpioDevice::Rtc(rtc) => {
                let cs = data.get_bit(PIN_CS);
                let sck = data.get_bit(PIN_SCK);
                let sio = data.get_bit(PIN_SIO);

                if !cs {
                    rtc.deselect();
                    rtc.sck_old = sck;
                    return;
                }

                if sck && !rtc.sck_old {
                    let out = rtc.clock(sio);
                    // Present the output bit on SIO for the next read.
                    self.data.set_bit(PIN_SIO, out);
                }
                rtc.sck_old = sck;
            }
            GpioDevice::Solar(solar) => {
                solar.update(data.get_bit(1), data.get_bit(0));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::{Gpio, GpioDevice, Rtc, SolarSensor};

    /// Clocks one byte into the RTC lsb-first with chip select held.
    fn send_byte(gpio: &mut Gpio, byte: u8) {
        for bit in 0..8 {
            let sio = (byte >> bit) & 1;
            gpio.write_byte(0xC4, 0b100 | (sio << 1));
            gpio.write_byte(0xC4, 0b101 | (sio << 1));
        }
    }

    fn read_bits(gpio: &mut Gpio, count: usize) -> Vec<bool> {
        let mut bits = Vec::new();
        for _ in 0..count {
            gpio.write_byte(0xC4, 0b100);
            gpio.write_byte(0xC4, 0b101);
            bits.push(gpio.read_byte(0xC4) & 0b10 != 0);
        }
        bits
    }

    #[test]
    fn rtc_time_command_returns_bcd_time() {
        let mut gpio = Gpio::default();
        let mut rtc = Rtc::default();
        rtc.set_datetime(25, 6, 15, 0, 12, 34, 56);
        gpio.attach(GpioDevice::Rtc(rtc));

        gpio.write_byte(0xC8, 1); // readable
        gpio.write_byte(0xC6, 0b0111); // guest drives SCK/SIO/CS
        gpio.write_byte(0xC4, 0b100); // select

        // Time read command: 0110 1101 msb-first = 0x6D.
        send_byte(&mut gpio, 0x6D_u8.reverse_bits());

        gpio.write_byte(0xC6, 0b0101); // SIO now device-driven
        let bits = read_bits(&mut gpio, 24);
        let mut value = 0_u32;
        for (i, bit) in bits.iter().enumerate() {
            value |= u32::from(*bit) << i;
        }

        assert_eq!(value & 0xFF, 0x12); // 12 hours, BCD
        assert_eq!((value >> 8) & 0xFF, 0x34);
        assert_eq!((value >> 16) & 0xFF, 0x56);
    }

    #[test]
    fn solar_sensor_counts_to_light_level() {
        let mut gpio = Gpio::default();
        let mut solar = SolarSensor::default();
        solar.set_light(3);
        gpio.attach(GpioDevice::Solar(solar));

        gpio.write_byte(0xC8, 1);
        gpio.write_byte(0xC6, 0b0011);

        // Strobe reset.
        gpio.write_byte(0xC4, 0b10);
        gpio.write_byte(0xC4, 0b00);
        assert_eq!(gpio.read_byte(0xC4) & 0b1000, 0);

        for _ in 0..3 {
            gpio.write_byte(0xC4, 0b01);
            gpio.write_byte(0xC4, 0b00);
        }
        assert_eq!(gpio.read_byte(0xC4) & 0b1000, 0b1000);
    }
}
