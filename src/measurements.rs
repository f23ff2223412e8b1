//! Atmospheric readings: the AM2320 sensor and the measurement reporter.

use crate::identity::Identity;
use crossbeam_channel::{Receiver, RecvTimeoutError};
use grpc::Status;
use protocol_ganymede::{AtmosphericMeasurements, DeviceApi, Measurement, Timestamp};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// 7-bit bus address of the AM2320.
pub const AM2320_ADDRESS: u8 = 0x5C;

/// Function code 0x03 (read registers), start register 0, four registers:
/// humidity high/low, temperature high/low.
pub const READ_COMMAND: [u8; 3] = [0x03, 0x00, 0x04];

pub const RESPONSE_LEN: usize = 8;

#[derive(Debug, thiserror::Error)]
pub enum SensorError {
    #[error("bus: {0}")]
    Bus(#[from] std::io::Error),
    #[error("unexpected function code {0:#04x}")]
    FunctionCode(u8),
    #[error("unexpected register count {0}")]
    Length(u8),
    #[error("crc mismatch: computed {computed:#06x}, received {received:#06x}")]
    Crc { computed: u16, received: u16 },
}

/// CRC-16/MODBUS.
pub fn crc16(data: &[u8]) -> u16 {
    let mut crc: u16 = 0xFFFF;
    for &byte in data {
        crc ^= u16::from(byte);
        for _ in 0..8 {
            if crc & 1 != 0 {
                crc = (crc >> 1) ^ 0xA001;
            } else {
                crc >>= 1;
            }
        }
    }
    crc
}

/// Decode a read-registers response.
///
/// Humidity is in tenths of a percent. Temperature is in tenths of a
/// degree Celsius, sign-magnitude with the sign in the top bit. The CRC
/// trails the payload, low byte first.
pub fn decode_response(
    response: &[u8; RESPONSE_LEN],
) -> Result<AtmosphericMeasurements, SensorError> {
    if response[0] != READ_COMMAND[0] {
        return Err(SensorError::FunctionCode(response[0]));
    }
    if response[1] != READ_COMMAND[2] {
        return Err(SensorError::Length(response[1]));
    }

    let computed = crc16(&response[..6]);
    let received = u16::from_le_bytes([response[6], response[7]]);
    if computed != received {
        return Err(SensorError::Crc { computed, received });
    }

    let humidity = u16::from_be_bytes([response[2], response[3]]);
    let raw_temperature = u16::from_be_bytes([response[4], response[5]]);
    let magnitude = f32::from(raw_temperature & 0x7FFF);
    let temperature = if raw_temperature & 0x8000 != 0 {
        -magnitude
    } else {
        magnitude
    };

    Ok(AtmosphericMeasurements {
        temperature: temperature / 10.0,
        humidity: f32::from(humidity) / 10.0,
    })
}

/// Raw I2C access for sensor drivers.
pub trait I2cBus: Send {
    fn write(&mut self, address: u8, data: &[u8]) -> std::io::Result<()>;

    fn read(&mut self, address: u8, buf: &mut [u8]) -> std::io::Result<()>;
}

pub trait Sensor: Send {
    fn read(&mut self) -> Result<AtmosphericMeasurements, SensorError>;
}

pub struct Am2320<B: I2cBus> {
    bus: B,
}

impl<B: I2cBus> Am2320<B> {
    pub fn new(bus: B) -> Self {
        Self { bus }
    }
}

impl<B: I2cBus> Sensor for Am2320<B> {
    fn read(&mut self) -> Result<AtmosphericMeasurements, SensorError> {
        // The sensor sleeps between reads and does not acknowledge the
        // wake-up write.
        let _ = self.bus.write(AM2320_ADDRESS, &[0x00]);
        thread::sleep(Duration::from_millis(10));

        self.bus.write(AM2320_ADDRESS, &READ_COMMAND)?;
        thread::sleep(Duration::from_micros(1500));

        let mut response = [0u8; RESPONSE_LEN];
        self.bus.read(AM2320_ADDRESS, &mut response)?;
        tracing::trace!(?response, "am2320 response");
        decode_response(&response)
    }
}

/// Pushes readings tagged with this device's id.
pub struct Reporter {
    api: DeviceApi,
    identity: Arc<Identity>,
}

impl Reporter {
    pub fn new(api: DeviceApi, identity: Arc<Identity>) -> Self {
        Self { api, identity }
    }

    pub fn measurement(&self, atmosphere: AtmosphericMeasurements) -> Result<Measurement, Status> {
        let device_id = self
            .identity
            .device_id()
            .ok_or_else(|| Status::local("device id not yet assigned"))?;
        Ok(Measurement {
            timestamp: Some(Timestamp::now()),
            device_id,
            atmosphere: Some(atmosphere),
        })
    }

    pub fn report(&self, atmosphere: AtmosphericMeasurements) -> Result<(), Status> {
        let measurement = self.measurement(atmosphere)?;
        self.api.push_measurements(vec![measurement])?;
        tracing::info!(
            temperature = atmosphere.temperature,
            humidity = atmosphere.humidity,
            "measurement pushed"
        );
        Ok(())
    }
}

pub enum ReporterEvent {
    /// A reading taken outside the sampling loop.
    Reading(AtmosphericMeasurements),
    Stop,
}

/// Sample `sensor` every `interval` and push manual readings as they
/// arrive. Without a sensor only manual readings are pushed.
pub fn run(
    reporter: Reporter,
    mut sensor: Option<Box<dyn Sensor>>,
    interval: Duration,
    events: Receiver<ReporterEvent>,
) {
    loop {
        let event = if sensor.is_some() {
            events.recv_timeout(interval)
        } else {
            events.recv().map_err(|_| RecvTimeoutError::Disconnected)
        };

        let reading = match event {
            Ok(ReporterEvent::Reading(reading)) => reading,
            Ok(ReporterEvent::Stop) | Err(RecvTimeoutError::Disconnected) => break,
            Err(RecvTimeoutError::Timeout) => {
                let Some(sensor) = sensor.as_mut() else {
                    continue;
                };
                match sensor.read() {
                    Ok(reading) => reading,
                    Err(e) => {
                        tracing::warn!(error = %e, "sensor read failed");
                        continue;
                    }
                }
            }
        };

        if let Err(status) = reporter.report(reading) {
            tracing::warn!(status = %status, "failed to push measurement");
        }
    }

    tracing::debug!("measurements task stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    const WARM: [u8; RESPONSE_LEN] = [0x03, 0x04, 0x01, 0xF4, 0x00, 0xFA, 0x31, 0xA5];
    const COLD: [u8; RESPONSE_LEN] = [0x03, 0x04, 0x02, 0x8F, 0x80, 0x65, 0x60, 0x50];

    #[test]
    fn test_crc16_modbus() {
        assert_eq!(crc16(b"123456789"), 0x4B37);
        assert_eq!(crc16(&WARM[..6]), 0xA531);
    }

    #[test]
    fn test_decode_positive_temperature() {
        let reading = decode_response(&WARM).unwrap();
        assert_eq!(reading.humidity, 50.0);
        assert_eq!(reading.temperature, 25.0);
    }

    #[test]
    fn test_decode_negative_temperature() {
        let reading = decode_response(&COLD).unwrap();
        assert_eq!(reading.humidity, 65.5);
        assert_eq!(reading.temperature, -10.1);
    }

    #[test]
    fn test_decode_rejects_bad_crc() {
        let mut response = WARM;
        response[3] ^= 1;
        assert!(matches!(
            decode_response(&response),
            Err(SensorError::Crc { received: 0xA531, .. })
        ));
    }

    #[test]
    fn test_decode_rejects_wrong_function_code() {
        let mut response = WARM;
        response[0] = 0x83;
        assert!(matches!(
            decode_response(&response),
            Err(SensorError::FunctionCode(0x83))
        ));

        let mut response = WARM;
        response[1] = 2;
        assert!(matches!(decode_response(&response), Err(SensorError::Length(2))));
    }

    struct ScriptedBus {
        writes: Vec<Vec<u8>>,
        response: [u8; RESPONSE_LEN],
    }

    impl I2cBus for ScriptedBus {
        fn write(&mut self, address: u8, data: &[u8]) -> std::io::Result<()> {
            assert_eq!(address, AM2320_ADDRESS);
            self.writes.push(data.to_vec());
            if data == [0x00] {
                return Err(std::io::Error::other("nack"));
            }
            Ok(())
        }

        fn read(&mut self, address: u8, buf: &mut [u8]) -> std::io::Result<()> {
            assert_eq!(address, AM2320_ADDRESS);
            buf.copy_from_slice(&self.response);
            Ok(())
        }
    }

    #[test]
    fn test_sensor_wakes_then_reads() {
        let mut sensor = Am2320::new(ScriptedBus {
            writes: Vec::new(),
            response: WARM,
        });
        let reading = sensor.read().unwrap();
        assert_eq!(reading.temperature, 25.0);
        assert_eq!(sensor.bus.writes, vec![vec![0x00], READ_COMMAND.to_vec()]);
    }
}
