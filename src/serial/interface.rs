use std::io::{Read, Write};
use std::time::Duration;
use serialport::{SerialPort, SerialPortType};
use tokio::time::timeout;

use super::{Result, SerialPortInfo, Transport, TransportError};

pub const DEFAULT_BAUD_RATE: u32 = 9600;

/// UART transport backed by the `serialport` crate
pub struct SerialTransport {
    port_name: String,
    baud_rate: u32,
    port: Option<Box<dyn SerialPort>>,
}

impl SerialTransport {
    pub fn new(port_name: impl Into<String>, baud_rate: u32) -> Self {
        Self {
            port_name: port_name.into(),
            baud_rate,
            port: None,
        }
    }

    /// List the serial ports present on this host
    pub fn discover_ports() -> Result<Vec<SerialPortInfo>> {
        let ports = serialport::available_ports()?;
        let mut found = Vec::new();

        for port in ports {
            let info = match port.port_type {
                SerialPortType::UsbPort(usb_info) => SerialPortInfo {
                    port_name: port.port_name.clone(),
                    vid: Some(usb_info.vid),
                    pid: Some(usb_info.pid),
                    serial_number: usb_info.serial_number.clone(),
                    manufacturer: usb_info.manufacturer.clone(),
                    product: usb_info.product.clone(),
                },
                _ => SerialPortInfo {
                    port_name: port.port_name.clone(),
                    vid: None,
                    pid: None,
                    serial_number: None,
                    manufacturer: None,
                    product: None,
                },
            };
            found.push(info);
        }

        Ok(found)
    }
}

#[async_trait::async_trait]
impl Transport for SerialTransport {
    async fn open(&mut self, open_timeout: Duration) -> Result<()> {
        if self.port.is_some() {
            return Ok(());
        }

        let builder = serialport::new(self.port_name.clone(), self.baud_rate)
            .timeout(Duration::from_millis(100));
        let port_name = self.port_name.clone();

        let port = timeout(open_timeout, tokio::task::spawn_blocking(move || builder.open()))
            .await
            .map_err(|_| TransportError::Timeout)?
            .map_err(|e| TransportError::ConnectionFailed(e.to_string()))?
            .map_err(|e| match e.kind() {
                serialport::ErrorKind::NoDevice => TransportError::PortNotFound(port_name.clone()),
                _ => TransportError::ConnectionFailed(e.to_string()),
            })?;

        self.port = Some(port);
        log::info!("Opened serial port {} at {} baud", self.port_name, self.baud_rate);
        Ok(())
    }

    async fn close(&mut self, close_timeout: Duration) -> Result<()> {
        let Some(mut port) = self.port.take() else {
            return Ok(());
        };

        // Flush pending output before the handle is dropped
        timeout(close_timeout, tokio::task::spawn_blocking(move || port.flush()))
            .await
            .map_err(|_| TransportError::Timeout)?
            .map_err(|e| TransportError::ConnectionFailed(e.to_string()))??;

        log::info!("Closed serial port {}", self.port_name);
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.port.is_some()
    }

    async fn send_data(&mut self, data: &[u8]) -> Result<usize> {
        let port = self.port.as_mut().ok_or(TransportError::NotOpen)?;

        port.write_all(data).map_err(TransportError::IoError)?;
        port.flush().map_err(TransportError::IoError)?;

        Ok(data.len())
    }

    async fn read_data(&mut self, buffer: &mut [u8], timeout_ms: u64) -> Result<usize> {
        let port = self.port.as_mut().ok_or(TransportError::NotOpen)?;

        let read_operation = async {
            loop {
                match port.bytes_to_read() {
                    Ok(0) => tokio::time::sleep(Duration::from_millis(5)).await,
                    Ok(_) => match port.read(buffer) {
                        Ok(0) => tokio::time::sleep(Duration::from_millis(5)).await,
                        Ok(bytes_read) => return Ok(bytes_read),
                        Err(ref e) if e.kind() == std::io::ErrorKind::TimedOut => {}
                        Err(e) => return Err(TransportError::IoError(e)),
                    },
                    Err(e) => return Err(TransportError::SerialportError(e)),
                }
            }
        };

        timeout(Duration::from_millis(timeout_ms), read_operation)
            .await
            .map_err(|_| TransportError::Timeout)?
    }
}
