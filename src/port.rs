use serialport::{DataBits, FlowControl, Parity, SerialPort, SerialPortType, StopBits};

use crate::session::{POLL_INTERVAL, SerialParams};

pub fn open_port(params: &SerialParams) -> serialport::Result<Box<dyn SerialPort>> {
    serialport::new(&params.dev, params.baud)
        .timeout(POLL_INTERVAL)
        .data_bits(DataBits::Eight)
        .parity(Parity::None)
        .stop_bits(StopBits::One)
        .flow_control(if params.rtscts {
            FlowControl::Hardware
        } else {
            FlowControl::None
        })
        .open()
}

/// `(device, description)` for every serial port the OS reports.
pub fn list_ports() -> serialport::Result<Vec<(String, String)>> {
    let mut ports: Vec<(String, String)> = serialport::available_ports()?
        .into_iter()
        .map(|p| {
            let desc = match p.port_type {
                SerialPortType::UsbPort(usb) => format!(
                    "usb {:04x}:{:04x} {}",
                    usb.vid,
                    usb.pid,
                    usb.product.unwrap_or_default()
                ),
                SerialPortType::PciPort => "pci".to_string(),
                SerialPortType::BluetoothPort => "bluetooth".to_string(),
                SerialPortType::Unknown => String::new(),
            };
            (p.port_name, desc.trim_end().to_string())
        })
        .collect();
    ports.sort();
    Ok(ports)
}
