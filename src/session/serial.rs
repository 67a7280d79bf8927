use std::io::Read;

use serialport::SerialPort;

use super::{Link, LoopCtx, READ_CHUNK, SerialParams, SessionError, is_poll_timeout};
use crate::port::open_port;

/// Open the port and attach a cloned handle as the session's writer.
pub(super) fn open(params: &SerialParams, link: &Link) -> Result<Box<dyn SerialPort>, SessionError> {
    let err = |source| SessionError::Serial {
        dev: params.dev.clone(),
        source,
    };
    let port = open_port(params).map_err(err)?;
    let writer = port.try_clone().map_err(err)?;
    link.attach(Box::new(writer));
    Ok(port)
}

pub(super) fn read_loop(mut port: Box<dyn SerialPort>, mut ctx: LoopCtx) {
    let name = port.name().unwrap_or_default();
    log::debug!("serial read loop started on {name}");
    let mut buf = [0u8; READ_CHUNK];

    while !ctx.stopped() {
        match port.read(&mut buf) {
            Ok(0) => continue,
            Ok(n) => ctx.deliver("", &buf[..n]),
            Err(e) if is_poll_timeout(&e) => continue,
            Err(e) => {
                ctx.events.error(format!("serial read error on {name}: {e}"));
                break;
            }
        }
    }

    ctx.link.detach();
    ctx.handler.on_close();
    log::debug!("serial read loop on {name} exited");
}
