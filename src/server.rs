use crate::modbus::{
    self, Exception, ModbusTCPCodec, Operation, Request, Response, ResponseKind,
};
use crate::slave::{
    CoilsRequest, DiscreteInputsRequest, HoldingRegistersRequest, InputRegistersRequest,
    RequestHandler,
};
use futures::{SinkExt as _, StreamExt as _};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Semaphore;
use tokio_util::codec::Framed;
use tracing::{debug, info, trace, warn};

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("could not listen for modbus connections on `{1}`")]
    Bind(#[source] std::io::Error, String),
    #[error("could not query the modbus listener address")]
    LocalAddr(#[source] std::io::Error),
    #[error("could not accept a modbus connection")]
    Accept(#[source] std::io::Error),
}

#[derive(clap::Parser, Clone, Debug)]
#[group(id = "server::Args")]
pub struct Args {
    /// Address to accept Modbus TCP connections from the controller (or a bus gateway) on.
    #[arg(long, default_value = "0.0.0.0:502")]
    pub modbus_listen: String,

    /// The modbus unit ID this gateway answers to.
    ///
    /// Requests for other units are ignored without a response. Unit 0 is always accepted.
    #[arg(long, default_value = "240")]
    pub unit_id: u8,

    /// Maximum number of simultaneously connected modbus masters.
    ///
    /// Further connections are closed immediately.
    #[arg(long, default_value = "5")]
    pub max_clients: usize,

    /// Close a modbus connection after it has been idle for this long.
    #[arg(long, default_value = "30s")]
    pub client_timeout: humantime::Duration,
}

pub struct Server {
    listener: TcpListener,
    handler: Arc<dyn RequestHandler>,
    slots: Arc<Semaphore>,
    client_timeout: Duration,
}

impl Server {
    pub async fn bind(args: &Args, handler: Arc<dyn RequestHandler>) -> Result<Server, Error> {
        let listener = TcpListener::bind(&args.modbus_listen)
            .await
            .map_err(|e| Error::Bind(e, args.modbus_listen.clone()))?;
        Ok(Server {
            listener,
            handler,
            slots: Arc::new(Semaphore::new(args.max_clients)),
            client_timeout: *args.client_timeout,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, Error> {
        self.listener.local_addr().map_err(Error::LocalAddr)
    }

    /// Accept connections until an accept fails.
    pub async fn run(self) -> Result<(), Error> {
        info!(message = "serving modbus", address = ?self.listener.local_addr().ok());
        loop {
            let (socket, peer) = self.listener.accept().await.map_err(Error::Accept)?;
            let Ok(slot) = Arc::clone(&self.slots).try_acquire_owned() else {
                warn!(message = "too many modbus clients, closing connection", %peer);
                drop(socket);
                continue;
            };
            info!(message = "modbus client connected", %peer);
            let handler = Arc::clone(&self.handler);
            let client_timeout = self.client_timeout;
            tokio::spawn(async move {
                if let Err(e) = serve_connection(socket, &*handler, client_timeout).await {
                    warn!(
                        message = "modbus connection failed",
                        %peer,
                        error = (&e as &dyn std::error::Error)
                    );
                }
                info!(message = "modbus client disconnected", %peer);
                drop(slot);
            });
        }
    }
}

async fn serve_connection(
    socket: TcpStream,
    handler: &dyn RequestHandler,
    client_timeout: Duration,
) -> Result<(), std::io::Error> {
    let nodelay_result = socket.set_nodelay(true);
    trace!(message = "setting nodelay", is_error = ?nodelay_result.err());
    let (mut io_sink, mut io_source) = Framed::new(socket, ModbusTCPCodec {}).split();
    loop {
        let request = match tokio::time::timeout(client_timeout, io_source.next()).await {
            Err(_) => {
                debug!(message = "modbus client idle for too long", ?client_timeout);
                break;
            }
            Ok(None) => break,
            Ok(Some(request)) => request?,
        };
        trace!(message = "decoded a request", ?request);
        let Some(response) = dispatch(handler, &request) else {
            continue;
        };
        io_sink.send(response).await?;
    }
    io_sink.close().await
}

fn check_count(count: u16, max: u16) -> Result<u16, Exception> {
    if count == 0 || count > max {
        return Err(Exception::IllegalDataValue);
    }
    Ok(count)
}

/// Route a decoded request to the matching handler callback.
///
/// Returns `None` when the request must be left unanswered: it is addressed to a unit the handler
/// does not serve, or the handler chose to ignore it.
pub fn dispatch(handler: &dyn RequestHandler, request: &Request) -> Option<Response> {
    let function = request.operation.function();
    let unit_id = request.unit_id;
    if !handler.accepts(unit_id) {
        debug!(message = "ignoring request for another unit", unit_id, function);
        return None;
    }
    let result = match request.operation {
        Operation::ReadCoils { address, count } => {
            check_count(count, modbus::MAX_READ_BITS).and_then(|quantity| {
                let req = CoilsRequest {
                    unit_id,
                    is_write: false,
                    address,
                    quantity,
                    args: vec![],
                };
                let values = handler.handle_coils(&req)?;
                Ok(values.map(|values| ResponseKind::ReadBits { function, values }))
            })
        }
        Operation::ReadDiscreteInputs { address, count } => {
            check_count(count, modbus::MAX_READ_BITS).and_then(|quantity| {
                let req = DiscreteInputsRequest { unit_id, address, quantity };
                let values = handler.handle_discrete_inputs(&req)?;
                Ok(values.map(|values| ResponseKind::ReadBits { function, values }))
            })
        }
        Operation::ReadHoldings { address, count } => {
            check_count(count, modbus::MAX_READ_REGISTERS).and_then(|quantity| {
                let req = HoldingRegistersRequest {
                    unit_id,
                    is_write: false,
                    address,
                    quantity,
                    args: vec![],
                };
                let values = handler.handle_holding_registers(&req)?;
                Ok(values.map(|values| ResponseKind::ReadRegisters { function, values }))
            })
        }
        Operation::ReadInputs { address, count } => {
            check_count(count, modbus::MAX_READ_REGISTERS).and_then(|quantity| {
                let req = InputRegistersRequest { unit_id, address, quantity };
                let values = handler.handle_input_registers(&req)?;
                Ok(values.map(|values| ResponseKind::ReadRegisters { function, values }))
            })
        }
        Operation::WriteCoil { address, value } => {
            let req = CoilsRequest {
                unit_id,
                is_write: true,
                address,
                quantity: 1,
                args: vec![value],
            };
            handler.handle_coils(&req).map(|values| {
                values.map(|_| ResponseKind::WriteSingle {
                    function,
                    address,
                    value: if value { 0xFF00 } else { 0x0000 },
                })
            })
        }
        Operation::WriteHolding { address, value } => {
            let req = HoldingRegistersRequest {
                unit_id,
                is_write: true,
                address,
                quantity: 1,
                args: vec![value],
            };
            handler.handle_holding_registers(&req).and_then(|values| match values.as_deref() {
                None => Ok(None),
                Some(&[value]) => Ok(Some(ResponseKind::WriteSingle { function, address, value })),
                Some(_) => Err(Exception::ServerDeviceFailure),
            })
        }
        Operation::WriteCoils { address, ref values } => {
            u16::try_from(values.len())
                .map_err(|_| Exception::IllegalDataValue)
                .and_then(|count| check_count(count, modbus::MAX_WRITE_BITS))
                .and_then(|quantity| {
                    let req = CoilsRequest {
                        unit_id,
                        is_write: true,
                        address,
                        quantity,
                        args: values.clone(),
                    };
                    let values = handler.handle_coils(&req)?;
                    Ok(values.map(|_| ResponseKind::WriteMultiple {
                        function,
                        address,
                        count: quantity,
                    }))
                })
        }
        Operation::WriteHoldings { address, ref values } => {
            u16::try_from(values.len())
                .map_err(|_| Exception::IllegalDataValue)
                .and_then(|count| check_count(count, modbus::MAX_WRITE_REGISTERS))
                .and_then(|quantity| {
                    let req = HoldingRegistersRequest {
                        unit_id,
                        is_write: true,
                        address,
                        quantity,
                        args: values.clone(),
                    };
                    let values = handler.handle_holding_registers(&req)?;
                    Ok(values.map(|_| ResponseKind::WriteMultiple {
                        function,
                        address,
                        count: quantity,
                    }))
                })
        }
        Operation::Malformed { .. } => Err(Exception::IllegalDataValue),
        Operation::Unsupported { .. } => Err(Exception::IllegalFunction),
    };
    match result {
        Ok(None) => None,
        Ok(Some(kind)) => Some(Response::to(request, kind)),
        Err(exception) => {
            debug!(message = "rejecting modbus request", function, %exception);
            Some(Response::to(request, ResponseKind::Exception { function, exception }))
        }
    }
}
