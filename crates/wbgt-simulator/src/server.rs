//! Telemetry over `tiny_http`, answered by a small pool of worker threads.

use std::io::Read;

use embassy_futures::block_on;
use log::{info, warn};
use rand::RngCore;
use tiny_http::{Header, Server};
use wbgt_core::http::{MAX_REQUEST_SIZE, Method, Request, Response, Status};
use wbgt_core::sensors::{ClimateReadings, ProbeReadings, Sensor};
use wbgt_core::storage::StorageMedium;
use wbgt_core::telemetry::TelemetryService;

/// Same worker count as the board.
pub const WORKER_COUNT: usize = 3;

/// Answer requests until the server shuts down.
pub fn serve<C, P, M, R>(server: &Server, telemetry: &TelemetryService<'_, C, P, M, R>)
where
    C: Sensor<Readings = ClimateReadings> + Send,
    P: Sensor<Readings = ProbeReadings> + Send,
    M: StorageMedium + Send,
    R: RngCore + Send,
{
    std::thread::scope(|scope| {
        for worker in 0..WORKER_COUNT {
            scope.spawn(move || {
                loop {
                    match server.recv() {
                        Ok(request) => respond(request, telemetry),
                        Err(e) => {
                            warn!("worker {}: receive failed: {}", worker, e);
                            break;
                        }
                    }
                }
            });
        }
    });
}

/// Run one request through the telemetry service and send the reply.
pub fn respond<C, P, M, R>(
    mut request: tiny_http::Request,
    telemetry: &TelemetryService<'_, C, P, M, R>,
) where
    C: Sensor<Readings = ClimateReadings>,
    P: Sensor<Readings = ProbeReadings>,
    M: StorageMedium,
    R: RngCore,
{
    let response = match read_request(&mut request) {
        Ok(parsed) => {
            info!("{:?} {}", parsed.method, parsed.path);
            block_on(telemetry.handle(&parsed))
        }
        Err(rejection) => {
            warn!("rejected {} {}: {:?}", request.method(), request.url(), rejection.status);
            rejection
        }
    };

    if let Err(e) = request.respond(into_reply(response)) {
        warn!("reply failed: {}", e);
    }
}

fn read_request(request: &mut tiny_http::Request) -> Result<Request, Response> {
    let method = match request.method() {
        tiny_http::Method::Get => Method::Get,
        tiny_http::Method::Post => Method::Post,
        _ => Method::Other,
    };
    let path = request.url().split('?').next().unwrap_or("/").to_owned();

    let mut body = Vec::new();
    request
        .as_reader()
        .take(MAX_REQUEST_SIZE as u64 + 1)
        .read_to_end(&mut body)
        .map_err(|e| Response::text(Status::BadRequest, &format!("unreadable body: {e}")))?;
    if body.len() > MAX_REQUEST_SIZE {
        return Err(Response::text(Status::PayloadTooLarge, "request too large"));
    }

    Ok(Request { method, path, body })
}

fn into_reply(response: Response) -> tiny_http::Response<std::io::Cursor<Vec<u8>>> {
    let mut reply =
        tiny_http::Response::from_data(response.body).with_status_code(response.status.code());
    for (name, value) in [
        ("Content-Type", response.content_type),
        ("Cache-Control", "no-cache"),
    ] {
        match Header::from_bytes(name.as_bytes(), value.as_bytes()) {
            Ok(header) => reply.add_header(header),
            Err(()) => warn!("dropping invalid header {}", name),
        }
    }
    reply
}
