//! Stream Gateway Module
//!
//! This module defines the HTTP and WebSocket gateway using the `picoserve`
//! framework. It serves the control page, validates and applies drive
//! commands on `/move`, streams MJPEG on `/stream`, and runs the
//! authenticated WebSocket frame-push channel on `/ws`.

extern crate alloc;

use alloc::string::String;

use embassy_futures::select::{select, Either};
use embassy_net::Stack;
use embassy_time::{Duration, Timer};
use embedded_hal::i2c::I2c;
use embedded_io_async::Read;
use picoserve::{
    extract::FromRequest,
    io::embedded_io_async as embedded_aio,
    request::{RequestBody, RequestParts},
    response::{
        chunked::{ChunkWriter, ChunkedResponse, Chunks, ChunksWritten},
        ws::{Message, ReadMessageError, SocketRx, SocketTx, WebSocketCallback, WebSocketUpgrade},
        Response, StatusCode,
    },
    routing::get,
    url_encoded::deserialize_form,
    Router,
};
use serde::Deserialize;

use crate::utils::{
    camera::{Frame, FrameEvent, FrameSlot, FrameSource},
    connection::session::{
        parse_auth_message, verify_basic, Authenticator, SessionManager, AUTH_FAILED, AUTH_OK,
    },
    controllers::{CommandError, CommandRouter, DriveCommand},
    frontend,
};

/// Minimum delay between frame pushes to one WebSocket client.
pub const FRAME_INTERVAL: Duration = Duration::from_millis(100);

/// Poll interval of the chunked stream while the slot has nothing new.
const STREAM_POLL: Duration = Duration::from_millis(10);

const MISSING_DIRECTION: &str = "Bad Request: Missing 'direction' parameter";
const UNKNOWN_DIRECTION: &str = "Bad Request: Unrecognized 'direction' value";
const TEXT_PLAIN: (&str, &str) = ("Content-Type", "text/plain; charset=utf-8");

/// Content type of the MJPEG pull stream.
pub const MJPEG_CONTENT_TYPE: &str = "multipart/x-mixed-replace; boundary=frame";

/// Boundary and part headers preceding each JPEG payload.
pub const MJPEG_PART_HEADER: &[u8] = b"--frame\r\nContent-Type: image/jpeg\r\n\r\n";

/// Terminator following each JPEG payload.
pub const MJPEG_PART_TRAILER: &[u8] = b"\r\n";

/// What the chunked stream does with the outcome of one acquire.
#[derive(Debug)]
pub enum StreamStep {
    /// Emit the frame as one boundary-delimited part.
    Emit(Frame),
    /// End this connection's stream; the process keeps serving.
    Terminate,
    /// Nothing new in the slot, poll again shortly.
    Idle,
}

/// Per-part decision of the MJPEG stream.
pub fn stream_step(event: Option<FrameEvent>) -> StreamStep {
    match event {
        Some(FrameEvent::Captured(frame)) => StreamStep::Emit(frame),
        Some(FrameEvent::CaptureFailed) => StreamStep::Terminate,
        None => StreamStep::Idle,
    }
}

/// Per-cycle decision of the WebSocket push loop.
///
/// Unauthenticated sessions never receive a frame; failed cycles and empty
/// slots are skipped silently.
pub fn push_frame(
    authenticated: bool,
    event: Option<FrameEvent>,
) -> Option<Frame> {
    match event {
        Some(FrameEvent::Captured(frame)) if authenticated => Some(frame),
        _ => None,
    }
}

/// Context object wiring the gateway's collaborators together.
///
/// Constructed by the application and passed to `run`; there are no
/// process-wide singletons beyond the session registry, so tests can
/// instantiate isolated gateways.
pub struct StreamGateway<'a, I2C: 'static> {
    pub commands: CommandRouter<'a, I2C>,
    pub frames: &'a FrameSlot,
    pub viewers: &'a dyn Authenticator,
}

/// Extracted `/move` request: the optional query parameter and the optional
/// basic-auth header, both resolved in the handler so every outcome maps to
/// the documented status codes.
pub struct MoveRequest {
    pub direction: Option<String>,
    pub authorization: Option<String>,
}

#[derive(Deserialize)]
struct MoveQuery {
    direction: String,
}

impl<'r, S> FromRequest<'r, S> for MoveRequest {
    type Rejection = &'static str;

    async fn from_request<R: Read>(
        _state: &'r S,
        parts: RequestParts<'r>,
        _body: RequestBody<'r, R>,
    ) -> Result<Self, Self::Rejection> {
        let direction = parts
            .query()
            .and_then(|query| deserialize_form::<MoveQuery>(query).ok())
            .map(|query| query.direction);
        let authorization = parts
            .headers()
            .get("authorization")
            .and_then(|value| value.as_str().ok().map(String::from));

        Ok(MoveRequest {
            direction,
            authorization,
        })
    }
}

async fn move_response<I2C, E>(
    gateway: &StreamGateway<'_, I2C>,
    request: MoveRequest,
) -> (StatusCode, &'static str, (&'static str, &'static str))
where
    I2C: I2c<Error = E> + 'static,
    E: core::fmt::Debug,
{
    if let Some(authenticator) = gateway.commands.credential_gate() {
        let granted = request
            .authorization
            .as_deref()
            .map(|header| verify_basic(authenticator, header))
            .unwrap_or(false);
        if !granted {
            // challenge before any actuation occurs
            return (
                StatusCode::UNAUTHORIZED,
                "Unauthorized",
                ("WWW-Authenticate", "Basic realm=\"mecanum-wheel-bot\""),
            );
        }
    }

    match gateway
        .commands
        .handle_move(request.direction.as_deref())
        .await
    {
        Ok(direction) => {
            tracing::info!(direction = direction.as_str(), "move command applied");
            (StatusCode::OK, direction.moving_response(), TEXT_PLAIN)
        }
        Err(CommandError::MissingDirection) => {
            (StatusCode::BAD_REQUEST, MISSING_DIRECTION, TEXT_PLAIN)
        }
        Err(CommandError::UnknownDirection) => {
            (StatusCode::BAD_REQUEST, UNKNOWN_DIRECTION, TEXT_PLAIN)
        }
        Err(error) => {
            tracing::error!(?error, "move command failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Wheel actuator write failed",
                TEXT_PLAIN,
            )
        }
    }
}

/// MJPEG chunk generator over the latest-frame buffer.
///
/// Emits one boundary-framed JPEG per acquired frame and yields to the
/// transport at every chunk write; it never captures directly and never
/// blocks the shared context while holding the slot.
struct MjpegStream<'a> {
    frames: FrameSource<'a>,
}

impl Chunks for MjpegStream<'_> {
    fn content_type(&self) -> &'static str {
        MJPEG_CONTENT_TYPE
    }

    async fn write_chunks<W: embedded_aio::Write>(
        mut self,
        mut chunk_writer: ChunkWriter<W>,
    ) -> Result<ChunksWritten, W::Error> {
        loop {
            match stream_step(self.frames.acquire().await) {
                StreamStep::Emit(frame) => {
                    chunk_writer.write_chunk(MJPEG_PART_HEADER).await?;
                    chunk_writer.write_chunk(&frame.data).await?;
                    chunk_writer.write_chunk(MJPEG_PART_TRAILER).await?;
                }
                StreamStep::Terminate => {
                    tracing::warn!("capture failed, ending mjpeg stream");
                    break;
                }
                StreamStep::Idle => Timer::after(STREAM_POLL).await,
            }
        }

        chunk_writer.finalize().await
    }
}

/// Per-connection WebSocket control channel.
///
/// State machine per client: `Unauthenticated` on connect, `Authenticated`
/// after a valid `AUTH:` message, removed on disconnect. Binary frames are
/// pushed only while authenticated, one per broadcast cycle, best-effort.
pub struct ControlSocket<'a, I2C: 'static> {
    gateway: &'a StreamGateway<'a, I2C>,
    session_id: u32,
}

impl<'a, I2C, E> ControlSocket<'a, I2C>
where
    I2C: I2c<Error = E> + 'static,
    E: core::fmt::Debug,
{
    async fn session_loop<Reader, Writer>(
        &self,
        rx: &mut SocketRx<Reader>,
        tx: &mut SocketTx<Writer>,
        buffer: &mut [u8],
        frames: &mut FrameSource<'_>,
    ) -> Result<Option<(u16, &'static str)>, Writer::Error>
    where
        Reader: embedded_aio::Read,
        Writer: embedded_aio::Write<Error = Reader::Error>,
    {
        loop {
            match select(rx.next_message(buffer), Timer::after(FRAME_INTERVAL)).await {
                Either::Second(()) => {
                    let authenticated = SessionManager::is_authenticated(self.session_id).await;
                    if let Some(frame) = push_frame(authenticated, frames.acquire().await) {
                        tx.send_binary(&frame.data).await?;
                        SessionManager::record_delivery(self.session_id, frame.seq).await;
                    }
                }
                Either::First(message) => match message {
                    Ok(Message::Pong(_)) => continue,
                    Ok(Message::Ping(data)) => tx.send_pong(data).await?,
                    Ok(Message::Close(reason)) => {
                        tracing::info!(?reason, "websocket closed");
                        return Ok(None);
                    }
                    Ok(Message::Text(data)) => self.handle_text(tx, data).await?,
                    Ok(Message::Binary(_)) => tx.send_text("Invalid command format").await?,
                    Err(error) => {
                        tracing::error!(?error, "websocket error");
                        let code = match error {
                            ReadMessageError::TextIsNotUtf8 => 1007,
                            ReadMessageError::ReservedOpcode(_) => 1003,
                            ReadMessageError::ReadFrameError(_)
                            | ReadMessageError::UnexpectedMessageStart
                            | ReadMessageError::MessageStartsWithContinuation => 1002,
                            ReadMessageError::Io(err) => return Err(err),
                        };
                        return Ok(Some((code, "Websocket Error")));
                    }
                },
            }
        }
    }

    async fn handle_text<Writer>(
        &self,
        tx: &mut SocketTx<Writer>,
        data: &str,
    ) -> Result<(), Writer::Error>
    where
        Writer: embedded_aio::Write,
    {
        if let Some((username, password)) = parse_auth_message(data) {
            let granted = self.gateway.viewers.verify(username, password);
            let state = SessionManager::authenticate(self.session_id, granted).await;
            tracing::info!(session_id = self.session_id, ?state, "auth attempt");
            return tx.send_text(if granted { AUTH_OK } else { AUTH_FAILED }).await;
        }

        if !SessionManager::is_authenticated(self.session_id).await {
            return tx.send_text(AUTH_FAILED).await;
        }

        match serde_json::from_str::<DriveCommand>(data) {
            Ok(command) => match self.gateway.commands.dispatch(command).await {
                Ok(_) => tx.send_text("DRIVE_OK").await,
                Err(error) => {
                    tracing::warn!(?error, "drive command rejected");
                    tx.send_text("DRIVE_REJECTED").await
                }
            },
            Err(error) => {
                tracing::error!(?error, "error deserializing DriveCommand");
                tx.send_text("Invalid command format").await
            }
        }
    }
}

impl<'a, I2C, E> WebSocketCallback for ControlSocket<'a, I2C>
where
    I2C: I2c<Error = E> + 'static,
    E: core::fmt::Debug,
{
    async fn run<Reader, Writer>(
        self,
        mut rx: SocketRx<Reader>,
        mut tx: SocketTx<Writer>,
    ) -> Result<(), Writer::Error>
    where
        Reader: embedded_aio::Read,
        Writer: embedded_aio::Write<Error = Reader::Error>,
    {
        let mut buffer = [0; 1024];
        let mut frames = FrameSource::new(self.gateway.frames);

        tx.send_text("Connected").await?;

        let result = self
            .session_loop(&mut rx, &mut tx, &mut buffer, &mut frames)
            .await;

        if let Some(client) = SessionManager::disconnect(self.session_id).await {
            tracing::info!(session_id = client.id, last_seq = client.last_seq, "session closed");
        }

        match result {
            Ok(close_reason) => tx.close(close_reason).await,
            Err(error) => Err(error),
        }
    }
}

/// Creates the gateway server and serves it forever.
pub async fn run<I2C, E>(
    id: usize,
    port: u16,
    stack: Stack<'static>,
    gateway: &'static StreamGateway<'static, I2C>,
    config: Option<&'static picoserve::Config<Duration>>,
) -> !
where
    I2C: I2c<Error = E> + 'static,
    E: core::fmt::Debug,
{
    let default_config = picoserve::Config::new(picoserve::Timeouts {
        start_read_request: Some(Duration::from_secs(5)),
        persistent_start_read_request: None,
        read_request: Some(Duration::from_secs(1)),
        write: Some(Duration::from_secs(5)),
    });

    let config = config.unwrap_or(&default_config);

    let router = Router::new()
        // Control page at "/"
        .route(
            "/",
            get(|| async {
                Response::new(StatusCode::OK, frontend::HTML)
                    .with_headers([("Content-Type", "text/html; charset=utf-8")])
            }),
        )
        // Directional commands on "/move"
        .route(
            "/move",
            get(move |request: MoveRequest| async move {
                let (status, body, header) = move_response(gateway, request).await;
                Response::new(status, body).with_headers([header])
            }),
        )
        // MJPEG pull stream
        .route(
            "/stream",
            get(move || async move {
                ChunkedResponse::new(MjpegStream {
                    frames: FrameSource::new(gateway.frames),
                })
            }),
        )
        .route(
            "/stream.mjpeg",
            get(move || async move {
                ChunkedResponse::new(MjpegStream {
                    frames: FrameSource::new(gateway.frames),
                })
            }),
        )
        // WebSocket control channel on "/ws"
        .route(
            "/ws",
            get(move |upgrade: WebSocketUpgrade| async move {
                let session_id = SessionManager::connect().await;
                tracing::info!(session_id, "new websocket connection");
                upgrade
                    .on_upgrade(ControlSocket {
                        gateway,
                        session_id,
                    })
                    .with_protocol("messages")
            }),
        );

    // Print out the IP and port before starting the server.
    if let Some(ip_cfg) = stack.config_v4() {
        tracing::info!("Starting gateway at {}:{}", ip_cfg.address, port);
    } else {
        tracing::warn!("Starting gateway on port {port}, but no IPv4 address is assigned yet!");
    }

    let (mut rx_buffer, mut tx_buffer, mut http_buffer) = ([0; 1024], [0; 8192], [0; 2048]);

    picoserve::listen_and_serve_with_state(
        id,
        &router,
        config,
        stack,
        port,
        &mut rx_buffer,
        &mut tx_buffer,
        &mut http_buffer,
        &(),
    )
    .await
}
