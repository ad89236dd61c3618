//! Host-side simulation of the Mecanum-Wheel Bot firmware.
//!
//! Runs the full gateway over a TAP device: the I2C bus is replaced by a
//! tracing stub and the camera by a synthetic JPEG generator, everything else
//! is the same code that runs on the target.

use core::cell::RefCell;

use clap::Parser;
use embassy_executor::{Executor, Spawner};
use embassy_net::{Config, Ipv4Address, Ipv4Cidr, Runner, StackResources};
use embassy_net_tuntap::TunTapDevice;
use embassy_sync::{blocking_mutex::raw::CriticalSectionRawMutex, mutex::Mutex};
use embassy_time::Duration;
use embedded_hal::i2c::{ErrorKind, ErrorType, I2c, Operation};
use mwb_core::mk_static;
use mwb_core::utils::camera::{capture_task, CaptureDevice, FrameSlot};
use mwb_core::utils::connection::server::{self, StreamGateway};
use mwb_core::utils::connection::session::{Authenticator, StaticCredentials};
use mwb_core::utils::controllers::motion::WHEEL_LAYOUT;
use mwb_core::utils::controllers::{CommandRouter, MotionController};
use rand_core::{OsRng, TryRngCore};
use tracing::{error, info, trace};

#[derive(Parser)]
#[clap(version = "1.0")]
struct Opts {
    /// TAP device name
    #[clap(long, default_value = "tap0")]
    tap: String,
    /// use a static IP instead of DHCP
    #[clap(long)]
    static_ip: bool,
    /// TCP port of the gateway
    #[clap(long, default_value_t = 8000)]
    port: u16,
    /// stream viewer username
    #[clap(long, default_value = "admin")]
    username: String,
    /// stream viewer password
    #[clap(long, default_value = "password")]
    password: String,
    /// capture interval in milliseconds
    #[clap(long, default_value_t = 100)]
    frame_interval_ms: u64,
    /// also require basic auth on the /move route
    #[clap(long)]
    require_http_auth: bool,
    /// simulate a camera that fails to initialize
    #[clap(long)]
    broken_camera: bool,
}

/// I2C stub standing in for the motor controller bus: logs every write and
/// answers reads with zeroes.
struct TraceI2c;

#[derive(Debug)]
struct BusFault;

impl embedded_hal::i2c::Error for BusFault {
    fn kind(&self) -> ErrorKind {
        ErrorKind::Other
    }
}

impl ErrorType for TraceI2c {
    type Error = BusFault;
}

impl I2c for TraceI2c {
    fn transaction(
        &mut self,
        address: u8,
        operations: &mut [Operation<'_>],
    ) -> Result<(), Self::Error> {
        for operation in operations.iter_mut() {
            match operation {
                Operation::Write(bytes) => {
                    trace!("i2c write to {address:#04x}: {bytes:02x?}");
                }
                Operation::Read(buffer) => buffer.fill(0),
            }
        }
        Ok(())
    }
}

/// Camera stand-in producing a tiny JPEG-framed payload per cycle.
struct SyntheticCamera {
    broken: bool,
    frame_count: u32,
}

impl CaptureDevice for SyntheticCamera {
    type Error = &'static str;

    async fn init(&mut self) -> Result<(), Self::Error> {
        if self.broken {
            Err("sensor probe failed")
        } else {
            Ok(())
        }
    }

    async fn capture(&mut self) -> Result<Vec<u8>, Self::Error> {
        self.frame_count = self.frame_count.wrapping_add(1);
        let mut data = vec![0xFF, 0xD8, 0xFF, 0xE0];
        data.extend_from_slice(&self.frame_count.to_be_bytes());
        data.extend_from_slice(&[0xFF, 0xD9]);
        Ok(data)
    }
}

static FRAME_SLOT: FrameSlot = FrameSlot::new();

#[embassy_executor::task]
async fn net_task(mut runner: Runner<'static, TunTapDevice>) -> ! {
    runner.run().await
}

#[embassy_executor::task]
async fn camera_task(
    device: SyntheticCamera,
    interval: Duration,
) -> ! {
    capture_task(device, &FRAME_SLOT, interval).await
}

#[embassy_executor::task]
async fn main_task(spawner: Spawner) {
    let opts: Opts = Opts::parse();

    // Camera bring-up happens before anything is served: a robot that cannot
    // see must not pretend to stream.
    let mut camera = SyntheticCamera {
        broken: opts.broken_camera,
        frame_count: 0,
    };
    if let Err(fault) = camera.init().await {
        error!("camera init failed, refusing to serve: {fault}");
        return;
    }
    spawner
        .spawn(camera_task(
            camera,
            Duration::from_millis(opts.frame_interval_ms),
        ))
        .unwrap();

    // Motor controller on the stubbed bus
    let i2c_bus = mk_static!(RefCell<TraceI2c>, RefCell::new(TraceI2c));
    let motion = mk_static!(
        Mutex<CriticalSectionRawMutex, MotionController<'static, TraceI2c>>,
        Mutex::new(MotionController::new(i2c_bus, WHEEL_LAYOUT).unwrap())
    );

    let viewers: &'static StaticCredentials = mk_static!(
        StaticCredentials,
        StaticCredentials {
            username: opts.username.leak(),
            password: opts.password.leak(),
        }
    );
    let http_gate: Option<&'static dyn Authenticator> = if opts.require_http_auth {
        Some(viewers)
    } else {
        None
    };

    let gateway = mk_static!(
        StreamGateway<'static, TraceI2c>,
        StreamGateway {
            commands: CommandRouter::new(motion, http_gate),
            frames: &FRAME_SLOT,
            viewers,
        }
    );

    // Network over the TAP device
    let device = TunTapDevice::new(&opts.tap).unwrap();
    let config = if opts.static_ip {
        Config::ipv4_static(embassy_net::StaticConfigV4 {
            address: Ipv4Cidr::new(Ipv4Address::new(192, 168, 69, 2), 24),
            dns_servers: heapless::Vec::new(),
            gateway: Some(Ipv4Address::new(192, 168, 69, 1)),
        })
    } else {
        Config::dhcpv4(Default::default())
    };
    let mut seed_buf = [0; 8];
    OsRng.try_fill_bytes(&mut seed_buf).unwrap();
    let seed = u64::from_le_bytes(seed_buf);

    let resources = mk_static!(StackResources<8>, StackResources::new());
    let (stack, runner) = embassy_net::new(device, config, resources, seed);
    spawner.spawn(net_task(runner)).unwrap();

    info!("Waiting for network link...");
    stack.wait_config_up().await;

    info!("Starting stream gateway on port {}", opts.port);
    server::run(0, opts.port, stack, gateway, None).await;
}

static EXECUTOR: static_cell::StaticCell<Executor> = static_cell::StaticCell::new();

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();
    let executor = EXECUTOR.init(Executor::new());
    executor.run(|spawner| {
        spawner.spawn(main_task(spawner)).unwrap();
    });
}
