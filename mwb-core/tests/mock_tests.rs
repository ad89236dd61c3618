use core::cell::RefCell;

use embassy_futures::block_on;
use embassy_sync::{blocking_mutex::raw::CriticalSectionRawMutex, mutex::Mutex};
use embedded_hal_mock::eh1::i2c::{Mock as I2cMock, Transaction as I2cTrans};
use mwb_core::utils::camera::{FrameEvent, FrameSlot, FrameSource};
use mwb_core::utils::connection::server::{
    push_frame, stream_step, StreamStep, MJPEG_CONTENT_TYPE, MJPEG_PART_HEADER,
    MJPEG_PART_TRAILER,
};
use mwb_core::utils::connection::session::{
    parse_auth_message, verify_basic, AuthState, Authenticator, SessionManager, StaticCredentials,
};
use mwb_core::utils::controllers::motion::{MotionController, WHEEL_LAYOUT};
use mwb_core::utils::controllers::{CommandError, CommandRouter, Direction, DriveCommand};
use mwb_core::utils::math::kinematics::WheelDrive;

/// Default I2C address for the PWM motor controller.
pub const PWM_ADDRESS: u8 = 0x55;

/// Create a write transaction for the given I2C address and data payload.
pub fn write(
    addr: u8,
    data: Vec<u8>,
) -> I2cTrans {
    I2cTrans::write(addr, data)
}

/// Transactions issued while bringing up the PWM expander (enable + 60Hz
/// prescale).
fn init_transactions() -> Vec<I2cTrans> {
    vec![
        write(PWM_ADDRESS, vec![0x00, 0x01]),
        write(PWM_ADDRESS, vec![0x00, 0x11]),
        write(PWM_ADDRESS, vec![0xFE, 100]),
        write(PWM_ADDRESS, vec![0x00, 0x01]),
    ]
}

/// One-time auto-increment enable issued before the first channel write.
fn auto_increment() -> I2cTrans {
    write(PWM_ADDRESS, vec![0x00, 0x21])
}

/// The three channel writes for one wheel: direction pair plus duty,
/// with the 8-bit duty widened to 12-bit counts.
fn wheel_writes(
    dir_a_reg: u8,
    duty: i16,
) -> Vec<I2cTrans> {
    let forward = duty >= 0;
    let counts = (duty.unsigned_abs() * 16).to_le_bytes();
    let (a, b) = if forward {
        ([0xFF, 0x0F], [0x00, 0x00])
    } else {
        ([0x00, 0x00], [0xFF, 0x0F])
    };
    vec![
        write(PWM_ADDRESS, vec![dir_a_reg, 0x00, 0x00, a[0], a[1]]),
        write(PWM_ADDRESS, vec![dir_a_reg + 4, 0x00, 0x00, b[0], b[1]]),
        write(
            PWM_ADDRESS,
            vec![dir_a_reg + 8, 0x00, 0x00, counts[0], counts[1]],
        ),
    ]
}

/// Channel writes for all four wheels in layout order.
fn drive_writes(duties: [i16; 4]) -> Vec<I2cTrans> {
    // dir_a registers of the default layout: C0, C3, C6, C9
    let regs = [0x06, 0x12, 0x1E, 0x2A];
    regs.iter()
        .zip(duties)
        .flat_map(|(&reg, duty)| wheel_writes(reg, duty))
        .collect()
}

#[test]
fn test_init_controller() {
    let mock = I2cMock::new(&init_transactions());
    let i2c_bus = RefCell::new(mock);
    let motion = MotionController::new(&i2c_bus, WHEEL_LAYOUT).unwrap();
    assert_eq!(motion.wheel_drive(), WheelDrive::STOP);
    i2c_bus.borrow_mut().done();
}

#[test]
fn test_apply_forward_writes_all_wheels() {
    let mut expectations = init_transactions();
    expectations.push(auto_increment());
    expectations.extend(drive_writes([200, 200, 200, 200]));

    let mock = I2cMock::new(&expectations);
    let i2c_bus = RefCell::new(mock);
    let mut motion = MotionController::new(&i2c_bus, WHEEL_LAYOUT).unwrap();

    let drive = motion
        .apply(DriveCommand::M {
            d: Direction::Forward,
        })
        .unwrap();
    assert_eq!(
        drive,
        WheelDrive {
            front_left: 200,
            front_right: 200,
            rear_left: 200,
            rear_right: 200,
        }
    );
    assert_eq!(motion.wheel_drive(), drive);
    i2c_bus.borrow_mut().done();
}

#[test]
fn test_apply_left_mirrors_diagonals() {
    let mut expectations = init_transactions();
    expectations.push(auto_increment());
    // left strafe: front-left and rear-right forward, the other diagonal
    // reversed
    expectations.extend(drive_writes([200, -200, -200, 200]));

    let mock = I2cMock::new(&expectations);
    let i2c_bus = RefCell::new(mock);
    let mut motion = MotionController::new(&i2c_bus, WHEEL_LAYOUT).unwrap();

    let drive = motion
        .apply(DriveCommand::M { d: Direction::Left })
        .unwrap();
    assert_eq!(
        drive,
        WheelDrive {
            front_left: 200,
            front_right: -200,
            rear_left: -200,
            rear_right: 200,
        }
    );
    i2c_bus.borrow_mut().done();
}

#[test]
fn test_repeated_stop_is_idempotent() {
    let mut expectations = init_transactions();
    expectations.push(auto_increment());
    expectations.extend(drive_writes([200, 200, 200, 200]));
    expectations.extend(drive_writes([0, 0, 0, 0]));
    expectations.extend(drive_writes([0, 0, 0, 0]));

    let mock = I2cMock::new(&expectations);
    let i2c_bus = RefCell::new(mock);
    let mut motion = MotionController::new(&i2c_bus, WHEEL_LAYOUT).unwrap();

    motion
        .apply(DriveCommand::M {
            d: Direction::Forward,
        })
        .unwrap();
    for _ in 0..2 {
        let drive = motion
            .apply(DriveCommand::M { d: Direction::Stop })
            .unwrap();
        assert_eq!(drive, WheelDrive::STOP);
    }
    assert_eq!(motion.wheel_drive(), WheelDrive::STOP);
    i2c_bus.borrow_mut().done();
}

#[test]
fn test_missing_direction_never_touches_actuator() {
    let mock = I2cMock::new(&init_transactions());
    let i2c_bus = RefCell::new(mock);
    let motion = Mutex::<CriticalSectionRawMutex, _>::new(
        MotionController::new(&i2c_bus, WHEEL_LAYOUT).unwrap(),
    );
    let router = CommandRouter::new(&motion, None);

    let before = block_on(motion.lock()).wheel_drive();
    let result = block_on(router.handle_move(None));
    assert_eq!(result, Err(CommandError::MissingDirection));
    assert_eq!(block_on(motion.lock()).wheel_drive(), before);
    i2c_bus.borrow_mut().done();
}

#[test]
fn test_unknown_direction_is_rejected() {
    let mock = I2cMock::new(&init_transactions());
    let i2c_bus = RefCell::new(mock);
    let motion = Mutex::<CriticalSectionRawMutex, _>::new(
        MotionController::new(&i2c_bus, WHEEL_LAYOUT).unwrap(),
    );
    let router = CommandRouter::new(&motion, None);

    let result = block_on(router.handle_move(Some("diagonal")));
    assert_eq!(result, Err(CommandError::UnknownDirection));
    assert_eq!(block_on(motion.lock()).wheel_drive(), WheelDrive::STOP);
    i2c_bus.borrow_mut().done();
}

#[test]
fn test_vector_component_out_of_range_is_rejected() {
    let mock = I2cMock::new(&init_transactions());
    let i2c_bus = RefCell::new(mock);
    let motion = Mutex::<CriticalSectionRawMutex, _>::new(
        MotionController::new(&i2c_bus, WHEEL_LAYOUT).unwrap(),
    );
    let router = CommandRouter::new(&motion, None);

    let result = block_on(router.dispatch(DriveCommand::V {
        x: 1.5,
        y: 0.0,
        w: 0.0,
    }));
    assert_eq!(result, Err(CommandError::ComponentOutOfRange));
    i2c_bus.borrow_mut().done();
}

#[test]
fn test_router_confirms_after_wheel_write() {
    let mut expectations = init_transactions();
    expectations.push(auto_increment());
    expectations.extend(drive_writes([200, 200, 200, 200]));

    let mock = I2cMock::new(&expectations);
    let i2c_bus = RefCell::new(mock);
    let motion = Mutex::<CriticalSectionRawMutex, _>::new(
        MotionController::new(&i2c_bus, WHEEL_LAYOUT).unwrap(),
    );
    let router = CommandRouter::new(&motion, None);

    let direction = block_on(router.handle_move(Some("forward"))).unwrap();
    assert_eq!(direction, Direction::Forward);
    assert_eq!(direction.moving_response(), "Moving: forward");
    // the confirmation implies the wheel set is already applied
    assert_eq!(
        block_on(motion.lock()).wheel_drive().duties(),
        [200, 200, 200, 200]
    );
    i2c_bus.borrow_mut().done();
}

#[test]
fn test_session_auth_state_machine() {
    block_on(async {
        let credentials = StaticCredentials {
            username: "admin",
            password: "correctpass",
        };

        let id = SessionManager::connect().await;
        assert_eq!(
            SessionManager::client(id).await.unwrap().auth,
            AuthState::Unauthenticated
        );
        assert!(!SessionManager::is_authenticated(id).await);

        // bad credentials keep the session retryable
        let granted = credentials.verify("admin", "wrongpass");
        assert!(!granted);
        assert_eq!(
            SessionManager::authenticate(id, granted).await,
            AuthState::Unauthenticated
        );

        let granted = credentials.verify("admin", "correctpass");
        assert!(granted);
        assert_eq!(
            SessionManager::authenticate(id, granted).await,
            AuthState::Authenticated
        );
        assert!(SessionManager::is_authenticated(id).await);

        SessionManager::record_delivery(id, 7).await;
        assert_eq!(SessionManager::client(id).await.unwrap().last_seq, 7);

        let closed = SessionManager::disconnect(id).await.unwrap();
        assert_eq!(closed.auth, AuthState::Closed);
        assert!(SessionManager::client(id).await.is_none());
    });
}

#[test]
fn test_failed_reauth_demotes_session() {
    block_on(async {
        let id = SessionManager::connect().await;
        SessionManager::authenticate(id, true).await;
        assert!(SessionManager::is_authenticated(id).await);

        SessionManager::authenticate(id, false).await;
        assert!(!SessionManager::is_authenticated(id).await);

        SessionManager::disconnect(id).await;
    });
}

#[test]
fn test_auth_message_parsing() {
    assert_eq!(
        parse_auth_message("AUTH:admin:secret"),
        Some(("admin", "secret"))
    );
    // password keeps everything after the second separator
    assert_eq!(
        parse_auth_message("AUTH:admin:se:cret"),
        Some(("admin", "se:cret"))
    );
    assert_eq!(parse_auth_message("AUTH:admin"), None);
    assert_eq!(parse_auth_message("LOGIN:admin:secret"), None);
}

#[test]
fn test_basic_auth_header() {
    let credentials = StaticCredentials {
        username: "admin",
        password: "secret",
    };
    // "admin:secret"
    assert!(verify_basic(&credentials, "Basic YWRtaW46c2VjcmV0"));
    // "admin:wrong"
    assert!(!verify_basic(&credentials, "Basic YWRtaW46d3Jvbmc="));
    assert!(!verify_basic(&credentials, "Bearer YWRtaW46c2VjcmV0"));
    assert!(!verify_basic(&credentials, "Basic not-base64!!"));
}

#[test]
fn test_frame_slot_latest_wins() {
    block_on(async {
        let slot = FrameSlot::new();
        let mut source = FrameSource::new(&slot);

        assert!(source.acquire().await.is_none());

        slot.publish(vec![1, 2, 3]).await;
        match source.acquire().await {
            Some(FrameEvent::Captured(frame)) => {
                assert_eq!(frame.seq, 1);
                assert_eq!(&frame.data[..], &[1, 2, 3]);
            }
            other => panic!("expected frame, got {other:?}"),
        }

        // nothing new published since
        assert!(source.acquire().await.is_none());

        // two publications while the consumer was away: only the latest
        // survives, the intermediate frame is dropped silently
        slot.publish(vec![4]).await;
        slot.publish(vec![5]).await;
        match source.acquire().await {
            Some(FrameEvent::Captured(frame)) => {
                assert_eq!(frame.seq, 3);
                assert_eq!(&frame.data[..], &[5]);
            }
            other => panic!("expected frame, got {other:?}"),
        }

        slot.publish_failure().await;
        assert!(matches!(
            source.acquire().await,
            Some(FrameEvent::CaptureFailed)
        ));
    });
}

#[test]
fn test_mjpeg_part_framing() {
    block_on(async {
        assert_eq!(MJPEG_CONTENT_TYPE, "multipart/x-mixed-replace; boundary=frame");
        assert!(MJPEG_PART_HEADER.starts_with(b"--frame\r\n"));
        assert!(MJPEG_PART_HEADER.ends_with(b"Content-Type: image/jpeg\r\n\r\n"));
        assert_eq!(MJPEG_PART_TRAILER, &b"\r\n"[..]);

        let slot = FrameSlot::new();
        let mut source = FrameSource::new(&slot);
        slot.publish(vec![0xFF, 0xD8, 0xFF, 0xD9]).await;
        match stream_step(source.acquire().await) {
            StreamStep::Emit(frame) => assert_eq!(&frame.data[..], &[0xFF, 0xD8, 0xFF, 0xD9]),
            other => panic!("expected a part, got {other:?}"),
        }
        // empty slot keeps the stream polling, not terminating
        assert!(matches!(
            stream_step(source.acquire().await),
            StreamStep::Idle
        ));
    });
}

#[test]
fn test_mjpeg_stream_terminates_on_capture_failure() {
    block_on(async {
        let slot = FrameSlot::new();
        let mut source = FrameSource::new(&slot);
        slot.publish(vec![1]).await;
        assert!(matches!(
            stream_step(source.acquire().await),
            StreamStep::Emit(_)
        ));
        slot.publish_failure().await;
        assert!(matches!(
            stream_step(source.acquire().await),
            StreamStep::Terminate
        ));
    });
}

#[test]
fn test_no_frames_pushed_to_unauthenticated_sessions() {
    block_on(async {
        let slot = FrameSlot::new();
        let mut source = FrameSource::new(&slot);

        slot.publish(vec![7]).await;
        assert!(push_frame(false, source.acquire().await).is_none());

        slot.publish(vec![8]).await;
        let frame = push_frame(true, source.acquire().await).unwrap();
        assert_eq!(&frame.data[..], &[8]);

        // failed cycles and empty slots are skipped, never delivered
        slot.publish_failure().await;
        assert!(push_frame(true, source.acquire().await).is_none());
        assert!(push_frame(true, source.acquire().await).is_none());
    });
}

#[test]
fn test_independent_consumers_track_their_own_sequence() {
    block_on(async {
        let slot = FrameSlot::new();
        let mut first = FrameSource::new(&slot);
        let mut second = FrameSource::new(&slot);

        slot.publish(vec![9]).await;
        assert!(matches!(
            first.acquire().await,
            Some(FrameEvent::Captured(_))
        ));
        // the second consumer still sees the publication
        assert!(matches!(
            second.acquire().await,
            Some(FrameEvent::Captured(_))
        ));
        assert!(first.acquire().await.is_none());
        assert!(second.acquire().await.is_none());
    });
}
