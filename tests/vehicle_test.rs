// Vehicle connection against a minimal fake autopilot on the loopback interface

use std::net::SocketAddr;
use std::time::Duration;

use flume::{Receiver, Sender};
use mavlink::common::*;
use mavlink::MavHeader;
use pnr::link::{decode_datagram, encode_v2, MavLink};
use pnr::subsystems::commander::FlightMode;
use pnr::{Error, Vehicle, VehicleControl};
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;

const AUTOPILOT: MavHeader = MavHeader {
    system_id: 1,
    component_id: 1,
    sequence: 0,
};

fn telemetry() -> Vec<MavMessage> {
    vec![
        MavMessage::HEARTBEAT(HEARTBEAT_DATA {
            custom_mode: 4,
            mavtype: MavType::MAV_TYPE_QUADROTOR,
            autopilot: MavAutopilot::MAV_AUTOPILOT_ARDUPILOTMEGA,
            base_mode: MavModeFlag::MAV_MODE_FLAG_CUSTOM_MODE_ENABLED,
            system_status: MavState::MAV_STATE_STANDBY,
            mavlink_version: 3,
        }),
        MavMessage::GPS_RAW_INT(GPS_RAW_INT_DATA {
            time_usec: 0,
            lat: -353_632_610,
            lon: 1_491_652_300,
            alt: 584_000,
            eph: 121,
            epv: 200,
            vel: 0,
            cog: 0,
            fix_type: GpsFixType::GPS_FIX_TYPE_3D_FIX,
            satellites_visible: 10,
            alt_ellipsoid: 0,
            h_acc: 0,
            v_acc: 0,
            vel_acc: 0,
            hdg_acc: 0,
            yaw: 0,
        }),
        MavMessage::SYS_STATUS(SYS_STATUS_DATA {
            onboard_control_sensors_present: MavSysStatusSensor::empty(),
            onboard_control_sensors_enabled: MavSysStatusSensor::empty(),
            onboard_control_sensors_health: MavSysStatusSensor::empty(),
            load: 0,
            voltage_battery: 12_600,
            current_battery: -1,
            battery_remaining: 87,
            drop_rate_comm: 0,
            errors_comm: 0,
            errors_count1: 0,
            errors_count2: 0,
            errors_count3: 0,
            errors_count4: 0,
            onboard_control_sensors_present_extended: MavSysStatusSensorExtended::empty(),
            onboard_control_sensors_enabled_extended: MavSysStatusSensorExtended::empty(),
            onboard_control_sensors_health_extended: MavSysStatusSensorExtended::empty(),
        }),
        MavMessage::GLOBAL_POSITION_INT(GLOBAL_POSITION_INT_DATA {
            time_boot_ms: 0,
            lat: -353_632_610,
            lon: 1_491_652_300,
            alt: 584_000,
            relative_alt: 0,
            vx: 0,
            vy: 0,
            vz: 0,
            hdg: 0,
        }),
    ]
}

/// Streams telemetry to the ground station and acknowledges every command it receives
fn fake_autopilot(socket: UdpSocket, gcs: SocketAddr, received: Sender<MavMessage>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut stream = tokio::time::interval(Duration::from_millis(100));
        let mut buf = [0u8; 2048];
        loop {
            tokio::select! {
                _ = stream.tick() => {
                    for msg in telemetry() {
                        let frame = encode_v2(AUTOPILOT, &msg).unwrap();
                        socket.send_to(&frame, gcs).await.unwrap();
                    }
                }
                recv = socket.recv_from(&mut buf) => {
                    let (len, from) = recv.unwrap();
                    for (_, msg) in decode_datagram(&buf[..len]) {
                        if let MavMessage::COMMAND_LONG(cmd) = &msg {
                            let ack = MavMessage::COMMAND_ACK(COMMAND_ACK_DATA {
                                command: cmd.command,
                                result: MavResult::MAV_RESULT_ACCEPTED,
                                progress: 0,
                                result_param2: 0,
                                target_system: 255,
                                target_component: 0,
                            });
                            socket.send_to(&encode_v2(AUTOPILOT, &ack).unwrap(), from).await.unwrap();
                        }
                        let _ = received.send(msg);
                    }
                }
            }
        }
    })
}

async fn connect() -> pnr::Result<(Vehicle, Receiver<MavMessage>, JoinHandle<()>)> {
    let link = MavLink::open("udpin:127.0.0.1:0").await?;
    let autopilot_socket = UdpSocket::bind("127.0.0.1:0").await?;
    let (tx, rx) = flume::unbounded();
    let autopilot = fake_autopilot(autopilot_socket, link.local_addr()?, tx);

    let vehicle = Vehicle::connect_from_link(link, Duration::from_secs(5)).await?;
    Ok((vehicle, rx, autopilot))
}

async fn next_command(received: &Receiver<MavMessage>, command: MavCmd) -> COMMAND_LONG_DATA {
    let wait = async {
        loop {
            if let MavMessage::COMMAND_LONG(cmd) = received.recv_async().await.unwrap() {
                if cmd.command == command {
                    return cmd;
                }
            }
        }
    };
    tokio::time::timeout(Duration::from_secs(5), wait)
        .await
        .expect("command not received")
}

#[tokio::test]
async fn connects_and_decodes_telemetry() -> pnr::Result<()> {
    let (vehicle, received, autopilot) = connect().await?;

    // Data streams are requested once the vehicle is known
    let wait_stream_request = async {
        loop {
            if let MavMessage::REQUEST_DATA_STREAM(req) = received.recv_async().await.unwrap() {
                return req;
            }
        }
    };
    let request = tokio::time::timeout(Duration::from_secs(5), wait_stream_request)
        .await
        .expect("no stream request");
    assert_eq!(request.req_message_rate, 4);
    assert_eq!((request.target_system, request.target_component), (1, 1));

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(vehicle.battery_level()?, 87.0);
    assert!(vehicle.is_armable());
    assert!(!vehicle.is_armed());
    assert_eq!(vehicle.telemetry.mode(), Some(FlightMode::Guided));
    let location = vehicle.location()?;
    assert!((location.lat + 35.363261).abs() < 1e-6);
    assert_eq!(location.alt, 0.0);

    vehicle.close().await;
    autopilot.abort();
    Ok(())
}

#[tokio::test]
async fn commands_reach_the_autopilot() -> pnr::Result<()> {
    let (vehicle, received, autopilot) = connect().await?;

    vehicle.set_mode(FlightMode::Rtl).await?;
    let cmd = next_command(&received, MavCmd::MAV_CMD_DO_SET_MODE).await;
    assert_eq!(cmd.param2, 6.0);

    vehicle.simple_takeoff(10.0).await?;
    let cmd = next_command(&received, MavCmd::MAV_CMD_NAV_TAKEOFF).await;
    assert_eq!(cmd.param7, 10.0);

    vehicle.close().await;
    autopilot.abort();
    Ok(())
}

#[tokio::test]
async fn closed_vehicle_is_disconnected() -> pnr::Result<()> {
    let (vehicle, _received, autopilot) = connect().await?;

    vehicle.close().await;

    assert!(matches!(vehicle.arm().await, Err(Error::Disconnected)));
    autopilot.abort();
    Ok(())
}

#[tokio::test]
async fn silent_vehicle_fails_to_connect() -> pnr::Result<()> {
    let link = MavLink::open("udpin:127.0.0.1:0").await?;

    let result = Vehicle::connect_from_link(link, Duration::from_millis(300)).await;

    assert!(matches!(result, Err(Error::Connection(_))));
    Ok(())
}
