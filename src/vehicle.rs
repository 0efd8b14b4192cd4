use crate::control::VehicleControl;
use crate::geo::LocationGlobalRelative;
use crate::link::MavLink;
use crate::mav_utils::MavDispatch;
use crate::subsystems::commander::{Commander, FlightMode};
use crate::subsystems::telemetry::Telemetry;
use crate::{Error, Result};
use async_trait::async_trait;
use flume as channel;
use futures::lock::Mutex;
use mavlink::common::{
    MavAutopilot, MavDataStream, MavMessage, MavModeFlag, MavState, MavType, HEARTBEAT_DATA,
    REQUEST_DATA_STREAM_DATA,
};
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering::Relaxed;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// How long [Vehicle::connect()] waits for the first autopilot heartbeat
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Telemetry rate requested from the autopilot (Hz)
const STREAM_RATE_HZ: u16 = 4;

const GCS_HEARTBEAT_PERIOD: Duration = Duration::from_secs(1);

/// # A MAVLink vehicle
///
/// This struct is one-time use: Creating it will connect to a vehicle and once closed, the object cannot be
/// reconnected. A new one need to be created to connect again.
///
/// See the [crate root documentation](crate) for more context and information.
pub struct Vehicle {
    /// Telemetry subsystem access
    pub telemetry: Telemetry,
    /// Command subsystem access
    pub commander: Commander,
    uplink_task: Mutex<Option<JoinHandle<()>>>,
    dispatch_task: Mutex<Option<JoinHandle<()>>>,
    disconnect: Arc<AtomicBool>,
    link: Arc<MavLink>,
}

impl Vehicle {
    /// Connect to the vehicle at a given connection string
    ///
    /// This function opens a link to `uri` and calls [Vehicle::connect_from_link()] with [CONNECT_TIMEOUT].
    /// See [ConnectionUri](crate::link::ConnectionUri) for the accepted formats.
    pub async fn connect(uri: &str) -> Result<Self> {
        log::info!("Connecting to vehicle on {}", uri);
        let link = MavLink::open(uri).await?;

        Self::connect_from_link(link, CONNECT_TIMEOUT).await
    }

    /// Connect a vehicle using an already opened link
    ///
    /// Waits up to `heartbeat_timeout` for an autopilot heartbeat, then requests the telemetry streams.
    /// Returns [Error::Connection] if the vehicle never shows up.
    pub async fn connect_from_link(link: MavLink, heartbeat_timeout: Duration) -> Result<Self> {
        let disconnect = Arc::new(AtomicBool::new(false));

        // Downlink dispatcher
        let link = Arc::new(link);
        let mut dispatcher = MavDispatch::new(link.clone(), disconnect.clone());

        // Uplink queue
        let disconnect_uplink = disconnect.clone();
        let (uplink, rx) = channel::unbounded::<MavMessage>();
        let link_uplink = link.clone();
        let uplink_task = tokio::spawn(async move {
            let mut heartbeat = tokio::time::interval(GCS_HEARTBEAT_PERIOD);
            while !disconnect_uplink.load(Relaxed) {
                tokio::select! {
                    _ = heartbeat.tick() => {
                        if let Err(e) = link_uplink.send(&gcs_heartbeat()).await {
                            log::debug!("Cannot send heartbeat: {}", e);
                        }
                    }
                    msg = tokio::time::timeout(Duration::from_millis(100), rx.recv_async()) => {
                        match msg {
                            Ok(Ok(msg)) => {
                                if let Err(e) = link_uplink.send(&msg).await {
                                    log::warn!("Cannot send to vehicle: {}", e);
                                }
                            }
                            Err(_) => (),
                            Ok(Err(flume::RecvError::Disconnected)) => return,
                        }
                    }
                }
            }
        });

        let telemetry_downlink = dispatcher
            .telemetry_receiver()
            .ok_or_else(|| Error::SystemError("telemetry receiver already taken".to_owned()))?;
        let telemetry = Telemetry::new(telemetry_downlink);
        let acks = dispatcher
            .command_ack_receiver()
            .ok_or_else(|| Error::SystemError("command ack receiver already taken".to_owned()))?;

        // Start the downlink dispatcher
        let dispatch_task = dispatcher.run();

        let vehicle_id = match telemetry.wait_heartbeat(heartbeat_timeout).await {
            Ok(id) => id,
            Err(e) => {
                disconnect.store(true, Relaxed);
                return Err(e);
            }
        };
        log::info!("Connected to vehicle {} (component {})", vehicle_id.0, vehicle_id.1);

        let (target_system, target_component) = vehicle_id;
        uplink
            .send_async(MavMessage::REQUEST_DATA_STREAM(REQUEST_DATA_STREAM_DATA {
                req_message_rate: STREAM_RATE_HZ,
                target_system,
                target_component,
                req_stream_id: MavDataStream::MAV_DATA_STREAM_ALL as u8,
                start_stop: 1,
            }))
            .await?;

        let commander = Commander::new(uplink, acks, vehicle_id);

        Ok(Vehicle {
            telemetry,
            commander,
            uplink_task: Mutex::new(Some(uplink_task)),
            dispatch_task: Mutex::new(Some(dispatch_task)),
            disconnect,
            link,
        })
    }

    /// Address of the vehicle on the link
    pub fn peer(&self) -> Option<std::net::SocketAddr> {
        self.link.peer()
    }

    /// Close the vehicle connection
    ///
    /// The connection can be ended in two ways: either by dropping the [Vehicle] object or by calling this
    /// close() function. Once this function return, both background tasks are stopped.
    ///
    /// Once closed, any commands will return the error [Error::Disconnected]
    pub async fn close(&self) {
        // Set disconnect to true, will make both uplink and dispatcher task quit
        self.disconnect.store(true, Relaxed);

        // Wait for both task to finish
        if let Some(uplink_task) = self.uplink_task.lock().await.take() {
            let _ = uplink_task.await;
        }
        if let Some(dispatch_task) = self.dispatch_task.lock().await.take() {
            let _ = dispatch_task.await;
        }
        log::info!("Vehicle connection closed");
    }
}

impl Drop for Vehicle {
    fn drop(&mut self) {
        self.disconnect.store(true, Relaxed);
    }
}

#[async_trait]
impl VehicleControl for Vehicle {
    fn is_armable(&self) -> bool {
        self.telemetry.is_armable()
    }

    fn is_armed(&self) -> bool {
        self.telemetry.is_armed()
    }

    fn battery_level(&self) -> Result<f64> {
        self.telemetry.battery_level()
    }

    fn location(&self) -> Result<LocationGlobalRelative> {
        self.telemetry.location()
    }

    fn groundspeed(&self) -> Result<f32> {
        self.telemetry.groundspeed()
    }

    async fn set_mode(&self, mode: FlightMode) -> Result<()> {
        self.commander.set_mode(mode).await
    }

    async fn arm(&self) -> Result<()> {
        self.commander.arm().await
    }

    async fn simple_takeoff(&self, altitude: f32) -> Result<()> {
        self.commander.takeoff(altitude).await
    }

    async fn simple_goto(&self, target: LocationGlobalRelative, groundspeed: Option<f32>) -> Result<()> {
        if let Some(speed) = groundspeed {
            self.commander.set_groundspeed(speed).await?;
        }
        self.commander.goto(target).await
    }

    async fn set_airspeed(&self, speed: f32) -> Result<()> {
        self.commander.set_airspeed(speed).await
    }

    async fn close(&self) {
        Vehicle::close(self).await
    }
}

fn gcs_heartbeat() -> MavMessage {
    MavMessage::HEARTBEAT(HEARTBEAT_DATA {
        custom_mode: 0,
        mavtype: MavType::MAV_TYPE_GCS,
        autopilot: MavAutopilot::MAV_AUTOPILOT_INVALID,
        base_mode: MavModeFlag::empty(),
        system_status: MavState::MAV_STATE_ACTIVE,
        mavlink_version: 3,
    })
}
