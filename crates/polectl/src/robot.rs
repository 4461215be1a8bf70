//! DeviceFacade: named control-point operations on the attached robot.
//!
//! Every operation is exactly one device-session read or write plus one
//! record codec call. Nothing is retried.

use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::debug;

use polectl_core::error::{Error, Result};
use polectl_core::types::{ControlPointId, PeerInfo, WRITE_KEY};
use polectl_records::{
    Battery, MotorControl, MotorFormat, RobotPosition, ServoPosition, SignalStrength,
};
use polectl_session::DeviceSession;

/// Per-deployment encoding choices for a robot.
#[derive(Debug, Clone)]
pub struct FacadeConfig {
    /// Key prefixed to every write.
    pub write_key: u16,
    /// Motor record shape spoken by the firmware.
    pub motor_format: MotorFormat,
    /// Whether writes wait for the robot's acknowledgement.
    pub confirm_writes: bool,
}

impl Default for FacadeConfig {
    fn default() -> Self {
        FacadeConfig {
            write_key: WRITE_KEY,
            motor_format: MotorFormat::Extended,
            confirm_writes: true,
        }
    }
}

/// The connected robot.
///
/// A facade is created attached to a device session. Once detached (on
/// disconnect) every operation fails with [`Error::NotConnected`].
pub struct DeviceFacade {
    peer: PeerInfo,
    session: Mutex<Option<Arc<DeviceSession>>>,
    config: FacadeConfig,
}

impl DeviceFacade {
    pub fn new(peer: PeerInfo, session: DeviceSession, config: FacadeConfig) -> Self {
        DeviceFacade {
            peer,
            session: Mutex::new(Some(Arc::new(session))),
            config,
        }
    }

    pub fn peer(&self) -> &PeerInfo {
        &self.peer
    }

    pub fn config(&self) -> &FacadeConfig {
        &self.config
    }

    pub async fn is_attached(&self) -> bool {
        self.session.lock().await.is_some()
    }

    /// Detach and stop the device session. Returns `false` if it was already
    /// detached.
    pub async fn detach(&self) -> bool {
        match self.session.lock().await.take() {
            Some(session) => {
                debug!(peer = %self.peer.id, "device session detached");
                session.close();
                true
            }
            None => false,
        }
    }

    async fn session(&self) -> Result<Arc<DeviceSession>> {
        self.session.lock().await.clone().ok_or(Error::NotConnected)
    }

    async fn read(&self, id: ControlPointId) -> Result<Vec<u8>> {
        self.session().await?.read(id).await
    }

    async fn write(&self, id: ControlPointId, payload: Vec<u8>) -> Result<()> {
        let session = self.session().await?;
        session.write(id, payload, self.config.confirm_writes).await
    }

    pub async fn battery(&self) -> Result<Battery> {
        Battery::decode(&self.read(ControlPointId::Battery).await?)
    }

    pub async fn robot_position(&self) -> Result<RobotPosition> {
        RobotPosition::decode(&self.read(ControlPointId::RobotPosition).await?)
    }

    pub async fn latch_position(&self) -> Result<ServoPosition> {
        ServoPosition::decode(&self.read(ControlPointId::Latch).await?)
    }

    pub async fn set_latch_position(&self, position: ServoPosition) -> Result<()> {
        self.write(ControlPointId::Latch, position.to_bytes()).await
    }

    pub async fn launcher_position(&self) -> Result<ServoPosition> {
        ServoPosition::decode(&self.read(ControlPointId::Launcher).await?)
    }

    pub async fn set_launcher_position(&self, position: ServoPosition) -> Result<()> {
        self.write(ControlPointId::Launcher, position.to_bytes()).await
    }

    pub async fn motor_control(&self) -> Result<MotorControl> {
        let bytes = self.read(ControlPointId::Motor).await?;
        MotorControl::decode(&bytes, self.config.motor_format)
    }

    pub async fn set_motor_control(&self, motor: MotorControl) -> Result<()> {
        let payload = motor.to_bytes(self.config.motor_format);
        self.write(ControlPointId::Motor, payload).await
    }

    /// Link signal strength, read through the session's pseudo control point.
    pub async fn signal_strength(&self) -> Result<SignalStrength> {
        SignalStrength::decode(&self.read(ControlPointId::SignalStrength).await?)
    }
}

impl std::fmt::Debug for DeviceFacade {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceFacade")
            .field("peer", &self.peer)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use polectl_core::transport::PeripheralEvent;
    use polectl_records::MotorDirection;
    use polectl_session::DeviceConfig;
    use polectl_test_harness::{MockPeripheral, PeripheralCall};
    use std::time::Duration;

    async fn settle() {
        for _ in 0..8 {
            tokio::task::yield_now().await;
        }
    }

    async fn facade(config: FacadeConfig) -> (Arc<MockPeripheral>, Arc<DeviceFacade>) {
        let (mock, link) = MockPeripheral::new();
        let session = DeviceSession::spawn(link, DeviceConfig::default());
        session
            .wait_discovered(Duration::from_secs(1))
            .await
            .unwrap();
        let facade = DeviceFacade::new(PeerInfo::new("robot-1"), session, config);
        (mock, Arc::new(facade))
    }

    /// Answer the next read of `id` with `value` once it reaches the mock.
    fn answer(mock: &Arc<MockPeripheral>, id: ControlPointId, value: Vec<u8>) {
        let mock = mock.clone();
        tokio::spawn(async move {
            loop {
                let handle = MockPeripheral::handle_for(id);
                if mock.calls().contains(&PeripheralCall::Read(handle)) {
                    break;
                }
                tokio::task::yield_now().await;
            }
            mock.push(PeripheralEvent::ValueUpdated {
                id,
                value: Ok(Some(value)),
            });
        });
    }

    #[tokio::test(start_paused = true)]
    async fn battery_decodes_voltage() {
        let (mock, robot) = facade(FacadeConfig::default()).await;
        answer(&mock, ControlPointId::Battery, vec![0xFF, 0x03]);
        let battery = robot.battery().await.unwrap();
        assert!((battery.volts() - 6.6).abs() < 1e-9);
    }

    #[tokio::test(start_paused = true)]
    async fn robot_position_decodes() {
        let (mock, robot) = facade(FacadeConfig::default()).await;
        answer(&mock, ControlPointId::RobotPosition, vec![3, 20, 4]);
        assert_eq!(
            robot.robot_position().await.unwrap(),
            RobotPosition::GoingUp {
                speed: 20,
                duration: 4
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn malformed_record_is_a_length_error() {
        let (mock, robot) = facade(FacadeConfig::default()).await;
        answer(&mock, ControlPointId::Latch, vec![0x32, 0xF0]);
        assert_eq!(
            robot.latch_position().await.unwrap_err(),
            Error::RecordLength {
                expected: 3,
                actual: 2
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn motor_control_uses_configured_format() {
        let config = FacadeConfig {
            motor_format: MotorFormat::Compact,
            ..FacadeConfig::default()
        };
        let (mock, robot) = facade(config).await;
        answer(&mock, ControlPointId::Motor, vec![0x32, 0xF0, 0x70, 0xFF]);
        let motor = robot.motor_control().await.unwrap();
        assert_eq!(motor.direction(), MotorDirection::Down);
        assert_eq!(motor.speed(), 0x90);
        assert!(!motor.autostop());
    }

    #[tokio::test(start_paused = true)]
    async fn set_latch_writes_keyed_record() {
        let config = FacadeConfig {
            confirm_writes: false,
            ..FacadeConfig::default()
        };
        let (mock, robot) = facade(config).await;
        let position = ServoPosition::new(75, WRITE_KEY).unwrap();
        robot.set_latch_position(position).await.unwrap();
        assert_eq!(
            mock.calls().last(),
            Some(&PeripheralCall::Write {
                handle: MockPeripheral::handle_for(ControlPointId::Latch),
                data: vec![0x32, 0xF0, 75],
                with_response: false,
            })
        );
    }

    #[tokio::test(start_paused = true)]
    async fn confirmed_motor_write_waits_for_ack() {
        let (mock, robot) = facade(FacadeConfig::default()).await;
        let motor = MotorControl::new(0x90, MotorDirection::Up, true, WRITE_KEY).unwrap();

        let writer = {
            let robot = robot.clone();
            tokio::spawn(async move { robot.set_motor_control(motor).await })
        };
        settle().await;
        assert!(mock.calls().contains(&PeripheralCall::Write {
            handle: MockPeripheral::handle_for(ControlPointId::Motor),
            data: vec![0x32, 0xF0, 0x90, 0x00, 0x01],
            with_response: true,
        }));
        mock.push(PeripheralEvent::WriteCompleted {
            id: ControlPointId::Motor,
            result: Ok(()),
        });
        assert!(writer.await.unwrap().is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn signal_strength_reads_rssi() {
        let (mock, robot) = facade(FacadeConfig::default()).await;
        let reader = {
            let robot = robot.clone();
            tokio::spawn(async move { robot.signal_strength().await })
        };
        settle().await;
        assert_eq!(mock.calls().last(), Some(&PeripheralCall::ReadRssi));
        mock.push(PeripheralEvent::SignalStrengthRead(Ok(-58)));
        assert_eq!(reader.await.unwrap().unwrap().dbm(), -58);
    }

    #[tokio::test(start_paused = true)]
    async fn detached_facade_fails_fast() {
        let (_mock, robot) = facade(FacadeConfig::default()).await;
        assert!(robot.is_attached().await);
        assert!(robot.detach().await);
        assert!(!robot.detach().await);
        assert_eq!(robot.battery().await.unwrap_err(), Error::NotConnected);
        assert_eq!(
            robot
                .set_launcher_position(ServoPosition::new(10, WRITE_KEY).unwrap())
                .await
                .unwrap_err(),
            Error::NotConnected
        );
    }
}
