//! Robot position status record.

use polectl_core::error::{Error, Result};

use crate::check_len;

const STOPPED_UNKNOWN: u8 = 0;
const TOP: u8 = 1;
const BOTTOM: u8 = 2;
const GOING_UP: u8 = 3;
const GOING_DOWN: u8 = 4;

/// Where the robot is on the pole, as reported by its limit switches and
/// motor controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RobotPosition {
    /// Stopped somewhere between the limits, or position not yet known.
    StoppedUnknown,
    Top,
    Bottom,
    GoingUp { speed: i8, duration: u8 },
    GoingDown { speed: i8, duration: u8 },
}

impl RobotPosition {
    /// Record length in bytes.
    pub const LEN: usize = 3;

    /// Decode a 3-byte position record.
    ///
    /// Speed and duration bytes are only meaningful for the moving states
    /// and are ignored otherwise.
    pub fn decode(data: &[u8]) -> Result<Self> {
        check_len(data, Self::LEN)?;
        let speed = data[1] as i8;
        let duration = data[2];
        match data[0] {
            STOPPED_UNKNOWN => Ok(RobotPosition::StoppedUnknown),
            TOP => Ok(RobotPosition::Top),
            BOTTOM => Ok(RobotPosition::Bottom),
            GOING_UP => Ok(RobotPosition::GoingUp { speed, duration }),
            GOING_DOWN => Ok(RobotPosition::GoingDown { speed, duration }),
            _ => Err(Error::FieldOutOfRange("robot position type")),
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        match *self {
            RobotPosition::StoppedUnknown => vec![STOPPED_UNKNOWN, 0, 0],
            RobotPosition::Top => vec![TOP, 0, 0],
            RobotPosition::Bottom => vec![BOTTOM, 0, 0],
            RobotPosition::GoingUp { speed, duration } => vec![GOING_UP, speed as u8, duration],
            RobotPosition::GoingDown { speed, duration } => {
                vec![GOING_DOWN, speed as u8, duration]
            }
        }
    }

    pub fn is_moving(&self) -> bool {
        matches!(
            self,
            RobotPosition::GoingUp { .. } | RobotPosition::GoingDown { .. }
        )
    }
}

impl std::fmt::Display for RobotPosition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RobotPosition::StoppedUnknown => write!(f, "stopped (position unknown)"),
            RobotPosition::Top => write!(f, "at top"),
            RobotPosition::Bottom => write!(f, "at bottom"),
            RobotPosition::GoingUp { speed, duration } => {
                write!(f, "going up (speed {speed}, {duration}s)")
            }
            RobotPosition::GoingDown { speed, duration } => {
                write!(f, "going down (speed {speed}, {duration}s)")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_rejects_wrong_length() {
        assert_eq!(
            RobotPosition::decode(&[0x00]),
            Err(Error::RecordLength {
                expected: 3,
                actual: 1
            })
        );
        assert!(RobotPosition::decode(&[]).is_err());
        assert!(RobotPosition::decode(&[0, 0, 0, 0]).is_err());
    }

    #[test]
    fn length_is_checked_before_type_code() {
        // An invalid type code with a bad length reports the length.
        assert!(matches!(
            RobotPosition::decode(&[0x09, 0x00]),
            Err(Error::RecordLength { .. })
        ));
    }

    #[test]
    fn decode_stationary_states_ignore_trailing_bytes() {
        assert_eq!(
            RobotPosition::decode(&[0x00, 0xFF, 0xFF]).unwrap(),
            RobotPosition::StoppedUnknown
        );
        assert_eq!(
            RobotPosition::decode(&[0x01, 0xFF, 0xFF]).unwrap(),
            RobotPosition::Top
        );
        assert_eq!(
            RobotPosition::decode(&[0x02, 0xFF, 0xFF]).unwrap(),
            RobotPosition::Bottom
        );
    }

    #[test]
    fn decode_going_up_signed_speed() {
        assert_eq!(
            RobotPosition::decode(&[0x03, 0xFF, 0x45]).unwrap(),
            RobotPosition::GoingUp {
                speed: -1,
                duration: 0x45
            }
        );
    }

    #[test]
    fn decode_going_down() {
        assert_eq!(
            RobotPosition::decode(&[0x04, 0x20, 0x45]).unwrap(),
            RobotPosition::GoingDown {
                speed: 0x20,
                duration: 0x45
            }
        );
    }

    #[test]
    fn decode_rejects_unknown_type() {
        assert_eq!(
            RobotPosition::decode(&[0x05, 0x00, 0x00]),
            Err(Error::FieldOutOfRange("robot position type"))
        );
    }

    #[test]
    fn to_bytes_moving_state() {
        let p = RobotPosition::GoingDown {
            speed: -3,
            duration: 7,
        };
        assert_eq!(p.to_bytes(), vec![0x04, 0xFD, 0x07]);
        assert!(p.is_moving());
        assert!(!RobotPosition::Top.is_moving());
    }
}
