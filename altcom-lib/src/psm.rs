//! Power saving mode (PSM) settings queries.
//!
//! Protocol v1 answers `GetDynamicPsm` with the settings currently in force.
//! Protocol v4 folds that query into the more general `GetPsm`, which takes
//! a [`PsmQuery`] selector; at v4 the current-settings entry points delegate
//! to `GetPsm(Negotiated)`.

use crate::client::{Altcom, Callback};
use crate::codec::{Command, parse_exact};
use crate::command::{LogicalCommand, ProtocolVersion};
use crate::constants::{LTE_RESULT_ERROR, LTE_RESULT_OK, PSM_TIMEVAL_MAX};
use crate::error::AltcomError;
use crate::gateway::CommandGateway;
use num_enum::{IntoPrimitive, TryFromPrimitive};
use std::fmt;
use std::time::Duration;
use strum_macros::Display;
use tracing::debug;
use zerocopy::byteorder::big_endian::I32;
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Unit of the requested active time (T3324).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Default, TryFromPrimitive, IntoPrimitive)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[repr(u8)]
pub enum ActiveTimeUnit {
    #[default]
    #[strum(to_string = "2 s")]
    Sec2 = 0,
    #[strum(to_string = "1 min")]
    Min1 = 1,
    #[strum(to_string = "6 min")]
    Min6 = 2,
    #[strum(to_string = "deactivated")]
    Deactivated = 3,
}

impl ActiveTimeUnit {
    pub fn seconds(self) -> Option<u64> {
        match self {
            ActiveTimeUnit::Sec2 => Some(2),
            ActiveTimeUnit::Min1 => Some(60),
            ActiveTimeUnit::Min6 => Some(360),
            ActiveTimeUnit::Deactivated => None,
        }
    }
}

/// Unit of the extended periodic tracking area update timer (T3412).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Default, TryFromPrimitive, IntoPrimitive)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[repr(u8)]
pub enum TauUnit {
    #[default]
    #[strum(to_string = "2 s")]
    Sec2 = 0,
    #[strum(to_string = "30 s")]
    Sec30 = 1,
    #[strum(to_string = "1 min")]
    Min1 = 2,
    #[strum(to_string = "10 min")]
    Min10 = 3,
    #[strum(to_string = "1 h")]
    Hour1 = 4,
    #[strum(to_string = "10 h")]
    Hour10 = 5,
    #[strum(to_string = "320 h")]
    Hour320 = 6,
    #[strum(to_string = "deactivated")]
    Deactivated = 7,
}

impl TauUnit {
    pub fn seconds(self) -> Option<u64> {
        match self {
            TauUnit::Sec2 => Some(2),
            TauUnit::Sec30 => Some(30),
            TauUnit::Min1 => Some(60),
            TauUnit::Min10 => Some(600),
            TauUnit::Hour1 => Some(3_600),
            TauUnit::Hour10 => Some(36_000),
            TauUnit::Hour320 => Some(1_152_000),
            TauUnit::Deactivated => None,
        }
    }
}

/// A timer value as carried by the modem: `value` multiples of `unit`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct PsmTimer<U> {
    pub unit: U,
    pub value: u8,
}

impl PsmTimer<ActiveTimeUnit> {
    pub fn duration(&self) -> Option<Duration> {
        self.unit.seconds().map(|s| Duration::from_secs(s * u64::from(self.value)))
    }
}

impl PsmTimer<TauUnit> {
    pub fn duration(&self) -> Option<Duration> {
        self.unit.seconds().map(|s| Duration::from_secs(s * u64::from(self.value)))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct PsmSetting {
    pub enabled: bool,
    pub active_time: PsmTimer<ActiveTimeUnit>,
    pub periodic_tau: PsmTimer<TauUnit>,
}

impl PsmSetting {
    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn enabled(active_time: PsmTimer<ActiveTimeUnit>, periodic_tau: PsmTimer<TauUnit>) -> Self {
        Self {
            enabled: true,
            active_time,
            periodic_tau,
        }
    }

    /// Reject timer values the modem cannot represent.
    pub fn validate(&self) -> Result<(), AltcomError> {
        if !self.enabled {
            return Ok(());
        }
        if self.active_time.value > PSM_TIMEVAL_MAX {
            return Err(AltcomError::Validation(format!(
                "active time value {} exceeds {}",
                self.active_time.value, PSM_TIMEVAL_MAX
            )));
        }
        if self.periodic_tau.value > PSM_TIMEVAL_MAX {
            return Err(AltcomError::Validation(format!(
                "periodic TAU value {} exceeds {}",
                self.periodic_tau.value, PSM_TIMEVAL_MAX
            )));
        }
        Ok(())
    }
}

impl fmt::Display for PsmSetting {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.enabled {
            return write!(f, "PSM disabled");
        }
        write!(
            f,
            "PSM enabled, active time: {} x {}, periodic TAU: {} x {}",
            self.active_time.value, self.active_time.unit, self.periodic_tau.value, self.periodic_tau.unit
        )
    }
}

/// PSM settings block as laid out on the wire (5 bytes)
#[derive(Debug, Clone, Copy, Default, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
#[repr(C)]
pub struct PsmSetRaw {
    pub enable: u8,
    pub active_unit: u8,
    pub active_value: u8,
    pub tau_unit: u8,
    pub tau_value: u8,
}

impl TryFrom<PsmSetRaw> for PsmSetting {
    type Error = AltcomError;

    fn try_from(raw: PsmSetRaw) -> Result<Self, Self::Error> {
        match raw.enable {
            0 => Ok(PsmSetting::disabled()),
            1 => {
                let active_unit = ActiveTimeUnit::try_from(raw.active_unit)
                    .map_err(|_| AltcomError::Validation(format!("invalid active time unit {}", raw.active_unit)))?;
                let tau_unit = TauUnit::try_from(raw.tau_unit)
                    .map_err(|_| AltcomError::Validation(format!("invalid periodic TAU unit {}", raw.tau_unit)))?;
                Ok(PsmSetting::enabled(
                    PsmTimer {
                        unit: active_unit,
                        value: raw.active_value,
                    },
                    PsmTimer {
                        unit: tau_unit,
                        value: raw.tau_value,
                    },
                ))
            }
            other => Err(AltcomError::Validation(format!("invalid PSM enable flag {}", other))),
        }
    }
}

impl From<PsmSetting> for PsmSetRaw {
    fn from(setting: PsmSetting) -> Self {
        if !setting.enabled {
            return PsmSetRaw::default();
        }
        PsmSetRaw {
            enable: 1,
            active_unit: setting.active_time.unit.into(),
            active_value: setting.active_time.value,
            tau_unit: setting.periodic_tau.unit.into(),
            tau_value: setting.periodic_tau.value,
        }
    }
}

/// `GetDynamicPsm` response (6 bytes)
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
#[repr(C)]
pub struct DynamicPsmResponseRaw {
    pub result: u8,
    pub set: PsmSetRaw,
}

impl DynamicPsmResponseRaw {
    pub fn ok(setting: PsmSetting) -> Self {
        Self {
            result: LTE_RESULT_OK,
            set: setting.into(),
        }
    }

    pub fn error() -> Self {
        Self {
            result: LTE_RESULT_ERROR,
            set: PsmSetRaw::default(),
        }
    }
}

/// `GetPsm` request (1 byte)
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
#[repr(C)]
pub struct GetPsmRequestRaw {
    pub query: u8,
}

/// `GetPsm` response (9 bytes)
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
#[repr(C)]
pub struct GetPsmResponseRaw {
    pub result: I32,
    pub set: PsmSetRaw,
}

impl GetPsmResponseRaw {
    pub fn ok(setting: PsmSetting) -> Self {
        Self {
            result: I32::new(0),
            set: setting.into(),
        }
    }

    pub fn error(code: i32) -> Self {
        Self {
            result: I32::new(code),
            set: PsmSetRaw::default(),
        }
    }
}

/// Which PSM parameter set a v4 `GetPsm` reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, TryFromPrimitive, IntoPrimitive)]
#[repr(u8)]
pub enum PsmQuery {
    #[strum(to_string = "requested")]
    Requested = 0,
    #[strum(to_string = "negotiated")]
    Negotiated = 1,
}

fn settings_from_wire(set: PsmSetRaw) -> Result<PsmSetting, AltcomError> {
    let setting = PsmSetting::try_from(set)?;
    setting.validate()?;
    Ok(setting)
}

/// Query the PSM settings in force (protocol v1).
#[derive(Debug, Clone, Copy, Default)]
pub struct GetDynamicPsm;

impl Command for GetDynamicPsm {
    const LOGICAL: LogicalCommand = LogicalCommand::GetDynamicPsm;
    const REQUEST_LEN: usize = 0;
    const RESPONSE_LEN: usize = size_of::<DynamicPsmResponseRaw>();

    type Output = PsmSetting;

    fn encode(&self, _out: &mut [u8]) {}

    fn decode(response: &[u8]) -> Result<PsmSetting, AltcomError> {
        let raw = parse_exact::<DynamicPsmResponseRaw>(response)?;
        if raw.result != LTE_RESULT_OK {
            return Err(AltcomError::Remote(i32::from(raw.result)));
        }
        settings_from_wire(raw.set)
    }
}

/// Query a PSM parameter set (protocol v4).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GetPsm {
    pub query: PsmQuery,
}

impl GetPsm {
    /// Parse the request payload as the modem sees it.
    pub fn parse_request(bytes: &[u8]) -> Result<Self, AltcomError> {
        let raw = parse_exact::<GetPsmRequestRaw>(bytes)?;
        let query = PsmQuery::try_from(raw.query)
            .map_err(|_| AltcomError::Validation(format!("invalid PSM query {}", raw.query)))?;
        Ok(Self { query })
    }
}

impl Command for GetPsm {
    const LOGICAL: LogicalCommand = LogicalCommand::GetPsm;
    const REQUEST_LEN: usize = size_of::<GetPsmRequestRaw>();
    const RESPONSE_LEN: usize = size_of::<GetPsmResponseRaw>();

    type Output = PsmSetting;

    fn encode(&self, out: &mut [u8]) {
        let raw = GetPsmRequestRaw {
            query: self.query.into(),
        };
        out.copy_from_slice(raw.as_bytes());
    }

    fn decode(response: &[u8]) -> Result<PsmSetting, AltcomError> {
        let raw = parse_exact::<GetPsmResponseRaw>(response)?;
        let result = raw.result.get();
        if result != 0 {
            return Err(AltcomError::Remote(result));
        }
        settings_from_wire(raw.set)
    }
}

pub type PsmCallback = Callback<PsmSetting>;

impl<G: CommandGateway> Altcom<G> {
    /// Fetch the PSM settings in force.
    ///
    /// Without a callback the call blocks and fills `settings`; with one it
    /// returns once the request is sent and the callback receives the result.
    /// Supplying neither is an error.
    pub async fn current_psm(
        &self,
        settings: Option<&mut PsmSetting>,
        callback: Option<PsmCallback>,
    ) -> Result<(), AltcomError> {
        let id = self.prepare(LogicalCommand::GetDynamicPsm, settings.is_some(), callback.is_some())?;

        if self.protocol_version() == ProtocolVersion::V4 {
            debug!("Protocol v4: current PSM query served by GetPsm(negotiated)");
            return self.get_psm(PsmQuery::Negotiated, settings, callback).await;
        }
        self.run(id, &GetDynamicPsm, settings, callback).await
    }

    pub async fn get_current_psm_sync(&self) -> Result<PsmSetting, AltcomError> {
        let mut settings = PsmSetting::default();
        self.current_psm(Some(&mut settings), None).await?;
        Ok(settings)
    }

    pub async fn get_current_psm(&self, callback: PsmCallback) -> Result<(), AltcomError> {
        self.current_psm(None, Some(callback)).await
    }

    /// Same as [`get_current_psm`](Self::get_current_psm), kept under its older name.
    pub async fn get_dynamic_psm_param(&self, callback: PsmCallback) -> Result<(), AltcomError> {
        self.current_psm(None, Some(callback)).await
    }

    /// Fetch the requested or negotiated PSM parameter set (protocol v4 only).
    pub async fn get_psm(
        &self,
        query: PsmQuery,
        settings: Option<&mut PsmSetting>,
        callback: Option<PsmCallback>,
    ) -> Result<(), AltcomError> {
        self.execute(&GetPsm { query }, settings, callback).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> PsmSetting {
        PsmSetting::enabled(
            PsmTimer {
                unit: ActiveTimeUnit::Min1,
                value: 5,
            },
            PsmTimer {
                unit: TauUnit::Hour1,
                value: 12,
            },
        )
    }

    #[test]
    fn test_dynamic_psm_response_layout() {
        let raw = DynamicPsmResponseRaw::ok(sample());
        assert_eq!(raw.as_bytes(), &[0x00, 0x01, 0x01, 0x05, 0x04, 0x0C]);
        assert_eq!(GetDynamicPsm::RESPONSE_LEN, 6);
        assert_eq!(GetDynamicPsm::decode(raw.as_bytes()).unwrap(), sample());
    }

    #[test]
    fn test_get_psm_response_is_big_endian() {
        let raw = GetPsmResponseRaw::error(-5);
        assert_eq!(&raw.as_bytes()[..4], &[0xFF, 0xFF, 0xFF, 0xFB]);
        assert!(matches!(GetPsm::decode(raw.as_bytes()), Err(AltcomError::Remote(-5))));
    }

    #[test]
    fn test_get_psm_request_round_trip() {
        let cmd = GetPsm {
            query: PsmQuery::Negotiated,
        };
        let mut out = [0u8; GetPsm::REQUEST_LEN];
        cmd.encode(&mut out);
        assert_eq!(out, [0x01]);
        assert_eq!(GetPsm::parse_request(&out).unwrap(), cmd);
    }

    #[test]
    fn test_disabled_ignores_timer_bytes() {
        let bytes = [LTE_RESULT_OK, 0x00, 0x09, 0xFF, 0x09, 0xFF];
        assert_eq!(GetDynamicPsm::decode(&bytes).unwrap(), PsmSetting::disabled());
    }

    #[test]
    fn test_validation_failures() {
        let bad_unit = [LTE_RESULT_OK, 0x01, 0x04, 0x01, 0x00, 0x01];
        assert!(matches!(GetDynamicPsm::decode(&bad_unit), Err(AltcomError::Validation(_))));

        let bad_value = [LTE_RESULT_OK, 0x01, 0x00, 32, 0x00, 0x01];
        assert!(matches!(GetDynamicPsm::decode(&bad_value), Err(AltcomError::Validation(_))));

        let bad_flag = [LTE_RESULT_OK, 0x02, 0x00, 0x01, 0x00, 0x01];
        assert!(matches!(GetDynamicPsm::decode(&bad_flag), Err(AltcomError::Validation(_))));
    }

    #[test]
    fn test_length_mismatch_rejected() {
        for len in [0usize, 5, 7] {
            let bytes = vec![0u8; len];
            match GetDynamicPsm::decode(&bytes) {
                Err(AltcomError::ProtocolMismatch { expected, actual }) => {
                    assert_eq!(expected, 6);
                    assert_eq!(actual, len);
                }
                other => panic!("expected ProtocolMismatch for {} bytes, got {:?}", len, other),
            }
        }
    }

    #[test]
    fn test_timer_durations() {
        let setting = sample();
        assert_eq!(setting.active_time.duration(), Some(Duration::from_secs(300)));
        assert_eq!(setting.periodic_tau.duration(), Some(Duration::from_secs(43_200)));
        let off = PsmTimer {
            unit: TauUnit::Deactivated,
            value: 3,
        };
        assert_eq!(off.duration(), None);
        assert_eq!(
            format!("{}", setting),
            "PSM enabled, active time: 5 x 1 min, periodic TAU: 12 x 1 h"
        );
    }
}
