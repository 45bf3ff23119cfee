use crate::codec::Command;
use crate::digest::{MdDigestCommand, MdDigestResponseRaw, MdType};
use crate::error::AltcomError;
use crate::psm::{ActiveTimeUnit, DynamicPsmResponseRaw, GetDynamicPsm, GetPsm, GetPsmResponseRaw, PsmSetting, PsmTimer, TauUnit};
use crate::x509::SetCrtSerial;
use num_enum::TryFromPrimitive;
use zerocopy::IntoBytes;

fn every_valid_setting() -> Vec<PsmSetting> {
    let mut settings = vec![PsmSetting::disabled()];
    for active in 0u8..=3 {
        for tau in 0u8..=7 {
            for value in [0u8, 1, 17, 31] {
                settings.push(PsmSetting::enabled(
                    PsmTimer {
                        unit: ActiveTimeUnit::try_from_primitive(active).unwrap(),
                        value,
                    },
                    PsmTimer {
                        unit: TauUnit::try_from_primitive(tau).unwrap(),
                        value: 31 - value,
                    },
                ));
            }
        }
    }
    settings
}

#[test]
fn test_psm_settings_survive_both_response_layouts() {
    for setting in every_valid_setting() {
        let v1 = DynamicPsmResponseRaw::ok(setting);
        assert_eq!(GetDynamicPsm::decode(v1.as_bytes()).unwrap(), setting);

        let v4 = GetPsmResponseRaw::ok(setting);
        assert_eq!(GetPsm::decode(v4.as_bytes()).unwrap(), setting);
    }
}

#[test]
fn test_v1_error_result_is_remote_failure() {
    let raw = DynamicPsmResponseRaw::error();
    match GetDynamicPsm::decode(raw.as_bytes()) {
        Err(AltcomError::Remote(code)) => assert_eq!(code, 1),
        other => panic!("expected remote failure, got {:?}", other),
    }
}

#[test]
fn test_request_lengths_are_fixed() {
    assert_eq!(GetDynamicPsm::REQUEST_LEN, 0);
    assert_eq!(GetPsm::REQUEST_LEN, 1);
    assert_eq!(GetPsm::RESPONSE_LEN, 9);
    assert_eq!(MdDigestCommand::REQUEST_LEN, 8);
    assert_eq!(SetCrtSerial::REQUEST_LEN, 8);
    assert_eq!(SetCrtSerial::RESPONSE_LEN, 4);
}

#[test]
fn test_digest_request_round_trip_for_every_type() {
    for raw_type in 1u32..=9 {
        let md = MdType::try_from_primitive(raw_type).unwrap();
        for chain_id in [0u32, 1, 0x00FF_00FF, u32::MAX] {
            let cmd = MdDigestCommand { md, chain_id };
            let mut out = vec![0u8; MdDigestCommand::REQUEST_LEN];
            cmd.encode(&mut out);
            assert_eq!(MdDigestCommand::parse_request(&out).unwrap(), cmd);
        }
    }
}

#[test]
fn test_oversized_response_is_rejected_not_truncated() {
    let mut bytes = MdDigestResponseRaw::ok(&[1; 64]).as_bytes().to_vec();
    bytes.push(0);
    assert!(matches!(
        MdDigestCommand::decode(&bytes),
        Err(AltcomError::ProtocolMismatch { expected: 68, actual: 69 })
    ));
}

#[cfg(feature = "serde")]
#[test]
fn test_psm_setting_serializes() {
    let setting = PsmSetting::enabled(
        PsmTimer {
            unit: ActiveTimeUnit::Min1,
            value: 5,
        },
        PsmTimer {
            unit: TauUnit::Hour1,
            value: 12,
        },
    );
    let json = serde_json::to_string(&setting).unwrap();
    assert!(json.contains("\"Min1\""));
    let back: PsmSetting = serde_json::from_str(&json).unwrap();
    assert_eq!(back, setting);
}
