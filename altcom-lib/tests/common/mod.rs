//! Common test utilities and shared imports

// Allow unused imports and dead code since this is a shared module
// used across multiple test files - not all items are used in every test file
#[allow(unused_imports)]
pub use altcom_lib::loopback::LoopbackModem;
#[allow(unused_imports)]
pub use altcom_lib::psm::{ActiveTimeUnit, DynamicPsmResponseRaw, GetPsmResponseRaw, PsmSetting, PsmTimer, TauUnit};
#[allow(unused_imports)]
pub use altcom_lib::{
    Altcom, AltcomConfig, AltcomError, LogicalCommand, ModemStatus, ProtocolVersion, StatusBroadcaster,
    StatusNotifier,
};
#[allow(unused_imports)]
pub use std::sync::Arc;
#[allow(unused_imports)]
pub use std::time::Duration;
#[allow(unused_imports)]
pub use zerocopy::IntoBytes;

#[allow(dead_code)]
pub struct Harness {
    pub client: Altcom<LoopbackModem>,
    pub modem: Arc<LoopbackModem>,
    pub status: Arc<StatusBroadcaster>,
}

/// Client wired to a powered-on loopback modem speaking `version`.
#[allow(dead_code)]
pub fn harness(version: ProtocolVersion) -> Harness {
    harness_with(LoopbackModem::new(version), AltcomConfig::new())
}

#[allow(dead_code)]
pub fn harness_with(modem: LoopbackModem, config: AltcomConfig) -> Harness {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();

    let modem = Arc::new(modem);
    let status = Arc::new(StatusBroadcaster::new(ModemStatus::PowerOn));
    let client = Altcom::new(modem.clone(), status.clone(), config).expect("client");
    modem.attach(&client.response_sink());
    Harness { client, modem, status }
}

/// PSM settings used as the modem's canned answer
#[allow(dead_code)]
pub fn sample_psm() -> PsmSetting {
    PsmSetting::enabled(
        PsmTimer {
            unit: ActiveTimeUnit::Min6,
            value: 10,
        },
        PsmTimer {
            unit: TauUnit::Hour10,
            value: 3,
        },
    )
}

/// Answer PSM queries the way a v1 modem does
#[allow(dead_code)]
pub fn answer_dynamic_psm(modem: &LoopbackModem, setting: PsmSetting) {
    modem.respond(LogicalCommand::GetDynamicPsm, move |_| {
        DynamicPsmResponseRaw::ok(setting).as_bytes().to_vec()
    });
}

/// Give spawned delivery tasks and response jobs a chance to run.
#[allow(dead_code)]
pub async fn settle() {
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
    tokio::time::sleep(Duration::from_millis(10)).await;
}
