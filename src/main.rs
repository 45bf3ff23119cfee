use altcom_lib::digest::{MdDigestCommand, MdDigestResponseRaw, MdType};
use altcom_lib::loopback::LoopbackModem;
use altcom_lib::psm::{
    ActiveTimeUnit, DynamicPsmResponseRaw, GetPsm, GetPsmResponseRaw, PsmQuery, PsmSetting, PsmTimer, TauUnit,
};
use altcom_lib::x509::{CrtSerialResponseRaw, SetCrtSerial};
use altcom_lib::{Altcom, AltcomConfig, LogicalCommand, ModemStatus, ProtocolVersion, StatusBroadcaster};
use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand, ValueEnum};
use clap_verbosity_flag::{InfoLevel, Verbosity};
use std::fs::File;
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{Instrument, error, info, info_span, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};
use zerocopy::IntoBytes;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Protocol {
    V1,
    V4,
}

impl From<Protocol> for ProtocolVersion {
    fn from(p: Protocol) -> Self {
        match p {
            Protocol::V1 => ProtocolVersion::V1,
            Protocol::V4 => ProtocolVersion::V4,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Mode {
    /// Block until the response arrives
    Sync,
    /// Return once sent, deliver the result to a callback
    Async,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Md {
    Md5,
    Sha1,
    Sha224,
    Sha256,
    Sha384,
    Sha512,
    Ripemd160,
}

impl From<Md> for MdType {
    fn from(md: Md) -> Self {
        match md {
            Md::Md5 => MdType::Md5,
            Md::Sha1 => MdType::Sha1,
            Md::Sha224 => MdType::Sha224,
            Md::Sha256 => MdType::Sha256,
            Md::Sha384 => MdType::Sha384,
            Md::Sha512 => MdType::Sha512,
            Md::Ripemd160 => MdType::Ripemd160,
        }
    }
}

#[derive(Subcommand, Debug)]
enum Action {
    /// Query the PSM settings in force
    Psm {
        #[arg(short, long, value_enum, default_value = "sync")]
        mode: Mode,
    },
    /// Query the requested or negotiated PSM parameters (v4 only)
    GetPsm {
        /// Report the requested rather than the negotiated parameters
        #[arg(long)]
        requested: bool,
        #[arg(short, long, value_enum, default_value = "sync")]
        mode: Mode,
    },
    /// Digest a certificate chain on the modem
    Digest {
        #[arg(long, value_enum, default_value = "sha256")]
        md: Md,
        #[arg(long, default_value_t = 0)]
        chain_id: u32,
    },
    /// Set the serial of a certificate being written (v1 only)
    Serial {
        #[arg(long)]
        ctx_id: u32,
        #[arg(long)]
        serial_id: u32,
    },
    /// Issue an asynchronous PSM query and power the modem down before it is answered
    PowerLoss,
}

/// Drive the modem command client against an in-process loopback modem.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Protocol version the loopback modem negotiates.
    #[arg(short, long, value_enum, default_value = "v1")]
    protocol: Protocol,
    /// Timeout for synchronous requests in milliseconds.
    #[arg(short, long)]
    timeout_ms: Option<u64>,
    /// Simulated modem response latency in milliseconds.
    #[arg(long)]
    latency_ms: Option<u64>,
    /// Make every send fail with this transport code.
    #[arg(long, allow_hyphen_values = true)]
    fail_code: Option<i32>,
    /// Optional path to a file to write logs to, in addition to the console.
    #[arg(short, long)]
    log_file: Option<PathBuf>,
    #[command(flatten)]
    verbose: Verbosity<InfoLevel>,
    #[command(subcommand)]
    action: Action,
}

/// Console output goes to stderr so results stay pipeable. The file log adds
/// thread names, since response jobs run on runtime workers.
fn setup_logging(cli: &Cli) -> Result<Option<WorkerGuard>> {
    let filter = EnvFilter::builder()
        .with_default_directive(cli.verbose.tracing_level_filter().into())
        .from_env_lossy();

    let console = fmt::layer().compact().with_writer(std::io::stderr).without_time();

    let (file, guard) = match cli.log_file.as_deref() {
        Some(path) => {
            let sink = File::create(path).with_context(|| format!("cannot create log file {}", path.display()))?;
            let (writer, guard) = tracing_appender::non_blocking(sink);
            let layer = fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_thread_names(true);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry().with(filter).with(console).with(file).init();
    Ok(guard)
}

fn demo_psm() -> PsmSetting {
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

/// Canned answers for every command the loopback modem understands.
fn demo_modem(version: ProtocolVersion) -> LoopbackModem {
    let modem = LoopbackModem::new(version);
    let negotiated = demo_psm();

    modem.respond(LogicalCommand::GetDynamicPsm, move |_| {
        DynamicPsmResponseRaw::ok(negotiated).as_bytes().to_vec()
    });
    modem.respond(LogicalCommand::GetPsm, move |request| match GetPsm::parse_request(request) {
        Ok(GetPsm {
            query: PsmQuery::Negotiated,
        }) => GetPsmResponseRaw::ok(negotiated).as_bytes().to_vec(),
        Ok(GetPsm {
            query: PsmQuery::Requested,
        }) => GetPsmResponseRaw::ok(PsmSetting::disabled()).as_bytes().to_vec(),
        Err(_) => GetPsmResponseRaw::error(-22).as_bytes().to_vec(),
    });
    modem.respond(LogicalCommand::MdDigest, |request| match MdDigestCommand::parse_request(request) {
        Ok(cmd) => {
            // Deterministic stand-in digest derived from the request.
            let seed = cmd.chain_id.to_be_bytes();
            let output: Vec<u8> = (0..64u8).map(|i| i ^ seed[usize::from(i % 4)]).collect();
            MdDigestResponseRaw::ok(&output).as_bytes().to_vec()
        }
        Err(_) => MdDigestResponseRaw::error(-0x5100).as_bytes().to_vec(),
    });
    modem.respond(LogicalCommand::X509WriteCrtSerial, |request| {
        let code = match SetCrtSerial::parse_request(request) {
            Ok(cmd) if cmd.ctx_id != 0 => 0,
            _ => -0x2800,
        };
        CrtSerialResponseRaw::new(code).as_bytes().to_vec()
    });
    modem
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let _guard = setup_logging(&cli)?;

    let span = info_span!("modem", protocol = %ProtocolVersion::from(cli.protocol));
    if let Err(e) = run(cli).instrument(span).await {
        error!("Command failed: {:?}", e);
        process::exit(1);
    }
    Ok(())
}

async fn run(cli: Cli) -> Result<()> {
    let version = ProtocolVersion::from(cli.protocol);
    let modem = Arc::new(demo_modem(version));
    modem.set_latency(cli.latency_ms.map(Duration::from_millis));
    modem.fail_sends(cli.fail_code);
    let status = Arc::new(StatusBroadcaster::new(ModemStatus::PowerOn));

    let mut config = AltcomConfig::new();
    if let Some(ms) = cli.timeout_ms {
        config = config.with_timeout(Duration::from_millis(ms));
    }
    let client = Altcom::new(modem.clone(), status.clone(), config)?;
    modem.attach(&client.response_sink());
    info!("Loopback modem ready");

    match cli.action {
        Action::Psm { mode: Mode::Sync } => {
            let settings = client.get_current_psm_sync().await?;
            info!("{}", settings);
        }
        Action::Psm { mode: Mode::Async } => {
            let (tx, rx) = oneshot::channel();
            client
                .get_current_psm(Box::new(move |result| {
                    let _ = tx.send(result);
                }))
                .await?;
            info!("Request sent, waiting for callback");
            let settings = rx.await.context("callback dropped")??;
            info!("{}", settings);
        }
        Action::GetPsm { requested, mode } => {
            let query = if requested {
                PsmQuery::Requested
            } else {
                PsmQuery::Negotiated
            };
            if mode == Mode::Sync {
                let mut settings = PsmSetting::default();
                client.get_psm(query, Some(&mut settings), None).await?;
                info!(%query, "{}", settings);
            } else {
                let (tx, rx) = oneshot::channel();
                client
                    .get_psm(
                        query,
                        None,
                        Some(Box::new(move |result| {
                            let _ = tx.send(result);
                        })),
                    )
                    .await?;
                let settings = rx.await.context("callback dropped")??;
                info!(%query, "{}", settings);
            }
        }
        Action::Digest { md, chain_id } => {
            let digest = client.md_digest(md.into(), chain_id).await?;
            info!(md = %digest.md(), chain_id, "Digest: {}", digest.to_hex());
        }
        Action::Serial { ctx_id, serial_id } => {
            client.x509write_crt_set_serial(ctx_id, serial_id).await?;
            info!(ctx_id, serial_id, "Certificate serial set");
        }
        Action::PowerLoss => power_loss(&client, &modem, &status).await?,
    }
    Ok(())
}

async fn power_loss(client: &Altcom<LoopbackModem>, modem: &LoopbackModem, status: &StatusBroadcaster) -> Result<()> {
    modem.hold_responses(true);
    let (tx, rx) = oneshot::channel();
    client
        .get_current_psm(Box::new(move |result| {
            let _ = tx.send(result);
        }))
        .await?;
    info!(pending = client.registry().len(), "Request in flight");

    status.set_status(ModemStatus::Initialized);
    info!(
        pending = client.registry().len(),
        observers = status.observer_count(),
        "Modem powered down"
    );

    let outcomes = modem.flush();
    info!(?outcomes, "Late response delivered");

    match tokio::time::timeout(Duration::from_millis(100), rx).await {
        Ok(Ok(result)) => bail!("callback invoked after power loss: {:?}", result),
        Ok(Err(_)) => info!("Callback discarded without being invoked"),
        Err(_) => warn!("Callback still alive after power loss"),
    }
    info!(live_buffers = modem.pool().live(), "Done");
    Ok(())
}
