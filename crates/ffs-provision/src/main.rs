//! `ffs-provision` command line entry point.
//!
//! Typical flow on the line:
//! 1. `ffs-provision gen-json --port <PORT>` builds `provision.json` from
//!    `metadata.json` and the kit serial.
//! 2. `ffs-provision --port <PORT> provision -x provision.json`
//! 3. `ffs-provision --port <PORT> get-csr` writes `csr.pem` for signing.
//! 4. `ffs-provision --port <PORT> set-cert -f <signed-cert.pem>`

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use ffs_provision::config::DEFAULT_SLOW_DELAY_MS;
use ffs_provision::device_info::{self, DeviceInfo};
use ffs_provision::telemetry::describe_metrics;
use ffs_provision::transport::SerialLineReader;
use ffs_provision::{ProvisionError, ProvisioningSession, Result, SerialConfig, SerialTransport, SessionConfig, WriteMode};

/// Provision FFS device identity over the serial shell.
#[derive(Parser)]
#[command(name = "ffs-provision")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Serial port the device shell is on, e.g. /dev/ttyACM0 or COM3
    #[arg(short, long, global = true)]
    port: Option<String>,

    /// Write speed. Use slow if the device drops bytes.
    #[arg(short, long, value_enum, default_value_t = Speed::Normal, global = true)]
    speed: Speed,

    /// Delay between bytes in slow mode, in milliseconds
    #[arg(long, default_value_t = DEFAULT_SLOW_DELAY_MS, global = true,
          value_parser = clap::value_parser!(u64).range(1..1000))]
    delay_ms: u64,

    /// More output (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Speed {
    Normal,
    Slow,
}

#[derive(Subcommand)]
enum Commands {
    /// Write the device info from a provisioning JSON file
    Provision {
        /// Provisioning JSON file
        #[arg(short = 'x', long)]
        device_info: PathBuf,
    },

    /// Generate the device key pair and save its CSR as csr.pem
    GetCsr {
        /// Directory to write csr.pem to
        #[arg(short, long, default_value = ".")]
        out_dir: PathBuf,
    },

    /// Upload a signed certificate chain
    #[command(alias = "save-cert")]
    SetCert {
        /// PEM file with the certificate chain
        #[arg(short = 'f', long)]
        cert_file: PathBuf,
    },

    /// Read the installed certificate chain and save it as cert.pem
    GetCert {
        /// Directory to write cert.pem to
        #[arg(short, long, default_value = ".")]
        out_dir: PathBuf,
    },

    /// Build provision.json from product metadata and the kit serial
    GenJson {
        /// Base64 kit serial including '=' padding. Read from --port if omitted.
        serial: Option<String>,

        /// Product metadata JSON file
        #[arg(long, default_value = "metadata.json")]
        meta: PathBuf,

        /// Provisioning JSON file to write
        #[arg(long, default_value = "provision.json")]
        prov: PathBuf,
    },

    /// Print the kit serial number
    ReadSerial,
}

const SERIAL_READ_TIMEOUT: Duration = Duration::from_secs(1);

fn init_tracing(verbose: u8) {
    let default_level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

fn session_config(cli: &Cli) -> SessionConfig {
    let write_mode = match cli.speed {
        Speed::Normal => WriteMode::Normal,
        Speed::Slow => WriteMode::Slow {
            delay_ms: cli.delay_ms,
        },
    };
    SessionConfig {
        write_mode,
        ..SessionConfig::default()
    }
}

type SerialSession = ProvisioningSession<SerialLineReader, Box<dyn serialport::SerialPort>>;

fn open_session(cli: &Cli) -> Result<SerialSession> {
    let port = cli.port.as_deref().ok_or_else(|| {
        ProvisionError::Serial(serialport::Error::new(
            serialport::ErrorKind::InvalidInput,
            "no serial port given (use --port)",
        ))
    })?;
    let transport = SerialTransport::open(&SerialConfig::new(port))?;
    Ok(ProvisioningSession::new(transport, session_config(cli)))
}

fn gen_json(meta: &Path, serial: &str, prov: &Path) -> Result<bool> {
    device_info::write_provision_json(meta, serial, prov)?;
    info!("SUCCESS, JSON data for provisioning is in file: '{}'", prov.display());
    Ok(true)
}

fn run(cli: &Cli) -> Result<bool> {
    // A serial given on the command line needs no device.
    if let Commands::GenJson {
        serial: Some(serial),
        meta,
        prov,
    } = &cli.command
    {
        return gen_json(meta, serial, prov);
    }

    let mut session = open_session(cli)?;
    let ok = match &cli.command {
        Commands::Provision { device_info } => {
            info!(">>>>>>>>>>>>>>> Parsing Device Info Start");
            let info = DeviceInfo::load(device_info)?;
            info!(">>>>>>>>>>>>>>> Parsing Device Info Succeed");
            session.set_device_info(&info)?
        }
        Commands::GetCsr { out_dir } => session.save_csr(out_dir)?.is_some(),
        Commands::SetCert { cert_file } => session.set_cert_from_file(cert_file)?,
        Commands::GetCert { out_dir } => {
            session.save_cert(out_dir)?;
            true
        }
        Commands::ReadSerial => match session.read_serial_number(SERIAL_READ_TIMEOUT)? {
            Some(serial) => {
                println!("{}", serial);
                true
            }
            None => {
                error!("No serial number received");
                false
            }
        },
        Commands::GenJson { meta, prov, .. } => match session.read_serial_number(SERIAL_READ_TIMEOUT)? {
            Some(serial) => gen_json(meta, &serial, prov)?,
            None => {
                error!("Unable to read serial string from device");
                false
            }
        },
    };

    session.into_transport().close()?;
    Ok(ok)
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    describe_metrics();

    match run(&cli) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}
