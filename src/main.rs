mod controller;
mod error;
mod govee;
mod sensibo;
mod settings;
mod temperature;

use error_stack::Result;
use rustop::opts;
use std::process::ExitCode;
use tracing::{debug, error};

use controller::{ControllerConfig, Outcome};
use error::ForceCoolingError;
use govee::GoveeClient;
use sensibo::SensiboClient;
use settings::Settings;

mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub fn get_version() -> String {
    format!(
        "{} (built {})",
        built_info::PKG_VERSION,
        built_info::BUILT_TIME_UTC
    )
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let (args, _) = opts! {
        synopsis "Turn on a Sensibo controlled AC when a Govee sensor reads above a threshold";
        opt config:String=String::from("config.ini"), desc: "Configuration file";
        opt dry_run:bool, desc: "Log the decision without changing the AC state";
    }
    .parse_or_exit();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                let app_name = env!("CARGO_PKG_NAME").replace('-', "_");
                format!("{app_name}=info").into()
            }),
        )
        .init();

    debug!("force_cooling {}", get_version());

    let result = force_cooling(&args.config, args.dry_run).await;

    if let Err(report) = &result {
        match report.current_context() {
            ForceCoolingError::DeviceNotFound(name) => error!("Device '{}' not found", name),
            _ => error!("Run failed: {:?}", report),
        }
    }

    ExitCode::from(exit_status(&result))
}

async fn force_cooling(config_path: &str, dry_run: bool) -> Result<Outcome, ForceCoolingError> {
    let settings = Settings::load(config_path)?;

    let sensor = GoveeClient::new(&settings.govee, &settings.http)?;
    let ac = SensiboClient::new(&settings.sensibo, &settings.http)?;

    controller::run(
        &ControllerConfig::from_settings(&settings, dry_run),
        &sensor,
        &ac,
    )
    .await
}

fn exit_status(result: &Result<Outcome, ForceCoolingError>) -> u8 {
    match result {
        Ok(_) => 0,
        Err(_) => 1,
    }
}
