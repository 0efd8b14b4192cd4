// Point of No Return demo (copter only)
//
// Arms the vehicle, takes off and flies away. When the battery and the distance from home reach the point of no
// return the vehicle is switched to RTL. Connects to SITL on the local machine by default.

use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use pnr::mission::{MissionConfig, MissionDriver};
use pnr::Vehicle;

#[derive(Parser, Debug)]
#[command(version, about = "Fly the PNR demo mission and return to launch at the point of no return")]
struct Args {
    /// Vehicle connection target
    #[arg(long, default_value = "127.0.0.1:14550")]
    connect: String,

    /// Give up if the vehicle is not armable, armed or at takeoff altitude after this many seconds (0 waits forever)
    #[arg(long, value_name = "SECS", default_value_t = 300)]
    ready_timeout: u64,
}

async fn fly(args: Args) -> pnr::Result<()> {
    let vehicle = Vehicle::connect(&args.connect).await?;

    let config = MissionConfig {
        ready_timeout: (args.ready_timeout > 0).then(|| Duration::from_secs(args.ready_timeout)),
        ..Default::default()
    };
    MissionDriver::new(Arc::new(vehicle), config).run().await?;
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    match fly(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("{}", e);
            ExitCode::FAILURE
        }
    }
}
