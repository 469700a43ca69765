use std::error::Error;

use serde::Serialize;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use toggled::{
    cli::{Cli, Commands, parse_args},
    config::{Config, EventSourceConfig, load_config},
    service::Service,
};

fn main() -> Result<(), Box<dyn Error>> {
    let args = parse_args();
    init_logging(&args);

    match args.command {
        Commands::Run { config } => {
            let config = load_config(Some(config.as_str()))?;
            info!(
                "Loaded {} slot(s) from {}",
                config.slots.len(),
                config.project_root().display()
            );

            match Service::from_config(config).run() {
                Ok(report) if report.is_clean() => {}
                Ok(report) => {
                    error!(
                        "Some programs could not be stopped cleanly: {:?}",
                        report.failed
                    );
                }
                Err(err) => {
                    error!("Button service failed: {err}");
                    return Err(err.into());
                }
            }
        }
        Commands::Check { config, json } => {
            let config = load_config(Some(config.as_str()))?;
            print_slot_table(&config, json)?;
        }
    }

    Ok(())
}

fn init_logging(args: &Cli) {
    let filter = if let Some(level) = args.log_level {
        EnvFilter::new(level.as_str())
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

#[derive(Serialize)]
struct SlotRow {
    slot: usize,
    uid: String,
    program: String,
    command: Vec<String>,
}

fn print_slot_table(config: &Config, json: bool) -> Result<(), Box<dyn Error>> {
    let table = config.launch_table();
    let rows = config
        .slot_definitions()
        .into_iter()
        .map(|slot| {
            Ok(SlotRow {
                slot: slot.id(),
                uid: slot.binding().to_string(),
                program: slot.program().to_string(),
                command: table.command_for(slot.program())?,
            })
        })
        .collect::<Result<Vec<_>, std::io::Error>>()?;

    if json {
        println!("{}", serde_json::to_string_pretty(&rows)?);
        return Ok(());
    }

    let source = match &config.event_source {
        EventSourceConfig::Tcp { address } => format!("tcp {address}"),
        EventSourceConfig::Stdin => "stdin".to_string(),
    };
    println!("event source: {source}");
    println!("working dir:  {}", config.working_dir().display());
    println!("grace period: {:?}", config.grace_period()?);
    println!("{:<6} {:<10} COMMAND", "SLOT", "UID");
    for row in rows {
        println!("{:<6} {:<10} {}", row.slot, row.uid, row.command.join(" "));
    }

    Ok(())
}
