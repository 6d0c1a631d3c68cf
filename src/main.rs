pub mod models {
    pub mod ems;
}

pub mod engine {
    pub mod codec;
    pub mod mask;
    pub mod schedule_flags;
    pub mod store;
    pub mod tracker;
}

pub mod client;
pub mod config;
pub mod utils;
pub mod validate;
pub mod services {
    pub mod custom_entities;
    pub mod customizations;
    pub mod modules;
    pub mod poll;
    pub mod scheduler;
    pub mod session;
    #[cfg(test)]
    pub mod testing;
}

use crate::client::{Gateway, GatewayClient};
use crate::config::Config;
use crate::models::ems::{DeviceId, EntityMask};
use crate::services::custom_entities::CustomEntitySession;
use crate::services::customizations::{CustomizationSession, EntityFilter, reset_customizations};
use crate::services::modules::ModuleSession;
use crate::services::poll::{self, PolledView};
use crate::services::scheduler::ScheduleSession;
use crate::services::session::SaveOutcome;
use crate::utils::{entity_display_name, mask_flags, parse_mask_flags, schedule_when};
use log::{error, info};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

const USAGE: &str = "usage: ems-console [--env-file <path>] <command>

commands:
  devices                              list devices known to the gateway
  entities <device>                    list entities of a device with their flags
  hide <device> [search]               hide matching entities from web and API/MQTT
  show <device> [search]               undo `hide` for matching entities
  mask <device> <entity> <flag,...>    set the customization flags of one entity
  reset-customizations                 drop all customizations (gateway restarts)
  schedule                             list the scheduler entries
  watch                                keep the schedule refreshed until Ctrl-C
  custom-entities                      list custom entities
  modules                              list installed modules";

#[derive(Debug)]
struct LoadedEnvFile {
    path: PathBuf,
    explicit: bool,
}

#[derive(Debug, Clone, PartialEq)]
enum Command {
    Help,
    Devices,
    Entities(DeviceId),
    Visibility {
        device: DeviceId,
        search: Option<String>,
        hidden: bool,
    },
    Mask {
        device: DeviceId,
        entity: String,
        mask: EntityMask,
    },
    ResetCustomizations,
    Schedule,
    Watch,
    CustomEntities,
    Modules,
}

#[derive(Debug, PartialEq)]
struct Cli {
    env_file: Option<PathBuf>,
    command: Command,
}

fn parse_device(arg: Option<&String>) -> Result<DeviceId, String> {
    let raw = arg.ok_or_else(|| "missing <device> argument".to_string())?;
    raw.parse::<u32>()
        .map(DeviceId)
        .map_err(|_| format!("device must be a numeric id, got {}", raw))
}

fn parse_command(words: &[String]) -> Result<Command, String> {
    let Some((name, rest)) = words.split_first() else {
        return Ok(Command::Help);
    };
    let command = match name.as_str() {
        "help" => Command::Help,
        "devices" => Command::Devices,
        "entities" => Command::Entities(parse_device(rest.first())?),
        "hide" | "show" => Command::Visibility {
            device: parse_device(rest.first())?,
            search: rest.get(1).cloned(),
            hidden: name == "hide",
        },
        "mask" => {
            let device = parse_device(rest.first())?;
            let entity = rest.get(1).ok_or_else(|| "missing <entity> argument".to_string())?;
            let flags = rest.get(2).ok_or_else(|| "missing <flag,...> argument".to_string())?;
            Command::Mask {
                device,
                entity: entity.clone(),
                mask: parse_mask_flags(flags)?,
            }
        }
        "reset-customizations" => Command::ResetCustomizations,
        "schedule" => Command::Schedule,
        "watch" => Command::Watch,
        "custom-entities" => Command::CustomEntities,
        "modules" => Command::Modules,
        other => return Err(format!("unknown command: {}\n\n{}", other, USAGE)),
    };

    let max_args = match command {
        Command::Entities(_) => 2,
        Command::Visibility { .. } => 3,
        Command::Mask { .. } => 4,
        _ => 1,
    };
    if words.len() > max_args {
        return Err(format!("too many arguments for `{}`", name));
    }
    Ok(command)
}

fn parse_cli<I: IntoIterator<Item = String>>(args: I) -> Result<Cli, String> {
    let mut args = args.into_iter();
    let mut env_file: Option<PathBuf> = None;
    let mut words: Vec<String> = Vec::new();

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--env-file" => {
                if env_file.is_some() {
                    return Err("`--env-file` provided more than once".to_string());
                }
                let value = args
                    .next()
                    .ok_or_else(|| "`--env-file` requires a path argument".to_string())?;
                env_file = Some(PathBuf::from(value));
            }
            s if s.starts_with("--env-file=") => {
                if env_file.is_some() {
                    return Err("`--env-file` provided more than once".to_string());
                }
                let path_str = &s["--env-file=".len()..];
                if path_str.is_empty() {
                    return Err("`--env-file` requires a path argument".to_string());
                }
                env_file = Some(PathBuf::from(path_str));
            }
            "-h" | "--help" => words.push("help".to_string()),
            "--" => {
                words.extend(args.by_ref());
                break;
            }
            s if s.starts_with("--") => return Err(format!("unrecognised argument: {}", s)),
            _ => words.push(arg),
        }
    }

    Ok(Cli {
        env_file,
        command: parse_command(&words)?,
    })
}

fn load_env_file(path: &Path) -> Result<(), String> {
    // Variables already present in the process environment are kept.
    dotenv::from_path(path).map_err(|e| format!("failed to load {}: {}", path.display(), e))
}

fn configure_env(env_file: Option<PathBuf>) -> Result<Option<LoadedEnvFile>, String> {
    if let Some(path) = env_file {
        if !path.is_file() {
            return Err(format!("env file not found: {}", path.display()));
        }
        load_env_file(&path)?;
        Ok(Some(LoadedEnvFile { path, explicit: true }))
    } else {
        let cwd = std::env::current_dir().map_err(|e| format!("unable to read current directory: {}", e))?;
        let default_path = cwd.join(".env");
        if default_path.is_file() {
            load_env_file(&default_path)?;
            Ok(Some(LoadedEnvFile {
                path: default_path,
                explicit: false,
            }))
        } else {
            Ok(None)
        }
    }
}

fn value_text(v: Option<&Value>) -> String {
    match v {
        None | Some(Value::Null) => "-".to_string(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

fn report(what: &str, outcome: SaveOutcome) {
    match outcome {
        SaveOutcome::NothingToSave => println!("{}: nothing to save", what),
        SaveOutcome::Saved { records } => println!("{}: saved {} change(s)", what, records),
        SaveOutcome::RestartRequired { records } => {
            println!("{}: saved {} change(s); restart the gateway to apply them", what, records)
        }
    }
}

fn list_devices(gateway: &dyn Gateway) -> Result<(), String> {
    let core = gateway.core_data().map_err(|e| format!("reading devices failed: {}", e))?;
    if !core.connected {
        info!("Gateway reports no EMS bus connection");
    }
    for d in &core.devices {
        println!(
            "{:>3}  {:<12} {:<24} {:>4} entities{}",
            d.id.0,
            d.type_name,
            d.name,
            d.entity_count,
            if d.is_customizable() { "" } else { "  (not customizable)" }
        );
    }
    Ok(())
}

fn list_entities(gateway: &dyn Gateway, device: DeviceId) -> Result<(), String> {
    let session = CustomizationSession::open(gateway, device).map_err(|e| e.to_string())?;
    for t in session.entities() {
        let de = &t.current;
        println!(
            "{:<48} {:<12} {}",
            entity_display_name(de, true),
            value_text(de.value.as_ref()),
            mask_flags(de.mask)
        );
    }
    Ok(())
}

fn list_schedule(session: &ScheduleSession) {
    for e in session.entries() {
        println!(
            "{:>4} {} {:<20} {:<40} {} {}",
            e.id,
            if e.active { "on " } else { "off" },
            if e.name.is_empty() { "-" } else { e.name.as_str() },
            schedule_when(e.kind, &e.time),
            e.cmd,
            e.value
        );
    }
}

fn watch_schedule(gateway: &dyn Gateway, cfg: &Config) -> Result<(), String> {
    let mut session = ScheduleSession::load(gateway).map_err(|e| e.to_string())?;
    list_schedule(&session);

    let cancel = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&cancel);
    ctrlc::set_handler(move || flag.store(true, Ordering::SeqCst))
        .map_err(|e| format!("installing Ctrl-C handler failed: {}", e))?;

    info!("Watching schedule every {}s; Ctrl-C to stop", cfg.poll_interval.as_secs());
    poll::run_loop(&mut session, gateway, cfg.poll_interval, &cancel, |view: &dyn PolledView| {
        info!("Refreshed {}", view.name())
    })?;
    list_schedule(&session);
    info!("Watch stopped");
    Ok(())
}

fn run(command: Command) -> Result<(), String> {
    if command == Command::Help {
        println!("{}", USAGE);
        return Ok(());
    }

    let cfg = Config::from_env()?;
    info!(
        "Config loaded (gateway={}, token={}, poll_interval={}s, request_timeout={}s)",
        cfg.gateway_url,
        if cfg.access_token.is_some() { "set" } else { "-" },
        cfg.poll_interval.as_secs(),
        cfg.request_timeout.as_secs()
    );
    let client = GatewayClient::new(cfg.gateway_url.clone(), cfg.access_token.clone(), cfg.request_timeout);

    match command {
        Command::Help => Ok(()),
        Command::Devices => list_devices(&client),
        Command::Entities(device) => list_entities(&client, device),
        Command::Visibility { device, search, hidden } => {
            let mut session = CustomizationSession::open(&client, device).map_err(|e| e.to_string())?;
            let filter = EntityFilter::search(search.unwrap_or_default());
            let touched = session.set_visibility(&filter, hidden);
            info!(
                "{} {} entities on device {}; {} changed",
                if hidden { "Hiding" } else { "Showing" },
                touched,
                device.0,
                session.dirty_count()
            );
            let outcome = session.save(&client).map_err(|e| e.to_string())?;
            report("customizations", outcome);
            Ok(())
        }
        Command::Mask { device, entity, mask } => {
            let mut session = CustomizationSession::open(&client, device).map_err(|e| e.to_string())?;
            let stored = session.edit_mask(&entity, mask).map_err(|e| e.to_string())?;
            if stored != mask {
                info!("Requested flags {} adjusted to {}", mask_flags(mask), mask_flags(stored));
            }
            let outcome = session.save(&client).map_err(|e| e.to_string())?;
            report("customizations", outcome);
            Ok(())
        }
        Command::ResetCustomizations => {
            reset_customizations(&client).map_err(|e| e.to_string())?;
            println!("customizations reset; the gateway is restarting");
            Ok(())
        }
        Command::Schedule => {
            let session = ScheduleSession::load(&client).map_err(|e| e.to_string())?;
            list_schedule(&session);
            Ok(())
        }
        Command::Watch => watch_schedule(&client, &cfg),
        Command::CustomEntities => {
            let session = CustomEntitySession::load(&client).map_err(|e| e.to_string())?;
            for e in session.entities() {
                println!(
                    "{:>3} {:<20} device={} type={} offset={} {}{}",
                    e.id,
                    e.name,
                    e.device_id,
                    e.type_id,
                    e.offset,
                    value_text(e.value.as_ref()),
                    if e.ram == 1 { "  (ram)" } else { "" }
                );
            }
            Ok(())
        }
        Command::Modules => {
            let session = ModuleSession::load(&client).map_err(|e| e.to_string())?;
            for m in session.modules() {
                println!(
                    "{:<20} {:<10} {:<8} {}{}",
                    m.key,
                    m.version,
                    if m.enabled { "enabled" } else { "disabled" },
                    m.message,
                    if m.license.is_empty() { "" } else { "  (licensed)" }
                );
            }
            Ok(())
        }
    }
}

fn main() {
    let cli = std::env::args_os()
        .skip(1) // program name
        .map(|a| a.into_string().map_err(|_| "argument contains invalid UTF-8".to_string()))
        .collect::<Result<Vec<String>, String>>()
        .and_then(parse_cli);
    let cli = match cli {
        Ok(cli) => cli,
        Err(err) => {
            eprintln!("fatal: {}", err);
            std::process::exit(1);
        }
    };
    let loaded_env = match configure_env(cli.env_file) {
        Ok(info) => info,
        Err(err) => {
            eprintln!("fatal: {}", err);
            std::process::exit(1);
        }
    };

    // Init logging after environment so RUST_LOG from .env is respected.
    let default_filter = env_logger::Env::default().default_filter_or("info");
    env_logger::Builder::from_env(default_filter)
        .format_timestamp_secs()
        .init();

    if let Some(info) = loaded_env.as_ref() {
        let origin = if info.explicit { "CLI-specified" } else { "default" };
        info!("Environment loaded from {} .env file: {}", origin, info.path.display());
    }

    info!(
        "ems-console {} (git {}) starting",
        env!("CARGO_PKG_VERSION"),
        env!("BUILD_TIME_GIT_HASH")
    );
    if let Err(e) = run(cli.command) {
        error!("fatal: {}", e);
        std::process::exit(1);
    }
}
