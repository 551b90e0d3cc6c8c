mod broken;
mod client;
mod config;
mod model;
mod nbsp;
mod replace;
mod zones;

use crate::client::HubClient;
use crate::config::{HubConfig, Scope, resolve, save};
use crate::model::CardKind;
use crate::nbsp::{Tally, kind_index};
use crate::replace::IdMapping;
use anyhow::{Context, Result};
use clap::{CommandFactory, Parser, Subcommand, ValueEnum};
use serde::Serialize;
use serde_json::json;
use std::collections::HashSet;
use std::path::PathBuf;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(
    name = "homeyctl",
    version,
    about = "Inspect and repair flows, devices and variables on a Homey hub"
)]
struct Cli {
    #[arg(
        long,
        global = true,
        value_name = "URL",
        help = "Hub address override for this invocation (otherwise read from config)"
    )]
    address: Option<String>,

    #[arg(
        long,
        global = true,
        help = "API token override for this invocation (otherwise read from config)"
    )]
    token: Option<String>,

    #[arg(
        long,
        short = 'o',
        value_enum,
        default_value_t = OutputFormat::Pretty,
        global = true,
        help = "Output format (propagates to subcommands)"
    )]
    output: OutputFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Persist the hub address and token to the chosen scope
    Configure {
        #[arg(long, value_name = "URL")]
        address: String,
        #[arg(long)]
        token: String,
        #[arg(
            long,
            default_value_t = false,
            help = "Enable TLS verification (the hub's local certificate is self-signed)"
        )]
        verify_tls: bool,
        #[arg(
            long,
            value_enum,
            default_value_t = ScopeArg::User,
            help = "Where to write the config (local project dir or user config dir)"
        )]
        scope: ScopeArg,
    },
    /// Show current configuration (token masked)
    ConfigShow,
    /// Print every zone with its devices as an indented tree
    Devices,
    /// Dump all flows as JSON
    Flows,
    /// Dump all advanced flows as JSON
    AdvancedFlows,
    /// Dump all logic variables as JSON
    Variables,
    /// List flows whose cards or tokens no longer exist
    BrokenFlows {
        #[arg(
            long,
            default_value_t = broken::DEFAULT_JOBS,
            help = "Number of flows checked at the same time"
        )]
        jobs: usize,
        #[arg(
            long,
            help = "Do not load global flow tokens (every global token reference is reported)"
        )]
        no_global_tokens: bool,
    },
    /// Replace non-breaking spaces in device, variable and flow names
    NoNbsp {
        #[arg(long, help = "Write the changes to the hub (default only shows them)")]
        apply: bool,
    },
    /// Point flows at a new device after it was re-paired
    ReplaceDevice {
        #[arg(
            long = "map",
            value_name = "OLD=NEW",
            help = "Old and new device id; repeat for several devices"
        )]
        map: Vec<String>,
        #[arg(
            long,
            value_name = "FILE",
            help = "YAML file mapping old device ids to new ones"
        )]
        map_file: Option<PathBuf>,
        #[arg(long, help = "Write the changes to the hub (default only shows them)")]
        apply: bool,
    },
    /// Generate shell completion scripts
    Completion {
        #[arg(value_enum)]
        shell: CompletionShell,
    },
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum OutputFormat {
    Pretty,
    Json,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum CompletionShell {
    Bash,
    Zsh,
    Fish,
    PowerShell,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum ScopeArg {
    Local,
    User,
}

impl From<ScopeArg> for Scope {
    fn from(value: ScopeArg) -> Self {
        match value {
            ScopeArg::Local => Scope::Local,
            ScopeArg::User => Scope::User,
        }
    }
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let cwd = std::env::current_dir().context("reading current directory")?;

    match &cli.command {
        Commands::Configure {
            address,
            token,
            verify_tls,
            scope,
        } => {
            let mut existing = config::load_scope((*scope).into(), &cwd)?;
            existing.hub = Some(HubConfig {
                address: Some(address.clone()),
                token: Some(token.clone()),
                verify_tls: *verify_tls,
            });
            let path = save((*scope).into(), &existing, &cwd)?;
            println!("Saved hub credentials to {}", path.display());
            return Ok(());
        }
        Commands::ConfigShow => {
            let mut masked = config::load(&cwd)?;
            if let Some(hub) = masked.hub.as_mut()
                && hub.token.is_some()
            {
                hub.token = Some("*****".into());
            }
            println!("{}", serde_json::to_string_pretty(&masked)?);
            return Ok(());
        }
        Commands::Completion { shell } => {
            use clap_complete::{generate, shells};
            let mut cmd = Cli::command();
            let bin = cmd.get_name().to_string();
            let out = &mut std::io::stdout();
            match shell {
                CompletionShell::Bash => generate(shells::Bash, &mut cmd, bin, out),
                CompletionShell::Zsh => generate(shells::Zsh, &mut cmd, bin, out),
                CompletionShell::Fish => generate(shells::Fish, &mut cmd, bin, out),
                CompletionShell::PowerShell => generate(shells::PowerShell, &mut cmd, bin, out),
            }
            return Ok(());
        }
        _ => {}
    }

    let overrides = (cli.address.is_some() || cli.token.is_some()).then(|| HubConfig {
        address: cli.address.clone(),
        token: cli.token.clone(),
        verify_tls: false,
    });
    let effective = resolve(&cwd, overrides)?;
    let client = HubClient::new(&effective.address, &effective.token, effective.verify_tls)?;
    tracing::debug!(address = %effective.address, "connecting to hub");

    match cli.command {
        Commands::Devices => run_devices(&client, cli.output),
        Commands::Flows => run_dump(&client, "api/manager/flow/flow/", cli.output),
        Commands::AdvancedFlows => run_dump(&client, "api/manager/flow/advancedflow/", cli.output),
        Commands::Variables => run_dump(&client, "api/manager/logic/variable/", cli.output),
        Commands::BrokenFlows {
            jobs,
            no_global_tokens,
        } => run_broken_flows(&client, jobs, no_global_tokens, cli.output),
        Commands::NoNbsp { apply } => run_no_nbsp(&client, apply),
        Commands::ReplaceDevice {
            map,
            map_file,
            apply,
        } => {
            let mut mapping = IdMapping::default();
            if let Some(path) = &map_file {
                mapping.load_file(path)?;
            }
            for pair in &map {
                mapping.insert_arg(pair)?;
            }
            mapping.ensure_non_empty()?;
            run_replace_device(&client, &mapping, apply)
        }
        Commands::Configure { .. } | Commands::ConfigShow | Commands::Completion { .. } => {
            unreachable!("handled earlier")
        }
    }
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "homeyctl=info".into()))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn print_json<T: Serialize + ?Sized>(value: &T, output: OutputFormat) -> Result<()> {
    let rendered = match output {
        OutputFormat::Pretty => serde_json::to_string_pretty(value)?,
        OutputFormat::Json => serde_json::to_string(value)?,
    };
    println!("{}", rendered);
    Ok(())
}

fn run_dump(client: &HubClient, path: &str, output: OutputFormat) -> Result<()> {
    let listing = client.get_raw(path)?;
    print_json(&listing, output)
}

fn run_devices(client: &HubClient, output: OutputFormat) -> Result<()> {
    if let OutputFormat::Json = output {
        return run_dump(client, "api/manager/devices/device/", output);
    }
    let devices = client.get_devices()?;
    let all_zones = client.get_zones()?;
    let tree = zones::build_tree(&all_zones, &devices)?;
    print!("{}", zones::render(&tree));
    Ok(())
}

fn run_broken_flows(
    client: &HubClient,
    jobs: usize,
    no_global_tokens: bool,
    output: OutputFormat,
) -> Result<()> {
    let flows: Vec<_> = client.get_flows()?.into_values().collect();
    let global: HashSet<String> = if no_global_tokens {
        HashSet::new()
    } else {
        client.get_flow_tokens()?.into_keys().collect()
    };
    tracing::info!(
        flows = flows.len(),
        global_tokens = global.len(),
        jobs,
        "checking flows"
    );

    let total = flows.len();
    let broken = broken::find_broken(flows, client, &global, jobs)?;
    let summary = format!("{} of {} flows are broken", broken.len(), total);
    match output {
        OutputFormat::Pretty => println!("{}", summary),
        // stdout stays parseable
        OutputFormat::Json => eprintln!("{}", summary),
    }
    print_json(&broken, output)
}

fn run_no_nbsp(client: &HubClient, apply: bool) -> Result<()> {
    println!("Devices:");
    let devices = client.get_devices()?;
    let renames = nbsp::renames(devices.values().map(|d| (d.id.as_str(), d.name.as_str())));
    for rename in &renames {
        println!("Device {}: {} -> {}", rename.id, rename.old, rename.new);
        if apply {
            write_back("device", &rename.id, || {
                client.update_device(&rename.id, &json!({ "name": rename.new }))
            });
        }
    }
    println!(
        "{} devices changed",
        Tally {
            changed: renames.len(),
            total: devices.len()
        }
    );

    println!("Variables:");
    let variables = client.get_variables()?;
    let renames = nbsp::renames(
        variables
            .values()
            .map(|v| (v.id.as_str(), v.name.as_str())),
    );
    for rename in &renames {
        println!("Variable {}: {} -> {}", rename.id, rename.old, rename.new);
        if apply {
            write_back("variable", &rename.id, || {
                client.update_variable(&rename.id, &json!({ "name": rename.new }))
            });
        }
    }
    println!(
        "{} variables changed",
        Tally {
            changed: renames.len(),
            total: variables.len()
        }
    );

    println!("Flows:");
    let flows = client.get_flows()?;
    let total = flows.len();
    let mut names = Tally {
        changed: 0,
        total,
    };
    let mut cards = [Tally::default(); 3];
    for mut flow in flows.into_values() {
        let scan = nbsp::normalize_flow(&mut flow);
        if let Some(rename) = &scan.name {
            println!("Flow {}: {} -> {}", rename.id, rename.old, rename.new);
            names.changed += 1;
        }
        for fix in &scan.fixes {
            println!("{}", fix.describe(&flow.name));
            cards[kind_index(fix.kind)].changed += 1;
        }
        for (tally, examined) in cards.iter_mut().zip(scan.examined) {
            tally.total += examined;
        }
        if apply && let Some(patch) = scan.patch(&flow) {
            write_back("flow", &flow.id, || client.update_flow(&flow.id, &patch));
        }
    }
    println!("{} flow names changed", names);
    for (kind, label) in [
        (CardKind::Trigger, "triggers"),
        (CardKind::Condition, "conditions"),
        (CardKind::Action, "actions"),
    ] {
        println!("{} flow {} changed", cards[kind_index(kind)], label);
    }

    if !apply {
        tracing::info!("dry run; pass --apply to write the changes to the hub");
    }
    Ok(())
}

fn run_replace_device(client: &HubClient, mapping: &IdMapping, apply: bool) -> Result<()> {
    let flows = client.get_flows()?;
    let total = flows.len();
    let mut changed = 0;
    for mut flow in flows.into_values() {
        tracing::debug!(flow = %flow.name, "checking flow");
        let found = replace::replace_in_flow(&mut flow, mapping);
        if found.is_empty() {
            continue;
        }
        changed += 1;
        for r in &found {
            println!(
                "Found old device ID in {} of {} in flow \"{}\": {} -> {}",
                r.field, r.location, flow.name, r.old_id, r.new_id
            );
        }
        let patch = replace::flow_patch(&flow);
        if apply {
            tracing::info!(flow = %flow.name, "updating flow");
            write_back("flow", &flow.id, || client.update_flow(&flow.id, &patch));
        } else {
            println!(
                "Would update flow \"{}\" with:\n{}",
                flow.name,
                serde_json::to_string_pretty(&patch)?
            );
        }
    }
    println!("{} of {} flows changed", changed, total);

    let advanced = client.get_advanced_flows()?;
    let total = advanced.len();
    let mut changed = 0;
    for mut flow in advanced.into_values() {
        tracing::debug!(flow = %flow.name, "checking advanced flow");
        let found = replace::replace_in_advanced_flow(&mut flow, mapping);
        if found.is_empty() {
            continue;
        }
        changed += 1;
        for r in &found {
            println!(
                "Found old device ID in {} of {} in advanced flow \"{}\": {} -> {}",
                r.field, r.location, flow.name, r.old_id, r.new_id
            );
        }
        let patch = replace::advanced_flow_patch(&flow);
        if apply {
            tracing::info!(flow = %flow.name, "updating advanced flow");
            write_back("advanced flow", &flow.id, || {
                client.update_advanced_flow(&flow.id, &patch)
            });
        } else {
            println!(
                "Would update advanced flow \"{}\" with:\n{}",
                flow.name,
                serde_json::to_string_pretty(&patch)?
            );
        }
    }
    println!("{} of {} advanced flows changed", changed, total);

    if !apply {
        tracing::info!("dry run; pass --apply to write the changes to the hub");
    }
    Ok(())
}

/// Runs one update; failures are logged and the caller moves on.
fn write_back<F>(what: &str, id: &str, update: F)
where
    F: FnOnce() -> Result<serde_json::Value>,
{
    match update() {
        Ok(response) => tracing::debug!(what, id, %response, "update accepted"),
        Err(err) => tracing::error!(what, id, "update failed: {:#}", err),
    }
}
