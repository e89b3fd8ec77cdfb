// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, Context};
use clap::Parser;
use slog::{info, o, Drain, Logger};

use domforge::{DomainDescriptor, HostDirectIoChecker};
use domforge_api_types::VmSpec;

fn parse_log_level(s: &str) -> anyhow::Result<slog::Level> {
    s.parse().map_err(|_| anyhow!("Invalid log level"))
}

#[derive(Debug, Parser)]
#[clap(about, version)]
/// Compiles VM specs into hypervisor domain descriptors
enum Args {
    /// Converts a VM spec for the host described by a config file.
    Convert {
        /// The VM spec, as JSON.
        #[clap(long, action)]
        spec: PathBuf,

        /// The host configuration, as TOML.
        #[clap(long, action)]
        config: PathBuf,

        /// Where to write the descriptor. Defaults to stdout.
        #[clap(long, short, action)]
        output: Option<PathBuf>,

        /// Give devices without an explicit address a slot on PCI bus 0.
        #[clap(long, action)]
        place_pci_on_root: bool,

        /// Logging level
        #[clap(long, default_value_t = slog::Level::Info, value_parser = parse_log_level)]
        log_level: slog::Level,

        /// Emit bunyan-formatted JSON logs
        #[clap(long, action)]
        json_logs: bool,
    },
    /// Prints the JSON schema of the VM spec.
    Schema,
}

/// Builds a logger writing to stderr, keeping stdout free for output.
fn build_logger(
    level: slog::Level,
    json: bool,
) -> (Logger, slog_async::AsyncGuard) {
    let (drain, guard) = if json {
        let drain = slog_bunyan::with_name("domforge-cli", std::io::stderr())
            .build()
            .fuse();
        let drain = slog::LevelFilter::new(drain, level).fuse();
        slog_async::Async::new(drain)
            .overflow_strategy(slog_async::OverflowStrategy::Block)
            .build_with_guard()
    } else {
        let decorator = slog_term::TermDecorator::new().stderr().build();
        let drain = slog_term::FullFormat::new(decorator).build().fuse();
        let drain = slog::LevelFilter::new(drain, level).fuse();
        slog_async::Async::new(drain)
            .overflow_strategy(slog_async::OverflowStrategy::Block)
            .build_with_guard()
    };
    (Logger::root(drain.fuse(), o!()), guard)
}

fn convert_vm(
    spec_path: &Path,
    config_path: &Path,
    place_pci_on_root: bool,
    log: &Logger,
) -> anyhow::Result<DomainDescriptor> {
    let raw = fs::read_to_string(spec_path).with_context(|| {
        format!("failed to read VM spec {}", spec_path.display())
    })?;
    let spec: VmSpec = serde_json::from_str(&raw).with_context(|| {
        format!("failed to parse VM spec {}", spec_path.display())
    })?;

    let config = domforge_config_toml::parse(config_path).with_context(|| {
        format!("failed to read host config {}", config_path.display())
    })?;
    let ctx = config
        .to_context(Arc::new(HostDirectIoChecker))
        .context("invalid host config")?;

    let mut domain = domforge::convert(&spec, &ctx, log).map_err(|e| {
        let kind: &'static str = e.kind().into();
        anyhow::Error::new(e)
            .context(format!("failed to convert {} ({kind})", spec.name))
    })?;
    if place_pci_on_root {
        domforge::place_pci_devices_on_root_complex(&mut domain)
            .context("failed to place PCI devices on the root bus")?;
    }
    info!(log, "converted VM";
        "name" => &domain.name,
        "disks" => domain.devices.disks.len(),
        "interfaces" => domain.devices.interfaces.len(),
    );
    Ok(domain)
}

fn render(domain: &DomainDescriptor) -> anyhow::Result<String> {
    let mut out = serde_json::to_string_pretty(domain)?;
    out.push('\n');
    Ok(out)
}

fn run_schema() -> anyhow::Result<()> {
    let schema = schemars::schema_for!(VmSpec);
    let mut out = serde_json::to_string_pretty(&schema)?;
    out.push('\n');
    std::io::stdout().write_all(out.as_bytes())?;
    Ok(())
}

fn main() -> anyhow::Result<()> {
    match Args::parse() {
        Args::Schema => run_schema(),
        Args::Convert {
            spec,
            config,
            output,
            place_pci_on_root,
            log_level,
            json_logs,
        } => {
            let (log, _guard) = build_logger(log_level, json_logs);
            info!(log, "starting"; "domforge" => domforge::version());
            let domain = convert_vm(&spec, &config, place_pci_on_root, &log)?;
            let rendered = render(&domain)?;
            match output {
                Some(path) => fs::write(&path, rendered).with_context(|| {
                    format!("failed to write {}", path.display())
                })?,
                None => std::io::stdout().write_all(rendered.as_bytes())?,
            }
            Ok(())
        }
    }
}
