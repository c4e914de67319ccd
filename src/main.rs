/*
 *  main.rs
 *
 *  rtflavor - realtime flavor loader
 *  (c) 2020-26 Stuart Hunter
 *
 *  This program is free software: you can redistribute it and/or modify
 *  it under the terms of the GNU General Public License as published by
 *  the Free Software Foundation, either version 3 of the License, or
 *  (at your option) any later version.
 *
 *  This program is distributed in the hope that it will be useful,
 *  but WITHOUT ANY WARRANTY; without even the implied warranty of
 *  MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 *  GNU General Public License for more details.
 *
 *  See <http://www.gnu.org/licenses/> to get a copy of the GNU General
 *  Public License.
 *
 */

use anyhow::{Context, Result};
use clap::Parser;
use env_logger::Env;
use log::{error, info};

use rtflavor::config::{self, Cli};
use rtflavor::flavor::{default_opener, FlavorFlags, FlavorManager, SelectionSources};

include!(concat!(env!("OUT_DIR"), "/build_info.rs"));

fn main() -> Result<()> {
    let cli = Cli::parse();
    let cfg = config::load(&cli).context("loading configuration")?;

    if cli.dump_config {
        print!("{}", config::dump(&cfg)?);
        return Ok(());
    }

    env_logger::Builder::from_env(Env::default().default_filter_or(cfg.log_filter()))
        .format_timestamp_secs()
        .init();

    info!("This is {} v.{} built {}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"), BUILD_DATE);

    let manager = FlavorManager::init_global(cfg.lib_dir(), default_opener());

    if cli.list {
        let candidates = manager.candidates();
        if candidates.is_empty() {
            println!("No flavor modules found in {}", manager.lib_dir().display());
        }
        for flavor in candidates {
            println!("{}", flavor);
        }
        return Ok(());
    }

    let sources = SelectionSources::from_env(cli.flavor.clone());
    let flavor = manager.startup(&sources).map_err(|e| {
        error!("Flavor startup failed: {}", e);
        if !manager.known_flavor_names().is_empty() {
            error!("Known flavors: {}", manager.known_flavor_names().join(", "));
        }
        e
    }).context("no usable realtime flavor")?;

    let installer = manager.installer();
    installer
        .arm()
        .with_context(|| format!("arming flavor '{}'", flavor.name))?;

    info!(
        "Flavor '{}' (id {}, magic {}) armed, realtime: {}, clock: {} ns",
        installer.installed_flavor_name()?,
        installer.installed_flavor_id()?,
        installer.installed_flavor_magic()?,
        installer.verify_installed_flavor_feature(FlavorFlags::IS_RT)?,
        installer.get_time()?
    );

    installer.shutdown().context("flavor teardown")?;
    info!("Done");
    Ok(())
}
