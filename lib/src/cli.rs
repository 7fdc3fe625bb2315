//! Command-line handling for the `conffs` binary.

use std::ffi::OsString;

use anyhow::{Context, Result};
use camino::Utf8PathBuf;
use clap::Parser;
use fn_error_context::context;
use fuser::MountOption;
use tracing::info;

use crate::conf::Package;
use crate::fs::ConfigFs;
use crate::store::MemoryStore;
use crate::translate;

/// Present a configuration database as a filesystem.
///
/// Every configuration package appears as one file in the mount root.
/// Read a file to see the package's current settings; write and close it
/// to commit the new settings back into the store.
#[derive(Debug, Parser)]
#[command(name = "conffs", version)]
pub struct Cli {
    /// Where to mount the filesystem.
    pub mountpoint: Utf8PathBuf,

    /// JSON file backing the configuration store. Loaded at startup and
    /// rewritten on every commit; kept purely in memory when absent.
    #[arg(long)]
    pub store: Option<Utf8PathBuf>,

    /// Allow root to access the mount.
    #[arg(long)]
    pub allow_root: bool,

    /// Unmount automatically when the process exits.
    #[arg(long)]
    pub auto_unmount: bool,
}

/// A starter configuration for stores that hold nothing yet, so a fresh
/// mount has something to show.
const SAMPLE_PACKAGES: &[(&str, &str)] = &[
    (
        "network",
        indoc::indoc! { r#"
            config interface 'loopback'
            	option device 'lo'
            	option proto 'static'
            	option ipaddr '127.0.0.1'
            	option netmask '255.0.0.0'

            config interface 'lan'
            	option device 'br-lan'
            	option proto 'static'
            	option ipaddr '192.168.1.1'
            	option netmask '255.255.255.0'

            config device
            	option name 'br-lan'
            	option type 'bridge'
            	list ports 'lan1'
            	list ports 'lan2'
        "# },
    ),
    (
        "system",
        indoc::indoc! { r#"
            config system
            	option hostname 'gateway'
            	option timezone 'UTC'

            config timeserver 'ntp'
            	list server '0.pool.ntp.org'
            	list server '1.pool.ntp.org'
        "# },
    ),
    (
        "wireless",
        indoc::indoc! { r#"
            config wifi-device 'radio0'
            	option type 'mac80211'
            	option channel '36'
            	option band '5g'

            config wifi-iface 'default_radio0'
            	option device 'radio0'
            	option network 'lan'
            	option mode 'ap'
            	option ssid 'gateway'
        "# },
    ),
    (
        "dhcp",
        indoc::indoc! { r#"
            config dnsmasq
            	option domainneeded '1'
            	option localise_queries '1'

            config dhcp 'lan'
            	option interface 'lan'
            	option start '100'
            	option limit '150'
            	option leasetime '12h'
        "# },
    ),
];

#[context("Opening configuration store")]
fn open_store(cli: &Cli) -> Result<MemoryStore> {
    let mut store = match &cli.store {
        Some(path) => MemoryStore::open(path.as_std_path())?,
        None => MemoryStore::default(),
    };
    if store.is_empty() {
        info!("store is empty, seeding the sample configuration");
        for (name, text) in SAMPLE_PACKAGES {
            let package = Package::parse(name, text)
                .with_context(|| format!("parsing the sample '{name}' package"))?;
            translate::commit_package(&mut store, &package)?;
        }
    }
    Ok(store)
}

/// Parse `args` and run the filesystem until it is unmounted.
pub fn run_from_iter<I>(args: I) -> Result<()>
where
    I: IntoIterator,
    I::Item: Into<OsString> + Clone,
{
    let cli = Cli::parse_from(args);
    let store = open_store(&cli)?;

    let uid = rustix::process::getuid().as_raw();
    let gid = rustix::process::getgid().as_raw();
    let fs = ConfigFs::new(uid, gid, Box::new(store));

    let mut options = vec![MountOption::RW, MountOption::FSName("conffs".to_owned())];
    if cli.allow_root {
        options.push(MountOption::AllowRoot);
    }
    if cli.auto_unmount {
        options.push(MountOption::AutoUnmount);
    }

    info!("mounting on {}", cli.mountpoint);
    fuser::mount2(fs, cli.mountpoint.as_std_path(), &options)
        .with_context(|| format!("mounting on {}", cli.mountpoint))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::store::CONFIG_ROOT;

    #[test]
    fn args_parse() {
        let cli = Cli::parse_from(["conffs", "/mnt/config", "--auto-unmount"]);
        assert_eq!(cli.mountpoint, "/mnt/config");
        assert!(cli.auto_unmount);
        assert!(!cli.allow_root);
        assert!(cli.store.is_none());
    }

    #[test]
    fn empty_store_is_seeded_with_every_sample_package() {
        let cli = Cli::parse_from(["conffs", "/mnt/config"]);
        let store = open_store(&cli).unwrap();
        let keys = crate::store::ConfigStore::get(&store, CONFIG_ROOT);
        for package in ["network", "system", "wireless", "dhcp"] {
            assert!(
                keys.lookup(&format!("{CONFIG_ROOT}/{package}")).is_some(),
                "missing {package}"
            );
        }
        assert_eq!(
            keys.lookup(&format!("{CONFIG_ROOT}/network/lan/ipaddr"))
                .and_then(|k| k.meta("type")),
            Some("ipv4addr")
        );
    }
}
