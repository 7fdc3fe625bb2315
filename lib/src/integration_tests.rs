//! End-to-end exercises of the mount pipeline: store to rendered text,
//! edited text back to the store, and the refreshed rendering after.

use indoc::indoc;
use similar_asserts::assert_eq;

use crate::conf::Package;
use crate::mount::MountState;
use crate::store::{ConfigStore, MemoryStore, CONFIG_ROOT};
use crate::translate;

fn seeded_store() -> MemoryStore {
    let mut store = MemoryStore::default();
    for (name, text) in [
        (
            "network",
            indoc! { r#"
                config interface 'lan'
                	option device 'br-lan'
                	option proto 'static'
                	option ipaddr '192.168.1.1'

                config device
                	option name 'br-lan'
                	list ports 'lan1'
                	list ports 'lan2'
            "# },
        ),
        (
            "system",
            indoc! { r#"
                config system
                	option hostname 'gateway'
            "# },
        ),
    ] {
        let package = Package::parse(name, text).unwrap();
        translate::commit_package(&mut store, &package).unwrap();
    }
    store
}

#[test]
fn full_edit_cycle() {
    let mut store = seeded_store();
    let mut state = MountState::new(1000, 1000);

    // A cold listing sees both seeded packages.
    state.reconcile(&store).unwrap();
    let names: Vec<_> = state
        .entries()
        .map(|e| e.package_name().to_owned())
        .collect();
    assert_eq!(names, ["network", "system"]);
    assert_eq!(state.dir_attrs(&store).unwrap().nlink, 4);

    // Reading /network yields a parseable rendering of the package.
    let entry = state.find(&store, "/network").unwrap();
    let original = String::from_utf8(entry.read(0, 4096).to_vec()).unwrap();
    assert!(original.contains("option ipaddr '192.168.1.1'"));
    assert!(original.contains("list ports 'lan2'"));
    let reparsed = Package::parse("network", &original).unwrap();
    assert_eq!(
        translate::keys_for_package(&reparsed),
        store.get(CONFIG_ROOT)
            .iter()
            .filter(|k| !k.name.starts_with("system:/config/system"))
            .cloned()
            .fold(crate::store::KeySet::new(), |mut ks, k| {
                ks.insert(k);
                ks
            })
    );

    // Rewrite the file the way an editor would: truncate, write, close.
    let replacement = indoc! { r#"
        config interface 'lan'
        	option device 'br-lan'
        	option proto 'static'
        	option ipaddr '10.0.0.1'

        config interface 'guest'
        	option proto 'dhcp'
    "# };
    let entry = state.find(&store, "/network").unwrap();
    entry.truncate(0).unwrap();
    entry.write(0, replacement.as_bytes()).unwrap();
    assert!(entry.is_dirty());
    entry.parse_and_commit(&mut store).unwrap();
    assert!(!entry.is_dirty());

    // The store reflects the edit: new section in, old device section out.
    let keys = store.get(CONFIG_ROOT);
    assert_eq!(
        keys.lookup("system:/config/network/lan/ipaddr")
            .and_then(|k| k.value.as_deref()),
        Some("10.0.0.1")
    );
    assert!(keys.lookup("system:/config/network/guest").is_some());
    assert!(keys.lookup("system:/config/network/device").is_none());
    // The untouched package is still there.
    assert_eq!(
        keys.lookup("system:/config/system/system/hostname")
            .and_then(|k| k.value.as_deref()),
        Some("gateway")
    );

    // A fresh populate renders the committed settings.
    let entry = state.find(&store, "/network").unwrap();
    entry.populate(&store);
    let refreshed = String::from_utf8(entry.read(0, 4096).to_vec()).unwrap();
    assert!(refreshed.contains("option ipaddr '10.0.0.1'"));
    assert!(refreshed.contains("config interface 'guest'"));
    assert!(!refreshed.contains("config device"));
    assert_eq!(entry.attrs().size as usize, refreshed.len());
}

#[test]
fn bad_edit_is_held_until_fixed() {
    let mut store = seeded_store();
    let mut state = MountState::new(0, 0);
    state.reconcile(&store).unwrap();

    let entry = state.find(&store, "/system").unwrap();
    entry.truncate(0).unwrap();
    entry.write(0, b"config system\n\toption hostname\n").unwrap();

    // The malformed text does not reach the store and stays in the file.
    assert!(entry.parse_and_commit(&mut store).is_err());
    assert!(entry.is_dirty());
    assert_eq!(
        store
            .get(CONFIG_ROOT)
            .lookup("system:/config/system/system/hostname")
            .and_then(|k| k.value.as_deref()),
        Some("gateway")
    );

    entry.truncate(0).unwrap();
    entry
        .write(0, b"config system\n\toption hostname 'core'\n")
        .unwrap();
    entry.parse_and_commit(&mut store).unwrap();
    assert_eq!(
        store
            .get(CONFIG_ROOT)
            .lookup("system:/config/system/system/hostname")
            .and_then(|k| k.value.as_deref()),
        Some("core")
    );
}

#[test]
fn created_files_commit_as_new_packages() {
    let mut store = seeded_store();
    let mut state = MountState::new(0, 0);
    state.reconcile(&store).unwrap();

    let entry = state.create_entry("/firewall", 0).unwrap();
    entry
        .write(0, b"config zone 'wan'\n\toption masq '1'\n")
        .unwrap();
    entry.parse_and_commit(&mut store).unwrap();

    let keys = store.get(CONFIG_ROOT);
    assert!(keys.lookup("system:/config/firewall/wan").is_some());
    // The next enumeration pass will pick the new package up by name.
    assert_eq!(store.package_name(0).as_deref(), Some("firewall"));
}
