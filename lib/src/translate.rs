//! Bidirectional translation between package trees and the typed store.
//!
//! Going down, a parsed [`Package`] becomes a set of keys rooted at
//! [`CONFIG_ROOT`], with value types inferred from the option text and
//! anonymous sections disambiguated by index. Going up, a package's
//! subtree of keys is folded back into a tree the serializer can render.

use std::collections::HashMap;

use tracing::debug;

use crate::conf::{ConfigOption, OptionValue, Package, Section};
use crate::store::{ConfigStore, Key, KeySet, StoreError, CONFIG_ROOT};

/// Classify an option value by shape. Rules are tried top-down and the
/// first match wins:
///
/// | shape | tag |
/// |---|---|
/// | hex chars and exactly five colons | `macaddr` |
/// | hex chars and two or more colons | `ipv6addr` |
/// | decimal digits only | `long` |
/// | decimal digits and exactly three periods | `ipv4addr` |
/// | anything else | `string` |
pub fn classify(value: &str) -> &'static str {
    if value.is_empty() {
        return "string";
    }
    let mut colons = 0usize;
    let mut periods = 0usize;
    let mut slashes = 0usize;
    let mut hex = true;
    let mut decimal = true;
    for c in value.chars() {
        match c {
            ':' => colons += 1,
            '.' => periods += 1,
            '/' => slashes += 1,
            _ => {
                if !c.is_ascii_hexdigit() {
                    hex = false;
                }
                if !c.is_ascii_digit() {
                    decimal = false;
                }
            }
        }
    }
    if hex && colons == 5 && periods == 0 && slashes == 0 {
        "macaddr"
    } else if hex && colons >= 2 && periods == 0 && slashes == 0 {
        "ipv6addr"
    } else if decimal && colons == 0 && periods == 0 && slashes == 0 {
        "long"
    } else if decimal && colons == 0 && periods == 3 && slashes == 0 {
        "ipv4addr"
    } else {
        "string"
    }
}

/// A `/`-delimited key name built by pushing a segment on descent and
/// popping it on ascent.
#[derive(Debug)]
struct KeyPath {
    buf: String,
}

impl KeyPath {
    fn new(root: &str) -> Self {
        Self {
            buf: root.to_owned(),
        }
    }

    fn push(&mut self, segment: &str) {
        self.buf.push('/');
        self.buf.push_str(segment);
    }

    fn pop(&mut self) {
        if let Some(idx) = self.buf.rfind('/') {
            self.buf.truncate(idx);
        }
    }

    fn as_str(&self) -> &str {
        &self.buf
    }
}

fn index_segment(index: usize) -> String {
    format!("#{index:03}")
}

#[derive(Default)]
struct AnonTally {
    count: usize,
    counter: usize,
}

/// The full key set for one package, rooted at [`CONFIG_ROOT`].
pub fn keys_for_package(package: &Package) -> KeySet {
    let mut keys = KeySet::new();
    keys.insert(Key::new(CONFIG_ROOT).with_meta("type", "config"));

    let mut path = KeyPath::new(CONFIG_ROOT);
    path.push(&package.name);
    keys.insert(Key::new(path.as_str()));

    // First pass: how many anonymous sections share each type? Only types
    // appearing more than once get indexed.
    let mut anon: HashMap<&str, AnonTally> = HashMap::new();
    for section in package.sections.iter().filter(|s| s.is_anonymous()) {
        anon.entry(section.section_type.as_str()).or_default().count += 1;
    }

    for section in &package.sections {
        match &section.name {
            Some(name) => {
                path.push(name);
                store_section(&mut keys, &mut path, section);
                path.pop();
            }
            None => {
                path.push(&section.section_type);
                let tally = anon.entry(section.section_type.as_str()).or_default();
                if tally.count > 1 {
                    path.push(&index_segment(tally.counter));
                    tally.counter += 1;
                    store_section(&mut keys, &mut path, section);
                    path.pop();
                } else {
                    store_section(&mut keys, &mut path, section);
                }
                path.pop();
            }
        }
    }
    keys
}

fn store_section(keys: &mut KeySet, path: &mut KeyPath, section: &Section) {
    keys.insert(Key::new(path.as_str()).with_meta("type", section.section_type.as_str()));
    for option in &section.options {
        path.push(&option.name);
        match &option.value {
            OptionValue::String(value) => {
                keys.insert(
                    Key::new(path.as_str())
                        .with_value(value.as_str())
                        .with_meta("type", classify(value)),
                );
            }
            OptionValue::List(values) => {
                let mut list_key = Key::new(path.as_str()).with_meta("type", "list");
                for (index, value) in values.iter().enumerate() {
                    let segment = index_segment(index);
                    path.push(&segment);
                    keys.insert(
                        Key::new(path.as_str())
                            .with_value(value.as_str())
                            .with_meta("type", classify(value)),
                    );
                    path.pop();
                    list_key = list_key.with_meta("array", segment);
                }
                keys.insert(list_key);
            }
        }
        path.pop();
    }
}

/// Replace `package`'s subtree in the store.
///
/// The store contract requires loading the current contents before
/// writing, so the existing key set is fetched, the old subtree of this
/// package dropped, the fresh keys merged in, and the whole set committed
/// in one call.
pub fn commit_package(store: &mut dyn ConfigStore, package: &Package) -> Result<(), StoreError> {
    let mut keys = store.get(CONFIG_ROOT);
    let mut prefix = KeyPath::new(CONFIG_ROOT);
    prefix.push(&package.name);
    let dropped = keys.remove_below(prefix.as_str());
    let fresh = keys_for_package(package);
    debug!(
        "committing '{}': {} keys replace {}",
        package.name,
        fresh.len(),
        dropped
    );
    keys.merge(fresh);
    store.set(&keys)
}

/// Fold the key subtree of `name` back into a package tree.
///
/// Sections come back in key order rather than original file order, and a
/// named section whose name equals its type comes back anonymous; both
/// re-translate to the identical key set.
pub fn package_from_keys(name: &str, keys: &KeySet) -> Package {
    let root = format!("{CONFIG_ROOT}/{name}");
    let prefix = format!("{root}/");
    let mut sections = Vec::new();

    // Names with a '/'-sorting sibling (e.g. `lan` and `lan-ext`) do not
    // group contiguously, so track the buckets already handled.
    let mut seen = std::collections::BTreeSet::new();
    for key in keys.below(&root) {
        let rel = &key.name[prefix.len()..];
        let first = rel.split('/').next().unwrap_or(rel);
        if !seen.insert(first) {
            continue;
        }

        let base = format!("{prefix}{first}");
        if let Some(section_key) = keys.lookup(&base) {
            let section_type = section_key.meta("type").unwrap_or(first).to_owned();
            let name = (section_type != first).then(|| first.to_owned());
            sections.push(section_from_keys(&base, section_type, name, keys));
        } else {
            // No key at the bucket itself: these are indexed anonymous
            // sections, one per #NNN child.
            for child in direct_children(keys, &base) {
                let section_type = child.meta("type").unwrap_or(first).to_owned();
                sections.push(section_from_keys(&child.name, section_type, None, keys));
            }
        }
    }
    Package {
        name: name.to_owned(),
        sections,
    }
}

fn direct_children<'a>(keys: &'a KeySet, base: &str) -> Vec<&'a Key> {
    let skip = base.len() + 1;
    keys.below(base)
        .filter(|key| !key.name[skip..].contains('/'))
        .collect()
}

fn section_from_keys(base: &str, section_type: String, name: Option<String>, keys: &KeySet) -> Section {
    let mut options = Vec::new();
    for key in direct_children(keys, base) {
        let option_name = key.base_name().to_owned();
        let value = if key.meta("type") == Some("list") {
            let values = direct_children(keys, &key.name)
                .into_iter()
                .filter(|element| element.base_name().starts_with('#'))
                .map(|element| element.value.clone().unwrap_or_default())
                .collect();
            OptionValue::List(values)
        } else {
            OptionValue::String(key.value.clone().unwrap_or_default())
        };
        options.push(ConfigOption {
            name: option_name,
            value,
        });
    }
    Section {
        section_type,
        name,
        options,
    }
}
