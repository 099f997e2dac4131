//! Field descriptor tables.
//!
//! Every entity kind declares its attributes here: name, type, default and
//! whether the value may be inherited. The same tables drive validation,
//! record (de)serialization and the resolver's merge rules.

use crate::entity::Attrs;
use crate::error::{Error, Result};
use once_cell::sync::Lazy;
use provisio_types::{EntityKind, Value};
use regex::Regex;
use std::collections::{BTreeMap, HashSet};
use std::net::{Ipv4Addr, Ipv6Addr};

static NAME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9_\-.:]+$").expect("valid name regex"));
static MAC_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[0-9a-f]{2}(:[0-9a-f]{2}){5}$").expect("valid MAC regex"));

pub const ARCHES: &[&str] = &["x86_64", "i386", "aarch64", "ppc64le", "s390x"];
pub const REPO_ARCHES: &[&str] = &["x86_64", "i386", "aarch64", "ppc64le", "s390x", "noarch", "src", "none"];
pub const REPO_BREEDS: &[&str] = &["rsync", "rhn", "yum", "apt", "wget", "none"];
pub const STATUSES: &[&str] = &["development", "testing", "acceptance", "production"];
pub const IMAGE_TYPES: &[&str] = &["direct", "iso", "memdisk", "virt-clone"];

/// Attribute type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    Str,
    Bool,
    Int { min: i64, max: i64 },
    Enum(&'static [&'static str]),
    List,
    Map,
    /// Name of an entity of the given kind
    Ref(EntityKind),
    /// Names of entities of the given kind
    RefList(EntityKind),
    /// System network interfaces: interface name to sub-record
    Interfaces,
}

/// Default value of a field when nothing upstream provides one
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldDefault {
    Empty,
    Str(&'static str),
    Bool(bool),
    Int(i64),
    StrList(&'static [&'static str]),
}

/// One attribute descriptor
#[derive(Debug, Clone, Copy)]
pub struct FieldSpec {
    pub name: &'static str,
    pub ty: FieldType,
    pub default: FieldDefault,
    pub inheritable: bool,
    /// Keeps the first non-empty value seen while resolving
    pub sticky: bool,
}

impl FieldSpec {
    const fn new(name: &'static str, ty: FieldType) -> Self {
        FieldSpec {
            name,
            ty,
            default: FieldDefault::Empty,
            inheritable: false,
            sticky: false,
        }
    }

    const fn inherit(self) -> Self {
        FieldSpec {
            inheritable: true,
            ..self
        }
    }

    const fn sticky(self) -> Self {
        FieldSpec {
            sticky: true,
            ..self
        }
    }

    const fn default(self, default: FieldDefault) -> Self {
        FieldSpec { default, ..self }
    }

    /// The fallback value for this field
    pub fn default_value(&self) -> Value {
        match self.default {
            FieldDefault::Str(s) => Value::str(s),
            FieldDefault::Bool(b) => Value::Bool(b),
            FieldDefault::Int(i) => Value::Int(i),
            FieldDefault::StrList(items) => Value::str_list(items.iter().copied()),
            FieldDefault::Empty => match self.ty {
                FieldType::List | FieldType::RefList(_) => Value::List(Vec::new()),
                FieldType::Map | FieldType::Interfaces => Value::Map(BTreeMap::new()),
                FieldType::Bool => Value::Bool(false),
                FieldType::Int { min, .. } => Value::Int(min.max(0)),
                _ => Value::str(""),
            },
        }
    }

    /// Value a freshly created entity holds: inheritable fields start inherited
    pub fn initial_value(&self) -> Value {
        if self.inheritable {
            Value::Inherit
        } else {
            self.default_value()
        }
    }
}

use FieldType as T;

const COMMON: &[FieldSpec] = &[
    FieldSpec::new("comment", T::Str),
    FieldSpec::new("owners", T::List)
        .inherit()
        .default(FieldDefault::StrList(&["admin"])),
];

const DISTRO: &[FieldSpec] = &[
    FieldSpec::new("arch", T::Enum(ARCHES)).default(FieldDefault::Str("x86_64")),
    FieldSpec::new("breed", T::Str),
    FieldSpec::new("os_version", T::Str),
    FieldSpec::new("kernel", T::Str),
    FieldSpec::new("initrd", T::Str),
    FieldSpec::new("kernel_options", T::Map).inherit(),
    FieldSpec::new("kernel_options_post", T::Map).inherit(),
    FieldSpec::new("autoinstall_meta", T::Map).inherit(),
    FieldSpec::new("boot_loaders", T::List)
        .inherit()
        .default(FieldDefault::StrList(&["grub", "pxe"])),
    FieldSpec::new("source_repos", T::List),
    FieldSpec::new("template_files", T::Map),
];

const PROFILE: &[FieldSpec] = &[
    FieldSpec::new("distro", T::Ref(EntityKind::Distro)).sticky(),
    FieldSpec::new("repos", T::RefList(EntityKind::Repo)),
    FieldSpec::new("menu", T::Ref(EntityKind::Menu)),
    FieldSpec::new("autoinstall", T::Str)
        .inherit()
        .default(FieldDefault::Str("default.ks")),
    FieldSpec::new("kernel_options", T::Map).inherit(),
    FieldSpec::new("kernel_options_post", T::Map).inherit(),
    FieldSpec::new("autoinstall_meta", T::Map).inherit(),
    FieldSpec::new("boot_loaders", T::List)
        .inherit()
        .default(FieldDefault::StrList(&["grub", "pxe"])),
    FieldSpec::new("virt_bridge", T::Str)
        .inherit()
        .default(FieldDefault::Str("xenbr0")),
    FieldSpec::new("virt_cpus", T::Int { min: 1, max: 1024 })
        .inherit()
        .default(FieldDefault::Int(1)),
    FieldSpec::new("virt_ram", T::Int { min: 0, max: 1_048_576 })
        .inherit()
        .default(FieldDefault::Int(512)),
    FieldSpec::new("proxy", T::Str).inherit(),
    FieldSpec::new("server", T::Str).inherit(),
    FieldSpec::new("enable_menu", T::Bool)
        .inherit()
        .default(FieldDefault::Bool(true)),
    FieldSpec::new("dhcp_tag", T::Str),
    FieldSpec::new("display_name", T::Str),
    FieldSpec::new("template_files", T::Map),
];

const SYSTEM: &[FieldSpec] = &[
    FieldSpec::new("profile", T::Ref(EntityKind::Profile)),
    FieldSpec::new("image", T::Ref(EntityKind::Image)),
    FieldSpec::new("hostname", T::Str),
    FieldSpec::new("gateway", T::Str),
    FieldSpec::new("netboot_enabled", T::Bool).default(FieldDefault::Bool(true)),
    FieldSpec::new("status", T::Enum(STATUSES)).default(FieldDefault::Str("production")),
    FieldSpec::new("interfaces", T::Interfaces),
    FieldSpec::new("autoinstall", T::Str)
        .inherit()
        .default(FieldDefault::Str("default.ks")),
    FieldSpec::new("kernel_options", T::Map).inherit(),
    FieldSpec::new("kernel_options_post", T::Map).inherit(),
    FieldSpec::new("autoinstall_meta", T::Map).inherit(),
    FieldSpec::new("boot_loaders", T::List)
        .inherit()
        .default(FieldDefault::StrList(&["grub", "pxe"])),
    FieldSpec::new("virt_bridge", T::Str)
        .inherit()
        .default(FieldDefault::Str("xenbr0")),
    FieldSpec::new("virt_cpus", T::Int { min: 1, max: 1024 })
        .inherit()
        .default(FieldDefault::Int(1)),
    FieldSpec::new("virt_ram", T::Int { min: 0, max: 1_048_576 })
        .inherit()
        .default(FieldDefault::Int(512)),
    FieldSpec::new("proxy", T::Str).inherit(),
    FieldSpec::new("server", T::Str).inherit(),
    FieldSpec::new("template_files", T::Map),
];

const REPO: &[FieldSpec] = &[
    FieldSpec::new("mirror", T::Str),
    FieldSpec::new("arch", T::Enum(REPO_ARCHES)).default(FieldDefault::Str("none")),
    FieldSpec::new("breed", T::Enum(REPO_BREEDS)).default(FieldDefault::Str("none")),
    FieldSpec::new("priority", T::Int { min: 1, max: 99 }).default(FieldDefault::Int(99)),
    FieldSpec::new("keep_updated", T::Bool).default(FieldDefault::Bool(true)),
    FieldSpec::new("mirror_locally", T::Bool).default(FieldDefault::Bool(true)),
    FieldSpec::new("rpm_list", T::List),
    FieldSpec::new("environment", T::Map),
    FieldSpec::new("yumopts", T::Map),
    FieldSpec::new("proxy", T::Str).inherit(),
];

const IMAGE: &[FieldSpec] = &[
    FieldSpec::new("arch", T::Enum(ARCHES)).default(FieldDefault::Str("x86_64")),
    FieldSpec::new("breed", T::Str),
    FieldSpec::new("os_version", T::Str),
    FieldSpec::new("file", T::Str),
    FieldSpec::new("image_type", T::Enum(IMAGE_TYPES)).default(FieldDefault::Str("direct")),
    FieldSpec::new("menu", T::Ref(EntityKind::Menu)),
    FieldSpec::new("network_count", T::Int { min: 0, max: i64::MAX }),
    FieldSpec::new("autoinstall", T::Str).inherit(),
    FieldSpec::new("virt_bridge", T::Str)
        .inherit()
        .default(FieldDefault::Str("xenbr0")),
    FieldSpec::new("virt_cpus", T::Int { min: 1, max: 1024 })
        .inherit()
        .default(FieldDefault::Int(1)),
    FieldSpec::new("virt_ram", T::Int { min: 0, max: 1_048_576 })
        .inherit()
        .default(FieldDefault::Int(512)),
    FieldSpec::new("boot_loaders", T::List)
        .inherit()
        .default(FieldDefault::StrList(&["grub", "pxe"])),
];

const MENU: &[FieldSpec] = &[FieldSpec::new("display_name", T::Str)];

/// Sub-fields of one network interface
pub const INTERFACE_FIELDS: &[(&str, FieldType)] = &[
    ("mac_address", T::Str),
    ("ip_address", T::Str),
    ("ipv6_address", T::Str),
    ("dns_name", T::Str),
    ("netmask", T::Str),
    ("if_gateway", T::Str),
    ("management", T::Bool),
    ("static", T::Bool),
];

fn kind_fields(kind: EntityKind) -> &'static [FieldSpec] {
    match kind {
        EntityKind::Distro => DISTRO,
        EntityKind::Profile => PROFILE,
        EntityKind::System => SYSTEM,
        EntityKind::Repo => REPO,
        EntityKind::Image => IMAGE,
        EntityKind::Menu => MENU,
    }
}

/// All attribute descriptors of a kind, common fields first
pub fn fields(kind: EntityKind) -> impl Iterator<Item = &'static FieldSpec> {
    COMMON.iter().chain(kind_fields(kind))
}

pub fn field(kind: EntityKind, name: &str) -> Option<&'static FieldSpec> {
    fields(kind).find(|f| f.name == name)
}

/// Whether entities of this kind carry a same-kind `parent`
pub fn supports_parent(kind: EntityKind) -> bool {
    matches!(kind, EntityKind::Profile | EntityKind::Menu)
}

static STICKY: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    EntityKind::ALL
        .iter()
        .flat_map(|kind| fields(*kind))
        .filter(|f| f.sticky)
        .map(|f| f.name)
        .collect()
});

/// Fields that keep the first non-empty value along a resolution chain
pub fn is_sticky(name: &str) -> bool {
    STICKY.contains(name)
}

pub fn is_interface_field(name: &str) -> bool {
    INTERFACE_FIELDS.iter().any(|(f, _)| *f == name)
}

/// Initial attribute bag of a new entity
pub fn initial_attrs(kind: EntityKind) -> Attrs {
    fields(kind)
        .map(|f| (f.name.to_string(), f.initial_value()))
        .collect()
}

pub fn validate_name(kind: EntityKind, name: &str) -> Result<()> {
    if NAME_RE.is_match(name) {
        Ok(())
    } else {
        Err(Error::validation(
            kind,
            "name",
            format!("'{}' may only contain letters, digits and _-.:", name),
        ))
    }
}

/// Validate and normalize a value for `field`.
///
/// Strings are accepted for every type, the way command-line input arrives:
/// lists split on whitespace and commas, maps parse `k=v` terms.
/// `Null` resets the field to its initial value.
pub fn validate(kind: EntityKind, name: &str, value: Value) -> Result<Value> {
    let spec = field(kind, name).ok_or_else(|| Error::UnknownField {
        kind,
        field: name.to_string(),
    })?;

    match value {
        Value::Null => return Ok(spec.initial_value()),
        Value::Inherit if spec.inheritable => return Ok(Value::Inherit),
        Value::Inherit => {
            return Err(Error::validation(kind, name, "this field cannot be inherited"))
        }
        _ => {}
    }

    let invalid = |reason: String| Error::validation(kind, name, reason);

    match spec.ty {
        T::Str => match value {
            Value::Str(_) => Ok(value),
            Value::Int(i) => Ok(Value::Str(i.to_string())),
            other => Err(invalid(format!("expected a string, got {}", other.type_name()))),
        },
        T::Ref(_) => match value {
            Value::Str(s) => Ok(Value::Str(s.trim().to_string())),
            other => Err(invalid(format!("expected a name, got {}", other.type_name()))),
        },
        T::Bool => to_bool(&value)
            .map(Value::Bool)
            .ok_or_else(|| invalid(format!("'{}' is not a boolean", value))),
        T::Int { min, max } => {
            let i = to_int(&value).ok_or_else(|| invalid(format!("'{}' is not an integer", value)))?;
            if i < min || i > max {
                return Err(invalid(format!("{} is outside {}..={}", i, min, max)));
            }
            Ok(Value::Int(i))
        }
        T::Enum(choices) => {
            let s = value
                .as_str()
                .map(|s| s.trim().to_lowercase())
                .ok_or_else(|| invalid(format!("expected one of {}", choices.join(", "))))?;
            if choices.contains(&s.as_str()) {
                Ok(Value::Str(s))
            } else {
                Err(invalid(format!("'{}' is not one of {}", s, choices.join(", "))))
            }
        }
        T::List | T::RefList(_) => match value {
            Value::Str(s) => Ok(input_list(&s)),
            Value::List(items) => {
                if items.iter().any(|i| matches!(i, Value::List(_) | Value::Map(_))) {
                    return Err(invalid("list items must be scalars".into()));
                }
                Ok(Value::List(items))
            }
            other => Err(invalid(format!("expected a list, got {}", other.type_name()))),
        },
        T::Map => match value {
            Value::Str(s) => Ok(Value::Map(input_map(&s))),
            Value::Map(_) => Ok(value),
            other => Err(invalid(format!("expected a map, got {}", other.type_name()))),
        },
        T::Interfaces => match value {
            Value::Map(interfaces) => {
                let mut normalized = BTreeMap::new();
                for (ifname, record) in interfaces {
                    if ifname.is_empty() {
                        return Err(invalid("interface name must not be empty".into()));
                    }
                    let record = validate_interface(kind, &ifname, record)?;
                    normalized.insert(ifname, record);
                }
                Ok(Value::Map(normalized))
            }
            other => Err(invalid(format!("expected a map of interfaces, got {}", other.type_name()))),
        },
    }
}

/// Validate one interface record, filling absent sub-fields with defaults
pub fn validate_interface(kind: EntityKind, ifname: &str, record: Value) -> Result<Value> {
    let record = match record {
        Value::Map(m) => m,
        Value::Null => BTreeMap::new(),
        other => {
            return Err(Error::validation(
                kind,
                "interfaces",
                format!("interface '{}' must be a map, got {}", ifname, other.type_name()),
            ))
        }
    };

    for key in record.keys() {
        if !is_interface_field(key) {
            return Err(Error::UnknownField {
                kind,
                field: format!("interfaces.{}.{}", ifname, key),
            });
        }
    }

    let mut normalized = BTreeMap::new();
    for (key, ty) in INTERFACE_FIELDS {
        let field_name = format!("interfaces.{}.{}", ifname, key);
        let raw = record.get(*key).cloned().unwrap_or(Value::Null);
        let value = match ty {
            T::Bool => match raw {
                Value::Null => Value::Bool(false),
                other => Value::Bool(to_bool(&other).ok_or_else(|| {
                    Error::validation(kind, &field_name, format!("'{}' is not a boolean", other))
                })?),
            },
            _ => {
                let s = match raw {
                    Value::Null => String::new(),
                    Value::Str(s) => s.trim().to_string(),
                    other => {
                        return Err(Error::validation(
                            kind,
                            &field_name,
                            format!("expected a string, got {}", other.type_name()),
                        ))
                    }
                };
                Value::Str(normalize_interface_value(kind, &field_name, key, s)?)
            }
        };
        normalized.insert(key.to_string(), value);
    }
    Ok(Value::Map(normalized))
}

fn normalize_interface_value(kind: EntityKind, field_name: &str, key: &str, s: String) -> Result<String> {
    if s.is_empty() {
        return Ok(s);
    }
    match key {
        "mac_address" => {
            let mac = s.to_lowercase().replace('-', ":");
            if MAC_RE.is_match(&mac) {
                Ok(mac)
            } else {
                Err(Error::validation(kind, field_name, format!("'{}' is not a MAC address", s)))
            }
        }
        "ip_address" | "netmask" | "if_gateway" => s
            .parse::<Ipv4Addr>()
            .map(|ip| ip.to_string())
            .map_err(|_| Error::validation(kind, field_name, format!("'{}' is not an IPv4 address", s))),
        "ipv6_address" => s
            .parse::<Ipv6Addr>()
            .map(|ip| ip.to_string())
            .map_err(|_| Error::validation(kind, field_name, format!("'{}' is not an IPv6 address", s))),
        _ => Ok(s),
    }
}

pub(crate) fn to_bool(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::Int(0) => Some(false),
        Value::Int(1) => Some(true),
        Value::Str(s) => match s.trim().to_lowercase().as_str() {
            "true" | "1" | "y" | "yes" | "on" => Some(true),
            "false" | "0" | "n" | "no" | "off" | "" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

fn to_int(value: &Value) -> Option<i64> {
    match value {
        Value::Int(i) => Some(*i),
        Value::Str(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Split a whitespace/comma separated string into a list
pub fn input_list(s: &str) -> Value {
    Value::List(
        s.split(|c: char| c.is_whitespace() || c == ',')
            .filter(|t| !t.is_empty())
            .map(Value::str)
            .collect(),
    )
}

/// Parse `k=v k2 k3=a k3=b` into a map; repeated keys collect into a list.
pub fn input_map(s: &str) -> BTreeMap<String, Value> {
    let mut map: BTreeMap<String, Value> = BTreeMap::new();
    for term in s.split_whitespace() {
        let (key, value) = match term.split_once('=') {
            Some((k, v)) => (k.to_string(), Value::str(v)),
            None => (term.to_string(), Value::Null),
        };
        match map.remove(&key) {
            None => {
                map.insert(key, value);
            }
            Some(Value::List(mut items)) => {
                items.push(value);
                map.insert(key, Value::List(items));
            }
            Some(previous) => {
                map.insert(key, Value::List(vec![previous, value]));
            }
        }
    }
    map
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_kind_has_unique_field_names() {
        for kind in EntityKind::ALL {
            let mut seen = HashSet::new();
            for f in fields(kind) {
                assert!(seen.insert(f.name), "{} declares {} twice", kind, f.name);
            }
        }
    }

    #[test]
    fn test_name_validation() {
        assert!(validate_name(EntityKind::Distro, "fedora-40.x86_64").is_ok());
        assert!(validate_name(EntityKind::Distro, "bad name").is_err());
        assert!(validate_name(EntityKind::Distro, "").is_err());
    }

    #[test]
    fn test_enum_and_range() {
        assert_eq!(
            validate(EntityKind::Distro, "arch", Value::str("AARCH64")).unwrap(),
            Value::str("aarch64")
        );
        assert!(validate(EntityKind::Distro, "arch", Value::str("sparc")).is_err());
        assert_eq!(
            validate(EntityKind::Profile, "virt_cpus", Value::str("4")).unwrap(),
            Value::Int(4)
        );
        assert!(validate(EntityKind::Profile, "virt_cpus", Value::Int(0)).is_err());
        assert!(validate(EntityKind::Repo, "priority", Value::Int(100)).is_err());
    }

    #[test]
    fn test_inherit_only_on_inheritable() {
        assert_eq!(
            validate(EntityKind::Profile, "kernel_options", Value::Inherit).unwrap(),
            Value::Inherit
        );
        let err = validate(EntityKind::Repo, "mirror", Value::Inherit).unwrap_err();
        assert!(matches!(err, Error::Validation { .. }));
    }

    #[test]
    fn test_unknown_field() {
        let err = validate(EntityKind::Menu, "kernel", Value::str("x")).unwrap_err();
        assert!(matches!(err, Error::UnknownField { .. }));
    }

    #[test]
    fn test_string_inputs() {
        assert_eq!(
            validate(EntityKind::Repo, "rpm_list", Value::str("a, b c")).unwrap(),
            Value::str_list(["a", "b", "c"])
        );
        let map = validate(EntityKind::Distro, "kernel_options", Value::str("quiet console=tty0 console=ttyS0"))
            .unwrap();
        assert_eq!(map.to_string(), "console=tty0 console=ttyS0 quiet");
    }

    #[test]
    fn test_interface_normalization() {
        let value = Value::map([(
            "eth0",
            Value::map([
                ("mac_address", Value::str("AA-BB-CC-DD-EE-FF")),
                ("ip_address", Value::str("10.0.0.5")),
            ]),
        )]);
        let normalized = validate(EntityKind::System, "interfaces", value).unwrap();
        let eth0 = normalized.as_map().unwrap()["eth0"].as_map().unwrap();

        assert_eq!(eth0["mac_address"], Value::str("aa:bb:cc:dd:ee:ff"));
        assert_eq!(eth0["static"], Value::Bool(false));
        assert_eq!(eth0.len(), INTERFACE_FIELDS.len());
    }

    #[test]
    fn test_interface_rejects_bad_addresses() {
        let bad_ip = Value::map([("eth0", Value::map([("ip_address", Value::str("10.0.0.500"))]))]);
        assert!(validate(EntityKind::System, "interfaces", bad_ip).is_err());

        let bad_key = Value::map([("eth0", Value::map([("speed", Value::str("1G"))]))]);
        assert!(matches!(
            validate(EntityKind::System, "interfaces", bad_key),
            Err(Error::UnknownField { .. })
        ));
    }

    #[test]
    fn test_sticky_fields() {
        assert!(is_sticky("distro"));
        assert!(!is_sticky("profile"));
    }
}
