//! # A111 register catalog
//!
//! The module's register map is packaged as YAML (`regmap.yaml`) and parsed
//! once per process on first use. After that it is a read-only table shared
//! by every client.
//!
//! Register names are not unique: mode specific registers reuse names and
//! addresses across service modes, so lookups take an optional [`Mode`] to
//! scope the search.

use log::debug;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::OnceLock;

use crate::a111::Mode;
use crate::error::RegisterError;

pub mod codec;

pub use codec::{decode, encode, Value};

const REGMAP_SOURCE: &str = include_str!("regmap.yaml");

static CATALOG: OnceLock<Result<Catalog, String>> = OnceLock::new();
static STATUS_TABLE: OnceLock<Result<StatusTable, String>> = OnceLock::new();

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum Access {
    #[serde(rename = "r")]
    Read,
    #[serde(rename = "w")]
    Write,
    #[serde(rename = "rw")]
    ReadWrite,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    U32,
    I32,
    Bool,
    Enum,
    Bitset,
}

#[derive(Debug, Deserialize)]
struct CatalogFile {
    registers: Vec<RawRegister>,
}

#[derive(Debug, Deserialize)]
struct RawRegister {
    name: String,
    address: u8,
    access: Access,
    #[serde(rename = "type")]
    data_type: DataType,
    #[serde(default)]
    float_scale: Option<f64>,
    #[serde(default)]
    modes: Option<Vec<Mode>>,
    #[serde(default, rename = "enum")]
    variants: BTreeMap<String, u32>,
    #[serde(default)]
    bitset: BTreeMap<String, u32>,
    #[serde(default)]
    remap: BTreeMap<String, String>,
}

/// One addressable 32-bit register.
#[derive(Debug, Clone, PartialEq)]
pub struct Register {
    pub name: String,
    pub address: u8,
    pub access: Access,
    pub data_type: DataType,
    /// Wire value is `round(value * float_scale)`.
    pub float_scale: Option<f64>,
    /// Service modes the register belongs to; `None` means all of them.
    pub modes: Option<Vec<Mode>>,
    /// Enum variant names and codes, sorted by code.
    pub variants: Vec<(String, u32)>,
    /// Bitset flag names and masks, sorted by mask.
    pub flags: Vec<(String, u32)>,
    /// Alternative enum names accepted on encode.
    pub remap: BTreeMap<String, String>,
}

impl Register {
    pub fn applies_to(&self, mode: Mode) -> bool {
        match &self.modes {
            Some(modes) => modes.contains(&mode),
            None => true,
        }
    }

    pub fn is_readable(&self) -> bool {
        matches!(self.access, Access::Read | Access::ReadWrite)
    }

    pub fn is_writable(&self) -> bool {
        matches!(self.access, Access::Write | Access::ReadWrite)
    }

    pub fn variant_code(&self, name: &str) -> Option<u32> {
        let name = self.remap.get(name).map(String::as_str).unwrap_or(name);
        self.variants.iter().find(|(n, _)| n == name).map(|(_, c)| *c)
    }

    pub fn variant_name(&self, code: u32) -> Option<&str> {
        self.variants
            .iter()
            .find(|(_, c)| *c == code)
            .map(|(n, _)| n.as_str())
    }

    pub fn flag_mask(&self, name: &str) -> Option<u32> {
        self.flags.iter().find(|(n, _)| n == name).map(|(_, m)| *m)
    }

    fn from_raw(raw: RawRegister) -> Result<Self, RegisterError> {
        match raw.data_type {
            DataType::Enum if raw.variants.is_empty() => {
                return Err(RegisterError::Catalog(format!("enum register {} has no variants", raw.name)))
            }
            DataType::Bitset if raw.bitset.is_empty() => {
                return Err(RegisterError::Catalog(format!("bitset register {} has no flags", raw.name)))
            }
            _ => {}
        }
        if let Some(scale) = raw.float_scale {
            if !(scale > 0.0 && scale.is_finite()) {
                return Err(RegisterError::Catalog(format!(
                    "register {} has invalid float scale {}",
                    raw.name, scale
                )));
            }
        }
        for target in raw.remap.values() {
            if !raw.variants.contains_key(target) {
                return Err(RegisterError::Catalog(format!(
                    "register {} remaps to unknown variant {}",
                    raw.name, target
                )));
            }
        }
        let mut variants: Vec<(String, u32)> = raw.variants.into_iter().collect();
        variants.sort_by_key(|(_, c)| *c);
        let mut flags: Vec<(String, u32)> = raw.bitset.into_iter().collect();
        flags.sort_by_key(|(_, m)| *m);
        Ok(Self {
            name: raw.name,
            address: raw.address,
            access: raw.access,
            data_type: raw.data_type,
            float_scale: raw.float_scale,
            modes: raw.modes,
            variants,
            flags,
            remap: raw.remap,
        })
    }
}

/// Register lookup key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegKey<'a> {
    Name(&'a str),
    Address(u8),
}

impl<'a> From<&'a str> for RegKey<'a> {
    fn from(name: &'a str) -> Self {
        RegKey::Name(name)
    }
}

impl From<u8> for RegKey<'_> {
    fn from(address: u8) -> Self {
        RegKey::Address(address)
    }
}

impl fmt::Display for RegKey<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegKey::Name(n) => f.write_str(n),
            RegKey::Address(a) => write!(f, "0x{:02X}", a),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Catalog {
    registers: Vec<Register>,
}

impl Catalog {
    pub fn parse(yaml: &str) -> Result<Self, RegisterError> {
        let file: CatalogFile =
            serde_yaml::from_str(yaml).map_err(|e| RegisterError::Catalog(e.to_string()))?;
        let registers = file
            .registers
            .into_iter()
            .map(Register::from_raw)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { registers })
    }

    pub fn iter(&self) -> impl Iterator<Item = &Register> {
        self.registers.iter()
    }

    pub fn len(&self) -> usize {
        self.registers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registers.is_empty()
    }

    /// Resolve a register by name or address, scoped to `mode` when given.
    ///
    /// More than one match is an error; pass a mode to disambiguate.
    pub fn lookup<'k, K: Into<RegKey<'k>>>(
        &self,
        key: K,
        mode: Option<Mode>,
    ) -> Result<&Register, RegisterError> {
        let key = key.into();
        let matches: Vec<&Register> = self
            .registers
            .iter()
            .filter(|r| match key {
                RegKey::Name(n) => r.name == n,
                RegKey::Address(a) => r.address == a,
            })
            .filter(|r| mode.map_or(true, |m| r.applies_to(m)))
            .collect();
        match matches.as_slice() {
            [] => Err(RegisterError::Unknown(match mode {
                Some(m) => format!("{} (mode {})", key, m),
                None => key.to_string(),
            })),
            [one] => Ok(one),
            many => Err(RegisterError::Ambiguous {
                key: key.to_string(),
                candidates: many
                    .iter()
                    .map(|r| match &r.modes {
                        Some(modes) => format!(
                            "{}@0x{:02X} [{}]",
                            r.name,
                            r.address,
                            modes.iter().map(|m| m.as_str()).collect::<Vec<_>>().join(",")
                        ),
                        None => format!("{}@0x{:02X}", r.name, r.address),
                    })
                    .collect(),
            }),
        }
    }
}

/// The packaged register catalog, parsed on first use.
pub fn catalog() -> Result<&'static Catalog, RegisterError> {
    let parsed = CATALOG.get_or_init(|| {
        let result = Catalog::parse(REGMAP_SOURCE).map_err(|e| e.to_string());
        if let Ok(c) = &result {
            debug!("Loaded register catalog with {} registers", c.len());
        }
        result
    });
    parsed.as_ref().map_err(|e| RegisterError::Catalog(e.clone()))
}

/// Shorthand for `catalog()?.lookup(key, mode)`.
pub fn lookup<'k, K: Into<RegKey<'k>>>(key: K, mode: Option<Mode>) -> Result<&'static Register, RegisterError> {
    catalog()?.lookup(key, mode)
}

/// Masks of the status register, derived once from the catalog.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusTable {
    pub address: u8,
    pub created: u32,
    pub activated: u32,
    pub data_ready: u32,
    /// Union of every `error_*` flag.
    pub error_mask: u32,
    errors: Vec<(String, u32)>,
}

impl StatusTable {
    fn from_catalog(catalog: &Catalog) -> Result<Self, RegisterError> {
        let reg = catalog.lookup("status", None)?;
        let mask = |name: &str| {
            reg.flag_mask(name)
                .ok_or_else(|| RegisterError::Catalog(format!("status register lacks flag {}", name)))
        };
        let errors: Vec<(String, u32)> = reg
            .flags
            .iter()
            .filter(|(n, _)| n.starts_with("error_"))
            .cloned()
            .collect();
        Ok(Self {
            address: reg.address,
            created: mask("created")?,
            activated: mask("activated")?,
            data_ready: mask("data_ready")?,
            error_mask: errors.iter().fold(0, |acc, (_, m)| acc | m),
            errors,
        })
    }

    pub fn has_error(&self, bits: u32) -> bool {
        bits & self.error_mask != 0
    }

    /// Names of the error flags set in `bits`.
    pub fn errors(&self, bits: u32) -> Vec<&str> {
        self.errors
            .iter()
            .filter(|(_, m)| bits & m != 0)
            .map(|(n, _)| n.as_str())
            .collect()
    }
}

pub fn status_table() -> Result<&'static StatusTable, RegisterError> {
    let table = STATUS_TABLE.get_or_init(|| {
        catalog()
            .and_then(StatusTable::from_catalog)
            .map_err(|e| e.to_string())
    });
    table.as_ref().map_err(|e| RegisterError::Catalog(e.clone()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn packaged_catalog_loads() {
        let cat = catalog().unwrap();
        assert!(cat.len() > 30);
        let reg = cat.lookup("product_id", None).unwrap();
        assert_eq!(reg.address, 0x10);
        assert!(reg.is_readable());
        assert!(!reg.is_writable());
    }

    #[test]
    fn ambiguous_name_needs_a_mode() {
        let cat = catalog().unwrap();
        match cat.lookup("sampling_mode", None) {
            Err(RegisterError::Ambiguous { candidates, .. }) => assert_eq!(candidates.len(), 2),
            other => panic!("expected ambiguity, got {:?}", other),
        }
        assert_eq!(cat.lookup("sampling_mode", Some(Mode::Iq)).unwrap().address, 0x42);
        assert_eq!(cat.lookup("sampling_mode", Some(Mode::Sparse)).unwrap().address, 0x43);
    }

    #[test]
    fn shared_address_resolves_per_mode() {
        let cat = catalog().unwrap();
        assert!(matches!(cat.lookup(0x40u8, None), Err(RegisterError::Ambiguous { .. })));
        assert_eq!(cat.lookup(0x40u8, Some(Mode::Sparse)).unwrap().name, "sweeps_per_frame");
        assert_eq!(cat.lookup(0x02u8, None).unwrap().name, "mode_selection");
    }

    #[test]
    fn mode_scoped_miss_is_unknown() {
        let cat = catalog().unwrap();
        assert!(matches!(
            cat.lookup("sweeps_per_frame", Some(Mode::Envelope)),
            Err(RegisterError::Unknown(_))
        ));
        assert!(matches!(cat.lookup("no_such_register", None), Err(RegisterError::Unknown(_))));
    }

    #[test]
    fn status_table_collects_error_flags() {
        let table = status_table().unwrap();
        assert_eq!(table.created, 0x1);
        assert_eq!(table.data_ready, 0x4);
        assert_eq!(table.error_mask, 0x1F0000);
        assert!(!table.has_error(0x3));
        assert_eq!(table.errors(0x40001), vec!["error_creation"]);
    }

    #[test]
    fn malformed_catalog_is_reported() {
        assert!(matches!(Catalog::parse("registers: 5"), Err(RegisterError::Catalog(_))));
        let bad_remap = "registers:\n  - name: x\n    address: 1\n    access: rw\n    type: enum\n    enum: { a: 0 }\n    remap: { b: c }\n";
        assert!(matches!(Catalog::parse(bad_remap), Err(RegisterError::Catalog(_))));
    }
}
