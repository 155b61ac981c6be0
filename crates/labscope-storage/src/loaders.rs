//! Read measurement files back into typed structures.

use std::collections::BTreeMap;
use std::path::Path;

use regex::Regex;
use serde_json::Value;
use tracing::warn;

use crate::document::{ArrayData, Document};
use crate::error::{StorageError, StorageResult};
use crate::file::StorageFormat;

/// Flattened settings: `<group>/<key>` and root attribute names.
pub type Settings = BTreeMap<String, Value>;

/// Read any supported file into memory.
pub fn read_document(path: &Path) -> StorageResult<Document> {
    match StorageFormat::from_path(path) {
        #[cfg(feature = "storage_json")]
        Some(StorageFormat::Json) => crate::json_file::JsonFile::read(path),
        #[cfg(feature = "storage_hdf5")]
        Some(StorageFormat::Hdf5) => crate::hdf5_file::Hdf5File::read(path),
        #[cfg(not(feature = "storage_json"))]
        Some(StorageFormat::Json) => Err(StorageError::BackendNotEnabled("storage_json")),
        #[cfg(not(feature = "storage_hdf5"))]
        Some(StorageFormat::Hdf5) => Err(StorageError::BackendNotEnabled("storage_hdf5")),
        None => Err(StorageError::UnsupportedFormat(path.to_path_buf())),
    }
}

/// The only group under `measurement`, else the root `measurement` attribute.
pub fn measurement_name_of(doc: &Document) -> Option<String> {
    let groups = doc.child_groups("measurement");
    if groups.len() == 1 {
        return groups.into_iter().next();
    }
    doc.root_attrs()?
        .get("measurement")?
        .as_str()
        .map(str::to_string)
}

pub fn measurement_name(path: &Path) -> StorageResult<String> {
    let doc = read_document(path)?;
    measurement_name_of(&doc).ok_or_else(|| StorageError::NoMeasurement(path.to_path_buf()))
}

/// Attributes of every `.../settings` group, keyed `<group>/<key>`, plus the
/// root attributes under their own names.
pub fn settings_of(doc: &Document) -> Settings {
    let mut settings = Settings::new();
    for (group, attrs) in &doc.attrs {
        let prefix = if group == "settings" {
            Some("")
        } else {
            group.strip_suffix("/settings")
        };
        if let Some(prefix) = prefix {
            for (key, value) in attrs {
                let name = if prefix.is_empty() {
                    key.clone()
                } else {
                    format!("{prefix}/{key}")
                };
                settings.insert(name, value.clone());
            }
        }
    }
    if let Some(root) = doc.root_attrs() {
        for (key, value) in root {
            settings.insert(key.clone(), value.clone());
        }
    }
    settings
}

/// Flattened settings of a file; empty for unsupported suffixes.
pub fn load_settings(path: &Path) -> StorageResult<Settings> {
    if StorageFormat::from_path(path).is_none() {
        return Ok(Settings::new());
    }
    Ok(settings_of(&read_document(path)?))
}

/// Translate a shell wildcard into an anchored regex.
///
/// Only `!` negates a `[...]` class; an unclosed `[` is literal.
fn wildcard_regex(pattern: &str) -> Result<Regex, regex::Error> {
    let chars: Vec<char> = pattern.chars().collect();
    let mut re = String::from("^");
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        i += 1;
        match c {
            '*' => re.push_str(".*"),
            '?' => re.push('.'),
            '[' => match class_end(&chars, i) {
                Some(end) => {
                    push_class(&mut re, &chars[i..end]);
                    i = end + 1;
                }
                None => re.push_str(r"\["),
            },
            other => re.push_str(&regex::escape(&other.to_string())),
        }
    }
    re.push('$');
    Regex::new(&re)
}

/// Index of the `]` closing a class whose body starts at `start`.
fn class_end(chars: &[char], start: usize) -> Option<usize> {
    let mut j = start;
    if chars.get(j) == Some(&'!') {
        j += 1;
    }
    // a leading `]` is a member
    if chars.get(j) == Some(&']') {
        j += 1;
    }
    chars[j.min(chars.len())..]
        .iter()
        .position(|&c| c == ']')
        .map(|p| j + p)
}

fn push_class(re: &mut String, body: &[char]) {
    re.push('[');
    let body = match body.split_first() {
        Some((&'!', rest)) => {
            re.push('^');
            rest
        }
        _ => body,
    };
    for &c in body {
        if matches!(c, '\\' | '[' | ']' | '^' | '&' | '~') {
            re.push('\\');
        }
        re.push(c);
    }
    re.push(']');
}

pub const DEFAULT_SETTINGS_PATTERN: &str = "measurement/*";

/// Entries whose key matches `pattern` (`*`, `?`, `[...]`, `[!...]`).
pub fn find_settings(settings: &Settings, pattern: &str) -> Settings {
    let re = match wildcard_regex(pattern) {
        Ok(re) => re,
        Err(e) => {
            warn!(pattern, "invalid settings pattern: {e}");
            return Settings::new();
        }
    };
    let matching: Settings = settings
        .iter()
        .filter(|(k, _)| re.is_match(k))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    if matching.is_empty() {
        warn!(pattern, "no matching key found");
    }
    matching
}

/// Samples of one number generator readout.
#[derive(Debug, Clone, PartialEq)]
pub struct NumberGenData {
    pub settings: Settings,
    pub y: Option<Vec<f64>>,
}

/// Result of a 2D slow scan.
#[derive(Debug, Clone, PartialEq)]
pub struct SlowScanData {
    pub settings: Settings,
    pub h_array: Option<Vec<f64>>,
    pub v_array: Option<Vec<f64>>,
    pub range_extent: Option<Vec<f64>>,
    pub scan_h_positions: Option<Vec<f64>>,
    pub scan_v_positions: Option<Vec<f64>>,
    pub scan_slow_move: Option<Vec<f64>>,
    /// `[pixels, 3]` rows of `(k, j, i)`.
    pub scan_index_array: Option<ArrayData>,
    /// `[n_frames, Nv, Nh, spectrum_len]`.
    pub signal_map: Option<ArrayData>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum LoadedMeasurement {
    NumberGenReadout(NumberGenData),
    NumberGenReadoutSimple(NumberGenData),
    NumberGenReadoutExtendable(NumberGenData),
    SlowScan2D(SlowScanData),
}

fn vector(doc: &Document, group: &str, name: &str) -> Option<Vec<f64>> {
    doc.dataset(&format!("{group}/{name}")).map(|a| a.data.clone())
}

fn array(doc: &Document, group: &str, name: &str) -> Option<ArrayData> {
    doc.dataset(&format!("{group}/{name}")).cloned()
}

/// Decode an in-memory file according to its measurement name.
pub fn load_document(doc: &Document) -> Option<LoadedMeasurement> {
    let name = measurement_name_of(doc)?;
    let group = format!("measurement/{name}");
    let settings = settings_of(doc);
    let number_gen = |settings| NumberGenData {
        settings,
        y: vector(doc, &group, "y"),
    };
    let loaded = match name.as_str() {
        "number_gen_readout" => LoadedMeasurement::NumberGenReadout(number_gen(settings)),
        "number_gen_readout_simple" => {
            LoadedMeasurement::NumberGenReadoutSimple(number_gen(settings))
        }
        "number_gen_readout_extendable_dataset" => {
            LoadedMeasurement::NumberGenReadoutExtendable(number_gen(settings))
        }
        "example_2d_scan" => LoadedMeasurement::SlowScan2D(SlowScanData {
            h_array: vector(doc, &group, "h_array"),
            v_array: vector(doc, &group, "v_array"),
            range_extent: vector(doc, &group, "range_extent"),
            scan_h_positions: vector(doc, &group, "scan_h_positions"),
            scan_v_positions: vector(doc, &group, "scan_v_positions"),
            scan_slow_move: vector(doc, &group, "scan_slow_move"),
            scan_index_array: array(doc, &group, "scan_index_array"),
            signal_map: array(doc, &group, "signal_map"),
            settings,
        }),
        _ => return None,
    };
    Some(loaded)
}

pub fn load(path: &Path) -> StorageResult<LoadedMeasurement> {
    let doc = read_document(path)?;
    load_document(&doc).ok_or_else(|| StorageError::NoMeasurement(path.to_path_buf()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Map};

    fn doc() -> Document {
        let mut doc = Document::default();
        let mut root = Map::new();
        root.insert("measurement".into(), json!("number_gen_readout"));
        root.insert("time_id".into(), json!(1700000000));
        doc.attrs.insert(String::new(), root);
        let mut hw = Map::new();
        hw.insert("amplitude".into(), json!(2.5));
        doc.attrs.insert("hardware/number_gen/settings".into(), hw);
        let mut m = Map::new();
        m.insert("N".into(), json!(101));
        m.insert("sampling_period".into(), json!(0.1));
        doc.attrs.insert("measurement/number_gen_readout/settings".into(), m);
        doc.datasets.insert(
            "measurement/number_gen_readout/y".into(),
            ArrayData::from_vec(vec![1.0, 2.0]),
        );
        doc
    }

    #[test]
    fn settings_are_flattened() {
        let s = settings_of(&doc());
        assert_eq!(s["hardware/number_gen/amplitude"], json!(2.5));
        assert_eq!(s["measurement/number_gen_readout/N"], json!(101));
        assert_eq!(s["measurement"], json!("number_gen_readout"));
        assert_eq!(s["time_id"], json!(1700000000));
    }

    #[test]
    fn wildcard_patterns() {
        let s = settings_of(&doc());
        let m = find_settings(&s, DEFAULT_SETTINGS_PATTERN);
        assert_eq!(m.len(), 2);
        assert!(m.contains_key("measurement/number_gen_readout/sampling_period"));

        let m = find_settings(&s, "hardware/*/amplitud?");
        assert_eq!(m.len(), 1);
        let m = find_settings(&s, "measurement/number_gen_readout/[NS]");
        assert_eq!(m.keys().collect::<Vec<_>>(), vec!["measurement/number_gen_readout/N"]);
        let m = find_settings(&s, "[!m]*");
        assert!(m.contains_key("time_id"));
        assert!(!m.contains_key("measurement"));
        assert!(find_settings(&s, "nothing*").is_empty());
        // dots are literal
        assert!(find_settings(&s, "time.id").is_empty());

        // `^` inside a class is a member, not a negation
        let m = find_settings(&s, "[^m]*");
        assert!(m.contains_key("measurement"));
        assert!(!m.contains_key("time_id"));
        let m = find_settings(&s, "[^t]ime_id");
        assert_eq!(m.keys().collect::<Vec<_>>(), vec!["time_id"]);
        let re = wildcard_regex("a[!^]b").unwrap();
        assert!(re.is_match("axb"));
        assert!(!re.is_match("a^b"));
        // unclosed bracket stays literal, the rest still expands
        let re = wildcard_regex("a[*").unwrap();
        assert!(re.is_match("a[xyz"));
        assert!(!re.is_match("axyz"));
        assert!(wildcard_regex("[]]").unwrap().is_match("]"));
    }

    #[test]
    fn name_falls_back_to_root_attr() {
        let mut d = doc();
        assert_eq!(measurement_name_of(&d).as_deref(), Some("number_gen_readout"));
        d.datasets
            .insert("measurement/other/y".into(), ArrayData::from_vec(vec![]));
        assert_eq!(measurement_name_of(&d).as_deref(), Some("number_gen_readout"));
        d.attrs.remove("");
        assert_eq!(measurement_name_of(&d), None);
    }

    #[test]
    fn dispatch_on_name() {
        match load_document(&doc()).unwrap() {
            LoadedMeasurement::NumberGenReadout(data) => {
                assert_eq!(data.y, Some(vec![1.0, 2.0]));
                assert_eq!(data.settings["measurement/number_gen_readout/N"], json!(101));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn unknown_suffix_gives_empty_settings() {
        assert!(load_settings(Path::new("data.csv")).unwrap().is_empty());
    }
}
