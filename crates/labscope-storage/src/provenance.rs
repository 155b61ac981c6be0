//! Settings snapshot written at the top of every measurement file.

use std::collections::BTreeMap;
use std::path::Path;

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::info;

use crate::error::StorageResult;
use crate::file::{create_file, measurement_file_name, MeasurementFile, StorageFormat};

/// Application, hardware and measurement settings at the start of a run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Provenance {
    pub app: Map<String, Value>,
    /// Settings per hardware component name.
    pub hardware: BTreeMap<String, Map<String, Value>>,
    pub measurement_name: String,
    pub measurement: Map<String, Value>,
}

impl Provenance {
    pub fn new(measurement_name: impl Into<String>) -> Self {
        Self {
            measurement_name: measurement_name.into(),
            ..Default::default()
        }
    }

    /// Group holding the measurement's datasets.
    pub fn measurement_group(&self) -> String {
        format!("measurement/{}", self.measurement_name)
    }

    /// Write root attrs and all settings groups.
    pub fn write_to(
        &self,
        file: &mut dyn MeasurementFile,
        time: DateTime<Local>,
    ) -> StorageResult<()> {
        file.set_attr("", "time_id", json!(time.timestamp()))?;
        file.set_attr("", "measurement", json!(self.measurement_name))?;
        file.write_settings("app", &self.app)?;
        for (name, settings) in &self.hardware {
            file.write_settings(&format!("hardware/{name}"), settings)?;
        }
        file.write_settings(&self.measurement_group(), &self.measurement)?;
        Ok(())
    }
}

/// Create `<dir>/<timestamp>_<measurement>.<ext>` and write the provenance.
pub fn open_measurement_file(
    dir: &Path,
    format: StorageFormat,
    provenance: &Provenance,
) -> StorageResult<Box<dyn MeasurementFile>> {
    let now = Local::now();
    let path = dir.join(measurement_file_name(now, &provenance.measurement_name, format));
    let mut file = create_file(&path, format)?;
    provenance.write_to(file.as_mut(), now)?;
    file.flush()?;
    info!(
        path = %path.display(),
        measurement = %provenance.measurement_name,
        "Opened measurement file"
    );
    Ok(file)
}

#[cfg(all(test, feature = "storage_json"))]
mod tests {
    use super::*;
    use crate::json_file::JsonFile;
    use tempfile::TempDir;

    #[test]
    fn provenance_groups() {
        let dir = TempDir::new().unwrap();
        let mut prov = Provenance::new("number_gen_readout");
        prov.app.insert("save_dir".into(), json!("/data"));
        let mut hw = Map::new();
        hw.insert("amplitude".into(), json!(1.0));
        prov.hardware.insert("number_gen".into(), hw);
        prov.measurement.insert("N".into(), json!(101));

        let file = open_measurement_file(dir.path(), StorageFormat::Json, &prov).unwrap();
        let path = file.path().to_path_buf();
        assert!(path
            .file_name()
            .unwrap()
            .to_string_lossy()
            .ends_with("_number_gen_readout.json"));
        drop(file);

        let doc = JsonFile::read(&path).unwrap();
        let root = doc.root_attrs().unwrap();
        assert_eq!(root["measurement"], json!("number_gen_readout"));
        assert!(root["time_id"].as_i64().unwrap() > 0);
        assert_eq!(doc.attrs["app/settings"]["save_dir"], json!("/data"));
        assert_eq!(doc.attrs["hardware/number_gen/settings"]["amplitude"], json!(1.0));
        assert_eq!(
            doc.attrs["measurement/number_gen_readout/settings"]["N"],
            json!(101)
        );
    }
}
