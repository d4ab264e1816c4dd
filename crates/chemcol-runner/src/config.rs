use crate::error::ControllerError;
use crate::grid::Grid;
use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunType {
    Initial,
    Reuse,
    Plan,
    ExportOnly,
}

impl RunType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunType::Initial => "initial",
            RunType::Reuse => "reuse",
            RunType::Plan => "plan",
            RunType::ExportOnly => "export_only",
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BackendConfig {
    /// Program and leading arguments; the artifact path is appended.
    #[serde(default)]
    pub command: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GridConfig {
    pub layer: u32,
    pub dims: String,
}

impl Default for GridConfig {
    fn default() -> Self {
        Self {
            layer: 2,
            dims: "world.atmosphereDim".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InputFiles {
    pub base_parameters: String,
    pub global_parameters: String,
    pub directories: String,
    pub populator: String,
    pub ignore_list: String,
}

impl Default for InputFiles {
    fn default() -> Self {
        Self {
            base_parameters: "base-parameters.txt".to_string(),
            global_parameters: "global-parameters.json".to_string(),
            directories: "directories.json".to_string(),
            populator: "populator.json".to_string(),
            ignore_list: "ignore-list.txt".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfigKeys {
    pub run_id: String,
    pub run_type: String,
    pub out_name: String,
    pub rebuild: String,
    pub initial_condition: Vec<String>,
    pub previous_result_value: String,
    pub modified_result_value: String,
    pub previous_result_path: String,
    pub override_path: String,
}

impl Default for ConfigKeys {
    fn default() -> Self {
        Self {
            run_id: "run_num".to_string(),
            run_type: "run_type".to_string(),
            out_name: "out_name".to_string(),
            rebuild: "remake_chem_funs".to_string(),
            initial_condition: vec!["ini_mix".to_string(), "atm_type".to_string()],
            previous_result_value: "previous_result".to_string(),
            modified_result_value: "previous_result_modified".to_string(),
            previous_result_path: "prev_result_path".to_string(),
            override_path: "column_override_path".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControllerConfig {
    pub master_dir: PathBuf,
    pub input_dir: PathBuf,
    pub output_dir: PathBuf,
    #[serde(default)]
    pub framework_dir: Option<PathBuf>,
    #[serde(default)]
    pub backend: BackendConfig,
    /// Fixed location some backends read their configuration from; the
    /// artifact is copied there before each execution when set.
    #[serde(default)]
    pub working_slot: Option<PathBuf>,
    #[serde(default)]
    pub grid: GridConfig,
    #[serde(default = "default_result_extension")]
    pub result_extension: String,
    #[serde(default)]
    pub inputs: InputFiles,
    #[serde(default)]
    pub keys: ConfigKeys,
    /// Variable name -> `outer.inner` global parameter, pinned after every
    /// override (e.g. the boundary pressure shared with a sibling module).
    #[serde(default)]
    pub global_links: BTreeMap<String, String>,
}

fn default_result_extension() -> String {
    "json".to_string()
}

impl ControllerConfig {
    pub fn new(master_dir: &Path, input_dir: &Path, output_dir: &Path) -> Self {
        Self {
            master_dir: master_dir.to_path_buf(),
            input_dir: input_dir.to_path_buf(),
            output_dir: output_dir.to_path_buf(),
            framework_dir: None,
            backend: BackendConfig::default(),
            working_slot: None,
            grid: GridConfig::default(),
            result_extension: default_result_extension(),
            inputs: InputFiles::default(),
            keys: ConfigKeys::default(),
            global_links: BTreeMap::new(),
        }
    }

    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(ControllerError::MissingInput {
                path: path.to_path_buf(),
            }
            .into());
        }
        let raw = fs::read_to_string(path)
            .with_context(|| format!("read controller config {}", path.display()))?;
        let mut cfg: ControllerConfig = serde_yaml::from_str(&raw)
            .with_context(|| format!("parse controller config {}", path.display()))?;
        let base = path.parent().unwrap_or(Path::new("."));
        cfg.master_dir = resolve(base, &cfg.master_dir);
        cfg.input_dir = resolve(base, &cfg.input_dir);
        cfg.output_dir = resolve(base, &cfg.output_dir);
        cfg.framework_dir = cfg.framework_dir.map(|p| resolve(base, &p));
        cfg.working_slot = cfg.working_slot.map(|p| resolve(base, &p));
        Ok(cfg)
    }

    pub fn framework_dir(&self) -> PathBuf {
        self.framework_dir
            .clone()
            .unwrap_or_else(|| self.master_dir.join("framework"))
    }

    pub fn runtime_dir(&self) -> PathBuf {
        self.output_dir.join("runtime")
    }

    pub fn ledger_path(&self) -> PathBuf {
        self.runtime_dir().join("run-ledger.txt")
    }

    pub fn index_path(&self) -> PathBuf {
        self.runtime_dir().join("run-index.jsonl")
    }

    pub fn input_path(&self, name: &str) -> PathBuf {
        self.input_dir.join(name)
    }
}

fn resolve(base: &Path, p: &Path) -> PathBuf {
    if p.is_absolute() {
        p.to_path_buf()
    } else {
        base.join(p)
    }
}

pub type GlobalParameters = BTreeMap<String, BTreeMap<String, Value>>;

#[derive(Debug, Clone)]
pub struct Inputs {
    pub base_parameters: String,
    pub global_parameters: GlobalParameters,
    pub directories: BTreeMap<String, BTreeMap<String, String>>,
    pub populator: BTreeMap<String, BTreeMap<String, Value>>,
    pub ignore_list: Vec<String>,
}

impl Inputs {
    pub fn load(cfg: &ControllerConfig) -> Result<Self> {
        let base_parameters = read_required(&cfg.input_path(&cfg.inputs.base_parameters))?;
        let global_parameters = read_json(&cfg.input_path(&cfg.inputs.global_parameters))?;
        let directories = read_json(&cfg.input_path(&cfg.inputs.directories))?;
        let populator = read_json(&cfg.input_path(&cfg.inputs.populator))?;
        let ignore_list = read_required(&cfg.input_path(&cfg.inputs.ignore_list))?
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect();
        Ok(Self {
            base_parameters,
            global_parameters,
            directories,
            populator,
            ignore_list,
        })
    }

    pub fn global(&self, reference: &str) -> Option<&Value> {
        let (outer, inner) = reference.split_once('.')?;
        self.global_parameters.get(outer)?.get(inner)
    }

    /// World dimensions: `[n]` is square, `[nx, ny, ..]` uses the first two.
    pub fn grid(&self, cfg: &GridConfig) -> Result<Grid> {
        let dims = self.global(&cfg.dims).ok_or_else(|| ControllerError::InvalidParameter {
            name: cfg.dims.clone(),
            reason: "world dimensions missing from global parameters".to_string(),
        })?;
        let as_dim = |v: &Value| {
            v.as_u64()
                .and_then(|n| u32::try_from(n).ok())
                .ok_or_else(|| anyhow!("dimension {} is not a non-negative integer", v))
        };
        let (nx, ny) = match dims {
            Value::Array(items) => match items.as_slice() {
                [n] => (as_dim(n)?, as_dim(n)?),
                [nx, ny, ..] => (as_dim(nx)?, as_dim(ny)?),
                [] => {
                    return Err(ControllerError::InvalidParameter {
                        name: cfg.dims.clone(),
                        reason: "empty dimension list".to_string(),
                    }
                    .into())
                }
            },
            other => {
                let n = as_dim(other)?;
                (n, n)
            }
        };
        Ok(Grid::new(cfg.layer, nx, ny)?)
    }
}

pub(crate) fn read_required(path: &Path) -> Result<String> {
    if !path.exists() {
        return Err(ControllerError::MissingInput {
            path: path.to_path_buf(),
        }
        .into());
    }
    fs::read_to_string(path).with_context(|| format!("read {}", path.display()))
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let raw = read_required(path)?;
    serde_json::from_str(&raw).with_context(|| format!("parse {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn inputs_with(dims: Value) -> Inputs {
        let mut world = BTreeMap::new();
        world.insert("atmosphereDim".to_string(), dims);
        let mut global_parameters = BTreeMap::new();
        global_parameters.insert("world".to_string(), world);
        Inputs {
            base_parameters: String::new(),
            global_parameters,
            directories: BTreeMap::new(),
            populator: BTreeMap::new(),
            ignore_list: vec![],
        }
    }

    #[test]
    fn grid_dimensions_accept_square_and_rectangular() {
        let cfg = GridConfig::default();
        let g = inputs_with(json!([3])).grid(&cfg).unwrap();
        assert_eq!((g.nx, g.ny), (3, 3));
        let g = inputs_with(json!([2, 4, 1])).grid(&cfg).unwrap();
        assert_eq!((g.nx, g.ny), (2, 4));
        assert!(inputs_with(json!([-1])).grid(&cfg).is_err());
        assert!(inputs_with(json!([])).grid(&cfg).is_err());
    }

    #[test]
    fn yaml_paths_resolve_against_config_dir() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("controller.yaml");
        fs::write(
            &path,
            "master_dir: .\ninput_dir: input\noutput_dir: /abs/output\nbackend:\n  command: [solver, --quiet]\nkeys:\n  run_id: run_id\n",
        )
        .unwrap();
        let cfg = ControllerConfig::load(&path).unwrap();
        assert_eq!(cfg.input_dir, dir.path().join("input"));
        assert_eq!(cfg.output_dir, PathBuf::from("/abs/output"));
        assert_eq!(cfg.backend.command, vec!["solver", "--quiet"]);
        assert_eq!(cfg.keys.run_id, "run_id");
        assert_eq!(cfg.keys.out_name, "out_name");
        assert_eq!(cfg.result_extension, "json");
        assert_eq!(cfg.ledger_path(), PathBuf::from("/abs/output/runtime/run-ledger.txt"));
    }

    #[test]
    fn missing_inputs_fail_fast() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = ControllerConfig::new(dir.path(), dir.path(), dir.path());
        let err = Inputs::load(&cfg).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ControllerError>(),
            Some(ControllerError::MissingInput { .. })
        ));
    }
}
