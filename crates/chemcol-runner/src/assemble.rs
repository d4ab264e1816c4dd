//! Build one column's configuration artifact from the layered sources.
//!
//! Precedence, later wins: base file, global parameters, directories,
//! run-type derived values, controller overrides, populator (initial runs),
//! cross-module imports (reuse runs). Global links and the rebuild flag are
//! pinned last.

use crate::artifact::ConfigArtifact;
use crate::config::{ControllerConfig, Inputs, RunType};
use crate::error::ControllerError;
use crate::fsutil::{atomic_write_bytes, atomic_write_json_pretty};
use crate::grid::Column;
use crate::literal::{parse_literal, Literal};
use crate::run::{RunId, RunPaths};
use crate::translate::{import_override_value, ExternalColumn, ImportMap};
use anyhow::Result;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Column-specific initial-condition changes from a collaborating module,
/// already in backend units. Written next to the artifact, never inlined.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnOverride {
    pub path: PathBuf,
    pub values: BTreeMap<String, Value>,
}

#[derive(Debug, Clone)]
pub struct Assembled {
    pub run_id: RunId,
    pub column: Column,
    pub artifact: ConfigArtifact,
    pub paths: RunPaths,
    pub column_override: Option<ColumnOverride>,
}

impl Assembled {
    pub fn config_path(&self) -> PathBuf {
        self.paths.config(&self.run_id)
    }

    pub fn result_path(&self) -> PathBuf {
        self.paths.result(&self.run_id)
    }
}

#[derive(Debug, Clone)]
pub struct Assembler {
    cfg: ControllerConfig,
    inputs: Inputs,
    run_type: RunType,
    overrides: BTreeMap<String, Literal>,
    imports: ImportMap,
}

impl Assembler {
    pub fn new(
        cfg: ControllerConfig,
        inputs: Inputs,
        run_type: RunType,
        overrides: BTreeMap<String, Literal>,
        imports: ImportMap,
    ) -> Self {
        Self {
            cfg,
            inputs,
            run_type,
            overrides,
            imports,
        }
    }

    /// `index` is the column's position in the pass; only the first column
    /// may rebuild the backend's derived code.
    pub fn assemble(&self, run: &RunId, column: &Column, index: usize) -> Result<Assembled> {
        let keys = &self.cfg.keys;
        let mut artifact = ConfigArtifact::parse(&self.inputs.base_parameters);

        artifact.push_section("global parameters - auto generated");
        for (outer, inner) in &self.inputs.global_parameters {
            for (name, value) in inner {
                let var = format!("{}_{}", outer, name);
                let literal = to_literal(&var, value)?;
                artifact.set_literal(&var, &literal);
            }
        }

        artifact.push_section("directories - auto generated");
        self.write_directories(&mut artifact)?;

        artifact.push_section("column properties - auto generated");
        artifact.set_literal(&keys.run_type, &Literal::Str(self.run_type.as_str().to_string()));
        artifact.set_literal(&keys.run_id, &Literal::Str(run.to_string()));

        let out_name = self.out_name(&artifact)?;
        let paths = RunPaths {
            runtime_dir: self.cfg.runtime_dir(),
            out_name,
            result_extension: self.cfg.result_extension.clone(),
        };

        artifact.push_section("overrides - auto generated");
        if self.run_type == RunType::Reuse {
            let previous = run.previous().ok_or_else(|| ControllerError::InvalidParameter {
                name: keys.previous_result_path.clone(),
                reason: format!("run {} has no previous generation to continue from", run),
            })?;
            self.set_initial_condition(&mut artifact, &keys.previous_result_value);
            artifact.set_literal(
                &keys.previous_result_path,
                &path_literal(&paths.result(&previous)),
            );
        }

        for (name, value) in &self.overrides {
            artifact.set_literal(name, value);
        }

        let mut column_override = None;
        match self.run_type {
            RunType::Initial => {
                let position = column.position_code();
                for (positions, vars) in &self.inputs.populator {
                    if positions.split(',').any(|p| p.trim() == position) {
                        for (name, value) in vars {
                            artifact.set_literal(name, &to_literal(name, value)?);
                        }
                    }
                }
            }
            RunType::Reuse => {
                if let Some(values) = self.imports.get(&ExternalColumn::from(*column)) {
                    let translated: BTreeMap<String, Value> = values
                        .iter()
                        .map(|(k, v)| (k.clone(), import_override_value(k, v)))
                        .collect();
                    let path = paths.column_override(run);
                    artifact.set_literal(&keys.override_path, &path_literal(&path));
                    self.set_initial_condition(&mut artifact, &keys.modified_result_value);
                    column_override = Some(ColumnOverride {
                        path,
                        values: translated,
                    });
                }
            }
            RunType::Plan | RunType::ExportOnly => {}
        }

        for (name, reference) in &self.cfg.global_links {
            let value = self.inputs.global(reference).ok_or_else(|| {
                ControllerError::InvalidParameter {
                    name: name.clone(),
                    reason: format!("global parameter {} not found", reference),
                }
            })?;
            artifact.set_literal(name, &to_literal(name, value)?);
        }

        if index != 0 {
            artifact.set_literal(&keys.rebuild, &Literal::Bool(false));
        }

        Ok(Assembled {
            run_id: run.clone(),
            column: *column,
            artifact,
            paths,
            column_override,
        })
    }

    pub fn persist(&self, assembled: &Assembled) -> Result<PathBuf> {
        if let Some(ov) = &assembled.column_override {
            atomic_write_json_pretty(&ov.path, &ov.values)?;
        }
        let path = assembled.config_path();
        atomic_write_bytes(&path, assembled.artifact.render().as_bytes())?;
        Ok(path)
    }

    fn write_directories(&self, artifact: &mut ConfigArtifact) -> Result<()> {
        let framework_dir = self.cfg.framework_dir();
        let runtime_dir = self.cfg.runtime_dir();
        let fixed = [
            ("master_dir", self.cfg.master_dir.clone()),
            ("input_dir", self.cfg.input_dir.clone()),
            ("output_dir", self.cfg.output_dir.clone()),
            ("framework_dir", framework_dir.clone()),
            ("runtime_dir", runtime_dir),
            ("runtime_log", self.cfg.ledger_path()),
        ];
        for (name, path) in fixed {
            artifact.set_literal(name, &path_literal(&path));
        }
        for (section, entries) in &self.inputs.directories {
            let root = match section.as_str() {
                "framework" => framework_dir.as_path(),
                "input" => self.cfg.input_dir.as_path(),
                "output" => self.cfg.output_dir.as_path(),
                other => {
                    return Err(ControllerError::InvalidParameter {
                        name: other.to_string(),
                        reason: "directory section must be framework, input or output"
                            .to_string(),
                    }
                    .into())
                }
            };
            for (name, relative) in entries {
                artifact.set_literal(name, &path_literal(&root.join(relative)));
            }
        }
        Ok(())
    }

    fn out_name(&self, artifact: &ConfigArtifact) -> Result<String> {
        let key = &self.cfg.keys.out_name;
        let missing = || ControllerError::MissingVariable {
            name: key.clone(),
            path: self.cfg.input_path(&self.cfg.inputs.base_parameters),
        };
        let raw = artifact.get(key).ok_or_else(missing)?;
        match parse_literal(raw) {
            Ok(Literal::Str(name)) if !name.is_empty() => Ok(name),
            _ => Err(ControllerError::InvalidParameter {
                name: key.clone(),
                reason: format!("expected a non-empty quoted string, found {}", raw),
            }
            .into()),
        }
    }

    fn set_initial_condition(&self, artifact: &mut ConfigArtifact, value: &str) {
        for key in &self.cfg.keys.initial_condition {
            artifact.set_literal(key, &Literal::Str(value.to_string()));
        }
    }
}

fn to_literal(name: &str, value: &Value) -> Result<Literal> {
    Literal::try_from(value).map_err(|reason| {
        ControllerError::InvalidParameter {
            name: name.to_string(),
            reason,
        }
        .into()
    })
}

fn path_literal(path: &Path) -> Literal {
    Literal::Str(path.to_string_lossy().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::Grid;
    use serde_json::json;

    fn inputs() -> Inputs {
        let globals: crate::config::GlobalParameters = serde_json::from_value(json!({
            "world": {"atmosphereDim": [3]},
            "boundary": {"boundPress": 1e4}
        }))
        .unwrap();
        Inputs {
            base_parameters: "out_name = 'HD189'\nremake_chem_funs = True\nini_mix = 'EQ'\natm_type = 'file'\nT_top = 1000\n"
                .to_string(),
            global_parameters: globals,
            directories: serde_json::from_value(json!({"input": {"com_file": "thermo/all.txt"}}))
                .unwrap(),
            populator: serde_json::from_value(json!({"00, 11": {"T_top": 1500}})).unwrap(),
            ignore_list: vec![],
        }
    }

    fn cfg() -> ControllerConfig {
        let mut cfg = ControllerConfig::new(
            Path::new("/m"),
            Path::new("/m/input"),
            Path::new("/m/output"),
        );
        cfg.global_links
            .insert("P_b".to_string(), "boundary.boundPress".to_string());
        cfg
    }

    fn literal(a: &Assembled, name: &str) -> Literal {
        parse_literal(a.artifact.get(name).unwrap()).unwrap()
    }

    #[test]
    fn initial_run_layers_sources_in_order() {
        let mut overrides = BTreeMap::new();
        overrides.insert("T_top".to_string(), Literal::Int(1200));
        let asm = Assembler::new(cfg(), inputs(), RunType::Initial, overrides, ImportMap::new());
        let grid = Grid::new(2, 3, 3).unwrap();

        let populated = asm.assemble(&RunId::new(1, "211"), &grid.column(1, 1), 0).unwrap();
        assert_eq!(literal(&populated, "T_top"), Literal::Int(1500));
        assert_eq!(literal(&populated, "remake_chem_funs"), Literal::Bool(true));
        assert_eq!(literal(&populated, "run_num"), Literal::Str("1-211".into()));
        assert_eq!(literal(&populated, "run_type"), Literal::Str("initial".into()));
        assert_eq!(literal(&populated, "world_atmosphereDim"), Literal::List(vec![Literal::Int(3)]));
        assert_eq!(literal(&populated, "P_b"), Literal::Float(1e4));
        assert_eq!(
            literal(&populated, "com_file"),
            Literal::Str("/m/input/thermo/all.txt".into())
        );
        assert_eq!(
            populated.config_path(),
            PathBuf::from("/m/output/runtime/HD189-run-1-211-cfgFile.txt")
        );

        let plain = asm.assemble(&RunId::new(1, "201"), &grid.column(0, 1), 1).unwrap();
        assert_eq!(literal(&plain, "T_top"), Literal::Int(1200));
        assert_eq!(literal(&plain, "remake_chem_funs"), Literal::Bool(false));
        assert!(plain.artifact.typed_variables().is_ok());
    }

    #[test]
    fn reuse_points_at_previous_result_and_writes_side_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = cfg();
        cfg.output_dir = dir.path().to_path_buf();
        let mut imports = ImportMap::new();
        let mut values = BTreeMap::new();
        values.insert("lowerHeight".to_string(), json!(2.0));
        values.insert("OH".to_string(), json!(1e17));
        imports.insert(ExternalColumn::new(2, 0, 1), values);
        let asm = Assembler::new(cfg, inputs(), RunType::Reuse, BTreeMap::new(), imports);
        let grid = Grid::new(2, 3, 3).unwrap();

        let untouched = asm.assemble(&RunId::new(3, "200"), &grid.column(0, 0), 0).unwrap();
        assert!(untouched.column_override.is_none());
        assert_eq!(literal(&untouched, "ini_mix"), Literal::Str("previous_result".into()));
        let prev = dir.path().join("runtime").join("HD189-run-2-200-output.json");
        assert_eq!(
            literal(&untouched, "prev_result_path"),
            Literal::Str(prev.to_string_lossy().to_string())
        );
        assert_eq!(literal(&untouched, "T_top"), Literal::Int(1000));

        let modified = asm.assemble(&RunId::new(3, "201"), &grid.column(0, 1), 1).unwrap();
        let ov = modified.column_override.clone().unwrap();
        assert_eq!(ov.values["lowerHeight"], json!(200.0));
        assert_eq!(ov.values["OH"], json!(1e17));
        assert_eq!(literal(&modified, "atm_type"), Literal::Str("previous_result_modified".into()));
        assert_eq!(
            literal(&modified, "column_override_path"),
            Literal::Str(ov.path.to_string_lossy().to_string())
        );

        let written = asm.persist(&modified).unwrap();
        assert!(written.exists());
        let side: BTreeMap<String, Value> =
            serde_json::from_slice(&std::fs::read(&ov.path).unwrap()).unwrap();
        assert_eq!(side, ov.values);
    }

    #[test]
    fn reuse_needs_a_previous_generation() {
        let asm = Assembler::new(cfg(), inputs(), RunType::Reuse, BTreeMap::new(), ImportMap::new());
        let grid = Grid::new(2, 1, 1).unwrap();
        assert!(asm.assemble(&RunId::new(1, "200"), &grid.column(0, 0), 0).is_err());
    }

    #[test]
    fn missing_out_name_is_fatal() {
        let mut inputs = inputs();
        inputs.base_parameters = "T_top = 1\n".to_string();
        let asm = Assembler::new(cfg(), inputs, RunType::Initial, BTreeMap::new(), ImportMap::new());
        let grid = Grid::new(2, 1, 1).unwrap();
        let err = asm.assemble(&RunId::new(1, "200"), &grid.column(0, 0), 0).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ControllerError>(),
            Some(ControllerError::MissingVariable { .. })
        ));
    }
}
