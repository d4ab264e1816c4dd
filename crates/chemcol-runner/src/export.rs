//! Package the latest pass's results for collaborating modules.

use crate::error::ControllerError;
use crate::grid::Column;
use crate::ledger::Ledger;
use crate::translate::{translate_height, translate_pressure, Direction, ExternalColumn};
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Result artifact written by the backend, in internal units. Arrays are
/// indexed by level, bottom first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnResult {
    pub height: Vec<f64>,
    pub pressure: Vec<f64>,
    pub temperature: Vec<f64>,
    pub species: Vec<String>,
    pub number_density: Vec<Vec<f64>>,
}

impl ColumnResult {
    pub fn read(path: &Path) -> Result<Self> {
        let bytes =
            fs::read(path).with_context(|| format!("read result artifact {}", path.display()))?;
        serde_json::from_slice(&bytes)
            .with_context(|| format!("parse result artifact {}", path.display()))
    }

    pub fn layer(&self, lower: usize) -> Result<ColumnExport> {
        let upper = lower + 1;
        if self.height.len() <= upper || self.pressure.len() <= upper {
            bail!("result has no level above index {}", lower);
        }
        let temperature = *self
            .temperature
            .get(lower)
            .with_context(|| format!("no temperature at level {}", lower))?;
        let densities = self
            .number_density
            .get(lower)
            .with_context(|| format!("no number densities at level {}", lower))?;
        if densities.len() != self.species.len() {
            bail!(
                "level {} has {} number densities for {} species",
                lower,
                densities.len(),
                self.species.len()
            );
        }
        let number_density = self
            .species
            .iter()
            .zip(densities)
            .map(|(sp, n)| (sp.clone(), *n))
            .collect();
        Ok(ColumnExport {
            upper_height: translate_height(Direction::Export, self.height[upper]),
            lower_height: translate_height(Direction::Export, self.height[lower]),
            upper_pressure: translate_pressure(Direction::Export, self.pressure[upper]),
            lower_pressure: translate_pressure(Direction::Export, self.pressure[lower]),
            level_temperature: temperature,
            number_density,
            index: lower,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnExport {
    pub upper_height: f64,
    pub lower_height: f64,
    pub upper_pressure: f64,
    pub lower_pressure: f64,
    pub level_temperature: f64,
    pub number_density: BTreeMap<String, f64>,
    pub index: usize,
}

pub type ExportPackage = BTreeMap<ExternalColumn, ColumnExport>;

#[derive(Debug, Clone, PartialEq)]
pub enum ExportRequest {
    Neighbourhood,
    Levels {
        columns: Vec<ExternalColumn>,
        height: f64,
    },
}

pub fn export(ledger: &Ledger, request: &ExportRequest) -> Result<ExportPackage> {
    let latest = ledger.latest_results();
    if latest.is_empty() {
        return Err(ControllerError::NoCompletedRuns.into());
    }
    let mut results: Vec<(Column, PathBuf)> = Vec::with_capacity(latest.len());
    for (id, path) in latest {
        results.push((Column::decode(&id.column)?, path));
    }
    debug!(columns = results.len(), "exporting latest generation");
    match request {
        ExportRequest::Neighbourhood => neighbourhood(&results),
        ExportRequest::Levels { columns, height } => levels(&results, columns, *height),
    }
}

fn neighbourhood(results: &[(Column, PathBuf)]) -> Result<ExportPackage> {
    let mut bottom: BTreeMap<Column, ColumnExport> = BTreeMap::new();
    for (column, path) in results {
        let layer = ColumnResult::read(path)?
            .layer(0)
            .with_context(|| format!("column {} in {}", column, path.display()))?;
        bottom.insert(*column, layer);
    }

    let mut package = ExportPackage::new();
    for (column, _) in results {
        let around: Vec<&ColumnExport> = column
            .neighbours()
            .iter()
            .filter_map(|n| bottom.get(n))
            .collect();
        let averaged = average(&around).ok_or_else(|| ControllerError::EmptyNeighbourhood {
            column: column.encode(),
        })?;
        package.insert(ExternalColumn::from(*column), averaged);
    }
    Ok(package)
}

/// Arithmetic mean across `layers`. The species list comes from the layer
/// reporting the most species; each species is averaged over the layers that
/// report it. `None` for an empty set.
pub fn average(layers: &[&ColumnExport]) -> Option<ColumnExport> {
    let widest = layers.iter().copied().reduce(|best, l| {
        if l.number_density.len() > best.number_density.len() {
            l
        } else {
            best
        }
    })?;
    let field = |f: fn(&ColumnExport) -> f64| mean(layers.iter().map(|l| f(l)));
    let number_density = widest
        .number_density
        .keys()
        .filter_map(|sp| {
            mean(layers.iter().filter_map(|l| l.number_density.get(sp).copied()))
                .map(|v| (sp.clone(), v))
        })
        .collect();
    Some(ColumnExport {
        upper_height: field(|l| l.upper_height)?,
        lower_height: field(|l| l.lower_height)?,
        upper_pressure: field(|l| l.upper_pressure)?,
        lower_pressure: field(|l| l.lower_pressure)?,
        level_temperature: field(|l| l.level_temperature)?,
        number_density,
        index: 0,
    })
}

// Running mean: identical inputs come back unchanged, with no rounding from a
// large intermediate sum.
fn mean(values: impl Iterator<Item = f64>) -> Option<f64> {
    let mut acc: Option<f64> = None;
    for (i, v) in values.enumerate() {
        acc = Some(match acc {
            None => v,
            Some(m) => m + (v - m) / (i as f64 + 1.0),
        });
    }
    acc
}

fn levels(
    results: &[(Column, PathBuf)],
    columns: &[ExternalColumn],
    height: f64,
) -> Result<ExportPackage> {
    let internal_height = translate_height(Direction::Import, height);
    let mut package = ExportPackage::new();
    for wanted in columns {
        let (column, path) = results
            .iter()
            .find(|(c, _)| ExternalColumn::from(*c) == *wanted)
            .ok_or_else(|| ControllerError::UnknownColumn {
                column: wanted.to_string(),
            })?;
        let result = ColumnResult::read(path)?;
        let out_of_range = || ControllerError::HeightOutOfRange {
            column: column.encode(),
            height,
        };
        let upper = result
            .height
            .iter()
            .position(|h| *h > internal_height)
            .ok_or_else(out_of_range)?;
        if upper == 0 {
            return Err(out_of_range().into());
        }
        let layer = result
            .layer(upper - 1)
            .with_context(|| format!("column {} in {}", column, path.display()))?;
        package.insert(*wanted, layer);
    }
    Ok(package)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fsutil::atomic_write_json_pretty;
    use crate::grid::Grid;
    use crate::ledger::LedgerEvent;
    use crate::run::{RunId, RunPaths};

    fn result(scale: f64, species: &[&str]) -> ColumnResult {
        ColumnResult {
            height: vec![0.0, 5e4 * scale, 1e5 * scale],
            pressure: vec![1e6 * scale, 5e5, 1e5],
            temperature: vec![300.0 * scale, 250.0, 200.0],
            species: species.iter().map(|s| s.to_string()).collect(),
            number_density: (0..3)
                .map(|lvl| species.iter().map(|_| 1e17 * scale / (lvl as f64 + 1.0)).collect())
                .collect(),
        }
    }

    fn ledger_with(
        dir: &Path,
        generation: u64,
        cols: &[(Column, ColumnResult)],
    ) -> Ledger {
        let paths = RunPaths {
            runtime_dir: dir.to_path_buf(),
            out_name: "HD189".to_string(),
            result_extension: "json".to_string(),
        };
        let mut ledger = Ledger::create(&dir.join("run-ledger.txt"), &[]).unwrap();
        for (col, res) in cols {
            let path = paths.result(&RunId::new(generation, col.encode()));
            atomic_write_json_pretty(&path, res).unwrap();
            ledger.append(LedgerEvent::ResultRecorded(path)).unwrap();
        }
        ledger
    }

    #[test]
    fn identical_grid_averages_to_the_common_value() {
        let dir = tempfile::tempdir().unwrap();
        let grid = Grid::new(2, 3, 3).unwrap();
        let common = result(0.1, &["OH", "H2O"]);
        let cols: Vec<_> = grid.columns().into_iter().map(|c| (c, common.clone())).collect();
        let ledger = ledger_with(dir.path(), 1, &cols);

        let package = export(&ledger, &ExportRequest::Neighbourhood).unwrap();
        assert_eq!(package.len(), 9);
        let expected = common.layer(0).unwrap();
        assert_eq!(package[&ExternalColumn::new(2, 1, 1)], expected);
        assert_eq!(package[&ExternalColumn::new(2, 0, 0)], expected);
    }

    #[test]
    fn neighbourhood_excludes_the_column_itself() {
        let dir = tempfile::tempdir().unwrap();
        let grid = Grid::new(2, 2, 1).unwrap();
        let ledger = ledger_with(
            dir.path(),
            1,
            &[(grid.column(0, 0), result(1.0, &["OH"])), (grid.column(1, 0), result(2.0, &["OH"]))],
        );
        let package = export(&ledger, &ExportRequest::Neighbourhood).unwrap();
        let left = &package[&ExternalColumn::new(2, 0, 0)];
        assert_eq!(left.level_temperature, 600.0);
        assert_eq!(left.lower_pressure, 2e5);
        assert_eq!(left.index, 0);
    }

    #[test]
    fn species_average_over_reporting_neighbours_only() {
        let a = result(1.0, &["OH", "H2O"]).layer(0).unwrap();
        let b = result(3.0, &["OH"]).layer(0).unwrap();
        let avg = average(&[&b, &a]).unwrap();
        assert_eq!(avg.number_density.len(), 2);
        assert_eq!(avg.number_density["OH"], 2e17);
        assert_eq!(avg.number_density["H2O"], 1e17);
        assert_eq!(avg.level_temperature, 600.0);
        assert!(average(&[]).is_none());
    }

    #[test]
    fn isolated_column_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let grid = Grid::new(2, 3, 3).unwrap();
        let ledger = ledger_with(dir.path(), 1, &[(grid.column(1, 1), result(1.0, &["OH"]))]);
        let err = export(&ledger, &ExportRequest::Neighbourhood).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ControllerError>(),
            Some(ControllerError::EmptyNeighbourhood { column }) if column == "211"
        ));
    }

    #[test]
    fn levels_report_the_layer_containing_the_height() {
        let dir = tempfile::tempdir().unwrap();
        let grid = Grid::new(2, 2, 2).unwrap();
        let ledger = ledger_with(dir.path(), 4, &[(grid.column(1, 1), result(1.0, &["OH"]))]);
        let wanted = ExternalColumn::new(2, 1, 1);
        let request = ExportRequest::Levels {
            columns: vec![wanted],
            height: 600.0,
        };
        let package = export(&ledger, &request).unwrap();
        let layer = &package[&wanted];
        assert_eq!(layer.index, 1);
        assert_eq!(layer.lower_height, 500.0);
        assert_eq!(layer.upper_height, 1000.0);
        assert_eq!(layer.upper_pressure, 1e4);
        assert_eq!(layer.level_temperature, 250.0);
        assert_eq!(layer.number_density["OH"], 5e16);

        for height in [-1.0, 2000.0] {
            let err = export(
                &ledger,
                &ExportRequest::Levels { columns: vec![wanted], height },
            )
            .unwrap_err();
            assert!(matches!(
                err.downcast_ref::<ControllerError>(),
                Some(ControllerError::HeightOutOfRange { .. })
            ));
        }
        let err = export(
            &ledger,
            &ExportRequest::Levels { columns: vec![ExternalColumn::new(2, 0, 0)], height: 1.0 },
        )
        .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ControllerError>(),
            Some(ControllerError::UnknownColumn { .. })
        ));
    }

    #[test]
    fn short_density_row_is_rejected() {
        let mut short = result(1.0, &["OH", "H2O", "CH4"]);
        short.number_density = vec![vec![1.0]; 3];
        let err = short.layer(0).unwrap_err();
        assert!(err.to_string().contains("level 0 has 1 number densities for 3 species"));

        let dir = tempfile::tempdir().unwrap();
        let grid = Grid::new(2, 2, 1).unwrap();
        let ledger = ledger_with(
            dir.path(),
            1,
            &[(grid.column(0, 0), short), (grid.column(1, 0), result(1.0, &["OH"]))],
        );
        let err = export(&ledger, &ExportRequest::Neighbourhood).unwrap_err();
        assert!(format!("{:#}", err).contains("HD189-run-1-200-"));
    }

    #[test]
    fn empty_ledger_has_nothing_to_export() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = ledger_with(dir.path(), 1, &[]);
        let err = export(&ledger, &ExportRequest::Neighbourhood).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ControllerError>(),
            Some(ControllerError::NoCompletedRuns)
        ));
    }

    #[test]
    fn package_serializes_with_tuple_keys() {
        let mut package = ExportPackage::new();
        package.insert(ExternalColumn::new(2, 0, 1), result(1.0, &["OH"]).layer(0).unwrap());
        let json = serde_json::to_value(&package).unwrap();
        assert_eq!(json["(2, 0, 1)"]["numberDensity"]["OH"], 1e17);
        assert_eq!(json["(2, 0, 1)"]["upperHeight"], 500.0);
    }
}
