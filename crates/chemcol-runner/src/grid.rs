use crate::error::ControllerError;
use std::fmt;

/// One grid cell. Internally identified by a digit string: the layer digit
/// followed by the x and y indices, each zero-padded to `width` digits
/// (`"212"` for layer 2, x 1, y 2 on a grid narrower than ten).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Column {
    pub layer: u32,
    pub x: u32,
    pub y: u32,
    pub width: usize,
}

impl Column {
    pub fn encode(&self) -> String {
        format!(
            "{}{:0w$}{:0w$}",
            self.layer,
            self.x,
            self.y,
            w = self.width
        )
    }

    pub fn position_code(&self) -> String {
        format!("{:0w$}{:0w$}", self.x, self.y, w = self.width)
    }

    pub fn decode(raw: &str) -> Result<Self, ControllerError> {
        let invalid = || ControllerError::InvalidColumn {
            raw: raw.to_string(),
        };
        if raw.len() < 3 || raw.len() % 2 == 0 || !raw.bytes().all(|b| b.is_ascii_digit()) {
            return Err(invalid());
        }
        let width = (raw.len() - 1) / 2;
        let layer = raw[..1].parse().map_err(|_| invalid())?;
        let x = raw[1..1 + width].parse().map_err(|_| invalid())?;
        let y = raw[1 + width..].parse().map_err(|_| invalid())?;
        Ok(Self { layer, x, y, width })
    }

    /// Axis-adjacent cells, clipped at zero. The grid's upper edge is not
    /// known here; callers intersect with the set of completed columns.
    pub fn neighbours(&self) -> Vec<Column> {
        let mut out = Vec::with_capacity(4);
        out.push(Column { x: self.x + 1, ..*self });
        if self.x > 0 {
            out.push(Column { x: self.x - 1, ..*self });
        }
        if self.y > 0 {
            out.push(Column { y: self.y - 1, ..*self });
        }
        out.push(Column { y: self.y + 1, ..*self });
        out
    }
}

impl fmt::Display for Column {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Grid {
    pub layer: u32,
    pub nx: u32,
    pub ny: u32,
}

impl Grid {
    pub fn new(layer: u32, nx: u32, ny: u32) -> Result<Self, ControllerError> {
        if layer > 9 {
            return Err(ControllerError::GridTooLarge { layer, nx, ny });
        }
        Ok(Self { layer, nx, ny })
    }

    pub fn width(&self) -> usize {
        let max_index = self.nx.max(self.ny).saturating_sub(1);
        max_index.to_string().len()
    }

    pub fn column(&self, x: u32, y: u32) -> Column {
        Column {
            layer: self.layer,
            x,
            y,
            width: self.width(),
        }
    }

    pub fn columns(&self) -> Vec<Column> {
        let mut out = Vec::with_capacity((self.nx * self.ny) as usize);
        for x in 0..self.nx {
            for y in 0..self.ny {
                out.push(self.column(x, y));
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn small_grid_uses_single_digits() {
        let grid = Grid::new(2, 3, 3).unwrap();
        let ids: Vec<String> = grid.columns().iter().map(Column::encode).collect();
        assert_eq!(
            ids,
            vec!["200", "201", "202", "210", "211", "212", "220", "221", "222"]
        );
    }

    #[test]
    fn wide_grid_pads_axes() {
        let grid = Grid::new(2, 12, 3).unwrap();
        assert_eq!(grid.width(), 2);
        assert_eq!(grid.column(11, 2).encode(), "21102");
        assert_eq!(grid.column(11, 2).position_code(), "1102");
        assert_eq!(Column::decode("21102").unwrap(), grid.column(11, 2));
    }

    #[test]
    fn decode_rejects_malformed_ids() {
        assert!(Column::decode("20").is_err());
        assert!(Column::decode("2001").is_err());
        assert!(Column::decode("2a1").is_err());
        assert!(Column::decode("-21").is_err());
    }

    #[test]
    fn neighbours_clip_at_zero() {
        let grid = Grid::new(2, 3, 3).unwrap();
        let corner: Vec<String> = grid.column(0, 0).neighbours().iter().map(|c| c.encode()).collect();
        assert_eq!(corner, vec!["210", "201"]);
        let centre: Vec<String> = grid.column(1, 1).neighbours().iter().map(|c| c.encode()).collect();
        assert_eq!(centre, vec!["221", "201", "210", "212"]);
    }

    #[test]
    fn layer_must_be_one_digit() {
        assert!(matches!(
            Grid::new(12, 2, 2),
            Err(ControllerError::GridTooLarge { .. })
        ));
    }
}
