//! Grid & Topology Model.
//!
//! Exposes `mask(i,j)`, `channel_at(i,j)`, `neighbors(i,j)`, `is_outlet(i,j)`,
//! and, for channels, `upstream`/`downstream` link/node connectivity. Fails
//! on inconsistent rasters (header mismatch, mask/elevation misalignment,
//! invalid connectivity) — see `crate::error::ConfigurationError`.

use crate::error::{ConfigurationError, NODATA_SENTINEL};

/// Cardinal directions, numbered the way the original source numbers
/// overland flow directions (N=1, E=3, S=5, W=7; odd diagonals 2/4/6/8 are
/// not used by the diffusive-wave 4-direction scheme).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    North = 1,
    East = 3,
    South = 5,
    West = 7,
}

impl Direction {
    pub const ALL: [Direction; 4] = [
        Direction::North,
        Direction::East,
        Direction::South,
        Direction::West,
    ];

    pub fn offset(self) -> (isize, isize) {
        match self {
            Direction::North => (-1, 0),
            Direction::East => (0, 1),
            Direction::South => (1, 0),
            Direction::West => (0, -1),
        }
    }

    pub fn source_index(self) -> usize {
        self as usize
    }
}

/// Mask state of an overland cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MaskState {
    NoData,
    OverlandOnly,
    Channel,
}

impl MaskState {
    fn from_raw(v: i32) -> Option<MaskState> {
        match v {
            0 => None, // caller maps nodata separately
            1 => Some(MaskState::OverlandOnly),
            2 => Some(MaskState::Channel),
            _ => None,
        }
    }
}

/// Link/node address of a channel cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeRef {
    pub link: usize,
    pub node: usize,
}

/// Raster header shared by all ASCII grid inputs.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RasterHeader {
    pub ncols: usize,
    pub nrows: usize,
    pub xllcorner: f64,
    pub yllcorner: f64,
    pub cellsize: f64,
    pub nodata_value: i32,
}

impl RasterHeader {
    pub fn assert_compatible(&self, other: &RasterHeader, file: &str) -> Result<(), ConfigurationError> {
        if self.ncols != other.ncols || self.nrows != other.nrows {
            return Err(ConfigurationError::RasterHeaderMismatch {
                file: file.to_string(),
                expected: "ncols,nrows",
                expected_value: format!("{},{}", self.ncols, self.nrows),
                got: format!("{},{}", other.ncols, other.nrows),
            });
        }
        if (self.cellsize - other.cellsize).abs() > 1e-9 {
            return Err(ConfigurationError::RasterHeaderMismatch {
                file: file.to_string(),
                expected: "cellsize",
                expected_value: self.cellsize.to_string(),
                got: other.cellsize.to_string(),
            });
        }
        Ok(())
    }
}

/// Downstream connection: the last node of a link feeds the first node of
/// each downstream link (a link may have more than one downstream receiver
/// at a confluence, or none at an outlet).
#[derive(Debug, Clone, Default)]
pub struct LinkTopology {
    pub n_nodes: usize,
    pub downstream_links: Vec<usize>,
    pub outlet_id: Option<usize>,
}

/// Rectangular overland grid with an embedded channel network.
pub struct Grid {
    pub header: RasterHeader,
    /// Cell width (cellsize is required square: dx == dy).
    pub w: f64,
    mask: Vec<MaskState>,
    /// link id per cell, 0 = none (1-indexed links as in the original).
    link_id: Vec<usize>,
    /// node index per channel cell, 0 = none.
    node_id: Vec<usize>,
    /// map cell -> (link,node) for channel cells.
    cell_to_node: Vec<Option<NodeRef>>,
    /// map (link,node) -> cell index, inverse of cell_to_node.
    node_to_cell: std::collections::HashMap<(usize, usize), usize>,
    pub links: Vec<LinkTopology>,
    outlets: std::collections::HashMap<usize, usize>, // cell -> outlet id
}

impl Grid {
    pub fn nrows(&self) -> usize {
        self.header.nrows
    }

    pub fn ncols(&self) -> usize {
        self.header.ncols
    }

    pub fn cell_index(&self, i: usize, j: usize) -> usize {
        i * self.header.ncols + j
    }

    pub fn mask(&self, i: usize, j: usize) -> MaskState {
        self.mask[self.cell_index(i, j)]
    }

    pub fn channel_at(&self, i: usize, j: usize) -> Option<NodeRef> {
        self.cell_to_node[self.cell_index(i, j)]
    }

    pub fn cell_of(&self, link: usize, node: usize) -> Option<(usize, usize)> {
        self.node_to_cell
            .get(&(link, node))
            .map(|&idx| (idx / self.header.ncols, idx % self.header.ncols))
    }

    pub fn neighbors(&self, i: usize, j: usize) -> Vec<(Direction, usize, usize)> {
        let mut out = Vec::with_capacity(4);
        for dir in Direction::ALL {
            let (di, dj) = dir.offset();
            let ni = i as isize + di;
            let nj = j as isize + dj;
            if ni >= 0 && nj >= 0 && (ni as usize) < self.nrows() && (nj as usize) < self.ncols() {
                let (ni, nj) = (ni as usize, nj as usize);
                if self.mask(ni, nj) != MaskState::NoData {
                    out.push((dir, ni, nj));
                }
            }
        }
        out
    }

    pub fn is_outlet(&self, i: usize, j: usize) -> Option<usize> {
        self.outlets.get(&self.cell_index(i, j)).copied()
    }

    pub fn upstream(&self, link: usize, node: usize) -> Option<NodeRef> {
        if node > 1 {
            Some(NodeRef { link, node: node - 1 })
        } else {
            None // head of link; upstream is whichever link(s) feed it, resolved at assembly time
        }
    }

    pub fn downstream(&self, link: usize, node: usize) -> Option<NodeRef> {
        let topo = self.links.get(link.wrapping_sub(1))?;
        if node < topo.n_nodes {
            Some(NodeRef { link, node: node + 1 })
        } else {
            topo.downstream_links.first().map(|&dl| NodeRef { link: dl, node: 1 })
        }
    }

    /// Construct and fully validate a grid from raw raster buffers (as read
    /// by `io::ascii_grid`). `mask_raw`/`link_raw`/`node_raw` are row-major,
    /// one value per cell, matching the ESRI-ASCII layout in spec §6.
    pub fn build(
        header: RasterHeader,
        mask_raw: &[i32],
        elevation_raw: &[f64],
        link_raw: &[i32],
        node_raw: &[i32],
        outlet_raw: &[i32],
    ) -> Result<Grid, ConfigurationError> {
        let n = header.nrows * header.ncols;
        if mask_raw.len() != n || elevation_raw.len() != n {
            return Err(ConfigurationError::RasterHeaderMismatch {
                file: "mask/elevation".to_string(),
                expected: "cell count",
                expected_value: n.to_string(),
                got: mask_raw.len().to_string(),
            });
        }

        let mut mask = Vec::with_capacity(n);
        for (idx, &v) in mask_raw.iter().enumerate() {
            if v == header.nodata_value {
                mask.push(MaskState::NoData);
                if (elevation_raw[idx] - NODATA_SENTINEL).abs() > 1e-3
                    && elevation_raw[idx] != header.nodata_value as f64
                {
                    // allowed: nodata mask cells may legitimately carry filler
                    // elevation in source rasters; only flag active-vs-nodata
                    // misalignment (handled below), not the converse.
                }
            } else {
                match MaskState::from_raw(v) {
                    Some(m) => mask.push(m),
                    None => {
                        return Err(ConfigurationError::RasterMisalignment {
                            file: "mask".to_string(),
                            row: idx / header.ncols,
                            col: idx % header.ncols,
                            mask_state: v as u8,
                            data_is_nodata: false,
                        })
                    }
                }
            }
        }

        for (idx, m) in mask.iter().enumerate() {
            let elev_is_nodata = (elevation_raw[idx] - header.nodata_value as f64).abs() < 1e-6;
            if *m != MaskState::NoData && elev_is_nodata {
                return Err(ConfigurationError::RasterMisalignment {
                    file: "elevation".to_string(),
                    row: idx / header.ncols,
                    col: idx % header.ncols,
                    mask_state: match m {
                        MaskState::OverlandOnly => 1,
                        MaskState::Channel => 2,
                        MaskState::NoData => 0,
                    },
                    data_is_nodata: true,
                });
            }
        }

        let link_id: Vec<usize> = link_raw.iter().map(|&v| v.max(0) as usize).collect();
        let node_id: Vec<usize> = node_raw.iter().map(|&v| v.max(0) as usize).collect();

        let mut cell_to_node: Vec<Option<NodeRef>> = vec![None; n];
        let mut node_to_cell = std::collections::HashMap::new();
        let mut max_node_per_link: std::collections::HashMap<usize, usize> =
            std::collections::HashMap::new();

        for idx in 0..n {
            let link = link_id[idx];
            if link == 0 {
                continue;
            }
            if mask[idx] != MaskState::Channel {
                return Err(ConfigurationError::InvalidConnectivity {
                    link,
                    node: node_id[idx],
                    reason: format!(
                        "cell ({},{}) has a link id but mask is not 2 (channel)",
                        idx / header.ncols,
                        idx % header.ncols
                    ),
                });
            }
            let node = node_id[idx];
            if node == 0 {
                return Err(ConfigurationError::InvalidConnectivity {
                    link,
                    node,
                    reason: "channel cell has link id but no node index".to_string(),
                });
            }
            cell_to_node[idx] = Some(NodeRef { link, node });
            node_to_cell.insert((link, node), idx);
            let entry = max_node_per_link.entry(link).or_insert(0);
            *entry = (*entry).max(node);
        }

        let nlinks = max_node_per_link.keys().copied().max().unwrap_or(0);
        let mut links = vec![LinkTopology::default(); nlinks];
        for (link, max_node) in max_node_per_link {
            links[link - 1].n_nodes = max_node;
        }

        // Downstream connectivity: the last node of a link connects to the
        // first node of each downstream link. We discover this by scanning
        // for a link whose node 1 cell is the 4-neighbor-adjacent-downhill
        // cell of another link's last node, using elevation to break ties
        // when more than one candidate exists. This mirrors the original's
        // node/link raster derivation, simplified to a grid-adjacency rule.
        for link in 1..=nlinks {
            let topo = &links[link - 1];
            let last_node = topo.n_nodes;
            if last_node == 0 {
                continue;
            }
            let Some(&last_idx) = node_to_cell.get(&(link, last_node)) else {
                continue;
            };
            let (li, lj) = (last_idx / header.ncols, last_idx % header.ncols);
            let mut downstream_links = Vec::new();
            for (_dir, ni, nj) in neighbors_of(&mask, header.nrows, header.ncols, li, lj) {
                let nidx = ni * header.ncols + nj;
                if let Some(nref) = cell_to_node[nidx] {
                    if nref.link != link && nref.node == 1 && elevation_raw[nidx] <= elevation_raw[last_idx] {
                        downstream_links.push(nref.link);
                    }
                }
            }
            links[link - 1].downstream_links = downstream_links;
        }

        let mut outlets = std::collections::HashMap::new();
        for (idx, &raw) in outlet_raw.iter().enumerate() {
            if raw > 0 {
                outlets.insert(idx, raw as usize);
            }
        }
        for (link, topo) in links.iter_mut().enumerate() {
            if topo.downstream_links.is_empty() && topo.n_nodes > 0 {
                if let Some(&last_idx) = node_to_cell.get(&(link + 1, topo.n_nodes)) {
                    topo.outlet_id = outlets.get(&last_idx).copied();
                }
            }
        }

        Ok(Grid {
            header,
            w: header.cellsize,
            mask,
            link_id,
            node_id,
            cell_to_node,
            node_to_cell,
            links,
            outlets,
        })
    }
}

fn neighbors_of(
    mask: &[MaskState],
    nrows: usize,
    ncols: usize,
    i: usize,
    j: usize,
) -> Vec<(Direction, usize, usize)> {
    let mut out = Vec::with_capacity(4);
    for dir in Direction::ALL {
        let (di, dj) = dir.offset();
        let ni = i as isize + di;
        let nj = j as isize + dj;
        if ni >= 0 && nj >= 0 && (ni as usize) < nrows && (nj as usize) < ncols {
            let (ni, nj) = (ni as usize, nj as usize);
            if mask[ni * ncols + nj] != MaskState::NoData {
                out.push((dir, ni, nj));
            }
        }
    }
    out
}
