//! Soil/Sediment Stack Engine.
//!
//! Per-cell (overland) or per-node (channel) ordered stack of layers, each
//! internally uniform in grain-size distribution (GSD) and porosity.
//! Deposition/erosion act only at the surface (top) layer; burial and
//! exhumation are modeled by pushing/popping whole layers rather than
//! mixing them, preserving vertical stratigraphy (spec §4.3 rationale).

use crate::error::ConfigurationError;

/// Min/max volume thresholds and channel-only bottom-width bound are per
/// the soil type / land use property table, but layer state itself
/// (thickness, volume, GSD) belongs here as it mutates during the run.
#[derive(Debug, Clone)]
pub struct Layer {
    pub thickness: f64,
    pub volume: f64,
    pub porosity: f64,
    /// channel only; `None` for overland layers.
    pub bottom_width: Option<f64>,
    /// grain size distribution by solids class, sums to 1.
    pub gsd: Vec<f64>,
    pub min_volume: f64,
    pub max_volume: f64,
    pub bed_elevation: f64,
}

impl Layer {
    pub fn gsd_sum_ok(&self) -> bool {
        (self.gsd.iter().sum::<f64>() - 1.0).abs() < 1e-5
    }
}

/// Signal raised by a volume-change call; the caller (solids transport)
/// applies pushes/pops at the end of the step, not mid-flux-computation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StackFlag {
    None,
    Push,
    Pop,
}

/// Ordered stack of layers at one location (overland cell or channel node).
/// Layer index 1 is the bottom (fixed datum); `nstack` is the top, the only
/// layer that exchanges mass with the water column.
#[derive(Debug, Clone)]
pub struct Stack {
    layers: Vec<Layer>,
    /// channel bottom width bound; `None` for overland stacks.
    channel_bottom_width: Option<f64>,
}

impl Stack {
    pub fn new(layers: Vec<Layer>, channel_bottom_width: Option<f64>) -> Result<Self, ConfigurationError> {
        let stack = Stack {
            layers,
            channel_bottom_width,
        };
        stack.validate()?;
        Ok(stack)
    }

    fn validate(&self) -> Result<(), ConfigurationError> {
        for (li, layer) in self.layers.iter().enumerate() {
            if !layer.gsd_sum_ok() {
                return Err(ConfigurationError::GsdSumOutOfTolerance {
                    context: format!("stack layer {}", li + 1),
                    sum: layer.gsd.iter().sum(),
                });
            }
        }
        if let Some(bw_channel) = self.channel_bottom_width {
            let mut prev = 0.0_f64;
            for (li, layer) in self.layers.iter().enumerate() {
                let bw = layer.bottom_width.unwrap_or(0.0);
                if bw < prev - 1e-9 || bw > bw_channel + 1e-9 {
                    return Err(ConfigurationError::BedWidthInvariantViolated {
                        link: 0,
                        node: 0,
                        layer: li + 1,
                        width: bw,
                        channel_width: bw_channel,
                    });
                }
                prev = bw;
            }
        }
        Ok(())
    }

    pub fn nstack(&self) -> usize {
        self.layers.len()
    }

    /// `top(cell) -> layer_index`, 1-indexed as in the original.
    pub fn top(&self) -> usize {
        self.layers.len()
    }

    pub fn layer(&self, index1: usize) -> &Layer {
        &self.layers[index1 - 1]
    }

    pub fn layer_mut(&mut self, index1: usize) -> &mut Layer {
        &mut self.layers[index1 - 1]
    }

    pub fn top_layer(&self) -> &Layer {
        self.layers.last().expect("stack always has >=1 layer")
    }

    pub fn top_layer_mut(&mut self) -> &mut Layer {
        self.layers.last_mut().expect("stack always has >=1 layer")
    }

    /// `volume_change(cell, layer, dV)`: updates the named layer's volume
    /// and reports whether a push or pop condition now holds at the top.
    pub fn volume_change(&mut self, layer_index1: usize, dv: f64) -> StackFlag {
        {
            let layer = self.layer_mut(layer_index1);
            layer.volume = (layer.volume + dv).max(0.0);
        }
        if layer_index1 != self.top() {
            return StackFlag::None;
        }
        let top = self.top_layer();
        if top.volume >= top.max_volume {
            StackFlag::Push
        } else if top.volume <= top.min_volume && self.nstack() > 1 {
            StackFlag::Pop
        } else {
            StackFlag::None
        }
    }

    /// Create a new, empty surface layer above the current top, inheriting
    /// the GSD of the deposition flux accumulated over the step.
    pub fn push(&mut self, incoming_gsd: Vec<f64>, porosity: f64, bed_elevation: f64) {
        let n_classes = incoming_gsd.len();
        let bottom_width = self.channel_bottom_width.map(|bw_channel| {
            let prev = self
                .layers
                .last()
                .and_then(|l| l.bottom_width)
                .unwrap_or(0.0);
            prev.min(bw_channel)
        });
        self.layers.push(Layer {
            thickness: 0.0,
            volume: 0.0,
            porosity,
            bottom_width,
            gsd: if n_classes == 0 {
                vec![1.0]
            } else {
                incoming_gsd
            },
            min_volume: self.layers.last().map(|l| l.min_volume).unwrap_or(0.0),
            max_volume: self.layers.last().map(|l| l.max_volume).unwrap_or(f64::INFINITY),
            bed_elevation,
        });
    }

    /// Collapse a depleted top layer: mass-conservative remix of GSD
    /// (volume-weighted) into the layer below, then decrement `nstack`.
    /// No-op if `nstack <= 1` or the top is not actually depleted.
    pub fn pop(&mut self) {
        if self.nstack() <= 1 {
            return;
        }
        let top = self.layers.pop().expect("checked nstack>1");
        let below = self.layers.last_mut().expect("checked nstack>1");

        let v_top = top.volume.max(0.0);
        let v_below = below.volume.max(0.0);
        let v_total = v_top + v_below;

        if v_total > 0.0 {
            let n = below.gsd.len().max(top.gsd.len());
            let mut merged = vec![0.0; n];
            for (s, slot) in merged.iter_mut().enumerate() {
                let g_below = below.gsd.get(s).copied().unwrap_or(0.0);
                let g_top = top.gsd.get(s).copied().unwrap_or(0.0);
                *slot = (g_below * v_below + g_top * v_top) / v_total;
            }
            let sum: f64 = merged.iter().sum();
            if sum > 0.0 {
                for v in merged.iter_mut() {
                    *v /= sum;
                }
            }
            below.gsd = merged;
        }
        below.volume = v_total;
        below.thickness += top.thickness;
        // surface-exchange elevation now tracks the (new) top layer's datum.
        below.bed_elevation = below.bed_elevation.max(top.bed_elevation);
    }

    /// Channel-specific: recompute `bwlayer` after a push/pop so the
    /// invariant (bottom width non-decreasing toward the surface, bounded
    /// by the channel's bottom width) holds; errors if user input violates
    /// it outright (spec §4.3).
    pub fn recompute_channel_bottom_widths(&mut self) -> Result<(), ConfigurationError> {
        let Some(bw_channel) = self.channel_bottom_width else {
            return Ok(());
        };
        let mut prev = 0.0_f64;
        for (li, layer) in self.layers.iter_mut().enumerate() {
            let bw = layer.bottom_width.unwrap_or(prev).clamp(prev, bw_channel);
            if bw < prev - 1e-9 {
                return Err(ConfigurationError::BedWidthInvariantViolated {
                    link: 0,
                    node: 0,
                    layer: li + 1,
                    width: bw,
                    channel_width: bw_channel,
                });
            }
            layer.bottom_width = Some(bw);
            prev = bw;
        }
        Ok(())
    }

    pub fn gsd_closure_ok(&self) -> bool {
        self.layers.iter().all(|l| l.gsd_sum_ok())
    }
}
