// ============================================================================
// CONFIGURATION — validated, named-field settings for brush and engine
// ============================================================================

use serde::{Deserialize, Serialize};

use crate::error::EngineError;

/// Brush tessellation and response settings.
///
/// All fields are validated at construction; an instance that exists is
/// always usable. Ranges:
///
/// | field              | range        | meaning                                   |
/// |--------------------|--------------|-------------------------------------------|
/// | `base_diameter`    | > 0          | stroke width in layer pixels at pressure 1 |
/// | `size_curve_exp`   | > 0          | pressure → width response exponent         |
/// | `flow_curve_exp`   | > 0          | pressure → opacity response exponent       |
/// | `min_radius_ratio` | (0, 1]       | width floor as a fraction of base radius   |
/// | `cap_segments`     | 3..=64       | round-cap fan resolution                   |
/// | `closed_threshold` | >= 0         | close-the-ring distance, in radii          |
/// | `tilt_fade`        | [0, 1]       | stylus-tilt alpha thinning (0 = off)       |
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct BrushConfig {
    pub base_diameter: f32,
    pub size_curve_exp: f32,
    pub flow_curve_exp: f32,
    pub min_radius_ratio: f32,
    pub cap_segments: u32,
    pub closed_threshold: f32,
    pub tilt_fade: f32,
}

impl Default for BrushConfig {
    fn default() -> Self {
        Self {
            base_diameter: 10.0,
            size_curve_exp: 1.6,
            flow_curve_exp: 1.2,
            min_radius_ratio: 0.3,
            cap_segments: 8,
            closed_threshold: 1.5,
            tilt_fade: 0.0,
        }
    }
}

impl BrushConfig {
    pub fn new(base_diameter: f32) -> Result<Self, EngineError> {
        Self {
            base_diameter,
            ..Self::default()
        }
        .validated()
    }

    /// Consume and return self if every field is in range.
    pub fn validated(self) -> Result<Self, EngineError> {
        fn check(
            ok: bool,
            field: &'static str,
            value: f32,
            expected: &'static str,
        ) -> Result<(), EngineError> {
            if ok {
                Ok(())
            } else {
                Err(EngineError::InvalidConfig {
                    field,
                    value: value as f64,
                    expected,
                })
            }
        }

        check(
            self.base_diameter.is_finite() && self.base_diameter > 0.0,
            "base_diameter",
            self.base_diameter,
            "> 0",
        )?;
        check(
            self.size_curve_exp.is_finite() && self.size_curve_exp > 0.0,
            "size_curve_exp",
            self.size_curve_exp,
            "> 0",
        )?;
        check(
            self.flow_curve_exp.is_finite() && self.flow_curve_exp > 0.0,
            "flow_curve_exp",
            self.flow_curve_exp,
            "> 0",
        )?;
        check(
            self.min_radius_ratio > 0.0 && self.min_radius_ratio <= 1.0,
            "min_radius_ratio",
            self.min_radius_ratio,
            "(0, 1]",
        )?;
        check(
            (3..=64).contains(&self.cap_segments),
            "cap_segments",
            self.cap_segments as f32,
            "3..=64",
        )?;
        check(
            self.closed_threshold.is_finite() && self.closed_threshold >= 0.0,
            "closed_threshold",
            self.closed_threshold,
            ">= 0",
        )?;
        check(
            (0.0..=1.0).contains(&self.tilt_fade),
            "tilt_fade",
            self.tilt_fade,
            "[0, 1]",
        )?;
        Ok(self)
    }

    /// Base radius in layer pixels.
    pub fn base_radius(&self) -> f32 {
        self.base_diameter * 0.5
    }
}

/// Canvas-wide engine settings.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Logical canvas size in display pixels.
    pub canvas_width: u32,
    pub canvas_height: u32,
    /// Internal render resolution multiplier. Layer textures and the
    /// composite accumulator are allocated at `canvas × factor`; the final
    /// downsample pass is the only smoothing step.
    pub supersample_factor: f32,
    /// Extra padding added around every dirty mark, in display pixels.
    /// Covers antialiased stroke fringes that extend past the nominal radius.
    pub dirty_margin: f32,
    /// Upper bound on retained history snapshots; oldest are pruned first.
    pub max_snapshots: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            canvas_width: 1024,
            canvas_height: 768,
            supersample_factor: 2.0,
            dirty_margin: 2.0,
            max_snapshots: 64,
        }
    }
}

impl EngineConfig {
    pub fn new(canvas_width: u32, canvas_height: u32) -> Result<Self, EngineError> {
        Self {
            canvas_width,
            canvas_height,
            ..Self::default()
        }
        .validated()
    }

    pub fn validated(self) -> Result<Self, EngineError> {
        if self.canvas_width == 0 || self.canvas_height == 0 {
            return Err(EngineError::InvalidConfig {
                field: "canvas_width/canvas_height",
                value: (self.canvas_width.min(self.canvas_height)) as f64,
                expected: "> 0",
            });
        }
        if !(self.supersample_factor.is_finite()
            && (1.0..=4.0).contains(&self.supersample_factor))
        {
            return Err(EngineError::InvalidConfig {
                field: "supersample_factor",
                value: self.supersample_factor as f64,
                expected: "[1, 4]",
            });
        }
        if !(self.dirty_margin.is_finite() && self.dirty_margin >= 0.0) {
            return Err(EngineError::InvalidConfig {
                field: "dirty_margin",
                value: self.dirty_margin as f64,
                expected: ">= 0",
            });
        }
        if self.max_snapshots == 0 {
            return Err(EngineError::InvalidConfig {
                field: "max_snapshots",
                value: 0.0,
                expected: ">= 1",
            });
        }
        Ok(self)
    }

    /// Supersampled (internal) texture dimensions.
    pub fn internal_size(&self) -> (u32, u32) {
        (
            (self.canvas_width as f32 * self.supersample_factor).round() as u32,
            (self.canvas_height as f32 * self.supersample_factor).round() as u32,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_brush_config_is_valid() {
        assert!(BrushConfig::default().validated().is_ok());
    }

    #[test]
    fn rejects_zero_diameter() {
        assert!(BrushConfig::new(0.0).is_err());
        assert!(BrushConfig::new(-3.0).is_err());
    }

    #[test]
    fn rejects_out_of_range_cap_segments() {
        let cfg = BrushConfig {
            cap_segments: 2,
            ..BrushConfig::default()
        };
        assert!(cfg.validated().is_err());
    }

    #[test]
    fn rejects_bad_supersample_factor() {
        let cfg = EngineConfig {
            supersample_factor: 0.5,
            ..EngineConfig::default()
        };
        assert!(cfg.validated().is_err());
    }

    #[test]
    fn internal_size_scales_by_factor() {
        let cfg = EngineConfig::new(800, 600).unwrap();
        assert_eq!(cfg.internal_size(), (1600, 1200));
    }
}
