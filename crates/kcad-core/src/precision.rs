//! 精度规整
//!
//! 所有坐标与派生量按容差步长做四舍五入（远离零），随后合并连续重复点、
//! 复核闭合，并比较声明面积与计算面积。规整是幂等的：对已规整的地块再次规整不改变任何值。

use crate::geometry::{Ring, Vertex};
use crate::issue::{IssueKind, IssueLocation, ValidationIssue};
use crate::parcel::{Contour, Parcel, RingId};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// 赤道处 1 度经线弧长（米）
pub const METRES_PER_DEGREE: f64 = 111_319.49;

#[derive(Debug, Clone)]
pub struct PrecisionConfig {
    /// 容差步长（米）
    pub tolerance: f64,
    /// 声明面积与计算面积的相对差异阈值
    pub area_discrepancy_threshold: f64,
}

impl Default for PrecisionConfig {
    fn default() -> Self {
        Self {
            tolerance: 0.01,
            area_discrepancy_threshold: 0.05,
        }
    }
}

/// 取整步长
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RoundingStep {
    pub step: f64,
    /// 步长为 10 的整数次幂时的小数位数
    pub decimals: Option<u32>,
}

impl RoundingStep {
    /// 平面坐标（米）的步长
    pub fn metric(tolerance: f64) -> Self {
        let exponent = -tolerance.log10();
        let decimals = if (exponent - exponent.round()).abs() < 1e-9 && exponent.round() >= 0.0 {
            Some(exponent.round() as u32)
        } else {
            None
        };
        Self {
            step: tolerance,
            decimals,
        }
    }

    /// 经纬度（度）的步长：赤道处角度步长对应的弧长不大于容差
    pub fn geodetic(tolerance: f64) -> Self {
        let decimals = (-(tolerance / METRES_PER_DEGREE).log10()).ceil().max(0.0) as u32;
        Self {
            step: 10f64.powi(-(decimals as i32)),
            decimals: Some(decimals),
        }
    }

    pub fn round(&self, value: f64) -> f64 {
        match self.decimals {
            Some(d) => round_to_decimals(value, d),
            None => round_value(value, self.step),
        }
    }
}

/// 按步长四舍五入（远离零）
pub fn round_value(value: f64, step: f64) -> f64 {
    if step <= 0.0 || !value.is_finite() {
        return value;
    }
    (value / step).round() * step
}

/// 按小数位数四舍五入（远离零）
pub fn round_to_decimals(value: f64, decimals: u32) -> f64 {
    if !value.is_finite() {
        return value;
    }
    let factor = 10f64.powi(decimals as i32);
    (value * factor).round() / factor
}

/// 单地块的精度统计
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PrecisionStats {
    /// 顶点总数
    pub vertices: usize,
    /// 带有多余精度（取整后发生变化）的顶点数
    pub adjusted_vertices: usize,
    /// 单个坐标的最大取整改动
    pub max_adjustment: f64,
    /// 取整后被合并的重复点数
    pub collapsed_vertices: usize,
    /// 首尾被吸附闭合的环数
    pub snapped_rings: usize,
    pub decimals: Option<u32>,
    /// 取整后的周长（投影坐标下）
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub perimeter: Option<f64>,
}

/// 规整结果
#[derive(Debug, Clone, Default)]
pub struct NormalizeOutcome {
    pub issues: Vec<ValidationIssue>,
    pub stats: PrecisionStats,
}

impl NormalizeOutcome {
    pub fn failed(&self) -> bool {
        self.issues.iter().any(ValidationIssue::is_blocking)
    }
}

#[derive(Debug, Clone, Default)]
pub struct PrecisionNormalizer {
    config: PrecisionConfig,
}

impl PrecisionNormalizer {
    pub fn new(config: PrecisionConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &PrecisionConfig {
        &self.config
    }

    /// 规整地块；出现阻断问题时地块保持原样
    pub fn normalize_parcel(&self, parcel: &mut Parcel) -> NormalizeOutcome {
        let geodetic = parcel.crs.as_ref().is_some_and(|c| c.is_geodetic());
        let planar = if geodetic {
            RoundingStep::geodetic(self.config.tolerance)
        } else {
            RoundingStep::metric(self.config.tolerance)
        };
        let height = RoundingStep::metric(self.config.tolerance);
        // 闭合吸附距离以坐标单位计
        let snap = if geodetic {
            self.config.tolerance / METRES_PER_DEGREE
        } else {
            self.config.tolerance
        };

        let mut outcome = NormalizeOutcome {
            stats: PrecisionStats {
                decimals: planar.decimals,
                ..Default::default()
            },
            ..Default::default()
        };

        let mut contours: Vec<Contour> = Vec::with_capacity(parcel.contours.len());
        for (ci, contour) in parcel.contours.iter().enumerate() {
            let outer = self.normalize_ring(
                parcel,
                RingId::outer(ci),
                &contour.outer,
                (&planar, &height, snap),
                &mut outcome,
            );
            let holes: Vec<Option<Ring>> = contour
                .holes
                .iter()
                .enumerate()
                .map(|(hi, hole)| {
                    self.normalize_ring(
                        parcel,
                        RingId::hole(ci, hi),
                        hole,
                        (&planar, &height, snap),
                        &mut outcome,
                    )
                })
                .collect();
            if let Some(outer) = outer {
                contours.push(Contour::with_holes(outer, holes.into_iter().flatten().collect()));
            }
        }

        if outcome.failed() {
            debug!("{}: normalization failed", parcel.id);
            return outcome;
        }

        parcel.contours = contours;
        if geodetic {
            parcel.computed_area = None;
        } else {
            let area = height.round(parcel.geometric_area());
            parcel.computed_area = Some(area);
            outcome.stats.perimeter = Some(height.round(parcel.perimeter()));

            if let Some(declared) = parcel.declared_area.filter(|d| *d > 0.0) {
                let relative = (area - declared).abs() / declared;
                if relative > self.config.area_discrepancy_threshold {
                    outcome.issues.push(ValidationIssue::new(
                        parcel.id.clone(),
                        IssueKind::AreaDiscrepancy,
                        IssueLocation::Parcel,
                        format!(
                            "computed area {:.2} m² differs from declared {:.2} m² by {:.1}%",
                            area,
                            declared,
                            relative * 100.0
                        ),
                    ));
                }
            }
        }
        outcome
    }

    fn normalize_ring(
        &self,
        parcel: &Parcel,
        ring_id: RingId,
        ring: &Ring,
        (planar, height, snap): (&RoundingStep, &RoundingStep, f64),
        outcome: &mut NormalizeOutcome,
    ) -> Option<Ring> {
        let stats = &mut outcome.stats;
        let mut vertices: Vec<Vertex> = Vec::with_capacity(ring.len());
        for v in &ring.vertices {
            let rounded = Vertex {
                x: planar.round(v.x),
                y: planar.round(v.y),
                z: v.z.map(|z| height.round(z)),
            };
            stats.vertices += 1;
            let adjustment = (rounded.x - v.x).abs().max((rounded.y - v.y).abs());
            if rounded != *v {
                stats.adjusted_vertices += 1;
                stats.max_adjustment = stats.max_adjustment.max(adjustment);
            }
            match vertices.last() {
                Some(last) if last.point() == rounded.point() => stats.collapsed_vertices += 1,
                _ => vertices.push(rounded),
            }
        }

        let mut normalized = Ring::new(vertices);
        let gap = normalized.closure_gap();
        let fail = |message: String| {
            ValidationIssue::new(
                parcel.id.clone(),
                IssueKind::NormalizationFailure,
                IssueLocation::Ring { ring: ring_id },
                message,
            )
        };

        if gap > 0.0 {
            if gap - snap > snap * 1e-6 {
                outcome.issues.push(fail(format!(
                    "{} does not close after rounding: gap {:.4}",
                    ring_id, gap
                )));
                return None;
            }
            let first = normalized.vertices[0];
            if let Some(last) = normalized.vertices.last_mut() {
                *last = first;
            }
            let n = normalized.vertices.len();
            if n >= 2 && normalized.vertices[n - 2].point() == first.point() {
                normalized.vertices.pop();
                outcome.stats.collapsed_vertices += 1;
            }
            outcome.stats.snapped_rings += 1;
        }

        let distinct = normalized.cycle().len();
        if distinct < 3 {
            outcome.issues.push(fail(format!(
                "{} has {} distinct vertices after rounding",
                ring_id, distinct
            )));
            return None;
        }
        Some(normalized)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crs::CoordinateSystemReference;
    use crate::math::Point2;
    use crate::parcel::{CadastralNumber, ObjectKind};

    fn parcel(points: &[(f64, f64)]) -> Parcel {
        let mut p = Parcel::new(
            CadastralNumber::parse("66:41:0204016:10").unwrap(),
            ObjectKind::Land,
        );
        p.contours.push(Contour::new(Ring::from_points(
            points.iter().map(|&(x, y)| Point2::new(x, y)),
        )));
        p
    }

    #[test]
    fn test_round_half_away_from_zero() {
        assert_eq!(round_to_decimals(2.5, 0), 3.0);
        assert_eq!(round_to_decimals(-2.5, 0), -3.0);
        assert_eq!(round_to_decimals(0.125, 2), 0.13);
        assert_eq!(round_to_decimals(-0.125, 2), -0.13);
        assert_eq!(round_value(7.5, 5.0), 10.0);
        assert_eq!(round_value(-7.5, 5.0), -10.0);
    }

    #[test]
    fn test_rounding_steps() {
        assert_eq!(RoundingStep::metric(0.01).decimals, Some(2));
        assert_eq!(RoundingStep::metric(0.05).decimals, None);
        let geo = RoundingStep::geodetic(0.01);
        assert_eq!(geo.decimals, Some(8));
        assert!(geo.step * METRES_PER_DEGREE <= 0.01);
    }

    #[test]
    fn test_normalize_square() {
        let mut p = parcel(&[
            (1_300_000.004, 480_000.006),
            (1_300_010.001, 480_000.0),
            (1_300_010.0, 480_010.0),
            (1_300_010.0, 480_010.001),
            (1_300_000.0, 480_010.0),
            (1_300_000.0, 480_000.0),
        ]);
        p.declared_area = Some(100.0);

        let outcome = PrecisionNormalizer::default().normalize_parcel(&mut p);
        assert!(outcome.issues.is_empty(), "{:?}", outcome.issues);
        assert_eq!(outcome.stats.snapped_rings, 1);
        assert_eq!(outcome.stats.collapsed_vertices, 1);

        let ring = &p.contours[0].outer;
        assert_eq!(ring.vertices.len(), 5);
        assert_eq!(ring.vertices[0].point(), Point2::new(1_300_000.0, 480_000.01));
        assert_eq!(ring.vertices[0], ring.vertices[4]);
        assert_eq!(p.computed_area, Some(99.95));
        assert_eq!(outcome.stats.perimeter, Some(39.99));
    }

    #[test]
    fn test_idempotent() {
        let mut p = parcel(&[
            (0.123, 0.456),
            (10.789, 0.001),
            (10.555, 10.445),
            (0.004, 9.996),
            (0.123, 0.456),
        ]);
        let normalizer = PrecisionNormalizer::default();
        normalizer.normalize_parcel(&mut p);
        let once = p.clone();
        let outcome = normalizer.normalize_parcel(&mut p);
        assert_eq!(p, once);
        assert_eq!(outcome.stats.adjusted_vertices, 0);
    }

    #[test]
    fn test_normalization_failure() {
        // 首尾相距 0.02 米，无法吸附
        let mut p = parcel(&[(0.0, 0.0), (10.0, 0.0), (10.0, 10.0), (0.0, 0.02)]);
        let before = p.clone();
        let outcome = PrecisionNormalizer::default().normalize_parcel(&mut p);
        assert!(outcome.failed());
        assert_eq!(outcome.issues[0].kind, IssueKind::NormalizationFailure);
        assert_eq!(p, before);

        // 取整后只剩两个不同点
        let mut p = parcel(&[(0.0, 0.0), (5.0, 0.0), (5.001, 0.002), (0.0, 0.0)]);
        assert!(PrecisionNormalizer::default().normalize_parcel(&mut p).failed());
    }

    #[test]
    fn test_area_discrepancy() {
        let mut p = parcel(&[(0.0, 0.0), (10.0, 0.0), (10.0, 10.0), (0.0, 10.0), (0.0, 0.0)]);
        p.declared_area = Some(120.0);
        let outcome = PrecisionNormalizer::default().normalize_parcel(&mut p);
        assert_eq!(outcome.issues.len(), 1);
        assert_eq!(outcome.issues[0].kind, IssueKind::AreaDiscrepancy);
        assert!(!outcome.failed());
    }

    #[test]
    fn test_geodetic_parcel() {
        let mut p = parcel(&[
            (37.123456789, 55.1),
            (37.2, 55.1),
            (37.2, 55.2),
            (37.123456789, 55.1),
        ]);
        p.crs = Some(CoordinateSystemReference::wgs84());
        p.declared_area = Some(1.0);
        let outcome = PrecisionNormalizer::default().normalize_parcel(&mut p);
        assert!(outcome.issues.is_empty());
        assert_eq!(p.computed_area, None);
        assert_eq!(outcome.stats.decimals, Some(8));
        assert!((p.contours[0].outer.vertices[0].x - 37.12345679).abs() < 1e-12);
    }
}
