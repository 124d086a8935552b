//! 拓扑校验
//!
//! 每个环按固定顺序检查：闭合 → 自相交 → 退化；出现阻断问题即停止该环的后续检查，
//! 但不影响同一地块的其他环。洞的包含关系与洞之间的重叠在各环检查之后进行。
//! 所有单地块检查完成后，对没有阻断问题的地块做相邻关系检查（缝隙与重叠）。
//!
//! 校验器只读取几何，从不修改地块。

use crate::geometry::{intersect_segments, polygon_contains, Line, Ring, SegmentIntersection};
use crate::issue::{IssueKind, IssueLocation, IssueLog, Severity, ValidationIssue};
use crate::math::Point2;
use crate::parcel::{CadastralNumber, Parcel, RingId};
use crate::spatial::SpatialIndex;
use rayon::prelude::*;
use tracing::debug;

/// 校验参数
#[derive(Debug, Clone)]
pub struct TopologyConfig {
    /// 距离容差 ε（米）
    pub tolerance: f64,
    /// 环的最小面积（平方米）
    pub min_area: f64,
    /// 尖角阈值（度）
    pub spike_angle_deg: f64,
    /// 相邻检查的搜索距离（米）
    pub adjacency_search: f64,
    /// 缝隙与重叠是否按阻断处理
    pub adjacency_blocking: bool,
}

impl Default for TopologyConfig {
    fn default() -> Self {
        Self {
            tolerance: 0.01,
            min_area: 0.01,
            spike_angle_deg: 1.0,
            adjacency_search: 0.1,
            adjacency_blocking: false,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct TopologyValidator {
    config: TopologyConfig,
}

impl TopologyValidator {
    pub fn new(config: TopologyConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &TopologyConfig {
        &self.config
    }

    /// 校验一批地块：先并行做单地块检查，再对通过的地块做相邻检查
    pub fn validate(&self, parcels: &[Parcel]) -> IssueLog {
        let mut log = IssueLog::new();
        let per_parcel: Vec<Vec<ValidationIssue>> =
            parcels.par_iter().map(|p| self.check_parcel(p)).collect();
        for issues in per_parcel {
            log.extend(issues);
        }

        let clean: Vec<&Parcel> = parcels.iter().filter(|p| !log.has_blocking(&p.id)).collect();
        log.extend(self.check_adjacency(&clean));
        log
    }

    /// 单地块检查（第 1–4 步及附加提示）
    pub fn check_parcel(&self, parcel: &Parcel) -> Vec<ValidationIssue> {
        let mut issues = Vec::new();
        for (ci, contour) in parcel.contours.iter().enumerate() {
            let outer_ok = self.check_ring(&parcel.id, RingId::outer(ci), &contour.outer, &mut issues);

            let mut valid_holes = Vec::with_capacity(contour.holes.len());
            for (hi, hole) in contour.holes.iter().enumerate() {
                if self.check_ring(&parcel.id, RingId::hole(ci, hi), hole, &mut issues) {
                    valid_holes.push(hi);
                }
            }

            if !outer_ok {
                continue;
            }
            for &hi in &valid_holes {
                let hole = &contour.holes[hi];
                if let Some(p) = self.escaping_point(hole, &contour.outer) {
                    issues.push(ValidationIssue::new(
                        parcel.id.clone(),
                        IssueKind::HoleEscapesBoundary,
                        IssueLocation::Ring {
                            ring: RingId::hole(ci, hi),
                        },
                        format!(
                            "hole extends outside its outer ring near ({:.3}, {:.3})",
                            p.x, p.y
                        ),
                    ));
                }
            }
            for (k, &h1) in valid_holes.iter().enumerate() {
                for &h2 in &valid_holes[k + 1..] {
                    if self.holes_overlap(&contour.holes[h1], &contour.holes[h2]) {
                        issues.push(ValidationIssue::new(
                            parcel.id.clone(),
                            IssueKind::OverlappingHoles,
                            IssueLocation::Ring {
                                ring: RingId::hole(ci, h2),
                            },
                            format!("hole {} overlaps hole {}", h2 + 1, h1 + 1),
                        ));
                    }
                }
            }
        }

        if !issues.is_empty() {
            debug!("{}: {} topology issue(s)", parcel.id, issues.len());
        }
        issues
    }

    /// 单环检查，返回该环是否没有阻断问题
    fn check_ring(
        &self,
        id: &CadastralNumber,
        ring_id: RingId,
        ring: &Ring,
        issues: &mut Vec<ValidationIssue>,
    ) -> bool {
        let eps = self.config.tolerance;

        let gap = ring.closure_gap();
        if gap > eps {
            issues.push(ValidationIssue::new(
                id.clone(),
                IssueKind::UnclosedRing,
                IssueLocation::Ring { ring: ring_id },
                format!(
                    "{} is not closed: gap {:.3} m exceeds tolerance {} m",
                    ring_id, gap, eps
                ),
            ));
            return false;
        }

        let distinct = distinct_with_index(ring, eps);
        if distinct.len() >= 3 {
            let crossings = self_intersections(&distinct);
            if let Some(first) = crossings.first() {
                issues.push(ValidationIssue::new(
                    id.clone(),
                    IssueKind::SelfIntersection,
                    IssueLocation::point(*first),
                    format!(
                        "{} intersects itself at {} point(s), first at ({:.3}, {:.3})",
                        ring_id,
                        crossings.len(),
                        first.x,
                        first.y
                    ),
                ));
                return false;
            }
        }

        let area = ring.area();
        if distinct.len() < 3 || area < self.config.min_area {
            issues.push(ValidationIssue::new(
                id.clone(),
                IssueKind::DegenerateRing,
                IssueLocation::Ring { ring: ring_id },
                format!(
                    "{} is degenerate: {} distinct vertices, area {:.4} m²",
                    ring_id,
                    distinct.len(),
                    area
                ),
            ));
            return false;
        }

        for (i, pair) in ring.vertices.windows(2).enumerate() {
            let (a, b) = (pair[0].point(), pair[1].point());
            if (b - a).norm() < eps {
                issues.push(ValidationIssue::new(
                    id.clone(),
                    IssueKind::DuplicateVertex,
                    IssueLocation::vertex(ring_id, i + 1, b),
                    format!("{}: vertex {} repeats vertex {}", ring_id, i + 2, i + 1),
                ));
            }
        }

        let n = distinct.len();
        for k in 0..n {
            let (index, p) = distinct[k];
            let prev = distinct[(k + n - 1) % n].1;
            let next = distinct[(k + 1) % n].1;
            let angle = interior_angle_deg(&prev, &p, &next);
            if angle <= self.config.spike_angle_deg {
                issues.push(ValidationIssue::new(
                    id.clone(),
                    IssueKind::Spike,
                    IssueLocation::vertex(ring_id, index, p),
                    format!("{}: spike of {:.3}° at vertex {}", ring_id, angle, index + 1),
                ));
            }
        }
        true
    }

    /// 洞上位于外环之外（超出容差）的点
    fn escaping_point(&self, hole: &Ring, outer: &Ring) -> Option<Point2> {
        sample_points(hole).into_iter().find(|p| {
            !outer.contains_point(p) && outer.distance_to_point(p) > self.config.tolerance
        })
    }

    fn holes_overlap(&self, a: &Ring, b: &Ring) -> bool {
        if !a.bounding_box().intersects(&b.bounding_box()) {
            return false;
        }
        let eps = self.config.tolerance;
        let deep_inside = |p: &Point2, r: &Ring| r.contains_point(p) && r.distance_to_point(p) > eps;
        sample_points(a).iter().any(|p| deep_inside(p, b))
            || sample_points(b).iter().any(|p| deep_inside(p, a))
            || crate::geometry::interior_point(a, &[]).is_some_and(|p| b.contains_point(&p))
    }

    /// 相邻关系检查（第 5 步）。候选对来自网格索引，并行比较，结果按候选对顺序输出
    pub fn check_adjacency(&self, parcels: &[&Parcel]) -> Vec<ValidationIssue> {
        if parcels.len() < 2 {
            return Vec::new();
        }
        let search = self.config.adjacency_search;
        let index = SpatialIndex::build(
            parcels
                .iter()
                .enumerate()
                .map(|(i, p)| (i, p.bounding_box())),
        );
        let pairs = index.candidate_pairs(search);
        debug!("adjacency: {} candidate pair(s)", pairs.len());

        let severity = if self.config.adjacency_blocking {
            Severity::Blocking
        } else {
            Severity::Advisory
        };

        pairs
            .par_iter()
            .flat_map_iter(|&(ia, ib)| {
                let (a, b) = (parcels[ia], parcels[ib]);
                let ab = self.compare(a, b);
                let ba = self.compare(b, a);

                let mut found = Vec::new();
                if let Some((depth, p)) = max_of(ab.overlap, ba.overlap) {
                    found.push((IssueKind::BoundaryOverlap, depth, p));
                }
                if let Some((gap, p)) = max_of(ab.gap, ba.gap) {
                    found.push((IssueKind::BoundaryGap, gap, p));
                }

                let mut issues = Vec::with_capacity(found.len() * 2);
                for (kind, distance, p) in found {
                    let what = if kind == IssueKind::BoundaryGap {
                        "gap"
                    } else {
                        "overlap"
                    };
                    for (me, other) in [(a, b), (b, a)] {
                        issues.push(
                            ValidationIssue::new(
                                me.id.clone(),
                                kind,
                                IssueLocation::Neighbour {
                                    parcel: other.id.clone(),
                                    x: p.x,
                                    y: p.y,
                                },
                                format!(
                                    "{} of {:.3} m with neighbour {} near ({:.3}, {:.3})",
                                    what, distance, other.id, p.x, p.y
                                ),
                            )
                            .with_severity(severity),
                        );
                    }
                }
                issues
            })
            .collect()
    }

    /// 以 B 为参照考察 A 的顶点与边片段
    fn compare(&self, a: &Parcel, b: &Parcel) -> Comparison {
        let eps = self.config.tolerance;
        let search = self.config.adjacency_search;
        let b_bbox = b.bounding_box().inflate(search);
        let b_segments: Vec<Line> = b.rings().flat_map(|(_, r)| r.segments()).collect();

        let mut result = Comparison::default();
        for (_, ring) in a.rings() {
            for p in pieces_against(ring, &b_segments) {
                if !b_bbox.contains(&p) {
                    continue;
                }
                let distance = b_segments
                    .iter()
                    .map(|s| s.distance_to_point(&p))
                    .fold(f64::INFINITY, f64::min);
                if distance <= eps {
                    continue;
                }
                let inside = b
                    .contours
                    .iter()
                    .any(|c| polygon_contains(&c.outer, &c.holes, &p));
                if inside {
                    result.overlap = max_of(result.overlap, Some((distance, p)));
                } else if distance <= search {
                    result.gap = max_of(result.gap, Some((distance, p)));
                }
            }
        }
        result
    }
}

#[derive(Debug, Default)]
struct Comparison {
    gap: Option<(f64, Point2)>,
    overlap: Option<(f64, Point2)>,
}

fn max_of(a: Option<(f64, Point2)>, b: Option<(f64, Point2)>) -> Option<(f64, Point2)> {
    match (a, b) {
        (Some(x), Some(y)) => Some(if y.0 > x.0 { y } else { x }),
        (x, None) => x,
        (None, y) => y,
    }
}

/// 顶点及边中点
fn sample_points(ring: &Ring) -> Vec<Point2> {
    ring.cycle()
        .iter()
        .map(|v| v.point())
        .chain(ring.segments().map(|s| s.midpoint()))
        .collect()
}

/// 环的顶点，以及每条边被 `others` 切分后各片段的中点
fn pieces_against(ring: &Ring, others: &[Line]) -> Vec<Point2> {
    let mut points: Vec<Point2> = ring.cycle().iter().map(|v| v.point()).collect();
    for seg in ring.segments() {
        let length = seg.length();
        if length <= 0.0 {
            continue;
        }
        let bbox = seg.bounding_box();
        let mut cuts = vec![0.0, 1.0];
        for other in others {
            if !bbox.intersects(&other.bounding_box()) {
                continue;
            }
            match intersect_segments(&seg, other) {
                SegmentIntersection::None => {}
                SegmentIntersection::Point(p) => cuts.push(seg.project(&p).clamp(0.0, 1.0)),
                SegmentIntersection::Overlap(p, q) => {
                    cuts.push(seg.project(&p).clamp(0.0, 1.0));
                    cuts.push(seg.project(&q).clamp(0.0, 1.0));
                }
            }
        }
        cuts.sort_by(f64::total_cmp);
        cuts.dedup_by(|x, y| (*x - *y).abs() * length < 1e-9);
        for w in cuts.windows(2) {
            points.push(seg.point_at((w[0] + w[1]) / 2.0));
        }
    }
    points
}

/// 按容差去重后的顶点及其原始序号
fn distinct_with_index(ring: &Ring, tolerance: f64) -> Vec<(usize, Point2)> {
    let mut result: Vec<(usize, Point2)> = Vec::with_capacity(ring.len());
    for (i, v) in ring.vertices.iter().enumerate() {
        let p = v.point();
        match result.last() {
            Some((_, last)) if (p - last).norm() <= tolerance => {}
            _ => result.push((i, p)),
        }
    }
    while result.len() > 1 {
        let (first, last) = (result[0].1, result[result.len() - 1].1);
        if (last - first).norm() <= tolerance {
            result.pop();
        } else {
            break;
        }
    }
    result
}

/// 排序线段扫描，返回所有自相交点（按线段序号排序）
fn self_intersections(distinct: &[(usize, Point2)]) -> Vec<Point2> {
    let n = distinct.len();
    let segments: Vec<Line> = (0..n)
        .map(|i| Line::new(distinct[i].1, distinct[(i + 1) % n].1))
        .collect();

    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by(|&a, &b| {
        let ax = segments[a].start.x.min(segments[a].end.x);
        let bx = segments[b].start.x.min(segments[b].end.x);
        ax.total_cmp(&bx)
    });

    let adjacent = |i: usize, j: usize| {
        let (lo, hi) = (i.min(j), i.max(j));
        hi == lo + 1 || (lo == 0 && hi == n - 1)
    };

    let mut found: Vec<((usize, usize), Point2)> = Vec::new();
    let mut active: Vec<usize> = Vec::new();
    for &i in &order {
        let seg = &segments[i];
        let min_x = seg.start.x.min(seg.end.x);
        active.retain(|&j| {
            let s = &segments[j];
            s.start.x.max(s.end.x) >= min_x - crate::geometry::TOUCH_TOLERANCE
        });
        for &j in &active {
            let hit = intersect_segments(seg, &segments[j]);
            let point = match hit {
                SegmentIntersection::None => None,
                // 相邻边共享端点，只有共线回折才算相交
                SegmentIntersection::Point(_) if adjacent(i, j) => None,
                SegmentIntersection::Point(p) => Some(p),
                SegmentIntersection::Overlap(p, q) => {
                    if adjacent(i, j) {
                        let shared = if (i + 1) % n == j {
                            segments[i].end
                        } else {
                            segments[i].start
                        };
                        Some(if (p - shared).norm() > (q - shared).norm() {
                            p
                        } else {
                            q
                        })
                    } else {
                        Some(p)
                    }
                }
            };
            if let Some(p) = point {
                found.push(((i.min(j), i.max(j)), p));
            }
        }
        active.push(i);
    }
    found.sort_by(|a, b| a.0.cmp(&b.0));
    found.into_iter().map(|(_, p)| p).collect()
}

/// 顶点处两条边的夹角（度，0–180）
fn interior_angle_deg(prev: &Point2, p: &Point2, next: &Point2) -> f64 {
    let a = (prev.y - p.y).atan2(prev.x - p.x);
    let b = (next.y - p.y).atan2(next.x - p.x);
    let d = (a - b).to_degrees().abs().rem_euclid(360.0);
    d.min(360.0 - d)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::issue::Verdict;
    use crate::parcel::{Contour, ObjectKind};

    fn ring(points: &[(f64, f64)]) -> Ring {
        Ring::from_points(points.iter().map(|&(x, y)| Point2::new(x, y)))
    }

    fn square(x: f64, y: f64, size: f64) -> Ring {
        ring(&[
            (x, y),
            (x + size, y),
            (x + size, y + size),
            (x, y + size),
            (x, y),
        ])
    }

    fn parcel(id: &str, contours: Vec<Contour>) -> Parcel {
        let mut p = Parcel::new(CadastralNumber::parse(id).unwrap(), ObjectKind::Land);
        p.contours = contours;
        p
    }

    fn kinds(issues: &[ValidationIssue]) -> Vec<IssueKind> {
        issues.iter().map(|i| i.kind).collect()
    }

    #[test]
    fn test_valid_square() {
        let v = TopologyValidator::default();
        let p = parcel("23:43:0302001:1", vec![Contour::new(square(0.0, 0.0, 10.0))]);
        assert!(v.check_parcel(&p).is_empty());
    }

    #[test]
    fn test_unclosed_ring_stops_further_checks() {
        let v = TopologyValidator::default();
        // 同时也是自相交的“8”字形，但只报告未闭合
        let open = ring(&[(0.0, 0.0), (10.0, 10.0), (10.0, 0.0), (0.0, 10.0), (0.0, 0.5)]);
        let p = parcel("23:43:0302001:2", vec![Contour::new(open)]);
        assert_eq!(kinds(&v.check_parcel(&p)), vec![IssueKind::UnclosedRing]);
    }

    #[test]
    fn test_self_intersection() {
        let v = TopologyValidator::default();
        let bowtie = ring(&[(0.0, 0.0), (10.0, 10.0), (10.0, 0.0), (0.0, 10.0), (0.0, 0.0)]);
        let p = parcel("23:43:0302001:3", vec![Contour::new(bowtie)]);
        let issues = v.check_parcel(&p);
        assert_eq!(kinds(&issues), vec![IssueKind::SelfIntersection]);
        assert!(issues[0].is_blocking());
        match issues[0].location {
            IssueLocation::Point { x, y } => {
                assert!((x - 5.0).abs() < 1e-9 && (y - 5.0).abs() < 1e-9)
            }
            ref other => panic!("unexpected location {:?}", other),
        }
    }

    #[test]
    fn test_touching_vertex_is_self_intersection() {
        let v = TopologyValidator::default();
        // 两个三角形在 (5,5) 处相接
        let r = ring(&[
            (0.0, 0.0),
            (5.0, 5.0),
            (10.0, 0.0),
            (10.0, 10.0),
            (5.0, 5.0),
            (0.0, 10.0),
            (0.0, 0.0),
        ]);
        let p = parcel("23:43:0302001:4", vec![Contour::new(r)]);
        assert_eq!(kinds(&v.check_parcel(&p)), vec![IssueKind::SelfIntersection]);
    }

    #[test]
    fn test_degenerate_ring() {
        let v = TopologyValidator::default();
        let thin = ring(&[(0.0, 0.0), (10.0, 0.0), (10.0, 0.0005), (0.0, 0.0)]);
        let p = parcel("23:43:0302001:5", vec![Contour::new(thin)]);
        assert_eq!(kinds(&v.check_parcel(&p)), vec![IssueKind::DegenerateRing]);

        let two = ring(&[(0.0, 0.0), (10.0, 0.0), (0.0, 0.0)]);
        let p = parcel("23:43:0302001:6", vec![Contour::new(two)]);
        assert_eq!(kinds(&v.check_parcel(&p)), vec![IssueKind::DegenerateRing]);
    }

    #[test]
    fn test_advisory_extras() {
        let v = TopologyValidator::default();
        let r = ring(&[
            (0.0, 0.0),
            (10.0, 0.0),
            (10.0, 0.0),
            (10.0, 10.0),
            (0.0, 10.0),
            (0.0, 0.0),
        ]);
        let p = parcel("23:43:0302001:7", vec![Contour::new(r)]);
        let issues = v.check_parcel(&p);
        assert_eq!(kinds(&issues), vec![IssueKind::DuplicateVertex]);
        assert_eq!(Verdict::from_issues(&issues), Verdict::ValidWithWarnings);

        // 尖刺：在 (10,5) 处向外伸出 20 米、宽 0.1 米的针
        let spike = ring(&[
            (0.0, 0.0),
            (10.0, 0.0),
            (10.0, 5.0),
            (30.0, 5.05),
            (10.0, 5.1),
            (10.0, 10.0),
            (0.0, 10.0),
            (0.0, 0.0),
        ]);
        let p = parcel("23:43:0302001:8", vec![Contour::new(spike)]);
        let issues = v.check_parcel(&p);
        assert_eq!(kinds(&issues), vec![IssueKind::Spike]);
        assert_eq!(issues[0].location.ring(), Some(RingId::outer(0)));
    }

    #[test]
    fn test_holes() {
        let v = TopologyValidator::default();
        let ok = parcel(
            "23:43:0302001:9",
            vec![Contour::with_holes(
                square(0.0, 0.0, 20.0),
                vec![square(2.0, 2.0, 4.0), square(10.0, 10.0, 4.0)],
            )],
        );
        assert!(v.check_parcel(&ok).is_empty());

        let escaping = parcel(
            "23:43:0302001:10",
            vec![Contour::with_holes(
                square(0.0, 0.0, 20.0),
                vec![square(18.0, 2.0, 4.0)],
            )],
        );
        assert_eq!(
            kinds(&v.check_parcel(&escaping)),
            vec![IssueKind::HoleEscapesBoundary]
        );

        let overlapping = parcel(
            "23:43:0302001:11",
            vec![Contour::with_holes(
                square(0.0, 0.0, 20.0),
                vec![square(2.0, 2.0, 6.0), square(5.0, 5.0, 6.0)],
            )],
        );
        assert_eq!(
            kinds(&v.check_parcel(&overlapping)),
            vec![IssueKind::OverlappingHoles]
        );
    }

    #[test]
    fn test_gap_between_neighbours() {
        let a = parcel("23:43:0302001:20", vec![Contour::new(square(0.0, 0.0, 10.0))]);
        let b = parcel("23:43:0302001:21", vec![Contour::new(square(10.02, 0.0, 10.0))]);

        let log = TopologyValidator::default().validate(&[a.clone(), b.clone()]);
        for p in [&a, &b] {
            let issues = log.issues_for(&p.id);
            assert_eq!(kinds(issues), vec![IssueKind::BoundaryGap]);
            assert!(!issues[0].is_blocking());
        }

        let blocking = TopologyValidator::new(TopologyConfig {
            adjacency_blocking: true,
            ..Default::default()
        });
        let log = blocking.validate(&[a.clone(), b.clone()]);
        assert_eq!(log.verdict(&a.id), Verdict::Invalid);
        assert_eq!(log.verdict(&b.id), Verdict::Invalid);
    }

    #[test]
    fn test_shared_edge_is_clean() {
        let a = parcel("23:43:0302001:22", vec![Contour::new(square(0.0, 0.0, 10.0))]);
        let b = parcel("23:43:0302001:23", vec![Contour::new(square(10.0, 0.0, 10.0))]);
        let c = parcel("23:43:0302001:24", vec![Contour::new(square(10.0, 3.0, 4.0))]);
        let log = TopologyValidator::default().validate(&[a, b]);
        assert!(log.is_empty());

        // 完全落在 b 内部的地块与 b 重叠
        let b = parcel("23:43:0302001:23", vec![Contour::new(square(10.0, 0.0, 10.0))]);
        let log = TopologyValidator::default().validate(&[b.clone(), c.clone()]);
        assert_eq!(log.count_of(IssueKind::BoundaryOverlap), 2);
        assert_eq!(log.count_of(IssueKind::BoundaryGap), 0);
    }

    #[test]
    fn test_overlap_between_neighbours() {
        let a = parcel("23:43:0302001:25", vec![Contour::new(square(0.0, 0.0, 10.0))]);
        let b = parcel("23:43:0302001:26", vec![Contour::new(square(9.95, 0.0, 10.0))]);
        let log = TopologyValidator::default().validate(&[a.clone(), b]);
        assert_eq!(kinds(log.issues_for(&a.id)), vec![IssueKind::BoundaryOverlap]);
    }

    #[test]
    fn test_blocked_parcels_skip_adjacency() {
        let a = parcel("23:43:0302001:27", vec![Contour::new(square(0.0, 0.0, 10.0))]);
        let open = ring(&[(10.02, 0.0), (20.0, 0.0), (20.0, 10.0), (10.02, 10.0), (10.02, 1.0)]);
        let b = parcel("23:43:0302001:28", vec![Contour::new(open)]);
        let log = TopologyValidator::default().validate(&[a.clone(), b.clone()]);
        assert!(log.issues_for(&a.id).is_empty());
        assert_eq!(kinds(log.issues_for(&b.id)), vec![IssueKind::UnclosedRing]);
    }
}
